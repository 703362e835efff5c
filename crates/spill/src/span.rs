use core::fmt;

use serde::{Deserialize, Serialize};

/// A byte range in the source of the method being lowered.
///
/// Every expression node, emitted operation and diagnostic carries one, so
/// that a failure can be reported at the construct which caused it.
#[derive(Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: u32,
    pub end: u32,
}

impl Span {
    /// Construct a new span.
    ///
    /// # Examples
    ///
    /// ```
    /// use spill::Span;
    ///
    /// let span = Span::new(42, 50);
    /// assert!(span < Span::new(100, 101));
    /// assert_eq!(span.to_string(), "42:50");
    /// ```
    pub const fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// The span of code synthesized by the lowering itself.
    pub const fn empty() -> Self {
        Self { start: 0, end: 0 }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.start, self.end)
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Span({}, {})", self.start, self.end)
    }
}

/// Anything which can be reported at a location in the source.
pub trait Spanned {
    fn span(&self) -> Span;
}

impl Spanned for Span {
    #[inline]
    fn span(&self) -> Span {
        *self
    }
}

impl<T> Spanned for &T
where
    T: ?Sized + Spanned,
{
    #[inline]
    fn span(&self) -> Span {
        Spanned::span(*self)
    }
}
