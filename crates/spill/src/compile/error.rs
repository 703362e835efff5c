use core::fmt;

use thiserror::Error;

use crate::compile::{Construct, LoweringMode};
use crate::hir::Type;
use crate::span::{Span, Spanned};

/// Result alias used by the lowering.
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// An error raised while lowering a method.
#[derive(Debug)]
pub struct Error {
    // The span the error is associated with.
    span: Span,
    kind: Box<ErrorKind>,
}

impl Error {
    /// Construct a new lowering error.
    pub fn new<S, K>(span: S, kind: K) -> Self
    where
        S: Spanned,
        ErrorKind: From<K>,
    {
        Self {
            span: span.span(),
            kind: Box::new(ErrorKind::from(kind)),
        }
    }

    /// Construct an internal error.
    ///
    /// This signals a defect in the lowering itself rather than a problem
    /// with the method being lowered.
    pub fn internal<S, M>(span: S, message: M) -> Self
    where
        S: Spanned,
        M: fmt::Display,
    {
        Self::new(
            span,
            ErrorKind::Internal {
                message: message.to_string().into(),
            },
        )
    }

    /// Get the kind of the error.
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Convert into the kind of the error.
    pub fn into_kind(self) -> ErrorKind {
        *self.kind
    }

    /// Test if this is an internal error.
    pub fn is_internal(&self) -> bool {
        matches!(&*self.kind, ErrorKind::Internal { .. })
    }
}

impl Spanned for Error {
    #[inline]
    fn span(&self) -> Span {
        self.span
    }
}

impl fmt::Display for Error {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.kind, f)
    }
}

impl std::error::Error for Error {
    #[inline]
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.kind.source()
    }
}

/// The kind of a lowering error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[allow(missing_docs)]
#[non_exhaustive]
pub enum ErrorKind {
    #[error("Method `{method}` spills {construct} across an await, which is not supported in {mode} mode; opt the method out of {mode} lowering to compile it")]
    UnsupportedConstructInMode {
        method: Box<str>,
        construct: Construct,
        mode: LoweringMode,
    },
    #[error("A reference returned by `{origin}` cannot be preserved across an await")]
    UnpreservableReference { origin: Box<str> },
    #[error("`await` cannot be used in an expression containing the type `{ty}`")]
    UnpreservableStackScopedStorage { ty: Type },
    #[error("Expression of kind `{kind}` cannot be assigned to")]
    UnsupportedAssignTarget { kind: &'static str },
    #[error("Conditional receiver used outside of a conditional access")]
    MissingConditionalReceiver,
    #[error("Internal error: {message}")]
    Internal { message: Box<str> },
}
