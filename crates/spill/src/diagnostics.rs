//! Diagnostics collected while lowering a batch of methods.

use core::fmt;

use crate::compile;
use crate::span::{Span, Spanned};

/// A single diagnostic.
#[derive(Debug)]
#[non_exhaustive]
pub enum Diagnostic {
    /// A method could not be lowered.
    Error(MethodError),
    /// The lowering violated one of its own invariants. This is a defect in
    /// the lowering rather than in the method.
    Internal(MethodError),
}

impl Diagnostic {
    /// Get the error of the diagnostic.
    pub fn error(&self) -> &MethodError {
        match self {
            Diagnostic::Error(error) | Diagnostic::Internal(error) => error,
        }
    }
}

/// An error associated with the method it was raised in.
#[derive(Debug)]
pub struct MethodError {
    method: Box<str>,
    error: compile::Error,
}

impl MethodError {
    /// The name of the method which failed to lower.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The kind of the error.
    pub fn kind(&self) -> &compile::ErrorKind {
        self.error.kind()
    }

    /// Convert into the underlying lowering error.
    pub fn into_error(self) -> compile::Error {
        self.error
    }
}

impl Spanned for MethodError {
    #[inline]
    fn span(&self) -> Span {
        self.error.span()
    }
}

impl fmt::Display for MethodError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}: {}", self.method, self.error.span(), self.error)
    }
}

/// Structure to collect lowering diagnostics.
///
/// # Examples
///
/// ```
/// use spill::compile::{self, Options};
/// use spill::hir::Builder;
/// use spill::Diagnostics;
///
/// let b = Builder::new("Empty");
/// let method = b.finish(Vec::new());
///
/// let mut diagnostics = Diagnostics::new();
/// let lowered = compile::lower_all(&[method], &Options::default(), &mut diagnostics);
///
/// assert_eq!(lowered.len(), 1);
/// assert!(diagnostics.is_empty());
/// ```
#[derive(Debug, Default)]
pub struct Diagnostics {
    diagnostics: Vec<Diagnostic>,
    /// Last internal error in the chain.
    last_internal: Option<usize>,
}

impl Diagnostics {
    /// Construct a new, empty collection of diagnostics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Indicate if there is any diagnostics.
    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    /// Check if diagnostics has any errors reported.
    pub fn has_error(&self) -> bool {
        !self.diagnostics.is_empty()
    }

    /// Check if any internal errors were reported.
    pub fn has_internal(&self) -> bool {
        self.last_internal.is_some()
    }

    /// Access underlying diagnostics.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Convert into underlying diagnostics.
    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diagnostics
    }

    /// Report an error raised while lowering the given method.
    pub fn error(&mut self, method: &str, error: compile::Error) {
        let error = MethodError {
            method: method.into(),
            error,
        };

        if error.error.is_internal() {
            tracing::error!(%error, "internal lowering error");
            self.last_internal = Some(self.diagnostics.len());
            self.diagnostics.push(Diagnostic::Internal(error));
        } else {
            tracing::debug!(%error, "method not lowered");
            self.diagnostics.push(Diagnostic::Error(error));
        }
    }
}
