use core::fmt;

use thiserror::Error;

/// An error raised while executing lowered operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmError {
    ip: usize,
    kind: Box<VmErrorKind>,
}

impl VmError {
    pub(crate) fn new(ip: usize, kind: VmErrorKind) -> Self {
        Self {
            ip,
            kind: Box::new(kind),
        }
    }

    /// Construct a panic raised by a host function.
    pub fn panic(message: impl fmt::Display) -> Self {
        Self::new(0, VmErrorKind::Panic {
            message: message.to_string().into(),
        })
    }

    /// The instruction pointer the error was raised at.
    pub fn ip(&self) -> usize {
        self.ip
    }

    /// The kind of the error.
    pub fn kind(&self) -> &VmErrorKind {
        &self.kind
    }

    /// Convert into the kind of the error.
    pub fn into_kind(self) -> VmErrorKind {
        *self.kind
    }

    pub(crate) fn at(mut self, ip: usize) -> Self {
        self.ip = ip;
        self
    }
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (at instruction {})", self.kind, self.ip)
    }
}

impl std::error::Error for VmError {}

impl From<VmErrorKind> for VmError {
    #[inline]
    fn from(kind: VmErrorKind) -> Self {
        Self::new(0, kind)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum VmErrorKind {
    #[error("Object reference not set to an instance of an object")]
    NullReference,
    #[error("Index {index} was outside the bounds of the array of length {length}")]
    IndexOutOfRange { index: i64, length: usize },
    #[error("Attempted to divide by zero")]
    DivideByZero,
    #[error("Tried to pop an empty operand stack")]
    StackUnderflow,
    #[error("Slot s{slot} was read before it was stored")]
    UninitializedSlot { slot: usize },
    #[error("Temporary t{temp} was read when it was not valid")]
    InvalidTemp { temp: usize },
    #[error("Missing function `{name}`")]
    MissingFunction { name: Box<str> },
    #[error("Expected {expected}, but found `{actual}`")]
    TypeMismatch {
        expected: &'static str,
        actual: Box<str>,
    },
    #[error("Invalid address: {message}")]
    InvalidAddress { message: Box<str> },
    #[error("Missing label {label}")]
    MissingLabel { label: Box<str> },
    #[error("Panicked: {message}")]
    Panic { message: Box<str> },
}
