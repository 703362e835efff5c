use core::fmt;

use serde::{Deserialize, Serialize};

/// The resolved type of an expression, as provided by the front end.
///
/// Only the properties which matter for spilling are modelled: whether a value
/// is a reference to heap storage, an address into storage, or storage which
/// is scoped to the current activation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    /// The unit type, produced by expressions evaluated for their effects.
    Unit,
    /// A boolean.
    Bool,
    /// A signed integer.
    Int,
    /// An immutable string.
    String,
    /// The root reference type.
    Object,
    /// A named reference type.
    Class(Box<str>),
    /// A named value type.
    Struct(Box<str>),
    /// An array with the given element type and rank.
    Array { element: Box<Type>, rank: usize },
    /// A nullable value type.
    Nullable(Box<Type>),
    /// A managed address of storage holding the given type.
    Ref(Box<Type>),
    /// A view into stack-allocated storage.
    Span(Box<Type>),
    /// An awaitable task producing the given type.
    Task(Box<Type>),
    /// A variable argument list.
    ArgList,
}

impl Type {
    /// Construct a class type.
    pub fn class(name: &str) -> Self {
        Self::Class(name.into())
    }

    /// Construct a struct type.
    pub fn struct_(name: &str) -> Self {
        Self::Struct(name.into())
    }

    /// Construct a single-dimensional array type.
    pub fn array(element: Type) -> Self {
        Self::Array {
            element: Box::new(element),
            rank: 1,
        }
    }

    /// Construct an array type with the given rank.
    pub fn array_of_rank(element: Type, rank: usize) -> Self {
        Self::Array {
            element: Box::new(element),
            rank,
        }
    }

    /// Construct a nullable type.
    pub fn nullable(inner: Type) -> Self {
        Self::Nullable(Box::new(inner))
    }

    /// Construct an address type.
    pub fn ref_(inner: Type) -> Self {
        Self::Ref(Box::new(inner))
    }

    /// Construct a stack-scoped span type.
    pub fn span(element: Type) -> Self {
        Self::Span(Box::new(element))
    }

    /// Construct a task type.
    pub fn task(inner: Type) -> Self {
        Self::Task(Box::new(inner))
    }

    /// Test if this is a managed address which must not outlive the current
    /// activation.
    pub fn is_address(&self) -> bool {
        matches!(self, Self::Ref(..))
    }

    /// Test if values of this type live in storage scoped to the current
    /// activation.
    pub fn is_stack_scoped(&self) -> bool {
        matches!(self, Self::Span(..))
    }

    /// Test if this type is a reference to heap storage. Slots holding such
    /// values are released once they are no longer live.
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            Self::String
                | Self::Object
                | Self::Class(..)
                | Self::Array { .. }
                | Self::Task(..)
                | Self::ArgList
        )
    }

    /// Test if this is a value type which is copied on read.
    pub fn is_value_type(&self) -> bool {
        matches!(
            self,
            Self::Bool | Self::Int | Self::Struct(..) | Self::Nullable(..)
        )
    }

    /// Get the type of the storage an address refers to, or the result of an
    /// awaited task.
    pub fn inner(&self) -> Option<&Type> {
        match self {
            Self::Ref(inner) | Self::Task(inner) | Self::Nullable(inner) | Self::Span(inner) => {
                Some(inner)
            }
            Self::Array { element, .. } => Some(element),
            _ => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unit => write!(f, "void"),
            Self::Bool => write!(f, "bool"),
            Self::Int => write!(f, "int"),
            Self::String => write!(f, "string"),
            Self::Object => write!(f, "object"),
            Self::Class(name) | Self::Struct(name) => write!(f, "{name}"),
            Self::Array { element, rank } => {
                write!(f, "{element}[")?;

                for _ in 1..*rank {
                    write!(f, ",")?;
                }

                write!(f, "]")
            }
            Self::Nullable(inner) => write!(f, "{inner}?"),
            Self::Ref(inner) => write!(f, "ref {inner}"),
            Self::Span(inner) => write!(f, "Span<{inner}>"),
            Self::Task(inner) => write!(f, "Task<{inner}>"),
            Self::ArgList => write!(f, "__arglist"),
        }
    }
}
