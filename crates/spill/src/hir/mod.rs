//! The bound, typed expression tree consumed by the lowering.
//!
//! Trees are produced by a front end (or by [Builder] in tests). Every node
//! carries a stable [ExprId] which later stages use to refer back to the node
//! which produced a step or operation.

mod builder;
mod ty;

pub use self::builder::Builder;
pub use self::ty::Type;

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::span::{Span, Spanned};

macro_rules! id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[repr(transparent)]
        pub struct $name(u32);

        impl $name {
            /// Construct an identifier from its raw index.
            pub const fn new(id: u32) -> Self {
                Self(id)
            }

            /// Get the raw index of the identifier.
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

id! {
    /// The identifier of an expression node, unique within a method.
    ExprId, "e"
}

id! {
    /// The identifier of a hoisted local variable.
    LocalId, "l"
}

/// A literal value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Literal {
    Unit,
    Null,
    Bool(bool),
    Int(i64),
    Str(Box<str>),
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Unit => write!(f, "()"),
            Literal::Null => write!(f, "null"),
            Literal::Bool(b) => write!(f, "{b}"),
            Literal::Int(n) => write!(f, "{n}"),
            Literal::Str(s) => write!(f, "{s:?}"),
        }
    }
}

/// A binary operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Neq,
    Lt,
    Gt,
    Lte,
    Gte,
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::BitAnd => "&",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
            BinOp::Eq => "==",
            BinOp::Neq => "!=",
            BinOp::Lt => "<",
            BinOp::Gt => ">",
            BinOp::Lte => "<=",
            BinOp::Gte => ">=",
        };

        f.write_str(s)
    }
}

/// A unary operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Not,
    BitNot,
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "!",
            UnaryOp::BitNot => "~",
        };

        f.write_str(s)
    }
}

/// A short-circuiting logical operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogicalOp {
    And,
    Or,
}

/// How an address is passed to a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RefKind {
    Ref,
    Out,
    In,
}

impl fmt::Display for RefKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefKind::Ref => f.write_str("ref"),
            RefKind::Out => f.write_str("out"),
            RefKind::In => f.write_str("in"),
        }
    }
}

/// The value category of an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueCategory {
    RValue,
    /// A hoisted local, parameter or `this` of a value type.
    Variable,
    Field,
    ArrayElement,
    Property,
    Pointer,
}

impl ValueCategory {
    /// Test if the expression denotes storage which can be assigned to.
    pub fn is_lvalue(self) -> bool {
        !matches!(self, ValueCategory::RValue)
    }
}

/// A call argument.
#[derive(Debug, Clone, PartialEq)]
pub struct Argument {
    /// The argument expression.
    pub expr: Expr,
    /// The position of the parameter this argument binds to.
    pub parameter: usize,
    /// The name used when the argument was passed by name.
    pub name: Option<Box<str>>,
}

/// A member assignment inside of an object initializer.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberInit {
    pub name: Box<str>,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Literal(Literal),
    Local(LocalId),
    Parameter(usize),
    This,
    /// A field access. Static fields have no receiver.
    Field {
        receiver: Option<Box<Expr>>,
        name: Box<str>,
    },
    /// A property or indexer access.
    Property {
        receiver: Option<Box<Expr>>,
        name: Box<str>,
        args: Vec<Expr>,
        returns_ref: bool,
    },
    Element {
        array: Box<Expr>,
        indices: Vec<Expr>,
    },
    Call {
        receiver: Option<Box<Expr>>,
        function: Box<str>,
        args: Vec<Argument>,
        returns_ref: bool,
    },
    New {
        class: Box<str>,
        args: Vec<Argument>,
    },
    ObjectInitializer {
        creation: Box<Expr>,
        members: Vec<MemberInit>,
    },
    /// Each element is the argument list of one `Add` call.
    CollectionInitializer {
        creation: Box<Expr>,
        elements: Vec<Vec<Expr>>,
    },
    /// An array creation with the given bounds, elements in row-major order.
    ArrayInitializer {
        element: Type,
        bounds: Vec<usize>,
        elements: Vec<Expr>,
    },
    StackAlloc {
        element: Type,
        elements: Vec<Expr>,
    },
    Assign {
        target: Box<Expr>,
        value: Box<Expr>,
    },
    CompoundAssign {
        target: Box<Expr>,
        op: BinOp,
        value: Box<Expr>,
        lifted: bool,
    },
    Conditional {
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Coalesce {
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// `receiver?.access`, where `access` refers to the tested receiver
    /// through [ExprKind::ConditionalReceiver].
    ConditionalAccess {
        receiver: Box<Expr>,
        access: Box<Expr>,
    },
    ConditionalReceiver,
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        lifted: bool,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        lifted: bool,
    },
    /// An address passed as a `ref`, `out` or `in` argument.
    Ref {
        kind: RefKind,
        target: Box<Expr>,
    },
    ArgList(Vec<Expr>),
    Await(Box<Expr>),
}

/// A node in the bound expression tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub id: ExprId,
    pub span: Span,
    pub ty: Type,
    pub kind: ExprKind,
}

impl Expr {
    /// Get the children of the expression in source order.
    pub fn children(&self) -> Vec<&Expr> {
        let mut out = Vec::new();

        match &self.kind {
            ExprKind::Literal(..)
            | ExprKind::Local(..)
            | ExprKind::Parameter(..)
            | ExprKind::This
            | ExprKind::ConditionalReceiver => {}
            ExprKind::Field { receiver, .. } => {
                out.extend(receiver.as_deref());
            }
            ExprKind::Property { receiver, args, .. } => {
                out.extend(receiver.as_deref());
                out.extend(args);
            }
            ExprKind::Element { array, indices } => {
                out.push(&**array);
                out.extend(indices);
            }
            ExprKind::Call { receiver, args, .. } => {
                out.extend(receiver.as_deref());
                out.extend(args.iter().map(|a| &a.expr));
            }
            ExprKind::New { args, .. } => {
                out.extend(args.iter().map(|a| &a.expr));
            }
            ExprKind::ObjectInitializer { creation, members } => {
                out.push(&**creation);
                out.extend(members.iter().map(|m| &m.value));
            }
            ExprKind::CollectionInitializer { creation, elements } => {
                out.push(&**creation);
                out.extend(elements.iter().flatten());
            }
            ExprKind::ArrayInitializer { elements, .. }
            | ExprKind::StackAlloc { elements, .. }
            | ExprKind::ArgList(elements) => {
                out.extend(elements);
            }
            ExprKind::Assign { target, value } | ExprKind::CompoundAssign { target, value, .. } => {
                out.push(&**target);
                out.push(&**value);
            }
            ExprKind::Conditional {
                condition,
                then,
                otherwise,
            } => {
                out.push(&**condition);
                out.push(&**then);
                out.push(&**otherwise);
            }
            ExprKind::Logical { lhs, rhs, .. }
            | ExprKind::Coalesce { lhs, rhs }
            | ExprKind::Binary { lhs, rhs, .. } => {
                out.push(&**lhs);
                out.push(&**rhs);
            }
            ExprKind::ConditionalAccess { receiver, access } => {
                out.push(&**receiver);
                out.push(&**access);
            }
            ExprKind::Unary { operand, .. } => out.push(&**operand),
            ExprKind::Ref { target, .. } => out.push(&**target),
            ExprKind::Await(operand) => out.push(&**operand),
        }

        out
    }

    /// Get the value category of the expression.
    pub fn category(&self) -> ValueCategory {
        match &self.kind {
            ExprKind::Local(..) | ExprKind::Parameter(..) => ValueCategory::Variable,
            ExprKind::This if self.ty.is_value_type() => ValueCategory::Variable,
            ExprKind::Field { .. } => ValueCategory::Field,
            ExprKind::Element { .. } => ValueCategory::ArrayElement,
            ExprKind::Property {
                returns_ref: true, ..
            }
            | ExprKind::Call {
                returns_ref: true, ..
            } => ValueCategory::Pointer,
            ExprKind::Property { .. } => ValueCategory::Property,
            _ => ValueCategory::RValue,
        }
    }

    /// Get a short description of the node kind, used in traces.
    pub fn describe(&self) -> &'static str {
        match &self.kind {
            ExprKind::Literal(..) => "literal",
            ExprKind::Local(..) => "local",
            ExprKind::Parameter(..) => "parameter",
            ExprKind::This => "this",
            ExprKind::Field { .. } => "field",
            ExprKind::Property { .. } => "property",
            ExprKind::Element { .. } => "element",
            ExprKind::Call { .. } => "call",
            ExprKind::New { .. } => "new",
            ExprKind::ObjectInitializer { .. } => "object initializer",
            ExprKind::CollectionInitializer { .. } => "collection initializer",
            ExprKind::ArrayInitializer { .. } => "array initializer",
            ExprKind::StackAlloc { .. } => "stackalloc",
            ExprKind::Assign { .. } => "assign",
            ExprKind::CompoundAssign { .. } => "compound assign",
            ExprKind::Conditional { .. } => "conditional",
            ExprKind::Logical { .. } => "logical",
            ExprKind::Coalesce { .. } => "coalesce",
            ExprKind::ConditionalAccess { .. } => "conditional access",
            ExprKind::ConditionalReceiver => "conditional receiver",
            ExprKind::Unary { .. } => "unary",
            ExprKind::Binary { .. } => "binary",
            ExprKind::Ref { .. } => "ref",
            ExprKind::ArgList(..) => "arglist",
            ExprKind::Await(..) => "await",
        }
    }
}

impl Spanned for Expr {
    #[inline]
    fn span(&self) -> Span {
        self.span
    }
}

/// A statement in a method body.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// An expression evaluated for its effects. Its result is discarded.
    Expr(Expr),
    /// Initialize a hoisted local.
    Local { local: LocalId, init: Option<Expr> },
    /// Return a value from the method. Methods without a result return
    /// unit.
    Return(Expr),
}

/// A declared parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: Box<str>,
    pub ty: Type,
}

/// A declared local.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalDecl {
    pub id: LocalId,
    pub name: Box<str>,
    pub ty: Type,
}

/// A method body to be lowered.
#[derive(Debug, Clone, PartialEq)]
pub struct Method {
    pub name: Box<str>,
    pub span: Span,
    /// The type of `this`, if the method is an instance method.
    pub this: Option<Type>,
    pub params: Vec<Param>,
    pub locals: Vec<LocalDecl>,
    pub body: Vec<Stmt>,
}

impl Method {
    /// Look up a declared local.
    pub fn local(&self, id: LocalId) -> Option<&LocalDecl> {
        self.locals.iter().find(|l| l.id == id)
    }
}
