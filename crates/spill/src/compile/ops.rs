//! The operations emitted by the lowering.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::hir::{BinOp, ExprId, Literal, LocalId, Type, UnaryOp};

macro_rules! id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[repr(transparent)]
        pub struct $name(pub(crate) u32);

        impl $name {
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
    /// A durable slot in the state record of the method.
    SlotId, "s"
}

id! {
    /// An ephemeral temporary of the activation.
    TempId, "t"
}

id! {
    /// A jump label.
    Label, "L"
}

/// A piece of a source expression evaluated on the operand stack.
///
/// The documented stack effect lists the operands popped, in push order, and
/// the value pushed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Fragment {
    /// `-- value`
    Push(Literal),
    /// `-- value`
    LoadLocal(LocalId),
    /// `value -- value?`
    StoreLocal { local: LocalId, keep: bool },
    /// `-- value`
    LoadParam(usize),
    /// `value -- value?`
    StoreParam { param: usize, keep: bool },
    /// `-- this`
    LoadThis,
    /// `-- value`
    LoadStatic(Box<str>),
    /// `value -- value?`
    StoreStatic { name: Box<str>, keep: bool },
    /// `receiver -- value`
    LoadField(Box<str>),
    /// `receiver value -- value?`
    StoreField { name: Box<str>, keep: bool },
    /// `array index.. -- value`
    LoadElement { rank: usize },
    /// `array index.. value -- value?`
    StoreElement { rank: usize, keep: bool },
    /// `receiver? arg.. -- value`
    GetProperty {
        name: Box<str>,
        argc: usize,
        receiver: bool,
        returns_ref: bool,
    },
    /// `receiver? arg.. value -- value?`
    SetProperty {
        name: Box<str>,
        argc: usize,
        receiver: bool,
        keep: bool,
    },
    /// `-- address`
    AddressOfLocal(LocalId),
    /// `-- address`
    AddressOfParam(usize),
    /// `-- address`
    AddressOfThis,
    /// `-- address`
    AddressOfStatic(Box<str>),
    /// `array index.. -- address`
    AddressOfElement { rank: usize },
    /// `receiver -- address`
    AddressOfField(Box<str>),
    /// `address -- address`
    AddressOfFieldIndirect(Box<str>),
    /// `address -- value`
    LoadIndirect,
    /// `address value -- value?`
    StoreIndirect { keep: bool },
    /// `receiver? arg.. -- value?`
    Call {
        function: Box<str>,
        argc: usize,
        receiver: bool,
        returns_ref: bool,
        returns_value: bool,
    },
    /// `arg.. -- object`
    NewObject { class: Box<str>, argc: usize },
    /// `element.. -- array`
    NewArray { element: Type, bounds: Vec<usize> },
    /// `element.. -- span`
    StackAlloc { element: Type, count: usize },
    /// `item.. -- arglist`
    MakeArgList { count: usize },
    /// `value -- value`
    Unary { op: UnaryOp, lifted: bool },
    /// `lhs rhs -- value`
    Binary { op: BinOp, lifted: bool },
    /// `value --`
    Pop,
    Label(Label),
    /// `value? --`, where the value is carried to the target.
    Jump { label: Label, carry: bool },
    /// `condition --`
    JumpIf { label: Label, when: bool },
    /// `value --`
    JumpIfNull { label: Label, when: bool },
    /// `value --`
    StoreTemp(TempId),
    /// `-- value`
    LoadTemp(TempId),
    /// `value --`
    Return,
}

impl Fragment {
    /// The number of values popped and pushed by the fragment.
    pub fn stack_effect(&self) -> (usize, usize) {
        match self {
            Fragment::Push(..)
            | Fragment::LoadLocal(..)
            | Fragment::LoadParam(..)
            | Fragment::LoadThis
            | Fragment::LoadStatic(..)
            | Fragment::AddressOfLocal(..)
            | Fragment::AddressOfParam(..)
            | Fragment::AddressOfThis
            | Fragment::AddressOfStatic(..)
            | Fragment::LoadTemp(..) => (0, 1),
            Fragment::StoreLocal { keep, .. }
            | Fragment::StoreParam { keep, .. }
            | Fragment::StoreStatic { keep, .. } => (1, usize::from(*keep)),
            Fragment::LoadField(..)
            | Fragment::AddressOfField(..)
            | Fragment::AddressOfFieldIndirect(..)
            | Fragment::LoadIndirect
            | Fragment::Unary { .. } => (1, 1),
            Fragment::StoreField { keep, .. } | Fragment::StoreIndirect { keep } => {
                (2, usize::from(*keep))
            }
            Fragment::LoadElement { rank } | Fragment::AddressOfElement { rank } => (rank + 1, 1),
            Fragment::StoreElement { rank, keep } => (rank + 2, usize::from(*keep)),
            Fragment::GetProperty { argc, receiver, .. } => (argc + usize::from(*receiver), 1),
            Fragment::SetProperty {
                argc,
                receiver,
                keep,
                ..
            } => (argc + usize::from(*receiver) + 1, usize::from(*keep)),
            Fragment::Call {
                argc,
                receiver,
                returns_value,
                ..
            } => (argc + usize::from(*receiver), usize::from(*returns_value)),
            Fragment::NewObject { argc, .. } => (*argc, 1),
            Fragment::NewArray { bounds, .. } => (bounds.iter().product(), 1),
            Fragment::StackAlloc { count, .. } | Fragment::MakeArgList { count } => (*count, 1),
            Fragment::Binary { .. } => (2, 1),
            Fragment::Pop
            | Fragment::Return
            | Fragment::JumpIf { .. }
            | Fragment::JumpIfNull { .. }
            | Fragment::StoreTemp(..) => (1, 0),
            Fragment::Label(..) => (0, 0),
            Fragment::Jump { carry, .. } => (usize::from(*carry), 0),
        }
    }

    /// Test if the fragment can be evaluated again in place of a spill,
    /// producing the same value without side effects.
    pub(crate) fn is_rematerializable(&self, this: Option<&Type>) -> bool {
        match self {
            Fragment::Push(..)
            | Fragment::AddressOfLocal(..)
            | Fragment::AddressOfParam(..)
            | Fragment::AddressOfThis
            | Fragment::AddressOfStatic(..) => true,
            Fragment::LoadThis => this.is_some_and(|ty| !ty.is_value_type()),
            _ => false,
        }
    }

    /// Get the label targeted by a branch.
    pub(crate) fn target(&self) -> Option<Label> {
        match self {
            Fragment::Jump { label, .. }
            | Fragment::JumpIf { label, .. }
            | Fragment::JumpIfNull { label, .. } => Some(*label),
            _ => None,
        }
    }
}

impl fmt::Display for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keep = |keep: &bool| if *keep { " keep" } else { "" };

        match self {
            Fragment::Push(lit) => write!(f, "push {lit}"),
            Fragment::LoadLocal(local) => write!(f, "load-local {local}"),
            Fragment::StoreLocal { local, keep: k } => write!(f, "store-local {local}{}", keep(k)),
            Fragment::LoadParam(param) => write!(f, "load-param {param}"),
            Fragment::StoreParam { param, keep: k } => write!(f, "store-param {param}{}", keep(k)),
            Fragment::LoadThis => write!(f, "load-this"),
            Fragment::LoadStatic(name) => write!(f, "load-static {name}"),
            Fragment::StoreStatic { name, keep: k } => write!(f, "store-static {name}{}", keep(k)),
            Fragment::LoadField(name) => write!(f, "load-field {name}"),
            Fragment::StoreField { name, keep: k } => write!(f, "store-field {name}{}", keep(k)),
            Fragment::LoadElement { rank } => write!(f, "load-element {rank}"),
            Fragment::StoreElement { rank, keep: k } => {
                write!(f, "store-element {rank}{}", keep(k))
            }
            Fragment::GetProperty {
                name,
                argc,
                receiver,
                returns_ref,
            } => {
                write!(f, "get-property {name} {argc}")?;

                if *receiver {
                    write!(f, " receiver")?;
                }

                if *returns_ref {
                    write!(f, " ref")?;
                }

                Ok(())
            }
            Fragment::SetProperty {
                name,
                argc,
                receiver,
                keep: k,
            } => {
                write!(f, "set-property {name} {argc}")?;

                if *receiver {
                    write!(f, " receiver")?;
                }

                write!(f, "{}", keep(k))
            }
            Fragment::AddressOfLocal(local) => write!(f, "address-local {local}"),
            Fragment::AddressOfParam(param) => write!(f, "address-param {param}"),
            Fragment::AddressOfThis => write!(f, "address-this"),
            Fragment::AddressOfStatic(name) => write!(f, "address-static {name}"),
            Fragment::AddressOfElement { rank } => write!(f, "address-element {rank}"),
            Fragment::AddressOfField(name) => write!(f, "address-field {name}"),
            Fragment::AddressOfFieldIndirect(name) => write!(f, "address-field-indirect {name}"),
            Fragment::LoadIndirect => write!(f, "load-indirect"),
            Fragment::StoreIndirect { keep: k } => write!(f, "store-indirect{}", keep(k)),
            Fragment::Call {
                function,
                argc,
                receiver,
                returns_ref,
                ..
            } => {
                write!(f, "call {function} {argc}")?;

                if *receiver {
                    write!(f, " receiver")?;
                }

                if *returns_ref {
                    write!(f, " ref")?;
                }

                Ok(())
            }
            Fragment::NewObject { class, argc } => write!(f, "new {class} {argc}"),
            Fragment::NewArray { element, bounds } => {
                write!(f, "new-array {element}")?;

                for bound in bounds {
                    write!(f, " {bound}")?;
                }

                Ok(())
            }
            Fragment::StackAlloc { element, count } => write!(f, "stackalloc {element} {count}"),
            Fragment::MakeArgList { count } => write!(f, "arglist {count}"),
            Fragment::Unary { op, lifted } => {
                write!(f, "unary {op}{}", if *lifted { " lifted" } else { "" })
            }
            Fragment::Binary { op, lifted } => {
                write!(f, "binary {op}{}", if *lifted { " lifted" } else { "" })
            }
            Fragment::Pop => write!(f, "pop"),
            Fragment::Label(label) => write!(f, "{label}:"),
            Fragment::Jump { label, carry } => {
                write!(f, "jump {label}{}", if *carry { " carry" } else { "" })
            }
            Fragment::JumpIf { label, when } => write!(f, "jump-if {when} {label}"),
            Fragment::JumpIfNull { label, when } => {
                if *when {
                    write!(f, "jump-if-null {label}")
                } else {
                    write!(f, "jump-if-not-null {label}")
                }
            }
            Fragment::StoreTemp(temp) => write!(f, "store-temp {temp}"),
            Fragment::LoadTemp(temp) => write!(f, "load-temp {temp}"),
            Fragment::Return => write!(f, "return"),
        }
    }
}

/// An operation in the lowered sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Evaluate a fragment of the expression with the given id.
    Evaluate { fragment: Fragment, source: ExprId },
    StoreToSlot(SlotId),
    LoadFromSlot(SlotId),
    /// Suspend on the awaitable on top of the stack. The operand stack is
    /// lost across the suspension.
    EnterSuspension { awaited: ExprId, state: usize },
    /// The point where the suspension with the given state resumes, with
    /// the result of the awaited operation pushed.
    ResumeFromSuspension { state: usize },
    /// Clear a slot whose live range has ended.
    ReleaseSlot(SlotId),
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Evaluate { fragment, source } => write!(f, "{fragment} ; {source}"),
            Operation::StoreToSlot(slot) => write!(f, "store-slot {slot}"),
            Operation::LoadFromSlot(slot) => write!(f, "load-slot {slot}"),
            Operation::EnterSuspension { awaited, state } => {
                write!(f, "suspend {state} ; {awaited}")
            }
            Operation::ResumeFromSuspension { state } => write!(f, "resume {state}"),
            Operation::ReleaseSlot(slot) => write!(f, "release-slot {slot}"),
        }
    }
}
