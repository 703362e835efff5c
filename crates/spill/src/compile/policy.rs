//! Classification of which spilling shapes each lowering mode supports.
//!
//! The policy is a static table of rejections. Adding a lowering mode means
//! adding a variant to [LoweringMode], its characteristics in
//! [LoweringMode::characteristics], and its rows in [RULES].

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

/// The mode a method is lowered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum LoweringMode {
    /// The method is rewritten into a resumable state machine. Suspension
    /// discards both the operand stack and ephemeral temporaries.
    StateMachine,
    /// The runtime suspends the activation directly, preserving its locals
    /// but not its operand stack.
    Runtime,
}

/// How a lowering mode treats storage across a suspension.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Characteristics {
    /// Values live across a suspension are kept in durable slots. Otherwise
    /// they are kept in ephemeral temporaries.
    pub(crate) durable_slots: bool,
    /// Ephemeral temporaries survive a suspension.
    pub(crate) preserves_temps: bool,
}

impl LoweringMode {
    pub(crate) fn characteristics(self) -> Characteristics {
        match self {
            LoweringMode::StateMachine => Characteristics {
                durable_slots: true,
                preserves_temps: false,
            },
            LoweringMode::Runtime => Characteristics {
                durable_slots: false,
                preserves_temps: true,
            },
        }
    }

    /// Test if ephemeral temporaries survive a suspension in this mode.
    pub fn preserves_temps(self) -> bool {
        self.characteristics().preserves_temps
    }
}

impl fmt::Display for LoweringMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoweringMode::StateMachine => f.write_str("state-machine"),
            LoweringMode::Runtime => f.write_str("runtime"),
        }
    }
}

impl FromStr for LoweringMode {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "state-machine" => Ok(LoweringMode::StateMachine),
            "runtime" => Ok(LoweringMode::Runtime),
            _ => Err(UnknownMode),
        }
    }
}

/// Error raised when parsing an unknown lowering mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownMode;

impl fmt::Display for UnknownMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Unknown lowering mode")
    }
}

impl std::error::Error for UnknownMode {}

/// A construct whose lowering requires spilling part of it across a
/// suspension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Construct {
    /// The address-determining parts of a compound assignment target.
    CompoundAssignmentTarget,
    /// The object under construction in an object initializer.
    ObjectInitializer,
    /// The collection under construction in a collection initializer.
    CollectionInitializer,
    /// A variable argument list.
    ArgList,
    /// An address passed ahead of a suspending argument.
    RefArgument,
    /// A field of a value type assigned through an address.
    StructFieldAssignment,
}

impl fmt::Display for Construct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Construct::CompoundAssignmentTarget => "a compound assignment target",
            Construct::ObjectInitializer => "an object initializer",
            Construct::CollectionInitializer => "a collection initializer",
            Construct::ArgList => "an __arglist",
            Construct::RefArgument => "a by-reference argument",
            Construct::StructFieldAssignment => "a struct field assignment target",
        };

        f.write_str(s)
    }
}

/// The result of classifying a construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Support {
    Supported,
    Unsupported(&'static str),
}

struct Rule {
    mode: LoweringMode,
    construct: Construct,
    reason: &'static str,
}

const RULES: &[Rule] = &[
    Rule {
        mode: LoweringMode::Runtime,
        construct: Construct::CompoundAssignmentTarget,
        reason: "the target address would have to be spilled",
    },
    Rule {
        mode: LoweringMode::Runtime,
        construct: Construct::ObjectInitializer,
        reason: "the partially initialized object would have to be spilled",
    },
    Rule {
        mode: LoweringMode::Runtime,
        construct: Construct::CollectionInitializer,
        reason: "the partially initialized collection would have to be spilled",
    },
    Rule {
        mode: LoweringMode::Runtime,
        construct: Construct::ArgList,
        reason: "argument lists cannot be spilled",
    },
    Rule {
        mode: LoweringMode::Runtime,
        construct: Construct::RefArgument,
        reason: "the argument address would have to be spilled",
    },
    Rule {
        mode: LoweringMode::Runtime,
        construct: Construct::StructFieldAssignment,
        reason: "the struct address would have to be spilled",
    },
];

/// Classify whether the given construct may be spilled in the given mode.
///
/// # Examples
///
/// ```
/// use spill::compile::{classify, Construct, LoweringMode, Support};
///
/// assert_eq!(classify(LoweringMode::StateMachine, Construct::ArgList), Support::Supported);
/// assert!(matches!(classify(LoweringMode::Runtime, Construct::ArgList), Support::Unsupported(..)));
/// ```
pub fn classify(mode: LoweringMode, construct: Construct) -> Support {
    for rule in RULES {
        if rule.mode == mode && rule.construct == construct {
            return Support::Unsupported(rule.reason);
        }
    }

    Support::Supported
}
