//! Lowering of method bodies containing suspensions.
//!
//! Lowering runs in stages:
//! * [Suspensions::locate] marks every expression which contains an `await`.
//! * The planner linearizes the body into evaluation steps in source
//!   evaluation order, consulting the lowering policy through [classify].
//! * The allocator decides where each value lives, spilling values which are
//!   live across a suspension into slots of the state record.
//! * The emitter produces the final [Operation] sequence, which is verified
//!   before it is handed out.

mod alloc;
mod emit;
mod error;
mod locate;
mod ops;
mod options;
mod plan;
mod policy;
mod slots;
mod step;
mod verify;


pub use self::error::{Error, ErrorKind, Result};
pub use self::locate::Suspensions;
pub use self::ops::{Fragment, Label, Operation, SlotId, TempId};
pub use self::options::{Options, ParseOptionError};
pub use self::policy::{classify, Construct, LoweringMode, Support, UnknownMode};

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::diagnostics::Diagnostics;
use crate::hir::{Method, Type};
use crate::span::Span;

/// A durable slot requested in the state record of a lowered method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotDecl {
    pub id: SlotId,
    pub ty: Type,
    /// The stable name of the field backing the slot.
    pub name: Box<str>,
}

impl SlotDecl {
    pub(crate) fn new(id: SlotId, ty: Type) -> Self {
        let name = format!("<>s__{}", id.index()).into();
        Self { id, ty, name }
    }
}

/// A lowered method, ready to be handed to the state machine transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lowered {
    name: Box<str>,
    mode: LoweringMode,
    slots: Vec<SlotDecl>,
    temps: usize,
    states: usize,
    instructions: Vec<(Operation, Span)>,
}

impl Lowered {
    /// The name of the lowered method.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The mode the method was lowered in.
    pub fn mode(&self) -> LoweringMode {
        self.mode
    }

    /// The durable slots requested by the method.
    pub fn slots(&self) -> &[SlotDecl] {
        &self.slots
    }

    /// The number of ephemeral temporaries used by the method.
    pub fn temps(&self) -> usize {
        self.temps
    }

    /// The number of suspension states in the method.
    pub fn states(&self) -> usize {
        self.states
    }

    /// The emitted operations.
    pub fn operations(&self) -> impl Iterator<Item = &Operation> + '_ {
        self.instructions.iter().map(|(op, _)| op)
    }

    /// The emitted operations with the spans they originate from.
    pub fn instructions(&self) -> &[(Operation, Span)] {
        &self.instructions
    }
}

impl fmt::Display for Lowered {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} ({}):", self.name, self.mode)?;

        for slot in &self.slots {
            writeln!(f, "  {}: {} {}", slot.id, slot.ty, slot.name)?;
        }

        if self.temps > 0 {
            writeln!(f, "  temps: {}", self.temps)?;
        }

        for (n, (op, span)) in self.instructions.iter().enumerate() {
            writeln!(f, "  {n:04} {op} ({span})")?;
        }

        Ok(())
    }
}

/// Lower a single method.
///
/// # Examples
///
/// ```
/// use spill::compile::{self, Operation, Options};
/// use spill::hir::{Builder, Type};
///
/// let b = Builder::new("M");
/// let c = b.declare("c", Type::Int);
/// let f = b.call("F", vec![b.int(2)], Type::task(Type::Int));
/// let body = vec![b.stmt(b.assign(b.local(c), b.add(b.local(c), b.await_(f))))];
/// let method = b.finish(body);
///
/// let lowered = compile::lower(&method, &Options::default())?;
/// assert_eq!(lowered.states(), 1);
/// assert!(lowered.operations().any(|op| matches!(op, Operation::StoreToSlot(..))));
/// # Ok::<_, spill::compile::Error>(())
/// ```
#[tracing::instrument(skip_all, fields(method = &*method.name, mode = %options.mode))]
pub fn lower(method: &Method, options: &Options) -> Result<Lowered> {
    let suspensions = Suspensions::locate(method);
    let mut plan = plan::plan(method, options, &suspensions)?;
    let allocation = alloc::allocate(&mut plan, method, options)?;
    let emitted = emit::emit(&plan, &allocation)?;

    let lowered = Lowered {
        name: method.name.clone(),
        mode: options.mode,
        slots: allocation.slots,
        temps: allocation.temps,
        states: emitted.states,
        instructions: emitted.instructions,
    };

    if options.verify {
        verify::verify(&lowered)?;
    }

    tracing::debug!(
        slots = lowered.slots.len(),
        temps = lowered.temps,
        states = lowered.states,
        "lowered"
    );

    Ok(lowered)
}

/// Lower a collection of independent methods.
///
/// A method which fails to lower is reported to `diagnostics` and skipped,
/// the remaining methods are still lowered.
pub fn lower_all(methods: &[Method], options: &Options, diagnostics: &mut Diagnostics) -> Vec<Lowered> {
    let mut lowered = Vec::with_capacity(methods.len());

    for method in methods {
        match lower(method, options) {
            Ok(output) => lowered.push(output),
            Err(error) => diagnostics.error(&method.name, error),
        }
    }

    lowered
}
