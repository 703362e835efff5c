use tracing::trace;

use crate::compile::alloc::{Allocation, Storage};
use crate::compile::ops::{Fragment, Operation};
use crate::compile::plan::Plan;
use crate::compile::step::{Step, StepKind};
use crate::compile::{Error, Result};
use crate::span::Span;

/// The emitted operations of a method.
pub(crate) struct Emitted {
    pub(crate) instructions: Vec<(Operation, Span)>,
    pub(crate) states: usize,
}

/// Emit the operation sequence for a plan.
///
/// Steps are emitted in plan order. Operands which don't live on the stack
/// are loaded right before the step which consumes them, in the position
/// they would have had on the stack.
pub(crate) fn emit(plan: &Plan, allocation: &Allocation) -> Result<Emitted> {
    let mut out = Vec::new();
    let mut states = 0;

    for (index, step) in plan.steps.iter().enumerate() {
        let storage = allocation.storage[index];

        if let Storage::Rematerialize = storage {
            continue;
        }

        for operand in &step.operands {
            load(&mut out, &plan.steps[operand.index()], allocation.storage[operand.index()], step)?;
        }

        match &step.kind {
            StepKind::Eval(fragment) => {
                out.push((
                    Operation::Evaluate {
                        fragment: fragment.clone(),
                        source: step.source,
                    },
                    step.span,
                ));
            }
            StepKind::Suspend => {
                let state = states;
                states += 1;

                out.push((
                    Operation::EnterSuspension {
                        awaited: step.source,
                        state,
                    },
                    step.span,
                ));

                out.push((Operation::ResumeFromSuspension { state }, step.span));
            }
            StepKind::Join => {}
        }

        for slot in &allocation.releases[index] {
            out.push((Operation::ReleaseSlot(*slot), step.span));
        }

        match storage {
            Storage::None | Storage::Stack | Storage::Rematerialize => {}
            Storage::Discard => {
                out.push((evaluate(step, Fragment::Pop), step.span));
            }
            Storage::Slot(slot) => {
                trace!(%slot, %step, "store");
                out.push((Operation::StoreToSlot(slot), step.span));
            }
            Storage::Temp(temp) => {
                out.push((evaluate(step, Fragment::StoreTemp(temp)), step.span));
            }
        }
    }

    Ok(Emitted {
        instructions: out,
        states,
    })
}

fn evaluate(step: &Step, fragment: Fragment) -> Operation {
    Operation::Evaluate {
        fragment,
        source: step.source,
    }
}

fn load(
    out: &mut Vec<(Operation, Span)>,
    operand: &Step,
    storage: Storage,
    user: &Step,
) -> Result<()> {
    match storage {
        Storage::Stack => {}
        Storage::Slot(slot) => {
            out.push((Operation::LoadFromSlot(slot), user.span));
        }
        Storage::Temp(temp) => {
            out.push((evaluate(operand, Fragment::LoadTemp(temp)), user.span));
        }
        Storage::Rematerialize => {
            let StepKind::Eval(fragment) = &operand.kind else {
                return Err(Error::internal(operand, "only fragments can be rematerialized"));
            };

            out.push((evaluate(operand, fragment.clone()), operand.span));
        }
        Storage::None | Storage::Discard => {
            return Err(Error::internal(user, "operand has no storage"));
        }
    }

    Ok(())
}
