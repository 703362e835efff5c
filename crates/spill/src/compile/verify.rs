//! Self-check of an emitted operation sequence.
//!
//! Every path through the sequence is checked for:
//! * slots being stored before they are loaded,
//! * temporaries not being read after a suspension discarded them,
//! * the operand stack holding exactly the awaitable when suspending,
//! * consistent stack depths where control flow joins.

use hashbrown::HashMap;

use crate::compile::ops::{Fragment, Label, Operation};
use crate::compile::{Error, Lowered, Result};
use crate::span::Span;

#[derive(Debug, Clone, PartialEq, Eq)]
struct State {
    depth: usize,
    slots: Vec<bool>,
    temps: Vec<bool>,
}

impl State {
    /// Merge a state flowing into a label.
    fn merge(&mut self, other: &State, span: Span, label: Label) -> Result<()> {
        if self.depth != other.depth {
            return Err(Error::internal(
                span,
                format_args!(
                    "stack depth {} and {} disagree at {label}",
                    self.depth, other.depth
                ),
            ));
        }

        for (a, b) in self.slots.iter_mut().zip(&other.slots) {
            *a &= *b;
        }

        for (a, b) in self.temps.iter_mut().zip(&other.temps) {
            *a &= *b;
        }

        Ok(())
    }

    fn pop(&mut self, count: usize, span: Span) -> Result<()> {
        let Some(depth) = self.depth.checked_sub(count) else {
            return Err(Error::internal(span, "operand stack underflow"));
        };

        self.depth = depth;
        Ok(())
    }
}

/// Verify a lowered method.
pub(crate) fn verify(lowered: &Lowered) -> Result<()> {
    for slot in lowered.slots() {
        if slot.ty.is_address() || slot.ty.is_stack_scoped() {
            return Err(Error::internal(
                Span::empty(),
                format_args!("slot {} holds a value of type `{}`", slot.id, slot.ty),
            ));
        }
    }

    let preserves_temps = lowered.mode().preserves_temps();

    let empty = State {
        depth: 0,
        slots: vec![false; lowered.slots().len()],
        temps: vec![false; lowered.temps()],
    };

    let mut state = empty.clone();
    let mut live = true;
    let mut pending = HashMap::<Label, State>::new();

    for (op, span) in lowered.instructions() {
        let span = *span;

        if let Operation::Evaluate {
            fragment: Fragment::Label(label),
            ..
        } = op
        {
            match (live, pending.remove(label)) {
                (true, Some(incoming)) => state.merge(&incoming, span, *label)?,
                (false, Some(incoming)) => state = incoming,
                (false, None) => state = empty.clone(),
                (true, None) => {}
            }

            live = true;
            continue;
        }

        match op {
            Operation::StoreToSlot(slot) => {
                state.pop(1, span)?;
                set(&mut state.slots, slot.index(), true, span)?;
            }
            Operation::LoadFromSlot(slot) => {
                if !get(&state.slots, slot.index(), span)? {
                    return Err(Error::internal(
                        span,
                        format_args!("slot {slot} is loaded before it is stored"),
                    ));
                }

                state.depth += 1;
            }
            Operation::ReleaseSlot(slot) => {
                set(&mut state.slots, slot.index(), false, span)?;
            }
            Operation::EnterSuspension { state: n, .. } => {
                if state.depth != 1 {
                    return Err(Error::internal(
                        span,
                        format_args!(
                            "{} values on the operand stack at suspension {n}",
                            state.depth
                        ),
                    ));
                }

                state.depth = 0;

                if !preserves_temps {
                    state.temps.iter_mut().for_each(|t| *t = false);
                }
            }
            Operation::ResumeFromSuspension { .. } => {
                state.depth += 1;
            }
            Operation::Evaluate { fragment, .. } => {
                match fragment {
                    Fragment::LoadTemp(temp) => {
                        if !get(&state.temps, temp.index(), span)? {
                            return Err(Error::internal(
                                span,
                                format_args!("temp {temp} is read when it is not valid"),
                            ));
                        }
                    }
                    Fragment::StoreTemp(temp) => {
                        set(&mut state.temps, temp.index(), true, span)?;
                    }
                    _ => {}
                }

                let (pops, pushes) = fragment.stack_effect();
                state.pop(pops, span)?;

                match fragment {
                    Fragment::Jump { label, carry } => {
                        let mut out = state.clone();
                        out.depth += usize::from(*carry);
                        flow(&mut pending, *label, out, span)?;
                        live = false;
                    }
                    Fragment::JumpIf { label, .. } | Fragment::JumpIfNull { label, .. } => {
                        flow(&mut pending, *label, state.clone(), span)?;
                    }
                    Fragment::Return => {
                        live = false;
                    }
                    _ => {}
                }

                state.depth += pushes;
            }
        }
    }

    Ok(())
}

fn flow(pending: &mut HashMap<Label, State>, label: Label, state: State, span: Span) -> Result<()> {
    match pending.get_mut(&label) {
        Some(existing) => existing.merge(&state, span, label),
        None => {
            pending.insert(label, state);
            Ok(())
        }
    }
}

fn get(bits: &[bool], index: usize, span: Span) -> Result<bool> {
    match bits.get(index) {
        Some(bit) => Ok(*bit),
        None => Err(Error::internal(span, format_args!("undeclared storage {index}"))),
    }
}

fn set(bits: &mut [bool], index: usize, value: bool, span: Span) -> Result<()> {
    match bits.get_mut(index) {
        Some(bit) => {
            *bit = value;
            Ok(())
        }
        None => Err(Error::internal(span, format_args!("undeclared storage {index}"))),
    }
}
