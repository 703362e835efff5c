//! Decide where every planned value lives between its definition and uses.

use hashbrown::HashMap;
use tracing::debug;

use crate::compile::ops::{Fragment, Label, SlotId, TempId};
use crate::compile::plan::Plan;
use crate::compile::slots::{SlotPools, TempPool};
use crate::compile::step::{Step, StepId, StepKind};
use crate::compile::{Error, ErrorKind, Options, Result, SlotDecl};
use crate::hir::{Method, Type};
use crate::span::Span;

/// Where a value produced by a step is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Storage {
    /// The step produces no value.
    None,
    /// The value is never used, and is popped once produced.
    Discard,
    /// The value stays on the operand stack until consumed.
    Stack,
    /// The value is evaluated again at every use.
    Rematerialize,
    Slot(SlotId),
    Temp(TempId),
}

/// The storage decisions for a plan.
#[derive(Debug)]
pub(crate) struct Allocation {
    pub(crate) storage: Vec<Storage>,
    pub(crate) slots: Vec<SlotDecl>,
    pub(crate) temps: usize,
    /// Slots released right after the step at the given index.
    pub(crate) releases: Vec<Vec<SlotId>>,
}

/// The storage class of a value before slots and temps are numbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Class {
    None,
    Discard,
    Stack,
    Rematerialize,
    Spill,
    Temp,
}

/// Allocate storage for every value in the plan, annotating the steps with
/// their spill decisions.
pub(crate) fn allocate(plan: &mut Plan, method: &Method, options: &Options) -> Result<Allocation> {
    let graph = Graph::new(&plan.steps)?;
    let characteristics = options.mode.characteristics();

    let mut class = Vec::with_capacity(plan.steps.len());

    for (index, step) in plan.steps.iter_mut().enumerate() {
        step.precedes_suspension = graph.precedes_suspension(index);

        let Some(ty) = &step.produces else {
            class.push(Class::None);
            continue;
        };

        let uses = &graph.uses[index];

        if uses.is_empty() {
            class.push(Class::Discard);
            continue;
        }

        let crossing = uses.iter().find_map(|&u| graph.crossing(index, u));
        let remat = matches!(&step.kind, StepKind::Eval(f) if f.is_rematerializable(method.this.as_ref()));

        let c = if let Some(suspension) = crossing {
            if remat {
                Class::Rematerialize
            } else if ty.is_stack_scoped() {
                let span = graph.spans[suspension];

                return Err(Error::new(
                    span,
                    ErrorKind::UnpreservableStackScopedStorage { ty: ty.clone() },
                ));
            } else if ty.is_address() {
                return Err(Error::new(
                    step.span,
                    ErrorKind::UnpreservableReference {
                        origin: step.origin(),
                    },
                ));
            } else {
                step.must_spill = true;

                if characteristics.durable_slots {
                    Class::Spill
                } else {
                    Class::Temp
                }
            }
        } else if uses.len() > 1 {
            if remat {
                Class::Rematerialize
            } else {
                Class::Temp
            }
        } else {
            Class::Stack
        };

        debug!(step = %StepId::new(index), %step, ?c, "storage");
        class.push(c);
    }

    while let Some(demoted) = simulate(&plan.steps, &class)? {
        for index in demoted {
            debug!(step = %StepId::new(index), "demoted to temp");
            class[index] = Class::Temp;
        }
    }

    assign(&plan.steps, &graph, &class, options)
}

/// Control flow and use information for a plan.
struct Graph {
    uses: Vec<Vec<usize>>,
    spans: Vec<Span>,
    suspensions: Vec<usize>,
    reach: Reach,
}

impl Graph {
    fn new(steps: &[Step]) -> Result<Self> {
        let mut uses = vec![Vec::new(); steps.len()];
        let mut labels = HashMap::new();
        let mut suspensions = Vec::new();

        for (index, step) in steps.iter().enumerate() {
            for operand in &step.operands {
                let Some(u) = uses.get_mut(operand.index()) else {
                    return Err(Error::internal(step, "operand refers to a missing step"));
                };

                if operand.index() >= index {
                    return Err(Error::internal(step, "operand is produced after its use"));
                }

                u.push(index);
            }

            match &step.kind {
                StepKind::Eval(Fragment::Label(label)) => {
                    labels.insert(*label, index);
                }
                StepKind::Suspend => {
                    suspensions.push(index);
                }
                _ => {}
            }
        }

        let mut reach = Reach::new(steps.len());

        for (index, step) in steps.iter().enumerate().rev() {
            reach.set(index, index);

            for successor in successors(index, step, steps.len(), &labels)? {
                if successor <= index {
                    return Err(Error::internal(step, "backward jump in expression"));
                }

                reach.union(index, successor);
            }
        }

        Ok(Self {
            uses,
            spans: steps.iter().map(|s| s.span).collect(),
            suspensions,
            reach,
        })
    }

    /// Find a suspension on some path from the definition of a value to one
    /// of its uses.
    fn crossing(&self, def: usize, use_: usize) -> Option<usize> {
        self.suspensions.iter().copied().find(|&s| {
            s != def && s != use_ && self.reach.get(def, s) && self.reach.get(s, use_)
        })
    }

    fn precedes_suspension(&self, index: usize) -> bool {
        self.suspensions
            .iter()
            .any(|&s| s != index && self.reach.get(index, s))
    }
}

fn successors(
    index: usize,
    step: &Step,
    len: usize,
    labels: &HashMap<Label, usize>,
) -> Result<Vec<usize>> {
    let next = index + 1;
    let fallthrough = (next < len).then_some(next);

    let StepKind::Eval(fragment) = &step.kind else {
        return Ok(fallthrough.into_iter().collect());
    };

    if let Fragment::Return = fragment {
        return Ok(Vec::new());
    }

    let Some(label) = fragment.target() else {
        return Ok(fallthrough.into_iter().collect());
    };

    let Some(&target) = labels.get(&label) else {
        return Err(Error::internal(step, format_args!("missing label {label}")));
    };

    if let Fragment::Jump { .. } = fragment {
        return Ok(vec![target]);
    }

    let mut out = Vec::with_capacity(2);
    out.extend(fallthrough);
    out.push(target);
    Ok(out)
}

/// Reachability between steps, as a bit matrix.
struct Reach {
    words: usize,
    bits: Vec<u64>,
}

impl Reach {
    fn new(len: usize) -> Self {
        let words = (len + 63) / 64;

        Self {
            words,
            bits: vec![0; words * len],
        }
    }

    fn set(&mut self, from: usize, to: usize) {
        self.bits[from * self.words + to / 64] |= 1 << (to % 64);
    }

    fn get(&self, from: usize, to: usize) -> bool {
        self.bits[from * self.words + to / 64] & (1 << (to % 64)) != 0
    }

    /// Everything reachable from `other` is reachable from `index`.
    fn union(&mut self, index: usize, other: usize) {
        for n in 0..self.words {
            let bits = self.bits[other * self.words + n];
            self.bits[index * self.words + n] |= bits;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Entry {
    Value(usize),
    /// A value carried into a join by the jumps which target it.
    Carried,
}

/// Simulate the operand stack, returning the values which have to be moved
/// off the stack because their consumer can't find them in operand order.
fn simulate(steps: &[Step], class: &[Class]) -> Result<Option<Vec<usize>>> {
    let mut stack = Vec::<Entry>::new();
    let mut states = HashMap::<Label, Vec<Entry>>::new();
    let mut live = true;

    for (index, step) in steps.iter().enumerate() {
        if let StepKind::Eval(Fragment::Label(label)) = &step.kind {
            match (live, states.remove(label)) {
                (true, Some(state)) => {
                    if state != stack {
                        return Err(Error::internal(step, format_args!("inconsistent stack at {label}")));
                    }
                }
                (false, Some(state)) => stack = state,
                (false, None) => stack.clear(),
                (true, None) => {}
            }

            live = true;
            continue;
        }

        if let Some(demoted) = demotions(&stack, &step.operands, class) {
            return Ok(Some(demoted));
        }

        let popped = step
            .operands
            .iter()
            .filter(|o| class[o.index()] == Class::Stack)
            .count();

        let Some(len) = stack.len().checked_sub(popped) else {
            return Err(Error::internal(step, "operand stack underflow"));
        };

        stack.truncate(len);

        match &step.kind {
            StepKind::Suspend => {
                if !stack.is_empty() {
                    return Err(Error::internal(step, "value left on the stack across a suspension"));
                }
            }
            StepKind::Join => {
                if stack.pop() != Some(Entry::Carried) {
                    return Err(Error::internal(step, "join without a carried value"));
                }
            }
            StepKind::Eval(Fragment::Jump { label, carry }) => {
                let mut state = stack.clone();

                if *carry {
                    state.push(Entry::Carried);
                }

                record(&mut states, *label, state, step)?;
                stack.clear();
                live = false;
            }
            StepKind::Eval(Fragment::JumpIf { label, .. } | Fragment::JumpIfNull { label, .. }) => {
                record(&mut states, *label, stack.clone(), step)?;
            }
            StepKind::Eval(Fragment::Return) => {
                stack.clear();
                live = false;
            }
            StepKind::Eval(..) => {}
        }

        if class[index] == Class::Stack {
            stack.push(Entry::Value(index));
        }
    }

    Ok(None)
}

fn record(
    states: &mut HashMap<Label, Vec<Entry>>,
    label: Label,
    state: Vec<Entry>,
    step: &Step,
) -> Result<()> {
    if let Some(existing) = states.get(&label) {
        if *existing != state {
            return Err(Error::internal(step, format_args!("inconsistent stack at {label}")));
        }
    } else {
        states.insert(label, state);
    }

    Ok(())
}

/// Check that the stack-resident operands of a step are a prefix of its
/// operands sitting on top of the stack. If not, find the stack-resident
/// operands which have to be demoted.
fn demotions(stack: &[Entry], operands: &[StepId], class: &[Class]) -> Option<Vec<usize>> {
    let positions = operands
        .iter()
        .enumerate()
        .filter(|(_, o)| class[o.index()] == Class::Stack)
        .map(|(n, _)| n)
        .collect::<Vec<_>>();

    // The longest prefix of operands which can stay on the stack once the
    // remaining stack-resident operands are moved off of it.
    for keep in (0..=positions.len()).rev() {
        if positions[..keep].iter().enumerate().any(|(n, &p)| n != p) {
            continue;
        }

        let moved = positions[keep..]
            .iter()
            .map(|&p| operands[p].index())
            .collect::<Vec<_>>();

        let remaining = stack
            .iter()
            .filter(|e| !matches!(e, Entry::Value(v) if moved.contains(v)))
            .collect::<Vec<_>>();

        if remaining.len() < keep {
            continue;
        }

        let top = &remaining[remaining.len() - keep..];

        let matches = top
            .iter()
            .zip(&operands[..keep])
            .all(|(e, o)| **e == Entry::Value(o.index()));

        if matches {
            return if moved.is_empty() { None } else { Some(moved) };
        }
    }

    Some(positions.iter().map(|&p| operands[p].index()).collect())
}

/// Number slots and temps by coloring live ranges.
fn assign(steps: &[Step], graph: &Graph, class: &[Class], options: &Options) -> Result<Allocation> {
    let last_use = graph
        .uses
        .iter()
        .map(|uses| uses.iter().copied().max())
        .collect::<Vec<_>>();

    let mut storage = Vec::with_capacity(steps.len());
    let mut releases = vec![Vec::new(); steps.len()];
    let mut slots = SlotPools::new(options.reuse_slots);
    let mut temps = TempPool::new(options.reuse_slots);

    for (index, step) in steps.iter().enumerate() {
        let mut released = Vec::new();

        for operand in &step.operands {
            let operand = operand.index();

            if last_use[operand] != Some(index) || released.contains(&operand) {
                continue;
            }

            released.push(operand);

            match storage[operand] {
                Storage::Slot(slot) => {
                    slots.free(slot);

                    let is_reference = steps[operand]
                        .produces
                        .as_ref()
                        .is_some_and(Type::is_reference);

                    if options.release_slots && is_reference {
                        releases[index].push(slot);
                    }
                }
                Storage::Temp(temp) => temps.free(temp),
                _ => {}
            }
        }

        let s = match class[index] {
            Class::None => Storage::None,
            Class::Discard => Storage::Discard,
            Class::Stack => Storage::Stack,
            Class::Rematerialize => Storage::Rematerialize,
            Class::Spill => {
                let Some(ty) = &step.produces else {
                    return Err(Error::internal(step, "spilled step produces no value"));
                };

                let slot = slots.alloc(ty);
                debug!(step = %StepId::new(index), %slot, %ty, "spilled to slot");
                Storage::Slot(slot)
            }
            Class::Temp => Storage::Temp(temps.alloc()),
        };

        // The produced value might be stored in a slot which was just
        // released.
        if let Storage::Slot(slot) = s {
            releases[index].retain(|s| *s != slot);
        }

        storage.push(s);
    }

    Ok(Allocation {
        storage,
        temps: temps.count(),
        slots: slots.into_decls(),
        releases,
    })
}
