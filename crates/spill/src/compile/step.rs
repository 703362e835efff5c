use core::fmt;

use crate::compile::ops::Fragment;
use crate::hir::{ExprId, Type};
use crate::span::{Span, Spanned};

/// The identifier of an evaluation step, which is its index in the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub(crate) struct StepId(u32);

impl StepId {
    pub(crate) fn new(index: usize) -> Self {
        Self(index as u32)
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for StepId {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub(crate) enum StepKind {
    /// Evaluate a fragment consuming the step's operands.
    Eval(Fragment),
    /// Suspend on the awaitable operand, producing its result on resume.
    Suspend,
    /// Pick up the value carried by the jumps into the preceding label.
    Join,
}

/// One element of the linear evaluation plan.
#[derive(Debug, Clone)]
pub(crate) struct Step {
    pub(crate) source: ExprId,
    pub(crate) span: Span,
    pub(crate) kind: StepKind,
    /// Values consumed, in the order the fragment expects them.
    pub(crate) operands: Vec<StepId>,
    /// The type of the produced value, if any.
    pub(crate) produces: Option<Type>,
    /// Some path from this step reaches a suspension.
    pub(crate) precedes_suspension: bool,
    /// The produced value is used after a suspension on some path, and is
    /// kept in spilled storage.
    pub(crate) must_spill: bool,
}

impl Step {
    /// Describe what produced the value of this step, for diagnostics.
    pub(crate) fn origin(&self) -> Box<str> {
        match &self.kind {
            StepKind::Eval(Fragment::Call { function, .. }) => function.clone(),
            StepKind::Eval(Fragment::GetProperty { name, .. }) => format!("{name}.get").into(),
            StepKind::Eval(fragment) => fragment.to_string().into(),
            StepKind::Suspend => "await".into(),
            StepKind::Join => "conditional".into(),
        }
    }
}

impl Spanned for Step {
    #[inline]
    fn span(&self) -> Span {
        self.span
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            StepKind::Eval(fragment) => write!(f, "{fragment}")?,
            StepKind::Suspend => write!(f, "suspend")?,
            StepKind::Join => write!(f, "join")?,
        }

        let mut it = self.operands.iter();

        if let Some(first) = it.next() {
            write!(f, " ({first}")?;

            for operand in it {
                write!(f, ", {operand}")?;
            }

            write!(f, ")")?;
        }

        Ok(())
    }
}
