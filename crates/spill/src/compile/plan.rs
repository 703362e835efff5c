//! Linearize a method body into evaluation steps.
//!
//! Steps are produced in the order the source language evaluates operands.
//! Each step refers to the values it consumes by the id of the step which
//! produced them, which leaves it to the allocator to decide where every value
//! lives in between.

use tracing::{debug, trace};

use crate::compile::locate::Suspensions;
use crate::compile::ops::{Fragment, Label};
use crate::compile::policy::{self, Construct, Support};
use crate::compile::step::{Step, StepId, StepKind};
use crate::compile::{Error, ErrorKind, Options, Result};
use crate::hir::{
    Argument, BinOp, Expr, ExprKind, Literal, LocalId, LogicalOp, Method, Stmt, Type,
};
use crate::span::Spanned;

/// The linear plan of a method body.
#[derive(Debug, Default)]
pub(crate) struct Plan {
    pub(crate) steps: Vec<Step>,
}

/// Whether the value of an expression is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Needs {
    Value,
    None,
}

impl Needs {
    #[inline]
    pub(crate) fn value(self) -> bool {
        matches!(self, Needs::Value)
    }
}

/// Storage which is assigned to or passed by reference.
///
/// The address-determining parts of the storage are evaluated when the place
/// is constructed. The address itself is only computed by
/// [Planner::materialize], which can be deferred past a suspension since the
/// parts are ordinary values.
#[derive(Debug, Clone)]
struct Place {
    kind: PlaceKind,
    /// The type of the value held by the storage.
    ty: Type,
}

#[derive(Debug, Clone)]
enum PlaceKind {
    Local(LocalId),
    Param(usize),
    This,
    Static(Box<str>),
    Element {
        array: StepId,
        indices: Vec<StepId>,
    },
    Field {
        receiver: StepId,
        name: Box<str>,
    },
    /// A field of a value type, reached through the address of its base.
    FieldOf {
        base: Box<Place>,
        name: Box<str>,
    },
    Property {
        receiver: Option<StepId>,
        name: Box<str>,
        args: Vec<StepId>,
    },
    /// An address which has already been computed.
    Pointer(StepId),
}

impl Place {
    /// Test if computing the address might fail, such as on a null receiver
    /// or an index out of bounds.
    fn is_fallible(&self) -> bool {
        match &self.kind {
            PlaceKind::Element { .. } | PlaceKind::Field { .. } => true,
            PlaceKind::FieldOf { base, .. } => base.is_fallible(),
            _ => false,
        }
    }

    /// Test if the place has address-determining parts which must be kept
    /// until the address is computed.
    fn has_parts(&self) -> bool {
        match &self.kind {
            PlaceKind::Local(..)
            | PlaceKind::Param(..)
            | PlaceKind::This
            | PlaceKind::Static(..) => false,
            PlaceKind::FieldOf { base, .. } => base.has_parts(),
            PlaceKind::Property { receiver, args, .. } => receiver.is_some() || !args.is_empty(),
            _ => true,
        }
    }

    /// Test if the storage is only reachable through an address.
    fn is_indirect(&self) -> bool {
        matches!(
            &self.kind,
            PlaceKind::This | PlaceKind::FieldOf { .. } | PlaceKind::Pointer(..)
        )
    }
}

/// A bound argument whose operand has not been produced yet.
enum Pending<'a> {
    Value(StepId),
    Place(Place, &'a Expr),
}

/// Plan the evaluation of a method body.
pub(crate) fn plan(method: &Method, options: &Options, suspensions: &Suspensions) -> Result<Plan> {
    let mut planner = Planner {
        method,
        options,
        suspensions,
        steps: Vec::new(),
        labels: 0,
        receivers: Vec::new(),
    };

    for stmt in &method.body {
        planner.stmt(stmt)?;
    }

    Ok(Plan {
        steps: planner.steps,
    })
}

struct Planner<'a> {
    method: &'a Method,
    options: &'a Options,
    suspensions: &'a Suspensions,
    steps: Vec<Step>,
    labels: u32,
    /// Receivers tested by enclosing conditional accesses.
    receivers: Vec<StepId>,
}

impl<'a> Planner<'a> {
    fn push(
        &mut self,
        e: &Expr,
        kind: StepKind,
        operands: Vec<StepId>,
        produces: Option<Type>,
    ) -> StepId {
        let id = StepId::new(self.steps.len());

        self.steps.push(Step {
            source: e.id,
            span: e.span,
            kind,
            operands,
            produces,
            precedes_suspension: false,
            must_spill: false,
        });

        id
    }

    fn eval(
        &mut self,
        e: &Expr,
        fragment: Fragment,
        operands: Vec<StepId>,
        produces: Option<Type>,
    ) -> StepId {
        self.push(e, StepKind::Eval(fragment), operands, produces)
    }

    fn label(&mut self) -> Label {
        let label = Label(self.labels);
        self.labels += 1;
        label
    }

    fn place_label(&mut self, e: &Expr, label: Label) {
        self.eval(e, Fragment::Label(label), Vec::new(), None);
    }

    /// Consult the lowering policy for a construct which has to be spilled.
    fn check(&self, construct: Construct, span: impl Spanned) -> Result<()> {
        let mode = self.options.mode;

        match policy::classify(mode, construct) {
            Support::Supported => Ok(()),
            Support::Unsupported(reason) => {
                debug!(method = &*self.method.name, %construct, %mode, reason, "rejected");

                Err(Error::new(
                    span,
                    ErrorKind::UnsupportedConstructInMode {
                        method: self.method.name.clone(),
                        construct,
                        mode,
                    },
                ))
            }
        }
    }

    fn stmt(&mut self, stmt: &'a Stmt) -> Result<()> {
        match stmt {
            Stmt::Expr(e) => {
                self.expr(e, Needs::None)?;
            }
            Stmt::Local { local, init } => {
                let Some(init) = init else {
                    return Ok(());
                };

                let value = self.value(init)?;

                self.eval(
                    init,
                    Fragment::StoreLocal {
                        local: *local,
                        keep: false,
                    },
                    vec![value],
                    None,
                );
            }
            Stmt::Return(e) => {
                let value = self.value(e)?;
                self.eval(e, Fragment::Return, vec![value], None);
            }
        }

        Ok(())
    }

    /// Plan an expression whose value is needed.
    fn value(&mut self, e: &'a Expr) -> Result<StepId> {
        match self.expr(e, Needs::Value)? {
            Some(value) => Ok(value),
            None => Err(Error::internal(e, "expression produced no value")),
        }
    }

    fn expr(&mut self, e: &'a Expr, needs: Needs) -> Result<Option<StepId>> {
        trace!(kind = e.describe(), span = %e.span, "plan");

        let ty = Some(e.ty.clone());

        let value = match &e.kind {
            ExprKind::Literal(lit) => self.eval(e, Fragment::Push(lit.clone()), Vec::new(), ty),
            ExprKind::Local(local) => self.eval(e, Fragment::LoadLocal(*local), Vec::new(), ty),
            ExprKind::Parameter(param) => {
                self.eval(e, Fragment::LoadParam(*param), Vec::new(), ty)
            }
            ExprKind::This => self.eval(e, Fragment::LoadThis, Vec::new(), ty),
            ExprKind::Field {
                receiver: None,
                name,
            } => self.eval(e, Fragment::LoadStatic(name.clone()), Vec::new(), ty),
            ExprKind::Field {
                receiver: Some(receiver),
                name,
            } => {
                let receiver = self.value(receiver)?;
                self.eval(e, Fragment::LoadField(name.clone()), vec![receiver], ty)
            }
            ExprKind::Property {
                receiver,
                name,
                args,
                returns_ref,
            } => {
                let address = self.get_property(e, receiver.as_deref(), name, args, *returns_ref)?;

                if *returns_ref {
                    self.eval(e, Fragment::LoadIndirect, vec![address], ty)
                } else {
                    address
                }
            }
            ExprKind::Element { array, indices } => {
                let mut operands = vec![self.value(array)?];

                for index in indices {
                    operands.push(self.value(index)?);
                }

                let rank = indices.len();
                self.eval(e, Fragment::LoadElement { rank }, operands, ty)
            }
            ExprKind::Call {
                receiver,
                function,
                args,
                returns_ref,
            } => {
                let result = self.call(e, receiver.as_deref(), function, args, *returns_ref)?;

                match (result, *returns_ref) {
                    (Some(address), true) => {
                        self.eval(e, Fragment::LoadIndirect, vec![address], ty)
                    }
                    (result, _) => return Ok(result),
                }
            }
            ExprKind::New { class, args } => {
                let operands = self.arguments(e, None, args)?;

                self.eval(
                    e,
                    Fragment::NewObject {
                        class: class.clone(),
                        argc: args.len(),
                    },
                    operands,
                    ty,
                )
            }
            ExprKind::ObjectInitializer { creation, members } => {
                if self.suspensions.any(members.iter().map(|m| &m.value)) {
                    self.check(Construct::ObjectInitializer, e)?;
                }

                let object = self.value(creation)?;

                for member in members {
                    let value = self.value(&member.value)?;

                    self.eval(
                        &member.value,
                        Fragment::StoreField {
                            name: member.name.clone(),
                            keep: false,
                        },
                        vec![object, value],
                        None,
                    );
                }

                object
            }
            ExprKind::CollectionInitializer { creation, elements } => {
                if self.suspensions.any(elements.iter().flatten()) {
                    self.check(Construct::CollectionInitializer, e)?;
                }

                let collection = self.value(creation)?;

                for element in elements {
                    let mut operands = vec![collection];

                    for arg in element {
                        operands.push(self.value(arg)?);
                    }

                    self.eval(
                        e,
                        Fragment::Call {
                            function: "Add".into(),
                            argc: element.len(),
                            receiver: true,
                            returns_ref: false,
                            returns_value: false,
                        },
                        operands,
                        None,
                    );
                }

                collection
            }
            ExprKind::ArrayInitializer {
                element,
                bounds,
                elements,
            } => {
                let operands = self.values(elements)?;

                self.eval(
                    e,
                    Fragment::NewArray {
                        element: element.clone(),
                        bounds: bounds.clone(),
                    },
                    operands,
                    ty,
                )
            }
            ExprKind::StackAlloc { element, elements } => {
                let operands = self.values(elements)?;

                self.eval(
                    e,
                    Fragment::StackAlloc {
                        element: element.clone(),
                        count: elements.len(),
                    },
                    operands,
                    ty,
                )
            }
            ExprKind::Assign { target, value } => return self.assign(e, target, value, needs),
            ExprKind::CompoundAssign {
                target,
                op,
                value,
                lifted,
            } => return self.compound_assign(e, target, *op, value, *lifted, needs),
            ExprKind::Conditional {
                condition,
                then,
                otherwise,
            } => return self.conditional(e, condition, then, otherwise, needs),
            ExprKind::Logical { op, lhs, rhs } => return self.logical(e, *op, lhs, rhs, needs),
            ExprKind::Coalesce { lhs, rhs } => return self.coalesce(e, lhs, rhs, needs),
            ExprKind::ConditionalAccess { receiver, access } => {
                return self.conditional_access(e, receiver, access, needs)
            }
            ExprKind::ConditionalReceiver => match self.receivers.last() {
                Some(receiver) => *receiver,
                None => return Err(Error::new(e, ErrorKind::MissingConditionalReceiver)),
            },
            ExprKind::Unary {
                op,
                operand,
                lifted,
            } => {
                let operand = self.value(operand)?;

                self.eval(
                    e,
                    Fragment::Unary {
                        op: *op,
                        lifted: *lifted,
                    },
                    vec![operand],
                    ty,
                )
            }
            ExprKind::Binary {
                op,
                lhs,
                rhs,
                lifted,
            } => {
                let lhs = self.value(lhs)?;
                let rhs = self.value(rhs)?;

                self.eval(
                    e,
                    Fragment::Binary {
                        op: *op,
                        lifted: *lifted,
                    },
                    vec![lhs, rhs],
                    ty,
                )
            }
            ExprKind::Ref { target, .. } => {
                let place = self.place(target)?;
                self.materialize(e, &place)?
            }
            ExprKind::ArgList(items) => {
                let operands = self.values(items)?;

                self.eval(
                    e,
                    Fragment::MakeArgList {
                        count: items.len(),
                    },
                    operands,
                    ty,
                )
            }
            ExprKind::Await(operand) => {
                let awaitable = self.value(operand)?;
                self.push(e, StepKind::Suspend, vec![awaitable], ty)
            }
        };

        Ok(Some(value))
    }

    fn values(&mut self, exprs: &'a [Expr]) -> Result<Vec<StepId>> {
        let mut values = Vec::with_capacity(exprs.len());

        for e in exprs {
            values.push(self.value(e)?);
        }

        Ok(values)
    }

    /// Call a property getter, producing an address if the property returns
    /// a reference.
    fn get_property(
        &mut self,
        e: &'a Expr,
        receiver: Option<&'a Expr>,
        name: &str,
        args: &'a [Expr],
        returns_ref: bool,
    ) -> Result<StepId> {
        let mut operands = Vec::new();

        if let Some(receiver) = receiver {
            operands.push(self.value(receiver)?);
        }

        operands.extend(self.values(args)?);

        let ty = if returns_ref {
            Type::ref_(e.ty.clone())
        } else {
            e.ty.clone()
        };

        Ok(self.eval(
            e,
            Fragment::GetProperty {
                name: name.into(),
                argc: args.len(),
                receiver: receiver.is_some(),
                returns_ref,
            },
            operands,
            Some(ty),
        ))
    }

    /// Plan a call. A function returning a reference produces an address.
    fn call(
        &mut self,
        e: &'a Expr,
        receiver: Option<&'a Expr>,
        function: &str,
        args: &'a [Argument],
        returns_ref: bool,
    ) -> Result<Option<StepId>> {
        if args.iter().any(|a| matches!(a.expr.kind, ExprKind::ArgList(..)))
            && self.suspensions.any(args.iter().map(|a| &a.expr))
        {
            self.check(Construct::ArgList, e)?;
        }

        let receiver = match receiver {
            Some(receiver) => Some(self.value(receiver)?),
            None => None,
        };

        let operands = self.arguments(e, receiver, args)?;

        let (produces, returns_value) = if returns_ref {
            (Some(Type::ref_(e.ty.clone())), true)
        } else if e.ty == Type::Unit {
            (None, false)
        } else {
            (Some(e.ty.clone()), true)
        };

        let value = self.eval(
            e,
            Fragment::Call {
                function: function.into(),
                argc: args.len(),
                receiver: receiver.is_some(),
                returns_ref,
                returns_value,
            },
            operands,
            produces,
        );

        Ok(returns_value.then_some(value))
    }

    /// Evaluate arguments in written order, producing operands in parameter
    /// order.
    fn arguments(
        &mut self,
        e: &'a Expr,
        receiver: Option<StepId>,
        args: &'a [Argument],
    ) -> Result<Vec<StepId>> {
        let mut bound = Vec::with_capacity(args.len());

        for (n, arg) in args.iter().enumerate() {
            let later = self.suspensions.any(args[n + 1..].iter().map(|a| &a.expr));

            let pending = match &arg.expr.kind {
                ExprKind::Ref { target, .. } => {
                    let place = self.place(target)?;

                    if later {
                        self.defer(&arg.expr, target, place)?
                    } else {
                        Pending::Value(self.materialize(&arg.expr, &place)?)
                    }
                }
                _ => Pending::Value(self.value(&arg.expr)?),
            };

            bound.push((arg.parameter, pending));
        }

        bound.sort_by_key(|(parameter, _)| *parameter);

        let mut operands = Vec::with_capacity(bound.len() + 1);
        operands.extend(receiver);

        for (_, pending) in bound {
            operands.push(match pending {
                Pending::Value(value) => value,
                Pending::Place(place, arg) => self.materialize(arg, &place)?,
            });
        }

        trace!(function = e.describe(), operands = operands.len(), "bound arguments");
        Ok(operands)
    }

    /// Defer computing the address of a by-reference argument until after
    /// the suspending arguments which follow it.
    fn defer(&mut self, arg: &'a Expr, target: &'a Expr, place: Place) -> Result<Pending<'a>> {
        if let PlaceKind::Pointer(address) = &place.kind {
            let origin = self.steps[address.index()].origin();
            return Err(Error::new(target, ErrorKind::UnpreservableReference { origin }));
        }

        if place.has_parts() {
            self.check(Construct::RefArgument, arg)?;
        }

        if place.is_fallible() {
            self.sacrificial_read(arg, &place)?;
        }

        Ok(Pending::Place(place, arg))
    }

    /// Read through a place and discard the result, so that a failing address
    /// computation fails in its original position.
    fn sacrificial_read(&mut self, e: &Expr, place: &Place) -> Result<()> {
        trace!(span = %e.span, "sacrificial read");

        match &place.kind {
            PlaceKind::Element { array, indices } => {
                let mut operands = vec![*array];
                operands.extend(indices.iter().copied());

                self.eval(
                    e,
                    Fragment::LoadElement {
                        rank: indices.len(),
                    },
                    operands,
                    Some(place.ty.clone()),
                );
            }
            PlaceKind::Field { receiver, name } => {
                self.eval(
                    e,
                    Fragment::LoadField(name.clone()),
                    vec![*receiver],
                    Some(place.ty.clone()),
                );
            }
            PlaceKind::FieldOf { base, .. } => {
                self.sacrificial_read(e, base)?;
            }
            _ => {}
        }

        Ok(())
    }

    /// Evaluate the address-determining parts of an assignable expression.
    fn place(&mut self, target: &'a Expr) -> Result<Place> {
        let kind = match &target.kind {
            ExprKind::Local(local) => PlaceKind::Local(*local),
            ExprKind::Parameter(param) => PlaceKind::Param(*param),
            ExprKind::This => PlaceKind::This,
            ExprKind::Field {
                receiver: None,
                name,
            } => PlaceKind::Static(name.clone()),
            ExprKind::Field {
                receiver: Some(receiver),
                name,
            } => {
                if receiver.ty.is_value_type() && receiver.category().is_lvalue() {
                    let base = self.place(receiver)?;

                    PlaceKind::FieldOf {
                        base: Box::new(base),
                        name: name.clone(),
                    }
                } else {
                    let receiver = self.value(receiver)?;

                    PlaceKind::Field {
                        receiver,
                        name: name.clone(),
                    }
                }
            }
            ExprKind::Element { array, indices } => {
                let array = self.value(array)?;
                let indices = self.values(indices)?;
                PlaceKind::Element { array, indices }
            }
            ExprKind::Property {
                receiver,
                name,
                args,
                returns_ref: false,
            } => {
                let receiver = match receiver {
                    Some(receiver) => Some(self.value(receiver)?),
                    None => None,
                };

                let args = self.values(args)?;

                PlaceKind::Property {
                    receiver,
                    name: name.clone(),
                    args,
                }
            }
            ExprKind::Property {
                receiver,
                name,
                args,
                returns_ref: true,
            } => {
                let address = self.get_property(target, receiver.as_deref(), name, args, true)?;
                PlaceKind::Pointer(address)
            }
            ExprKind::Call {
                receiver,
                function,
                args,
                returns_ref: true,
            } => match self.call(target, receiver.as_deref(), function, args, true)? {
                Some(address) => PlaceKind::Pointer(address),
                None => return Err(Error::internal(target, "call produced no address")),
            },
            _ => {
                return Err(Error::new(
                    target,
                    ErrorKind::UnsupportedAssignTarget {
                        kind: target.describe(),
                    },
                ));
            }
        };

        Ok(Place {
            kind,
            ty: target.ty.clone(),
        })
    }

    /// Compute the address of a place.
    fn materialize(&mut self, e: &Expr, place: &Place) -> Result<StepId> {
        let ty = Some(Type::ref_(place.ty.clone()));

        let address = match &place.kind {
            PlaceKind::Local(local) => {
                self.eval(e, Fragment::AddressOfLocal(*local), Vec::new(), ty)
            }
            PlaceKind::Param(param) => {
                self.eval(e, Fragment::AddressOfParam(*param), Vec::new(), ty)
            }
            PlaceKind::This => self.eval(e, Fragment::AddressOfThis, Vec::new(), ty),
            PlaceKind::Static(name) => {
                self.eval(e, Fragment::AddressOfStatic(name.clone()), Vec::new(), ty)
            }
            PlaceKind::Element { array, indices } => {
                let mut operands = vec![*array];
                operands.extend(indices.iter().copied());

                self.eval(
                    e,
                    Fragment::AddressOfElement {
                        rank: indices.len(),
                    },
                    operands,
                    ty,
                )
            }
            PlaceKind::Field { receiver, name } => {
                self.eval(e, Fragment::AddressOfField(name.clone()), vec![*receiver], ty)
            }
            PlaceKind::FieldOf { base, name } => {
                let base = self.materialize(e, base)?;
                self.eval(
                    e,
                    Fragment::AddressOfFieldIndirect(name.clone()),
                    vec![base],
                    ty,
                )
            }
            PlaceKind::Property { .. } => {
                return Err(Error::new(
                    e,
                    ErrorKind::UnsupportedAssignTarget { kind: "property" },
                ));
            }
            PlaceKind::Pointer(address) => *address,
        };

        Ok(address)
    }

    /// Read the current value of a place.
    fn load(&mut self, e: &Expr, place: &Place) -> Result<StepId> {
        let ty = Some(place.ty.clone());

        let value = match &place.kind {
            PlaceKind::Local(local) => self.eval(e, Fragment::LoadLocal(*local), Vec::new(), ty),
            PlaceKind::Param(param) => self.eval(e, Fragment::LoadParam(*param), Vec::new(), ty),
            PlaceKind::This => self.eval(e, Fragment::LoadThis, Vec::new(), ty),
            PlaceKind::Static(name) => {
                self.eval(e, Fragment::LoadStatic(name.clone()), Vec::new(), ty)
            }
            PlaceKind::Element { array, indices } => {
                let mut operands = vec![*array];
                operands.extend(indices.iter().copied());

                self.eval(
                    e,
                    Fragment::LoadElement {
                        rank: indices.len(),
                    },
                    operands,
                    ty,
                )
            }
            PlaceKind::Field { receiver, name } => {
                self.eval(e, Fragment::LoadField(name.clone()), vec![*receiver], ty)
            }
            PlaceKind::FieldOf { base, name } => {
                let base = self.load(e, base)?;
                self.eval(e, Fragment::LoadField(name.clone()), vec![base], ty)
            }
            PlaceKind::Property {
                receiver,
                name,
                args,
            } => {
                let mut operands = Vec::new();
                operands.extend(*receiver);
                operands.extend(args.iter().copied());

                self.eval(
                    e,
                    Fragment::GetProperty {
                        name: name.clone(),
                        argc: args.len(),
                        receiver: receiver.is_some(),
                        returns_ref: false,
                    },
                    operands,
                    ty,
                )
            }
            PlaceKind::Pointer(address) => {
                self.eval(e, Fragment::LoadIndirect, vec![*address], ty)
            }
        };

        Ok(value)
    }

    /// Write a value to a place, optionally keeping the written value.
    fn store(&mut self, e: &Expr, place: &Place, value: StepId, keep: bool) -> Result<Option<StepId>> {
        let produces = keep.then(|| place.ty.clone());

        let (fragment, operands) = match &place.kind {
            PlaceKind::Local(local) => (
                Fragment::StoreLocal {
                    local: *local,
                    keep,
                },
                vec![value],
            ),
            PlaceKind::Param(param) => (
                Fragment::StoreParam {
                    param: *param,
                    keep,
                },
                vec![value],
            ),
            PlaceKind::Static(name) => (
                Fragment::StoreStatic {
                    name: name.clone(),
                    keep,
                },
                vec![value],
            ),
            PlaceKind::Element { array, indices } => {
                let mut operands = vec![*array];
                operands.extend(indices.iter().copied());
                operands.push(value);

                (
                    Fragment::StoreElement {
                        rank: indices.len(),
                        keep,
                    },
                    operands,
                )
            }
            PlaceKind::Field { receiver, name } => (
                Fragment::StoreField {
                    name: name.clone(),
                    keep,
                },
                vec![*receiver, value],
            ),
            PlaceKind::Property {
                receiver,
                name,
                args,
            } => {
                let mut operands = Vec::new();
                operands.extend(*receiver);
                operands.extend(args.iter().copied());
                operands.push(value);

                (
                    Fragment::SetProperty {
                        name: name.clone(),
                        argc: args.len(),
                        receiver: receiver.is_some(),
                        keep,
                    },
                    operands,
                )
            }
            PlaceKind::This | PlaceKind::FieldOf { .. } | PlaceKind::Pointer(..) => {
                let address = self.materialize(e, place)?;
                (Fragment::StoreIndirect { keep }, vec![address, value])
            }
        };

        let stored = self.eval(e, fragment, operands, produces);
        Ok(keep.then_some(stored))
    }

    fn assign(
        &mut self,
        e: &'a Expr,
        target: &'a Expr,
        value: &'a Expr,
        needs: Needs,
    ) -> Result<Option<StepId>> {
        let mut place = self.place(target)?;

        if place.is_indirect() {
            if self.suspensions.contains(value) {
                if let PlaceKind::Pointer(address) = &place.kind {
                    let origin = self.steps[address.index()].origin();
                    return Err(Error::new(target, ErrorKind::UnpreservableReference { origin }));
                }

                if place.has_parts() {
                    self.check(Construct::StructFieldAssignment, target)?;
                }

                if place.is_fallible() {
                    self.sacrificial_read(target, &place)?;
                }
            } else {
                let address = self.materialize(target, &place)?;

                place = Place {
                    kind: PlaceKind::Pointer(address),
                    ty: place.ty,
                };
            }
        }

        let value = self.value(value)?;
        self.store(e, &place, value, needs.value())
    }

    fn compound_assign(
        &mut self,
        e: &'a Expr,
        target: &'a Expr,
        op: BinOp,
        value: &'a Expr,
        lifted: bool,
        needs: Needs,
    ) -> Result<Option<StepId>> {
        let mut place = self.place(target)?;
        let suspends = self.suspensions.contains(value);

        if suspends && place.has_parts() {
            self.check(Construct::CompoundAssignmentTarget, target)?;
        }

        if place.is_indirect() {
            if suspends {
                if let PlaceKind::Pointer(address) = &place.kind {
                    let origin = self.steps[address.index()].origin();
                    return Err(Error::new(target, ErrorKind::UnpreservableReference { origin }));
                }
            } else {
                let address = self.materialize(target, &place)?;

                place = Place {
                    kind: PlaceKind::Pointer(address),
                    ty: place.ty,
                };
            }
        }

        let old = self.load(target, &place)?;
        let rhs = self.value(value)?;

        let new = self.eval(
            e,
            Fragment::Binary { op, lifted },
            vec![old, rhs],
            Some(e.ty.clone()),
        );

        self.store(e, &place, new, needs.value())
    }

    /// Plan one arm of a branching expression, carrying its value to the end
    /// label.
    fn arm(&mut self, e: &Expr, arm: &'a Expr, end: Label, needs: Needs) -> Result<()> {
        let value = self.expr(arm, needs)?;

        let carried = match (needs, value) {
            (Needs::Value, Some(value)) => vec![value],
            (Needs::Value, None) => {
                return Err(Error::internal(arm, "branch produced no value"));
            }
            (Needs::None, _) => Vec::new(),
        };

        let carry = !carried.is_empty();
        self.eval(e, Fragment::Jump { label: end, carry }, carried, None);
        Ok(())
    }

    fn join(&mut self, e: &Expr, end: Label, needs: Needs) -> Option<StepId> {
        self.place_label(e, end);

        if needs.value() {
            Some(self.push(e, StepKind::Join, Vec::new(), Some(e.ty.clone())))
        } else {
            None
        }
    }

    fn conditional(
        &mut self,
        e: &'a Expr,
        condition: &'a Expr,
        then: &'a Expr,
        otherwise: &'a Expr,
        needs: Needs,
    ) -> Result<Option<StepId>> {
        let condition = self.value(condition)?;
        let otherwise_label = self.label();
        let end = self.label();

        self.eval(
            e,
            Fragment::JumpIf {
                label: otherwise_label,
                when: false,
            },
            vec![condition],
            None,
        );

        self.arm(e, then, end, needs)?;
        self.place_label(e, otherwise_label);
        self.arm(e, otherwise, end, needs)?;
        Ok(self.join(e, end, needs))
    }

    fn logical(
        &mut self,
        e: &'a Expr,
        op: LogicalOp,
        lhs: &'a Expr,
        rhs: &'a Expr,
        needs: Needs,
    ) -> Result<Option<StepId>> {
        // The value of the expression when the right hand side is skipped.
        let short = matches!(op, LogicalOp::Or);

        let lhs = self.value(lhs)?;
        let end = self.label();

        if !needs.value() {
            self.eval(e, Fragment::JumpIf { label: end, when: short }, vec![lhs], None);
            self.expr(rhs, Needs::None)?;
            self.place_label(e, end);
            return Ok(None);
        }

        let short_label = self.label();

        self.eval(
            e,
            Fragment::JumpIf {
                label: short_label,
                when: short,
            },
            vec![lhs],
            None,
        );

        self.arm(e, rhs, end, needs)?;
        self.place_label(e, short_label);

        let value = self.eval(
            e,
            Fragment::Push(Literal::Bool(short)),
            Vec::new(),
            Some(Type::Bool),
        );

        self.eval(e, Fragment::Jump { label: end, carry: true }, vec![value], None);
        Ok(self.join(e, end, needs))
    }

    fn coalesce(
        &mut self,
        e: &'a Expr,
        lhs: &'a Expr,
        rhs: &'a Expr,
        needs: Needs,
    ) -> Result<Option<StepId>> {
        let lhs = self.value(lhs)?;
        let end = self.label();

        if !needs.value() {
            self.eval(e, Fragment::JumpIfNull { label: end, when: false }, vec![lhs], None);
            self.expr(rhs, Needs::None)?;
            self.place_label(e, end);
            return Ok(None);
        }

        let rhs_label = self.label();

        self.eval(
            e,
            Fragment::JumpIfNull {
                label: rhs_label,
                when: true,
            },
            vec![lhs],
            None,
        );

        self.eval(e, Fragment::Jump { label: end, carry: true }, vec![lhs], None);
        self.place_label(e, rhs_label);
        self.arm(e, rhs, end, needs)?;
        Ok(self.join(e, end, needs))
    }

    fn conditional_access(
        &mut self,
        e: &'a Expr,
        receiver: &'a Expr,
        access: &'a Expr,
        needs: Needs,
    ) -> Result<Option<StepId>> {
        let receiver = self.value(receiver)?;
        let null = self.label();

        self.eval(
            e,
            Fragment::JumpIfNull {
                label: null,
                when: true,
            },
            vec![receiver],
            None,
        );

        self.receivers.push(receiver);

        if !needs.value() {
            let result = self.expr(access, Needs::None);
            self.receivers.pop();
            result?;
            self.place_label(e, null);
            return Ok(None);
        }

        let end = self.label();
        let result = self.arm(e, access, end, needs);
        self.receivers.pop();
        result?;

        self.place_label(e, null);

        let value = self.eval(
            e,
            Fragment::Push(Literal::Null),
            Vec::new(),
            Some(e.ty.clone()),
        );

        self.eval(e, Fragment::Jump { label: end, carry: true }, vec![value], None);
        Ok(self.join(e, end, needs))
    }
}
