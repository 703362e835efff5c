use core::cell::RefCell;
use core::fmt;

use std::rc::Rc;

use hashbrown::HashMap;

use crate::compile::{Fragment, Label, Lowered, Operation};
use crate::hir::{BinOp, LocalId, UnaryOp};
use crate::runtime::{Address, Context, Env, Value, VmError, VmErrorKind};

/// The reason why the machine stopped executing.
#[derive(Debug, PartialEq)]
pub enum VmHalt {
    /// The method returned.
    Exited(Value),
    /// The method suspended on an awaitable, entering the given state.
    Awaited { state: usize },
}

impl fmt::Display for VmHalt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(..) => write!(f, "exited"),
            Self::Awaited { state } => write!(f, "awaited in state {state}"),
        }
    }
}

/// A stack machine executing a lowered method.
///
/// Suspending discards the operand stack, and in modes where the runtime
/// doesn't preserve them, every ephemeral temporary. A value which was not
/// spilled correctly is therefore observed as an error.
pub struct Vm<'a> {
    context: &'a Context,
    lowered: &'a Lowered,
    labels: HashMap<Label, usize>,
    ip: usize,
    stack: Vec<Value>,
    slots: Vec<Option<Value>>,
    temps: Vec<Option<Value>>,
    env: Env,
    /// The awaitable the machine is suspended on.
    awaited: Option<Value>,
    /// The result to resume with.
    resumed: Option<Value>,
    suspensions: usize,
}

impl<'a> Vm<'a> {
    /// Construct a machine to execute the given method.
    pub fn new(context: &'a Context, lowered: &'a Lowered) -> Self {
        let mut labels = HashMap::new();

        for (ip, (op, _)) in lowered.instructions().iter().enumerate() {
            if let Operation::Evaluate {
                fragment: Fragment::Label(label),
                ..
            } = op
            {
                labels.insert(*label, ip);
            }
        }

        Self {
            context,
            lowered,
            labels,
            ip: 0,
            stack: Vec::new(),
            slots: vec![None; lowered.slots().len()],
            temps: vec![None; lowered.temps()],
            env: Env::new(context.statics().clone()),
            awaited: None,
            resumed: None,
            suspensions: 0,
        }
    }

    /// Set the arguments of the method.
    pub fn with_args(mut self, args: impl IntoIterator<Item = Value>) -> Self {
        for (n, arg) in args.into_iter().enumerate() {
            self.env.set_param(n, arg);
        }

        self
    }

    /// Set the receiver of an instance method.
    pub fn with_this(mut self, this: Value) -> Self {
        self.env.set_this(this);
        self
    }

    /// Set the initial value of a local.
    pub fn with_local(mut self, local: LocalId, value: Value) -> Self {
        self.env.set_local(local, value);
        self
    }

    /// Access the variables of the activation.
    pub fn env(&self) -> &Env {
        &self.env
    }

    /// The lines logged by host functions.
    pub fn output(&self) -> &[String] {
        self.env.output()
    }

    /// Convert into the lines logged by host functions.
    pub fn into_output(self) -> Vec<String> {
        self.env.into_output()
    }

    /// The number of times the machine suspended.
    pub fn suspensions(&self) -> usize {
        self.suspensions
    }

    /// Run the method to completion, completing every awaited task as soon
    /// as the machine suspends on it.
    pub fn run(&mut self) -> Result<Value, VmError> {
        loop {
            match self.execute()? {
                VmHalt::Exited(value) => return Ok(value),
                VmHalt::Awaited { .. } => self.resume()?,
            }
        }
    }

    /// Complete the awaitable the machine is suspended on, so that execution
    /// can continue.
    ///
    /// Awaiting a value which is not a task produces the value itself.
    pub fn resume(&mut self) -> Result<(), VmError> {
        let Some(awaited) = self.awaited.take() else {
            return Err(VmError::panic("machine is not suspended").at(self.ip));
        };

        let value = match awaited {
            Value::Task(task) => task.complete(&mut self.env).map_err(|e| e.at(self.ip))?,
            value => value,
        };

        self.resumed = Some(value);
        Ok(())
    }

    /// Execute until the method returns or suspends.
    #[tracing::instrument(skip(self), fields(method = self.lowered.name(), self.ip))]
    pub fn execute(&mut self) -> Result<VmHalt, VmError> {
        let lowered = self.lowered;

        while let Some((op, _)) = lowered.instructions().get(self.ip) {
            let ip = self.ip;
            self.ip += 1;

            tracing::trace!(ip, %op);

            if let Some(halt) = self.op(op).map_err(|kind| VmError::new(ip, kind))? {
                return Ok(halt);
            }
        }

        Ok(VmHalt::Exited(Value::Unit))
    }

    fn op(&mut self, op: &Operation) -> Result<Option<VmHalt>, VmErrorKind> {
        match op {
            Operation::Evaluate { fragment, .. } => return self.fragment(fragment),
            Operation::StoreToSlot(slot) => {
                let value = self.pop()?;
                *self.slot_mut(slot.index())? = Some(value);
            }
            Operation::LoadFromSlot(slot) => {
                let value = self.slot_mut(slot.index())?.clone();

                let Some(value) = value else {
                    return Err(VmErrorKind::UninitializedSlot { slot: slot.index() });
                };

                self.stack.push(value);
            }
            Operation::ReleaseSlot(slot) => {
                *self.slot_mut(slot.index())? = None;
            }
            Operation::EnterSuspension { state, .. } => {
                let awaited = self.pop()?;
                self.stack.clear();

                if !self.lowered.mode().preserves_temps() {
                    self.temps.iter_mut().for_each(|t| *t = None);
                }

                self.awaited = Some(awaited);
                self.suspensions += 1;
                return Ok(Some(VmHalt::Awaited { state: *state }));
            }
            Operation::ResumeFromSuspension { .. } => {
                let Some(value) = self.resumed.take() else {
                    return Err(VmErrorKind::Panic {
                        message: "resumed without completing the awaited task".into(),
                    });
                };

                self.stack.push(value);
            }
        }

        Ok(None)
    }

    fn fragment(&mut self, fragment: &Fragment) -> Result<Option<VmHalt>, VmErrorKind> {
        let context = self.context;

        match fragment {
            Fragment::Push(lit) => {
                self.stack.push(Value::from_literal(lit));
            }
            Fragment::LoadLocal(local) => {
                self.stack.push(self.env.local(*local));
            }
            Fragment::StoreLocal { local, keep } => {
                let value = self.pop()?;
                let value = self.kept(value, *keep);
                self.env.set_local(*local, value);
            }
            Fragment::LoadParam(param) => {
                self.stack.push(self.env.param(*param));
            }
            Fragment::StoreParam { param, keep } => {
                let value = self.pop()?;
                let value = self.kept(value, *keep);
                self.env.set_param(*param, value);
            }
            Fragment::LoadThis => {
                let this = self.env.this()?.clone();
                self.stack.push(this);
            }
            Fragment::LoadStatic(name) => {
                self.stack.push(self.env.static_value(name));
            }
            Fragment::StoreStatic { name, keep } => {
                let value = self.pop()?;
                let value = self.kept(value, *keep);
                *self.env.static_mut(name) = value;
            }
            Fragment::LoadField(name) => {
                let receiver = self.pop()?;
                self.stack.push(receiver.field(name)?);
            }
            Fragment::StoreField { name, keep } => {
                let value = self.pop()?;
                let receiver = self.pop()?;
                let value = self.kept(value, *keep);
                receiver.as_object()?.borrow_mut().set(name, value);
            }
            Fragment::LoadElement { rank } => {
                let operands = self.pop_n(rank + 1)?;
                let value = element(&operands)?;
                self.stack.push(value);
            }
            Fragment::StoreElement { rank, keep } => {
                let value = self.pop()?;
                let operands = self.pop_n(rank + 1)?;
                let address = element_address(&operands)?;
                let value = self.kept(value, *keep);
                address.store(&mut self.env, value)?;
            }
            Fragment::GetProperty {
                name,
                argc,
                receiver,
                ..
            } => {
                let args = self.pop_n(argc + usize::from(*receiver))?;
                let receiver = receiver.then(|| &args[0]);

                if receiver.is_some_and(Value::is_null) {
                    return Err(VmErrorKind::NullReference);
                }

                let getter = format!("get_{name}");

                let value = match context.lookup_method(receiver, &getter) {
                    Some(function) => function(&mut self.env, &args).map_err(VmError::into_kind)?,
                    None => match receiver {
                        Some(receiver @ Value::Object(..)) if *argc == 0 => receiver.field(name)?,
                        _ => return Err(VmErrorKind::MissingFunction { name: getter.into() }),
                    },
                };

                self.stack.push(value);
            }
            Fragment::SetProperty {
                name,
                argc,
                receiver,
                keep,
            } => {
                let value = self.pop()?;
                let mut args = self.pop_n(argc + usize::from(*receiver))?;
                let receiver = receiver.then(|| args[0].clone());

                if receiver.as_ref().is_some_and(Value::is_null) {
                    return Err(VmErrorKind::NullReference);
                }

                let value = self.kept(value, *keep);
                let setter = format!("set_{name}");

                match context.lookup_method(receiver.as_ref(), &setter) {
                    Some(function) => {
                        args.push(value);
                        function(&mut self.env, &args).map_err(VmError::into_kind)?;
                    }
                    None => match receiver {
                        Some(Value::Object(object)) if *argc == 0 => {
                            object.borrow_mut().set(name, value);
                        }
                        _ => return Err(VmErrorKind::MissingFunction { name: setter.into() }),
                    },
                }
            }
            Fragment::AddressOfLocal(local) => {
                self.stack.push(Value::Address(Address::Local(*local)));
            }
            Fragment::AddressOfParam(param) => {
                self.stack.push(Value::Address(Address::Param(*param)));
            }
            Fragment::AddressOfThis => {
                self.stack.push(Value::Address(Address::This));
            }
            Fragment::AddressOfStatic(name) => {
                self.stack
                    .push(Value::Address(Address::Static(name.clone())));
            }
            Fragment::AddressOfElement { rank } => {
                let operands = self.pop_n(rank + 1)?;
                let address = element_address(&operands)?;
                self.stack.push(Value::Address(address));
            }
            Fragment::AddressOfField(name) => {
                let receiver = self.pop()?;
                let object = receiver.as_object()?.clone();

                self.stack.push(Value::Address(Address::Field {
                    object,
                    name: name.clone(),
                }));
            }
            Fragment::AddressOfFieldIndirect(name) => {
                let base = self.pop()?.as_address()?.clone();

                self.stack.push(Value::Address(Address::FieldOf {
                    base: Box::new(base),
                    name: name.clone(),
                }));
            }
            Fragment::LoadIndirect => {
                let address = self.pop()?;
                let value = address.as_address()?.load(&self.env)?;
                self.stack.push(value);
            }
            Fragment::StoreIndirect { keep } => {
                let value = self.pop()?;
                let address = self.pop()?;
                let value = self.kept(value, *keep);
                address.as_address()?.store(&mut self.env, value)?;
            }
            Fragment::Call {
                function,
                argc,
                receiver,
                returns_value,
                ..
            } => {
                let args = self.pop_n(argc + usize::from(*receiver))?;
                let receiver = receiver.then(|| &args[0]);

                if receiver.is_some_and(Value::is_null) {
                    return Err(VmErrorKind::NullReference);
                }

                let Some(f) = context.lookup_method(receiver, function) else {
                    return Err(VmErrorKind::MissingFunction {
                        name: function.clone(),
                    });
                };

                let value = f(&mut self.env, &args).map_err(VmError::into_kind)?;

                if *returns_value {
                    self.stack.push(value);
                }
            }
            Fragment::NewObject { class, argc } => {
                let args = self.pop_n(*argc)?;

                let object = match context.lookup(class) {
                    Some(constructor) => {
                        constructor(&mut self.env, &args).map_err(VmError::into_kind)?
                    }
                    None if args.is_empty() => Value::object(context.instantiate(class)),
                    None => {
                        return Err(VmErrorKind::MissingFunction {
                            name: class.clone(),
                        })
                    }
                };

                self.stack.push(object);
            }
            Fragment::NewArray { bounds, .. } => {
                let items = self.pop_n(bounds.iter().product())?;
                self.stack.push(Value::array_with_dims(bounds.clone(), items));
            }
            Fragment::StackAlloc { count, .. } => {
                let items = self.pop_n(*count)?;
                self.stack.push(Value::Span(Rc::new(RefCell::new(items))));
            }
            Fragment::MakeArgList { count } => {
                let items = self.pop_n(*count)?;
                self.stack.push(Value::ArgList(items.into()));
            }
            Fragment::Unary { op, lifted } => {
                let operand = self.pop()?;
                self.stack.push(unary(*op, *lifted, operand)?);
            }
            Fragment::Binary { op, lifted } => {
                let rhs = self.pop()?;
                let lhs = self.pop()?;
                self.stack.push(binary(*op, *lifted, lhs, rhs)?);
            }
            Fragment::Pop => {
                self.pop()?;
            }
            Fragment::Label(..) => {}
            Fragment::Jump { label, .. } => {
                // A carried value stays on the stack for the target.
                self.jump(*label)?;
            }
            Fragment::JumpIf { label, when } => {
                if self.pop()?.as_bool()? == *when {
                    self.jump(*label)?;
                }
            }
            Fragment::JumpIfNull { label, when } => {
                if self.pop()?.is_null() == *when {
                    self.jump(*label)?;
                }
            }
            Fragment::StoreTemp(temp) => {
                let value = self.pop()?;
                *self.temp_mut(temp.index())? = Some(value);
            }
            Fragment::LoadTemp(temp) => {
                let Some(value) = self.temp_mut(temp.index())?.clone() else {
                    return Err(VmErrorKind::InvalidTemp { temp: temp.index() });
                };

                self.stack.push(value);
            }
            Fragment::Return => {
                let value = self.pop()?;
                return Ok(Some(VmHalt::Exited(value)));
            }
        }

        Ok(None)
    }

    /// Push a copy of a stored value if it should be kept.
    fn kept(&mut self, value: Value, keep: bool) -> Value {
        if keep {
            self.stack.push(value.clone());
        }

        value
    }

    fn pop(&mut self) -> Result<Value, VmErrorKind> {
        self.stack.pop().ok_or(VmErrorKind::StackUnderflow)
    }

    /// Pop values in the order they were pushed.
    fn pop_n(&mut self, count: usize) -> Result<Vec<Value>, VmErrorKind> {
        let Some(start) = self.stack.len().checked_sub(count) else {
            return Err(VmErrorKind::StackUnderflow);
        };

        Ok(self.stack.split_off(start))
    }

    fn jump(&mut self, label: Label) -> Result<(), VmErrorKind> {
        let Some(ip) = self.labels.get(&label) else {
            return Err(VmErrorKind::MissingLabel {
                label: label.to_string().into(),
            });
        };

        self.ip = *ip;
        Ok(())
    }

    fn slot_mut(&mut self, slot: usize) -> Result<&mut Option<Value>, VmErrorKind> {
        self.slots
            .get_mut(slot)
            .ok_or(VmErrorKind::UninitializedSlot { slot })
    }

    fn temp_mut(&mut self, temp: usize) -> Result<&mut Option<Value>, VmErrorKind> {
        self.temps
            .get_mut(temp)
            .ok_or(VmErrorKind::InvalidTemp { temp })
    }
}

/// Read an element given an array followed by its indices.
fn element(operands: &[Value]) -> Result<Value, VmErrorKind> {
    let Some((array, indices)) = operands.split_first() else {
        return Err(VmErrorKind::StackUnderflow);
    };

    match array {
        Value::Array(array) => {
            let array = array.borrow();
            let index = array.flat(indices)?;
            Ok(array.get(index))
        }
        Value::Span(items) => {
            let items = items.borrow();
            let index = span_index(indices, items.len())?;
            Ok(items[index].clone())
        }
        Value::Null => Err(VmErrorKind::NullReference),
        other => Err(VmErrorKind::TypeMismatch {
            expected: "array",
            actual: other.type_name().into(),
        }),
    }
}

fn element_address(operands: &[Value]) -> Result<Address, VmErrorKind> {
    let Some((array, indices)) = operands.split_first() else {
        return Err(VmErrorKind::StackUnderflow);
    };

    match array {
        Value::Array(array) => {
            let index = array.borrow().flat(indices)?;

            Ok(Address::Element {
                array: array.clone(),
                index,
            })
        }
        Value::Null => Err(VmErrorKind::NullReference),
        other => Err(VmErrorKind::TypeMismatch {
            expected: "array",
            actual: other.type_name().into(),
        }),
    }
}

fn span_index(indices: &[Value], length: usize) -> Result<usize, VmErrorKind> {
    let [index] = indices else {
        return Err(VmErrorKind::InvalidAddress {
            message: "spans have a single dimension".into(),
        });
    };

    let index = index.as_int()?;

    match usize::try_from(index) {
        Ok(i) if i < length => Ok(i),
        _ => Err(VmErrorKind::IndexOutOfRange { index, length }),
    }
}

fn unary(op: UnaryOp, lifted: bool, operand: Value) -> Result<Value, VmErrorKind> {
    if lifted && operand.is_null() {
        return Ok(Value::Null);
    }

    match (op, operand) {
        (UnaryOp::Neg, Value::Int(n)) => Ok(Value::Int(n.wrapping_neg())),
        (UnaryOp::BitNot, Value::Int(n)) => Ok(Value::Int(!n)),
        (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (_, other) => Err(VmErrorKind::TypeMismatch {
            expected: "operand of unary operator",
            actual: other.type_name().into(),
        }),
    }
}

fn binary(op: BinOp, lifted: bool, lhs: Value, rhs: Value) -> Result<Value, VmErrorKind> {
    if lifted && (lhs.is_null() || rhs.is_null()) {
        let both = lhs.is_null() && rhs.is_null();

        return Ok(match op {
            BinOp::Eq => Value::Bool(both),
            BinOp::Neq => Value::Bool(!both),
            BinOp::Lt | BinOp::Gt | BinOp::Lte | BinOp::Gte => Value::Bool(false),
            _ => Value::Null,
        });
    }

    let value = match (op, &lhs, &rhs) {
        (BinOp::Eq, ..) => Value::Bool(lhs == rhs),
        (BinOp::Neq, ..) => Value::Bool(lhs != rhs),
        (BinOp::Add, Value::String(..), _) | (BinOp::Add, _, Value::String(..)) => {
            Value::String(format!("{}{}", concat(&lhs), concat(&rhs)).into())
        }
        (op, Value::Int(a), Value::Int(b)) => int(op, *a, *b)?,
        (BinOp::BitAnd, Value::Bool(a), Value::Bool(b)) => Value::Bool(a & b),
        (BinOp::BitOr, Value::Bool(a), Value::Bool(b)) => Value::Bool(a | b),
        (BinOp::BitXor, Value::Bool(a), Value::Bool(b)) => Value::Bool(a ^ b),
        _ => {
            return Err(VmErrorKind::TypeMismatch {
                expected: "operands of binary operator",
                actual: format!("{} {op} {}", lhs.type_name(), rhs.type_name()).into(),
            })
        }
    };

    Ok(value)
}

/// Format a string concatenation operand, where null is empty.
fn concat(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        value => value.to_string(),
    }
}

fn int(op: BinOp, a: i64, b: i64) -> Result<Value, VmErrorKind> {
    let value = match op {
        BinOp::Add => Value::Int(a.wrapping_add(b)),
        BinOp::Sub => Value::Int(a.wrapping_sub(b)),
        BinOp::Mul => Value::Int(a.wrapping_mul(b)),
        BinOp::Div | BinOp::Rem if b == 0 => return Err(VmErrorKind::DivideByZero),
        BinOp::Div => Value::Int(a.wrapping_div(b)),
        BinOp::Rem => Value::Int(a.wrapping_rem(b)),
        BinOp::BitAnd => Value::Int(a & b),
        BinOp::BitOr => Value::Int(a | b),
        BinOp::BitXor => Value::Int(a ^ b),
        BinOp::Shl => Value::Int(a.wrapping_shl(b as u32)),
        BinOp::Shr => Value::Int(a.wrapping_shr(b as u32)),
        BinOp::Eq => Value::Bool(a == b),
        BinOp::Neq => Value::Bool(a != b),
        BinOp::Lt => Value::Bool(a < b),
        BinOp::Gt => Value::Bool(a > b),
        BinOp::Lte => Value::Bool(a <= b),
        BinOp::Gte => Value::Bool(a >= b),
    };

    Ok(value)
}
