use core::cell::RefCell;
use core::fmt;

use std::rc::Rc;

use hashbrown::HashMap;

use crate::hir::{Literal, LocalId};
use crate::runtime::{Env, Function, VmError, VmErrorKind};

/// A value on the operand stack of the machine.
#[derive(Clone)]
pub enum Value {
    Unit,
    Null,
    Bool(bool),
    Int(i64),
    String(Rc<str>),
    /// An instance of a class, shared by reference.
    Object(Rc<RefCell<Object>>),
    /// An instance of a value type, copied when read.
    Struct(Box<Struct>),
    Array(Rc<RefCell<Array>>),
    /// Storage allocated on the stack of the activation.
    Span(Rc<RefCell<Vec<Value>>>),
    Address(Address),
    ArgList(Rc<[Value]>),
    Task(Task),
}

impl Value {
    /// Construct a string value.
    pub fn string(s: &str) -> Self {
        Self::String(s.into())
    }

    /// Construct a single-dimensional array.
    pub fn array(items: Vec<Value>) -> Self {
        let dims = vec![items.len()];
        Self::Array(Rc::new(RefCell::new(Array { dims, items })))
    }

    /// Construct an array with the given dimensions, items in row-major order.
    pub fn array_with_dims(dims: Vec<usize>, items: Vec<Value>) -> Self {
        Self::Array(Rc::new(RefCell::new(Array { dims, items })))
    }

    /// Wrap an object.
    pub fn object(object: Object) -> Self {
        Self::Object(Rc::new(RefCell::new(object)))
    }

    pub(crate) fn from_literal(lit: &Literal) -> Self {
        match lit {
            Literal::Unit => Self::Unit,
            Literal::Null => Self::Null,
            Literal::Bool(b) => Self::Bool(*b),
            Literal::Int(n) => Self::Int(*n),
            Literal::Str(s) => Self::String(Rc::from(&**s)),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the name of the type of the value, used in errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Unit => "unit",
            Self::Null => "null",
            Self::Bool(..) => "bool",
            Self::Int(..) => "int",
            Self::String(..) => "string",
            Self::Object(..) => "object",
            Self::Struct(..) => "struct",
            Self::Array(..) => "array",
            Self::Span(..) => "span",
            Self::Address(..) => "address",
            Self::ArgList(..) => "arglist",
            Self::Task(..) => "task",
        }
    }

    fn mismatch(&self, expected: &'static str) -> VmErrorKind {
        VmErrorKind::TypeMismatch {
            expected,
            actual: self.type_name().into(),
        }
    }

    pub fn as_bool(&self) -> Result<bool, VmErrorKind> {
        match self {
            Self::Bool(b) => Ok(*b),
            other => Err(other.mismatch("bool")),
        }
    }

    pub fn as_int(&self) -> Result<i64, VmErrorKind> {
        match self {
            Self::Int(n) => Ok(*n),
            other => Err(other.mismatch("int")),
        }
    }

    pub fn as_object(&self) -> Result<&Rc<RefCell<Object>>, VmErrorKind> {
        match self {
            Self::Object(object) => Ok(object),
            Self::Null => Err(VmErrorKind::NullReference),
            other => Err(other.mismatch("object")),
        }
    }

    pub fn as_address(&self) -> Result<&Address, VmErrorKind> {
        match self {
            Self::Address(address) => Ok(address),
            other => Err(other.mismatch("address")),
        }
    }

    /// Read a field of an object or a struct.
    pub fn field(&self, name: &str) -> Result<Value, VmErrorKind> {
        match self {
            Self::Object(object) => Ok(object.borrow().get(name)),
            Self::Struct(s) => Ok(s.get(name)),
            Self::Null => Err(VmErrorKind::NullReference),
            other => Err(other.mismatch("object or struct")),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Unit, Self::Unit) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => Rc::ptr_eq(a, b),
            (Self::Struct(a), Self::Struct(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => Rc::ptr_eq(a, b),
            (Self::Span(a), Self::Span(b)) => Rc::ptr_eq(a, b),
            (Self::Address(a), Self::Address(b)) => a == b,
            (Self::ArgList(a), Self::ArgList(b)) => a == b,
            (Self::Task(a), Self::Task(b)) => Rc::ptr_eq(&a.state, &b.state),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s:?}"),
            other => fmt::Display::fmt(other, f),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unit => write!(f, "()"),
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
            Self::Object(object) => write!(f, "{}", object.borrow().class),
            Self::Struct(s) => {
                write!(f, "{} {{", s.name)?;

                for (n, (name, value)) in s.fields.iter().enumerate() {
                    let sep = if n == 0 { " " } else { ", " };
                    write!(f, "{sep}{name}: {value:?}")?;
                }

                write!(f, " }}")
            }
            Self::Array(array) => write!(f, "{:?}", array.borrow().items),
            Self::Span(items) => write!(f, "span {:?}", items.borrow()),
            Self::Address(address) => write!(f, "&{address}"),
            Self::ArgList(items) => write!(f, "__arglist {items:?}"),
            Self::Task(..) => write!(f, "task"),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::string(value)
    }
}

/// An instance of a class.
#[derive(Debug, Clone, Default)]
pub struct Object {
    class: Box<str>,
    fields: HashMap<Box<str>, Value>,
    /// The contents of the object when used as a collection.
    pub items: Vec<Value>,
}

impl Object {
    pub fn new(class: &str) -> Self {
        Self {
            class: class.into(),
            ..Self::default()
        }
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    /// Get a field. Unset fields are null.
    pub fn get(&self, name: &str) -> Value {
        self.fields.get(name).cloned().unwrap_or(Value::Null)
    }

    pub fn set(&mut self, name: &str, value: Value) {
        self.fields.insert(name.into(), value);
    }

    fn field_mut(&mut self, name: &str) -> &mut Value {
        self.fields.entry(name.into()).or_insert(Value::Null)
    }
}

/// An instance of a value type.
#[derive(Debug, Clone, PartialEq)]
pub struct Struct {
    name: Box<str>,
    fields: Vec<(Box<str>, Value)>,
}

impl Struct {
    pub fn new<'a>(name: &str, fields: impl IntoIterator<Item = (&'a str, Value)>) -> Self {
        Self {
            name: name.into(),
            fields: fields
                .into_iter()
                .map(|(name, value)| (name.into(), value))
                .collect(),
        }
    }

    /// Get a field. Unset fields are null.
    pub fn get(&self, name: &str) -> Value {
        self.fields
            .iter()
            .find(|(n, _)| &**n == name)
            .map(|(_, value)| value.clone())
            .unwrap_or(Value::Null)
    }

    fn field_mut(&mut self, name: &str) -> &mut Value {
        let index = match self.fields.iter().position(|(n, _)| &**n == name) {
            Some(index) => index,
            None => {
                self.fields.push((name.into(), Value::Null));
                self.fields.len() - 1
            }
        };

        &mut self.fields[index].1
    }
}

impl From<Struct> for Value {
    fn from(value: Struct) -> Self {
        Self::Struct(Box::new(value))
    }
}

/// An array of one or more dimensions.
#[derive(Debug, Clone)]
pub struct Array {
    dims: Vec<usize>,
    items: Vec<Value>,
}

impl Array {
    pub fn items(&self) -> &[Value] {
        &self.items
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Compute the row-major position of an element.
    pub(crate) fn flat(&self, indices: &[Value]) -> Result<usize, VmErrorKind> {
        if indices.len() != self.dims.len() {
            return Err(VmErrorKind::InvalidAddress {
                message: format!(
                    "{} indices into array of rank {}",
                    indices.len(),
                    self.dims.len()
                )
                .into(),
            });
        }

        let mut flat = 0;

        for (index, dim) in indices.iter().zip(&self.dims) {
            let index = index.as_int()?;

            let Some(i) = usize::try_from(index).ok().filter(|i| i < dim) else {
                return Err(VmErrorKind::IndexOutOfRange {
                    index,
                    length: *dim,
                });
            };

            flat = flat * dim + i;
        }

        Ok(flat)
    }

    pub(crate) fn get(&self, index: usize) -> Value {
        self.items.get(index).cloned().unwrap_or(Value::Null)
    }

    fn item_mut(&mut self, index: usize) -> Result<&mut Value, VmErrorKind> {
        let length = self.items.len();

        self.items
            .get_mut(index)
            .ok_or(VmErrorKind::IndexOutOfRange {
                index: index as i64,
                length,
            })
    }
}

/// The address of storage.
#[derive(Debug, Clone)]
pub enum Address {
    Local(LocalId),
    Param(usize),
    This,
    Static(Box<str>),
    Element {
        array: Rc<RefCell<Array>>,
        index: usize,
    },
    Field {
        object: Rc<RefCell<Object>>,
        name: Box<str>,
    },
    /// A field of the value type stored at the base address.
    FieldOf {
        base: Box<Address>,
        name: Box<str>,
    },
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Local(a), Self::Local(b)) => a == b,
            (Self::Param(a), Self::Param(b)) => a == b,
            (Self::This, Self::This) => true,
            (Self::Static(a), Self::Static(b)) => a == b,
            (
                Self::Element { array, index },
                Self::Element {
                    array: other,
                    index: i,
                },
            ) => Rc::ptr_eq(array, other) && index == i,
            (
                Self::Field { object, name },
                Self::Field {
                    object: other,
                    name: n,
                },
            ) => Rc::ptr_eq(object, other) && name == n,
            (Self::FieldOf { base, name }, Self::FieldOf { base: b, name: n }) => {
                base == b && name == n
            }
            _ => false,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(local) => write!(f, "{local}"),
            Self::Param(param) => write!(f, "arg{param}"),
            Self::This => write!(f, "this"),
            Self::Static(name) => write!(f, "{name}"),
            Self::Element { index, .. } => write!(f, "[{index}]"),
            Self::Field { object, name } => write!(f, "{}.{name}", object.borrow().class),
            Self::FieldOf { base, name } => write!(f, "{base}.{name}"),
        }
    }
}

/// A storage location being written to.
enum Storage<'a> {
    Frame(&'a mut Value),
    Element(&'a RefCell<Array>, usize),
    Field(&'a RefCell<Object>, &'a str),
}

impl Address {
    /// Write through the address, resolving variables of the activation
    /// through `env`.
    pub(crate) fn store(&self, env: &mut Env, value: Value) -> Result<(), VmErrorKind> {
        let mut value = Some(value);

        self.with_storage(env, &mut |slot| {
            if let Some(value) = value.take() {
                *slot = value;
            }

            Ok(())
        })
    }

    /// Read through the address.
    pub(crate) fn load(&self, env: &Env) -> Result<Value, VmErrorKind> {
        match self {
            Self::Local(local) => Ok(env.local(*local)),
            Self::Param(param) => Ok(env.param(*param)),
            Self::This => env.this().cloned(),
            Self::Static(name) => Ok(env.static_value(name)),
            Self::Element { array, index } => Ok(array.borrow().get(*index)),
            Self::Field { object, name } => Ok(object.borrow().get(name)),
            Self::FieldOf { base, name } => base.load(env)?.field(name),
        }
    }

    fn with_storage(
        &self,
        env: &mut Env,
        f: &mut dyn FnMut(&mut Value) -> Result<(), VmErrorKind>,
    ) -> Result<(), VmErrorKind> {
        let storage = match self {
            Self::Local(local) => Storage::Frame(env.local_mut(*local)),
            Self::Param(param) => Storage::Frame(env.param_mut(*param)),
            Self::This => Storage::Frame(env.this_mut()?),
            Self::Static(name) => Storage::Frame(env.static_mut(name)),
            Self::Element { array, index } => Storage::Element(array, *index),
            Self::Field { object, name } => Storage::Field(object, name),
            Self::FieldOf { base, name } => {
                return base.with_storage(env, &mut |value| match value {
                    Value::Struct(s) => f(s.field_mut(name)),
                    other => Err(other.mismatch("struct")),
                });
            }
        };

        match storage {
            Storage::Frame(value) => f(value),
            Storage::Element(array, index) => f(array.borrow_mut().item_mut(index)?),
            Storage::Field(object, name) => f(object.borrow_mut().field_mut(name)),
        }
    }
}

#[derive(Clone)]
enum TaskState {
    Pending { function: Function, args: Rc<[Value]> },
    Complete(Value),
}

/// An awaitable task.
///
/// A deferred task runs its function when it is first awaited.
#[derive(Clone)]
pub struct Task {
    state: Rc<RefCell<TaskState>>,
}

impl Task {
    /// A task which has already completed with the given value.
    pub fn ready(value: Value) -> Self {
        Self {
            state: Rc::new(RefCell::new(TaskState::Complete(value))),
        }
    }

    pub(crate) fn deferred(function: Function, args: &[Value]) -> Self {
        Self {
            state: Rc::new(RefCell::new(TaskState::Pending {
                function,
                args: args.into(),
            })),
        }
    }

    /// Run the task to completion.
    pub(crate) fn complete(&self, env: &mut Env) -> Result<Value, VmError> {
        let state = self.state.borrow().clone();

        match state {
            TaskState::Complete(value) => Ok(value),
            TaskState::Pending { function, args } => {
                let value = function(env, &args[..])?;
                *self.state.borrow_mut() = TaskState::Complete(value.clone());
                Ok(value)
            }
        }
    }
}
