use hashbrown::HashMap;

use crate::hir::LocalId;
use crate::runtime::{Address, Value, VmError, VmErrorKind};

/// The variables of the executing activation, handed to host functions.
///
/// Locals and parameters live here rather than on the operand stack, so they
/// survive suspensions.
#[derive(Debug, Default)]
pub struct Env {
    params: Vec<Value>,
    locals: Vec<Value>,
    this: Option<Value>,
    statics: HashMap<Box<str>, Value>,
    output: Vec<String>,
}

impl Env {
    pub(crate) fn new(statics: HashMap<Box<str>, Value>) -> Self {
        Self {
            statics,
            ..Self::default()
        }
    }

    /// Append a line to the output log.
    pub fn log(&mut self, line: impl Into<String>) {
        let line = line.into();
        tracing::trace!(%line, "output");
        self.output.push(line);
    }

    /// The lines logged so far.
    pub fn output(&self) -> &[String] {
        &self.output
    }

    pub(crate) fn into_output(self) -> Vec<String> {
        self.output
    }

    /// Read through an address.
    pub fn load(&self, address: &Address) -> Result<Value, VmError> {
        Ok(address.load(self)?)
    }

    /// Write through an address.
    pub fn store(&mut self, address: &Address, value: Value) -> Result<(), VmError> {
        Ok(address.store(self, value)?)
    }

    /// Get the value of a local. Locals which were never assigned are null.
    pub fn local(&self, local: LocalId) -> Value {
        self.locals
            .get(local.index())
            .cloned()
            .unwrap_or(Value::Null)
    }

    pub fn set_local(&mut self, local: LocalId, value: Value) {
        *self.local_mut(local) = value;
    }

    pub(crate) fn local_mut(&mut self, local: LocalId) -> &mut Value {
        grow(&mut self.locals, local.index())
    }

    pub fn param(&self, param: usize) -> Value {
        self.params.get(param).cloned().unwrap_or(Value::Null)
    }

    pub fn set_param(&mut self, param: usize, value: Value) {
        *self.param_mut(param) = value;
    }

    pub(crate) fn param_mut(&mut self, param: usize) -> &mut Value {
        grow(&mut self.params, param)
    }

    pub(crate) fn this(&self) -> Result<&Value, VmErrorKind> {
        self.this.as_ref().ok_or_else(no_this)
    }

    pub(crate) fn this_mut(&mut self) -> Result<&mut Value, VmErrorKind> {
        self.this.as_mut().ok_or_else(no_this)
    }

    pub(crate) fn set_this(&mut self, value: Value) {
        self.this = Some(value);
    }

    /// Get the value of a static field. Unset fields are null.
    pub fn static_value(&self, name: &str) -> Value {
        self.statics.get(name).cloned().unwrap_or(Value::Null)
    }

    pub(crate) fn static_mut(&mut self, name: &str) -> &mut Value {
        self.statics.entry(name.into()).or_insert(Value::Null)
    }
}

fn grow(values: &mut Vec<Value>, index: usize) -> &mut Value {
    if values.len() <= index {
        values.resize(index + 1, Value::Null);
    }

    &mut values[index]
}

fn no_this() -> VmErrorKind {
    VmErrorKind::InvalidAddress {
        message: "method has no `this`".into(),
    }
}
