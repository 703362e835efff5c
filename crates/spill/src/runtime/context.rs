use std::rc::Rc;

use hashbrown::HashMap;

use crate::runtime::{Env, Object, Task, Value, VmError};

/// A host function callable from lowered code.
pub type Function = Rc<dyn Fn(&mut Env, &[Value]) -> Result<Value, VmError>>;

/// The host functions and types available to a lowered method.
///
/// Instance methods are looked up as `Class.name` before falling back to
/// `name`. Property accessors are functions named `get_Name` and `set_Name`,
/// and a function named after a class acts as its constructor.
#[derive(Default)]
pub struct Context {
    functions: HashMap<Box<str>, Function>,
    classes: HashMap<Box<str>, Vec<(Box<str>, Value)>>,
    statics: HashMap<Box<str>, Value>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function which runs when it is called.
    pub fn function<F>(&mut self, name: &str, f: F)
    where
        F: 'static + Fn(&mut Env, &[Value]) -> Result<Value, VmError>,
    {
        self.functions.insert(name.into(), Rc::new(f));
    }

    /// Register a function returning a task, which runs when the task is
    /// awaited.
    pub fn deferred<F>(&mut self, name: &str, f: F)
    where
        F: 'static + Fn(&mut Env, &[Value]) -> Result<Value, VmError>,
    {
        let f: Function = Rc::new(f);

        self.function(name, move |_, args| {
            Ok(Value::Task(Task::deferred(f.clone(), args)))
        });
    }

    /// Declare a class with the given field defaults.
    pub fn class<'a>(&mut self, name: &str, fields: impl IntoIterator<Item = (&'a str, Value)>) {
        let fields = fields
            .into_iter()
            .map(|(name, value)| (name.into(), value))
            .collect();

        self.classes.insert(name.into(), fields);
    }

    /// Set the initial value of a static field.
    pub fn static_field(&mut self, name: &str, value: Value) {
        self.statics.insert(name.into(), value);
    }

    pub(crate) fn lookup(&self, name: &str) -> Option<&Function> {
        self.functions.get(name)
    }

    /// Look up an instance method, preferring the one declared on the class
    /// of the receiver.
    pub(crate) fn lookup_method(&self, receiver: Option<&Value>, name: &str) -> Option<&Function> {
        if let Some(Value::Object(object)) = receiver {
            let qualified = format!("{}.{name}", object.borrow().class());

            if let Some(function) = self.functions.get(qualified.as_str()) {
                return Some(function);
            }
        }

        self.functions.get(name)
    }

    pub(crate) fn instantiate(&self, class: &str) -> Object {
        let mut object = Object::new(class);

        if let Some(fields) = self.classes.get(class) {
            for (name, value) in fields {
                object.set(name, value.clone());
            }
        }

        object
    }

    pub(crate) fn statics(&self) -> &HashMap<Box<str>, Value> {
        &self.statics
    }
}
