//! A reference stack machine for lowered methods.
//!
//! The machine executes the [Operation][crate::compile::Operation] sequence
//! of a [Lowered][crate::Lowered] method against host functions registered in
//! a [Context], and is used to observe the evaluation order and spilling
//! behavior of lowered code.

mod context;
mod env;
mod value;
mod vm;
mod vm_error;

pub use self::context::{Context, Function};
pub use self::env::Env;
pub use self::value::{Address, Array, Object, Struct, Task, Value};
pub use self::vm::{Vm, VmHalt};
pub use self::vm_error::{VmError, VmErrorKind};
