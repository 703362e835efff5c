//! Lowering of expressions containing suspension points for a stack machine.
//!
//! A suspension (`await`) discards the operand stack of the method being
//! executed. This crate rewrites bound method bodies into a linear sequence of
//! [Operation][compile::Operation]s in which every value that is live across a
//! suspension is spilled into a durable slot of the method's state record,
//! while preserving the left-to-right evaluation order of the source language.
//!
//! ```
//! use spill::compile::{self, Options};
//! use spill::hir::{Builder, Type};
//! use spill::runtime::{Context, Value, Vm};
//!
//! let b = Builder::new("Main");
//! let f = |n| b.await_(b.call("F", vec![b.int(n)], Type::task(Type::Int)));
//! let sum = b.add(f(1), f(2));
//! let method = b.finish(vec![b.ret(sum)]);
//!
//! let lowered = compile::lower(&method, &Options::default())?;
//!
//! let mut context = Context::new();
//! context.deferred("F", |_, args| Ok(args[0].clone()));
//!
//! let mut vm = Vm::new(&context, &lowered);
//! assert_eq!(vm.run()?, Value::Int(3));
//! # Ok::<_, Box<dyn std::error::Error>>(())
//! ```
#![allow(clippy::new_without_default)]

pub mod compile;
pub mod diagnostics;
pub mod hir;
pub mod runtime;
mod span;

pub use self::compile::{lower, lower_all, Lowered, Options};
pub use self::diagnostics::{Diagnostic, Diagnostics};
pub use self::span::{Span, Spanned};
