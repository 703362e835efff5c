use static_assertions::assert_impl_all;

use spill::compile::{self, ErrorKind, LoweringMode, Options};
use spill::diagnostics::Diagnostic;
use spill::hir::{Builder, Expr, Method, Type};
use spill::runtime::{Context, Value, Vm, VmHalt};
use spill::{Diagnostics, Lowered};

assert_impl_all!(Lowered: Send, Sync, Clone);
assert_impl_all!(compile::Error: Send, Sync, std::error::Error);

fn f(b: &Builder, n: i64) -> Expr {
    b.await_(b.call("F", vec![b.int(n)], Type::task(Type::Int)))
}

fn sum() -> Method {
    let b = Builder::new("Sum");
    let get = b.call("Get", vec![b.int(1)], Type::Int);
    let sum = b.add(get, b.add(f(&b, 2), f(&b, 3)));
    b.finish(vec![b.ret(sum)])
}

fn context() -> Context {
    let mut context = Context::new();
    context.function("Get", |_, args| Ok(args[0].clone()));
    context.deferred("F", |_, args| Ok(args[0].clone()));
    context
}

#[test]
fn serde_roundtrip() {
    let lowered = compile::lower(&sum(), &Options::default()).unwrap();

    let json = serde_json::to_string(&lowered).unwrap();
    let back: Lowered = serde_json::from_str(&json).unwrap();

    assert_eq!(back, lowered);
    assert_eq!(back.to_string(), lowered.to_string());
}

#[test]
fn lower_all_isolates_failures() {
    let b = Builder::new("Broken");
    let init = b.object_init(b.new_object("C", vec![]), vec![("X", f(&b, 1))]);
    let broken = b.finish(vec![b.stmt(init)]);

    let methods = [sum(), broken, sum()];
    let options = Options::with_mode(LoweringMode::Runtime);

    let mut diagnostics = Diagnostics::new();
    let lowered = compile::lower_all(&methods, &options, &mut diagnostics);

    assert_eq!(lowered.len(), 2);
    assert!(lowered.iter().all(|l| l.name() == "Sum"));
    assert!(diagnostics.has_error());
    assert!(!diagnostics.has_internal());

    let [Diagnostic::Error(error)] = diagnostics.diagnostics() else {
        panic!("expected a single error: {:?}", diagnostics.diagnostics());
    };

    assert_eq!(error.method(), "Broken");
    assert!(matches!(
        error.kind(),
        ErrorKind::UnsupportedConstructInMode { .. }
    ));

    // The same method lowers fine in the default mode.
    let mut diagnostics = Diagnostics::new();
    let lowered = compile::lower_all(&methods, &Options::default(), &mut diagnostics);
    assert_eq!(lowered.len(), 3);
    assert!(diagnostics.is_empty());
}

#[test]
fn step_through_suspensions() {
    let context = context();

    for mode in [LoweringMode::StateMachine, LoweringMode::Runtime] {
        let lowered = compile::lower(&sum(), &Options::with_mode(mode)).unwrap();
        assert_eq!(lowered.states(), 2);

        let mut vm = Vm::new(&context, &lowered);
        assert_eq!(vm.execute().unwrap(), VmHalt::Awaited { state: 0 });
        vm.resume().unwrap();
        assert_eq!(vm.execute().unwrap(), VmHalt::Awaited { state: 1 });

        // Resuming twice without executing is an error.
        vm.resume().unwrap();
        assert!(vm.resume().is_err());

        assert_eq!(vm.execute().unwrap(), VmHalt::Exited(Value::Int(6)));
        assert_eq!(vm.suspensions(), 2);
    }
}

#[test]
fn options_from_strings() {
    let mut options = Options::default();

    for option in ["mode=runtime", "reuse-slots=false"] {
        options.parse_option(option).unwrap();
    }

    let lowered = compile::lower(&sum(), &options).unwrap();
    assert_eq!(lowered.mode(), LoweringMode::Runtime);
    assert!(lowered.slots().is_empty());

    let context = context();
    let mut vm = Vm::new(&context, &lowered);
    assert_eq!(vm.run().unwrap(), Value::Int(6));
}
