prelude!();

use crate::compile::{classify, Support};

const CONSTRUCTS: [Construct; 6] = [
    Construct::CompoundAssignmentTarget,
    Construct::ObjectInitializer,
    Construct::CollectionInitializer,
    Construct::ArgList,
    Construct::RefArgument,
    Construct::StructFieldAssignment,
];

/// Build a method which has to spill the given construct, returning it with
/// the span the rejection is reported at.
fn method_spilling(construct: Construct) -> (Method, Span) {
    let b = Builder::new("Spills");
    let f = b.await_(b.call("F", vec![b.int(1)], Type::task(Type::Int)));

    let (stmt, span) = match construct {
        Construct::CompoundAssignmentTarget => {
            let arr = b.declare("arr", Type::array(Type::Int));
            let target = b.index(b.local(arr), vec![b.int(0)]);
            let span = target.span;
            (b.stmt(b.compound(target, BinOp::Add, f)), span)
        }
        Construct::ObjectInitializer => {
            let init = b.object_init(b.new_object("C", vec![]), vec![("X", f)]);
            let span = init.span;
            (b.stmt(init), span)
        }
        Construct::CollectionInitializer => {
            let init = b.collection_init(b.new_object("List", vec![]), vec![vec![f]]);
            let span = init.span;
            (b.stmt(init), span)
        }
        Construct::ArgList => {
            let call = b.call("Log", vec![b.arglist(vec![b.int(0), f])], Type::Unit);
            let span = call.span;
            (b.stmt(call), span)
        }
        Construct::RefArgument => {
            let arr = b.declare("arr", Type::array(Type::Int));
            let arg = b.ref_(b.index(b.local(arr), vec![b.int(0)]));
            let span = arg.span;
            (b.stmt(b.call("M", vec![arg, f], Type::Unit)), span)
        }
        Construct::StructFieldAssignment => {
            let arr = b.declare("arr", Type::array(Type::struct_("S")));
            let element = b.index(b.local(arr), vec![b.int(0)]);
            let target = b.field(element, "x", Type::Int);
            let span = target.span;
            (b.stmt(b.assign(target, f)), span)
        }
    };

    (b.finish(vec![stmt]), span)
}

#[test]
fn test_state_machine_supports_every_construct() {
    for construct in CONSTRUCTS {
        assert_eq!(
            classify(LoweringMode::StateMachine, construct),
            Support::Supported
        );

        let (method, _) = method_spilling(construct);

        if let Err(error) = lower_in(LoweringMode::StateMachine, &method) {
            panic!("{construct}: {error}");
        }
    }
}

#[test]
fn test_runtime_rejects_every_construct() {
    for construct in CONSTRUCTS {
        assert!(matches!(
            classify(LoweringMode::Runtime, construct),
            Support::Unsupported(..)
        ));

        let (method, expected) = method_spilling(construct);

        assert_lower_error_in! {
            LoweringMode::Runtime,
            method,
            span,
            ErrorKind::UnsupportedConstructInMode { method: name, construct: actual, mode } => {
                assert_eq!(&*name, "Spills");
                assert_eq!(actual, construct);
                assert_eq!(mode, LoweringMode::Runtime);
                assert_eq!(span, expected);
            }
        };
    }
}

#[test]
fn test_runtime_error_message() {
    let (method, _) = method_spilling(Construct::ArgList);
    let error = lower_in(LoweringMode::Runtime, &method).unwrap_err();

    assert_eq!(
        error.to_string(),
        "Method `Spills` spills an __arglist across an await, which is not supported in runtime mode; opt the method out of runtime lowering to compile it"
    );
}

#[test]
fn test_runtime_spills_into_temps() {
    let b = Builder::new("Main");
    let get = b.call("Get", vec![b.int(1)], Type::Int);
    let f = b.await_(b.call("F", vec![b.int(2)], Type::task(Type::Int)));
    let method = b.finish(vec![b.stmt(b.call("Write", vec![get, f], Type::Unit))]);

    let lowered = lower_in(LoweringMode::Runtime, &method).unwrap();
    assert_eq!(lowered.mode(), LoweringMode::Runtime);
    assert!(lowered.slots().is_empty());
    assert!(lowered.temps() > 0);

    let run = execute(&context(), &lowered, |vm| vm).unwrap();
    assert_eq!(run.output, ["Get(1)", "call F(2)", "F(2)", "1 2"]);

    let lowered = lower(&method);
    assert_eq!(lowered.slots().len(), 1);
}

#[test]
fn test_runtime_accepts_compound_local() {
    let b = Builder::new("Main");
    let c = b.declare("c", Type::Int);
    let f = b.await_(b.call("F", vec![b.int(2)], Type::task(Type::Int)));

    let body = vec![
        b.let_(c, b.int(1)),
        b.stmt(b.compound(b.local(c), BinOp::Add, f)),
        b.ret(b.local(c)),
    ];

    let method = b.finish(body);
    assert!(lower_in(LoweringMode::Runtime, &method).is_ok());

    let run = run(&context(), &method).unwrap();
    assert_eq!(run.value, Value::Int(3));
}

#[test]
fn test_arglist_across_suspension() {
    let b = Builder::new("Main");
    let get = b.call("Get", vec![b.int(0)], Type::Int);
    let f = b.await_(b.call("F", vec![b.int(1)], Type::task(Type::Int)));
    let call = b.call("Log", vec![b.arglist(vec![get, f])], Type::Unit);
    let method = b.finish(vec![b.stmt(call)]);

    let mut context = context();

    context.function("Log", |env, args| {
        let Value::ArgList(items) = &args[0] else {
            return Err(VmError::panic("expected an __arglist"));
        };

        let line = items
            .iter()
            .map(|item| item.to_string())
            .collect::<Vec<_>>()
            .join(" ");

        env.log(format!("Log({line})"));
        Ok(Value::Unit)
    });

    let lowered = lower(&method);
    assert_eq!(lowered.slots().len(), 1);

    let run = execute(&context, &lowered, |vm| vm).unwrap();
    assert_eq!(run.output, ["Get(0)", "call F(1)", "F(1)", "Log(0 1)"]);
    assert_eq!(run.suspensions, 1);
}

#[test]
fn test_runtime_property_compound_assign() {
    let b = Builder::new("Main");
    let f = b.await_(b.call("F", vec![b.int(2)], Type::task(Type::Int)));

    let body = vec![
        b.stmt(b.compound(b.property(None, "P", Type::Int), BinOp::Add, f)),
        b.ret(b.property(None, "P", Type::Int)),
    ];

    let method = b.finish(body);

    let mut context = context();
    context.static_field("P", Value::Int(10));

    context.function("get_P", |env, _| Ok(env.static_value("P")));

    context.function("set_P", |env, args| {
        env.store(&Address::Static("P".into()), args[0].clone())?;
        Ok(Value::Unit)
    });

    // A static property has no address-determining parts to spill.
    let lowered = lower_in(LoweringMode::Runtime, &method).unwrap();
    let run = execute(&context, &lowered, |vm| vm).unwrap();
    assert_eq!(run.value, Value::Int(12));
    assert_eq!(run.output, ["call F(2)", "F(2)"]);

    // The receiver of an instance property does have to be spilled.
    let b = Builder::new("Main");
    let obj = b.declare("obj", Type::class("C"));
    let target = b.property(Some(b.local(obj)), "P", Type::Int);
    let expected = target.span;
    let f = b.await_(b.call("F", vec![b.int(2)], Type::task(Type::Int)));

    let method = b.finish(vec![
        b.let_(obj, b.new_object("C", vec![])),
        b.stmt(b.compound(target, BinOp::Add, f)),
    ]);

    assert!(lower_in(LoweringMode::StateMachine, &method).is_ok());

    assert_lower_error_in! {
        LoweringMode::Runtime,
        method,
        span,
        ErrorKind::UnsupportedConstructInMode { construct, .. } => {
            assert_eq!(construct, Construct::CompoundAssignmentTarget);
            assert_eq!(span, expected);
        }
    };
}

#[test]
fn test_parse_options() {
    let mut options = Options::default();
    assert_eq!(options.lowering_mode(), LoweringMode::StateMachine);

    options.parse_option("mode=runtime").unwrap();
    assert_eq!(options.lowering_mode(), LoweringMode::Runtime);

    options.parse_option("mode=state-machine").unwrap();
    assert_eq!(options.lowering_mode(), LoweringMode::StateMachine);

    options.parse_option("reuse-slots=false").unwrap();
    assert!(!options.reuse_slots);
    options.parse_option("reuse-slots").unwrap();
    assert!(options.reuse_slots);

    options.parse_option("release-slots=false").unwrap();
    assert!(!options.release_slots);
    options.parse_option("verify=false").unwrap();
    assert!(!options.verify);

    let error = options.parse_option("mode=eager").unwrap_err();
    assert_eq!(error.to_string(), "Unsupported lowering option `mode=eager`");
    assert!(options.parse_option("mode").is_err());
    assert!(options.parse_option("inline").is_err());
}

#[test]
fn test_mode_names() {
    for mode in [LoweringMode::StateMachine, LoweringMode::Runtime] {
        assert_eq!(mode.to_string().parse::<LoweringMode>(), Ok(mode));
    }

    let error = "fibers".parse::<LoweringMode>().unwrap_err();
    assert_eq!(error.to_string(), "Unknown lowering mode");
    assert!(!LoweringMode::StateMachine.preserves_temps());
    assert!(LoweringMode::Runtime.preserves_temps());
}
