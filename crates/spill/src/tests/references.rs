prelude!();

fn references() -> Context {
    let mut context = context();

    // Inc(ref target, n)
    context.function("Inc", |env, args| {
        let address = args[0].as_address()?;
        let value = env.load(address)?.as_int()?;
        env.store(address, Value::Int(value + args[1].as_int()?))?;
        Ok(Value::Unit)
    });

    // Set(ref target, value)
    context.function("Set", |env, args| {
        env.store(args[0].as_address()?, args[1].clone())?;
        Ok(Value::Unit)
    });

    context.function("GetRef", |env, _| {
        env.log("GetRef");
        Ok(Value::Address(Address::Static("S".into())))
    });

    context.function("get_P", |env, _| {
        env.log("get P");
        Ok(Value::Address(Address::Static("S".into())))
    });

    context.function("SumSpan", |_, args| {
        let Value::Span(items) = &args[0] else {
            return Err(VmError::panic("expected a span"));
        };

        let sum = items
            .borrow()
            .iter()
            .map(Value::as_int)
            .sum::<Result<i64, _>>()?;

        Ok(Value::Int(sum))
    });

    context.static_field("S", Value::Int(0));
    context
}

fn position(lowered: &Lowered, f: impl Fn(&Operation) -> bool) -> usize {
    match lowered.operations().position(f) {
        Some(position) => position,
        None => panic!("operation not found in:\n{lowered}"),
    }
}

#[test]
fn test_local_address_taken_after_suspension() {
    let b = Builder::new("Main");
    let c = b.declare("c", Type::Int);
    let f = b.await_(b.call("F", vec![b.int(2)], Type::task(Type::Int)));

    let body = vec![
        b.let_(c, b.int(1)),
        b.stmt(b.call("Inc", vec![b.ref_(b.local(c)), f], Type::Unit)),
        b.ret(b.local(c)),
    ];

    let method = b.finish(body);
    let lowered = lower(&method);

    let suspend = position(&lowered, |op| {
        matches!(op, Operation::EnterSuspension { .. })
    });

    let address = position(&lowered, |op| {
        matches!(
            op,
            Operation::Evaluate {
                fragment: Fragment::AddressOfLocal(..),
                ..
            }
        )
    });

    assert!(suspend < address);
    assert!(lowered.slots().is_empty());

    let run = run(&references(), &method).unwrap();
    assert_eq!(run.value, Value::Int(3));
}

#[test]
fn test_element_address_after_suspension() {
    let b = Builder::new("Main");
    let arr = b.declare("arr", Type::array(Type::Int));

    let index = b.call("Get", vec![b.int(1)], Type::Int);
    let target = b.ref_(b.index(b.local(arr), vec![index]));
    let f = b.await_(b.call("F", vec![b.int(10)], Type::task(Type::Int)));

    let body = vec![
        b.let_(arr, b.array(Type::Int, vec![b.int(1), b.int(2)])),
        b.stmt(b.call("Inc", vec![target, f], Type::Unit)),
        b.ret(b.index(b.local(arr), vec![b.int(1)])),
    ];

    let run = run(&references(), &b.finish(body)).unwrap();
    assert_eq!(run.value, Value::Int(12));
    assert_eq!(run.output, ["Get(1)", "call F(10)", "F(10)"]);
}

#[test]
fn test_out_of_range_fails_before_suspension() {
    let b = Builder::new("Main");
    let arr = b.declare("arr", Type::array(Type::Int));

    let target = b.ref_(b.index(b.local(arr), vec![b.int(5)]));
    let f = b.await_(b.call("F", vec![b.int(1)], Type::task(Type::Int)));

    let body = vec![
        b.let_(arr, b.array(Type::Int, vec![b.int(1), b.int(2)])),
        b.stmt(b.call("Inc", vec![target, f], Type::Unit)),
    ];

    let lowered = lower(&b.finish(body));

    let read = position(&lowered, |op| {
        matches!(
            op,
            Operation::Evaluate {
                fragment: Fragment::LoadElement { .. },
                ..
            }
        )
    });

    let call = position(&lowered, |op| {
        matches!(
            op,
            Operation::Evaluate {
                fragment: Fragment::Call { function, .. },
                ..
            } if &**function == "F"
        )
    });

    assert!(read < call);

    assert_vm_error!(
        references(),
        lowered,
        VmErrorKind::IndexOutOfRange { index: 5, length: 2 }
    );
}

#[test]
fn test_ref_after_await_in_parameter_order() {
    let b = Builder::new("Main");
    let f = b.await_(b.call("F", vec![b.int(1)], Type::task(Type::Int)));
    let p = b.ref_property("P", Type::Int);

    // Set(value: await F(1), target: ref P)
    let args = vec![b.named("value", 1, f), b.named("target", 0, b.ref_(p))];

    let body = vec![
        b.stmt(b.call_with(None, "Set", args, Type::Unit)),
        b.ret(b.static_field("S", Type::Int)),
    ];

    let run = run(&references(), &b.finish(body)).unwrap();
    assert_eq!(run.value, Value::Int(1));
    assert_eq!(run.output, ["call F(1)", "F(1)", "get P"]);
}

#[test]
fn test_ref_this_of_struct() {
    let b = Builder::instance("M", Type::struct_("S"));
    let f = b.await_(b.call("F", vec![b.int(1)], Type::task(Type::Int)));

    let body = vec![
        b.stmt(b.call("SetX", vec![b.ref_(b.this()), f], Type::Unit)),
        b.ret(b.field(b.this(), "x", Type::Int)),
    ];

    let method = b.finish(body);

    let mut context = references();

    context.function("SetX", |env, args| {
        let address = Address::FieldOf {
            base: Box::new(args[0].as_address()?.clone()),
            name: "x".into(),
        };

        env.store(&address, args[1].clone())?;
        Ok(Value::Unit)
    });

    for mode in [LoweringMode::StateMachine, LoweringMode::Runtime] {
        let lowered = lower_in(mode, &method).unwrap();
        let this = Value::from(Struct::new("S", [("x", Value::Int(0))]));

        let run = execute(&context, &lowered, |vm| vm.with_this(this)).unwrap();
        assert_eq!(run.value, Value::Int(1));
    }
}

#[test]
fn test_assign_through_returned_reference() {
    let b = Builder::new("Main");
    let target = b.ref_call("GetRef", vec![], Type::Int);
    let value = b.call("Get", vec![b.int(5)], Type::Int);

    let body = vec![
        b.stmt(b.assign(target, value)),
        b.ret(b.static_field("S", Type::Int)),
    ];

    let run = run(&references(), &b.finish(body)).unwrap();
    assert_eq!(run.value, Value::Int(5));
    assert_eq!(run.output, ["GetRef", "Get(5)"]);
}

#[test]
fn test_assign_through_returned_reference_across_await() {
    let b = Builder::new("Main");
    let target = b.ref_call("GetRef", vec![], Type::Int);
    let expected = target.span;
    let f = b.await_(b.call("F", vec![b.int(1)], Type::task(Type::Int)));
    let method = b.finish(vec![b.stmt(b.assign(target, f))]);

    assert_lower_error! {
        method,
        span,
        ErrorKind::UnpreservableReference { origin } => {
            assert_eq!(&*origin, "GetRef");
            assert_eq!(span, expected);
        }
    };
}

#[test]
fn test_returned_reference_argument_before_await() {
    let b = Builder::new("Main");
    let target = b.ref_call("GetRef", vec![], Type::Int);
    let expected = target.span;
    let f = b.await_(b.call("F", vec![b.int(1)], Type::task(Type::Int)));

    let call = b.call("Inc", vec![b.ref_(target), f], Type::Unit);
    let method = b.finish(vec![b.stmt(call)]);

    assert_lower_error! {
        method,
        span,
        ErrorKind::UnpreservableReference { origin } => {
            assert_eq!(&*origin, "GetRef");
            assert_eq!(span, expected);
        }
    };
}

#[test]
fn test_stackalloc_with_await_in_elements() {
    let b = Builder::new("Main");
    let f = b.await_(b.call("F", vec![b.int(2)], Type::task(Type::Int)));
    let alloc = b.stackalloc(Type::Int, vec![b.int(1), f]);
    let method = b.finish(vec![b.ret(b.call("SumSpan", vec![alloc], Type::Int))]);

    let run = run(&references(), &method).unwrap();
    assert_eq!(run.value, Value::Int(3));
}

#[test]
fn test_stackalloc_consumed_before_await() {
    let b = Builder::new("Main");
    let alloc = b.stackalloc(Type::Int, vec![b.int(1), b.int(2)]);
    let sum = b.call("SumSpan", vec![alloc], Type::Int);
    let f = b.await_(b.call("F", vec![sum], Type::task(Type::Int)));
    let method = b.finish(vec![b.ret(f)]);

    let run = run(&references(), &method).unwrap();
    assert_eq!(run.value, Value::Int(3));
    assert_eq!(run.output, ["call F(3)", "F(3)"]);
}

#[test]
fn test_stackalloc_across_await() {
    let b = Builder::new("Main");
    let alloc = b.stackalloc(Type::Int, vec![b.int(1), b.int(2)]);
    let f = b.await_(b.call("F", vec![b.int(3)], Type::task(Type::Int)));
    let expected = f.span;

    let call = b.call("Consume", vec![alloc, f], Type::Int);
    let method = b.finish(vec![b.ret(call)]);

    assert_lower_error! {
        method,
        span,
        ErrorKind::UnpreservableStackScopedStorage { ty } => {
            assert_eq!(ty, Type::span(Type::Int));
            assert_eq!(span, expected);
        }
    };

    assert_lower_error_in! {
        LoweringMode::Runtime,
        method,
        _,
        ErrorKind::UnpreservableStackScopedStorage { .. }
    };
}
