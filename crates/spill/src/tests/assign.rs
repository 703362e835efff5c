prelude!();

#[test]
fn test_element_index_before_value() {
    let b = Builder::new("Main");
    let arr = b.declare("arr", Type::array(Type::Int));

    let index = b.call("Get", vec![b.int(0)], Type::Int);
    let value = b.await_(b.call("F", vec![b.int(5)], Type::task(Type::Int)));

    let body = vec![
        b.let_(arr, b.array(Type::Int, vec![b.int(0), b.int(0)])),
        b.stmt(b.assign(b.index(b.local(arr), vec![index]), value)),
        b.ret(b.index(b.local(arr), vec![b.int(0)])),
    ];

    let run = run(&context(), &b.finish(body)).unwrap();
    assert_eq!(run.value, Value::Int(5));
    assert_eq!(run.output, ["Get(0)", "call F(5)", "F(5)"]);
}

#[test]
fn test_chained_assign() {
    let b = Builder::new("Main");
    let x = b.declare("x", Type::Int);
    let y = b.declare("y", Type::Int);
    let f = b.await_(b.call("F", vec![b.int(3)], Type::task(Type::Int)));

    let body = vec![
        b.stmt(b.assign(b.local(x), b.assign(b.local(y), f))),
        b.ret(b.add(b.local(x), b.local(y))),
    ];

    let run = run(&context(), &b.finish(body)).unwrap();
    assert_eq!(run.value, Value::Int(6));
}

#[test]
fn test_named_arguments_in_written_order() {
    let b = Builder::new("Main");
    let get = b.call("Get", vec![b.int(2)], Type::Int);
    let f = b.await_(b.call("F", vec![b.int(1)], Type::task(Type::Int)));

    let args = vec![b.named("y", 1, get), b.named("x", 0, f)];
    let call = b.call_with(None, "Write", args, Type::Unit);
    let method = b.finish(vec![b.stmt(call)]);

    let run = run(&context(), &method).unwrap();
    assert_eq!(run.output, ["Get(2)", "call F(1)", "F(1)", "1 2"]);
}

#[test]
fn test_named_arguments_without_suspension() {
    let b = Builder::new("Main");
    let get = b.call("Get", vec![b.int(2)], Type::Int);

    let args = vec![b.named("y", 1, get), b.named("x", 0, b.int(1))];
    let call = b.call_with(None, "Write", args, Type::Unit);
    let method = b.finish(vec![b.stmt(call)]);

    let run = run(&context(), &method).unwrap();
    assert_eq!(run.output, ["Get(2)", "1 2"]);
    assert_eq!(run.suspensions, 0);
}

#[test]
fn test_compound_reads_local_before_suspension() {
    let b = Builder::new("Main");
    let c = b.declare("c", Type::Int);
    let bump = b.await_(b.call("Bump", vec![], Type::task(Type::Int)));

    let body = vec![
        b.let_(c, b.int(1)),
        b.stmt(b.compound(b.local(c), BinOp::Add, bump)),
        b.ret(b.local(c)),
    ];

    let mut context = context();

    context.deferred("Bump", |env, _| {
        env.set_local(LocalId::new(0), Value::Int(100));
        Ok(Value::Int(2))
    });

    // The old value of `c` is read before the task overwrites it.
    let run = run(&context, &b.finish(body)).unwrap();
    assert_eq!(run.value, Value::Int(3));
}

#[test]
fn test_lifted_compound() {
    let nullable = Type::nullable(Type::Int);

    for (initial, expected) in [(None, Value::Null), (Some(5), Value::Int(6))] {
        let b = Builder::new("Main");
        let n = b.declare("n", nullable.clone());
        let f = b.await_(b.call("F", vec![b.int(1)], Type::task(Type::Int)));

        let init = match initial {
            Some(value) => b.int(value),
            None => b.null(nullable.clone()),
        };

        let body = vec![
            b.let_(n, init),
            b.stmt(b.lifted_compound(b.local(n), BinOp::Add, f)),
            b.ret(b.local(n)),
        ];

        let run = run(&context(), &b.finish(body)).unwrap();
        assert_eq!(run.value, expected);
        assert_eq!(run.suspensions, 1);
    }
}

#[test]
fn test_class_field_assign() {
    let b = Builder::new("Main");
    let obj = b.declare("obj", Type::class("C"));
    let f = b.await_(b.call("F", vec![b.int(4)], Type::task(Type::Int)));

    let body = vec![
        b.let_(obj, b.new_object("C", vec![])),
        b.stmt(b.assign(b.field(b.local(obj), "x", Type::Int), f)),
        b.ret(b.field(b.local(obj), "x", Type::Int)),
    ];

    let run = run(&context(), &b.finish(body)).unwrap();
    assert_eq!(run.value, Value::Int(4));
}

#[test]
fn test_struct_local_field_assign() {
    let b = Builder::new("Main");
    let s = b.declare("s", Type::struct_("S"));
    let f = b.await_(b.call("F", vec![b.int(7)], Type::task(Type::Int)));

    let body = vec![
        b.let_(s, b.call("MakeS", vec![], Type::struct_("S"))),
        b.stmt(b.assign(b.field(b.local(s), "x", Type::Int), f)),
        b.ret(b.field(b.local(s), "x", Type::Int)),
    ];

    let mut context = context();

    context.function("MakeS", |_, _| {
        Ok(Struct::new("S", [("x", Value::Int(0))]).into())
    });

    let run = run(&context, &b.finish(body)).unwrap();
    assert_eq!(run.value, Value::Int(7));
}

#[test]
fn test_property_compound_assign() {
    let b = Builder::new("Main");
    let f = b.await_(b.call("F", vec![b.int(2)], Type::task(Type::Int)));

    let body = vec![
        b.stmt(b.compound(b.property(None, "P", Type::Int), BinOp::Add, f)),
        b.ret(b.property(None, "P", Type::Int)),
    ];

    let mut context = context();
    context.static_field("P", Value::Int(10));

    context.function("get_P", |env, _| {
        env.log("get P");
        Ok(env.static_value("P"))
    });

    context.function("set_P", |env, args| {
        env.log(format!("set P {}", args[0]));
        env.store(&Address::Static("P".into()), args[0].clone())?;
        Ok(Value::Unit)
    });

    let run = run(&context, &b.finish(body)).unwrap();
    assert_eq!(run.value, Value::Int(12));
    assert_eq!(run.output, ["get P", "call F(2)", "F(2)", "set P 12", "get P"]);
}

#[test]
fn test_compound_assign_multi_dimensional_element() {
    let b = Builder::new("Main");
    let arr = b.declare("arr", Type::array_of_rank(Type::Int, 2));

    let values = [1, 2, 3, 4].map(|n| b.int(n)).to_vec();
    let row = b.call("Get", vec![b.int(1)], Type::Int);
    let column = b.call("Get", vec![b.int(0)], Type::Int);
    let target = b.index(b.local(arr), vec![row, column]);
    let f = b.await_(b.call("F", vec![b.int(10)], Type::task(Type::Int)));

    let body = vec![
        b.let_(arr, b.array_with_bounds(Type::Int, vec![2, 2], values)),
        b.stmt(b.compound(target, BinOp::Add, f)),
        b.ret(b.index(b.local(arr), vec![b.int(1), b.int(0)])),
    ];

    let run = run(&context(), &b.finish(body)).unwrap();
    assert_eq!(run.value, Value::Int(13));
    // Both indices are evaluated once, in order, before the suspension.
    assert_eq!(run.output, ["Get(1)", "Get(0)", "call F(10)", "F(10)"]);
}

#[test]
fn test_compound_assign_struct_field_of_element() {
    let b = Builder::new("Main");
    let s = Type::struct_("S");
    let arr = b.declare("arr", Type::array(s.clone()));

    let elements = vec![
        b.call("MakeS", vec![b.int(1)], s.clone()),
        b.call("MakeS", vec![b.int(2)], s.clone()),
    ];

    let index = b.call("Get", vec![b.int(0)], Type::Int);
    let target = b.field(b.index(b.local(arr), vec![index]), "x", Type::Int);
    let f = b.await_(b.call("F", vec![b.int(5)], Type::task(Type::Int)));

    let body = vec![
        b.let_(arr, b.array(s, elements)),
        b.stmt(b.compound(target, BinOp::Add, f)),
        b.ret(b.add(
            b.field(b.index(b.local(arr), vec![b.int(0)]), "x", Type::Int),
            b.field(b.index(b.local(arr), vec![b.int(1)]), "x", Type::Int),
        )),
    ];

    let mut context = context();

    context.function("MakeS", |_, args| {
        Ok(Struct::new("S", [("x", args[0].clone())]).into())
    });

    let method = b.finish(body);

    let run = run(&context, &method).unwrap();
    // The element at index 0 is updated in place, the other is untouched.
    assert_eq!(run.value, Value::Int(8));
    assert_eq!(run.output, ["Get(0)", "call F(5)", "F(5)"]);

    assert_lower_error_in! {
        LoweringMode::Runtime,
        method,
        _,
        ErrorKind::UnsupportedConstructInMode { construct, .. } => {
            assert_eq!(construct, Construct::CompoundAssignmentTarget);
        }
    };
}

#[test]
fn test_assign_to_literal() {
    let b = Builder::new("Main");
    let target = b.int(1);
    let expected = target.span;
    let method = b.finish(vec![b.stmt(b.assign(target, b.int(2)))]);

    assert_lower_error! {
        method,
        span,
        ErrorKind::UnsupportedAssignTarget { kind } => {
            assert_eq!(kind, "literal");
            assert_eq!(span, expected);
        }
    };
}
