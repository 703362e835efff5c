prelude!();

fn f_bool(b: &Builder, value: bool) -> crate::hir::Expr {
    b.await_(b.call("F", vec![b.bool(value)], Type::task(Type::Bool)))
}

fn get_bool(b: &Builder, value: bool) -> crate::hir::Expr {
    b.call("Get", vec![b.bool(value)], Type::Bool)
}

#[test]
fn test_and() {
    for (lhs, rhs, expected, suspensions) in [
        (true, true, true, 1),
        (true, false, false, 1),
        (false, true, false, 0),
    ] {
        let b = Builder::new("Main");
        let and = b.and(get_bool(&b, lhs), f_bool(&b, rhs));
        let method = b.finish(vec![b.ret(and)]);

        let run = run(&context(), &method).unwrap();
        assert_eq!(run.value, Value::Bool(expected));
        assert_eq!(run.suspensions, suspensions);
    }
}

#[test]
fn test_or() {
    for (lhs, rhs, expected, suspensions) in [
        (true, false, true, 0),
        (false, true, true, 1),
        (false, false, false, 1),
    ] {
        let b = Builder::new("Main");
        let or = b.or(get_bool(&b, lhs), f_bool(&b, rhs));
        let method = b.finish(vec![b.ret(or)]);

        let run = run(&context(), &method).unwrap();
        assert_eq!(run.value, Value::Bool(expected));
        assert_eq!(run.suspensions, suspensions);
    }
}

#[test]
fn test_await_on_left_of_and() {
    let b = Builder::new("Main");
    let and = b.and(f_bool(&b, true), get_bool(&b, false));
    let method = b.finish(vec![b.ret(and)]);

    let run = run(&context(), &method).unwrap();
    assert_eq!(run.value, Value::Bool(false));
    assert_eq!(run.output, ["call F(true)", "F(true)", "Get(false)"]);
}

#[test]
fn test_logical_statements() {
    let b = Builder::new("Main");

    let body = vec![
        b.stmt(b.and(get_bool(&b, false), f_bool(&b, true))),
        b.stmt(b.or(get_bool(&b, false), f_bool(&b, false))),
        b.stmt(b.or(get_bool(&b, true), f_bool(&b, true))),
    ];

    let run = run(&context(), &b.finish(body)).unwrap();
    assert_eq!(run.suspensions, 1);

    assert_eq!(
        run.output,
        [
            "Get(false)",
            "Get(false)",
            "call F(false)",
            "F(false)",
            "Get(true)"
        ]
    );
}

#[test]
fn test_coalesce() {
    let nullable = Type::nullable(Type::Int);

    for (initial, expected, suspensions) in [(None, 3, 1), (Some(5), 5, 0)] {
        let b = Builder::new("Main");
        let a = b.declare("a", nullable.clone());
        let f = b.await_(b.call("F", vec![b.int(3)], Type::task(Type::Int)));

        let init = match initial {
            Some(value) => b.int(value),
            None => b.null(nullable.clone()),
        };

        let body = vec![b.let_(a, init), b.ret(b.coalesce(b.local(a), f))];

        let run = run(&context(), &b.finish(body)).unwrap();
        assert_eq!(run.value, Value::Int(expected));
        assert_eq!(run.suspensions, suspensions);
    }
}

#[test]
fn test_coalesce_assign_statement() {
    let nullable = Type::nullable(Type::Int);

    let b = Builder::new("Main");
    let a = b.declare("a", nullable.clone());
    let f = b.await_(b.call("F", vec![b.int(3)], Type::task(Type::Int)));

    // a ?? (a = await F(3));
    let body = vec![
        b.let_(a, b.null(nullable)),
        b.stmt(b.coalesce(b.local(a), b.assign(b.local(a), f))),
        b.ret(b.local(a)),
    ];

    let run = run(&context(), &b.finish(body)).unwrap();
    assert_eq!(run.value, Value::Int(3));
    assert_eq!(run.suspensions, 1);
}

#[test]
fn test_conditional() {
    for (condition, expected, suspensions) in [(true, 11, 1), (false, 12, 0)] {
        let b = Builder::new("Main");
        let lhs = b.call("Get", vec![b.int(10)], Type::Int);
        let then = b.await_(b.call("F", vec![b.int(1)], Type::task(Type::Int)));
        let conditional = b.conditional(get_bool(&b, condition), then, b.int(2));
        let method = b.finish(vec![b.ret(b.add(lhs, conditional))]);

        // The left operand is spilled since one of the arms suspends.
        let lowered = lower(&method);
        assert_eq!(lowered.slots().len(), 1);

        let run = run(&context(), &method).unwrap();
        assert_eq!(run.value, Value::Int(expected));
        assert_eq!(run.suspensions, suspensions);
    }
}

#[test]
fn test_conditional_statement() {
    let b = Builder::new("Main");
    let then = b.await_(b.call("F", vec![b.int(1)], Type::task(Type::Int)));
    let otherwise = b.call("Write", vec![b.str("otherwise")], Type::Unit);

    let body = vec![
        b.stmt(b.conditional(get_bool(&b, true), then, otherwise)),
        b.stmt(b.call("Write", vec![b.str("done")], Type::Unit)),
    ];

    let run = run(&context(), &b.finish(body)).unwrap();
    assert_eq!(run.output, ["Get(true)", "call F(1)", "F(1)", "done"]);
}

#[test]
fn test_conditional_access() {
    for (present, expected, suspensions) in [(true, Value::Int(2), 1), (false, Value::Null, 0)] {
        let b = Builder::new("Main");
        let o = b.declare("o", Type::class("C"));
        let f = b.await_(b.call("F", vec![b.int(1)], Type::task(Type::Int)));

        let access = b.method_call(b.receiver(Type::class("C")), "Add1", vec![f], Type::Int);
        let init = if present {
            b.new_object("C", vec![])
        } else {
            b.null(Type::class("C"))
        };

        let body = vec![
            b.let_(o, init),
            b.ret(b.conditional_access(b.local(o), access)),
        ];

        let mut context = context();

        context.function("C.Add1", |_, args| {
            Ok(Value::Int(args[1].as_int()? + 1))
        });

        let run = run(&context, &b.finish(body)).unwrap();
        assert_eq!(run.value, expected);
        assert_eq!(run.suspensions, suspensions);
    }
}

#[test]
fn test_conditional_access_statement() {
    let b = Builder::new("Main");
    let o = b.declare("o", Type::class("C"));
    let f = b.await_(b.call("F", vec![b.int(1)], Type::task(Type::Int)));

    let access = b.method_call(b.receiver(Type::class("C")), "Log", vec![f], Type::Unit);

    let body = vec![
        b.let_(o, b.new_object("C", vec![])),
        b.stmt(b.conditional_access(b.local(o), access)),
    ];

    let mut context = context();

    context.function("Log", |env, args| {
        env.log(format!("{}.Log({})", args[0], args[1]));
        Ok(Value::Unit)
    });

    let run = run(&context, &b.finish(body)).unwrap();
    assert_eq!(run.output, ["call F(1)", "F(1)", "C.Log(1)"]);
}

#[test]
fn test_receiver_outside_conditional_access() {
    let b = Builder::new("Main");
    let receiver = b.receiver(Type::class("C"));
    let expected = receiver.span;
    let method = b.finish(vec![b.stmt(receiver)]);

    assert_lower_error! {
        method,
        span,
        ErrorKind::MissingConditionalReceiver => {
            assert_eq!(span, expected);
        }
    };
}
