prelude!();

fn collections() -> Context {
    let mut context = context();

    context.function("Add", |_, args| {
        let collection = args[0].as_object()?;
        collection.borrow_mut().items.extend(args[1..].iter().cloned());
        Ok(Value::Unit)
    });

    context.function("Sum", |_, args| {
        let sum = args[0]
            .as_object()?
            .borrow()
            .items
            .iter()
            .map(Value::as_int)
            .sum::<Result<i64, _>>()?;

        Ok(Value::Int(sum))
    });

    context
}

#[test]
fn test_object_initializer() {
    let b = Builder::new("Main");
    let o = b.declare("o", Type::class("C"));

    let get = b.call("Get", vec![b.int(1)], Type::Int);
    let f = b.await_(b.call("F", vec![b.int(2)], Type::task(Type::Int)));
    let init = b.object_init(b.new_object("C", vec![]), vec![("X", get), ("Y", f)]);

    let body = vec![
        b.let_(o, init),
        b.ret(b.add(
            b.field(b.local(o), "X", Type::Int),
            b.field(b.local(o), "Y", Type::Int),
        )),
    ];

    let mut context = context();

    context.function("C", |env, _| {
        env.log("new C");
        Ok(Value::object(Object::new("C")))
    });

    let run = run(&context, &b.finish(body)).unwrap();
    assert_eq!(run.value, Value::Int(3));
    assert_eq!(run.output, ["new C", "Get(1)", "call F(2)", "F(2)"]);
}

#[test]
fn test_collection_initializer() {
    let b = Builder::new("Main");
    let list = b.declare("list", Type::class("List"));

    let get = b.call("Get", vec![b.int(1)], Type::Int);
    let f = b.await_(b.call("F", vec![b.int(2)], Type::task(Type::Int)));
    let init = b.collection_init(b.new_object("List", vec![]), vec![vec![get], vec![f]]);

    let body = vec![
        b.let_(list, init),
        b.ret(b.method_call(b.local(list), "Sum", vec![], Type::Int)),
    ];

    let run = run(&collections(), &b.finish(body)).unwrap();
    assert_eq!(run.value, Value::Int(3));
    assert_eq!(run.output, ["Get(1)", "call F(2)", "F(2)"]);
}

#[test]
fn test_array_initializer() {
    let b = Builder::new("Main");
    let arr = b.declare("arr", Type::array(Type::Int));

    let get = b.call("Get", vec![b.int(1)], Type::Int);
    let f = b.await_(b.call("F", vec![b.int(2)], Type::task(Type::Int)));

    let element = |n| b.index(b.local(arr), vec![b.int(n)]);

    let body = vec![
        b.let_(arr, b.array(Type::Int, vec![get, f, b.int(3)])),
        b.ret(b.binary(
            BinOp::Add,
            b.binary(BinOp::Mul, element(0), b.int(100)),
            b.binary(BinOp::Add, b.binary(BinOp::Mul, element(1), b.int(10)), element(2)),
        )),
    ];

    let run = run(&context(), &b.finish(body)).unwrap();
    assert_eq!(run.value, Value::Int(123));
    assert_eq!(run.output, ["Get(1)", "call F(2)", "F(2)"]);
}

#[test]
fn test_multi_dimensional_array_initializer() {
    let b = Builder::new("Main");
    let arr = b.declare("arr", Type::array_of_rank(Type::Int, 2));

    let f = b.await_(b.call("F", vec![b.int(2)], Type::task(Type::Int)));
    let elements = vec![b.int(1), f, b.int(3), b.int(4)];

    let element = |i, j| b.index(b.local(arr), vec![b.int(i), b.int(j)]);

    let body = vec![
        b.let_(arr, b.array_with_bounds(Type::Int, vec![2, 2], elements)),
        b.ret(b.binary(
            BinOp::Add,
            b.binary(BinOp::Mul, element(1, 0), b.int(10)),
            element(0, 1),
        )),
    ];

    let run = run(&context(), &b.finish(body)).unwrap();
    assert_eq!(run.value, Value::Int(32));
}

#[test]
fn test_constructor_arguments() {
    let b = Builder::new("Main");
    let o = b.declare("o", Type::class("P"));

    let get = b.call("Get", vec![b.int(1)], Type::Int);
    let f = b.await_(b.call("F", vec![b.int(2)], Type::task(Type::Int)));

    let body = vec![
        b.let_(o, b.new_object("P", vec![get, f])),
        b.ret(b.add(
            b.binary(BinOp::Mul, b.field(b.local(o), "a", Type::Int), b.int(10)),
            b.field(b.local(o), "b", Type::Int),
        )),
    ];

    let mut context = context();

    context.function("P", |_, args| {
        let mut object = Object::new("P");
        object.set("a", args[0].clone());
        object.set("b", args[1].clone());
        Ok(Value::object(object))
    });

    let run = run(&context, &b.finish(body)).unwrap();
    assert_eq!(run.value, Value::Int(12));
    assert_eq!(run.output, ["Get(1)", "call F(2)", "F(2)"]);
}

#[test]
fn test_nested_initializers() {
    let b = Builder::new("Main");
    let o = b.declare("o", Type::class("C"));

    let f = b.await_(b.call("F", vec![b.int(1)], Type::task(Type::Int)));
    let get = b.call("Get", vec![b.int(2)], Type::Int);

    let items = b.collection_init(b.new_object("List", vec![]), vec![vec![f], vec![get]]);
    let init = b.object_init(b.new_object("C", vec![]), vec![("Items", items)]);

    let body = vec![
        b.let_(o, init),
        b.ret(b.method_call(
            b.field(b.local(o), "Items", Type::class("List")),
            "Sum",
            vec![],
            Type::Int,
        )),
    ];

    let run = run(&collections(), &b.finish(body)).unwrap();
    assert_eq!(run.value, Value::Int(3));
    assert_eq!(run.output, ["call F(1)", "F(1)", "Get(2)"]);
}
