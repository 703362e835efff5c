use core::cell::{Cell, RefCell};

use crate::hir::{
    Argument, BinOp, Expr, ExprId, ExprKind, Literal, LocalDecl, LocalId, LogicalOp, MemberInit,
    Method, Param, RefKind, Stmt, Type, UnaryOp,
};
use crate::span::Span;

/// Helper to construct bound method bodies.
///
/// Identifiers are allocated through interior mutability so that calls can be
/// nested, like `b.assign(b.local(c), b.int(1))`. Unless overridden with
/// [Expr::at], every node gets a distinct point span derived from its id.
///
/// # Examples
///
/// ```
/// use spill::hir::{Builder, Type};
///
/// let b = Builder::new("M");
/// let c = b.declare("c", Type::Int);
/// let method = b.finish(vec![
///     b.stmt(b.assign(b.local(c), b.int(1))),
///     b.ret(b.local(c)),
/// ]);
/// assert_eq!(method.locals.len(), 1);
/// assert_eq!(method.body.len(), 2);
/// ```
pub struct Builder {
    name: Box<str>,
    this: Option<Type>,
    next: Cell<u32>,
    params: RefCell<Vec<Param>>,
    locals: RefCell<Vec<LocalDecl>>,
}

impl Builder {
    /// Construct a builder for a static method.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            this: None,
            next: Cell::new(0),
            params: RefCell::new(Vec::new()),
            locals: RefCell::new(Vec::new()),
        }
    }

    /// Construct a builder for an instance method on the given type.
    pub fn instance(name: &str, this: Type) -> Self {
        Self {
            this: Some(this),
            ..Self::new(name)
        }
    }

    fn id(&self) -> ExprId {
        let id = self.next.get();
        self.next.set(id + 1);
        ExprId::new(id)
    }

    fn expr(&self, ty: Type, kind: ExprKind) -> Expr {
        let id = self.id();
        let pos = id.index() as u32;

        Expr {
            id,
            span: Span::new(pos, pos + 1),
            ty,
            kind,
        }
    }

    /// Declare a parameter, returning its position.
    pub fn param(&self, name: &str, ty: Type) -> usize {
        let mut params = self.params.borrow_mut();
        params.push(Param {
            name: name.into(),
            ty,
        });
        params.len() - 1
    }

    /// Declare a hoisted local.
    pub fn declare(&self, name: &str, ty: Type) -> LocalId {
        let mut locals = self.locals.borrow_mut();
        let id = LocalId::new(locals.len() as u32);
        locals.push(LocalDecl {
            id,
            name: name.into(),
            ty,
        });
        id
    }

    pub fn unit(&self) -> Expr {
        self.expr(Type::Unit, ExprKind::Literal(Literal::Unit))
    }

    pub fn null(&self, ty: Type) -> Expr {
        self.expr(ty, ExprKind::Literal(Literal::Null))
    }

    pub fn bool(&self, value: bool) -> Expr {
        self.expr(Type::Bool, ExprKind::Literal(Literal::Bool(value)))
    }

    pub fn int(&self, value: i64) -> Expr {
        self.expr(Type::Int, ExprKind::Literal(Literal::Int(value)))
    }

    pub fn str(&self, value: &str) -> Expr {
        self.expr(Type::String, ExprKind::Literal(Literal::Str(value.into())))
    }

    /// Read a declared local.
    pub fn local(&self, id: LocalId) -> Expr {
        let ty = self
            .locals
            .borrow()
            .get(id.index())
            .map(|l| l.ty.clone())
            .unwrap_or(Type::Object);

        self.expr(ty, ExprKind::Local(id))
    }

    /// Read a declared parameter.
    pub fn arg(&self, index: usize) -> Expr {
        let ty = self
            .params
            .borrow()
            .get(index)
            .map(|p| p.ty.clone())
            .unwrap_or(Type::Object);

        self.expr(ty, ExprKind::Parameter(index))
    }

    pub fn this(&self) -> Expr {
        let ty = self.this.clone().unwrap_or(Type::Object);
        self.expr(ty, ExprKind::This)
    }

    pub fn field(&self, receiver: Expr, name: &str, ty: Type) -> Expr {
        self.expr(
            ty,
            ExprKind::Field {
                receiver: Some(Box::new(receiver)),
                name: name.into(),
            },
        )
    }

    pub fn static_field(&self, name: &str, ty: Type) -> Expr {
        self.expr(
            ty,
            ExprKind::Field {
                receiver: None,
                name: name.into(),
            },
        )
    }

    pub fn property(&self, receiver: Option<Expr>, name: &str, ty: Type) -> Expr {
        self.expr(
            ty,
            ExprKind::Property {
                receiver: receiver.map(Box::new),
                name: name.into(),
                args: Vec::new(),
                returns_ref: false,
            },
        )
    }

    /// A static property whose getter returns a reference to storage of the
    /// given type.
    pub fn ref_property(&self, name: &str, ty: Type) -> Expr {
        self.expr(
            ty,
            ExprKind::Property {
                receiver: None,
                name: name.into(),
                args: Vec::new(),
                returns_ref: true,
            },
        )
    }

    pub fn indexer(&self, receiver: Expr, args: Vec<Expr>, ty: Type) -> Expr {
        self.expr(
            ty,
            ExprKind::Property {
                receiver: Some(Box::new(receiver)),
                name: "Item".into(),
                args,
                returns_ref: false,
            },
        )
    }

    /// Access an array element.
    pub fn index(&self, array: Expr, indices: Vec<Expr>) -> Expr {
        let ty = array.ty.inner().cloned().unwrap_or(Type::Object);

        self.expr(
            ty,
            ExprKind::Element {
                array: Box::new(array),
                indices,
            },
        )
    }

    /// Call a static function with positional arguments.
    pub fn call(&self, function: &str, args: Vec<Expr>, ty: Type) -> Expr {
        let args = self.positional(args);
        self.call_with(None, function, args, ty)
    }

    /// Call an instance method with positional arguments.
    pub fn method_call(&self, receiver: Expr, function: &str, args: Vec<Expr>, ty: Type) -> Expr {
        let args = self.positional(args);
        self.call_with(Some(receiver), function, args, ty)
    }

    /// Call a function with explicitly bound arguments.
    pub fn call_with(
        &self,
        receiver: Option<Expr>,
        function: &str,
        args: Vec<Argument>,
        ty: Type,
    ) -> Expr {
        self.expr(
            ty,
            ExprKind::Call {
                receiver: receiver.map(Box::new),
                function: function.into(),
                args,
                returns_ref: false,
            },
        )
    }

    /// Call a static function returning a reference to storage of the given
    /// type.
    pub fn ref_call(&self, function: &str, args: Vec<Expr>, ty: Type) -> Expr {
        self.expr(
            ty,
            ExprKind::Call {
                receiver: None,
                function: function.into(),
                args: self.positional(args),
                returns_ref: true,
            },
        )
    }

    fn positional(&self, args: Vec<Expr>) -> Vec<Argument> {
        args.into_iter()
            .enumerate()
            .map(|(parameter, expr)| Argument {
                expr,
                parameter,
                name: None,
            })
            .collect()
    }

    /// An argument passed by name to the parameter at the given position.
    pub fn named(&self, name: &str, parameter: usize, expr: Expr) -> Argument {
        Argument {
            expr,
            parameter,
            name: Some(name.into()),
        }
    }

    /// An argument passed positionally.
    pub fn positional_arg(&self, parameter: usize, expr: Expr) -> Argument {
        Argument {
            expr,
            parameter,
            name: None,
        }
    }

    pub fn new_object(&self, class: &str, args: Vec<Expr>) -> Expr {
        self.expr(
            Type::class(class),
            ExprKind::New {
                class: class.into(),
                args: self.positional(args),
            },
        )
    }

    pub fn object_init(&self, creation: Expr, members: Vec<(&str, Expr)>) -> Expr {
        let ty = creation.ty.clone();
        let members = members
            .into_iter()
            .map(|(name, value)| MemberInit {
                name: name.into(),
                value,
            })
            .collect();

        self.expr(
            ty,
            ExprKind::ObjectInitializer {
                creation: Box::new(creation),
                members,
            },
        )
    }

    pub fn collection_init(&self, creation: Expr, elements: Vec<Vec<Expr>>) -> Expr {
        let ty = creation.ty.clone();

        self.expr(
            ty,
            ExprKind::CollectionInitializer {
                creation: Box::new(creation),
                elements,
            },
        )
    }

    /// A single-dimensional array initializer.
    pub fn array(&self, element: Type, elements: Vec<Expr>) -> Expr {
        let bounds = vec![elements.len()];
        self.array_with_bounds(element, bounds, elements)
    }

    /// A multi-dimensional array initializer with elements in row-major order.
    pub fn array_with_bounds(&self, element: Type, bounds: Vec<usize>, elements: Vec<Expr>) -> Expr {
        let ty = Type::array_of_rank(element.clone(), bounds.len());

        self.expr(
            ty,
            ExprKind::ArrayInitializer {
                element,
                bounds,
                elements,
            },
        )
    }

    pub fn stackalloc(&self, element: Type, elements: Vec<Expr>) -> Expr {
        let ty = Type::span(element.clone());
        self.expr(ty, ExprKind::StackAlloc { element, elements })
    }

    pub fn assign(&self, target: Expr, value: Expr) -> Expr {
        let ty = target.ty.clone();

        self.expr(
            ty,
            ExprKind::Assign {
                target: Box::new(target),
                value: Box::new(value),
            },
        )
    }

    pub fn compound(&self, target: Expr, op: BinOp, value: Expr) -> Expr {
        self.compound_assign(target, op, value, false)
    }

    /// A compound assignment whose operator is lifted over nullable operands.
    pub fn lifted_compound(&self, target: Expr, op: BinOp, value: Expr) -> Expr {
        self.compound_assign(target, op, value, true)
    }

    fn compound_assign(&self, target: Expr, op: BinOp, value: Expr, lifted: bool) -> Expr {
        let ty = target.ty.clone();

        self.expr(
            ty,
            ExprKind::CompoundAssign {
                target: Box::new(target),
                op,
                value: Box::new(value),
                lifted,
            },
        )
    }

    pub fn conditional(&self, condition: Expr, then: Expr, otherwise: Expr) -> Expr {
        let ty = then.ty.clone();

        self.expr(
            ty,
            ExprKind::Conditional {
                condition: Box::new(condition),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            },
        )
    }

    pub fn and(&self, lhs: Expr, rhs: Expr) -> Expr {
        self.logical(LogicalOp::And, lhs, rhs)
    }

    pub fn or(&self, lhs: Expr, rhs: Expr) -> Expr {
        self.logical(LogicalOp::Or, lhs, rhs)
    }

    fn logical(&self, op: LogicalOp, lhs: Expr, rhs: Expr) -> Expr {
        self.expr(
            Type::Bool,
            ExprKind::Logical {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
        )
    }

    pub fn coalesce(&self, lhs: Expr, rhs: Expr) -> Expr {
        let ty = rhs.ty.clone();

        self.expr(
            ty,
            ExprKind::Coalesce {
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
        )
    }

    /// `receiver?.access`. The access refers to the receiver through
    /// [Builder::receiver].
    pub fn conditional_access(&self, receiver: Expr, access: Expr) -> Expr {
        let ty = match &access.ty {
            ty @ (Type::Int | Type::Bool | Type::Struct(..)) => Type::nullable(ty.clone()),
            ty => ty.clone(),
        };

        self.expr(
            ty,
            ExprKind::ConditionalAccess {
                receiver: Box::new(receiver),
                access: Box::new(access),
            },
        )
    }

    /// The receiver tested by the innermost enclosing conditional access.
    pub fn receiver(&self, ty: Type) -> Expr {
        self.expr(ty, ExprKind::ConditionalReceiver)
    }

    pub fn unary(&self, op: UnaryOp, operand: Expr) -> Expr {
        let lifted = matches!(operand.ty, Type::Nullable(..));
        let ty = operand.ty.clone();

        self.expr(
            ty,
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
                lifted,
            },
        )
    }

    /// A binary operation. Operators over nullable operands are lifted.
    pub fn binary(&self, op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
        let lifted =
            matches!(lhs.ty, Type::Nullable(..)) || matches!(rhs.ty, Type::Nullable(..));

        let ty = match op {
            BinOp::Eq | BinOp::Neq | BinOp::Lt | BinOp::Gt | BinOp::Lte | BinOp::Gte => Type::Bool,
            _ if lifted => match &lhs.ty {
                Type::Nullable(..) => lhs.ty.clone(),
                ty => Type::nullable(ty.clone()),
            },
            _ if rhs.ty == Type::String => Type::String,
            _ => lhs.ty.clone(),
        };

        self.expr(
            ty,
            ExprKind::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                lifted,
            },
        )
    }

    pub fn add(&self, lhs: Expr, rhs: Expr) -> Expr {
        self.binary(BinOp::Add, lhs, rhs)
    }

    pub fn ref_(&self, target: Expr) -> Expr {
        self.address(RefKind::Ref, target)
    }

    pub fn out(&self, target: Expr) -> Expr {
        self.address(RefKind::Out, target)
    }

    pub fn in_(&self, target: Expr) -> Expr {
        self.address(RefKind::In, target)
    }

    fn address(&self, kind: RefKind, target: Expr) -> Expr {
        let ty = Type::ref_(target.ty.clone());

        self.expr(
            ty,
            ExprKind::Ref {
                kind,
                target: Box::new(target),
            },
        )
    }

    pub fn arglist(&self, items: Vec<Expr>) -> Expr {
        self.expr(Type::ArgList, ExprKind::ArgList(items))
    }

    /// Await an operand, producing the result type of the task.
    pub fn await_(&self, operand: Expr) -> Expr {
        let ty = match &operand.ty {
            Type::Task(inner) => (**inner).clone(),
            ty => ty.clone(),
        };

        self.expr(ty, ExprKind::Await(Box::new(operand)))
    }

    /// An expression statement.
    pub fn stmt(&self, expr: Expr) -> Stmt {
        Stmt::Expr(expr)
    }

    /// Initialize a local.
    pub fn let_(&self, local: LocalId, init: Expr) -> Stmt {
        Stmt::Local {
            local,
            init: Some(init),
        }
    }

    pub fn ret(&self, expr: Expr) -> Stmt {
        Stmt::Return(expr)
    }

    /// Finish the method with the given body.
    ///
    /// The builder is left intact, so the body can be built from it in the
    /// same call, like `b.finish(vec![b.ret(b.int(1))])`.
    pub fn finish(&self, body: Vec<Stmt>) -> Method {
        let end = self.next.get();

        Method {
            name: self.name.clone(),
            span: Span::new(0, end),
            this: self.this.clone(),
            params: self.params.borrow().clone(),
            locals: self.locals.borrow().clone(),
            body,
        }
    }
}

impl Expr {
    /// Override the span of the expression.
    pub fn at(mut self, span: Span) -> Self {
        self.span = span;
        self
    }
}
