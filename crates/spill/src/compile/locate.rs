use hashbrown::HashSet;

use crate::hir::{Expr, ExprId, ExprKind, Method, Stmt};

/// The set of expressions which are, or lexically contain, a suspension.
///
/// Every branch counts, including branches of short-circuiting operators
/// which may not be taken at runtime.
#[derive(Debug, Default)]
pub struct Suspensions {
    contains: HashSet<ExprId>,
}

impl Suspensions {
    /// Locate suspensions in every statement of a method.
    pub fn locate(method: &Method) -> Self {
        let mut this = Self::default();

        for stmt in &method.body {
            match stmt {
                Stmt::Expr(expr) | Stmt::Local { init: Some(expr), .. } | Stmt::Return(expr) => {
                    this.visit(expr);
                }
                Stmt::Local { init: None, .. } => {}
            }
        }

        this
    }

    /// Locate suspensions in a single expression tree.
    pub fn locate_expr(expr: &Expr) -> Self {
        let mut this = Self::default();
        this.visit(expr);
        this
    }

    fn visit(&mut self, expr: &Expr) -> bool {
        let mut contains = matches!(expr.kind, ExprKind::Await(..));

        // NB: every child must be visited, so this can't short-circuit.
        for child in expr.children() {
            contains |= self.visit(child);
        }

        if contains {
            self.contains.insert(expr.id);
        }

        contains
    }

    /// Test if the given expression contains a suspension.
    pub fn contains(&self, expr: &Expr) -> bool {
        self.contains.contains(&expr.id)
    }

    /// Test if any of the given expressions contains a suspension.
    pub fn any<'a, I>(&self, exprs: I) -> bool
    where
        I: IntoIterator<Item = &'a Expr>,
    {
        exprs.into_iter().any(|e| self.contains(e))
    }

    /// The number of expressions which contain a suspension.
    pub fn len(&self) -> usize {
        self.contains.len()
    }

    /// Test if no expression contains a suspension.
    pub fn is_empty(&self) -> bool {
        self.contains.is_empty()
    }
}
