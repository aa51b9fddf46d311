//! Expression trees forming function bodies.

/// An expression tree node. Every expression yields an `i64`.
///
/// Booleans are 0 or 1. `If` is lowered to real control flow, so only the
/// taken arm is evaluated (recursive functions rely on this).
///
/// Arithmetic wraps and never traps: dividing by zero yields 0 for both `Div`
/// and `Rem`, and `i64::MIN / -1` yields `i64::MIN`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Int(i64),
    Param(usize),

    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
    Rem(Box<Expr>, Box<Expr>),
    Neg(Box<Expr>),

    Eq(Box<Expr>, Box<Expr>),
    Ne(Box<Expr>, Box<Expr>),
    Lt(Box<Expr>, Box<Expr>),
    Le(Box<Expr>, Box<Expr>),
    Gt(Box<Expr>, Box<Expr>),
    Ge(Box<Expr>, Box<Expr>),

    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),

    If {
        cond: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },

    /// Direct call to a function defined in or declared by the unit.
    Call { callee: String, args: Vec<Expr> },

    /// Call through the code pointer stored at address `slot`.
    ///
    /// The pointer is read atomically on every call, which is what makes
    /// stub call sites patchable after compilation.
    CallIndirect { slot: u64, args: Vec<Expr> },

    LoadGlobal(String),
    StoreGlobal { name: String, value: Box<Expr> },
    GlobalAddr(String),
    FuncAddr(String),

    /// Evaluates each expression in order and yields the last (0 if empty).
    Seq(Vec<Expr>),
}

impl Expr {
    pub fn int(value: i64) -> Self {
        Expr::Int(value)
    }

    pub fn param(idx: usize) -> Self {
        Expr::Param(idx)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn add(left: Expr, right: Expr) -> Self {
        Expr::Add(Box::new(left), Box::new(right))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn sub(left: Expr, right: Expr) -> Self {
        Expr::Sub(Box::new(left), Box::new(right))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn mul(left: Expr, right: Expr) -> Self {
        Expr::Mul(Box::new(left), Box::new(right))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn div(left: Expr, right: Expr) -> Self {
        Expr::Div(Box::new(left), Box::new(right))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn rem(left: Expr, right: Expr) -> Self {
        Expr::Rem(Box::new(left), Box::new(right))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn neg(expr: Expr) -> Self {
        Expr::Neg(Box::new(expr))
    }

    pub fn eq(left: Expr, right: Expr) -> Self {
        Expr::Eq(Box::new(left), Box::new(right))
    }

    pub fn ne(left: Expr, right: Expr) -> Self {
        Expr::Ne(Box::new(left), Box::new(right))
    }

    pub fn lt(left: Expr, right: Expr) -> Self {
        Expr::Lt(Box::new(left), Box::new(right))
    }

    pub fn le(left: Expr, right: Expr) -> Self {
        Expr::Le(Box::new(left), Box::new(right))
    }

    pub fn gt(left: Expr, right: Expr) -> Self {
        Expr::Gt(Box::new(left), Box::new(right))
    }

    pub fn ge(left: Expr, right: Expr) -> Self {
        Expr::Ge(Box::new(left), Box::new(right))
    }

    pub fn and(left: Expr, right: Expr) -> Self {
        Expr::And(Box::new(left), Box::new(right))
    }

    pub fn or(left: Expr, right: Expr) -> Self {
        Expr::Or(Box::new(left), Box::new(right))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(expr: Expr) -> Self {
        Expr::Not(Box::new(expr))
    }

    pub fn if_then_else(cond: Expr, then_expr: Expr, else_expr: Expr) -> Self {
        Expr::If {
            cond: Box::new(cond),
            then_expr: Box::new(then_expr),
            else_expr: Box::new(else_expr),
        }
    }

    pub fn call(callee: impl Into<String>, args: Vec<Expr>) -> Self {
        Expr::Call {
            callee: callee.into(),
            args,
        }
    }

    pub fn call_indirect(slot: u64, args: Vec<Expr>) -> Self {
        Expr::CallIndirect { slot, args }
    }

    pub fn load_global(name: impl Into<String>) -> Self {
        Expr::LoadGlobal(name.into())
    }

    pub fn store_global(name: impl Into<String>, value: Expr) -> Self {
        Expr::StoreGlobal {
            name: name.into(),
            value: Box::new(value),
        }
    }

    pub fn global_addr(name: impl Into<String>) -> Self {
        Expr::GlobalAddr(name.into())
    }

    pub fn func_addr(name: impl Into<String>) -> Self {
        Expr::FuncAddr(name.into())
    }

    pub fn seq(exprs: Vec<Expr>) -> Self {
        Expr::Seq(exprs)
    }

    /// Visits this node and all of its children, parents first.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Expr)) {
        visit(self);
        match self {
            Expr::Int(_)
            | Expr::Param(_)
            | Expr::LoadGlobal(_)
            | Expr::GlobalAddr(_)
            | Expr::FuncAddr(_) => {}
            Expr::Add(l, r)
            | Expr::Sub(l, r)
            | Expr::Mul(l, r)
            | Expr::Div(l, r)
            | Expr::Rem(l, r)
            | Expr::Eq(l, r)
            | Expr::Ne(l, r)
            | Expr::Lt(l, r)
            | Expr::Le(l, r)
            | Expr::Gt(l, r)
            | Expr::Ge(l, r)
            | Expr::And(l, r)
            | Expr::Or(l, r) => {
                l.walk(visit);
                r.walk(visit);
            }
            Expr::Neg(inner) | Expr::Not(inner) => inner.walk(visit),
            Expr::If {
                cond,
                then_expr,
                else_expr,
            } => {
                cond.walk(visit);
                then_expr.walk(visit);
                else_expr.walk(visit);
            }
            Expr::Call { args, .. } | Expr::CallIndirect { args, .. } => {
                for arg in args {
                    arg.walk(visit);
                }
            }
            Expr::StoreGlobal { value, .. } => value.walk(visit),
            Expr::Seq(exprs) => {
                for e in exprs {
                    e.walk(visit);
                }
            }
        }
    }

    /// Names of functions this expression calls or takes the address of.
    pub fn referenced_functions(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.walk(&mut |e| match e {
            Expr::Call { callee, .. } => out.push(callee.as_str()),
            Expr::FuncAddr(name) => out.push(name.as_str()),
            _ => {}
        });
        out
    }

    /// Names of globals this expression reads, writes or takes the address of.
    pub fn referenced_globals(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.walk(&mut |e| match e {
            Expr::LoadGlobal(name) | Expr::GlobalAddr(name) => out.push(name.as_str()),
            Expr::StoreGlobal { name, .. } => out.push(name.as_str()),
            _ => {}
        });
        out
    }
}
