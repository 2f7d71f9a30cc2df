//! Symbolic integer expressions
//!
//! Axis extents, loop bounds and allocation sizes are kept symbolic until an
//! [`ExtentResolver`](crate::eval::ExtentResolver) pins them to a literal.
//! `simplify` folds literals and the usual identities; it never reasons about
//! the values of variables.

use std::ops::{Add, Div, Mul, Rem, Sub};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    Const(i64),
    Var(String),
    Add(Box<Self>, Box<Self>),
    Sub(Box<Self>, Box<Self>),
    Mul(Box<Self>, Box<Self>),
    Div(Box<Self>, Box<Self>),
    CeilDiv(Box<Self>, Box<Self>),
    Rem(Box<Self>, Box<Self>),

    // predicates, evaluated as 0/1
    Lt(Box<Self>, Box<Self>),
    And(Box<Self>, Box<Self>),
}

/// Scalar literal used for reduction identities
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl std::fmt::Display for Literal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Literal::Int(v) => write!(f, "{v}"),
            Literal::Float(v) => {
                let s = format!("{v}");
                if s.contains('.') || s.contains('e') || s.contains("inf") || s.contains("NaN") {
                    write!(f, "{s}")
                } else {
                    write!(f, "{s}.0")
                }
            }
            Literal::Bool(v) => write!(f, "{v}"),
        }
    }
}

impl std::fmt::Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expr::Const(c) => write!(f, "{c}"),
            Expr::Var(v) => write!(f, "{v}"),
            Expr::Add(l, r) => write!(f, "({l} + {r})"),
            Expr::Sub(l, r) => write!(f, "({l} - {r})"),
            Expr::Mul(l, r) => write!(f, "({l} * {r})"),
            Expr::Div(l, r) => write!(f, "({l} / {r})"),
            Expr::CeilDiv(l, r) => write!(f, "ceilDiv({l}, {r})"),
            Expr::Rem(l, r) => write!(f, "({l} % {r})"),
            Expr::Lt(l, r) => write!(f, "({l} < {r})"),
            Expr::And(l, r) => write!(f, "({l} && {r})"),
        }
    }
}

impl Expr {
    pub fn var(name: &str) -> Self {
        Self::Var(name.to_string())
    }

    pub fn is_zero(&self) -> bool {
        matches!(self, Expr::Const(0))
    }

    pub fn is_one(&self) -> bool {
        matches!(self, Expr::Const(1))
    }

    /// Literal value, if this expression is one
    pub fn as_const(&self) -> Option<i64> {
        match self {
            Expr::Const(c) => Some(*c),
            _ => None,
        }
    }

    pub fn ceil_div(self, rhs: impl Into<Expr>) -> Self {
        Self::CeilDiv(Box::new(self), Box::new(rhs.into()))
    }

    pub fn lt(self, rhs: impl Into<Expr>) -> Self {
        Self::Lt(Box::new(self), Box::new(rhs.into()))
    }

    pub fn and(self, rhs: impl Into<Expr>) -> Self {
        Self::And(Box::new(self), Box::new(rhs.into()))
    }

    /// Product of `factors`, or `1` when empty
    pub fn product(factors: impl IntoIterator<Item = Expr>) -> Self {
        factors
            .into_iter()
            .reduce(|acc, e| acc * e)
            .unwrap_or(Expr::Const(1))
            .simplify()
    }

    pub fn simplify(self) -> Self {
        match self {
            Expr::Add(lhs, rhs) => match (lhs.simplify(), rhs.simplify()) {
                (Expr::Const(0), e) | (e, Expr::Const(0)) => e,
                (Expr::Const(l), Expr::Const(r)) => fold(l, r, i64::checked_add, Expr::Add),
                (l, r) => l + r,
            },
            Expr::Sub(lhs, rhs) => match (lhs.simplify(), rhs.simplify()) {
                (e, Expr::Const(0)) => e,
                (l, r) if l == r => Expr::Const(0),
                (Expr::Const(l), Expr::Const(r)) => fold(l, r, i64::checked_sub, Expr::Sub),
                (Expr::Add(a, b), r) if *b == r => *a,
                (Expr::Add(a, b), r) if *a == r => *b,
                (l, r) => l - r,
            },
            Expr::Mul(lhs, rhs) => match (lhs.simplify(), rhs.simplify()) {
                (Expr::Const(0), _) | (_, Expr::Const(0)) => Expr::Const(0),
                (Expr::Const(1), e) | (e, Expr::Const(1)) => e,
                (Expr::Const(l), Expr::Const(r)) => fold(l, r, i64::checked_mul, Expr::Mul),
                (l, r) => l * r,
            },
            Expr::Div(lhs, rhs) => match (lhs.simplify(), rhs.simplify()) {
                (e, Expr::Const(1)) => e,
                (Expr::Const(0), r) if !r.is_zero() => Expr::Const(0),
                (Expr::Const(l), Expr::Const(r)) => fold(l, r, i64::checked_div, Expr::Div),
                (l, r) if l == r && !l.is_zero() => Expr::Const(1),
                (l, r) => l / r,
            },
            Expr::CeilDiv(lhs, rhs) => match (lhs.simplify(), rhs.simplify()) {
                (e, Expr::Const(1)) => e,
                (Expr::Const(l), Expr::Const(r)) if r > 0 => {
                    fold(l, r, |l, r| l.checked_add(r - 1).map(|n| n / r), Expr::CeilDiv)
                }
                (l, r) => l.ceil_div(r),
            },
            Expr::Rem(lhs, rhs) => match (lhs.simplify(), rhs.simplify()) {
                (_, Expr::Const(1)) => Expr::Const(0),
                (Expr::Const(l), Expr::Const(r)) => fold(l, r, i64::checked_rem, Expr::Rem),
                (l, r) => l % r,
            },
            Expr::Lt(lhs, rhs) => match (lhs.simplify(), rhs.simplify()) {
                (Expr::Const(l), Expr::Const(r)) => Expr::Const((l < r) as i64),
                (l, r) => l.lt(r),
            },
            Expr::And(lhs, rhs) => match (lhs.simplify(), rhs.simplify()) {
                (Expr::Const(0), _) | (_, Expr::Const(0)) => Expr::Const(0),
                (Expr::Const(1), e) | (e, Expr::Const(1)) => e,
                (l, r) => l.and(r),
            },
            e => e,
        }
    }

    /// Recursively collects the names of all `Var` nodes
    pub fn collect_variables(&self, vars: &mut Vec<String>) {
        match self {
            Expr::Var(name) => {
                if !vars.contains(name) {
                    vars.push(name.clone());
                }
            }
            Expr::Add(l, r)
            | Expr::Sub(l, r)
            | Expr::Mul(l, r)
            | Expr::Div(l, r)
            | Expr::CeilDiv(l, r)
            | Expr::Rem(l, r)
            | Expr::Lt(l, r)
            | Expr::And(l, r) => {
                l.collect_variables(vars);
                r.collect_variables(vars);
            }
            Expr::Const(_) => {}
        }
    }
}

/// Fold two constants, keeping the node when the result does not fit
fn fold(
    l: i64,
    r: i64,
    op: impl Fn(i64, i64) -> Option<i64>,
    node: fn(Box<Expr>, Box<Expr>) -> Expr,
) -> Expr {
    match op(l, r) {
        Some(n) => Expr::Const(n),
        None => node(Box::new(Expr::Const(l)), Box::new(Expr::Const(r))),
    }
}

macro_rules! impl_from_integer_for_expr {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Expr {
                fn from(n: $t) -> Self {
                    Expr::Const(n as i64)
                }
            }
        )*
    };
}

impl_from_integer_for_expr!(u8, u16, u32, u64, usize, i8, i16, i32, i64, isize);

impl From<&str> for Expr {
    fn from(name: &str) -> Self {
        Expr::Var(name.to_string())
    }
}

macro_rules! impl_expr_binary_op {
    ($trait:ident, $fname:ident, $variant:expr) => {
        impl<T: Into<Expr>> $trait<T> for Expr {
            type Output = Expr;
            fn $fname(self, rhs: T) -> Self::Output {
                $variant(Box::new(self), Box::new(rhs.into()))
            }
        }
    };
}

impl_expr_binary_op!(Add, add, Expr::Add);
impl_expr_binary_op!(Sub, sub, Expr::Sub);
impl_expr_binary_op!(Mul, mul, Expr::Mul);
impl_expr_binary_op!(Div, div, Expr::Div);
impl_expr_binary_op!(Rem, rem, Expr::Rem);
