//! Extent resolution
//!
//! The loop-nest builder only needs to know whether an extent or allocation
//! size is a compile-time literal. [`ExpressionEvaluator`] answers that from
//! bound variables and launch dimensions; anything else stays unresolved.

use rustc_hash::FxHashMap;

use crate::expr::Expr;
use crate::ir::ParallelType;

/// Service pinning a symbolic expression to a literal, if it can
pub trait ExtentResolver {
    fn resolve(&self, expr: &Expr) -> Option<i64>;
}

/// Evaluates [`Expr`] trees against bound values
///
/// ```
/// use loopnest::eval::ExpressionEvaluator;
/// use loopnest::expr::Expr;
///
/// let mut eval = ExpressionEvaluator::new();
/// eval.bind("N", 128);
/// assert_eq!(eval.evaluate(&(Expr::var("N") * 2)), Some(256));
/// assert_eq!(eval.evaluate(&Expr::var("M")), None);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ExpressionEvaluator {
    known_values: FxHashMap<String, i64>,
}

impl ExpressionEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a concrete value for a symbolic name
    pub fn bind(&mut self, name: impl Into<String>, value: i64) {
        let name = name.into();
        if let Some(old) = self.known_values.insert(name.clone(), value)
            && old != value
        {
            log::warn!("Rebinding {} from {} to {}", name, old, value);
        }
    }

    /// Set a concrete launch dimension (`blockDim.x`, `gridDim.y`, ...)
    ///
    /// Serial-like parallel types have no launch dimension; binding one is
    /// ignored.
    pub fn bind_parallel(&mut self, ptype: ParallelType, value: i64) {
        match ptype.dim_name() {
            Some(name) => self.bind(name, value),
            None => log::debug!("Ignoring launch dimension for {}", ptype),
        }
    }

    pub fn known_values(&self) -> &FxHashMap<String, i64> {
        &self.known_values
    }

    pub fn evaluate(&self, expr: &Expr) -> Option<i64> {
        match expr {
            Expr::Const(c) => Some(*c),
            Expr::Var(name) => self.known_values.get(name).copied(),
            Expr::Add(l, r) => self.evaluate(l)?.checked_add(self.evaluate(r)?),
            Expr::Sub(l, r) => self.evaluate(l)?.checked_sub(self.evaluate(r)?),
            Expr::Mul(l, r) => self.evaluate(l)?.checked_mul(self.evaluate(r)?),
            Expr::Div(l, r) => self.evaluate(l)?.checked_div(self.evaluate(r)?),
            Expr::CeilDiv(l, r) => {
                let (l, r) = (self.evaluate(l)?, self.evaluate(r)?);
                l.checked_add(r.checked_sub(1)?)?.checked_div_euclid(r)
            }
            Expr::Rem(l, r) => self.evaluate(l)?.checked_rem(self.evaluate(r)?),
            Expr::Lt(l, r) => Some((self.evaluate(l)? < self.evaluate(r)?) as i64),
            Expr::And(l, r) => {
                Some((self.evaluate(l)? != 0 && self.evaluate(r)? != 0) as i64)
            }
        }
    }
}

impl ExtentResolver for ExpressionEvaluator {
    fn resolve(&self, expr: &Expr) -> Option<i64> {
        self.evaluate(expr)
    }
}

/// Resolver that only accepts literals, for callers with nothing bound
#[derive(Debug, Clone, Copy, Default)]
pub struct LiteralResolver;

impl ExtentResolver for LiteralResolver {
    fn resolve(&self, expr: &Expr) -> Option<i64> {
        expr.clone().simplify().as_const()
    }
}
