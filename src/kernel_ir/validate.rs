//! Structural checks on a built kernel

use log::trace;
use rustc_hash::{FxHashMap, FxHashSet};

use super::{Allocate, Compute, IrVisitor, Kernel, Scope, Stmt, StmtPath};
use crate::error::{LoweringError, Result};
use crate::ir::{TensorGraph, Value};

/// Check that
///
/// - no scope opens two sibling loops over the same axis (reduction-init
///   nests are exempt, they revisit the axes of the computation they
///   prepare),
/// - no buffer is allocated twice,
/// - every reduction init comes after its buffer's allocation.
pub fn validate_kernel(graph: &TensorGraph, kernel: &Kernel) -> Result<()> {
    check_sibling_loops(graph, &kernel.body)?;

    let allocs = StmtPath::find_all(&kernel.body, |s| matches!(s, Stmt::Allocate(_)));
    let mut alloc_paths: FxHashMap<Value, StmtPath> = FxHashMap::default();
    for path in allocs {
        if let Some(Stmt::Allocate(Allocate { buffer, .. })) = stmt_at(&kernel.body, &path) {
            if alloc_paths.insert(*buffer, path).is_some() {
                return Err(LoweringError::structural(
                    graph.value_name(*buffer),
                    "allocated more than once",
                ));
            }
        }
    }

    let inits = StmtPath::find_all(&kernel.body, |s| {
        matches!(s, Stmt::Compute(Compute::InitReduction { .. }))
    });
    for path in inits {
        if let Some(Stmt::Compute(Compute::InitReduction { tensor, .. })) = stmt_at(&kernel.body, &path) {
            if let Some(alloc) = alloc_paths.get(&Value::Tensor(*tensor)) {
                if *alloc > path {
                    return Err(LoweringError::structural(
                        graph.tensor(*tensor),
                        format!("initialized at {} before its allocation at {}", path, alloc),
                    ));
                }
            }
        }
    }
    trace!("Kernel validated");
    Ok(())
}

fn stmt_at<'a>(scope: &'a Scope, path: &StmtPath) -> Option<&'a Stmt> {
    let (&first, mut rest) = path.0.split_first()?;
    let mut stmt = scope.stmts.get(first)?;
    while let Some((&i, tail)) = rest.split_first() {
        stmt = match stmt {
            Stmt::ForLoop(fl) => {
                rest = tail;
                fl.body.stmts.get(i)?
            }
            Stmt::IfThenElse(ite) => {
                let body = if i == 0 { &ite.then_body } else { &ite.else_body };
                let (&j, tail) = tail.split_first()?;
                rest = tail;
                body.stmts.get(j)?
            }
            _ => return None,
        };
    }
    Some(stmt)
}

/// A loop whose body, at any depth, only initializes reductions
fn is_init_nest(stmt: &Stmt) -> bool {
    #[derive(Default)]
    struct OnlyInit {
        init: bool,
        other: bool,
    }
    impl IrVisitor for OnlyInit {
        fn visit_allocate(&mut self, _alloc: &Allocate) {
            self.other = true;
        }
        fn visit_barrier(&mut self) {
            self.other = true;
        }
        fn visit_compute(&mut self, compute: &Compute) {
            match compute {
                Compute::InitReduction { .. } => self.init = true,
                Compute::Op(_) => self.other = true,
            }
        }
    }
    let mut visitor = OnlyInit::default();
    visitor.visit_stmt(stmt);
    visitor.init && !visitor.other
}

fn check_sibling_loops(graph: &TensorGraph, scope: &Scope) -> Result<()> {
    let mut seen = FxHashSet::default();
    for stmt in &scope.stmts {
        match stmt {
            Stmt::ForLoop(fl) => {
                if !is_init_nest(stmt) && !seen.insert(fl.axis) {
                    let axis = graph.axis(fl.axis);
                    return Err(LoweringError::structural(
                        graph.tensor(axis.tensor),
                        format!("loop over {} reopened in the same scope", axis),
                    ));
                }
                check_sibling_loops(graph, &fl.body)?;
            }
            Stmt::IfThenElse(ite) => {
                check_sibling_loops(graph, &ite.then_body)?;
                check_sibling_loops(graph, &ite.else_body)?;
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{Expr, Literal};
    use crate::ir::{MemoryKind, OpKind, TensorId};
    use crate::kernel_ir::{ForLoop, LoopIndex};
    use indexmap::IndexMap;

    fn setup() -> (TensorGraph, TensorId, crate::ir::OpId) {
        let mut g = TensorGraph::new();
        let t0 = g.add_tensor("T0", [8]);
        let t1 = g.add_tensor("T1", [8]);
        let op = g.add_op(OpKind::pointwise("exp"), vec![t0.into()], vec![t1.into()]);
        (g, t1, op)
    }

    fn kernel(stmts: Vec<Stmt>) -> Kernel {
        Kernel {
            body: Scope { stmts },
            commit_positions: IndexMap::new(),
        }
    }

    fn alloc(t: TensorId) -> Stmt {
        Stmt::Allocate(Allocate {
            buffer: t.into(),
            memory: MemoryKind::Local,
            size: Expr::Const(8),
            zero_init: false,
        })
    }

    fn init(t: TensorId) -> Stmt {
        Stmt::Compute(Compute::InitReduction {
            tensor: t,
            value: Literal::Float(0.0),
        })
    }

    fn loop_with(g: &TensorGraph, t: TensorId, body: Vec<Stmt>) -> Stmt {
        let mut fl = ForLoop::over(g, g.tensor(t).axis(0), LoopIndex::Symbol("i0".into()));
        fl.body.stmts = body;
        Stmt::ForLoop(fl)
    }

    #[test]
    fn test_reopened_loop_is_rejected() {
        let (g, t1, op) = setup();
        let compute = Stmt::Compute(Compute::Op(op));
        let k = kernel(vec![
            loop_with(&g, t1, vec![compute.clone()]),
            loop_with(&g, t1, vec![compute]),
        ]);
        let err = validate_kernel(&g, &k).unwrap_err();
        assert!(matches!(err, LoweringError::StructuralViolation { .. }));
    }

    #[test]
    fn test_init_nest_may_precede_compute_loop() {
        let (g, t1, op) = setup();
        let k = kernel(vec![
            alloc(t1),
            loop_with(&g, t1, vec![init(t1)]),
            loop_with(&g, t1, vec![Stmt::Compute(Compute::Op(op))]),
        ]);
        validate_kernel(&g, &k).unwrap();
    }

    #[test]
    fn test_init_before_allocation_is_rejected() {
        let (g, t1, _) = setup();
        let k = kernel(vec![init(t1), alloc(t1)]);
        assert!(validate_kernel(&g, &k).is_err());
    }

    #[test]
    fn test_double_allocation_is_rejected() {
        let (g, t1, _) = setup();
        let k = kernel(vec![alloc(t1), alloc(t1)]);
        let err = validate_kernel(&g, &k).unwrap_err();
        assert!(err.to_string().contains("allocated more than once"));
    }
}
