//! Backend-agnostic loop-nest program
//!
//! A [`Kernel`] is a tree of [`Scope`]s holding [`Stmt`]s. Loops and
//! conditionals own their bodies, so the tree is freely movable and has no
//! parent links; code walking it uses [`IrVisitor`] or [`IrMutator`].

mod printer;
mod validate;
mod visitor;

pub use printer::KernelPrinter;
pub use validate::validate_kernel;
pub use visitor::{IrMutator, IrVisitor, StmtPath};

use indexmap::IndexMap;

use crate::expr::{Expr, Literal};
use crate::ir::{AxisId, MemoryKind, OpId, ParallelType, TensorGraph, TensorId, Value};

/// How a loop's index is named
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopIndex {
    /// Materialized loop variable
    Symbol(String),
    /// Launch-provided index such as `threadIdx.x`
    Builtin(ParallelType),
}

impl std::fmt::Display for LoopIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoopIndex::Symbol(name) => write!(f, "{}", name),
            LoopIndex::Builtin(ptype) => write!(f, "{}", ptype),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForLoop {
    pub axis: AxisId,
    pub index: LoopIndex,
    pub start: Expr,
    pub stop: Expr,
    pub step: Expr,
    /// Axis is a broadcast axis
    pub is_broadcast: bool,
    pub parallel: ParallelType,
    pub body: Scope,
}

impl ForLoop {
    /// Loop over `axis` of `graph` from zero to its extent
    pub fn over(graph: &TensorGraph, axis: AxisId, index: LoopIndex) -> Self {
        let ax = graph.axis(axis);
        Self {
            axis,
            index,
            start: Expr::Const(0),
            stop: ax.extent.clone(),
            step: Expr::Const(1),
            is_broadcast: ax.is_broadcast(),
            parallel: ax.parallel,
            body: Scope::default(),
        }
    }

    /// Loop that materializes no iterations of its own
    pub fn is_trivial(&self) -> bool {
        self.is_broadcast
            || self.parallel.is_thread()
            || self.parallel.is_vectorize()
            || self.stop.is_one()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfThenElse {
    pub predicate: Expr,
    pub then_body: Scope,
    pub else_body: Scope,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Allocate {
    pub buffer: Value,
    pub memory: MemoryKind,
    pub size: Expr,
    pub zero_init: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Compute {
    /// Evaluate an operation of the tensor graph
    Op(OpId),
    /// Write a reduction's identity into its output
    InitReduction { tensor: TensorId, value: Literal },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    ForLoop(ForLoop),
    IfThenElse(IfThenElse),
    Allocate(Allocate),
    Barrier,
    Compute(Compute),
}

impl Stmt {
    pub fn as_for_loop(&self) -> Option<&ForLoop> {
        match self {
            Stmt::ForLoop(fl) => Some(fl),
            _ => None,
        }
    }
}

/// Ordered statement list
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Scope {
    pub stmts: Vec<Stmt>,
}

impl Scope {
    pub fn push(&mut self, stmt: Stmt) {
        self.stmts.push(stmt);
    }

    pub fn insert(&mut self, at: usize, stmt: Stmt) {
        self.stmts.insert(at, stmt);
    }

    pub fn len(&self) -> usize {
        self.stmts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stmts.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Stmt> {
        self.stmts.iter()
    }
}

/// Lowered program with the commit positions it was built from
#[derive(Debug, Clone, PartialEq)]
pub struct Kernel {
    pub body: Scope,
    pub commit_positions: IndexMap<TensorId, usize>,
}

impl Kernel {
    /// Count of statements satisfying `pred`, at any depth
    pub fn count(&self, pred: impl Fn(&Stmt) -> bool) -> usize {
        struct Counter<F> {
            pred: F,
            count: usize,
        }
        impl<F: Fn(&Stmt) -> bool> IrVisitor for Counter<F> {
            fn visit_stmt(&mut self, stmt: &Stmt) {
                if (self.pred)(stmt) {
                    self.count += 1;
                }
                self.walk_stmt(stmt);
            }
        }
        let mut counter = Counter { pred, count: 0 };
        counter.visit_scope(&self.body);
        counter.count
    }
}
