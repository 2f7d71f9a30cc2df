//! Walking and editing statement trees

use std::fmt;

use rustc_hash::{FxHashMap, FxHashSet};

use super::{Allocate, Compute, ForLoop, IfThenElse, Scope, Stmt};

/// Read-only walk; every default method recurses into children
pub trait IrVisitor {
    fn visit_scope(&mut self, scope: &Scope) {
        for stmt in &scope.stmts {
            self.visit_stmt(stmt);
        }
    }

    fn visit_stmt(&mut self, stmt: &Stmt) {
        self.walk_stmt(stmt);
    }

    /// Dispatch to the variant-specific method
    fn walk_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::ForLoop(fl) => self.visit_for_loop(fl),
            Stmt::IfThenElse(ite) => self.visit_if_then_else(ite),
            Stmt::Allocate(alloc) => self.visit_allocate(alloc),
            Stmt::Barrier => self.visit_barrier(),
            Stmt::Compute(compute) => self.visit_compute(compute),
        }
    }

    fn visit_for_loop(&mut self, fl: &ForLoop) {
        self.visit_scope(&fl.body);
    }

    fn visit_if_then_else(&mut self, ite: &IfThenElse) {
        self.visit_scope(&ite.then_body);
        self.visit_scope(&ite.else_body);
    }

    fn visit_allocate(&mut self, _alloc: &Allocate) {}

    fn visit_barrier(&mut self) {}

    fn visit_compute(&mut self, _compute: &Compute) {}
}

/// Location of a statement
///
/// Each loop adds the index inside its body; a conditional adds the branch
/// (0 for `then`, 1 for `else`) followed by the index inside it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StmtPath(pub Vec<usize>);

impl StmtPath {
    /// Paths of every statement satisfying `pred`, in program order
    pub fn find_all(scope: &Scope, pred: impl Fn(&Stmt) -> bool) -> Vec<StmtPath> {
        fn walk(scope: &Scope, prefix: &mut Vec<usize>, pred: &dyn Fn(&Stmt) -> bool, out: &mut Vec<StmtPath>) {
            for (i, stmt) in scope.stmts.iter().enumerate() {
                prefix.push(i);
                if pred(stmt) {
                    out.push(StmtPath(prefix.clone()));
                }
                match stmt {
                    Stmt::ForLoop(fl) => walk(&fl.body, prefix, pred, out),
                    Stmt::IfThenElse(ite) => {
                        for (branch, body) in [&ite.then_body, &ite.else_body].into_iter().enumerate() {
                            prefix.push(branch);
                            walk(body, prefix, pred, out);
                            prefix.pop();
                        }
                    }
                    _ => {}
                }
                prefix.pop();
            }
        }
        let mut out = Vec::new();
        walk(scope, &mut Vec::new(), &pred, &mut out);
        out
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Display for StmtPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|i| i.to_string()).collect();
        write!(f, "[{}]", parts.join("."))
    }
}

/// Deferred edits to a statement tree
///
/// Requests refer to paths in the tree as it was when they were recorded;
/// `apply` performs all of them in one rebuild, so earlier requests never
/// shift the paths of later ones.
#[derive(Debug, Clone, Default)]
pub struct IrMutator {
    before: FxHashMap<StmtPath, Vec<Stmt>>,
    after: FxHashMap<StmtPath, Vec<Stmt>>,
    removed: FxHashSet<StmtPath>,
}

impl IrMutator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_before(&mut self, at: StmtPath, stmt: Stmt) {
        self.before.entry(at).or_default().push(stmt);
    }

    pub fn insert_after(&mut self, at: StmtPath, stmt: Stmt) {
        self.after.entry(at).or_default().push(stmt);
    }

    pub fn remove(&mut self, at: StmtPath) {
        self.removed.insert(at);
    }

    pub fn is_empty(&self) -> bool {
        self.before.is_empty() && self.after.is_empty() && self.removed.is_empty()
    }

    pub fn apply(mut self, scope: &mut Scope) {
        if self.is_empty() {
            return;
        }
        let taken = std::mem::take(scope);
        *scope = self.rebuild(taken, &mut Vec::new());
    }

    fn rebuild(&mut self, scope: Scope, prefix: &mut Vec<usize>) -> Scope {
        let mut out = Scope::default();
        for (i, stmt) in scope.stmts.into_iter().enumerate() {
            prefix.push(i);
            let path = StmtPath(prefix.clone());
            if let Some(stmts) = self.before.remove(&path) {
                out.stmts.extend(stmts);
            }
            if !self.removed.contains(&path) {
                let stmt = match stmt {
                    Stmt::ForLoop(mut fl) => {
                        fl.body = self.rebuild(fl.body, prefix);
                        Stmt::ForLoop(fl)
                    }
                    Stmt::IfThenElse(mut ite) => {
                        prefix.push(0);
                        ite.then_body = self.rebuild(ite.then_body, prefix);
                        prefix.pop();
                        prefix.push(1);
                        ite.else_body = self.rebuild(ite.else_body, prefix);
                        prefix.pop();
                        Stmt::IfThenElse(ite)
                    }
                    other => other,
                };
                out.stmts.push(stmt);
            }
            if let Some(stmts) = self.after.remove(&path) {
                out.stmts.extend(stmts);
            }
            prefix.pop();
        }
        out
    }
}
