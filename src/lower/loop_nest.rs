//! Loop-nest builder
//!
//! Walks the linearized operations and keeps a stack of open loops. For
//! each operation the loops it needs are derived from the commit-target
//! map; the stack is closed back to the common prefix and the rest opened.
//! Allocations go to the front of the scope owning the tensor's committed
//! loops, reduction inits right behind them.

use std::collections::VecDeque;

use indexmap::IndexMap;
use log::{debug, trace};
use rustc_hash::FxHashSet;

use crate::error::{LoweringError, Result};
use crate::eval::ExtentResolver;
use crate::expr::{Expr, Literal};
use crate::ir::{AxisId, MemoryKind, Op, OpId, TensorGraph, TensorId, Value};
use crate::kernel_ir::{
    Allocate, Compute, ForLoop, IrMutator, Kernel, LoopIndex, Scope, Stmt, StmtPath,
};
use crate::schedule::ComputeAtMap;
use crate::symbols::SymbolAllocator;

struct OpenLoop {
    fl: ForLoop,
    /// Statements inserted at the front of the body so far
    alloc_cursor: usize,
}

/// Scope an allocation is placed in: an open loop, or the kernel body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AllocScope {
    Root,
    Loop(usize),
}

pub struct LoopNestBuilder<'a> {
    graph: &'a TensorGraph,
    ca_map: &'a ComputeAtMap<'a>,
    resolver: &'a dyn ExtentResolver,
    symbols: &'a mut dyn SymbolAllocator,
    root: Scope,
    root_cursor: usize,
    open: Vec<OpenLoop>,
    /// Allocations whose size is not a literal, spliced in front at the end
    hoisted: Vec<Stmt>,
    /// Shared-memory tensors written since the last barrier
    pending_shared: FxHashSet<TensorId>,
    allocated: FxHashSet<TensorId>,
}

impl<'a> LoopNestBuilder<'a> {
    pub fn new(
        ca_map: &'a ComputeAtMap<'a>,
        resolver: &'a dyn ExtentResolver,
        symbols: &'a mut dyn SymbolAllocator,
    ) -> Self {
        Self {
            graph: ca_map.graph(),
            ca_map,
            resolver,
            symbols,
            root: Scope::default(),
            root_cursor: 0,
            open: Vec::new(),
            hoisted: Vec::new(),
            pending_shared: FxHashSet::default(),
            allocated: FxHashSet::default(),
        }
    }

    pub fn build(mut self, ops: &[OpId]) -> Result<Kernel> {
        let graph = self.graph;
        for &op in ops {
            self.handle(graph.op(op))?;
        }
        self.close_to(0);

        if !self.hoisted.is_empty() {
            debug!("Hoisting {} allocations to the kernel start", self.hoisted.len());
            let hoisted = std::mem::take(&mut self.hoisted);
            if self.root.is_empty() {
                self.root.stmts = hoisted;
            } else {
                let mut mutator = IrMutator::new();
                for stmt in hoisted {
                    mutator.insert_before(StmtPath(vec![0]), stmt);
                }
                mutator.apply(&mut self.root);
            }
        }

        let commit_positions: IndexMap<TensorId, usize> = self
            .graph
            .tensors()
            .map(|t| (t.id, t.commit_position))
            .collect();
        Ok(Kernel {
            body: self.root,
            commit_positions,
        })
    }

    // ============================================================================
    // Scope handling
    // ============================================================================

    fn current_scope(&mut self) -> &mut Scope {
        match self.open.last_mut() {
            Some(open) => &mut open.fl.body,
            None => &mut self.root,
        }
    }

    fn scope_and_cursor(&mut self, scope: AllocScope) -> (&mut Scope, &mut usize) {
        match scope {
            AllocScope::Root => (&mut self.root, &mut self.root_cursor),
            AllocScope::Loop(i) => {
                let open = &mut self.open[i];
                (&mut open.fl.body, &mut open.alloc_cursor)
            }
        }
    }

    /// Thread-bound loops use the launch index, the rest a fresh symbol
    fn loop_index(&mut self, axis: AxisId) -> LoopIndex {
        let parallel = self.graph.axis(axis).parallel;
        if parallel.is_thread() {
            LoopIndex::Builtin(parallel)
        } else {
            LoopIndex::Symbol(self.symbols.fresh())
        }
    }

    fn open_loop(&mut self, axis: AxisId) {
        let index = self.loop_index(axis);
        trace!("Opening loop {} over {}", index, self.graph.axis(axis));
        self.open.push(OpenLoop {
            fl: ForLoop::over(self.graph, axis, index),
            alloc_cursor: 0,
        });
    }

    fn close_loop(&mut self) {
        if let Some(closed) = self.open.pop() {
            trace!("Closing loop {}", closed.fl.index);
            self.current_scope().push(Stmt::ForLoop(closed.fl));
        }
    }

    /// Close loops until only `depth` remain open
    fn close_to(&mut self, depth: usize) {
        while self.open.len() > depth {
            self.close_loop();
        }
    }

    // ============================================================================
    // Per-operation lowering
    // ============================================================================

    /// Loops `out` is computed in, outermost first
    fn loop_structure(&self, out: TensorId) -> Result<Vec<AxisId>> {
        let tensor = self.graph.tensor(out);
        let mut structure: VecDeque<AxisId> = VecDeque::new();
        let mut last: Option<(TensorId, usize)> = None;

        for out_i in 0..tensor.commit_position {
            let (ca_id, ca_view) = self.ca_map.compute_at_axis(out, out_i);
            let view_ndims = self.graph.tensor(ca_view).ndims();
            let start = match last {
                None => 0,
                Some((view, ind)) if view == ca_view => ind + 1,
                Some(_) => {
                    // resume right after the innermost loop already in the structure
                    let back = structure.back().copied();
                    (0..view_ndims)
                        .find(|&i| Some(self.ca_map.loop_axis(ca_view, i)) == back)
                        .map_or(view_ndims, |i| i + 1)
                }
            };
            let mut reached = false;
            for ca_i in start..view_ndims {
                let axis = self.ca_map.loop_axis(ca_view, ca_i);
                structure.push_back(axis);
                last = Some((ca_view, ca_i));
                if axis == ca_id {
                    reached = true;
                    break;
                }
            }
            if !reached {
                return Err(LoweringError::structural(
                    tensor,
                    format!(
                        "loop of axis {} not found in {}",
                        out_i,
                        self.graph.tensor(ca_view)
                    ),
                ));
            }
        }
        structure.extend(tensor.domain[tensor.commit_position..].iter().copied());
        Ok(structure.into())
    }

    fn handle(&mut self, op: &Op) -> Result<()> {
        let outputs: Vec<TensorId> = op.tensor_outputs().collect();
        let Some(&out) = outputs.first() else {
            return self.handle_scalar_op(op);
        };
        debug!("Lowering {} ({})", op.id, op.kind.name());

        let needs_sync = op.tensor_inputs().any(|t| self.pending_shared.contains(&t));
        let structure = self.loop_structure(out)?;
        let common = self
            .open
            .iter()
            .zip(&structure)
            .take_while(|(open, axis)| open.fl.axis == **axis)
            .count();
        self.close_to(common);

        let producers_inlined = self.graph.tensor(out).max_producer_position > 0;
        if needs_sync && !producers_inlined {
            self.insert_barrier();
        }
        for &axis in &structure[common..] {
            self.open_loop(axis);
        }
        if needs_sync && producers_inlined {
            self.insert_barrier();
        }

        for &t in &outputs {
            let alloc = self.allocate(t)?;
            if let Some(init) = op.init_value()
                && self.graph.has_reduction(t)
            {
                self.init_reduction(t, init, alloc)?;
            }
        }

        self.current_scope().push(Stmt::Compute(Compute::Op(op.id)));
        for &t in &outputs {
            if self.graph.tensor(t).memory == MemoryKind::Shared {
                self.pending_shared.insert(t);
            }
        }

        let commit = self.graph.tensor(out).commit_position;
        if commit == 0 {
            self.close_to(0);
        } else {
            let target = self.ca_map.loop_axis(out, commit - 1);
            while self.open.last().is_some_and(|o| o.fl.axis != target) {
                self.close_loop();
            }
        }
        Ok(())
    }

    /// Operations without tensor outputs get a one-element slot per output
    fn handle_scalar_op(&mut self, op: &Op) -> Result<()> {
        trace!("Lowering scalar {}", op.id);
        for &output in &op.outputs {
            self.current_scope().push(Stmt::Allocate(Allocate {
                buffer: output,
                memory: MemoryKind::Local,
                size: Expr::Const(1),
                zero_init: false,
            }));
        }
        self.current_scope().push(Stmt::Compute(Compute::Op(op.id)));
        Ok(())
    }

    fn insert_barrier(&mut self) {
        trace!("Barrier for {} pending shared tensors", self.pending_shared.len());
        self.current_scope().push(Stmt::Barrier);
        self.pending_shared.clear();
    }

    /// Open loop holding the committed loops of `t`
    fn alloc_scope(&self, t: TensorId) -> Result<AllocScope> {
        let commit = self.graph.tensor(t).commit_position;
        if commit == 0 {
            return Ok(AllocScope::Root);
        }
        let axis = self.ca_map.loop_axis(t, commit - 1);
        self.open
            .iter()
            .rposition(|o| o.fl.axis == axis)
            .map(AllocScope::Loop)
            .ok_or_else(|| {
                LoweringError::structural(
                    self.graph.tensor(t),
                    format!("no open loop over {} to allocate in", self.graph.axis(axis)),
                )
            })
    }

    /// Buffer extent of `t`; which axes count depends on where it lives
    fn alloc_size(&self, t: TensorId) -> Expr {
        let tensor = self.graph.tensor(t);
        let memory = tensor.memory;
        let dims = (0..tensor.ndims()).filter_map(|i| {
            let local = self.graph.leaf(t, i);
            if local.is_reduction() || local.is_broadcast() {
                return None;
            }
            let ca_dim = self.graph.axis(self.ca_map.loop_axis(t, i));
            let keep = if i < tensor.commit_position {
                // a shared loop still spans the buffer when other threads see it
                (memory == MemoryKind::Shared && ca_dim.parallel.is_thread_dim())
                    || (memory == MemoryKind::Global && ca_dim.parallel.is_thread())
            } else {
                !((memory == MemoryKind::Shared && ca_dim.parallel.is_block_dim())
                    || (memory == MemoryKind::Local && ca_dim.parallel.is_thread()))
            };
            keep.then(|| ca_dim.extent.clone())
        });
        Expr::product(dims)
    }

    /// Allocate `t` unless the graph owns its buffer; returns where the
    /// allocation went if it was placed in its scope
    fn allocate(&mut self, t: TensorId) -> Result<Option<AllocScope>> {
        let graph = self.graph;
        let tensor = graph.tensor(t);
        if tensor.is_input || tensor.is_output {
            return Ok(None);
        }
        if !self.allocated.insert(t) {
            return Err(LoweringError::structural(tensor, "allocated twice"));
        }

        let size = self.alloc_size(t);
        let alloc = Allocate {
            buffer: Value::Tensor(t),
            memory: tensor.memory,
            size: size.clone(),
            zero_init: tensor.memory == MemoryKind::Global && graph.has_reduction(t),
        };
        match self.resolver.resolve(&size) {
            Some(n) => {
                let scope = self.alloc_scope(t)?;
                trace!("Allocating {}[{}] in {:?}", tensor, n, scope);
                let (body, cursor) = self.scope_and_cursor(scope);
                body.insert(
                    *cursor,
                    Stmt::Allocate(Allocate {
                        size: Expr::Const(n),
                        ..alloc
                    }),
                );
                *cursor += 1;
                Ok(Some(scope))
            }
            None => {
                trace!("Hoisting allocation of {}[{}]", tensor, size);
                self.hoisted.push(Stmt::Allocate(alloc));
                Ok(None)
            }
        }
    }

    /// Loop nest writing the identity of `t` over its non-reduction axes
    /// past the commit position
    fn init_reduction(
        &mut self,
        t: TensorId,
        value: Literal,
        placed: Option<AllocScope>,
    ) -> Result<()> {
        let graph = self.graph;
        let tensor = graph.tensor(t);
        let axes: Vec<AxisId> = (tensor.commit_position..tensor.ndims())
            .filter(|&i| !graph.leaf(t, i).is_reduction())
            .map(|i| self.ca_map.loop_axis(t, i))
            .collect();

        let mut loops: Vec<ForLoop> = Vec::with_capacity(axes.len());
        for axis in axes {
            let index = self.loop_index(axis);
            loops.push(ForLoop::over(graph, axis, index));
        }
        let mut nest = Stmt::Compute(Compute::InitReduction { tensor: t, value });
        for mut fl in loops.into_iter().rev() {
            fl.body.push(nest);
            nest = Stmt::ForLoop(fl);
        }

        let scope = self.alloc_scope(t)?;
        let (body, cursor) = self.scope_and_cursor(scope);
        // right behind the allocation, or first thing in the scope
        let at = if placed == Some(scope) { *cursor } else { 0 };
        body.insert(at, nest);
        *cursor += 1;
        Ok(())
    }
}
