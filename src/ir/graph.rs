use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};

use log::{debug, trace};
use petgraph::Direction;
use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, NodeIndex};
use rustc_hash::{FxHashMap, FxHashSet};

use super::axis::{Axis, AxisKind, AxisSpec, ParallelType};
use super::tensor::{MemoryKind, Op, OpKind, Scalar, Tensor, Value};
use super::{AxisId, OpId, ScalarId, TensorId};
use crate::error::{LoweringError, Result};
use crate::expr::Expr;

/// Arena holding every axis, tensor, scalar and operation of one fusion
///
/// Handles are indices into the arenas and stay valid for the lifetime of
/// the graph; axes replaced by `split`/`merge` are retired from their
/// tensor's domain but kept so that derived axes can refer to them.
#[derive(Debug, Clone, Default)]
pub struct TensorGraph {
    axes: Vec<Axis>,
    tensors: Vec<Tensor>,
    scalars: Vec<Scalar>,
    ops: Vec<Op>,
    inputs: Vec<TensorId>,
    outputs: Vec<TensorId>,
}

impl TensorGraph {
    pub fn new() -> Self {
        Self::default()
    }

    // ============================================================================
    // Construction
    // ============================================================================

    fn new_axis(&mut self, tensor: TensorId, kind: AxisKind, extent: Expr, origins: Vec<AxisId>) -> AxisId {
        let id = AxisId(self.axes.len());
        self.axes.push(Axis {
            id,
            tensor,
            kind,
            parallel: ParallelType::Serial,
            extent,
            origins,
        });
        id
    }

    /// Add a tensor whose root and leaf domains are `dims`
    pub fn add_tensor<S: Into<AxisSpec>>(
        &mut self,
        name: &str,
        dims: impl IntoIterator<Item = S>,
    ) -> TensorId {
        let id = TensorId(self.tensors.len());
        let root: Vec<AxisId> = dims
            .into_iter()
            .map(|spec| {
                let spec = spec.into();
                self.new_axis(id, spec.kind, spec.extent, vec![])
            })
            .collect();
        self.tensors.push(Tensor {
            id,
            name: name.to_string(),
            domain: root.clone(),
            root,
            rfactor: None,
            memory: MemoryKind::Local,
            definition: None,
            uses: vec![],
            commit_position: 0,
            max_producer_position: 0,
            is_input: false,
            is_output: false,
        });
        id
    }

    pub fn add_scalar(&mut self, name: &str) -> ScalarId {
        let id = ScalarId(self.scalars.len());
        self.scalars.push(Scalar {
            id,
            name: name.to_string(),
        });
        id
    }

    /// Add an operation, wiring it up as the definition of its outputs and
    /// a use of its inputs
    pub fn add_op(&mut self, kind: OpKind, inputs: Vec<Value>, outputs: Vec<Value>) -> OpId {
        let id = OpId(self.ops.len());
        for input in &inputs {
            if let Value::Tensor(t) = input {
                let uses = &mut self.tensors[t.0].uses;
                if !uses.contains(&id) {
                    uses.push(id);
                }
            }
        }
        for output in &outputs {
            if let Value::Tensor(t) = output {
                let tensor = &mut self.tensors[t.0];
                if let Some(old) = tensor.definition.replace(id) {
                    debug!("{} redefined: {} -> {}", tensor.name, old, id);
                }
            }
        }
        self.ops.push(Op {
            id,
            kind,
            inputs,
            outputs,
        });
        id
    }

    pub fn mark_input(&mut self, t: TensorId) {
        self.tensors[t.0].is_input = true;
        if !self.inputs.contains(&t) {
            self.inputs.push(t);
        }
    }

    pub fn mark_output(&mut self, t: TensorId) {
        self.tensors[t.0].is_output = true;
        if !self.outputs.contains(&t) {
            self.outputs.push(t);
        }
    }

    pub fn set_memory(&mut self, t: TensorId, memory: MemoryKind) {
        let tensor = &mut self.tensors[t.0];
        if tensor.memory != MemoryKind::Local && tensor.memory != memory {
            debug!("{} memory overwritten: {} -> {}", tensor.name, tensor.memory, memory);
        }
        tensor.memory = memory;
    }

    pub fn parallelize(&mut self, axis: AxisId, ptype: ParallelType) {
        let axis = &mut self.axes[axis.0];
        if axis.parallel != ParallelType::Serial && axis.parallel != ptype {
            debug!("{} parallel type overwritten: {} -> {}", axis, axis.parallel, ptype);
        }
        axis.parallel = ptype;
    }

    /// Fails if `pos` exceeds the tensor's leaf axis count
    pub fn set_commit_position(&mut self, t: TensorId, pos: usize) -> Result<()> {
        let tensor = &mut self.tensors[t.0];
        if pos > tensor.domain.len() {
            return Err(LoweringError::structural(
                &*tensor,
                format!("commit position {} beyond {} axes", pos, tensor.domain.len()),
            ));
        }
        trace!("{}: commit position {} -> {}", tensor.name, tensor.commit_position, pos);
        tensor.commit_position = pos;
        Ok(())
    }

    pub fn set_max_producer_position(&mut self, t: TensorId, pos: usize) {
        self.tensors[t.0].max_producer_position = pos;
    }

    // ============================================================================
    // Axis transforms
    // ============================================================================

    /// Split the axis at `pos` into `[ceilDiv(extent, factor), factor]`
    pub fn split(&mut self, t: TensorId, pos: usize, factor: impl Into<Expr>) -> (AxisId, AxisId) {
        let old = self.tensors[t.0].domain[pos];
        let (kind, extent) = {
            let axis = &self.axes[old.0];
            (axis.kind, axis.extent.clone())
        };
        let factor = factor.into();
        let outer = self.new_axis(t, kind, extent.ceil_div(factor.clone()).simplify(), vec![old]);
        let inner = self.new_axis(t, kind, factor, vec![old]);
        self.tensors[t.0].domain.splice(pos..=pos, [outer, inner]);
        (outer, inner)
    }

    /// Merge the axes at `pos` and `pos + 1` into one
    pub fn merge(&mut self, t: TensorId, pos: usize) -> AxisId {
        let (outer, inner) = {
            let domain = &self.tensors[t.0].domain;
            (domain[pos], domain[pos + 1])
        };
        let (a, b) = (&self.axes[outer.0], &self.axes[inner.0]);
        let kind = match (a.kind, b.kind) {
            (AxisKind::Broadcast, AxisKind::Broadcast) => AxisKind::Broadcast,
            (AxisKind::Reduction, _) | (_, AxisKind::Reduction) => AxisKind::Reduction,
            _ => AxisKind::Iteration,
        };
        let extent = (a.extent.clone() * b.extent.clone()).simplify();
        let merged = self.new_axis(t, kind, extent, vec![outer, inner]);
        self.tensors[t.0].domain.splice(pos..=pos + 1, [merged]);
        merged
    }

    /// Permute the leaf domain; `order[i]` is the old position placed at `i`
    pub fn reorder(&mut self, t: TensorId, order: &[usize]) {
        let domain = &self.tensors[t.0].domain;
        assert_eq!(order.len(), domain.len(), "reorder must cover every axis");
        let mut seen = FxHashSet::default();
        assert!(
            order.iter().all(|&p| p < domain.len() && seen.insert(p)),
            "reorder must be a permutation"
        );
        let reordered = order.iter().map(|&p| domain[p]).collect();
        self.tensors[t.0].domain = reordered;
    }

    /// Snapshot the current leaf domain as the tensor's rfactor domain
    pub fn set_rfactor_domain(&mut self, t: TensorId) {
        let tensor = &mut self.tensors[t.0];
        tensor.rfactor = Some(tensor.domain.clone());
    }

    // ============================================================================
    // Queries
    // ============================================================================

    pub fn tensor(&self, t: TensorId) -> &Tensor {
        &self.tensors[t.0]
    }

    pub fn axis(&self, a: AxisId) -> &Axis {
        &self.axes[a.0]
    }

    pub fn op(&self, o: OpId) -> &Op {
        &self.ops[o.0]
    }

    pub fn scalar(&self, s: ScalarId) -> &Scalar {
        &self.scalars[s.0]
    }

    pub fn tensors(&self) -> impl Iterator<Item = &Tensor> {
        self.tensors.iter()
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn inputs(&self) -> &[TensorId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[TensorId] {
        &self.outputs
    }

    /// Leaf axis `pos` of `t`
    pub fn leaf(&self, t: TensorId, pos: usize) -> &Axis {
        self.axis(self.tensors[t.0].domain[pos])
    }

    pub fn value_name(&self, v: Value) -> &str {
        match v {
            Value::Tensor(t) => &self.tensor(t).name,
            Value::Scalar(s) => &self.scalar(s).name,
        }
    }

    pub fn producers_of(&self, t: TensorId) -> Vec<TensorId> {
        let mut producers = Vec::new();
        if let Some(def) = self.tensors[t.0].definition {
            for p in self.ops[def.0].tensor_inputs() {
                if !producers.contains(&p) {
                    producers.push(p);
                }
            }
        }
        producers
    }

    pub fn consumers_of(&self, t: TensorId) -> Vec<TensorId> {
        let mut consumers = Vec::new();
        for &use_op in &self.tensors[t.0].uses {
            for c in self.ops[use_op.0].tensor_outputs() {
                if !consumers.contains(&c) {
                    consumers.push(c);
                }
            }
        }
        consumers
    }

    /// Other tensor outputs of the operation defining `t`
    pub fn siblings_of(&self, t: TensorId) -> Vec<TensorId> {
        match self.tensors[t.0].definition {
            Some(def) => self.ops[def.0].tensor_outputs().filter(|&s| s != t).collect(),
            None => vec![],
        }
    }

    /// Every axis `a` was transitively derived from, nearest first
    pub fn ancestors(&self, a: AxisId) -> Vec<AxisId> {
        let mut out = Vec::new();
        let mut queue: VecDeque<AxisId> = self.axis(a).origins.iter().copied().collect();
        while let Some(next) = queue.pop_front() {
            if !out.contains(&next) {
                out.push(next);
                queue.extend(self.axis(next).origins.iter().copied());
            }
        }
        out
    }

    /// Root axes `a` derives from in creation order (`a` itself if it is a
    /// root axis)
    pub fn root_origins(&self, a: AxisId) -> Vec<AxisId> {
        if self.axis(a).is_root() {
            return vec![a];
        }
        let mut roots: Vec<AxisId> = self
            .ancestors(a)
            .into_iter()
            .filter(|&x| self.axis(x).is_root())
            .collect();
        roots.sort();
        roots
    }

    /// Whether `a` was (transitively) derived from `ancestor`
    pub fn is_derived_from(&self, a: AxisId, ancestor: AxisId) -> bool {
        self.ancestors(a).contains(&ancestor)
    }

    pub fn has_reduction(&self, t: TensorId) -> bool {
        self.tensors[t.0]
            .domain
            .iter()
            .any(|&a| self.axis(a).is_reduction())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DepNode {
    Value(Value),
    Op(OpId),
}

/// Value/operation dependency graph used for ordering queries
#[derive(Debug, Clone)]
pub struct DependencyIndex {
    graph: DiGraph<DepNode, ()>,
    values: FxHashMap<Value, NodeIndex>,
    ops: Vec<NodeIndex>,
}

impl DependencyIndex {
    pub fn build(graph: &TensorGraph) -> Self {
        let mut dep = DiGraph::new();
        let mut values = FxHashMap::default();
        for t in &graph.tensors {
            let v = Value::Tensor(t.id);
            values.insert(v, dep.add_node(DepNode::Value(v)));
        }
        for s in &graph.scalars {
            let v = Value::Scalar(s.id);
            values.insert(v, dep.add_node(DepNode::Value(v)));
        }
        let mut ops = Vec::with_capacity(graph.ops.len());
        for op in &graph.ops {
            let node = dep.add_node(DepNode::Op(op.id));
            for input in &op.inputs {
                dep.add_edge(values[input], node, ());
            }
            for output in &op.outputs {
                dep.add_edge(node, values[output], ());
            }
            ops.push(node);
        }
        Self {
            graph: dep,
            values,
            ops,
        }
    }

    /// Whether `b` (transitively) depends on `a`
    pub fn is_dependency_of(&self, a: TensorId, b: TensorId) -> bool {
        if a == b {
            return false;
        }
        let na = self.values[&Value::Tensor(a)];
        let nb = self.values[&Value::Tensor(b)];
        has_path_connecting(&self.graph, na, nb, None)
    }

    /// Whether operation `a` (transitively) consumes a value produced by `b`
    pub fn op_depends_on(&self, a: OpId, b: OpId) -> bool {
        a != b && has_path_connecting(&self.graph, self.ops[b.0], self.ops[a.0], None)
    }

    /// Operations in dependency order, lowest handle first among ready ones
    pub fn topological_order(&self) -> Result<Vec<OpId>> {
        let op_of = |n: NodeIndex| match self.graph[n] {
            DepNode::Op(o) => Some(o),
            DepNode::Value(_) => None,
        };
        let predecessors = |n: NodeIndex| {
            self.graph
                .neighbors_directed(n, Direction::Incoming)
                .flat_map(|v| self.graph.neighbors_directed(v, Direction::Incoming))
                .filter_map(op_of)
                .collect::<FxHashSet<OpId>>()
        };

        let mut pending: Vec<usize> = self.ops.iter().map(|&n| predecessors(n).len()).collect();
        let mut ready: BinaryHeap<Reverse<OpId>> = pending
            .iter()
            .enumerate()
            .filter(|(_, count)| **count == 0)
            .map(|(i, _)| Reverse(OpId(i)))
            .collect();

        let mut order = Vec::with_capacity(self.ops.len());
        while let Some(Reverse(op)) = ready.pop() {
            order.push(op);
            let successors: FxHashSet<OpId> = self
                .graph
                .neighbors_directed(self.ops[op.0], Direction::Outgoing)
                .flat_map(|v| self.graph.neighbors_directed(v, Direction::Outgoing))
                .filter_map(op_of)
                .collect();
            for next in successors {
                pending[next.0] -= 1;
                if pending[next.0] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        if order.len() != self.ops.len() {
            return Err(LoweringError::ordering(
                "operation graph has a cycle",
                self.ops.len(),
                order.len(),
            ));
        }
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> (TensorGraph, TensorId, TensorId, TensorId) {
        let mut g = TensorGraph::new();
        let t0 = g.add_tensor("T0", [8, 16]);
        let t1 = g.add_tensor("T1", [8, 16]);
        let t2 = g.add_tensor("T2", [8, 16]);
        g.mark_input(t0);
        g.add_op(OpKind::pointwise("exp"), vec![t0.into()], vec![t1.into()]);
        g.add_op(OpKind::pointwise("neg"), vec![t1.into()], vec![t2.into()]);
        g.mark_output(t2);
        (g, t0, t1, t2)
    }

    #[test]
    fn test_producers_and_consumers() {
        let (g, t0, t1, t2) = chain();
        assert_eq!(g.producers_of(t1), vec![t0]);
        assert_eq!(g.consumers_of(t1), vec![t2]);
        assert!(g.producers_of(t0).is_empty());
        assert!(g.consumers_of(t2).is_empty());
        assert!(g.tensor(t0).is_input);
    }

    #[test]
    fn test_commit_position_out_of_range() {
        let (mut g, _, t1, _) = chain();
        g.set_commit_position(t1, 2).unwrap();
        let err = g.set_commit_position(t1, 3).unwrap_err();
        assert!(matches!(err, LoweringError::StructuralViolation { .. }));
        assert_eq!(g.tensor(t1).commit_position, 2);
    }

    #[test]
    fn test_siblings() {
        let mut g = TensorGraph::new();
        let t0 = g.add_tensor("T0", [4]);
        let a = g.add_tensor("A", [4]);
        let b = g.add_tensor("B", [4]);
        g.add_op(OpKind::pointwise("sincos"), vec![t0.into()], vec![a.into(), b.into()]);
        assert_eq!(g.siblings_of(a), vec![b]);
        assert_eq!(g.siblings_of(b), vec![a]);
        assert!(g.siblings_of(t0).is_empty());
    }

    #[test]
    fn test_split_and_merge_record_origins() {
        let mut g = TensorGraph::new();
        let t = g.add_tensor("T0", [AxisSpec::iter("N"), AxisSpec::iter(4)]);
        let root = g.tensor(t).root.clone();
        let (outer, inner) = g.split(t, 0, 32);
        assert_eq!(g.tensor(t).ndims(), 3);
        assert_eq!(g.axis(outer).extent.to_string(), "ceilDiv(N, 32)");
        assert_eq!(g.axis(inner).extent, Expr::Const(32));
        let merged = g.merge(t, 1);
        assert_eq!(g.axis(merged).extent, Expr::Const(128));
        assert_eq!(g.tensor(t).domain, vec![outer, merged]);
        assert!(g.is_derived_from(merged, root[0]));
        assert!(g.is_derived_from(merged, root[1]));
        assert!(!g.is_derived_from(outer, root[1]));
        assert_eq!(g.root_origins(merged), vec![root[0], root[1]]);
        assert_eq!(g.root_origins(root[1]), vec![root[1]]);
    }

    #[test]
    fn test_reorder() {
        let mut g = TensorGraph::new();
        let t = g.add_tensor("T0", [2, 3, 4]);
        let before = g.tensor(t).domain.clone();
        g.reorder(t, &[2, 0, 1]);
        assert_eq!(g.tensor(t).domain, vec![before[2], before[0], before[1]]);
    }

    #[test]
    fn test_rfactor_domain() {
        let mut g = TensorGraph::new();
        let t = g.add_tensor("T0", [2, 3]);
        assert_eq!(g.tensor(t).maybe_rfactor(), g.tensor(t).root.as_slice());
        let merged = g.merge(t, 0);
        g.set_rfactor_domain(t);
        assert_eq!(g.tensor(t).maybe_rfactor(), &[merged]);
    }

    #[test]
    fn test_dependency_index() {
        let (g, t0, t1, t2) = chain();
        let deps = DependencyIndex::build(&g);
        assert!(deps.is_dependency_of(t0, t2));
        assert!(deps.is_dependency_of(t1, t2));
        assert!(!deps.is_dependency_of(t2, t1));
        assert!(!deps.is_dependency_of(t1, t1));
        let (exp, neg) = (OpId(0), OpId(1));
        assert!(deps.op_depends_on(neg, exp));
        assert!(!deps.op_depends_on(exp, neg));
    }

    #[test]
    fn test_topological_order_prefers_lower_handles() {
        let mut g = TensorGraph::new();
        let t0 = g.add_tensor("T0", [4]);
        let t1 = g.add_tensor("T1", [4]);
        let t2 = g.add_tensor("T2", [4]);
        let t3 = g.add_tensor("T3", [4]);
        // op0 consumes the output of op1
        let op0 = g.add_op(OpKind::pointwise("neg"), vec![t1.into()], vec![t2.into()]);
        let op1 = g.add_op(OpKind::pointwise("exp"), vec![t0.into()], vec![t1.into()]);
        let op2 = g.add_op(OpKind::pointwise("abs"), vec![t0.into()], vec![t3.into()]);
        let order = DependencyIndex::build(&g).topological_order().unwrap();
        assert_eq!(order, vec![op1, op0, op2]);
    }

    #[test]
    fn test_cycle_is_an_ordering_violation() {
        let mut g = TensorGraph::new();
        let a = g.add_tensor("A", [4]);
        let b = g.add_tensor("B", [4]);
        g.add_op(OpKind::pointwise("f"), vec![a.into()], vec![b.into()]);
        g.add_op(OpKind::pointwise("g"), vec![b.into()], vec![a.into()]);
        let err = DependencyIndex::build(&g).topological_order().unwrap_err();
        assert!(matches!(err, LoweringError::OrderingViolation { .. }));
    }
}
