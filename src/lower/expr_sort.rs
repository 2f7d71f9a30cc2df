//! Operation linearizer
//!
//! Reorders a topologically valid operation list so that everything
//! computed inside one loop nest is contiguous. Each operation is scored by
//! the loop depth it shares with the tensor whose nest it ends up in; the
//! operations of one nest are ordered by that depth and spliced in front of
//! the operation producing the nest's tensor.

use indexmap::IndexMap;
use log::{debug, trace};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{LoweringError, Result};
use crate::ir::{DependencyIndex, Op, OpId, TensorGraph, TensorId};
use crate::schedule::ComputeAtMap;

/// Score of an operation that owns its loop nest
const ROOT_SCORE: usize = usize::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum GroupKey {
    /// Operations nested in the loops of this tensor
    Tensor(TensorId),
    /// An operation without a single tensor output, on its own
    Standalone(OpId),
}

/// Tensor whose loop nest `op` ends up in, with the depth it shares there
fn find_target(ca_map: &ComputeAtMap<'_>, op: &Op) -> (GroupKey, usize) {
    let graph = ca_map.graph();
    let mut outputs = op.tensor_outputs();
    let Some(out) = outputs.next() else {
        return (GroupKey::Standalone(op.id), ROOT_SCORE);
    };
    if outputs.next().is_some() {
        return (GroupKey::Tensor(out), ROOT_SCORE);
    }
    if op.sole_tensor_output().is_none() {
        return (GroupKey::Standalone(op.id), ROOT_SCORE);
    }

    let Some(first) = ca_map.target(out) else {
        return (GroupKey::Tensor(out), ROOT_SCORE);
    };
    let mut target = first.tensor;
    let mut pos = ca_map.relative_position(out);
    loop {
        let tensor = graph.tensor(target);
        let multi_output = tensor
            .definition
            .is_some_and(|def| graph.op(def).tensor_outputs().count() > 1);
        if multi_output || tensor.commit_position < pos {
            break;
        }
        match ca_map.target(target) {
            Some(next) => {
                // depth the op's own shared loops reach in the next target
                pos = match pos {
                    0 => 0,
                    _ => ca_map
                        .relative_axis_position(target, pos - 1)
                        .map_or(0, |p| p + 1),
                };
                target = next.tensor;
            }
            None => break,
        }
    }
    (GroupKey::Tensor(target), pos)
}

/// Within each run of equal score, place operations in breadth-first batches
/// of those whose inputs are already available
fn order_group(graph: &TensorGraph, members: &[(OpId, usize)]) -> Result<Vec<OpId>> {
    if let Some(w) = members.windows(2).find(|w| w[1].1 < w[0].1) {
        return Err(LoweringError::ordering(
            format!("score decreases from {} to {}", w[0].0, w[1].0),
            w[0].1,
            w[1].1,
        ));
    }

    let mut out = Vec::with_capacity(members.len());
    let mut start = 0;
    while start < members.len() {
        let score = members[start].1;
        let len = members[start..].iter().take_while(|m| m.1 == score).count();
        let segment: Vec<OpId> = members[start..start + len].iter().map(|m| m.0).collect();

        let produced: FxHashMap<TensorId, OpId> = segment
            .iter()
            .flat_map(|&op| graph.op(op).tensor_outputs().map(move |t| (t, op)))
            .collect();
        let mut placed = FxHashSet::default();
        let mut pending = segment.clone();
        while !pending.is_empty() {
            let (ready, blocked): (Vec<OpId>, Vec<OpId>) = pending.into_iter().partition(|&op| {
                graph
                    .op(op)
                    .tensor_inputs()
                    .all(|t| produced.get(&t).is_none_or(|p| placed.contains(p)))
            });
            if ready.is_empty() {
                return Err(LoweringError::ordering(
                    "no operation of an equal-score band became ready",
                    segment.len(),
                    placed.len(),
                ));
            }
            placed.extend(ready.iter().copied());
            out.extend(ready);
            pending = blocked;
        }
        start += len;
    }
    Ok(out)
}

/// Whether any operation of `later` consumes a result of `earlier`
fn group_depends_on(deps: &DependencyIndex, later: &[OpId], earlier: &[OpId]) -> bool {
    later
        .iter()
        .any(|&a| earlier.iter().any(|&b| deps.op_depends_on(a, b)))
}

/// Reorder `ops` so that the operations sharing a loop nest are contiguous
pub fn reorder_for_compute_at(
    ca_map: &ComputeAtMap<'_>,
    deps: &DependencyIndex,
    ops: &[OpId],
) -> Result<Vec<OpId>> {
    let graph = ca_map.graph();

    let mut scored: IndexMap<GroupKey, Vec<(OpId, usize)>> = IndexMap::new();
    let mut owner: FxHashMap<OpId, GroupKey> = FxHashMap::default();
    for &op in ops {
        let (key, score) = find_target(ca_map, graph.op(op));
        trace!("{} -> {:?} at {}", op, key, score);
        scored.entry(key).or_default().push((op, score));
        owner.insert(op, key);
    }

    let mut groups: IndexMap<GroupKey, Vec<OpId>> = IndexMap::with_capacity(scored.len());
    for (key, mut members) in scored {
        members.sort_by_key(|&(_, score)| score);
        groups.insert(key, order_group(graph, &members)?);
    }

    // splice every group whose tensor is produced inside another group
    let keys: Vec<GroupKey> = groups.keys().copied().collect();
    for key in keys {
        let GroupKey::Tensor(t) = key else {
            continue;
        };
        let Some(def) = graph.tensor(t).definition else {
            continue;
        };
        let Some(&dest) = owner.get(&def) else {
            continue;
        };
        if dest == key {
            continue;
        }
        let Some(members) = groups.shift_remove(&key) else {
            continue;
        };
        let dest_ops = groups.get_mut(&dest).ok_or_else(|| {
            LoweringError::ordering(format!("group of {} vanished", def), ops.len(), 0)
        })?;
        let at = dest_ops.iter().position(|&o| o == def).ok_or_else(|| {
            LoweringError::ordering(format!("{} missing from its group", def), 1, 0)
        })?;
        trace!("Splicing {} ops before {}", members.len(), def);
        for &m in &members {
            owner.insert(m, dest);
        }
        dest_ops.splice(at..at, members);
    }

    let grouped: usize = groups.values().map(Vec::len).sum();
    if grouped != ops.len() {
        return Err(LoweringError::ordering(
            "operations lost while merging groups",
            ops.len(),
            grouped,
        ));
    }
    debug!("Linearizing {} ops in {} loop nests", ops.len(), groups.len());

    // emit root groups, each after every group it depends on
    let mut remaining: Vec<Vec<OpId>> = groups.into_values().collect();
    let mut result = Vec::with_capacity(ops.len());
    while !remaining.is_empty() {
        let mut cur = 0;
        let mut chased = FxHashSet::from_iter([0]);
        while let Some(next) = (0..remaining.len())
            .find(|&i| i != cur && group_depends_on(deps, &remaining[cur], &remaining[i]))
        {
            if !chased.insert(next) {
                return Err(LoweringError::ordering(
                    "loop nests depend on each other",
                    remaining.len(),
                    chased.len(),
                ));
            }
            cur = next;
        }
        result.extend(remaining.remove(cur));
    }

    if result.len() != ops.len() {
        return Err(LoweringError::ordering(
            "linearized operation count",
            ops.len(),
            result.len(),
        ));
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{CorrespondenceTable, OpKind};

    fn linearize(g: &TensorGraph, ops: &[OpId]) -> Vec<OpId> {
        let corr = CorrespondenceTable::identity(g);
        let ca_map = ComputeAtMap::build(g, &corr).unwrap();
        let deps = DependencyIndex::build(g);
        reorder_for_compute_at(&ca_map, &deps, ops).unwrap()
    }

    /// x -> C -> c -> B -> b -> A -> a, and an unrelated x -> D -> d
    fn nested() -> (TensorGraph, [OpId; 4]) {
        let mut g = TensorGraph::new();
        let x = g.add_tensor("x", [4, 8, 16]);
        let c = g.add_tensor("c", [4, 8, 16]);
        let b = g.add_tensor("b", [4, 8, 16]);
        let a = g.add_tensor("a", [4, 8, 16]);
        let d = g.add_tensor("d", [4, 8, 16]);
        g.mark_input(x);
        let op_c = g.add_op(OpKind::pointwise("exp"), vec![x.into()], vec![c.into()]);
        let op_b = g.add_op(OpKind::pointwise("neg"), vec![c.into()], vec![b.into()]);
        let op_a = g.add_op(OpKind::pointwise("abs"), vec![b.into()], vec![a.into()]);
        let op_d = g.add_op(OpKind::pointwise("sqrt"), vec![x.into()], vec![d.into()]);
        g.mark_output(a);
        g.mark_output(d);
        // c shares three loops with b, b only two with a
        g.set_commit_position(c, 3).unwrap();
        g.set_commit_position(b, 2).unwrap();
        (g, [op_c, op_b, op_a, op_d])
    }

    #[test]
    fn test_nested_group_is_spliced_before_its_tensor() {
        let (g, [c, b, a, d]) = nested();
        assert_eq!(linearize(&g, &[c, b, a, d]), vec![c, b, a, d]);
        assert_eq!(linearize(&g, &[d, c, b, a]), vec![d, c, b, a]);
    }

    #[test]
    fn test_scores() {
        let (g, [c, b, a, _]) = nested();
        let corr = CorrespondenceTable::identity(&g);
        let ca_map = ComputeAtMap::build(&g, &corr).unwrap();
        let (b_t, a_t) = (TensorId(2), TensorId(3));
        assert_eq!(find_target(&ca_map, g.op(c)), (GroupKey::Tensor(b_t), 3));
        assert_eq!(find_target(&ca_map, g.op(b)), (GroupKey::Tensor(a_t), 2));
        assert_eq!(find_target(&ca_map, g.op(a)), (GroupKey::Tensor(a_t), ROOT_SCORE));
    }

    /// c shares one loop with b, d two with a, b three with a; a reads b and d
    fn shallow_inner() -> (TensorGraph, [OpId; 4]) {
        let mut g = TensorGraph::new();
        let x = g.add_tensor("x", [4, 8, 16]);
        let c = g.add_tensor("c", [4, 8, 16]);
        let d = g.add_tensor("d", [4, 8, 16]);
        let b = g.add_tensor("b", [4, 8, 16]);
        let a = g.add_tensor("a", [4, 8, 16]);
        g.mark_input(x);
        let op_c = g.add_op(OpKind::pointwise("exp"), vec![x.into()], vec![c.into()]);
        let op_d = g.add_op(OpKind::pointwise("sqrt"), vec![x.into()], vec![d.into()]);
        let op_b = g.add_op(OpKind::pointwise("neg"), vec![c.into()], vec![b.into()]);
        let op_a = g.add_op(OpKind::pointwise("add"), vec![b.into(), d.into()], vec![a.into()]);
        g.mark_output(a);
        g.set_commit_position(c, 1).unwrap();
        g.set_commit_position(d, 2).unwrap();
        g.set_commit_position(b, 3).unwrap();
        (g, [op_c, op_d, op_b, op_a])
    }

    #[test]
    fn test_score_follows_own_depth_through_chain() {
        let (g, [c, d, b, a]) = shallow_inner();
        let corr = CorrespondenceTable::identity(&g);
        let ca_map = ComputeAtMap::build(&g, &corr).unwrap();
        let a_t = TensorId(4);
        assert_eq!(find_target(&ca_map, g.op(c)), (GroupKey::Tensor(a_t), 1));
        assert_eq!(find_target(&ca_map, g.op(d)), (GroupKey::Tensor(a_t), 2));
        assert_eq!(find_target(&ca_map, g.op(b)), (GroupKey::Tensor(a_t), 3));
        assert_eq!(linearize(&g, &[c, d, b, a]), vec![c, d, b, a]);
        assert_eq!(linearize(&g, &[d, c, b, a]), vec![c, d, b, a]);
    }

    #[test]
    fn test_dependent_root_waits_for_its_dependency() {
        // p is computed inside r, which also reads the root q
        let mut g = TensorGraph::new();
        let x = g.add_tensor("x", [4, 8]);
        let p = g.add_tensor("p", [4, 8]);
        let q = g.add_tensor("q", [4, 8]);
        let r = g.add_tensor("r", [4, 8]);
        g.mark_input(x);
        let op_p = g.add_op(OpKind::pointwise("exp"), vec![x.into()], vec![p.into()]);
        let op_q = g.add_op(OpKind::pointwise("neg"), vec![x.into()], vec![q.into()]);
        let op_r = g.add_op(OpKind::pointwise("add"), vec![p.into(), q.into()], vec![r.into()]);
        g.mark_output(r);
        g.set_commit_position(p, 1).unwrap();
        assert_eq!(linearize(&g, &[op_p, op_q, op_r]), vec![op_q, op_p, op_r]);
    }

    #[test]
    fn test_equal_scores_are_placed_breadth_first() {
        let mut g = TensorGraph::new();
        let x = g.add_tensor("x", [4, 8]);
        let e = g.add_tensor("e", [4, 8]);
        let f = g.add_tensor("f", [4, 8]);
        let h = g.add_tensor("h", [4, 8]);
        let t = g.add_tensor("t", [4, 8]);
        g.mark_input(x);
        let op_e = g.add_op(OpKind::pointwise("exp"), vec![x.into()], vec![e.into()]);
        let op_f = g.add_op(OpKind::pointwise("neg"), vec![e.into()], vec![f.into()]);
        let op_h = g.add_op(OpKind::pointwise("abs"), vec![x.into()], vec![h.into()]);
        let op_t = g.add_op(OpKind::pointwise("add"), vec![f.into(), h.into()], vec![t.into()]);
        g.mark_output(t);
        for tensor in [e, f, h] {
            g.set_commit_position(tensor, 1).unwrap();
        }
        assert_eq!(
            linearize(&g, &[op_e, op_f, op_h, op_t]),
            vec![op_e, op_h, op_f, op_t]
        );
    }

    #[test]
    fn test_standalone_ops_keep_dependency_order() {
        let mut g = TensorGraph::new();
        let x = g.add_tensor("x", [4]);
        let y = g.add_tensor("y", [4]);
        let s = g.add_scalar("s");
        let op_s = g.add_op(OpKind::pointwise("load_scalar"), vec![], vec![s.into()]);
        let op_y = g.add_op(OpKind::pointwise("mul"), vec![x.into(), s.into()], vec![y.into()]);
        g.mark_input(x);
        g.mark_output(y);
        assert_eq!(linearize(&g, &[op_s, op_y]), vec![op_s, op_y]);
    }

    #[test]
    fn test_decreasing_scores_are_rejected() {
        let g = TensorGraph::new();
        let err = order_group(&g, &[(OpId(0), 2), (OpId(1), 1)]).unwrap_err();
        assert!(matches!(err, LoweringError::OrderingViolation { .. }));
    }
}
