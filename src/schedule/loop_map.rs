//! Commit-target map
//!
//! A tensor committed at `k` is computed inside the loop nest of one of its
//! consumers, sharing that consumer's loops for its first `k` axes. This map
//! records which consumer that is and where each shared axis sits in it, so
//! that loops can be resolved to the outermost tensor that owns them.

use log::trace;
use rustc_hash::FxHashMap;

use crate::error::{LoweringError, Result};
use crate::ir::{AxisCorrespondence, AxisId, TensorGraph, TensorId};

/// Consumer a tensor is computed inside
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitTarget {
    pub tensor: TensorId,
    /// Leaf position in `tensor` of each committed axis
    pub positions: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct ComputeAtMap<'a> {
    graph: &'a TensorGraph,
    targets: FxHashMap<TensorId, CommitTarget>,
}

impl<'a> ComputeAtMap<'a> {
    pub fn build(graph: &'a TensorGraph, corr: &dyn AxisCorrespondence) -> Result<Self> {
        let mut targets = FxHashMap::default();
        for tensor in graph.tensors() {
            let k = tensor.commit_position;
            if k == 0 || tensor.is_input {
                continue;
            }
            let committed = &tensor.domain[..k];

            let mut best = (None, 0);
            let mut found = None;
            for consumer in graph.consumers_of(tensor.id) {
                let p2c = corr.producer_to_consumer(graph, tensor.id, consumer);
                let c_domain = &graph.tensor(consumer).domain;
                let positions: Vec<usize> = committed
                    .iter()
                    .map_while(|a| {
                        let c_axis = p2c.get(a)?;
                        c_domain.iter().position(|x| x == c_axis)
                    })
                    .collect();
                if positions.len() == k {
                    found = Some(CommitTarget {
                        tensor: consumer,
                        positions,
                    });
                    break;
                }
                if best.0.is_none() || positions.len() > best.1 {
                    best = (Some(consumer), positions.len());
                }
            }

            match found {
                Some(target) => {
                    trace!(
                        "{} computed inside {} at {:?}",
                        tensor,
                        graph.tensor(target.tensor),
                        target.positions
                    );
                    targets.insert(tensor.id, target);
                }
                None => {
                    let other = best
                        .0
                        .map(|c| graph.tensor(c).name.clone())
                        .unwrap_or_else(|| "<no consumer>".to_string());
                    return Err(LoweringError::mapping(
                        tensor,
                        other,
                        k,
                        best.1,
                        "committed axes map into no single consumer",
                    ));
                }
            }
        }
        Ok(Self { graph, targets })
    }

    pub fn graph(&self) -> &'a TensorGraph {
        self.graph
    }

    pub fn target(&self, t: TensorId) -> Option<&CommitTarget> {
        self.targets.get(&t)
    }

    /// Loop depth in the target reached by the committed axes
    pub fn relative_position(&self, t: TensorId) -> usize {
        self.target(t)
            .and_then(|target| target.positions.last())
            .map_or(0, |&p| p + 1)
    }

    pub fn relative_axis_position(&self, t: TensorId, i: usize) -> Option<usize> {
        self.target(t)?.positions.get(i).copied()
    }

    /// Axis providing the loop for axis `i` of `t`, with the tensor owning it
    pub fn compute_at_axis(&self, t: TensorId, i: usize) -> (AxisId, TensorId) {
        let (mut t, mut i) = (t, i);
        while i < self.graph.tensor(t).commit_position {
            match self.target(t) {
                Some(target) => {
                    i = target.positions[i];
                    t = target.tensor;
                }
                None => break,
            }
        }
        (self.graph.tensor(t).axis(i), t)
    }

    pub fn loop_axis(&self, t: TensorId, i: usize) -> AxisId {
        self.compute_at_axis(t, i).0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{CorrespondenceTable, OpKind};

    fn chain(commits: [usize; 2]) -> (TensorGraph, [TensorId; 4]) {
        let mut g = TensorGraph::new();
        let t0 = g.add_tensor("T0", [4, 8]);
        let t1 = g.add_tensor("T1", [4, 8]);
        let t2 = g.add_tensor("T2", [4, 8]);
        let t3 = g.add_tensor("T3", [4, 8]);
        g.mark_input(t0);
        g.add_op(OpKind::pointwise("exp"), vec![t0.into()], vec![t1.into()]);
        g.add_op(OpKind::pointwise("neg"), vec![t1.into()], vec![t2.into()]);
        g.add_op(OpKind::pointwise("abs"), vec![t2.into()], vec![t3.into()]);
        g.mark_output(t3);
        g.set_commit_position(t1, commits[0]).unwrap();
        g.set_commit_position(t2, commits[1]).unwrap();
        (g, [t0, t1, t2, t3])
    }

    #[test]
    fn test_loop_axis_follows_chain() {
        let (g, [_, t1, t2, t3]) = chain([2, 1]);
        let corr = CorrespondenceTable::identity(&g);
        let map = ComputeAtMap::build(&g, &corr).unwrap();
        assert_eq!(map.target(t1).map(|t| t.tensor), Some(t2));
        assert_eq!(map.relative_position(t1), 2);
        assert_eq!(map.relative_position(t3), 0);
        // axis 0 of T1 lives in T3's loop, axis 1 stops at T2
        assert_eq!(map.compute_at_axis(t1, 0), (g.tensor(t3).axis(0), t3));
        assert_eq!(map.compute_at_axis(t1, 1), (g.tensor(t2).axis(1), t2));
        assert_eq!(map.loop_axis(t3, 1), g.tensor(t3).axis(1));
        assert_eq!(map.relative_axis_position(t1, 1), Some(1));
        assert_eq!(map.relative_axis_position(t3, 0), None);
    }

    #[test]
    fn test_positions_follow_consumer_layout() {
        let (mut g, [_, t1, t2, _]) = chain([0, 0]);
        let mut corr = CorrespondenceTable::identity(&g);
        g.reorder(t2, &[1, 0]);
        corr.link_positions(&g, t1, t2, &[(0, 1), (1, 0)]);
        g.set_commit_position(t1, 1).unwrap();
        let map = ComputeAtMap::build(&g, &corr).unwrap();
        assert_eq!(map.relative_axis_position(t1, 0), Some(1));
        assert_eq!(map.relative_position(t1), 2);
    }

    #[test]
    fn test_unmapped_commit_is_a_mapping_failure() {
        let (g, [_, t1, _, _]) = chain([2, 0]);
        let corr = CorrespondenceTable::new();
        let err = ComputeAtMap::build(&g, &corr).unwrap_err();
        match err {
            LoweringError::MappingFailure {
                tensor,
                expected,
                actual,
                ..
            } => {
                assert_eq!(tensor, g.tensor(t1).name);
                assert_eq!(expected, 2);
                assert_eq!(actual, 0);
            }
            other => panic!("unexpected error {other}"),
        }
    }
}
