//! Cross-tensor axis correspondence
//!
//! For every producer/consumer edge the correspondence service says which
//! producer axis iterates the same space as which consumer axis. Axes
//! without a counterpart are unmappable on that edge. Pairs may be given at
//! any domain level (root, rfactor or leaf); lookups are by axis handle.

use log::debug;
use rustc_hash::FxHashMap;

use super::{AxisId, OpKind, TensorGraph, TensorId};

pub type AxisMap = FxHashMap<AxisId, AxisId>;

/// Axis correspondence along one operation edge, both directions
pub trait AxisCorrespondence {
    /// Producer axes to the consumer axes they correspond to
    fn producer_to_consumer(
        &self,
        graph: &TensorGraph,
        producer: TensorId,
        consumer: TensorId,
    ) -> AxisMap;

    /// Consumer axes to the producer axes they correspond to
    fn consumer_to_producer(
        &self,
        graph: &TensorGraph,
        producer: TensorId,
        consumer: TensorId,
    ) -> AxisMap {
        self.producer_to_consumer(graph, producer, consumer)
            .into_iter()
            .map(|(p, c)| (c, p))
            .collect()
    }
}

/// Explicit per-edge axis pairs
#[derive(Debug, Clone, Default)]
pub struct CorrespondenceTable {
    edges: FxHashMap<(TensorId, TensorId), Vec<(AxisId, AxisId)>>,
}

impl CorrespondenceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pair equal positions across every producer/consumer edge of `graph`
    ///
    /// Producer reduction axes and the broadcast axes a broadcast op
    /// introduces have no counterpart and are skipped. Leaf domains are
    /// paired the same way, which assumes both sides were transformed alike;
    /// use [`link`](Self::link) for anything else.
    pub fn identity(graph: &TensorGraph) -> Self {
        let mut table = Self::new();
        for op in graph.ops() {
            for producer in op.tensor_inputs() {
                for consumer in op.tensor_outputs() {
                    table.link_identity(graph, producer, consumer);
                }
            }
        }
        table
    }

    pub fn link_identity(&mut self, graph: &TensorGraph, producer: TensorId, consumer: TensorId) {
        let p = graph.tensor(producer);
        let c = graph.tensor(consumer);
        let introduces_broadcast = c
            .definition
            .is_some_and(|def| graph.op(def).kind == OpKind::Broadcast);

        let pick_producer = |axes: &[AxisId]| -> Vec<AxisId> {
            axes.iter()
                .copied()
                .filter(|&a| !graph.axis(a).is_reduction())
                .collect()
        };
        let pick_consumer = |axes: &[AxisId]| -> Vec<AxisId> {
            axes.iter()
                .copied()
                .filter(|&a| !(introduces_broadcast && graph.axis(a).is_broadcast()))
                .collect()
        };

        for (p_axes, c_axes) in [
            (pick_producer(p.maybe_rfactor()), pick_consumer(&c.root)),
            (pick_producer(&p.domain), pick_consumer(&c.domain)),
        ] {
            if p_axes.len() != c_axes.len() {
                debug!(
                    "{} -> {}: pairing {} producer axes with {} consumer axes",
                    p,
                    c,
                    p_axes.len(),
                    c_axes.len()
                );
            }
            for (pa, ca) in p_axes.into_iter().zip(c_axes) {
                self.link(producer, consumer, pa, ca);
            }
        }
    }

    /// Record that `p_axis` of `producer` corresponds to `c_axis` of `consumer`
    pub fn link(&mut self, producer: TensorId, consumer: TensorId, p_axis: AxisId, c_axis: AxisId) {
        let pairs = self.edges.entry((producer, consumer)).or_default();
        if !pairs.contains(&(p_axis, c_axis)) {
            pairs.push((p_axis, c_axis));
        }
    }

    /// Link leaf positions `(producer_pos, consumer_pos)`
    pub fn link_positions(
        &mut self,
        graph: &TensorGraph,
        producer: TensorId,
        consumer: TensorId,
        pairs: &[(usize, usize)],
    ) {
        for &(pp, cp) in pairs {
            let pa = graph.tensor(producer).axis(pp);
            let ca = graph.tensor(consumer).axis(cp);
            self.link(producer, consumer, pa, ca);
        }
    }

    pub fn pairs(&self, producer: TensorId, consumer: TensorId) -> &[(AxisId, AxisId)] {
        self.edges
            .get(&(producer, consumer))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

impl AxisCorrespondence for CorrespondenceTable {
    fn producer_to_consumer(
        &self,
        _graph: &TensorGraph,
        producer: TensorId,
        consumer: TensorId,
    ) -> AxisMap {
        self.pairs(producer, consumer).iter().copied().collect()
    }

    fn consumer_to_producer(
        &self,
        _graph: &TensorGraph,
        producer: TensorId,
        consumer: TensorId,
    ) -> AxisMap {
        self.pairs(producer, consumer)
            .iter()
            .map(|&(p, c)| (c, p))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Literal;
    use crate::ir::AxisSpec;

    #[test]
    fn test_identity_skips_producer_reduction() {
        let mut g = TensorGraph::new();
        let t0 = g.add_tensor("T0", [8, 16]);
        let p = g.add_tensor("P", [AxisSpec::iter(8), AxisSpec::reduction(16)]);
        let c = g.add_tensor("C", [8]);
        g.add_op(
            OpKind::reduction("sum", Literal::Float(0.0)),
            vec![t0.into()],
            vec![p.into()],
        );
        g.add_op(OpKind::pointwise("neg"), vec![p.into()], vec![c.into()]);
        let table = CorrespondenceTable::identity(&g);
        // the reduction axis of the reduction output still maps to its input
        assert_eq!(table.pairs(t0, p).len(), 2);
        let p2c = table.producer_to_consumer(&g, p, c);
        assert_eq!(p2c.len(), 1);
        assert_eq!(p2c[&g.tensor(p).axis(0)], g.tensor(c).axis(0));
        assert!(!p2c.contains_key(&g.tensor(p).axis(1)));
        let c2p = table.consumer_to_producer(&g, p, c);
        assert_eq!(c2p[&g.tensor(c).axis(0)], g.tensor(p).axis(0));
    }

    #[test]
    fn test_identity_skips_introduced_broadcast() {
        let mut g = TensorGraph::new();
        let p = g.add_tensor("P", [8]);
        let c = g.add_tensor("C", [AxisSpec::iter(8), AxisSpec::broadcast()]);
        g.add_op(OpKind::Broadcast, vec![p.into()], vec![c.into()]);
        let table = CorrespondenceTable::identity(&g);
        let c2p = table.consumer_to_producer(&g, p, c);
        assert_eq!(c2p.len(), 1);
        assert!(!c2p.contains_key(&g.tensor(c).axis(1)));
    }

    #[test]
    fn test_link_positions() {
        let mut g = TensorGraph::new();
        let p = g.add_tensor("P", [4, 8]);
        let c = g.add_tensor("C", [8, 4]);
        let mut table = CorrespondenceTable::new();
        table.link_positions(&g, p, c, &[(0, 1), (1, 0)]);
        table.link_positions(&g, p, c, &[(0, 1)]);
        assert_eq!(table.pairs(p, c).len(), 2);
        let p2c = table.producer_to_consumer(&g, p, c);
        assert_eq!(p2c[&g.tensor(p).axis(0)], g.tensor(c).axis(1));
        assert!(table.pairs(c, p).is_empty());
    }
}
