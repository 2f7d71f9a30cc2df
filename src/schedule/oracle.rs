//! Axis compatibility oracle
//!
//! Bounds how many leading axes two tensors may share. A bound is always the
//! index of the first blocking axis, never a count of allowed axes: an
//! allowed axis behind a blocking one cannot be shared either.

use log::trace;
use rustc_hash::FxHashSet;

use super::InlineMode;
use crate::ir::{AxisCorrespondence, AxisId, AxisMap, ParallelType, TensorGraph, TensorId};

pub struct InlineOracle<'a> {
    corr: &'a dyn AxisCorrespondence,
    mode: InlineMode,
    /// Root (or rfactor) axes without a counterpart in at least one consumer
    unmappable: FxHashSet<AxisId>,
}

impl<'a> InlineOracle<'a> {
    pub fn new(graph: &TensorGraph, corr: &'a dyn AxisCorrespondence, mode: InlineMode) -> Self {
        let unmappable = Self::build_unmappable(graph, corr);
        trace!("{} unmappable root axes", unmappable.len());
        Self {
            corr,
            mode,
            unmappable,
        }
    }

    fn build_unmappable(graph: &TensorGraph, corr: &dyn AxisCorrespondence) -> FxHashSet<AxisId> {
        let mut unmappable = FxHashSet::default();
        for tensor in graph.tensors() {
            for consumer in graph.consumers_of(tensor.id) {
                let p2c = corr.producer_to_consumer(graph, tensor.id, consumer);
                for &root in tensor.maybe_rfactor() {
                    let axis = graph.axis(root);
                    // size-one reductions carry nothing across the edge
                    let trivial_reduction = axis.is_reduction() && axis.extent.is_one();
                    if !p2c.contains_key(&root) && !trivial_reduction {
                        unmappable.insert(root);
                    }
                }
            }
        }
        unmappable
    }

    pub fn mode(&self) -> InlineMode {
        self.mode
    }

    pub fn is_unmappable(&self, axis: AxisId) -> bool {
        self.unmappable.contains(&axis)
    }

    /// Whether `axis` may sit inside a shared loop nest
    pub fn is_allowed(
        &self,
        graph: &TensorGraph,
        axis: AxisId,
        allow_reduction: bool,
        allow_vectorize: bool,
        allow_unmappable: bool,
    ) -> bool {
        let ax = graph.axis(axis);
        if !allow_reduction && ax.is_reduction() {
            return false;
        }
        if !allow_vectorize {
            let mut vectorized = ax.parallel.is_vectorize();
            if matches!(self.mode, InlineMode::BestEffort | InlineMode::MostInlined) {
                vectorized |= ax.parallel == ParallelType::Unroll;
            }
            if vectorized {
                return false;
            }
        }
        if !allow_unmappable
            && (self.is_unmappable(axis)
                || graph.ancestors(axis).iter().any(|a| self.is_unmappable(*a)))
        {
            return false;
        }
        true
    }

    /// Position `t` may be inlined at regardless of its neighbours
    pub fn max_position_self(
        &self,
        graph: &TensorGraph,
        t: TensorId,
        allow_reduction: bool,
        allow_vectorize: bool,
        allow_unmappable: bool,
    ) -> usize {
        let domain = &graph.tensor(t).domain;
        domain
            .iter()
            .position(|&a| {
                !self.is_allowed(graph, a, allow_reduction, allow_vectorize, allow_unmappable)
            })
            .unwrap_or(domain.len())
    }

    /// Largest consumer position at which `producer` may be computed inside
    /// `consumer`'s loop nest
    pub fn max_position(&self, graph: &TensorGraph, producer: TensorId, consumer: TensorId) -> usize {
        let c2p = self.corr.consumer_to_producer(graph, producer, consumer);
        let domain = &graph.tensor(consumer).domain;
        let mut bound = domain.len();
        for (pos, &c_axis) in domain.iter().enumerate() {
            if !self.is_allowed(graph, c_axis, true, false, true) {
                bound = pos;
                break;
            }
            let blocked = match c2p.get(&c_axis) {
                Some(&p_axis) => !self.is_allowed(graph, p_axis, true, false, false),
                // nothing in the producer iterates this axis
                None => !graph.axis(c_axis).is_broadcast(),
            };
            if blocked {
                bound = pos;
                break;
            }
        }
        // a prefix whose axes map out of order cannot be shared either
        (0..=bound)
            .rev()
            .find(|&k| matched_producer_pos(graph, &c2p, producer, consumer, k).is_some())
            .unwrap_or(0)
    }

    /// Largest producer position at which `consumer` may share `producer`'s
    /// loop nest
    pub fn max_producer_position(
        &self,
        graph: &TensorGraph,
        consumer: TensorId,
        producer: TensorId,
    ) -> usize {
        let p2c = self.corr.producer_to_consumer(graph, producer, consumer);
        let domain = &graph.tensor(producer).domain;
        let mut bound = domain.len();
        for (pos, &p_axis) in domain.iter().enumerate() {
            let axis = graph.axis(p_axis);
            let blocked = axis.is_reduction()
                || !self.is_allowed(graph, p_axis, true, false, true)
                || match p2c.get(&p_axis) {
                    Some(&c_axis) => !self.is_allowed(graph, c_axis, true, false, false),
                    None => !axis.is_broadcast(),
                };
            if blocked {
                bound = pos;
                break;
            }
        }
        (0..=bound)
            .rev()
            .find(|&k| matched_consumer_pos(graph, &p2c, producer, consumer, k).is_some())
            .unwrap_or(0)
    }

    /// Bound on `t`'s commit position from itself, its siblings and every
    /// consumer; zero when there is no consumer to share a loop nest with
    pub fn max_position_all(&self, graph: &TensorGraph, t: TensorId) -> usize {
        let mut max_pos = graph.tensor(t).ndims();
        let mut any_consumer = false;
        for member in std::iter::once(t).chain(graph.siblings_of(t)) {
            max_pos = max_pos.min(self.max_position_self(graph, member, false, false, false));
            for consumer in graph.consumers_of(member) {
                any_consumer = true;
                max_pos = max_pos.min(self.max_producer_position(graph, consumer, member));
            }
        }
        if any_consumer { max_pos } else { 0 }
    }
}

/// Consumer position covering the first `producer_pos` leaf axes of
/// `producer`, walking both domains in lockstep
///
/// Producer reduction axes without a counterpart and consumer broadcast
/// axes without a counterpart are stepped over. `None` if the prefix does
/// not map in order.
pub fn matched_consumer_pos(
    graph: &TensorGraph,
    p2c: &AxisMap,
    producer: TensorId,
    consumer: TensorId,
    producer_pos: usize,
) -> Option<usize> {
    let p_domain = &graph.tensor(producer).domain;
    let c_domain = &graph.tensor(consumer).domain;
    let c_mapped: FxHashSet<AxisId> = p2c.values().copied().collect();
    let (mut pi, mut ci) = (0, 0);
    while pi < producer_pos.min(p_domain.len()) {
        let p_axis = p_domain[pi];
        let mapped = p2c.get(&p_axis);
        if mapped.is_none() && graph.axis(p_axis).is_reduction() {
            pi += 1;
            continue;
        }
        let c_axis = *c_domain.get(ci)?;
        if mapped == Some(&c_axis) {
            pi += 1;
            ci += 1;
        } else if graph.axis(c_axis).is_broadcast() && !c_mapped.contains(&c_axis) {
            ci += 1;
        } else {
            return None;
        }
    }
    Some(ci)
}

/// Producer position covering the first `consumer_pos` leaf axes of
/// `consumer`; the mirror image of [`matched_consumer_pos`]
pub fn matched_producer_pos(
    graph: &TensorGraph,
    c2p: &AxisMap,
    producer: TensorId,
    consumer: TensorId,
    consumer_pos: usize,
) -> Option<usize> {
    let p_domain = &graph.tensor(producer).domain;
    let c_domain = &graph.tensor(consumer).domain;
    let p_mapped: FxHashSet<AxisId> = c2p.values().copied().collect();
    let (mut pi, mut ci) = (0, 0);
    while ci < consumer_pos.min(c_domain.len()) {
        let c_axis = c_domain[ci];
        let mapped = c2p.get(&c_axis);
        if mapped.is_none() && graph.axis(c_axis).is_broadcast() {
            ci += 1;
            continue;
        }
        let p_axis = *p_domain.get(pi)?;
        if mapped == Some(&p_axis) {
            pi += 1;
            ci += 1;
        } else if graph.axis(p_axis).is_reduction() && !p_mapped.contains(&p_axis) {
            pi += 1;
        } else {
            return None;
        }
    }
    Some(pi)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Literal;
    use crate::ir::{AxisSpec, CorrespondenceTable, Dim, OpKind};
    use rstest::rstest;

    /// T0 -> exp -> T1 -> neg -> T2, all [8, 16, 32]
    fn pointwise_chain() -> (TensorGraph, [TensorId; 3]) {
        let mut g = TensorGraph::new();
        let t0 = g.add_tensor("T0", [8, 16, 32]);
        let t1 = g.add_tensor("T1", [8, 16, 32]);
        let t2 = g.add_tensor("T2", [8, 16, 32]);
        g.mark_input(t0);
        g.add_op(OpKind::pointwise("exp"), vec![t0.into()], vec![t1.into()]);
        g.add_op(OpKind::pointwise("neg"), vec![t1.into()], vec![t2.into()]);
        g.mark_output(t2);
        (g, [t0, t1, t2])
    }

    #[test]
    fn test_identical_axes_share_everything() {
        let (g, [_, t1, t2]) = pointwise_chain();
        let corr = CorrespondenceTable::identity(&g);
        let oracle = InlineOracle::new(&g, &corr, InlineMode::Standard);
        assert_eq!(oracle.max_position(&g, t1, t2), 3);
        assert_eq!(oracle.max_producer_position(&g, t2, t1), 3);
        assert_eq!(oracle.max_position_all(&g, t1), 3);
    }

    #[test]
    fn test_no_consumer_means_zero() {
        let (g, [_, _, t2]) = pointwise_chain();
        let corr = CorrespondenceTable::identity(&g);
        let oracle = InlineOracle::new(&g, &corr, InlineMode::Standard);
        assert_eq!(oracle.max_position_all(&g, t2), 0);
    }

    #[test]
    fn test_blocking_axis_ends_prefix() {
        // vectorized middle axis blocks, the allowed axis behind it does not count
        let (mut g, [_, t1, t2]) = pointwise_chain();
        let middle = g.tensor(t2).axis(1);
        g.parallelize(middle, ParallelType::Vectorize);
        let corr = CorrespondenceTable::identity(&g);
        let oracle = InlineOracle::new(&g, &corr, InlineMode::Standard);
        assert_eq!(oracle.max_position(&g, t1, t2), 1);
    }

    #[rstest]
    #[case(InlineMode::Standard, 3)]
    #[case(InlineMode::BestEffort, 2)]
    #[case(InlineMode::MostInlined, 2)]
    fn test_unroll_blocks_outside_standard(#[case] mode: InlineMode, #[case] expected: usize) {
        let (mut g, [_, t1, _]) = pointwise_chain();
        let inner = g.tensor(t1).axis(2);
        g.parallelize(inner, ParallelType::Unroll);
        let corr = CorrespondenceTable::identity(&g);
        let oracle = InlineOracle::new(&g, &corr, mode);
        assert_eq!(oracle.max_position_self(&g, t1, false, false, false), expected);
    }

    #[test]
    fn test_reduction_axis_bounds_producer() {
        // P = sum(T0, axis 1) has [i, r]; C = neg(P) has [i]
        let mut g = TensorGraph::new();
        let t0 = g.add_tensor("T0", [8, 16]);
        let p = g.add_tensor("P", [AxisSpec::iter(8), AxisSpec::reduction(16)]);
        let c = g.add_tensor("C", [8]);
        g.mark_input(t0);
        g.add_op(
            OpKind::reduction("sum", Literal::Float(0.0)),
            vec![t0.into()],
            vec![p.into()],
        );
        g.add_op(OpKind::pointwise("neg"), vec![p.into()], vec![c.into()]);
        g.mark_output(c);
        let corr = CorrespondenceTable::identity(&g);
        let oracle = InlineOracle::new(&g, &corr, InlineMode::Standard);
        assert_eq!(oracle.max_position(&g, p, c), 1);
        assert_eq!(oracle.max_producer_position(&g, c, p), 1);
        assert_eq!(oracle.max_position_all(&g, p), 1);
        assert!(oracle.is_unmappable(g.tensor(p).root[1]));
        // the input may be inlined into the whole reduction loop nest
        assert_eq!(oracle.max_position(&g, t0, p), 2);
    }

    #[test]
    fn test_unmappable_blocks_derived_axes() {
        let mut g = TensorGraph::new();
        let t0 = g.add_tensor("T0", [8, 16]);
        let t1 = g.add_tensor("T1", [8, 16]);
        let t2 = g.add_tensor("T2", [8]);
        g.add_op(OpKind::pointwise("exp"), vec![t0.into()], vec![t1.into()]);
        g.add_op(OpKind::pointwise("slice"), vec![t1.into()], vec![t2.into()]);
        // T1's inner axis has no counterpart in T2; merge it into the outer one
        let merged = g.merge(t1, 0);
        let mut corr = CorrespondenceTable::new();
        corr.link(t0, t1, g.tensor(t0).root[0], g.tensor(t1).root[0]);
        corr.link(t0, t1, g.tensor(t0).root[1], g.tensor(t1).root[1]);
        corr.link(t1, t2, g.tensor(t1).root[0], g.tensor(t2).root[0]);
        let oracle = InlineOracle::new(&g, &corr, InlineMode::Standard);
        assert!(!oracle.is_allowed(&g, merged, true, true, false));
        assert!(oracle.is_allowed(&g, merged, true, true, true));
    }

    #[test]
    fn test_thread_bound_axes_are_allowed() {
        let (mut g, [_, t1, t2]) = pointwise_chain();
        let outer = g.tensor(t2).axis(0);
        g.parallelize(outer, ParallelType::BlockDim(Dim::X));
        let corr = CorrespondenceTable::identity(&g);
        let oracle = InlineOracle::new(&g, &corr, InlineMode::Standard);
        assert_eq!(oracle.max_position(&g, t1, t2), 3);
    }

    #[test]
    fn test_matched_positions_step_over_reduction_and_broadcast() {
        let mut g = TensorGraph::new();
        let t0 = g.add_tensor("T0", [8, 16]);
        let p = g.add_tensor("P", [AxisSpec::iter(8), AxisSpec::reduction(16)]);
        let c = g.add_tensor("C", [AxisSpec::iter(8), AxisSpec::broadcast()]);
        let d = g.add_tensor("D", [8, 4]);
        g.add_op(
            OpKind::reduction("sum", Literal::Float(0.0)),
            vec![t0.into()],
            vec![p.into()],
        );
        g.add_op(OpKind::Broadcast, vec![p.into()], vec![c.into()]);
        g.add_op(OpKind::pointwise("expand"), vec![c.into()], vec![d.into()]);
        let corr = CorrespondenceTable::identity(&g);
        let p2c = corr.producer_to_consumer(&g, p, c);
        let c2p = corr.consumer_to_producer(&g, p, c);
        assert_eq!(matched_consumer_pos(&g, &p2c, p, c, 1), Some(1));
        assert_eq!(matched_consumer_pos(&g, &p2c, p, c, 2), Some(1));
        assert_eq!(matched_producer_pos(&g, &c2p, p, c, 2), Some(1));
        assert_eq!(matched_producer_pos(&g, &c2p, p, c, 0), Some(0));
    }

    #[test]
    fn test_out_of_order_mapping_shares_nothing() {
        let mut g = TensorGraph::new();
        let p = g.add_tensor("P", [4, 8]);
        let c = g.add_tensor("C", [8, 4]);
        g.add_op(OpKind::pointwise("transpose"), vec![p.into()], vec![c.into()]);
        let mut corr = CorrespondenceTable::new();
        corr.link_positions(&g, p, c, &[(0, 1), (1, 0)]);
        let oracle = InlineOracle::new(&g, &corr, InlineMode::MostInlined);
        assert_eq!(oracle.max_position(&g, p, c), 0);
        assert_eq!(oracle.max_producer_position(&g, c, p), 0);
    }

    #[test]
    fn test_matched_position_out_of_order_is_none() {
        let mut g = TensorGraph::new();
        let p = g.add_tensor("P", [4, 8]);
        let c = g.add_tensor("C", [8, 4]);
        g.add_op(OpKind::pointwise("transpose"), vec![p.into()], vec![c.into()]);
        let mut corr = CorrespondenceTable::new();
        corr.link_positions(&g, p, c, &[(0, 1), (1, 0)]);
        let p2c = corr.producer_to_consumer(&g, p, c);
        assert_eq!(matched_consumer_pos(&g, &p2c, p, c, 1), None);
    }
}
