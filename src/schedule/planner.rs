//! Inlining planner
//!
//! Drives [`propagate`] with [`RootAxisInfo`] and commits a position to
//! every tensor it reaches. Positions are carried hop by hop as raw leaf
//! positions: the count of reference-derived axes the visited tensor can
//! replay, clipped by the oracle on the edge taken.

use log::{debug, trace};
use rustc_hash::{FxHashMap, FxHashSet};

use super::InlineMode;
use super::oracle::{InlineOracle, matched_consumer_pos, matched_producer_pos};
use super::propagation::{Hop, HopKind, InformationPolicy, Propagator, SpanningTree, propagate};
use super::root_info::RootAxisInfo;
use crate::error::{LoweringError, Result};
use crate::ir::{AxisCorrespondence, AxisMap, TensorGraph, TensorId};

pub struct InlinePlanner<'a> {
    corr: &'a dyn AxisCorrespondence,
    oracle: InlineOracle<'a>,
    selection: FxHashSet<TensorId>,
    reference: TensorId,
    reference_pos: usize,
    mode: InlineMode,
    /// Reference-derived position of every visited tensor
    mapped: FxHashMap<TensorId, usize>,
    /// Tensors committed during this pass
    committed: FxHashSet<TensorId>,
}

impl<'a> InlinePlanner<'a> {
    pub fn new(
        graph: &TensorGraph,
        corr: &'a dyn AxisCorrespondence,
        reference: TensorId,
        reference_pos: usize,
        mode: InlineMode,
        selection: FxHashSet<TensorId>,
    ) -> Self {
        Self {
            corr,
            oracle: InlineOracle::new(graph, corr, mode),
            selection,
            reference,
            reference_pos,
            mode,
            mapped: FxHashMap::default(),
            committed: FxHashSet::default(),
        }
    }

    pub fn run(&mut self, graph: &mut TensorGraph) -> Result<SpanningTree> {
        let reference = self.reference;
        self.mapped.insert(reference, self.reference_pos);
        self.set_commit(graph, reference, self.reference_pos)?;
        let info = RootAxisInfo::reference(graph, reference, self.reference_pos);
        propagate(graph, reference, info, self)
    }

    fn is_selected(&self, t: TensorId) -> bool {
        self.selection.is_empty() || self.selection.contains(&t)
    }

    fn mapped_pos(&self, t: TensorId) -> usize {
        self.mapped.get(&t).copied().unwrap_or(0)
    }

    /// Clip `pos` to what `t` may legally share and record it
    ///
    /// The first commit of a pass replaces whatever an earlier pass left;
    /// later ones in the same pass may only raise the position. Siblings
    /// follow along.
    fn set_commit(&mut self, graph: &mut TensorGraph, t: TensorId, pos: usize) -> Result<()> {
        let tensor = graph.tensor(t);
        if tensor.is_input || !self.is_selected(t) {
            return Ok(());
        }

        let mut pos = pos.min(self.oracle.max_position_all(graph, t));
        // never end a loop nest on a broadcast axis
        while pos > 0 && graph.leaf(t, pos - 1).is_broadcast() {
            pos -= 1;
        }

        if self.committed.contains(&t) && pos < tensor.commit_position {
            trace!(
                "Skipping commit of {} at {}, already at {}",
                tensor,
                pos,
                tensor.commit_position
            );
            return Ok(());
        }
        debug!("Committing {} at {}", tensor, pos);
        graph.set_commit_position(t, pos)?;
        self.committed.insert(t);

        for sibling in graph.siblings_of(t) {
            let pos = pos.min(graph.tensor(sibling).ndims());
            graph.set_commit_position(sibling, pos)?;
            self.committed.insert(sibling);
        }
        Ok(())
    }

    fn mapping_failure(
        graph: &TensorGraph,
        t: TensorId,
        other: TensorId,
        expected: usize,
        matched: impl Fn(usize) -> bool,
    ) -> LoweringError {
        let actual = (0..expected).rev().find(|&k| matched(k)).unwrap_or(0);
        LoweringError::mapping(
            graph.tensor(t),
            graph.tensor(other),
            expected,
            actual,
            "leaf axes do not correspond in order",
        )
    }

    /// Consumer `hop.from` to producer `hop.to`
    fn step_to_producer(&mut self, graph: &mut TensorGraph, hop: &Hop) -> Result<()> {
        let (consumer, producer) = (hop.from, hop.to);
        let c2p: AxisMap = self.corr.consumer_to_producer(graph, producer, consumer);
        let bound = self.oracle.max_position(graph, producer, consumer);
        let c_pos = match self.mode {
            InlineMode::MostInlined => bound,
            InlineMode::Standard | InlineMode::BestEffort => self.mapped_pos(consumer).min(bound),
        };
        let matched = |k| matched_producer_pos(graph, &c2p, producer, consumer, k);
        let p_pos = matched(c_pos).ok_or_else(|| {
            Self::mapping_failure(graph, consumer, producer, c_pos, |k| matched(k).is_some())
        })?;
        let replayed = matched(self.mapped_pos(consumer)).unwrap_or(p_pos);

        self.mapped.insert(producer, replayed);
        self.set_commit(graph, producer, p_pos)
    }

    /// Producer `hop.from` to consumer `hop.to`
    fn step_to_consumer(&mut self, graph: &mut TensorGraph, hop: &Hop) -> Result<()> {
        let (producer, consumer) = (hop.from, hop.to);
        let p2c: AxisMap = self.corr.producer_to_consumer(graph, producer, consumer);
        let bound = self.oracle.max_producer_position(graph, consumer, producer);
        let p_pos = match self.mode {
            InlineMode::MostInlined => bound,
            InlineMode::Standard | InlineMode::BestEffort => self.mapped_pos(producer).min(bound),
        };
        let matched = |k| matched_consumer_pos(graph, &p2c, producer, consumer, k);
        let c_pos = matched(p_pos).ok_or_else(|| {
            Self::mapping_failure(graph, producer, consumer, p_pos, |k| matched(k).is_some())
        })?;
        let replayed = matched(self.mapped_pos(producer)).unwrap_or(c_pos);

        self.mapped.insert(consumer, replayed);
        self.set_commit(graph, producer, p_pos)
    }
}

impl InformationPolicy for InlinePlanner<'_> {
    type Info = RootAxisInfo;

    fn allow(&self, _graph: &TensorGraph, hop: &Hop) -> bool {
        if self.selection.is_empty() {
            return true;
        }
        match hop.kind {
            HopKind::ProducerAsConsumer => self.is_selected(hop.to),
            // consumers of a selected tensor are always visited
            HopKind::ConsumerAsProducer => self.is_selected(hop.from) || self.is_selected(hop.to),
            HopKind::Sibling => true,
        }
    }

    fn derive_information(&self, graph: &TensorGraph, hop: &Hop, from: &RootAxisInfo) -> RootAxisInfo {
        from.derive(graph, self.corr, hop)
    }
}

impl Propagator for InlinePlanner<'_> {
    fn step(&mut self, graph: &mut TensorGraph, hop: &Hop) -> Result<()> {
        match hop.kind {
            HopKind::ProducerAsConsumer => self.step_to_producer(graph, hop),
            HopKind::ConsumerAsProducer => self.step_to_consumer(graph, hop),
            HopKind::Sibling => {
                // the commit itself arrives through set_commit of either sibling
                self.mapped.insert(hop.to, self.mapped_pos(hop.from));
                Ok(())
            }
        }
    }
}

/// Recomputes `max_producer_position` for every tensor of a walk
pub struct MaxProducerPosUpdater<'a> {
    corr: &'a dyn AxisCorrespondence,
    updated: FxHashSet<TensorId>,
}

impl<'a> MaxProducerPosUpdater<'a> {
    pub fn new(corr: &'a dyn AxisCorrespondence) -> Self {
        Self {
            corr,
            updated: FxHashSet::default(),
        }
    }

    pub fn run(mut self, graph: &mut TensorGraph, tree: &SpanningTree) -> Result<()> {
        self.update(graph, tree.reference);
        tree.traverse(graph, &mut self)
    }

    fn update(&mut self, graph: &mut TensorGraph, t: TensorId) {
        if !self.updated.insert(t) {
            return;
        }
        let pos = graph
            .producers_of(t)
            .into_iter()
            .map(|p| {
                let p2c = self.corr.producer_to_consumer(graph, p, t);
                let commit = graph.tensor(p).commit_position;
                matched_consumer_pos(graph, &p2c, p, t, commit).unwrap_or_else(|| {
                    trace!("{} committed at {} does not map into {}", graph.tensor(p), commit, graph.tensor(t));
                    0
                })
            })
            .max()
            .unwrap_or(0);
        graph.set_max_producer_position(t, pos);
    }
}

impl Propagator for MaxProducerPosUpdater<'_> {
    fn step(&mut self, graph: &mut TensorGraph, hop: &Hop) -> Result<()> {
        self.update(graph, hop.from);
        self.update(graph, hop.to);
        Ok(())
    }
}
