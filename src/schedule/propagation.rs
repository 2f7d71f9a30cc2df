//! Max-information graph walk
//!
//! Visits every tensor reachable from a reference tensor through producer,
//! consumer and sibling edges exactly once, always expanding the candidate
//! hop that carries the most information. What "information" means, how it
//! shrinks along a hop and what happens on a visit are supplied by the
//! caller through [`InformationPolicy`] and [`Propagator`].

use std::fmt;

use log::trace;
use rustc_hash::FxHashSet;

use crate::error::Result;
use crate::ir::{TensorGraph, TensorId};

/// A partially ordered amount of knowledge about a tensor's axes
///
/// Only `less_than` is required; the other comparisons derive from it.
pub trait Information {
    fn less_than(&self, other: &Self) -> bool;

    /// Carries nothing worth propagating
    fn is_empty(&self) -> bool;

    fn greater_than(&self, other: &Self) -> bool {
        other.less_than(self)
    }

    fn equivalent(&self, other: &Self) -> bool {
        !self.less_than(other) && !other.less_than(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HopKind {
    /// From a producer to one of its consumers
    ConsumerAsProducer,
    /// From a consumer to one of its producers
    ProducerAsConsumer,
    /// Between two outputs of one operation
    Sibling,
}

/// One traversed edge of the walk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Hop {
    pub kind: HopKind,
    pub from: TensorId,
    pub to: TensorId,
}

impl fmt::Display for Hop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            HopKind::ConsumerAsProducer => "consumer",
            HopKind::ProducerAsConsumer => "producer",
            HopKind::Sibling => "sibling",
        };
        write!(f, "{} -> {} ({})", self.from, self.to, kind)
    }
}

/// Decides which hops are taken and what they carry
pub trait InformationPolicy {
    type Info: Information;

    fn allow(&self, _graph: &TensorGraph, _hop: &Hop) -> bool {
        true
    }

    /// Information reaching `hop.to` given `from` at `hop.from`
    fn derive_information(&self, graph: &TensorGraph, hop: &Hop, from: &Self::Info) -> Self::Info;
}

/// Action performed when a hop is taken
pub trait Propagator {
    fn step(&mut self, graph: &mut TensorGraph, hop: &Hop) -> Result<()>;
}

/// Hops chosen by one walk, in visit order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanningTree {
    pub reference: TensorId,
    pub hops: Vec<Hop>,
}

impl SpanningTree {
    /// Reference first, then every hop destination
    pub fn visit_order(&self) -> Vec<TensorId> {
        std::iter::once(self.reference)
            .chain(self.hops.iter().map(|h| h.to))
            .collect()
    }

    /// Replay the hops through another propagator
    pub fn traverse(&self, graph: &mut TensorGraph, propagator: &mut impl Propagator) -> Result<()> {
        for hop in &self.hops {
            propagator.step(graph, hop)?;
        }
        Ok(())
    }
}

struct Candidate<I> {
    /// `None` for the seed
    hop: Option<Hop>,
    to: TensorId,
    info: I,
}

/// Outgoing hops of `t`: siblings, then consumers, then producers
fn neighbor_hops(graph: &TensorGraph, t: TensorId) -> Vec<Hop> {
    let siblings = graph.siblings_of(t).into_iter().map(|to| Hop {
        kind: HopKind::Sibling,
        from: t,
        to,
    });
    let consumers = graph.consumers_of(t).into_iter().map(|to| Hop {
        kind: HopKind::ConsumerAsProducer,
        from: t,
        to,
    });
    let producers = graph.producers_of(t).into_iter().map(|to| Hop {
        kind: HopKind::ProducerAsConsumer,
        from: t,
        to,
    });
    siblings.chain(consumers).chain(producers).collect()
}

/// Walk the graph from `reference`, calling `propagator.step` for every hop
/// in the order it is taken
///
/// Candidates are kept sorted ascending so the best one is popped from the
/// back; among equivalent candidates the most recently discovered wins.
pub fn propagate<P>(
    graph: &mut TensorGraph,
    reference: TensorId,
    initial: P::Info,
    propagator: &mut P,
) -> Result<SpanningTree>
where
    P: Propagator + InformationPolicy,
{
    let mut visited = FxHashSet::default();
    let mut tree = SpanningTree {
        reference,
        hops: Vec::new(),
    };
    let mut candidates: Vec<Candidate<P::Info>> = vec![Candidate {
        hop: None,
        to: reference,
        info: initial,
    }];

    while let Some(current) = candidates.pop() {
        if !visited.insert(current.to) {
            continue;
        }
        if let Some(hop) = current.hop {
            trace!("Taking hop {}", hop);
            propagator.step(graph, &hop)?;
            tree.hops.push(hop);
        }
        // reached with nothing to pass on
        if current.info.is_empty() {
            trace!("Not expanding {}", current.to);
            continue;
        }

        for hop in neighbor_hops(graph, current.to) {
            if visited.contains(&hop.to) || !propagator.allow(graph, &hop) {
                continue;
            }
            let info = propagator.derive_information(graph, &hop, &current.info);
            if let Some(idx) = candidates.iter().position(|c| c.to == hop.to) {
                if !candidates[idx].info.less_than(&info) {
                    continue;
                }
                candidates.remove(idx);
            }
            let at = candidates.partition_point(|c| !info.less_than(&c.info));
            candidates.insert(
                at,
                Candidate {
                    hop: Some(hop),
                    to: hop.to,
                    info,
                },
            );
        }
    }

    Ok(tree)
}
