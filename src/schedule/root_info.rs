//! Root-axis information carried by the inlining walk
//!
//! Each record tracks one root axis of the reference tensor through the
//! graph: the set of axes it corresponds to in the tensor currently
//! visited. A record is complete while every axis it has reached was mapped
//! onward.

use indexmap::IndexSet;

use super::propagation::{Hop, HopKind, Information};
use crate::ir::{AxisCorrespondence, AxisId, TensorGraph, TensorId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootAxisRecord {
    pub mapped: IndexSet<AxisId>,
    pub is_complete: bool,
    /// `mapped` holds rfactor axes rather than root axes
    pub is_rfactor: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RootAxisInfo {
    pub records: Vec<RootAxisRecord>,
}

impl Information for RootAxisInfo {
    fn less_than(&self, other: &Self) -> bool {
        if self.records.len() != other.records.len() {
            return self.records.len() < other.records.len();
        }
        self.complete_count() < other.complete_count()
    }

    fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl RootAxisInfo {
    /// One complete record per root axis of `t` that the first `pos` leaf
    /// axes were derived from
    pub fn reference(graph: &TensorGraph, t: TensorId, pos: usize) -> Self {
        let tensor = graph.tensor(t);
        let selected = &tensor.domain[..pos.min(tensor.ndims())];
        let records = tensor
            .root
            .iter()
            .filter(|&&root| {
                selected
                    .iter()
                    .any(|&leaf| leaf == root || graph.is_derived_from(leaf, root))
            })
            .map(|&root| RootAxisRecord {
                mapped: IndexSet::from([root]),
                is_complete: true,
                is_rfactor: false,
            })
            .collect();
        Self { records }
    }

    pub fn complete_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_complete).count()
    }

    /// Information reaching `hop.to`
    pub fn derive(&self, graph: &TensorGraph, corr: &dyn AxisCorrespondence, hop: &Hop) -> Self {
        let records = self
            .records
            .iter()
            .map(|record| match hop.kind {
                HopKind::ConsumerAsProducer => to_consumer(graph, corr, hop, record),
                HopKind::ProducerAsConsumer => to_producer(graph, corr, hop, record),
                HopKind::Sibling => to_sibling(graph, hop, record),
            })
            .filter(|record| !record.mapped.is_empty())
            .collect();
        Self { records }
    }
}

fn to_consumer(
    graph: &TensorGraph,
    corr: &dyn AxisCorrespondence,
    hop: &Hop,
    record: &RootAxisRecord,
) -> RootAxisRecord {
    let producer = graph.tensor(hop.from);
    let p2c = corr.producer_to_consumer(graph, hop.from, hop.to);
    let ids: Vec<AxisId> = if producer.has_rfactor() && !record.is_rfactor {
        producer
            .maybe_rfactor()
            .iter()
            .copied()
            .filter(|&rf| {
                record
                    .mapped
                    .iter()
                    .any(|&root| rf == root || graph.is_derived_from(rf, root))
            })
            .collect()
    } else {
        record.mapped.iter().copied().collect()
    };

    let mut is_complete = record.is_complete;
    let mut mapped = IndexSet::new();
    for id in ids {
        match p2c.get(&id) {
            Some(&c) => {
                mapped.insert(c);
            }
            None => is_complete = false,
        }
    }
    RootAxisRecord {
        mapped,
        is_complete,
        is_rfactor: false,
    }
}

fn to_producer(
    graph: &TensorGraph,
    corr: &dyn AxisCorrespondence,
    hop: &Hop,
    record: &RootAxisRecord,
) -> RootAxisRecord {
    let consumer = graph.tensor(hop.from);
    let c2p = corr.consumer_to_producer(graph, hop.to, hop.from);
    let ids: IndexSet<AxisId> = if record.is_rfactor && consumer.has_rfactor() {
        record
            .mapped
            .iter()
            .flat_map(|&rf| graph.root_origins(rf))
            .collect()
    } else {
        record.mapped.clone()
    };

    let mut is_complete = record.is_complete;
    let mut mapped = IndexSet::new();
    for id in ids {
        match c2p.get(&id) {
            Some(&p) => {
                mapped.insert(p);
            }
            None => is_complete = false,
        }
    }
    RootAxisRecord {
        mapped,
        is_complete,
        is_rfactor: graph.tensor(hop.to).has_rfactor(),
    }
}

fn to_sibling(graph: &TensorGraph, hop: &Hop, record: &RootAxisRecord) -> RootAxisRecord {
    let (from, to) = (graph.tensor(hop.from), graph.tensor(hop.to));
    let (src, dst) = if record.is_rfactor {
        (from.maybe_rfactor(), to.maybe_rfactor())
    } else {
        (from.root.as_slice(), to.root.as_slice())
    };
    let mut is_complete = record.is_complete;
    let mut mapped = IndexSet::new();
    for id in &record.mapped {
        match src.iter().position(|a| a == id).and_then(|pos| dst.get(pos)) {
            Some(&a) => {
                mapped.insert(a);
            }
            None => is_complete = false,
        }
    }
    RootAxisRecord {
        mapped,
        is_complete,
        is_rfactor: record.is_rfactor,
    }
}
