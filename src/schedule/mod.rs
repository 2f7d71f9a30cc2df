//! Inlining decisions
//!
//! Decides, for every tensor reachable from a reference tensor, how many of
//! its leading axes are shared with the loop nest of a consumer (its commit
//! position). The planner walks the graph with the max-information
//! propagation engine and clips every proposal with the axis compatibility
//! oracle.

mod loop_map;
mod oracle;
mod planner;
mod propagation;
mod root_info;

pub use loop_map::{CommitTarget, ComputeAtMap};
pub use oracle::{InlineOracle, matched_consumer_pos, matched_producer_pos};
pub use planner::{InlinePlanner, MaxProducerPosUpdater};
pub use propagation::{
    Hop, HopKind, Information, InformationPolicy, Propagator, SpanningTree, propagate,
};
pub use root_info::{RootAxisInfo, RootAxisRecord};

use log::{debug, warn};
use rustc_hash::FxHashSet;

use crate::error::Result;
use crate::ir::{AxisCorrespondence, TensorGraph, TensorId};

/// How aggressively producers are fused into consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum InlineMode {
    /// Share exactly the reference-derived axes, clipped where illegal
    #[default]
    Standard,
    /// Like `Standard`, additionally refusing unrolled axes
    BestEffort,
    /// Share as many axes as legal, ignoring the reference position
    MostInlined,
}

/// Inline every tensor reachable from `reference` at the position derived
/// from its leading `pos` axes
///
/// An empty `selection` selects every tensor. Returns the traversal so the
/// caller can inspect the visit order.
pub fn inline_at(
    graph: &mut TensorGraph,
    corr: &dyn AxisCorrespondence,
    reference: TensorId,
    pos: usize,
    mode: InlineMode,
    selection: &[TensorId],
) -> Result<SpanningTree> {
    let ndims = graph.tensor(reference).ndims();
    let pos = if pos > ndims {
        warn!(
            "Reference position {} exceeds {} axes of {}, clamping",
            pos,
            ndims,
            graph.tensor(reference)
        );
        ndims
    } else {
        pos
    };
    debug!(
        "Inlining from {} at {} ({:?}, {} selected)",
        graph.tensor(reference),
        pos,
        mode,
        selection.len()
    );

    let selection: FxHashSet<TensorId> = selection.iter().copied().collect();
    let mut planner = InlinePlanner::new(graph, corr, reference, pos, mode, selection);
    let tree = planner.run(graph)?;
    MaxProducerPosUpdater::new(corr).run(graph, &tree)?;
    Ok(tree)
}

/// Inline from every graph output at its full depth
pub fn inline_all(
    graph: &mut TensorGraph,
    corr: &dyn AxisCorrespondence,
    mode: InlineMode,
) -> Result<()> {
    for output in graph.outputs().to_vec() {
        let ndims = graph.tensor(output).ndims();
        inline_at(graph, corr, output, ndims, mode, &[])?;
    }
    Ok(())
}

/// Fuse every tensor as deeply as the oracle allows
pub fn inline_most(graph: &mut TensorGraph, corr: &dyn AxisCorrespondence) -> Result<()> {
    inline_all(graph, corr, InlineMode::MostInlined)
}
