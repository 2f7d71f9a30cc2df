//! Lowering to a loop-nest kernel
//!
//! Given a graph whose commit positions are set, [`lower_kernel`] orders the
//! operations so that producers sharing loops with a consumer end up
//! adjacent to it, then builds the loop-nest tree from that order.
//!
//! ```text
//! TensorGraph ─► ComputeAtMap ─► topological order ─► reorder_for_compute_at
//!                                                        │
//!                                        LoopNestBuilder ◄┘ ─► Kernel
//! ```

mod expr_sort;
mod loop_nest;

pub use expr_sort::reorder_for_compute_at;
pub use loop_nest::LoopNestBuilder;

use log::{Level, debug, info, log_enabled};

use crate::config::LoweringConfig;
use crate::error::Result;
use crate::eval::ExtentResolver;
use crate::ir::{AxisCorrespondence, DependencyIndex, TensorGraph};
use crate::kernel_ir::{Kernel, KernelPrinter, validate_kernel};
use crate::schedule::{ComputeAtMap, inline_all};
use crate::symbols::IndexAllocator;

/// Lower `graph` with its current commit positions
pub fn lower_kernel(
    graph: &TensorGraph,
    corr: &dyn AxisCorrespondence,
    resolver: &dyn ExtentResolver,
    config: &LoweringConfig,
) -> Result<Kernel> {
    let ca_map = ComputeAtMap::build(graph, corr)?;
    let deps = DependencyIndex::build(graph);
    let topo = deps.topological_order()?;
    let ops = reorder_for_compute_at(&ca_map, &deps, &topo)?;
    debug!("Lowering {} operations", ops.len());

    let mut symbols = IndexAllocator::with_prefix(&config.index_prefix);
    let kernel = LoopNestBuilder::new(&ca_map, resolver, &mut symbols).build(&ops)?;
    debug!("Issued {} loop indices", symbols.issued());

    if config.validate {
        validate_kernel(graph, &kernel)?;
    }
    if config.dump_kernel {
        info!("Lowered kernel:\n{}", KernelPrinter::new(graph).render(&kernel));
    } else if log_enabled!(Level::Debug) {
        debug!("Lowered kernel:\n{}", KernelPrinter::new(graph).render(&kernel));
    }
    Ok(kernel)
}

/// Inline from every output with the configured mode, then lower
pub fn schedule_and_lower(
    graph: &mut TensorGraph,
    corr: &dyn AxisCorrespondence,
    resolver: &dyn ExtentResolver,
    config: &LoweringConfig,
) -> Result<Kernel> {
    inline_all(graph, corr, config.inline_mode)?;
    lower_kernel(graph, corr, resolver, config)
}
