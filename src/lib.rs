//! Loopnest: inlining and loop-nest lowering for fused tensor kernels
//!
//! Loopnest takes a dataflow graph of tensor operations, decides how many
//! leading loops each producer shares with a consumer, and lowers the
//! result into a backend-agnostic tree of loops, allocations, barriers and
//! computations.
//!
//! # Architecture
//!
//! Loopnest provides:
//! - **ir**: tensors, axes, operations and cross-tensor axis correspondences
//! - **schedule**: the axis compatibility oracle, the max-information
//!   propagation engine and the inlining planner
//! - **lower**: the expression linearizer and the loop-nest builder
//! - **kernel_ir**: the lowered program, with visitor, printer and validator
//!
//! # Example
//!
//! ```
//! use loopnest::prelude::*;
//!
//! let mut g = TensorGraph::new();
//! let x = g.add_tensor("x", [4, 8]);
//! let y = g.add_tensor("y", [4, 8]);
//! let z = g.add_tensor("z", [4, 8]);
//! g.mark_input(x);
//! g.add_op(OpKind::pointwise("exp"), vec![x.into()], vec![y.into()]);
//! g.add_op(OpKind::pointwise("neg"), vec![y.into()], vec![z.into()]);
//! g.mark_output(z);
//!
//! let corr = CorrespondenceTable::identity(&g);
//! let kernel = schedule_and_lower(&mut g, &corr, &LiteralResolver, &LoweringConfig::default())?;
//! assert_eq!(kernel.commit_positions[&y], 2);
//! # Ok::<(), LoweringError>(())
//! ```

// ============================================================================
// Core Modules
// ============================================================================

pub mod config;
pub mod error;
pub mod eval;
pub mod expr;
pub mod ir;
pub mod symbols;

// ============================================================================
// Passes
// ============================================================================

pub mod kernel_ir;
pub mod lower;
pub mod schedule;

// ============================================================================
// Re-exports
// ============================================================================

pub use config::LoweringConfig;
pub use error::{LoweringError, Result};
pub use kernel_ir::Kernel;
pub use lower::{lower_kernel, schedule_and_lower};
pub use schedule::{InlineMode, inline_all, inline_at, inline_most};

// ============================================================================
// Prelude
// ============================================================================

/// Prelude module with commonly used types and traits
pub mod prelude {
    // Graph model
    pub use crate::ir::{
        AxisCorrespondence, AxisSpec, CorrespondenceTable, Dim, MemoryKind, OpKind,
        ParallelType, TensorGraph, TensorId,
    };

    // Expressions and resolution
    pub use crate::eval::{ExpressionEvaluator, ExtentResolver, LiteralResolver};
    pub use crate::expr::{Expr, Literal};

    // Scheduling
    pub use crate::schedule::{InlineMode, inline_all, inline_at, inline_most};

    // Lowering
    pub use crate::config::LoweringConfig;
    pub use crate::error::{LoweringError, Result};
    pub use crate::kernel_ir::{Kernel, KernelPrinter, Stmt};
    pub use crate::lower::{lower_kernel, schedule_and_lower};
}
