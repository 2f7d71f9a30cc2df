//! Tensor/axis/operation data model
//!
//! Everything is addressed through stable integer handles issued by
//! [`TensorGraph`]; nothing outside the arena holds references into it.

pub mod axis;
pub mod correspondence;
pub mod graph;
pub mod tensor;

pub use axis::{Axis, AxisKind, AxisSpec, Dim, ParallelType};
pub use correspondence::{AxisCorrespondence, AxisMap, CorrespondenceTable};
pub use graph::{DependencyIndex, TensorGraph};
pub use tensor::{MemoryKind, Op, OpKind, Scalar, Tensor, Value};

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub usize);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

define_handle!(
    /// Handle of a tensor operand
    TensorId,
    "T"
);
define_handle!(
    /// Handle of an axis
    AxisId,
    "a"
);
define_handle!(
    /// Handle of an operation
    OpId,
    "op"
);
define_handle!(
    /// Handle of a scalar value
    ScalarId,
    "s"
);
