use std::fmt;

use super::{AxisId, TensorId};
use crate::expr::Expr;

/// What an axis iterates over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AxisKind {
    Iteration,
    Reduction,
    Broadcast,
}

/// Hardware dimension of a thread or block binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Dim {
    X,
    Y,
    Z,
}

impl Dim {
    fn suffix(self) -> &'static str {
        match self {
            Dim::X => "x",
            Dim::Y => "y",
            Dim::Z => "z",
        }
    }
}

/// Parallel binding of an axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ParallelType {
    #[default]
    Serial,
    Unroll,
    Vectorize,
    MisalignedVectorize,
    Unswitch,
    ThreadDim(Dim),
    BlockDim(Dim),
}

impl ParallelType {
    pub fn is_thread_dim(self) -> bool {
        matches!(self, ParallelType::ThreadDim(_))
    }

    pub fn is_block_dim(self) -> bool {
        matches!(self, ParallelType::BlockDim(_))
    }

    /// Bound to either a thread or a block dimension
    pub fn is_thread(self) -> bool {
        self.is_thread_dim() || self.is_block_dim()
    }

    pub fn is_vectorize(self) -> bool {
        matches!(
            self,
            ParallelType::Vectorize | ParallelType::MisalignedVectorize
        )
    }

    /// Name of the launch dimension carrying the extent of this binding
    pub fn dim_name(self) -> Option<&'static str> {
        match self {
            ParallelType::ThreadDim(Dim::X) => Some("blockDim.x"),
            ParallelType::ThreadDim(Dim::Y) => Some("blockDim.y"),
            ParallelType::ThreadDim(Dim::Z) => Some("blockDim.z"),
            ParallelType::BlockDim(Dim::X) => Some("gridDim.x"),
            ParallelType::BlockDim(Dim::Y) => Some("gridDim.y"),
            ParallelType::BlockDim(Dim::Z) => Some("gridDim.z"),
            _ => None,
        }
    }

    /// Short tag used in axis names, e.g. `S` in `iS3`
    fn tag(self) -> String {
        match self {
            ParallelType::Serial => "S".to_string(),
            ParallelType::Unroll => "UR".to_string(),
            ParallelType::Vectorize => "V".to_string(),
            ParallelType::MisalignedVectorize => "MV".to_string(),
            ParallelType::Unswitch => "US".to_string(),
            ParallelType::ThreadDim(d) => format!("thread{}", d.suffix()),
            ParallelType::BlockDim(d) => format!("block{}", d.suffix()),
        }
    }
}

impl fmt::Display for ParallelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParallelType::Serial => write!(f, "serial"),
            ParallelType::Unroll => write!(f, "unroll"),
            ParallelType::Vectorize => write!(f, "vectorize"),
            ParallelType::MisalignedVectorize => write!(f, "misalignedVectorize"),
            ParallelType::Unswitch => write!(f, "unswitch"),
            ParallelType::ThreadDim(d) => write!(f, "threadIdx.{}", d.suffix()),
            ParallelType::BlockDim(d) => write!(f, "blockIdx.{}", d.suffix()),
        }
    }
}

/// One dimension of a tensor's iteration space
///
/// Axes created by `split`/`merge` keep the axes they were derived from in
/// `origins`; root axes have none.
#[derive(Debug, Clone, PartialEq)]
pub struct Axis {
    pub id: AxisId,
    pub tensor: TensorId,
    pub kind: AxisKind,
    pub parallel: ParallelType,
    pub extent: Expr,
    pub origins: Vec<AxisId>,
}

impl Axis {
    pub fn is_reduction(&self) -> bool {
        self.kind == AxisKind::Reduction
    }

    pub fn is_broadcast(&self) -> bool {
        self.kind == AxisKind::Broadcast
    }

    pub fn is_thread(&self) -> bool {
        self.parallel.is_thread()
    }

    pub fn is_root(&self) -> bool {
        self.origins.is_empty()
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            AxisKind::Iteration => 'i',
            AxisKind::Reduction => 'r',
            AxisKind::Broadcast => 'b',
        };
        write!(
            f,
            "{}{}{}{{{}}}",
            kind,
            self.parallel.tag(),
            self.id.0,
            self.extent
        )
    }
}

/// Shape of one axis handed to [`TensorGraph::add_tensor`](super::TensorGraph::add_tensor)
#[derive(Debug, Clone, PartialEq)]
pub struct AxisSpec {
    pub kind: AxisKind,
    pub extent: Expr,
}

impl AxisSpec {
    pub fn iter(extent: impl Into<Expr>) -> Self {
        Self {
            kind: AxisKind::Iteration,
            extent: extent.into(),
        }
    }

    pub fn reduction(extent: impl Into<Expr>) -> Self {
        Self {
            kind: AxisKind::Reduction,
            extent: extent.into(),
        }
    }

    pub fn broadcast() -> Self {
        Self {
            kind: AxisKind::Broadcast,
            extent: Expr::Const(1),
        }
    }
}

macro_rules! impl_from_extent_for_axis_spec {
    ($($t:ty),*) => {
        $(
            impl From<$t> for AxisSpec {
                fn from(extent: $t) -> Self {
                    AxisSpec::iter(extent)
                }
            }
        )*
    };
}

impl_from_extent_for_axis_spec!(i32, i64, usize, Expr, &str);
