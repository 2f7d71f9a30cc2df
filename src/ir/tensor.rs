use std::fmt;

use super::{AxisId, OpId, ScalarId, TensorId};
use crate::expr::Literal;

/// Where a tensor's buffer lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MemoryKind {
    #[default]
    Local,
    Shared,
    Global,
}

impl fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryKind::Local => write!(f, "local"),
            MemoryKind::Shared => write!(f, "shared"),
            MemoryKind::Global => write!(f, "global"),
        }
    }
}

/// A tensor operand of the dataflow graph
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    pub id: TensorId,
    pub name: String,
    /// Axes as created, before any transform
    pub root: Vec<AxisId>,
    /// Logical output axes, when the tensor was reshaped before being
    /// consumed
    pub rfactor: Option<Vec<AxisId>>,
    /// Scheduled (leaf) axes, outermost first
    pub domain: Vec<AxisId>,
    pub memory: MemoryKind,
    pub definition: Option<OpId>,
    pub uses: Vec<OpId>,
    /// Count of leading axes shared with the loop nest of a consumer
    pub commit_position: usize,
    /// Largest consumer-side position any producer is committed at
    pub max_producer_position: usize,
    pub is_input: bool,
    pub is_output: bool,
}

impl Tensor {
    pub fn ndims(&self) -> usize {
        self.domain.len()
    }

    pub fn axis(&self, pos: usize) -> AxisId {
        self.domain[pos]
    }

    pub fn has_rfactor(&self) -> bool {
        self.rfactor.is_some()
    }

    /// The rfactor domain if there is one, the root domain otherwise
    pub fn maybe_rfactor(&self) -> &[AxisId] {
        self.rfactor.as_deref().unwrap_or(&self.root)
    }

    pub fn has_commit(&self) -> bool {
        self.commit_position > 0
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// A non-tensor value, e.g. an index or a reduction partial
#[derive(Debug, Clone, PartialEq)]
pub struct Scalar {
    pub id: ScalarId,
    pub name: String,
}

/// Operand of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Value {
    Tensor(TensorId),
    Scalar(ScalarId),
}

impl Value {
    pub fn as_tensor(self) -> Option<TensorId> {
        match self {
            Value::Tensor(t) => Some(t),
            Value::Scalar(_) => None,
        }
    }
}

impl From<TensorId> for Value {
    fn from(t: TensorId) -> Self {
        Value::Tensor(t)
    }
}

impl From<ScalarId> for Value {
    fn from(s: ScalarId) -> Self {
        Value::Scalar(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OpKind {
    /// Axis-preserving op, tagged with its operator name
    Pointwise(String),
    /// Reduces the output's reduction axes, starting from `init`
    Reduction { op: String, init: Option<Literal> },
    /// Introduces the output's broadcast axes
    Broadcast,
}

impl OpKind {
    pub fn pointwise(name: &str) -> Self {
        OpKind::Pointwise(name.to_string())
    }

    pub fn reduction(name: &str, init: Literal) -> Self {
        OpKind::Reduction {
            op: name.to_string(),
            init: Some(init),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            OpKind::Pointwise(name) | OpKind::Reduction { op: name, .. } => name,
            OpKind::Broadcast => "broadcast",
        }
    }
}

/// An operation with ordered inputs and outputs
#[derive(Debug, Clone, PartialEq)]
pub struct Op {
    pub id: OpId,
    pub kind: OpKind,
    pub inputs: Vec<Value>,
    pub outputs: Vec<Value>,
}

impl Op {
    pub fn tensor_inputs(&self) -> impl Iterator<Item = TensorId> + '_ {
        self.inputs.iter().filter_map(|v| v.as_tensor())
    }

    pub fn tensor_outputs(&self) -> impl Iterator<Item = TensorId> + '_ {
        self.outputs.iter().filter_map(|v| v.as_tensor())
    }

    /// The single tensor output, if the op has exactly one output and it is
    /// a tensor
    pub fn sole_tensor_output(&self) -> Option<TensorId> {
        match self.outputs.as_slice() {
            [Value::Tensor(t)] => Some(*t),
            _ => None,
        }
    }

    /// Identity value the output must be initialised with, if any
    pub fn init_value(&self) -> Option<Literal> {
        match &self.kind {
            OpKind::Reduction { init, .. } => *init,
            _ => None,
        }
    }
}
