//! Dual-mode tensor handle: concrete host data or a node in a traced program.

use std::fmt;
use std::sync::Arc;

use super::{DType, Dimension, Tensor, TensorSpec};
use crate::error::{GraphError, GraphResult};
use crate::ops::program::Operation;

/// A tensor-valued quantity flowing through graph pieces and layers.
///
/// Operators evaluate eagerly when every input is concrete and otherwise record a
/// symbolic node. The same layer code therefore runs both on data and while
/// tracing a model into a [`Program`](crate::ops::Program).
#[derive(Clone)]
pub enum Value {
    Concrete(Tensor),
    Symbolic(SymbolicTensor),
}

/// Handle to an immutable node of a traced computation.
#[derive(Clone)]
pub struct SymbolicTensor {
    node: Arc<SymbolicNode>,
}

struct SymbolicNode {
    op: Operation,
    inputs: Vec<Value>,
    spec: TensorSpec,
}

impl SymbolicTensor {
    /// Creates the placeholder for the `index`-th flattened program input.
    pub fn placeholder(index: usize, spec: TensorSpec) -> Self {
        Self::new(Operation::Parameter { index }, Vec::new(), spec)
    }

    pub(crate) fn new(op: Operation, inputs: Vec<Value>, spec: TensorSpec) -> Self {
        SymbolicTensor {
            node: Arc::new(SymbolicNode { op, inputs, spec }),
        }
    }

    pub fn spec(&self) -> &TensorSpec {
        &self.node.spec
    }

    pub fn op(&self) -> &Operation {
        &self.node.op
    }

    pub fn inputs(&self) -> &[Value] {
        &self.node.inputs
    }

    /// Identity of the node; equal keys denote the same traced value.
    pub(crate) fn key(&self) -> usize {
        Arc::as_ptr(&self.node) as usize
    }
}

impl Value {
    pub fn spec(&self) -> TensorSpec {
        match self {
            Value::Concrete(tensor) => tensor.spec(),
            Value::Symbolic(symbolic) => symbolic.spec().clone(),
        }
    }

    pub fn dtype(&self) -> DType {
        match self {
            Value::Concrete(tensor) => tensor.dtype(),
            Value::Symbolic(symbolic) => symbolic.spec().dtype,
        }
    }

    pub fn rank(&self) -> usize {
        match self {
            Value::Concrete(tensor) => tensor.shape().rank(),
            Value::Symbolic(symbolic) => symbolic.spec().rank(),
        }
    }

    /// Extent of `axis`, static whenever it is known at trace time.
    pub fn dim(&self, axis: usize) -> Option<Dimension> {
        match self {
            Value::Concrete(tensor) => tensor.shape().dims().get(axis).map(|&d| Dimension::Static(d)),
            Value::Symbolic(symbolic) => symbolic.spec().dims.get(axis).copied(),
        }
    }

    /// Item count (first axis); `None` for scalars.
    pub fn leading(&self) -> Option<Dimension> {
        self.dim(0)
    }

    pub fn is_symbolic(&self) -> bool {
        matches!(self, Value::Symbolic(_))
    }

    pub fn as_tensor(&self) -> Option<&Tensor> {
        match self {
            Value::Concrete(tensor) => Some(tensor),
            Value::Symbolic(_) => None,
        }
    }

    /// Returns the concrete tensor, failing for values that only exist while tracing.
    pub fn to_tensor(&self) -> GraphResult<Tensor> {
        self.as_tensor().cloned().ok_or_else(|| {
            GraphError::unsupported(format!(
                "value {} is symbolic and has no data outside a traced program",
                self.spec()
            ))
        })
    }

    pub fn into_tensor(self) -> GraphResult<Tensor> {
        match self {
            Value::Concrete(tensor) => Ok(tensor),
            Value::Symbolic(symbolic) => Err(GraphError::unsupported(format!(
                "value {} is symbolic and has no data outside a traced program",
                symbolic.spec()
            ))),
        }
    }
}

impl From<Tensor> for Value {
    fn from(tensor: Tensor) -> Self {
        Value::Concrete(tensor)
    }
}

impl From<SymbolicTensor> for Value {
    fn from(symbolic: SymbolicTensor) -> Self {
        Value::Symbolic(symbolic)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Concrete(a), Value::Concrete(b)) => a == b,
            (Value::Symbolic(a), Value::Symbolic(b)) => a.key() == b.key(),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Concrete(tensor) => fmt::Debug::fmt(tensor, f),
            Value::Symbolic(symbolic) => fmt::Debug::fmt(symbolic, f),
        }
    }
}

impl fmt::Debug for SymbolicTensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbolic({} = {})", self.spec(), self.op().mnemonic())
    }
}
