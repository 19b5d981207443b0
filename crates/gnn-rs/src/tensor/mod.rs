//! Host tensors, shapes, dtypes, specs, and the dual-mode [`Value`] handle.

mod dtype;
mod host_tensor;
mod shape;
mod spec;
mod value;

pub use dtype::DType;
pub use host_tensor::Tensor;
pub use shape::Shape;
pub use spec::{Dimension, TensorSpec};
pub use value::{SymbolicTensor, Value};
