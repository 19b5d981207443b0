pub mod error;
pub mod graph;
pub mod layers;
pub mod model;
pub mod module;
pub mod ops;
pub mod saved;
pub mod tensor;
pub mod utils;
mod env;

pub use error::{GraphError, GraphResult};
pub use graph::{GraphTensor, GraphTensorSpec};
pub use layers::{Layer, LayerRegistry, LayerValue, ValueSpec};
pub use model::{ExecutionMode, Model, ModelOptions, ProgramFormat};
pub use tensor::{DType, Dimension, Shape, Tensor, TensorSpec, Value};
