//! Layers: graph update layers, graph operator layers, and the dense building blocks.

use std::any::Any;

use serde::{Deserialize, Serialize};

use crate::error::{GraphError, GraphResult};
use crate::graph::{GraphTensor, GraphTensorSpec};
use crate::module::{Module, ParamVisitor, ParamVisitorMut};
use crate::tensor::{SymbolicTensor, Tensor, TensorSpec, Value};

pub mod dense;
pub mod graph_ops;
pub mod graph_update;
pub mod lambda;
pub mod merge;
pub mod options;
pub mod registry;
pub mod sequential;

pub use dense::{Activation, Dense, Initializer};
pub use graph_ops::{Broadcast, InputFn, Pool, Readout};
pub use graph_update::{Combiner, ContextUpdate, EdgeSetUpdate, NodeSetUpdate};
pub use lambda::Lambda;
pub use merge::Multiply;
pub use options::{
    GraphUpdateContextOptions, GraphUpdateEdgeSetOptions, GraphUpdateNodeSetOptions,
    GraphUpdateOptions,
};
pub use registry::{builtin_layer_factories, FromConfigFn, LayerFactory, LayerRegistry};
pub use sequential::Sequential;

/// What flows between layers: a graph, a single tensor, or a tuple of tensors.
#[derive(Debug, Clone, PartialEq)]
pub enum LayerValue {
    Graph(GraphTensor),
    Tensor(Value),
    Tuple(Vec<Value>),
}

impl LayerValue {
    pub fn kind(&self) -> &'static str {
        match self {
            LayerValue::Graph(_) => "graph",
            LayerValue::Tensor(_) => "tensor",
            LayerValue::Tuple(_) => "tuple",
        }
    }

    pub fn as_graph(&self, context: &str) -> GraphResult<&GraphTensor> {
        match self {
            LayerValue::Graph(graph) => Ok(graph),
            other => Err(GraphError::shape_mismatch(context, "a graph", other.kind())),
        }
    }

    pub fn as_value(&self, context: &str) -> GraphResult<&Value> {
        match self {
            LayerValue::Tensor(value) => Ok(value),
            other => Err(GraphError::shape_mismatch(context, "a tensor", other.kind())),
        }
    }

    pub fn into_graph(self) -> GraphResult<GraphTensor> {
        match self {
            LayerValue::Graph(graph) => Ok(graph),
            other => Err(GraphError::shape_mismatch("layer output", "a graph", other.kind())),
        }
    }

    /// Concrete tensor of a single-tensor value.
    pub fn into_tensor(self) -> GraphResult<Tensor> {
        match self {
            LayerValue::Tensor(value) => value.into_tensor(),
            other => Err(GraphError::shape_mismatch("layer output", "a tensor", other.kind())),
        }
    }

    pub fn spec(&self) -> ValueSpec {
        match self {
            LayerValue::Graph(graph) => ValueSpec::Graph(graph.spec()),
            LayerValue::Tensor(value) => ValueSpec::Tensor(value.spec()),
            LayerValue::Tuple(values) => ValueSpec::Tuple(values.iter().map(Value::spec).collect()),
        }
    }

    /// Leaf values in canonical order.
    pub fn flatten(&self) -> Vec<Value> {
        match self {
            LayerValue::Graph(graph) => graph.flatten(),
            LayerValue::Tensor(value) => vec![value.clone()],
            LayerValue::Tuple(values) => values.clone(),
        }
    }
}

impl From<GraphTensor> for LayerValue {
    fn from(graph: GraphTensor) -> Self {
        LayerValue::Graph(graph)
    }
}

impl From<Tensor> for LayerValue {
    fn from(tensor: Tensor) -> Self {
        LayerValue::Tensor(Value::Concrete(tensor))
    }
}

impl From<Value> for LayerValue {
    fn from(value: Value) -> Self {
        LayerValue::Tensor(value)
    }
}

/// Spec of a [`LayerValue`]; the input and output signature of a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueSpec {
    Graph(GraphTensorSpec),
    Tensor(TensorSpec),
    Tuple(Vec<TensorSpec>),
}

impl ValueSpec {
    pub fn flat_specs(&self) -> Vec<TensorSpec> {
        match self {
            ValueSpec::Graph(spec) => spec.flat_specs(),
            ValueSpec::Tensor(spec) => vec![spec.clone()],
            ValueSpec::Tuple(specs) => specs.clone(),
        }
    }

    /// Fails with the path of the first leaf of `value` outside this spec.
    pub fn check(&self, value: &LayerValue) -> GraphResult<()> {
        self.check_spec(&value.spec())
    }

    pub fn check_spec(&self, actual: &ValueSpec) -> GraphResult<()> {
        match (self, actual) {
            (ValueSpec::Graph(expected), ValueSpec::Graph(actual)) => expected.check_spec(actual),
            (ValueSpec::Tensor(expected), ValueSpec::Tensor(actual)) => {
                if expected.is_compatible_with(actual) {
                    Ok(())
                } else {
                    Err(GraphError::spec_mismatch("input", expected, actual))
                }
            }
            (ValueSpec::Tuple(expected), ValueSpec::Tuple(actual)) => {
                if expected.len() != actual.len() {
                    return Err(GraphError::spec_mismatch(
                        "input",
                        format!("{} tensors", expected.len()),
                        format!("{} tensors", actual.len()),
                    ));
                }
                for (i, (e, a)) in expected.iter().zip(actual).enumerate() {
                    if !e.is_compatible_with(a) {
                        return Err(GraphError::spec_mismatch(format!("input[{i}]"), e, a));
                    }
                }
                Ok(())
            }
            (expected, actual) => Err(GraphError::spec_mismatch(
                "input",
                expected.kind(),
                actual.kind(),
            )),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ValueSpec::Graph(_) => "a graph",
            ValueSpec::Tensor(_) => "a tensor",
            ValueSpec::Tuple(_) => "a tuple",
        }
    }

    /// Rebuilds a value from leaves in [`LayerValue::flatten`] order.
    pub fn unflatten(&self, values: Vec<Value>) -> GraphResult<LayerValue> {
        let expected = self.flat_specs().len();
        if values.len() != expected {
            return Err(GraphError::spec_mismatch(
                "flattened value",
                format!("{expected} tensors"),
                format!("{} tensors", values.len()),
            ));
        }
        let mut values = values.into_iter();
        Ok(match self {
            ValueSpec::Graph(spec) => LayerValue::Graph(spec.unflatten(&mut values)?),
            ValueSpec::Tensor(_) => match values.next() {
                Some(value) => LayerValue::Tensor(value),
                None => return Err(GraphError::spec_mismatch("flattened value", "1 tensor", "0 tensors")),
            },
            ValueSpec::Tuple(_) => LayerValue::Tuple(values.collect()),
        })
    }

    /// Symbolic value whose leaves are the program inputs `0..`.
    pub fn placeholders(&self) -> GraphResult<LayerValue> {
        let values = self
            .flat_specs()
            .into_iter()
            .enumerate()
            .map(|(index, spec)| Value::Symbolic(SymbolicTensor::placeholder(index, spec)))
            .collect();
        self.unflatten(values)
    }
}

impl From<GraphTensorSpec> for ValueSpec {
    fn from(spec: GraphTensorSpec) -> Self {
        ValueSpec::Graph(spec)
    }
}

impl From<TensorSpec> for ValueSpec {
    fn from(spec: TensorSpec) -> Self {
        ValueSpec::Tensor(spec)
    }
}

/// A unit of computation with an optional serializable configuration.
pub trait Layer: Module + Send + Sync {
    /// Registry key used to rebuild this layer from its config.
    fn class_name(&self) -> &str;

    fn name(&self) -> &str;

    fn call(&self, input: &LayerValue) -> GraphResult<LayerValue>;

    /// Constructor arguments as JSON. Layers wrapping arbitrary code decline.
    fn get_config(&self) -> GraphResult<serde_json::Value> {
        Err(GraphError::unsupported(format!(
            "layer '{}' of class {} does not provide a config",
            self.name(),
            self.class_name()
        )))
    }

    fn as_any(&self) -> &dyn Any;
}

/// Serialized form of a layer: registry key plus its config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerConfig {
    pub class_name: String,
    pub config: serde_json::Value,
}

impl LayerConfig {
    pub fn of(layer: &dyn Layer) -> GraphResult<Self> {
        Ok(LayerConfig {
            class_name: layer.class_name().to_string(),
            config: layer.get_config()?,
        })
    }
}

/// Visits the weights of a nested layer under `segment`.
pub fn visit_sublayer(
    v: &mut ParamVisitor<'_>,
    segment: &str,
    layer: &dyn Layer,
) -> GraphResult<()> {
    v.scoped(segment, |v| layer.visit_params(v))
}

pub fn visit_sublayer_mut(
    v: &mut ParamVisitorMut<'_>,
    segment: &str,
    layer: &mut dyn Layer,
) -> GraphResult<()> {
    v.scoped(segment, |v| layer.visit_params_mut(v))
}

/// Parses a layer config, reporting malformed input as a configuration error.
pub(crate) fn parse_config<T: serde::de::DeserializeOwned>(
    class_name: &str,
    config: &serde_json::Value,
) -> GraphResult<T> {
    serde_json::from_value(config.clone())
        .map_err(|err| GraphError::configuration(format!("invalid {class_name} config: {err}")))
}

pub(crate) fn to_config<T: Serialize>(config: &T) -> GraphResult<serde_json::Value> {
    serde_json::to_value(config).map_err(GraphError::from)
}
