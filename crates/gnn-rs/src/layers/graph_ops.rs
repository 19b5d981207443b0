//! Layers reading features from a graph: `Readout`, `Broadcast`, and `Pool`.
//!
//! Used standalone they name every set explicitly. Used as inputs of a graph
//! update they may leave the updated set implicit.

use std::any::Any;

use serde::{Deserialize, Serialize};

use super::{parse_config, to_config, Layer, LayerRegistry, LayerValue};
use crate::error::{GraphError, GraphResult};
use crate::graph::{self, GraphTensor, IncidentNodeOrContextTag, SetLocation, HIDDEN_STATE};
use crate::module::Module;
use crate::ops::ReduceKind;
use crate::tensor::Value;

fn default_feature() -> String {
    HIDDEN_STATE.to_string()
}

/// Reads one feature of the context, a node set, or an edge set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Readout {
    #[serde(default)]
    pub location: Option<SetLocation>,
    #[serde(default = "default_feature")]
    pub feature_name: String,
    #[serde(default)]
    pub name: String,
}

impl Readout {
    /// Reads `hidden_state` of whatever set is being updated.
    pub fn new() -> Self {
        Readout {
            location: None,
            feature_name: default_feature(),
            name: "readout".to_string(),
        }
    }

    pub fn feature(feature_name: impl Into<String>) -> Self {
        Readout {
            feature_name: feature_name.into(),
            ..Readout::new()
        }
    }

    pub fn from_node_set(mut self, node_set_name: impl Into<String>) -> Self {
        self.location = Some(SetLocation::NodeSet(node_set_name.into()));
        self
    }

    pub fn from_edge_set(mut self, edge_set_name: impl Into<String>) -> Self {
        self.location = Some(SetLocation::EdgeSet(edge_set_name.into()));
        self
    }

    pub fn from_context(mut self) -> Self {
        self.location = Some(SetLocation::Context);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn resolve(&self, graph: &GraphTensor, target: &SetLocation) -> GraphResult<Value> {
        if let Some(location) = &self.location {
            if location != target {
                return Err(GraphError::configuration(format!(
                    "Readout of {location} cannot feed an update of {target}"
                )));
            }
        }
        graph.feature(target, &self.feature_name).cloned()
    }

    pub fn from_config(
        config: &serde_json::Value,
        _registry: &LayerRegistry,
    ) -> GraphResult<Box<dyn Layer>> {
        Ok(Box::new(parse_config::<Readout>("Readout", config)?))
    }
}

impl Default for Readout {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for Readout {}

impl Layer for Readout {
    fn class_name(&self) -> &str {
        "Readout"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, input: &LayerValue) -> GraphResult<LayerValue> {
        let graph = input.as_graph("Readout input")?;
        let location = self.location.as_ref().ok_or_else(|| {
            GraphError::configuration("Readout used as a layer needs a node set, edge set, or the context")
        })?;
        Ok(LayerValue::Tensor(graph.feature(location, &self.feature_name)?.clone()))
    }

    fn get_config(&self) -> GraphResult<serde_json::Value> {
        to_config(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Broadcasts a node or context feature onto edges or nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Broadcast {
    pub tag: IncidentNodeOrContextTag,
    #[serde(default)]
    pub edge_set_name: Option<String>,
    #[serde(default)]
    pub node_set_name: Option<String>,
    #[serde(default = "default_feature")]
    pub feature_name: String,
    #[serde(default)]
    pub name: String,
}

impl Broadcast {
    pub fn new(tag: IncidentNodeOrContextTag) -> Self {
        Broadcast {
            tag,
            edge_set_name: None,
            node_set_name: None,
            feature_name: default_feature(),
            name: "broadcast".to_string(),
        }
    }

    pub fn with_feature(mut self, feature_name: impl Into<String>) -> Self {
        self.feature_name = feature_name.into();
        self
    }

    pub fn to_edge_set(mut self, edge_set_name: impl Into<String>) -> Self {
        self.edge_set_name = Some(edge_set_name.into());
        self
    }

    pub fn to_node_set(mut self, node_set_name: impl Into<String>) -> Self {
        self.node_set_name = Some(node_set_name.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn explicit_target(&self) -> GraphResult<SetLocation> {
        match (&self.edge_set_name, &self.node_set_name, self.tag) {
            (Some(edge_set), None, _) => Ok(SetLocation::EdgeSet(edge_set.clone())),
            (None, Some(node_set), IncidentNodeOrContextTag::Context) => {
                Ok(SetLocation::NodeSet(node_set.clone()))
            }
            _ => Err(GraphError::configuration(format!(
                "Broadcast from {} needs exactly one receiving edge set{}",
                self.tag,
                if self.tag == IncidentNodeOrContextTag::Context {
                    " or node set"
                } else {
                    ""
                }
            ))),
        }
    }

    fn resolve(&self, graph: &GraphTensor, target: &SetLocation) -> GraphResult<Value> {
        let explicit = match (&self.edge_set_name, &self.node_set_name) {
            (None, None) => None,
            _ => Some(self.explicit_target()?),
        };
        if let Some(explicit) = &explicit {
            if explicit != target {
                return Err(GraphError::configuration(format!(
                    "Broadcast to {explicit} cannot feed an update of {target}"
                )));
            }
        }
        let feature = self.feature_name.as_str();
        match (self.tag, target) {
            (IncidentNodeOrContextTag::Node(tag), SetLocation::EdgeSet(edge_set)) => {
                graph::broadcast_node_to_edges(graph, edge_set, tag, feature)
            }
            (IncidentNodeOrContextTag::Context, SetLocation::EdgeSet(edge_set)) => {
                graph::broadcast_context_to_edges(graph, edge_set, feature)
            }
            (IncidentNodeOrContextTag::Context, SetLocation::NodeSet(node_set)) => {
                graph::broadcast_context_to_nodes(graph, node_set, feature)
            }
            (tag, target) => Err(GraphError::configuration(format!(
                "Broadcast from {tag} cannot feed an update of {target}"
            ))),
        }
    }

    pub fn from_config(
        config: &serde_json::Value,
        _registry: &LayerRegistry,
    ) -> GraphResult<Box<dyn Layer>> {
        Ok(Box::new(parse_config::<Broadcast>("Broadcast", config)?))
    }
}

impl Module for Broadcast {}

impl Layer for Broadcast {
    fn class_name(&self) -> &str {
        "Broadcast"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, input: &LayerValue) -> GraphResult<LayerValue> {
        let graph = input.as_graph("Broadcast input")?;
        let target = self.explicit_target()?;
        self.resolve(graph, &target).map(LayerValue::Tensor)
    }

    fn get_config(&self) -> GraphResult<serde_json::Value> {
        to_config(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Pools edge features to nodes, or node/edge features to the context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    pub tag: IncidentNodeOrContextTag,
    pub reduce_type: ReduceKind,
    #[serde(default)]
    pub edge_set_name: Option<String>,
    #[serde(default)]
    pub node_set_name: Option<String>,
    #[serde(default = "default_feature")]
    pub feature_name: String,
    #[serde(default)]
    pub name: String,
}

impl Pool {
    pub fn new(tag: IncidentNodeOrContextTag, reduce_type: ReduceKind) -> Self {
        Pool {
            tag,
            reduce_type,
            edge_set_name: None,
            node_set_name: None,
            feature_name: default_feature(),
            name: "pool".to_string(),
        }
    }

    pub fn from_edge_set(mut self, edge_set_name: impl Into<String>) -> Self {
        self.edge_set_name = Some(edge_set_name.into());
        self
    }

    pub fn from_node_set(mut self, node_set_name: impl Into<String>) -> Self {
        self.node_set_name = Some(node_set_name.into());
        self
    }

    pub fn with_feature(mut self, feature_name: impl Into<String>) -> Self {
        self.feature_name = feature_name.into();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn source_edge_set(&self) -> GraphResult<&str> {
        match (&self.edge_set_name, &self.node_set_name) {
            (Some(edge_set), None) => Ok(edge_set),
            _ => Err(GraphError::configuration(format!(
                "Pool to {} needs exactly one source edge set",
                self.tag
            ))),
        }
    }

    fn resolve(&self, graph: &GraphTensor, target: &SetLocation) -> GraphResult<Value> {
        let feature = self.feature_name.as_str();
        match (self.tag, target) {
            (IncidentNodeOrContextTag::Node(tag), SetLocation::NodeSet(node_set)) => {
                let edge_set = self.source_edge_set()?;
                let receiver = graph.edge_set(edge_set)?.adjacency().node_set_name(tag)?;
                if receiver != node_set {
                    return Err(GraphError::configuration(format!(
                        "Pool from edge set '{edge_set}' to {} reaches node set '{receiver}', not '{node_set}'",
                        self.tag
                    )));
                }
                graph::pool_edges_to_node(graph, edge_set, tag, self.reduce_type, feature)
            }
            (IncidentNodeOrContextTag::Context, SetLocation::Context) => {
                match (&self.edge_set_name, &self.node_set_name) {
                    (None, Some(node_set)) => {
                        graph::pool_nodes_to_context(graph, node_set, self.reduce_type, feature)
                    }
                    (Some(edge_set), None) => {
                        graph::pool_edges_to_context(graph, edge_set, self.reduce_type, feature)
                    }
                    _ => Err(GraphError::configuration(
                        "Pool to CONTEXT needs exactly one source node set or edge set",
                    )),
                }
            }
            (tag, target) => Err(GraphError::configuration(format!(
                "Pool to {tag} cannot feed an update of {target}"
            ))),
        }
    }

    pub fn from_config(
        config: &serde_json::Value,
        _registry: &LayerRegistry,
    ) -> GraphResult<Box<dyn Layer>> {
        Ok(Box::new(parse_config::<Pool>("Pool", config)?))
    }
}

impl Module for Pool {}

impl Layer for Pool {
    fn class_name(&self) -> &str {
        "Pool"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, input: &LayerValue) -> GraphResult<LayerValue> {
        let graph = input.as_graph("Pool input")?;
        let target = match self.tag {
            IncidentNodeOrContextTag::Node(tag) => {
                let edge_set = self.source_edge_set()?;
                let receiver = graph.edge_set(edge_set)?.adjacency().node_set_name(tag)?;
                SetLocation::NodeSet(receiver.to_string())
            }
            IncidentNodeOrContextTag::Context => SetLocation::Context,
        };
        self.resolve(graph, &target).map(LayerValue::Tensor)
    }

    fn get_config(&self) -> GraphResult<serde_json::Value> {
        to_config(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// An input of a graph update layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputFn {
    Readout(Readout),
    Broadcast(Broadcast),
    Pool(Pool),
}

impl InputFn {
    /// Evaluates the input for an update of `target`.
    ///
    /// Unknown sets, unknown features, and role combinations that make no sense for
    /// `target` are configuration errors.
    pub fn resolve(&self, graph: &GraphTensor, target: &SetLocation) -> GraphResult<Value> {
        let result = match self {
            InputFn::Readout(readout) => readout.resolve(graph, target),
            InputFn::Broadcast(broadcast) => broadcast.resolve(graph, target),
            InputFn::Pool(pool) => pool.resolve(graph, target),
        };
        result.map_err(|err| match err {
            GraphError::FeatureNotFound { location, feature } => GraphError::configuration(format!(
                "input of the update of {target} reads feature '{feature}' missing from {location}"
            )),
            other => other,
        })
    }
}

impl From<Readout> for InputFn {
    fn from(readout: Readout) -> Self {
        InputFn::Readout(readout)
    }
}

impl From<Broadcast> for InputFn {
    fn from(broadcast: Broadcast) -> Self {
        InputFn::Broadcast(broadcast)
    }
}

impl From<Pool> for InputFn {
    fn from(pool: Pool) -> Self {
        InputFn::Pool(pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Adjacency, EdgeSet, NodeSet, SOURCE, TARGET};
    use crate::tensor::Tensor;

    fn citation_graph() -> GraphTensor {
        let papers = NodeSet::from_fields(
            [("hidden_state", Tensor::from_vec([2, 1], vec![1.0, 2.0]).unwrap())],
            Tensor::vector_i32(vec![2]),
        )
        .unwrap();
        let authors = NodeSet::from_fields(
            [("hidden_state", Tensor::from_vec([1, 1], vec![7.0]).unwrap())],
            Tensor::vector_i32(vec![1]),
        )
        .unwrap();
        let adjacency = Adjacency::source_target(
            ("author", Tensor::vector_i32(vec![0, 0])),
            ("paper", Tensor::vector_i32(vec![0, 1])),
        )
        .unwrap();
        let writes = EdgeSet::from_fields(
            [("hidden_state", Tensor::from_vec([2, 1], vec![0.5, 0.25]).unwrap())],
            Tensor::vector_i32(vec![2]),
            adjacency,
        )
        .unwrap();
        GraphTensor::from_pieces(None, [("paper", papers), ("author", authors)], [("writes", writes)])
            .unwrap()
    }

    #[test]
    fn pool_must_reach_the_updated_node_set() {
        let graph = citation_graph();
        let pool = InputFn::from(Pool::new(IncidentNodeOrContextTag::TARGET, ReduceKind::Sum).from_edge_set("writes"));
        let pooled = pool.resolve(&graph, &SetLocation::NodeSet("paper".into())).unwrap();
        assert_eq!(pooled.into_tensor().unwrap().to_f32_vec().unwrap(), vec![0.5, 0.25]);
        let err = pool
            .resolve(&graph, &SetLocation::NodeSet("author".into()))
            .unwrap_err();
        assert!(matches!(err, GraphError::Configuration(_)));
    }

    #[test]
    fn broadcast_is_rejected_for_context_updates() {
        let graph = citation_graph();
        let broadcast = InputFn::from(Broadcast::new(IncidentNodeOrContextTag::SOURCE));
        let err = broadcast.resolve(&graph, &SetLocation::Context).unwrap_err();
        assert!(matches!(err, GraphError::Configuration(_)));
        let on_edges = broadcast
            .resolve(&graph, &SetLocation::EdgeSet("writes".into()))
            .unwrap();
        assert_eq!(on_edges.into_tensor().unwrap().to_f32_vec().unwrap(), vec![7.0, 7.0]);
    }

    #[test]
    fn missing_feature_in_update_input_is_a_configuration_error() {
        let graph = citation_graph();
        let readout = InputFn::from(Readout::feature("label"));
        let err = readout
            .resolve(&graph, &SetLocation::NodeSet("paper".into()))
            .unwrap_err();
        assert!(matches!(err, GraphError::Configuration(_)));
    }

    #[test]
    fn standalone_layers_need_explicit_sets() {
        let graph = LayerValue::Graph(citation_graph());
        assert!(Readout::new().call(&graph).is_err());
        let readout = Readout::new().from_node_set("author").call(&graph).unwrap();
        assert_eq!(readout.into_tensor().unwrap().to_f32_vec().unwrap(), vec![7.0]);
        let pooled = Pool::new(IncidentNodeOrContextTag::Node(SOURCE), ReduceKind::Mean)
            .from_edge_set("writes")
            .call(&graph)
            .unwrap();
        assert_eq!(pooled.into_tensor().unwrap().to_f32_vec().unwrap(), vec![0.375]);
        let per_edge = Broadcast::new(IncidentNodeOrContextTag::Node(TARGET))
            .to_edge_set("writes")
            .call(&graph)
            .unwrap();
        assert_eq!(per_edge.into_tensor().unwrap().to_f32_vec().unwrap(), vec![1.0, 2.0]);
    }

    #[test]
    fn config_round_trips_through_json() {
        let pool = Pool::new(IncidentNodeOrContextTag::TARGET, ReduceKind::Max)
            .from_edge_set("writes")
            .with_name("pool_writes");
        let config = pool.get_config().unwrap();
        assert_eq!(config["reduce_type"], "max");
        let rebuilt: Pool = serde_json::from_value(config).unwrap();
        assert_eq!(rebuilt, pool);
    }
}
