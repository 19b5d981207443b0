#![allow(dead_code)]

use std::any::Any;

use gnn_rs::graph::{
    self, Adjacency, EdgeSet, FeatureUpdates, GraphTensor, IncidentNodeOrContextTag, NodeSet,
    HIDDEN_STATE, SOURCE, TARGET,
};
use gnn_rs::layers::{
    Broadcast, Combiner, Dense, EdgeSetUpdate, Initializer, Layer, LayerRegistry, LayerValue,
    Multiply, NodeSetUpdate, Pool, Readout,
};
use gnn_rs::module::Module;
use gnn_rs::ops::{functional, ReduceKind};
use gnn_rs::{GraphError, GraphResult, Tensor, Value};

/// `k` disjoint copies of a two-node graph with edges 0 -> 1 (weight 0.5)
/// and 1 -> 0 (weight -0.5), node states `[[10, 0], [12, 0]]`.
pub fn weighted_swap_graph(k: usize) -> GraphTensor {
    let mut states = Vec::with_capacity(4 * k);
    let mut sources = Vec::with_capacity(2 * k);
    let mut targets = Vec::with_capacity(2 * k);
    let mut weights = Vec::with_capacity(2 * k);
    for copy in 0..k {
        let base = (2 * copy) as i32;
        states.extend([10.0, 0.0, 12.0, 0.0]);
        sources.extend([base, base + 1]);
        targets.extend([base + 1, base]);
        weights.extend([0.5, -0.5]);
    }
    let nodes = NodeSet::from_fields(
        [(HIDDEN_STATE, Tensor::from_vec([2 * k, 2], states).unwrap())],
        Tensor::vector_i32(vec![2; k]),
    )
    .unwrap();
    let adjacency = Adjacency::source_target(
        ("node", Tensor::vector_i32(sources)),
        ("node", Tensor::vector_i32(targets)),
    )
    .unwrap();
    let edges = EdgeSet::from_fields(
        [("weight", Tensor::from_vec([2 * k, 1], weights).unwrap())],
        Tensor::vector_i32(vec![2; k]),
        adjacency,
    )
    .unwrap();
    GraphTensor::from_pieces(None, [("node", nodes)], [("edge", edges)]).unwrap()
}

/// Node states expected after one weighted-swap round on [`weighted_swap_graph`].
pub fn expected_states(k: usize) -> Vec<f32> {
    [10.0, -6.0, 12.0, 5.0].repeat(k)
}

pub fn constant_dense(name: &str, units: usize, values: Vec<f32>) -> Dense {
    Dense::new(units)
        .with_name(name)
        .with_bias(false)
        .with_kernel_initializer(Initializer::Constant { values })
}

/// The weighted swap written with built-in layers only, ending in a readout
/// of the node states.
pub fn std_layers() -> Vec<Box<dyn Layer>> {
    vec![
        Box::new(
            EdgeSetUpdate::new(
                "edge",
                vec![Broadcast::new(IncidentNodeOrContextTag::SOURCE).into()],
                Box::new(constant_dense("swap", 2, vec![0.0, 1.0, 1.0, 0.0])),
            )
            .with_output_feature("swapped")
            .with_name("swap_source_state"),
        ),
        Box::new(
            EdgeSetUpdate::new(
                "edge",
                vec![
                    Readout::feature("swapped").into(),
                    Readout::feature("weight").into(),
                ],
                Box::new(Multiply::new()),
            )
            .with_combiner(Combiner::None)
            .with_output_feature("message")
            .with_name("weigh_messages"),
        ),
        Box::new(NodeSetUpdate::new(
            "node",
            vec![
                Readout::new().into(),
                Pool::new(IncidentNodeOrContextTag::TARGET, ReduceKind::Sum)
                    .from_edge_set("edge")
                    .with_feature("message")
                    .into(),
            ],
            Box::new(constant_dense(
                "add",
                2,
                vec![1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0],
            )),
        )),
        Box::new(Readout::feature(HIDDEN_STATE).from_node_set("node")),
    ]
}

/// Graph-to-graph layer adding to each node state the weighted, swapped
/// states of its in-neighbors.
pub struct AddWeightedSwappedInEdges {
    name: String,
    swap: Tensor,
    supports_get_config: bool,
}

impl AddWeightedSwappedInEdges {
    pub fn new(name: impl Into<String>) -> Self {
        AddWeightedSwappedInEdges {
            name: name.into(),
            swap: Tensor::from_vec([2, 2], vec![0.0, 1.0, 1.0, 0.0]).unwrap(),
            supports_get_config: true,
        }
    }

    /// When false, `get_config` declines like a layer built from arbitrary code.
    pub fn with_config_support(mut self, supports_get_config: bool) -> Self {
        self.supports_get_config = supports_get_config;
        self
    }

    pub fn from_config(
        config: &serde_json::Value,
        _registry: &LayerRegistry,
    ) -> GraphResult<Box<dyn Layer>> {
        let name = config["name"].as_str().unwrap_or("add_weighted_swapped_in_edges");
        Ok(Box::new(Self::new(name)))
    }
}

impl Module for AddWeightedSwappedInEdges {}

impl Layer for AddWeightedSwappedInEdges {
    fn class_name(&self) -> &str {
        "AddWeightedSwappedInEdges"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, input: &LayerValue) -> GraphResult<LayerValue> {
        let graph = input.as_graph("AddWeightedSwappedInEdges input")?;
        let source = graph::broadcast_node_to_edges(graph, "edge", SOURCE, HIDDEN_STATE)?;
        let swapped = functional::matmul(&source, &Value::from(self.swap.clone()))?;
        let weight = graph.edge_set("edge")?.feature("weight")?;
        let messages = functional::mul(&swapped, weight)?;
        let pooled = graph::pool_edges_to_node(graph, "edge", TARGET, ReduceKind::Sum, &messages)?;
        let state = functional::add(graph.node_set("node")?.feature(HIDDEN_STATE)?, &pooled)?;
        graph
            .replace_features(FeatureUpdates::new().node_set_feature("node", HIDDEN_STATE, state))
            .map(LayerValue::Graph)
    }

    fn get_config(&self) -> GraphResult<serde_json::Value> {
        if !self.supports_get_config {
            return Err(GraphError::unsupported(format!(
                "layer '{}' has no config",
                self.name
            )));
        }
        Ok(serde_json::json!({ "name": self.name }))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub fn custom_layers() -> Vec<Box<dyn Layer>> {
    custom_layers_with_config(true)
}

pub fn custom_layers_with_config(supports_get_config: bool) -> Vec<Box<dyn Layer>> {
    vec![
        Box::new(
            AddWeightedSwappedInEdges::new("weighted_swap").with_config_support(supports_get_config),
        ),
        Box::new(Readout::feature(HIDDEN_STATE).from_node_set("node")),
    ]
}

pub fn registry_with_custom() -> LayerRegistry {
    let mut registry = LayerRegistry::with_builtins();
    registry.register("AddWeightedSwappedInEdges", AddWeightedSwappedInEdges::from_config);
    registry
}

pub fn output_values(output: LayerValue) -> Vec<f32> {
    output.into_tensor().unwrap().to_f32_vec().unwrap()
}
