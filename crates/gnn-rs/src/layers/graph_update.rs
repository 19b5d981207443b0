//! `EdgeSetUpdate`, `NodeSetUpdate`, and `ContextUpdate`.
//!
//! Each gathers its inputs from the graph, combines them, feeds them to a
//! next-state layer, and writes the result back as one feature of the updated set.

use std::any::Any;

use serde::{Deserialize, Serialize};
use tracing::trace;

use super::options::GraphUpdateOptions;
use super::{
    parse_config, visit_sublayer, visit_sublayer_mut, InputFn, Layer, LayerConfig, LayerRegistry,
    LayerValue,
};
use crate::error::{GraphError, GraphResult};
use crate::graph::{FeatureUpdates, GraphTensor, SetLocation, HIDDEN_STATE};
use crate::module::{Module, ParamVisitor, ParamVisitorMut};
use crate::ops::functional;
use crate::tensor::Value;

/// How multiple inputs are presented to the next-state layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Combiner {
    /// Concatenate along the last axis into one tensor.
    #[default]
    Concatenate,
    /// Pass a single input as is, several inputs as a tuple.
    None,
}

impl Combiner {
    pub fn combine(self, inputs: Vec<Value>) -> GraphResult<LayerValue> {
        match (self, inputs.len()) {
            (_, 0) => Err(GraphError::configuration("graph update needs at least one input")),
            (_, 1) => Ok(LayerValue::Tensor(inputs.into_iter().next().ok_or_else(|| {
                GraphError::configuration("graph update needs at least one input")
            })?)),
            (Combiner::None, _) => Ok(LayerValue::Tuple(inputs)),
            (Combiner::Concatenate, _) => {
                let rank = inputs[0].rank();
                if let Some(other) = inputs.iter().find(|value| value.rank() != rank) {
                    return Err(GraphError::shape_mismatch(
                        "concatenated update inputs",
                        format!("rank {rank}"),
                        other.spec(),
                    ));
                }
                if rank == 0 {
                    return Err(GraphError::shape_mismatch(
                        "concatenated update inputs",
                        "rank >= 1",
                        "rank 0",
                    ));
                }
                functional::concat(&inputs, rank - 1).map(LayerValue::Tensor)
            }
        }
    }
}

/// Shared input -> combine -> next state -> write back pipeline.
struct Update {
    target: SetLocation,
    input_fns: Vec<InputFn>,
    combiner: Combiner,
    next_state: Box<dyn Layer>,
    output_feature: String,
}

impl Update {
    fn apply(&self, graph: &GraphTensor, layer_name: &str) -> GraphResult<GraphTensor> {
        let inputs = self
            .input_fns
            .iter()
            .map(|input_fn| input_fn.resolve(graph, &self.target))
            .collect::<GraphResult<Vec<_>>>()?;
        let combined = self.combiner.combine(inputs)?;
        let LayerValue::Tensor(state) = self.next_state.call(&combined)? else {
            return Err(GraphError::shape_mismatch(
                format!("next state of '{layer_name}'"),
                "a tensor",
                "another kind of value",
            ));
        };
        trace!(
            layer = layer_name,
            target = %self.target,
            feature = %self.output_feature,
            spec = %state.spec(),
            "graph update"
        );
        graph.replace_features(FeatureUpdates::at(&self.target, self.output_feature.clone(), state))
    }

    fn config(&self, name: &str, set_key: Option<(&str, &str)>) -> GraphResult<serde_json::Value> {
        let mut config = serde_json::Map::new();
        config.insert("name".into(), name.into());
        if let Some((key, set_name)) = set_key {
            config.insert(key.into(), set_name.into());
        }
        config.insert("input_fns".into(), serde_json::to_value(&self.input_fns)?);
        config.insert("combiner_fn".into(), serde_json::to_value(self.combiner)?);
        config.insert(
            "next_state".into(),
            serde_json::to_value(LayerConfig::of(self.next_state.as_ref())?)?,
        );
        config.insert("output_feature".into(), self.output_feature.clone().into());
        Ok(serde_json::Value::Object(config))
    }
}

fn default_feature() -> String {
    HIDDEN_STATE.to_string()
}

/// Serialized form shared by the three update layers.
#[derive(Deserialize)]
struct UpdateConfig {
    #[serde(default)]
    name: String,
    #[serde(default)]
    edge_set_name: Option<String>,
    #[serde(default)]
    node_set_name: Option<String>,
    input_fns: Vec<InputFn>,
    #[serde(default)]
    combiner_fn: Combiner,
    next_state: LayerConfig,
    #[serde(default = "default_feature")]
    output_feature: String,
}

impl UpdateConfig {
    fn parse(class_name: &str, config: &serde_json::Value) -> GraphResult<Self> {
        parse_config(class_name, config)
    }

    fn set_name(name: Option<String>, class_name: &str, key: &str) -> GraphResult<String> {
        name.ok_or_else(|| GraphError::configuration(format!("{class_name} config needs '{key}'")))
    }
}

macro_rules! update_layer_common {
    ($ty:ident) => {
        impl $ty {
            /// Replaces the combiner for multiple inputs.
            pub fn with_combiner(mut self, combiner: Combiner) -> Self {
                self.update.combiner = combiner;
                self
            }

            /// Replaces the feature the new state is written to.
            pub fn with_output_feature(mut self, feature: impl Into<String>) -> Self {
                self.update.output_feature = feature.into();
                self
            }

            pub fn with_name(mut self, name: impl Into<String>) -> Self {
                self.name = name.into();
                self
            }

            pub fn next_state(&self) -> &dyn Layer {
                self.update.next_state.as_ref()
            }

            pub fn output_feature(&self) -> &str {
                &self.update.output_feature
            }

            pub fn combiner(&self) -> Combiner {
                self.update.combiner
            }
        }

        impl Module for $ty {
            fn visit_params(&self, v: &mut ParamVisitor<'_>) -> GraphResult<()> {
                visit_sublayer(v, self.update.next_state.name(), self.update.next_state.as_ref())
            }

            fn visit_params_mut(&mut self, v: &mut ParamVisitorMut<'_>) -> GraphResult<()> {
                let segment = self.update.next_state.name().to_string();
                visit_sublayer_mut(v, &segment, self.update.next_state.as_mut())
            }
        }
    };
}

/// Computes a new feature for every edge of one edge set.
pub struct EdgeSetUpdate {
    name: String,
    update: Update,
}

impl EdgeSetUpdate {
    /// Concatenates the inputs and writes `hidden_state` unless configured otherwise.
    pub fn new(
        edge_set_name: impl Into<String>,
        input_fns: Vec<InputFn>,
        next_state: Box<dyn Layer>,
    ) -> Self {
        let edge_set_name = edge_set_name.into();
        EdgeSetUpdate {
            name: format!("edge_set_update_{edge_set_name}"),
            update: Update {
                target: SetLocation::EdgeSet(edge_set_name),
                input_fns,
                combiner: Combiner::default(),
                next_state,
                output_feature: default_feature(),
            },
        }
    }

    /// Applies the options for this edge set; unset fields keep their current value.
    pub fn with_options(mut self, options: &GraphUpdateOptions) -> Self {
        let resolved = options.edge_set_with_defaults(self.edge_set_name());
        if let Some(combiner) = resolved.update_combiner_fn {
            self.update.combiner = combiner;
        }
        if let Some(feature) = resolved.update_output_feature {
            self.update.output_feature = feature;
        }
        self
    }

    pub fn edge_set_name(&self) -> &str {
        match &self.update.target {
            SetLocation::EdgeSet(name) => name,
            _ => "",
        }
    }

    pub fn from_config(
        config: &serde_json::Value,
        registry: &LayerRegistry,
    ) -> GraphResult<Box<dyn Layer>> {
        let parsed = UpdateConfig::parse("EdgeSetUpdate", config)?;
        let edge_set_name = UpdateConfig::set_name(parsed.edge_set_name, "EdgeSetUpdate", "edge_set_name")?;
        let next_state = registry.build(&parsed.next_state)?;
        let mut layer = EdgeSetUpdate::new(edge_set_name, parsed.input_fns, next_state)
            .with_combiner(parsed.combiner_fn)
            .with_output_feature(parsed.output_feature);
        if !parsed.name.is_empty() {
            layer.name = parsed.name;
        }
        Ok(Box::new(layer))
    }
}

update_layer_common!(EdgeSetUpdate);

impl Layer for EdgeSetUpdate {
    fn class_name(&self) -> &str {
        "EdgeSetUpdate"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, input: &LayerValue) -> GraphResult<LayerValue> {
        let graph = input.as_graph("EdgeSetUpdate input")?;
        self.update.apply(graph, &self.name).map(LayerValue::Graph)
    }

    fn get_config(&self) -> GraphResult<serde_json::Value> {
        self.update
            .config(&self.name, Some(("edge_set_name", self.edge_set_name())))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Computes a new feature for every node of one node set.
pub struct NodeSetUpdate {
    name: String,
    update: Update,
}

impl NodeSetUpdate {
    pub fn new(
        node_set_name: impl Into<String>,
        input_fns: Vec<InputFn>,
        next_state: Box<dyn Layer>,
    ) -> Self {
        let node_set_name = node_set_name.into();
        NodeSetUpdate {
            name: format!("node_set_update_{node_set_name}"),
            update: Update {
                target: SetLocation::NodeSet(node_set_name),
                input_fns,
                combiner: Combiner::default(),
                next_state,
                output_feature: default_feature(),
            },
        }
    }

    pub fn with_options(mut self, options: &GraphUpdateOptions) -> Self {
        let resolved = options.node_set_with_defaults(self.node_set_name());
        if let Some(combiner) = resolved.update_combiner_fn {
            self.update.combiner = combiner;
        }
        if let Some(feature) = resolved.update_output_feature {
            self.update.output_feature = feature;
        }
        self
    }

    pub fn node_set_name(&self) -> &str {
        match &self.update.target {
            SetLocation::NodeSet(name) => name,
            _ => "",
        }
    }

    pub fn from_config(
        config: &serde_json::Value,
        registry: &LayerRegistry,
    ) -> GraphResult<Box<dyn Layer>> {
        let parsed = UpdateConfig::parse("NodeSetUpdate", config)?;
        let node_set_name = UpdateConfig::set_name(parsed.node_set_name, "NodeSetUpdate", "node_set_name")?;
        let next_state = registry.build(&parsed.next_state)?;
        let mut layer = NodeSetUpdate::new(node_set_name, parsed.input_fns, next_state)
            .with_combiner(parsed.combiner_fn)
            .with_output_feature(parsed.output_feature);
        if !parsed.name.is_empty() {
            layer.name = parsed.name;
        }
        Ok(Box::new(layer))
    }
}

update_layer_common!(NodeSetUpdate);

impl Layer for NodeSetUpdate {
    fn class_name(&self) -> &str {
        "NodeSetUpdate"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, input: &LayerValue) -> GraphResult<LayerValue> {
        let graph = input.as_graph("NodeSetUpdate input")?;
        self.update.apply(graph, &self.name).map(LayerValue::Graph)
    }

    fn get_config(&self) -> GraphResult<serde_json::Value> {
        self.update
            .config(&self.name, Some(("node_set_name", self.node_set_name())))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Computes a new context feature for every graph component.
pub struct ContextUpdate {
    name: String,
    update: Update,
}

impl ContextUpdate {
    pub fn new(input_fns: Vec<InputFn>, next_state: Box<dyn Layer>) -> Self {
        ContextUpdate {
            name: "context_update".to_string(),
            update: Update {
                target: SetLocation::Context,
                input_fns,
                combiner: Combiner::default(),
                next_state,
                output_feature: default_feature(),
            },
        }
    }

    pub fn with_options(mut self, options: &GraphUpdateOptions) -> Self {
        if let Some(combiner) = options.context.update_combiner_fn {
            self.update.combiner = combiner;
        }
        if let Some(feature) = &options.context.update_output_feature {
            self.update.output_feature = feature.clone();
        }
        self
    }

    pub fn from_config(
        config: &serde_json::Value,
        registry: &LayerRegistry,
    ) -> GraphResult<Box<dyn Layer>> {
        let parsed = UpdateConfig::parse("ContextUpdate", config)?;
        let next_state = registry.build(&parsed.next_state)?;
        let mut layer = ContextUpdate::new(parsed.input_fns, next_state)
            .with_combiner(parsed.combiner_fn)
            .with_output_feature(parsed.output_feature);
        if !parsed.name.is_empty() {
            layer.name = parsed.name;
        }
        Ok(Box::new(layer))
    }
}

update_layer_common!(ContextUpdate);

impl Layer for ContextUpdate {
    fn class_name(&self) -> &str {
        "ContextUpdate"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, input: &LayerValue) -> GraphResult<LayerValue> {
        let graph = input.as_graph("ContextUpdate input")?;
        self.update.apply(graph, &self.name).map(LayerValue::Graph)
    }

    fn get_config(&self) -> GraphResult<serde_json::Value> {
        self.update.config(&self.name, None)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
