//! Default settings for graph update layers, with per-set overrides.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::graph_update::Combiner;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphUpdateEdgeSetOptions {
    #[serde(default)]
    pub update_combiner_fn: Option<Combiner>,
    #[serde(default)]
    pub update_output_feature: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphUpdateNodeSetOptions {
    #[serde(default)]
    pub update_combiner_fn: Option<Combiner>,
    #[serde(default)]
    pub update_output_feature: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphUpdateContextOptions {
    #[serde(default)]
    pub update_combiner_fn: Option<Combiner>,
    #[serde(default)]
    pub update_output_feature: Option<String>,
}

/// Options for a whole round of graph updates.
///
/// Per-set entries override the defaults field by field; unset fields fall back
/// to the layer's own defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphUpdateOptions {
    #[serde(default)]
    pub edge_set_default: GraphUpdateEdgeSetOptions,
    #[serde(default)]
    pub node_set_default: GraphUpdateNodeSetOptions,
    #[serde(default)]
    pub context: GraphUpdateContextOptions,
    #[serde(default)]
    pub edge_sets: BTreeMap<String, GraphUpdateEdgeSetOptions>,
    #[serde(default)]
    pub node_sets: BTreeMap<String, GraphUpdateNodeSetOptions>,
}

impl GraphUpdateOptions {
    pub fn with_edge_set(mut self, name: impl Into<String>, options: GraphUpdateEdgeSetOptions) -> Self {
        self.edge_sets.insert(name.into(), options);
        self
    }

    pub fn with_node_set(mut self, name: impl Into<String>, options: GraphUpdateNodeSetOptions) -> Self {
        self.node_sets.insert(name.into(), options);
        self
    }

    /// Options for `edge_set_name`, with unset fields taken from the defaults.
    pub fn edge_set_with_defaults(&self, edge_set_name: &str) -> GraphUpdateEdgeSetOptions {
        let defaults = &self.edge_set_default;
        match self.edge_sets.get(edge_set_name) {
            Some(specific) => GraphUpdateEdgeSetOptions {
                update_combiner_fn: specific.update_combiner_fn.or(defaults.update_combiner_fn),
                update_output_feature: specific
                    .update_output_feature
                    .clone()
                    .or_else(|| defaults.update_output_feature.clone()),
            },
            None => defaults.clone(),
        }
    }

    pub fn node_set_with_defaults(&self, node_set_name: &str) -> GraphUpdateNodeSetOptions {
        let defaults = &self.node_set_default;
        match self.node_sets.get(node_set_name) {
            Some(specific) => GraphUpdateNodeSetOptions {
                update_combiner_fn: specific.update_combiner_fn.or(defaults.update_combiner_fn),
                update_output_feature: specific
                    .update_output_feature
                    .clone()
                    .or_else(|| defaults.update_output_feature.clone()),
            },
            None => defaults.clone(),
        }
    }
}
