//! Heterogeneous graph tensors, their specs, and structural operators.

mod adjacency;
mod graph_tensor;
pub mod ops;
mod spec;

pub use adjacency::{Adjacency, Incident, IncidentNodeOrContextTag, IncidentNodeTag, SOURCE, TARGET};
pub use graph_tensor::{
    fields, Context, EdgeSet, FeatureUpdates, Fields, GraphTensor, NodeSet, SetLocation,
};
pub use ops::{
    broadcast_context_to_edges, broadcast_context_to_nodes, broadcast_node_to_edges,
    pool_edges_to_context, pool_edges_to_node, pool_nodes_to_context, Feature,
};
pub use spec::{ContextSpec, EdgeSetSpec, FeatureSpecs, GraphTensorSpec, IncidentSpec, NodeSetSpec};

/// Feature name conventionally holding the evolving state of nodes, edges, or context.
pub const HIDDEN_STATE: &str = "hidden_state";
