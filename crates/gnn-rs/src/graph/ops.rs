//! Broadcast and pool operations between nodes, edges, and the context.
//!
//! Each operator takes either a feature name, read from the source piece, or an
//! explicit value whose leading dimension must match the source item count.

use super::adjacency::IncidentNodeTag;
use super::graph_tensor::GraphTensor;
use crate::error::{GraphError, GraphResult};
use crate::ops::{functional, ReduceKind};
use crate::tensor::{Dimension, Value};

/// Source data of a broadcast or pool.
#[derive(Debug, Clone, Copy)]
pub enum Feature<'a> {
    Name(&'a str),
    Value(&'a Value),
}

impl<'a> From<&'a str> for Feature<'a> {
    fn from(name: &'a str) -> Self {
        Feature::Name(name)
    }
}

impl<'a> From<&'a String> for Feature<'a> {
    fn from(name: &'a String) -> Self {
        Feature::Name(name)
    }
}

impl<'a> From<&'a Value> for Feature<'a> {
    fn from(value: &'a Value) -> Self {
        Feature::Value(value)
    }
}

fn resolve<'a>(
    feature: Feature<'a>,
    context: &str,
    items: Dimension,
    by_name: impl FnOnce(&str) -> GraphResult<&'a Value>,
) -> GraphResult<&'a Value> {
    let value = match feature {
        Feature::Name(name) => by_name(name)?,
        Feature::Value(value) => value,
    };
    let leading = value
        .leading()
        .ok_or_else(|| GraphError::shape_mismatch(context, "rank >= 1", value.spec()))?;
    if !items.is_compatible_with(leading) {
        return Err(GraphError::shape_mismatch(
            context,
            format!("{items} items"),
            format!("{leading} items"),
        ));
    }
    Ok(value)
}

/// For each edge, the value of its endpoint `tag` node.
pub fn broadcast_node_to_edges<'a>(
    graph: &'a GraphTensor,
    edge_set_name: &str,
    tag: IncidentNodeTag,
    feature: impl Into<Feature<'a>>,
) -> GraphResult<Value> {
    let adjacency = graph.edge_set(edge_set_name)?.adjacency();
    let node_set = graph.node_set(adjacency.node_set_name(tag)?)?;
    let value = resolve(
        feature.into(),
        &format!("broadcast from node set '{}'", node_set.name()),
        node_set.num_items(),
        |name| node_set.feature(name),
    )?;
    functional::gather(value, adjacency.indices(tag)?)
}

/// For each node of the `tag` endpoint set, the reduction of its incident edges' values.
///
/// Nodes without incident edges receive zero.
pub fn pool_edges_to_node<'a>(
    graph: &'a GraphTensor,
    edge_set_name: &str,
    tag: IncidentNodeTag,
    reduce: ReduceKind,
    feature: impl Into<Feature<'a>>,
) -> GraphResult<Value> {
    let edge_set = graph.edge_set(edge_set_name)?;
    let adjacency = edge_set.adjacency();
    let node_set = graph.node_set(adjacency.node_set_name(tag)?)?;
    let value = resolve(
        feature.into(),
        &format!("pool from edge set '{edge_set_name}'"),
        edge_set.num_items(),
        |name| edge_set.feature(name),
    )?;
    let num_nodes = node_set.total_size()?;
    functional::segment_reduce(value, adjacency.indices(tag)?, &num_nodes, reduce)
}

/// For each node, the value of its graph component's context.
pub fn broadcast_context_to_nodes<'a>(
    graph: &'a GraphTensor,
    node_set_name: &str,
    feature: impl Into<Feature<'a>>,
) -> GraphResult<Value> {
    let node_set = graph.node_set(node_set_name)?;
    broadcast_context(graph, node_set.sizes(), feature.into())
}

/// For each edge, the value of its graph component's context.
pub fn broadcast_context_to_edges<'a>(
    graph: &'a GraphTensor,
    edge_set_name: &str,
    feature: impl Into<Feature<'a>>,
) -> GraphResult<Value> {
    let edge_set = graph.edge_set(edge_set_name)?;
    broadcast_context(graph, edge_set.sizes(), feature.into())
}

fn broadcast_context<'a>(
    graph: &'a GraphTensor,
    sizes: &Value,
    feature: Feature<'a>,
) -> GraphResult<Value> {
    let value = resolve(
        feature,
        "broadcast from context",
        graph.num_components(),
        |name| graph.context().feature(name),
    )?;
    let components = functional::row_ids(sizes)?;
    functional::gather(value, &components)
}

/// For each graph component, the reduction over its nodes.
pub fn pool_nodes_to_context<'a>(
    graph: &'a GraphTensor,
    node_set_name: &str,
    reduce: ReduceKind,
    feature: impl Into<Feature<'a>>,
) -> GraphResult<Value> {
    let node_set = graph.node_set(node_set_name)?;
    let value = resolve(
        feature.into(),
        &format!("pool from node set '{node_set_name}'"),
        node_set.num_items(),
        |name| node_set.feature(name),
    )?;
    pool_to_context(value, node_set.sizes(), reduce)
}

/// For each graph component, the reduction over its edges.
pub fn pool_edges_to_context<'a>(
    graph: &'a GraphTensor,
    edge_set_name: &str,
    reduce: ReduceKind,
    feature: impl Into<Feature<'a>>,
) -> GraphResult<Value> {
    let edge_set = graph.edge_set(edge_set_name)?;
    let value = resolve(
        feature.into(),
        &format!("pool from edge set '{edge_set_name}'"),
        edge_set.num_items(),
        |name| edge_set.feature(name),
    )?;
    pool_to_context(value, edge_set.sizes(), reduce)
}

fn pool_to_context(value: &Value, sizes: &Value, reduce: ReduceKind) -> GraphResult<Value> {
    let components = functional::row_ids(sizes)?;
    let num_components = functional::dim(sizes, 0)?;
    functional::segment_reduce(value, &components, &num_components, reduce)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{fields, Adjacency, Context, EdgeSet, NodeSet, SOURCE, TARGET};
    use crate::tensor::Tensor;

    /// Two components: nodes [a0, a1 | b0], edges a0->a1, a1->a0 | none.
    fn batched_graph() -> GraphTensor {
        let nodes = NodeSet::from_fields(
            [("hidden_state", Tensor::from_vec([3, 1], vec![1.0, 2.0, 4.0]).unwrap())],
            Tensor::vector_i32(vec![2, 1]),
        )
        .unwrap();
        let adjacency = Adjacency::source_target(
            ("node", Tensor::vector_i32(vec![0, 1])),
            ("node", Tensor::vector_i32(vec![1, 1])),
        )
        .unwrap();
        let edges = EdgeSet::from_fields(
            [("weight", Tensor::from_vec([2, 1], vec![0.5, 3.0]).unwrap())],
            Tensor::vector_i32(vec![2, 0]),
            adjacency,
        )
        .unwrap();
        let context = Context::from_fields(fields([(
            "label",
            Tensor::from_vec([2, 1], vec![10.0, 20.0]).unwrap(),
        )]))
        .unwrap();
        GraphTensor::from_pieces(Some(context), [("node", nodes)], [("edge", edges)]).unwrap()
    }

    fn values(value: Value) -> Vec<f32> {
        value.into_tensor().unwrap().to_f32_vec().unwrap()
    }

    #[test]
    fn broadcast_source_state_to_edges() {
        let graph = batched_graph();
        let out = broadcast_node_to_edges(&graph, "edge", SOURCE, "hidden_state").unwrap();
        assert_eq!(values(out), vec![1.0, 2.0]);
    }

    #[test]
    fn pool_to_target_zero_fills_isolated_nodes() {
        let graph = batched_graph();
        let out = pool_edges_to_node(&graph, "edge", TARGET, ReduceKind::Sum, "weight").unwrap();
        assert_eq!(values(out), vec![0.0, 3.5, 0.0]);
        let max = pool_edges_to_node(&graph, "edge", TARGET, ReduceKind::Max, "weight").unwrap();
        assert_eq!(values(max), vec![0.0, 3.0, 0.0]);
    }

    #[test]
    fn context_round_trip_per_component() {
        let graph = batched_graph();
        let spread = broadcast_context_to_nodes(&graph, "node", "label").unwrap();
        assert_eq!(values(spread), vec![10.0, 10.0, 20.0]);
        let pooled = pool_nodes_to_context(&graph, "node", ReduceKind::Mean, "hidden_state").unwrap();
        assert_eq!(values(pooled), vec![1.5, 4.0]);
        let edges = pool_edges_to_context(&graph, "edge", ReduceKind::Sum, "weight").unwrap();
        assert_eq!(values(edges), vec![3.5, 0.0]);
        let per_edge = broadcast_context_to_edges(&graph, "edge", "label").unwrap();
        assert_eq!(values(per_edge), vec![10.0, 10.0]);
    }

    #[test]
    fn explicit_value_must_match_item_count() {
        let graph = batched_graph();
        let wrong = Value::from(Tensor::zeros([2, 1]));
        let err = broadcast_node_to_edges(&graph, "edge", SOURCE, &wrong).unwrap_err();
        assert!(matches!(err, GraphError::ShapeMismatch { .. }));
    }

    #[test]
    fn missing_feature_is_reported() {
        let graph = batched_graph();
        let err = pool_edges_to_node(&graph, "edge", TARGET, ReduceKind::Sum, "nope").unwrap_err();
        assert!(matches!(err, GraphError::FeatureNotFound { .. }));
    }
}
