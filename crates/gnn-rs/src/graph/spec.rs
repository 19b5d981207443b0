//! Type/shape descriptors for whole graph tensors.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::adjacency::{Adjacency, IncidentNodeTag};
use super::graph_tensor::{Context, EdgeSet, Fields, GraphTensor, NodeSet};
use crate::error::{GraphError, GraphResult};
use crate::tensor::{Dimension, SymbolicTensor, TensorSpec, Value};

pub type FeatureSpecs = BTreeMap<String, TensorSpec>;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContextSpec {
    pub features: FeatureSpecs,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSetSpec {
    pub sizes: TensorSpec,
    pub features: FeatureSpecs,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentSpec {
    pub node_set_name: String,
    pub indices: TensorSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeSetSpec {
    pub sizes: TensorSpec,
    pub adjacency: BTreeMap<IncidentNodeTag, IncidentSpec>,
    pub features: FeatureSpecs,
}

/// Describes every tensor of a graph: piece names, feature names, dtypes, and shapes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GraphTensorSpec {
    pub context: ContextSpec,
    pub node_sets: BTreeMap<String, NodeSetSpec>,
    pub edge_sets: BTreeMap<String, EdgeSetSpec>,
}

/// Role of a leaf tensor inside a graph, used when relaxing specs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Leaf {
    Sizes,
    Indices,
    ItemFeature,
    ContextFeature,
}

fn feature_specs(fields: &Fields) -> FeatureSpecs {
    fields
        .iter()
        .map(|(name, value)| (name.clone(), value.spec()))
        .collect()
}

fn check_keys<A, B>(path: &str, expected: &BTreeMap<String, A>, actual: &BTreeMap<String, B>) -> GraphResult<()> {
    if expected.keys().eq(actual.keys()) {
        return Ok(());
    }
    let names = |keys: Vec<&String>| {
        format!(
            "[{}]",
            keys.into_iter().map(String::as_str).collect::<Vec<_>>().join(", ")
        )
    };
    Err(GraphError::spec_mismatch(
        path,
        names(expected.keys().collect()),
        names(actual.keys().collect()),
    ))
}

/// Pairs two structurally equal specs leaf by leaf.
fn zip_features(
    path: &str,
    a: &FeatureSpecs,
    b: &FeatureSpecs,
    f: &mut dyn FnMut(&str, &TensorSpec, &TensorSpec) -> GraphResult<TensorSpec>,
) -> GraphResult<FeatureSpecs> {
    check_keys(path, a, b)?;
    a.iter()
        .zip(b.values())
        .map(|((name, a), b)| Ok((name.clone(), f(&format!("{path}['{name}']"), a, b)?)))
        .collect()
}

fn map_features(features: &FeatureSpecs, f: &mut dyn FnMut(&TensorSpec) -> TensorSpec) -> FeatureSpecs {
    features
        .iter()
        .map(|(name, spec)| (name.clone(), f(spec)))
        .collect()
}

impl GraphTensorSpec {
    pub fn of(graph: &GraphTensor) -> Self {
        GraphTensorSpec {
            context: ContextSpec {
                features: feature_specs(graph.context().features()),
            },
            node_sets: graph
                .node_sets()
                .iter()
                .map(|(name, set)| {
                    let spec = NodeSetSpec {
                        sizes: set.sizes().spec(),
                        features: feature_specs(set.features()),
                    };
                    (name.clone(), spec)
                })
                .collect(),
            edge_sets: graph
                .edge_sets()
                .iter()
                .map(|(name, set)| {
                    let adjacency = set
                        .adjacency()
                        .iter()
                        .map(|(tag, incident)| {
                            let spec = IncidentSpec {
                                node_set_name: incident.node_set_name.clone(),
                                indices: incident.indices.spec(),
                            };
                            (tag, spec)
                        })
                        .collect();
                    let spec = EdgeSetSpec {
                        sizes: set.sizes().spec(),
                        adjacency,
                        features: feature_specs(set.features()),
                    };
                    (name.clone(), spec)
                })
                .collect(),
        }
    }

    pub fn node_set(&self, name: &str) -> GraphResult<&NodeSetSpec> {
        self.node_sets
            .get(name)
            .ok_or_else(|| GraphError::configuration(format!("no node set named '{name}' in graph spec")))
    }

    pub fn edge_set(&self, name: &str) -> GraphResult<&EdgeSetSpec> {
        self.edge_sets
            .get(name)
            .ok_or_else(|| GraphError::configuration(format!("no edge set named '{name}' in graph spec")))
    }

    fn zip(
        &self,
        other: &GraphTensorSpec,
        f: &mut dyn FnMut(&str, &TensorSpec, &TensorSpec) -> GraphResult<TensorSpec>,
    ) -> GraphResult<GraphTensorSpec> {
        let context = ContextSpec {
            features: zip_features("context", &self.context.features, &other.context.features, f)?,
        };
        check_keys("node_sets", &self.node_sets, &other.node_sets)?;
        let mut node_sets = BTreeMap::new();
        for ((name, a), b) in self.node_sets.iter().zip(other.node_sets.values()) {
            let path = format!("node_sets['{name}']");
            let spec = NodeSetSpec {
                sizes: f(&format!("{path}.sizes"), &a.sizes, &b.sizes)?,
                features: zip_features(&path, &a.features, &b.features, f)?,
            };
            node_sets.insert(name.clone(), spec);
        }
        check_keys("edge_sets", &self.edge_sets, &other.edge_sets)?;
        let mut edge_sets = BTreeMap::new();
        for ((name, a), b) in self.edge_sets.iter().zip(other.edge_sets.values()) {
            let path = format!("edge_sets['{name}']");
            let tags = |spec: &EdgeSetSpec| {
                spec.adjacency
                    .iter()
                    .map(|(tag, incident)| format!("{tag}:{}", incident.node_set_name))
                    .collect::<Vec<_>>()
            };
            if tags(a) != tags(b) {
                return Err(GraphError::spec_mismatch(
                    format!("{path}.adjacency"),
                    tags(a).join(", "),
                    tags(b).join(", "),
                ));
            }
            let mut adjacency = BTreeMap::new();
            for ((tag, x), y) in a.adjacency.iter().zip(b.adjacency.values()) {
                let spec = IncidentSpec {
                    node_set_name: x.node_set_name.clone(),
                    indices: f(&format!("{path}.adjacency[{tag}]"), &x.indices, &y.indices)?,
                };
                adjacency.insert(*tag, spec);
            }
            let spec = EdgeSetSpec {
                sizes: f(&format!("{path}.sizes"), &a.sizes, &b.sizes)?,
                adjacency,
                features: zip_features(&path, &a.features, &b.features, f)?,
            };
            edge_sets.insert(name.clone(), spec);
        }
        Ok(GraphTensorSpec {
            context,
            node_sets,
            edge_sets,
        })
    }

    fn map_leaves(&self, f: &mut dyn FnMut(Leaf, &TensorSpec) -> TensorSpec) -> GraphTensorSpec {
        GraphTensorSpec {
            context: ContextSpec {
                features: map_features(&self.context.features, &mut |s| f(Leaf::ContextFeature, s)),
            },
            node_sets: self
                .node_sets
                .iter()
                .map(|(name, set)| {
                    let spec = NodeSetSpec {
                        sizes: f(Leaf::Sizes, &set.sizes),
                        features: map_features(&set.features, &mut |s| f(Leaf::ItemFeature, s)),
                    };
                    (name.clone(), spec)
                })
                .collect(),
            edge_sets: self
                .edge_sets
                .iter()
                .map(|(name, set)| {
                    let sizes = f(Leaf::Sizes, &set.sizes);
                    let adjacency = set
                        .adjacency
                        .iter()
                        .map(|(tag, incident)| {
                            let spec = IncidentSpec {
                                node_set_name: incident.node_set_name.clone(),
                                indices: f(Leaf::Indices, &incident.indices),
                            };
                            (*tag, spec)
                        })
                        .collect();
                    let spec = EdgeSetSpec {
                        sizes,
                        adjacency,
                        features: map_features(&set.features, &mut |s| f(Leaf::ItemFeature, s)),
                    };
                    (name.clone(), spec)
                })
                .collect(),
        }
    }

    /// Fails with the path of the first tensor of `graph` that does not satisfy this spec.
    pub fn check(&self, graph: &GraphTensor) -> GraphResult<()> {
        self.check_spec(&graph.spec())
    }

    /// Like [`check`](Self::check) but against another spec, e.g. a traced input.
    pub fn check_spec(&self, actual: &GraphTensorSpec) -> GraphResult<()> {
        self.zip(actual, &mut |path, expected, actual| {
            if expected.is_compatible_with(actual) {
                Ok(expected.clone())
            } else {
                Err(GraphError::spec_mismatch(path, expected, actual))
            }
        })
        .map(|_| ())
    }

    pub fn is_compatible_with(&self, other: &GraphTensorSpec) -> bool {
        self.check_spec(other).is_ok()
    }

    /// The most specific spec satisfied by graphs of both specs.
    ///
    /// Dimensions that disagree become dynamic; differing structure or dtypes fail.
    pub fn most_specific_common(&self, other: &GraphTensorSpec) -> GraphResult<GraphTensorSpec> {
        self.zip(other, &mut |path, a, b| {
            a.most_specific_common(b)
                .ok_or_else(|| GraphError::spec_mismatch(path, a, b))
        })
    }

    /// Makes node, edge, and index counts dynamic.
    pub fn relax_item_counts(&self) -> GraphTensorSpec {
        self.map_leaves(&mut |leaf, spec| match leaf {
            Leaf::Indices | Leaf::ItemFeature => spec.with_leading(Dimension::Dynamic),
            Leaf::Sizes | Leaf::ContextFeature => spec.clone(),
        })
    }

    /// Makes the number of graph components dynamic.
    pub fn relax_num_components(&self) -> GraphTensorSpec {
        self.map_leaves(&mut |leaf, spec| match leaf {
            Leaf::Sizes | Leaf::ContextFeature => spec.with_leading(Dimension::Dynamic),
            Leaf::Indices | Leaf::ItemFeature => spec.clone(),
        })
    }

    /// Leaf specs in the order of [`GraphTensor::flatten`].
    pub fn flat_specs(&self) -> Vec<TensorSpec> {
        let mut specs = Vec::new();
        self.map_leaves(&mut |_, spec| {
            specs.push(spec.clone());
            spec.clone()
        });
        specs
    }

    pub fn num_leaves(&self) -> usize {
        self.flat_specs().len()
    }

    /// Rebuilds a graph from values in [`GraphTensor::flatten`] order.
    pub fn unflatten(&self, values: &mut dyn Iterator<Item = Value>) -> GraphResult<GraphTensor> {
        let mut next = |path: String| {
            values
                .next()
                .ok_or_else(|| GraphError::spec_mismatch(path, "a flattened tensor", "end of inputs"))
        };
        let mut context = Fields::new();
        for name in self.context.features.keys() {
            context.insert(name.clone(), next(format!("context['{name}']"))?);
        }
        let mut node_sets = BTreeMap::new();
        for (set_name, spec) in &self.node_sets {
            let sizes = next(format!("node_sets['{set_name}'].sizes"))?;
            let mut features = Fields::new();
            for name in spec.features.keys() {
                features.insert(name.clone(), next(format!("node_sets['{set_name}']['{name}']"))?);
            }
            node_sets.insert(set_name.clone(), NodeSet::named(set_name.clone(), features, sizes)?);
        }
        let mut edge_sets = BTreeMap::new();
        for (set_name, spec) in &self.edge_sets {
            let sizes = next(format!("edge_sets['{set_name}'].sizes"))?;
            let mut indices = Vec::new();
            for (tag, incident) in &spec.adjacency {
                let values = next(format!("edge_sets['{set_name}'].adjacency[{tag}]"))?;
                indices.push((*tag, (incident.node_set_name.clone(), values)));
            }
            let adjacency = Adjacency::from_indices(indices)?;
            let mut features = Fields::new();
            for name in spec.features.keys() {
                features.insert(name.clone(), next(format!("edge_sets['{set_name}']['{name}']"))?);
            }
            edge_sets.insert(
                set_name.clone(),
                EdgeSet::named(set_name.clone(), features, sizes, adjacency)?,
            );
        }
        GraphTensor::from_pieces(Some(Context::from_fields(context)?), node_sets, edge_sets)
    }

    /// Symbolic graph whose leaves are program inputs `first_index..`.
    pub fn placeholders(&self, first_index: usize) -> GraphResult<GraphTensor> {
        let mut values = self
            .flat_specs()
            .into_iter()
            .enumerate()
            .map(|(offset, spec)| Value::Symbolic(SymbolicTensor::placeholder(first_index + offset, spec)));
        self.unflatten(&mut values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Adjacency;
    use crate::tensor::{DType, Tensor};

    fn graph(num_nodes: usize, weights: Vec<f32>) -> GraphTensor {
        let num_edges = weights.len();
        let nodes = NodeSet::from_fields(
            [("hidden_state", Tensor::zeros([num_nodes, 2]))],
            Tensor::vector_i32(vec![num_nodes as i32]),
        )
        .unwrap();
        let adjacency = Adjacency::source_target(
            ("node", Tensor::vector_i32(vec![0; num_edges])),
            ("node", Tensor::vector_i32(vec![0; num_edges])),
        )
        .unwrap();
        let edges = EdgeSet::from_fields(
            [("edge_weight", Tensor::from_vec([num_edges, 1], weights).unwrap())],
            Tensor::vector_i32(vec![num_edges as i32]),
            adjacency,
        )
        .unwrap();
        GraphTensor::from_pieces(None, [("node", nodes)], [("edge", edges)]).unwrap()
    }

    #[test]
    fn most_specific_common_relaxes_item_counts() {
        let a = graph(2, vec![0.5, -0.5]).spec();
        let b = graph(3, vec![1.0]).spec();
        let common = a.most_specific_common(&b).unwrap();
        let weight = &common.edge_set("edge").unwrap().features["edge_weight"];
        assert_eq!(weight.to_string(), "f32[?, 1]");
        assert_eq!(common.node_set("node").unwrap().sizes.to_string(), "i32[1]");
    }

    #[test]
    fn check_reports_path_of_mismatch() {
        let spec = graph(2, vec![0.5, -0.5]).spec();
        let err = spec.check(&graph(3, vec![0.5, -0.5])).unwrap_err();
        match err {
            GraphError::SpecMismatch { path, .. } => {
                assert_eq!(path, "node_sets['node']['hidden_state']")
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(spec.relax_item_counts().check(&graph(3, vec![1.0])).is_ok());
    }

    #[test]
    fn structure_mismatch_is_rejected() {
        let a = graph(2, vec![0.5]).spec();
        let mut b = a.clone();
        b.context
            .features
            .insert("label".into(), TensorSpec::from_static(DType::F32, &[1]));
        assert!(a.most_specific_common(&b).is_err());
    }

    #[test]
    fn unflatten_inverts_flatten() {
        let g = graph(2, vec![0.5, -0.5]);
        let rebuilt = g.spec().unflatten(&mut g.flatten().into_iter()).unwrap();
        assert_eq!(rebuilt, g);
    }

    #[test]
    fn placeholders_carry_the_spec() {
        let spec = graph(2, vec![0.5, -0.5]).spec().relax_item_counts();
        let symbolic = spec.placeholders(0).unwrap();
        assert_eq!(symbolic.spec(), spec);
        assert!(symbolic.flatten().iter().all(Value::is_symbolic));
    }
}
