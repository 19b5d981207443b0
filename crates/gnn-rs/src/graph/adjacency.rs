//! Edge endpoint indices, keyed by incident-node tag.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{GraphError, GraphResult};
use crate::tensor::{DType, Dimension, Value};

/// Names an endpoint role of an edge.
pub type IncidentNodeTag = u8;

pub const SOURCE: IncidentNodeTag = 0;
pub const TARGET: IncidentNodeTag = 1;

/// Either an incident node of an edge or the graph context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentNodeOrContextTag {
    Node(IncidentNodeTag),
    Context,
}

impl IncidentNodeOrContextTag {
    pub const SOURCE: Self = IncidentNodeOrContextTag::Node(SOURCE);
    pub const TARGET: Self = IncidentNodeOrContextTag::Node(TARGET);
}

impl fmt::Display for IncidentNodeOrContextTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IncidentNodeOrContextTag::Node(SOURCE) => f.write_str("SOURCE"),
            IncidentNodeOrContextTag::Node(TARGET) => f.write_str("TARGET"),
            IncidentNodeOrContextTag::Node(tag) => write!(f, "node tag {tag}"),
            IncidentNodeOrContextTag::Context => f.write_str("CONTEXT"),
        }
    }
}

/// Indices into one node set for a single endpoint role.
#[derive(Debug, Clone, PartialEq)]
pub struct Incident {
    pub node_set_name: String,
    pub indices: Value,
}

/// Maps each incident-node tag to `(node set name, rank-1 i32 indices)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Adjacency {
    incidents: Arc<BTreeMap<IncidentNodeTag, Incident>>,
}

impl Adjacency {
    /// Builds an adjacency from per-tag node set names and index vectors.
    ///
    /// Every index vector must be rank-1 `i32` and all of them must have the same length.
    pub fn from_indices<N, V>(
        indices: impl IntoIterator<Item = (IncidentNodeTag, (N, V))>,
    ) -> GraphResult<Self>
    where
        N: Into<String>,
        V: Into<Value>,
    {
        let mut incidents = BTreeMap::new();
        let mut length = Dimension::Dynamic;
        for (tag, (node_set_name, values)) in indices {
            let values = values.into();
            let spec = values.spec();
            if spec.dtype != DType::I32 || spec.rank() != 1 {
                return Err(GraphError::shape_mismatch(
                    format!("adjacency indices for tag {tag}"),
                    "i32[?]",
                    &spec,
                ));
            }
            if !length.is_compatible_with(spec.dims[0]) {
                return Err(GraphError::shape_mismatch(
                    "adjacency",
                    format!("{length} indices for every tag"),
                    format!("{} indices for tag {tag}", spec.dims[0]),
                ));
            }
            length = length.refine(spec.dims[0]);
            incidents.insert(
                tag,
                Incident {
                    node_set_name: node_set_name.into(),
                    indices: values,
                },
            );
        }
        if incidents.is_empty() {
            return Err(GraphError::configuration("adjacency needs at least one incident node tag"));
        }
        Ok(Adjacency {
            incidents: Arc::new(incidents),
        })
    }

    /// Shorthand for the common `SOURCE`/`TARGET` adjacency.
    pub fn source_target(
        source: (impl Into<String>, impl Into<Value>),
        target: (impl Into<String>, impl Into<Value>),
    ) -> GraphResult<Self> {
        let source: (String, Value) = (source.0.into(), source.1.into());
        let target: (String, Value) = (target.0.into(), target.1.into());
        Adjacency::from_indices([(SOURCE, source), (TARGET, target)])
    }

    fn incident(&self, tag: IncidentNodeTag) -> GraphResult<&Incident> {
        self.incidents
            .get(&tag)
            .ok_or_else(|| GraphError::feature_not_found("adjacency", format!("incident node tag {tag}")))
    }

    pub fn indices(&self, tag: IncidentNodeTag) -> GraphResult<&Value> {
        self.incident(tag).map(|incident| &incident.indices)
    }

    pub fn node_set_name(&self, tag: IncidentNodeTag) -> GraphResult<&str> {
        self.incident(tag).map(|incident| incident.node_set_name.as_str())
    }

    pub fn tags(&self) -> impl Iterator<Item = IncidentNodeTag> + '_ {
        self.incidents.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (IncidentNodeTag, &Incident)> + '_ {
        self.incidents.iter().map(|(tag, incident)| (*tag, incident))
    }

    /// Number of edges described, when known.
    pub fn num_items(&self) -> Dimension {
        self.incidents
            .values()
            .filter_map(|incident| incident.indices.leading())
            .fold(Dimension::Dynamic, Dimension::refine)
    }
}
