//! Immutable heterogeneous graph container.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::adjacency::Adjacency;
use super::spec::GraphTensorSpec;
use crate::error::{GraphError, GraphResult};
use crate::ops::functional;
use crate::tensor::{DType, Dimension, Value};

/// Named feature tensors of one graph piece, ordered by name.
pub type Fields = BTreeMap<String, Value>;

/// Collects `(name, value)` pairs into [`Fields`].
pub fn fields<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Fields
where
    K: Into<String>,
    V: Into<Value>,
{
    entries
        .into_iter()
        .map(|(name, value)| (name.into(), value.into()))
        .collect()
}

/// Addresses the context, a node set, or an edge set of a graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetLocation {
    Context,
    NodeSet(String),
    EdgeSet(String),
}

impl fmt::Display for SetLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetLocation::Context => f.write_str("context"),
            SetLocation::NodeSet(name) => write!(f, "node set '{name}'"),
            SetLocation::EdgeSet(name) => write!(f, "edge set '{name}'"),
        }
    }
}

/// Location label of a set that may not be named yet.
fn set_location(kind: fn(String) -> SetLocation, name: &str, unnamed: &str) -> String {
    if name.is_empty() {
        unnamed.to_string()
    } else {
        kind(name.to_string()).to_string()
    }
}

fn check_sizes(location: &str, sizes: &Value) -> GraphResult<()> {
    let spec = sizes.spec();
    if spec.dtype != DType::I32 || spec.rank() != 1 {
        return Err(GraphError::shape_mismatch(
            format!("{location} sizes"),
            "i32[num_components]",
            &spec,
        ));
    }
    Ok(())
}

/// Total item count implied by concrete sizes.
fn count_items(location: &str, sizes: &Value) -> GraphResult<Dimension> {
    let Some(tensor) = sizes.as_tensor() else {
        return Ok(Dimension::Dynamic);
    };
    let mut total = 0usize;
    for (component, &size) in tensor.as_i32()?.iter().enumerate() {
        if size < 0 {
            return Err(GraphError::shape_mismatch(
                format!("{location} sizes"),
                "non-negative sizes",
                format!("size {size} for component {component}"),
            ));
        }
        total += size as usize;
    }
    Ok(Dimension::Static(total))
}

/// Checks that every feature has `items` rows, refining `items` when it is unknown.
fn check_features(location: &str, items: Dimension, features: &Fields) -> GraphResult<Dimension> {
    let mut items = items;
    for (name, value) in features {
        let leading = value.leading().ok_or_else(|| {
            GraphError::shape_mismatch(
                format!("{location} feature '{name}'"),
                "rank >= 1",
                value.spec(),
            )
        })?;
        if !items.is_compatible_with(leading) {
            return Err(GraphError::shape_mismatch(
                format!("{location} feature '{name}'"),
                format!("{items} items"),
                format!("{leading} items"),
            ));
        }
        items = items.refine(leading);
    }
    Ok(items)
}

/// Checks updated features against `items`.
///
/// Pairs of known extents are compared here. When either side is only known at
/// run time, the feature is wrapped in a row-count check against `count`, so
/// traced programs reject the same inputs as direct execution.
fn check_updates(
    location: &str,
    items: Dimension,
    updates: Fields,
    count: impl FnOnce() -> GraphResult<Option<Value>>,
) -> GraphResult<(Dimension, Fields)> {
    let refined = check_features(location, items, &updates)?;
    let deferred = updates
        .values()
        .any(|value| !(items.is_static() && value.leading().is_some_and(Dimension::is_static)));
    if !deferred {
        return Ok((refined, updates));
    }
    let Some(count) = count()? else {
        return Ok((refined, updates));
    };
    let checked = updates
        .into_iter()
        .map(|(name, value)| {
            let context = format!("{location} feature '{name}'");
            let value = functional::assert_leading(&value, &count, &context)?;
            Ok((name, value))
        })
        .collect::<GraphResult<Fields>>()?;
    Ok((refined, checked))
}

fn lookup<'a>(location: &str, features: &'a Fields, name: &str) -> GraphResult<&'a Value> {
    features
        .get(name)
        .ok_or_else(|| GraphError::feature_not_found(location, name))
}

fn merge_fields(base: &Fields, updates: Fields) -> Fields {
    let mut merged = base.clone();
    merged.extend(updates);
    merged
}

/// Graph-level features, one row per graph component.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Context {
    features: Arc<Fields>,
    components: Dimension,
}

impl Context {
    pub fn from_fields<K, V>(features: impl IntoIterator<Item = (K, V)>) -> GraphResult<Self>
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let features = fields(features);
        let components = check_features("context", Dimension::Dynamic, &features)?;
        Ok(Context {
            features: Arc::new(features),
            components,
        })
    }

    pub fn features(&self) -> &Fields {
        &self.features
    }

    pub fn feature(&self, name: &str) -> GraphResult<&Value> {
        lookup("context", &self.features, name)
    }

    /// `components` is the graph's component count as a value, if any piece has sizes.
    fn with_features(&self, updates: Fields, components: Option<Value>) -> GraphResult<Self> {
        let (components, updates) =
            check_updates("context", self.components, updates, || Ok(components))?;
        Ok(Context {
            features: Arc::new(merge_fields(&self.features, updates)),
            components,
        })
    }
}

/// A typed collection of nodes with per-component sizes and per-node features.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSet {
    name: String,
    sizes: Value,
    features: Arc<Fields>,
    items: Dimension,
}

impl NodeSet {
    /// Builds a node set; every feature must have `sum(sizes)` rows.
    ///
    /// The name is assigned by [`GraphTensor::from_pieces`].
    pub fn from_fields<K, V>(
        features: impl IntoIterator<Item = (K, V)>,
        sizes: impl Into<Value>,
    ) -> GraphResult<Self>
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Self::build(String::new(), fields(features), sizes.into())
    }

    /// Like [`from_fields`](Self::from_fields), with the name known up front so
    /// errors can point at the set.
    pub fn named<K, V>(
        name: impl Into<String>,
        features: impl IntoIterator<Item = (K, V)>,
        sizes: impl Into<Value>,
    ) -> GraphResult<Self>
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Self::build(name.into(), fields(features), sizes.into())
    }

    fn build(name: String, features: Fields, sizes: Value) -> GraphResult<Self> {
        let location = set_location(SetLocation::NodeSet, &name, "node set");
        check_sizes(&location, &sizes)?;
        let items = check_features(&location, count_items(&location, &sizes)?, &features)?;
        Ok(NodeSet {
            name,
            sizes,
            features: Arc::new(features),
            items,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sizes(&self) -> &Value {
        &self.sizes
    }

    pub fn features(&self) -> &Fields {
        &self.features
    }

    pub fn feature(&self, name: &str) -> GraphResult<&Value> {
        lookup(&self.location(), &self.features, name)
    }

    /// Number of nodes, when known at this point.
    pub fn num_items(&self) -> Dimension {
        self.items
    }

    pub fn num_components(&self) -> Dimension {
        self.sizes.leading().unwrap_or(Dimension::Dynamic)
    }

    /// Total number of nodes as a rank-0 `i32` value.
    pub fn total_size(&self) -> GraphResult<Value> {
        functional::reduce_sum(&self.sizes)
    }

    fn location(&self) -> String {
        SetLocation::NodeSet(self.name.clone()).to_string()
    }

    fn with_features(&self, updates: Fields) -> GraphResult<Self> {
        let (items, updates) = check_updates(&self.location(), self.items, updates, || {
            self.total_size().map(Some)
        })?;
        Ok(NodeSet {
            name: self.name.clone(),
            sizes: self.sizes.clone(),
            features: Arc::new(merge_fields(&self.features, updates)),
            items,
        })
    }
}

/// A typed collection of edges with adjacency and per-edge features.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeSet {
    name: String,
    sizes: Value,
    adjacency: Adjacency,
    features: Arc<Fields>,
    items: Dimension,
}

impl EdgeSet {
    /// Builds an edge set; adjacency indices and features must have `sum(sizes)` rows.
    ///
    /// The name is assigned by [`GraphTensor::from_pieces`].
    pub fn from_fields<K, V>(
        features: impl IntoIterator<Item = (K, V)>,
        sizes: impl Into<Value>,
        adjacency: Adjacency,
    ) -> GraphResult<Self>
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Self::build(String::new(), fields(features), sizes.into(), adjacency)
    }

    /// Like [`from_fields`](Self::from_fields), with the name known up front so
    /// errors can point at the set.
    pub fn named<K, V>(
        name: impl Into<String>,
        features: impl IntoIterator<Item = (K, V)>,
        sizes: impl Into<Value>,
        adjacency: Adjacency,
    ) -> GraphResult<Self>
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Self::build(name.into(), fields(features), sizes.into(), adjacency)
    }

    fn build(name: String, features: Fields, sizes: Value, adjacency: Adjacency) -> GraphResult<Self> {
        let location = set_location(SetLocation::EdgeSet, &name, "edge set");
        check_sizes(&location, &sizes)?;
        let counted = count_items(&location, &sizes)?;
        let indexed = adjacency.num_items();
        if !counted.is_compatible_with(indexed) {
            return Err(GraphError::shape_mismatch(
                format!("{location} adjacency"),
                format!("{counted} indices"),
                format!("{indexed} indices"),
            ));
        }
        let items = check_features(&location, counted.refine(indexed), &features)?;
        Ok(EdgeSet {
            name,
            sizes,
            adjacency,
            features: Arc::new(features),
            items,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sizes(&self) -> &Value {
        &self.sizes
    }

    pub fn adjacency(&self) -> &Adjacency {
        &self.adjacency
    }

    pub fn features(&self) -> &Fields {
        &self.features
    }

    pub fn feature(&self, name: &str) -> GraphResult<&Value> {
        lookup(&self.location(), &self.features, name)
    }

    pub fn num_items(&self) -> Dimension {
        self.items
    }

    pub fn num_components(&self) -> Dimension {
        self.sizes.leading().unwrap_or(Dimension::Dynamic)
    }

    pub fn total_size(&self) -> GraphResult<Value> {
        functional::reduce_sum(&self.sizes)
    }

    fn location(&self) -> String {
        SetLocation::EdgeSet(self.name.clone()).to_string()
    }

    fn with_features(&self, updates: Fields) -> GraphResult<Self> {
        let (items, updates) = check_updates(&self.location(), self.items, updates, || {
            self.total_size().map(Some)
        })?;
        Ok(EdgeSet {
            name: self.name.clone(),
            sizes: self.sizes.clone(),
            adjacency: self.adjacency.clone(),
            features: Arc::new(merge_fields(&self.features, updates)),
            items,
        })
    }
}

/// Feature replacements applied by [`GraphTensor::replace_features`].
#[derive(Debug, Clone, Default)]
pub struct FeatureUpdates {
    context: Fields,
    node_sets: BTreeMap<String, Fields>,
    edge_sets: BTreeMap<String, Fields>,
}

impl FeatureUpdates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single update addressed by location.
    pub fn at(location: &SetLocation, feature: impl Into<String>, value: impl Into<Value>) -> Self {
        let updates = Self::new();
        match location {
            SetLocation::Context => updates.context_feature(feature, value),
            SetLocation::NodeSet(set) => updates.node_set_feature(set.clone(), feature, value),
            SetLocation::EdgeSet(set) => updates.edge_set_feature(set.clone(), feature, value),
        }
    }

    pub fn context_feature(mut self, feature: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(feature.into(), value.into());
        self
    }

    pub fn node_set_feature(
        mut self,
        set: impl Into<String>,
        feature: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.node_sets
            .entry(set.into())
            .or_default()
            .insert(feature.into(), value.into());
        self
    }

    pub fn edge_set_feature(
        mut self,
        set: impl Into<String>,
        feature: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.edge_sets
            .entry(set.into())
            .or_default()
            .insert(feature.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.context.is_empty() && self.node_sets.is_empty() && self.edge_sets.is_empty()
    }
}

/// Immutable heterogeneous graph: a context, named node sets, and named edge sets.
///
/// Pieces are shared between graphs derived through [`replace_features`](Self::replace_features).
#[derive(Debug, Clone, PartialEq)]
pub struct GraphTensor {
    context: Context,
    node_sets: Arc<BTreeMap<String, NodeSet>>,
    edge_sets: Arc<BTreeMap<String, EdgeSet>>,
}

impl GraphTensor {
    /// Assembles a graph and validates its cross-piece invariants.
    ///
    /// Every edge set must reference existing node sets, concrete indices must be in
    /// range of the referenced node set, and all pieces must agree on the number of
    /// graph components.
    pub fn from_pieces<KN, KE>(
        context: Option<Context>,
        node_sets: impl IntoIterator<Item = (KN, NodeSet)>,
        edge_sets: impl IntoIterator<Item = (KE, EdgeSet)>,
    ) -> GraphResult<Self>
    where
        KN: Into<String>,
        KE: Into<String>,
    {
        let mut named_node_sets = BTreeMap::new();
        for (name, mut set) in node_sets {
            let name = name.into();
            claim_name("node set", &mut set.name, &name)?;
            if named_node_sets.insert(name.clone(), set).is_some() {
                return Err(GraphError::configuration(format!("duplicate node set '{name}'")));
            }
        }
        let mut named_edge_sets = BTreeMap::new();
        for (name, mut set) in edge_sets {
            let name = name.into();
            claim_name("edge set", &mut set.name, &name)?;
            if named_edge_sets.insert(name.clone(), set).is_some() {
                return Err(GraphError::configuration(format!("duplicate edge set '{name}'")));
            }
        }
        let (node_sets, edge_sets) = (named_node_sets, named_edge_sets);

        for (edge_set_name, edge_set) in &edge_sets {
            for (tag, incident) in edge_set.adjacency.iter() {
                let node_set = node_sets.get(&incident.node_set_name).ok_or_else(|| {
                    GraphError::shape_mismatch(
                        format!("adjacency of edge set '{edge_set_name}'"),
                        format!("node set '{}' to exist", incident.node_set_name),
                        format!(
                            "node sets [{}]",
                            node_sets.keys().cloned().collect::<Vec<_>>().join(", ")
                        ),
                    )
                })?;
                check_index_range(edge_set_name, tag, &incident.indices, node_set)?;
            }
        }

        let graph = GraphTensor {
            context: context.unwrap_or_default(),
            node_sets: Arc::new(node_sets),
            edge_sets: Arc::new(edge_sets),
        };
        graph.check_components()?;
        Ok(graph)
    }

    fn check_components(&self) -> GraphResult<Dimension> {
        let mut components = self.context.components;
        let pieces = self
            .node_sets
            .values()
            .map(|set| (set.location(), set.num_components()))
            .chain(
                self.edge_sets
                    .values()
                    .map(|set| (set.location(), set.num_components())),
            );
        for (location, count) in pieces {
            if !components.is_compatible_with(count) {
                return Err(GraphError::shape_mismatch(
                    format!("{location} sizes"),
                    format!("{components} components"),
                    format!("{count} components"),
                ));
            }
            components = components.refine(count);
        }
        Ok(components)
    }

    /// Number of components as a rank-0 `i32`, read from the first set's sizes.
    fn components_value(&self) -> GraphResult<Option<Value>> {
        let sizes = self
            .node_sets
            .values()
            .map(NodeSet::sizes)
            .chain(self.edge_sets.values().map(EdgeSet::sizes))
            .next();
        sizes.map(|sizes| functional::dim(sizes, 0)).transpose()
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn node_sets(&self) -> &BTreeMap<String, NodeSet> {
        &self.node_sets
    }

    pub fn edge_sets(&self) -> &BTreeMap<String, EdgeSet> {
        &self.edge_sets
    }

    pub fn node_set(&self, name: &str) -> GraphResult<&NodeSet> {
        self.node_sets.get(name).ok_or_else(|| {
            GraphError::configuration(format!(
                "no node set named '{name}' (available: {})",
                self.node_sets.keys().cloned().collect::<Vec<_>>().join(", ")
            ))
        })
    }

    pub fn edge_set(&self, name: &str) -> GraphResult<&EdgeSet> {
        self.edge_sets.get(name).ok_or_else(|| {
            GraphError::configuration(format!(
                "no edge set named '{name}' (available: {})",
                self.edge_sets.keys().cloned().collect::<Vec<_>>().join(", ")
            ))
        })
    }

    /// Number of graph components, when known.
    pub fn num_components(&self) -> Dimension {
        self.check_components().unwrap_or(Dimension::Dynamic)
    }

    /// Reads a feature of the context, a node set, or an edge set.
    pub fn feature(&self, location: &SetLocation, name: &str) -> GraphResult<&Value> {
        match location {
            SetLocation::Context => self.context.feature(name),
            SetLocation::NodeSet(set) => self.node_set(set)?.feature(name),
            SetLocation::EdgeSet(set) => self.edge_set(set)?.feature(name),
        }
    }

    /// Returns a graph with the given features added or replaced.
    ///
    /// Sizes, adjacency, and unmentioned features are shared with `self`.
    pub fn replace_features(&self, updates: FeatureUpdates) -> GraphResult<GraphTensor> {
        let mut graph = self.clone();
        if !updates.context.is_empty() {
            let components = self.components_value()?;
            graph.context = graph.context.with_features(updates.context, components)?;
        }
        for (set_name, fields) in updates.node_sets {
            let updated = self.node_set(&set_name)?.with_features(fields)?;
            Arc::make_mut(&mut graph.node_sets).insert(set_name, updated);
        }
        for (set_name, fields) in updates.edge_sets {
            let updated = self.edge_set(&set_name)?.with_features(fields)?;
            Arc::make_mut(&mut graph.edge_sets).insert(set_name, updated);
        }
        graph.check_components()?;
        Ok(graph)
    }

    pub fn spec(&self) -> GraphTensorSpec {
        GraphTensorSpec::of(self)
    }

    /// All tensors of the graph in canonical order: context features, then each node set
    /// (sizes, features), then each edge set (sizes, adjacency indices by tag, features),
    /// with sets and features ordered by name.
    pub fn flatten(&self) -> Vec<Value> {
        let mut values: Vec<Value> = self.context.features.values().cloned().collect();
        for node_set in self.node_sets.values() {
            values.push(node_set.sizes.clone());
            values.extend(node_set.features.values().cloned());
        }
        for edge_set in self.edge_sets.values() {
            values.push(edge_set.sizes.clone());
            values.extend(edge_set.adjacency.iter().map(|(_, incident)| incident.indices.clone()));
            values.extend(edge_set.features.values().cloned());
        }
        values
    }
}

/// Assigns `name` to an unnamed set, or checks it against the name given at construction.
fn claim_name(kind: &str, current: &mut String, name: &str) -> GraphResult<()> {
    if current.is_empty() {
        *current = name.to_string();
        return Ok(());
    }
    if current != name {
        return Err(GraphError::configuration(format!(
            "{kind} '{current}' inserted under the name '{name}'"
        )));
    }
    Ok(())
}

fn check_index_range(
    edge_set_name: &str,
    tag: u8,
    indices: &Value,
    node_set: &NodeSet,
) -> GraphResult<()> {
    let (Some(tensor), Dimension::Static(count)) = (indices.as_tensor(), node_set.num_items()) else {
        return Ok(());
    };
    for (position, &index) in tensor.as_i32()?.iter().enumerate() {
        if index < 0 || index as usize >= count {
            return Err(GraphError::shape_mismatch(
                format!("adjacency of edge set '{edge_set_name}' for tag {tag}"),
                format!("indices into node set '{}' in [0, {count})", node_set.name),
                format!("index {index} at position {position}"),
            ));
        }
    }
    Ok(())
}
