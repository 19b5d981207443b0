use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::archive::WeightArchive;
use crate::error::{GraphError, GraphResult};
use crate::layers::{LayerConfig, LayerRegistry, ValueSpec};
use crate::model::Model;
use crate::module::{Module, ParamVisitor, ParamVisitorMut};
use crate::tensor::Tensor;

pub const MODEL_FILE: &str = "model.json";
pub const WEIGHTS_FILE: &str = "weights.bin";
const MODEL_FORMAT_VERSION: &str = "gnn.model.v1";

#[derive(Debug, Serialize, Deserialize)]
struct SavedModel {
    version: String,
    name: String,
    input_spec: ValueSpec,
    layers: Vec<LayerConfig>,
}

/// Writes `model.json` and `weights.bin` into `dir`.
///
/// All layer configs are collected before anything touches the disk, so a
/// layer that declines config export fails the save without leaving files.
pub fn save_model(model: &Model, dir: impl AsRef<Path>) -> Result<()> {
    let dir = dir.as_ref();
    let layers = model
        .layers()
        .iter()
        .enumerate()
        .map(|(index, layer)| {
            LayerConfig::of(layer.as_ref())
                .with_context(|| format!("exporting config of layer #{index} '{}'", layer.name()))
        })
        .collect::<Result<Vec<_>>>()?;
    let saved = SavedModel {
        version: MODEL_FORMAT_VERSION.to_string(),
        name: model.name().to_string(),
        input_spec: model.input_spec().clone(),
        layers,
    };
    let model_json = serde_json::to_string_pretty(&saved)?;

    let mut weights = BTreeMap::new();
    let mut collect = |path: &str, tensor: &Tensor| {
        weights.insert(path.to_string(), tensor.clone());
        Ok::<(), GraphError>(())
    };
    model.visit_params(&mut ParamVisitor::new(&mut collect))?;

    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    fs::write(dir.join(MODEL_FILE), model_json)?;
    WeightArchive::save(dir.join(WEIGHTS_FILE), &weights)?;
    info!(
        path = %dir.display(),
        layers = saved.layers.len(),
        weights = weights.len(),
        "saved model config"
    );
    Ok(())
}

/// Rebuilds a model saved with [`save_model`].
///
/// Layers are constructed through `registry` and re-traced, then every weight
/// is replaced by its stored value. Missing, extra, or differently shaped
/// weights are errors.
pub fn load_model(dir: impl AsRef<Path>, registry: &LayerRegistry) -> Result<Model> {
    let dir = dir.as_ref();
    let model_path = dir.join(MODEL_FILE);
    let saved: SavedModel = serde_json::from_slice(
        &fs::read(&model_path).with_context(|| format!("reading {}", model_path.display()))?,
    )
    .with_context(|| format!("parsing {}", model_path.display()))?;
    if saved.version != MODEL_FORMAT_VERSION {
        bail!(
            "unsupported model format '{}', expected '{}'",
            saved.version,
            MODEL_FORMAT_VERSION
        );
    }

    let layers = saved
        .layers
        .iter()
        .map(|config| registry.build(config))
        .collect::<Result<Vec<_>, _>>()?;
    let mut model = Model::new(saved.input_spec, layers)?.with_name(saved.name);

    let mut stored = WeightArchive::load(dir.join(WEIGHTS_FILE))?;
    let mut restore = |path: &str, tensor: &mut Tensor| -> GraphResult<()> {
        let value = stored
            .remove(path)
            .ok_or_else(|| GraphError::configuration(format!("weight '{path}' missing from archive")))?;
        if value.dtype() != tensor.dtype() || value.shape() != tensor.shape() {
            return Err(GraphError::shape_mismatch(
                format!("weight '{path}'"),
                tensor.spec(),
                value.spec(),
            ));
        }
        *tensor = value;
        Ok(())
    };
    model.visit_params_mut(&mut ParamVisitorMut::new(&mut restore))?;
    if !stored.is_empty() {
        let mut extra: Vec<_> = stored.into_keys().collect();
        extra.sort();
        return Err(GraphError::configuration(format!(
            "weights without a matching layer parameter: {}",
            extra.join(", ")
        ))
        .into());
    }
    info!(path = %dir.display(), layers = model.layers().len(), "loaded model config");
    Ok(model)
}
