use std::any::Any;

use serde::{Deserialize, Serialize};

use super::{
    parse_config, to_config, visit_sublayer, visit_sublayer_mut, Layer, LayerConfig, LayerRegistry,
    LayerValue,
};
use crate::error::GraphResult;
use crate::module::{Module, ParamVisitor, ParamVisitorMut};

/// Runs sub-layers in order, feeding each the previous output.
pub struct Sequential {
    name: String,
    layers: Vec<Box<dyn Layer>>,
}

#[derive(Serialize, Deserialize)]
struct SequentialConfig {
    #[serde(default)]
    name: String,
    layers: Vec<LayerConfig>,
}

impl Sequential {
    pub fn new(name: impl Into<String>, layers: Vec<Box<dyn Layer>>) -> Self {
        Sequential {
            name: name.into(),
            layers,
        }
    }

    pub fn layers(&self) -> &[Box<dyn Layer>] {
        &self.layers
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn from_config(
        config: &serde_json::Value,
        registry: &LayerRegistry,
    ) -> GraphResult<Box<dyn Layer>> {
        let parsed: SequentialConfig = parse_config("Sequential", config)?;
        let layers = parsed
            .layers
            .iter()
            .map(|layer| registry.build(layer))
            .collect::<GraphResult<Vec<_>>>()?;
        let name = if parsed.name.is_empty() {
            "sequential".to_string()
        } else {
            parsed.name
        };
        Ok(Box::new(Sequential::new(name, layers)))
    }
}

impl Module for Sequential {
    fn visit_params(&self, v: &mut ParamVisitor<'_>) -> GraphResult<()> {
        for (index, layer) in self.layers.iter().enumerate() {
            v.scoped(&index.to_string(), |v| {
                visit_sublayer(v, layer.name(), layer.as_ref())
            })?;
        }
        Ok(())
    }

    fn visit_params_mut(&mut self, v: &mut ParamVisitorMut<'_>) -> GraphResult<()> {
        for (index, layer) in self.layers.iter_mut().enumerate() {
            let segment = layer.name().to_string();
            v.scoped(&index.to_string(), |v| {
                visit_sublayer_mut(v, &segment, layer.as_mut())
            })?;
        }
        Ok(())
    }
}

impl Layer for Sequential {
    fn class_name(&self) -> &str {
        "Sequential"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, input: &LayerValue) -> GraphResult<LayerValue> {
        let mut value = input.clone();
        for layer in &self.layers {
            value = layer.call(&value)?;
        }
        Ok(value)
    }

    fn get_config(&self) -> GraphResult<serde_json::Value> {
        let layers = self
            .layers
            .iter()
            .map(|layer| LayerConfig::of(layer.as_ref()))
            .collect::<GraphResult<Vec<_>>>()?;
        to_config(&SequentialConfig {
            name: self.name.clone(),
            layers,
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
