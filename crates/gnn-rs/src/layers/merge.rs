use std::any::Any;

use serde::{Deserialize, Serialize};

use super::{parse_config, to_config, Layer, LayerRegistry, LayerValue};
use crate::error::{GraphError, GraphResult};
use crate::module::Module;
use crate::ops::functional;

/// Elementwise product of a tuple of tensors, with broadcasting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Multiply {
    #[serde(default = "default_name")]
    pub name: String,
}

fn default_name() -> String {
    "multiply".to_string()
}

impl Multiply {
    pub fn new() -> Self {
        Multiply { name: default_name() }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn from_config(
        config: &serde_json::Value,
        _registry: &LayerRegistry,
    ) -> GraphResult<Box<dyn Layer>> {
        Ok(Box::new(parse_config::<Multiply>("Multiply", config)?))
    }
}

impl Default for Multiply {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for Multiply {}

impl Layer for Multiply {
    fn class_name(&self) -> &str {
        "Multiply"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, input: &LayerValue) -> GraphResult<LayerValue> {
        let LayerValue::Tuple(values) = input else {
            return Err(GraphError::shape_mismatch(
                format!("input of Multiply '{}'", self.name),
                "a tuple",
                input.kind(),
            ));
        };
        let Some((first, rest)) = values.split_first() else {
            return Err(GraphError::shape_mismatch(
                format!("input of Multiply '{}'", self.name),
                "at least 2 tensors",
                "0 tensors",
            ));
        };
        if rest.is_empty() {
            return Err(GraphError::shape_mismatch(
                format!("input of Multiply '{}'", self.name),
                "at least 2 tensors",
                "1 tensor",
            ));
        }
        let mut product = first.clone();
        for value in rest {
            product = functional::mul(&product, value)?;
        }
        Ok(LayerValue::Tensor(product))
    }

    fn get_config(&self) -> GraphResult<serde_json::Value> {
        to_config(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::{Tensor, Value};

    #[test]
    fn broadcasts_a_column_over_rows() {
        let states = Tensor::from_vec([2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let weights = Tensor::from_vec([2, 1], vec![0.5, -1.0]).unwrap();
        let out = Multiply::new()
            .call(&LayerValue::Tuple(vec![Value::from(states), Value::from(weights)]))
            .unwrap()
            .into_tensor()
            .unwrap();
        assert_eq!(out.as_f32().unwrap(), &[0.5, 1.0, -3.0, -4.0]);
    }

    #[test]
    fn single_tensor_is_rejected() {
        let err = Multiply::new()
            .call(&LayerValue::Tuple(vec![Value::from(Tensor::zeros([1]))]))
            .unwrap_err();
        assert!(matches!(err, GraphError::ShapeMismatch { .. }));
    }
}
