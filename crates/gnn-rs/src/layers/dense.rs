//! Fully connected layer `y = act(x W + b)` over rank-2 features.
//!
//! The kernel is created on the first call, once the input's feature width is
//! known. Model construction makes that first call symbolically, so a model
//! that was built always owns its weights.

use std::any::Any;
use std::fmt;
use std::sync::OnceLock;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::{parse_config, to_config, Layer, LayerRegistry, LayerValue};
use crate::error::{GraphError, GraphResult};
use crate::module::{Module, ParamVisitor, ParamVisitorMut};
use crate::ops::functional;
use crate::tensor::{Tensor, Value};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    #[default]
    Linear,
    Relu,
}

impl Activation {
    fn apply(self, value: Value) -> GraphResult<Value> {
        match self {
            Activation::Linear => Ok(value),
            Activation::Relu => functional::relu(&value),
        }
    }
}

/// How the kernel is filled when the layer is built. Biases always start at zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Initializer {
    Zeros,
    /// Row-major `[input_dim, units]` values.
    Constant { values: Vec<f32> },
    GlorotUniform { seed: u64 },
}

impl Default for Initializer {
    fn default() -> Self {
        Initializer::GlorotUniform { seed: 0 }
    }
}

impl Initializer {
    fn kernel(&self, input_dim: usize, units: usize) -> GraphResult<Tensor> {
        let len = input_dim * units;
        match self {
            Initializer::Zeros => Ok(Tensor::zeros([input_dim, units])),
            Initializer::Constant { values } => {
                if values.len() != len {
                    return Err(GraphError::shape_mismatch(
                        "constant Dense kernel",
                        format!("{len} values for [{input_dim}, {units}]"),
                        format!("{} values", values.len()),
                    ));
                }
                Tensor::from_vec([input_dim, units], values.clone())
            }
            Initializer::GlorotUniform { seed } => {
                let limit = (6.0 / (input_dim + units) as f64).sqrt() as f32;
                let mut rng = StdRng::seed_from_u64(*seed);
                let values = (0..len).map(|_| rng.gen_range(-limit..=limit)).collect();
                Tensor::from_vec([input_dim, units], values)
            }
        }
    }
}

struct DenseWeights {
    kernel: Tensor,
    bias: Option<Tensor>,
}

#[derive(Serialize, Deserialize)]
struct DenseConfig {
    #[serde(default)]
    name: String,
    units: usize,
    #[serde(default = "default_use_bias")]
    use_bias: bool,
    #[serde(default)]
    activation: Activation,
    #[serde(default)]
    kernel_initializer: Initializer,
}

fn default_use_bias() -> bool {
    true
}

pub struct Dense {
    name: String,
    units: usize,
    use_bias: bool,
    activation: Activation,
    kernel_initializer: Initializer,
    weights: OnceLock<DenseWeights>,
}

impl Dense {
    /// Linear layer with bias and a Glorot-initialized kernel.
    pub fn new(units: usize) -> Self {
        Dense {
            name: "dense".to_string(),
            units,
            use_bias: true,
            activation: Activation::Linear,
            kernel_initializer: Initializer::default(),
            weights: OnceLock::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_bias(mut self, use_bias: bool) -> Self {
        self.use_bias = use_bias;
        self
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    pub fn with_kernel_initializer(mut self, initializer: Initializer) -> Self {
        self.kernel_initializer = initializer;
        self
    }

    pub fn units(&self) -> usize {
        self.units
    }

    pub fn activation(&self) -> Activation {
        self.activation
    }

    pub fn is_built(&self) -> bool {
        self.weights.get().is_some()
    }

    pub fn kernel(&self) -> Option<&Tensor> {
        self.weights.get().map(|weights| &weights.kernel)
    }

    pub fn bias(&self) -> Option<&Tensor> {
        self.weights.get().and_then(|weights| weights.bias.as_ref())
    }

    fn weights_for(&self, input_dim: usize) -> GraphResult<&DenseWeights> {
        if self.weights.get().is_none() {
            let built = DenseWeights {
                kernel: self.kernel_initializer.kernel(input_dim, self.units)?,
                bias: self.use_bias.then(|| Tensor::zeros([self.units])),
            };
            // A concurrent first call may have won; both built the same shapes.
            let _ = self.weights.set(built);
        }
        let weights = self
            .weights
            .get()
            .ok_or_else(|| GraphError::configuration(format!("Dense '{}' failed to build", self.name)))?;
        let rows = match weights.kernel.shape().dims() {
            &[rows, units] if units == self.units => rows,
            _ => {
                return Err(GraphError::shape_mismatch(
                    format!("kernel of Dense '{}'", self.name),
                    format!("[{input_dim}, {}]", self.units),
                    weights.kernel.shape(),
                ))
            }
        };
        if rows != input_dim {
            return Err(GraphError::shape_mismatch(
                format!("input features of Dense '{}'", self.name),
                rows,
                input_dim,
            ));
        }
        Ok(weights)
    }

    pub fn from_config(
        config: &serde_json::Value,
        _registry: &LayerRegistry,
    ) -> GraphResult<Box<dyn Layer>> {
        let parsed: DenseConfig = parse_config("Dense", config)?;
        let mut layer = Dense::new(parsed.units)
            .with_bias(parsed.use_bias)
            .with_activation(parsed.activation)
            .with_kernel_initializer(parsed.kernel_initializer);
        if !parsed.name.is_empty() {
            layer.name = parsed.name;
        }
        Ok(Box::new(layer))
    }
}

impl fmt::Debug for Dense {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dense")
            .field("name", &self.name)
            .field("units", &self.units)
            .field("use_bias", &self.use_bias)
            .field("activation", &self.activation)
            .field("built", &self.is_built())
            .finish()
    }
}

impl Module for Dense {
    fn visit_params(&self, v: &mut ParamVisitor<'_>) -> GraphResult<()> {
        if let Some(weights) = self.weights.get() {
            v.param("kernel", &weights.kernel)?;
            if let Some(bias) = &weights.bias {
                v.param("bias", bias)?;
            }
        }
        Ok(())
    }

    fn visit_params_mut(&mut self, v: &mut ParamVisitorMut<'_>) -> GraphResult<()> {
        if let Some(weights) = self.weights.get_mut() {
            v.param("kernel", &mut weights.kernel)?;
            if let Some(bias) = &mut weights.bias {
                v.param("bias", bias)?;
            }
        }
        Ok(())
    }
}

impl Layer for Dense {
    fn class_name(&self) -> &str {
        "Dense"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, input: &LayerValue) -> GraphResult<LayerValue> {
        let x = input.as_value("Dense input")?;
        if x.rank() != 2 {
            return Err(GraphError::shape_mismatch(
                format!("input of Dense '{}'", self.name),
                "rank 2",
                x.spec(),
            ));
        }
        let input_dim = x.dim(1).and_then(|dim| dim.value()).ok_or_else(|| {
            GraphError::shape_mismatch(
                format!("input of Dense '{}'", self.name),
                "a static feature dimension",
                x.spec(),
            )
        })?;
        let weights = self.weights_for(input_dim)?;
        let mut y = functional::matmul(x, &Value::Concrete(weights.kernel.clone()))?;
        if let Some(bias) = &weights.bias {
            y = functional::add(&y, &Value::Concrete(bias.clone()))?;
        }
        self.activation.apply(y).map(LayerValue::Tensor)
    }

    fn get_config(&self) -> GraphResult<serde_json::Value> {
        to_config(&DenseConfig {
            name: self.name.clone(),
            units: self.units,
            use_bias: self.use_bias,
            activation: self.activation,
            kernel_initializer: self.kernel_initializer.clone(),
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(rows: usize, cols: usize, values: Vec<f32>) -> LayerValue {
        Tensor::from_vec([rows, cols], values).unwrap().into()
    }

    #[test]
    fn replaced_kernel_of_wrong_rank_is_rejected() {
        let mut dense = Dense::new(2).with_bias(false);
        dense.call(&input(1, 2, vec![1.0, 1.0])).unwrap();
        let mut f = |_: &str, t: &mut Tensor| {
            *t = Tensor::from_vec([1], vec![1.0])?;
            Ok::<(), GraphError>(())
        };
        dense.visit_params_mut(&mut ParamVisitorMut::new(&mut f)).unwrap();
        let err = dense.call(&input(1, 2, vec![1.0, 1.0])).unwrap_err();
        assert!(matches!(err, GraphError::ShapeMismatch { .. }));
    }

    #[test]
    fn constant_kernel_swaps_columns() {
        let dense = Dense::new(2)
            .with_bias(false)
            .with_kernel_initializer(Initializer::Constant {
                values: vec![0.0, 1.0, 1.0, 0.0],
            });
        let out = dense
            .call(&input(2, 2, vec![1.0, 2.0, 3.0, 4.0]))
            .unwrap()
            .into_tensor()
            .unwrap();
        assert_eq!(out.as_f32().unwrap(), &[2.0, 1.0, 4.0, 3.0]);
    }

    #[test]
    fn relu_clamps_negative_outputs() {
        let dense = Dense::new(1)
            .with_activation(Activation::Relu)
            .with_kernel_initializer(Initializer::Constant {
                values: vec![1.0, -1.0],
            });
        let out = dense
            .call(&input(2, 2, vec![1.0, 3.0, 5.0, 2.0]))
            .unwrap()
            .into_tensor()
            .unwrap();
        assert_eq!(out.as_f32().unwrap(), &[0.0, 3.0]);
    }

    #[test]
    fn glorot_kernel_is_seeded_and_bounded() {
        let a = Dense::new(3).with_kernel_initializer(Initializer::GlorotUniform { seed: 7 });
        let b = Dense::new(3).with_kernel_initializer(Initializer::GlorotUniform { seed: 7 });
        let x = input(1, 4, vec![1.0; 4]);
        a.call(&x).unwrap();
        b.call(&x).unwrap();
        assert_eq!(a.kernel(), b.kernel());
        let limit = (6.0f32 / 7.0).sqrt();
        assert!(a
            .kernel()
            .unwrap()
            .as_f32()
            .unwrap()
            .iter()
            .all(|w| w.abs() <= limit));
    }

    #[test]
    fn input_width_is_fixed_after_build() {
        let dense = Dense::new(2).with_kernel_initializer(Initializer::Zeros);
        dense.call(&input(1, 3, vec![0.0; 3])).unwrap();
        let err = dense.call(&input(1, 2, vec![0.0; 2])).unwrap_err();
        assert!(matches!(err, GraphError::ShapeMismatch { .. }));
    }

    #[test]
    fn constant_kernel_length_is_checked() {
        let dense = Dense::new(2).with_kernel_initializer(Initializer::Constant { values: vec![1.0] });
        let err = dense.call(&input(1, 2, vec![0.0; 2])).unwrap_err();
        assert!(matches!(err, GraphError::ShapeMismatch { .. }));
    }

    #[test]
    fn params_appear_after_build() {
        let dense = Dense::new(2).with_kernel_initializer(Initializer::Zeros);
        let mut names = Vec::new();
        let mut f = |path: &str, _: &Tensor| {
            names.push(path.to_string());
            Ok::<(), GraphError>(())
        };
        dense.visit_params(&mut ParamVisitor::new(&mut f)).unwrap();
        dense.call(&input(1, 2, vec![0.0; 2])).unwrap();
        dense.visit_params(&mut ParamVisitor::new(&mut f)).unwrap();
        assert_eq!(names, vec!["kernel".to_string(), "bias".to_string()]);
    }
}
