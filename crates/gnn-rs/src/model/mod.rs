//! A traced stack of layers with a declared input spec.

mod options;

use std::fmt;
use std::sync::{Arc, OnceLock};

use tracing::debug;

pub use options::{ExecutionMode, ModelOptions, ProgramFormat};

use crate::error::{GraphError, GraphResult};
use crate::layers::{visit_sublayer, visit_sublayer_mut, Layer, LayerValue, ValueSpec};
use crate::module::{Module, ParamVisitor, ParamVisitorMut};
use crate::ops::{lower_to_program, Program};
use crate::tensor::Value;

/// Layers applied in order to an input of a declared spec.
///
/// Construction traces the layers once on symbolic placeholders. That builds
/// lazily-sized weights, surfaces configuration errors, and fixes the output
/// spec. The traced program is lowered on demand and cached until weights change.
pub struct Model {
    name: String,
    input_spec: ValueSpec,
    output_spec: ValueSpec,
    layers: Vec<Box<dyn Layer>>,
    options: ModelOptions,
    program: OnceLock<Arc<Program>>,
}

impl Model {
    pub fn new(input_spec: impl Into<ValueSpec>, layers: Vec<Box<dyn Layer>>) -> GraphResult<Self> {
        let input_spec = input_spec.into();
        let traced = apply_layers(&layers, &input_spec.placeholders()?)?;
        let output_spec = traced.spec();
        debug!(
            layers = layers.len(),
            inputs = input_spec.flat_specs().len(),
            outputs = output_spec.flat_specs().len(),
            "traced model"
        );
        Ok(Model {
            name: "model".to_string(),
            input_spec,
            output_spec,
            layers,
            options: ModelOptions::default(),
            program: OnceLock::new(),
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_options(mut self, options: ModelOptions) -> Self {
        self.options = options;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &ModelOptions {
        &self.options
    }

    pub fn input_spec(&self) -> &ValueSpec {
        &self.input_spec
    }

    pub fn output_spec(&self) -> &ValueSpec {
        &self.output_spec
    }

    pub fn layers(&self) -> &[Box<dyn Layer>] {
        &self.layers
    }

    pub fn layer(&self, index: usize) -> Option<&dyn Layer> {
        self.layers.get(index).map(|layer| layer.as_ref())
    }

    /// Runs the model on `input`, which must match the input spec.
    ///
    /// Symbolic inputs are always traced through the layers, so a model can be
    /// nested inside another trace.
    pub fn call(&self, input: &LayerValue) -> GraphResult<LayerValue> {
        self.input_spec.check(input)?;
        let symbolic = input.flatten().iter().any(Value::is_symbolic);
        match self.options.execution {
            ExecutionMode::Program if !symbolic => {
                let program = self.program()?;
                run_program(&program, &self.output_spec, input)
            }
            _ => apply_layers(&self.layers, input),
        }
    }

    /// Applies the layers to fresh placeholders for the input spec.
    pub fn trace(&self) -> GraphResult<LayerValue> {
        apply_layers(&self.layers, &self.input_spec.placeholders()?)
    }

    /// The traced program with the current weights baked in as constants.
    pub fn program(&self) -> GraphResult<Arc<Program>> {
        if let Some(program) = self.program.get() {
            return Ok(Arc::clone(program));
        }
        let outputs = self.trace()?.flatten();
        let program = Arc::new(lower_to_program(self.input_spec.flat_specs(), &outputs)?);
        let _ = self.program.set(Arc::clone(&program));
        Ok(program)
    }
}

fn apply_layers(layers: &[Box<dyn Layer>], input: &LayerValue) -> GraphResult<LayerValue> {
    let mut value = input.clone();
    for layer in layers {
        value = layer.call(&value)?;
    }
    Ok(value)
}

/// Feeds the leaves of `input` to `program` and reassembles the results.
pub(crate) fn run_program(
    program: &Program,
    output_spec: &ValueSpec,
    input: &LayerValue,
) -> GraphResult<LayerValue> {
    let inputs = input
        .flatten()
        .into_iter()
        .map(Value::into_tensor)
        .collect::<GraphResult<Vec<_>>>()?;
    let outputs = program.run(&inputs)?;
    if outputs.len() != output_spec.flat_specs().len() {
        return Err(GraphError::spec_mismatch(
            "program results",
            format!("{} tensors", output_spec.flat_specs().len()),
            format!("{} tensors", outputs.len()),
        ));
    }
    output_spec.unflatten(outputs.into_iter().map(Value::Concrete).collect())
}

impl Module for Model {
    fn visit_params(&self, v: &mut ParamVisitor<'_>) -> GraphResult<()> {
        for (index, layer) in self.layers.iter().enumerate() {
            v.scoped(&index.to_string(), |v| {
                visit_sublayer(v, layer.name(), layer.as_ref())
            })?;
        }
        Ok(())
    }

    /// Weights may change, so the cached program is dropped.
    fn visit_params_mut(&mut self, v: &mut ParamVisitorMut<'_>) -> GraphResult<()> {
        self.program.take();
        for (index, layer) in self.layers.iter_mut().enumerate() {
            let segment = layer.name().to_string();
            v.scoped(&index.to_string(), |v| {
                visit_sublayer_mut(v, &segment, layer.as_mut())
            })?;
        }
        Ok(())
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.name)
            .field(
                "layers",
                &self.layers.iter().map(|layer| layer.name()).collect::<Vec<_>>(),
            )
            .field("options", &self.options)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::{Dense, Initializer, Lambda};
    use crate::tensor::{DType, Dimension, Tensor, TensorSpec};

    fn doubling_model(execution: ExecutionMode) -> Model {
        let spec = TensorSpec::new(DType::F32, vec![Dimension::Dynamic, Dimension::Static(2)]);
        let dense = Dense::new(2)
            .with_bias(false)
            .with_kernel_initializer(Initializer::Constant {
                values: vec![2.0, 0.0, 0.0, 2.0],
            });
        Model::new(spec, vec![Box::new(dense)])
            .unwrap()
            .with_options(ModelOptions::default().with_execution(execution))
    }

    #[test]
    fn eager_and_program_execution_agree() {
        let x: LayerValue = Tensor::from_vec([3, 2], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0])
            .unwrap()
            .into();
        let eager = doubling_model(ExecutionMode::Eager).call(&x).unwrap();
        let program = doubling_model(ExecutionMode::Program).call(&x).unwrap();
        assert_eq!(eager, program);
        assert_eq!(
            eager.into_tensor().unwrap().as_f32().unwrap(),
            &[2.0, 4.0, 6.0, 8.0, 10.0, 12.0]
        );
    }

    #[test]
    fn construction_records_output_spec() {
        let model = doubling_model(ExecutionMode::Eager);
        assert_eq!(
            model.output_spec(),
            &ValueSpec::Tensor(TensorSpec::new(
                DType::F32,
                vec![Dimension::Dynamic, Dimension::Static(2)]
            ))
        );
    }

    #[test]
    fn inputs_outside_the_spec_are_rejected() {
        let model = doubling_model(ExecutionMode::Eager);
        let err = model.call(&Tensor::zeros([3, 3]).into()).unwrap_err();
        assert!(matches!(err, GraphError::SpecMismatch { .. }));
    }

    #[test]
    fn construction_surfaces_layer_errors() {
        let spec = TensorSpec::from_static(DType::F32, &[2]);
        let err = Model::new(spec, vec![Box::new(Dense::new(1))]).unwrap_err();
        assert!(matches!(err, GraphError::ShapeMismatch { .. }));
    }

    #[test]
    fn param_paths_start_with_layer_index() {
        let model = doubling_model(ExecutionMode::Eager);
        let mut paths = Vec::new();
        let mut f = |path: &str, _: &Tensor| {
            paths.push(path.to_string());
            Ok::<(), GraphError>(())
        };
        model.visit_params(&mut ParamVisitor::new(&mut f)).unwrap();
        assert_eq!(paths, vec!["0.dense.kernel"]);
    }

    #[test]
    fn updating_weights_drops_the_cached_program() {
        let mut model = doubling_model(ExecutionMode::Program);
        let x: LayerValue = Tensor::from_vec([1, 2], vec![1.0, 1.0]).unwrap().into();
        assert_eq!(model.call(&x).unwrap().into_tensor().unwrap().as_f32().unwrap(), &[2.0, 2.0]);
        let mut f = |_: &str, t: &mut Tensor| {
            *t = Tensor::from_vec([2, 2], vec![3.0, 0.0, 0.0, 3.0])?;
            Ok::<(), GraphError>(())
        };
        model.visit_params_mut(&mut ParamVisitorMut::new(&mut f)).unwrap();
        assert_eq!(model.call(&x).unwrap().into_tensor().unwrap().as_f32().unwrap(), &[3.0, 3.0]);
    }

    #[test]
    fn lambda_layers_trace_into_the_program() {
        let spec = TensorSpec::new(DType::F32, vec![Dimension::Dynamic]);
        let relu = Lambda::new("relu", |input| {
            crate::ops::functional::relu(input.as_value("relu")?).map(LayerValue::Tensor)
        });
        let model = Model::new(spec, vec![Box::new(relu)]).unwrap();
        let program = model.program().unwrap();
        let out = program.run(&[Tensor::from_vec([3], vec![-1.0, 0.5, 2.0]).unwrap()]).unwrap();
        assert_eq!(out[0].as_f32().unwrap(), &[0.0, 0.5, 2.0]);
    }
}
