mod support;

use std::fs;

use gnn_rs::layers::{Dense, Initializer, Lambda, LayerValue};
use gnn_rs::ops::functional;
use gnn_rs::saved::{
    load_model, load_program, save_model, save_program, MODEL_FILE, PROGRAM_TEXT_FILE,
    SIGNATURE_FILE, WEIGHTS_FILE,
};
use gnn_rs::{
    DType, Dimension, ExecutionMode, GraphError, Layer, LayerRegistry, Model, ModelOptions,
    ProgramFormat, Tensor, TensorSpec,
};

use support::{expected_states, output_values, std_layers, weighted_swap_graph};

fn options(format: ProgramFormat) -> ModelOptions {
    ModelOptions::default()
        .with_execution(ExecutionMode::Eager)
        .with_program_format(format)
}

fn lambda_model() -> Model {
    let mut layers = std_layers();
    layers.push(Box::new(Lambda::new("negate", |input| {
        functional::neg(input.as_value("negate")?).map(LayerValue::Tensor)
    })));
    Model::new(weighted_swap_graph(1).spec(), layers)
        .unwrap()
        .with_options(options(ProgramFormat::Json))
}

#[test]
fn declined_config_fails_save_but_program_export_succeeds() {
    let model = lambda_model();
    let config_dir = tempfile::tempdir().unwrap();
    let target = config_dir.path().join("saved");
    let err = save_model(&model, &target).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<GraphError>(),
        Some(GraphError::Unsupported(_))
    ));
    assert!(!target.exists());

    let program_dir = tempfile::tempdir().unwrap();
    save_program(&model, program_dir.path()).unwrap();
    let restored = load_program(program_dir.path()).unwrap();
    let negated: Vec<f32> = expected_states(1).iter().map(|v| -v).collect();
    let out = restored
        .call(&LayerValue::Graph(weighted_swap_graph(1)))
        .unwrap();
    assert_eq!(output_values(out), negated);
}

#[test]
fn program_export_writes_signature_program_and_text() {
    for format in [ProgramFormat::Json, ProgramFormat::Bincode] {
        let model = Model::new(weighted_swap_graph(1).spec(), std_layers())
            .unwrap()
            .with_options(options(format));
        let dir = tempfile::tempdir().unwrap();
        save_program(&model, dir.path()).unwrap();
        assert!(dir.path().join(SIGNATURE_FILE).is_file());
        assert!(dir.path().join(format.file_name()).is_file());
        let text = fs::read_to_string(dir.path().join(PROGRAM_TEXT_FILE)).unwrap();
        assert!(text.starts_with("program (version = gnn.program.v1)"));
        assert!(text.contains("segment_sum"));
    }
}

#[test]
fn restored_program_checks_its_input_spec() {
    let model = Model::new(weighted_swap_graph(1).spec(), std_layers())
        .unwrap()
        .with_options(options(ProgramFormat::Bincode));
    let dir = tempfile::tempdir().unwrap();
    save_program(&model, dir.path()).unwrap();
    let restored = load_program(dir.path()).unwrap();
    let err = restored
        .call(&LayerValue::Graph(weighted_swap_graph(2)))
        .unwrap_err();
    assert!(matches!(err, GraphError::SpecMismatch { .. }));
}

#[test]
fn config_save_writes_model_and_weights() {
    let model = Model::new(weighted_swap_graph(1).spec(), std_layers())
        .unwrap()
        .with_options(options(ProgramFormat::Json));
    let dir = tempfile::tempdir().unwrap();
    save_model(&model, dir.path()).unwrap();
    let json: serde_json::Value =
        serde_json::from_slice(&fs::read(dir.path().join(MODEL_FILE)).unwrap()).unwrap();
    assert_eq!(json["layers"][0]["class_name"], "EdgeSetUpdate");
    assert_eq!(json["layers"][2]["config"]["next_state"]["class_name"], "Dense");
    assert!(dir.path().join(WEIGHTS_FILE).is_file());
}

fn dense_model(units: usize) -> Model {
    let spec = TensorSpec::new(DType::F32, vec![Dimension::Dynamic, Dimension::Static(3)]);
    let dense = Dense::new(units).with_kernel_initializer(Initializer::GlorotUniform { seed: 3 });
    Model::new(spec, vec![Box::new(dense) as Box<dyn Layer>])
        .unwrap()
        .with_options(options(ProgramFormat::Json))
}

#[test]
fn glorot_weights_survive_a_config_round_trip() {
    let model = dense_model(2);
    let dir = tempfile::tempdir().unwrap();
    save_model(&model, dir.path()).unwrap();
    let reloaded = load_model(dir.path(), &LayerRegistry::with_builtins()).unwrap();
    let x: LayerValue = Tensor::from_vec([2, 3], vec![1.0, -2.0, 0.5, 3.0, 0.0, -1.0])
        .unwrap()
        .into();
    assert_eq!(model.call(&x).unwrap(), reloaded.call(&x).unwrap());
}

#[test]
fn weight_shape_mismatch_fails_the_load() {
    let dir = tempfile::tempdir().unwrap();
    save_model(&dense_model(2), dir.path()).unwrap();
    let mut json: serde_json::Value =
        serde_json::from_slice(&fs::read(dir.path().join(MODEL_FILE)).unwrap()).unwrap();
    json["layers"][0]["config"]["units"] = serde_json::json!(4);
    fs::write(dir.path().join(MODEL_FILE), serde_json::to_vec(&json).unwrap()).unwrap();

    let err = load_model(dir.path(), &LayerRegistry::with_builtins()).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<GraphError>(),
        Some(GraphError::ShapeMismatch { .. })
    ));
}
