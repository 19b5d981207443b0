use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::GraphResult;
use crate::layers::{LayerValue, ValueSpec};
use crate::model::{run_program, Model, ProgramFormat};
use crate::ops::Program;

pub const SIGNATURE_FILE: &str = "signature.json";
pub const PROGRAM_TEXT_FILE: &str = "program.txt";

/// Everything besides the program needed to call it.
#[derive(Debug, Serialize, Deserialize)]
struct Signature {
    name: String,
    format: ProgramFormat,
    input_spec: ValueSpec,
    output_spec: ValueSpec,
}

/// Writes the traced program of `model` into `dir`.
///
/// Layers without a config export fine here; only their traced computation is kept.
pub fn save_program(model: &Model, dir: impl AsRef<Path>) -> Result<()> {
    let dir = dir.as_ref();
    let program = model
        .program()
        .with_context(|| format!("tracing model '{}'", model.name()))?;
    let format = model.options().program_format;
    let signature = Signature {
        name: model.name().to_string(),
        format,
        input_spec: model.input_spec().clone(),
        output_spec: model.output_spec().clone(),
    };
    let signature_json = serde_json::to_string_pretty(&signature)?;

    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let program_path = dir.join(format.file_name());
    match format {
        ProgramFormat::Json => program.save_json(&program_path)?,
        ProgramFormat::Bincode => program.save_bincode(&program_path)?,
    }
    fs::write(dir.join(SIGNATURE_FILE), signature_json)?;
    fs::write(dir.join(PROGRAM_TEXT_FILE), program.to_string())?;
    info!(
        path = %program_path.display(),
        instructions = program.body.len(),
        "saved program"
    );
    Ok(())
}

/// A restored program, callable like the model it was traced from.
#[derive(Debug, Clone)]
pub struct LoadedProgram {
    pub name: String,
    pub input_spec: ValueSpec,
    pub output_spec: ValueSpec,
    pub program: Arc<Program>,
}

impl LoadedProgram {
    pub fn call(&self, input: &LayerValue) -> GraphResult<LayerValue> {
        self.input_spec.check(input)?;
        run_program(&self.program, &self.output_spec, input)
    }
}

pub fn load_program(dir: impl AsRef<Path>) -> Result<LoadedProgram> {
    let dir = dir.as_ref();
    let signature_path = dir.join(SIGNATURE_FILE);
    let signature: Signature = serde_json::from_slice(
        &fs::read(&signature_path)
            .with_context(|| format!("reading {}", signature_path.display()))?,
    )
    .with_context(|| format!("parsing {}", signature_path.display()))?;
    let program_path = dir.join(signature.format.file_name());
    let program = match signature.format {
        ProgramFormat::Json => Program::load_json(&program_path),
        ProgramFormat::Bincode => Program::load_bincode(&program_path),
    }
    .with_context(|| format!("loading {}", program_path.display()))?;
    info!(path = %program_path.display(), "loaded program");
    Ok(LoadedProgram {
        name: signature.name,
        input_spec: signature.input_spec,
        output_spec: signature.output_spec,
        program: Arc::new(program),
    })
}
