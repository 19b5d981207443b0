use std::env;
use std::sync::OnceLock;

use tracing::warn;

use crate::model::{ExecutionMode, ProgramFormat};

static GNNRS_EXECUTION: OnceLock<ExecutionMode> = OnceLock::new();
static GNNRS_PROGRAM_FORMAT: OnceLock<ProgramFormat> = OnceLock::new();

fn read_var<T: Copy>(name: &str, parse: fn(&str) -> Option<T>, default: T) -> T {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => {
            let normalized = value.trim().to_ascii_lowercase();
            parse(&normalized).unwrap_or_else(|| {
                warn!(variable = name, value = %value, "unrecognized value, using the default");
                default
            })
        }
        _ => default,
    }
}

pub(crate) fn execution_mode() -> ExecutionMode {
    *GNNRS_EXECUTION.get_or_init(|| {
        read_var("GNNRS_EXECUTION", ExecutionMode::parse, ExecutionMode::Eager)
    })
}

pub(crate) fn program_format() -> ProgramFormat {
    *GNNRS_PROGRAM_FORMAT.get_or_init(|| {
        read_var("GNNRS_PROGRAM_FORMAT", ProgramFormat::parse, ProgramFormat::Json)
    })
}
