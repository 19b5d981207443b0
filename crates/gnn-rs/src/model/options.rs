use serde::{Deserialize, Serialize};

use crate::env;

/// How [`super::Model::call`] evaluates concrete inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Call the layers directly.
    Eager,
    /// Interpret the traced program.
    Program,
}

impl ExecutionMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "eager" => Some(ExecutionMode::Eager),
            "program" => Some(ExecutionMode::Program),
            _ => None,
        }
    }
}

/// Encoding of exported programs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgramFormat {
    Json,
    Bincode,
}

impl ProgramFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "json" => Some(ProgramFormat::Json),
            "bincode" => Some(ProgramFormat::Bincode),
            _ => None,
        }
    }

    /// File name of the exported program in this format.
    pub fn file_name(self) -> &'static str {
        match self {
            ProgramFormat::Json => "saved_program.json",
            ProgramFormat::Bincode => "saved_program.bin",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelOptions {
    pub execution: ExecutionMode,
    pub program_format: ProgramFormat,
}

impl Default for ModelOptions {
    /// Reads `GNNRS_EXECUTION` and `GNNRS_PROGRAM_FORMAT` once per process.
    fn default() -> Self {
        ModelOptions {
            execution: env::execution_mode(),
            program_format: env::program_format(),
        }
    }
}

impl ModelOptions {
    pub fn with_execution(mut self, execution: ExecutionMode) -> Self {
        self.execution = execution;
        self
    }

    pub fn with_program_format(mut self, program_format: ProgramFormat) -> Self {
        self.program_format = program_format;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_lowercase_names() {
        assert_eq!(ExecutionMode::parse("program"), Some(ExecutionMode::Program));
        assert_eq!(ExecutionMode::parse("lazy"), None);
        assert_eq!(ProgramFormat::parse("bincode"), Some(ProgramFormat::Bincode));
        assert_eq!(ProgramFormat::Bincode.file_name(), "saved_program.bin");
    }
}
