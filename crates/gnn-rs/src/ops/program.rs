//! Flat instruction program produced by tracing a model, plus its interpreter.

use std::{fmt, fs, io, path::Path, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::kernels;
use crate::error::{GraphError, GraphResult};
use crate::tensor::{DType, Tensor, TensorSpec};

/// Frozen program format version enforced by this interface.
pub const PROGRAM_VERSION: &str = "gnn.program.v1";

fn default_program_version() -> String {
    PROGRAM_VERSION.to_string()
}

/// Identifier of an SSA value inside a [`Program`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueId(pub u32);

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Reduction applied per segment when pooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReduceKind {
    Sum,
    Mean,
    Max,
    Min,
}

impl ReduceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ReduceKind::Sum => "sum",
            ReduceKind::Mean => "mean",
            ReduceKind::Max => "max",
            ReduceKind::Min => "min",
        }
    }
}

impl FromStr for ReduceKind {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sum" => Ok(ReduceKind::Sum),
            "mean" => Ok(ReduceKind::Mean),
            "max" => Ok(ReduceKind::Max),
            "min" => Ok(ReduceKind::Min),
            other => Err(GraphError::configuration(format!(
                "unknown reduce type '{other}', expected one of sum, mean, max, min"
            ))),
        }
    }
}

impl fmt::Display for ReduceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnaryOp {
    Relu,
    Neg,
}

/// Serializable tensor constant embedded in a program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorLiteral {
    pub dtype: DType,
    pub dims: Vec<usize>,
    pub f32_values: Vec<f32>,
    pub i32_values: Vec<i32>,
}

impl TensorLiteral {
    pub fn from_tensor(tensor: &Tensor) -> GraphResult<Self> {
        let dims = tensor.shape().dims().to_vec();
        Ok(match tensor.dtype() {
            DType::F32 => TensorLiteral {
                dtype: DType::F32,
                dims,
                f32_values: tensor.to_f32_vec()?,
                i32_values: Vec::new(),
            },
            DType::I32 => TensorLiteral {
                dtype: DType::I32,
                dims,
                f32_values: Vec::new(),
                i32_values: tensor.to_i32_vec()?,
            },
        })
    }

    pub fn to_tensor(&self) -> GraphResult<Tensor> {
        match self.dtype {
            DType::F32 => Tensor::from_vec(self.dims.as_slice(), self.f32_values.clone()),
            DType::I32 => Tensor::from_i32(self.dims.as_slice(), self.i32_values.clone()),
        }
    }
}

/// Operation kinds understood by the interpreter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// The `index`-th flattened program input.
    Parameter { index: usize },
    Constant(TensorLiteral),
    /// `params[indices]` along the first axis.
    Gather,
    /// `(data, segment_ids, num_segments)` reduced per segment.
    SegmentReduce { reduce: ReduceKind },
    /// Sum of every element, rank 0 output.
    ReduceSum,
    /// Expands per-component sizes into one component id per item.
    RowIds,
    /// Extent of an axis as a rank-0 `i32`.
    Dim { axis: usize },
    Binary(BinaryOp),
    Unary(UnaryOp),
    MatMul,
    Concat { axis: usize },
    /// Passes `(value, count)` through when `value` has `count` rows.
    AssertLeading { context: String },
}

impl Operation {
    pub fn mnemonic(&self) -> String {
        match self {
            Operation::Parameter { index } => format!("parameter #{index}"),
            Operation::Constant(literal) => format!(
                "constant {}{:?}",
                literal.dtype, literal.dims
            ),
            Operation::Gather => "gather".to_string(),
            Operation::SegmentReduce { reduce } => format!("segment_{reduce}"),
            Operation::ReduceSum => "reduce_sum".to_string(),
            Operation::RowIds => "row_ids".to_string(),
            Operation::Dim { axis } => format!("dim[{axis}]"),
            Operation::Binary(op) => format!("{op:?}").to_lowercase(),
            Operation::Unary(op) => format!("{op:?}").to_lowercase(),
            Operation::MatMul => "matmul".to_string(),
            Operation::Concat { axis } => format!("concat[{axis}]"),
            Operation::AssertLeading { .. } => "assert_leading".to_string(),
        }
    }
}

/// One SSA instruction: `id = op(operands) : output`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub id: ValueId,
    pub op: Operation,
    pub operands: Vec<ValueId>,
    pub output: TensorSpec,
}

/// Straight-line program over flattened tensor inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    #[serde(default = "default_program_version")]
    pub version: String,
    pub parameters: Vec<TensorSpec>,
    pub body: Vec<Instruction>,
    pub results: Vec<ValueId>,
}

#[derive(Debug, Error)]
pub enum ProgramSerdeError {
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("program version '{found}' does not match expected '{expected}'")]
    VersionMismatch {
        found: String,
        expected: &'static str,
    },
}

#[derive(Debug, Error)]
pub enum ProgramIoError {
    #[error(transparent)]
    Serialization(#[from] ProgramSerdeError),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl Program {
    pub fn to_json_string(&self) -> Result<String, ProgramSerdeError> {
        serde_json::to_string_pretty(self).map_err(ProgramSerdeError::from)
    }

    pub fn from_json_str(src: &str) -> Result<Self, ProgramSerdeError> {
        let mut program: Program = serde_json::from_str(src).map_err(ProgramSerdeError::from)?;
        program.version = normalize_version(program.version)?;
        Ok(program)
    }

    pub fn to_bincode_bytes(&self) -> Result<Vec<u8>, ProgramSerdeError> {
        bincode::serialize(self).map_err(ProgramSerdeError::from)
    }

    pub fn from_bincode_slice(bytes: &[u8]) -> Result<Self, ProgramSerdeError> {
        let mut program: Program = bincode::deserialize(bytes).map_err(ProgramSerdeError::from)?;
        program.version = normalize_version(program.version)?;
        Ok(program)
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<(), ProgramIoError> {
        let contents = self.to_json_string()?;
        fs::write(path, contents).map_err(ProgramIoError::from)
    }

    pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self, ProgramIoError> {
        let contents = fs::read_to_string(path).map_err(ProgramIoError::from)?;
        Program::from_json_str(&contents).map_err(ProgramIoError::from)
    }

    pub fn save_bincode<P: AsRef<Path>>(&self, path: P) -> Result<(), ProgramIoError> {
        let bytes = self.to_bincode_bytes()?;
        fs::write(path, bytes).map_err(ProgramIoError::from)
    }

    pub fn load_bincode<P: AsRef<Path>>(path: P) -> Result<Self, ProgramIoError> {
        let bytes = fs::read(path).map_err(ProgramIoError::from)?;
        Program::from_bincode_slice(&bytes).map_err(ProgramIoError::from)
    }

    /// Executes the program on flattened inputs, returning flattened results.
    pub fn run(&self, inputs: &[Tensor]) -> GraphResult<Vec<Tensor>> {
        if inputs.len() != self.parameters.len() {
            return Err(GraphError::spec_mismatch(
                "program inputs",
                format!("{} tensors", self.parameters.len()),
                format!("{} tensors", inputs.len()),
            ));
        }
        for (index, (spec, tensor)) in self.parameters.iter().zip(inputs).enumerate() {
            if !spec.accepts(tensor) {
                return Err(GraphError::spec_mismatch(
                    format!("program input #{index}"),
                    spec,
                    tensor.spec(),
                ));
            }
        }

        let mut slots: Vec<Option<Tensor>> = vec![None; self.body.len()];
        for instruction in &self.body {
            let slot = instruction.id.0 as usize;
            if slot >= slots.len() {
                return Err(malformed(format!("instruction id {} out of range", instruction.id)));
            }
            let value = match &instruction.op {
                Operation::Parameter { index } => inputs
                    .get(*index)
                    .cloned()
                    .ok_or_else(|| malformed(format!("parameter #{index} out of range")))?,
                op => {
                    let operands = instruction
                        .operands
                        .iter()
                        .map(|id| {
                            slots
                                .get(id.0 as usize)
                                .and_then(Option::as_ref)
                                .ok_or_else(|| malformed(format!("{id} used before definition")))
                        })
                        .collect::<GraphResult<Vec<&Tensor>>>()?;
                    kernels::evaluate(op, &operands)?
                }
            };
            slots[slot] = Some(value);
        }

        self.results
            .iter()
            .map(|id| {
                slots
                    .get(id.0 as usize)
                    .and_then(Option::clone)
                    .ok_or_else(|| malformed(format!("result {id} is never defined")))
            })
            .collect()
    }
}

fn malformed(message: String) -> GraphError {
    GraphError::configuration(format!("malformed program: {message}"))
}

fn normalize_version(version: String) -> Result<String, ProgramSerdeError> {
    if version.is_empty() {
        return Ok(PROGRAM_VERSION.to_string());
    }
    if version == PROGRAM_VERSION {
        Ok(version)
    } else {
        Err(ProgramSerdeError::VersionMismatch {
            found: version,
            expected: PROGRAM_VERSION,
        })
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "program (version = {}) {{", self.version)?;
        for (index, spec) in self.parameters.iter().enumerate() {
            writeln!(f, "  input #{index} : {spec}")?;
        }
        for instruction in &self.body {
            write!(f, "  {} = {}", instruction.id, instruction.op.mnemonic())?;
            for (i, operand) in instruction.operands.iter().enumerate() {
                f.write_str(if i == 0 { " " } else { ", " })?;
                write!(f, "{operand}")?;
            }
            writeln!(f, " : {}", instruction.output)?;
        }
        f.write_str("  return")?;
        for (i, id) in self.results.iter().enumerate() {
            f.write_str(if i == 0 { " " } else { ", " })?;
            write!(f, "{id}")?;
        }
        writeln!(f)?;
        f.write_str("}\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Dimension;

    fn add_program() -> Program {
        let spec = TensorSpec::new(DType::F32, vec![Dimension::Dynamic]);
        Program {
            version: PROGRAM_VERSION.to_string(),
            parameters: vec![spec.clone()],
            body: vec![
                Instruction {
                    id: ValueId(0),
                    op: Operation::Parameter { index: 0 },
                    operands: vec![],
                    output: spec.clone(),
                },
                Instruction {
                    id: ValueId(1),
                    op: Operation::Binary(BinaryOp::Add),
                    operands: vec![ValueId(0), ValueId(0)],
                    output: spec,
                },
            ],
            results: vec![ValueId(1)],
        }
    }

    #[test]
    fn run_doubles_input() {
        let input = Tensor::from_vec([3], vec![1.0, 2.0, 3.0]).unwrap();
        let out = add_program().run(&[input]).unwrap();
        assert_eq!(out[0].as_f32().unwrap(), &[2.0, 4.0, 6.0]);
    }

    #[test]
    fn run_rejects_input_outside_signature() {
        let input = Tensor::from_i32([3], vec![1, 2, 3]).unwrap();
        let err = add_program().run(&[input]).unwrap_err();
        assert!(matches!(err, GraphError::SpecMismatch { .. }));
    }

    #[test]
    fn json_rejects_foreign_version() {
        let mut program = add_program();
        program.version = "other.v9".to_string();
        let json = serde_json::to_string(&program).unwrap();
        let err = Program::from_json_str(&json).unwrap_err();
        assert!(matches!(err, ProgramSerdeError::VersionMismatch { .. }));
    }

    #[test]
    fn bincode_preserves_program() {
        let program = add_program();
        let bytes = program.to_bincode_bytes().unwrap();
        assert_eq!(Program::from_bincode_slice(&bytes).unwrap(), program);
    }

    #[test]
    fn text_form_lists_instructions() {
        let text = add_program().to_string();
        assert!(text.contains("%1 = add %0, %0 : f32[?]"));
        assert!(text.contains("return %1"));
    }
}
