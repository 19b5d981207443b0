//! Tensor operators, the program IR, and symbolic lowering.

pub mod functional;
pub mod kernels;
pub mod program;
pub mod trace;

pub use program::{
    BinaryOp, Instruction, Operation, Program, ProgramIoError, ProgramSerdeError, ReduceKind,
    TensorLiteral, UnaryOp, ValueId, PROGRAM_VERSION,
};
pub use trace::lower_to_program;
