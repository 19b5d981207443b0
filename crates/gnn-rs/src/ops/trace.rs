//! Lowers symbolic value graphs into a flat [`Program`].

use std::collections::HashMap;

use tracing::debug;

use super::program::{Instruction, Operation, Program, TensorLiteral, ValueId, PROGRAM_VERSION};
use crate::error::{GraphError, GraphResult};
use crate::tensor::{SymbolicTensor, Tensor, TensorSpec, Value};

#[derive(Default)]
struct Lowering {
    body: Vec<Instruction>,
    nodes: HashMap<usize, ValueId>,
    constants: HashMap<(usize, Vec<usize>), ValueId>,
}

impl Lowering {
    fn push(&mut self, op: Operation, operands: Vec<ValueId>, output: TensorSpec) -> ValueId {
        let id = ValueId(self.body.len() as u32);
        self.body.push(Instruction {
            id,
            op,
            operands,
            output,
        });
        id
    }

    fn constant(&mut self, tensor: &Tensor) -> GraphResult<ValueId> {
        // Reshaped views share a payload, so the shape is part of the key.
        let key = (tensor.storage_key(), tensor.shape().dims().to_vec());
        if let Some(&id) = self.constants.get(&key) {
            if self.body[id.0 as usize].output.dtype == tensor.dtype() {
                return Ok(id);
            }
        }
        let id = self.push(
            Operation::Constant(TensorLiteral::from_tensor(tensor)?),
            Vec::new(),
            tensor.spec(),
        );
        self.constants.insert(key, id);
        Ok(id)
    }

    fn operand(&mut self, value: &Value) -> GraphResult<ValueId> {
        match value {
            Value::Concrete(tensor) => self.constant(tensor),
            Value::Symbolic(symbolic) => self.nodes.get(&symbolic.key()).copied().ok_or_else(|| {
                GraphError::configuration(format!(
                    "symbolic operand {} lowered before its producer",
                    symbolic.spec()
                ))
            }),
        }
    }

    fn lower(&mut self, root: &SymbolicTensor, num_parameters: usize) -> GraphResult<ValueId> {
        let mut stack = vec![(root.clone(), false)];
        while let Some((node, expanded)) = stack.pop() {
            if self.nodes.contains_key(&node.key()) {
                continue;
            }
            if !expanded {
                stack.push((node.clone(), true));
                for input in node.inputs().iter().rev() {
                    if let Value::Symbolic(child) = input {
                        if !self.nodes.contains_key(&child.key()) {
                            stack.push((child.clone(), false));
                        }
                    }
                }
                continue;
            }
            if let Operation::Parameter { index } = node.op() {
                if *index >= num_parameters {
                    return Err(GraphError::configuration(format!(
                        "placeholder #{index} is not an input of the traced program"
                    )));
                }
            }
            let operands = node
                .inputs()
                .iter()
                .map(|input| self.operand(input))
                .collect::<GraphResult<Vec<_>>>()?;
            let id = self.push(node.op().clone(), operands, node.spec().clone());
            self.nodes.insert(node.key(), id);
        }
        self.operand(&Value::Symbolic(root.clone()))
    }
}

/// Builds a program whose inputs are `parameters` and whose results are `outputs`.
///
/// Shared sub-expressions are emitted once. Concrete outputs and concrete
/// operands become constants.
pub fn lower_to_program(parameters: Vec<TensorSpec>, outputs: &[Value]) -> GraphResult<Program> {
    let mut lowering = Lowering::default();
    let mut results = Vec::with_capacity(outputs.len());
    for output in outputs {
        let id = match output {
            Value::Concrete(tensor) => lowering.constant(tensor)?,
            Value::Symbolic(symbolic) => lowering.lower(symbolic, parameters.len())?,
        };
        results.push(id);
    }
    debug!(
        instructions = lowering.body.len(),
        inputs = parameters.len(),
        results = results.len(),
        "lowered traced values to program"
    );
    Ok(Program {
        version: PROGRAM_VERSION.to_string(),
        parameters,
        body: lowering.body,
        results,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::functional;
    use crate::tensor::{DType, Dimension};

    #[test]
    fn shared_subexpressions_are_emitted_once() {
        let spec = TensorSpec::new(DType::F32, vec![Dimension::Dynamic, Dimension::Static(2)]);
        let x = Value::Symbolic(SymbolicTensor::placeholder(0, spec.clone()));
        let y = functional::relu(&x).unwrap();
        let z = functional::add(&y, &y).unwrap();
        let program = lower_to_program(vec![spec], &[z, y]).unwrap();
        // parameter, relu, add
        assert_eq!(program.body.len(), 3);
        assert_eq!(program.results, vec![ValueId(2), ValueId(1)]);

        let input = Tensor::from_vec([2, 2], vec![-1.0, 2.0, 3.0, -4.0]).unwrap();
        let out = program.run(&[input]).unwrap();
        assert_eq!(out[0].as_f32().unwrap(), &[0.0, 4.0, 6.0, 0.0]);
    }

    #[test]
    fn out_of_range_placeholder_is_rejected() {
        let spec = TensorSpec::new(DType::F32, vec![Dimension::Dynamic]);
        let x = Value::Symbolic(SymbolicTensor::placeholder(3, spec.clone()));
        assert!(lower_to_program(vec![spec], &[x]).is_err());
    }
}
