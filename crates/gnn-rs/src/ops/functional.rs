//! Tensor operators over [`Value`]s.
//!
//! Every operator validates its operands against their specs first. When all
//! operands are concrete the host kernel runs immediately; otherwise a symbolic
//! node with the inferred output spec is recorded for later lowering.

use super::kernels;
use super::program::{BinaryOp, Operation, ReduceKind, UnaryOp};
use crate::error::{GraphError, GraphResult};
use crate::tensor::{DType, Dimension, SymbolicTensor, Tensor, TensorSpec, Value};

fn apply(op: Operation, inputs: &[&Value], spec: TensorSpec) -> GraphResult<Value> {
    let concrete: Option<Vec<&Tensor>> = inputs.iter().map(|v| v.as_tensor()).collect();
    match concrete {
        Some(tensors) => kernels::evaluate(&op, &tensors).map(Value::Concrete),
        None => {
            let inputs = inputs.iter().map(|v| (*v).clone()).collect();
            Ok(Value::Symbolic(SymbolicTensor::new(op, inputs, spec)))
        }
    }
}

fn expect_dtype(context: &str, spec: &TensorSpec, dtype: DType) -> GraphResult<()> {
    if spec.dtype != dtype {
        return Err(GraphError::shape_mismatch(context, dtype, spec));
    }
    Ok(())
}

fn expect_rank(context: &str, spec: &TensorSpec, rank: usize) -> GraphResult<()> {
    if spec.rank() != rank {
        return Err(GraphError::shape_mismatch(context, format!("rank {rank}"), spec));
    }
    Ok(())
}

fn expect_min_rank(context: &str, spec: &TensorSpec, rank: usize) -> GraphResult<()> {
    if spec.rank() < rank {
        return Err(GraphError::shape_mismatch(context, format!("rank >= {rank}"), spec));
    }
    Ok(())
}

/// Gathers rows of `params` selected by the rank-1 `i32` `indices`.
pub fn gather(params: &Value, indices: &Value) -> GraphResult<Value> {
    let params_spec = params.spec();
    let indices_spec = indices.spec();
    expect_min_rank("gather params", &params_spec, 1)?;
    expect_dtype("gather indices", &indices_spec, DType::I32)?;
    expect_rank("gather indices", &indices_spec, 1)?;
    let spec = params_spec.with_leading(indices_spec.dims[0]);
    apply(Operation::Gather, &[params, indices], spec)
}

/// Reduces rows of `data` per segment id into `num_segments` rows.
pub fn segment_reduce(
    data: &Value,
    segment_ids: &Value,
    num_segments: &Value,
    reduce: ReduceKind,
) -> GraphResult<Value> {
    let data_spec = data.spec();
    let ids_spec = segment_ids.spec();
    let count_spec = num_segments.spec();
    expect_dtype("segment reduce data", &data_spec, DType::F32)?;
    expect_min_rank("segment reduce data", &data_spec, 1)?;
    expect_dtype("segment ids", &ids_spec, DType::I32)?;
    expect_rank("segment ids", &ids_spec, 1)?;
    expect_dtype("segment count", &count_spec, DType::I32)?;
    expect_rank("segment count", &count_spec, 0)?;
    if !data_spec.dims[0].is_compatible_with(ids_spec.dims[0]) {
        return Err(GraphError::shape_mismatch(
            "segment reduce",
            format!("{} segment ids", data_spec.dims[0]),
            format!("{} segment ids", ids_spec.dims[0]),
        ));
    }
    let leading = match num_segments.as_tensor() {
        Some(count) => Dimension::Static(count.to_count()?),
        None => Dimension::Dynamic,
    };
    let spec = data_spec.with_leading(leading);
    apply(
        Operation::SegmentReduce { reduce },
        &[data, segment_ids, num_segments],
        spec,
    )
}

/// Sums every element into a rank-0 value of the same dtype.
pub fn reduce_sum(input: &Value) -> GraphResult<Value> {
    let spec = TensorSpec::new(input.dtype(), Vec::new());
    apply(Operation::ReduceSum, &[input], spec)
}

/// Expands rank-1 component sizes into one component id per item.
pub fn row_ids(sizes: &Value) -> GraphResult<Value> {
    let sizes_spec = sizes.spec();
    expect_dtype("row_ids sizes", &sizes_spec, DType::I32)?;
    expect_rank("row_ids sizes", &sizes_spec, 1)?;
    let total = match sizes.as_tensor() {
        Some(tensor) => Dimension::Static(
            tensor
                .as_i32()?
                .iter()
                .map(|&s| s.max(0) as usize)
                .sum(),
        ),
        None => Dimension::Dynamic,
    };
    apply(
        Operation::RowIds,
        &[sizes],
        TensorSpec::new(DType::I32, vec![total]),
    )
}

/// Passes `value` through, failing with `ShapeMismatch` unless its first axis
/// has `count` rows. `count` is a rank-0 `i32`.
pub fn assert_leading(value: &Value, count: &Value, context: &str) -> GraphResult<Value> {
    let value_spec = value.spec();
    let count_spec = count.spec();
    expect_min_rank(context, &value_spec, 1)?;
    expect_dtype("row count", &count_spec, DType::I32)?;
    expect_rank("row count", &count_spec, 0)?;
    let leading = match count.as_tensor() {
        Some(count) => Dimension::Static(count.to_count()?),
        None => Dimension::Dynamic,
    };
    if !value_spec.dims[0].is_compatible_with(leading) {
        return Err(GraphError::shape_mismatch(
            context,
            format!("{leading} items"),
            format!("{} items", value_spec.dims[0]),
        ));
    }
    let spec = value_spec.with_leading(value_spec.dims[0].refine(leading));
    apply(
        Operation::AssertLeading {
            context: context.to_string(),
        },
        &[value, count],
        spec,
    )
}

/// Extent of `axis` as a rank-0 `i32`; folded to a constant when statically known.
pub fn dim(input: &Value, axis: usize) -> GraphResult<Value> {
    let extent = input.dim(axis).ok_or_else(|| {
        GraphError::shape_mismatch("dim", format!("rank > {axis}"), input.spec())
    })?;
    if let Dimension::Static(extent) = extent {
        let extent = i32::try_from(extent)
            .map_err(|_| GraphError::shape_mismatch("dim", "extent within i32 range", extent))?;
        return Ok(Value::Concrete(Tensor::scalar_i32(extent)));
    }
    apply(
        Operation::Dim { axis },
        &[input],
        TensorSpec::new(DType::I32, Vec::new()),
    )
}

fn broadcast_spec(op: BinaryOp, lhs: &TensorSpec, rhs: &TensorSpec) -> GraphResult<TensorSpec> {
    let context = format!("{op:?}").to_lowercase();
    if lhs.dtype != rhs.dtype {
        return Err(GraphError::shape_mismatch(
            context,
            format!("operands of dtype {}", lhs.dtype),
            rhs,
        ));
    }
    let rank = lhs.rank().max(rhs.rank());
    let pick = |spec: &TensorSpec, from_right: usize| {
        if from_right < spec.rank() {
            spec.dims[spec.rank() - 1 - from_right]
        } else {
            Dimension::Static(1)
        }
    };
    let mut dims = Vec::with_capacity(rank);
    for from_right in (0..rank).rev() {
        let dim = match (pick(lhs, from_right), pick(rhs, from_right)) {
            (a, b) if a == b => a,
            (Dimension::Static(1), b) => b,
            (a, Dimension::Static(1)) => a,
            (Dimension::Static(a), Dimension::Dynamic) => Dimension::Static(a),
            (Dimension::Dynamic, Dimension::Static(b)) => Dimension::Static(b),
            _ => {
                return Err(GraphError::shape_mismatch(
                    context,
                    format!("a shape broadcastable with {lhs}"),
                    rhs,
                ))
            }
        };
        dims.push(dim);
    }
    Ok(TensorSpec::new(lhs.dtype, dims))
}

fn binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> GraphResult<Value> {
    let spec = broadcast_spec(op, &lhs.spec(), &rhs.spec())?;
    apply(Operation::Binary(op), &[lhs, rhs], spec)
}

pub fn add(lhs: &Value, rhs: &Value) -> GraphResult<Value> {
    binary(BinaryOp::Add, lhs, rhs)
}

pub fn sub(lhs: &Value, rhs: &Value) -> GraphResult<Value> {
    binary(BinaryOp::Sub, lhs, rhs)
}

pub fn mul(lhs: &Value, rhs: &Value) -> GraphResult<Value> {
    binary(BinaryOp::Mul, lhs, rhs)
}

pub fn div(lhs: &Value, rhs: &Value) -> GraphResult<Value> {
    binary(BinaryOp::Div, lhs, rhs)
}

fn unary(op: UnaryOp, input: &Value) -> GraphResult<Value> {
    let spec = input.spec();
    expect_dtype(&format!("{op:?}").to_lowercase(), &spec, DType::F32)?;
    apply(Operation::Unary(op), &[input], spec)
}

pub fn relu(input: &Value) -> GraphResult<Value> {
    unary(UnaryOp::Relu, input)
}

pub fn neg(input: &Value) -> GraphResult<Value> {
    unary(UnaryOp::Neg, input)
}

/// `[n, k] x [k, m] -> [n, m]` over `f32`.
pub fn matmul(lhs: &Value, rhs: &Value) -> GraphResult<Value> {
    let (lhs_spec, rhs_spec) = (lhs.spec(), rhs.spec());
    expect_dtype("matmul lhs", &lhs_spec, DType::F32)?;
    expect_dtype("matmul rhs", &rhs_spec, DType::F32)?;
    expect_rank("matmul lhs", &lhs_spec, 2)?;
    expect_rank("matmul rhs", &rhs_spec, 2)?;
    if !lhs_spec.dims[1].is_compatible_with(rhs_spec.dims[0]) {
        return Err(GraphError::shape_mismatch(
            "matmul",
            format!("rhs with {} rows", lhs_spec.dims[1]),
            &rhs_spec,
        ));
    }
    let spec = TensorSpec::new(DType::F32, vec![lhs_spec.dims[0], rhs_spec.dims[1]]);
    apply(Operation::MatMul, &[lhs, rhs], spec)
}

/// Concatenates values along `axis`; all other dims must agree.
pub fn concat(inputs: &[Value], axis: usize) -> GraphResult<Value> {
    let first = inputs
        .first()
        .ok_or_else(|| GraphError::shape_mismatch("concat", "at least one input", 0))?
        .spec();
    if axis >= first.rank() {
        return Err(GraphError::shape_mismatch("concat", format!("rank > {axis}"), &first));
    }
    let mut dims = first.dims.clone();
    let mut axis_total = Some(0usize);
    for input in inputs {
        let spec = input.spec();
        if spec.dtype != first.dtype || spec.rank() != first.rank() {
            return Err(GraphError::shape_mismatch(
                "concat",
                format!("inputs like {first}"),
                &spec,
            ));
        }
        for (i, (merged, &dim)) in dims.iter_mut().zip(&spec.dims).enumerate() {
            if i == axis {
                continue;
            }
            if !merged.is_compatible_with(dim) {
                return Err(GraphError::shape_mismatch(
                    format!("concat outside axis {axis}"),
                    format!("inputs like {first}"),
                    &spec,
                ));
            }
            *merged = merged.refine(dim);
        }
        axis_total = match (axis_total, spec.dims[axis]) {
            (Some(total), Dimension::Static(extent)) => Some(total + extent),
            _ => None,
        };
    }
    dims[axis] = axis_total.map_or(Dimension::Dynamic, Dimension::Static);
    let refs: Vec<&Value> = inputs.iter().collect();
    apply(
        Operation::Concat { axis },
        &refs,
        TensorSpec::new(first.dtype, dims),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn placeholder(dims: Vec<Dimension>) -> Value {
        Value::Symbolic(SymbolicTensor::placeholder(0, TensorSpec::new(DType::F32, dims)))
    }

    #[test]
    fn concrete_operands_evaluate_eagerly() {
        let a = Value::from(Tensor::from_vec([2], vec![1.0, 2.0]).unwrap());
        let b = Value::from(Tensor::from_vec([2], vec![3.0, 4.0]).unwrap());
        let sum = add(&a, &b).unwrap();
        assert_eq!(sum.as_tensor().unwrap().as_f32().unwrap(), &[4.0, 6.0]);
    }

    #[test]
    fn symbolic_operand_records_inferred_spec() {
        let x = placeholder(vec![Dimension::Dynamic, Dimension::Static(3)]);
        let kernel = Value::from(Tensor::zeros([3, 2]));
        let y = matmul(&x, &kernel).unwrap();
        assert!(y.is_symbolic());
        assert_eq!(y.spec().to_string(), "f32[?, 2]");
    }

    #[test]
    fn concat_refines_dynamic_dims() {
        let a = placeholder(vec![Dimension::Dynamic, Dimension::Static(2)]);
        let b = Value::from(Tensor::zeros([4, 1]));
        let c = concat(&[a, b], 1).unwrap();
        assert_eq!(c.spec().to_string(), "f32[4, 3]");
    }

    #[test]
    fn static_dim_folds_to_constant() {
        let x = placeholder(vec![Dimension::Static(5), Dimension::Dynamic]);
        let d = dim(&x, 0).unwrap();
        assert_eq!(d.as_tensor().unwrap().to_count().unwrap(), 5);
        assert!(dim(&x, 1).unwrap().is_symbolic());
    }

    #[test]
    fn incompatible_static_dims_fail_while_tracing() {
        let x = placeholder(vec![Dimension::Dynamic, Dimension::Static(3)]);
        let kernel = Value::from(Tensor::zeros([2, 2]));
        assert!(matches!(
            matmul(&x, &kernel).unwrap_err(),
            GraphError::ShapeMismatch { .. }
        ));
    }
}
