//! Eager host kernels shared by direct execution and the program interpreter.

use super::program::{BinaryOp, Operation, ReduceKind, UnaryOp};
use crate::error::{GraphError, GraphResult};
use crate::tensor::{DType, Shape, Tensor};

/// Evaluates a non-parameter operation on concrete operands.
pub(crate) fn evaluate(op: &Operation, operands: &[&Tensor]) -> GraphResult<Tensor> {
    match (op, operands) {
        (Operation::Constant(literal), []) => literal.to_tensor(),
        (Operation::Gather, [params, indices]) => gather(params, indices),
        (Operation::SegmentReduce { reduce }, [data, ids, num_segments]) => {
            segment_reduce(data, ids, num_segments.to_count()?, *reduce)
        }
        (Operation::ReduceSum, [input]) => reduce_sum(input),
        (Operation::RowIds, [sizes]) => row_ids(sizes),
        (Operation::Dim { axis }, [input]) => dim(input, *axis),
        (Operation::Binary(op), [lhs, rhs]) => binary(*op, lhs, rhs),
        (Operation::Unary(op), [input]) => unary(*op, input),
        (Operation::MatMul, [lhs, rhs]) => matmul(lhs, rhs),
        (Operation::Concat { axis }, inputs) if !inputs.is_empty() => concat(inputs, *axis),
        (Operation::AssertLeading { context }, [value, count]) => {
            assert_leading(value, count.to_count()?, context)
        }
        (op, operands) => Err(GraphError::configuration(format!(
            "operation {} cannot be evaluated with {} operands",
            op.mnemonic(),
            operands.len()
        ))),
    }
}

/// Gathers rows of `params` along the first axis.
pub fn gather(params: &Tensor, indices: &Tensor) -> GraphResult<Tensor> {
    let rows = params.shape().leading().ok_or_else(|| {
        GraphError::shape_mismatch("gather params", "rank >= 1", params.shape())
    })?;
    let indices_values = indices.as_i32()?;
    if indices.shape().rank() != 1 {
        return Err(GraphError::shape_mismatch(
            "gather indices",
            "rank 1",
            indices.shape(),
        ));
    }
    for (position, &index) in indices_values.iter().enumerate() {
        if index < 0 || index as usize >= rows {
            return Err(GraphError::shape_mismatch(
                "gather",
                format!("indices in [0, {rows})"),
                format!("index {index} at position {position}"),
            ));
        }
    }
    let row_len = params.shape().row_len();
    let shape = params.shape().with_leading(indices_values.len());
    match params.dtype() {
        DType::F32 => Tensor::from_vec(shape, gather_rows(params.as_f32()?, indices_values, row_len)),
        DType::I32 => Tensor::from_i32(shape, gather_rows(params.as_i32()?, indices_values, row_len)),
    }
}

fn gather_rows<T: Copy>(data: &[T], indices: &[i32], row_len: usize) -> Vec<T> {
    let mut out = Vec::with_capacity(indices.len() * row_len);
    for &index in indices {
        let start = index as usize * row_len;
        out.extend_from_slice(&data[start..start + row_len]);
    }
    out
}

/// Reduces rows of `data` into `num_segments` buckets selected by `segment_ids`.
///
/// Empty segments produce zero for every reduction. Sum and mean accumulate the
/// sorted contributions of each segment in `f64`, so the result does not depend
/// on the order in which items appear.
pub fn segment_reduce(
    data: &Tensor,
    segment_ids: &Tensor,
    num_segments: usize,
    reduce: ReduceKind,
) -> GraphResult<Tensor> {
    let values = data.as_f32()?;
    let ids = segment_ids.as_i32()?;
    let rows = data.shape().leading().ok_or_else(|| {
        GraphError::shape_mismatch("segment reduce data", "rank >= 1", data.shape())
    })?;
    if ids.len() != rows {
        return Err(GraphError::shape_mismatch(
            "segment reduce",
            format!("{rows} segment ids"),
            format!("{} segment ids", ids.len()),
        ));
    }

    let mut buckets: Vec<Vec<usize>> = vec![Vec::new(); num_segments];
    for (row, &id) in ids.iter().enumerate() {
        if id < 0 || id as usize >= num_segments {
            return Err(GraphError::shape_mismatch(
                "segment reduce",
                format!("segment ids in [0, {num_segments})"),
                format!("id {id} at position {row}"),
            ));
        }
        buckets[id as usize].push(row);
    }

    let row_len = data.shape().row_len();
    let mut out = vec![0.0f32; num_segments * row_len];
    let mut column = Vec::new();
    for (segment, members) in buckets.iter().enumerate() {
        if members.is_empty() {
            continue;
        }
        for offset in 0..row_len {
            column.clear();
            column.extend(members.iter().map(|&row| values[row * row_len + offset]));
            out[segment * row_len + offset] = reduce_column(&mut column, reduce);
        }
    }
    Tensor::from_vec(data.shape().with_leading(num_segments), out)
}

fn reduce_column(column: &mut [f32], reduce: ReduceKind) -> f32 {
    match reduce {
        ReduceKind::Sum | ReduceKind::Mean => {
            column.sort_by(f32::total_cmp);
            let sum: f64 = column.iter().map(|&v| f64::from(v)).sum();
            let result = if reduce == ReduceKind::Mean {
                sum / column.len() as f64
            } else {
                sum
            };
            result as f32
        }
        ReduceKind::Max => column
            .iter()
            .copied()
            .max_by(f32::total_cmp)
            .unwrap_or(0.0),
        ReduceKind::Min => column
            .iter()
            .copied()
            .min_by(f32::total_cmp)
            .unwrap_or(0.0),
    }
}

/// Returns `value` unchanged if its first axis has `count` rows.
pub fn assert_leading(value: &Tensor, count: usize, context: &str) -> GraphResult<Tensor> {
    let leading = value
        .shape()
        .leading()
        .ok_or_else(|| GraphError::shape_mismatch(context, "rank >= 1", value.shape()))?;
    if leading != count {
        return Err(GraphError::shape_mismatch(
            context,
            format!("{count} items"),
            format!("{leading} items"),
        ));
    }
    Ok(value.clone())
}

pub fn reduce_sum(input: &Tensor) -> GraphResult<Tensor> {
    match input.dtype() {
        DType::F32 => {
            let sum: f64 = input.as_f32()?.iter().map(|&v| f64::from(v)).sum();
            Tensor::from_vec(Shape::scalar(), vec![sum as f32])
        }
        DType::I32 => {
            let sum: i64 = input.as_i32()?.iter().map(|&v| i64::from(v)).sum();
            let sum = i32::try_from(sum).map_err(|_| {
                GraphError::shape_mismatch("reduce_sum", "a sum within i32 range", sum)
            })?;
            Ok(Tensor::scalar_i32(sum))
        }
    }
}

/// Expands component sizes `[2, 3]` into row ids `[0, 0, 1, 1, 1]`.
pub fn row_ids(sizes: &Tensor) -> GraphResult<Tensor> {
    if sizes.shape().rank() != 1 {
        return Err(GraphError::shape_mismatch("row_ids", "rank-1 sizes", sizes.shape()));
    }
    let mut ids = Vec::new();
    for (component, &size) in sizes.as_i32()?.iter().enumerate() {
        if size < 0 {
            return Err(GraphError::shape_mismatch(
                "row_ids",
                "non-negative sizes",
                format!("size {size} for component {component}"),
            ));
        }
        let component = i32::try_from(component)
            .map_err(|_| GraphError::shape_mismatch("row_ids", "fewer components", component))?;
        ids.extend(std::iter::repeat(component).take(size as usize));
    }
    Ok(Tensor::vector_i32(ids))
}

pub fn dim(input: &Tensor, axis: usize) -> GraphResult<Tensor> {
    let extent = input.shape().dims().get(axis).copied().ok_or_else(|| {
        GraphError::shape_mismatch("dim", format!("rank > {axis}"), input.shape())
    })?;
    let extent = i32::try_from(extent)
        .map_err(|_| GraphError::shape_mismatch("dim", "extent within i32 range", extent))?;
    Ok(Tensor::scalar_i32(extent))
}

/// Computes the numpy-style broadcast of two shapes.
pub fn broadcast_dims(lhs: &[usize], rhs: &[usize]) -> Option<Vec<usize>> {
    let rank = lhs.len().max(rhs.len());
    let mut out = vec![0; rank];
    for i in 0..rank {
        let a = dim_from_right(lhs, rank - 1 - i);
        let b = dim_from_right(rhs, rank - 1 - i);
        out[i] = match (a, b) {
            (a, b) if a == b => a,
            (1, b) => b,
            (a, 1) => a,
            _ => return None,
        };
    }
    Some(out)
}

fn dim_from_right(dims: &[usize], from_right: usize) -> usize {
    if from_right < dims.len() {
        dims[dims.len() - 1 - from_right]
    } else {
        1
    }
}

/// Maps each output position to the flat offset of a broadcast operand.
fn broadcast_offsets(operand: &[usize], out: &[usize]) -> Vec<usize> {
    let rank = out.len();
    let pad = rank - operand.len();
    let mut strides = vec![0usize; rank];
    let mut stride = 1;
    for axis in (0..operand.len()).rev() {
        if operand[axis] != 1 {
            strides[axis + pad] = stride;
        }
        stride *= operand[axis];
    }
    let total: usize = out.iter().product();
    let mut offsets = Vec::with_capacity(total);
    let mut index = vec![0usize; rank];
    for _ in 0..total {
        offsets.push(index.iter().zip(&strides).map(|(i, s)| i * s).sum());
        for axis in (0..rank).rev() {
            index[axis] += 1;
            if index[axis] < out[axis] {
                break;
            }
            index[axis] = 0;
        }
    }
    offsets
}

pub fn binary(op: BinaryOp, lhs: &Tensor, rhs: &Tensor) -> GraphResult<Tensor> {
    if lhs.dtype() != rhs.dtype() {
        return Err(GraphError::shape_mismatch(
            format!("{op:?}").to_lowercase(),
            format!("operands of dtype {}", lhs.dtype()),
            rhs.dtype(),
        ));
    }
    let dims = broadcast_dims(lhs.shape().dims(), rhs.shape().dims()).ok_or_else(|| {
        GraphError::shape_mismatch(
            format!("{op:?}").to_lowercase(),
            format!("a shape broadcastable with {}", lhs.shape()),
            rhs.shape(),
        )
    })?;
    let lhs_offsets = broadcast_offsets(lhs.shape().dims(), &dims);
    let rhs_offsets = broadcast_offsets(rhs.shape().dims(), &dims);
    match lhs.dtype() {
        DType::F32 => {
            let (a, b) = (lhs.as_f32()?, rhs.as_f32()?);
            let f = |x: f32, y: f32| match op {
                BinaryOp::Add => x + y,
                BinaryOp::Sub => x - y,
                BinaryOp::Mul => x * y,
                BinaryOp::Div => x / y,
            };
            let out = lhs_offsets
                .iter()
                .zip(&rhs_offsets)
                .map(|(&i, &j)| f(a[i], b[j]))
                .collect();
            Tensor::from_vec(dims, out)
        }
        DType::I32 => {
            let (a, b) = (lhs.as_i32()?, rhs.as_i32()?);
            let mut out = Vec::with_capacity(lhs_offsets.len());
            for (&i, &j) in lhs_offsets.iter().zip(&rhs_offsets) {
                let value = match op {
                    BinaryOp::Add => a[i].checked_add(b[j]),
                    BinaryOp::Sub => a[i].checked_sub(b[j]),
                    BinaryOp::Mul => a[i].checked_mul(b[j]),
                    BinaryOp::Div => a[i].checked_div(b[j]),
                };
                out.push(value.ok_or_else(|| {
                    GraphError::shape_mismatch(
                        format!("{op:?}").to_lowercase(),
                        "a result within i32 range",
                        format!("{} and {}", a[i], b[j]),
                    )
                })?);
            }
            Tensor::from_i32(dims, out)
        }
    }
}

pub fn unary(op: UnaryOp, input: &Tensor) -> GraphResult<Tensor> {
    let values = input.as_f32()?;
    let out = match op {
        UnaryOp::Relu => values.iter().map(|&v| v.max(0.0)).collect(),
        UnaryOp::Neg => values.iter().map(|&v| -v).collect(),
    };
    Tensor::from_vec(input.shape().clone(), out)
}

/// `[n, k] x [k, m] -> [n, m]`.
pub fn matmul(lhs: &Tensor, rhs: &Tensor) -> GraphResult<Tensor> {
    let (&[n, k], &[k2, m]) = (lhs.shape().dims(), rhs.shape().dims()) else {
        return Err(GraphError::shape_mismatch(
            "matmul",
            "rank-2 operands",
            format!("{} x {}", lhs.shape(), rhs.shape()),
        ));
    };
    if k != k2 {
        return Err(GraphError::shape_mismatch(
            "matmul",
            format!("rhs with {k} rows"),
            rhs.shape(),
        ));
    }
    let (a, b) = (lhs.as_f32()?, rhs.as_f32()?);
    let mut out = vec![0.0f32; n * m];
    for i in 0..n {
        let row = &a[i * k..(i + 1) * k];
        let dst = &mut out[i * m..(i + 1) * m];
        for (p, &scale) in row.iter().enumerate() {
            let b_row = &b[p * m..(p + 1) * m];
            for (d, &v) in dst.iter_mut().zip(b_row) {
                *d += scale * v;
            }
        }
    }
    Tensor::from_vec([n, m], out)
}

pub fn concat(inputs: &[&Tensor], axis: usize) -> GraphResult<Tensor> {
    let first = inputs
        .first()
        .ok_or_else(|| GraphError::shape_mismatch("concat", "at least one input", 0))?;
    let rank = first.shape().rank();
    if axis >= rank {
        return Err(GraphError::shape_mismatch(
            "concat",
            format!("rank > {axis}"),
            first.shape(),
        ));
    }
    let mut axis_total = 0;
    for input in inputs {
        let dims = input.shape().dims();
        let compatible = input.dtype() == first.dtype()
            && dims.len() == rank
            && dims
                .iter()
                .zip(first.shape().dims())
                .enumerate()
                .all(|(i, (a, b))| i == axis || a == b);
        if !compatible {
            return Err(GraphError::shape_mismatch(
                "concat",
                format!("{}{} outside axis {axis}", first.dtype(), first.shape()),
                format!("{}{}", input.dtype(), input.shape()),
            ));
        }
        axis_total += dims[axis];
    }
    let outer: usize = first.shape().dims()[..axis].iter().product();
    let mut dims = first.shape().dims().to_vec();
    dims[axis] = axis_total;
    let inner = |t: &Tensor| t.shape().dims()[axis..].iter().product::<usize>();
    match first.dtype() {
        DType::F32 => {
            let parts = inputs
                .iter()
                .map(|t| Ok((t.as_f32()?, inner(*t))))
                .collect::<GraphResult<Vec<_>>>()?;
            Tensor::from_vec(dims, interleave(&parts, outer))
        }
        DType::I32 => {
            let parts = inputs
                .iter()
                .map(|t| Ok((t.as_i32()?, inner(*t))))
                .collect::<GraphResult<Vec<_>>>()?;
            Tensor::from_i32(dims, interleave(&parts, outer))
        }
    }
}

fn interleave<T: Copy>(parts: &[(&[T], usize)], outer: usize) -> Vec<T> {
    let mut out = Vec::with_capacity(parts.iter().map(|(data, _)| data.len()).sum());
    for o in 0..outer {
        for (data, chunk) in parts {
            out.extend_from_slice(&data[o * chunk..(o + 1) * chunk]);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_sum_leaves_empty_segments_zero() {
        let data = Tensor::from_vec([3, 1], vec![1.0, 2.0, 4.0]).unwrap();
        let ids = Tensor::vector_i32(vec![0, 0, 2]);
        let out = segment_reduce(&data, &ids, 4, ReduceKind::Sum).unwrap();
        assert_eq!(out.as_f32().unwrap(), &[3.0, 0.0, 4.0, 0.0]);
    }

    #[test]
    fn segment_max_and_mean() {
        let data = Tensor::from_vec([3, 2], vec![1.0, -1.0, 3.0, -5.0, 2.0, 0.0]).unwrap();
        let ids = Tensor::vector_i32(vec![0, 0, 1]);
        let max = segment_reduce(&data, &ids, 2, ReduceKind::Max).unwrap();
        assert_eq!(max.as_f32().unwrap(), &[3.0, -1.0, 2.0, 0.0]);
        let mean = segment_reduce(&data, &ids, 2, ReduceKind::Mean).unwrap();
        assert_eq!(mean.as_f32().unwrap(), &[2.0, -3.0, 2.0, 0.0]);
    }

    #[test]
    fn assert_leading_checks_row_count() {
        let rows = Tensor::zeros([4, 2]);
        assert_eq!(assert_leading(&rows, 4, "rows").unwrap(), rows);
        let err = assert_leading(&rows, 2, "node set 'node' feature 'h'").unwrap_err();
        assert!(matches!(err, GraphError::ShapeMismatch { .. }));
    }

    #[test]
    fn gather_rejects_out_of_range_index() {
        let params = Tensor::from_vec([2, 1], vec![1.0, 2.0]).unwrap();
        let err = gather(&params, &Tensor::vector_i32(vec![0, 2])).unwrap_err();
        assert!(matches!(err, GraphError::ShapeMismatch { .. }));
    }

    #[test]
    fn binary_broadcasts_column_against_matrix() {
        let weights = Tensor::from_vec([2, 1], vec![0.5, -0.5]).unwrap();
        let states = Tensor::from_vec([2, 2], vec![12.0, 0.0, 10.0, 0.0]).unwrap();
        let out = binary(BinaryOp::Mul, &weights, &states).unwrap();
        assert_eq!(out.as_f32().unwrap(), &[6.0, 0.0, -5.0, 0.0]);
    }

    #[test]
    fn concat_along_last_axis() {
        let a = Tensor::from_vec([2, 1], vec![1.0, 2.0]).unwrap();
        let b = Tensor::from_vec([2, 2], vec![3.0, 4.0, 5.0, 6.0]).unwrap();
        let out = concat(&[&a, &b], 1).unwrap();
        assert_eq!(out.shape().dims(), &[2, 3]);
        assert_eq!(out.as_f32().unwrap(), &[1.0, 3.0, 4.0, 2.0, 5.0, 6.0]);
    }

    #[test]
    fn row_ids_expand_sizes() {
        let ids = row_ids(&Tensor::vector_i32(vec![2, 0, 1])).unwrap();
        assert_eq!(ids.as_i32().unwrap(), &[0, 0, 2]);
    }
}
