//! Host-backed tensor used for features, indices, weights, and literals.

use std::fmt;
use std::sync::Arc;

use super::{DType, Shape, TensorSpec};
use crate::error::{GraphError, GraphResult};

#[derive(Clone, PartialEq)]
enum TensorData {
    F32(Arc<[f32]>),
    I32(Arc<[i32]>),
}

/// Immutable dense tensor. Clones share the payload.
#[derive(Clone, PartialEq)]
pub struct Tensor {
    shape: Shape,
    data: TensorData,
}

impl Tensor {
    /// Constructs an `F32` tensor from raw values, validating the length against the shape.
    pub fn from_vec(shape: impl Into<Shape>, data: Vec<f32>) -> GraphResult<Self> {
        let shape = shape.into();
        check_len(&shape, data.len())?;
        Ok(Tensor {
            shape,
            data: TensorData::F32(data.into()),
        })
    }

    /// Constructs an `I32` tensor, ensuring the payload matches the expected element count.
    pub fn from_i32(shape: impl Into<Shape>, data: Vec<i32>) -> GraphResult<Self> {
        let shape = shape.into();
        check_len(&shape, data.len())?;
        Ok(Tensor {
            shape,
            data: TensorData::I32(data.into()),
        })
    }

    /// Rank-1 `I32` tensor, the layout used for sizes and adjacency indices.
    pub fn vector_i32(values: Vec<i32>) -> Self {
        Tensor {
            shape: Shape::new([values.len()]),
            data: TensorData::I32(values.into()),
        }
    }

    pub fn scalar_i32(value: i32) -> Self {
        Tensor {
            shape: Shape::scalar(),
            data: TensorData::I32(Arc::from(vec![value])),
        }
    }

    /// Returns a zero-initialized `F32` tensor of the requested shape.
    pub fn zeros(shape: impl Into<Shape>) -> Self {
        let shape = shape.into();
        let len = shape.num_elements();
        Tensor {
            shape,
            data: TensorData::F32(vec![0.0; len].into()),
        }
    }

    /// Returns a zero-filled tensor of either dtype.
    pub fn zeros_like_spec(dtype: DType, shape: impl Into<Shape>) -> Self {
        let shape = shape.into();
        let len = shape.num_elements();
        let data = match dtype {
            DType::F32 => TensorData::F32(vec![0.0; len].into()),
            DType::I32 => TensorData::I32(vec![0; len].into()),
        };
        Tensor { shape, data }
    }

    /// Returns the total number of elements stored in the tensor.
    pub fn len(&self) -> usize {
        self.shape.num_elements()
    }

    /// Reports whether the tensor contains zero elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        match self.data {
            TensorData::F32(_) => DType::F32,
            TensorData::I32(_) => DType::I32,
        }
    }

    pub fn spec(&self) -> TensorSpec {
        TensorSpec::of(self)
    }

    /// Borrows the `f32` payload, failing if the tensor holds another dtype.
    pub fn as_f32(&self) -> GraphResult<&[f32]> {
        match &self.data {
            TensorData::F32(values) => Ok(values),
            TensorData::I32(_) => Err(GraphError::shape_mismatch(
                "tensor payload",
                DType::F32,
                DType::I32,
            )),
        }
    }

    /// Borrows the `i32` payload, failing if the tensor holds another dtype.
    pub fn as_i32(&self) -> GraphResult<&[i32]> {
        match &self.data {
            TensorData::I32(values) => Ok(values),
            TensorData::F32(_) => Err(GraphError::shape_mismatch(
                "tensor payload",
                DType::I32,
                DType::F32,
            )),
        }
    }

    pub fn to_f32_vec(&self) -> GraphResult<Vec<f32>> {
        self.as_f32().map(<[f32]>::to_vec)
    }

    pub fn to_i32_vec(&self) -> GraphResult<Vec<i32>> {
        self.as_i32().map(<[i32]>::to_vec)
    }

    /// Reads a rank-0 (or single element) `I32` tensor as a non-negative count.
    pub fn to_count(&self) -> GraphResult<usize> {
        let values = self.as_i32()?;
        match values {
            [value] if *value >= 0 => Ok(*value as usize),
            [value] => Err(GraphError::shape_mismatch(
                "count",
                "a non-negative integer",
                value,
            )),
            _ => Err(GraphError::shape_mismatch(
                "count",
                "a single element",
                self.shape(),
            )),
        }
    }

    /// Returns a tensor sharing this payload under a new shape with the same element count.
    pub fn reshape(&self, shape: impl Into<Shape>) -> GraphResult<Tensor> {
        let shape = shape.into();
        if shape.num_elements() != self.len() {
            return Err(GraphError::shape_mismatch(
                "reshape",
                format!("{} elements", self.len()),
                format!("shape {shape}"),
            ));
        }
        Ok(Tensor {
            shape,
            data: self.data.clone(),
        })
    }

    /// Stable address of the payload, used to deduplicate constants when tracing.
    pub(crate) fn storage_key(&self) -> usize {
        match &self.data {
            TensorData::F32(values) => values.as_ptr() as usize,
            TensorData::I32(values) => values.as_ptr() as usize,
        }
    }

    /// Serializes the payload as little-endian bytes.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        match &self.data {
            TensorData::F32(values) => values.iter().flat_map(|v| v.to_le_bytes()).collect(),
            TensorData::I32(values) => values.iter().flat_map(|v| v.to_le_bytes()).collect(),
        }
    }

    /// Reconstructs a tensor from a little-endian byte payload.
    pub fn from_le_bytes(dtype: DType, shape: impl Into<Shape>, bytes: &[u8]) -> GraphResult<Self> {
        let shape = shape.into();
        let expected = shape.num_elements() * dtype.size_in_bytes();
        if bytes.len() != expected {
            return Err(GraphError::shape_mismatch(
                "tensor bytes",
                format!("{expected} bytes for {dtype}{shape}"),
                format!("{} bytes", bytes.len()),
            ));
        }
        let chunks = bytes.chunks_exact(4).map(|c| [c[0], c[1], c[2], c[3]]);
        match dtype {
            DType::F32 => Tensor::from_vec(shape, chunks.map(f32::from_le_bytes).collect()),
            DType::I32 => Tensor::from_i32(shape, chunks.map(i32::from_le_bytes).collect()),
        }
    }
}

fn check_len(shape: &Shape, len: usize) -> GraphResult<()> {
    if len != shape.num_elements() {
        return Err(GraphError::shape_mismatch(
            "tensor construction",
            format!("{} elements for shape {shape}", shape.num_elements()),
            format!("{len} elements"),
        ));
    }
    Ok(())
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const PREVIEW: usize = 8;
        write!(f, "Tensor({}{}, ", self.dtype(), self.shape)?;
        match &self.data {
            TensorData::F32(values) => write_preview(f, values, PREVIEW)?,
            TensorData::I32(values) => write_preview(f, values, PREVIEW)?,
        }
        f.write_str(")")
    }
}

fn write_preview<T: fmt::Debug>(f: &mut fmt::Formatter<'_>, values: &[T], limit: usize) -> fmt::Result {
    let shown = &values[..values.len().min(limit)];
    write!(f, "{shown:?}")?;
    if values.len() > limit {
        write!(f, " ..{} more", values.len() - limit)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_vec_rejects_wrong_length() {
        let err = Tensor::from_vec([2, 2], vec![1.0, 2.0, 3.0]).unwrap_err();
        assert!(matches!(err, GraphError::ShapeMismatch { .. }));
    }

    #[test]
    fn le_bytes_round_trip_preserves_dtype() {
        let t = Tensor::from_i32([3], vec![1, -2, 3]).unwrap();
        let back = Tensor::from_le_bytes(DType::I32, [3], &t.to_le_bytes()).unwrap();
        assert_eq!(t, back);
    }

    #[test]
    fn reshape_shares_payload() {
        let t = Tensor::from_vec([4], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let r = t.reshape([2, 2]).unwrap();
        assert_eq!(t.storage_key(), r.storage_key());
        assert_eq!(r.shape().dims(), &[2, 2]);
    }
}
