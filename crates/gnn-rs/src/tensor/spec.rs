//! Type/shape descriptors with partially-unknown dimensions.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{DType, Tensor};

/// Represents a single axis extent in a tensor spec.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    Static(usize),
    #[default]
    Dynamic,
}

impl Dimension {
    pub fn value(self) -> Option<usize> {
        match self {
            Dimension::Static(value) => Some(value),
            Dimension::Dynamic => None,
        }
    }

    pub fn is_static(self) -> bool {
        matches!(self, Dimension::Static(_))
    }

    /// Reports whether a concrete extent satisfies this dimension.
    pub fn accepts(self, extent: usize) -> bool {
        match self {
            Dimension::Static(value) => value == extent,
            Dimension::Dynamic => true,
        }
    }

    /// Two dimensions are compatible unless both are static and differ.
    pub fn is_compatible_with(self, other: Dimension) -> bool {
        match (self, other) {
            (Dimension::Static(a), Dimension::Static(b)) => a == b,
            _ => true,
        }
    }

    /// Keeps the dimension when both agree, otherwise relaxes it to `Dynamic`.
    pub fn most_specific_common(self, other: Dimension) -> Dimension {
        if self == other {
            self
        } else {
            Dimension::Dynamic
        }
    }

    /// Combines two compatible dimensions, preferring the known extent.
    pub fn refine(self, other: Dimension) -> Dimension {
        match (self, other) {
            (Dimension::Static(a), _) => Dimension::Static(a),
            (Dimension::Dynamic, other) => other,
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::Static(value) => write!(f, "{value}"),
            Dimension::Dynamic => f.write_str("?"),
        }
    }
}

/// Tensor metadata coupling dtype and (possibly partially unknown) shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorSpec {
    pub dtype: DType,
    pub dims: Vec<Dimension>,
}

impl TensorSpec {
    pub fn new(dtype: DType, dims: impl Into<Vec<Dimension>>) -> Self {
        Self {
            dtype,
            dims: dims.into(),
        }
    }

    /// Builds a fully static spec.
    pub fn from_static(dtype: DType, dims: &[usize]) -> Self {
        Self {
            dtype,
            dims: dims.iter().map(|&d| Dimension::Static(d)).collect(),
        }
    }

    pub fn of(tensor: &Tensor) -> Self {
        Self::from_static(tensor.dtype(), tensor.shape().dims())
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn leading(&self) -> Option<Dimension> {
        self.dims.first().copied()
    }

    /// Returns static dimensions when all dims are static.
    pub fn static_dims(&self) -> Option<Vec<usize>> {
        self.dims.iter().map(|d| d.value()).collect()
    }

    pub fn with_leading(&self, leading: Dimension) -> Self {
        let mut dims = self.dims.clone();
        if let Some(first) = dims.first_mut() {
            *first = leading;
        }
        Self {
            dtype: self.dtype,
            dims,
        }
    }

    /// Reports whether a concrete tensor satisfies this spec.
    pub fn accepts(&self, tensor: &Tensor) -> bool {
        self.dtype == tensor.dtype()
            && self.rank() == tensor.shape().rank()
            && self
                .dims
                .iter()
                .zip(tensor.shape().dims())
                .all(|(dim, &extent)| dim.accepts(extent))
    }

    /// Reports whether every value of `other` could also satisfy `self`.
    pub fn is_compatible_with(&self, other: &TensorSpec) -> bool {
        self.dtype == other.dtype
            && self.rank() == other.rank()
            && self
                .dims
                .iter()
                .zip(&other.dims)
                .all(|(a, b)| a.is_compatible_with(*b))
    }

    /// Returns the most specific spec satisfied by values of both specs, if any.
    pub fn most_specific_common(&self, other: &TensorSpec) -> Option<TensorSpec> {
        if self.dtype != other.dtype || self.rank() != other.rank() {
            return None;
        }
        Some(TensorSpec {
            dtype: self.dtype,
            dims: self
                .dims
                .iter()
                .zip(&other.dims)
                .map(|(a, b)| a.most_specific_common(*b))
                .collect(),
        })
    }
}

impl fmt::Display for TensorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[", self.dtype)?;
        for (i, dim) in self.dims.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{dim}")?;
        }
        f.write_str("]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn most_specific_common_relaxes_disagreeing_dims() {
        let a = TensorSpec::from_static(DType::F32, &[2, 1]);
        let b = TensorSpec::from_static(DType::F32, &[4, 1]);
        let common = a.most_specific_common(&b).expect("same dtype and rank");
        assert_eq!(
            common,
            TensorSpec::new(DType::F32, vec![Dimension::Dynamic, Dimension::Static(1)])
        );
        assert_eq!(common.to_string(), "f32[?, 1]");
    }

    #[test]
    fn most_specific_common_rejects_dtype_change() {
        let a = TensorSpec::from_static(DType::F32, &[2]);
        let b = TensorSpec::from_static(DType::I32, &[2]);
        assert!(a.most_specific_common(&b).is_none());
    }

    #[test]
    fn accepts_checks_static_dims_only() {
        let spec = TensorSpec::new(DType::F32, vec![Dimension::Dynamic, Dimension::Static(2)]);
        let ok = Tensor::from_vec([3, 2], vec![0.0; 6]).unwrap();
        let bad = Tensor::from_vec([2, 3], vec![0.0; 6]).unwrap();
        assert!(spec.accepts(&ok));
        assert!(!spec.accepts(&bad));
    }
}
