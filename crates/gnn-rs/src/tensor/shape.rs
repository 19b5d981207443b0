//! Concrete tensor shapes.

use std::fmt;

use smallvec::SmallVec;

/// Stores the logical dimensions of a concrete tensor. Rank 0 denotes a scalar.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Shape {
    dims: SmallVec<[usize; 4]>,
}

impl Shape {
    pub fn new(dims: impl AsRef<[usize]>) -> Self {
        Shape {
            dims: SmallVec::from_slice(dims.as_ref()),
        }
    }

    pub fn scalar() -> Self {
        Shape {
            dims: SmallVec::new(),
        }
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Computes the total number of elements implied by the shape.
    pub fn num_elements(&self) -> usize {
        self.dims.iter().product()
    }

    /// Returns the item count of the tensor, i.e. the size of its first axis.
    pub fn leading(&self) -> Option<usize> {
        self.dims.first().copied()
    }

    /// Number of elements in one item (everything after the first axis).
    pub fn row_len(&self) -> usize {
        self.dims.iter().skip(1).product()
    }

    /// Returns a copy of the shape with the first axis replaced.
    pub fn with_leading(&self, leading: usize) -> Shape {
        let mut dims = self.dims.clone();
        match dims.first_mut() {
            Some(first) => *first = leading,
            None => dims.push(leading),
        }
        Shape { dims }
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Shape::new(dims)
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Shape::new(dims)
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(dims: [usize; N]) -> Self {
        Shape::new(dims)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, dim) in self.dims.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{dim}")?;
        }
        f.write_str("]")
    }
}
