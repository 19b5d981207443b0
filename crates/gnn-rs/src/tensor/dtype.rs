//! Scalar element types carried by graph features and index tensors.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Logical dtype shared by host tensors, specs, and serialized programs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    /// 32-bit floating point, used for feature values.
    F32,
    /// 32-bit signed integer, used for sizes and adjacency indices.
    I32,
}

impl DType {
    /// Returns the number of bytes required per scalar element.
    pub fn size_in_bytes(self) -> usize {
        match self {
            DType::F32 | DType::I32 => 4,
        }
    }

    /// Produces a stable tag used when writing weight archives.
    pub fn tag(self) -> u32 {
        match self {
            DType::F32 => 0,
            DType::I32 => 3,
        }
    }

    /// Reconstructs a `DType` from its serialized tag representation.
    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(DType::F32),
            3 => Some(DType::I32),
            _ => None,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DType::F32 => f.write_str("f32"),
            DType::I32 => f.write_str("i32"),
        }
    }
}
