//! Error taxonomy shared by graph tensors, operators, layers, and persistence.

use thiserror::Error;

pub type GraphResult<T> = Result<T, GraphError>;

/// Errors surfaced synchronously at the point where a structural contract is violated.
#[derive(Debug, Error)]
pub enum GraphError {
    /// A structural invariant (shape, dtype, item count, index range) does not hold.
    #[error("shape mismatch in {context}: expected {expected}, got {actual}")]
    ShapeMismatch {
        context: String,
        expected: String,
        actual: String,
    },
    /// A named feature or adjacency role is absent.
    #[error("feature '{feature}' not found in {location}")]
    FeatureNotFound { location: String, feature: String },
    /// A layer or model references names or settings that do not resolve.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// A runtime value does not satisfy its declared spec.
    #[error("spec mismatch at {path}: expected {expected}, got {actual}")]
    SpecMismatch {
        path: String,
        expected: String,
        actual: String,
    },
    /// A component explicitly declines a capability.
    #[error("unsupported: {0}")]
    Unsupported(String),
    /// A layer config could not be converted to or from JSON.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GraphError {
    pub fn shape_mismatch(
        context: impl Into<String>,
        expected: impl ToString,
        actual: impl ToString,
    ) -> Self {
        GraphError::ShapeMismatch {
            context: context.into(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    pub fn feature_not_found(location: impl Into<String>, feature: impl Into<String>) -> Self {
        GraphError::FeatureNotFound {
            location: location.into(),
            feature: feature.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        GraphError::Configuration(message.into())
    }

    pub fn spec_mismatch(
        path: impl Into<String>,
        expected: impl ToString,
        actual: impl ToString,
    ) -> Self {
        GraphError::SpecMismatch {
            path: path.into(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        GraphError::Unsupported(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_failures_convert_through_question_mark() {
        fn parse(src: &str) -> GraphResult<serde_json::Value> {
            Ok(serde_json::from_str(src)?)
        }
        let err = parse("{not json").unwrap_err();
        assert!(matches!(err, GraphError::Json(_)));
        assert!(err.to_string().starts_with("json error: "));
    }
}
