use std::any::Any;
use std::fmt;

use super::{Layer, LayerValue};
use crate::error::GraphResult;
use crate::module::Module;

type LambdaFn = dyn Fn(&LayerValue) -> GraphResult<LayerValue> + Send + Sync;

/// Wraps arbitrary code as a layer.
///
/// It has no config, so models containing it can be exported as programs but
/// not saved as configs.
pub struct Lambda {
    name: String,
    f: Box<LambdaFn>,
}

impl Lambda {
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&LayerValue) -> GraphResult<LayerValue> + Send + Sync + 'static,
    {
        Lambda {
            name: name.into(),
            f: Box::new(f),
        }
    }
}

impl fmt::Debug for Lambda {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lambda").field("name", &self.name).finish()
    }
}

impl Module for Lambda {}

impl Layer for Lambda {
    fn class_name(&self) -> &str {
        "Lambda"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, input: &LayerValue) -> GraphResult<LayerValue> {
        (self.f)(input)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GraphError;
    use crate::ops::functional;
    use crate::tensor::Tensor;

    #[test]
    fn runs_the_closure_and_declines_config() {
        let negate = Lambda::new("negate", |input| {
            functional::neg(input.as_value("negate")?).map(LayerValue::Tensor)
        });
        let out = negate
            .call(&Tensor::from_vec([2], vec![1.0, -2.0]).unwrap().into())
            .unwrap()
            .into_tensor()
            .unwrap();
        assert_eq!(out.as_f32().unwrap(), &[-1.0, 2.0]);
        assert!(matches!(negate.get_config(), Err(GraphError::Unsupported(_))));
    }
}
