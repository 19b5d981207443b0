use std::sync::atomic::{AtomicU64, Ordering};

use crate::layers::{Activation, Dense, Initializer, Layer, Sequential};

/// Builds feed-forward stacks of one fixed shape.
///
/// Every call to [`FnnFactory::build`] returns layers with their own weights.
/// Kernel seeds advance per built layer, so two stacks from the same factory
/// start out different but a rerun of the same program reproduces them.
#[derive(Debug)]
pub struct FnnFactory {
    output_dim: usize,
    hidden_dims: Vec<usize>,
    activation: Activation,
    next_seed: AtomicU64,
}

/// Hidden layers use `activation`; the output layer is linear.
pub fn get_fnn_factory(output_dim: usize, hidden_dims: &[usize], activation: Activation) -> FnnFactory {
    FnnFactory {
        output_dim,
        hidden_dims: hidden_dims.to_vec(),
        activation,
        next_seed: AtomicU64::new(0),
    }
}

impl FnnFactory {
    pub fn output_dim(&self) -> usize {
        self.output_dim
    }

    pub fn hidden_dims(&self) -> &[usize] {
        &self.hidden_dims
    }

    pub fn build(&self, name: &str) -> Sequential {
        let mut layers: Vec<Box<dyn Layer>> = Vec::with_capacity(self.hidden_dims.len() + 1);
        for (index, &units) in self.hidden_dims.iter().enumerate() {
            layers.push(Box::new(
                Dense::new(units)
                    .with_name(format!("hidden_{index}"))
                    .with_activation(self.activation)
                    .with_kernel_initializer(self.next_initializer()),
            ));
        }
        layers.push(Box::new(
            Dense::new(self.output_dim)
                .with_name("output")
                .with_kernel_initializer(self.next_initializer()),
        ));
        Sequential::new(name, layers)
    }

    fn next_initializer(&self) -> Initializer {
        Initializer::GlorotUniform {
            seed: self.next_seed.fetch_add(1, Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Tensor;

    #[test]
    fn builds_hidden_then_linear_output() {
        let factory = get_fnn_factory(3, &[8, 4], Activation::Relu);
        let fnn = factory.build("fnn");
        assert_eq!(fnn.len(), 3);
        let dense: Vec<&Dense> = fnn
            .layers()
            .iter()
            .map(|layer| layer.as_any().downcast_ref::<Dense>().unwrap())
            .collect();
        assert_eq!(dense[0].units(), 8);
        assert_eq!(dense[1].activation(), Activation::Relu);
        assert_eq!(dense[2].units(), 3);
        assert_eq!(dense[2].activation(), Activation::Linear);

        let out = fnn.call(&Tensor::zeros([5, 2]).into()).unwrap().into_tensor().unwrap();
        assert_eq!(out.shape().dims(), &[5, 3]);
    }

    #[test]
    fn each_build_gets_fresh_weights() {
        let factory = get_fnn_factory(2, &[], Activation::Linear);
        let a = factory.build("a");
        let b = factory.build("b");
        let x = Tensor::from_vec([1, 2], vec![1.0, 1.0]).unwrap().into();
        a.call(&x).unwrap();
        b.call(&x).unwrap();
        let kernel = |seq: &Sequential| {
            seq.layers()[0]
                .as_any()
                .downcast_ref::<Dense>()
                .and_then(Dense::kernel)
                .cloned()
        };
        assert_ne!(kernel(&a), kernel(&b));
    }
}
