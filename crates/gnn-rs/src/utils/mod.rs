//! Helpers for assembling common layer stacks.

mod fnn_factory;

pub use fnn_factory::{get_fnn_factory, FnnFactory};
