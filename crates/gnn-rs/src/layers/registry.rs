use std::collections::HashMap;

use tracing::{debug, warn};

use super::{
    Broadcast, ContextUpdate, Dense, EdgeSetUpdate, Layer, LayerConfig, Multiply, NodeSetUpdate,
    Pool, Readout, Sequential,
};
use crate::error::{GraphError, GraphResult};

/// Rebuilds a layer from its config. Nested layers are built through the registry.
pub type FromConfigFn = fn(&serde_json::Value, &LayerRegistry) -> GraphResult<Box<dyn Layer>>;

#[derive(Clone, Copy)]
pub struct LayerFactory {
    pub class_name: &'static str,
    pub from_config: FromConfigFn,
}

/// Factories for every layer class that ships with the crate and has a config.
pub fn builtin_layer_factories() -> &'static [LayerFactory] {
    &[
        LayerFactory {
            class_name: "Readout",
            from_config: Readout::from_config,
        },
        LayerFactory {
            class_name: "Broadcast",
            from_config: Broadcast::from_config,
        },
        LayerFactory {
            class_name: "Pool",
            from_config: Pool::from_config,
        },
        LayerFactory {
            class_name: "EdgeSetUpdate",
            from_config: EdgeSetUpdate::from_config,
        },
        LayerFactory {
            class_name: "NodeSetUpdate",
            from_config: NodeSetUpdate::from_config,
        },
        LayerFactory {
            class_name: "ContextUpdate",
            from_config: ContextUpdate::from_config,
        },
        LayerFactory {
            class_name: "Dense",
            from_config: Dense::from_config,
        },
        LayerFactory {
            class_name: "Multiply",
            from_config: Multiply::from_config,
        },
        LayerFactory {
            class_name: "Sequential",
            from_config: Sequential::from_config,
        },
    ]
}

/// Maps class names to constructors for restoring saved models.
///
/// Custom layers must be registered before [`crate::saved::load_model`] can
/// rebuild a model that contains them.
pub struct LayerRegistry {
    factories: HashMap<String, FromConfigFn>,
}

impl LayerRegistry {
    /// Registry without any classes.
    pub fn new() -> Self {
        LayerRegistry {
            factories: HashMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for factory in builtin_layer_factories() {
            registry
                .factories
                .insert(factory.class_name.to_string(), factory.from_config);
        }
        debug!(classes = registry.factories.len(), "layer registry with builtins");
        registry
    }

    /// Adds `class_name`, replacing any previous entry.
    pub fn register(&mut self, class_name: impl Into<String>, from_config: FromConfigFn) -> &mut Self {
        let class_name = class_name.into();
        if self.factories.insert(class_name.clone(), from_config).is_some() {
            warn!(class_name = %class_name, "layer class registered twice, replacing previous factory");
        } else {
            debug!(class_name = %class_name, "registered layer class");
        }
        self
    }

    pub fn contains(&self, class_name: &str) -> bool {
        self.factories.contains_key(class_name)
    }

    /// Registered class names, sorted.
    pub fn class_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn build(&self, config: &LayerConfig) -> GraphResult<Box<dyn Layer>> {
        let from_config = self.factories.get(&config.class_name).ok_or_else(|| {
            GraphError::configuration(format!(
                "unknown layer class '{}'; register it with LayerRegistry::register",
                config.class_name
            ))
        })?;
        from_config(&config.config, self)
    }
}

impl Default for LayerRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::LayerValue;
    use crate::module::Module;
    use std::any::Any;

    struct Identity;

    impl Module for Identity {}

    impl Layer for Identity {
        fn class_name(&self) -> &str {
            "Identity"
        }

        fn name(&self) -> &str {
            "identity"
        }

        fn call(&self, input: &LayerValue) -> GraphResult<LayerValue> {
            Ok(input.clone())
        }

        fn get_config(&self) -> GraphResult<serde_json::Value> {
            Ok(serde_json::json!({}))
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn identity_from_config(
        _: &serde_json::Value,
        _: &LayerRegistry,
    ) -> GraphResult<Box<dyn Layer>> {
        Ok(Box::new(Identity))
    }

    #[test]
    fn builtins_cover_every_shipped_class() {
        let registry = LayerRegistry::with_builtins();
        assert_eq!(
            registry.class_names(),
            vec![
                "Broadcast",
                "ContextUpdate",
                "Dense",
                "EdgeSetUpdate",
                "Multiply",
                "NodeSetUpdate",
                "Pool",
                "Readout",
                "Sequential",
            ]
        );
    }

    #[test]
    fn unknown_class_is_a_configuration_error() {
        let config = LayerConfig {
            class_name: "Identity".into(),
            config: serde_json::json!({}),
        };
        let err = LayerRegistry::with_builtins().build(&config).err().unwrap();
        assert!(matches!(err, GraphError::Configuration(_)));

        let mut registry = LayerRegistry::with_builtins();
        registry.register("Identity", identity_from_config);
        let layer = registry.build(&config).unwrap();
        assert!(layer.as_any().downcast_ref::<Identity>().is_some());
    }
}
