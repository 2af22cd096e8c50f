//! Plugin factory: maps implementation type names to constructors.

use std::collections::HashMap;

use crate::config::PluginSpec;
use crate::error::{KaryaError, Result};

use super::TaskPlugin;
use super::builtin;

/// Builds an unconfigured plugin from its spec.
pub type PluginConstructor = Box<dyn Fn(&PluginSpec) -> Result<Box<dyn TaskPlugin>> + Send + Sync>;

/// Registry of plugin implementation types.
pub struct PluginFactory {
    constructors: HashMap<String, PluginConstructor>,
}

impl PluginFactory {
    /// Create a factory with no known types.
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Create a factory with the built-in plugin types.
    pub fn with_builtins() -> Self {
        let mut factory = Self::new();
        builtin::register_builtins(&mut factory);
        factory
    }

    /// Register a constructor for `type_name`, replacing any previous one.
    pub fn register<F>(&mut self, type_name: impl Into<String>, constructor: F)
    where
        F: Fn(&PluginSpec) -> Result<Box<dyn TaskPlugin>> + Send + Sync + 'static,
    {
        self.constructors
            .insert(type_name.into(), Box::new(constructor));
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.constructors.contains_key(type_name)
    }

    /// Known type names, sorted.
    pub fn types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.constructors.keys().map(|s| s.as_str()).collect();
        types.sort_unstable();
        types
    }

    /// Instantiate the plugin described by `spec`.
    pub fn create(&self, spec: &PluginSpec) -> Result<Box<dyn TaskPlugin>> {
        let constructor =
            self.constructors
                .get(&spec.plugin_type)
                .ok_or_else(|| KaryaError::PluginLoad {
                    name: spec.name.clone(),
                    reason: format!(
                        "unknown plugin type '{}' (known: {})",
                        spec.plugin_type,
                        self.types().join(", ")
                    ),
                })?;
        constructor(spec)
    }
}

impl Default for PluginFactory {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_registered() {
        let factory = PluginFactory::with_builtins();
        assert!(factory.contains(builtin::STRAIGHT_LINE_PLANNER));
        assert!(factory.contains(builtin::WAIT));
        assert_eq!(factory.types(), vec!["StraightLinePlanner", "Wait"]);
    }

    #[test]
    fn test_unknown_type() {
        let factory = PluginFactory::with_builtins();
        let result = factory.create(&PluginSpec::new("astar", "AStarPlanner"));
        match result {
            Err(KaryaError::PluginLoad { name, reason }) => {
                assert_eq!(name, "astar");
                assert!(reason.contains("AStarPlanner"));
            }
            _ => panic!("expected PluginLoad error"),
        }
    }

    #[test]
    fn test_constructor_errors_propagate() {
        let factory = PluginFactory::with_builtins();
        let spec = PluginSpec::new("wait", builtin::WAIT).with_param("duration_secs", -1.0);
        assert!(matches!(
            factory.create(&spec),
            Err(KaryaError::PluginLoad { .. })
        ));
    }
}
