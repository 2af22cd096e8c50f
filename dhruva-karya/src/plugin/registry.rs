//! Plugin registry: name → loaded plugin instance.
//!
//! The registry is only mutated during Unconfigured ↔ Inactive transitions.
//! While the server is active it is owned by the action worker thread, so
//! lookups take no lock.

use std::collections::HashSet;

use crate::config::PluginSpec;
use crate::environment::EnvironmentHandle;
use crate::error::{KaryaError, Result};

use super::{PluginFactory, TaskPlugin};

/// A configured plugin together with its registry bookkeeping.
pub struct LoadedPlugin {
    name: String,
    plugin_type: String,
    plugin: Box<dyn TaskPlugin>,
    active: bool,
}

impl LoadedPlugin {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn plugin_type(&self) -> &str {
        &self.plugin_type
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn plugin_mut(&mut self) -> &mut dyn TaskPlugin {
        self.plugin.as_mut()
    }
}

/// Loaded plugins in registration order.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: Vec<LoadedPlugin>,
    default_name: String,
    /// Loaded the built-in default because the plugin list was empty
    fallback: bool,
    fallback_warning_given: bool,
    single_plugin_warning_given: bool,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and configure one plugin per spec.
    ///
    /// All-or-nothing: on any failure the plugins configured so far are
    /// cleaned up and the registry stays empty. An empty `specs` list loads
    /// `default_spec` instead.
    pub fn configure(
        &mut self,
        specs: &[PluginSpec],
        default_spec: &PluginSpec,
        factory: &PluginFactory,
        environment: &EnvironmentHandle,
    ) -> Result<()> {
        if !self.plugins.is_empty() {
            return Err(KaryaError::Config(
                "plugin registry is already loaded".to_string(),
            ));
        }

        let fallback = specs.is_empty();
        let specs = if fallback {
            tracing::info!(
                "No plugins configured, loading built-in default '{}' ({})",
                default_spec.name,
                default_spec.plugin_type
            );
            std::slice::from_ref(default_spec)
        } else {
            specs
        };

        let mut seen = HashSet::new();
        for spec in specs {
            if !seen.insert(spec.name.as_str()) {
                return Err(KaryaError::DuplicatePlugin(spec.name.clone()));
            }
        }

        let mut staged: Vec<LoadedPlugin> = Vec::with_capacity(specs.len());
        for spec in specs {
            match load_plugin(spec, factory, environment) {
                Ok(loaded) => {
                    tracing::info!("Created plugin '{}' of type {}", spec.name, spec.plugin_type);
                    staged.push(loaded);
                }
                Err(e) => {
                    tracing::error!("Failed to create plugin '{}': {}", spec.name, e);
                    cleanup_all(&mut staged);
                    return Err(e);
                }
            }
        }

        self.plugins = staged;
        self.default_name = default_spec.name.clone();
        self.fallback = fallback;
        self.fallback_warning_given = false;
        self.single_plugin_warning_given = false;

        tracing::info!("Plugins available: [{}]", self.names().join(", "));
        Ok(())
    }

    /// Exact-name lookup.
    pub fn resolve(&mut self, name: &str) -> Result<&mut LoadedPlugin> {
        match self.index_of(name) {
            Some(idx) => Ok(&mut self.plugins[idx]),
            None => Err(KaryaError::PluginNotFound {
                name: name.to_string(),
                available: self.names().join(", "),
            }),
        }
    }

    /// Pick the plugin for a request.
    ///
    /// An empty name selects the default plugin, or the only loaded plugin
    /// when the default is absent. Each fallback path warns once per
    /// configuration.
    pub fn select(&mut self, requested: &str) -> Result<&mut LoadedPlugin> {
        if self.fallback && !self.fallback_warning_given {
            tracing::warn!(
                "No plugins were configured; dispatching to built-in default '{}'. \
                 This warning will appear once.",
                self.default_name
            );
            self.fallback_warning_given = true;
        }

        if !requested.is_empty() {
            return self.resolve(requested);
        }

        if self.index_of(&self.default_name).is_some() {
            let name = self.default_name.clone();
            return self.resolve(&name);
        }

        if self.plugins.len() == 1 {
            if !self.single_plugin_warning_given {
                tracing::warn!(
                    "No plugin specified in request and default '{}' is not loaded; \
                     using the only plugin '{}'. This warning will appear once.",
                    self.default_name,
                    self.plugins[0].name
                );
                self.single_plugin_warning_given = true;
            }
            return Ok(&mut self.plugins[0]);
        }

        let name = self.default_name.clone();
        self.resolve(&name)
    }

    /// Activate every plugin in registration order, stopping at the first failure.
    ///
    /// Plugins activated before the failure stay active; `deactivate_all`
    /// or `unload_all` brings them back down.
    pub fn activate_all(&mut self) -> Result<()> {
        for loaded in self.plugins.iter_mut().filter(|p| !p.active) {
            tracing::debug!("Activating plugin '{}'", loaded.name);
            loaded
                .plugin
                .activate()
                .map_err(|e| KaryaError::PluginLifecycle {
                    name: loaded.name.clone(),
                    transition: "activate",
                    reason: e.to_string(),
                })?;
            loaded.active = true;
        }
        Ok(())
    }

    /// Deactivate every active plugin in registration order.
    ///
    /// Continues past failures so every plugin gets the call; returns the first error.
    pub fn deactivate_all(&mut self) -> Result<()> {
        let mut first_error = None;
        for loaded in self.plugins.iter_mut().filter(|p| p.active) {
            tracing::debug!("Deactivating plugin '{}'", loaded.name);
            loaded.active = false;
            if let Err(e) = loaded.plugin.deactivate() {
                tracing::error!("Plugin '{}' failed to deactivate: {}", loaded.name, e);
                first_error.get_or_insert(KaryaError::PluginLifecycle {
                    name: loaded.name.clone(),
                    transition: "deactivate",
                    reason: e.to_string(),
                });
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Release every plugin. Idempotent.
    pub fn unload_all(&mut self) {
        if self.plugins.is_empty() {
            return;
        }
        cleanup_all(&mut self.plugins);
        self.fallback = false;
        self.fallback_warning_given = false;
        self.single_plugin_warning_given = false;
    }

    /// Plugin names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// True when the built-in default was loaded because no plugins were configured.
    pub fn is_fallback(&self) -> bool {
        self.fallback
    }

    pub fn active_count(&self) -> usize {
        self.plugins.iter().filter(|p| p.active).count()
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.plugins.iter().position(|p| p.name == name)
    }
}

fn load_plugin(
    spec: &PluginSpec,
    factory: &PluginFactory,
    environment: &EnvironmentHandle,
) -> Result<LoadedPlugin> {
    let mut plugin = factory.create(spec)?;
    plugin
        .configure(&spec.name, environment.clone())
        .map_err(|e| KaryaError::PluginLoad {
            name: spec.name.clone(),
            reason: e.to_string(),
        })?;
    Ok(LoadedPlugin {
        name: spec.name.clone(),
        plugin_type: spec.plugin_type.clone(),
        plugin,
        active: false,
    })
}

/// Deactivate (if needed) and clean up plugins, then drop them.
fn cleanup_all(plugins: &mut Vec<LoadedPlugin>) {
    for mut loaded in plugins.drain(..) {
        if loaded.active
            && let Err(e) = loaded.plugin.deactivate()
        {
            tracing::warn!("Plugin '{}' failed to deactivate: {}", loaded.name, e);
        }
        if let Err(e) = loaded.plugin.cleanup() {
            tracing::warn!("Plugin '{}' failed to clean up: {}", loaded.name, e);
        }
        tracing::debug!("Unloaded plugin '{}'", loaded.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{StepContext, StepResult};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counters {
        configured: AtomicUsize,
        activated: AtomicUsize,
        deactivated: AtomicUsize,
        cleaned: AtomicUsize,
    }

    struct CountingPlugin {
        counters: Arc<Counters>,
        fail_activate: bool,
        fail_configure: bool,
    }

    impl TaskPlugin for CountingPlugin {
        fn configure(&mut self, _name: &str, _environment: EnvironmentHandle) -> Result<()> {
            if self.fail_configure {
                return Err(KaryaError::Config("bad parameters".to_string()));
            }
            self.counters.configured.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn activate(&mut self) -> Result<()> {
            if self.fail_activate {
                return Err(KaryaError::Environment("sensor missing".to_string()));
            }
            self.counters.activated.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn deactivate(&mut self) -> Result<()> {
            self.counters.deactivated.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn cleanup(&mut self) -> Result<()> {
            self.counters.cleaned.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn compute_step(&mut self, _ctx: &StepContext<'_>) -> StepResult {
            StepResult::Progress(None)
        }
    }

    fn make_factory(counters: &Arc<Counters>) -> PluginFactory {
        let mut factory = PluginFactory::with_builtins();
        for (type_name, fail_activate, fail_configure) in [
            ("Counting", false, false),
            ("FailActivate", true, false),
            ("FailConfigure", false, true),
        ] {
            let counters = Arc::clone(counters);
            factory.register(type_name, move |_spec: &PluginSpec| {
                Ok(Box::new(CountingPlugin {
                    counters: Arc::clone(&counters),
                    fail_activate,
                    fail_configure,
                }) as Box<dyn TaskPlugin>)
            });
        }
        factory
    }

    fn default_spec() -> PluginSpec {
        PluginSpec::new("default", "Counting")
    }

    fn env() -> EnvironmentHandle {
        EnvironmentHandle::new("map")
    }

    #[test]
    fn test_configure_in_order() {
        let counters = Arc::new(Counters::default());
        let factory = make_factory(&counters);
        let mut registry = PluginRegistry::new();

        let specs = vec![
            PluginSpec::new("b", "Counting"),
            PluginSpec::new("a", "Counting"),
        ];
        registry
            .configure(&specs, &default_spec(), &factory, &env())
            .unwrap();

        assert_eq!(registry.names(), vec!["b", "a"]);
        assert!(!registry.is_fallback());
        assert_eq!(counters.configured.load(Ordering::SeqCst), 2);
        assert_eq!(registry.resolve("a").unwrap().plugin_type(), "Counting");
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let counters = Arc::new(Counters::default());
        let factory = make_factory(&counters);
        let mut registry = PluginRegistry::new();

        let specs = vec![
            PluginSpec::new("A", "Counting"),
            PluginSpec::new("A", builtin_wait()),
        ];
        let result = registry.configure(&specs, &default_spec(), &factory, &env());

        assert!(matches!(result, Err(KaryaError::DuplicatePlugin(ref n)) if n == "A"));
        assert!(registry.is_empty());
        assert_eq!(counters.configured.load(Ordering::SeqCst), 0);
    }

    fn builtin_wait() -> &'static str {
        crate::plugin::builtin::WAIT
    }

    #[test]
    fn test_unknown_type_leaves_registry_empty() {
        let counters = Arc::new(Counters::default());
        let factory = make_factory(&counters);
        let mut registry = PluginRegistry::new();

        let specs = vec![
            PluginSpec::new("ok", "Counting"),
            PluginSpec::new("missing", "NoSuchPlanner"),
        ];
        let result = registry.configure(&specs, &default_spec(), &factory, &env());

        assert!(matches!(
            result,
            Err(KaryaError::PluginLoad { ref name, .. }) if name == "missing"
        ));
        assert!(registry.is_empty());
        // The staged plugin was cleaned up
        assert_eq!(counters.configured.load(Ordering::SeqCst), 1);
        assert_eq!(counters.cleaned.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_plugin_configure_failure_is_load_error() {
        let counters = Arc::new(Counters::default());
        let factory = make_factory(&counters);
        let mut registry = PluginRegistry::new();

        let specs = vec![PluginSpec::new("broken", "FailConfigure")];
        let result = registry.configure(&specs, &default_spec(), &factory, &env());
        assert!(matches!(result, Err(KaryaError::PluginLoad { .. })));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_empty_list_loads_default() {
        let counters = Arc::new(Counters::default());
        let factory = make_factory(&counters);
        let mut registry = PluginRegistry::new();

        registry
            .configure(&[], &default_spec(), &factory, &env())
            .unwrap();

        assert!(registry.is_fallback());
        assert_eq!(registry.names(), vec!["default"]);
        assert_eq!(registry.select("").unwrap().name(), "default");
        assert_eq!(registry.select("default").unwrap().name(), "default");
    }

    #[test]
    fn test_fallback_warning_once_per_configure() {
        let counters = Arc::new(Counters::default());
        let factory = make_factory(&counters);
        let mut registry = PluginRegistry::new();
        registry
            .configure(&[], &default_spec(), &factory, &env())
            .unwrap();

        // Not at configure time, only at the first dispatch
        assert!(!registry.fallback_warning_given);
        registry.select("").unwrap();
        assert!(registry.fallback_warning_given);
        registry.select("default").unwrap();
        assert!(registry.fallback_warning_given);

        registry.unload_all();
        assert!(!registry.fallback_warning_given);

        registry
            .configure(&[], &default_spec(), &factory, &env())
            .unwrap();
        assert!(!registry.fallback_warning_given);
        registry.select("default").unwrap();
        assert!(registry.fallback_warning_given);
    }

    #[test]
    fn test_configured_plugins_never_warn_fallback() {
        let counters = Arc::new(Counters::default());
        let factory = make_factory(&counters);
        let mut registry = PluginRegistry::new();
        registry
            .configure(
                &[PluginSpec::new("default", "Counting")],
                &default_spec(),
                &factory,
                &env(),
            )
            .unwrap();

        registry.select("").unwrap();
        assert!(!registry.is_fallback());
        assert!(!registry.fallback_warning_given);
        assert!(!registry.single_plugin_warning_given);
    }

    #[test]
    fn test_resolve_unknown_lists_available() {
        let counters = Arc::new(Counters::default());
        let factory = make_factory(&counters);
        let mut registry = PluginRegistry::new();
        registry
            .configure(&[], &default_spec(), &factory, &env())
            .unwrap();

        match registry.resolve("nonexistent") {
            Err(KaryaError::PluginNotFound { name, available }) => {
                assert_eq!(name, "nonexistent");
                assert_eq!(available, "default");
            }
            _ => panic!("expected PluginNotFound"),
        }
    }

    #[test]
    fn test_select_single_plugin_without_default() {
        let counters = Arc::new(Counters::default());
        let factory = make_factory(&counters);
        let mut registry = PluginRegistry::new();
        registry
            .configure(
                &[PluginSpec::new("grid", "Counting")],
                &default_spec(),
                &factory,
                &env(),
            )
            .unwrap();

        assert!(!registry.single_plugin_warning_given);
        assert_eq!(registry.select("").unwrap().name(), "grid");
        assert!(registry.single_plugin_warning_given);
        assert_eq!(registry.select("").unwrap().name(), "grid");

        registry.unload_all();
        assert!(!registry.single_plugin_warning_given);
    }

    #[test]
    fn test_select_empty_name_with_many_plugins_and_no_default() {
        let counters = Arc::new(Counters::default());
        let factory = make_factory(&counters);
        let mut registry = PluginRegistry::new();
        registry
            .configure(
                &[
                    PluginSpec::new("grid", "Counting"),
                    PluginSpec::new("lattice", "Counting"),
                ],
                &default_spec(),
                &factory,
                &env(),
            )
            .unwrap();

        assert!(matches!(
            registry.select(""),
            Err(KaryaError::PluginNotFound { .. })
        ));
    }

    #[test]
    fn test_activate_failure_aborts_remaining() {
        let counters = Arc::new(Counters::default());
        let factory = make_factory(&counters);
        let mut registry = PluginRegistry::new();
        let specs = vec![
            PluginSpec::new("first", "Counting"),
            PluginSpec::new("broken", "FailActivate"),
            PluginSpec::new("third", "Counting"),
        ];
        registry
            .configure(&specs, &default_spec(), &factory, &env())
            .unwrap();

        let result = registry.activate_all();
        assert!(matches!(
            result,
            Err(KaryaError::PluginLifecycle {
                ref name,
                transition: "activate",
                ..
            }) if name == "broken"
        ));
        assert_eq!(counters.activated.load(Ordering::SeqCst), 1);
        assert_eq!(registry.active_count(), 1);

        // Lookups still work after the failure
        assert!(registry.resolve("third").is_ok());

        // Only the activated plugin is deactivated
        registry.deactivate_all().unwrap();
        assert_eq!(counters.deactivated.load(Ordering::SeqCst), 1);
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn test_unload_all_idempotent() {
        let counters = Arc::new(Counters::default());
        let factory = make_factory(&counters);
        let mut registry = PluginRegistry::new();
        let specs = vec![
            PluginSpec::new("a", "Counting"),
            PluginSpec::new("b", "Counting"),
        ];
        registry
            .configure(&specs, &default_spec(), &factory, &env())
            .unwrap();
        registry.activate_all().unwrap();

        registry.unload_all();
        registry.unload_all();

        assert!(registry.is_empty());
        assert_eq!(counters.deactivated.load(Ordering::SeqCst), 2);
        assert_eq!(counters.cleaned.load(Ordering::SeqCst), 2);

        // Can be configured again after unloading
        registry
            .configure(&specs, &default_spec(), &factory, &env())
            .unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_configure_twice_rejected() {
        let counters = Arc::new(Counters::default());
        let factory = make_factory(&counters);
        let mut registry = PluginRegistry::new();
        registry
            .configure(&[], &default_spec(), &factory, &env())
            .unwrap();
        assert!(
            registry
                .configure(&[], &default_spec(), &factory, &env())
                .is_err()
        );
        assert_eq!(counters.configured.load(Ordering::SeqCst), 1);
    }
}
