//! Lifecycle-managed task server.
//!
//! [`TaskServer`] owns the plugin registry, the environment update loop, the
//! result channel and the action worker, and brings them up and down through
//! the lifecycle transitions:
//!
//! ```text
//! configure:  bind environment ─► load plugins ─► open result channel
//! activate:   start update loop ─► activate plugins ─► start action worker
//! deactivate: stop worker (cancel active, fail pending) ─► deactivate plugins ─► stop update loop
//! cleanup:    close result channel ─► unload plugins ─► release environment
//! ```
//!
//! Every acquisition is recorded in a [`ResourceLedger`]. A failed transition
//! moves the server to `ErrorProcessing` and releases what that transition
//! acquired; shutdown releases everything still held in reverse order.

mod action;
mod publisher;
mod request;

pub use action::{ActionSettings, ActionWorker};
pub use publisher::{PublishedResult, ResultPublisher};
pub use request::{
    CancelToken, FailureKind, NavigationRequest, RequestHandle, TaskEvent, TaskFailure,
    TaskOutcome, TaskStatus,
};

use std::sync::Arc;

use crossbeam_channel::Receiver;
use parking_lot::Mutex;

use crate::config::{KaryaConfig, PluginSpec};
use crate::environment::{EnvironmentHandle, EnvironmentSource, EnvironmentUpdater};
use crate::error::{KaryaError, Result};
use crate::lifecycle::{Resource, ResourceLedger, ResourceStats, ServerState, Transition};
use crate::plugin::{PluginFactory, PluginRegistry, TaskPlugin};

use request::WorkItem;

/// Navigation task server.
///
/// All lifecycle calls serialize on one internal lock; `submit` takes the
/// same lock only long enough to check the state and enqueue.
pub struct TaskServer {
    core: Mutex<ServerCore>,
}

impl TaskServer {
    /// Create an unconfigured server with the built-in plugin types.
    pub fn new(config: KaryaConfig, environment: EnvironmentHandle) -> Self {
        Self {
            core: Mutex::new(ServerCore::new(config, environment)),
        }
    }

    /// Feed the environment from `source` while active.
    pub fn with_source(mut self, source: Box<dyn EnvironmentSource>) -> Self {
        self.core.get_mut().source = Some(source);
        self
    }

    /// Replace the plugin factory.
    pub fn with_factory(mut self, factory: PluginFactory) -> Self {
        self.core.get_mut().factory = factory;
        self
    }

    /// Register an additional plugin type.
    pub fn with_plugin_type<F>(mut self, type_name: impl Into<String>, constructor: F) -> Self
    where
        F: Fn(&PluginSpec) -> Result<Box<dyn TaskPlugin>> + Send + Sync + 'static,
    {
        self.core.get_mut().factory.register(type_name, constructor);
        self
    }

    pub fn configure(&self) -> Result<()> {
        self.core.lock().transition(Transition::Configure)
    }

    pub fn activate(&self) -> Result<()> {
        self.core.lock().transition(Transition::Activate)
    }

    pub fn deactivate(&self) -> Result<()> {
        self.core.lock().transition(Transition::Deactivate)
    }

    pub fn cleanup(&self) -> Result<()> {
        self.core.lock().transition(Transition::Cleanup)
    }

    /// Release everything and finalize. Valid from any non-final state.
    pub fn shutdown(&self) -> Result<()> {
        self.core.lock().transition(Transition::Shutdown)
    }

    /// Replace the configuration before the next `configure`.
    ///
    /// Only allowed while unconfigured or after a failed transition.
    pub fn set_config(&self, config: KaryaConfig) -> Result<()> {
        let mut core = self.core.lock();
        match core.state {
            ServerState::Unconfigured | ServerState::ErrorProcessing => {
                tracing::info!("[{}] Configuration replaced", config.server.name);
                core.config = config;
                Ok(())
            }
            state => Err(KaryaError::Config(format!(
                "configuration can only be replaced while {} or {} (state: {})",
                ServerState::Unconfigured,
                ServerState::ErrorProcessing,
                state
            ))),
        }
    }

    pub fn state(&self) -> ServerState {
        self.core.lock().state
    }

    /// Acquire/release counts for `resource` since the server was created.
    pub fn resource_stats(&self, resource: Resource) -> ResourceStats {
        self.core.lock().ledger.stats(resource)
    }

    /// Resources currently held, in acquisition order.
    pub fn held_resources(&self) -> Vec<Resource> {
        self.core.lock().ledger.held().to_vec()
    }

    /// True when every acquisition so far has been matched by a release.
    pub fn is_balanced(&self) -> bool {
        self.core.lock().ledger.is_balanced()
    }

    /// Subscribe to successful results. `None` unless configured.
    pub fn subscribe_results(&self) -> Option<Receiver<PublishedResult>> {
        self.core
            .lock()
            .publisher
            .as_ref()
            .map(|publisher| publisher.subscribe())
    }

    /// Names of the loaded plugins; empty while unconfigured or active.
    pub fn plugin_names(&self) -> Vec<String> {
        self.core
            .lock()
            .registry
            .as_ref()
            .map(|r| r.names().into_iter().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Submit a request. The handle always receives exactly one `Finished` event.
    pub fn submit(&self, request: NavigationRequest) -> RequestHandle {
        let (item, handle) = WorkItem::channel(request);
        let core = self.core.lock();

        if core.state != ServerState::Active {
            item.reject(&KaryaError::ServerNotActive(core.state));
            return handle;
        }
        if let Err(e) = item.request.validate() {
            item.reject(&e);
            return handle;
        }
        match &core.worker {
            Some(worker) => {
                tracing::debug!(
                    "[{}] Queued request '{}' ({} pending)",
                    core.config.server.name,
                    item.request_id(),
                    worker.pending()
                );
                worker.enqueue(item);
            }
            None => item.reject(&KaryaError::ServerNotActive(core.state)),
        }
        handle
    }
}

impl Drop for TaskServer {
    fn drop(&mut self) {
        let core = self.core.get_mut();
        if core.state != ServerState::Finalized
            && let Err(e) = core.transition(Transition::Shutdown)
        {
            tracing::error!("[{}] Shutdown on drop failed: {}", core.config.server.name, e);
        }
    }
}

/// Everything guarded by the server lock.
struct ServerCore {
    config: KaryaConfig,
    environment: EnvironmentHandle,
    factory: PluginFactory,
    state: ServerState,
    ledger: ResourceLedger,

    /// Environment bound while configured
    bound_environment: Option<EnvironmentHandle>,
    /// Loaded plugins; `None` while the worker owns them or when unconfigured
    registry: Option<PluginRegistry>,
    publisher: Option<Arc<ResultPublisher>>,
    /// Source waiting to be handed to the update loop
    source: Option<Box<dyn EnvironmentSource>>,
    updater: Option<EnvironmentUpdater>,
    worker: Option<ActionWorker>,
}

impl ServerCore {
    fn new(config: KaryaConfig, environment: EnvironmentHandle) -> Self {
        Self {
            config,
            environment,
            factory: PluginFactory::with_builtins(),
            state: ServerState::Unconfigured,
            ledger: ResourceLedger::new(),
            bound_environment: None,
            registry: None,
            publisher: None,
            source: None,
            updater: None,
            worker: None,
        }
    }

    fn name(&self) -> &str {
        &self.config.server.name
    }

    fn transition(&mut self, transition: Transition) -> Result<()> {
        let from = self.state;
        let target = from
            .target(transition)
            .filter(|_| self.retry_allowed(transition))
            .ok_or(KaryaError::InvalidTransition { from, transition })?;

        tracing::info!("[{}] {}: {} -> {}", self.name(), transition, from, target);

        let result = match transition {
            Transition::Configure => self.on_configure(),
            Transition::Activate => self.on_activate(),
            Transition::Deactivate => self.release_held(&Resource::ACTIVATE),
            Transition::Cleanup => self.release_held(&ALL_RESOURCES),
            Transition::Shutdown => self.release_held(&ALL_RESOURCES),
        };

        match result {
            Ok(()) => {
                self.state = target;
                tracing::info!("[{}] Now {}", self.name(), target);
                Ok(())
            }
            Err(e) if transition == Transition::Shutdown => {
                self.state = ServerState::Finalized;
                tracing::error!("[{}] Shutdown completed with errors: {}", self.name(), e);
                Err(e)
            }
            Err(e) => Err(self.recover(transition, e)),
        }
    }

    /// From `ErrorProcessing`, configure and activate may only be retried
    /// where the failed transition left off.
    fn retry_allowed(&self, transition: Transition) -> bool {
        if self.state != ServerState::ErrorProcessing {
            return true;
        }
        match transition {
            Transition::Configure => self.ledger.is_empty(),
            Transition::Activate => {
                Resource::CONFIGURE.iter().all(|r| self.ledger.is_held(*r))
                    && self.ledger.last_held_of(&Resource::ACTIVATE).is_none()
            }
            _ => true,
        }
    }

    fn on_configure(&mut self) -> Result<()> {
        self.config.validate()?;
        for resource in Resource::CONFIGURE {
            self.acquire(resource)?;
        }
        Ok(())
    }

    fn on_activate(&mut self) -> Result<()> {
        for resource in Resource::ACTIVATE {
            self.acquire(resource)?;
        }
        Ok(())
    }

    /// Acquire `resource` unless already held.
    fn acquire(&mut self, resource: Resource) -> Result<()> {
        if self.ledger.is_held(resource) {
            tracing::debug!("[{}] {} already held", self.name(), resource);
            return Ok(());
        }

        match resource {
            Resource::EnvironmentBinding => {
                let expected = &self.config.environment.frame_id;
                if self.environment.frame_id() != expected {
                    return Err(KaryaError::Environment(format!(
                        "environment frame '{}' does not match configured frame '{}'",
                        self.environment.frame_id(),
                        expected
                    )));
                }
                self.bound_environment = Some(self.environment.clone());
            }
            Resource::PluginRegistry => {
                let environment = self.bound()?;
                let default_spec = PluginSpec::new(
                    self.config.server.default_plugin.clone(),
                    self.config.server.default_plugin_type.clone(),
                );
                let mut registry = PluginRegistry::new();
                registry.configure(
                    &self.config.plugins,
                    &default_spec,
                    &self.factory,
                    &environment,
                )?;
                self.registry = Some(registry);
            }
            Resource::ResultChannel => {
                self.publisher = Some(Arc::new(ResultPublisher::new()));
            }
            Resource::UpdateLoop => {
                // Nothing to run without a source; the environment is fed externally
                let Some(source) = self.source.take() else {
                    return Ok(());
                };
                let updater = EnvironmentUpdater::spawn(
                    source,
                    self.bound()?,
                    self.config.environment.update_rate_hz,
                )?;
                self.updater = Some(updater);
            }
            Resource::PluginsActive => {
                let registry = self.registry.as_mut().ok_or_else(|| {
                    KaryaError::Fatal("plugin registry is not loaded".to_string())
                })?;
                registry.activate_all()?;
            }
            Resource::ActionWorker => {
                let settings = ActionSettings::from_config(&self.config.server)?;
                self.start_worker(settings)?;
            }
        }

        self.ledger.record_acquire(resource);
        tracing::debug!("[{}] Acquired {}", self.name(), resource);
        Ok(())
    }

    fn start_worker(&mut self, settings: ActionSettings) -> Result<()> {
        let environment = self.bound()?;
        let publisher = self
            .publisher
            .clone()
            .ok_or_else(|| KaryaError::Fatal("result channel is not open".to_string()))?;
        let registry = self
            .registry
            .take()
            .ok_or_else(|| KaryaError::Fatal("plugin registry is not loaded".to_string()))?;
        self.worker = Some(ActionWorker::spawn(
            registry,
            environment,
            publisher,
            settings,
        )?);
        Ok(())
    }

    fn bound(&self) -> Result<EnvironmentHandle> {
        self.bound_environment
            .clone()
            .ok_or_else(|| KaryaError::Fatal("environment is not bound".to_string()))
    }

    /// Release `resource`. The ledger entry is dropped even when releasing fails.
    fn release(&mut self, resource: Resource) -> Result<()> {
        let result = match resource {
            Resource::ActionWorker => match self.worker.take() {
                Some(worker) => worker.stop().map(|registry| {
                    self.registry = Some(registry);
                }),
                None => Ok(()),
            },
            Resource::PluginsActive => match self.registry.as_mut() {
                Some(registry) => registry.deactivate_all(),
                None => Ok(()),
            },
            Resource::UpdateLoop => match self.updater.take() {
                Some(updater) => updater.stop().map(|source| {
                    self.source = Some(source);
                }),
                None => Ok(()),
            },
            Resource::ResultChannel => {
                if let Some(publisher) = self.publisher.take() {
                    publisher.close();
                }
                Ok(())
            }
            Resource::PluginRegistry => {
                if let Some(mut registry) = self.registry.take() {
                    registry.unload_all();
                }
                Ok(())
            }
            Resource::EnvironmentBinding => {
                self.bound_environment = None;
                Ok(())
            }
        };

        self.ledger.record_release(resource);
        match &result {
            Ok(()) => tracing::debug!("[{}] Released {}", self.name(), resource),
            Err(e) => tracing::error!("[{}] Failed to release {}: {}", self.name(), resource, e),
        }
        result
    }

    /// Release every held resource in `scope`, most recent first.
    ///
    /// Keeps going past failures and returns the first one.
    fn release_held(&mut self, scope: &[Resource]) -> Result<()> {
        let mut first_error = None;
        for resource in self.ledger.release_order() {
            if !scope.contains(&resource) {
                continue;
            }
            if let Err(e) = self.release(resource) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Enter `ErrorProcessing` after `transition` failed with `error`.
    fn recover(&mut self, transition: Transition, error: KaryaError) -> KaryaError {
        tracing::error!("[{}] Failed to {}: {}", self.name(), transition, error);
        self.state = ServerState::ErrorProcessing;

        let scope: &[Resource] = match transition {
            Transition::Configure | Transition::Cleanup => &Resource::CONFIGURE,
            _ => &Resource::ACTIVATE,
        };
        if let Err(recovery_error) = self.release_held(scope) {
            tracing::error!(
                "[{}] Recovery from failed {} did not complete: {}. Finalizing.",
                self.name(),
                transition,
                recovery_error
            );
            let _ = self.release_held(&ALL_RESOURCES);
            self.state = ServerState::Finalized;
            return KaryaError::Fatal(format!(
                "{} failed ({}) and recovery failed ({})",
                transition, error, recovery_error
            ));
        }

        tracing::warn!(
            "[{}] In {} after failed {}; retry, cleanup or shutdown",
            self.name(),
            self.state,
            transition
        );
        error
    }
}

const ALL_RESOURCES: [Resource; 6] = [
    Resource::EnvironmentBinding,
    Resource::PluginRegistry,
    Resource::ResultChannel,
    Resource::UpdateLoop,
    Resource::PluginsActive,
    Resource::ActionWorker,
];
