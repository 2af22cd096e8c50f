//! Shared fixtures for server integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use dhruva_karya::core::types::COST_FREE;
use dhruva_karya::environment::EnvironmentUpdate;
use dhruva_karya::{
    Artifact, EnvironmentHandle, KaryaConfig, KaryaError, MapSnapshot, NavigationRequest,
    PluginSpec, Point2D, Pose2D, Result, StampedPose, StepContext, StepResult, TaskPlugin,
    TaskServer,
};

pub const WAIT: Duration = Duration::from_secs(5);

/// Config with a fast loop and the given plugins.
pub fn fast_config(plugins: Vec<PluginSpec>) -> KaryaConfig {
    let mut config = KaryaConfig::default();
    config.server.poll_interval_ms = 5;
    config.server.max_iterations = 1000;
    config.server.max_duration_secs = 5.0;
    config.plugins = plugins;
    config
}

/// Environment with the robot at the origin on a free 4m x 4m map.
pub fn environment_with_robot() -> EnvironmentHandle {
    let env = EnvironmentHandle::new("map");
    let map = MapSnapshot::new("map", 80, 80, 0.05, Point2D::new(-2.0, -2.0), COST_FREE);
    env.publish(EnvironmentUpdate::new(
        Some(StampedPose::new("map", Pose2D::new(0.0, 0.0, 0.0), 1)),
        Some(Arc::new(map)),
        1,
    ));
    env
}

pub fn goal_request(id: &str, x: f32, y: f32) -> NavigationRequest {
    NavigationRequest::new(id, StampedPose::new("map", Pose2D::new(x, y, 0.0), 0))
}

pub fn active_server(server: TaskServer) -> TaskServer {
    server.configure().unwrap();
    server.activate().unwrap();
    server
}

/// Lifecycle and step counters shared between a test and its plugins.
#[derive(Default)]
pub struct Counters {
    pub configured: AtomicUsize,
    pub activated: AtomicUsize,
    pub deactivated: AtomicUsize,
    pub cleaned: AtomicUsize,
    pub steps: AtomicUsize,
    pub aborted: AtomicUsize,
    /// While set, `activate` fails
    pub fail_activate: AtomicBool,
    /// Delay before a refused activation returns, in milliseconds
    pub fail_activate_delay_ms: AtomicU64,
}

impl Counters {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// Never finishes; counts lifecycle calls.
pub struct CountingPlugin {
    pub counters: Arc<Counters>,
}

impl TaskPlugin for CountingPlugin {
    fn configure(&mut self, _name: &str, _environment: EnvironmentHandle) -> Result<()> {
        self.counters.configured.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn activate(&mut self) -> Result<()> {
        if self.counters.fail_activate.load(Ordering::SeqCst) {
            let delay = self.counters.fail_activate_delay_ms.load(Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(delay));
            return Err(KaryaError::Fatal("activation refused".to_string()));
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
        self.counters.steps.fetch_add(1, Ordering::SeqCst);
        StepResult::Progress(None)
    }

    fn abort(&mut self) {
        self.counters.aborted.fetch_add(1, Ordering::SeqCst);
    }
}

/// Register `Counting` plugins sharing `counters`.
pub fn with_counting(server: TaskServer, counters: &Arc<Counters>) -> TaskServer {
    let counters = Arc::clone(counters);
    server.with_plugin_type("Counting", move |_| {
        Ok(Box::new(CountingPlugin {
            counters: Arc::clone(&counters),
        }) as Box<dyn TaskPlugin>)
    })
}

/// Always fails fatally.
pub struct FatalPlugin;

impl TaskPlugin for FatalPlugin {
    fn configure(&mut self, _name: &str, _environment: EnvironmentHandle) -> Result<()> {
        Ok(())
    }

    fn compute_step(&mut self, _ctx: &StepContext<'_>) -> StepResult {
        StepResult::FatalFailure("goal unreachable".to_string())
    }
}

/// Blocks inside each step until released, then succeeds.
///
/// Sends the iteration number on `entered` when a step starts.
pub struct GatePlugin {
    entered: Sender<u32>,
    release: Receiver<()>,
}

impl TaskPlugin for GatePlugin {
    fn configure(&mut self, _name: &str, _environment: EnvironmentHandle) -> Result<()> {
        Ok(())
    }

    fn compute_step(&mut self, ctx: &StepContext<'_>) -> StepResult {
        let _ = self.entered.send(ctx.iteration);
        let _ = self.release.recv_timeout(WAIT);
        StepResult::Succeeded(Artifact::Elapsed { secs: 0.0 })
    }
}

/// Test-side ends of a [`GatePlugin`].
pub struct Gate {
    pub entered: Receiver<u32>,
    pub release: Sender<()>,
}

impl Gate {
    /// Wait until the plugin is inside a step.
    pub fn wait_entered(&self) -> u32 {
        self.entered.recv_timeout(WAIT).unwrap()
    }

    pub fn open(&self) {
        self.release.send(()).unwrap();
    }
}

/// Register `Gate` plugins; every instance shares the returned gate.
pub fn with_gate(server: TaskServer) -> (TaskServer, Gate) {
    let (entered_tx, entered_rx) = crossbeam_channel::unbounded();
    let (release_tx, release_rx) = crossbeam_channel::unbounded();
    let server = server.with_plugin_type("Gate", move |_| {
        Ok(Box::new(GatePlugin {
            entered: entered_tx.clone(),
            release: release_rx.clone(),
        }) as Box<dyn TaskPlugin>)
    });
    (
        server,
        Gate {
            entered: entered_rx,
            release: release_tx,
        },
    )
}

/// Panics on targets left of the origin, succeeds elsewhere.
pub struct PanickyPlugin;

impl TaskPlugin for PanickyPlugin {
    fn configure(&mut self, _name: &str, _environment: EnvironmentHandle) -> Result<()> {
        Ok(())
    }

    fn compute_step(&mut self, ctx: &StepContext<'_>) -> StepResult {
        if ctx.target.pose.x < 0.0 {
            panic!("index out of range");
        }
        StepResult::Succeeded(Artifact::Elapsed { secs: 0.0 })
    }
}

pub fn with_panicky(server: TaskServer) -> TaskServer {
    server.with_plugin_type("Panicky", |_| {
        Ok(Box::new(PanickyPlugin) as Box<dyn TaskPlugin>)
    })
}

pub fn with_fatal(server: TaskServer) -> TaskServer {
    server.with_plugin_type("Fatal", |_| Ok(Box::new(FatalPlugin) as Box<dyn TaskPlugin>))
}
