//! Wait recovery: hold position for a fixed duration.

use std::time::{Duration, Instant};

use crate::config::PluginSpec;
use crate::environment::EnvironmentHandle;
use crate::error::{KaryaError, Result};
use crate::plugin::{Artifact, StepContext, StepResult, TaskPlugin};

/// Recovery that succeeds once `duration` has elapsed since the first step.
#[derive(Debug)]
pub struct WaitRecovery {
    name: String,
    duration: Duration,
    started: Option<Instant>,
    active: bool,
}

impl WaitRecovery {
    pub fn new(duration: Duration) -> Self {
        Self {
            name: String::new(),
            duration,
            started: None,
            active: false,
        }
    }

    /// Build from plugin parameter `duration_secs` (default 1.0).
    pub fn from_spec(spec: &PluginSpec) -> Result<Self> {
        let secs = spec.param_f32("duration_secs", 1.0)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(KaryaError::PluginLoad {
                name: spec.name.clone(),
                reason: format!("duration_secs must be >= 0, got {}", secs),
            });
        }
        let duration = Duration::try_from_secs_f32(secs).map_err(|e| KaryaError::PluginLoad {
            name: spec.name.clone(),
            reason: format!("duration_secs {} is out of range: {}", secs, e),
        })?;
        Ok(Self::new(duration))
    }
}

impl TaskPlugin for WaitRecovery {
    fn configure(&mut self, name: &str, _environment: EnvironmentHandle) -> Result<()> {
        tracing::info!(
            "Configuring wait recovery '{}' ({:.1}s)",
            name,
            self.duration.as_secs_f32()
        );
        self.name = name.to_string();
        Ok(())
    }

    fn activate(&mut self) -> Result<()> {
        self.active = true;
        Ok(())
    }

    fn deactivate(&mut self) -> Result<()> {
        self.active = false;
        self.started = None;
        Ok(())
    }

    fn reset(&mut self) {
        self.started = None;
    }

    fn compute_step(&mut self, _ctx: &StepContext<'_>) -> StepResult {
        if !self.active {
            return StepResult::FatalFailure(format!("recovery '{}' is not active", self.name));
        }

        let started = *self.started.get_or_insert_with(Instant::now);
        let elapsed = started.elapsed();
        let artifact = Artifact::Elapsed {
            secs: elapsed.as_secs_f32(),
        };

        if elapsed >= self.duration {
            StepResult::Succeeded(artifact)
        } else {
            StepResult::Progress(Some(artifact))
        }
    }

    fn abort(&mut self) {
        if let Some(started) = self.started.take() {
            tracing::debug!(
                "Wait recovery '{}' aborted after {:.2}s",
                self.name,
                started.elapsed().as_secs_f32()
            );
        }
    }
}
