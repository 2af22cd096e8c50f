//! Configuration loading for DhruvaKarya

use crate::error::{KaryaError, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Clone, Debug, Default, Deserialize)]
pub struct KaryaConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub environment: EnvironmentConfig,
    /// Ordered plugin list; empty selects the built-in default plugin
    #[serde(default)]
    pub plugins: Vec<PluginSpec>,
}

/// Task server settings
#[derive(Clone, Debug, Deserialize)]
pub struct ServerConfig {
    /// Server name used in logs (default: "task_server")
    #[serde(default = "default_server_name")]
    pub name: String,

    /// Goal tolerance in meters (default: 0.25)
    #[serde(default = "default_goal_tolerance")]
    pub goal_tolerance: f32,

    /// Plugin used when a request names none (default: "default")
    #[serde(default = "default_plugin_name")]
    pub default_plugin: String,

    /// Type loaded when the plugin list is empty (default: "StraightLinePlanner")
    #[serde(default = "default_plugin_type")]
    pub default_plugin_type: String,

    /// Wait between loop iterations in milliseconds (default: 50)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Maximum plugin steps per request (default: 200)
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Wall-clock budget per request in seconds (default: 10.0)
    #[serde(default = "default_max_duration_secs")]
    pub max_duration_secs: f32,

    /// Requests allowed to wait behind the active one (default: 4)
    #[serde(default = "default_max_pending_requests")]
    pub max_pending_requests: usize,

    /// Expected plugin step rate; slower steps are logged (default: 20.0, 0 disables)
    #[serde(default = "default_expected_frequency_hz")]
    pub expected_frequency_hz: f32,
}

/// Environment feed settings
#[derive(Clone, Debug, Deserialize)]
pub struct EnvironmentConfig {
    /// Global frame of poses and map (default: "map")
    #[serde(default = "default_frame_id")]
    pub frame_id: String,

    /// Background update loop rate (default: 10.0)
    #[serde(default = "default_update_rate_hz")]
    pub update_rate_hz: f32,

    /// Simulated robot start pose
    #[serde(default)]
    pub start_x: f32,
    #[serde(default)]
    pub start_y: f32,
    #[serde(default)]
    pub start_theta: f32,

    /// Polls before the simulated pose becomes available (default: 0)
    #[serde(default)]
    pub localization_warmup_polls: u32,

    #[serde(default)]
    pub map: SimulatedMapConfig,
}

/// Static map served by the simulated environment
#[derive(Clone, Debug, Deserialize)]
pub struct SimulatedMapConfig {
    /// Width in cells (default: 200)
    #[serde(default = "default_map_width")]
    pub width: usize,

    /// Height in cells (default: 200)
    #[serde(default = "default_map_height")]
    pub height: usize,

    /// Meters per cell (default: 0.05)
    #[serde(default = "default_map_resolution")]
    pub resolution: f32,

    /// World position of cell (0, 0) (default: -5.0, -5.0)
    #[serde(default = "default_map_origin")]
    pub origin_x: f32,
    #[serde(default = "default_map_origin")]
    pub origin_y: f32,

    /// Circular obstacles as [x, y, radius]
    #[serde(default)]
    pub obstacles: Vec<[f32; 3]>,
}

/// One entry of the plugin list
#[derive(Clone, Debug, Deserialize)]
pub struct PluginSpec {
    /// Unique plugin name requests refer to
    pub name: String,

    /// Implementation type known to the plugin factory
    #[serde(rename = "type")]
    pub plugin_type: String,

    /// Plugin-specific parameters
    #[serde(default)]
    pub params: toml::Table,
}

impl PluginSpec {
    pub fn new(name: impl Into<String>, plugin_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            plugin_type: plugin_type.into(),
            params: toml::Table::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<toml::Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    /// Read a float parameter, accepting integers too.
    pub fn param_f32(&self, key: &str, default: f32) -> Result<f32> {
        match self.params.get(key) {
            None => Ok(default),
            Some(toml::Value::Float(v)) => Ok(*v as f32),
            Some(toml::Value::Integer(v)) => Ok(*v as f32),
            Some(other) => Err(self.param_error(key, "a number", other)),
        }
    }

    pub fn param_bool(&self, key: &str, default: bool) -> Result<bool> {
        match self.params.get(key) {
            None => Ok(default),
            Some(toml::Value::Boolean(v)) => Ok(*v),
            Some(other) => Err(self.param_error(key, "a boolean", other)),
        }
    }

    fn param_error(&self, key: &str, expected: &str, found: &toml::Value) -> KaryaError {
        KaryaError::PluginLoad {
            name: self.name.clone(),
            reason: format!(
                "parameter '{}' must be {}, found {}",
                key,
                expected,
                found.type_str()
            ),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_server_name(),
            goal_tolerance: default_goal_tolerance(),
            default_plugin: default_plugin_name(),
            default_plugin_type: default_plugin_type(),
            poll_interval_ms: default_poll_interval_ms(),
            max_iterations: default_max_iterations(),
            max_duration_secs: default_max_duration_secs(),
            max_pending_requests: default_max_pending_requests(),
            expected_frequency_hz: default_expected_frequency_hz(),
        }
    }
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            frame_id: default_frame_id(),
            update_rate_hz: default_update_rate_hz(),
            start_x: 0.0,
            start_y: 0.0,
            start_theta: 0.0,
            localization_warmup_polls: 0,
            map: SimulatedMapConfig::default(),
        }
    }
}

impl Default for SimulatedMapConfig {
    fn default() -> Self {
        Self {
            width: default_map_width(),
            height: default_map_height(),
            resolution: default_map_resolution(),
            origin_x: default_map_origin(),
            origin_y: default_map_origin(),
            obstacles: Vec::new(),
        }
    }
}

// Default value functions
fn default_server_name() -> String {
    "task_server".to_string()
}
fn default_goal_tolerance() -> f32 {
    crate::goal::DEFAULT_GOAL_TOLERANCE
}
fn default_plugin_name() -> String {
    "default".to_string()
}
fn default_plugin_type() -> String {
    crate::plugin::builtin::STRAIGHT_LINE_PLANNER.to_string()
}
fn default_poll_interval_ms() -> u64 {
    50
}
fn default_max_iterations() -> u32 {
    200
}
fn default_max_duration_secs() -> f32 {
    10.0
}
fn default_max_pending_requests() -> usize {
    4
}
fn default_expected_frequency_hz() -> f32 {
    20.0
}
fn default_frame_id() -> String {
    "map".to_string()
}
fn default_update_rate_hz() -> f32 {
    10.0
}
fn default_map_width() -> usize {
    200
}
fn default_map_height() -> usize {
    200
}
fn default_map_resolution() -> f32 {
    0.05
}
fn default_map_origin() -> f32 {
    -5.0
}

impl ServerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Wall-clock budget per request. Saturates for out-of-range values,
    /// which [`KaryaConfig::validate`] rejects.
    pub fn max_duration(&self) -> Duration {
        Duration::try_from_secs_f32(self.max_duration_secs).unwrap_or(Duration::MAX)
    }

    /// Step duration above which a slow-step warning is logged.
    pub fn expected_step_period(&self) -> Option<Duration> {
        if self.expected_frequency_hz <= 0.0 {
            return None;
        }
        Duration::try_from_secs_f32(1.0 / self.expected_frequency_hz).ok()
    }
}

/// `secs` as a [`Duration`], or a config error naming `key`.
fn config_duration(key: &str, secs: f32) -> Result<Duration> {
    Duration::try_from_secs_f32(secs)
        .map_err(|e| KaryaError::Config(format!("{} is out of range ({}): {}", key, secs, e)))
}

impl KaryaConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| KaryaError::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: KaryaConfig = toml::from_str(content)?;
        Ok(config)
    }

    /// Check values that would otherwise fail at runtime.
    ///
    /// Duplicate plugin names are left to the registry, which reports them
    /// as [`KaryaError::DuplicatePlugin`].
    pub fn validate(&self) -> Result<()> {
        let server = &self.server;
        if !server.goal_tolerance.is_finite() || server.goal_tolerance < 0.0 {
            return Err(KaryaError::Config(format!(
                "server.goal_tolerance must be >= 0, got {}",
                server.goal_tolerance
            )));
        }
        if server.poll_interval_ms == 0 {
            return Err(KaryaError::Config(
                "server.poll_interval_ms must be > 0".to_string(),
            ));
        }
        if server.max_iterations == 0 {
            return Err(KaryaError::Config(
                "server.max_iterations must be > 0".to_string(),
            ));
        }
        if !server.max_duration_secs.is_finite() || server.max_duration_secs <= 0.0 {
            return Err(KaryaError::Config(format!(
                "server.max_duration_secs must be > 0, got {}",
                server.max_duration_secs
            )));
        }
        config_duration("server.max_duration_secs", server.max_duration_secs)?;
        if !server.expected_frequency_hz.is_finite() || server.expected_frequency_hz < 0.0 {
            return Err(KaryaError::Config(format!(
                "server.expected_frequency_hz must be >= 0, got {}",
                server.expected_frequency_hz
            )));
        }
        if server.expected_frequency_hz > 0.0 {
            config_duration(
                "1 / server.expected_frequency_hz",
                1.0 / server.expected_frequency_hz,
            )?;
        }
        let update_rate_hz = self.environment.update_rate_hz;
        if !update_rate_hz.is_finite() || update_rate_hz <= 0.0 {
            return Err(KaryaError::Config(format!(
                "environment.update_rate_hz must be > 0, got {}",
                self.environment.update_rate_hz
            )));
        }
        if self.plugins.iter().any(|p| p.name.is_empty()) {
            return Err(KaryaError::Config("plugin names must not be empty".to_string()));
        }
        Ok(())
    }
}
