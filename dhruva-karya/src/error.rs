//! Error types for DhruvaKarya

use thiserror::Error;

use crate::lifecycle::{ServerState, Transition};

/// DhruvaKarya error type
#[derive(Error, Debug)]
pub enum KaryaError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Duplicate plugin name: {0}")]
    DuplicatePlugin(String),

    #[error("Failed to load plugin '{name}': {reason}")]
    PluginLoad { name: String, reason: String },

    #[error("Plugin '{name}' failed to {transition}: {reason}")]
    PluginLifecycle {
        name: String,
        transition: &'static str,
        reason: String,
    },

    #[error("Plugin '{name}' not found, available: [{available}]")]
    PluginNotFound { name: String, available: String },

    #[error("Server is not active (state: {0})")]
    ServerNotActive(ServerState),

    #[error("Request queue is full ({0} pending)")]
    ServerBusy(usize),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Cannot {transition} from state {from}")]
    InvalidTransition {
        from: ServerState,
        transition: Transition,
    },

    #[error("Environment error: {0}")]
    Environment(String),

    #[error("Fatal lifecycle error: {0}")]
    Fatal(String),
}

impl KaryaError {
    /// Whether this error belongs to the configuration class (bad config, duplicate names).
    pub fn is_configuration(&self) -> bool {
        matches!(self, KaryaError::Config(_) | KaryaError::DuplicatePlugin(_))
    }
}

impl From<toml::de::Error> for KaryaError {
    fn from(e: toml::de::Error) -> Self {
        KaryaError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, KaryaError>;
