//! Lifecycle states and transitions.

use std::fmt;

/// Server lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerState {
    /// Nothing loaded.
    #[default]
    Unconfigured,
    /// Plugins loaded, not accepting requests.
    Inactive,
    /// Accepting and executing requests.
    Active,
    /// Terminal; every resource released.
    Finalized,
    /// A transition failed; waiting for a retry, cleanup or shutdown.
    ErrorProcessing,
}

impl ServerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerState::Unconfigured => "UNCONFIGURED",
            ServerState::Inactive => "INACTIVE",
            ServerState::Active => "ACTIVE",
            ServerState::Finalized => "FINALIZED",
            ServerState::ErrorProcessing => "ERROR_PROCESSING",
        }
    }

    /// Target state of a successful `transition` from this state, if allowed.
    ///
    /// From `ErrorProcessing` only the transition that failed may be retried;
    /// that check lives in the server, which knows which one failed.
    pub fn target(&self, transition: Transition) -> Option<ServerState> {
        use ServerState::*;
        match (self, transition) {
            (Finalized, _) => None,
            (_, Transition::Shutdown) => Some(Finalized),
            (Unconfigured | ErrorProcessing, Transition::Configure) => Some(Inactive),
            (Inactive | ErrorProcessing, Transition::Activate) => Some(Active),
            (Active, Transition::Deactivate) => Some(Inactive),
            (Inactive | ErrorProcessing, Transition::Cleanup) => Some(Unconfigured),
            _ => None,
        }
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Externally requested lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Configure,
    Activate,
    Deactivate,
    Cleanup,
    Shutdown,
}

impl Transition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transition::Configure => "configure",
            Transition::Activate => "activate",
            Transition::Deactivate => "deactivate",
            Transition::Cleanup => "cleanup",
            Transition::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
