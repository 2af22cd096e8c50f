//! Resource acquisition ledger.
//!
//! Records which lifecycle-owned resources are currently held, in
//! acquisition order, and counts every acquire/release per resource so a
//! full configure → activate → deactivate → cleanup cycle can be checked for
//! balance.

use std::collections::HashMap;
use std::fmt;

/// Resources owned by the server lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    /// Shared environment handle bound to the server and plugins
    EnvironmentBinding,
    /// Plugins loaded and configured
    PluginRegistry,
    /// Result publishing channel
    ResultChannel,
    /// Background environment update thread
    UpdateLoop,
    /// Plugins activated
    PluginsActive,
    /// Action worker thread accepting requests
    ActionWorker,
}

impl Resource {
    /// Resources acquired by `configure`, in acquisition order.
    pub const CONFIGURE: [Resource; 3] = [
        Resource::EnvironmentBinding,
        Resource::PluginRegistry,
        Resource::ResultChannel,
    ];

    /// Resources acquired by `activate`, in acquisition order.
    pub const ACTIVATE: [Resource; 3] = [
        Resource::UpdateLoop,
        Resource::PluginsActive,
        Resource::ActionWorker,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::EnvironmentBinding => "environment binding",
            Resource::PluginRegistry => "plugin registry",
            Resource::ResultChannel => "result channel",
            Resource::UpdateLoop => "environment update loop",
            Resource::PluginsActive => "active plugins",
            Resource::ActionWorker => "action worker",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Acquire/release counts for one resource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceStats {
    pub acquired: u32,
    pub released: u32,
}

impl ResourceStats {
    pub fn is_balanced(&self) -> bool {
        self.acquired == self.released
    }
}

/// Held resources in acquisition order plus lifetime counters.
#[derive(Debug, Default)]
pub struct ResourceLedger {
    held: Vec<Resource>,
    stats: HashMap<Resource, ResourceStats>,
}

impl ResourceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self, resource: Resource) -> bool {
        self.held.contains(&resource)
    }

    /// Record an acquisition. Returns false (and records nothing) if already held.
    pub fn record_acquire(&mut self, resource: Resource) -> bool {
        if self.is_held(resource) {
            return false;
        }
        self.held.push(resource);
        self.stats.entry(resource).or_default().acquired += 1;
        true
    }

    /// Record a release. Returns false if the resource was not held.
    pub fn record_release(&mut self, resource: Resource) -> bool {
        let Some(pos) = self.held.iter().position(|r| *r == resource) else {
            return false;
        };
        self.held.remove(pos);
        self.stats.entry(resource).or_default().released += 1;
        true
    }

    /// Most recently acquired resource still held, out of `candidates`.
    pub fn last_held_of(&self, candidates: &[Resource]) -> Option<Resource> {
        self.held
            .iter()
            .rev()
            .copied()
            .find(|r| candidates.contains(r))
    }

    /// Held resources, most recent first (release order).
    pub fn release_order(&self) -> Vec<Resource> {
        self.held.iter().rev().copied().collect()
    }

    pub fn held(&self) -> &[Resource] {
        &self.held
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    pub fn stats(&self, resource: Resource) -> ResourceStats {
        self.stats.get(&resource).copied().unwrap_or_default()
    }

    /// True when every resource ever acquired has been released the same number of times.
    pub fn is_balanced(&self) -> bool {
        self.held.is_empty() && self.stats.values().all(ResourceStats::is_balanced)
    }
}
