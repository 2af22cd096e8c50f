//! Server lifecycle: states, transitions and the resource ledger.
//!
//! ```text
//!                configure            activate
//! Unconfigured ────────────► Inactive ─────────► Active
//!      ▲        cleanup         │  ▲  deactivate   │
//!      └────────────────────────┘  └───────────────┘
//!
//! any ──shutdown──► Finalized
//! any ──transition failure──► ErrorProcessing ──(recovery fails)──► Finalized
//! ```
//!
//! Every resource a transition acquires is recorded in the [`ResourceLedger`]
//! so shutdown and error recovery can release exactly what is held, in
//! reverse acquisition order.

mod ledger;
mod state;

pub use ledger::{Resource, ResourceLedger, ResourceStats};
pub use state::{ServerState, Transition};
