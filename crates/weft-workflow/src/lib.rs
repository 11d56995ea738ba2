//! Runs persisted workflow graphs as conversational sessions.
//!
//! A session's worker loads its graph ([`loader`]), turns tool records into
//! capabilities ([`factory`]), builds the top-level orchestrator
//! ([`synthesizer`]) and then serves turns over the [`protocol`] until told
//! to stop. [`SessionManager`] starts workers and routes their output.

pub mod dispatch;
pub mod factory;
pub mod launcher;
pub mod loader;
pub mod manager;
pub mod protocol;
pub mod synthesizer;
pub mod worker;

pub use dispatch::{TurnEvent, TurnStream};
pub use factory::{AgentBuilder, CapabilityFactory};
pub use launcher::WorkerLauncher;
pub use manager::{Activation, SessionInfo, SessionManager};
pub use protocol::{Frame, InputCommand};
pub use synthesizer::{synthesize, Orchestrator};
pub use worker::{run_worker, WorkerContext};

use serde::{Deserialize, Serialize};

/// What a session runs: a stored graph, or a single agent on its own.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "id")]
pub enum WorkflowTarget {
    Graph(String),
    Agent(String),
}

impl WorkflowTarget {
    pub fn id(&self) -> &str {
        match self {
            Self::Graph(id) | Self::Agent(id) => id,
        }
    }

    /// Whether edits to the store can make a running session stale.
    pub fn tracks_edits(&self) -> bool {
        matches!(self, Self::Graph(_))
    }
}

impl std::fmt::Display for WorkflowTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Graph(id) => write!(f, "graph {}", id),
            Self::Agent(id) => write!(f, "agent {}", id),
        }
    }
}
