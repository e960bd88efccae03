//! Chunk state machine.
//!
//! State transitions:
//! - (absent) -> InFlight -> Resolved
//! - (absent) -> InFlight -> Failed
//! - (absent) -> Resolved (registered without being requested, or a runtime chunk)
//! - (absent) -> Skipped
//!
//! Resolved / Skipped / Failed are terminal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use super::errors::ChunkLoadError;

/// A caller waiting for a chunk; released exactly once.
pub type Waiter = oneshot::Sender<Result<(), ChunkLoadError>>;

#[derive(Debug)]
pub enum ChunkState {
    /// A fetch is running; waiters in attachment order.
    InFlight(Vec<Waiter>),
    Resolved { at: DateTime<Utc> },
    /// Never fetched; treated as ready.
    Skipped,
    Failed(ChunkLoadError),
}

impl ChunkState {
    pub fn resolved_now() -> Self {
        Self::Resolved { at: Utc::now() }
    }

    /// Ready for gated tasks.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Resolved { .. } | Self::Skipped)
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InFlight(_))
    }

    pub fn status(&self) -> ChunkStatus {
        match self {
            Self::InFlight(waiters) => ChunkStatus::InFlight {
                waiters: waiters.len(),
            },
            Self::Resolved { at } => ChunkStatus::Resolved { at: *at },
            Self::Skipped => ChunkStatus::Skipped,
            Self::Failed(error) => ChunkStatus::Failed {
                error: error.clone(),
            },
        }
    }
}

/// Read-only view of a chunk's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ChunkStatus {
    InFlight { waiters: usize },
    Resolved { at: DateTime<Utc> },
    Skipped,
    Failed { error: ChunkLoadError },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChunkId, LoadPhase};

    #[test]
    fn readiness() {
        assert!(ChunkState::resolved_now().is_ready());
        assert!(ChunkState::Skipped.is_ready());
        assert!(!ChunkState::InFlight(Vec::new()).is_ready());
        let failed = ChunkState::Failed(ChunkLoadError::new(
            LoadPhase::Error,
            "/x.js",
            ChunkId::new(1),
        ));
        assert!(!failed.is_ready());
        assert!(failed.is_terminal());
        assert!(!ChunkState::InFlight(Vec::new()).is_terminal());
    }

    #[test]
    fn status_counts_waiters() {
        let (tx, _rx) = oneshot::channel();
        let state = ChunkState::InFlight(vec![tx]);
        assert_eq!(state.status(), ChunkStatus::InFlight { waiters: 1 });
    }

    #[test]
    fn status_serializes_with_tag() {
        let json = serde_json::to_value(ChunkStatus::Skipped).unwrap();
        assert_eq!(json, serde_json::json!({ "state": "skipped" }));
    }
}
