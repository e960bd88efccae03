//! Status - runtime の状態スナップショット
//!
//! 「なぜ chunk が来ないのか」を説明するための集計。
//! `Runtime::status()` で取得し、そのまま JSON にできる。

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Number of chunks per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChunkCounts {
    pub in_flight: usize,
    pub resolved: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl ChunkCounts {
    pub fn total(&self) -> usize {
        self.in_flight + self.resolved + self.skipped + self.failed
    }
}

/// RuntimeStatus は runtime 全体のスナップショット
///
/// # 使用例
/// ```ignore
/// let status = runtime.status();
/// println!("{}", serde_json::to_string_pretty(&status)?);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuntimeStatus {
    pub chunks: ChunkCounts,
    /// Script URLs with a request in flight.
    pub pending_requests: usize,
    /// Gated tasks still waiting for their chunks.
    pub gated_tasks: usize,
    pub modules_defined: usize,
    pub modules_loaded: usize,
    pub definitions_processed: usize,
    /// The queue worker has drained its backlog.
    pub draining: bool,
    pub last_resolved_at: Option<DateTime<Utc>>,
}

impl RuntimeStatus {
    /// Nothing in flight and no gated task left behind.
    pub fn is_idle(&self) -> bool {
        self.chunks.in_flight == 0 && self.pending_requests == 0 && self.gated_tasks == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_with_counts() {
        let status = RuntimeStatus {
            chunks: ChunkCounts {
                in_flight: 1,
                resolved: 2,
                skipped: 0,
                failed: 1,
            },
            pending_requests: 1,
            gated_tasks: 0,
            modules_defined: 3,
            modules_loaded: 1,
            definitions_processed: 2,
            draining: true,
            last_resolved_at: None,
        };

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["chunks"]["resolved"], 2);
        assert_eq!(json["pending_requests"], 1);
        assert!(json["last_resolved_at"].is_null());
        assert_eq!(status.chunks.total(), 4);
        assert!(!status.is_idle());
    }
}
