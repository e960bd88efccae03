//! ScriptHost port - script 要素を扱う document の抽象化
//!
//! The loader never touches a document or a network directly. A host inserts
//! script elements, reports their load/error events and hands the chunk
//! definitions a delivered script carries to the `ChunkSink`.

use async_trait::async_trait;

use crate::app::ChunkSink;
use crate::domain::{ChunkId, LoadPhase, RequestId};

/// Attributes of a loader-owned script element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptElement {
    pub src: String,
    pub charset: String,
    /// Seconds, mirrored from the loader's timeout.
    pub timeout_secs: u64,
    pub nonce: Option<String>,
    /// Marker attribute value (`{namespace}chunk-{id}`).
    pub marker: String,
    pub chunk_id: ChunkId,
    pub request_id: RequestId,
}

/// Terminal event of a script request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptEvent {
    Load,
    Error,
    Timeout,
}

impl ScriptEvent {
    /// Failure phase, if the chunk is still unregistered when this event
    /// arrives. A `Load` without registration means the chunk is missing.
    pub fn failure_phase(self) -> LoadPhase {
        match self {
            Self::Load => LoadPhase::Missing,
            Self::Error => LoadPhase::Error,
            Self::Timeout => LoadPhase::Timeout,
        }
    }
}

#[async_trait]
pub trait ScriptHost: Send + Sync {
    /// Is a script with this `src`, or carrying this marker, already in the
    /// document (for example from server-rendered markup)?
    fn find_script(&self, src: &str, marker: &str) -> bool;

    /// Insert a new script element and wait for its load or error event.
    async fn append_script(&self, script: ScriptElement, sink: ChunkSink) -> ScriptEvent;

    /// Wait for a script that is already in the document.
    async fn watch_script(&self, script: ScriptElement, sink: ChunkSink) -> ScriptEvent;

    /// Detach a finished script from the document.
    fn remove_script(&self, src: &str);
}
