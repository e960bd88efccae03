//! Errors - エラー型と分類
//!
//! - `ChunkLoadError`: recoverable at the call site, cloned to every waiter
//! - `LoaderError`: everything a runtime operation can fail with

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::ids::{ChunkId, ModuleId};

/// LoadPhase は chunk fetch がどこで失敗したか
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadPhase {
    /// The script loaded but never registered the chunk.
    Missing,
    /// The host reported an error event.
    Error,
    /// Neither load nor error within the timeout window.
    Timeout,
}

impl LoadPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Error => "error",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for LoadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of one chunk fetch. Every waiter of the chunk receives an equal copy.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("Loading chunk {chunk_id} failed.\n({phase}: {url})")]
pub struct ChunkLoadError {
    pub phase: LoadPhase,
    pub url: String,
    pub chunk_id: ChunkId,
}

impl ChunkLoadError {
    pub fn new(phase: LoadPhase, url: impl Into<String>, chunk_id: ChunkId) -> Self {
        Self {
            phase,
            url: url.into(),
            chunk_id,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("Cannot find module '{0}'")]
    MissingModule(ModuleId),

    #[error("module '{0}' required itself before it finished initializing")]
    CircularRequire(ModuleId),

    #[error("module '{id}' failed to initialize: {reason}")]
    ModuleFailed { id: ModuleId, reason: String },

    #[error("module '{0}' is already registered")]
    DuplicateModule(ModuleId),

    #[error("no asset is known for chunk '{0}'")]
    UnknownChunk(String),

    #[error(transparent)]
    ChunkLoad(#[from] ChunkLoadError),

    #[error("chunk queue is shut down")]
    Shutdown,

    #[error("chunk queue worker already started")]
    AlreadyStarted,

    #[error("invalid manifest: {0}")]
    Manifest(String),
}

impl LoaderError {
    /// Build a `ModuleFailed` from any displayable cause.
    pub fn module_failed(id: ModuleId, reason: impl fmt::Display) -> Self {
        Self::ModuleFailed {
            id,
            reason: reason.to_string(),
        }
    }

    /// The chunk error, when this is one.
    pub fn as_chunk_load(&self) -> Option<&ChunkLoadError> {
        match self {
            Self::ChunkLoad(e) => Some(e),
            _ => None,
        }
    }
}
