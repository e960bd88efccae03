//! Domain model (ids, chunk state, manifest, errors).

pub mod chunk;
pub mod errors;
pub mod ids;
pub mod manifest;

pub use self::chunk::{ChunkState, ChunkStatus, Waiter};
pub use self::errors::{ChunkLoadError, LoadPhase, LoaderError};
pub use self::ids::{ChunkId, ModuleId, RequestId};
pub use self::manifest::{ChunkManifest, DEFAULT_TIMEOUT_SECS};
