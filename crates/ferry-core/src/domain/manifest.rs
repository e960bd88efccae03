//! Chunk manifest: the build-time lookup tables and loader settings.
//!
//! The manifest is plain configuration. Every field has a default so a JSON
//! file only needs to carry the tables.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::errors::LoaderError;
use super::ids::ChunkId;

/// Default fetch timeout, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkManifest {
    /// Prefix prepended to every chunk path. Must end with `/`.
    pub public_path: String,

    /// Prefix of the marker attribute that identifies loader-owned scripts.
    pub namespace: String,

    /// Chunk id -> chunk name. Chunks without a name use their id.
    pub names: BTreeMap<ChunkId, String>,

    /// Chunk id -> content hash.
    pub hashes: BTreeMap<ChunkId, String>,

    /// Chunks that ship with the runtime itself and start out resolved.
    pub runtime_chunks: Vec<ChunkId>,

    /// Chunks that are never fetched (short-circuited to ready on request).
    pub skip_chunks: Vec<ChunkId>,

    /// Optional CSP nonce placed on every script element.
    pub nonce: Option<String>,

    pub timeout_secs: u64,
}

impl Default for ChunkManifest {
    fn default() -> Self {
        Self {
            public_path: "/".to_string(),
            namespace: "docs:".to_string(),
            names: BTreeMap::new(),
            hashes: BTreeMap::new(),
            runtime_chunks: Vec::new(),
            skip_chunks: Vec::new(),
            nonce: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl ChunkManifest {
    /// Tables of the documentation site build.
    pub fn docs() -> Self {
        const NAMES: &[(u32, &str)] = &[
            (53, "935f2afb"),
            (85, "1f391b9e"),
            (93, "4796e397"),
            (202, "d9fb4dd4"),
            (237, "1df93b7f"),
            (303, "8e256448"),
            (336, "1590c889"),
            (364, "c235b22f"),
            (414, "393be207"),
            (441, "50436d32"),
            (513, "b025b8ae"),
            (514, "1be78505"),
            (522, "97582893"),
            (671, "0e384e19"),
            (775, "c31da1f8"),
            (817, "14eb3368"),
            (918, "17896441"),
            (943, "c4de80f8"),
            (956, "504864d4"),
            (993, "b621628e"),
        ];
        const HASHES: &[(u32, &str)] = &[
            (53, "30a9583f"),
            (85, "88f464bf"),
            (93, "9ad05d7d"),
            (202, "ad08b9fd"),
            (237, "e7de5013"),
            (303, "633fdac7"),
            (336, "0fd842cb"),
            (364, "00b539e6"),
            (414, "6d991e03"),
            (441, "6efd2036"),
            (513, "35010504"),
            (514, "b618256d"),
            (522, "5865bd46"),
            (666, "5e6071f6"),
            (671, "34af0f8d"),
            (775, "f6cdf672"),
            (817, "b59eb5bf"),
            (918, "c828dff0"),
            (943, "3807b502"),
            (956, "ec90ef86"),
            (972, "dd5d5686"),
            (993, "3d10d50f"),
        ];

        let table = |entries: &[(u32, &str)]| {
            entries
                .iter()
                .map(|&(id, value)| (ChunkId::new(id), value.to_string()))
                .collect::<BTreeMap<_, _>>()
        };

        Self {
            names: table(NAMES),
            hashes: table(HASHES),
            runtime_chunks: vec![ChunkId::new(552), ChunkId::new(532)],
            skip_chunks: vec![ChunkId::new(552), ChunkId::new(532)],
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self, LoaderError> {
        let manifest: Self =
            serde_json::from_str(json).map_err(|e| LoaderError::Manifest(e.to_string()))?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, LoaderError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| LoaderError::Manifest(format!("{}: {e}", path.display())))?;
        Self::from_json(&json)
    }

    /// Check the tables are usable: every named chunk has a hash.
    pub fn validate(&self) -> Result<(), LoaderError> {
        if !self.public_path.ends_with('/') {
            return Err(LoaderError::Manifest(format!(
                "public_path must end with '/': {:?}",
                self.public_path
            )));
        }
        let unhashed: Vec<String> = self
            .names
            .keys()
            .filter(|id| !self.hashes.contains_key(id))
            .map(|id| id.to_string())
            .collect();
        if !unhashed.is_empty() {
            return Err(LoaderError::Manifest(format!(
                "named chunks without a content hash: {}",
                unhashed.join(", ")
            )));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// `assets/js/{name}.{hash}.js`
    pub fn chunk_path(&self, id: ChunkId) -> Result<String, LoaderError> {
        let hash = self
            .hashes
            .get(&id)
            .ok_or_else(|| LoaderError::UnknownChunk(id.to_string()))?;
        let name = self
            .names
            .get(&id)
            .cloned()
            .unwrap_or_else(|| id.to_string());
        Ok(format!("assets/js/{name}.{hash}.js"))
    }

    /// Public path + chunk path.
    pub fn chunk_url(&self, id: ChunkId) -> Result<String, LoaderError> {
        Ok(format!("{}{}", self.public_path, self.chunk_path(id)?))
    }

    /// Resolve a chunk by its name (or by its id written as a string).
    pub fn chunk_by_name(&self, name: &str) -> Option<ChunkId> {
        self.names
            .iter()
            .find(|(_, n)| n.as_str() == name)
            .map(|(id, _)| *id)
            .or_else(|| name.parse::<ChunkId>().ok())
    }

    /// URL of the chunk with the given name.
    pub fn chunk_asset_url(&self, name: &str) -> Result<String, LoaderError> {
        let id = self
            .chunk_by_name(name)
            .ok_or_else(|| LoaderError::UnknownChunk(name.to_string()))?;
        self.chunk_url(id)
    }

    /// Marker attribute value of a chunk's script element.
    pub fn script_marker(&self, id: ChunkId) -> String {
        format!("{}chunk-{}", self.namespace, id)
    }

    pub fn is_skipped(&self, id: ChunkId) -> bool {
        self.skip_chunks.contains(&id)
    }
}
