//! FsScriptHost - asset directory から chunk document を配信する host
//!
//! A chunk script is a JSON document stored at the URL's path under the
//! asset root:
//!
//! ```json
//! {
//!   "chunk_ids": [93],
//!   "modules": {
//!     "3905": { "es_module": true, "exports": { "value": 1 } },
//!     "4412": { "requires": [3905], "exports": "plain value" }
//!   }
//! }
//! ```
//!
//! - unreadable file: `error`
//! - unparsable document: `load` without registering anything
//! - otherwise the definition is pushed to the chunk queue, then `load`

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::app::{ChunkDefinition, ChunkSink};
use crate::domain::{ChunkId, LoaderError, ModuleId};
use crate::module::{ModuleFactory, factory};
use crate::ports::{ScriptElement, ScriptEvent, ScriptHost};

#[derive(Debug, Clone, Deserialize)]
pub struct ChunkDocument {
    pub chunk_ids: Vec<ChunkId>,
    #[serde(default)]
    pub modules: BTreeMap<String, ModuleDocument>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModuleDocument {
    /// Exports are a module-shaped namespace; `exports` must be an object.
    #[serde(default)]
    pub es_module: bool,
    /// Modules required before this one's exports are set.
    #[serde(default)]
    pub requires: Vec<ModuleId>,
    #[serde(default)]
    pub exports: Value,
}

impl ModuleDocument {
    fn into_factory(self) -> ModuleFactory {
        factory(move |module, registry| {
            for dependency in &self.requires {
                registry.require(dependency.clone())?;
            }
            match (&self.exports, self.es_module) {
                (Value::Object(bindings), true) => {
                    for (key, value) in bindings {
                        module.export(key.clone(), value.clone());
                    }
                    module.namespace().mark_es_module();
                }
                (_, true) => {
                    return Err(LoaderError::module_failed(
                        module.id().clone(),
                        "es_module exports must be an object",
                    ));
                }
                (value, false) => module.set_exports(value.clone()),
            }
            Ok(())
        })
    }
}

impl ChunkDocument {
    pub fn parse(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn into_definition(self) -> ChunkDefinition {
        self.modules.into_iter().fold(
            ChunkDefinition::new(self.chunk_ids),
            |definition, (id, module)| {
                definition.module(ModuleId::from(id.as_str()), module.into_factory())
            },
        )
    }
}

/// FsScriptHost は asset root 以下のファイルを script として扱う
pub struct FsScriptHost {
    root: PathBuf,
    public_path: String,
    /// Srcs currently "in the document".
    document: Mutex<HashSet<String>>,
}

impl FsScriptHost {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            public_path: "/".to_string(),
            document: Mutex::new(HashSet::new()),
        }
    }

    /// URL prefix stripped before resolving a src against the root.
    pub fn with_public_path(mut self, public_path: impl Into<String>) -> Self {
        self.public_path = public_path.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File backing `src`.
    pub fn resolve(&self, src: &str) -> PathBuf {
        let relative = src.strip_prefix(self.public_path.as_str()).unwrap_or(src);
        self.root.join(relative.trim_start_matches('/'))
    }

    async fn deliver(&self, src: &str, sink: ChunkSink) -> ScriptEvent {
        let path = self.resolve(src);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) => {
                warn!(%src, path = %path.display(), error = %e, "chunk document unreadable");
                return ScriptEvent::Error;
            }
        };
        let document = match ChunkDocument::parse(&text) {
            Ok(document) => document,
            Err(e) => {
                // the script "ran" but registered nothing
                warn!(%src, error = %e, "chunk document is not valid");
                return ScriptEvent::Load;
            }
        };

        debug!(%src, chunks = ?document.chunk_ids, modules = document.modules.len(), "delivering chunk document");
        match sink.push(document.into_definition()).await {
            Ok(_) => ScriptEvent::Load,
            Err(_) => ScriptEvent::Error,
        }
    }
}

#[async_trait]
impl ScriptHost for FsScriptHost {
    fn find_script(&self, src: &str, _marker: &str) -> bool {
        self.document.lock().contains(src)
    }

    async fn append_script(&self, script: ScriptElement, sink: ChunkSink) -> ScriptEvent {
        self.document.lock().insert(script.src.clone());
        self.deliver(&script.src, sink).await
    }

    async fn watch_script(&self, script: ScriptElement, sink: ChunkSink) -> ScriptEvent {
        self.deliver(&script.src, sink).await
    }

    fn remove_script(&self, src: &str) {
        self.document.lock().remove(src);
    }
}
