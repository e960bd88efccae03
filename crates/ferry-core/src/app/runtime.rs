//! Runtime - module registry と chunk scheduler を束ねる context
//!
//! One `Runtime` owns every table the loader needs (modules, chunk states,
//! gated tasks, pending requests). Clones share the same tables; pass a clone
//! to whatever needs to register or look things up.
//!
//! Lock order: `deferred` before `chunks`. No lock is held while a factory,
//! an entry function or a gated body runs.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::future::try_join_all;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::deferred::{DeferredQueue, GatedBody};
use super::loader::ScriptLoader;
use super::queue::{self, ChunkDefinition, ChunkSink, QueueWorker, QueuedChunk};
use super::status::{ChunkCounts, RuntimeStatus};
use crate::domain::{
    ChunkId, ChunkLoadError, ChunkManifest, ChunkState, ChunkStatus, LoaderError, ModuleId,
    RequestId,
};
use crate::module::{Exports, ModuleRegistry};
use crate::ports::{ScriptElement, ScriptEvent, ScriptHost};

struct Inner {
    manifest: ChunkManifest,
    registry: ModuleRegistry,
    chunks: Mutex<HashMap<ChunkId, ChunkState>>,
    deferred: Mutex<DeferredQueue>,
    loader: ScriptLoader,
    sink: ChunkSink,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<QueuedChunk>>>,
    processed: AtomicUsize,
}

#[derive(Clone)]
pub struct Runtime {
    inner: Arc<Inner>,
}

impl Runtime {
    pub(crate) fn new(
        manifest: ChunkManifest,
        registry: ModuleRegistry,
        host: Arc<dyn ScriptHost>,
        backlog: Vec<ChunkDefinition>,
    ) -> Self {
        let (sink, receiver) = queue::channel();
        for definition in backlog {
            // receiver is alive until start()
            let _ = sink.enqueue(definition);
        }
        let loader = ScriptLoader::new(host, manifest.timeout());
        let chunks = manifest
            .runtime_chunks
            .iter()
            .map(|&id| (id, ChunkState::resolved_now()))
            .collect();

        Self {
            inner: Arc::new(Inner {
                manifest,
                registry,
                chunks: Mutex::new(chunks),
                deferred: Mutex::new(DeferredQueue::new()),
                loader,
                sink,
                receiver: Mutex::new(Some(receiver)),
                processed: AtomicUsize::new(0),
            }),
        }
    }

    /// Spawn the chunk queue consumer. Backlogged definitions are processed
    /// first. Can only be called once.
    pub fn start(&self) -> Result<QueueWorker, LoaderError> {
        let receiver = self
            .inner
            .receiver
            .lock()
            .take()
            .ok_or(LoaderError::AlreadyStarted)?;
        Ok(QueueWorker::spawn(self.clone(), receiver))
    }

    pub fn manifest(&self) -> &ChunkManifest {
        &self.inner.manifest
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.inner.registry
    }

    /// Where delivered scripts hand over their chunk definitions.
    pub fn sink(&self) -> &ChunkSink {
        &self.inner.sink
    }

    pub fn require(&self, id: impl Into<ModuleId>) -> Result<Exports, LoaderError> {
        self.inner.registry.require(id)
    }

    // ------------------------------------------------------------------
    // chunks
    // ------------------------------------------------------------------

    /// Make sure a chunk is available.
    ///
    /// - resolved / skipped: returns immediately
    /// - failed: the stored error (no retry)
    /// - in flight: waits on the running fetch
    /// - otherwise: starts exactly one fetch and waits
    pub async fn ensure_chunk(&self, id: impl Into<ChunkId>) -> Result<(), LoaderError> {
        let id = id.into();

        let waiter = {
            let mut chunks = self.inner.chunks.lock();
            match chunks.get_mut(&id) {
                Some(ChunkState::Resolved { .. }) | Some(ChunkState::Skipped) => return Ok(()),
                Some(ChunkState::Failed(error)) => return Err(error.clone().into()),
                Some(ChunkState::InFlight(waiters)) => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    rx
                }
                None => {
                    if self.inner.manifest.is_skipped(id) {
                        debug!(chunk = %id, "chunk skipped");
                        chunks.insert(id, ChunkState::Skipped);
                        return Ok(());
                    }
                    let url = self.inner.manifest.chunk_url(id)?;
                    let (tx, rx) = oneshot::channel();
                    chunks.insert(id, ChunkState::InFlight(vec![tx]));
                    drop(chunks);
                    self.start_fetch(id, url);
                    rx
                }
            }
        };

        waiter.await.map_err(|_| LoaderError::Shutdown)??;
        Ok(())
    }

    /// Ensure every chunk concurrently, then run `callback`.
    /// The first failure is returned and `callback` does not run.
    pub async fn ensure_chunks_then<I, F, T>(&self, ids: I, callback: F) -> Result<T, LoaderError>
    where
        I: IntoIterator,
        I::Item: Into<ChunkId>,
        F: FnOnce(&Runtime) -> T,
    {
        try_join_all(ids.into_iter().map(|id| self.ensure_chunk(id))).await?;
        Ok(callback(self))
    }

    fn start_fetch(&self, id: ChunkId, url: String) {
        let manifest = &self.inner.manifest;
        let script = ScriptElement {
            src: url.clone(),
            charset: "utf-8".to_string(),
            timeout_secs: manifest.timeout_secs,
            nonce: manifest.nonce.clone(),
            marker: manifest.script_marker(id),
            chunk_id: id,
            request_id: RequestId::generate(),
        };
        debug!(chunk = %id, %url, request_id = %script.request_id, "requesting chunk");

        let event = self.inner.loader.load(script, self.inner.sink.clone());
        let runtime = self.clone();
        tokio::spawn(async move {
            let event = event.await;
            runtime.finish_fetch(id, &url, event);
        });
    }

    /// Called when the chunk's script request ends. If the chunk registered
    /// itself in the meantime there is nothing to do.
    fn finish_fetch(&self, id: ChunkId, url: &str, event: ScriptEvent) {
        let (error, waiters) = {
            let mut chunks = self.inner.chunks.lock();
            let Some(state) = chunks.get_mut(&id) else {
                return;
            };
            if !matches!(state, ChunkState::InFlight(_)) {
                return;
            }
            let error = ChunkLoadError::new(event.failure_phase(), url, id);
            let previous = std::mem::replace(state, ChunkState::Failed(error.clone()));
            let ChunkState::InFlight(waiters) = previous else {
                return;
            };
            (error, waiters)
        };

        warn!(chunk = %id, %url, phase = %error.phase, waiters = waiters.len(), "chunk failed to load");
        for waiter in waiters {
            let _ = waiter.send(Err(error.clone()));
        }
    }

    /// Process one chunk definition. Returns the gated-task scan result.
    pub(crate) fn install(&self, definition: ChunkDefinition) -> Option<Value> {
        let ChunkDefinition {
            chunk_ids,
            modules,
            entry,
        } = definition;

        let fresh = {
            let chunks = self.inner.chunks.lock();
            chunk_ids
                .iter()
                .any(|id| !chunks.get(id).is_some_and(ChunkState::is_ready))
        };

        let mut result = None;
        if fresh {
            for (module_id, factory) in modules {
                self.inner.registry.define(module_id, factory);
            }
            if let Some(entry) = entry {
                result = entry(self);
            }
        }

        let mut released = Vec::new();
        {
            let mut chunks = self.inner.chunks.lock();
            for &id in &chunk_ids {
                match chunks.get(&id) {
                    Some(ChunkState::Failed(_)) => {
                        debug!(chunk = %id, "late definition for a failed chunk");
                        continue;
                    }
                    Some(state) if state.is_ready() => continue,
                    _ => {}
                }
                if let Some(ChunkState::InFlight(waiters)) =
                    chunks.insert(id, ChunkState::resolved_now())
                {
                    released.extend(waiters);
                }
                info!(chunk = %id, "chunk resolved");
            }
        }
        for waiter in released {
            let _ = waiter.send(Ok(()));
        }

        self.inner.processed.fetch_add(1, Ordering::Relaxed);
        self.scan(result)
    }

    // ------------------------------------------------------------------
    // gated tasks
    // ------------------------------------------------------------------

    /// Register `body` to run once every chunk in `ids` is ready. Fires on a
    /// later scan (after a chunk is installed, or on `run_ready`).
    pub fn on_chunks_ready<I, F>(&self, ids: I, priority: u32, body: F)
    where
        I: IntoIterator,
        I::Item: Into<ChunkId>,
        F: FnOnce() -> Option<Value> + Send + 'static,
    {
        let ids: Vec<ChunkId> = ids.into_iter().map(Into::into).collect();
        debug!(chunks = ?ids, priority, "gated task registered");
        let body: GatedBody = Box::new(body);
        self.inner.deferred.lock().push(ids, body, priority);
    }

    /// Run a scan over the gated tasks. Returns the last value a fired body
    /// produced.
    pub fn run_ready(&self) -> Option<Value> {
        self.scan(None)
    }

    fn scan(&self, seed: Option<Value>) -> Option<Value> {
        let fired = {
            let mut deferred = self.inner.deferred.lock();
            let chunks = self.inner.chunks.lock();
            deferred.take_ready(|id| chunks.get(&id).is_some_and(ChunkState::is_ready))
        };
        if !fired.is_empty() {
            debug!(count = fired.len(), "firing gated tasks");
        }

        let mut result = seed;
        for body in fired {
            if let Some(value) = body() {
                result = Some(value);
            }
        }
        result
    }

    // ------------------------------------------------------------------
    // status
    // ------------------------------------------------------------------

    pub fn chunk_status(&self, id: impl Into<ChunkId>) -> Option<ChunkStatus> {
        self.inner
            .chunks
            .lock()
            .get(&id.into())
            .map(ChunkState::status)
    }

    pub fn is_chunk_ready(&self, id: impl Into<ChunkId>) -> bool {
        self.inner
            .chunks
            .lock()
            .get(&id.into())
            .is_some_and(ChunkState::is_ready)
    }

    pub fn status(&self) -> RuntimeStatus {
        let gated_tasks = self.inner.deferred.lock().len();
        let mut chunks = ChunkCounts::default();
        let mut last_resolved_at = None;
        for state in self.inner.chunks.lock().values() {
            match state {
                ChunkState::InFlight(_) => chunks.in_flight += 1,
                ChunkState::Resolved { at } => {
                    chunks.resolved += 1;
                    if last_resolved_at.is_none_or(|last| *at > last) {
                        last_resolved_at = Some(*at);
                    }
                }
                ChunkState::Skipped => chunks.skipped += 1,
                ChunkState::Failed(_) => chunks.failed += 1,
            }
        }

        RuntimeStatus {
            chunks,
            pending_requests: self.inner.loader.pending_len(),
            gated_tasks,
            modules_defined: self.inner.registry.defined_count(),
            modules_loaded: self.inner.registry.loaded_count(),
            definitions_processed: self.inner.processed.load(Ordering::Relaxed),
            draining: self.inner.sink.is_draining(),
            last_resolved_at,
        }
    }
}
