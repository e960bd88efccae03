//! ChunkQueue - chunk definition の受け口と consumer task
//!
//! Delivered scripts hand their chunk definitions to a `ChunkSink`. A single
//! consumer task drains the channel in order:
//! 1. backlog (definitions enqueued before the worker started)
//! 2. `draining` を立てる
//! 3. new definitions as they arrive
//!
//! Processing itself lives in `Runtime::install`.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use super::runtime::Runtime;
use crate::domain::{ChunkId, LoaderError, ModuleId};
use crate::module::ModuleFactory;

/// Entry function of a chunk; runs once when the chunk's modules are
/// installed. Its result seeds the gated-task scan that follows.
pub type EntryFn = Box<dyn FnOnce(&Runtime) -> Option<Value> + Send>;

/// One `[idsInThisChunk, moduleMap, runtimeEntryFn]` message.
pub struct ChunkDefinition {
    pub chunk_ids: Vec<ChunkId>,
    pub modules: Vec<(ModuleId, ModuleFactory)>,
    pub entry: Option<EntryFn>,
}

impl ChunkDefinition {
    pub fn new<I>(chunk_ids: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<ChunkId>,
    {
        Self {
            chunk_ids: chunk_ids.into_iter().map(Into::into).collect(),
            modules: Vec::new(),
            entry: None,
        }
    }

    pub fn module(mut self, id: impl Into<ModuleId>, factory: ModuleFactory) -> Self {
        self.modules.push((id.into(), factory));
        self
    }

    pub fn entry<F>(mut self, entry: F) -> Self
    where
        F: FnOnce(&Runtime) -> Option<Value> + Send + 'static,
    {
        self.entry = Some(Box::new(entry));
        self
    }
}

impl fmt::Debug for ChunkDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkDefinition")
            .field("chunk_ids", &self.chunk_ids)
            .field(
                "modules",
                &self.modules.iter().map(|(id, _)| id).collect::<Vec<_>>(),
            )
            .field("entry", &self.entry.is_some())
            .finish()
    }
}

pub(crate) struct QueuedChunk {
    definition: ChunkDefinition,
    ack: Option<oneshot::Sender<Option<Value>>>,
}

/// Sending half of the chunk channel. Cheap to clone.
#[derive(Clone)]
pub struct ChunkSink {
    tx: mpsc::UnboundedSender<QueuedChunk>,
    draining: Arc<AtomicBool>,
}

impl ChunkSink {
    /// Queue a definition without waiting for it to be processed.
    pub fn enqueue(&self, definition: ChunkDefinition) -> Result<(), LoaderError> {
        self.tx
            .send(QueuedChunk {
                definition,
                ack: None,
            })
            .map_err(|_| LoaderError::Shutdown)
    }

    /// Queue a definition and wait until it has been processed. Returns the
    /// result of the gated-task scan that followed.
    ///
    /// Waits indefinitely if the queue worker has not been started.
    pub async fn push(&self, definition: ChunkDefinition) -> Result<Option<Value>, LoaderError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(QueuedChunk {
                definition,
                ack: Some(ack_tx),
            })
            .map_err(|_| LoaderError::Shutdown)?;
        ack_rx.await.map_err(|_| LoaderError::Shutdown)
    }

    /// Has the worker drained its backlog and started processing live?
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }
}

pub(crate) fn channel() -> (ChunkSink, mpsc::UnboundedReceiver<QueuedChunk>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sink = ChunkSink {
        tx,
        draining: Arc::new(AtomicBool::new(false)),
    };
    (sink, rx)
}

/// Handle of the consumer task.
/// - `request_shutdown` で consumer が止まる（drop しても止まる）
/// - `shutdown_and_join()` で終了を待てる
pub struct QueueWorker {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl QueueWorker {
    pub(crate) fn spawn(runtime: Runtime, rx: mpsc::UnboundedReceiver<QueuedChunk>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(drain_loop(runtime, rx, shutdown_rx));
        Self { shutdown_tx, join }
    }

    pub fn request_shutdown(&self) {
        // receiver may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        let _ = self.join.await;
    }
}

async fn drain_loop(
    runtime: Runtime,
    mut rx: mpsc::UnboundedReceiver<QueuedChunk>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut backlog = 0usize;
    while let Ok(queued) = rx.try_recv() {
        process(&runtime, queued);
        backlog += 1;
    }
    runtime.sink().draining.store(true, Ordering::Release);
    debug!(backlog, "chunk queue drained backlog");

    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        let queued = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            queued = rx.recv() => queued,
        };
        let Some(queued) = queued else {
            break;
        };
        process(&runtime, queued);
    }
    debug!("chunk queue worker stopped");
}

fn process(runtime: &Runtime, queued: QueuedChunk) {
    let QueuedChunk { definition, ack } = queued;
    let result = runtime.install(definition);
    if let Some(ack) = ack {
        // the pusher may have given up waiting
        let _ = ack.send(result);
    }
}
