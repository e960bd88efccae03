//! ScriptLoader - URL 単位の pending request table
//!
//! Design:
//! - One fetch per URL at a time; later requests for the same URL attach to
//!   the running one.
//! - The fetch runs on its own task. Dropping a caller never cancels it; the
//!   timeout is the only forced end.
//! - On completion the request entry and the script are removed, then every
//!   waiter receives the same event in attachment order.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::queue::ChunkSink;
use crate::ports::{ScriptElement, ScriptEvent, ScriptHost};

type PendingTable = HashMap<String, Vec<oneshot::Sender<ScriptEvent>>>;

#[derive(Clone)]
pub struct ScriptLoader {
    host: Arc<dyn ScriptHost>,
    pending: Arc<Mutex<PendingTable>>,
    timeout: Duration,
}

impl ScriptLoader {
    pub fn new(host: Arc<dyn ScriptHost>, timeout: Duration) -> Self {
        Self {
            host,
            pending: Arc::new(Mutex::new(HashMap::new())),
            timeout,
        }
    }

    /// Request `script` and resolve with its terminal event.
    ///
    /// Must be called within a tokio runtime.
    pub fn load(
        &self,
        script: ScriptElement,
        sink: ChunkSink,
    ) -> impl Future<Output = ScriptEvent> + Send + 'static {
        let (tx, rx) = oneshot::channel();
        let first = {
            let mut pending = self.pending.lock();
            match pending.get_mut(&script.src) {
                Some(waiters) => {
                    waiters.push(tx);
                    false
                }
                None => {
                    pending.insert(script.src.clone(), vec![tx]);
                    true
                }
            }
        };

        if first {
            tokio::spawn(self.clone().fetch(script, sink));
        } else {
            debug!(src = %script.src, "attached to in-flight script request");
        }

        // the fetch task always answers; a dropped sender means it panicked
        async move { rx.await.unwrap_or(ScriptEvent::Error) }
    }

    async fn fetch(self, script: ScriptElement, sink: ChunkSink) {
        let src = script.src.clone();
        let request_id = script.request_id;

        let existing = self.host.find_script(&script.src, &script.marker);
        debug!(%src, %request_id, existing, "fetching script");
        let event = if existing {
            self.host.watch_script(script, sink)
        } else {
            self.host.append_script(script, sink)
        };
        let event = match tokio::time::timeout(self.timeout, event).await {
            Ok(event) => event,
            Err(_) => {
                warn!(%src, %request_id, timeout = ?self.timeout, "script request timed out");
                ScriptEvent::Timeout
            }
        };

        let waiters = self.pending.lock().remove(&src).unwrap_or_default();
        self.host.remove_script(&src);
        debug!(%src, %request_id, ?event, waiters = waiters.len(), "script request finished");
        for waiter in waiters {
            let _ = waiter.send(event);
        }
    }

    /// Number of URLs with a fetch in flight.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_pending(&self, src: &str) -> bool {
        self.pending.lock().contains_key(src)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::queue;
    use crate::domain::{ChunkId, RequestId};
    use crate::impls::{InMemoryScriptHost, ScriptBehavior};

    fn element(src: &str) -> ScriptElement {
        ScriptElement {
            src: src.to_string(),
            charset: "utf-8".to_string(),
            timeout_secs: 120,
            nonce: None,
            marker: "docs:chunk-1".to_string(),
            chunk_id: ChunkId::new(1),
            request_id: RequestId::generate(),
        }
    }

    #[tokio::test]
    async fn same_url_is_fetched_once() {
        let host = Arc::new(InMemoryScriptHost::new());
        host.serve("/a.js", ScriptBehavior::LoadOnly);
        let loader = ScriptLoader::new(host.clone(), Duration::from_secs(120));
        let (sink, _rx) = queue::channel();

        let first = loader.load(element("/a.js"), sink.clone());
        let second = loader.load(element("/a.js"), sink.clone());
        assert!(loader.is_pending("/a.js"));

        let (a, b) = tokio::join!(first, second);
        assert_eq!(a, ScriptEvent::Load);
        assert_eq!(b, ScriptEvent::Load);
        assert_eq!(host.append_count("/a.js"), 1);
        assert_eq!(loader.pending_len(), 0);
        assert_eq!(host.removed(), vec!["/a.js".to_string()]);
    }

    #[tokio::test]
    async fn unknown_url_reports_error() {
        let host = Arc::new(InMemoryScriptHost::new());
        let loader = ScriptLoader::new(host, Duration::from_secs(120));
        let (sink, _rx) = queue::channel();

        assert_eq!(loader.load(element("/404.js"), sink).await, ScriptEvent::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_script_times_out() {
        let host = Arc::new(InMemoryScriptHost::new());
        host.serve("/slow.js", ScriptBehavior::Hang);
        let loader = ScriptLoader::new(host.clone(), Duration::from_secs(120));
        let (sink, _rx) = queue::channel();

        let started = tokio::time::Instant::now();
        let event = loader.load(element("/slow.js"), sink).await;

        assert_eq!(event, ScriptEvent::Timeout);
        assert!(started.elapsed() >= Duration::from_secs(120));
        assert!(host.removed().contains(&"/slow.js".to_string()));
    }

    #[tokio::test]
    async fn existing_script_is_watched_not_appended() {
        let host = Arc::new(InMemoryScriptHost::new());
        host.preload("/ssr.js", "docs:chunk-1", ScriptBehavior::LoadOnly);
        let loader = ScriptLoader::new(host.clone(), Duration::from_secs(120));
        let (sink, _rx) = queue::channel();

        assert_eq!(loader.load(element("/ssr.js"), sink).await, ScriptEvent::Load);
        assert_eq!(host.append_count("/ssr.js"), 0);
    }
}
