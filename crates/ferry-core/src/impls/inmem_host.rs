//! InMemoryScriptHost - 開発・テスト用の script host
//!
//! # 学習ポイント
//! - port の最小実装
//! - 事前に決めた挙動（serve / load only / error / hang）で host を再現
//! - lock を await の外に出す

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::app::{ChunkDefinition, ChunkSink};
use crate::ports::{ScriptElement, ScriptEvent, ScriptHost};

/// What happens when a script URL is requested. Each behavior is used once.
pub enum ScriptBehavior {
    /// Deliver the definition to the chunk queue, then fire `load`.
    Serve(ChunkDefinition),
    /// Fire `load` without delivering anything.
    LoadOnly,
    /// Fire `error`.
    Error,
    /// Never fire anything.
    Hang,
}

#[derive(Default)]
struct HostState {
    behaviors: HashMap<String, ScriptBehavior>,
    /// Scripts currently in the document: src and marker.
    document: Vec<(String, String)>,
    appended: Vec<String>,
    removed: Vec<String>,
}

/// InMemoryScriptHost は document を模した host
///
/// # 使用例
/// ```ignore
/// let host = Arc::new(InMemoryScriptHost::new());
/// host.serve(url, ScriptBehavior::Serve(definition));
/// ```
///
/// A URL with no behavior configured fires `error`, like a 404.
#[derive(Default)]
pub struct InMemoryScriptHost {
    state: Mutex<HostState>,
    latency: Duration,
}

impl InMemoryScriptHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every response by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Configure the response for `src`.
    pub fn serve(&self, src: impl Into<String>, behavior: ScriptBehavior) {
        self.state.lock().behaviors.insert(src.into(), behavior);
    }

    /// Put a script in the document before the loader asks for it, as
    /// server-rendered markup would.
    pub fn preload(
        &self,
        src: impl Into<String>,
        marker: impl Into<String>,
        behavior: ScriptBehavior,
    ) {
        let src = src.into();
        let mut state = self.state.lock();
        state.document.push((src.clone(), marker.into()));
        state.behaviors.insert(src, behavior);
    }

    /// How many times a script with `src` was inserted.
    pub fn append_count(&self, src: &str) -> usize {
        self.state
            .lock()
            .appended
            .iter()
            .filter(|s| s.as_str() == src)
            .count()
    }

    pub fn appended(&self) -> Vec<String> {
        self.state.lock().appended.clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.state.lock().removed.clone()
    }

    /// Srcs of the scripts currently in the document.
    pub fn document(&self) -> HashSet<String> {
        self.state
            .lock()
            .document
            .iter()
            .map(|(src, _)| src.clone())
            .collect()
    }

    async fn respond(&self, src: &str, sink: ChunkSink) -> ScriptEvent {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let behavior = self.state.lock().behaviors.remove(src);
        match behavior {
            Some(ScriptBehavior::Serve(definition)) => match sink.push(definition).await {
                Ok(_) => ScriptEvent::Load,
                Err(e) => {
                    debug!(%src, error = %e, "chunk queue rejected definition");
                    ScriptEvent::Error
                }
            },
            Some(ScriptBehavior::LoadOnly) => ScriptEvent::Load,
            Some(ScriptBehavior::Hang) => std::future::pending().await,
            Some(ScriptBehavior::Error) | None => ScriptEvent::Error,
        }
    }
}

#[async_trait]
impl ScriptHost for InMemoryScriptHost {
    fn find_script(&self, src: &str, marker: &str) -> bool {
        self.state
            .lock()
            .document
            .iter()
            .any(|(s, m)| s == src || m == marker)
    }

    async fn append_script(&self, script: ScriptElement, sink: ChunkSink) -> ScriptEvent {
        {
            let mut state = self.state.lock();
            state.appended.push(script.src.clone());
            state.document.push((script.src.clone(), script.marker.clone()));
        }
        self.respond(&script.src, sink).await
    }

    async fn watch_script(&self, script: ScriptElement, sink: ChunkSink) -> ScriptEvent {
        // a script found by marker may carry a different src
        let src = {
            let state = self.state.lock();
            state
                .document
                .iter()
                .find(|(s, m)| *s == script.src || *m == script.marker)
                .map(|(s, _)| s.clone())
                .unwrap_or_else(|| script.src.clone())
        };
        self.respond(&src, sink).await
    }

    fn remove_script(&self, src: &str) {
        let mut state = self.state.lock();
        state.document.retain(|(s, _)| s != src);
        state.removed.push(src.to_string());
    }
}
