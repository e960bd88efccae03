//! LoaderBuilder - manifest・script host・組み込み module を束ねて Runtime を作る
//!
//! - build() の時点で manifest と host の有無、期待 module の登録を検証する
//! - enqueue() した chunk definition は worker 起動時に先に処理される

use std::sync::Arc;

use crate::domain::{ChunkManifest, LoaderError, ModuleId};
use crate::module::{ModuleFactory, ModuleRegistry};
use crate::ports::ScriptHost;

use super::queue::ChunkDefinition;
use super::runtime::Runtime;

/// LoaderBuilder は Runtime を構築
///
/// # 使用例
/// ```ignore
/// let runtime = LoaderBuilder::new(ChunkManifest::docs())
///     .host(Arc::new(InMemoryScriptHost::new()))
///     .register(3905u64, app_factory)?
///     .expect_modules([3905u64])
///     .build()?;
/// let worker = runtime.start()?;
/// ```
///
/// # Fail-fast 設計
/// - expect_modules() で期待される module id を登録
/// - build() 時に「期待集合 ⊆ 登録済み集合」をチェック
/// - manifest も build() 時に検証する
pub struct LoaderBuilder {
    manifest: ChunkManifest,
    host: Option<Arc<dyn ScriptHost>>,
    registry: ModuleRegistry,
    expected_modules: Option<Vec<ModuleId>>,
    backlog: Vec<ChunkDefinition>,
}

/// BuildError は runtime 構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing modules: {0:?}. These modules were expected but not registered.")]
    MissingModules(Vec<ModuleId>),

    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("No script host was configured.")]
    MissingHost,
}

impl LoaderBuilder {
    pub fn new(manifest: ChunkManifest) -> Self {
        Self {
            manifest,
            host: None,
            registry: ModuleRegistry::new(),
            expected_modules: None,
            backlog: Vec::new(),
        }
    }

    /// Script host that delivers chunks.
    pub fn host(mut self, host: Arc<dyn ScriptHost>) -> Self {
        self.host = Some(host);
        self
    }

    /// Register a module that ships with the runtime itself.
    ///
    /// # Example
    /// ```ignore
    /// builder.register(3905u64, factory(|module, _| { ... }))?;
    /// ```
    pub fn register(
        self,
        id: impl Into<ModuleId>,
        factory: ModuleFactory,
    ) -> Result<Self, LoaderError> {
        self.registry.register(id, factory)?;
        Ok(self)
    }

    /// 期待される module id のリストを設定
    pub fn expect_modules<I>(mut self, ids: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<ModuleId>,
    {
        self.expected_modules = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    /// Chunk definition delivered before the runtime starts (inline scripts).
    /// Processed in order when the queue worker starts.
    pub fn enqueue(mut self, definition: ChunkDefinition) -> Self {
        self.backlog.push(definition);
        self
    }

    /// LoaderBuilder を構築して Runtime を生成
    ///
    /// # 検証
    /// - manifest の整合性
    /// - script host が設定されているか
    /// - expect_modules() の module が全て登録されているか
    pub fn build(self) -> Result<Runtime, BuildError> {
        self.manifest
            .validate()
            .map_err(|e| BuildError::InvalidManifest(e.to_string()))?;

        let host = self.host.ok_or(BuildError::MissingHost)?;

        if let Some(expected) = &self.expected_modules {
            let missing: Vec<ModuleId> = expected
                .iter()
                .filter(|id| !self.registry.has_factory(id))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingModules(missing));
            }
        }

        Ok(Runtime::new(self.manifest, self.registry, host, self.backlog))
    }
}
