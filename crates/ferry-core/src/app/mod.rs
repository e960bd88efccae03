//! App - アプリケーション層
//!
//! このモジュールは、module registry と ports を組み合わせて chunk の
//! 遅延ロードを実装します。
//!
//! # 主要コンポーネント
//! - **LoaderBuilder**: runtime の構築とワイヤリング
//! - **Runtime**: chunk scheduler の表面（ensure_chunk, require, gated tasks）
//! - **ScriptLoader**: URL 単位の request 重複排除と timeout
//! - **ChunkSink / QueueWorker**: chunk definition の受け口と consumer
//! - **DeferredQueue**: chunk 待ちのタスク
//! - **RuntimeStatus**: 状態スナップショット

pub mod builder;
pub mod deferred;
pub mod loader;
pub mod queue;
pub mod runtime;
pub mod status;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, LoaderBuilder};
pub use self::deferred::{DeferredQueue, GatedBody, GatedTask};
pub use self::loader::ScriptLoader;
pub use self::queue::{ChunkDefinition, ChunkSink, EntryFn, QueueWorker};
pub use self::runtime::Runtime;
pub use self::status::{ChunkCounts, RuntimeStatus};
