//! ferry-core
//!
//! Core building blocks of the ferry chunk loader: a memoizing module
//! registry and a scheduler that fetches content-hashed chunks on demand.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, chunk state, manifest, errors）
//! - **module**: module registry と exports / interop
//! - **ports**: 抽象化レイヤー（ScriptHost）
//! - **app**: アプリケーションロジック（builder, runtime, loader, queue, deferred, status）
//! - **impls**: 実装（InMemoryScriptHost, FsScriptHost）

pub mod app;
pub mod domain;
pub mod impls;
pub mod module;
pub mod ports;

pub use app::{BuildError, ChunkDefinition, LoaderBuilder, Runtime, RuntimeStatus};
pub use domain::{ChunkId, ChunkLoadError, ChunkManifest, LoadPhase, LoaderError, ModuleId};
pub use module::{Exports, factory};
