//! Impls - ScriptHost の実装
//!
//! # 含まれる実装
//! - **InMemoryScriptHost**: テスト・開発用。URL ごとの挙動を事前に設定する
//! - **FsScriptHost**: asset directory の JSON chunk document を配信する

pub mod fs_host;
pub mod inmem_host;

// 主要な型を再エクスポート
pub use self::fs_host::{ChunkDocument, FsScriptHost, ModuleDocument};
pub use self::inmem_host::{InMemoryScriptHost, ScriptBehavior};
