//! Module - memoized module execution
//!
//! - **registry**: factory の登録、`require`、循環検出
//! - **namespace**: exports の入れ物（Namespace / Exports / Binding）
//! - **interop**: default export と namespace 形式の相互変換

pub mod interop;
pub mod namespace;
pub mod registry;

pub use self::interop::{
    NamespaceMode, compat_default, define_exports, fake_namespace, mark_es_module,
    require_namespace,
};
pub use self::namespace::{Binding, Exports, Namespace};
pub use self::registry::{Module, ModuleFactory, ModuleRegistry, factory};
