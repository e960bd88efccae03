//! Ports - 抽象化レイヤー
//!
//! The only external seam is the script host: whatever puts a chunk's
//! script into a document (or reads it from disk) and reports back.

pub mod script_host;

pub use self::script_host::{ScriptElement, ScriptEvent, ScriptHost};
