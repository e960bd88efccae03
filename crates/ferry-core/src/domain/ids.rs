//! Domain identifiers (strongly-typed IDs).
//!
//! - `ChunkId`: build-time numeric id of a chunk
//! - `ModuleId`: opaque key of a module (数値 id と名前付き id の両方を扱う)
//! - `RequestId`: ULID per script request, for log correlation

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Identifier of a chunk (unit of separately fetched code).
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(u32);

impl ChunkId {
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl From<u32> for ChunkId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl FromStr for ChunkId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u32>().map(Self)
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a module, unique within a registry.
///
/// Bundled modules usually carry numeric ids (`3905`); entry modules and
/// hand-registered ones are often named. Both forms compare by value, and a
/// numeric-looking string parses to `Numeric` so `"3905"` and `3905` agree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged, from = "RawModuleId")]
pub enum ModuleId {
    Numeric(u64),
    Named(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawModuleId {
    Numeric(u64),
    Named(String),
}

impl From<RawModuleId> for ModuleId {
    fn from(raw: RawModuleId) -> Self {
        match raw {
            RawModuleId::Numeric(n) => Self::Numeric(n),
            RawModuleId::Named(name) => Self::from(name),
        }
    }
}

impl ModuleId {
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }
}

impl From<u64> for ModuleId {
    fn from(value: u64) -> Self {
        Self::Numeric(value)
    }
}

impl From<&str> for ModuleId {
    fn from(value: &str) -> Self {
        match value.parse::<u64>() {
            Ok(n) => Self::Numeric(n),
            Err(_) => Self::Named(value.to_string()),
        }
    }
}

impl From<String> for ModuleId {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(n) => write!(f, "{n}"),
            Self::Named(name) => f.write_str(name),
        }
    }
}

/// Identifier of one script request (one fetch of one URL).
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(Ulid);

impl RequestId {
    pub fn generate() -> Self {
        Self(Ulid::new())
    }

    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_strings_parse_to_numeric_module_ids() {
        assert_eq!(ModuleId::from("3905"), ModuleId::Numeric(3905));
        assert_eq!(ModuleId::from("3905"), ModuleId::from(3905u64));
        assert_eq!(ModuleId::from("A"), ModuleId::named("A"));
    }

    #[test]
    fn module_ids_deserialize_from_numbers_and_strings() {
        let ids: Vec<ModuleId> = serde_json::from_str(r#"[7294, "main", "3905"]"#).unwrap();
        assert_eq!(
            ids,
            vec![ModuleId::Numeric(7294), ModuleId::named("main"), ModuleId::Numeric(3905)]
        );
    }

    #[test]
    fn chunk_id_display_and_parse() {
        let id: ChunkId = "93".parse().unwrap();
        assert_eq!(id, ChunkId::new(93));
        assert_eq!(id.to_string(), "93");
        assert!("chunk".parse::<ChunkId>().is_err());
    }

    #[test]
    fn request_ids_have_prefix() {
        let id = RequestId::generate();
        assert!(id.to_string().starts_with("req-"));
        assert_ne!(id, RequestId::generate());
    }
}
