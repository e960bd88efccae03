//! Exports containers.
//!
//! A module starts with an empty `Namespace`. Its factory either fills that
//! namespace in or replaces the module's exports with a plain value
//! (CommonJS の `module.exports = value` に相当).

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use serde_json::{Map, Value};

/// One export slot of a namespace.
#[derive(Debug, Clone)]
pub enum Binding {
    /// A value stored in the namespace.
    Value(Value),
    /// Reads through to another module's exports on every access.
    /// `key: None` reads the whole exports value.
    Live { source: Exports, key: Option<String> },
}

impl Binding {
    fn resolve(&self) -> Option<Value> {
        match self {
            Self::Value(v) => Some(v.clone()),
            Self::Live { source, key: None } => Some(source.to_value()),
            Self::Live {
                source,
                key: Some(key),
            } => source.get(key),
        }
    }
}

/// Named export bindings plus the "module-shaped" flag.
#[derive(Debug, Default)]
pub struct Namespace {
    es_module: AtomicBool,
    bindings: RwLock<BTreeMap<String, Binding>>,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a namespace from the fields of a JSON object.
    pub fn from_object(object: Map<String, Value>) -> Self {
        let ns = Self::new();
        {
            let mut bindings = ns.bindings.write();
            for (key, value) in object {
                bindings.insert(key, Binding::Value(value));
            }
        }
        ns
    }

    pub fn mark_es_module(&self) {
        self.es_module.store(true, Ordering::Release);
    }

    pub fn is_es_module(&self) -> bool {
        self.es_module.load(Ordering::Acquire)
    }

    /// Plain assignment: overwrites any existing binding.
    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.bindings.write().insert(key.into(), Binding::Value(value));
    }

    /// Define a binding unless one with that name already exists.
    /// Returns whether the binding was added.
    pub fn define(&self, key: impl Into<String>, binding: Binding) -> bool {
        let mut bindings = self.bindings.write();
        let key = key.into();
        if bindings.contains_key(&key) {
            return false;
        }
        bindings.insert(key, binding);
        true
    }

    pub(crate) fn insert(&self, key: impl Into<String>, binding: Binding) {
        self.bindings.write().insert(key.into(), binding);
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let binding = self.bindings.read().get(key).cloned()?;
        binding.resolve()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.bindings.read().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.bindings.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.bindings.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.read().is_empty()
    }

    /// Snapshot of every binding as a JSON object.
    pub fn to_value(&self) -> Value {
        let bindings: Vec<(String, Binding)> = self
            .bindings
            .read()
            .iter()
            .map(|(k, b)| (k.clone(), b.clone()))
            .collect();
        let mut object = Map::new();
        for (key, binding) in bindings {
            object.insert(key, binding.resolve().unwrap_or(Value::Null));
        }
        Value::Object(object)
    }
}

/// What `require` hands out: a shared namespace, or a plain value when the
/// factory replaced its exports.
#[derive(Debug, Clone)]
pub enum Exports {
    Namespace(Arc<Namespace>),
    Value(Arc<Value>),
}

impl Exports {
    pub fn empty() -> Self {
        Self::Namespace(Arc::new(Namespace::new()))
    }

    pub fn value(value: Value) -> Self {
        Self::Value(Arc::new(value))
    }

    /// Same underlying object (reference identity, not structural equality).
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Namespace(a), Self::Namespace(b)) => Arc::ptr_eq(a, b),
            (Self::Value(a), Self::Value(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn is_es_module(&self) -> bool {
        match self {
            Self::Namespace(ns) => ns.is_es_module(),
            Self::Value(_) => false,
        }
    }

    pub fn as_namespace(&self) -> Option<&Arc<Namespace>> {
        match self {
            Self::Namespace(ns) => Some(ns),
            Self::Value(_) => None,
        }
    }

    /// Property lookup; plain values only expose object fields.
    pub fn get(&self, key: &str) -> Option<Value> {
        match self {
            Self::Namespace(ns) => ns.get(key),
            Self::Value(v) => v.get(key).cloned(),
        }
    }

    /// Property names, in the order `get` would find them.
    pub fn keys(&self) -> Vec<String> {
        match self {
            Self::Namespace(ns) => ns.keys(),
            Self::Value(v) => v
                .as_object()
                .map(|o| o.keys().cloned().collect())
                .unwrap_or_default(),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Namespace(ns) => ns.to_value(),
            Self::Value(v) => v.as_ref().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn define_does_not_overwrite() {
        let ns = Namespace::new();
        assert!(ns.define("a", Binding::Value(json!(1))));
        assert!(!ns.define("a", Binding::Value(json!(2))));
        assert_eq!(ns.get("a"), Some(json!(1)));

        ns.set("a", json!(3));
        assert_eq!(ns.get("a"), Some(json!(3)));
    }

    #[test]
    fn live_bindings_follow_the_source() {
        let source = Arc::new(Namespace::new());
        source.set("count", json!(1));

        let view = Namespace::new();
        view.define(
            "count",
            Binding::Live {
                source: Exports::Namespace(source.clone()),
                key: Some("count".into()),
            },
        );
        assert_eq!(view.get("count"), Some(json!(1)));

        source.set("count", json!(2));
        assert_eq!(view.get("count"), Some(json!(2)));
    }

    #[test]
    fn to_value_snapshots_bindings() {
        let ns = Namespace::from_object(json!({ "a": 1, "b": "two" }).as_object().cloned().unwrap());
        assert_eq!(ns.to_value(), json!({ "a": 1, "b": "two" }));
        assert_eq!(ns.keys(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn ptr_eq_is_identity() {
        let a = Exports::empty();
        let b = a.clone();
        let c = Exports::empty();
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&c));
        assert!(!Exports::value(json!(1)).ptr_eq(&Exports::value(json!(1))));
    }

    #[test]
    fn plain_values_expose_object_fields() {
        let exports = Exports::value(json!({ "x": 1 }));
        assert_eq!(exports.get("x"), Some(json!(1)));
        assert_eq!(exports.keys(), vec!["x".to_string()]);
        assert!(!exports.is_es_module());
        assert_eq!(Exports::value(json!(5)).get("x"), None);
    }
}
