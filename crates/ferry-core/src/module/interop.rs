//! Interop helpers for mixed export conventions.
//!
//! Producers may export a namespace with a `default` binding (module-shaped)
//! or a bare value. Consumers use these helpers instead of agreeing on one
//! convention.

use std::sync::Arc;

use serde_json::Value;

use super::namespace::{Binding, Exports, Namespace};
use super::registry::ModuleRegistry;
use crate::domain::{LoaderError, ModuleId};

/// How `fake_namespace` treats its input (bit flags of the bundler runtime).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NamespaceMode {
    /// bit 1: the input is a module id to require first
    pub require: bool,
    /// bit 2: copy the input's properties as live bindings
    pub merge: bool,
    /// bit 4: return module-shaped inputs unchanged
    pub pass_es_module: bool,
    /// bit 8: return the input unchanged
    pub raw: bool,
}

impl NamespaceMode {
    pub fn from_bits(bits: u8) -> Self {
        Self {
            require: bits & 1 != 0,
            merge: bits & 2 != 0,
            pass_es_module: bits & 4 != 0,
            raw: bits & 8 != 0,
        }
    }

    pub fn bits(self) -> u8 {
        u8::from(self.require)
            | u8::from(self.merge) << 1
            | u8::from(self.pass_es_module) << 2
            | u8::from(self.raw) << 3
    }
}

/// Flag a namespace as module-shaped.
pub fn mark_es_module(namespace: &Namespace) {
    namespace.mark_es_module();
}

/// Define every binding the namespace does not have yet.
pub fn define_exports<I, K>(namespace: &Namespace, bindings: I)
where
    I: IntoIterator<Item = (K, Binding)>,
    K: Into<String>,
{
    for (key, binding) in bindings {
        namespace.define(key, binding);
    }
}

/// Default export: the `default` binding of a module-shaped namespace, the
/// whole value otherwise.
pub fn compat_default(exports: &Exports) -> Value {
    if exports.is_es_module() {
        exports.get("default").unwrap_or(Value::Null)
    } else {
        exports.to_value()
    }
}

/// Wrap `value` in a module-shaped namespace whose `default` is the value.
///
/// `value` is already resolved, so the `require` bit has no effect here;
/// `require_namespace` applies it.
pub fn fake_namespace(value: Exports, mode: NamespaceMode) -> Exports {
    if mode.raw {
        return value;
    }
    if mode.pass_es_module && value.is_es_module() {
        return value;
    }

    let namespace = Namespace::new();
    namespace.mark_es_module();
    if mode.merge {
        for key in value.keys() {
            namespace.insert(
                key.clone(),
                Binding::Live {
                    source: value.clone(),
                    key: Some(key),
                },
            );
        }
    }
    namespace.insert(
        "default",
        Binding::Live {
            source: value,
            key: None,
        },
    );
    Exports::Namespace(Arc::new(namespace))
}

/// `fake_namespace` over a module id, as the bundler's namespace helper does.
///
/// With the `require` bit the module is required and its exports wrapped;
/// without it the id itself is the value being wrapped.
pub fn require_namespace(
    registry: &ModuleRegistry,
    id: impl Into<ModuleId>,
    mode: NamespaceMode,
) -> Result<Exports, LoaderError> {
    let id = id.into();
    let value = if mode.require {
        registry.require(id)?
    } else {
        Exports::value(match id {
            ModuleId::Numeric(n) => Value::from(n),
            ModuleId::Named(name) => Value::from(name),
        })
    };
    Ok(fake_namespace(value, mode))
}
