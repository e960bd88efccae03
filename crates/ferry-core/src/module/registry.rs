//! ModuleRegistry - factory の登録と memoized な実行
//!
//! - `factories`: ModuleId -> factory (replaced when a chunk redefines it)
//! - `cache`: ModuleId -> executed module; an entry exists from the moment the
//!   factory starts running
//! - `waits`: thread -> module it is blocked on, for cycle detection across
//!   threads
//!
//! Locks are never held while a factory runs, so factories may `require`
//! other modules freely. Factories are synchronous: a module still loading
//! on the calling thread means a cycle, one loading on another thread is
//! waited for.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex, RwLock};
use serde_json::Value;
use tracing::debug;

use super::namespace::{Exports, Namespace};
use crate::domain::{LoaderError, ModuleId};

/// Module factory: fills in `module`'s exports, using `registry` to require
/// its dependencies.
pub type ModuleFactory =
    Arc<dyn Fn(&Module, &ModuleRegistry) -> Result<(), LoaderError> + Send + Sync>;

/// Wrap a closure as a `ModuleFactory`.
pub fn factory<F>(f: F) -> ModuleFactory
where
    F: Fn(&Module, &ModuleRegistry) -> Result<(), LoaderError> + Send + Sync + 'static,
{
    Arc::new(f)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadState {
    /// The factory is running on this thread.
    Loading(ThreadId),
    Loaded,
    Failed,
}

/// A module instance, as seen by its own factory.
#[derive(Debug)]
pub struct Module {
    id: ModuleId,
    /// The namespace created for this module (the `exports` argument).
    namespace: Arc<Namespace>,
    /// What `require` returns (`module.exports`).
    exports: Mutex<Exports>,
    state: Mutex<LoadState>,
    settled: Condvar,
}

impl Module {
    fn new(id: ModuleId) -> Self {
        let namespace = Arc::new(Namespace::new());
        Self {
            id,
            exports: Mutex::new(Exports::Namespace(namespace.clone())),
            namespace,
            state: Mutex::new(LoadState::Loading(thread::current().id())),
            settled: Condvar::new(),
        }
    }

    pub fn id(&self) -> &ModuleId {
        &self.id
    }

    /// The namespace this module was created with.
    pub fn namespace(&self) -> &Arc<Namespace> {
        &self.namespace
    }

    /// Shorthand for `namespace().set(..)`.
    pub fn export(&self, key: impl Into<String>, value: Value) {
        self.namespace.set(key, value);
    }

    pub fn exports(&self) -> Exports {
        self.exports.lock().clone()
    }

    /// Replace the module's exports with a plain value.
    pub fn set_exports(&self, value: Value) {
        *self.exports.lock() = Exports::value(value);
    }

    /// Replace the module's exports with another module's exports (re-export).
    pub fn reexport(&self, exports: Exports) {
        *self.exports.lock() = exports;
    }

    pub fn is_loaded(&self) -> bool {
        *self.state.lock() == LoadState::Loaded
    }

    fn loading_thread(&self) -> Option<ThreadId> {
        match *self.state.lock() {
            LoadState::Loading(owner) => Some(owner),
            _ => None,
        }
    }

    fn settle(&self, state: LoadState) {
        *self.state.lock() = state;
        self.settled.notify_all();
    }

    /// Block until the factory finishes. True when it succeeded.
    fn wait_settled(&self) -> bool {
        let mut state = self.state.lock();
        while matches!(*state, LoadState::Loading(_)) {
            self.settled.wait(&mut state);
        }
        *state == LoadState::Loaded
    }
}

/// Registry of module factories and executed modules.
#[derive(Default)]
pub struct ModuleRegistry {
    factories: RwLock<HashMap<ModuleId, ModuleFactory>>,
    cache: Mutex<HashMap<ModuleId, Arc<Module>>>,
    waits: Mutex<HashMap<ThreadId, Arc<Module>>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory. Registering the same id twice is an error.
    pub fn register(
        &self,
        id: impl Into<ModuleId>,
        factory: ModuleFactory,
    ) -> Result<(), LoaderError> {
        let id = id.into();
        let mut factories = self.factories.write();
        if factories.contains_key(&id) {
            return Err(LoaderError::DuplicateModule(id));
        }
        factories.insert(id, factory);
        Ok(())
    }

    /// Install a factory, replacing any previous one. Modules that already
    /// ran keep their exports. Returns whether a factory was replaced.
    pub fn define(&self, id: impl Into<ModuleId>, factory: ModuleFactory) -> bool {
        self.factories.write().insert(id.into(), factory).is_some()
    }

    pub fn has_factory(&self, id: &ModuleId) -> bool {
        self.factories.read().contains_key(id)
    }

    /// Execute (once) and return a module's exports.
    ///
    /// - loaded: the memoized exports, factory not invoked again
    /// - loading on another thread: waits for it to finish
    /// - loading further up this thread's (or a waiting thread's) require
    ///   chain: `CircularRequire`
    /// - no factory: `MissingModule`
    /// - factory error: propagated; the module is forgotten so a later
    ///   `require` runs the factory again
    pub fn require(&self, id: impl Into<ModuleId>) -> Result<Exports, LoaderError> {
        let id = id.into();

        loop {
            let (module, factory) = {
                let mut cache = self.cache.lock();
                if let Some(module) = cache.get(&id).cloned() {
                    drop(cache);
                    if module.is_loaded() {
                        return Ok(module.exports());
                    }
                    if self.wait_for(&id, &module)? {
                        return Ok(module.exports());
                    }
                    // that attempt failed and was forgotten; run it here
                    continue;
                }
                let Some(factory) = self.factories.read().get(&id).cloned() else {
                    return Err(LoaderError::MissingModule(id));
                };
                let module = Arc::new(Module::new(id.clone()));
                cache.insert(id.clone(), module.clone());
                (module, factory)
            };

            debug!(module = %id, "executing module factory");
            if let Err(err) = factory(&module, self) {
                self.cache.lock().remove(&id);
                module.settle(LoadState::Failed);
                return Err(err);
            }
            module.settle(LoadState::Loaded);
            return Ok(module.exports());
        }
    }

    /// Wait for a module another thread is loading. Errors with
    /// `CircularRequire` when waiting would close a cycle.
    fn wait_for(&self, id: &ModuleId, module: &Arc<Module>) -> Result<bool, LoaderError> {
        let me = thread::current().id();
        {
            let mut waits = self.waits.lock();
            let mut next = module.clone();
            // follow owner -> module it waits on; at most one hop per thread
            for _ in 0..=waits.len() {
                let Some(owner) = next.loading_thread() else {
                    break;
                };
                if owner == me {
                    return Err(LoaderError::CircularRequire(id.clone()));
                }
                match waits.get(&owner) {
                    Some(blocked_on) => next = blocked_on.clone(),
                    None => break,
                }
            }
            waits.insert(me, module.clone());
        }

        debug!(module = %id, "waiting for module loading on another thread");
        let loaded = module.wait_settled();
        self.waits.lock().remove(&me);
        Ok(loaded)
    }

    /// The module instance, if it has started executing.
    pub fn cached(&self, id: &ModuleId) -> Option<Arc<Module>> {
        self.cache.lock().get(id).cloned()
    }

    pub fn defined_count(&self) -> usize {
        self.factories.read().len()
    }

    pub fn loaded_count(&self) -> usize {
        self.cache.lock().values().filter(|m| m.is_loaded()).count()
    }

    pub fn module_ids(&self) -> Vec<ModuleId> {
        let mut ids: Vec<ModuleId> = self.factories.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn counting(counter: Arc<AtomicUsize>) -> ModuleFactory {
        factory(move |module, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            module.export("value", json!(1));
            Ok(())
        })
    }

    #[test]
    fn factory_runs_once_and_exports_are_shared() {
        let registry = ModuleRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        registry.register("A", counting(calls.clone())).unwrap();

        let first = registry.require("A").unwrap();
        let second = registry.require("A").unwrap();

        assert!(first.ptr_eq(&second));
        assert_eq!(first.get("value"), Some(json!(1)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(registry.cached(&ModuleId::from("A")).unwrap().is_loaded());
    }

    #[test]
    fn missing_factory_fails() {
        let registry = ModuleRegistry::new();
        let err = registry.require(7294u64).unwrap_err();
        assert!(matches!(err, LoaderError::MissingModule(ModuleId::Numeric(7294))));
        assert_eq!(err.to_string(), "Cannot find module '7294'");
    }

    #[test]
    fn duplicate_registration_fails() {
        let registry = ModuleRegistry::new();
        registry
            .register("A", counting(Arc::new(AtomicUsize::new(0))))
            .unwrap();
        let err = registry
            .register("A", counting(Arc::new(AtomicUsize::new(0))))
            .unwrap_err();
        assert!(matches!(err, LoaderError::DuplicateModule(_)));
    }

    #[test]
    fn define_replaces_factory_but_keeps_executed_exports() {
        let registry = ModuleRegistry::new();
        let first_calls = Arc::new(AtomicUsize::new(0));
        let second_calls = Arc::new(AtomicUsize::new(0));
        assert!(!registry.define(1u64, counting(first_calls.clone())));
        let before = registry.require(1u64).unwrap();

        assert!(registry.define(1u64, counting(second_calls.clone())));
        let after = registry.require(1u64).unwrap();

        assert!(before.ptr_eq(&after));
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn dependencies_are_required_through_the_registry() {
        let registry = ModuleRegistry::new();
        registry
            .register(
                "dep",
                factory(|m, _| {
                    m.export("name", json!("dep"));
                    Ok(())
                }),
            )
            .unwrap();
        registry
            .register(
                "main",
                factory(|m, r| {
                    let dep = r.require("dep")?;
                    m.export("dep_name", dep.get("name").unwrap_or_default());
                    Ok(())
                }),
            )
            .unwrap();

        let main = registry.require("main").unwrap();
        assert_eq!(main.get("dep_name"), Some(json!("dep")));
        assert_eq!(registry.loaded_count(), 2);
    }

    #[test]
    fn circular_require_fails_fast() {
        let registry = ModuleRegistry::new();
        registry
            .register("a", factory(|_, r| r.require("b").map(|_| ())))
            .unwrap();
        registry
            .register("b", factory(|_, r| r.require("a").map(|_| ())))
            .unwrap();

        let err = registry.require("a").unwrap_err();
        assert!(matches!(err, LoaderError::CircularRequire(id) if id == ModuleId::from("a")));
        // neither module is left half-initialized in the cache
        assert!(registry.cached(&ModuleId::from("a")).is_none());
        assert!(registry.cached(&ModuleId::from("b")).is_none());
    }

    #[test]
    fn require_from_another_thread_waits_for_the_loading_one() {
        let registry = Arc::new(ModuleRegistry::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        registry
            .register(
                "slow",
                factory(move |m, _| {
                    seen.fetch_add(1, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(200));
                    m.export("done", json!(true));
                    Ok(())
                }),
            )
            .unwrap();

        let first = {
            let registry = registry.clone();
            std::thread::spawn(move || registry.require("slow"))
        };
        std::thread::sleep(Duration::from_millis(50));
        let second = {
            let registry = registry.clone();
            std::thread::spawn(move || registry.require("slow"))
        };

        let first = first.join().unwrap().unwrap();
        let second = second.join().unwrap().unwrap();
        assert!(first.ptr_eq(&second));
        assert_eq!(second.get("done"), Some(json!(true)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn waiter_retries_after_the_loading_thread_fails() {
        let registry = Arc::new(ModuleRegistry::new());
        let attempts = Arc::new(AtomicUsize::new(0));
        let seen = attempts.clone();
        registry
            .register(
                "flaky",
                factory(move |m, _| {
                    if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                        std::thread::sleep(Duration::from_millis(200));
                        return Err(LoaderError::module_failed(m.id().clone(), "first run"));
                    }
                    m.export("ok", json!(true));
                    Ok(())
                }),
            )
            .unwrap();

        let first = {
            let registry = registry.clone();
            std::thread::spawn(move || registry.require("flaky"))
        };
        std::thread::sleep(Duration::from_millis(50));
        let second = registry.require("flaky").unwrap();

        assert!(matches!(
            first.join().unwrap(),
            Err(LoaderError::ModuleFailed { .. })
        ));
        assert_eq!(second.get("ok"), Some(json!(true)));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn cycle_across_threads_fails_instead_of_deadlocking() {
        let registry = Arc::new(ModuleRegistry::new());
        registry
            .register(
                "a",
                factory(|_, r| {
                    std::thread::sleep(Duration::from_millis(50));
                    r.require("b").map(|_| ())
                }),
            )
            .unwrap();
        registry
            .register(
                "b",
                factory(|_, r| {
                    std::thread::sleep(Duration::from_millis(50));
                    r.require("a").map(|_| ())
                }),
            )
            .unwrap();

        let handles: Vec<_> = ["a", "b"]
            .into_iter()
            .map(|id| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.require(id))
            })
            .collect();

        for handle in handles {
            assert!(matches!(
                handle.join().unwrap(),
                Err(LoaderError::CircularRequire(_))
            ));
        }
        assert_eq!(registry.loaded_count(), 0);
    }

    #[test]
    fn failed_factory_can_be_retried() {
        let registry = ModuleRegistry::new();
        let attempts = Arc::new(AtomicUsize::new(0));
        let seen = attempts.clone();
        registry
            .register(
                "flaky",
                factory(move |m, _| {
                    if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                        return Err(LoaderError::module_failed(m.id().clone(), "first run"));
                    }
                    m.export("ok", json!(true));
                    Ok(())
                }),
            )
            .unwrap();

        assert!(matches!(
            registry.require("flaky"),
            Err(LoaderError::ModuleFailed { .. })
        ));
        let exports = registry.require("flaky").unwrap();
        assert_eq!(exports.get("ok"), Some(json!(true)));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn set_exports_replaces_the_namespace() {
        let registry = ModuleRegistry::new();
        registry
            .register(
                "cjs",
                factory(|m, _| {
                    m.export("ignored", json!(1));
                    m.set_exports(json!("plain"));
                    Ok(())
                }),
            )
            .unwrap();

        let exports = registry.require("cjs").unwrap();
        assert!(exports.as_namespace().is_none());
        assert_eq!(exports.to_value(), json!("plain"));
    }
}
