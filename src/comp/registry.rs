//! Registry of component constructors.
//!
//! Components linked into the binary submit themselves to the [`COMPONENTS`]
//! distributed slice through the `#[component("key")]` attribute; native
//! modules register theirs from their entry point when loaded.

use dashmap::DashMap;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, error, warn};

use crate::comp::{Component, Ptr, ReleaseFn};
use crate::core::errors::{LumenError, Result};

/// Constructor of a component instance
pub type CreateFn = fn() -> Box<dyn Component>;

/// Link-time registration record
pub struct ComponentRegistration {
    pub key: &'static str,
    pub create: CreateFn,
}

// Global component registration using linkme
#[linkme::distributed_slice]
pub static COMPONENTS: [ComponentRegistration] = [..];

/// Where a registry entry came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    Static,
    Module(PathBuf),
}

struct RegistryEntry {
    create: CreateFn,
    release: Option<ReleaseFn>,
    origin: Origin,
}

/// Registry for component constructors
pub struct Registry {
    entries: DashMap<String, RegistryEntry>,
    // Origin stamped on entries registered right now
    origin: Mutex<Origin>,
}

impl Registry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            origin: Mutex::new(Origin::Static),
        }
    }

    /// Create a registry holding every component linked into the binary
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register_builtin();
        registry
    }

    /// Register all components from the static slice
    pub fn register_builtin(&self) {
        for entry in COMPONENTS {
            self.register(entry.key, entry.create, None);
        }
        debug!(count = COMPONENTS.len(), "Registered built-in components");
    }

    /// Register a constructor. An existing entry with the same key is replaced.
    pub fn register(&self, key: impl Into<String>, create: CreateFn, release: Option<ReleaseFn>) {
        let key = key.into();
        let origin = self.current_origin();
        let previous = self.entries.insert(
            key.clone(),
            RegistryEntry {
                create,
                release,
                origin,
            },
        );
        if previous.is_some() {
            warn!(key = %key, "Component is already registered, overriding");
        }
    }

    /// Remove a single entry. Returns false if the key was not registered.
    pub fn unregister(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Remove every entry registered by the module at `origin`
    pub fn unregister_origin(&self, origin: &Origin) -> Vec<String> {
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.value().origin == *origin)
            .map(|e| e.key().clone())
            .collect();
        for key in &keys {
            self.entries.remove(key);
        }
        keys
    }

    /// Create a detached instance
    pub fn create(&self, key: &str) -> Result<Ptr> {
        let (create, release) = match self.entries.get(key) {
            Some(entry) => (entry.create, entry.release),
            None => {
                error!(
                    key = %key,
                    "Missing component. Check if the key is wrong, the component is registered, \
                     or the plugin containing the component is loaded"
                );
                return Err(LumenError::not_found("component", key));
            }
        };
        Ok(Ptr::new(key.to_string(), create(), release))
    }

    /// Create an instance placed at `loc` and construct it from `prop`
    pub fn create_with(&self, key: &str, loc: &str, prop: &Value) -> Result<Ptr> {
        let mut ptr = self.create(key)?;
        ptr.set_loc(loc);
        ptr.get_mut().construct(prop)?;
        Ok(ptr)
    }

    /// Check if a key is registered
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Origin of the entry registered under `key`
    pub fn origin(&self, key: &str) -> Option<Origin> {
        self.entries.get(key).map(|e| e.origin.clone())
    }

    /// List all registered keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn for_each_registered(&self, mut f: impl FnMut(&str)) {
        for key in self.keys() {
            f(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run `f` with every registration attributed to `origin`
    pub(crate) fn with_origin<R>(&self, origin: Origin, f: impl FnOnce(&Self) -> R) -> R {
        let previous = std::mem::replace(&mut *self.lock_origin(), origin);
        let result = f(self);
        *self.lock_origin() = previous;
        result
    }

    fn current_origin(&self) -> Origin {
        self.lock_origin().clone()
    }

    fn lock_origin(&self) -> std::sync::MutexGuard<'_, Origin> {
        self.origin.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::ErrorKind;

    #[derive(Default)]
    struct First;
    impl Component for First {}

    #[derive(Default)]
    struct Second;
    impl Component for Second {}

    fn make_first() -> Box<dyn Component> {
        Box::new(First)
    }

    fn make_second() -> Box<dyn Component> {
        Box::new(Second)
    }

    #[test]
    fn test_create_missing_key() {
        let registry = Registry::new();
        let err = registry.create("missing").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_last_registration_wins() {
        let registry = Registry::new();
        registry.register("k", make_first, None);
        registry.register("k", make_second, None);
        assert_eq!(registry.len(), 1);

        let ptr = registry.create("k").unwrap();
        assert_eq!(ptr.key(), "k");
        assert!(ptr.downcast_ref::<Second>().is_some());
        assert!(ptr.downcast_ref::<First>().is_none());
    }

    #[test]
    fn test_unregister() {
        let registry = Registry::new();
        registry.register("k", make_first, None);
        assert!(registry.unregister("k"));
        assert!(!registry.unregister("k"));
        assert!(!registry.contains("k"));
    }

    #[test]
    fn test_builtins_are_registered() {
        let registry = Registry::with_builtins();
        assert!(registry.contains("group"));
        assert!(registry.contains("film::accum"));
        assert_eq!(registry.origin("group"), Some(Origin::Static));
    }

    #[test]
    fn test_origin_tracking() {
        let registry = Registry::new();
        let origin = Origin::Module(PathBuf::from("plugin/accel_embree.so"));
        registry.with_origin(origin.clone(), |r| {
            r.register("accel::embree", make_first, None);
        });
        registry.register("accel::sahbvh", make_second, None);

        assert_eq!(registry.origin("accel::embree"), Some(origin.clone()));
        assert_eq!(registry.unregister_origin(&origin), vec!["accel::embree".to_string()]);
        assert_eq!(registry.keys(), vec!["accel::sahbvh".to_string()]);
    }

    #[test]
    fn test_create_with_properties() {
        let registry = Registry::with_builtins();
        let film = registry
            .create_with("film::accum", "$.film", &serde_json::json!({ "w": 2, "h": 2 }))
            .unwrap();
        assert_eq!(film.loc(), "$.film");
        assert_eq!(film.accumulation().map(|b| b.pixel_count()), Some(4));
    }
}
