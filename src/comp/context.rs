//! The engine context: registry, loaded modules and the component tree.

use serde_json::Value;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::{debug, info};

use crate::comp::locator::{Locator, WeakRef, ROOT};
use crate::comp::plugin::ModuleLoader;
use crate::comp::{visit_mut, Component, Ptr, Registry};
use crate::core::config::PluginConfig;
use crate::core::errors::{LumenError, Result};
use crate::serial::{self, InputArchive, OutputArchive};

/// Owns everything one engine instance needs.
///
/// On drop the tree is released before any module is unloaded, so no
/// instance outlives the code that created it.
pub struct Context {
    root: Option<Ptr>,
    modules: ModuleLoader,
    registry: Registry,
}

impl Context {
    /// Context with every built-in component registered
    pub fn new() -> Self {
        Self::with_registry(Registry::with_builtins())
    }

    pub fn with_registry(registry: Registry) -> Self {
        Self {
            root: None,
            modules: ModuleLoader::default(),
            registry,
        }
    }

    /// Context with built-ins plus the modules named by `config`
    pub fn from_plugin_config(config: &PluginConfig) -> Result<Self> {
        let mut ctx = Self::new();
        ctx.modules = ModuleLoader::new(config.debug_suffix);
        for dir in &config.directories {
            ctx.load_module_directory(dir)?;
        }
        for module in &config.modules {
            ctx.load_module(module)?;
        }
        Ok(ctx)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Create a detached instance
    pub fn create(&self, key: &str) -> Result<Ptr> {
        self.registry.create(key)
    }

    /// Create an instance at `loc` and construct it from `prop`
    pub fn create_with(&self, key: &str, loc: &str, prop: &Value) -> Result<Ptr> {
        self.registry.create_with(key, loc, prop)
    }

    /// Install `root` as the tree root and return the previous one.
    /// Locators of the whole new tree are refreshed.
    pub fn register_root(&mut self, mut root: Ptr) -> Option<Ptr> {
        assign_locs(&mut root, ROOT);
        debug!(key = %root.key(), "Registered root component");
        self.root.replace(root)
    }

    pub fn root(&self) -> Option<&Ptr> {
        self.root.as_ref()
    }

    pub fn root_mut(&mut self) -> Option<&mut Ptr> {
        self.root.as_mut()
    }

    pub fn take_root(&mut self) -> Option<Ptr> {
        self.root.take()
    }

    /// Find the component at `loc`
    pub fn resolve(&self, loc: &str) -> Result<&Ptr> {
        let locator = Locator::parse(loc)?;
        let root = self
            .root
            .as_ref()
            .ok_or_else(|| LumenError::not_found("root component", loc))?;
        locator.walk(root)
    }

    pub fn resolve_mut(&mut self, loc: &str) -> Result<&mut Ptr> {
        let locator = Locator::parse(loc)?;
        let root = self
            .root
            .as_mut()
            .ok_or_else(|| LumenError::not_found("root component", loc))?;
        locator.walk_mut(root)
    }

    /// Find the component at `loc` and downcast it to `T`
    pub fn resolve_as<T: Component>(&self, loc: &str) -> Result<&T> {
        self.resolve(loc)?
            .downcast_ref::<T>()
            .ok_or_else(|| LumenError::not_found(std::any::type_name::<T>(), loc))
    }

    pub fn resolve_as_mut<T: Component>(&mut self, loc: &str) -> Result<&mut T> {
        self.resolve_mut(loc)?
            .downcast_mut::<T>()
            .ok_or_else(|| LumenError::not_found(std::any::type_name::<T>(), loc))
    }

    /// Follow a back-reference
    pub fn resolve_weak(&self, weak: &WeakRef) -> Result<&Ptr> {
        self.resolve(weak.loc())
    }

    /// Load a native module (path without platform suffix)
    pub fn load_module(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.modules.load_module(path, &self.registry)
    }

    /// Load every native module found in `dir`
    pub fn load_module_directory(&mut self, dir: impl AsRef<Path>) -> Result<usize> {
        self.modules.load_module_directory(dir, &self.registry)
    }

    /// Unload every native module. The tree is dropped first.
    pub fn unload_modules(&mut self) {
        if !self.modules.loaded().is_empty() {
            self.root = None;
        }
        self.modules.unload_all(&self.registry);
    }

    pub fn modules(&self) -> &ModuleLoader {
        &self.modules
    }

    /// Zero every accumulation buffer in the tree
    pub fn clear_accumulation(&mut self) {
        if let Some(root) = self.root.as_mut() {
            visit_mut(root, &mut |ptr| {
                if let Some(buf) = ptr.get_mut().accumulation_mut() {
                    buf.clear();
                }
            });
        }
    }

    /// Write the stream header followed by the root slot
    pub fn serialize<W: Write>(&self, writer: &mut W) -> Result<()> {
        let bytes = self.serialize_to_vec()?;
        writer
            .write_all(&bytes)
            .map_err(|e| LumenError::io("write component stream", e))
    }

    pub fn serialize_to_vec(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        serial::write_header(&mut out)?;
        let mut ar = OutputArchive::new();
        ar.save_ptr(self.root.as_ref())?;
        out.extend_from_slice(ar.as_bytes());
        Ok(out)
    }

    /// Replace the tree with the one read from `reader`
    pub fn deserialize<R: Read>(&mut self, reader: &mut R) -> Result<()> {
        let mut bytes = Vec::new();
        reader
            .read_to_end(&mut bytes)
            .map_err(|e| LumenError::io("read component stream", e))?;
        self.deserialize_from_slice(&bytes)
    }

    pub fn deserialize_from_slice(&mut self, bytes: &[u8]) -> Result<()> {
        let mut cursor = bytes;
        serial::read_header(&mut cursor)?;
        let mut ar = InputArchive::new(cursor, &self.registry);
        let root = ar.load_ptr_at(ROOT)?;
        self.root = root;
        Ok(())
    }

    pub fn save_checkpoint(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path)
            .map_err(|e| LumenError::io(format!("create checkpoint {}", path.display()), e))?;
        let mut writer = BufWriter::new(file);
        self.serialize(&mut writer)?;
        writer
            .flush()
            .map_err(|e| LumenError::io(format!("flush checkpoint {}", path.display()), e))?;
        info!(path = %path.display(), "Saved checkpoint");
        Ok(())
    }

    pub fn load_checkpoint(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| LumenError::io(format!("open checkpoint {}", path.display()), e))?;
        self.deserialize(&mut BufReader::new(file))?;
        info!(path = %path.display(), "Loaded checkpoint");
        Ok(())
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.root = None;
        self.modules.unload_all(&self.registry);
    }
}

fn assign_locs(ptr: &mut Ptr, loc: &str) {
    ptr.set_loc(loc);
    let base = loc.to_string();
    ptr.get_mut().for_each_underlying_mut(&mut |name, child| {
        assign_locs(child, &format!("{}.{}", base, name));
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comp::{AccumFilm, Group};
    use crate::core::errors::ErrorKind;
    use pretty_assertions::assert_eq;

    fn scene(ctx: &Context) -> Ptr {
        let mut group = Group::new();
        group.insert("film", ctx.create_with("film::accum", "", &serde_json::json!({ "w": 2, "h": 1 })).unwrap());
        Ptr::from_box("group", Box::new(group))
    }

    #[test]
    fn test_resolve() {
        let mut ctx = Context::new();
        assert_eq!(ctx.resolve("$").unwrap_err().kind(), ErrorKind::NotFound);

        let root = scene(&ctx);
        assert!(ctx.register_root(root).is_none());
        assert_eq!(ctx.resolve("$").unwrap().key(), "group");
        assert_eq!(ctx.resolve("$.film").unwrap().loc(), "$.film");
        assert!(ctx.resolve_as::<AccumFilm>("$.film").is_ok());
        assert_eq!(ctx.resolve_as::<Group>("$.film").unwrap_err().kind(), ErrorKind::NotFound);

        for bad in ["", "film", "$.missing", "$.film.deeper"] {
            assert_eq!(ctx.resolve(bad).unwrap_err().kind(), ErrorKind::NotFound, "loc: {:?}", bad);
        }
    }

    #[test]
    fn test_clear_accumulation() {
        let mut ctx = Context::new();
        let root = scene(&ctx);
        ctx.register_root(root);
        ctx.resolve_as_mut::<AccumFilm>("$.film").unwrap().buffer_mut().splat(0, [1.0, 1.0, 1.0]);
        ctx.clear_accumulation();
        assert_eq!(ctx.resolve_as::<AccumFilm>("$.film").unwrap().buffer().pixel(0), Some([0.0; 3]));
    }

    #[test]
    fn test_serialize_empty_tree() {
        let ctx = Context::new();
        let bytes = ctx.serialize_to_vec().unwrap();
        let mut other = Context::new();
        other.deserialize_from_slice(&bytes).unwrap();
        assert!(other.root().is_none());
    }
}
