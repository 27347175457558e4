use std::ops::{Deref, DerefMut};
use std::path::Path;

use crate::comp::Context;
use crate::core::errors::Result;

/// Loads a set of modules into a context and unloads them when dropped.
///
/// The context's tree is dropped together with the modules.
pub struct ScopedModules<'a> {
    ctx: &'a mut Context,
}

impl<'a> ScopedModules<'a> {
    pub fn load<P: AsRef<Path>>(ctx: &'a mut Context, modules: &[P]) -> Result<Self> {
        let mut scoped = Self { ctx };
        for module in modules {
            // Already loaded modules are released by our drop on failure
            scoped.ctx.load_module(module)?;
        }
        Ok(scoped)
    }

    /// Load every module of `dir` for the lifetime of the guard
    pub fn load_directory(ctx: &'a mut Context, dir: impl AsRef<Path>) -> Result<Self> {
        let mut scoped = Self { ctx };
        scoped.ctx.load_module_directory(dir)?;
        Ok(scoped)
    }
}

impl Deref for ScopedModules<'_> {
    type Target = Context;

    fn deref(&self) -> &Context {
        self.ctx
    }
}

impl DerefMut for ScopedModules<'_> {
    fn deref_mut(&mut self) -> &mut Context {
        self.ctx
    }
}

impl Drop for ScopedModules<'_> {
    fn drop(&mut self) {
        self.ctx.unload_modules();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::ErrorKind;

    #[test]
    fn test_failed_load_leaves_context_usable() {
        let mut ctx = Context::new();
        let err = ScopedModules::load(&mut ctx, &["/nonexistent/lumen_missing"]).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::LoadError);
        assert!(ctx.modules().loaded().is_empty());
        assert!(ctx.registry().contains("group"));
    }

    #[test]
    fn test_missing_directory_guard() {
        let mut ctx = Context::new();
        {
            let scoped = ScopedModules::load_directory(&mut ctx, "/nonexistent/plugins").unwrap();
            assert!(scoped.registry().contains("film::accum"));
        }
        assert!(ctx.registry().contains("film::accum"));
    }
}
