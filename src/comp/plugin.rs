//! Native module loading.
//!
//! This is the only place that touches `libloading`. A module is a dynamic
//! library exporting [`MODULE_ENTRY_SYMBOL`] (see [`crate::export_module!`]);
//! the entry point registers the module's components into the registry it is
//! handed. Modules must be built with the same compiler as the host since the
//! entry point uses the Rust ABI.

use libloading::Library;
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::comp::registry::{Origin, Registry};
use crate::core::errors::{LumenError, Result};

/// Name of the symbol every module exports
pub const MODULE_ENTRY_SYMBOL: &str = "lumen_module_register";

/// Signature of the module entry point
pub type ModuleEntry = fn(&Registry);

/// File suffix of dynamic libraries on this platform
pub fn platform_suffix() -> &'static str {
    if cfg!(target_os = "windows") {
        "dll"
    } else if cfg!(target_os = "macos") {
        "dylib"
    } else {
        "so"
    }
}

struct LoadedModule {
    path: PathBuf,
    keys: Vec<String>,
    // Dropped last: closes the library. `None` for entry points linked into
    // the host.
    _lib: Option<Library>,
}

/// Loads and unloads native modules
pub struct ModuleLoader {
    modules: Vec<LoadedModule>,
    debug_suffix: bool,
    pattern: Regex,
}

impl ModuleLoader {
    pub fn new(debug_suffix: bool) -> Self {
        let pattern = Regex::new(&format!(r"^[0-9a-z_]+\.{}$", platform_suffix()))
            .unwrap_or_else(|_| unreachable!("module pattern is a valid regex"));
        Self {
            modules: Vec::new(),
            debug_suffix,
            pattern,
        }
    }

    /// Load the module at `path`, given without platform suffix
    /// (e.g. `plugin/accel_embree`).
    pub fn load_module(&mut self, path: impl AsRef<Path>, registry: &Registry) -> Result<()> {
        let path = self.library_path(path.as_ref())?;
        self.load_file(path, registry)
    }

    /// Load every module found in `dir`. Files are matched by their release
    /// name, so with the debug suffix enabled `foo.so` loads `foo-debug.so`.
    /// Missing directories and modules that fail to load are logged and
    /// skipped. Returns the number loaded.
    pub fn load_module_directory(&mut self, dir: impl AsRef<Path>, registry: &Registry) -> Result<usize> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            warn!(directory = %dir.display(), "Missing plugin directory. Skipping.");
            return Ok(0);
        }

        let mut loaded = 0;
        for path in self.candidates(dir)? {
            match self.load_file(path.clone(), registry) {
                Ok(()) => loaded += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping plugin"),
            }
        }
        Ok(loaded)
    }

    /// Library paths a scan of `dir` would load, sorted
    fn candidates(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let entries = std::fs::read_dir(dir)
            .map_err(|e| LumenError::io(format!("scan plugin directory {}", dir.display()), e))?;
        let mut stems: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter(|entry| self.pattern.is_match(&entry.file_name().to_string_lossy()))
            .map(|entry| entry.path().with_extension(""))
            .collect();
        stems.sort();
        stems.iter().map(|stem| self.library_path(stem)).collect()
    }

    /// Unload every module and unregister the keys they provided.
    ///
    /// Instances created from a module must be dropped before this is called;
    /// using them afterwards is undefined behavior.
    pub fn unload_all(&mut self, registry: &Registry) {
        for module in self.modules.drain(..).rev() {
            registry.unregister_origin(&Origin::Module(module.path.clone()));
            info!(path = %module.path.display(), keys = module.keys.len(), "Unloaded plugin");
        }
    }

    /// Paths of the currently loaded modules
    pub fn loaded(&self) -> Vec<&Path> {
        self.modules.iter().map(|m| m.path.as_path()).collect()
    }

    /// Keys provided by the module loaded from `path`
    pub fn keys_of(&self, path: &Path) -> Option<&[String]> {
        self.modules
            .iter()
            .find(|m| m.path == path)
            .map(|m| m.keys.as_slice())
    }

    fn library_path(&self, path: &Path) -> Result<PathBuf> {
        let stem = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| LumenError::load_error(path.display().to_string(), "path has no file name"))?;
        let name = if self.debug_suffix {
            format!("{}-debug.{}", stem, platform_suffix())
        } else {
            format!("{}.{}", stem, platform_suffix())
        };
        Ok(path.with_file_name(name))
    }

    fn load_file(&mut self, path: PathBuf, registry: &Registry) -> Result<()> {
        let shown = path.display().to_string();
        info!(path = %shown, "Loading plugin");

        // SAFETY: loading a library runs its initializers; modules are trusted code.
        let lib = unsafe { Library::new(&path) }
            .map_err(|e| LumenError::load_error(shown.clone(), e.to_string()))?;

        // SAFETY: the entry symbol is declared with `ModuleEntry` by `export_module!`.
        let entry: ModuleEntry = unsafe {
            let symbol = lib
                .get::<ModuleEntry>(MODULE_ENTRY_SYMBOL.as_bytes())
                .map_err(|e| LumenError::load_error(shown.clone(), e.to_string()))?;
            *symbol
        };

        self.install(path, entry, Some(lib), registry);
        Ok(())
    }

    /// Run `entry` with registrations stamped as coming from `path`, and
    /// remember the keys it added
    fn install(&mut self, path: PathBuf, entry: ModuleEntry, lib: Option<Library>, registry: &Registry) {
        let origin = Origin::Module(path.clone());
        registry.with_origin(origin.clone(), |r| entry(r));
        let keys: Vec<String> = registry
            .keys()
            .into_iter()
            .filter(|k| registry.origin(k).as_ref() == Some(&origin))
            .collect();

        info!(path = %path.display(), keys = ?keys, "Successfully loaded");
        self.modules.push(LoadedModule {
            path,
            keys,
            _lib: lib,
        });
    }
}

impl Default for ModuleLoader {
    fn default() -> Self {
        Self::new(false)
    }
}

/// Emit the entry point of a native module registering the given components.
///
/// ```ignore
/// lumen::export_module! {
///     "accel::embree" => AccelEmbree,
/// }
/// ```
#[macro_export]
macro_rules! export_module {
    ($($key:expr => $ty:ty),* $(,)?) => {
        #[no_mangle]
        pub fn lumen_module_register(registry: &$crate::comp::Registry) {
            $(
                registry.register(
                    $key,
                    || -> ::std::boxed::Box<dyn $crate::comp::Component> {
                        ::std::boxed::Box::new(<$ty as ::std::default::Default>::default())
                    },
                    None,
                );
            )*
        }
    };
}
