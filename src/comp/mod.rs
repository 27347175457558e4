//! Component runtime: registry, tree of owned instances, locators and
//! native modules.

pub mod component;
pub mod context;
pub mod film;
pub mod group;
pub mod locator;
pub mod plugin;
pub mod registry;
pub mod scoped;

pub use component::{visit, visit_mut, AsAny, Component, Ptr, ReleaseFn};
pub use context::Context;
pub use film::{AccumBuffer, AccumFilm};
pub use group::Group;
pub use locator::{make_loc, Locator, WeakRef};
pub use plugin::{platform_suffix, ModuleLoader, MODULE_ENTRY_SYMBOL};
pub use registry::{ComponentRegistration, CreateFn, Origin, Registry, COMPONENTS};
pub use scoped::ScopedModules;
