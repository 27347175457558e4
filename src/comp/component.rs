use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::ops::{Deref, DerefMut};

use crate::comp::film::AccumBuffer;
use crate::core::errors::Result;
use crate::serial::{InputArchive, OutputArchive};

/// Conversion to [`Any`] so trait objects can be downcast to their concrete type.
/// Implemented for anything that's `'static`, `Send` and `Sync`.
pub trait AsAny: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Base trait of every object living in the component tree.
///
/// Every hook has a no-op default, so a component only implements the
/// capabilities it actually has. Components own their children through
/// [`Ptr`] fields and expose them by name through `underlying*` and
/// `for_each_underlying*`; the persistence codec and locator resolution rely
/// on nothing else.
pub trait Component: AsAny {
    /// Called right after creation with the JSON properties of the instance.
    fn construct(&mut self, prop: &Value) -> Result<()> {
        let _ = prop;
        Ok(())
    }

    /// Write the payload of this component. Owned children are written with
    /// [`OutputArchive::save_ptr`].
    fn save(&self, ar: &mut OutputArchive) -> Result<()> {
        let _ = ar;
        Ok(())
    }

    /// Read the payload written by [`Component::save`] into a freshly
    /// created instance.
    fn load(&mut self, ar: &mut InputArchive<'_>) -> Result<()> {
        let _ = ar;
        Ok(())
    }

    /// Look up a direct child by name.
    fn underlying(&self, name: &str) -> Option<&Ptr> {
        let _ = name;
        None
    }

    fn underlying_mut(&mut self, name: &str) -> Option<&mut Ptr> {
        let _ = name;
        None
    }

    /// Visit every owned child with its name.
    fn for_each_underlying(&self, visit: &mut dyn FnMut(&str, &Ptr)) {
        let _ = visit;
    }

    fn for_each_underlying_mut(&mut self, visit: &mut dyn FnMut(&str, &mut Ptr)) {
        let _ = visit;
    }

    /// Implementation-defined JSON view of the component, mostly for debugging.
    fn underlying_value(&self, query: &str) -> Value {
        let _ = query;
        Value::Null
    }

    /// Accumulation buffer merged by the coordinator during gather.
    fn accumulation(&self) -> Option<&AccumBuffer> {
        None
    }

    fn accumulation_mut(&mut self) -> Option<&mut AccumBuffer> {
        None
    }
}

/// Release hook run right before an instance is dropped.
pub type ReleaseFn = fn(&mut dyn Component);

/// Owning pointer to a component instance.
///
/// Remembers the registry key the instance was created from and its locator
/// inside the tree (empty while detached).
pub struct Ptr {
    key: String,
    loc: String,
    release: Option<ReleaseFn>,
    inner: Box<dyn Component>,
}

impl Ptr {
    pub(crate) fn new(key: String, inner: Box<dyn Component>, release: Option<ReleaseFn>) -> Self {
        Self {
            key,
            loc: String::new(),
            release,
            inner,
        }
    }

    /// Wrap an instance created outside the registry. It still needs a key
    /// registered under the same name to be loadable again.
    pub fn from_box(key: impl Into<String>, inner: Box<dyn Component>) -> Self {
        Self::new(key.into(), inner, None)
    }

    /// Registry key of the instance
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Locator of the instance, empty if detached
    pub fn loc(&self) -> &str {
        &self.loc
    }

    pub fn set_loc(&mut self, loc: impl Into<String>) {
        self.loc = loc.into();
    }

    pub fn get(&self) -> &dyn Component {
        self.inner.as_ref()
    }

    pub fn get_mut(&mut self) -> &mut dyn Component {
        self.inner.as_mut()
    }

    /// Downcast to the concrete component type
    pub fn downcast_ref<T: Component>(&self) -> Option<&T> {
        self.inner.as_ref().as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: Component>(&mut self) -> Option<&mut T> {
        self.inner.as_mut().as_any_mut().downcast_mut::<T>()
    }
}

impl Deref for Ptr {
    type Target = dyn Component;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl DerefMut for Ptr {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.inner.as_mut()
    }
}

impl Drop for Ptr {
    fn drop(&mut self) {
        if let Some(release) = self.release {
            release(self.inner.as_mut());
        }
    }
}

impl fmt::Debug for Ptr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ptr")
            .field("key", &self.key)
            .field("loc", &self.loc)
            .finish_non_exhaustive()
    }
}

/// Visit `ptr` and every descendant, parents first.
pub fn visit(ptr: &Ptr, f: &mut dyn FnMut(&Ptr)) {
    f(ptr);
    ptr.get().for_each_underlying(&mut |_, child| visit(child, f));
}

pub fn visit_mut(ptr: &mut Ptr, f: &mut dyn FnMut(&mut Ptr)) {
    f(ptr);
    ptr.get_mut()
        .for_each_underlying_mut(&mut |_, child| visit_mut(child, f));
}
