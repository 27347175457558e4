use bincode::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::error;

use super::options;
use crate::comp::locator::make_loc;
use crate::comp::{Ptr, Registry};
use crate::core::errors::{LumenError, Result};

/// Buffered writer of a component stream
#[derive(Debug, Default)]
pub struct OutputArchive {
    buf: Vec<u8>,
}

impl OutputArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a plain value
    pub fn save<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        options().serialize_into(&mut self.buf, value)?;
        Ok(())
    }

    /// Write a polymorphic slot: presence tag, key, then the payload.
    pub fn save_ptr(&mut self, ptr: Option<&Ptr>) -> Result<()> {
        match ptr {
            None => self.save(&false),
            Some(ptr) => {
                self.save(&true)?;
                self.save(ptr.key())?;
                ptr.get().save(self)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Reader of a component stream.
///
/// Polymorphic slots are recreated through the registry, and every loaded
/// instance gets the locator of its slot.
pub struct InputArchive<'a> {
    bytes: &'a [u8],
    registry: &'a Registry,
    // Locators of the components currently being loaded
    locs: Vec<String>,
}

impl<'a> InputArchive<'a> {
    pub fn new(bytes: &'a [u8], registry: &'a Registry) -> Self {
        Self {
            bytes,
            registry,
            locs: Vec::new(),
        }
    }

    /// Read a plain value
    pub fn load<T: DeserializeOwned>(&mut self) -> Result<T> {
        Ok(options().deserialize_from(&mut self.bytes)?)
    }

    /// Read a polymorphic child slot called `name` of the component being loaded.
    pub fn load_ptr(&mut self, name: &str) -> Result<Option<Ptr>> {
        let loc = make_loc(self.current_loc(), name);
        self.load_ptr_at(loc)
    }

    /// Read a polymorphic child slot into `slot`, replacing its content.
    pub fn load_into(&mut self, slot: &mut Option<Ptr>, name: &str) -> Result<()> {
        *slot = self.load_ptr(name)?;
        Ok(())
    }

    /// Read a polymorphic slot placed at the explicit locator `loc`.
    pub fn load_ptr_at(&mut self, loc: impl Into<String>) -> Result<Option<Ptr>> {
        let present: bool = self.load()?;
        if !present {
            return Ok(None);
        }

        let key: String = self.load()?;
        if !self.registry.contains(&key) {
            error!(key = %key, "Stream refers to an unregistered component");
            return Err(LumenError::RoundTripMismatch { key });
        }
        let mut ptr = self.registry.create(&key)?;
        let loc = loc.into();
        ptr.set_loc(loc.clone());

        self.locs.push(loc);
        let result = ptr.get_mut().load(self);
        self.locs.pop();
        result?;

        Ok(Some(ptr))
    }

    /// Locator of the component currently being loaded, empty at top level
    pub fn current_loc(&self) -> &str {
        self.locs.last().map(String::as_str).unwrap_or("")
    }

    /// Bytes not consumed yet
    pub fn remaining(&self) -> usize {
        self.bytes.len()
    }

    pub fn registry(&self) -> &Registry {
        self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comp::{AccumFilm, Group};
    use crate::core::errors::ErrorKind;

    #[test]
    fn test_plain_values() {
        let registry = Registry::new();
        let mut out = OutputArchive::new();
        out.save(&42u32).unwrap();
        out.save("name").unwrap();
        out.save(&vec![1.5f64, 2.5]).unwrap();

        let bytes = out.into_bytes();
        let mut ar = InputArchive::new(&bytes, &registry);
        assert_eq!(ar.load::<u32>().unwrap(), 42);
        assert_eq!(ar.load::<String>().unwrap(), "name");
        assert_eq!(ar.load::<Vec<f64>>().unwrap(), vec![1.5, 2.5]);
        assert_eq!(ar.remaining(), 0);
    }

    #[test]
    fn test_empty_slot() {
        let registry = Registry::new();
        let mut out = OutputArchive::new();
        out.save_ptr(None).unwrap();
        let bytes = out.into_bytes();
        let mut ar = InputArchive::new(&bytes, &registry);
        assert!(ar.load_ptr_at("$").unwrap().is_none());
    }

    #[test]
    fn test_children_get_locators() {
        let registry = Registry::with_builtins();
        let mut group = Group::new();
        group.insert("film", Ptr::from_box("film::accum", Box::new(AccumFilm::new(2, 2))));
        let root = Ptr::from_box("group", Box::new(group));

        let mut out = OutputArchive::new();
        out.save_ptr(Some(&root)).unwrap();
        let bytes = out.into_bytes();

        let mut ar = InputArchive::new(&bytes, &registry);
        let loaded = ar.load_ptr_at("$").unwrap().unwrap();
        assert_eq!(loaded.loc(), "$");
        let film = loaded.underlying("film").unwrap();
        assert_eq!(film.loc(), "$.film");
        assert_eq!(film.key(), "film::accum");
    }

    #[test]
    fn test_unknown_key_is_mismatch() {
        let writer = Registry::with_builtins();
        let root = writer.create("group").unwrap();
        let mut out = OutputArchive::new();
        out.save_ptr(Some(&root)).unwrap();
        let bytes = out.into_bytes();

        let reader = Registry::new();
        let mut ar = InputArchive::new(&bytes, &reader);
        let err = ar.load_ptr_at("$").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RoundTripMismatch);
    }

    #[test]
    fn test_truncated_stream() {
        let registry = Registry::with_builtins();
        let mut out = OutputArchive::new();
        out.save_ptr(Some(&Ptr::from_box("film::accum", Box::new(AccumFilm::new(4, 4))))).unwrap();
        let bytes = out.into_bytes();

        let mut ar = InputArchive::new(&bytes[..bytes.len() / 2], &registry);
        assert_eq!(ar.load_ptr_at("$").unwrap_err().kind(), ErrorKind::Serialization);
    }
}
