use serde_json::{json, Value};

use crate::comp::{Component, Ptr};
use crate::core::errors::Result;
use crate::serial::{InputArchive, OutputArchive};

/// Generic container owning an ordered list of named children.
///
/// Used as the root of most trees. Children keep insertion order, which is
/// also the order they are written to and read from a stream.
#[crate::component("group")]
#[derive(Debug, Default)]
pub struct Group {
    children: Vec<(String, Ptr)>,
}

impl Group {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the child called `name`. Returns the replaced child.
    pub fn insert(&mut self, name: impl Into<String>, child: Ptr) -> Option<Ptr> {
        let name = name.into();
        match self.children.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => Some(std::mem::replace(slot, child)),
            None => {
                self.children.push((name, child));
                None
            }
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Ptr> {
        let index = self.children.iter().position(|(n, _)| n == name)?;
        Some(self.children.remove(index).1)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.children.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

impl Component for Group {
    fn save(&self, ar: &mut OutputArchive) -> Result<()> {
        ar.save(&(self.children.len() as u64))?;
        for (name, child) in &self.children {
            ar.save(name)?;
            ar.save_ptr(Some(child))?;
        }
        Ok(())
    }

    fn load(&mut self, ar: &mut InputArchive<'_>) -> Result<()> {
        let count: u64 = ar.load()?;
        self.children.clear();
        for _ in 0..count {
            let name: String = ar.load()?;
            if let Some(child) = ar.load_ptr(&name)? {
                self.children.push((name, child));
            }
        }
        Ok(())
    }

    fn underlying(&self, name: &str) -> Option<&Ptr> {
        self.children.iter().find(|(n, _)| n == name).map(|(_, c)| c)
    }

    fn underlying_mut(&mut self, name: &str) -> Option<&mut Ptr> {
        self.children
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, c)| c)
    }

    fn for_each_underlying(&self, visit: &mut dyn FnMut(&str, &Ptr)) {
        for (name, child) in &self.children {
            visit(name, child);
        }
    }

    fn for_each_underlying_mut(&mut self, visit: &mut dyn FnMut(&str, &mut Ptr)) {
        for (name, child) in &mut self.children {
            visit(name, child);
        }
    }

    fn underlying_value(&self, _query: &str) -> Value {
        json!({ "children": self.names().collect::<Vec<_>>() })
    }
}
