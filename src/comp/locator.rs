//! Component locators: `$` followed by `.`-separated child names,
//! e.g. `$.scene.primitives.0`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::comp::Ptr;
use crate::core::errors::{LumenError, Result};

/// Root sentinel
pub const ROOT: &str = "$";

/// Parsed locator
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Locator {
    segments: Vec<String>,
}

impl Locator {
    /// The root locator `$`
    pub fn root() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    /// Parse a locator string. Fails with `NotFound` on anything that can
    /// never resolve: empty input, a first segment other than `$`, or an
    /// empty segment.
    pub fn parse(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(LumenError::not_found("locator", "<empty>"));
        }
        let mut parts = s.split('.');
        if parts.next() != Some(ROOT) {
            return Err(LumenError::not_found("locator starting with '$'", s));
        }
        let segments: Vec<String> = parts.map(str::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return Err(LumenError::not_found("locator with non-empty segments", s));
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().map(String::as_str)
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// Locator of the child `name`
    pub fn child(&self, name: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        Self { segments }
    }

    /// Locator of the parent, `None` for the root
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        let mut segments = self.segments.clone();
        segments.pop();
        Some(Self { segments })
    }

    /// Last segment, `$` for the root
    pub fn name(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or(ROOT)
    }

    /// Walk down from `root` following every segment
    pub fn walk<'a>(&self, root: &'a Ptr) -> Result<&'a Ptr> {
        let mut curr = root;
        for seg in self.segments() {
            curr = curr
                .get()
                .underlying(seg)
                .ok_or_else(|| self.missing())?;
        }
        Ok(curr)
    }

    pub fn walk_mut<'a>(&self, root: &'a mut Ptr) -> Result<&'a mut Ptr> {
        let mut curr = root;
        for seg in self.segments() {
            curr = curr
                .get_mut()
                .underlying_mut(seg)
                .ok_or_else(|| self.missing())?;
        }
        Ok(curr)
    }

    fn missing(&self) -> LumenError {
        LumenError::not_found("component", self.to_string())
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(ROOT)?;
        for seg in &self.segments {
            write!(f, ".{}", seg)?;
        }
        Ok(())
    }
}

/// Append `child` to `base`. An empty base yields `child` alone.
pub fn make_loc(base: &str, child: &str) -> String {
    if base.is_empty() {
        child.to_string()
    } else {
        format!("{}.{}", base, child)
    }
}

/// Non-owning reference to another component in the tree, stored as its
/// locator and resolved on demand. Never followed by the codec.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeakRef {
    loc: String,
}

impl WeakRef {
    pub fn new(loc: impl Into<String>) -> Self {
        Self { loc: loc.into() }
    }

    /// Reference the given instance through its locator
    pub fn to(ptr: &Ptr) -> Self {
        Self::new(ptr.loc())
    }

    pub fn loc(&self) -> &str {
        &self.loc
    }

    pub fn is_null(&self) -> bool {
        self.loc.is_empty()
    }
}
