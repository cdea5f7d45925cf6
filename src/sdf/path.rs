//! Scene description paths.
//!
//! Prim paths are absolute and slash-delimited (`/Root/Cube`); property paths
//! append a `.name` suffix (`/Root/Cube.xformOp:transform`).

use std::fmt;
use std::str::FromStr;

use smallvec::SmallVec;

use crate::util::{Error, Result};

/// A path value locating a prim or property in a stage.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Path {
    text: String,
}

impl Path {
    /// The absolute root path `/`.
    pub fn absolute_root() -> Self {
        Self { text: "/".to_string() }
    }

    /// Whether this is the absolute root path.
    #[inline]
    pub fn is_root(&self) -> bool {
        self.text == "/"
    }

    /// Whether this path names a property.
    #[inline]
    pub fn is_property_path(&self) -> bool {
        self.property_split().is_some()
    }

    /// Whether this path names a prim (or the root).
    #[inline]
    pub fn is_prim_path(&self) -> bool {
        !self.is_property_path()
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Append a prim child segment.
    pub fn append_child(&self, name: &str) -> Result<Self> {
        if self.is_property_path() {
            return Err(Error::InvalidPath(format!("cannot append prim '{name}' to property path {self}")));
        }
        if !is_identifier(name) {
            return Err(Error::InvalidPath(format!("'{name}' is not a valid prim name")));
        }
        let text = if self.is_root() {
            format!("/{name}")
        } else {
            format!("{}/{name}", self.text)
        };
        Ok(Self { text })
    }

    /// Append a property segment.
    pub fn append_property(&self, name: &str) -> Result<Self> {
        if self.is_property_path() || self.is_root() {
            return Err(Error::InvalidPath(format!("cannot append property '{name}' to {self}")));
        }
        if !is_property_name(name) {
            return Err(Error::InvalidPath(format!("'{name}' is not a valid property name")));
        }
        Ok(Self { text: format!("{}.{name}", self.text) })
    }

    /// Namespace parent: the owning prim of a property, or the parent prim.
    /// The root's parent is `None`.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        if let Some((prim, _)) = self.property_split() {
            return Some(Self { text: prim.to_string() });
        }
        match self.text.rfind('/') {
            Some(0) => Some(Self::absolute_root()),
            Some(i) => Some(Self { text: self.text[..i].to_string() }),
            None => None,
        }
    }

    /// The final name element (prim name or property name). Empty for the root.
    pub fn name(&self) -> &str {
        if let Some((_, prop)) = self.property_split() {
            return prop;
        }
        match self.text.rfind('/') {
            Some(i) => &self.text[i + 1..],
            None => &self.text,
        }
    }

    /// The prim part of this path (itself for prim paths).
    pub fn prim_path(&self) -> Self {
        match self.property_split() {
            Some((prim, _)) => Self { text: prim.to_string() },
            None => self.clone(),
        }
    }

    /// Prim name segments from the root, excluding the property part.
    pub fn prim_segments(&self) -> SmallVec<[&str; 8]> {
        let prim = match self.property_split() {
            Some((prim, _)) => prim,
            None => self.text.as_str(),
        };
        prim.split('/').filter(|s| !s.is_empty()).collect()
    }

    /// Number of prim segments (0 for the root).
    pub fn depth(&self) -> usize {
        self.prim_segments().len()
    }

    /// True if `self` is `other` or lies beneath it.
    pub fn has_prefix(&self, other: &Path) -> bool {
        if other.is_root() {
            return true;
        }
        self.text == other.text
            || self.text.starts_with(&format!("{}/", other.text))
            || self.text.starts_with(&format!("{}.", other.text))
    }

    /// All ancestors from the root down to the parent (root first).
    pub fn ancestors(&self) -> Vec<Path> {
        let mut out = Vec::new();
        let mut cur = self.parent();
        while let Some(p) = cur {
            cur = p.parent();
            out.push(p);
        }
        out.reverse();
        out
    }

    fn property_split(&self) -> Option<(&str, &str)> {
        let slash = self.text.rfind('/').unwrap_or(0);
        self.text[slash..]
            .find('.')
            .map(|dot| (&self.text[..slash + dot], &self.text[slash + dot + 1..]))
    }
}

impl FromStr for Path {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s == "/" {
            return Ok(Self::absolute_root());
        }
        if !s.starts_with('/') || s.ends_with('/') {
            return Err(Error::InvalidPath(format!("'{s}' is not an absolute path")));
        }
        let slash = s.rfind('/').unwrap_or(0);
        let (prim, prop) = match s[slash..].find('.') {
            Some(dot) => (&s[..slash + dot], Some(&s[slash + dot + 1..])),
            None => (s, None),
        };
        let mut path = Self::absolute_root();
        for seg in prim.split('/').skip(1) {
            path = path.append_child(seg)?;
        }
        if let Some(prop) = prop {
            path = path.append_property(prop)?;
        }
        Ok(path)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.text)
    }
}

/// Whether `s` is a valid prim identifier.
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Whether `s` is a valid (possibly namespaced) property name.
pub fn is_property_name(s: &str) -> bool {
    !s.is_empty() && s.split(':').all(is_identifier)
}

/// Turn an arbitrary host name into a valid identifier.
///
/// Invalid characters become `_`; a leading digit gets a `_` prefix.
pub fn make_identifier(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if out.is_empty() {
        out.push('_');
    }
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

/// Make `base` unique against `taken`, appending `_1`, `_2`, ...
pub fn make_unique(base: &str, taken: &mut std::collections::HashSet<String>) -> String {
    if taken.insert(base.to_string()) {
        return base.to_string();
    }
    let mut i = 1;
    loop {
        let candidate = format!("{base}_{i}");
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        i += 1;
    }
}
