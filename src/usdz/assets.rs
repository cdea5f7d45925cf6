//! Files packaged next to the default layer.

use std::collections::{HashMap, HashSet};

use md5::{Digest, Md5};

/// A file stored in the archive under `name`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Asset {
    pub name: String,
    pub data: Vec<u8>,
}

/// Assets collected over one export, deduplicated by content.
#[derive(Debug, Default)]
pub struct AssetStore {
    assets: Vec<Asset>,
    by_digest: HashMap<[u8; 16], usize>,
    names: HashSet<String>,
}

impl AssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `data` under `name` and return the archive path to use.
    ///
    /// Identical bytes return the path registered first; a taken name with
    /// different bytes gets a numeric suffix before the extension.
    pub fn add(&mut self, name: &str, data: Vec<u8>) -> String {
        let digest: [u8; 16] = Md5::digest(&data).into();
        if let Some(&i) = self.by_digest.get(&digest) {
            return self.assets[i].name.clone();
        }
        let name = self.unique_name(name);
        self.names.insert(name.clone());
        self.by_digest.insert(digest, self.assets.len());
        self.assets.push(Asset { name: name.clone(), data });
        name
    }

    fn unique_name(&self, name: &str) -> String {
        if !self.names.contains(name) {
            return name.to_string();
        }
        let (stem, ext) = match name.rsplit_once('.') {
            Some((s, e)) if !s.is_empty() && !e.contains('/') => (s, Some(e)),
            _ => (name, None),
        };
        (1..)
            .map(|i| match ext {
                Some(e) => format!("{stem}_{i}.{e}"),
                None => format!("{stem}_{i}"),
            })
            .find(|candidate| !self.names.contains(candidate))
            .unwrap_or_else(|| name.to_string())
    }

    pub fn get(&self, name: &str) -> Option<&Asset> {
        self.assets.iter().find(|a| a.name == name)
    }

    pub fn assets(&self) -> &[Asset] {
        &self.assets
    }

    pub fn into_assets(self) -> Vec<Asset> {
        self.assets
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_by_content() {
        let mut store = AssetStore::new();
        let a = store.add("textures/a.png", vec![1, 2, 3]);
        let b = store.add("textures/b.png", vec![1, 2, 3]);
        assert_eq!(a, b);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_name_collision() {
        let mut store = AssetStore::new();
        assert_eq!(store.add("textures/a.png", vec![1]), "textures/a.png");
        assert_eq!(store.add("textures/a.png", vec![2]), "textures/a_1.png");
        assert_eq!(store.add("textures/a.png", vec![3]), "textures/a_2.png");
        assert_eq!(store.add("textures/raw", vec![4]), "textures/raw");
        assert_eq!(store.add("textures/raw", vec![5]), "textures/raw_1");
        assert_eq!(store.get("textures/a_1.png").map(|a| a.data.clone()), Some(vec![2]));
    }
}
