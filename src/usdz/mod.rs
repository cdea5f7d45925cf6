//! USDZ packages.
//!
//! A package is an uncompressed zip whose first entry is the default layer.
//! Every entry's data starts on a 64-byte boundary so that readers can map
//! the file and use the bytes in place; padding is carried in an extra field
//! of the local header.

mod assets;
pub mod format;
mod reader;
mod writer;

pub use assets::{Asset, AssetStore};
pub use reader::is_layer;
pub use writer::PackageWriter;

use std::fs::File;
use std::path::Path;

use memmap2::Mmap;
use tracing::info_span;

use crate::diagnostics::Warning;
use crate::options::LayerFormat;
use crate::util::{Error, Result};

/// One file of an archive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub data: Vec<u8>,
    /// Offset of the entry data within the archive.
    pub offset: u64,
}

impl Entry {
    /// Layer encoding, judged by the leading bytes.
    pub fn layer_format(&self) -> Option<LayerFormat> {
        if self.data.starts_with(format::USDC_MAGIC) {
            Some(LayerFormat::Crate)
        } else if self.data.starts_with(format::USDA_MAGIC) {
            Some(LayerFormat::Text)
        } else {
            None
        }
    }
}

/// A parsed package.
#[derive(Clone, Debug)]
pub struct Archive {
    entries: Vec<Entry>,
    warnings: Vec<Warning>,
}

impl Archive {
    /// Read and validate the package at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::FileNotFound(path.to_path_buf()));
        }
        let file = File::open(path)?;
        if file.metadata()?.len() == 0 {
            return unpack(&[]);
        }
        // Safety: the map is read-only and dropped before this returns.
        let map = unsafe { Mmap::map(&file) }?;
        unpack(&map)
    }

    /// The first entry, which holds the root layer.
    pub fn default_layer(&self) -> &Entry {
        // Construction guarantees at least one entry.
        &self.entries[0]
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn get(&self, name: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    /// Recoverable problems found while reading.
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Build a package: the layer first, then `assets` in order.
pub fn pack(layer_name: &str, layer: &[u8], assets: &[Asset]) -> Result<Vec<u8>> {
    let _span = info_span!("pack", assets = assets.len()).entered();
    let probe = Entry { name: layer_name.to_string(), data: layer.to_vec(), offset: 0 };
    if !is_layer(&probe) {
        return Err(Error::InvalidLayer(layer_name.to_string()));
    }
    let mut writer = PackageWriter::new();
    writer.add(layer_name, layer)?;
    for asset in assets {
        writer.add(&asset.name, &asset.data)?;
    }
    writer.finish()
}

/// Parse a package held in memory.
pub fn unpack(data: &[u8]) -> Result<Archive> {
    let _span = info_span!("unpack", bytes = data.len()).entered();
    let mut warnings = Vec::new();
    let entries = reader::read_entries(data, &mut warnings)?;
    Ok(Archive { entries, warnings })
}
