//! Package writer: stored, 64-byte aligned zip entries.

use std::collections::HashSet;
use std::io::Write;

use byteorder::{LittleEndian, WriteBytesExt};
use flate2::Crc;
use tracing::{debug, trace};

use super::format::*;
use crate::util::{Error, Result};

struct Written {
    name: String,
    crc32: u32,
    size: u32,
    offset: u32,
}

/// Zip writer producing package-conformant archives in memory.
pub struct PackageWriter {
    out: Vec<u8>,
    entries: Vec<Written>,
    names: HashSet<String>,
}

fn check_u32(value: u64, what: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::Unsupported(format!("{what} exceeds 4 GiB (zip64 is not supported)")))
}

fn check_name(name: &str) -> Result<()> {
    let bad = name.is_empty()
        || name.starts_with('/')
        || name.contains('\\')
        || name.split('/').any(|seg| seg.is_empty() || seg == "..")
        || name.len() > u16::MAX as usize;
    if bad {
        return Err(Error::invalid(format!("invalid archive entry name '{name}'")));
    }
    Ok(())
}

impl PackageWriter {
    pub fn new() -> Self {
        Self { out: Vec::new(), entries: Vec::new(), names: HashSet::new() }
    }

    /// Append a stored entry; its data lands on a 64-byte boundary.
    pub fn add(&mut self, name: &str, data: &[u8]) -> Result<()> {
        check_name(name)?;
        if !self.names.insert(name.to_string()) {
            return Err(Error::invalid(format!("duplicate archive entry '{name}'")));
        }
        let offset = self.out.len() as u64;
        let header_len = (LOCAL_HEADER_SIZE + name.len()) as u64;
        let pad = alignment_padding(offset, header_len);
        let size = check_u32(data.len() as u64, name)?;
        let offset32 = check_u32(offset, "archive")?;

        let mut crc = Crc::new();
        crc.update(data);
        let crc32 = crc.sum();

        let w = &mut self.out;
        w.write_u32::<LittleEndian>(LOCAL_HEADER_SIG)?;
        w.write_u16::<LittleEndian>(VERSION_NEEDED)?;
        w.write_u16::<LittleEndian>(0)?;
        w.write_u16::<LittleEndian>(METHOD_STORED)?;
        w.write_u16::<LittleEndian>(DOS_TIME)?;
        w.write_u16::<LittleEndian>(DOS_DATE)?;
        w.write_u32::<LittleEndian>(crc32)?;
        w.write_u32::<LittleEndian>(size)?;
        w.write_u32::<LittleEndian>(size)?;
        w.write_u16::<LittleEndian>(name.len() as u16)?;
        w.write_u16::<LittleEndian>(pad as u16)?;
        w.write_all(name.as_bytes())?;
        if pad > 0 {
            w.write_u16::<LittleEndian>(ALIGN_EXTRA_ID)?;
            w.write_u16::<LittleEndian>((pad as usize - EXTRA_HEADER_SIZE) as u16)?;
            w.resize(w.len() + pad as usize - EXTRA_HEADER_SIZE, 0);
        }
        debug_assert_eq!(w.len() as u64 % DATA_ALIGNMENT, 0);
        w.write_all(data)?;
        trace!(name, offset, size, pad, "archive entry");

        self.entries.push(Written { name: name.to_string(), crc32, size, offset: offset32 });
        Ok(())
    }

    /// Write the central directory and return the archive bytes.
    pub fn finish(mut self) -> Result<Vec<u8>> {
        if self.entries.is_empty() {
            return Err(Error::invalid("archive has no entries"));
        }
        let count = u16::try_from(self.entries.len())
            .map_err(|_| Error::Unsupported("more than 65535 archive entries".into()))?;
        let directory_offset = check_u32(self.out.len() as u64, "archive")?;
        let w = &mut self.out;
        for e in &self.entries {
            w.write_u32::<LittleEndian>(CENTRAL_HEADER_SIG)?;
            w.write_u16::<LittleEndian>(VERSION_MADE_BY)?;
            w.write_u16::<LittleEndian>(VERSION_NEEDED)?;
            w.write_u16::<LittleEndian>(0)?;
            w.write_u16::<LittleEndian>(METHOD_STORED)?;
            w.write_u16::<LittleEndian>(DOS_TIME)?;
            w.write_u16::<LittleEndian>(DOS_DATE)?;
            w.write_u32::<LittleEndian>(e.crc32)?;
            w.write_u32::<LittleEndian>(e.size)?;
            w.write_u32::<LittleEndian>(e.size)?;
            w.write_u16::<LittleEndian>(e.name.len() as u16)?;
            w.write_u16::<LittleEndian>(0)?; // extra
            w.write_u16::<LittleEndian>(0)?; // comment
            w.write_u16::<LittleEndian>(0)?; // disk
            w.write_u16::<LittleEndian>(0)?; // internal attributes
            w.write_u32::<LittleEndian>(0)?; // external attributes
            w.write_u32::<LittleEndian>(e.offset)?;
            w.write_all(e.name.as_bytes())?;
        }
        let directory_size = check_u32(w.len() as u64 - directory_offset as u64, "central directory")?;
        w.write_u32::<LittleEndian>(EOCD_SIG)?;
        w.write_u16::<LittleEndian>(0)?;
        w.write_u16::<LittleEndian>(0)?;
        w.write_u16::<LittleEndian>(count)?;
        w.write_u16::<LittleEndian>(count)?;
        w.write_u32::<LittleEndian>(directory_size)?;
        w.write_u32::<LittleEndian>(directory_offset)?;
        w.write_u16::<LittleEndian>(0)?;
        check_u32(w.len() as u64, "archive")?;
        debug!(entries = count, bytes = w.len(), "archive written");
        Ok(self.out)
    }
}

impl Default for PackageWriter {
    fn default() -> Self {
        Self::new()
    }
}
