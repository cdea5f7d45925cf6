//! Package reader.
//!
//! Structural problems are fatal. Deflated or misaligned entries written by
//! other tools are accepted with a warning.

use std::io::Read;

use byteorder::{ByteOrder, LittleEndian};
use flate2::read::DeflateDecoder;
use flate2::Crc;
use tracing::{debug, warn};

use super::format::*;
use super::Entry;
use crate::diagnostics::Warning;
use crate::util::{Error, Result};

fn zip_error(detail: impl Into<String>) -> Error {
    Error::format("zip", detail)
}

fn slice<'a>(data: &'a [u8], start: usize, len: usize, what: &str) -> Result<&'a [u8]> {
    start
        .checked_add(len)
        .and_then(|end| data.get(start..end))
        .ok_or_else(|| zip_error(format!("{what} truncated at offset {start}")))
}

fn find_eocd(data: &[u8]) -> Result<EndOfCentralDirectory> {
    if data.len() < EOCD_SIZE {
        return Err(zip_error("end of central directory not found"));
    }
    let last = data.len() - EOCD_SIZE;
    let first = last.saturating_sub(MAX_COMMENT);
    let pos = (first..=last)
        .rev()
        .find(|&p| LittleEndian::read_u32(&data[p..p + 4]) == EOCD_SIG)
        .ok_or_else(|| zip_error("end of central directory not found"))?;
    let r = &data[pos..pos + EOCD_SIZE];
    let disk = LittleEndian::read_u16(&r[4..]);
    let entries_on_disk = LittleEndian::read_u16(&r[8..]);
    let entries = LittleEndian::read_u16(&r[10..]);
    if disk != 0 || entries_on_disk != entries {
        return Err(Error::Unsupported("multi-disk archives".into()));
    }
    let eocd = EndOfCentralDirectory {
        entries,
        directory_size: LittleEndian::read_u32(&r[12..]),
        directory_offset: LittleEndian::read_u32(&r[16..]),
    };
    if eocd.directory_offset == u32::MAX || eocd.entries == u16::MAX {
        return Err(Error::Unsupported("zip64 archives".into()));
    }
    Ok(eocd)
}

fn read_central(data: &[u8], eocd: &EndOfCentralDirectory) -> Result<Vec<CentralEntry>> {
    let dir = slice(data, eocd.directory_offset as usize, eocd.directory_size as usize, "central directory")?;
    let mut pos = 0usize;
    let mut out = Vec::with_capacity(eocd.entries as usize);
    for _ in 0..eocd.entries {
        let h = slice(dir, pos, CENTRAL_HEADER_SIZE, "central directory header")?;
        if LittleEndian::read_u32(h) != CENTRAL_HEADER_SIG {
            return Err(zip_error(format!("bad central directory signature at {pos}")));
        }
        let name_len = LittleEndian::read_u16(&h[28..]) as usize;
        let extra_len = LittleEndian::read_u16(&h[30..]) as usize;
        let comment_len = LittleEndian::read_u16(&h[32..]) as usize;
        let name = slice(dir, pos + CENTRAL_HEADER_SIZE, name_len, "entry name")?;
        let name = std::str::from_utf8(name)?.to_string();
        out.push(CentralEntry {
            name,
            method: LittleEndian::read_u16(&h[10..]),
            crc32: LittleEndian::read_u32(&h[16..]),
            compressed_size: LittleEndian::read_u32(&h[20..]),
            uncompressed_size: LittleEndian::read_u32(&h[24..]),
            local_offset: LittleEndian::read_u32(&h[42..]),
        });
        pos += CENTRAL_HEADER_SIZE + name_len + extra_len + comment_len;
    }
    Ok(out)
}

fn read_entry(data: &[u8], c: &CentralEntry, warnings: &mut Vec<Warning>) -> Result<Entry> {
    let offset = c.local_offset as usize;
    let h = slice(data, offset, LOCAL_HEADER_SIZE, "local header")?;
    if LittleEndian::read_u32(h) != LOCAL_HEADER_SIG {
        return Err(zip_error(format!("bad local header signature for '{}'", c.name)));
    }
    let name_len = LittleEndian::read_u16(&h[26..]) as usize;
    let extra_len = LittleEndian::read_u16(&h[28..]) as usize;
    let data_offset = offset + LOCAL_HEADER_SIZE + name_len + extra_len;
    let raw = slice(data, data_offset, c.compressed_size as usize, &c.name)?;

    let bytes = match c.method {
        METHOD_STORED => {
            if c.compressed_size != c.uncompressed_size {
                return Err(zip_error(format!("stored entry '{}' has mismatched sizes", c.name)));
            }
            raw.to_vec()
        }
        METHOD_DEFLATED => {
            warn!(entry = %c.name, "deflated archive entry");
            warnings.push(Warning::DeflatedEntry { name: c.name.clone() });
            let expected = c.uncompressed_size as usize;
            let mut out = Vec::with_capacity(expected.min(raw.len().saturating_mul(MAX_DEFLATE_RATIO)));
            DeflateDecoder::new(raw)
                .take(c.uncompressed_size as u64 + 1)
                .read_to_end(&mut out)
                .map_err(|e| zip_error(format!("inflating '{}': {e}", c.name)))?;
            if out.len() != expected {
                return Err(zip_error(format!("entry '{}' inflated to the wrong size", c.name)));
            }
            out
        }
        m => return Err(Error::Unsupported(format!("compression method {m} for '{}'", c.name))),
    };

    let mut crc = Crc::new();
    crc.update(&bytes);
    if crc.sum() != c.crc32 {
        return Err(zip_error(format!("CRC mismatch for '{}'", c.name)));
    }
    if c.method == METHOD_STORED && data_offset as u64 % DATA_ALIGNMENT != 0 {
        warn!(entry = %c.name, data_offset, "misaligned archive entry");
        warnings.push(Warning::MisalignedEntry { name: c.name.clone(), offset: data_offset as u64 });
    }
    Ok(Entry { name: c.name.clone(), data: bytes, offset: data_offset as u64 })
}

/// Whether `entry` is a layer this crate can read.
pub fn is_layer(entry: &Entry) -> bool {
    let ext = entry.name.rsplit_once('.').map(|(_, e)| e.to_ascii_lowercase());
    let crate_magic = entry.data.starts_with(USDC_MAGIC);
    let text_magic = entry.data.starts_with(USDA_MAGIC);
    match ext.as_deref() {
        Some("usdc") => crate_magic,
        Some("usda") => text_magic,
        Some("usd") => crate_magic || text_magic,
        _ => false,
    }
}

/// Parse every entry of an archive held in memory.
pub fn read_entries(data: &[u8], warnings: &mut Vec<Warning>) -> Result<Vec<Entry>> {
    let eocd = find_eocd(data)?;
    if eocd.entries == 0 {
        return Err(zip_error("archive has no entries"));
    }
    let central = read_central(data, &eocd)?;
    let entries = central
        .iter()
        .map(|c| read_entry(data, c, warnings))
        .collect::<Result<Vec<_>>>()?;
    if let Some(first) = entries.first() {
        if !is_layer(first) {
            return Err(Error::InvalidLayer(first.name.clone()));
        }
    }
    debug!(entries = entries.len(), "archive read");
    Ok(entries)
}
