//! Bounds-checked little-endian reads over a crate buffer.

use byteorder::{ByteOrder, LittleEndian};

use crate::util::{Error, Result};

/// Read position within a byte slice. Every short read is a format error
/// naming the section being decoded.
#[derive(Clone)]
pub struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
    section: &'static str,
}

impl<'a> Cursor<'a> {
    pub fn new(data: &'a [u8], section: &'static str) -> Self {
        Self { data, pos: 0, section }
    }

    /// A cursor over `data[start..start + len]`.
    pub fn slice(data: &'a [u8], start: u64, len: u64, section: &'static str) -> Result<Self> {
        let range = usize::try_from(start)
            .ok()
            .zip(usize::try_from(len).ok())
            .and_then(|(s, l)| s.checked_add(l).map(|e| s..e))
            .filter(|r| r.end <= data.len())
            .ok_or_else(|| Error::format(section, format!("range {start}+{len} exceeds file size {}", data.len())))?;
        Ok(Self { data: &data[range], pos: 0, section })
    }

    #[inline]
    pub fn pos(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn section(&self) -> &'static str {
        self.section
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn seek(&mut self, pos: u64) -> Result<()> {
        match usize::try_from(pos) {
            Ok(p) if p <= self.data.len() => {
                self.pos = p;
                Ok(())
            }
            _ => Err(self.error(format!("offset {pos} out of range"))),
        }
    }

    pub fn error(&self, detail: impl Into<String>) -> Error {
        Error::format(self.section, detail)
    }

    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&e| e <= self.data.len())
            .ok_or_else(|| self.error(format!("truncated: need {len} bytes at offset {}", self.pos)))?;
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16> {
        Ok(LittleEndian::read_u16(self.bytes(2)?))
    }

    pub fn i32(&mut self) -> Result<i32> {
        Ok(LittleEndian::read_i32(self.bytes(4)?))
    }

    pub fn u32(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.bytes(4)?))
    }

    pub fn i64(&mut self) -> Result<i64> {
        Ok(LittleEndian::read_i64(self.bytes(8)?))
    }

    pub fn u64(&mut self) -> Result<u64> {
        Ok(LittleEndian::read_u64(self.bytes(8)?))
    }

    pub fn f32(&mut self) -> Result<f32> {
        Ok(LittleEndian::read_f32(self.bytes(4)?))
    }

    pub fn f64(&mut self) -> Result<f64> {
        Ok(LittleEndian::read_f64(self.bytes(8)?))
    }

    /// A length prefix that must fit in the bytes left, at `elem` bytes each.
    pub fn count(&mut self, elem: usize) -> Result<usize> {
        let n = self.u64()?;
        let fits = usize::try_from(n)
            .ok()
            .and_then(|n| n.checked_mul(elem.max(1)))
            .is_some_and(|bytes| bytes <= self.remaining());
        if !fits {
            return Err(self.error(format!("count {n} exceeds remaining {} bytes", self.remaining())));
        }
        Ok(n as usize)
    }
}
