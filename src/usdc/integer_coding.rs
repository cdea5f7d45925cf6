//! Delta/varint integer coding used for index tables and int arrays.
//!
//! Layout of an encoded run of `n` integers:
//! `[i32 common delta][2-bit codes, 4 per byte, LSB first][payload]`.
//! Code 0 is the common delta, 1/2/3 are explicit `i8`/`i16`/`i32` deltas.

use std::collections::HashMap;

use byteorder::{LittleEndian, WriteBytesExt};

use super::compression;
use super::cursor::Cursor;
use crate::util::Result;

/// Integers representable in the 32-bit coding.
pub trait Integer: Copy {
    fn from_i32(value: i32) -> Self;
    fn to_i32(self) -> i32;
}

impl Integer for i32 {
    fn from_i32(value: i32) -> i32 {
        value
    }

    fn to_i32(self) -> i32 {
        self
    }
}

impl Integer for u32 {
    fn from_i32(value: i32) -> u32 {
        value as u32
    }

    fn to_i32(self) -> i32 {
        self as i32
    }
}

/// Upper bound of the encoded size of `count` integers.
pub fn encoded_buffer_size(count: usize) -> usize {
    if count == 0 {
        0
    } else {
        4 + count.div_ceil(4) + count * 4
    }
}

fn code_for(delta: i32, common: i32) -> u8 {
    if delta == common {
        0
    } else if i8::try_from(delta).is_ok() {
        1
    } else if i16::try_from(delta).is_ok() {
        2
    } else {
        3
    }
}

/// Encode `values`; ties on the most common delta pick the larger delta.
pub fn encode_integers<T: Integer>(values: &[T]) -> Vec<u8> {
    if values.is_empty() {
        return Vec::new();
    }
    let mut counts: HashMap<i32, usize> = HashMap::new();
    let mut prev = 0i32;
    for v in values {
        let cur = v.to_i32();
        *counts.entry(cur.wrapping_sub(prev)).or_default() += 1;
        prev = cur;
    }
    let common = counts
        .iter()
        .max_by(|a, b| a.1.cmp(b.1).then(a.0.cmp(b.0)))
        .map(|(d, _)| *d)
        .unwrap_or(0);

    let codes_len = values.len().div_ceil(4);
    let mut out = Vec::with_capacity(encoded_buffer_size(values.len()));
    out.extend_from_slice(&common.to_le_bytes());
    out.resize(4 + codes_len, 0);
    let mut payload = Vec::new();

    prev = 0;
    for (i, v) in values.iter().enumerate() {
        let cur = v.to_i32();
        let delta = cur.wrapping_sub(prev);
        prev = cur;
        let code = code_for(delta, common);
        out[4 + i / 4] |= code << (2 * (i % 4));
        // Writes into a Vec cannot fail.
        let _ = match code {
            1 => payload.write_i8(delta as i8),
            2 => payload.write_i16::<LittleEndian>(delta as i16),
            3 => payload.write_i32::<LittleEndian>(delta),
            _ => Ok(()),
        };
    }
    out.extend_from_slice(&payload);
    out
}

/// Decode `count` integers from an encoded buffer.
pub fn decode_integers<T: Integer>(buffer: &[u8], count: usize, section: &'static str) -> Result<Vec<T>> {
    if count == 0 {
        return Ok(Vec::new());
    }
    let mut header = Cursor::new(buffer, section);
    let common = header.i32()?;
    let codes = header.bytes(count.div_ceil(4))?;
    let mut payload = Cursor::new(&buffer[header.pos()..], section);

    let mut out = Vec::with_capacity(count);
    let mut prev = 0i32;
    for i in 0..count {
        let delta = match (codes[i / 4] >> (2 * (i % 4))) & 3 {
            1 => payload.bytes(1)?[0] as i8 as i32,
            2 => payload.u16()? as i16 as i32,
            3 => payload.i32()?,
            _ => common,
        };
        prev = prev.wrapping_add(delta);
        out.push(T::from_i32(prev));
    }
    Ok(out)
}

/// Append `u64 compressed size` + compressed encoding of `values`.
pub fn write_compressed_ints<T: Integer>(out: &mut Vec<u8>, values: &[T]) {
    let packed = compression::compress(&encode_integers(values));
    out.extend_from_slice(&(packed.len() as u64).to_le_bytes());
    out.extend_from_slice(&packed);
}

/// Read what [`write_compressed_ints`] wrote, expecting `count` integers.
pub fn read_compressed_ints<T: Integer>(cursor: &mut Cursor<'_>, count: usize) -> Result<Vec<T>> {
    let size = cursor.u64()?;
    let size = usize::try_from(size)
        .ok()
        .filter(|&s| s <= cursor.remaining())
        .ok_or_else(|| cursor.error(format!("compressed integer block of {size} bytes is truncated")))?;
    let section = cursor.section();
    let packed = cursor.bytes(size)?;
    if count == 0 {
        return Ok(Vec::new());
    }
    let raw = compression::decompress(packed, encoded_buffer_size(count), section)?;
    decode_integers(&raw, count, section)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference_encoding() -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&1_i32.to_le_bytes());
        out.extend_from_slice(&0b00_01_00_01_11_00_00_01_u16.to_le_bytes());
        out.extend_from_slice(&123_i8.to_le_bytes());
        out.extend_from_slice(&100000_i32.to_le_bytes());
        out.extend_from_slice(&0_i8.to_le_bytes());
        out.extend_from_slice(&0_i8.to_le_bytes());
        out
    }

    #[test]
    fn test_published_vector() {
        let input = vec![123_u32, 124, 125, 100125, 100125, 100126, 100126];
        let expected = reference_encoding();
        assert_eq!(encode_integers(&input), expected);
        assert_eq!(decode_integers::<u32>(&expected, 7, "FIELDS").unwrap(), input);
    }

    #[test]
    fn test_extremes_wrap() {
        let input = vec![i32::MIN, i32::MAX, 0, -1, i32::MIN];
        let encoded = encode_integers(&input);
        assert_eq!(decode_integers::<i32>(&encoded, input.len(), "FIELDS").unwrap(), input);
    }

    #[test]
    fn test_compressed_block() {
        let input: Vec<i32> = (0..500).map(|i| i * 3 - 700).collect();
        let mut out = Vec::new();
        write_compressed_ints(&mut out, &input);
        let mut cursor = Cursor::new(&out, "SPECS");
        assert_eq!(read_compressed_ints::<i32>(&mut cursor, input.len()).unwrap(), input);
        assert_eq!(cursor.remaining(), 0);
    }

    #[test]
    fn test_truncated_payload() {
        let encoded = reference_encoding();
        assert!(decode_integers::<u32>(&encoded[..encoded.len() - 3], 7, "PATHS").is_err());
    }
}
