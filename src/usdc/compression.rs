//! LZ4 block compression with the crate chunk header.
//!
//! Compressed buffers start with one byte holding the chunk count. Zero
//! means the rest of the buffer is a single LZ4 block; otherwise each chunk
//! is an `i32` compressed size followed by that many bytes.

use byteorder::{ByteOrder, LittleEndian};

use crate::util::{Error, Result};

/// Largest input a single LZ4 block may hold.
const LZ4_MAX_INPUT_SIZE: usize = 0x7E00_0000;

/// Compress `input` into a chunked buffer.
pub fn compress(input: &[u8]) -> Vec<u8> {
    if input.len() <= LZ4_MAX_INPUT_SIZE {
        let block = lz4_flex::block::compress(input);
        let mut out = Vec::with_capacity(block.len() + 1);
        out.push(0);
        out.extend_from_slice(&block);
        return out;
    }
    let chunks: Vec<&[u8]> = input.chunks(LZ4_MAX_INPUT_SIZE).collect();
    let mut out = vec![chunks.len() as u8];
    for chunk in chunks {
        let block = lz4_flex::block::compress(chunk);
        let mut size = [0u8; 4];
        LittleEndian::write_i32(&mut size, block.len() as i32);
        out.extend_from_slice(&size);
        out.extend_from_slice(&block);
    }
    out
}

/// Decompress a chunked buffer holding at most `max_output` bytes.
///
/// `section` names the crate section in errors.
pub fn decompress(input: &[u8], max_output: usize, section: &str) -> Result<Vec<u8>> {
    let (&chunks, mut rest) = input
        .split_first()
        .ok_or_else(|| Error::format(section, "empty compressed buffer"))?;
    let mut out = vec![0u8; max_output];
    let lz4_err = |e: lz4_flex::block::DecompressError| Error::format(section, format!("lz4: {e}"));

    let written = if chunks == 0 {
        lz4_flex::block::decompress_into(rest, &mut out).map_err(lz4_err)?
    } else {
        let mut total = 0usize;
        for _ in 0..chunks {
            if rest.len() < 4 {
                return Err(Error::format(section, "truncated chunk header"));
            }
            let size = LittleEndian::read_i32(rest);
            rest = &rest[4..];
            let size = usize::try_from(size)
                .ok()
                .filter(|&s| s <= rest.len())
                .ok_or_else(|| Error::format(section, format!("chunk size {size} out of range")))?;
            total += lz4_flex::block::decompress_into(&rest[..size], &mut out[total..]).map_err(lz4_err)?;
            rest = &rest[size..];
        }
        total
    };
    out.truncate(written);
    Ok(out)
}
