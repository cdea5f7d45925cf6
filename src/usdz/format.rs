//! Zip structures used by the package format.

/// Local file header signature.
pub const LOCAL_HEADER_SIG: u32 = 0x0403_4b50;

/// Central directory file header signature.
pub const CENTRAL_HEADER_SIG: u32 = 0x0201_4b50;

/// End of central directory signature.
pub const EOCD_SIG: u32 = 0x0605_4b50;

/// Fixed part of a local header, before the name.
pub const LOCAL_HEADER_SIZE: usize = 30;

/// Fixed part of a central directory header, before the name.
pub const CENTRAL_HEADER_SIZE: usize = 46;

/// End of central directory record without comment.
pub const EOCD_SIZE: usize = 22;

/// Maximum trailing archive comment.
pub const MAX_COMMENT: usize = 0xffff;

/// Entry data must start on a multiple of this.
pub const DATA_ALIGNMENT: u64 = 64;

/// Extra field id carrying alignment padding.
pub const ALIGN_EXTRA_ID: u16 = 0x1986;

/// Extra field header: id + size.
pub const EXTRA_HEADER_SIZE: usize = 4;

pub const VERSION_NEEDED: u16 = 20;
pub const VERSION_MADE_BY: u16 = 20;

pub const METHOD_STORED: u16 = 0;
pub const METHOD_DEFLATED: u16 = 8;

/// Upper bound of the deflate expansion ratio.
pub const MAX_DEFLATE_RATIO: usize = 1032;

/// DOS time 00:00:00.
pub const DOS_TIME: u16 = 0;

/// DOS date 1980-01-01.
pub const DOS_DATE: u16 = 0x0021;

/// Magic of a binary crate layer.
pub const USDC_MAGIC: &[u8; 8] = b"PXR-USDC";

/// Leading bytes of a text layer.
pub const USDA_MAGIC: &[u8; 5] = b"#usda";

/// Padding bytes needed so that data following a header of `header_len`
/// bytes written at `offset` is aligned. Never between 1 and 3, since an
/// extra field needs four bytes of its own.
pub fn alignment_padding(offset: u64, header_len: u64) -> u64 {
    let misalignment = (offset + header_len) % DATA_ALIGNMENT;
    match misalignment {
        0 => 0,
        m => {
            let pad = DATA_ALIGNMENT - m;
            if pad < EXTRA_HEADER_SIZE as u64 {
                pad + DATA_ALIGNMENT
            } else {
                pad
            }
        }
    }
}

/// Central directory record of one entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CentralEntry {
    pub name: String,
    pub method: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub local_offset: u32,
}

/// End of central directory record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EndOfCentralDirectory {
    pub entries: u16,
    pub directory_size: u32,
    pub directory_offset: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignment_padding() {
        assert_eq!(alignment_padding(0, 64), 0);
        assert_eq!(alignment_padding(0, 30 + 10), 24);
        assert_eq!(alignment_padding(0, 62), 66);
        assert_eq!(alignment_padding(100, 30), 62);
        for offset in 0..200u64 {
            let pad = alignment_padding(offset, 40);
            assert_eq!((offset + 40 + pad) % 64, 0);
            assert!(pad == 0 || pad >= 4);
        }
    }
}
