//! Binary crate layers (`.usdc`).
//!
//! File layout:
//!
//! ```text
//! [bootstrap: magic, version, TOC offset]
//! [value data, 8-byte aligned blobs]
//! [TOKENS][STRINGS][FIELDS][FIELDSETS][PATHS][SPECS]
//! [TOC: section count, (name[16], start, size)*]
//! ```
//!
//! Structural tables are LZ4 compressed; index tables additionally use the
//! delta integer coding in [`integer_coding`].

mod compression;
mod cursor;
pub mod format;
mod integer_coding;
mod reader;
mod value_rep;
mod writer;

#[cfg(test)]
mod tests;

use crate::sdf::Stage;
use crate::util::Result;

/// Serialize a stage to crate bytes. Output is deterministic for equal stages.
pub fn encode(stage: &Stage) -> Result<Vec<u8>> {
    writer::write(stage)
}

/// Parse and validate crate bytes.
pub fn decode(data: &[u8]) -> Result<Stage> {
    reader::read(data)
}
