//! Utility types shared by every stage of the pipeline.
//!
//! - [`Error`] / [`Result`] - error handling
//! - Math type re-exports from glam plus bounding boxes

mod error;
mod math;

pub use error::*;
pub use math::*;
