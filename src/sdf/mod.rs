//! Scene description data model.
//!
//! A [`Stage`] owns a strict tree of [`Prim`]s. Prims carry ordered
//! [`Attribute`]s and [`Relationship`]s; attribute payloads are [`Value`]s,
//! either constant or held in [`TimeSamples`]. Both layer codecs read and
//! write exactly this model, so round-trip equality is plain `==`.

pub mod path;
mod prim;
mod stage;
mod time_samples;
mod value;

pub use path::{make_identifier, make_unique, Path};
pub use prim::{Attribute, PrimType, Prim, Property, Relationship, Specifier, Variability};
pub use stage::{validate_mesh, validate_mesh_prim, Stage, StageMetadata};
pub use time_samples::{frame_times, TimeSamples};
pub use value::{BaseType, Value, ValueType};
