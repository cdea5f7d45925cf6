//! # USDZ
//!
//! Scene to USDZ export and import engine.
//!
//! A host scene graph is walked, its materials are translated to
//! `UsdPreviewSurface` (baking procedural inputs into textures), its
//! animation is sampled, and the resulting stage is encoded as a crate
//! (`.usdc`) or text (`.usda`) layer and packaged into a 64-byte aligned
//! zip. Import runs the same path backwards into a [`host::SceneSink`].
//!
//! ## Modules
//!
//! - [`util`] - Math helpers, errors
//! - [`sdf`] - Stage, prim, attribute and value model
//! - [`host`] - Host scene interface and the in-memory reference host
//! - [`walker`] - Exportable node enumeration
//! - [`material`] - Preview surface model and shader graph translation
//! - [`bake`] - Texture and ambient occlusion baking
//! - [`anim`] - Frame sampling of transforms, joints and points
//! - [`builder`] - Stage assembly and import planning
//! - [`usdc`] - Binary crate layers
//! - [`usda`] - Text layers
//! - [`usdz`] - Aligned zip packages
//!
//! ## Example
//!
//! ```ignore
//! use usdz::prelude::*;
//!
//! let mut scene = InMemoryScene::load("scene.json")?;
//! let options = ExportOptions { bake_textures: true, ..Default::default() };
//! export_usdz(&mut scene, "scene.usdz", &options, &CancelToken::new())?;
//!
//! let mut target = InMemoryScene::new("Imported");
//! import_usdz("scene.usdz", &mut target, &ImportOptions::default())?;
//! ```

pub mod util;
pub mod sdf;
pub mod host;
pub mod diagnostics;
pub mod options;
pub mod walker;
pub mod material;
pub mod bake;
pub mod anim;
pub mod builder;
pub mod usdc;
pub mod usda;
pub mod usdz;
pub mod export;
pub mod import;

// Re-export commonly used types
pub use diagnostics::{CancelToken, Warning};
pub use export::{export_stage, export_usdz, ExportReport, ExportedStage};
pub use import::{import_bytes, import_usdz, read_stage, ImportReport};
pub use options::{ExportOptions, ImportOptions, LayerFormat};
pub use util::{Error, Result};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::diagnostics::{CancelToken, Warning};
    pub use crate::export::{export_stage, export_usdz, ExportReport};
    pub use crate::host::{HostScene, InMemoryScene, SceneSink};
    pub use crate::import::{import_bytes, import_usdz, read_stage, ImportReport};
    pub use crate::options::{ExportOptions, ImportOptions, LayerFormat};
    pub use crate::sdf::{Path, Prim, PrimType, Stage, Value};
    pub use crate::util::{Error, Result};
}
