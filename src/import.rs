//! Import entry points.
//!
//! Packages, text layers and crate layers are accepted; the format is taken
//! from the extension when it is one of ours, otherwise from the leading
//! bytes. Nothing is installed unless the whole file decodes and plans.

use std::fs;
use std::path::Path;

use tracing::{debug, info, info_span};

use crate::builder::ImportPlan;
use crate::diagnostics::{Diagnostics, Warning};
use crate::host::{NodeId, SceneSink};
use crate::options::{ImportOptions, LayerFormat};
use crate::sdf::Stage;
use crate::usdz::format::{LOCAL_HEADER_SIG, USDA_MAGIC, USDC_MAGIC};
use crate::usdz::{self, Archive};
use crate::util::{Error, Result};
use crate::{usda, usdc};

/// Summary of a finished import.
#[derive(Clone, Debug, Default)]
pub struct ImportReport {
    /// Name of the layer the scene was read from.
    pub layer: String,
    pub nodes: Vec<NodeId>,
    pub meshes: usize,
    pub materials: usize,
    pub images: usize,
    pub warnings: Vec<Warning>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Source {
    Package,
    Layer(LayerFormat),
}

fn sniff(name: &str, bytes: &[u8]) -> Option<Source> {
    let ext = name.rsplit_once('.').map(|(_, e)| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("usdz") => return Some(Source::Package),
        Some("usdc") => return Some(Source::Layer(LayerFormat::Crate)),
        Some("usda") => return Some(Source::Layer(LayerFormat::Text)),
        _ => {}
    }
    if bytes.starts_with(&LOCAL_HEADER_SIG.to_le_bytes()) {
        Some(Source::Package)
    } else if bytes.starts_with(USDC_MAGIC) {
        Some(Source::Layer(LayerFormat::Crate))
    } else if bytes.starts_with(USDA_MAGIC) {
        Some(Source::Layer(LayerFormat::Text))
    } else {
        None
    }
}

/// Decode one layer.
pub fn decode_layer(format: LayerFormat, bytes: &[u8]) -> Result<Stage> {
    let _span = info_span!("decode", format = format.extension(), bytes = bytes.len()).entered();
    match format {
        LayerFormat::Crate => usdc::decode(bytes),
        LayerFormat::Text => usda::decode(std::str::from_utf8(bytes)?),
    }
}

/// Decode the default layer of an archive.
pub fn archive_stage(archive: &Archive) -> Result<Stage> {
    let layer = archive.default_layer();
    let format = layer.layer_format().ok_or_else(|| Error::InvalidLayer(layer.name.clone()))?;
    decode_layer(format, &layer.data)
}

/// Archive lookup for asset paths as written in layers.
fn asset_lookup(archive: &Archive) -> impl Fn(&str) -> Option<Vec<u8>> + '_ {
    move |path: &str| {
        let name = path.trim_start_matches("./");
        archive.get(name).map(|e| e.data.clone())
    }
}

fn plan_and_install(
    layer: String,
    stage: &Stage,
    lookup: &dyn Fn(&str) -> Option<Vec<u8>>,
    mut diagnostics: Diagnostics,
    sink: &mut dyn SceneSink,
    options: &ImportOptions,
) -> Result<ImportReport> {
    let mut plan = ImportPlan::from_stage_with_assets(stage, options, lookup)?;
    diagnostics.extend(std::mem::take(&mut plan.warnings));
    let installed = plan.install(sink);
    diagnostics.log_summary("import");
    info!(layer = %layer, nodes = installed.nodes.len(), meshes = installed.meshes, "import finished");
    Ok(ImportReport {
        layer,
        nodes: installed.nodes,
        meshes: installed.meshes,
        materials: installed.materials,
        images: installed.images,
        warnings: diagnostics.into_warnings(),
    })
}

fn import_archive(archive: &Archive, sink: &mut dyn SceneSink, options: &ImportOptions) -> Result<ImportReport> {
    let stage = archive_stage(archive)?;
    let mut diagnostics = Diagnostics::new();
    diagnostics.extend(archive.warnings().iter().cloned());
    let lookup = asset_lookup(archive);
    plan_and_install(archive.default_layer().name.clone(), &stage, &lookup, diagnostics, sink, options)
}

/// Import the package or layer at `path` into `sink`.
pub fn import_usdz(path: impl AsRef<Path>, sink: &mut dyn SceneSink, options: &ImportOptions) -> Result<ImportReport> {
    let path = path.as_ref();
    let _span = info_span!("import", path = %path.display()).entered();
    if !path.is_file() {
        return Err(Error::FileNotFound(path.to_path_buf()));
    }
    let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    if name.to_ascii_lowercase().ends_with(".usdz") {
        let archive = Archive::open(path)?;
        return import_archive(&archive, sink, options);
    }
    let bytes = fs::read(path)?;
    import_bytes(&name, &bytes, sink, options)
}

/// Import a package or layer held in memory; `name` is used for format detection.
pub fn import_bytes(name: &str, bytes: &[u8], sink: &mut dyn SceneSink, options: &ImportOptions) -> Result<ImportReport> {
    match sniff(name, bytes) {
        Some(Source::Package) => {
            let archive = usdz::unpack(bytes)?;
            import_archive(&archive, sink, options)
        }
        Some(Source::Layer(format)) => {
            let stage = decode_layer(format, bytes)?;
            debug!(name, prims = stage.prim_count(), "bare layer import");
            plan_and_install(name.to_string(), &stage, &|_| None, Diagnostics::new(), sink, options)
        }
        None => Err(Error::InvalidLayer(name.to_string())),
    }
}

/// Decode any supported file into a stage without installing it.
pub fn read_stage(path: impl AsRef<Path>) -> Result<Stage> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(Error::FileNotFound(path.to_path_buf()));
    }
    let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let bytes = fs::read(path)?;
    match sniff(&name, &bytes) {
        Some(Source::Package) => archive_stage(&usdz::unpack(&bytes)?),
        Some(Source::Layer(format)) => decode_layer(format, &bytes),
        None => Err(Error::InvalidLayer(name)),
    }
}
