//! Export entry points.
//!
//! ```ignore
//! use usdz::prelude::*;
//!
//! let mut scene = InMemoryScene::load("scene.json")?;
//! let report = export_usdz(&mut scene, "scene.usdz", &ExportOptions::default(), &CancelToken::new())?;
//! println!("{} prims, {} textures", report.prims, report.textures);
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, info_span};

use crate::anim::{AnimationSampler, SampleTarget, SampledAnimation};
use crate::bake::{BakeGeometry, BakeRequest, Baker, BvhNode, Triangle};
use crate::builder::StageBuilder;
use crate::diagnostics::{CancelToken, Diagnostics, Warning};
use crate::host::{HostScene, ImageId, MaterialId, NodeData, ShaderGraph, ShaderNode};
use crate::material::{decode_image, Material, MaterialTranslator, TranslatedMaterial};
use crate::options::{ExportOptions, LayerFormat};
use crate::sdf::{make_identifier, Path as PrimPath, PrimType, Stage, TimeSamples, Value};
use crate::usdz::{self, Asset, AssetStore};
use crate::util::{Error, Result};
use crate::walker::{SceneWalker, Scope, WalkResult};
use crate::{usda, usdc};

/// A built stage and the assets it references, not yet packaged.
#[derive(Debug)]
pub struct ExportedStage {
    pub stage: Stage,
    pub assets: Vec<Asset>,
    pub warnings: Vec<Warning>,
    /// Texture renders performed.
    pub bakes: usize,
}

/// Summary of a finished export.
#[derive(Clone, Debug)]
pub struct ExportReport {
    pub path: PathBuf,
    pub layer_name: String,
    pub prims: usize,
    pub meshes: usize,
    pub materials: usize,
    pub textures: usize,
    pub bakes: usize,
    pub bytes: u64,
    pub warnings: Vec<Warning>,
}

/// Build the stage for `scene` without writing anything.
pub fn export_stage(scene: &mut dyn HostScene, options: &ExportOptions, cancel: &CancelToken) -> Result<ExportedStage> {
    let mut options = options.clone();
    let mut diagnostics = Diagnostics::new();
    diagnostics.extend(options.validate()?);

    let root = PrimPath::absolute_root().append_child(&make_identifier(scene.name()))?;
    let walker = SceneWalker::new(Scope::from_option(options.collection.as_deref()), options.global_scale, root);
    let mut walk = walker.walk(&*scene)?;
    diagnostics.extend(std::mem::take(&mut walk.warnings));
    cancel.check()?;

    let animation = if options.export_animations {
        sample_animation(scene, &walk)?
    } else {
        SampledAnimation::default()
    };

    let mut assets = AssetStore::new();
    let mut bakes = 0;
    let materials = if options.export_materials {
        let (materials, renders) = translate_materials(&*scene, &walk, &options, &mut assets, &mut diagnostics, cancel)?;
        bakes = renders;
        materials
    } else {
        BTreeMap::new()
    };

    let mut builder = StageBuilder::new(&*scene);
    let stage = builder.build(&walk, &materials, &animation, &options)?;
    diagnostics.extend(builder.take_warnings());
    cancel.check()?;

    Ok(ExportedStage { stage, assets: assets.into_assets(), warnings: diagnostics.into_warnings(), bakes })
}

/// Export `scene` to a USDZ package at `path`.
///
/// The package is written next to the destination and renamed into place,
/// so a failed or cancelled export leaves the destination untouched.
pub fn export_usdz(
    scene: &mut dyn HostScene,
    path: impl AsRef<Path>,
    options: &ExportOptions,
    cancel: &CancelToken,
) -> Result<ExportReport> {
    let path = path.as_ref();
    let _span = info_span!("export", path = %path.display()).entered();
    check_destination(path)?;

    let exported = export_stage(scene, options, cancel)?;
    let root = exported.stage.metadata.default_prim.clone().unwrap_or_else(|| make_identifier(scene.name()));
    let layer_name = format!("{root}.{}", options.layer_format.extension());
    let layer = {
        let _span = info_span!("encode", format = options.layer_format.extension()).entered();
        match options.layer_format {
            LayerFormat::Crate => usdc::encode(&exported.stage)?,
            LayerFormat::Text => usda::encode(&exported.stage).into_bytes(),
        }
    };
    let package = usdz::pack(&layer_name, &layer, &exported.assets)?;
    cancel.check()?;
    write_atomic(path, &package)?;

    let prims = exported.stage.traverse();
    let report = ExportReport {
        path: path.to_path_buf(),
        layer_name,
        prims: prims.len(),
        meshes: prims.iter().filter(|p| p.prim_type == PrimType::Mesh).count(),
        materials: prims.iter().filter(|p| p.prim_type == PrimType::Material).count(),
        textures: exported.assets.len(),
        bakes: exported.bakes,
        bytes: package.len() as u64,
        warnings: exported.warnings,
    };
    let mut diagnostics = Diagnostics::new();
    diagnostics.extend(report.warnings.iter().cloned());
    diagnostics.log_summary("export");
    info!(prims = report.prims, textures = report.textures, bytes = report.bytes, "wrote {}", path.display());
    Ok(report)
}

fn check_destination(path: &Path) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    match fs::metadata(dir) {
        Ok(meta) if meta.is_dir() && !meta.permissions().readonly() => Ok(()),
        _ => Err(Error::DestinationNotWritable(path.to_path_buf())),
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let temp = path.with_file_name(format!(".{name}.{}.tmp", std::process::id()));
    let written = fs::write(&temp, data).and_then(|_| fs::rename(&temp, path));
    if let Err(e) = written {
        let _ = fs::remove_file(&temp);
        return Err(Error::Io(e));
    }
    Ok(())
}

/// Sample animated transforms, armature poses and deformed meshes.
fn sample_animation(scene: &mut dyn HostScene, walk: &WalkResult) -> Result<SampledAnimation> {
    let mut targets = Vec::new();
    for node in &walk.nodes {
        if node.is_animated {
            targets.push(SampleTarget::Transform(node.node));
        }
        if node.is_armature {
            targets.push(SampleTarget::Joints(node.node));
        }
        if let Some(instance) = node.mesh_instance.as_ref().filter(|i| i.is_owner()) {
            if scene.is_deformed(instance.mesh) {
                targets.push(SampleTarget::Points(instance.mesh));
            }
        }
    }
    let range = scene.frame_range();
    let mut animation = AnimationSampler::sample_nodes(scene, &targets, range)?;

    // Samples are relative to the host parent; re-base nodes whose host
    // parent was not exported.
    for node in &walk.nodes {
        let host_parent = scene.node(node.node).and_then(|n| n.parent);
        if host_parent == node.parent {
            continue;
        }
        let Some(samples) = animation.transforms.get_mut(&node.node) else {
            continue;
        };
        let correction = node.local_transform * scene.local_transform(node.node).inverse();
        let mut rebased = TimeSamples::new();
        for (time, value) in samples.iter() {
            let value = match value.as_matrix() {
                Some(m) => Value::Matrix4d(correction * *m),
                None => value.clone(),
            };
            rebased.push(time, value)?;
        }
        debug!(node = %node.name, "transform samples rebased to exported parent");
        *samples = rebased;
    }
    debug!(nodes = animation.transforms.len(), "transform samples ready");
    Ok(animation)
}

fn graph_images(graph: &ShaderGraph) -> impl Iterator<Item = ImageId> + '_ {
    graph.nodes.iter().filter_map(|n| match n {
        ShaderNode::ImageTexture { image } => Some(*image),
        _ => None,
    })
}

/// Translate every material bound to an exported mesh and run their bakes.
fn translate_materials(
    scene: &dyn HostScene,
    walk: &WalkResult,
    options: &ExportOptions,
    assets: &mut AssetStore,
    diagnostics: &mut Diagnostics,
    cancel: &CancelToken,
) -> Result<(BTreeMap<MaterialId, Material>, usize)> {
    // Material -> walked node whose mesh represents it in bakes.
    let mut used: BTreeMap<MaterialId, usize> = BTreeMap::new();
    for (index, node) in walk.nodes.iter().enumerate() {
        if node.mesh_instance.is_none() {
            continue;
        }
        if let Some(NodeData::Mesh { materials, .. }) = scene.node(node.node).map(|n| &n.data) {
            for id in materials.iter().flatten() {
                used.entry(*id).or_insert(index);
            }
        }
    }

    let resolution = options.bake_texture_size.max(1) as u32;
    let mut translator = MaterialTranslator::new(scene, resolution, options.bake_ao_samples.max(1) as u32);
    let mut plans: Vec<(TranslatedMaterial, Arc<ShaderGraph>)> = Vec::new();
    let mut geometry: HashMap<usize, Arc<BakeGeometry>> = HashMap::new();
    let mut requests = Vec::new();
    let needs_bakes = options.bake_textures || options.bake_ao;
    let occluders = if options.bake_ao { Arc::new(occluder_bvh(scene, walk)) } else { Arc::new(BvhNode::Empty) };
    let images = if needs_bakes { Arc::new(bake_images(scene, used.keys())) } else { Arc::default() };

    for (&id, &index) in &used {
        let Some(host) = scene.material(id) else {
            debug!(material = id.0, "bound material missing from scene");
            continue;
        };
        let node = &walk.nodes[index];
        let mesh = node.mesh_instance.as_ref().and_then(|i| scene.mesh(i.mesh));
        if let Some(mesh) = &mesh {
            translator.set_uv_names(id, mesh.uv_sets.iter().map(|s| s.name.clone()).collect());
        }
        let plan = translator.translate(id, host, options.bake_textures, options.bake_ao);
        diagnostics.extend(plan.warnings.iter().cloned());
        let graph = Arc::new(host.graph.clone());

        if !plan.bakes.is_empty() {
            let geom = geometry
                .entry(index)
                .or_insert_with(|| {
                    Arc::new(mesh.as_ref().map_or_else(BakeGeometry::default, |m| {
                        BakeGeometry::from_mesh(m, &node.world_transform.as_mat4())
                    }))
                })
                .clone();
            for bake in &plan.bakes {
                requests.push(BakeRequest {
                    key: bake.key,
                    graph: graph.clone(),
                    node: bake.node,
                    socket: bake.socket.clone(),
                    default: bake.default,
                    kind: bake.key.slot.kind(),
                    uv_only: bake.uv_only,
                    geometry: geom.clone(),
                    occluders: occluders.clone(),
                    images: images.clone(),
                });
            }
        }
        plans.push((plan, graph));
    }

    let baker = Baker::new();
    let results = baker.bake_all(&requests, cancel);
    cancel.check()?;

    let mut warnings = Vec::new();
    let materials = plans
        .iter()
        .map(|(plan, _)| (plan.id, translator.resolve(plan, &results, assets, &mut warnings)))
        .collect();
    diagnostics.extend(warnings);
    debug!(requests = requests.len(), renders = baker.renders(), "materials resolved");
    Ok((materials, baker.renders()))
}

/// Decoded images referenced by the given materials' graphs.
fn bake_images<'m>(
    scene: &dyn HostScene,
    materials: impl Iterator<Item = &'m MaterialId>,
) -> HashMap<ImageId, Arc<image::RgbaImage>> {
    let mut seen = HashSet::new();
    let mut out = HashMap::new();
    for id in materials {
        let Some(material) = scene.material(*id) else {
            continue;
        };
        for image in graph_images(&material.graph) {
            if !seen.insert(image) {
                continue;
            }
            match scene.image(image).map(decode_image) {
                Some(Ok(decoded)) => {
                    out.insert(image, decoded);
                }
                Some(Err(e)) => debug!(image = image.0, error = %e, "image unavailable to the baker"),
                None => debug!(image = image.0, "image missing from scene"),
            }
        }
    }
    out
}

/// World-space triangles of every exported mesh, for occlusion rays.
fn occluder_bvh(scene: &dyn HostScene, walk: &WalkResult) -> BvhNode {
    let mut triangles = Vec::new();
    for node in &walk.nodes {
        let Some(mesh) = node.mesh_instance.as_ref().and_then(|i| scene.mesh(i.mesh)) else {
            continue;
        };
        let world = node.world_transform.as_mat4();
        let point = |corner: usize| {
            mesh.face_indices
                .get(corner)
                .and_then(|&i| mesh.points.get(i as usize))
                .map(|p| world.transform_point3(*p))
        };
        for [a, b, c] in mesh.triangles() {
            if let (Some(v0), Some(v1), Some(v2)) = (point(a), point(b), point(c)) {
                triangles.push(Triangle::new(v0, v1, v2));
            }
        }
    }
    BvhNode::new(triangles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{InMemoryScene, MeshData, Trs};
    use crate::util::Vec3;

    fn quad_scene() -> InMemoryScene {
        let mut scene = InMemoryScene::new("Quad Scene");
        let mesh = scene.add_mesh(MeshData {
            name: "Quad".into(),
            points: vec![Vec3::ZERO, Vec3::X, Vec3::new(1.0, 1.0, 0.0), Vec3::Y],
            face_counts: vec![4],
            face_indices: vec![0, 1, 2, 3],
            ..Default::default()
        });
        scene.add_node("Quad", None, Trs::IDENTITY, NodeData::Mesh { mesh, materials: vec![], armature: None });
        scene
    }

    #[test]
    fn test_export_stage_root_named_after_scene() {
        let mut scene = quad_scene();
        let exported = export_stage(&mut scene, &ExportOptions::default(), &CancelToken::new()).unwrap();
        assert_eq!(exported.stage.metadata.default_prim.as_deref(), Some("Quad_Scene"));
        assert!(exported.stage.prim_at(&"/Quad_Scene/Quad/Quad".parse().unwrap()).is_some());
        assert!(exported.assets.is_empty());
    }

    #[test]
    fn test_converter_rejected() {
        let mut scene = quad_scene();
        let options = ExportOptions { use_converter: true, ..Default::default() };
        assert!(matches!(
            export_stage(&mut scene, &options, &CancelToken::new()),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn test_missing_destination_dir() {
        let mut scene = quad_scene();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("out.usdz");
        let result = export_usdz(&mut scene, &path, &ExportOptions::default(), &CancelToken::new());
        assert!(matches!(result, Err(Error::DestinationNotWritable(_))));
    }

    #[test]
    fn test_cancelled_before_walk_output() {
        let mut scene = quad_scene();
        let cancel = CancelToken::new();
        cancel.cancel();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.usdz");
        let result = export_usdz(&mut scene, &path, &ExportOptions::default(), &cancel);
        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(!path.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
