//! End-to-end export scenarios against the in-memory host.

use usdz::host::{
    FrameRange, HostMaterial, InMemoryScene, MeshData, NodeData, Principled, ShaderGraph, ShaderNode,
    TransformKey, Trs, UvSet,
};
use usdz::prelude::*;
use usdz::usdz::{pack, Archive, PackageWriter};
use usdz::util::{Vec2, Vec3, Vec4};

use tempfile::tempdir;

fn cube() -> MeshData {
    let points = vec![
        Vec3::new(-0.5, -0.5, -0.5),
        Vec3::new(0.5, -0.5, -0.5),
        Vec3::new(0.5, 0.5, -0.5),
        Vec3::new(-0.5, 0.5, -0.5),
        Vec3::new(-0.5, -0.5, 0.5),
        Vec3::new(0.5, -0.5, 0.5),
        Vec3::new(0.5, 0.5, 0.5),
        Vec3::new(-0.5, 0.5, 0.5),
    ];
    let face_indices = vec![
        0, 3, 2, 1, 4, 5, 6, 7, 0, 1, 5, 4, 1, 2, 6, 5, 2, 3, 7, 6, 3, 0, 4, 7,
    ];
    let corner_uvs = [Vec2::ZERO, Vec2::X, Vec2::ONE, Vec2::Y];
    let uvs = (0..face_indices.len()).map(|i| corner_uvs[i % 4]).collect();
    MeshData {
        name: "Cube".into(),
        points,
        face_counts: vec![4; 6],
        face_indices,
        uv_sets: vec![UvSet { name: "UVMap".into(), values: uvs }],
        ..Default::default()
    }
}

fn key(frame: f64, x: f32) -> TransformKey {
    TransformKey { frame, value: Trs { translation: Vec3::new(x, 0.0, 0.0), ..Trs::IDENTITY } }
}

fn animated_cube_scene() -> InMemoryScene {
    let mut scene = InMemoryScene::new("Scene");
    scene.frame_range = FrameRange::new(1.0, 3.0, 1.0);
    let mesh = scene.add_mesh(cube());
    let node = scene.add_node("Cube", None, Trs::IDENTITY, NodeData::Mesh { mesh, materials: vec![], armature: None });
    scene.scene_node_mut(node).unwrap().keys = vec![key(1.0, 0.0), key(3.0, 2.0)];
    scene
}

fn transform_of(stage: &Stage, path: &str) -> usdz::sdf::Attribute {
    stage
        .prim_at(&path.parse().unwrap())
        .and_then(|p| p.attribute("xformOp:transform"))
        .cloned()
        .unwrap_or_else(|| panic!("no transform on {path}"))
}

#[test]
fn test_animation_disabled_exports_constant_transform() {
    let mut scene = animated_cube_scene();
    let options = ExportOptions { export_animations: false, ..Default::default() };
    let exported = export_stage(&mut scene, &options, &CancelToken::new()).unwrap();

    let attr = transform_of(&exported.stage, "/Scene/Cube");
    assert!(attr.time_samples.is_none());
    assert!(attr.default.is_some());
    assert!(exported.stage.metadata.start_time_code.is_none());
}

#[test]
fn test_animation_enabled_samples_every_frame() {
    let mut scene = animated_cube_scene();
    let options = ExportOptions { export_animations: true, ..Default::default() };
    let exported = export_stage(&mut scene, &options, &CancelToken::new()).unwrap();

    let attr = transform_of(&exported.stage, "/Scene/Cube");
    let samples = attr.time_samples.expect("animated transform");
    assert_eq!(samples.times(), vec![1.0, 2.0, 3.0]);
    let mid = samples.value_at(2.0).and_then(Value::as_matrix).unwrap();
    assert!((mid.w_axis.x - 1.0).abs() < 1e-5);
    assert_eq!(exported.stage.metadata.start_time_code, Some(1.0));
    assert_eq!(exported.stage.metadata.end_time_code, Some(3.0));
}

#[test]
fn test_checker_bake_writes_sized_texture() {
    let mut scene = InMemoryScene::new("Scene");
    let mesh = scene.add_mesh(cube());
    let mut graph = ShaderGraph::principled(Principled::default());
    let checker = graph.add_node(ShaderNode::Checker {
        color1: Vec4::new(1.0, 1.0, 1.0, 1.0),
        color2: Vec4::new(0.0, 0.0, 0.0, 1.0),
        scale: 4.0,
    });
    graph.link(checker, 0, "Base Color");
    let material = scene.add_material(HostMaterial { name: "Checker".into(), graph });
    scene.add_node("Cube", None, Trs::IDENTITY, NodeData::Mesh { mesh, materials: vec![Some(material)], armature: None });

    let dir = tempdir().unwrap();
    let path = dir.path().join("checker.usdz");
    let options = ExportOptions { bake_textures: true, bake_texture_size: 512, ..Default::default() };
    let report = export_usdz(&mut scene, &path, &options, &CancelToken::new()).unwrap();
    assert_eq!(report.bakes, 1);
    assert_eq!(report.textures, 1);

    let archive = Archive::open(&path).unwrap();
    let texture = archive.entries().iter().find(|e| e.name.starts_with("textures/")).unwrap();
    let image = image::load_from_memory(&texture.data).unwrap();
    assert_eq!((image.width(), image.height()), (512, 512));

    let stage = read_stage(&path).unwrap();
    let tex = stage.prim_at(&"/Scene/Materials/Checker/diffuseTexture".parse().unwrap()).unwrap();
    assert_eq!(tex.attribute("inputs:file").unwrap().default, Some(Value::Asset(texture.name.clone())));
}

#[test]
fn test_global_scale_on_root_transform() {
    let mut scene = InMemoryScene::new("Scene");
    let mesh = scene.add_mesh(cube());
    scene.add_node("Cube", None, Trs::IDENTITY, NodeData::Mesh { mesh, materials: vec![], armature: None });
    let options = ExportOptions { global_scale: 2.0, ..Default::default() };
    let exported = export_stage(&mut scene, &options, &CancelToken::new()).unwrap();

    let attr = transform_of(&exported.stage, "/Scene/Cube");
    let m = attr.default.as_ref().and_then(Value::as_matrix).unwrap();
    assert_eq!(m.x_axis.x, 2.0);
    assert_eq!(m.y_axis.y, 2.0);
    assert_eq!(m.z_axis.z, 2.0);
}

#[test]
fn test_first_entry_not_a_layer_installs_nothing() {
    let mut writer = PackageWriter::new();
    writer.add("textures/a.png", &[0x89, b'P', b'N', b'G']).unwrap();
    writer.add("scene.usda", b"#usda 1.0\n").unwrap();
    let bytes = writer.finish().unwrap();

    let dir = tempdir().unwrap();
    let path = dir.path().join("bad.usdz");
    std::fs::write(&path, bytes).unwrap();

    let mut target = InMemoryScene::new("Target");
    let result = import_usdz(&path, &mut target, &ImportOptions::default());
    assert!(matches!(result, Err(Error::InvalidLayer(_))));
    assert!(target.nodes.is_empty());
    assert!(target.meshes.is_empty());
}

#[test]
fn test_shared_mesh_exports_one_mesh_prim() {
    let mut scene = InMemoryScene::new("Scene");
    let mesh = scene.add_mesh(cube());
    let data = NodeData::Mesh { mesh, materials: vec![], armature: None };
    scene.add_node("A", None, Trs::IDENTITY, data.clone());
    scene.add_node("B", None, Trs { translation: Vec3::X * 3.0, ..Trs::IDENTITY }, data);
    let exported = export_stage(&mut scene, &ExportOptions::default(), &CancelToken::new()).unwrap();

    let prims = exported.stage.traverse();
    assert_eq!(prims.iter().filter(|p| p.prim_type == PrimType::Mesh).count(), 1);
    let instance = exported.stage.prim_at(&"/Scene/B/Cube".parse().unwrap()).unwrap();
    assert!(instance.instanceable);
    assert_eq!(instance.references[0].as_str(), "/Scene/A/Cube");
    assert_eq!(exported.stage.prim_at(&"/Scene/A".parse().unwrap()).unwrap().prim_type, PrimType::Xform);
    assert_eq!(exported.stage.prim_at(&"/Scene/B".parse().unwrap()).unwrap().prim_type, PrimType::Xform);
}

#[test]
fn test_cancel_before_write_leaves_destination() {
    let mut scene = animated_cube_scene();
    let dir = tempdir().unwrap();
    let path = dir.path().join("out.usdz");
    std::fs::write(&path, b"previous").unwrap();

    let cancel = CancelToken::new();
    cancel.cancel();
    let result = export_usdz(&mut scene, &path, &ExportOptions::default(), &cancel);
    assert!(matches!(result, Err(Error::Cancelled)));
    assert_eq!(std::fs::read(&path).unwrap(), b"previous");
}

#[test]
fn test_empty_collection_warns() {
    let mut scene = animated_cube_scene();
    let options = ExportOptions { collection: Some("Props".into()), ..Default::default() };
    let exported = export_stage(&mut scene, &options, &CancelToken::new()).unwrap();
    assert!(exported.warnings.iter().any(|w| matches!(w, Warning::MissingCollection(_))));
    assert_eq!(exported.stage.default_prim().unwrap().children.len(), 0);
}

#[test]
fn test_text_layer_package() {
    let mut scene = animated_cube_scene();
    let dir = tempdir().unwrap();
    let path = dir.path().join("text.usdz");
    let options = ExportOptions { layer_format: LayerFormat::Text, ..Default::default() };
    let report = export_usdz(&mut scene, &path, &options, &CancelToken::new()).unwrap();
    assert_eq!(report.layer_name, "Scene.usda");

    let archive = Archive::open(&path).unwrap();
    assert_eq!(archive.default_layer().name, "Scene.usda");
    assert!(archive.default_layer().data.starts_with(b"#usda 1.0"));
    // Packing the same layer again yields the same bytes.
    let again = pack("Scene.usda", &archive.default_layer().data, &[]).unwrap();
    assert_eq!(again, std::fs::read(&path).unwrap());
}
