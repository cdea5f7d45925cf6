//! Import from packages and bare layers.

use usdz::host::{HostImage, HostMaterial, InMemoryScene, MeshData, NodeData, Principled, ShaderGraph, ShaderNode, Trs, UpAxis};
use usdz::prelude::*;
use usdz::usdz::{pack, Archive};
use usdz::util::Vec3;
use usdz::{usda, usdc};

use tempfile::tempdir;

const TRIANGLE: &str = r#"#usda 1.0
(
    defaultPrim = "World"
    upAxis = "Y"
    metersPerUnit = 0.01
)

def Xform "World"
{
    def Mesh "Tri"
    {
        int[] faceVertexCounts = [3]
        int[] faceVertexIndices = [0, 1, 2]
        point3f[] points = [(0, 0, 0), (1, 0, 0), (0, 1, 0)]
        normal3f[] normals = [(0, 0, 1), (0, 0, 1), (0, 0, 1)] (
            interpolation = "vertex"
        )
        texCoord2f[] primvars:st = [(0, 0), (1, 0), (0, 1)] (
            interpolation = "vertex"
        )
    }

    def Mesh "Broken"
    {
        int[] faceVertexCounts = [3]
        int[] faceVertexIndices = [0, 1, 7]
        point3f[] points = [(0, 0, 0), (1, 0, 0), (0, 1, 0)]
    }
}
"#;

fn png(color: [u8; 4]) -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(4, 4, image::Rgba(color));
    let mut out = std::io::Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

fn textured_scene() -> InMemoryScene {
    let mut scene = InMemoryScene::new("Textured");
    let image = scene.add_image(HostImage { name: "wood".into(), packed: Some(png([120, 80, 40, 255])), srgb: true, ..Default::default() });
    let mut graph = ShaderGraph::principled(Principled::default());
    let tex = graph.add_node(ShaderNode::ImageTexture { image });
    graph.link(tex, 0, "Base Color");
    let material = scene.add_material(HostMaterial { name: "Wood".into(), graph });
    let mesh = scene.add_mesh(MeshData {
        name: "Tri".into(),
        points: vec![Vec3::ZERO, Vec3::X, Vec3::Y],
        face_counts: vec![3],
        face_indices: vec![0, 1, 2],
        ..Default::default()
    });
    scene.add_node("Tri", None, Trs::IDENTITY, NodeData::Mesh { mesh, materials: vec![Some(material)], armature: None });
    scene
}

#[test]
fn test_text_layer_with_invalid_mesh() {
    let mut scene = InMemoryScene::new("Target");
    let report = import_bytes("tri.usda", TRIANGLE.as_bytes(), &mut scene, &ImportOptions::default()).unwrap();

    assert_eq!(report.layer, "tri.usda");
    assert_eq!(scene.up_axis, UpAxis::Y);
    assert_eq!(scene.meters_per_unit, 0.01);
    assert_eq!(scene.meshes.len(), 1);
    let tri = &scene.meshes[0];
    assert_eq!(tri.face_indices, vec![0, 1, 2]);
    assert_eq!(tri.normals.as_ref().map(Vec::len), Some(3));
    assert_eq!(tri.uv_sets.len(), 1);
    assert_eq!(tri.uv_sets[0].values.len(), 3);
    assert!(report.warnings.iter().any(|w| matches!(w, Warning::InvalidMesh { .. } | Warning::SkippedPrim { .. })));
}

#[test]
fn test_import_bare_crate_file() {
    let stage = usda::decode(TRIANGLE).unwrap();
    let dir = tempdir().unwrap();
    let path = dir.path().join("tri.usdc");
    std::fs::write(&path, usdc::encode(&stage).unwrap()).unwrap();

    let mut scene = InMemoryScene::new("Target");
    let report = import_usdz(&path, &mut scene, &ImportOptions::default()).unwrap();
    assert_eq!(scene.meshes.len(), 1);
    assert_eq!(scene.nodes[report.nodes[0].index()].node.name, "Tri");
}

#[test]
fn test_import_bare_text_file_by_content() {
    let dir = tempdir().unwrap();
    // No layer extension: the header decides.
    let path = dir.path().join("tri.txt");
    std::fs::write(&path, TRIANGLE).unwrap();

    let mut scene = InMemoryScene::new("Target");
    import_usdz(&path, &mut scene, &ImportOptions::default()).unwrap();
    assert_eq!(scene.meshes.len(), 1);
}

#[test]
fn test_import_packaged_texture() {
    let mut source = textured_scene();
    let dir = tempdir().unwrap();
    let path = dir.path().join("wood.usdz");
    export_usdz(&mut source, &path, &ExportOptions::default(), &CancelToken::new()).unwrap();

    let mut target = InMemoryScene::new("Target");
    let report = import_usdz(&path, &mut target, &ImportOptions::default()).unwrap();
    assert!(report.warnings.is_empty(), "unexpected warnings: {:?}", report.warnings);
    assert_eq!(report.images, 1);
    assert_eq!(target.images.len(), 1);
    let data = target.images[0].packed.as_ref().expect("packed image bytes");
    assert_eq!(image::load_from_memory(data).unwrap().width(), 4);
    let graph = &target.materials[0].graph;
    assert!(graph.nodes.iter().any(|n| matches!(n, ShaderNode::ImageTexture { .. })));
}

#[test]
fn test_missing_packaged_texture_warns() {
    let mut source = textured_scene();
    let dir = tempdir().unwrap();
    let full = dir.path().join("wood.usdz");
    export_usdz(&mut source, &full, &ExportOptions::default(), &CancelToken::new()).unwrap();

    // Repackage the layer alone so the texture reference dangles.
    let archive = Archive::open(&full).unwrap();
    let layer = archive.default_layer();
    let stripped = dir.path().join("stripped.usdz");
    std::fs::write(&stripped, pack(&layer.name, &layer.data, &[]).unwrap()).unwrap();

    let mut target = InMemoryScene::new("Target");
    let report = import_usdz(&stripped, &mut target, &ImportOptions::default()).unwrap();
    assert!(report.warnings.iter().any(|w| matches!(w, Warning::SkippedAsset { .. })));
    assert!(target.images.is_empty());
    assert_eq!(target.materials.len(), 1);
    assert_eq!(target.meshes.len(), 1);
}

#[test]
fn test_materials_disabled_leaves_meshes_unbound() {
    let mut source = textured_scene();
    let dir = tempdir().unwrap();
    let path = dir.path().join("wood.usdz");
    export_usdz(&mut source, &path, &ExportOptions::default(), &CancelToken::new()).unwrap();

    let mut target = InMemoryScene::new("Target");
    let options = ImportOptions { materials: false, ..Default::default() };
    import_usdz(&path, &mut target, &options).unwrap();
    assert!(target.materials.is_empty());
    assert!(target.images.is_empty());
    let NodeData::Mesh { materials, .. } = &target.nodes[0].node.data else {
        panic!("expected a mesh node");
    };
    assert!(materials.is_empty());
}

#[test]
fn test_read_stage_matches_export() {
    let mut source = textured_scene();
    let exported = export_stage(&mut source, &ExportOptions::default(), &CancelToken::new()).unwrap();
    let dir = tempdir().unwrap();
    let path = dir.path().join("wood.usdz");
    export_usdz(&mut source, &path, &ExportOptions::default(), &CancelToken::new()).unwrap();
    assert_eq!(read_stage(&path).unwrap(), exported.stage);
}
