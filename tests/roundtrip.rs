//! Codec and scene round trips.

use usdz::host::{
    Armature, Bone, BoneTrack, FrameRange, HostMaterial, InMemoryScene, MeshData, NodeData, Principled,
    ShaderGraph, SkinWeights, TransformKey, Trs, UvSet,
};
use usdz::prelude::*;
use usdz::util::{Quat, Vec2, Vec3, Vec4};
use usdz::{usda, usdc};

use tempfile::tempdir;

fn quad(name: &str) -> MeshData {
    MeshData {
        name: name.into(),
        points: vec![Vec3::ZERO, Vec3::X, Vec3::new(1.0, 1.0, 0.0), Vec3::Y],
        face_counts: vec![4],
        face_indices: vec![0, 1, 2, 3],
        normals: Some(vec![Vec3::Z; 4]),
        uv_sets: vec![UvSet { name: "UVMap".into(), values: vec![Vec2::ZERO, Vec2::X, Vec2::ONE, Vec2::Y] }],
        ..Default::default()
    }
}

fn rich_scene() -> InMemoryScene {
    let mut scene = InMemoryScene::new("Rich");
    scene.frame_range = FrameRange::new(1.0, 4.0, 1.0);
    scene.fps = 30.0;

    let red = scene.add_material(HostMaterial {
        name: "Red".into(),
        graph: ShaderGraph::principled(Principled {
            base_color: Vec4::new(1.0, 0.0, 0.0, 1.0),
            roughness: 0.25,
            ..Default::default()
        }),
    });
    let plate = scene.add_mesh(quad("Plate"));
    let group = scene.add_node("Group", None, Trs::IDENTITY, NodeData::Empty);
    let a = scene.add_node(
        "Plate A",
        Some(group),
        Trs { translation: Vec3::new(0.0, 1.0, 0.0), ..Trs::IDENTITY },
        NodeData::Mesh { mesh: plate, materials: vec![Some(red)], armature: None },
    );
    scene.add_node(
        "Plate B",
        Some(group),
        Trs { rotation: Quat::from_rotation_z(0.5), ..Trs::IDENTITY },
        NodeData::Mesh { mesh: plate, materials: vec![Some(red)], armature: None },
    );
    scene.scene_node_mut(a).unwrap().keys = vec![
        TransformKey { frame: 1.0, value: Trs::IDENTITY },
        TransformKey { frame: 4.0, value: Trs { translation: Vec3::new(3.0, 0.0, 0.0), ..Trs::IDENTITY } },
    ];

    let armature = Armature {
        bones: vec![
            Bone { name: "Root".into(), parent: None, rest: Trs::IDENTITY },
            Bone { name: "Tip".into(), parent: Some(0), rest: Trs { translation: Vec3::Y, ..Trs::IDENTITY } },
        ],
    };
    let rig = scene.add_node("Rig", None, Trs::IDENTITY, NodeData::Armature(armature));
    scene.scene_node_mut(rig).unwrap().bone_tracks = vec![BoneTrack {
        bone: 1,
        keys: vec![
            TransformKey { frame: 1.0, value: Trs { translation: Vec3::Y, ..Trs::IDENTITY } },
            TransformKey { frame: 4.0, value: Trs { translation: Vec3::Y * 2.0, ..Trs::IDENTITY } },
        ],
    }];
    let mut skinned = quad("Skin");
    skinned.skin = Some(SkinWeights {
        influences: vec![vec![(0, 1.0)], vec![(0, 1.0)], vec![(0, 0.5), (1, 0.5)], vec![(1, 1.0)]],
    });
    let skin = scene.add_mesh(skinned);
    scene.add_node("Body", Some(rig), Trs::IDENTITY, NodeData::Mesh { mesh: skin, materials: vec![], armature: Some(rig) });
    scene
}

fn exported(options: &ExportOptions) -> Stage {
    let mut scene = rich_scene();
    let out = export_stage(&mut scene, options, &CancelToken::new()).unwrap();
    assert!(out.warnings.is_empty(), "unexpected warnings: {:?}", out.warnings);
    out.stage
}

#[test]
fn test_crate_roundtrip_exported_stage() {
    let stage = exported(&ExportOptions { export_animations: true, ..Default::default() });
    let bytes = usdc::encode(&stage).unwrap();
    assert!(bytes.starts_with(b"PXR-USDC"));
    assert_eq!(usdc::decode(&bytes).unwrap(), stage);
}

#[test]
fn test_text_roundtrip_exported_stage() {
    let stage = exported(&ExportOptions { export_animations: true, ..Default::default() });
    let text = usda::encode(&stage);
    assert!(text.starts_with("#usda 1.0"));
    assert_eq!(usda::decode(&text).unwrap(), stage);
}

#[test]
fn test_crate_encoding_is_deterministic() {
    let stage = exported(&ExportOptions::default());
    assert_eq!(usdc::encode(&stage).unwrap(), usdc::encode(&stage).unwrap());
}

#[test]
fn test_text_and_crate_agree() {
    let stage = exported(&ExportOptions { export_animations: true, ..Default::default() });
    let via_text = usda::decode(&usda::encode(&stage)).unwrap();
    let via_crate = usdc::decode(&usdc::encode(&via_text).unwrap()).unwrap();
    assert_eq!(via_crate, stage);
}

#[test]
fn test_scene_roundtrip_through_package() {
    let mut source = rich_scene();
    let dir = tempdir().unwrap();
    let path = dir.path().join("rich.usdz");
    let options = ExportOptions { export_animations: true, ..Default::default() };
    export_usdz(&mut source, &path, &options, &CancelToken::new()).unwrap();

    let mut target = InMemoryScene::new("Imported");
    let report = import_usdz(&path, &mut target, &ImportOptions::default()).unwrap();
    assert!(report.warnings.is_empty(), "unexpected warnings: {:?}", report.warnings);

    let names: Vec<&str> = target.nodes.iter().map(|n| n.node.name.as_str()).collect();
    assert_eq!(names, vec!["Group", "Plate_A", "Plate_B", "Rig", "Body"]);
    // Both plates share one mesh; the skinned body has its own.
    assert_eq!(target.meshes.len(), 2);
    assert_eq!(target.materials.len(), 1);
    assert_eq!(target.fps, 30.0);
    assert_eq!(target.frame_range.start, 1.0);
    assert_eq!(target.frame_range.end, 4.0);

    let plate_a = &target.nodes[1];
    assert_eq!(plate_a.keys.len(), 4);
    assert!((plate_a.keys[3].value.translation.x - 3.0).abs() < 1e-5);
    assert_eq!(plate_a.node.mesh(), target.nodes[2].node.mesh());

    let rig = &target.nodes[3];
    let armature = rig.node.armature().expect("armature");
    assert_eq!(armature.bones.len(), 2);
    assert_eq!(armature.bones[1].parent, Some(0));
    assert!(rig.bone_tracks.iter().any(|t| t.bone == 1 && t.keys.len() == 4));

    let NodeData::Mesh { mesh, armature, .. } = &target.nodes[4].node.data else {
        panic!("body should carry a mesh");
    };
    assert_eq!(*armature, Some(report.nodes[3]));
    let body = &target.meshes[mesh.0];
    let skin = body.skin.as_ref().expect("skin weights");
    assert_eq!(skin.influences[2], vec![(0, 0.5), (1, 0.5)]);
    assert_eq!(body.normals.as_ref().map(Vec::len), Some(4));
}

#[test]
fn test_import_without_materials_or_animation() {
    let mut source = rich_scene();
    let dir = tempdir().unwrap();
    let path = dir.path().join("rich.usdz");
    let options = ExportOptions { export_animations: true, ..Default::default() };
    export_usdz(&mut source, &path, &options, &CancelToken::new()).unwrap();

    let mut target = InMemoryScene::new("Imported");
    let options = ImportOptions { materials: false, animations: false };
    import_usdz(&path, &mut target, &options).unwrap();
    assert!(target.materials.is_empty());
    assert!(target.nodes.iter().all(|n| n.keys.is_empty() && n.bone_tracks.is_empty()));
}
