use half::f16;

use super::{decode, encode};
use crate::sdf::{
    Attribute, BaseType, Path, PrimType, Relationship, Specifier, Stage, TimeSamples, Value, ValueType,
};
use crate::util::{DMat4, DVec3, Error, Quat, Vec2, Vec3, Vec4};

fn scalar(base: BaseType) -> ValueType {
    ValueType::scalar(base)
}

fn array(base: BaseType) -> ValueType {
    ValueType::array(base)
}

fn sample_stage() -> Stage {
    let mut stage = Stage::new();
    stage.metadata.default_prim = Some("Root".into());
    stage.metadata.up_axis = "Z".into();
    stage.metadata.meters_per_unit = 0.01;
    stage.metadata.start_time_code = Some(1.0);
    stage.metadata.end_time_code = Some(48.0);
    stage.metadata.time_codes_per_second = Some(24.0);
    stage.metadata.doc = Some("sample layer".into());

    let root = stage.define_root("Root", PrimType::Xform).unwrap();
    root.kind = Some("component".into());

    let mesh = root.define_child("Cube", PrimType::Mesh).unwrap();
    mesh.api_schemas = vec!["MaterialBindingAPI".into()];
    let points: Vec<Vec3> = (0..40).map(|i| Vec3::new(i as f32 * 0.37, -1.25, 3.5e-3 * i as f32)).collect();
    mesh.add_attribute(Attribute::new("points", array(BaseType::Point3f)).with_default(Value::Vec3fArray(points)))
        .unwrap();
    mesh.add_attribute(
        Attribute::new("faceVertexCounts", array(BaseType::Int)).with_default(Value::IntArray(vec![4; 24])),
    )
    .unwrap();
    mesh.add_attribute(
        Attribute::new("faceVertexIndices", array(BaseType::Int))
            .with_default(Value::IntArray((0..96).map(|i| (i * 7) % 40).collect())),
    )
    .unwrap();
    mesh.add_attribute(
        Attribute::new("primvars:st", array(BaseType::TexCoord2f))
            .with_default(Value::Vec2fArray(vec![Vec2::new(0.25, 0.5), Vec2::new(1.0, 0.0)]))
            .interpolation("faceVarying"),
    )
    .unwrap();
    mesh.add_attribute(
        Attribute::new("subdivisionScheme", scalar(BaseType::Token))
            .with_default(Value::Token("none".into()))
            .uniform(),
    )
    .unwrap();
    mesh.add_attribute(Attribute::new("doubleSided", scalar(BaseType::Bool)).with_default(Value::Bool(true)))
        .unwrap();
    mesh.add_relationship(Relationship::new(
        "material:binding",
        vec!["/Root/Materials/Mat".parse().unwrap()],
    ))
    .unwrap();

    let instance = root.define_child("Instance", PrimType::Typeless).unwrap();
    instance.instanceable = true;
    instance.references = vec!["/Root/Cube".parse().unwrap()];

    let hidden = root.define_child("Hidden", PrimType::Scope).unwrap();
    hidden.active = false;
    hidden.specifier = Specifier::Over;

    let materials = root.define_child("Materials", PrimType::Scope).unwrap();
    let mat = materials.define_child("Mat", PrimType::Material).unwrap();
    mat.add_attribute(
        Attribute::new("outputs:surface", scalar(BaseType::Token))
            .connect("/Root/Materials/Mat/Surface.outputs:surface".parse().unwrap()),
    )
    .unwrap();
    let shader = mat.define_child("Surface", PrimType::Shader).unwrap();
    shader
        .add_attribute(
            Attribute::new("info:id", scalar(BaseType::Token))
                .with_default(Value::Token("UsdPreviewSurface".into()))
                .uniform(),
        )
        .unwrap();
    shader
        .add_attribute(
            Attribute::new("inputs:diffuseColor", scalar(BaseType::Color3f))
                .with_default(Value::Vec3f(Vec3::new(0.8, 0.1, 0.05))),
        )
        .unwrap();
    shader
        .add_attribute(Attribute::new("inputs:roughness", scalar(BaseType::Float)).with_default(Value::Float(0.5)))
        .unwrap();
    shader
        .add_attribute(Attribute::new("outputs:surface", scalar(BaseType::Token)))
        .unwrap();

    let spin = TimeSamples::from_samples(
        (1..=48)
            .map(|f| {
                let m = DMat4::from_rotation_y(f as f64 * 0.1) * DMat4::from_translation(DVec3::new(1.0, 2.0, 3.0));
                (f as f64, Value::Matrix4d(m))
            })
            .collect(),
    )
    .unwrap();
    root.add_attribute(Attribute::new("xformOp:transform", scalar(BaseType::Matrix4d)).with_samples(spin))
        .unwrap();
    root.add_attribute(
        Attribute::new("xformOpOrder", array(BaseType::Token))
            .with_default(Value::TokenArray(vec!["xformOp:transform".into()]))
            .uniform(),
    )
    .unwrap();
    stage
}

fn value_stage(values: Vec<(&str, ValueType, Value)>) -> Stage {
    let mut stage = Stage::new();
    let root = stage.define_root("Values", PrimType::Scope).unwrap();
    for (name, ty, value) in values {
        root.add_attribute(Attribute::new(name, ty).with_default(value)).unwrap();
    }
    stage
}

fn roundtrip(stage: &Stage) -> Stage {
    let bytes = encode(stage).unwrap();
    decode(&bytes).unwrap()
}

#[test]
fn test_roundtrip_scene() {
    let stage = sample_stage();
    let back = roundtrip(&stage);
    assert_eq!(back, stage);
    assert_eq!(back.metadata.up_axis, "Z");
    let root = &back.root_prims[0];
    assert_eq!(root.children.len(), 4);
    assert!(root.attribute("xformOp:transform").unwrap().is_animated());
}

#[test]
fn test_deterministic_output() {
    let stage = sample_stage();
    assert_eq!(encode(&stage).unwrap(), encode(&stage).unwrap());
}

#[test]
fn test_header() {
    let bytes = encode(&sample_stage()).unwrap();
    assert_eq!(&bytes[..8], b"PXR-USDC");
    assert_eq!(&bytes[8..11], &[0, 8, 0]);
    let toc = u64::from_le_bytes(bytes[16..24].try_into().unwrap());
    assert_eq!(toc % 8, 0);
    assert!(toc < bytes.len() as u64);
}

#[test]
fn test_scalar_values() {
    let stage = value_stage(vec![
        ("b", scalar(BaseType::Bool), Value::Bool(false)),
        ("i", scalar(BaseType::Int), Value::Int(-7)),
        ("u", scalar(BaseType::UInt), Value::UInt(u32::MAX)),
        ("l", scalar(BaseType::Int64), Value::Int64(1 << 40)),
        ("h", scalar(BaseType::Half), Value::Half(f16::from_f32(0.333))),
        ("f", scalar(BaseType::Float), Value::Float(-2.5e-7)),
        ("d", scalar(BaseType::Double), Value::Double(0.1)),
        ("dInline", scalar(BaseType::Double), Value::Double(24.0)),
        ("t", scalar(BaseType::Token), Value::Token("varying".into())),
        ("s", scalar(BaseType::String), Value::String("hello world".into())),
        ("a", scalar(BaseType::Asset), Value::Asset("0/base.png".into())),
        ("v2", scalar(BaseType::Float2), Value::Vec2f(Vec2::new(3.0, -4.0))),
        ("v3", scalar(BaseType::Vector3f), Value::Vec3f(Vec3::new(0.5, 1.5, 2.5))),
        ("v4", scalar(BaseType::Color4f), Value::Vec4f(Vec4::new(1.0, 0.0, 0.0, 0.25))),
        ("v3d", scalar(BaseType::Double3), Value::Vec3d(DVec3::new(1e10, -3.0, 0.0))),
        ("v3dInline", scalar(BaseType::Double3), Value::Vec3d(DVec3::new(1.0, -3.0, 127.0))),
        ("q", scalar(BaseType::Quatf), Value::Quatf(Quat::from_rotation_z(0.7))),
        ("m", scalar(BaseType::Matrix4d), Value::Matrix4d(DMat4::from_scale(DVec3::new(2.0, 3.0, 4.0)))),
        (
            "mFull",
            scalar(BaseType::Matrix4d),
            Value::Matrix4d(DMat4::from_translation(DVec3::new(0.5, 0.0, -9.0))),
        ),
    ]);
    assert_eq!(roundtrip(&stage), stage);
}

#[test]
fn test_array_values() {
    let noisy: Vec<f32> = (0..300).map(|i| (i as f32 * 0.731).sin()).collect();
    let lut: Vec<f32> = (0..256).map(|i| [0.0, 0.25, 0.5, 0.75][i % 4]).collect();
    let ints_as_floats: Vec<f32> = (0..64).map(|i| (i * 3 - 90) as f32).collect();
    let stage = value_stage(vec![
        ("bools", array(BaseType::Bool), Value::BoolArray(vec![true, false, true])),
        ("ints", array(BaseType::Int), Value::IntArray((0..1000).map(|i| i * i - 500).collect())),
        ("fewInts", array(BaseType::Int), Value::IntArray(vec![1, 2, 3])),
        ("halves", array(BaseType::Half), Value::HalfArray((0..40).map(|i| f16::from_f32(i as f32 / 8.0)).collect())),
        ("floats", array(BaseType::Float), Value::FloatArray(noisy)),
        ("lut", array(BaseType::Float), Value::FloatArray(lut)),
        ("intFloats", array(BaseType::Float), Value::FloatArray(ints_as_floats)),
        ("doubles", array(BaseType::Double), Value::DoubleArray((0..20).map(|i| i as f64 * 1.5).collect())),
        ("tokens", array(BaseType::Token), Value::TokenArray(vec!["a".into(), "b".into(), "a".into()])),
        ("strings", array(BaseType::String), Value::StringArray(vec!["x y".into(), String::new()])),
        ("assets", array(BaseType::Asset), Value::AssetArray(vec!["0/n.png".into()])),
        ("v4s", array(BaseType::Color4f), Value::Vec4fArray(vec![Vec4::ONE, Vec4::ZERO])),
        ("h3", array(BaseType::Half3), Value::Vec3hArray(vec![[f16::ONE, f16::ZERO, f16::from_f32(-2.0)]])),
        ("quats", array(BaseType::Quatf), Value::QuatfArray(vec![Quat::IDENTITY, Quat::from_rotation_x(1.0)])),
        ("mats", array(BaseType::Matrix4d), Value::Matrix4dArray(vec![DMat4::IDENTITY; 3])),
        ("empty", array(BaseType::Point3f), Value::Vec3fArray(Vec::new())),
        ("emptyInts", array(BaseType::Int), Value::IntArray(Vec::new())),
    ]);
    assert_eq!(roundtrip(&stage), stage);
}

#[test]
fn test_negative_zero_floats_survive() {
    let mut values = vec![0.0f32; 32];
    values[5] = -0.0;
    let stage = value_stage(vec![("z", array(BaseType::Float), Value::FloatArray(values))]);
    let back = roundtrip(&stage);
    let attr = back.root_prims[0].attribute("z").unwrap();
    let floats = attr.default.as_ref().unwrap().as_float_array().unwrap();
    assert!(floats[5].is_sign_negative());
    assert!(!floats[4].is_sign_negative());
}

#[test]
fn test_time_sampled_arrays() {
    let samples = TimeSamples::from_samples(
        (0..5)
            .map(|f| {
                let pts: Vec<Vec3> = (0..20).map(|i| Vec3::splat(i as f32 + f as f32 * 0.5)).collect();
                (f as f64 * 0.5, Value::Vec3fArray(pts))
            })
            .collect(),
    )
    .unwrap();
    let mut stage = Stage::new();
    let root = stage.define_root("Anim", PrimType::Mesh).unwrap();
    root.add_attribute(Attribute::new("points", array(BaseType::Point3f)).with_samples(samples.clone()))
        .unwrap();
    let back = roundtrip(&stage);
    let attr = back.root_prims[0].attribute("points").unwrap();
    assert_eq!(attr.time_samples.as_ref().unwrap(), &samples);
    assert!(attr.default.is_none());
}

#[test]
fn test_list_ops() {
    let back = roundtrip(&sample_stage());
    let root = &back.root_prims[0];
    let cube = root.child("Cube").unwrap();
    assert_eq!(cube.api_schemas, vec!["MaterialBindingAPI".to_string()]);
    let binding = cube.relationship("material:binding").unwrap();
    assert_eq!(binding.targets[0].as_str(), "/Root/Materials/Mat");
    let instance = root.child("Instance").unwrap();
    assert!(instance.instanceable);
    assert_eq!(instance.references[0].as_str(), "/Root/Cube");
    let mat = root.child("Materials").unwrap().child("Mat").unwrap();
    let out = mat.attribute("outputs:surface").unwrap();
    assert_eq!(out.connections[0].as_str(), "/Root/Materials/Mat/Surface.outputs:surface");
}

#[test]
fn test_empty_stage() {
    let stage = Stage::new();
    let back = roundtrip(&stage);
    assert!(back.root_prims.is_empty());
    assert_eq!(back.metadata, stage.metadata);
}

fn expect_format_error(result: crate::util::Result<Stage>, section: &str) {
    match result {
        Err(Error::Format { section: s, .. }) => assert_eq!(s, section),
        other => panic!("expected a {section} format error, got {other:?}"),
    }
}

#[test]
fn test_bad_magic() {
    let mut bytes = encode(&sample_stage()).unwrap();
    bytes[0] = b'X';
    expect_format_error(decode(&bytes), "bootstrap");
}

#[test]
fn test_unsupported_version() {
    let mut bytes = encode(&sample_stage()).unwrap();
    bytes[9] = 13;
    expect_format_error(decode(&bytes), "bootstrap");
}

#[test]
fn test_truncated_file() {
    let bytes = encode(&sample_stage()).unwrap();
    let err = decode(&bytes[..bytes.len() - 12]).unwrap_err();
    assert!(err.is_format_error());
    assert!(decode(&bytes[..40]).unwrap_err().is_format_error());
    assert!(decode(&[]).unwrap_err().is_format_error());
}

#[test]
fn test_section_size_mismatch() {
    let mut bytes = encode(&sample_stage()).unwrap();
    let toc = u64::from_le_bytes(bytes[16..24].try_into().unwrap()) as usize;
    // First entry is TOKENS: name[16], start, size.
    let size_at = toc + 8 + 16 + 8;
    let size = u64::from_le_bytes(bytes[size_at..size_at + 8].try_into().unwrap());
    bytes[size_at..size_at + 8].copy_from_slice(&(size - 1).to_le_bytes());
    expect_format_error(decode(&bytes), "TOKENS");
}

#[test]
fn test_toc_offset_out_of_range() {
    let mut bytes = encode(&sample_stage()).unwrap();
    let len = bytes.len() as u64;
    bytes[16..24].copy_from_slice(&(len + 64).to_le_bytes());
    expect_format_error(decode(&bytes), "TOC");
}

#[test]
fn test_dangling_reference_encodes() {
    let mut stage = sample_stage();
    stage.root_prims[0].references = vec![Path::absolute_root().append_child("Elsewhere").unwrap()];
    let back = roundtrip(&stage);
    assert_eq!(back.root_prims[0].references[0].as_str(), "/Elsewhere");
}
