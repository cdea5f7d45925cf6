//! Text layers (`.usda`).

mod lexer;
mod parser;
mod writer;

pub use writer::format_value;

use crate::sdf::Stage;
use crate::util::Result;

/// Render a stage as text.
pub fn encode(stage: &Stage) -> String {
    writer::write(stage)
}

/// Parse a text layer. Errors carry the line and column of the offending token.
pub fn decode(text: &str) -> Result<Stage> {
    parser::parse(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdf::{Attribute, BaseType, PrimType, Relationship, Specifier, TimeSamples, Value, ValueType};
    use crate::util::{DMat4, DVec3, Error, Quat, Vec2, Vec3};
    use half::f16;

    fn sample_stage() -> Stage {
        let mut stage = Stage::new();
        stage.metadata.default_prim = Some("Root".into());
        stage.metadata.doc = Some("quoted \"doc\"\nsecond line".into());
        stage.metadata.start_time_code = Some(0.0);
        stage.metadata.end_time_code = Some(10.0);
        stage.metadata.time_codes_per_second = Some(30.0);
        stage.metadata.meters_per_unit = 0.01;

        let root = stage.define_root("Root", PrimType::Xform).unwrap();
        root.kind = Some("component".into());
        let samples = TimeSamples::from_samples(
            (0..=10)
                .map(|f| (f as f64, Value::Matrix4d(DMat4::from_translation(DVec3::new(f as f64 * 0.1, 0.0, -1.0)))))
                .collect(),
        )
        .unwrap();
        root.add_attribute(
            Attribute::new("xformOp:transform", ValueType::scalar(BaseType::Matrix4d)).with_samples(samples),
        )
        .unwrap();
        root.add_attribute(
            Attribute::new("xformOpOrder", ValueType::array(BaseType::Token))
                .with_default(Value::TokenArray(vec!["xformOp:transform".into()]))
                .uniform(),
        )
        .unwrap();

        let mesh = root.define_child("Body", PrimType::Mesh).unwrap();
        mesh.api_schemas = vec!["MaterialBindingAPI".into(), "SkelBindingAPI".into()];
        mesh.add_attribute(
            Attribute::new("points", ValueType::array(BaseType::Point3f))
                .with_default(Value::Vec3fArray(vec![Vec3::new(0.1, -2.5e-8, 1e7), Vec3::ZERO])),
        )
        .unwrap();
        mesh.add_attribute(
            Attribute::new("primvars:st", ValueType::array(BaseType::TexCoord2f))
                .with_default(Value::Vec2fArray(vec![Vec2::new(0.3, 0.7)]))
                .interpolation("faceVarying"),
        )
        .unwrap();
        mesh.add_attribute(
            Attribute::new("primvars:skel:jointWeights", ValueType::array(BaseType::Float))
                .with_default(Value::FloatArray(vec![0.25, 0.75]))
                .interpolation("vertex")
                .element_size(2),
        )
        .unwrap();
        mesh.add_attribute(
            Attribute::new("primvars:normals", ValueType::array(BaseType::Normal3f)).interpolation("faceVarying"),
        )
        .unwrap();
        mesh.add_attribute(
            Attribute::new("restRotations", ValueType::array(BaseType::Quatf))
                .with_default(Value::QuatfArray(vec![Quat::from_rotation_y(0.5)])),
        )
        .unwrap();
        mesh.add_attribute(
            Attribute::new("scales", ValueType::array(BaseType::Half3))
                .with_default(Value::Vec3hArray(vec![[f16::ONE, f16::from_f32(0.5), f16::from_f32(-3.0)]])),
        )
        .unwrap();
        let mut label = Attribute::new("userLabel", ValueType::scalar(BaseType::String))
            .with_default(Value::String("a\\b\tc".into()));
        label.custom = true;
        mesh.add_attribute(label).unwrap();
        mesh.add_relationship(Relationship::new("material:binding", vec!["/Root/Looks/Mat".parse().unwrap()]))
            .unwrap();

        let instance = root.define_child("Copy", PrimType::Typeless).unwrap();
        instance.instanceable = true;
        instance.references = vec!["/Root/Body".parse().unwrap()];
        let off = root.define_child("Off", PrimType::Scope).unwrap();
        off.active = false;
        off.specifier = Specifier::Over;

        let looks = root.define_child("Looks", PrimType::Scope).unwrap();
        let mat = looks.define_child("Mat", PrimType::Material).unwrap();
        mat.add_attribute(
            Attribute::new("outputs:surface", ValueType::scalar(BaseType::Token))
                .connect("/Root/Looks/Mat/PreviewSurface.outputs:surface".parse().unwrap()),
        )
        .unwrap();
        let shader = mat.define_child("PreviewSurface", PrimType::Shader).unwrap();
        shader
            .add_attribute(
                Attribute::new("info:id", ValueType::scalar(BaseType::Token))
                    .with_default(Value::Token("UsdPreviewSurface".into()))
                    .uniform(),
            )
            .unwrap();
        shader
            .add_attribute(
                Attribute::new("inputs:opacity", ValueType::scalar(BaseType::Float))
                    .with_default(Value::Float(1.0))
                    .connect("/Root/Looks/Mat/Tex.outputs:a".parse().unwrap()),
            )
            .unwrap();
        shader
            .add_attribute(
                Attribute::new("inputs:file", ValueType::scalar(BaseType::Asset))
                    .with_default(Value::Asset("0/base.png".into())),
            )
            .unwrap();
        stage
    }

    #[test]
    fn test_roundtrip() {
        let stage = sample_stage();
        let text = encode(&stage);
        assert!(text.starts_with("#usda 1.0\n"));
        assert_eq!(decode(&text).unwrap(), stage);
    }

    #[test]
    fn test_text_shape() {
        let text = encode(&sample_stage());
        assert!(text.contains("def Xform \"Root\" (\n    kind = \"component\"\n)"));
        assert!(text.contains("uniform token[] xformOpOrder = [\"xformOp:transform\"]"));
        assert!(text.contains("prepend references = [</Root/Body>]"));
        assert!(text.contains("rel material:binding = </Root/Looks/Mat>"));
        assert!(text.contains("over Scope \"Off\" (\n"));
        assert!(text.contains("custom string userLabel = \"a\\\\b\\tc\""));
    }

    #[test]
    fn test_handwritten_layer() {
        let text = r#"#usda 1.0
(
    "layer comment"
    upAxis = "Z"
    customLayerData = {
        string creator = "someone"
    }
)

def Xform "World"
{
    double3 xformOp:translate = (1, 2, 3)
    float radius = 2
    float radius.timeSamples = {
        0: 1.5,
        5: None,
        10: 3,
    }
    int[] counts = [3, 3, ]

    def "Inst" (
        instanceable = true
        references = </World/Proto>
    )
    {
    }

    def Sphere "Ball"
    {
        double radius = 1
    }
}
"#;
        let stage = decode(text).unwrap();
        assert_eq!(stage.metadata.doc.as_deref(), Some("layer comment"));
        assert_eq!(stage.metadata.up_axis, "Z");
        let world = &stage.root_prims[0];
        let radius = world.attribute("radius").unwrap();
        assert_eq!(radius.default, Some(Value::Float(2.0)));
        assert_eq!(radius.time_samples.as_ref().unwrap().times(), vec![0.0, 10.0]);
        assert_eq!(
            world.attribute("xformOp:translate").unwrap().default,
            Some(Value::Vec3d(DVec3::new(1.0, 2.0, 3.0)))
        );
        assert_eq!(world.attribute("counts").unwrap().default, Some(Value::IntArray(vec![3, 3])));
        assert!(world.child("Inst").unwrap().instanceable);
        assert_eq!(world.child("Ball").unwrap().prim_type, PrimType::Typeless);
    }

    fn error_position(text: &str) -> (usize, usize) {
        match decode(text).unwrap_err() {
            Error::Parse { line, column, .. } => (line, column),
            other => panic!("expected a parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_error_positions() {
        assert_eq!(error_position("hello"), (1, 1));
        assert_eq!(error_position("#usda 1.0\ndef Xform \"A\"\n{\n    float x = \"no\"\n}\n"), (4, 15));
        assert_eq!(error_position("#usda 1.0\ndef Xform \"A\"\n{\n    float3 p = (1, 2)\n}\n"), (4, 16));
        assert_eq!(error_position("#usda 1.0\ndef Xform \"A\"\n{\n    float x = 1 2\n}\n"), (4, 17));
        assert_eq!(error_position("#usda 1.0\ndef \"A\" {\n    def \"A\" {}\n    def \"A\" {}\n}\n"), (4, 5));
    }

    #[test]
    fn test_unterminated_prim() {
        assert!(matches!(decode("#usda 1.0\ndef \"A\" {\n"), Err(Error::Parse { .. })));
    }

    #[test]
    fn test_external_reference_rejected() {
        let text = "#usda 1.0\ndef \"A\" (\n    references = @other.usda@</B>\n)\n{\n}\n";
        assert!(matches!(decode(text), Err(Error::Parse { line: 3, .. })));
    }
}
