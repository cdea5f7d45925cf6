//! Text layer writer.

use half::f16;

use crate::sdf::{Attribute, Path, Prim, PrimType, Property, Relationship, Stage, Value, Variability};
use crate::util::DMat4;

const INDENT: &str = "    ";

struct Printer {
    out: String,
    depth: usize,
}

impl Printer {
    fn line(&mut self, text: &str) {
        for _ in 0..self.depth {
            self.out.push_str(INDENT);
        }
        self.out.push_str(text);
        self.out.push('\n');
    }
}

pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn float<T: Into<f64> + Copy + std::fmt::Display>(v: T) -> String {
    let wide: f64 = v.into();
    if wide.is_nan() {
        "nan".into()
    } else if wide.is_infinite() {
        if wide > 0.0 { "inf".into() } else { "-inf".into() }
    } else {
        v.to_string()
    }
}

fn half(v: f16) -> String {
    float(f32::from(v))
}

fn tuple(items: impl IntoIterator<Item = String>) -> String {
    format!("({})", items.into_iter().collect::<Vec<_>>().join(", "))
}

fn list(items: impl IntoIterator<Item = String>) -> String {
    format!("[{}]", items.into_iter().collect::<Vec<_>>().join(", "))
}

fn path(p: &Path) -> String {
    format!("<{p}>")
}

fn asset(a: &str) -> String {
    format!("@{a}@")
}

fn matrix(m: &DMat4) -> String {
    // Rows of the text form are glam columns.
    tuple((0..4).map(|c| tuple(m.col(c).to_array().map(float))))
}

/// Text form of a value.
pub fn format_value(value: &Value) -> String {
    match value {
        Value::Bool(b) => b.to_string(),
        Value::Int(v) => v.to_string(),
        Value::UInt(v) => v.to_string(),
        Value::Int64(v) => v.to_string(),
        Value::Half(v) => half(*v),
        Value::Float(v) => float(*v),
        Value::Double(v) => float(*v),
        Value::Token(s) | Value::String(s) => quote(s),
        Value::Asset(a) => asset(a),
        Value::Vec2f(v) => tuple(v.to_array().map(float)),
        Value::Vec3f(v) => tuple(v.to_array().map(float)),
        Value::Vec4f(v) => tuple(v.to_array().map(float)),
        Value::Vec3d(v) => tuple(v.to_array().map(float)),
        Value::Quatf(q) => tuple([q.w, q.x, q.y, q.z].map(float)),
        Value::Matrix4d(m) => matrix(m),
        Value::BoolArray(v) => list(v.iter().map(|b| b.to_string())),
        Value::IntArray(v) => list(v.iter().map(|i| i.to_string())),
        Value::HalfArray(v) => list(v.iter().map(|h| half(*h))),
        Value::FloatArray(v) => list(v.iter().map(|f| float(*f))),
        Value::DoubleArray(v) => list(v.iter().map(|f| float(*f))),
        Value::TokenArray(v) | Value::StringArray(v) => list(v.iter().map(|s| quote(s))),
        Value::AssetArray(v) => list(v.iter().map(|a| asset(a))),
        Value::Vec2fArray(v) => list(v.iter().map(|p| tuple(p.to_array().map(float)))),
        Value::Vec3fArray(v) => list(v.iter().map(|p| tuple(p.to_array().map(float)))),
        Value::Vec4fArray(v) => list(v.iter().map(|p| tuple(p.to_array().map(float)))),
        Value::Vec3hArray(v) => list(v.iter().map(|p| tuple(p.map(half)))),
        Value::QuatfArray(v) => list(v.iter().map(|q| tuple([q.w, q.x, q.y, q.z].map(float)))),
        Value::Matrix4dArray(v) => list(v.iter().map(matrix)),
    }
}

fn layer_metadata(stage: &Stage) -> Vec<String> {
    let m = &stage.metadata;
    let mut lines = Vec::new();
    if let Some(doc) = &m.doc {
        lines.push(format!("doc = {}", quote(doc)));
    }
    if let Some(prim) = &m.default_prim {
        lines.push(format!("defaultPrim = {}", quote(prim)));
    }
    let times = [
        ("startTimeCode", m.start_time_code),
        ("endTimeCode", m.end_time_code),
        ("timeCodesPerSecond", m.time_codes_per_second),
        ("framesPerSecond", m.frames_per_second),
    ];
    for (name, value) in times {
        if let Some(v) = value {
            lines.push(format!("{name} = {}", float(v)));
        }
    }
    lines.push(format!("metersPerUnit = {}", float(m.meters_per_unit)));
    lines.push(format!("upAxis = {}", quote(&m.up_axis)));
    lines
}

fn prim_metadata(prim: &Prim) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(kind) = &prim.kind {
        lines.push(format!("kind = {}", quote(kind)));
    }
    if !prim.api_schemas.is_empty() {
        lines.push(format!("prepend apiSchemas = {}", list(prim.api_schemas.iter().map(|s| quote(s)))));
    }
    if !prim.references.is_empty() {
        lines.push(format!("prepend references = {}", list(prim.references.iter().map(path))));
    }
    if prim.instanceable {
        lines.push("instanceable = true".into());
    }
    if !prim.active {
        lines.push("active = false".into());
    }
    lines
}

fn metadata_block(p: &mut Printer, head: &str, lines: &[String]) {
    if lines.is_empty() {
        p.line(head);
        return;
    }
    p.line(&format!("{head} ("));
    p.depth += 1;
    for line in lines {
        p.line(line);
    }
    p.depth -= 1;
    p.line(")");
}

fn attribute(p: &mut Printer, attr: &Attribute) {
    let mut decl = String::new();
    if attr.custom {
        decl.push_str("custom ");
    }
    if attr.variability == Variability::Uniform {
        decl.push_str("uniform ");
    }
    decl.push_str(&format!("{} {}", attr.type_name, attr.name));

    let mut meta = Vec::new();
    if let Some(interp) = &attr.interpolation {
        meta.push(format!("interpolation = {}", quote(interp)));
    }
    if let Some(size) = attr.element_size {
        meta.push(format!("elementSize = {size}"));
    }

    let mut declared = false;
    if let Some(value) = &attr.default {
        metadata_block(p, &format!("{decl} = {}", format_value(value)), &meta);
        declared = true;
    }
    if let Some(samples) = &attr.time_samples {
        p.line(&format!("{decl}.timeSamples = {{"));
        p.depth += 1;
        for (t, v) in samples.iter() {
            p.line(&format!("{}: {},", float(t), format_value(v)));
        }
        p.depth -= 1;
        if declared || meta.is_empty() {
            p.line("}");
        } else {
            metadata_block(p, "}", &meta);
        }
        declared = true;
    }
    if !attr.connections.is_empty() {
        let targets = match attr.connections.as_slice() {
            [one] => path(one),
            many => list(many.iter().map(path)),
        };
        let head = format!("{decl}.connect = {targets}");
        if declared {
            p.line(&head);
        } else {
            metadata_block(p, &head, &meta);
        }
        declared = true;
    }
    if !declared {
        metadata_block(p, &decl, &meta);
    }
}

fn relationship(p: &mut Printer, rel: &Relationship) {
    let custom = if rel.custom { "custom " } else { "" };
    match rel.targets.as_slice() {
        [] => p.line(&format!("{custom}rel {}", rel.name)),
        [one] => p.line(&format!("{custom}rel {} = {}", rel.name, path(one))),
        many => p.line(&format!("{custom}rel {} = {}", rel.name, list(many.iter().map(path)))),
    }
}

fn write_prim(p: &mut Printer, prim: &Prim) {
    let mut head = prim.specifier.keyword().to_string();
    if prim.prim_type != PrimType::Typeless {
        head.push(' ');
        head.push_str(prim.prim_type.type_name());
    }
    head.push(' ');
    head.push_str(&quote(&prim.name));
    metadata_block(p, &head, &prim_metadata(prim));
    p.line("{");
    p.depth += 1;
    for property in &prim.properties {
        match property {
            Property::Attribute(a) => attribute(p, a),
            Property::Relationship(r) => relationship(p, r),
        }
    }
    for (i, child) in prim.children.iter().enumerate() {
        if i > 0 || !prim.properties.is_empty() {
            p.out.push('\n');
        }
        write_prim(p, child);
    }
    p.depth -= 1;
    p.line("}");
}

/// Render a stage as a `#usda 1.0` layer.
pub fn write(stage: &Stage) -> String {
    let mut p = Printer { out: String::from("#usda 1.0\n"), depth: 0 };
    p.line("(");
    p.depth += 1;
    for line in layer_metadata(stage) {
        p.line(&line);
    }
    p.depth -= 1;
    p.line(")");
    for root in &stage.root_prims {
        p.out.push('\n');
        write_prim(&mut p, root);
    }
    p.out
}
