//! Crate layer writer.
//!
//! Specs and their fields are gathered in tree order while tokens, strings
//! and paths are interned. Field values are then packed in parallel into
//! relocatable blobs and laid out in spec order, followed by the structural
//! sections and the table of contents.

use std::borrow::Cow;
use std::collections::HashMap;

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use half::f16;
use rayon::prelude::*;
use tracing::{debug, info_span, trace};

use super::compression;
use super::format::{self, field};
use super::integer_coding::write_compressed_ints;
use super::value_rep::{list_op, spec_type, TypeId, ValueRep};
use crate::sdf::{Path, Prim, PrimType, Property, Specifier, Stage, TimeSamples, Value, Variability};
use crate::util::{DMat4, Error, Result};

/// Payload of one field before packing.
enum FieldValue<'a> {
    Value(Cow<'a, Value>),
    Specifier(Specifier),
    Variability(Variability),
    TokenVector(Vec<&'a str>),
    /// Prepended items.
    TokenListOp(&'a [String]),
    /// Explicit items.
    PathListOp(&'a [Path]),
    /// Prepended internal references.
    ReferenceListOp(&'a [Path]),
    TimeSamples(&'a TimeSamples),
}

fn owned(value: Value) -> FieldValue<'static> {
    FieldValue::Value(Cow::Owned(value))
}

struct SpecDraft<'a> {
    path: Path,
    spec_type: u32,
    fields: Vec<(&'static str, FieldValue<'a>)>,
}

fn layer_spec(stage: &Stage) -> SpecDraft<'_> {
    let m = &stage.metadata;
    let mut fields = Vec::new();
    if let Some(name) = &m.default_prim {
        fields.push((field::DEFAULT_PRIM, owned(Value::Token(name.clone()))));
    }
    fields.push((field::UP_AXIS, owned(Value::Token(m.up_axis.clone()))));
    fields.push((field::METERS_PER_UNIT, owned(Value::Double(m.meters_per_unit))));
    let timing = [
        (field::START_TIME_CODE, m.start_time_code),
        (field::END_TIME_CODE, m.end_time_code),
        (field::TIME_CODES_PER_SECOND, m.time_codes_per_second),
        (field::FRAMES_PER_SECOND, m.frames_per_second),
    ];
    for (name, value) in timing {
        if let Some(v) = value {
            fields.push((name, owned(Value::Double(v))));
        }
    }
    if let Some(doc) = &m.doc {
        fields.push((field::DOCUMENTATION, owned(Value::String(doc.clone()))));
    }
    if !stage.root_prims.is_empty() {
        let names = stage.root_prims.iter().map(|p| p.name.as_str()).collect();
        fields.push((field::PRIM_CHILDREN, FieldValue::TokenVector(names)));
    }
    SpecDraft { path: Path::absolute_root(), spec_type: spec_type::PSEUDO_ROOT, fields }
}

fn gather_prim<'a>(prim: &'a Prim, out: &mut Vec<SpecDraft<'a>>) -> Result<()> {
    let mut fields = vec![(field::SPECIFIER, FieldValue::Specifier(prim.specifier))];
    if prim.prim_type != PrimType::Typeless {
        fields.push((field::TYPE_NAME, owned(Value::Token(prim.prim_type.type_name().to_string()))));
    }
    if let Some(kind) = &prim.kind {
        fields.push((field::KIND, owned(Value::Token(kind.clone()))));
    }
    if !prim.api_schemas.is_empty() {
        fields.push((field::API_SCHEMAS, FieldValue::TokenListOp(&prim.api_schemas)));
    }
    if !prim.references.is_empty() {
        fields.push((field::REFERENCES, FieldValue::ReferenceListOp(&prim.references)));
    }
    if prim.instanceable {
        fields.push((field::INSTANCEABLE, owned(Value::Bool(true))));
    }
    if !prim.active {
        fields.push((field::ACTIVE, owned(Value::Bool(false))));
    }
    if !prim.children.is_empty() {
        let names = prim.children.iter().map(|c| c.name.as_str()).collect();
        fields.push((field::PRIM_CHILDREN, FieldValue::TokenVector(names)));
    }
    if !prim.properties.is_empty() {
        let names = prim.properties.iter().map(Property::name).collect();
        fields.push((field::PROPERTIES, FieldValue::TokenVector(names)));
    }
    out.push(SpecDraft { path: prim.path.clone(), spec_type: spec_type::PRIM, fields });

    for property in &prim.properties {
        out.push(property_spec(prim, property)?);
    }
    for child in &prim.children {
        gather_prim(child, out)?;
    }
    Ok(())
}

fn property_spec<'a>(prim: &Prim, property: &'a Property) -> Result<SpecDraft<'a>> {
    let path = prim.property_path(property.name())?;
    let mut fields = Vec::new();
    let kind = match property {
        Property::Attribute(a) => {
            fields.push((field::TYPE_NAME, owned(Value::Token(a.type_name.to_string()))));
            if a.variability == Variability::Uniform {
                fields.push((field::VARIABILITY, FieldValue::Variability(a.variability)));
            }
            if a.custom {
                fields.push((field::CUSTOM, owned(Value::Bool(true))));
            }
            if let Some(v) = &a.default {
                fields.push((field::DEFAULT, FieldValue::Value(Cow::Borrowed(v))));
            }
            if let Some(ts) = &a.time_samples {
                fields.push((field::TIME_SAMPLES, FieldValue::TimeSamples(ts)));
            }
            if !a.connections.is_empty() {
                fields.push((field::CONNECTION_PATHS, FieldValue::PathListOp(&a.connections)));
            }
            if let Some(interp) = &a.interpolation {
                fields.push((field::INTERPOLATION, owned(Value::Token(interp.clone()))));
            }
            if let Some(size) = a.element_size {
                fields.push((field::ELEMENT_SIZE, owned(Value::Int(size))));
            }
            spec_type::ATTRIBUTE
        }
        Property::Relationship(r) => {
            if r.custom {
                fields.push((field::CUSTOM, owned(Value::Bool(true))));
            }
            if !r.targets.is_empty() {
                fields.push((field::TARGET_PATHS, FieldValue::PathListOp(&r.targets)));
            }
            spec_type::RELATIONSHIP
        }
    };
    Ok(SpecDraft { path, spec_type: kind, fields })
}

struct PathNode {
    path: Path,
    children: Vec<usize>,
}

/// Interned tokens, strings and the path tree.
struct Tables {
    tokens: Vec<String>,
    token_index: HashMap<String, u32>,
    strings: Vec<u32>,
    string_index: HashMap<String, u32>,
    nodes: Vec<PathNode>,
    node_index: HashMap<Path, usize>,
    /// Pre-order position of each node; filled by `finish`.
    positions: Vec<u32>,
    order: Vec<usize>,
}

impl Tables {
    fn new() -> Self {
        let mut tables = Self {
            tokens: Vec::new(),
            token_index: HashMap::new(),
            strings: Vec::new(),
            string_index: HashMap::new(),
            nodes: Vec::new(),
            node_index: HashMap::new(),
            positions: Vec::new(),
            order: Vec::new(),
        };
        // Token 0 is the empty token, so element indices are never zero.
        tables.tokens.push(String::new());
        tables.token_index.insert(String::new(), 0);
        tables.intern_path(&Path::absolute_root());
        tables
    }

    fn intern_token(&mut self, s: &str) -> Result<u32> {
        if let Some(&i) = self.token_index.get(s) {
            return Ok(i);
        }
        if s.contains('\0') {
            return Err(Error::invalid(format!("token {s:?} contains a NUL byte")));
        }
        let i = self.tokens.len() as u32;
        self.tokens.push(s.to_string());
        self.token_index.insert(s.to_string(), i);
        Ok(i)
    }

    fn intern_string(&mut self, s: &str) -> Result<u32> {
        if let Some(&i) = self.string_index.get(s) {
            return Ok(i);
        }
        let token = self.intern_token(s)?;
        let i = self.strings.len() as u32;
        self.strings.push(token);
        self.string_index.insert(s.to_string(), i);
        Ok(i)
    }

    fn intern_path(&mut self, path: &Path) -> usize {
        if let Some(&i) = self.node_index.get(path) {
            return i;
        }
        let parent = path.parent().map(|p| self.intern_path(&p));
        let i = self.nodes.len();
        self.nodes.push(PathNode { path: path.clone(), children: Vec::new() });
        self.node_index.insert(path.clone(), i);
        if let Some(p) = parent {
            self.nodes[p].children.push(i);
        }
        i
    }

    fn intern_value(&mut self, value: &Value) -> Result<()> {
        match value {
            Value::Token(s) | Value::Asset(s) => {
                self.intern_token(s)?;
            }
            Value::String(s) => {
                self.intern_string(s)?;
            }
            Value::TokenArray(v) | Value::AssetArray(v) => {
                for s in v {
                    self.intern_token(s)?;
                }
            }
            Value::StringArray(v) => {
                for s in v {
                    self.intern_string(s)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn intern_field(&mut self, value: &FieldValue<'_>) -> Result<()> {
        match value {
            FieldValue::Value(v) => self.intern_value(v)?,
            FieldValue::TokenVector(names) => {
                for s in names {
                    self.intern_token(s)?;
                }
            }
            FieldValue::TokenListOp(items) => {
                for s in items.iter() {
                    self.intern_token(s)?;
                }
            }
            FieldValue::PathListOp(paths) => {
                for p in paths.iter() {
                    self.intern_path(p);
                }
            }
            FieldValue::ReferenceListOp(paths) => {
                self.intern_string("")?;
                for p in paths.iter() {
                    self.intern_path(p);
                }
            }
            FieldValue::TimeSamples(ts) => {
                for v in ts.values() {
                    self.intern_value(v)?;
                }
            }
            FieldValue::Specifier(_) | FieldValue::Variability(_) => {}
        }
        Ok(())
    }

    /// Fix the path order and intern path element names.
    fn finish(&mut self) -> Result<()> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![0usize];
        while let Some(n) = stack.pop() {
            order.push(n);
            stack.extend(self.nodes[n].children.iter().rev());
        }
        let mut positions = vec![0u32; self.nodes.len()];
        for (pos, &n) in order.iter().enumerate() {
            positions[n] = pos as u32;
        }
        for n in 1..self.nodes.len() {
            let name = self.nodes[n].path.name().to_string();
            self.intern_token(&name)?;
        }
        self.order = order;
        self.positions = positions;
        Ok(())
    }

    fn token(&self, s: &str) -> Result<u32> {
        self.token_index
            .get(s)
            .copied()
            .ok_or_else(|| Error::invalid(format!("token {s:?} was not interned")))
    }

    fn string(&self, s: &str) -> Result<u32> {
        self.string_index
            .get(s)
            .copied()
            .ok_or_else(|| Error::invalid(format!("string {s:?} was not interned")))
    }

    fn path(&self, p: &Path) -> Result<u32> {
        self.node_index
            .get(p)
            .map(|&n| self.positions[n])
            .ok_or_else(|| Error::invalid(format!("path {p} was not interned")))
    }

    /// Path indices, element tokens and jumps in pre-order.
    fn encoded_paths(&self) -> Result<(Vec<u32>, Vec<i32>, Vec<i32>)> {
        let n = self.nodes.len();
        let mut subtree = vec![1usize; n];
        for &node in self.order.iter().rev() {
            let below: usize = self.nodes[node].children.iter().map(|&c| subtree[c]).sum();
            subtree[node] += below;
        }
        let mut has_sibling = vec![false; n];
        for node in &self.nodes {
            if let Some((_, rest)) = node.children.split_last() {
                for &c in rest {
                    has_sibling[c] = true;
                }
            }
        }

        let mut indices = Vec::with_capacity(n);
        let mut elements = Vec::with_capacity(n);
        let mut jumps = Vec::with_capacity(n);
        for &node in &self.order {
            let path = &self.nodes[node].path;
            indices.push(self.positions[node]);
            let element = if path.is_root() {
                0
            } else {
                let token = self.token(path.name())? as i32;
                if path.is_property_path() {
                    -token
                } else {
                    token
                }
            };
            elements.push(element);
            let has_child = !self.nodes[node].children.is_empty();
            jumps.push(match (has_child, has_sibling[node]) {
                (true, true) => subtree[node] as i32,
                (true, false) => -1,
                (false, true) => 0,
                (false, false) => -2,
            });
        }
        Ok((indices, elements, jumps))
    }
}

/// A packed value: the rep plus whether its payload is a blob offset.
#[derive(Clone, Copy)]
struct Rep {
    rep: ValueRep,
    relative: bool,
}

fn inline(ty: TypeId, payload: u64) -> Rep {
    Rep { rep: ValueRep::inlined(ty, payload), relative: false }
}

/// Components packed as int8 bytes when every one is a small integer.
fn int8_payload(components: &[f64]) -> Option<u64> {
    let mut payload = 0u64;
    for (i, &c) in components.iter().enumerate() {
        if c.fract() != 0.0 || !(-128.0..=127.0).contains(&c) {
            return None;
        }
        payload |= ((c as i8) as u8 as u64) << (8 * i);
    }
    Some(payload)
}

/// Float element types sharing the array compression scheme.
trait FloatElem: Copy {
    fn to_f64(self) -> f64;
    fn bits(self) -> u64;
    fn write(self, out: &mut Vec<u8>) -> std::io::Result<()>;
}

impl FloatElem for f16 {
    fn to_f64(self) -> f64 {
        self.to_f64()
    }
    fn bits(self) -> u64 {
        self.to_bits() as u64
    }
    fn write(self, out: &mut Vec<u8>) -> std::io::Result<()> {
        out.write_u16::<LittleEndian>(self.to_bits())
    }
}

impl FloatElem for f32 {
    fn to_f64(self) -> f64 {
        self as f64
    }
    fn bits(self) -> u64 {
        self.to_bits() as u64
    }
    fn write(self, out: &mut Vec<u8>) -> std::io::Result<()> {
        out.write_f32::<LittleEndian>(self)
    }
}

impl FloatElem for f64 {
    fn to_f64(self) -> f64 {
        self
    }
    fn bits(self) -> u64 {
        self.to_bits()
    }
    fn write(self, out: &mut Vec<u8>) -> std::io::Result<()> {
        out.write_f64::<LittleEndian>(self)
    }
}

fn as_exact_i32(v: f64) -> Option<i32> {
    let negative_zero = v == 0.0 && v.is_sign_negative();
    if v.fract() == 0.0 && v >= i32::MIN as f64 && v <= i32::MAX as f64 && !negative_zero {
        Some(v as i32)
    } else {
        None
    }
}

/// Packs values of one field into a blob with blob-relative offsets.
struct Packer<'t> {
    tables: &'t Tables,
    out: Vec<u8>,
    relocs: Vec<usize>,
}

impl<'t> Packer<'t> {
    fn new(tables: &'t Tables) -> Self {
        Self { tables, out: Vec::new(), relocs: Vec::new() }
    }

    /// Align and return the offset of the next out-of-line value.
    fn begin(&mut self) -> u64 {
        let pad = (8 - self.out.len() % 8) % 8;
        self.out.resize(self.out.len() + pad, 0);
        self.out.len() as u64
    }

    fn write_rep(&mut self, rep: Rep) -> Result<()> {
        if rep.relative {
            self.relocs.push(self.out.len());
        }
        self.out.write_u64::<LittleEndian>(rep.rep.0)?;
        Ok(())
    }

    fn place(&mut self, ty: TypeId, write: impl FnOnce(&mut Vec<u8>) -> Result<()>) -> Result<Rep> {
        let at = self.begin();
        write(&mut self.out)?;
        Ok(Rep { rep: ValueRep::at(ty, at), relative: true })
    }

    fn array(
        &mut self,
        ty: TypeId,
        len: usize,
        compressed: bool,
        write: impl FnOnce(&mut Vec<u8>) -> Result<()>,
    ) -> Result<Rep> {
        if len == 0 {
            return Ok(Rep { rep: ValueRep::array(ty, 0, false), relative: false });
        }
        let at = self.begin();
        self.out.write_u64::<LittleEndian>(len as u64)?;
        write(&mut self.out)?;
        Ok(Rep { rep: ValueRep::array(ty, at, compressed), relative: true })
    }

    fn vector_f32(&mut self, ty: TypeId, components: &[f32]) -> Result<Rep> {
        let wide: Vec<f64> = components.iter().map(|&c| c as f64).collect();
        if let Some(payload) = int8_payload(&wide) {
            return Ok(inline(ty, payload));
        }
        self.place(ty, |out| {
            for &c in components {
                out.write_f32::<LittleEndian>(c)?;
            }
            Ok(())
        })
    }

    fn vector_f64(&mut self, ty: TypeId, components: &[f64]) -> Result<Rep> {
        if let Some(payload) = int8_payload(components) {
            return Ok(inline(ty, payload));
        }
        self.place(ty, |out| {
            for &c in components {
                out.write_f64::<LittleEndian>(c)?;
            }
            Ok(())
        })
    }

    fn matrix(&mut self, m: &DMat4) -> Result<Rep> {
        let cols = m.to_cols_array();
        let diagonal = [cols[0], cols[5], cols[10], cols[15]];
        let off_diagonal_zero = cols
            .iter()
            .enumerate()
            .all(|(i, &v)| i % 5 == 0 || v == 0.0);
        if off_diagonal_zero {
            if let Some(payload) = int8_payload(&diagonal) {
                return Ok(inline(TypeId::Matrix4d, payload));
            }
        }
        self.place(TypeId::Matrix4d, |out| {
            for v in cols {
                out.write_f64::<LittleEndian>(v)?;
            }
            Ok(())
        })
    }

    fn float_array<T: FloatElem>(&mut self, ty: TypeId, values: &[T]) -> Result<Rep> {
        if values.len() >= format::MIN_COMPRESSED_ARRAY_SIZE {
            let ints: Option<Vec<i32>> = values.iter().map(|v| as_exact_i32(v.to_f64())).collect();
            if let Some(ints) = ints {
                return self.array(ty, values.len(), true, |out| {
                    out.push(b'i');
                    write_compressed_ints(out, &ints);
                    Ok(())
                });
            }
            let mut lut: Vec<T> = Vec::new();
            let mut lut_index: HashMap<u64, u32> = HashMap::new();
            let mut indices = Vec::with_capacity(values.len());
            for &v in values {
                let i = *lut_index.entry(v.bits()).or_insert_with(|| {
                    lut.push(v);
                    (lut.len() - 1) as u32
                });
                indices.push(i);
                if lut.len() > format::MAX_LUT_SIZE {
                    break;
                }
            }
            if lut.len() <= format::MAX_LUT_SIZE && lut.len() * 4 <= values.len() {
                return self.array(ty, values.len(), true, |out| {
                    out.push(b't');
                    out.write_u32::<LittleEndian>(lut.len() as u32)?;
                    for v in &lut {
                        v.write(out)?;
                    }
                    write_compressed_ints(out, &indices);
                    Ok(())
                });
            }
        }
        self.array(ty, values.len(), false, |out| {
            for v in values {
                v.write(out)?;
            }
            Ok(())
        })
    }

    fn index_array(&mut self, ty: TypeId, indices: Vec<u32>) -> Result<Rep> {
        self.array(ty, indices.len(), false, |out| {
            for i in indices {
                out.write_u32::<LittleEndian>(i)?;
            }
            Ok(())
        })
    }

    fn pack_value(&mut self, value: &Value) -> Result<Rep> {
        let tables = self.tables;
        match value {
            Value::Bool(b) => Ok(inline(TypeId::Bool, *b as u64)),
            Value::Int(i) => Ok(inline(TypeId::Int, *i as u32 as u64)),
            Value::UInt(u) => Ok(inline(TypeId::UInt, *u as u64)),
            Value::Int64(i) => self.place(TypeId::Int64, |out| Ok(out.write_i64::<LittleEndian>(*i)?)),
            Value::Half(h) => Ok(inline(TypeId::Half, h.to_bits() as u64)),
            Value::Float(f) => Ok(inline(TypeId::Float, f.to_bits() as u64)),
            Value::Double(d) => {
                let narrow = *d as f32;
                if narrow as f64 == *d {
                    Ok(inline(TypeId::Double, narrow.to_bits() as u64))
                } else {
                    self.place(TypeId::Double, |out| Ok(out.write_f64::<LittleEndian>(*d)?))
                }
            }
            Value::Token(s) => Ok(inline(TypeId::Token, tables.token(s)? as u64)),
            Value::String(s) => Ok(inline(TypeId::String, tables.string(s)? as u64)),
            Value::Asset(s) => Ok(inline(TypeId::AssetPath, tables.token(s)? as u64)),
            Value::Vec2f(v) => self.vector_f32(TypeId::Vec2f, &v.to_array()),
            Value::Vec3f(v) => self.vector_f32(TypeId::Vec3f, &v.to_array()),
            Value::Vec4f(v) => self.vector_f32(TypeId::Vec4f, &v.to_array()),
            Value::Vec3d(v) => self.vector_f64(TypeId::Vec3d, &v.to_array()),
            Value::Quatf(q) => self.place(TypeId::Quatf, |out| {
                for c in q.to_array() {
                    out.write_f32::<LittleEndian>(c)?;
                }
                Ok(())
            }),
            Value::Matrix4d(m) => self.matrix(m),

            Value::BoolArray(v) => self.array(TypeId::Bool, v.len(), false, |out| {
                out.extend(v.iter().map(|&b| b as u8));
                Ok(())
            }),
            Value::IntArray(v) => {
                let compressed = v.len() >= format::MIN_COMPRESSED_ARRAY_SIZE;
                self.array(TypeId::Int, v.len(), compressed, |out| {
                    if compressed {
                        write_compressed_ints(out, v);
                    } else {
                        for &i in v {
                            out.write_i32::<LittleEndian>(i)?;
                        }
                    }
                    Ok(())
                })
            }
            Value::HalfArray(v) => self.float_array(TypeId::Half, v),
            Value::FloatArray(v) => self.float_array(TypeId::Float, v),
            Value::DoubleArray(v) => self.float_array(TypeId::Double, v),
            Value::TokenArray(v) => {
                let ids = v.iter().map(|s| tables.token(s)).collect::<Result<Vec<_>>>()?;
                self.index_array(TypeId::Token, ids)
            }
            Value::StringArray(v) => {
                let ids = v.iter().map(|s| tables.string(s)).collect::<Result<Vec<_>>>()?;
                self.index_array(TypeId::String, ids)
            }
            Value::AssetArray(v) => {
                let ids = v.iter().map(|s| tables.token(s)).collect::<Result<Vec<_>>>()?;
                self.index_array(TypeId::AssetPath, ids)
            }
            Value::Vec2fArray(v) => self.array(TypeId::Vec2f, v.len(), false, |out| {
                for c in v.iter().flat_map(|e| e.to_array()) {
                    out.write_f32::<LittleEndian>(c)?;
                }
                Ok(())
            }),
            Value::Vec3fArray(v) => self.array(TypeId::Vec3f, v.len(), false, |out| {
                for c in v.iter().flat_map(|e| e.to_array()) {
                    out.write_f32::<LittleEndian>(c)?;
                }
                Ok(())
            }),
            Value::Vec4fArray(v) => self.array(TypeId::Vec4f, v.len(), false, |out| {
                for c in v.iter().flat_map(|e| e.to_array()) {
                    out.write_f32::<LittleEndian>(c)?;
                }
                Ok(())
            }),
            Value::Vec3hArray(v) => self.array(TypeId::Vec3h, v.len(), false, |out| {
                for c in v.iter().flatten() {
                    out.write_u16::<LittleEndian>(c.to_bits())?;
                }
                Ok(())
            }),
            Value::QuatfArray(v) => self.array(TypeId::Quatf, v.len(), false, |out| {
                for c in v.iter().flat_map(|q| q.to_array()) {
                    out.write_f32::<LittleEndian>(c)?;
                }
                Ok(())
            }),
            Value::Matrix4dArray(v) => self.array(TypeId::Matrix4d, v.len(), false, |out| {
                for c in v.iter().flat_map(|m| m.to_cols_array()) {
                    out.write_f64::<LittleEndian>(c)?;
                }
                Ok(())
            }),
        }
    }

    fn pack_field(&mut self, value: &FieldValue<'_>) -> Result<Rep> {
        let tables = self.tables;
        match value {
            FieldValue::Value(v) => self.pack_value(v),
            FieldValue::Specifier(s) => Ok(inline(
                TypeId::Specifier,
                match s {
                    Specifier::Def => 0,
                    Specifier::Over => 1,
                    Specifier::Class => 2,
                },
            )),
            FieldValue::Variability(v) => Ok(inline(
                TypeId::Variability,
                match v {
                    Variability::Varying => 0,
                    Variability::Uniform => 1,
                },
            )),
            FieldValue::TokenVector(names) => {
                let ids = names.iter().map(|s| tables.token(s)).collect::<Result<Vec<_>>>()?;
                self.place(TypeId::TokenVector, |out| write_indices(out, &ids))
            }
            FieldValue::TokenListOp(items) => {
                let ids = items.iter().map(|s| tables.token(s)).collect::<Result<Vec<_>>>()?;
                self.place(TypeId::TokenListOp, |out| {
                    out.push(list_op::HAS_PREPENDED);
                    write_indices(out, &ids)
                })
            }
            FieldValue::PathListOp(paths) => {
                let ids = paths.iter().map(|p| tables.path(p)).collect::<Result<Vec<_>>>()?;
                self.place(TypeId::PathListOp, |out| {
                    out.push(list_op::HAS_EXPLICIT);
                    write_indices(out, &ids)
                })
            }
            FieldValue::ReferenceListOp(paths) => {
                let asset = tables.string("")?;
                let ids = paths.iter().map(|p| tables.path(p)).collect::<Result<Vec<_>>>()?;
                self.place(TypeId::ReferenceListOp, |out| {
                    out.push(list_op::HAS_PREPENDED);
                    out.write_u64::<LittleEndian>(ids.len() as u64)?;
                    for id in ids {
                        out.write_u32::<LittleEndian>(asset)?;
                        out.write_u32::<LittleEndian>(id)?;
                        // Layer offset and scale, then an empty customData.
                        out.write_f64::<LittleEndian>(0.0)?;
                        out.write_f64::<LittleEndian>(1.0)?;
                        out.write_u64::<LittleEndian>(0)?;
                    }
                    Ok(())
                })
            }
            FieldValue::TimeSamples(ts) => self.time_samples(ts),
        }
    }

    fn time_samples(&mut self, ts: &TimeSamples) -> Result<Rep> {
        let times = ts.times();
        let times_rep = self.place(TypeId::DoubleVector, |out| {
            out.write_u64::<LittleEndian>(times.len() as u64)?;
            for t in &times {
                out.write_f64::<LittleEndian>(*t)?;
            }
            Ok(())
        })?;
        let reps = ts.values().map(|v| self.pack_value(v)).collect::<Result<Vec<_>>>()?;

        let at = self.begin();
        // Jumps are relative to the start of each i64.
        self.out.write_i64::<LittleEndian>(8)?;
        self.write_rep(times_rep)?;
        self.out.write_i64::<LittleEndian>(8)?;
        self.out.write_u64::<LittleEndian>(reps.len() as u64)?;
        for rep in reps {
            self.write_rep(rep)?;
        }
        Ok(Rep { rep: ValueRep::at(TypeId::TimeSamples, at), relative: true })
    }
}

fn write_indices(out: &mut Vec<u8>, ids: &[u32]) -> Result<()> {
    out.write_u64::<LittleEndian>(ids.len() as u64)?;
    for &id in ids {
        out.write_u32::<LittleEndian>(id)?;
    }
    Ok(())
}

struct Blob {
    bytes: Vec<u8>,
    rep: Rep,
    relocs: Vec<usize>,
}

fn pack_blob(tables: &Tables, value: &FieldValue<'_>) -> Result<Blob> {
    let mut packer = Packer::new(tables);
    let rep = packer.pack_field(value)?;
    Ok(Blob { bytes: packer.out, rep, relocs: packer.relocs })
}

fn pad8(out: &mut Vec<u8>) {
    let pad = (8 - out.len() % 8) % 8;
    out.resize(out.len() + pad, 0);
}

const MAX_OFFSET: u64 = 1 << 48;

/// Encode `stage` as a crate layer.
pub fn write(stage: &Stage) -> Result<Vec<u8>> {
    let _span = info_span!("encode", format = "usdc", prims = stage.prim_count()).entered();

    let mut specs = vec![layer_spec(stage)];
    for prim in &stage.root_prims {
        gather_prim(prim, &mut specs)?;
    }

    let mut tables = Tables::new();
    for spec in &specs {
        tables.intern_path(&spec.path);
        for (name, value) in &spec.fields {
            tables.intern_token(name)?;
            tables.intern_field(value)?;
        }
    }
    tables.finish()?;

    let values: Vec<&FieldValue<'_>> = specs.iter().flat_map(|s| s.fields.iter().map(|(_, v)| v)).collect();
    let blobs = values
        .par_iter()
        .map(|v| pack_blob(&tables, v))
        .collect::<Result<Vec<_>>>()?;

    let mut out = Vec::new();
    out.extend_from_slice(format::MAGIC);
    out.extend_from_slice(&format::VERSION);
    out.resize(format::BOOTSTRAP_SIZE, 0);

    let mut reps = Vec::with_capacity(blobs.len());
    for blob in blobs {
        pad8(&mut out);
        let base = out.len() as u64;
        if base + blob.bytes.len() as u64 >= MAX_OFFSET {
            return Err(Error::Unsupported("crate value data exceeds 48-bit offsets".into()));
        }
        let mut bytes = blob.bytes;
        for pos in blob.relocs {
            let rep = ValueRep(LittleEndian::read_u64(&bytes[pos..pos + 8])).relocated(base);
            LittleEndian::write_u64(&mut bytes[pos..pos + 8], rep.0);
        }
        out.extend_from_slice(&bytes);
        reps.push(if blob.rep.relative { blob.rep.rep.relocated(base) } else { blob.rep.rep });
    }
    trace!(values = reps.len(), bytes = out.len(), "value data written");

    let mut field_tokens = Vec::new();
    let mut field_reps: Vec<u64> = Vec::new();
    let mut field_index: HashMap<(u32, u64), u32> = HashMap::new();
    let mut fieldsets: Vec<u32> = Vec::new();
    let mut fieldset_index: HashMap<Vec<u32>, u32> = HashMap::new();
    let mut spec_paths = Vec::with_capacity(specs.len());
    let mut spec_sets = Vec::with_capacity(specs.len());
    let mut spec_types = Vec::with_capacity(specs.len());

    let mut next_rep = reps.into_iter();
    for spec in &specs {
        let mut set = Vec::with_capacity(spec.fields.len());
        for (name, _) in &spec.fields {
            let rep = next_rep
                .next()
                .ok_or_else(|| Error::invalid("field value count mismatch"))?;
            let token = tables.token(name)?;
            let index = *field_index.entry((token, rep.0)).or_insert_with(|| {
                field_tokens.push(token);
                field_reps.push(rep.0);
                (field_reps.len() - 1) as u32
            });
            set.push(index);
        }
        let start = match fieldset_index.get(&set) {
            Some(&start) => start,
            None => {
                let start = fieldsets.len() as u32;
                fieldsets.extend_from_slice(&set);
                fieldsets.push(format::FIELD_SET_END);
                fieldset_index.insert(set, start);
                start
            }
        };
        spec_paths.push(tables.path(&spec.path)?);
        spec_sets.push(start);
        spec_types.push(spec.spec_type);
    }

    let mut toc: Vec<(&str, u64, u64)> = Vec::new();
    let mut section = |out: &mut Vec<u8>, name: &'static str, write: &dyn Fn(&mut Vec<u8>) -> Result<()>| -> Result<()> {
        pad8(out);
        let start = out.len() as u64;
        write(out)?;
        toc.push((name, start, out.len() as u64 - start));
        Ok(())
    };

    section(&mut out, format::TOKENS, &|out: &mut Vec<u8>| {
        let mut joined = Vec::new();
        for t in &tables.tokens {
            joined.extend_from_slice(t.as_bytes());
            joined.push(0);
        }
        let packed = compression::compress(&joined);
        out.write_u64::<LittleEndian>(tables.tokens.len() as u64)?;
        out.write_u64::<LittleEndian>(joined.len() as u64)?;
        out.write_u64::<LittleEndian>(packed.len() as u64)?;
        out.extend_from_slice(&packed);
        Ok(())
    })?;
    section(&mut out, format::STRINGS, &|out: &mut Vec<u8>| write_indices(out, &tables.strings))?;
    section(&mut out, format::FIELDS, &|out: &mut Vec<u8>| {
        out.write_u64::<LittleEndian>(field_tokens.len() as u64)?;
        write_compressed_ints(out, &field_tokens);
        let mut raw = Vec::with_capacity(field_reps.len() * 8);
        for rep in &field_reps {
            raw.write_u64::<LittleEndian>(*rep)?;
        }
        let packed = compression::compress(&raw);
        out.write_u64::<LittleEndian>(packed.len() as u64)?;
        out.extend_from_slice(&packed);
        Ok(())
    })?;
    section(&mut out, format::FIELDSETS, &|out: &mut Vec<u8>| {
        out.write_u64::<LittleEndian>(fieldsets.len() as u64)?;
        write_compressed_ints(out, &fieldsets);
        Ok(())
    })?;
    let (path_indices, elements, jumps) = tables.encoded_paths()?;
    section(&mut out, format::PATHS, &|out: &mut Vec<u8>| {
        out.write_u64::<LittleEndian>(tables.nodes.len() as u64)?;
        out.write_u64::<LittleEndian>(path_indices.len() as u64)?;
        write_compressed_ints(out, &path_indices);
        write_compressed_ints(out, &elements);
        write_compressed_ints(out, &jumps);
        Ok(())
    })?;
    section(&mut out, format::SPECS, &|out: &mut Vec<u8>| {
        out.write_u64::<LittleEndian>(spec_paths.len() as u64)?;
        write_compressed_ints(out, &spec_paths);
        write_compressed_ints(out, &spec_sets);
        write_compressed_ints(out, &spec_types);
        Ok(())
    })?;

    pad8(&mut out);
    let toc_offset = out.len() as u64;
    out.write_u64::<LittleEndian>(toc.len() as u64)?;
    for (name, start, size) in &toc {
        let mut padded = [0u8; format::SECTION_NAME_SIZE];
        padded[..name.len()].copy_from_slice(name.as_bytes());
        out.extend_from_slice(&padded);
        out.write_u64::<LittleEndian>(*start)?;
        out.write_u64::<LittleEndian>(*size)?;
    }
    LittleEndian::write_u64(&mut out[16..24], toc_offset);

    debug!(
        tokens = tables.tokens.len(),
        fields = field_reps.len(),
        specs = spec_paths.len(),
        bytes = out.len(),
        "crate layer encoded"
    );
    Ok(out)
}
