//! Crate layer reader.
//!
//! Parsing is strict: every table index, value offset and section length
//! is checked, and the first violation aborts with a format error naming
//! the section (or the spec path for value data).

use std::collections::HashMap;

use byteorder::{ByteOrder, LittleEndian};
use half::f16;
use tracing::{debug, info_span, warn};

use super::compression;
use super::cursor::Cursor;
use super::format::{self, field};
use super::integer_coding::read_compressed_ints;
use super::value_rep::{list_op, spec_type, TypeId, ValueRep};
use crate::sdf::{
    Attribute, Path, Prim, PrimType, Property, Relationship, Specifier, Stage, StageMetadata, TimeSamples, Value,
    ValueType, Variability,
};
use crate::util::{DMat4, DVec3, DVec4, Error, Quat, Result, Vec2, Vec3, Vec4};

const VALUE_DATA: &str = "value data";

struct Section {
    name: String,
    start: u64,
    size: u64,
}

struct Field {
    token: u32,
    rep: ValueRep,
}

struct Spec {
    path: u32,
    fieldset: u32,
    spec_type: u32,
}

/// The parsed structural tables of one crate file.
struct CrateFile<'a> {
    data: &'a [u8],
    tokens: Vec<String>,
    strings: Vec<u32>,
    fields: Vec<Field>,
    fieldsets: Vec<u32>,
    paths: Vec<Path>,
    specs: Vec<Spec>,
}

fn read_bootstrap(data: &[u8]) -> Result<u64> {
    if data.len() < format::BOOTSTRAP_SIZE {
        return Err(Error::format("bootstrap", format!("file is only {} bytes", data.len())));
    }
    if &data[..8] != format::MAGIC {
        return Err(Error::format("bootstrap", "missing PXR-USDC magic"));
    }
    let version = [data[8], data[9], data[10]];
    if version < format::MIN_VERSION || version > format::MAX_VERSION {
        return Err(Error::format(
            "bootstrap",
            format!("unsupported version {}.{}.{}", version[0], version[1], version[2]),
        ));
    }
    Ok(LittleEndian::read_u64(&data[16..24]))
}

fn read_toc(data: &[u8], offset: u64) -> Result<Vec<Section>> {
    let mut c = Cursor::new(data, "TOC");
    if offset < format::BOOTSTRAP_SIZE as u64 {
        return Err(c.error(format!("offset {offset} overlaps the bootstrap")));
    }
    c.seek(offset)?;
    let n = c.count(format::SECTION_NAME_SIZE + 16)?;
    let mut sections = Vec::with_capacity(n);
    for _ in 0..n {
        let raw = c.bytes(format::SECTION_NAME_SIZE)?;
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        let name = std::str::from_utf8(&raw[..end]).map_err(|_| c.error("section name is not UTF-8"))?;
        let start = c.u64()?;
        let size = c.u64()?;
        let in_bounds = start >= format::BOOTSTRAP_SIZE as u64 && start.checked_add(size).is_some_and(|e| e <= offset);
        if !in_bounds {
            return Err(c.error(format!("section {name} range {start}+{size} is out of bounds")));
        }
        sections.push(Section { name: name.to_string(), start, size });
    }

    let mut prev_end = 0u64;
    for required in format::SECTIONS {
        let s = sections
            .iter()
            .find(|s| s.name == required)
            .ok_or_else(|| c.error(format!("missing section {required}")))?;
        if s.start < prev_end {
            return Err(c.error(format!("section {required} is out of order")));
        }
        prev_end = s.start + s.size;
    }
    Ok(sections)
}

/// Element count of a compressed block, bounded by the bytes left.
fn packed_count(c: &mut Cursor<'_>) -> Result<usize> {
    let n = c.u64()?;
    let limit = (c.remaining() as u64).saturating_mul(1024).saturating_add(16);
    if n > limit {
        return Err(c.error(format!("count {n} is implausible for {} remaining bytes", c.remaining())));
    }
    Ok(n as usize)
}

fn expect_consumed(c: &Cursor<'_>) -> Result<()> {
    match c.remaining() {
        0 => Ok(()),
        n => Err(c.error(format!("{n} trailing bytes after section data"))),
    }
}

fn check_index(c: &Cursor<'_>, what: &str, index: u32, len: usize) -> Result<()> {
    if (index as usize) < len {
        Ok(())
    } else {
        Err(c.error(format!("{what} index {index} out of range ({len})")))
    }
}

/// Add the path location to value data errors.
fn at_path(path: &Path) -> impl Fn(Error) -> Error + '_ {
    move |e| match e {
        Error::Format { section, detail } => Error::Format { section, detail: format!("{detail} (at {path})") },
        other => other,
    }
}

fn int8s(payload: u64) -> [f64; 8] {
    let mut out = [0.0; 8];
    for (i, v) in out.iter_mut().enumerate() {
        *v = ((payload >> (8 * i)) as u8 as i8) as f64;
    }
    out
}

fn empty_array(ty: TypeId) -> Option<Value> {
    Some(match ty {
        TypeId::Bool => Value::BoolArray(Vec::new()),
        TypeId::Int => Value::IntArray(Vec::new()),
        TypeId::Half => Value::HalfArray(Vec::new()),
        TypeId::Float => Value::FloatArray(Vec::new()),
        TypeId::Double => Value::DoubleArray(Vec::new()),
        TypeId::Token => Value::TokenArray(Vec::new()),
        TypeId::String => Value::StringArray(Vec::new()),
        TypeId::AssetPath => Value::AssetArray(Vec::new()),
        TypeId::Vec2f => Value::Vec2fArray(Vec::new()),
        TypeId::Vec3f => Value::Vec3fArray(Vec::new()),
        TypeId::Vec4f => Value::Vec4fArray(Vec::new()),
        TypeId::Vec3h => Value::Vec3hArray(Vec::new()),
        TypeId::Quatf => Value::QuatfArray(Vec::new()),
        TypeId::Matrix4d => Value::Matrix4dArray(Vec::new()),
        _ => return None,
    })
}

fn element_size(ty: TypeId) -> usize {
    match ty {
        TypeId::Bool | TypeId::UChar => 1,
        TypeId::Half => 2,
        TypeId::Vec3h => 6,
        TypeId::Double | TypeId::Int64 | TypeId::UInt64 | TypeId::Vec2f => 8,
        TypeId::Vec3f => 12,
        TypeId::Vec4f | TypeId::Quatf => 16,
        TypeId::Vec3d => 24,
        TypeId::Matrix4d => 128,
        _ => 4,
    }
}

fn read_n<'a, T>(c: &mut Cursor<'a>, n: usize, mut read: impl FnMut(&mut Cursor<'a>) -> Result<T>) -> Result<Vec<T>> {
    (0..n).map(|_| read(c)).collect()
}

fn read_vec2(c: &mut Cursor<'_>) -> Result<Vec2> {
    Ok(Vec2::new(c.f32()?, c.f32()?))
}

fn read_vec3(c: &mut Cursor<'_>) -> Result<Vec3> {
    Ok(Vec3::new(c.f32()?, c.f32()?, c.f32()?))
}

fn read_vec4(c: &mut Cursor<'_>) -> Result<Vec4> {
    Ok(Vec4::new(c.f32()?, c.f32()?, c.f32()?, c.f32()?))
}

fn read_quat(c: &mut Cursor<'_>) -> Result<Quat> {
    Ok(Quat::from_xyzw(c.f32()?, c.f32()?, c.f32()?, c.f32()?))
}

fn read_matrix(c: &mut Cursor<'_>) -> Result<DMat4> {
    let mut cols = [0.0f64; 16];
    for v in cols.iter_mut() {
        *v = c.f64()?;
    }
    Ok(DMat4::from_cols_array(&cols))
}

fn read_half(c: &mut Cursor<'_>) -> Result<f16> {
    Ok(f16::from_bits(c.u16()?))
}

/// Float array stored as integers (`'i'`) or through a lookup table (`'t'`).
fn compressed_floats<'a, T: Copy>(
    c: &mut Cursor<'a>,
    read: impl Fn(&mut Cursor<'a>) -> Result<T>,
    from_int: impl Fn(i32) -> T,
) -> Result<Vec<T>> {
    let n = packed_count(c)?;
    match c.u8()? {
        b'i' => Ok(read_compressed_ints::<i32>(c, n)?.into_iter().map(from_int).collect()),
        b't' => {
            let lut_len = c.u32()? as usize;
            if lut_len > c.remaining() {
                return Err(c.error(format!("lookup table of {lut_len} entries is truncated")));
            }
            let lut = read_n(c, lut_len, &read)?;
            read_compressed_ints::<u32>(c, n)?
                .into_iter()
                .map(|i| lut.get(i as usize).copied().ok_or_else(|| c.error(format!("lookup index {i} out of range"))))
                .collect()
        }
        code => Err(c.error(format!("unknown float array coding {code:#x}"))),
    }
}

impl<'a> CrateFile<'a> {
    fn parse(data: &'a [u8]) -> Result<Self> {
        let toc_offset = read_bootstrap(data)?;
        let sections = read_toc(data, toc_offset)?;
        let section = |name: &'static str| -> Result<Cursor<'a>> {
            let s = sections
                .iter()
                .find(|s| s.name == name)
                .ok_or_else(|| Error::format("TOC", format!("missing section {name}")))?;
            Cursor::slice(data, s.start, s.size, name)
        };

        let tokens = read_tokens(&mut section(format::TOKENS)?)?;
        let strings = read_strings(&mut section(format::STRINGS)?, tokens.len())?;
        let fields = read_fields(&mut section(format::FIELDS)?, tokens.len())?;
        let fieldsets = read_fieldsets(&mut section(format::FIELDSETS)?, fields.len())?;
        let paths = read_paths(&mut section(format::PATHS)?, &tokens)?;
        let specs = read_specs(&mut section(format::SPECS)?, paths.len(), fieldsets.len())?;
        debug!(
            tokens = tokens.len(),
            fields = fields.len(),
            paths = paths.len(),
            specs = specs.len(),
            "crate tables read"
        );
        Ok(Self { data, tokens, strings, fields, fieldsets, paths, specs })
    }

    fn value_cursor(&self, offset: u64) -> Result<Cursor<'a>> {
        let mut c = Cursor::new(self.data, VALUE_DATA);
        c.seek(offset)?;
        Ok(c)
    }

    fn token_at(&self, index: u64) -> Result<&str> {
        self.tokens
            .get(index as usize)
            .map(String::as_str)
            .ok_or_else(|| Error::format(VALUE_DATA, format!("token index {index} out of range")))
    }

    fn string_at(&self, index: u64) -> Result<&str> {
        let token = self
            .strings
            .get(index as usize)
            .ok_or_else(|| Error::format(VALUE_DATA, format!("string index {index} out of range")))?;
        self.token_at(*token as u64)
    }

    fn path_at(&self, index: u32) -> Result<&Path> {
        self.paths
            .get(index as usize)
            .ok_or_else(|| Error::format(VALUE_DATA, format!("path index {index} out of range")))
    }

    /// Field name/rep pairs of a spec.
    fn spec_fields(&self, spec: &Spec) -> Result<Vec<(&str, ValueRep)>> {
        let mut out = Vec::new();
        for &index in &self.fieldsets[spec.fieldset as usize..] {
            if index == format::FIELD_SET_END {
                return Ok(out);
            }
            // Range checked while reading FIELDSETS.
            let f = &self.fields[index as usize];
            out.push((self.tokens[f.token as usize].as_str(), f.rep));
        }
        Err(Error::format(format::FIELDSETS, "field set is not terminated"))
    }

    fn value(&self, rep: ValueRep) -> Result<Option<Value>> {
        let ty = rep
            .type_id()
            .ok_or_else(|| Error::format(VALUE_DATA, format!("unknown value type {}", rep.type_byte())))?;
        if ty == TypeId::ValueBlock {
            return Ok(None);
        }
        if rep.is_array() {
            return self.array(ty, rep).map(Some);
        }
        let p = rep.payload();
        if rep.is_inlined() {
            let b = int8s(p);
            return Ok(Some(match ty {
                TypeId::Bool => Value::Bool(p != 0),
                TypeId::Int => Value::Int(p as u32 as i32),
                TypeId::UInt => Value::UInt(p as u32),
                TypeId::Half => Value::Half(f16::from_bits(p as u16)),
                TypeId::Float => Value::Float(f32::from_bits(p as u32)),
                TypeId::Double => Value::Double(f32::from_bits(p as u32) as f64),
                TypeId::Token => Value::Token(self.token_at(p)?.to_string()),
                TypeId::String => Value::String(self.string_at(p)?.to_string()),
                TypeId::AssetPath => Value::Asset(self.token_at(p)?.to_string()),
                TypeId::Vec2f => Value::Vec2f(Vec2::new(b[0] as f32, b[1] as f32)),
                TypeId::Vec3f => Value::Vec3f(Vec3::new(b[0] as f32, b[1] as f32, b[2] as f32)),
                TypeId::Vec4f => Value::Vec4f(Vec4::new(b[0] as f32, b[1] as f32, b[2] as f32, b[3] as f32)),
                TypeId::Vec3d => Value::Vec3d(DVec3::new(b[0], b[1], b[2])),
                TypeId::Matrix4d => Value::Matrix4d(DMat4::from_diagonal(DVec4::new(b[0], b[1], b[2], b[3]))),
                other => {
                    return Err(Error::format(VALUE_DATA, format!("unsupported inlined value type {other:?}")))
                }
            }));
        }
        let mut c = self.value_cursor(p)?;
        Ok(Some(match ty {
            TypeId::Int => Value::Int(c.i32()?),
            TypeId::Int64 => Value::Int64(c.i64()?),
            TypeId::Float => Value::Float(c.f32()?),
            TypeId::Double => Value::Double(c.f64()?),
            TypeId::Vec2f => Value::Vec2f(read_vec2(&mut c)?),
            TypeId::Vec3f => Value::Vec3f(read_vec3(&mut c)?),
            TypeId::Vec4f => Value::Vec4f(read_vec4(&mut c)?),
            TypeId::Vec3d => Value::Vec3d(DVec3::new(c.f64()?, c.f64()?, c.f64()?)),
            TypeId::Quatf => Value::Quatf(read_quat(&mut c)?),
            TypeId::Matrix4d => Value::Matrix4d(read_matrix(&mut c)?),
            other => return Err(Error::format(VALUE_DATA, format!("unsupported value type {other:?}"))),
        }))
    }

    fn array(&self, ty: TypeId, rep: ValueRep) -> Result<Value> {
        let unsupported = || Error::format(VALUE_DATA, format!("unsupported array type {ty:?}"));
        if rep.payload() == 0 {
            return empty_array(ty).ok_or_else(unsupported);
        }
        let mut c = self.value_cursor(rep.payload())?;
        if rep.is_compressed() {
            return Ok(match ty {
                TypeId::Int => {
                    let n = packed_count(&mut c)?;
                    Value::IntArray(read_compressed_ints(&mut c, n)?)
                }
                TypeId::Half => Value::HalfArray(compressed_floats(&mut c, read_half, |i| f16::from_f32(i as f32))?),
                TypeId::Float => Value::FloatArray(compressed_floats(&mut c, |c| c.f32(), |i| i as f32)?),
                TypeId::Double => Value::DoubleArray(compressed_floats(&mut c, |c| c.f64(), |i| i as f64)?),
                _ => return Err(unsupported()),
            });
        }
        let n = c.count(element_size(ty))?;
        let c = &mut c;
        Ok(match ty {
            TypeId::Bool => Value::BoolArray(c.bytes(n)?.iter().map(|&b| b != 0).collect()),
            TypeId::Int => Value::IntArray(read_n(c, n, |c| c.i32())?),
            TypeId::Half => Value::HalfArray(read_n(c, n, read_half)?),
            TypeId::Float => Value::FloatArray(read_n(c, n, |c| c.f32())?),
            TypeId::Double => Value::DoubleArray(read_n(c, n, |c| c.f64())?),
            TypeId::Token => Value::TokenArray(read_n(c, n, |c| Ok(self.token_at(c.u32()? as u64)?.to_string()))?),
            TypeId::String => Value::StringArray(read_n(c, n, |c| Ok(self.string_at(c.u32()? as u64)?.to_string()))?),
            TypeId::AssetPath => Value::AssetArray(read_n(c, n, |c| Ok(self.token_at(c.u32()? as u64)?.to_string()))?),
            TypeId::Vec2f => Value::Vec2fArray(read_n(c, n, read_vec2)?),
            TypeId::Vec3f => Value::Vec3fArray(read_n(c, n, read_vec3)?),
            TypeId::Vec4f => Value::Vec4fArray(read_n(c, n, read_vec4)?),
            TypeId::Vec3h => Value::Vec3hArray(read_n(c, n, |c| Ok([read_half(c)?, read_half(c)?, read_half(c)?]))?),
            TypeId::Quatf => Value::QuatfArray(read_n(c, n, read_quat)?),
            TypeId::Matrix4d => Value::Matrix4dArray(read_n(c, n, read_matrix)?),
            _ => return Err(unsupported()),
        })
    }

    fn expect_type(&self, rep: ValueRep, ty: TypeId) -> Result<()> {
        if rep.type_id() != Some(ty) || rep.is_array() {
            return Err(Error::format(
                VALUE_DATA,
                format!("expected {ty:?}, found type {}", rep.type_byte()),
            ));
        }
        Ok(())
    }

    fn token_vector(&self, rep: ValueRep) -> Result<Vec<String>> {
        self.expect_type(rep, TypeId::TokenVector)?;
        let mut c = self.value_cursor(rep.payload())?;
        let n = c.count(4)?;
        read_n(&mut c, n, |c| Ok(self.token_at(c.u32()? as u64)?.to_string()))
    }

    fn double_vector(&self, rep: ValueRep) -> Result<Vec<f64>> {
        if rep.is_array() {
            return match self.value(rep)? {
                Some(Value::DoubleArray(v)) => Ok(v),
                _ => Err(Error::format(VALUE_DATA, "sample times are not doubles")),
            };
        }
        self.expect_type(rep, TypeId::DoubleVector)?;
        let mut c = self.value_cursor(rep.payload())?;
        let n = c.count(8)?;
        read_n(&mut c, n, |c| c.f64())
    }

    /// Composed items of a list op: explicit items, or prepended then appended.
    fn list_op<T>(
        &self,
        rep: ValueRep,
        ty: TypeId,
        mut item: impl FnMut(&mut Cursor<'a>) -> Result<T>,
    ) -> Result<Vec<T>> {
        self.expect_type(rep, ty)?;
        let mut c = self.value_cursor(rep.payload())?;
        let header = c.u8()?;
        let mut read_list = |c: &mut Cursor<'a>| -> Result<Vec<T>> {
            let n = c.count(1)?;
            read_n(c, n, &mut item)
        };
        let mut explicit = None;
        let mut prepended = Vec::new();
        let mut appended = Vec::new();
        if header & list_op::HAS_EXPLICIT != 0 {
            explicit = Some(read_list(&mut c)?);
        } else if header & list_op::MAKE_EXPLICIT != 0 {
            explicit = Some(Vec::new());
        }
        if header & list_op::HAS_ADDED != 0 {
            appended.extend(read_list(&mut c)?);
        }
        if header & list_op::HAS_PREPENDED != 0 {
            prepended = read_list(&mut c)?;
        }
        if header & list_op::HAS_APPENDED != 0 {
            appended.extend(read_list(&mut c)?);
        }
        if header & list_op::HAS_DELETED != 0 {
            read_list(&mut c)?;
        }
        if header & list_op::HAS_ORDERED != 0 {
            read_list(&mut c)?;
        }
        Ok(match explicit {
            Some(items) => items,
            None => {
                prepended.extend(appended);
                prepended
            }
        })
    }

    fn token_list(&self, rep: ValueRep) -> Result<Vec<String>> {
        self.list_op(rep, TypeId::TokenListOp, |c| Ok(self.token_at(c.u32()? as u64)?.to_string()))
    }

    fn path_list(&self, rep: ValueRep) -> Result<Vec<Path>> {
        self.list_op(rep, TypeId::PathListOp, |c| Ok(self.path_at(c.u32()?)?.clone()))
    }

    fn references(&self, rep: ValueRep) -> Result<Vec<Path>> {
        self.list_op(rep, TypeId::ReferenceListOp, |c| {
            let asset = c.u32()?;
            let prim = c.u32()?;
            let _offset = c.f64()?;
            let _scale = c.f64()?;
            if c.u64()? != 0 {
                return Err(Error::Unsupported("reference customData".into()));
            }
            let asset = self.string_at(asset as u64)?;
            if !asset.is_empty() {
                return Err(Error::Unsupported(format!("external reference to '{asset}'")));
            }
            Ok(self.path_at(prim)?.clone())
        })
    }

    fn time_samples(&self, rep: ValueRep, path: &Path) -> Result<TimeSamples> {
        self.expect_type(rep, TypeId::TimeSamples)?;
        if rep.is_inlined() {
            return Err(Error::format(VALUE_DATA, "inlined time samples"));
        }
        let jump_target = |base: u64, jump: i64| {
            base.checked_add_signed(jump)
                .ok_or_else(|| Error::format(VALUE_DATA, format!("jump {jump} out of range")))
        };
        let start = rep.payload();
        let mut c = self.value_cursor(start)?;
        let jump = c.i64()?;
        c.seek(jump_target(start, jump)?)?;
        let times_rep = ValueRep(c.u64()?);
        let after_times = c.pos() as u64;
        let times = self.double_vector(times_rep)?;
        c.seek(after_times)?;
        let jump = c.i64()?;
        c.seek(jump_target(after_times, jump)?)?;
        let n = c.count(8)?;
        if n != times.len() {
            return Err(Error::format(VALUE_DATA, format!("{} sample times but {n} values", times.len())));
        }
        let mut samples = Vec::with_capacity(n);
        for t in times {
            if let Some(v) = self.value(ValueRep(c.u64()?))? {
                samples.push((t, v));
            }
        }
        TimeSamples::from_samples(samples).map_err(|e| Error::TimeSamples {
            path: path.to_string(),
            detail: e.to_string(),
        })
    }

    fn scalar(&self, rep: ValueRep) -> Result<Value> {
        self.value(rep)?
            .ok_or_else(|| Error::format(VALUE_DATA, "blocked value where a scalar was expected"))
    }

    fn token_field(&self, rep: ValueRep) -> Result<String> {
        match self.scalar(rep)? {
            Value::Token(s) => Ok(s),
            other => Err(Error::TypeMismatch { expected: "token".into(), actual: other.kind_name().into() }),
        }
    }

    fn bool_field(&self, rep: ValueRep) -> Result<bool> {
        let v = self.scalar(rep)?;
        v.as_bool()
            .ok_or_else(|| Error::TypeMismatch { expected: "bool".into(), actual: v.kind_name().into() })
    }

    fn double_field(&self, rep: ValueRep) -> Result<f64> {
        let v = self.scalar(rep)?;
        v.as_f64()
            .ok_or_else(|| Error::TypeMismatch { expected: "double".into(), actual: v.kind_name().into() })
    }

    fn inline_enum(&self, rep: ValueRep, ty: TypeId, max: u64) -> Result<u64> {
        self.expect_type(rep, ty)?;
        if !rep.is_inlined() || rep.payload() > max {
            return Err(Error::format(VALUE_DATA, format!("invalid {ty:?} payload {}", rep.payload())));
        }
        Ok(rep.payload())
    }

    fn build_stage(&self) -> Result<Stage> {
        let mut by_path: HashMap<&Path, &Spec> = HashMap::with_capacity(self.specs.len());
        for spec in &self.specs {
            let path = &self.paths[spec.path as usize];
            if by_path.insert(path, spec).is_some() {
                return Err(Error::format(format::SPECS, format!("duplicate spec for {path}")));
            }
        }
        let root = Path::absolute_root();
        let layer = by_path
            .get(&root)
            .filter(|s| s.spec_type == spec_type::PSEUDO_ROOT)
            .ok_or_else(|| Error::format(format::SPECS, "missing pseudo-root spec"))?;

        let mut stage = Stage::new();
        let mut children = Vec::new();
        let mut metadata = StageMetadata::default();
        for (name, rep) in self.spec_fields(layer)? {
            match name {
                field::DEFAULT_PRIM => metadata.default_prim = Some(self.token_field(rep)?),
                field::UP_AXIS => metadata.up_axis = self.token_field(rep)?,
                field::METERS_PER_UNIT => metadata.meters_per_unit = self.double_field(rep)?,
                field::START_TIME_CODE => metadata.start_time_code = Some(self.double_field(rep)?),
                field::END_TIME_CODE => metadata.end_time_code = Some(self.double_field(rep)?),
                field::TIME_CODES_PER_SECOND => metadata.time_codes_per_second = Some(self.double_field(rep)?),
                field::FRAMES_PER_SECOND => metadata.frames_per_second = Some(self.double_field(rep)?),
                field::DOCUMENTATION => {
                    metadata.doc = self.scalar(rep)?.as_str().map(str::to_string);
                }
                field::PRIM_CHILDREN => children = self.token_vector(rep)?,
                _ => {}
            }
        }
        stage.metadata = metadata;
        for name in &children {
            let prim = self.read_prim(&root, name, &by_path)?;
            stage.add_root(prim)?;
        }
        Ok(stage)
    }

    fn read_prim(&self, parent: &Path, name: &str, by_path: &HashMap<&Path, &Spec>) -> Result<Prim> {
        let mut prim = Prim::new(parent, name, PrimType::Typeless)?;
        let path = prim.path.clone();
        let spec = by_path
            .get(&path)
            .filter(|s| s.spec_type == spec_type::PRIM)
            .ok_or_else(|| Error::format(format::SPECS, format!("missing prim spec for {path}")))?;

        let mut children = Vec::new();
        let mut properties = Vec::new();
        let located = at_path(&path);
        for (field_name, rep) in self.spec_fields(spec)? {
            let applied: Result<()> = (|| {
                match field_name {
                    field::SPECIFIER => {
                        prim.specifier = match self.inline_enum(rep, TypeId::Specifier, 2)? {
                            0 => Specifier::Def,
                            1 => Specifier::Over,
                            _ => Specifier::Class,
                        }
                    }
                    field::TYPE_NAME => {
                        let type_name = self.token_field(rep)?;
                        prim.prim_type = PrimType::from_type_name(&type_name).unwrap_or_else(|| {
                            warn!(path = %path, type_name = %type_name, "unknown prim type read as typeless");
                            PrimType::Typeless
                        });
                    }
                    field::KIND => prim.kind = Some(self.token_field(rep)?),
                    field::API_SCHEMAS => prim.api_schemas = self.token_list(rep)?,
                    field::REFERENCES => prim.references = self.references(rep)?,
                    field::INSTANCEABLE => prim.instanceable = self.bool_field(rep)?,
                    field::ACTIVE => prim.active = self.bool_field(rep)?,
                    field::PRIM_CHILDREN => children = self.token_vector(rep)?,
                    field::PROPERTIES => properties = self.token_vector(rep)?,
                    _ => {}
                }
                Ok(())
            })();
            applied.map_err(&located)?;
        }

        for prop_name in &properties {
            let prop_path = path.append_property(prop_name)?;
            let spec = by_path
                .get(&prop_path)
                .ok_or_else(|| Error::format(format::SPECS, format!("missing property spec for {prop_path}")))?;
            let property = match spec.spec_type {
                spec_type::ATTRIBUTE => self
                    .read_attribute(&prop_path, spec)
                    .map_err(at_path(&prop_path))?
                    .map(Property::Attribute),
                spec_type::RELATIONSHIP => Some(Property::Relationship(
                    self.read_relationship(&prop_path, spec).map_err(at_path(&prop_path))?,
                )),
                other => {
                    return Err(Error::format(format::SPECS, format!("{prop_path} has spec type {other}")));
                }
            };
            if let Some(property) = property {
                prim.add_property(property)?;
            }
        }

        for child in &children {
            let child = self.read_prim(&path, child, by_path)?;
            prim.add_child(child)?;
        }
        Ok(prim)
    }

    fn read_attribute(&self, path: &Path, spec: &Spec) -> Result<Option<Attribute>> {
        let fields = self.spec_fields(spec)?;
        let type_name = match fields.iter().find(|(n, _)| *n == field::TYPE_NAME) {
            Some((_, rep)) => self.token_field(*rep)?,
            None => return Err(Error::format(VALUE_DATA, "attribute without typeName")),
        };
        let Some(value_type) = ValueType::parse(&type_name) else {
            warn!(path = %path, type_name = %type_name, "skipping attribute of unsupported type");
            return Ok(None);
        };
        let mut attr = Attribute::new(path.name(), value_type);
        let check = |v: &Value| {
            if value_type.accepts(v) {
                Ok(())
            } else {
                Err(Error::TypeMismatch { expected: value_type.to_string(), actual: v.kind_name().into() })
            }
        };
        for (name, rep) in fields {
            match name {
                field::VARIABILITY => {
                    attr.variability = match self.inline_enum(rep, TypeId::Variability, 1)? {
                        0 => Variability::Varying,
                        _ => Variability::Uniform,
                    }
                }
                field::CUSTOM => attr.custom = self.bool_field(rep)?,
                field::DEFAULT => {
                    attr.default = self.value(rep)?;
                    if let Some(v) = &attr.default {
                        check(v)?;
                    }
                }
                field::TIME_SAMPLES => {
                    let samples = self.time_samples(rep, path)?;
                    for v in samples.values() {
                        check(v)?;
                    }
                    attr.time_samples = Some(samples);
                }
                field::CONNECTION_PATHS => attr.connections = self.path_list(rep)?,
                field::INTERPOLATION => attr.interpolation = Some(self.token_field(rep)?),
                field::ELEMENT_SIZE => match self.scalar(rep)? {
                    Value::Int(n) => attr.element_size = Some(n),
                    other => {
                        return Err(Error::TypeMismatch { expected: "int".into(), actual: other.kind_name().into() })
                    }
                },
                _ => {}
            }
        }
        Ok(Some(attr))
    }

    fn read_relationship(&self, path: &Path, spec: &Spec) -> Result<Relationship> {
        let mut rel = Relationship::new(path.name(), Vec::new());
        for (name, rep) in self.spec_fields(spec)? {
            match name {
                field::TARGET_PATHS => rel.targets = self.path_list(rep)?,
                field::CUSTOM => rel.custom = self.bool_field(rep)?,
                _ => {}
            }
        }
        Ok(rel)
    }
}

fn read_tokens(c: &mut Cursor<'_>) -> Result<Vec<String>> {
    let count = c.u64()?;
    let raw_size = c.u64()?;
    let packed_size = c.u64()?;
    let packed_len = usize::try_from(packed_size)
        .ok()
        .filter(|&n| n <= c.remaining())
        .ok_or_else(|| c.error(format!("compressed size {packed_size} exceeds section")))?;
    let packed = c.bytes(packed_len)?;
    expect_consumed(c)?;
    if raw_size > (packed_len as u64).saturating_mul(255).saturating_add(64) {
        return Err(c.error(format!("uncompressed size {raw_size} is implausible")));
    }
    let raw = compression::decompress(packed, raw_size as usize, format::TOKENS)?;
    if raw.len() as u64 != raw_size {
        return Err(c.error(format!("tokens decompressed to {} bytes, expected {raw_size}", raw.len())));
    }
    let tokens: Vec<String> = match raw.split_last() {
        None => Vec::new(),
        Some((&0, body)) => body
            .split(|&b| b == 0)
            .map(|t| std::str::from_utf8(t).map(str::to_string).map_err(|_| c.error("token is not UTF-8")))
            .collect::<Result<_>>()?,
        Some(_) => return Err(c.error("token data is not NUL terminated")),
    };
    if tokens.len() as u64 != count {
        return Err(c.error(format!("found {} tokens, expected {count}", tokens.len())));
    }
    Ok(tokens)
}

fn read_strings(c: &mut Cursor<'_>, tokens: usize) -> Result<Vec<u32>> {
    let n = c.count(4)?;
    let strings = read_n(c, n, |c| c.u32())?;
    for &s in &strings {
        check_index(c, "token", s, tokens)?;
    }
    expect_consumed(c)?;
    Ok(strings)
}

fn read_fields(c: &mut Cursor<'_>, tokens: usize) -> Result<Vec<Field>> {
    let n = packed_count(c)?;
    let names: Vec<u32> = read_compressed_ints(c, n)?;
    for &t in &names {
        check_index(c, "token", t, tokens)?;
    }
    let size = c.u64()?;
    let size = usize::try_from(size)
        .ok()
        .filter(|&s| s <= c.remaining())
        .ok_or_else(|| c.error(format!("value rep block of {size} bytes is truncated")))?;
    let packed = c.bytes(size)?;
    expect_consumed(c)?;
    let raw = compression::decompress(packed, n * 8, format::FIELDS)?;
    if raw.len() != n * 8 {
        return Err(c.error(format!("value reps decompressed to {} bytes, expected {}", raw.len(), n * 8)));
    }
    Ok(names
        .into_iter()
        .zip(raw.chunks_exact(8))
        .map(|(token, rep)| Field { token, rep: ValueRep(LittleEndian::read_u64(rep)) })
        .collect())
}

fn read_fieldsets(c: &mut Cursor<'_>, fields: usize) -> Result<Vec<u32>> {
    let n = packed_count(c)?;
    let sets: Vec<u32> = read_compressed_ints(c, n)?;
    for &f in &sets {
        if f != format::FIELD_SET_END {
            check_index(c, "field", f, fields)?;
        }
    }
    if sets.last().is_some_and(|&f| f != format::FIELD_SET_END) {
        return Err(c.error("last field set is not terminated"));
    }
    expect_consumed(c)?;
    Ok(sets)
}

fn read_paths(c: &mut Cursor<'_>, tokens: &[String]) -> Result<Vec<Path>> {
    let total = packed_count(c)?;
    let encoded = packed_count(c)?;
    let indices: Vec<u32> = read_compressed_ints(c, encoded)?;
    let elements: Vec<i32> = read_compressed_ints(c, encoded)?;
    let jumps: Vec<i32> = read_compressed_ints(c, encoded)?;
    expect_consumed(c)?;

    let mut paths: Vec<Option<Path>> = vec![None; total];
    if encoded > 0 {
        let mut stack: Vec<(usize, Option<Path>)> = vec![(0, None)];
        while let Some((start, mut parent)) = stack.pop() {
            let mut i = start;
            loop {
                if i >= encoded {
                    return Err(c.error(format!("path entry {i} out of range")));
                }
                let path = match &parent {
                    None => Path::absolute_root(),
                    Some(p) => {
                        let element = elements[i];
                        let token = tokens
                            .get(element.unsigned_abs() as usize)
                            .ok_or_else(|| c.error(format!("element token {element} out of range")))?;
                        let appended = if element < 0 { p.append_property(token) } else { p.append_child(token) };
                        appended.map_err(|e| c.error(e.to_string()))?
                    }
                };
                let slot = paths
                    .get_mut(indices[i] as usize)
                    .ok_or_else(|| c.error(format!("path index {} out of range", indices[i])))?;
                if slot.is_some() {
                    return Err(c.error(format!("path index {} assigned twice", indices[i])));
                }
                *slot = Some(path.clone());

                let jump = jumps[i];
                let has_child = jump > 0 || jump == -1;
                let has_sibling = jump >= 0;
                if jump < -2 {
                    return Err(c.error(format!("invalid jump {jump}")));
                }
                if has_child {
                    if has_sibling {
                        stack.push((i + jump as usize, parent.clone()));
                    }
                    parent = Some(path);
                    i += 1;
                } else if has_sibling {
                    i += 1;
                } else {
                    break;
                }
            }
        }
    }
    paths
        .into_iter()
        .enumerate()
        .map(|(i, p)| p.ok_or_else(|| c.error(format!("path {i} was never defined"))))
        .collect()
}

fn read_specs(c: &mut Cursor<'_>, paths: usize, fieldsets: usize) -> Result<Vec<Spec>> {
    let n = packed_count(c)?;
    let path_ids: Vec<u32> = read_compressed_ints(c, n)?;
    let set_ids: Vec<u32> = read_compressed_ints(c, n)?;
    let types: Vec<u32> = read_compressed_ints(c, n)?;
    expect_consumed(c)?;
    let mut specs = Vec::with_capacity(n);
    for ((path, fieldset), spec_type) in path_ids.into_iter().zip(set_ids).zip(types) {
        check_index(c, "path", path, paths)?;
        check_index(c, "field set", fieldset, fieldsets)?;
        if !matches!(
            spec_type,
            spec_type::ATTRIBUTE | spec_type::PRIM | spec_type::PSEUDO_ROOT | spec_type::RELATIONSHIP
        ) {
            return Err(c.error(format!("unsupported spec type {spec_type}")));
        }
        specs.push(Spec { path, fieldset, spec_type });
    }
    Ok(specs)
}

/// Decode a crate layer.
pub fn read(data: &[u8]) -> Result<Stage> {
    let _span = info_span!("decode", format = "usdc", bytes = data.len()).entered();
    let file = CrateFile::parse(data)?;
    let stage = file.build_stage()?;
    debug!(prims = stage.prim_count(), "crate layer decoded");
    Ok(stage)
}
