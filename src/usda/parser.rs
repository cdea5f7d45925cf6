//! Recursive-descent parser for text layers.
//!
//! Values are first read into untyped literals and converted once the
//! declared attribute type is known, so `1` can become an int, a float or a
//! half depending on the declaration.

use std::str::FromStr;

use half::f16;
use tracing::warn;

use super::lexer::{parse_error, tokenize, Token, TokenKind};
use crate::sdf::{
    Attribute, BaseType, Path, Prim, PrimType, Relationship, Specifier, Stage, TimeSamples, Value, ValueType,
    Variability,
};
use crate::util::{DMat4, DVec3, Error, Quat, Result, Vec2, Vec3, Vec4};

#[derive(Clone, Debug)]
enum Lit {
    Number(String),
    Str(String),
    Asset(String),
    Path(String),
    Ident(String),
    Tuple(Vec<Spanned>),
    List(Vec<Spanned>),
    Dict,
}

#[derive(Clone, Debug)]
struct Spanned {
    lit: Lit,
    line: usize,
    column: usize,
}

impl Spanned {
    fn error(&self, message: impl Into<String>) -> Error {
        parse_error(self.line, self.column, message)
    }

    fn describe(&self) -> &'static str {
        match self.lit {
            Lit::Number(_) => "number",
            Lit::Str(_) => "string",
            Lit::Asset(_) => "asset path",
            Lit::Path(_) => "path",
            Lit::Ident(_) => "identifier",
            Lit::Tuple(_) => "tuple",
            Lit::List(_) => "list",
            Lit::Dict => "dictionary",
        }
    }

    fn mismatch(&self, expected: &str) -> Error {
        self.error(format!("expected {expected}, found {}", self.describe()))
    }

    fn is_none(&self) -> bool {
        matches!(&self.lit, Lit::Ident(s) if s == "None")
    }

    fn number<T: FromStr>(&self, what: &str) -> Result<T> {
        let text = match &self.lit {
            Lit::Number(s) => s.as_str(),
            Lit::Ident(s) if s == "inf" || s == "nan" => s.as_str(),
            _ => return Err(self.mismatch(what)),
        };
        text.parse().map_err(|_| self.error(format!("invalid {what} '{text}'")))
    }

    fn string(&self) -> Result<String> {
        match &self.lit {
            Lit::Str(s) => Ok(s.clone()),
            _ => Err(self.mismatch("string")),
        }
    }

    fn asset(&self) -> Result<String> {
        match &self.lit {
            Lit::Asset(s) => Ok(s.clone()),
            _ => Err(self.mismatch("asset path")),
        }
    }

    fn boolean(&self) -> Result<bool> {
        match &self.lit {
            Lit::Ident(s) if s == "true" => Ok(true),
            Lit::Ident(s) if s == "false" => Ok(false),
            Lit::Number(s) if s == "1" => Ok(true),
            Lit::Number(s) if s == "0" => Ok(false),
            _ => Err(self.mismatch("bool")),
        }
    }

    fn path(&self) -> Result<Path> {
        match &self.lit {
            Lit::Path(s) => s.parse().map_err(|e: Error| self.error(e.to_string())),
            _ => Err(self.mismatch("path")),
        }
    }

    fn tuple(&self, n: usize) -> Result<&[Spanned]> {
        match &self.lit {
            Lit::Tuple(items) if items.len() == n => Ok(items),
            Lit::Tuple(items) => Err(self.error(format!("expected {n} components, found {}", items.len()))),
            _ => Err(self.mismatch("tuple")),
        }
    }

    fn list(&self) -> Result<&[Spanned]> {
        match &self.lit {
            Lit::List(items) => Ok(items),
            _ => Err(self.mismatch("list")),
        }
    }

    /// A single item or a list of items; `None` is the empty list.
    fn one_or_many<T>(&self, item: impl Fn(&Spanned) -> Result<T>) -> Result<Vec<T>> {
        match &self.lit {
            Lit::List(items) => items.iter().map(item).collect(),
            _ if self.is_none() => Ok(Vec::new()),
            _ => Ok(vec![item(self)?]),
        }
    }
}

fn f32s<const N: usize>(lit: &Spanned) -> Result<[f32; N]> {
    let items = lit.tuple(N)?;
    let mut out = [0.0; N];
    for (v, item) in out.iter_mut().zip(items) {
        *v = item.number("float")?;
    }
    Ok(out)
}

fn f64s<const N: usize>(lit: &Spanned) -> Result<[f64; N]> {
    let items = lit.tuple(N)?;
    let mut out = [0.0; N];
    for (v, item) in out.iter_mut().zip(items) {
        *v = item.number("double")?;
    }
    Ok(out)
}

fn half(lit: &Spanned) -> Result<f16> {
    Ok(f16::from_f32(lit.number("half")?))
}

fn vec2(lit: &Spanned) -> Result<Vec2> {
    Ok(Vec2::from_array(f32s::<2>(lit)?))
}

fn vec3(lit: &Spanned) -> Result<Vec3> {
    Ok(Vec3::from_array(f32s::<3>(lit)?))
}

fn vec4(lit: &Spanned) -> Result<Vec4> {
    Ok(Vec4::from_array(f32s::<4>(lit)?))
}

fn half3(lit: &Spanned) -> Result<[f16; 3]> {
    let items = lit.tuple(3)?;
    Ok([half(&items[0])?, half(&items[1])?, half(&items[2])?])
}

fn quat(lit: &Spanned) -> Result<Quat> {
    let [w, x, y, z] = f32s::<4>(lit)?;
    Ok(Quat::from_xyzw(x, y, z, w))
}

fn matrix(lit: &Spanned) -> Result<DMat4> {
    let rows = lit.tuple(4)?;
    let mut cols = [[0.0; 4]; 4];
    for (col, row) in cols.iter_mut().zip(rows) {
        *col = f64s::<4>(row)?;
    }
    Ok(DMat4::from_cols_array_2d(&cols))
}

fn collect<T>(items: &[Spanned], f: impl Fn(&Spanned) -> Result<T>) -> Result<Vec<T>> {
    items.iter().map(f).collect()
}

/// Convert a literal to a value of the declared type.
fn typed_value(ty: ValueType, lit: &Spanned) -> Result<Value> {
    use BaseType as B;
    let unsupported = || lit.error(format!("values of type {ty} are not supported"));
    if ty.array {
        let items = lit.list()?;
        return Ok(match ty.base {
            B::Bool => Value::BoolArray(collect(items, Spanned::boolean)?),
            B::Int => Value::IntArray(collect(items, |l| l.number("int"))?),
            B::Half => Value::HalfArray(collect(items, half)?),
            B::Float => Value::FloatArray(collect(items, |l| l.number("float"))?),
            B::Double => Value::DoubleArray(collect(items, |l| l.number("double"))?),
            B::Token => Value::TokenArray(collect(items, Spanned::string)?),
            B::String => Value::StringArray(collect(items, Spanned::string)?),
            B::Asset => Value::AssetArray(collect(items, Spanned::asset)?),
            B::Float2 | B::TexCoord2f => Value::Vec2fArray(collect(items, vec2)?),
            B::Float3 | B::Color3f | B::Normal3f | B::Point3f | B::Vector3f => Value::Vec3fArray(collect(items, vec3)?),
            B::Float4 | B::Color4f => Value::Vec4fArray(collect(items, vec4)?),
            B::Half3 => Value::Vec3hArray(collect(items, half3)?),
            B::Quatf => Value::QuatfArray(collect(items, quat)?),
            B::Matrix4d => Value::Matrix4dArray(collect(items, matrix)?),
            B::UInt | B::Int64 | B::Double3 => return Err(unsupported()),
        });
    }
    Ok(match ty.base {
        B::Bool => Value::Bool(lit.boolean()?),
        B::Int => Value::Int(lit.number("int")?),
        B::UInt => Value::UInt(lit.number("uint")?),
        B::Int64 => Value::Int64(lit.number("int64")?),
        B::Half => Value::Half(half(lit)?),
        B::Float => Value::Float(lit.number("float")?),
        B::Double => Value::Double(lit.number("double")?),
        B::Token => Value::Token(lit.string()?),
        B::String => Value::String(lit.string()?),
        B::Asset => Value::Asset(lit.asset()?),
        B::Float2 | B::TexCoord2f => Value::Vec2f(vec2(lit)?),
        B::Float3 | B::Color3f | B::Normal3f | B::Point3f | B::Vector3f => Value::Vec3f(vec3(lit)?),
        B::Float4 | B::Color4f => Value::Vec4f(vec4(lit)?),
        B::Double3 => Value::Vec3d(DVec3::from_array(f64s::<3>(lit)?)),
        B::Quatf => Value::Quatf(quat(lit)?),
        B::Matrix4d => Value::Matrix4d(matrix(lit)?),
        B::Half3 => return Err(unsupported()),
    })
}

/// Items of a metadata list op; `delete` and `reorder` contribute nothing.
fn list_op_items<T>(
    op: Option<&str>,
    target: &mut Vec<T>,
    value: &Spanned,
    item: impl Fn(&Spanned) -> Result<T>,
) -> Result<()> {
    let items = value.one_or_many(item)?;
    match op {
        None => *target = items,
        Some("prepend") => {
            let mut items = items;
            items.append(target);
            *target = items;
        }
        Some("append" | "add") => target.extend(items),
        _ => {}
    }
    Ok(())
}

fn reference(lit: &Spanned) -> Result<Path> {
    match &lit.lit {
        Lit::Path(_) => lit.path(),
        Lit::Asset(a) => Err(lit.error(format!("external reference to '{a}' is not supported"))),
        _ => Err(lit.mismatch("reference")),
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    end: (usize, usize),
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn here(&self) -> (usize, usize) {
        self.peek().map_or(self.end, |t| (t.line, t.column))
    }

    fn error(&self, message: impl Into<String>) -> Error {
        let (line, column) = self.here();
        parse_error(line, column, message)
    }

    fn next(&mut self) -> Result<Token> {
        let token = self.peek().cloned().ok_or_else(|| self.error("unexpected end of input"))?;
        self.pos += 1;
        Ok(token)
    }

    fn peek_ident(&self) -> Option<&str> {
        match self.peek().map(|t| &t.kind) {
            Some(TokenKind::Ident(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    fn eat_punct(&mut self, c: char) -> bool {
        if self.peek().is_some_and(|t| t.kind == TokenKind::Punct(c)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, c: char) -> Result<()> {
        if self.eat_punct(c) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{c}'")))
        }
    }

    fn expect_ident(&mut self) -> Result<String> {
        match self.peek_ident() {
            Some(s) => {
                let s = s.to_string();
                self.pos += 1;
                Ok(s)
            }
            None => Err(self.error("expected identifier")),
        }
    }

    fn skip_dict(&mut self) -> Result<()> {
        let mut depth = 1usize;
        while depth > 0 {
            match self.next()?.kind {
                TokenKind::Punct('{') => depth += 1,
                TokenKind::Punct('}') => depth -= 1,
                _ => {}
            }
        }
        Ok(())
    }

    fn sequence(&mut self, close: char) -> Result<Vec<Spanned>> {
        let mut items = Vec::new();
        loop {
            if self.eat_punct(close) {
                return Ok(items);
            }
            items.push(self.literal()?);
            if !self.eat_punct(',') {
                self.expect_punct(close)?;
                return Ok(items);
            }
        }
    }

    fn literal(&mut self) -> Result<Spanned> {
        let token = self.next()?;
        let lit = match token.kind {
            TokenKind::Number(s) => Lit::Number(s),
            TokenKind::Str(s) => Lit::Str(s),
            TokenKind::Asset(s) => Lit::Asset(s),
            TokenKind::Path(s) => Lit::Path(s),
            TokenKind::Ident(s) => Lit::Ident(s),
            TokenKind::Punct('(') => Lit::Tuple(self.sequence(')')?),
            TokenKind::Punct('[') => Lit::List(self.sequence(']')?),
            TokenKind::Punct('{') => {
                self.skip_dict()?;
                Lit::Dict
            }
            TokenKind::Punct(c) => return Err(parse_error(token.line, token.column, format!("unexpected '{c}'"))),
        };
        Ok(Spanned { lit, line: token.line, column: token.column })
    }

    /// `key = value` entries up to the closing parenthesis, with an
    /// optional list-op keyword before the key.
    fn metadata(&mut self) -> Result<Vec<(Option<String>, String, Spanned)>> {
        let mut entries = Vec::new();
        while !self.eat_punct(')') {
            if let Some(TokenKind::Str(_)) = self.peek().map(|t| &t.kind) {
                let doc = self.literal()?;
                entries.push((None, "doc".to_string(), doc));
                continue;
            }
            let mut key = self.expect_ident()?;
            let mut op = None;
            if matches!(key.as_str(), "prepend" | "append" | "add" | "delete" | "reorder") {
                op = Some(key);
                key = self.expect_ident()?;
            }
            self.expect_punct('=')?;
            let value = self.literal()?;
            entries.push((op, key, value));
        }
        Ok(entries)
    }

    fn time_samples(&mut self) -> Result<Vec<(f64, Spanned)>> {
        self.expect_punct('{')?;
        let mut samples = Vec::new();
        while !self.eat_punct('}') {
            let time = self.literal()?;
            let time = time.number::<f64>("time code")?;
            self.expect_punct(':')?;
            samples.push((time, self.literal()?));
            if !self.eat_punct(',') {
                self.expect_punct('}')?;
                break;
            }
        }
        Ok(samples)
    }

    fn layer(&mut self) -> Result<Stage> {
        let mut stage = Stage::new();
        if self.eat_punct('(') {
            let m = &mut stage.metadata;
            for (_, key, value) in self.metadata()? {
                match key.as_str() {
                    "doc" | "documentation" => m.doc = Some(value.string()?),
                    "defaultPrim" => m.default_prim = Some(value.string()?),
                    "upAxis" => m.up_axis = value.string()?,
                    "metersPerUnit" => m.meters_per_unit = value.number("double")?,
                    "startTimeCode" => m.start_time_code = Some(value.number("double")?),
                    "endTimeCode" => m.end_time_code = Some(value.number("double")?),
                    "timeCodesPerSecond" => m.time_codes_per_second = Some(value.number("double")?),
                    "framesPerSecond" => m.frames_per_second = Some(value.number("double")?),
                    _ => {}
                }
            }
        }
        let root = Path::absolute_root();
        while self.peek().is_some() {
            let (line, column) = self.here();
            let prim = self.prim(&root)?;
            stage.add_root(prim).map_err(|e| parse_error(line, column, e.to_string()))?;
        }
        Ok(stage)
    }

    fn prim(&mut self, parent: &Path) -> Result<Prim> {
        let (line, column) = self.here();
        let keyword = self.expect_ident()?;
        let specifier = Specifier::from_keyword(&keyword)
            .ok_or_else(|| parse_error(line, column, format!("expected def, over or class, found '{keyword}'")))?;
        let type_name = match self.peek_ident() {
            Some(_) => Some(self.expect_ident()?),
            None => None,
        };
        let name = self.literal()?;
        let name_text = name.string()?;
        let prim_type = match &type_name {
            None => PrimType::Typeless,
            Some(t) => PrimType::from_type_name(t).unwrap_or_else(|| {
                warn!(prim = %name_text, type_name = %t, "unknown prim type read as typeless");
                PrimType::Typeless
            }),
        };
        let mut prim = Prim::new(parent, &name_text, prim_type).map_err(|e| name.error(e.to_string()))?;
        prim.specifier = specifier;

        if self.eat_punct('(') {
            for (op, key, value) in self.metadata()? {
                let op = op.as_deref();
                match key.as_str() {
                    "kind" => prim.kind = Some(value.string()?),
                    "apiSchemas" => list_op_items(op, &mut prim.api_schemas, &value, Spanned::string)?,
                    "references" => list_op_items(op, &mut prim.references, &value, reference)?,
                    "instanceable" => prim.instanceable = value.boolean()?,
                    "active" => prim.active = value.boolean()?,
                    _ => {}
                }
            }
        }

        self.expect_punct('{')?;
        while !self.eat_punct('}') {
            if self.peek().is_none() {
                return Err(self.error(format!("unterminated prim {}", prim.path)));
            }
            match self.peek_ident() {
                Some("def" | "over" | "class") => {
                    let (line, column) = self.here();
                    let child = self.prim(&prim.path)?;
                    prim.add_child(child).map_err(|e| parse_error(line, column, e.to_string()))?;
                }
                _ => self.property(&mut prim)?,
            }
        }
        Ok(prim)
    }

    fn property(&mut self, prim: &mut Prim) -> Result<()> {
        let mut custom = false;
        let mut uniform = false;
        loop {
            match self.peek_ident() {
                Some("custom") => custom = true,
                Some("uniform") => uniform = true,
                Some("varying") => {}
                _ => break,
            }
            self.pos += 1;
        }
        let mut type_name = self.expect_ident()?;
        if type_name == "rel" {
            return self.relationship(prim, custom);
        }
        if self.eat_punct('[') {
            self.expect_punct(']')?;
            type_name.push_str("[]");
        }
        let (line, column) = self.here();
        let name = self.expect_ident()?;
        let suffix = if self.eat_punct('.') { Some(self.expect_ident()?) } else { None };

        let mut default = None;
        let mut samples = None;
        let mut connect = None;
        match suffix.as_deref() {
            None => {
                if self.eat_punct('=') {
                    default = Some(self.literal()?);
                }
            }
            Some("timeSamples") => {
                self.expect_punct('=')?;
                let at = self.here();
                samples = Some((at, self.time_samples()?));
            }
            Some("connect") => {
                self.expect_punct('=')?;
                connect = Some(self.literal()?);
            }
            Some(other) => return Err(parse_error(line, column, format!("unknown property suffix '.{other}'"))),
        }
        let meta = if self.eat_punct('(') { self.metadata()? } else { Vec::new() };

        let Some(value_type) = ValueType::parse(&type_name) else {
            warn!(prim = %prim.path, name = %name, type_name = %type_name, "skipping attribute of unsupported type");
            return Ok(());
        };
        let at = |message: String| parse_error(line, column, message);
        if prim.property(&name).is_none() {
            prim.add_attribute(Attribute::new(name.clone(), value_type)).map_err(|e| at(e.to_string()))?;
        }
        let path = prim.property_path(&name).map_err(|e| at(e.to_string()))?;
        let attr = prim
            .attribute_mut(&name)
            .ok_or_else(|| at(format!("{name} is already declared as a relationship")))?;
        if attr.type_name != value_type {
            return Err(at(format!("{name} redeclared as {value_type}, was {}", attr.type_name)));
        }
        attr.custom |= custom;
        if uniform {
            attr.variability = Variability::Uniform;
        }
        if let Some(lit) = default {
            if attr.default.is_some() {
                return Err(lit.error(format!("duplicate default for {name}")));
            }
            if !lit.is_none() {
                attr.default = Some(typed_value(value_type, &lit)?);
            }
        }
        if let Some(((line, column), entries)) = samples {
            let mut values = Vec::with_capacity(entries.len());
            for (t, lit) in entries {
                if !lit.is_none() {
                    values.push((t, typed_value(value_type, &lit)?));
                }
            }
            let ts = TimeSamples::from_samples(values).map_err(|e| {
                let detail = match e {
                    Error::TimeSamples { detail, .. } => detail,
                    other => other.to_string(),
                };
                parse_error(line, column, format!("time samples of {path}: {detail}"))
            })?;
            attr.time_samples = Some(ts);
        }
        if let Some(lit) = connect {
            attr.connections = lit.one_or_many(Spanned::path)?;
        }
        for (_, key, value) in meta {
            match key.as_str() {
                "interpolation" => attr.interpolation = Some(value.string()?),
                "elementSize" => attr.element_size = Some(value.number("int")?),
                _ => {}
            }
        }
        Ok(())
    }

    fn relationship(&mut self, prim: &mut Prim, custom: bool) -> Result<()> {
        let (line, column) = self.here();
        let name = self.expect_ident()?;
        let targets = if self.eat_punct('=') { self.literal()?.one_or_many(Spanned::path)? } else { Vec::new() };
        if self.eat_punct('(') {
            self.metadata()?;
        }
        let mut rel = Relationship::new(name, targets);
        rel.custom = custom;
        prim.add_relationship(rel).map_err(|e| parse_error(line, column, e.to_string()))
    }
}

/// Parse a `#usda 1.0` layer.
pub fn parse(text: &str) -> Result<Stage> {
    if !text.starts_with("#usda ") {
        return Err(parse_error(1, 1, "missing '#usda' header"));
    }
    let tokens = tokenize(text)?;
    let end = text.lines().enumerate().last().map_or((1, 1), |(i, l)| (i + 1, l.chars().count() + 1));
    let mut parser = Parser { tokens, pos: 0, end };
    parser.layer()
}
