//! Prims, attributes and relationships.

use std::fmt;

use crate::util::{Error, Result};

use super::{Path, TimeSamples, Value, ValueType};

/// How a prim is introduced in its layer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Specifier {
    #[default]
    Def,
    Over,
    Class,
}

impl Specifier {
    pub fn keyword(self) -> &'static str {
        match self {
            Self::Def => "def",
            Self::Over => "over",
            Self::Class => "class",
        }
    }

    pub fn from_keyword(s: &str) -> Option<Self> {
        match s {
            "def" => Some(Self::Def),
            "over" => Some(Self::Over),
            "class" => Some(Self::Class),
            _ => None,
        }
    }
}

/// Schema type tag of a prim.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PrimType {
    #[default]
    Typeless,
    Xform,
    Scope,
    Mesh,
    GeomSubset,
    Material,
    Shader,
    SkelRoot,
    Skeleton,
    SkelAnimation,
}

impl PrimType {
    /// Registered schema name; empty for typeless prims.
    pub fn type_name(self) -> &'static str {
        match self {
            Self::Typeless => "",
            Self::Xform => "Xform",
            Self::Scope => "Scope",
            Self::Mesh => "Mesh",
            Self::GeomSubset => "GeomSubset",
            Self::Material => "Material",
            Self::Shader => "Shader",
            Self::SkelRoot => "SkelRoot",
            Self::Skeleton => "Skeleton",
            Self::SkelAnimation => "SkelAnimation",
        }
    }

    pub fn from_type_name(s: &str) -> Option<Self> {
        Some(match s {
            "" => Self::Typeless,
            "Xform" => Self::Xform,
            "Scope" => Self::Scope,
            "Mesh" => Self::Mesh,
            "GeomSubset" => Self::GeomSubset,
            "Material" => Self::Material,
            "Shader" => Self::Shader,
            "SkelRoot" => Self::SkelRoot,
            "Skeleton" => Self::Skeleton,
            "SkelAnimation" => Self::SkelAnimation,
            _ => return None,
        })
    }

    /// Whether prims of this type carry a transform.
    pub fn is_xformable(self) -> bool {
        matches!(self, Self::Xform | Self::Mesh | Self::SkelRoot | Self::Skeleton)
    }
}

impl fmt::Display for PrimType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Typeless => f.write_str("(typeless)"),
            t => f.write_str(t.type_name()),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Variability {
    #[default]
    Varying,
    Uniform,
}

/// A typed attribute with an optional default and optional time samples.
#[derive(Clone, Debug, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub type_name: ValueType,
    pub variability: Variability,
    pub custom: bool,
    pub default: Option<Value>,
    pub time_samples: Option<TimeSamples>,
    pub connections: Vec<Path>,
    pub interpolation: Option<String>,
    pub element_size: Option<i32>,
}

impl Attribute {
    pub fn new(name: impl Into<String>, type_name: ValueType) -> Self {
        Self {
            name: name.into(),
            type_name,
            variability: Variability::Varying,
            custom: false,
            default: None,
            time_samples: None,
            connections: Vec::new(),
            interpolation: None,
            element_size: None,
        }
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_samples(mut self, samples: TimeSamples) -> Self {
        self.time_samples = Some(samples);
        self
    }

    pub fn uniform(mut self) -> Self {
        self.variability = Variability::Uniform;
        self
    }

    pub fn connect(mut self, target: Path) -> Self {
        self.connections.push(target);
        self
    }

    pub fn interpolation(mut self, interp: &str) -> Self {
        self.interpolation = Some(interp.to_string());
        self
    }

    pub fn element_size(mut self, size: i32) -> Self {
        self.element_size = Some(size);
        self
    }

    /// Whether the attribute has more than a constant value.
    pub fn is_animated(&self) -> bool {
        self.time_samples.as_ref().is_some_and(|ts| !ts.is_empty())
    }

    /// Value at `time`: the held time sample if sampled, otherwise the default.
    pub fn value_at(&self, time: f64) -> Option<&Value> {
        match &self.time_samples {
            Some(ts) if !ts.is_empty() => ts.value_at(time),
            _ => self.default.as_ref(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Relationship {
    pub name: String,
    pub targets: Vec<Path>,
    pub custom: bool,
}

impl Relationship {
    pub fn new(name: impl Into<String>, targets: Vec<Path>) -> Self {
        Self { name: name.into(), targets, custom: false }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Property {
    Attribute(Attribute),
    Relationship(Relationship),
}

impl Property {
    pub fn name(&self) -> &str {
        match self {
            Self::Attribute(a) => &a.name,
            Self::Relationship(r) => &r.name,
        }
    }
}

/// A scene description node.
#[derive(Clone, Debug, PartialEq)]
pub struct Prim {
    pub name: String,
    pub path: Path,
    pub specifier: Specifier,
    pub prim_type: PrimType,
    pub kind: Option<String>,
    pub api_schemas: Vec<String>,
    pub references: Vec<Path>,
    pub instanceable: bool,
    pub active: bool,
    pub children: Vec<Prim>,
    pub properties: Vec<Property>,
}

impl Prim {
    /// Create a detached prim named `name` under `parent`.
    pub fn new(parent: &Path, name: &str, prim_type: PrimType) -> Result<Self> {
        Ok(Self {
            name: name.to_string(),
            path: parent.append_child(name)?,
            specifier: Specifier::Def,
            prim_type,
            kind: None,
            api_schemas: Vec::new(),
            references: Vec::new(),
            instanceable: false,
            active: true,
            children: Vec::new(),
            properties: Vec::new(),
        })
    }

    /// Define a child prim; sibling names must be unique.
    pub fn define_child(&mut self, name: &str, prim_type: PrimType) -> Result<&mut Prim> {
        let child = Prim::new(&self.path, name, prim_type)?;
        self.add_child(child)
    }

    /// Attach an already built child, checking its path and name.
    pub fn add_child(&mut self, child: Prim) -> Result<&mut Prim> {
        if child.path.parent().as_ref() != Some(&self.path) || child.path.name() != child.name {
            return Err(Error::InvalidPath(format!(
                "{} cannot be a child of {}",
                child.path, self.path
            )));
        }
        if self.child(&child.name).is_some() {
            return Err(Error::InvalidPath(format!("duplicate child {}", child.path)));
        }
        self.children.push(child);
        let idx = self.children.len() - 1;
        Ok(&mut self.children[idx])
    }

    pub fn child(&self, name: &str) -> Option<&Prim> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut Prim> {
        self.children.iter_mut().find(|c| c.name == name)
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name() == name)
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        match self.property(name) {
            Some(Property::Attribute(a)) => Some(a),
            _ => None,
        }
    }

    pub fn attribute_mut(&mut self, name: &str) -> Option<&mut Attribute> {
        self.properties.iter_mut().find_map(|p| match p {
            Property::Attribute(a) if a.name == name => Some(a),
            _ => None,
        })
    }

    pub fn relationship(&self, name: &str) -> Option<&Relationship> {
        match self.property(name) {
            Some(Property::Relationship(r)) => Some(r),
            _ => None,
        }
    }

    pub fn attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.properties.iter().filter_map(|p| match p {
            Property::Attribute(a) => Some(a),
            _ => None,
        })
    }

    pub fn relationships(&self) -> impl Iterator<Item = &Relationship> {
        self.properties.iter().filter_map(|p| match p {
            Property::Relationship(r) => Some(r),
            _ => None,
        })
    }

    /// Add a property; names must be unique and valid.
    pub fn add_property(&mut self, property: Property) -> Result<()> {
        let name = property.name();
        if !super::path::is_property_name(name) {
            return Err(Error::InvalidPath(format!("'{name}' is not a valid property name on {}", self.path)));
        }
        if self.property(name).is_some() {
            return Err(Error::invalid(format!("duplicate property {}.{name}", self.path)));
        }
        self.properties.push(property);
        Ok(())
    }

    pub fn add_attribute(&mut self, attr: Attribute) -> Result<()> {
        self.add_property(Property::Attribute(attr))
    }

    pub fn add_relationship(&mut self, rel: Relationship) -> Result<()> {
        self.add_property(Property::Relationship(rel))
    }

    /// Add `schema` to the prepended API schema list if not present.
    pub fn apply_api(&mut self, schema: &str) {
        if !self.api_schemas.iter().any(|s| s == schema) {
            self.api_schemas.push(schema.to_string());
        }
    }

    pub fn has_api(&self, schema: &str) -> bool {
        self.api_schemas.iter().any(|s| s == schema)
    }

    /// Path of property `name` on this prim.
    pub fn property_path(&self, name: &str) -> Result<Path> {
        self.path.append_property(name)
    }

    /// Number of prims in this subtree including self.
    pub fn subtree_len(&self) -> usize {
        1 + self.children.iter().map(Prim::subtree_len).sum::<usize>()
    }

    /// Depth-first pre-order visit of this subtree.
    pub fn visit<'a>(&'a self, f: &mut dyn FnMut(&'a Prim)) {
        f(self);
        for child in &self.children {
            child.visit(f);
        }
    }

    /// Shader id token (`info:id`), if this is a shader.
    pub fn shader_id(&self) -> Option<&str> {
        self.attribute("info:id")
            .and_then(|a| a.default.as_ref())
            .and_then(Value::as_token)
    }
}
