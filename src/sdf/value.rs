//! Typed attribute values and declared type names.

use std::fmt;

use half::f16;

use crate::util::{DMat4, DVec3, Quat, Vec2, Vec3, Vec4};

/// An attribute or metadata value.
///
/// A closed set covering the scalar, vector, matrix and array payloads the
/// exporter writes and the importer understands.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i32),
    UInt(u32),
    Int64(i64),
    Half(f16),
    Float(f32),
    Double(f64),
    Token(String),
    String(String),
    Asset(String),
    Vec2f(Vec2),
    Vec3f(Vec3),
    Vec4f(Vec4),
    Vec3d(DVec3),
    Quatf(Quat),
    Matrix4d(DMat4),

    BoolArray(Vec<bool>),
    IntArray(Vec<i32>),
    HalfArray(Vec<f16>),
    FloatArray(Vec<f32>),
    DoubleArray(Vec<f64>),
    TokenArray(Vec<String>),
    StringArray(Vec<String>),
    AssetArray(Vec<String>),
    Vec2fArray(Vec<Vec2>),
    Vec3fArray(Vec<Vec3>),
    Vec4fArray(Vec<Vec4>),
    Vec3hArray(Vec<[f16; 3]>),
    QuatfArray(Vec<Quat>),
    Matrix4dArray(Vec<DMat4>),
}

impl Value {
    /// Whether this value holds an array payload.
    pub fn is_array(&self) -> bool {
        matches!(
            self,
            Self::BoolArray(_)
                | Self::IntArray(_)
                | Self::HalfArray(_)
                | Self::FloatArray(_)
                | Self::DoubleArray(_)
                | Self::TokenArray(_)
                | Self::StringArray(_)
                | Self::AssetArray(_)
                | Self::Vec2fArray(_)
                | Self::Vec3fArray(_)
                | Self::Vec4fArray(_)
                | Self::Vec3hArray(_)
                | Self::QuatfArray(_)
                | Self::Matrix4dArray(_)
        )
    }

    /// Number of elements for arrays, 1 for scalars.
    pub fn len(&self) -> usize {
        match self {
            Self::BoolArray(v) => v.len(),
            Self::IntArray(v) => v.len(),
            Self::HalfArray(v) => v.len(),
            Self::FloatArray(v) => v.len(),
            Self::DoubleArray(v) => v.len(),
            Self::TokenArray(v) | Self::StringArray(v) | Self::AssetArray(v) => v.len(),
            Self::Vec2fArray(v) => v.len(),
            Self::Vec3fArray(v) => v.len(),
            Self::Vec4fArray(v) => v.len(),
            Self::Vec3hArray(v) => v.len(),
            Self::QuatfArray(v) => v.len(),
            Self::Matrix4dArray(v) => v.len(),
            _ => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Short name of the payload kind, used in type mismatch errors.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::UInt(_) => "uint",
            Self::Int64(_) => "int64",
            Self::Half(_) => "half",
            Self::Float(_) => "float",
            Self::Double(_) => "double",
            Self::Token(_) => "token",
            Self::String(_) => "string",
            Self::Asset(_) => "asset",
            Self::Vec2f(_) => "float2",
            Self::Vec3f(_) => "float3",
            Self::Vec4f(_) => "float4",
            Self::Vec3d(_) => "double3",
            Self::Quatf(_) => "quatf",
            Self::Matrix4d(_) => "matrix4d",
            Self::BoolArray(_) => "bool[]",
            Self::IntArray(_) => "int[]",
            Self::HalfArray(_) => "half[]",
            Self::FloatArray(_) => "float[]",
            Self::DoubleArray(_) => "double[]",
            Self::TokenArray(_) => "token[]",
            Self::StringArray(_) => "string[]",
            Self::AssetArray(_) => "asset[]",
            Self::Vec2fArray(_) => "float2[]",
            Self::Vec3fArray(_) => "float3[]",
            Self::Vec4fArray(_) => "float4[]",
            Self::Vec3hArray(_) => "half3[]",
            Self::QuatfArray(_) => "quatf[]",
            Self::Matrix4dArray(_) => "matrix4d[]",
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Double(v) => Some(*v as f32),
            Self::Half(v) => Some(v.to_f32()),
            Self::Int(v) => Some(*v as f32),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Double(v) => Some(*v),
            Self::Float(v) => Some(*v as f64),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_vec3(&self) -> Option<Vec3> {
        match self {
            Self::Vec3f(v) => Some(*v),
            Self::Vec3d(v) => Some(v.as_vec3()),
            Self::Float(v) => Some(Vec3::splat(*v)),
            _ => None,
        }
    }

    pub fn as_vec4(&self) -> Option<Vec4> {
        match self {
            Self::Vec4f(v) => Some(*v),
            Self::Vec3f(v) => Some(v.extend(1.0)),
            _ => None,
        }
    }

    pub fn as_token(&self) -> Option<&str> {
        match self {
            Self::Token(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Token(s) | Self::String(s) | Self::Asset(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_matrix(&self) -> Option<&DMat4> {
        match self {
            Self::Matrix4d(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Int(i) => Some(*i != 0),
            _ => None,
        }
    }

    pub fn as_int_array(&self) -> Option<&[i32]> {
        match self {
            Self::IntArray(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_float_array(&self) -> Option<&[f32]> {
        match self {
            Self::FloatArray(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_vec2_array(&self) -> Option<&[Vec2]> {
        match self {
            Self::Vec2fArray(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_vec3_array(&self) -> Option<&[Vec3]> {
        match self {
            Self::Vec3fArray(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_token_array(&self) -> Option<&[String]> {
        match self {
            Self::TokenArray(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_matrix_array(&self) -> Option<&[DMat4]> {
        match self {
            Self::Matrix4dArray(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_quat_array(&self) -> Option<&[Quat]> {
        match self {
            Self::QuatfArray(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_half3_array(&self) -> Option<&[[f16; 3]]> {
        match self {
            Self::Vec3hArray(v) => Some(v),
            _ => None,
        }
    }
}

/// Base element type of a declared attribute type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BaseType {
    Bool,
    Int,
    UInt,
    Int64,
    Half,
    Float,
    Double,
    Token,
    String,
    Asset,
    Float2,
    Float3,
    Float4,
    Double3,
    Half3,
    Color3f,
    Color4f,
    Normal3f,
    Point3f,
    Vector3f,
    TexCoord2f,
    Quatf,
    Matrix4d,
}

const BASE_NAMES: &[(BaseType, &str)] = &[
    (BaseType::Bool, "bool"),
    (BaseType::Int, "int"),
    (BaseType::UInt, "uint"),
    (BaseType::Int64, "int64"),
    (BaseType::Half, "half"),
    (BaseType::Float, "float"),
    (BaseType::Double, "double"),
    (BaseType::Token, "token"),
    (BaseType::String, "string"),
    (BaseType::Asset, "asset"),
    (BaseType::Float2, "float2"),
    (BaseType::Float3, "float3"),
    (BaseType::Float4, "float4"),
    (BaseType::Double3, "double3"),
    (BaseType::Half3, "half3"),
    (BaseType::Color3f, "color3f"),
    (BaseType::Color4f, "color4f"),
    (BaseType::Normal3f, "normal3f"),
    (BaseType::Point3f, "point3f"),
    (BaseType::Vector3f, "vector3f"),
    (BaseType::TexCoord2f, "texCoord2f"),
    (BaseType::Quatf, "quatf"),
    (BaseType::Matrix4d, "matrix4d"),
];

impl BaseType {
    pub fn name(self) -> &'static str {
        BASE_NAMES
            .iter()
            .find(|(t, _)| *t == self)
            .map(|(_, n)| *n)
            .unwrap_or("token")
    }

    pub fn from_name(name: &str) -> Option<Self> {
        BASE_NAMES.iter().find(|(_, n)| *n == name).map(|(t, _)| *t)
    }
}

/// Declared (role-aware) attribute type, e.g. `point3f[]` or `color3f`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ValueType {
    pub base: BaseType,
    pub array: bool,
}

impl ValueType {
    pub const fn scalar(base: BaseType) -> Self {
        Self { base, array: false }
    }

    pub const fn array(base: BaseType) -> Self {
        Self { base, array: true }
    }

    /// Parse a type name such as `texCoord2f[]`.
    pub fn parse(name: &str) -> Option<Self> {
        match name.strip_suffix("[]") {
            Some(base) => BaseType::from_name(base).map(Self::array),
            None => BaseType::from_name(name).map(Self::scalar),
        }
    }

    /// Whether `value` is a valid payload for this declared type.
    pub fn accepts(&self, value: &Value) -> bool {
        use BaseType as B;
        match (self.base, self.array, value) {
            (B::Bool, false, Value::Bool(_)) => true,
            (B::Int, false, Value::Int(_)) => true,
            (B::UInt, false, Value::UInt(_)) => true,
            (B::Int64, false, Value::Int64(_)) => true,
            (B::Half, false, Value::Half(_)) => true,
            (B::Float, false, Value::Float(_)) => true,
            (B::Double, false, Value::Double(_)) => true,
            (B::Token, false, Value::Token(_)) => true,
            (B::String, false, Value::String(_)) => true,
            (B::Asset, false, Value::Asset(_)) => true,
            (B::TexCoord2f | B::Float2, false, Value::Vec2f(_)) => true,
            (B::Float3 | B::Color3f | B::Normal3f | B::Point3f | B::Vector3f, false, Value::Vec3f(_)) => true,
            (B::Float4 | B::Color4f, false, Value::Vec4f(_)) => true,
            (B::Double3, false, Value::Vec3d(_)) => true,
            (B::Quatf, false, Value::Quatf(_)) => true,
            (B::Matrix4d, false, Value::Matrix4d(_)) => true,
            (B::Bool, true, Value::BoolArray(_)) => true,
            (B::Int, true, Value::IntArray(_)) => true,
            (B::Half, true, Value::HalfArray(_)) => true,
            (B::Float, true, Value::FloatArray(_)) => true,
            (B::Double, true, Value::DoubleArray(_)) => true,
            (B::Token, true, Value::TokenArray(_)) => true,
            (B::String, true, Value::StringArray(_)) => true,
            (B::Asset, true, Value::AssetArray(_)) => true,
            (B::TexCoord2f | B::Float2, true, Value::Vec2fArray(_)) => true,
            (B::Float3 | B::Color3f | B::Normal3f | B::Point3f | B::Vector3f, true, Value::Vec3fArray(_)) => true,
            (B::Float4 | B::Color4f, true, Value::Vec4fArray(_)) => true,
            (B::Half3, true, Value::Vec3hArray(_)) => true,
            (B::Quatf, true, Value::QuatfArray(_)) => true,
            (B::Matrix4d, true, Value::Matrix4dArray(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.array {
            write!(f, "{}[]", self.base.name())
        } else {
            f.write_str(self.base.name())
        }
    }
}
