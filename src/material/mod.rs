//! Target material model.
//!
//! A [`Material`] is a fixed set of `UsdPreviewSurface` input slots, each
//! bound to a constant or a texture. Host shader graphs are translated into
//! this model by [`MaterialTranslator`]; identical translations share one
//! Material prim via [`Material::digest`].

pub mod eval;
pub mod import;
mod translate;

pub use translate::{
    decode_image, source_bytes, BakePlan, MaterialTranslator, PlannedInput, TranslatedMaterial,
};

use std::collections::BTreeMap;
use std::fmt;

use md5::{Digest, Md5};

use crate::util::{Vec3, Vec4};

/// Primvar holding UV set `set`: `st`, `st1`, `st2`, ...
pub fn uv_primvar_name(set: usize) -> String {
    match set {
        0 => "st".to_string(),
        n => format!("st{n}"),
    }
}

/// Inverse of [`uv_primvar_name`].
pub fn uv_set_from_primvar(name: &str) -> Option<usize> {
    match name.strip_prefix("st")? {
        "" => Some(0),
        n => n.parse().ok().filter(|&i| i > 0),
    }
}

/// Input slot of the preview surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Slot {
    Diffuse,
    Emissive,
    Metallic,
    Roughness,
    Opacity,
    Clearcoat,
    ClearcoatRoughness,
    Ior,
    Normal,
    Occlusion,
}

/// How texel values of a slot are stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SlotKind {
    /// sRGB colour.
    Color,
    /// Tangent-space normal, linear RGB.
    Normal,
    /// Single linear channel.
    Scalar,
    /// Ray-traced ambient occlusion, single channel.
    Occlusion,
}

impl Slot {
    pub const ALL: [Slot; 10] = [
        Slot::Diffuse,
        Slot::Emissive,
        Slot::Metallic,
        Slot::Roughness,
        Slot::Opacity,
        Slot::Clearcoat,
        Slot::ClearcoatRoughness,
        Slot::Ior,
        Slot::Normal,
        Slot::Occlusion,
    ];

    /// `UsdPreviewSurface` input name.
    pub fn input_name(self) -> &'static str {
        match self {
            Self::Diffuse => "diffuseColor",
            Self::Emissive => "emissiveColor",
            Self::Metallic => "metallic",
            Self::Roughness => "roughness",
            Self::Opacity => "opacity",
            Self::Clearcoat => "clearcoat",
            Self::ClearcoatRoughness => "clearcoatRoughness",
            Self::Ior => "ior",
            Self::Normal => "normal",
            Self::Occlusion => "occlusion",
        }
    }

    pub fn from_input_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.input_name() == name)
    }

    /// Principled BSDF socket feeding this slot.
    pub fn socket_name(self) -> Option<&'static str> {
        match self {
            Self::Diffuse => Some("Base Color"),
            Self::Emissive => Some("Emission Color"),
            Self::Metallic => Some("Metallic"),
            Self::Roughness => Some("Roughness"),
            Self::Opacity => Some("Alpha"),
            Self::Clearcoat => Some("Coat Weight"),
            Self::ClearcoatRoughness => Some("Coat Roughness"),
            Self::Ior => Some("IOR"),
            Self::Normal => Some("Normal"),
            Self::Occlusion => None,
        }
    }

    pub fn kind(self) -> SlotKind {
        match self {
            Self::Diffuse | Self::Emissive => SlotKind::Color,
            Self::Normal => SlotKind::Normal,
            Self::Occlusion => SlotKind::Occlusion,
            _ => SlotKind::Scalar,
        }
    }

    /// Whether the slot's value is a three-component colour or vector.
    pub fn is_vector(self) -> bool {
        matches!(self.kind(), SlotKind::Color | SlotKind::Normal)
    }

    /// Prefix of the texture shader prim (`diffuseTexture`, ...).
    pub fn texture_prim_name(self) -> String {
        format!("{}Texture", self.input_name().trim_end_matches("Color"))
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.input_name())
    }
}

/// Constant slot value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SlotValue {
    Float(f32),
    Color(Vec3),
}

impl SlotValue {
    pub fn as_color(self) -> Vec3 {
        match self {
            Self::Float(f) => Vec3::splat(f),
            Self::Color(c) => c,
        }
    }

    pub fn as_float(self) -> f32 {
        match self {
            Self::Float(f) => f,
            Self::Color(c) => (c.x + c.y + c.z) / 3.0,
        }
    }

    /// Shape the value for `slot`.
    pub fn for_slot(self, slot: Slot) -> Self {
        if slot.is_vector() {
            Self::Color(self.as_color())
        } else {
            Self::Float(self.as_float())
        }
    }
}

/// Texture channel read by a slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Channel {
    Rgb,
    R,
    G,
    B,
    A,
}

impl Channel {
    pub fn output_name(self) -> &'static str {
        match self {
            Self::Rgb => "rgb",
            Self::R => "r",
            Self::G => "g",
            Self::B => "b",
            Self::A => "a",
        }
    }

    pub fn from_output_name(name: &str) -> Option<Self> {
        Some(match name {
            "rgb" => Self::Rgb,
            "r" => Self::R,
            "g" => Self::G,
            "b" => Self::B,
            "a" => Self::A,
            _ => return None,
        })
    }
}

/// Reference from a slot to an archived texture asset.
#[derive(Clone, Debug, PartialEq)]
pub struct TextureRef {
    /// Archive-relative asset path (`textures/...png`).
    pub asset: String,
    pub uv_set: usize,
    pub channel: Channel,
    pub srgb: bool,
    pub scale: Option<Vec4>,
    pub bias: Option<Vec4>,
}

impl TextureRef {
    pub fn new(asset: String, slot: Slot, uv_set: usize) -> Self {
        let normal = slot == Slot::Normal;
        Self {
            asset,
            uv_set,
            channel: if slot.is_vector() { Channel::Rgb } else { Channel::R },
            srgb: slot.kind() == SlotKind::Color,
            scale: normal.then(|| Vec4::new(2.0, 2.0, 2.0, 1.0)),
            bias: normal.then(|| Vec4::new(-1.0, -1.0, -1.0, 0.0)),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SlotInput {
    Constant(SlotValue),
    Texture { texture: TextureRef, fallback: SlotValue },
}

/// Translated material.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Material {
    pub name: String,
    pub inputs: BTreeMap<Slot, SlotInput>,
}

impl Material {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_string(), inputs: BTreeMap::new() }
    }

    pub fn set(&mut self, slot: Slot, input: SlotInput) {
        self.inputs.insert(slot, input);
    }

    pub fn get(&self, slot: Slot) -> Option<&SlotInput> {
        self.inputs.get(&slot)
    }

    /// Distinct UV sets read by texture inputs, ascending.
    pub fn uv_sets(&self) -> Vec<usize> {
        let mut sets: Vec<usize> = self
            .inputs
            .values()
            .filter_map(|i| match i {
                SlotInput::Texture { texture, .. } => Some(texture.uv_set),
                _ => None,
            })
            .collect();
        sets.sort_unstable();
        sets.dedup();
        sets
    }

    /// Content digest over the inputs in slot order; the name is excluded.
    pub fn digest(&self) -> [u8; 16] {
        let mut hasher = Md5::new();
        for (slot, input) in &self.inputs {
            hasher.update(slot.input_name().as_bytes());
            match input {
                SlotInput::Constant(v) => {
                    hasher.update(b"c");
                    hash_value(&mut hasher, *v);
                }
                SlotInput::Texture { texture, fallback } => {
                    hasher.update(b"t");
                    hasher.update(texture.asset.as_bytes());
                    hasher.update((texture.uv_set as u64).to_le_bytes());
                    hasher.update(texture.channel.output_name().as_bytes());
                    hasher.update([texture.srgb as u8]);
                    for v in [texture.scale, texture.bias].into_iter().flatten() {
                        for c in v.to_array() {
                            hasher.update(c.to_bits().to_le_bytes());
                        }
                    }
                    hash_value(&mut hasher, *fallback);
                }
            }
        }
        hasher.finalize().into()
    }
}

fn hash_value(hasher: &mut Md5, v: SlotValue) {
    match v {
        SlotValue::Float(f) => hasher.update(f.to_bits().to_le_bytes()),
        SlotValue::Color(c) => {
            for x in c.to_array() {
                hasher.update(x.to_bits().to_le_bytes());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_names() {
        for slot in Slot::ALL {
            assert_eq!(Slot::from_input_name(slot.input_name()), Some(slot));
        }
        assert_eq!(Slot::Diffuse.texture_prim_name(), "diffuseTexture");
        assert_eq!(Slot::ClearcoatRoughness.texture_prim_name(), "clearcoatRoughnessTexture");
    }

    #[test]
    fn test_uv_primvar_names() {
        assert_eq!(uv_primvar_name(0), "st");
        assert_eq!(uv_primvar_name(2), "st2");
        assert_eq!(uv_set_from_primvar("st"), Some(0));
        assert_eq!(uv_set_from_primvar("st3"), Some(3));
        assert_eq!(uv_set_from_primvar("st0"), None);
        assert_eq!(uv_set_from_primvar("uv"), None);
    }

    #[test]
    fn test_digest_ignores_name() {
        let mut a = Material::new("A");
        a.set(Slot::Roughness, SlotInput::Constant(SlotValue::Float(0.3)));
        let mut b = a.clone();
        b.name = "B".into();
        assert_eq!(a.digest(), b.digest());
        b.set(Slot::Metallic, SlotInput::Constant(SlotValue::Float(1.0)));
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn test_normal_texture_ref() {
        let t = TextureRef::new("textures/n.png".into(), Slot::Normal, 0);
        assert_eq!(t.channel, Channel::Rgb);
        assert!(!t.srgb);
        assert_eq!(t.scale, Some(Vec4::new(2.0, 2.0, 2.0, 1.0)));
        let r = TextureRef::new("textures/r.png".into(), Slot::Roughness, 1);
        assert_eq!(r.channel, Channel::R);
        assert!(r.scale.is_none());
    }
}
