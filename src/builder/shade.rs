//! Material prims.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::debug;

use super::MATERIALS_SCOPE;
use crate::host::MaterialId;
use crate::material::import::{PREVIEW_SURFACE_ID, PRIMVAR_READER_ID, UV_TEXTURE_ID};
use crate::material::{uv_primvar_name, Channel, Material, Slot, SlotInput, SlotKind, SlotValue, TextureRef};
use crate::sdf::{make_identifier, make_unique, Attribute, BaseType, Path, Prim, PrimType, Value, ValueType};
use crate::util::Result;

const SURFACE_SHADER: &str = "PreviewSurface";

/// The Materials scope and the prim each host material is bound through.
///
/// Materials with equal digests share one prim; the first one's name wins.
#[derive(Debug, Default)]
pub struct MaterialPrims {
    scope: Option<Prim>,
    paths: HashMap<MaterialId, Path>,
}

impl MaterialPrims {
    pub fn build(root: &Path, materials: &BTreeMap<MaterialId, Material>) -> Result<Self> {
        if materials.is_empty() {
            return Ok(Self::default());
        }
        let mut scope = Prim::new(root, MATERIALS_SCOPE, PrimType::Scope)?;
        let mut paths = HashMap::new();
        let mut by_digest: HashMap<[u8; 16], Path> = HashMap::new();
        let mut taken = HashSet::new();
        for (id, material) in materials {
            let digest = material.digest();
            if let Some(path) = by_digest.get(&digest) {
                debug!(material = %material.name, shared = %path, "deduplicated material");
                paths.insert(*id, path.clone());
                continue;
            }
            let name = make_unique(&make_identifier(&material.name), &mut taken);
            let prim = material_prim(&scope.path, &name, material)?;
            by_digest.insert(digest, prim.path.clone());
            paths.insert(*id, prim.path.clone());
            scope.add_child(prim)?;
        }
        Ok(Self { scope: Some(scope), paths })
    }

    pub fn path(&self, id: MaterialId) -> Option<&Path> {
        self.paths.get(&id)
    }

    /// Number of Material prims.
    pub fn len(&self) -> usize {
        self.scope.as_ref().map_or(0, |s| s.children.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_scope(self) -> Option<Prim> {
        self.scope
    }
}

fn token(name: &str, value: &str) -> Attribute {
    Attribute::new(name, ValueType::scalar(BaseType::Token)).with_default(Value::Token(value.to_string()))
}

fn shader(parent: &Path, name: &str, id: &str) -> Result<Prim> {
    let mut prim = Prim::new(parent, name, PrimType::Shader)?;
    prim.add_attribute(token("info:id", id).uniform())?;
    Ok(prim)
}

fn input_type(slot: Slot) -> ValueType {
    match slot.kind() {
        SlotKind::Color => ValueType::scalar(BaseType::Color3f),
        SlotKind::Normal => ValueType::scalar(BaseType::Normal3f),
        SlotKind::Scalar | SlotKind::Occlusion => ValueType::scalar(BaseType::Float),
    }
}

fn slot_value(slot: Slot, value: SlotValue) -> Value {
    match value.for_slot(slot) {
        SlotValue::Color(c) => Value::Vec3f(c),
        SlotValue::Float(f) => Value::Float(f),
    }
}

fn output_type(channel: Channel) -> ValueType {
    match channel {
        Channel::Rgb => ValueType::scalar(BaseType::Float3),
        _ => ValueType::scalar(BaseType::Float),
    }
}

fn uv_reader(parent: &Path, primvar: &str) -> Result<Prim> {
    let mut reader = shader(parent, &format!("uvReader_{primvar}"), PRIMVAR_READER_ID)?;
    reader.add_attribute(token("inputs:varname", primvar))?;
    reader.add_attribute(Attribute::new("outputs:result", ValueType::scalar(BaseType::Float2)))?;
    Ok(reader)
}

fn texture_shader(parent: &Path, slot: Slot, texture: &TextureRef, fallback: SlotValue, reader: &Path) -> Result<Prim> {
    let mut tex = shader(parent, &slot.texture_prim_name(), UV_TEXTURE_ID)?;
    tex.add_attribute(
        Attribute::new("inputs:file", ValueType::scalar(BaseType::Asset)).with_default(Value::Asset(texture.asset.clone())),
    )?;
    tex.add_attribute(
        Attribute::new("inputs:st", ValueType::scalar(BaseType::Float2)).connect(reader.append_property("outputs:result")?),
    )?;
    tex.add_attribute(token("inputs:sourceColorSpace", if texture.srgb { "sRGB" } else { "raw" }))?;
    tex.add_attribute(token("inputs:wrapS", "repeat"))?;
    tex.add_attribute(token("inputs:wrapT", "repeat"))?;
    let fallback = match fallback.for_slot(slot) {
        SlotValue::Color(c) => c.extend(1.0),
        SlotValue::Float(f) => crate::util::Vec4::new(f, f, f, 1.0),
    };
    tex.add_attribute(
        Attribute::new("inputs:fallback", ValueType::scalar(BaseType::Float4)).with_default(Value::Vec4f(fallback)),
    )?;
    if let Some(scale) = texture.scale {
        tex.add_attribute(Attribute::new("inputs:scale", ValueType::scalar(BaseType::Float4)).with_default(Value::Vec4f(scale)))?;
    }
    if let Some(bias) = texture.bias {
        tex.add_attribute(Attribute::new("inputs:bias", ValueType::scalar(BaseType::Float4)).with_default(Value::Vec4f(bias)))?;
    }
    let output = format!("outputs:{}", texture.channel.output_name());
    tex.add_attribute(Attribute::new(output, output_type(texture.channel)))?;
    Ok(tex)
}

/// One Material prim with its surface, UV reader and texture shaders.
fn material_prim(scope: &Path, name: &str, material: &Material) -> Result<Prim> {
    let mut prim = Prim::new(scope, name, PrimType::Material)?;
    let mut surface = shader(&prim.path, SURFACE_SHADER, PREVIEW_SURFACE_ID)?;
    let mut readers: Vec<Prim> = Vec::new();
    let mut textures: Vec<Prim> = Vec::new();

    for (slot, input) in &material.inputs {
        let slot = *slot;
        let attr = Attribute::new(format!("inputs:{}", slot.input_name()), input_type(slot));
        let attr = match input {
            SlotInput::Constant(v) => attr.with_default(slot_value(slot, *v)),
            SlotInput::Texture { texture, fallback } => {
                let primvar = uv_primvar_name(texture.uv_set);
                let reader_name = format!("uvReader_{primvar}");
                let reader_path = match readers.iter().find(|r| r.name == reader_name) {
                    Some(r) => r.path.clone(),
                    None => {
                        let reader = uv_reader(&prim.path, &primvar)?;
                        let path = reader.path.clone();
                        readers.push(reader);
                        path
                    }
                };
                let tex = texture_shader(&prim.path, slot, texture, *fallback, &reader_path)?;
                let output = tex.property_path(&format!("outputs:{}", texture.channel.output_name()))?;
                textures.push(tex);
                attr.connect(output)
            }
        };
        surface.add_attribute(attr)?;
    }
    surface.add_attribute(Attribute::new("outputs:surface", ValueType::scalar(BaseType::Token)))?;

    let surface_output = surface.property_path("outputs:surface")?;
    prim.add_attribute(Attribute::new("outputs:surface", ValueType::scalar(BaseType::Token)).connect(surface_output))?;
    prim.add_child(surface)?;
    for reader in readers {
        prim.add_child(reader)?;
    }
    for tex in textures {
        prim.add_child(tex)?;
    }
    Ok(prim)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::Vec3;

    fn textured() -> Material {
        let mut m = Material::new("Wood Floor");
        m.set(Slot::Roughness, SlotInput::Constant(SlotValue::Float(0.4)));
        m.set(
            Slot::Diffuse,
            SlotInput::Texture {
                texture: TextureRef::new("textures/wood.png".into(), Slot::Diffuse, 0),
                fallback: SlotValue::Color(Vec3::splat(0.8)),
            },
        );
        m.set(
            Slot::Normal,
            SlotInput::Texture {
                texture: TextureRef::new("textures/wood_n.png".into(), Slot::Normal, 1),
                fallback: SlotValue::Color(Vec3::Z),
            },
        );
        m
    }

    #[test]
    fn test_material_layout() {
        let root: Path = "/Scene".parse().unwrap();
        let prims = MaterialPrims::build(&root, &BTreeMap::from([(MaterialId(0), textured())])).unwrap();
        assert_eq!(prims.path(MaterialId(0)).unwrap().as_str(), "/Scene/Materials/Wood_Floor");
        let scope = prims.into_scope().unwrap();
        let mat = &scope.children[0];
        let names: Vec<&str> = mat.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["PreviewSurface", "uvReader_st", "uvReader_st1", "diffuseTexture", "normalTexture"]);

        let surface = &mat.children[0];
        let diffuse = surface.attribute("inputs:diffuseColor").unwrap();
        assert_eq!(diffuse.type_name, ValueType::scalar(BaseType::Color3f));
        assert_eq!(diffuse.connections[0].as_str(), "/Scene/Materials/Wood_Floor/diffuseTexture.outputs:rgb");
        assert_eq!(surface.attribute("inputs:roughness").unwrap().default, Some(Value::Float(0.4)));

        let normal = &mat.children[4];
        assert_eq!(normal.attribute("inputs:sourceColorSpace").unwrap().default, Some(Value::Token("raw".into())));
        assert!(normal.attribute("inputs:scale").is_some());
        let st = normal.attribute("inputs:st").unwrap();
        assert_eq!(st.connections[0].as_str(), "/Scene/Materials/Wood_Floor/uvReader_st1.outputs:result");
    }

    #[test]
    fn test_dedup_by_digest() {
        let root: Path = "/Scene".parse().unwrap();
        let mut other = textured();
        other.name = "Copy".into();
        let prims =
            MaterialPrims::build(&root, &BTreeMap::from([(MaterialId(0), textured()), (MaterialId(3), other)])).unwrap();
        assert_eq!(prims.len(), 1);
        assert_eq!(prims.path(MaterialId(0)), prims.path(MaterialId(3)));
    }
}
