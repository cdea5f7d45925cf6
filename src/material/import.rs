//! Preview surface materials back into host shader graphs.

use std::collections::HashMap;

use tracing::debug;

use super::{uv_set_from_primvar, Channel, Slot};
use crate::diagnostics::Warning;
use crate::host::{HostImage, HostMaterial, ImageId, Principled, ShaderGraph, ShaderNode};
use crate::sdf::{Path, Prim, Stage, Value};
use crate::util::{Result, Vec3, Vec4};

pub const PREVIEW_SURFACE_ID: &str = "UsdPreviewSurface";
pub const UV_TEXTURE_ID: &str = "UsdUVTexture";
pub const PRIMVAR_READER_ID: &str = "UsdPrimvarReader_float2";

/// Images referenced by imported materials, one per archive asset.
///
/// Ids handed out are table indices; the import plan remaps them to host
/// ids when installing.
#[derive(Debug, Default)]
pub struct ImageTable {
    pub images: Vec<HostImage>,
    by_asset: HashMap<String, usize>,
}

impl ImageTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern the asset at `path`, loading its bytes through `lookup`.
    pub fn intern(
        &mut self,
        path: &str,
        srgb: bool,
        lookup: &dyn Fn(&str) -> Option<Vec<u8>>,
    ) -> Option<ImageId> {
        if let Some(&i) = self.by_asset.get(path) {
            return Some(ImageId(i));
        }
        let data = lookup(path)?;
        let name = path
            .rsplit('/')
            .next()
            .and_then(|f| f.rsplit_once('.').map(|(stem, _)| stem))
            .unwrap_or(path)
            .to_string();
        self.images.push(HostImage { name, path: None, packed: Some(data), srgb });
        let i = self.images.len() - 1;
        self.by_asset.insert(path.to_string(), i);
        Some(ImageId(i))
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

/// The surface shader of a Material prim.
fn surface_shader<'s>(stage: &'s Stage, material: &'s Prim) -> Option<&'s Prim> {
    let connected = material
        .attribute("outputs:surface")
        .and_then(|a| a.connections.first())
        .and_then(|p| stage.prim_at(&p.prim_path()));
    connected.or_else(|| {
        material
            .children
            .iter()
            .find(|c| c.shader_id() == Some(PREVIEW_SURFACE_ID))
    })
}

/// Texture shader and output channel an input is connected to.
fn connected_texture<'s>(stage: &'s Stage, target: &Path) -> Option<(&'s Prim, Channel)> {
    let shader = stage.prim_at(&target.prim_path())?;
    if shader.shader_id() != Some(UV_TEXTURE_ID) {
        return None;
    }
    let channel = target
        .name()
        .strip_prefix("outputs:")
        .and_then(Channel::from_output_name)
        .unwrap_or(Channel::Rgb);
    Some((shader, channel))
}

fn uv_set_name(stage: &Stage, texture: &Prim) -> Option<String> {
    let reader = texture
        .attribute("inputs:st")
        .and_then(|a| a.connections.first())
        .and_then(|p| stage.prim_at(&p.prim_path()))?;
    let varname = reader.attribute("inputs:varname")?.default.as_ref()?;
    varname.as_token().or_else(|| varname.as_str()).map(str::to_string)
}

fn set_constant(p: &mut Principled, slot: Slot, value: &Value) {
    let color = value.as_vec3();
    let float = value.as_f32();
    match slot {
        Slot::Diffuse => {
            if let Some(c) = color {
                p.base_color = c.extend(1.0);
            }
        }
        Slot::Emissive => {
            if let Some(c) = color {
                p.emission_color = c.extend(1.0);
                p.emission_strength = if c == Vec3::ZERO { 0.0 } else { 1.0 };
            }
        }
        Slot::Metallic => p.metallic = float.unwrap_or(p.metallic),
        Slot::Roughness => p.roughness = float.unwrap_or(p.roughness),
        Slot::Opacity => p.alpha = float.unwrap_or(p.alpha),
        Slot::Clearcoat => p.coat_weight = float.unwrap_or(p.coat_weight),
        Slot::ClearcoatRoughness => p.coat_roughness = float.unwrap_or(p.coat_roughness),
        Slot::Ior => p.ior = float.unwrap_or(p.ior),
        Slot::Normal | Slot::Occlusion => {}
    }
}

/// Rebuild a host material from a Material prim.
///
/// Texture inputs become image texture nodes whose images are interned in
/// `images`; assets missing from the archive fall back to the texture's
/// `inputs:fallback` value and produce a warning.
pub fn material_from_prim(
    stage: &Stage,
    material: &Prim,
    images: &mut ImageTable,
    lookup: &dyn Fn(&str) -> Option<Vec<u8>>,
    warnings: &mut Vec<Warning>,
) -> Result<HostMaterial> {
    let mut principled = Principled::default();
    let mut textures: Vec<(Slot, ImageId, Channel, Option<String>)> = Vec::new();

    if let Some(surface) = surface_shader(stage, material) {
        for slot in Slot::ALL {
            let Some(attr) = surface.attribute(&format!("inputs:{}", slot.input_name())) else {
                continue;
            };
            let texture = attr.connections.first().and_then(|t| connected_texture(stage, t));
            match texture {
                Some((tex, channel)) => {
                    let file = tex
                        .attribute("inputs:file")
                        .and_then(|a| a.default.as_ref())
                        .and_then(|v| match v {
                            Value::Asset(s) => Some(s.as_str()),
                            _ => None,
                        });
                    let srgb = tex
                        .attribute("inputs:sourceColorSpace")
                        .and_then(|a| a.default.as_ref())
                        .and_then(Value::as_token)
                        .map_or(slot.kind() == super::SlotKind::Color, |cs| cs == "sRGB");
                    match file.and_then(|f| images.intern(f, srgb, lookup)) {
                        Some(image) => textures.push((slot, image, channel, uv_set_name(stage, tex))),
                        None => {
                            warnings.push(Warning::SkippedAsset {
                                name: file.unwrap_or_default().to_string(),
                                detail: format!("texture of {} in {} not in archive", slot, material.path),
                            });
                            if let Some(fallback) = tex
                                .attribute("inputs:fallback")
                                .and_then(|a| a.default.as_ref())
                                .and_then(Value::as_vec4)
                            {
                                let v = match channel {
                                    Channel::Rgb => Value::Vec3f(fallback.truncate()),
                                    Channel::A => Value::Float(fallback.w),
                                    _ => Value::Float(fallback.x),
                                };
                                set_constant(&mut principled, slot, &v);
                            }
                        }
                    }
                }
                None => {
                    if let Some(v) = attr.default.as_ref() {
                        set_constant(&mut principled, slot, v);
                    }
                }
            }
        }
    } else {
        debug!(path = %material.path, "material without surface shader");
    }

    let mut graph = ShaderGraph::principled(principled);
    for (slot, image, channel, uv_name) in textures {
        let Some(socket) = slot.socket_name() else {
            continue;
        };
        let tex = graph.add_node(ShaderNode::ImageTexture { image });
        if let Some(name) = uv_name.filter(|n| uv_set_from_primvar(n) != Some(0)) {
            let uv = graph.add_node(ShaderNode::UvMap { uv_set: name });
            graph.link_socket(uv, "UV", tex, "Vector");
        }
        let out = if channel == Channel::A { "Alpha" } else { "Color" };
        if slot == Slot::Normal {
            let nm = graph.add_node(ShaderNode::NormalMap {
                strength: 1.0,
                color: Vec4::new(0.5, 0.5, 1.0, 1.0),
            });
            graph.link_socket(tex, out, nm, "Color");
            graph.link_socket(nm, "Normal", 0, socket);
        } else {
            graph.link_socket(tex, out, 0, socket);
        }
        if slot == Slot::Emissive {
            if let Some(ShaderNode::PrincipledBsdf(p)) = graph.nodes.first_mut() {
                p.emission_strength = 1.0;
            }
        }
    }
    Ok(HostMaterial { name: material.name.clone(), graph })
}

/// Point image texture nodes at host ids.
pub fn remap_images(graph: &mut ShaderGraph, ids: &[ImageId]) {
    for node in &mut graph.nodes {
        if let ShaderNode::ImageTexture { image } = node {
            if let Some(id) = ids.get(image.index()) {
                *image = *id;
            }
        }
    }
}
