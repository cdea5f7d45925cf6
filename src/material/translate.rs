//! Host shader graphs to preview surface materials.
//!
//! Translation runs in two steps. [`MaterialTranslator::translate`] decides
//! per slot whether it is a constant, a direct image reference or a bake,
//! without rendering anything. Once the bakes have run,
//! [`MaterialTranslator::resolve`] turns the plan into a [`Material`] whose
//! textures are registered in the archive asset store.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;

use image::{ImageFormat, RgbaImage};
use tracing::{debug, trace};

use super::eval::{classify, Dependency};
use super::{Channel, Material, Slot, SlotInput, SlotValue, TextureRef};
use crate::bake::{BakeKey, BakeResults};
use crate::diagnostics::Warning;
use crate::host::{HostImage, HostMaterial, HostScene, ImageId, MaterialId, Principled, SocketValue};
use crate::usdz::AssetStore;
use crate::util::{Error, Result, Vec3};

/// Decision for one slot.
#[derive(Clone, Debug, PartialEq)]
pub enum PlannedInput {
    Constant(SlotValue),
    Image {
        image: ImageId,
        uv_set: usize,
        alpha: bool,
        fallback: SlotValue,
    },
    Bake { key: BakeKey, fallback: SlotValue },
}

/// A bake the material needs: evaluate `node.socket` of the material graph.
#[derive(Clone, Debug, PartialEq)]
pub struct BakePlan {
    pub key: BakeKey,
    pub node: usize,
    pub socket: String,
    pub default: SocketValue,
    pub uv_only: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TranslatedMaterial {
    pub id: MaterialId,
    pub name: String,
    pub inputs: Vec<(Slot, PlannedInput)>,
    pub bakes: Vec<BakePlan>,
    pub warnings: Vec<Warning>,
}

pub struct MaterialTranslator<'a> {
    scene: &'a dyn HostScene,
    resolution: u32,
    ao_samples: u32,
    uv_names: HashMap<MaterialId, Vec<String>>,
}

/// Socket default of the Principled BSDF for `slot`.
fn principled_constant(p: &Principled, slot: Slot) -> SlotValue {
    match slot {
        Slot::Diffuse => SlotValue::Color(p.base_color.truncate()),
        Slot::Emissive => SlotValue::Color(p.emission_color.truncate() * p.emission_strength),
        Slot::Metallic => SlotValue::Float(p.metallic),
        Slot::Roughness => SlotValue::Float(p.roughness),
        Slot::Opacity => SlotValue::Float(p.alpha),
        Slot::Clearcoat => SlotValue::Float(p.coat_weight),
        Slot::ClearcoatRoughness => SlotValue::Float(p.coat_roughness),
        Slot::Ior => SlotValue::Float(p.ior),
        Slot::Normal => SlotValue::Color(Vec3::Z),
        Slot::Occlusion => SlotValue::Float(1.0),
    }
}

fn socket_default(p: &Principled, slot: Slot) -> SocketValue {
    match principled_constant(p, slot) {
        SlotValue::Float(f) => SocketValue::Float(f),
        SlotValue::Color(c) if slot == Slot::Normal => SocketValue::Vector(c),
        SlotValue::Color(c) => SocketValue::Color(c.extend(1.0)),
    }
}

impl<'a> MaterialTranslator<'a> {
    pub fn new(scene: &'a dyn HostScene, resolution: u32, ao_samples: u32) -> Self {
        Self { scene, resolution, ao_samples, uv_names: HashMap::new() }
    }

    /// UV set names of the mesh representing `material` in bakes.
    pub fn set_uv_names(&mut self, material: MaterialId, names: Vec<String>) {
        self.uv_names.insert(material, names);
    }

    pub fn translate(
        &self,
        id: MaterialId,
        material: &HostMaterial,
        bake_enabled: bool,
        ao_enabled: bool,
    ) -> TranslatedMaterial {
        let mut out = TranslatedMaterial {
            id,
            name: material.name.clone(),
            inputs: Vec::new(),
            bakes: Vec::new(),
            warnings: Vec::new(),
        };
        let empty = Vec::new();
        let uv_names = self.uv_names.get(&id).unwrap_or(&empty);
        let graph = &material.graph;
        let (bsdf, principled) = match graph.output_bsdf() {
            Some((i, p)) => (Some(i), *p),
            None => (None, Principled::default()),
        };

        for slot in Slot::ALL {
            let Some(socket) = slot.socket_name() else {
                continue;
            };
            let constant = principled_constant(&principled, slot);
            let dependency = match bsdf {
                Some(node) => classify(graph, node, socket, uv_names),
                None => Dependency::Constant,
            };
            trace!(material = %material.name, %slot, ?dependency, "classified slot");
            let planned = match dependency {
                Dependency::Constant if slot == Slot::Normal => continue,
                Dependency::Constant => PlannedInput::Constant(constant),
                Dependency::Image { image, uv_set } => {
                    let alpha = bsdf
                        .and_then(|n| graph.input_link(n, socket))
                        .is_some_and(|l| l.from_socket == "Alpha");
                    PlannedInput::Image { image, uv_set, alpha, fallback: constant }
                }
                Dependency::Procedural { uv_only } if bake_enabled => {
                    let key = BakeKey {
                        material: id,
                        slot,
                        resolution: self.resolution,
                        samples: 1,
                    };
                    out.bakes.push(BakePlan {
                        key,
                        node: bsdf.unwrap_or_default(),
                        socket: socket.to_string(),
                        default: socket_default(&principled, slot),
                        uv_only,
                    });
                    PlannedInput::Bake { key, fallback: constant }
                }
                Dependency::Procedural { .. } if slot == Slot::Normal => continue,
                Dependency::Procedural { .. } => PlannedInput::Constant(constant),
                Dependency::Unsupported(kind) => {
                    out.warnings.push(Warning::UnsupportedNode { material: material.name.clone(), kind });
                    if slot == Slot::Normal {
                        continue;
                    }
                    PlannedInput::Constant(constant)
                }
            };
            out.inputs.push((slot, planned));
        }

        if ao_enabled {
            let key = BakeKey {
                material: id,
                slot: Slot::Occlusion,
                resolution: self.resolution,
                samples: self.ao_samples,
            };
            out.bakes.push(BakePlan {
                key,
                node: bsdf.unwrap_or_default(),
                socket: String::new(),
                default: SocketValue::Float(1.0),
                uv_only: false,
            });
            out.inputs.push((Slot::Occlusion, PlannedInput::Bake { key, fallback: SlotValue::Float(1.0) }));
        }
        debug!(material = %material.name, bakes = out.bakes.len(), "translated material");
        out
    }

    /// Turn a plan into a material, registering textures in `assets`.
    pub fn resolve(
        &self,
        plan: &TranslatedMaterial,
        bakes: &BakeResults,
        assets: &mut AssetStore,
        warnings: &mut Vec<Warning>,
    ) -> Material {
        let mut material = Material::new(&plan.name);
        let stem = crate::sdf::make_identifier(&plan.name);
        for (slot, planned) in &plan.inputs {
            let slot = *slot;
            let input = match planned {
                PlannedInput::Constant(v) => SlotInput::Constant(v.for_slot(slot)),
                PlannedInput::Image { image, uv_set, alpha, fallback } => {
                    match self.scene.image(*image).ok_or_else(|| Error::invalid("no such image")).and_then(source_bytes) {
                        Ok((bytes, ext)) => {
                            let hint = match self.scene.image(*image) {
                                Some(img) => crate::sdf::make_identifier(&img.name),
                                None => stem.clone(),
                            };
                            let asset = assets.add(&format!("textures/{hint}.{ext}"), bytes);
                            let mut texture = TextureRef::new(asset, slot, *uv_set);
                            if *alpha {
                                texture.channel = Channel::A;
                            }
                            if let Some(img) = self.scene.image(*image) {
                                texture.srgb = texture.srgb && img.srgb;
                            }
                            SlotInput::Texture { texture, fallback: fallback.for_slot(slot) }
                        }
                        Err(e) => {
                            let source = self
                                .scene
                                .image(*image)
                                .map(|i| i.path.as_ref().map(|p| p.display().to_string()).unwrap_or_else(|| i.name.clone()))
                                .unwrap_or_else(|| format!("image #{}", image.0));
                            debug!(error = %e, "texture source unavailable");
                            warnings.push(Warning::MissingTexture { material: plan.name.clone(), source });
                            if slot == Slot::Normal {
                                continue;
                            }
                            SlotInput::Constant(fallback.for_slot(slot))
                        }
                    }
                }
                PlannedInput::Bake { key, fallback } => match bakes.get(key) {
                    Some(Ok(baked)) => {
                        let name = format!("textures/{stem}_{}.png", slot.input_name());
                        let asset = assets.add(&name, baked.png.clone());
                        SlotInput::Texture {
                            texture: TextureRef::new(asset, slot, 0),
                            fallback: fallback.for_slot(slot),
                        }
                    }
                    Some(Err(e)) => {
                        warnings.push(Warning::BakeFailed {
                            material: plan.name.clone(),
                            slot: slot.to_string(),
                            detail: e.to_string(),
                        });
                        if matches!(slot, Slot::Normal | Slot::Occlusion) {
                            continue;
                        }
                        SlotInput::Constant(fallback.for_slot(slot))
                    }
                    None => {
                        if matches!(slot, Slot::Normal | Slot::Occlusion) {
                            continue;
                        }
                        SlotInput::Constant(fallback.for_slot(slot))
                    }
                },
            };
            material.set(slot, input);
        }
        material
    }
}

/// Encoded bytes of a host image plus the archive extension.
///
/// PNG and JPEG sources are kept as is; other formats are re-encoded as PNG.
pub fn source_bytes(image: &HostImage) -> Result<(Vec<u8>, &'static str)> {
    let bytes = match (&image.packed, &image.path) {
        (Some(data), _) => data.clone(),
        (None, Some(path)) => {
            if !path.exists() {
                return Err(Error::FileNotFound(path.clone()));
            }
            std::fs::read(path)?
        }
        (None, None) => return Err(Error::invalid(format!("image '{}' has no data", image.name))),
    };
    match image::guess_format(&bytes) {
        Ok(ImageFormat::Png) => Ok((bytes, "png")),
        Ok(ImageFormat::Jpeg) => Ok((bytes, "jpg")),
        _ => {
            let decoded = image::load_from_memory(&bytes)?;
            let mut out = Cursor::new(Vec::new());
            decoded.write_to(&mut out, ImageFormat::Png)?;
            Ok((out.into_inner(), "png"))
        }
    }
}

/// Decode a host image for graph evaluation.
pub fn decode_image(image: &HostImage) -> Result<Arc<RgbaImage>> {
    let (bytes, _) = source_bytes(image)?;
    Ok(Arc::new(image::load_from_memory(&bytes)?.to_rgba8()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bake::BakeError;
    use crate::host::{InMemoryScene, ShaderGraph, ShaderNode};
    use crate::util::Vec4;

    fn checker_material() -> HostMaterial {
        let mut graph = ShaderGraph::principled(Principled { roughness: 0.25, ..Default::default() });
        let c = graph.add_node(ShaderNode::Checker {
            color1: Vec4::ONE,
            color2: Vec4::new(0.0, 0.0, 0.0, 1.0),
            scale: 4.0,
        });
        graph.link(c, 0, "Base Color");
        HostMaterial { name: "Checker".into(), graph }
    }

    #[test]
    fn test_constants_without_bake() {
        let scene = InMemoryScene::new("Scene");
        let t = MaterialTranslator::new(&scene, 512, 16);
        let plan = t.translate(MaterialId(0), &checker_material(), false, false);
        assert!(plan.bakes.is_empty());
        let diffuse = plan.inputs.iter().find(|(s, _)| *s == Slot::Diffuse).unwrap();
        assert_eq!(diffuse.1, PlannedInput::Constant(SlotValue::Color(Vec3::splat(0.8))));
        assert!(plan.inputs.iter().all(|(s, _)| *s != Slot::Normal));
    }

    #[test]
    fn test_bake_plan_and_ao() {
        let scene = InMemoryScene::new("Scene");
        let t = MaterialTranslator::new(&scene, 512, 16);
        let plan = t.translate(MaterialId(2), &checker_material(), true, true);
        assert_eq!(plan.bakes.len(), 2);
        assert_eq!(plan.bakes[0].key.slot, Slot::Diffuse);
        assert_eq!(plan.bakes[0].key.resolution, 512);
        assert!(plan.bakes[0].uv_only);
        assert_eq!(plan.bakes[1].key.slot, Slot::Occlusion);
        assert_eq!(plan.bakes[1].key.samples, 16);
    }

    #[test]
    fn test_failed_bake_degrades() {
        let scene = InMemoryScene::new("Scene");
        let t = MaterialTranslator::new(&scene, 64, 1);
        let plan = t.translate(MaterialId(0), &checker_material(), true, false);
        let mut results = BakeResults::default();
        results.insert(plan.bakes[0].key, Err(BakeError::Unsupported("X".into())));
        let mut assets = AssetStore::new();
        let mut warnings = Vec::new();
        let m = t.resolve(&plan, &results, &mut assets, &mut warnings);
        assert_eq!(m.get(Slot::Diffuse), Some(&SlotInput::Constant(SlotValue::Color(Vec3::splat(0.8)))));
        assert!(matches!(warnings[0], Warning::BakeFailed { .. }));
        assert!(assets.is_empty());
    }

    #[test]
    fn test_missing_image_warns() {
        let mut scene = InMemoryScene::new("Scene");
        let img = scene.add_image(HostImage {
            name: "wood".into(),
            path: Some("/nonexistent/wood.png".into()),
            packed: None,
            srgb: true,
        });
        let mut graph = ShaderGraph::principled(Principled::default());
        let n = graph.add_node(ShaderNode::ImageTexture { image: img });
        graph.link(n, 0, "Base Color");
        let mat = HostMaterial { name: "Wood".into(), graph };
        let t = MaterialTranslator::new(&scene, 64, 1);
        let plan = t.translate(MaterialId(0), &mat, false, false);
        let mut assets = AssetStore::new();
        let mut warnings = Vec::new();
        let m = t.resolve(&plan, &BakeResults::default(), &mut assets, &mut warnings);
        assert!(matches!(m.get(Slot::Diffuse), Some(SlotInput::Constant(_))));
        assert!(matches!(warnings[0], Warning::MissingTexture { .. }));
    }
}
