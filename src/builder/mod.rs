//! Stage assembly.
//!
//! [`StageBuilder`] turns a walk, the resolved materials and the sampled
//! animation into one stage:
//!
//! ```text
//! /<Root>                 Xform, kind = component, defaultPrim
//!   /<Root>/<Node>        Xform or SkelRoot with xformOp:transform
//!     /.../<MeshName>     Mesh, or an instanceable prim referencing the owner's Mesh
//!       /.../<Subset>     GeomSubset per material slot (familyName materialBind)
//!     /.../Skel           Skeleton, with /Anim SkelAnimation when animated
//!   /<Root>/Materials     Scope
//!     /<Mat>              Material
//!       /PreviewSurface   UsdPreviewSurface
//!       /uvReader_<st>    UsdPrimvarReader_float2
//!       /<slot>Texture    UsdUVTexture
//! ```
//!
//! Material prims are laid out before any mesh binds to them, so the
//! mesh to material to texture references form a DAG by construction.
//! [`ImportPlan`] is the inverse direction.

mod import;
mod mesh;
mod shade;
mod skel;

pub use import::{ImportPlan, Installed, PlannedData, PlannedNode};
pub use shade::MaterialPrims;

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, info_span};

use crate::anim::SampledAnimation;
use crate::diagnostics::Warning;
use crate::host::{HostScene, MaterialId, MeshId, NodeData, NodeId};
use crate::material::Material;
use crate::options::ExportOptions;
use crate::sdf::{Attribute, BaseType, Path, Prim, PrimType, Stage, TimeSamples, Value, ValueType};
use crate::util::{DMat4, DVec3, Error, Result};
use crate::walker::{MeshRole, WalkResult, WalkedNode};

/// Child of the root prim holding every Material.
pub const MATERIALS_SCOPE: &str = "Materials";
pub const TRANSFORM_OP: &str = "xformOp:transform";
pub const XFORM_OP_ORDER: &str = "xformOpOrder";

/// Builds the export stage. Recoverable problems are collected as warnings.
pub struct StageBuilder<'a> {
    scene: &'a dyn HostScene,
    warnings: Vec<Warning>,
}

impl<'a> StageBuilder<'a> {
    pub fn new(scene: &'a dyn HostScene) -> Self {
        Self { scene, warnings: Vec::new() }
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn take_warnings(&mut self) -> Vec<Warning> {
        std::mem::take(&mut self.warnings)
    }

    /// Assemble and validate the stage.
    pub fn build(
        &mut self,
        walk: &WalkResult,
        materials: &BTreeMap<MaterialId, Material>,
        animation: &SampledAnimation,
        options: &ExportOptions,
    ) -> Result<Stage> {
        let _span = info_span!("build", nodes = walk.len(), materials = materials.len()).entered();
        let mut stage = Stage::new();
        self.layer_metadata(&mut stage, animation, options);

        let root_name = walk.root_path.name().to_string();
        let root = stage.define_root(&root_name, PrimType::Xform)?;
        root.kind = Some("component".to_string());
        stage.metadata.default_prim = Some(root_name);

        let looks = if options.export_materials {
            MaterialPrims::build(&walk.root_path, materials)?
        } else {
            MaterialPrims::default()
        };

        let mut mesh_prims: HashMap<MeshId, Path> = HashMap::new();
        for node in &walk.nodes {
            let prim = self.node_prim(walk, node, &looks, animation, &mut mesh_prims)?;
            let parent = stage
                .prim_at_mut(&node.parent_path)
                .ok_or_else(|| Error::InvalidPath(format!("parent of {} was not built", node.path)))?;
            parent.add_child(prim)?;
        }

        if let Some(scope) = looks.into_scope() {
            let root = stage
                .prim_at_mut(&walk.root_path)
                .ok_or_else(|| Error::InvalidPath(walk.root_path.to_string()))?;
            root.add_child(scope)?;
        }

        stage.validate()?;
        debug!(prims = stage.prim_count(), warnings = self.warnings.len(), "stage built");
        Ok(stage)
    }

    fn layer_metadata(&self, stage: &mut Stage, animation: &SampledAnimation, options: &ExportOptions) {
        let md = &mut stage.metadata;
        md.doc = Some(format!("{} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")));
        md.up_axis = self.scene.up_axis().token().to_string();
        md.meters_per_unit = self.scene.meters_per_unit();
        if options.export_animations {
            if let Some(range) = animation.range {
                md.start_time_code = Some(range.start);
                md.end_time_code = Some(range.end.max(range.start));
                md.time_codes_per_second = Some(self.scene.fps());
                md.frames_per_second = Some(self.scene.fps());
            }
        }
    }

    fn node_prim(
        &mut self,
        walk: &WalkResult,
        node: &WalkedNode,
        looks: &MaterialPrims,
        animation: &SampledAnimation,
        mesh_prims: &mut HashMap<MeshId, Path>,
    ) -> Result<Prim> {
        let prim_type = if node.is_armature { PrimType::SkelRoot } else { PrimType::Xform };
        let mut prim = Prim::new(&node.parent_path, &node.name, prim_type)?;
        let samples = animation.transform(node.node);
        let scale = if node.is_root_level() { walk.global_scale } else { 1.0 };
        for attr in transform_attributes(node.local_transform, samples, scale)? {
            prim.add_attribute(attr)?;
        }

        let scene = self.scene;
        let data = scene.node(node.node).map(|n| &n.data);
        match data {
            Some(NodeData::Mesh { materials, armature, .. }) => {
                let bound: Vec<Option<&Path>> =
                    materials.iter().map(|m| m.and_then(|id| looks.path(id))).collect();
                if let Some(instance) = &node.mesh_instance {
                    match instance.role {
                        MeshRole::Owner => {
                            let skeleton = self.skeleton_for(walk, node, *armature);
                            if let Some(mesh_prim) = mesh::build_mesh(
                                scene,
                                node,
                                instance,
                                &bound,
                                skeleton,
                                animation,
                                &mut self.warnings,
                            )? {
                                mesh_prims.insert(instance.mesh, mesh_prim.path.clone());
                                prim.add_child(mesh_prim)?;
                            }
                        }
                        MeshRole::Instance { .. } => match mesh_prims.get(&instance.mesh) {
                            Some(target) => {
                                let owner_slot = walk
                                    .owner_of(instance.mesh)
                                    .and_then(|o| self.first_material(o.node))
                                    .and_then(|id| looks.path(id));
                                let own = bound.first().copied().flatten();
                                let rebind = own.filter(|p| Some(*p) != owner_slot);
                                let child = mesh::instance_prim(&prim.path, &instance.prim_name, target, rebind)?;
                                prim.add_child(child)?;
                            }
                            None => debug!(node = %node.name, "instance of a skipped mesh"),
                        },
                    }
                }
            }
            Some(NodeData::Armature(armature)) => {
                let skeleton = skel::skeleton_prim(&prim.path, armature, animation.joints.get(&node.node))?;
                prim.add_child(skeleton)?;
            }
            _ => {}
        }
        Ok(prim)
    }

    fn first_material(&self, node: NodeId) -> Option<MaterialId> {
        match self.scene.node(node).map(|n| &n.data) {
            Some(NodeData::Mesh { materials, .. }) => materials.first().copied().flatten(),
            _ => None,
        }
    }

    /// Skeleton binding for a skinned mesh node, or a warning when the
    /// armature is not an exported ancestor.
    fn skeleton_for(
        &mut self,
        walk: &WalkResult,
        node: &WalkedNode,
        armature: Option<NodeId>,
    ) -> Option<skel::SkinTarget> {
        let skinned = node
            .mesh_instance
            .as_ref()
            .and_then(|i| self.scene.mesh(i.mesh))
            .is_some_and(|m| m.skin.is_some());
        if !skinned {
            return None;
        }
        let target = armature
            .filter(|a| walk.is_ancestor(*a, node.node))
            .and_then(|a| walk.get(a))
            .filter(|a| a.is_armature);
        match target {
            Some(arm) => Some(skel::SkinTarget {
                skeleton: arm.path.append_child(crate::walker::SKELETON_PRIM_NAME).ok()?,
                geom_bind: arm.world_transform.inverse() * node.world_transform,
            }),
            None => {
                self.warnings.push(Warning::SkinWithoutArmature { node: node.name.clone() });
                None
            }
        }
    }
}

/// `xformOp:transform` plus its op order, pre-multiplied by a uniform `scale`.
///
/// Samples that never change are written as a constant.
pub fn transform_attributes(local: DMat4, samples: Option<&TimeSamples>, scale: f64) -> Result<Vec<Attribute>> {
    let pre = if scale == 1.0 { DMat4::IDENTITY } else { DMat4::from_scale(DVec3::splat(scale)) };
    let op = Attribute::new(TRANSFORM_OP, ValueType::scalar(BaseType::Matrix4d));
    let op = match samples.filter(|ts| !ts.is_constant()) {
        Some(ts) => {
            let mut scaled = TimeSamples::new();
            for (t, v) in ts.iter() {
                let m = v.as_matrix().ok_or_else(|| Error::TypeMismatch {
                    expected: "matrix4d".to_string(),
                    actual: v.kind_name().to_string(),
                })?;
                scaled.push(t, Value::Matrix4d(pre * *m))?;
            }
            op.with_samples(scaled)
        }
        None => {
            let constant = samples.and_then(TimeSamples::first).and_then(Value::as_matrix).copied().unwrap_or(local);
            op.with_default(Value::Matrix4d(pre * constant))
        }
    };
    let order = Attribute::new(XFORM_OP_ORDER, ValueType::array(BaseType::Token))
        .with_default(Value::TokenArray(vec![TRANSFORM_OP.to_string()]))
        .uniform();
    Ok(vec![op, order])
}
