//! Stages back into host scenes.
//!
//! Import runs in two phases. [`ImportPlan::from_stage`] reads the whole
//! stage into plain host records and fails without side effects;
//! [`ImportPlan::install`] then hands the records to a [`SceneSink`] and
//! cannot fail, so a broken file never leaves a partial scene behind.
//!
//! An Xform's first Mesh child (or instance of one) and its Skeleton child
//! are folded into the node itself, which inverts the export layout.

use std::collections::HashMap;

use tracing::{debug, info_span, warn};

use super::mesh::{MATERIAL_BINDING, MATERIAL_FAMILY};
use super::skel::ANIMATION_PRIM_NAME;
use super::{MATERIALS_SCOPE, TRANSFORM_OP};
use crate::anim::import::{joint_tracks, transform_keys};
use crate::diagnostics::Warning;
use crate::host::{
    Armature, Bone, FrameRange, HostImage, HostMaterial, MeshData, NewNode, NodeData, NodeId, PointKey,
    SceneSettings, SceneSink, SkinWeights, TransformKey, Trs, UpAxis, UvSet,
};
use crate::material::import::{material_from_prim, remap_images, ImageTable};
use crate::options::ImportOptions;
use crate::sdf::{validate_mesh, Path, Prim, PrimType, Specifier, Stage, Value};
use crate::util::{compose, DMat4, Error, Quat, Result, Vec3};

/// What a planned node carries; indices address the plan's tables.
#[derive(Clone, Debug, PartialEq)]
pub enum PlannedData {
    Empty,
    Mesh {
        mesh: usize,
        materials: Vec<Option<usize>>,
        armature: Option<usize>,
    },
    Armature(Armature),
}

#[derive(Clone, Debug, PartialEq)]
pub struct PlannedNode {
    pub name: String,
    /// Index of the parent node; always lower than this node's index.
    pub parent: Option<usize>,
    pub transform: Trs,
    pub data: PlannedData,
    pub keys: Vec<TransformKey>,
    pub bone_keys: Vec<(usize, Vec<TransformKey>)>,
}

/// Host records decoded from one stage, ready to install.
#[derive(Clone, Debug)]
pub struct ImportPlan {
    pub settings: SceneSettings,
    pub images: Vec<HostImage>,
    pub materials: Vec<HostMaterial>,
    pub meshes: Vec<MeshData>,
    pub nodes: Vec<PlannedNode>,
    pub warnings: Vec<Warning>,
}

/// Host ids handed out while installing, in plan order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Installed {
    pub nodes: Vec<NodeId>,
    pub meshes: usize,
    pub materials: usize,
    pub images: usize,
}

impl ImportPlan {
    /// Plan a stage without archive assets; textures fall back to constants.
    pub fn from_stage(stage: &Stage, options: &ImportOptions) -> Result<Self> {
        Self::from_stage_with_assets(stage, options, &|_| None)
    }

    /// Plan a stage, loading texture assets through `lookup`.
    pub fn from_stage_with_assets(
        stage: &Stage,
        options: &ImportOptions,
        lookup: &dyn Fn(&str) -> Option<Vec<u8>>,
    ) -> Result<Self> {
        let _span = info_span!("plan", prims = stage.prim_count()).entered();
        stage.validate()?;
        let mut planner = Planner {
            stage,
            options,
            lookup,
            images: ImageTable::new(),
            materials: Vec::new(),
            material_index: HashMap::new(),
            meshes: Vec::new(),
            mesh_index: HashMap::new(),
            nodes: Vec::new(),
            skeleton_node: HashMap::new(),
            warnings: Vec::new(),
        };
        if options.materials {
            planner.plan_materials()?;
        }
        for root in &stage.root_prims {
            if is_wrapper(stage, root) {
                for child in &root.children {
                    planner.visit(child, None)?;
                }
            } else {
                planner.visit(root, None)?;
            }
        }
        debug!(nodes = planner.nodes.len(), meshes = planner.meshes.len(), "import planned");
        Ok(Self {
            settings: settings(stage),
            images: planner.images.images,
            materials: planner.materials,
            meshes: planner.meshes,
            nodes: planner.nodes,
            warnings: planner.warnings,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Create everything in `sink`.
    pub fn install(self, sink: &mut dyn SceneSink) -> Installed {
        let _span = info_span!("install", nodes = self.nodes.len()).entered();
        sink.configure(self.settings);
        let images: Vec<_> = self.images.into_iter().map(|i| sink.add_image(i)).collect();
        let materials: Vec<_> = self
            .materials
            .into_iter()
            .map(|mut m| {
                remap_images(&mut m.graph, &images);
                sink.add_material(m)
            })
            .collect();
        let meshes: Vec<_> = self.meshes.into_iter().map(|m| sink.add_mesh(m)).collect();

        let mut nodes: Vec<NodeId> = Vec::with_capacity(self.nodes.len());
        for planned in self.nodes {
            let data = match planned.data {
                PlannedData::Empty => NodeData::Empty,
                PlannedData::Armature(a) => NodeData::Armature(a),
                PlannedData::Mesh { mesh, materials: slots, armature } => match meshes.get(mesh) {
                    Some(&mesh) => NodeData::Mesh {
                        mesh,
                        materials: slots.iter().map(|s| s.and_then(|i| materials.get(i).copied())).collect(),
                        armature: armature.and_then(|a| nodes.get(a).copied()),
                    },
                    None => NodeData::Empty,
                },
            };
            let id = sink.add_node(NewNode {
                name: planned.name,
                parent: planned.parent.and_then(|p| nodes.get(p).copied()),
                transform: planned.transform,
                data,
            });
            if !planned.keys.is_empty() {
                sink.set_transform_keys(id, planned.keys);
            }
            for (bone, keys) in planned.bone_keys {
                sink.set_bone_keys(id, bone, keys);
            }
            nodes.push(id);
        }
        Installed { nodes, meshes: meshes.len(), materials: materials.len(), images: images.len() }
    }
}

fn settings(stage: &Stage) -> SceneSettings {
    let md = &stage.metadata;
    let frame_range = match (md.start_time_code, md.end_time_code) {
        (Some(start), Some(end)) => Some(FrameRange::new(start, end, 1.0)),
        (Some(start), None) => Some(FrameRange::new(start, start, 1.0)),
        _ => None,
    };
    SceneSettings {
        up_axis: UpAxis::from_token(&md.up_axis),
        meters_per_unit: md.meters_per_unit,
        frame_range,
        fps: md.time_codes_per_second.or(md.frames_per_second),
    }
}

/// Whether `prim` is the export's container prim rather than a scene node.
fn is_wrapper(stage: &Stage, prim: &Prim) -> bool {
    stage.default_prim().is_some_and(|d| std::ptr::eq(d, prim))
        && prim.prim_type == PrimType::Xform
        && prim.attribute(TRANSFORM_OP).is_none()
        && !has_xform_ops(prim)
}

fn has_xform_ops(prim: &Prim) -> bool {
    prim.attributes().any(|a| a.name.starts_with("xformOp:"))
}

fn held<'p>(prim: &'p Prim, name: &str) -> Option<&'p Value> {
    let attr = prim.attribute(name)?;
    attr.default.as_ref().or_else(|| attr.time_samples.as_ref().and_then(|t| t.first()))
}

/// Local transform from `xformOp:transform`, or from translate/orient/scale ops.
fn local_transform(prim: &Prim) -> DMat4 {
    if let Some(m) = held(prim, TRANSFORM_OP).and_then(Value::as_matrix) {
        return *m;
    }
    let translation = held(prim, "xformOp:translate").and_then(Value::as_vec3).unwrap_or(Vec3::ZERO);
    let rotation = match held(prim, "xformOp:orient") {
        Some(Value::Quatf(q)) => *q,
        _ => Quat::IDENTITY,
    };
    let scale = held(prim, "xformOp:scale").and_then(Value::as_vec3).unwrap_or(Vec3::ONE);
    compose(translation, rotation, scale)
}

fn int_list(value: Option<&Value>) -> Option<Vec<u32>> {
    value?.as_int_array()?.iter().map(|&i| u32::try_from(i).ok()).collect()
}

/// Expand per-point values to one value per face corner.
fn face_varying<T: Copy>(values: &[T], mesh: &MeshData, interp: Option<&str>) -> Option<Vec<T>> {
    match interp {
        Some("vertex") | Some("varying") if values.len() == mesh.points.len() => {
            mesh.face_indices.iter().map(|&i| values.get(i as usize).copied()).collect()
        }
        _ if values.len() == mesh.face_indices.len() => Some(values.to_vec()),
        _ if values.len() == mesh.points.len() => {
            mesh.face_indices.iter().map(|&i| values.get(i as usize).copied()).collect()
        }
        _ => None,
    }
}

struct Planner<'s> {
    stage: &'s Stage,
    options: &'s ImportOptions,
    lookup: &'s dyn Fn(&str) -> Option<Vec<u8>>,
    images: ImageTable,
    materials: Vec<HostMaterial>,
    material_index: HashMap<Path, usize>,
    meshes: Vec<MeshData>,
    /// Planned mesh per Mesh prim; `None` marks prims skipped as invalid.
    mesh_index: HashMap<Path, Option<usize>>,
    nodes: Vec<PlannedNode>,
    skeleton_node: HashMap<Path, usize>,
    warnings: Vec<Warning>,
}

impl<'s> Planner<'s> {
    fn plan_materials(&mut self) -> Result<()> {
        for prim in self.stage.traverse() {
            if prim.prim_type != PrimType::Material || !prim.active {
                continue;
            }
            let material = material_from_prim(self.stage, prim, &mut self.images, self.lookup, &mut self.warnings)?;
            self.material_index.insert(prim.path.clone(), self.materials.len());
            self.materials.push(material);
        }
        Ok(())
    }

    fn skip(&mut self, prim: &Prim, reason: &str) {
        debug!(path = %prim.path, reason, "prim skipped");
        self.warnings.push(Warning::SkippedPrim { path: prim.path.to_string(), reason: reason.to_string() });
    }

    fn push_node(&mut self, prim: &Prim, parent: Option<usize>, data: PlannedData) -> usize {
        let keys = match prim.attribute(TRANSFORM_OP).and_then(|a| a.time_samples.as_ref()) {
            Some(ts) if self.options.animations && !ts.is_empty() => transform_keys(ts),
            _ => Vec::new(),
        };
        self.nodes.push(PlannedNode {
            name: prim.name.clone(),
            parent,
            transform: Trs::from_matrix(&local_transform(prim)),
            data,
            keys,
            bone_keys: Vec::new(),
        });
        self.nodes.len() - 1
    }

    fn visit(&mut self, prim: &'s Prim, parent: Option<usize>) -> Result<()> {
        if !prim.active || prim.specifier != Specifier::Def {
            debug!(path = %prim.path, "inactive or non-def prim ignored");
            return Ok(());
        }
        match prim.prim_type {
            PrimType::Material | PrimType::Shader | PrimType::GeomSubset | PrimType::SkelAnimation => {
                return Ok(());
            }
            PrimType::Scope if prim.name == MATERIALS_SCOPE || is_material_scope(prim) => return Ok(()),
            PrimType::Mesh => {
                let data = self.mesh_data(prim, prim, parent)?;
                let index = self.push_node(prim, parent, data.unwrap_or(PlannedData::Empty));
                return self.visit_children(prim, Some(index), None);
            }
            PrimType::Skeleton => {
                let armature = self.armature(prim);
                let index = self.push_node(prim, parent, PlannedData::Armature(armature));
                self.finish_skeleton(prim, index);
                return Ok(());
            }
            _ => {}
        }

        if prim.prim_type == PrimType::Typeless && !prim.references.is_empty() {
            let data = self.instance_data(prim, parent)?;
            let index = self.push_node(prim, parent, data.unwrap_or(PlannedData::Empty));
            return self.visit_children(prim, Some(index), None);
        }

        // Fold one data child into the node.
        let folded = prim.children.iter().find(|c| {
            c.active
                && c.specifier == Specifier::Def
                && (c.prim_type == PrimType::Skeleton
                    || c.prim_type == PrimType::Mesh
                    || (c.prim_type == PrimType::Typeless && !c.references.is_empty() && c.children.is_empty()))
        });
        let index = self.push_node(prim, parent, PlannedData::Empty);
        if let Some(child) = folded {
            let data = match child.prim_type {
                PrimType::Skeleton => {
                    self.finish_skeleton(child, index);
                    Some(PlannedData::Armature(self.armature(child)))
                }
                PrimType::Mesh => self.mesh_data(child, prim, Some(index))?,
                _ => self.instance_data(child, Some(index))?,
            };
            if let Some(data) = data {
                self.nodes[index].data = data;
            }
            if child.prim_type == PrimType::Mesh {
                for grandchild in &child.children {
                    if grandchild.prim_type != PrimType::GeomSubset {
                        self.visit(grandchild, Some(index))?;
                    }
                }
            }
        }
        self.visit_children(prim, Some(index), folded)
    }

    fn visit_children(&mut self, prim: &'s Prim, parent: Option<usize>, folded: Option<&Prim>) -> Result<()> {
        for child in &prim.children {
            if folded.is_some_and(|f| std::ptr::eq(f, child)) {
                continue;
            }
            self.visit(child, parent)?;
        }
        Ok(())
    }

    /// Bone records and joint animation of a Skeleton prim at node `index`.
    fn finish_skeleton(&mut self, skel: &Prim, index: usize) {
        self.skeleton_node.insert(skel.path.clone(), index);
        if !self.options.animations {
            return;
        }
        let joints = skeleton_joints(skel);
        let anim = skel
            .relationship("skel:animationSource")
            .and_then(|r| r.targets.first())
            .and_then(|p| self.stage.prim_at(p))
            .or_else(|| skel.child(ANIMATION_PRIM_NAME))
            .filter(|a| a.prim_type == PrimType::SkelAnimation);
        if let Some(anim) = anim {
            self.nodes[index].bone_keys = joint_tracks(anim, &joints);
        }
    }

    fn armature(&self, skel: &Prim) -> Armature {
        let joints = skeleton_joints(skel);
        let rest = held(skel, "restTransforms").and_then(Value::as_matrix_array);
        let bind = held(skel, "bindTransforms").and_then(Value::as_matrix_array);
        let bones = joints
            .iter()
            .enumerate()
            .map(|(i, joint)| {
                let parent = joint.rsplit_once('/').and_then(|(p, _)| joints.iter().position(|j| j == p));
                let local = match (rest.and_then(|r| r.get(i)), bind) {
                    (Some(m), _) => *m,
                    (None, Some(b)) => match (b.get(i), parent.and_then(|p| b.get(p))) {
                        (Some(m), Some(pm)) => pm.inverse() * *m,
                        (Some(m), None) => *m,
                        _ => DMat4::IDENTITY,
                    },
                    _ => DMat4::IDENTITY,
                };
                Bone {
                    name: joint.rsplit('/').next().unwrap_or(joint).to_string(),
                    parent,
                    rest: Trs::from_matrix(&local),
                }
            })
            .collect();
        Armature { bones }
    }

    /// Instance prim data: share the referenced prim's mesh.
    fn instance_data(&mut self, prim: &Prim, node: Option<usize>) -> Result<Option<PlannedData>> {
        let Some(target_path) = prim.references.first() else {
            return Ok(None);
        };
        let target = self.stage.prim_at(target_path).ok_or_else(|| Error::DanglingReference {
            from: prim.path.to_string(),
            to: target_path.to_string(),
        })?;
        if target.prim_type != PrimType::Mesh {
            self.skip(prim, "reference to a non-mesh prim");
            return Ok(None);
        }
        let mut data = self.mesh_data(target, prim, node)?;
        if let (Some(PlannedData::Mesh { materials, .. }), Some(own)) = (&mut data, self.binding(prim)) {
            match materials.first_mut() {
                Some(first) => *first = Some(own),
                None => materials.push(Some(own)),
            }
        }
        Ok(data)
    }

    fn binding(&self, prim: &Prim) -> Option<usize> {
        let target = prim.relationship(MATERIAL_BINDING)?.targets.first()?;
        self.material_index.get(target).copied()
    }

    /// Mesh data for a Mesh prim, planned once per prim and shared by its
    /// instances. `owner` is the prim carrying the node's bindings.
    fn mesh_data(&mut self, prim: &Prim, owner: &Prim, node: Option<usize>) -> Result<Option<PlannedData>> {
        let mesh = match self.mesh_index.get(&prim.path) {
            Some(&planned) => planned,
            None => {
                let planned = match self.read_mesh(prim) {
                    Some(mesh) => {
                        self.meshes.push(mesh);
                        Some(self.meshes.len() - 1)
                    }
                    None => None,
                };
                self.mesh_index.insert(prim.path.clone(), planned);
                planned
            }
        };
        let Some(mesh) = mesh else {
            return Ok(None);
        };

        let mut materials = Vec::new();
        if self.options.materials {
            materials.push(self.binding(prim).or_else(|| self.binding(owner)));
            for subset in material_subsets(prim) {
                materials.push(self.binding(subset));
            }
            if materials.iter().all(Option::is_none) {
                materials.clear();
            }
        }

        let has_skin = self.meshes.get(mesh).is_some_and(|m| m.skin.is_some());
        let armature = if has_skin { self.skin_target(prim, owner, node) } else { None };
        Ok(Some(PlannedData::Mesh { mesh, materials, armature }))
    }

    /// Node of the Skeleton a skinned mesh binds to, searching the mesh then its ancestors.
    fn skin_target(&mut self, prim: &Prim, owner: &Prim, node: Option<usize>) -> Option<usize> {
        let mut target = prim
            .relationship("skel:skeleton")
            .or_else(|| owner.relationship("skel:skeleton"))
            .and_then(|r| r.targets.first().cloned());
        if target.is_none() {
            target = prim
                .path
                .ancestors()
                .iter()
                .filter_map(|p| self.stage.prim_at(p))
                .find_map(|p| p.relationship("skel:skeleton").and_then(|r| r.targets.first().cloned()));
        }
        let found = target.as_ref().and_then(|t| self.skeleton_node.get(t).copied());
        match found {
            Some(index) if node.map_or(true, |n| index <= n) => Some(index),
            _ => {
                warn!(path = %prim.path, "skinned mesh without a preceding skeleton");
                self.warnings.push(Warning::SkinWithoutArmature { node: owner.name.clone() });
                None
            }
        }
    }

    fn read_mesh(&mut self, prim: &Prim) -> Option<MeshData> {
        let points = held(prim, "points").and_then(Value::as_vec3_array).map(<[Vec3]>::to_vec);
        let counts = int_list(held(prim, "faceVertexCounts"));
        let indices = int_list(held(prim, "faceVertexIndices"));
        let (Some(points), Some(face_counts), Some(face_indices)) = (points, counts, indices) else {
            self.skip(prim, "incomplete mesh topology");
            return None;
        };
        let signed = |v: &[u32]| v.iter().map(|&x| x as i32).collect::<Vec<_>>();
        if let Err(e) = validate_mesh(points.len(), &signed(&face_counts), &signed(&face_indices)) {
            self.skip(prim, &e.to_string());
            return None;
        }

        let mut mesh = MeshData { name: prim.name.clone(), points, face_counts, face_indices, ..Default::default() };
        let normals = prim.attribute("normals").or_else(|| prim.attribute("primvars:normals"));
        if let Some(attr) = normals {
            mesh.normals = attr
                .default
                .as_ref()
                .and_then(Value::as_vec3_array)
                .and_then(|n| face_varying(n, &mesh, attr.interpolation.as_deref()));
        }

        let mut uv_sets: Vec<(usize, UvSet)> = Vec::new();
        for attr in prim.attributes() {
            let Some(name) = attr.name.strip_prefix("primvars:") else {
                continue;
            };
            let Some(values) = attr.default.as_ref().and_then(Value::as_vec2_array) else {
                continue;
            };
            let Some(values) = face_varying(values, &mesh, attr.interpolation.as_deref()) else {
                debug!(path = %prim.path, primvar = name, "uv primvar with unexpected length");
                continue;
            };
            let order = crate::material::uv_set_from_primvar(name).unwrap_or(usize::MAX);
            uv_sets.push((order, UvSet { name: name.to_string(), values }));
        }
        uv_sets.sort_by_key(|(order, _)| *order);
        mesh.uv_sets = uv_sets.into_iter().map(|(_, set)| set).collect();

        let subsets = material_subsets(prim);
        if !subsets.is_empty() {
            let mut slots = vec![0u32; mesh.face_count()];
            for (slot, subset) in subsets.iter().enumerate() {
                for face in int_list(held(subset, "indices")).unwrap_or_default() {
                    if let Some(s) = slots.get_mut(face as usize) {
                        *s = slot as u32 + 1;
                    }
                }
            }
            mesh.material_indices = slots;
        }

        mesh.skin = read_skin(prim, mesh.points.len());
        if self.options.animations {
            if let Some(ts) = prim.attribute("points").and_then(|a| a.time_samples.as_ref()) {
                mesh.point_keys = ts
                    .iter()
                    .filter_map(|(frame, v)| {
                        v.as_vec3_array()
                            .filter(|p| p.len() == mesh.points.len())
                            .map(|p| PointKey { frame, points: p.to_vec() })
                    })
                    .collect();
            }
        }
        Some(mesh)
    }
}

fn is_material_scope(prim: &Prim) -> bool {
    !prim.children.is_empty() && prim.children.iter().all(|c| c.prim_type == PrimType::Material)
}

fn material_subsets(prim: &Prim) -> Vec<&Prim> {
    prim.children
        .iter()
        .filter(|c| c.prim_type == PrimType::GeomSubset)
        .filter(|c| held(c, "familyName").and_then(Value::as_token) == Some(MATERIAL_FAMILY))
        .collect()
}

fn skeleton_joints(skel: &Prim) -> Vec<String> {
    held(skel, "joints").and_then(Value::as_token_array).map(<[String]>::to_vec).unwrap_or_default()
}

fn read_skin(prim: &Prim, point_count: usize) -> Option<SkinWeights> {
    let indices_attr = prim.attribute("primvars:skel:jointIndices")?;
    let weights_attr = prim.attribute("primvars:skel:jointWeights")?;
    let indices = indices_attr.default.as_ref()?.as_int_array()?;
    let weights = weights_attr.default.as_ref()?.as_float_array()?;
    let size = indices_attr.element_size.unwrap_or(1).max(1) as usize;
    if indices.len() != weights.len() || indices.len() != point_count * size {
        return None;
    }
    let influences = indices
        .chunks(size)
        .zip(weights.chunks(size))
        .map(|(i, w)| {
            i.iter()
                .zip(w)
                .filter(|(_, w)| **w > 0.0)
                .filter_map(|(&j, &w)| u16::try_from(j).ok().map(|j| (j, w)))
                .collect()
        })
        .collect();
    Some(SkinWeights { influences })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{InMemoryScene, MeshId};
    use crate::sdf::{Attribute, BaseType, Relationship, TimeSamples, ValueType};

    fn triangle(prim: &mut Prim) {
        prim.add_attribute(
            Attribute::new("points", ValueType::array(BaseType::Point3f))
                .with_default(Value::Vec3fArray(vec![Vec3::ZERO, Vec3::X, Vec3::Y])),
        )
        .unwrap();
        prim.add_attribute(
            Attribute::new("faceVertexCounts", ValueType::array(BaseType::Int)).with_default(Value::IntArray(vec![3])),
        )
        .unwrap();
        prim.add_attribute(
            Attribute::new("faceVertexIndices", ValueType::array(BaseType::Int))
                .with_default(Value::IntArray(vec![0, 1, 2])),
        )
        .unwrap();
    }

    fn exported_layout() -> Stage {
        let mut stage = Stage::new();
        stage.metadata.default_prim = Some("Scene".into());
        stage.metadata.start_time_code = Some(1.0);
        stage.metadata.end_time_code = Some(3.0);
        stage.metadata.time_codes_per_second = Some(30.0);
        let root = stage.define_root("Scene", PrimType::Xform).unwrap();
        root.kind = Some("component".into());

        let a = root.define_child("A", PrimType::Xform).unwrap();
        let mut ts = TimeSamples::new();
        ts.push(1.0, Value::Matrix4d(DMat4::IDENTITY)).unwrap();
        ts.push(3.0, Value::Matrix4d(DMat4::from_translation(crate::util::DVec3::X))).unwrap();
        a.add_attribute(Attribute::new(TRANSFORM_OP, ValueType::scalar(BaseType::Matrix4d)).with_samples(ts))
            .unwrap();
        let mesh = a.define_child("Tri", PrimType::Mesh).unwrap();
        triangle(mesh);
        mesh.add_relationship(Relationship::new(MATERIAL_BINDING, vec!["/Scene/Materials/M".parse().unwrap()]))
            .unwrap();

        let b = root.define_child("B", PrimType::Xform).unwrap();
        let inst = b.define_child("Tri", PrimType::Typeless).unwrap();
        inst.instanceable = true;
        inst.references.push("/Scene/A/Tri".parse().unwrap());

        let looks = root.define_child(MATERIALS_SCOPE, PrimType::Scope).unwrap();
        looks.define_child("M", PrimType::Material).unwrap();
        stage
    }

    #[test]
    fn test_plan_folds_meshes_and_instances() {
        let plan = ImportPlan::from_stage(&exported_layout(), &ImportOptions::default()).unwrap();
        assert_eq!(plan.nodes.len(), 2);
        assert_eq!(plan.meshes.len(), 1);
        assert_eq!(plan.materials.len(), 1);
        assert_eq!(plan.nodes[0].name, "A");
        assert_eq!(plan.nodes[0].keys.len(), 2);
        assert_eq!(
            plan.nodes[0].data,
            PlannedData::Mesh { mesh: 0, materials: vec![Some(0)], armature: None }
        );
        assert!(matches!(plan.nodes[1].data, PlannedData::Mesh { mesh: 0, .. }));
        assert_eq!(plan.settings.frame_range, Some(FrameRange::new(1.0, 3.0, 1.0)));
        assert_eq!(plan.settings.fps, Some(30.0));
    }

    #[test]
    fn test_plan_respects_options() {
        let options = ImportOptions { materials: false, animations: false };
        let plan = ImportPlan::from_stage(&exported_layout(), &options).unwrap();
        assert!(plan.materials.is_empty());
        assert!(plan.nodes[0].keys.is_empty());
        assert_eq!(plan.nodes[0].data, PlannedData::Mesh { mesh: 0, materials: vec![], armature: None });
    }

    #[test]
    fn test_dangling_instance_is_fatal() {
        let mut stage = exported_layout();
        let b = stage.prim_at_mut(&"/Scene/B/Tri".parse().unwrap()).unwrap();
        b.references = vec!["/Scene/Nowhere".parse().unwrap()];
        assert!(matches!(
            ImportPlan::from_stage(&stage, &ImportOptions::default()),
            Err(Error::DanglingReference { .. })
        ));
    }

    #[test]
    fn test_invalid_mesh_skipped_with_warning() {
        let mut stage = exported_layout();
        let tri = stage.prim_at_mut(&"/Scene/A/Tri".parse().unwrap()).unwrap();
        tri.attribute_mut("faceVertexIndices").unwrap().default = Some(Value::IntArray(vec![0, 1, 7]));
        let plan = ImportPlan::from_stage(&stage, &ImportOptions::default()).unwrap();
        assert!(plan.meshes.is_empty());
        assert_eq!(plan.nodes[0].data, PlannedData::Empty);
        assert!(matches!(plan.warnings[0], Warning::SkippedPrim { .. }));
    }

    #[test]
    fn test_install() {
        let plan = ImportPlan::from_stage(&exported_layout(), &ImportOptions::default()).unwrap();
        let mut scene = InMemoryScene::new("Imported");
        let installed = plan.install(&mut scene);
        assert_eq!(installed.nodes.len(), 2);
        assert_eq!(scene.meshes.len(), 1);
        assert_eq!(scene.fps, 30.0);
        let b = scene.scene_node(installed.nodes[1]).unwrap();
        assert_eq!(b.node.mesh(), Some(MeshId(0)));
        assert_eq!(scene.scene_node(installed.nodes[0]).unwrap().keys.len(), 2);
    }

    #[test]
    fn test_skeleton_bones() {
        let mut stage = Stage::new();
        let rig = stage.define_root("Rig", PrimType::SkelRoot).unwrap();
        let skel = rig.define_child("Skel", PrimType::Skeleton).unwrap();
        skel.add_attribute(
            Attribute::new("joints", ValueType::array(BaseType::Token))
                .with_default(Value::TokenArray(vec!["Hips".into(), "Hips/Spine".into()])),
        )
        .unwrap();
        skel.add_attribute(
            Attribute::new("bindTransforms", ValueType::array(BaseType::Matrix4d)).with_default(Value::Matrix4dArray(
                vec![
                    DMat4::from_translation(crate::util::DVec3::Y),
                    DMat4::from_translation(crate::util::DVec3::new(0.0, 3.0, 0.0)),
                ],
            )),
        )
        .unwrap();
        let plan = ImportPlan::from_stage(&stage, &ImportOptions::default()).unwrap();
        let PlannedData::Armature(armature) = &plan.nodes[0].data else {
            panic!("expected an armature");
        };
        assert_eq!(armature.bones[1].name, "Spine");
        assert_eq!(armature.bones[1].parent, Some(0));
        assert!((armature.bones[1].rest.translation.y - 2.0).abs() < 1e-6);
    }
}
