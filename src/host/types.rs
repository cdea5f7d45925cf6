//! Plain data records exchanged with the host application.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::util::{compose, BBox3f, DMat4, Error, Quat, Result, Vec2, Vec3};

use super::ShaderGraph;

macro_rules! id_type {
    ($(#[$m:meta])* $name:ident) => {
        $(#[$m])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub usize);

        impl $name {
            #[inline]
            pub fn index(self) -> usize {
                self.0
            }
        }
    };
}

id_type!(
    /// Scene node handle.
    NodeId
);
id_type!(
    /// Mesh datablock handle; nodes sharing a `MeshId` are instances.
    MeshId
);
id_type!(MaterialId);
id_type!(ImageId);

/// Scene axis pointing up.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpAxis {
    Y,
    #[default]
    Z,
}

impl UpAxis {
    pub fn token(self) -> &'static str {
        match self {
            Self::Y => "Y",
            Self::Z => "Z",
        }
    }

    pub fn from_token(s: &str) -> Self {
        if s.eq_ignore_ascii_case("y") { Self::Y } else { Self::Z }
    }
}

/// Inclusive frame range and sampling step.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrameRange {
    pub start: f64,
    pub end: f64,
    #[serde(default = "default_step")]
    pub step: f64,
}

fn default_step() -> f64 {
    1.0
}

impl FrameRange {
    pub fn new(start: f64, end: f64, step: f64) -> Self {
        Self { start, end, step }
    }

    pub fn frames(&self) -> Vec<f64> {
        crate::sdf::frame_times(self.start, self.end, self.step)
    }

    /// Reject non-finite bounds and ranges longer than [`MAX_FRAMES`].
    pub fn validate(&self) -> Result<()> {
        let invalid = |detail: String| Error::InvalidOption { name: "frameRange", detail };
        if !(self.start.is_finite() && self.end.is_finite() && self.step.is_finite()) {
            return Err(invalid(format!("non-finite range {}..{} step {}", self.start, self.end, self.step)));
        }
        let step = if self.step > 0.0 { self.step } else { 1.0 };
        let count = ((self.end - self.start) / step).floor();
        if count >= MAX_FRAMES as f64 {
            return Err(invalid(format!(
                "{}..{} step {} exceeds {MAX_FRAMES} frames",
                self.start, self.end, self.step
            )));
        }
        Ok(())
    }
}

/// Most frames a single export samples.
pub const MAX_FRAMES: usize = 100_000;

impl Default for FrameRange {
    fn default() -> Self {
        Self { start: 1.0, end: 250.0, step: 1.0 }
    }
}

/// Translation / rotation / scale triple.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Trs {
    #[serde(default)]
    pub translation: Vec3,
    #[serde(default = "identity_quat")]
    pub rotation: Quat,
    #[serde(default = "unit_scale")]
    pub scale: Vec3,
}

fn identity_quat() -> Quat {
    Quat::IDENTITY
}

fn unit_scale() -> Vec3 {
    Vec3::ONE
}

impl Trs {
    pub const IDENTITY: Self = Self {
        translation: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    pub fn to_matrix(&self) -> DMat4 {
        compose(self.translation, self.rotation, self.scale)
    }

    pub fn from_matrix(m: &DMat4) -> Self {
        let (translation, rotation, scale) = crate::util::decompose(m);
        Self { translation, rotation, scale }
    }

    /// Component-wise interpolation (lerp for translation and scale, slerp
    /// for rotation).
    pub fn interpolate(&self, other: &Self, t: f32) -> Self {
        Self {
            translation: self.translation.lerp(other.translation, t),
            rotation: self.rotation.slerp(other.rotation, t),
            scale: self.scale.lerp(other.scale, t),
        }
    }
}

impl Default for Trs {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// A transform keyframe.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransformKey {
    pub frame: f64,
    #[serde(flatten)]
    pub value: Trs,
}

/// One named, face-varying UV set.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UvSet {
    pub name: String,
    pub values: Vec<Vec2>,
}

/// Per-point joint influences; joint indices address the armature's bones.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SkinWeights {
    pub influences: Vec<Vec<(u16, f32)>>,
}

impl SkinWeights {
    /// Largest number of influences on any point.
    pub fn max_influences(&self) -> usize {
        self.influences.iter().map(Vec::len).max().unwrap_or(0)
    }
}

/// Point positions at one frame.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PointKey {
    pub frame: f64,
    pub points: Vec<Vec3>,
}

/// Polygon mesh datablock.
///
/// `normals` and every UV set are face-varying (one entry per face vertex).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshData {
    pub name: String,
    pub points: Vec<Vec3>,
    pub face_counts: Vec<u32>,
    pub face_indices: Vec<u32>,
    #[serde(default)]
    pub normals: Option<Vec<Vec3>>,
    #[serde(default)]
    pub uv_sets: Vec<UvSet>,
    /// Per-face material slot index; empty means slot 0 everywhere.
    #[serde(default)]
    pub material_indices: Vec<u32>,
    #[serde(default)]
    pub skin: Option<SkinWeights>,
    /// Shape keys of a deformed mesh.
    #[serde(default)]
    pub point_keys: Vec<PointKey>,
}

impl MeshData {
    pub fn face_count(&self) -> usize {
        self.face_counts.len()
    }

    pub fn bounds(&self) -> BBox3f {
        BBox3f::from_points(&self.points)
    }

    /// Fan triangulation as index triples into `face_indices` positions.
    pub fn triangles(&self) -> Vec<[usize; 3]> {
        let mut tris = Vec::new();
        let mut base = 0usize;
        for &count in &self.face_counts {
            let count = count as usize;
            for i in 1..count.saturating_sub(1) {
                tris.push([base, base + i, base + i + 1]);
            }
            base += count;
        }
        tris
    }

    /// Face index owning each triangle of [`Self::triangles`].
    pub fn triangle_faces(&self) -> Vec<usize> {
        let mut out = Vec::new();
        for (face, &count) in self.face_counts.iter().enumerate() {
            for _ in 1..(count as usize).saturating_sub(1) {
                out.push(face);
            }
        }
        out
    }

    /// Material slot of `face`; 0 when no per-face slots are stored.
    pub fn face_material(&self, face: usize) -> usize {
        self.material_indices.get(face).copied().unwrap_or(0) as usize
    }

    /// Whether the mesh has point keys.
    pub fn is_deformed(&self) -> bool {
        !self.point_keys.is_empty()
    }
}

/// Armature bone in rest position.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bone {
    pub name: String,
    #[serde(default)]
    pub parent: Option<usize>,
    /// Rest transform relative to the parent bone.
    pub rest: Trs,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Armature {
    pub bones: Vec<Bone>,
}

impl Armature {
    /// Joint path tokens (`Hips/Spine/Head`) in bone order.
    pub fn joint_paths(&self) -> Vec<String> {
        (0..self.bones.len()).map(|i| self.joint_path(i)).collect()
    }

    fn joint_path(&self, bone: usize) -> String {
        let mut names = vec![crate::sdf::make_identifier(&self.bones[bone].name)];
        let mut cur = self.bones[bone].parent;
        let mut guard = 0;
        while let Some(p) = cur {
            if p >= self.bones.len() || guard > self.bones.len() {
                break;
            }
            names.push(crate::sdf::make_identifier(&self.bones[p].name));
            cur = self.bones[p].parent;
            guard += 1;
        }
        names.reverse();
        names.join("/")
    }

    /// Rest transforms in armature space.
    pub fn bind_transforms(&self) -> Vec<DMat4> {
        self.world_transforms(&self.bones.iter().map(|b| b.rest.to_matrix()).collect::<Vec<_>>())
    }

    /// Accumulate parent-relative transforms into armature space.
    /// Bones must be ordered parents first.
    pub fn world_transforms(&self, locals: &[DMat4]) -> Vec<DMat4> {
        let mut out: Vec<DMat4> = Vec::with_capacity(locals.len());
        for (i, local) in locals.iter().enumerate() {
            let world = match self.bones.get(i).and_then(|b| b.parent) {
                Some(p) if p < out.len() => out[p] * *local,
                _ => *local,
            };
            out.push(world);
        }
        out
    }
}

/// What a node carries.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum NodeData {
    #[default]
    Empty,
    Mesh {
        mesh: MeshId,
        #[serde(default)]
        materials: Vec<Option<MaterialId>>,
        /// Armature node deforming this mesh.
        #[serde(default)]
        armature: Option<NodeId>,
    },
    Armature(Armature),
    /// Node kinds the exporter does not translate (lights, cameras...).
    Other { kind: String },
}

/// Static node description as the host reports it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HostNode {
    pub name: String,
    #[serde(default)]
    pub parent: Option<NodeId>,
    #[serde(default = "default_true")]
    pub visible: bool,
    #[serde(default)]
    pub data: NodeData,
}

pub(crate) fn default_true() -> bool {
    true
}

impl HostNode {
    pub fn mesh(&self) -> Option<MeshId> {
        match &self.data {
            NodeData::Mesh { mesh, .. } => Some(*mesh),
            _ => None,
        }
    }

    pub fn armature(&self) -> Option<&Armature> {
        match &self.data {
            NodeData::Armature(a) => Some(a),
            _ => None,
        }
    }
}

/// Image source: an on-disk path, packed bytes, or both.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HostImage {
    pub name: String,
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub packed: Option<Vec<u8>>,
    /// Colour data (sRGB) as opposed to non-colour data.
    #[serde(default = "default_true")]
    pub srgb: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HostMaterial {
    pub name: String,
    pub graph: ShaderGraph,
}

/// A named set of nodes, possibly nested.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub name: String,
    #[serde(default)]
    pub objects: Vec<NodeId>,
    #[serde(default)]
    pub children: Vec<String>,
}

/// Node to create on import.
#[derive(Clone, Debug, PartialEq)]
pub struct NewNode {
    pub name: String,
    pub parent: Option<NodeId>,
    pub transform: Trs,
    pub data: NodeData,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_triangulation() {
        let mesh = MeshData {
            face_counts: vec![4, 3],
            face_indices: vec![0, 1, 2, 3, 0, 2, 4],
            ..Default::default()
        };
        assert_eq!(mesh.triangles(), vec![[0, 1, 2], [0, 2, 3], [4, 5, 6]]);
        assert_eq!(mesh.triangle_faces(), vec![0, 0, 1]);
    }

    #[test]
    fn test_joint_paths() {
        let arm = Armature {
            bones: vec![
                Bone { name: "Hips".into(), parent: None, rest: Trs::IDENTITY },
                Bone { name: "Spine".into(), parent: Some(0), rest: Trs::IDENTITY },
                Bone { name: "Head.L".into(), parent: Some(1), rest: Trs::IDENTITY },
            ],
        };
        assert_eq!(arm.joint_paths(), vec!["Hips", "Hips/Spine", "Hips/Spine/Head_L"]);
    }

    #[test]
    fn test_frame_range_limits() {
        assert!(FrameRange::default().validate().is_ok());
        assert!(FrameRange::new(5.0, 1.0, 1.0).validate().is_ok());
        assert!(FrameRange::new(0.0, 1e12, 1.0).validate().is_err());
        assert!(FrameRange::new(0.0, 10.0, 1e-9).validate().is_err());
        assert!(FrameRange::new(0.0, f64::INFINITY, 1.0).validate().is_err());
        assert!(FrameRange::new(f64::NAN, 1.0, 1.0).validate().is_err());
    }

    #[test]
    fn test_world_transforms() {
        let arm = Armature {
            bones: vec![
                Bone {
                    name: "A".into(),
                    parent: None,
                    rest: Trs { translation: Vec3::X, ..Trs::IDENTITY },
                },
                Bone {
                    name: "B".into(),
                    parent: Some(0),
                    rest: Trs { translation: Vec3::Y, ..Trs::IDENTITY },
                },
            ],
        };
        let world = arm.bind_transforms();
        let t = world[1].w_axis.truncate();
        assert!((t - crate::util::DVec3::new(1.0, 1.0, 0.0)).length() < 1e-9);
    }
}
