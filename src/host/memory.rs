//! Serializable in-memory host scene.
//!
//! Nodes carry a rest transform plus optional TRS keyframes; armatures carry
//! per-bone tracks; meshes may carry point keys. Evaluation interpolates
//! linearly (slerp for rotations) and holds the first/last key outside the
//! keyed range.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::util::{DMat4, Result, Vec3};

use super::{
    Collection, FrameRange, HostImage, HostMaterial, HostNode, HostScene, ImageId, MaterialId,
    MeshData, MeshId, NewNode, NodeData, NodeId, SceneSettings, SceneSink, TransformKey, Trs,
    UpAxis,
};

/// Keyframes for one armature bone.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoneTrack {
    pub bone: usize,
    pub keys: Vec<TransformKey>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SceneNode {
    #[serde(flatten)]
    pub node: HostNode,
    #[serde(default)]
    pub transform: Trs,
    #[serde(default)]
    pub keys: Vec<TransformKey>,
    #[serde(default)]
    pub bone_tracks: Vec<BoneTrack>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InMemoryScene {
    pub name: String,
    #[serde(default)]
    pub frame_range: FrameRange,
    #[serde(default = "default_fps")]
    pub fps: f64,
    #[serde(default)]
    pub up_axis: UpAxis,
    #[serde(default = "default_meters")]
    pub meters_per_unit: f64,
    #[serde(default)]
    pub current_frame: Option<f64>,
    #[serde(default)]
    pub nodes: Vec<SceneNode>,
    #[serde(default)]
    pub meshes: Vec<MeshData>,
    #[serde(default)]
    pub materials: Vec<HostMaterial>,
    #[serde(default)]
    pub images: Vec<HostImage>,
    #[serde(default)]
    pub collections: Vec<Collection>,
}

fn default_fps() -> f64 {
    24.0
}

fn default_meters() -> f64 {
    1.0
}

impl InMemoryScene {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            frame_range: FrameRange::default(),
            fps: default_fps(),
            up_axis: UpAxis::default(),
            meters_per_unit: default_meters(),
            current_frame: None,
            nodes: Vec::new(),
            meshes: Vec::new(),
            materials: Vec::new(),
            images: Vec::new(),
            collections: Vec::new(),
        }
    }

    /// Load a scene document from JSON.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(crate::util::Error::FileNotFound(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    pub fn add_mesh(&mut self, mesh: MeshData) -> MeshId {
        self.meshes.push(mesh);
        MeshId(self.meshes.len() - 1)
    }

    pub fn add_material(&mut self, material: HostMaterial) -> MaterialId {
        self.materials.push(material);
        MaterialId(self.materials.len() - 1)
    }

    pub fn add_image(&mut self, image: HostImage) -> ImageId {
        self.images.push(image);
        ImageId(self.images.len() - 1)
    }

    /// Add a visible node with a rest transform.
    pub fn add_node(&mut self, name: &str, parent: Option<NodeId>, transform: Trs, data: NodeData) -> NodeId {
        self.nodes.push(SceneNode {
            node: HostNode { name: name.to_string(), parent, visible: true, data },
            transform,
            keys: Vec::new(),
            bone_tracks: Vec::new(),
        });
        NodeId(self.nodes.len() - 1)
    }

    pub fn add_collection(&mut self, collection: Collection) {
        self.collections.push(collection);
    }

    pub fn scene_node(&self, id: NodeId) -> Option<&SceneNode> {
        self.nodes.get(id.index())
    }

    pub fn scene_node_mut(&mut self, id: NodeId) -> Option<&mut SceneNode> {
        self.nodes.get_mut(id.index())
    }

    /// Find a node by name.
    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.nodes.iter().position(|n| n.node.name == name).map(NodeId)
    }

    fn frame(&self) -> f64 {
        self.current_frame.unwrap_or(self.frame_range.start)
    }
}

/// Evaluate a key list at `frame`, holding the end keys.
pub(crate) fn sample_keys(keys: &[TransformKey], frame: f64) -> Option<Trs> {
    let first = keys.first()?;
    if frame <= first.frame || keys.len() == 1 {
        return Some(first.value);
    }
    for pair in keys.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        if frame <= b.frame {
            let span = b.frame - a.frame;
            let t = if span > 0.0 { ((frame - a.frame) / span) as f32 } else { 1.0 };
            return Some(a.value.interpolate(&b.value, t));
        }
    }
    keys.last().map(|k| k.value)
}

fn sample_points(mesh: &MeshData, frame: f64) -> Option<Vec<Vec3>> {
    let keys = &mesh.point_keys;
    let first = keys.first()?;
    if frame <= first.frame || keys.len() == 1 {
        return Some(first.points.clone());
    }
    for pair in keys.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        if frame <= b.frame {
            if a.points.len() != b.points.len() {
                return Some(a.points.clone());
            }
            let span = b.frame - a.frame;
            let t = if span > 0.0 { ((frame - a.frame) / span) as f32 } else { 1.0 };
            return Some(a.points.iter().zip(&b.points).map(|(p, q)| p.lerp(*q, t)).collect());
        }
    }
    keys.last().map(|k| k.points.clone())
}

impl HostScene for InMemoryScene {
    fn name(&self) -> &str {
        &self.name
    }

    fn frame_range(&self) -> FrameRange {
        self.frame_range
    }

    fn fps(&self) -> f64 {
        self.fps
    }

    fn up_axis(&self) -> UpAxis {
        self.up_axis
    }

    fn meters_per_unit(&self) -> f64 {
        self.meters_per_unit
    }

    fn current_frame(&self) -> f64 {
        self.frame()
    }

    fn set_frame(&mut self, frame: f64) {
        self.current_frame = Some(frame);
    }

    fn root_nodes(&self) -> Vec<NodeId> {
        (0..self.nodes.len())
            .filter(|&i| self.nodes[i].node.parent.is_none())
            .map(NodeId)
            .collect()
    }

    fn node(&self, id: NodeId) -> Option<&HostNode> {
        self.nodes.get(id.index()).map(|n| &n.node)
    }

    fn children(&self, id: NodeId) -> Vec<NodeId> {
        (0..self.nodes.len())
            .filter(|&i| self.nodes[i].node.parent == Some(id))
            .map(NodeId)
            .collect()
    }

    fn collection(&self, name: &str) -> Option<&Collection> {
        self.collections.iter().find(|c| c.name == name)
    }

    fn local_transform(&self, id: NodeId) -> DMat4 {
        match self.nodes.get(id.index()) {
            Some(n) => sample_keys(&n.keys, self.frame()).unwrap_or(n.transform).to_matrix(),
            None => DMat4::IDENTITY,
        }
    }

    fn is_animated(&self, id: NodeId) -> bool {
        self.nodes
            .get(id.index())
            .is_some_and(|n| !n.keys.is_empty() || !n.bone_tracks.is_empty())
    }

    fn mesh(&self, id: MeshId) -> Option<MeshData> {
        let mesh = self.meshes.get(id.index())?;
        let mut out = mesh.clone();
        if let Some(points) = sample_points(mesh, self.frame()) {
            if points.len() == out.points.len() {
                out.points = points;
            }
        }
        Some(out)
    }

    fn is_deformed(&self, id: MeshId) -> bool {
        self.meshes.get(id.index()).is_some_and(MeshData::is_deformed)
    }

    fn material(&self, id: MaterialId) -> Option<&HostMaterial> {
        self.materials.get(id.index())
    }

    fn image(&self, id: ImageId) -> Option<&HostImage> {
        self.images.get(id.index())
    }

    fn bone_pose(&self, armature: NodeId) -> Vec<Trs> {
        let Some(node) = self.nodes.get(armature.index()) else {
            return Vec::new();
        };
        let Some(arm) = node.node.armature() else {
            return Vec::new();
        };
        let frame = self.frame();
        arm.bones
            .iter()
            .enumerate()
            .map(|(i, bone)| {
                node.bone_tracks
                    .iter()
                    .find(|t| t.bone == i)
                    .and_then(|t| sample_keys(&t.keys, frame))
                    .unwrap_or(bone.rest)
            })
            .collect()
    }
}

impl SceneSink for InMemoryScene {
    fn configure(&mut self, settings: SceneSettings) {
        self.up_axis = settings.up_axis;
        self.meters_per_unit = settings.meters_per_unit;
        if let Some(range) = settings.frame_range {
            self.frame_range = range;
        }
        if let Some(fps) = settings.fps {
            self.fps = fps;
        }
    }

    fn add_image(&mut self, image: HostImage) -> ImageId {
        InMemoryScene::add_image(self, image)
    }

    fn add_material(&mut self, material: HostMaterial) -> MaterialId {
        InMemoryScene::add_material(self, material)
    }

    fn add_mesh(&mut self, mesh: MeshData) -> MeshId {
        InMemoryScene::add_mesh(self, mesh)
    }

    fn add_node(&mut self, node: NewNode) -> NodeId {
        InMemoryScene::add_node(self, &node.name, node.parent, node.transform, node.data)
    }

    fn set_transform_keys(&mut self, node: NodeId, keys: Vec<TransformKey>) {
        if let Some(n) = self.nodes.get_mut(node.index()) {
            n.keys = keys;
        }
    }

    fn set_bone_keys(&mut self, node: NodeId, bone: usize, keys: Vec<TransformKey>) {
        if let Some(n) = self.nodes.get_mut(node.index()) {
            n.bone_tracks.retain(|t| t.bone != bone);
            n.bone_tracks.push(BoneTrack { bone, keys });
        }
    }
}
