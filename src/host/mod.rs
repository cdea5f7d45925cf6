//! Host application interface.
//!
//! Export reads a scene through [`HostScene`], which exposes the node
//! hierarchy, evaluated geometry and frame control. Import writes new data
//! through [`SceneSink`]. [`InMemoryScene`] implements both and serves as
//! the reference host for tests and the command line tool.

mod graph;
mod memory;
mod types;

pub use graph::*;
pub use memory::{BoneTrack, InMemoryScene, SceneNode};
pub use types::*;

use crate::util::DMat4;

/// Read access plus frame control over a live host scene.
///
/// Evaluation depends on the current frame; callers that change it with
/// [`HostScene::set_frame`] are responsible for restoring it.
pub trait HostScene {
    fn name(&self) -> &str;

    fn frame_range(&self) -> FrameRange;

    fn fps(&self) -> f64;

    fn up_axis(&self) -> UpAxis;

    fn meters_per_unit(&self) -> f64;

    fn current_frame(&self) -> f64;

    /// Move the scene to `frame`, re-evaluating animated state.
    fn set_frame(&mut self, frame: f64);

    /// Top-level nodes in host order.
    fn root_nodes(&self) -> Vec<NodeId>;

    fn node(&self, id: NodeId) -> Option<&HostNode>;

    /// Direct children in host order.
    fn children(&self, id: NodeId) -> Vec<NodeId>;

    fn collection(&self, name: &str) -> Option<&Collection>;

    /// Parent-relative transform at the current frame.
    fn local_transform(&self, id: NodeId) -> DMat4;

    /// Whether the node's transform or pose is driven by keyframes.
    fn is_animated(&self, id: NodeId) -> bool;

    /// Mesh evaluated at the current frame.
    fn mesh(&self, id: MeshId) -> Option<MeshData>;

    /// Whether the mesh's points change over time.
    fn is_deformed(&self, id: MeshId) -> bool;

    fn material(&self, id: MaterialId) -> Option<&HostMaterial>;

    fn image(&self, id: ImageId) -> Option<&HostImage>;

    /// Parent-relative bone transforms of an armature at the current frame.
    fn bone_pose(&self, armature: NodeId) -> Vec<Trs>;
}

/// Scene-wide settings applied on import.
#[derive(Clone, Debug, PartialEq)]
pub struct SceneSettings {
    pub up_axis: UpAxis,
    pub meters_per_unit: f64,
    pub frame_range: Option<FrameRange>,
    pub fps: Option<f64>,
}

/// Write access used by import. Every call is infallible; validation happens
/// before anything reaches the sink.
pub trait SceneSink {
    fn configure(&mut self, settings: SceneSettings);

    fn add_image(&mut self, image: HostImage) -> ImageId;

    fn add_material(&mut self, material: HostMaterial) -> MaterialId;

    fn add_mesh(&mut self, mesh: MeshData) -> MeshId;

    fn add_node(&mut self, node: NewNode) -> NodeId;

    fn set_transform_keys(&mut self, node: NodeId, keys: Vec<TransformKey>);

    fn set_bone_keys(&mut self, node: NodeId, bone: usize, keys: Vec<TransformKey>);
}
