//! Animation sampling.
//!
//! The sampler steps the host through a frame range in increasing order,
//! reading every requested target at each frame, and restores the original
//! frame when done. Evaluation may have side effects in the host, so frames
//! are never visited out of order and sampling never runs in parallel.

pub mod import;

use std::collections::HashMap;

use half::f16;
use tracing::{debug, info_span};

use crate::host::{FrameRange, HostScene, MeshId, NodeId, Trs};
use crate::sdf::{TimeSamples, Value};
use crate::util::{Error, Result};

/// What to sample at every frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleTarget {
    /// Parent-relative transform of a node.
    Transform(NodeId),
    /// Bone poses of an armature node.
    Joints(NodeId),
    /// Points of a deformed mesh.
    Points(MeshId),
}

/// Time-sampled joint channels of one armature.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct JointSamples {
    pub translations: TimeSamples,
    pub rotations: TimeSamples,
    pub scales: TimeSamples,
}

#[derive(Clone, Debug, Default)]
pub struct SampledAnimation {
    pub range: Option<FrameRange>,
    pub transforms: HashMap<NodeId, TimeSamples>,
    pub joints: HashMap<NodeId, JointSamples>,
    pub points: HashMap<MeshId, TimeSamples>,
}

impl SampledAnimation {
    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty() && self.joints.is_empty() && self.points.is_empty()
    }

    pub fn transform(&self, node: NodeId) -> Option<&TimeSamples> {
        self.transforms.get(&node)
    }
}

/// Split a pose into the joint channel arrays of a SkelAnimation.
pub fn pose_channels(pose: &[Trs]) -> (Value, Value, Value) {
    let translations = pose.iter().map(|t| t.translation).collect();
    let rotations = pose.iter().map(|t| t.rotation.normalize()).collect();
    let scales = pose
        .iter()
        .map(|t| [f16::from_f32(t.scale.x), f16::from_f32(t.scale.y), f16::from_f32(t.scale.z)])
        .collect();
    (
        Value::Vec3fArray(translations),
        Value::QuatfArray(rotations),
        Value::Vec3hArray(scales),
    )
}

pub struct AnimationSampler;

impl AnimationSampler {
    /// Sample one node's local transform over `range`.
    pub fn sample(scene: &mut dyn HostScene, node: NodeId, range: FrameRange) -> Result<TimeSamples> {
        let mut sampled = Self::sample_nodes(scene, &[SampleTarget::Transform(node)], range)?;
        Ok(sampled.transforms.remove(&node).unwrap_or_default())
    }

    /// Sample every target at each frame of `range`.
    pub fn sample_nodes(
        scene: &mut dyn HostScene,
        targets: &[SampleTarget],
        range: FrameRange,
    ) -> Result<SampledAnimation> {
        let _span = info_span!("sample", targets = targets.len()).entered();
        let mut out = SampledAnimation { range: Some(range), ..Default::default() };
        if targets.is_empty() {
            return Ok(out);
        }
        range.validate()?;

        let original = scene.current_frame();
        let frames = range.frames();
        let result = Self::sample_frames(scene, targets, &frames, &mut out);
        scene.set_frame(original);
        result?;

        debug!(frames = frames.len(), "sampled animation");
        Ok(out)
    }

    fn sample_frames(
        scene: &mut dyn HostScene,
        targets: &[SampleTarget],
        frames: &[f64],
        out: &mut SampledAnimation,
    ) -> Result<()> {
        for &frame in frames {
            scene.set_frame(frame);
            for target in targets {
                match *target {
                    SampleTarget::Transform(node) => {
                        let value = Value::Matrix4d(scene.local_transform(node));
                        push(out.transforms.entry(node).or_default(), frame, value, "transform")?;
                    }
                    SampleTarget::Joints(node) => {
                        let (t, r, s) = pose_channels(&scene.bone_pose(node));
                        let joints = out.joints.entry(node).or_default();
                        push(&mut joints.translations, frame, t, "translations")?;
                        push(&mut joints.rotations, frame, r, "rotations")?;
                        push(&mut joints.scales, frame, s, "scales")?;
                    }
                    SampleTarget::Points(mesh) => {
                        let points = scene
                            .mesh(mesh)
                            .map(|m| Value::Vec3fArray(m.points))
                            .ok_or_else(|| Error::invalid(format!("mesh {} disappeared while sampling", mesh.0)))?;
                        push(out.points.entry(mesh).or_default(), frame, points, "points")?;
                    }
                }
            }
        }
        Ok(())
    }
}

fn push(ts: &mut TimeSamples, frame: f64, value: Value, what: &str) -> Result<()> {
    ts.push(frame, value).map_err(|e| match e {
        Error::TimeSamples { detail, .. } => Error::TimeSamples { path: what.to_string(), detail },
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{InMemoryScene, NodeData, TransformKey};
    use crate::util::Vec3;

    fn animated_scene() -> (InMemoryScene, NodeId) {
        let mut scene = InMemoryScene::new("Scene");
        let id = scene.add_node("Cube", None, Trs::IDENTITY, NodeData::Empty);
        scene.scene_node_mut(id).unwrap().keys = vec![
            TransformKey { frame: 1.0, value: Trs::IDENTITY },
            TransformKey {
                frame: 5.0,
                value: Trs { translation: Vec3::new(4.0, 0.0, 0.0), ..Trs::IDENTITY },
            },
        ];
        scene.current_frame = Some(3.0);
        (scene, id)
    }

    #[test]
    fn test_sample_inclusive_range() {
        let (mut scene, id) = animated_scene();
        let ts = AnimationSampler::sample(&mut scene, id, FrameRange::new(1.0, 5.0, 2.0)).unwrap();
        assert_eq!(ts.times(), vec![1.0, 3.0, 5.0]);
        let last = ts.value_at(5.0).and_then(Value::as_matrix).unwrap();
        assert!((last.w_axis.x - 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_frame_restored() {
        let (mut scene, id) = animated_scene();
        AnimationSampler::sample(&mut scene, id, FrameRange::new(1.0, 4.0, 1.0)).unwrap();
        assert_eq!(scene.current_frame, Some(3.0));
    }

    #[test]
    fn test_uneven_step_hits_end() {
        let (mut scene, id) = animated_scene();
        let ts = AnimationSampler::sample(&mut scene, id, FrameRange::new(1.0, 4.0, 2.0)).unwrap();
        assert_eq!(ts.times(), vec![1.0, 3.0, 4.0]);
        assert!(ts.covers(1.0, 4.0, 2.0));
    }

    #[test]
    fn test_oversized_range_rejected() {
        let (mut scene, id) = animated_scene();
        let result = AnimationSampler::sample(&mut scene, id, FrameRange::new(1.0, 1e12, 1.0));
        assert!(matches!(result, Err(Error::InvalidOption { name: "frameRange", .. })));
        assert_eq!(scene.current_frame, Some(3.0));
    }

    #[test]
    fn test_pose_channels() {
        let (t, r, s) = pose_channels(&[Trs::IDENTITY, Trs::IDENTITY]);
        assert_eq!(t.len(), 2);
        assert_eq!(r.len(), 2);
        assert_eq!(s.as_half3_array().unwrap()[1][0].to_f32(), 1.0);
    }
}
