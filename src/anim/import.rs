//! Time samples back into host keyframes.

use crate::host::{TransformKey, Trs};
use crate::sdf::{Attribute, Prim, TimeSamples, Value};
use crate::util::{decompose, Quat, Vec3};

/// Decompose time-sampled matrices into TRS keys.
pub fn transform_keys(samples: &TimeSamples) -> Vec<TransformKey> {
    samples
        .iter()
        .filter_map(|(frame, v)| {
            v.as_matrix().map(|m| {
                let (translation, rotation, scale) = decompose(m);
                TransformKey { frame, value: Trs { translation, rotation, scale } }
            })
        })
        .collect()
}

fn channel_times(attr: Option<&Attribute>, out: &mut Vec<f64>) {
    if let Some(ts) = attr.and_then(|a| a.time_samples.as_ref()) {
        out.extend(ts.times());
    }
}

/// Per-joint keys from a SkelAnimation prim.
///
/// Joint tokens of the animation are matched against `skeleton_joints`;
/// unknown joints are ignored. Returns `(joint index, keys)` pairs.
pub fn joint_tracks(anim: &Prim, skeleton_joints: &[String]) -> Vec<(usize, Vec<TransformKey>)> {
    let Some(joints) = anim
        .attribute("joints")
        .and_then(|a| a.default.as_ref())
        .and_then(Value::as_token_array)
    else {
        return Vec::new();
    };
    let translations = anim.attribute("translations");
    let rotations = anim.attribute("rotations");
    let scales = anim.attribute("scales");

    let mut times = Vec::new();
    channel_times(translations, &mut times);
    channel_times(rotations, &mut times);
    channel_times(scales, &mut times);
    times.sort_by(f64::total_cmp);
    times.dedup();
    if times.is_empty() {
        return Vec::new();
    }

    let mut tracks: Vec<(usize, Vec<TransformKey>)> = joints
        .iter()
        .filter_map(|j| skeleton_joints.iter().position(|s| s == j))
        .map(|idx| (idx, Vec::with_capacity(times.len())))
        .collect();
    let anim_index: Vec<usize> = joints
        .iter()
        .enumerate()
        .filter(|(_, j)| skeleton_joints.contains(j))
        .map(|(i, _)| i)
        .collect();

    for &time in &times {
        let t = translations.and_then(|a| a.value_at(time)).and_then(Value::as_vec3_array);
        let r = rotations.and_then(|a| a.value_at(time)).and_then(Value::as_quat_array);
        let s = scales.and_then(|a| a.value_at(time)).and_then(Value::as_half3_array);
        for (track, &ai) in tracks.iter_mut().zip(&anim_index) {
            let value = Trs {
                translation: t.and_then(|v| v.get(ai)).copied().unwrap_or(Vec3::ZERO),
                rotation: r.and_then(|v| v.get(ai)).copied().unwrap_or(Quat::IDENTITY),
                scale: s
                    .and_then(|v| v.get(ai))
                    .map(|h| Vec3::new(h[0].to_f32(), h[1].to_f32(), h[2].to_f32()))
                    .unwrap_or(Vec3::ONE),
            };
            track.1.push(TransformKey { frame: time, value });
        }
    }
    tracks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anim::pose_channels;
    use crate::sdf::{BaseType, Path, PrimType, ValueType};
    use crate::util::{compose, DMat4};

    #[test]
    fn test_transform_keys() {
        let mut ts = TimeSamples::new();
        ts.push(1.0, Value::Matrix4d(DMat4::IDENTITY)).unwrap();
        ts.push(2.0, Value::Matrix4d(compose(Vec3::new(1.0, 2.0, 3.0), Quat::IDENTITY, Vec3::ONE)))
            .unwrap();
        let keys = transform_keys(&ts);
        assert_eq!(keys.len(), 2);
        assert!((keys[1].value.translation - Vec3::new(1.0, 2.0, 3.0)).length() < 1e-6);
    }

    #[test]
    fn test_joint_tracks() {
        let mut anim = Prim::new(&Path::absolute_root(), "Anim", PrimType::SkelAnimation).unwrap();
        anim.add_attribute(
            Attribute::new("joints", ValueType::array(BaseType::Token))
                .uniform()
                .with_default(Value::TokenArray(vec!["Hips/Spine".into(), "Hips".into()])),
        )
        .unwrap();
        let moved = Trs { translation: Vec3::Y, ..Trs::IDENTITY };
        let mut tr = TimeSamples::new();
        for (frame, pose) in [(1.0, [Trs::IDENTITY, Trs::IDENTITY]), (2.0, [moved, Trs::IDENTITY])] {
            tr.push(frame, pose_channels(&pose).0).unwrap();
        }
        anim.add_attribute(
            Attribute::new("translations", ValueType::array(BaseType::Float3)).with_samples(tr),
        )
        .unwrap();

        let skeleton = vec!["Hips".to_string(), "Hips/Spine".to_string()];
        let tracks = joint_tracks(&anim, &skeleton);
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].0, 1);
        assert_eq!(tracks[0].1[1].value.translation, Vec3::Y);
        assert_eq!(tracks[1].1[1].value.translation, Vec3::ZERO);
    }
}
