//! Skeleton, SkelAnimation and skin binding.

use crate::anim::{pose_channels, JointSamples};
use crate::host::{Armature, SkinWeights};
use crate::sdf::{Attribute, BaseType, Path, Prim, PrimType, Relationship, TimeSamples, Value, ValueType};
use crate::util::{DMat4, Result};
use crate::walker::SKELETON_PRIM_NAME;

pub const SKEL_BINDING_API: &str = "SkelBindingAPI";
pub const ANIMATION_PRIM_NAME: &str = "Anim";

/// Skeleton a skinned mesh binds to.
#[derive(Clone, Debug, PartialEq)]
pub struct SkinTarget {
    pub skeleton: Path,
    /// Mesh transform relative to the skeleton at bind time.
    pub geom_bind: DMat4,
}

fn joints_attr(armature: &Armature) -> Attribute {
    Attribute::new("joints", ValueType::array(BaseType::Token))
        .with_default(Value::TokenArray(armature.joint_paths()))
        .uniform()
}

/// Skeleton prim of an armature, with its animation when sampled.
pub fn skeleton_prim(parent: &Path, armature: &Armature, samples: Option<&JointSamples>) -> Result<Prim> {
    let mut skel = Prim::new(parent, SKELETON_PRIM_NAME, PrimType::Skeleton)?;
    skel.add_attribute(joints_attr(armature))?;
    skel.add_attribute(
        Attribute::new("bindTransforms", ValueType::array(BaseType::Matrix4d))
            .with_default(Value::Matrix4dArray(armature.bind_transforms()))
            .uniform(),
    )?;
    let rest = armature.bones.iter().map(|b| b.rest.to_matrix()).collect();
    skel.add_attribute(
        Attribute::new("restTransforms", ValueType::array(BaseType::Matrix4d))
            .with_default(Value::Matrix4dArray(rest))
            .uniform(),
    )?;

    let Some(samples) = samples else {
        return Ok(skel);
    };
    let mut anim = Prim::new(&skel.path, ANIMATION_PRIM_NAME, PrimType::SkelAnimation)?;
    anim.add_attribute(joints_attr(armature))?;
    let channels = [
        ("translations", BaseType::Float3, &samples.translations),
        ("rotations", BaseType::Quatf, &samples.rotations),
        ("scales", BaseType::Half3, &samples.scales),
    ];
    for (name, base, ts) in channels {
        anim.add_attribute(channel(name, base, ts, armature))?;
    }

    skel.apply_api(SKEL_BINDING_API);
    skel.add_relationship(Relationship::new("skel:animationSource", vec![anim.path.clone()]))?;
    skel.add_child(anim)?;
    Ok(skel)
}

/// A joint channel; unchanging samples collapse to a default, and an empty
/// channel holds the rest pose.
fn channel(name: &str, base: BaseType, samples: &TimeSamples, armature: &Armature) -> Attribute {
    let attr = Attribute::new(name, ValueType::array(base));
    if !samples.is_constant() {
        return attr.with_samples(samples.clone());
    }
    let value = match samples.first() {
        Some(v) => v.clone(),
        None => {
            let rest: Vec<_> = armature.bones.iter().map(|b| b.rest).collect();
            let (t, r, s) = pose_channels(&rest);
            match base {
                BaseType::Float3 => t,
                BaseType::Quatf => r,
                _ => s,
            }
        }
    };
    attr.with_default(value)
}

/// Joint influence primvars plus the `skel:skeleton` binding.
///
/// Every point gets the same number of influences; shorter lists are padded
/// with zero weights on joint 0.
pub fn bind_skin(prim: &mut Prim, skin: &SkinWeights, target: &SkinTarget) -> Result<()> {
    let size = skin.max_influences().max(1);
    let mut indices = Vec::with_capacity(skin.influences.len() * size);
    let mut weights = Vec::with_capacity(skin.influences.len() * size);
    for point in &skin.influences {
        for i in 0..size {
            let (joint, weight) = point.get(i).copied().unwrap_or((0, 0.0));
            indices.push(joint as i32);
            weights.push(weight);
        }
    }
    prim.apply_api(SKEL_BINDING_API);
    prim.add_attribute(
        Attribute::new("primvars:skel:jointIndices", ValueType::array(BaseType::Int))
            .with_default(Value::IntArray(indices))
            .interpolation("vertex")
            .element_size(size as i32),
    )?;
    prim.add_attribute(
        Attribute::new("primvars:skel:jointWeights", ValueType::array(BaseType::Float))
            .with_default(Value::FloatArray(weights))
            .interpolation("vertex")
            .element_size(size as i32),
    )?;
    prim.add_attribute(
        Attribute::new("primvars:skel:geomBindTransform", ValueType::scalar(BaseType::Matrix4d))
            .with_default(Value::Matrix4d(target.geom_bind)),
    )?;
    prim.add_relationship(Relationship::new("skel:skeleton", vec![target.skeleton.clone()]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{Bone, Trs};
    use crate::util::Vec3;

    fn arm() -> Armature {
        Armature {
            bones: vec![
                Bone { name: "Root".into(), parent: None, rest: Trs::IDENTITY },
                Bone { name: "Tip".into(), parent: Some(0), rest: Trs { translation: Vec3::Y, ..Trs::IDENTITY } },
            ],
        }
    }

    #[test]
    fn test_static_skeleton() {
        let skel = skeleton_prim(&"/Scene/Rig".parse().unwrap(), &arm(), None).unwrap();
        assert_eq!(skel.path.as_str(), "/Scene/Rig/Skel");
        assert!(skel.children.is_empty());
        assert!(!skel.has_api(SKEL_BINDING_API));
        let bind = skel.attribute("bindTransforms").unwrap().default.as_ref().unwrap();
        assert_eq!(bind.as_matrix_array().unwrap()[1].w_axis.y, 1.0);
    }

    #[test]
    fn test_animated_skeleton() {
        let moved = Trs { translation: Vec3::new(0.0, 2.0, 0.0), ..Trs::IDENTITY };
        let mut samples = JointSamples::default();
        for (frame, pose) in [(1.0, [Trs::IDENTITY, Trs::IDENTITY]), (2.0, [Trs::IDENTITY, moved])] {
            let (t, r, s) = pose_channels(&pose);
            samples.translations.push(frame, t).unwrap();
            samples.rotations.push(frame, r).unwrap();
            samples.scales.push(frame, s).unwrap();
        }
        let skel = skeleton_prim(&"/Scene/Rig".parse().unwrap(), &arm(), Some(&samples)).unwrap();
        let anim = skel.child(ANIMATION_PRIM_NAME).unwrap();
        assert!(anim.attribute("translations").unwrap().is_animated());
        assert!(!anim.attribute("rotations").unwrap().is_animated());
        assert_eq!(
            skel.relationship("skel:animationSource").unwrap().targets[0].as_str(),
            "/Scene/Rig/Skel/Anim"
        );
    }

    #[test]
    fn test_skin_padding() {
        let mut prim = Prim::new(&Path::absolute_root(), "Body", PrimType::Mesh).unwrap();
        let skin = SkinWeights { influences: vec![vec![(1, 1.0)], vec![(0, 0.25), (1, 0.75)]] };
        let target = SkinTarget { skeleton: "/Rig/Skel".parse().unwrap(), geom_bind: DMat4::IDENTITY };
        bind_skin(&mut prim, &skin, &target).unwrap();
        assert_eq!(
            prim.attribute("primvars:skel:jointIndices").unwrap().default,
            Some(Value::IntArray(vec![1, 0, 0, 1]))
        );
        assert_eq!(
            prim.attribute("primvars:skel:jointWeights").unwrap().default,
            Some(Value::FloatArray(vec![1.0, 0.0, 0.25, 0.75]))
        );
    }
}
