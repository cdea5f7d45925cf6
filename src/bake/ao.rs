//! Ray-traced ambient occlusion.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::bvh::BvhNode;
use super::BakeKey;
use crate::material::eval::ShadingPoint;
use crate::util::Vec3;

/// Ray origin offset along the normal.
const RAY_EPSILON: f32 = 1e-4;

/// Deterministic seed for one texel of one bake.
pub fn texel_seed(key: &BakeKey, texel: usize) -> u64 {
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    for v in [
        key.material.index() as u64,
        key.slot as u64,
        key.resolution as u64,
        key.samples as u64,
        texel as u64,
    ] {
        h ^= v;
        h = h.wrapping_mul(0x0000_0100_0000_01b3);
    }
    h
}

/// Orthonormal basis with `n` as the z axis.
fn basis(n: Vec3) -> (Vec3, Vec3) {
    let helper = if n.x.abs() > 0.9 { Vec3::Y } else { Vec3::X };
    let t = n.cross(helper).normalize();
    (t, n.cross(t))
}

/// Cosine-weighted direction in the hemisphere around `n`.
fn cosine_direction(rng: &mut StdRng, n: Vec3) -> Vec3 {
    let r1: f32 = rng.gen();
    let r2: f32 = rng.gen();
    let phi = std::f32::consts::TAU * r1;
    let r = r2.sqrt();
    let (t, b) = basis(n);
    (t * (phi.cos() * r) + b * (phi.sin() * r) + n * (1.0 - r2).sqrt()).normalize()
}

/// Unoccluded fraction of `samples` hemisphere rays from `p`.
pub fn occlusion(bvh: &BvhNode, p: &ShadingPoint, samples: u32, max_distance: f32, seed: u64) -> f32 {
    if samples == 0 || bvh.is_empty() {
        return 1.0;
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let n = p.normal.normalize_or(Vec3::Z);
    let origin = p.position + n * RAY_EPSILON;
    let open = (0..samples)
        .filter(|_| {
            let dir = cosine_direction(&mut rng, n);
            !bvh.occluded(origin, dir, RAY_EPSILON, max_distance)
        })
        .count();
    open as f32 / samples as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bake::bvh::Triangle;
    use crate::host::MaterialId;
    use crate::material::Slot;
    use crate::util::Vec2;

    fn key() -> BakeKey {
        BakeKey { material: MaterialId(0), slot: Slot::Occlusion, resolution: 16, samples: 32 }
    }

    fn floor_point() -> ShadingPoint {
        ShadingPoint { normal: Vec3::Z, position: Vec3::ZERO, ..ShadingPoint::at_uv(Vec2::ZERO) }
    }

    #[test]
    fn test_open_sky() {
        let bvh = BvhNode::new(vec![Triangle::new(
            Vec3::new(-1.0, -1.0, -1.0),
            Vec3::new(1.0, -1.0, -1.0),
            Vec3::new(0.0, 1.0, -1.0),
        )]);
        assert_eq!(occlusion(&bvh, &floor_point(), 32, 100.0, 7), 1.0);
    }

    #[test]
    fn test_covered_by_ceiling() {
        let s = 100.0;
        let bvh = BvhNode::new(vec![
            Triangle::new(Vec3::new(-s, -s, 1.0), Vec3::new(s, -s, 1.0), Vec3::new(s, s, 1.0)),
            Triangle::new(Vec3::new(-s, -s, 1.0), Vec3::new(s, s, 1.0), Vec3::new(-s, s, 1.0)),
        ]);
        let ao = occlusion(&bvh, &floor_point(), 32, 1000.0, 7);
        assert!(ao < 0.1, "{ao}");
    }

    #[test]
    fn test_seed_is_deterministic() {
        assert_eq!(texel_seed(&key(), 5), texel_seed(&key(), 5));
        assert_ne!(texel_seed(&key(), 5), texel_seed(&key(), 6));
    }
}
