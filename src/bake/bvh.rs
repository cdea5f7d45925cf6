//! Bounding volume hierarchy over world-space triangles.
//!
//! Median split on the longest centroid axis; used for occlusion rays only,
//! so queries answer "any hit" rather than the closest one.

use crate::util::{BBox3f, Vec3};

/// Maximum triangles per leaf before splitting.
const LEAF_MAX_SIZE: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Triangle {
    pub v0: Vec3,
    pub v1: Vec3,
    pub v2: Vec3,
}

impl Triangle {
    pub fn new(v0: Vec3, v1: Vec3, v2: Vec3) -> Self {
        Self { v0, v1, v2 }
    }

    pub fn bounds(&self) -> BBox3f {
        // Padded so axis-aligned triangles still have volume.
        let mut b = BBox3f::from_points(&[self.v0, self.v1, self.v2]);
        b.min -= Vec3::splat(1e-4);
        b.max += Vec3::splat(1e-4);
        b
    }

    pub fn centroid(&self) -> Vec3 {
        (self.v0 + self.v1 + self.v2) / 3.0
    }

    pub fn area(&self) -> f32 {
        (self.v1 - self.v0).cross(self.v2 - self.v0).length() * 0.5
    }

    /// Möller-Trumbore intersection; distance along `dir` within `(t_min, t_max)`.
    pub fn intersect(&self, origin: Vec3, dir: Vec3, t_min: f32, t_max: f32) -> Option<f32> {
        let edge1 = self.v1 - self.v0;
        let edge2 = self.v2 - self.v0;
        let h = dir.cross(edge2);
        let a = edge1.dot(h);
        if a.abs() < 1e-8 {
            return None;
        }
        let f = 1.0 / a;
        let s = origin - self.v0;
        let u = f * s.dot(h);
        if !(0.0..=1.0).contains(&u) {
            return None;
        }
        let q = s.cross(edge1);
        let v = f * dir.dot(q);
        if v < 0.0 || u + v > 1.0 {
            return None;
        }
        let t = f * edge2.dot(q);
        (t > t_min && t < t_max).then_some(t)
    }
}

pub enum BvhNode {
    Branch {
        left: Box<BvhNode>,
        right: Box<BvhNode>,
        bbox: BBox3f,
    },
    Leaf {
        triangles: Vec<Triangle>,
        bbox: BBox3f,
    },
    Empty,
}

impl BvhNode {
    pub fn new(triangles: Vec<Triangle>) -> Self {
        let triangles: Vec<Triangle> = triangles.into_iter().filter(|t| t.area() > 0.0).collect();
        if triangles.is_empty() {
            return BvhNode::Empty;
        }
        Self::build(triangles)
    }

    fn build(mut triangles: Vec<Triangle>) -> Self {
        let n = triangles.len();
        let mut bbox = BBox3f::EMPTY;
        for t in &triangles {
            bbox.expand_by_box(&t.bounds());
        }
        if n <= LEAF_MAX_SIZE {
            return BvhNode::Leaf { triangles, bbox };
        }

        let mut centroids = BBox3f::EMPTY;
        for t in &triangles {
            centroids.expand_by_point(t.centroid());
        }
        let axis = centroids.longest_axis();
        triangles.sort_unstable_by(|a, b| a.centroid()[axis].total_cmp(&b.centroid()[axis]));

        let right = triangles.split_off(n / 2);
        BvhNode::Branch {
            left: Box::new(Self::build(triangles)),
            right: Box::new(Self::build(right)),
            bbox,
        }
    }

    pub fn bounds(&self) -> BBox3f {
        match self {
            BvhNode::Empty => BBox3f::EMPTY,
            BvhNode::Leaf { bbox, .. } | BvhNode::Branch { bbox, .. } => *bbox,
        }
    }

    /// Whether any triangle lies on the ray within `(t_min, t_max)`.
    pub fn occluded(&self, origin: Vec3, dir: Vec3, t_min: f32, t_max: f32) -> bool {
        let inv_dir = dir.recip();
        self.occluded_inner(origin, dir, inv_dir, t_min, t_max)
    }

    fn occluded_inner(&self, origin: Vec3, dir: Vec3, inv_dir: Vec3, t_min: f32, t_max: f32) -> bool {
        match self {
            BvhNode::Empty => false,
            BvhNode::Leaf { triangles, bbox } => {
                bbox.hit(origin, inv_dir, t_min, t_max)
                    && triangles.iter().any(|t| t.intersect(origin, dir, t_min, t_max).is_some())
            }
            BvhNode::Branch { left, right, bbox } => {
                bbox.hit(origin, inv_dir, t_min, t_max)
                    && (left.occluded_inner(origin, dir, inv_dir, t_min, t_max)
                        || right.occluded_inner(origin, dir, inv_dir, t_min, t_max))
            }
        }
    }

    pub fn len(&self) -> usize {
        match self {
            BvhNode::Empty => 0,
            BvhNode::Leaf { triangles, .. } => triangles.len(),
            BvhNode::Branch { left, right, .. } => left.len() + right.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, BvhNode::Empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad(z: f32, x: f32) -> [Triangle; 2] {
        let a = Vec3::new(x - 0.5, -0.5, z);
        let b = Vec3::new(x + 0.5, -0.5, z);
        let c = Vec3::new(x + 0.5, 0.5, z);
        let d = Vec3::new(x - 0.5, 0.5, z);
        [Triangle::new(a, b, c), Triangle::new(a, c, d)]
    }

    #[test]
    fn test_bvh_empty() {
        let bvh = BvhNode::new(vec![]);
        assert!(bvh.is_empty());
        assert!(!bvh.occluded(Vec3::ZERO, Vec3::Z, 0.0, f32::INFINITY));
    }

    #[test]
    fn test_degenerate_dropped() {
        let bvh = BvhNode::new(vec![Triangle::new(Vec3::ZERO, Vec3::X, Vec3::X * 2.0)]);
        assert!(bvh.is_empty());
    }

    #[test]
    fn test_bvh_many_quads() {
        let tris: Vec<Triangle> = (0..10).flat_map(|i| quad(-5.0, i as f32 * 2.0)).collect();
        let bvh = BvhNode::new(tris);
        assert_eq!(bvh.len(), 20);
        assert!(matches!(bvh, BvhNode::Branch { .. }));

        let hit = Vec3::new(8.0, 0.0, 0.0);
        assert!(bvh.occluded(hit, -Vec3::Z, 1e-3, f32::INFINITY));
        // Between quads.
        let gap = Vec3::new(9.0, 0.0, 0.0);
        assert!(!bvh.occluded(gap, -Vec3::Z, 1e-3, f32::INFINITY));
        // Range ends before the quad.
        assert!(!bvh.occluded(hit, -Vec3::Z, 1e-3, 4.0));
    }
}
