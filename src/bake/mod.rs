//! Texture baking.
//!
//! A bake renders one slot of one material into a square texture. UV-only
//! graphs are evaluated at every texel centre; graphs that read geometry are
//! rasterized over the representative mesh's UV layout and dilated. Ambient
//! occlusion traces rays against every walked mesh.
//!
//! Bakes are independent and run on rayon. [`BakeCache`] guarantees at most
//! one render per [`BakeKey`].

pub mod ao;
pub mod bvh;
mod cache;
mod encode;
pub mod raster;

pub use bvh::{BvhNode, Triangle};
pub use cache::{BakeCache, BakeResult};
pub use encode::{encode_png, linear_to_srgb};

use std::collections::HashMap;
use std::sync::Arc;

use image::RgbaImage;
use rayon::prelude::*;
use smallvec::SmallVec;
use thiserror::Error;
use tracing::{debug, info_span, trace};

use crate::diagnostics::CancelToken;
use crate::host::{ImageId, MaterialId, MeshData, ShaderGraph, SocketValue};
use crate::material::eval::{EvalError, Evaluator, ShadingPoint};
use crate::material::{Slot, SlotKind};
use crate::util::{Mat4, Vec2, Vec3, Vec4};

/// Identity of one bake within an export.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BakeKey {
    pub material: MaterialId,
    pub slot: Slot,
    pub resolution: u32,
    pub samples: u32,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BakeError {
    #[error("unsupported shader node {0}")]
    Unsupported(String),
    #[error("degenerate geometry: {0}")]
    Degenerate(String),
    #[error(transparent)]
    Eval(#[from] EvalError),
    #[error("encoding failed: {0}")]
    Encode(String),
    #[error("bake cancelled")]
    Cancelled,
}

/// Linear RGBA float pixels, row 0 at the top.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageBuffer {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<Vec4>,
}

impl ImageBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height, pixels: vec![Vec4::ZERO; width as usize * height as usize] }
    }

    pub fn get(&self, x: u32, y: u32) -> Vec4 {
        self.pixels[y as usize * self.width as usize + x as usize]
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BakedTexture {
    pub key: BakeKey,
    pub image: ImageBuffer,
    /// Encoded PNG bytes.
    pub png: Vec<u8>,
}

impl BakedTexture {
    pub fn resolution(&self) -> u32 {
        self.key.resolution
    }

    pub fn samples(&self) -> u32 {
        self.key.samples
    }
}

/// One triangle of bake geometry with per-corner attributes.
#[derive(Clone, Debug, PartialEq)]
pub struct BakeTriangle {
    pub positions: [Vec3; 3],
    pub normals: [Vec3; 3],
    /// Corner UVs, one entry per UV set.
    pub uvs: SmallVec<[[Vec2; 3]; 2]>,
}

/// World-space triangles of the mesh a material is baked on.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BakeGeometry {
    pub triangles: Vec<BakeTriangle>,
    pub uv_names: Vec<String>,
}

impl BakeGeometry {
    /// Triangulate `mesh` and move it to world space.
    ///
    /// UV values are read face-varying, or per point when there are exactly
    /// as many values as points.
    pub fn from_mesh(mesh: &MeshData, world: &Mat4) -> Self {
        let normal_matrix = world.inverse().transpose();
        let corner_point = |c: usize| mesh.face_indices.get(c).map(|&i| i as usize);
        let mut triangles = Vec::new();
        for (tri, face) in mesh.triangles().into_iter().zip(mesh.triangle_faces()) {
            let Some(points) = tri
                .iter()
                .map(|&c| corner_point(c).and_then(|i| mesh.points.get(i)).copied())
                .collect::<Option<Vec<Vec3>>>()
            else {
                continue;
            };
            let positions = [0, 1, 2].map(|i| world.transform_point3(points[i]));
            let flat = (positions[1] - positions[0]).cross(positions[2] - positions[0]).normalize_or(Vec3::Z);
            let normals = [0, 1, 2].map(|i| {
                mesh.normals
                    .as_ref()
                    .and_then(|n| n.get(tri[i]))
                    .map(|n| normal_matrix.transform_vector3(*n).normalize_or(flat))
                    .unwrap_or(flat)
            });
            let uvs = mesh
                .uv_sets
                .iter()
                .map(|set| {
                    let per_point = set.values.len() == mesh.points.len() && set.values.len() != mesh.face_indices.len();
                    [0, 1, 2].map(|i| {
                        let idx = if per_point { corner_point(tri[i]).unwrap_or(0) } else { tri[i] };
                        set.values.get(idx).copied().unwrap_or(Vec2::ZERO)
                    })
                })
                .collect();
            trace!(face, "bake triangle");
            triangles.push(BakeTriangle { positions, normals, uvs });
        }
        Self { triangles, uv_names: mesh.uv_sets.iter().map(|s| s.name.clone()).collect() }
    }

    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    pub fn has_uvs(&self) -> bool {
        self.triangles.iter().any(|t| !t.uvs.is_empty())
    }
}

/// Everything needed to render one bake.
#[derive(Clone)]
pub struct BakeRequest {
    pub key: BakeKey,
    pub graph: Arc<ShaderGraph>,
    pub node: usize,
    pub socket: String,
    pub default: SocketValue,
    pub kind: SlotKind,
    pub uv_only: bool,
    pub geometry: Arc<BakeGeometry>,
    pub occluders: Arc<BvhNode>,
    pub images: Arc<HashMap<ImageId, Arc<RgbaImage>>>,
}

pub type BakeResults = HashMap<BakeKey, BakeResult>;

/// Renders bake requests through a shared cache.
#[derive(Default)]
pub struct Baker {
    cache: BakeCache,
}

impl Baker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bake(&self, request: &BakeRequest) -> BakeResult {
        self.cache.get_or_render(request.key, || render(request))
    }

    /// Bake every request on the rayon pool. Requests started after
    /// cancellation fail with [`BakeError::Cancelled`].
    pub fn bake_all(&self, requests: &[BakeRequest], cancel: &CancelToken) -> BakeResults {
        let _span = info_span!("bake", requests = requests.len()).entered();
        requests
            .par_iter()
            .map(|r| {
                let result = if cancel.is_cancelled() { Err(BakeError::Cancelled) } else { self.bake(r) };
                (r.key, result)
            })
            .collect()
    }

    pub fn renders(&self) -> usize {
        self.cache.renders()
    }

    pub fn cache(&self) -> &BakeCache {
        &self.cache
    }
}

fn texel_value(kind: SlotKind, v: SocketValue) -> Vec4 {
    match kind {
        SlotKind::Color => v.to_color().truncate().extend(1.0),
        SlotKind::Normal => (v.to_vector().normalize_or(Vec3::Z) * 0.5 + Vec3::splat(0.5)).extend(1.0),
        SlotKind::Scalar | SlotKind::Occlusion => Vec4::splat(v.to_float()),
    }
}

fn render(request: &BakeRequest) -> BakeResult {
    let size = request.key.resolution;
    let pixels = match request.kind {
        SlotKind::Occlusion => render_occlusion(request)?,
        _ if request.uv_only => render_uv(request)?,
        _ => render_surface(request)?,
    };
    let image = ImageBuffer { width: size, height: size, pixels };
    let png = encode_png(&image, request.kind)?;
    debug!(material = request.key.material.index(), slot = %request.key.slot, size, "baked texture");
    Ok(Arc::new(BakedTexture { key: request.key, image, png }))
}

fn render_uv(request: &BakeRequest) -> Result<Vec<Vec4>, BakeError> {
    let size = request.key.resolution;
    let ev = Evaluator::new(&request.graph, Arc::clone(&request.images), &request.geometry.uv_names);
    (0..size * size)
        .into_par_iter()
        .map(|i| -> Result<Vec4, BakeError> {
            let p = ShadingPoint::at_uv(raster::texel_uv(i % size, i / size, size));
            let v = ev.socket(request.node, &request.socket, request.default, &p)?;
            Ok(texel_value(request.kind, v))
        })
        .collect()
}

fn require_uvs(geometry: &BakeGeometry) -> Result<(), BakeError> {
    if geometry.is_empty() {
        return Err(BakeError::Degenerate("material is not used by any triangle".into()));
    }
    if !geometry.has_uvs() {
        return Err(BakeError::Degenerate("mesh has no UV set".into()));
    }
    Ok(())
}

fn render_surface(request: &BakeRequest) -> Result<Vec<Vec4>, BakeError> {
    require_uvs(&request.geometry)?;
    let size = request.key.resolution;
    let ev = Evaluator::new(&request.graph, Arc::clone(&request.images), &request.geometry.uv_names);
    let texels = raster::rasterize(&request.geometry, size);
    let values = texels
        .par_iter()
        .map(|t| match t {
            Some(p) => ev
                .socket(request.node, &request.socket, request.default, p)
                .map(|v| Some(texel_value(request.kind, v))),
            None => Ok(None),
        })
        .collect::<Result<Vec<Option<Vec4>>, EvalError>>()?;
    Ok(raster::dilate_and_fill(values, size, raster::DILATION_MARGIN))
}

fn render_occlusion(request: &BakeRequest) -> Result<Vec<Vec4>, BakeError> {
    require_uvs(&request.geometry)?;
    let size = request.key.resolution;
    let texels = raster::rasterize(&request.geometry, size);
    let bounds = request.occluders.bounds();
    let max_distance = if bounds.is_empty() { 1.0 } else { bounds.size().length().max(1e-3) };
    let values: Vec<Option<Vec4>> = texels
        .par_iter()
        .enumerate()
        .map(|(i, t)| {
            t.as_ref().map(|p| {
                let seed = ao::texel_seed(&request.key, i);
                Vec4::splat(ao::occlusion(&request.occluders, p, request.key.samples, max_distance, seed))
            })
        })
        .collect();
    Ok(raster::dilate_and_fill(values, size, raster::DILATION_MARGIN))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{Principled, ShaderNode, UvSet};

    fn plane() -> MeshData {
        MeshData {
            name: "Plane".into(),
            points: vec![
                Vec3::new(-1.0, -1.0, 0.0),
                Vec3::new(1.0, -1.0, 0.0),
                Vec3::new(1.0, 1.0, 0.0),
                Vec3::new(-1.0, 1.0, 0.0),
            ],
            face_counts: vec![4],
            face_indices: vec![0, 1, 2, 3],
            uv_sets: vec![UvSet { name: "UVMap".into(), values: vec![Vec2::ZERO, Vec2::X, Vec2::ONE, Vec2::Y] }],
            ..Default::default()
        }
    }

    fn checker_request(key: BakeKey, uv_only: bool) -> BakeRequest {
        let mut graph = ShaderGraph::principled(Principled::default());
        let c = graph.add_node(ShaderNode::Checker {
            color1: Vec4::ONE,
            color2: Vec4::new(0.0, 0.0, 0.0, 1.0),
            scale: 2.0,
        });
        graph.link(c, 0, "Base Color");
        BakeRequest {
            key,
            graph: Arc::new(graph),
            node: 0,
            socket: "Base Color".into(),
            default: SocketValue::Color(Vec4::ONE),
            kind: SlotKind::Color,
            uv_only,
            geometry: Arc::new(BakeGeometry::from_mesh(&plane(), &Mat4::IDENTITY)),
            occluders: Arc::new(BvhNode::Empty),
            images: Arc::new(HashMap::new()),
        }
    }

    fn key(slot: Slot, resolution: u32) -> BakeKey {
        BakeKey { material: MaterialId(0), slot, resolution, samples: 1 }
    }

    #[test]
    fn test_geometry_from_mesh() {
        let world = Mat4::from_translation(Vec3::new(0.0, 0.0, 5.0));
        let g = BakeGeometry::from_mesh(&plane(), &world);
        assert_eq!(g.triangles.len(), 2);
        assert_eq!(g.triangles[0].positions[0], Vec3::new(-1.0, -1.0, 5.0));
        assert_eq!(g.triangles[0].normals[0], Vec3::Z);
        assert_eq!(g.triangles[1].uvs[0], [Vec2::ZERO, Vec2::ONE, Vec2::Y]);
    }

    #[test]
    fn test_uv_bake_checker() {
        let baker = Baker::new();
        let tex = baker.bake(&checker_request(key(Slot::Diffuse, 16), true)).unwrap();
        assert_eq!(tex.image.width, 16);
        // Scale 2 gives 2x2 cells: the top-left and bottom-right cells match.
        assert_eq!(tex.image.get(0, 0), tex.image.get(15, 15));
        assert_ne!(tex.image.get(0, 0), tex.image.get(15, 0));
        let decoded = image::load_from_memory(&tex.png).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 16));
    }

    #[test]
    fn test_surface_bake_matches_uv_bake() {
        let baker = Baker::new();
        let a = baker.bake(&checker_request(key(Slot::Diffuse, 16), true)).unwrap();
        let b = baker.bake(&checker_request(key(Slot::Emissive, 16), false)).unwrap();
        assert_eq!(a.image.get(3, 3), b.image.get(3, 3));
        assert_eq!(baker.renders(), 2);
    }

    #[test]
    fn test_surface_bake_requires_uvs() {
        let mut request = checker_request(key(Slot::Diffuse, 16), false);
        let mut mesh = plane();
        mesh.uv_sets.clear();
        request.geometry = Arc::new(BakeGeometry::from_mesh(&mesh, &Mat4::IDENTITY));
        assert!(matches!(Baker::new().bake(&request), Err(BakeError::Degenerate(_))));
    }

    #[test]
    fn test_occlusion_open_plane() {
        let mut request = checker_request(BakeKey { samples: 8, ..key(Slot::Occlusion, 16) }, false);
        request.kind = SlotKind::Occlusion;
        let tris = request
            .geometry
            .triangles
            .iter()
            .map(|t| Triangle::new(t.positions[0], t.positions[1], t.positions[2]))
            .collect();
        request.occluders = Arc::new(BvhNode::new(tris));
        let tex = Baker::new().bake(&request).unwrap();
        assert!(tex.image.pixels.iter().all(|p| p.x == 1.0));
    }

    #[test]
    fn test_bake_all_cancelled() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let requests = vec![checker_request(key(Slot::Diffuse, 16), true)];
        let results = Baker::new().bake_all(&requests, &cancel);
        assert!(matches!(results[&requests[0].key], Err(BakeError::Cancelled)));
    }
}
