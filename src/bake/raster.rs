//! UV-space rasterization of bake geometry.

use smallvec::SmallVec;

use super::BakeGeometry;
use crate::material::eval::ShadingPoint;
use crate::util::{Vec2, Vec3, Vec4};

/// Texels grown outward from covered islands.
pub const DILATION_MARGIN: usize = 16;

/// UV coordinate at the centre of texel `(x, y)`; row 0 is the top (v = 1).
pub fn texel_uv(x: u32, y: u32, size: u32) -> Vec2 {
    let s = size as f32;
    Vec2::new((x as f32 + 0.5) / s, 1.0 - (y as f32 + 0.5) / s)
}

/// Shading points of every texel covered by a triangle in UV set 0.
///
/// Later triangles overwrite earlier ones where islands overlap.
pub fn rasterize(geometry: &BakeGeometry, size: u32) -> Vec<Option<ShadingPoint>> {
    let n = size as usize;
    let mut texels: Vec<Option<ShadingPoint>> = vec![None; n * n];
    let s = size as f32;

    for tri in &geometry.triangles {
        let Some(uv) = tri.uvs.first() else {
            continue;
        };
        let [p0, p1, p2] = tri.positions;
        let (e1, e2) = (p1 - p0, p2 - p0);
        let (d1, d2) = (uv[1] - uv[0], uv[2] - uv[0]);
        let det = d1.x * d2.y - d1.y * d2.x;
        if det.abs() < 1e-12 {
            continue;
        }
        let dpdu = (e1 * d2.y - e2 * d1.y) / det;
        let dpdv = (e2 * d1.x - e1 * d2.x) / det;

        // Texel-space corners, y pointing down.
        let t: [Vec2; 3] = [0, 1, 2].map(|i| Vec2::new(uv[i].x * s, (1.0 - uv[i].y) * s));
        let min = t[0].min(t[1]).min(t[2]);
        let max = t[0].max(t[1]).max(t[2]);
        let x0 = (min.x.floor().max(0.0)) as u32;
        let y0 = (min.y.floor().max(0.0)) as u32;
        let x1 = (max.x.ceil().min(s)) as u32;
        let y1 = (max.y.ceil().min(s)) as u32;
        let area = edge(t[0], t[1], t[2]);
        if area.abs() < 1e-12 {
            continue;
        }

        for y in y0..y1 {
            for x in x0..x1 {
                let c = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
                let w0 = edge(t[1], t[2], c) / area;
                let w1 = edge(t[2], t[0], c) / area;
                let w2 = 1.0 - w0 - w1;
                if w0 < -1e-5 || w1 < -1e-5 || w2 < -1e-5 {
                    continue;
                }
                let w = Vec3::new(w0, w1, w2);
                let uvs: SmallVec<[Vec2; 2]> = tri
                    .uvs
                    .iter()
                    .map(|set| set[0] * w.x + set[1] * w.y + set[2] * w.z)
                    .collect();
                let normal = (tri.normals[0] * w.x + tri.normals[1] * w.y + tri.normals[2] * w.z)
                    .normalize_or(Vec3::Z);
                texels[y as usize * n + x as usize] = Some(ShadingPoint {
                    uvs,
                    position: p0 * w.x + p1 * w.y + p2 * w.z,
                    normal,
                    dpdu,
                    dpdv,
                });
            }
        }
    }
    texels
}

fn edge(a: Vec2, b: Vec2, c: Vec2) -> f32 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

/// Grow covered texels into uncovered neighbours, then fill what is still
/// empty with the mean of the covered texels.
pub fn dilate_and_fill(values: Vec<Option<Vec4>>, size: u32, margin: usize) -> Vec<Vec4> {
    let n = size as usize;
    let mut current = values;
    for _ in 0..margin {
        let mut next = current.clone();
        let mut grew = false;
        for y in 0..n {
            for x in 0..n {
                if current[y * n + x].is_some() {
                    continue;
                }
                let mut sum = Vec4::ZERO;
                let mut count = 0;
                for (dx, dy) in [(-1i64, 0i64), (1, 0), (0, -1), (0, 1), (-1, -1), (1, -1), (-1, 1), (1, 1)] {
                    let (nx, ny) = (x as i64 + dx, y as i64 + dy);
                    if nx < 0 || ny < 0 || nx >= n as i64 || ny >= n as i64 {
                        continue;
                    }
                    if let Some(v) = current[ny as usize * n + nx as usize] {
                        sum += v;
                        count += 1;
                    }
                }
                if count > 0 {
                    next[y * n + x] = Some(sum / count as f32);
                    grew = true;
                }
            }
        }
        current = next;
        if !grew {
            break;
        }
    }

    let covered: Vec<Vec4> = current.iter().flatten().copied().collect();
    let mean = if covered.is_empty() {
        Vec4::ZERO
    } else {
        covered.iter().copied().sum::<Vec4>() / covered.len() as f32
    };
    current.into_iter().map(|v| v.unwrap_or(mean)).collect()
}
