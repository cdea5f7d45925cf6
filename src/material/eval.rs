//! Shader graph evaluation at a surface point.
//!
//! [`Evaluator::socket`] computes the value flowing into a node input by
//! following links upstream. Every node kind has a defined result; the
//! unsupported variant and BSDF outputs evaluate to an [`EvalError`].
//! Unlinked texture vectors read UV set 0.

use std::collections::HashMap;
use std::f32::consts::{PI, TAU};
use std::sync::Arc;

use image::RgbaImage;
use smallvec::SmallVec;
use thiserror::Error;

use crate::host::{
    GradientKind, ImageId, MathOp, MixBlend, RampStop, ShaderGraph, ShaderNode, SocketValue,
};
use crate::util::{Vec2, Vec3, Vec4};

const MAX_DEPTH: usize = 64;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("unsupported shader node {0}")]
    Unsupported(String),
    #[error("node {0} does not exist")]
    MissingNode(usize),
    #[error("node graph too deep or cyclic")]
    TooDeep,
    #[error("image {0} is not available")]
    MissingImage(usize),
}

/// Surface attributes at one evaluation point.
#[derive(Clone, Debug, PartialEq)]
pub struct ShadingPoint {
    pub uvs: SmallVec<[Vec2; 2]>,
    pub position: Vec3,
    pub normal: Vec3,
    /// Position derivatives along u and v of UV set 0.
    pub dpdu: Vec3,
    pub dpdv: Vec3,
}

impl ShadingPoint {
    /// Point with only a UV coordinate.
    pub fn at_uv(uv: Vec2) -> Self {
        Self {
            uvs: SmallVec::from_slice(&[uv]),
            position: uv.extend(0.0),
            normal: Vec3::Z,
            dpdu: Vec3::X,
            dpdv: Vec3::Y,
        }
    }

    pub fn uv(&self, set: usize) -> Vec2 {
        self.uvs.get(set).or_else(|| self.uvs.first()).copied().unwrap_or(Vec2::ZERO)
    }

    fn offset(&self, du: f32, dv: f32) -> Self {
        let mut p = self.clone();
        if let Some(uv) = p.uvs.first_mut() {
            *uv += Vec2::new(du, dv);
        }
        p.position += self.dpdu * du + self.dpdv * dv;
        p
    }
}

/// What an input socket depends upon.
#[derive(Clone, Debug, PartialEq)]
pub enum Dependency {
    /// Unlinked; the socket default applies.
    Constant,
    /// Linked straight to an image texture sampled with plain UVs.
    Image { image: ImageId, uv_set: usize },
    /// Procedural subgraph. `uv_only` when no node reads position or normal.
    Procedural { uv_only: bool },
    /// The subgraph contains a node that cannot be evaluated.
    Unsupported(String),
}

/// Classify the input `node.socket` of `graph`.
pub fn classify(graph: &ShaderGraph, node: usize, socket: &str, uv_names: &[String]) -> Dependency {
    let Some(link) = graph.input_link(node, socket) else {
        return Dependency::Constant;
    };
    if let Some(ShaderNode::ImageTexture { image }) = graph.nodes.get(link.from_node) {
        match graph.input_link(link.from_node, "Vector") {
            None => return Dependency::Image { image: *image, uv_set: 0 },
            Some(v) => match graph.nodes.get(v.from_node) {
                Some(ShaderNode::UvMap { uv_set }) => {
                    let set = uv_names.iter().position(|n| n == uv_set).unwrap_or(0);
                    return Dependency::Image { image: *image, uv_set: set };
                }
                Some(ShaderNode::TexCoord) if v.from_socket.is_empty() || v.from_socket == "UV" => {
                    return Dependency::Image { image: *image, uv_set: 0 };
                }
                _ => {}
            },
        }
    }

    let mut uv_only = true;
    for n in graph.upstream(node, socket) {
        match &graph.nodes[n] {
            ShaderNode::Unsupported { kind } => return Dependency::Unsupported(kind.clone()),
            ShaderNode::PrincipledBsdf(_) => return Dependency::Unsupported("BSDF_PRINCIPLED".into()),
            ShaderNode::TexCoord => {
                let reads_geometry = graph.links.iter().any(|l| {
                    l.from_node == n && !(l.from_socket.is_empty() || l.from_socket == "UV")
                });
                if reads_geometry {
                    uv_only = false;
                }
            }
            ShaderNode::Bump { .. } => uv_only = false,
            _ => {}
        }
    }
    Dependency::Procedural { uv_only }
}

/// Graph evaluator with decoded images.
pub struct Evaluator<'g> {
    graph: &'g ShaderGraph,
    images: Arc<HashMap<ImageId, Arc<RgbaImage>>>,
    uv_names: &'g [String],
}

impl<'g> Evaluator<'g> {
    pub fn new(
        graph: &'g ShaderGraph,
        images: Arc<HashMap<ImageId, Arc<RgbaImage>>>,
        uv_names: &'g [String],
    ) -> Self {
        Self { graph, images, uv_names }
    }

    /// Value flowing into `node.socket`, or `default` when unlinked.
    pub fn socket(
        &self,
        node: usize,
        socket: &str,
        default: SocketValue,
        p: &ShadingPoint,
    ) -> Result<SocketValue, EvalError> {
        self.input(node, socket, default, p, 0)
    }

    fn input(
        &self,
        node: usize,
        socket: &str,
        default: SocketValue,
        p: &ShadingPoint,
        depth: usize,
    ) -> Result<SocketValue, EvalError> {
        match self.graph.input_link(node, socket) {
            Some(link) => self.output(link.from_node, &link.from_socket, p, depth + 1),
            None => Ok(default),
        }
    }

    fn vector_input(&self, node: usize, p: &ShadingPoint, depth: usize) -> Result<Vec3, EvalError> {
        let uv = p.uv(0).extend(0.0);
        Ok(self.input(node, "Vector", SocketValue::Vector(uv), p, depth)?.to_vector())
    }

    fn float_in(&self, node: usize, socket: &str, default: f32, p: &ShadingPoint, depth: usize) -> Result<f32, EvalError> {
        Ok(self.input(node, socket, SocketValue::Float(default), p, depth)?.to_float())
    }

    fn color_in(&self, node: usize, socket: &str, default: Vec4, p: &ShadingPoint, depth: usize) -> Result<Vec4, EvalError> {
        Ok(self.input(node, socket, SocketValue::Color(default), p, depth)?.to_color())
    }

    /// Evaluate output `socket` of `node`; an empty socket name selects the
    /// node's primary output.
    fn output(&self, node: usize, socket: &str, p: &ShadingPoint, depth: usize) -> Result<SocketValue, EvalError> {
        if depth > MAX_DEPTH {
            return Err(EvalError::TooDeep);
        }
        let n = self.graph.nodes.get(node).ok_or(EvalError::MissingNode(node))?;
        let value = match n {
            ShaderNode::PrincipledBsdf(_) => return Err(EvalError::Unsupported(n.kind().to_string())),
            ShaderNode::Unsupported { kind } => return Err(EvalError::Unsupported(kind.clone())),

            ShaderNode::ImageTexture { image } => {
                let img = self.images.get(image).ok_or(EvalError::MissingImage(image.0))?;
                let v = self.vector_input(node, p, depth)?;
                let texel = sample_bilinear(img, v.truncate());
                if socket == "Alpha" {
                    SocketValue::Float(texel.w)
                } else {
                    SocketValue::Color(texel)
                }
            }
            ShaderNode::Checker { color1, color2, scale } => {
                let v = self.vector_input(node, p, depth)?;
                let c1 = self.color_in(node, "Color1", *color1, p, depth)?;
                let c2 = self.color_in(node, "Color2", *color2, p, depth)?;
                let s = self.float_in(node, "Scale", *scale, p, depth)?;
                let fac = checker(v * s);
                if socket == "Fac" {
                    SocketValue::Float(fac)
                } else {
                    SocketValue::Color(c2.lerp(c1, fac))
                }
            }
            ShaderNode::Noise { scale, detail } => {
                let v = self.vector_input(node, p, depth)?;
                let s = self.float_in(node, "Scale", *scale, p, depth)?;
                let octaves = (detail.max(0.0).round() as u32).min(8) + 1;
                let fac = fbm(v * s, octaves);
                if socket == "Color" {
                    let g = fbm(v * s + Vec3::splat(17.3), octaves);
                    let b = fbm(v * s + Vec3::splat(-41.7), octaves);
                    SocketValue::Color(Vec4::new(fac, g, b, 1.0))
                } else {
                    SocketValue::Float(fac)
                }
            }
            ShaderNode::Gradient { kind } => {
                let v = self.vector_input(node, p, depth)?;
                let fac = gradient(*kind, v).clamp(0.0, 1.0);
                if socket == "Color" {
                    SocketValue::Color(Vec4::new(fac, fac, fac, 1.0))
                } else {
                    SocketValue::Float(fac)
                }
            }
            ShaderNode::Wave { scale, distortion } => {
                let v = self.vector_input(node, p, depth)?;
                let s = self.float_in(node, "Scale", *scale, p, depth)?;
                let d = self.float_in(node, "Distortion", *distortion, p, depth)?;
                let q = v * s;
                let mut phase = (q.x + q.y + q.z) * 10.0;
                if d != 0.0 {
                    phase += d * (2.0 * fbm(q, 2) - 1.0);
                }
                let fac = 0.5 + 0.5 * (phase - PI / 2.0).sin();
                if socket == "Color" {
                    SocketValue::Color(Vec4::new(fac, fac, fac, 1.0))
                } else {
                    SocketValue::Float(fac)
                }
            }
            ShaderNode::Mix { blend, factor, a, b } => {
                let f = self.float_in(node, "Factor", *factor, p, depth)?.clamp(0.0, 1.0);
                let a = self.color_in(node, "A", *a, p, depth)?;
                let b = self.color_in(node, "B", *b, p, depth)?;
                SocketValue::Color(mix(*blend, f, a, b))
            }
            ShaderNode::Math { op, a, b } => {
                let a = self.float_in(node, "A", *a, p, depth)?;
                let b = self.float_in(node, "B", *b, p, depth)?;
                SocketValue::Float(math(*op, a, b))
            }
            ShaderNode::Invert { factor, color } => {
                let f = self.float_in(node, "Fac", *factor, p, depth)?;
                let c = self.color_in(node, "Color", *color, p, depth)?;
                let inv = Vec4::new(1.0 - c.x, 1.0 - c.y, 1.0 - c.z, c.w);
                SocketValue::Color(c.lerp(inv, f))
            }
            ShaderNode::ColorRamp { factor, stops } => {
                let f = self.float_in(node, "Fac", *factor, p, depth)?;
                let c = ramp(stops, f);
                if socket == "Alpha" {
                    SocketValue::Float(c.w)
                } else {
                    SocketValue::Color(c)
                }
            }
            ShaderNode::Value { value } => SocketValue::Float(*value),
            ShaderNode::Rgb { color } => SocketValue::Color(*color),
            ShaderNode::TexCoord => match socket {
                "Generated" | "Object" => SocketValue::Vector(p.position),
                "Normal" => SocketValue::Vector(p.normal),
                _ => SocketValue::Vector(p.uv(0).extend(0.0)),
            },
            ShaderNode::UvMap { uv_set } => {
                let set = self.uv_names.iter().position(|n| n == uv_set).unwrap_or(0);
                SocketValue::Vector(p.uv(set).extend(0.0))
            }
            ShaderNode::Mapping { location, rotation, scale } => {
                let v = self.vector_input(node, p, depth)?;
                let rot = crate::util::Quat::from_euler(glam::EulerRot::XYZ, rotation.x, rotation.y, rotation.z);
                SocketValue::Vector(rot * (v * *scale) + *location)
            }
            ShaderNode::NormalMap { strength, color } => {
                let s = self.float_in(node, "Strength", *strength, p, depth)?;
                let c = self.color_in(node, "Color", *color, p, depth)?;
                let n = c.truncate() * 2.0 - Vec3::ONE;
                SocketValue::Vector(Vec3::Z.lerp(n, s).normalize_or(Vec3::Z))
            }
            ShaderNode::Bump { strength, distance, height } => {
                let s = self.float_in(node, "Strength", *strength, p, depth)?;
                let dist = self.float_in(node, "Distance", *distance, p, depth)?;
                let eps = 1.0 / 1024.0;
                let h = |q: &ShadingPoint| self.float_in(node, "Height", *height, q, depth);
                let h0 = h(p)?;
                let du = (h(&p.offset(eps, 0.0))? - h0) / eps;
                let dv = (h(&p.offset(0.0, eps))? - h0) / eps;
                let n = Vec3::new(-du * dist * s, -dv * dist * s, 1.0);
                SocketValue::Vector(n.normalize_or(Vec3::Z))
            }
        };
        Ok(value)
    }
}

fn checker(p: Vec3) -> f32 {
    let q = (p + Vec3::splat(1e-6)) * 0.999999;
    let xi = q.x.floor() as i64;
    let yi = q.y.floor() as i64;
    let zi = q.z.floor() as i64;
    if (xi + yi + zi).rem_euclid(2) == 1 { 1.0 } else { 0.0 }
}

fn hash3(x: i32, y: i32, z: i32) -> f32 {
    let mut h = (x as u32).wrapping_mul(0x8da6_b343)
        ^ (y as u32).wrapping_mul(0xd816_3841)
        ^ (z as u32).wrapping_mul(0xcb1a_b31f);
    h ^= h >> 13;
    h = h.wrapping_mul(0x5bd1_e995);
    h ^= h >> 15;
    (h & 0x00ff_ffff) as f32 / 16_777_215.0
}

fn value_noise(p: Vec3) -> f32 {
    let i = p.floor();
    let f = p - i;
    let w = f * f * (Vec3::splat(3.0) - 2.0 * f);
    let (x, y, z) = (i.x as i32, i.y as i32, i.z as i32);
    let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;
    let c = |dx, dy, dz| hash3(x + dx, y + dy, z + dz);
    let x00 = lerp(c(0, 0, 0), c(1, 0, 0), w.x);
    let x10 = lerp(c(0, 1, 0), c(1, 1, 0), w.x);
    let x01 = lerp(c(0, 0, 1), c(1, 0, 1), w.x);
    let x11 = lerp(c(0, 1, 1), c(1, 1, 1), w.x);
    lerp(lerp(x00, x10, w.y), lerp(x01, x11, w.y), w.z)
}

fn fbm(p: Vec3, octaves: u32) -> f32 {
    let mut sum = 0.0;
    let mut amp = 0.5;
    let mut freq = 1.0;
    let mut norm = 0.0;
    for _ in 0..octaves {
        sum += amp * value_noise(p * freq);
        norm += amp;
        amp *= 0.5;
        freq *= 2.0;
    }
    if norm > 0.0 { sum / norm } else { 0.0 }
}

fn gradient(kind: GradientKind, v: Vec3) -> f32 {
    match kind {
        GradientKind::Linear => v.x,
        GradientKind::Quadratic => v.x.max(0.0).powi(2),
        GradientKind::Radial => v.y.atan2(v.x) / TAU + 0.5,
        GradientKind::Spherical => (1.0 - v.length()).max(0.0),
    }
}

fn mix(blend: MixBlend, f: f32, a: Vec4, b: Vec4) -> Vec4 {
    let blended = match blend {
        MixBlend::Mix => b,
        MixBlend::Add => a + b,
        MixBlend::Multiply => a * b,
        MixBlend::Subtract => a - b,
        MixBlend::Screen => Vec4::ONE - (Vec4::ONE - a) * (Vec4::ONE - b),
        MixBlend::Difference => (a - b).abs(),
        MixBlend::Darken => a.min(b),
        MixBlend::Lighten => a.max(b),
    };
    let mut out = a.lerp(blended, f);
    out.w = a.w + (b.w - a.w) * f;
    out
}

fn math(op: MathOp, a: f32, b: f32) -> f32 {
    match op {
        MathOp::Add => a + b,
        MathOp::Subtract => a - b,
        MathOp::Multiply => a * b,
        MathOp::Divide => {
            if b == 0.0 { 0.0 } else { a / b }
        }
        MathOp::Power => {
            let r = a.powf(b);
            if r.is_finite() { r } else { 0.0 }
        }
        MathOp::Minimum => a.min(b),
        MathOp::Maximum => a.max(b),
        MathOp::Modulo => {
            if b == 0.0 { 0.0 } else { a % b }
        }
        MathOp::Sine => a.sin(),
        MathOp::Absolute => a.abs(),
    }
}

fn ramp(stops: &[RampStop], f: f32) -> Vec4 {
    let Some(first) = stops.first() else {
        return Vec4::new(f, f, f, 1.0);
    };
    if f <= first.position {
        return first.color;
    }
    for pair in stops.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        if f <= b.position {
            let span = b.position - a.position;
            let t = if span > 0.0 { (f - a.position) / span } else { 1.0 };
            return a.color.lerp(b.color, t);
        }
    }
    stops.last().map(|s| s.color).unwrap_or(first.color)
}

/// Bilinear lookup with repeat wrapping; returned colour is in `[0, 1]`.
pub fn sample_bilinear(img: &RgbaImage, uv: Vec2) -> Vec4 {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return Vec4::ZERO;
    }
    let x = uv.x.rem_euclid(1.0) * w as f32 - 0.5;
    let y = (1.0 - uv.y.rem_euclid(1.0)) * h as f32 - 0.5;
    let x0 = x.floor();
    let y0 = y.floor();
    let tx = x - x0;
    let ty = y - y0;
    let fetch = |xi: f32, yi: f32| {
        let px = (xi as i64).rem_euclid(w as i64) as u32;
        let py = (yi as i64).rem_euclid(h as i64) as u32;
        let p = img.get_pixel(px, py).0;
        Vec4::new(p[0] as f32, p[1] as f32, p[2] as f32, p[3] as f32) / 255.0
    };
    let top = fetch(x0, y0).lerp(fetch(x0 + 1.0, y0), tx);
    let bottom = fetch(x0, y0 + 1.0).lerp(fetch(x0 + 1.0, y0 + 1.0), tx);
    top.lerp(bottom, ty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Principled;

    fn no_images() -> Arc<HashMap<ImageId, Arc<RgbaImage>>> {
        Arc::new(HashMap::new())
    }

    fn checker_graph() -> ShaderGraph {
        let mut g = ShaderGraph::principled(Principled::default());
        let c = g.add_node(ShaderNode::Checker {
            color1: Vec4::ONE,
            color2: Vec4::new(0.0, 0.0, 0.0, 1.0),
            scale: 2.0,
        });
        g.link(c, 0, "Base Color");
        g
    }

    #[test]
    fn test_checker_pattern() {
        let g = checker_graph();
        let ev = Evaluator::new(&g, no_images(), &[]);
        let default = SocketValue::Color(Vec4::ZERO);
        let a = ev.socket(0, "Base Color", default, &ShadingPoint::at_uv(Vec2::new(0.25, 0.25))).unwrap();
        let b = ev.socket(0, "Base Color", default, &ShadingPoint::at_uv(Vec2::new(0.75, 0.25))).unwrap();
        assert_ne!(a, b);
        let c = ev.socket(0, "Base Color", default, &ShadingPoint::at_uv(Vec2::new(0.75, 0.75))).unwrap();
        assert_eq!(a, c);
    }

    #[test]
    fn test_classify() {
        let g = checker_graph();
        assert_eq!(classify(&g, 0, "Base Color", &[]), Dependency::Procedural { uv_only: true });
        assert_eq!(classify(&g, 0, "Roughness", &[]), Dependency::Constant);

        let mut g = ShaderGraph::principled(Principled::default());
        let img = g.add_node(ShaderNode::ImageTexture { image: ImageId(3) });
        let uv = g.add_node(ShaderNode::UvMap { uv_set: "second".into() });
        g.link(img, 0, "Base Color");
        g.link_socket(uv, "UV", img, "Vector");
        let names = vec!["first".to_string(), "second".to_string()];
        assert_eq!(
            classify(&g, 0, "Base Color", &names),
            Dependency::Image { image: ImageId(3), uv_set: 1 }
        );

        let mut g = ShaderGraph::principled(Principled::default());
        let u = g.add_node(ShaderNode::Unsupported { kind: "TEX_VORONOI".into() });
        g.link(u, 0, "Roughness");
        assert_eq!(classify(&g, 0, "Roughness", &[]), Dependency::Unsupported("TEX_VORONOI".into()));
    }

    #[test]
    fn test_unsupported_eval_fails() {
        let mut g = ShaderGraph::principled(Principled::default());
        let u = g.add_node(ShaderNode::Unsupported { kind: "TEX_VORONOI".into() });
        let m = g.add_node(ShaderNode::Math { op: MathOp::Multiply, a: 1.0, b: 0.5 });
        g.link(u, m, "A");
        g.link(m, 0, "Roughness");
        let ev = Evaluator::new(&g, no_images(), &[]);
        let r = ev.socket(0, "Roughness", SocketValue::Float(0.5), &ShadingPoint::at_uv(Vec2::ZERO));
        assert_eq!(r, Err(EvalError::Unsupported("TEX_VORONOI".into())));
    }

    #[test]
    fn test_bump_flat_height() {
        let mut g = ShaderGraph::principled(Principled::default());
        let b = g.add_node(ShaderNode::Bump { strength: 1.0, distance: 1.0, height: 0.5 });
        g.link(b, 0, "Normal");
        let ev = Evaluator::new(&g, no_images(), &[]);
        let n = ev
            .socket(0, "Normal", SocketValue::Vector(Vec3::Z), &ShadingPoint::at_uv(Vec2::splat(0.3)))
            .unwrap();
        assert!((n.to_vector() - Vec3::Z).length() < 1e-5);
    }

    #[test]
    fn test_ramp_and_math() {
        let stops = vec![
            RampStop { position: 0.0, color: Vec4::ZERO },
            RampStop { position: 1.0, color: Vec4::ONE },
        ];
        assert!((ramp(&stops, 0.5).x - 0.5).abs() < 1e-6);
        assert_eq!(math(MathOp::Divide, 1.0, 0.0), 0.0);
        assert_eq!(mix(MixBlend::Multiply, 1.0, Vec4::splat(0.5), Vec4::splat(0.5)).x, 0.25);
    }
}
