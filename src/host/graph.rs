//! Host material node graphs.
//!
//! Node kinds form a closed set. Anything the exporter does not understand
//! is carried as [`ShaderNode::Unsupported`] so graph evaluation stays a
//! total match over the variants.

use serde::{Deserialize, Serialize};

use crate::util::{Vec3, Vec4};

use super::ImageId;

/// Value flowing through a socket.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SocketValue {
    Float(f32),
    Vector(Vec3),
    Color(Vec4),
}

impl SocketValue {
    /// Scalar view; colours reduce to their average.
    pub fn to_float(self) -> f32 {
        match self {
            Self::Float(f) => f,
            Self::Vector(v) => (v.x + v.y + v.z) / 3.0,
            Self::Color(c) => (c.x + c.y + c.z) / 3.0,
        }
    }

    pub fn to_color(self) -> Vec4 {
        match self {
            Self::Float(f) => Vec4::new(f, f, f, 1.0),
            Self::Vector(v) => v.extend(1.0),
            Self::Color(c) => c,
        }
    }

    pub fn to_vector(self) -> Vec3 {
        match self {
            Self::Float(f) => Vec3::splat(f),
            Self::Vector(v) => v,
            Self::Color(c) => c.truncate(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MixBlend {
    #[default]
    Mix,
    Add,
    Multiply,
    Subtract,
    Screen,
    Difference,
    Darken,
    Lighten,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MathOp {
    #[default]
    Add,
    Subtract,
    Multiply,
    Divide,
    Power,
    Minimum,
    Maximum,
    Modulo,
    Sine,
    Absolute,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GradientKind {
    #[default]
    Linear,
    Quadratic,
    Radial,
    Spherical,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RampStop {
    pub position: f32,
    pub color: Vec4,
}

/// Principled BSDF socket defaults.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Principled {
    pub base_color: Vec4,
    pub metallic: f32,
    pub roughness: f32,
    pub ior: f32,
    pub alpha: f32,
    pub emission_color: Vec4,
    pub emission_strength: f32,
    pub coat_weight: f32,
    pub coat_roughness: f32,
}

impl Default for Principled {
    fn default() -> Self {
        Self {
            base_color: Vec4::new(0.8, 0.8, 0.8, 1.0),
            metallic: 0.0,
            roughness: 0.5,
            ior: 1.5,
            alpha: 1.0,
            emission_color: Vec4::new(0.0, 0.0, 0.0, 1.0),
            emission_strength: 0.0,
            coat_weight: 0.0,
            coat_roughness: 0.03,
        }
    }
}

/// A shader node with its unlinked socket defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ShaderNode {
    PrincipledBsdf(Principled),
    ImageTexture { image: ImageId },
    Checker {
        color1: Vec4,
        color2: Vec4,
        scale: f32,
    },
    Noise {
        scale: f32,
        #[serde(default)]
        detail: f32,
    },
    Gradient {
        #[serde(default)]
        kind: GradientKind,
    },
    Wave {
        scale: f32,
        #[serde(default)]
        distortion: f32,
    },
    Mix {
        #[serde(default)]
        blend: MixBlend,
        factor: f32,
        a: Vec4,
        b: Vec4,
    },
    Math {
        op: MathOp,
        a: f32,
        b: f32,
    },
    Invert {
        factor: f32,
        color: Vec4,
    },
    ColorRamp {
        factor: f32,
        stops: Vec<RampStop>,
    },
    Value { value: f32 },
    Rgb { color: Vec4 },
    TexCoord,
    UvMap { uv_set: String },
    Mapping {
        #[serde(default)]
        location: Vec3,
        #[serde(default)]
        rotation: Vec3,
        scale: Vec3,
    },
    NormalMap {
        strength: f32,
        #[serde(default = "flat_normal")]
        color: Vec4,
    },
    Bump {
        strength: f32,
        distance: f32,
        #[serde(default)]
        height: f32,
    },
    Unsupported { kind: String },
}

fn flat_normal() -> Vec4 {
    Vec4::new(0.5, 0.5, 1.0, 1.0)
}

impl ShaderNode {
    /// Host-facing kind name, used in diagnostics.
    pub fn kind(&self) -> &str {
        match self {
            Self::PrincipledBsdf(_) => "BSDF_PRINCIPLED",
            Self::ImageTexture { .. } => "TEX_IMAGE",
            Self::Checker { .. } => "TEX_CHECKER",
            Self::Noise { .. } => "TEX_NOISE",
            Self::Gradient { .. } => "TEX_GRADIENT",
            Self::Wave { .. } => "TEX_WAVE",
            Self::Mix { .. } => "MIX",
            Self::Math { .. } => "MATH",
            Self::Invert { .. } => "INVERT",
            Self::ColorRamp { .. } => "VALTORGB",
            Self::Value { .. } => "VALUE",
            Self::Rgb { .. } => "RGB",
            Self::TexCoord => "TEX_COORD",
            Self::UvMap { .. } => "UVMAP",
            Self::Mapping { .. } => "MAPPING",
            Self::NormalMap { .. } => "NORMAL_MAP",
            Self::Bump { .. } => "BUMP",
            Self::Unsupported { kind } => kind,
        }
    }
}

/// Directed edge `from_node.from_socket -> to_node.to_socket`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Link {
    pub from_node: usize,
    #[serde(default)]
    pub from_socket: String,
    pub to_node: usize,
    pub to_socket: String,
}

/// Node graph with a designated surface output node.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ShaderGraph {
    pub nodes: Vec<ShaderNode>,
    #[serde(default)]
    pub links: Vec<Link>,
    /// Index of the Principled BSDF feeding the surface output.
    #[serde(default)]
    pub output: Option<usize>,
}

impl ShaderGraph {
    /// Graph with a single Principled BSDF.
    pub fn principled(p: Principled) -> Self {
        Self {
            nodes: vec![ShaderNode::PrincipledBsdf(p)],
            links: Vec::new(),
            output: Some(0),
        }
    }

    pub fn add_node(&mut self, node: ShaderNode) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    /// Link `from` (default output) into `to.socket`, replacing any existing link.
    pub fn link(&mut self, from: usize, to: usize, socket: &str) {
        self.link_socket(from, "", to, socket);
    }

    pub fn link_socket(&mut self, from: usize, from_socket: &str, to: usize, socket: &str) {
        self.links.retain(|l| !(l.to_node == to && l.to_socket == socket));
        self.links.push(Link {
            from_node: from,
            from_socket: from_socket.to_string(),
            to_node: to,
            to_socket: socket.to_string(),
        });
    }

    /// The link feeding `node.socket`, if any.
    pub fn input_link(&self, node: usize, socket: &str) -> Option<&Link> {
        self.links.iter().find(|l| l.to_node == node && l.to_socket == socket)
    }

    /// The surface Principled BSDF, falling back to the first one present.
    pub fn output_bsdf(&self) -> Option<(usize, &Principled)> {
        let find = |i: usize| match self.nodes.get(i) {
            Some(ShaderNode::PrincipledBsdf(p)) => Some((i, p)),
            _ => None,
        };
        self.output
            .and_then(find)
            .or_else(|| (0..self.nodes.len()).find_map(find))
    }

    /// Nodes reachable upstream of `node.socket`, including the source node.
    pub fn upstream(&self, node: usize, socket: &str) -> Vec<usize> {
        let mut out = Vec::new();
        let mut stack: Vec<usize> = self.input_link(node, socket).map(|l| l.from_node).into_iter().collect();
        while let Some(n) = stack.pop() {
            if out.contains(&n) || n >= self.nodes.len() {
                continue;
            }
            out.push(n);
            stack.extend(self.links.iter().filter(|l| l.to_node == n).map(|l| l.from_node));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_replaces() {
        let mut g = ShaderGraph::principled(Principled::default());
        let a = g.add_node(ShaderNode::Value { value: 0.2 });
        let b = g.add_node(ShaderNode::Value { value: 0.4 });
        g.link(a, 0, "Roughness");
        g.link(b, 0, "Roughness");
        assert_eq!(g.links.len(), 1);
        assert_eq!(g.input_link(0, "Roughness").unwrap().from_node, b);
    }

    #[test]
    fn test_upstream_handles_cycles() {
        let mut g = ShaderGraph::principled(Principled::default());
        let m = g.add_node(ShaderNode::Math { op: MathOp::Add, a: 0.0, b: 0.0 });
        let n = g.add_node(ShaderNode::Math { op: MathOp::Add, a: 0.0, b: 0.0 });
        g.link(m, 0, "Metallic");
        g.link(n, m, "A");
        g.link(m, n, "A");
        let up = g.upstream(0, "Metallic");
        assert_eq!(up.len(), 2);
    }

    #[test]
    fn test_serde_tagged() {
        let json = r#"{"type":"checker","color1":[1,1,1,1],"color2":[0,0,0,1],"scale":4.0}"#;
        let node: ShaderNode = serde_json::from_str(json).unwrap();
        assert_eq!(node.kind(), "TEX_CHECKER");
    }
}
