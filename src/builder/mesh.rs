//! Mesh, subset and instance prims.

use std::collections::HashSet;

use tracing::{debug, trace};

use super::skel::{self, SkinTarget};
use crate::anim::SampledAnimation;
use crate::diagnostics::Warning;
use crate::host::{HostScene, MeshData};
use crate::material::uv_primvar_name;
use crate::sdf::{
    make_unique, validate_mesh, Attribute, BaseType, Path, Prim, PrimType, Relationship, TimeSamples, Value,
    ValueType,
};
use crate::util::{Error, Result};
use crate::walker::{MeshInstance, WalkedNode};

pub const MATERIAL_BINDING: &str = "material:binding";
pub const MATERIAL_BINDING_API: &str = "MaterialBindingAPI";
pub const MATERIAL_FAMILY: &str = "materialBind";

fn int_array(values: &[u32], what: &str) -> Result<Vec<i32>> {
    values
        .iter()
        .map(|&v| i32::try_from(v).map_err(|_| Error::invalid(format!("{what} value {v} out of range"))))
        .collect()
}

pub fn bind_material(prim: &mut Prim, material: &Path) -> Result<()> {
    prim.apply_api(MATERIAL_BINDING_API);
    prim.add_relationship(Relationship::new(MATERIAL_BINDING, vec![material.clone()]))
}

/// Interpolation of a per-corner or per-point primvar of `len` values.
fn interpolation(mesh: &MeshData, len: usize) -> Option<&'static str> {
    if len == mesh.face_indices.len() {
        Some("faceVarying")
    } else if len == mesh.points.len() {
        Some("vertex")
    } else {
        None
    }
}

/// The Mesh prim of an owner node, or `None` when the geometry is invalid.
pub fn build_mesh(
    scene: &dyn HostScene,
    node: &WalkedNode,
    instance: &MeshInstance,
    materials: &[Option<&Path>],
    skeleton: Option<SkinTarget>,
    animation: &SampledAnimation,
    warnings: &mut Vec<Warning>,
) -> Result<Option<Prim>> {
    let Some(mesh) = scene.mesh(instance.mesh) else {
        warnings.push(Warning::InvalidMesh { node: node.name.clone(), detail: "mesh data unavailable".into() });
        return Ok(None);
    };
    let topology = int_array(&mesh.face_counts, "faceVertexCounts")
        .and_then(|c| Ok((c, int_array(&mesh.face_indices, "faceVertexIndices")?)))
        .and_then(|(c, i)| validate_mesh(mesh.points.len(), &c, &i).map(|_| (c, i)));
    let (counts, indices) = match topology {
        Ok(t) => t,
        Err(e) => {
            warnings.push(Warning::InvalidMesh { node: node.name.clone(), detail: e.to_string() });
            return Ok(None);
        }
    };

    let mut prim = Prim::new(&node.path, &instance.prim_name, PrimType::Mesh)?;
    prim.add_attribute(
        Attribute::new("faceVertexCounts", ValueType::array(BaseType::Int)).with_default(Value::IntArray(counts)),
    )?;
    prim.add_attribute(
        Attribute::new("faceVertexIndices", ValueType::array(BaseType::Int)).with_default(Value::IntArray(indices)),
    )?;

    let points = Attribute::new("points", ValueType::array(BaseType::Point3f));
    let sampled = animation
        .points
        .get(&instance.mesh)
        .filter(|ts| !ts.is_constant())
        .filter(|ts| ts.values().all(|v| v.len() == mesh.points.len()));
    let points = match sampled {
        Some(ts) => points.with_samples(ts.clone()),
        None => points.with_default(Value::Vec3fArray(mesh.points.clone())),
    };
    prim.add_attribute(points)?;
    prim.add_attribute(
        Attribute::new("extent", ValueType::array(BaseType::Float3)).with_default(Value::Vec3fArray(extent(&mesh, sampled))),
    )?;

    if let Some(normals) = &mesh.normals {
        match interpolation(&mesh, normals.len()) {
            Some(interp) => prim.add_attribute(
                Attribute::new("normals", ValueType::array(BaseType::Normal3f))
                    .with_default(Value::Vec3fArray(normals.clone()))
                    .interpolation(interp),
            )?,
            None => debug!(mesh = %mesh.name, len = normals.len(), "normals dropped: length matches no interpolation"),
        }
    }
    for (set, uv) in mesh.uv_sets.iter().enumerate() {
        match interpolation(&mesh, uv.values.len()) {
            Some(interp) => prim.add_attribute(
                Attribute::new(format!("primvars:{}", uv_primvar_name(set)), ValueType::array(BaseType::TexCoord2f))
                    .with_default(Value::Vec2fArray(uv.values.clone()))
                    .interpolation(interp),
            )?,
            None => debug!(mesh = %mesh.name, uv = %uv.name, "uv set dropped: length matches no interpolation"),
        }
    }
    prim.add_attribute(
        Attribute::new("subdivisionScheme", ValueType::scalar(BaseType::Token))
            .with_default(Value::Token("none".into()))
            .uniform(),
    )?;

    bind_slots(&mut prim, &mesh, materials)?;

    if let (Some(target), Some(skin)) = (skeleton, &mesh.skin) {
        if skin.influences.len() == mesh.points.len() {
            skel::bind_skin(&mut prim, skin, &target)?;
        } else {
            debug!(mesh = %mesh.name, "skin weights do not match the point count; exported unskinned");
        }
    }
    trace!(path = %prim.path, "mesh prim");
    Ok(Some(prim))
}

fn extent(mesh: &MeshData, samples: Option<&TimeSamples>) -> Vec<crate::util::Vec3> {
    let mut bounds = mesh.bounds();
    if let Some(ts) = samples {
        for points in ts.values().filter_map(Value::as_vec3_array) {
            bounds.expand_by_box(&crate::util::BBox3f::from_points(points));
        }
    }
    bounds.to_extent()
}

/// Bind the material of each used slot: directly when one material covers
/// the whole mesh, otherwise through one GeomSubset per material.
fn bind_slots(prim: &mut Prim, mesh: &MeshData, materials: &[Option<&Path>]) -> Result<()> {
    let face_material = |face: usize| materials.get(mesh.face_material(face)).copied().flatten();
    let mut used: Vec<&Path> = Vec::new();
    for face in 0..mesh.face_count() {
        if let Some(path) = face_material(face) {
            if !used.contains(&path) {
                used.push(path);
            }
        }
    }
    let Some(&first) = used.first() else {
        return Ok(());
    };
    let unbound = (0..mesh.face_count()).any(|f| face_material(f).is_none());
    bind_material(prim, first)?;
    if used.len() == 1 && !unbound {
        return Ok(());
    }

    prim.add_attribute(
        Attribute::new(format!("subsetFamily:{MATERIAL_FAMILY}:familyType"), ValueType::scalar(BaseType::Token))
            .with_default(Value::Token("nonOverlapping".into()))
            .uniform(),
    )?;
    let mut taken = HashSet::new();
    for path in used {
        let faces: Vec<i32> = (0..mesh.face_count())
            .filter(|&f| face_material(f) == Some(path))
            .map(|f| f as i32)
            .collect();
        let name = make_unique(path.name(), &mut taken);
        let subset = prim.define_child(&name, PrimType::GeomSubset)?;
        subset.add_attribute(
            Attribute::new("elementType", ValueType::scalar(BaseType::Token))
                .with_default(Value::Token("face".into()))
                .uniform(),
        )?;
        subset.add_attribute(
            Attribute::new("familyName", ValueType::scalar(BaseType::Token))
                .with_default(Value::Token(MATERIAL_FAMILY.into()))
                .uniform(),
        )?;
        subset.add_attribute(Attribute::new("indices", ValueType::array(BaseType::Int)).with_default(Value::IntArray(faces)))?;
        bind_material(subset, path)?;
    }
    Ok(())
}

/// Instanceable prim sharing the owner's Mesh through an internal reference.
pub fn instance_prim(parent: &Path, name: &str, target: &Path, material: Option<&Path>) -> Result<Prim> {
    let mut prim = Prim::new(parent, name, PrimType::Typeless)?;
    prim.instanceable = true;
    prim.references.push(target.clone());
    if let Some(material) = material {
        bind_material(&mut prim, material)?;
    }
    Ok(prim)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_array_range() {
        assert_eq!(int_array(&[0, 3], "x").unwrap(), vec![0, 3]);
        assert!(int_array(&[u32::MAX], "x").is_err());
    }

    #[test]
    fn test_instance_prim() {
        let prim = instance_prim(
            &"/Scene/B".parse().unwrap(),
            "Cube",
            &"/Scene/A/Cube".parse().unwrap(),
            None,
        )
        .unwrap();
        assert!(prim.instanceable);
        assert_eq!(prim.prim_type, PrimType::Typeless);
        assert_eq!(prim.references[0].as_str(), "/Scene/A/Cube");
        assert!(prim.relationship(MATERIAL_BINDING).is_none());
    }
}
