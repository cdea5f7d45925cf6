//! The in-memory stage: root prims plus layer metadata.

use std::collections::HashSet;

use crate::util::{Error, Result};

use super::{Attribute, Path, Prim, PrimType, Property, Value};

/// Layer-level metadata stored on the pseudo-root.
#[derive(Clone, Debug, PartialEq)]
pub struct StageMetadata {
    pub default_prim: Option<String>,
    pub up_axis: String,
    pub meters_per_unit: f64,
    pub start_time_code: Option<f64>,
    pub end_time_code: Option<f64>,
    pub time_codes_per_second: Option<f64>,
    pub frames_per_second: Option<f64>,
    pub doc: Option<String>,
}

impl Default for StageMetadata {
    fn default() -> Self {
        Self {
            default_prim: None,
            up_axis: "Y".to_string(),
            meters_per_unit: 1.0,
            start_time_code: None,
            end_time_code: None,
            time_codes_per_second: None,
            frames_per_second: None,
            doc: None,
        }
    }
}

/// Root container for one prim tree.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Stage {
    pub metadata: StageMetadata,
    pub root_prims: Vec<Prim>,
}

impl Stage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define a root prim.
    pub fn define_root(&mut self, name: &str, prim_type: PrimType) -> Result<&mut Prim> {
        let prim = Prim::new(&Path::absolute_root(), name, prim_type)?;
        self.add_root(prim)
    }

    pub fn add_root(&mut self, prim: Prim) -> Result<&mut Prim> {
        if prim.path.depth() != 1 {
            return Err(Error::InvalidPath(format!("{} is not a root prim path", prim.path)));
        }
        if self.root_prims.iter().any(|p| p.name == prim.name) {
            return Err(Error::InvalidPath(format!("duplicate root prim {}", prim.path)));
        }
        self.root_prims.push(prim);
        let idx = self.root_prims.len() - 1;
        Ok(&mut self.root_prims[idx])
    }

    /// Define a prim at `path`; its parent must already exist.
    pub fn define_prim(&mut self, path: &Path, prim_type: PrimType) -> Result<&mut Prim> {
        let parent = path
            .parent()
            .ok_or_else(|| Error::InvalidPath(format!("cannot define {path}")))?;
        if parent.is_root() {
            return self.define_root(path.name(), prim_type);
        }
        let name = path.name().to_string();
        let parent_prim = self
            .prim_at_mut(&parent)
            .ok_or_else(|| Error::InvalidPath(format!("parent of {path} does not exist")))?;
        parent_prim.define_child(&name, prim_type)
    }

    pub fn prim_at(&self, path: &Path) -> Option<&Prim> {
        let segments = path.prim_segments();
        let (first, rest) = segments.split_first()?;
        let mut prim = self.root_prims.iter().find(|p| p.name == *first)?;
        for seg in rest {
            prim = prim.child(seg)?;
        }
        Some(prim)
    }

    pub fn prim_at_mut(&mut self, path: &Path) -> Option<&mut Prim> {
        let segments = path.prim_segments();
        let (first, rest) = segments.split_first()?;
        let mut prim = self.root_prims.iter_mut().find(|p| p.name == *first)?;
        for seg in rest {
            prim = prim.child_mut(seg)?;
        }
        Some(prim)
    }

    /// Attribute addressed by a property path.
    pub fn attribute_at(&self, path: &Path) -> Option<&Attribute> {
        if !path.is_property_path() {
            return None;
        }
        self.prim_at(&path.prim_path())?.attribute(path.name())
    }

    /// Whether `path` names an existing prim or property.
    pub fn has_object(&self, path: &Path) -> bool {
        if path.is_root() {
            return true;
        }
        match self.prim_at(&path.prim_path()) {
            Some(prim) if path.is_property_path() => prim.property(path.name()).is_some(),
            Some(_) => true,
            None => false,
        }
    }

    /// All prims, depth-first pre-order.
    pub fn traverse(&self) -> Vec<&Prim> {
        let mut out = Vec::new();
        for root in &self.root_prims {
            root.visit(&mut |p| out.push(p));
        }
        out
    }

    pub fn prim_count(&self) -> usize {
        self.root_prims.iter().map(Prim::subtree_len).sum()
    }

    /// The prim named by `defaultPrim`.
    pub fn default_prim(&self) -> Option<&Prim> {
        let name = self.metadata.default_prim.as_deref()?;
        self.root_prims.iter().find(|p| p.name == name)
    }

    /// Check tree structure, references and attribute payloads.
    ///
    /// Mesh topology is not checked here; see [`validate_mesh_prim`].
    pub fn validate(&self) -> Result<()> {
        if let Some(name) = &self.metadata.default_prim {
            if !self.root_prims.iter().any(|p| &p.name == name) {
                return Err(Error::DanglingReference {
                    from: "defaultPrim".to_string(),
                    to: format!("/{name}"),
                });
            }
        }
        let mut seen = HashSet::new();
        let root = Path::absolute_root();
        check_siblings(&root, &self.root_prims)?;
        for prim in &self.root_prims {
            self.validate_prim(&root, prim, &mut seen)?;
        }
        Ok(())
    }

    fn validate_prim<'a>(&self, parent: &Path, prim: &'a Prim, seen: &mut HashSet<&'a Path>) -> Result<()> {
        let expected = parent.append_child(&prim.name)?;
        if expected != prim.path {
            return Err(Error::InvalidPath(format!(
                "prim {} stored under {}",
                prim.path, parent
            )));
        }
        if !seen.insert(&prim.path) {
            return Err(Error::InvalidPath(format!("duplicate prim {}", prim.path)));
        }

        let mut names = HashSet::new();
        for prop in &prim.properties {
            if !names.insert(prop.name()) {
                return Err(Error::invalid(format!("duplicate property {}.{}", prim.path, prop.name())));
            }
            match prop {
                Property::Attribute(attr) => self.validate_attribute(prim, attr)?,
                Property::Relationship(rel) => {
                    for target in &rel.targets {
                        if !self.has_object(target) {
                            return Err(Error::DanglingReference {
                                from: format!("{}.{}", prim.path, rel.name),
                                to: target.to_string(),
                            });
                        }
                    }
                }
            }
        }

        for target in &prim.references {
            if target.is_property_path() || self.prim_at(target).is_none() {
                return Err(Error::DanglingReference {
                    from: prim.path.to_string(),
                    to: target.to_string(),
                });
            }
        }

        check_siblings(&prim.path, &prim.children)?;
        for child in &prim.children {
            self.validate_prim(&prim.path, child, seen)?;
        }
        Ok(())
    }

    fn validate_attribute(&self, prim: &Prim, attr: &Attribute) -> Result<()> {
        let full = format!("{}.{}", prim.path, attr.name);
        if let Some(value) = &attr.default {
            if !attr.type_name.accepts(value) {
                return Err(Error::TypeMismatch {
                    expected: format!("{} for {full}", attr.type_name),
                    actual: value.kind_name().to_string(),
                });
            }
        }
        if let Some(ts) = &attr.time_samples {
            let mut last = f64::NEG_INFINITY;
            for (t, value) in ts.iter() {
                if t <= last {
                    return Err(Error::TimeSamples { path: full, detail: format!("time {t} after {last}") });
                }
                last = t;
                if !attr.type_name.accepts(value) {
                    return Err(Error::TypeMismatch {
                        expected: format!("{} for {full}", attr.type_name),
                        actual: value.kind_name().to_string(),
                    });
                }
            }
        }
        for target in &attr.connections {
            if !self.has_object(target) {
                return Err(Error::DanglingReference { from: full, to: target.to_string() });
            }
        }
        Ok(())
    }
}

fn check_siblings(parent: &Path, prims: &[Prim]) -> Result<()> {
    let mut names = HashSet::new();
    for p in prims {
        if !names.insert(p.name.as_str()) {
            return Err(Error::InvalidPath(format!("duplicate child '{}' under {parent}", p.name)));
        }
    }
    Ok(())
}

/// Check the mesh topology invariant: counts sum to the index count and
/// every index addresses an existing point.
pub fn validate_mesh(point_count: usize, counts: &[i32], indices: &[i32]) -> Result<()> {
    let mut total = 0usize;
    for &c in counts {
        if c < 3 {
            return Err(Error::invalid(format!("face with {c} vertices")));
        }
        total += c as usize;
    }
    if total != indices.len() {
        return Err(Error::invalid(format!(
            "faceVertexCounts sum {total} != faceVertexIndices length {}",
            indices.len()
        )));
    }
    if let Some(bad) = indices.iter().find(|&&i| i < 0 || i as usize >= point_count) {
        return Err(Error::invalid(format!("vertex index {bad} out of range 0..{point_count}")));
    }
    Ok(())
}

/// [`validate_mesh`] applied to a Mesh prim's default topology.
pub fn validate_mesh_prim(prim: &Prim) -> Result<()> {
    let points = prim
        .attribute("points")
        .and_then(|a| a.default.as_ref().or_else(|| a.time_samples.as_ref().and_then(|t| t.first())));
    let counts = prim.attribute("faceVertexCounts").and_then(|a| a.default.as_ref());
    let indices = prim.attribute("faceVertexIndices").and_then(|a| a.default.as_ref());
    match (points, counts, indices) {
        (Some(points), Some(Value::IntArray(counts)), Some(Value::IntArray(indices))) => {
            validate_mesh(points.len(), counts, indices)
                .map_err(|e| Error::invalid(format!("{}: {e}", prim.path)))
        }
        (None, None, None) => Ok(()),
        _ => Err(Error::invalid(format!("{}: incomplete mesh topology", prim.path))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdf::{BaseType, Relationship, ValueType};
    use crate::util::Vec3;

    fn sample_stage() -> Stage {
        let mut stage = Stage::new();
        stage.metadata.default_prim = Some("Root".into());
        let root = stage.define_root("Root", PrimType::Xform).unwrap();
        root.define_child("Cube", PrimType::Xform).unwrap();
        stage
            .define_prim(&"/Root/Cube/Mesh".parse().unwrap(), PrimType::Mesh)
            .unwrap();
        stage
    }

    #[test]
    fn test_prim_lookup() {
        let stage = sample_stage();
        let mesh = stage.prim_at(&"/Root/Cube/Mesh".parse().unwrap()).unwrap();
        assert_eq!(mesh.prim_type, PrimType::Mesh);
        assert!(stage.prim_at(&"/Root/Nope".parse().unwrap()).is_none());
        let names: Vec<&str> = stage.traverse().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["Root", "Cube", "Mesh"]);
        assert!(stage.validate().is_ok());
    }

    #[test]
    fn test_define_without_parent() {
        let mut stage = Stage::new();
        assert!(stage.define_prim(&"/A/B".parse().unwrap(), PrimType::Xform).is_err());
    }

    #[test]
    fn test_dangling_relationship() {
        let mut stage = sample_stage();
        let mesh = stage.prim_at_mut(&"/Root/Cube/Mesh".parse().unwrap()).unwrap();
        mesh.add_relationship(Relationship::new(
            "material:binding",
            vec!["/Root/Materials/Missing".parse().unwrap()],
        ))
        .unwrap();
        assert!(matches!(stage.validate(), Err(Error::DanglingReference { .. })));
    }

    #[test]
    fn test_type_mismatch() {
        let mut stage = sample_stage();
        let cube = stage.prim_at_mut(&"/Root/Cube".parse().unwrap()).unwrap();
        cube.add_attribute(
            Attribute::new("xformOp:transform", ValueType::scalar(BaseType::Matrix4d))
                .with_default(Value::Float(1.0)),
        )
        .unwrap();
        assert!(matches!(stage.validate(), Err(Error::TypeMismatch { .. })));
    }

    #[test]
    fn test_validate_mesh() {
        assert!(validate_mesh(4, &[3, 3], &[0, 1, 2, 0, 2, 3]).is_ok());
        assert!(validate_mesh(4, &[3, 3], &[0, 1, 2, 0, 2]).is_err());
        assert!(validate_mesh(3, &[3], &[0, 1, 3]).is_err());
        assert!(validate_mesh(3, &[3], &[0, -1, 2]).is_err());

        let mut stage = sample_stage();
        let mesh = stage.prim_at_mut(&"/Root/Cube/Mesh".parse().unwrap()).unwrap();
        mesh.add_attribute(
            Attribute::new("points", ValueType::array(BaseType::Point3f))
                .with_default(Value::Vec3fArray(vec![Vec3::ZERO; 3])),
        )
        .unwrap();
        mesh.add_attribute(
            Attribute::new("faceVertexCounts", ValueType::array(BaseType::Int))
                .with_default(Value::IntArray(vec![3])),
        )
        .unwrap();
        mesh.add_attribute(
            Attribute::new("faceVertexIndices", ValueType::array(BaseType::Int))
                .with_default(Value::IntArray(vec![0, 1, 5])),
        )
        .unwrap();
        let mesh = stage.prim_at(&"/Root/Cube/Mesh".parse().unwrap()).unwrap();
        assert!(validate_mesh_prim(mesh).is_err());
        // Bad topology is skipped by the builders, not rejected structurally.
        assert!(stage.validate().is_ok());
    }
}
