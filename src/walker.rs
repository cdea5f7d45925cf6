//! Scene traversal.
//!
//! The walker visits the host hierarchy depth-first in pre-order, prunes
//! hidden subtrees, restricts output to the requested scope and assigns
//! every exported node a unique prim path. Nodes sharing one mesh datablock
//! are grouped: the first one visited owns the geometry and the others
//! become instances of it.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info_span};

use crate::diagnostics::Warning;
use crate::host::{HostScene, MeshId, NodeData, NodeId};
use crate::sdf::{make_identifier, make_unique, Path};
use crate::util::{DMat4, DVec3, Result};

/// Root-level prim names owned by the stage layout.
pub const RESERVED_ROOT_NAMES: &[&str] = &["Materials", "Prototypes"];

/// Child name of an armature's Skeleton prim.
pub const SKELETON_PRIM_NAME: &str = "Skel";

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Scope {
    #[default]
    EntireScene,
    Collection(String),
}

impl Scope {
    pub fn from_option(collection: Option<&str>) -> Self {
        match collection {
            Some(name) => Self::Collection(name.to_string()),
            None => Self::EntireScene,
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::EntireScene => "scene".to_string(),
            Self::Collection(name) => format!("collection '{name}'"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MeshRole {
    Owner,
    Instance { owner: NodeId },
}

#[derive(Clone, Debug, PartialEq)]
pub struct MeshInstance {
    pub mesh: MeshId,
    pub role: MeshRole,
    /// Name of the Mesh (or instance) child prim.
    pub prim_name: String,
}

impl MeshInstance {
    pub fn is_owner(&self) -> bool {
        self.role == MeshRole::Owner
    }
}

/// One exported node.
#[derive(Clone, Debug, PartialEq)]
pub struct WalkedNode {
    pub node: NodeId,
    pub name: String,
    pub path: Path,
    pub parent_path: Path,
    /// Nearest exported ancestor.
    pub parent: Option<NodeId>,
    /// Transform relative to `parent`, unscaled.
    pub local_transform: DMat4,
    /// World transform including the global scale.
    pub world_transform: DMat4,
    pub mesh_instance: Option<MeshInstance>,
    pub is_armature: bool,
    pub is_animated: bool,
}

impl WalkedNode {
    pub fn is_root_level(&self) -> bool {
        self.parent.is_none()
    }
}

#[derive(Clone, Debug)]
pub struct WalkResult {
    pub root_path: Path,
    pub nodes: Vec<WalkedNode>,
    pub warnings: Vec<Warning>,
    pub global_scale: f64,
    index: HashMap<NodeId, usize>,
    owners: HashMap<MeshId, NodeId>,
}

impl WalkResult {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn get(&self, node: NodeId) -> Option<&WalkedNode> {
        self.index.get(&node).map(|&i| &self.nodes[i])
    }

    /// Node owning the geometry of `mesh`.
    pub fn owner_of(&self, mesh: MeshId) -> Option<&WalkedNode> {
        self.owners.get(&mesh).and_then(|n| self.get(*n))
    }

    /// Owner nodes in walk order.
    pub fn mesh_owners(&self) -> impl Iterator<Item = &WalkedNode> {
        self.nodes
            .iter()
            .filter(|n| n.mesh_instance.as_ref().is_some_and(MeshInstance::is_owner))
    }

    /// Whether `ancestor` is an exported ancestor of `node`.
    pub fn is_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut cur = self.get(node).and_then(|n| n.parent);
        while let Some(p) = cur {
            if p == ancestor {
                return true;
            }
            cur = self.get(p).and_then(|n| n.parent);
        }
        false
    }
}

pub struct SceneWalker {
    scope: Scope,
    global_scale: f64,
    root_path: Path,
}

struct Parent {
    node: Option<NodeId>,
    path: Path,
    host_world: DMat4,
}

impl SceneWalker {
    pub fn new(scope: Scope, global_scale: f64, root_path: Path) -> Self {
        Self { scope, global_scale, root_path }
    }

    /// Walk the scene in its current frame state.
    pub fn walk(&self, scene: &dyn HostScene) -> Result<WalkResult> {
        let _span = info_span!("walk", scope = %self.scope.describe()).entered();
        let mut result = WalkResult {
            root_path: self.root_path.clone(),
            nodes: Vec::new(),
            warnings: Vec::new(),
            global_scale: self.global_scale,
            index: HashMap::new(),
            owners: HashMap::new(),
        };

        let included = match &self.scope {
            Scope::EntireScene => None,
            Scope::Collection(name) => match collect_members(scene, name) {
                Some(set) => Some(set),
                None => {
                    result.warnings.push(Warning::MissingCollection(name.clone()));
                    result.warnings.push(Warning::EmptyExport { scope: self.scope.describe() });
                    return Ok(result);
                }
            },
        };

        let mut root_taken: HashSet<String> =
            RESERVED_ROOT_NAMES.iter().map(|s| s.to_string()).collect();
        let parent = Parent {
            node: None,
            path: self.root_path.clone(),
            host_world: DMat4::IDENTITY,
        };
        for root in scene.root_nodes() {
            self.visit(scene, root, &parent, &mut root_taken, included.as_ref(), &mut result)?;
        }

        if result.is_empty() {
            result.warnings.push(Warning::EmptyExport { scope: self.scope.describe() });
        }
        debug!(nodes = result.nodes.len(), "walk finished");
        Ok(result)
    }

    fn visit(
        &self,
        scene: &dyn HostScene,
        id: NodeId,
        parent: &Parent,
        taken: &mut HashSet<String>,
        included: Option<&HashSet<NodeId>>,
        result: &mut WalkResult,
    ) -> Result<()> {
        let Some(node) = scene.node(id) else {
            return Ok(());
        };
        if !node.visible {
            debug!(node = %node.name, "pruned hidden subtree");
            return Ok(());
        }
        let host_world = parent.host_world * scene.local_transform(id);

        if included.is_some_and(|set| !set.contains(&id)) {
            for child in scene.children(id) {
                let pass = Parent { node: parent.node, path: parent.path.clone(), host_world };
                self.visit(scene, child, &pass, taken, included, result)?;
            }
            return Ok(());
        }

        let name = make_unique(&make_identifier(&node.name), taken);
        let path = parent.path.append_child(&name)?;
        let parent_world = match parent.node {
            Some(_) => parent.host_world,
            None => DMat4::IDENTITY,
        };
        let local_transform = parent_world.inverse() * host_world;
        let world_transform = DMat4::from_scale(DVec3::splat(self.global_scale)) * host_world;

        let mut child_taken = HashSet::new();
        let mesh_instance = match &node.data {
            NodeData::Mesh { mesh, .. } => {
                let base = scene
                    .mesh(*mesh)
                    .map(|m| make_identifier(&m.name))
                    .filter(|n| n != "_")
                    .unwrap_or_else(|| "Mesh".to_string());
                let prim_name = make_unique(&base, &mut child_taken);
                let role = match result.owners.get(mesh) {
                    Some(owner) => MeshRole::Instance { owner: *owner },
                    None => {
                        result.owners.insert(*mesh, id);
                        MeshRole::Owner
                    }
                };
                Some(MeshInstance { mesh: *mesh, role, prim_name })
            }
            _ => None,
        };
        let is_armature = matches!(node.data, NodeData::Armature(_));
        if is_armature {
            child_taken.insert(SKELETON_PRIM_NAME.to_string());
        }

        result.index.insert(id, result.nodes.len());
        result.nodes.push(WalkedNode {
            node: id,
            name,
            path: path.clone(),
            parent_path: parent.path.clone(),
            parent: parent.node,
            local_transform,
            world_transform,
            mesh_instance,
            is_armature,
            is_animated: scene.is_animated(id),
        });

        let here = Parent { node: Some(id), path, host_world };
        for child in scene.children(id) {
            self.visit(scene, child, &here, &mut child_taken, included, result)?;
        }
        Ok(())
    }
}

/// Members of a collection and its child collections, recursively.
fn collect_members(scene: &dyn HostScene, name: &str) -> Option<HashSet<NodeId>> {
    scene.collection(name)?;
    let mut members = HashSet::new();
    let mut visited = HashSet::new();
    let mut stack = vec![name.to_string()];
    while let Some(current) = stack.pop() {
        if !visited.insert(current.clone()) {
            continue;
        }
        if let Some(c) = scene.collection(&current) {
            members.extend(c.objects.iter().copied());
            stack.extend(c.children.iter().cloned());
        }
    }
    Some(members)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{Collection, InMemoryScene, MeshData, Trs};
    use crate::util::Vec3;

    fn root() -> Path {
        "/Scene".parse().unwrap()
    }

    fn mesh_node(scene: &mut InMemoryScene, name: &str, parent: Option<NodeId>, mesh: MeshId) -> NodeId {
        scene.add_node(
            name,
            parent,
            Trs::IDENTITY,
            NodeData::Mesh { mesh, materials: vec![], armature: None },
        )
    }

    #[test]
    fn test_preorder_and_names() {
        let mut scene = InMemoryScene::new("Scene");
        let a = scene.add_node("Group", None, Trs::IDENTITY, NodeData::Empty);
        scene.add_node("Cube.001", Some(a), Trs::IDENTITY, NodeData::Empty);
        scene.add_node("Cube 001", Some(a), Trs::IDENTITY, NodeData::Empty);
        scene.add_node("Materials", None, Trs::IDENTITY, NodeData::Empty);
        scene.add_node("After", None, Trs::IDENTITY, NodeData::Empty);

        let walk = SceneWalker::new(Scope::EntireScene, 1.0, root()).walk(&scene).unwrap();
        let paths: Vec<&str> = walk.nodes.iter().map(|n| n.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "/Scene/Group",
                "/Scene/Group/Cube_001",
                "/Scene/Group/Cube_001_1",
                "/Scene/Materials_1",
                "/Scene/After",
            ]
        );
    }

    #[test]
    fn test_hidden_subtree_pruned() {
        let mut scene = InMemoryScene::new("Scene");
        let a = scene.add_node("Hidden", None, Trs::IDENTITY, NodeData::Empty);
        scene.add_node("Child", Some(a), Trs::IDENTITY, NodeData::Empty);
        scene.scene_node_mut(a).unwrap().node.visible = false;
        let walk = SceneWalker::new(Scope::EntireScene, 1.0, root()).walk(&scene).unwrap();
        assert!(walk.is_empty());
        assert!(matches!(walk.warnings[0], Warning::EmptyExport { .. }));
    }

    #[test]
    fn test_instancing() {
        let mut scene = InMemoryScene::new("Scene");
        let mesh = scene.add_mesh(MeshData { name: "Cube".into(), ..Default::default() });
        let a = mesh_node(&mut scene, "A", None, mesh);
        let b = mesh_node(&mut scene, "B", None, mesh);
        let walk = SceneWalker::new(Scope::EntireScene, 1.0, root()).walk(&scene).unwrap();
        assert_eq!(walk.owner_of(mesh).unwrap().node, a);
        let inst = walk.get(b).unwrap().mesh_instance.as_ref().unwrap();
        assert_eq!(inst.role, MeshRole::Instance { owner: a });
        assert_eq!(walk.mesh_owners().count(), 1);
    }

    #[test]
    fn test_collection_scope() {
        let mut scene = InMemoryScene::new("Scene");
        let group = scene.add_node(
            "Group",
            None,
            Trs { translation: Vec3::new(0.0, 0.0, 5.0), ..Trs::IDENTITY },
            NodeData::Empty,
        );
        let inner = scene.add_node(
            "Inner",
            Some(group),
            Trs { translation: Vec3::X, ..Trs::IDENTITY },
            NodeData::Empty,
        );
        let other = scene.add_node("Other", None, Trs::IDENTITY, NodeData::Empty);
        scene.add_collection(Collection { name: "Props".into(), objects: vec![], children: vec!["Sub".into()] });
        scene.add_collection(Collection { name: "Sub".into(), objects: vec![inner, other], children: vec![] });

        let walk = SceneWalker::new(Scope::Collection("Props".into()), 2.0, root())
            .walk(&scene)
            .unwrap();
        assert_eq!(walk.len(), 2);
        let inner_w = walk.get(inner).unwrap();
        assert!(inner_w.is_root_level());
        assert_eq!(inner_w.path.as_str(), "/Scene/Inner");
        assert!((inner_w.local_transform.w_axis.z - 5.0).abs() < 1e-9);
        assert!((inner_w.world_transform.w_axis.z - 10.0).abs() < 1e-9);
        assert!(walk.get(group).is_none());
    }

    #[test]
    fn test_missing_collection() {
        let scene = InMemoryScene::new("Scene");
        let walk = SceneWalker::new(Scope::Collection("Nope".into()), 1.0, root())
            .walk(&scene)
            .unwrap();
        assert!(walk.is_empty());
        assert_eq!(walk.warnings[0], Warning::MissingCollection("Nope".into()));
        assert_eq!(walk.root_path, root());
        assert_eq!(walk.global_scale, 1.0);
    }
}
