//! Node arena: typed nodes with parent/child links and local transforms.
//!
//! The graph is built once and then mutated in place (vehicle positions).
//! Nodes are never removed, so a [`NodeId`] stays valid for the life of
//! the graph that issued it.

use glam::{Mat4, Quat, Vec3};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    pub const IDENTITY: Self = Self {
        translation: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    pub fn from_translation(translation: Vec3) -> Self {
        Self {
            translation,
            ..Self::IDENTITY
        }
    }

    pub fn with_rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Shape {
    /// Axis-aligned box centered on the node origin.
    Box { size: Vec3 },
    /// Rectangle in the local XY plane facing +Z.
    Plane { width: f32, height: f32 },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Mesh {
    pub shape: Shape,
    /// Linear albedo.
    pub color: Vec3,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Light {
    Ambient { color: Vec3, intensity: f32 },
    /// Shines from the node position towards the origin.
    Directional { color: Vec3, intensity: f32 },
    Hemisphere { sky: Vec3, ground: Vec3, intensity: f32 },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    pub fov_y_degrees: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            fov_y_degrees: 75.0,
            near: 0.1,
            far: 1000.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum NodeKind {
    Group,
    Mesh(Mesh),
    Light(Light),
    Camera(Camera),
}

#[derive(Clone, Debug)]
pub struct Node {
    pub name: String,
    pub kind: NodeKind,
    pub transform: Transform,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl Node {
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

/// Linear fog between `near` and `far` view-space depth.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Fog {
    pub color: Vec3,
    pub near: f32,
    pub far: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Environment {
    pub background: Vec3,
    pub fog: Option<Fog>,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            background: Vec3::ZERO,
            fog: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SceneGraph {
    nodes: Vec<Node>,
    pub environment: Environment,
}

impl Default for SceneGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneGraph {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                name: "root".into(),
                kind: NodeKind::Group,
                transform: Transform::IDENTITY,
                parent: None,
                children: Vec::new(),
            }],
            environment: Environment::default(),
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn add(&mut self, parent: NodeId, name: &str, kind: NodeKind, transform: Transform) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            name: name.to_string(),
            kind,
            transform,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent.0].children.push(id);
        id
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn transform_mut(&mut self, id: NodeId) -> &mut Transform {
        &mut self.nodes[id.0].transform
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.nodes.iter().position(|n| n.name == name).map(NodeId)
    }

    pub fn world_matrix(&self, id: NodeId) -> Mat4 {
        let node = self.node(id);
        let local = node.transform.matrix();
        match node.parent {
            Some(parent) => self.world_matrix(parent) * local,
            None => local,
        }
    }

    /// Every node with its world matrix, parents before children.
    pub fn walk(&self) -> Vec<(Mat4, &Node)> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![(self.root(), Mat4::IDENTITY)];
        while let Some((id, parent_world)) = stack.pop() {
            let node = self.node(id);
            let world = parent_world * node.transform.matrix();
            out.push((world, node));
            for child in node.children.iter().rev() {
                stack.push((*child, world));
            }
        }
        out
    }

    pub fn meshes(&self) -> impl Iterator<Item = (Mat4, Mesh)> + '_ {
        self.walk().into_iter().filter_map(|(world, node)| match node.kind {
            NodeKind::Mesh(mesh) => Some((world, mesh)),
            _ => None,
        })
    }

    pub fn lights(&self) -> impl Iterator<Item = (Mat4, Light)> + '_ {
        self.walk().into_iter().filter_map(|(world, node)| match node.kind {
            NodeKind::Light(light) => Some((world, light)),
            _ => None,
        })
    }

    /// First camera in walk order.
    pub fn camera(&self) -> Option<(Mat4, Camera)> {
        self.walk().into_iter().find_map(|(world, node)| match node.kind {
            NodeKind::Camera(camera) => Some((world, camera)),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn world_matrix_composes_parents() {
        let mut graph = SceneGraph::new();
        let group = graph.add(
            graph.root(),
            "lane",
            NodeKind::Group,
            Transform::from_translation(Vec3::new(1.0, 0.0, 0.0)),
        );
        let car = graph.add(
            group,
            "car",
            NodeKind::Group,
            Transform::from_translation(Vec3::new(0.0, 2.0, 0.0)),
        );
        let p = graph.world_matrix(car).transform_point3(Vec3::ZERO);
        assert_eq!(p, Vec3::new(1.0, 2.0, 0.0));
        assert_eq!(graph.node(car).parent(), Some(group));
        assert_eq!(graph.node(group).children(), &[car]);
    }

    #[test]
    fn walk_matches_world_matrix() {
        let mut graph = SceneGraph::new();
        let a = graph.add(
            graph.root(),
            "a",
            NodeKind::Group,
            Transform::from_translation(Vec3::X).with_rotation(Quat::from_rotation_y(1.0)),
        );
        let b = graph.add(a, "b", NodeKind::Group, Transform::from_translation(Vec3::Z));
        let walked = graph
            .walk()
            .into_iter()
            .find(|(_, n)| n.name == "b")
            .map(|(m, _)| m)
            .unwrap();
        assert!(walked.abs_diff_eq(graph.world_matrix(b), 1e-6));
    }

    #[test]
    fn in_place_mutation_moves_meshes() {
        let mut graph = SceneGraph::new();
        let mesh = Mesh {
            shape: Shape::Box { size: Vec3::ONE },
            color: Vec3::ONE,
        };
        let id = graph.add(graph.root(), "box", NodeKind::Mesh(mesh), Transform::IDENTITY);
        graph.transform_mut(id).translation.z = -3.0;
        let (world, _) = graph.meshes().next().unwrap();
        assert_eq!(world.transform_point3(Vec3::ZERO), Vec3::new(0.0, 0.0, -3.0));
        assert_eq!(graph.find("box"), Some(id));
    }
}
