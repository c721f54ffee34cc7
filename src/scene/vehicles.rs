use glam::Vec3;

use super::graph::{NodeId, SceneGraph};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    fn get(self, v: Vec3) -> f32 {
        match self {
            Axis::X => v.x,
            Axis::Y => v.y,
            Axis::Z => v.z,
        }
    }

    fn set(self, v: &mut Vec3, value: f32) {
        match self {
            Axis::X => v.x = value,
            Axis::Y => v.y = value,
            Axis::Z => v.z = value,
        }
    }
}

/// Lane motion of one vehicle node.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Vehicle {
    pub node: NodeId,
    pub axis: Axis,
    pub speed: f32,
    pub start: f32,
    pub end: f32,
}

impl Vehicle {
    /// One tick: move forward while short of `end`, otherwise jump back to
    /// `start`.
    pub fn advance(&self, graph: &mut SceneGraph) {
        let translation = &mut graph.transform_mut(self.node).translation;
        let pos = self.axis.get(*translation);
        let next = if pos < self.end { pos + self.speed } else { self.start };
        self.axis.set(translation, next);
    }
}

#[derive(Clone, Debug, Default)]
pub struct VehicleRegistry {
    vehicles: Vec<Vehicle>,
}

impl VehicleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, vehicle: Vehicle) {
        self.vehicles.push(vehicle);
    }

    pub fn len(&self) -> usize {
        self.vehicles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vehicles.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Vehicle> {
        self.vehicles.iter()
    }

    pub fn advance_all(&self, graph: &mut SceneGraph) {
        for vehicle in &self.vehicles {
            vehicle.advance(graph);
        }
    }
}
