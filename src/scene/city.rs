//! The night city: ground, two building rows, three vehicle lanes, lights
//! and a fixed camera.

use std::f32::consts::PI;

use glam::{Quat, Vec3};

use super::color::{hex, hsl};
use super::graph::{Camera, Environment, Fog, Light, Mesh, NodeId, NodeKind, SceneGraph, Shape, Transform};
use super::vehicles::{Axis, Vehicle, VehicleRegistry};

const SKY: u32 = 0x3b1b55;
const BUILDINGS_PER_ROW: i32 = 20;
/// Box stand-in for the car model, long side on local X.
const CAR_SIZE: Vec3 = Vec3::new(2.0, 0.8, 1.0);

pub struct City {
    pub graph: SceneGraph,
    pub vehicles: VehicleRegistry,
}

struct Lane {
    name: &'static str,
    count: usize,
    axis: Axis,
    position: Vec3,
    rotation_y: f32,
    start: f32,
    end: f32,
    speed: f32,
}

const LANES: [Lane; 3] = [
    Lane {
        name: "overpass",
        count: 15,
        axis: Axis::Z,
        position: Vec3::new(-2.0, 5.0, 0.0),
        rotation_y: PI / 2.0,
        start: -50.0,
        end: 50.0,
        speed: 0.1,
    },
    Lane {
        name: "far_street",
        count: 7,
        axis: Axis::X,
        position: Vec3::new(0.0, 10.0, -22.0),
        rotation_y: 0.0,
        start: -20.0,
        end: 20.0,
        speed: 0.1,
    },
    Lane {
        name: "near_street",
        count: 6,
        axis: Axis::X,
        position: Vec3::new(0.0, 8.0, 30.0),
        rotation_y: PI,
        start: -20.0,
        end: 20.0,
        speed: 0.1,
    },
];

pub fn build() -> City {
    let mut graph = SceneGraph::new();
    let mut vehicles = VehicleRegistry::new();
    let root = graph.root();

    let sky = hex(SKY);
    graph.environment = Environment {
        background: sky,
        fog: Some(Fog {
            color: sky,
            near: 5.0,
            far: 50.0,
        }),
    };

    add_lights(&mut graph, root);
    add_ground(&mut graph, root);
    for lane in &LANES {
        add_lane(&mut graph, &mut vehicles, root, lane);
    }
    add_buildings(&mut graph, root, 7);
    add_buildings(&mut graph, root, -7);

    graph.add(
        root,
        "camera",
        NodeKind::Camera(Camera::default()),
        Transform::from_translation(Vec3::new(0.0, 0.8, 5.0))
            .with_rotation(Quat::from_rotation_x(PI / 20.0)),
    );

    log::debug!(
        "City built: {} nodes, {} vehicles",
        graph.len(),
        vehicles.len()
    );
    City { graph, vehicles }
}

fn add_lights(graph: &mut SceneGraph, root: NodeId) {
    graph.add(
        root,
        "ambient",
        NodeKind::Light(Light::Ambient {
            color: Vec3::ONE,
            intensity: PI / 2.0,
        }),
        Transform::IDENTITY,
    );
    graph.add(
        root,
        "sun",
        NodeKind::Light(Light::Directional {
            color: Vec3::ONE,
            intensity: PI,
        }),
        Transform::from_translation(Vec3::new(10.0, 10.0, 10.0)),
    );
    graph.add(
        root,
        "hemisphere",
        NodeKind::Light(Light::Hemisphere {
            sky: hex(0x684485),
            ground: hex(0x1818be),
            intensity: 0.3,
        }),
        Transform::IDENTITY,
    );
}

fn add_ground(graph: &mut SceneGraph, root: NodeId) {
    let ground = graph.add(root, "ground", NodeKind::Group, Transform::IDENTITY);
    graph.add(
        ground,
        "floor",
        NodeKind::Mesh(Mesh {
            shape: Shape::Plane {
                width: 100.0,
                height: 200.0,
            },
            color: hex(0x000080),
        }),
        Transform::from_translation(Vec3::new(0.0, -0.5, 0.0))
            .with_rotation(Quat::from_rotation_x(-PI / 2.0)),
    );
    for (name, position) in [
        ("slab_east", Vec3::new(22.0, -0.25, 0.0)),
        ("slab_west", Vec3::new(-22.0, 0.0, 0.0)),
    ] {
        graph.add(
            ground,
            name,
            NodeKind::Mesh(Mesh {
                shape: Shape::Box {
                    size: Vec3::new(40.0, 0.25, 200.0),
                },
                color: hex(0x0000ff),
            }),
            Transform::from_translation(position),
        );
    }
}

/// Spread factor of vehicle `i`, in [0, 1).
pub fn lane_offset(i: usize) -> f32 {
    ((37 * i) % 23) as f32 / 23.0
}

fn add_lane(graph: &mut SceneGraph, vehicles: &mut VehicleRegistry, root: NodeId, lane: &Lane) {
    let group = graph.add(root, lane.name, NodeKind::Group, Transform::IDENTITY);
    for i in 0..lane.count {
        let d = lane_offset(i);
        let mut position = lane.position + Vec3::new(0.0, d * 5.0, 0.0);
        let along = lane.start + (i as f32 + d) * (lane.end - lane.start) / lane.count as f32;
        match lane.axis {
            Axis::X => position.x = along,
            Axis::Y => position.y = along,
            Axis::Z => position.z = along,
        }
        let color = hsl(0.5 * (i as f32 / lane.count as f32 + d), 1.0, 0.5);
        let node = graph.add(
            group,
            &format!("{}_car_{}", lane.name, i),
            NodeKind::Mesh(Mesh {
                shape: Shape::Box { size: CAR_SIZE },
                color,
            }),
            Transform::from_translation(position).with_rotation(Quat::from_rotation_y(lane.rotation_y)),
        );
        vehicles.register(Vehicle {
            node,
            axis: lane.axis,
            speed: lane.speed,
            start: lane.start,
            end: lane.end,
        });
    }
}

/// Height of building `i` in the row at `x`. Uses a truncating remainder,
/// so the row at negative `x` starts with short buildings.
pub fn building_height(i: i32, x: i32) -> i32 {
    (37 * i + x) % 21 + 10
}

fn add_buildings(graph: &mut SceneGraph, root: NodeId, x: i32) {
    let row = graph.add(root, &format!("buildings_{}", x), NodeKind::Group, Transform::IDENTITY);
    for i in 0..BUILDINGS_PER_ROW {
        let height = building_height(i, x) as f32;
        graph.add(
            row,
            &format!("building_{}_{}", x, i),
            NodeKind::Mesh(Mesh {
                shape: Shape::Box {
                    size: Vec3::new(5.0, height, 5.0),
                },
                color: hsl(0.9, 1.0, height / 100.0),
            }),
            Transform::from_translation(Vec3::new(x as f32, 0.0, 60.0 - i as f32 * 6.0)),
        );
    }
}
