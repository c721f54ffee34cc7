//! Z-buffered CPU rasterizer for box and plane meshes.
//!
//! Shading is flat Lambert per triangle in linear space (`albedo / π`
//! times irradiance), followed by linear fog on view depth and sRGB
//! encoding on write.

use std::f32::consts::PI;

use glam::{Mat4, Vec2, Vec3, Vec4Swizzles};

use crate::render::frame::CpuFrame;

use super::color::to_srgb8;
use super::graph::{Camera, Fog, Light, SceneGraph, Shape};

#[derive(Default)]
struct Lighting {
    ambient: Vec3,
    /// (direction towards the light, color * intensity)
    directional: Vec<(Vec3, Vec3)>,
    hemisphere: Vec<(Vec3, Vec3, f32)>,
}

impl Lighting {
    fn collect(scene: &SceneGraph) -> Self {
        let mut lighting = Lighting::default();
        for (world, light) in scene.lights() {
            match light {
                Light::Ambient { color, intensity } => lighting.ambient += color * intensity,
                Light::Directional { color, intensity } => {
                    let dir = world.transform_point3(Vec3::ZERO).normalize_or_zero();
                    lighting.directional.push((dir, color * intensity));
                }
                Light::Hemisphere {
                    sky,
                    ground,
                    intensity,
                } => lighting.hemisphere.push((sky, ground, intensity)),
            }
        }
        lighting
    }

    fn shade(&self, albedo: Vec3, normal: Vec3) -> Vec3 {
        let mut irradiance = self.ambient;
        for (sky, ground, intensity) in &self.hemisphere {
            let t = 0.5 * normal.y + 0.5;
            irradiance += ground.lerp(*sky, t) * *intensity;
        }
        for (dir, radiance) in &self.directional {
            irradiance += *radiance * normal.dot(*dir).max(0.0);
        }
        albedo * irradiance / PI
    }
}

/// Local-space triangles, counter-clockwise seen from outside.
fn triangles(shape: Shape) -> Vec<[Vec3; 3]> {
    let quad = |c: Vec3, u: Vec3, v: Vec3| {
        let p = [c - u - v, c + u - v, c + u + v, c - u + v];
        [[p[0], p[1], p[2]], [p[0], p[2], p[3]]]
    };
    match shape {
        Shape::Plane { width, height } => {
            quad(Vec3::ZERO, Vec3::X * width * 0.5, Vec3::Y * height * 0.5).to_vec()
        }
        Shape::Box { size } => {
            let half = size * 0.5;
            let axes = [Vec3::X, Vec3::Y, Vec3::Z];
            let mut out = Vec::with_capacity(12);
            for a in 0..3 {
                let n = axes[a];
                let u = axes[(a + 1) % 3];
                let v = axes[(a + 2) % 3];
                // u × v = n, so swapping them flips the facing.
                for (n, u, v) in [(n, u, v), (-n, v, u)] {
                    out.extend(quad(n * half, u * half, v * half));
                }
            }
            out
        }
    }
}

/// Keep the part of a view-space polygon in front of the near plane.
fn clip_near(polygon: &[Vec3], near: f32) -> Vec<Vec3> {
    let inside = |p: Vec3| p.z <= -near;
    let mut out = Vec::with_capacity(polygon.len() + 1);
    for (i, &current) in polygon.iter().enumerate() {
        let prev = polygon[(i + polygon.len() - 1) % polygon.len()];
        match (inside(prev), inside(current)) {
            (true, true) => out.push(current),
            (true, false) => out.push(intersect(prev, current, near)),
            (false, true) => {
                out.push(intersect(prev, current, near));
                out.push(current);
            }
            (false, false) => {}
        }
    }
    out
}

fn intersect(a: Vec3, b: Vec3, near: f32) -> Vec3 {
    let t = (-near - a.z) / (b.z - a.z);
    a.lerp(b, t)
}

fn edge(a: Vec2, b: Vec2, p: Vec2) -> f32 {
    (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
}

fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Screen-space vertex: pixel position and 1 / view depth.
#[derive(Clone, Copy)]
struct ScreenVertex {
    pos: Vec2,
    inv_depth: f32,
}

#[derive(Default)]
pub struct Rasterizer {
    depth: Vec<f32>,
}

impl Rasterizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Draw `scene` from its first camera into `target`, replacing its
    /// contents.
    pub fn render(&mut self, scene: &SceneGraph, target: &mut CpuFrame) {
        let (width, height) = target.size();
        self.depth.clear();
        self.depth.resize((width as usize) * (height as usize), f32::INFINITY);

        let background = to_srgb8(scene.environment.background);
        for px in target.data_mut().chunks_exact_mut(4) {
            px.copy_from_slice(&background);
        }
        if width == 0 || height == 0 {
            return;
        }

        let (camera_world, camera) = scene.camera().unwrap_or((Mat4::IDENTITY, Camera::default()));
        let view = camera_world.inverse();
        let projection = Mat4::perspective_rh(
            camera.fov_y_degrees.to_radians(),
            width as f32 / height as f32,
            camera.near,
            camera.far,
        );
        let lighting = Lighting::collect(scene);
        let fog = scene.environment.fog;

        let to_screen = |p: Vec3| {
            let clip = projection * p.extend(1.0);
            let ndc = clip.xyz() / clip.w;
            ScreenVertex {
                pos: Vec2::new(
                    (ndc.x + 1.0) * 0.5 * width as f32,
                    (1.0 - ndc.y) * 0.5 * height as f32,
                ),
                inv_depth: 1.0 / clip.w,
            }
        };

        for (world, mesh) in scene.meshes() {
            let model_view = view * world;
            for tri in triangles(mesh.shape) {
                let v = tri.map(|p| model_view.transform_point3(p));
                if (v[1] - v[0]).cross(v[2] - v[0]).dot(v[0]) >= 0.0 {
                    continue;
                }
                let w = tri.map(|p| world.transform_point3(p));
                let normal = (w[1] - w[0]).cross(w[2] - w[0]).normalize_or_zero();
                let lit = lighting.shade(mesh.color, normal);

                let polygon = clip_near(&v, camera.near);
                if polygon.len() < 3 {
                    continue;
                }
                let screen: Vec<ScreenVertex> = polygon.into_iter().map(to_screen).collect();
                for i in 1..screen.len() - 1 {
                    self.fill(target, [screen[0], screen[i], screen[i + 1]], lit, fog);
                }
            }
        }
    }

    fn fill(&mut self, target: &mut CpuFrame, tri: [ScreenVertex; 3], lit: Vec3, fog: Option<Fog>) {
        let (width, height) = target.size();
        let [a, b, c] = tri;
        let area = edge(a.pos, b.pos, c.pos);
        if area.abs() < 1e-8 {
            return;
        }

        let min = a.pos.min(b.pos).min(c.pos).floor().max(Vec2::ZERO);
        let max = a.pos.max(b.pos).max(c.pos).ceil();
        let x_end = (max.x.max(0.0) as u32).min(width);
        let y_end = (max.y.max(0.0) as u32).min(height);

        for y in (min.y as u32)..y_end {
            for x in (min.x as u32)..x_end {
                let p = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
                let w0 = edge(b.pos, c.pos, p) / area;
                let w1 = edge(c.pos, a.pos, p) / area;
                let w2 = edge(a.pos, b.pos, p) / area;
                if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                    continue;
                }
                let depth = 1.0 / (w0 * a.inv_depth + w1 * b.inv_depth + w2 * c.inv_depth);
                let index = (y as usize) * (width as usize) + x as usize;
                if depth >= self.depth[index] {
                    continue;
                }
                self.depth[index] = depth;
                let color = match fog {
                    Some(fog) => lit.lerp(fog.color, smoothstep(fog.near, fog.far, depth)),
                    None => lit,
                };
                target.put(x, y, to_srgb8(color));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::graph::{Environment, Mesh, NodeKind, Transform};

    const BG: Vec3 = Vec3::new(0.0, 0.0, 0.2);

    /// Camera at the origin looking down -Z; ambient light of π so that a
    /// surface shows its albedo.
    fn scene() -> SceneGraph {
        let mut graph = SceneGraph::new();
        graph.environment = Environment {
            background: BG,
            fog: None,
        };
        graph.add(
            graph.root(),
            "ambient",
            NodeKind::Light(Light::Ambient {
                color: Vec3::ONE,
                intensity: PI,
            }),
            Transform::IDENTITY,
        );
        graph.add(graph.root(), "camera", NodeKind::Camera(Camera::default()), Transform::IDENTITY);
        graph
    }

    fn add_box(graph: &mut SceneGraph, z: f32, size: f32, color: Vec3) {
        graph.add(
            graph.root(),
            "box",
            NodeKind::Mesh(Mesh {
                shape: Shape::Box {
                    size: Vec3::splat(size),
                },
                color,
            }),
            Transform::from_translation(Vec3::new(0.0, 0.0, z)),
        );
    }

    fn render(graph: &SceneGraph) -> CpuFrame {
        let mut frame = CpuFrame::new(32, 32);
        Rasterizer::new().render(graph, &mut frame);
        frame
    }

    #[test]
    fn empty_scene_is_background() {
        let frame = render(&scene());
        assert!(frame
            .data()
            .chunks(4)
            .all(|px| px == to_srgb8(BG).as_slice()));
    }

    #[test]
    fn box_in_front_of_camera_is_drawn() {
        let mut graph = scene();
        add_box(&mut graph, -5.0, 1.0, Vec3::new(1.0, 0.0, 0.0));
        let frame = render(&graph);
        assert_eq!(frame.get(16, 16), [255, 0, 0, 255]);
        assert_eq!(frame.get(0, 0), to_srgb8(BG));
    }

    #[test]
    fn nearer_surface_wins() {
        let mut graph = scene();
        add_box(&mut graph, -10.0, 2.0, Vec3::new(0.0, 1.0, 0.0));
        add_box(&mut graph, -4.0, 1.0, Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(render(&graph).get(16, 16), [255, 0, 0, 255]);

        // same boxes, inserted the other way round
        let mut graph = scene();
        add_box(&mut graph, -4.0, 1.0, Vec3::new(1.0, 0.0, 0.0));
        add_box(&mut graph, -10.0, 2.0, Vec3::new(0.0, 1.0, 0.0));
        assert_eq!(render(&graph).get(16, 16), [255, 0, 0, 255]);
    }

    #[test]
    fn distant_surfaces_fade_into_fog() {
        let mut graph = scene();
        graph.environment.fog = Some(Fog {
            color: BG,
            near: 1.0,
            far: 2.0,
        });
        add_box(&mut graph, -10.0, 1.0, Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(render(&graph).get(16, 16), to_srgb8(BG));
    }

    #[test]
    fn inside_of_a_box_is_culled() {
        let mut graph = scene();
        add_box(&mut graph, 0.0, 10.0, Vec3::ONE);
        assert_eq!(render(&graph).get(16, 16), to_srgb8(BG));
    }

    #[test]
    fn floor_crossing_the_near_plane_is_clipped() {
        let mut graph = scene();
        graph.add(
            graph.root(),
            "floor",
            NodeKind::Mesh(Mesh {
                shape: Shape::Plane {
                    width: 100.0,
                    height: 100.0,
                },
                color: Vec3::ONE,
            }),
            Transform::from_translation(Vec3::new(0.0, -1.0, 0.0))
                .with_rotation(glam::Quat::from_rotation_x(-PI / 2.0)),
        );
        let frame = render(&graph);
        assert_eq!(frame.get(16, 31), [255, 255, 255, 255]);
        assert_eq!(frame.get(16, 0), to_srgb8(BG));
    }
}
