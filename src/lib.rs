//! Screen-space post-processing chain over an offline-rendered city scene.
//!
//! [`fx`] holds the effect system (programs, instances, the chain),
//! [`render`] the CPU and wgpu backends, [`scene`] the city and its
//! rasterizer, and [`encode`] the ffmpeg sink.

pub mod encode;
pub mod fx;
pub mod render;
pub mod scene;
