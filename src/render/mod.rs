pub mod cpu_backend;
pub mod frame;
pub mod gpu;
pub mod wgpu_backend;
