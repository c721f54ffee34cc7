use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::render::frame::CpuFrame;

use super::error::{CompileError, PassError};
use super::uniform::{UniformLayout, UniformView};

/// Per-pixel reference implementation of an effect, evaluated by the CPU
/// backend: `(input, uv, uniforms) -> rgba`.
pub type CpuKernel = fn(&CpuFrame, [f32; 2], &UniformView) -> [f32; 4];

/// Everything a backend needs to build a program. `source` has already
/// been assembled and validated.
pub struct ProgramSource<'a> {
    pub name: &'a str,
    pub source: &'a str,
    pub layout: &'a UniformLayout,
    pub kernel: Option<CpuKernel>,
}

/// A rendering backend able to run screen-space effect passes.
pub trait Backend {
    type Program;
    type Frame;

    fn name(&self) -> &'static str;

    fn compile(&self, source: &ProgramSource) -> Result<Self::Program, CompileError>;

    /// Push a packed uniform block to the program's uniform storage.
    fn write_uniforms(&self, program: &mut Self::Program, words: &[u32]);

    /// Run one fullscreen pass reading `input` and writing `output`.
    fn run_pass(
        &self,
        program: &Self::Program,
        input: &Self::Frame,
        output: &mut Self::Frame,
    ) -> Result<(), PassError>;

    /// Largest width or height `allocate_frame` accepts.
    fn max_frame_dimension(&self) -> u32;

    /// Callers check sizes here before `allocate_frame`.
    fn check_frame_size(&self, width: u32, height: u32) -> Result<(), PassError> {
        let max = self.max_frame_dimension();
        if width > max || height > max {
            return Err(PassError::FrameTooLarge {
                size: (width, height),
                max,
            });
        }
        Ok(())
    }

    fn allocate_frame(&self, width: u32, height: u32) -> Self::Frame;

    fn frame_size(frame: &Self::Frame) -> (u32, u32);

    /// Copy a CPU image into a backend frame of the same size.
    fn upload_frame(&self, image: &CpuFrame, frame: &mut Self::Frame) -> Result<(), PassError>;

    fn read_frame(&self, frame: &Self::Frame) -> Result<CpuFrame, PassError>;

    /// Number of compiled programs currently alive.
    fn live_programs(&self) -> usize;
}

/// Counts live backend programs. Each program holds a [`ResourceLease`].
#[derive(Clone, Debug, Default)]
pub struct ResourceCounter(Arc<AtomicUsize>);

impl ResourceCounter {
    pub fn lease(&self) -> ResourceLease {
        self.0.fetch_add(1, Ordering::SeqCst);
        ResourceLease(self.0.clone())
    }

    pub fn live(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Released when the owning program is dropped.
#[derive(Debug)]
pub struct ResourceLease(Arc<AtomicUsize>);

impl Drop for ResourceLease {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
