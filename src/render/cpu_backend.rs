use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;

use crate::fx::backend::{Backend, CpuKernel, ProgramSource, ResourceCounter, ResourceLease};
use crate::fx::error::{CompileError, PassError};
use crate::fx::uniform::{UniformLayout, UniformView};

use super::frame::{to_rgba8, CpuFrame};

/// Reference backend: evaluates each program's kernel per pixel, one
/// rayon task per row. Output matches the GPU path up to rounding.
#[derive(Default)]
pub struct CpuBackend {
    programs: ResourceCounter,
    failures: AtomicUsize,
    frame_limit: Option<u32>,
}

pub struct CpuProgram {
    layout: UniformLayout,
    kernel: CpuKernel,
    uniforms: Vec<u32>,
    uploads: usize,
    _lease: ResourceLease,
}

impl CpuProgram {
    pub fn uniforms(&self) -> &[u32] {
        &self.uniforms
    }

    /// How many times uniforms were written.
    pub fn uploads(&self) -> usize {
        self.uploads
    }

    pub fn view(&self) -> UniformView<'_> {
        UniformView::new(&self.layout, &self.uniforms)
    }
}

impl CpuBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap frame width and height, as a device texture limit would.
    pub fn with_frame_limit(mut self, max: u32) -> Self {
        self.frame_limit = Some(max);
        self
    }

    /// Make the next `n` passes fail as a device loss would.
    #[cfg(test)]
    pub fn fail_next_passes(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    fn take_failure(&self) -> bool {
        self.failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Backend for CpuBackend {
    type Program = CpuProgram;
    type Frame = CpuFrame;

    fn name(&self) -> &'static str {
        "cpu"
    }

    fn compile(&self, source: &ProgramSource) -> Result<CpuProgram, CompileError> {
        let kernel = source.kernel.ok_or_else(|| CompileError::Backend {
            backend: "cpu",
            program: source.name.to_string(),
            message: "no CPU kernel registered for this program".into(),
        })?;
        Ok(CpuProgram {
            layout: source.layout.clone(),
            kernel,
            uniforms: vec![0; source.layout.word_len()],
            uploads: 0,
            _lease: self.programs.lease(),
        })
    }

    fn write_uniforms(&self, program: &mut CpuProgram, words: &[u32]) {
        program.uniforms.clear();
        program.uniforms.extend_from_slice(words);
        program.uploads += 1;
    }

    fn run_pass(
        &self,
        program: &CpuProgram,
        input: &CpuFrame,
        output: &mut CpuFrame,
    ) -> Result<(), PassError> {
        if input.size() != output.size() {
            return Err(PassError::SizeMismatch {
                input: input.size(),
                output: output.size(),
            });
        }
        if self.take_failure() {
            return Err(PassError::Backend("cpu device lost".into()));
        }

        let (width, height) = input.size();
        if width == 0 || height == 0 {
            return Ok(());
        }
        let view = program.view();
        let kernel = program.kernel;
        output
            .data_mut()
            .par_chunks_mut(width as usize * 4)
            .enumerate()
            .for_each(|(y, row)| {
                let v = (y as f32 + 0.5) / height as f32;
                for (x, px) in row.chunks_exact_mut(4).enumerate() {
                    let u = (x as f32 + 0.5) / width as f32;
                    px.copy_from_slice(&to_rgba8(kernel(input, [u, v], &view)));
                }
            });
        Ok(())
    }

    fn max_frame_dimension(&self) -> u32 {
        self.frame_limit.unwrap_or(u32::MAX)
    }

    fn allocate_frame(&self, width: u32, height: u32) -> CpuFrame {
        CpuFrame::new(width, height)
    }

    fn frame_size(frame: &CpuFrame) -> (u32, u32) {
        frame.size()
    }

    fn upload_frame(&self, image: &CpuFrame, frame: &mut CpuFrame) -> Result<(), PassError> {
        if image.size() != frame.size() {
            return Err(PassError::SizeMismatch {
                input: image.size(),
                output: frame.size(),
            });
        }
        frame.data_mut().copy_from_slice(image.data());
        Ok(())
    }

    fn read_frame(&self, frame: &CpuFrame) -> Result<CpuFrame, PassError> {
        Ok(frame.clone())
    }

    fn live_programs(&self) -> usize {
        self.programs.live()
    }
}
