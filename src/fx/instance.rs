use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::backend::Backend;
use super::error::{CompileError, ParameterError};
use super::param::{ParamStore, ParamValue};
use super::program::{ProgramDesc, ShaderProgramResource};
use super::uniform::FrameInfo;

static NEXT_EFFECT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EffectId(u64);

impl EffectId {
    fn next() -> Self {
        Self(NEXT_EFFECT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for EffectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Timing for the frame being rendered. Resolution is filled in by the chain.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FrameContext {
    pub frame_index: u64,
    pub time: f32,
    pub delta_time: f32,
}

impl FrameContext {
    pub fn at(frame_index: u64, fps: u32) -> Self {
        let fps = fps.max(1) as f32;
        Self {
            frame_index,
            time: frame_index as f32 / fps,
            delta_time: 1.0 / fps,
        }
    }
}

fn lock(params: &Mutex<ParamStore>) -> MutexGuard<'_, ParamStore> {
    params.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Writes parameters of one effect instance from any thread.
///
/// Writes become visible to the shader at the next `update`.
#[derive(Clone)]
pub struct ParamHandle {
    params: Arc<Mutex<ParamStore>>,
}

impl ParamHandle {
    pub fn set(&self, name: &str, value: ParamValue) -> Result<(), ParameterError> {
        lock(&self.params).set(name, value)
    }

    pub fn get(&self, name: &str) -> Option<ParamValue> {
        lock(&self.params).get(name)
    }
}

/// One effect: a compiled program and its own parameter values.
pub struct EffectInstance<B: Backend> {
    id: EffectId,
    kind: String,
    program: ShaderProgramResource<B>,
    params: Arc<Mutex<ParamStore>>,
    uploaded: Option<Vec<u32>>,
}

impl<B: Backend> EffectInstance<B> {
    pub fn create(backend: &B, desc: ProgramDesc) -> Result<Self, CompileError> {
        let program = ShaderProgramResource::compile(backend, desc)?;
        Ok(Self::from_program(program))
    }

    pub fn from_program(program: ShaderProgramResource<B>) -> Self {
        let params = ParamStore::new(program.name(), program.schema().clone());
        Self {
            id: EffectId::next(),
            kind: program.name().to_string(),
            program,
            params: Arc::new(Mutex::new(params)),
            uploaded: None,
        }
    }

    pub fn id(&self) -> EffectId {
        self.id
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn program(&self) -> &ShaderProgramResource<B> {
        &self.program
    }

    pub fn set_parameter(&mut self, name: &str, value: ParamValue) -> Result<(), ParameterError> {
        lock(&self.params).set(name, value)
    }

    pub fn parameter(&self, name: &str) -> Option<ParamValue> {
        lock(&self.params).get(name)
    }

    /// Snapshot of all current values in schema order.
    pub fn parameters(&self) -> Vec<(String, ParamValue)> {
        lock(&self.params)
            .iter()
            .map(|(n, v)| (n.to_string(), v))
            .collect()
    }

    pub fn param_handle(&self) -> ParamHandle {
        ParamHandle {
            params: self.params.clone(),
        }
    }

    /// Push the current parameter values to the backend.
    ///
    /// Skips the upload when the packed block equals the last one sent.
    pub fn update(&mut self, backend: &B, frame: &FrameInfo) {
        let words = {
            let params = lock(&self.params);
            self.program.layout().pack(params.values(), frame)
        };
        if self.uploaded.as_deref() == Some(words.as_slice()) {
            return;
        }
        backend.write_uniforms(self.program.program_mut(), &words);
        self.uploaded = Some(words);
    }

    /// Swap in a freshly compiled program, keeping id and parameter values.
    pub(crate) fn replace_program(&mut self, program: ShaderProgramResource<B>) {
        self.program = program;
        self.uploaded = None;
    }
}
