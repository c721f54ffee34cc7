use std::sync::Arc;

use naga::valid::{Capabilities, ValidationFlags, Validator};

use super::backend::{Backend, CpuKernel, ProgramSource};
use super::error::CompileError;
use super::param::ParamSchema;
use super::uniform::UniformLayout;

/// Feature flags every program sees before anything else in its source.
const CAPABILITY_PRELUDE: &str = "const TIME_EXISTS: bool = true;\n";

/// Bindings, fullscreen triangle and sampling helper shared by all effects.
const COMMON_HEADER: &str = r#"
@group(0) @binding(0) var<uniform> fx: FxUniforms;
@group(0) @binding(1) var input_tex: texture_2d<f32>;
@group(0) @binding(2) var input_sampler: sampler;

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_main(@builtin(vertex_index) vertex_index: u32) -> VertexOutput {
    var out: VertexOutput;
    let x = f32(i32(vertex_index) / 2) * 4.0 - 1.0;
    let y = f32(i32(vertex_index) % 2) * 4.0 - 1.0;
    out.position = vec4<f32>(x, y, 0.0, 1.0);
    out.uv = vec2<f32>((x + 1.0) * 0.5, (1.0 - y) * 0.5);
    return out;
}

fn sample_input(uv: vec2<f32>) -> vec4<f32> {
    return textureSampleLevel(input_tex, input_sampler, uv, 0.0);
}
"#;

/// Inputs to [`ShaderProgramResource::compile`].
#[derive(Clone)]
pub struct ProgramDesc {
    pub name: String,
    /// Effect body: must define `fs_main(vin: VertexOutput) -> @location(0) vec4<f32>`.
    pub body: String,
    pub schema: ParamSchema,
    pub kernel: Option<CpuKernel>,
}

/// A compiled screen-space program plus its parameter schema.
///
/// The backend program is released when this value is dropped.
pub struct ShaderProgramResource<B: Backend> {
    name: String,
    source: String,
    schema: Arc<ParamSchema>,
    layout: UniformLayout,
    kernel: Option<CpuKernel>,
    program: B::Program,
}

impl<B: Backend> ShaderProgramResource<B> {
    pub fn compile(backend: &B, desc: ProgramDesc) -> Result<Self, CompileError> {
        let ProgramDesc {
            name,
            body,
            schema,
            kernel,
        } = desc;

        schema.validate().map_err(|reason| CompileError::InvalidSchema {
            program: name.clone(),
            reason,
        })?;

        let layout = UniformLayout::new(&schema);
        let source = assemble_source(&layout, &body);
        validate_source(&name, &source)?;

        let program = backend.compile(&ProgramSource {
            name: &name,
            source: &source,
            layout: &layout,
            kernel,
        })?;
        log::debug!(
            "Compiled '{}' on {} ({} uniform bytes)",
            name,
            backend.name(),
            layout.byte_len()
        );

        Ok(Self {
            name,
            source,
            schema: Arc::new(schema),
            layout,
            kernel,
            program,
        })
    }

    /// Build a new program from a different body with the same schema.
    pub fn recompile(&self, backend: &B, body: &str) -> Result<Self, CompileError> {
        Self::compile(
            backend,
            ProgramDesc {
                name: self.name.clone(),
                body: body.to_string(),
                schema: (*self.schema).clone(),
                kernel: self.kernel,
            },
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn schema(&self) -> &Arc<ParamSchema> {
        &self.schema
    }

    pub fn layout(&self) -> &UniformLayout {
        &self.layout
    }

    pub fn program(&self) -> &B::Program {
        &self.program
    }

    pub fn program_mut(&mut self) -> &mut B::Program {
        &mut self.program
    }
}

/// Prelude, generated uniform struct, common header, then the body.
pub fn assemble_source(layout: &UniformLayout, body: &str) -> String {
    format!(
        "{}\n{}{}\n{}",
        CAPABILITY_PRELUDE,
        layout.wgsl_struct(),
        COMMON_HEADER,
        body
    )
}

/// Parse and validate WGSL without touching any backend.
pub fn validate_source(name: &str, source: &str) -> Result<(), CompileError> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| CompileError::Parse {
        program: name.to_string(),
        message: e.emit_to_string(source),
    })?;

    Validator::new(ValidationFlags::all(), Capabilities::all())
        .validate(&module)
        .map_err(|e| CompileError::Validation {
            program: name.to_string(),
            message: e.as_inner().to_string(),
        })?;

    let has_entry = |stage: naga::ShaderStage, entry: &str| {
        module
            .entry_points
            .iter()
            .any(|ep| ep.stage == stage && ep.name == entry)
    };
    if !has_entry(naga::ShaderStage::Vertex, "vs_main") {
        return Err(CompileError::MissingEntryPoint {
            program: name.to_string(),
            stage: "vertex",
            entry: "vs_main",
        });
    }
    if !has_entry(naga::ShaderStage::Fragment, "fs_main") {
        return Err(CompileError::MissingEntryPoint {
            program: name.to_string(),
            stage: "fragment",
            entry: "fs_main",
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fx::param::ParamDecl;
    use crate::fx::uniform::UniformView;
    use crate::render::cpu_backend::CpuBackend;
    use crate::render::frame::CpuFrame;

    const PASSTHROUGH: &str = r#"
@fragment
fn fs_main(vin: VertexOutput) -> @location(0) vec4<f32> {
    return sample_input(vin.uv);
}
"#;

    fn desc(body: &str) -> ProgramDesc {
        ProgramDesc {
            name: "passthrough".into(),
            body: body.into(),
            schema: ParamSchema::new(vec![ParamDecl::float("amount", 1.0)]),
            kernel: Some(passthrough_kernel as CpuKernel),
        }
    }

    fn passthrough_kernel(input: &CpuFrame, uv: [f32; 2], _: &UniformView) -> [f32; 4] {
        input.sample(uv)
    }

    #[test]
    fn capability_flag_comes_first() {
        let layout = UniformLayout::new(&ParamSchema::empty());
        let src = assemble_source(&layout, PASSTHROUGH);
        assert!(src.starts_with("const TIME_EXISTS: bool = true;"));
    }

    #[test]
    fn compiles_valid_program() {
        let backend = CpuBackend::new();
        let program = ShaderProgramResource::compile(&backend, desc(PASSTHROUGH)).unwrap();
        assert_eq!(program.name(), "passthrough");
        assert!(program.source().contains("amount: f32"));
        assert_eq!(backend.live_programs(), 1);
        drop(program);
        assert_eq!(backend.live_programs(), 0);
    }

    #[test]
    fn malformed_source_allocates_nothing() {
        let backend = CpuBackend::new();
        let before = backend.live_programs();
        let broken = "@fragment\nfn fs_main(vin: VertexOutput) -> @location(0) vec4<f32> {\n    return sample_input(vin.uv);\n";
        let err = ShaderProgramResource::compile(&backend, desc(broken)).err().unwrap();
        assert!(matches!(err, CompileError::Parse { .. }));
        assert_eq!(backend.live_programs(), before);
    }

    #[test]
    fn missing_fragment_entry_is_rejected() {
        let backend = CpuBackend::new();
        let body = "fn helper() -> f32 { return 1.0; }\n";
        let err = ShaderProgramResource::compile(&backend, desc(body)).err().unwrap();
        assert!(matches!(err, CompileError::MissingEntryPoint { entry: "fs_main", .. }));
    }

    #[test]
    fn invalid_schema_is_a_compile_error() {
        let backend = CpuBackend::new();
        let mut d = desc(PASSTHROUGH);
        d.schema = ParamSchema::new(vec![ParamDecl::float("resolution", 0.0)]);
        let err = ShaderProgramResource::compile(&backend, d).err().unwrap();
        assert!(matches!(err, CompileError::InvalidSchema { .. }));
        assert_eq!(backend.live_programs(), 0);
    }

    #[test]
    fn cpu_backend_needs_a_kernel() {
        let backend = CpuBackend::new();
        let mut d = desc(PASSTHROUGH);
        d.kernel = None;
        let err = ShaderProgramResource::compile(&backend, d).err().unwrap();
        assert!(matches!(err, CompileError::Backend { backend: "cpu", .. }));
    }
}
