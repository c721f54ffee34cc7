use anyhow::Result;

use crate::fx::backend::{Backend, ProgramSource, ResourceCounter, ResourceLease};
use crate::fx::error::{CompileError, PassError};

use super::frame::{padded_bytes_per_row, CpuFrame, TEXTURE_FORMAT};
use super::gpu::GpuContext;

/// Runs effect programs as fullscreen-triangle render passes.
pub struct WgpuBackend {
    gpu: GpuContext,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    sampler: wgpu::Sampler,
    programs: ResourceCounter,
}

pub struct WgpuProgram {
    pipeline: wgpu::RenderPipeline,
    uniform_buffer: wgpu::Buffer,
    _lease: ResourceLease,
}

pub struct GpuFrame {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

impl WgpuBackend {
    pub fn new() -> Result<Self> {
        let gpu = GpuContext::new()?;
        let device = &gpu.device;

        // Nearest + clamp keeps GPU output equal to the CPU reference.
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("fx_sampler"),
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("fx_bind_group_layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("fx_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        Ok(Self {
            gpu,
            bind_group_layout,
            pipeline_layout,
            sampler,
            programs: ResourceCounter::default(),
        })
    }

    pub fn adapter_name(&self) -> &str {
        &self.gpu.adapter_name
    }

    fn pop_error(&self) -> Option<wgpu::Error> {
        pollster::block_on(self.gpu.device.pop_error_scope())
    }
}

impl Backend for WgpuBackend {
    type Program = WgpuProgram;
    type Frame = GpuFrame;

    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn compile(&self, source: &ProgramSource) -> Result<WgpuProgram, CompileError> {
        let device = &self.gpu.device;
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(source.name),
            source: wgpu::ShaderSource::Wgsl(source.source.into()),
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(source.name),
            layout: Some(&self.pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: TEXTURE_FORMAT,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("fx_uniforms"),
            size: source.layout.byte_len(),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        if let Some(err) = self.pop_error() {
            return Err(CompileError::Backend {
                backend: "wgpu",
                program: source.name.to_string(),
                message: err.to_string(),
            });
        }

        Ok(WgpuProgram {
            pipeline,
            uniform_buffer,
            _lease: self.programs.lease(),
        })
    }

    fn write_uniforms(&self, program: &mut WgpuProgram, words: &[u32]) {
        self.gpu
            .queue
            .write_buffer(&program.uniform_buffer, 0, bytemuck::cast_slice(words));
    }

    fn run_pass(
        &self,
        program: &WgpuProgram,
        input: &GpuFrame,
        output: &mut GpuFrame,
    ) -> Result<(), PassError> {
        if (input.width, input.height) != (output.width, output.height) {
            return Err(PassError::SizeMismatch {
                input: (input.width, input.height),
                output: (output.width, output.height),
            });
        }

        let device = &self.gpu.device;
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("fx_bind_group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: program.uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&input.view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("fx_encoder"),
        });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("fx_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &output.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&program.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.draw(0..3, 0..1);
        }
        self.gpu.queue.submit(std::iter::once(encoder.finish()));

        match self.pop_error() {
            Some(err) => Err(PassError::Backend(err.to_string())),
            None => Ok(()),
        }
    }

    fn max_frame_dimension(&self) -> u32 {
        self.gpu.device.limits().max_texture_dimension_2d
    }

    fn allocate_frame(&self, width: u32, height: u32) -> GpuFrame {
        let texture = self.gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("fx_frame"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TEXTURE_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        GpuFrame {
            texture,
            view,
            width,
            height,
        }
    }

    fn frame_size(frame: &GpuFrame) -> (u32, u32) {
        (frame.width, frame.height)
    }

    fn upload_frame(&self, image: &CpuFrame, frame: &mut GpuFrame) -> Result<(), PassError> {
        if image.size() != (frame.width, frame.height) {
            return Err(PassError::SizeMismatch {
                input: image.size(),
                output: (frame.width, frame.height),
            });
        }
        self.gpu.queue.write_texture(
            frame.texture.as_image_copy(),
            image.data(),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(frame.width * 4),
                rows_per_image: Some(frame.height),
            },
            frame.texture.size(),
        );
        Ok(())
    }

    fn read_frame(&self, frame: &GpuFrame) -> Result<CpuFrame, PassError> {
        let device = &self.gpu.device;
        let padded = padded_bytes_per_row(frame.width);
        let unpadded = frame.width * 4;

        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("fx_readback"),
            size: (padded * frame.height) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("fx_readback_encoder"),
        });
        encoder.copy_texture_to_buffer(
            frame.texture.as_image_copy(),
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(frame.height),
                },
            },
            frame.texture.size(),
        );
        self.gpu.queue.submit(std::iter::once(encoder.finish()));

        let slice = buffer.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        device.poll(wgpu::Maintain::Wait);
        receiver
            .recv()
            .map_err(|e| PassError::Backend(format!("readback channel closed: {}", e)))?
            .map_err(|e| PassError::Backend(format!("readback failed: {}", e)))?;

        let mapped = slice.get_mapped_range();
        let mut pixels = Vec::with_capacity((unpadded * frame.height) as usize);
        for row in mapped.chunks(padded as usize) {
            pixels.extend_from_slice(&row[..unpadded as usize]);
        }
        drop(mapped);
        buffer.unmap();

        CpuFrame::from_rgba(frame.width, frame.height, pixels)
            .ok_or_else(|| PassError::Backend("readback returned a truncated frame".into()))
    }

    fn live_programs(&self) -> usize {
        self.programs.live()
    }
}
