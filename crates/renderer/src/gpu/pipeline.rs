use std::sync::atomic::{AtomicU64, Ordering};

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use crate::compile::{BuildFailure, CheckedProgram, GlslType, ProgramBuilder, ProgramInterface, Stage};
use crate::types::ShaderSource;

use super::context::GpuContext;
use super::uniforms::BuiltinUniforms;

/// Format of retained and offscreen render targets.
pub const CAPTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

static NEXT_PROGRAM_ID: AtomicU64 = AtomicU64::new(1);

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct QuadVertex {
    position: [f32; 4],
}

const fn corner(x: f32, y: f32) -> QuadVertex {
    QuadVertex {
        position: [x, y, 0.0, 1.0],
    }
}

/// Two triangles covering clip space.
const QUAD: [QuadVertex; 6] = [
    corner(-1.0, -1.0),
    corner(1.0, -1.0),
    corner(-1.0, 1.0),
    corner(-1.0, 1.0),
    corner(1.0, -1.0),
    corner(1.0, 1.0),
];

pub(crate) const QUAD_VERTEX_COUNT: u32 = QUAD.len() as u32;

/// Device objects shared by every program built on one device.
#[derive(Clone)]
pub struct PipelineLayouts {
    pub(crate) uniform_layout: wgpu::BindGroupLayout,
    pub(crate) quad: wgpu::Buffer,
}

impl PipelineLayouts {
    pub fn new(gpu: &GpuContext) -> Self {
        let uniform_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let uniform_layout = gpu
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("uniform layout"),
                entries: &[uniform_entry(0), uniform_entry(1)],
            });

        let quad = gpu
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("quad vertices"),
                contents: bytemuck::cast_slice(&QUAD),
                usage: wgpu::BufferUsages::VERTEX,
            });

        Self {
            uniform_layout,
            quad,
        }
    }
}

/// A linked program with its pipelines and uniform buffers.
pub struct CompiledProgram {
    id: u64,
    interface: ProgramInterface,
    pipelines: Vec<(wgpu::TextureFormat, wgpu::RenderPipeline)>,
    texture_layout: wgpu::BindGroupLayout,
    builtin_buffer: wgpu::Buffer,
    params_buffer: wgpu::Buffer,
    uniform_bind_group: wgpu::BindGroup,
    uses_quad: bool,
}

impl CompiledProgram {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn interface(&self) -> &ProgramInterface {
        &self.interface
    }

    pub(crate) fn pipeline(&self, format: wgpu::TextureFormat) -> Option<&wgpu::RenderPipeline> {
        self.pipelines
            .iter()
            .find(|(candidate, _)| *candidate == format)
            .map(|(_, pipeline)| pipeline)
    }

    pub(crate) fn texture_layout(&self) -> &wgpu::BindGroupLayout {
        &self.texture_layout
    }

    pub(crate) fn builtin_buffer(&self) -> &wgpu::Buffer {
        &self.builtin_buffer
    }

    pub(crate) fn params_buffer(&self) -> &wgpu::Buffer {
        &self.params_buffer
    }

    pub(crate) fn uniform_bind_group(&self) -> &wgpu::BindGroup {
        &self.uniform_bind_group
    }

    /// Records one full-viewport draw into `view`, cleared first.
    pub(crate) fn encode(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        view: &wgpu::TextureView,
        format: wgpu::TextureFormat,
        layouts: &PipelineLayouts,
        groups: &(wgpu::BindGroup, wgpu::BindGroup),
    ) -> bool {
        let Some(pipeline) = self.pipeline(format) else {
            tracing::warn!(?format, program = self.id, "no pipeline for target format");
            return false;
        };
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("program pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &groups.0, &[]);
        pass.set_bind_group(1, &groups.1, &[]);
        if self.uses_quad {
            pass.set_vertex_buffer(0, layouts.quad.slice(..));
        }
        pass.draw(0..QUAD_VERTEX_COUNT, 0..1);
        true
    }
}

impl std::fmt::Debug for CompiledProgram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledProgram")
            .field("id", &self.id)
            .field("uniforms", &self.interface.uniforms.len())
            .field("samplers", &self.interface.samplers.len())
            .finish()
    }
}

fn vertex_format(ty: GlslType) -> wgpu::VertexFormat {
    match ty {
        GlslType::Vec2 => wgpu::VertexFormat::Float32x2,
        GlslType::Vec3 => wgpu::VertexFormat::Float32x3,
        _ => wgpu::VertexFormat::Float32x4,
    }
}

impl ProgramBuilder {
    /// Compiles, links and creates pipelines for each target format.
    ///
    /// Nothing is installed; on failure the caller keeps whatever it was drawing.
    pub fn build(
        &self,
        gpu: &GpuContext,
        layouts: &PipelineLayouts,
        source: &ShaderSource,
        formats: &[wgpu::TextureFormat],
    ) -> Result<CompiledProgram, BuildFailure> {
        let checked = self.check(source)?;
        let device = &gpu.device;

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let program = create_program(device, layouts, &checked, formats);
        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            tracing::debug!(%error, "pipeline creation rejected by the device");
            return Err(BuildFailure::Link {
                messages: vec![format!("link error: {}", first_line(&error.to_string()))],
            });
        }
        tracing::debug!(
            program = program.id,
            uniforms = program.interface.uniforms.len(),
            samplers = program.interface.samplers.len(),
            "program built"
        );
        Ok(program)
    }
}

fn first_line(text: &str) -> &str {
    text.lines().find(|line| !line.trim().is_empty()).unwrap_or(text).trim()
}

fn create_program(
    device: &wgpu::Device,
    layouts: &PipelineLayouts,
    checked: &CheckedProgram,
    formats: &[wgpu::TextureFormat],
) -> CompiledProgram {
    let interface = checked.interface().clone();

    let vertex_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("user vertex"),
        source: checked.vertex.module_source(Stage::Vertex),
    });
    let fragment_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("user fragment"),
        source: checked.fragment.module_source(Stage::Fragment),
    });

    let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("texture layout"),
        entries: &build_texture_layout_entries(interface.samplers.len()),
    });
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("program layout"),
        bind_group_layouts: &[&layouts.uniform_layout, &texture_layout],
        push_constant_ranges: &[],
    });

    let attribute = interface.position_attribute().map(|attribute| {
        [wgpu::VertexAttribute {
            format: vertex_format(attribute.ty),
            offset: 0,
            shader_location: 0,
        }]
    });
    let buffers: Vec<wgpu::VertexBufferLayout<'_>> = attribute
        .as_ref()
        .map(|attributes| wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<QuadVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes,
        })
        .into_iter()
        .collect();

    let pipelines = formats
        .iter()
        .map(|format| {
            let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("program pipeline"),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &vertex_module,
                    entry_point: Some("main"),
                    buffers: &buffers,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: None,
                    polygon_mode: wgpu::PolygonMode::Fill,
                    unclipped_depth: false,
                    conservative: false,
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                fragment: Some(wgpu::FragmentState {
                    module: &fragment_module,
                    entry_point: Some("main"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: *format,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                multiview: None,
                cache: None,
            });
            (*format, pipeline)
        })
        .collect();

    let builtin_buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("builtin uniforms"),
        size: std::mem::size_of::<BuiltinUniforms>() as wgpu::BufferAddress,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("user uniforms"),
        size: u64::from(interface.block_size.max(16)),
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let uniform_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("uniform bind group"),
        layout: &layouts.uniform_layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: builtin_buffer.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: params_buffer.as_entire_binding(),
            },
        ],
    });

    let uses_quad = interface.position_attribute().is_some();
    CompiledProgram {
        id: NEXT_PROGRAM_ID.fetch_add(1, Ordering::Relaxed),
        interface,
        pipelines,
        texture_layout,
        builtin_buffer,
        params_buffer,
        uniform_bind_group,
        uses_quad,
    }
}

/// Texture at binding `2k`, its sampler at `2k + 1`.
pub(crate) fn build_texture_layout_entries(count: usize) -> Vec<wgpu::BindGroupLayoutEntry> {
    let mut entries = Vec::with_capacity(count * 2);
    for index in 0..count as u32 {
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: index * 2,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        });
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: index * 2 + 1,
            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            count: None,
        });
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn texture_entries_pair_up() {
        let entries = build_texture_layout_entries(3);
        let bindings: Vec<u32> = entries.iter().map(|entry| entry.binding).collect();
        assert_eq!(bindings, vec![0, 1, 2, 3, 4, 5]);
        assert!(matches!(entries[1].ty, wgpu::BindingType::Sampler(_)));
    }

    #[test]
    fn quad_covers_clip_space() {
        let xs: Vec<f32> = QUAD.iter().map(|v| v.position[0]).collect();
        assert!(xs.contains(&-1.0) && xs.contains(&1.0));
        assert_eq!(std::mem::size_of::<QuadVertex>(), 16);
    }

    #[test]
    fn attribute_formats_follow_declared_type() {
        assert_eq!(vertex_format(GlslType::Vec2), wgpu::VertexFormat::Float32x2);
        assert_eq!(vertex_format(GlslType::Vec4), wgpu::VertexFormat::Float32x4);
    }
}
