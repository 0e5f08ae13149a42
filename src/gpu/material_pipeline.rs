//! wgpu backend for composed material programs.
//!
//! Each accepted program gets an opaque and a transparent render pipeline.
//! Shader creation runs inside validation error scopes so a rejected module
//! surfaces as a [`CompileError`] instead of a device-lost panic.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use crate::backend::{CompileError, CompilePhase, ProgramHandle, ShaderBackend};
use crate::gpu::mesh::Vertex;
use crate::program::{Artifact, ProgramSource, UniformTable, FRAGMENT_ENTRY, VERTEX_ENTRY};

/// Depth format used by material pipelines.
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Renderer globals bound at `@group(0) @binding(0)`.
///
/// Total size: 144 bytes (16-byte aligned blocks).
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct GlobalUniforms {
    pub view_proj: [[f32; 4]; 4],  // 64 bytes
    pub model: [[f32; 4]; 4],      // 64 bytes
    pub camera_position: [f32; 4], // 16 bytes (xyz, w unused)
}

impl Default for GlobalUniforms {
    fn default() -> Self {
        Self {
            view_proj: glam::Mat4::IDENTITY.to_cols_array_2d(),
            model: glam::Mat4::IDENTITY.to_cols_array_2d(),
            camera_position: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

/// Pipelines for one accepted program.
pub struct MaterialGpuProgram {
    pub opaque: wgpu::RenderPipeline,
    pub transparent: wgpu::RenderPipeline,
}

impl MaterialGpuProgram {
    /// Pipeline matching the artifact's transparency.
    pub fn pipeline_for(&self, artifact: &Artifact) -> &wgpu::RenderPipeline {
        if artifact.is_transparent() {
            &self.transparent
        } else {
            &self.opaque
        }
    }
}

/// Uniform buffer and bind group for one material instance.
pub struct MaterialBindings {
    pub uniform_buffer: wgpu::Buffer,
    pub bind_group: wgpu::BindGroup,
    size: u64,
}

/// A [`ShaderBackend`] that builds render pipelines on a wgpu device.
pub struct WgpuBackend {
    device: Arc<wgpu::Device>,
    format: wgpu::TextureFormat,
    global_bind_group_layout: wgpu::BindGroupLayout,
    material_bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    programs: Mutex<HashMap<u64, MaterialGpuProgram>>,
    next: AtomicU64,
}

impl WgpuBackend {
    pub fn new(device: Arc<wgpu::Device>, format: wgpu::TextureFormat) -> Self {
        let global_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Material Global Bind Group Layout"),
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: wgpu::BufferSize::new(
                            std::mem::size_of::<GlobalUniforms>() as u64,
                        ),
                    },
                    count: None,
                }],
            });

        let material_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Material Uniform Bind Group Layout"),
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
                            sample_type: wgpu::TextureSampleType::Depth,
                            view_dimension: wgpu::TextureViewDimension::D2,
                            multisampled: false,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 2,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Comparison),
                        count: None,
                    },
                ],
            });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Material Pipeline Layout"),
            bind_group_layouts: &[&global_bind_group_layout, &material_bind_group_layout],
            push_constant_ranges: &[],
        });

        Self {
            device,
            format,
            global_bind_group_layout,
            material_bind_group_layout,
            pipeline_layout,
            programs: Mutex::new(HashMap::new()),
            next: AtomicU64::new(0),
        }
    }

    /// Request a headless device and build a backend on it.
    pub fn headless(format: wgpu::TextureFormat) -> anyhow::Result<(Self, wgpu::Queue)> {
        pollster::block_on(Self::request_headless(format))
    }

    async fn request_headless(format: wgpu::TextureFormat) -> anyhow::Result<(Self, wgpu::Queue)> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None, // Headless
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| anyhow::anyhow!("No adapter found"))?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor::default(), None)
            .await?;

        Ok((Self::new(Arc::new(device), format), queue))
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn global_bind_group_layout(&self) -> &wgpu::BindGroupLayout {
        &self.global_bind_group_layout
    }

    /// Number of programs currently held.
    pub fn program_count(&self) -> usize {
        self.programs.lock().map(|p| p.len()).unwrap_or(0)
    }

    /// Run `f` with the pipelines of a program, if it is still alive.
    pub fn with_program<R>(
        &self,
        handle: ProgramHandle,
        f: impl FnOnce(&MaterialGpuProgram) -> R,
    ) -> Option<R> {
        let programs = self.programs.lock().ok()?;
        programs.get(&handle.0).map(f)
    }

    /// Create the uniform buffer and bind group for a uniform table.
    ///
    /// The shadow map view and comparison sampler come from the renderer; a
    /// 1x1 placeholder is fine while shadows are disabled.
    pub fn create_bindings(
        &self,
        table: &UniformTable,
        shadow_map: &wgpu::TextureView,
        shadow_sampler: &wgpu::Sampler,
    ) -> MaterialBindings {
        let data = table.to_bytes();
        let uniform_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Material Uniform Buffer"),
            contents: &data,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Material Bind Group"),
            layout: &self.material_bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(shadow_map),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(shadow_sampler),
                },
            ],
        });

        MaterialBindings {
            uniform_buffer,
            bind_group,
            size: data.len() as u64,
        }
    }

    /// Upload current uniform values. Returns false when the table no longer
    /// fits the buffer, which means the bindings must be recreated.
    pub fn write_uniforms(
        &self,
        queue: &wgpu::Queue,
        bindings: &MaterialBindings,
        table: &UniformTable,
    ) -> bool {
        let data = table.to_bytes();
        if data.len() as u64 != bindings.size {
            log::warn!(
                "Uniform table is {} bytes, bindings hold {}; recreate bindings",
                data.len(),
                bindings.size
            );
            return false;
        }
        queue.write_buffer(&bindings.uniform_buffer, 0, &data);
        true
    }

    /// Create a globals buffer and bind group.
    pub fn create_globals(&self, globals: &GlobalUniforms) -> (wgpu::Buffer, wgpu::BindGroup) {
        let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Material Globals Buffer"),
            contents: bytemuck::bytes_of(globals),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Material Globals Bind Group"),
            layout: &self.global_bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            }],
        });
        (buffer, bind_group)
    }

    /// 1x1 depth texture and comparison sampler for materials without shadows.
    pub fn placeholder_shadow_map(&self) -> (wgpu::TextureView, wgpu::Sampler) {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Placeholder Shadow Map"),
            size: wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Shadow Comparison Sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            compare: Some(wgpu::CompareFunction::LessEqual),
            ..Default::default()
        });
        (view, sampler)
    }

    fn create_module(
        &self,
        label: &str,
        source: &str,
        phase: CompilePhase,
    ) -> Result<wgpu::ShaderModule, CompileError> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(err) => Err(CompileError::new(phase, err.to_string())),
            None => Ok(module),
        }
    }

    fn create_pipeline(
        &self,
        vertex: &wgpu::ShaderModule,
        fragment: &wgpu::ShaderModule,
        transparent: bool,
    ) -> wgpu::RenderPipeline {
        let (label, blend) = if transparent {
            ("Material Pipeline (transparent)", wgpu::BlendState::ALPHA_BLENDING)
        } else {
            ("Material Pipeline (opaque)", wgpu::BlendState::REPLACE)
        };

        self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(label),
            layout: Some(&self.pipeline_layout),
            vertex: wgpu::VertexState {
                module: vertex,
                entry_point: Some(VERTEX_ENTRY),
                buffers: &[Vertex::desc()],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: fragment,
                entry_point: Some(FRAGMENT_ENTRY),
                targets: &[Some(wgpu::ColorTargetState {
                    format: self.format,
                    blend: Some(blend),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: if transparent { None } else { Some(wgpu::Face::Back) },
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: !transparent,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        })
    }
}

impl ShaderBackend for WgpuBackend {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn compile(&self, source: &ProgramSource) -> Result<ProgramHandle, CompileError> {
        let vertex = self.create_module("Material Vertex", &source.vertex, CompilePhase::Vertex)?;
        let fragment =
            self.create_module("Material Fragment", &source.fragment, CompilePhase::Fragment)?;

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let opaque = self.create_pipeline(&vertex, &fragment, false);
        let transparent = self.create_pipeline(&vertex, &fragment, true);
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(CompileError::new(CompilePhase::Link, err.to_string()));
        }

        let handle = ProgramHandle(self.next.fetch_add(1, Ordering::Relaxed) + 1);
        let mut programs = self
            .programs
            .lock()
            .map_err(|_| CompileError::new(CompilePhase::Link, "Program table poisoned"))?;
        programs.insert(handle.0, MaterialGpuProgram { opaque, transparent });
        log::info!("Created material pipelines for {:?}", handle);
        Ok(handle)
    }

    fn release(&self, handle: ProgramHandle) {
        if let Ok(mut programs) = self.programs.lock() {
            if programs.remove(&handle.0).is_some() {
                log::debug!("Released material pipelines for {:?}", handle);
            }
        }
    }
}
