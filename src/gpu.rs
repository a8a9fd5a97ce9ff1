use std::num::NonZeroU32;
use std::sync::mpsc;

use anyhow::{anyhow, bail, Context, Result};
use serde_json::json;
use wgpu::util::DeviceExt;

use crate::error_codes::{CodedError, TEXTURE_TOO_LARGE};

use crate::renderer::{
    RenderBackend, TextureData, TextureFilter, TextureOptions, UniformMap, UniformValue,
    U_BLOCKS, U_OVERLAY, U_SELECTED_BLOCK, U_TEXTURE, U_TEXTURE_RESOLUTION,
};
use crate::shader::{PixelateUniform, PIXELATE_SHADER};

const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

struct RenderTarget {
    width: u32,
    height: u32,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    readback_buffer: wgpu::Buffer,
    unpadded_bytes_per_row: u32,
    padded_bytes_per_row: u32,
}

/// Offscreen wgpu renderer: one full-screen pass, read back to RGBA8.
pub struct GpuRenderer {
    device: wgpu::Device,
    queue: wgpu::Queue,
    target: RenderTarget,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    pipeline: wgpu::RenderPipeline,
    uniform_buffer: wgpu::Buffer,
    last_uniform: Option<PixelateUniform>,
    nearest_sampler: wgpu::Sampler,
    linear_sampler: wgpu::Sampler,
    source_filter: TextureFilter,
    source: GpuTexture,
    overlay: GpuTexture,
    bind_group: Option<wgpu::BindGroup>,
    uniforms: UniformMap,
}

impl GpuRenderer {
    pub async fn new() -> Result<Self> {
        let instance = wgpu::Instance::default();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface: None,
            })
            .await
            .ok_or_else(|| anyhow!("no suitable GPU adapter found"))?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("blockpix-device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                },
                None,
            )
            .await
            .context("failed to request wgpu device")?;

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("blockpix-bind-group-layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: wgpu::BufferSize::new(
                            std::mem::size_of::<PixelateUniform>() as u64,
                        ),
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
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("blockpix-pipeline-layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = build_pipeline(&device, &pipeline_layout, PIXELATE_SHADER);

        let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("blockpix-uniform"),
            contents: bytemuck::bytes_of(&PixelateUniform::default()),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let nearest_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("blockpix-nearest-sampler"),
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });
        let linear_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("blockpix-linear-sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let placeholder = TextureData::new(vec![0; 4], 1, 1);
        let source = create_texture(&device, &queue, "blockpix-source", &placeholder)?;
        let overlay = create_texture(&device, &queue, "blockpix-overlay", &placeholder)?;
        let target = create_target(&device, 1, 1)?;

        Ok(Self {
            device,
            queue,
            target,
            bind_group_layout,
            pipeline_layout,
            pipeline,
            uniform_buffer,
            last_uniform: None,
            nearest_sampler,
            linear_sampler,
            source_filter: TextureFilter::Nearest,
            source,
            overlay,
            bind_group: None,
            uniforms: UniformMap::new(),
        })
    }

    /// Largest texture or render target side this device accepts.
    pub fn max_texture_dimension(&self) -> u32 {
        self.device.limits().max_texture_dimension_2d
    }

    fn current_uniform(&self) -> PixelateUniform {
        let vec2 = |name: &str| {
            self.uniforms
                .get(name)
                .and_then(UniformValue::as_vec2)
                .unwrap_or([0.0, 0.0])
        };
        PixelateUniform {
            resolution: [self.target.width as f32, self.target.height as f32],
            texture_resolution: vec2(U_TEXTURE_RESOLUTION),
            blocks: vec2(U_BLOCKS),
            selected_block: vec2(U_SELECTED_BLOCK),
        }
    }

    fn ensure_bind_group(&mut self) {
        if self.bind_group.is_some() {
            return;
        }
        let sampler = match self.source_filter {
            TextureFilter::Nearest => &self.nearest_sampler,
            TextureFilter::Linear => &self.linear_sampler,
        };
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("blockpix-bind-group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&self.source.view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::TextureView(&self.overlay.view),
                },
            ],
        });
        self.bind_group = Some(bind_group);
    }

    fn read_buffer(&self) -> Result<Vec<u8>> {
        let target = &self.target;
        let buffer_slice = target.readback_buffer.slice(..);
        let (sender, receiver) = mpsc::channel();

        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);

        receiver
            .recv()
            .map_err(|_| anyhow!("failed receiving GPU map callback"))?
            .context("GPU buffer mapping failed")?;

        let mapped = buffer_slice.get_mapped_range();
        let row_len = target.unpadded_bytes_per_row as usize;
        let mut frame = vec![0_u8; row_len * target.height as usize];

        for (row_index, chunk) in mapped
            .chunks(target.padded_bytes_per_row as usize)
            .take(target.height as usize)
            .enumerate()
        {
            let dst_start = row_index * row_len;
            frame[dst_start..dst_start + row_len].copy_from_slice(&chunk[..row_len]);
        }

        drop(mapped);
        target.readback_buffer.unmap();
        Ok(frame)
    }
}

impl RenderBackend for GpuRenderer {
    fn set_uniform(&mut self, name: &str, value: UniformValue) {
        self.uniforms.insert(name.to_owned(), value);
    }

    fn uniform(&self, name: &str) -> Option<&UniformValue> {
        self.uniforms.get(name)
    }

    fn set_texture(
        &mut self,
        name: &str,
        texture: TextureData,
        options: TextureOptions,
    ) -> Result<()> {
        if texture.data.len() != texture.expected_len() {
            bail!(
                "texture '{}' expected {} bytes for {}x{}, got {}",
                name,
                texture.expected_len(),
                texture.width,
                texture.height,
                texture.data.len()
            );
        }

        check_texture_size(name, texture.width, texture.height, self.max_texture_dimension())?;

        let slot = match name {
            U_TEXTURE => {
                if self.source_filter != options.filter {
                    self.source_filter = options.filter;
                    self.bind_group = None;
                }
                &mut self.source
            }
            U_OVERLAY => &mut self.overlay,
            other => bail!("unknown texture uniform '{other}'"),
        };

        if slot.width == texture.width && slot.height == texture.height {
            write_texture(&self.queue, &slot.texture, &texture)?;
        } else {
            *slot = create_texture(&self.device, &self.queue, name, &texture)?;
            self.bind_group = None;
        }
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            bail!("render target must be positive, got {}x{}", width, height);
        }
        check_texture_size("render target", width, height, self.max_texture_dimension())?;
        if self.target.width != width || self.target.height != height {
            self.target = create_target(&self.device, width, height)?;
        }
        Ok(())
    }

    fn load_shader(&mut self, source: &str) -> Result<()> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = build_pipeline(&self.device, &self.pipeline_layout, source);
        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            bail!("shader failed validation: {error}");
        }
        self.pipeline = pipeline;
        Ok(())
    }

    fn render_rgba(&mut self) -> Result<Vec<u8>> {
        let uniform = self.current_uniform();
        if self.last_uniform != Some(uniform) {
            self.queue
                .write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&uniform));
            self.last_uniform = Some(uniform);
        }
        self.ensure_bind_group();
        let bind_group = self
            .bind_group
            .as_ref()
            .ok_or_else(|| anyhow!("bind group missing after rebuild"))?;

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("blockpix-render-encoder"),
            });

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("blockpix-render-pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.target.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });

            render_pass.set_pipeline(&self.pipeline);
            render_pass.set_bind_group(0, bind_group, &[]);
            render_pass.draw(0..3, 0..1);
        }

        let padded_bytes_per_row = NonZeroU32::new(self.target.padded_bytes_per_row)
            .ok_or_else(|| anyhow!("invalid padded row size {}", self.target.padded_bytes_per_row))?;
        let rows_per_image = NonZeroU32::new(self.target.height)
            .ok_or_else(|| anyhow!("invalid render height {}", self.target.height))?;

        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &self.target.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &self.target.readback_buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row.get()),
                    rows_per_image: Some(rows_per_image.get()),
                },
            },
            wgpu::Extent3d {
                width: self.target.width,
                height: self.target.height,
                depth_or_array_layers: 1,
            },
        );

        self.queue.submit(Some(encoder.finish()));
        self.read_buffer()
    }

    fn target_size(&self) -> (u32, u32) {
        (self.target.width, self.target.height)
    }

    fn backend_name(&self) -> &'static str {
        "gpu"
    }
}

fn build_pipeline(
    device: &wgpu::Device,
    layout: &wgpu::PipelineLayout,
    source: &str,
) -> wgpu::RenderPipeline {
    let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("blockpix-pixelate-shader"),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });

    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("blockpix-pixelate-pipeline"),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: &shader,
            entry_point: "vs_main",
            buffers: &[],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        primitive: wgpu::PrimitiveState::default(),
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        fragment: Some(wgpu::FragmentState {
            module: &shader,
            entry_point: "fs_main",
            targets: &[Some(wgpu::ColorTargetState {
                format: TARGET_FORMAT,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        multiview: None,
    })
}

fn create_target(device: &wgpu::Device, width: u32, height: u32) -> Result<RenderTarget> {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("blockpix-render-target"),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: TARGET_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

    let unpadded_bytes_per_row = width
        .checked_mul(4)
        .ok_or_else(|| anyhow!("frame width overflow when computing row bytes"))?;
    let padded_bytes_per_row = align_to(unpadded_bytes_per_row, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
    let readback_size = u64::from(padded_bytes_per_row) * u64::from(height);
    let readback_buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("blockpix-readback-buffer"),
        size: readback_size,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    Ok(RenderTarget {
        width,
        height,
        texture,
        view,
        readback_buffer,
        unpadded_bytes_per_row,
        padded_bytes_per_row,
    })
}

fn create_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    label: &str,
    data: &TextureData,
) -> Result<GpuTexture> {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width: data.width,
            height: data.height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8Unorm,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    write_texture(queue, &texture, data)?;
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    Ok(GpuTexture {
        texture,
        view,
        width: data.width,
        height: data.height,
    })
}

fn write_texture(queue: &wgpu::Queue, texture: &wgpu::Texture, data: &TextureData) -> Result<()> {
    let bytes_per_row = NonZeroU32::new(data.width.saturating_mul(4))
        .ok_or_else(|| anyhow!("texture has invalid width {}", data.width))?;
    let rows_per_image = NonZeroU32::new(data.height)
        .ok_or_else(|| anyhow!("texture has invalid height {}", data.height))?;

    queue.write_texture(
        wgpu::ImageCopyTexture {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        &data.data,
        wgpu::ImageDataLayout {
            offset: 0,
            bytes_per_row: Some(bytes_per_row.get()),
            rows_per_image: Some(rows_per_image.get()),
        },
        wgpu::Extent3d {
            width: data.width,
            height: data.height,
            depth_or_array_layers: 1,
        },
    );
    Ok(())
}

/// wgpu reports oversized textures through the uncaptured-error handler,
/// which panics; reject them up front instead.
fn check_texture_size(label: &str, width: u32, height: u32, max_dimension: u32) -> Result<()> {
    if width > max_dimension || height > max_dimension {
        return Err(anyhow!(CodedError::runtime(
            TEXTURE_TOO_LARGE,
            format!("{label} {width}x{height} exceeds the device limit of {max_dimension} per side"),
        )
        .with_details(json!({
            "texture": label,
            "width": width,
            "height": height,
            "max_dimension": max_dimension,
        }))));
    }
    Ok(())
}

fn align_to(value: u32, alignment: u32) -> u32 {
    let mask = alignment - 1;
    (value + mask) & !mask
}
