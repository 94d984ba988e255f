// ============================================================================
// TILE BLITTER: render pipelines that draw one tile quad onto a target
// ============================================================================
//
// Two pipelines share one shader and layout:
//
//   * `blend_pipeline`    fixed-function straight-alpha source-over
//                          (`BlendState::ALPHA_BLENDING`)
//   * `replace_pipeline`  overwrite (`BlendState::REPLACE`)
//
// Group 0 carries the per-draw `BlitUniforms`, group 1 the tile texture and
// a nearest sampler.  Quads are pixel-aligned, so nearest sampling reads
// every texel exactly once.
// ============================================================================

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use crate::render::TileBlend;

/// Target format of every GPU canvas.
pub const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Quad placement (NDC corners) + opacity, uploaded per draw.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct BlitUniforms {
    /// x0, y0 (top-left), x1, y1 (bottom-right) in NDC
    pub rect: [f32; 4],
    pub opacity: f32,
    pub _pad: [f32; 3],
}

impl BlitUniforms {
    /// Place a `w × h` quad with its top-left corner at target pixel `(x, y)`.
    pub fn for_pixels(x: i32, y: i32, w: u32, h: u32, target_w: u32, target_h: u32, opacity: f32) -> Self {
        let tw = target_w as f32;
        let th = target_h as f32;
        let x0 = x as f32 / tw * 2.0 - 1.0;
        let y0 = 1.0 - y as f32 / th * 2.0;
        let x1 = (x as f32 + w as f32) / tw * 2.0 - 1.0;
        let y1 = 1.0 - (y as f32 + h as f32) / th * 2.0;
        Self {
            rect: [x0, y0, x1, y1],
            opacity: opacity.clamp(0.0, 1.0),
            _pad: [0.0; 3],
        }
    }
}

pub struct TileBlitter {
    blend_pipeline: wgpu::RenderPipeline,
    replace_pipeline: wgpu::RenderPipeline,
    pub uniform_bgl: wgpu::BindGroupLayout,
    pub texture_bgl: wgpu::BindGroupLayout,
    pub sampler: wgpu::Sampler,
}

impl TileBlitter {
    pub fn new(device: &wgpu::Device) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("tile_blit_shader"),
            source: wgpu::ShaderSource::Wgsl(super::shaders::TILE_BLIT_SHADER.into()),
        });

        let uniform_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("tile_blit_uniform_bgl"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let texture_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("tile_blit_texture_bgl"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("tile_blit_pipeline_layout"),
            bind_group_layouts: &[&uniform_bgl, &texture_bgl],
            push_constant_ranges: &[],
        });

        let make_pipeline = |label: &str, blend: wgpu::BlendState| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(&layout),
                vertex: wgpu::VertexState {
                    module: &shader,
                    entry_point: "vs_tile",
                    buffers: &[],
                    compilation_options: Default::default(),
                },
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    ..Default::default()
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                fragment: Some(wgpu::FragmentState {
                    module: &shader,
                    entry_point: "fs_tile",
                    targets: &[Some(wgpu::ColorTargetState {
                        format: TARGET_FORMAT,
                        blend: Some(blend),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                multiview: None,
            })
        };

        let blend_pipeline = make_pipeline("tile_blit_blend_pipeline", wgpu::BlendState::ALPHA_BLENDING);
        let replace_pipeline = make_pipeline("tile_blit_replace_pipeline", wgpu::BlendState::REPLACE);

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("tile_blit_sampler"),
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        Self {
            blend_pipeline,
            replace_pipeline,
            uniform_bgl,
            texture_bgl,
            sampler,
        }
    }

    pub fn pipeline(&self, blend: TileBlend) -> &wgpu::RenderPipeline {
        match blend {
            TileBlend::SourceOver => &self.blend_pipeline,
            TileBlend::Copy => &self.replace_pipeline,
        }
    }

    /// Create the group-0 bind group for one draw.
    pub fn uniform_bind_group(&self, device: &wgpu::Device, uniforms: &BlitUniforms) -> wgpu::BindGroup {
        let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("tile_blit_uniforms"),
            contents: bytemuck::bytes_of(uniforms),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("tile_blit_uniform_bg"),
            layout: &self.uniform_bgl,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            }],
        })
    }

    /// Encode a single quad draw into `target`, keeping its existing content.
    pub fn encode_draw(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        target: &wgpu::TextureView,
        uniforms: &wgpu::BindGroup,
        tile: &wgpu::BindGroup,
        blend: TileBlend,
    ) {
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("tile_blit_pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(self.pipeline(blend));
        pass.set_bind_group(0, uniforms, &[]);
        pass.set_bind_group(1, tile, &[]);
        pass.draw(0..6, 0..1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniforms_cover_full_target() {
        let u = BlitUniforms::for_pixels(0, 0, 64, 32, 64, 32, 1.0);
        assert_eq!(u.rect, [-1.0, 1.0, 1.0, -1.0]);
    }

    #[test]
    fn test_uniforms_offset_quad() {
        let u = BlitUniforms::for_pixels(16, 8, 16, 8, 64, 32, 2.0);
        assert_eq!(u.rect, [-0.5, 0.5, 0.0, 0.0]);
        assert_eq!(u.opacity, 1.0);
    }

    #[test]
    fn test_uniforms_layout_is_32_bytes() {
        assert_eq!(std::mem::size_of::<BlitUniforms>(), 32);
    }
}
