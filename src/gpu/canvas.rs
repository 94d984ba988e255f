// ============================================================================
// GPU CANVAS: offscreen render target that tiles are composited onto
// ============================================================================

use image::RgbaImage;

use super::blit::{BlitUniforms, TARGET_FORMAT, TileBlitter};
use super::context::GpuContext;
use super::pool::TexturePool;
use super::texture::{TileTexture, write_rgba};
use crate::error::{CacheError, Result};
use crate::regen::TileImage;
use crate::render::{PaintParams, TileCanvas};

/// Owns the device, the blit pipelines and the tile texture pool.
/// One renderer serves any number of sequential canvases.
pub struct GpuTileRenderer {
    ctx: GpuContext,
    blitter: TileBlitter,
    pool: TexturePool,
}

impl GpuTileRenderer {
    /// Create a renderer on a fresh context, or `None` without an adapter.
    pub fn new(preferred_gpu: &str) -> Option<Self> {
        GpuContext::new(preferred_gpu).map(Self::from_context)
    }

    pub fn from_context(ctx: GpuContext) -> Self {
        let blitter = TileBlitter::new(&ctx.device);
        Self {
            ctx,
            blitter,
            pool: TexturePool::new(),
        }
    }

    pub fn context(&self) -> &GpuContext {
        &self.ctx
    }

    pub fn adapter_name(&self) -> &str {
        &self.ctx.adapter_name
    }

    pub fn pool(&self) -> &TexturePool {
        &self.pool
    }

    /// Start a canvas whose initial content is `background`.
    pub fn canvas(&mut self, background: &RgbaImage) -> Result<GpuCanvas<'_>> {
        let (width, height) = background.dimensions();
        if !self.ctx.supports_size(width, height) {
            return Err(CacheError::Gpu(format!(
                "canvas {}x{} exceeds device limit {}",
                width, height, self.ctx.max_texture_dim
            )));
        }

        let target = self.ctx.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("GpuCanvas target"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        write_rgba(&self.ctx.queue, &target, background);
        let target_view = target.create_view(&wgpu::TextureViewDescriptor::default());

        Ok(GpuCanvas {
            renderer: self,
            target,
            target_view,
            width,
            height,
            tiles_drawn: 0,
        })
    }
}

/// GPU implementation of [`TileCanvas`].
///
/// Each tile is uploaded into a pooled texture and blitted with its own
/// submission; `queue.write_texture` is ordered before the next submit, so
/// a pooled texture can be reused by the following tile straight away.
pub struct GpuCanvas<'a> {
    renderer: &'a mut GpuTileRenderer,
    target: wgpu::Texture,
    target_view: wgpu::TextureView,
    width: u32,
    height: u32,
    tiles_drawn: usize,
}

impl GpuCanvas<'_> {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn tiles_drawn(&self) -> usize {
        self.tiles_drawn
    }

    /// Wait for every queued blit and read the target back.
    pub fn finish(self) -> Result<RgbaImage> {
        let pixels = readback_texture(&self.renderer.ctx, &self.target, self.width, self.height)?;
        RgbaImage::from_raw(self.width, self.height, pixels)
            .ok_or_else(|| CacheError::Gpu("readback size mismatch".to_string()))
    }
}

impl TileCanvas for GpuCanvas<'_> {
    fn draw_tile(&mut self, image: &TileImage, x: i32, y: i32, paint: &PaintParams) {
        let (w, h) = image.dimensions();
        let off_target = x >= self.width as i32
            || y >= self.height as i32
            || x + w as i32 <= 0
            || y + h as i32 <= 0;
        if off_target || w == 0 || h == 0 {
            return;
        }

        let renderer = &mut *self.renderer;
        let device = &renderer.ctx.device;
        let tile = match renderer.pool.acquire(w, h) {
            Some(t) => t,
            None => TileTexture::new(device, &renderer.blitter.texture_bgl, &renderer.blitter.sampler, w, h),
        };
        tile.upload(&renderer.ctx.queue, image);

        let uniforms = BlitUniforms::for_pixels(x, y, w, h, self.width, self.height, paint.opacity);
        let uniform_bg = renderer.blitter.uniform_bind_group(device, &uniforms);

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("tile_blit_encoder"),
        });
        renderer
            .blitter
            .encode_draw(&mut encoder, &self.target_view, &uniform_bg, &tile.bind_group, paint.blend);
        renderer.ctx.submit_one(encoder);

        renderer.pool.release(tile);
        self.tiles_drawn += 1;
    }
}

/// `bytes_per_row` for texture→buffer copies, padded to wgpu's alignment.
pub(crate) fn aligned_bytes_per_row(width: u32) -> u32 {
    let unaligned = width * 4;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unaligned.div_ceil(align) * align
}

/// Blocking readback of a whole RGBA8 texture as packed rows.
fn readback_texture(ctx: &GpuContext, texture: &wgpu::Texture, width: u32, height: u32) -> Result<Vec<u8>> {
    let device = &ctx.device;
    let bytes_per_row = aligned_bytes_per_row(width);
    let buffer_size = (bytes_per_row * height) as u64;

    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("canvas_readback_staging"),
        size: buffer_size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("canvas_readback_encoder"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::ImageCopyTexture {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::ImageCopyBuffer {
            buffer: &staging,
            layout: wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    ctx.submit_one(encoder);

    let slice = staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    device.poll(wgpu::Maintain::Wait);
    match rx.recv() {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            log_err!("GPU: readback map error: {:?}", e);
            return Err(CacheError::Gpu(format!("readback map error: {:?}", e)));
        }
        Err(e) => {
            log_err!("GPU: readback channel error: {:?}", e);
            return Err(CacheError::Gpu(format!("readback channel error: {:?}", e)));
        }
    }

    let mapped = slice.get_mapped_range();
    let actual_row = (width * 4) as usize;
    let mut result = Vec::with_capacity(actual_row * height as usize);
    for y in 0..height as usize {
        let start = y * bytes_per_row as usize;
        result.extend_from_slice(&mapped[start..start + actual_row]);
    }
    drop(mapped);
    staging.unmap();

    Ok(result)
}
