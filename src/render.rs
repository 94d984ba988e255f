// ============================================================================
// TILE RENDERER: draw the tiles that intersect a clip onto a target
// ============================================================================

use image::RgbaImage;

use crate::geometry::{PixelRect, TileRect, pix_rect_to_tile_rect};
use crate::grid::TileGrid;
use crate::regen::TileImage;

/// How a tile combines with what is already on the target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TileBlend {
    /// Straight-alpha source-over.
    #[default]
    SourceOver,
    /// Replace the destination pixels outright.
    Copy,
}

/// Per-draw paint parameters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PaintParams {
    /// 0.0..=1.0, multiplied into every tile's alpha
    pub opacity: f32,
    pub blend: TileBlend,
}

impl Default for PaintParams {
    fn default() -> Self {
        Self {
            opacity: 1.0,
            blend: TileBlend::SourceOver,
        }
    }
}

/// Anything a tile can be composited onto.
///
/// `RgbaImage` is the CPU path; [`crate::gpu::GpuCanvas`] is the GPU path.
/// `(x, y)` is the target pixel the tile's top-left corner lands on and may
/// lie partly or fully outside the target.
pub trait TileCanvas {
    fn draw_tile(&mut self, image: &TileImage, x: i32, y: i32, paint: &PaintParams);
}

impl TileCanvas for RgbaImage {
    fn draw_tile(&mut self, image: &TileImage, x: i32, y: i32, paint: &PaintParams) {
        composite_tile_cpu(self, image, x, y, paint);
    }
}

/// Visits the tiles of a grid that overlap a clip and hands them to a canvas.
#[derive(Clone, Copy, Debug)]
pub struct TileRenderer {
    tile_size: u32,
}

impl TileRenderer {
    pub fn new(tile_size: u32) -> Self {
        Self { tile_size }
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    /// Tile rectangle a draw call will visit, or `None` when nothing overlaps.
    pub fn visible_tile_rect(
        &self,
        grid: &TileGrid<TileImage>,
        clip: Option<&PixelRect>,
    ) -> Option<TileRect> {
        let max_rect = grid.bounding_rect();
        match clip {
            Some(pix) => pix_rect_to_tile_rect(pix, self.tile_size).intersected(&max_rect),
            None if max_rect.is_empty() => None,
            None => Some(max_rect),
        }
    }

    /// Draw every present tile overlapping `clip` (surface pixel space) with
    /// the surface origin at `dst` on the canvas. Absent tiles are skipped.
    ///
    /// Returns the number of tiles drawn.
    pub fn draw_on_canvas<C: TileCanvas + ?Sized>(
        &self,
        grid: &TileGrid<TileImage>,
        canvas: &mut C,
        dst: (i32, i32),
        clip: Option<&PixelRect>,
        paint: Option<&PaintParams>,
    ) -> usize {
        let Some(tile_rect) = self.visible_tile_rect(grid, clip) else {
            return 0;
        };
        let paint = paint.copied().unwrap_or_default();
        let ts = self.tile_size as i32;

        let mut drawn = 0;
        for (tx, ty) in tile_rect.cells() {
            let Some(image) = grid.tile_at(tx, ty) else { continue };
            canvas.draw_tile(image, dst.0 + tx * ts, dst.1 + ty * ts, &paint);
            drawn += 1;
        }
        drawn
    }
}

/// CPU compositing of one tile.
///
/// Matches the GPU pipeline's fixed-function blend: color is
/// `src * a + dst * (1 - a)`, alpha is `a + dst_a * (1 - a)` with
/// `a = src_alpha * opacity`.
pub fn composite_tile_cpu(target: &mut RgbaImage, tile: &RgbaImage, x: i32, y: i32, paint: &PaintParams) {
    let (tw, th) = (target.width() as i32, target.height() as i32);
    let (sw, sh) = (tile.width() as i32, tile.height() as i32);

    let x0 = x.max(0);
    let y0 = y.max(0);
    let x1 = (x + sw).min(tw);
    let y1 = (y + sh).min(th);
    if x0 >= x1 || y0 >= y1 {
        return;
    }

    let opacity = paint.opacity.clamp(0.0, 1.0);
    let target_stride = tw as usize * 4;
    let tile_stride = sw as usize * 4;
    let src_raw = tile.as_raw();
    let dst_raw: &mut [u8] = target.as_mut();

    for gy in y0..y1 {
        let src_row = (gy - y) as usize * tile_stride;
        let dst_row = gy as usize * target_stride;
        for gx in x0..x1 {
            let s = src_row + (gx - x) as usize * 4;
            let d = dst_row + gx as usize * 4;
            let src = &src_raw[s..s + 4];
            let sa = src[3] as f32 / 255.0 * opacity;
            match paint.blend {
                TileBlend::Copy => {
                    dst_raw[d..d + 3].copy_from_slice(&src[..3]);
                    dst_raw[d + 3] = to_unorm(sa);
                }
                TileBlend::SourceOver => {
                    if sa <= 0.0 {
                        continue;
                    }
                    let inv = 1.0 - sa;
                    for c in 0..3 {
                        let sc = src[c] as f32 / 255.0;
                        let dc = dst_raw[d + c] as f32 / 255.0;
                        dst_raw[d + c] = to_unorm(sc * sa + dc * inv);
                    }
                    let da = dst_raw[d + 3] as f32 / 255.0;
                    dst_raw[d + 3] = to_unorm(sa + da * inv);
                }
            }
        }
    }
}

#[inline(always)]
fn to_unorm(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0 + 0.5) as u8
}
