// ============================================================================
// TILE REGENERATOR: rebuild displayable tile images from the raw surface
// ============================================================================

use std::sync::Arc;

use image::RgbaImage;
use rayon::prelude::*;

use crate::geometry::{PixelRect, TileRect, pix_rect_to_tile_rect};
use crate::grid::TileGrid;
use crate::raw::{RawSurface, Rgba16Tile, narrow};
use crate::settings::DEFAULT_PARALLEL_THRESHOLD;

/// Displayable tile image, shared between the grid, offload snapshots and
/// the GPU upload path.
pub type TileImage = Arc<RgbaImage>;

/// Recomputes image tiles for a dirty region.
///
/// Tiles have no data dependency on each other, so above
/// `parallel_threshold` tiles the work is spread over the rayon pool.
/// Results are collected first and stored afterwards, which keeps the grid
/// single-writer and makes parallel and sequential output identical.
#[derive(Clone, Copy, Debug)]
pub struct TileRegenerator {
    parallel_threshold: usize,
}

impl Default for TileRegenerator {
    fn default() -> Self {
        Self::new(DEFAULT_PARALLEL_THRESHOLD)
    }
}

impl TileRegenerator {
    pub fn new(parallel_threshold: usize) -> Self {
        Self { parallel_threshold }
    }

    pub fn parallel_threshold(&self) -> usize {
        self.parallel_threshold
    }

    /// Regenerate every tile touched by `dirty` (pixel space).
    /// Returns the number of tiles recomputed.
    pub fn regenerate<S: RawSurface + ?Sized>(
        &self,
        raw: &S,
        images: &mut TileGrid<TileImage>,
        dirty: &PixelRect,
    ) -> usize {
        let tile_rect = pix_rect_to_tile_rect(dirty, raw.tile_size());
        self.regenerate_tiles(raw, images, &tile_rect)
    }

    /// Regenerate every tile of `tile_rect` that the raw surface spans.
    pub fn regenerate_tiles<S: RawSurface + ?Sized>(
        &self,
        raw: &S,
        images: &mut TileGrid<TileImage>,
        tile_rect: &TileRect,
    ) -> usize {
        let Some(rect) = raw.raw_bounding_rect().intersected(tile_rect) else {
            return 0;
        };
        images.stretch_to_include_rect(&rect);

        let cells: Vec<(i32, i32)> = rect.cells().collect();
        let count = cells.len();
        let parallel = count > self.parallel_threshold;

        let results: Vec<(i32, i32, Option<TileImage>)> = if parallel {
            cells
                .into_par_iter()
                .map(|(tx, ty)| (tx, ty, raw.raw_tile_at(tx, ty).map(tile_to_image)))
                .collect()
        } else {
            cells
                .into_iter()
                .map(|(tx, ty)| (tx, ty, raw.raw_tile_at(tx, ty).map(tile_to_image)))
                .collect()
        };

        for (tx, ty, image) in results {
            images.set_tile(tx, ty, image);
        }

        if parallel {
            log_info!("Regenerated {} tiles in parallel ({:?})", count, rect);
        }
        count
    }
}

/// Convert one raw 16-bit tile into a shared 8-bit display image.
pub fn tile_to_image(raw: &Rgba16Tile) -> TileImage {
    let (w, h) = raw.dimensions();
    let data: Vec<u8> = raw.as_raw().iter().map(|&v| narrow(v)).collect();
    let image = RgbaImage::from_raw(w, h, data).unwrap_or_else(|| RgbaImage::new(w, h));
    Arc::new(image)
}
