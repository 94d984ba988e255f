// ============================================================================
// TILECACHE: sparse, growable tile cache for painted raster surfaces
// ============================================================================
//
// Data flow:
//   paint → raw::AutoTiledSurface (16-bit tiles)
//         → surface::DrawableTiledSurface::pixel_rect_changed
//         → regen::TileRegenerator (8-bit display tiles, rayon above threshold)
//         → render::TileRenderer (CPU `RgbaImage` or `gpu::GpuCanvas`)
//   offload::* spills the display tiles to a temp file and back.
// ============================================================================

#[macro_use]
pub mod logger;

pub mod error;
pub mod geometry;
pub mod gpu;
pub mod grid;
pub mod offload;
pub mod raw;
pub mod regen;
pub mod render;
pub mod settings;
pub mod surface;

pub use error::{CacheError, Result};
pub use geometry::{PixelRect, Rect, TileRect};
pub use grid::{GridGeometry, TileGrid};
pub use offload::{OffloadEvent, OffloadKind, OffloadState, OffloadTicket, TmpFileHandle};
pub use raw::{AutoTiledSurface, RawSurface, Rgba16Tile};
pub use regen::{TileImage, TileRegenerator};
pub use render::{PaintParams, TileBlend, TileCanvas, TileRenderer};
pub use settings::CacheSettings;
pub use surface::DrawableTiledSurface;
