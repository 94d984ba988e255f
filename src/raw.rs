// ============================================================================
// RAW SURFACE: authoritative 16-bit paint buffer the image tiles derive from
// ============================================================================

use std::io::{Read, Write};

use image::{ImageBuffer, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};
use crate::geometry::{PixelRect, Rect, TileRect, pixel_in_tile, pixel_to_tile};
use crate::grid::{GridGeometry, TileGrid};
use crate::settings::{MAX_TILE_SIZE, MIN_TILE_SIZE};

/// One raw tile: 16 bits per channel, straight alpha.
pub type Rgba16Tile = ImageBuffer<Rgba<u16>, Vec<u16>>;

/// A pixel with zero alpha, returned for missing tiles.
pub const TRANSPARENT16: Rgba<u16> = Rgba([0, 0, 0, 0]);

/// What the tile cache needs from the paint layer.
///
/// Implementations are read concurrently by regeneration workers, hence
/// `Sync`.
pub trait RawSurface: Send + Sync {
    /// Edge length of every raw tile, in pixels.
    fn tile_size(&self) -> u32;

    /// Raw pixels of tile `(tx, ty)`, `None` if nothing was painted there.
    fn raw_tile_at(&self, tx: i32, ty: i32) -> Option<&Rgba16Tile>;

    /// Tile-space rectangle the raw surface currently spans.
    fn raw_bounding_rect(&self) -> TileRect;
}

/// Sparse raw surface that grows in every direction as it is painted.
#[derive(Clone, Debug)]
pub struct AutoTiledSurface {
    tile_size: u32,
    tiles: TileGrid<Rgba16Tile>,
}

/// Marker written at the head of a raw surface stream.
const RAW_MAGIC: &str = "TCR1";

/// Serializable raw surface, only populated tiles are stored.
#[derive(Serialize, Deserialize)]
struct RawSurfaceFile {
    magic: String,
    tile_size: u32,
    row_count: i32,
    column_count: i32,
    zero_row: i32,
    zero_column: i32,
    tiles: Vec<RawTileData>,
}

#[derive(Serialize, Deserialize)]
struct RawTileData {
    tx: i32,
    ty: i32,
    pixels: Vec<u16>,
}

impl AutoTiledSurface {
    pub fn new(tile_size: u32) -> Self {
        Self {
            tile_size: tile_size.max(1),
            tiles: TileGrid::new(),
        }
    }

    pub fn tiles(&self) -> &TileGrid<Rgba16Tile> {
        &self.tiles
    }

    /// Tile-space rectangle spanned by the raw grid.
    pub fn tile_bounding_rect(&self) -> TileRect {
        self.tiles.bounding_rect()
    }

    // ---- pixel access -------------------------------------------------------

    /// Read a pixel (transparent for unpainted tiles).
    pub fn get_pixel(&self, x: i32, y: i32) -> Rgba<u16> {
        let (tx, ty) = pixel_to_tile(x, y, self.tile_size);
        let (lx, ly) = pixel_in_tile(x, y, self.tile_size);
        self.tiles
            .tile_at(tx, ty)
            .map(|t| *t.get_pixel(lx, ly))
            .unwrap_or(TRANSPARENT16)
    }

    /// Write a pixel, creating (and growing towards) its tile on demand.
    pub fn put_pixel(&mut self, x: i32, y: i32, pixel: Rgba<u16>) -> PixelRect {
        let (tx, ty) = pixel_to_tile(x, y, self.tile_size);
        let (lx, ly) = pixel_in_tile(x, y, self.tile_size);
        let ts = self.tile_size;
        match self.tiles.tile_or_insert_with(tx, ty, || Rgba16Tile::new(ts, ts)) {
            Some(tile) => {
                tile.put_pixel(lx, ly, pixel);
                Rect::new(x, y, 1, 1)
            }
            None => Rect::default(),
        }
    }

    /// Fill a pixel rectangle with a solid color. Returns the painted rect.
    pub fn fill_rect(&mut self, rect: &PixelRect, color: Rgba<u16>) -> PixelRect {
        if rect.is_empty() {
            return Rect::default();
        }
        let ts = self.tile_size;
        let edge = ts as i32;
        let (tx0, ty0) = pixel_to_tile(rect.x, rect.y, ts);
        let (tx1, ty1) = pixel_to_tile(rect.right() - 1, rect.bottom() - 1, ts);
        for tx in tx0..=tx1 {
            for ty in ty0..=ty1 {
                let tile_rect = Rect::new(tx * edge, ty * edge, edge, edge);
                let Some(overlap) = tile_rect.intersected(rect) else { continue };
                let Some(tile) = self.tiles.tile_or_insert_with(tx, ty, || Rgba16Tile::new(ts, ts))
                else {
                    continue;
                };
                for py in overlap.y..overlap.bottom() {
                    for px in overlap.x..overlap.right() {
                        tile.put_pixel((px - tile_rect.x) as u32, (py - tile_rect.y) as u32, color);
                    }
                }
            }
        }
        *rect
    }

    /// Paint an 8-bit RGBA image with its top-left corner at `(dst_x, dst_y)`.
    ///
    /// Rows are copied in per-tile runs; a run made only of fully transparent
    /// pixels never allocates a tile. Returns the pixel rect that changed.
    pub fn blit_rgba8(&mut self, dst_x: i32, dst_y: i32, src: &RgbaImage) -> PixelRect {
        let (src_w, src_h) = src.dimensions();
        if src_w == 0 || src_h == 0 {
            return Rect::default();
        }
        let ts = self.tile_size;
        let raw = src.as_raw();

        for sy in 0..src_h {
            let gy = dst_y + sy as i32;
            let src_row_start = sy as usize * src_w as usize * 4;

            let mut sx = 0u32;
            while sx < src_w {
                let gx = dst_x + sx as i32;
                let (tx, ty) = pixel_to_tile(gx, gy, ts);
                let (lx, ly) = pixel_in_tile(gx, gy, ts);

                let run = (ts - lx).min(src_w - sx);
                let src_off = src_row_start + sx as usize * 4;
                let src_run = &raw[src_off..src_off + run as usize * 4];

                let has_content = src_run.chunks_exact(4).any(|px| px[3] != 0);
                let existing = self.tiles.tile_at(tx, ty).is_some();
                let tile = if has_content || existing {
                    self.tiles.tile_or_insert_with(tx, ty, || Rgba16Tile::new(ts, ts))
                } else {
                    None
                };
                if let Some(tile) = tile {
                    for (i, px) in src_run.chunks_exact(4).enumerate() {
                        tile.put_pixel(
                            lx + i as u32,
                            ly,
                            Rgba([widen(px[0]), widen(px[1]), widen(px[2]), widen(px[3])]),
                        );
                    }
                }

                sx += run;
            }
        }
        Rect::new(dst_x, dst_y, src_w as i32, src_h as i32)
    }

    /// Drop every raw tile.
    pub fn clear(&mut self) {
        self.tiles.clear();
    }

    /// Approximate memory held by raw tiles.
    pub fn byte_count(&self) -> usize {
        self.tiles.present_count()
            * (self.tile_size as usize * self.tile_size as usize * 4 * std::mem::size_of::<u16>())
    }

    // ---- stream persistence -------------------------------------------------

    /// Serialize into a container stream (sparse: populated tiles only).
    pub fn write_to<W: Write>(&self, writer: W) -> Result<()> {
        let geometry = self.tiles.geometry();
        let file = RawSurfaceFile {
            magic: RAW_MAGIC.to_string(),
            tile_size: self.tile_size,
            row_count: geometry.row_count,
            column_count: geometry.column_count,
            zero_row: geometry.zero_row,
            zero_column: geometry.zero_column,
            tiles: self
                .tiles
                .iter()
                .map(|(tx, ty, tile)| RawTileData {
                    tx,
                    ty,
                    pixels: tile.as_raw().clone(),
                })
                .collect(),
        };
        bincode::serialize_into(writer, &file)?;
        Ok(())
    }

    /// Deserialize a stream produced by [`write_to`](Self::write_to).
    pub fn read_from<R: Read>(reader: R) -> Result<Self> {
        let file: RawSurfaceFile = bincode::deserialize_from(reader)?;
        if file.magic != RAW_MAGIC {
            return Err(CacheError::Serialize(format!("Unknown magic '{}'", file.magic)));
        }
        if !(MIN_TILE_SIZE..=MAX_TILE_SIZE).contains(&file.tile_size) {
            return Err(CacheError::Serialize(format!(
                "Tile size {} outside {}..={}",
                file.tile_size, MIN_TILE_SIZE, MAX_TILE_SIZE
            )));
        }
        let geometry = GridGeometry {
            row_count: file.row_count,
            column_count: file.column_count,
            zero_row: file.zero_row,
            zero_column: file.zero_column,
        };
        geometry
            .validate_stored()
            .map_err(|msg| CacheError::Serialize(format!("Container {}", msg)))?;

        let expected = (file.tile_size as usize)
            .checked_mul(file.tile_size as usize)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| CacheError::Serialize("Tile size overflows".into()))?;
        let mut tiles = TileGrid::with_geometry(geometry);
        let bounds = geometry.bounding_rect();
        for td in file.tiles {
            if !bounds.contains_point(td.tx, td.ty) {
                return Err(CacheError::Serialize(format!(
                    "Tile ({},{}) lies outside {:?}",
                    td.tx, td.ty, bounds
                )));
            }
            if td.pixels.len() != expected {
                return Err(CacheError::Serialize(format!(
                    "Tile ({},{}) has {} samples, expected {}",
                    td.tx,
                    td.ty,
                    td.pixels.len(),
                    expected
                )));
            }
            let tile = Rgba16Tile::from_raw(file.tile_size, file.tile_size, td.pixels)
                .ok_or_else(|| {
                    CacheError::Serialize(format!("Failed to rebuild tile ({},{})", td.tx, td.ty))
                })?;
            tiles.set_tile(td.tx, td.ty, Some(tile));
        }
        Ok(Self {
            tile_size: file.tile_size,
            tiles,
        })
    }
}

impl RawSurface for AutoTiledSurface {
    fn tile_size(&self) -> u32 {
        self.tile_size
    }

    fn raw_tile_at(&self, tx: i32, ty: i32) -> Option<&Rgba16Tile> {
        self.tiles.tile_at(tx, ty)
    }

    fn raw_bounding_rect(&self) -> TileRect {
        self.tile_bounding_rect()
    }
}

/// 8-bit → 16-bit channel (0xAB → 0xABAB).
#[inline(always)]
pub fn widen(v: u8) -> u16 {
    (v as u16) << 8 | v as u16
}

/// 16-bit → 8-bit channel, rounded to nearest.
#[inline(always)]
pub fn narrow(v: u16) -> u8 {
    ((v as u32 * 255 + 32767) / 65535) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_widen_narrow_round_trip() {
        for v in 0..=255u8 {
            assert_eq!(narrow(widen(v)), v);
        }
        assert_eq!(narrow(0x8000), 128);
    }

    #[test]
    fn test_put_pixel_grows_negative() {
        let mut s = AutoTiledSurface::new(4);
        s.put_pixel(1, 1, Rgba([1, 2, 3, 4]));
        s.put_pixel(-5, 2, Rgba([9, 9, 9, 9]));
        assert_eq!(s.raw_bounding_rect(), Rect::new(-2, 0, 3, 1));
        assert_eq!(s.get_pixel(1, 1), Rgba([1, 2, 3, 4]));
        assert_eq!(s.get_pixel(-5, 2), Rgba([9, 9, 9, 9]));
        assert_eq!(s.get_pixel(-4, 2), TRANSPARENT16);
        assert!(s.raw_tile_at(-1, 0).is_none());
    }

    #[test]
    fn test_blit_skips_transparent_runs() {
        let mut s = AutoTiledSurface::new(4);
        let mut img = RgbaImage::new(8, 4);
        img.put_pixel(6, 1, Rgba([10, 20, 30, 255]));
        let changed = s.blit_rgba8(0, 0, &img);
        assert_eq!(changed, Rect::new(0, 0, 8, 4));
        assert!(s.raw_tile_at(0, 0).is_none());
        assert!(s.raw_tile_at(1, 0).is_some());
        assert_eq!(s.get_pixel(6, 1), Rgba([widen(10), widen(20), widen(30), 0xffff]));
    }

    #[test]
    fn test_blit_at_negative_offset() {
        let mut s = AutoTiledSurface::new(4);
        let img = RgbaImage::from_pixel(3, 3, Rgba([255, 0, 0, 255]));
        s.blit_rgba8(-2, -2, &img);
        assert_eq!(s.raw_bounding_rect(), Rect::new(-1, -1, 2, 2));
        assert_eq!(s.get_pixel(-2, -2)[0], 0xffff);
        assert_eq!(s.get_pixel(0, 0)[0], 0xffff);
        assert_eq!(s.get_pixel(1, 1), TRANSPARENT16);
    }

    #[test]
    fn test_fill_rect_spans_tiles() {
        let mut s = AutoTiledSurface::new(4);
        s.fill_rect(&Rect::new(3, 3, 2, 2), Rgba([0, 0, 0xffff, 0xffff]));
        assert_eq!(s.tiles().present_count(), 4);
        assert_eq!(s.get_pixel(4, 4)[2], 0xffff);
        assert_eq!(s.get_pixel(2, 2), TRANSPARENT16);
    }

    #[test]
    fn test_stream_round_trip() {
        let mut s = AutoTiledSurface::new(8);
        s.fill_rect(&Rect::new(-9, 5, 3, 12), Rgba([1, 2, 3, 4]));
        let mut buf = Vec::new();
        s.write_to(&mut buf).unwrap();
        let back = AutoTiledSurface::read_from(buf.as_slice()).unwrap();
        assert_eq!(back.tiles().geometry(), s.tiles().geometry());
        assert_eq!(back.get_pixel(-8, 10), Rgba([1, 2, 3, 4]));
        assert_eq!(back.tiles().present_count(), s.tiles().present_count());
    }

    #[test]
    fn test_stream_rejects_garbage() {
        let garbage = vec![0u8; 5];
        assert!(AutoTiledSurface::read_from(garbage.as_slice()).is_err());
    }

    fn encoded(tile_size: u32, geometry: GridGeometry) -> Vec<u8> {
        let file = RawSurfaceFile {
            magic: RAW_MAGIC.to_string(),
            tile_size,
            row_count: geometry.row_count,
            column_count: geometry.column_count,
            zero_row: geometry.zero_row,
            zero_column: geometry.zero_column,
            tiles: Vec::new(),
        };
        bincode::serialize(&file).unwrap()
    }

    #[test]
    fn test_stream_rejects_bad_tile_size() {
        for ts in [0, 4, MAX_TILE_SIZE + 1, 65536, u32::MAX] {
            let buf = encoded(ts, GridGeometry::default());
            assert!(matches!(
                AutoTiledSurface::read_from(buf.as_slice()),
                Err(CacheError::Serialize(_))
            ));
        }
    }

    #[test]
    fn test_stream_rejects_oversized_geometry() {
        let geometry = GridGeometry {
            row_count: i32::MAX,
            column_count: i32::MAX,
            zero_row: 0,
            zero_column: 0,
        };
        let buf = encoded(64, geometry);
        assert!(matches!(
            AutoTiledSurface::read_from(buf.as_slice()),
            Err(CacheError::Serialize(_))
        ));
    }
}
