// ============================================================================
// GEOMETRY: integer rectangles and pixel ↔ tile coordinate mapping
// ============================================================================

/// Axis-aligned integer rectangle with an exclusive max corner.
///
/// Used both in pixel space and in tile space; the two helper aliases
/// [`PixelRect`] and [`TileRect`] only document which one a value lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// A rectangle measured in pixels.
pub type PixelRect = Rect;

/// A rectangle measured in tiles.
pub type TileRect = Rect;

impl Rect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    /// Exclusive right edge.
    #[inline]
    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    /// Exclusive bottom edge.
    #[inline]
    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// Number of cells covered (0 for empty rects).
    pub fn area(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            self.width as usize * self.height as usize
        }
    }

    pub fn contains_point(&self, x: i32, y: i32) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    pub fn contains_rect(&self, other: &Rect) -> bool {
        other.is_empty()
            || (other.x >= self.x
                && other.y >= self.y
                && other.right() <= self.right()
                && other.bottom() <= self.bottom())
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    /// Intersection, or `None` when the rectangles do not overlap.
    pub fn intersected(&self, other: &Rect) -> Option<Rect> {
        if !self.intersects(other) {
            return None;
        }
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.right().min(other.right());
        let y1 = self.bottom().min(other.bottom());
        Some(Rect::new(x0, y0, x1 - x0, y1 - y0))
    }

    /// Iterate every `(x, y)` cell, column by column.
    pub fn cells(self) -> impl Iterator<Item = (i32, i32)> {
        let r = self;
        let (x0, x1) = if r.is_empty() { (0, 0) } else { (r.x, r.right()) };
        (x0..x1).flat_map(move |x| (r.y..r.bottom()).map(move |y| (x, y)))
    }
}

// ---- coordinate mapping -----------------------------------------------------

/// Convert a pixel rectangle into the tile rectangle that covers it.
///
/// The min corner is floor-divided. The extent gets one extra tile when the
/// pixel extent is an exact multiple of `tile_size` and two otherwise; drawing
/// relies on this rounding to leave no gaps at tile edges, so it is kept as is
/// even though it can over-cover by a tile.
pub fn pix_rect_to_tile_rect(pix: &PixelRect, tile_size: u32) -> TileRect {
    let ts = tile_size as i32;
    let width_rem = if pix.width % ts != 0 { 2 } else { 1 };
    let height_rem = if pix.height % ts != 0 { 2 } else { 1 };
    Rect::new(
        pix.x.div_euclid(ts),
        pix.y.div_euclid(ts),
        pix.width / ts + width_rem,
        pix.height / ts + height_rem,
    )
}

/// Exact multiplication back into pixel space.
///
/// Not a strict inverse of [`pix_rect_to_tile_rect`], only a superset of the
/// original pixel rectangle.
pub fn tile_rect_to_pix_rect(tiles: &TileRect, tile_size: u32) -> PixelRect {
    let ts = tile_size as i32;
    Rect::new(tiles.x * ts, tiles.y * ts, tiles.width * ts, tiles.height * ts)
}

/// Tile containing the pixel `(x, y)`.
#[inline]
pub fn pixel_to_tile(x: i32, y: i32, tile_size: u32) -> (i32, i32) {
    let ts = tile_size as i32;
    (x.div_euclid(ts), y.div_euclid(ts))
}

/// Position of pixel `(x, y)` inside its tile.
#[inline]
pub fn pixel_in_tile(x: i32, y: i32, tile_size: u32) -> (u32, u32) {
    let ts = tile_size as i32;
    (x.rem_euclid(ts) as u32, y.rem_euclid(ts) as u32)
}

/// Tile-space `(tx, ty)` → storage `(column, row)` given the zero offset.
#[inline]
pub fn tile_to_storage(tx: i32, ty: i32, zero_column: i32, zero_row: i32) -> (i32, i32) {
    (tx + zero_column, ty + zero_row)
}
