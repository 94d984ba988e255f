// ============================================================================
// TILE GRID: sparse, growable 2D array of tiles with a movable zero tile
// ============================================================================

use crate::error::{CacheError, Result};
use crate::geometry::{Rect, TileRect};

/// Largest row or column count accepted from persisted data.
pub const MAX_STORED_EDGE: i32 = 1 << 16;
/// Largest slot count accepted from persisted data.
pub const MAX_STORED_SLOTS: usize = 1 << 24;

/// Row/column extents plus the storage offset of tile `(0, 0)`.
///
/// This is exactly the header written in front of an offloaded tile file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct GridGeometry {
    pub row_count: i32,
    pub column_count: i32,
    pub zero_row: i32,
    pub zero_column: i32,
}

impl GridGeometry {
    /// Tile-space rectangle covered by the storage slots.
    pub fn bounding_rect(&self) -> TileRect {
        Rect::new(-self.zero_column, -self.zero_row, self.column_count, self.row_count)
    }

    pub fn slot_count(&self) -> usize {
        self.row_count.max(0) as usize * self.column_count.max(0) as usize
    }

    /// Check geometry read back from a stream or file: non-negative extents,
    /// zero offsets inside them, and no more than [`MAX_STORED_EDGE`] per axis
    /// or [`MAX_STORED_SLOTS`] in total.
    pub fn validate_stored(&self) -> std::result::Result<(), String> {
        let in_range = |zero: i32, count: i32| count >= 0 && (0..=count).contains(&zero);
        if !in_range(self.zero_row, self.row_count) || !in_range(self.zero_column, self.column_count) {
            return Err(format!("invalid geometry {:?}", self));
        }
        let slots = (self.row_count as usize).checked_mul(self.column_count as usize);
        if self.row_count > MAX_STORED_EDGE
            || self.column_count > MAX_STORED_EDGE
            || slots.is_none_or(|n| n > MAX_STORED_SLOTS)
        {
            return Err(format!("geometry declares {}x{} tiles", self.column_count, self.row_count));
        }
        Ok(())
    }
}

/// Sparse tile storage that grows losslessly in all four directions.
///
/// Storage is column-major (`columns[column][row]`); tile-space coordinate
/// `(tx, ty)` lives at `(tx + zero_column, ty + zero_row)`. Growing towards
/// negative coordinates prepends empty rows/columns and bumps the zero
/// offset, so every coordinate that resolved before still resolves to the
/// same tile afterwards.
#[derive(Clone, Debug)]
pub struct TileGrid<T> {
    geometry: GridGeometry,
    columns: Vec<Vec<Option<T>>>,
}

impl<T> Default for TileGrid<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TileGrid<T> {
    // ---- construction -------------------------------------------------------

    pub fn new() -> Self {
        Self {
            geometry: GridGeometry::default(),
            columns: Vec::new(),
        }
    }

    /// Empty slots laid out with the given geometry.
    pub fn with_geometry(geometry: GridGeometry) -> Self {
        let rows = geometry.row_count.max(0) as usize;
        let columns = (0..geometry.column_count.max(0))
            .map(|_| Self::empty_column(rows))
            .collect();
        Self { geometry, columns }
    }

    /// Rebuild a grid from column-major storage read back from disk.
    pub fn from_columns(geometry: GridGeometry, columns: Vec<Vec<Option<T>>>) -> Result<Self> {
        if columns.len() != geometry.column_count.max(0) as usize {
            return Err(CacheError::CorruptCacheFile(format!(
                "expected {} columns, got {}",
                geometry.column_count,
                columns.len()
            )));
        }
        if let Some(bad) = columns
            .iter()
            .position(|c| c.len() != geometry.row_count.max(0) as usize)
        {
            return Err(CacheError::CorruptCacheFile(format!(
                "column {} has {} rows, expected {}",
                bad,
                columns[bad].len(),
                geometry.row_count
            )));
        }
        Ok(Self { geometry, columns })
    }

    fn empty_column(rows: usize) -> Vec<Option<T>> {
        std::iter::repeat_with(|| None).take(rows).collect()
    }

    // ---- geometry -----------------------------------------------------------

    pub fn geometry(&self) -> GridGeometry {
        self.geometry
    }

    pub fn row_count(&self) -> i32 {
        self.geometry.row_count
    }

    pub fn column_count(&self) -> i32 {
        self.geometry.column_count
    }

    pub fn zero_row(&self) -> i32 {
        self.geometry.zero_row
    }

    pub fn zero_column(&self) -> i32 {
        self.geometry.zero_column
    }

    /// Smallest tile-space rectangle covering every storage slot (populated or not).
    pub fn bounding_rect(&self) -> TileRect {
        self.geometry.bounding_rect()
    }

    pub fn is_empty(&self) -> bool {
        self.geometry.row_count == 0 || self.geometry.column_count == 0
    }

    // ---- growth -------------------------------------------------------------

    /// Grow so that tile-space `(tx, ty)` is addressable.
    ///
    /// Each axis is handled on its own: negative storage indices prepend,
    /// indices past the end append. Existing tiles never move in tile space.
    /// Returns `false` and leaves the grid untouched when the grown extents
    /// would not fit in `i32`.
    pub fn stretch_to_include(&mut self, tx: i32, ty: i32) -> bool {
        let g = self.geometry;
        let rows = grown_extent(ty as i64 + g.zero_row as i64, g.row_count);
        let columns = grown_extent(tx as i64 + g.zero_column as i64, g.column_count);
        let (Some((row_pre, row_app)), Some((col_pre, col_app))) = (rows, columns) else {
            log_warn!("TileGrid: tile ({}, {}) is outside the addressable range", tx, ty);
            return false;
        };

        if row_pre > 0 {
            self.prepend_rows(row_pre);
        } else if row_app > 0 {
            self.append_rows(row_app);
        }
        if col_pre > 0 {
            self.prepend_columns(col_pre);
        } else if col_app > 0 {
            self.append_columns(col_app);
        }
        true
    }

    /// Grow so that every tile of `rect` is addressable.
    pub fn stretch_to_include_rect(&mut self, rect: &TileRect) -> bool {
        if rect.is_empty() {
            return true;
        }
        self.stretch_to_include(rect.x, rect.y)
            && self.stretch_to_include(rect.right() - 1, rect.bottom() - 1)
    }

    fn prepend_rows(&mut self, count: usize) {
        for column in &mut self.columns {
            column.splice(0..0, std::iter::repeat_with(|| None).take(count));
        }
        self.geometry.row_count += count as i32;
        self.geometry.zero_row += count as i32;
        log_info!("TileGrid: prepended {} rows (zero row now {})", count, self.geometry.zero_row);
    }

    fn append_rows(&mut self, count: usize) {
        for column in &mut self.columns {
            column.extend(std::iter::repeat_with(|| None).take(count));
        }
        self.geometry.row_count += count as i32;
    }

    fn prepend_columns(&mut self, count: usize) {
        let rows = self.geometry.row_count as usize;
        self.columns
            .splice(0..0, (0..count).map(|_| Self::empty_column(rows)));
        self.geometry.column_count += count as i32;
        self.geometry.zero_column += count as i32;
        log_info!(
            "TileGrid: prepended {} columns (zero column now {})",
            count,
            self.geometry.zero_column
        );
    }

    fn append_columns(&mut self, count: usize) {
        let rows = self.geometry.row_count as usize;
        self.columns
            .extend((0..count).map(|_| Self::empty_column(rows)));
        self.geometry.column_count += count as i32;
    }

    // ---- tile access --------------------------------------------------------

    #[inline(always)]
    fn storage_index(&self, tx: i32, ty: i32) -> Option<(usize, usize)> {
        let column = tx.checked_add(self.geometry.zero_column)?;
        let row = ty.checked_add(self.geometry.zero_row)?;
        if column < 0
            || row < 0
            || column >= self.geometry.column_count
            || row >= self.geometry.row_count
        {
            return None;
        }
        Some((column as usize, row as usize))
    }

    /// Tile at tile-space `(tx, ty)`; `None` if never set or out of bounds.
    pub fn tile_at(&self, tx: i32, ty: i32) -> Option<&T> {
        let (column, row) = self.storage_index(tx, ty)?;
        self.columns[column][row].as_ref()
    }

    /// Store (or clear, with `None`) the tile at `(tx, ty)`, growing as needed.
    /// Returns the previous occupant. A tile the grid cannot address is dropped.
    pub fn set_tile(&mut self, tx: i32, ty: i32, tile: Option<T>) -> Option<T> {
        self.stretch_to_include(tx, ty);
        let (column, row) = self.storage_index(tx, ty)?;
        std::mem::replace(&mut self.columns[column][row], tile)
    }

    /// Get or create the tile at `(tx, ty)`, growing as needed.
    /// `None` when the coordinate is outside the addressable range.
    pub fn tile_or_insert_with(&mut self, tx: i32, ty: i32, make: impl FnOnce() -> T) -> Option<&mut T> {
        self.stretch_to_include(tx, ty);
        let (column, row) = self.storage_index(tx, ty)?;
        Some(self.columns[column][row].get_or_insert_with(make))
    }

    /// Direct storage-index read. Out-of-range indices are a caller bug.
    pub fn tile_at_index(&self, column: i32, row: i32) -> Result<Option<&T>> {
        self.check_index(column, row)?;
        Ok(self.columns[column as usize][row as usize].as_ref())
    }

    /// Direct storage-index write. Never grows the grid.
    pub fn set_tile_at_index(&mut self, column: i32, row: i32, tile: Option<T>) -> Result<Option<T>> {
        self.check_index(column, row)?;
        Ok(std::mem::replace(
            &mut self.columns[column as usize][row as usize],
            tile,
        ))
    }

    fn check_index(&self, column: i32, row: i32) -> Result<()> {
        if column < 0
            || row < 0
            || column >= self.geometry.column_count
            || row >= self.geometry.row_count
        {
            return Err(CacheError::OutOfBoundsAccess { column, row });
        }
        Ok(())
    }

    // ---- iteration ----------------------------------------------------------

    /// Column-major storage, the order tiles are written to disk.
    pub fn columns(&self) -> &[Vec<Option<T>>] {
        &self.columns
    }

    /// Populated tiles as `(tx, ty, tile)` in tile space.
    pub fn iter(&self) -> impl Iterator<Item = (i32, i32, &T)> + '_ {
        let zc = self.geometry.zero_column;
        let zr = self.geometry.zero_row;
        self.columns.iter().enumerate().flat_map(move |(c, column)| {
            column.iter().enumerate().filter_map(move |(r, slot)| {
                slot.as_ref().map(|t| (c as i32 - zc, r as i32 - zr, t))
            })
        })
    }

    /// Number of populated slots.
    pub fn present_count(&self) -> usize {
        self.columns
            .iter()
            .map(|c| c.iter().filter(|t| t.is_some()).count())
            .sum()
    }

    /// Same geometry, every tile transformed by `f`.
    pub fn map<U>(&self, mut f: impl FnMut(&T) -> U) -> TileGrid<U> {
        TileGrid {
            geometry: self.geometry,
            columns: self
                .columns
                .iter()
                .map(|c| c.iter().map(|t| t.as_ref().map(&mut f)).collect())
                .collect(),
        }
    }

    /// Drop every tile and reset to zero rows/columns/offsets.
    pub fn clear(&mut self) {
        self.columns.clear();
        self.geometry = GridGeometry::default();
    }
}

/// `(prepend, append)` counts that make storage index `id` valid for an axis
/// of `count` slots, or `None` when the grown axis would overflow `i32`.
fn grown_extent(id: i64, count: i32) -> Option<(usize, usize)> {
    let count = count as i64;
    let (pre, app) = if id < 0 {
        (-id, 0)
    } else if id >= count {
        (0, id - count + 1)
    } else {
        (0, 0)
    };
    if count + pre + app > i32::MAX as i64 {
        return None;
    }
    Some((pre as usize, app as usize))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_grid() {
        let grid: TileGrid<u32> = TileGrid::new();
        assert!(grid.is_empty());
        assert_eq!(grid.bounding_rect(), Rect::new(0, 0, 0, 0));
        assert_eq!(grid.tile_at(0, 0), None);
        assert_eq!(grid.tile_at(-100, 7), None);
    }

    #[test]
    fn test_append_growth() {
        let mut grid: TileGrid<u32> = TileGrid::new();
        grid.stretch_to_include(2, 1);
        assert_eq!(grid.column_count(), 3);
        assert_eq!(grid.row_count(), 2);
        assert_eq!((grid.zero_column(), grid.zero_row()), (0, 0));
        assert_eq!(grid.bounding_rect(), Rect::new(0, 0, 3, 2));
    }

    #[test]
    fn test_prepend_keeps_existing_tiles() {
        // 10×10 px at tile size 4 → 3×3 tiles
        let mut grid: TileGrid<u32> = TileGrid::new();
        grid.stretch_to_include_rect(&Rect::new(0, 0, 3, 3));
        grid.set_tile(0, 0, Some(7));
        grid.set_tile(2, 2, Some(9));

        // pixel (-5, 2) lives in tile (-2, 0)
        grid.stretch_to_include(-2, 0);
        assert_eq!(grid.zero_column(), 2);
        assert_eq!(grid.column_count(), 5);
        assert_eq!(grid.tile_at(0, 0), Some(&7));
        assert_eq!(grid.tile_at(2, 2), Some(&9));
        assert_eq!(grid.tile_at(-2, 0), None);
        assert_eq!(grid.bounding_rect(), Rect::new(-2, 0, 5, 3));
    }

    #[test]
    fn test_growth_is_lossless_in_every_direction() {
        let mut grid: TileGrid<(i32, i32)> = TileGrid::new();
        let coords = [(0, 0), (-3, 1), (4, -2), (-1, -5), (6, 6), (-7, 3), (2, -9)];
        for (i, &(tx, ty)) in coords.iter().enumerate() {
            grid.set_tile(tx, ty, Some((tx, ty)));
            for &(px, py) in &coords[..=i] {
                assert_eq!(grid.tile_at(px, py), Some(&(px, py)));
            }
            assert!(grid.bounding_rect().contains_point(tx, ty));
        }
        assert_eq!(grid.present_count(), coords.len());
        let rect = grid.bounding_rect();
        assert_eq!(rect, Rect::new(-7, -9, 14, 16));
    }

    #[test]
    fn test_prepend_rows_on_empty_grid() {
        let mut grid: TileGrid<u8> = TileGrid::new();
        grid.stretch_to_include(-1, -3);
        assert_eq!(grid.zero_row(), 3);
        assert_eq!(grid.zero_column(), 1);
        assert_eq!(grid.row_count(), 3);
        assert_eq!(grid.column_count(), 1);
        grid.set_tile(-1, -3, Some(1));
        assert_eq!(grid.tile_at_index(0, 0).ok().flatten(), Some(&1));
    }

    #[test]
    fn test_index_access_out_of_bounds() {
        let mut grid: TileGrid<u8> = TileGrid::new();
        grid.stretch_to_include(1, 1);
        assert!(matches!(
            grid.tile_at_index(2, 0),
            Err(CacheError::OutOfBoundsAccess { column: 2, row: 0 })
        ));
        assert!(grid.set_tile_at_index(-1, 0, Some(1)).is_err());
        assert!(grid.set_tile_at_index(1, 1, Some(3)).is_ok());
        assert_eq!(grid.tile_at(1, 1), Some(&3));
    }

    #[test]
    fn test_iter_reports_tile_space() {
        let mut grid: TileGrid<u8> = TileGrid::new();
        grid.set_tile(-2, 3, Some(1));
        grid.set_tile(1, -1, Some(2));
        let mut seen: Vec<_> = grid.iter().map(|(x, y, v)| (x, y, *v)).collect();
        seen.sort();
        assert_eq!(seen, vec![(-2, 3, 1), (1, -1, 2)]);
    }

    #[test]
    fn test_from_columns_validates_shape() {
        let geometry = GridGeometry { row_count: 2, column_count: 1, zero_row: 0, zero_column: 0 };
        assert!(TileGrid::<u8>::from_columns(geometry, vec![vec![None, Some(1)]]).is_ok());
        assert!(TileGrid::<u8>::from_columns(geometry, vec![vec![None]]).is_err());
        assert!(TileGrid::<u8>::from_columns(geometry, vec![]).is_err());
    }

    #[test]
    fn test_clear_resets_geometry() {
        let mut grid: TileGrid<u8> = TileGrid::new();
        grid.set_tile(-4, -4, Some(1));
        grid.clear();
        assert_eq!(grid.geometry(), GridGeometry::default());
        assert_eq!(grid.tile_at(-4, -4), None);
        assert_eq!(grid.present_count(), 0);
    }

    #[test]
    fn test_extreme_coordinates_do_not_panic() {
        let mut grid: TileGrid<u8> = TileGrid::new();
        grid.stretch_to_include(-1, 0);
        assert_eq!(grid.tile_at(i32::MAX, 0), None);
        assert_eq!(grid.tile_at(0, i32::MAX), None);
        assert_eq!(grid.tile_at(i32::MIN, i32::MIN), None);

        let before = grid.geometry();
        assert!(!grid.stretch_to_include(i32::MAX, 0));
        assert_eq!(grid.set_tile(i32::MAX, 0, Some(1)), None);
        assert!(grid.tile_or_insert_with(i32::MAX, 0, || 2).is_none());
        assert_eq!(grid.geometry(), before);
        assert_eq!(grid.present_count(), 0);
    }

    #[test]
    fn test_validate_stored_geometry() {
        let ok = GridGeometry { row_count: 3, column_count: 2, zero_row: 3, zero_column: 0 };
        assert!(ok.validate_stored().is_ok());
        let bad_zero = GridGeometry { zero_row: 4, ..ok };
        assert!(bad_zero.validate_stored().is_err());
        let negative = GridGeometry { column_count: -1, zero_column: 0, ..ok };
        assert!(negative.validate_stored().is_err());
        let too_wide = GridGeometry { column_count: MAX_STORED_EDGE + 1, ..ok };
        assert!(too_wide.validate_stored().is_err());
        let too_many = GridGeometry { row_count: MAX_STORED_EDGE, column_count: MAX_STORED_EDGE, zero_row: 0, zero_column: 0 };
        assert!(too_many.validate_stored().is_err());
    }
}
