// ============================================================================
// DISK OFFLOAD: tile-cache file codec and background save/load tasks
// ============================================================================
//
// File layout:
//
//   i32 LE  row_count
//   i32 LE  column_count
//   i32 LE  zero_row
//   i32 LE  zero_column
//   column_count × row_count × bincode(Option<TileRecord>)   (column-major)
//
// Save and load run on the rayon pool and report back over an mpsc channel
// owned by the surface.  Each task works on its own data: save on a
// snapshot of `Arc` tile handles, load on a grid it builds privately.
// ============================================================================

use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::Sender;

use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};
use crate::grid::{GridGeometry, TileGrid};
use crate::regen::TileImage;

// ============================================================================
// TEMP FILE HANDLE
// ============================================================================

/// Owns a temporary tile file; the file is removed when the handle drops.
/// Shared as `Arc<TmpFileHandle>` so an in-flight load keeps it alive.
#[derive(Debug)]
pub struct TmpFileHandle {
    path: PathBuf,
}

impl TmpFileHandle {
    /// Reserve a fresh `tilecache-<uuid>.tiles` path in `dir`.
    pub fn new_in(dir: &Path) -> Self {
        let name = format!("tilecache-{}.tiles", uuid::Uuid::new_v4());
        Self { path: dir.join(name) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TmpFileHandle {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => log_warn!("Offload: failed to remove {}: {}", self.path.display(), e),
        }
    }
}

// ============================================================================
// CODEC
// ============================================================================

/// One serialized tile image.
#[derive(Serialize, Deserialize)]
struct TileRecord {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

/// Borrowed form of [`TileRecord`]; serializes to the same bytes.
#[derive(Serialize)]
struct TileRecordRef<'a> {
    width: u32,
    height: u32,
    pixels: &'a [u8],
}

/// Write a whole image grid in the tile-cache format.
pub fn write_tile_grid<W: Write>(mut writer: W, grid: &TileGrid<TileImage>) -> Result<()> {
    let g = grid.geometry();
    for v in [g.row_count, g.column_count, g.zero_row, g.zero_column] {
        writer.write_all(&v.to_le_bytes())?;
    }
    for column in grid.columns() {
        for slot in column {
            let record = slot.as_ref().map(|img| TileRecordRef {
                width: img.width(),
                height: img.height(),
                pixels: img.as_raw(),
            });
            bincode::serialize_into(&mut writer, &record)?;
        }
    }
    writer.flush()?;
    Ok(())
}

/// Read a grid written by [`write_tile_grid`].
///
/// A short header, a short or overlong tile stream and malformed tile
/// records all map to [`CacheError::CorruptCacheFile`]; no partial grid is
/// ever returned.
pub fn read_tile_grid<R: Read>(mut reader: R) -> Result<TileGrid<TileImage>> {
    let geometry = read_header(&mut reader)?;

    let rows = geometry.row_count as usize;
    let mut columns = Vec::with_capacity(geometry.column_count as usize);
    for cx in 0..geometry.column_count {
        let mut column = Vec::with_capacity(rows);
        for ry in 0..geometry.row_count {
            let record: Option<TileRecord> =
                bincode::deserialize_from(&mut reader).map_err(|e| tile_error(cx, ry, e))?;
            column.push(match record {
                Some(r) => Some(Arc::new(record_to_image(r, cx, ry)?)),
                None => None,
            });
        }
        columns.push(column);
    }

    let mut probe = [0u8; 1];
    loop {
        match reader.read(&mut probe) {
            Ok(0) => break,
            Ok(_) => {
                return Err(CacheError::CorruptCacheFile(
                    "trailing bytes after last tile".to_string(),
                ));
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }

    TileGrid::from_columns(geometry, columns)
}

fn read_header<R: Read>(reader: &mut R) -> Result<GridGeometry> {
    let mut fields = [0i32; 4];
    for field in fields.iter_mut() {
        let mut buf = [0u8; 4];
        reader.read_exact(&mut buf).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => CacheError::CorruptCacheFile("truncated header".to_string()),
            _ => CacheError::Offload(e),
        })?;
        *field = i32::from_le_bytes(buf);
    }
    let geometry = GridGeometry {
        row_count: fields[0],
        column_count: fields[1],
        zero_row: fields[2],
        zero_column: fields[3],
    };

    geometry
        .validate_stored()
        .map_err(|msg| CacheError::CorruptCacheFile(format!("header: {}", msg)))?;
    Ok(geometry)
}

fn tile_error(column: i32, row: i32, e: Box<bincode::ErrorKind>) -> CacheError {
    match *e {
        bincode::ErrorKind::Io(io) if io.kind() != ErrorKind::UnexpectedEof => CacheError::Offload(io),
        other => CacheError::CorruptCacheFile(format!("tile slot ({}, {}): {}", column, row, other)),
    }
}

fn record_to_image(record: TileRecord, column: i32, row: i32) -> Result<RgbaImage> {
    let TileRecord { width, height, pixels } = record;
    let expected = width as usize * height as usize * 4;
    if width == 0 || height == 0 || pixels.len() != expected {
        return Err(CacheError::CorruptCacheFile(format!(
            "tile slot ({}, {}): {}x{} with {} bytes",
            column,
            row,
            width,
            height,
            pixels.len()
        )));
    }
    RgbaImage::from_raw(width, height, pixels).ok_or_else(|| {
        CacheError::CorruptCacheFile(format!("tile slot ({}, {}): bad pixel buffer", column, row))
    })
}

/// Save `grid` into a new temp file under `dir`.  On failure the partial
/// file is removed with the handle.
pub fn save_grid(grid: &TileGrid<TileImage>, dir: &Path) -> Result<TmpFileHandle> {
    std::fs::create_dir_all(dir)?;
    let handle = TmpFileHandle::new_in(dir);
    let file = File::create(handle.path())?;
    write_tile_grid(BufWriter::new(file), grid)?;
    Ok(handle)
}

/// Load a grid previously written by [`save_grid`].
pub fn load_grid(path: &Path) -> Result<TileGrid<TileImage>> {
    let file = File::open(path)?;
    read_tile_grid(BufReader::new(file))
}

// ============================================================================
// TASKS
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OffloadKind {
    Save,
    Load,
}

/// Handle returned when a task is scheduled; matches the later event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OffloadTicket {
    pub id: u64,
    pub kind: OffloadKind,
}

/// Per-surface offload state.
#[derive(Clone, Debug, Default)]
pub enum OffloadState {
    #[default]
    Idle,
    Saving,
    /// Tile images live only in this file.
    Saved(Arc<TmpFileHandle>),
    /// Loading from this file; it stays referenced until the load lands.
    Loading(Arc<TmpFileHandle>),
}

impl OffloadState {
    pub fn is_busy(&self) -> bool {
        matches!(self, OffloadState::Saving | OffloadState::Loading(_))
    }
}

/// What a finished task hands back to its surface.
pub(crate) enum OffloadPayload {
    Saved(Arc<TmpFileHandle>),
    Loaded(TileGrid<TileImage>),
}

pub(crate) struct OffloadMessage {
    pub ticket: OffloadTicket,
    pub result: Result<OffloadPayload>,
}

/// Completion report delivered by `poll_offload` / `wait_offload`.
#[derive(Debug)]
pub struct OffloadEvent {
    pub ticket: OffloadTicket,
    pub result: Result<()>,
}

/// Save `snapshot` on the rayon pool.  A closed channel means the surface
/// is gone; the new file is then dropped (and deleted) with the message.
pub(crate) fn spawn_save(
    ticket: OffloadTicket,
    snapshot: TileGrid<TileImage>,
    dir: PathBuf,
    tx: Sender<OffloadMessage>,
) {
    rayon::spawn(move || {
        let result = save_grid(&snapshot, &dir);
        match &result {
            Ok(handle) => log_info!(
                "Offload #{}: saved {} tiles to {}",
                ticket.id,
                snapshot.present_count(),
                handle.path().display()
            ),
            Err(e) => log_err!("Offload #{}: save failed: {}", ticket.id, e),
        }
        let result = result.map(|h| OffloadPayload::Saved(Arc::new(h)));
        if tx.send(OffloadMessage { ticket, result }).is_err() {
            log_info!("Offload #{}: surface dropped, discarding result", ticket.id);
        }
    });
}

/// Load `file` on the rayon pool into a private grid.
pub(crate) fn spawn_load(ticket: OffloadTicket, file: Arc<TmpFileHandle>, tx: Sender<OffloadMessage>) {
    rayon::spawn(move || {
        let result = load_grid(file.path());
        match &result {
            Ok(grid) => log_info!(
                "Offload #{}: loaded {} tiles from {}",
                ticket.id,
                grid.present_count(),
                file.path().display()
            ),
            Err(e) => log_err!("Offload #{}: load failed: {}", ticket.id, e),
        }
        // The surface must hold the last reference once it sees the result.
        drop(file);
        let result = result.map(OffloadPayload::Loaded);
        if tx.send(OffloadMessage { ticket, result }).is_err() {
            log_info!("Offload #{}: surface dropped, discarding result", ticket.id);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::MAX_STORED_EDGE;
    use image::Rgba;
    use std::io::Cursor;

    fn tile(ts: u32, seed: u8) -> TileImage {
        Arc::new(RgbaImage::from_fn(ts, ts, |x, y| {
            Rgba([seed, x as u8, y as u8, 255 - seed])
        }))
    }

    fn encode(grid: &TileGrid<TileImage>) -> Vec<u8> {
        let mut buf = Vec::new();
        write_tile_grid(&mut buf, grid).unwrap();
        buf
    }

    fn assert_same(a: &TileGrid<TileImage>, b: &TileGrid<TileImage>) {
        assert_eq!(a.geometry(), b.geometry());
        for (tx, ty) in a.bounding_rect().cells() {
            let pa = a.tile_at(tx, ty).map(|t| t.as_raw().clone());
            let pb = b.tile_at(tx, ty).map(|t| t.as_raw().clone());
            assert_eq!(pa, pb, "tile ({}, {})", tx, ty);
        }
    }

    #[test]
    fn test_empty_grid_round_trip() {
        let grid: TileGrid<TileImage> = TileGrid::new();
        let bytes = encode(&grid);
        assert_eq!(bytes, vec![0u8; 16]);
        let back = read_tile_grid(Cursor::new(bytes)).unwrap();
        assert_same(&grid, &back);
    }

    #[test]
    fn test_two_by_two_with_hole() {
        let mut grid = TileGrid::new();
        grid.set_tile(-1, -1, Some(tile(4, 10)));
        grid.set_tile(0, -1, Some(tile(4, 20)));
        grid.set_tile(0, 0, Some(tile(4, 30)));
        grid.stretch_to_include(-1, 0);
        assert_eq!(grid.present_count(), 3);

        let bytes = encode(&grid);
        assert_eq!(&bytes[..16], &[2, 0, 0, 0, 2, 0, 0, 0, 1, 0, 0, 0, 1, 0, 0, 0]);
        let back = read_tile_grid(Cursor::new(bytes)).unwrap();
        assert_same(&grid, &back);
        assert!(back.tile_at(-1, 0).is_none());
    }

    #[test]
    fn test_header_only_geometry_round_trip() {
        let mut grid: TileGrid<TileImage> = TileGrid::new();
        grid.stretch_to_include(-3, 2);
        let back = read_tile_grid(Cursor::new(encode(&grid))).unwrap();
        assert_same(&grid, &back);
        assert_eq!(back.present_count(), 0);
    }

    #[test]
    fn test_truncated_header_is_corrupt() {
        let err = read_tile_grid(Cursor::new(vec![1, 0, 0, 0, 1])).unwrap_err();
        assert!(matches!(err, CacheError::CorruptCacheFile(_)));
    }

    #[test]
    fn test_invalid_header_is_corrupt() {
        let mut bytes = Vec::new();
        for v in [1i32, 1, 5, 0] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let err = read_tile_grid(Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, CacheError::CorruptCacheFile(_)));

        let mut bytes = Vec::new();
        for v in [MAX_STORED_EDGE + 1, 1, 0, 0] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        assert!(matches!(
            read_tile_grid(Cursor::new(bytes)),
            Err(CacheError::CorruptCacheFile(_))
        ));

        let mut bytes = Vec::new();
        for v in [-1i32, 1, 0, 0] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        assert!(matches!(
            read_tile_grid(Cursor::new(bytes)),
            Err(CacheError::CorruptCacheFile(_))
        ));
    }

    #[test]
    fn test_short_tile_stream_is_corrupt() {
        let mut grid = TileGrid::new();
        grid.set_tile(0, 0, Some(tile(4, 1)));
        grid.set_tile(1, 0, Some(tile(4, 2)));
        let mut bytes = encode(&grid);
        bytes.truncate(bytes.len() - 10);
        assert!(matches!(
            read_tile_grid(Cursor::new(bytes)),
            Err(CacheError::CorruptCacheFile(_))
        ));
    }

    #[test]
    fn test_trailing_bytes_are_corrupt() {
        let mut grid = TileGrid::new();
        grid.set_tile(0, 0, Some(tile(4, 1)));
        let mut bytes = encode(&grid);
        bytes.push(0);
        assert!(matches!(
            read_tile_grid(Cursor::new(bytes)),
            Err(CacheError::CorruptCacheFile(_))
        ));
    }

    #[test]
    fn test_mismatched_record_is_corrupt() {
        let mut bytes = Vec::new();
        for v in [1i32, 1, 0, 0] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        let bad = Some(TileRecord { width: 4, height: 4, pixels: vec![0; 10] });
        bincode::serialize_into(&mut bytes, &bad).unwrap();
        assert!(matches!(
            read_tile_grid(Cursor::new(bytes)),
            Err(CacheError::CorruptCacheFile(_))
        ));
    }

    #[test]
    fn test_tmp_file_removed_on_drop() {
        let mut grid = TileGrid::new();
        grid.set_tile(2, 3, Some(tile(8, 7)));
        let handle = save_grid(&grid, &std::env::temp_dir()).unwrap();
        let path = handle.path().to_path_buf();
        assert!(path.exists());
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("tilecache-"));

        let back = load_grid(&path).unwrap();
        assert_same(&grid, &back);

        drop(handle);
        assert!(!path.exists());
    }

    #[test]
    fn test_spawned_save_then_load() {
        let mut grid = TileGrid::new();
        grid.set_tile(-1, 0, Some(tile(4, 3)));
        let (tx, rx) = std::sync::mpsc::channel();

        let save = OffloadTicket { id: 1, kind: OffloadKind::Save };
        spawn_save(save, grid.clone(), std::env::temp_dir(), tx.clone());
        let msg = rx.recv().unwrap();
        assert_eq!(msg.ticket, save);
        let Ok(OffloadPayload::Saved(file)) = msg.result else { panic!("save failed") };

        let load = OffloadTicket { id: 2, kind: OffloadKind::Load };
        spawn_load(load, file.clone(), tx);
        let msg = rx.recv().unwrap();
        assert_eq!(msg.ticket, load);
        let Ok(OffloadPayload::Loaded(back)) = msg.result else { panic!("load failed") };
        assert_same(&grid, &back);

        // the worker has let go of its reference by the time the result arrives
        assert_eq!(Arc::strong_count(&file), 1);
        let path = file.path().to_path_buf();
        drop(file);
        assert!(!path.exists());
    }

    #[test]
    fn test_tickets_key_a_set() {
        let mut seen = std::collections::HashSet::new();
        assert!(seen.insert(OffloadTicket { id: 1, kind: OffloadKind::Save }));
        assert!(seen.insert(OffloadTicket { id: 1, kind: OffloadKind::Load }));
        assert!(!seen.insert(OffloadTicket { id: 1, kind: OffloadKind::Save }));
    }
}
