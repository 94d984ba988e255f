// ============================================================================
// DRAWABLE TILED SURFACE: raw paint buffer + cached tile images + offload
// ============================================================================

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};

use image::{Rgba, RgbaImage};

use crate::error::{CacheError, Result};
use crate::geometry::{PixelRect, tile_rect_to_pix_rect};
use crate::grid::TileGrid;
use crate::offload::{
    self, OffloadEvent, OffloadKind, OffloadMessage, OffloadPayload, OffloadState, OffloadTicket,
};
use crate::raw::{AutoTiledSurface, RawSurface};
use crate::regen::{TileImage, TileRegenerator};
use crate::render::{PaintParams, TileCanvas, TileRenderer};
use crate::settings::CacheSettings;

/// A paintable region: the authoritative raw surface plus the display tiles
/// derived from it.
///
/// The interactive thread owns every call.  Regeneration fans out over the
/// rayon pool but returns before the call does; offload tasks run in the
/// background and land through [`poll_offload`](Self::poll_offload) or
/// [`wait_offload`](Self::wait_offload).
///
/// While a save or load is in flight, paint, regenerate and draw calls
/// return [`CacheError::SurfaceBusy`].
pub struct DrawableTiledSurface<S: RawSurface = AutoTiledSurface> {
    raw: S,
    images: TileGrid<TileImage>,
    regenerator: TileRegenerator,
    renderer: TileRenderer,
    offload_dir: PathBuf,
    state: OffloadState,
    pending: Option<OffloadTicket>,
    next_ticket_id: u64,
    tx: Sender<OffloadMessage>,
    rx: Receiver<OffloadMessage>,
}

impl DrawableTiledSurface<AutoTiledSurface> {
    /// Empty surface backed by a fresh [`AutoTiledSurface`].
    pub fn new(settings: &CacheSettings) -> Self {
        Self::with_raw(AutoTiledSurface::new(settings.tile_size), settings)
    }

    /// Rebuild a surface from a raw stream written by
    /// [`write_to`](Self::write_to); every image tile is regenerated.
    pub fn read_from<R: std::io::Read>(reader: R, settings: &CacheSettings) -> Result<Self> {
        let raw = AutoTiledSurface::read_from(reader)?;
        let mut surface = Self::with_raw(raw, settings);
        surface.regenerate_all()?;
        Ok(surface)
    }

    /// Persist the raw surface.  Image tiles are derived data and are not
    /// written.
    pub fn write_to<W: std::io::Write>(&self, writer: W) -> Result<()> {
        self.raw.write_to(writer)
    }

    // ---- paint helpers ------------------------------------------------------

    pub fn put_pixel(&mut self, x: i32, y: i32, pixel: Rgba<u16>) -> Result<PixelRect> {
        self.paint(|raw| raw.put_pixel(x, y, pixel))
    }

    pub fn fill_rect(&mut self, rect: &PixelRect, color: Rgba<u16>) -> Result<PixelRect> {
        self.paint(|raw| raw.fill_rect(rect, color))
    }

    pub fn blit_rgba8(&mut self, x: i32, y: i32, image: &RgbaImage) -> Result<PixelRect> {
        self.paint(|raw| raw.blit_rgba8(x, y, image))
    }
}

impl<S: RawSurface> DrawableTiledSurface<S> {
    /// Wrap an existing raw surface.  No tiles are generated until the first
    /// [`pixel_rect_changed`](Self::pixel_rect_changed) or
    /// [`regenerate_all`](Self::regenerate_all).
    pub fn with_raw(raw: S, settings: &CacheSettings) -> Self {
        let (tx, rx) = mpsc::channel();
        let tile_size = raw.tile_size();
        Self {
            raw,
            images: TileGrid::new(),
            regenerator: TileRegenerator::new(settings.parallel_threshold),
            renderer: TileRenderer::new(tile_size),
            offload_dir: settings.offload_dir(),
            state: OffloadState::Idle,
            pending: None,
            next_ticket_id: 1,
            tx,
            rx,
        }
    }

    pub fn raw(&self) -> &S {
        &self.raw
    }

    pub fn images(&self) -> &TileGrid<TileImage> {
        &self.images
    }

    pub fn tile_size(&self) -> u32 {
        self.raw.tile_size()
    }

    pub fn offload_state(&self) -> &OffloadState {
        &self.state
    }

    pub fn is_offloaded(&self) -> bool {
        matches!(self.state, OffloadState::Saved(_))
    }

    pub fn is_busy(&self) -> bool {
        self.state.is_busy()
    }

    fn ensure_not_busy(&self) -> Result<()> {
        if self.state.is_busy() { Err(CacheError::SurfaceBusy) } else { Ok(()) }
    }

    // ---- mutation -----------------------------------------------------------

    /// Mutate the raw surface and regenerate the rectangle the closure
    /// reports as changed.
    pub fn paint<F>(&mut self, f: F) -> Result<PixelRect>
    where
        F: FnOnce(&mut S) -> PixelRect,
    {
        self.ensure_not_busy()?;
        let changed = f(&mut self.raw);
        self.pixel_rect_changed(&changed)?;
        Ok(changed)
    }

    /// Notification from the paint layer that `rect` changed.  Regenerates
    /// the covering tiles and returns how many were recomputed.
    ///
    /// A surface whose images were offloaded drops its temp file and
    /// rebuilds every tile, since the in-memory images were released.
    pub fn pixel_rect_changed(&mut self, rect: &PixelRect) -> Result<usize> {
        self.ensure_not_busy()?;
        if let OffloadState::Saved(file) = std::mem::take(&mut self.state) {
            log_info!(
                "Surface dirtied while offloaded, releasing {}",
                file.path().display()
            );
            drop(file);
            return self.regenerate_all();
        }
        if rect.is_empty() {
            return Ok(0);
        }
        Ok(self.regenerator.regenerate(&self.raw, &mut self.images, rect))
    }

    /// Regenerate every tile the raw surface spans.
    pub fn regenerate_all(&mut self) -> Result<usize> {
        self.ensure_not_busy()?;
        if let OffloadState::Saved(_) = self.state {
            self.state = OffloadState::Idle;
        }
        let rect = self.raw.raw_bounding_rect();
        Ok(self.regenerator.regenerate_tiles(&self.raw, &mut self.images, &rect))
    }

    // ---- rendering ----------------------------------------------------------

    /// Draw the tiles overlapping `clip` (surface pixel space, `None` = all)
    /// with the surface origin at `dst` on `canvas`.
    pub fn draw_on_canvas<C: TileCanvas + ?Sized>(
        &self,
        canvas: &mut C,
        dst: (i32, i32),
        clip: Option<&PixelRect>,
        paint: Option<&PaintParams>,
    ) -> Result<usize> {
        match self.state {
            OffloadState::Idle => {}
            OffloadState::Saved(_) => return Err(CacheError::SurfaceOffloaded),
            OffloadState::Saving | OffloadState::Loading(_) => return Err(CacheError::SurfaceBusy),
        }
        Ok(self.renderer.draw_on_canvas(&self.images, canvas, dst, clip, paint))
    }

    /// Pixel rectangle covered by the image grid.
    pub fn pixel_bounding_rect(&self) -> PixelRect {
        tile_rect_to_pix_rect(&self.images.bounding_rect(), self.tile_size())
    }

    pub fn width(&self) -> i32 {
        self.pixel_bounding_rect().width
    }

    pub fn height(&self) -> i32 {
        self.pixel_bounding_rect().height
    }

    /// Bytes held by in-memory tile images.
    pub fn byte_count(&self) -> usize {
        self.images
            .iter()
            .map(|(_, _, img)| img.as_raw().len())
            .sum()
    }

    // ---- offload ------------------------------------------------------------

    fn next_ticket(&mut self, kind: OffloadKind) -> OffloadTicket {
        let ticket = OffloadTicket {
            id: self.next_ticket_id,
            kind,
        };
        self.next_ticket_id += 1;
        self.pending = Some(ticket);
        ticket
    }

    /// Write every tile image to a new temp file in the background.  Once the
    /// save lands the in-memory images are released.
    pub fn schedule_save(&mut self) -> Result<OffloadTicket> {
        match self.state {
            OffloadState::Idle => {}
            OffloadState::Saved(_) => return Err(CacheError::SurfaceOffloaded),
            OffloadState::Saving | OffloadState::Loading(_) => return Err(CacheError::SurfaceBusy),
        }
        let ticket = self.next_ticket(OffloadKind::Save);
        let snapshot = self.images.clone();
        log_info!(
            "Offload #{}: saving {} tiles ({} bytes)",
            ticket.id,
            snapshot.present_count(),
            self.byte_count()
        );
        self.state = OffloadState::Saving;
        offload::spawn_save(ticket, snapshot, self.offload_dir.clone(), self.tx.clone());
        Ok(ticket)
    }

    /// Read the offloaded tiles back in the background.
    pub fn schedule_load(&mut self) -> Result<OffloadTicket> {
        let file = match &self.state {
            OffloadState::Saved(file) => Arc::clone(file),
            OffloadState::Idle => return Err(CacheError::NotOffloaded),
            OffloadState::Saving | OffloadState::Loading(_) => return Err(CacheError::SurfaceBusy),
        };
        let ticket = self.next_ticket(OffloadKind::Load);
        log_info!("Offload #{}: loading {}", ticket.id, file.path().display());
        self.state = OffloadState::Loading(Arc::clone(&file));
        offload::spawn_load(ticket, file, self.tx.clone());
        Ok(ticket)
    }

    /// Apply every finished task without blocking.
    pub fn poll_offload(&mut self) -> Vec<OffloadEvent> {
        let mut events = Vec::new();
        while let Ok(msg) = self.rx.try_recv() {
            if let Some(event) = self.apply(msg) {
                events.push(event);
            }
        }
        events
    }

    /// Block until the in-flight task finishes.  `None` if nothing is pending.
    pub fn wait_offload(&mut self) -> Option<OffloadEvent> {
        while self.pending.is_some() {
            let msg = self.rx.recv().ok()?;
            if let Some(event) = self.apply(msg) {
                return Some(event);
            }
        }
        None
    }

    fn apply(&mut self, msg: OffloadMessage) -> Option<OffloadEvent> {
        let OffloadMessage { ticket, result } = msg;
        if self.pending != Some(ticket) {
            log_warn!("Offload #{}: stale completion ignored", ticket.id);
            return None;
        }
        self.pending = None;

        let state = std::mem::take(&mut self.state);
        let result = match (state, result) {
            (OffloadState::Saving, Ok(OffloadPayload::Saved(file))) => {
                self.images = TileGrid::with_geometry(self.images.geometry());
                self.state = OffloadState::Saved(file);
                Ok(())
            }
            (OffloadState::Loading(_), Ok(OffloadPayload::Loaded(grid))) => {
                self.images = grid;
                self.state = OffloadState::Idle;
                Ok(())
            }
            (OffloadState::Loading(file), Err(e)) => {
                self.state = OffloadState::Saved(file);
                Err(e)
            }
            (_, Err(e)) => {
                self.state = OffloadState::Idle;
                Err(e)
            }
            (state, Ok(_)) => {
                log_err!("Offload #{}: completion does not match state {:?}", ticket.id, state);
                self.state = state;
                Err(CacheError::SurfaceBusy)
            }
        };
        Some(OffloadEvent { ticket, result })
    }
}

impl<S: RawSurface + Clone> DrawableTiledSurface<S> {
    /// Independent copy: raw and image tiles are duplicated, no pixel buffer
    /// is shared with `self`.
    pub fn deep_copy(&self, settings: &CacheSettings) -> Result<Self> {
        match self.state {
            OffloadState::Idle => {}
            OffloadState::Saved(_) => return Err(CacheError::SurfaceOffloaded),
            OffloadState::Saving | OffloadState::Loading(_) => return Err(CacheError::SurfaceBusy),
        }
        let mut copy = Self::with_raw(self.raw.clone(), settings);
        copy.images = self.images.map(|img| Arc::new(RgbaImage::clone(img)));
        Ok(copy)
    }
}

impl<S: RawSurface> Drop for DrawableTiledSurface<S> {
    fn drop(&mut self) {
        if let Some(ticket) = self.pending {
            log_info!("Offload #{}: surface dropped while {:?} in flight", ticket.id, ticket.kind);
        }
    }
}
