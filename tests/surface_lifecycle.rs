use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::{Rgba, RgbaImage};
use tilecache::offload::{OffloadKind, OffloadState};
use tilecache::{CacheError, CacheSettings, DrawableTiledSurface, Rect};

fn settings(tile_size: u32) -> CacheSettings {
    CacheSettings {
        tile_size,
        parallel_threshold: 2,
        ..CacheSettings::default()
    }
}

fn gradient(w: u32, h: u32) -> RgbaImage {
    RgbaImage::from_fn(w, h, |x, y| {
        let a = if (x + y) % 7 == 0 { 0 } else { 255 };
        Rgba([(x * 9) as u8, (y * 5) as u8, ((x ^ y) * 3) as u8, a])
    })
}

fn render(surface: &DrawableTiledSurface, clip: &Rect) -> RgbaImage {
    let mut target = RgbaImage::new(clip.width as u32, clip.height as u32);
    surface
        .draw_on_canvas(&mut target, (-clip.x, -clip.y), Some(clip), None)
        .unwrap();
    target
}

#[test]
fn test_paint_draw_offload_reload() {
    let mut surface = DrawableTiledSurface::new(&settings(16));
    surface.blit_rgba8(-40, -8, &gradient(70, 30)).unwrap();
    surface.blit_rgba8(100, 50, &gradient(5, 5)).unwrap();

    let clip = surface.pixel_bounding_rect();
    assert!(clip.contains_rect(&Rect::new(-40, -8, 70, 30)));
    let before = render(&surface, &clip);
    let tiles_before = surface.images().present_count();
    let geometry_before = surface.images().geometry();

    // Pixels outside the painted images stay transparent.
    assert_eq!(*before.get_pixel((60 - clip.x) as u32, (0 - clip.y) as u32), Rgba([0, 0, 0, 0]));
    // Painted pixel lands where it was painted.
    let src = gradient(70, 30);
    let p = src.get_pixel(3, 5);
    assert_eq!(before.get_pixel((-37 - clip.x) as u32, (-3 - clip.y) as u32), p);

    let save = surface.schedule_save().unwrap();
    assert_eq!(save.kind, OffloadKind::Save);
    let event = surface.wait_offload().unwrap();
    assert_eq!(event.ticket, save);
    event.result.unwrap();
    assert!(surface.is_offloaded());
    assert_eq!(surface.byte_count(), 0);
    assert_eq!(surface.images().geometry(), geometry_before);
    assert_eq!(surface.pixel_bounding_rect(), clip);

    let load = surface.schedule_load().unwrap();
    assert!(matches!(surface.offload_state(), OffloadState::Loading(_)));
    let event = surface.wait_offload().unwrap();
    assert_eq!(event.ticket, load);
    event.result.unwrap();
    assert!(matches!(surface.offload_state(), OffloadState::Idle));
    assert_eq!(surface.images().present_count(), tiles_before);
    assert_eq!(surface.images().geometry(), geometry_before);

    assert_eq!(render(&surface, &clip), before);
}

#[test]
fn test_reload_releases_temp_file() {
    let mut surface = DrawableTiledSurface::new(&settings(8));
    surface.fill_rect(&Rect::new(0, 0, 20, 20), Rgba([1, 2, 3, 0xffff])).unwrap();
    surface.schedule_save().unwrap();
    surface.wait_offload().unwrap().result.unwrap();
    let path = match surface.offload_state() {
        OffloadState::Saved(file) => file.path().to_path_buf(),
        other => panic!("unexpected state {:?}", other),
    };
    assert!(path.exists());

    surface.schedule_load().unwrap();
    surface.wait_offload().unwrap().result.unwrap();
    assert!(!path.exists());
}

#[test]
fn test_save_failure_keeps_tiles() {
    let blocker = std::env::temp_dir().join(format!("tilecache-blocker-{}", std::process::id()));
    std::fs::write(&blocker, b"not a directory").unwrap();
    let mut s = settings(8);
    // A regular file where the offload directory should be makes every save fail.
    s.offload_dir = Some(blocker.join("sub"));

    let mut surface = DrawableTiledSurface::new(&s);
    surface.put_pixel(3, 3, Rgba([0xffff, 0, 0, 0xffff])).unwrap();
    let bytes = surface.byte_count();

    surface.schedule_save().unwrap();
    let event = surface.wait_offload().unwrap();
    assert!(matches!(event.result, Err(CacheError::Offload(_))));
    assert!(matches!(surface.offload_state(), OffloadState::Idle));
    assert_eq!(surface.byte_count(), bytes);
    assert!(matches!(surface.schedule_load(), Err(CacheError::NotOffloaded)));

    let mut target = RgbaImage::new(8, 8);
    assert_eq!(surface.draw_on_canvas(&mut target, (0, 0), None, None).unwrap(), 1);
    assert_eq!(*target.get_pixel(3, 3), Rgba([255, 0, 0, 255]));

    let _ = std::fs::remove_file(&blocker);
}

/// Fresh, empty offload directory private to one test.
fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("tilecache-{}-{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn tile_files(dir: &Path) -> Vec<PathBuf> {
    let pattern = dir.join("tilecache-*.tiles");
    glob::glob(&pattern.to_string_lossy())
        .unwrap()
        .filter_map(|p| p.ok())
        .collect()
}

#[test]
fn test_dropped_surface_cancels_task() {
    let dir = scratch_dir("drop");
    let mut s = settings(8);
    s.offload_dir = Some(dir.clone());

    let mut surface = DrawableTiledSurface::new(&s);
    surface.fill_rect(&Rect::new(-30, -30, 60, 60), Rgba([9, 9, 9, 0xffff])).unwrap();
    surface.schedule_save().unwrap();
    drop(surface);

    // The orphaned save finishes on the pool; its file must not outlive it.
    let start = Instant::now();
    while start.elapsed() < Duration::from_secs(10) {
        if tile_files(&dir).is_empty() && start.elapsed() > Duration::from_millis(500) {
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(tile_files(&dir), Vec::<PathBuf>::new());
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_corrupt_file_keeps_surface_offloaded() {
    let dir = scratch_dir("corrupt");
    let mut s = settings(8);
    s.offload_dir = Some(dir.clone());

    let mut surface = DrawableTiledSurface::new(&s);
    surface.blit_rgba8(-5, -5, &gradient(20, 20)).unwrap();
    let clip = surface.pixel_bounding_rect();
    let before = render(&surface, &clip);

    surface.schedule_save().unwrap();
    surface.wait_offload().unwrap().result.unwrap();
    let path = match surface.offload_state() {
        OffloadState::Saved(file) => file.path().to_path_buf(),
        other => panic!("unexpected state {:?}", other),
    };
    let bytes = std::fs::read(&path).unwrap();
    std::fs::write(&path, &bytes[..20]).unwrap();

    surface.schedule_load().unwrap();
    let event = surface.wait_offload().unwrap();
    assert!(matches!(event.result, Err(CacheError::CorruptCacheFile(_))));
    assert!(surface.is_offloaded());
    assert!(path.exists());

    // The file stays owned, so the load can be retried.
    std::fs::write(&path, &bytes).unwrap();
    surface.schedule_load().unwrap();
    surface.wait_offload().unwrap().result.unwrap();
    assert!(!surface.is_offloaded());
    assert!(!path.exists());
    assert_eq!(render(&surface, &clip), before);
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_independent_surfaces_offload_concurrently() {
    let mut a = DrawableTiledSurface::new(&settings(8));
    let mut b = DrawableTiledSurface::new(&settings(8));
    a.put_pixel(0, 0, Rgba([0xffff, 0, 0, 0xffff])).unwrap();
    b.put_pixel(-9, -9, Rgba([0, 0xffff, 0, 0xffff])).unwrap();

    a.schedule_save().unwrap();
    b.schedule_save().unwrap();
    a.wait_offload().unwrap().result.unwrap();
    b.wait_offload().unwrap().result.unwrap();
    assert!(a.is_offloaded() && b.is_offloaded());

    // One surface loading does not block the other.
    a.schedule_load().unwrap();
    assert!(a.is_busy());
    assert!(!b.is_busy());
    a.wait_offload().unwrap().result.unwrap();

    let mut target = RgbaImage::new(8, 8);
    a.draw_on_canvas(&mut target, (0, 0), None, None).unwrap();
    assert_eq!(*target.get_pixel(0, 0), Rgba([255, 0, 0, 255]));
}

#[test]
fn test_poll_offload_drains_completion() {
    let mut surface = DrawableTiledSurface::new(&settings(8));
    surface.put_pixel(1, 1, Rgba([5, 5, 5, 5])).unwrap();
    let ticket = surface.schedule_save().unwrap();

    let mut events = Vec::new();
    while events.is_empty() {
        events = surface.poll_offload();
        std::thread::yield_now();
    }
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].ticket, ticket);
    assert!(events[0].result.is_ok());
    assert!(surface.poll_offload().is_empty());
}

#[test]
fn test_container_stream_round_trip() {
    let mut surface = DrawableTiledSurface::new(&settings(16));
    surface.blit_rgba8(-20, 3, &gradient(40, 40)).unwrap();
    let mut buf = Vec::new();
    surface.write_to(&mut buf).unwrap();

    let back = DrawableTiledSurface::read_from(buf.as_slice(), &settings(16)).unwrap();
    let clip = surface.pixel_bounding_rect();
    assert_eq!(back.pixel_bounding_rect(), clip);
    assert_eq!(render(&back, &clip), render(&surface, &clip));

    let copy = back.deep_copy(&settings(16)).unwrap();
    for (tx, ty, img) in copy.images().iter() {
        let orig = back.images().tile_at(tx, ty).unwrap();
        assert!(!Arc::ptr_eq(img, orig));
    }
}
