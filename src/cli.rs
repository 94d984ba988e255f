// ============================================================================
// TileCache CLI: paint images onto a tiled surface and render a clip
// ============================================================================
//
// Usage examples:
//   tilecache -i photo.png -o out.png
//   tilecache -i a.png b.png --origin -300,40 --clip -300,0,800,600 -o view.png
//   tilecache -i "tiles/*.png" --offload --gpu -o view.png --verbose
//   tilecache -i photo.png --save-raw photo.tcr -o out.png
//
// Inputs are painted in order, each one at the running origin shifted by
// --step.  The image grid can be round-tripped through the disk offload
// file before drawing.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use image::{Rgba, RgbaImage};

use tilecache::geometry::{PixelRect, Rect};
use tilecache::gpu::GpuTileRenderer;
use tilecache::render::{PaintParams, TileBlend};
use tilecache::settings::{CacheSettings, MAX_TILE_SIZE, MIN_TILE_SIZE};
use tilecache::surface::DrawableTiledSurface;
use tilecache::{log_info, log_warn};

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// TileCache headless renderer.
#[derive(Parser, Debug)]
#[command(
    name = "tilecache",
    about = "Paint images onto a sparse tiled surface and render a region",
    long_about = "Paint one or more images onto an unbounded tiled surface, optionally\n\
                  offload the tile cache to disk and back, then composite a clip\n\
                  rectangle to a PNG on the CPU or the GPU.\n\n\
                  Example:\n  \
                  tilecache -i photo.png -o out.png\n  \
                  tilecache -i \"shots/*.png\" --step 512,0 --offload -o strip.png"
)]
pub struct CliArgs {
    /// Input image(s). Glob patterns accepted (e.g. "*.png").
    #[arg(short, long, required = true, num_args = 1..)]
    pub input: Vec<String>,

    /// Output PNG path.
    #[arg(short, long, value_name = "FILE")]
    pub output: PathBuf,

    /// Surface pixel the first input's top-left corner lands on.
    #[arg(long, default_value = "0,0", value_name = "X,Y", value_parser = parse_point, allow_hyphen_values = true)]
    pub origin: (i32, i32),

    /// Offset added to the origin after each input.
    #[arg(long, default_value = "0,0", value_name = "DX,DY", value_parser = parse_point, allow_hyphen_values = true)]
    pub step: (i32, i32),

    /// Region to render in surface pixels (default: everything painted).
    #[arg(long, value_name = "X,Y,W,H", value_parser = parse_rect, allow_hyphen_values = true)]
    pub clip: Option<PixelRect>,

    /// Opacity applied to every tile (0.0–1.0).
    #[arg(long, default_value_t = 1.0)]
    pub opacity: f32,

    /// Replace the background instead of blending over it.
    #[arg(long)]
    pub copy: bool,

    /// Background color of the output as R,G,B,A.
    #[arg(long, default_value = "0,0,0,0", value_name = "R,G,B,A", value_parser = parse_color)]
    pub background: Rgba<u8>,

    /// Tile edge in pixels (overrides the settings file).
    #[arg(long, value_name = "PX")]
    pub tile_size: Option<u32>,

    /// Settings file (default: the per-user tilecache_settings.cfg).
    #[arg(long, value_name = "FILE")]
    pub settings: Option<PathBuf>,

    /// Save the image tiles to a temp file and load them back before drawing.
    #[arg(long)]
    pub offload: bool,

    /// Composite on the GPU (falls back to the CPU without an adapter).
    #[arg(long)]
    pub gpu: bool,

    /// Also write the raw surface container to this file.
    #[arg(long, value_name = "FILE")]
    pub save_raw: Option<PathBuf>,

    /// Mirror log output to stderr and print timing information.
    #[arg(short, long)]
    pub verbose: bool,
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run the CLI and return an OS exit code.
pub fn run(args: CliArgs) -> ExitCode {
    let inputs = resolve_inputs(&args.input);
    if inputs.is_empty() {
        eprintln!("error: no input files matched the given pattern(s).");
        return ExitCode::FAILURE;
    }

    let mut settings = match &args.settings {
        Some(path) => CacheSettings::load_from(path),
        None => CacheSettings::load(),
    };
    if let Some(ts) = args.tile_size {
        settings.tile_size = ts.clamp(MIN_TILE_SIZE, MAX_TILE_SIZE);
    }

    match run_inner(&args, &inputs, &settings) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_inner(args: &CliArgs, inputs: &[PathBuf], settings: &CacheSettings) -> Result<(), String> {
    let start = Instant::now();
    let mut surface = DrawableTiledSurface::new(settings);

    // -- Step 1: Paint ---------------------------------------------------
    let (mut x, mut y) = args.origin;
    for (idx, path) in inputs.iter().enumerate() {
        let image = image::open(path)
            .map_err(|e| format!("load failed for '{}': {}", path.display(), e))?
            .into_rgba8();
        let changed = surface
            .blit_rgba8(x, y, &image)
            .map_err(|e| e.to_string())?;
        if args.verbose {
            println!("[{}/{}] {} → {:?}", idx + 1, inputs.len(), path.display(), changed);
        }
        x += args.step.0;
        y += args.step.1;
    }
    log_info!(
        "CLI: painted {} input(s), {} tiles, {} bytes",
        inputs.len(),
        surface.images().present_count(),
        surface.byte_count()
    );

    if let Some(raw_path) = &args.save_raw {
        let file = std::fs::File::create(raw_path)
            .map_err(|e| format!("could not create '{}': {}", raw_path.display(), e))?;
        surface
            .write_to(std::io::BufWriter::new(file))
            .map_err(|e| e.to_string())?;
    }

    // -- Step 2: Offload round trip (optional) ---------------------------
    if args.offload {
        surface.schedule_save().map_err(|e| e.to_string())?;
        wait_for(&mut surface)?;
        surface.schedule_load().map_err(|e| e.to_string())?;
        wait_for(&mut surface)?;
    }

    // -- Step 3: Render --------------------------------------------------
    let clip = args.clip.unwrap_or_else(|| surface.pixel_bounding_rect());
    if clip.is_empty() {
        return Err("nothing to render: clip rectangle is empty".to_string());
    }
    let paint = PaintParams {
        opacity: args.opacity.clamp(0.0, 1.0),
        blend: if args.copy { TileBlend::Copy } else { TileBlend::SourceOver },
    };
    let background = RgbaImage::from_pixel(clip.width as u32, clip.height as u32, args.background);
    let dst = (-clip.x, -clip.y);

    let output = if args.gpu && settings.gpu_acceleration {
        render_gpu(&surface, settings, &background, dst, &clip, &paint)?
    } else {
        if args.gpu {
            log_warn!("CLI: --gpu ignored, gpu_acceleration is off in settings");
        }
        None
    };
    let output = match output {
        Some(img) => img,
        None => {
            let mut target = background;
            surface
                .draw_on_canvas(&mut target, dst, Some(&clip), Some(&paint))
                .map_err(|e| e.to_string())?;
            target
        }
    };

    save_png(&output, &args.output)?;
    if args.verbose {
        println!(
            "  → {} ({}x{}, {:.0}ms)",
            args.output.display(),
            output.width(),
            output.height(),
            start.elapsed().as_secs_f64() * 1000.0
        );
    }
    Ok(())
}

/// GPU render, or `None` when no adapter is available.
fn render_gpu(
    surface: &DrawableTiledSurface,
    settings: &CacheSettings,
    background: &RgbaImage,
    dst: (i32, i32),
    clip: &PixelRect,
    paint: &PaintParams,
) -> Result<Option<RgbaImage>, String> {
    let Some(mut gpu) = GpuTileRenderer::new(&settings.preferred_gpu) else {
        eprintln!("warning: no GPU adapter available, rendering on the CPU.");
        return Ok(None);
    };
    log_info!("CLI: rendering on '{}'", gpu.adapter_name());
    let mut canvas = gpu.canvas(background).map_err(|e| e.to_string())?;
    surface
        .draw_on_canvas(&mut canvas, dst, Some(clip), Some(paint))
        .map_err(|e| e.to_string())?;
    canvas.finish().map(Some).map_err(|e| e.to_string())
}

fn wait_for(surface: &mut DrawableTiledSurface) -> Result<(), String> {
    match surface.wait_offload() {
        Some(event) => event
            .result
            .map_err(|e| format!("offload {:?} failed: {}", event.ticket.kind, e)),
        None => Err("no offload task in flight".to_string()),
    }
}

fn save_png(image: &RgbaImage, path: &Path) -> Result<(), String> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .map_err(|e| format!("could not create '{}': {}", dir.display(), e))?;
    }
    image
        .save_with_format(path, image::ImageFormat::Png)
        .map_err(|e| format!("save failed for '{}': {}", path.display(), e))
}

// ============================================================================
// Argument helpers
// ============================================================================

/// Expand glob patterns / literal paths into a deduplicated list of files.
fn resolve_inputs(patterns: &[String]) -> Vec<PathBuf> {
    let mut result: Vec<PathBuf> = Vec::new();

    for pattern in patterns {
        let as_path = Path::new(pattern);

        if as_path.exists() {
            if !result.iter().any(|p| p.as_path() == as_path) {
                result.push(as_path.to_path_buf());
            }
            continue;
        }

        match glob::glob(pattern) {
            Ok(entries) => {
                let mut matched = false;
                for entry in entries.flatten() {
                    if !result.contains(&entry) {
                        result.push(entry);
                    }
                    matched = true;
                }
                if !matched {
                    eprintln!("warning: pattern '{}' matched no files.", pattern);
                }
            }
            Err(e) => {
                eprintln!("warning: invalid glob '{}': {}", pattern, e);
            }
        }
    }

    result
}

fn parse_ints<const N: usize>(s: &str) -> Result<[i32; N], String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    if parts.len() != N {
        return Err(format!("expected {} comma-separated integers, got '{}'", N, s));
    }
    let mut out = [0i32; N];
    for (slot, part) in out.iter_mut().zip(parts) {
        *slot = part.parse().map_err(|_| format!("'{}' is not an integer", part))?;
    }
    Ok(out)
}

fn parse_point(s: &str) -> Result<(i32, i32), String> {
    let [x, y] = parse_ints::<2>(s)?;
    Ok((x, y))
}

fn parse_rect(s: &str) -> Result<PixelRect, String> {
    let [x, y, w, h] = parse_ints::<4>(s)?;
    if w <= 0 || h <= 0 {
        return Err(format!("clip '{}' must have a positive width and height", s));
    }
    Ok(Rect::new(x, y, w, h))
}

fn parse_color(s: &str) -> Result<Rgba<u8>, String> {
    let v = parse_ints::<4>(s)?;
    let mut out = [0u8; 4];
    for (slot, c) in out.iter_mut().zip(v) {
        *slot = u8::try_from(c).map_err(|_| format!("channel {} out of 0..=255", c))?;
    }
    Ok(Rgba(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_point_and_rect() {
        assert_eq!(parse_point("-300, 40"), Ok((-300, 40)));
        assert!(parse_point("1,2,3").is_err());
        assert_eq!(parse_rect("-8,0,16,4"), Ok(Rect::new(-8, 0, 16, 4)));
        assert!(parse_rect("0,0,0,4").is_err());
    }

    #[test]
    fn test_parse_color() {
        assert_eq!(parse_color("255,0,10,128"), Ok(Rgba([255, 0, 10, 128])));
        assert!(parse_color("256,0,0,0").is_err());
    }

    #[test]
    fn test_args_parse() {
        let args = CliArgs::try_parse_from([
            "tilecache", "-i", "a.png", "b.png", "-o", "out.png", "--origin", "-5,7", "--clip",
            "-5,0,10,10", "--offload",
        ])
        .unwrap();
        assert_eq!(args.input, vec!["a.png", "b.png"]);
        assert_eq!(args.origin, (-5, 7));
        assert_eq!(args.clip, Some(Rect::new(-5, 0, 10, 10)));
        assert!(args.offload && !args.gpu);
    }
}
