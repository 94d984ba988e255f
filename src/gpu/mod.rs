// ============================================================================
// GPU MODULE: wgpu path for compositing tiles onto an offscreen canvas
// ============================================================================
//
// Architecture:
//   context.rs  wgpu Device, Queue, adapter init
//   shaders.rs  WGSL source (inline strings)
//   texture.rs  TileTexture upload wrapper
//   pool.rs     tile texture recycling pool
//   blit.rs     blend / replace render pipelines for one tile quad
//   canvas.rs   GpuTileRenderer + GpuCanvas (TileCanvas impl, readback)
// ============================================================================

pub mod blit;
pub mod canvas;
pub mod context;
pub mod pool;
pub mod shaders;
pub mod texture;

pub use canvas::{GpuCanvas, GpuTileRenderer};
pub use context::GpuContext;
