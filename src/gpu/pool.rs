// ============================================================================
// TEXTURE POOL: recycle tile textures to avoid create/destroy churn
// ============================================================================

use std::collections::HashMap;

use super::texture::TileTexture;

/// Key for pooled textures: (width, height).
type PoolKey = (u32, u32);

/// A pool of tile textures keyed by dimensions.
///
/// Every tile of a surface has the same edge, so a draw pass of any size
/// cycles through a handful of textures instead of allocating one per tile.
pub struct TexturePool {
    pool: HashMap<PoolKey, Vec<TileTexture>>,
    /// Maximum number of textures to keep per key.
    max_per_key: usize,
}

impl TexturePool {
    pub fn new() -> Self {
        Self {
            pool: HashMap::new(),
            max_per_key: 4,
        }
    }

    /// Return a recycled texture if one exists for the given dimensions,
    /// otherwise `None` and the caller creates a new one.
    pub fn acquire(&mut self, width: u32, height: u32) -> Option<TileTexture> {
        self.pool.get_mut(&(width, height)).and_then(|v| v.pop())
    }

    /// Return a texture to the pool.  If the pool is full for this key the
    /// texture is dropped.
    pub fn release(&mut self, texture: TileTexture) {
        let entry = self.pool.entry((texture.width, texture.height)).or_default();
        if entry.len() < self.max_per_key {
            entry.push(texture);
        }
    }

    /// Drop all pooled textures.
    pub fn clear(&mut self) {
        self.pool.clear();
    }

    /// Total number of textures currently in the pool.
    pub fn pooled_count(&self) -> usize {
        self.pool.values().map(|v| v.len()).sum()
    }

    /// Approximate GPU memory held by pooled textures (bytes).
    pub fn pooled_memory_bytes(&self) -> usize {
        self.pool
            .iter()
            .map(|((w, h), textures)| (*w as usize) * (*h as usize) * 4 * textures.len())
            .sum()
    }
}

impl Default for TexturePool {
    fn default() -> Self {
        Self::new()
    }
}
