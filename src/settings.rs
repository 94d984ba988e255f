// ============================================================================
// SETTINGS: tile cache configuration, persisted as a key=value text file
// ============================================================================

use std::path::PathBuf;

/// Smallest and largest tile edge accepted from a settings file.
pub const MIN_TILE_SIZE: u32 = 8;
pub const MAX_TILE_SIZE: u32 = 1024;

/// Default tile edge in pixels.
pub const DEFAULT_TILE_SIZE: u32 = 64;

/// Regeneration switches to the rayon pool above this many dirty tiles.
pub const DEFAULT_PARALLEL_THRESHOLD: usize = 4;

#[derive(Clone, Debug, PartialEq)]
pub struct CacheSettings {
    /// Tile edge length in pixels
    pub tile_size: u32,
    /// Dirty-tile count above which regeneration runs in parallel
    pub parallel_threshold: usize,
    /// Use the wgpu compositing path when an adapter is available
    pub gpu_acceleration: bool,
    /// Adapter preference ("Auto", "low power", "high performance")
    pub preferred_gpu: String,
    /// Directory for offloaded tile files (`None` = system temp dir)
    pub offload_dir: Option<PathBuf>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            tile_size: DEFAULT_TILE_SIZE,
            parallel_threshold: DEFAULT_PARALLEL_THRESHOLD,
            gpu_acceleration: true,
            preferred_gpu: "Auto".to_string(),
            offload_dir: None,
        }
    }
}

impl CacheSettings {
    /// Path to the settings file.
    /// On Linux:   ~/.config/tilecache/tilecache_settings.cfg  (XDG_CONFIG_HOME respected)
    /// On Windows: %APPDATA%\TileCache\tilecache_settings.cfg
    /// On macOS:   ~/Library/Application Support/TileCache/tilecache_settings.cfg
    pub fn settings_path() -> Option<PathBuf> {
        #[cfg(target_os = "windows")]
        {
            let appdata = std::env::var("APPDATA")
                .or_else(|_| std::env::var("USERPROFILE"))
                .ok()?;
            return Some(PathBuf::from(appdata).join("TileCache").join("tilecache_settings.cfg"));
        }
        #[cfg(target_os = "macos")]
        {
            let home = std::env::var("HOME").ok()?;
            return Some(
                PathBuf::from(home)
                    .join("Library")
                    .join("Application Support")
                    .join("TileCache")
                    .join("tilecache_settings.cfg"),
            );
        }
        #[cfg(not(any(target_os = "windows", target_os = "macos")))]
        {
            let config_dir = std::env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .or_else(|_| std::env::var("HOME").map(|h| PathBuf::from(h).join(".config")))
                .ok()?;
            Some(config_dir.join("tilecache").join("tilecache_settings.cfg"))
        }
    }

    /// Directory new offload files are created in.
    pub fn offload_dir(&self) -> PathBuf {
        self.offload_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Render as the on-disk `key=value` form.
    pub fn to_config_string(&self) -> String {
        format!(
            "tile_size={}\n\
             parallel_threshold={}\n\
             gpu_acceleration={}\n\
             preferred_gpu={}\n\
             offload_dir={}\n",
            self.tile_size,
            self.parallel_threshold,
            self.gpu_acceleration,
            self.preferred_gpu,
            self.offload_dir
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
        )
    }

    /// Parse `key=value` lines; unknown keys and bad values keep their defaults.
    pub fn parse(content: &str) -> Self {
        let mut s = Self::default();
        for line in content.lines() {
            let line = line.trim();
            if line.starts_with('#') {
                continue;
            }
            let Some((key, val)) = line.split_once('=') else { continue };
            let val = val.trim();
            match key.trim() {
                "tile_size" => {
                    s.tile_size = val
                        .parse::<u32>()
                        .map(|v| v.clamp(MIN_TILE_SIZE, MAX_TILE_SIZE))
                        .unwrap_or(DEFAULT_TILE_SIZE);
                }
                "parallel_threshold" => {
                    s.parallel_threshold = val.parse().unwrap_or(DEFAULT_PARALLEL_THRESHOLD);
                }
                "gpu_acceleration" => {
                    s.gpu_acceleration = val == "true";
                }
                "preferred_gpu" => {
                    s.preferred_gpu = val.to_string();
                }
                "offload_dir" => {
                    s.offload_dir = if val.is_empty() { None } else { Some(PathBuf::from(val)) };
                }
                _ => {}
            }
        }
        s
    }

    /// Save settings to disk.
    pub fn save(&self) -> std::io::Result<()> {
        let Some(path) = Self::settings_path() else { return Ok(()) };
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, self.to_config_string())
    }

    /// Load settings from disk (returns default if file missing or corrupt).
    pub fn load() -> Self {
        let Some(path) = Self::settings_path() else { return Self::default() };
        Self::load_from(&path)
    }

    pub fn load_from(path: &std::path::Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content),
            Err(_) => Self::default(),
        }
    }
}
