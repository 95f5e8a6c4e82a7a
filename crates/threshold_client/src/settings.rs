use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use threshold_shared::coords::visible_key_count;
use tracing::warn;

use crate::renderer::portal_renderer::{
    PortalRenderConfig, DEFAULT_CLIP_PLANE_OFFSET, DEFAULT_MAX_RECURSION,
};
use crate::terrain::chunk_cache::{
    ChunkCacheConfig, DEFAULT_CHUNK_LENGTH, DEFAULT_HEIGHT_SCALE, DEFAULT_MAX_CONCURRENT_GENERATIONS,
    DEFAULT_RESOLUTION, DEFAULT_VIEW_RADIUS,
};

pub const SETTINGS_PATH: &str = "threshold.toml";

const MIN_RESOLUTION: usize = 2;
const MAX_RESOLUTION: usize = 513;
const MIN_CHUNK_LENGTH: f32 = 1.0;
const MAX_CHUNK_LENGTH: f32 = 4096.0;
const MAX_HEIGHT_SCALE: f32 = 10_000.0;
const MIN_VIEW_RADIUS: i32 = 1;
const MAX_VIEW_RADIUS: i32 = 32;
const MIN_CONCURRENT_GENERATIONS: usize = 1;
const MAX_CONCURRENT_GENERATIONS: usize = 64;
const MAX_WORKER_THREADS: usize = 64;
const MAX_PORTAL_RECURSION: u32 = 8;
const MAX_CLIP_PLANE_OFFSET: f32 = 1.0;
const MIN_FOV: f32 = 30.0;
const MAX_FOV: f32 = 120.0;
const MIN_WALK_SPEED: f32 = 0.1;
const MAX_WALK_SPEED: f32 = 100.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSettings {
    #[serde(default = "default_seed")]
    pub seed: u32,
    #[serde(default = "default_chunk_resolution")]
    pub chunk_resolution: usize,
    #[serde(default = "default_chunk_length")]
    pub chunk_length: f32,
    #[serde(default = "default_height_scale")]
    pub height_scale: f32,
    #[serde(default = "default_view_radius")]
    pub view_radius: i32,
    #[serde(default = "default_max_concurrent_generations")]
    pub max_concurrent_generations: usize,
    /// Zero sizes the pool to exactly the visible disk.
    #[serde(default)]
    pub chunk_pool_size: usize,
    /// Zero lets the job system pick.
    #[serde(default)]
    pub worker_threads: usize,
    #[serde(default = "default_portal_recursion")]
    pub portal_recursion: u32,
    #[serde(default = "default_clip_plane_offset")]
    pub clip_plane_offset: f32,
    #[serde(default = "default_fov")]
    pub fov: f32,
    #[serde(default = "default_walk_speed")]
    pub walk_speed: f32,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            chunk_resolution: default_chunk_resolution(),
            chunk_length: default_chunk_length(),
            height_scale: default_height_scale(),
            view_radius: default_view_radius(),
            max_concurrent_generations: default_max_concurrent_generations(),
            chunk_pool_size: 0,
            worker_threads: 0,
            portal_recursion: default_portal_recursion(),
            clip_plane_offset: default_clip_plane_offset(),
            fov: default_fov(),
            walk_speed: default_walk_speed(),
        }
    }
}

impl ClientSettings {
    pub fn sanitize(mut self) -> Self {
        self.chunk_resolution = self.chunk_resolution.clamp(MIN_RESOLUTION, MAX_RESOLUTION);
        self.chunk_length = clamp_finite(self.chunk_length, MIN_CHUNK_LENGTH, MAX_CHUNK_LENGTH, default_chunk_length());
        self.height_scale = clamp_finite(self.height_scale, 0.0, MAX_HEIGHT_SCALE, default_height_scale());
        self.view_radius = self.view_radius.clamp(MIN_VIEW_RADIUS, MAX_VIEW_RADIUS);
        self.max_concurrent_generations = self
            .max_concurrent_generations
            .clamp(MIN_CONCURRENT_GENERATIONS, MAX_CONCURRENT_GENERATIONS);
        if self.chunk_pool_size != 0 {
            let required = visible_key_count(self.view_radius);
            if self.chunk_pool_size < required {
                warn!(
                    "chunk pool size {} is below the {required} visible chunks, raising it",
                    self.chunk_pool_size
                );
                self.chunk_pool_size = required;
            }
        }
        self.worker_threads = self.worker_threads.min(MAX_WORKER_THREADS);
        self.portal_recursion = self.portal_recursion.min(MAX_PORTAL_RECURSION);
        self.clip_plane_offset =
            clamp_finite(self.clip_plane_offset, 0.0, MAX_CLIP_PLANE_OFFSET, default_clip_plane_offset());
        self.fov = clamp_finite(self.fov, MIN_FOV, MAX_FOV, default_fov());
        self.walk_speed = clamp_finite(self.walk_speed, MIN_WALK_SPEED, MAX_WALK_SPEED, default_walk_speed());
        self
    }

    pub fn load(path: &Path) -> io::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let parsed = toml::from_str::<Self>(&contents).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("failed to deserialize settings: {e}"),
            )
        })?;
        Ok(parsed.sanitize())
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        let settings = self.clone().sanitize();
        let serialized = toml::to_string_pretty(&settings).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("failed to serialize settings: {e}"),
            )
        })?;
        fs::write(path, serialized)
    }

    pub fn chunk_cache_config(&self) -> ChunkCacheConfig {
        let pool_size = if self.chunk_pool_size == 0 {
            visible_key_count(self.view_radius)
        } else {
            self.chunk_pool_size
        };
        ChunkCacheConfig {
            resolution: self.chunk_resolution,
            chunk_length: self.chunk_length,
            height_scale: self.height_scale,
            view_radius: self.view_radius,
            max_concurrent_generations: self.max_concurrent_generations,
            pool_size,
        }
    }

    pub fn portal_render_config(&self) -> PortalRenderConfig {
        PortalRenderConfig {
            max_recursion: self.portal_recursion,
            clip_plane_offset: self.clip_plane_offset,
        }
    }

    pub fn worker_threads(&self) -> Option<usize> {
        (self.worker_threads > 0).then_some(self.worker_threads)
    }
}

fn clamp_finite(value: f32, min: f32, max: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        fallback
    }
}

fn default_seed() -> u32 {
    1337
}

fn default_chunk_resolution() -> usize {
    DEFAULT_RESOLUTION
}

fn default_chunk_length() -> f32 {
    DEFAULT_CHUNK_LENGTH
}

fn default_height_scale() -> f32 {
    DEFAULT_HEIGHT_SCALE
}

fn default_view_radius() -> i32 {
    DEFAULT_VIEW_RADIUS
}

fn default_max_concurrent_generations() -> usize {
    DEFAULT_MAX_CONCURRENT_GENERATIONS
}

fn default_portal_recursion() -> u32 {
    DEFAULT_MAX_RECURSION
}

fn default_clip_plane_offset() -> f32 {
    DEFAULT_CLIP_PLANE_OFFSET
}

fn default_fov() -> f32 {
    70.0
}

fn default_walk_speed() -> f32 {
    4.0
}

/// Reads settings from `path`, writing defaults there when the file is
/// missing or unreadable.
pub fn load_or_create_settings(path: &Path) -> ClientSettings {
    match ClientSettings::load(path) {
        Ok(settings) => settings,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            let settings = ClientSettings::default();
            if let Err(save_err) = settings.save(path) {
                warn!(
                    "Failed to create default settings at {}: {save_err}",
                    path.display()
                );
            }
            settings
        }
        Err(err) => {
            warn!("Failed to load settings from {}: {err}", path.display());
            ClientSettings::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use super::{load_or_create_settings, ClientSettings};

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("threshold-{}-{name}.toml", std::process::id()))
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let settings: ClientSettings = toml::from_str("seed = 9\nview_radius = 3\n").expect("parse");
        assert_eq!(settings.seed, 9);
        assert_eq!(settings.view_radius, 3);
        assert_eq!(settings.max_concurrent_generations, 1);
        assert_eq!(settings.portal_recursion, 1);
    }

    #[test]
    fn sanitize_clamps_out_of_range_values() {
        let settings = ClientSettings {
            chunk_resolution: 1,
            view_radius: 500,
            max_concurrent_generations: 0,
            chunk_pool_size: 3,
            chunk_length: f32::NAN,
            fov: 5.0,
            ..ClientSettings::default()
        }
        .sanitize();

        assert_eq!(settings.chunk_resolution, 2);
        assert_eq!(settings.view_radius, 32);
        assert_eq!(settings.max_concurrent_generations, 1);
        assert_eq!(settings.chunk_length, 64.0);
        assert_eq!(settings.fov, 30.0);
        assert!(settings.chunk_cache_config().validate().is_ok());
    }

    #[test]
    fn default_pool_matches_the_visible_disk() {
        let settings = ClientSettings {
            view_radius: 2,
            ..ClientSettings::default()
        };
        assert_eq!(settings.chunk_cache_config().pool_size, 9);
        assert_eq!(settings.worker_threads(), None);
    }

    #[test]
    fn save_then_load_keeps_values() {
        let path = scratch_path("roundtrip");
        let settings = ClientSettings {
            seed: 42,
            portal_recursion: 3,
            walk_speed: 6.5,
            ..ClientSettings::default()
        };
        settings.save(&path).expect("save");
        let loaded = ClientSettings::load(&path).expect("load");
        let _ = fs::remove_file(&path);

        assert_eq!(loaded.seed, 42);
        assert_eq!(loaded.portal_render_config().max_recursion, 3);
        assert_eq!(loaded.walk_speed, 6.5);
    }

    #[test]
    fn missing_file_is_created_with_defaults() {
        let path = scratch_path("created");
        let _ = fs::remove_file(&path);
        let settings = load_or_create_settings(&path);
        assert_eq!(settings.seed, ClientSettings::default().seed);
        assert!(path.exists());
        let _ = fs::remove_file(&path);
    }
}
