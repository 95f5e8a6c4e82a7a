use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use threshold_core::jobs::{JobSystem, PolledTask};
use threshold_shared::chunk::{ChunkState, ChunkTexture, HeightMap, TerrainChunk};
use threshold_shared::coords::{chunk_origin, visible_key_count, world_to_chunk, ChunkKey, GridDirection};
use threshold_shared::worldgen::{generate_heights, generate_texture, HeightSource};
use tracing::{debug, warn};

pub const DEFAULT_RESOLUTION: usize = 65;
pub const DEFAULT_CHUNK_LENGTH: f32 = 64.0;
pub const DEFAULT_HEIGHT_SCALE: f32 = 40.0;
pub const DEFAULT_VIEW_RADIUS: i32 = 4;
pub const DEFAULT_MAX_CONCURRENT_GENERATIONS: usize = 1;

#[derive(Debug, Clone, PartialEq)]
pub struct ChunkCacheConfig {
    /// Height samples per chunk edge, shared edges included.
    pub resolution: usize,
    /// World units covered by one chunk edge.
    pub chunk_length: f32,
    pub height_scale: f32,
    /// Radius of the visible disk, in chunks.
    pub view_radius: i32,
    /// Separate caps for height jobs and for texture jobs in flight.
    pub max_concurrent_generations: usize,
    pub pool_size: usize,
}

impl Default for ChunkCacheConfig {
    fn default() -> Self {
        Self {
            resolution: DEFAULT_RESOLUTION,
            chunk_length: DEFAULT_CHUNK_LENGTH,
            height_scale: DEFAULT_HEIGHT_SCALE,
            view_radius: DEFAULT_VIEW_RADIUS,
            max_concurrent_generations: DEFAULT_MAX_CONCURRENT_GENERATIONS,
            pool_size: visible_key_count(DEFAULT_VIEW_RADIUS),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChunkCacheConfigError {
    ResolutionTooSmall(usize),
    InvalidChunkLength(f32),
    InvalidHeightScale(f32),
    InvalidViewRadius(i32),
    ZeroGenerationBudget,
    PoolTooSmall { pool_size: usize, required: usize },
}

impl fmt::Display for ChunkCacheConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResolutionTooSmall(resolution) => {
                write!(f, "chunk resolution {resolution} is below the minimum of 2")
            }
            Self::InvalidChunkLength(length) => {
                write!(f, "chunk length must be positive and finite, got {length}")
            }
            Self::InvalidHeightScale(scale) => {
                write!(f, "height scale must be finite and not negative, got {scale}")
            }
            Self::InvalidViewRadius(radius) => write!(f, "view radius must be at least 1, got {radius}"),
            Self::ZeroGenerationBudget => write!(f, "max concurrent generations must be at least 1"),
            Self::PoolTooSmall { pool_size, required } => write!(
                f,
                "chunk pool of {pool_size} cannot hold the {required} chunks visible at once"
            ),
        }
    }
}

impl std::error::Error for ChunkCacheConfigError {}

impl ChunkCacheConfig {
    pub fn validate(&self) -> Result<(), ChunkCacheConfigError> {
        if self.resolution < 2 {
            return Err(ChunkCacheConfigError::ResolutionTooSmall(self.resolution));
        }
        if !self.chunk_length.is_finite() || self.chunk_length <= 0.0 {
            return Err(ChunkCacheConfigError::InvalidChunkLength(self.chunk_length));
        }
        if !self.height_scale.is_finite() || self.height_scale < 0.0 {
            return Err(ChunkCacheConfigError::InvalidHeightScale(self.height_scale));
        }
        if self.view_radius < 1 {
            return Err(ChunkCacheConfigError::InvalidViewRadius(self.view_radius));
        }
        if self.max_concurrent_generations == 0 {
            return Err(ChunkCacheConfigError::ZeroGenerationBudget);
        }
        let required = visible_key_count(self.view_radius);
        if self.pool_size < required {
            return Err(ChunkCacheConfigError::PoolTooSmall {
                pool_size: self.pool_size,
                required,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Queued,
    AlreadyTracked,
    /// Dropped; the caller should ask again once chunks return to the pool.
    PoolExhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalOutcome {
    /// Generation had not started, so the chunk went straight back.
    Pooled,
    /// Handled by a later `update()` once no job owns the chunk.
    Deferred,
    Untracked,
}

/// Chunk counts per pipeline stage. The stage counts always sum to the pool
/// size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkCacheStats {
    pub pooled: usize,
    pub to_generate_height: usize,
    pub generating_height: usize,
    pub height_ready: usize,
    pub generating_texture: usize,
    pub loaded: usize,
    pub pending_removals: usize,
}

impl ChunkCacheStats {
    pub fn total(&self) -> usize {
        self.pooled
            + self.to_generate_height
            + self.generating_height
            + self.height_ready
            + self.generating_texture
            + self.loaded
    }
}

/// What one `update()` call changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateSummary {
    pub removed: usize,
    pub heights_started: usize,
    pub heights_finished: usize,
    pub textures_started: usize,
    pub loaded: usize,
}

/// Fixed pool of terrain chunks streamed through background generation.
///
/// Every state change happens inside the methods below on the caller's
/// thread. Jobs only touch buffers that were moved into them and hand them
/// back through a [`PolledTask`].
pub struct ChunkCache {
    config: ChunkCacheConfig,
    jobs: Arc<JobSystem>,
    source: Arc<dyn HeightSource>,
    slots: Vec<TerrainChunk>,
    pooled: Vec<usize>,
    tracked: FxHashMap<ChunkKey, usize>,
    to_generate_height: VecDeque<ChunkKey>,
    generating_height: FxHashMap<ChunkKey, PolledTask<HeightMap>>,
    height_ready: VecDeque<ChunkKey>,
    generating_texture: FxHashMap<ChunkKey, PolledTask<(HeightMap, ChunkTexture)>>,
    pending_removals: FxHashSet<ChunkKey>,
}

impl ChunkCache {
    pub fn new(
        config: ChunkCacheConfig,
        jobs: Arc<JobSystem>,
        source: Arc<dyn HeightSource>,
    ) -> Result<Self, ChunkCacheConfigError> {
        config.validate()?;

        let slots: Vec<TerrainChunk> = (0..config.pool_size)
            .map(|_| TerrainChunk::new_pooled(config.resolution))
            .collect();
        // Reversed so slot 0 is handed out first.
        let pooled = (0..config.pool_size).rev().collect();
        debug!(
            "chunk cache pooled {} chunks at resolution {}",
            config.pool_size, config.resolution
        );

        Ok(Self {
            config,
            jobs,
            source,
            slots,
            pooled,
            tracked: FxHashMap::default(),
            to_generate_height: VecDeque::new(),
            generating_height: FxHashMap::default(),
            height_ready: VecDeque::new(),
            generating_texture: FxHashMap::default(),
            pending_removals: FxHashSet::default(),
        })
    }

    pub fn config(&self) -> &ChunkCacheConfig {
        &self.config
    }

    pub fn pool_size(&self) -> usize {
        self.slots.len()
    }

    pub fn is_tracked(&self, key: ChunkKey) -> bool {
        self.tracked.contains_key(&key)
    }

    pub fn chunk(&self, key: ChunkKey) -> Option<&TerrainChunk> {
        self.tracked.get(&key).map(|&slot| &self.slots[slot])
    }

    pub fn state_of(&self, key: ChunkKey) -> Option<ChunkState> {
        self.chunk(key).map(TerrainChunk::state)
    }

    pub fn is_pending_removal(&self, key: ChunkKey) -> bool {
        self.pending_removals.contains(&key)
    }

    /// Loaded with all four grid neighbours loaded too.
    pub fn is_stitched(&self, key: ChunkKey) -> bool {
        self.chunk(key).is_some_and(|chunk| {
            chunk.state() == ChunkState::Loaded && chunk.neighbors.is_complete()
        })
    }

    pub fn stats(&self) -> ChunkCacheStats {
        let mut stats = ChunkCacheStats {
            pending_removals: self.pending_removals.len(),
            ..ChunkCacheStats::default()
        };
        for chunk in &self.slots {
            match chunk.state() {
                ChunkState::Pooled => stats.pooled += 1,
                ChunkState::ToGenerateHeight => stats.to_generate_height += 1,
                ChunkState::GeneratingHeight => stats.generating_height += 1,
                ChunkState::HeightReady => stats.height_ready += 1,
                ChunkState::GeneratingTexture => stats.generating_texture += 1,
                ChunkState::Loaded => stats.loaded += 1,
            }
        }
        stats
    }

    /// Terrain height in world units, from loaded chunks only.
    pub fn height_at(&self, world_x: f32, world_z: f32) -> Option<f32> {
        let length = self.config.chunk_length;
        let key = world_to_chunk(world_x, world_z, length);
        let chunk = self.chunk(key)?;
        if chunk.state() != ChunkState::Loaded {
            return None;
        }
        let (origin_x, origin_z) = chunk_origin(key, length);
        let u = (world_x - origin_x) / length;
        let v = (world_z - origin_z) / length;
        Some(chunk.heights.sample_bilinear(u, v) * self.config.height_scale)
    }

    pub fn request_chunk(&mut self, key: ChunkKey) -> RequestOutcome {
        if self.tracked.contains_key(&key) {
            if self.pending_removals.remove(&key) {
                debug!("chunk {key:?} requested again before removal, keeping it");
            }
            return RequestOutcome::AlreadyTracked;
        }

        let Some(slot) = self.pooled.pop() else {
            warn!(
                "chunk pool of {} exhausted, dropping request for {key:?}",
                self.slots.len()
            );
            return RequestOutcome::PoolExhausted;
        };
        self.slots[slot].assign(key);
        self.tracked.insert(key, slot);
        self.to_generate_height.push_back(key);
        RequestOutcome::Queued
    }

    pub fn request_removal(&mut self, key: ChunkKey) -> RemovalOutcome {
        let Some(state) = self.state_of(key) else {
            warn!("removal requested for untracked chunk {key:?}");
            return RemovalOutcome::Untracked;
        };

        if state == ChunkState::ToGenerateHeight {
            self.to_generate_height.retain(|queued| *queued != key);
            self.release(key);
            return RemovalOutcome::Pooled;
        }
        self.pending_removals.insert(key);
        RemovalOutcome::Deferred
    }

    /// Advances the pipeline by one tick.
    pub fn update(&mut self) -> UpdateSummary {
        UpdateSummary {
            removed: self.process_removals(),
            heights_started: self.start_height_jobs(),
            heights_finished: self.collect_heights(),
            textures_started: self.start_texture_jobs(),
            loaded: self.collect_textures(),
        }
    }

    fn process_removals(&mut self) -> usize {
        if self.pending_removals.is_empty() {
            return 0;
        }

        let mut ready: Vec<ChunkKey> = self
            .pending_removals
            .iter()
            .copied()
            .filter(|key| !self.state_of(*key).is_some_and(ChunkState::is_in_flight))
            .collect();
        ready.sort_unstable();
        for key in &ready {
            self.pending_removals.remove(key);
            if self.state_of(*key) == Some(ChunkState::HeightReady) {
                self.height_ready.retain(|queued| queued != key);
            }
            self.release(*key);
        }
        ready.len()
    }

    fn start_height_jobs(&mut self) -> usize {
        let mut started = 0;
        while self.generating_height.len() < self.config.max_concurrent_generations {
            let Some(key) = self.to_generate_height.pop_front() else {
                break;
            };
            let Some(&slot) = self.tracked.get(&key) else {
                continue;
            };

            let chunk = &mut self.slots[slot];
            chunk.advance();
            let mut heights = std::mem::take(&mut chunk.heights);
            let source = Arc::clone(&self.source);
            let chunk_length = self.config.chunk_length;
            let task = self.jobs.spawn_polled(move || {
                generate_heights(source.as_ref(), key, chunk_length, &mut heights);
                heights
            });
            self.generating_height.insert(key, task);
            started += 1;
        }
        started
    }

    fn collect_heights(&mut self) -> usize {
        let mut finished: Vec<ChunkKey> = self
            .generating_height
            .iter()
            .filter(|(_, task)| task.is_finished())
            .map(|(key, _)| *key)
            .collect();
        finished.sort_unstable();

        let mut collected = 0;
        for key in finished {
            let Some(heights) = self
                .generating_height
                .remove(&key)
                .and_then(|mut task| task.try_take())
            else {
                continue;
            };
            let Some(&slot) = self.tracked.get(&key) else {
                continue;
            };
            let chunk = &mut self.slots[slot];
            chunk.heights = heights;
            chunk.advance();
            self.height_ready.push_back(key);
            collected += 1;
        }
        collected
    }

    fn start_texture_jobs(&mut self) -> usize {
        let mut started = 0;
        let mut held_back = Vec::new();
        while self.generating_texture.len() < self.config.max_concurrent_generations {
            let Some(key) = self.height_ready.pop_front() else {
                break;
            };
            // Leave it for the removal pass instead of texturing it.
            if self.pending_removals.contains(&key) {
                held_back.push(key);
                continue;
            }
            let Some(&slot) = self.tracked.get(&key) else {
                continue;
            };

            let chunk = &mut self.slots[slot];
            chunk.advance();
            let heights = std::mem::take(&mut chunk.heights);
            let mut texture = std::mem::take(&mut chunk.texture);
            let chunk_length = self.config.chunk_length;
            let height_scale = self.config.height_scale;
            let task = self.jobs.spawn_polled(move || {
                generate_texture(&heights, chunk_length, height_scale, &mut texture);
                (heights, texture)
            });
            self.generating_texture.insert(key, task);
            started += 1;
        }
        for key in held_back.into_iter().rev() {
            self.height_ready.push_front(key);
        }
        started
    }

    fn collect_textures(&mut self) -> usize {
        let mut finished: Vec<ChunkKey> = self
            .generating_texture
            .iter()
            .filter(|(_, task)| task.is_finished())
            .map(|(key, _)| *key)
            .collect();
        finished.sort_unstable();

        let mut loaded = 0;
        for key in finished {
            let Some((heights, texture)) = self
                .generating_texture
                .remove(&key)
                .and_then(|mut task| task.try_take())
            else {
                continue;
            };
            let Some(&slot) = self.tracked.get(&key) else {
                continue;
            };
            let chunk = &mut self.slots[slot];
            chunk.heights = heights;
            chunk.texture = texture;
            chunk.advance();
            self.link_neighbors(key, slot);
            loaded += 1;
        }
        loaded
    }

    fn link_neighbors(&mut self, key: ChunkKey, slot: usize) {
        for direction in GridDirection::ALL {
            let neighbor_key = key.neighbor(direction);
            let Some(&neighbor_slot) = self.tracked.get(&neighbor_key) else {
                continue;
            };
            if self.slots[neighbor_slot].state() != ChunkState::Loaded {
                continue;
            }
            self.slots[slot].neighbors.set(direction, Some(neighbor_key));
            self.slots[neighbor_slot]
                .neighbors
                .set(direction.opposite(), Some(key));
        }
    }

    /// Unlinks the chunk and returns it to the pool. Never called while a
    /// job owns the chunk's buffers.
    fn release(&mut self, key: ChunkKey) {
        let Some(slot) = self.tracked.remove(&key) else {
            return;
        };
        for direction in GridDirection::ALL {
            let Some(neighbor_key) = self.slots[slot].neighbors.get(direction) else {
                continue;
            };
            if let Some(&neighbor_slot) = self.tracked.get(&neighbor_key) {
                self.slots[neighbor_slot]
                    .neighbors
                    .set(direction.opposite(), None);
            }
        }
        self.slots[slot].reset();
        self.pooled.push(slot);
    }

    /// Panics unless every tracked key sits in exactly one pipeline stage
    /// and every slot is either pooled or tracked.
    #[cfg(test)]
    fn assert_partitioned(&self) {
        let mut stages: FxHashMap<ChunkKey, usize> = FxHashMap::default();
        let stage_keys = self
            .to_generate_height
            .iter()
            .chain(self.generating_height.keys())
            .chain(self.height_ready.iter())
            .chain(self.generating_texture.keys())
            .copied()
            .chain(
                self.tracked
                    .iter()
                    .filter(|(_, slot)| self.slots[**slot].state() == ChunkState::Loaded)
                    .map(|(key, _)| *key),
            );
        for key in stage_keys {
            *stages.entry(key).or_default() += 1;
        }

        for (key, count) in &stages {
            assert!(self.tracked.contains_key(key), "{key:?} staged but not tracked");
            assert_eq!(*count, 1, "{key:?} sits in {count} stages");
        }
        for (key, slot) in &self.tracked {
            assert!(stages.contains_key(key), "{key:?} tracked but in no stage");
            assert_eq!(self.slots[*slot].key(), Some(*key));
            assert!(!self.pooled.contains(slot), "slot {slot} both pooled and tracked");
        }
        for slot in &self.pooled {
            assert_eq!(self.slots[*slot].state(), ChunkState::Pooled);
        }
        assert_eq!(self.pooled.len() + self.tracked.len(), self.slots.len());
        assert!(self.pending_removals.iter().all(|key| self.tracked.contains_key(key)));
    }
}
