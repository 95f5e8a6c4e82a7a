use glam::Vec3;
use rustc_hash::FxHashSet;
use threshold_shared::coords::{visible_keys, world_to_chunk, ChunkKey};
use tracing::debug;

use super::chunk_cache::{ChunkCache, RequestOutcome, UpdateSummary};

/// Keeps the chunk cache filled with the disk of chunks around a focus point.
pub struct TerrainController {
    center: Option<ChunkKey>,
    visible: FxHashSet<ChunkKey>,
    /// Visible keys the cache could not take yet.
    retry: FxHashSet<ChunkKey>,
}

impl TerrainController {
    pub fn new() -> Self {
        Self {
            center: None,
            visible: FxHashSet::default(),
            retry: FxHashSet::default(),
        }
    }

    pub fn center(&self) -> Option<ChunkKey> {
        self.center
    }

    pub fn visible(&self) -> &FxHashSet<ChunkKey> {
        &self.visible
    }

    pub fn retry_count(&self) -> usize {
        self.retry.len()
    }

    /// Reconciles the cache with the chunks around `focus`, then advances the
    /// cache pipeline one tick.
    pub fn update(&mut self, focus: Vec3, cache: &mut ChunkCache) -> UpdateSummary {
        let config = cache.config();
        let center = world_to_chunk(focus.x, focus.z, config.chunk_length);
        let radius = config.view_radius;

        if self.center != Some(center) {
            let next = visible_keys(center, radius);
            let mut to_remove: Vec<ChunkKey> = self.visible.difference(&next).copied().collect();
            let mut to_add: Vec<ChunkKey> = next.difference(&self.visible).copied().collect();
            to_remove.sort_unstable();
            to_add.sort_unstable_by_key(|key| distance_sq(*key, center));
            debug!(
                "terrain focus moved to {center:?}: {} to add, {} to remove",
                to_add.len(),
                to_remove.len()
            );

            for key in to_remove {
                self.retry.remove(&key);
                cache.request_removal(key);
            }
            // Removals return queued chunks to the pool right away, so
            // requests issued after them can reuse the freed slots.
            for key in to_add {
                self.request(key, cache);
            }
            self.visible = next;
            self.center = Some(center);
        }

        if !self.retry.is_empty() {
            let mut pending: Vec<ChunkKey> = self.retry.drain().collect();
            pending.sort_unstable_by_key(|key| distance_sq(*key, center));
            for key in pending {
                self.request(key, cache);
            }
        }

        cache.update()
    }

    fn request(&mut self, key: ChunkKey, cache: &mut ChunkCache) {
        if cache.request_chunk(key) == RequestOutcome::PoolExhausted {
            self.retry.insert(key);
        }
    }
}

impl Default for TerrainController {
    fn default() -> Self {
        Self::new()
    }
}

fn distance_sq(key: ChunkKey, center: ChunkKey) -> i32 {
    let offset = key - center;
    offset.x * offset.x + offset.z * offset.z
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use glam::Vec3;
    use threshold_core::jobs::JobSystem;
    use threshold_shared::chunk::ChunkState;
    use threshold_shared::coords::{visible_keys, ChunkKey};
    use threshold_shared::worldgen::LayeredNoise;

    use super::TerrainController;
    use crate::terrain::chunk_cache::{ChunkCache, ChunkCacheConfig};

    fn cache(pool_size: usize) -> ChunkCache {
        let config = ChunkCacheConfig {
            resolution: 5,
            chunk_length: 10.0,
            height_scale: 5.0,
            view_radius: 2,
            max_concurrent_generations: 2,
            pool_size,
        };
        let jobs = Arc::new(JobSystem::new(Some(2)).expect("job system"));
        ChunkCache::new(config, jobs, Arc::new(LayeredNoise::hills(7))).expect("valid config")
    }

    fn settle(controller: &mut TerrainController, focus: Vec3, cache: &mut ChunkCache) {
        for _ in 0..5_000 {
            controller.update(focus, cache);
            let stats = cache.stats();
            if stats.loaded == controller.visible().len()
                && stats.pending_removals == 0
                && controller.retry_count() == 0
            {
                return;
            }
            thread::sleep(Duration::from_millis(1));
        }
        panic!("terrain did not settle: {:?}", cache.stats());
    }

    #[test]
    fn loads_the_disk_around_the_focus() {
        let mut cache = cache(9);
        let mut controller = TerrainController::new();
        settle(&mut controller, Vec3::new(5.0, 0.0, 5.0), &mut cache);

        assert_eq!(controller.center(), Some(ChunkKey::new(0, 0)));
        for key in visible_keys(ChunkKey::new(0, 0), 2) {
            assert_eq!(cache.state_of(key), Some(ChunkState::Loaded));
        }
        assert!(cache.height_at(5.0, 5.0).is_some());
    }

    #[test]
    fn moving_the_focus_swaps_chunks_within_a_tight_pool() {
        let mut cache = cache(9);
        let mut controller = TerrainController::new();
        settle(&mut controller, Vec3::new(5.0, 0.0, 5.0), &mut cache);

        // One chunk east: three chunks leave, three arrive. Loaded chunks
        // only free their slots on the next tick, so the new requests are
        // dropped once and retried.
        settle(&mut controller, Vec3::new(15.0, 0.0, 5.0), &mut cache);
        assert_eq!(controller.center(), Some(ChunkKey::new(1, 0)));
        let expected = visible_keys(ChunkKey::new(1, 0), 2);
        for key in &expected {
            assert_eq!(cache.state_of(*key), Some(ChunkState::Loaded));
        }
        assert!(!cache.is_tracked(ChunkKey::new(-1, 0)));
        assert_eq!(cache.stats().total(), 9);
    }

    #[test]
    fn staying_in_the_same_chunk_issues_no_requests() {
        let mut cache = cache(9);
        let mut controller = TerrainController::new();
        controller.update(Vec3::new(1.0, 0.0, 1.0), &mut cache);
        let tracked = cache.stats().total() - cache.stats().pooled;
        assert_eq!(tracked, 9);

        controller.update(Vec3::new(9.0, 0.0, 9.0), &mut cache);
        assert_eq!(controller.center(), Some(ChunkKey::new(0, 0)));
        assert_eq!(controller.retry_count(), 0);
    }
}
