use crate::coords::{ChunkKey, GridDirection};

/// Pipeline stage of a terrain chunk. Tracked chunks move strictly forward
/// through the stages; any of them may drop back to `Pooled`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ChunkState {
    Pooled,
    ToGenerateHeight,
    GeneratingHeight,
    HeightReady,
    GeneratingTexture,
    Loaded,
}

impl ChunkState {
    pub fn next(self) -> Option<ChunkState> {
        match self {
            Self::Pooled => Some(Self::ToGenerateHeight),
            Self::ToGenerateHeight => Some(Self::GeneratingHeight),
            Self::GeneratingHeight => Some(Self::HeightReady),
            Self::HeightReady => Some(Self::GeneratingTexture),
            Self::GeneratingTexture => Some(Self::Loaded),
            Self::Loaded => None,
        }
    }

    /// Background work owns the chunk's buffers in these states.
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::GeneratingHeight | Self::GeneratingTexture)
    }
}

/// Square grid of height samples in `[0, 1]`. Edge samples are shared with
/// the neighbouring chunk so adjacent tiles meet without seams.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HeightMap {
    resolution: usize,
    samples: Vec<f32>,
}

impl HeightMap {
    pub fn new(resolution: usize) -> Self {
        Self {
            resolution,
            samples: vec![0.0; resolution * resolution],
        }
    }

    pub fn resolution(&self) -> usize {
        self.resolution
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn is_allocated(&self) -> bool {
        !self.samples.is_empty()
    }

    pub fn get(&self, ix: usize, iz: usize) -> f32 {
        self.samples[iz * self.resolution + ix]
    }

    pub fn set(&mut self, ix: usize, iz: usize, value: f32) {
        self.samples[iz * self.resolution + ix] = value;
    }

    /// Zeroes every sample, keeping the allocation.
    pub fn clear(&mut self) {
        self.samples.fill(0.0);
    }

    /// Bilinear sample at normalised chunk-local coordinates.
    pub fn sample_bilinear(&self, u: f32, v: f32) -> f32 {
        if self.resolution < 2 {
            return self.samples.first().copied().unwrap_or(0.0);
        }

        let max = (self.resolution - 1) as f32;
        let fx = u.clamp(0.0, 1.0) * max;
        let fz = v.clamp(0.0, 1.0) * max;
        let x0 = (fx.floor() as usize).min(self.resolution - 2);
        let z0 = (fz.floor() as usize).min(self.resolution - 2);
        let tx = fx - x0 as f32;
        let tz = fz - z0 as f32;

        let h00 = self.get(x0, z0);
        let h10 = self.get(x0 + 1, z0);
        let h01 = self.get(x0, z0 + 1);
        let h11 = self.get(x0 + 1, z0 + 1);
        let near = h00 + (h10 - h00) * tx;
        let far = h01 + (h11 - h01) * tx;
        near + (far - near) * tz
    }
}

/// Per-sample RGBA splat colours derived from a chunk's heights.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChunkTexture {
    resolution: usize,
    texels: Vec<[u8; 4]>,
}

impl ChunkTexture {
    pub fn new(resolution: usize) -> Self {
        Self {
            resolution,
            texels: vec![[0; 4]; resolution * resolution],
        }
    }

    pub fn resolution(&self) -> usize {
        self.resolution
    }

    pub fn texels(&self) -> &[[u8; 4]] {
        &self.texels
    }

    pub fn get(&self, ix: usize, iz: usize) -> [u8; 4] {
        self.texels[iz * self.resolution + ix]
    }

    pub fn set(&mut self, ix: usize, iz: usize, texel: [u8; 4]) {
        self.texels[iz * self.resolution + ix] = texel;
    }

    pub fn clear(&mut self) {
        self.texels.fill([0; 4]);
    }
}

/// Keys of the four grid neighbours currently loaded next to a chunk.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ChunkNeighbors {
    pub north: Option<ChunkKey>,
    pub south: Option<ChunkKey>,
    pub east: Option<ChunkKey>,
    pub west: Option<ChunkKey>,
}

impl ChunkNeighbors {
    pub fn get(&self, direction: GridDirection) -> Option<ChunkKey> {
        match direction {
            GridDirection::North => self.north,
            GridDirection::South => self.south,
            GridDirection::East => self.east,
            GridDirection::West => self.west,
        }
    }

    pub fn set(&mut self, direction: GridDirection, key: Option<ChunkKey>) {
        match direction {
            GridDirection::North => self.north = key,
            GridDirection::South => self.south = key,
            GridDirection::East => self.east = key,
            GridDirection::West => self.west = key,
        }
    }

    pub fn is_complete(&self) -> bool {
        GridDirection::ALL
            .into_iter()
            .all(|direction| self.get(direction).is_some())
    }
}

/// One pooled terrain tile.
#[derive(Debug)]
pub struct TerrainChunk {
    key: Option<ChunkKey>,
    state: ChunkState,
    resolution: usize,
    pub heights: HeightMap,
    pub texture: ChunkTexture,
    pub neighbors: ChunkNeighbors,
}

impl TerrainChunk {
    pub fn new_pooled(resolution: usize) -> Self {
        Self {
            key: None,
            state: ChunkState::Pooled,
            resolution,
            heights: HeightMap::new(resolution),
            texture: ChunkTexture::new(resolution),
            neighbors: ChunkNeighbors::default(),
        }
    }

    pub fn key(&self) -> Option<ChunkKey> {
        self.key
    }

    pub fn state(&self) -> ChunkState {
        self.state
    }

    pub fn resolution(&self) -> usize {
        self.resolution
    }

    /// Checks a pooled chunk out for `key`.
    pub fn assign(&mut self, key: ChunkKey) {
        debug_assert_eq!(self.state, ChunkState::Pooled, "assigning a chunk that is in use");
        self.key = Some(key);
        self.state = ChunkState::ToGenerateHeight;
    }

    /// Moves one stage forward. Stages are never skipped.
    pub fn advance(&mut self) -> ChunkState {
        let next = self
            .state
            .next()
            .filter(|next| *next != ChunkState::ToGenerateHeight);
        debug_assert!(next.is_some(), "chunk in {:?} has no next stage", self.state);
        if let Some(next) = next {
            self.state = next;
        }
        self.state
    }

    /// Returns the chunk to the pool: key dropped, buffers zeroed, neighbour
    /// links removed. Must not be called while background work owns the
    /// buffers.
    pub fn reset(&mut self) {
        debug_assert!(!self.state.is_in_flight(), "resetting an in-flight chunk");
        self.key = None;
        self.state = ChunkState::Pooled;
        if self.heights.is_allocated() {
            self.heights.clear();
        } else {
            self.heights = HeightMap::new(self.resolution);
        }
        if self.texture.texels().is_empty() {
            self.texture = ChunkTexture::new(self.resolution);
        } else {
            self.texture.clear();
        }
        self.neighbors = ChunkNeighbors::default();
    }
}

#[cfg(test)]
mod tests {
    use super::{ChunkNeighbors, ChunkState, HeightMap, TerrainChunk};
    use crate::coords::{ChunkKey, GridDirection};

    #[test]
    fn chunk_walks_every_stage_in_order() {
        let mut chunk = TerrainChunk::new_pooled(5);
        chunk.assign(ChunkKey::new(2, -1));
        assert_eq!(chunk.state(), ChunkState::ToGenerateHeight);
        assert_eq!(chunk.advance(), ChunkState::GeneratingHeight);
        assert!(chunk.state().is_in_flight());
        assert_eq!(chunk.advance(), ChunkState::HeightReady);
        assert_eq!(chunk.advance(), ChunkState::GeneratingTexture);
        assert_eq!(chunk.advance(), ChunkState::Loaded);
        assert_eq!(chunk.key(), Some(ChunkKey::new(2, -1)));
    }

    #[test]
    fn reset_clears_key_heights_and_links() {
        let mut chunk = TerrainChunk::new_pooled(3);
        chunk.assign(ChunkKey::new(0, 0));
        chunk.heights.set(1, 1, 0.75);
        chunk.neighbors.set(GridDirection::East, Some(ChunkKey::new(1, 0)));

        chunk.reset();

        assert_eq!(chunk.state(), ChunkState::Pooled);
        assert_eq!(chunk.key(), None);
        assert_eq!(chunk.heights.get(1, 1), 0.0);
        assert_eq!(chunk.heights.samples().len(), 9);
        assert_eq!(chunk.neighbors, ChunkNeighbors::default());
    }

    #[test]
    fn reset_reallocates_buffers_that_were_moved_out() {
        let mut chunk = TerrainChunk::new_pooled(4);
        chunk.assign(ChunkKey::new(0, 0));
        let _taken = std::mem::take(&mut chunk.heights);
        chunk.reset();
        assert_eq!(chunk.heights.samples().len(), 16);
    }

    #[test]
    fn bilinear_sampling_interpolates_between_corners() {
        let mut heights = HeightMap::new(2);
        heights.set(0, 0, 0.0);
        heights.set(1, 0, 1.0);
        heights.set(0, 1, 0.0);
        heights.set(1, 1, 1.0);

        assert!((heights.sample_bilinear(0.5, 0.5) - 0.5).abs() < 1e-6);
        assert!((heights.sample_bilinear(1.0, 0.0) - 1.0).abs() < 1e-6);
        assert!((heights.sample_bilinear(-3.0, 0.2) - 0.0).abs() < 1e-6);
    }

    #[test]
    fn neighbors_complete_only_with_all_four_edges() {
        let mut neighbors = ChunkNeighbors::default();
        for direction in [GridDirection::North, GridDirection::South, GridDirection::East] {
            neighbors.set(direction, Some(ChunkKey::new(0, 0).neighbor(direction)));
        }
        assert!(!neighbors.is_complete());
        neighbors.set(GridDirection::West, Some(ChunkKey::new(-1, 0)));
        assert!(neighbors.is_complete());
    }
}
