use std::ops::{Add, Sub};

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

/// Grid coordinate of a terrain chunk on the horizontal plane.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkKey {
    pub x: i32,
    pub z: i32,
}

impl ChunkKey {
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    pub fn neighbor(self, direction: GridDirection) -> ChunkKey {
        self + direction.offset()
    }
}

impl Add for ChunkKey {
    type Output = ChunkKey;

    fn add(self, rhs: Self) -> Self::Output {
        ChunkKey {
            x: self.x + rhs.x,
            z: self.z + rhs.z,
        }
    }
}

impl Sub for ChunkKey {
    type Output = ChunkKey;

    fn sub(self, rhs: Self) -> Self::Output {
        ChunkKey {
            x: self.x - rhs.x,
            z: self.z - rhs.z,
        }
    }
}

/// North is +z, east is +x.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum GridDirection {
    North,
    South,
    East,
    West,
}

impl GridDirection {
    pub const ALL: [GridDirection; 4] = [
        GridDirection::North,
        GridDirection::South,
        GridDirection::East,
        GridDirection::West,
    ];

    pub fn offset(self) -> ChunkKey {
        match self {
            Self::North => ChunkKey::new(0, 1),
            Self::South => ChunkKey::new(0, -1),
            Self::East => ChunkKey::new(1, 0),
            Self::West => ChunkKey::new(-1, 0),
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Self::North => Self::South,
            Self::South => Self::North,
            Self::East => Self::West,
            Self::West => Self::East,
        }
    }
}

/// Chunk containing the world-space point `(world_x, world_z)`.
pub fn world_to_chunk(world_x: f32, world_z: f32, chunk_length: f32) -> ChunkKey {
    ChunkKey {
        x: (world_x / chunk_length).floor() as i32,
        z: (world_z / chunk_length).floor() as i32,
    }
}

/// World-space position of the chunk's minimum corner.
pub fn chunk_origin(key: ChunkKey, chunk_length: f32) -> (f32, f32) {
    (key.x as f32 * chunk_length, key.z as f32 * chunk_length)
}

/// Every key whose offset from `center` lies strictly inside a disk of
/// `radius` chunks: `dx² + dz² < radius²`. Keys at exactly `radius` are
/// excluded.
pub fn visible_keys(center: ChunkKey, radius: i32) -> FxHashSet<ChunkKey> {
    let radius = radius.max(0);
    let radius_sq = radius * radius;
    let mut keys = FxHashSet::default();
    for dz in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dz * dz < radius_sq {
                keys.insert(center + ChunkKey::new(dx, dz));
            }
        }
    }
    keys
}

/// Number of keys [`visible_keys`] yields for `radius`, which is the
/// smallest chunk pool that never runs dry.
pub fn visible_key_count(radius: i32) -> usize {
    let radius = radius.max(0);
    let radius_sq = radius * radius;
    (-radius..=radius)
        .flat_map(|dz| (-radius..=radius).map(move |dx| dx * dx + dz * dz))
        .filter(|dist_sq| *dist_sq < radius_sq)
        .count()
}

#[cfg(test)]
mod tests {
    use super::{
        chunk_origin, visible_key_count, visible_keys, world_to_chunk, ChunkKey, GridDirection,
    };

    #[test]
    fn world_to_chunk_floors_negative_coordinates() {
        assert_eq!(world_to_chunk(0.0, 0.0, 64.0), ChunkKey::new(0, 0));
        assert_eq!(world_to_chunk(-0.1, 63.9, 64.0), ChunkKey::new(-1, 0));
        assert_eq!(world_to_chunk(128.0, -128.5, 64.0), ChunkKey::new(2, -3));
        assert_eq!(chunk_origin(ChunkKey::new(-2, 3), 64.0), (-128.0, 192.0));
    }

    #[test]
    fn visible_keys_excludes_the_exact_radius_boundary() {
        let keys = visible_keys(ChunkKey::new(0, 0), 2);
        assert!(keys.contains(&ChunkKey::new(1, 1)));
        assert!(!keys.contains(&ChunkKey::new(2, 0)));
        assert!(!keys.contains(&ChunkKey::new(0, -2)));
        assert_eq!(keys.len(), 9);

        assert!(visible_keys(ChunkKey::new(5, 5), 0).is_empty());
        assert_eq!(visible_keys(ChunkKey::new(5, 5), 1).len(), 1);
    }

    #[test]
    fn visible_keys_is_symmetric_under_quarter_turns() {
        for radius in 0..9 {
            let keys = visible_keys(ChunkKey::new(0, 0), radius);
            for key in &keys {
                let rotated = ChunkKey::new(-key.z, key.x);
                assert!(keys.contains(&rotated), "radius {radius}: {key:?} rotated missing");
            }
        }
    }

    #[test]
    fn visible_keys_is_translation_invariant() {
        for radius in 0..9 {
            let base = visible_keys(ChunkKey::new(0, 0), radius);
            for center in [ChunkKey::new(7, -3), ChunkKey::new(-100, 42)] {
                let moved = visible_keys(center, radius);
                assert_eq!(moved.len(), base.len());
                assert_eq!(moved.len(), visible_key_count(radius));
                for key in &base {
                    assert!(moved.contains(&(*key + center)));
                }
            }
        }
    }

    #[test]
    fn grid_directions_are_inverse_pairs() {
        let key = ChunkKey::new(3, -4);
        for direction in GridDirection::ALL {
            assert_eq!(key.neighbor(direction).neighbor(direction.opposite()), key);
        }
        assert_eq!(key.neighbor(GridDirection::North), ChunkKey::new(3, -3));
        assert_eq!(key.neighbor(GridDirection::West), ChunkKey::new(2, -4));
    }
}
