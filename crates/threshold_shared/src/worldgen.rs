use noise::{NoiseFn, Perlin};

use crate::chunk::{ChunkTexture, HeightMap};
use crate::coords::{chunk_origin, ChunkKey};

const SAND_LEVEL: f32 = 0.28;
const GRASS_LEVEL: f32 = 0.6;
const ROCK_LEVEL: f32 = 0.8;
const STEEP_SLOPE: f32 = 1.0;

const SAND: [u8; 4] = [194, 178, 128, 255];
const GRASS: [u8; 4] = [86, 125, 70, 255];
const ROCK: [u8; 4] = [120, 118, 114, 255];
const SNOW: [u8; 4] = [240, 240, 245, 255];

/// Deterministic terrain height field. `sample` returns a value in `[0, 1]`
/// and must return the same value for the same coordinate on every call.
pub trait HeightSource: Send + Sync {
    fn sample(&self, world_x: f64, world_z: f64) -> f32;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoiseLayer {
    pub frequency: f64,
    pub weight: f64,
}

/// Weighted sum of Perlin layers, normalised by the total weight.
#[derive(Debug, Clone)]
pub struct LayeredNoise {
    layers: Vec<(NoiseLayer, Perlin)>,
    total_weight: f64,
}

impl LayeredNoise {
    pub fn new(seed: u32, layers: &[NoiseLayer]) -> Self {
        let layers: Vec<(NoiseLayer, Perlin)> = layers
            .iter()
            .filter(|layer| layer.weight > 0.0)
            .enumerate()
            .map(|(index, layer)| (*layer, Perlin::new(seed.wrapping_add(index as u32 * 7919))))
            .collect();
        let total_weight = layers.iter().map(|(layer, _)| layer.weight).sum();
        Self {
            layers,
            total_weight,
        }
    }

    /// Rolling hills with a long-wavelength base and two detail octaves.
    pub fn hills(seed: u32) -> Self {
        Self::new(
            seed,
            &[
                NoiseLayer {
                    frequency: 0.0025,
                    weight: 0.6,
                },
                NoiseLayer {
                    frequency: 0.011,
                    weight: 0.3,
                },
                NoiseLayer {
                    frequency: 0.047,
                    weight: 0.1,
                },
            ],
        )
    }
}

impl HeightSource for LayeredNoise {
    fn sample(&self, world_x: f64, world_z: f64) -> f32 {
        if self.total_weight <= 0.0 {
            return 0.0;
        }

        let sum: f64 = self
            .layers
            .iter()
            .map(|(layer, perlin)| {
                let value = perlin.get([world_x * layer.frequency, world_z * layer.frequency]);
                (value * 0.5 + 0.5) * layer.weight
            })
            .sum();
        (sum / self.total_weight).clamp(0.0, 1.0) as f32
    }
}

/// Fills `heights` for the chunk at `key`. Sample `(ix, iz)` sits at
/// `origin + (ix, iz) / (resolution - 1) * chunk_length`, so the last row and
/// column coincide with the neighbour's first.
pub fn generate_heights(
    source: &dyn HeightSource,
    key: ChunkKey,
    chunk_length: f32,
    heights: &mut HeightMap,
) {
    let resolution = heights.resolution();
    if resolution == 0 {
        return;
    }

    let (origin_x, origin_z) = chunk_origin(key, chunk_length);
    let step = if resolution > 1 {
        f64::from(chunk_length) / (resolution - 1) as f64
    } else {
        0.0
    };
    for iz in 0..resolution {
        for ix in 0..resolution {
            let world_x = f64::from(origin_x) + ix as f64 * step;
            let world_z = f64::from(origin_z) + iz as f64 * step;
            heights.set(ix, iz, source.sample(world_x, world_z));
        }
    }
}

/// Splat colour per height sample: banded by height, rock on steep slopes.
pub fn generate_texture(
    heights: &HeightMap,
    chunk_length: f32,
    height_scale: f32,
    texture: &mut ChunkTexture,
) {
    let resolution = heights.resolution().min(texture.resolution());
    if resolution == 0 {
        return;
    }

    let spacing = if resolution > 1 {
        chunk_length / (resolution - 1) as f32
    } else {
        chunk_length
    };
    for iz in 0..resolution {
        for ix in 0..resolution {
            let height = heights.get(ix, iz);
            let slope = slope_at(heights, ix, iz, resolution) * height_scale / spacing.max(f32::EPSILON);
            texture.set(ix, iz, splat_color(height, slope));
        }
    }
}

fn slope_at(heights: &HeightMap, ix: usize, iz: usize, resolution: usize) -> f32 {
    let x0 = ix.saturating_sub(1);
    let x1 = (ix + 1).min(resolution - 1);
    let z0 = iz.saturating_sub(1);
    let z1 = (iz + 1).min(resolution - 1);

    let dx = if x1 > x0 {
        (heights.get(x1, iz) - heights.get(x0, iz)) / (x1 - x0) as f32
    } else {
        0.0
    };
    let dz = if z1 > z0 {
        (heights.get(ix, z1) - heights.get(ix, z0)) / (z1 - z0) as f32
    } else {
        0.0
    };
    (dx * dx + dz * dz).sqrt()
}

fn splat_color(height: f32, slope: f32) -> [u8; 4] {
    if slope > STEEP_SLOPE {
        return ROCK;
    }
    if height < SAND_LEVEL {
        SAND
    } else if height < GRASS_LEVEL {
        GRASS
    } else if height < ROCK_LEVEL {
        ROCK
    } else {
        SNOW
    }
}

#[cfg(test)]
mod tests {
    use super::{
        generate_heights, generate_texture, HeightSource, LayeredNoise, NoiseLayer, GRASS, ROCK,
        SNOW,
    };
    use crate::chunk::{ChunkTexture, HeightMap};
    use crate::coords::ChunkKey;

    struct Ramp;

    impl HeightSource for Ramp {
        fn sample(&self, world_x: f64, _world_z: f64) -> f32 {
            (world_x / 100.0).clamp(0.0, 1.0) as f32
        }
    }

    #[test]
    fn layered_noise_is_deterministic_and_bounded() {
        let a = LayeredNoise::hills(7);
        let b = LayeredNoise::hills(7);
        for i in 0..200 {
            let x = i as f64 * 13.7 - 900.0;
            let z = i as f64 * -5.3 + 41.0;
            let value = a.sample(x, z);
            assert!((0.0..=1.0).contains(&value));
            assert_eq!(value, b.sample(x, z));
        }
    }

    #[test]
    fn weights_that_do_not_sum_to_one_still_blend() {
        let noise = LayeredNoise::new(
            3,
            &[
                NoiseLayer {
                    frequency: 0.01,
                    weight: 2.0,
                },
                NoiseLayer {
                    frequency: 0.05,
                    weight: 5.0,
                },
            ],
        );
        let any_nonzero = (0..50).any(|i| noise.sample(i as f64 * 17.3 + 0.5, 3.1) > 0.0);
        assert!(any_nonzero);
        assert_eq!(LayeredNoise::new(3, &[]).sample(1.0, 1.0), 0.0);
    }

    #[test]
    fn adjacent_chunks_share_edge_samples() {
        let mut west = HeightMap::new(5);
        let mut east = HeightMap::new(5);
        generate_heights(&Ramp, ChunkKey::new(0, 0), 40.0, &mut west);
        generate_heights(&Ramp, ChunkKey::new(1, 0), 40.0, &mut east);

        for iz in 0..5 {
            assert_eq!(west.get(4, iz), east.get(0, iz));
        }
        assert!((west.get(2, 0) - 0.2).abs() < 1e-6);
    }

    #[test]
    fn texture_bands_follow_height_and_slope() {
        let mut flat_high = HeightMap::new(3);
        for iz in 0..3 {
            for ix in 0..3 {
                flat_high.set(ix, iz, 0.9);
            }
        }
        let mut texture = ChunkTexture::new(3);
        generate_texture(&flat_high, 10.0, 50.0, &mut texture);
        assert!(texture.texels().iter().all(|texel| *texel == SNOW));

        let mut cliff = HeightMap::new(3);
        for iz in 0..3 {
            cliff.set(0, iz, 0.4);
            cliff.set(1, iz, 0.45);
            cliff.set(2, iz, 0.9);
        }
        generate_texture(&cliff, 10.0, 50.0, &mut texture);
        assert_eq!(texture.get(1, 1), ROCK);

        let mut gentle = HeightMap::new(3);
        for iz in 0..3 {
            for ix in 0..3 {
                gentle.set(ix, iz, 0.4 + ix as f32 * 0.001);
            }
        }
        generate_texture(&gentle, 10.0, 50.0, &mut texture);
        assert_eq!(texture.get(1, 1), GRASS);
    }
}
