//! Brick Pool Operations - Pure DOP Functions

use super::brick_pool_data::{BrickChannel, BrickPool};
use super::word_buffer::WordBuffer;
use crate::config::SvoConfig;
use crate::constants::brick::{ACCUMULATOR_WORDS, BRICK_SIDE, CENTER_VOXEL, VOXELS_PER_BRICK};
use crate::error::{SvoError, SvoResult};
use glam::{IVec3, UVec3, Vec4};

/// Words per voxel (`[f32; 4]`)
pub const VOXEL_WORDS: usize = 4;

impl BrickChannel {
    pub const ALL: [BrickChannel; 3] = [
        BrickChannel::Color,
        BrickChannel::Normal,
        BrickChannel::Irradiance,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            BrickChannel::Color => "color",
            BrickChannel::Normal => "normal",
            BrickChannel::Irradiance => "irradiance",
        }
    }

    /// Channels enabled by `config`, in storage order
    pub fn enabled(config: &SvoConfig) -> &'static [BrickChannel] {
        &Self::ALL[..config.channel_count()]
    }
}

pub fn create_brick_pool(config: &SvoConfig) -> BrickPool {
    let capacity = config.brick_pool_capacity;
    let voxel_words = capacity as usize * VOXELS_PER_BRICK as usize * VOXEL_WORDS;
    let channels = BrickChannel::enabled(config)
        .iter()
        .map(|channel| {
            let label = match channel {
                BrickChannel::Color => "brick_pool_color",
                BrickChannel::Normal => "brick_pool_normal",
                BrickChannel::Irradiance => "brick_pool_irradiance",
            };
            WordBuffer::new(label, voxel_words)
        })
        .collect();
    BrickPool {
        capacity,
        channels,
        accumulators: WordBuffer::new(
            "brick_accumulators",
            capacity as usize * ACCUMULATOR_WORDS as usize,
        ),
    }
}

/// Storage for `channel`, or an error naming the pass that asked for a disabled channel
pub fn channel_storage<'a>(
    pool: &'a BrickPool,
    channel: BrickChannel,
    pass: &str,
) -> SvoResult<&'a WordBuffer> {
    pool.channels
        .get(channel.index())
        .ok_or_else(|| SvoError::PassUnsupported {
            pass: pass.to_string(),
            reason: format!("{} channel is disabled", channel.name()),
        })
}

/// Linear voxel index for brick coordinates in 0..3
#[inline]
pub fn voxel_index(voxel: UVec3) -> u32 {
    voxel.x + BRICK_SIDE * voxel.y + BRICK_SIDE * BRICK_SIDE * voxel.z
}

/// Brick coordinates of linear voxel `index`
#[inline]
pub fn voxel_coords(index: u32) -> UVec3 {
    UVec3::new(
        index % BRICK_SIDE,
        (index / BRICK_SIDE) % BRICK_SIDE,
        index / (BRICK_SIDE * BRICK_SIDE),
    )
}

/// Voxel holding data for the region one node away along `offset` (components in -1..=1)
#[inline]
pub fn voxel_for_offset(offset: IVec3) -> u32 {
    voxel_index((offset + IVec3::ONE).as_uvec3())
}

/// Offset from the centre of linear voxel `index`
#[inline]
pub fn offset_for_voxel(index: u32) -> IVec3 {
    voxel_coords(index).as_ivec3() - IVec3::ONE
}

#[inline]
fn voxel_word(brick: u32, voxel: u32) -> usize {
    (brick as usize * VOXELS_PER_BRICK as usize + voxel as usize) * VOXEL_WORDS
}

pub fn read_voxel(storage: &WordBuffer, brick: u32, voxel: u32) -> Vec4 {
    let base = voxel_word(brick, voxel);
    Vec4::new(
        storage.load_f32(base),
        storage.load_f32(base + 1),
        storage.load_f32(base + 2),
        storage.load_f32(base + 3),
    )
}

pub fn write_voxel(storage: &WordBuffer, brick: u32, voxel: u32, value: Vec4) {
    let base = voxel_word(brick, voxel);
    for (i, component) in value.to_array().into_iter().enumerate() {
        storage.store_f32(base + i, component);
    }
}

pub fn read_center(storage: &WordBuffer, brick: u32) -> Vec4 {
    read_voxel(storage, brick, CENTER_VOXEL)
}

/// Word offset of accumulator `field` for `brick`
#[inline]
pub fn accumulator_word(brick: u32, field: u32) -> usize {
    (brick * ACCUMULATOR_WORDS + field) as usize
}

/// Zero every channel and accumulator
pub fn clear_bricks(pool: &BrickPool) {
    for storage in &pool.channels {
        storage.clear();
    }
    pool.accumulators.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voxel_indexing() {
        assert_eq!(voxel_index(UVec3::ONE), CENTER_VOXEL);
        assert_eq!(voxel_for_offset(IVec3::ZERO), CENTER_VOXEL);
        assert_eq!(voxel_for_offset(IVec3::new(1, 0, 0)), 14);
        assert_eq!(voxel_for_offset(IVec3::new(-1, -1, -1)), 0);
        assert_eq!(voxel_for_offset(IVec3::ONE), VOXELS_PER_BRICK - 1);
        for index in 0..VOXELS_PER_BRICK {
            assert_eq!(voxel_for_offset(offset_for_voxel(index)), index);
        }
    }

    #[test]
    fn test_channels_follow_config() {
        let mut config = SvoConfig::with_resolution(8);
        config.brick_pool_capacity = 4;
        let pool = create_brick_pool(&config);
        assert_eq!(pool.channels.len(), 2);
        assert!(channel_storage(&pool, BrickChannel::Irradiance, "test").is_err());

        config.irradiance = true;
        let pool = create_brick_pool(&config);
        assert_eq!(pool.channels.len(), 3);
        assert_eq!(pool.accumulators.len(), 4 * ACCUMULATOR_WORDS as usize);
    }

    #[test]
    fn test_voxel_read_write() {
        let mut config = SvoConfig::with_resolution(8);
        config.brick_pool_capacity = 2;
        let pool = create_brick_pool(&config);
        let storage = channel_storage(&pool, BrickChannel::Color, "test")
            .expect("Failed to get color channel");

        let value = Vec4::new(0.25, 0.5, 0.75, 1.0);
        write_voxel(storage, 1, CENTER_VOXEL, value);
        assert_eq!(read_center(storage, 1), value);
        assert_eq!(read_center(storage, 0), Vec4::ZERO);

        clear_bricks(&pool);
        assert_eq!(read_center(storage, 1), Vec4::ZERO);
    }
}
