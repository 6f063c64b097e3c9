//! Brick Pool Data - Pure DOP
//!
//! NO METHODS. Just data.
//! All transformations happen in brick_pool_operations.rs

use super::word_buffer::WordBuffer;
use serde::{Deserialize, Serialize};

/// Payload channel stored per brick
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum BrickChannel {
    Color = 0,
    Normal = 1,
    Irradiance = 2,
}

/// Brick storage: 27 `[f32; 4]` voxels per brick for every enabled channel, plus the
/// fixed-point accumulators fragments average into before the leaf resolve
pub struct BrickPool {
    /// Bricks per channel
    pub capacity: u32,
    /// Indexed by `BrickChannel as usize`; irradiance is absent when disabled
    pub channels: Vec<WordBuffer>,
    pub accumulators: WordBuffer,
}
