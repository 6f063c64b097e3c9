//! Shared constants for the SVO construction pipeline
//!
//! Every value here is mirrored by the WGSL kernels in `shaders/compute/svo_construction.wgsl`.
//! Change both sides together.

/// Octree layout
pub mod octree {
    /// Stored pointer value meaning "not allocated". Pointers are 1-based.
    pub const NULL_POINTER: u32 = 0;

    /// Children per node, allocated as one contiguous block
    pub const CHILDREN_PER_NODE: u32 = 8;

    /// Upper bound on octree levels (resolution 2048 → 11 levels)
    pub const MAX_LEVELS: usize = 16;

    /// Largest supported finest-grid resolution
    pub const MAX_RESOLUTION: u32 = 2048;

    /// Bits per axis in a packed node position
    pub const POSITION_BITS: u32 = 10;
    pub const POSITION_MASK: u32 = (1 << POSITION_BITS) - 1;

    /// Node touched by at least one voxel fragment
    pub const FLAG_TOUCHED: u32 = 1 << 0;
    /// Child block claimed by an allocate thread (first writer wins)
    pub const FLAG_CLAIMED: u32 = 1 << 1;

    /// Face neighbours stored per node: +X, -X, +Y, -Y, +Z, -Z
    pub const NEIGHBOURS_PER_NODE: usize = 6;
}

/// Brick layout
pub mod brick {
    /// Brick side length in voxels
    pub const BRICK_SIDE: u32 = 3;
    /// Voxels per brick
    pub const VOXELS_PER_BRICK: u32 = BRICK_SIDE * BRICK_SIDE * BRICK_SIDE;
    /// Index of the centre voxel (1, 1, 1)
    pub const CENTER_VOXEL: u32 = 13;

    /// Accumulator words per brick: rgba sums, normal xyz sums, count, irradiance rgb sums, pad
    pub const ACCUMULATOR_WORDS: u32 = 12;
    pub const ACC_COLOR: u32 = 0;
    pub const ACC_NORMAL: u32 = 4;
    pub const ACC_COUNT: u32 = 7;
    pub const ACC_IRRADIANCE: u32 = 8;

    /// Fixed-point scale for colour and normal sums (RGBA8 precision)
    pub const UNORM8_SCALE: f32 = 255.0;
    /// Fixed-point scale for irradiance sums (8.8)
    pub const IRRADIANCE_SCALE: f32 = 256.0;
    /// Largest irradiance value one fragment may contribute
    pub const IRRADIANCE_MAX: f32 = 255.0;
}

/// Allocation counter slots (word offsets into the counter buffer)
pub mod counters {
    pub const FRAGMENT_COUNT: usize = 0;
    pub const BRICK_COUNT: usize = 1;
    pub const DROPPED_FRAGMENTS: usize = 2;
    pub const DROPPED_BLOCKS: usize = 3;
    pub const DROPPED_BRICKS: usize = 4;
    /// Per-level block counters start here; level `l` uses `LEVEL_BLOCKS + l`
    pub const LEVEL_BLOCKS: usize = 8;
    pub const COUNTER_WORDS: usize = LEVEL_BLOCKS + super::octree::MAX_LEVELS;
}

/// Dispatch layout
pub mod dispatch {
    /// Threads per workgroup for every construction kernel
    pub const WORKGROUP_SIZE: u32 = 64;

    /// Words per indirect slot: groups x, y, z, item count
    pub const INDIRECT_SLOT_WORDS: usize = 4;
    pub const INDIRECT_SLOT_BYTES: u64 = (INDIRECT_SLOT_WORDS * 4) as u64;
}

/// Configuration defaults
pub mod defaults {
    pub const VOXEL_GRID_RESOLUTION: u32 = 128;
    pub const FRAGMENT_CAPACITY: u32 = 1 << 20;
    pub const MAX_NODES_PER_LEVEL: u32 = 1 << 18;
    pub const BRICK_POOL_CAPACITY: u32 = 1 << 16;
    pub const VOLUME_SIZE: f32 = 2.0;
}
