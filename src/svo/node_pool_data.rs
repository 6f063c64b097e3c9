//! Node Pool Data - Pure DOP
//!
//! NO METHODS. Just data.
//! All transformations happen in node_pool_operations.rs

use super::word_buffer::WordBuffer;
use bytemuck::{Pod, Zeroable};

/// Octree node slot stored on GPU
///
/// An all-zero slot is an untouched node without children or brick.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct NodeSlot {
    /// 1-based child block index in the next level's arena (0 = no children)
    pub child: u32,
    /// Bit 0: touched by a fragment. Bit 1: child block claimed.
    pub flags: u32,
    /// 1-based brick index (0 = no brick)
    pub brick: u32,
    /// Level-local coordinates, 10 bits per axis (x low)
    pub position: u32,
}

static_assertions::const_assert_eq!(std::mem::size_of::<NodeSlot>(), 16);

pub const NODE_WORDS: usize = std::mem::size_of::<NodeSlot>() / 4;

/// Word offsets inside a node slot
pub const NODE_CHILD: usize = 0;
pub const NODE_FLAGS: usize = 1;
pub const NODE_BRICK: usize = 2;
pub const NODE_POSITION: usize = 3;

/// Node address inside the level arenas
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeRef {
    pub level: usize,
    /// 0-based slot index within the level
    pub index: u32,
}

/// Fixed-capacity arena holding one octree level
pub struct LevelArena {
    pub level: usize,
    /// Node slots (always a whole number of 8-blocks, except the root level)
    pub capacity: u32,
    pub nodes: WordBuffer,
    /// Six 1-based neighbour pointers per node: +X, -X, +Y, -Y, +Z, -Z
    pub neighbours: WordBuffer,
}

/// Array-of-levels node pool
pub struct NodePool {
    pub levels: Vec<LevelArena>,
}
