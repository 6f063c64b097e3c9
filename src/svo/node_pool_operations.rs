//! Node Pool Operations - Pure DOP Functions
//!
//! Free functions over `NodePool`. Kernels running on the CPU executor call these from many
//! threads at once, so every mutation goes through the arena's atomic words.

use super::node_pool_data::{
    LevelArena, NodePool, NodeRef, NodeSlot, NODE_BRICK, NODE_CHILD, NODE_FLAGS, NODE_POSITION,
    NODE_WORDS,
};
use super::word_buffer::WordBuffer;
use crate::config::SvoConfig;
use crate::constants::octree::{
    CHILDREN_PER_NODE, NEIGHBOURS_PER_NODE, NULL_POINTER, POSITION_BITS, POSITION_MASK,
};
use glam::{IVec3, UVec3};

/// Face directions in neighbour-table order
pub const FACE_DIRECTIONS: [IVec3; NEIGHBOURS_PER_NODE] = [
    IVec3::new(1, 0, 0),
    IVec3::new(-1, 0, 0),
    IVec3::new(0, 1, 0),
    IVec3::new(0, -1, 0),
    IVec3::new(0, 0, 1),
    IVec3::new(0, 0, -1),
];

/// Create the per-level arenas for `config`
pub fn create_node_pool(config: &SvoConfig) -> NodePool {
    let levels = (0..config.num_levels())
        .map(|level| {
            let capacity = config.level_capacity(level);
            LevelArena {
                level,
                capacity,
                nodes: WordBuffer::new("node_pool", capacity as usize * NODE_WORDS),
                neighbours: WordBuffer::new(
                    "node_neighbours",
                    capacity as usize * NEIGHBOURS_PER_NODE,
                ),
            }
        })
        .collect();
    NodePool { levels }
}

/// Total node slots across all levels
pub fn total_capacity(pool: &NodePool) -> u64 {
    pool.levels.iter().map(|arena| arena.capacity as u64).sum()
}

/// Encode a 0-based index as a stored pointer
#[inline]
pub fn encode_pointer(index: u32) -> u32 {
    index + 1
}

/// Decode a stored pointer, `None` for NULL
#[inline]
pub fn decode_pointer(pointer: u32) -> Option<u32> {
    (pointer != NULL_POINTER).then(|| pointer - 1)
}

/// Pack level-local coordinates into one word
#[inline]
pub fn pack_position(position: UVec3) -> u32 {
    (position.x & POSITION_MASK)
        | ((position.y & POSITION_MASK) << POSITION_BITS)
        | ((position.z & POSITION_MASK) << (2 * POSITION_BITS))
}

#[inline]
pub fn unpack_position(packed: u32) -> UVec3 {
    UVec3::new(
        packed & POSITION_MASK,
        (packed >> POSITION_BITS) & POSITION_MASK,
        (packed >> (2 * POSITION_BITS)) & POSITION_MASK,
    )
}

/// Octant of child `position` inside its parent (x = bit 0, y = bit 1, z = bit 2)
#[inline]
pub fn octant_of(position: UVec3) -> u32 {
    (position.x & 1) | ((position.y & 1) << 1) | ((position.z & 1) << 2)
}

/// Offset of child `octant` relative to `2 * parent_position`
#[inline]
pub fn octant_offset(octant: u32) -> UVec3 {
    UVec3::new(octant & 1, (octant >> 1) & 1, (octant >> 2) & 1)
}

/// Coordinates of the node at `level` containing finest voxel `voxel`
#[inline]
pub fn level_position(config: &SvoConfig, voxel: UVec3, level: usize) -> UVec3 {
    voxel >> (config.num_levels() - level) as u32
}

#[inline]
fn word(slot: u32, field: usize) -> usize {
    slot as usize * NODE_WORDS + field
}

pub fn read_slot(pool: &NodePool, node: NodeRef) -> NodeSlot {
    let nodes = &pool.levels[node.level].nodes;
    NodeSlot {
        child: nodes.load(word(node.index, NODE_CHILD)),
        flags: nodes.load(word(node.index, NODE_FLAGS)),
        brick: nodes.load(word(node.index, NODE_BRICK)),
        position: nodes.load(word(node.index, NODE_POSITION)),
    }
}

pub fn child_block(pool: &NodePool, node: NodeRef) -> Option<u32> {
    decode_pointer(pool.levels[node.level].nodes.load(word(node.index, NODE_CHILD)))
}

pub fn set_child_block(pool: &NodePool, node: NodeRef, block: u32) {
    pool.levels[node.level]
        .nodes
        .store(word(node.index, NODE_CHILD), encode_pointer(block));
}

pub fn flags(pool: &NodePool, node: NodeRef) -> u32 {
    pool.levels[node.level].nodes.load(word(node.index, NODE_FLAGS))
}

/// Atomically OR `flag` into the node, returning the previous flags
pub fn set_flag(pool: &NodePool, node: NodeRef, flag: u32) -> u32 {
    pool.levels[node.level]
        .nodes
        .fetch_or(word(node.index, NODE_FLAGS), flag)
}

pub fn brick(pool: &NodePool, node: NodeRef) -> Option<u32> {
    decode_pointer(pool.levels[node.level].nodes.load(word(node.index, NODE_BRICK)))
}

pub fn set_brick(pool: &NodePool, node: NodeRef, brick: u32) {
    pool.levels[node.level]
        .nodes
        .store(word(node.index, NODE_BRICK), encode_pointer(brick));
}

pub fn position(pool: &NodePool, node: NodeRef) -> UVec3 {
    unpack_position(pool.levels[node.level].nodes.load(word(node.index, NODE_POSITION)))
}

pub fn set_position(pool: &NodePool, node: NodeRef, position: UVec3) {
    pool.levels[node.level]
        .nodes
        .store(word(node.index, NODE_POSITION), pack_position(position));
}

/// Slot index of child `octant` of block `block`
#[inline]
pub fn child_index(block: u32, octant: u32) -> u32 {
    block * CHILDREN_PER_NODE + octant
}

/// Read access to child and neighbour links, shared by the live pool and published snapshots
pub trait NodeTopology {
    fn child_block(&self, node: NodeRef) -> Option<u32>;
    fn neighbour(&self, node: NodeRef, face: usize) -> Option<NodeRef>;
    /// Level-local coordinates stored in the node
    fn position(&self, node: NodeRef) -> Option<UVec3>;
}

impl NodeTopology for NodePool {
    fn child_block(&self, node: NodeRef) -> Option<u32> {
        child_block(self, node)
    }

    fn position(&self, node: NodeRef) -> Option<UVec3> {
        let arena = self.levels.get(node.level)?;
        (node.index < arena.capacity).then(|| position(self, node))
    }

    fn neighbour(&self, node: NodeRef, face: usize) -> Option<NodeRef> {
        neighbour(self, node, face)
    }
}

/// Walk from the root to the node at `target_level` containing level-local `position`
///
/// Returns `None` when an ancestor has no child block.
pub fn traverse<T: NodeTopology + ?Sized>(
    topology: &T,
    target_level: usize,
    position: UVec3,
) -> Option<NodeRef> {
    let mut node = NodeRef { level: 0, index: 0 };
    for level in 0..target_level {
        let block = topology.child_block(node)?;
        let shift = (target_level - 1 - level) as u32;
        let octant = octant_of(position >> shift);
        node = NodeRef {
            level: level + 1,
            index: child_index(block, octant),
        };
    }
    Some(node)
}

/// Neighbour pointer of `node` across `face` (index into `FACE_DIRECTIONS`)
pub fn neighbour(pool: &NodePool, node: NodeRef, face: usize) -> Option<NodeRef> {
    let table = &pool.levels[node.level].neighbours;
    decode_pointer(table.load(node.index as usize * NEIGHBOURS_PER_NODE + face)).map(|index| {
        NodeRef {
            level: node.level,
            index,
        }
    })
}

pub fn set_neighbour(pool: &NodePool, node: NodeRef, face: usize, target: Option<u32>) {
    let table = &pool.levels[node.level].neighbours;
    table.store(
        node.index as usize * NEIGHBOURS_PER_NODE + face,
        target.map_or(NULL_POINTER, encode_pointer),
    );
}

/// Face index for a unit axis step, `None` for zero
#[inline]
pub fn face_index(axis: usize, step: i32) -> Option<usize> {
    match step.signum() {
        1 => Some(axis * 2),
        -1 => Some(axis * 2 + 1),
        _ => None,
    }
}

/// Node `offset` away (components in -1..=1) at the same level
///
/// Diagonal offsets are reached by chaining one axis at a time; every axis order is tried
/// because an intermediate node may not exist along one path but exist along another. When
/// every chain breaks (both intermediates sit under unallocated parents), the target is looked
/// up from the root using the node's stored position.
pub fn neighbour_in_direction<T: NodeTopology + ?Sized>(
    topology: &T,
    node: NodeRef,
    offset: IVec3,
) -> Option<NodeRef> {
    chain_neighbours(topology, node, offset).or_else(|| {
        let target = topology.position(node)?.as_ivec3() + offset;
        let extent = 1i32 << node.level;
        let inside = target.cmpge(IVec3::ZERO).all() && target.cmplt(IVec3::splat(extent)).all();
        if !inside {
            return None;
        }
        traverse(topology, node.level, target.as_uvec3())
    })
}

fn chain_neighbours<T: NodeTopology + ?Sized>(
    topology: &T,
    node: NodeRef,
    offset: IVec3,
) -> Option<NodeRef> {
    const AXIS_ORDERS: [[usize; 3]; 6] = [
        [0, 1, 2],
        [0, 2, 1],
        [1, 0, 2],
        [1, 2, 0],
        [2, 0, 1],
        [2, 1, 0],
    ];
    let steps = offset.to_array();
    AXIS_ORDERS.iter().find_map(|order| {
        order.iter().try_fold(node, |current, &axis| match face_index(axis, steps[axis]) {
            Some(face) => topology.neighbour(current, face),
            None => Some(current),
        })
    })
}

/// Reset every level to empty. A zeroed root is the pre-allocated, untouched root.
pub fn clear_nodes(pool: &NodePool) {
    for arena in &pool.levels {
        arena.nodes.clear();
    }
}

pub fn clear_neighbours(pool: &NodePool) {
    for arena in &pool.levels {
        arena.neighbours.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::octree::FLAG_TOUCHED;

    fn small_pool() -> (SvoConfig, NodePool) {
        let config = SvoConfig::with_resolution(8);
        let pool = create_node_pool(&config);
        (config, pool)
    }

    #[test]
    fn test_pool_shape_follows_config() {
        let (config, pool) = small_pool();
        assert_eq!(config.num_levels(), 3);
        let capacities: Vec<u32> = pool.levels.iter().map(|a| a.capacity).collect();
        assert_eq!(capacities, vec![1, 8, 64]);
        assert_eq!(total_capacity(&pool), 73);
    }

    #[test]
    fn test_position_packing() {
        let position = UVec3::new(1023, 7, 512);
        assert_eq!(unpack_position(pack_position(position)), position);
        assert_eq!(octant_of(UVec3::new(3, 2, 5)), 0b101);
        assert_eq!(octant_offset(0b110), UVec3::new(0, 1, 1));
    }

    #[test]
    fn test_level_position() {
        let (config, _) = small_pool();
        let voxel = UVec3::new(7, 2, 5);
        assert_eq!(level_position(&config, voxel, 0), UVec3::ZERO);
        assert_eq!(level_position(&config, voxel, 1), UVec3::new(1, 0, 1));
        assert_eq!(level_position(&config, voxel, 2), UVec3::new(3, 1, 2));
    }

    #[test]
    fn test_traverse_follows_child_blocks() {
        let (_, pool) = small_pool();
        let root = NodeRef { level: 0, index: 0 };
        assert_eq!(traverse(&pool, 1, UVec3::ZERO), None);

        set_child_block(&pool, root, 0);
        let child = NodeRef {
            level: 1,
            index: child_index(0, 0b011),
        };
        assert_eq!(traverse(&pool, 1, UVec3::new(1, 1, 0)), Some(child));

        set_child_block(&pool, child, 5);
        assert_eq!(
            traverse(&pool, 2, UVec3::new(3, 2, 0)),
            Some(NodeRef {
                level: 2,
                index: child_index(5, 0b001)
            })
        );
        // Sibling subtree without children
        assert_eq!(traverse(&pool, 2, UVec3::new(0, 0, 0)), None);
    }

    #[test]
    fn test_flags_and_pointers() {
        let (_, pool) = small_pool();
        let node = NodeRef { level: 1, index: 3 };
        assert_eq!(set_flag(&pool, node, FLAG_TOUCHED), 0);
        assert_eq!(set_flag(&pool, node, FLAG_TOUCHED), FLAG_TOUCHED);
        assert_eq!(brick(&pool, node), None);
        set_brick(&pool, node, 0);
        assert_eq!(brick(&pool, node), Some(0));
        assert_eq!(read_slot(&pool, node).brick, 1);

        clear_nodes(&pool);
        assert_eq!(read_slot(&pool, node), NodeSlot::default());
    }

    #[test]
    fn test_diagonal_neighbour_chains_faces() {
        let (_, pool) = small_pool();
        let a = NodeRef { level: 1, index: 0 };
        let b = NodeRef { level: 1, index: 1 };
        let c = NodeRef { level: 1, index: 3 };
        // a -(+X)-> b -(+Y)-> c, but a has no +Y neighbour
        set_neighbour(&pool, a, 0, Some(b.index));
        set_neighbour(&pool, b, 2, Some(c.index));

        assert_eq!(neighbour_in_direction(&pool, a, IVec3::new(1, 0, 0)), Some(b));
        assert_eq!(neighbour_in_direction(&pool, a, IVec3::new(1, 1, 0)), Some(c));
        assert_eq!(neighbour_in_direction(&pool, a, IVec3::new(0, 1, 0)), None);
        assert_eq!(neighbour_in_direction(&pool, a, IVec3::ZERO), Some(a));
    }

    #[test]
    fn test_diagonal_neighbour_found_when_chains_break() {
        let (_, pool) = small_pool();
        let root = NodeRef { level: 0, index: 0 };
        // Parents (0,0,0) and (1,1,0) have children, (1,0,0) and (0,1,0) do not
        set_child_block(&pool, root, 0);
        let low = NodeRef {
            level: 1,
            index: child_index(0, 0b000),
        };
        let high = NodeRef {
            level: 1,
            index: child_index(0, 0b011),
        };
        set_child_block(&pool, low, 0);
        set_child_block(&pool, high, 1);

        let a = NodeRef {
            level: 2,
            index: child_index(0, 0b011),
        };
        let d = NodeRef {
            level: 2,
            index: child_index(1, 0b000),
        };
        set_position(&pool, a, UVec3::new(1, 1, 0));
        set_position(&pool, d, UVec3::new(2, 2, 0));

        assert_eq!(neighbour_in_direction(&pool, a, IVec3::new(1, 1, 0)), Some(d));
        assert_eq!(neighbour_in_direction(&pool, d, IVec3::new(-1, -1, 0)), Some(a));
        // Untouched parent along the face, and outside the grid
        assert_eq!(neighbour_in_direction(&pool, a, IVec3::new(1, 0, 0)), None);
        assert_eq!(neighbour_in_direction(&pool, a, IVec3::new(0, 0, -1)), None);
    }
}
