//! Published octree view
//!
//! An immutable copy of the node and brick pools taken after a rebuild completed. Consumers
//! hold it behind an `Arc` while the next rebuild runs, so a partial octree is never visible.

use super::brick_pool_data::BrickChannel;
use super::brick_pool_operations::{voxel_index, VOXEL_WORDS};
use super::context::ConstructionContext;
use super::fragment_list::VoxelFragment;
use super::indirect::level_node_count;
use super::node_pool_data::{NodeRef, NodeSlot};
use super::node_pool_operations::{
    child_index, decode_pointer, level_position, traverse, unpack_position, NodeTopology,
};
use crate::config::SvoConfig;
use crate::constants::brick::VOXELS_PER_BRICK;
use crate::constants::counters::{
    BRICK_COUNT, DROPPED_BLOCKS, DROPPED_BRICKS, DROPPED_FRAGMENTS, FRAGMENT_COUNT, LEVEL_BLOCKS,
};
use crate::constants::octree::{CHILDREN_PER_NODE, FLAG_TOUCHED, NEIGHBOURS_PER_NODE};
use glam::{IVec3, UVec3, Vec4};

/// Counters of one completed rebuild
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildStats {
    pub fragment_count: u32,
    pub dropped_fragments: u32,
    /// Allocated node slots per level (root level is always 1)
    pub nodes_per_level: Vec<u32>,
    pub dropped_blocks: u32,
    pub brick_count: u32,
    pub dropped_bricks: u32,
}

impl BuildStats {
    /// Decode raw counter words, clamping to capacity the way every GPU reader does
    pub fn from_counters(config: &SvoConfig, counters: &[u32]) -> Self {
        let nodes_per_level = (0..config.num_levels())
            .map(|level| {
                if level == 0 {
                    1
                } else {
                    counters[LEVEL_BLOCKS + level].min(config.level_block_capacity(level))
                        * CHILDREN_PER_NODE
                }
            })
            .collect();
        Self {
            fragment_count: counters[FRAGMENT_COUNT].min(config.fragment_capacity),
            dropped_fragments: counters[DROPPED_FRAGMENTS],
            nodes_per_level,
            dropped_blocks: counters[DROPPED_BLOCKS],
            brick_count: counters[BRICK_COUNT].min(config.brick_pool_capacity),
            dropped_bricks: counters[DROPPED_BRICKS],
        }
    }

    pub fn has_drops(&self) -> bool {
        self.dropped_fragments > 0 || self.dropped_blocks > 0 || self.dropped_bricks > 0
    }

    pub fn total_nodes(&self) -> u32 {
        self.nodes_per_level.iter().sum()
    }
}

/// Node slots and neighbour table of one level
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LevelSnapshot {
    pub nodes: Vec<NodeSlot>,
    pub neighbours: Vec<[u32; NEIGHBOURS_PER_NODE]>,
}

/// Read-only octree for the shading pass
#[derive(Debug, Clone)]
pub struct OctreeSnapshot {
    pub config: SvoConfig,
    pub stats: BuildStats,
    pub fragments: Vec<VoxelFragment>,
    pub levels: Vec<LevelSnapshot>,
    /// Per enabled channel, `brick_count * 27` voxels
    pub bricks: Vec<Vec<Vec4>>,
}

impl OctreeSnapshot {
    /// Assemble from raw pool contents, truncating everything to the allocated counts
    pub fn from_parts(
        config: &SvoConfig,
        counters: &[u32],
        mut levels: Vec<LevelSnapshot>,
        mut bricks: Vec<Vec<Vec4>>,
        mut fragments: Vec<VoxelFragment>,
    ) -> Self {
        let stats = BuildStats::from_counters(config, counters);
        for (level, snapshot) in levels.iter_mut().enumerate() {
            let count = stats.nodes_per_level[level] as usize;
            snapshot.nodes.truncate(count);
            snapshot.neighbours.truncate(count);
        }
        let voxels = stats.brick_count as usize * VOXELS_PER_BRICK as usize;
        for channel in &mut bricks {
            channel.truncate(voxels);
        }
        fragments.truncate(stats.fragment_count as usize);
        Self {
            config: config.clone(),
            stats,
            fragments,
            levels,
            bricks,
        }
    }

    /// Copy the live pools of a context whose rebuild has finished
    pub fn capture(context: &ConstructionContext) -> Self {
        let config = &context.config;
        let counters = context.counters.snapshot();
        let levels = context
            .nodes
            .levels
            .iter()
            .map(|arena| {
                let count = level_node_count(config, &context.counters, arena.level) as usize;
                LevelSnapshot {
                    nodes: arena.nodes.read_pod(count),
                    neighbours: arena.neighbours.read_pod(count),
                }
            })
            .collect();
        let brick_count = context.counters.brick_count(config.brick_pool_capacity) as usize;
        let bricks = context
            .bricks
            .channels
            .iter()
            .map(|storage| {
                let words = storage.read_words(
                    0,
                    brick_count * VOXELS_PER_BRICK as usize * VOXEL_WORDS,
                );
                voxels_from_words(&words)
            })
            .collect();
        let fragments = context
            .fragments
            .read_all(context.counters.fragment_count(config.fragment_capacity));
        Self::from_parts(config, &counters, levels, bricks, fragments)
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn root(&self) -> NodeRef {
        NodeRef { level: 0, index: 0 }
    }

    pub fn node(&self, node: NodeRef) -> Option<&NodeSlot> {
        self.levels.get(node.level)?.nodes.get(node.index as usize)
    }

    pub fn node_count(&self, level: usize) -> usize {
        self.levels.get(level).map_or(0, |l| l.nodes.len())
    }

    pub fn is_touched(&self, node: NodeRef) -> bool {
        self.node(node).is_some_and(|slot| slot.flags & FLAG_TOUCHED != 0)
    }

    /// The 8 children of `node` in octant order, if it has a child block
    pub fn children(&self, node: NodeRef) -> Option<[NodeRef; 8]> {
        let block = self.child_block(node)?;
        Some(std::array::from_fn(|octant| NodeRef {
            level: node.level + 1,
            index: child_index(block, octant as u32),
        }))
    }

    /// Node at `level` containing finest voxel `voxel`
    pub fn find_node(&self, level: usize, voxel: UVec3) -> Option<NodeRef> {
        if level >= self.num_levels() {
            return None;
        }
        traverse(self, level, level_position(&self.config, voxel, level))
            .filter(|node| self.node(*node).is_some())
    }

    pub fn brick_of(&self, node: NodeRef) -> Option<u32> {
        decode_pointer(self.node(node)?.brick)
    }

    /// All voxels of one brick for `channel`
    pub fn brick(&self, channel: BrickChannel, brick: u32) -> Option<&[Vec4]> {
        let storage = self.bricks.get(channel.index())?;
        let start = brick as usize * VOXELS_PER_BRICK as usize;
        storage.get(start..start + VOXELS_PER_BRICK as usize)
    }

    /// Voxel `voxel` (brick coordinates 0..3) of `node`'s brick
    pub fn brick_voxel(&self, node: NodeRef, channel: BrickChannel, voxel: UVec3) -> Option<Vec4> {
        let brick = self.brick(channel, self.brick_of(node)?)?;
        brick.get(voxel_index(voxel) as usize).copied()
    }

    /// Leaf nodes carrying a brick
    pub fn populated_leaves(&self) -> Vec<NodeRef> {
        let Some(leaf_level) = self.num_levels().checked_sub(1) else {
            return Vec::new();
        };
        (0..self.node_count(leaf_level) as u32)
            .map(|index| NodeRef {
                level: leaf_level,
                index,
            })
            .filter(|node| self.brick_of(*node).is_some())
            .collect()
    }

    /// Node one step away along `offset` via chained neighbour pointers
    pub fn neighbour_in_direction(&self, node: NodeRef, offset: IVec3) -> Option<NodeRef> {
        super::node_pool_operations::neighbour_in_direction(self, node, offset)
    }
}

impl NodeTopology for OctreeSnapshot {
    fn child_block(&self, node: NodeRef) -> Option<u32> {
        decode_pointer(self.node(node)?.child)
    }

    fn neighbour(&self, node: NodeRef, face: usize) -> Option<NodeRef> {
        let table = self.levels.get(node.level)?.neighbours.get(node.index as usize)?;
        decode_pointer(table[face]).map(|index| NodeRef {
            level: node.level,
            index,
        })
    }

    fn position(&self, node: NodeRef) -> Option<UVec3> {
        self.node(node).map(|slot| unpack_position(slot.position))
    }
}

/// Reinterpret raw brick words as voxels
pub fn voxels_from_words(words: &[u32]) -> Vec<Vec4> {
    bytemuck::cast_slice::<u32, [f32; 4]>(words)
        .iter()
        .map(|v| Vec4::from_array(*v))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::counters::COUNTER_WORDS;

    fn config() -> SvoConfig {
        SvoConfig {
            voxel_grid_resolution: 8,
            brick_pool_capacity: 4,
            ..SvoConfig::default()
        }
    }

    #[test]
    fn test_stats_clamp_to_capacity() {
        let config = config();
        let mut counters = vec![0u32; COUNTER_WORDS];
        counters[BRICK_COUNT] = 9;
        counters[DROPPED_BRICKS] = 5;
        counters[LEVEL_BLOCKS + 1] = 1;
        counters[LEVEL_BLOCKS + 2] = 3;

        let stats = BuildStats::from_counters(&config, &counters);
        assert_eq!(stats.brick_count, 4);
        assert_eq!(stats.nodes_per_level, vec![1, 8, 24]);
        assert_eq!(stats.total_nodes(), 33);
        assert!(stats.has_drops());
    }

    #[test]
    fn test_queries_over_hand_built_tree() {
        let config = config();
        let mut counters = vec![0u32; COUNTER_WORDS];
        counters[LEVEL_BLOCKS + 1] = 1;
        counters[LEVEL_BLOCKS + 2] = 1;
        counters[BRICK_COUNT] = 1;

        let mut root = LevelSnapshot::default();
        root.nodes.push(NodeSlot {
            child: 1,
            flags: FLAG_TOUCHED,
            ..NodeSlot::default()
        });
        root.neighbours.push([0; 6]);

        let mut level1 = LevelSnapshot {
            nodes: vec![NodeSlot::default(); 8],
            neighbours: vec![[0; 6]; 8],
        };
        level1.nodes[7].child = 1;
        level1.nodes[7].flags = FLAG_TOUCHED;

        let mut level2 = LevelSnapshot {
            nodes: vec![NodeSlot::default(); 8],
            neighbours: vec![[0; 6]; 8],
        };
        level2.nodes[0].brick = 1;
        level2.nodes[0].flags = FLAG_TOUCHED;
        // +X neighbour of leaf 0 is leaf 1
        level2.neighbours[0][0] = 2;

        let mut voxels = vec![Vec4::ZERO; 27 * 4];
        voxels[13] = Vec4::ONE;
        let snapshot = OctreeSnapshot::from_parts(
            &config,
            &counters,
            vec![root, level1, level2],
            vec![voxels],
            Vec::new(),
        );

        let leaf = snapshot
            .find_node(2, UVec3::new(4, 4, 4))
            .expect("Failed to find leaf");
        assert_eq!(leaf, NodeRef { level: 2, index: 0 });
        assert!(snapshot.find_node(2, UVec3::ZERO).is_none());
        assert_eq!(snapshot.populated_leaves(), vec![leaf]);
        assert_eq!(
            snapshot.brick_voxel(leaf, BrickChannel::Color, UVec3::ONE),
            Some(Vec4::ONE)
        );
        assert_eq!(snapshot.bricks[0].len(), 27);
        assert_eq!(
            snapshot.neighbour_in_direction(leaf, IVec3::X),
            Some(NodeRef { level: 2, index: 1 })
        );
        let children = snapshot.children(snapshot.root()).expect("Root has children");
        assert_eq!(children[7], NodeRef { level: 1, index: 7 });
    }
}
