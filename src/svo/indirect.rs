//! Indirect dispatch slots
//!
//! Data-dependent passes never learn their work size on the controlling side. A single-thread
//! patch pass turns allocation counters into dispatch arguments in one of these slots, and the
//! consuming pass dispatches straight from it after a barrier.

use super::counters::AllocationCounters;
use super::word_buffer::WordBuffer;
use crate::config::SvoConfig;
use crate::constants::dispatch::{INDIRECT_SLOT_BYTES, INDIRECT_SLOT_WORDS, WORKGROUP_SIZE};
use crate::constants::octree::{CHILDREN_PER_NODE, MAX_LEVELS};
use crate::error::{SvoError, SvoResult};
use bytemuck::{Pod, Zeroable};

/// Dispatch arguments plus the item count kernels bound their thread ids by
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct IndirectArgs {
    pub groups: [u32; 3],
    pub item_count: u32,
}

static_assertions::const_assert_eq!(
    std::mem::size_of::<IndirectArgs>(),
    INDIRECT_SLOT_BYTES as usize
);

impl IndirectArgs {
    pub fn for_items(item_count: u32) -> Self {
        Self {
            groups: [item_count.div_ceil(WORKGROUP_SIZE), 1, 1],
            item_count,
        }
    }
}

/// Which work list a slot sizes
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum IndirectSlot {
    /// Voxel fragments produced this rebuild
    Fragments,
    /// Allocated node slots at one level
    LevelNodes(usize),
    /// Allocated node slots over every level
    AllNodes,
}

impl IndirectSlot {
    pub const COUNT: usize = MAX_LEVELS + 2;

    pub fn index(self) -> usize {
        match self {
            IndirectSlot::Fragments => 0,
            IndirectSlot::LevelNodes(level) => 1 + level,
            IndirectSlot::AllNodes => 1 + MAX_LEVELS,
        }
    }

    pub fn from_index(index: u32) -> Option<Self> {
        match index as usize {
            0 => Some(IndirectSlot::Fragments),
            i if i <= MAX_LEVELS => Some(IndirectSlot::LevelNodes(i - 1)),
            i if i == MAX_LEVELS + 1 => Some(IndirectSlot::AllNodes),
            _ => None,
        }
    }

    /// Reject level slots past the table; their index would alias `AllNodes`
    pub fn checked(self) -> SvoResult<Self> {
        match self {
            IndirectSlot::LevelNodes(level) if level >= MAX_LEVELS => {
                Err(SvoError::IndirectSlotOutOfRange { slot: self.index() })
            }
            _ => Ok(self),
        }
    }

    pub fn byte_offset(self) -> u64 {
        self.index() as u64 * INDIRECT_SLOT_BYTES
    }
}

impl std::fmt::Display for IndirectSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndirectSlot::Fragments => write!(f, "fragments"),
            IndirectSlot::LevelNodes(level) => write!(f, "level_nodes[{}]", level),
            IndirectSlot::AllNodes => write!(f, "all_nodes"),
        }
    }
}

/// Allocated node slots at `level`, clamped to arena capacity
pub fn level_node_count(config: &SvoConfig, counters: &AllocationCounters, level: usize) -> u32 {
    if level == 0 {
        return 1;
    }
    counters.block_count(level, config.level_block_capacity(level)) * CHILDREN_PER_NODE
}

/// Items the consumer of `slot` must cover given the current counters
pub fn slot_item_count(config: &SvoConfig, counters: &AllocationCounters, slot: IndirectSlot) -> u32 {
    match slot {
        IndirectSlot::Fragments => counters.fragment_count(config.fragment_capacity),
        IndirectSlot::LevelNodes(level) => level_node_count(config, counters, level),
        IndirectSlot::AllNodes => (0..config.num_levels())
            .map(|level| level_node_count(config, counters, level))
            .sum(),
    }
}

/// Map a flat id over all levels to `(level, index)`
pub fn split_all_nodes_id(
    config: &SvoConfig,
    counters: &AllocationCounters,
    mut id: u32,
) -> Option<(usize, u32)> {
    for level in 0..config.num_levels() {
        let count = level_node_count(config, counters, level);
        if id < count {
            return Some((level, id));
        }
        id -= count;
    }
    None
}

/// CPU mirror of the indirect argument buffer
pub struct IndirectBuffer {
    pub words: WordBuffer,
}

impl IndirectBuffer {
    pub fn new() -> Self {
        Self {
            words: WordBuffer::new("indirect_args", IndirectSlot::COUNT * INDIRECT_SLOT_WORDS),
        }
    }

    pub fn write(&self, slot: IndirectSlot, args: IndirectArgs) {
        let base = slot.index() * INDIRECT_SLOT_WORDS;
        for (i, word) in [args.groups[0], args.groups[1], args.groups[2], args.item_count]
            .into_iter()
            .enumerate()
        {
            self.words.store(base + i, word);
        }
    }

    pub fn read(&self, slot: IndirectSlot) -> IndirectArgs {
        let w = self
            .words
            .read_words(slot.index() * INDIRECT_SLOT_WORDS, INDIRECT_SLOT_WORDS);
        IndirectArgs {
            groups: [w[0], w[1], w[2]],
            item_count: w[3],
        }
    }
}

impl Default for IndirectBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_round_up_to_workgroups() {
        assert_eq!(IndirectArgs::for_items(0).groups, [0, 1, 1]);
        assert_eq!(IndirectArgs::for_items(64).groups, [1, 1, 1]);
        assert_eq!(IndirectArgs::for_items(65).groups, [2, 1, 1]);
    }

    #[test]
    fn test_slot_indices_are_distinct() {
        let mut indices = vec![IndirectSlot::Fragments.index(), IndirectSlot::AllNodes.index()];
        indices.extend((0..MAX_LEVELS).map(|l| IndirectSlot::LevelNodes(l).index()));
        let len = indices.len();
        indices.sort_unstable();
        indices.dedup();
        assert_eq!(indices.len(), len);
        assert!(indices.iter().all(|&i| i < IndirectSlot::COUNT));

        for slot in [
            IndirectSlot::Fragments,
            IndirectSlot::LevelNodes(0),
            IndirectSlot::LevelNodes(MAX_LEVELS - 1),
            IndirectSlot::AllNodes,
        ] {
            assert_eq!(IndirectSlot::from_index(slot.index() as u32), Some(slot));
        }
        assert_eq!(IndirectSlot::from_index(IndirectSlot::COUNT as u32), None);
    }

    #[test]
    fn test_level_slot_past_table_is_rejected() {
        assert!(IndirectSlot::LevelNodes(MAX_LEVELS - 1).checked().is_ok());
        assert!(matches!(
            IndirectSlot::LevelNodes(MAX_LEVELS).checked(),
            Err(SvoError::IndirectSlotOutOfRange { .. })
        ));
    }

    #[test]
    fn test_item_counts_follow_counters() {
        let config = SvoConfig::with_resolution(16);
        let counters = AllocationCounters::new();
        counters.reserve_block(1, config.level_block_capacity(1));
        counters.reserve_block(2, config.level_block_capacity(2));
        counters.reserve_block(2, config.level_block_capacity(2));

        assert_eq!(slot_item_count(&config, &counters, IndirectSlot::LevelNodes(0)), 1);
        assert_eq!(slot_item_count(&config, &counters, IndirectSlot::LevelNodes(2)), 16);
        assert_eq!(slot_item_count(&config, &counters, IndirectSlot::AllNodes), 25);

        assert_eq!(split_all_nodes_id(&config, &counters, 0), Some((0, 0)));
        assert_eq!(split_all_nodes_id(&config, &counters, 8), Some((1, 7)));
        assert_eq!(split_all_nodes_id(&config, &counters, 9), Some((2, 0)));
        assert_eq!(split_all_nodes_id(&config, &counters, 25), None);
    }

    #[test]
    fn test_indirect_buffer_round_trip() {
        let buffer = IndirectBuffer::new();
        let args = IndirectArgs::for_items(130);
        buffer.write(IndirectSlot::LevelNodes(3), args);
        assert_eq!(buffer.read(IndirectSlot::LevelNodes(3)), args);
        assert_eq!(buffer.read(IndirectSlot::Fragments), IndirectArgs::default());
    }
}
