//! Allocation counters
//!
//! Fragment, brick and per-level child-block counters share one small buffer. On the CPU every
//! reservation saturates at capacity and bumps the matching drop counter; the GPU increments
//! freely and readers clamp, which yields the same allocations.

use super::word_buffer::WordBuffer;
use crate::constants::counters::{
    BRICK_COUNT, COUNTER_WORDS, DROPPED_BLOCKS, DROPPED_BRICKS, DROPPED_FRAGMENTS, FRAGMENT_COUNT,
    LEVEL_BLOCKS,
};

pub struct AllocationCounters {
    pub words: WordBuffer,
}

impl AllocationCounters {
    pub fn new() -> Self {
        Self {
            words: WordBuffer::new("allocation_counters", COUNTER_WORDS),
        }
    }

    fn reserve(&self, counter: usize, dropped: usize, capacity: u32) -> Option<u32> {
        let slot = self.words.saturating_increment(counter, capacity);
        if slot.is_none() {
            self.words.fetch_add(dropped, 1);
        }
        slot
    }

    /// Reserve a fragment slot
    pub fn reserve_fragment(&self, capacity: u32) -> Option<u32> {
        self.reserve(FRAGMENT_COUNT, DROPPED_FRAGMENTS, capacity)
    }

    /// Reserve a child block in the arena of `level`
    pub fn reserve_block(&self, level: usize, block_capacity: u32) -> Option<u32> {
        self.reserve(LEVEL_BLOCKS + level, DROPPED_BLOCKS, block_capacity)
    }

    pub fn reserve_brick(&self, capacity: u32) -> Option<u32> {
        self.reserve(BRICK_COUNT, DROPPED_BRICKS, capacity)
    }

    pub fn fragment_count(&self, capacity: u32) -> u32 {
        self.words.load(FRAGMENT_COUNT).min(capacity)
    }

    pub fn block_count(&self, level: usize, block_capacity: u32) -> u32 {
        self.words.load(LEVEL_BLOCKS + level).min(block_capacity)
    }

    pub fn brick_count(&self, capacity: u32) -> u32 {
        self.words.load(BRICK_COUNT).min(capacity)
    }

    /// Reset the fragment counter and its drop counter
    pub fn clear_fragments(&self) {
        self.words.store(FRAGMENT_COUNT, 0);
        self.words.store(DROPPED_FRAGMENTS, 0);
    }

    /// Reset all per-level block counters and the block drop counter
    pub fn clear_blocks(&self) {
        self.words.clear_range(LEVEL_BLOCKS..COUNTER_WORDS);
        self.words.store(DROPPED_BLOCKS, 0);
    }

    pub fn clear_bricks(&self) {
        self.words.store(BRICK_COUNT, 0);
        self.words.store(DROPPED_BRICKS, 0);
    }

    pub fn snapshot(&self) -> Vec<u32> {
        self.words.read_words(0, COUNTER_WORDS)
    }
}

impl Default for AllocationCounters {
    fn default() -> Self {
        Self::new()
    }
}
