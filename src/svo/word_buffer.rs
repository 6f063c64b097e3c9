//! CPU stand-in for a GPU storage buffer
//!
//! A flat array of 32-bit words with relaxed atomic access. The CPU executor dispatches one
//! closure per GPU thread over these buffers, so every pass sees exactly the memory model the
//! WGSL kernels see: plain loads/stores for fields a single thread owns, atomics for shared
//! counters and flags, and visibility between passes established by the executor's barrier.

use bytemuck::Pod;
use rayon::prelude::*;
use std::ops::Range;
use std::sync::atomic::{AtomicU32, Ordering};

pub struct WordBuffer {
    label: &'static str,
    words: Vec<AtomicU32>,
}

impl WordBuffer {
    /// Zero-filled buffer of `len` words
    pub fn new(label: &'static str, len: usize) -> Self {
        let mut words = Vec::with_capacity(len);
        words.resize_with(len, || AtomicU32::new(0));
        Self { label, words }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    #[inline]
    pub fn load(&self, index: usize) -> u32 {
        self.words[index].load(Ordering::Relaxed)
    }

    #[inline]
    pub fn store(&self, index: usize, value: u32) {
        self.words[index].store(value, Ordering::Relaxed);
    }

    #[inline]
    pub fn load_f32(&self, index: usize) -> f32 {
        f32::from_bits(self.load(index))
    }

    #[inline]
    pub fn store_f32(&self, index: usize, value: f32) {
        self.store(index, value.to_bits());
    }

    #[inline]
    pub fn fetch_add(&self, index: usize, value: u32) -> u32 {
        self.words[index].fetch_add(value, Ordering::Relaxed)
    }

    #[inline]
    pub fn fetch_or(&self, index: usize, value: u32) -> u32 {
        self.words[index].fetch_or(value, Ordering::Relaxed)
    }

    /// Increment unless the word already reached `limit`; returns the pre-increment value
    #[inline]
    pub fn saturating_increment(&self, index: usize, limit: u32) -> Option<u32> {
        self.words[index]
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                (current < limit).then_some(current + 1)
            })
            .ok()
    }

    /// Add, clamping at `u32::MAX`; returns the pre-add value
    #[inline]
    pub fn saturating_add(&self, index: usize, value: u32) -> u32 {
        match self.words[index].fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
            Some(current.saturating_add(value))
        }) {
            Ok(previous) | Err(previous) => previous,
        }
    }

    /// Zero every word (the CPU equivalent of `clear_buffer`)
    pub fn clear(&self) {
        self.words
            .par_iter()
            .for_each(|word| word.store(0, Ordering::Relaxed));
    }

    pub fn clear_range(&self, range: Range<usize>) {
        self.words[range]
            .par_iter()
            .for_each(|word| word.store(0, Ordering::Relaxed));
    }

    /// Copy `count` words starting at `offset` out of the buffer
    pub fn read_words(&self, offset: usize, count: usize) -> Vec<u32> {
        self.words[offset..offset + count]
            .iter()
            .map(|word| word.load(Ordering::Relaxed))
            .collect()
    }

    /// Read the first `count` elements of type `T` laid out contiguously
    pub fn read_pod<T: Pod>(&self, count: usize) -> Vec<T> {
        let words_per_item = std::mem::size_of::<T>() / 4;
        let words = self.read_words(0, count * words_per_item);
        bytemuck::cast_slice(&words).to_vec()
    }

    /// Overwrite the start of the buffer with `items`
    pub fn write_pod<T: Pod>(&self, items: &[T]) {
        let words: &[u32] = bytemuck::cast_slice(items);
        for (index, &word) in words.iter().enumerate() {
            self.store(index, word);
        }
    }
}

impl std::fmt::Debug for WordBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WordBuffer")
            .field("label", &self.label)
            .field("len", &self.words.len())
            .finish()
    }
}
