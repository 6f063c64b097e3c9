//! Voxel fragment list
//!
//! Unordered, append-only list of rasterized samples at the finest grid resolution. Slots are
//! reserved through the `FRAGMENT_COUNT` counter; appends past capacity are dropped.

use super::word_buffer::WordBuffer;
use bytemuck::{Pod, Zeroable};
use glam::{UVec3, Vec3, Vec4};

/// One rasterized geometry sample
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct VoxelFragment {
    /// Finest-grid voxel coordinates
    pub position: [u32; 3],
    /// RGBA8 albedo, red in the low byte
    pub color: u32,
    /// Normal biased to [0, 1] and packed as RGB8
    pub normal: u32,
    pub _padding: [u32; 3],
}

static_assertions::const_assert_eq!(std::mem::size_of::<VoxelFragment>(), 32);

pub const FRAGMENT_WORDS: usize = std::mem::size_of::<VoxelFragment>() / 4;

impl VoxelFragment {
    pub fn new(position: UVec3, color: Vec4, normal: Vec3) -> Self {
        Self {
            position: position.to_array(),
            color: pack_unorm4x8(color),
            normal: pack_unorm4x8((normal * 0.5 + Vec3::splat(0.5)).extend(0.0)),
            _padding: [0; 3],
        }
    }

    pub fn position(&self) -> UVec3 {
        UVec3::from_array(self.position)
    }

    pub fn color(&self) -> Vec4 {
        unpack_unorm4x8(self.color)
    }

    /// Unbiased normal (not renormalized)
    pub fn normal(&self) -> Vec3 {
        unpack_unorm4x8(self.normal).truncate() * 2.0 - Vec3::ONE
    }
}

/// Same rounding as WGSL `pack4x8unorm`
pub fn pack_unorm4x8(value: Vec4) -> u32 {
    value
        .to_array()
        .iter()
        .enumerate()
        .fold(0u32, |packed, (i, &c)| {
            let byte = (c.clamp(0.0, 1.0) * 255.0 + 0.5).floor() as u32;
            packed | (byte << (8 * i))
        })
}

pub fn unpack_unorm4x8(packed: u32) -> Vec4 {
    Vec4::new(
        (packed & 0xFF) as f32,
        ((packed >> 8) & 0xFF) as f32,
        ((packed >> 16) & 0xFF) as f32,
        (packed >> 24) as f32,
    ) / 255.0
}

/// Byte `component` of a packed RGBA8 word as an integer
#[inline]
pub fn unorm8_component(packed: u32, component: u32) -> u32 {
    (packed >> (8 * component)) & 0xFF
}

/// CPU mirror of the fragment storage buffer
pub struct FragmentList {
    pub capacity: u32,
    pub words: WordBuffer,
}

impl FragmentList {
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity,
            words: WordBuffer::new("voxel_fragments", capacity as usize * FRAGMENT_WORDS),
        }
    }

    /// Write `fragment` into a slot the caller already reserved
    pub fn write(&self, slot: u32, fragment: &VoxelFragment) {
        let base = slot as usize * FRAGMENT_WORDS;
        let words: &[u32] = bytemuck::cast_slice(std::slice::from_ref(fragment));
        for (i, &word) in words.iter().enumerate() {
            self.words.store(base + i, word);
        }
    }

    pub fn read(&self, slot: u32) -> VoxelFragment {
        let words = self.words.read_words(slot as usize * FRAGMENT_WORDS, FRAGMENT_WORDS);
        bytemuck::pod_read_unaligned(bytemuck::cast_slice(&words))
    }

    /// First `count` fragments
    pub fn read_all(&self, count: u32) -> Vec<VoxelFragment> {
        self.words.read_pod(count.min(self.capacity) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragment_packing() {
        let fragment = VoxelFragment::new(
            UVec3::new(3, 4, 5),
            Vec4::new(1.0, 0.5, 0.0, 1.0),
            Vec3::new(0.0, 0.0, -1.0),
        );
        assert_eq!(fragment.position(), UVec3::new(3, 4, 5));
        assert_eq!(unorm8_component(fragment.color, 0), 255);
        assert_eq!(unorm8_component(fragment.color, 1), 128);
        assert_eq!(unorm8_component(fragment.color, 2), 0);

        let normal = fragment.normal();
        assert!((normal - Vec3::new(0.0, 0.0, -1.0)).length() < 0.01);
    }

    #[test]
    fn test_write_and_read_back() {
        let list = FragmentList::new(4);
        let fragment = VoxelFragment::new(UVec3::new(1, 2, 3), Vec4::ONE, Vec3::Y);
        list.write(2, &fragment);

        assert_eq!(list.read(2), fragment);
        assert_eq!(list.read_all(3)[2], fragment);
        assert_eq!(list.read_all(10).len(), 4);
    }
}
