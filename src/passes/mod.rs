//! Construction passes
//!
//! Every unit of work the stage emits is a `Pass` variant. A pass declares which shared
//! resources it reads and writes and which kernels it dispatches from which work source; the
//! stage derives barriers from the declarations and the executors turn the kernels into rayon
//! loops or compute dispatches.

pub mod border_transfer;
pub mod clear;
pub mod leaf;
pub mod mipmap;
pub mod spread;
pub mod topology;
pub mod voxelize;

use crate::svo::{BrickChannel, IndirectSlot};
use bytemuck::{Pod, Zeroable};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Set of shared resources touched by a pass
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct Resources(u32);

impl Resources {
    pub const NONE: Self = Self(0);
    pub const FRAGMENTS: Self = Self(1 << 0);
    pub const COUNTERS: Self = Self(1 << 1);
    pub const NODES: Self = Self(1 << 2);
    pub const NEIGHBOURS: Self = Self(1 << 3);
    pub const BRICKS: Self = Self(1 << 4);
    pub const ACCUMULATORS: Self = Self(1 << 5);
    pub const INDIRECT: Self = Self(1 << 6);
    /// Triangles, light and shadow map uploaded from the scene
    pub const SCENE: Self = Self(1 << 7);

    const NAMES: [&'static str; 8] = [
        "fragments",
        "counters",
        "nodes",
        "neighbours",
        "bricks",
        "accumulators",
        "indirect",
        "scene",
    ];

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for Resources {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitOrAssign for Resources {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.union(rhs);
    }
}

impl fmt::Debug for Resources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMES
            .iter()
            .enumerate()
            .filter(|(bit, _)| self.0 & (1 << bit) != 0)
            .map(|(_, name)| *name)
            .collect();
        write!(f, "Resources({})", names.join(" | "))
    }
}

/// Mipmap sub-step, in mandatory execution order
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum MipmapStep {
    Center,
    Faces,
    Corners,
    Edges,
}

impl MipmapStep {
    pub const ORDER: [MipmapStep; 4] = [
        MipmapStep::Center,
        MipmapStep::Faces,
        MipmapStep::Corners,
        MipmapStep::Edges,
    ];
}

/// One pass of the construction schedule
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Pass {
    ClearNodePool,
    ClearNeighbours,
    ClearBrickPool,
    ClearFragmentList,
    Voxelize,
    PatchIndirect(IndirectSlot),
    NeighbourPointers { level: usize },
    Flag { level: usize },
    Allocate { level: usize },
    AllocBricks,
    WriteLeafNodes,
    LightInjection,
    SpreadLeafBricks { channel: BrickChannel },
    BorderTransfer { level: usize, channel: BrickChannel },
    Mipmap {
        level: usize,
        channel: BrickChannel,
        step: MipmapStep,
    },
}

/// Entry points of the construction kernels
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Kernel {
    Voxelize,
    PatchIndirect,
    NeighbourPointers,
    Flag,
    Allocate,
    AllocBricks,
    AccumulateLeaf,
    ResolveLeaf,
    AccumulateIrradiance,
    ResolveIrradiance,
    SpreadLeafBricks,
    BorderTransfer,
    MipmapCenter,
    MipmapFaces,
    MipmapCorners,
    MipmapEdges,
}

impl Kernel {
    pub const ALL: [Kernel; 16] = [
        Kernel::Voxelize,
        Kernel::PatchIndirect,
        Kernel::NeighbourPointers,
        Kernel::Flag,
        Kernel::Allocate,
        Kernel::AllocBricks,
        Kernel::AccumulateLeaf,
        Kernel::ResolveLeaf,
        Kernel::AccumulateIrradiance,
        Kernel::ResolveIrradiance,
        Kernel::SpreadLeafBricks,
        Kernel::BorderTransfer,
        Kernel::MipmapCenter,
        Kernel::MipmapFaces,
        Kernel::MipmapCorners,
        Kernel::MipmapEdges,
    ];

    /// WGSL entry point name
    pub fn entry_point(self) -> &'static str {
        match self {
            Kernel::Voxelize => "voxelize",
            Kernel::PatchIndirect => "patch_indirect",
            Kernel::NeighbourPointers => "neighbour_pointers",
            Kernel::Flag => "flag_nodes",
            Kernel::Allocate => "allocate_nodes",
            Kernel::AllocBricks => "alloc_bricks",
            Kernel::AccumulateLeaf => "accumulate_leaf",
            Kernel::ResolveLeaf => "resolve_leaf",
            Kernel::AccumulateIrradiance => "accumulate_irradiance",
            Kernel::ResolveIrradiance => "resolve_irradiance",
            Kernel::SpreadLeafBricks => "spread_leaf_bricks",
            Kernel::BorderTransfer => "border_transfer",
            Kernel::MipmapCenter => "mipmap_center",
            Kernel::MipmapFaces => "mipmap_faces",
            Kernel::MipmapCorners => "mipmap_corners",
            Kernel::MipmapEdges => "mipmap_edges",
        }
    }
}

/// Where a dispatch gets its thread count
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DispatchSource {
    /// Buffer clears, no kernel
    Transfer,
    /// Fixed thread count known when the schedule is built
    Direct(u32),
    /// One thread per uploaded scene triangle
    PerTriangle,
    /// Thread count patched on the GPU into an indirect slot
    Indirect(IndirectSlot),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Dispatch {
    pub kernel: Kernel,
    pub source: DispatchSource,
}

/// Per-dispatch kernel parameters (one uniform slot on the GPU)
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct PassParams {
    pub level: u32,
    pub channel: u32,
    /// Indirect slot index for `PatchIndirect`
    pub slot: u32,
    pub _padding: u32,
}

static_assertions::const_assert_eq!(std::mem::size_of::<PassParams>(), 16);

impl Pass {
    /// Stable pass name
    pub fn name(&self) -> &'static str {
        match self {
            Pass::ClearNodePool => "clear_node_pool",
            Pass::ClearNeighbours => "clear_neighbours",
            Pass::ClearBrickPool => "clear_brick_pool",
            Pass::ClearFragmentList => "clear_fragment_list",
            Pass::Voxelize => "voxelize",
            Pass::PatchIndirect(_) => "patch_indirect",
            Pass::NeighbourPointers { .. } => "neighbour_pointers",
            Pass::Flag { .. } => "flag",
            Pass::Allocate { .. } => "allocate",
            Pass::AllocBricks => "alloc_bricks",
            Pass::WriteLeafNodes => "write_leaf_nodes",
            Pass::LightInjection => "light_injection",
            Pass::SpreadLeafBricks { .. } => "spread_leaf_bricks",
            Pass::BorderTransfer { .. } => "border_transfer",
            Pass::Mipmap { step, .. } => match step {
                MipmapStep::Center => "mipmap_center",
                MipmapStep::Faces => "mipmap_faces",
                MipmapStep::Corners => "mipmap_corners",
                MipmapStep::Edges => "mipmap_edges",
            },
        }
    }

    pub fn level(&self) -> Option<usize> {
        match *self {
            Pass::NeighbourPointers { level }
            | Pass::Flag { level }
            | Pass::Allocate { level }
            | Pass::BorderTransfer { level, .. }
            | Pass::Mipmap { level, .. } => Some(level),
            _ => None,
        }
    }

    pub fn channel(&self) -> Option<BrickChannel> {
        match *self {
            Pass::SpreadLeafBricks { channel }
            | Pass::BorderTransfer { channel, .. }
            | Pass::Mipmap { channel, .. } => Some(channel),
            _ => None,
        }
    }

    pub fn params(&self) -> PassParams {
        PassParams {
            level: self.level().unwrap_or(0) as u32,
            channel: self.channel().map_or(0, |c| c.index() as u32),
            slot: match self {
                Pass::PatchIndirect(slot) => slot.index() as u32,
                _ => 0,
            },
            _padding: 0,
        }
    }

    /// Kernels this pass runs, in order, with their work source
    ///
    /// `leaf_level` sizes the per-leaf resolves and the spread.
    pub fn dispatches(&self, leaf_level: usize) -> Vec<Dispatch> {
        let d = |kernel, source| Dispatch { kernel, source };
        let fragments = DispatchSource::Indirect(IndirectSlot::Fragments);
        let leaves = DispatchSource::Indirect(IndirectSlot::LevelNodes(leaf_level));
        match *self {
            Pass::ClearNodePool
            | Pass::ClearNeighbours
            | Pass::ClearBrickPool
            | Pass::ClearFragmentList => Vec::new(),
            Pass::Voxelize => vec![d(Kernel::Voxelize, DispatchSource::PerTriangle)],
            Pass::PatchIndirect(_) => vec![d(Kernel::PatchIndirect, DispatchSource::Direct(1))],
            Pass::NeighbourPointers { level } => vec![d(
                Kernel::NeighbourPointers,
                DispatchSource::Indirect(IndirectSlot::LevelNodes(level)),
            )],
            Pass::Flag { .. } => vec![d(Kernel::Flag, fragments)],
            Pass::Allocate { level } => vec![d(
                Kernel::Allocate,
                DispatchSource::Indirect(IndirectSlot::LevelNodes(level)),
            )],
            Pass::AllocBricks => vec![d(
                Kernel::AllocBricks,
                DispatchSource::Indirect(IndirectSlot::AllNodes),
            )],
            Pass::WriteLeafNodes => vec![
                d(Kernel::AccumulateLeaf, fragments),
                d(Kernel::ResolveLeaf, leaves),
            ],
            Pass::LightInjection => vec![
                d(Kernel::AccumulateIrradiance, fragments),
                d(Kernel::ResolveIrradiance, leaves),
            ],
            Pass::SpreadLeafBricks { .. } => vec![d(Kernel::SpreadLeafBricks, leaves)],
            Pass::BorderTransfer { level, .. } => vec![d(
                Kernel::BorderTransfer,
                DispatchSource::Indirect(IndirectSlot::LevelNodes(level)),
            )],
            Pass::Mipmap { level, step, .. } => {
                let kernel = match step {
                    MipmapStep::Center => Kernel::MipmapCenter,
                    MipmapStep::Faces => Kernel::MipmapFaces,
                    MipmapStep::Corners => Kernel::MipmapCorners,
                    MipmapStep::Edges => Kernel::MipmapEdges,
                };
                vec![d(
                    kernel,
                    DispatchSource::Indirect(IndirectSlot::LevelNodes(level)),
                )]
            }
        }
    }

    /// True when any dispatch sizes itself from an indirect slot
    pub fn is_indirect(&self) -> bool {
        self.dispatches(0)
            .iter()
            .any(|d| matches!(d.source, DispatchSource::Indirect(_)))
    }

    /// Resources this pass reads, including the indirect buffer when it dispatches from it
    pub fn reads(&self) -> Resources {
        use Resources as R;
        let base = match self {
            Pass::ClearNodePool
            | Pass::ClearNeighbours
            | Pass::ClearBrickPool
            | Pass::ClearFragmentList => R::NONE,
            Pass::Voxelize => R::SCENE | R::COUNTERS,
            Pass::PatchIndirect(_) => R::COUNTERS,
            Pass::NeighbourPointers { .. } => R::NODES,
            Pass::Flag { .. } => R::FRAGMENTS | R::NODES,
            Pass::Allocate { .. } | Pass::AllocBricks => R::NODES | R::COUNTERS,
            Pass::WriteLeafNodes => R::FRAGMENTS | R::NODES | R::ACCUMULATORS,
            Pass::LightInjection => R::SCENE | R::FRAGMENTS | R::NODES | R::ACCUMULATORS,
            Pass::SpreadLeafBricks { .. } | Pass::Mipmap { .. } => R::NODES | R::BRICKS,
            Pass::BorderTransfer { .. } => R::NODES | R::NEIGHBOURS | R::BRICKS,
        };
        if self.is_indirect() {
            base | R::INDIRECT
        } else {
            base
        }
    }

    /// Resources this pass writes
    pub fn writes(&self) -> Resources {
        use Resources as R;
        match self {
            Pass::ClearNodePool => R::NODES | R::COUNTERS,
            Pass::ClearNeighbours => R::NEIGHBOURS,
            Pass::ClearBrickPool => R::BRICKS | R::ACCUMULATORS | R::COUNTERS,
            Pass::ClearFragmentList => R::COUNTERS,
            Pass::Voxelize => R::FRAGMENTS | R::COUNTERS,
            Pass::PatchIndirect(_) => R::INDIRECT,
            Pass::NeighbourPointers { .. } => R::NEIGHBOURS,
            Pass::Flag { .. } => R::NODES,
            Pass::Allocate { .. } | Pass::AllocBricks => R::NODES | R::COUNTERS,
            Pass::WriteLeafNodes | Pass::LightInjection => R::ACCUMULATORS | R::BRICKS,
            Pass::SpreadLeafBricks { .. }
            | Pass::BorderTransfer { .. }
            | Pass::Mipmap { .. } => R::BRICKS,
        }
    }
}

impl fmt::Display for Pass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())?;
        match self {
            Pass::PatchIndirect(slot) => write!(f, "({})", slot),
            _ => match (self.level(), self.channel()) {
                (Some(level), Some(channel)) => write!(f, "(level={}, {})", level, channel.name()),
                (Some(level), None) => write!(f, "(level={})", level),
                (None, Some(channel)) => write!(f, "({})", channel.name()),
                (None, None) => Ok(()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resources_set_operations() {
        let set = Resources::NODES | Resources::BRICKS;
        assert!(set.contains(Resources::NODES));
        assert!(!set.contains(Resources::NODES | Resources::COUNTERS));
        assert!(set.intersection(Resources::COUNTERS).is_empty());
        assert_eq!(format!("{:?}", set), "Resources(nodes | bricks)");
    }

    #[test]
    fn test_indirect_passes_read_indirect_buffer() {
        assert!(Pass::Flag { level: 2 }.reads().contains(Resources::INDIRECT));
        assert!(!Pass::Voxelize.reads().contains(Resources::INDIRECT));
        assert!(!Pass::PatchIndirect(IndirectSlot::Fragments)
            .reads()
            .contains(Resources::INDIRECT));
    }

    #[test]
    fn test_write_leaf_nodes_accumulates_then_resolves() {
        let dispatches = Pass::WriteLeafNodes.dispatches(5);
        assert_eq!(dispatches.len(), 2);
        assert_eq!(dispatches[0].kernel, Kernel::AccumulateLeaf);
        assert_eq!(
            dispatches[1].source,
            DispatchSource::Indirect(IndirectSlot::LevelNodes(5))
        );
    }

    #[test]
    fn test_params_and_display() {
        let pass = Pass::BorderTransfer {
            level: 3,
            channel: BrickChannel::Normal,
        };
        assert_eq!(
            pass.params(),
            PassParams {
                level: 3,
                channel: 1,
                slot: 0,
                _padding: 0
            }
        );
        assert_eq!(pass.to_string(), "border_transfer(level=3, normal)");

        let patch = Pass::PatchIndirect(IndirectSlot::AllNodes);
        assert_eq!(patch.params().slot, IndirectSlot::AllNodes.index() as u32);
        assert_eq!(patch.to_string(), "patch_indirect(all_nodes)");
    }
}
