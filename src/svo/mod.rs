//! Sparse voxel octree pools
//!
//! GPU-mirrored storage shared by every construction pass: the fragment list, per-level node
//! arenas with neighbour tables, brick channels, allocation counters and indirect slots.

pub mod brick_pool_data;
pub mod brick_pool_operations;
pub mod context;
pub mod counters;
pub mod fragment_list;
pub mod indirect;
pub mod node_pool_data;
pub mod node_pool_operations;
pub mod snapshot;
pub mod word_buffer;

pub use brick_pool_data::{BrickChannel, BrickPool};
pub use context::ConstructionContext;
pub use counters::AllocationCounters;
pub use fragment_list::{FragmentList, VoxelFragment};
pub use indirect::{IndirectArgs, IndirectBuffer, IndirectSlot};
pub use node_pool_data::{NodePool, NodeRef, NodeSlot};
pub use node_pool_operations::NodeTopology;
pub use snapshot::{BuildStats, LevelSnapshot, OctreeSnapshot};
pub use word_buffer::WordBuffer;
