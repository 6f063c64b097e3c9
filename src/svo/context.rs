//! Construction context
//!
//! Every pool the passes share, passed by reference to each kernel. Which pass may write which
//! field is declared by `Pass::writes`; the stage orders passes and inserts barriers from those
//! declarations, so no field is ever guarded by a lock.

use super::brick_pool_data::BrickPool;
use super::brick_pool_operations::create_brick_pool;
use super::counters::AllocationCounters;
use super::fragment_list::FragmentList;
use super::indirect::IndirectBuffer;
use super::node_pool_data::NodePool;
use super::node_pool_operations::{create_node_pool, total_capacity};
use crate::config::SvoConfig;
use crate::error::SvoResult;
use crate::scene::{GridTriangle, LightInput};

pub struct ConstructionContext {
    pub config: SvoConfig,
    /// Written by `ClearFragmentList` and `Voxelize`
    pub fragments: FragmentList,
    /// Fragment, block and brick counters; written by clears, `Voxelize`, `Allocate`, `AllocBricks`
    pub counters: AllocationCounters,
    /// Node slots written by `Flag`, `Allocate`, `AllocBricks`; neighbours by `NeighbourPointers`
    pub nodes: NodePool,
    /// Accumulators written by `WriteLeafNodes` and `LightInjection`; voxels by the filter chain
    pub bricks: BrickPool,
    /// Written only by `PatchIndirect`
    pub indirect: IndirectBuffer,
    /// Grid-space geometry uploaded at the start of a rebuild
    pub triangles: Vec<GridTriangle>,
    /// Present when irradiance is enabled
    pub light: Option<LightInput>,
}

impl ConstructionContext {
    pub fn new(config: SvoConfig) -> SvoResult<Self> {
        config.validate()?;
        let nodes = create_node_pool(&config);
        let bricks = create_brick_pool(&config);
        log::info!(
            "[ConstructionContext::new] {} levels, {} node slots, {} bricks x {} channels",
            config.num_levels(),
            total_capacity(&nodes),
            bricks.capacity,
            bricks.channels.len()
        );
        Ok(Self {
            fragments: FragmentList::new(config.fragment_capacity),
            counters: AllocationCounters::new(),
            nodes,
            bricks,
            indirect: IndirectBuffer::new(),
            triangles: Vec::new(),
            light: None,
            config,
        })
    }
}
