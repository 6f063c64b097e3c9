//! Rebuild resets
//!
//! Four transfer passes put the pools back into their "nothing allocated" state. A zero word
//! is NULL for every pointer, so clearing never needs a kernel.

use super::Pass;
use crate::svo::brick_pool_operations::clear_bricks;
use crate::svo::node_pool_operations::{clear_neighbours, clear_nodes};
use crate::svo::ConstructionContext;

/// Run a clear pass on the CPU pools; returns false for non-clear passes
pub fn clear(context: &ConstructionContext, pass: &Pass) -> bool {
    match pass {
        Pass::ClearNodePool => {
            clear_nodes(&context.nodes);
            context.counters.clear_blocks();
        }
        Pass::ClearNeighbours => clear_neighbours(&context.nodes),
        Pass::ClearBrickPool => {
            clear_bricks(&context.bricks);
            context.counters.clear_bricks();
        }
        // Fragment contents are only read up to the count, resetting the count is enough
        Pass::ClearFragmentList => context.counters.clear_fragments(),
        _ => return false,
    }
    true
}
