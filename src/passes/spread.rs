//! Brick spreader
//!
//! Broadcast each populated leaf's centre voxel over its whole brick so the filter chain never
//! reads an unwritten voxel, even where Border Transfer finds no neighbour.

use super::PassParams;
use crate::constants::brick::VOXELS_PER_BRICK;
use crate::svo::brick_pool_operations::{read_center, write_voxel};
use crate::svo::node_pool_operations::brick;
use crate::svo::{ConstructionContext, NodeRef};

pub fn spread_leaf_bricks(context: &ConstructionContext, params: &PassParams, id: u32) {
    let leaf = NodeRef {
        level: context.config.leaf_level(),
        index: id,
    };
    let Some(slot) = brick(&context.nodes, leaf) else {
        return;
    };
    let Some(storage) = context.bricks.channels.get(params.channel as usize) else {
        return;
    };
    let center = read_center(storage, slot);
    for voxel in 0..VOXELS_PER_BRICK {
        write_voxel(storage, slot, voxel, center);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SvoConfig;
    use crate::constants::brick::CENTER_VOXEL;
    use crate::svo::brick_pool_operations::read_voxel;
    use crate::svo::node_pool_operations::set_brick;
    use crate::svo::BrickChannel;
    use glam::Vec4;

    #[test]
    fn test_center_fills_brick_for_requested_channel() {
        let config = SvoConfig {
            voxel_grid_resolution: 2,
            brick_pool_capacity: 2,
            ..SvoConfig::default()
        };
        let context = ConstructionContext::new(config).expect("Failed to create context");
        let leaf = NodeRef { level: 0, index: 0 };
        set_brick(&context.nodes, leaf, 1);

        let color = &context.bricks.channels[BrickChannel::Color.index()];
        let normal = &context.bricks.channels[BrickChannel::Normal.index()];
        let value = Vec4::new(0.1, 0.2, 0.3, 1.0);
        write_voxel(color, 1, CENTER_VOXEL, value);
        write_voxel(normal, 1, CENTER_VOXEL, Vec4::ONE);

        let params = PassParams {
            channel: BrickChannel::Color.index() as u32,
            ..PassParams::default()
        };
        spread_leaf_bricks(&context, &params, 0);

        for voxel in 0..VOXELS_PER_BRICK {
            assert_eq!(read_voxel(color, 1, voxel), value);
        }
        // Other channels and bricks untouched
        assert_eq!(read_voxel(normal, 1, 0), Vec4::ZERO);
        assert_eq!(read_voxel(color, 0, 0), Vec4::ZERO);
    }
}
