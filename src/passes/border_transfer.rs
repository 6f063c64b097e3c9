//! Border transfer
//!
//! For one level and channel, every populated node pulls the centre voxel of the node one step
//! away in each of the 26 directions into the matching border voxel. Diagonal nodes are found
//! by chaining face-neighbour pointers, or from the root when no chain reaches them. Where no
//! node or no brick exists, the voxel keeps its seed value.

use super::PassParams;
use crate::constants::brick::{CENTER_VOXEL, VOXELS_PER_BRICK};
use crate::svo::brick_pool_operations::{offset_for_voxel, read_center, write_voxel};
use crate::svo::node_pool_operations::{brick, neighbour_in_direction};
use crate::svo::{ConstructionContext, NodeRef};

pub fn border_transfer(context: &ConstructionContext, params: &PassParams, id: u32) {
    let node = NodeRef {
        level: params.level as usize,
        index: id,
    };
    let Some(slot) = brick(&context.nodes, node) else {
        return;
    };
    let Some(storage) = context.bricks.channels.get(params.channel as usize) else {
        return;
    };

    for voxel in (0..VOXELS_PER_BRICK).filter(|&v| v != CENTER_VOXEL) {
        let source = neighbour_in_direction(&context.nodes, node, offset_for_voxel(voxel))
            .and_then(|neighbour| brick(&context.nodes, neighbour));
        if let Some(source) = source {
            write_voxel(storage, slot, voxel, read_center(storage, source));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SvoConfig;
    use crate::svo::brick_pool_operations::{read_voxel, voxel_for_offset};
    use crate::svo::node_pool_operations::{set_brick, set_neighbour};
    use crate::svo::BrickChannel;
    use glam::{IVec3, Vec4};

    #[test]
    fn test_pulls_face_and_diagonal_centres() {
        let config = SvoConfig {
            voxel_grid_resolution: 4,
            brick_pool_capacity: 4,
            ..SvoConfig::default()
        };
        let context = ConstructionContext::new(config).expect("Failed to create context");
        let storage = &context.bricks.channels[BrickChannel::Color.index()];

        // Leaves 0 (0,0,0), 1 (1,0,0), 3 (1,1,0); leaf 2 exists without a brick
        let leaves: Vec<NodeRef> = (0..4).map(|index| NodeRef { level: 1, index }).collect();
        set_brick(&context.nodes, leaves[0], 0);
        set_brick(&context.nodes, leaves[1], 1);
        set_brick(&context.nodes, leaves[3], 2);
        set_neighbour(&context.nodes, leaves[0], 0, Some(1));
        set_neighbour(&context.nodes, leaves[0], 2, Some(2));
        set_neighbour(&context.nodes, leaves[1], 2, Some(3));
        set_neighbour(&context.nodes, leaves[2], 0, Some(3));

        let seed = Vec4::splat(0.25);
        for voxel in 0..VOXELS_PER_BRICK {
            write_voxel(storage, 0, voxel, seed);
        }
        write_voxel(storage, 1, CENTER_VOXEL, Vec4::new(1.0, 0.0, 0.0, 1.0));
        write_voxel(storage, 2, CENTER_VOXEL, Vec4::new(0.0, 1.0, 0.0, 1.0));

        let params = PassParams {
            level: 1,
            channel: 0,
            ..PassParams::default()
        };
        border_transfer(&context, &params, 0);

        let at = |offset: IVec3| read_voxel(storage, 0, voxel_for_offset(offset));
        assert_eq!(at(IVec3::X), Vec4::new(1.0, 0.0, 0.0, 1.0));
        assert_eq!(at(IVec3::new(1, 1, 0)), Vec4::new(0.0, 1.0, 0.0, 1.0));
        // Neighbour without a brick and missing neighbours keep the seed
        assert_eq!(at(IVec3::Y), seed);
        assert_eq!(at(IVec3::NEG_X), seed);
        assert_eq!(at(IVec3::ZERO), seed);
    }
}
