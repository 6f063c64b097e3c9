//! Octree topology builder
//!
//! Grows the node pool one level at a time. For level `i`:
//! - `neighbour_pointers`: every allocated node resolves its six face neighbours by walking
//!   from the root with its stored position, so neighbours may live under another parent.
//! - `flag_nodes`: every fragment walks to its level-`i` node and marks it touched.
//! - `allocate_nodes`: every touched non-leaf node claims its child block exactly once and
//!   writes the children's positions.
//!
//! `patch_indirect` runs between levels and turns the counters into dispatch arguments.

use super::PassParams;
use crate::constants::octree::{FLAG_CLAIMED, FLAG_TOUCHED};
use crate::svo::indirect::{slot_item_count, IndirectArgs, IndirectSlot};
use crate::svo::node_pool_operations::{
    child_index, level_position, octant_offset, position, set_child_block, set_flag,
    set_neighbour, set_position, traverse, FACE_DIRECTIONS,
};
use crate::svo::{ConstructionContext, NodeRef};
use glam::IVec3;

/// Single thread: write dispatch arguments for `params.slot` from the counters
pub fn patch_indirect(context: &ConstructionContext, params: &PassParams, _id: u32) {
    let Some(slot) = IndirectSlot::from_index(params.slot) else {
        log::error!("[patch_indirect] Invalid slot index {}", params.slot);
        return;
    };
    let items = slot_item_count(&context.config, &context.counters, slot);
    context.indirect.write(slot, IndirectArgs::for_items(items));
}

pub fn neighbour_pointers(context: &ConstructionContext, params: &PassParams, id: u32) {
    let level = params.level as usize;
    let node = NodeRef { level, index: id };
    let origin = position(&context.nodes, node).as_ivec3();
    let extent = 1i32 << level;

    for (face, direction) in FACE_DIRECTIONS.iter().enumerate() {
        let target = origin + *direction;
        let inside = target.cmpge(IVec3::ZERO).all() && target.cmplt(IVec3::splat(extent)).all();
        let neighbour = if inside {
            traverse(&context.nodes, level, target.as_uvec3()).map(|n| n.index)
        } else {
            None
        };
        set_neighbour(&context.nodes, node, face, neighbour);
    }
}

pub fn flag_nodes(context: &ConstructionContext, params: &PassParams, id: u32) {
    let level = params.level as usize;
    let fragment = context.fragments.read(id);
    let target = level_position(&context.config, fragment.position(), level);
    if let Some(node) = traverse(&context.nodes, level, target) {
        set_flag(&context.nodes, node, FLAG_TOUCHED);
    }
}

pub fn allocate_nodes(context: &ConstructionContext, params: &PassParams, id: u32) {
    let level = params.level as usize;
    if level >= context.config.leaf_level() {
        return;
    }
    let node = NodeRef { level, index: id };
    let flags = crate::svo::node_pool_operations::flags(&context.nodes, node);
    if flags & FLAG_TOUCHED == 0 {
        return;
    }
    // First claimer allocates, everyone else sees the block already claimed
    if set_flag(&context.nodes, node, FLAG_CLAIMED) & FLAG_CLAIMED != 0 {
        return;
    }

    let child_level = level + 1;
    let Some(block) = context
        .counters
        .reserve_block(child_level, context.config.level_block_capacity(child_level))
    else {
        return;
    };

    let base = position(&context.nodes, node) * 2;
    for octant in 0..8 {
        let child = NodeRef {
            level: child_level,
            index: child_index(block, octant),
        };
        set_position(&context.nodes, child, base + octant_offset(octant));
    }
    set_child_block(&context.nodes, node, block);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SvoConfig;
    use crate::svo::fragment_list::VoxelFragment;
    use crate::svo::node_pool_operations::{child_block, flags, neighbour};
    use glam::{UVec3, Vec3, Vec4};

    fn context() -> ConstructionContext {
        ConstructionContext::new(SvoConfig {
            voxel_grid_resolution: 8,
            max_nodes_per_level: 64,
            brick_pool_capacity: 8,
            ..SvoConfig::default()
        })
        .expect("Failed to create context")
    }

    fn add_fragment(context: &ConstructionContext, voxel: UVec3) {
        let slot = context
            .counters
            .reserve_fragment(context.config.fragment_capacity)
            .expect("Failed to reserve fragment");
        context
            .fragments
            .write(slot, &VoxelFragment::new(voxel, Vec4::ONE, Vec3::Z));
    }

    fn grow_level(context: &ConstructionContext, level: usize) {
        let params = PassParams {
            level: level as u32,
            ..PassParams::default()
        };
        let nodes = slot_item_count(
            &context.config,
            &context.counters,
            IndirectSlot::LevelNodes(level),
        );
        if level > 0 {
            for id in 0..nodes {
                neighbour_pointers(context, &params, id);
            }
        }
        for id in 0..context.counters.fragment_count(context.config.fragment_capacity) {
            flag_nodes(context, &params, id);
        }
        for id in 0..nodes {
            allocate_nodes(context, &params, id);
        }
    }

    #[test]
    fn test_single_path_allocation() {
        let context = context();
        add_fragment(&context, UVec3::new(7, 0, 0));
        // Same leaf twice and from two fragments: still one block per parent
        add_fragment(&context, UVec3::new(6, 1, 1));
        for level in 0..3 {
            grow_level(&context, level);
        }

        let counters = &context.counters;
        assert_eq!(counters.block_count(1, 1), 1);
        assert_eq!(counters.block_count(2, 8), 1);

        let root = NodeRef { level: 0, index: 0 };
        assert_eq!(child_block(&context.nodes, root), Some(0));
        let level1 = NodeRef { level: 1, index: 1 };
        assert_eq!(position(&context.nodes, level1), UVec3::new(1, 0, 0));
        assert_eq!(flags(&context.nodes, level1) & FLAG_TOUCHED, FLAG_TOUCHED);

        let leaf = traverse(&context.nodes, 2, UVec3::new(3, 0, 0)).expect("Leaf must exist");
        assert_eq!(flags(&context.nodes, leaf), FLAG_TOUCHED);
        // Leaves never get children
        assert_eq!(child_block(&context.nodes, leaf), None);
    }

    #[test]
    fn test_repeat_allocate_is_noop() {
        let context = context();
        add_fragment(&context, UVec3::ZERO);
        grow_level(&context, 0);
        let params = PassParams::default();
        allocate_nodes(&context, &params, 0);
        assert_eq!(context.counters.block_count(1, 1), 1);
    }

    #[test]
    fn test_neighbours_cross_parent_boundaries() {
        let context = context();
        // Leaves (1,0,0) and (2,0,0) sit under different level-1 parents
        add_fragment(&context, UVec3::new(2, 0, 0));
        add_fragment(&context, UVec3::new(4, 0, 0));
        for level in 0..3 {
            grow_level(&context, level);
        }

        let a = traverse(&context.nodes, 2, UVec3::new(1, 0, 0)).expect("Leaf a");
        let b = traverse(&context.nodes, 2, UVec3::new(2, 0, 0)).expect("Leaf b");
        assert_ne!(child_block(&context.nodes, NodeRef { level: 1, index: 0 }), None);
        assert_eq!(neighbour(&context.nodes, a, 0), Some(b));
        assert_eq!(neighbour(&context.nodes, b, 1), Some(a));
        // -X of the grid edge has no neighbour
        let edge = traverse(&context.nodes, 2, UVec3::new(0, 0, 0)).expect("Edge leaf");
        assert_eq!(neighbour(&context.nodes, edge, 1), None);
        // Untouched siblings are still valid neighbours
        assert_eq!(
            neighbour(&context.nodes, b, 2),
            Some(NodeRef {
                level: 2,
                index: b.index + 2
            })
        );
        // +Y of leaf (1,1,0) lies under an unallocated level-1 parent
        let upper = NodeRef {
            level: 2,
            index: a.index + 2,
        };
        assert_eq!(position(&context.nodes, upper), UVec3::new(1, 1, 0));
        assert_eq!(neighbour(&context.nodes, upper, 2), None);
    }

    #[test]
    fn test_patch_indirect_reads_counters() {
        let context = context();
        add_fragment(&context, UVec3::ZERO);
        add_fragment(&context, UVec3::ONE);
        let params = PassParams {
            slot: IndirectSlot::Fragments.index() as u32,
            ..PassParams::default()
        };
        patch_indirect(&context, &params, 0);
        assert_eq!(context.indirect.read(IndirectSlot::Fragments).item_count, 2);
        assert_eq!(context.indirect.read(IndirectSlot::Fragments).groups, [1, 1, 1]);
    }
}
