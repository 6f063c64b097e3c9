//! Mipmap propagator
//!
//! A parent brick voxel at offset `e` (each axis in -1..=1) covers the eight child-level cells
//! `q = 2e + s`, `s` in {0,1}^3, measured in child node sizes from the parent's low corner.
//! Per axis, `q` in {0,1} is child `q`'s centre, `q = 2` is child 1's `+1` border and `q = -1`
//! is child 0's `-1` border; `q` in {-2,3} lies outside every child. Cells of children
//! without a brick are empty space (zero). Uncovered cells take a substitute built from voxels
//! the earlier sub-steps already wrote:
//!
//! | step    | substitute                                   |
//! |---------|----------------------------------------------|
//! | center  | (all cells covered)                          |
//! | faces   | parent centre                                |
//! | corners | mean of the three adjacent faces             |
//! | edges   | mean of the two adjacent faces and corners   |
//!
//! Every voxel is the mean of its eight cells summed in a fixed order, so re-running a step
//! with unchanged children reproduces it bit for bit.

use super::PassParams;
use crate::constants::brick::VOXELS_PER_BRICK;
use crate::svo::brick_pool_operations::{
    offset_for_voxel, read_voxel, voxel_for_offset, write_voxel,
};
use crate::svo::node_pool_operations::{brick, child_block, child_index, octant_offset};
use crate::svo::word_buffer::WordBuffer;
use crate::svo::{ConstructionContext, NodeRef};
use glam::{IVec3, Vec4};

/// Parent node with brick, child block and channel storage resolved
struct MipTarget<'a> {
    context: &'a ConstructionContext,
    storage: &'a WordBuffer,
    node: NodeRef,
    slot: u32,
    block: Option<u32>,
}

impl<'a> MipTarget<'a> {
    fn resolve(context: &'a ConstructionContext, params: &PassParams, id: u32) -> Option<Self> {
        let node = NodeRef {
            level: params.level as usize,
            index: id,
        };
        let slot = brick(&context.nodes, node)?;
        let storage = context.bricks.channels.get(params.channel as usize)?;
        Some(Self {
            context,
            storage,
            node,
            slot,
            block: child_block(&context.nodes, node),
        })
    }

    fn own(&self, offset: IVec3) -> Vec4 {
        read_voxel(self.storage, self.slot, voxel_for_offset(offset))
    }

    fn write(&self, offset: IVec3, value: Vec4) {
        write_voxel(self.storage, self.slot, voxel_for_offset(offset), value);
    }

    /// Value of child-level cell `q`, `None` when no child covers it
    fn cell(&self, q: IVec3) -> Option<Vec4> {
        let mut octant = IVec3::ZERO;
        let mut border = IVec3::ZERO;
        for axis in 0..3 {
            let (o, d) = match q[axis] {
                0 => (0, 0),
                1 => (1, 0),
                2 => (1, 1),
                -1 => (0, -1),
                _ => return None,
            };
            octant[axis] = o;
            border[axis] = d;
        }
        let Some(block) = self.block else {
            return Some(Vec4::ZERO);
        };
        let child = NodeRef {
            level: self.node.level + 1,
            index: child_index(block, (octant.x | (octant.y << 1) | (octant.z << 2)) as u32),
        };
        Some(match brick(&self.context.nodes, child) {
            Some(child_slot) => read_voxel(self.storage, child_slot, voxel_for_offset(border)),
            None => Vec4::ZERO,
        })
    }

    /// Mean of the eight cells under parent voxel `e`
    fn filter(&self, e: IVec3, substitute: Vec4) -> Vec4 {
        let mut sum = Vec4::ZERO;
        for s in 0..8 {
            let q = e * 2 + octant_offset(s).as_ivec3();
            sum += self.cell(q).unwrap_or(substitute);
        }
        sum / 8.0
    }
}

/// Border offsets with exactly `nonzero` non-zero axes, in brick voxel order
fn offsets_with(nonzero: usize) -> impl Iterator<Item = IVec3> {
    (0..VOXELS_PER_BRICK)
        .map(offset_for_voxel)
        .filter(move |offset| offset.abs().to_array().iter().sum::<i32>() as usize == nonzero)
}

/// Unit offset along `axis` with the sign of `component`
fn axis_offset(axis: usize, component: i32) -> IVec3 {
    let mut offset = IVec3::ZERO;
    offset[axis] = component;
    offset
}

pub fn mipmap_center(context: &ConstructionContext, params: &PassParams, id: u32) {
    if let Some(target) = MipTarget::resolve(context, params, id) {
        target.write(IVec3::ZERO, target.filter(IVec3::ZERO, Vec4::ZERO));
    }
}

pub fn mipmap_faces(context: &ConstructionContext, params: &PassParams, id: u32) {
    let Some(target) = MipTarget::resolve(context, params, id) else {
        return;
    };
    let center = target.own(IVec3::ZERO);
    for face in offsets_with(1) {
        target.write(face, target.filter(face, center));
    }
}

pub fn mipmap_corners(context: &ConstructionContext, params: &PassParams, id: u32) {
    let Some(target) = MipTarget::resolve(context, params, id) else {
        return;
    };
    for corner in offsets_with(3) {
        let faces = (0..3).fold(Vec4::ZERO, |sum, axis| {
            sum + target.own(axis_offset(axis, corner[axis]))
        });
        target.write(corner, target.filter(corner, faces / 3.0));
    }
}

pub fn mipmap_edges(context: &ConstructionContext, params: &PassParams, id: u32) {
    let Some(target) = MipTarget::resolve(context, params, id) else {
        return;
    };
    for edge in offsets_with(2) {
        let mut neighbours = Vec4::ZERO;
        let mut free_axis = 0;
        for axis in 0..3 {
            if edge[axis] == 0 {
                free_axis = axis;
            } else {
                neighbours += target.own(axis_offset(axis, edge[axis]));
            }
        }
        for sign in [-1, 1] {
            let mut corner = edge;
            corner[free_axis] = sign;
            neighbours += target.own(corner);
        }
        target.write(edge, target.filter(edge, neighbours / 4.0));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SvoConfig;
    use crate::constants::brick::CENTER_VOXEL;
    use crate::svo::brick_pool_operations::read_center;
    use crate::svo::node_pool_operations::{set_brick, set_child_block};
    use crate::svo::BrickChannel;

    /// Root with one child block; only child octant 0 carries a brick
    fn single_child_context(child_value: Vec4) -> ConstructionContext {
        let config = SvoConfig {
            voxel_grid_resolution: 4,
            brick_pool_capacity: 4,
            ..SvoConfig::default()
        };
        let context = ConstructionContext::new(config).expect("Failed to create context");
        let root = NodeRef { level: 0, index: 0 };
        set_brick(&context.nodes, root, 0);
        set_child_block(&context.nodes, root, 0);
        set_brick(&context.nodes, NodeRef { level: 1, index: 0 }, 1);

        let storage = &context.bricks.channels[BrickChannel::Color.index()];
        for voxel in 0..VOXELS_PER_BRICK {
            write_voxel(storage, 1, voxel, child_value);
        }
        context
    }

    fn run_all(context: &ConstructionContext) {
        let params = PassParams::default();
        mipmap_center(context, &params, 0);
        mipmap_faces(context, &params, 0);
        mipmap_corners(context, &params, 0);
        mipmap_edges(context, &params, 0);
    }

    #[test]
    fn test_offsets_partition_border() {
        assert_eq!(offsets_with(0).count(), 1);
        assert_eq!(offsets_with(1).count(), 6);
        assert_eq!(offsets_with(2).count(), 12);
        assert_eq!(offsets_with(3).count(), 8);
    }

    #[test]
    fn test_single_child_filters_into_parent() {
        let value = Vec4::new(0.8, 0.4, 0.0, 1.0);
        let context = single_child_context(value);
        run_all(&context);

        let storage = &context.bricks.channels[BrickChannel::Color.index()];
        let at = |offset: IVec3| read_voxel(storage, 0, voxel_for_offset(offset));
        // One child of eight populated
        assert_eq!(read_center(storage, 0), value / 8.0);
        // -X face: four cells fall on -X borders (only child 0's is populated), four are
        // uncovered and take the parent centre
        let center = value / 8.0;
        let expected_face = (value + center * 4.0) / 8.0;
        assert!((at(IVec3::NEG_X) - expected_face).length() < 1e-6);
        // +X face: covered cells come from empty children
        assert!((at(IVec3::X) - center * 0.5).length() < 1e-6);
        // Every voxel written with something finite
        for voxel in 0..VOXELS_PER_BRICK {
            let v = read_voxel(storage, 0, voxel);
            assert!(v.is_finite());
            assert!(v.cmpge(Vec4::ZERO).all());
        }
        assert_ne!(read_voxel(storage, 0, 0), Vec4::ZERO);
        assert_eq!(read_voxel(storage, 0, CENTER_VOXEL), value / 8.0);
    }

    #[test]
    fn test_rerun_is_bit_identical() {
        let context = single_child_context(Vec4::new(0.3, 0.7, 0.1, 1.0));
        run_all(&context);
        let storage = &context.bricks.channels[BrickChannel::Color.index()];
        let first = storage.read_words(0, VOXELS_PER_BRICK as usize * 4);
        run_all(&context);
        assert_eq!(storage.read_words(0, VOXELS_PER_BRICK as usize * 4), first);
    }

    #[test]
    fn test_parent_without_children_is_empty() {
        let config = SvoConfig {
            voxel_grid_resolution: 4,
            brick_pool_capacity: 2,
            ..SvoConfig::default()
        };
        let context = ConstructionContext::new(config).expect("Failed to create context");
        set_brick(&context.nodes, NodeRef { level: 0, index: 0 }, 0);
        let storage = &context.bricks.channels[0];
        write_voxel(storage, 0, CENTER_VOXEL, Vec4::ONE);

        run_all(&context);
        for voxel in 0..VOXELS_PER_BRICK {
            assert_eq!(read_voxel(storage, 0, voxel), Vec4::ZERO);
        }
    }
}
