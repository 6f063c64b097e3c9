//! Leaf and brick allocator
//!
//! `alloc_bricks` gives every touched node of every level one brick; untouched nodes never get
//! one. Leaf payload is then written in two dispatches: fragments add fixed-point sums into the
//! brick's accumulator, and one thread per leaf resolves the average into the centre voxel.
//! Integer sums make the result independent of fragment order.
//!
//! Light injection follows the same accumulate/resolve shape for the irradiance channel.

use super::PassParams;
use crate::constants::brick::{
    ACC_COLOR, ACC_COUNT, ACC_IRRADIANCE, ACC_NORMAL, CENTER_VOXEL, IRRADIANCE_MAX,
    IRRADIANCE_SCALE, UNORM8_SCALE,
};
use crate::constants::octree::FLAG_TOUCHED;
use crate::scene::LightUniform;
use crate::svo::brick_pool_operations::{accumulator_word, write_voxel};
use crate::svo::indirect::split_all_nodes_id;
use crate::svo::fragment_list::{unorm8_component, VoxelFragment};
use crate::svo::node_pool_operations::{brick, flags, level_position, set_brick, traverse};
use crate::svo::{BrickChannel, ConstructionContext, NodeRef};
use glam::{Mat4, UVec2, Vec2, Vec3, Vec4};

pub fn alloc_bricks(context: &ConstructionContext, _params: &PassParams, id: u32) {
    let Some((level, index)) = split_all_nodes_id(&context.config, &context.counters, id) else {
        return;
    };
    let node = NodeRef { level, index };
    if flags(&context.nodes, node) & FLAG_TOUCHED == 0 {
        return;
    }
    if let Some(slot) = context
        .counters
        .reserve_brick(context.config.brick_pool_capacity)
    {
        set_brick(&context.nodes, node, slot);
    }
}

/// Brick of the leaf containing `fragment`
fn leaf_brick(context: &ConstructionContext, fragment: &VoxelFragment) -> Option<u32> {
    let leaf_level = context.config.leaf_level();
    let position = level_position(&context.config, fragment.position(), leaf_level);
    let leaf = traverse(&context.nodes, leaf_level, position)?;
    brick(&context.nodes, leaf)
}

pub fn accumulate_leaf(context: &ConstructionContext, _params: &PassParams, id: u32) {
    let fragment = context.fragments.read(id);
    let Some(slot) = leaf_brick(context, &fragment) else {
        return;
    };
    let acc = &context.bricks.accumulators;
    for component in 0..4 {
        acc.fetch_add(
            accumulator_word(slot, ACC_COLOR + component),
            unorm8_component(fragment.color, component),
        );
    }
    for component in 0..3 {
        acc.fetch_add(
            accumulator_word(slot, ACC_NORMAL + component),
            unorm8_component(fragment.normal, component),
        );
    }
    acc.fetch_add(accumulator_word(slot, ACC_COUNT), 1);
}

/// Leaf node `id` and its brick when it received fragments
fn populated_leaf(context: &ConstructionContext, id: u32) -> Option<(u32, u32)> {
    let leaf = NodeRef {
        level: context.config.leaf_level(),
        index: id,
    };
    let slot = brick(&context.nodes, leaf)?;
    let count = context
        .bricks
        .accumulators
        .load(accumulator_word(slot, ACC_COUNT));
    (count > 0).then_some((slot, count))
}

pub fn resolve_leaf(context: &ConstructionContext, _params: &PassParams, id: u32) {
    let Some((slot, count)) = populated_leaf(context, id) else {
        return;
    };
    let acc = &context.bricks.accumulators;
    let scale = 1.0 / (count as f32 * UNORM8_SCALE);
    let sum = |field: u32| acc.load(accumulator_word(slot, field)) as f32 * scale;

    let color = Vec4::new(
        sum(ACC_COLOR),
        sum(ACC_COLOR + 1),
        sum(ACC_COLOR + 2),
        sum(ACC_COLOR + 3),
    );
    let normal = Vec3::new(sum(ACC_NORMAL), sum(ACC_NORMAL + 1), sum(ACC_NORMAL + 2)) * 2.0
        - Vec3::ONE;

    write_voxel(
        &context.bricks.channels[BrickChannel::Color.index()],
        slot,
        CENTER_VOXEL,
        color,
    );
    write_voxel(
        &context.bricks.channels[BrickChannel::Normal.index()],
        slot,
        CENTER_VOXEL,
        normal.normalize_or_zero().extend(1.0),
    );
}

/// Texel of the shadow map covering `uv`, `None` outside the map
pub fn shadow_texel(uv: Vec2, size: u32) -> Option<UVec2> {
    if uv.cmplt(Vec2::ZERO).any() || uv.cmpgt(Vec2::ONE).any() {
        return None;
    }
    let limit = (size - 1) as f32;
    Some((uv * size as f32).floor().min(Vec2::splat(limit)).as_uvec2())
}

/// Irradiance a fragment receives from the light; 0 when shadowed
pub fn fragment_irradiance(
    context: &ConstructionContext,
    light: &LightUniform,
    shadow_depth: &[f32],
    fragment: &VoxelFragment,
) -> Vec3 {
    let config = &context.config;
    let voxel_size = config.volume_size / config.voxel_grid_resolution as f32;
    let world = Vec3::from(config.volume_min)
        + (fragment.position().as_vec3() + Vec3::splat(0.5)) * voxel_size;

    let clip = Mat4::from_cols_array_2d(&light.view_proj) * world.extend(1.0);
    let ndc = clip.truncate() / clip.w;
    let uv = Vec2::new(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5);

    // Outside the shadow map counts as lit
    if let Some(texel) = shadow_texel(uv, light.shadow_map_size) {
        let index = (texel.y * light.shadow_map_size + texel.x) as usize;
        let occluder = shadow_depth.get(index).copied().unwrap_or(1.0);
        if ndc.z - light.depth_bias > occluder {
            return Vec3::ZERO;
        }
    }

    let direction = Vec4::from(light.direction).truncate();
    let lambert = fragment.normal().normalize_or_zero().dot(-direction).max(0.0);
    fragment.color().truncate() * Vec4::from(light.radiance).truncate() * lambert
}

pub fn accumulate_irradiance(context: &ConstructionContext, _params: &PassParams, id: u32) {
    let Some(light) = context.light.as_ref() else {
        return;
    };
    let fragment = context.fragments.read(id);
    let Some(slot) = leaf_brick(context, &fragment) else {
        return;
    };
    let irradiance = fragment_irradiance(context, &light.uniform, &light.shadow_depth, &fragment);
    for (component, value) in irradiance.to_array().into_iter().enumerate() {
        let fixed = (value.clamp(0.0, IRRADIANCE_MAX) * IRRADIANCE_SCALE + 0.5).floor() as u32;
        context
            .bricks
            .accumulators
            .saturating_add(accumulator_word(slot, ACC_IRRADIANCE + component as u32), fixed);
    }
}

pub fn resolve_irradiance(context: &ConstructionContext, _params: &PassParams, id: u32) {
    let Some((slot, count)) = populated_leaf(context, id) else {
        return;
    };
    let Some(storage) = context.bricks.channels.get(BrickChannel::Irradiance.index()) else {
        return;
    };
    let acc = &context.bricks.accumulators;
    let scale = 1.0 / (count as f32 * IRRADIANCE_SCALE);
    let value = Vec3::new(
        acc.load(accumulator_word(slot, ACC_IRRADIANCE)) as f32,
        acc.load(accumulator_word(slot, ACC_IRRADIANCE + 1)) as f32,
        acc.load(accumulator_word(slot, ACC_IRRADIANCE + 2)) as f32,
    ) * scale;
    write_voxel(storage, slot, CENTER_VOXEL, value.extend(1.0));
}
