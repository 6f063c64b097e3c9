//! Voxel fragment producer
//!
//! One thread per grid-space triangle. Each thread walks the finest voxels under the triangle's
//! clipped bounding box and emits a fragment for every voxel the triangle overlaps
//! (separating-axis test over 13 axes). Fragments past capacity are dropped and counted.

use super::PassParams;
use crate::svo::fragment_list::VoxelFragment;
use crate::svo::ConstructionContext;
use glam::{UVec3, Vec3, Vec4};

pub fn voxelize(context: &ConstructionContext, _params: &PassParams, id: u32) {
    let Some(triangle) = context.triangles.get(id as usize) else {
        return;
    };
    let corners = triangle.corners();
    let resolution = context.config.voxel_grid_resolution;
    let Some((min, max)) = clipped_bounds(&corners, resolution) else {
        return;
    };

    let color = Vec4::from(triangle.color);
    let normal = Vec4::from(triangle.normal).truncate();
    let capacity = context.config.fragment_capacity;

    for z in min.z..=max.z {
        for y in min.y..=max.y {
            for x in min.x..=max.x {
                let voxel = UVec3::new(x, y, z);
                let center = voxel.as_vec3() + Vec3::splat(0.5);
                if !triangle_box_overlap(center, Vec3::splat(0.5), &corners) {
                    continue;
                }
                if let Some(slot) = context.counters.reserve_fragment(capacity) {
                    context
                        .fragments
                        .write(slot, &VoxelFragment::new(voxel, color, normal));
                }
            }
        }
    }
}

/// Voxel range under the triangle, clipped to the grid; `None` when fully outside
pub fn clipped_bounds(corners: &[Vec3; 3], resolution: u32) -> Option<(UVec3, UVec3)> {
    let lo = corners[0].min(corners[1]).min(corners[2]).floor();
    let hi = corners[0].max(corners[1]).max(corners[2]).floor();
    let limit = (resolution - 1) as f32;
    if hi.min_element() < 0.0 || lo.max_element() > limit || !lo.is_finite() || !hi.is_finite() {
        return None;
    }
    let lo = lo.max(Vec3::ZERO).as_uvec3();
    let hi = hi.min(Vec3::splat(limit)).as_uvec3();
    Some((lo, hi))
}

/// Triangle / axis-aligned box overlap by separating axes
pub fn triangle_box_overlap(center: Vec3, half: Vec3, corners: &[Vec3; 3]) -> bool {
    let v = corners.map(|p| p - center);
    let edges = [v[1] - v[0], v[2] - v[1], v[0] - v[2]];

    let separated = |axis: Vec3| {
        let p0 = axis.dot(v[0]);
        let p1 = axis.dot(v[1]);
        let p2 = axis.dot(v[2]);
        let radius = half.dot(axis.abs());
        p0.min(p1).min(p2) > radius || p0.max(p1).max(p2) < -radius
    };

    // Edge x box-axis cross products
    for edge in edges {
        for axis in [Vec3::X, Vec3::Y, Vec3::Z] {
            let candidate = axis.cross(edge);
            if candidate.length_squared() > f32::EPSILON && separated(candidate) {
                return false;
            }
        }
    }

    // Box face normals
    for axis in [Vec3::X, Vec3::Y, Vec3::Z] {
        if separated(axis) {
            return false;
        }
    }

    // Triangle plane
    let normal = edges[0].cross(edges[1]);
    normal.dot(v[0]).abs() <= half.dot(normal.abs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SvoConfig;
    use crate::scene::{prepare_triangles, Material, Mesh, Scene, SceneNode};

    fn context_for(config: SvoConfig, triangles: &[[Vec3; 3]]) -> ConstructionContext {
        let mut context = ConstructionContext::new(config.clone()).expect("Failed to create context");
        let scene = Scene::new(vec![SceneNode::new(
            "test",
            Mesh::from_triangles(triangles),
            Material {
                albedo: Vec4::new(1.0, 0.0, 0.0, 1.0),
            },
        )]);
        context.triangles = prepare_triangles(&scene, &config);
        context
    }

    fn grid_config(fragment_capacity: u32) -> SvoConfig {
        SvoConfig {
            voxel_grid_resolution: 8,
            volume_min: [0.0, 0.0, 0.0],
            volume_size: 8.0,
            fragment_capacity,
            brick_pool_capacity: 8,
            ..SvoConfig::default()
        }
    }

    fn run(context: &ConstructionContext) {
        for id in 0..context.triangles.len() as u32 {
            voxelize(context, &PassParams::default(), id);
        }
    }

    #[test]
    fn test_overlap_axes() {
        let tri = [
            Vec3::new(0.2, 0.2, 0.5),
            Vec3::new(0.8, 0.2, 0.5),
            Vec3::new(0.2, 0.8, 0.5),
        ];
        assert!(triangle_box_overlap(Vec3::splat(0.5), Vec3::splat(0.5), &tri));
        assert!(!triangle_box_overlap(Vec3::new(1.5, 0.5, 0.5), Vec3::splat(0.5), &tri));

        // Diagonal triangle missing the box corner: only an edge axis separates it
        let diagonal = [
            Vec3::new(2.0, 0.0, 0.5),
            Vec3::new(0.0, 2.0, 0.5),
            Vec3::new(2.0, 2.0, 0.5),
        ];
        assert!(!triangle_box_overlap(Vec3::splat(0.4), Vec3::splat(0.4), &diagonal));
    }

    #[test]
    fn test_small_triangle_emits_one_fragment() {
        let context = context_for(
            grid_config(16),
            &[[
                Vec3::new(3.2, 5.2, 1.5),
                Vec3::new(3.8, 5.2, 1.5),
                Vec3::new(3.2, 5.8, 1.5),
            ]],
        );
        run(&context);

        assert_eq!(context.counters.fragment_count(16), 1);
        let fragment = context.fragments.read(0);
        assert_eq!(fragment.position(), UVec3::new(3, 5, 1));
        assert_eq!(fragment.color().x, 1.0);
    }

    #[test]
    fn test_plane_covers_footprint() {
        // Quad at z = 4.5 spanning the whole grid
        let context = context_for(
            grid_config(1024),
            &[
                [
                    Vec3::new(0.0, 0.0, 4.5),
                    Vec3::new(8.0, 0.0, 4.5),
                    Vec3::new(8.0, 8.0, 4.5),
                ],
                [
                    Vec3::new(0.0, 0.0, 4.5),
                    Vec3::new(8.0, 8.0, 4.5),
                    Vec3::new(0.0, 8.0, 4.5),
                ],
            ],
        );
        run(&context);

        let count = context.counters.fragment_count(1024);
        let fragments = context.fragments.read_all(count);
        assert!(fragments.iter().all(|f| f.position[2] == 4));
        let mut cells: Vec<[u32; 3]> = fragments.iter().map(|f| f.position).collect();
        cells.sort_unstable();
        cells.dedup();
        assert_eq!(cells.len(), 64);
    }

    #[test]
    fn test_outside_triangles_are_clipped() {
        let context = context_for(
            grid_config(16),
            &[[
                Vec3::new(-5.0, -5.0, -5.0),
                Vec3::new(-4.0, -5.0, -5.0),
                Vec3::new(-5.0, -4.0, -5.0),
            ]],
        );
        run(&context);
        assert_eq!(context.counters.fragment_count(16), 0);
    }

    #[test]
    fn test_overflow_is_dropped_and_counted() {
        let context = context_for(
            grid_config(4),
            &[[
                Vec3::new(0.0, 0.0, 0.5),
                Vec3::new(8.0, 0.0, 0.5),
                Vec3::new(0.0, 8.0, 0.5),
            ]],
        );
        run(&context);
        assert_eq!(context.counters.fragment_count(4), 4);
        assert!(
            context
                .counters
                .words
                .load(crate::constants::counters::DROPPED_FRAGMENTS)
                > 0
        );
    }
}
