//! Scene inputs consumed by the construction stage
//!
//! Scene graph, light and shadow map are owned by collaborators. The stage only reads them
//! once per rebuild: geometry is flattened into grid-space triangles for the voxelizer, and the
//! light plus its shadow map feed the irradiance channel.

use crate::config::SvoConfig;
use crate::error::{SvoError, SvoResult};
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};
use std::sync::Arc;

/// Triangle mesh in object space
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    pub positions: Vec<Vec3>,
    pub indices: Vec<u32>,
}

impl Mesh {
    /// Build a non-indexed mesh from triangle corner triples
    pub fn from_triangles(triangles: &[[Vec3; 3]]) -> Self {
        let positions: Vec<Vec3> = triangles.iter().flatten().copied().collect();
        let indices = (0..positions.len() as u32).collect();
        Self { positions, indices }
    }

    /// Axis-aligned box centred on `center`
    pub fn cuboid(center: Vec3, half_extents: Vec3) -> Self {
        let corner = |x: f32, y: f32, z: f32| center + half_extents * Vec3::new(x, y, z);
        let positions = vec![
            corner(-1.0, -1.0, -1.0),
            corner(1.0, -1.0, -1.0),
            corner(1.0, 1.0, -1.0),
            corner(-1.0, 1.0, -1.0),
            corner(-1.0, -1.0, 1.0),
            corner(1.0, -1.0, 1.0),
            corner(1.0, 1.0, 1.0),
            corner(-1.0, 1.0, 1.0),
        ];
        #[rustfmt::skip]
        let indices = vec![
            0, 2, 1, 0, 3, 2, // -Z
            4, 5, 6, 4, 6, 7, // +Z
            0, 1, 5, 0, 5, 4, // -Y
            3, 7, 6, 3, 6, 2, // +Y
            0, 4, 7, 0, 7, 3, // -X
            1, 2, 6, 1, 6, 5, // +X
        ];
        Self { positions, indices }
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

/// Surface material
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Material {
    /// Linear RGBA albedo, alpha is coverage
    pub albedo: Vec4,
}

impl Default for Material {
    fn default() -> Self {
        Self { albedo: Vec4::ONE }
    }
}

/// Renderable scene node
#[derive(Debug, Clone)]
pub struct SceneNode {
    pub name: String,
    pub transform: Mat4,
    pub mesh: Arc<Mesh>,
    pub material: Material,
}

impl SceneNode {
    pub fn new(name: impl Into<String>, mesh: Mesh, material: Material) -> Self {
        Self {
            name: name.into(),
            transform: Mat4::IDENTITY,
            mesh: Arc::new(mesh),
            material,
        }
    }

    pub fn with_transform(mut self, transform: Mat4) -> Self {
        self.transform = transform;
        self
    }
}

/// Directional light
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightNode {
    /// Direction the light travels (normalized on use)
    pub direction: Vec3,
    pub color: Vec3,
    pub intensity: f32,
}

impl LightNode {
    /// Orthographic light view-projection enclosing the voxel volume
    pub fn view_proj_for(&self, config: &SvoConfig) -> Mat4 {
        let size = config.volume_size;
        let center = Vec3::from(config.volume_min) + Vec3::splat(size * 0.5);
        let direction = self.direction.normalize_or_zero();
        let radius = size * 0.5 * 3f32.sqrt();
        let eye = center - direction * radius * 2.0;
        let up = if direction.abs().dot(Vec3::Y) > 0.99 {
            Vec3::Z
        } else {
            Vec3::Y
        };
        let view = Mat4::look_at_rh(eye, center, up);
        let proj = Mat4::orthographic_rh(-radius, radius, -radius, radius, 0.0, radius * 4.0);
        proj * view
    }
}

/// Light-space depth map produced by the shadow pass
#[derive(Debug, Clone)]
pub struct ShadowMap {
    /// Side length in texels
    pub size: u32,
    /// Row-major depth in [0, 1], row 0 at the top
    pub depth: Vec<f32>,
    /// World to light clip space
    pub view_proj: Mat4,
}

impl ShadowMap {
    /// Shadow map with every texel at the far plane (nothing occluded)
    pub fn cleared(size: u32, view_proj: Mat4) -> Self {
        Self {
            size,
            depth: vec![1.0; size as usize * size as usize],
            view_proj,
        }
    }

    pub fn validate(&self) -> SvoResult<()> {
        let expected = (self.size as usize).saturating_mul(self.size as usize);
        if self.size == 0 || self.depth.len() != expected {
            return Err(SvoError::ShadowMapSize {
                expected,
                found: self.depth.len(),
            });
        }
        Ok(())
    }
}

/// Light parameters as the injection kernels see them
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct LightUniform {
    pub view_proj: [[f32; 4]; 4],
    /// Normalized travel direction (w unused)
    pub direction: [f32; 4],
    /// `color * intensity` (w unused)
    pub radiance: [f32; 4],
    pub shadow_map_size: u32,
    pub depth_bias: f32,
    pub _padding: [u32; 2],
}

static_assertions::const_assert_eq!(std::mem::size_of::<LightUniform>(), 112);

/// Depth tolerance when comparing a fragment against the shadow map
pub const SHADOW_DEPTH_BIAS: f32 = 0.005;

impl LightUniform {
    pub fn new(light: &LightNode, shadow_map: &ShadowMap) -> Self {
        Self {
            view_proj: shadow_map.view_proj.to_cols_array_2d(),
            direction: light.direction.normalize_or_zero().extend(0.0).to_array(),
            radiance: (light.color * light.intensity).extend(0.0).to_array(),
            shadow_map_size: shadow_map.size,
            depth_bias: SHADOW_DEPTH_BIAS,
            _padding: [0; 2],
        }
    }
}

/// Light and shadow map resolved for one rebuild
#[derive(Debug, Clone)]
pub struct LightInput {
    pub uniform: LightUniform,
    pub shadow_depth: Vec<f32>,
}

/// Everything the stage reads from collaborators for one rebuild
#[derive(Debug, Clone, Default)]
pub struct Scene {
    pub nodes: Vec<SceneNode>,
    pub light: Option<LightNode>,
    pub shadow_map: Option<ShadowMap>,
}

impl Scene {
    pub fn new(nodes: Vec<SceneNode>) -> Self {
        Self {
            nodes,
            light: None,
            shadow_map: None,
        }
    }

    pub fn with_light(mut self, light: LightNode, shadow_map: ShadowMap) -> Self {
        self.light = Some(light);
        self.shadow_map = Some(shadow_map);
        self
    }

    pub fn triangle_count(&self) -> usize {
        self.nodes.iter().map(|n| n.mesh.triangle_count()).sum()
    }

    /// Light and validated shadow map, both required once irradiance is enabled
    pub fn light_input(&self) -> SvoResult<LightInput> {
        let (Some(light), Some(shadow_map)) = (&self.light, &self.shadow_map) else {
            return Err(SvoError::MissingLight);
        };
        shadow_map.validate()?;
        Ok(LightInput {
            uniform: LightUniform::new(light, shadow_map),
            shadow_depth: shadow_map.depth.clone(),
        })
    }
}

/// Triangle transformed into finest-grid space, ready for voxelization
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct GridTriangle {
    /// Corners in grid units (w unused)
    pub v0: [f32; 4],
    pub v1: [f32; 4],
    pub v2: [f32; 4],
    /// Material albedo
    pub color: [f32; 4],
    /// World-space face normal (w unused)
    pub normal: [f32; 4],
}

static_assertions::const_assert_eq!(std::mem::size_of::<GridTriangle>(), 80);

impl GridTriangle {
    pub fn corners(&self) -> [Vec3; 3] {
        [
            Vec4::from(self.v0).truncate(),
            Vec4::from(self.v1).truncate(),
            Vec4::from(self.v2).truncate(),
        ]
    }
}

/// Flatten scene geometry into grid-space triangles
///
/// Degenerate triangles are skipped. Triangles outside the volume are kept; the voxelizer
/// clips them against the grid.
pub fn prepare_triangles(scene: &Scene, config: &SvoConfig) -> Vec<GridTriangle> {
    let scale = config.voxel_grid_resolution as f32 / config.volume_size;
    let origin = Vec3::from(config.volume_min);
    let mut triangles = Vec::with_capacity(scene.triangle_count());

    for node in &scene.nodes {
        let mesh = &node.mesh;
        for tri in mesh.indices.chunks_exact(3) {
            let fetch = |i: u32| mesh.positions.get(i as usize).copied();
            let (Some(a), Some(b), Some(c)) = (fetch(tri[0]), fetch(tri[1]), fetch(tri[2]))
            else {
                log::warn!(
                    "[prepare_triangles] Node '{}' has out-of-range index, skipping triangle",
                    node.name
                );
                continue;
            };
            let world = [
                node.transform.transform_point3(a),
                node.transform.transform_point3(b),
                node.transform.transform_point3(c),
            ];
            let normal = (world[1] - world[0]).cross(world[2] - world[0]);
            if normal.length_squared() <= f32::EPSILON * f32::EPSILON {
                continue;
            }
            let grid = world.map(|p| ((p - origin) * scale).extend(0.0).to_array());
            triangles.push(GridTriangle {
                v0: grid[0],
                v1: grid[1],
                v2: grid[2],
                color: node.material.albedo.to_array(),
                normal: normal.normalize().extend(0.0).to_array(),
            });
        }
    }

    triangles
}
