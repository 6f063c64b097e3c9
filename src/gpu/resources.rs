//! Device buffers and bind groups for the construction kernels
//!
//! Group 0 carries every pool plus the uniforms and is shared by all kernels. Pass parameters
//! sit in one uniform buffer addressed with a dynamic offset, one 256-byte slot per pass.
//! Group 1 holds the indirect argument buffer and is only bound for `patch_indirect`, since a
//! buffer cannot be written as storage while a dispatch reads it as indirect arguments.

use crate::config::SvoConfig;
use crate::constants::brick::{ACCUMULATOR_WORDS, VOXELS_PER_BRICK};
use crate::constants::counters::COUNTER_WORDS;
use crate::constants::dispatch::INDIRECT_SLOT_BYTES;
use crate::constants::octree::{MAX_LEVELS, NEIGHBOURS_PER_NODE};
use crate::error::{SvoError, SvoResult};
use crate::passes::PassParams;
use crate::scene::{GridTriangle, LightInput, LightUniform};
use crate::svo::fragment_list::VoxelFragment;
use crate::svo::{IndirectSlot, NodeSlot};
use bytemuck::{Pod, Zeroable};
use std::num::NonZeroU64;
use wgpu::{BindGroup, BindGroupLayout, Buffer, BufferUsages, Device, Queue};

/// Stride between pass parameter slots (minimum uniform offset alignment)
pub const PARAMS_STRIDE: u64 = 256;

/// Per-rebuild constants shared by every kernel
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct SvoUniforms {
    /// Per level: first node slot, slot capacity, child block capacity, unused
    pub levels: [[u32; 4]; MAX_LEVELS],
    /// Volume min corner and voxel size
    pub volume: [f32; 4],
    pub num_levels: u32,
    pub resolution: u32,
    pub fragment_capacity: u32,
    pub brick_capacity: u32,
    pub triangle_count: u32,
    pub channel_count: u32,
    pub _padding: [u32; 2],
}

static_assertions::const_assert_eq!(std::mem::size_of::<SvoUniforms>(), 304);

impl SvoUniforms {
    pub fn new(config: &SvoConfig, triangle_count: u32) -> Self {
        let offsets = level_offsets(config);
        let mut levels = [[0u32; 4]; MAX_LEVELS];
        for (level, entry) in levels.iter_mut().enumerate().take(config.num_levels()) {
            *entry = [
                offsets[level],
                config.level_capacity(level),
                config.level_block_capacity(level),
                0,
            ];
        }
        let min = config.volume_min;
        Self {
            levels,
            volume: [
                min[0],
                min[1],
                min[2],
                config.volume_size / config.voxel_grid_resolution as f32,
            ],
            num_levels: config.num_levels() as u32,
            resolution: config.voxel_grid_resolution,
            fragment_capacity: config.fragment_capacity,
            brick_capacity: config.brick_pool_capacity,
            triangle_count,
            channel_count: config.channel_count() as u32,
            _padding: [0; 2],
        }
    }
}

/// First node slot of each level in the concatenated node buffer, plus the total at the end
pub fn level_offsets(config: &SvoConfig) -> Vec<u32> {
    let mut offsets = Vec::with_capacity(config.num_levels() + 1);
    let mut next = 0;
    for level in 0..config.num_levels() {
        offsets.push(next);
        next += config.level_capacity(level);
    }
    offsets.push(next);
    offsets
}

/// All device buffers and bind groups of one construction stage
pub struct GpuResources {
    pub fragments: Buffer,
    pub counters: Buffer,
    pub nodes: Buffer,
    pub neighbours: Buffer,
    /// Every enabled channel back to back, `brick_pool_capacity * 27` voxels each
    pub bricks: Buffer,
    pub accumulators: Buffer,
    pub triangles: Buffer,
    pub shadow_depth: Buffer,
    pub uniforms: Buffer,
    pub light: Buffer,
    pub params: Buffer,
    pub indirect: Buffer,

    pub level_offsets: Vec<u32>,
    pub params_capacity: usize,
    triangle_capacity: u64,
    shadow_capacity: u64,

    pub main_layout: BindGroupLayout,
    pub indirect_layout: BindGroupLayout,
    pub main_bind_group: BindGroup,
    pub indirect_bind_group: BindGroup,
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn uniform_entry(binding: u32, dynamic: bool, size: u64) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: dynamic,
            min_binding_size: NonZeroU64::new(size),
        },
        count: None,
    }
}

/// Storage buffer checked against the device binding limit
fn create_storage(
    device: &Device,
    label: &str,
    size: u64,
    usage: BufferUsages,
) -> SvoResult<Buffer> {
    // Zero-sized bindings are invalid
    let size = size.max(16);
    let limit = device.limits().max_storage_buffer_binding_size as u64;
    if size > limit {
        return Err(SvoError::BufferTooLarge {
            label: label.to_string(),
            size,
            limit,
        });
    }
    Ok(device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size,
        usage: BufferUsages::STORAGE | usage,
        mapped_at_creation: false,
    }))
}

fn create_uniform(device: &Device, label: &str, size: u64) -> Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size,
        usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

impl GpuResources {
    /// Allocate every pool for `config`; `params_capacity` is the number of passes per rebuild
    pub fn new(device: &Device, queue: &Queue, config: &SvoConfig, params_capacity: usize) -> SvoResult<Self> {
        let level_offsets = level_offsets(config);
        let total_nodes = *level_offsets.last().unwrap_or(&0) as u64;
        let readable = BufferUsages::COPY_SRC | BufferUsages::COPY_DST;

        let fragments = create_storage(
            device,
            "SVO Fragment List",
            config.fragment_capacity as u64 * std::mem::size_of::<VoxelFragment>() as u64,
            readable,
        )?;
        let counters = create_storage(device, "SVO Counters", COUNTER_WORDS as u64 * 4, readable)?;
        let nodes = create_storage(
            device,
            "SVO Node Pool",
            total_nodes * std::mem::size_of::<NodeSlot>() as u64,
            readable,
        )?;
        let neighbours = create_storage(
            device,
            "SVO Neighbour Table",
            total_nodes * NEIGHBOURS_PER_NODE as u64 * 4,
            readable,
        )?;
        let brick_voxels = config.brick_pool_capacity as u64 * VOXELS_PER_BRICK as u64;
        let bricks = create_storage(
            device,
            "SVO Brick Pool",
            brick_voxels * config.channel_count() as u64 * 16,
            readable,
        )?;
        let accumulators = create_storage(
            device,
            "SVO Brick Accumulators",
            config.brick_pool_capacity as u64 * ACCUMULATOR_WORDS as u64 * 4,
            BufferUsages::COPY_DST,
        )?;
        let indirect = create_storage(
            device,
            "SVO Indirect Args",
            IndirectSlot::COUNT as u64 * INDIRECT_SLOT_BYTES,
            BufferUsages::INDIRECT | BufferUsages::COPY_SRC,
        )?;

        let triangle_capacity = 64;
        let triangles = create_storage(
            device,
            "SVO Triangles",
            triangle_capacity * std::mem::size_of::<GridTriangle>() as u64,
            BufferUsages::COPY_DST,
        )?;
        let shadow_capacity = 1;
        let shadow_depth = create_storage(device, "SVO Shadow Depth", shadow_capacity * 4, BufferUsages::COPY_DST)?;

        let uniforms = create_uniform(device, "SVO Uniforms", std::mem::size_of::<SvoUniforms>() as u64);
        let light = create_uniform(device, "SVO Light", std::mem::size_of::<LightUniform>() as u64);
        let params = create_uniform(device, "SVO Pass Params", params_capacity.max(1) as u64 * PARAMS_STRIDE);
        queue.write_buffer(&uniforms, 0, bytemuck::bytes_of(&SvoUniforms::new(config, 0)));
        queue.write_buffer(&light, 0, bytemuck::bytes_of(&LightUniform::zeroed()));

        let main_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("SVO Construction Bind Group Layout"),
            entries: &[
                storage_entry(0, false),
                storage_entry(1, false),
                storage_entry(2, false),
                storage_entry(3, false),
                storage_entry(4, false),
                storage_entry(5, false),
                storage_entry(6, true),
                storage_entry(7, true),
                uniform_entry(8, false, std::mem::size_of::<SvoUniforms>() as u64),
                uniform_entry(9, false, std::mem::size_of::<LightUniform>() as u64),
                uniform_entry(10, true, std::mem::size_of::<PassParams>() as u64),
            ],
        });
        let indirect_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("SVO Indirect Bind Group Layout"),
            entries: &[storage_entry(0, false)],
        });
        let indirect_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("SVO Indirect Bind Group"),
            layout: &indirect_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: indirect.as_entire_binding(),
            }],
        });
        let main_bind_group = create_main_bind_group(
            device,
            &main_layout,
            [
                &fragments,
                &counters,
                &nodes,
                &neighbours,
                &bricks,
                &accumulators,
                &triangles,
                &shadow_depth,
            ],
            &uniforms,
            &light,
            &params,
        );

        log::info!(
            "[GpuResources::new] {} node slots, {} bricks x {} channels, {} fragment slots",
            total_nodes,
            config.brick_pool_capacity,
            config.channel_count(),
            config.fragment_capacity
        );

        Ok(Self {
            fragments,
            counters,
            nodes,
            neighbours,
            bricks,
            accumulators,
            triangles,
            shadow_depth,
            uniforms,
            light,
            params,
            indirect,
            level_offsets,
            params_capacity,
            triangle_capacity,
            shadow_capacity,
            main_layout,
            indirect_layout,
            main_bind_group,
            indirect_bind_group,
        })
    }

    fn rebuild_main_bind_group(&mut self, device: &Device) {
        self.main_bind_group = create_main_bind_group(
            device,
            &self.main_layout,
            [
                &self.fragments,
                &self.counters,
                &self.nodes,
                &self.neighbours,
                &self.bricks,
                &self.accumulators,
                &self.triangles,
                &self.shadow_depth,
            ],
            &self.uniforms,
            &self.light,
            &self.params,
        );
    }

    /// Upload grid triangles, growing the buffer when the scene got bigger
    pub fn upload_triangles(
        &mut self,
        device: &Device,
        queue: &Queue,
        config: &SvoConfig,
        triangles: &[GridTriangle],
    ) -> SvoResult<()> {
        let needed = triangles.len() as u64;
        if needed > self.triangle_capacity {
            let capacity = needed.next_power_of_two();
            self.triangles = create_storage(
                device,
                "SVO Triangles",
                capacity * std::mem::size_of::<GridTriangle>() as u64,
                BufferUsages::COPY_DST,
            )?;
            self.triangle_capacity = capacity;
            self.rebuild_main_bind_group(device);
            log::debug!("[GpuResources::upload_triangles] Grew triangle buffer to {}", capacity);
        }
        if !triangles.is_empty() {
            queue.write_buffer(&self.triangles, 0, bytemuck::cast_slice(triangles));
        }
        let uniforms = SvoUniforms::new(config, triangles.len() as u32);
        queue.write_buffer(&self.uniforms, 0, bytemuck::bytes_of(&uniforms));
        Ok(())
    }

    /// Upload the light uniform and shadow depth texels
    pub fn upload_light(&mut self, device: &Device, queue: &Queue, light: &LightInput) -> SvoResult<()> {
        let needed = light.shadow_depth.len() as u64;
        if needed > self.shadow_capacity {
            self.shadow_depth = create_storage(device, "SVO Shadow Depth", needed * 4, BufferUsages::COPY_DST)?;
            self.shadow_capacity = needed;
            self.rebuild_main_bind_group(device);
        }
        if !light.shadow_depth.is_empty() {
            queue.write_buffer(&self.shadow_depth, 0, bytemuck::cast_slice(&light.shadow_depth));
        }
        queue.write_buffer(&self.light, 0, bytemuck::bytes_of(&light.uniform));
        Ok(())
    }

    /// Write the recorded pass parameters, one per `PARAMS_STRIDE` slot
    pub fn write_params(&self, queue: &Queue, params: &[PassParams]) {
        if params.is_empty() {
            return;
        }
        let mut bytes = vec![0u8; params.len() * PARAMS_STRIDE as usize];
        for (slot, p) in params.iter().enumerate() {
            let start = slot * PARAMS_STRIDE as usize;
            bytes[start..start + std::mem::size_of::<PassParams>()]
                .copy_from_slice(bytemuck::bytes_of(p));
        }
        queue.write_buffer(&self.params, 0, &bytes);
    }
}

fn create_main_bind_group(
    device: &Device,
    layout: &BindGroupLayout,
    storage: [&Buffer; 8],
    uniforms: &Buffer,
    light: &Buffer,
    params: &Buffer,
) -> BindGroup {
    let mut entries: Vec<wgpu::BindGroupEntry> = storage
        .iter()
        .enumerate()
        .map(|(binding, buffer)| wgpu::BindGroupEntry {
            binding: binding as u32,
            resource: buffer.as_entire_binding(),
        })
        .collect();
    entries.push(wgpu::BindGroupEntry {
        binding: 8,
        resource: uniforms.as_entire_binding(),
    });
    entries.push(wgpu::BindGroupEntry {
        binding: 9,
        resource: light.as_entire_binding(),
    });
    entries.push(wgpu::BindGroupEntry {
        binding: 10,
        resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
            buffer: params,
            offset: 0,
            size: NonZeroU64::new(std::mem::size_of::<PassParams>() as u64),
        }),
    });
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("SVO Construction Bind Group"),
        layout,
        entries: &entries,
    })
}
