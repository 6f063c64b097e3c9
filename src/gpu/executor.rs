//! Records construction passes as compute dispatches
//!
//! Each pass becomes one compute pass per dispatch; wgpu synchronizes storage writes between
//! dispatches, so `barrier` only marks the ordering point for logging. Clears are recorded as
//! `clear_buffer` transfers. Everything for one rebuild goes into a single encoder that is
//! submitted by `finish_rebuild`.

use super::readback::read_buffers;
use super::resources::{GpuResources, PARAMS_STRIDE};
use super::{GpuContext, SvoPipelines};
use crate::config::SvoConfig;
use crate::constants::brick::VOXELS_PER_BRICK;
use crate::constants::counters::{
    BRICK_COUNT, COUNTER_WORDS, DROPPED_BLOCKS, DROPPED_BRICKS, DROPPED_FRAGMENTS,
    FRAGMENT_COUNT, LEVEL_BLOCKS,
};
use crate::constants::dispatch::WORKGROUP_SIZE;
use crate::constants::octree::NEIGHBOURS_PER_NODE;
use crate::error::{OptionExt, SvoError, SvoResult};
use crate::executor::PassExecutor;
use crate::passes::{DispatchSource, Kernel, Pass, PassParams, Resources};
use crate::scene::{prepare_triangles, Scene};
use crate::stage::build_passes;
use crate::svo::brick_pool_operations::VOXEL_WORDS;
use crate::svo::node_pool_data::NODE_WORDS;
use crate::svo::snapshot::voxels_from_words;
use crate::svo::{BrickChannel, LevelSnapshot, NodeSlot, OctreeSnapshot, VoxelFragment};
use std::sync::Arc;
use wgpu::{CommandEncoder, Device, Queue};

/// Byte range of one counter word
fn counter_range(word: usize) -> (u64, u64) {
    (word as u64 * 4, 4)
}

pub struct GpuExecutor {
    device: Arc<Device>,
    queue: Arc<Queue>,
    config: SvoConfig,
    resources: GpuResources,
    pipelines: SvoPipelines,
    encoder: Option<CommandEncoder>,
    params: Vec<PassParams>,
    triangle_count: u32,
    readback: bool,
    passes_recorded: u64,
    barriers: u64,
}

impl GpuExecutor {
    pub fn new(context: &GpuContext, config: SvoConfig) -> SvoResult<Self> {
        config.validate()?;
        let params_capacity = build_passes(&config).len();
        let resources = GpuResources::new(&context.device, &context.queue, &config, params_capacity)?;
        let pipelines = SvoPipelines::new(&context.device, &resources)?;
        Ok(Self {
            device: Arc::clone(&context.device),
            queue: Arc::clone(&context.queue),
            config,
            resources,
            pipelines,
            encoder: None,
            params: Vec::with_capacity(params_capacity),
            triangle_count: 0,
            readback: false,
            passes_recorded: 0,
            barriers: 0,
        })
    }

    /// Read the pools back after every rebuild and publish them as snapshots
    pub fn with_readback(mut self, readback: bool) -> Self {
        self.readback = readback;
        self
    }

    /// Device buffers, for consumers that bind the octree directly
    pub fn resources(&self) -> &GpuResources {
        &self.resources
    }

    pub fn passes_recorded(&self) -> u64 {
        self.passes_recorded
    }

    pub fn barriers(&self) -> u64 {
        self.barriers
    }

    fn upload(&mut self, pass: &Pass, scene: &Scene) -> SvoResult<()> {
        match pass {
            Pass::Voxelize => {
                let triangles = prepare_triangles(scene, &self.config);
                self.triangle_count = triangles.len() as u32;
                self.resources
                    .upload_triangles(&self.device, &self.queue, &self.config, &triangles)
            }
            Pass::LightInjection => {
                let light = scene.light_input()?;
                self.resources.upload_light(&self.device, &self.queue, &light)
            }
            _ => Ok(()),
        }
    }

    /// Record a clear pass; returns false for non-clear passes
    fn record_clear(&mut self, pass: &Pass) -> bool {
        let r = &self.resources;
        let (buffers, counter_words): (Vec<&wgpu::Buffer>, Vec<usize>) = match pass {
            Pass::ClearNodePool => (
                vec![&r.nodes],
                std::iter::once(DROPPED_BLOCKS)
                    .chain(LEVEL_BLOCKS..COUNTER_WORDS)
                    .collect(),
            ),
            Pass::ClearNeighbours => (vec![&r.neighbours], Vec::new()),
            Pass::ClearBrickPool => (
                vec![&r.bricks, &r.accumulators],
                vec![BRICK_COUNT, DROPPED_BRICKS],
            ),
            Pass::ClearFragmentList => (Vec::new(), vec![FRAGMENT_COUNT, DROPPED_FRAGMENTS]),
            _ => return false,
        };
        let encoder = self.encoder.get_or_insert_with(|| {
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("SVO Rebuild"),
                })
        });
        for buffer in buffers {
            encoder.clear_buffer(buffer, 0, None);
        }
        for word in counter_words {
            let (offset, size) = counter_range(word);
            encoder.clear_buffer(&r.counters, offset, Some(size));
        }
        true
    }

    /// Copy every pool back and assemble a snapshot
    fn read_snapshot(&self) -> SvoResult<OctreeSnapshot> {
        let config = &self.config;
        let r = &self.resources;
        let total_nodes = r
            .level_offsets
            .last()
            .copied()
            .ok_or_svo(|| SvoError::Internal {
                message: "level offsets are empty".to_string(),
            })? as u64;
        let channel_voxels = config.brick_pool_capacity as u64 * VOXELS_PER_BRICK as u64;
        let words = read_buffers(
            &self.device,
            &self.queue,
            &[
                ("counters", &r.counters, COUNTER_WORDS as u64 * 4),
                ("nodes", &r.nodes, total_nodes * NODE_WORDS as u64 * 4),
                (
                    "neighbours",
                    &r.neighbours,
                    total_nodes * NEIGHBOURS_PER_NODE as u64 * 4,
                ),
                (
                    "bricks",
                    &r.bricks,
                    channel_voxels * config.channel_count() as u64 * VOXEL_WORDS as u64 * 4,
                ),
                (
                    "fragments",
                    &r.fragments,
                    config.fragment_capacity as u64 * std::mem::size_of::<VoxelFragment>() as u64,
                ),
            ],
        )?;
        let [counters, nodes, neighbours, bricks, fragments]: [Vec<u32>; 5] =
            words.try_into().map_err(|_| SvoError::Internal {
                message: "readback returned the wrong number of buffers".to_string(),
            })?;

        let levels = (0..config.num_levels())
            .map(|level| {
                let start = r.level_offsets[level] as usize;
                let end = r.level_offsets[level + 1] as usize;
                LevelSnapshot {
                    nodes: bytemuck::cast_slice::<u32, NodeSlot>(
                        &nodes[start * NODE_WORDS..end * NODE_WORDS],
                    )
                    .to_vec(),
                    neighbours: bytemuck::cast_slice::<u32, [u32; NEIGHBOURS_PER_NODE]>(
                        &neighbours[start * NEIGHBOURS_PER_NODE..end * NEIGHBOURS_PER_NODE],
                    )
                    .to_vec(),
                }
            })
            .collect();
        let channel_words = channel_voxels as usize * VOXEL_WORDS;
        let bricks = BrickChannel::enabled(config)
            .iter()
            .map(|channel| {
                let start = channel.index() * channel_words;
                voxels_from_words(&bricks[start..start + channel_words])
            })
            .collect();
        let fragments = bytemuck::cast_slice::<u32, VoxelFragment>(&fragments).to_vec();

        Ok(OctreeSnapshot::from_parts(
            config, &counters, levels, bricks, fragments,
        ))
    }
}

impl PassExecutor for GpuExecutor {
    fn begin_rebuild(&mut self) -> SvoResult<()> {
        self.params.clear();
        self.encoder = Some(
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("SVO Rebuild"),
                }),
        );
        Ok(())
    }

    fn execute(&mut self, pass: &Pass, scene: &Scene) -> SvoResult<()> {
        let _span = tracing::debug_span!("svo_pass_record", pass = %pass).entered();
        self.passes_recorded += 1;

        if self.record_clear(pass) {
            return Ok(());
        }
        if let Some(channel) = pass.channel() {
            if channel.index() >= self.config.channel_count() {
                return Err(SvoError::PassUnsupported {
                    pass: pass.to_string(),
                    reason: format!("{} channel is disabled", channel.name()),
                });
            }
        }
        if matches!(pass, Pass::LightInjection) && !self.config.irradiance {
            return Err(SvoError::PassUnsupported {
                pass: pass.to_string(),
                reason: "irradiance is disabled".to_string(),
            });
        }
        if self.params.len() >= self.resources.params_capacity {
            return Err(SvoError::Internal {
                message: format!(
                    "pass parameter buffer full ({} slots)",
                    self.resources.params_capacity
                ),
            });
        }
        if let Pass::PatchIndirect(slot) = pass {
            slot.checked()?;
        }
        self.upload(pass, scene)?;

        let offset = (self.params.len() as u64 * PARAMS_STRIDE) as u32;
        self.params.push(pass.params());

        let encoder = self.encoder.get_or_insert_with(|| {
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("SVO Rebuild"),
                })
        });
        for dispatch in pass.dispatches(self.config.leaf_level()) {
            let pipeline = self.pipelines.get(dispatch.kernel)?;
            let mut compute = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(pass.name()),
                timestamp_writes: None,
            });
            compute.set_pipeline(pipeline);
            compute.set_bind_group(0, &self.resources.main_bind_group, &[offset]);
            if dispatch.kernel == Kernel::PatchIndirect {
                compute.set_bind_group(1, &self.resources.indirect_bind_group, &[]);
            }
            match dispatch.source {
                DispatchSource::Transfer => {}
                DispatchSource::Direct(threads) => {
                    compute.dispatch_workgroups(threads.div_ceil(WORKGROUP_SIZE), 1, 1)
                }
                DispatchSource::PerTriangle => {
                    compute.dispatch_workgroups(self.triangle_count.div_ceil(WORKGROUP_SIZE), 1, 1)
                }
                DispatchSource::Indirect(slot) => compute.dispatch_workgroups_indirect(
                    &self.resources.indirect,
                    slot.checked()?.byte_offset(),
                ),
            }
        }
        log::trace!("[GpuExecutor::execute] Recorded {}", pass);
        Ok(())
    }

    fn barrier(&mut self, resources: Resources) -> SvoResult<()> {
        self.barriers += 1;
        log::trace!("[GpuExecutor::barrier] {:?}", resources);
        Ok(())
    }

    fn finish_rebuild(&mut self) -> SvoResult<Option<OctreeSnapshot>> {
        let Some(encoder) = self.encoder.take() else {
            return Ok(None);
        };
        self.resources.write_params(&self.queue, &self.params);
        self.queue.submit(Some(encoder.finish()));
        log::debug!(
            "[GpuExecutor::finish_rebuild] Submitted {} passes",
            self.params.len()
        );
        if !self.readback {
            return Ok(None);
        }
        self.read_snapshot().map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::CpuExecutor;
    use crate::scene::{Material, Mesh, SceneNode};
    use crate::stage::SvoConstructionStage;
    use glam::{Mat4, UVec3, Vec3, Vec4};

    fn gpu() -> Option<GpuContext> {
        match GpuContext::new() {
            Ok(context) => Some(context),
            Err(e) => {
                eprintln!("Skipping GPU test: {}", e);
                None
            }
        }
    }

    fn scene() -> Scene {
        Scene::new(vec![SceneNode::new(
            "box",
            Mesh::cuboid(Vec3::ZERO, Vec3::splat(5.0)),
            Material {
                albedo: Vec4::new(0.2, 0.7, 0.4, 1.0),
            },
        )
        .with_transform(Mat4::from_translation(Vec3::splat(8.0)))])
    }

    #[test]
    fn test_gpu_build_matches_cpu() {
        let Some(context) = gpu() else {
            return;
        };
        let config = SvoConfig {
            voxel_grid_resolution: 16,
            volume_min: [0.0, 0.0, 0.0],
            volume_size: 16.0,
            fragment_capacity: 1 << 14,
            max_nodes_per_level: 1 << 12,
            brick_pool_capacity: 1 << 11,
            ..SvoConfig::default()
        };
        let scene = scene();

        let mut gpu_stage = SvoConstructionStage::new(config.clone()).expect("Failed to create stage");
        let mut gpu_executor = GpuExecutor::new(&context, config.clone())
            .expect("Failed to create GPU executor")
            .with_readback(true);
        gpu_stage
            .rebuild(&mut gpu_executor, &scene)
            .expect("GPU rebuild failed");
        let gpu_snapshot = gpu_stage.latest().expect("GPU snapshot");

        let mut cpu_stage = SvoConstructionStage::new(config.clone()).expect("Failed to create stage");
        let mut cpu_executor = CpuExecutor::new(config).expect("Failed to create CPU executor");
        cpu_stage
            .rebuild(&mut cpu_executor, &scene)
            .expect("CPU rebuild failed");
        let cpu_snapshot = cpu_stage.latest().expect("CPU snapshot");

        // Allocation order differs between backends, counts and per-position content do not
        assert_eq!(gpu_snapshot.stats, cpu_snapshot.stats);
        for fragment in &cpu_snapshot.fragments {
            let voxel: UVec3 = fragment.position();
            for level in 0..cpu_snapshot.num_levels() {
                let cpu_node = cpu_snapshot.find_node(level, voxel).expect("CPU node");
                let gpu_node = gpu_snapshot.find_node(level, voxel).expect("GPU node");
                let cpu_center = cpu_snapshot
                    .brick_voxel(cpu_node, BrickChannel::Color, UVec3::ONE)
                    .expect("CPU centre");
                let gpu_center = gpu_snapshot
                    .brick_voxel(gpu_node, BrickChannel::Color, UVec3::ONE)
                    .expect("GPU centre");
                assert!((cpu_center - gpu_center).abs().max_element() < 1e-4);
            }
        }
    }

    #[test]
    fn test_without_readback_nothing_is_published() {
        let Some(context) = gpu() else {
            return;
        };
        let config = SvoConfig {
            voxel_grid_resolution: 8,
            brick_pool_capacity: 64,
            max_nodes_per_level: 512,
            fragment_capacity: 1024,
            ..SvoConfig::default()
        };
        let mut stage = SvoConstructionStage::new(config.clone()).expect("Failed to create stage");
        let mut executor = GpuExecutor::new(&context, config).expect("Failed to create GPU executor");
        assert!(stage
            .run_frame(&mut executor, &Scene::default())
            .expect("Frame failed"));
        assert!(stage.latest().is_none());
        assert_eq!(executor.passes_recorded() as usize, stage.passes().count());
    }
}
