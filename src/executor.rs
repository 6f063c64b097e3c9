//! Pass executors
//!
//! The stage only knows passes and barriers. An executor turns them into work: the CPU
//! executor runs each kernel as a rayon loop with one closure call per GPU thread, the GPU
//! executor (feature `gpu`) records compute dispatches.

use crate::config::SvoConfig;
use crate::error::{SvoError, SvoResult};
use crate::passes::{
    border_transfer, clear, leaf, mipmap, spread, topology, voxelize, DispatchSource, Kernel,
    Pass, PassParams, Resources,
};
use crate::scene::{prepare_triangles, Scene};
use crate::svo::brick_pool_operations::channel_storage;
use crate::svo::{ConstructionContext, OctreeSnapshot};
use rayon::prelude::*;
use std::sync::atomic::{fence, Ordering};

/// Runs construction passes in the order the stage issues them
pub trait PassExecutor {
    /// Called once before the first pass of a rebuild
    fn begin_rebuild(&mut self) -> SvoResult<()> {
        Ok(())
    }

    /// Execute one pass; `scene` is read by the passes that consume scene inputs
    fn execute(&mut self, pass: &Pass, scene: &Scene) -> SvoResult<()>;

    /// Make every write to `resources` visible to the passes that follow
    fn barrier(&mut self, resources: Resources) -> SvoResult<()>;

    /// Finish the rebuild; returns a snapshot when the backend publishes one
    fn finish_rebuild(&mut self) -> SvoResult<Option<OctreeSnapshot>>;
}

/// Kernel signature shared by every CPU kernel: context, parameters, thread id
pub type CpuKernel = fn(&ConstructionContext, &PassParams, u32);

/// CPU function implementing `kernel`
pub fn cpu_kernel(kernel: Kernel) -> CpuKernel {
    match kernel {
        Kernel::Voxelize => voxelize::voxelize,
        Kernel::PatchIndirect => topology::patch_indirect,
        Kernel::NeighbourPointers => topology::neighbour_pointers,
        Kernel::Flag => topology::flag_nodes,
        Kernel::Allocate => topology::allocate_nodes,
        Kernel::AllocBricks => leaf::alloc_bricks,
        Kernel::AccumulateLeaf => leaf::accumulate_leaf,
        Kernel::ResolveLeaf => leaf::resolve_leaf,
        Kernel::AccumulateIrradiance => leaf::accumulate_irradiance,
        Kernel::ResolveIrradiance => leaf::resolve_irradiance,
        Kernel::SpreadLeafBricks => spread::spread_leaf_bricks,
        Kernel::BorderTransfer => border_transfer::border_transfer,
        Kernel::MipmapCenter => mipmap::mipmap_center,
        Kernel::MipmapFaces => mipmap::mipmap_faces,
        Kernel::MipmapCorners => mipmap::mipmap_corners,
        Kernel::MipmapEdges => mipmap::mipmap_edges,
    }
}

/// Reference backend running every kernel on the rayon pool
pub struct CpuExecutor {
    context: ConstructionContext,
    passes_executed: u64,
    barriers: u64,
}

impl CpuExecutor {
    pub fn new(config: SvoConfig) -> SvoResult<Self> {
        Ok(Self {
            context: ConstructionContext::new(config)?,
            passes_executed: 0,
            barriers: 0,
        })
    }

    pub fn context(&self) -> &ConstructionContext {
        &self.context
    }

    /// Copy of the current pools
    pub fn snapshot(&self) -> OctreeSnapshot {
        OctreeSnapshot::capture(&self.context)
    }

    pub fn passes_executed(&self) -> u64 {
        self.passes_executed
    }

    pub fn barriers(&self) -> u64 {
        self.barriers
    }

    fn thread_count(&self, source: DispatchSource) -> u32 {
        match source {
            DispatchSource::Transfer => 0,
            DispatchSource::Direct(threads) => threads,
            DispatchSource::PerTriangle => self.context.triangles.len() as u32,
            // Exactly what the GPU sees: the patched item count, not the live counter
            DispatchSource::Indirect(slot) => self.context.indirect.read(slot).item_count,
        }
    }

    /// Take the scene inputs the pass consumes
    fn upload(&mut self, pass: &Pass, scene: &Scene) -> SvoResult<()> {
        match pass {
            Pass::Voxelize => {
                self.context.triangles = prepare_triangles(scene, &self.context.config);
            }
            Pass::LightInjection => {
                self.context.light = Some(scene.light_input()?);
            }
            _ => {}
        }
        Ok(())
    }
}

impl PassExecutor for CpuExecutor {
    fn execute(&mut self, pass: &Pass, scene: &Scene) -> SvoResult<()> {
        let _span = tracing::debug_span!("svo_pass", pass = %pass).entered();
        self.passes_executed += 1;

        if clear::clear(&self.context, pass) {
            return Ok(());
        }
        if let Some(channel) = pass.channel() {
            channel_storage(&self.context.bricks, channel, pass.name())?;
        }
        if matches!(pass, Pass::LightInjection) && !self.context.config.irradiance {
            return Err(SvoError::PassUnsupported {
                pass: pass.to_string(),
                reason: "irradiance is disabled".to_string(),
            });
        }
        if let Pass::PatchIndirect(slot) = pass {
            slot.checked()?;
        }
        self.upload(pass, scene)?;

        let params = pass.params();
        for dispatch in pass.dispatches(self.context.config.leaf_level()) {
            if let DispatchSource::Indirect(slot) = dispatch.source {
                slot.checked()?;
            }
            let threads = self.thread_count(dispatch.source);
            let kernel = cpu_kernel(dispatch.kernel);
            let context = &self.context;
            (0..threads)
                .into_par_iter()
                .for_each(|id| kernel(context, &params, id));
            log::trace!(
                "[CpuExecutor::execute] {} {:?} x{}",
                pass,
                dispatch.kernel,
                threads
            );
        }
        Ok(())
    }

    fn barrier(&mut self, resources: Resources) -> SvoResult<()> {
        // rayon joins every dispatch before returning; the fence documents the ordering point
        fence(Ordering::SeqCst);
        self.barriers += 1;
        log::trace!("[CpuExecutor::barrier] {:?}", resources);
        Ok(())
    }

    fn finish_rebuild(&mut self) -> SvoResult<Option<OctreeSnapshot>> {
        Ok(Some(self.snapshot()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::svo::IndirectSlot;

    #[test]
    fn test_kernel_table_is_total() {
        for kernel in Kernel::ALL {
            // Mapping must not panic and every entry point name is unique
            let _ = cpu_kernel(kernel);
        }
        let mut names: Vec<&str> = Kernel::ALL.iter().map(|k| k.entry_point()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), Kernel::ALL.len());
    }

    #[test]
    fn test_indirect_dispatch_uses_patched_count() {
        let config = SvoConfig {
            voxel_grid_resolution: 4,
            brick_pool_capacity: 4,
            ..SvoConfig::default()
        };
        let mut executor = CpuExecutor::new(config).expect("Failed to create executor");
        let scene = Scene::default();

        // Unpatched slot: zero threads even though the root exists
        executor
            .execute(&Pass::Flag { level: 0 }, &scene)
            .expect("Failed to run flag");
        executor
            .execute(&Pass::PatchIndirect(IndirectSlot::LevelNodes(0)), &scene)
            .expect("Failed to patch");
        executor.barrier(Resources::INDIRECT).expect("Failed barrier");
        assert_eq!(
            executor
                .context()
                .indirect
                .read(IndirectSlot::LevelNodes(0))
                .item_count,
            1
        );
        assert_eq!(executor.passes_executed(), 2);
        assert_eq!(executor.barriers(), 1);
    }

    #[test]
    fn test_disabled_channel_is_rejected() {
        let config = SvoConfig {
            voxel_grid_resolution: 4,
            brick_pool_capacity: 4,
            ..SvoConfig::default()
        };
        let mut executor = CpuExecutor::new(config).expect("Failed to create executor");
        let pass = Pass::SpreadLeafBricks {
            channel: crate::svo::BrickChannel::Irradiance,
        };
        let result = executor.execute(&pass, &Scene::default());
        assert!(matches!(result, Err(SvoError::PassUnsupported { .. })));
        let result = executor.execute(&Pass::LightInjection, &Scene::default());
        assert!(matches!(result, Err(SvoError::PassUnsupported { .. })));
    }
}
