//! SVO construction stage
//!
//! Owns the ordered pass schedule and the rebuild policy. The schedule is built once from the
//! configuration: clears, voxelization, the level-by-level topology loop, brick allocation and
//! leaf writes, then spread, border transfer and the mipmap walk from the second-finest level
//! up to the root. Barriers are derived from each pass's declared reads and writes, so a pass
//! that dispatches from an indirect slot always follows a barrier placed after the slot's patch.
//!
//! Completed rebuilds are published as an `Arc<OctreeSnapshot>`; readers keep whatever they
//! loaded last until the next rebuild finishes.

use crate::config::{ExecutionFrequency, SvoConfig};
use crate::error::SvoResult;
use crate::executor::PassExecutor;
use crate::passes::{MipmapStep, Pass, Resources};
use crate::scene::Scene;
use crate::svo::{BrickChannel, BuildStats, IndirectSlot, OctreeSnapshot};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// One entry of the schedule
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ScheduleStep {
    Pass(Pass),
    /// Make writes to these resources visible before the next pass
    Barrier(Resources),
}

/// Passes of one full rebuild in emission order, without barriers
pub fn build_passes(config: &SvoConfig) -> Vec<Pass> {
    let levels = config.num_levels();
    let leaf = config.leaf_level();
    let channels = BrickChannel::enabled(config);

    let mut passes = vec![
        Pass::ClearNodePool,
        Pass::ClearNeighbours,
        Pass::ClearBrickPool,
        Pass::ClearFragmentList,
        Pass::PatchIndirect(IndirectSlot::LevelNodes(0)),
        Pass::Voxelize,
        Pass::PatchIndirect(IndirectSlot::Fragments),
    ];

    // Topology: children are allocated strictly after their parent's level
    for level in 0..levels {
        if level > 0 {
            passes.push(Pass::NeighbourPointers { level });
        }
        passes.push(Pass::Flag { level });
        passes.push(Pass::Allocate { level });
        if level < leaf {
            passes.push(Pass::PatchIndirect(IndirectSlot::LevelNodes(level + 1)));
        }
    }

    passes.push(Pass::PatchIndirect(IndirectSlot::AllNodes));
    passes.push(Pass::AllocBricks);
    passes.push(Pass::WriteLeafNodes);
    if config.irradiance {
        passes.push(Pass::LightInjection);
    }

    passes.extend(
        channels
            .iter()
            .map(|&channel| Pass::SpreadLeafBricks { channel }),
    );
    if leaf > 0 {
        passes.extend(channels.iter().map(|&channel| Pass::BorderTransfer {
            level: leaf,
            channel,
        }));
    }

    for level in (0..leaf).rev() {
        for &channel in channels {
            passes.extend(MipmapStep::ORDER.iter().map(|&step| Pass::Mipmap {
                level,
                channel,
                step,
            }));
            if level > 0 {
                passes.push(Pass::BorderTransfer { level, channel });
            }
        }
    }

    passes
}

/// Insert a barrier before every pass that touches a resource written since the last one.
/// Each barrier names every resource written since the previous barrier.
pub fn insert_barriers(passes: &[Pass]) -> Vec<ScheduleStep> {
    let mut steps = Vec::with_capacity(passes.len() * 2);
    let mut dirty = Resources::NONE;
    for pass in passes {
        let hazard = (pass.reads() | pass.writes()).intersection(dirty);
        if !hazard.is_empty() {
            steps.push(ScheduleStep::Barrier(dirty));
            dirty = Resources::NONE;
        }
        dirty |= pass.writes();
        steps.push(ScheduleStep::Pass(*pass));
    }
    steps
}

/// Shared read access to the latest published octree
#[derive(Clone, Default)]
pub struct SnapshotHandle {
    inner: Arc<RwLock<Option<Arc<OctreeSnapshot>>>>,
}

impl SnapshotHandle {
    /// Last completed octree, if any rebuild finished yet
    pub fn latest(&self) -> Option<Arc<OctreeSnapshot>> {
        self.inner.read().clone()
    }

    fn publish(&self, snapshot: OctreeSnapshot) {
        *self.inner.write() = Some(Arc::new(snapshot));
    }
}

/// Orders and issues every pass of the SVO build
pub struct SvoConstructionStage {
    config: SvoConfig,
    schedule: Vec<ScheduleStep>,
    rebuild_requested: AtomicBool,
    published: SnapshotHandle,
    last_stats: Option<BuildStats>,
    rebuild_count: u64,
}

impl SvoConstructionStage {
    pub fn new(config: SvoConfig) -> SvoResult<Self> {
        config.validate()?;
        let passes = build_passes(&config);
        let schedule = insert_barriers(&passes);
        log::info!(
            "[SvoConstructionStage::new] {} levels, {} passes, {} barriers, {:?}",
            config.num_levels(),
            passes.len(),
            schedule.len() - passes.len(),
            config.execution
        );
        Ok(Self {
            config,
            schedule,
            rebuild_requested: AtomicBool::new(false),
            published: SnapshotHandle::default(),
            last_stats: None,
            rebuild_count: 0,
        })
    }

    pub fn config(&self) -> &SvoConfig {
        &self.config
    }

    pub fn schedule(&self) -> &[ScheduleStep] {
        &self.schedule
    }

    pub fn passes(&self) -> impl Iterator<Item = &Pass> {
        self.schedule.iter().filter_map(|step| match step {
            ScheduleStep::Pass(pass) => Some(pass),
            ScheduleStep::Barrier(_) => None,
        })
    }

    /// Ask for a rebuild on the next `run_frame` (on-demand mode)
    pub fn request_rebuild(&self) {
        self.rebuild_requested.store(true, Ordering::Release);
    }

    pub fn rebuild_count(&self) -> u64 {
        self.rebuild_count
    }

    pub fn last_stats(&self) -> Option<&BuildStats> {
        self.last_stats.as_ref()
    }

    /// Latest published octree
    pub fn latest(&self) -> Option<Arc<OctreeSnapshot>> {
        self.published.latest()
    }

    /// Handle readers on other threads can keep
    pub fn snapshot_handle(&self) -> SnapshotHandle {
        self.published.clone()
    }

    /// Per-frame entry point; returns whether a rebuild ran
    pub fn run_frame<E: PassExecutor + ?Sized>(
        &mut self,
        executor: &mut E,
        scene: &Scene,
    ) -> SvoResult<bool> {
        let due = match self.config.execution {
            ExecutionFrequency::EveryFrame => true,
            ExecutionFrequency::OnDemand => self.rebuild_requested.swap(false, Ordering::AcqRel),
        };
        if !due {
            return Ok(false);
        }
        self.rebuild(executor, scene)?;
        Ok(true)
    }

    /// Issue the full schedule once
    ///
    /// On error the previously published octree stays current.
    pub fn rebuild<E: PassExecutor + ?Sized>(
        &mut self,
        executor: &mut E,
        scene: &Scene,
    ) -> SvoResult<()> {
        let _span = tracing::info_span!("svo_rebuild", rebuild = self.rebuild_count).entered();
        let start = Instant::now();

        if self.config.irradiance {
            // Fail before any pool is touched
            scene.light_input()?;
        }
        executor.begin_rebuild()?;
        for step in &self.schedule {
            let result = match step {
                ScheduleStep::Pass(pass) => executor.execute(pass, scene),
                ScheduleStep::Barrier(resources) => executor.barrier(*resources),
            };
            if let Err(e) = result {
                log::error!("[SvoConstructionStage::rebuild] {:?} failed: {}", step, e);
                return Err(e);
            }
        }
        let snapshot = executor.finish_rebuild()?;
        self.rebuild_count += 1;

        if let Some(snapshot) = snapshot {
            let stats = &snapshot.stats;
            if stats.has_drops() {
                log::warn!(
                    "[SvoConstructionStage::rebuild] Capacity exhausted: dropped {} fragments, {} child blocks, {} bricks",
                    stats.dropped_fragments,
                    stats.dropped_blocks,
                    stats.dropped_bricks
                );
            }
            log::debug!(
                "[SvoConstructionStage::rebuild] {} fragments, {} nodes, {} bricks in {:.2}ms",
                stats.fragment_count,
                stats.total_nodes(),
                stats.brick_count,
                start.elapsed().as_secs_f64() * 1000.0
            );
            self.last_stats = Some(stats.clone());
            self.published.publish(snapshot);
        }
        Ok(())
    }
}
