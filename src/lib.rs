// Voxel Cone SVO - Sparse voxel octree construction and mipmapping
//
// Data-Oriented layout throughout:
// - Pools (*_data modules) hold plain buffers, no methods
// - Kernels (*_operations and passes) are pure functions over those buffers
// - The stage schedules passes and publishes immutable snapshots
//
// Every rebuild runs the same ordered pass list on either backend:
// - executor::CpuExecutor runs kernels with rayon, one thread per work item
// - gpu::GpuExecutor records the same kernels as wgpu compute dispatches

pub mod config;
pub mod constants;
pub mod error;
pub mod executor;
pub mod passes;
pub mod scene;
pub mod stage;
pub mod svo;

#[cfg(feature = "gpu")]
pub mod gpu;

pub use config::{ExecutionFrequency, SvoConfig};
pub use error::{SvoError, SvoResult};
pub use executor::{CpuExecutor, PassExecutor};
pub use passes::{MipmapStep, Pass, Resources};
pub use scene::{LightNode, Material, Mesh, Scene, SceneNode, ShadowMap};
pub use stage::{ScheduleStep, SnapshotHandle, SvoConstructionStage};
pub use svo::{BrickChannel, BuildStats, NodeRef, OctreeSnapshot};

#[cfg(feature = "gpu")]
pub use gpu::{GpuContext, GpuExecutor};

// Re-export wgpu for hosts that share a device with the stage
#[cfg(feature = "gpu")]
pub use wgpu;
