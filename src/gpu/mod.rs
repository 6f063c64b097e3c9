//! GPU backend
//!
//! Records every construction pass into one command encoder per rebuild. Counters, node
//! arenas, bricks and the indirect argument buffer live in device memory for the whole stage
//! lifetime; nothing is read back unless the executor is asked to publish snapshots.

pub mod executor;
pub mod pipelines;
pub mod readback;
pub mod resources;

pub use executor::GpuExecutor;
pub use pipelines::SvoPipelines;
pub use resources::{GpuResources, SvoUniforms};

use crate::error::{SvoError, SvoResult};
use std::sync::Arc;
use wgpu::{Device, Queue};

/// Storage buffers the construction kernels bind at once (patch kernel included)
pub const REQUIRED_STORAGE_BUFFERS: u32 = 9;

/// Device and queue shared by every GPU component
#[derive(Clone)]
pub struct GpuContext {
    pub device: Arc<Device>,
    pub queue: Arc<Queue>,
    pub adapter_info: wgpu::AdapterInfo,
}

impl GpuContext {
    /// Headless device on the best available adapter
    pub fn new() -> SvoResult<Self> {
        pollster::block_on(Self::new_async())
    }

    pub async fn new_async() -> SvoResult<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(SvoError::AdapterNotFound)?;

        let adapter_limits = adapter.limits();
        if adapter_limits.max_storage_buffers_per_shader_stage < REQUIRED_STORAGE_BUFFERS {
            return Err(SvoError::DeviceRequest(format!(
                "adapter supports {} storage buffers per stage, {} required",
                adapter_limits.max_storage_buffers_per_shader_stage, REQUIRED_STORAGE_BUFFERS
            )));
        }
        let required_limits = wgpu::Limits {
            max_storage_buffers_per_shader_stage: REQUIRED_STORAGE_BUFFERS,
            max_storage_buffer_binding_size: adapter_limits.max_storage_buffer_binding_size,
            max_buffer_size: adapter_limits.max_buffer_size,
            ..wgpu::Limits::default()
        };

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("SVO Construction Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits,
                },
                None,
            )
            .await
            .map_err(|e| SvoError::DeviceRequest(e.to_string()))?;

        let adapter_info = adapter.get_info();
        log::info!(
            "[GpuContext::new] Using {} ({:?})",
            adapter_info.name,
            adapter_info.backend
        );

        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
            adapter_info,
        })
    }
}
