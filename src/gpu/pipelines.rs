//! Compute pipelines, one per construction kernel

use super::resources::GpuResources;
use crate::error::{SvoError, SvoResult};
use crate::passes::Kernel;
use std::borrow::Cow;
use std::collections::HashMap;
use wgpu::{ComputePipeline, Device};

/// WGSL source for every construction kernel
pub const SHADER_SOURCE: &str = include_str!("../shaders/compute/svo_construction.wgsl");

pub struct SvoPipelines {
    pipelines: HashMap<Kernel, ComputePipeline>,
}

impl SvoPipelines {
    pub fn new(device: &Device, resources: &GpuResources) -> SvoResult<Self> {
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("svo_construction"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(SHADER_SOURCE)),
        });

        let main_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("SVO Construction Pipeline Layout"),
            bind_group_layouts: &[&resources.main_layout],
            push_constant_ranges: &[],
        });
        let patch_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("SVO Patch Indirect Pipeline Layout"),
            bind_group_layouts: &[&resources.main_layout, &resources.indirect_layout],
            push_constant_ranges: &[],
        });

        let pipelines = Kernel::ALL
            .iter()
            .map(|&kernel| {
                let layout = if kernel == Kernel::PatchIndirect {
                    &patch_layout
                } else {
                    &main_layout
                };
                let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(kernel.entry_point()),
                    layout: Some(layout),
                    module: &module,
                    entry_point: kernel.entry_point(),
                });
                (kernel, pipeline)
            })
            .collect();

        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            return Err(SvoError::ShaderCompilation {
                shader: "svo_construction".to_string(),
                error: error.to_string(),
            });
        }

        log::info!(
            "[SvoPipelines::new] Created {} construction pipelines",
            Kernel::ALL.len()
        );
        Ok(Self { pipelines })
    }

    pub fn get(&self, kernel: Kernel) -> SvoResult<&ComputePipeline> {
        self.pipelines.get(&kernel).ok_or_else(|| SvoError::Internal {
            message: format!("no pipeline for kernel {:?}", kernel),
        })
    }
}
