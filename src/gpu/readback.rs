//! Device to host copies
//!
//! Staging copies are recorded into one encoder, submitted together and mapped with a flume
//! channel per buffer, the same way the culling statistics readback works.

use crate::error::{ErrorContext, SvoError, SvoResult};
use wgpu::{Buffer, Device, Queue};

/// Copy the first `size` bytes of each buffer back to the host as words
pub fn read_buffers(
    device: &Device,
    queue: &Queue,
    sources: &[(&str, &Buffer, u64)],
) -> SvoResult<Vec<Vec<u32>>> {
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("SVO Readback"),
    });
    let staging: Vec<Buffer> = sources
        .iter()
        .map(|(label, source, size)| {
            let buffer = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: (*size).max(4),
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            if *size > 0 {
                encoder.copy_buffer_to_buffer(source, 0, &buffer, 0, *size);
            }
            buffer
        })
        .collect();
    queue.submit(Some(encoder.finish()));

    let receivers: Vec<_> = staging
        .iter()
        .map(|buffer| {
            let (sender, receiver) = flume::bounded(1);
            buffer
                .slice(..)
                .map_async(wgpu::MapMode::Read, move |result| {
                    let _ = sender.send(result);
                });
            receiver
        })
        .collect();
    device.poll(wgpu::Maintain::Wait);

    let mut results = Vec::with_capacity(sources.len());
    for (((label, _, size), buffer), receiver) in sources.iter().zip(&staging).zip(receivers) {
        receiver
            .recv()
            .context(&format!("readback channel for {}", label))?
            .map_err(|e| SvoError::Readback {
                buffer: label.to_string(),
                error: e.to_string(),
            })?;
        let data = buffer.slice(..).get_mapped_range();
        let words = bytemuck::cast_slice::<u8, u32>(&data[..*size as usize]).to_vec();
        drop(data);
        buffer.unmap();
        results.push(words);
    }
    Ok(results)
}
