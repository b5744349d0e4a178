use anyhow::{anyhow, ensure, Context, Result};
use crossbeam_channel::bounded;
use image::RgbaImage;

use super::context::GpuContext;
use super::pipeline::CAPTURE_FORMAT;

/// A colour target that can be rendered into and read back.
pub(crate) struct OffscreenTarget {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub width: u32,
    pub height: u32,
}

impl OffscreenTarget {
    pub fn new(gpu: &GpuContext, width: u32, height: u32, label: &str) -> Result<Self> {
        let max = gpu.max_texture_dimension();
        ensure!(
            width > 0 && height > 0 && width <= max && height <= max,
            "render target {width}x{height} is outside the device limit of {max}"
        );
        let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: CAPTURE_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(Self {
            texture,
            view,
            width,
            height,
        })
    }

    pub fn read(&self, gpu: &GpuContext) -> Result<RgbaImage> {
        read_texture(gpu, &self.texture, self.width, self.height)
    }
}

pub(crate) fn align_to(value: u32, alignment: u32) -> u32 {
    value.div_ceil(alignment) * alignment
}

/// Copies an `Rgba8Unorm` texture into CPU memory, top row first.
pub(crate) fn read_texture(
    gpu: &GpuContext,
    texture: &wgpu::Texture,
    width: u32,
    height: u32,
) -> Result<RgbaImage> {
    let unpadded_bytes_per_row = width
        .checked_mul(4)
        .ok_or_else(|| anyhow!("frame width overflow when computing row bytes"))?;
    let padded_bytes_per_row = align_to(unpadded_bytes_per_row, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
    let buffer = gpu.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("readback buffer"),
        size: u64::from(padded_bytes_per_row) * u64::from(height),
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = gpu
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("readback encoder"),
        });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &buffer,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded_bytes_per_row),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    gpu.queue.submit(Some(encoder.finish()));

    let slice = buffer.slice(..);
    let (sender, receiver) = bounded(1);
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });
    gpu.device
        .poll(wgpu::PollType::Wait)
        .context("failed waiting for the GPU")?;
    receiver
        .recv()
        .map_err(|_| anyhow!("failed receiving GPU map callback"))?
        .context("GPU buffer mapping failed")?;

    let mapped = slice.get_mapped_range();
    let pixels = tight_rows(
        &mapped,
        unpadded_bytes_per_row as usize,
        padded_bytes_per_row as usize,
        height as usize,
    );
    drop(mapped);
    buffer.unmap();

    RgbaImage::from_raw(width, height, pixels)
        .ok_or_else(|| anyhow!("readback produced a buffer of the wrong size"))
}

fn tight_rows(padded: &[u8], unpadded: usize, stride: usize, rows: usize) -> Vec<u8> {
    let mut pixels = Vec::with_capacity(unpadded * rows);
    for row in padded.chunks(stride).take(rows) {
        pixels.extend_from_slice(&row[..unpadded.min(row.len())]);
    }
    pixels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_pad_to_copy_alignment() {
        assert_eq!(align_to(4 * 3, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT), 256);
        assert_eq!(align_to(256, 256), 256);
        assert_eq!(align_to(1028, 256), 1280);
    }

    #[test]
    fn padding_is_stripped() {
        let mut padded = vec![0u8; 16];
        padded[..4].copy_from_slice(&[1, 2, 3, 4]);
        padded[8..12].copy_from_slice(&[5, 6, 7, 8]);
        assert_eq!(tight_rows(&padded, 4, 8, 2), vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }
}
