use anyhow::{Context, Result};
use tracing::trace;

use crate::gpu::blit::{BlitProgram, FlipMode};
use crate::gpu::context::GpuContext;
use crate::gpu::pool::RenderTargetPool;
use crate::gpu::TARGET_FORMAT;
use crate::passes::{Pass, PassContext};
use crate::state::{FramePixels, PipelineState};

struct InputTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

/// Drives one frame through the pass chain.
///
/// Owns the GPU context, the render-target pool, the uploaded input texture,
/// and the surface blit. Hosts call [`prepare_frame`](Self::prepare_frame)
/// whenever the source raster changes, then [`render_frame`](Self::render_frame)
/// once per displayed frame with the reconciled pass list.
pub struct PipelineOrchestrator {
    gpu: GpuContext,
    pool: RenderTargetPool,
    blit: BlitProgram,
    input: Option<InputTexture>,
    last_state: Option<PipelineState>,
    background: wgpu::Color,
}

impl PipelineOrchestrator {
    pub fn new(gpu: GpuContext) -> Result<Self> {
        let blit_format = if gpu.has_surface() {
            gpu.surface_format()
        } else {
            TARGET_FORMAT
        };
        let blit = BlitProgram::new(&gpu.device, blit_format, FlipMode::None)?;
        let pool = RenderTargetPool::new(gpu.device.clone());
        Ok(Self {
            gpu,
            pool,
            blit,
            input: None,
            last_state: None,
            background: wgpu::Color::TRANSPARENT,
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.gpu.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.gpu.queue
    }

    pub fn resize_surface(&mut self, width: u32, height: u32) {
        self.gpu.resize_surface(width, height);
    }

    /// Color the surface blit composites the (possibly transparent) final
    /// output over.
    pub fn set_background(&mut self, background: wgpu::Color) {
        self.background = background;
    }

    /// Uploads the source raster as the pipeline input, reusing the input
    /// texture when dimensions are unchanged.
    pub fn prepare_frame(&mut self, pixels: &FramePixels) {
        let (width, height) = (pixels.width().max(1), pixels.height().max(1));
        let reuse = self
            .input
            .as_ref()
            .is_some_and(|t| t.width == width && t.height == height);
        if !reuse {
            trace!(width, height, "allocating input texture");
            let texture = self.gpu.device.create_texture(&wgpu::TextureDescriptor {
                label: Some("pipeline input"),
                size: wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: TARGET_FORMAT,
                usage: wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::COPY_DST
                    | wgpu::TextureUsages::COPY_SRC,
                view_formats: &[],
            });
            let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
            self.input = Some(InputTexture {
                texture,
                view,
                width,
                height,
            });
            // Any cached final state references the old chain.
            self.last_state = None;
        }
        let input = self.input.as_ref().expect("input ensured above");
        self.gpu.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &input.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            pixels.data(),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * width),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
    }

    /// Replaces the input with a single transparent texel, so the next frame
    /// renders empty instead of a stale image.
    pub fn clear_input(&mut self) {
        self.prepare_frame(&FramePixels::solid(1, 1, [0, 0, 0, 0]));
    }

    /// Runs the chain over the current input, presents to the surface when
    /// one is configured, and reclaims untouched pooled targets.
    pub fn render_frame(&mut self, passes: &mut [&mut dyn Pass]) -> Result<()> {
        if self.input.is_none() {
            self.clear_input();
        }
        let input = self.input.as_ref().expect("input ensured above");

        self.pool.begin_frame();
        let mut state = PipelineState {
            texture: input.texture.clone(),
            view: input.view.clone(),
            width: input.width,
            height: input.height,
            target: None,
        };

        let ctx = PassContext {
            device: &self.gpu.device,
            queue: &self.gpu.queue,
        };
        for pass in passes.iter_mut() {
            let next = pass.render(&ctx, &state, &mut self.pool)?;
            // The superseded intermediate can back a later stage's target.
            if let Some(id) = state.target {
                self.pool.release_id(id);
            }
            state = next;
        }

        if self.gpu.has_surface() {
            let frame = self.gpu.surface_frame()?;
            let view = frame
                .texture
                .create_view(&wgpu::TextureViewDescriptor::default());
            let mut encoder =
                self.gpu
                    .device
                    .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                        label: Some("present"),
                    });
            self.blit
                .encode(&self.gpu.device, &mut encoder, &state.view, &view, self.background);
            self.gpu.queue.submit(Some(encoder.finish()));
            frame.present();
        }

        let live = self.pool.end_frame(state.target);
        self.pool.reclaim_all_except(&live);
        self.last_state = Some(state);
        Ok(())
    }

    /// Reads the most recent final output back to the CPU. Stalls until the
    /// GPU finishes; export and tests only.
    pub fn read_frame(&self) -> Result<FramePixels> {
        let state = self
            .last_state
            .as_ref()
            .context("no frame has been rendered yet")?;
        read_texture(&self.gpu.device, &self.gpu.queue, state)
    }
}

/// Bytes per padded row for a buffer copy of `width` RGBA texels.
fn padded_bytes_per_row(width: u32) -> u32 {
    let unpadded = 4 * width;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

pub(crate) fn read_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    state: &PipelineState,
) -> Result<FramePixels> {
    let (width, height) = (state.width, state.height);
    let padded = padded_bytes_per_row(width);
    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("frame readback"),
        size: (padded as u64) * (height as u64),
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("frame readback"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture: &state.texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &buffer,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
    queue.submit(Some(encoder.finish()));

    let slice = buffer.slice(..);
    let (tx, rx) = crossbeam_channel::bounded(1);
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    device
        .poll(wgpu::PollType::Wait)
        .context("device lost while waiting for readback")?;
    rx.recv()
        .context("readback callback dropped")?
        .context("failed to map readback buffer")?;

    let mapped = slice.get_mapped_range();
    let mut data = Vec::with_capacity((width as usize) * (height as usize) * 4);
    for row in 0..height as usize {
        let start = row * padded as usize;
        data.extend_from_slice(&mapped[start..start + (width as usize) * 4]);
    }
    drop(mapped);
    buffer.unmap();

    FramePixels::from_rgba(width, height, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_padding_rounds_to_copy_alignment() {
        assert_eq!(padded_bytes_per_row(64), 256);
        assert_eq!(padded_bytes_per_row(1), 256);
        assert_eq!(padded_bytes_per_row(100), 512);
        assert_eq!(padded_bytes_per_row(128), 512);
    }
}
