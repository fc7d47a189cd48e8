use anyhow::{ensure, Result};

use crate::gpu::pool::{RenderTarget, TargetId};

/// CPU-side RGBA8 raster, the exchange format at every boundary that leaves
/// the GPU: media decode, capture delivery, readback, export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FramePixels {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl FramePixels {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; (width as usize) * (height as usize) * 4],
        }
    }

    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        ensure!(
            data.len() == (width as usize) * (height as usize) * 4,
            "raster size mismatch: {}x{} needs {} bytes, got {}",
            width,
            height,
            (width as usize) * (height as usize) * 4,
            data.len()
        );
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Uniform fill, handy for tests and the cleared input texture.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let mut data = Vec::with_capacity((width as usize) * (height as usize) * 4);
        for _ in 0..(width as usize) * (height as usize) {
            data.extend_from_slice(&rgba);
        }
        Self {
            width,
            height,
            data,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = 4 * (y as usize * self.width as usize + x as usize);
        [self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]]
    }

    pub fn put_pixel(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        let i = 4 * (y as usize * self.width as usize + x as usize);
        self.data[i..i + 4].copy_from_slice(&rgba);
    }
}

/// The state bundle threaded between passes: the texture produced by the
/// previous stage plus its dimensions. Never mutated, only replaced.
///
/// `target` names the pooled target backing `view`, or `None` when the
/// texture lives outside the pool (the uploaded input, a pass-owned
/// readback texture). Multi-input sub-passes bind their extra textures
/// directly rather than threading them through this bundle.
#[derive(Clone)]
pub struct PipelineState {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub width: u32,
    pub height: u32,
    pub target: Option<TargetId>,
}

impl PipelineState {
    pub fn from_target(target: &RenderTarget) -> Self {
        Self {
            texture: target.texture.clone(),
            view: target.view.clone(),
            width: target.width,
            height: target.height,
            target: Some(target.id),
        }
    }
}
