pub mod blit;
pub mod context;
pub mod pool;
pub mod program;

/// Pixel format used for the input texture and every pooled render target.
/// The surface blit converts to whatever format the swapchain prefers.
pub const TARGET_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
