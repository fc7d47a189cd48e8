use anyhow::{Context as AnyhowContext, Result};

/// Owns the wgpu device/queue pair and, for interactive use, the
/// presentation surface. A missing adapter or failed device request is
/// fatal at construction; there is no software fallback path of our own
/// beyond what the wgpu backends provide.
pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    surface: Option<wgpu::Surface<'static>>,
    config: Option<wgpu::SurfaceConfiguration>,
    surface_format: wgpu::TextureFormat,
}

impl GpuContext {
    /// Device-only context for export and headless rendering.
    pub fn headless() -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .context("failed to find a suitable GPU adapter")?;
        let (device, queue) = request_device(&adapter)?;
        Ok(Self {
            device,
            queue,
            surface: None,
            config: None,
            surface_format: super::TARGET_FORMAT,
        })
    }

    /// Context bound to a presentation surface (the preview window).
    pub fn for_surface(
        target: impl Into<wgpu::SurfaceTarget<'static>>,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let surface = instance
            .create_surface(target)
            .context("failed to create rendering surface")?;
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .context("failed to find a suitable GPU adapter")?;
        let (device, queue) = request_device(&adapter)?;

        let caps = surface.get_capabilities(&adapter);
        // The pipeline works in gamma space end to end; prefer a non-sRGB
        // swapchain format so the blit is a plain copy.
        let surface_format = caps
            .formats
            .iter()
            .copied()
            .find(|format| !format.is_srgb())
            .unwrap_or(caps.formats[0]);
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: width.max(1),
            height: height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            desired_maximum_frame_latency: 2,
            alpha_mode: caps.alpha_modes[0],
            view_formats: vec![],
        };
        surface.configure(&device, &config);

        let adapter_info = adapter.get_info();
        tracing::debug!(
            name = %adapter_info.name,
            backend = ?adapter_info.backend,
            format = ?surface_format,
            "selected GPU adapter"
        );

        Ok(Self {
            device,
            queue,
            surface: Some(surface),
            config: Some(config),
            surface_format,
        })
    }

    pub fn has_surface(&self) -> bool {
        self.surface.is_some()
    }

    pub fn surface_format(&self) -> wgpu::TextureFormat {
        self.surface_format
    }

    pub fn resize_surface(&mut self, width: u32, height: u32) {
        if let (Some(surface), Some(config)) = (&self.surface, &mut self.config) {
            config.width = width.max(1);
            config.height = height.max(1);
            surface.configure(&self.device, config);
        }
    }

    /// Acquires the next swapchain texture, reconfiguring once on loss.
    pub fn surface_frame(&self) -> Result<wgpu::SurfaceTexture> {
        let surface = self
            .surface
            .as_ref()
            .context("no presentation surface configured")?;
        match surface.get_current_texture() {
            Ok(frame) => Ok(frame),
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                if let Some(config) = &self.config {
                    surface.configure(&self.device, config);
                }
                surface
                    .get_current_texture()
                    .context("failed to reacquire surface after loss")
            }
            Err(err) => Err(err).context("failed to acquire surface texture"),
        }
    }
}

fn request_device(adapter: &wgpu::Adapter) -> Result<(wgpu::Device, wgpu::Queue)> {
    pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
        label: Some("pixelpass device"),
        required_features: wgpu::Features::empty(),
        required_limits: wgpu::Limits::default(),
        memory_hints: wgpu::MemoryHints::MemoryUsage,
        trace: wgpu::Trace::default(),
    }))
    .context("failed to create GPU device")
}
