use anyhow::Result;

use super::program::{compile_pipeline, linear_sampler, texture_bind_group_layout, FULLSCREEN_VS};

/// Orientation applied when copying the final pass output to a surface.
/// The pass chain and the swapchain share a top-left origin, so the
/// default is the identity; `Vertical` is kept for targets whose row
/// order differs (flipped readback consumers).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlipMode {
    #[default]
    None,
    Vertical,
}

const BLIT_FS: &str = r#"
@group(0) @binding(0) var source: texture_2d<f32>;
@group(0) @binding(1) var source_sampler: sampler;

@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    let uv = vec2<f32>(in.uv.x, {flip_v});
    return textureSample(source, source_sampler, uv);
}
"#;

/// Copies one texture onto another target, blending over whatever the
/// target was cleared to. Used for the surface present and for export
/// compositing onto a background color.
pub struct BlitProgram {
    pipeline: wgpu::RenderPipeline,
    layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
}

impl BlitProgram {
    pub fn new(
        device: &wgpu::Device,
        output_format: wgpu::TextureFormat,
        flip: FlipMode,
    ) -> Result<Self> {
        let flip_v = match flip {
            FlipMode::None => "in.uv.y",
            FlipMode::Vertical => "1.0 - in.uv.y",
        };
        let fragment = BLIT_FS.replace("{flip_v}", flip_v);
        let source = format!("{FULLSCREEN_VS}\n{fragment}");
        let layout = texture_bind_group_layout(device, 1);
        let pipeline = compile_pipeline(
            device,
            "blit",
            &source,
            &[&layout],
            output_format,
            Some(wgpu::BlendState::ALPHA_BLENDING),
        )?;
        Ok(Self {
            pipeline,
            layout,
            sampler: linear_sampler(device),
        })
    }

    /// Records the copy into `encoder`, clearing the target to
    /// `background` first so transparent pipeline output composites
    /// over it.
    pub fn encode(
        &self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        input: &wgpu::TextureView,
        output: &wgpu::TextureView,
        background: wgpu::Color,
    ) {
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("blit source"),
            layout: &self.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(input),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("blit"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: output,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(background),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.draw(0..3, 0..1);
    }
}
