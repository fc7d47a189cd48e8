use std::collections::HashSet;

use anyhow::Result;
use effectstack::{option_number, OptionMap, OptionValue, StackPass};

use crate::gpu::pool::RenderTargetPool;
use crate::gpu::program::{ParamDecl, ParamKind, ParamSource, ParamValue, ShaderProgram};
use crate::gpu::TARGET_FORMAT;
use crate::state::PipelineState;

use super::{Pass, PassContext};

const GAUSSIAN_FS: &str = r#"
struct Params {
    texel: vec2<f32>,
    sigma: f32,
    radius: i32,
    direction: vec2<f32>,
};

@group(0) @binding(0) var input_tex: texture_2d<f32>;
@group(0) @binding(1) var input_sampler: sampler;
@group(1) @binding(0) var<uniform> params: Params;

@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    let two_sigma2 = 2.0 * params.sigma * params.sigma;
    var sum = vec4<f32>(0.0);
    var weight = 0.0;
    for (var i = -30; i <= 30; i++) {
        if (i < -params.radius || i > params.radius) { continue; }
        let x = f32(i);
        let w = exp(-(x * x) / two_sigma2);
        let off = params.direction * (x * params.texel);
        sum += textureSample(input_tex, input_sampler, in.uv + off) * w;
        weight += w;
    }
    return sum / weight;
}
"#;

/// Separable Gaussian blur: one horizontal and one vertical draw through
/// the same program, differing only in the direction uniform.
pub struct GaussianBlurPass {
    program: ShaderProgram,
    sigma: f32,
    radius: i32,
}

pub(crate) fn kernel_radius(sigma: f32) -> i32 {
    (2.0 * sigma).ceil() as i32
}

impl GaussianBlurPass {
    pub fn new(device: &wgpu::Device, options: &OptionMap) -> Result<Self> {
        let sigma = option_number(options, "sigma", 0.1, 10.0, 1.0) as f32;
        Ok(Self {
            program: blur_program(device, "gaussian blur")?,
            sigma,
            radius: kernel_radius(sigma),
        })
    }

    fn draw(
        &mut self,
        ctx: &PassContext,
        input: &wgpu::TextureView,
        output: &wgpu::TextureView,
        size: (u32, u32),
        direction: [f32; 2],
    ) {
        let slots = [
            ("sigma", ParamValue::F32(self.sigma)),
            ("radius", ParamValue::I32(self.radius)),
            ("direction", ParamValue::Vec2(direction)),
        ];
        self.program
            .draw(ctx.device, ctx.queue, &[input], output, &slots, size, size);
    }
}

pub(crate) fn blur_program(device: &wgpu::Device, label: &str) -> Result<ShaderProgram> {
    ShaderProgram::new(
        device,
        label,
        GAUSSIAN_FS,
        1,
        &[
            ParamDecl::derived("texel", ParamSource::InputTexelSize),
            ParamDecl::slot("sigma", ParamKind::F32),
            ParamDecl::slot("radius", ParamKind::I32),
            ParamDecl::slot("direction", ParamKind::Vec2),
        ],
        TARGET_FORMAT,
    )
}

impl StackPass for GaussianBlurPass {
    fn set_option(&mut self, name: &str, value: &OptionValue) {
        if name == "sigma" {
            self.sigma = value.number_in(0.1, 10.0, 1.0) as f32;
            self.radius = kernel_radius(self.sigma);
        }
    }
}

impl Pass for GaussianBlurPass {
    fn render(
        &mut self,
        ctx: &PassContext,
        input: &PipelineState,
        pool: &mut RenderTargetPool,
    ) -> Result<PipelineState> {
        let size = (input.width, input.height);
        let horizontal = pool.acquire_temporary(size.0, size.1, &HashSet::new())?;
        self.draw(ctx, &input.view, &horizontal.view, size, [1.0, 0.0]);

        let vertical = pool.acquire_temporary(size.0, size.1, &HashSet::new())?;
        self.draw(ctx, &horizontal.view, &vertical.view, size, [0.0, 1.0]);
        pool.release(&horizontal);

        Ok(PipelineState::from_target(&vertical))
    }
}
