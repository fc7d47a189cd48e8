//! Single-draw passes with at most a couple of tunables.

use std::collections::HashSet;

use anyhow::Result;
use effectstack::{option_number, OptionMap, OptionValue, StackPass};

use crate::gpu::pool::RenderTargetPool;
use crate::gpu::program::{ParamDecl, ParamKind, ParamSource, ParamValue, ShaderProgram};
use crate::gpu::TARGET_FORMAT;
use crate::state::PipelineState;

use super::{run_single, Pass, PassContext};

const INVERT_FS: &str = r#"
@group(0) @binding(0) var input_tex: texture_2d<f32>;
@group(0) @binding(1) var input_sampler: sampler;

@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    let c = textureSample(input_tex, input_sampler, in.uv);
    return vec4<f32>(vec3<f32>(1.0) - c.rgb, c.a);
}
"#;

pub struct InvertPass {
    program: ShaderProgram,
}

impl InvertPass {
    pub fn new(device: &wgpu::Device, _options: &OptionMap) -> Result<Self> {
        Ok(Self {
            program: ShaderProgram::new(device, "invert", INVERT_FS, 1, &[], TARGET_FORMAT)?,
        })
    }
}

impl StackPass for InvertPass {
    fn set_option(&mut self, _name: &str, _value: &OptionValue) {}
}

impl Pass for InvertPass {
    fn render(
        &mut self,
        ctx: &PassContext,
        input: &PipelineState,
        pool: &mut RenderTargetPool,
    ) -> Result<PipelineState> {
        run_single(ctx, &mut self.program, input, pool, &())
    }
}

const GRAYSCALE_FS: &str = r#"
@group(0) @binding(0) var input_tex: texture_2d<f32>;
@group(0) @binding(1) var input_sampler: sampler;

@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    let c = textureSample(input_tex, input_sampler, in.uv);
    let l = dot(c.rgb, vec3<f32>(0.299, 0.587, 0.114));
    return vec4<f32>(vec3<f32>(l), c.a);
}
"#;

pub struct GrayscalePass {
    program: ShaderProgram,
}

impl GrayscalePass {
    pub fn new(device: &wgpu::Device, _options: &OptionMap) -> Result<Self> {
        Ok(Self {
            program: ShaderProgram::new(device, "grayscale", GRAYSCALE_FS, 1, &[], TARGET_FORMAT)?,
        })
    }
}

impl StackPass for GrayscalePass {
    fn set_option(&mut self, _name: &str, _value: &OptionValue) {}
}

impl Pass for GrayscalePass {
    fn render(
        &mut self,
        ctx: &PassContext,
        input: &PipelineState,
        pool: &mut RenderTargetPool,
    ) -> Result<PipelineState> {
        run_single(ctx, &mut self.program, input, pool, &())
    }
}

const POSTERIZE_FS: &str = r#"
struct Params {
    levels: f32,
};

@group(0) @binding(0) var input_tex: texture_2d<f32>;
@group(0) @binding(1) var input_sampler: sampler;
@group(1) @binding(0) var<uniform> params: Params;

@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    let c = textureSample(input_tex, input_sampler, in.uv);
    let lv = max(2.0, params.levels);
    let p = floor(c.rgb * lv) / lv;
    return vec4<f32>(p, c.a);
}
"#;

pub struct PosterizePass {
    program: ShaderProgram,
    levels: f32,
}

impl PosterizePass {
    pub fn new(device: &wgpu::Device, options: &OptionMap) -> Result<Self> {
        Ok(Self {
            program: ShaderProgram::new(
                device,
                "posterize",
                POSTERIZE_FS,
                1,
                &[ParamDecl::slot("levels", ParamKind::F32)],
                TARGET_FORMAT,
            )?,
            levels: option_number(options, "levels", 2.0, 20.0, 5.0) as f32,
        })
    }
}

impl StackPass for PosterizePass {
    fn set_option(&mut self, name: &str, value: &OptionValue) {
        if name == "levels" {
            self.levels = value.number_in(2.0, 20.0, 2.0) as f32;
        }
    }
}

impl Pass for PosterizePass {
    fn render(
        &mut self,
        ctx: &PassContext,
        input: &PipelineState,
        pool: &mut RenderTargetPool,
    ) -> Result<PipelineState> {
        let slots = [("levels", ParamValue::F32(self.levels))];
        run_single(ctx, &mut self.program, input, pool, &slots)
    }
}

const SHARPEN_FS: &str = r#"
struct Params {
    texel: vec2<f32>,
    radius: f32,
    amount: f32,
};

@group(0) @binding(0) var input_tex: texture_2d<f32>;
@group(0) @binding(1) var input_sampler: sampler;
@group(1) @binding(0) var<uniform> params: Params;

fn box_blur(uv: vec2<f32>) -> vec3<f32> {
    var sum = vec3<f32>(0.0);
    let r = i32(params.radius);
    let d = 2 * r + 1;
    for (var i = -10; i <= 10; i++) {
        if (i < -r || i > r) { continue; }
        for (var j = -10; j <= 10; j++) {
            if (j < -r || j > r) { continue; }
            let off = vec2<f32>(f32(i), f32(j)) * params.texel;
            sum += textureSample(input_tex, input_sampler, uv + off).rgb;
        }
    }
    return sum / f32(d * d);
}

@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    let src = textureSample(input_tex, input_sampler, in.uv);
    let mask = src.rgb - box_blur(in.uv);
    let result = src.rgb + params.amount * mask;
    return vec4<f32>(clamp(result, vec3<f32>(0.0), vec3<f32>(1.0)), src.a);
}
"#;

/// Unsharp mask: amplify the difference between a pixel and its local
/// box-blurred neighbourhood.
pub struct SharpenPass {
    program: ShaderProgram,
    amount: f32,
    radius: f32,
}

impl SharpenPass {
    pub fn new(device: &wgpu::Device, options: &OptionMap) -> Result<Self> {
        Ok(Self {
            program: ShaderProgram::new(
                device,
                "sharpen",
                SHARPEN_FS,
                1,
                &[
                    ParamDecl::derived("texel", ParamSource::InputTexelSize),
                    ParamDecl::slot("radius", ParamKind::F32),
                    ParamDecl::slot("amount", ParamKind::F32),
                ],
                TARGET_FORMAT,
            )?,
            amount: option_number(options, "amount", 0.0, 10.0, 1.0) as f32,
            radius: option_number(options, "radius", 1.0, 10.0, 1.0) as f32,
        })
    }
}

impl StackPass for SharpenPass {
    fn set_option(&mut self, name: &str, value: &OptionValue) {
        match name {
            "amount" => self.amount = value.number_in(0.0, 10.0, 0.0) as f32,
            "radius" => self.radius = value.number_in(1.0, 10.0, 1.0) as f32,
            _ => {}
        }
    }
}

impl Pass for SharpenPass {
    fn render(
        &mut self,
        ctx: &PassContext,
        input: &PipelineState,
        pool: &mut RenderTargetPool,
    ) -> Result<PipelineState> {
        let slots = [
            ("radius", ParamValue::F32(self.radius)),
            ("amount", ParamValue::F32(self.amount)),
        ];
        run_single(ctx, &mut self.program, input, pool, &slots)
    }
}

const SOBEL_FS: &str = r#"
struct Params {
    texel: vec2<f32>,
};

@group(0) @binding(0) var input_tex: texture_2d<f32>;
@group(0) @binding(1) var input_sampler: sampler;
@group(1) @binding(0) var<uniform> params: Params;

@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    let t = params.texel;
    let tl = textureSample(input_tex, input_sampler, in.uv + vec2<f32>(-t.x, -t.y)).r;
    let cl = textureSample(input_tex, input_sampler, in.uv + vec2<f32>(-t.x, 0.0)).r;
    let bl = textureSample(input_tex, input_sampler, in.uv + vec2<f32>(-t.x, t.y)).r;
    let tc = textureSample(input_tex, input_sampler, in.uv + vec2<f32>(0.0, -t.y)).r;
    let bc = textureSample(input_tex, input_sampler, in.uv + vec2<f32>(0.0, t.y)).r;
    let tr = textureSample(input_tex, input_sampler, in.uv + vec2<f32>(t.x, -t.y)).r;
    let cr = textureSample(input_tex, input_sampler, in.uv + vec2<f32>(t.x, 0.0)).r;
    let br = textureSample(input_tex, input_sampler, in.uv + vec2<f32>(t.x, t.y)).r;
    let gx = -tl - 2.0 * cl - bl + tr + 2.0 * cr + br;
    let gy = -tl - 2.0 * tc - tr + bl + 2.0 * bc + br;
    let g = length(vec2<f32>(gx, gy));
    return vec4<f32>(vec3<f32>(g), 1.0);
}
"#;

pub struct SobelPass {
    program: ShaderProgram,
}

impl SobelPass {
    pub fn new(device: &wgpu::Device, _options: &OptionMap) -> Result<Self> {
        Ok(Self {
            program: ShaderProgram::new(
                device,
                "sobel",
                SOBEL_FS,
                1,
                &[ParamDecl::derived("texel", ParamSource::InputTexelSize)],
                TARGET_FORMAT,
            )?,
        })
    }
}

impl StackPass for SobelPass {
    fn set_option(&mut self, _name: &str, _value: &OptionValue) {}
}

impl Pass for SobelPass {
    fn render(
        &mut self,
        ctx: &PassContext,
        input: &PipelineState,
        pool: &mut RenderTargetPool,
    ) -> Result<PipelineState> {
        run_single(ctx, &mut self.program, input, pool, &())
    }
}

const EMBOSS_FS: &str = r#"
struct Params {
    texel: vec2<f32>,
    strength: f32,
};

@group(0) @binding(0) var input_tex: texture_2d<f32>;
@group(0) @binding(1) var input_sampler: sampler;
@group(1) @binding(0) var<uniform> params: Params;

@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    let t = params.texel;
    var sum = vec3<f32>(0.0);
    sum += textureSample(input_tex, input_sampler, in.uv + vec2<f32>(-t.x, -t.y)).rgb * -2.0;
    sum += textureSample(input_tex, input_sampler, in.uv + vec2<f32>(0.0, -t.y)).rgb * -1.0;
    sum += textureSample(input_tex, input_sampler, in.uv + vec2<f32>(-t.x, 0.0)).rgb * -1.0;
    sum += textureSample(input_tex, input_sampler, in.uv).rgb;
    sum += textureSample(input_tex, input_sampler, in.uv + vec2<f32>(t.x, 0.0)).rgb;
    sum += textureSample(input_tex, input_sampler, in.uv + vec2<f32>(0.0, t.y)).rgb;
    sum += textureSample(input_tex, input_sampler, in.uv + vec2<f32>(t.x, t.y)).rgb * 2.0;
    let embossed = vec3<f32>(0.5) + sum * (params.strength / 8.0);
    let a = textureSample(input_tex, input_sampler, in.uv).a;
    return vec4<f32>(clamp(embossed, vec3<f32>(0.0), vec3<f32>(1.0)), a);
}
"#;

/// Diagonal relief kernel biased around mid-gray.
pub struct EmbossPass {
    program: ShaderProgram,
    strength: f32,
}

impl EmbossPass {
    pub fn new(device: &wgpu::Device, options: &OptionMap) -> Result<Self> {
        Ok(Self {
            program: ShaderProgram::new(
                device,
                "emboss",
                EMBOSS_FS,
                1,
                &[
                    ParamDecl::derived("texel", ParamSource::InputTexelSize),
                    ParamDecl::slot("strength", ParamKind::F32),
                ],
                TARGET_FORMAT,
            )?,
            strength: option_number(options, "strength", 0.0, 5.0, 1.0) as f32,
        })
    }
}

impl StackPass for EmbossPass {
    fn set_option(&mut self, name: &str, value: &OptionValue) {
        if name == "strength" {
            self.strength = value.number_in(0.0, 5.0, 0.0) as f32;
        }
    }
}

impl Pass for EmbossPass {
    fn render(
        &mut self,
        ctx: &PassContext,
        input: &PipelineState,
        pool: &mut RenderTargetPool,
    ) -> Result<PipelineState> {
        let slots = [("strength", ParamValue::F32(self.strength))];
        run_single(ctx, &mut self.program, input, pool, &slots)
    }
}

const CHROMA_FS: &str = r#"
struct Params {
    texel: vec2<f32>,
    strength: f32,
};

@group(0) @binding(0) var input_tex: texture_2d<f32>;
@group(0) @binding(1) var input_sampler: sampler;
@group(1) @binding(0) var<uniform> params: Params;

@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    let off = (in.uv - vec2<f32>(0.5)) * params.strength * params.texel;
    let r = textureSample(input_tex, input_sampler, in.uv + off).r;
    let ga = textureSample(input_tex, input_sampler, in.uv);
    let b = textureSample(input_tex, input_sampler, in.uv - off).b;
    return vec4<f32>(r, ga.g, b, ga.a);
}
"#;

/// Splits the red and blue channels radially away from the image center.
pub struct ChromaticAberrationPass {
    program: ShaderProgram,
    strength: f32,
}

impl ChromaticAberrationPass {
    pub fn new(device: &wgpu::Device, options: &OptionMap) -> Result<Self> {
        Ok(Self {
            program: ShaderProgram::new(
                device,
                "chroma",
                CHROMA_FS,
                1,
                &[
                    ParamDecl::derived("texel", ParamSource::InputTexelSize),
                    ParamDecl::slot("strength", ParamKind::F32),
                ],
                TARGET_FORMAT,
            )?,
            strength: option_number(options, "strength", 0.0, 50.0, 10.0) as f32,
        })
    }
}

impl StackPass for ChromaticAberrationPass {
    fn set_option(&mut self, name: &str, value: &OptionValue) {
        if name == "strength" {
            self.strength = value.number_in(0.0, 50.0, 0.0) as f32;
        }
    }
}

impl Pass for ChromaticAberrationPass {
    fn render(
        &mut self,
        ctx: &PassContext,
        input: &PipelineState,
        pool: &mut RenderTargetPool,
    ) -> Result<PipelineState> {
        let slots = [("strength", ParamValue::F32(self.strength))];
        run_single(ctx, &mut self.program, input, pool, &slots)
    }
}

const COPY_FS: &str = r#"
@group(0) @binding(0) var input_tex: texture_2d<f32>;
@group(0) @binding(1) var input_sampler: sampler;

@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    return textureSample(input_tex, input_sampler, in.uv);
}
"#;

/// Renders into a target scaled down by `scale`, shrinking the state the
/// rest of the chain sees. `scale` is structural because downstream passes
/// size their targets from it.
pub struct DownsamplePass {
    program: ShaderProgram,
    scale: f32,
}

impl DownsamplePass {
    pub fn new(device: &wgpu::Device, options: &OptionMap) -> Result<Self> {
        Ok(Self {
            program: ShaderProgram::new(device, "downsample", COPY_FS, 1, &[], TARGET_FORMAT)?,
            scale: option_number(options, "scale", 0.01, 1.0, 0.5) as f32,
        })
    }

    pub fn output_size(&self, width: u32, height: u32) -> (u32, u32) {
        scaled_size(self.scale, width, height)
    }
}

fn scaled_size(scale: f32, width: u32, height: u32) -> (u32, u32) {
    (
        (((width as f32) * scale).floor() as u32).max(1),
        (((height as f32) * scale).floor() as u32).max(1),
    )
}

impl StackPass for DownsamplePass {
    fn set_option(&mut self, name: &str, value: &OptionValue) {
        if name == "scale" {
            self.scale = value.number_in(0.01, 1.0, 0.5) as f32;
        }
    }
}

impl Pass for DownsamplePass {
    fn render(
        &mut self,
        ctx: &PassContext,
        input: &PipelineState,
        pool: &mut RenderTargetPool,
    ) -> Result<PipelineState> {
        let (width, height) = self.output_size(input.width, input.height);
        let out = pool.acquire_temporary(width, height, &HashSet::new())?;
        self.program.draw(
            ctx.device,
            ctx.queue,
            &[&input.view],
            &out.view,
            &(),
            (input.width, input.height),
            (width, height),
        );
        Ok(PipelineState::from_target(&out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downsampled_size_never_collapses_to_zero() {
        assert_eq!(scaled_size(0.01, 10, 10), (1, 1));
        assert_eq!(scaled_size(0.5, 101, 51), (50, 25));
        assert_eq!(scaled_size(1.0, 640, 480), (640, 480));
    }
}
