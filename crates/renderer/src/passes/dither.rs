//! Dithering: three shader variants plus a CPU error-diffusion variant.

use anyhow::Result;
use effectstack::{option_number, option_text, OptionMap, OptionValue, StackPass};

use crate::gpu::pool::RenderTargetPool;
use crate::gpu::program::{ParamDecl, ParamKind, ParamValue, ShaderProgram};
use crate::gpu::TARGET_FORMAT;
use crate::pipeline::read_texture;
use crate::state::{FramePixels, PipelineState};

use super::{run_single, Pass, PassContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DitherAlgo {
    Ordered,
    Stochastic,
    Halftone,
    ErrorDiffusion,
}

impl DitherAlgo {
    fn from_name(name: &str) -> Self {
        match name {
            "Stochastic" => DitherAlgo::Stochastic,
            "Halftone" => DitherAlgo::Halftone,
            "Error Diffusion" => DitherAlgo::ErrorDiffusion,
            _ => DitherAlgo::Ordered,
        }
    }

    fn shader_index(self) -> i32 {
        match self {
            DitherAlgo::Ordered => 0,
            DitherAlgo::Stochastic => 1,
            DitherAlgo::Halftone => 2,
            DitherAlgo::ErrorDiffusion => 3,
        }
    }
}

const DITHER_FS: &str = r#"
struct Params {
    algo: i32,
    levels: f32,
};

@group(0) @binding(0) var input_tex: texture_2d<f32>;
@group(0) @binding(1) var input_sampler: sampler;
@group(1) @binding(0) var<uniform> params: Params;

const BAYER4 = array<i32, 16>(
    0, 8, 2, 10,
    12, 4, 14, 6,
    3, 11, 1, 9,
    15, 7, 13, 5,
);

fn rand(co: vec2<f32>) -> f32 {
    return fract(sin(dot(co, vec2<f32>(12.9898, 78.233))) * 43758.5453);
}

fn rot(a: f32) -> mat2x2<f32> {
    let c = cos(a);
    let s = sin(a);
    return mat2x2<f32>(c, s, -s, c);
}

@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    let src = textureSample(input_tex, input_sampler, in.uv);

    if (params.algo == 2) {
        let is_gray = abs(src.r - src.g) < 0.001 && abs(src.r - src.b) < 0.001;
        let a0 = select(radians(15.0), radians(45.0), is_gray);
        let a1 = radians(45.0);
        let a2 = select(radians(75.0), radians(45.0), is_gray);
        let p = in.pos.xy / params.levels;
        let c0 = fract(rot(a0) * p) - vec2<f32>(0.5);
        let c1 = fract(rot(a1) * p) - vec2<f32>(0.5);
        let c2 = fract(rot(a2) * p) - vec2<f32>(0.5);
        let r0 = (1.0 - src.r) * 0.5;
        let r1 = (1.0 - src.g) * 0.5;
        let r2 = (1.0 - src.b) * 0.5;
        let v0 = select(1.0, 0.0, length(c0) < r0);
        let v1 = select(1.0, 0.0, length(c1) < r1);
        let v2 = select(1.0, 0.0, length(c2) < r2);
        return vec4<f32>(v0, v1, v2, src.a);
    }

    let pix = vec2<i32>(in.pos.xy);
    var threshold: f32;
    if (params.algo == 0) {
        var bayer = BAYER4;
        threshold = (f32(bayer[(pix.y & 3) * 4 + (pix.x & 3)]) + 0.5) / 16.0;
    } else {
        threshold = rand(in.pos.xy);
    }
    let q = floor(src.rgb * params.levels + threshold) / params.levels;
    return vec4<f32>(q, src.a);
}
"#;

/// Floyd-Steinberg sweep in raster order. Each channel's quantization error
/// spills onto the four not-yet-visited neighbours with the 7/16, 3/16,
/// 5/16, 1/16 weights. Alpha is untouched.
pub fn apply_floyd_steinberg(pixels: &mut FramePixels, levels: u32) {
    let width = pixels.width() as usize;
    let height = pixels.height() as usize;
    let quant = (levels.max(2) - 1) as f32;

    let mut float_pixels: Vec<f32> = pixels.data().iter().map(|&b| b as f32 / 255.0).collect();
    let idx = |x: usize, y: usize| 4 * (y * width + x);

    for y in 0..height {
        for x in 0..width {
            let i = idx(x, y);
            for c in 0..3 {
                let old = float_pixels[i + c];
                let new = (old * quant).round() / quant;
                let error = old - new;
                float_pixels[i + c] = new;
                if x + 1 < width {
                    float_pixels[idx(x + 1, y) + c] += error * 7.0 / 16.0;
                }
                if x > 0 && y + 1 < height {
                    float_pixels[idx(x - 1, y + 1) + c] += error * 3.0 / 16.0;
                }
                if y + 1 < height {
                    float_pixels[idx(x, y + 1) + c] += error * 5.0 / 16.0;
                }
                if x + 1 < width && y + 1 < height {
                    float_pixels[idx(x + 1, y + 1) + c] += error * 1.0 / 16.0;
                }
            }
        }
    }

    let data = pixels.data_mut();
    for (i, value) in float_pixels.iter().enumerate() {
        if i % 4 != 3 {
            data[i] = (value * 255.0).clamp(0.0, 255.0) as u8;
        }
    }
}

struct CpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

pub struct DitherPass {
    program: ShaderProgram,
    algo: DitherAlgo,
    levels: f32,
    /// Upload texture for the error-diffusion result; persists across
    /// frames, recreated when the input size changes.
    cpu_texture: Option<CpuTexture>,
}

impl DitherPass {
    pub fn new(device: &wgpu::Device, options: &OptionMap) -> Result<Self> {
        Ok(Self {
            program: ShaderProgram::new(
                device,
                "dither",
                DITHER_FS,
                1,
                &[
                    ParamDecl::slot("algo", ParamKind::I32),
                    ParamDecl::slot("levels", ParamKind::F32),
                ],
                TARGET_FORMAT,
            )?,
            algo: DitherAlgo::from_name(option_text(options, "algo", "Ordered")),
            levels: option_number(options, "levels", 2.0, 10.0, 2.0) as f32,
            cpu_texture: None,
        })
    }

    fn upload(&mut self, ctx: &PassContext, pixels: &FramePixels) -> PipelineState {
        let (width, height) = (pixels.width(), pixels.height());
        let reuse = self
            .cpu_texture
            .as_ref()
            .is_some_and(|t| t.width == width && t.height == height);
        if !reuse {
            let texture = ctx.device.create_texture(&wgpu::TextureDescriptor {
                label: Some("dither readback"),
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
            self.cpu_texture = Some(CpuTexture {
                texture,
                view,
                width,
                height,
            });
        }
        let cpu = self.cpu_texture.as_ref().expect("texture ensured above");
        ctx.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &cpu.texture,
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
        PipelineState {
            texture: cpu.texture.clone(),
            view: cpu.view.clone(),
            width,
            height,
            target: None,
        }
    }
}

impl StackPass for DitherPass {
    fn set_option(&mut self, name: &str, value: &OptionValue) {
        match name {
            "algo" => {
                if let Some(name) = value.as_str() {
                    self.algo = DitherAlgo::from_name(name);
                }
            }
            "levels" => self.levels = value.number_in(2.0, 10.0, 2.0) as f32,
            _ => {}
        }
    }
}

impl Pass for DitherPass {
    fn render(
        &mut self,
        ctx: &PassContext,
        input: &PipelineState,
        pool: &mut RenderTargetPool,
    ) -> Result<PipelineState> {
        if self.algo != DitherAlgo::ErrorDiffusion {
            let slots = [
                ("algo", ParamValue::I32(self.algo.shader_index())),
                ("levels", ParamValue::F32(self.levels)),
            ];
            return run_single(ctx, &mut self.program, input, pool, &slots);
        }

        // Sequential raster-order dependency; runs on the CPU and stalls
        // the frame on the readback.
        let mut pixels = read_texture(ctx.device, ctx.queue, input)?;
        apply_floyd_steinberg(&mut pixels, self.levels as u32);
        Ok(self.upload(ctx, &pixels))
    }

    fn is_blocking(&self) -> bool {
        self.algo == DitherAlgo::ErrorDiffusion
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_level_diffusion_snaps_uniform_extremes() {
        let mut black = FramePixels::solid(4, 4, [0, 0, 0, 255]);
        apply_floyd_steinberg(&mut black, 2);
        assert_eq!(black.pixel(2, 2), [0, 0, 0, 255]);

        let mut white = FramePixels::solid(4, 4, [255, 255, 255, 255]);
        apply_floyd_steinberg(&mut white, 2);
        assert_eq!(white.pixel(1, 3), [255, 255, 255, 255]);
    }

    #[test]
    fn mid_gray_alternates_under_two_levels() {
        let mut gray = FramePixels::solid(8, 8, [128, 128, 128, 255]);
        apply_floyd_steinberg(&mut gray, 2);
        let mut blacks = 0;
        let mut whites = 0;
        for y in 0..8 {
            for x in 0..8 {
                match gray.pixel(x, y)[0] {
                    0 => blacks += 1,
                    255 => whites += 1,
                    other => panic!("unquantized value {other}"),
                }
            }
        }
        // Error diffusion conserves average intensity, so an even gray
        // splits into a mix of both extremes.
        assert!(blacks > 8 && whites > 8);
    }

    #[test]
    fn error_diffusion_preserves_average_intensity() {
        let mut gray = FramePixels::solid(16, 16, [100, 100, 100, 255]);
        apply_floyd_steinberg(&mut gray, 2);
        let sum: u64 = gray
            .data()
            .chunks_exact(4)
            .map(|px| px[0] as u64)
            .sum();
        let mean = sum as f64 / 256.0;
        assert!((mean - 100.0).abs() < 12.0, "mean drifted to {mean}");
    }

    #[test]
    fn alpha_channel_is_untouched() {
        let mut pixels = FramePixels::solid(4, 4, [37, 99, 201, 77]);
        apply_floyd_steinberg(&mut pixels, 4);
        for y in 0..4 {
            for x in 0..4 {
                assert_eq!(pixels.pixel(x, y)[3], 77);
            }
        }
    }

    #[test]
    fn algo_names_map_like_the_menu() {
        assert_eq!(DitherAlgo::from_name("Ordered"), DitherAlgo::Ordered);
        assert_eq!(DitherAlgo::from_name("Error Diffusion"), DitherAlgo::ErrorDiffusion);
        assert_eq!(DitherAlgo::from_name("???"), DitherAlgo::Ordered);
        assert_eq!(DitherAlgo::Halftone.shader_index(), 2);
    }
}
