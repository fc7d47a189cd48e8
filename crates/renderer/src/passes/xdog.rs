//! Flow-guided difference-of-Gaussians edge extraction.
//!
//! Seven sub-passes composed inside one pass: an isotropic blur, a structure
//! tensor (itself blurred), an orientation field, two flow-aligned blurs of
//! different radii orthogonal to the flow, a soft tanh threshold over their
//! difference, a flow-aligned smoothing of the edge mask, and a final
//! isotropic blur. Sub-passes draw into pooled temporaries like any other
//! pass; intermediates are released as soon as their last reader ran.
//!
//! The tensor and orientation fields carry signed values; they are stored in
//! unsigned-normalized targets with a 0.5-offset encoding and decoded on
//! read, since a plain store would clamp the negative lobe away.

use std::collections::HashSet;

use anyhow::Result;
use effectstack::{option_number, OptionMap, OptionValue, StackPass};

use crate::gpu::pool::{RenderTarget, RenderTargetPool};
use crate::gpu::program::{ParamDecl, ParamKind, ParamSource, ParamValue, ShaderProgram};
use crate::gpu::TARGET_FORMAT;
use crate::state::PipelineState;

use super::blur::{blur_program, kernel_radius};
use super::{Pass, PassContext};

const TENSOR_FS: &str = r#"
struct Params {
    texel: vec2<f32>,
};

@group(0) @binding(0) var input_tex: texture_2d<f32>;
@group(0) @binding(1) var input_sampler: sampler;
@group(1) @binding(0) var<uniform> params: Params;

@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    let dx = vec2<f32>(params.texel.x, 0.0);
    let dy = vec2<f32>(0.0, params.texel.y);
    let lx = (textureSample(input_tex, input_sampler, in.uv + dx).r
            - textureSample(input_tex, input_sampler, in.uv - dx).r) * 0.5;
    let ly = (textureSample(input_tex, input_sampler, in.uv + dy).r
            - textureSample(input_tex, input_sampler, in.uv - dy).r) * 0.5;
    let a = lx * lx;
    let b = lx * ly;
    let c = ly * ly;
    // 0.5-offset encoding keeps the signed cross term representable.
    return vec4<f32>(a, b, b, c) * 0.5 + vec4<f32>(0.5);
}
"#;

const ORIENT_FS: &str = r#"
@group(0) @binding(0) var tensor_tex: texture_2d<f32>;
@group(0) @binding(1) var tensor_sampler: sampler;

@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    let t = textureSample(tensor_tex, tensor_sampler, in.uv) * 2.0 - vec4<f32>(1.0);
    let a = t.r;
    let b = t.g;
    let c = t.a;
    let theta = 0.5 * atan2(2.0 * b, a - c);
    let tangent = vec2<f32>(cos(theta + 1.57079632679), sin(theta + 1.57079632679));
    return vec4<f32>(tangent * 0.5 + vec2<f32>(0.5), 0.0, 1.0);
}
"#;

const FLOW_BLUR_FS: &str = r#"
struct Params {
    texel: vec2<f32>,
    sigma: f32,
    radius: i32,
    orthogonal: i32,
};

@group(0) @binding(0) var input_tex: texture_2d<f32>;
@group(0) @binding(1) var direction_tex: texture_2d<f32>;
@group(0) @binding(2) var flow_sampler: sampler;
@group(1) @binding(0) var<uniform> params: Params;

@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    var dir = textureSample(direction_tex, flow_sampler, in.uv).xy * 2.0 - vec2<f32>(1.0);
    if (params.orthogonal == 1) {
        dir = vec2<f32>(-dir.y, dir.x);
    }
    let two_sigma2 = 2.0 * params.sigma * params.sigma;
    var sum = vec4<f32>(0.0);
    var weight = 0.0;
    for (var i = -30; i <= 30; i++) {
        if (abs(i) > params.radius) { continue; }
        let t = f32(i);
        let w = exp(-(t * t) / two_sigma2);
        let off = dir * (t * params.texel);
        sum += textureSample(input_tex, flow_sampler, in.uv + off) * w;
        weight += w;
    }
    return sum / weight;
}
"#;

const THRESHOLD_FS: &str = r#"
struct Params {
    p: f32,
    phi: f32,
    epsilon: f32,
};

@group(0) @binding(0) var narrow_tex: texture_2d<f32>;
@group(0) @binding(1) var wide_tex: texture_2d<f32>;
@group(0) @binding(2) var edge_sampler: sampler;
@group(1) @binding(0) var<uniform> params: Params;

@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    let g1 = textureSample(narrow_tex, edge_sampler, in.uv).r;
    let g2 = textureSample(wide_tex, edge_sampler, in.uv).r;
    let s = g1 + params.p * (g1 - g2);
    var m = 1.0;
    if (s < params.epsilon) {
        m = 1.0 + tanh(params.phi * (s - params.epsilon));
    }
    return vec4<f32>(vec3<f32>(m), 1.0);
}
"#;

/// Soft threshold response, mirrored on the CPU for tests: full white at or
/// above epsilon, a tanh ramp below it.
pub fn threshold_response(g1: f32, g2: f32, p: f32, phi: f32, epsilon: f32) -> f32 {
    let s = g1 + p * (g1 - g2);
    if s >= epsilon {
        1.0
    } else {
        1.0 + (phi * (s - epsilon)).tanh()
    }
}

pub struct XDoGPass {
    blur: ShaderProgram,
    tensor: ShaderProgram,
    orientation: ShaderProgram,
    flow_blur: ShaderProgram,
    threshold: ShaderProgram,
    sigma_c: f32,
    sigma_e: f32,
    k: f32,
    sigma_m: f32,
    p: f32,
    phi: f32,
    epsilon: f32,
    sigma_a: f32,
}

impl XDoGPass {
    pub fn new(device: &wgpu::Device, options: &OptionMap) -> Result<Self> {
        Ok(Self {
            blur: blur_program(device, "xdog gaussian")?,
            tensor: ShaderProgram::new(
                device,
                "xdog tensor",
                TENSOR_FS,
                1,
                &[ParamDecl::derived("texel", ParamSource::InputTexelSize)],
                TARGET_FORMAT,
            )?,
            orientation: ShaderProgram::new(
                device,
                "xdog orientation",
                ORIENT_FS,
                1,
                &[],
                TARGET_FORMAT,
            )?,
            flow_blur: ShaderProgram::new(
                device,
                "xdog flow blur",
                FLOW_BLUR_FS,
                2,
                &[
                    ParamDecl::derived("texel", ParamSource::InputTexelSize),
                    ParamDecl::slot("sigma", ParamKind::F32),
                    ParamDecl::slot("radius", ParamKind::I32),
                    ParamDecl::slot("orthogonal", ParamKind::I32),
                ],
                TARGET_FORMAT,
            )?,
            threshold: ShaderProgram::new(
                device,
                "xdog threshold",
                THRESHOLD_FS,
                2,
                &[
                    ParamDecl::slot("p", ParamKind::F32),
                    ParamDecl::slot("phi", ParamKind::F32),
                    ParamDecl::slot("epsilon", ParamKind::F32),
                ],
                TARGET_FORMAT,
            )?,
            sigma_c: option_number(options, "sigmaC", 0.1, 10.0, 1.0) as f32,
            sigma_e: option_number(options, "sigmaE", 0.1, 10.0, 1.6) as f32,
            k: option_number(options, "k", 1.0, 10.0, 1.6) as f32,
            sigma_m: option_number(options, "sigmaM", 0.1, 10.0, 1.0) as f32,
            p: option_number(options, "p", 0.0, 100.0, 20.0) as f32,
            phi: option_number(options, "phi", 0.01, 50.0, 10.0) as f32,
            epsilon: option_number(options, "epsilon", 0.0, 1.0, 0.5) as f32,
            sigma_a: option_number(options, "sigmaA", 0.1, 10.0, 1.0) as f32,
        })
    }

    /// Two-tap separable Gaussian into a fresh temporary.
    fn gaussian(
        &mut self,
        ctx: &PassContext,
        pool: &mut RenderTargetPool,
        input: &wgpu::TextureView,
        size: (u32, u32),
        sigma: f32,
    ) -> Result<RenderTarget> {
        let horizontal = pool.acquire_temporary(size.0, size.1, &HashSet::new())?;
        let slots_h = [
            ("sigma", ParamValue::F32(sigma)),
            ("radius", ParamValue::I32(kernel_radius(sigma))),
            ("direction", ParamValue::Vec2([1.0, 0.0])),
        ];
        self.blur.draw(
            ctx.device,
            ctx.queue,
            &[input],
            &horizontal.view,
            &slots_h,
            size,
            size,
        );
        let vertical = pool.acquire_temporary(size.0, size.1, &HashSet::new())?;
        let slots_v = [
            ("sigma", ParamValue::F32(sigma)),
            ("radius", ParamValue::I32(kernel_radius(sigma))),
            ("direction", ParamValue::Vec2([0.0, 1.0])),
        ];
        self.blur.draw(
            ctx.device,
            ctx.queue,
            &[&horizontal.view],
            &vertical.view,
            &slots_v,
            size,
            size,
        );
        pool.release(&horizontal);
        Ok(vertical)
    }

    fn flow_aligned(
        &mut self,
        ctx: &PassContext,
        pool: &mut RenderTargetPool,
        input: &wgpu::TextureView,
        direction: &wgpu::TextureView,
        size: (u32, u32),
        sigma: f32,
        orthogonal: bool,
    ) -> Result<RenderTarget> {
        let out = pool.acquire_temporary(size.0, size.1, &HashSet::new())?;
        let slots = [
            ("sigma", ParamValue::F32(sigma)),
            ("radius", ParamValue::I32(kernel_radius(sigma))),
            ("orthogonal", ParamValue::I32(i32::from(orthogonal))),
        ];
        self.flow_blur.draw(
            ctx.device,
            ctx.queue,
            &[input, direction],
            &out.view,
            &slots,
            size,
            size,
        );
        Ok(out)
    }
}

impl StackPass for XDoGPass {
    fn set_option(&mut self, name: &str, value: &OptionValue) {
        match name {
            "sigmaC" => self.sigma_c = value.number_in(0.1, 10.0, 1.0) as f32,
            "sigmaE" => self.sigma_e = value.number_in(0.1, 10.0, 1.6) as f32,
            "k" => self.k = value.number_in(1.0, 10.0, 1.6) as f32,
            "sigmaM" => self.sigma_m = value.number_in(0.1, 10.0, 1.0) as f32,
            "p" => self.p = value.number_in(0.0, 100.0, 20.0) as f32,
            "phi" => self.phi = value.number_in(0.01, 50.0, 10.0) as f32,
            "epsilon" => self.epsilon = value.number_in(0.0, 1.0, 0.5) as f32,
            "sigmaA" => self.sigma_a = value.number_in(0.1, 10.0, 1.0) as f32,
            _ => {}
        }
    }
}

impl Pass for XDoGPass {
    fn render(
        &mut self,
        ctx: &PassContext,
        input: &PipelineState,
        pool: &mut RenderTargetPool,
    ) -> Result<PipelineState> {
        let size = (input.width, input.height);

        let smoothed = self.gaussian(ctx, pool, &input.view, size, self.sigma_c)?;

        let tensor_raw = pool.acquire_temporary(size.0, size.1, &HashSet::new())?;
        self.tensor.draw(
            ctx.device,
            ctx.queue,
            &[&smoothed.view],
            &tensor_raw.view,
            &(),
            size,
            size,
        );
        let tensor = self.gaussian(ctx, pool, &tensor_raw.view, size, self.sigma_c)?;
        pool.release(&tensor_raw);

        let direction = pool.acquire_temporary(size.0, size.1, &HashSet::new())?;
        self.orientation.draw(
            ctx.device,
            ctx.queue,
            &[&tensor.view],
            &direction.view,
            &(),
            size,
            size,
        );
        pool.release(&tensor);

        let narrow = self.flow_aligned(
            ctx,
            pool,
            &smoothed.view,
            &direction.view,
            size,
            self.sigma_e,
            true,
        )?;
        let wide = self.flow_aligned(
            ctx,
            pool,
            &smoothed.view,
            &direction.view,
            size,
            self.k * self.sigma_e,
            true,
        )?;
        pool.release(&smoothed);

        let edges = pool.acquire_temporary(size.0, size.1, &HashSet::new())?;
        let slots = [
            ("p", ParamValue::F32(self.p)),
            ("phi", ParamValue::F32(self.phi)),
            ("epsilon", ParamValue::F32(self.epsilon)),
        ];
        self.threshold.draw(
            ctx.device,
            ctx.queue,
            &[&narrow.view, &wide.view],
            &edges.view,
            &slots,
            size,
            size,
        );
        pool.release(&narrow);
        pool.release(&wide);

        let settled = self.flow_aligned(
            ctx,
            pool,
            &edges.view,
            &direction.view,
            size,
            self.sigma_m,
            false,
        )?;
        pool.release(&edges);
        pool.release(&direction);

        let final_blur = self.gaussian(ctx, pool, &settled.view, size, self.sigma_a)?;
        pool.release(&settled);

        Ok(PipelineState::from_target(&final_blur))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_saturates_at_and_above_epsilon() {
        assert_eq!(threshold_response(0.6, 0.6, 20.0, 10.0, 0.5), 1.0);
        assert_eq!(threshold_response(0.5, 0.5, 20.0, 10.0, 0.5), 1.0);
    }

    #[test]
    fn response_falls_below_epsilon() {
        let m = threshold_response(0.2, 0.2, 20.0, 10.0, 0.5);
        assert!(m < 1.0);
        assert!(m > 0.0);
    }

    #[test]
    fn stronger_difference_darkens_the_edge() {
        // g1 < g2 pushes S negative, deep into the tanh ramp.
        let flat = threshold_response(0.3, 0.3, 20.0, 10.0, 0.5);
        let edge = threshold_response(0.3, 0.4, 20.0, 10.0, 0.5);
        assert!(edge < flat);
    }

    #[test]
    fn response_is_monotonic_in_the_combined_signal() {
        let mut last = -1.0;
        for i in 0..=20 {
            let g = i as f32 / 20.0;
            let m = threshold_response(g, g, 0.0, 10.0, 0.5);
            assert!(m >= last);
            last = m;
        }
    }
}
