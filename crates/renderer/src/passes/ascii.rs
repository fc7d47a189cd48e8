//! Block-quantized glyph rendering.
//!
//! The input is shrunk to one texel per character cell, then every cell is
//! expanded back to its footprint by sampling a glyph atlas indexed by the
//! cell's luminance bucket, recolored by the cell's source color.

use std::collections::HashSet;

use ab_glyph::{Font, FontVec, PxScale, ScaleFont};
use anyhow::{Context, Result};
use effectstack::{option_number, option_text, OptionMap, OptionValue, StackPass};
use font_kit::family_name::FamilyName;
use font_kit::properties::Properties;
use font_kit::source::SystemSource;

use crate::gpu::pool::RenderTargetPool;
use crate::gpu::program::{ParamDecl, ParamKind, ParamValue, ShaderProgram};
use crate::gpu::TARGET_FORMAT;
use crate::state::{FramePixels, PipelineState};

use super::palette::parse_hex_color;
use super::{Pass, PassContext};

const DOWNSAMPLE_FS: &str = r#"
@group(0) @binding(0) var input_tex: texture_2d<f32>;
@group(0) @binding(1) var input_sampler: sampler;

@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    return textureSample(input_tex, input_sampler, in.uv);
}
"#;

const GLYPH_FS: &str = r#"
struct Params {
    block: vec2<f32>,
    char_count: f32,
    alpha_threshold: f32,
    fill: vec3<f32>,
};

@group(0) @binding(0) var cells_tex: texture_2d<f32>;
@group(0) @binding(1) var atlas_tex: texture_2d<f32>;
@group(0) @binding(2) var glyph_sampler: sampler;
@group(1) @binding(0) var<uniform> params: Params;

fn luminance(c: vec3<f32>) -> f32 {
    return dot(c, vec3<f32>(0.299, 0.587, 0.114));
}

@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    let frag = in.pos.xy;
    let block = vec2<i32>(frag / params.block);
    let src = textureLoad(cells_tex, block, 0);
    let mask = step(params.alpha_threshold, src.a);
    let b = luminance(src.rgb);
    let idx = clamp(floor(b * (params.char_count - 1.0)), 0.0, params.char_count - 1.0);
    let local = (frag - vec2<f32>(block) * params.block) / params.block;
    let uv = (vec2<f32>(idx, 0.0) + local) / vec2<f32>(params.char_count, 1.0);
    let glyph = textureSample(atlas_tex, glyph_sampler, uv).a;
    let col = mix(params.fill, src.rgb, glyph);
    return vec4<f32>(col, mask);
}
"#;

/// Luminance bucket for a cell: index into the character ramp. Mirrors the
/// shader's clamp-floor expression.
pub fn luminance_bucket(brightness: f32, char_count: usize) -> usize {
    let count = char_count as f32;
    (brightness * (count - 1.0)).floor().clamp(0.0, count - 1.0) as usize
}

/// Cell grid for an input size, at least one cell per axis.
pub fn grid_dims(width: u32, height: u32, block_size: u32, density: f32) -> (u32, u32) {
    let cols = ((width as f32 / block_size as f32) * density).floor() as u32;
    let rows = ((height as f32 / block_size as f32) * density).floor() as u32;
    (cols.max(1), rows.max(1))
}

/// Rasterizes `chars` into a one-row atlas, one `size`-square cell per
/// character, white glyphs on transparent background.
fn rasterize_atlas(chars: &str, size: u32, family: &str) -> Result<FramePixels> {
    let handle = SystemSource::new()
        .select_best_match(
            &[FamilyName::Title(family.to_string()), FamilyName::SansSerif],
            &Properties::new(),
        )
        .with_context(|| format!("no usable font for family '{family}'"))?;
    let font = handle
        .load()
        .with_context(|| format!("failed to load font '{family}'"))?;
    let data = font
        .copy_font_data()
        .with_context(|| format!("font '{family}' has no accessible data"))?;
    let font = FontVec::try_from_vec((*data).clone())
        .with_context(|| format!("font '{family}' could not be parsed"))?;

    let count = chars.chars().count().max(1) as u32;
    let mut atlas = FramePixels::new(size * count, size);
    let scale = PxScale::from(size as f32);
    let scaled = font.as_scaled(scale);
    let ascent = scaled.ascent();

    for (i, ch) in chars.chars().enumerate() {
        let origin_x = (i as u32 * size) as f32;
        let glyph = scaled
            .glyph_id(ch)
            .with_scale_and_position(scale, ab_glyph::point(origin_x, ascent));
        let Some(outlined) = font.outline_glyph(glyph) else {
            continue;
        };
        let bounds = outlined.px_bounds();
        outlined.draw(|gx, gy, coverage| {
            let x = bounds.min.x as i64 + gx as i64;
            let y = bounds.min.y as i64 + gy as i64;
            if x < 0 || y < 0 || x >= atlas.width() as i64 || y >= atlas.height() as i64 {
                return;
            }
            let alpha = (coverage * 255.0).round().clamp(0.0, 255.0) as u8;
            atlas.put_pixel(x as u32, y as u32, [255, 255, 255, alpha]);
        });
    }
    Ok(atlas)
}

pub struct AsciiPass {
    downsample: ShaderProgram,
    glyphs: ShaderProgram,
    atlas_view: wgpu::TextureView,
    block_size: u32,
    density: f32,
    char_count: usize,
    fill: [f32; 3],
    alpha_threshold: f32,
}

impl AsciiPass {
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue, options: &OptionMap) -> Result<Self> {
        let block_size = option_number(options, "blockSize", 1.0, 64.0, 16.0) as u32;
        let density = option_number(options, "density", 0.25, 5.0, 1.0) as f32;
        let chars = option_text(options, "chars", ".:-=+*#%@").to_string();
        let font = option_text(options, "font", "Arial");
        let fill =
            parse_hex_color(option_text(options, "fill", "#000000")).unwrap_or([0.0, 0.0, 0.0]);

        let atlas = rasterize_atlas(&chars, block_size, font)?;
        let atlas_texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("glyph atlas"),
            size: wgpu::Extent3d {
                width: atlas.width(),
                height: atlas.height(),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &atlas_texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            atlas.data(),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * atlas.width()),
                rows_per_image: Some(atlas.height()),
            },
            wgpu::Extent3d {
                width: atlas.width(),
                height: atlas.height(),
                depth_or_array_layers: 1,
            },
        );

        Ok(Self {
            downsample: ShaderProgram::new(
                device,
                "ascii downsample",
                DOWNSAMPLE_FS,
                1,
                &[],
                TARGET_FORMAT,
            )?,
            glyphs: ShaderProgram::new(
                device,
                "ascii glyphs",
                GLYPH_FS,
                2,
                &[
                    ParamDecl::slot("block", ParamKind::Vec2),
                    ParamDecl::slot("char_count", ParamKind::F32),
                    ParamDecl::slot("alpha_threshold", ParamKind::F32),
                    ParamDecl::slot("fill", ParamKind::Vec3),
                ],
                TARGET_FORMAT,
            )?,
            atlas_view: atlas_texture.create_view(&wgpu::TextureViewDescriptor::default()),
            block_size,
            density,
            char_count: chars.chars().count().max(1),
            fill,
            alpha_threshold: 0.5,
        })
    }
}

impl StackPass for AsciiPass {
    fn set_option(&mut self, name: &str, value: &OptionValue) {
        // blockSize/density/chars/font invalidate the atlas and arrive as a
        // rebuild; only the fill color is patched live.
        if name == "fill" {
            if let Some(color) = value.as_str().and_then(parse_hex_color) {
                self.fill = color;
            }
        }
    }
}

impl Pass for AsciiPass {
    fn render(
        &mut self,
        ctx: &PassContext,
        input: &PipelineState,
        pool: &mut RenderTargetPool,
    ) -> Result<PipelineState> {
        let (cols, rows) = grid_dims(input.width, input.height, self.block_size, self.density);

        let cells = pool.acquire_temporary(cols, rows, &HashSet::new())?;
        self.downsample.draw(
            ctx.device,
            ctx.queue,
            &[&input.view],
            &cells.view,
            &(),
            (input.width, input.height),
            (cols, rows),
        );

        let out_w = cols * self.block_size;
        let out_h = rows * self.block_size;
        let out = pool.acquire_temporary(out_w, out_h, &HashSet::new())?;
        let slots = [
            (
                "block",
                ParamValue::Vec2([self.block_size as f32, self.block_size as f32]),
            ),
            ("char_count", ParamValue::F32(self.char_count as f32)),
            ("alpha_threshold", ParamValue::F32(self.alpha_threshold)),
            ("fill", ParamValue::Vec3(self.fill)),
        ];
        self.glyphs.draw(
            ctx.device,
            ctx.queue,
            &[&cells.view, &self.atlas_view],
            &out.view,
            &slots,
            (cols, rows),
            (out_w, out_h),
        );
        pool.release(&cells);

        Ok(PipelineState::from_target(&out))
    }
}
