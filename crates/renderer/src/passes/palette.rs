//! Nearest-color palette quantization against a small fixed palette.

use anyhow::Result;
use effectstack::{option_text, OptionMap, OptionValue, StackPass};

use crate::gpu::pool::RenderTargetPool;
use crate::gpu::program::{ParamDecl, ParamKind, ParamValue, ShaderProgram};
use crate::gpu::TARGET_FORMAT;
use crate::state::PipelineState;

use super::{run_single, Pass, PassContext};

pub const MAX_PALETTE: usize = 16;

/// Named presets in menu order; `Custom` reads the `customColors` option
/// instead.
pub const PRESETS: &[(&str, &[&str])] = &[
    ("BlackAndWhite", &["#000000", "#FFFFFF"]),
    (
        "Gruvbox",
        &[
            "#282828", "#fb4934", "#b8bb26", "#fabd2f", "#83a598", "#d3869b", "#8ec07c", "#ebdbb2",
        ],
    ),
    (
        "Dracula",
        &[
            "#282a36", "#ff5555", "#50fa7b", "#f1fa8c", "#bd93f9", "#ff79c6", "#8be9fd", "#f8f8f2",
        ],
    ),
    (
        "SolarizedDark",
        &[
            "#002b36", "#dc322f", "#859900", "#b58900", "#268bd2", "#d33682", "#2aa198", "#eee8d5",
        ],
    ),
    (
        "Monokai",
        &[
            "#272822", "#f92672", "#a6e22e", "#fd971f", "#66d9ef", "#9e6ffe", "#e6db74", "#f8f8f2",
        ],
    ),
    (
        "Nord",
        &[
            "#2e3440", "#bf616a", "#a3be8c", "#ebcb8b", "#81a1c1", "#b48ead", "#88c0d0", "#eceff4",
        ],
    ),
    (
        "Material",
        &[
            "#F44336", "#E91E63", "#9C27B0", "#673AB7", "#3F51B5", "#2196F3", "#03A9F4", "#00BCD4",
        ],
    ),
    (
        "Kanagawa",
        &["#7f745b", "#bfa95b", "#d4c787", "#82c0af", "#29526e", "#171f40"],
    ),
    (
        "Pastel",
        &[
            "#AEC6CF", "#FFB347", "#77DD77", "#FF6961", "#FDFD96", "#CB99C9", "#C23B22", "#779ECB",
        ],
    ),
    (
        "Vaporwave",
        &[
            "#FF77FF", "#77FFFF", "#FFDD77", "#44FF44", "#7744FF", "#FF4444", "#44DDFF", "#DD44FF",
        ],
    ),
    (
        "WebSafe",
        &[
            "#000000", "#003300", "#006600", "#009900", "#00CC00", "#00FF00", "#33FF33", "#66FF66",
        ],
    ),
];

pub fn parse_hex_color(hex: &str) -> Option<[f32; 3]> {
    let digits = hex.strip_prefix('#')?;
    if digits.len() != 6 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let n = u32::from_str_radix(digits, 16).ok()?;
    Some([
        ((n >> 16) & 255) as f32 / 255.0,
        ((n >> 8) & 255) as f32 / 255.0,
        (n & 255) as f32 / 255.0,
    ])
}

/// Resolves the active color list: a named preset, or the valid entries of
/// `customColors`. Always padded to [`MAX_PALETTE`] by repeating the last
/// entry so the uniform array has a fixed shape.
pub fn resolve_colors(preset: &str, custom: &[String]) -> (usize, Vec<[f32; 3]>) {
    let mut colors: Vec<[f32; 3]> = if preset == "Custom" {
        custom.iter().filter_map(|h| parse_hex_color(h)).collect()
    } else {
        PRESETS
            .iter()
            .find(|(name, _)| *name == preset)
            .map(|(_, hexes)| hexes.iter().filter_map(|h| parse_hex_color(h)).collect())
            .unwrap_or_default()
    };
    let count = colors.len();
    while colors.len() < MAX_PALETTE {
        let last = colors.last().copied().unwrap_or([0.0, 0.0, 0.0]);
        colors.push(last);
    }
    (count, colors)
}

/// First palette entry achieving the minimum distance wins, so ties are
/// stable and order-dependent. Mirrors the shader loop for tests.
pub fn nearest_color(colors: &[[f32; 3]], count: usize, c: [f32; 3]) -> [f32; 3] {
    let mut best = f32::MAX;
    let mut pick = [0.0, 0.0, 0.0];
    for entry in colors.iter().take(count) {
        let d = (c[0] - entry[0]).powi(2) + (c[1] - entry[1]).powi(2) + (c[2] - entry[2]).powi(2);
        if d < best {
            best = d;
            pick = *entry;
        }
    }
    pick
}

const PALETTE_FS: &str = r#"
struct Params {
    count: i32,
    colors: array<vec4<f32>, 16>,
};

@group(0) @binding(0) var input_tex: texture_2d<f32>;
@group(0) @binding(1) var input_sampler: sampler;
@group(1) @binding(0) var<uniform> params: Params;

@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    let src = textureSample(input_tex, input_sampler, in.uv);
    var best = 1e6;
    var pick = vec3<f32>(0.0);
    for (var i = 0; i < params.count; i++) {
        let entry = params.colors[i].rgb;
        let d = distance(src.rgb, entry);
        if (d < best) {
            best = d;
            pick = entry;
        }
    }
    return vec4<f32>(pick, src.a);
}
"#;

pub struct PalettePass {
    program: ShaderProgram,
    count: usize,
    colors: Vec<[f32; 3]>,
}

impl PalettePass {
    pub fn new(device: &wgpu::Device, options: &OptionMap) -> Result<Self> {
        let preset = option_text(options, "preset", PRESETS[0].0);
        let custom: Vec<String> = options
            .get("customColors")
            .and_then(|v| v.as_list())
            .map(|l| l.to_vec())
            .unwrap_or_default();
        let (count, colors) = resolve_colors(preset, &custom);
        Ok(Self {
            program: ShaderProgram::new(
                device,
                "palette",
                PALETTE_FS,
                1,
                &[
                    ParamDecl::slot("count", ParamKind::I32),
                    ParamDecl::slot("colors", ParamKind::Vec3Array(MAX_PALETTE)),
                ],
                TARGET_FORMAT,
            )?,
            count,
            colors,
        })
    }
}

impl StackPass for PalettePass {
    // Both options are structural; the reconciler rebuilds on change.
    fn set_option(&mut self, _name: &str, _value: &OptionValue) {}
}

impl Pass for PalettePass {
    fn render(
        &mut self,
        ctx: &PassContext,
        input: &PipelineState,
        pool: &mut RenderTargetPool,
    ) -> Result<PipelineState> {
        let slots = [
            ("count", ParamValue::I32(self.count as i32)),
            ("colors", ParamValue::Vec3Array(self.colors.clone())),
        ];
        run_single(ctx, &mut self.program, input, pool, &slots)
    }
}
