//! Pixel sorting as an odd-even transposition network.
//!
//! A full sort is not expressible as one local per-pixel operation, so the
//! pass runs `span_length` comparison steps, each swapping a pixel with one
//! neighbour chosen by step parity, ping-ponging between two pooled targets.
//! After exactly `span_length` steps every masked span is fully ordered.
//! The network restarts from step zero every frame so animated input and
//! live parameter scrubbing re-sort correctly.

use anyhow::Result;
use effectstack::{option_number, option_text, OptionMap, OptionValue, StackPass};

use crate::gpu::pool::RenderTargetPool;
use crate::gpu::program::{
    compile_pipeline, linear_sampler, texture_bind_group_layout, uniform_bind_group_layout,
    FULLSCREEN_VS,
};
use crate::gpu::TARGET_FORMAT;
use crate::state::PipelineState;

use super::{Pass, PassContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Luminance,
    Hue,
    Saturation,
    RgbAverage,
    Red,
    Green,
    Blue,
}

impl SortKey {
    fn from_name(name: &str) -> Self {
        match name {
            "Hue" => SortKey::Hue,
            "Saturation" => SortKey::Saturation,
            "RGB Average" => SortKey::RgbAverage,
            "Red" => SortKey::Red,
            "Green" => SortKey::Green,
            "Blue" => SortKey::Blue,
            _ => SortKey::Luminance,
        }
    }

    fn shader_index(self) -> i32 {
        match self {
            SortKey::Luminance => 0,
            SortKey::Hue => 1,
            SortKey::Saturation => 2,
            SortKey::RgbAverage => 3,
            SortKey::Red => 4,
            SortKey::Green => 5,
            SortKey::Blue => 6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Up,
    Down,
    Left,
    Right,
}

impl SortDirection {
    fn from_name(name: &str) -> Self {
        match name {
            "Up" => SortDirection::Up,
            "Left" => SortDirection::Left,
            "Right" => SortDirection::Right,
            _ => SortDirection::Down,
        }
    }

    fn vec(self) -> [f32; 2] {
        match self {
            SortDirection::Up => [0.0, -1.0],
            SortDirection::Down => [0.0, 1.0],
            SortDirection::Left => [-1.0, 0.0],
            SortDirection::Right => [1.0, 0.0],
        }
    }

    fn reverse(self) -> bool {
        matches!(self, SortDirection::Up | SortDirection::Left)
    }

    fn vertical(self) -> bool {
        matches!(self, SortDirection::Up | SortDirection::Down)
    }
}

const SORT_FS: &str = r#"
struct Params {
    sort_vec: vec2<f32>,
    low: f32,
    high: f32,
    width: i32,
    height: i32,
    sort_by: i32,
    mode: i32,
    step: i32,
    reverse: i32,
};

@group(0) @binding(0) var input_tex: texture_2d<f32>;
@group(0) @binding(1) var input_sampler: sampler;
@group(1) @binding(0) var<uniform> params: Params;

fn rgb2hsl(c: vec3<f32>) -> vec3<f32> {
    let max_c = max(c.r, max(c.g, c.b));
    let min_c = min(c.r, min(c.g, c.b));
    let delta = max_c - min_c;
    var h = 0.0;
    if (delta > 0.0) {
        if (max_c == c.r) {
            h = (c.g - c.b) / delta % 6.0;
        } else if (max_c == c.g) {
            h = (c.b - c.r) / delta + 2.0;
        } else {
            h = (c.r - c.g) / delta + 4.0;
        }
        h = h / 6.0;
        if (h < 0.0) { h += 1.0; }
    }
    let l = 0.5 * (max_c + min_c);
    var s = 0.0;
    if (delta != 0.0) {
        s = delta / (1.0 - abs(2.0 * l - 1.0));
    }
    return vec3<f32>(h, s, l);
}

fn sort_key(c: vec3<f32>) -> f32 {
    let hsl = rgb2hsl(c);
    switch params.sort_by {
        case 1: { return hsl.x; }
        case 2: { return hsl.y; }
        case 3: { return (c.r + c.g + c.b) / 3.0; }
        case 4: { return c.r; }
        case 5: { return c.g; }
        case 6: { return c.b; }
        default: { return hsl.z; }
    }
}

fn in_span(key: f32) -> bool {
    if (params.mode == 0) { return true; }
    return key >= params.low && key <= params.high;
}

@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    let coord = vec2<i32>(in.pos.xy);
    let size = vec2<f32>(f32(params.width), f32(params.height));

    let vertical = abs(params.sort_vec.y) > abs(params.sort_vec.x);
    let span_length = select(params.width, params.height, vertical);
    let axis = select(coord.x, coord.y, vertical);
    let perp = select(coord.y, coord.x, vertical);

    let uv = (vec2<f32>(coord) + vec2<f32>(0.5)) / size;
    let own = textureSample(input_tex, input_sampler, uv);
    let key = sort_key(own.rgb);
    let own_in_span = in_span(key);

    var pair_offset = -1;
    if ((axis + params.step) % 2 == 0) { pair_offset = 1; }
    let neighbor_axis = axis + pair_offset;
    let valid = neighbor_axis >= 0 && neighbor_axis < span_length;

    let clamped_axis = clamp(neighbor_axis, 0, span_length - 1);
    var neighbor_uv: vec2<f32>;
    if (vertical) {
        neighbor_uv = (vec2<f32>(f32(perp), f32(clamped_axis)) + vec2<f32>(0.5)) / size;
    } else {
        neighbor_uv = (vec2<f32>(f32(clamped_axis), f32(perp)) + vec2<f32>(0.5)) / size;
    }

    let sampled = textureSampleLevel(input_tex, input_sampler, neighbor_uv, 0.0);
    let neighbor = select(own, sampled, valid);
    let neighbor_key = sort_key(neighbor.rgb);
    let neighbor_in_span = valid && in_span(neighbor_key);

    let both = own_in_span && neighbor_in_span;
    let gt = key > neighbor_key;
    let lt = key < neighbor_key;
    let fwd = (pair_offset == 1 && gt) || (pair_offset == -1 && lt);
    let rev = (pair_offset == 1 && lt) || (pair_offset == -1 && gt);
    let swap = both && select(fwd, rev, params.reverse == 1);

    return select(own, neighbor, swap);
}
"#;

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct SortUniforms {
    sort_vec: [f32; 2],
    low: f32,
    high: f32,
    width: i32,
    height: i32,
    sort_by: i32,
    mode: i32,
    step: i32,
    reverse: i32,
    _pad: [i32; 2],
}

struct UniformSlab {
    buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    capacity: u32,
}

/// Each comparison step reads a 256-byte-aligned slice of one uniform slab
/// via a dynamic offset, so the whole network is written with a single
/// buffer upload and recorded into one encoder.
pub struct PixelSortPass {
    pipeline: wgpu::RenderPipeline,
    texture_layout: wgpu::BindGroupLayout,
    uniform_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    stride: u32,
    slab: Option<UniformSlab>,
    mode_threshold: bool,
    low: f32,
    high: f32,
    sort_by: SortKey,
    direction: SortDirection,
}

impl PixelSortPass {
    pub fn new(device: &wgpu::Device, options: &OptionMap) -> Result<Self> {
        let texture_layout = texture_bind_group_layout(device, 1);
        let uniform_layout = uniform_bind_group_layout(device, true);
        let source = format!("{FULLSCREEN_VS}\n{SORT_FS}");
        let pipeline = compile_pipeline(
            device,
            "pixel sort",
            &source,
            &[&texture_layout, &uniform_layout],
            TARGET_FORMAT,
            None,
        )?;
        let align = device.limits().min_uniform_buffer_offset_alignment;
        let stride = (std::mem::size_of::<SortUniforms>() as u32).div_ceil(align) * align;
        Ok(Self {
            pipeline,
            texture_layout,
            uniform_layout,
            sampler: linear_sampler(device),
            stride,
            slab: None,
            mode_threshold: option_text(options, "mode", "Fully Sorted") == "Threshold",
            low: option_number(options, "low", 0.0, 1.0, 0.2) as f32,
            high: option_number(options, "high", 0.0, 1.0, 0.8) as f32,
            sort_by: SortKey::from_name(option_text(options, "sortBy", "Luminance")),
            direction: SortDirection::from_name(option_text(options, "direction", "Down")),
        })
    }

    fn ensure_slab(&mut self, device: &wgpu::Device, steps: u32) {
        let fits = self.slab.as_ref().is_some_and(|s| s.capacity >= steps);
        if fits {
            return;
        }
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("pixel sort uniforms"),
            size: (self.stride as u64) * (steps as u64),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("pixel sort uniforms"),
            layout: &self.uniform_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &buffer,
                    offset: 0,
                    size: wgpu::BufferSize::new(std::mem::size_of::<SortUniforms>() as u64),
                }),
            }],
        });
        self.slab = Some(UniformSlab {
            buffer,
            bind_group,
            capacity: steps,
        });
    }
}

impl StackPass for PixelSortPass {
    fn set_option(&mut self, name: &str, value: &OptionValue) {
        match name {
            "low" => self.low = value.number_in(0.0, 1.0, 0.2) as f32,
            "high" => self.high = value.number_in(0.0, 1.0, 0.8) as f32,
            // mode/sortBy/direction are structural and arrive via rebuild,
            // but patching them here keeps the pass self-consistent.
            "mode" => {
                if let Some(mode) = value.as_str() {
                    self.mode_threshold = mode == "Threshold";
                }
            }
            "sortBy" => {
                if let Some(name) = value.as_str() {
                    self.sort_by = SortKey::from_name(name);
                }
            }
            "direction" => {
                if let Some(name) = value.as_str() {
                    self.direction = SortDirection::from_name(name);
                }
            }
            _ => {}
        }
    }
}

impl Pass for PixelSortPass {
    fn render(
        &mut self,
        ctx: &PassContext,
        input: &PipelineState,
        pool: &mut RenderTargetPool,
    ) -> Result<PipelineState> {
        let (width, height) = (input.width, input.height);
        let steps = if self.direction.vertical() {
            height
        } else {
            width
        };
        if steps == 0 {
            return Ok(input.clone());
        }

        self.ensure_slab(ctx.device, steps);
        let slab = self.slab.as_ref().expect("slab ensured above");

        let mut contents = vec![0u8; (self.stride as usize) * (steps as usize)];
        for step in 0..steps {
            let uniforms = SortUniforms {
                sort_vec: self.direction.vec(),
                low: self.low,
                high: self.high,
                width: width as i32,
                height: height as i32,
                sort_by: self.sort_by.shader_index(),
                mode: i32::from(self.mode_threshold),
                step: step as i32,
                reverse: i32::from(self.direction.reverse()),
                _pad: [0; 2],
            };
            let at = (step as usize) * (self.stride as usize);
            contents[at..at + std::mem::size_of::<SortUniforms>()]
                .copy_from_slice(bytemuck::bytes_of(&uniforms));
        }
        ctx.queue.write_buffer(&slab.buffer, 0, &contents);

        let pair = pool.ping_pong_pair(width, height)?;
        let mut source_view = input.view.clone();
        let mut last = None;

        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("pixel sort"),
            });
        for step in 0..steps {
            let dst = pair.next();
            let textures = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("pixel sort step"),
                layout: &self.texture_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&source_view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(&self.sampler),
                    },
                ],
            });
            {
                let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("pixel sort step"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: &dst.view,
                        depth_slice: None,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                            store: wgpu::StoreOp::Store,
                        },
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                });
                rpass.set_pipeline(&self.pipeline);
                rpass.set_bind_group(0, &textures, &[]);
                rpass.set_bind_group(1, &slab.bind_group, &[step * self.stride]);
                rpass.draw(0..3, 0..1);
            }
            source_view = dst.view.clone();
            last = Some(dst);
        }
        ctx.queue.submit(Some(encoder.finish()));

        let last = last.expect("at least one step ran");
        Ok(PipelineState::from_target(&last))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// CPU model of one network step under the shader's swap rule.
    fn network_step(values: &[f32], step: usize, reverse: bool, mask: &dyn Fn(f32) -> bool) -> Vec<f32> {
        let len = values.len();
        let mut out = values.to_vec();
        for axis in 0..len {
            let pair_offset: isize = if (axis + step) % 2 == 0 { 1 } else { -1 };
            let neighbor = axis as isize + pair_offset;
            if neighbor < 0 || neighbor >= len as isize {
                continue;
            }
            let own = values[axis];
            let other = values[neighbor as usize];
            if !mask(own) || !mask(other) {
                continue;
            }
            let fwd = (pair_offset == 1 && own > other) || (pair_offset == -1 && own < other);
            let rev = (pair_offset == 1 && own < other) || (pair_offset == -1 && own > other);
            if if reverse { rev } else { fwd } {
                out[axis] = other;
            }
        }
        out
    }

    fn run_network(mut values: Vec<f32>, reverse: bool, mask: &dyn Fn(f32) -> bool) -> Vec<f32> {
        let steps = values.len();
        for step in 0..steps {
            values = network_step(&values, step, reverse, mask);
        }
        values
    }

    #[test]
    fn full_span_is_monotonic_after_length_steps() {
        let values = vec![0.9, 0.1, 0.5, 0.3, 0.7, 0.2, 0.8, 0.4, 0.6, 0.0];
        let sorted = run_network(values.clone(), false, &|_| true);
        let mut expected = values;
        expected.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(sorted, expected);
    }

    #[test]
    fn reverse_direction_sorts_descending() {
        let values = vec![0.2, 0.8, 0.5, 0.1, 0.9, 0.4];
        let sorted = run_network(values.clone(), true, &|_| true);
        let mut expected = values;
        expected.sort_by(|a, b| b.partial_cmp(a).unwrap());
        assert_eq!(sorted, expected);
    }

    #[test]
    fn masked_values_hold_their_positions() {
        // Values outside [0.3, 0.7] act as span boundaries.
        let mask = |v: f32| (0.3..=0.7).contains(&v);
        let values = vec![0.6, 0.4, 0.9, 0.7, 0.3, 0.5];
        let sorted = run_network(values, false, &mask);
        assert_eq!(sorted[2], 0.9);
        assert_eq!(sorted[..2], [0.4, 0.6]);
        assert_eq!(sorted[3..], [0.3, 0.5, 0.7]);
    }

    #[test]
    fn length_minus_one_steps_can_leave_disorder() {
        // Worst case input: the minimum starts at the far end.
        let values = vec![0.5, 0.4, 0.3, 0.2, 0.1, 0.0];
        let mut partial = values.clone();
        for step in 0..values.len() - 1 {
            partial = network_step(&partial, step, false, &|_| true);
        }
        let finished = network_step(&partial, values.len() - 1, false, &|_| true);
        assert!(partial.windows(2).any(|w| w[0] > w[1]));
        assert!(finished.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn option_maps_match_the_menu_labels() {
        assert_eq!(SortKey::from_name("RGB Average").shader_index(), 3);
        assert_eq!(SortKey::from_name("unknown"), SortKey::Luminance);
        assert_eq!(SortDirection::from_name("Up").vec(), [0.0, -1.0]);
        assert!(SortDirection::from_name("Left").reverse());
        assert!(!SortDirection::from_name("Down").reverse());
        assert!(!SortDirection::from_name("Right").vertical());
    }
}
