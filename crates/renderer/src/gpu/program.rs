use anyhow::Result;
use tracing::warn;
use wgpu::util::DeviceExt;

/// Shared fullscreen-triangle vertex stage. Every fragment program in the
/// crate is concatenated after this source; `uv` has its origin at the top
/// left so an identity fragment shader reproduces its input.
pub const FULLSCREEN_VS: &str = r#"
struct VsOut {
    @builtin(position) pos: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> VsOut {
    let pos = vec2<f32>(
        f32((index << 1u) & 2u) * 2.0 - 1.0,
        f32(index & 2u) * 2.0 - 1.0,
    );
    var out: VsOut;
    out.pos = vec4<f32>(pos, 0.0, 1.0);
    out.uv = vec2<f32>(pos.x * 0.5 + 0.5, 0.5 - pos.y * 0.5);
    return out;
}
"#;

/// A uniform value as a pass supplies it each frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    F32(f32),
    I32(i32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Vec3Array(Vec<[f32; 3]>),
}

impl ParamValue {
    pub fn kind(&self) -> ParamKind {
        match self {
            ParamValue::F32(_) => ParamKind::F32,
            ParamValue::I32(_) => ParamKind::I32,
            ParamValue::Vec2(_) => ParamKind::Vec2,
            ParamValue::Vec3(_) => ParamKind::Vec3,
            ParamValue::Vec4(_) => ParamKind::Vec4,
            ParamValue::Vec3Array(v) => ParamKind::Vec3Array(v.len()),
        }
    }
}

/// Declared shape of one uniform field. Arrays carry their fixed length so
/// a wrong-sized value is rejected instead of corrupting neighbours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    F32,
    I32,
    Vec2,
    Vec3,
    Vec4,
    Vec3Array(usize),
}

impl ParamKind {
    fn align(self) -> usize {
        match self {
            ParamKind::F32 | ParamKind::I32 => 4,
            ParamKind::Vec2 => 8,
            ParamKind::Vec3 | ParamKind::Vec4 | ParamKind::Vec3Array(_) => 16,
        }
    }

    fn size(self) -> usize {
        match self {
            ParamKind::F32 | ParamKind::I32 => 4,
            ParamKind::Vec2 => 8,
            // vec3 occupies 12 bytes; a following f32 packs into its pad.
            ParamKind::Vec3 => 12,
            ParamKind::Vec4 => 16,
            // uniform-space arrays have a 16-byte element stride.
            ParamKind::Vec3Array(len) => 16 * len,
        }
    }
}

/// Where a declared uniform gets its value.
#[derive(Debug, Clone)]
pub enum ParamSource {
    /// Fixed at program construction.
    Const(ParamValue),
    /// Looked up by name from the pass each draw.
    Slot(&'static str),
    /// Dimensions of the input texture, as a vec2<f32>.
    InputSize,
    /// Dimensions of the output target, as a vec2<f32>.
    OutputSize,
    /// Reciprocal input dimensions, the step to an adjacent texel.
    InputTexelSize,
}

#[derive(Debug, Clone)]
pub struct ParamDecl {
    pub name: &'static str,
    pub kind: ParamKind,
    pub source: ParamSource,
}

impl ParamDecl {
    pub fn slot(name: &'static str, kind: ParamKind) -> Self {
        Self {
            name,
            kind,
            source: ParamSource::Slot(name),
        }
    }

    pub fn constant(name: &'static str, value: ParamValue) -> Self {
        Self {
            name,
            kind: value.kind(),
            source: ParamSource::Const(value),
        }
    }

    pub fn derived(name: &'static str, source: ParamSource) -> Self {
        Self {
            name,
            kind: ParamKind::Vec2,
            source,
        }
    }
}

struct LayoutEntry {
    decl: ParamDecl,
    offset: usize,
}

/// Field offsets matching WGSL uniform address-space layout rules for the
/// declared fields in order. The fragment source declares the same struct;
/// the two must agree field for field.
pub(crate) struct ParamLayout {
    entries: Vec<LayoutEntry>,
    size: usize,
}

fn round_up(value: usize, align: usize) -> usize {
    value.div_ceil(align) * align
}

impl ParamLayout {
    fn new(decls: &[ParamDecl]) -> Self {
        let mut entries = Vec::with_capacity(decls.len());
        let mut offset = 0usize;
        for decl in decls {
            offset = round_up(offset, decl.kind.align());
            entries.push(LayoutEntry {
                decl: decl.clone(),
                offset,
            });
            offset += decl.kind.size();
        }
        let size = round_up(offset, 16);
        Self { entries, size }
    }
}

fn write_value(shadow: &mut [u8], offset: usize, value: &ParamValue) {
    match value {
        ParamValue::F32(v) => shadow[offset..offset + 4].copy_from_slice(&v.to_le_bytes()),
        ParamValue::I32(v) => shadow[offset..offset + 4].copy_from_slice(&v.to_le_bytes()),
        ParamValue::Vec2(v) => {
            shadow[offset..offset + 8].copy_from_slice(bytemuck::cast_slice(v))
        }
        ParamValue::Vec3(v) => {
            shadow[offset..offset + 12].copy_from_slice(bytemuck::cast_slice(v))
        }
        ParamValue::Vec4(v) => {
            shadow[offset..offset + 16].copy_from_slice(bytemuck::cast_slice(v))
        }
        ParamValue::Vec3Array(items) => {
            for (i, item) in items.iter().enumerate() {
                let at = offset + 16 * i;
                shadow[at..at + 12].copy_from_slice(bytemuck::cast_slice(item));
            }
        }
    }
}

/// Values a pass exposes to its program by slot name.
pub trait SlotProvider {
    fn slot(&self, name: &str) -> Option<ParamValue>;
}

impl SlotProvider for () {
    fn slot(&self, _name: &str) -> Option<ParamValue> {
        None
    }
}

impl<'a, const N: usize> SlotProvider for [(&'a str, ParamValue); N] {
    fn slot(&self, name: &str) -> Option<ParamValue> {
        self.iter().find(|(n, _)| *n == name).map(|(_, v)| v.clone())
    }
}

struct ParamBlock {
    layout: ParamLayout,
    buffer: wgpu::Buffer,
    shadow: Vec<u8>,
    bind_group_layout: wgpu::BindGroupLayout,
    bind_group: wgpu::BindGroup,
    dirty: bool,
}

/// One compiled fragment program: render pipeline, texture/sampler bind
/// group layout, and the uniform block with its CPU shadow. A uniform a
/// pass fails to supply keeps its previous bytes, so a skipped update
/// degrades to a stale value rather than garbage.
pub struct ShaderProgram {
    label: String,
    pipeline: wgpu::RenderPipeline,
    texture_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    texture_count: u32,
    params: Option<ParamBlock>,
}

impl ShaderProgram {
    /// Compiles `fragment` (appended to the shared vertex stage) and builds
    /// the pipeline. A WGSL error is fatal: it is logged with the program
    /// label and returned, never deferred to draw time.
    pub fn new(
        device: &wgpu::Device,
        label: &str,
        fragment: &str,
        texture_count: u32,
        decls: &[ParamDecl],
        output_format: wgpu::TextureFormat,
    ) -> Result<Self> {
        let texture_layout = texture_bind_group_layout(device, texture_count);
        let sampler = linear_sampler(device);

        let params = if decls.is_empty() {
            None
        } else {
            let layout = ParamLayout::new(decls);
            let mut shadow = vec![0u8; layout.size];
            for entry in &layout.entries {
                if let ParamSource::Const(value) = &entry.decl.source {
                    write_value(&mut shadow, entry.offset, value);
                }
            }
            let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&format!("{label} params")),
                contents: &shadow,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            });
            let bind_group_layout = uniform_bind_group_layout(device, false);
            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(&format!("{label} params")),
                layout: &bind_group_layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: buffer.as_entire_binding(),
                }],
            });
            Some(ParamBlock {
                layout,
                buffer,
                shadow,
                bind_group_layout,
                bind_group,
                dirty: false,
            })
        };

        let source = format!("{FULLSCREEN_VS}\n{fragment}");
        let mut group_layouts: Vec<&wgpu::BindGroupLayout> = vec![&texture_layout];
        if let Some(block) = &params {
            group_layouts.push(&block.bind_group_layout);
        }
        let pipeline = compile_pipeline(device, label, &source, &group_layouts, output_format, None)?;

        Ok(Self {
            label: label.to_owned(),
            pipeline,
            texture_layout,
            sampler,
            texture_count,
            params,
        })
    }

    /// Resolves every declared uniform and draws the fullscreen triangle
    /// into `output`. A missing or wrongly shaped slot value is logged and
    /// skipped, leaving the previous bytes in place.
    pub fn draw(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        inputs: &[&wgpu::TextureView],
        output: &wgpu::TextureView,
        slots: &dyn SlotProvider,
        input_size: (u32, u32),
        output_size: (u32, u32),
    ) {
        debug_assert_eq!(inputs.len() as u32, self.texture_count);
        self.resolve_params(slots, input_size, output_size);
        if let Some(block) = &mut self.params {
            if block.dirty {
                queue.write_buffer(&block.buffer, 0, &block.shadow);
                block.dirty = false;
            }
        }

        let mut entries: Vec<wgpu::BindGroupEntry> = inputs
            .iter()
            .enumerate()
            .map(|(i, view)| wgpu::BindGroupEntry {
                binding: i as u32,
                resource: wgpu::BindingResource::TextureView(view),
            })
            .collect();
        entries.push(wgpu::BindGroupEntry {
            binding: self.texture_count,
            resource: wgpu::BindingResource::Sampler(&self.sampler),
        });
        let textures = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&self.label),
            layout: &self.texture_layout,
            entries: &entries,
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(&self.label),
        });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(&self.label),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: output,
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
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &textures, &[]);
            if let Some(block) = &self.params {
                pass.set_bind_group(1, &block.bind_group, &[]);
            }
            pass.draw(0..3, 0..1);
        }
        queue.submit(Some(encoder.finish()));
    }

    fn resolve_params(&mut self, slots: &dyn SlotProvider, input: (u32, u32), output: (u32, u32)) {
        let Some(block) = &mut self.params else {
            return;
        };
        for entry in &block.layout.entries {
            let value = match &entry.decl.source {
                ParamSource::Const(_) => continue,
                ParamSource::Slot(name) => match slots.slot(name) {
                    Some(value) => value,
                    None => {
                        warn!(
                            program = %self.label,
                            param = entry.decl.name,
                            "no value supplied for uniform, keeping previous"
                        );
                        continue;
                    }
                },
                ParamSource::InputSize => ParamValue::Vec2([input.0 as f32, input.1 as f32]),
                ParamSource::OutputSize => ParamValue::Vec2([output.0 as f32, output.1 as f32]),
                ParamSource::InputTexelSize => ParamValue::Vec2([
                    1.0 / input.0.max(1) as f32,
                    1.0 / input.1.max(1) as f32,
                ]),
            };
            if value.kind() != entry.decl.kind {
                warn!(
                    program = %self.label,
                    param = entry.decl.name,
                    expected = ?entry.decl.kind,
                    got = ?value.kind(),
                    "uniform value has the wrong shape, keeping previous"
                );
                continue;
            }
            write_value(&mut block.shadow, entry.offset, &value);
            block.dirty = true;
        }
    }
}

/// Bind group layout for `count` sampled textures followed by one sampler.
pub(crate) fn texture_bind_group_layout(
    device: &wgpu::Device,
    count: u32,
) -> wgpu::BindGroupLayout {
    let mut entries: Vec<wgpu::BindGroupLayoutEntry> = (0..count)
        .map(|i| wgpu::BindGroupLayoutEntry {
            binding: i,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        })
        .collect();
    entries.push(wgpu::BindGroupLayoutEntry {
        binding: count,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
        count: None,
    });
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("pass textures"),
        entries: &entries,
    })
}

pub(crate) fn uniform_bind_group_layout(
    device: &wgpu::Device,
    dynamic: bool,
) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("pass params"),
        entries: &[wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: dynamic,
                min_binding_size: None,
            },
            count: None,
        }],
    })
}

pub(crate) fn linear_sampler(device: &wgpu::Device) -> wgpu::Sampler {
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some("linear clamp"),
        address_mode_u: wgpu::AddressMode::ClampToEdge,
        address_mode_v: wgpu::AddressMode::ClampToEdge,
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: wgpu::FilterMode::Linear,
        min_filter: wgpu::FilterMode::Linear,
        ..Default::default()
    })
}

/// Compiles a module and builds a fullscreen render pipeline, surfacing
/// WGSL and pipeline validation errors as a hard failure.
pub(crate) fn compile_pipeline(
    device: &wgpu::Device,
    label: &str,
    source: &str,
    bind_group_layouts: &[&wgpu::BindGroupLayout],
    output_format: wgpu::TextureFormat,
    blend: Option<wgpu::BlendState>,
) -> Result<wgpu::RenderPipeline> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });
    let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts,
        push_constant_ranges: &[],
    });
    let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(&layout),
        vertex: wgpu::VertexState {
            module: &module,
            entry_point: Some("vs_main"),
            compilation_options: Default::default(),
            buffers: &[],
        },
        fragment: Some(wgpu::FragmentState {
            module: &module,
            entry_point: Some("fs_main"),
            compilation_options: Default::default(),
            targets: &[Some(wgpu::ColorTargetState {
                format: output_format,
                blend,
                write_mask: wgpu::ColorWrites::ALL,
            })],
        }),
        primitive: wgpu::PrimitiveState::default(),
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    });
    if let Some(err) = pollster::block_on(device.pop_error_scope()) {
        tracing::error!(program = label, %err, "shader program failed to compile");
        anyhow::bail!("shader program '{label}' failed to compile: {err}");
    }
    Ok(pipeline)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_packs_into_vec3_padding() {
        let layout = ParamLayout::new(&[
            ParamDecl::slot("tint", ParamKind::Vec3),
            ParamDecl::slot("strength", ParamKind::F32),
        ]);
        assert_eq!(layout.entries[0].offset, 0);
        assert_eq!(layout.entries[1].offset, 12);
        assert_eq!(layout.size, 16);
    }

    #[test]
    fn vec2_after_scalar_aligns_to_eight() {
        let layout = ParamLayout::new(&[
            ParamDecl::slot("levels", ParamKind::F32),
            ParamDecl::slot("texel", ParamKind::Vec2),
        ]);
        assert_eq!(layout.entries[1].offset, 8);
        assert_eq!(layout.size, 16);
    }

    #[test]
    fn array_elements_use_sixteen_byte_stride() {
        let layout = ParamLayout::new(&[
            ParamDecl::slot("count", ParamKind::F32),
            ParamDecl::slot("colors", ParamKind::Vec3Array(4)),
        ]);
        assert_eq!(layout.entries[1].offset, 16);
        assert_eq!(layout.size, 16 + 4 * 16);

        let mut shadow = vec![0u8; layout.size];
        write_value(
            &mut shadow,
            layout.entries[1].offset,
            &ParamValue::Vec3Array(vec![[1.0, 0.0, 0.0]; 4]),
        );
        // Second element starts one stride in, not at byte 12.
        let second = &shadow[32..36];
        assert_eq!(second, 1.0f32.to_le_bytes());
    }

    #[test]
    fn empty_struct_has_zero_size() {
        let layout = ParamLayout::new(&[]);
        assert_eq!(layout.size, 0);
        assert!(layout.entries.is_empty());
    }

    #[test]
    fn value_kind_matches_declared_kind() {
        assert_eq!(ParamValue::F32(1.0).kind(), ParamKind::F32);
        assert_eq!(
            ParamValue::Vec3Array(vec![[0.0; 3]; 16]).kind(),
            ParamKind::Vec3Array(16)
        );
        assert_ne!(
            ParamValue::Vec3Array(vec![[0.0; 3]; 15]).kind(),
            ParamKind::Vec3Array(16)
        );
    }

    #[test]
    fn slot_arrays_resolve_by_name_through_the_trait_object() {
        let slots = [
            ("levels", ParamValue::F32(4.0)),
            ("amount", ParamValue::F32(1.5)),
        ];
        let provider: &dyn SlotProvider = &slots;
        assert_eq!(provider.slot("amount"), Some(ParamValue::F32(1.5)));
        assert_eq!(provider.slot("missing"), None);
    }

    #[test]
    fn scalar_write_is_little_endian() {
        let mut shadow = vec![0u8; 16];
        write_value(&mut shadow, 4, &ParamValue::I32(-2));
        assert_eq!(&shadow[4..8], (-2i32).to_le_bytes());
        write_value(&mut shadow, 8, &ParamValue::Vec2([0.5, 2.0]));
        assert_eq!(&shadow[8..12], 0.5f32.to_le_bytes());
    }
}
