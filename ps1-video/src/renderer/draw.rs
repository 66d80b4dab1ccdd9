//! Draw pipelines and render pass emission.
//!
//! A flush becomes a sequence of passes over the upscaled store: opaque
//! phases first (depth write on, vertex buffers iterated in reverse so later
//! primitives land in front under LESS), then the ordered semi-transparent
//! phase. Fixed-function blend runs stay in the attachment pass;
//! programmable-blend runs (mask test plus blending) write the store through
//! a read-write storage binding inside separate passes with color writes
//! masked off, one primitive per draw.

use crate::atlas::{Domain, RenderPassState, TextureMode};
use crate::queue::{
    psx_color_to_rgba8, BufferVertex, DrawQueue, SemiTransparentMode, SemiTransparentState,
    Surface,
};
use bytemuck::{Pod, Zeroable};
use std::mem;
use std::ops::Range;
use wgpu::util::{BufferInitDescriptor, DeviceExt};
use wgpu::{
    BindGroup, BindGroupDescriptor, BindGroupEntry, BindGroupLayoutDescriptor,
    BindGroupLayoutEntry, BindingResource, BindingType, BlendComponent, BlendFactor,
    BlendOperation, BlendState, Buffer, BufferUsages, Color, ColorTargetState, ColorWrites,
    CommandEncoder, CompareFunction, DepthBiasState, DepthStencilState, Device, FragmentState,
    FrontFace, LoadOp, MultisampleState, Operations, PipelineCompilationOptions,
    PipelineLayout, PipelineLayoutDescriptor, PolygonMode, PrimitiveState, PrimitiveTopology,
    PushConstantRange, RenderPass, RenderPassColorAttachment, RenderPassDepthStencilAttachment,
    RenderPassDescriptor, RenderPipeline, RenderPipelineDescriptor, ShaderStages, StencilState,
    StorageTextureAccess, TextureFormat, TextureView, TextureViewDimension, VertexState,
};

/// Views shared by every pass the renderer records.
pub struct PassTargets {
    pub scaled: TextureView,
    pub depth: TextureView,
    pub feedback: TextureView,
    pub native: TextureView,
    pub scaled_copy: TextureView,
}

// Must match DrawParams in draw.wgsl
#[repr(C)]
#[derive(Debug, Clone, Copy, Zeroable, Pod)]
struct ShaderDrawParams {
    texpage: [u32; 2],
    clut: [u32; 2],
    window_mask: [u32; 2],
    window_offset: [u32; 2],
    color_depth: u32,
    sample_scaled: u32,
    resolution_scale: u32,
    dither: u32,
}

impl ShaderDrawParams {
    fn flat(resolution_scale: u32, dither: bool) -> Self {
        Self {
            texpage: [0, 0],
            clut: [0, 0],
            window_mask: [0, 0],
            window_offset: [0, 0],
            color_depth: 0,
            sample_scaled: 0,
            resolution_scale,
            dither: dither.into(),
        }
    }

    fn textured(surface: &Surface, resolution_scale: u32, dither: bool) -> Self {
        let color_depth = match surface.mode {
            TextureMode::None | TextureMode::Abgr1555 => 0,
            TextureMode::Palette8bpp => 1,
            TextureMode::Palette4bpp => 2,
        };

        Self {
            texpage: [surface.texpage.0, surface.texpage.1],
            clut: [surface.clut.0, surface.clut.1],
            window_mask: [surface.window_mask.0, surface.window_mask.1],
            window_offset: [surface.window_offset.0, surface.window_offset.1],
            color_depth,
            sample_scaled: u32::from(surface.domain == Domain::Scaled),
            resolution_scale,
            dither: dither.into(),
        }
    }
}

// Primitive ranges in the ordered phase, split around programmable runs.
enum Segment {
    Attachment(Vec<(Range<u32>, SemiTransparentState)>),
    Feedback(Range<u32>, SemiTransparentState),
}

/// Per-flush vertex buffers. Opaque buffers hold their buckets reversed;
/// ranges map a surface index to its vertex span.
pub struct DrawBuffers {
    opaque: Option<Buffer>,
    opaque_len: u32,
    textured: Option<Buffer>,
    textured_ranges: Vec<(u32, Range<u32>)>,
    st_opaque: Option<Buffer>,
    st_opaque_ranges: Vec<(u32, Range<u32>)>,
    serial: Option<Buffer>,
}

pub struct DrawPipelines {
    textured_bind_group: BindGroup,
    feedback_bind_group: BindGroup,
    opaque_flat: RenderPipeline,
    opaque_textured: RenderPipeline,
    st_opaque_textured: RenderPipeline,
    serial_flat_mask: RenderPipeline,
    serial_textured_mask: RenderPipeline,
    serial_add: RenderPipeline,
    serial_average: RenderPipeline,
    serial_sub: RenderPipeline,
    serial_add_quarter: RenderPipeline,
    feedback_add: RenderPipeline,
    feedback_average: RenderPipeline,
    feedback_sub: RenderPipeline,
    feedback_add_quarter: RenderPipeline,
}

impl DrawPipelines {
    const CHECK_MASK_COMPONENT: BlendComponent = BlendComponent {
        src_factor: BlendFactor::OneMinusDstAlpha,
        dst_factor: BlendFactor::DstAlpha,
        operation: BlendOperation::Add,
    };

    // Destination alpha gates writes: the mask bit lives in the alpha channel.
    const REPLACE_CHECK_MASK: BlendState =
        BlendState { color: Self::CHECK_MASK_COMPONENT, alpha: Self::CHECK_MASK_COMPONENT };

    const ADDITIVE_BLEND: BlendState = BlendState {
        color: BlendComponent {
            src_factor: BlendFactor::One,
            dst_factor: BlendFactor::One,
            operation: BlendOperation::Add,
        },
        alpha: BlendComponent::REPLACE,
    };

    // 0.5*src + 0.5*dst via the blend constant
    const AVERAGE_BLEND: BlendState = BlendState {
        color: BlendComponent {
            src_factor: BlendFactor::Constant,
            dst_factor: BlendFactor::OneMinusConstant,
            operation: BlendOperation::Add,
        },
        alpha: BlendComponent::REPLACE,
    };

    const SUBTRACTIVE_BLEND: BlendState = BlendState {
        color: BlendComponent {
            src_factor: BlendFactor::One,
            dst_factor: BlendFactor::One,
            operation: BlendOperation::ReverseSubtract,
        },
        alpha: BlendComponent::REPLACE,
    };

    // 0.25*src + dst via the blend constant
    const ADD_QUARTER_BLEND: BlendState = BlendState {
        color: BlendComponent {
            src_factor: BlendFactor::Constant,
            dst_factor: BlendFactor::One,
            operation: BlendOperation::Add,
        },
        alpha: BlendComponent::REPLACE,
    };

    pub fn new(device: &Device, targets: &PassTargets) -> Self {
        let shader = device.create_shader_module(wgpu::include_wgsl!("../shaders/draw.wgsl"));

        let push_constant_range = PushConstantRange {
            stages: ShaderStages::FRAGMENT,
            range: 0..mem::size_of::<ShaderDrawParams>() as u32,
        };

        let flat_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: "draw_flat_pipeline_layout".into(),
            bind_group_layouts: &[],
            push_constant_ranges: &[push_constant_range.clone()],
        });

        let textured_bind_group_layout =
            device.create_bind_group_layout(&BindGroupLayoutDescriptor {
                label: "draw_textured_bind_group_layout".into(),
                entries: &[
                    storage_texture_entry(0, TextureFormat::R32Uint, StorageTextureAccess::ReadOnly),
                    storage_texture_entry(
                        1,
                        TextureFormat::Rgba8Unorm,
                        StorageTextureAccess::ReadOnly,
                    ),
                ],
            });

        let textured_bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: "draw_textured_bind_group".into(),
            layout: &textured_bind_group_layout,
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: BindingResource::TextureView(&targets.native),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: BindingResource::TextureView(&targets.scaled_copy),
                },
            ],
        });

        let textured_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: "draw_textured_pipeline_layout".into(),
            bind_group_layouts: &[&textured_bind_group_layout],
            push_constant_ranges: &[push_constant_range.clone()],
        });

        let feedback_bind_group_layout =
            device.create_bind_group_layout(&BindGroupLayoutDescriptor {
                label: "draw_feedback_bind_group_layout".into(),
                entries: &[storage_texture_entry(
                    0,
                    TextureFormat::Rgba8Unorm,
                    StorageTextureAccess::ReadWrite,
                )],
            });

        let feedback_bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: "draw_feedback_bind_group".into(),
            layout: &feedback_bind_group_layout,
            entries: &[BindGroupEntry {
                binding: 0,
                resource: BindingResource::TextureView(&targets.scaled),
            }],
        });

        let feedback_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: "draw_feedback_pipeline_layout".into(),
            bind_group_layouts: &[&textured_bind_group_layout, &feedback_bind_group_layout],
            push_constant_ranges: &[push_constant_range],
        });

        let new_pipeline = |label: &str,
                            layout: &PipelineLayout,
                            fs_entry_point: &str,
                            blend: Option<BlendState>,
                            write_mask: ColorWrites,
                            depth_write_enabled: bool| {
            device.create_render_pipeline(&RenderPipelineDescriptor {
                label: format!("draw_pipeline_{label}").as_str().into(),
                layout: Some(layout),
                vertex: VertexState {
                    module: &shader,
                    entry_point: "vs_main",
                    compilation_options: PipelineCompilationOptions::default(),
                    buffers: &[BufferVertex::LAYOUT],
                },
                primitive: PrimitiveState {
                    topology: PrimitiveTopology::TriangleList,
                    strip_index_format: None,
                    front_face: FrontFace::Ccw,
                    cull_mode: None,
                    unclipped_depth: false,
                    polygon_mode: PolygonMode::Fill,
                    conservative: false,
                },
                depth_stencil: Some(DepthStencilState {
                    format: TextureFormat::Depth32Float,
                    depth_write_enabled,
                    depth_compare: CompareFunction::Less,
                    stencil: StencilState::default(),
                    bias: DepthBiasState::default(),
                }),
                multisample: MultisampleState::default(),
                fragment: Some(FragmentState {
                    module: &shader,
                    entry_point: fs_entry_point,
                    compilation_options: PipelineCompilationOptions::default(),
                    targets: &[Some(ColorTargetState {
                        format: TextureFormat::Rgba8Unorm,
                        blend,
                        write_mask,
                    })],
                }),
                multiview: None,
            })
        };

        let opaque_flat =
            new_pipeline("opaque_flat", &flat_layout, "fs_flat", None, ColorWrites::ALL, true);

        let opaque_textured = new_pipeline(
            "opaque_textured",
            &textured_layout,
            "fs_textured",
            None,
            ColorWrites::ALL,
            true,
        );

        // Opaque-texel prepass for semi-transparent textured primitives
        let st_opaque_textured = new_pipeline(
            "st_opaque_textured",
            &textured_layout,
            "fs_textured_opaque_texels",
            None,
            ColorWrites::ALL,
            true,
        );

        let serial_flat_mask = new_pipeline(
            "serial_flat_mask",
            &flat_layout,
            "fs_flat",
            Some(Self::REPLACE_CHECK_MASK),
            ColorWrites::ALL,
            false,
        );

        let serial_textured_mask = new_pipeline(
            "serial_textured_mask",
            &textured_layout,
            "fs_textured",
            Some(Self::REPLACE_CHECK_MASK),
            ColorWrites::ALL,
            false,
        );

        let serial_add = new_pipeline(
            "serial_add",
            &textured_layout,
            "fs_textured_st_texels",
            Some(Self::ADDITIVE_BLEND),
            ColorWrites::ALL,
            false,
        );

        let serial_average = new_pipeline(
            "serial_average",
            &textured_layout,
            "fs_textured_st_texels",
            Some(Self::AVERAGE_BLEND),
            ColorWrites::ALL,
            false,
        );

        let serial_sub = new_pipeline(
            "serial_sub",
            &textured_layout,
            "fs_textured_st_texels",
            Some(Self::SUBTRACTIVE_BLEND),
            ColorWrites::ALL,
            false,
        );

        let serial_add_quarter = new_pipeline(
            "serial_add_quarter",
            &textured_layout,
            "fs_textured_st_texels",
            Some(Self::ADD_QUARTER_BLEND),
            ColorWrites::ALL,
            false,
        );

        let new_feedback_pipeline = |label: &str, fs_entry_point: &str| {
            new_pipeline(label, &feedback_layout, fs_entry_point, None, ColorWrites::empty(), false)
        };

        let feedback_add = new_feedback_pipeline("feedback_add", "fs_feedback_add");
        let feedback_average = new_feedback_pipeline("feedback_average", "fs_feedback_average");
        let feedback_sub = new_feedback_pipeline("feedback_sub", "fs_feedback_sub");
        let feedback_add_quarter =
            new_feedback_pipeline("feedback_add_quarter", "fs_feedback_add_quarter");

        Self {
            textured_bind_group,
            feedback_bind_group,
            opaque_flat,
            opaque_textured,
            st_opaque_textured,
            serial_flat_mask,
            serial_textured_mask,
            serial_add,
            serial_average,
            serial_sub,
            serial_add_quarter,
            feedback_add,
            feedback_average,
            feedback_sub,
            feedback_add_quarter,
        }
    }

    pub fn prepare(&self, device: &Device, prims: &DrawQueue) -> DrawBuffers {
        let opaque_reversed: Vec<BufferVertex> = prims.opaque.iter().rev().copied().collect();
        let opaque = vertex_buffer(device, "opaque_vertex_buffer", &opaque_reversed);

        let (textured_vertices, textured_ranges) = concat_reversed(&prims.opaque_textured);
        let textured = vertex_buffer(device, "textured_vertex_buffer", &textured_vertices);

        let (st_opaque_vertices, st_opaque_ranges) =
            concat_reversed(&prims.semi_transparent_opaque);
        let st_opaque = vertex_buffer(device, "st_opaque_vertex_buffer", &st_opaque_vertices);

        let serial = vertex_buffer(device, "serial_vertex_buffer", &prims.semi_transparent);

        DrawBuffers {
            opaque,
            opaque_len: opaque_reversed.len() as u32,
            textured,
            textured_ranges,
            st_opaque,
            st_opaque_ranges,
            serial,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &self,
        encoder: &mut CommandEncoder,
        buffers: &DrawBuffers,
        prims: &DrawQueue,
        pass_state: &RenderPassState,
        targets: &PassTargets,
        resolution_scale: u32,
        dither: bool,
    ) {
        // Programmable-blend runs cannot execute while the store is bound as
        // the pass attachment, so the flush is split into alternating
        // attachment and feedback segments.
        let mut segments = vec![Segment::Attachment(Vec::new())];
        for (range, state) in prims.semi_transparent_runs() {
            if state.is_programmable() {
                segments.push(Segment::Feedback(range, state));
            } else {
                match segments.last_mut() {
                    Some(Segment::Attachment(runs)) => runs.push((range, state)),
                    _ => segments.push(Segment::Attachment(vec![(range, state)])),
                }
            }
        }

        let mut first = true;
        for segment in &segments {
            match segment {
                Segment::Attachment(runs) => {
                    let mut pass = begin_attachment_pass(encoder, pass_state, targets, first);
                    set_scissor(&mut pass, pass_state, resolution_scale);

                    if first {
                        self.record_opaque_phases(
                            &mut pass,
                            buffers,
                            prims,
                            resolution_scale,
                            dither,
                        );
                    }

                    for (range, state) in runs {
                        self.record_serial_run(
                            &mut pass,
                            buffers,
                            prims,
                            range.clone(),
                            *state,
                            resolution_scale,
                            dither,
                        );
                    }
                }
                Segment::Feedback(range, state) => {
                    let Some(serial) = &buffers.serial else { continue };

                    let surface = &prims.surfaces[state.surface as usize];
                    let params = ShaderDrawParams::textured(surface, resolution_scale, dither);
                    let pipeline = match state.mode {
                        SemiTransparentMode::Add => &self.feedback_add,
                        SemiTransparentMode::Average => &self.feedback_average,
                        SemiTransparentMode::Sub => &self.feedback_sub,
                        SemiTransparentMode::AddQuarter => &self.feedback_add_quarter,
                        SemiTransparentMode::None => unreachable!(),
                    };

                    let mut pass = begin_feedback_pass(encoder, targets);
                    set_scissor(&mut pass, pass_state, resolution_scale);
                    pass.set_pipeline(pipeline);
                    pass.set_bind_group(0, &self.textured_bind_group, &[]);
                    pass.set_bind_group(1, &self.feedback_bind_group, &[]);
                    pass.set_push_constants(
                        ShaderStages::FRAGMENT,
                        0,
                        bytemuck::cast_slice(&[params]),
                    );
                    pass.set_vertex_buffer(0, serial.slice(..));

                    // One primitive per draw stands in for a per-pixel barrier.
                    for start in (range.start * 3..range.end * 3).step_by(3) {
                        pass.draw(start..start + 3, 0..1);
                    }
                }
            }
            first = false;
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn record_serial_run<'pass>(
        &'pass self,
        pass: &mut RenderPass<'pass>,
        buffers: &'pass DrawBuffers,
        prims: &DrawQueue,
        range: Range<u32>,
        state: SemiTransparentState,
        resolution_scale: u32,
        dither: bool,
    ) {
        let Some(serial) = &buffers.serial else { return };

        let (pipeline, params) = if state.textured {
            let surface = &prims.surfaces[state.surface as usize];
            let params = ShaderDrawParams::textured(surface, resolution_scale, dither);
            let pipeline = match state.mode {
                SemiTransparentMode::None => &self.serial_textured_mask,
                SemiTransparentMode::Add => &self.serial_add,
                SemiTransparentMode::Average => &self.serial_average,
                SemiTransparentMode::Sub => &self.serial_sub,
                SemiTransparentMode::AddQuarter => &self.serial_add_quarter,
            };
            (pipeline, params)
        } else {
            (&self.serial_flat_mask, ShaderDrawParams::flat(resolution_scale, dither))
        };

        match state.mode {
            SemiTransparentMode::Average => {
                pass.set_blend_constant(Color { r: 0.5, g: 0.5, b: 0.5, a: 0.5 });
            }
            SemiTransparentMode::AddQuarter => {
                pass.set_blend_constant(Color { r: 0.25, g: 0.25, b: 0.25, a: 1.0 });
            }
            _ => {}
        }

        pass.set_pipeline(pipeline);
        if state.textured {
            pass.set_bind_group(0, &self.textured_bind_group, &[]);
        }
        pass.set_push_constants(ShaderStages::FRAGMENT, 0, bytemuck::cast_slice(&[params]));
        pass.set_vertex_buffer(0, serial.slice(..));
        pass.draw(range.start * 3..range.end * 3, 0..1);
    }

    fn record_opaque_phases<'pass>(
        &'pass self,
        pass: &mut RenderPass<'pass>,
        buffers: &'pass DrawBuffers,
        prims: &DrawQueue,
        resolution_scale: u32,
        dither: bool,
    ) {
        if let Some(opaque) = &buffers.opaque {
            let params = ShaderDrawParams::flat(resolution_scale, dither);
            pass.set_pipeline(&self.opaque_flat);
            pass.set_push_constants(ShaderStages::FRAGMENT, 0, bytemuck::cast_slice(&[params]));
            pass.set_vertex_buffer(0, opaque.slice(..));
            pass.draw(0..buffers.opaque_len, 0..1);
        }

        if let Some(textured) = &buffers.textured {
            pass.set_pipeline(&self.opaque_textured);
            pass.set_bind_group(0, &self.textured_bind_group, &[]);
            pass.set_vertex_buffer(0, textured.slice(..));
            for (surface, range) in &buffers.textured_ranges {
                let params = ShaderDrawParams::textured(
                    &prims.surfaces[*surface as usize],
                    resolution_scale,
                    dither,
                );
                pass.set_push_constants(
                    ShaderStages::FRAGMENT,
                    0,
                    bytemuck::cast_slice(&[params]),
                );
                pass.draw(range.clone(), 0..1);
            }
        }

        if let Some(st_opaque) = &buffers.st_opaque {
            pass.set_pipeline(&self.st_opaque_textured);
            pass.set_bind_group(0, &self.textured_bind_group, &[]);
            pass.set_vertex_buffer(0, st_opaque.slice(..));
            for (surface, range) in &buffers.st_opaque_ranges {
                let params = ShaderDrawParams::textured(
                    &prims.surfaces[*surface as usize],
                    resolution_scale,
                    dither,
                );
                pass.set_push_constants(
                    ShaderStages::FRAGMENT,
                    0,
                    bytemuck::cast_slice(&[params]),
                );
                pass.draw(range.clone(), 0..1);
            }
        }
    }
}

fn storage_texture_entry(
    binding: u32,
    format: TextureFormat,
    access: StorageTextureAccess,
) -> BindGroupLayoutEntry {
    BindGroupLayoutEntry {
        binding,
        visibility: ShaderStages::FRAGMENT,
        ty: BindingType::StorageTexture {
            access,
            format,
            view_dimension: TextureViewDimension::D2,
        },
        count: None,
    }
}

fn vertex_buffer(device: &Device, label: &str, vertices: &[BufferVertex]) -> Option<Buffer> {
    if vertices.is_empty() {
        return None;
    }

    Some(device.create_buffer_init(&BufferInitDescriptor {
        label: Some(label),
        contents: bytemuck::cast_slice(vertices),
        usage: BufferUsages::VERTEX,
    }))
}

// Concatenates per-surface buckets, reversing each so later primitives draw
// first under the LESS depth test.
fn concat_reversed(buckets: &[Vec<BufferVertex>]) -> (Vec<BufferVertex>, Vec<(u32, Range<u32>)>) {
    let mut vertices = Vec::new();
    let mut ranges = Vec::new();

    for (surface, bucket) in buckets.iter().enumerate() {
        if bucket.is_empty() {
            continue;
        }

        let start = vertices.len() as u32;
        vertices.extend(bucket.iter().rev().copied());
        ranges.push((surface as u32, start..vertices.len() as u32));
    }

    (vertices, ranges)
}

fn begin_attachment_pass<'enc>(
    encoder: &'enc mut CommandEncoder,
    pass_state: &RenderPassState,
    targets: &'enc PassTargets,
    first: bool,
) -> RenderPass<'enc> {
    let color_load = if first && pass_state.clean_clear {
        LoadOp::Clear(clear_color(pass_state.clear_color))
    } else {
        LoadOp::Load
    };
    let depth_load = if first { LoadOp::Clear(1.0) } else { LoadOp::Load };

    encoder.begin_render_pass(&RenderPassDescriptor {
        label: "draw_render_pass".into(),
        color_attachments: &[Some(RenderPassColorAttachment {
            view: &targets.scaled,
            resolve_target: None,
            ops: Operations { load: color_load, store: wgpu::StoreOp::Store },
        })],
        depth_stencil_attachment: Some(RenderPassDepthStencilAttachment {
            view: &targets.depth,
            depth_ops: Some(Operations { load: depth_load, store: wgpu::StoreOp::Store }),
            stencil_ops: None,
        }),
        ..RenderPassDescriptor::default()
    })
}

fn begin_feedback_pass<'enc>(
    encoder: &'enc mut CommandEncoder,
    targets: &'enc PassTargets,
) -> RenderPass<'enc> {
    encoder.begin_render_pass(&RenderPassDescriptor {
        label: "feedback_render_pass".into(),
        color_attachments: &[Some(RenderPassColorAttachment {
            view: &targets.feedback,
            resolve_target: None,
            ops: Operations { load: LoadOp::Load, store: wgpu::StoreOp::Store },
        })],
        depth_stencil_attachment: Some(RenderPassDepthStencilAttachment {
            view: &targets.depth,
            depth_ops: Some(Operations { load: LoadOp::Load, store: wgpu::StoreOp::Store }),
            stencil_ops: None,
        }),
        ..RenderPassDescriptor::default()
    })
}

fn set_scissor(pass: &mut RenderPass<'_>, pass_state: &RenderPassState, resolution_scale: u32) {
    let rect = pass_state.rect;
    pass.set_scissor_rect(
        resolution_scale * rect.x,
        resolution_scale * rect.y,
        resolution_scale * rect.width,
        resolution_scale * rect.height,
    );
}

fn clear_color(color: u16) -> Color {
    let rgba = psx_color_to_rgba8(color);
    Color {
        r: f64::from(rgba & 0xFF) / 255.0,
        g: f64::from((rgba >> 8) & 0xFF) / 255.0,
        b: f64::from((rgba >> 16) & 0xFF) / 255.0,
        a: f64::from((rgba >> 24) & 0xFF) / 255.0,
    }
}
