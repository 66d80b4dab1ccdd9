//! Block resolves between the native and upscaled stores.
//!
//! Resolves queue up per 8x8 block and flush in chunks of up to 1024 rects
//! pushed through a uniform array, one workgroup layer per rect. They are
//! recorded ahead of any barrier targeting compute and before a render pass
//! begins, never inside one.

use super::draw::PassTargets;
use crate::atlas::Domain;
use crate::{BLOCK_HEIGHT, BLOCK_WIDTH};
use bytemuck::{Pod, Zeroable};
use std::mem;
use wgpu::util::{BufferInitDescriptor, DeviceExt};
use wgpu::{
    BindGroup, BindGroupDescriptor, BindGroupEntry, BindGroupLayout, BindGroupLayoutDescriptor,
    BindGroupLayoutEntry, BindingResource, BindingType, BufferBindingType, BufferUsages,
    CommandEncoder, ComputePassDescriptor, ComputePipeline, ComputePipelineDescriptor, Device,
    PipelineCompilationOptions, PipelineLayoutDescriptor, PushConstantRange, ShaderStages,
    StorageTextureAccess, TextureFormat, TextureViewDimension,
};

const MAX_RECTS_PER_DISPATCH: usize = 1024;

#[repr(C)]
#[derive(Debug, Clone, Copy, Zeroable, Pod)]
struct ShaderResolveParams {
    scale: u32,
}

pub struct ResolvePipelines {
    scaled_queue: Vec<[u32; 4]>,
    unscaled_queue: Vec<[u32; 4]>,
    rect_bind_group_layout: BindGroupLayout,
    to_scaled_pipeline: ComputePipeline,
    to_scaled_bind_group: BindGroup,
    to_unscaled_pipeline: ComputePipeline,
    to_unscaled_bind_group: BindGroup,
}

impl ResolvePipelines {
    pub fn new(device: &Device, targets: &PassTargets) -> Self {
        let rect_bind_group_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: "resolve_rect_bind_group_layout".into(),
            entries: &[BindGroupLayoutEntry {
                binding: 0,
                visibility: ShaderStages::COMPUTE,
                ty: BindingType::Buffer {
                    ty: BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let texture_entry = |binding, format, access| BindGroupLayoutEntry {
            binding,
            visibility: ShaderStages::COMPUTE,
            ty: BindingType::StorageTexture {
                access,
                format,
                view_dimension: TextureViewDimension::D2,
            },
            count: None,
        };

        let to_scaled_bind_group_layout =
            device.create_bind_group_layout(&BindGroupLayoutDescriptor {
                label: "resolve_to_scaled_bind_group_layout".into(),
                entries: &[
                    texture_entry(0, TextureFormat::R32Uint, StorageTextureAccess::ReadOnly),
                    texture_entry(1, TextureFormat::Rgba8Unorm, StorageTextureAccess::WriteOnly),
                ],
            });

        let to_scaled_bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: "resolve_to_scaled_bind_group".into(),
            layout: &to_scaled_bind_group_layout,
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: BindingResource::TextureView(&targets.native),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: BindingResource::TextureView(&targets.scaled),
                },
            ],
        });

        let to_unscaled_bind_group_layout =
            device.create_bind_group_layout(&BindGroupLayoutDescriptor {
                label: "resolve_to_unscaled_bind_group_layout".into(),
                entries: &[
                    texture_entry(0, TextureFormat::Rgba8Unorm, StorageTextureAccess::ReadOnly),
                    texture_entry(1, TextureFormat::R32Uint, StorageTextureAccess::WriteOnly),
                ],
            });

        let to_unscaled_bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: "resolve_to_unscaled_bind_group".into(),
            layout: &to_unscaled_bind_group_layout,
            entries: &[
                BindGroupEntry {
                    binding: 0,
                    resource: BindingResource::TextureView(&targets.scaled),
                },
                BindGroupEntry {
                    binding: 1,
                    resource: BindingResource::TextureView(&targets.native),
                },
            ],
        });

        let push_constant_range = PushConstantRange {
            stages: ShaderStages::COMPUTE,
            range: 0..mem::size_of::<ShaderResolveParams>() as u32,
        };

        let to_scaled_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: "resolve_to_scaled_pipeline_layout".into(),
            bind_group_layouts: &[&to_scaled_bind_group_layout, &rect_bind_group_layout],
            push_constant_ranges: &[push_constant_range.clone()],
        });

        let to_unscaled_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: "resolve_to_unscaled_pipeline_layout".into(),
            bind_group_layouts: &[&to_unscaled_bind_group_layout, &rect_bind_group_layout],
            push_constant_ranges: &[push_constant_range],
        });

        let to_scaled_shader =
            device.create_shader_module(wgpu::include_wgsl!("../shaders/resolve_scaled.wgsl"));
        let to_scaled_pipeline = device.create_compute_pipeline(&ComputePipelineDescriptor {
            label: "resolve_to_scaled_pipeline".into(),
            layout: Some(&to_scaled_layout),
            module: &to_scaled_shader,
            entry_point: "resolve_to_scaled",
            compilation_options: PipelineCompilationOptions::default(),
        });

        let to_unscaled_shader =
            device.create_shader_module(wgpu::include_wgsl!("../shaders/resolve_unscaled.wgsl"));
        let to_unscaled_pipeline = device.create_compute_pipeline(&ComputePipelineDescriptor {
            label: "resolve_to_unscaled_pipeline".into(),
            layout: Some(&to_unscaled_layout),
            module: &to_unscaled_shader,
            entry_point: "resolve_to_unscaled",
            compilation_options: PipelineCompilationOptions::default(),
        });

        Self {
            scaled_queue: Vec::new(),
            unscaled_queue: Vec::new(),
            rect_bind_group_layout,
            to_scaled_pipeline,
            to_scaled_bind_group,
            to_unscaled_pipeline,
            to_unscaled_bind_group,
        }
    }

    pub fn queue_block(&mut self, domain: Domain, block_x: u32, block_y: u32) {
        let rect = [block_x * BLOCK_WIDTH, block_y * BLOCK_HEIGHT, BLOCK_WIDTH, BLOCK_HEIGHT];
        match domain {
            Domain::Scaled => self.scaled_queue.push(rect),
            Domain::Unscaled => self.unscaled_queue.push(rect),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scaled_queue.is_empty() && self.unscaled_queue.is_empty()
    }

    pub fn flush(&mut self, device: &Device, encoder: &mut CommandEncoder, resolution_scale: u32) {
        if self.is_empty() {
            return;
        }

        log::debug!(
            "Flushing resolves: {} to scaled, {} to unscaled",
            self.scaled_queue.len(),
            self.unscaled_queue.len(),
        );

        let params = ShaderResolveParams { scale: resolution_scale };

        let scaled_bind_groups: Vec<BindGroup> = self
            .scaled_queue
            .chunks(MAX_RECTS_PER_DISPATCH)
            .map(|chunk| rect_bind_group(device, &self.rect_bind_group_layout, chunk))
            .collect();
        let unscaled_bind_groups: Vec<BindGroup> = self
            .unscaled_queue
            .chunks(MAX_RECTS_PER_DISPATCH)
            .map(|chunk| rect_bind_group(device, &self.rect_bind_group_layout, chunk))
            .collect();

        let mut compute_pass = encoder.begin_compute_pass(&ComputePassDescriptor {
            label: "resolve_compute_pass".into(),
            timestamp_writes: None,
        });

        for (chunk, bind_group) in self.scaled_queue.chunks(MAX_RECTS_PER_DISPATCH).zip(&scaled_bind_groups) {
            compute_pass.set_pipeline(&self.to_scaled_pipeline);
            compute_pass.set_bind_group(0, &self.to_scaled_bind_group, &[]);
            compute_pass.set_bind_group(1, bind_group, &[]);
            compute_pass.set_push_constants(0, bytemuck::cast_slice(&[params]));
            compute_pass.dispatch_workgroups(resolution_scale, resolution_scale, chunk.len() as u32);
        }

        for (chunk, bind_group) in self.unscaled_queue.chunks(MAX_RECTS_PER_DISPATCH).zip(&unscaled_bind_groups) {
            compute_pass.set_pipeline(&self.to_unscaled_pipeline);
            compute_pass.set_bind_group(0, &self.to_unscaled_bind_group, &[]);
            compute_pass.set_bind_group(1, bind_group, &[]);
            compute_pass.set_push_constants(0, bytemuck::cast_slice(&[params]));
            compute_pass.dispatch_workgroups(1, 1, chunk.len() as u32);
        }

        drop(compute_pass);

        self.scaled_queue.clear();
        self.unscaled_queue.clear();
    }
}

// The shader declares a fixed 1024-rect array, so the binding is padded out.
fn rect_bind_group(
    device: &Device,
    layout: &BindGroupLayout,
    chunk: &[[u32; 4]],
) -> BindGroup {
    let mut rects = [[0_u32; 4]; MAX_RECTS_PER_DISPATCH];
    rects[..chunk.len()].copy_from_slice(chunk);

    let buffer = device.create_buffer_init(&BufferInitDescriptor {
        label: "resolve_rect_buffer".into(),
        contents: bytemuck::cast_slice(&rects),
        usage: BufferUsages::UNIFORM,
    });

    device.create_bind_group(&BindGroupDescriptor {
        label: "resolve_rect_bind_group".into(),
        layout,
        entries: &[BindGroupEntry { binding: 0, resource: buffer.as_entire_binding() }],
    })
}
