//! CPU-to-VRAM uploads, VRAM-to-VRAM copies, and VRAM readback.

use crate::atlas::{Domain, Rect};
use crate::{VRAM_HEIGHT, VRAM_WIDTH};
use bytemuck::{Pod, Zeroable};
use std::mem;
use wgpu::util::{BufferInitDescriptor, DeviceExt};
use wgpu::{
    BindGroup, BindGroupDescriptor, BindGroupEntry, BindGroupLayout, BindGroupLayoutDescriptor,
    BindGroupLayoutEntry, BindingResource, BindingType, Buffer, BufferBindingType,
    BufferDescriptor, BufferUsages, CommandEncoder, ComputePassDescriptor, ComputePipeline,
    ComputePipelineDescriptor, Device, Extent3d, ImageCopyBuffer, ImageCopyTexture,
    ImageDataLayout, Maintain, MapMode, Origin3d, PipelineCompilationOptions,
    PipelineLayoutDescriptor, PushConstantRange, ShaderStages, StorageTextureAccess, Texture,
    TextureAspect, TextureFormat, TextureViewDescriptor, TextureViewDimension,
};

// Must match X/Y workgroup size in the blit shaders
const WORKGROUP_SIZE: u32 = 8;

// Must match CpuVramBlitArgs in cpuvramblit.wgsl
#[repr(C)]
#[derive(Debug, Clone, Copy, Zeroable, Pod)]
struct ShaderCpuVramBlitArgs {
    position: [u32; 2],
    size: [u32; 2],
    force_mask_bit: u32,
    check_mask_bit: u32,
}

// Must match VramBlitArgs in the vramblit shaders
#[repr(C)]
#[derive(Debug, Clone, Copy, Zeroable, Pod)]
struct ShaderVramBlitArgs {
    source: [u32; 2],
    dest: [u32; 2],
    size: [u32; 2],
    force_mask_bit: u32,
    check_mask_bit: u32,
}

pub struct BlitPipelines {
    ram_buffer: Vec<u32>,
    cpu_bind_group_layout_1: BindGroupLayout,
    cpu_pipeline: ComputePipeline,
    // Also serves as bind group 0 of the CPU blit (same layout, native store)
    native_bind_group: BindGroup,
    native_pipeline: ComputePipeline,
    scaled_bind_group: BindGroup,
    scaled_pipeline: ComputePipeline,
}

impl BlitPipelines {
    pub fn new(device: &Device, native_vram: &Texture, scaled_vram: &Texture) -> Self {
        let native_vram_view = native_vram.create_view(&TextureViewDescriptor::default());
        let scaled_vram_view = scaled_vram.create_view(&TextureViewDescriptor::default());

        let storage_texture_layout = |label: &str, format| {
            device.create_bind_group_layout(&BindGroupLayoutDescriptor {
                label: Some(label),
                entries: &[BindGroupLayoutEntry {
                    binding: 0,
                    visibility: ShaderStages::COMPUTE,
                    ty: BindingType::StorageTexture {
                        access: StorageTextureAccess::ReadWrite,
                        format,
                        view_dimension: TextureViewDimension::D2,
                    },
                    count: None,
                }],
            })
        };

        let native_bind_group_layout =
            storage_texture_layout("blit_native_bind_group_layout", TextureFormat::R32Uint);
        let scaled_bind_group_layout =
            storage_texture_layout("blit_scaled_bind_group_layout", TextureFormat::Rgba8Unorm);

        let native_bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: "blit_native_bind_group".into(),
            layout: &native_bind_group_layout,
            entries: &[BindGroupEntry {
                binding: 0,
                resource: BindingResource::TextureView(&native_vram_view),
            }],
        });

        let scaled_bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: "blit_scaled_bind_group".into(),
            layout: &scaled_bind_group_layout,
            entries: &[BindGroupEntry {
                binding: 0,
                resource: BindingResource::TextureView(&scaled_vram_view),
            }],
        });

        let cpu_bind_group_layout_1 = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: "cpu_vram_blit_bind_group_layout_1".into(),
            entries: &[BindGroupLayoutEntry {
                binding: 0,
                visibility: ShaderStages::COMPUTE,
                ty: BindingType::Buffer {
                    ty: BufferBindingType::Storage { read_only: true },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let cpu_pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: "cpu_vram_blit_pipeline_layout".into(),
            bind_group_layouts: &[&native_bind_group_layout, &cpu_bind_group_layout_1],
            push_constant_ranges: &[PushConstantRange {
                stages: ShaderStages::COMPUTE,
                range: 0..mem::size_of::<ShaderCpuVramBlitArgs>() as u32,
            }],
        });

        let cpu_shader =
            device.create_shader_module(wgpu::include_wgsl!("../shaders/cpuvramblit.wgsl"));
        let cpu_pipeline = device.create_compute_pipeline(&ComputePipelineDescriptor {
            label: "cpu_vram_blit_pipeline".into(),
            layout: Some(&cpu_pipeline_layout),
            module: &cpu_shader,
            entry_point: "cpu_vram_blit",
            compilation_options: PipelineCompilationOptions::default(),
        });

        let vram_blit_push_constants = PushConstantRange {
            stages: ShaderStages::COMPUTE,
            range: 0..mem::size_of::<ShaderVramBlitArgs>() as u32,
        };

        let native_pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: "vram_blit_native_pipeline_layout".into(),
            bind_group_layouts: &[&native_bind_group_layout],
            push_constant_ranges: &[vram_blit_push_constants.clone()],
        });

        let native_shader =
            device.create_shader_module(wgpu::include_wgsl!("../shaders/vramblit_native.wgsl"));
        let native_pipeline = device.create_compute_pipeline(&ComputePipelineDescriptor {
            label: "vram_blit_native_pipeline".into(),
            layout: Some(&native_pipeline_layout),
            module: &native_shader,
            entry_point: "vram_blit",
            compilation_options: PipelineCompilationOptions::default(),
        });

        let scaled_pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: "vram_blit_scaled_pipeline_layout".into(),
            bind_group_layouts: &[&scaled_bind_group_layout],
            push_constant_ranges: &[vram_blit_push_constants],
        });

        let scaled_shader =
            device.create_shader_module(wgpu::include_wgsl!("../shaders/vramblit_scaled.wgsl"));
        let scaled_pipeline = device.create_compute_pipeline(&ComputePipelineDescriptor {
            label: "vram_blit_scaled_pipeline".into(),
            layout: Some(&scaled_pipeline_layout),
            module: &scaled_shader,
            entry_point: "vram_blit",
            compilation_options: PipelineCompilationOptions::default(),
        });

        Self {
            ram_buffer: Vec::with_capacity((VRAM_WIDTH * VRAM_HEIGHT) as usize),
            cpu_bind_group_layout_1,
            cpu_pipeline,
            native_bind_group,
            native_pipeline,
            scaled_bind_group,
            scaled_pipeline,
        }
    }

    pub fn cpu_to_vram(
        &mut self,
        device: &Device,
        encoder: &mut CommandEncoder,
        rect: Rect,
        data: &[u16],
        force_mask_bit: bool,
        check_mask_bit: bool,
    ) {
        let copy_len = (rect.width * rect.height) as usize;
        self.ram_buffer.clear();
        self.ram_buffer.extend(data.iter().copied().map(u32::from).take(copy_len));

        let buffer = device.create_buffer_init(&BufferInitDescriptor {
            label: "cpu_vram_blit_buffer".into(),
            contents: bytemuck::cast_slice(&self.ram_buffer),
            usage: BufferUsages::STORAGE,
        });

        let bind_group_1 = device.create_bind_group(&BindGroupDescriptor {
            label: "cpu_vram_blit_bind_group_1".into(),
            layout: &self.cpu_bind_group_layout_1,
            entries: &[BindGroupEntry { binding: 0, resource: buffer.as_entire_binding() }],
        });

        let args = ShaderCpuVramBlitArgs {
            position: [rect.x, rect.y],
            size: [rect.width, rect.height],
            force_mask_bit: force_mask_bit.into(),
            check_mask_bit: check_mask_bit.into(),
        };

        let mut compute_pass = encoder.begin_compute_pass(&ComputePassDescriptor {
            label: "cpu_vram_blit_compute_pass".into(),
            timestamp_writes: None,
        });
        compute_pass.set_pipeline(&self.cpu_pipeline);
        compute_pass.set_bind_group(0, &self.native_bind_group, &[]);
        compute_pass.set_bind_group(1, &bind_group_1, &[]);
        compute_pass.set_push_constants(0, bytemuck::cast_slice(&[args]));
        compute_pass.dispatch_workgroups(
            rect.width.div_ceil(WORKGROUP_SIZE),
            rect.height.div_ceil(WORKGROUP_SIZE),
            1,
        );
    }

    #[allow(clippy::too_many_arguments)]
    pub fn vram_to_vram(
        &self,
        encoder: &mut CommandEncoder,
        domain: Domain,
        dst: Rect,
        src: Rect,
        resolution_scale: u32,
        force_mask_bit: bool,
        check_mask_bit: bool,
    ) {
        let scale = match domain {
            Domain::Scaled => resolution_scale,
            Domain::Unscaled => 1,
        };

        let args = ShaderVramBlitArgs {
            source: [scale * src.x, scale * src.y],
            dest: [scale * dst.x, scale * dst.y],
            size: [scale * dst.width, scale * dst.height],
            force_mask_bit: force_mask_bit.into(),
            check_mask_bit: check_mask_bit.into(),
        };

        let (pipeline, bind_group) = match domain {
            Domain::Scaled => (&self.scaled_pipeline, &self.scaled_bind_group),
            Domain::Unscaled => (&self.native_pipeline, &self.native_bind_group),
        };

        let mut compute_pass = encoder.begin_compute_pass(&ComputePassDescriptor {
            label: "vram_blit_compute_pass".into(),
            timestamp_writes: None,
        });
        compute_pass.set_pipeline(pipeline);
        compute_pass.set_bind_group(0, bind_group, &[]);
        compute_pass.set_push_constants(0, bytemuck::cast_slice(&[args]));
        compute_pass.dispatch_workgroups(
            (scale * dst.width).div_ceil(WORKGROUP_SIZE),
            (scale * dst.height).div_ceil(WORKGROUP_SIZE),
            1,
        );
    }

    /// Records a copy of the native store into a mappable buffer. The caller
    /// submits, then finishes with [`complete_vram_readback`].
    pub fn stage_vram_readback(
        &self,
        device: &Device,
        encoder: &mut CommandEncoder,
        native_vram: &Texture,
    ) -> Buffer {
        let buffer = device.create_buffer(&BufferDescriptor {
            label: "vram_readback_buffer".into(),
            size: u64::from(VRAM_WIDTH * VRAM_HEIGHT) * mem::size_of::<u32>() as u64,
            usage: BufferUsages::COPY_DST | BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        encoder.copy_texture_to_buffer(
            ImageCopyTexture {
                texture: native_vram,
                mip_level: 0,
                origin: Origin3d::ZERO,
                aspect: TextureAspect::All,
            },
            ImageCopyBuffer {
                buffer: &buffer,
                layout: ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(VRAM_WIDTH * mem::size_of::<u32>() as u32),
                    rows_per_image: None,
                },
            },
            Extent3d { width: VRAM_WIDTH, height: VRAM_HEIGHT, depth_or_array_layers: 1 },
        );

        buffer
    }
}

/// Blocks until the staged readback completes and converts it to 16bpp.
pub fn complete_vram_readback(device: &Device, buffer: &Buffer) -> Vec<u16> {
    let slice = buffer.slice(..);
    slice.map_async(MapMode::Read, |result| {
        result.expect("failed to map VRAM readback buffer");
    });
    device.poll(Maintain::Wait);

    let data = slice.get_mapped_range();
    let words: &[u32] = bytemuck::cast_slice(&data);
    let texels = words.iter().map(|&word| word as u16).collect();
    drop(data);
    buffer.unmap();

    texels
}
