//! Client-facing renderer facade and its wgpu backend.
//!
//! The facade owns the VRAM atlas and a [`GpuCore`]; every operation runs its
//! hazard bookkeeping through the atlas, which calls back into the core to
//! queue resolves, record barriers (pass splits) and emit batched render
//! passes.

mod blit;
mod draw;
mod resolve;
mod scanout;

use crate::atlas::{
    Domain, HazardListener, Rect, RenderPassState, StatusFlags, TextureMode, VramAtlas,
};
use crate::barrier::translate_hazard;
use crate::queue::{
    psx_color_to_rgba8, BufferVertex, DrawQueue, PrimitiveClass, SemiTransparentMode, Surface,
};
use crate::{VRAM_HEIGHT, VRAM_WIDTH};
use blit::BlitPipelines;
use draw::{DrawPipelines, PassTargets};
use resolve::ResolvePipelines;
use scanout::ScanoutPipeline;
use std::array;
use std::rc::Rc;
use wgpu::{
    CommandBuffer, CommandEncoder, CommandEncoderDescriptor, Device, Extent3d, ImageCopyTexture,
    Origin3d, Queue, Texture, TextureAspect, TextureDescriptor, TextureDimension, TextureFormat,
    TextureUsages, TextureView, TextureViewDescriptor,
};

/// Vertex as submitted by the command stream: VRAM-space position with the
/// perspective w, packed RGB color and page-relative texel coords.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vertex {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub color: u32,
    pub u: u8,
    pub v: u8,
}

/// Texture repeat window in 8-texel units, as the GPU registers encode it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TextureWindow {
    pub x_mask: u8,
    pub y_mask: u8,
    pub x_offset: u8,
    pub y_offset: u8,
}

impl TextureWindow {
    // The window registers are 5 bits each.
    fn mask_texels(self) -> (u32, u32) {
        (u32::from(self.x_mask & 0x1F) << 3, u32::from(self.y_mask & 0x1F) << 3)
    }

    fn offset_texels(self) -> (u32, u32) {
        (
            (u32::from(self.x_offset) & u32::from(self.x_mask & 0x1F)) << 3,
            (u32::from(self.y_offset) & u32::from(self.y_mask & 0x1F)) << 3,
        )
    }

    /// Conservative page-relative rect of texels the window can address.
    fn sampled_rect(self) -> Rect {
        let (mask_x, mask_y) = self.mask_texels();
        let (off_x, off_y) = self.offset_texels();
        Rect::new(off_x, off_y, 256 - mask_x, 256 - mask_y)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct RenderState {
    draw_offset: (i32, i32),
    texture_window: TextureWindow,
    texture_mode: TextureMode,
    semi_transparency: SemiTransparentMode,
    dither: bool,
    mask_test: bool,
    force_mask_bit: bool,
    texture_color_modulate: bool,
}

/// Texture binding state mirrored into the GPU core so `upload_texture`
/// callbacks can intern a complete surface descriptor.
#[derive(Debug, Clone, Copy, Default)]
struct TexState {
    texpage: (u32, u32),
    clut: (u32, u32),
    mode: TextureMode,
    window_mask: (u32, u32),
    window_offset: (u32, u32),
}

pub struct Renderer {
    atlas: VramAtlas,
    gpu: GpuCore,
    state: RenderState,
}

impl Renderer {
    /// `resolution_scale` is the integer upscale factor of the color store.
    ///
    /// # Panics
    ///
    /// Panics if `resolution_scale` is not 1, 2, 4 or 8.
    #[must_use]
    pub fn new(
        device: Rc<Device>,
        queue: Rc<Queue>,
        resolution_scale: u32,
        scanout_format: TextureFormat,
    ) -> Self {
        assert!(
            matches!(resolution_scale, 1 | 2 | 4 | 8),
            "unsupported resolution scale {resolution_scale}"
        );
        log::info!("Creating hardware renderer with resolution scale {resolution_scale}");

        Self {
            atlas: VramAtlas::new(),
            gpu: GpuCore::new(device, queue, resolution_scale, scanout_format),
            state: RenderState::default(),
        }
    }

    pub fn set_draw_rect(&mut self, rect: Rect) {
        self.atlas.set_draw_rect(rect, &mut self.gpu);
    }

    pub fn set_draw_offset(&mut self, x: i32, y: i32) {
        self.state.draw_offset = (x, y);
    }

    pub fn set_texture_window(&mut self, window: TextureWindow) {
        self.state.texture_window = window;
        self.atlas.set_texture_window(window.sampled_rect());
        self.gpu.tex_state.window_mask = window.mask_texels();
        self.gpu.tex_state.window_offset = window.offset_texels();
    }

    pub fn set_texture_offset(&mut self, x: u32, y: u32) {
        self.atlas.set_texture_offset(x, y);
        self.gpu.tex_state.texpage = (x, y);
    }

    pub fn set_palette_offset(&mut self, x: u32, y: u32) {
        self.atlas.set_palette_offset(x, y);
        self.gpu.tex_state.clut = (x, y);
    }

    pub fn set_texture_mode(&mut self, mode: TextureMode) {
        self.state.texture_mode = mode;
        self.atlas.set_texture_mode(mode);
        self.gpu.tex_state.mode = mode;
    }

    pub fn set_semi_transparent(&mut self, mode: SemiTransparentMode) {
        self.state.semi_transparency = mode;
    }

    pub fn set_dither(&mut self, enabled: bool) {
        self.state.dither = enabled;
        self.gpu.dither = enabled;
    }

    pub fn set_mask_test(&mut self, enabled: bool) {
        self.state.mask_test = enabled;
    }

    pub fn set_force_mask_bit(&mut self, enabled: bool) {
        self.state.force_mask_bit = enabled;
    }

    pub fn set_texture_color_modulate(&mut self, enabled: bool) {
        self.state.texture_color_modulate = enabled;
    }

    pub fn clear_rect(&mut self, rect: Rect, color: u16) {
        self.atlas.clear_rect(rect, color, &mut self.gpu);
    }

    pub fn draw_triangle(&mut self, vertices: &[Vertex; 3]) {
        if self.atlas.draw_rect().is_empty() {
            return;
        }

        self.atlas.write_fragment(&mut self.gpu);
        let z = self.gpu.prims.allocate_depth();
        let class = self.primitive_class();
        let built = array::from_fn(|i| self.build_vertex(vertices[i], z, class.textured));
        self.gpu.prims.push_triangle(class, built);
    }

    pub fn draw_quad(&mut self, vertices: &[Vertex; 4]) {
        if self.atlas.draw_rect().is_empty() {
            return;
        }

        self.atlas.write_fragment(&mut self.gpu);
        let z = self.gpu.prims.allocate_depth();
        let class = self.primitive_class();
        let built = array::from_fn(|i| self.build_vertex(vertices[i], z, class.textured));
        self.gpu.prims.push_quad(class, built);
    }

    /// Lines render as one-pixel-wide quads along their dominant axis, always
    /// untextured, through the same depth-ordering machinery as polygons.
    pub fn draw_line(&mut self, vertices: &[Vertex; 2]) {
        if self.atlas.draw_rect().is_empty() {
            return;
        }

        let saved = self.atlas.set_texture_mode(TextureMode::None);
        self.atlas.write_fragment(&mut self.gpu);
        self.atlas.set_texture_mode(saved);

        let z = self.gpu.prims.allocate_depth();
        let class = PrimitiveClass {
            textured: false,
            semi_transparency: self.state.semi_transparency,
            mask_test: self.state.mask_test,
        };
        let positions = expand_line(vertices[0], vertices[1]);
        let colors =
            [vertices[0].color, vertices[0].color, vertices[1].color, vertices[1].color];
        let built = array::from_fn(|i| {
            self.build_vertex(
                Vertex {
                    x: positions[i][0],
                    y: positions[i][1],
                    w: 1.0,
                    color: colors[i],
                    u: 0,
                    v: 0,
                },
                z,
                false,
            )
        });
        self.gpu.prims.push_quad(class, built);
    }

    /// Uploads a 16bpp payload into the native store through the mask-aware
    /// compute path.
    ///
    /// # Panics
    ///
    /// Panics if `data` holds fewer than `rect.width * rect.height` texels.
    pub fn copy_cpu_to_vram(&mut self, rect: Rect, data: &[u16]) {
        if rect.is_empty() {
            return;
        }
        assert!(
            data.len() >= (rect.width * rect.height) as usize,
            "CPU blit payload too small: {} texels for {}x{}",
            data.len(),
            rect.width,
            rect.height,
        );

        self.atlas.write_compute(Domain::Unscaled, rect, &mut self.gpu);

        let mut encoder = self.gpu.take_encoder();
        self.gpu.blit.cpu_to_vram(
            &self.gpu.device,
            &mut encoder,
            rect,
            data,
            self.state.force_mask_bit,
            self.state.mask_test,
        );
        self.gpu.encoder = Some(encoder);
    }

    /// VRAM-to-VRAM copy in whichever store the atlas deems cheaper.
    ///
    /// # Panics
    ///
    /// Panics if the source and destination sizes differ.
    pub fn blit_vram(&mut self, dst: Rect, src: Rect) {
        if dst.is_empty() {
            return;
        }
        assert_eq!(dst.width, src.width, "blit width mismatch");
        assert_eq!(dst.height, src.height, "blit height mismatch");

        let domain = self.atlas.blit_vram(dst, src, &mut self.gpu);

        let mut encoder = self.gpu.take_encoder();
        self.gpu.blit.vram_to_vram(
            &mut encoder,
            domain,
            dst,
            src,
            self.gpu.resolution_scale,
            self.state.force_mask_bit,
            self.state.mask_test,
        );
        self.gpu.encoder = Some(encoder);
    }

    /// Samples the upscaled store over `rect` into `target` with linear
    /// filtering, then submits all recorded GPU work.
    pub fn scanout(&mut self, rect: Rect, target: &TextureView) {
        if rect.is_empty() {
            return;
        }

        self.atlas.read_fragment(rect, &mut self.gpu);

        let mut encoder = self.gpu.take_encoder();
        self.gpu.resolve.flush(&self.gpu.device, &mut encoder, self.gpu.resolution_scale);
        self.gpu.scanout.record(&self.gpu.device, &mut encoder, rect, target);
        self.gpu.encoder = Some(encoder);

        self.gpu.submit();
    }

    /// Reads the native store back to the CPU. Flushes and submits everything
    /// recorded so far.
    pub fn read_vram(&mut self) -> Vec<u16> {
        self.atlas.read_transfer(Domain::Unscaled, Rect::VRAM, &mut self.gpu);

        let mut encoder = self.gpu.take_encoder();
        self.gpu.resolve.flush(&self.gpu.device, &mut encoder, self.gpu.resolution_scale);
        let buffer =
            self.gpu.blit.stage_vram_readback(&self.gpu.device, &mut encoder, &self.gpu.native_vram);
        self.gpu.encoder = Some(encoder);
        self.gpu.submit();

        blit::complete_vram_readback(&self.gpu.device, &buffer)
    }

    /// Submits all outstanding GPU work without presenting anything.
    pub fn flush(&mut self) {
        self.atlas.flush_render_pass(&mut self.gpu);
        self.gpu.submit();
    }

    fn primitive_class(&self) -> PrimitiveClass {
        PrimitiveClass {
            textured: self.state.texture_mode != TextureMode::None,
            semi_transparency: self.state.semi_transparency,
            mask_test: self.state.mask_test,
        }
    }

    fn build_vertex(&self, vertex: Vertex, z: f32, textured: bool) -> BufferVertex {
        let mut color = vertex.color & 0x00FF_FFFF;
        if textured && !self.state.texture_color_modulate {
            // Neutral modulation: texel * 0x80 / 0x80.
            color = 0x0080_8080;
        }
        if self.state.force_mask_bit {
            color |= 0xFF00_0000;
        }

        let (off_x, off_y) = self.state.draw_offset;
        BufferVertex {
            position: [vertex.x + off_x as f32, vertex.y + off_y as f32, z, vertex.w],
            uv: [f32::from(vertex.u), f32::from(vertex.v), 0.0],
            color,
        }
    }
}

fn expand_line(v0: Vertex, v1: Vertex) -> [[f32; 2]; 4] {
    let dx = v1.x - v0.x;
    let dy = v1.y - v0.y;

    if dx == 0.0 || dx.abs() <= dy.abs() {
        // Vertically oriented
        if v0.y <= v1.y {
            [
                [v0.x, v0.y],
                [v0.x + 1.0, v0.y],
                [v1.x, v1.y + 1.0],
                [v1.x + 1.0, v1.y + 1.0],
            ]
        } else {
            [
                [v0.x, v0.y + 1.0],
                [v0.x + 1.0, v0.y + 1.0],
                [v1.x, v1.y],
                [v1.x + 1.0, v1.y],
            ]
        }
    } else if v0.x <= v1.x {
        [
            [v0.x, v0.y],
            [v0.x, v0.y + 1.0],
            [v1.x + 1.0, v1.y],
            [v1.x + 1.0, v1.y + 1.0],
        ]
    } else {
        [
            [v0.x + 1.0, v0.y],
            [v0.x + 1.0, v0.y + 1.0],
            [v1.x, v1.y],
            [v1.x, v1.y + 1.0],
        ]
    }
}

/// The wgpu half of the renderer: images, pipelines, the draw queue, and the
/// command recorder. Implements the atlas callbacks.
struct GpuCore {
    device: Rc<Device>,
    gpu_queue: Rc<Queue>,
    resolution_scale: u32,
    native_vram: Texture,
    scaled_vram: Texture,
    scaled_vram_copy: Texture,
    targets: PassTargets,
    draw: DrawPipelines,
    resolve: ResolvePipelines,
    blit: BlitPipelines,
    scanout: ScanoutPipeline,
    prims: DrawQueue,
    tex_state: TexState,
    dither: bool,
    needs_scaled_copy: bool,
    encoder: Option<CommandEncoder>,
    command_buffers: Vec<CommandBuffer>,
}

impl GpuCore {
    fn new(
        device: Rc<Device>,
        gpu_queue: Rc<Queue>,
        resolution_scale: u32,
        scanout_format: TextureFormat,
    ) -> Self {
        let native_vram = device.create_texture(&TextureDescriptor {
            label: "native_vram_texture".into(),
            size: Extent3d { width: VRAM_WIDTH, height: VRAM_HEIGHT, depth_or_array_layers: 1 },
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            // R32 because storage textures don't support R16
            format: TextureFormat::R32Uint,
            usage: TextureUsages::COPY_SRC
                | TextureUsages::COPY_DST
                | TextureUsages::TEXTURE_BINDING
                | TextureUsages::STORAGE_BINDING,
            view_formats: &[],
        });

        let scaled_size = Extent3d {
            width: resolution_scale * VRAM_WIDTH,
            height: resolution_scale * VRAM_HEIGHT,
            depth_or_array_layers: 1,
        };

        let scaled_vram = device.create_texture(&TextureDescriptor {
            label: "scaled_vram_texture".into(),
            size: scaled_size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format: TextureFormat::Rgba8Unorm,
            usage: TextureUsages::COPY_SRC
                | TextureUsages::TEXTURE_BINDING
                | TextureUsages::STORAGE_BINDING
                | TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });

        let scaled_vram_copy = device.create_texture(&TextureDescriptor {
            label: "scaled_vram_copy_texture".into(),
            size: scaled_size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format: TextureFormat::Rgba8Unorm,
            usage: TextureUsages::COPY_DST | TextureUsages::STORAGE_BINDING,
            view_formats: &[],
        });

        let depth = device.create_texture(&TextureDescriptor {
            label: "draw_depth_texture".into(),
            size: scaled_size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format: TextureFormat::Depth32Float,
            usage: TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });

        // The programmable-blend passes write through a storage binding; this
        // target only exists because a pass needs a color attachment.
        let feedback_dummy = device.create_texture(&TextureDescriptor {
            label: "feedback_dummy_texture".into(),
            size: scaled_size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format: TextureFormat::Rgba8Unorm,
            usage: TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });

        let targets = PassTargets {
            scaled: scaled_vram.create_view(&TextureViewDescriptor::default()),
            depth: depth.create_view(&TextureViewDescriptor::default()),
            feedback: feedback_dummy.create_view(&TextureViewDescriptor::default()),
            native: native_vram.create_view(&TextureViewDescriptor::default()),
            scaled_copy: scaled_vram_copy.create_view(&TextureViewDescriptor::default()),
        };

        let draw = DrawPipelines::new(&device, &targets);
        let resolve = ResolvePipelines::new(&device, &targets);
        let blit = BlitPipelines::new(&device, &native_vram, &scaled_vram);
        let scanout = ScanoutPipeline::new(&device, &scaled_vram, scanout_format);

        Self {
            device,
            gpu_queue,
            resolution_scale,
            native_vram,
            scaled_vram,
            scaled_vram_copy,
            targets,
            draw,
            resolve,
            blit,
            scanout,
            prims: DrawQueue::new(),
            tex_state: TexState::default(),
            dither: false,
            needs_scaled_copy: false,
            encoder: None,
            command_buffers: Vec::with_capacity(64),
        }
    }

    fn take_encoder(&mut self) -> CommandEncoder {
        self.encoder.take().unwrap_or_else(|| {
            self.device.create_command_encoder(&CommandEncoderDescriptor::default())
        })
    }

    fn submit(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.command_buffers.push(encoder.finish());
        }
        if !self.command_buffers.is_empty() {
            self.gpu_queue.submit(self.command_buffers.drain(..));
        }
    }
}

impl HazardListener for GpuCore {
    fn hazard(&mut self, flags: StatusFlags) {
        let barrier = translate_hazard(flags);
        log::debug!("Pipeline barrier: {barrier:?}");

        // Outstanding compute work must land in the recorder ahead of the
        // barrier. wgpu orders passes against each other, so recording the
        // pending dispatches and breaking the pass here is the barrier.
        if flags.intersects(StatusFlags::COMPUTE_ANY) {
            let mut encoder = self.take_encoder();
            self.resolve.flush(&self.device, &mut encoder, self.resolution_scale);
            self.encoder = Some(encoder);
        }
    }

    fn resolve(&mut self, domain: Domain, block_x: u32, block_y: u32) {
        self.resolve.queue_block(domain, block_x, block_y);
    }

    fn flush_render_pass(&mut self, pass: &RenderPassState) {
        if self.prims.is_empty() && !pass.clean_clear {
            self.prims.reset();
            self.needs_scaled_copy = false;
            return;
        }

        let mut encoder = self.take_encoder();

        // Resolves never run mid-pass; get anything queued in ahead of it.
        self.resolve.flush(&self.device, &mut encoder, self.resolution_scale);

        if self.needs_scaled_copy {
            // Textured draws sample the upscaled store this pass renders to;
            // they read a snapshot instead.
            let size = self.scaled_vram.size();
            encoder.copy_texture_to_texture(
                ImageCopyTexture {
                    texture: &self.scaled_vram,
                    mip_level: 0,
                    origin: Origin3d::ZERO,
                    aspect: TextureAspect::All,
                },
                ImageCopyTexture {
                    texture: &self.scaled_vram_copy,
                    mip_level: 0,
                    origin: Origin3d::ZERO,
                    aspect: TextureAspect::All,
                },
                size,
            );
        }

        let buffers = self.draw.prepare(&self.device, &self.prims);
        self.draw.record(
            &mut encoder,
            &buffers,
            &self.prims,
            pass,
            &self.targets,
            self.resolution_scale,
            self.dither,
        );

        self.encoder = Some(encoder);
        self.prims.reset();
        self.needs_scaled_copy = false;
    }

    fn discard_render_pass(&mut self) {
        self.prims.reset();
        self.needs_scaled_copy = false;
    }

    fn upload_texture(&mut self, domain: Domain, _rect: Rect, _off_x: u32, _off_y: u32) {
        if domain == Domain::Scaled {
            self.needs_scaled_copy = true;
        }

        self.prims.intern_surface(Surface {
            domain,
            texpage: self.tex_state.texpage,
            clut: self.tex_state.clut,
            mode: self.tex_state.mode,
            window_mask: self.tex_state.window_mask,
            window_offset: self.tex_state.window_offset,
        });
    }

    fn clear_quad(&mut self, rect: Rect, color: u16) {
        let z = self.prims.allocate_depth();
        let color = psx_color_to_rgba8(color);

        let x0 = rect.x as f32;
        let y0 = rect.y as f32;
        let x1 = (rect.x + rect.width) as f32;
        let y1 = (rect.y + rect.height) as f32;
        let corner = |x: f32, y: f32| BufferVertex {
            position: [x, y, z, 1.0],
            uv: [0.0, 0.0, 0.0],
            color,
        };

        self.prims.push_clear_quad([
            corner(x0, y0),
            corner(x1, y0),
            corner(x0, y1),
            corner(x1, y1),
        ]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_expansion_vertical() {
        let v0 = Vertex { x: 4.0, y: 2.0, ..Vertex::default() };
        let v1 = Vertex { x: 4.0, y: 10.0, ..Vertex::default() };

        let positions = expand_line(v0, v1);

        assert_eq!(
            positions,
            [[4.0, 2.0], [5.0, 2.0], [4.0, 11.0], [5.0, 11.0]]
        );
    }

    #[test]
    fn line_expansion_horizontal_reversed() {
        let v0 = Vertex { x: 10.0, y: 3.0, ..Vertex::default() };
        let v1 = Vertex { x: 2.0, y: 3.0, ..Vertex::default() };

        let positions = expand_line(v0, v1);

        assert_eq!(
            positions,
            [[11.0, 3.0], [11.0, 4.0], [2.0, 3.0], [2.0, 4.0]]
        );
    }

    #[test]
    fn texture_window_identity_covers_full_page() {
        let window = TextureWindow::default();
        assert_eq!(window.sampled_rect(), Rect::new(0, 0, 256, 256));
    }

    #[test]
    fn texture_window_mask_restricts_rect() {
        // 32-texel window at offset 64
        let window = TextureWindow { x_mask: 0x1C, y_mask: 0, x_offset: 0x08, y_offset: 0 };
        let rect = window.sampled_rect();

        assert_eq!(rect.x, (0x08 & 0x1C) << 3);
        assert_eq!(rect.width, 256 - (0x1C << 3));
        assert_eq!(rect.height, 256);
    }
}
