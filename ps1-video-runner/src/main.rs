//! Headless RSXDUMP2 player: replays a recorded GPU command stream through
//! the hardware renderer and can dump the resulting VRAM contents.

mod dump;

use anyhow::{anyhow, Context};
use clap::Parser;
use dump::{Command, CommandRenderState, CommandVertex, DumpReader};
use env_logger::Env;
use ps1_video::{Rect, Renderer, SemiTransparentMode, TextureMode, TextureWindow, Vertex};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::rc::Rc;
use wgpu::{
    Backends, Device, DeviceDescriptor, Extent3d, Instance, InstanceDescriptor, PowerPreference,
    Queue, RequestAdapterOptions, Texture, TextureDescriptor, TextureDimension, TextureFormat,
    TextureUsages, TextureViewDescriptor,
};

#[derive(Debug, Parser)]
struct Args {
    /// Path to an RSXDUMP2 command stream
    #[arg(short = 'f', long)]
    dump_path: PathBuf,

    /// Integer upscale factor for the color store (1, 2, 4, or 8)
    #[arg(short = 's', long, default_value_t = 4)]
    resolution_scale: u32,

    /// Stop after this many finalized frames
    #[arg(long)]
    frame_limit: Option<u64>,

    /// Write the final native VRAM contents to this file as raw
    /// little-endian 16-bit texels
    #[arg(long)]
    dump_vram: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if !matches!(args.resolution_scale, 1 | 2 | 4 | 8) {
        return Err(anyhow!("resolution scale must be 1, 2, 4, or 8"));
    }

    let (device, queue) = create_wgpu_device()?;

    let file = File::open(&args.dump_path)
        .with_context(|| format!("failed to open {}", args.dump_path.display()))?;
    let reader = DumpReader::new(BufReader::new(file))?;

    run(reader, device, queue, &args)
}

fn create_wgpu_device() -> anyhow::Result<(Device, Queue)> {
    let instance = Instance::new(InstanceDescriptor {
        backends: Backends::PRIMARY,
        ..InstanceDescriptor::default()
    });

    let adapter = pollster::block_on(instance.request_adapter(&RequestAdapterOptions {
        power_preference: PowerPreference::HighPerformance,
        force_fallback_adapter: false,
        compatible_surface: None,
    }))
    .ok_or_else(|| anyhow!("No suitable wgpu adapter found"))?;

    log::info!("Using GPU adapter: {:?}", adapter.get_info());

    let (device, queue) = pollster::block_on(adapter.request_device(
        &DeviceDescriptor {
            label: "ps1_video_device".into(),
            required_features: ps1_video::required_wgpu_features(),
            required_limits: ps1_video::required_wgpu_limits(),
        },
        None,
    ))?;

    Ok((device, queue))
}

struct DisplayState {
    rect: Rect,
    enabled: bool,
}

fn run(
    mut reader: DumpReader<BufReader<File>>,
    device: Device,
    queue: Queue,
    args: &Args,
) -> anyhow::Result<()> {
    let device = Rc::new(device);
    let mut renderer = Renderer::new(
        Rc::clone(&device),
        Rc::new(queue),
        args.resolution_scale,
        TextureFormat::Rgba8Unorm,
    );

    let mut display = DisplayState { rect: Rect::new(0, 0, 640, 480), enabled: true };
    let mut frame_textures: HashMap<(u32, u32), Texture> = HashMap::new();
    let mut frame_count: u64 = 0;

    loop {
        match reader.next_command()? {
            Command::End => break,
            Command::PrepareFrame => {}
            Command::FinalizeFrame => {
                if display.enabled && !display.rect.is_empty() {
                    let frame = frame_texture(
                        &device,
                        &mut frame_textures,
                        display.rect,
                        args.resolution_scale,
                    );
                    let view = frame.create_view(&TextureViewDescriptor::default());
                    renderer.scanout(display.rect, &view);
                } else {
                    renderer.flush();
                }

                frame_count += 1;
                if frame_count % 100 == 0 {
                    log::info!("Rendered {frame_count} frames");
                }
                if args.frame_limit.is_some_and(|limit| frame_count >= limit) {
                    log::info!("Frame limit reached after {frame_count} frames");
                    break;
                }
            }
            Command::TexWindow { tww, twh, twx, twy } => {
                renderer.set_texture_window(TextureWindow {
                    x_mask: tww as u8,
                    y_mask: twh as u8,
                    x_offset: twx as u8,
                    y_offset: twy as u8,
                });
            }
            Command::DrawOffset { x, y } => renderer.set_draw_offset(x, y),
            Command::DrawArea { x0, y0, x1, y1 } => {
                renderer.set_draw_rect(draw_area_rect(x0, y0, x1, y1));
            }
            Command::DisplayMode { x, y, width, height, depth_24bpp } => {
                if depth_24bpp {
                    log::warn!("24bpp display output is approximated as 15bpp");
                }
                display.rect = clamp_rect(x, y, width, height).unwrap_or_default();
            }
            Command::Triangle { vertices, state } => {
                apply_render_state(&mut renderer, &state);
                let vertices = vertices.map(convert_vertex);
                renderer.draw_triangle(&vertices);
            }
            Command::Quad { vertices, state } => {
                apply_render_state(&mut renderer, &state);
                let vertices = vertices.map(convert_vertex);
                renderer.draw_quad(&vertices);
            }
            Command::Line(line) => {
                renderer.set_texture_mode(TextureMode::None);
                renderer.set_dither(line.dither);
                renderer.set_mask_test(line.mask_test);
                renderer.set_force_mask_bit(line.set_mask);
                renderer.set_semi_transparent(semi_transparent_mode(line.blend_mode));

                let vertices = [
                    Vertex { x: line.x0 as f32, y: line.y0 as f32, w: 1.0, color: line.c0, u: 0, v: 0 },
                    Vertex { x: line.x1 as f32, y: line.y1 as f32, w: 1.0, color: line.c1, u: 0, v: 0 },
                ];
                renderer.draw_line(&vertices);
            }
            Command::LoadImage { x, y, width, height, force_mask_bit, check_mask_bit, data } => {
                let Some(rect) = clamp_rect(x, y, width, height) else { continue };
                renderer.set_force_mask_bit(force_mask_bit);
                renderer.set_mask_test(check_mask_bit);
                renderer.copy_cpu_to_vram(rect, &data);
            }
            Command::FillRect { color, x, y, width, height } => {
                let Some(rect) = clamp_rect(x, y, width, height) else { continue };
                renderer.clear_rect(rect, rgb888_to_psx(color));
            }
            Command::CopyRect {
                src_x,
                src_y,
                dst_x,
                dst_y,
                width,
                height,
                force_mask_bit,
                check_mask_bit,
            } => {
                let (Some(src), Some(dst)) = (
                    clamp_rect(src_x, src_y, width, height),
                    clamp_rect(dst_x, dst_y, width, height),
                ) else {
                    continue;
                };
                if src.width != dst.width || src.height != dst.height {
                    log::warn!("Skipping edge-clipped VRAM copy with mismatched extents");
                    continue;
                }
                renderer.set_force_mask_bit(force_mask_bit);
                renderer.set_mask_test(check_mask_bit);
                renderer.blit_vram(dst, src);
            }
            Command::ToggleDisplay { enabled } => display.enabled = enabled,
        }
    }

    renderer.flush();
    log::info!("Replay complete: {frame_count} frames");

    if let Some(path) = &args.dump_vram {
        let vram = renderer.read_vram();
        let mut bytes = Vec::with_capacity(vram.len() * 2);
        for texel in vram {
            bytes.extend_from_slice(&texel.to_le_bytes());
        }
        std::fs::write(path, bytes)
            .with_context(|| format!("failed to write {}", path.display()))?;
        log::info!("Wrote VRAM dump to {}", path.display());
    }

    Ok(())
}

fn frame_texture<'a>(
    device: &Device,
    frame_textures: &'a mut HashMap<(u32, u32), Texture>,
    display_rect: Rect,
    resolution_scale: u32,
) -> &'a Texture {
    let key = (display_rect.width, display_rect.height);
    frame_textures.entry(key).or_insert_with(|| {
        device.create_texture(&TextureDescriptor {
            label: "frame_texture".into(),
            size: Extent3d {
                width: resolution_scale * display_rect.width,
                height: resolution_scale * display_rect.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format: TextureFormat::Rgba8Unorm,
            usage: TextureUsages::COPY_SRC | TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        })
    })
}

fn apply_render_state(renderer: &mut Renderer, state: &CommandRenderState) {
    renderer.set_texture_color_modulate(state.texture_blend_mode == 2);
    renderer.set_palette_offset(state.clut_x, state.clut_y);
    renderer.set_texture_offset(state.texpage_x, state.texpage_y);
    renderer.set_dither(state.dither);
    renderer.set_mask_test(state.mask_test);
    renderer.set_force_mask_bit(state.set_mask);

    let texture_mode = if state.texture_blend_mode == 0 {
        TextureMode::None
    } else {
        match state.depth_shift {
            1 => TextureMode::Palette8bpp,
            2 => TextureMode::Palette4bpp,
            _ => TextureMode::Abgr1555,
        }
    };
    renderer.set_texture_mode(texture_mode);

    renderer.set_semi_transparent(semi_transparent_mode(state.blend_mode));
}

fn semi_transparent_mode(blend_mode: u32) -> SemiTransparentMode {
    match blend_mode {
        0 => SemiTransparentMode::Average,
        1 => SemiTransparentMode::Add,
        2 => SemiTransparentMode::Sub,
        3 => SemiTransparentMode::AddQuarter,
        _ => SemiTransparentMode::None,
    }
}

fn convert_vertex(vertex: CommandVertex) -> Vertex {
    Vertex {
        x: vertex.x,
        y: vertex.y,
        w: vertex.w,
        color: vertex.color,
        u: vertex.u as u8,
        v: vertex.v as u8,
    }
}

// Inclusive drawing area corners, clamped the way the GPU registers behave.
fn draw_area_rect(x0: u32, y0: u32, x1: u32, y1: u32) -> Rect {
    if x1 < x0 || y1 < y0 || x0 >= 1024 || y0 >= 512 {
        return Rect::default();
    }

    let width = (x1 - x0 + 1).min(1024 - x0);
    let height = (y1 - y0 + 1).min(512 - y0);
    Rect::new(x0, y0, width, height)
}

fn clamp_rect(x: u32, y: u32, width: u32, height: u32) -> Option<Rect> {
    if x >= 1024 || y >= 512 || width == 0 || height == 0 {
        return None;
    }

    Some(Rect::new(x, y, width.min(1024 - x), height.min(512 - y)))
}

fn rgb888_to_psx(color: u32) -> u16 {
    let r = ((color & 0xFF) >> 3) as u16;
    let g = (((color >> 8) & 0xFF) >> 3) as u16;
    let b = (((color >> 16) & 0xFF) >> 3) as u16;
    r | (g << 5) | (b << 10)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draw_area_clamps_to_vram() {
        assert_eq!(draw_area_rect(0, 0, 319, 239), Rect::new(0, 0, 320, 240));
        assert_eq!(draw_area_rect(1000, 500, 1100, 600), Rect::new(1000, 500, 24, 12));
        assert_eq!(draw_area_rect(100, 100, 50, 200), Rect::default());
    }

    #[test]
    fn fill_color_converts_to_15bpp() {
        assert_eq!(rgb888_to_psx(0x0000_00FF), 0x001F);
        assert_eq!(rgb888_to_psx(0x00FF_0000), 0x7C00);
        assert_eq!(rgb888_to_psx(0x0000_FF00), 0x03E0);
    }
}
