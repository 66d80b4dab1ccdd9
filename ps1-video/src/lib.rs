//! Hardware-accelerated PS1 GPU renderer core.
//!
//! VRAM is kept in two parallel GPU stores: a native 1024x512 16bpp image and
//! an integer-upscaled color image. The atlas module tracks which store holds
//! authoritative data per 8x8 block and which pipeline stages have outstanding
//! work on it; the renderer module batches draw commands into render passes
//! over a wgpu device.

pub mod atlas;
mod barrier;
mod queue;
mod renderer;

pub use atlas::{
    Domain, HazardListener, Ownership, Rect, RenderPassState, Stage, StatusFlags, TextureMode,
    VramAtlas,
};
pub use barrier::{AccessMask, GpuBarrier, StageMask};
pub use queue::SemiTransparentMode;
pub use renderer::{Renderer, TextureWindow, Vertex};

pub const VRAM_WIDTH: u32 = 1024;
pub const VRAM_HEIGHT: u32 = 512;

pub const BLOCK_WIDTH: u32 = 8;
pub const BLOCK_HEIGHT: u32 = 8;
pub const NUM_BLOCKS_X: u32 = VRAM_WIDTH / BLOCK_WIDTH;
pub const NUM_BLOCKS_Y: u32 = VRAM_HEIGHT / BLOCK_HEIGHT;

#[must_use]
pub fn required_wgpu_features() -> wgpu::Features {
    wgpu::Features::PUSH_CONSTANTS | wgpu::Features::TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES
}

#[must_use]
pub fn required_wgpu_limits() -> wgpu::Limits {
    wgpu::Limits {
        max_texture_dimension_2d: 16 * 1024,
        max_push_constant_size: 128,
        ..wgpu::Limits::default()
    }
}
