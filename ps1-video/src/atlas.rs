//! VRAM block atlas: ownership + hazard tracking and render pass batching.
//!
//! The 1024x512 VRAM is partitioned into 8x8 blocks. Each block records which
//! of the two stores (native or upscaled) currently holds valid data, plus
//! which pipeline stages have unsynchronized reads/writes outstanding on it.
//! Every access goes through the atlas first; the atlas decides when to emit
//! resolves between the stores, when a pipeline barrier is required, and when
//! the single open render pass must be flushed or discarded. GPU work is
//! requested through the [`HazardListener`] callbacks, never performed here.

use crate::{BLOCK_HEIGHT, BLOCK_WIDTH, NUM_BLOCKS_X, NUM_BLOCKS_Y, VRAM_HEIGHT, VRAM_WIDTH};
use std::ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, Not};

#[cfg(test)]
mod tests;

/// Rectangle in unscaled VRAM pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const VRAM: Self = Self::new(0, 0, VRAM_WIDTH, VRAM_HEIGHT);

    #[must_use]
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    #[must_use]
    pub fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }

    #[must_use]
    pub fn intersects(self, other: Self) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.x < other.x + other.width
            && other.x < self.x + self.width
            && self.y < other.y + other.height
            && other.y < self.y + self.height
    }

    /// Clips overhanging extents to the framebuffer. An origin outside VRAM
    /// yields an empty rectangle.
    #[must_use]
    pub fn clipped_to_vram(self) -> Self {
        if self.x >= VRAM_WIDTH || self.y >= VRAM_HEIGHT {
            return Self::default();
        }
        Self::new(
            self.x,
            self.y,
            self.width.min(VRAM_WIDTH - self.x),
            self.height.min(VRAM_HEIGHT - self.y),
        )
    }

    /// Expands the rectangle outward to the enclosing block boundaries.
    #[must_use]
    pub fn block_aligned(self) -> Self {
        let x = self.x & !(BLOCK_WIDTH - 1);
        let y = self.y & !(BLOCK_HEIGHT - 1);
        let right = ((self.x + self.width - 1) | (BLOCK_WIDTH - 1)) + 1;
        let bottom = ((self.y + self.height - 1) | (BLOCK_HEIGHT - 1)) + 1;
        Self::new(x, y, right - x, bottom - y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    Unscaled,
    Scaled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Compute,
    Transfer,
    Fragment,
}

/// Which store is authoritative for a block. `*Prefer` means both stores hold
/// equivalent data and the named one should be chosen when either works.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    FbOnly = 0,
    SfbOnly = 1,
    FbPrefer = 2,
    SfbPrefer = 3,
}

/// Texture sampling mode for subsequent textured primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextureMode {
    #[default]
    None,
    Abgr1555,
    Palette8bpp,
    Palette4bpp,
}

impl TextureMode {
    /// Texels per 16-bit VRAM halfword.
    #[must_use]
    pub fn texel_density(self) -> u32 {
        match self {
            Self::None | Self::Abgr1555 => 1,
            Self::Palette8bpp => 2,
            Self::Palette4bpp => 4,
        }
    }
}

/// Per-block hazard flag set: the cross product of pipeline stage, store and
/// access direction, minus the forbidden Fragment/native combinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusFlags(u32);

impl StatusFlags {
    pub const NONE: Self = Self(0);

    pub const COMPUTE_FB_READ: Self = Self(1 << 2);
    pub const COMPUTE_FB_WRITE: Self = Self(1 << 3);
    pub const COMPUTE_SFB_READ: Self = Self(1 << 4);
    pub const COMPUTE_SFB_WRITE: Self = Self(1 << 5);
    pub const TRANSFER_FB_READ: Self = Self(1 << 6);
    pub const TRANSFER_FB_WRITE: Self = Self(1 << 7);
    pub const TRANSFER_SFB_READ: Self = Self(1 << 8);
    pub const TRANSFER_SFB_WRITE: Self = Self(1 << 9);
    pub const FRAGMENT_SFB_READ: Self = Self(1 << 10);
    pub const FRAGMENT_SFB_WRITE: Self = Self(1 << 11);

    pub const FB_READ: Self = Self(Self::COMPUTE_FB_READ.0 | Self::TRANSFER_FB_READ.0);
    pub const FB_WRITE: Self = Self(Self::COMPUTE_FB_WRITE.0 | Self::TRANSFER_FB_WRITE.0);
    pub const SFB_READ: Self =
        Self(Self::COMPUTE_SFB_READ.0 | Self::TRANSFER_SFB_READ.0 | Self::FRAGMENT_SFB_READ.0);
    pub const SFB_WRITE: Self =
        Self(Self::COMPUTE_SFB_WRITE.0 | Self::TRANSFER_SFB_WRITE.0 | Self::FRAGMENT_SFB_WRITE.0);

    pub const COMPUTE_ANY: Self = Self(
        Self::COMPUTE_FB_READ.0
            | Self::COMPUTE_FB_WRITE.0
            | Self::COMPUTE_SFB_READ.0
            | Self::COMPUTE_SFB_WRITE.0,
    );
    pub const TRANSFER_ANY: Self = Self(
        Self::TRANSFER_FB_READ.0
            | Self::TRANSFER_FB_WRITE.0
            | Self::TRANSFER_SFB_READ.0
            | Self::TRANSFER_SFB_WRITE.0,
    );
    pub const FRAGMENT_ANY: Self = Self(Self::FRAGMENT_SFB_READ.0 | Self::FRAGMENT_SFB_WRITE.0);

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Transfer-stage work is recorded inline in the compute pipe, so transfer
    /// hazards reach the listener as their compute-stage equivalents.
    #[must_use]
    pub fn folded_into_compute(self) -> Self {
        const PAIRS: [(StatusFlags, StatusFlags); 4] = [
            (StatusFlags::TRANSFER_FB_READ, StatusFlags::COMPUTE_FB_READ),
            (StatusFlags::TRANSFER_FB_WRITE, StatusFlags::COMPUTE_FB_WRITE),
            (StatusFlags::TRANSFER_SFB_READ, StatusFlags::COMPUTE_SFB_READ),
            (StatusFlags::TRANSFER_SFB_WRITE, StatusFlags::COMPUTE_SFB_WRITE),
        ];

        let mut folded = self & !Self::TRANSFER_ANY;
        for (transfer, compute) in PAIRS {
            if self.intersects(transfer) {
                folded |= compute;
            }
        }
        folded
    }
}

impl BitOr for StatusFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for StatusFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for StatusFlags {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl BitAndAssign for StatusFlags {
    fn bitand_assign(&mut self, rhs: Self) {
        self.0 &= rhs.0;
    }
}

impl Not for StatusFlags {
    type Output = Self;

    fn not(self) -> Self {
        Self(!self.0)
    }
}

// Ownership value in the low 2 bits, hazard flags above.
#[derive(Debug, Clone, Copy)]
struct BlockStatus(u32);

impl BlockStatus {
    const OWNERSHIP_MASK: u32 = 0x3;

    const fn new(ownership: Ownership) -> Self {
        Self(ownership as u32)
    }

    fn ownership(self) -> Ownership {
        match self.0 & Self::OWNERSHIP_MASK {
            0 => Ownership::FbOnly,
            1 => Ownership::SfbOnly,
            2 => Ownership::FbPrefer,
            _ => Ownership::SfbPrefer,
        }
    }

    fn set_ownership(&mut self, ownership: Ownership) {
        self.0 = (self.0 & !Self::OWNERSHIP_MASK) | ownership as u32;
    }

    fn flags(self) -> StatusFlags {
        StatusFlags(self.0 & !Self::OWNERSHIP_MASK)
    }

    fn insert(&mut self, flags: StatusFlags) {
        self.0 |= flags.0;
    }

    fn remove(&mut self, flags: StatusFlags) {
        self.0 &= !flags.0 | Self::OWNERSHIP_MASK;
    }
}

/// Snapshot of the batched render pass, handed to the listener at flush time.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderPassState {
    pub inside: bool,
    pub rect: Rect,
    pub clean_clear: bool,
    pub clear_color: u16,
}

/// GPU work requested by the atlas. Callbacks are only invoked at well-defined
/// points: barriers after a hazard scan has completed, resolves after the
/// barrier for them was requested, pass flush/discard at batching boundaries.
pub trait HazardListener {
    /// Record a pipeline barrier covering the given source hazards.
    /// Any queued resolve work must be recorded ahead of the barrier.
    fn hazard(&mut self, flags: StatusFlags);

    /// Queue a blit of one block between the stores, into `domain`.
    fn resolve(&mut self, domain: Domain, block_x: u32, block_y: u32);

    /// Emit the batched render pass for `pass.rect` and reset the draw queue.
    fn flush_render_pass(&mut self, pass: &RenderPassState);

    /// Drop all queued primitives without emitting GPU commands.
    fn discard_render_pass(&mut self);

    /// A textured draw is about to sample `rect` from the given store.
    fn upload_texture(&mut self, domain: Domain, rect: Rect, off_x: u32, off_y: u32);

    /// Queue a flat quad covering `rect` into the open pass.
    fn clear_quad(&mut self, rect: Rect, color: u16);
}

/// The block grid plus the single batched render pass.
#[derive(Debug)]
pub struct VramAtlas {
    info: Box<[BlockStatus]>,
    renderpass: RenderPassState,
    texture_window: Rect,
    texture_offset: (u32, u32),
    palette_offset: (u32, u32),
    texture_mode: TextureMode,
}

impl Default for VramAtlas {
    fn default() -> Self {
        Self::new()
    }
}

impl VramAtlas {
    #[must_use]
    pub fn new() -> Self {
        Self {
            info: vec![BlockStatus::new(Ownership::FbPrefer); (NUM_BLOCKS_X * NUM_BLOCKS_Y) as usize]
                .into_boxed_slice(),
            renderpass: RenderPassState::default(),
            texture_window: Rect::default(),
            texture_offset: (0, 0),
            palette_offset: (0, 0),
            texture_mode: TextureMode::None,
        }
    }

    fn info(&self, block_x: u32, block_y: u32) -> BlockStatus {
        self.info[(block_y * NUM_BLOCKS_X + block_x) as usize]
    }

    fn info_mut(&mut self, block_x: u32, block_y: u32) -> &mut BlockStatus {
        &mut self.info[(block_y * NUM_BLOCKS_X + block_x) as usize]
    }

    #[must_use]
    pub fn block_ownership(&self, block_x: u32, block_y: u32) -> Ownership {
        self.info(block_x, block_y).ownership()
    }

    #[must_use]
    pub fn block_hazards(&self, block_x: u32, block_y: u32) -> StatusFlags {
        self.info(block_x, block_y).flags()
    }

    #[must_use]
    pub fn hazard_union(&self) -> StatusFlags {
        self.info.iter().fold(StatusFlags::NONE, |acc, block| acc | block.flags())
    }

    #[must_use]
    pub fn render_pass_open(&self) -> bool {
        self.renderpass.inside
    }

    #[must_use]
    pub fn draw_rect(&self) -> Rect {
        self.renderpass.rect
    }

    pub fn read_compute(&mut self, domain: Domain, rect: Rect, listener: &mut dyn HazardListener) {
        if rect.is_empty() {
            return;
        }
        self.sync_domain(domain, rect, listener);
        self.read_domain(domain, Stage::Compute, rect, listener);
    }

    pub fn write_compute(&mut self, domain: Domain, rect: Rect, listener: &mut dyn HazardListener) {
        if rect.is_empty() {
            return;
        }
        self.sync_domain(domain, rect, listener);
        self.write_domain(domain, Stage::Compute, rect, listener);
    }

    pub fn read_transfer(&mut self, domain: Domain, rect: Rect, listener: &mut dyn HazardListener) {
        if rect.is_empty() {
            return;
        }
        self.sync_domain(domain, rect, listener);
        self.read_domain(domain, Stage::Transfer, rect, listener);
    }

    pub fn write_transfer(
        &mut self,
        domain: Domain,
        rect: Rect,
        listener: &mut dyn HazardListener,
    ) {
        if rect.is_empty() {
            return;
        }
        self.sync_domain(domain, rect, listener);
        self.write_domain(domain, Stage::Transfer, rect, listener);
    }

    /// Scanout path: the upscaled store is about to be sampled by a fragment
    /// shader outside the batched pass.
    pub fn read_fragment(&mut self, rect: Rect, listener: &mut dyn HazardListener) {
        if rect.is_empty() {
            return;
        }
        self.sync_domain(Domain::Scaled, rect, listener);
        self.read_domain(Domain::Scaled, Stage::Fragment, rect, listener);
    }

    /// Texture sampling read over `rect`, choosing whichever store avoids
    /// resolves. Returns the chosen store.
    pub fn read_texture(&mut self, rect: Rect, listener: &mut dyn HazardListener) -> Domain {
        let domain = self.find_suitable_domain(rect);
        self.sync_domain(domain, rect, listener);
        self.read_domain(domain, Stage::Compute, rect, listener);
        domain
    }

    /// Picks the native store if any block in `rect` still holds authoritative
    /// or equivalent native data, so texture reads avoid extra resolves.
    #[must_use]
    pub fn find_suitable_domain(&self, rect: Rect) -> Domain {
        if rect.is_empty() {
            return Domain::Unscaled;
        }
        check_rect(rect);

        for (x, y) in blocks(rect) {
            let ownership = self.info(x, y).ownership();
            if ownership == Ownership::FbOnly || ownership == Ownership::FbPrefer {
                return Domain::Unscaled;
            }
        }
        Domain::Scaled
    }

    /// Establishes that every block of `rect` holds valid data in `domain`,
    /// queueing per-block resolves from the other store where it does not.
    pub fn sync_domain(&mut self, domain: Domain, rect: Rect, listener: &mut dyn HazardListener) {
        if rect.is_empty() {
            return;
        }
        check_rect(rect);

        // A block is stale for `domain` only when the other store is the sole
        // owner of its contents.
        let dirty = match domain {
            Domain::Scaled => Ownership::FbOnly,
            Domain::Unscaled => Ownership::SfbOnly,
        };

        if !blocks(rect).any(|(x, y)| self.info(x, y).ownership() == dirty) {
            return;
        }

        if self.inside_render_pass(rect) {
            self.flush_render_pass(listener);
        }

        let (hazard, prefer, installed) = match domain {
            Domain::Scaled => (
                StatusFlags::FB_WRITE | StatusFlags::SFB_WRITE | StatusFlags::SFB_READ,
                Ownership::SfbPrefer,
                StatusFlags::TRANSFER_FB_READ | StatusFlags::TRANSFER_SFB_WRITE,
            ),
            Domain::Unscaled => (
                StatusFlags::FB_WRITE | StatusFlags::SFB_WRITE | StatusFlags::FB_READ,
                Ownership::FbPrefer,
                StatusFlags::TRANSFER_SFB_READ | StatusFlags::TRANSFER_FB_WRITE,
            ),
        };

        let mut pending = StatusFlags::NONE;
        for (x, y) in blocks(rect) {
            let block = self.info(x, y);
            if block.ownership() == dirty {
                pending |= block.flags() & hazard;
            }
        }

        // Barrier first: the resolves queued below must execute after whatever
        // produced the source data.
        if !pending.is_empty() {
            self.pipeline_barrier(pending, listener);
        }

        for (x, y) in blocks(rect) {
            if self.info(x, y).ownership() == dirty {
                listener.resolve(domain, x, y);
                let block = self.info_mut(x, y);
                block.set_ownership(prefer);
                block.insert(installed);
            }
        }
    }

    fn read_domain(
        &mut self,
        domain: Domain,
        stage: Stage,
        rect: Rect,
        listener: &mut dyn HazardListener,
    ) {
        check_rect(rect);

        if self.inside_render_pass(rect) {
            self.flush_render_pass(listener);
        }

        let (hazard, installed) = match (domain, stage) {
            (Domain::Unscaled, Stage::Compute) => {
                (StatusFlags::FB_WRITE, StatusFlags::COMPUTE_FB_READ)
            }
            (Domain::Unscaled, Stage::Transfer) => {
                (StatusFlags::FB_WRITE, StatusFlags::TRANSFER_FB_READ)
            }
            (Domain::Scaled, Stage::Compute) => {
                (StatusFlags::SFB_WRITE, StatusFlags::COMPUTE_SFB_READ)
            }
            (Domain::Scaled, Stage::Transfer) => {
                (StatusFlags::SFB_WRITE, StatusFlags::TRANSFER_SFB_READ)
            }
            (Domain::Scaled, Stage::Fragment) => (
                // Reads within the same pass go through input attachment
                // feedback; they are not cross-pass hazards.
                StatusFlags::SFB_WRITE & !StatusFlags::FRAGMENT_SFB_WRITE,
                StatusFlags::FRAGMENT_SFB_READ,
            ),
            (Domain::Unscaled, Stage::Fragment) => {
                panic!("fragment stage cannot access the native VRAM store")
            }
        };

        let mut pending = StatusFlags::NONE;
        for (x, y) in blocks(rect) {
            pending |= self.info(x, y).flags() & hazard;
        }

        if !pending.is_empty() {
            self.pipeline_barrier(pending, listener);
        }

        for (x, y) in blocks(rect) {
            self.info_mut(x, y).insert(installed);
        }
    }

    fn write_domain(
        &mut self,
        domain: Domain,
        stage: Stage,
        rect: Rect,
        listener: &mut dyn HazardListener,
    ) {
        check_rect(rect);

        if self.inside_render_pass(rect) {
            self.flush_render_pass(listener);
        }

        let (hazard, ownership, installed) = match (domain, stage) {
            (Domain::Unscaled, Stage::Compute) => (
                StatusFlags::FB_WRITE | StatusFlags::FB_READ,
                Ownership::FbOnly,
                StatusFlags::COMPUTE_FB_WRITE,
            ),
            (Domain::Unscaled, Stage::Transfer) => (
                StatusFlags::FB_WRITE | StatusFlags::FB_READ,
                Ownership::FbOnly,
                StatusFlags::TRANSFER_FB_WRITE,
            ),
            (Domain::Scaled, Stage::Compute) => (
                StatusFlags::SFB_WRITE | StatusFlags::SFB_READ,
                Ownership::SfbOnly,
                StatusFlags::COMPUTE_SFB_WRITE,
            ),
            (Domain::Scaled, Stage::Transfer) => (
                StatusFlags::SFB_WRITE | StatusFlags::SFB_READ,
                Ownership::SfbOnly,
                StatusFlags::TRANSFER_SFB_WRITE,
            ),
            (Domain::Scaled, Stage::Fragment) => (
                (StatusFlags::SFB_WRITE | StatusFlags::SFB_READ)
                    & !(StatusFlags::FRAGMENT_SFB_WRITE | StatusFlags::FRAGMENT_SFB_READ),
                Ownership::SfbOnly,
                StatusFlags::FRAGMENT_SFB_WRITE,
            ),
            (Domain::Unscaled, Stage::Fragment) => {
                panic!("fragment stage cannot access the native VRAM store")
            }
        };

        let mut pending = StatusFlags::NONE;
        for (x, y) in blocks(rect) {
            pending |= self.info(x, y).flags() & hazard;
        }

        if !pending.is_empty() {
            self.pipeline_barrier(pending, listener);
        }

        for (x, y) in blocks(rect) {
            let block = self.info_mut(x, y);
            block.set_ownership(ownership);
            block.insert(installed);
        }
    }

    /// Clears `flags` from every block and forwards the barrier request.
    pub fn pipeline_barrier(&mut self, flags: StatusFlags, listener: &mut dyn HazardListener) {
        debug_assert!(!flags.is_empty());

        for block in self.info.iter_mut() {
            block.remove(flags);
        }

        log::debug!("Pipeline barrier for hazards {flags:?}");
        listener.hazard(flags.folded_into_compute());
    }

    fn inside_render_pass(&self, rect: Rect) -> bool {
        if !self.renderpass.inside {
            return false;
        }
        rect.intersects(self.renderpass.rect.block_aligned())
    }

    pub fn set_draw_rect(&mut self, rect: Rect, listener: &mut dyn HazardListener) {
        // The draw rect becomes a scissor, so overhang is clipped here.
        let rect = rect.clipped_to_vram();

        if self.renderpass.inside && self.renderpass.rect != rect {
            self.flush_render_pass(listener);
        }
        self.renderpass.rect = rect;
    }

    /// Window of texels subsequent textured primitives sample, relative to the
    /// texture page origin.
    pub fn set_texture_window(&mut self, window: Rect) {
        self.texture_window = window;
    }

    pub fn set_texture_offset(&mut self, x: u32, y: u32) {
        self.texture_offset = (x, y);
    }

    pub fn set_palette_offset(&mut self, x: u32, y: u32) {
        self.palette_offset = (x, y);
    }

    pub fn set_texture_mode(&mut self, mode: TextureMode) -> TextureMode {
        std::mem::replace(&mut self.texture_mode, mode)
    }

    /// VRAM region covered by the current texture window, adjusted for texel
    /// density and clipped to the framebuffer.
    fn sampled_texture_rect(&self) -> Rect {
        let density = self.texture_mode.texel_density();
        let x = self.texture_offset.0 + self.texture_window.x / density;
        let y = self.texture_offset.1 + self.texture_window.y;
        if x >= VRAM_WIDTH || y >= VRAM_HEIGHT {
            return Rect::default();
        }

        let width = (self.texture_window.width.div_ceil(density)).min(VRAM_WIDTH - x);
        let height = self.texture_window.height.min(VRAM_HEIGHT - y);
        Rect::new(x, y, width, height)
    }

    /// Called before every drawing primitive: ensures the texture window is
    /// readable outside the pass and that a pass is open over the draw rect.
    pub fn write_fragment(&mut self, listener: &mut dyn HazardListener) {
        if self.texture_mode != TextureMode::None {
            let window = self.sampled_texture_rect();
            if !window.is_empty() {
                // Sampling the pass's own target would alias; flush first.
                if self.inside_render_pass(window) {
                    self.flush_render_pass(listener);
                }
                let domain = self.read_texture(window, listener);
                listener.upload_texture(
                    domain,
                    window,
                    self.texture_window.x,
                    self.texture_window.y,
                );
            }

            let palette_width = match self.texture_mode {
                TextureMode::Palette4bpp => 16,
                TextureMode::Palette8bpp => 256,
                TextureMode::None | TextureMode::Abgr1555 => 0,
            };
            if palette_width != 0 && self.palette_offset.1 < VRAM_HEIGHT {
                let (x, y) = self.palette_offset;
                if x < VRAM_WIDTH {
                    let clut = Rect::new(x, y, palette_width.min(VRAM_WIDTH - x), 1);
                    if self.inside_render_pass(clut) {
                        self.flush_render_pass(listener);
                    }
                    self.read_texture(clut, listener);
                }
            }
        }

        if !self.renderpass.inside && !self.renderpass.rect.is_empty() {
            self.sync_domain(Domain::Scaled, self.renderpass.rect, listener);
            self.renderpass.inside = true;
            self.renderpass.clean_clear = false;
        }
    }

    pub fn clear_rect(&mut self, rect: Rect, color: u16, listener: &mut dyn HazardListener) {
        if rect.is_empty() {
            return;
        }
        check_rect(rect);

        if rect == self.renderpass.rect {
            // The pass contents are about to be fully overwritten; drop them
            // and restart with a loadless clear.
            self.sync_domain(Domain::Scaled, rect, listener);
            if self.renderpass.inside {
                self.renderpass.inside = false;
                listener.discard_render_pass();
            }
            self.renderpass.inside = true;
            self.renderpass.clean_clear = true;
            self.renderpass.clear_color = color;
        } else if self.renderpass.inside {
            listener.clear_quad(rect, color);
        } else {
            self.sync_domain(Domain::Scaled, rect, listener);
            if !self.renderpass.rect.is_empty() {
                self.sync_domain(Domain::Scaled, self.renderpass.rect, listener);
                self.renderpass.inside = true;
                self.renderpass.clean_clear = false;
                listener.clear_quad(rect, color);
            }
        }
    }

    /// Chooses the cheaper store for a VRAM-to-VRAM blit, establishes hazards
    /// for the copy, and returns the chosen store.
    pub fn blit_vram(
        &mut self,
        dst: Rect,
        src: Rect,
        listener: &mut dyn HazardListener,
    ) -> Domain {
        let domain = if self.find_suitable_domain(src) == Domain::Scaled
            && self.find_suitable_domain(dst) == Domain::Scaled
        {
            Domain::Scaled
        } else {
            Domain::Unscaled
        };

        self.read_compute(domain, src, listener);
        self.write_compute(domain, dst, listener);

        domain
    }

    pub fn flush_render_pass(&mut self, listener: &mut dyn HazardListener) {
        if !self.renderpass.inside {
            return;
        }
        self.renderpass.inside = false;

        let rect = self.renderpass.rect;
        if rect.is_empty() {
            listener.discard_render_pass();
            return;
        }

        // Everything still pending on the target blocks must complete before
        // the pass's color writes; same-pass fragment accesses excluded.
        let hazard = (StatusFlags::SFB_WRITE | StatusFlags::SFB_READ)
            & !(StatusFlags::FRAGMENT_SFB_WRITE | StatusFlags::FRAGMENT_SFB_READ);
        let mut pending = StatusFlags::NONE;
        for (x, y) in blocks(rect) {
            pending |= self.info(x, y).flags() & hazard;
        }
        if !pending.is_empty() {
            self.pipeline_barrier(pending, listener);
        }

        let pass = RenderPassState { inside: false, ..self.renderpass };
        listener.flush_render_pass(&pass);

        for (x, y) in blocks(rect) {
            let block = self.info_mut(x, y);
            block.set_ownership(Ownership::SfbOnly);
            block.insert(StatusFlags::FRAGMENT_SFB_WRITE);
        }
    }

    pub fn discard_render_pass(&mut self, listener: &mut dyn HazardListener) {
        if self.renderpass.inside {
            self.renderpass.inside = false;
            listener.discard_render_pass();
        }
    }
}

fn check_rect(rect: Rect) {
    assert!(
        rect.x < VRAM_WIDTH && rect.y < VRAM_HEIGHT,
        "rectangle origin ({}, {}) outside {VRAM_WIDTH}x{VRAM_HEIGHT} VRAM",
        rect.x,
        rect.y,
    );
}

// Inclusive block bounds; overhanging extents are clipped to the grid edge.
fn block_bounds(rect: Rect) -> (u32, u32, u32, u32) {
    debug_assert!(!rect.is_empty());

    let bx0 = rect.x / BLOCK_WIDTH;
    let bx1 = ((rect.x + rect.width - 1) / BLOCK_WIDTH).min(NUM_BLOCKS_X - 1);
    let by0 = rect.y / BLOCK_HEIGHT;
    let by1 = ((rect.y + rect.height - 1) / BLOCK_HEIGHT).min(NUM_BLOCKS_Y - 1);
    (bx0, bx1, by0, by1)
}

fn blocks(rect: Rect) -> impl Iterator<Item = (u32, u32)> {
    let (bx0, bx1, by0, by1) = block_bounds(rect);
    (by0..=by1).flat_map(move |y| (bx0..=bx1).map(move |x| (x, y)))
}
