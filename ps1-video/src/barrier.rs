//! Translation of block hazard flags into GPU pipeline barrier masks.
//!
//! wgpu synchronizes automatically at pass boundaries, so the renderer answers
//! a barrier request by flushing queued compute work and splitting the open
//! pass. The stage/access masks computed here mirror what an explicit API
//! would be handed and are what the tests pin down.

use crate::atlas::StatusFlags;
use std::ops::{BitOr, BitOrAssign};

macro_rules! mask_type {
    ($name:ident, $($flag:ident = $bit:expr,)*) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct $name(u32);

        impl $name {
            pub const NONE: Self = Self(0);
            $(pub const $flag: Self = Self(1 << $bit);)*

            #[must_use]
            pub const fn is_empty(self) -> bool {
                self.0 == 0
            }

            #[must_use]
            pub const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }
        }

        impl BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }

        impl BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }
    };
}

mask_type!(StageMask,
    COMPUTE_SHADER = 0,
    FRAGMENT_SHADER = 1,
    COLOR_ATTACHMENT_OUTPUT = 2,
    ALL_GRAPHICS = 3,
);

mask_type!(AccessMask,
    SHADER_READ = 0,
    SHADER_WRITE = 1,
    COLOR_ATTACHMENT_READ = 2,
    COLOR_ATTACHMENT_WRITE = 3,
    INPUT_ATTACHMENT_READ = 4,
);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuBarrier {
    pub src_stages: StageMask,
    pub src_access: AccessMask,
    pub dst_stages: StageMask,
    pub dst_access: AccessMask,
}

/// Computes the barrier covering `flags`. Transfer hazards must already have
/// been folded into their compute equivalents.
#[must_use]
pub fn translate_hazard(flags: StatusFlags) -> GpuBarrier {
    assert!(
        !flags.intersects(StatusFlags::TRANSFER_ANY),
        "transfer hazards are recorded inline in the compute pipe"
    );

    let mut src_stages = StageMask::NONE;
    let mut src_access = AccessMask::NONE;
    let mut dst_stages = StageMask::NONE;
    let mut dst_access = AccessMask::NONE;

    if flags.intersects(StatusFlags::FRAGMENT_SFB_READ) {
        src_stages |= StageMask::ALL_GRAPHICS;
    }
    if flags.intersects(StatusFlags::FRAGMENT_SFB_WRITE) {
        src_stages |= StageMask::ALL_GRAPHICS;
        src_access |= AccessMask::COLOR_ATTACHMENT_WRITE;
        dst_access |= AccessMask::SHADER_READ | AccessMask::SHADER_WRITE;
    }

    if flags.intersects(StatusFlags::COMPUTE_FB_READ | StatusFlags::COMPUTE_SFB_READ) {
        src_stages |= StageMask::COMPUTE_SHADER;
    }
    if flags.intersects(StatusFlags::COMPUTE_FB_WRITE | StatusFlags::COMPUTE_SFB_WRITE) {
        src_stages |= StageMask::COMPUTE_SHADER;
        src_access |= AccessMask::SHADER_WRITE;
        dst_access |= AccessMask::SHADER_READ | AccessMask::SHADER_WRITE;
    }

    // Upscaled-store writes must also become visible to attachment loads and
    // input attachment reads of the next pass.
    if flags.intersects(StatusFlags::COMPUTE_SFB_WRITE | StatusFlags::FRAGMENT_SFB_WRITE) {
        dst_stages |= StageMask::FRAGMENT_SHADER | StageMask::COLOR_ATTACHMENT_OUTPUT;
        dst_access |= AccessMask::COLOR_ATTACHMENT_READ
            | AccessMask::COLOR_ATTACHMENT_WRITE
            | AccessMask::INPUT_ATTACHMENT_READ;
    }

    dst_stages |= StageMask::COMPUTE_SHADER;

    GpuBarrier { src_stages, src_access, dst_stages, dst_access }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_write_translates_to_compute_shader_write() {
        let barrier = translate_hazard(StatusFlags::COMPUTE_FB_WRITE);

        assert_eq!(barrier.src_stages, StageMask::COMPUTE_SHADER);
        assert_eq!(barrier.src_access, AccessMask::SHADER_WRITE);
        assert_eq!(barrier.dst_stages, StageMask::COMPUTE_SHADER);
        assert!(barrier.dst_access.contains(AccessMask::SHADER_READ));
    }

    #[test]
    fn compute_read_is_execution_only() {
        let barrier = translate_hazard(StatusFlags::COMPUTE_SFB_READ);

        assert_eq!(barrier.src_stages, StageMask::COMPUTE_SHADER);
        assert!(barrier.src_access.is_empty());
        assert_eq!(barrier.dst_stages, StageMask::COMPUTE_SHADER);
    }

    #[test]
    fn fragment_write_targets_fragment_and_attachment_reads() {
        let barrier = translate_hazard(StatusFlags::FRAGMENT_SFB_WRITE);

        assert_eq!(barrier.src_stages, StageMask::ALL_GRAPHICS);
        assert_eq!(barrier.src_access, AccessMask::COLOR_ATTACHMENT_WRITE);
        assert!(barrier.dst_stages.contains(StageMask::COMPUTE_SHADER));
        assert!(barrier.dst_stages.contains(StageMask::FRAGMENT_SHADER));
        assert!(barrier.dst_stages.contains(StageMask::COLOR_ATTACHMENT_OUTPUT));
        assert!(barrier.dst_access.contains(AccessMask::INPUT_ATTACHMENT_READ));
    }

    #[test]
    fn scaled_compute_write_invalidates_attachment_caches() {
        let barrier = translate_hazard(StatusFlags::COMPUTE_SFB_WRITE);

        assert!(barrier.dst_stages.contains(StageMask::FRAGMENT_SHADER));
        assert!(barrier.dst_access.contains(AccessMask::COLOR_ATTACHMENT_READ));
    }

    #[test]
    fn unscaled_compute_write_does_not_touch_attachment_caches() {
        let barrier = translate_hazard(StatusFlags::COMPUTE_FB_WRITE);

        assert!(!barrier.dst_stages.contains(StageMask::FRAGMENT_SHADER));
        assert!(!barrier.dst_access.contains(AccessMask::COLOR_ATTACHMENT_READ));
    }

    #[test]
    #[should_panic(expected = "transfer hazards")]
    fn transfer_hazards_are_rejected() {
        let _ = translate_hazard(StatusFlags::TRANSFER_FB_WRITE);
    }

    #[test]
    fn folding_maps_transfer_to_compute() {
        let folded = (StatusFlags::TRANSFER_FB_READ | StatusFlags::TRANSFER_SFB_WRITE)
            .folded_into_compute();

        assert!(folded.intersects(StatusFlags::COMPUTE_FB_READ));
        assert!(folded.intersects(StatusFlags::COMPUTE_SFB_WRITE));
        assert!(!folded.intersects(StatusFlags::TRANSFER_ANY));
    }
}
