//! Primitive batching between render pass flushes.
//!
//! Fully opaque primitives are free to reorder (the depth trick resolves
//! occlusion), so they are bucketed by texture surface for fewer state
//! changes. Anything whose output depends on the current framebuffer contents
//! (semi-transparent or mask-tested) goes into a single ordered list with a
//! parallel per-primitive state vector; runs of identical state become one
//! draw call.

use crate::atlas::{Domain, TextureMode};
use bytemuck::{Pod, Zeroable};
use std::mem;
use std::ops::Range;
use wgpu::{VertexAttribute, VertexBufferLayout, VertexStepMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SemiTransparentMode {
    #[default]
    None,
    Average,
    Add,
    Sub,
    AddQuarter,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Zeroable, Pod)]
pub struct BufferVertex {
    pub position: [f32; 4],
    pub uv: [f32; 3],
    pub color: u32,
}

impl BufferVertex {
    const ATTRIBUTES: [VertexAttribute; 3] =
        wgpu::vertex_attr_array![0 => Float32x4, 1 => Float32x3, 2 => Unorm8x4];

    pub const LAYOUT: VertexBufferLayout<'static> = VertexBufferLayout {
        array_stride: mem::size_of::<Self>() as u64,
        step_mode: VertexStepMode::Vertex,
        attributes: &Self::ATTRIBUTES,
    };
}

/// One distinct texture binding within a pass: the store to sample, the
/// texture page and palette origins in VRAM halfwords, and the repeat window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Surface {
    pub domain: Domain,
    pub texpage: (u32, u32),
    pub clut: (u32, u32),
    pub mode: TextureMode,
    pub window_mask: (u32, u32),
    pub window_offset: (u32, u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemiTransparentState {
    pub surface: u32,
    pub mode: SemiTransparentMode,
    pub textured: bool,
    pub masked: bool,
}

impl SemiTransparentState {
    /// Programmable-blend primitives read what the previous one wrote, so
    /// they can never share a draw call.
    #[must_use]
    pub fn is_programmable(self) -> bool {
        self.masked && self.mode != SemiTransparentMode::None
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PrimitiveClass {
    pub textured: bool,
    pub semi_transparency: SemiTransparentMode,
    pub mask_test: bool,
}

#[derive(Debug, Default)]
pub struct DrawQueue {
    pub opaque: Vec<BufferVertex>,
    pub opaque_textured: Vec<Vec<BufferVertex>>,
    pub semi_transparent_opaque: Vec<Vec<BufferVertex>>,
    pub semi_transparent: Vec<BufferVertex>,
    pub semi_transparent_state: Vec<SemiTransparentState>,
    pub surfaces: Vec<Surface>,
    pub feedback: bool,
    last_surface: u32,
    primitive_index: u32,
}

impl DrawQueue {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.opaque.is_empty()
            && self.opaque_textured.iter().all(Vec::is_empty)
            && self.semi_transparent_opaque.iter().all(Vec::is_empty)
            && self.semi_transparent.is_empty()
    }

    /// Monotonically decreasing depth so later primitives win the LESS test.
    /// The epsilon is doubled to survive the perspective divide when w != 1.
    pub fn allocate_depth(&mut self) -> f32 {
        self.primitive_index += 1;
        1.0 - self.primitive_index as f32 * (2.0 / 0x00FF_FFFF as f32)
    }

    #[must_use]
    pub fn primitive_index(&self) -> u32 {
        self.primitive_index
    }

    pub fn intern_surface(&mut self, surface: Surface) -> u32 {
        let index = match self.surfaces.iter().position(|existing| *existing == surface) {
            Some(index) => index,
            None => {
                self.surfaces.push(surface);
                self.surfaces.len() - 1
            }
        } as u32;
        self.last_surface = index;
        index
    }

    #[must_use]
    pub fn last_surface(&self) -> u32 {
        self.last_surface
    }

    pub fn push_triangle(&mut self, class: PrimitiveClass, vertices: [BufferVertex; 3]) {
        self.push_primitive(class, &vertices);
    }

    pub fn push_quad(&mut self, class: PrimitiveClass, vertices: [BufferVertex; 4]) {
        let tessellated = [
            vertices[0],
            vertices[1],
            vertices[2],
            vertices[3],
            vertices[2],
            vertices[1],
        ];
        self.push_primitive(class, &tessellated);
    }

    pub fn push_clear_quad(&mut self, vertices: [BufferVertex; 4]) {
        self.opaque.extend([
            vertices[0],
            vertices[1],
            vertices[2],
            vertices[3],
            vertices[2],
            vertices[1],
        ]);
    }

    fn push_primitive(&mut self, class: PrimitiveClass, vertices: &[BufferVertex]) {
        debug_assert_eq!(vertices.len() % 3, 0);

        let semi_transparent = class.semi_transparency != SemiTransparentMode::None;

        if !class.mask_test {
            if class.textured {
                let buckets = if semi_transparent {
                    &mut self.semi_transparent_opaque
                } else {
                    &mut self.opaque_textured
                };
                let surface = self.last_surface as usize;
                if surface >= buckets.len() {
                    buckets.resize_with(surface + 1, Vec::new);
                }
                buckets[surface].extend_from_slice(vertices);
            } else {
                self.opaque.extend_from_slice(vertices);
            }
        }

        if class.mask_test || (class.textured && semi_transparent) {
            self.semi_transparent.extend_from_slice(vertices);

            let state = SemiTransparentState {
                surface: self.last_surface,
                mode: if class.textured {
                    class.semi_transparency
                } else {
                    SemiTransparentMode::None
                },
                textured: class.textured,
                masked: class.mask_test,
            };
            for _ in 0..vertices.len() / 3 {
                self.semi_transparent_state.push(state);
            }

            if class.mask_test && class.textured && semi_transparent {
                self.feedback = true;
            }
        }
    }

    /// Ordered-phase draw calls: maximal runs of identical state, except that
    /// programmable-blend primitives are emitted one at a time.
    pub fn semi_transparent_runs(
        &self,
    ) -> impl Iterator<Item = (Range<u32>, SemiTransparentState)> + '_ {
        let states = &self.semi_transparent_state;
        let mut start = 0;

        std::iter::from_fn(move || {
            if start >= states.len() {
                return None;
            }

            let state = states[start];
            let mut end = start + 1;
            if !state.is_programmable() {
                while end < states.len() && states[end] == state {
                    end += 1;
                }
            }

            let run = start as u32..end as u32;
            start = end;
            Some((run, state))
        })
    }

    pub fn reset(&mut self) {
        self.opaque.clear();
        self.opaque_textured.clear();
        self.semi_transparent_opaque.clear();
        self.semi_transparent.clear();
        self.semi_transparent_state.clear();
        self.surfaces.clear();
        self.feedback = false;
        self.last_surface = 0;
        self.primitive_index = 0;
    }
}

/// Converts a 15-bit VRAM color to packed RGBA8; bit 15 (the mask bit)
/// becomes the alpha channel.
#[must_use]
pub fn psx_color_to_rgba8(color: u16) -> u32 {
    let r = expand_5_to_8(color & 0x1F);
    let g = expand_5_to_8((color >> 5) & 0x1F);
    let b = expand_5_to_8((color >> 10) & 0x1F);
    let a = if color & 0x8000 != 0 { 0xFF } else { 0x00 };

    u32::from(r) | (u32::from(g) << 8) | (u32::from(b) << 16) | (a << 24)
}

fn expand_5_to_8(color: u16) -> u8 {
    ((f64::from(color) * 255.0 / 31.0).round()) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vertex(z: f32) -> BufferVertex {
        BufferVertex { position: [0.0, 0.0, z, 1.0], uv: [0.0, 0.0, 0.0], color: 0xFFFF_FFFF }
    }

    const OPAQUE_FLAT: PrimitiveClass = PrimitiveClass {
        textured: false,
        semi_transparency: SemiTransparentMode::None,
        mask_test: false,
    };

    #[test]
    fn depth_values_decrease_monotonically() {
        let mut queue = DrawQueue::new();

        let mut last = f32::INFINITY;
        for _ in 0..1000 {
            let z = queue.allocate_depth();
            assert!(z < last);
            assert!(z > 0.0);
            last = z;
        }
    }

    #[test]
    fn flat_opaque_routes_to_opaque_bucket_only() {
        let mut queue = DrawQueue::new();
        queue.push_triangle(OPAQUE_FLAT, [vertex(0.5); 3]);

        assert_eq!(queue.opaque.len(), 3);
        assert!(queue.semi_transparent.is_empty());
        assert!(queue.semi_transparent_state.is_empty());
        assert!(!queue.feedback);
    }

    #[test]
    fn textured_opaque_routes_to_surface_bucket() {
        let mut queue = DrawQueue::new();
        let class = PrimitiveClass { textured: true, ..OPAQUE_FLAT };

        queue.push_triangle(class, [vertex(0.5); 3]);

        assert_eq!(queue.opaque_textured.len(), 1);
        assert_eq!(queue.opaque_textured[0].len(), 3);
        assert!(queue.opaque.is_empty());
        assert!(queue.semi_transparent.is_empty());
    }

    #[test]
    fn textured_semi_transparent_is_duplicated_into_ordered_list() {
        let mut queue = DrawQueue::new();
        let class = PrimitiveClass {
            textured: true,
            semi_transparency: SemiTransparentMode::Add,
            mask_test: false,
        };

        queue.push_triangle(class, [vertex(0.5); 3]);

        assert_eq!(queue.semi_transparent_opaque[0].len(), 3);
        assert_eq!(queue.semi_transparent.len(), 3);
        assert_eq!(queue.semi_transparent_state.len(), 1);
        assert!(!queue.feedback);
    }

    #[test]
    fn mask_tested_primitives_skip_the_opaque_buckets() {
        let mut queue = DrawQueue::new();
        let class = PrimitiveClass { mask_test: true, ..OPAQUE_FLAT };

        queue.push_triangle(class, [vertex(0.5); 3]);

        assert!(queue.opaque.is_empty());
        assert_eq!(queue.semi_transparent.len(), 3);
        assert_eq!(
            queue.semi_transparent_state[0],
            SemiTransparentState {
                surface: 0,
                mode: SemiTransparentMode::None,
                textured: false,
                masked: true,
            }
        );
    }

    #[test]
    fn masked_textured_semi_transparent_sets_feedback() {
        let mut queue = DrawQueue::new();
        let class = PrimitiveClass {
            textured: true,
            semi_transparency: SemiTransparentMode::Average,
            mask_test: true,
        };

        queue.push_triangle(class, [vertex(0.5); 3]);

        assert!(queue.feedback);
        assert!(queue.semi_transparent_opaque.iter().all(Vec::is_empty));
    }

    #[test]
    fn quads_tessellate_into_two_triangles() {
        let mut queue = DrawQueue::new();
        let corners =
            [vertex(0.1), vertex(0.2), vertex(0.3), vertex(0.4)];

        queue.push_quad(OPAQUE_FLAT, corners);

        assert_eq!(queue.opaque.len(), 6);
        let zs: Vec<f32> = queue.opaque.iter().map(|v| v.position[2]).collect();
        assert_eq!(zs, vec![0.1, 0.2, 0.3, 0.4, 0.3, 0.2]);
    }

    #[test]
    fn identical_state_runs_batch_into_one_draw() {
        let mut queue = DrawQueue::new();
        let class = PrimitiveClass {
            textured: true,
            semi_transparency: SemiTransparentMode::Add,
            mask_test: false,
        };

        queue.push_quad(class, [vertex(0.5); 4]);
        queue.push_quad(class, [vertex(0.4); 4]);

        let runs: Vec<_> = queue.semi_transparent_runs().collect();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].0, 0..4);
        assert_eq!(queue.semi_transparent.len(), 12);
    }

    #[test]
    fn differing_state_splits_draws() {
        let mut queue = DrawQueue::new();
        let add = PrimitiveClass {
            textured: true,
            semi_transparency: SemiTransparentMode::Add,
            mask_test: false,
        };
        let average = PrimitiveClass {
            textured: true,
            semi_transparency: SemiTransparentMode::Average,
            mask_test: false,
        };

        queue.push_quad(add, [vertex(0.5); 4]);
        queue.push_quad(average, [vertex(0.4); 4]);

        let runs: Vec<_> = queue.semi_transparent_runs().collect();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].0, 0..2);
        assert_eq!(runs[1].0, 2..4);
    }

    #[test]
    fn programmable_primitives_are_never_batched() {
        let mut queue = DrawQueue::new();
        let class = PrimitiveClass {
            textured: true,
            semi_transparency: SemiTransparentMode::Add,
            mask_test: true,
        };

        queue.push_triangle(class, [vertex(0.5); 3]);
        queue.push_triangle(class, [vertex(0.4); 3]);
        queue.push_triangle(class, [vertex(0.3); 3]);

        let runs: Vec<_> = queue.semi_transparent_runs().collect();
        assert_eq!(runs.len(), 3);
        assert!(runs.iter().all(|(range, _)| range.end - range.start == 1));
    }

    #[test]
    fn surfaces_are_deduplicated() {
        let mut queue = DrawQueue::new();
        let surface = Surface {
            domain: Domain::Unscaled,
            texpage: (64, 0),
            clut: (0, 480),
            mode: TextureMode::Palette4bpp,
            window_mask: (0xFF, 0xFF),
            window_offset: (0, 0),
        };

        assert_eq!(queue.intern_surface(surface), 0);
        assert_eq!(queue.intern_surface(surface), 0);
        assert_eq!(
            queue.intern_surface(Surface { texpage: (128, 0), ..surface }),
            1
        );
        assert_eq!(queue.surfaces.len(), 2);
    }

    #[test]
    fn reset_clears_everything() {
        let mut queue = DrawQueue::new();
        let class = PrimitiveClass {
            textured: true,
            semi_transparency: SemiTransparentMode::Add,
            mask_test: true,
        };
        queue.push_quad(class, [vertex(0.5); 4]);
        let _ = queue.allocate_depth();

        queue.reset();

        assert!(queue.is_empty());
        assert!(!queue.feedback);
        assert_eq!(queue.primitive_index(), 0);
        assert!(queue.surfaces.is_empty());
    }

    #[test]
    fn mask_bit_maps_to_alpha() {
        assert_eq!(psx_color_to_rgba8(0x8000) >> 24, 0xFF);
        assert_eq!(psx_color_to_rgba8(0x7FFF) >> 24, 0x00);
        assert_eq!(psx_color_to_rgba8(0x001F) & 0xFF, 0xFF);
    }
}
