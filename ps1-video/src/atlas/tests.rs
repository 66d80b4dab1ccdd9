use super::*;

#[derive(Debug, Default)]
struct RecordingListener {
    hazards: Vec<StatusFlags>,
    resolves: Vec<(Domain, u32, u32)>,
    flushes: Vec<RenderPassState>,
    discards: u32,
    uploads: Vec<(Domain, Rect, u32, u32)>,
    clear_quads: Vec<(Rect, u16)>,
}

impl HazardListener for RecordingListener {
    fn hazard(&mut self, flags: StatusFlags) {
        self.hazards.push(flags);
    }

    fn resolve(&mut self, domain: Domain, block_x: u32, block_y: u32) {
        self.resolves.push((domain, block_x, block_y));
    }

    fn flush_render_pass(&mut self, pass: &RenderPassState) {
        self.flushes.push(*pass);
    }

    fn discard_render_pass(&mut self) {
        self.discards += 1;
    }

    fn upload_texture(&mut self, domain: Domain, rect: Rect, off_x: u32, off_y: u32) {
        self.uploads.push((domain, rect, off_x, off_y));
    }

    fn clear_quad(&mut self, rect: Rect, color: u16) {
        self.clear_quads.push((rect, color));
    }
}

fn random_rect() -> Rect {
    let x = rand::random::<u32>() % VRAM_WIDTH;
    let y = rand::random::<u32>() % VRAM_HEIGHT;
    let width = 1 + rand::random::<u32>() % (VRAM_WIDTH - x);
    let height = 1 + rand::random::<u32>() % (VRAM_HEIGHT - y);
    Rect::new(x, y, width, height)
}

fn random_domain() -> Domain {
    if rand::random() {
        Domain::Unscaled
    } else {
        Domain::Scaled
    }
}

fn apply_random_op(atlas: &mut VramAtlas, listener: &mut RecordingListener) {
    let rect = random_rect();
    match rand::random::<u32>() % 6 {
        0 => atlas.read_compute(random_domain(), rect, listener),
        1 => atlas.write_compute(random_domain(), rect, listener),
        2 => atlas.read_transfer(random_domain(), rect, listener),
        3 => atlas.write_transfer(random_domain(), rect, listener),
        4 => {
            atlas.read_texture(rect, listener);
        }
        _ => atlas.sync_domain(random_domain(), rect, listener),
    }
}

fn blocks_of(rect: Rect) -> Vec<(u32, u32)> {
    blocks(rect).collect()
}

#[test]
fn fresh_atlas_prefers_native_store() {
    let atlas = VramAtlas::new();

    for _ in 0..100 {
        assert_eq!(atlas.find_suitable_domain(random_rect()), Domain::Unscaled);
    }
}

#[test]
fn sync_domain_establishes_ownership() {
    for _ in 0..200 {
        let mut atlas = VramAtlas::new();
        let mut listener = RecordingListener::default();

        for _ in 0..20 {
            apply_random_op(&mut atlas, &mut listener);
        }

        let domain = random_domain();
        let rect = random_rect();
        atlas.sync_domain(domain, rect, &mut listener);

        let allowed = match domain {
            Domain::Unscaled => [Ownership::FbOnly, Ownership::FbPrefer],
            Domain::Scaled => [Ownership::SfbOnly, Ownership::SfbPrefer],
        };
        for (x, y) in blocks_of(rect) {
            assert!(
                allowed.contains(&atlas.block_ownership(x, y)),
                "block ({x}, {y}) owned by {:?} after sync of {domain:?}",
                atlas.block_ownership(x, y),
            );
        }
    }
}

#[test]
fn sync_domain_is_idempotent() {
    for _ in 0..50 {
        let mut atlas = VramAtlas::new();
        let mut listener = RecordingListener::default();

        for _ in 0..10 {
            apply_random_op(&mut atlas, &mut listener);
        }

        let domain = random_domain();
        let rect = random_rect();
        atlas.sync_domain(domain, rect, &mut listener);

        let hazards = listener.hazards.len();
        let resolves = listener.resolves.len();
        atlas.sync_domain(domain, rect, &mut listener);

        assert_eq!(listener.hazards.len(), hazards);
        assert_eq!(listener.resolves.len(), resolves);
    }
}

#[test]
fn pipeline_barrier_clears_matching_flags() {
    for _ in 0..100 {
        let mut atlas = VramAtlas::new();
        let mut listener = RecordingListener::default();

        for _ in 0..20 {
            apply_random_op(&mut atlas, &mut listener);
        }

        let mask = match rand::random::<u32>() % 4 {
            0 => StatusFlags::COMPUTE_FB_WRITE,
            1 => StatusFlags::FB_WRITE | StatusFlags::FB_READ,
            2 => StatusFlags::SFB_WRITE | StatusFlags::SFB_READ,
            _ => atlas.hazard_union(),
        };
        if mask.is_empty() {
            continue;
        }

        atlas.pipeline_barrier(mask, &mut listener);

        assert!(!atlas.hazard_union().intersects(mask));
    }
}

#[test]
fn find_suitable_domain_matches_ownership_predicate() {
    for _ in 0..100 {
        let mut atlas = VramAtlas::new();
        let mut listener = RecordingListener::default();

        for _ in 0..20 {
            apply_random_op(&mut atlas, &mut listener);
        }

        let rect = random_rect();
        let any_native = blocks_of(rect).into_iter().any(|(x, y)| {
            matches!(atlas.block_ownership(x, y), Ownership::FbOnly | Ownership::FbPrefer)
        });
        let expected = if any_native { Domain::Unscaled } else { Domain::Scaled };

        assert_eq!(atlas.find_suitable_domain(rect), expected);
    }
}

#[test]
fn disjoint_accesses_never_barrier() {
    let mut atlas = VramAtlas::new();
    let mut listener = RecordingListener::default();

    let left = Rect::new(0, 0, 256, 256);
    let right = Rect::new(512, 256, 256, 256);

    atlas.write_compute(Domain::Unscaled, left, &mut listener);
    atlas.write_compute(Domain::Unscaled, right, &mut listener);
    atlas.read_compute(Domain::Unscaled, Rect::new(512, 256, 64, 64), &mut listener);

    // The read sees only its own region's fresh write hazard, which is the
    // one conflict in this sequence.
    assert_eq!(listener.hazards.len(), 1);

    let mut atlas = VramAtlas::new();
    let mut listener = RecordingListener::default();
    atlas.write_compute(Domain::Unscaled, left, &mut listener);
    atlas.write_compute(Domain::Unscaled, right, &mut listener);

    assert!(listener.hazards.is_empty());
}

#[test]
fn compute_write_then_texture_read_barriers_exactly_once() {
    let mut atlas = VramAtlas::new();
    let mut listener = RecordingListener::default();

    let rect = Rect::new(64, 64, 16, 16);
    atlas.write_compute(Domain::Unscaled, rect, &mut listener);
    assert!(listener.hazards.is_empty());

    let domain = atlas.read_texture(rect, &mut listener);

    assert_eq!(domain, Domain::Unscaled);
    assert_eq!(listener.hazards, vec![StatusFlags::COMPUTE_FB_WRITE]);
    assert!(listener.resolves.is_empty());
}

#[test]
fn scanout_after_flush_needs_no_barrier() {
    let mut atlas = VramAtlas::new();
    let mut listener = RecordingListener::default();

    let rect = Rect::new(0, 0, 320, 240);
    atlas.set_draw_rect(rect, &mut listener);
    atlas.write_fragment(&mut listener);
    atlas.flush_render_pass(&mut listener);

    let hazards = listener.hazards.len();
    atlas.read_fragment(rect, &mut listener);

    // Same-pass rules exclude fragment-fragment ordering; visibility comes
    // from the post-pass barrier the flush recorded.
    assert_eq!(listener.hazards.len(), hazards);
    assert!(listener.resolves.is_empty());
}

#[test]
fn same_draw_rect_extends_pass() {
    let mut atlas = VramAtlas::new();
    let mut listener = RecordingListener::default();

    let rect = Rect::new(0, 0, 256, 240);
    atlas.set_draw_rect(rect, &mut listener);
    atlas.write_fragment(&mut listener);
    atlas.set_draw_rect(rect, &mut listener);
    atlas.write_fragment(&mut listener);

    assert!(listener.flushes.is_empty());
    assert!(atlas.render_pass_open());

    atlas.flush_render_pass(&mut listener);
    assert_eq!(listener.flushes.len(), 1);
}

#[test]
fn changed_draw_rect_flushes_pass() {
    let mut atlas = VramAtlas::new();
    let mut listener = RecordingListener::default();

    atlas.set_draw_rect(Rect::new(0, 0, 256, 240), &mut listener);
    atlas.write_fragment(&mut listener);
    atlas.set_draw_rect(Rect::new(256, 0, 256, 240), &mut listener);
    atlas.write_fragment(&mut listener);

    assert_eq!(listener.flushes.len(), 1);
    assert!(atlas.render_pass_open());

    atlas.flush_render_pass(&mut listener);
    assert_eq!(listener.flushes.len(), 2);
}

#[test]
fn cpu_write_after_scaled_draw_resolves_blocks() {
    let mut atlas = VramAtlas::new();
    let mut listener = RecordingListener::default();

    let draw_rect = Rect::new(0, 0, 64, 64);
    atlas.set_draw_rect(draw_rect, &mut listener);
    atlas.write_fragment(&mut listener);
    atlas.flush_render_pass(&mut listener);

    listener.hazards.clear();
    let copy_rect = Rect::new(0, 0, 16, 16);
    atlas.write_compute(Domain::Unscaled, copy_rect, &mut listener);

    // Each dirty block resolves back to the native store.
    let expected: Vec<(Domain, u32, u32)> = blocks_of(copy_rect)
        .into_iter()
        .map(|(x, y)| (Domain::Unscaled, x, y))
        .collect();
    assert_eq!(listener.resolves, expected);

    // The pass's color writes must complete before the downsample reads them.
    assert!(listener.hazards[0].intersects(StatusFlags::FRAGMENT_SFB_WRITE));

    for (x, y) in blocks_of(copy_rect) {
        assert_eq!(atlas.block_ownership(x, y), Ownership::FbOnly);
    }
}

#[test]
fn self_clear_discards_open_pass_and_sets_clean_clear() {
    let mut atlas = VramAtlas::new();
    let mut listener = RecordingListener::default();

    let rect = Rect::new(0, 0, 320, 240);
    atlas.set_draw_rect(rect, &mut listener);
    atlas.write_fragment(&mut listener);
    assert!(atlas.render_pass_open());

    atlas.clear_rect(rect, 0x001F, &mut listener);

    assert_eq!(listener.discards, 1);
    assert!(atlas.render_pass_open());

    atlas.write_fragment(&mut listener);
    atlas.flush_render_pass(&mut listener);

    assert_eq!(listener.flushes.len(), 1);
    assert!(listener.flushes[0].clean_clear);
    assert_eq!(listener.flushes[0].clear_color, 0x001F);
}

#[test]
fn clear_without_open_pass_is_clean() {
    let mut atlas = VramAtlas::new();
    let mut listener = RecordingListener::default();

    let rect = Rect::new(0, 0, 320, 240);
    atlas.set_draw_rect(rect, &mut listener);
    atlas.clear_rect(rect, 0x7C00, &mut listener);

    assert_eq!(listener.discards, 0);
    assert!(atlas.render_pass_open());

    atlas.flush_render_pass(&mut listener);
    assert!(listener.flushes[0].clean_clear);
    assert_eq!(listener.flushes[0].clear_color, 0x7C00);
}

#[test]
fn clear_of_other_rect_queues_degenerate_quad() {
    let mut atlas = VramAtlas::new();
    let mut listener = RecordingListener::default();

    atlas.set_draw_rect(Rect::new(0, 0, 320, 240), &mut listener);
    atlas.write_fragment(&mut listener);

    let clear = Rect::new(32, 32, 64, 64);
    atlas.clear_rect(clear, 0x03E0, &mut listener);

    assert_eq!(listener.clear_quads, vec![(clear, 0x03E0)]);
    assert_eq!(listener.discards, 0);
    assert!(atlas.render_pass_open());
    assert!(listener.flushes.is_empty());
}

#[test]
fn zero_area_rects_are_noops() {
    let mut atlas = VramAtlas::new();
    let mut listener = RecordingListener::default();

    let empty = Rect::new(10, 10, 0, 5);
    atlas.read_compute(Domain::Unscaled, empty, &mut listener);
    atlas.write_compute(Domain::Scaled, empty, &mut listener);
    atlas.sync_domain(Domain::Scaled, empty, &mut listener);
    atlas.clear_rect(empty, 0, &mut listener);

    assert!(listener.hazards.is_empty());
    assert!(listener.resolves.is_empty());
    assert!(listener.flushes.is_empty());
    assert!(listener.clear_quads.is_empty());
    assert!(atlas.hazard_union().is_empty());
}

#[test]
fn edge_straddling_rect_clips_to_grid() {
    let mut atlas = VramAtlas::new();
    let mut listener = RecordingListener::default();

    // Extends past both VRAM edges
    let rect = Rect::new(1020, 508, 16, 16);
    atlas.write_compute(Domain::Unscaled, rect, &mut listener);

    assert_eq!(atlas.block_ownership(NUM_BLOCKS_X - 1, NUM_BLOCKS_Y - 1), Ownership::FbOnly);
    assert!(atlas
        .block_hazards(NUM_BLOCKS_X - 1, NUM_BLOCKS_Y - 1)
        .intersects(StatusFlags::COMPUTE_FB_WRITE));
}

#[test]
#[should_panic(expected = "outside")]
fn rect_origin_outside_vram_panics() {
    let mut atlas = VramAtlas::new();
    let mut listener = RecordingListener::default();
    atlas.write_compute(Domain::Unscaled, Rect::new(1024, 0, 8, 8), &mut listener);
}

#[test]
fn texture_window_overlapping_pass_forces_flush() {
    let mut atlas = VramAtlas::new();
    let mut listener = RecordingListener::default();

    let draw_rect = Rect::new(0, 0, 256, 256);
    atlas.set_draw_rect(draw_rect, &mut listener);
    atlas.write_fragment(&mut listener);
    assert!(listener.flushes.is_empty());

    atlas.set_texture_mode(TextureMode::Abgr1555);
    atlas.set_texture_offset(0, 0);
    atlas.set_texture_window(Rect::new(0, 0, 256, 256));
    atlas.write_fragment(&mut listener);

    assert_eq!(listener.flushes.len(), 1);
    assert!(atlas.render_pass_open());
    assert_eq!(listener.uploads.len(), 1);
}

#[test]
fn texture_read_outside_pass_does_not_flush() {
    let mut atlas = VramAtlas::new();
    let mut listener = RecordingListener::default();

    atlas.set_draw_rect(Rect::new(0, 0, 128, 128), &mut listener);
    atlas.write_fragment(&mut listener);

    atlas.set_texture_mode(TextureMode::Abgr1555);
    atlas.set_texture_offset(512, 256);
    atlas.set_texture_window(Rect::new(0, 0, 256, 256));
    atlas.write_fragment(&mut listener);

    assert!(listener.flushes.is_empty());
    assert_eq!(listener.uploads.len(), 1);
    let (domain, rect, _, _) = listener.uploads[0];
    assert_eq!(domain, Domain::Unscaled);
    assert_eq!(rect, Rect::new(512, 256, 256, 256));
}

#[test]
fn palette_mode_reads_clut_strip() {
    let mut atlas = VramAtlas::new();
    let mut listener = RecordingListener::default();

    atlas.set_draw_rect(Rect::new(0, 0, 64, 64), &mut listener);
    atlas.set_texture_mode(TextureMode::Palette4bpp);
    atlas.set_texture_offset(640, 0);
    atlas.set_palette_offset(512, 480);
    atlas.set_texture_window(Rect::new(0, 0, 256, 256));
    atlas.write_fragment(&mut listener);

    // 4bpp: 256 texels pack into 64 halfwords
    let (_, rect, _, _) = listener.uploads[0];
    assert_eq!(rect, Rect::new(640, 0, 64, 256));

    // CLUT strip read marks its block
    assert!(atlas.block_hazards(512 / BLOCK_WIDTH, 480 / BLOCK_HEIGHT)
        .intersects(StatusFlags::COMPUTE_FB_READ));
}

#[test]
fn blit_prefers_scaled_store_when_both_scaled() {
    let mut atlas = VramAtlas::new();
    let mut listener = RecordingListener::default();

    let src = Rect::new(0, 0, 64, 64);
    let dst = Rect::new(128, 0, 64, 64);

    // Render into both regions so they become scaled-only.
    for rect in [src, dst] {
        atlas.set_draw_rect(rect, &mut listener);
        atlas.write_fragment(&mut listener);
        atlas.flush_render_pass(&mut listener);
    }

    assert_eq!(atlas.blit_vram(dst, src, &mut listener), Domain::Scaled);
    assert!(listener.resolves.is_empty());
}

#[test]
fn blit_falls_back_to_native_store() {
    let mut atlas = VramAtlas::new();
    let mut listener = RecordingListener::default();

    let src = Rect::new(0, 0, 64, 64);
    let dst = Rect::new(128, 0, 64, 64);

    assert_eq!(atlas.blit_vram(dst, src, &mut listener), Domain::Unscaled);
}

#[test]
fn flush_marks_draw_rect_scaled_only() {
    let mut atlas = VramAtlas::new();
    let mut listener = RecordingListener::default();

    let rect = Rect::new(64, 64, 128, 64);
    atlas.set_draw_rect(rect, &mut listener);
    atlas.write_fragment(&mut listener);
    atlas.flush_render_pass(&mut listener);

    for (x, y) in blocks_of(rect) {
        assert_eq!(atlas.block_ownership(x, y), Ownership::SfbOnly);
        assert!(atlas.block_hazards(x, y).intersects(StatusFlags::FRAGMENT_SFB_WRITE));
    }
}

#[test]
fn compute_access_inside_open_pass_flushes_first() {
    let mut atlas = VramAtlas::new();
    let mut listener = RecordingListener::default();

    let rect = Rect::new(0, 0, 128, 128);
    atlas.set_draw_rect(rect, &mut listener);
    atlas.write_fragment(&mut listener);

    atlas.write_compute(Domain::Unscaled, Rect::new(32, 32, 8, 8), &mut listener);

    assert_eq!(listener.flushes.len(), 1);
    assert!(!atlas.render_pass_open());
}

#[test]
fn transfer_hazards_reach_listener_as_compute() {
    let mut atlas = VramAtlas::new();
    let mut listener = RecordingListener::default();

    let rect = Rect::new(0, 0, 32, 32);
    atlas.write_transfer(Domain::Unscaled, rect, &mut listener);
    atlas.read_compute(Domain::Unscaled, rect, &mut listener);

    assert_eq!(listener.hazards.len(), 1);
    assert!(listener.hazards[0].intersects(StatusFlags::COMPUTE_FB_WRITE));
    assert!(!listener.hazards[0].intersects(StatusFlags::TRANSFER_ANY));
}

#[test]
fn ownership_stays_valid_under_random_operations() {
    let mut atlas = VramAtlas::new();
    let mut listener = RecordingListener::default();

    for _ in 0..500 {
        apply_random_op(&mut atlas, &mut listener);
    }

    // Every block decodes to exactly one of the four ownership values; the
    // accessor would have no representation for anything else.
    for y in 0..NUM_BLOCKS_Y {
        for x in 0..NUM_BLOCKS_X {
            let ownership = atlas.block_ownership(x, y);
            assert!(matches!(
                ownership,
                Ownership::FbOnly
                    | Ownership::SfbOnly
                    | Ownership::FbPrefer
                    | Ownership::SfbPrefer
            ));
        }
    }
}
