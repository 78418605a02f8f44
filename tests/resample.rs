//! Viewport resampling tests.

use std::time::{Duration, Instant};

use filmstrip::{FramePool, SpriteSheet, ViewportResampler, cell_for_index, resample};

fn pool(total_frames: usize, aspect_ratio: f64, frame_height: u32) -> FramePool {
    FramePool {
        total_frames,
        aspect_ratio,
        frame_width: (f64::from(frame_height) * aspect_ratio).round() as u32,
        frame_height,
        duration: Duration::from_secs(120),
        created_at: 0,
        has_audio: None,
    }
}

fn sprite(total_frames: usize, cols: usize) -> SpriteSheet {
    SpriteSheet {
        image: vec![0xFF, 0xD8, 0xFF, 0xD9],
        rows: total_frames.div_ceil(cols),
        cols,
        frame_width: 60,
        frame_height: 60,
    }
}

// ── Index selection ────────────────────────────────────────────────

#[test]
fn full_width_selects_every_frame_once_in_order() {
    let pool = pool(23, 1.0, 60);
    let frames = resample(&pool, &sprite(23, 10), 23 * 60, 60);

    let indices: Vec<usize> = frames.iter().map(|frame| frame.source_index).collect();
    assert_eq!(indices, (0..23).collect::<Vec<_>>());
    let display: Vec<usize> = frames.iter().map(|frame| frame.display_index).collect();
    assert_eq!(display, (0..23).collect::<Vec<_>>());
}

#[test]
fn wider_than_pool_is_capped_at_total_frames() {
    let frames = resample(&pool(12, 1.0, 60), &sprite(12, 10), 10_000, 60);
    assert_eq!(frames.len(), 12);
}

#[test]
fn single_slot_shows_first_frame() {
    let frames = resample(&pool(23, 1.0, 60), &sprite(23, 10), 1, 60);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].source_index, 0);
}

#[test]
fn endpoints_are_always_selected() {
    let total = 27;
    for actual in 2..=total {
        let frames = resample(&pool(total, 1.0, 60), &sprite(total, 10), actual as u32 * 60, 60);
        assert_eq!(frames.len(), actual);
        assert_eq!(frames.first().unwrap().source_index, 0);
        assert_eq!(frames.last().unwrap().source_index, total - 1);
        assert!(
            frames
                .windows(2)
                .all(|pair| pair[0].source_index < pair[1].source_index),
            "{actual} slots"
        );
    }
}

#[test]
fn needed_count_rounds_up() {
    // 16:9 at 60px is 106.67px per slot.
    let frames = resample(&pool(27, 16.0 / 9.0, 60), &sprite(27, 10), 1000, 60);
    assert_eq!(frames.len(), 10);
}

// ── Grid mapping & geometry ────────────────────────────────────────

#[test]
fn each_slot_maps_to_its_sprite_cell() {
    let frames = resample(&pool(37, 1.0, 60), &sprite(37, 10), 20 * 60, 60);
    for frame in &frames {
        assert_eq!(
            (frame.grid_row, frame.grid_col),
            cell_for_index(frame.source_index, 10)
        );
    }
    assert_eq!(frames.last().unwrap().source_index, 36);
    assert_eq!(
        (frames.last().unwrap().grid_row, frames.last().unwrap().grid_col),
        (3, 6)
    );
}

#[test]
fn geometry_follows_thumbnail_height() {
    // Pool rasterized at twice the display density.
    let frames = resample(&pool(10, 2.0, 120), &sprite(10, 10), 500, 60);
    let frame = frames[0];
    assert_eq!(frame.display_height, 60.0);
    assert_eq!(frame.display_width, 120.0);
    assert_eq!(frame.scale, 0.5);
}

// ── Degenerate input ───────────────────────────────────────────────

#[test]
fn zero_width_or_empty_sprite_yields_nothing() {
    let pool = pool(10, 1.0, 60);
    assert!(resample(&pool, &sprite(10, 10), 0, 60).is_empty());
    assert!(resample(&pool, &SpriteSheet::empty(), 600, 60).is_empty());
    assert!(resample(&pool, &sprite(10, 10), 600, 0).is_empty());
}

#[test]
fn resampling_is_pure() {
    let pool = pool(30, 1.5, 60);
    let sheet = sprite(30, 10);
    assert_eq!(resample(&pool, &sheet, 777, 60), resample(&pool, &sheet, 777, 60));
}

// ── Rate-limited resampler ─────────────────────────────────────────

#[test]
fn first_request_runs_immediately() {
    let pool = pool(20, 1.0, 60);
    let sheet = sprite(20, 10);
    let mut resampler = ViewportResampler::new(60, Duration::from_millis(16));

    assert!(resampler.request(Some((&pool, &sheet)), 300, Instant::now()));
    assert_eq!(resampler.frames().len(), 5);
}

#[test]
fn burst_is_coalesced_to_latest_width() {
    let pool = pool(20, 1.0, 60);
    let sheet = sprite(20, 10);
    let mut resampler = ViewportResampler::new(60, Duration::from_millis(16));
    let start = Instant::now();

    assert!(resampler.request(Some((&pool, &sheet)), 300, start));
    assert!(!resampler.request(Some((&pool, &sheet)), 420, start + Duration::from_millis(4)));
    assert!(!resampler.request(Some((&pool, &sheet)), 600, start + Duration::from_millis(8)));
    assert!(resampler.has_pending());
    assert_eq!(resampler.frames().len(), 5);

    assert!(!resampler.poll(Some((&pool, &sheet)), start + Duration::from_millis(10)));
    assert!(resampler.poll(Some((&pool, &sheet)), start + Duration::from_millis(16)));
    assert_eq!(resampler.frames().len(), 10);
    assert!(!resampler.has_pending());
    assert!(!resampler.poll(Some((&pool, &sheet)), start + Duration::from_millis(40)));
}

#[test]
fn requests_without_pool_keep_previous_output() {
    let pool = pool(20, 1.0, 60);
    let sheet = sprite(20, 10);
    let mut resampler = ViewportResampler::new(60, Duration::from_millis(16));
    let start = Instant::now();

    assert!(!resampler.request(None, 300, start));
    assert!(resampler.frames().is_empty());

    assert!(resampler.request(Some((&pool, &sheet)), 300, start));
    let before = resampler.frames().to_vec();

    assert!(!resampler.request(None, 900, start + Duration::from_millis(50)));
    assert!(!resampler.request(Some((&pool, &sheet)), 0, start + Duration::from_millis(100)));
    assert_eq!(resampler.frames(), before.as_slice());
}
