//! Viewport resampling.
//!
//! Picks which pool frames to show for a given display width and maps each to
//! its sprite cell. Resampling is pure and cheap; it runs on every layout
//! change and never touches the decoder or the cache.

use std::time::{Duration, Instant};

use crate::{
    pool::FramePool,
    sprite::{SpriteSheet, cell_for_index},
};

/// One thumbnail slot of the rendered filmstrip.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayFrame {
    /// Position in the strip, contiguous from 0.
    pub display_index: usize,
    /// Pool frame shown in this slot.
    pub source_index: usize,
    /// Sprite row of `source_index`.
    pub grid_row: usize,
    /// Sprite column of `source_index`.
    pub grid_col: usize,
    /// Slot width in display pixels.
    pub display_width: f64,
    /// Slot height in display pixels.
    pub display_height: f64,
    /// `display_height / frame_height`, the factor applied to sprite pixels.
    pub scale: f64,
}

/// Select evenly spaced pool frames that fill `display_width` pixels.
///
/// The first slot always shows frame 0 and, when more than one slot fits,
/// the last slot shows the final pool frame. Returns an empty vector for a
/// zero width, an empty sprite, or a pool without frames.
///
/// ```
/// use std::time::Duration;
///
/// use filmstrip::{FramePool, SpriteSheet, resample};
///
/// let pool = FramePool {
///     total_frames: 23,
///     aspect_ratio: 16.0 / 9.0,
///     frame_width: 107,
///     frame_height: 60,
///     duration: Duration::from_secs(120),
///     created_at: 0,
///     has_audio: None,
/// };
/// let sprite = SpriteSheet { image: vec![0xFF], rows: 3, cols: 10, frame_width: 107, frame_height: 60 };
///
/// let frames = resample(&pool, &sprite, 300, 60);
/// assert_eq!(frames.len(), 3);
/// assert_eq!(frames[0].source_index, 0);
/// assert_eq!((frames[2].source_index, frames[2].grid_row, frames[2].grid_col), (22, 2, 2));
/// ```
pub fn resample(
    pool: &FramePool,
    sprite: &SpriteSheet,
    display_width: u32,
    thumbnail_height: u32,
) -> Vec<DisplayFrame> {
    if display_width == 0 || thumbnail_height == 0 || sprite.is_empty() || pool.total_frames == 0 {
        return Vec::new();
    }

    let display_height = f64::from(thumbnail_height);
    let display_frame_width = display_height * pool.aspect_ratio;
    if !display_frame_width.is_finite() || display_frame_width <= 0.0 {
        return Vec::new();
    }
    let scale = display_height / f64::from(pool.frame_height.max(1));

    let needed = ((f64::from(display_width) / display_frame_width).ceil() as usize).max(1);
    let actual = needed.min(pool.total_frames);
    let last = pool.total_frames - 1;
    let span = actual.saturating_sub(1).max(1);

    (0..actual)
        .map(|display_index| {
            // floor(i / span * last), in integers so exact multiples never round down.
            let source_index = (display_index * last / span).min(last);
            let (grid_row, grid_col) = cell_for_index(source_index, sprite.cols);
            DisplayFrame {
                display_index,
                source_index,
                grid_row,
                grid_col,
                display_width: display_frame_width,
                display_height,
                scale,
            }
        })
        .collect()
}

/// Rate-limited resampling for bursts of resize events.
///
/// The first request in an interval runs immediately. Later requests inside
/// the same interval only record their width; [`poll`](Self::poll) runs the
/// latest one once the interval has passed. Requests without a ready pool or
/// with a zero width leave the previous output untouched.
#[derive(Debug, Clone)]
pub struct ViewportResampler {
    interval: Duration,
    thumbnail_height: u32,
    last_run: Option<Instant>,
    pending_width: Option<u32>,
    frames: Vec<DisplayFrame>,
}

impl ViewportResampler {
    /// Create a resampler running at most once per `interval`.
    pub fn new(thumbnail_height: u32, interval: Duration) -> Self {
        Self {
            interval,
            thumbnail_height,
            last_run: None,
            pending_width: None,
            frames: Vec::new(),
        }
    }

    /// The most recent output.
    pub fn frames(&self) -> &[DisplayFrame] {
        &self.frames
    }

    /// Returns `true` if a coalesced request is waiting for [`poll`](Self::poll).
    pub fn has_pending(&self) -> bool {
        self.pending_width.is_some()
    }

    /// Handle a viewport change to `width`.
    ///
    /// Returns `true` if the output was recomputed.
    pub fn request(
        &mut self,
        pool: Option<(&FramePool, &SpriteSheet)>,
        width: u32,
        now: Instant,
    ) -> bool {
        if self
            .last_run
            .is_some_and(|last| now.saturating_duration_since(last) < self.interval)
        {
            self.pending_width = Some(width);
            return false;
        }
        self.pending_width = None;
        self.run(pool, width, now)
    }

    /// Run the coalesced request if its interval has elapsed.
    ///
    /// Returns `true` if the output was recomputed.
    pub fn poll(&mut self, pool: Option<(&FramePool, &SpriteSheet)>, now: Instant) -> bool {
        let Some(width) = self.pending_width else {
            return false;
        };
        if self
            .last_run
            .is_some_and(|last| now.saturating_duration_since(last) < self.interval)
        {
            return false;
        }
        self.pending_width = None;
        self.run(pool, width, now)
    }

    fn run(&mut self, pool: Option<(&FramePool, &SpriteSheet)>, width: u32, now: Instant) -> bool {
        let Some((pool, sprite)) = pool else {
            log::debug!("Resize to {width}px ignored: no frame pool ready");
            return false;
        };
        if width == 0 {
            return false;
        }
        let frames = resample(pool, sprite, width, self.thumbnail_height);
        if frames.is_empty() {
            return false;
        }
        self.last_run = Some(now);
        self.frames = frames;
        true
    }
}
