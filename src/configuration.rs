//! Filmstrip configuration.
//!
//! [`FilmstripOptions`] is a builder that threads layout constants, extraction
//! tuning, cache lifetimes, progress callbacks, and cancellation through the
//! pipeline without polluting every function signature.
//!
//! # Example
//!
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//!
//! use filmstrip::{ExtractionStrategy, FilmstripOptions, ProgressCallback, ProgressInfo};
//!
//! struct LogProgress;
//! impl ProgressCallback for LogProgress {
//!     fn on_progress(&self, info: &ProgressInfo) {
//!         println!("{:?}: {} done", info.operation, info.current);
//!     }
//! }
//!
//! let options = FilmstripOptions::new()
//!     .with_thumbnail_height(48)
//!     .with_strategy(ExtractionStrategy::Serial)
//!     .with_seek_timeout(Duration::from_secs(2))
//!     .with_progress(Arc::new(LogProgress));
//! ```

use std::{
    fmt::{Debug, Display, Formatter, Result as FmtResult},
    str::FromStr,
    sync::Arc,
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::progress::{CancellationToken, NoOpProgress, ProgressCallback};

/// Default display height of one filmstrip thumbnail, in CSS-style pixels.
pub const DEFAULT_THUMBNAIL_HEIGHT: u32 = 60;
/// Default widest layout the pool must serve without re-extraction.
pub const DEFAULT_MAX_ANTICIPATED_WIDTH: u32 = 1920;
/// Default lifetime of a cached frame pool record.
pub const DEFAULT_POOL_TTL: Duration = Duration::from_secs(7200);
/// Default lifetime of a cached sprite sheet record.
pub const DEFAULT_SPRITE_TTL: Duration = Duration::from_secs(3600);
/// Default JPEG quality of the packed sprite (1-100).
pub const DEFAULT_SPRITE_QUALITY: u8 = 10;
/// Default number of sprite columns.
pub const DEFAULT_SPRITE_COLUMNS: usize = 10;
/// Current on-disk layout of cache records.
pub const CACHE_SCHEMA_VERSION: u32 = 1;

/// How the frame sampler drives its decode contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionStrategy {
    /// One decode context, seeks strictly in index order.
    Serial,
    /// A pool of decode contexts draining a shared work queue.
    #[default]
    Concurrent,
}

impl ExtractionStrategy {
    /// Short, stable name used in cache keys and CLI flags.
    pub fn as_str(self) -> &'static str {
        match self {
            ExtractionStrategy::Serial => "serial",
            ExtractionStrategy::Concurrent => "concurrent",
        }
    }
}

impl Display for ExtractionStrategy {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExtractionStrategy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "serial" | "sequential" => Ok(ExtractionStrategy::Serial),
            "concurrent" | "parallel" | "pooled" => Ok(ExtractionStrategy::Concurrent),
            other => Err(format!("unknown extraction strategy: {other}")),
        }
    }
}

/// Output size of rasterized frames.
///
/// When no dimensions are set the source resolution is used. Setting only one
/// dimension computes the other from the source aspect ratio.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameOutputOptions {
    /// Target width. `None` derives it from the height (or the source).
    pub width: Option<u32>,
    /// Target height. `None` derives it from the width (or the source).
    pub height: Option<u32>,
}

impl FrameOutputOptions {
    /// Output frames of the given height, width following the aspect ratio.
    pub fn with_height(height: u32) -> Self {
        Self {
            width: None,
            height: Some(height),
        }
    }

    /// Resolve the final output dimensions given the source size.
    ///
    /// Returns `(width, height)`; both are at least 1.
    pub fn resolve_dimensions(&self, source_width: u32, source_height: u32) -> (u32, u32) {
        let (width, height) = match (self.width, self.height) {
            (Some(w), Some(h)) => (w, h),
            (Some(w), None) if source_width > 0 => {
                let ratio = w as f64 / source_width as f64;
                (w, (source_height as f64 * ratio).round() as u32)
            }
            (None, Some(h)) if source_height > 0 => {
                let ratio = h as f64 / source_height as f64;
                ((source_width as f64 * ratio).round() as u32, h)
            }
            (Some(w), None) => (w, source_height),
            (None, Some(h)) => (source_width, h),
            (None, None) => (source_width, source_height),
        };
        (width.max(1), height.max(1))
    }
}

/// Configuration for a filmstrip session.
///
/// All fields have sensible defaults; see the `DEFAULT_*` constants.
#[derive(Clone)]
pub struct FilmstripOptions {
    /// Display height of one thumbnail.
    pub(crate) thumbnail_height: u32,
    /// Rasterization density relative to the display height.
    pub(crate) pixel_ratio: f32,
    /// Widest layout the pool must cover.
    pub(crate) max_anticipated_width: u32,
    pub(crate) strategy: ExtractionStrategy,
    /// Upper bound on concurrently open decode contexts.
    pub(crate) concurrency_limit: usize,
    pub(crate) seek_timeout: Duration,
    pub(crate) warm_up_timeout: Duration,
    /// Pause after each seek on short clips before rasterizing.
    pub(crate) settle_delay: Duration,
    pub(crate) pool_ttl: Duration,
    pub(crate) sprite_ttl: Duration,
    pub(crate) sprite_quality: u8,
    pub(crate) sprite_columns: usize,
    pub(crate) schema_version: u32,
    /// Minimum spacing between two viewport resamples.
    pub(crate) resize_interval: Duration,
    pub(crate) progress: Arc<dyn ProgressCallback>,
    pub(crate) cancellation: Option<CancellationToken>,
    pub(crate) batch_size: u64,
}

impl Debug for FilmstripOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("FilmstripOptions")
            .field("thumbnail_height", &self.thumbnail_height)
            .field("pixel_ratio", &self.pixel_ratio)
            .field("max_anticipated_width", &self.max_anticipated_width)
            .field("strategy", &self.strategy)
            .field("concurrency_limit", &self.concurrency_limit)
            .field("seek_timeout", &self.seek_timeout)
            .field("pool_ttl", &self.pool_ttl)
            .field("sprite_ttl", &self.sprite_ttl)
            .field("sprite_quality", &self.sprite_quality)
            .field("schema_version", &self.schema_version)
            .field("has_cancellation", &self.cancellation.is_some())
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

impl Default for FilmstripOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl FilmstripOptions {
    /// Create a new configuration with default settings.
    pub fn new() -> Self {
        Self {
            thumbnail_height: DEFAULT_THUMBNAIL_HEIGHT,
            pixel_ratio: 1.0,
            max_anticipated_width: DEFAULT_MAX_ANTICIPATED_WIDTH,
            strategy: ExtractionStrategy::default(),
            concurrency_limit: 4,
            seek_timeout: Duration::from_secs(3),
            warm_up_timeout: Duration::from_secs(5),
            settle_delay: Duration::from_millis(100),
            pool_ttl: DEFAULT_POOL_TTL,
            sprite_ttl: DEFAULT_SPRITE_TTL,
            sprite_quality: DEFAULT_SPRITE_QUALITY,
            sprite_columns: DEFAULT_SPRITE_COLUMNS,
            schema_version: CACHE_SCHEMA_VERSION,
            resize_interval: Duration::from_millis(16),
            progress: Arc::new(NoOpProgress),
            cancellation: None,
            batch_size: 1,
        }
    }

    /// Set the display height of one thumbnail. Clamped to a minimum of 1.
    #[must_use]
    pub fn with_thumbnail_height(mut self, height: u32) -> Self {
        self.thumbnail_height = height.max(1);
        self
    }

    /// Rasterize frames at `ratio` times the display height (e.g. 2.0 for
    /// high-density screens). Non-finite or non-positive values reset to 1.0.
    #[must_use]
    pub fn with_pixel_ratio(mut self, ratio: f32) -> Self {
        self.pixel_ratio = if ratio.is_finite() && ratio > 0.0 {
            ratio
        } else {
            1.0
        };
        self
    }

    /// Set the widest layout width the pool must cover without re-extraction.
    /// The screen width is a safe upper bound.
    #[must_use]
    pub fn with_max_anticipated_width(mut self, width: u32) -> Self {
        self.max_anticipated_width = width.max(1);
        self
    }

    /// Set the default extraction strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: ExtractionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the maximum number of decode contexts used by the concurrent
    /// strategy. Clamped to a minimum of 1.
    #[must_use]
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit.max(1);
        self
    }

    /// Bound every seek. A seek that outlives this is treated as a degraded
    /// success: whatever frame the context currently holds is used.
    #[must_use]
    pub fn with_seek_timeout(mut self, timeout: Duration) -> Self {
        self.seek_timeout = timeout;
        self
    }

    /// Bound the warm-up of each pooled decode context.
    #[must_use]
    pub fn with_warm_up_timeout(mut self, timeout: Duration) -> Self {
        self.warm_up_timeout = timeout;
        self
    }

    /// Delay between a completed seek and rasterization on short clips.
    #[must_use]
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// Set the lifetime of cached frame pool records.
    #[must_use]
    pub fn with_pool_ttl(mut self, ttl: Duration) -> Self {
        self.pool_ttl = ttl;
        self
    }

    /// Set the lifetime of cached sprite sheet records.
    #[must_use]
    pub fn with_sprite_ttl(mut self, ttl: Duration) -> Self {
        self.sprite_ttl = ttl;
        self
    }

    /// Set the JPEG quality of the sprite sheet, clamped to `1..=100`.
    #[must_use]
    pub fn with_sprite_quality(mut self, quality: u8) -> Self {
        self.sprite_quality = quality.clamp(1, 100);
        self
    }

    /// Set the maximum number of sprite columns. Clamped to a minimum of 1.
    #[must_use]
    pub fn with_sprite_columns(mut self, columns: usize) -> Self {
        self.sprite_columns = columns.max(1);
        self
    }

    /// Override the cache schema version. Entries written under another
    /// version are never read.
    #[must_use]
    pub fn with_schema_version(mut self, version: u32) -> Self {
        self.schema_version = version;
        self
    }

    /// Set the minimum spacing between two viewport resamples.
    #[must_use]
    pub fn with_resize_interval(mut self, interval: Duration) -> Self {
        self.resize_interval = interval;
        self
    }

    /// Attach a progress callback.
    #[must_use]
    pub fn with_progress(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress = callback;
        self
    }

    /// Attach a cancellation token.
    ///
    /// When the token is cancelled, extraction stops at the next frame and
    /// returns [`FilmstripError::Cancelled`](crate::FilmstripError::Cancelled).
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Set how often the progress callback fires (every N frames).
    /// Clamped to a minimum of 1.
    #[must_use]
    pub fn with_batch_size(mut self, size: u64) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// The configured thumbnail display height.
    pub fn thumbnail_height(&self) -> u32 {
        self.thumbnail_height
    }

    /// The configured default extraction strategy.
    pub fn strategy(&self) -> ExtractionStrategy {
        self.strategy
    }

    /// The configured widest layout width.
    pub fn max_anticipated_width(&self) -> u32 {
        self.max_anticipated_width
    }

    /// The configured resize interval.
    pub fn resize_interval(&self) -> Duration {
        self.resize_interval
    }

    /// Rasterization size for frames displayed at `thumbnail_height`.
    pub(crate) fn frame_output(&self, thumbnail_height: u32) -> FrameOutputOptions {
        let height = (thumbnail_height as f32 * self.pixel_ratio).round() as u32;
        FrameOutputOptions::with_height(height.max(1))
    }

    /// Returns `true` if cancellation has been requested.
    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(|token| token.is_cancelled())
    }
}
