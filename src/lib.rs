//! # filmstrip
//!
//! Extract evenly spaced thumbnails from a video, pack them into a single
//! JPEG sprite sheet, cache the result, and resample a responsive filmstrip
//! for any display width without decoding again.
//!
//! Decoding is powered by FFmpeg via the
//! [`ffmpeg-next`](https://crates.io/crates/ffmpeg-next) crate; any other
//! backend can be plugged in through the [`VideoSource`] trait.
//!
//! ## Quick Start
//!
//! ### Build and resample a filmstrip
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use filmstrip::{ExtractionStrategy, FfmpegSource, FilmstripContext, FilmstripOptions, FileStore};
//!
//! # async fn example() -> Result<(), filmstrip::FilmstripError> {
//! let context = FilmstripContext::new(
//!     Arc::new(FfmpegSource::new("input.mp4")),
//!     Arc::new(FileStore::new(".filmstrip-cache")),
//!     FilmstripOptions::new().with_max_anticipated_width(2560),
//! );
//!
//! // Extracts once, then serves from memory or the cache.
//! let ready = context.ensure_pool(60, ExtractionStrategy::Concurrent).await?;
//! std::fs::write("sprite.jpg", &ready.sprite.image)?;
//!
//! // Cheap: no decoding, no I/O.
//! for frame in ready.resample(1280) {
//!     println!("slot {} shows frame {} at cell ({}, {})",
//!         frame.display_index, frame.source_index, frame.grid_row, frame.grid_col);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ### Sample frames directly
//!
//! ```no_run
//! use filmstrip::{ExtractionStrategy, FfmpegSource, FilmstripOptions, FrameSampler, SpritePacker};
//!
//! # async fn example() -> Result<(), filmstrip::FilmstripError> {
//! let sampler = FrameSampler::new(FilmstripOptions::new().with_thumbnail_height(90));
//! let sampled = sampler
//!     .extract(&FfmpegSource::new("input.mp4"), 12, ExtractionStrategy::Serial)
//!     .await?;
//! let sheet = SpritePacker::new(80).pack(sampled.frames, sampled.frame_width, sampled.frame_height, 4)?;
//! println!("{} bytes, {}x{}", sheet.image.len(), sheet.rows, sheet.cols);
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Time-domain sampling**: `t_i = i / n * duration`, with fewer frames
//!   and a settle delay for short clips
//! - **Serial or concurrent extraction**: one decode context, or a small pool
//!   of contexts draining a shared work queue
//! - **Bounded seeks**: a stalled seek degrades to the current frame instead
//!   of hanging the build
//! - **Sprite packing**: row-major grid with stable index → cell mapping and
//!   holes for dropped frames
//! - **Cache layer**: schema-versioned keys, per-record expiry, and
//!   evict-oldest-then-retry on a full store
//! - **Viewport resampling**: pure index selection plus a rate-limited
//!   resize helper
//! - **Progress & cancellation**: callbacks and `CancellationToken`
//!
//! ## Requirements
//!
//! FFmpeg development libraries must be installed on your system. The library
//! needs a Tokio runtime; a current-thread runtime is enough.

pub mod cache;
pub mod configuration;
pub mod error;
pub mod media;
pub mod pool;
pub mod progress;
pub mod resample;
pub mod sampler;
pub mod source;
pub mod sprite;
pub mod store;

pub use cache::{
    CacheKey, CacheStore, FramePoolRecord, RecordKind, SpriteInfo, SpriteSheetRecord,
    evict_oldest, is_fresh, now_millis, set_with_quota_handling,
};
pub use configuration::{ExtractionStrategy, FilmstripOptions, FrameOutputOptions};
pub use error::{FilmstripError, StoreError};
pub use media::{FfmpegLogLevel, MediaFile, set_ffmpeg_log_level};
pub use pool::{FilmstripContext, FramePool, PoolPhase, ReadyPool, plan_total_frames};
pub use progress::{CancellationToken, OperationType, ProgressCallback, ProgressInfo};
pub use resample::{DisplayFrame, ViewportResampler, resample};
pub use sampler::{FrameSampler, SampledFrames, adjust_frame_count, sample_times};
pub use source::{
    DecodeContext, FfmpegDecodeContext, FfmpegSource, RasterFrame, SeekOutcome, VideoSource,
    VideoSourceInfo, seek_with_timeout,
};
pub use sprite::{SpritePacker, SpriteSheet, cell_for_index};
pub use store::{FileStore, MemoryStore};
