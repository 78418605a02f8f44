//! Error types for the `filmstrip` crate.
//!
//! This module defines [`FilmstripError`], the unified error type returned by
//! all fallible operations in the crate, and [`StoreError`], the narrower error
//! reported by [`CacheStore`](crate::CacheStore) implementations.
//!
//! Only source-level failures are fatal to a pool build. Per-frame seek
//! problems are absorbed by the sampler, and cache failures degrade to a
//! cache miss (reads) or session-only operation (writes).

use std::{io::Error as IoError, time::Duration};

use ffmpeg_next::Error as FfmpegError;
use image::ImageError;
use thiserror::Error;

/// The unified error type for all `filmstrip` operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FilmstripError {
    /// The video source could not be loaded (bad reference, unsupported
    /// format, access denied). Fatal to the current pool build.
    #[error("Failed to load video source {source_identity}: {reason}")]
    SourceLoad {
        /// Identity of the source that failed to load.
        source_identity: String,
        /// Underlying reason the load failed.
        reason: String,
    },

    /// The source does not contain a video stream.
    #[error("No video stream found in source")]
    NoVideoStream,

    /// A video frame could not be decoded.
    #[error("Failed to decode video frame: {0}")]
    VideoDecodeError(String),

    /// A single seek failed. The sampler treats this as non-fatal.
    #[error("Seek to {time:?} failed: {reason}")]
    SeekFailed {
        /// The sample time that was requested.
        time: Duration,
        /// Underlying reason the seek failed.
        reason: String,
    },

    /// A decode context was used after it had been released.
    #[error("Decode context has been released")]
    ContextReleased,

    /// A frame count of zero was requested.
    #[error("Invalid frame count: {0} (must be at least 1)")]
    InvalidFrameCount(usize),

    /// Frame or thumbnail dimensions resolved to zero.
    #[error("Invalid dimensions: {width}x{height}")]
    InvalidDimensions {
        /// Resolved width.
        width: u32,
        /// Resolved height.
        height: u32,
    },

    /// Not a single frame could be painted into the sprite sheet.
    #[error("No frames could be captured from the video source")]
    NoFramesCaptured,

    /// The sprite sheet could not be encoded.
    #[error("Failed to encode sprite sheet: {0}")]
    SpriteEncodeError(String),

    /// A stored sprite image reference could not be decoded.
    #[error("Invalid sprite data: {0}")]
    InvalidSpriteData(String),

    /// The cache store rejected an operation.
    #[error("Cache store error: {0}")]
    Store(#[from] StoreError),

    /// A cache record could not be serialised.
    #[error("Cache record error: {0}")]
    CacheRecord(#[from] serde_json::Error),

    /// An error originating from the FFmpeg libraries.
    #[error("FFmpeg error: {0}")]
    FfmpegError(String),

    /// An I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    IoError(#[from] IoError),

    /// An error from the `image` crate.
    #[error("Image processing error: {0}")]
    ImageError(#[from] ImageError),

    /// The operation was cancelled via a [`CancellationToken`](crate::CancellationToken).
    #[error("Operation cancelled")]
    Cancelled,

    /// The source changed while a pool build was in flight; its result was
    /// discarded.
    #[error("Video source changed while the frame pool was being built")]
    SourceChanged,

    /// A concurrent build of the same pool failed while this call waited for
    /// it. Carries that build's error message.
    #[error("Frame pool build failed: {0}")]
    BuildFailed(String),
}

impl From<FfmpegError> for FilmstripError {
    fn from(error: FfmpegError) -> Self {
        FilmstripError::FfmpegError(error.to_string())
    }
}

/// Errors reported by a [`CacheStore`](crate::CacheStore) backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The write would exceed the store's capacity.
    #[error("Storage quota exceeded")]
    QuotaExceeded,

    /// Any other driver failure.
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl From<IoError> for StoreError {
    fn from(error: IoError) -> Self {
        StoreError::Backend(error.to_string())
    }
}
