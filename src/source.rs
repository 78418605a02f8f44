//! Video sources and decode contexts.
//!
//! The sampler never talks to a decoder directly. It opens one or more
//! [`DecodeContext`]s from a [`VideoSource`] and drives them with bounded
//! seeks. [`FfmpegSource`] is the stock implementation; tests and embedders
//! can plug in their own.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use filmstrip::{FfmpegSource, FilmstripError, FrameOutputOptions, VideoSource};
//!
//! # async fn example() -> Result<(), FilmstripError> {
//! let source = FfmpegSource::new("input.mp4");
//! let mut context = source.open(&FrameOutputOptions::with_height(60)).await?;
//! context.seek(Duration::from_secs(5)).await?;
//! if let Some(frame) = context.rasterize(0) {
//!     println!("{}x{}", frame.width(), frame.height());
//! }
//! context.release();
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use image::RgbImage;
use tokio::task::JoinHandle;

use crate::{configuration::FrameOutputOptions, error::FilmstripError, media::MediaFile};

/// Metadata of a video source, read once and immutable afterwards.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoSourceInfo {
    /// Total duration of the video.
    pub duration: Duration,
    /// Native frame width in pixels.
    pub native_width: u32,
    /// Native frame height in pixels.
    pub native_height: u32,
    /// Whether the container has an audio stream, when the backend knows.
    pub has_audio: Option<bool>,
}

impl VideoSourceInfo {
    /// `native_width / native_height`, or 1.0 for a degenerate height.
    pub fn aspect_ratio(&self) -> f64 {
        if self.native_height == 0 {
            return 1.0;
        }
        self.native_width as f64 / self.native_height as f64
    }
}

/// A rasterized frame captured at one sample time.
///
/// Owned by the sampler until it is moved into the sprite packer, which
/// drops it after painting.
#[derive(Debug, Clone)]
pub struct RasterFrame {
    /// Index of the sample this frame fills.
    pub index: usize,
    /// Presentation time the pixels were captured at.
    pub timestamp: Duration,
    /// The pixels.
    pub image: RgbImage,
}

impl RasterFrame {
    /// Frame width in pixels.
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    /// Frame height in pixels.
    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Returns `true` for a zero-sized frame, which the packer skips.
    pub fn is_blank(&self) -> bool {
        self.image.width() == 0 || self.image.height() == 0
    }
}

/// How a bounded seek ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOutcome {
    /// The decoder reached the requested time.
    Completed,
    /// The timeout elapsed first. The context still shows its previous frame.
    TimedOut,
}

/// One independent decoder positioned on a video source.
#[async_trait]
pub trait DecodeContext: Send {
    /// Metadata of the underlying source.
    fn info(&self) -> &VideoSourceInfo;

    /// Preload until the context can serve seeks. The default is a no-op.
    async fn warm_up(&mut self) -> Result<(), FilmstripError> {
        Ok(())
    }

    /// Move the context to `time` and decode the frame there.
    ///
    /// Implementations must tolerate the returned future being dropped
    /// part-way (a timed-out seek) and recover on the next call.
    async fn seek(&mut self, time: Duration) -> Result<(), FilmstripError>;

    /// Copy the currently displayed frame, tagged with `index`.
    /// `None` until a seek has completed at least once.
    fn rasterize(&mut self, index: usize) -> Option<RasterFrame>;

    /// Drop decoder resources. Further seeks fail.
    fn release(&mut self);
}

/// Something decode contexts can be opened against.
#[async_trait]
pub trait VideoSource: Send + Sync {
    /// Stable identity used in cache keys (URL, path, content hash).
    fn identity(&self) -> &str;

    /// Open a new decode context producing frames sized by `output`.
    ///
    /// # Errors
    ///
    /// Any error here is a source-load failure and fatal to the caller.
    async fn open(
        &self,
        output: &FrameOutputOptions,
    ) -> Result<Box<dyn DecodeContext>, FilmstripError>;
}

/// Seek `context` to `time`, resolving to [`SeekOutcome::TimedOut`] rather than
/// waiting longer than `timeout`.
pub async fn seek_with_timeout(
    context: &mut dyn DecodeContext,
    time: Duration,
    timeout: Duration,
) -> Result<SeekOutcome, FilmstripError> {
    match tokio::time::timeout(timeout, context.seek(time)).await {
        Ok(Ok(())) => Ok(SeekOutcome::Completed),
        Ok(Err(error)) => Err(error),
        Err(_) => Ok(SeekOutcome::TimedOut),
    }
}

/// A video source decoded through FFmpeg.
#[derive(Debug, Clone)]
pub struct FfmpegSource {
    location: String,
}

impl FfmpegSource {
    /// Create a source for a file path or URL. Nothing is opened yet.
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
        }
    }

    /// Read the source metadata without keeping a decoder open.
    ///
    /// # Errors
    ///
    /// Same as [`MediaFile::open`].
    pub async fn probe(&self) -> Result<VideoSourceInfo, FilmstripError> {
        let file = open_blocking(self.location.clone()).await?;
        Ok(*file.info())
    }
}

#[async_trait]
impl VideoSource for FfmpegSource {
    fn identity(&self) -> &str {
        &self.location
    }

    async fn open(
        &self,
        output: &FrameOutputOptions,
    ) -> Result<Box<dyn DecodeContext>, FilmstripError> {
        let file = open_blocking(self.location.clone()).await?;
        let info = *file.info();
        let output_size = output.resolve_dimensions(info.native_width, info.native_height);
        Ok(Box::new(FfmpegDecodeContext {
            slot: DecoderSlot::Idle(file),
            info,
            output_size,
            current: None,
        }))
    }
}

async fn open_blocking(location: String) -> Result<MediaFile, FilmstripError> {
    let identity = location.clone();
    tokio::task::spawn_blocking(move || MediaFile::open(&location))
        .await
        .map_err(|error| FilmstripError::SourceLoad {
            source_identity: identity,
            reason: format!("open task failed: {error}"),
        })?
}

type DecodeResult = (MediaFile, Result<RgbImage, FilmstripError>);

enum DecoderSlot {
    Idle(MediaFile),
    /// A decode is running on the blocking pool and owns the file.
    Busy {
        time: Duration,
        handle: JoinHandle<DecodeResult>,
    },
    Released,
}

/// Decode context over one [`MediaFile`].
///
/// Each seek moves the file onto Tokio's blocking pool. If the caller stops
/// waiting, the in-flight decode keeps the file and the next seek reclaims
/// it first.
pub struct FfmpegDecodeContext {
    slot: DecoderSlot,
    info: VideoSourceInfo,
    output_size: (u32, u32),
    current: Option<(Duration, RgbImage)>,
}

impl FfmpegDecodeContext {
    /// Wait for a pending decode and adopt its frame if it produced one.
    ///
    /// Returns the decode error of the pending seek, if any.
    async fn settle(&mut self) -> Result<Option<FilmstripError>, FilmstripError> {
        let DecoderSlot::Busy { time, handle } = &mut self.slot else {
            return Ok(None);
        };
        let time = *time;
        match handle.await {
            Ok((file, outcome)) => {
                self.slot = DecoderSlot::Idle(file);
                match outcome {
                    Ok(image) => {
                        self.current = Some((time, image));
                        Ok(None)
                    }
                    Err(error) => Ok(Some(error)),
                }
            }
            Err(error) => {
                self.slot = DecoderSlot::Released;
                Err(FilmstripError::VideoDecodeError(format!(
                    "decode task failed: {error}"
                )))
            }
        }
    }
}

#[async_trait]
impl DecodeContext for FfmpegDecodeContext {
    fn info(&self) -> &VideoSourceInfo {
        &self.info
    }

    async fn warm_up(&mut self) -> Result<(), FilmstripError> {
        self.seek(Duration::ZERO).await
    }

    async fn seek(&mut self, time: Duration) -> Result<(), FilmstripError> {
        // A seek abandoned earlier may have landed since; its frame counts.
        if let Some(error) = self.settle().await? {
            log::debug!("Abandoned seek finished with an error: {error}");
        }

        let mut file = match std::mem::replace(&mut self.slot, DecoderSlot::Released) {
            DecoderSlot::Idle(file) => file,
            _ => return Err(FilmstripError::ContextReleased),
        };
        let (width, height) = self.output_size;
        let handle = tokio::task::spawn_blocking(move || {
            let outcome = file.frame_at(time, width, height);
            (file, outcome)
        });
        self.slot = DecoderSlot::Busy { time, handle };

        match self.settle().await? {
            Some(error) => Err(FilmstripError::SeekFailed {
                time,
                reason: error.to_string(),
            }),
            None => Ok(()),
        }
    }

    fn rasterize(&mut self, index: usize) -> Option<RasterFrame> {
        self.current.as_ref().map(|(timestamp, image)| RasterFrame {
            index,
            timestamp: *timestamp,
            image: image.clone(),
        })
    }

    fn release(&mut self) {
        // A busy decode finishes on its own and drops the file.
        self.slot = DecoderSlot::Released;
        self.current = None;
    }
}
