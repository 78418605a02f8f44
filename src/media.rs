//! FFmpeg-backed media access.
//!
//! [`MediaFile`] opens a video source (path or URL) through
//! [`ffmpeg-next`](https://crates.io/crates/ffmpeg-next), reads the metadata the
//! filmstrip needs once at open time, and decodes single frames at arbitrary
//! timestamps, scaled straight to the requested thumbnail size.
//!
//! All methods block. The async decode context in [`crate::source`] moves a
//! `MediaFile` onto Tokio's blocking pool for every seek.

use std::{str::FromStr, time::Duration};

use ffmpeg_next::{
    Rational,
    codec::context::Context as CodecContext,
    format::{Pixel, context::Input},
    frame::Video as VideoFrame,
    media::Type,
    software::scaling::{Context as ScalingContext, Flags as ScalingFlags},
    util::log::Level,
};
use image::RgbImage;

use crate::{error::FilmstripError, source::VideoSourceInfo};

/// Frames whose presentation time is within this distance before the target
/// are accepted as the target frame.
const PTS_TOLERANCE_SECONDS: f64 = 0.001;

/// An opened video source.
pub struct MediaFile {
    input_context: Input,
    video_stream_index: usize,
    info: VideoSourceInfo,
    location: String,
}

impl std::fmt::Debug for MediaFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaFile")
            .field("location", &self.location)
            .field("video_stream_index", &self.video_stream_index)
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

impl MediaFile {
    /// Open a video source for frame extraction.
    ///
    /// Initializes FFmpeg (idempotent), opens the input, locates the best
    /// video stream, and caches duration, native size, and audio presence.
    ///
    /// # Errors
    ///
    /// Returns [`FilmstripError::SourceLoad`] if the input cannot be opened,
    /// has an undecodable video stream, or reports no duration, and
    /// [`FilmstripError::NoVideoStream`] if it has no video at all.
    pub fn open(location: &str) -> Result<Self, FilmstripError> {
        let load_error = |reason: String| FilmstripError::SourceLoad {
            source_identity: location.to_string(),
            reason,
        };

        log::debug!("Opening video source: {location}");

        ffmpeg_next::init()
            .map_err(|error| load_error(format!("FFmpeg initialisation failed: {error}")))?;

        let input_context =
            ffmpeg_next::format::input(location).map_err(|error| load_error(error.to_string()))?;

        let stream = input_context
            .streams()
            .best(Type::Video)
            .ok_or(FilmstripError::NoVideoStream)?;
        let video_stream_index = stream.index();
        let time_base = stream.time_base();
        let stream_duration = stream.duration();

        let decoder = CodecContext::from_parameters(stream.parameters())
            .and_then(|context| context.decoder().video())
            .map_err(|error| load_error(format!("unsupported video codec: {error}")))?;
        let (native_width, native_height) = (decoder.width(), decoder.height());
        if native_width == 0 || native_height == 0 {
            return Err(load_error("video stream reports zero dimensions".to_string()));
        }

        let duration = container_duration(&input_context)
            .or_else(|| rescaled_duration(stream_duration, time_base))
            .ok_or_else(|| load_error("source reports no duration".to_string()))?;

        let has_audio = input_context.streams().best(Type::Audio).is_some();

        let info = VideoSourceInfo {
            duration,
            native_width,
            native_height,
            has_audio: Some(has_audio),
        };

        log::info!(
            "Opened video source: {location} ({}x{}, duration={:.2}s, audio={has_audio})",
            native_width,
            native_height,
            duration.as_secs_f64(),
        );

        Ok(Self {
            input_context,
            video_stream_index,
            info,
            location: location.to_string(),
        })
    }

    /// Metadata read at open time.
    pub fn info(&self) -> &VideoSourceInfo {
        &self.info
    }

    /// The path or URL this file was opened from.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Decode the first frame presented at or after `timestamp`, scaled to
    /// `width`×`height`.
    ///
    /// Seeks to the nearest keyframe before the target and decodes forward.
    /// When the stream ends before the target is reached the last decoded
    /// frame is returned instead.
    ///
    /// # Errors
    ///
    /// Returns [`FilmstripError::InvalidDimensions`] for a zero-sized target,
    /// [`FilmstripError::VideoDecodeError`] if no frame could be decoded, or
    /// FFmpeg errors from seeking and decoding.
    pub fn frame_at(
        &mut self,
        timestamp: Duration,
        width: u32,
        height: u32,
    ) -> Result<RgbImage, FilmstripError> {
        if width == 0 || height == 0 {
            return Err(FilmstripError::InvalidDimensions { width, height });
        }

        let video_stream_index = self.video_stream_index;
        let stream = self
            .input_context
            .stream(video_stream_index)
            .ok_or(FilmstripError::NoVideoStream)?;
        let time_base = stream.time_base();
        let decoder_context = CodecContext::from_parameters(stream.parameters())?;
        let mut decoder = decoder_context.decoder().video()?;

        let mut scaler = ScalingContext::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            Pixel::RGB24,
            width,
            height,
            ScalingFlags::BILINEAR,
        )?;

        // Container-level seeks are expressed in AV_TIME_BASE (microseconds).
        let position = i64::try_from(timestamp.as_micros()).unwrap_or(i64::MAX);
        self.input_context.seek(position, ..position)?;

        let target_seconds = timestamp.as_secs_f64() - PTS_TOLERANCE_SECONDS;
        let mut decoded = VideoFrame::empty();
        let mut previous = VideoFrame::empty();
        let mut has_previous = false;
        let mut rgb_frame = VideoFrame::empty();

        for (stream, packet) in self.input_context.packets() {
            if stream.index() != video_stream_index {
                continue;
            }

            decoder.send_packet(&packet)?;

            while decoder.receive_frame(&mut decoded).is_ok() {
                if presentation_seconds(&decoded, time_base) >= target_seconds {
                    scaler.run(&decoded, &mut rgb_frame)?;
                    return frame_to_image(&rgb_frame, width, height);
                }
                // Keep the latest frame around without copying pixels.
                std::mem::swap(&mut decoded, &mut previous);
                has_previous = true;
            }
        }

        decoder.send_eof()?;
        while decoder.receive_frame(&mut decoded).is_ok() {
            if presentation_seconds(&decoded, time_base) >= target_seconds {
                scaler.run(&decoded, &mut rgb_frame)?;
                return frame_to_image(&rgb_frame, width, height);
            }
            std::mem::swap(&mut decoded, &mut previous);
            has_previous = true;
        }

        if has_previous {
            log::debug!(
                "Stream ended before {:?}; using last decoded frame",
                timestamp
            );
            scaler.run(&previous, &mut rgb_frame)?;
            return frame_to_image(&rgb_frame, width, height);
        }

        Err(FilmstripError::VideoDecodeError(format!(
            "no frame could be decoded at {timestamp:?}"
        )))
    }
}

fn container_duration(input_context: &Input) -> Option<Duration> {
    let microseconds = input_context.duration();
    (microseconds > 0).then(|| Duration::from_micros(microseconds as u64))
}

fn rescaled_duration(duration: i64, time_base: Rational) -> Option<Duration> {
    let seconds = pts_to_seconds(duration, time_base);
    (seconds > 0.0 && seconds.is_finite()).then(|| Duration::from_secs_f64(seconds))
}

fn presentation_seconds(frame: &VideoFrame, time_base: Rational) -> f64 {
    let pts = frame.timestamp().or_else(|| frame.pts()).unwrap_or(0);
    pts_to_seconds(pts, time_base)
}

/// Rescale a PTS value from stream time base to seconds.
fn pts_to_seconds(pts: i64, time_base: Rational) -> f64 {
    if time_base.denominator() == 0 {
        return 0.0;
    }
    pts as f64 * time_base.numerator() as f64 / time_base.denominator() as f64
}

/// Convert a scaled RGB24 frame into an [`RgbImage`], stripping row padding.
fn frame_to_image(rgb_frame: &VideoFrame, width: u32, height: u32) -> Result<RgbImage, FilmstripError> {
    let stride = rgb_frame.stride(0);
    let row_bytes = (width as usize) * 3;
    let data = rgb_frame.data(0);

    let buffer = if stride == row_bytes {
        data[..row_bytes * (height as usize)].to_vec()
    } else {
        let mut buffer = Vec::with_capacity(row_bytes * (height as usize));
        for row in 0..(height as usize) {
            let start = row * stride;
            buffer.extend_from_slice(&data[start..start + row_bytes]);
        }
        buffer
    };

    RgbImage::from_raw(width, height, buffer).ok_or_else(|| {
        FilmstripError::VideoDecodeError(
            "Failed to construct RGB image from decoded frame data".to_string(),
        )
    })
}

/// FFmpeg internal log verbosity level.
///
/// FFmpeg prints to stderr on its own, separately from the `log` facade used
/// by this crate. Ordered from most verbose to most quiet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FfmpegLogLevel {
    /// Extremely verbose tracing output.
    Trace,
    /// Debugging messages.
    Debug,
    /// Verbose informational messages.
    Verbose,
    /// Informational messages.
    Info,
    /// Warnings (FFmpeg's default).
    Warning,
    /// Recoverable errors.
    Error,
    /// Unrecoverable errors.
    Fatal,
    /// No output at all.
    Quiet,
}

impl FromStr for FfmpegLogLevel {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "trace" => Ok(FfmpegLogLevel::Trace),
            "debug" => Ok(FfmpegLogLevel::Debug),
            "verbose" => Ok(FfmpegLogLevel::Verbose),
            "info" => Ok(FfmpegLogLevel::Info),
            "warning" | "warn" => Ok(FfmpegLogLevel::Warning),
            "error" => Ok(FfmpegLogLevel::Error),
            "fatal" => Ok(FfmpegLogLevel::Fatal),
            "quiet" | "off" => Ok(FfmpegLogLevel::Quiet),
            other => Err(format!("unsupported FFmpeg log level: {other}")),
        }
    }
}

/// Set FFmpeg's own console verbosity. Does not affect `log` output.
pub fn set_ffmpeg_log_level(level: FfmpegLogLevel) {
    let level = match level {
        FfmpegLogLevel::Trace => Level::Trace,
        FfmpegLogLevel::Debug => Level::Debug,
        FfmpegLogLevel::Verbose => Level::Verbose,
        FfmpegLogLevel::Info => Level::Info,
        FfmpegLogLevel::Warning => Level::Warning,
        FfmpegLogLevel::Error => Level::Error,
        FfmpegLogLevel::Fatal => Level::Fatal,
        FfmpegLogLevel::Quiet => Level::Quiet,
    };
    ffmpeg_next::util::log::set_level(level);
}
