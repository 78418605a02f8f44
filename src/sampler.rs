//! Time-domain frame sampling.
//!
//! [`FrameSampler`] produces `n` frames evenly spaced across a video's
//! duration (`t_i = i / n * duration`, the first sample at zero). Two
//! strategies share the same schedule:
//!
//! * [`ExtractionStrategy::Serial`] drives one decode context through the
//!   samples in index order.
//! * [`ExtractionStrategy::Concurrent`] opens a small pool of contexts that
//!   drain a shared work queue. Frames whose seek fails are left as `None`.
//!
//! Seeks are always bounded. A seek that outlives
//! [`FilmstripOptions::with_seek_timeout`](crate::FilmstripOptions::with_seek_timeout)
//! counts as a degraded success and the context's current frame is used.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tokio::task::JoinSet;

use crate::{
    configuration::{ExtractionStrategy, FilmstripOptions, FrameOutputOptions},
    error::FilmstripError,
    progress::{CancellationToken, OperationType, ProgressReporter},
    source::{DecodeContext, RasterFrame, SeekOutcome, VideoSource, VideoSourceInfo, seek_with_timeout},
};

/// Clips up to this long get a reduced frame count and a settle delay.
pub const SHORT_CLIP_THRESHOLD: Duration = Duration::from_secs(10);
/// Minimum spacing the short-clip reduction aims for.
pub const MIN_SAMPLE_GAP_SECONDS: f64 = 0.5;
/// Short clips never go below this many frames.
pub const MIN_SHORT_CLIP_FRAMES: usize = 5;
/// Pool size cap for short clips, where setup outweighs parallelism.
pub const SHORT_CLIP_MAX_WORKERS: usize = 3;

/// Evenly spaced, left-aligned sample times: `t_i = i / n * duration`.
///
/// Returns an empty vector for `frame_count == 0`.
pub fn sample_times(frame_count: usize, duration: Duration) -> Vec<Duration> {
    let seconds = duration.as_secs_f64();
    (0..frame_count)
        .map(|index| Duration::from_secs_f64(index as f64 / frame_count as f64 * seconds))
        .collect()
}

/// Returns `true` if `duration` counts as a short clip.
pub fn is_short_clip(duration: Duration) -> bool {
    duration <= SHORT_CLIP_THRESHOLD
}

/// Reduce `requested` for short clips to `max(5, floor(duration / 0.5) + 1)`.
/// Longer clips keep the requested count. Never increases the count.
pub fn adjust_frame_count(requested: usize, duration: Duration) -> usize {
    if !is_short_clip(duration) {
        return requested;
    }
    let by_gap = (duration.as_secs_f64() / MIN_SAMPLE_GAP_SECONDS).floor() as usize + 1;
    requested.min(by_gap.max(MIN_SHORT_CLIP_FRAMES))
}

/// Number of decode contexts the concurrent strategy opens.
pub fn worker_count(concurrency_limit: usize, frame_count: usize, duration: Duration) -> usize {
    let mut workers = concurrency_limit.min(frame_count).max(1);
    if is_short_clip(duration) {
        workers = workers.min(SHORT_CLIP_MAX_WORKERS);
    }
    workers
}

/// Result of one extraction.
#[derive(Debug)]
pub struct SampledFrames {
    /// One slot per sample, in index order. `None` marks a dropped sample.
    pub frames: Vec<Option<RasterFrame>>,
    /// Source metadata.
    pub info: VideoSourceInfo,
    /// Width every frame was rasterized at.
    pub frame_width: u32,
    /// Height every frame was rasterized at.
    pub frame_height: u32,
}

impl SampledFrames {
    /// Number of slots that hold a frame.
    pub fn captured(&self) -> usize {
        self.frames.iter().filter(|frame| frame.is_some()).count()
    }
}

/// Timing knobs copied out of [`FilmstripOptions`] for the worker tasks.
#[derive(Debug, Clone, Copy)]
struct SeekSettings {
    seek_timeout: Duration,
    warm_up_timeout: Duration,
    /// Applied after each completed seek; zero for long clips.
    settle_delay: Duration,
}

/// Extracts evenly spaced frames from a [`VideoSource`].
///
/// # Example
///
/// ```no_run
/// use filmstrip::{ExtractionStrategy, FfmpegSource, FilmstripError, FilmstripOptions, FrameSampler};
///
/// # async fn example() -> Result<(), FilmstripError> {
/// let source = FfmpegSource::new("input.mp4");
/// let sampler = FrameSampler::new(FilmstripOptions::new());
/// let sampled = sampler.extract(&source, 20, ExtractionStrategy::Concurrent).await?;
/// println!("captured {} of {}", sampled.captured(), sampled.frames.len());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct FrameSampler {
    options: FilmstripOptions,
    output: FrameOutputOptions,
    cancellation: Option<CancellationToken>,
}

impl FrameSampler {
    /// Create a sampler rasterizing at the configured thumbnail height.
    pub fn new(options: FilmstripOptions) -> Self {
        let output = options.frame_output(options.thumbnail_height);
        let cancellation = options.cancellation.clone();
        Self {
            options,
            output,
            cancellation,
        }
    }

    /// Override the rasterization size.
    #[must_use]
    pub fn with_output(mut self, output: FrameOutputOptions) -> Self {
        self.output = output;
        self
    }

    /// Observe `token` in addition to any token from the options.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.options.is_cancelled()
            || self
                .cancellation
                .as_ref()
                .is_some_and(CancellationToken::is_cancelled)
    }

    /// Extract `frame_count` frames using `strategy`.
    ///
    /// Short clips (≤ 10 s) get fewer frames, see [`adjust_frame_count`].
    ///
    /// # Errors
    ///
    /// - [`FilmstripError::InvalidFrameCount`] for a zero count.
    /// - Any error from opening the first decode context (source-load
    ///   failures are fatal).
    /// - [`FilmstripError::Cancelled`] if cancellation was requested.
    ///
    /// Per-frame seek failures never fail the call.
    pub async fn extract(
        &self,
        source: &dyn VideoSource,
        frame_count: usize,
        strategy: ExtractionStrategy,
    ) -> Result<SampledFrames, FilmstripError> {
        if frame_count == 0 {
            return Err(FilmstripError::InvalidFrameCount(frame_count));
        }
        if self.is_cancelled() {
            return Err(FilmstripError::Cancelled);
        }

        let mut first = source.open(&self.output).await?;
        let info = *first.info();
        let (frame_width, frame_height) = self
            .output
            .resolve_dimensions(info.native_width, info.native_height);

        let adjusted = adjust_frame_count(frame_count, info.duration);
        let times = sample_times(adjusted, info.duration);
        let short = is_short_clip(info.duration);
        let settings = SeekSettings {
            seek_timeout: self.options.seek_timeout,
            warm_up_timeout: self.options.warm_up_timeout,
            settle_delay: if short {
                self.options.settle_delay
            } else {
                Duration::ZERO
            },
        };

        log::debug!(
            "Sampling {adjusted} frame(s) (requested {frame_count}) from {} over {:.2}s using {strategy} strategy",
            source.identity(),
            info.duration.as_secs_f64(),
        );

        let reporter = Arc::new(Mutex::new(ProgressReporter::new(
            self.options.progress.clone(),
            OperationType::FrameExtraction,
            Some(adjusted as u64),
            self.options.batch_size,
        )));

        let frames = match strategy {
            ExtractionStrategy::Serial => {
                warm_up(first.as_mut(), settings.warm_up_timeout).await;
                self.extract_serial(first, &times, settings, &reporter).await?
            }
            ExtractionStrategy::Concurrent => {
                let workers = worker_count(self.options.concurrency_limit, adjusted, info.duration);
                let mut contexts = Vec::with_capacity(workers);
                contexts.push(first);
                for worker in 1..workers {
                    match source.open(&self.output).await {
                        Ok(context) => contexts.push(context),
                        Err(error) => {
                            log::warn!("Decode context {worker} failed to open, continuing without it: {error}");
                        }
                    }
                }
                self.extract_concurrent(contexts, &times, settings, &reporter)
                    .await?
            }
        };

        lock(&reporter).done();

        let sampled = SampledFrames {
            frames,
            info,
            frame_width,
            frame_height,
        };
        log::debug!(
            "Captured {} of {} frame(s) from {}",
            sampled.captured(),
            adjusted,
            source.identity()
        );
        Ok(sampled)
    }

    async fn extract_serial(
        &self,
        mut context: Box<dyn DecodeContext>,
        times: &[Duration],
        settings: SeekSettings,
        reporter: &Mutex<ProgressReporter>,
    ) -> Result<Vec<Option<RasterFrame>>, FilmstripError> {
        let mut frames: Vec<Option<RasterFrame>> = Vec::with_capacity(times.len());
        let mut last_captured: Option<usize> = None;

        for (index, &time) in times.iter().enumerate() {
            if self.is_cancelled() {
                context.release();
                return Err(FilmstripError::Cancelled);
            }

            let frame = match capture(context.as_mut(), index, time, settings).await {
                Ok(frame) => frame,
                Err(error) => {
                    log::warn!("Seek for frame {index} at {time:?} failed, reusing previous frame: {error}");
                    last_captured
                        .and_then(|previous| frames[previous].clone())
                        .map(|previous| RasterFrame { index, ..previous })
                }
            };

            if frame.is_some() {
                last_captured = Some(index);
            }
            frames.push(frame);
            lock(reporter).step(Some(index as u64), Some(time));
        }

        context.release();
        Ok(frames)
    }

    async fn extract_concurrent(
        &self,
        contexts: Vec<Box<dyn DecodeContext>>,
        times: &[Duration],
        settings: SeekSettings,
        reporter: &Arc<Mutex<ProgressReporter>>,
    ) -> Result<Vec<Option<RasterFrame>>, FilmstripError> {
        let queue: Arc<Mutex<VecDeque<(usize, Duration)>>> =
            Arc::new(Mutex::new(times.iter().copied().enumerate().collect()));
        let frames: Arc<Mutex<Vec<Option<RasterFrame>>>> =
            Arc::new(Mutex::new(vec![None; times.len()]));
        let cancelled = {
            let options_token = self.options.cancellation.clone();
            let sampler_token = self.cancellation.clone();
            move || {
                options_token.as_ref().is_some_and(CancellationToken::is_cancelled)
                    || sampler_token.as_ref().is_some_and(CancellationToken::is_cancelled)
            }
        };

        let mut workers = JoinSet::new();
        for (worker, context) in contexts.into_iter().enumerate() {
            let queue = Arc::clone(&queue);
            let frames = Arc::clone(&frames);
            let reporter = Arc::clone(reporter);
            let cancelled = cancelled.clone();
            workers.spawn(async move {
                run_worker(worker, context, queue, frames, reporter, settings, cancelled).await;
            });
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(error) = joined {
                log::warn!("Sampler worker stopped abnormally: {error}");
            }
        }

        if self.is_cancelled() {
            return Err(FilmstripError::Cancelled);
        }

        let frames = std::mem::take(&mut *lock(&frames));
        Ok(frames)
    }
}

/// Drain the shared queue with one context until it is empty or cancelled.
async fn run_worker<F>(
    worker: usize,
    mut context: Box<dyn DecodeContext>,
    queue: Arc<Mutex<VecDeque<(usize, Duration)>>>,
    frames: Arc<Mutex<Vec<Option<RasterFrame>>>>,
    reporter: Arc<Mutex<ProgressReporter>>,
    settings: SeekSettings,
    cancelled: F,
) where
    F: Fn() -> bool + Send,
{
    warm_up(context.as_mut(), settings.warm_up_timeout).await;

    loop {
        if cancelled() {
            break;
        }
        let Some((index, time)) = lock(&queue).pop_front() else {
            break;
        };

        match capture(context.as_mut(), index, time, settings).await {
            Ok(Some(frame)) => lock(&frames)[index] = Some(frame),
            Ok(None) => log::debug!("Worker {worker}: no frame available for sample {index}"),
            Err(error) => {
                log::warn!("Worker {worker}: dropping frame {index} at {time:?}: {error}");
            }
        }
        lock(&reporter).step(Some(index as u64), Some(time));
    }

    context.release();
}

/// Bounded warm-up; a slow or failing context is used anyway.
async fn warm_up(context: &mut dyn DecodeContext, timeout: Duration) {
    match tokio::time::timeout(timeout, context.warm_up()).await {
        Ok(Ok(())) => {}
        Ok(Err(error)) => log::warn!("Decode context warm-up failed, proceeding: {error}"),
        Err(_) => log::warn!("Decode context not ready after {timeout:?}, proceeding"),
    }
}

/// Seek, settle, and rasterize one sample.
async fn capture(
    context: &mut dyn DecodeContext,
    index: usize,
    time: Duration,
    settings: SeekSettings,
) -> Result<Option<RasterFrame>, FilmstripError> {
    match seek_with_timeout(context, time, settings.seek_timeout).await? {
        SeekOutcome::Completed => {
            if !settings.settle_delay.is_zero() {
                tokio::time::sleep(settings.settle_delay).await;
            }
        }
        SeekOutcome::TimedOut => {
            log::warn!(
                "Seek to {time:?} timed out after {:?}; using the current frame",
                settings.seek_timeout
            );
        }
    }
    Ok(context.rasterize(index))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
