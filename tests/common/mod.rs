//! Shared test doubles: a scripted in-memory video source and a progress
//! recorder.

#![allow(dead_code)]

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use filmstrip::{
    DecodeContext, FilmstripError, FrameOutputOptions, OperationType, ProgressCallback,
    ProgressInfo, RasterFrame, VideoSource, VideoSourceInfo,
};
use image::{Rgb, RgbImage};

/// Scripted behaviour of a [`ScriptedSource`].
#[derive(Debug, Default)]
struct Script {
    seek_delay: Duration,
    open_delay: Duration,
    failing_at: Vec<Duration>,
    stalling_at: Vec<Duration>,
    fail_open: bool,
    max_opens: Option<usize>,
    never_renders: bool,
}

#[derive(Debug, Default)]
struct Counters {
    opens: AtomicUsize,
    seeks: AtomicUsize,
    releases: AtomicUsize,
    active_seeks: AtomicUsize,
    max_active_seeks: AtomicUsize,
    completed: Mutex<Vec<Duration>>,
}

/// A fake video whose frames are solid colours derived from their timestamp.
#[derive(Debug, Clone)]
pub struct ScriptedSource {
    identity: String,
    info: VideoSourceInfo,
    script: Arc<Script>,
    counters: Arc<Counters>,
}

impl ScriptedSource {
    /// A 320x180 source of the given length.
    pub fn new(identity: &str, duration: Duration) -> Self {
        Self {
            identity: identity.to_string(),
            info: VideoSourceInfo {
                duration,
                native_width: 320,
                native_height: 180,
                has_audio: Some(false),
            },
            script: Arc::new(Script::default()),
            counters: Arc::new(Counters::default()),
        }
    }

    fn script_mut(&mut self) -> &mut Script {
        Arc::get_mut(&mut self.script).expect("script is configured before cloning")
    }

    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.info.native_width = width;
        self.info.native_height = height;
        self
    }

    pub fn with_seek_delay(mut self, delay: Duration) -> Self {
        self.script_mut().seek_delay = delay;
        self
    }

    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.script_mut().open_delay = delay;
        self
    }

    /// Seeks to any of `times` fail.
    pub fn failing_at(mut self, times: &[Duration]) -> Self {
        self.script_mut().failing_at = times.to_vec();
        self
    }

    /// Seeks to any of `times` never complete.
    pub fn stalling_at(mut self, times: &[Duration]) -> Self {
        self.script_mut().stalling_at = times.to_vec();
        self
    }

    /// Every open fails.
    pub fn failing_open(mut self) -> Self {
        self.script_mut().fail_open = true;
        self
    }

    /// Opens beyond the first `count` fail.
    pub fn with_max_opens(mut self, count: usize) -> Self {
        self.script_mut().max_opens = Some(count);
        self
    }

    /// Seeks succeed but contexts never have a frame to show.
    pub fn never_renders(mut self) -> Self {
        self.script_mut().never_renders = true;
        self
    }

    pub fn info(&self) -> VideoSourceInfo {
        self.info
    }

    pub fn opens(&self) -> usize {
        self.counters.opens.load(Ordering::SeqCst)
    }

    pub fn seeks(&self) -> usize {
        self.counters.seeks.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.counters.releases.load(Ordering::SeqCst)
    }

    pub fn max_concurrent_seeks(&self) -> usize {
        self.counters.max_active_seeks.load(Ordering::SeqCst)
    }

    /// Times of all completed seeks, in completion order.
    pub fn completed_seeks(&self) -> Vec<Duration> {
        self.counters.completed.lock().unwrap().clone()
    }
}

/// Pixel value a frame captured at `time` is filled with.
pub fn shade_for(time: Duration) -> u8 {
    (time.as_millis() / 100 % 200) as u8 + 20
}

#[async_trait]
impl VideoSource for ScriptedSource {
    fn identity(&self) -> &str {
        &self.identity
    }

    async fn open(
        &self,
        output: &FrameOutputOptions,
    ) -> Result<Box<dyn DecodeContext>, FilmstripError> {
        let opened = self.counters.opens.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.script.open_delay.is_zero() {
            tokio::time::sleep(self.script.open_delay).await;
        }
        let over_limit = self.script.max_opens.is_some_and(|limit| opened > limit);
        if self.script.fail_open || over_limit {
            return Err(FilmstripError::SourceLoad {
                source_identity: self.identity.clone(),
                reason: "scripted open failure".to_string(),
            });
        }
        let size = output.resolve_dimensions(self.info.native_width, self.info.native_height);
        Ok(Box::new(ScriptedContext {
            info: self.info,
            size,
            script: Arc::clone(&self.script),
            counters: Arc::clone(&self.counters),
            current: None,
            released: false,
        }))
    }
}

struct ScriptedContext {
    info: VideoSourceInfo,
    size: (u32, u32),
    script: Arc<Script>,
    counters: Arc<Counters>,
    current: Option<Duration>,
    released: bool,
}

/// Tracks the number of seeks in flight, including ones dropped mid-way.
struct ActiveSeek<'a>(&'a Counters);

impl<'a> ActiveSeek<'a> {
    fn enter(counters: &'a Counters) -> Self {
        let active = counters.active_seeks.fetch_add(1, Ordering::SeqCst) + 1;
        counters.max_active_seeks.fetch_max(active, Ordering::SeqCst);
        Self(counters)
    }
}

impl Drop for ActiveSeek<'_> {
    fn drop(&mut self) {
        self.0.active_seeks.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl DecodeContext for ScriptedContext {
    fn info(&self) -> &VideoSourceInfo {
        &self.info
    }

    async fn seek(&mut self, time: Duration) -> Result<(), FilmstripError> {
        if self.released {
            return Err(FilmstripError::ContextReleased);
        }
        self.counters.seeks.fetch_add(1, Ordering::SeqCst);
        let _active = ActiveSeek::enter(&self.counters);

        if self.script.stalling_at.contains(&time) {
            std::future::pending::<()>().await;
        }
        if !self.script.seek_delay.is_zero() {
            tokio::time::sleep(self.script.seek_delay).await;
        }
        if self.script.failing_at.contains(&time) {
            return Err(FilmstripError::SeekFailed {
                time,
                reason: "scripted seek failure".to_string(),
            });
        }

        self.current = Some(time);
        self.counters.completed.lock().unwrap().push(time);
        Ok(())
    }

    fn rasterize(&mut self, index: usize) -> Option<RasterFrame> {
        if self.script.never_renders {
            return None;
        }
        let timestamp = self.current?;
        let (width, height) = self.size;
        let shade = shade_for(timestamp);
        Some(RasterFrame {
            index,
            timestamp,
            image: RgbImage::from_pixel(width, height, Rgb([shade, shade, shade])),
        })
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.counters.releases.fetch_add(1, Ordering::SeqCst);
        }
        self.current = None;
    }
}

/// Records every progress callback.
#[derive(Debug, Default)]
pub struct RecordingProgress {
    events: Mutex<Vec<(OperationType, u64, Option<u64>)>>,
}

impl RecordingProgress {
    pub fn events(&self) -> Vec<(OperationType, u64, Option<u64>)> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, operation: OperationType) -> usize {
        self.events()
            .iter()
            .filter(|(recorded, _, _)| *recorded == operation)
            .count()
    }
}

impl ProgressCallback for RecordingProgress {
    fn on_progress(&self, info: &ProgressInfo) {
        self.events
            .lock()
            .unwrap()
            .push((info.operation, info.current, info.total));
    }
}
