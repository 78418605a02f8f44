//! Build progress and cooperative cancellation.
//!
//! Building a frame pool is the only slow thing a filmstrip does. Callers
//! watch it through a [`ProgressCallback`] (to drive a spinner or a bar) and
//! stop it through a [`CancellationToken`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use filmstrip::{FilmstripOptions, ProgressCallback, ProgressInfo};
//!
//! struct PrintProgress;
//!
//! impl ProgressCallback for PrintProgress {
//!     fn on_progress(&self, info: &ProgressInfo) {
//!         if let Some(pct) = info.percentage {
//!             println!("[{:?}] {pct:.0}%", info.operation);
//!         }
//!     }
//! }
//!
//! let options = FilmstripOptions::new().with_progress(Arc::new(PrintProgress));
//! ```

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

/// Stage of a pool build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum OperationType {
    /// Seeking and rasterizing sample frames.
    FrameExtraction,
    /// Compositing frames into the sprite sheet.
    SpritePacking,
}

/// Progress snapshot handed to [`ProgressCallback::on_progress`].
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// Stage being reported.
    pub operation: OperationType,
    /// Frames handled so far in this stage.
    pub current: u64,
    /// Frames the stage will handle, when known.
    pub total: Option<u64>,
    /// `current / total` as a percentage.
    pub percentage: Option<f32>,
    /// Time since the stage started.
    pub elapsed: Duration,
    /// Linear extrapolation of the remaining time.
    pub estimated_remaining: Option<Duration>,
    /// Index of the frame just handled. `None` in the closing report.
    pub current_frame: Option<u64>,
    /// Sample time of the frame just handled. `None` in the closing report.
    pub current_timestamp: Option<Duration>,
}

/// Receiver of pool build progress.
///
/// The concurrent sampler reports from several tasks, hence `Send + Sync`.
/// Callbacks only observe; cancel through a [`CancellationToken`].
pub trait ProgressCallback: Send + Sync {
    /// Called every `batch_size` frames and once when a stage ends.
    fn on_progress(&self, info: &ProgressInfo);
}

/// Discards every report.
pub(crate) struct NoOpProgress;

impl ProgressCallback for NoOpProgress {
    fn on_progress(&self, _info: &ProgressInfo) {}
}

#[derive(Debug, Default)]
struct CancelFlag {
    raised: AtomicBool,
    parent: Option<Arc<CancelFlag>>,
}

impl CancelFlag {
    fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Acquire)
            || self.parent.as_deref().is_some_and(CancelFlag::is_raised)
    }
}

/// Shared cancellation flag.
///
/// Clones observe the same flag. A [`child`](CancellationToken::child) is
/// cancelled together with its parent but can also be cancelled alone, which
/// is how a source change aborts one build without touching the caller's
/// token.
///
/// ```
/// use filmstrip::CancellationToken;
///
/// let session = CancellationToken::new();
/// let build = session.child();
///
/// build.cancel();
/// assert!(!session.is_cancelled());
///
/// let next_build = session.child();
/// session.cancel();
/// assert!(next_build.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<CancelFlag>,
}

impl CancellationToken {
    /// A token nobody has cancelled yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that also reports cancelled once `self` is.
    pub fn child(&self) -> Self {
        Self {
            flag: Arc::new(CancelFlag {
                raised: AtomicBool::new(false),
                parent: Some(Arc::clone(&self.flag)),
            }),
        }
    }

    /// Cancel this token, its clones, and its children.
    pub fn cancel(&self) {
        self.flag.raised.store(true, Ordering::Release);
    }

    /// Returns `true` once this token or any ancestor was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.flag.is_raised()
    }
}

/// Counts handled frames for one stage and forwards batched reports.
pub(crate) struct ProgressReporter {
    callback: Arc<dyn ProgressCallback>,
    operation: OperationType,
    total: Option<u64>,
    batch_size: u64,
    handled: u64,
    started: Instant,
}

impl ProgressReporter {
    pub(crate) fn new(
        callback: Arc<dyn ProgressCallback>,
        operation: OperationType,
        total: Option<u64>,
        batch_size: u64,
    ) -> Self {
        Self {
            callback,
            operation,
            total,
            batch_size: batch_size.max(1),
            handled: 0,
            started: Instant::now(),
        }
    }

    /// Count one handled frame; reports on every full batch.
    pub(crate) fn step(&mut self, frame: Option<u64>, timestamp: Option<Duration>) {
        self.handled += 1;
        if self.handled % self.batch_size == 0 {
            self.emit(frame, timestamp);
        }
    }

    /// Closing report, sent regardless of batching.
    pub(crate) fn done(&self) {
        self.emit(None, None);
    }

    fn emit(&self, frame: Option<u64>, timestamp: Option<Duration>) {
        let elapsed = self.started.elapsed();
        let total = self.total.filter(|&total| total > 0);
        let percentage = total.map(|total| self.handled as f32 * 100.0 / total as f32);
        let estimated_remaining = total.filter(|_| self.handled > 0).map(|total| {
            let left = total.saturating_sub(self.handled) as f64;
            elapsed.mul_f64(left / self.handled as f64)
        });

        self.callback.on_progress(&ProgressInfo {
            operation: self.operation,
            current: self.handled,
            total: self.total,
            percentage,
            elapsed,
            estimated_remaining,
            current_frame: frame,
            current_timestamp: timestamp,
        });
    }
}
