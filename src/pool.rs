//! Frame pool lifecycle.
//!
//! A [`FilmstripContext`] owns everything one filmstrip widget needs: the
//! current video source, the cache store, and the in-memory pool. The pool is
//! extracted once at the widest anticipated layout, packed into a sprite,
//! persisted, and then resampled for every viewport change without touching
//! the decoder again.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use filmstrip::{ExtractionStrategy, FfmpegSource, FilmstripContext, FilmstripError, FilmstripOptions, MemoryStore};
//!
//! # async fn example() -> Result<(), FilmstripError> {
//! let context = FilmstripContext::new(
//!     Arc::new(FfmpegSource::new("input.mp4")),
//!     Arc::new(MemoryStore::new()),
//!     FilmstripOptions::new(),
//! );
//! let ready = context.ensure_pool(60, ExtractionStrategy::Concurrent).await?;
//! println!("{} frames in a {}x{} sprite", ready.pool.total_frames, ready.sprite.rows, ready.sprite.cols);
//!
//! for frame in context.resample(800) {
//!     println!("slot {} -> frame {}", frame.display_index, frame.source_index);
//! }
//! # Ok(())
//! # }
//! ```

use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use crate::{
    cache::{
        CacheKey, CacheStore, FramePoolRecord, SpriteInfo, SpriteSheetRecord, is_fresh,
        now_millis, read_record, write_record,
    },
    configuration::{ExtractionStrategy, FilmstripOptions},
    error::FilmstripError,
    progress::CancellationToken,
    resample::{DisplayFrame, resample},
    sampler::FrameSampler,
    source::{VideoSource, VideoSourceInfo},
    sprite::{SpritePacker, SpriteSheet},
};

/// Fewest frames a pool is planned with.
pub const MIN_POOL_FRAMES: usize = 10;
/// Most frames a pool is planned with.
pub const MAX_POOL_FRAMES: usize = 50;
/// Headroom applied to the anticipated width.
const WIDTH_HEADROOM: f64 = 1.2;
/// Extra frames on top of what the widest layout needs.
const EXTRA_FRAMES: usize = 5;

/// Number of frames a pool needs to fill `max_width` at `thumbnail_height`.
///
/// `clamp(ceil(max_width * 1.2 / (h * clamp(aspect, 0.1, 10))) + 5, 10, 50)`.
///
/// ```
/// use filmstrip::plan_total_frames;
///
/// assert_eq!(plan_total_frames(60, 16.0 / 9.0, 1920), 27);
/// assert_eq!(plan_total_frames(60, 0.01, 1920), 50);
/// assert_eq!(plan_total_frames(60, 16.0 / 9.0, 100), 10);
/// ```
pub fn plan_total_frames(thumbnail_height: u32, aspect_ratio: f64, max_width: u32) -> usize {
    let aspect_ratio = if aspect_ratio.is_finite() {
        aspect_ratio.clamp(0.1, 10.0)
    } else {
        1.0
    };
    let single_frame_width = f64::from(thumbnail_height.max(1)) * aspect_ratio;
    let needed = (f64::from(max_width) * WIDTH_HEADROOM / single_frame_width).ceil() as usize;
    (needed + EXTRA_FRAMES).clamp(MIN_POOL_FRAMES, MAX_POOL_FRAMES)
}

/// Metadata of an extracted frame pool.
#[derive(Debug, Clone, PartialEq)]
pub struct FramePool {
    /// Frames in the pool (and cells in its sprite).
    pub total_frames: usize,
    /// Source aspect ratio.
    pub aspect_ratio: f64,
    /// Width of one rasterized frame in pixels.
    pub frame_width: u32,
    /// Height of one rasterized frame in pixels.
    pub frame_height: u32,
    /// Source duration.
    pub duration: Duration,
    /// Creation time, milliseconds since the Unix epoch.
    pub created_at: u64,
    /// Whether the source has audio, when known.
    pub has_audio: Option<bool>,
}

impl FramePool {
    fn from_record(record: &FramePoolRecord) -> Self {
        Self {
            total_frames: record.total_frames,
            aspect_ratio: record.video_aspect_ratio,
            frame_width: record.frame_width,
            frame_height: record.frame_height,
            duration: Duration::try_from_secs_f64(record.duration).unwrap_or_default(),
            created_at: record.timestamp,
            has_audio: record.has_audio,
        }
    }

    fn to_record(&self) -> FramePoolRecord {
        FramePoolRecord {
            video_aspect_ratio: self.aspect_ratio,
            frame_width: self.frame_width,
            frame_height: self.frame_height,
            total_frames: self.total_frames,
            duration: self.duration.as_secs_f64(),
            timestamp: self.created_at,
            has_audio: self.has_audio,
        }
    }
}

/// A pool and its sprite, ready for resampling.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadyPool {
    /// The key both records are stored under.
    pub key: CacheKey,
    pub pool: FramePool,
    pub sprite: SpriteSheet,
}

impl ReadyPool {
    /// Display frames for `display_width` at the key's thumbnail height.
    pub fn resample(&self, display_width: u32) -> Vec<DisplayFrame> {
        resample(&self.pool, &self.sprite, display_width, self.key.thumbnail_height)
    }

    fn sprite_record(&self) -> SpriteSheetRecord {
        SpriteSheetRecord {
            sprite_info: SpriteInfo {
                sprite_url: self.sprite.data_url(),
                rows: self.sprite.rows,
                cols: self.sprite.cols,
            },
            video_aspect_ratio: self.pool.aspect_ratio,
            frame_width: self.pool.frame_width,
            frame_height: self.pool.frame_height,
            total_frames: self.pool.total_frames,
            timestamp: self.pool.created_at,
        }
    }
}

/// Lifecycle phase of a [`FilmstripContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolPhase {
    /// No pool in memory.
    Empty,
    /// A pool build is in flight.
    Loading,
    /// A pool is in memory and can be resampled.
    Ready,
}

struct SessionState {
    source: Arc<dyn VideoSource>,
    known_info: Option<VideoSourceInfo>,
    /// Bumped on every source change; builds from older generations are discarded.
    generation: u64,
    build_token: CancellationToken,
    current: Option<Arc<ReadyPool>>,
    loading: usize,
    last_error: Option<String>,
}

/// What a build works from, captured under a single state lock.
struct BuildTarget {
    key: CacheKey,
    source: Arc<dyn VideoSource>,
    known_info: Option<VideoSourceInfo>,
    generation: u64,
    token: CancellationToken,
}

/// Serialises builds for one key.
///
/// Callers that waited on the gate pick up the outcome of the build that
/// held it instead of starting their own.
#[derive(Default)]
struct BuildGate {
    /// Builds finished under this gate.
    finished: AtomicU64,
    /// Outcome of the latest build; an error keeps only its message.
    outcome: tokio::sync::Mutex<Option<Result<Arc<ReadyPool>, String>>>,
}

/// Drops the gate for a key once its last user is done with it.
struct GateLease<'a> {
    context: &'a FilmstripContext,
    key: CacheKey,
    gate: Arc<BuildGate>,
}

impl Drop for GateLease<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.context.in_flight();
        // Clones are only handed out under this lock, so the count is exact.
        let idle = in_flight.get(&self.key).is_some_and(|gate| {
            Arc::ptr_eq(gate, &self.gate) && Arc::strong_count(&self.gate) == 2
        });
        if idle {
            in_flight.remove(&self.key);
        }
    }
}

/// Per-widget frame pool manager.
///
/// Cloning is not supported; share a context behind an [`Arc`] instead.
pub struct FilmstripContext {
    store: Arc<dyn CacheStore>,
    options: FilmstripOptions,
    state: Mutex<SessionState>,
    in_flight: Mutex<HashMap<CacheKey, Arc<BuildGate>>>,
}

impl fmt::Debug for FilmstripContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("FilmstripContext")
            .field("source", &state.source.identity())
            .field("generation", &state.generation)
            .field("current", &state.current.as_ref().map(|ready| &ready.key))
            .field("loading", &state.loading)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Decrements the loading counter however a build ends.
struct LoadingGuard<'a> {
    context: &'a FilmstripContext,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.context.state();
        state.loading = state.loading.saturating_sub(1);
    }
}

impl FilmstripContext {
    /// Create a context for `source`, persisting pools in `store`.
    pub fn new(
        source: Arc<dyn VideoSource>,
        store: Arc<dyn CacheStore>,
        options: FilmstripOptions,
    ) -> Self {
        let build_token = new_build_token(&options);
        Self {
            store,
            state: Mutex::new(SessionState {
                source,
                known_info: None,
                generation: 0,
                build_token,
                current: None,
                loading: 0,
                last_error: None,
            }),
            options,
            in_flight: Mutex::default(),
        }
    }

    /// Supply source metadata up front so pool builds skip the probing
    /// extraction.
    #[must_use]
    pub fn with_source_info(self, info: VideoSourceInfo) -> Self {
        self.state().known_info = Some(info);
        self
    }

    /// The configuration this context was created with.
    pub fn options(&self) -> &FilmstripOptions {
        &self.options
    }

    /// The cache store.
    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// The current video source.
    pub fn source(&self) -> Arc<dyn VideoSource> {
        Arc::clone(&self.state().source)
    }

    /// The pool currently in memory.
    pub fn current(&self) -> Option<Arc<ReadyPool>> {
        self.state().current.clone()
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> PoolPhase {
        let state = self.state();
        if state.loading > 0 {
            PoolPhase::Loading
        } else if state.current.is_some() {
            PoolPhase::Ready
        } else {
            PoolPhase::Empty
        }
    }

    /// Returns `true` while any pool build is in flight.
    pub fn is_loading(&self) -> bool {
        self.state().loading > 0
    }

    /// Number of keys with a build running or callers waiting for one.
    pub fn pending_builds(&self) -> usize {
        self.in_flight().len()
    }

    /// Message of the most recent build failure, cleared by the next success
    /// or source change.
    pub fn last_error(&self) -> Option<String> {
        self.state().last_error.clone()
    }

    /// Switch to another source.
    ///
    /// Drops the in-memory pool and cancels the in-flight build. A build that
    /// still completes afterwards is discarded.
    pub fn set_source(&self, source: Arc<dyn VideoSource>) {
        self.replace_source(source, None);
    }

    /// Like [`set_source`](Self::set_source) with known metadata.
    pub fn set_source_with_info(&self, source: Arc<dyn VideoSource>, info: VideoSourceInfo) {
        self.replace_source(source, Some(info));
    }

    fn replace_source(&self, source: Arc<dyn VideoSource>, info: Option<VideoSourceInfo>) {
        let mut state = self.state();
        log::debug!(
            "Switching source from {} to {}",
            state.source.identity(),
            source.identity()
        );
        state.build_token.cancel();
        state.build_token = new_build_token(&self.options);
        state.generation += 1;
        state.source = source;
        state.known_info = info;
        state.current = None;
        state.last_error = None;
        drop(state);
        self.in_flight().clear();
    }

    /// Display frames of the in-memory pool for `display_width`.
    ///
    /// Empty when no pool is ready.
    pub fn resample(&self, display_width: u32) -> Vec<DisplayFrame> {
        self.current()
            .map(|ready| ready.resample(display_width))
            .unwrap_or_default()
    }

    /// Cache key for the current source.
    pub fn key_for(&self, thumbnail_height: u32, strategy: ExtractionStrategy) -> CacheKey {
        self.target(thumbnail_height, strategy).key
    }

    fn target(&self, thumbnail_height: u32, strategy: ExtractionStrategy) -> BuildTarget {
        let state = self.state();
        BuildTarget {
            key: CacheKey::new(
                state.source.identity(),
                thumbnail_height,
                strategy,
                self.options.schema_version,
            ),
            source: Arc::clone(&state.source),
            known_info: state.known_info,
            generation: state.generation,
            token: state.build_token.clone(),
        }
    }

    /// Make a pool for `(thumbnail_height, strategy)` available.
    ///
    /// Returns the in-memory pool when it matches, then tries the cache, and
    /// only then extracts. Concurrent calls for the same key share one build.
    ///
    /// A build in which no frame could be captured returns a pool with an
    /// [empty sprite](SpriteSheet::is_empty). It is neither cached nor
    /// adopted, and [`last_error`](Self::last_error) reports
    /// [`FilmstripError::NoFramesCaptured`].
    ///
    /// # Errors
    ///
    /// - Source-load and decode errors from the sampler.
    /// - [`FilmstripError::SourceChanged`] if the source was replaced while
    ///   the build ran.
    /// - [`FilmstripError::Cancelled`] if the configured token was cancelled.
    /// - [`FilmstripError::BuildFailed`] if this call waited on a concurrent
    ///   build of the same pool and that build failed.
    ///
    /// Cache failures never fail the call.
    pub async fn ensure_pool(
        &self,
        thumbnail_height: u32,
        strategy: ExtractionStrategy,
    ) -> Result<Arc<ReadyPool>, FilmstripError> {
        if thumbnail_height == 0 {
            return Err(FilmstripError::InvalidDimensions {
                width: 0,
                height: thumbnail_height,
            });
        }
        let target = self.target(thumbnail_height, strategy);
        let key = &target.key;
        if let Some(ready) = self.current_for(key) {
            return Ok(ready);
        }

        let lease = self.lease(key);
        let seen = lease.gate.finished.load(Ordering::Acquire);
        let mut outcome = lease.gate.outcome.lock().await;
        if self.state().generation != target.generation {
            log::debug!("Dropping request for {key}: source changed while waiting");
            return Err(FilmstripError::SourceChanged);
        }
        if let Some(ready) = self.current_for(key) {
            log::debug!("Sharing pool built by a concurrent call for {key}");
            return Ok(ready);
        }
        if lease.gate.finished.load(Ordering::Acquire) != seen {
            if let Some(shared) = outcome.as_ref() {
                log::debug!("Sharing outcome of a concurrent build for {key}");
                return shared.clone().map_err(FilmstripError::BuildFailed);
            }
        }

        let result = self.load_or_build(&target).await;
        *outcome = match &result {
            Ok(ready) => Some(Ok(Arc::clone(ready))),
            Err(FilmstripError::SourceChanged | FilmstripError::Cancelled) => None,
            Err(error) => Some(Err(error.to_string())),
        };
        lease.gate.finished.fetch_add(1, Ordering::Release);
        result
    }

    async fn load_or_build(&self, target: &BuildTarget) -> Result<Arc<ReadyPool>, FilmstripError> {
        let (key, generation) = (&target.key, target.generation);
        if let Some(ready) = self.load_cached(key).await {
            return self.adopt(ready, generation);
        }

        self.state().loading += 1;
        let _loading = LoadingGuard { context: self };
        log::debug!("Building frame pool for {key}");

        match self.build(target).await {
            Ok(ready) if ready.sprite.is_empty() => {
                log::warn!("No frames captured for {key}; nothing cached");
                let mut state = self.state();
                if state.generation == generation {
                    state.last_error = Some(FilmstripError::NoFramesCaptured.to_string());
                }
                Ok(Arc::new(ready))
            }
            Ok(ready) => {
                log::info!(
                    "Frame pool ready for {key}: {} frames, {}x{} sprite",
                    ready.pool.total_frames,
                    ready.sprite.rows,
                    ready.sprite.cols
                );
                self.adopt(ready, generation)
            }
            Err(error) => {
                let error = if self.state().generation != generation {
                    FilmstripError::SourceChanged
                } else {
                    error
                };
                if !matches!(error, FilmstripError::SourceChanged) {
                    log::warn!("Frame pool build failed for {key}: {error}");
                    let mut state = self.state();
                    state.current = None;
                    state.last_error = Some(error.to_string());
                }
                Err(error)
            }
        }
    }

    /// Build with the configured default strategy and thumbnail height.
    ///
    /// # Errors
    ///
    /// Same as [`ensure_pool`](Self::ensure_pool).
    pub async fn ensure(&self) -> Result<Arc<ReadyPool>, FilmstripError> {
        self.ensure_pool(self.options.thumbnail_height, self.options.strategy)
            .await
    }

    /// Load a pool from the cache only, adopting it on a hit. Never extracts.
    pub async fn cached_pool(
        &self,
        thumbnail_height: u32,
        strategy: ExtractionStrategy,
    ) -> Option<Arc<ReadyPool>> {
        let key = self.key_for(thumbnail_height, strategy);
        if let Some(ready) = self.current_for(&key) {
            return Some(ready);
        }
        let generation = self.state().generation;
        let ready = self.load_cached(&key).await?;
        self.adopt(ready, generation).ok()
    }

    /// Drop the pool for `(thumbnail_height, strategy)` from memory and the
    /// cache, forcing the next [`ensure_pool`](Self::ensure_pool) to extract.
    pub async fn invalidate(&self, thumbnail_height: u32, strategy: ExtractionStrategy) {
        let key = self.key_for(thumbnail_height, strategy);
        {
            let mut state = self.state();
            if state.current.as_ref().is_some_and(|ready| ready.key == key) {
                state.current = None;
            }
        }
        for record_key in [key.pool_key(), key.sprite_key()] {
            if let Err(error) = self.store.remove(&record_key).await {
                log::debug!("Could not remove {record_key}: {error}");
            }
        }
        log::debug!("Invalidated frame pool for {key}");
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn in_flight(&self) -> MutexGuard<'_, HashMap<CacheKey, Arc<BuildGate>>> {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// The in-memory pool for `key`, dropped once older than the pool TTL.
    fn current_for(&self, key: &CacheKey) -> Option<Arc<ReadyPool>> {
        let mut state = self.state();
        let ready = state.current.as_ref().filter(|ready| &ready.key == key)?;
        if is_fresh(ready.pool.created_at, self.options.pool_ttl, now_millis()) {
            return Some(Arc::clone(ready));
        }
        log::debug!("In-memory frame pool for {key} expired; dropping it");
        state.current = None;
        None
    }

    fn lease(&self, key: &CacheKey) -> GateLease<'_> {
        let gate = Arc::clone(self.in_flight().entry(key.clone()).or_default());
        GateLease {
            context: self,
            key: key.clone(),
            gate,
        }
    }

    fn adopt(&self, ready: ReadyPool, generation: u64) -> Result<Arc<ReadyPool>, FilmstripError> {
        let mut state = self.state();
        if state.generation != generation {
            log::debug!("Discarding pool for {}: source changed", ready.key);
            return Err(FilmstripError::SourceChanged);
        }
        let ready = Arc::new(ready);
        state.current = Some(Arc::clone(&ready));
        state.last_error = None;
        Ok(ready)
    }

    /// Both records must be present, fresh, and consistent.
    async fn load_cached(&self, key: &CacheKey) -> Option<ReadyPool> {
        let now = now_millis();
        let store = self.store.as_ref();
        let pool_record: Option<FramePoolRecord> =
            read_record(store, &key.pool_key(), self.options.pool_ttl, now).await;
        let sprite_record: Option<SpriteSheetRecord> =
            read_record(store, &key.sprite_key(), self.options.sprite_ttl, now).await;
        let (pool_record, sprite_record) = (pool_record?, sprite_record?);

        if pool_record.total_frames != sprite_record.total_frames {
            log::debug!("Cached records for {key} disagree on frame count; ignoring");
            return None;
        }

        let info = &sprite_record.sprite_info;
        let sprite = match SpriteSheet::from_data_url(
            &info.sprite_url,
            info.rows,
            info.cols,
            sprite_record.frame_width,
            sprite_record.frame_height,
        ) {
            Ok(sprite) if !sprite.is_empty() => sprite,
            Ok(_) => return None,
            Err(error) => {
                log::debug!("Ignoring cached sprite for {key}: {error}");
                return None;
            }
        };

        log::debug!("Adopting cached frame pool for {key}");
        Some(ReadyPool {
            key: key.clone(),
            pool: FramePool::from_record(&pool_record),
            sprite,
        })
    }

    async fn build(&self, target: &BuildTarget) -> Result<ReadyPool, FilmstripError> {
        let (key, source) = (&target.key, target.source.as_ref());
        let sampler = FrameSampler::new(self.options.clone())
            .with_output(self.options.frame_output(key.thumbnail_height))
            .with_cancellation(target.token.clone());

        let info = match target.known_info {
            Some(info) => info,
            None => {
                sampler
                    .extract(source, 1, ExtractionStrategy::Serial)
                    .await?
                    .info
            }
        };

        let planned = plan_total_frames(
            key.thumbnail_height,
            info.aspect_ratio(),
            self.options.max_anticipated_width,
        );
        let sampled = sampler.extract(source, planned, key.strategy).await?;
        let total_frames = sampled.frames.len();
        let (frame_width, frame_height) = (sampled.frame_width, sampled.frame_height);
        let cols = total_frames.min(self.options.sprite_columns);

        let packer = SpritePacker::new(self.options.sprite_quality)
            .with_progress(Arc::clone(&self.options.progress));
        let frames = sampled.frames;
        let sprite = tokio::task::spawn_blocking(move || {
            packer.pack(frames, frame_width, frame_height, cols)
        })
        .await
        .map_err(|error| FilmstripError::SpriteEncodeError(format!("packing task failed: {error}")))??;

        let ready = ReadyPool {
            key: key.clone(),
            pool: FramePool {
                total_frames,
                aspect_ratio: info.aspect_ratio(),
                frame_width,
                frame_height,
                duration: info.duration,
                created_at: now_millis(),
                has_audio: info.has_audio,
            },
            sprite,
        };

        if self.state().generation != target.generation {
            return Err(FilmstripError::SourceChanged);
        }
        if !ready.sprite.is_empty() {
            self.persist(&ready).await;
        }
        Ok(ready)
    }

    async fn persist(&self, ready: &ReadyPool) {
        let store = self.store.as_ref();
        let pool_saved = write_record(store, &ready.key.pool_key(), &ready.pool.to_record()).await;
        let sprite_saved = write_record(store, &ready.key.sprite_key(), &ready.sprite_record()).await;
        match (pool_saved, sprite_saved) {
            (Ok(true), Ok(true)) => log::debug!("Persisted frame pool for {}", ready.key),
            (Err(error), _) | (_, Err(error)) => {
                log::warn!("Could not serialize frame pool for {}: {error}", ready.key);
            }
            _ => log::warn!(
                "Frame pool for {} kept for this session only; cache store is full",
                ready.key
            ),
        }
    }
}

fn new_build_token(options: &FilmstripOptions) -> CancellationToken {
    options
        .cancellation
        .as_ref()
        .map(CancellationToken::child)
        .unwrap_or_default()
}
