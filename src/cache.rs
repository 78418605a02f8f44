//! Cache keys, persisted records, and quota-aware writes.
//!
//! A [`CacheStore`] is an opaque async key-value map holding JSON strings.
//! Each filmstrip owns two records per [`CacheKey`]: the frame pool metadata
//! and the sprite sheet. Both carry a millisecond `timestamp` that drives
//! expiry on read and oldest-first eviction when the store runs out of room.
//!
//! Reads never fail. Driver errors and undecodable records count as a miss.
//! Writes go through [`set_with_quota_handling`], which evicts and retries
//! once before giving up.

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    str::FromStr,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    configuration::ExtractionStrategy,
    error::{FilmstripError, StoreError},
};

/// Prefix of every key this crate writes.
pub const KEY_PREFIX: &str = "filmstrip";
/// Share of all keys evicted when a write hits the quota.
pub const EVICTION_FRACTION: f64 = 0.2;

/// Async, namespaced key-value storage for cache records.
///
/// Implementations report a full store as [`StoreError::QuotaExceeded`] so
/// that [`set_with_quota_handling`] can recover.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch the value stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Delete `key`. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// All keys currently stored.
    async fn keys(&self) -> Result<Vec<String>, StoreError>;
}

/// The two record kinds stored per [`CacheKey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    /// [`FramePoolRecord`].
    Pool,
    /// [`SpriteSheetRecord`].
    Sprite,
}

impl RecordKind {
    /// Name used inside the rendered key.
    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::Pool => "pool",
            RecordKind::Sprite => "sprite",
        }
    }
}

impl FromStr for RecordKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pool" => Ok(RecordKind::Pool),
            "sprite" => Ok(RecordKind::Sprite),
            other => Err(format!("unknown record kind: {other}")),
        }
    }
}

/// Identifies one frame pool: `(source, thumbnail height, strategy)` under a
/// schema version.
///
/// Rendered as `filmstrip:v{schema}:{kind}:{strategy}:{height}:{source}`.
/// Bumping the schema version orphans every older entry.
///
/// ```
/// use filmstrip::{CacheKey, ExtractionStrategy, RecordKind};
///
/// let key = CacheKey::new("clip.mp4", 60, ExtractionStrategy::Serial, 1);
/// assert_eq!(key.render(RecordKind::Pool), "filmstrip:v1:pool:serial:60:clip.mp4");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Stable identity of the video source.
    pub source_identity: String,
    /// Configured display height of one thumbnail.
    pub thumbnail_height: u32,
    /// Strategy the pool was extracted with.
    pub strategy: ExtractionStrategy,
    /// Record layout version.
    pub schema_version: u32,
}

impl CacheKey {
    /// Create a key.
    pub fn new(
        source_identity: impl Into<String>,
        thumbnail_height: u32,
        strategy: ExtractionStrategy,
        schema_version: u32,
    ) -> Self {
        Self {
            source_identity: source_identity.into(),
            thumbnail_height,
            strategy,
            schema_version,
        }
    }

    /// The store key of the `kind` record.
    pub fn render(&self, kind: RecordKind) -> String {
        format!(
            "{KEY_PREFIX}:v{}:{}:{}:{}:{}",
            self.schema_version,
            kind.as_str(),
            self.strategy,
            self.thumbnail_height,
            self.source_identity
        )
    }

    /// Store key of the [`FramePoolRecord`].
    pub fn pool_key(&self) -> String {
        self.render(RecordKind::Pool)
    }

    /// Store key of the [`SpriteSheetRecord`].
    pub fn sprite_key(&self) -> String {
        self.render(RecordKind::Sprite)
    }

    /// Parse a rendered key. Returns `None` for keys this crate did not write.
    pub fn parse(rendered: &str) -> Option<(RecordKind, CacheKey)> {
        let mut parts = rendered.splitn(6, ':');
        if parts.next()? != KEY_PREFIX {
            return None;
        }
        let schema_version = parts.next()?.strip_prefix('v')?.parse().ok()?;
        let kind = parts.next()?.parse().ok()?;
        let strategy = parts.next()?.parse().ok()?;
        let thumbnail_height = parts.next()?.parse().ok()?;
        let source_identity = parts.next()?.to_string();
        Some((
            kind,
            CacheKey {
                source_identity,
                thumbnail_height,
                strategy,
                schema_version,
            },
        ))
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(
            f,
            "{}@{}px/{} (v{})",
            self.source_identity, self.thumbnail_height, self.strategy, self.schema_version
        )
    }
}

/// Persisted frame pool metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FramePoolRecord {
    pub video_aspect_ratio: f64,
    pub frame_width: u32,
    pub frame_height: u32,
    pub total_frames: usize,
    /// Source duration in seconds.
    pub duration: f64,
    /// Creation time, milliseconds since the Unix epoch.
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_audio: Option<bool>,
}

/// Image reference and layout of a stored sprite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpriteInfo {
    /// `data:image/jpeg;base64,` URL of the sheet.
    pub sprite_url: String,
    pub rows: usize,
    pub cols: usize,
}

/// Persisted sprite sheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpriteSheetRecord {
    pub sprite_info: SpriteInfo,
    pub video_aspect_ratio: f64,
    pub frame_width: u32,
    pub frame_height: u32,
    pub total_frames: usize,
    /// Creation time, milliseconds since the Unix epoch.
    pub timestamp: u64,
}

/// Records that expire based on their creation time.
pub trait TimestampedRecord {
    /// Creation time, milliseconds since the Unix epoch.
    fn timestamp(&self) -> u64;
}

impl TimestampedRecord for FramePoolRecord {
    fn timestamp(&self) -> u64 {
        self.timestamp
    }
}

impl TimestampedRecord for SpriteSheetRecord {
    fn timestamp(&self) -> u64 {
        self.timestamp
    }
}

/// Current time in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

/// A record created at `timestamp` is fresh while `now - timestamp < ttl`.
pub fn is_fresh(timestamp: u64, ttl: Duration, now: u64) -> bool {
    u128::from(now.saturating_sub(timestamp)) < ttl.as_millis()
}

/// Read and validate the record stored under `key`.
///
/// Returns `None` on a miss, a driver error, or an undecodable value. An
/// expired record is removed from the store before returning `None`.
pub async fn read_record<T>(store: &dyn CacheStore, key: &str, ttl: Duration, now: u64) -> Option<T>
where
    T: DeserializeOwned + TimestampedRecord,
{
    let raw = match store.get(key).await {
        Ok(Some(raw)) => raw,
        Ok(None) => {
            log::debug!("Cache miss: {key}");
            return None;
        }
        Err(error) => {
            log::debug!("Cache read failed for {key}, treating as miss: {error}");
            return None;
        }
    };

    let record: T = match serde_json::from_str(&raw) {
        Ok(record) => record,
        Err(error) => {
            log::debug!("Ignoring corrupt cache record {key}: {error}");
            return None;
        }
    };

    if !is_fresh(record.timestamp(), ttl, now) {
        log::debug!("Cache record {key} expired; removing");
        if let Err(error) = store.remove(key).await {
            log::debug!("Could not remove expired record {key}: {error}");
        }
        return None;
    }

    log::debug!("Cache hit: {key}");
    Some(record)
}

/// Serialize `record` and store it with [`set_with_quota_handling`].
///
/// Returns whether the record was persisted.
///
/// # Errors
///
/// Returns [`FilmstripError::CacheRecord`] if the record cannot be serialized.
pub async fn write_record<T: Serialize>(
    store: &dyn CacheStore,
    key: &str,
    record: &T,
) -> Result<bool, FilmstripError> {
    let value = serde_json::to_string(record)?;
    Ok(set_with_quota_handling(store, key, &value).await)
}

/// Store `value`, recovering once from a full store.
///
/// On [`StoreError::QuotaExceeded`] the oldest 20% of all keys (at least one)
/// are evicted and the write is retried exactly once. Returns `false` when the
/// value could not be persisted; the caller keeps working from memory.
pub async fn set_with_quota_handling(store: &dyn CacheStore, key: &str, value: &str) -> bool {
    match store.set(key, value).await {
        Ok(()) => return true,
        Err(StoreError::QuotaExceeded) => {
            log::debug!("Cache store full while writing {key}; evicting oldest entries");
        }
        Err(error) => {
            log::warn!("Cache write failed for {key}, continuing without persistence: {error}");
            return false;
        }
    }

    let evicted = evict_oldest(store, EVICTION_FRACTION).await;
    match store.set(key, value).await {
        Ok(()) => {
            log::debug!("Cache write for {key} succeeded after evicting {evicted} entries");
            true
        }
        Err(error) => {
            log::warn!(
                "Cache write for {key} failed after evicting {evicted} entries, continuing without persistence: {error}"
            );
            false
        }
    }
}

/// Remove the oldest `max(1, ceil(len * fraction))` entries of the store.
///
/// Age comes from each value's `timestamp` field; values without one are
/// treated as the oldest. Returns the number of entries removed.
pub async fn evict_oldest(store: &dyn CacheStore, fraction: f64) -> usize {
    let keys = match store.keys().await {
        Ok(keys) => keys,
        Err(error) => {
            log::warn!("Could not list cache keys for eviction: {error}");
            return 0;
        }
    };
    if keys.is_empty() {
        return 0;
    }

    let mut aged = Vec::with_capacity(keys.len());
    for key in keys {
        let timestamp = match store.get(&key).await {
            Ok(Some(raw)) => stored_timestamp(&raw),
            _ => 0,
        };
        aged.push((timestamp, key));
    }
    aged.sort();

    let count = ((aged.len() as f64 * fraction).ceil() as usize).clamp(1, aged.len());
    let mut removed = 0;
    for (_, key) in aged.into_iter().take(count) {
        match store.remove(&key).await {
            Ok(()) => removed += 1,
            Err(error) => log::debug!("Could not evict {key}: {error}"),
        }
    }
    removed
}

fn stored_timestamp(raw: &str) -> u64 {
    serde_json::from_str::<serde_json::Value>(raw)
        .ok()
        .and_then(|value| value.get("timestamp").and_then(serde_json::Value::as_u64))
        .unwrap_or(0)
}
