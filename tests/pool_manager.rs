//! Frame pool lifecycle tests: caching, deduplication, source changes.

mod common;

use std::{sync::Arc, time::Duration};

use common::ScriptedSource;
use filmstrip::{
    CacheKey, CacheStore, CancellationToken, ExtractionStrategy, FilmstripContext, FilmstripError,
    FilmstripOptions, FramePoolRecord, MemoryStore, PoolPhase, SpriteSheetRecord, now_millis,
};

const SERIAL: ExtractionStrategy = ExtractionStrategy::Serial;
const CONCURRENT: ExtractionStrategy = ExtractionStrategy::Concurrent;

fn minute_clip(identity: &str) -> ScriptedSource {
    ScriptedSource::new(identity, Duration::from_secs(60))
}

fn context_for(source: &ScriptedSource, store: &Arc<MemoryStore>) -> FilmstripContext {
    FilmstripContext::new(
        Arc::new(source.clone()),
        Arc::clone(store) as Arc<dyn CacheStore>,
        FilmstripOptions::new(),
    )
}

async fn stored<T: serde::de::DeserializeOwned>(store: &MemoryStore, key: &str) -> Option<T> {
    let raw = store.get(key).await.unwrap()?;
    Some(serde_json::from_str(&raw).unwrap())
}

// ── Building ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn builds_plans_and_persists_a_pool() {
    let store = Arc::new(MemoryStore::new());
    let source = minute_clip("clip.mp4");
    let context = context_for(&source, &store);

    let ready = context.ensure_pool(60, CONCURRENT).await.unwrap();

    // 320x180 at 60px is 107px wide; 1920px needs 27 frames.
    assert_eq!(ready.pool.total_frames, 27);
    assert_eq!((ready.pool.frame_width, ready.pool.frame_height), (107, 60));
    assert_eq!((ready.sprite.rows, ready.sprite.cols), (3, 10));
    assert!(!ready.sprite.is_empty());
    // One probing context plus four extraction contexts.
    assert_eq!(source.opens(), 5);
    assert_eq!(context.phase(), PoolPhase::Ready);
    assert!(context.last_error().is_none());

    let key = CacheKey::new("clip.mp4", 60, CONCURRENT, 1);
    let pool: FramePoolRecord = stored(&store, &key.pool_key()).await.unwrap();
    let sprite: SpriteSheetRecord = stored(&store, &key.sprite_key()).await.unwrap();
    assert_eq!(pool.total_frames, 27);
    assert_eq!(sprite.total_frames, 27);
    assert_eq!(pool.has_audio, Some(false));
    assert!(sprite.sprite_info.sprite_url.starts_with("data:image/jpeg;base64,"));
}

#[tokio::test(start_paused = true)]
async fn short_clips_get_fewer_frames() {
    let store = Arc::new(MemoryStore::new());
    let source = ScriptedSource::new("short.mp4", Duration::from_secs(3));
    let context = context_for(&source, &store);

    let ready = context.ensure_pool(60, SERIAL).await.unwrap();

    assert_eq!(ready.pool.total_frames, 7);
    assert_eq!((ready.sprite.rows, ready.sprite.cols), (1, 7));
}

#[tokio::test(start_paused = true)]
async fn known_source_info_skips_the_probe() {
    let store = Arc::new(MemoryStore::new());
    let source = minute_clip("known.mp4");
    let context = context_for(&source, &store).with_source_info(source.info());

    context.ensure_pool(60, SERIAL).await.unwrap();

    assert_eq!(source.opens(), 1);
}

#[tokio::test(start_paused = true)]
async fn zero_height_is_rejected() {
    let store = Arc::new(MemoryStore::new());
    let source = minute_clip("zero.mp4");
    let context = context_for(&source, &store);

    let result = context.ensure_pool(0, SERIAL).await;
    assert!(matches!(result, Err(FilmstripError::InvalidDimensions { .. })));
    assert_eq!(source.opens(), 0);
}

// ── Reuse & deduplication ──────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn repeated_calls_reuse_the_pool() {
    let store = Arc::new(MemoryStore::new());
    let source = minute_clip("same.mp4");
    let context = context_for(&source, &store);

    let first = context.ensure_pool(60, SERIAL).await.unwrap();
    let opens = source.opens();
    let second = context.ensure_pool(60, SERIAL).await.unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(source.opens(), opens);
}

#[tokio::test(start_paused = true)]
async fn concurrent_calls_share_one_build() {
    let store = Arc::new(MemoryStore::new());
    let source = minute_clip("shared.mp4").with_seek_delay(Duration::from_millis(10));
    let context = context_for(&source, &store).with_source_info(source.info());

    let (first, second) = tokio::join!(
        context.ensure_pool(60, SERIAL),
        context.ensure_pool(60, SERIAL)
    );

    assert!(Arc::ptr_eq(&first.unwrap(), &second.unwrap()));
    assert_eq!(source.opens(), 1);
}

#[tokio::test(start_paused = true)]
async fn waiting_callers_share_a_failed_build() {
    let store = Arc::new(MemoryStore::new());
    let source = minute_clip("broken.mp4")
        .failing_open()
        .with_open_delay(Duration::from_millis(20));
    let context = context_for(&source, &store).with_source_info(source.info());

    let (first, second) = tokio::join!(
        context.ensure_pool(60, SERIAL),
        context.ensure_pool(60, SERIAL)
    );

    assert!(matches!(first, Err(FilmstripError::SourceLoad { .. })));
    assert!(matches!(
        second,
        Err(FilmstripError::BuildFailed(ref message)) if message.contains("broken.mp4")
    ));
    assert_eq!(source.opens(), 1);

    // Nobody is waiting any more, so the next call tries again.
    assert!(context.ensure_pool(60, SERIAL).await.is_err());
    assert_eq!(source.opens(), 2);
}

#[tokio::test(start_paused = true)]
async fn waiting_callers_share_an_empty_sprite() {
    let store = Arc::new(MemoryStore::new());
    let source = minute_clip("dark.mp4")
        .never_renders()
        .with_seek_delay(Duration::from_millis(10));
    let context = context_for(&source, &store).with_source_info(source.info());

    let (first, second) = tokio::join!(
        context.ensure_pool(60, SERIAL),
        context.ensure_pool(60, SERIAL)
    );

    let (first, second) = (first.unwrap(), second.unwrap());
    assert!(first.sprite.is_empty());
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(source.opens(), 1);
}

#[tokio::test(start_paused = true)]
async fn finished_builds_release_their_gates() {
    let store = Arc::new(MemoryStore::new());
    let source = minute_clip("gates.mp4").with_seek_delay(Duration::from_millis(10));
    let context = Arc::new(context_for(&source, &store).with_source_info(source.info()));

    let task = tokio::spawn({
        let context = Arc::clone(&context);
        async move { context.ensure_pool(60, SERIAL).await }
    });
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(context.pending_builds(), 1);
    task.await.unwrap().unwrap();
    assert_eq!(context.pending_builds(), 0);

    for height in [40, 90, 120] {
        context.ensure_pool(height, SERIAL).await.unwrap();
    }
    assert_eq!(context.pending_builds(), 0);
}

#[tokio::test(start_paused = true)]
async fn second_context_is_served_from_cache() {
    let store = Arc::new(MemoryStore::new());
    let built = context_for(&minute_clip("cached.mp4"), &store)
        .ensure_pool(60, CONCURRENT)
        .await
        .unwrap();

    let source = minute_clip("cached.mp4");
    let context = context_for(&source, &store);
    let loaded = context.ensure_pool(60, CONCURRENT).await.unwrap();

    assert_eq!(source.opens(), 0);
    assert_eq!(loaded.pool, built.pool);
    assert_eq!(loaded.sprite, built.sprite);
    assert_eq!(context.phase(), PoolPhase::Ready);
}

#[tokio::test(start_paused = true)]
async fn different_strategies_are_cached_separately() {
    let store = Arc::new(MemoryStore::new());
    let source = minute_clip("split.mp4");
    let context = context_for(&source, &store);

    context.ensure_pool(60, SERIAL).await.unwrap();
    let opens = source.opens();
    context.ensure_pool(60, CONCURRENT).await.unwrap();

    assert!(source.opens() > opens);
    assert_eq!(store.len(), 4);
}

// ── Expiry ─────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn expired_sprite_forces_reextraction() {
    let store = Arc::new(MemoryStore::new());
    context_for(&minute_clip("expiring.mp4"), &store)
        .ensure_pool(60, SERIAL)
        .await
        .unwrap();

    let key = CacheKey::new("expiring.mp4", 60, SERIAL, 1);
    let now = now_millis();
    let mut pool: FramePoolRecord = stored(&store, &key.pool_key()).await.unwrap();
    pool.timestamp = now - 60_000;
    store
        .set(&key.pool_key(), &serde_json::to_string(&pool).unwrap())
        .await
        .unwrap();
    let mut sprite: SpriteSheetRecord = stored(&store, &key.sprite_key()).await.unwrap();
    sprite.timestamp = now - 3_600_001;
    store
        .set(&key.sprite_key(), &serde_json::to_string(&sprite).unwrap())
        .await
        .unwrap();

    let source = minute_clip("expiring.mp4");
    let context = context_for(&source, &store);
    context.ensure_pool(60, SERIAL).await.unwrap();

    assert!(source.opens() > 0);
    let pool: FramePoolRecord = stored(&store, &key.pool_key()).await.unwrap();
    let sprite: SpriteSheetRecord = stored(&store, &key.sprite_key()).await.unwrap();
    assert!(pool.timestamp > now - 60_000);
    assert!(sprite.timestamp >= now);
}

#[tokio::test(start_paused = true)]
async fn expired_pool_record_is_removed_on_read() {
    let store = Arc::new(MemoryStore::new());
    context_for(&minute_clip("old.mp4"), &store)
        .ensure_pool(60, SERIAL)
        .await
        .unwrap();

    let key = CacheKey::new("old.mp4", 60, SERIAL, 1);
    let mut pool: FramePoolRecord = stored(&store, &key.pool_key()).await.unwrap();
    pool.timestamp = now_millis() - 7_200_001;
    store
        .set(&key.pool_key(), &serde_json::to_string(&pool).unwrap())
        .await
        .unwrap();

    let source = minute_clip("old.mp4");
    let context = context_for(&source, &store);

    assert!(context.cached_pool(60, SERIAL).await.is_none());
    assert_eq!(store.get(&key.pool_key()).await.unwrap(), None);
    assert_eq!(source.opens(), 0);
}

#[tokio::test(start_paused = true)]
async fn mismatched_records_are_a_miss() {
    let store = Arc::new(MemoryStore::new());
    context_for(&minute_clip("mixed.mp4"), &store)
        .ensure_pool(60, SERIAL)
        .await
        .unwrap();

    let key = CacheKey::new("mixed.mp4", 60, SERIAL, 1);
    let mut pool: FramePoolRecord = stored(&store, &key.pool_key()).await.unwrap();
    pool.total_frames += 1;
    store
        .set(&key.pool_key(), &serde_json::to_string(&pool).unwrap())
        .await
        .unwrap();

    let context = context_for(&minute_clip("mixed.mp4"), &store);
    assert!(context.cached_pool(60, SERIAL).await.is_none());
}

#[tokio::test]
async fn in_memory_pool_expires_with_the_pool_ttl() {
    let store = Arc::new(MemoryStore::new());
    let source = minute_clip("aging.mp4");
    let context = FilmstripContext::new(
        Arc::new(source.clone()),
        Arc::clone(&store) as Arc<dyn CacheStore>,
        FilmstripOptions::new().with_pool_ttl(Duration::from_millis(250)),
    )
    .with_source_info(source.info());

    let first = context.ensure_pool(60, SERIAL).await.unwrap();
    assert!(Arc::ptr_eq(&first, &context.ensure_pool(60, SERIAL).await.unwrap()));
    assert_eq!(source.opens(), 1);

    tokio::time::sleep(Duration::from_millis(400)).await;
    let second = context.ensure_pool(60, SERIAL).await.unwrap();

    assert!(!Arc::ptr_eq(&first, &second));
    assert!(second.pool.created_at > first.pool.created_at);
    assert_eq!(source.opens(), 2);
}

// ── Lifecycle ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn phase_tracks_the_build() {
    let store = Arc::new(MemoryStore::new());
    let source = minute_clip("phases.mp4").with_seek_delay(Duration::from_millis(100));
    let context = Arc::new(context_for(&source, &store));
    assert_eq!(context.phase(), PoolPhase::Empty);

    let task = tokio::spawn({
        let context = Arc::clone(&context);
        async move { context.ensure_pool(60, SERIAL).await }
    });
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(context.phase(), PoolPhase::Loading);
    assert!(context.is_loading());

    task.await.unwrap().unwrap();
    assert_eq!(context.phase(), PoolPhase::Ready);
    assert!(!context.is_loading());
}

#[tokio::test(start_paused = true)]
async fn resample_needs_a_ready_pool() {
    let store = Arc::new(MemoryStore::new());
    let context = context_for(&minute_clip("resample.mp4"), &store);
    assert!(context.resample(600).is_empty());

    context.ensure_pool(60, SERIAL).await.unwrap();

    // 600px at 106.67px per slot needs six slots.
    let frames = context.resample(600);
    assert_eq!(frames.len(), 6);
    assert_eq!(frames[0].source_index, 0);
    assert_eq!(frames[5].source_index, 26);
}

#[tokio::test(start_paused = true)]
async fn invalidate_drops_memory_and_cache() {
    let store = Arc::new(MemoryStore::new());
    let context = context_for(&minute_clip("gone.mp4"), &store);
    context.ensure_pool(60, SERIAL).await.unwrap();

    context.invalidate(60, SERIAL).await;

    assert_eq!(context.phase(), PoolPhase::Empty);
    assert!(store.is_empty());
}

#[tokio::test(start_paused = true)]
async fn cached_pool_never_extracts() {
    let store = Arc::new(MemoryStore::new());
    let source = minute_clip("lookup.mp4");
    let context = context_for(&source, &store);

    assert!(context.cached_pool(60, SERIAL).await.is_none());
    assert_eq!(source.opens(), 0);
    assert_eq!(context.phase(), PoolPhase::Empty);
}

// ── Failures ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn load_failure_leaves_context_empty() {
    let store = Arc::new(MemoryStore::new());
    let source = minute_clip("broken.mp4").failing_open();
    let context = context_for(&source, &store);

    let result = context.ensure_pool(60, CONCURRENT).await;

    assert!(matches!(result, Err(FilmstripError::SourceLoad { .. })));
    assert_eq!(context.phase(), PoolPhase::Empty);
    assert!(context.last_error().unwrap().contains("broken.mp4"));
    assert!(store.is_empty());
}

#[tokio::test(start_paused = true)]
async fn empty_sprite_is_neither_cached_nor_adopted() {
    let store = Arc::new(MemoryStore::new());
    let context = context_for(&minute_clip("dark.mp4").never_renders(), &store);

    let ready = context.ensure_pool(60, SERIAL).await.unwrap();

    assert!(ready.sprite.is_empty());
    assert!(store.is_empty());
    assert_eq!(context.phase(), PoolPhase::Empty);
    assert!(context.last_error().unwrap().contains("No frames"));
    assert!(context.resample(600).is_empty());
}

#[tokio::test(start_paused = true)]
async fn full_store_keeps_pool_in_memory() {
    let store = Arc::new(MemoryStore::with_quota(16));
    let context = context_for(&minute_clip("full.mp4"), &store);

    let ready = context.ensure_pool(60, SERIAL).await.unwrap();

    assert_eq!(ready.pool.total_frames, 27);
    assert_eq!(context.phase(), PoolPhase::Ready);
    assert!(store.is_empty());
}

#[tokio::test(start_paused = true)]
async fn cancelled_options_abort_the_build() {
    let token = CancellationToken::new();
    token.cancel();
    let store = Arc::new(MemoryStore::new());
    let source = minute_clip("cancel.mp4");
    let context = FilmstripContext::new(
        Arc::new(source.clone()),
        Arc::clone(&store) as Arc<dyn CacheStore>,
        FilmstripOptions::new().with_cancellation(token),
    );

    let result = context.ensure_pool(60, SERIAL).await;

    assert!(matches!(result, Err(FilmstripError::Cancelled)));
    assert_eq!(source.opens(), 0);
}

// ── Source changes ─────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn source_change_discards_in_flight_build() {
    let store = Arc::new(MemoryStore::new());
    let first = minute_clip("first.mp4").with_seek_delay(Duration::from_millis(100));
    let context = Arc::new(context_for(&first, &store));

    let task = tokio::spawn({
        let context = Arc::clone(&context);
        async move { context.ensure_pool(60, SERIAL).await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = minute_clip("second.mp4");
    context.set_source(Arc::new(second.clone()));

    let result = task.await.unwrap();
    assert!(matches!(result, Err(FilmstripError::SourceChanged)));
    assert!(context.current().is_none());
    assert!(context.last_error().is_none());
    assert!(store.is_empty());

    let ready = context.ensure_pool(60, SERIAL).await.unwrap();
    assert_eq!(ready.key.source_identity, "second.mp4");
    assert!(second.opens() > 0);
}

#[tokio::test(start_paused = true)]
async fn source_change_drops_ready_pool() {
    let store = Arc::new(MemoryStore::new());
    let context = context_for(&minute_clip("before.mp4"), &store);
    context.ensure_pool(60, SERIAL).await.unwrap();

    let after = minute_clip("after.mp4");
    context.set_source_with_info(Arc::new(after.clone()), after.info());

    assert_eq!(context.phase(), PoolPhase::Empty);
    assert_eq!(context.source().identity(), "after.mp4");
    assert_eq!(
        context.key_for(60, SERIAL),
        CacheKey::new("after.mp4", 60, SERIAL, 1)
    );
}

#[tokio::test(start_paused = true)]
async fn source_change_while_waiting_for_a_build_keeps_keys_apart() {
    let store = Arc::new(MemoryStore::new());
    let first = minute_clip("first.mp4").with_seek_delay(Duration::from_millis(100));
    let context = Arc::new(context_for(&first, &store));
    let spawn_build = |context: &Arc<FilmstripContext>| {
        let context = Arc::clone(context);
        tokio::spawn(async move { context.ensure_pool(60, SERIAL).await })
    };

    let building = spawn_build(&context);
    tokio::time::sleep(Duration::from_millis(10)).await;
    let waiting = spawn_build(&context);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(context.pending_builds(), 1);

    let second = minute_clip("second.mp4");
    context.set_source(Arc::new(second.clone()));

    assert!(matches!(building.await.unwrap(), Err(FilmstripError::SourceChanged)));
    assert!(matches!(waiting.await.unwrap(), Err(FilmstripError::SourceChanged)));
    assert_eq!(second.opens(), 0);
    assert!(store.is_empty());
    assert!(context.current().is_none());

    let ready = context.ensure_pool(60, SERIAL).await.unwrap();
    let key = CacheKey::new("second.mp4", 60, SERIAL, 1);
    assert_eq!(ready.key, key);
    let mut keys = store.keys().await.unwrap();
    keys.sort();
    assert_eq!(keys, vec![key.pool_key(), key.sprite_key()]);
}
