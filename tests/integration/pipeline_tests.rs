//! End-to-end pipeline tests over real MBTiles files and a real worker pool.
//!
//! Tests verify:
//! - Canonical coordinates load the payload stored at their TMS row
//! - Overscaled requests read their ancestor and scale the tile size
//! - Back-to-back requests never put two jobs in flight for one tile
//! - Reloads stay on the worker that holds the tile's decode state
//! - Abort, unload, timeout and failure handling

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::Bytes;

use mbtiles_pipeline::archive::MbtilesArchive;
use mbtiles_pipeline::error::{ArchiveError, DecodeError, LoadError};
use mbtiles_pipeline::source::{MbtilesSource, SourceOptions};
use mbtiles_pipeline::tile::{Tile, TileCoordinate, TileStatus, TileUid};
use mbtiles_pipeline::worker::{
    CachePolicyDecoder, DecodeDispatcher, DecodeRequest, DecodedTile, JobKind,
    PassthroughDecoder, TileDecoder, WorkerPool,
};

use super::test_utils::{
    wait_until, FlakyDecoder, Installs, MbtilesFixture, RecordingDispatcher, SlowDecoder,
};

// =============================================================================
// Helpers
// =============================================================================

fn scenario_fixture() -> MbtilesFixture {
    MbtilesFixture::new()
        .with_metadata("maxzoom", "5")
        .with_tile(5, 3, 10, b"tile-5-3-10")
}

fn options() -> SourceOptions {
    SourceOptions {
        max_zoom: 5,
        ..SourceOptions::default()
    }
}

fn build_source<T: TileDecoder>(
    fixture: &MbtilesFixture,
    workers: usize,
    decoder: T,
    options: SourceOptions,
) -> (MbtilesSource<MbtilesArchive, RecordingDispatcher>, Installs) {
    let archive = MbtilesArchive::open(fixture.path()).unwrap();
    let dispatcher = RecordingDispatcher::new(WorkerPool::new(workers, decoder));
    let installs = Installs::default();
    let sink = installs.clone();
    let source = MbtilesSource::new(archive, dispatcher, options).with_installer(
        move |uid: TileUid, coordinate: TileCoordinate, data: DecodedTile| {
            sink.record(uid, coordinate, data);
        },
    );
    (source, installs)
}

fn tile(z: u8, x: u32, y: u32) -> Arc<Tile> {
    Arc::new(Tile::new(TileCoordinate::new(z, x, y).unwrap()))
}

fn spawn_load(
    source: &MbtilesSource<MbtilesArchive, RecordingDispatcher>,
    tile: &Arc<Tile>,
) -> tokio::task::JoinHandle<Result<(), LoadError>> {
    let source = source.clone();
    let tile = Arc::clone(tile);
    tokio::spawn(async move { source.load(&tile).await })
}

// =============================================================================
// Loading
// =============================================================================

#[tokio::test]
async fn test_load_scenario_tile() {
    let fixture = scenario_fixture();
    let (source, installs) = build_source(&fixture, 2, PassthroughDecoder, options());
    let tile = tile(5, 3, 10);

    source.load(&tile).await.unwrap();

    assert_eq!(tile.status(), TileStatus::Loaded);
    let installed = installs.all();
    assert_eq!(installed.len(), 1);
    let (uid, coordinate, data) = &installed[0];
    assert_eq!(*uid, tile.uid());
    assert_eq!(*coordinate, tile.coordinate());
    assert_eq!(data.buffers, vec![Bytes::from_static(b"tile-5-3-10")]);
    assert_eq!(data.generation, 1);
}

#[tokio::test]
async fn test_load_overscaled_tile() {
    let fixture = scenario_fixture();
    let (source, installs) = build_source(&fixture, 2, PassthroughDecoder, options());
    let tile = tile(7, 13, 42);

    source.load(&tile).await.unwrap();

    let sent = source.dispatcher().sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].overscaling, 4);
    assert_eq!(sent[0].tile_size, 2048);
    assert_eq!(tile.overscaling(), 4);
    assert_eq!(
        installs.all()[0].2.buffers,
        vec![Bytes::from_static(b"tile-5-3-10")]
    );
}

#[tokio::test]
async fn test_missing_tile_reports_not_found() {
    let fixture = scenario_fixture();
    let (source, installs) = build_source(&fixture, 2, PassthroughDecoder, options());
    let tile = tile(5, 3, 11);

    let result = source.load(&tile).await;
    assert!(matches!(
        result,
        Err(LoadError::Archive(ArchiveError::NotFound { z: 5, x: 3, y: 20 }))
    ));
    assert_eq!(tile.status(), TileStatus::Idle);
    assert!(source.dispatcher().sent().is_empty());
    assert!(installs.is_empty());
}

#[tokio::test]
async fn test_unavailable_archive_fails_every_load() {
    let dir = tempfile::tempdir().unwrap();
    let archive = MbtilesArchive::open_deferred(dir.path().join("missing.mbtiles"));
    let pool = WorkerPool::new(1, PassthroughDecoder);
    let source = MbtilesSource::new(archive, pool, options());
    let tile = tile(5, 3, 10);

    for _ in 0..2 {
        let result = source.load(&tile).await;
        assert!(matches!(
            result,
            Err(LoadError::Archive(ArchiveError::Unavailable(_)))
        ));
        assert!(!result.unwrap_err().is_retryable());
    }
    assert_eq!(tile.status(), TileStatus::Idle);
}

// =============================================================================
// Coalescing and Affinity
// =============================================================================

#[tokio::test]
async fn test_back_to_back_loads_submit_at_most_two_jobs() {
    let fixture = scenario_fixture();
    let decoder = SlowDecoder::new(Duration::from_millis(200));
    let (source, installs) = build_source(&fixture, 4, decoder.clone(), options());
    let tile = tile(5, 3, 10);

    let first = spawn_load(&source, &tile);
    wait_until(|| tile.status() == TileStatus::Loading).await;

    let rest: Vec<_> = (0..4).map(|_| spawn_load(&source, &tile)).collect();
    wait_until(|| tile.has_pending_reload()).await;

    assert!(first.await.unwrap().is_ok());
    for handle in rest {
        assert!(handle.await.unwrap().is_ok());
    }

    let sent = source.dispatcher().sent();
    assert_eq!(sent.len(), 2, "jobs: {:?}", sent);
    assert_eq!(sent[0].kind, JobKind::Load);
    assert_eq!(sent[1].kind, JobKind::Reload);
    assert_eq!(sent[1].target, Some(sent[0].worker));
    assert_eq!(decoder.calls(), 2);
    assert_eq!(installs.len(), 2);
    assert_eq!(tile.status(), TileStatus::Loaded);
}

#[tokio::test]
async fn test_reloads_reuse_worker_state() {
    let fixture = scenario_fixture();
    let (source, installs) = build_source(&fixture, 4, PassthroughDecoder, options());
    let tile = tile(5, 3, 10);

    for _ in 0..4 {
        source.load(&tile).await.unwrap();
    }

    let sent = source.dispatcher().sent();
    let worker = sent[0].worker;
    assert_eq!(tile.worker_affinity(), Some(worker));
    assert!(sent[1..]
        .iter()
        .all(|job| job.kind == JobKind::Reload && job.target == Some(worker)));

    // The worker's private state carried across every reload
    let generations: Vec<u64> = installs.all().iter().map(|(_, _, d)| d.generation).collect();
    assert_eq!(generations, vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn test_distinct_tiles_spread_across_workers() {
    let fixture = MbtilesFixture::new()
        .with_tile(1, 0, 0, b"a")
        .with_tile(1, 1, 0, b"b")
        .with_tile(1, 0, 1, b"c");
    let (source, installs) = build_source(&fixture, 3, PassthroughDecoder, options());

    let tiles = [tile(1, 0, 0), tile(1, 1, 0), tile(1, 0, 1)];
    for t in &tiles {
        source.load(t).await.unwrap();
    }

    let mut workers: Vec<_> = tiles.iter().filter_map(|t| t.worker_affinity()).collect();
    workers.sort();
    workers.dedup();
    assert_eq!(workers.len(), 3);
    assert_eq!(installs.len(), 3);
}

// =============================================================================
// Abort, Unload, Failures
// =============================================================================

#[tokio::test]
async fn test_abort_during_decode() {
    let fixture = scenario_fixture();
    let (source, installs) = build_source(
        &fixture,
        1,
        SlowDecoder::new(Duration::from_millis(100)),
        options(),
    );
    let tile = tile(5, 3, 10);

    let load = spawn_load(&source, &tile);
    wait_until(|| tile.status() == TileStatus::Loading).await;
    source.abort_tile(&tile);

    assert!(load.await.unwrap().is_ok());
    assert_eq!(tile.status(), TileStatus::Aborted);
    assert!(installs.is_empty());

    // An aborted tile takes no further work
    assert!(matches!(
        source.load(&tile).await,
        Err(LoadError::State(_))
    ));
    assert_eq!(source.dispatcher().sent().len(), 1);
}

#[tokio::test]
async fn test_unload_releases_worker_state() {
    let fixture = scenario_fixture();
    let (source, _installs) = build_source(&fixture, 2, PassthroughDecoder, options());
    let tile = tile(5, 3, 10);

    source.load(&tile).await.unwrap();
    let worker = tile.worker_affinity().unwrap();
    source.unload_tile(&tile);
    assert!(tile.is_aborted());

    let request = DecodeRequest {
        uid: tile.uid(),
        coordinate: tile.coordinate(),
        zoom: 5,
        tile_size: 512,
        source: Arc::from("mbtiles"),
        pixel_ratio: 1.0,
        overscaling: 1,
        show_collision_boxes: false,
        data: Bytes::from_static(b"x"),
    };
    let reload = source
        .dispatcher()
        .pool()
        .send(JobKind::Reload, request, Some(worker));
    assert!(matches!(
        reload.completion.await.unwrap(),
        Err(DecodeError::UnknownTile { .. })
    ));
}

#[tokio::test]
async fn test_failed_decode_allows_retry() {
    let fixture = scenario_fixture();
    let (source, installs) = build_source(&fixture, 3, FlakyDecoder::new(1), options());
    let tile = tile(5, 3, 10);

    let err = source.load(&tile).await.unwrap_err();
    assert!(matches!(err, LoadError::Decode(DecodeError::Failed(_))));
    assert!(err.is_retryable());
    assert_eq!(tile.status(), TileStatus::Idle);
    assert!(installs.is_empty());

    source.load(&tile).await.unwrap();
    assert_eq!(tile.status(), TileStatus::Loaded);

    let sent = source.dispatcher().sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].kind, JobKind::Load);
    assert_eq!(sent[1].target, Some(sent[0].worker));
}

#[tokio::test]
async fn test_decode_timeout() {
    let fixture = scenario_fixture();
    let (source, installs) = build_source(
        &fixture,
        1,
        SlowDecoder::new(Duration::from_millis(300)),
        SourceOptions {
            decode_timeout: Some(Duration::from_millis(20)),
            ..options()
        },
    );
    let tile = tile(5, 3, 10);

    let result = source.load(&tile).await;
    assert!(matches!(result, Err(LoadError::Timeout { after_ms: 20 })));
    assert_eq!(tile.status(), TileStatus::Loading);
    assert!(installs.is_empty());

    // The late result still lands, and nothing else was sent meanwhile
    wait_until(|| tile.status() == TileStatus::Loaded).await;
    assert_eq!(installs.len(), 1);
    assert_eq!(source.dispatcher().sent().len(), 1);
}

#[tokio::test]
async fn test_reload_after_eviction_loads_again() {
    let fixture = MbtilesFixture::new()
        .with_metadata("maxzoom", "1")
        .with_tile(1, 0, 0, b"a")
        .with_tile(1, 1, 0, b"b");
    let archive = MbtilesArchive::open(fixture.path()).unwrap();
    let pool = WorkerPool::with_capacity(1, 1, PassthroughDecoder);
    let installs = Installs::default();
    let sink = installs.clone();
    let source = MbtilesSource::new(archive, RecordingDispatcher::new(pool), options())
        .with_installer(move |uid: TileUid, coordinate: TileCoordinate, data: DecodedTile| {
            sink.record(uid, coordinate, data);
        });

    let first = tile(1, 0, 0);
    let second = tile(1, 1, 0);
    source.load(&first).await.unwrap();
    // Evicts the first tile's decode state from the only worker
    source.load(&second).await.unwrap();

    source.load(&first).await.unwrap();
    assert_eq!(first.status(), TileStatus::Loaded);

    let sent = source.dispatcher().sent();
    let kinds: Vec<_> = sent.iter().map(|job| (job.kind, job.target)).collect();
    let worker = sent[0].worker;
    assert_eq!(
        kinds,
        vec![
            (JobKind::Load, None),
            (JobKind::Load, None),
            (JobKind::Reload, Some(worker)),
            (JobKind::Load, Some(worker)),
        ]
    );

    let last = installs.all().pop().unwrap();
    assert_eq!(last.0, first.uid());
    assert_eq!(last.2.generation, 1);
}

#[tokio::test]
async fn test_refresh_expired_tiles_with_cache_policy() {
    let fixture = scenario_fixture();
    let decoder = CachePolicyDecoder::new(PassthroughDecoder, "max-age=60");
    let (source, installs) = build_source(
        &fixture,
        2,
        decoder,
        SourceOptions {
            refresh_expired_tiles: true,
            ..options()
        },
    );
    let tile = tile(5, 3, 10);

    source.load(&tile).await.unwrap();
    assert!(tile.expiry().and_then(|e| e.expires_at).is_some());
    assert!(!source.expire_if_stale(&tile, SystemTime::now()));

    let later = SystemTime::now() + Duration::from_secs(120);
    assert!(source.expire_if_stale(&tile, later));
    assert_eq!(tile.status(), TileStatus::Expired);

    source.load(&tile).await.unwrap();
    let sent = source.dispatcher().sent();
    assert_eq!(sent[1].kind, JobKind::Load);
    assert_eq!(sent[1].target, Some(sent[0].worker));
    assert_eq!(tile.status(), TileStatus::Loaded);
    assert_eq!(installs.len(), 2);
}
