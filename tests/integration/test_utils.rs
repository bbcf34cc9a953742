//! Test utilities for integration tests.
//!
//! This module provides an MBTiles fixture writer plus decoder, dispatcher
//! and installer doubles that record what the pipeline does.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;
use rusqlite::{params, Connection};
use tempfile::TempDir;

use mbtiles_pipeline::error::DecodeError;
use mbtiles_pipeline::tile::{tms_row, TileCoordinate, TileUid};
use mbtiles_pipeline::worker::{
    DecodeDispatcher, DecodeRequest, DecodedTile, Dispatched, JobKind, TileDecoder, WorkerId,
    WorkerPool,
};

// =============================================================================
// MBTiles Fixture
// =============================================================================

/// An MBTiles file in a temporary directory.
///
/// Tiles are addressed by canonical XYZ coordinates and stored at their TMS
/// row, gzip-compressed unless stated otherwise.
pub struct MbtilesFixture {
    _dir: TempDir,
    path: PathBuf,
    conn: Connection,
}

impl MbtilesFixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fixture.mbtiles");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE metadata (name TEXT, value TEXT);
             CREATE TABLE tiles (zoom_level INTEGER, tile_column INTEGER, tile_row INTEGER, tile_data BLOB);
             CREATE UNIQUE INDEX tile_index ON tiles (zoom_level, tile_column, tile_row);",
        )
        .unwrap();
        Self {
            _dir: dir,
            path,
            conn,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn with_metadata(self, name: &str, value: &str) -> Self {
        self.conn
            .execute("INSERT INTO metadata VALUES (?1, ?2)", params![name, value])
            .unwrap();
        self
    }

    /// Store `payload` gzip-compressed as a BLOB.
    pub fn with_tile(self, z: u8, x: u32, y: u32, payload: &[u8]) -> Self {
        let data = gzip(payload);
        self.insert(z, x, y, rusqlite::types::Value::Blob(data))
    }

    /// Store `payload` zlib-compressed as a BLOB.
    pub fn with_zlib_tile(self, z: u8, x: u32, y: u32, payload: &[u8]) -> Self {
        let data = zlib(payload);
        self.insert(z, x, y, rusqlite::types::Value::Blob(data))
    }

    /// Store `payload` gzip-compressed and base64-encoded as TEXT.
    pub fn with_text_tile(self, z: u8, x: u32, y: u32, payload: &[u8]) -> Self {
        let data = STANDARD.encode(gzip(payload));
        self.insert(z, x, y, rusqlite::types::Value::Text(data))
    }

    fn insert(self, z: u8, x: u32, y: u32, data: rusqlite::types::Value) -> Self {
        let coordinate = TileCoordinate::new(z, x, y).unwrap();
        self.conn
            .execute(
                "INSERT INTO tiles VALUES (?1, ?2, ?3, ?4)",
                params![coordinate.z(), coordinate.x(), tms_row(z, y).unwrap(), data],
            )
            .unwrap();
        self
    }
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

pub fn zlib(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

// =============================================================================
// Decoders
// =============================================================================

/// Decoder that counts calls and optionally stalls to keep jobs in flight.
#[derive(Clone, Default)]
pub struct SlowDecoder {
    delay: Duration,
    calls: Arc<AtomicUsize>,
}

impl SlowDecoder {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TileDecoder for SlowDecoder {
    fn decode(&self, request: &DecodeRequest) -> Result<DecodedTile, DecodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        // Runs on the blocking pool
        std::thread::sleep(self.delay);
        Ok(DecodedTile::new(vec![request.data.clone()]))
    }
}

/// Decoder that fails the first `failures` jobs.
pub struct FlakyDecoder {
    failures: AtomicUsize,
}

impl FlakyDecoder {
    pub fn new(failures: usize) -> Self {
        Self {
            failures: AtomicUsize::new(failures),
        }
    }
}

impl TileDecoder for FlakyDecoder {
    fn decode(&self, request: &DecodeRequest) -> Result<DecodedTile, DecodeError> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(DecodeError::Failed("unexpected end of layer".to_string()));
        }
        Ok(DecodedTile::new(vec![request.data.clone()]))
    }
}

// =============================================================================
// Recording Dispatcher
// =============================================================================

/// One job as seen by [`RecordingDispatcher`].
#[derive(Debug, Clone, PartialEq)]
pub struct SentJob {
    pub kind: JobKind,
    pub target: Option<WorkerId>,
    pub worker: WorkerId,
    pub tile_size: u32,
    pub overscaling: u32,
}

/// Wraps a [`WorkerPool`] and records every submission.
pub struct RecordingDispatcher {
    pool: WorkerPool,
    sent: Mutex<Vec<SentJob>>,
}

impl RecordingDispatcher {
    pub fn new(pool: WorkerPool) -> Self {
        Self {
            pool,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<SentJob> {
        self.sent.lock().unwrap().clone()
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }
}

impl DecodeDispatcher for RecordingDispatcher {
    fn send(&self, kind: JobKind, request: DecodeRequest, target: Option<WorkerId>) -> Dispatched {
        let tile_size = request.tile_size;
        let overscaling = request.overscaling;
        let dispatched = self.pool.send(kind, request, target);
        self.sent.lock().unwrap().push(SentJob {
            kind,
            target,
            worker: dispatched.worker,
            tile_size,
            overscaling,
        });
        dispatched
    }

    fn remove_tile(&self, worker: WorkerId, uid: TileUid) {
        self.pool.remove_tile(worker, uid);
    }
}

// =============================================================================
// Installer
// =============================================================================

/// Installed tiles, in installation order.
#[derive(Clone, Default)]
pub struct Installs(Arc<Mutex<Vec<(TileUid, TileCoordinate, DecodedTile)>>>);

impl Installs {
    pub fn record(&self, uid: TileUid, coordinate: TileCoordinate, data: DecodedTile) {
        self.0.lock().unwrap().push((uid, coordinate, data));
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn all(&self) -> Vec<(TileUid, TileCoordinate, DecodedTile)> {
        self.0.lock().unwrap().clone()
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Poll `condition` until it holds, failing the test after five seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition not reached");
}
