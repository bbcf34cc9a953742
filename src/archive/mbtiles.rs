//! SQLite-backed MBTiles archive.
//!
//! Reads `tiles.tile_data` by exact `(zoom_level, tile_column, tile_row)`
//! key, undoes the transport encoding and decompresses the payload. Queries
//! run on Tokio's blocking pool so the coordinating task never waits on disk.
//!
//! A file-backed handle keeps a small set of read-only connections; reads
//! take whichever one is free, so up to [`DEFAULT_ARCHIVE_READERS`] queries
//! run in parallel and the rest wait on the blocking pool.

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

use async_trait::async_trait;
use bytes::Bytes;
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};

use crate::error::ArchiveError;

use super::codec::{decode_transport, inflate, StoredPayload};
use super::metadata::ArchiveMetadata;
use super::reader::{CapabilityProbe, SqliteProbe, TileArchive};

const TILE_QUERY: &str =
    "SELECT tile_data FROM tiles WHERE zoom_level = ?1 AND tile_column = ?2 AND tile_row = ?3";

const METADATA_QUERY: &str = "SELECT name, value FROM metadata";

/// Number of read-only connections a file-backed archive opens.
pub const DEFAULT_ARCHIVE_READERS: usize = 4;

/// Read-only connections shared by every read on one archive.
struct ReaderPool {
    connections: Vec<Mutex<Connection>>,
    next: AtomicUsize,
}

impl ReaderPool {
    fn new(connections: Vec<Connection>) -> Self {
        Self {
            connections: connections.into_iter().map(Mutex::new).collect(),
            next: AtomicUsize::new(0),
        }
    }

    /// Take a free connection, or wait for the next one in rotation.
    fn acquire(&self) -> Result<MutexGuard<'_, Connection>, ArchiveError> {
        let len = self.connections.len();
        let start = self.next.fetch_add(1, Ordering::Relaxed);
        for offset in 0..len {
            match self.connections[(start + offset) % len].try_lock() {
                Ok(guard) => return Ok(guard),
                Err(TryLockError::WouldBlock) => continue,
                Err(TryLockError::Poisoned(_)) => return Err(poisoned()),
            }
        }
        self.connections[start % len].lock().map_err(|_| poisoned())
    }
}

fn poisoned() -> ArchiveError {
    ArchiveError::Query("archive connection poisoned".to_string())
}

/// Read-only handle on an MBTiles file.
///
/// A handle whose open failed (see [`MbtilesArchive::open_deferred`])
/// remembers the failure and reports it from every read.
pub struct MbtilesArchive {
    identifier: String,
    readers: Result<Arc<ReaderPool>, ArchiveError>,
}

impl MbtilesArchive {
    /// Open an archive, failing with [`ArchiveError::Unavailable`] if the
    /// host lacks SQLite support or the file is not a readable MBTiles store.
    pub fn open(location: impl AsRef<Path>) -> Result<Self, ArchiveError> {
        Self::open_with_probe(location, &SqliteProbe)
    }

    pub fn open_with_probe(
        location: impl AsRef<Path>,
        probe: &dyn CapabilityProbe,
    ) -> Result<Self, ArchiveError> {
        let archive = Self::open_deferred_with_probe(location, probe);
        if let Err(e) = &archive.readers {
            return Err(e.clone());
        }
        Ok(archive)
    }

    /// Open an archive without failing up front.
    ///
    /// If the open fails, the handle is still returned and every subsequent
    /// read fails with the same cause. The failure is permanent.
    pub fn open_deferred(location: impl AsRef<Path>) -> Self {
        Self::open_deferred_with_probe(location, &SqliteProbe)
    }

    pub fn open_deferred_with_probe(
        location: impl AsRef<Path>,
        probe: &dyn CapabilityProbe,
    ) -> Self {
        let location = location.as_ref();
        let identifier = format!("mbtiles://{}", location.display());

        let readers = if probe.local_database_available() {
            (0..DEFAULT_ARCHIVE_READERS)
                .map(|_| connect(location))
                .collect::<Result<Vec<_>, _>>()
                .map(|connections| Arc::new(ReaderPool::new(connections)))
        } else {
            Err(ArchiveError::Unavailable(
                "local SQLite capability is not available in this runtime".to_string(),
            ))
        };

        Self {
            identifier,
            readers,
        }
    }

    /// Wrap an already-open connection (e.g. an in-memory store).
    ///
    /// Reads on the resulting handle are serialized on that one connection.
    pub fn from_connection(
        connection: Connection,
        identifier: impl Into<String>,
    ) -> Result<Self, ArchiveError> {
        verify_schema(&connection)?;
        Ok(Self {
            identifier: identifier.into(),
            readers: Ok(Arc::new(ReaderPool::new(vec![connection]))),
        })
    }

    /// Whether the handle opened successfully.
    pub fn is_available(&self) -> bool {
        self.readers.is_ok()
    }

    /// Number of connections reads are spread over (zero when unavailable).
    pub fn reader_count(&self) -> usize {
        self.readers
            .as_ref()
            .map_or(0, |readers| readers.connections.len())
    }

    /// Read the archive's `metadata` table.
    ///
    /// Archives without a metadata table yield empty metadata.
    pub async fn metadata(&self) -> Result<ArchiveMetadata, ArchiveError> {
        self.with_connection(|conn| {
            if !has_relation(conn, "metadata")? {
                return Ok(ArchiveMetadata::default());
            }
            let mut stmt = conn.prepare(METADATA_QUERY).map_err(query_error)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })
                .map_err(query_error)?;
            // Rows with NULL or non-text cells are skipped
            let pairs: Vec<(String, String)> = rows.filter_map(Result::ok).collect();
            Ok(ArchiveMetadata::from_pairs(pairs))
        })
        .await
    }

    /// Run `f` against a free connection on the blocking pool.
    async fn with_connection<T, F>(&self, f: F) -> Result<T, ArchiveError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, ArchiveError> + Send + 'static,
    {
        let readers = self.readers.clone()?;
        tokio::task::spawn_blocking(move || {
            let conn = readers.acquire()?;
            f(&*conn)
        })
        .await
        .map_err(|e| ArchiveError::Query(format!("archive read task failed: {}", e)))?
    }
}

#[async_trait]
impl TileArchive for MbtilesArchive {
    async fn read_tile(&self, z: u8, x: u32, y: u32) -> Result<Bytes, ArchiveError> {
        let stored = self
            .with_connection(move |conn| {
                let mut stmt = conn.prepare_cached(TILE_QUERY).map_err(query_error)?;
                let stored = stmt
                    .query_row(params![z, x, y], |row| {
                        Ok(match row.get_ref(0)? {
                            ValueRef::Blob(blob) => Some(StoredPayload::Blob(blob.to_vec())),
                            ValueRef::Text(text) => Some(StoredPayload::Text(
                                String::from_utf8_lossy(text).into_owned(),
                            )),
                            _ => None,
                        })
                    })
                    .optional()
                    .map_err(query_error)?;
                Ok(stored.flatten())
            })
            .await?;

        let stored = stored.ok_or(ArchiveError::NotFound { z, x, y })?;
        let raw = inflate(decode_transport(stored)?)?;
        Ok(Bytes::from(raw))
    }

    fn identifier(&self) -> &str {
        &self.identifier
    }
}

impl fmt::Debug for MbtilesArchive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MbtilesArchive")
            .field("identifier", &self.identifier)
            .field("available", &self.is_available())
            .finish()
    }
}

fn connect(location: &Path) -> Result<Connection, ArchiveError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let connection = Connection::open_with_flags(location, flags).map_err(|e| {
        ArchiveError::Unavailable(format!("cannot open {}: {}", location.display(), e))
    })?;
    verify_schema(&connection)?;
    Ok(connection)
}

fn verify_schema(connection: &Connection) -> Result<(), ArchiveError> {
    match has_relation(connection, "tiles") {
        Ok(true) => Ok(()),
        Ok(false) => Err(ArchiveError::Unavailable(
            "not an MBTiles archive: no tiles table".to_string(),
        )),
        Err(e) => Err(ArchiveError::Unavailable(e.to_string())),
    }
}

/// Whether a table or view named `name` exists.
fn has_relation(connection: &Connection, name: &str) -> Result<bool, ArchiveError> {
    let count: i64 = connection
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE name = ?1 AND type IN ('table', 'view')",
            params![name],
            |row| row.get(0),
        )
        .map_err(query_error)?;
    Ok(count > 0)
}

fn query_error(e: rusqlite::Error) -> ArchiveError {
    ArchiveError::Query(e.to_string())
}
