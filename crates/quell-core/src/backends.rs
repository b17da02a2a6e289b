//! Concrete storage backends.
//!
//! The CLI wires [`SqliteBackend`] as Primary (it models the host-synced
//! "collection" location the original values ride across devices on) and
//! [`JsonFileBackend`] as Backup (a local-only map next to the component's
//! own configuration). [`MemoryBackend`] exists for tests and for
//! embedders that bring their own durability.
//!
//! Backends move opaque bytes; all interpretation and validation happens
//! in [`crate::store`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use rusqlite::{Connection, params};

use crate::store::{BackendError, BackendResult, StoreBackend};

fn ensure_parent_dir(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// SQLite-backed storage location.
///
/// One table, one row per group. Writes replace the whole table inside a
/// transaction, matching the whole-map rewrite contract.
pub struct SqliteBackend {
    conn: Connection,
}

impl SqliteBackend {
    /// Open (creating if necessary) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> BackendResult<Self> {
        ensure_parent_dir(path.as_ref())?;
        let conn = Connection::open(path.as_ref())?;
        Self::init(conn)
    }

    /// Open an in-memory database. Used by tests.
    pub fn open_in_memory() -> BackendResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> BackendResult<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS original_values (
                group_id TEXT PRIMARY KEY,
                record   BLOB NOT NULL
            );",
        )?;
        Ok(Self { conn })
    }
}

impl StoreBackend for SqliteBackend {
    fn read_all(&self) -> BackendResult<BTreeMap<String, Vec<u8>>> {
        let mut stmt = self
            .conn
            .prepare("SELECT group_id, record FROM original_values")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?;
        let mut map = BTreeMap::new();
        for row in rows {
            let (group_id, record) = row?;
            map.insert(group_id, record);
        }
        Ok(map)
    }

    fn write_all(&mut self, map: &BTreeMap<String, Vec<u8>>) -> BackendResult<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM original_values", [])?;
        {
            let mut stmt =
                tx.prepare("INSERT INTO original_values (group_id, record) VALUES (?1, ?2)")?;
            for (group_id, record) in map {
                stmt.execute(params![group_id, record])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

/// JSON-file-backed storage location.
///
/// The file holds one flat JSON object mapping group ids to their record
/// values, kept human-readable so it can be inspected (and repaired) by
/// hand. Writes go through a temp file and rename, so a torn write leaves
/// the previous map intact. A missing or empty file reads as empty.
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    /// Create a backend over the given file path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl StoreBackend for JsonFileBackend {
    fn read_all(&self) -> BackendResult<BTreeMap<String, Vec<u8>>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let bytes = std::fs::read(&self.path)?;
        if bytes.is_empty() {
            return Ok(BTreeMap::new());
        }
        let doc: BTreeMap<String, serde_json::Value> = serde_json::from_slice(&bytes)?;
        let mut map = BTreeMap::new();
        for (group_id, value) in doc {
            map.insert(group_id, serde_json::to_vec(&value)?);
        }
        Ok(map)
    }

    fn write_all(&mut self, map: &BTreeMap<String, Vec<u8>>) -> BackendResult<()> {
        let mut doc = BTreeMap::new();
        for (group_id, bytes) in map {
            let value: serde_json::Value = serde_json::from_slice(bytes)?;
            doc.insert(group_id.clone(), value);
        }
        ensure_parent_dir(&self.path)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&doc)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    map: BTreeMap<String, Vec<u8>>,
    fail_reads: bool,
    fail_writes: bool,
}

/// In-memory backend with failure injection.
///
/// Clones share state, so a test can keep a handle to inspect or poison
/// the backend after handing a clone to the store.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryBackend {
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make subsequent reads fail.
    pub fn set_fail_reads(&self, fail: bool) {
        self.lock().fail_reads = fail;
    }

    /// Make subsequent writes fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    /// Drop everything, simulating total loss of the storage location.
    pub fn clear(&self) {
        self.lock().map.clear();
    }

    /// Insert raw bytes directly, bypassing the store's write validation.
    pub fn poison_entry(&self, group_id: &str, bytes: &[u8]) {
        self.lock().map.insert(group_id.to_string(), bytes.to_vec());
    }

    /// Current contents of the backend.
    #[must_use]
    pub fn contents(&self) -> BTreeMap<String, Vec<u8>> {
        self.lock().map.clone()
    }
}

impl StoreBackend for MemoryBackend {
    fn read_all(&self) -> BackendResult<BTreeMap<String, Vec<u8>>> {
        let inner = self.lock();
        if inner.fail_reads {
            return Err(BackendError::Other("injected read failure".to_string()));
        }
        Ok(inner.map.clone())
    }

    fn write_all(&mut self, map: &BTreeMap<String, Vec<u8>>) -> BackendResult<()> {
        let mut inner = self.lock();
        if inner.fail_writes {
            return Err(BackendError::Other("injected write failure".to_string()));
        }
        inner.map = map.clone();
        Ok(())
    }
}
