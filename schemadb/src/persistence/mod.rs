use crate::config::DbSettings;
use crate::error::{Result, SchemaDbError};
use crate::record::Record;
use crate::schema::CompiledSchemas;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

pub const SNAPSHOT_VERSION: u32 = 1;

/// Rows of every table, each in insertion order.
pub type TableRows = BTreeMap<String, IndexMap<String, Record>>;

/// Full serialized state of a database, as read back from disk
#[derive(Debug, Clone, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub name: String,
    pub saved_at: DateTime<Utc>,
    #[serde(default)]
    pub settings: DbSettings,
    pub tables: CompiledSchemas,
    #[serde(default)]
    pub rows: TableRows,
}

/// Borrowed view of a database used for writing a snapshot
#[derive(Debug, Serialize)]
pub struct SnapshotRef<'a> {
    pub version: u32,
    pub name: &'a str,
    pub saved_at: DateTime<Utc>,
    pub settings: DbSettings,
    pub tables: &'a CompiledSchemas,
    pub rows: &'a TableRows,
}

impl<'a> SnapshotRef<'a> {
    pub fn new(
        name: &'a str,
        settings: DbSettings,
        tables: &'a CompiledSchemas,
        rows: &'a TableRows,
    ) -> Self {
        SnapshotRef {
            version: SNAPSHOT_VERSION,
            name,
            saved_at: Utc::now(),
            settings,
            tables,
            rows,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }
}

/// Reads and writes the snapshot of one named database.
///
/// Every write first copies the current snapshot to `<name>.json.old`
/// (one generation, replaced on each save) and then atomically replaces
/// `<name>.json`. Writes are serialized through a shared guard.
#[derive(Debug, Clone)]
pub struct Persistence {
    name: String,
    path: PathBuf,
    backup_path: PathBuf,
    save_guard: Arc<Mutex<()>>,
}

impl Persistence {
    pub fn new(data_dir: &Path, name: &str) -> Self {
        let path = data_dir.join(format!("{name}.json"));
        let backup_path = data_dir.join(format!("{name}.json.old"));
        Persistence {
            name: name.to_string(),
            path,
            backup_path,
            save_guard: Arc::new(Mutex::new(())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.path
    }

    pub fn backup_path(&self) -> &Path {
        &self.backup_path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read and decode the snapshot.
    pub fn load(&self) -> Result<Snapshot> {
        if !self.exists() {
            return Err(SchemaDbError::DatabaseNotFound {
                name: self.name.clone(),
                path: self.path.display().to_string(),
            });
        }

        let content = std::fs::read(&self.path).map_err(|e| {
            SchemaDbError::Persistence(format!("reading {}: {e}", self.path.display()))
        })?;
        let snapshot: Snapshot = serde_json::from_slice(&content).map_err(|e| {
            SchemaDbError::Persistence(format!("decoding {}: {e}", self.path.display()))
        })?;

        if snapshot.version != SNAPSHOT_VERSION {
            return Err(SchemaDbError::Persistence(format!(
                "unsupported snapshot version {} in {}",
                snapshot.version,
                self.path.display()
            )));
        }

        log::debug!("Loaded snapshot {}", self.path.display());
        Ok(snapshot)
    }

    /// Write a snapshot on the calling thread.
    pub fn write(&self, snapshot: &SnapshotRef<'_>) -> Result<()> {
        let bytes = snapshot.to_bytes()?;
        write_snapshot(&self.path, &self.backup_path, &self.save_guard, &bytes)
    }

    /// Encode on the calling thread, write on a background thread.
    pub fn write_in_background(&self, snapshot: &SnapshotRef<'_>) -> Result<SaveHandle> {
        let bytes = snapshot.to_bytes()?;
        let path = self.path.clone();
        let backup_path = self.backup_path.clone();
        let guard = Arc::clone(&self.save_guard);

        let handle = std::thread::Builder::new()
            .name("schemadb-save".into())
            .spawn(move || write_snapshot(&path, &backup_path, &guard, &bytes))
            .map_err(|e| SchemaDbError::Persistence(format!("spawning save thread: {e}")))?;

        Ok(SaveHandle { handle })
    }
}

/// Completion handle of a background save
#[derive(Debug)]
pub struct SaveHandle {
    handle: JoinHandle<Result<()>>,
}

impl SaveHandle {
    /// Block until the save finishes and return its outcome.
    pub fn wait(self) -> Result<()> {
        self.handle
            .join()
            .unwrap_or_else(|_| Err(SchemaDbError::Persistence("save thread panicked".into())))
    }
}

fn write_snapshot(path: &Path, backup_path: &Path, guard: &Mutex<()>, bytes: &[u8]) -> Result<()> {
    // Held until return, on success and on every error path
    let _guard = guard.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

    let persist_err =
        |what: &str, e: std::io::Error| SchemaDbError::Persistence(format!("{what} {}: {e}", path.display()));

    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).map_err(|e| persist_err("creating directory for", e))?;

    if path.exists() {
        std::fs::copy(path, backup_path).map_err(|e| persist_err("backing up", e))?;
    }

    let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| persist_err("staging", e))?;
    tmp.write_all(bytes).map_err(|e| persist_err("writing", e))?;
    tmp.as_file().sync_all().map_err(|e| persist_err("syncing", e))?;
    tmp.persist(path).map_err(|e| persist_err("replacing", e.error))?;

    log::debug!("Saved snapshot {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}
