//! Record store layer.
//!
//! ## Backends
//!
//! - **SQLite** (default): `~/.local/share/bindkeep/<app-hash>/prefs.db`
//! - **JSON file**: one JSON object, replaced atomically on flush
//! - **Memory**: for tests and dry runs

pub mod backend;
pub mod json_file;
pub mod memory;
pub mod sqlite;

pub use backend::{BackendType, RecordStore};
pub use json_file::JsonFileStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::{Error, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Open a record store of the given backend type at `path`.
///
/// `path` is ignored for the memory backend.
pub fn open(backend: BackendType, path: &Path) -> Result<Box<dyn RecordStore>> {
    Ok(match backend {
        BackendType::Memory => Box::new(MemoryStore::new()),
        BackendType::Sqlite => Box::new(SqliteStore::open(path)?),
        BackendType::JsonFile => Box::new(JsonFileStore::open(path)?),
    })
}

/// Get the storage directory for an application.
///
/// Returns `~/.local/share/bindkeep/<hash>/` where hash is derived from the application name.
pub fn get_store_dir(app: &str) -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
        .ok_or_else(|| Error::Other("Could not determine data directory".to_string()))?;
    Ok(data_dir.join("bindkeep").join(app_hash(app)))
}

/// Default store path for an application and backend.
pub fn default_store_path(app: &str, backend: BackendType) -> Result<PathBuf> {
    Ok(get_store_dir(app)?.join(backend.default_file_name()))
}

fn app_hash(app: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(app.as_bytes());
    let hash_hex = format!("{:x}", hasher.finalize());
    hash_hex[..12].to_string()
}
