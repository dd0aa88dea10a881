//! Record store trait and backend types.
//!
//! A record store is an opaque string key-value medium. Bindkeep never
//! interprets what the medium does with the data; it only relies on the
//! operations below:
//! - `MemoryStore` - In-process map, nothing survives the process
//! - `SqliteStore` - One SQLite table of key/value rows
//! - `JsonFileStore` - One JSON object written atomically on flush

use crate::Result;
use std::path::Path;

/// Trait for string key-value media that hold bindkeep records.
///
/// Writes may be buffered until `flush`. A value is always replaced whole by
/// one `set_string` call.
pub trait RecordStore: Send {
    /// Check whether a key is present.
    fn has(&self, key: &str) -> Result<bool>;

    /// Read the text stored under a key, or `None` when absent.
    fn get_string(&self, key: &str) -> Result<Option<String>>;

    /// Store text under a key, replacing any previous value.
    fn set_string(&mut self, key: &str, value: &str) -> Result<()>;

    /// Remove a key. Returns false when it was not present.
    fn delete(&mut self, key: &str) -> Result<bool>;

    /// All keys, in ascending order.
    fn keys(&self) -> Result<Vec<String>>;

    /// Make buffered writes durable.
    fn flush(&mut self) -> Result<()>;

    /// Get the storage location description (for display purposes).
    fn location(&self) -> String;

    /// Get the backend type.
    fn backend_type(&self) -> BackendType;

    /// Like `has`, but a store fault is logged and reported as absent.
    fn exists(&self, key: &str) -> bool {
        match self.has(key) {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(key, error = %e, "Store fault while checking key, treating it as absent");
                false
            }
        }
    }
}

/// Available record store backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    /// In-process map
    Memory,
    /// SQLite database (default) - ~/.local/share/bindkeep/<app-hash>/prefs.db
    Sqlite,
    /// Single JSON file
    JsonFile,
}

impl BackendType {
    /// Parse a backend type from a string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "memory" | "mem" => Some(Self::Memory),
            "sqlite" | "db" | "default" => Some(Self::Sqlite),
            "json" | "json-file" | "file" => Some(Self::JsonFile),
            _ => None,
        }
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Sqlite => "sqlite",
            Self::JsonFile => "json-file",
        }
    }

    /// Pick a backend from a store path: `.json` files are JSON stores, anything else is SQLite.
    pub fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::JsonFile,
            _ => Self::Sqlite,
        }
    }

    /// File name used inside the default store directory.
    pub fn default_file_name(&self) -> &'static str {
        match self {
            Self::JsonFile => "prefs.json",
            _ => "prefs.db",
        }
    }
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
