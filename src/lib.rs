//! bindkeep - versioned persistence for per-user input bindings.
//!
//! This library stores action bindings, calibration data, input behaviors and
//! device-to-subject assignments in an opaque string key-value store, and
//! restores them across sessions:
//! - [`keys`] builds versioned record keys and finds saves from older schemas
//! - [`merge`] injects default bindings for actions added since a record was saved
//! - [`reconcile`] re-attaches reconnected devices to the subjects that owned them
//! - [`role`] mirrors bindings across devices by element role
//! - [`datastore`] ties the pieces together behind the host-facing API

pub mod cli;
pub mod codec;
pub mod commands;
pub mod config;
pub mod datastore;
pub mod keys;
pub mod merge;
pub mod models;
pub mod reconcile;
pub mod role;
pub mod store;
pub mod universe;


/// Library-level error type for bindkeep operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Config error: {0}")]
    Kdl(#[from] kdl::KdlError),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Malformed record: {0}")]
    Parse(String),

    #[error("Invalid record descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for bindkeep operations.
pub type Result<T> = std::result::Result<T, Error>;
