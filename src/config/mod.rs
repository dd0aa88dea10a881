//! Configuration for bindkeep.
//!
//! ## config.kdl
//!
//! Located at `~/.config/bindkeep/config.kdl`, or wherever `--config` points.
//!
//! Contains:
//! - `enabled` - Master switch for every data store operation
//! - `load-on-start` - Load all data when the data store starts
//! - `load-joystick-assignments`, `load-keyboard-assignments`, `load-mouse-assignments`
//! - `save-mode` - "by-device" or "by-role"
//! - `key-prefix` - Prefix of every record key
//! - `allow-imprecise-matching` - Match devices by hardware identifier as a fallback
//! - `defer-first-reconcile` - Defer the first reconciliation to the next yield point
//! - `auto-assign-devices` - Auto-assign devices left unowned after reconciliation
//!
//! ## Precedence
//!
//! CLI flag > environment variable > config.kdl > defaults
//!
//! Use the [`resolver`] module for unified precedence resolution.

pub mod resolver;
pub mod schema;

pub use resolver::{
    ConfigOverrides, KEY_PREFIX_ENV, Resolved, ResolvedConfig, SAVE_MODE_ENV, ValueSource,
    default_config_path, resolve_config, resolve_with,
};
pub use schema::{SaveMode, StoreConfig, StoreSettings};
