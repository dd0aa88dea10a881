//! KDL schema for config.kdl.
//!
//! This module provides:
//! - `StoreConfig`, the optional settings read from a KDL document
//! - `StoreSettings`, the effective settings with defaults filled in
//! - Serialization to and from KDL
//! - Validation

use crate::keys::{DEFAULT_KEY_PREFIX, validate_prefix};
use crate::{Error, Result};
use kdl::{KdlDocument, KdlEntry, KdlNode, KdlValue};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// How binding records are persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SaveMode {
    /// One record per device, category and layout (default)
    #[default]
    ByDevice,
    /// Per-device records plus one record per element role, mirrored across devices
    ByRole,
}

impl SaveMode {
    /// Parse from string, case-insensitive.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "by-device" | "device" | "by-controller" => Some(SaveMode::ByDevice),
            "by-role" | "role" | "by-element-role" => Some(SaveMode::ByRole),
            _ => None,
        }
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SaveMode::ByDevice => "by-device",
            SaveMode::ByRole => "by-role",
        }
    }
}

impl std::fmt::Display for SaveMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Settings stored in config.kdl. Unset values fall back to defaults.
///
/// # KDL Schema
///
/// ```kdl
/// enabled #true
/// load-on-start #true
/// load-joystick-assignments #true
/// load-keyboard-assignments #true
/// load-mouse-assignments #true
/// save-mode "by-role"  // or "by-device"
/// key-prefix "InputSaveData"
/// allow-imprecise-matching #true
/// defer-first-reconcile #true
/// auto-assign-devices #true
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Master switch; every data store operation is a no-op when false
    pub enabled: Option<bool>,

    /// Load everything when the data store starts
    pub load_on_start: Option<bool>,

    /// Reconcile movable devices against the saved assignment snapshot
    pub load_joystick_assignments: Option<bool>,

    /// Restore which subjects own the keyboard
    pub load_keyboard_assignments: Option<bool>,

    /// Restore which subjects own the mouse
    pub load_mouse_assignments: Option<bool>,

    pub save_mode: Option<SaveMode>,

    /// Prefix of every record key
    pub key_prefix: Option<String>,

    /// Match remembered devices by hardware identifier when exact identity fails
    pub allow_imprecise_matching: Option<bool>,

    /// Defer reconciliation on the first device connection to the next yield point
    pub defer_first_reconcile: Option<bool>,

    /// Hand devices left unowned after reconciliation to the auto-assigner
    pub auto_assign_devices: Option<bool>,
}

const BOOL_NODES: [&str; 8] = [
    "enabled",
    "load-on-start",
    "load-joystick-assignments",
    "load-keyboard-assignments",
    "load-mouse-assignments",
    "allow-imprecise-matching",
    "defer-first-reconcile",
    "auto-assign-devices",
];

impl StoreConfig {
    /// Create an empty config with no values set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the config values.
    ///
    /// Returns an error message if any value is invalid.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if let Some(ref prefix) = self.key_prefix {
            validate_prefix(prefix).map_err(|e| e.to_string())?;
        }
        Ok(())
    }

    fn bool_slot(&mut self, name: &str) -> Option<&mut Option<bool>> {
        match name {
            "enabled" => Some(&mut self.enabled),
            "load-on-start" => Some(&mut self.load_on_start),
            "load-joystick-assignments" => Some(&mut self.load_joystick_assignments),
            "load-keyboard-assignments" => Some(&mut self.load_keyboard_assignments),
            "load-mouse-assignments" => Some(&mut self.load_mouse_assignments),
            "allow-imprecise-matching" => Some(&mut self.allow_imprecise_matching),
            "defer-first-reconcile" => Some(&mut self.defer_first_reconcile),
            "auto-assign-devices" => Some(&mut self.auto_assign_devices),
            _ => None,
        }
    }

    fn bool_value(&self, name: &str) -> Option<bool> {
        match name {
            "enabled" => self.enabled,
            "load-on-start" => self.load_on_start,
            "load-joystick-assignments" => self.load_joystick_assignments,
            "load-keyboard-assignments" => self.load_keyboard_assignments,
            "load-mouse-assignments" => self.load_mouse_assignments,
            "allow-imprecise-matching" => self.allow_imprecise_matching,
            "defer-first-reconcile" => self.defer_first_reconcile,
            "auto-assign-devices" => self.auto_assign_devices,
            _ => None,
        }
    }

    /// Parse config from a KDL document.
    ///
    /// Unknown nodes and values of the wrong type are ignored.
    pub fn from_kdl(doc: &KdlDocument) -> Self {
        let mut config = Self::new();

        for name in BOOL_NODES {
            let Some(value) = first_value(doc, name).and_then(KdlValue::as_bool) else {
                continue;
            };
            if let Some(slot) = config.bool_slot(name) {
                *slot = Some(value);
            }
        }

        if let Some(s) = first_value(doc, "save-mode").and_then(KdlValue::as_string) {
            config.save_mode = SaveMode::parse(s);
        }

        if let Some(s) = first_value(doc, "key-prefix").and_then(KdlValue::as_string) {
            config.key_prefix = Some(s.to_string());
        }

        config
    }

    /// Parse and validate config from KDL text.
    pub fn parse(text: &str) -> Result<Self> {
        let doc: KdlDocument = text.parse()?;
        let config = Self::from_kdl(&doc);
        config.validate().map_err(Error::Config)?;
        Ok(config)
    }

    /// Load config from a file. A missing file is an empty config.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Convert config to a KDL document.
    pub fn to_kdl(&self) -> KdlDocument {
        let mut doc = KdlDocument::new();

        for name in BOOL_NODES {
            if let Some(value) = self.bool_value(name) {
                let mut node = KdlNode::new(name);
                node.push(KdlEntry::new(KdlValue::Bool(value)));
                doc.nodes_mut().push(node);
            }
        }

        if let Some(mode) = self.save_mode {
            let mut node = KdlNode::new("save-mode");
            node.push(KdlEntry::new(KdlValue::String(mode.as_str().to_string())));
            doc.nodes_mut().push(node);
        }

        if let Some(ref prefix) = self.key_prefix {
            let mut node = KdlNode::new("key-prefix");
            node.push(KdlEntry::new(KdlValue::String(prefix.clone())));
            doc.nodes_mut().push(node);
        }

        doc
    }

    /// Merge another config into this one.
    /// Values from `other` override values in `self` if they are Some.
    pub fn merge(&mut self, other: &StoreConfig) {
        for name in BOOL_NODES {
            if let Some(value) = other.bool_value(name) {
                if let Some(slot) = self.bool_slot(name) {
                    *slot = Some(value);
                }
            }
        }
        if other.save_mode.is_some() {
            self.save_mode = other.save_mode;
        }
        if other.key_prefix.is_some() {
            self.key_prefix = other.key_prefix.clone();
        }
    }
}

fn first_value<'a>(doc: &'a KdlDocument, name: &str) -> Option<&'a KdlValue> {
    doc.get(name)?.entries().first().map(KdlEntry::value)
}

/// Effective data store settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreSettings {
    pub enabled: bool,
    pub load_on_start: bool,
    pub load_joystick_assignments: bool,
    pub load_keyboard_assignments: bool,
    pub load_mouse_assignments: bool,
    pub save_mode: SaveMode,
    pub key_prefix: String,
    pub allow_imprecise_matching: bool,
    pub defer_first_reconcile: bool,
    pub auto_assign_devices: bool,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            load_on_start: true,
            load_joystick_assignments: true,
            load_keyboard_assignments: true,
            load_mouse_assignments: true,
            save_mode: SaveMode::ByDevice,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            allow_imprecise_matching: true,
            defer_first_reconcile: true,
            auto_assign_devices: true,
        }
    }
}

impl StoreSettings {
    /// Fill unset config values with defaults.
    pub fn from_config(config: &StoreConfig) -> Self {
        let d = Self::default();
        Self {
            enabled: config.enabled.unwrap_or(d.enabled),
            load_on_start: config.load_on_start.unwrap_or(d.load_on_start),
            load_joystick_assignments: config
                .load_joystick_assignments
                .unwrap_or(d.load_joystick_assignments),
            load_keyboard_assignments: config
                .load_keyboard_assignments
                .unwrap_or(d.load_keyboard_assignments),
            load_mouse_assignments: config.load_mouse_assignments.unwrap_or(d.load_mouse_assignments),
            save_mode: config.save_mode.unwrap_or(d.save_mode),
            key_prefix: config.key_prefix.clone().unwrap_or(d.key_prefix),
            allow_imprecise_matching: config
                .allow_imprecise_matching
                .unwrap_or(d.allow_imprecise_matching),
            defer_first_reconcile: config.defer_first_reconcile.unwrap_or(d.defer_first_reconcile),
            auto_assign_devices: config.auto_assign_devices.unwrap_or(d.auto_assign_devices),
        }
    }
}
