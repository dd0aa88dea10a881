//! Precedence resolution for data store settings.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. CLI flags (passed at runtime)
//! 2. Environment variables (`BINDKEEP_KEY_PREFIX`, `BINDKEEP_SAVE_MODE`)
//! 3. config.kdl (`--config <path>`, or `~/.config/bindkeep/config.kdl`)
//! 4. Built-in defaults

use crate::config::{SaveMode, StoreConfig, StoreSettings};
use crate::keys::validate_prefix;
use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// Environment variable overriding the key prefix.
pub const KEY_PREFIX_ENV: &str = "BINDKEEP_KEY_PREFIX";

/// Environment variable overriding the save mode.
pub const SAVE_MODE_ENV: &str = "BINDKEEP_SAVE_MODE";

/// Tracks where a resolved value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueSource {
    /// Value from environment variable
    EnvVar(String),
    /// Value from a config file
    ConfigFile(String),
    /// Value from CLI flag
    CliFlag,
    /// Built-in default value
    Default,
}

impl std::fmt::Display for ValueSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueSource::EnvVar(name) => write!(f, "env:{}", name),
            ValueSource::ConfigFile(path) => write!(f, "file:{}", path),
            ValueSource::CliFlag => write!(f, "cli"),
            ValueSource::Default => write!(f, "default"),
        }
    }
}

/// A resolved value with its source.
#[derive(Debug, Clone)]
pub struct Resolved<T> {
    /// The resolved value
    pub value: T,
    /// Where the value came from
    pub source: ValueSource,
}

impl<T> Resolved<T> {
    /// Create a new resolved value.
    pub fn new(value: T, source: ValueSource) -> Self {
        Self { value, source }
    }
}

/// Fully resolved settings with source tracking.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub enabled: Resolved<bool>,
    pub load_on_start: Resolved<bool>,
    pub load_joystick_assignments: Resolved<bool>,
    pub load_keyboard_assignments: Resolved<bool>,
    pub load_mouse_assignments: Resolved<bool>,
    pub save_mode: Resolved<SaveMode>,
    pub key_prefix: Resolved<String>,
    pub allow_imprecise_matching: Resolved<bool>,
    pub defer_first_reconcile: Resolved<bool>,
    pub auto_assign_devices: Resolved<bool>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        let d = StoreSettings::default();
        let def = || ValueSource::Default;
        Self {
            enabled: Resolved::new(d.enabled, def()),
            load_on_start: Resolved::new(d.load_on_start, def()),
            load_joystick_assignments: Resolved::new(d.load_joystick_assignments, def()),
            load_keyboard_assignments: Resolved::new(d.load_keyboard_assignments, def()),
            load_mouse_assignments: Resolved::new(d.load_mouse_assignments, def()),
            save_mode: Resolved::new(d.save_mode, def()),
            key_prefix: Resolved::new(d.key_prefix, def()),
            allow_imprecise_matching: Resolved::new(d.allow_imprecise_matching, def()),
            defer_first_reconcile: Resolved::new(d.defer_first_reconcile, def()),
            auto_assign_devices: Resolved::new(d.auto_assign_devices, def()),
        }
    }
}

impl ResolvedConfig {
    /// The effective settings, without sources.
    pub fn settings(&self) -> StoreSettings {
        StoreSettings {
            enabled: self.enabled.value,
            load_on_start: self.load_on_start.value,
            load_joystick_assignments: self.load_joystick_assignments.value,
            load_keyboard_assignments: self.load_keyboard_assignments.value,
            load_mouse_assignments: self.load_mouse_assignments.value,
            save_mode: self.save_mode.value,
            key_prefix: self.key_prefix.value.clone(),
            allow_imprecise_matching: self.allow_imprecise_matching.value,
            defer_first_reconcile: self.defer_first_reconcile.value,
            auto_assign_devices: self.auto_assign_devices.value,
        }
    }

    /// Every setting as `(name, value, source)`, in config file order.
    pub fn entries(&self) -> Vec<(&'static str, String, &ValueSource)> {
        vec![
            entry("enabled", &self.enabled),
            entry("load-on-start", &self.load_on_start),
            entry("load-joystick-assignments", &self.load_joystick_assignments),
            entry("load-keyboard-assignments", &self.load_keyboard_assignments),
            entry("load-mouse-assignments", &self.load_mouse_assignments),
            entry("save-mode", &self.save_mode),
            entry("key-prefix", &self.key_prefix),
            entry("allow-imprecise-matching", &self.allow_imprecise_matching),
            entry("defer-first-reconcile", &self.defer_first_reconcile),
            entry("auto-assign-devices", &self.auto_assign_devices),
        ]
    }
}

fn entry<'a, T: std::fmt::Display>(
    name: &'static str,
    resolved: &'a Resolved<T>,
) -> (&'static str, String, &'a ValueSource) {
    (name, resolved.value.to_string(), &resolved.source)
}

/// CLI overrides for configuration resolution.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Key prefix override from CLI flag
    pub key_prefix: Option<String>,
    /// Save mode override from CLI flag
    pub save_mode: Option<SaveMode>,
    /// Imprecise matching override from CLI flag
    pub allow_imprecise_matching: Option<bool>,
}

impl ConfigOverrides {
    /// Create empty overrides.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set key prefix override.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    /// Set save mode override.
    pub fn with_save_mode(mut self, mode: SaveMode) -> Self {
        self.save_mode = Some(mode);
        self
    }

    /// Set imprecise matching override.
    pub fn with_allow_imprecise_matching(mut self, allow: bool) -> Self {
        self.allow_imprecise_matching = Some(allow);
        self
    }
}

/// Default config file location: `~/.config/bindkeep/config.kdl`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("bindkeep").join("config.kdl"))
}

/// Resolve settings with the full precedence chain, reading the process environment.
///
/// An explicit `config_path` must exist; the default location may be absent.
pub fn resolve_config(
    config_path: Option<&Path>,
    overrides: &ConfigOverrides,
) -> Result<ResolvedConfig> {
    let (file, label) = match config_path {
        Some(path) => {
            if !path.exists() {
                return Err(Error::Config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            (StoreConfig::load(path)?, path.display().to_string())
        }
        None => match default_config_path() {
            Some(path) => (StoreConfig::load(&path)?, path.display().to_string()),
            None => (StoreConfig::new(), String::new()),
        },
    };

    resolve_with(&file, &label, |name| std::env::var(name).ok(), overrides)
}

/// Resolve settings from an already loaded config file and an environment lookup.
pub fn resolve_with<F>(
    file: &StoreConfig,
    file_label: &str,
    env: F,
    overrides: &ConfigOverrides,
) -> Result<ResolvedConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let mut result = ResolvedConfig::default();
    let from_file = || ValueSource::ConfigFile(file_label.to_string());

    // Booleans only come from the file
    let bools: [(&mut Resolved<bool>, Option<bool>); 8] = [
        (&mut result.enabled, file.enabled),
        (&mut result.load_on_start, file.load_on_start),
        (&mut result.load_joystick_assignments, file.load_joystick_assignments),
        (&mut result.load_keyboard_assignments, file.load_keyboard_assignments),
        (&mut result.load_mouse_assignments, file.load_mouse_assignments),
        (&mut result.allow_imprecise_matching, file.allow_imprecise_matching),
        (&mut result.defer_first_reconcile, file.defer_first_reconcile),
        (&mut result.auto_assign_devices, file.auto_assign_devices),
    ];
    for (slot, value) in bools {
        if let Some(value) = value {
            *slot = Resolved::new(value, from_file());
        }
    }
    if let Some(allow) = overrides.allow_imprecise_matching {
        result.allow_imprecise_matching = Resolved::new(allow, ValueSource::CliFlag);
    }

    // Resolve save_mode
    if let Some(mode) = overrides.save_mode {
        result.save_mode = Resolved::new(mode, ValueSource::CliFlag);
    } else if let Some(raw) = env(SAVE_MODE_ENV) {
        let mode = SaveMode::parse(&raw).ok_or_else(|| {
            Error::Config(format!("{} must be by-device or by-role, got: {}", SAVE_MODE_ENV, raw))
        })?;
        result.save_mode = Resolved::new(mode, ValueSource::EnvVar(SAVE_MODE_ENV.to_string()));
    } else if let Some(mode) = file.save_mode {
        result.save_mode = Resolved::new(mode, from_file());
    }

    // Resolve key_prefix
    if let Some(ref prefix) = overrides.key_prefix {
        result.key_prefix = Resolved::new(prefix.clone(), ValueSource::CliFlag);
    } else if let Some(prefix) = env(KEY_PREFIX_ENV).filter(|p| !p.is_empty()) {
        result.key_prefix = Resolved::new(prefix, ValueSource::EnvVar(KEY_PREFIX_ENV.to_string()));
    } else if let Some(ref prefix) = file.key_prefix {
        result.key_prefix = Resolved::new(prefix.clone(), from_file());
    }
    validate_prefix(&result.key_prefix.value)?;

    Ok(result)
}
