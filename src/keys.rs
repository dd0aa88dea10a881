//! Record key construction.
//!
//! Every persisted record lives under a key made of ordered `|name=value`
//! segments. The device-identity part of binding record keys changed over
//! time, so each record kind carries a schema version:
//!
//! | version | binding record key identity segments |
//! |---|---|
//! | 0 | `hardwareIdentifier`, plus `hardwareGuid` for movable devices |
//! | 1 | as 0, plus `duplicate` for movable devices |
//! | 2 | `kv=2` marker, `hardwareGuid`, `hardwareIdentifier` only for unrecognized hardware, `duplicate` for movable devices |
//!
//! Saves always use the current version. Loads walk from the current version
//! down to 0 and take the first key present, so data saved by older releases
//! stays readable without a migration step.
//!
//! Free-text values (subject names, hardware identifiers, roles) are
//! percent-escaped for `%`, `|`, `=` and `&`, so a value can never forge a
//! segment boundary. Values without those characters are written verbatim.

use crate::models::{DeviceIdentifier, DeviceKind};
use crate::{Error, Result};
use std::borrow::Cow;
use std::fmt::{self, Write};

/// Current key version for binding records and their known-ids snapshots.
pub const BINDING_KEY_VERSION: u32 = 2;

/// Current key version for role records.
pub const ROLE_KEY_VERSION: u32 = 0;

const VERSION_DUPLICATE_INDEX: u32 = 1;
const VERSION_TYPE_FIRST: u32 = 2;

/// Default prefix for every key.
pub const DEFAULT_KEY_PREFIX: &str = "InputSaveData";

/// A fully built record key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey(String);

impl RecordKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RecordKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Key inputs shared by binding records and their known-ids snapshots.
#[derive(Debug, Clone, Copy)]
pub struct MapKey<'a> {
    pub subject: &'a str,
    pub device: &'a DeviceIdentifier,
    pub category_id: i32,
    pub layout_id: i32,
    /// Ordinal among same-type devices owned by the subject; see [`duplicate_index`]
    pub duplicate_index: u32,
}

/// Semantic description of a record, from which its key is built.
#[derive(Debug, Clone, Copy)]
pub enum KeyDescriptor<'a> {
    Binding(MapKey<'a>),
    KnownActionIds(MapKey<'a>),
    Role {
        subject: &'a str,
        role: &'a str,
        category_id: i32,
        layout_id: i32,
    },
    Calibration(&'a DeviceIdentifier),
    Behavior {
        subject: &'a str,
        behavior_id: i32,
    },
    Assignments,
}

impl KeyDescriptor<'_> {
    /// The version new saves of this record kind are written under.
    pub fn current_version(&self) -> u32 {
        match self {
            Self::Binding(_) | Self::KnownActionIds(_) => BINDING_KEY_VERSION,
            Self::Role { .. } => ROLE_KEY_VERSION,
            _ => 0,
        }
    }

    pub fn data_type(&self) -> &'static str {
        match self {
            Self::Binding(_) => "ControllerMap",
            Self::KnownActionIds(_) => "ControllerMap_KnownActionIds",
            Self::Role { .. } => "ElementRoleMap",
            Self::Calibration(_) => "CalibrationMap",
            Self::Behavior { .. } => "InputBehavior",
            Self::Assignments => "DeviceAssignments",
        }
    }

    fn subject(&self) -> Option<&str> {
        match self {
            Self::Binding(parts) | Self::KnownActionIds(parts) => Some(parts.subject),
            Self::Role { subject, .. } | Self::Behavior { subject, .. } => Some(subject),
            _ => None,
        }
    }

    fn validate(&self, version: u32) -> Result<()> {
        if let Some(subject) = self.subject() {
            if subject.is_empty() {
                return Err(Error::InvalidDescriptor(format!(
                    "{} key requires a subject name",
                    self.data_type()
                )));
            }
        }
        if let Self::Role { role, .. } = self {
            if role.is_empty() {
                return Err(Error::InvalidDescriptor(
                    "ElementRoleMap key requires a role".to_string(),
                ));
            }
        }
        if version > self.current_version() {
            return Err(Error::InvalidDescriptor(format!(
                "{} has no key version {} (current is {})",
                self.data_type(),
                version,
                self.current_version()
            )));
        }
        Ok(())
    }
}

/// Builds record keys under one prefix.
#[derive(Debug, Clone)]
pub struct KeyCodec {
    prefix: String,
}

impl Default for KeyCodec {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }
}

impl KeyCodec {
    /// Create a codec for `prefix`.
    ///
    /// The prefix is written verbatim, so it must be non-empty and free of `|`.
    pub fn new(prefix: impl Into<String>) -> Result<Self> {
        let prefix = prefix.into();
        validate_prefix(&prefix)?;
        Ok(Self { prefix })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Build the key for `descriptor` under schema `version`.
    ///
    /// Pure: identical inputs always produce byte-identical keys.
    pub fn build_key(&self, descriptor: &KeyDescriptor<'_>, version: u32) -> Result<RecordKey> {
        descriptor.validate(version)?;

        let mut key = KeyWriter::new(&self.prefix);
        match descriptor {
            KeyDescriptor::Assignments => {
                key.raw("_");
                key.raw(descriptor.data_type());
            }
            KeyDescriptor::Binding(parts) | KeyDescriptor::KnownActionIds(parts) => {
                key.text("subject", parts.subject);
                key.value("dataType", descriptor.data_type());
                write_map_suffix(&mut key, parts, version);
            }
            KeyDescriptor::Role {
                subject,
                role,
                category_id,
                layout_id,
            } => {
                key.text("subject", subject);
                key.value("dataType", descriptor.data_type());
                key.value("kv", version);
                key.value("categoryId", category_id);
                key.value("layoutId", layout_id);
                key.text("role", role);
            }
            KeyDescriptor::Calibration(device) => {
                key.value("dataType", descriptor.data_type());
                key.value("deviceKind", device.kind.as_str());
                key.text("hardwareIdentifier", &device.hardware_identifier);
                key.value("hardwareGuid", device.hardware_type_guid);
            }
            KeyDescriptor::Behavior {
                subject,
                behavior_id,
            } => {
                key.text("subject", subject);
                key.value("dataType", descriptor.data_type());
                key.value("id", behavior_id);
            }
        }
        Ok(key.finish())
    }

    /// Build the key new saves of `descriptor` are written under.
    pub fn current_key(&self, descriptor: &KeyDescriptor<'_>) -> Result<RecordKey> {
        self.build_key(descriptor, descriptor.current_version())
    }

    /// Find the newest version at or below `max_version` whose key exists.
    ///
    /// Tries `max_version`, `max_version - 1`, ... `0` and returns the first
    /// key for which `exists` is true, with its version.
    pub fn find_existing<F>(
        &self,
        descriptor: &KeyDescriptor<'_>,
        max_version: u32,
        mut exists: F,
    ) -> Result<Option<(RecordKey, u32)>>
    where
        F: FnMut(&RecordKey) -> bool,
    {
        for version in (0..=max_version).rev() {
            let key = self.build_key(descriptor, version)?;
            if exists(&key) {
                return Ok(Some((key, version)));
            }
        }
        Ok(None)
    }
}

fn write_map_suffix(key: &mut KeyWriter, parts: &MapKey<'_>, version: u32) {
    let device = parts.device;
    let movable = device.kind.is_movable();

    if version >= VERSION_TYPE_FIRST {
        key.value("kv", version);
    }
    key.value("categoryId", parts.category_id);
    key.value("layoutId", parts.layout_id);
    key.value("mapType", device.kind.map_type_name());

    if version >= VERSION_TYPE_FIRST {
        // Recognized hardware is keyed by type alone so records stay
        // addressable while the device is disconnected.
        key.value("hardwareGuid", device.hardware_type_guid);
        if !device.is_recognized() {
            key.text("hardwareIdentifier", &device.hardware_identifier);
        }
        if movable {
            key.value("duplicate", parts.duplicate_index);
        }
    } else {
        key.text("hardwareIdentifier", &device.hardware_identifier);
        if movable {
            key.value("hardwareGuid", device.hardware_type_guid);
            if version >= VERSION_DUPLICATE_INDEX {
                key.value("duplicate", parts.duplicate_index);
            }
        }
    }
}

/// Check a key prefix.
pub fn validate_prefix(prefix: &str) -> Result<()> {
    if prefix.is_empty() {
        return Err(Error::Config("key prefix must not be empty".to_string()));
    }
    if prefix.contains('|') {
        return Err(Error::Config(format!(
            "key prefix must not contain '|', got: {}",
            prefix
        )));
    }
    Ok(())
}

/// Percent-escape the characters that delimit key segments.
pub fn escape_segment(value: &str) -> Cow<'_, str> {
    if !value.contains(|c| matches!(c, '%' | '|' | '=' | '&')) {
        return Cow::Borrowed(value);
    }
    let mut out = String::with_capacity(value.len() + 8);
    for c in value.chars() {
        match c {
            '%' => out.push_str("%25"),
            '|' => out.push_str("%7C"),
            '=' => out.push_str("%3D"),
            // Some platform stores cannot reload keys containing '&'
            '&' => out.push_str("%26"),
            _ => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Ordinal of `target` among same-type devices owned by a subject.
///
/// `owned` lists the subject's devices in ownership order. Devices of the same
/// recognized hardware type count as duplicates; unrecognized devices must
/// also share the hardware identifier. Returns 0 when `target` is not owned.
pub fn duplicate_index<'a, I>(owned: I, target: &DeviceIdentifier) -> u32
where
    I: IntoIterator<Item = &'a DeviceIdentifier>,
{
    let mut count = 0;
    let mut found = false;
    for device in owned {
        if device.kind != target.kind {
            continue;
        }
        let mut recognized = false;
        if target.kind == DeviceKind::Joystick {
            if device.hardware_type_guid != target.hardware_type_guid {
                continue;
            }
            recognized = target.is_recognized();
        }
        if !recognized && device.hardware_identifier != target.hardware_identifier {
            continue;
        }
        if device.device_id == target.device_id {
            found = true;
            break;
        }
        count += 1;
    }
    if found { count } else { 0 }
}

struct KeyWriter {
    buf: String,
}

impl KeyWriter {
    fn new(prefix: &str) -> Self {
        Self {
            buf: prefix.to_string(),
        }
    }

    fn raw(&mut self, s: &str) {
        self.buf.push_str(s);
    }

    fn value(&mut self, name: &str, value: impl fmt::Display) {
        let _ = write!(self.buf, "|{}={}", name, value);
    }

    fn text(&mut self, name: &str, value: &str) {
        let _ = write!(self.buf, "|{}={}", name, escape_segment(value));
    }

    fn finish(self) -> RecordKey {
        RecordKey(self.buf)
    }
}
