//! Command implementations for the bk CLI.
//!
//! Each command returns a result struct implementing [`Output`], printed as
//! JSON by default or as text with `-H`:
//! - `key` - Build record keys
//! - `get`, `set`, `has`, `rm`, `keys` - Raw store access
//! - `lookup` - Versioned record lookup
//! - `reconcile` - Device reconciliation against the saved snapshot
//! - `config show`, `version` - Introspection

use crate::config::{ResolvedConfig, StoreSettings};
use crate::datastore::UserDataStore;
use crate::keys::{BINDING_KEY_VERSION, KeyCodec, KeyDescriptor, MapKey};
use crate::models::{
    ConnectedDevice, DeviceAssignmentSnapshot, DeviceId, DeviceIdentifier, DeviceKind, Roster,
    Subject, SubjectId,
};
use crate::reconcile::AssignmentSource;
use crate::store::RecordStore;
use crate::{Error, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Command results that can be serialized to JSON or formatted for humans.
pub trait Output {
    /// Serialize to JSON string.
    fn to_json(&self) -> String;

    /// Format for human-readable output.
    fn to_human(&self) -> String;
}

macro_rules! json_output {
    ($ty:ty) => {
        fn to_json(&self) -> String {
            serde_json::to_string(self).unwrap_or_else(|e| {
                format!(r#"{{"error": "failed to serialize {}: {}"}}"#, stringify!($ty), e)
            })
        }
    };
}

// === Key descriptors ===

/// Owned form of a binding record slot, for building keys from CLI input.
#[derive(Debug, Clone)]
pub struct MapSpec {
    pub subject: String,
    pub device: DeviceIdentifier,
    pub category_id: i32,
    pub layout_id: i32,
    pub duplicate_index: u32,
}

impl MapSpec {
    fn map_key(&self) -> MapKey<'_> {
        MapKey {
            subject: &self.subject,
            device: &self.device,
            category_id: self.category_id,
            layout_id: self.layout_id,
            duplicate_index: self.duplicate_index,
        }
    }
}

/// Owned form of a [`KeyDescriptor`].
#[derive(Debug, Clone)]
pub enum KeySpec {
    Binding(MapSpec),
    KnownIds(MapSpec),
    Role {
        subject: String,
        role: String,
        category_id: i32,
        layout_id: i32,
    },
    Calibration(DeviceIdentifier),
    Behavior {
        subject: String,
        behavior_id: i32,
    },
    Assignments,
}

impl KeySpec {
    pub fn descriptor(&self) -> KeyDescriptor<'_> {
        match self {
            Self::Binding(map) => KeyDescriptor::Binding(map.map_key()),
            Self::KnownIds(map) => KeyDescriptor::KnownActionIds(map.map_key()),
            Self::Role {
                subject,
                role,
                category_id,
                layout_id,
            } => KeyDescriptor::Role {
                subject,
                role,
                category_id: *category_id,
                layout_id: *layout_id,
            },
            Self::Calibration(device) => KeyDescriptor::Calibration(device),
            Self::Behavior {
                subject,
                behavior_id,
            } => KeyDescriptor::Behavior {
                subject,
                behavior_id: *behavior_id,
            },
            Self::Assignments => KeyDescriptor::Assignments,
        }
    }
}

/// Build a device identifier from CLI text.
pub fn device_identifier(
    kind: &str,
    hardware_identifier: &str,
    hardware_type_guid: Option<Uuid>,
) -> Result<DeviceIdentifier> {
    let kind = DeviceKind::parse(kind).ok_or_else(|| {
        Error::InvalidDescriptor(format!(
            "unknown device kind '{}', expected keyboard, mouse, joystick or custom",
            kind
        ))
    })?;
    Ok(DeviceIdentifier {
        kind,
        device_id: 0,
        hardware_identifier: hardware_identifier.to_string(),
        hardware_type_guid: hardware_type_guid.unwrap_or_else(Uuid::nil),
    })
}

// === key ===

#[derive(Serialize)]
pub struct KeyResult {
    pub key: String,
    pub data_type: &'static str,
    pub version: u32,
    pub current_version: u32,
}

impl Output for KeyResult {
    json_output!(KeyResult);

    fn to_human(&self) -> String {
        if self.version == self.current_version {
            self.key.clone()
        } else {
            format!(
                "{}\n(version {}, current is {})",
                self.key, self.version, self.current_version
            )
        }
    }
}

/// Build the key for `spec` at `version`, or at its current version.
pub fn key_build(codec: &KeyCodec, spec: &KeySpec, version: Option<u32>) -> Result<KeyResult> {
    let descriptor = spec.descriptor();
    let current_version = descriptor.current_version();
    let version = version.unwrap_or(current_version);
    if version > current_version {
        return Err(Error::InvalidDescriptor(format!(
            "{} keys have no version {}, newest is {}",
            descriptor.data_type(),
            version,
            current_version
        )));
    }
    let key = codec.build_key(&descriptor, version)?;
    Ok(KeyResult {
        key: key.into_string(),
        data_type: descriptor.data_type(),
        version,
        current_version,
    })
}

// === get / set / has / rm / keys ===

#[derive(Serialize)]
pub struct ValueResult {
    pub key: String,
    pub found: bool,
    pub value: Option<String>,
}

impl Output for ValueResult {
    json_output!(ValueResult);

    fn to_human(&self) -> String {
        match &self.value {
            Some(value) => value.clone(),
            None => format!("No value stored under {}", self.key),
        }
    }
}

pub fn store_get(store: &dyn RecordStore, key: &str) -> Result<ValueResult> {
    let value = store.get_string(key)?;
    Ok(ValueResult {
        key: key.to_string(),
        found: value.is_some(),
        value,
    })
}

#[derive(Serialize)]
pub struct SetResult {
    pub key: String,
    pub bytes: usize,
    pub replaced: bool,
}

impl Output for SetResult {
    json_output!(SetResult);

    fn to_human(&self) -> String {
        let verb = if self.replaced { "Replaced" } else { "Stored" };
        format!("{} {} ({} bytes)", verb, self.key, self.bytes)
    }
}

pub fn store_set(store: &mut dyn RecordStore, key: &str, value: &str) -> Result<SetResult> {
    if key.is_empty() {
        return Err(Error::InvalidDescriptor("key must not be empty".to_string()));
    }
    let replaced = store.has(key)?;
    store.set_string(key, value)?;
    store.flush()?;
    Ok(SetResult {
        key: key.to_string(),
        bytes: value.len(),
        replaced,
    })
}

#[derive(Serialize)]
pub struct HasResult {
    pub key: String,
    pub exists: bool,
}

impl Output for HasResult {
    json_output!(HasResult);

    fn to_human(&self) -> String {
        if self.exists {
            format!("{} exists", self.key)
        } else {
            format!("{} does not exist", self.key)
        }
    }
}

pub fn store_has(store: &dyn RecordStore, key: &str) -> Result<HasResult> {
    Ok(HasResult {
        key: key.to_string(),
        exists: store.has(key)?,
    })
}

#[derive(Serialize)]
pub struct RmResult {
    pub key: String,
    pub deleted: bool,
}

impl Output for RmResult {
    json_output!(RmResult);

    fn to_human(&self) -> String {
        if self.deleted {
            format!("Removed {}", self.key)
        } else {
            format!("{} was not present", self.key)
        }
    }
}

pub fn store_rm(store: &mut dyn RecordStore, key: &str) -> Result<RmResult> {
    let deleted = store.delete(key)?;
    store.flush()?;
    Ok(RmResult {
        key: key.to_string(),
        deleted,
    })
}

#[derive(Serialize)]
pub struct KeysResult {
    pub location: String,
    pub count: usize,
    pub keys: Vec<String>,
}

impl Output for KeysResult {
    json_output!(KeysResult);

    fn to_human(&self) -> String {
        if self.keys.is_empty() {
            return format!("No keys in {}", self.location);
        }
        let mut lines = vec![format!("{} key(s) in {}:", self.count, self.location)];
        lines.extend(self.keys.iter().map(|k| format!("  {}", k)));
        lines.join("\n")
    }
}

pub fn store_keys(store: &dyn RecordStore, prefix: Option<&str>) -> Result<KeysResult> {
    let keys: Vec<String> = store
        .keys()?
        .into_iter()
        .filter(|k| prefix.is_none_or(|p| k.starts_with(p)))
        .collect();
    Ok(KeysResult {
        location: store.location(),
        count: keys.len(),
        keys,
    })
}

// === lookup ===

#[derive(Serialize)]
pub struct LookupResult {
    pub found: bool,
    pub key: Option<String>,
    pub version: Option<u32>,
    pub current_version: u32,
    pub value: Option<String>,
}

impl Output for LookupResult {
    json_output!(LookupResult);

    fn to_human(&self) -> String {
        match (&self.key, self.version) {
            (Some(key), Some(version)) if version < self.current_version => format!(
                "Found under version {} key (current is {}):\n  {}",
                version, self.current_version, key
            ),
            (Some(key), _) => format!("Found:\n  {}", key),
            _ => "No record found under any key version".to_string(),
        }
    }
}

/// Find a binding record the way a load does: newest key version first.
pub fn lookup_binding(
    store: &dyn RecordStore,
    codec: &KeyCodec,
    map: &MapSpec,
    max_version: Option<u32>,
) -> Result<LookupResult> {
    let descriptor = KeyDescriptor::Binding(map.map_key());
    let max_version = max_version.unwrap_or(BINDING_KEY_VERSION).min(BINDING_KEY_VERSION);
    let found = codec.find_existing(&descriptor, max_version, |key| {
        store.exists(key.as_str())
    })?;

    let Some((key, version)) = found else {
        return Ok(LookupResult {
            found: false,
            key: None,
            version: None,
            current_version: BINDING_KEY_VERSION,
            value: None,
        });
    };
    let value = store.get_string(key.as_str())?;
    Ok(LookupResult {
        found: true,
        key: Some(key.into_string()),
        version: Some(version),
        current_version: BINDING_KEY_VERSION,
        value,
    })
}

// === reconcile ===

#[derive(Serialize)]
pub struct ReconcileResult {
    pub applied: bool,
    pub precise: usize,
    pub imprecise: usize,
    pub history: usize,
    pub auto: usize,
    pub mapping: BTreeMap<SubjectId, Vec<DeviceId>>,
    pub saved: bool,
}

impl Output for ReconcileResult {
    json_output!(ReconcileResult);

    fn to_human(&self) -> String {
        if !self.applied {
            return "No changes (no movable devices, or the snapshot could not be read)".to_string();
        }
        let mut lines = vec![format!(
            "Reconciled: {} precise, {} imprecise, {} from history, {} auto-assigned",
            self.precise, self.imprecise, self.history, self.auto
        )];
        for (subject, devices) in &self.mapping {
            let devices = if devices.is_empty() {
                "-".to_string()
            } else {
                devices
                    .iter()
                    .map(|d| d.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            lines.push(format!("  subject {}: {}", subject, devices));
        }
        if self.saved {
            lines.push("Saved assignments".to_string());
        }
        lines.join("\n")
    }
}

/// Reconcile `devices_json` against the snapshot in `store`.
///
/// Subjects default to those listed in the saved snapshot.
pub fn reconcile(
    store: Box<dyn RecordStore>,
    settings: StoreSettings,
    devices_json: &str,
    subject_ids: &[SubjectId],
    save: bool,
) -> Result<ReconcileResult> {
    let devices: Vec<ConnectedDevice> = serde_json::from_str(devices_json)
        .map_err(|e| Error::Parse(format!("invalid device list: {}", e)))?;

    let mut ds = UserDataStore::new(settings, store)?;
    let subject_ids = if subject_ids.is_empty() {
        saved_subject_ids(&ds)?
    } else {
        subject_ids.to_vec()
    };
    if subject_ids.is_empty() {
        return Err(Error::NotFound(
            "no subjects given and no assignment snapshot saved; pass --subject".to_string(),
        ));
    }

    let subjects = subject_ids
        .iter()
        .map(|id| Subject::new(*id, format!("Player{}", id)))
        .collect();
    let mut roster = Roster::with_subjects(subjects);
    for device in devices {
        roster.connect(device);
    }

    let report = ds.load_assignments(&mut roster)?;
    if save {
        ds.save_assignments(&roster)?;
    }

    Ok(ReconcileResult {
        applied: report.applied,
        precise: report.count(AssignmentSource::Precise),
        imprecise: report.count(AssignmentSource::Imprecise),
        history: report.count(AssignmentSource::History),
        auto: report.count(AssignmentSource::Auto),
        mapping: report.mapping,
        saved: save,
    })
}

fn saved_subject_ids(ds: &UserDataStore) -> Result<Vec<SubjectId>> {
    let key = ds.keys().current_key(&KeyDescriptor::Assignments)?;
    let Some(text) = ds.store().get_string(key.as_str())? else {
        return Ok(Vec::new());
    };
    match DeviceAssignmentSnapshot::from_json(&text) {
        Ok(snapshot) => Ok(snapshot.subjects.iter().map(|s| s.subject_id).collect()),
        Err(e) => {
            tracing::warn!(error = %e, "Saved assignment snapshot is malformed");
            Ok(Vec::new())
        }
    }
}

// === config show ===

#[derive(Serialize)]
pub struct ConfigEntry {
    pub name: &'static str,
    pub value: String,
    pub source: String,
}

#[derive(Serialize)]
pub struct ConfigShowResult {
    pub entries: Vec<ConfigEntry>,
}

impl Output for ConfigShowResult {
    json_output!(ConfigShowResult);

    fn to_human(&self) -> String {
        let width = self.entries.iter().map(|e| e.name.len()).max().unwrap_or(0);
        self.entries
            .iter()
            .map(|e| format!("{:width$}  {}  ({})", e.name, e.value, e.source, width = width))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub fn config_show(resolved: &ResolvedConfig) -> ConfigShowResult {
    ConfigShowResult {
        entries: resolved
            .entries()
            .into_iter()
            .map(|(name, value, source)| ConfigEntry {
                name,
                value,
                source: source.to_string(),
            })
            .collect(),
    }
}

// === version ===

#[derive(Serialize)]
pub struct VersionResult {
    pub version: &'static str,
    pub build_timestamp: &'static str,
    pub commit: &'static str,
}

impl Output for VersionResult {
    json_output!(VersionResult);

    fn to_human(&self) -> String {
        format!(
            "bk {} (built {}, commit {})",
            self.version, self.build_timestamp, self.commit
        )
    }
}

pub fn version() -> VersionResult {
    VersionResult {
        version: env!("CARGO_PKG_VERSION"),
        build_timestamp: option_env!("BK_BUILD_TIMESTAMP").unwrap_or("unknown"),
        commit: option_env!("BK_GIT_COMMIT").unwrap_or("unknown"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::test_utils::{XINPUT, pad_type};

    fn pad_spec() -> MapSpec {
        MapSpec {
            subject: "Player0".to_string(),
            device: device_identifier("joystick", XINPUT, Some(pad_type())).unwrap(),
            category_id: 0,
            layout_id: 0,
            duplicate_index: 0,
        }
    }

    // ==== Key Tests ====

    #[test]
    fn test_key_build_defaults_to_current_version() {
        let result = key_build(&KeyCodec::default(), &KeySpec::Binding(pad_spec()), None).unwrap();
        assert_eq!(result.version, BINDING_KEY_VERSION);
        assert!(result.key.contains("|kv=2|"));
        assert_eq!(result.data_type, "ControllerMap");
    }

    #[test]
    fn test_key_build_rejects_future_version() {
        let result = key_build(&KeyCodec::default(), &KeySpec::Assignments, Some(1));
        assert!(matches!(result, Err(Error::InvalidDescriptor(_))));
    }

    #[test]
    fn test_unknown_device_kind() {
        assert!(device_identifier("wheel", "", None).is_err());
        let mouse = device_identifier("Mouse", "", None).unwrap();
        assert_eq!(mouse.kind, DeviceKind::Mouse);
        assert!(mouse.hardware_type_guid.is_nil());
    }

    // ==== Store Tests ====

    #[test]
    fn test_set_get_has_rm() {
        let mut store = MemoryStore::new();
        let set = store_set(&mut store, "a", "1").unwrap();
        assert!(!set.replaced);
        assert!(store_set(&mut store, "a", "2").unwrap().replaced);
        assert_eq!(store_get(&store, "a").unwrap().value.as_deref(), Some("2"));
        assert!(store_has(&store, "a").unwrap().exists);
        assert!(store_rm(&mut store, "a").unwrap().deleted);
        assert!(!store_get(&store, "a").unwrap().found);
        assert!(store_set(&mut store, "", "x").is_err());
    }

    #[test]
    fn test_keys_prefix_filter() {
        let mut store = MemoryStore::new();
        store.set_string("InputSaveData|x", "1").unwrap();
        store.set_string("Other|y", "2").unwrap();
        let all = store_keys(&store, None).unwrap();
        assert_eq!(all.count, 2);
        let filtered = store_keys(&store, Some("InputSaveData")).unwrap();
        assert_eq!(filtered.keys, vec!["InputSaveData|x".to_string()]);
    }

    // ==== Lookup Tests ====

    #[test]
    fn test_lookup_finds_old_version() {
        let codec = KeyCodec::default();
        let spec = pad_spec();
        let mut store = MemoryStore::new();
        let old = key_build(&codec, &KeySpec::Binding(spec.clone()), Some(1)).unwrap();
        store.set_string(&old.key, "{}").unwrap();

        let result = lookup_binding(&store, &codec, &spec, None).unwrap();
        assert!(result.found);
        assert_eq!(result.version, Some(1));
        assert_eq!(result.key.as_deref(), Some(old.key.as_str()));
        assert!(result.to_human().contains("version 1"));

        let capped = lookup_binding(&store, &codec, &spec, Some(0)).unwrap();
        assert!(!capped.found);
    }

    // ==== Reconcile Tests ====

    #[test]
    fn test_reconcile_against_saved_snapshot() {
        let guid = Uuid::from_u128(42);
        let mut subject = Subject::new(1, "Player1");
        subject.assign_device(5);
        let saved_device = ConnectedDevice {
            id: 5,
            kind: DeviceKind::Joystick,
            instance_guid: Some(guid),
            hardware_identifier: XINPUT.to_string(),
            hardware_type_guid: pad_type(),
            elements: Vec::new(),
        };
        let snapshot = DeviceAssignmentSnapshot::capture(
            &[Subject::new(0, "Player0"), subject],
            &[saved_device],
        );
        let mut store = MemoryStore::new();
        let key = KeyCodec::default().current_key(&KeyDescriptor::Assignments).unwrap();
        store.set_string(key.as_str(), &snapshot.to_json().unwrap()).unwrap();

        let devices = format!(
            r#"[{{"id": 9, "kind": "joystick", "instance_guid": "{}", "hardware_identifier": "XInput"}}]"#,
            guid
        );
        let result = reconcile(
            Box::new(store),
            StoreSettings::default(),
            &devices,
            &[],
            false,
        )
        .unwrap();
        assert!(result.applied);
        assert_eq!(result.precise, 1);
        assert_eq!(result.mapping[&1], vec![9]);
        assert!(result.mapping[&0].is_empty());
    }

    #[test]
    fn test_reconcile_without_subjects_fails() {
        let result = reconcile(
            Box::new(MemoryStore::new()),
            StoreSettings::default(),
            "[]",
            &[],
            false,
        );
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_reconcile_rejects_bad_device_json() {
        let result = reconcile(
            Box::new(MemoryStore::new()),
            StoreSettings::default(),
            "not json",
            &[0],
            false,
        );
        assert!(matches!(result, Err(Error::Parse(_))));
    }

    #[test]
    fn test_version_result() {
        let result = version();
        assert_eq!(result.version, env!("CARGO_PKG_VERSION"));
        assert!(result.to_json().contains("build_timestamp"));
    }
}
