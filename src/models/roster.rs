//! Subjects (logical users) and the devices connected in this session.

use super::{BehaviorRecord, BindingRecord, ConnectedDevice, DeviceCatalog, DeviceId, DeviceKind, DeviceRef};
use std::collections::BTreeMap;

/// Stable subject identifier.
pub type SubjectId = u32;

/// A logical user owning devices and bindings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub id: SubjectId,

    /// Name embedded in record keys
    pub name: String,

    pub has_keyboard: bool,
    pub has_mouse: bool,

    /// Movable devices owned by the subject, in ownership order
    pub devices: Vec<DeviceId>,

    /// Binding records per device
    pub maps: BTreeMap<DeviceRef, Vec<BindingRecord>>,

    pub behaviors: Vec<BehaviorRecord>,
}

impl Subject {
    pub fn new(id: SubjectId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            has_keyboard: false,
            has_mouse: false,
            devices: Vec::new(),
            maps: BTreeMap::new(),
            behaviors: Vec::new(),
        }
    }

    pub fn owns(&self, device: DeviceRef) -> bool {
        match device.kind {
            DeviceKind::Keyboard => self.has_keyboard,
            DeviceKind::Mouse => self.has_mouse,
            _ => self.devices.contains(&device.id),
        }
    }

    /// Assign a movable device. Returns false if it was already owned.
    pub fn assign_device(&mut self, id: DeviceId) -> bool {
        if self.devices.contains(&id) {
            return false;
        }
        self.devices.push(id);
        true
    }

    pub fn unassign_device(&mut self, id: DeviceId) -> bool {
        let before = self.devices.len();
        self.devices.retain(|d| *d != id);
        self.devices.len() < before
    }

    pub fn map(&self, device: DeviceRef, category_id: i32, layout_id: i32) -> Option<&BindingRecord> {
        self.maps
            .get(&device)?
            .iter()
            .find(|m| m.category_id == category_id && m.layout_id == layout_id)
    }

    /// Insert a record, replacing any record with the same category and layout.
    pub fn set_map(&mut self, device: DeviceRef, record: BindingRecord) {
        let maps = self.maps.entry(device).or_default();
        match maps
            .iter_mut()
            .find(|m| m.category_id == record.category_id && m.layout_id == record.layout_id)
        {
            Some(existing) => *existing = record,
            None => maps.push(record),
        }
    }

    pub fn maps_for(&self, device: DeviceRef) -> &[BindingRecord] {
        self.maps.get(&device).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn behavior_mut(&mut self, id: i32) -> Option<&mut BehaviorRecord> {
        self.behaviors.iter_mut().find(|b| b.id == id)
    }
}

/// The host's subjects plus the devices enumerable right now.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    pub subjects: Vec<Subject>,
    pub devices: Vec<ConnectedDevice>,
    /// Calibration data per connected device
    pub calibrations: BTreeMap<DeviceId, String>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_subjects(subjects: Vec<Subject>) -> Self {
        Self {
            subjects,
            ..Self::default()
        }
    }

    pub fn subject(&self, id: SubjectId) -> Option<&Subject> {
        self.subjects.iter().find(|s| s.id == id)
    }

    pub fn subject_mut(&mut self, id: SubjectId) -> Option<&mut Subject> {
        self.subjects.iter_mut().find(|s| s.id == id)
    }

    pub fn connect(&mut self, device: ConnectedDevice) {
        self.devices.retain(|d| !(d.kind == device.kind && d.id == device.id));
        self.devices.push(device);
    }

    /// Remove a device from the catalog and from every subject owning it.
    pub fn disconnect(&mut self, kind: DeviceKind, id: DeviceId) -> Option<ConnectedDevice> {
        let index = self.devices.iter().position(|d| d.kind == kind && d.id == id)?;
        if kind.is_movable() {
            for subject in &mut self.subjects {
                subject.unassign_device(id);
            }
        }
        self.calibrations.remove(&id);
        Some(self.devices.remove(index))
    }

    /// The first connected device of a fixed-role kind (keyboard or mouse).
    pub fn fixed_device(&self, kind: DeviceKind) -> Option<&ConnectedDevice> {
        self.devices.iter().find(|d| d.kind == kind)
    }

    pub fn find_device(&self, device: DeviceRef) -> Option<&ConnectedDevice> {
        self.devices
            .iter()
            .find(|d| d.kind == device.kind && d.id == device.id)
    }

    /// Movable devices owned by `subject`, in ownership order.
    pub fn owned_devices(&self, subject: &Subject) -> Vec<&ConnectedDevice> {
        subject
            .devices
            .iter()
            .filter_map(|id| self.find_device(DeviceRef::new(DeviceKind::Joystick, *id)))
            .collect()
    }

    /// Every device a subject's records can be saved for: keyboard, mouse, then owned joysticks.
    pub fn devices_of(&self, subject: &Subject) -> Vec<&ConnectedDevice> {
        let mut devices = Vec::new();
        if subject.has_keyboard {
            devices.extend(self.fixed_device(DeviceKind::Keyboard));
        }
        if subject.has_mouse {
            devices.extend(self.fixed_device(DeviceKind::Mouse));
        }
        devices.extend(self.owned_devices(subject));
        devices
    }

    pub fn has_movable_devices(&self) -> bool {
        self.devices.iter().any(|d| d.kind.is_movable())
    }
}

impl DeviceCatalog for Roster {
    fn connected_devices(&self) -> Vec<ConnectedDevice> {
        self.devices.clone()
    }
}
