//! Connected devices and the identity data used to key their records.

use super::{DeviceKind, ElementKind};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Session-local device id, assigned by the host when the device connects.
pub type DeviceId = u32;

/// A control element on a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    pub id: u32,
    pub kind: ElementKind,
    /// Device-independent role tag (e.g. "south"), when the catalog knows one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl Element {
    pub fn new(id: u32, kind: ElementKind, role: Option<&str>) -> Self {
        Self {
            id,
            kind,
            role: role.map(str::to_string),
        }
    }

    /// The role tag, treating an empty tag as absent.
    pub fn role(&self) -> Option<&str> {
        self.role.as_deref().filter(|r| !r.is_empty())
    }
}

/// A device as reported by the device catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedDevice {
    pub id: DeviceId,
    pub kind: DeviceKind,

    /// Stable per-device identity across sessions, when the platform provides one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_guid: Option<Uuid>,

    /// Free-text hardware identifier used for fuzzy matching
    #[serde(default)]
    pub hardware_identifier: String,

    /// Recognized hardware model; nil when the model is unknown
    #[serde(default)]
    pub hardware_type_guid: Uuid,

    #[serde(default)]
    pub elements: Vec<Element>,
}

impl ConnectedDevice {
    pub fn identifier(&self) -> DeviceIdentifier {
        DeviceIdentifier {
            kind: self.kind,
            device_id: self.id,
            hardware_identifier: self.hardware_identifier.clone(),
            hardware_type_guid: self.hardware_type_guid,
        }
    }

    pub fn device_ref(&self) -> DeviceRef {
        DeviceRef::new(self.kind, self.id)
    }

    pub fn element(&self, id: u32) -> Option<&Element> {
        self.elements.iter().find(|e| e.id == id)
    }

    /// Elements carrying `role`, in element order.
    pub fn elements_with_role<'a>(&'a self, role: &'a str) -> impl Iterator<Item = &'a Element> {
        self.elements.iter().filter(move |e| e.role() == Some(role))
    }

    /// Distinct roles present on the device, in element order.
    pub fn roles(&self) -> Vec<&str> {
        let mut roles: Vec<&str> = Vec::new();
        for role in self.elements.iter().filter_map(Element::role) {
            if !roles.contains(&role) {
                roles.push(role);
            }
        }
        roles
    }
}

/// Identity data a record key is built from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentifier {
    pub kind: DeviceKind,
    pub device_id: DeviceId,
    #[serde(default)]
    pub hardware_identifier: String,
    #[serde(default)]
    pub hardware_type_guid: Uuid,
}

impl DeviceIdentifier {
    pub fn is_recognized(&self) -> bool {
        !self.hardware_type_guid.is_nil()
    }
}

/// Reference to the device a subject's binding record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceRef {
    pub kind: DeviceKind,
    pub id: DeviceId,
}

impl DeviceRef {
    pub fn new(kind: DeviceKind, id: DeviceId) -> Self {
        Self { kind, id }
    }
}

/// Enumerates currently connected devices.
pub trait DeviceCatalog {
    /// All connected devices, in enumeration order.
    fn connected_devices(&self) -> Vec<ConnectedDevice>;

    /// Connected movable devices, in enumeration order.
    fn movable_devices(&self) -> Vec<ConnectedDevice> {
        self.connected_devices()
            .into_iter()
            .filter(|d| d.kind.is_movable())
            .collect()
    }
}
