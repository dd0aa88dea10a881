//! Data models for bindkeep records.
//!
//! This module defines the core data structures:
//! - `Binding` - One action bound to one control element
//! - `BindingRecord` - All bindings of a subject for one device, category and layout
//! - `BehaviorRecord` - Opaque per-subject input behavior settings
//! - `DeviceAssignmentSnapshot` - Which subject owned which device at save time
//! - `RoleBindingRecord` - Device-independent bindings for one element role
//! - `Roster` - Subjects and the devices currently connected

pub mod assignment;
pub mod device;
pub mod role;
pub mod roster;

pub use assignment::{DeviceAssignmentSnapshot, RememberedDevice, SubjectAssignment};
pub use device::{ConnectedDevice, DeviceCatalog, DeviceId, DeviceIdentifier, DeviceRef, Element};
pub use role::{RoleBindingRecord, RoleEntry};
pub use roster::{Roster, Subject, SubjectId};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of an action in the host's action universe.
pub type ActionId = i32;

/// Class of input device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Keyboard,
    Mouse,
    /// Gamepads, wheels and other devices that come and go at runtime
    Joystick,
    Custom,
}

impl DeviceKind {
    /// Parse a device kind from a string, case-insensitive.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "keyboard" => Some(Self::Keyboard),
            "mouse" => Some(Self::Mouse),
            "joystick" | "gamepad" => Some(Self::Joystick),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Keyboard => "keyboard",
            Self::Mouse => "mouse",
            Self::Joystick => "joystick",
            Self::Custom => "custom",
        }
    }

    /// Name of the map type embedded in binding record keys.
    pub fn map_type_name(&self) -> &'static str {
        match self {
            Self::Keyboard => "KeyboardMap",
            Self::Mouse => "MouseMap",
            Self::Joystick => "JoystickMap",
            Self::Custom => "CustomControllerMap",
        }
    }

    /// Whether devices of this kind can be connected, disconnected and reassigned at runtime.
    pub fn is_movable(&self) -> bool {
        matches!(self, Self::Joystick)
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Physical shape of a control element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    Axis,
    Button,
}

/// Portion of an axis a binding responds to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AxisRange {
    #[default]
    Full,
    Positive,
    Negative,
}

impl AxisRange {
    pub fn is_half(&self) -> bool {
        !matches!(self, Self::Full)
    }

    /// Whether two ranges on the same axis would respond to the same motion.
    pub fn overlaps(&self, other: AxisRange) -> bool {
        matches!(self, Self::Full) || matches!(other, Self::Full) || *self == other
    }
}

/// Direction a binding contributes to its action's value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pole {
    #[default]
    Positive,
    Negative,
}

fn default_true() -> bool {
    true
}

/// One action bound to one control element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    /// Record-local identifier, unique within one `BindingRecord`
    #[serde(default)]
    pub id: u32,

    pub action_id: ActionId,

    /// Element identifier on the device
    pub element_id: u32,

    pub element_kind: ElementKind,

    #[serde(default)]
    pub axis_range: AxisRange,

    #[serde(default)]
    pub pole: Pole,

    #[serde(default)]
    pub invert: bool,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Key name for keyboard bindings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_code: Option<String>,

    /// Modifier key flags for keyboard bindings
    #[serde(default, skip_serializing_if = "is_zero")]
    pub modifiers: u8,
}

fn is_zero(v: &u8) -> bool {
    *v == 0
}

impl Binding {
    /// Create an enabled binding with default range and pole.
    pub fn new(action_id: ActionId, element_id: u32, element_kind: ElementKind) -> Self {
        Self {
            id: 0,
            action_id,
            element_id,
            element_kind,
            axis_range: AxisRange::Full,
            pole: Pole::Positive,
            invert: false,
            enabled: true,
            key_code: None,
            modifiers: 0,
        }
    }

    /// Whether this binding and `other` occupy the same physical input.
    pub fn occupies_same_input(&self, other: &Binding) -> bool {
        if self.element_id != other.element_id {
            return false;
        }
        if self.key_code.is_some() || other.key_code.is_some() {
            return self.key_code == other.key_code && self.modifiers == other.modifiers;
        }
        match (self.element_kind, other.element_kind) {
            (ElementKind::Axis, ElementKind::Axis) => self.axis_range.overlaps(other.axis_range),
            _ => true,
        }
    }
}

/// All bindings of one subject for one device, map category and layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingRecord {
    pub device_kind: DeviceKind,
    pub category_id: i32,
    pub layout_id: i32,

    #[serde(default)]
    pub bindings: Vec<Binding>,

    /// Set when the user edited the record since it was loaded
    #[serde(default)]
    pub modified: bool,

    /// Last time the record was edited
    pub modified_at: DateTime<Utc>,
}

impl BindingRecord {
    pub fn new(device_kind: DeviceKind, category_id: i32, layout_id: i32) -> Self {
        Self {
            device_kind,
            category_id,
            layout_id,
            bindings: Vec::new(),
            modified: false,
            modified_at: Utc::now(),
        }
    }

    /// Add a copy of `template`, assigning it a fresh record-local id.
    ///
    /// Returns the new binding id. Marks the record modified.
    pub fn add_binding(&mut self, template: &Binding) -> u32 {
        let id = self.bindings.iter().map(|b| b.id + 1).max().unwrap_or(0);
        let mut binding = template.clone();
        binding.id = id;
        self.bindings.push(binding);
        self.touch();
        id
    }

    /// Remove a binding by id.
    pub fn remove_binding(&mut self, id: u32) -> Option<Binding> {
        let index = self.bindings.iter().position(|b| b.id == id)?;
        self.touch();
        Some(self.bindings.remove(index))
    }

    pub fn binding(&self, id: u32) -> Option<&Binding> {
        self.bindings.iter().find(|b| b.id == id)
    }

    pub fn bindings_for_action(&self, action_id: ActionId) -> impl Iterator<Item = &Binding> {
        self.bindings.iter().filter(move |b| b.action_id == action_id)
    }

    fn touch(&mut self) {
        self.modified = true;
        self.modified_at = Utc::now();
    }
}

/// Opaque per-subject input behavior settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BehaviorRecord {
    pub id: i32,
    pub data: String,
}

impl BehaviorRecord {
    pub fn new(id: i32, data: impl Into<String>) -> Self {
        Self {
            id,
            data: data.into(),
        }
    }
}

/// A map category defined by the host application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapCategory {
    pub id: i32,
    pub name: String,
    /// Only user-assignable categories are persisted
    #[serde(default = "default_true")]
    pub user_assignable: bool,
}
