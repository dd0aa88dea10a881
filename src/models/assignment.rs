//! Device assignment snapshots.
//!
//! One snapshot is written per save and records, per subject, whether the
//! keyboard and mouse were attached and which movable devices were owned.

use super::{ConnectedDevice, DeviceId, Subject, SubjectId};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A movable device as remembered at save time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RememberedDevice {
    /// Stable instance identity; absent when the platform provides none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_guid: Option<Uuid>,

    /// Free-text hardware identifier used for fuzzy matching
    #[serde(default)]
    pub hardware_identifier: String,

    /// Session-local id the device had when saved
    pub session_id: DeviceId,
}

impl RememberedDevice {
    pub fn from_device(device: &ConnectedDevice) -> Self {
        Self {
            instance_guid: device.instance_guid.filter(|g| !g.is_nil()),
            hardware_identifier: device.hardware_identifier.clone(),
            session_id: device.id,
        }
    }

    pub fn precise_guid(&self) -> Option<Uuid> {
        self.instance_guid.filter(|g| !g.is_nil())
    }
}

/// Assignment state of one subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectAssignment {
    pub subject_id: SubjectId,
    #[serde(default)]
    pub has_keyboard: bool,
    #[serde(default)]
    pub has_mouse: bool,
    #[serde(default)]
    pub devices: Vec<RememberedDevice>,
}

/// Subject-to-device assignments captured at save time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceAssignmentSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Utc>>,
    pub subjects: Vec<SubjectAssignment>,
}

impl DeviceAssignmentSnapshot {
    /// Capture the current assignments of every subject.
    ///
    /// Owned devices that are no longer enumerable are left out.
    pub fn capture(subjects: &[Subject], devices: &[ConnectedDevice]) -> Self {
        let subjects = subjects
            .iter()
            .map(|subject| SubjectAssignment {
                subject_id: subject.id,
                has_keyboard: subject.has_keyboard,
                has_mouse: subject.has_mouse,
                devices: subject
                    .devices
                    .iter()
                    .filter_map(|id| {
                        devices
                            .iter()
                            .find(|d| d.kind.is_movable() && d.id == *id)
                            .map(RememberedDevice::from_device)
                    })
                    .collect(),
            })
            .collect();

        Self {
            saved_at: Some(Utc::now()),
            subjects,
        }
    }

    pub fn subject(&self, id: SubjectId) -> Option<&SubjectAssignment> {
        self.subjects.iter().find(|s| s.subject_id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a snapshot, rejecting malformed text.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Parse(format!("device assignments: {}", e)))
    }
}
