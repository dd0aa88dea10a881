//! Device-independent bindings stored per element role.

use super::{ActionId, AxisRange, Binding, Element, ElementKind, Pole};
use serde::{Deserialize, Serialize};

/// One binding stripped of its device-specific element id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleEntry {
    pub action_id: ActionId,
    pub element_kind: ElementKind,
    #[serde(default)]
    pub axis_range: AxisRange,
    #[serde(default)]
    pub pole: Pole,
    #[serde(default)]
    pub invert: bool,
}

impl RoleEntry {
    pub fn from_binding(binding: &Binding) -> Self {
        Self {
            action_id: binding.action_id,
            element_kind: binding.element_kind,
            axis_range: binding.axis_range,
            pole: binding.pole,
            invert: binding.invert,
        }
    }

    /// Build a binding for `target`, converting between axis and button shapes.
    ///
    /// - axis to button: a full-range inverted axis becomes a negative pole,
    ///   a half-range axis keeps its range and pole
    /// - button to axis: positive range, pole kept
    ///
    /// Conversions always clear `invert`.
    pub fn to_binding(&self, target: &Element) -> Binding {
        let mut binding = Binding {
            axis_range: self.axis_range,
            pole: self.pole,
            invert: self.invert,
            ..Binding::new(self.action_id, target.id, target.kind)
        };

        match (self.element_kind, target.kind) {
            (ElementKind::Axis, ElementKind::Button) => {
                if self.axis_range == AxisRange::Full && self.invert {
                    binding.pole = Pole::Negative;
                }
                binding.invert = false;
            }
            (ElementKind::Button, ElementKind::Axis) => {
                binding.axis_range = AxisRange::Positive;
                binding.invert = false;
            }
            _ => {}
        }

        binding
    }
}

/// All bindings saved for one role.
///
/// An empty record is meaningful: it says the role now has no bindings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleBindingRecord {
    /// Carried by the key, not the serialized body
    #[serde(skip)]
    pub role: String,
    #[serde(default)]
    pub entries: Vec<RoleEntry>,
}

impl RoleBindingRecord {
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, binding: &Binding) {
        self.entries.push(RoleEntry::from_binding(binding));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
