//! Binding persistence by element role.
//!
//! In role mode each binding record is additionally saved as one record per
//! element role ("south", "left_trigger", ...) present on the device. On load
//! the role records of every device are overlaid onto its binding record, so
//! an edit made on one gamepad shows up on every other device that has an
//! element with the same role.
//!
//! A role with no bindings is still saved, as an empty record. On load that
//! empty record removes whatever the target had bound on the role.

use crate::codec::BindingCodec;
use crate::keys::{KeyCodec, KeyDescriptor, ROLE_KEY_VERSION};
use crate::models::{BindingRecord, ConnectedDevice, Element, RoleBindingRecord};
use crate::store::RecordStore;
use crate::{Error, Result};
use std::collections::BTreeMap;

/// Group a record's bindings by the role of their element on `device`.
///
/// Every role on the device gets an entry, including roles without bindings.
/// Bindings on elements without a role are left out.
pub fn split_by_role(
    record: &BindingRecord,
    device: &ConnectedDevice,
) -> BTreeMap<String, RoleBindingRecord> {
    let mut roles: BTreeMap<String, RoleBindingRecord> = device
        .roles()
        .into_iter()
        .map(|role| (role.to_string(), RoleBindingRecord::new(role)))
        .collect();

    for binding in &record.bindings {
        let Some(role) = device.element(binding.element_id).and_then(Element::role) else {
            continue;
        };
        if let Some(role_record) = roles.get_mut(role) {
            role_record.push(binding);
        }
    }
    roles
}

/// Write role records under their current-version keys. Returns the number written.
pub fn save_role_records(
    store: &mut dyn RecordStore,
    keys: &KeyCodec,
    codec: &dyn BindingCodec,
    subject: &str,
    category_id: i32,
    layout_id: i32,
    roles: &BTreeMap<String, RoleBindingRecord>,
) -> Result<usize> {
    let mut written = 0;
    for (role, record) in roles {
        let key = keys.current_key(&KeyDescriptor::Role {
            subject,
            role,
            category_id,
            layout_id,
        })?;
        store.set_string(key.as_str(), &codec.encode_role(record)?)?;
        written += 1;
    }
    Ok(written)
}

/// Load the record saved for one role, if any.
///
/// A malformed record is logged and treated as absent.
pub fn load_role(
    store: &dyn RecordStore,
    keys: &KeyCodec,
    codec: &dyn BindingCodec,
    subject: &str,
    role: &str,
    category_id: i32,
    layout_id: i32,
) -> Result<Option<RoleBindingRecord>> {
    let descriptor = KeyDescriptor::Role {
        subject,
        role,
        category_id,
        layout_id,
    };
    let found = keys.find_existing(&descriptor, ROLE_KEY_VERSION, |key| {
        store.exists(key.as_str())
    })?;
    let Some((key, _)) = found else {
        return Ok(None);
    };
    let Some(text) = store.get_string(key.as_str())? else {
        return Ok(None);
    };
    match codec.decode_role(role, &text) {
        Ok(record) => Ok(Some(record)),
        Err(Error::Parse(msg)) => {
            tracing::warn!(key = %key, error = %msg, "Ignoring malformed role record");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Load the records saved for every role on `device`.
pub fn load_role_records(
    store: &dyn RecordStore,
    keys: &KeyCodec,
    codec: &dyn BindingCodec,
    subject: &str,
    device: &ConnectedDevice,
    category_id: i32,
    layout_id: i32,
) -> Result<BTreeMap<String, RoleBindingRecord>> {
    let mut records = BTreeMap::new();
    for role in device.roles() {
        if let Some(record) = load_role(store, keys, codec, subject, role, category_id, layout_id)? {
            records.insert(role.to_string(), record);
        }
    }
    Ok(records)
}

/// What `reconstitute` changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconstituteOutcome {
    pub removed: usize,
    pub added: usize,
}

impl ReconstituteOutcome {
    pub fn changed(&self) -> bool {
        self.removed > 0 || self.added > 0
    }
}

/// Overlay role records onto `base`, the binding record of `target`.
///
/// For every loaded role, bindings on elements carrying that role are removed
/// and replaced by the role's entries, converted to each target element's
/// kind. The enabled flag of the removed bindings is carried over per role.
/// When anything changed the record is marked unmodified, since the overlay
/// is not a user edit.
pub fn reconstitute(
    base: &mut BindingRecord,
    roles: &BTreeMap<String, RoleBindingRecord>,
    target: &ConnectedDevice,
) -> ReconstituteOutcome {
    let mut outcome = ReconstituteOutcome::default();
    if roles.is_empty() {
        return outcome;
    }

    let mut enabled_by_role: BTreeMap<&str, bool> = BTreeMap::new();
    let before = base.bindings.len();
    base.bindings.retain(|binding| {
        let Some(role) = target.element(binding.element_id).and_then(Element::role) else {
            return true;
        };
        match roles.get_key_value(role) {
            Some((role, _)) => {
                enabled_by_role.insert(role.as_str(), binding.enabled);
                false
            }
            None => true,
        }
    });
    outcome.removed = before - base.bindings.len();

    for (role, record) in roles {
        if record.is_empty() {
            continue;
        }
        let elements: Vec<&Element> = target.elements_with_role(role).collect();
        if elements.len() > 1 {
            tracing::warn!(
                role = %role,
                elements = elements.len(),
                "Several elements share a role, applying its bindings to all of them"
            );
        }
        let enabled = enabled_by_role.get(role.as_str()).copied();
        for element in elements {
            for entry in &record.entries {
                let mut binding = entry.to_binding(element);
                if let Some(enabled) = enabled {
                    binding.enabled = enabled;
                }
                base.add_binding(&binding);
                outcome.added += 1;
            }
        }
    }

    if outcome.changed() {
        base.modified = false;
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonCodec;
    use crate::models::{AxisRange, DeviceKind, ElementKind, Pole};
    use crate::store::MemoryStore;
    use crate::test_utils::{axis, button, gamepad};

    fn pad_record() -> BindingRecord {
        let mut record = BindingRecord::new(DeviceKind::Joystick, 0, 0);
        record.add_binding(&button(1, 0)); // south
        record.add_binding(&axis(2, 2, AxisRange::Full, true)); // left_trigger
        record.add_binding(&button(3, 3)); // no role
        record.modified = false;
        record
    }

    #[test]
    fn test_split_includes_empty_roles() {
        let roles = split_by_role(&pad_record(), &gamepad(1, None));
        assert_eq!(roles.len(), 3);
        assert_eq!(roles["south"].entries.len(), 1);
        assert!(roles["east"].is_empty());
        assert_eq!(roles["left_trigger"].entries[0].element_kind, ElementKind::Axis);
        assert_eq!(roles["east"].role, "east");
    }

    #[test]
    fn test_roles_roundtrip_through_store() {
        let mut store = MemoryStore::new();
        let keys = KeyCodec::default();
        let device = gamepad(1, None);
        let roles = split_by_role(&pad_record(), &device);

        let written = save_role_records(&mut store, &keys, &JsonCodec, "Player0", 0, 0, &roles).unwrap();
        assert_eq!(written, 3);

        let loaded = load_role_records(&store, &keys, &JsonCodec, "Player0", &device, 0, 0).unwrap();
        assert_eq!(loaded, roles);
        assert!(load_role(&store, &keys, &JsonCodec, "Player1", "south", 0, 0).unwrap().is_none());
    }

    #[test]
    fn test_malformed_role_record_is_absent() {
        let mut store = MemoryStore::new();
        let keys = KeyCodec::default();
        let key = keys
            .current_key(&KeyDescriptor::Role {
                subject: "P",
                role: "south",
                category_id: 0,
                layout_id: 0,
            })
            .unwrap();
        store.set_string(key.as_str(), "not json").unwrap();
        assert!(load_role(&store, &keys, &JsonCodec, "P", "south", 0, 0).unwrap().is_none());
    }

    #[test]
    fn test_empty_role_name_is_rejected() {
        let store = MemoryStore::new();
        let result = load_role(&store, &KeyCodec::default(), &JsonCodec, "P", "", 0, 0);
        assert!(matches!(result, Err(Error::InvalidDescriptor(_))));
    }

    #[test]
    fn test_reconstitute_mirrors_edit_onto_other_device() {
        // edited on one pad: action 9 moved to east, trigger now a button-driven action
        let mut edited = BindingRecord::new(DeviceKind::Joystick, 0, 0);
        edited.add_binding(&button(9, 1));
        edited.add_binding(&button(4, 2));
        let source = gamepad(1, None);
        let roles = split_by_role(&edited, &source);

        let mut target_record = pad_record();
        let outcome = reconstitute(&mut target_record, &roles, &gamepad(2, None));

        // south emptied, east gains 9, trigger replaced by an axis binding for 4
        assert_eq!(outcome.removed, 2);
        assert_eq!(outcome.added, 2);
        assert!(target_record.bindings_for_action(1).next().is_none());
        assert_eq!(target_record.bindings_for_action(9).next().unwrap().element_id, 1);
        let trigger = target_record.bindings_for_action(4).next().unwrap();
        assert_eq!(trigger.element_kind, ElementKind::Axis);
        assert_eq!(trigger.axis_range, AxisRange::Positive);
        // the binding on the role-less element is kept
        assert!(target_record.bindings_for_action(3).next().is_some());
        assert!(!target_record.modified);
    }

    #[test]
    fn test_empty_role_record_deletes_prior_bindings() {
        // source device has a south button but nothing bound to it
        let source = gamepad(1, None);
        let roles = split_by_role(&BindingRecord::new(DeviceKind::Joystick, 0, 0), &source);
        let only_south: BTreeMap<String, RoleBindingRecord> =
            roles.into_iter().filter(|(role, _)| role == "south").collect();

        let mut target_record = pad_record();
        let outcome = reconstitute(&mut target_record, &only_south, &gamepad(2, None));
        assert_eq!(outcome, ReconstituteOutcome { removed: 1, added: 0 });
        assert!(target_record.bindings_for_action(1).next().is_none());
        assert_eq!(target_record.bindings.len(), 2);
    }

    #[test]
    fn test_enabled_flag_carries_over_per_role() {
        let mut target_record = pad_record();
        target_record.bindings[0].enabled = false;

        let mut south = RoleBindingRecord::new("south");
        south.push(&button(7, 0));
        let roles = BTreeMap::from([("south".to_string(), south)]);

        reconstitute(&mut target_record, &roles, &gamepad(2, None));
        let binding = target_record.bindings_for_action(7).next().unwrap();
        assert!(!binding.enabled);
    }

    #[test]
    fn test_shared_role_applies_to_every_element() {
        let mut target = gamepad(2, None);
        target.elements.push(Element::new(8, ElementKind::Axis, Some("south")));

        let mut south = RoleBindingRecord::new("south");
        south.push(&axis(5, 2, AxisRange::Full, true));
        let roles = BTreeMap::from([("south".to_string(), south)]);

        let mut record = BindingRecord::new(DeviceKind::Joystick, 0, 0);
        let outcome = reconstitute(&mut record, &roles, &target);
        assert_eq!(outcome.added, 2);

        let bound: Vec<(u32, ElementKind, Pole)> = record
            .bindings
            .iter()
            .map(|b| (b.element_id, b.element_kind, b.pole))
            .collect();
        assert_eq!(
            bound,
            vec![
                (0, ElementKind::Button, Pole::Negative),
                (8, ElementKind::Axis, Pole::Positive),
            ]
        );
    }

    #[test]
    fn test_no_roles_is_a_no_op() {
        let mut record = pad_record();
        record.modified = true;
        let outcome = reconstitute(&mut record, &BTreeMap::new(), &gamepad(2, None));
        assert!(!outcome.changed());
        assert!(record.modified);
    }
}
