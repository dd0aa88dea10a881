//! Default-binding injection for actions added after a record was saved.
//!
//! Each saved binding record carries the set of action ids that existed at
//! save time. On load, actions the host has defined since then get their
//! factory default bindings added to the record, unless a default would clash
//! with something already bound. User edits are never removed or altered.

use crate::models::{ActionId, Binding, BindingRecord};
use std::collections::BTreeSet;

/// Decides whether a default binding clashes with a record.
pub trait ConflictPolicy {
    fn conflicts(&self, record: &BindingRecord, candidate: &Binding) -> bool;
}

/// A default clashes when any binding already occupies the same physical input.
///
/// An identical binding is a clash with itself, which makes the merge idempotent.
#[derive(Debug, Clone, Copy, Default)]
pub struct SameElementConflict;

impl ConflictPolicy for SameElementConflict {
    fn conflicts(&self, record: &BindingRecord, candidate: &Binding) -> bool {
        record
            .bindings
            .iter()
            .any(|existing| existing.occupies_same_input(candidate))
    }
}

/// Result of a merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Nothing to merge: no known-ids snapshot, no new actions or no defaults
    Unchanged,
    /// Defaults for new actions were considered
    Merged {
        /// Actions of the defaults that were added, one entry per binding
        added: Vec<ActionId>,
        /// Actions of the defaults skipped because of a conflict
        skipped: Vec<ActionId>,
    },
}

impl MergeOutcome {
    pub fn added_count(&self) -> usize {
        match self {
            Self::Unchanged => 0,
            Self::Merged { added, .. } => added.len(),
        }
    }
}

/// Add default bindings for actions unknown at save time.
///
/// `known_at_save` is the id snapshot stored with the record; `None` or an
/// empty snapshot means the record predates snapshots and is left alone.
/// When anything is added the record's `modified` flag is cleared, since the
/// additions are not user edits.
pub fn merge_new_identifiers(
    record: &mut BindingRecord,
    known_at_save: Option<&[ActionId]>,
    universe: &[ActionId],
    defaults: Option<&BindingRecord>,
    conflict: &dyn ConflictPolicy,
) -> MergeOutcome {
    let known: BTreeSet<ActionId> = match known_at_save {
        Some(ids) if !ids.is_empty() => ids.iter().copied().collect(),
        _ => return MergeOutcome::Unchanged,
    };
    let Some(defaults) = defaults else {
        return MergeOutcome::Unchanged;
    };

    let unknown: BTreeSet<ActionId> = universe
        .iter()
        .copied()
        .filter(|id| !known.contains(id))
        .collect();
    if unknown.is_empty() {
        return MergeOutcome::Unchanged;
    }

    let mut added = Vec::new();
    let mut skipped = Vec::new();
    for default in defaults
        .bindings
        .iter()
        .filter(|b| unknown.contains(&b.action_id))
    {
        if conflict.conflicts(record, default) {
            tracing::debug!(
                action_id = default.action_id,
                element_id = default.element_id,
                "Skipping default binding that conflicts with saved bindings"
            );
            skipped.push(default.action_id);
            continue;
        }
        record.add_binding(default);
        added.push(default.action_id);
    }

    if !added.is_empty() {
        record.modified = false;
    }

    MergeOutcome::Merged { added, skipped }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DeviceKind;
    use crate::test_utils::button;

    fn defaults() -> BindingRecord {
        let mut record = BindingRecord::new(DeviceKind::Joystick, 0, 0);
        record.add_binding(&button(1, 0));
        record.add_binding(&button(2, 1));
        record.add_binding(&button(3, 3));
        record
    }

    fn saved() -> BindingRecord {
        let mut record = BindingRecord::new(DeviceKind::Joystick, 0, 0);
        // user moved action 1 to the east button
        record.add_binding(&button(1, 1));
        record
    }

    #[test]
    fn test_new_action_gets_its_default() {
        let mut record = saved();
        let outcome = merge_new_identifiers(
            &mut record,
            Some(&[1, 2]),
            &[1, 2, 3],
            Some(&defaults()),
            &SameElementConflict,
        );
        assert_eq!(
            outcome,
            MergeOutcome::Merged {
                added: vec![3],
                skipped: vec![]
            }
        );
        assert_eq!(record.bindings.len(), 2);
        assert_eq!(record.bindings_for_action(3).next().unwrap().element_id, 3);
        assert!(!record.modified);
    }

    #[test]
    fn test_conflicting_default_is_skipped() {
        let mut record = saved();
        let outcome = merge_new_identifiers(
            &mut record,
            Some(&[1]),
            &[1, 2],
            Some(&defaults()),
            &SameElementConflict,
        );
        // default for action 2 wants the east button, which action 1 now uses
        assert_eq!(
            outcome,
            MergeOutcome::Merged {
                added: vec![],
                skipped: vec![2]
            }
        );
        assert_eq!(record.bindings.len(), 1);
        assert!(record.modified);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut once = saved();
        merge_new_identifiers(&mut once, Some(&[1, 2]), &[1, 2, 3], Some(&defaults()), &SameElementConflict);

        let mut twice = once.clone();
        let outcome =
            merge_new_identifiers(&mut twice, Some(&[1, 2]), &[1, 2, 3], Some(&defaults()), &SameElementConflict);
        assert_eq!(outcome.added_count(), 0);
        assert_eq!(twice.bindings, once.bindings);
    }

    #[test]
    fn test_missing_snapshot_leaves_record_alone() {
        let mut record = saved();
        let before = record.clone();
        assert_eq!(
            merge_new_identifiers(&mut record, None, &[1, 2, 3], Some(&defaults()), &SameElementConflict),
            MergeOutcome::Unchanged
        );
        assert_eq!(
            merge_new_identifiers(&mut record, Some(&[]), &[1, 2, 3], Some(&defaults()), &SameElementConflict),
            MergeOutcome::Unchanged
        );
        assert_eq!(record, before);
    }

    #[test]
    fn test_nothing_new_or_no_defaults_is_unchanged() {
        let mut record = saved();
        assert_eq!(
            merge_new_identifiers(&mut record, Some(&[1, 2, 3]), &[1, 2, 3], Some(&defaults()), &SameElementConflict),
            MergeOutcome::Unchanged
        );
        assert_eq!(
            merge_new_identifiers(&mut record, Some(&[1]), &[1, 2, 3], None, &SameElementConflict),
            MergeOutcome::Unchanged
        );
    }

    #[test]
    fn test_defaults_conflicting_with_each_other_add_once() {
        let mut defaults = BindingRecord::new(DeviceKind::Joystick, 0, 0);
        defaults.add_binding(&button(5, 2));
        defaults.add_binding(&button(6, 2));
        let mut record = saved();
        let outcome =
            merge_new_identifiers(&mut record, Some(&[1]), &[1, 5, 6], Some(&defaults), &SameElementConflict);
        assert_eq!(
            outcome,
            MergeOutcome::Merged {
                added: vec![5],
                skipped: vec![6]
            }
        );
    }
}
