//! Re-attaching movable devices to the subjects that owned them.
//!
//! A reconciliation run starts from the assignment snapshot written at the
//! last save and the devices enumerable right now:
//!
//! 1. every movable device is unassigned from every subject
//! 2. precise pass: remembered instance guids are matched exactly
//! 3. imprecise pass: remaining remembered devices are matched by hardware
//!    identifier, skipping devices already claimed in this run
//! 4. devices still unowned are offered to an [`AutoAssigner`]
//!
//! The new assignment is planned against the snapshot first and applied in
//! one step, so a run either applies completely or not at all.

use crate::models::{ConnectedDevice, DeviceAssignmentSnapshot, DeviceId, Subject, SubjectId};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Policy for movable devices left unowned after reconciliation.
pub trait AutoAssigner {
    /// Pick the subject that should own `device`, or `None` to leave it unowned.
    fn assign(&mut self, device: &ConnectedDevice, subjects: &[Subject]) -> Option<SubjectId>;
}

/// Hands each device to the first subject owning fewer than `max_per_subject` movable devices.
#[derive(Debug, Clone, Copy)]
pub struct FirstFreeSubject {
    pub max_per_subject: usize,
}

impl Default for FirstFreeSubject {
    fn default() -> Self {
        Self { max_per_subject: 1 }
    }
}

impl AutoAssigner for FirstFreeSubject {
    fn assign(&mut self, _device: &ConnectedDevice, subjects: &[Subject]) -> Option<SubjectId> {
        subjects
            .iter()
            .find(|s| s.devices.len() < self.max_per_subject)
            .map(|s| s.id)
    }
}

/// Leaves residual devices unowned.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAutoAssign;

impl AutoAssigner for NoAutoAssign {
    fn assign(&mut self, _device: &ConnectedDevice, _subjects: &[Subject]) -> Option<SubjectId> {
        None
    }
}

/// Reconciliation settings.
#[derive(Debug, Clone, Copy)]
pub struct ReconcileOptions {
    /// Run the hardware-identifier pass after exact matching
    pub allow_imprecise: bool,
    /// Offer unowned devices to the auto-assigner
    pub auto_assign: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            allow_imprecise: true,
            auto_assign: true,
        }
    }
}

/// How a device came to be assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentSource {
    Precise,
    Imprecise,
    /// Reused from a device claimed earlier in the same run for the same remembered id
    History,
    Auto,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssignmentEvent {
    pub subject_id: SubjectId,
    pub device_id: DeviceId,
    pub source: AssignmentSource,
}

/// What a reconciliation run did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// False when the run made no changes at all
    pub applied: bool,
    pub assignments: Vec<AssignmentEvent>,
    /// Movable devices owned by each subject after the run
    pub mapping: BTreeMap<SubjectId, Vec<DeviceId>>,
}

impl ReconcileReport {
    pub fn unchanged() -> Self {
        Self::default()
    }

    pub fn count(&self, source: AssignmentSource) -> usize {
        self.assignments.iter().filter(|a| a.source == source).count()
    }
}

/// Devices claimed during one run, keyed by the session id they were remembered under.
///
/// The first claim of a device wins.
#[derive(Debug, Clone, Default)]
pub struct AssignmentHistory {
    entries: Vec<(DeviceId, DeviceId)>,
}

impl AssignmentHistory {
    /// Record that `device` was matched for `remembered_id`. Returns false if the device was already claimed.
    pub fn record(&mut self, device: DeviceId, remembered_id: DeviceId) -> bool {
        if self.contains_device(device) {
            return false;
        }
        self.entries.push((device, remembered_id));
        true
    }

    pub fn contains_device(&self, device: DeviceId) -> bool {
        self.entries.iter().any(|(d, _)| *d == device)
    }

    /// The device claimed for a remembered session id.
    pub fn device_for(&self, remembered_id: DeviceId) -> Option<DeviceId> {
        self.entries
            .iter()
            .find(|(_, r)| *r == remembered_id)
            .map(|(d, _)| *d)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Planned movable-device ownership, not yet applied to any subject.
#[derive(Debug, Clone, Default)]
pub struct AssignmentPlan {
    pub devices: BTreeMap<SubjectId, Vec<DeviceId>>,
    pub events: Vec<AssignmentEvent>,
    pub history: AssignmentHistory,
}

impl AssignmentPlan {
    fn assign(&mut self, subject_id: SubjectId, device_id: DeviceId, source: AssignmentSource) {
        let owned = self.devices.entry(subject_id).or_default();
        if owned.contains(&device_id) {
            return;
        }
        owned.push(device_id);
        self.events.push(AssignmentEvent {
            subject_id,
            device_id,
            source,
        });
    }
}

/// Runs device reconciliation.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceReconciler {
    pub options: ReconcileOptions,
}

impl DeviceReconciler {
    pub fn new(options: ReconcileOptions) -> Self {
        Self { options }
    }

    /// Reconcile subjects against the saved snapshot text.
    ///
    /// - no movable device connected: nothing happens
    /// - malformed snapshot: nothing happens
    /// - absent or empty snapshot: current ownership is kept, unowned devices are auto-assigned
    pub fn reconcile(
        &self,
        snapshot_text: Option<&str>,
        devices: &[ConnectedDevice],
        subjects: &mut [Subject],
        auto: &mut dyn AutoAssigner,
    ) -> ReconcileReport {
        if !devices.iter().any(|d| d.kind.is_movable()) {
            tracing::debug!("No movable devices connected, skipping reconciliation");
            return ReconcileReport::unchanged();
        }

        let snapshot = match snapshot_text.map(str::trim).filter(|t| !t.is_empty()) {
            None => None,
            Some(text) => match DeviceAssignmentSnapshot::from_json(text) {
                Ok(snapshot) if snapshot.is_empty() => None,
                Ok(snapshot) => Some(snapshot),
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring malformed device assignment snapshot");
                    return ReconcileReport::unchanged();
                }
            },
        };

        self.reconcile_snapshot(snapshot.as_ref(), devices, subjects, auto)
    }

    /// Reconcile subjects against an already parsed snapshot.
    pub fn reconcile_snapshot(
        &self,
        snapshot: Option<&DeviceAssignmentSnapshot>,
        devices: &[ConnectedDevice],
        subjects: &mut [Subject],
        auto: &mut dyn AutoAssigner,
    ) -> ReconcileReport {
        let mut events = Vec::new();

        if let Some(snapshot) = snapshot {
            let mut plan = self.plan(snapshot, devices, subjects);
            for subject in subjects.iter_mut() {
                subject.devices = plan.devices.remove(&subject.id).unwrap_or_default();
            }
            tracing::info!(
                assigned = plan.events.len(),
                remembered = snapshot.subjects.iter().map(|s| s.devices.len()).sum::<usize>(),
                "Restored device assignments"
            );
            events = plan.events;
        }

        if self.options.auto_assign {
            events.extend(auto_assign_residual(devices, subjects, auto));
        }

        ReconcileReport {
            applied: true,
            assignments: events,
            mapping: subjects
                .iter()
                .map(|s| (s.id, s.devices.clone()))
                .collect(),
        }
    }

    /// Compute the assignment for `subjects` without touching them.
    ///
    /// Subjects present in the snapshot but not in `subjects` are ignored.
    pub fn plan(
        &self,
        snapshot: &DeviceAssignmentSnapshot,
        devices: &[ConnectedDevice],
        subjects: &[Subject],
    ) -> AssignmentPlan {
        let movable: Vec<&ConnectedDevice> = devices.iter().filter(|d| d.kind.is_movable()).collect();
        let mut plan = AssignmentPlan::default();
        let mut resolved: BTreeSet<(SubjectId, usize)> = BTreeSet::new();

        for subject in subjects {
            let Some(saved) = snapshot.subject(subject.id) else {
                continue;
            };
            for (index, remembered) in saved.devices.iter().enumerate() {
                let Some(guid) = remembered.precise_guid() else {
                    continue;
                };
                let Some(device) = movable.iter().find(|d| d.instance_guid == Some(guid)) else {
                    continue;
                };
                plan.history.record(device.id, remembered.session_id);
                plan.assign(subject.id, device.id, AssignmentSource::Precise);
                resolved.insert((subject.id, index));
            }
        }

        if !self.options.allow_imprecise {
            return plan;
        }

        for subject in subjects {
            let Some(saved) = snapshot.subject(subject.id) else {
                continue;
            };
            for (index, remembered) in saved.devices.iter().enumerate() {
                if resolved.contains(&(subject.id, index)) {
                    continue;
                }

                if let Some(device_id) = plan.history.device_for(remembered.session_id) {
                    plan.assign(subject.id, device_id, AssignmentSource::History);
                    continue;
                }

                if remembered.hardware_identifier.is_empty() {
                    continue;
                }
                let candidate = movable.iter().find(|d| {
                    d.hardware_identifier
                        .eq_ignore_ascii_case(&remembered.hardware_identifier)
                        && !plan.history.contains_device(d.id)
                });
                let Some(device) = candidate else {
                    tracing::debug!(
                        subject_id = subject.id,
                        hardware_identifier = %remembered.hardware_identifier,
                        "No unclaimed device matches remembered hardware"
                    );
                    continue;
                };
                plan.history.record(device.id, remembered.session_id);
                plan.assign(subject.id, device.id, AssignmentSource::Imprecise);
            }
        }

        plan
    }
}

fn auto_assign_residual(
    devices: &[ConnectedDevice],
    subjects: &mut [Subject],
    auto: &mut dyn AutoAssigner,
) -> Vec<AssignmentEvent> {
    let mut events = Vec::new();
    for device in devices.iter().filter(|d| d.kind.is_movable()) {
        if subjects.iter().any(|s| s.devices.contains(&device.id)) {
            continue;
        }
        let Some(subject_id) = auto.assign(device, subjects) else {
            continue;
        };
        let Some(subject) = subjects.iter_mut().find(|s| s.id == subject_id) else {
            tracing::warn!(subject_id, "Auto-assigner picked an unknown subject");
            continue;
        };
        if subject.assign_device(device.id) {
            events.push(AssignmentEvent {
                subject_id,
                device_id: device.id,
                source: AssignmentSource::Auto,
            });
        }
    }
    events
}

/// Restore keyboard and mouse ownership flags from a snapshot.
///
/// Only kinds whose flag is set are touched. Returns the number of subjects restored.
pub fn restore_fixed_devices(
    snapshot: &DeviceAssignmentSnapshot,
    subjects: &mut [Subject],
    keyboard: bool,
    mouse: bool,
) -> usize {
    let mut restored = 0;
    for subject in subjects.iter_mut() {
        let Some(saved) = snapshot.subject(subject.id) else {
            continue;
        };
        if keyboard {
            subject.has_keyboard = saved.has_keyboard;
        }
        if mouse {
            subject.has_mouse = saved.has_mouse;
        }
        if keyboard || mouse {
            restored += 1;
        }
    }
    restored
}

/// Single-shot deferred reconciliation.
///
/// The first movable-device connection after start schedules a run for the
/// host's next yield point, so devices arriving in a burst are reconciled
/// together. While a run is pending, further connections neither schedule
/// again nor save assignments.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeferredReconcile {
    pending: bool,
}

impl DeferredReconcile {
    /// Schedule a run. Returns false if one is already pending.
    pub fn schedule(&mut self) -> bool {
        if self.pending {
            return false;
        }
        self.pending = true;
        true
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Take the pending run, if any, clearing the flag.
    pub fn take(&mut self) -> bool {
        std::mem::take(&mut self.pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RememberedDevice, SubjectAssignment};
    use crate::test_utils::gamepad;
    use uuid::Uuid;

    fn remembered(guid: Option<Uuid>, hw: &str, session_id: DeviceId) -> RememberedDevice {
        RememberedDevice {
            instance_guid: guid,
            hardware_identifier: hw.to_string(),
            session_id,
        }
    }

    fn snapshot(entries: Vec<(SubjectId, Vec<RememberedDevice>)>) -> DeviceAssignmentSnapshot {
        DeviceAssignmentSnapshot {
            saved_at: None,
            subjects: entries
                .into_iter()
                .map(|(subject_id, devices)| SubjectAssignment {
                    subject_id,
                    has_keyboard: false,
                    has_mouse: false,
                    devices,
                })
                .collect(),
        }
    }

    fn subjects() -> Vec<Subject> {
        vec![Subject::new(1, "Player1"), Subject::new(2, "Player2")]
    }

    fn scenario_snapshot(g1: Uuid, g2: Uuid) -> DeviceAssignmentSnapshot {
        snapshot(vec![
            (1, vec![remembered(Some(g1), "XInput", 0)]),
            (2, vec![remembered(Some(g2), "XInput", 1)]),
        ])
    }

    // ==== Precise Pass Tests ====

    #[test]
    fn test_exact_instance_match() {
        let (g1, g2) = (Uuid::new_v4(), Uuid::new_v4());
        let devices = [gamepad(10, Some(g2)), gamepad(11, Some(g1))];
        let mut subjects = subjects();

        let report = DeviceReconciler::default().reconcile_snapshot(
            Some(&scenario_snapshot(g1, g2)),
            &devices,
            &mut subjects,
            &mut NoAutoAssign,
        );

        assert!(report.applied);
        assert_eq!(subjects[0].devices, vec![11]);
        assert_eq!(subjects[1].devices, vec![10]);
        assert_eq!(report.count(AssignmentSource::Precise), 2);
        assert_eq!(report.count(AssignmentSource::Imprecise), 0);
    }

    #[test]
    fn test_clear_removes_stale_ownership() {
        let (g1, g2) = (Uuid::new_v4(), Uuid::new_v4());
        let devices = [gamepad(10, Some(g1)), gamepad(11, Some(g2))];
        let mut subjects = subjects();
        subjects[1].assign_device(10);
        subjects[1].assign_device(11);

        DeviceReconciler::default().reconcile_snapshot(
            Some(&scenario_snapshot(g1, g2)),
            &devices,
            &mut subjects,
            &mut NoAutoAssign,
        );
        assert_eq!(subjects[0].devices, vec![10]);
        assert_eq!(subjects[1].devices, vec![11]);
    }

    #[test]
    fn test_nil_guid_never_matches_precisely() {
        let snap = snapshot(vec![(1, vec![remembered(Some(Uuid::nil()), "", 0)])]);
        let devices = [gamepad(10, Some(Uuid::nil()))];
        let mut subjects = subjects();
        let report = DeviceReconciler::default().reconcile_snapshot(
            Some(&snap),
            &devices,
            &mut subjects,
            &mut NoAutoAssign,
        );
        assert!(report.assignments.is_empty());
        assert!(subjects[0].devices.is_empty());
    }

    // ==== Imprecise Pass Tests ====

    #[test]
    fn test_hardware_match_gives_each_subject_its_own_device() {
        let (g1, g2) = (Uuid::new_v4(), Uuid::new_v4());
        let devices = [gamepad(20, Some(Uuid::new_v4())), gamepad(21, Some(Uuid::new_v4()))];
        let mut subjects = subjects();

        let report = DeviceReconciler::default().reconcile_snapshot(
            Some(&scenario_snapshot(g1, g2)),
            &devices,
            &mut subjects,
            &mut NoAutoAssign,
        );

        assert_eq!(report.count(AssignmentSource::Imprecise), 2);
        assert_eq!(subjects[0].devices.len(), 1);
        assert_eq!(subjects[1].devices.len(), 1);
        assert_ne!(subjects[0].devices, subjects[1].devices);
    }

    #[test]
    fn test_claimed_devices_are_not_matched_again() {
        let (g1, g2) = (Uuid::new_v4(), Uuid::new_v4());
        let snap = snapshot(vec![
            (1, vec![remembered(Some(g1), "XInput", 0)]),
            (2, vec![remembered(Some(g2), "XInput", 1)]),
            (3, vec![remembered(None, "XInput", 2)]),
        ]);
        let devices = [gamepad(20, None), gamepad(21, None)];
        let mut subjects = subjects();
        subjects.push(Subject::new(3, "Player3"));

        DeviceReconciler::default().reconcile_snapshot(Some(&snap), &devices, &mut subjects, &mut NoAutoAssign);
        assert_eq!(subjects[0].devices, vec![20]);
        assert_eq!(subjects[1].devices, vec![21]);
        assert!(subjects[2].devices.is_empty());
    }

    #[test]
    fn test_precise_claims_before_imprecise() {
        let g1 = Uuid::new_v4();
        // subject 1 only remembers hardware; subject 2 remembers device 31 exactly
        let snap = snapshot(vec![
            (1, vec![remembered(None, "XInput", 5)]),
            (2, vec![remembered(Some(g1), "XInput", 6)]),
        ]);
        let devices = [gamepad(31, Some(g1)), gamepad(32, None)];
        let mut subjects = subjects();

        DeviceReconciler::default().reconcile_snapshot(Some(&snap), &devices, &mut subjects, &mut NoAutoAssign);
        assert_eq!(subjects[0].devices, vec![32]);
        assert_eq!(subjects[1].devices, vec![31]);
    }

    #[test]
    fn test_shared_device_reused_through_history() {
        let snap = snapshot(vec![
            (1, vec![remembered(None, "XInput", 7)]),
            (2, vec![remembered(None, "XInput", 7)]),
        ]);
        let devices = [gamepad(40, None), gamepad(41, None)];
        let mut subjects = subjects();

        let report =
            DeviceReconciler::default().reconcile_snapshot(Some(&snap), &devices, &mut subjects, &mut NoAutoAssign);
        assert_eq!(subjects[0].devices, vec![40]);
        assert_eq!(subjects[1].devices, vec![40]);
        assert_eq!(report.count(AssignmentSource::History), 1);
    }

    #[test]
    fn test_hardware_match_ignores_ascii_case() {
        let snap = snapshot(vec![(1, vec![remembered(None, "xinput", 0)])]);
        let devices = [gamepad(50, None)];
        let mut subjects = subjects();
        DeviceReconciler::default().reconcile_snapshot(Some(&snap), &devices, &mut subjects, &mut NoAutoAssign);
        assert_eq!(subjects[0].devices, vec![50]);
    }

    #[test]
    fn test_imprecise_disabled_runs_precise_only() {
        let (g1, g2) = (Uuid::new_v4(), Uuid::new_v4());
        let devices = [gamepad(20, Some(g1)), gamepad(21, None)];
        let mut subjects = subjects();
        let reconciler = DeviceReconciler::new(ReconcileOptions {
            allow_imprecise: false,
            auto_assign: false,
        });
        reconciler.reconcile_snapshot(Some(&scenario_snapshot(g1, g2)), &devices, &mut subjects, &mut NoAutoAssign);
        assert_eq!(subjects[0].devices, vec![20]);
        assert!(subjects[1].devices.is_empty());
    }

    // ==== Run Semantics Tests ====

    #[test]
    fn test_repeated_runs_yield_same_mapping() {
        let (g1, g2) = (Uuid::new_v4(), Uuid::new_v4());
        let text = scenario_snapshot(g1, g2).to_json().unwrap();
        let devices = [
            gamepad(20, Some(Uuid::new_v4())),
            gamepad(21, Some(Uuid::new_v4())),
            gamepad(22, None),
        ];
        let mut subjects = subjects();
        let reconciler = DeviceReconciler::default();

        let first = reconciler.reconcile(Some(&text), &devices, &mut subjects, &mut FirstFreeSubject::default());
        let second = reconciler.reconcile(Some(&text), &devices, &mut subjects, &mut FirstFreeSubject::default());
        assert_eq!(first.mapping, second.mapping);
        assert_eq!(first.mapping[&1], vec![20]);
        assert_eq!(first.mapping[&2], vec![21]);
    }

    #[test]
    fn test_malformed_snapshot_changes_nothing() {
        let devices = [gamepad(20, None)];
        let mut subjects = subjects();
        subjects[1].assign_device(20);

        let report = DeviceReconciler::default().reconcile(
            Some("{\"subjects\": [{]"),
            &devices,
            &mut subjects,
            &mut FirstFreeSubject::default(),
        );
        assert!(!report.applied);
        assert_eq!(subjects[1].devices, vec![20]);
        assert!(subjects[0].devices.is_empty());
    }

    #[test]
    fn test_absent_snapshot_only_auto_assigns() {
        let devices = [gamepad(20, None), gamepad(21, None)];
        let mut subjects = subjects();
        subjects[1].assign_device(21);

        let report =
            DeviceReconciler::default().reconcile(None, &devices, &mut subjects, &mut FirstFreeSubject::default());
        assert!(report.applied);
        assert_eq!(subjects[0].devices, vec![20]);
        assert_eq!(subjects[1].devices, vec![21]);
        assert_eq!(report.count(AssignmentSource::Auto), 1);
    }

    #[test]
    fn test_no_movable_devices_is_a_no_op() {
        let mut subjects = subjects();
        let report = DeviceReconciler::default().reconcile(
            Some("{\"subjects\": []}"),
            &[crate::test_utils::keyboard()],
            &mut subjects,
            &mut FirstFreeSubject::default(),
        );
        assert!(!report.applied);
    }

    #[test]
    fn test_auto_assign_fills_free_subjects_in_order() {
        let devices = [gamepad(1, None), gamepad(2, None), gamepad(3, None)];
        let mut subjects = subjects();
        let report = DeviceReconciler::default().reconcile(
            Some("{\"subjects\": []}"),
            &devices,
            &mut subjects,
            &mut FirstFreeSubject::default(),
        );
        assert_eq!(report.mapping[&1], vec![1]);
        assert_eq!(report.mapping[&2], vec![2]);
        assert_eq!(report.count(AssignmentSource::Auto), 2);
    }

    #[test]
    fn test_plan_leaves_subjects_untouched() {
        let g1 = Uuid::new_v4();
        let snap = snapshot(vec![(1, vec![remembered(Some(g1), "XInput", 0)])]);
        let subjects = subjects();
        let plan = DeviceReconciler::default().plan(&snap, &[gamepad(9, Some(g1))], &subjects);
        assert_eq!(plan.devices[&1], vec![9]);
        assert_eq!(plan.history.device_for(0), Some(9));
        assert!(subjects[0].devices.is_empty());
    }

    // ==== History and Deferral Tests ====

    #[test]
    fn test_history_first_write_wins() {
        let mut history = AssignmentHistory::default();
        assert!(history.record(5, 1));
        assert!(!history.record(5, 2));
        assert_eq!(history.device_for(1), Some(5));
        assert_eq!(history.device_for(2), None);
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_deferred_reconcile_is_single_shot() {
        let mut deferred = DeferredReconcile::default();
        assert!(deferred.schedule());
        assert!(!deferred.schedule());
        assert!(deferred.is_pending());
        assert!(deferred.take());
        assert!(!deferred.take());
        assert!(deferred.schedule());
    }

    #[test]
    fn test_restore_fixed_devices_honors_flags() {
        let mut snap = snapshot(vec![(1, vec![]), (2, vec![])]);
        snap.subjects[0].has_keyboard = true;
        snap.subjects[1].has_mouse = true;
        let mut subjects = subjects();

        assert_eq!(restore_fixed_devices(&snap, &mut subjects, true, false), 2);
        assert!(subjects[0].has_keyboard);
        assert!(!subjects[1].has_mouse);

        restore_fixed_devices(&snap, &mut subjects, false, true);
        assert!(subjects[1].has_mouse);
    }
}
