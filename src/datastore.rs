//! The host-facing data store.
//!
//! `UserDataStore` owns the record store, the key codec and the engines, and
//! exposes the save/load operations and device events a host application
//! calls. The host keeps its own [`Roster`] and [`ActionUniverse`] and passes
//! them in on every call.
//!
//! Load order on start:
//! 1. device assignments, so devices are owned before their records load
//! 2. per subject: behaviors, keyboard, mouse, owned joysticks
//! 3. calibration of every joystick
//!
//! Every operation is a no-op with a warning while the store is disabled.

use crate::codec::{BindingCodec, JsonCodec};
use crate::config::{SaveMode, StoreSettings};
use crate::keys::{self, BINDING_KEY_VERSION, KeyCodec, KeyDescriptor, MapKey, RecordKey};
use crate::merge::{ConflictPolicy, SameElementConflict, merge_new_identifiers};
use crate::models::{
    BindingRecord, ConnectedDevice, DeviceAssignmentSnapshot, DeviceCatalog, DeviceId,
    DeviceIdentifier, DeviceKind, DeviceRef, Roster, Subject, SubjectId,
};
use crate::reconcile::{
    AutoAssigner, DeferredReconcile, DeviceReconciler, FirstFreeSubject, ReconcileOptions,
    ReconcileReport, restore_fixed_devices,
};
use crate::role;
use crate::store::RecordStore;
use crate::universe::{ActionIdCache, ActionUniverse, parse_known_ids};
use crate::{Error, Result};

/// Persists subjects' bindings, behaviors, calibration and device assignments.
pub struct UserDataStore {
    settings: StoreSettings,
    keys: KeyCodec,
    store: Box<dyn RecordStore>,
    codec: Box<dyn BindingCodec>,
    conflict: Box<dyn ConflictPolicy>,
    auto: Box<dyn AutoAssigner>,
    action_ids: ActionIdCache,
    deferred: DeferredReconcile,
    device_ever_detected: bool,
}

impl UserDataStore {
    /// Create a data store over `store`.
    ///
    /// Fails when the configured key prefix is invalid.
    pub fn new(settings: StoreSettings, store: Box<dyn RecordStore>) -> Result<Self> {
        let keys = KeyCodec::new(settings.key_prefix.clone())?;
        Ok(Self {
            settings,
            keys,
            store,
            codec: Box::new(JsonCodec),
            conflict: Box::new(SameElementConflict),
            auto: Box::new(FirstFreeSubject::default()),
            action_ids: ActionIdCache::new(),
            deferred: DeferredReconcile::default(),
            device_ever_detected: false,
        })
    }

    pub fn with_codec(mut self, codec: Box<dyn BindingCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_conflict_policy(mut self, conflict: Box<dyn ConflictPolicy>) -> Self {
        self.conflict = conflict;
        self
    }

    pub fn with_auto_assigner(mut self, auto: Box<dyn AutoAssigner>) -> Self {
        self.auto = auto;
        self
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    pub fn keys(&self) -> &KeyCodec {
        &self.keys
    }

    pub fn store(&self) -> &dyn RecordStore {
        self.store.as_ref()
    }

    pub fn store_mut(&mut self) -> &mut dyn RecordStore {
        self.store.as_mut()
    }

    /// Whether a deferred reconciliation is waiting for [`run_deferred`](Self::run_deferred).
    pub fn is_reconcile_pending(&self) -> bool {
        self.deferred.is_pending()
    }

    /// Drop the memoized action ids. Call after the host redefines its actions.
    pub fn invalidate_action_cache(&mut self) {
        self.action_ids.invalidate();
    }

    // ---- Whole-session operations ----

    /// Load assignments, then every subject's data, then joystick calibration.
    ///
    /// Returns the number of records applied.
    pub fn load_all(&mut self, roster: &mut Roster, universe: &dyn ActionUniverse) -> Result<usize> {
        if !self.check_enabled("load_all") {
            return Ok(0);
        }

        let mut count = 0;
        if self.assignments_enabled() {
            let loaded = self.load_assignments_now(roster);
            if isolate(loaded, "device assignments")?.is_some() {
                count += 1;
            }
        }

        let subject_ids: Vec<SubjectId> = roster.subjects.iter().map(|s| s.id).collect();
        for id in subject_ids {
            count += self.load_subject_now(roster, id, universe)?;
        }
        count += self.load_all_calibrations(roster)?;

        tracing::info!(records = count, "Loaded all data");
        Ok(count)
    }

    /// Save every subject, joystick calibration and the device assignments, then flush.
    pub fn save_all(&mut self, roster: &mut Roster, universe: &dyn ActionUniverse) -> Result<usize> {
        if !self.check_enabled("save_all") {
            return Ok(0);
        }

        let subject_ids: Vec<SubjectId> = roster.subjects.iter().map(|s| s.id).collect();
        let saved = self.save_all_now(roster, &subject_ids, universe);
        self.store.flush()?;
        let count = saved?;

        for id in subject_ids {
            self.after_subject_saved(roster, id, universe)?;
        }

        tracing::info!(records = count, "Saved all data");
        Ok(count)
    }

    // ---- Subjects ----

    /// Load a subject's behaviors and the records of every device it uses.
    pub fn load_subject(
        &mut self,
        roster: &mut Roster,
        subject_id: SubjectId,
        universe: &dyn ActionUniverse,
    ) -> Result<usize> {
        if !self.check_enabled("load_subject") {
            return Ok(0);
        }
        self.load_subject_now(roster, subject_id, universe)
    }

    /// Save a subject's behaviors and binding records, then flush.
    pub fn save_subject(
        &mut self,
        roster: &mut Roster,
        subject_id: SubjectId,
        universe: &dyn ActionUniverse,
    ) -> Result<usize> {
        if !self.check_enabled("save_subject") {
            return Ok(0);
        }
        let saved = self.save_subject_now(roster, subject_id, universe);
        self.store.flush()?;
        let count = saved?;
        self.after_subject_saved(roster, subject_id, universe)?;
        Ok(count)
    }

    // ---- Devices ----

    /// Load a subject's records for one device, plus the device's calibration.
    pub fn load_device_data(
        &mut self,
        roster: &mut Roster,
        subject_id: SubjectId,
        device: DeviceRef,
        universe: &dyn ActionUniverse,
    ) -> Result<usize> {
        if !self.check_enabled("load_device_data") {
            return Ok(0);
        }
        let mut count = self.load_device_maps(roster, subject_id, device, universe)?;
        if device.kind == DeviceKind::Joystick {
            let loaded = self.load_calibration_now(roster, device.id);
            count += isolate(loaded, "calibration")?.unwrap_or(0);
        }
        Ok(count)
    }

    /// Save a subject's records for one device, plus the device's calibration, then flush.
    pub fn save_device_data(
        &mut self,
        roster: &Roster,
        subject_id: SubjectId,
        device: DeviceRef,
        universe: &dyn ActionUniverse,
    ) -> Result<usize> {
        if !self.check_enabled("save_device_data") {
            return Ok(0);
        }
        let saved = self.save_device_maps(roster, subject_id, &[device], universe);
        let calibration = if device.kind == DeviceKind::Joystick {
            isolate(self.save_calibration_now(roster, device.id), "calibration")
        } else {
            Ok(None)
        };
        self.store.flush()?;
        Ok(saved? + calibration?.unwrap_or(0))
    }

    // ---- Calibration ----

    pub fn load_calibration(&mut self, roster: &mut Roster, device_id: DeviceId) -> Result<usize> {
        if !self.check_enabled("load_calibration") {
            return Ok(0);
        }
        self.load_calibration_now(roster, device_id)
    }

    pub fn save_calibration(&mut self, roster: &Roster, device_id: DeviceId) -> Result<usize> {
        if !self.check_enabled("save_calibration") {
            return Ok(0);
        }
        let count = self.save_calibration_now(roster, device_id)?;
        self.store.flush()?;
        Ok(count)
    }

    // ---- Behaviors ----

    /// Load one behavior into the subject's existing behavior record.
    pub fn load_behavior(
        &mut self,
        roster: &mut Roster,
        subject_id: SubjectId,
        behavior_id: i32,
    ) -> Result<usize> {
        if !self.check_enabled("load_behavior") {
            return Ok(0);
        }
        let Some(subject) = roster.subject_mut(subject_id) else {
            return Ok(0);
        };
        self.load_behavior_now(subject, behavior_id)
    }

    pub fn save_behavior(
        &mut self,
        roster: &Roster,
        subject_id: SubjectId,
        behavior_id: i32,
    ) -> Result<usize> {
        if !self.check_enabled("save_behavior") {
            return Ok(0);
        }
        let Some(subject) = roster.subject(subject_id) else {
            return Ok(0);
        };
        let count = self.save_behavior_now(subject, behavior_id)?;
        self.store.flush()?;
        Ok(count)
    }

    // ---- Assignments ----

    /// Snapshot which subject owns which device and persist it.
    pub fn save_assignments(&mut self, roster: &Roster) -> Result<()> {
        if !self.check_enabled("save_assignments") {
            return Ok(());
        }
        self.save_assignments_now(roster)
    }

    /// Restore device ownership from the saved snapshot.
    pub fn load_assignments(&mut self, roster: &mut Roster) -> Result<ReconcileReport> {
        if !self.check_enabled("load_assignments") {
            return Ok(ReconcileReport::unchanged());
        }
        self.load_assignments_now(roster)
    }

    // ---- Events ----

    /// Called once when the host starts.
    pub fn on_start(&mut self, roster: &mut Roster, universe: &dyn ActionUniverse) -> Result<usize> {
        if !self.check_enabled("on_start") {
            return Ok(0);
        }

        let mut count = 0;
        if self.settings.load_on_start {
            count = self.load_all(roster, universe)?;
        }

        if self.settings.load_joystick_assignments && roster.has_movable_devices() {
            self.device_ever_detected = true;
            self.save_assignments_now(roster)?;
        }
        Ok(count)
    }

    /// Called after the host enumerates a new device.
    ///
    /// The first movable device seen after start triggers reconciliation,
    /// either right away or deferred to [`run_deferred`](Self::run_deferred).
    pub fn on_device_connected(
        &mut self,
        roster: &mut Roster,
        device: ConnectedDevice,
        universe: &dyn ActionUniverse,
    ) -> Result<usize> {
        if !self.check_enabled("on_device_connected") {
            return Ok(0);
        }

        let device_ref = device.device_ref();
        let movable = device.kind.is_movable();
        roster.connect(device);
        if !movable {
            return Ok(0);
        }

        let mut reconciled = false;
        if self.settings.load_on_start
            && self.settings.load_joystick_assignments
            && !self.device_ever_detected
        {
            if self.settings.defer_first_reconcile {
                if self.deferred.schedule() {
                    tracing::debug!(device = device_ref.id, "Deferring device reconciliation");
                }
            } else {
                let loaded = self.load_assignments_now(roster);
                reconciled = isolate(loaded, "device assignments")?.is_some();
            }
        }
        if !reconciled && !self.deferred.is_pending() && self.settings.auto_assign_devices {
            self.auto_assign_if_unowned(roster, device_ref);
        }

        let count = self.load_joystick_data(roster, device_ref.id, universe)?;

        if self.settings.load_joystick_assignments && !self.deferred.is_pending() {
            self.save_assignments_now(roster)?;
        }
        self.device_ever_detected = true;
        Ok(count)
    }

    /// Called while a device is still enumerable but about to go away.
    pub fn on_device_disconnecting(
        &mut self,
        roster: &Roster,
        device: DeviceRef,
        universe: &dyn ActionUniverse,
    ) -> Result<usize> {
        if !self.check_enabled("on_device_disconnecting") {
            return Ok(0);
        }
        if device.kind != DeviceKind::Joystick {
            return Ok(0);
        }

        let owners: Vec<SubjectId> = roster
            .subjects
            .iter()
            .filter(|s| s.owns(device))
            .map(|s| s.id)
            .collect();
        let mut saved: Result<usize> = Ok(0);
        for subject_id in owners {
            saved = saved.and_then(|count| {
                Ok(count + self.save_device_maps(roster, subject_id, &[device], universe)?)
            });
        }
        let calibration = isolate(self.save_calibration_now(roster, device.id), "calibration");
        self.store.flush()?;
        Ok(saved? + calibration?.unwrap_or(0))
    }

    /// Called after a device is gone.
    pub fn on_device_disconnected(&mut self, roster: &mut Roster, device: DeviceRef) -> Result<()> {
        if !self.check_enabled("on_device_disconnected") {
            return Ok(());
        }
        roster.disconnect(device.kind, device.id);
        if self.settings.load_joystick_assignments {
            self.save_assignments_now(roster)?;
        }
        Ok(())
    }

    /// Run a pending deferred reconciliation.
    ///
    /// Returns `None` when nothing was pending.
    pub fn run_deferred(
        &mut self,
        roster: &mut Roster,
        universe: &dyn ActionUniverse,
    ) -> Result<Option<ReconcileReport>> {
        if !self.check_enabled("run_deferred") {
            return Ok(None);
        }
        if !self.deferred.is_pending() {
            return Ok(None);
        }

        let report = self.load_assignments_now(roster);
        // the flag is cleared even when the run failed
        self.deferred.take();
        let report = report?;

        let joysticks: Vec<DeviceId> = roster
            .devices
            .iter()
            .filter(|d| d.kind.is_movable())
            .map(|d| d.id)
            .collect();
        for id in joysticks {
            self.load_joystick_data(roster, id, universe)?;
        }

        self.save_assignments_now(roster)?;
        Ok(Some(report))
    }

    // ---- Internals ----

    fn check_enabled(&self, operation: &str) -> bool {
        if !self.settings.enabled {
            tracing::warn!(operation, "Data store is disabled, ignoring call");
        }
        self.settings.enabled
    }

    fn assignments_enabled(&self) -> bool {
        self.settings.load_joystick_assignments
            || self.settings.load_keyboard_assignments
            || self.settings.load_mouse_assignments
    }

    fn role_mode(&self) -> bool {
        self.settings.save_mode == SaveMode::ByRole
    }

    fn load_subject_now(
        &mut self,
        roster: &mut Roster,
        subject_id: SubjectId,
        universe: &dyn ActionUniverse,
    ) -> Result<usize> {
        let Some(subject) = roster.subject_mut(subject_id) else {
            tracing::debug!(subject_id, "No such subject");
            return Ok(0);
        };

        let behavior_ids: Vec<i32> = subject.behaviors.iter().map(|b| b.id).collect();
        let mut count = 0;
        for behavior_id in behavior_ids {
            let loaded = self.load_behavior_now(subject, behavior_id);
            count += isolate(loaded, "behavior")?.unwrap_or(0);
        }

        let Some(subject) = roster.subject(subject_id) else {
            return Ok(count);
        };
        let devices: Vec<DeviceRef> = roster.devices_of(subject).iter().map(|d| d.device_ref()).collect();
        for device in devices {
            count += self.load_device_maps(roster, subject_id, device, universe)?;
        }
        Ok(count)
    }

    /// Save every subject, joystick calibration and the device assignments, without flushing.
    fn save_all_now(
        &mut self,
        roster: &Roster,
        subject_ids: &[SubjectId],
        universe: &dyn ActionUniverse,
    ) -> Result<usize> {
        let mut count = 0;
        for id in subject_ids {
            count += self.save_subject_now(roster, *id, universe)?;
        }
        count += self.save_all_calibrations(roster)?;
        if self.assignments_enabled() {
            let saved = self.save_assignments_now(roster);
            if isolate(saved, "device assignments")?.is_some() {
                count += 1;
            }
        }
        Ok(count)
    }

    fn save_subject_now(
        &mut self,
        roster: &Roster,
        subject_id: SubjectId,
        universe: &dyn ActionUniverse,
    ) -> Result<usize> {
        let Some(subject) = roster.subject(subject_id) else {
            tracing::debug!(subject_id, "No such subject");
            return Ok(0);
        };

        let mut count = 0;
        for behavior in &subject.behaviors {
            let saved = self.save_behavior_now(subject, behavior.id);
            count += isolate(saved, "behavior")?.unwrap_or(0);
        }
        let devices: Vec<DeviceRef> = roster.devices_of(subject).iter().map(|d| d.device_ref()).collect();
        count += self.save_device_maps(roster, subject_id, &devices, universe)?;
        Ok(count)
    }

    /// In role mode, reload the joystick records of a subject owning several
    /// joysticks so an edit saved from one shows up on the others.
    fn after_subject_saved(
        &mut self,
        roster: &mut Roster,
        subject_id: SubjectId,
        universe: &dyn ActionUniverse,
    ) -> Result<()> {
        if !self.role_mode() {
            return Ok(());
        }
        let Some(subject) = roster.subject(subject_id) else {
            return Ok(());
        };
        let joysticks: Vec<DeviceRef> = roster
            .owned_devices(subject)
            .iter()
            .map(|d| d.device_ref())
            .collect();
        if joysticks.len() < 2 {
            return Ok(());
        }
        for device in joysticks {
            self.load_device_maps(roster, subject_id, device, universe)?;
        }
        tracing::debug!(subject_id, "Mirrored role bindings across joysticks");
        Ok(())
    }

    /// Load maps of every subject owning a joystick, plus its calibration.
    fn load_joystick_data(
        &mut self,
        roster: &mut Roster,
        device_id: DeviceId,
        universe: &dyn ActionUniverse,
    ) -> Result<usize> {
        let device = DeviceRef::new(DeviceKind::Joystick, device_id);
        let owners: Vec<SubjectId> = roster
            .subjects
            .iter()
            .filter(|s| s.owns(device))
            .map(|s| s.id)
            .collect();
        let mut count = 0;
        for subject_id in owners {
            count += self.load_device_maps(roster, subject_id, device, universe)?;
        }
        count += self.load_calibration_now(roster, device_id)?;
        Ok(count)
    }

    fn load_device_maps(
        &mut self,
        roster: &mut Roster,
        subject_id: SubjectId,
        device: DeviceRef,
        universe: &dyn ActionUniverse,
    ) -> Result<usize> {
        let Some(target) = roster.find_device(device).cloned() else {
            tracing::debug!(device = device.id, kind = %device.kind, "Device not connected");
            return Ok(0);
        };
        let Some(subject) = roster.subject(subject_id) else {
            return Ok(0);
        };
        let name = subject.name.clone();
        let identifier = target.identifier();
        let duplicate = duplicate_index_of(roster, subject, &identifier);
        let role_mode = self.role_mode();

        let mut loaded = Vec::new();
        for category in universe.categories().iter().filter(|c| c.user_assignable) {
            for layout_id in universe.layouts(target.kind) {
                let slot = MapSlot {
                    subject: &name,
                    identifier: &identifier,
                    duplicate,
                    category_id: category.id,
                    layout_id,
                };
                let record = if role_mode {
                    let current = roster
                        .subject(subject_id)
                        .and_then(|s| s.map(device, category.id, layout_id));
                    self.load_role_mapped_record(&slot, &target, current, universe)
                } else {
                    self.load_binding_record(&slot, universe)
                };
                if let Some(record) = isolate(record, "binding")?.flatten() {
                    loaded.push(record);
                }
            }
        }

        let count = loaded.len();
        if let Some(subject) = roster.subject_mut(subject_id) {
            for record in loaded {
                subject.set_map(device, record);
            }
        }
        if count > 0 {
            tracing::debug!(subject = %name, device = device.id, records = count, "Loaded binding records");
        }
        Ok(count)
    }

    /// Read one binding record and merge in defaults for actions added since it was saved.
    fn load_binding_record(
        &mut self,
        slot: &MapSlot<'_>,
        universe: &dyn ActionUniverse,
    ) -> Result<Option<BindingRecord>> {
        let parts = slot.map_key();
        let Some((key, version)) = self.find_existing(&KeyDescriptor::Binding(parts))? else {
            return Ok(None);
        };
        let Some(text) = self.store.get_string(key.as_str())?.filter(|t| !t.is_empty()) else {
            return Ok(None);
        };
        let mut record = match self.codec.decode_record(&text) {
            Ok(record) => record,
            Err(Error::Parse(msg)) => {
                tracing::warn!(key = %key, error = %msg, "Ignoring malformed binding record");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        record.device_kind = slot.identifier.kind;
        record.category_id = slot.category_id;
        record.layout_id = slot.layout_id;
        if version < BINDING_KEY_VERSION {
            tracing::debug!(key = %key, version, "Loaded record saved under an older key version");
        }

        let known = self.load_known_ids(&KeyDescriptor::KnownActionIds(parts))?;
        let universe_ids = self.action_ids.ids(universe).to_vec();
        let defaults = universe.default_record(slot.identifier, slot.category_id, slot.layout_id);
        let outcome = merge_new_identifiers(
            &mut record,
            known.as_deref(),
            &universe_ids,
            defaults.as_ref(),
            self.conflict.as_ref(),
        );
        if outcome.added_count() > 0 {
            tracing::info!(key = %key, added = outcome.added_count(), "Added default bindings for new actions");
        }
        Ok(Some(record))
    }

    /// Load a record in role mode: the saved record (or the subject's current
    /// one) with the subject's role records overlaid.
    fn load_role_mapped_record(
        &mut self,
        slot: &MapSlot<'_>,
        target: &ConnectedDevice,
        current: Option<&BindingRecord>,
        universe: &dyn ActionUniverse,
    ) -> Result<Option<BindingRecord>> {
        let roles = role::load_role_records(
            self.store.as_ref(),
            &self.keys,
            self.codec.as_ref(),
            slot.subject,
            target,
            slot.category_id,
            slot.layout_id,
        )?;

        let saved = self.load_binding_record(slot, universe)?;
        let from_store = saved.is_some();
        let mut record = match (saved, current) {
            (Some(record), _) => record,
            (None, Some(current)) => current.clone(),
            (None, None) if roles.is_empty() => return Ok(None),
            (None, None) => BindingRecord::new(target.kind, slot.category_id, slot.layout_id),
        };

        let outcome = role::reconstitute(&mut record, &roles, target);
        if from_store || outcome.changed() {
            Ok(Some(record))
        } else {
            Ok(None)
        }
    }

    /// Save a subject's records for `devices`.
    ///
    /// In role mode records are written oldest to newest across all devices,
    /// so the role records of the newest edit win.
    fn save_device_maps(
        &mut self,
        roster: &Roster,
        subject_id: SubjectId,
        devices: &[DeviceRef],
        universe: &dyn ActionUniverse,
    ) -> Result<usize> {
        let Some(subject) = roster.subject(subject_id) else {
            return Ok(0);
        };

        let assignable: Vec<i32> = universe
            .categories()
            .iter()
            .filter(|c| c.user_assignable)
            .map(|c| c.id)
            .collect();
        let mut records: Vec<(&ConnectedDevice, &BindingRecord)> = Vec::new();
        for device in devices {
            let Some(target) = roster.find_device(*device) else {
                tracing::debug!(device = device.id, kind = %device.kind, "Device not connected, nothing to save");
                continue;
            };
            if !subject.owns(*device) {
                continue;
            }
            records.extend(
                subject
                    .maps_for(*device)
                    .iter()
                    .filter(|r| assignable.contains(&r.category_id))
                    .map(|r| (target, r)),
            );
        }
        if self.role_mode() {
            records.sort_by_key(|(_, r)| r.modified_at);
        }

        let mut count = 0;
        for (target, record) in records {
            let identifier = target.identifier();
            let slot = MapSlot {
                subject: &subject.name,
                identifier: &identifier,
                duplicate: duplicate_index_of(roster, subject, &identifier),
                category_id: record.category_id,
                layout_id: record.layout_id,
            };
            let saved = self.save_binding_record(&slot, record, target, universe);
            if isolate(saved, "binding")?.is_some() {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Write a record, its known-ids snapshot and, in role mode, its role records.
    fn save_binding_record(
        &mut self,
        slot: &MapSlot<'_>,
        record: &BindingRecord,
        target: &ConnectedDevice,
        universe: &dyn ActionUniverse,
    ) -> Result<()> {
        let parts = slot.map_key();
        let key = self.keys.current_key(&KeyDescriptor::Binding(parts))?;
        let body = self.codec.encode_record(record)?;
        self.store.set_string(key.as_str(), &body)?;

        let known_key = self.keys.current_key(&KeyDescriptor::KnownActionIds(parts))?;
        let known = self.action_ids.joined(universe).to_string();
        self.store.set_string(known_key.as_str(), &known)?;

        if self.role_mode() {
            let roles = role::split_by_role(record, target);
            role::save_role_records(
                self.store.as_mut(),
                &self.keys,
                self.codec.as_ref(),
                slot.subject,
                slot.category_id,
                slot.layout_id,
                &roles,
            )?;
        }
        Ok(())
    }

    fn load_known_ids(&self, descriptor: &KeyDescriptor<'_>) -> Result<Option<Vec<i32>>> {
        let Some((key, _)) = self.find_existing(descriptor)? else {
            return Ok(None);
        };
        Ok(self
            .store
            .get_string(key.as_str())?
            .map(|text| parse_known_ids(&text)))
    }

    fn find_existing(&self, descriptor: &KeyDescriptor<'_>) -> Result<Option<(RecordKey, u32)>> {
        let store = self.store.as_ref();
        self.keys
            .find_existing(descriptor, descriptor.current_version(), |key| {
                store.exists(key.as_str())
            })
    }

    fn load_all_calibrations(&mut self, roster: &mut Roster) -> Result<usize> {
        let joysticks: Vec<DeviceId> = roster
            .devices
            .iter()
            .filter(|d| d.kind == DeviceKind::Joystick)
            .map(|d| d.id)
            .collect();
        let mut count = 0;
        for id in joysticks {
            let loaded = self.load_calibration_now(roster, id);
            count += isolate(loaded, "calibration")?.unwrap_or(0);
        }
        Ok(count)
    }

    fn save_all_calibrations(&mut self, roster: &Roster) -> Result<usize> {
        let mut count = 0;
        for device in roster.devices.iter().filter(|d| d.kind == DeviceKind::Joystick) {
            let saved = self.save_calibration_now(roster, device.id);
            count += isolate(saved, "calibration")?.unwrap_or(0);
        }
        Ok(count)
    }

    fn load_calibration_now(&mut self, roster: &mut Roster, device_id: DeviceId) -> Result<usize> {
        let Some(device) = roster.find_device(DeviceRef::new(DeviceKind::Joystick, device_id)) else {
            return Ok(0);
        };
        let identifier = device.identifier();
        let key = self.keys.current_key(&KeyDescriptor::Calibration(&identifier))?;
        match self.store.get_string(key.as_str())? {
            Some(text) if !text.is_empty() => {
                roster.calibrations.insert(device_id, text);
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    fn save_calibration_now(&mut self, roster: &Roster, device_id: DeviceId) -> Result<usize> {
        let Some(device) = roster.find_device(DeviceRef::new(DeviceKind::Joystick, device_id)) else {
            return Ok(0);
        };
        let Some(calibration) = roster.calibrations.get(&device_id) else {
            return Ok(0);
        };
        let identifier = device.identifier();
        let key = self.keys.current_key(&KeyDescriptor::Calibration(&identifier))?;
        self.store.set_string(key.as_str(), calibration)?;
        Ok(1)
    }

    fn load_behavior_now(&mut self, subject: &mut Subject, behavior_id: i32) -> Result<usize> {
        let key = self.keys.current_key(&KeyDescriptor::Behavior {
            subject: &subject.name,
            behavior_id,
        })?;
        let Some(text) = self.store.get_string(key.as_str())?.filter(|t| !t.is_empty()) else {
            return Ok(0);
        };
        match subject.behavior_mut(behavior_id) {
            Some(behavior) => {
                behavior.data = text;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    fn save_behavior_now(&mut self, subject: &Subject, behavior_id: i32) -> Result<usize> {
        let Some(behavior) = subject.behaviors.iter().find(|b| b.id == behavior_id) else {
            return Ok(0);
        };
        let key = self.keys.current_key(&KeyDescriptor::Behavior {
            subject: &subject.name,
            behavior_id,
        })?;
        self.store.set_string(key.as_str(), &behavior.data)?;
        Ok(1)
    }

    fn save_assignments_now(&mut self, roster: &Roster) -> Result<()> {
        let snapshot = DeviceAssignmentSnapshot::capture(&roster.subjects, &roster.devices);
        let key = self.keys.current_key(&KeyDescriptor::Assignments)?;
        self.store.set_string(key.as_str(), &snapshot.to_json()?)?;
        self.store.flush()?;
        tracing::debug!(subjects = snapshot.subjects.len(), "Saved device assignments");
        Ok(())
    }

    fn load_assignments_now(&mut self, roster: &mut Roster) -> Result<ReconcileReport> {
        let key = self.keys.current_key(&KeyDescriptor::Assignments)?;
        let text = self.store.get_string(key.as_str())?;

        let keyboard = self.settings.load_keyboard_assignments;
        let mouse = self.settings.load_mouse_assignments;
        if keyboard || mouse {
            if let Some(snapshot) = text
                .as_deref()
                .filter(|t| !t.trim().is_empty())
                .and_then(|t| DeviceAssignmentSnapshot::from_json(t).ok())
            {
                let restored = restore_fixed_devices(&snapshot, &mut roster.subjects, keyboard, mouse);
                tracing::debug!(subjects = restored, "Restored keyboard and mouse assignments");
            }
        }

        if !self.settings.load_joystick_assignments {
            return Ok(ReconcileReport::unchanged());
        }
        let reconciler = DeviceReconciler::new(ReconcileOptions {
            allow_imprecise: self.settings.allow_imprecise_matching,
            auto_assign: self.settings.auto_assign_devices,
        });
        let devices = roster.movable_devices();
        Ok(reconciler.reconcile(
            text.as_deref(),
            &devices,
            &mut roster.subjects,
            self.auto.as_mut(),
        ))
    }

    fn auto_assign_if_unowned(&mut self, roster: &mut Roster, device: DeviceRef) {
        if roster.subjects.iter().any(|s| s.owns(device)) {
            return;
        }
        let Some(connected) = roster.find_device(device) else {
            return;
        };
        if let Some(subject_id) = self.auto.assign(connected, &roster.subjects) {
            if let Some(subject) = roster.subject_mut(subject_id) {
                subject.assign_device(device.id);
                tracing::debug!(subject_id, device = device.id, "Auto-assigned device");
            }
        }
    }
}

/// Identity of one binding record slot.
struct MapSlot<'a> {
    subject: &'a str,
    identifier: &'a DeviceIdentifier,
    duplicate: u32,
    category_id: i32,
    layout_id: i32,
}

impl<'a> MapSlot<'a> {
    fn map_key(&self) -> MapKey<'a> {
        MapKey {
            subject: self.subject,
            device: self.identifier,
            category_id: self.category_id,
            layout_id: self.layout_id,
            duplicate_index: self.duplicate,
        }
    }
}

fn duplicate_index_of(roster: &Roster, subject: &Subject, identifier: &DeviceIdentifier) -> u32 {
    if !identifier.kind.is_movable() {
        return 0;
    }
    let owned: Vec<DeviceIdentifier> = roster
        .owned_devices(subject)
        .iter()
        .map(|d| d.identifier())
        .collect();
    keys::duplicate_index(&owned, identifier)
}

/// Keep a batch going past a failed record. Invalid descriptors still propagate.
fn isolate<T>(result: Result<T>, record: &str) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e @ Error::InvalidDescriptor(_)) => Err(e),
        Err(e) => {
            tracing::warn!(record, error = %e, "Skipping record after error");
            Ok(None)
        }
    }
}
