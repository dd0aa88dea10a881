//! The host's action universe and the cached list of known action ids.

use crate::models::{ActionId, BindingRecord, DeviceIdentifier, DeviceKind, MapCategory};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Everything the host application defines about actions and default bindings.
pub trait ActionUniverse {
    /// Every action id currently defined, in definition order.
    fn action_ids(&self) -> Vec<ActionId>;

    /// Map categories. Only user-assignable ones are persisted.
    fn categories(&self) -> Vec<MapCategory>;

    /// Layout ids defined for a device kind.
    fn layouts(&self, kind: DeviceKind) -> Vec<i32>;

    /// Factory default bindings for a device, category and layout.
    fn default_record(
        &self,
        device: &DeviceIdentifier,
        category_id: i32,
        layout_id: i32,
    ) -> Option<BindingRecord>;
}

/// An action universe defined up front, for hosts without a dynamic catalog.
///
/// Hardware-specific defaults take precedence over per-kind defaults.
#[derive(Debug, Clone, Default)]
pub struct StaticUniverse {
    actions: Vec<ActionId>,
    categories: Vec<MapCategory>,
    layouts: BTreeMap<DeviceKind, Vec<i32>>,
    kind_defaults: BTreeMap<(DeviceKind, i32, i32), BindingRecord>,
    hardware_defaults: BTreeMap<(Uuid, i32, i32), BindingRecord>,
}

impl StaticUniverse {
    pub fn new(actions: impl IntoIterator<Item = ActionId>) -> Self {
        Self {
            actions: actions.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn with_category(mut self, id: i32, name: &str, user_assignable: bool) -> Self {
        self.categories.push(MapCategory {
            id,
            name: name.to_string(),
            user_assignable,
        });
        self
    }

    pub fn with_layouts(mut self, kind: DeviceKind, layouts: Vec<i32>) -> Self {
        self.layouts.insert(kind, layouts);
        self
    }

    /// Register defaults used for every device of `record.device_kind`.
    pub fn with_default(mut self, record: BindingRecord) -> Self {
        self.kind_defaults.insert(
            (record.device_kind, record.category_id, record.layout_id),
            record,
        );
        self
    }

    /// Register defaults for one recognized hardware type.
    pub fn with_hardware_default(mut self, hardware_type: Uuid, record: BindingRecord) -> Self {
        self.hardware_defaults
            .insert((hardware_type, record.category_id, record.layout_id), record);
        self
    }

    /// Define a new action, as a later release of the host would.
    pub fn add_action(&mut self, id: ActionId) {
        if !self.actions.contains(&id) {
            self.actions.push(id);
        }
    }
}

impl ActionUniverse for StaticUniverse {
    fn action_ids(&self) -> Vec<ActionId> {
        self.actions.clone()
    }

    fn categories(&self) -> Vec<MapCategory> {
        if self.categories.is_empty() {
            return vec![MapCategory {
                id: 0,
                name: "Default".to_string(),
                user_assignable: true,
            }];
        }
        self.categories.clone()
    }

    fn layouts(&self, kind: DeviceKind) -> Vec<i32> {
        self.layouts.get(&kind).cloned().unwrap_or_else(|| vec![0])
    }

    fn default_record(
        &self,
        device: &DeviceIdentifier,
        category_id: i32,
        layout_id: i32,
    ) -> Option<BindingRecord> {
        if device.is_recognized() {
            if let Some(record) = self.hardware_defaults.get(&(
                device.hardware_type_guid,
                category_id,
                layout_id,
            )) {
                return Some(record.clone());
            }
        }
        self.kind_defaults
            .get(&(device.kind, category_id, layout_id))
            .cloned()
    }
}

#[derive(Debug, Clone)]
struct CachedIds {
    ids: Vec<ActionId>,
    joined: String,
}

/// Memoized action ids, both as a list and as the comma-joined form saved
/// next to each binding record.
///
/// Call `invalidate` whenever the host redefines its actions.
#[derive(Debug, Clone, Default)]
pub struct ActionIdCache {
    cached: Option<CachedIds>,
}

impl ActionIdCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids(&mut self, universe: &dyn ActionUniverse) -> &[ActionId] {
        &self.load(universe).ids
    }

    pub fn joined(&mut self, universe: &dyn ActionUniverse) -> &str {
        &self.load(universe).joined
    }

    pub fn invalidate(&mut self) {
        self.cached = None;
    }

    pub fn is_cached(&self) -> bool {
        self.cached.is_some()
    }

    fn load(&mut self, universe: &dyn ActionUniverse) -> &CachedIds {
        self.cached.get_or_insert_with(|| {
            let ids = universe.action_ids();
            let joined = encode_known_ids(&ids);
            CachedIds { ids, joined }
        })
    }
}

/// Join action ids with commas.
pub fn encode_known_ids(ids: &[ActionId]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Parse a comma-joined id list, skipping pieces that are not integers.
pub fn parse_known_ids(text: &str) -> Vec<ActionId> {
    text.split(',')
        .filter_map(|piece| {
            let piece = piece.trim();
            if piece.is_empty() {
                return None;
            }
            match piece.parse() {
                Ok(id) => Some(id),
                Err(_) => {
                    tracing::debug!(piece, "Skipping non-numeric known action id");
                    None
                }
            }
        })
        .collect()
}
