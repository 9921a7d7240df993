//! Dashboard state store
//!
//! Holds per-dashboard filters, query and time, the selected dashboard of
//! every group and the enabled relations in one compact blob:
//!
//! ```text
//! {
//!   "g": { "<group>": "<dashboard>" },
//!   "d": { "<dashboard>": { "f": [filters], "q": query | "*", "t": { "m", "f", "t" } } },
//!   "j": [ "<dashA>/<dashB>/<fieldA>/<fieldB>" ],
//!   "s": "<session id>"
//! }
//! ```
//!
//! Mutators are the only write path. Each one that changes something
//! publishes a [`StateChange`] naming the top-level keys it touched.

use std::collections::{BTreeMap, BTreeSet};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::{CoreError, Result};
use crate::filter::Filter;
use crate::query::Query;
use crate::relation::{EnabledRelation, RelationRef};
use crate::time::{TimeMode, TimeRange};

const MATCH_ALL_MARKER: &str = "*";
const EVENT_CAPACITY: usize = 64;

/// Top-level keys of the persisted blob, plus the non-persisted global state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StateKey {
    /// `g`: selected dashboard per group
    Groups,
    /// `d`: per-dashboard filters, query and time
    Dashboards,
    /// `j`: enabled relations
    Relations,
    /// `s`: session id
    Session,
    /// Pinned filters and global time (not part of the blob)
    Global,
}

impl StateKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateKey::Groups => "g",
            StateKey::Dashboards => "d",
            StateKey::Relations => "j",
            StateKey::Session => "s",
            StateKey::Global => "global",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateChange {
    pub keys: BTreeSet<StateKey>,
    /// Dashboards whose `d` entry changed.
    pub dashboards: BTreeSet<String>,
}

impl StateChange {
    fn key(key: StateKey) -> Self {
        Self {
            keys: BTreeSet::from([key]),
            dashboards: BTreeSet::new(),
        }
    }

    fn dashboard(id: &str) -> Self {
        Self {
            keys: BTreeSet::from([StateKey::Dashboards]),
            dashboards: BTreeSet::from([id.to_string()]),
        }
    }
}

/// What a dashboard contributes to a query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DashboardQueryState {
    pub filters: Vec<Filter>,
    pub queries: Vec<Value>,
    pub time: Option<TimeRange>,
}

impl DashboardQueryState {
    /// Append the base queries of the dashboard's saved search.
    pub fn with_base_queries(mut self, queries: impl IntoIterator<Item = Value>) -> Self {
        self.queries.extend(queries);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct StoredTime {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    m: Option<String>,
    #[serde(default)]
    f: String,
    #[serde(default)]
    t: String,
}

impl From<&TimeRange> for StoredTime {
    fn from(range: &TimeRange) -> Self {
        Self {
            m: range.mode.map(|m| m.as_str().to_string()),
            f: range.from.clone(),
            t: range.to.clone(),
        }
    }
}

impl StoredTime {
    fn to_range(&self) -> Option<TimeRange> {
        if self.f.is_empty() || self.t.is_empty() {
            return None;
        }
        Some(TimeRange {
            mode: self.m.as_deref().and_then(TimeMode::parse),
            from: self.f.clone(),
            to: self.t.clone(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct StoredDashboard {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    f: Vec<Filter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    q: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    t: Option<StoredTime>,
}

impl StoredDashboard {
    fn is_empty(&self) -> bool {
        self.f.is_empty() && self.q.is_none() && self.t.is_none()
    }

    /// Decode one entry, dropping whatever part of it is malformed.
    fn from_value_lenient(id: &str, value: Value) -> Self {
        let Value::Object(map) = value else {
            warn!(dashboard = %id, "Ignoring malformed dashboard state entry");
            return Self::default();
        };
        let mut out = Self::default();
        if let Some(filters) = map.get("f") {
            match serde_json::from_value::<Vec<Value>>(filters.clone()) {
                Ok(raw) => {
                    for filter in raw {
                        match serde_json::from_value::<Filter>(filter) {
                            Ok(filter) => out.f.push(filter),
                            Err(e) => warn!(dashboard = %id, error = %e, "Dropping unparseable filter"),
                        }
                    }
                }
                Err(e) => warn!(dashboard = %id, error = %e, "Ignoring malformed filter list"),
            }
        }
        out.q = map.get("q").filter(|q| !q.is_null()).cloned();
        if let Some(time) = map.get("t") {
            match serde_json::from_value::<StoredTime>(time.clone()) {
                Ok(time) => out.t = Some(time),
                Err(e) => warn!(dashboard = %id, error = %e, "Ignoring malformed time range"),
            }
        }
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct StateBlob {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    g: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    d: BTreeMap<String, StoredDashboard>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    j: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    s: Option<String>,
}

impl StateBlob {
    /// Every key is optional and decoded on its own; a malformed key is
    /// logged and treated as absent.
    fn from_value_lenient(value: Value) -> Result<Self> {
        let Value::Object(mut map) = value else {
            return Err(CoreError::invalid_state("state blob is not an object"));
        };
        let mut blob = Self::default();

        if let Some(groups) = map.remove("g") {
            match serde_json::from_value(groups) {
                Ok(groups) => blob.g = groups,
                Err(e) => warn!(error = %e, "Ignoring malformed group selection state"),
            }
        }
        if let Some(Value::Object(dashboards)) = map.remove("d") {
            for (id, entry) in dashboards {
                let entry = StoredDashboard::from_value_lenient(&id, entry);
                blob.d.insert(id, entry);
            }
        }
        if let Some(relations) = map.remove("j") {
            match serde_json::from_value(relations) {
                Ok(relations) => blob.j = relations,
                Err(e) => warn!(error = %e, "Ignoring malformed relation state"),
            }
        }
        if let Some(Value::String(session)) = map.remove("s") {
            blob.s = Some(session);
        }
        Ok(blob)
    }
}

/// Shared dashboard state.
#[derive(Debug)]
pub struct DashboardStateStore {
    blob: StateBlob,
    pinned: Vec<Filter>,
    global_time: Option<TimeRange>,
    events: broadcast::Sender<StateChange>,
}

impl Default for DashboardStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DashboardStateStore {
    /// Empty store with a fresh session id.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            blob: StateBlob {
                s: Some(new_session_id()),
                ..StateBlob::default()
            },
            pinned: Vec::new(),
            global_time: None,
            events,
        }
    }

    /// Restore from the JSON form produced by [`Self::to_blob`].
    pub fn from_blob(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)
            .map_err(|e| CoreError::invalid_state(format!("blob is not JSON: {}", e)))?;
        let mut store = Self::new();
        store.blob = StateBlob::from_value_lenient(value)?;
        if store.blob.s.is_none() {
            store.blob.s = Some(new_session_id());
        }
        Ok(store)
    }

    /// Restore from the URL parameter form produced by [`Self::to_url_param`].
    pub fn from_url_param(param: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(param.trim_end_matches('='))
            .map_err(|e| CoreError::invalid_state(format!("bad url encoding: {}", e)))?;
        let json = String::from_utf8(bytes)
            .map_err(|e| CoreError::invalid_state(format!("blob is not UTF-8: {}", e)))?;
        Self::from_blob(&json)
    }

    pub fn to_blob(&self) -> Result<String> {
        serde_json::to_string(&self.blob)
            .map_err(|e| CoreError::invalid_state(format!("cannot serialize state: {}", e)))
    }

    pub fn to_url_param(&self) -> Result<String> {
        Ok(URL_SAFE_NO_PAD.encode(self.to_blob()?))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.events.subscribe()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.blob.s.as_deref()
    }

    fn emit(&self, change: StateChange) {
        debug!(
            keys = ?change.keys.iter().map(StateKey::as_str).collect::<Vec<_>>(),
            dashboards = ?change.dashboards,
            "Dashboard state changed"
        );
        // No subscribers is fine.
        let _ = self.events.send(change);
    }

    /// Mutate one dashboard entry; emits only when the entry changed.
    fn update_dashboard(&mut self, id: &str, mutate: impl FnOnce(&mut StoredDashboard)) {
        let entry = self.blob.d.entry(id.to_string()).or_default();
        let before = entry.clone();
        mutate(entry);
        let changed = *entry != before;
        if entry.is_empty() {
            self.blob.d.remove(id);
        }
        if changed {
            self.emit(StateChange::dashboard(id));
        }
    }

    // ---- per-dashboard state ----

    pub fn dashboard_ids(&self) -> impl Iterator<Item = &str> {
        self.blob.d.keys().map(String::as_str)
    }

    pub fn filters(&self, dashboard_id: &str) -> &[Filter] {
        self.blob
            .d
            .get(dashboard_id)
            .map(|d| d.f.as_slice())
            .unwrap_or(&[])
    }

    pub fn query(&self, dashboard_id: &str) -> Option<Query> {
        let stored = self.blob.d.get(dashboard_id)?.q.as_ref()?;
        match stored {
            Value::String(marker) if marker == MATCH_ALL_MARKER => Some(Query::match_all()),
            other => Some(Query(other.clone())),
        }
    }

    pub fn time(&self, dashboard_id: &str) -> Option<TimeRange> {
        self.blob
            .d
            .get(dashboard_id)?
            .t
            .as_ref()
            .and_then(StoredTime::to_range)
    }

    pub fn set_filters(&mut self, dashboard_id: &str, filters: Vec<Filter>) {
        let join_sets = filters.iter().filter(|f| f.is_join_set()).count();
        let filters = if join_sets > 1 {
            warn!(
                dashboard = %dashboard_id,
                join_sets,
                "Keeping only the last join_set filter"
            );
            dedupe_join_sets(filters)
        } else {
            filters
        };
        self.update_dashboard(dashboard_id, |d| d.f = filters);
    }

    /// Append a filter unless an identical condition is already present.
    /// A `join_set` replaces any existing one.
    pub fn add_filter(&mut self, dashboard_id: &str, filter: Filter) {
        self.update_dashboard(dashboard_id, |d| {
            if filter.is_join_set() {
                d.f.retain(|f| !f.is_join_set());
            } else if d.f.iter().any(|f| f.same_condition(&filter)) {
                return;
            }
            d.f.push(filter);
        });
    }

    /// Remove every filter with the same condition. Returns whether any was removed.
    pub fn remove_filter(&mut self, dashboard_id: &str, filter: &Filter) -> bool {
        let before = self.filters(dashboard_id).len();
        self.update_dashboard(dashboard_id, |d| d.f.retain(|f| !f.same_condition(filter)));
        self.filters(dashboard_id).len() != before
    }

    pub fn set_query(&mut self, dashboard_id: &str, query: Option<Query>) {
        let stored = query.map(|q| {
            if q.is_match_all() {
                Value::String(MATCH_ALL_MARKER.to_string())
            } else {
                q.into_value()
            }
        });
        self.update_dashboard(dashboard_id, |d| d.q = stored);
    }

    pub fn set_time(&mut self, dashboard_id: &str, time: Option<TimeRange>) {
        let stored = time.as_ref().map(StoredTime::from);
        self.update_dashboard(dashboard_id, |d| d.t = stored);
    }

    /// Clear filters, query and time of one dashboard.
    pub fn reset_dashboard(&mut self, dashboard_id: &str) {
        if self.blob.d.remove(dashboard_id).is_some() {
            self.emit(StateChange::dashboard(dashboard_id));
        }
    }

    /// Drop every trace of a deleted dashboard.
    pub fn forget_dashboard(&mut self, dashboard_id: &str) {
        let mut change = StateChange::default();
        if self.blob.d.remove(dashboard_id).is_some() {
            change.keys.insert(StateKey::Dashboards);
            change.dashboards.insert(dashboard_id.to_string());
        }
        let groups_before = self.blob.g.len();
        self.blob.g.retain(|_, selected| selected != dashboard_id);
        if self.blob.g.len() != groups_before {
            change.keys.insert(StateKey::Groups);
        }
        let relations_before = self.blob.j.len();
        self.blob.j.retain(|id| {
            EnabledRelation::parse(id)
                .map(|r| !r.involves(dashboard_id))
                .unwrap_or(true)
        });
        if self.blob.j.len() != relations_before {
            change.keys.insert(StateKey::Relations);
        }
        if !change.keys.is_empty() {
            self.emit(change);
        }
    }

    /// Start over: empty blob, new session.
    pub fn reset_all(&mut self) {
        self.blob = StateBlob {
            s: Some(new_session_id()),
            ..StateBlob::default()
        };
        self.emit(StateChange {
            keys: BTreeSet::from([
                StateKey::Groups,
                StateKey::Dashboards,
                StateKey::Relations,
                StateKey::Session,
            ]),
            dashboards: BTreeSet::new(),
        });
    }

    // ---- global state ----

    pub fn pinned_filters(&self) -> &[Filter] {
        &self.pinned
    }

    pub fn set_pinned_filters(&mut self, filters: Vec<Filter>) {
        let filters: Vec<Filter> = filters.into_iter().map(Filter::pinned).collect();
        if filters != self.pinned {
            self.pinned = filters;
            self.emit(StateChange::key(StateKey::Global));
        }
    }

    pub fn global_time(&self) -> Option<&TimeRange> {
        self.global_time.as_ref()
    }

    pub fn set_global_time(&mut self, time: Option<TimeRange>) {
        if time != self.global_time {
            self.global_time = time;
            self.emit(StateChange::key(StateKey::Global));
        }
    }

    /// Effective state of a dashboard: pinned filters first, then the
    /// dashboard's own, disabled ones removed. Time falls back to the global
    /// time; a match-all query contributes nothing.
    pub fn get_state(&self, dashboard_id: &str) -> DashboardQueryState {
        let mut filters: Vec<Filter> = self
            .pinned
            .iter()
            .filter(|f| !f.meta.disabled)
            .cloned()
            .collect();
        for filter in self.filters(dashboard_id) {
            if filter.meta.disabled {
                continue;
            }
            if self.pinned.iter().any(|p| p.same_condition(filter)) {
                continue;
            }
            filters.push(filter.clone());
        }

        let queries = self
            .query(dashboard_id)
            .filter(|q| !q.is_match_all())
            .map(|q| vec![q.into_value()])
            .unwrap_or_default();

        let time = self
            .time(dashboard_id)
            .or_else(|| self.global_time.clone());

        DashboardQueryState {
            filters,
            queries,
            time,
        }
    }

    // ---- groups ----

    pub fn selected_dashboard_id(&self, group_id: &str) -> Option<&str> {
        self.blob.g.get(group_id).map(String::as_str)
    }

    pub fn set_selected_dashboard_id(&mut self, group_id: &str, dashboard_id: &str) {
        let previous = self
            .blob
            .g
            .insert(group_id.to_string(), dashboard_id.to_string());
        if previous.as_deref() != Some(dashboard_id) {
            self.emit(StateChange::key(StateKey::Groups));
        }
    }

    // ---- relations ----

    pub fn enable_relation(&mut self, relation: &RelationRef) -> Result<()> {
        let id = relation.derived_id()?;
        if !self.blob.j.contains(&id) {
            self.blob.j.push(id);
            self.emit(StateChange::key(StateKey::Relations));
        }
        Ok(())
    }

    pub fn disable_relation(&mut self, relation: &RelationRef) -> Result<()> {
        let id = relation.derived_id()?;
        let before = self.blob.j.len();
        self.blob.j.retain(|existing| *existing != id);
        if self.blob.j.len() != before {
            self.emit(StateChange::key(StateKey::Relations));
        }
        Ok(())
    }

    /// Malformed references are never enabled.
    pub fn is_relation_enabled(&self, relation: &RelationRef) -> bool {
        relation
            .derived_id()
            .map(|id| self.blob.j.contains(&id))
            .unwrap_or(false)
    }

    pub fn enabled_relation_ids(&self) -> &[String] {
        &self.blob.j
    }

    pub fn enabled_relations(&self) -> Vec<EnabledRelation> {
        self.blob
            .j
            .iter()
            .filter_map(|id| EnabledRelation::parse(id))
            .collect()
    }

    pub fn reset_relations(&mut self) {
        if !self.blob.j.is_empty() {
            self.blob.j.clear();
            self.emit(StateChange::key(StateKey::Relations));
        }
    }
}

fn new_session_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn dedupe_join_sets(filters: Vec<Filter>) -> Vec<Filter> {
    let last_join_set = filters.iter().rposition(Filter::is_join_set);
    filters
        .into_iter()
        .enumerate()
        .filter(|(i, f)| !f.is_join_set() || Some(*i) == last_join_set)
        .map(|(_, f)| f)
        .collect()
}
