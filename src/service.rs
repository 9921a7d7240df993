// Count service
//
// Turns dashboard state into tab and relational-button count requests and
// feeds them to the count engine. Results are kept per request id and
// broadcast as they arrive.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use relboard_batch::{CountEngine, CountResult, MetaDefinition, BUTTONS, TABS};
use relboard_core::{
    button_count_query, dashboard_count_query, dashboards_needing_counts, extract_hit_count,
    extract_is_pruned, replace_join_set, CountQuery, DashboardGroup, DashboardQueryState,
    DashboardStateStore, JoinEndpoint, JoinFilterBuilder, PatternIndexResolver, RelationRegistry, RelationalButton,
    SavedObjectSource, StateChange, StateKey,
};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::source::JsonObjectSource;

const UPDATE_CHANNEL_CAPACITY: usize = 256;
const IDLE_POLL: Duration = Duration::from_millis(20);

/// Latest answer for one count request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountOutcome {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    pub is_pruned: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CountOutcome {
    fn from_result(id: String, result: CountResult) -> Self {
        match result {
            Ok(slot) => Self {
                id,
                count: extract_hit_count(&slot),
                is_pruned: extract_is_pruned(&slot),
                error: None,
            },
            Err(e) => Self::failed(id, e.to_string()),
        }
    }

    fn failed(id: String, error: String) -> Self {
        Self {
            id,
            count: None,
            is_pruned: false,
            error: Some(error),
        }
    }
}

/// Everything a count query needs to know about one dashboard.
#[derive(Debug, Clone, PartialEq)]
pub struct DashboardContext {
    pub dashboard_id: String,
    pub index_pattern: String,
    pub state: DashboardQueryState,
}

impl DashboardContext {
    pub fn endpoint(&self) -> JoinEndpoint<'_> {
        JoinEndpoint {
            dashboard_id: &self.dashboard_id,
            index_pattern: &self.index_pattern,
            state: &self.state,
        }
    }
}

/// Effective state of `dashboard_id` with the base queries of its saved
/// search. `None` when the dashboard has no saved search to count against.
pub fn dashboard_context(
    source: &dyn SavedObjectSource,
    store: &DashboardStateStore,
    dashboard_id: &str,
) -> Result<Option<DashboardContext>> {
    let Some(dashboard) = source.get_dashboard(dashboard_id)? else {
        warn!(dashboard = %dashboard_id, "Unknown dashboard");
        return Ok(None);
    };
    let Some(search_id) = dashboard.saved_search_id.as_deref() else {
        return Ok(None);
    };
    let Some(search) = source.get_search(search_id)? else {
        warn!(
            dashboard = %dashboard_id,
            search = %search_id,
            "Dashboard points to a missing saved search"
        );
        return Ok(None);
    };
    let search_source = search
        .search_source()
        .with_context(|| format!("Saved search '{}' is unreadable", search_id))?;
    let Some(index_pattern) = search_source.index.clone() else {
        return Ok(None);
    };

    let mut state = store
        .get_state(dashboard_id)
        .with_base_queries(search_source.base_queries());
    if state.time.is_none() {
        state.time = dashboard.restored_time();
    }

    Ok(Some(DashboardContext {
        dashboard_id: dashboard_id.to_string(),
        index_pattern,
        state,
    }))
}

/// Feeds tab and button counts to a [`CountEngine`].
pub struct CountService {
    engine: CountEngine,
    source: Arc<dyn SavedObjectSource + Send + Sync>,
    registry: RelationRegistry,
    resolver: PatternIndexResolver,
    outcomes: Arc<Mutex<HashMap<String, CountOutcome>>>,
    updates: broadcast::Sender<CountOutcome>,
}

impl CountService {
    pub fn new(
        engine: CountEngine,
        source: Arc<dyn SavedObjectSource + Send + Sync>,
        registry: RelationRegistry,
        resolver: PatternIndexResolver,
    ) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            engine,
            source,
            registry,
            resolver,
            outcomes: Arc::new(Mutex::new(HashMap::new())),
            updates,
        }
    }

    /// Service over a saved-object file, using its index patterns and
    /// relations.
    pub fn from_objects(engine: CountEngine, objects: JsonObjectSource) -> Result<Self> {
        let resolver = PatternIndexResolver::new(objects.find_index_patterns()?);
        let registry = RelationRegistry::new(objects.relations.clone());
        Ok(Self::new(engine, Arc::new(objects), registry, resolver))
    }

    pub fn engine(&self) -> &CountEngine {
        &self.engine
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CountOutcome> {
        self.updates.subscribe()
    }

    pub fn outcome(&self, id: &str) -> Option<CountOutcome> {
        self.outcomes.lock().get(id).cloned()
    }

    pub fn outcomes(&self) -> BTreeMap<String, CountOutcome> {
        self.outcomes
            .lock()
            .iter()
            .map(|(id, outcome)| (id.clone(), outcome.clone()))
            .collect()
    }

    /// Dashboard context including the `join_set` built from the enabled
    /// relations that involve it.
    pub fn context(
        &self,
        store: &DashboardStateStore,
        dashboard_id: &str,
    ) -> Result<Option<DashboardContext>> {
        let Some(mut focus) = dashboard_context(self.source.as_ref(), store, dashboard_id)? else {
            return Ok(None);
        };

        let enabled: Vec<_> = store
            .enabled_relations()
            .into_iter()
            .filter(|relation| relation.involves(dashboard_id))
            .collect();
        if enabled.is_empty() {
            return Ok(Some(focus));
        }

        let mut others: Vec<DashboardContext> = Vec::new();
        for relation in &enabled {
            for id in &relation.dashboards {
                if id == dashboard_id || others.iter().any(|o| &o.dashboard_id == id) {
                    continue;
                }
                if let Some(other) = dashboard_context(self.source.as_ref(), store, id)? {
                    others.push(other);
                }
            }
        }

        let builder = JoinFilterBuilder::new(&self.registry, &self.resolver, Utc::now());
        let other_endpoints: Vec<JoinEndpoint<'_>> =
            others.iter().map(DashboardContext::endpoint).collect();
        let join_set = builder.build_join_set(&focus.endpoint(), &other_endpoints, &enabled)?;
        replace_join_set(&mut focus.state.filters, join_set);
        Ok(Some(focus))
    }

    /// Queue the counts of the selected dashboard of every group.
    pub fn update_tab_counts(
        &self,
        store: &DashboardStateStore,
        groups: &[DashboardGroup],
        immediate: bool,
    ) -> Result<usize> {
        let mut definitions = Vec::new();
        for dashboard_id in dashboards_needing_counts(groups) {
            match self.dashboard_query(store, dashboard_id) {
                Ok(Some(query)) => {
                    definitions.push(self.definition(dashboard_id.to_string(), query))
                }
                Ok(None) => debug!(dashboard = %dashboard_id, "Nothing to count"),
                Err(e) => self.report_failure(dashboard_id.to_string(), format!("{:#}", e)),
            }
        }
        self.submit(TABS, definitions, immediate)
    }

    /// Count query of one dashboard tab, `None` when it has nothing to count.
    pub fn dashboard_query(
        &self,
        store: &DashboardStateStore,
        dashboard_id: &str,
    ) -> Result<Option<CountQuery>> {
        let Some(context) = self.context(store, dashboard_id)? else {
            return Ok(None);
        };
        let builder = JoinFilterBuilder::new(&self.registry, &self.resolver, Utc::now());
        Ok(Some(dashboard_count_query(&builder, &context.endpoint())?))
    }

    /// Queue the counts behind relational buttons.
    pub fn update_button_counts(
        &self,
        store: &DashboardStateStore,
        buttons: &[RelationalButton],
        immediate: bool,
    ) -> Result<usize> {
        let builder = JoinFilterBuilder::new(&self.registry, &self.resolver, Utc::now());
        let mut definitions = Vec::new();
        for button in buttons {
            let source = dashboard_context(self.source.as_ref(), store, &button.source_dashboard_id)?;
            let target = dashboard_context(self.source.as_ref(), store, &button.target_dashboard_id)?;
            let (Some(source), Some(target)) = (source, target) else {
                debug!(button = %button.count_id(), "Button endpoints have nothing to count");
                continue;
            };
            let id = button.count_id();
            match button_count_query(&builder, button, &source.endpoint(), &target.endpoint()) {
                Ok(query) => definitions.push(self.definition(id, query)),
                Err(e) => self.report_failure(id, e.to_string()),
            }
        }
        self.submit(BUTTONS, definitions, immediate)
    }

    /// Refresh every count now, skipping the debounce.
    pub fn update_all(
        &self,
        store: &DashboardStateStore,
        groups: &[DashboardGroup],
        buttons: &[RelationalButton],
    ) -> Result<usize> {
        Ok(self.update_tab_counts(store, groups, true)?
            + self.update_button_counts(store, buttons, true)?)
    }

    /// React to a store change. Only changes that can move a count schedule
    /// work, and only after the debounce delay. Returns whether anything was
    /// queued.
    pub fn on_state_change(
        &self,
        change: &StateChange,
        store: &DashboardStateStore,
        groups: &[DashboardGroup],
        buttons: &[RelationalButton],
    ) -> Result<bool> {
        let affects_counts = change.keys.iter().any(|key| {
            matches!(
                key,
                StateKey::Dashboards | StateKey::Relations | StateKey::Global
            )
        });
        if !affects_counts {
            return Ok(false);
        }
        let queued = self.update_tab_counts(store, groups, false)?
            + self.update_button_counts(store, buttons, false)?;
        Ok(queued > 0)
    }

    /// Copy the latest tab counts into `groups`.
    pub fn apply_counts(&self, groups: &mut [DashboardGroup]) {
        let outcomes = self.outcomes.lock();
        for dashboard in groups.iter_mut().flat_map(|g| g.dashboards.iter_mut()) {
            if let Some(outcome) = outcomes.get(&dashboard.id) {
                dashboard.count = outcome.count;
                dashboard.is_pruned = outcome.is_pruned;
            }
        }
    }

    /// Wait until both strategies have nothing queued or in flight. Returns
    /// `false` when `timeout` elapsed first.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let busy = [TABS, BUTTONS].into_iter().any(|strategy| {
                let stats = self.engine.stats(strategy);
                stats.queued > 0 || stats.in_flight > 0
            });
            if !busy {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(IDLE_POLL).await;
        }
    }

    fn definition(&self, id: String, query: CountQuery) -> MetaDefinition {
        let outcomes = Arc::clone(&self.outcomes);
        let updates = self.updates.clone();
        let key = id.clone();
        MetaDefinition::new(id, query, move |result| {
            let outcome = CountOutcome::from_result(key.clone(), result);
            outcomes.lock().insert(key, outcome.clone());
            // Nobody listening is fine
            let _ = updates.send(outcome);
        })
    }

    fn report_failure(&self, id: String, error: String) {
        warn!(id = %id, error = %error, "Could not build count query");
        let outcome = CountOutcome::failed(id.clone(), error);
        self.outcomes.lock().insert(id, outcome.clone());
        let _ = self.updates.send(outcome);
    }

    fn submit(&self, strategy: &str, definitions: Vec<MetaDefinition>, immediate: bool) -> Result<usize> {
        let queued = definitions.len();
        if queued == 0 {
            return Ok(0);
        }
        self.engine.enqueue(strategy, definitions)?;
        self.engine.schedule(strategy, immediate)?;
        Ok(queued)
    }
}
