// Count service against a scripted multi-search backend.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use relboard::{init_engine, CountService, JsonObjectSource};
use relboard_batch::{BatchError, MsearchClient, MsearchRequest};
use relboard_config::RelboardConfig;
use relboard_core::{
    compute_groups, DashboardGroup, DashboardStateStore, Filter, LogNotifier, RelationRef,
    SavedObjectSource,
};
use serde_json::{json, Value};

const OBJECTS: &str = r#"{
    "dashboards": [
        { "id": "companies", "title": "Companies", "savedSearchId": "s-companies" },
        { "id": "articles", "title": "Articles", "savedSearchId": "s-articles" },
        { "id": "about", "title": "About" }
    ],
    "searches": [
        {
            "id": "s-companies",
            "title": "Companies",
            "kibanaSavedObjectMeta": { "searchSourceJSON": "{\"index\":\"company\"}" }
        },
        {
            "id": "s-articles",
            "title": "Articles",
            "kibanaSavedObjectMeta": {
                "searchSourceJSON": "{\"index\":\"article\",\"query\":{\"query_string\":{\"query\":\"lang:en\"}}}"
            }
        }
    ],
    "groups": [
        { "id": "main", "title": "Main", "priority": 0, "dashboards": ["companies", "articles"] }
    ],
    "index_patterns": [
        { "id": "company", "title": "company" },
        { "id": "article", "title": "article" }
    ],
    "relations": [
        {
            "domain": { "indexPatternId": "company", "path": "id" },
            "range": { "indexPatternId": "article", "path": "companyid" },
            "label": "mentioned in"
        }
    ],
    "buttons": [
        {
            "sourceDashboardId": "articles",
            "targetDashboardId": "companies",
            "relation": "article/companyid/company/id",
            "label": "Companies"
        }
    ]
}"#;

/// Answers every item with a total of 7, or fails every call.
struct FakeBackend {
    requests: Mutex<Vec<MsearchRequest>>,
    fail: bool,
}

impl FakeBackend {
    fn new(fail: bool) -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            fail,
        })
    }

    fn bodies(&self) -> String {
        self.requests
            .lock()
            .iter()
            .map(|r| r.body.clone())
            .collect::<Vec<_>>()
            .join("")
    }
}

#[async_trait]
impl MsearchClient for FakeBackend {
    async fn msearch(&self, request: MsearchRequest) -> relboard_batch::Result<Value> {
        let len = request.len;
        self.requests.lock().push(request);
        if self.fail {
            return Err(BatchError::transport("backend down"));
        }
        let slots: Vec<Value> = (0..len).map(|_| json!({ "hits": { "total": 7 } })).collect();
        Ok(Value::Array(slots))
    }
}

fn config() -> RelboardConfig {
    let mut config = RelboardConfig::default();
    config.counts.debounce_ms = 100;
    config.counts.tabs.retry_on_error = 0;
    config.counts.buttons.retry_on_error = 0;
    config
}

fn service(backend: Arc<FakeBackend>) -> (CountService, JsonObjectSource) {
    let objects = JsonObjectSource::from_json_str(OBJECTS).unwrap();
    let engine = init_engine(&config(), backend).unwrap();
    (
        CountService::from_objects(engine, objects.clone()).unwrap(),
        objects,
    )
}

fn groups(objects: &JsonObjectSource, store: &DashboardStateStore) -> Vec<DashboardGroup> {
    compute_groups(
        &objects.find_groups().unwrap(),
        &objects.find_dashboards().unwrap(),
        Some("companies"),
        store,
        &LogNotifier,
    )
    .unwrap()
}

#[tokio::test(start_paused = true)]
async fn update_all_fills_tab_and_button_counts() {
    let backend = FakeBackend::new(false);
    let (service, objects) = service(backend.clone());
    let mut store = DashboardStateStore::new();
    store.set_filters("articles", vec![Filter::term("topic", "ai")]);
    let mut groups = groups(&objects, &store);

    let queued = service.update_all(&store, &groups, &objects.buttons).unwrap();
    // "companies" is selected in "main", "about" has no saved search
    assert_eq!(queued, 2);
    assert!(service.wait_idle(Duration::from_secs(5)).await);

    service.apply_counts(&mut groups);
    let main = groups.iter().find(|g| g.id == "main").unwrap();
    let companies = main.dashboards.iter().find(|d| d.id == "companies").unwrap();
    assert_eq!(companies.count, Some(7));
    let about = groups.iter().find(|g| g.id == "about").unwrap();
    assert_eq!(about.dashboards[0].count, None);

    let button = service.outcome(&objects.buttons[0].count_id()).unwrap();
    assert_eq!(button.count, Some(7));
    assert!(button.error.is_none());

    let bodies = backend.bodies();
    assert!(bodies.contains("join_sequence"));
    assert!(bodies.contains("\"topic\""));
    assert!(bodies.contains("lang:en"));
}

#[tokio::test(start_paused = true)]
async fn enabled_relations_add_a_join_set_to_tab_counts() {
    let (service, _) = service(FakeBackend::new(false));
    let mut store = DashboardStateStore::new();

    let plain = service.dashboard_query(&store, "companies").unwrap().unwrap();
    assert!(!plain.body.to_string().contains("join_set"));

    store
        .enable_relation(&RelationRef::new(
            "articles",
            "companies",
            "article/companyid/company/id",
        ))
        .unwrap();
    let joined = service.dashboard_query(&store, "companies").unwrap().unwrap();
    assert_eq!(joined.indices, vec!["company"]);
    let body = joined.body.to_string();
    assert!(body.contains("join_set"));
    assert!(body.contains("lang:en"));

    assert!(service.dashboard_query(&store, "about").unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn state_changes_schedule_debounced_counts() {
    let backend = FakeBackend::new(false);
    let (service, objects) = service(backend.clone());
    let mut store = DashboardStateStore::new();
    let groups = groups(&objects, &store);
    let mut changes = store.subscribe();

    store.set_selected_dashboard_id("main", "articles");
    let change = changes.try_recv().unwrap();
    assert!(!service
        .on_state_change(&change, &store, &groups, &objects.buttons)
        .unwrap());

    store.set_filters("companies", vec![Filter::term("country", "fr")]);
    let change = changes.try_recv().unwrap();
    assert!(service
        .on_state_change(&change, &store, &groups, &objects.buttons)
        .unwrap());
    assert!(backend.requests.lock().is_empty());

    assert!(service.wait_idle(Duration::from_secs(5)).await);
    assert!(!backend.requests.lock().is_empty());
    assert!(backend.bodies().contains("\"country\""));
}

#[tokio::test(start_paused = true)]
async fn backend_failures_become_outcome_errors() {
    let backend = FakeBackend::new(true);
    let (service, objects) = service(backend.clone());
    let store = DashboardStateStore::new();
    let groups = groups(&objects, &store);
    let mut updates = service.subscribe();

    service.update_tab_counts(&store, &groups, true).unwrap();
    assert!(service.wait_idle(Duration::from_secs(5)).await);

    let outcome = service.outcome("companies").unwrap();
    assert_eq!(outcome.count, None);
    assert!(outcome.error.unwrap().contains("E206"));
    assert_eq!(updates.try_recv().unwrap().id, "companies");
    assert_eq!(backend.requests.lock().len(), 1);
}
