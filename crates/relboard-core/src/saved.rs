//! Saved objects consumed by the core
//!
//! Dashboards, saved searches and dashboard groups come from an external
//! repository. Only the fields the core reads are modelled; the embedded
//! `searchSourceJSON` is parsed into filters and a query.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, warn};

use crate::error::{CoreError, Result};
use crate::filter::Filter;
use crate::index::IndexPattern;
use crate::query::Query;
use crate::time::{TimeMode, TimeRange};

/// Filters, query and index embedded in a saved object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchSource {
    pub index: Option<String>,
    pub query: Option<Query>,
    pub filters: Vec<Filter>,
}

#[derive(Deserialize)]
struct RawSearchSource {
    #[serde(default)]
    index: Option<String>,
    #[serde(default)]
    query: Option<Value>,
    #[serde(default)]
    filter: Vec<Value>,
}

impl SearchSource {
    /// Parse a `searchSourceJSON` string. An empty string is an empty source.
    /// Filters of an unknown kind are dropped with a warning.
    pub fn parse(object_id: &str, json: &str) -> Result<Self> {
        if json.trim().is_empty() {
            return Ok(Self::default());
        }
        let raw: RawSearchSource =
            serde_json::from_str(json).map_err(|e| CoreError::InvalidSavedObject {
                id: object_id.to_string(),
                reason: e.to_string(),
            })?;

        let mut filters = Vec::with_capacity(raw.filter.len());
        for value in raw.filter {
            match serde_json::from_value::<Filter>(value) {
                Ok(filter) => filters.push(filter),
                Err(e) => warn!(object = %object_id, error = %e, "Dropping unsupported saved filter"),
            }
        }

        Ok(Self {
            index: raw.index,
            query: raw.query.filter(|q| !q.is_null()).map(Query),
            filters,
        })
    }

    /// Queries a saved search adds to every dashboard built on it. Negated
    /// filters are wrapped in a `must_not` so they keep their polarity.
    pub fn base_queries(&self) -> Vec<Value> {
        let mut queries = Vec::new();
        if let Some(query) = self.query.as_ref().filter(|q| !q.is_match_all()) {
            queries.push(query.as_value().clone());
        }
        for filter in self.filters.iter().filter(|f| !f.meta.disabled) {
            let clause = filter.kind.to_query();
            if filter.meta.negate {
                queries.push(serde_json::json!({ "bool": { "must_not": [clause] } }));
            } else {
                queries.push(clause);
            }
        }
        queries
    }
}

fn search_source_json(meta: Option<&Value>) -> &str {
    meta.and_then(|meta| meta.get("searchSourceJSON"))
        .and_then(Value::as_str)
        .unwrap_or("")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedDashboard {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_search_id: Option<String>,
    #[serde(default)]
    pub time_restore: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_mode: Option<TimeMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kibana_saved_object_meta: Option<Value>,
}

impl SavedDashboard {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            saved_search_id: None,
            time_restore: false,
            time_mode: None,
            time_from: None,
            time_to: None,
            kibana_saved_object_meta: None,
        }
    }

    pub fn with_saved_search(mut self, id: impl Into<String>) -> Self {
        self.saved_search_id = Some(id.into());
        self
    }

    pub fn search_source(&self) -> Result<SearchSource> {
        SearchSource::parse(
            &self.id,
            search_source_json(self.kibana_saved_object_meta.as_ref()),
        )
    }

    /// Time stored with the dashboard, when it restores one.
    pub fn restored_time(&self) -> Option<TimeRange> {
        if !self.time_restore {
            return None;
        }
        let (from, to) = (self.time_from.as_ref()?, self.time_to.as_ref()?);
        let range = TimeRange::new(from.clone(), to.clone());
        Some(match self.time_mode {
            Some(mode) => range.with_mode(mode),
            None => range,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedSearch {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kibana_saved_object_meta: Option<Value>,
}

impl SavedSearch {
    pub fn search_source(&self) -> Result<SearchSource> {
        SearchSource::parse(
            &self.id,
            search_source_json(self.kibana_saved_object_meta.as_ref()),
        )
    }

    /// Index pattern the search runs against.
    pub fn index_pattern(&self) -> Result<Option<String>> {
        Ok(self.search_source()?.index)
    }
}

/// Declared tab group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedDashboardGroup {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub dashboards: Vec<String>,
}

/// Read side of the saved-object repository.
pub trait SavedObjectSource {
    fn find_dashboards(&self) -> Result<Vec<SavedDashboard>>;

    fn get_dashboard(&self, id: &str) -> Result<Option<SavedDashboard>> {
        Ok(self.find_dashboards()?.into_iter().find(|d| d.id == id))
    }

    fn get_search(&self, id: &str) -> Result<Option<SavedSearch>>;

    fn find_groups(&self) -> Result<Vec<SavedDashboardGroup>>;

    fn find_index_patterns(&self) -> Result<Vec<IndexPattern>>;
}

/// Sink for user-visible warnings and errors.
pub trait Notifier: Send + Sync {
    fn warning(&self, message: &str);
    fn error(&self, message: &str);
}

/// Notifier that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn warning(&self, message: &str) {
        warn!(notification = %message, "User warning");
    }

    fn error(&self, message: &str) {
        error!(notification = %message, "User error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_search_source() {
        let source = SearchSource::parse(
            "search:1",
            r#"{
                "index": "articles",
                "query": {"query_string": {"query": "*", "analyze_wildcard": true}},
                "filter": [
                    {"meta": {"negate": true}, "exists": {"field": "x"}},
                    {"unknown_kind": {}},
                    {"meta": {"disabled": true}, "exists": {"field": "y"}}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(source.index.as_deref(), Some("articles"));
        assert_eq!(source.filters.len(), 2);

        let base = source.base_queries();
        assert_eq!(
            base,
            vec![json!({ "bool": { "must_not": [{ "exists": { "field": "x" } }] } })]
        );
    }

    #[test]
    fn test_bad_search_source() {
        let err = SearchSource::parse("dash:1", "{not json").unwrap_err();
        assert!(matches!(err, CoreError::InvalidSavedObject { ref id, .. } if id == "dash:1"));
        assert_eq!(SearchSource::parse("x", "").unwrap(), SearchSource::default());
    }

    #[test]
    fn test_saved_objects_from_json() {
        let search: SavedSearch = serde_json::from_value(json!({
            "id": "s1",
            "title": "Articles",
            "kibanaSavedObjectMeta": { "searchSourceJSON": "{\"index\": \"articles\"}" }
        }))
        .unwrap();
        assert_eq!(search.index_pattern().unwrap().as_deref(), Some("articles"));

        let dashboard: SavedDashboard = serde_json::from_value(json!({
            "id": "d1",
            "title": "Articles",
            "savedSearchId": "s1",
            "timeRestore": true,
            "timeFrom": "now-7d",
            "timeTo": "now"
        }))
        .unwrap();
        assert_eq!(dashboard.saved_search_id.as_deref(), Some("s1"));
        assert_eq!(dashboard.restored_time(), Some(TimeRange::new("now-7d", "now")));
        assert_eq!(dashboard.search_source().unwrap(), SearchSource::default());
    }
}
