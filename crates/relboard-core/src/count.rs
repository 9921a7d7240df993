//! Count queries
//!
//! A count query is one multi-search item: a header naming the concrete
//! indices and a body asking for the hit count only.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::Result;
use crate::index::IndexResolver;
use crate::button::RelationalButton;
use crate::join::{JoinEndpoint, JoinFilterBuilder};
use crate::query::{compose_state, BoolQuery};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountQuery {
    pub indices: Vec<String>,
    pub body: Value,
}

impl CountQuery {
    pub fn new(indices: Vec<String>, query: &BoolQuery) -> Self {
        Self {
            indices,
            body: json!({
                "size": 0,
                "query": query.to_query()
            }),
        }
    }

    pub fn header(&self) -> Value {
        json!({
            "index": self.indices,
            "ignore_unavailable": true
        })
    }

    /// The two multi-search lines, `header\nbody\n`. This exact text is also
    /// the cache key of the request.
    pub fn to_lines(&self) -> String {
        format!("{}\n{}\n", self.header(), self.body)
    }

    /// Sort key grouping requests against the same indices.
    pub fn index_key(&self) -> String {
        self.indices.join(",")
    }
}

/// Count of documents a dashboard currently shows.
pub fn dashboard_count_query<R: IndexResolver + ?Sized>(
    builder: &JoinFilterBuilder<'_, R>,
    dashboard: &JoinEndpoint<'_>,
) -> Result<CountQuery> {
    let time_field = builder.resolver().time_field(dashboard.index_pattern);
    let query = compose_state(dashboard.state, time_field.as_deref(), builder.now())?;
    Ok(CountQuery::new(builder.indices_for(dashboard)?, &query))
}

/// Count behind a relational button: documents of the target dashboard
/// related to the current selection on the source.
pub fn button_count_query<R: IndexResolver + ?Sized>(
    builder: &JoinFilterBuilder<'_, R>,
    button: &RelationalButton,
    source: &JoinEndpoint<'_>,
    target: &JoinEndpoint<'_>,
) -> Result<CountQuery> {
    let join = builder.build_sequence(
        Some(&button.relation),
        source,
        target.index_pattern,
        &source.state.filters,
    )?;
    let mut state = target.state.clone();
    state.filters = button.target_filters(&target.state.filters, join);
    let time_field = builder.resolver().time_field(target.index_pattern);
    let query = compose_state(&state, time_field.as_deref(), builder.now())?;
    Ok(CountQuery::new(builder.indices_for(target)?, &query))
}

/// `hits.total` of one multi-search response slot, either a number or
/// `{"value": n}`.
pub fn extract_hit_count(slot: &Value) -> Option<u64> {
    let total = slot.get("hits")?.get("total")?;
    total
        .as_u64()
        .or_else(|| total.get("value").and_then(Value::as_u64))
}

/// Whether the backend pruned any join while answering.
pub fn extract_is_pruned(slot: &Value) -> bool {
    slot.get("coordinate_search")
        .and_then(|c| c.get("actions"))
        .and_then(Value::as_array)
        .map(|actions| {
            actions
                .iter()
                .any(|a| a.get("is_pruned").and_then(Value::as_bool) == Some(true))
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Filter;
    use crate::index::{IndexInterval, IndexPattern, PatternIndexResolver};
    use crate::relation::{Relation, RelationEndpoint, RelationRegistry};
    use crate::state::DashboardQueryState;
    use crate::time::TimeRange;
    use chrono::{TimeZone, Utc};

    fn resolver() -> PatternIndexResolver {
        PatternIndexResolver::new(vec![
            IndexPattern::new("companies"),
            IndexPattern::new("articles")
                .with_time_field("published")
                .with_interval("[articles-]YYYY", IndexInterval::Yearly),
        ])
    }

    #[test]
    fn test_dashboard_count_query() {
        let registry = RelationRegistry::default();
        let resolver = resolver();
        let now = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let builder = JoinFilterBuilder::new(&registry, &resolver, now);
        let state = DashboardQueryState {
            filters: vec![Filter::exists("title")],
            queries: Vec::new(),
            time: Some(TimeRange::new("now-60d", "now")),
        };
        let articles = JoinEndpoint {
            dashboard_id: "Articles",
            index_pattern: "articles",
            state: &state,
        };

        let query = dashboard_count_query(&builder, &articles).unwrap();
        assert_eq!(query.indices, vec!["articles-2023", "articles-2024"]);
        assert_eq!(query.body["size"], 0);
        let must = query.body["query"]["bool"]["must"].as_array().unwrap();
        assert_eq!(must.len(), 2);
        assert!(must[1]["range"]["published"].is_object());

        let lines = query.to_lines();
        assert_eq!(lines.matches('\n').count(), 2);
        assert!(lines.starts_with(r#"{"ignore_unavailable":true,"index":["articles-2023","articles-2024"]}"#));
    }

    #[test]
    fn test_button_count_query_joins_into_target() {
        let registry = RelationRegistry::new(vec![Relation::new(
            RelationEndpoint::new("companies", "id"),
            RelationEndpoint::new("articles", "companyid"),
        )]);
        let resolver = resolver();
        let now = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let builder = JoinFilterBuilder::new(&registry, &resolver, now);
        let companies_state = DashboardQueryState {
            filters: vec![Filter::exists("name")],
            ..Default::default()
        };
        let articles_state = DashboardQueryState::default();
        let companies = JoinEndpoint {
            dashboard_id: "Companies",
            index_pattern: "companies",
            state: &companies_state,
        };
        let articles = JoinEndpoint {
            dashboard_id: "Articles",
            index_pattern: "articles",
            state: &articles_state,
        };
        let button = RelationalButton::new("Companies", "Articles", "articles/companyid/companies/id");

        let query = button_count_query(&builder, &button, &companies, &articles).unwrap();
        assert_eq!(query.indices, vec!["articles-*"]);
        let must = &query.body["query"]["bool"]["must"];
        assert!(must[0]["join_sequence"].is_array());

        let reverse = button_count_query(&builder, &button.virtual_reverse(), &articles, &companies)
            .unwrap();
        assert_eq!(reverse.indices, vec!["companies"]);
    }

    #[test]
    fn test_extract_hit_count() {
        assert_eq!(extract_hit_count(&json!({ "hits": { "total": 12 } })), Some(12));
        assert_eq!(
            extract_hit_count(&json!({ "hits": { "total": { "value": 7, "relation": "eq" } } })),
            Some(7)
        );
        assert_eq!(extract_hit_count(&json!({ "error": "boom" })), None);
        assert!(extract_is_pruned(&json!({
            "coordinate_search": { "actions": [{ "is_pruned": false }, { "is_pruned": true }] }
        })));
        assert!(!extract_is_pruned(&json!({ "hits": {} })));
    }
}
