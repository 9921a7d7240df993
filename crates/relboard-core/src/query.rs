//! Query composition
//!
//! `compose` turns a dashboard's filters, queries and time clause into one
//! boolean query. It is shared by the interactive query path and the count
//! path, so it must stay pure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::Result;
use crate::filter::Filter;
use crate::state::DashboardQueryState;

/// Dashboard query as entered in the search bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Query(pub Value);

impl Query {
    /// Match everything, analysing wildcards.
    pub fn match_all() -> Self {
        Self(json!({
            "query_string": {
                "query": "*",
                "analyze_wildcard": true
            }
        }))
    }

    pub fn query_string(text: &str) -> Self {
        Self(json!({
            "query_string": {
                "query": text,
                "analyze_wildcard": true
            }
        }))
    }

    pub fn is_match_all(&self) -> bool {
        *self == Self::match_all()
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoolQuery {
    pub must: Vec<Value>,
    pub must_not: Vec<Value>,
}

impl BoolQuery {
    pub fn is_empty(&self) -> bool {
        self.must.is_empty() && self.must_not.is_empty()
    }

    /// `{"bool": {"must": [...], "must_not": [...]}}`
    pub fn to_query(&self) -> Value {
        json!({
            "bool": {
                "must": self.must,
                "must_not": self.must_not
            }
        })
    }
}

/// Compose filters, queries and an optional time clause.
///
/// Negated filters go to `must_not`, all others to `must`, in input order and
/// stripped of their meta. Queries follow the filters in `must`, and the time
/// clause, when present, is the last element of `must`.
pub fn compose(filters: &[Filter], queries: &[Value], time: Option<&Value>) -> BoolQuery {
    let mut bool_query = BoolQuery::default();

    for filter in filters {
        let clause = filter.kind.to_query();
        if filter.meta.negate {
            bool_query.must_not.push(clause);
        } else {
            bool_query.must.push(clause);
        }
    }

    bool_query.must.extend(queries.iter().cloned());

    if let Some(time) = time {
        bool_query.must.push(time.clone());
    }

    bool_query
}

/// Compose a dashboard's effective state. The time clause is added only
/// when the dashboard's index pattern has a time field.
pub fn compose_state(
    state: &DashboardQueryState,
    time_field: Option<&str>,
    now: DateTime<Utc>,
) -> Result<BoolQuery> {
    let time = match (&state.time, time_field) {
        (Some(range), Some(field)) => Some(range.to_query(field, now)?),
        _ => None,
    };
    Ok(compose(&state.filters, &state.queries, time.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::TimeRange;
    use chrono::TimeZone;

    #[test]
    fn test_time_only() {
        let time = json!({ "range": { "@timestamp": { "gte": 1, "lte": 2 } } });
        let composed = compose(&[], &[], Some(&time));
        assert_eq!(composed.must, vec![time]);
        assert!(composed.must_not.is_empty());
    }

    #[test]
    fn test_partition_and_order() {
        let filters = vec![
            Filter::exists("a"),
            Filter::exists("b").negated(),
            Filter::query(json!({ "match": { "c": 1 } })).with_alias("c is 1"),
        ];
        let queries = vec![json!({ "query_string": { "query": "foo" } })];
        let time = json!({ "range": { "t": {} } });

        let composed = compose(&filters, &queries, Some(&time));
        assert_eq!(
            composed.must,
            vec![
                json!({ "exists": { "field": "a" } }),
                json!({ "match": { "c": 1 } }),
                queries[0].clone(),
                time,
            ]
        );
        assert_eq!(
            composed.must_not,
            vec![json!({ "exists": { "field": "b" } })]
        );
        assert!(!composed.to_query().to_string().contains("meta"));
    }

    #[test]
    fn test_match_all_sentinel() {
        assert!(Query::match_all().is_match_all());
        assert!(!Query::query_string("foo").is_match_all());
        assert_eq!(
            Query::match_all().as_value()["query_string"]["query"],
            "*"
        );
    }

    #[test]
    fn test_to_query_shape() {
        let composed = compose(&[Filter::exists("a").negated()], &[], None);
        assert_eq!(
            composed.to_query(),
            json!({ "bool": { "must": [], "must_not": [{ "exists": { "field": "a" } }] } })
        );
    }

    #[test]
    fn test_compose_state_needs_time_field() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let state = DashboardQueryState {
            filters: vec![Filter::exists("a")],
            queries: Vec::new(),
            time: Some(TimeRange::new("now-1h", "now")),
        };
        let without = compose_state(&state, None, now).unwrap();
        assert_eq!(without.must.len(), 1);

        let with = compose_state(&state, Some("@timestamp"), now).unwrap();
        assert_eq!(with.must.len(), 2);
        assert_eq!(
            with.must[1]["range"]["@timestamp"]["lte"],
            json!(now.timestamp_millis())
        );
    }
}
