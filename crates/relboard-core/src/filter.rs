//! Dashboard filters
//!
//! A filter is one of a closed set of kinds plus optional metadata. On the
//! wire it is a single JSON object: `{"meta": {...}, "<kind>": payload}`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::join::{JoinSequence, JoinSet};

fn is_false(value: &bool) -> bool {
    !*value
}

/// Filter metadata. Never sent to the backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterMeta {
    #[serde(default, skip_serializing_if = "is_false")]
    pub negate: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub disabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub pinned: bool,
    /// Index pattern the filter was created against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    Query(Value),
    Range(Value),
    Exists(Value),
    Missing(Value),
    Script(Value),
    GeoBoundingBox(Value),
    Dbfilter(Value),
    Or(Value),
    JoinSet(JoinSet),
    JoinSequence(JoinSequence),
}

impl FilterKind {
    pub fn name(&self) -> &'static str {
        match self {
            FilterKind::Query(_) => "query",
            FilterKind::Range(_) => "range",
            FilterKind::Exists(_) => "exists",
            FilterKind::Missing(_) => "missing",
            FilterKind::Script(_) => "script",
            FilterKind::GeoBoundingBox(_) => "geo_bounding_box",
            FilterKind::Dbfilter(_) => "dbfilter",
            FilterKind::Or(_) => "or",
            FilterKind::JoinSet(_) => "join_set",
            FilterKind::JoinSequence(_) => "join_sequence",
        }
    }

    /// Backend query clause for this filter. `query` envelopes unwrap to
    /// their content; every other kind keeps its `{kind: payload}` shape.
    pub fn to_query(&self) -> Value {
        match self {
            FilterKind::Query(inner) => inner.clone(),
            FilterKind::Range(payload)
            | FilterKind::Exists(payload)
            | FilterKind::Missing(payload)
            | FilterKind::Script(payload)
            | FilterKind::GeoBoundingBox(payload)
            | FilterKind::Dbfilter(payload)
            | FilterKind::Or(payload) => json!({ self.name(): payload }),
            FilterKind::JoinSet(set) => json!({ "join_set": set }),
            FilterKind::JoinSequence(sequence) => json!({ "join_sequence": sequence }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default)]
    pub meta: FilterMeta,
    #[serde(flatten)]
    pub kind: FilterKind,
}

impl Filter {
    pub fn new(kind: FilterKind) -> Self {
        Self {
            meta: FilterMeta::default(),
            kind,
        }
    }

    /// `{"query": {"match": {field: value}}}`
    pub fn term(field: &str, value: impl Into<Value>) -> Self {
        Self::new(FilterKind::Query(json!({
            "match": { field: { "query": value.into(), "type": "phrase" } }
        })))
    }

    pub fn query(inner: Value) -> Self {
        Self::new(FilterKind::Query(inner))
    }

    pub fn range(field: &str, bounds: Value) -> Self {
        Self::new(FilterKind::Range(json!({ field: bounds })))
    }

    pub fn exists(field: &str) -> Self {
        Self::new(FilterKind::Exists(json!({ "field": field })))
    }

    pub fn join_sequence(sequence: JoinSequence) -> Self {
        Self::new(FilterKind::JoinSequence(sequence))
    }

    pub fn join_set(set: JoinSet) -> Self {
        Self::new(FilterKind::JoinSet(set))
    }

    pub fn negated(mut self) -> Self {
        self.meta.negate = true;
        self
    }

    pub fn pinned(mut self) -> Self {
        self.meta.pinned = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.meta.disabled = true;
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.meta.alias = Some(alias.into());
        self
    }

    pub fn with_index(mut self, index: impl Into<String>) -> Self {
        self.meta.index = Some(index.into());
        self
    }

    pub fn is_join_set(&self) -> bool {
        matches!(self.kind, FilterKind::JoinSet(_))
    }

    pub fn is_join_sequence(&self) -> bool {
        matches!(self.kind, FilterKind::JoinSequence(_))
    }

    /// Same condition with the same polarity, ignoring the rest of the meta.
    pub fn same_condition(&self, other: &Filter) -> bool {
        self.meta.negate == other.meta.negate && self.kind == other.kind
    }
}

/// Keep at most one `join_set`: drop all existing ones and append `join_set`.
pub fn replace_join_set(filters: &mut Vec<Filter>, join_set: Option<Filter>) {
    filters.retain(|f| !f.is_join_set());
    if let Some(join_set) = join_set {
        filters.push(join_set);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::join::{JoinElement, RelationHop, RelationStep};

    #[test]
    fn test_filter_wire_shape() {
        let filter = Filter::exists("price").negated().with_alias("has price");
        let value = serde_json::to_value(&filter).unwrap();
        assert_eq!(
            value,
            json!({
                "meta": { "negate": true, "alias": "has price" },
                "exists": { "field": "price" }
            })
        );

        let back: Filter = serde_json::from_value(value).unwrap();
        assert_eq!(back, filter);
    }

    #[test]
    fn test_filter_without_meta_and_unknown_keys() {
        let filter: Filter = serde_json::from_value(json!({
            "range": { "age": { "gte": 18 } },
            "$state": { "store": "appState" }
        }))
        .unwrap();
        assert_eq!(filter.meta, FilterMeta::default());
        assert_eq!(filter.kind.name(), "range");
    }

    #[test]
    fn test_to_query_unwraps_query_envelope() {
        let filter = Filter::query(json!({ "match_all": {} }));
        assert_eq!(filter.kind.to_query(), json!({ "match_all": {} }));

        let filter = Filter::range("age", json!({ "gte": 18 }));
        assert_eq!(
            filter.kind.to_query(),
            json!({ "range": { "age": { "gte": 18 } } })
        );
    }

    #[test]
    fn test_join_sequence_kind_round_trips() {
        let step = |index: &str, path: &str| RelationStep::new(vec![index.to_string()], path);
        let filter = Filter::join_sequence(vec![JoinElement::Relation(RelationHop::new(
            step("companies", "id"),
            step("articles", "company_id"),
        ))]);
        let value = serde_json::to_value(&filter).unwrap();
        assert!(value["join_sequence"][0]["relation"].is_array());
        let back: Filter = serde_json::from_value(value).unwrap();
        assert!(back.is_join_sequence());
        assert_eq!(back, filter);
    }

    #[test]
    fn test_replace_join_set_keeps_one() {
        let set = |focus: &str| {
            Filter::join_set(JoinSet {
                focus: focus.to_string(),
                relations: Vec::new(),
                queries: Default::default(),
            })
        };
        let mut filters = vec![set("a"), Filter::exists("x"), set("b")];
        replace_join_set(&mut filters, Some(set("c")));
        assert_eq!(filters.iter().filter(|f| f.is_join_set()).count(), 1);
        assert_eq!(filters.len(), 2);
        assert!(matches!(&filters[1].kind, FilterKind::JoinSet(s) if s.focus == "c"));
    }
}
