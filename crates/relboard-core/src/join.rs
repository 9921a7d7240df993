//! Join filters
//!
//! A `join_sequence` filter walks relations hop by hop from a source
//! dashboard to a target one. Each hop is a pair of steps; the first step of
//! the newest hop carries the source dashboard's state as sub-queries, the
//! last step of a sequence never does.
//!
//! A `join_set` relates one focus index to every other dashboard connected
//! through the enabled relations of the relational panel.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{CoreError, Result};
use crate::filter::{Filter, FilterKind};
use crate::index::IndexResolver;
use crate::query::compose_state;
use crate::relation::{relation_id, EnabledRelation, Relation, RelationEndpoint, RelationRegistry};
use crate::state::DashboardQueryState;

fn is_false(value: &bool) -> bool {
    !*value
}

/// One side of a hop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationStep {
    pub indices: Vec<String>,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queries: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terms_encoding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_terms_per_shard: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_timeout: Option<u64>,
}

impl RelationStep {
    pub fn new(indices: Vec<String>, path: impl Into<String>) -> Self {
        Self {
            indices,
            path: path.into(),
            queries: None,
            terms_encoding: None,
            max_terms_per_shard: None,
            task_timeout: None,
        }
    }

    fn with_join_params(mut self, relation: &Relation) -> Self {
        self.terms_encoding = relation.join.terms_encoding.clone();
        self.max_terms_per_shard = relation.join.max_terms_per_shard;
        self.task_timeout = relation.join.task_timeout;
        self
    }
}

/// `{"relation": [source, target], "negate": bool}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationHop {
    pub relation: [RelationStep; 2],
    #[serde(default, skip_serializing_if = "is_false")]
    pub negate: bool,
}

impl RelationHop {
    pub fn new(source: RelationStep, target: RelationStep) -> Self {
        Self {
            relation: [source, target],
            negate: false,
        }
    }
}

/// Sequences evaluated side by side, `{"group": [...], "negate": bool}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinGroup {
    pub group: Vec<JoinSequence>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub negate: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JoinElement {
    Relation(RelationHop),
    Group(JoinGroup),
}

impl JoinElement {
    fn set_negate(&mut self) {
        match self {
            JoinElement::Relation(hop) => hop.negate = true,
            JoinElement::Group(group) => group.negate = true,
        }
    }
}

pub type JoinSequence = Vec<JoinElement>;

/// Number of relation hops in a sequence, counting inside groups.
pub fn hop_count(sequence: &[JoinElement]) -> usize {
    sequence
        .iter()
        .map(|element| match element {
            JoinElement::Relation(_) => 1,
            JoinElement::Group(group) => group.group.iter().map(|s| hop_count(s)).sum(),
        })
        .sum()
}

/// Star join around `focus`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinSet {
    pub focus: String,
    pub relations: Vec<[RelationStep; 2]>,
    /// Filtering state of the non-focus indices, keyed by index pattern.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub queries: BTreeMap<String, Vec<Value>>,
}

/// A dashboard taking part in a join: its id, the index pattern of its saved
/// search and its effective state.
#[derive(Debug, Clone, Copy)]
pub struct JoinEndpoint<'a> {
    pub dashboard_id: &'a str,
    pub index_pattern: &'a str,
    pub state: &'a DashboardQueryState,
}

/// Builds join filters against a relation registry.
pub struct JoinFilterBuilder<'a, R: IndexResolver + ?Sized> {
    registry: &'a RelationRegistry,
    resolver: &'a R,
    now: DateTime<Utc>,
}

impl<'a, R: IndexResolver + ?Sized> JoinFilterBuilder<'a, R> {
    pub fn new(registry: &'a RelationRegistry, resolver: &'a R, now: DateTime<Utc>) -> Self {
        Self {
            registry,
            resolver,
            now,
        }
    }

    pub fn registry(&self) -> &RelationRegistry {
        self.registry
    }

    pub fn resolver(&self) -> &R {
        self.resolver
    }

    /// Instant relative time expressions are resolved against.
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Build the `join_sequence` filter for a hop from `source` to
    /// `target_index`.
    ///
    /// `existing` is the filter list carried into the new hop. Its
    /// `join_sequence` filters become the earlier hops of the result: a
    /// single one is extended, several are grouped in front of the new hop.
    /// A negated sequence marks its last element negated before being
    /// extended, and the result itself is never negated.
    pub fn build_sequence(
        &self,
        explicit_id: Option<&str>,
        source: &JoinEndpoint<'_>,
        target_index: &str,
        existing: &[Filter],
    ) -> Result<Filter> {
        let relation = self
            .registry
            .resolve(explicit_id, source.index_pattern, target_index)?;
        let (source_end, target_end) =
            relation
                .oriented_from(source.index_pattern)
                .ok_or_else(|| CoreError::RelationNotFound {
                    what: format!(
                        "relation '{}' from index '{}'",
                        relation.id(),
                        source.index_pattern
                    ),
                })?;

        let hop = JoinElement::Relation(RelationHop::new(
            self.source_step(source, source_end)?,
            self.target_step(target_end, relation)?,
        ));

        let mut previous: Vec<JoinSequence> = existing
            .iter()
            .filter_map(|filter| match &filter.kind {
                FilterKind::JoinSequence(sequence) => {
                    let mut sequence = sequence.clone();
                    if filter.meta.negate {
                        if let Some(last) = sequence.last_mut() {
                            last.set_negate();
                        }
                    }
                    Some(sequence)
                }
                _ => None,
            })
            .collect();

        let sequence = match previous.len() {
            0 => vec![hop],
            1 => {
                let mut sequence = previous.remove(0);
                sequence.push(hop);
                sequence
            }
            _ => vec![
                JoinElement::Group(JoinGroup {
                    group: previous,
                    negate: false,
                }),
                hop,
            ],
        };

        debug!(
            source = %source.dashboard_id,
            target_index = %target_index,
            relation = %relation.id(),
            hops = hop_count(&sequence),
            "Built join sequence"
        );

        let mut filter = Filter::join_sequence(sequence).with_index(target_index);
        if let Some(label) = &relation.label {
            filter = filter.with_alias(label.clone());
        }
        Ok(filter)
    }

    /// Build the `join_set` filter relating `focus` to the other dashboards
    /// through the enabled relations. Relations whose dashboards are not all
    /// among `focus` and `others` are skipped. Returns `None` when no
    /// relation applies.
    pub fn build_join_set(
        &self,
        focus: &JoinEndpoint<'_>,
        others: &[JoinEndpoint<'_>],
        enabled: &[EnabledRelation],
    ) -> Result<Option<Filter>> {
        let mut set = JoinSet {
            focus: focus.index_pattern.to_string(),
            relations: Vec::new(),
            queries: BTreeMap::new(),
        };

        for enabled_relation in enabled {
            let (Some(a), Some(b)) = (
                find_endpoint(focus, others, &enabled_relation.dashboards[0]),
                find_endpoint(focus, others, &enabled_relation.dashboards[1]),
            ) else {
                debug!(
                    dashboards = ?enabled_relation.dashboards,
                    "Skipping relation outside the join set"
                );
                continue;
            };
            let end_a = RelationEndpoint::new(a.index_pattern, &enabled_relation.fields[0]);
            let end_b = RelationEndpoint::new(b.index_pattern, &enabled_relation.fields[1]);
            let id = relation_id(&end_a, &end_b);
            let relation = self
                .registry
                .get(&id)
                .ok_or_else(|| CoreError::RelationNotFound {
                    what: format!("id '{}'", id),
                })?;

            set.relations.push([
                RelationStep::new(self.indices_for(a)?, end_a.path).with_join_params(relation),
                RelationStep::new(self.indices_for(b)?, end_b.path).with_join_params(relation),
            ]);

            for side in [a, b] {
                if side.dashboard_id == focus.dashboard_id
                    || set.queries.contains_key(side.index_pattern)
                {
                    continue;
                }
                let query = self.stripped_query(side)?;
                set.queries
                    .insert(side.index_pattern.to_string(), vec![query]);
            }
        }

        if set.relations.is_empty() {
            return Ok(None);
        }
        Ok(Some(Filter::join_set(set)))
    }

    /// Concrete indices of the endpoint for its own time range.
    pub(crate) fn indices_for(&self, endpoint: &JoinEndpoint<'_>) -> Result<Vec<String>> {
        let bounds = match &endpoint.state.time {
            Some(range) if self.resolver.time_field(endpoint.index_pattern).is_some() => {
                Some(range.bounds(self.now)?)
            }
            _ => None,
        };
        self.resolver.resolve(endpoint.index_pattern, bounds)
    }

    /// The endpoint's state as one bool query, join filters excluded.
    fn stripped_query(&self, endpoint: &JoinEndpoint<'_>) -> Result<Value> {
        let mut state = endpoint.state.clone();
        state
            .filters
            .retain(|f| !f.is_join_set() && !f.is_join_sequence());
        let time_field = self.resolver.time_field(endpoint.index_pattern);
        Ok(compose_state(&state, time_field.as_deref(), self.now)?.to_query())
    }

    fn source_step(
        &self,
        source: &JoinEndpoint<'_>,
        end: &RelationEndpoint,
    ) -> Result<RelationStep> {
        let mut step = RelationStep::new(self.indices_for(source)?, end.path.clone());
        step.queries = Some(vec![self.stripped_query(source)?]);
        Ok(step)
    }

    fn target_step(&self, end: &RelationEndpoint, relation: &Relation) -> Result<RelationStep> {
        let indices = self.resolver.resolve(&end.index_pattern, None)?;
        Ok(RelationStep::new(indices, end.path.clone()).with_join_params(relation))
    }
}

/// Whether any sub-query of `sequence` embeds a `join_set` clause.
pub fn contains_join_set(sequence: &[JoinElement]) -> bool {
    sequence.iter().any(|element| match element {
        JoinElement::Relation(hop) => hop
            .relation
            .iter()
            .flat_map(|step| step.queries.iter().flatten())
            .any(has_join_set_key),
        JoinElement::Group(group) => group.group.iter().any(|s| contains_join_set(s)),
    })
}

fn has_join_set_key(value: &Value) -> bool {
    match value {
        Value::Object(map) => map
            .iter()
            .any(|(key, inner)| key == "join_set" || has_join_set_key(inner)),
        Value::Array(items) => items.iter().any(has_join_set_key),
        _ => false,
    }
}

fn find_endpoint<'e, 'a>(
    focus: &'e JoinEndpoint<'a>,
    others: &'e [JoinEndpoint<'a>],
    dashboard_id: &str,
) -> Option<&'e JoinEndpoint<'a>> {
    std::iter::once(focus)
        .chain(others.iter())
        .find(|e| e.dashboard_id == dashboard_id)
}
