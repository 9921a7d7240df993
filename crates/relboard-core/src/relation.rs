//! Declared relations between index patterns
//!
//! A relation is a join key pair `domain.path <-> range.path`. Its id is built
//! from both endpoints in a fixed order, so the same relation declared in
//! either direction gets the same id.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{CoreError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelationEndpoint {
    #[serde(rename = "indexPatternId", alias = "index_pattern")]
    pub index_pattern: String,
    pub path: String,
}

impl RelationEndpoint {
    pub fn new(index_pattern: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            index_pattern: index_pattern.into(),
            path: path.into(),
        }
    }
}

/// Advanced join parameters forwarded to every step built from a relation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terms_encoding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_terms_per_shard: Option<u64>,
    /// Per-join timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_timeout: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub domain: RelationEndpoint,
    pub range: RelationEndpoint,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inverse_label: Option<String>,
    #[serde(default)]
    pub join: JoinParams,
}

impl Relation {
    pub fn new(domain: RelationEndpoint, range: RelationEndpoint) -> Self {
        Self {
            domain,
            range,
            label: None,
            inverse_label: None,
            join: JoinParams::default(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn id(&self) -> String {
        relation_id(&self.domain, &self.range)
    }

    /// Endpoints as `(source, target)` when walking from `source_index`.
    pub fn oriented_from(
        &self,
        source_index: &str,
    ) -> Option<(&RelationEndpoint, &RelationEndpoint)> {
        if self.domain.index_pattern == source_index {
            Some((&self.domain, &self.range))
        } else if self.range.index_pattern == source_index {
            Some((&self.range, &self.domain))
        } else {
            None
        }
    }

    pub fn connects(&self, a: &str, b: &str) -> bool {
        (self.domain.index_pattern == a && self.range.index_pattern == b)
            || (self.domain.index_pattern == b && self.range.index_pattern == a)
    }
}

/// `index/path/index/path` with the smaller endpoint first.
pub fn relation_id(a: &RelationEndpoint, b: &RelationEndpoint) -> String {
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    format!(
        "{}/{}/{}/{}",
        first.index_pattern, first.path, second.index_pattern, second.path
    )
}

/// All declared relations, indexed by id.
#[derive(Debug, Clone, Default)]
pub struct RelationRegistry {
    relations: Vec<Relation>,
    by_id: HashMap<String, usize>,
}

impl RelationRegistry {
    /// Duplicated ids are logged and the later declaration ignored.
    pub fn new(relations: impl IntoIterator<Item = Relation>) -> Self {
        let mut registry = Self::default();
        for relation in relations {
            let id = relation.id();
            if registry.by_id.contains_key(&id) {
                warn!(relation_id = %id, "Duplicate relation declaration ignored");
                continue;
            }
            registry.by_id.insert(id, registry.relations.len());
            registry.relations.push(relation);
        }
        registry
    }

    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    pub fn len(&self) -> usize {
        self.relations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Relation> {
        self.by_id.get(id).map(|&i| &self.relations[i])
    }

    pub fn between(&self, a: &str, b: &str) -> Vec<&Relation> {
        self.relations.iter().filter(|r| r.connects(a, b)).collect()
    }

    /// Resolve by explicit id when given, otherwise by the pair of indices.
    pub fn resolve(
        &self,
        explicit_id: Option<&str>,
        source_index: &str,
        target_index: &str,
    ) -> Result<&Relation> {
        if let Some(id) = explicit_id {
            let relation = self.get(id).ok_or_else(|| CoreError::RelationNotFound {
                what: format!("id '{}'", id),
            })?;
            if relation.oriented_from(source_index).is_none() {
                return Err(CoreError::RelationNotFound {
                    what: format!("id '{}' starting from index '{}'", id, source_index),
                });
            }
            return Ok(relation);
        }

        let candidates = self.between(source_index, target_index);
        match candidates.as_slice() {
            [] => Err(CoreError::RelationNotFound {
                what: format!("indices '{}' and '{}'", source_index, target_index),
            }),
            [only] => Ok(*only),
            many => Err(CoreError::AmbiguousRelation {
                left: source_index.to_string(),
                right: target_index.to_string(),
                candidates: many.iter().map(|r| r.id()).collect(),
            }),
        }
    }
}

/// Reference to a relation between two dashboards, as toggled in the
/// relational panel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationRef {
    pub dashboards: [String; 2],
    /// Relation id, `indexA/fieldA/indexB/fieldB`.
    pub relation: String,
}

impl RelationRef {
    pub fn new(a: impl Into<String>, b: impl Into<String>, relation: impl Into<String>) -> Self {
        Self {
            dashboards: [a.into(), b.into()],
            relation: relation.into(),
        }
    }

    /// `dashboardA/dashboardB/fieldA/fieldB`, with the (dashboard, field)
    /// pairs sorted. Index names do not take part.
    pub fn derived_id(&self) -> Result<String> {
        let parts: Vec<&str> = self.relation.split('/').collect();
        let [_, field_a, _, field_b] = parts.as_slice() else {
            return Err(CoreError::invalid_state(format!(
                "malformed relation id '{}'",
                self.relation
            )));
        };
        let mut pairs = [
            (self.dashboards[0].as_str(), *field_a),
            (self.dashboards[1].as_str(), *field_b),
        ];
        pairs.sort();
        Ok(format!(
            "{}/{}/{}/{}",
            pairs[0].0, pairs[1].0, pairs[0].1, pairs[1].1
        ))
    }
}

/// Enabled relation decoded from a derived id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnabledRelation {
    pub dashboards: [String; 2],
    pub fields: [String; 2],
}

impl EnabledRelation {
    pub fn parse(derived_id: &str) -> Option<Self> {
        let parts: Vec<&str> = derived_id.split('/').collect();
        let [dash_a, dash_b, field_a, field_b] = parts.as_slice() else {
            return None;
        };
        Some(Self {
            dashboards: [dash_a.to_string(), dash_b.to_string()],
            fields: [field_a.to_string(), field_b.to_string()],
        })
    }

    pub fn involves(&self, dashboard_id: &str) -> bool {
        self.dashboards.iter().any(|d| d == dashboard_id)
    }
}
