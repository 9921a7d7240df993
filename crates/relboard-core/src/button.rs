//! Relational buttons
//!
//! A button navigates from a source dashboard to a target dashboard through
//! one relation, and shows how many target documents are related to the
//! current selection on the source.

use serde::{Deserialize, Serialize};

use crate::filter::Filter;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationalButton {
    pub source_dashboard_id: String,
    pub target_dashboard_id: String,
    /// Relation id, `indexA/fieldA/indexB/fieldB`.
    pub relation: String,
    #[serde(default)]
    pub label: String,
}

impl RelationalButton {
    pub fn new(
        source_dashboard_id: impl Into<String>,
        target_dashboard_id: impl Into<String>,
        relation: impl Into<String>,
    ) -> Self {
        Self {
            source_dashboard_id: source_dashboard_id.into(),
            target_dashboard_id: target_dashboard_id.into(),
            relation: relation.into(),
            label: String::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Id used for the button's count request.
    pub fn count_id(&self) -> String {
        format!(
            "button:{}:{}:{}",
            self.source_dashboard_id, self.target_dashboard_id, self.relation
        )
    }

    /// The same relation walked the other way. Its count is the number of
    /// source documents related to the target's current selection.
    pub fn virtual_reverse(&self) -> Self {
        Self {
            source_dashboard_id: self.target_dashboard_id.clone(),
            target_dashboard_id: self.source_dashboard_id.clone(),
            relation: self.relation.clone(),
            label: format!("{} (reverse)", self.label).trim().to_string(),
        }
    }

    /// Same relation walked in the same direction, labels aside.
    pub fn same_direction(&self, other: &RelationalButton) -> bool {
        self.relation == other.relation
            && self.source_dashboard_id == other.source_dashboard_id
            && self.target_dashboard_id == other.target_dashboard_id
    }

    pub fn is_reverse_of(&self, other: &RelationalButton) -> bool {
        self.relation == other.relation
            && self.source_dashboard_id == other.target_dashboard_id
            && self.target_dashboard_id == other.source_dashboard_id
    }

    /// Filters of the target after navigating: its own filters without
    /// earlier join sequences, then the new join.
    pub fn target_filters(&self, target_filters: &[Filter], join: Filter) -> Vec<Filter> {
        let mut filters: Vec<Filter> = target_filters
            .iter()
            .filter(|f| !f.is_join_sequence())
            .cloned()
            .collect();
        filters.push(join);
        filters
    }
}

/// Buttons to count, each followed by its reverse when `symmetric`.
pub fn with_virtual_reverses(buttons: &[RelationalButton], symmetric: bool) -> Vec<RelationalButton> {
    let mut out: Vec<RelationalButton> = Vec::with_capacity(buttons.len() * 2);
    for button in buttons {
        if !out.iter().any(|b| b.same_direction(button)) {
            out.push(button.clone());
        }
        if symmetric && !out.iter().any(|b| b.is_reverse_of(button)) {
            out.push(button.virtual_reverse());
        }
    }
    out
}
