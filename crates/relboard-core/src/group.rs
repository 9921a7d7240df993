//! Dashboard groups
//!
//! Groups are computed in two phases: declared groups first, then one
//! singleton group for every dashboard no declared group contains. Within a
//! group the selected dashboard is, in order of preference, the current one,
//! the last one selected for that group, or the first member.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{CoreError, Result};
use crate::saved::{Notifier, SavedDashboard, SavedDashboardGroup};
use crate::state::DashboardStateStore;

/// Priority gap between consecutive synthesized groups.
const PRIORITY_STEP: i64 = 10;

/// A dashboard as shown in a tab group, with its transient display fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupDashboard {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saved_search_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    pub is_pruned: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_icon_message: Option<String>,
}

impl From<&SavedDashboard> for GroupDashboard {
    fn from(dashboard: &SavedDashboard) -> Self {
        Self {
            id: dashboard.id.clone(),
            title: dashboard.title.clone(),
            saved_search_id: dashboard.saved_search_id.clone(),
            count: None,
            is_pruned: false,
            filter_icon_message: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardGroup {
    pub id: String,
    pub title: String,
    pub priority: i64,
    pub dashboards: Vec<GroupDashboard>,
    /// Id of the selected member.
    pub selected: String,
    pub active: bool,
}

impl DashboardGroup {
    pub fn contains(&self, dashboard_id: &str) -> bool {
        self.dashboards.iter().any(|d| d.id == dashboard_id)
    }

    pub fn selected_dashboard(&self) -> Option<&GroupDashboard> {
        self.dashboards.iter().find(|d| d.id == self.selected)
    }
}

/// Compute the tab groups.
///
/// A declared group naming a dashboard that does not exist fails the whole
/// computation. A group id declared twice is reported through `notifier`
/// and the later declaration is ignored. Declared groups without members
/// are skipped the same way.
pub fn compute_groups(
    declared: &[SavedDashboardGroup],
    dashboards: &[SavedDashboard],
    current_dashboard: Option<&str>,
    store: &DashboardStateStore,
    notifier: &dyn Notifier,
) -> Result<Vec<DashboardGroup>> {
    let by_id: HashMap<&str, &SavedDashboard> =
        dashboards.iter().map(|d| (d.id.as_str(), d)).collect();

    // Phase 1: declared groups
    let mut groups: Vec<DashboardGroup> = Vec::with_capacity(declared.len());
    let mut group_ids: HashSet<String> = HashSet::new();
    let mut placed: HashSet<&str> = HashSet::new();

    for declaration in declared {
        if group_ids.contains(&declaration.id) {
            let message = format!(
                "Dashboard group '{}' is declared more than once, ignoring the duplicate",
                declaration.id
            );
            warn!(group = %declaration.id, "Duplicate dashboard group");
            notifier.warning(&message);
            continue;
        }

        let mut members = Vec::with_capacity(declaration.dashboards.len());
        for dashboard_id in &declaration.dashboards {
            let dashboard =
                by_id
                    .get(dashboard_id.as_str())
                    .ok_or_else(|| CoreError::MissingDashboard {
                        group: declaration.id.clone(),
                        dashboard: dashboard_id.clone(),
                    })?;
            if members.iter().any(|m: &GroupDashboard| m.id == dashboard.id) {
                continue;
            }
            members.push(GroupDashboard::from(*dashboard));
            placed.insert(dashboard.id.as_str());
        }

        if members.is_empty() {
            warn!(group = %declaration.id, "Skipping dashboard group without dashboards");
            notifier.warning(&format!(
                "Dashboard group '{}' has no dashboards",
                declaration.id
            ));
            continue;
        }

        group_ids.insert(declaration.id.clone());
        groups.push(DashboardGroup {
            id: declaration.id.clone(),
            title: declaration.title.clone(),
            priority: declaration.priority,
            dashboards: members,
            selected: String::new(),
            active: false,
        });
    }

    // Phase 2: singleton groups for the rest
    let mut priority = groups.iter().map(|g| g.priority).max().unwrap_or(0);
    for dashboard in dashboards {
        if placed.contains(dashboard.id.as_str()) {
            continue;
        }
        priority += PRIORITY_STEP;
        let id = unique_id(slugify(&dashboard.title, &dashboard.id), &group_ids);
        group_ids.insert(id.clone());
        placed.insert(dashboard.id.as_str());
        groups.push(DashboardGroup {
            id,
            title: dashboard.title.clone(),
            priority,
            dashboards: vec![GroupDashboard::from(dashboard)],
            selected: String::new(),
            active: false,
        });
    }

    groups.sort_by_key(|g| g.priority);

    for group in &mut groups {
        group.selected = select_dashboard(group, current_dashboard, store);
    }
    let active = current_dashboard
        .and_then(|current| groups.iter().position(|g| g.contains(current)))
        .unwrap_or(0);
    if let Some(group) = groups.get_mut(active) {
        group.active = true;
    }

    debug!(
        groups = groups.len(),
        dashboards = dashboards.len(),
        "Computed dashboard groups"
    );
    Ok(groups)
}

fn select_dashboard(
    group: &DashboardGroup,
    current_dashboard: Option<&str>,
    store: &DashboardStateStore,
) -> String {
    current_dashboard
        .filter(|current| group.contains(current))
        .or_else(|| {
            store
                .selected_dashboard_id(&group.id)
                .filter(|last| group.contains(last))
        })
        .or_else(|| group.dashboards.first().map(|d| d.id.as_str()))
        .unwrap_or_default()
        .to_string()
}

/// Lowercase, alphanumerics kept, every other run of characters becomes a
/// single `-`. Falls back to `fallback` when nothing is left.
pub fn slugify(title: &str, fallback: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for c in title.chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            slug.push(c);
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        fallback.to_string()
    } else {
        slug
    }
}

fn unique_id(base: String, taken: &HashSet<String>) -> String {
    if !taken.contains(&base) {
        return base;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{}-{}", base, n);
        if !taken.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Merge freshly computed groups with the previous ones: counts, pruned
/// flags and filter messages survive for dashboards that are still shown.
/// Groups missing from `next` are gone from the result.
pub fn reconcile(previous: &[DashboardGroup], next: Vec<DashboardGroup>) -> Vec<DashboardGroup> {
    let transient: HashMap<(&str, &str), &GroupDashboard> = previous
        .iter()
        .flat_map(|g| g.dashboards.iter().map(move |d| ((g.id.as_str(), d.id.as_str()), d)))
        .collect();
    let by_dashboard: HashMap<&str, &GroupDashboard> = previous
        .iter()
        .flat_map(|g| g.dashboards.iter().map(|d| (d.id.as_str(), d)))
        .collect();

    next.into_iter()
        .map(|mut group| {
            for dashboard in &mut group.dashboards {
                let old = transient
                    .get(&(group.id.as_str(), dashboard.id.as_str()))
                    .or_else(|| by_dashboard.get(dashboard.id.as_str()));
                if let Some(old) = old {
                    dashboard.count = old.count;
                    dashboard.is_pruned = old.is_pruned;
                    dashboard.filter_icon_message = old.filter_icon_message.clone();
                }
            }
            group
        })
        .collect()
}

/// Dashboards whose counts the tabs show: the selected one of every group.
pub fn dashboards_needing_counts(groups: &[DashboardGroup]) -> Vec<&str> {
    groups
        .iter()
        .filter(|g| !g.selected.is_empty())
        .map(|g| g.selected.as_str())
        .collect()
}
