//! Relational dashboard core
//!
//! This crate holds the synchronous half of relboard: the shared dashboard
//! state store, query composition, relation lookup and join filter
//! building, dashboard group computation and count query construction.
//! Nothing here performs I/O.

mod button;
mod count;
mod error;
mod filter;
mod group;
mod index;
mod join;
mod query;
mod relation;
mod saved;
mod state;
mod time;

pub use button::{with_virtual_reverses, RelationalButton};
pub use count::{
    button_count_query, dashboard_count_query, extract_hit_count, extract_is_pruned, CountQuery,
};
pub use error::{CoreError, ErrorCode, Result};
pub use filter::{replace_join_set, Filter, FilterKind, FilterMeta};
pub use group::{
    compute_groups, dashboards_needing_counts, reconcile, slugify, DashboardGroup, GroupDashboard,
};
pub use index::{
    IdentityIndexResolver, IndexInterval, IndexPattern, IndexResolver, PatternIndexResolver,
};
pub use join::{
    contains_join_set, hop_count, JoinElement, JoinEndpoint, JoinFilterBuilder, JoinGroup,
    JoinSequence, JoinSet, RelationHop, RelationStep,
};
pub use query::{compose, compose_state, BoolQuery, Query};
pub use relation::{
    relation_id, EnabledRelation, JoinParams, Relation, RelationEndpoint, RelationRef,
    RelationRegistry,
};
pub use saved::{
    LogNotifier, Notifier, SavedDashboard, SavedDashboardGroup, SavedObjectSource, SavedSearch,
    SearchSource,
};
pub use state::{DashboardQueryState, DashboardStateStore, StateChange, StateKey};
pub use time::{parse_date_math, range_query, TimeMode, TimeRange};
