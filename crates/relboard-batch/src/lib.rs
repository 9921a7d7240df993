//! Batched count queries
//!
//! Count requests from dashboard tabs and relational buttons are queued per
//! strategy, coalesced by a debounce timer, sent as multi-search batches,
//! cached, retried on failure and dropped when superseded.

mod cache;
mod debounce;
mod engine;
mod error;
mod msearch;
mod strategy;

pub use cache::CountCache;
pub use debounce::Debouncer;
pub use engine::{
    CountCallback, CountEngine, CountResult, EngineConfig, MetaDefinition, QueueStats,
};
pub use error::{BatchError, CountError, ErrorCode, Result};
pub use msearch::{build_request, parse_response, slot_error, MsearchClient, MsearchRequest};
pub use strategy::{Strategy, BUTTONS, TABS};
