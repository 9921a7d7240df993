//! relboard
//!
//! Outer shell around the relational dashboard core: configuration, the
//! HTTP multi-search client, a JSON-file saved-object source and the count
//! service wiring dashboard state to the batched count engine.

mod http;
mod init;
mod service;
mod source;

pub use http::HttpMsearchClient;
pub use init::{init_engine, init_tracing};
pub use service::{dashboard_context, CountOutcome, CountService, DashboardContext};
pub use source::JsonObjectSource;
