//! Multi-search payloads
//!
//! A batch goes out as one newline-delimited body of `header\nbody\n` pairs.
//! The response lists one slot per pair, in request order.

use async_trait::async_trait;
use relboard_core::CountQuery;
use serde_json::Value;

use crate::error::{BatchError, Result};

const TASK_TIMEOUT: &str = "task_timeout";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsearchRequest {
    pub body: String,
    /// Largest per-join timeout found in the batched queries, in
    /// milliseconds. Sent once as a URL parameter.
    pub task_timeout: Option<u64>,
    pub len: usize,
}

/// Backend multi-search endpoint.
#[async_trait]
pub trait MsearchClient: Send + Sync {
    /// Send one batch and return the raw JSON response.
    async fn msearch(&self, request: MsearchRequest) -> Result<Value>;
}

pub fn build_request<'a>(queries: impl IntoIterator<Item = &'a CountQuery>) -> MsearchRequest {
    let mut body = String::new();
    let mut task_timeout: Option<u64> = None;
    let mut len = 0;
    for query in queries {
        body.push_str(&query.to_lines());
        if let Some(found) = max_task_timeout(&query.body) {
            task_timeout = Some(task_timeout.map_or(found, |t| t.max(found)));
        }
        len += 1;
    }
    MsearchRequest {
        body,
        task_timeout,
        len,
    }
}

/// Largest `task_timeout` anywhere inside `value`.
fn max_task_timeout(value: &Value) -> Option<u64> {
    match value {
        Value::Object(map) => map
            .iter()
            .filter_map(|(key, inner)| {
                if key == TASK_TIMEOUT {
                    inner
                        .as_u64()
                        .or_else(|| inner.as_str().and_then(|s| s.parse().ok()))
                } else {
                    max_task_timeout(inner)
                }
            })
            .max(),
        Value::Array(items) => items.iter().filter_map(max_task_timeout).max(),
        _ => None,
    }
}

/// Response slots in request order. Accepts a bare array or the usual
/// `{"responses": [...]}` envelope.
pub fn parse_response(response: Value) -> Result<Vec<Value>> {
    match response {
        Value::Array(slots) => Ok(slots),
        Value::Object(mut map) => match map.remove("responses") {
            Some(Value::Array(slots)) => Ok(slots),
            _ => Err(BatchError::InvalidResponse {
                message: "expected a 'responses' array".to_string(),
            }),
        },
        other => Err(BatchError::InvalidResponse {
            message: format!("unexpected response type: {}", type_name(&other)),
        }),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Error reported by the backend for one slot.
pub fn slot_error(slot: &Value) -> Option<String> {
    let error = slot.get("error")?;
    if error.is_null() {
        return None;
    }
    Some(
        error
            .get("reason")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string()),
    )
}
