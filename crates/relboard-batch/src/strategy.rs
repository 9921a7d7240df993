use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{BatchError, Result};

/// Strategy for dashboard tab counts.
pub const TABS: &str = "tabs";
/// Strategy for relational button counts.
pub const BUTTONS: &str = "buttons";

/// Batching parameters of one count queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Strategy {
    pub name: String,
    /// Most requests sent in one multi-search call.
    pub batch_size: usize,
    /// Most multi-search calls in flight at once.
    pub parallel_requests: usize,
    /// Retries of a failed request before its callback gets an error.
    pub retry_on_error: u32,
    /// Pause before the first retry, doubled for each later one.
    #[serde(default, with = "millis", skip_serializing_if = "Option::is_none")]
    pub retry_backoff: Option<Duration>,
}

impl Strategy {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            batch_size: 2,
            parallel_requests: 1,
            retry_on_error: 1,
            retry_backoff: None,
        }
    }

    pub fn tabs() -> Self {
        Self::new(TABS)
    }

    pub fn buttons() -> Self {
        Self::new(BUTTONS)
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_parallel_requests(mut self, parallel_requests: usize) -> Self {
        self.parallel_requests = parallel_requests;
        self
    }

    pub fn with_retry_on_error(mut self, retry_on_error: u32) -> Self {
        self.retry_on_error = retry_on_error;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = Some(backoff);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(BatchError::invalid_strategy(&self.name, "name must not be empty"));
        }
        if self.batch_size == 0 {
            return Err(BatchError::invalid_strategy(&self.name, "batch_size must be > 0"));
        }
        if self.parallel_requests == 0 {
            return Err(BatchError::invalid_strategy(
                &self.name,
                "parallel_requests must be > 0",
            ));
        }
        if self.batch_size > 100 {
            warn!(
                strategy = %self.name,
                batch_size = self.batch_size,
                "Very large batch size, single multi-search calls may time out"
            );
        }
        Ok(())
    }

    /// Wait before retry number `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Option<Duration> {
        let base = self.retry_backoff?;
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        Some(base.saturating_mul(factor))
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(duration) => serializer.serialize_u64(duration.as_millis() as u64),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate() {
        assert!(Strategy::tabs().validate().is_ok());
        assert!(Strategy::tabs().with_batch_size(0).validate().is_err());
        assert!(Strategy::buttons()
            .with_parallel_requests(0)
            .validate()
            .is_err());
        assert!(Strategy::new(" ").validate().is_err());
    }

    #[test]
    fn test_backoff_doubles() {
        let strategy = Strategy::tabs().with_retry_backoff(Duration::from_millis(100));
        assert_eq!(strategy.backoff_for(1), Some(Duration::from_millis(100)));
        assert_eq!(strategy.backoff_for(2), Some(Duration::from_millis(200)));
        assert_eq!(strategy.backoff_for(4), Some(Duration::from_millis(800)));
        assert_eq!(Strategy::tabs().backoff_for(1), None);
    }

    #[test]
    fn test_deserialize_with_millis() {
        let strategy: Strategy = serde_json::from_str(
            r#"{"name": "tabs", "batch_size": 4, "parallel_requests": 2, "retry_on_error": 0, "retry_backoff": 250}"#,
        )
        .unwrap();
        assert_eq!(strategy.retry_backoff, Some(Duration::from_millis(250)));
        assert_eq!(strategy.batch_size, 4);
    }
}
