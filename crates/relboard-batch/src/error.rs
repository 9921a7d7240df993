//! Error types for the count batching crate

use thiserror::Error;

/// Error codes for programmatic handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// E201: Count definition without an id or a query
    E201InvalidDefinition,
    /// E202: Strategy parameters out of range
    E202InvalidStrategy,
    /// E203: Strategy name not configured
    E203UnknownStrategy,
    /// E204: Bulk request failed in transit
    E204Transport,
    /// E205: Bulk response could not be read
    E205InvalidResponse,
    /// E206: Count failed after every retry
    E206RetriesExhausted,
    /// E207: Backend reported an error for one query
    E207BackendRejected,
    /// E208: Bulk response had no slot for a query
    E208MissingResponse,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::E201InvalidDefinition => "E201",
            Self::E202InvalidStrategy => "E202",
            Self::E203UnknownStrategy => "E203",
            Self::E204Transport => "E204",
            Self::E205InvalidResponse => "E205",
            Self::E206RetriesExhausted => "E206",
            Self::E207BackendRejected => "E207",
            Self::E208MissingResponse => "E208",
        }
    }
}

/// Errors returned by the engine and the multi-search client.
#[derive(Debug, Clone, Error)]
pub enum BatchError {
    #[error("[E201] Invalid count definition: {reason}")]
    InvalidDefinition { reason: String },

    #[error("[E202] Invalid strategy '{name}': {reason}")]
    InvalidStrategy { name: String, reason: String },

    #[error("[E203] Unknown strategy '{name}'")]
    UnknownStrategy { name: String },

    #[error("[E204] Multi-search request failed: {message}")]
    Transport { message: String },

    #[error("[E205] Invalid multi-search response: {message}")]
    InvalidResponse { message: String },
}

impl BatchError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidDefinition { .. } => ErrorCode::E201InvalidDefinition,
            Self::InvalidStrategy { .. } => ErrorCode::E202InvalidStrategy,
            Self::UnknownStrategy { .. } => ErrorCode::E203UnknownStrategy,
            Self::Transport { .. } => ErrorCode::E204Transport,
            Self::InvalidResponse { .. } => ErrorCode::E205InvalidResponse,
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_strategy(name: &str, reason: impl Into<String>) -> Self {
        Self::InvalidStrategy {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

/// Error delivered to a count callback.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CountError {
    #[error("[E206] Count failed after {attempts} attempt(s): {message}")]
    RetriesExhausted { attempts: u32, message: String },

    #[error("[E207] Backend rejected the count query: {reason}")]
    BackendRejected { reason: String },

    #[error("[E208] No response for the count query")]
    MissingResponse,
}

impl CountError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::RetriesExhausted { .. } => ErrorCode::E206RetriesExhausted,
            Self::BackendRejected { .. } => ErrorCode::E207BackendRejected,
            Self::MissingResponse => ErrorCode::E208MissingResponse,
        }
    }
}

pub type Result<T> = std::result::Result<T, BatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_carry_codes() {
        let err = BatchError::transport("connection refused");
        assert_eq!(err.code().as_str(), "E204");
        assert!(err.to_string().starts_with("[E204]"));

        let err = CountError::RetriesExhausted {
            attempts: 3,
            message: "timeout".to_string(),
        };
        assert_eq!(err.code(), ErrorCode::E206RetriesExhausted);
        assert!(err.to_string().contains("3 attempt(s)"));
    }
}
