//! Error types for the relboard core crate

use thiserror::Error;

/// Error codes for programmatic handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// E101: Relation missing for a join or button
    E101RelationNotFound,
    /// E102: More than one relation matches a pair of indices
    E102AmbiguousRelation,
    /// E103: Dashboard group references a dashboard that does not exist
    E103MissingDashboard,
    /// E104: Persisted dashboard state could not be decoded
    E104InvalidState,
    /// E105: Unparseable time expression
    E105InvalidTime,
    /// E106: Saved object could not be parsed
    E106InvalidSavedObject,
    /// E107: Index pattern unknown to the resolver
    E107UnknownIndexPattern,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::E101RelationNotFound => "E101",
            Self::E102AmbiguousRelation => "E102",
            Self::E103MissingDashboard => "E103",
            Self::E104InvalidState => "E104",
            Self::E105InvalidTime => "E105",
            Self::E106InvalidSavedObject => "E106",
            Self::E107UnknownIndexPattern => "E107",
        }
    }
}

/// Errors raised by state, join and group computation.
///
/// All variants are configuration or data errors: they are reported to the
/// user and the operation is aborted, never retried.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("[E101] No relation found for {what}")]
    RelationNotFound { what: String },

    #[error("[E102] Ambiguous relation between '{left}' and '{right}': {candidates:?}")]
    AmbiguousRelation {
        left: String,
        right: String,
        candidates: Vec<String>,
    },

    #[error("[E103] Dashboard group '{group}' references missing dashboard '{dashboard}'")]
    MissingDashboard { group: String, dashboard: String },

    #[error("[E104] Invalid dashboard state: {message}")]
    InvalidState { message: String },

    #[error("[E105] Invalid time expression '{input}': {reason}")]
    InvalidTime { input: String, reason: String },

    #[error("[E106] Could not parse saved object '{id}': {reason}")]
    InvalidSavedObject { id: String, reason: String },

    #[error("[E107] Unknown index pattern '{id}'")]
    UnknownIndexPattern { id: String },
}

impl CoreError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::RelationNotFound { .. } => ErrorCode::E101RelationNotFound,
            Self::AmbiguousRelation { .. } => ErrorCode::E102AmbiguousRelation,
            Self::MissingDashboard { .. } => ErrorCode::E103MissingDashboard,
            Self::InvalidState { .. } => ErrorCode::E104InvalidState,
            Self::InvalidTime { .. } => ErrorCode::E105InvalidTime,
            Self::InvalidSavedObject { .. } => ErrorCode::E106InvalidSavedObject,
            Self::UnknownIndexPattern { .. } => ErrorCode::E107UnknownIndexPattern,
        }
    }

    pub(crate) fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_time(input: &str, reason: impl Into<String>) -> Self {
        Self::InvalidTime {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for CoreError
pub type Result<T> = std::result::Result<T, CoreError>;
