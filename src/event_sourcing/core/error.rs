use uuid::Uuid;

// ============================================================================
// Error Taxonomy - Event Sourcing Failures
// ============================================================================
//
// Every backend error is classified into one of these kinds before it leaves
// the store. The repository never swallows them and never retries on its own.
//
// ============================================================================

pub type Result<T, E = EsError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum EsError {
    /// A domain invariant rejected a command. Nothing was applied.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The stream moved on since the writer loaded it. Reload and retry.
    #[error(
        "concurrency violation on stream {stream_id}: expected version {expected:?}, actual {actual}"
    )]
    ConcurrencyViolation {
        stream_id: String,
        expected: Option<i64>,
        actual: i64,
    },

    #[error("aggregate not found: {aggregate_type} {aggregate_id}")]
    AggregateNotFound {
        aggregate_type: String,
        aggregate_id: String,
    },

    /// No factory delegate for a stored event name. Configuration error.
    #[error("no event factory registered for event type \"{0}\"")]
    EventNotFound(String),

    /// An event id passed to a link or lookup does not exist in the store.
    #[error("event {0} does not exist")]
    UnknownEvent(Uuid),

    #[error("event store rejected the credentials")]
    Unauthorized(#[source] anyhow::Error),

    /// Transient backend failure, safe to retry with backoff.
    #[error("event store unavailable")]
    Unavailable(#[source] anyhow::Error),

    #[error("operation cancelled or timed out")]
    Cancelled,

    #[error("event serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Usage(#[from] UsageError),

    #[error("unexpected event store error: {0}")]
    Unexpected(#[source] anyhow::Error),
}

/// Caller mistakes, raised synchronously at the offending call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UsageError {
    #[error("a delegate is already registered for \"{0}\"")]
    AlreadyRegistered(String),

    #[error("there is no stream name delegate for aggregate of type \"{0}\"")]
    NoDelegate(String),

    #[error("to_time requires from_time")]
    ToTimeWithoutFromTime,

    #[error("to_id requires from_id")]
    ToIdWithoutFromId,

    #[error("stream id cannot be empty")]
    EmptyStreamId,

    #[error("read query must be scoped to a stream")]
    MissingStream,
}

impl EsError {
    pub fn unexpected(err: impl Into<anyhow::Error>) -> Self {
        Self::Unexpected(err.into())
    }

    pub fn is_concurrency_violation(&self) -> bool {
        matches!(self, Self::ConcurrencyViolation { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::AggregateNotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concurrency_violation_message() {
        let err = EsError::ConcurrencyViolation {
            stream_id: "order#42".to_string(),
            expected: Some(2),
            actual: 3,
        };

        assert!(err.is_concurrency_violation());
        assert_eq!(
            err.to_string(),
            "concurrency violation on stream order#42: expected version Some(2), actual 3"
        );
    }

    #[test]
    fn test_usage_error_is_transparent() {
        let err: EsError = UsageError::NoDelegate("Order".to_string()).into();
        assert_eq!(
            err.to_string(),
            "there is no stream name delegate for aggregate of type \"Order\""
        );
    }

    #[test]
    fn test_unexpected_keeps_cause() {
        let err = EsError::unexpected(anyhow::anyhow!("disk on fire"));
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("disk on fire"));
    }
}
