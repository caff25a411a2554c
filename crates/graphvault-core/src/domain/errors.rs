//! Engine error taxonomy
//!
//! Unlike adapter-level code, the engine does not collapse failures into an
//! opaque error chain: the storage layer and the enumerator branch on the
//! kind of failure (retry, re-auth, full re-enumeration, abort), so each kind
//! is a distinct variant.

use thiserror::Error;

/// Errors produced by the backup engine and its transport
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Network failure, server 5xx, or rate limiting. Retried with backoff
    /// by the transport; escalated after the retry cap.
    #[error("transport failure{}: {message}", status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Transport {
        /// HTTP status, when one was received
        status: Option<u16>,
        message: String,
    },

    /// Credential or pre-signed URL expiry. Per-item downloads attempt a
    /// single refresh; anything else surfaces to the caller.
    #[error("authorization expired: {0}")]
    AuthExpired(String),

    /// The server invalidated the delta token. Recovered locally by
    /// restarting the enumeration from an empty token.
    #[error("delta token invalidated, full re-enumeration required: {0}")]
    ResyncRequired(String),

    /// Malformed server response (missing id, missing parent reference).
    /// Recorded per item; does not abort the run unless fail-fast is set.
    #[error("malformed item: {0}")]
    Validation(String),

    /// An engine-internal invariant was violated. Always aborts the run.
    #[error("internal consistency violation: {0}")]
    Consistency(String),

    /// Previously persisted enumeration state contradicts itself.
    /// Aborts the owner/category, forcing a full backup on retry.
    #[error("persisted metadata conflict: {0}")]
    MetadataConflict(String),

    /// The merger could not find the expected entry in a prior base.
    #[error("missing base entry: {0}")]
    MissingBase(String),

    /// The merger found zero or multiple candidate bases for an item.
    #[error("base configuration error: {0}")]
    Configuration(String),

    /// Persisted metadata could not be decoded.
    #[error("deserializing metadata: {0}")]
    Deserialization(String),

    /// The run's cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,

    /// A domain identifier failed validation.
    #[error("invalid id: {0}")]
    InvalidId(String),

    /// A repo path failed validation or parsing.
    #[error("invalid path: {0}")]
    InvalidPath(String),
}

impl EngineError {
    /// True for failures the transport should retry with backoff.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { status, .. } => match status {
                Some(s) => *s == 429 || (500..=599).contains(s),
                // No status at all means the request never completed
                // (connect/read failure), which is worth retrying.
                None => true,
            },
            _ => false,
        }
    }

    /// True when the failure indicates an expired credential or URL.
    #[must_use]
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Self::AuthExpired(_))
    }

    /// True when the server told us the delta token is unusable.
    #[must_use]
    pub fn is_resync_required(&self) -> bool {
        matches!(self, Self::ResyncRequired(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_5xx_is_transient() {
        let err = EngineError::Transport {
            status: Some(503),
            message: "service unavailable".into(),
        };
        assert!(err.is_transient());
    }

    #[test]
    fn transport_429_is_transient() {
        let err = EngineError::Transport {
            status: Some(429),
            message: "throttled".into(),
        };
        assert!(err.is_transient());
    }

    #[test]
    fn transport_4xx_is_not_transient() {
        let err = EngineError::Transport {
            status: Some(404),
            message: "not found".into(),
        };
        assert!(!err.is_transient());
    }

    #[test]
    fn network_failure_without_status_is_transient() {
        let err = EngineError::Transport {
            status: None,
            message: "connection reset".into(),
        };
        assert!(err.is_transient());
    }

    #[test]
    fn auth_and_resync_are_not_transient() {
        assert!(!EngineError::AuthExpired("jwt".into()).is_transient());
        assert!(!EngineError::ResyncRequired("410".into()).is_transient());
        assert!(EngineError::AuthExpired("jwt".into()).is_auth_expired());
        assert!(EngineError::ResyncRequired("410".into()).is_resync_required());
    }

    #[test]
    fn display_includes_status() {
        let err = EngineError::Transport {
            status: Some(502),
            message: "bad gateway".into(),
        };
        assert_eq!(err.to_string(), "transport failure (502): bad gateway");
    }
}
