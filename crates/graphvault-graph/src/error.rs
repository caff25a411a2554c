//! Mapping HTTP failures into the engine error taxonomy
//!
//! The engine branches on error kinds, so the adapter classifies every
//! failure at the boundary instead of wrapping and rethrowing.

use graphvault_core::domain::EngineError;
use reqwest::StatusCode;

/// Graph error code the server uses to invalidate a delta token inside a
/// structured error body
const RESYNC_REQUIRED_CODE: &str = "resyncRequired";

/// Classify a non-success HTTP response
///
/// `body` is the error body when one was readable; graph APIs put a
/// machine-readable `error.code` there for some signals that don't get a
/// dedicated status (token invalidation in particular).
pub(crate) fn classify_status(status: StatusCode, body: &str, context: &str) -> EngineError {
    if status == StatusCode::GONE || body.contains(RESYNC_REQUIRED_CODE) {
        return EngineError::ResyncRequired(format!("{context}: {status}"));
    }

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return EngineError::AuthExpired(format!("{context}: {status}"));
    }

    EngineError::Transport {
        status: Some(status.as_u16()),
        message: truncate_body(context, body),
    }
}

/// Classify a request that never produced a response
pub(crate) fn classify_request_error(err: &reqwest::Error, context: &str) -> EngineError {
    EngineError::Transport {
        status: err.status().map(|s| s.as_u16()),
        message: format!("{context}: {err}"),
    }
}

fn truncate_body(context: &str, body: &str) -> String {
    const MAX_BODY: usize = 256;
    let trimmed: String = body.chars().take(MAX_BODY).collect();
    if trimmed.is_empty() {
        context.to_string()
    } else {
        format!("{context}: {trimmed}")
    }
}
