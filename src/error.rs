//! Error taxonomy for the agent response engine.
//!
//! Two enums, not one: [`Error`] covers everything this crate can surface
//! directly to a caller, while [`ModelError`] classifies a model call's
//! failure for retry purposes. Tool failures, permission denials, stream
//! corruption and compaction failures are deliberately *not* `Error`
//! variants — per the engine's propagation policy they never abort a turn,
//! so they are absorbed into the conversation (a synthetic tool result) or
//! logged, and are represented as plain values at the call site instead.

use thiserror::Error as ThisError;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Failures that may surface to the caller of [`crate::engine::Engine::create_response`].
#[derive(ThisError, Debug)]
pub enum Error {
    /// HTTP transport failure talking to a model provider.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON (de)serialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid engine or compaction configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A model call failed with a kind the engine does not retry and must
    /// surface, or failed after the retry budget was exhausted.
    #[error("model error: {0}")]
    Model(#[from] ModelError),

    /// Caller-supplied input was rejected before any state mutation.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A request timed out.
    #[error("request timed out")]
    Timeout,

    /// Anything else.
    #[error("error: {0}")]
    Other(String),
}

impl Error {
    /// Creates a new config error.
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Creates a new invalid-input error.
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    /// Creates a new catch-all error.
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Creates a timeout error.
    pub fn timeout() -> Self {
        Error::Timeout
    }
}

/// Failure kinds for a single model call (§4.1 of the engine spec).
///
/// Only `RateLimited` and `Transient` are retried; `Invalid` and `Canceled`
/// propagate immediately.
#[derive(ThisError, Debug, Clone)]
pub enum ModelError {
    /// The provider asked the caller to back off; retry with backoff.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// A network error or 5xx response; retryable up to the configured cap.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Malformed request or policy rejection; never retried.
    #[error("invalid request: {0}")]
    Invalid(String),

    /// The caller dropped the context mid-call.
    #[error("canceled")]
    Canceled,
}

impl ModelError {
    /// True for the two kinds the retry policy is allowed to retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ModelError::RateLimited(_) | ModelError::Transient(_))
    }
}

/// A tool's reported failure. Never raised as an [`Error`] — the engine
/// wraps it into a `tool_result(is_error=true)` block instead (spec §7).
#[derive(Debug, Clone)]
pub struct ToolError {
    /// Human-readable explanation, becomes the tool result's text content.
    pub message: String,
}

impl ToolError {
    /// Wraps a message as a tool error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ToolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_formats_with_prefix() {
        let err = Error::config("missing base_url");
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(err.to_string(), "invalid configuration: missing base_url");
    }

    #[test]
    fn invalid_input_error_formats_with_prefix() {
        let err = Error::invalid_input("thread_id must not be empty");
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn timeout_error_has_fixed_message() {
        let err = Error::timeout();
        assert!(matches!(err, Error::Timeout));
        assert_eq!(err.to_string(), "request timed out");
    }

    #[test]
    fn model_error_wraps_into_error() {
        let model_err = ModelError::RateLimited("retry-after: 30s".into());
        let err: Error = model_err.into();
        assert!(matches!(err, Error::Model(ModelError::RateLimited(_))));
    }

    #[test]
    fn only_rate_limited_and_transient_are_retryable() {
        assert!(ModelError::RateLimited("x".into()).is_retryable());
        assert!(ModelError::Transient("x".into()).is_retryable());
        assert!(!ModelError::Invalid("x".into()).is_retryable());
        assert!(!ModelError::Canceled.is_retryable());
    }

    #[test]
    fn tool_error_displays_its_message() {
        let err = ToolError::new("file not found");
        assert_eq!(err.to_string(), "file not found");
    }

    #[test]
    fn json_error_converts_via_from() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
