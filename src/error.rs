//! Error types for the telemetry pipeline.
//!
//! Each external capability gets its own error enum so adapters can be
//! swapped without leaking transport details:
//!
//! - [`StoreError`] - object and record storage
//! - [`SummarizerError`] - the language-model summarizer
//! - [`EventError`] - event bus publishing
//! - [`EmailError`] - email delivery
//! - [`TriggerError`] - unrecognized trigger payloads
//! - [`PipelineError`] - per-unit failures inside a stage
//!
//! Conversions into [`PipelineError`] are automatic so `?` works across
//! capability boundaries. The binary itself reports through `anyhow`.

use thiserror::Error;

/// Errors from object or record storage.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Object does not exist.
    #[error("Object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    /// Object key would escape the bucket or is otherwise unusable.
    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    /// Pagination token could not be decoded.
    #[error("Invalid continuation token: {0}")]
    InvalidToken(String),

    /// IO error.
    #[error("Storage IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("Storage JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    pub fn not_found(bucket: &str, key: &str) -> Self {
        Self::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }
}

/// Errors from the summarizer capability.
#[derive(Debug, Error)]
pub enum SummarizerError {
    /// Could not reach the model endpoint.
    #[error("Cannot connect to summarizer at {0}")]
    Connect(String),

    /// The request did not finish in time.
    #[error("Summarizer request timed out after {0}s")]
    Timeout(u64),

    /// The endpoint answered with a non-success status.
    #[error("Summarizer API error {status}: {body}")]
    Api { status: u16, body: String },

    /// The transport envelope could not be decoded.
    #[error("Invalid summarizer response: {0}")]
    InvalidResponse(String),

    /// Any other transport failure.
    #[error("Summarizer request failed: {0}")]
    Request(String),
}

/// Errors from the event bus.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("Event bus IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Event serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors from email delivery.
#[derive(Debug, Error)]
pub enum EmailError {
    /// Sender or recipients missing from configuration.
    #[error("Email delivery is not configured: {0}")]
    NotConfigured(String),

    /// The relay rejected the message.
    #[error("Mail relay error {status}: {body}")]
    Relay { status: u16, body: String },

    /// Transport failure.
    #[error("Email transport failed: {0}")]
    Transport(String),

    /// Writing the message to the outbox failed.
    #[error("Outbox error: {0}")]
    Outbox(#[from] StoreError),
}

/// Trigger payloads that match none of the known shapes.
#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("invalid_event_format: {0}")]
    Malformed(String),
}

/// Failures of a single unit of work.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Summarizer error: {0}")]
    Summarizer(#[from] SummarizerError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A processed row no longer parses as a valid reading.
    #[error("Processed row {line} is not a valid reading: {reason}")]
    CorruptRow { line: usize, reason: String },
}

/// Result type for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion_chain() {
        let store_err = StoreError::not_found("health", "processed/a.csv");
        let pipeline_err: PipelineError = store_err.into();
        assert!(pipeline_err.to_string().contains("processed/a.csv"));

        let summarizer_err = SummarizerError::Timeout(30);
        let pipeline_err: PipelineError = summarizer_err.into();
        assert!(pipeline_err.to_string().contains("30s"));
    }

    #[test]
    fn test_trigger_error_format() {
        let err = TriggerError::Malformed("missing bucket".into());
        let msg = err.to_string();
        assert!(msg.starts_with("invalid_event_format"));
        assert!(msg.contains("missing bucket"));
    }
}
