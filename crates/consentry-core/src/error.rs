//! Error types for `consentry-core`.
//!
//! None of these ever reach the visitor. The consent manager logs them and
//! falls back to the privacy-conservative default.

/// Errors from decoding a persisted consent record.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    /// The stored value is not valid JSON, or not the expected shape.
    #[error("malformed consent record: {reason}")]
    Malformed { reason: String },

    /// The record's timestamp is not an ISO-8601 instant.
    #[error("invalid consent timestamp '{value}': {reason}")]
    InvalidTimestamp { value: String, reason: String },

    /// Serializing a record failed.
    #[error("failed to encode consent record: {reason}")]
    Encode { reason: String },
}

/// Errors from fetching the third-party analytics script.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The request was blocked before it left the page (content blocker).
    #[error("script request to '{src}' was blocked")]
    Blocked { src: String },

    /// The request failed in transit or the server answered with an error.
    #[error("failed to load script '{src}': {reason}")]
    Network { src: String, reason: String },
}
