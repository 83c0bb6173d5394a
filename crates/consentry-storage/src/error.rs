//! Storage error types.
//!
//! Every error variant carries enough context to diagnose the problem
//! without a debugger.

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Failed to open the storage backend at the given path.
    #[error("failed to open storage at '{path}': {reason}")]
    Open { path: String, reason: String },

    /// Failed to read a value from storage.
    #[error("failed to read key '{key}': {reason}")]
    Read { key: String, reason: String },

    /// Failed to write a value to storage.
    #[error("failed to write key '{key}': {reason}")]
    Write { key: String, reason: String },

    /// Failed to delete a key from storage.
    #[error("failed to delete key '{key}': {reason}")]
    Delete { key: String, reason: String },

    /// The store is disabled (blocked cookies, storage turned off by the user agent).
    #[error("{backend} storage is unavailable")]
    Unavailable { backend: &'static str },

    /// A value was present but could not be decoded into a string.
    #[error("stored value for '{key}' could not be decoded: {reason}")]
    Decode { key: String, reason: String },

    /// Failed to flush the store to its backing file.
    #[error("failed to persist storage to '{path}': {reason}")]
    Persist { path: String, reason: String },

    /// A required table was not found.
    #[error("missing table '{name}'")]
    MissingTable { name: String },

    /// Failed to begin or commit a transaction.
    #[error("transaction failed: {reason}")]
    Transaction { reason: String },
}

impl StorageError {
    /// Whether this error means the stored value itself is unusable, as
    /// opposed to the store being unreachable.
    #[must_use]
    pub fn is_corrupt_value(&self) -> bool {
        matches!(self, Self::Decode { .. })
    }
}
