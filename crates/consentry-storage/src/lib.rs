//! Storage backend abstraction for `consentry`.
//!
//! This crate defines the [`StorageBackend`] trait, a string key-value
//! interface that knows nothing about consent records or analytics. The
//! consent manager in `consentry-core` reads and writes its record through
//! two of these backends: one network-transmitted, one local-only.
//!
//! Three implementations are provided:
//!
//! - [`CookieJarBackend`]: the durable, network-transmitted store (a browser cookie jar)
//! - [`RedbBackend`]: the durable, local-only store backed by redb (feature `redb-backend`)
//! - [`MemoryBackend`]: in-memory, for tests and profile-less hosts

mod cookie;
mod error;
mod memory;
#[cfg(feature = "redb-backend")]
mod redb_backend;

pub use cookie::{Cookie, CookieAttributes, CookieJarBackend, SameSite};
pub use error::StorageError;
pub use memory::MemoryBackend;
#[cfg(feature = "redb-backend")]
pub use redb_backend::RedbBackend;

/// A pluggable string key-value storage backend.
///
/// Both browser stores the consent mechanism uses (cookies and origin-scoped
/// local storage) only hold strings, so values are `String`, not bytes.
///
/// Implementations must be safe to share across async tasks (`Send + Sync`).
#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Retrieve a value by key.
    ///
    /// Returns `Ok(None)` if the key does not exist.
    ///
    /// # Errors
    ///
    /// - [`StorageError::Read`] if the underlying backend fails.
    /// - [`StorageError::Decode`] if a value exists but cannot be decoded.
    /// - [`StorageError::Unavailable`] if the store is disabled.
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Store a key-value pair, overwriting any existing value.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Write`] if the underlying backend fails, or
    /// [`StorageError::Unavailable`] if the store is disabled.
    async fn put(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Delete a key. This is idempotent: deleting a non-existent key is not
    /// an error.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Delete`] if the underlying backend fails.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Check whether a key exists in storage.
    ///
    /// The default implementation calls [`get`](StorageBackend::get) and checks
    /// for `Some`. Backends may override this with a more efficient check.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] if the underlying backend fails.
    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.get(key).await?.is_some())
    }
}
