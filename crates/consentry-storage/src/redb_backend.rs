//! redb-backed local storage, the durable local-only store.
//!
//! Plays the role of a browser's origin-scoped `localStorage`: string keys,
//! string values, persisted on disk, never sent over the network. One redb
//! file per browser profile holds a single `local_storage` table. Every
//! operation is its own transaction, so a crash leaves either the old entry
//! or the new one. Feature-gated behind `redb-backend`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use redb::{Database, Table, TableDefinition};

use crate::{StorageBackend, StorageError};

const LOCAL_STORAGE_TABLE: TableDefinition<&str, &str> = TableDefinition::new("local_storage");

fn transaction_error(e: impl std::fmt::Display) -> StorageError {
    StorageError::Transaction {
        reason: e.to_string(),
    }
}

fn table_error(e: impl std::fmt::Display) -> StorageError {
    StorageError::MissingTable {
        name: format!("local_storage: {e}"),
    }
}

/// An origin's local storage, kept in a redb file.
///
/// Clones share the database handle. redb calls block, so each operation
/// runs on the Tokio blocking pool.
///
/// # Examples
///
/// ```no_run
/// # use consentry_storage::RedbBackend;
/// let backend = RedbBackend::open("profile/local-storage.redb").unwrap();
/// ```
#[derive(Clone)]
pub struct RedbBackend {
    db: Arc<Database>,
    path: PathBuf,
}

impl std::fmt::Debug for RedbBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbBackend")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl RedbBackend {
    /// Open the local storage file at `path`, creating the file and its
    /// table on first use.
    ///
    /// # Errors
    ///
    /// - [`StorageError::Open`] if the file cannot be opened as a redb
    ///   database (locked by another process, not a database, a directory).
    /// - [`StorageError::Transaction`] or [`StorageError::MissingTable`] if
    ///   the table cannot be created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let db = Database::create(path).map_err(|e| StorageError::Open {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let backend = Self {
            db: Arc::new(db),
            path: path.to_path_buf(),
        };
        backend.write_in_place(|_| Ok(()))?;
        Ok(backend)
    }

    /// Filesystem path of the storage file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `change` against the table inside one committed write
    /// transaction, on the calling thread.
    fn write_in_place(
        &self,
        change: impl FnOnce(&mut Table<'_, &'static str, &'static str>) -> Result<(), StorageError>,
    ) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(transaction_error)?;
        {
            let mut table = txn.open_table(LOCAL_STORAGE_TABLE).map_err(table_error)?;
            change(&mut table)?;
        }
        txn.commit().map_err(transaction_error)
    }

    /// Run `op` on the blocking pool. A task that dies becomes the error
    /// `lost` builds from its join failure.
    async fn blocking<T: Send + 'static>(
        &self,
        op: impl FnOnce(&Self) -> Result<T, StorageError> + Send + 'static,
        lost: impl FnOnce(String) -> StorageError + Send,
    ) -> Result<T, StorageError> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || op(&this))
            .await
            .map_err(|e| lost(format!("storage task failed: {e}")))?
    }
}

#[async_trait::async_trait]
impl StorageBackend for RedbBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let key = key.to_owned();
        let lost_key = key.clone();
        self.blocking(
            move |this| {
                let txn = this.db.begin_read().map_err(transaction_error)?;
                let table = txn.open_table(LOCAL_STORAGE_TABLE).map_err(table_error)?;
                let entry = table.get(key.as_str()).map_err(|e| StorageError::Read {
                    key: key.clone(),
                    reason: e.to_string(),
                })?;
                Ok(entry.map(|v| v.value().to_owned()))
            },
            |reason| StorageError::Read {
                key: lost_key,
                reason,
            },
        )
        .await
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let key = key.to_owned();
        let value = value.to_owned();
        let lost_key = key.clone();
        self.blocking(
            move |this| {
                this.write_in_place(|table| {
                    table
                        .insert(key.as_str(), value.as_str())
                        .map(|_| ())
                        .map_err(|e| StorageError::Write {
                            key: key.clone(),
                            reason: e.to_string(),
                        })
                })
            },
            |reason| StorageError::Write {
                key: lost_key,
                reason,
            },
        )
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let key = key.to_owned();
        let lost_key = key.clone();
        self.blocking(
            move |this| {
                this.write_in_place(|table| {
                    table
                        .remove(key.as_str())
                        .map(|_| ())
                        .map_err(|e| StorageError::Delete {
                            key: key.clone(),
                            reason: e.to_string(),
                        })
                })
            },
            |reason| StorageError::Delete {
                key: lost_key,
                reason,
            },
        )
        .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn fresh() -> (tempfile::TempDir, RedbBackend) {
        let dir = tempfile::tempdir().unwrap();
        let backend = RedbBackend::open(dir.path().join("local-storage.redb")).unwrap();
        (dir, backend)
    }

    #[tokio::test]
    async fn consent_record_lifecycle() {
        let (_dir, backend) = fresh();

        assert_eq!(backend.get("gwkb_consent").await.unwrap(), None);
        backend.put("gwkb_consent", r#"{"analytics":true}"#).await.unwrap();
        backend.put("gwkb_consent", r#"{"analytics":false}"#).await.unwrap();
        assert_eq!(
            backend.get("gwkb_consent").await.unwrap().as_deref(),
            Some(r#"{"analytics":false}"#)
        );
        backend.delete("gwkb_consent").await.unwrap();
        assert!(!backend.exists("gwkb_consent").await.unwrap());
    }

    #[tokio::test]
    async fn deleting_absent_entry_succeeds() {
        let (_dir, backend) = fresh();
        backend.delete("gwkb_consent").await.unwrap();
    }

    #[tokio::test]
    async fn empty_value_is_kept_verbatim() {
        let (_dir, backend) = fresh();
        backend.put("gwkb_consent", "").await.unwrap();
        assert_eq!(backend.get("gwkb_consent").await.unwrap().as_deref(), Some(""));
    }

    #[tokio::test]
    async fn entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("local-storage.redb");
        {
            let backend = RedbBackend::open(&path).unwrap();
            backend.put("gwkb_language", "es").await.unwrap();
        }
        let backend = RedbBackend::open(&path).unwrap();
        assert_eq!(
            backend.get("gwkb_language").await.unwrap().as_deref(),
            Some("es")
        );
        assert_eq!(backend.path(), path.as_path());
    }

    #[test]
    fn directory_in_the_way_is_an_open_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = RedbBackend::open(dir.path()).unwrap_err();
        assert!(matches!(err, StorageError::Open { .. }));
    }
}
