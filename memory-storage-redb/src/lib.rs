//! redb-backed [`Storage`](memory_core::storage::Storage) implementation:
//! durable single-node persistence for the semantic memory engine.
//!
//! Every table holds postcard-encoded values under string keys (see
//! [`tables`]). Reads and writes run on `spawn_blocking`, since `redb`'s API
//! is synchronous, with a timeout so a wedged transaction can't hang a
//! caller forever. A single [`redb::Database`] write transaction covers
//! every table touched by one logical mutation (memory + hash index,
//! session + working memory, ...), giving the same atomicity the in-memory
//! backend gets from its single `RwLock` acquisition.

mod search;
mod storage_ops;
mod tables;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use redb::Database;
use tracing::info;

use memory_core::error::{Error, Result};

use tables::{METADATA_SCHEMA_VERSION_KEY, METADATA_TABLE, SCHEMA_VERSION};

/// Timeout for a single `spawn_blocking` redb transaction.
const DB_OPERATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Run a blocking redb operation on the blocking pool, bounded by
/// [`DB_OPERATION_TIMEOUT`].
pub(crate) async fn with_db_timeout<T, F>(operation: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::time::timeout(DB_OPERATION_TIMEOUT, tokio::task::spawn_blocking(operation)).await
    {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(Error::Storage(format!("task join error: {join_err}"))),
        Err(_) => Err(Error::Storage(format!(
            "database operation timed out after {DB_OPERATION_TIMEOUT:?}"
        ))),
    }
}

pub(crate) fn postcard_encode<T: serde::Serialize>(value: &T, what: &str) -> Result<Vec<u8>> {
    postcard::to_allocvec(value).map_err(|e| Error::Storage(format!("failed to encode {what}: {e}")))
}

pub(crate) fn postcard_decode<T: serde::de::DeserializeOwned>(bytes: &[u8], what: &str) -> Result<T> {
    postcard::from_bytes(bytes).map_err(|e| Error::Storage(format!("failed to decode {what}: {e}")))
}

/// redb-backed storage engine.
pub struct RedbStorage {
    pub(crate) db: Arc<Database>,
}

impl RedbStorage {
    /// Open (creating if absent) a redb database at `path` and ensure every
    /// table exists.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path_buf = path.as_ref().to_path_buf();
        info!(path = %path_buf.display(), "opening redb database");

        let db = with_db_timeout(move || {
            Database::create(&path_buf)
                .map_err(|e| Error::Storage(format!("failed to open redb database: {e}")))
        })
        .await?;

        let storage = RedbStorage { db: Arc::new(db) };
        storage.initialize_tables().await?;
        Ok(storage)
    }

    async fn initialize_tables(&self) -> Result<()> {
        let db = Arc::clone(&self.db);
        with_db_timeout(move || {
            let write_txn = db
                .begin_write()
                .map_err(|e| Error::Storage(format!("failed to begin write transaction: {e}")))?;
            {
                write_txn
                    .open_table(tables::WORKSPACES_TABLE)
                    .map_err(|e| Error::Storage(e.to_string()))?;
                write_txn
                    .open_table(tables::CONTEXTS_TABLE)
                    .map_err(|e| Error::Storage(e.to_string()))?;
                write_txn
                    .open_table(tables::CONTEXT_NAMES_TABLE)
                    .map_err(|e| Error::Storage(e.to_string()))?;
                write_txn
                    .open_table(tables::MEMORIES_TABLE)
                    .map_err(|e| Error::Storage(e.to_string()))?;
                write_txn
                    .open_table(tables::MEMORY_BY_HASH_TABLE)
                    .map_err(|e| Error::Storage(e.to_string()))?;
                write_txn
                    .open_table(tables::ASSOCIATIONS_TABLE)
                    .map_err(|e| Error::Storage(e.to_string()))?;
                write_txn
                    .open_table(tables::ASSOCIATION_TRIPLES_TABLE)
                    .map_err(|e| Error::Storage(e.to_string()))?;
                write_txn
                    .open_table(tables::SESSIONS_TABLE)
                    .map_err(|e| Error::Storage(e.to_string()))?;
                write_txn
                    .open_table(tables::WORKING_MEMORY_TABLE)
                    .map_err(|e| Error::Storage(e.to_string()))?;
                write_txn
                    .open_table(tables::CONTRADICTIONS_TABLE)
                    .map_err(|e| Error::Storage(e.to_string()))?;

                let mut metadata = write_txn
                    .open_table(METADATA_TABLE)
                    .map_err(|e| Error::Storage(e.to_string()))?;
                metadata
                    .insert(METADATA_SCHEMA_VERSION_KEY, SCHEMA_VERSION.as_bytes())
                    .map_err(|e| Error::Storage(e.to_string()))?;
            }
            write_txn
                .commit()
                .map_err(|e| Error::Storage(format!("failed to commit transaction: {e}")))?;
            Ok(())
        })
        .await?;
        info!("redb tables initialized, schema version {SCHEMA_VERSION}");
        Ok(())
    }

    /// Verify the database file is still readable.
    pub async fn health_check(&self) -> Result<bool> {
        let db = Arc::clone(&self.db);
        with_db_timeout(move || Ok(db.begin_read().is_ok())).await
    }
}

#[cfg(test)]
mod tests;
