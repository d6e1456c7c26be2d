//! Test storage with operation tracing.
//!
//! Wraps [`MemoryStore`] and records every operation for test assertions.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tessera_core::error::{Error, Result};
use tessera_core::{MemoryStore, Record, RecordKeys, RecordQuery, RecordStore};

/// Record of a storage operation for test assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageOp {
    /// Query.
    Get {
        /// Table that was read.
        table: String,
        /// Record id, if the query addressed one record.
        record_id: Option<String>,
    },
    /// Insert.
    Create {
        /// Table that was written.
        table: String,
        /// Record id.
        record_id: String,
    },
    /// Overwrite.
    Replace {
        /// Table that was written.
        table: String,
        /// Record id.
        record_id: String,
    },
    /// Removal.
    Delete {
        /// Table that was written.
        table: String,
        /// Record id.
        record_id: String,
    },
}

impl StorageOp {
    /// Returns true for operations that modify a table.
    pub fn is_write(&self) -> bool {
        !matches!(self, Self::Get { .. })
    }
}

/// In-memory record store with operation tracing.
///
/// Records all operations for later assertion in tests.
#[derive(Debug, Clone, Default)]
pub struct TracingMemoryStore {
    inner: MemoryStore,
    operations: Arc<Mutex<Vec<StorageOp>>>,
    fail_tables: Arc<Mutex<Vec<String>>>,
    latency: Option<Duration>,
}

impl TracingMemoryStore {
    /// Creates a new empty tracing store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store with simulated latency on every operation.
    #[must_use]
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Returns the wrapped store.
    #[must_use]
    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    /// Returns all recorded operations.
    #[must_use]
    pub fn operations(&self) -> Vec<StorageOp> {
        self.operations.lock().expect("lock").clone()
    }

    /// Returns recorded write operations.
    #[must_use]
    pub fn writes(&self) -> Vec<StorageOp> {
        self.operations()
            .into_iter()
            .filter(StorageOp::is_write)
            .collect()
    }

    /// Clears recorded operations.
    pub fn clear_operations(&self) {
        self.operations.lock().expect("lock").clear();
    }

    /// Makes every operation on `table` fail.
    pub fn inject_failure(&self, table: impl Into<String>) {
        self.fail_tables.lock().expect("lock").push(table.into());
    }

    /// Clears all injected failures.
    pub fn clear_failures(&self) {
        self.fail_tables.lock().expect("lock").clear();
    }

    fn record(&self, op: StorageOp) {
        self.operations.lock().expect("lock").push(op);
    }

    fn check_failure(&self, table: &str) -> Result<()> {
        let fail_tables = self.fail_tables.lock().expect("lock");
        if fail_tables.iter().any(|t| t == table) {
            return Err(Error::storage(format!("injected failure for table: {table}")));
        }
        Ok(())
    }

    async fn maybe_delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait::async_trait]
impl RecordStore for TracingMemoryStore {
    async fn get(&self, query: &RecordQuery) -> Result<Vec<Record>> {
        self.maybe_delay().await;
        self.check_failure(&query.table)?;
        self.record(StorageOp::Get {
            table: query.table.clone(),
            record_id: query.record_id.clone(),
        });
        self.inner.get(query).await
    }

    async fn create(&self, table: &str, record: Record) -> Result<()> {
        self.maybe_delay().await;
        self.check_failure(table)?;
        self.record(StorageOp::Create {
            table: table.to_string(),
            record_id: record.id.clone(),
        });
        self.inner.create(table, record).await
    }

    async fn replace(&self, table: &str, keys: &RecordKeys, record: Record) -> Result<()> {
        self.maybe_delay().await;
        self.check_failure(table)?;
        self.record(StorageOp::Replace {
            table: table.to_string(),
            record_id: keys.record_id.clone(),
        });
        self.inner.replace(table, keys, record).await
    }

    async fn delete(&self, table: &str, keys: &RecordKeys) -> Result<()> {
        self.maybe_delay().await;
        self.check_failure(table)?;
        self.record(StorageOp::Delete {
            table: table.to_string(),
            record_id: keys.record_id.clone(),
        });
        self.inner.delete(table, keys).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: &str) -> Record {
        Record::new("user", "0.0.1", id, json!({ "name": id }))
    }

    #[tokio::test]
    async fn tracing_store_records_operations() {
        let store = TracingMemoryStore::new();
        store.create("data", record("42")).await.unwrap();
        store
            .get(&RecordQuery::by_id("data", "user", "42"))
            .await
            .unwrap();
        store
            .delete("data", &RecordKeys::new("user", "42"))
            .await
            .unwrap();

        let ops = store.operations();
        assert_eq!(ops.len(), 3);
        assert!(matches!(&ops[0], StorageOp::Create { record_id, .. } if record_id == "42"));
        assert!(matches!(&ops[1], StorageOp::Get { record_id: Some(id), .. } if id == "42"));
        assert_eq!(store.writes().len(), 2);

        store.clear_operations();
        assert!(store.operations().is_empty());
    }

    #[tokio::test]
    async fn tracing_store_failure_injection() {
        let store = TracingMemoryStore::new();
        store.inject_failure("data");

        let err = store.create("data", record("42")).await.unwrap_err();
        assert!(matches!(err, Error::Storage { .. }));
        store.create("other", record("42")).await.unwrap();

        store.clear_failures();
        store.create("data", record("42")).await.unwrap();
        assert_eq!(store.inner().count("data").unwrap(), 1);
    }
}
