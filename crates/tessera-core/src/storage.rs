//! Record storage contract consumed by the journal and lock layers.
//!
//! Data services persist typed records in named tables. Every record carries
//! the same envelope: an identifier, a record type, a schema version and a JSON
//! payload. The core only needs four operations against that model:
//!
//! - `get` by table + record type, optionally narrowed to one identifier
//! - `create` a new record
//! - `replace` an existing record addressed by its keys
//! - `delete` a record addressed by its keys
//!
//! Storage engines (document databases, file-backed key/value stores) live
//! outside this crate and implement [`RecordStore`]. [`MemoryStore`] is the
//! in-process implementation used by tests and single-node deployments.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Storage envelope for one typed record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Record identifier, unique within its type.
    #[serde(rename = "__id")]
    pub id: String,
    /// Record type (the data type name).
    #[serde(rename = "__type")]
    pub record_type: String,
    /// Schema version the payload conforms to.
    #[serde(rename = "__ver")]
    pub version: String,
    /// Record payload.
    pub data: serde_json::Value,
}

impl Record {
    /// Creates a new record envelope.
    #[must_use]
    pub fn new(
        record_type: impl Into<String>,
        version: impl Into<String>,
        id: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            record_type: record_type.into(),
            version: version.into(),
            data,
        }
    }

    /// Returns the keys addressing this record.
    #[must_use]
    pub fn keys(&self) -> RecordKeys {
        RecordKeys::new(&self.record_type, &self.id)
    }
}

/// Query against one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordQuery {
    /// Table to read.
    pub table: String,
    /// Record type to match.
    pub record_type: String,
    /// Optional identifier; `None` returns every record of the type.
    pub record_id: Option<String>,
}

impl RecordQuery {
    /// Queries all records of a type.
    #[must_use]
    pub fn all(table: impl Into<String>, record_type: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            record_type: record_type.into(),
            record_id: None,
        }
    }

    /// Queries one record by identifier.
    #[must_use]
    pub fn by_id(
        table: impl Into<String>,
        record_type: impl Into<String>,
        record_id: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            record_type: record_type.into(),
            record_id: Some(record_id.into()),
        }
    }
}

/// Keys addressing one record within a table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKeys {
    /// Record type.
    pub record_type: String,
    /// Record identifier.
    pub record_id: String,
}

impl RecordKeys {
    /// Creates record keys.
    #[must_use]
    pub fn new(record_type: impl Into<String>, record_id: impl Into<String>) -> Self {
        Self {
            record_type: record_type.into(),
            record_id: record_id.into(),
        }
    }
}

/// Storage backend for typed records.
///
/// Implementations must be safe to share across tasks. Errors other than
/// `NotFound`/`Conflict` indicate the storage is unavailable and are
/// propagated unchanged to callers.
#[async_trait]
pub trait RecordStore: Send + Sync + 'static {
    /// Returns the records matching a query.
    ///
    /// An unknown table or type yields an empty vec. When the query names an
    /// identifier, more than one result indicates an integrity problem the
    /// caller should surface.
    async fn get(&self, query: &RecordQuery) -> Result<Vec<Record>>;

    /// Creates a new record.
    ///
    /// Returns `Error::Conflict` if a record with the same keys exists.
    async fn create(&self, table: &str, record: Record) -> Result<()>;

    /// Replaces the record addressed by `keys`.
    ///
    /// Returns `Error::NotFound` if no such record exists.
    async fn replace(&self, table: &str, keys: &RecordKeys, record: Record) -> Result<()>;

    /// Deletes the record addressed by `keys`.
    ///
    /// Succeeds even if the record doesn't exist (idempotent).
    async fn delete(&self, table: &str, keys: &RecordKeys) -> Result<()>;
}

type Table = BTreeMap<RecordKeys, Record>;

/// In-memory record store.
///
/// Thread-safe via `RwLock`. Tables are created on first write. Results are
/// returned ordered by record type then identifier.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    tables: Arc<RwLock<HashMap<String, Table>>>,
}

fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::Internal {
        message: "lock poisoned".into(),
    }
}

impl MemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of records stored in `table`.
    ///
    /// # Errors
    ///
    /// Returns an error if the internal lock is poisoned.
    pub fn count(&self, table: &str) -> Result<usize> {
        let tables = self.tables.read().map_err(poison_err)?;
        Ok(tables.get(table).map_or(0, BTreeMap::len))
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get(&self, query: &RecordQuery) -> Result<Vec<Record>> {
        let tables = self.tables.read().map_err(poison_err)?;
        let Some(table) = tables.get(&query.table) else {
            return Ok(Vec::new());
        };

        let records = match &query.record_id {
            Some(id) => table
                .get(&RecordKeys::new(&query.record_type, id))
                .cloned()
                .into_iter()
                .collect(),
            None => table
                .values()
                .filter(|record| record.record_type == query.record_type)
                .cloned()
                .collect(),
        };
        Ok(records)
    }

    async fn create(&self, table: &str, record: Record) -> Result<()> {
        let mut tables = self.tables.write().map_err(poison_err)?;
        let table_records = tables.entry(table.to_string()).or_default();
        let keys = record.keys();
        if table_records.contains_key(&keys) {
            return Err(Error::conflict(format!(
                "record [{}/{}] already exists in table [{table}]",
                keys.record_type, keys.record_id
            )));
        }
        table_records.insert(keys, record);
        Ok(())
    }

    async fn replace(&self, table: &str, keys: &RecordKeys, record: Record) -> Result<()> {
        let mut tables = self.tables.write().map_err(poison_err)?;
        let Some(table_records) = tables.get_mut(table) else {
            return Err(Error::NotFound(format!("table [{table}] does not exist")));
        };
        if table_records.remove(keys).is_none() {
            return Err(Error::NotFound(format!(
                "record [{}/{}] does not exist in table [{table}]",
                keys.record_type, keys.record_id
            )));
        }
        table_records.insert(record.keys(), record);
        Ok(())
    }

    async fn delete(&self, table: &str, keys: &RecordKeys) -> Result<()> {
        let mut tables = self.tables.write().map_err(poison_err)?;
        if let Some(table_records) = tables.get_mut(table) {
            table_records.remove(keys);
        }
        Ok(())
    }
}
