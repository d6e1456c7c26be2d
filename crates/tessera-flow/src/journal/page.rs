//! Journal entries and pages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tessera_core::Record;

use super::id::JournalId;
use crate::error::{Error, Result};

/// Entries a page holds before a new page is opened.
pub const MAX_ENTRY_PER_PAGE: usize = 10;

/// Record type of stored journal pages.
pub const JOURNAL_RECORD_TYPE: &str = "journal";

/// Schema version of stored journal pages.
pub const JOURNAL_VERSION: &str = "0.0.1";

const VERSION_FIELD: &str = "__ver";

/// One before/after change of a tracked record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Page holding the entry.
    pub page: u32,
    /// Position within the page, starting at 1.
    pub idx: u32,
    /// When the entry was appended.
    pub time: DateTime<Utc>,
    /// Record snapshot before the change; `None` for creations.
    #[serde(default)]
    pub before: Option<Value>,
    /// Record snapshot after the change; `None` for deletions.
    #[serde(default)]
    pub after: Option<Value>,
}

impl JournalEntry {
    /// Returns the schema version carried by the snapshots.
    ///
    /// Reads `__ver` from `after`, falling back to `before`, or `""`.
    #[must_use]
    pub fn version(&self) -> &str {
        [&self.after, &self.before]
            .into_iter()
            .flatten()
            .find_map(|snapshot| snapshot.get(VERSION_FIELD).and_then(Value::as_str))
            .unwrap_or("")
    }
}

/// A bounded segment of one entity's journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalPage {
    /// Record type.
    pub data_type: String,
    /// Record identifier.
    pub data_id: String,
    /// Page index, starting at 1.
    pub idx: u32,
    /// Entries not yet processed, oldest first.
    #[serde(default)]
    pub active: Vec<JournalEntry>,
    /// Processed entries, in archive order.
    #[serde(default)]
    pub archived: Vec<JournalEntry>,
}

impl JournalPage {
    /// Creates an empty page.
    #[must_use]
    pub fn new(data_type: impl Into<String>, data_id: impl Into<String>, idx: u32) -> Self {
        Self {
            data_type: data_type.into(),
            data_id: data_id.into(),
            idx,
            active: Vec::new(),
            archived: Vec::new(),
        }
    }

    /// Returns the page identifier.
    #[must_use]
    pub fn id(&self) -> JournalId {
        JournalId::page(&self.data_type, &self.data_id, self.idx)
    }

    /// Number of entries ever appended to this page.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.active.len() + self.archived.len()
    }

    /// Returns true when no more entries fit.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.entry_count() >= MAX_ENTRY_PER_PAGE
    }

    /// Returns true when the page is full and every entry is archived.
    #[must_use]
    pub fn is_drained(&self) -> bool {
        self.active.is_empty() && self.archived.len() >= MAX_ENTRY_PER_PAGE
    }

    /// Appends a new active entry with the next sequential index.
    pub fn push(&mut self, before: Option<Value>, after: Option<Value>) -> &JournalEntry {
        let idx = u32::try_from(self.entry_count() + 1).unwrap_or(u32::MAX);
        self.active.push(JournalEntry {
            page: self.idx,
            idx,
            time: Utc::now(),
            before,
            after,
        });
        &self.active[self.active.len() - 1]
    }

    /// Wraps the page in its storage envelope.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the page cannot be encoded.
    pub fn to_record(&self) -> Result<Record> {
        Ok(Record::new(
            JOURNAL_RECORD_TYPE,
            JOURNAL_VERSION,
            self.id().to_string(),
            serde_json::to_value(self)?,
        ))
    }

    /// Decodes a page from its storage envelope.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the record is not a journal page.
    pub fn from_record(record: &Record) -> Result<Self> {
        if record.record_type != JOURNAL_RECORD_TYPE {
            return Err(Error::Serialization {
                message: format!(
                    "record [{}] has type [{}], expected [{JOURNAL_RECORD_TYPE}]",
                    record.id, record.record_type
                ),
            });
        }
        Ok(serde_json::from_value(record.data.clone())?)
    }
}
