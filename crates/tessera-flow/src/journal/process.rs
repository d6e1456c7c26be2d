//! Pluggable journal processors.
//!
//! The scheduler pushes each active entry through an ordered chain of
//! [`JournalProcess`] implementations. A processor first declares whether it
//! applies to the entry's record type and schema version; applicable
//! processors then perform their side effect. The entry is archived only when
//! every applicable processor succeeds.

use async_trait::async_trait;

use super::page::JournalEntry;
use crate::error::Result;

/// A side effect driven by journal entries.
#[async_trait]
pub trait JournalProcess: Send + Sync {
    /// Processor name, used in logs and failure metrics.
    fn name(&self) -> &str;

    /// Returns whether this processor applies to `data_type` at `version`.
    ///
    /// # Errors
    ///
    /// An error is treated as a processing failure for the entry.
    fn handles_type(&self, data_type: &str, version: &str) -> Result<bool>;

    /// Processes one entry.
    ///
    /// # Errors
    ///
    /// Any error leaves the entry active so it is retried on a later pass.
    async fn process_entry(
        &self,
        data_type: &str,
        data_id: &str,
        entry: &JournalEntry,
    ) -> Result<()>;
}

/// Logs every entry it sees.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogProcess;

#[async_trait]
impl JournalProcess for LogProcess {
    fn name(&self) -> &'static str {
        "log"
    }

    fn handles_type(&self, _data_type: &str, _version: &str) -> Result<bool> {
        Ok(true)
    }

    async fn process_entry(
        &self,
        data_type: &str,
        data_id: &str,
        entry: &JournalEntry,
    ) -> Result<()> {
        tracing::info!(
            data_type = %data_type,
            data_id = %data_id,
            page = entry.page,
            idx = entry.idx,
            created = entry.before.is_none(),
            deleted = entry.after.is_none(),
            "journal entry"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn log_process_accepts_everything() {
        let process = LogProcess;
        assert_eq!(process.name(), "log");
        assert!(process.handles_type("user", "0.0.1").unwrap());

        let entry = JournalEntry {
            page: 1,
            idx: 1,
            time: Utc::now(),
            before: None,
            after: Some(serde_json::json!({"name": "a"})),
        };
        process.process_entry("user", "42", &entry).await.unwrap();
    }
}
