//! Pre-built test fixtures for common journal scenarios.
//!
//! Provides a ready-wired test context, recording and failing processors, and
//! factory functions for journal data.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tessera_flow::config::RuntimeConfig;
use tessera_flow::error::{Error, Result};
use tessera_flow::journal::{JournalEntry, JournalProcess, JournalStore};

use crate::storage::TracingMemoryStore;

/// Test context with a traced store and a journal over it.
pub struct TestContext {
    /// Shared storage.
    pub storage: Arc<TracingMemoryStore>,
    /// Journal writing into `storage`.
    pub journal: Arc<JournalStore<TracingMemoryStore>>,
    /// Runtime configuration with short intervals.
    pub config: RuntimeConfig,
}

impl TestContext {
    /// Creates a context using [`fast_config`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(fast_config())
    }

    /// Creates a context with a specific configuration.
    #[must_use]
    pub fn with_config(config: RuntimeConfig) -> Self {
        let storage = Arc::new(TracingMemoryStore::new());
        let journal = Arc::new(JournalStore::from_config(Arc::clone(&storage), &config));
        Self {
            storage,
            journal,
            config,
        }
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration with a 20ms poll interval and 1s lock timeout.
pub fn fast_config() -> RuntimeConfig {
    RuntimeConfig {
        poll_interval: Duration::from_millis(20),
        lock_timeout: Duration::from_secs(1),
        ..RuntimeConfig::default()
    }
}

/// A processed entry as seen by [`RecordingProcess`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenEntry {
    /// Record type.
    pub data_type: String,
    /// Record id.
    pub data_id: String,
    /// Page index.
    pub page: u32,
    /// Index within the page.
    pub idx: u32,
}

/// Processor that records every entry it handles.
#[derive(Debug, Default)]
pub struct RecordingProcess {
    name: String,
    only_type: Option<String>,
    seen: Mutex<Vec<SeenEntry>>,
}

impl RecordingProcess {
    /// Creates a processor named `name` that handles every type.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Restricts the processor to one record type.
    #[must_use]
    pub fn only_type(mut self, data_type: impl Into<String>) -> Self {
        self.only_type = Some(data_type.into());
        self
    }

    /// Returns the entries processed so far, in order.
    pub fn seen(&self) -> Vec<SeenEntry> {
        self.seen.lock().expect("lock").clone()
    }

    /// Returns the processed entries of one record.
    pub fn seen_for(&self, data_type: &str, data_id: &str) -> Vec<(u32, u32)> {
        self.seen()
            .into_iter()
            .filter(|e| e.data_type == data_type && e.data_id == data_id)
            .map(|e| (e.page, e.idx))
            .collect()
    }
}

#[async_trait]
impl JournalProcess for RecordingProcess {
    fn name(&self) -> &str {
        &self.name
    }

    fn handles_type(&self, data_type: &str, _version: &str) -> Result<bool> {
        Ok(self.only_type.as_deref().is_none_or(|only| only == data_type))
    }

    async fn process_entry(
        &self,
        data_type: &str,
        data_id: &str,
        entry: &JournalEntry,
    ) -> Result<()> {
        self.seen.lock().expect("lock").push(SeenEntry {
            data_type: data_type.to_string(),
            data_id: data_id.to_string(),
            page: entry.page,
            idx: entry.idx,
        });
        Ok(())
    }
}

/// Processor that counts the entries it handles.
#[derive(Debug, Default)]
pub struct CountingProcess {
    count: AtomicUsize,
}

impl CountingProcess {
    /// Creates a counter at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries processed so far.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JournalProcess for CountingProcess {
    fn name(&self) -> &'static str {
        "counting"
    }

    fn handles_type(&self, _data_type: &str, _version: &str) -> Result<bool> {
        Ok(true)
    }

    async fn process_entry(
        &self,
        _data_type: &str,
        _data_id: &str,
        _entry: &JournalEntry,
    ) -> Result<()> {
        self.count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Processor that fails a fixed number of times, then succeeds.
#[derive(Debug)]
pub struct FailingProcess {
    failures_left: AtomicUsize,
    attempts: AtomicUsize,
}

impl FailingProcess {
    /// Fails the first `times` calls.
    pub fn times(times: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(times),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Fails every call.
    pub fn always() -> Self {
        Self::times(usize::MAX)
    }

    /// Total calls to `process_entry`.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JournalProcess for FailingProcess {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn handles_type(&self, _data_type: &str, _version: &str) -> Result<bool> {
        Ok(true)
    }

    async fn process_entry(
        &self,
        _data_type: &str,
        _data_id: &str,
        _entry: &JournalEntry,
    ) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::processor("failing", "injected failure"));
        }
        Ok(())
    }
}

/// Factory for journal test data.
pub struct JournalFactory;

impl JournalFactory {
    /// A versioned record snapshot.
    pub fn snapshot(name: &str, version: &str) -> Value {
        json!({ "name": name, "__ver": version })
    }

    /// Appends `count` updates to one record and returns their page numbers.
    pub async fn fill<S>(
        journal: &JournalStore<S>,
        data_type: &str,
        data_id: &str,
        count: usize,
    ) -> Vec<u32>
    where
        S: tessera_core::RecordStore + ?Sized,
    {
        let mut pages = Vec::with_capacity(count);
        for n in 0..count {
            let before = (n > 0).then(|| Self::snapshot(&format!("v{}", n - 1), "0.0.1"));
            let after = Self::snapshot(&format!("v{n}"), "0.0.1");
            let page = journal
                .add_entry(data_type, data_id, before, Some(after))
                .await
                .expect("append journal entry");
            pages.push(page);
        }
        pages
    }
}

/// Polls `condition` every 10ms until it holds or `timeout` elapses.
pub async fn wait_for<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry() -> JournalEntry {
        JournalEntry {
            page: 1,
            idx: 1,
            time: Utc::now(),
            before: None,
            after: Some(json!({})),
        }
    }

    #[tokio::test]
    async fn failing_process_recovers_after_budget() {
        let process = FailingProcess::times(2);
        assert!(process.process_entry("user", "1", &entry()).await.is_err());
        assert!(process.process_entry("user", "1", &entry()).await.is_err());
        assert!(process.process_entry("user", "1", &entry()).await.is_ok());
        assert_eq!(process.attempts(), 3);
    }

    #[tokio::test]
    async fn recording_process_filters_types() {
        let process = RecordingProcess::new("rec").only_type("user");
        assert!(process.handles_type("user", "").unwrap());
        assert!(!process.handles_type("host", "").unwrap());

        process.process_entry("user", "1", &entry()).await.unwrap();
        assert_eq!(process.seen_for("user", "1"), vec![(1, 1)]);
    }

    #[tokio::test]
    async fn factory_fills_pages() {
        let ctx = TestContext::new();
        let pages = JournalFactory::fill(&ctx.journal, "user", "1", 12).await;
        assert_eq!(pages.iter().filter(|&&p| p == 1).count(), 10);
        assert_eq!(pages.last(), Some(&2));
    }
}
