//! Paginated journal persistence over a record store.
//!
//! Each tracked entity `(dataType, dataId)` owns a sequence of pages with
//! increasing indexes starting at 1. Appends go to the highest page until it
//! holds [`MAX_ENTRY_PER_PAGE`] entries, then a new page is opened. Entries
//! are archived strictly in append order, and pages whose entries are all
//! archived are deleted.
//!
//! ## Concurrency
//!
//! Appends are serialized store-wide by one writer mutex. Every mutation
//! (append, archive, clean) additionally holds the entity's key lock, so an
//! archive never races an append on the same page.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, OnceLock};

use serde_json::Value;
use tessera_core::{KeyLockRegistry, RecordKeys, RecordQuery, RecordStore};
use tokio::sync::{Mutex, mpsc};
use ulid::Ulid;

use super::id::{JournalId, JournalTarget};
use super::page::{JOURNAL_RECORD_TYPE, JournalEntry, JournalPage};
use crate::config::RuntimeConfig;
use crate::error::{Error, Result};
use crate::metrics::JournalMetrics;
use crate::supervisor::WorkerEvent;

/// Result of resolving a journal identifier.
#[derive(Debug, Clone, PartialEq)]
pub enum JournalView {
    /// Every journaled record type.
    Types(Vec<String>),
    /// Every journaled id of one type.
    Ids(Vec<String>),
    /// Every page of one entity, ordered by index.
    Pages(Vec<JournalPage>),
    /// One page.
    Page(JournalPage),
}

/// Journal persistence for all tracked entities.
pub struct JournalStore<S: RecordStore + ?Sized> {
    storage: Arc<S>,
    table: String,
    writer: Mutex<()>,
    key_locks: KeyLockRegistry,
    notifier: OnceLock<mpsc::Sender<WorkerEvent>>,
    metrics: JournalMetrics,
}

impl<S: RecordStore + ?Sized> std::fmt::Debug for JournalStore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JournalStore")
            .field("table", &self.table)
            .field("notifier", &self.notifier.get().is_some())
            .finish_non_exhaustive()
    }
}

fn entity_key(data_type: &str, data_id: &str) -> String {
    format!("journal/{data_type}/{data_id}")
}

impl<S: RecordStore + ?Sized> JournalStore<S> {
    /// Creates a store writing pages to `table`.
    #[must_use]
    pub fn new(storage: Arc<S>, table: impl Into<String>) -> Self {
        Self {
            storage,
            table: table.into(),
            writer: Mutex::new(()),
            key_locks: KeyLockRegistry::new(),
            notifier: OnceLock::new(),
            metrics: JournalMetrics::new(),
        }
    }

    /// Creates a store using the configured table and lock timeout.
    #[must_use]
    pub fn from_config(storage: Arc<S>, config: &RuntimeConfig) -> Self {
        Self {
            key_locks: config.key_lock_registry(),
            ..Self::new(storage, config.journal_table.clone())
        }
    }

    /// Emits a data-change event on `notifier` after every append.
    #[must_use]
    pub fn with_notifier(self, notifier: mpsc::Sender<WorkerEvent>) -> Self {
        self.set_notifier(notifier);
        self
    }

    /// Installs the change notifier. Returns false if one is already set.
    pub fn set_notifier(&self, notifier: mpsc::Sender<WorkerEvent>) -> bool {
        self.notifier.set(notifier).is_ok()
    }

    /// Returns the table holding journal pages.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    async fn load_all(&self) -> Result<Vec<JournalPage>> {
        let records = self
            .storage
            .get(&RecordQuery::all(&self.table, JOURNAL_RECORD_TYPE))
            .await?;

        let mut pages = Vec::with_capacity(records.len());
        for record in &records {
            match JournalPage::from_record(record) {
                Ok(page) => pages.push(page),
                Err(err) => {
                    tracing::warn!(id = %record.id, error = %err, "skipping unreadable journal page");
                }
            }
        }
        Ok(pages)
    }

    /// Lists every record type with journal pages.
    ///
    /// # Errors
    ///
    /// Returns an error if storage is unavailable.
    pub async fn list_types(&self) -> Result<Vec<String>> {
        let types: BTreeSet<String> = self
            .load_all()
            .await?
            .into_iter()
            .map(|page| page.data_type)
            .collect();
        Ok(types.into_iter().collect())
    }

    /// Lists every journaled id of `data_type`.
    ///
    /// # Errors
    ///
    /// Returns an error if storage is unavailable.
    pub async fn list_ids(&self, data_type: &str) -> Result<Vec<String>> {
        let ids: BTreeSet<String> = self
            .load_all()
            .await?
            .into_iter()
            .filter(|page| page.data_type == data_type)
            .map(|page| page.data_id)
            .collect();
        Ok(ids.into_iter().collect())
    }

    /// Lists every `(dataType, dataId)` with at least one page.
    ///
    /// # Errors
    ///
    /// Returns an error if storage is unavailable.
    pub async fn list_entities(&self) -> Result<Vec<(String, String)>> {
        let entities: BTreeSet<(String, String)> = self
            .load_all()
            .await?
            .into_iter()
            .map(|page| (page.data_type, page.data_id))
            .collect();
        Ok(entities.into_iter().collect())
    }

    /// Lists the pages of one entity ordered by index. Gaps are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if storage is unavailable.
    pub async fn list_pages(&self, data_type: &str, data_id: &str) -> Result<Vec<JournalPage>> {
        let pages: BTreeMap<u32, JournalPage> = self
            .load_all()
            .await?
            .into_iter()
            .filter(|page| page.data_type == data_type && page.data_id == data_id)
            .map(|page| (page.idx, page))
            .collect();
        Ok(pages.into_values().collect())
    }

    /// Loads one page.
    ///
    /// # Errors
    ///
    /// - `Error::PageNotFound` if the page does not exist.
    /// - `Error::PageConflict` if storage holds more than one record for it.
    pub async fn get_page(&self, data_type: &str, data_id: &str, idx: u32) -> Result<JournalPage> {
        let id = JournalId::page(data_type, data_id, idx).to_string();
        let records = self
            .storage
            .get(&RecordQuery::by_id(&self.table, JOURNAL_RECORD_TYPE, &id))
            .await?;

        match records.as_slice() {
            [] => Err(Error::PageNotFound { id }),
            [record] => JournalPage::from_record(record),
            _ => Err(Error::PageConflict {
                id,
                count: records.len(),
            }),
        }
    }

    /// Resolves a journal identifier to a listing or a page.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidJournalId` for malformed identifiers and the
    /// [`get_page`](Self::get_page) errors for page lookups.
    pub async fn get_journal(&self, id: &str) -> Result<JournalView> {
        let id: JournalId = id.parse()?;
        match id.target() {
            JournalTarget::Types => Ok(JournalView::Types(self.list_types().await?)),
            JournalTarget::Ids { data_type } => Ok(JournalView::Ids(self.list_ids(data_type).await?)),
            JournalTarget::Pages { data_type, data_id } => {
                Ok(JournalView::Pages(self.list_pages(data_type, data_id).await?))
            }
            JournalTarget::Page {
                data_type,
                data_id,
                page,
            } => Ok(JournalView::Page(self.get_page(data_type, data_id, page).await?)),
        }
    }

    /// Appends a change and returns the page it landed on.
    ///
    /// # Errors
    ///
    /// Returns an error if either key is empty, the entity lock times out, or
    /// storage is unavailable.
    #[tracing::instrument(
        skip(self, before, after),
        fields(data_type = %data_type, data_id = %data_id, page = tracing::field::Empty)
    )]
    pub async fn add_entry(
        &self,
        data_type: &str,
        data_id: &str,
        before: Option<Value>,
        after: Option<Value>,
    ) -> Result<u32> {
        if data_type.is_empty() || data_id.is_empty() {
            return Err(Error::Core(tessera_core::Error::InvalidInput(format!(
                "journal entry needs a data type and id, got [{data_type}/{data_id}]"
            ))));
        }

        let _writer = self.writer.lock().await;
        let key = entity_key(data_type, data_id);
        let owner = Ulid::new().to_string();
        let entity = self.key_locks.lock(&key, &owner).await?;
        let appended = self.append(data_type, data_id, before, after).await;
        drop(entity);
        let idx = appended?;

        tracing::Span::current().record("page", idx);
        tracing::debug!("journal entry appended");
        self.metrics.record_append();
        self.notify(data_type, data_id);
        Ok(idx)
    }

    async fn append(
        &self,
        data_type: &str,
        data_id: &str,
        before: Option<Value>,
        after: Option<Value>,
    ) -> Result<u32> {
        let (mut page, is_new) = match self.list_pages(data_type, data_id).await?.pop() {
            None => (JournalPage::new(data_type, data_id, 1), true),
            Some(last) if last.is_full() => {
                (JournalPage::new(data_type, data_id, last.idx + 1), true)
            }
            Some(last) => (last, false),
        };
        page.push(before, after);

        let record = page.to_record()?;
        if is_new {
            self.storage.create(&self.table, record).await?;
        } else {
            let keys = record.keys();
            self.storage.replace(&self.table, &keys, record).await?;
        }
        Ok(page.idx)
    }

    fn notify(&self, data_type: &str, data_id: &str) {
        let Some(notifier) = self.notifier.get() else {
            return;
        };
        if let Err(err) = notifier.try_send(WorkerEvent::data_changed(data_type, data_id)) {
            tracing::debug!(error = %err, "journal change notification dropped");
        }
    }

    /// Returns the oldest active entry across the entity's pages.
    ///
    /// # Errors
    ///
    /// Returns an error if storage is unavailable.
    pub async fn next_active_entry(
        &self,
        data_type: &str,
        data_id: &str,
    ) -> Result<Option<JournalEntry>> {
        Ok(self
            .list_pages(data_type, data_id)
            .await?
            .into_iter()
            .find_map(|page| page.active.into_iter().next()))
    }

    /// Moves `entry` from active to archived.
    ///
    /// Only the entity's current next active entry can be archived. Any other
    /// entry is a stale request and yields `Ok(false)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the entity lock times out or storage is unavailable.
    #[tracing::instrument(
        skip(self, entry),
        fields(data_type = %data_type, data_id = %data_id, page = entry.page, idx = entry.idx)
    )]
    pub async fn archive_entry(
        &self,
        data_type: &str,
        data_id: &str,
        entry: &JournalEntry,
    ) -> Result<bool> {
        let key = entity_key(data_type, data_id);
        let owner = Ulid::new().to_string();
        let entity = self.key_locks.lock(&key, &owner).await?;
        let archived = self.archive(data_type, data_id, entry).await;
        drop(entity);

        if archived? {
            self.metrics.record_archive();
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn archive(&self, data_type: &str, data_id: &str, entry: &JournalEntry) -> Result<bool> {
        let head = self
            .list_pages(data_type, data_id)
            .await?
            .into_iter()
            .find(|page| !page.active.is_empty());
        let Some(mut head) = head else {
            tracing::debug!("no active entry to archive");
            return Ok(false);
        };
        if head.idx != entry.page || head.active[0].idx != entry.idx {
            tracing::debug!(
                head_page = head.idx,
                head_idx = head.active[0].idx,
                "stale archive request ignored"
            );
            return Ok(false);
        }

        let current = head.active.remove(0);
        head.archived.push(current);
        let record = head.to_record()?;
        let keys = record.keys();
        self.storage.replace(&self.table, &keys, record).await?;
        tracing::debug!("journal entry archived");
        Ok(true)
    }

    /// Deletes drained pages and returns how many were removed.
    ///
    /// Pages are visited in index order and the scan stops at the first page
    /// that still has active entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the entity lock times out or storage is unavailable.
    #[tracing::instrument(skip(self), fields(data_type = %data_type, data_id = %data_id))]
    pub async fn clean_archived_pages(&self, data_type: &str, data_id: &str) -> Result<usize> {
        let key = entity_key(data_type, data_id);
        let owner = Ulid::new().to_string();
        let entity = self.key_locks.lock(&key, &owner).await?;
        let cleaned = self.clean(data_type, data_id).await;
        drop(entity);

        let deleted = cleaned?;
        if deleted > 0 {
            tracing::debug!(deleted, "drained journal pages removed");
            self.metrics.record_pages_deleted(deleted);
        }
        Ok(deleted)
    }

    async fn clean(&self, data_type: &str, data_id: &str) -> Result<usize> {
        let mut deleted = 0;
        for page in self.list_pages(data_type, data_id).await? {
            if !page.active.is_empty() {
                break;
            }
            if page.is_drained() {
                let keys = RecordKeys::new(JOURNAL_RECORD_TYPE, page.id().to_string());
                self.storage.delete(&self.table, &keys).await?;
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::page::MAX_ENTRY_PER_PAGE;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use async_trait::async_trait;
    use serde_json::json;
    use tessera_core::{MemoryStore, Record};

    fn store() -> (Arc<MemoryStore>, JournalStore<MemoryStore>) {
        let storage = Arc::new(MemoryStore::new());
        let journal = JournalStore::new(Arc::clone(&storage), "journal");
        (storage, journal)
    }

    async fn append_n(journal: &JournalStore<MemoryStore>, n: usize) {
        for i in 0..n {
            journal
                .add_entry("user", "42", None, Some(json!({ "n": i })))
                .await
                .expect("append");
        }
    }

    async fn archive_next(journal: &JournalStore<MemoryStore>) -> bool {
        let entry = journal
            .next_active_entry("user", "42")
            .await
            .unwrap()
            .expect("active entry");
        journal.archive_entry("user", "42", &entry).await.unwrap()
    }

    #[tokio::test]
    async fn first_entry_lands_on_page_one() {
        let (_, journal) = store();
        let page = journal
            .add_entry(
                "user",
                "42",
                Some(json!({"name": "a"})),
                Some(json!({"name": "b"})),
            )
            .await
            .unwrap();
        assert_eq!(page, 1);

        let loaded = journal.get_page("user", "42", 1).await.unwrap();
        assert_eq!(loaded.active.len(), 1);
        assert_eq!(loaded.active[0].idx, 1);
        assert_eq!(loaded.active[0].before, Some(json!({"name": "a"})));

        let entry = loaded.active[0].clone();
        assert!(journal.archive_entry("user", "42", &entry).await.unwrap());
        let loaded = journal.get_page("user", "42", 1).await.unwrap();
        assert!(loaded.active.is_empty());
        assert_eq!(loaded.archived, vec![entry]);
        assert!(journal.next_active_entry("user", "42").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn overflow_opens_second_page_and_clean_removes_first() {
        let (storage, journal) = store();
        append_n(&journal, MAX_ENTRY_PER_PAGE + 1).await;

        let pages = journal.list_pages("user", "42").await.unwrap();
        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].entry_count(), 10);
        assert_eq!(pages[1].entry_count(), 1);
        assert_eq!(pages[1].active[0].idx, 1);
        assert_eq!(pages[1].active[0].page, 2);

        for _ in 0..MAX_ENTRY_PER_PAGE {
            assert!(archive_next(&journal).await);
        }
        assert_eq!(journal.clean_archived_pages("user", "42").await.unwrap(), 1);

        let pages = journal.list_pages("user", "42").await.unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].idx, 2);
        assert_eq!(storage.count("journal").unwrap(), 1);
        assert!(matches!(
            journal.get_page("user", "42", 1).await,
            Err(Error::PageNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn entries_are_archived_in_append_order() {
        let (_, journal) = store();
        append_n(&journal, 5).await;
        let pending = journal.get_page("user", "42", 1).await.unwrap().active;

        let first = journal.next_active_entry("user", "42").await.unwrap().unwrap();
        assert_eq!(first.idx, 1);

        assert!(!journal.archive_entry("user", "42", &pending[2]).await.unwrap());
        let page = journal.get_page("user", "42", 1).await.unwrap();
        assert_eq!(page.active.len(), 5);

        assert!(journal.archive_entry("user", "42", &pending[0]).await.unwrap());
        assert!(!journal.archive_entry("user", "42", &pending[0]).await.unwrap());
        let next = journal.next_active_entry("user", "42").await.unwrap().unwrap();
        assert_eq!(next.idx, 2);
    }

    #[tokio::test]
    async fn later_page_entry_cannot_jump_the_queue() {
        let (_, journal) = store();
        append_n(&journal, MAX_ENTRY_PER_PAGE + 1).await;
        let tail = journal.get_page("user", "42", 2).await.unwrap().active[0].clone();

        assert!(!journal.archive_entry("user", "42", &tail).await.unwrap());
    }

    #[tokio::test]
    async fn clean_stops_at_first_active_page() {
        let (_, journal) = store();
        append_n(&journal, MAX_ENTRY_PER_PAGE + 1).await;
        for _ in 0..5 {
            archive_next(&journal).await;
        }

        assert_eq!(journal.clean_archived_pages("user", "42").await.unwrap(), 0);
        assert_eq!(journal.list_pages("user", "42").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn partially_filled_drained_page_is_kept() {
        let (_, journal) = store();
        append_n(&journal, 3).await;
        for _ in 0..3 {
            archive_next(&journal).await;
        }

        assert_eq!(journal.clean_archived_pages("user", "42").await.unwrap(), 0);
        let next = journal.add_entry("user", "42", None, None).await.unwrap();
        assert_eq!(next, 1);
    }

    #[tokio::test]
    async fn listings_and_journal_ids() {
        let (_, journal) = store();
        journal.add_entry("user", "42", None, None).await.unwrap();
        journal.add_entry("user", "7", None, None).await.unwrap();
        journal.add_entry("host", "a_1", None, None).await.unwrap();

        assert_eq!(journal.list_types().await.unwrap(), vec!["host", "user"]);
        assert_eq!(journal.list_ids("user").await.unwrap(), vec!["42", "7"]);
        assert_eq!(journal.list_entities().await.unwrap().len(), 3);

        assert_eq!(
            journal.get_journal("dataType:").await.unwrap(),
            JournalView::Types(vec!["host".into(), "user".into()])
        );
        assert_eq!(
            journal.get_journal("dataType:user").await.unwrap(),
            JournalView::Ids(vec!["42".into(), "7".into()])
        );
        match journal.get_journal("dataType:host_dataId:a_1").await.unwrap() {
            JournalView::Pages(pages) => assert_eq!(pages.len(), 1),
            other => panic!("unexpected view: {other:?}"),
        }
        match journal
            .get_journal("dataType:user_dataId:42_page:1")
            .await
            .unwrap()
        {
            JournalView::Page(page) => assert_eq!(page.idx, 1),
            other => panic!("unexpected view: {other:?}"),
        }
        assert!(matches!(
            journal.get_journal("user/42").await,
            Err(Error::InvalidJournalId { .. })
        ));
    }

    #[tokio::test]
    async fn empty_keys_are_rejected() {
        let (_, journal) = store();
        let err = journal.add_entry("", "42", None, None).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Core(tessera_core::Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn append_notifies_listener() {
        let storage = Arc::new(MemoryStore::new());
        let (tx, mut rx) = mpsc::channel(1);
        let journal = JournalStore::new(storage, "journal").with_notifier(tx);

        journal.add_entry("user", "42", None, None).await.unwrap();
        // Queue is full; the second notification is dropped, not awaited.
        journal.add_entry("user", "42", None, None).await.unwrap();

        assert_eq!(rx.recv().await, Some(WorkerEvent::data_changed("user", "42")));
        assert!(rx.try_recv().is_err());
    }

    /// Returns every matching record twice.
    struct DuplicatingStore(MemoryStore);

    #[async_trait]
    impl RecordStore for DuplicatingStore {
        async fn get(&self, query: &RecordQuery) -> tessera_core::Result<Vec<Record>> {
            let records = self.0.get(query).await?;
            Ok(records.iter().chain(records.iter()).cloned().collect())
        }

        async fn create(&self, table: &str, record: Record) -> tessera_core::Result<()> {
            self.0.create(table, record).await
        }

        async fn replace(
            &self,
            table: &str,
            keys: &RecordKeys,
            record: Record,
        ) -> tessera_core::Result<()> {
            self.0.replace(table, keys, record).await
        }

        async fn delete(&self, table: &str, keys: &RecordKeys) -> tessera_core::Result<()> {
            self.0.delete(table, keys).await
        }
    }

    #[tokio::test]
    async fn duplicate_page_records_are_a_conflict() {
        let inner = MemoryStore::new();
        let mut page = JournalPage::new("user", "42", 1);
        page.push(None, None);
        inner
            .create("journal", page.to_record().unwrap())
            .await
            .unwrap();

        let journal = JournalStore::new(Arc::new(DuplicatingStore(inner)), "journal");
        let err = journal.get_page("user", "42", 1).await.unwrap_err();
        assert!(matches!(err, Error::PageConflict { count: 2, .. }));
    }

    /// Parks every write while `stalled` is set.
    #[derive(Default)]
    struct StallingStore {
        inner: MemoryStore,
        stalled: AtomicBool,
    }

    impl StallingStore {
        async fn gate_writes(&self) {
            if self.stalled.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
        }
    }

    #[async_trait]
    impl RecordStore for StallingStore {
        async fn get(&self, query: &RecordQuery) -> tessera_core::Result<Vec<Record>> {
            self.inner.get(query).await
        }

        async fn create(&self, table: &str, record: Record) -> tessera_core::Result<()> {
            self.gate_writes().await;
            self.inner.create(table, record).await
        }

        async fn replace(
            &self,
            table: &str,
            keys: &RecordKeys,
            record: Record,
        ) -> tessera_core::Result<()> {
            self.gate_writes().await;
            self.inner.replace(table, keys, record).await
        }

        async fn delete(&self, table: &str, keys: &RecordKeys) -> tessera_core::Result<()> {
            self.gate_writes().await;
            self.inner.delete(table, keys).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_mutation_releases_entity_lock() {
        let storage = Arc::new(StallingStore::default());
        let journal = JournalStore::new(Arc::clone(&storage), "journal");
        journal.add_entry("user", "42", None, None).await.unwrap();
        let entry = journal
            .next_active_entry("user", "42")
            .await
            .unwrap()
            .expect("active entry");

        storage.stalled.store(true, Ordering::SeqCst);
        let cancelled = tokio::time::timeout(
            Duration::from_secs(1),
            journal.archive_entry("user", "42", &entry),
        )
        .await;
        assert!(cancelled.is_err(), "write should still be parked");
        let cancelled = tokio::time::timeout(
            Duration::from_secs(1),
            journal.add_entry("user", "42", None, None),
        )
        .await;
        assert!(cancelled.is_err(), "write should still be parked");

        storage.stalled.store(false, Ordering::SeqCst);
        assert!(journal.archive_entry("user", "42", &entry).await.unwrap());
        assert_eq!(journal.add_entry("user", "42", None, None).await.unwrap(), 1);
        assert!(journal.key_locks.is_empty());
    }
}
