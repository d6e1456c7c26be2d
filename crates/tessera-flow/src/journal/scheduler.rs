//! Periodic journal scheduling.
//!
//! The [`JournalScheduler`] runs as one supervised worker. On every poll
//! tick, and whenever the journal store reports an append, it makes sure each
//! entity with journal pages has a dedicated entity worker and nudges it.
//! An entity worker drains its journal in append order, pushing each entry
//! through the processor chain and archiving it on success.
//!
//! Exactly one worker exists per entity, so entries of one entity are never
//! processed concurrently. Different entities progress in parallel.
//!
//! ## Failure Handling
//!
//! A processor error stops the current pass and leaves the entry active; it is
//! retried on the next tick. Storage errors are logged and never stop the
//! scheduler.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tessera_core::RecordStore;
use tessera_core::observability::journal_span;
use tokio::time::MissedTickBehavior;
use tracing::Instrument;

use super::process::{JournalProcess, LogProcess};
use super::store::JournalStore;
use crate::config::RuntimeConfig;
use crate::error::Result;
use crate::metrics::{JournalMetrics, time_scheduler_cycle};
use crate::supervisor::{EventQueue, Supervisor, Worker, WorkerEvent};

/// Worker id the scheduler registers under.
pub const SCHEDULER_WORKER_ID: &str = "journal-scheduler";

/// Returns the worker id of one entity.
#[must_use]
pub fn entity_worker_id(data_type: &str, data_id: &str) -> String {
    format!("{data_type}/{data_id}")
}

/// Drives journal processing for every tracked entity.
pub struct JournalScheduler<S: RecordStore + ?Sized> {
    journal: Arc<JournalStore<S>>,
    processes: Arc<[Arc<dyn JournalProcess>]>,
    workers: Supervisor,
    poll_interval: Duration,
    max_entries_per_pass: usize,
    metrics: JournalMetrics,
}

impl<S: RecordStore + ?Sized> std::fmt::Debug for JournalScheduler<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JournalScheduler")
            .field("journal", &self.journal)
            .field("processes", &self.process_names())
            .field("workers", &self.workers.len())
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl<S: RecordStore + ?Sized> JournalScheduler<S> {
    /// Creates a scheduler over `journal`.
    ///
    /// An empty processor chain is replaced by a single [`LogProcess`].
    #[must_use]
    pub fn new(
        journal: Arc<JournalStore<S>>,
        processes: Vec<Arc<dyn JournalProcess>>,
        config: &RuntimeConfig,
    ) -> Self {
        let processes: Vec<Arc<dyn JournalProcess>> = if processes.is_empty() {
            vec![Arc::new(LogProcess)]
        } else {
            processes
        };

        Self {
            journal,
            processes: processes.into(),
            workers: Supervisor::new(config.worker_queue_capacity),
            poll_interval: config.poll_interval.max(Duration::from_millis(1)),
            max_entries_per_pass: config.max_entries_per_pass.max(1),
            metrics: JournalMetrics::new(),
        }
    }

    /// Returns the journal this scheduler drains.
    #[must_use]
    pub fn journal(&self) -> &Arc<JournalStore<S>> {
        &self.journal
    }

    /// Names of the processors, in chain order.
    #[must_use]
    pub fn process_names(&self) -> Vec<String> {
        self.processes.iter().map(|p| p.name().to_string()).collect()
    }

    /// Returns the supervisor owning the entity workers.
    #[must_use]
    pub fn workers(&self) -> &Supervisor {
        &self.workers
    }

    /// Registers the scheduler on `supervisor` and starts it.
    ///
    /// The journal store's change notifier is pointed at the scheduler, so
    /// appends are picked up without waiting for the next tick.
    ///
    /// # Errors
    ///
    /// Returns `Error::DuplicateWorker` if a scheduler is already registered.
    pub fn spawn_on(self: &Arc<Self>, supervisor: &Supervisor) -> Result<Arc<Worker>> {
        let scheduler = Arc::clone(self);
        let worker = supervisor.add_worker(SCHEDULER_WORKER_ID, move |queue| scheduler.run(queue))?;
        worker.run()?;

        if !self.journal.set_notifier(worker.sender()) {
            tracing::warn!("journal store already has a change notifier; relying on polling");
        }
        tracing::info!(
            poll_interval_ms = u64::try_from(self.poll_interval.as_millis()).unwrap_or(u64::MAX),
            processes = ?self.process_names(),
            "journal scheduler started"
        );
        Ok(worker)
    }

    /// Scheduler loop. Returns after a stop event or when the queue closes.
    pub async fn run(self: Arc<Self>, mut control: EventQueue) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = control.recv() => match event {
                    None | Some(WorkerEvent::Stop) => break,
                    Some(WorkerEvent::DataChanged { data_type, data_id }) => {
                        self.dispatch(&data_type, &data_id);
                    }
                    Some(event @ WorkerEvent::Custom(_)) => self.workers.broadcast(event).await,
                },
                _ = ticker.tick() => self.process_all().await,
            }
        }

        self.workers.shutdown().await;
        tracing::info!("journal scheduler stopped");
    }

    /// Runs one scheduling cycle over every entity with journal pages.
    ///
    /// Workers of entities whose journal is gone are retired.
    #[tracing::instrument(skip(self))]
    pub async fn process_all(&self) {
        let _timer = time_scheduler_cycle(self.metrics);

        let entities = match self.journal.list_entities().await {
            Ok(entities) => entities,
            Err(err) => {
                tracing::warn!(error = %err, "failed to list journal entities");
                return;
            }
        };
        self.metrics.set_tracked_entities(entities.len());

        let mut live = HashSet::with_capacity(entities.len());
        for (data_type, data_id) in &entities {
            live.insert(entity_worker_id(data_type, data_id));
            self.dispatch(data_type, data_id);
        }
        self.retire_workers(&live);
    }

    fn dispatch(&self, data_type: &str, data_id: &str) {
        let worker = match self.ensure_worker(data_type, data_id) {
            Ok(worker) => worker,
            Err(err) => {
                tracing::warn!(data_type, data_id, error = %err, "failed to start entity worker");
                return;
            }
        };

        match worker.try_notify(WorkerEvent::data_changed(data_type, data_id)) {
            Ok(true) => {}
            Ok(false) => tracing::trace!(worker = %worker.id(), "entity worker already has a pass queued"),
            Err(err) => tracing::debug!(worker = %worker.id(), error = %err, "entity worker gone"),
        }
    }

    fn ensure_worker(&self, data_type: &str, data_id: &str) -> Result<Arc<Worker>> {
        let id = entity_worker_id(data_type, data_id);
        if let Some(worker) = self.workers.get_worker(&id) {
            if !worker.is_stopped() {
                return Ok(worker);
            }
            tracing::debug!(worker = %id, "replacing exited entity worker");
            self.workers.remove_worker(&id);
        }

        let entity = EntityWorker {
            journal: Arc::clone(&self.journal),
            processes: Arc::clone(&self.processes),
            data_type: data_type.to_string(),
            data_id: data_id.to_string(),
            max_entries_per_pass: self.max_entries_per_pass,
            metrics: self.metrics,
        };
        let worker = self.workers.add_worker(&id, move |queue| entity.run(queue))?;
        worker.run()?;
        self.metrics.record_worker_started();
        Ok(worker)
    }

    fn retire_workers(&self, live: &HashSet<String>) {
        for id in self.workers.worker_ids() {
            if live.contains(&id) {
                continue;
            }
            let Some(worker) = self.workers.get_worker(&id) else {
                continue;
            };
            match worker.try_notify(WorkerEvent::Stop) {
                // Busy; retry on the next cycle.
                Ok(false) => {}
                Ok(true) | Err(_) => {
                    self.workers.remove_worker(&id);
                    tracing::debug!(worker = %id, "retired entity worker");
                }
            }
        }
    }
}

/// Processes the journal of one entity.
struct EntityWorker<S: RecordStore + ?Sized> {
    journal: Arc<JournalStore<S>>,
    processes: Arc<[Arc<dyn JournalProcess>]>,
    data_type: String,
    data_id: String,
    max_entries_per_pass: usize,
    metrics: JournalMetrics,
}

impl<S: RecordStore + ?Sized> EntityWorker<S> {
    async fn run(self, mut queue: EventQueue) {
        while let Some(event) = queue.recv().await {
            if matches!(event, WorkerEvent::Stop) {
                break;
            }
            let span = journal_span("process", &self.data_type, &self.data_id);
            self.pass().instrument(span).await;
        }
    }

    async fn pass(&self) {
        for _ in 0..self.max_entries_per_pass {
            match self.step().await {
                Ok(true) => {}
                Ok(false) => return,
                Err(err) => {
                    tracing::warn!(error = %err, "journal pass failed");
                    return;
                }
            }
        }
    }

    /// Processes the oldest active entry. Returns false when the pass should end.
    async fn step(&self) -> Result<bool> {
        let Some(entry) = self
            .journal
            .next_active_entry(&self.data_type, &self.data_id)
            .await?
        else {
            self.journal
                .clean_archived_pages(&self.data_type, &self.data_id)
                .await?;
            return Ok(false);
        };

        let version = entry.version();
        for process in self.processes.iter() {
            let outcome = match process.handles_type(&self.data_type, version) {
                Ok(false) => continue,
                Ok(true) => {
                    process
                        .process_entry(&self.data_type, &self.data_id, &entry)
                        .await
                }
                Err(err) => Err(err),
            };

            if let Err(err) = outcome {
                self.metrics.record_process_failure(process.name());
                tracing::warn!(
                    process = process.name(),
                    page = entry.page,
                    idx = entry.idx,
                    error = %err,
                    "journal process failed; entry stays active"
                );
                return Ok(false);
            }
        }

        self.journal
            .archive_entry(&self.data_type, &self.data_id, &entry)
            .await
    }
}
