//! Named background workers with inbound event queues.
//!
//! A [`Supervisor`] owns a registry of [`Worker`]s. Each worker runs one task
//! body that consumes a bounded event queue until it sees
//! [`WorkerEvent::Stop`] (or the queue closes). The supervisor tracks every
//! spawned body on a shared join barrier so the owning process can wait for a
//! clean shutdown.
//!
//! Sends are blocking by default: a slow worker throttles its producer.
//! [`Worker::try_notify`] exists for producers that must never stall.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::task::TaskTracker;
use ulid::Ulid;

use crate::error::{Error, Result};

/// Events delivered to workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// A tracked entity has new journal entries.
    DataChanged {
        /// Record type.
        data_type: String,
        /// Record identifier.
        data_id: String,
    },
    /// Termination signal every worker must honor.
    Stop,
    /// Host-defined event.
    Custom(String),
}

impl WorkerEvent {
    /// Creates a data-change event.
    #[must_use]
    pub fn data_changed(data_type: impl Into<String>, data_id: impl Into<String>) -> Self {
        Self::DataChanged {
            data_type: data_type.into(),
            data_id: data_id.into(),
        }
    }
}

/// Receiving side of a worker's event queue.
pub type EventQueue = mpsc::Receiver<WorkerEvent>;

type RunFn = Box<dyn FnOnce(EventQueue) -> BoxFuture<'static, ()> + Send>;

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const STOPPED: u8 = 2;

/// Lifecycle of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Registered but not started.
    Idle,
    /// Task body is running.
    Running,
    /// Task body returned or panicked.
    Stopped,
}

struct ExitGuard(Arc<AtomicU8>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.0.store(STOPPED, Ordering::SeqCst);
    }
}

/// One supervised background task.
pub struct Worker {
    id: String,
    sender: mpsc::Sender<WorkerEvent>,
    pending: Mutex<Option<(EventQueue, RunFn)>>,
    state: Arc<AtomicU8>,
    tracker: TaskTracker,
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Worker {
    /// Returns the worker id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> WorkerState {
        match self.state.load(Ordering::SeqCst) {
            IDLE => WorkerState::Idle,
            RUNNING => WorkerState::Running,
            _ => WorkerState::Stopped,
        }
    }

    /// Returns true once the task body has exited.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.state() == WorkerState::Stopped
    }

    /// Starts the task body on the supervisor's join barrier.
    ///
    /// # Errors
    ///
    /// Returns `Error::WorkerAlreadyStarted` on a second call.
    pub fn run(&self) -> Result<()> {
        let pending = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some((queue, run_fn)) = pending else {
            return Err(Error::WorkerAlreadyStarted {
                id: self.id.clone(),
            });
        };

        self.state.store(RUNNING, Ordering::SeqCst);
        let guard = ExitGuard(Arc::clone(&self.state));
        let id = self.id.clone();
        self.tracker.spawn(async move {
            let _guard = guard;
            tracing::debug!(worker = %id, "worker started");
            run_fn(queue).await;
            tracing::debug!(worker = %id, "worker exited");
        });
        Ok(())
    }

    /// Enqueues one event, waiting for queue space.
    ///
    /// # Errors
    ///
    /// Returns `Error::WorkerStopped` if the worker's queue is closed.
    pub async fn notify(&self, event: WorkerEvent) -> Result<()> {
        self.sender
            .send(event)
            .await
            .map_err(|_| Error::WorkerStopped {
                id: self.id.clone(),
            })
    }

    /// Enqueues one event if there is room.
    ///
    /// Returns `Ok(false)` when the queue is full and the event was dropped.
    ///
    /// # Errors
    ///
    /// Returns `Error::WorkerStopped` if the worker's queue is closed.
    pub fn try_notify(&self, event: WorkerEvent) -> Result<bool> {
        match self.sender.try_send(event) {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(_)) => Ok(false),
            Err(TrySendError::Closed(_)) => Err(Error::WorkerStopped {
                id: self.id.clone(),
            }),
        }
    }

    /// Returns a sender feeding this worker's queue.
    #[must_use]
    pub fn sender(&self) -> mpsc::Sender<WorkerEvent> {
        self.sender.clone()
    }

    /// Sends the termination signal. A worker that already exited is ignored.
    pub async fn stop(&self) {
        if self.notify(WorkerEvent::Stop).await.is_err() {
            tracing::debug!(worker = %self.id, "stop sent to exited worker");
        }
    }
}

/// Registry of named workers sharing one join barrier.
#[derive(Debug)]
pub struct Supervisor {
    workers: Mutex<HashMap<String, Arc<Worker>>>,
    tracker: TaskTracker,
    queue_capacity: usize,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new(1)
    }
}

impl Supervisor {
    /// Creates a supervisor whose workers get `queue_capacity`-slot queues.
    #[must_use]
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            workers: Mutex::new(HashMap::new()),
            tracker: TaskTracker::new(),
            queue_capacity: queue_capacity.max(1),
        }
    }

    fn workers(&self) -> MutexGuard<'_, HashMap<String, Arc<Worker>>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a worker. An empty `id` gets a fresh unique id.
    ///
    /// The worker is not started; call [`Worker::run`].
    ///
    /// # Errors
    ///
    /// Returns `Error::DuplicateWorker` if `id` is already registered.
    pub fn add_worker<F, Fut>(&self, id: &str, run: F) -> Result<Arc<Worker>>
    where
        F: FnOnce(EventQueue) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = if id.is_empty() {
            Ulid::new().to_string()
        } else {
            id.to_string()
        };

        let mut workers = self.workers();
        if workers.contains_key(&id) {
            return Err(Error::DuplicateWorker { id });
        }

        let (sender, queue) = mpsc::channel(self.queue_capacity);
        let run_fn: RunFn = Box::new(move |queue| run(queue).boxed());
        let worker = Arc::new(Worker {
            id: id.clone(),
            sender,
            pending: Mutex::new(Some((queue, run_fn))),
            state: Arc::new(AtomicU8::new(IDLE)),
            tracker: self.tracker.clone(),
        });
        workers.insert(id, Arc::clone(&worker));
        Ok(worker)
    }

    /// Looks up a worker by id.
    #[must_use]
    pub fn get_worker(&self, id: &str) -> Option<Arc<Worker>> {
        self.workers().get(id).cloned()
    }

    /// Drops a worker's registry entry and returns it.
    pub fn remove_worker(&self, id: &str) -> Option<Arc<Worker>> {
        self.workers().remove(id)
    }

    /// Ids of all registered workers.
    #[must_use]
    pub fn worker_ids(&self) -> Vec<String> {
        self.workers().keys().cloned().collect()
    }

    /// Number of registered workers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.workers().len()
    }

    /// Returns true when no workers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delivers `event` to every running worker, waiting for queue space.
    pub async fn broadcast(&self, event: WorkerEvent) {
        let workers: Vec<Arc<Worker>> = self.workers().values().cloned().collect();
        for worker in workers {
            if worker.state() != WorkerState::Running {
                continue;
            }
            if let Err(err) = worker.notify(event.clone()).await {
                tracing::debug!(worker = %worker.id(), error = %err, "broadcast skipped worker");
            }
        }
    }

    /// Stops every worker and waits until all task bodies have exited.
    pub async fn shutdown(&self) {
        self.broadcast(WorkerEvent::Stop).await;
        self.tracker.close();
        self.tracker.wait().await;
        tracing::debug!("supervisor shut down");
    }
}
