//! # tessera-flow
//!
//! Change journaling and background processing for Tessera record stores.
//!
//! This crate implements the flow domain, providing:
//!
//! - **Journals**: Every record change is appended as a before/after entry to
//!   a paginated per-record journal
//! - **Processing**: Entries flow through a chain of [`JournalProcess`]
//!   implementations, strictly in append order per record
//! - **Supervision**: Named workers with bounded event queues and a shared
//!   shutdown barrier
//!
//! ## Guarantees
//!
//! - **Ordered**: Entries of one record are processed in the order they were
//!   appended, one at a time
//! - **At-least-once**: A failed entry stays active and is retried
//! - **Bounded**: Drained pages are deleted
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use serde_json::json;
//! use tessera_core::MemoryStore;
//! use tessera_flow::prelude::*;
//!
//! # async fn demo() -> Result<()> {
//! let config = RuntimeConfig::from_env()?;
//! let journal = Arc::new(JournalStore::from_config(Arc::new(MemoryStore::new()), &config));
//!
//! let supervisor = Supervisor::new(config.worker_queue_capacity);
//! let scheduler = Arc::new(JournalScheduler::new(Arc::clone(&journal), Vec::new(), &config));
//! scheduler.spawn_on(&supervisor)?;
//!
//! journal
//!     .add_entry("user", "42", None, Some(json!({"name": "a"})))
//!     .await?;
//!
//! supervisor.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! [`JournalProcess`]: journal::JournalProcess

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod journal;
pub mod metrics;
pub mod supervisor;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::RuntimeConfig;
    pub use crate::error::{Error, Result};
    pub use crate::journal::{
        JournalEntry, JournalId, JournalPage, JournalProcess, JournalScheduler, JournalStore,
        JournalView, LogProcess,
    };
    pub use crate::metrics::JournalMetrics;
    pub use crate::supervisor::{EventQueue, Supervisor, Worker, WorkerEvent, WorkerState};
}
