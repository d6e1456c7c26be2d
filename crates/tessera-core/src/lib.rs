//! # tessera-core
//!
//! Concurrency-control primitives and the storage contract for Tessera data
//! services.
//!
//! - **Binary Gate**: single-slot mutual exclusion with bounded waits
//! - **Key Lock Registry**: lazily created per-key locks, evicted when idle
//! - **Path Lock Table**: expiring locks over `dataType/dataId/subPath` scopes
//! - **Record Storage**: the `get`/`create`/`replace`/`delete` contract every
//!   storage engine implements, plus an in-memory store
//! - **Error Types**: shared error definitions and result types
//!
//! ## Example
//!
//! ```rust
//! use tessera_core::prelude::*;
//!
//! let table = PathLockTable::default();
//! let request = table.new_request("ownerA", "user/42/addr", 30);
//! let handle = table.lock(&request).expect("free path");
//! table.unlock(&handle);
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod gate;
pub mod key_lock;
pub mod observability;
pub mod path_lock;
pub mod storage;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::gate::BinaryGate;
    pub use crate::key_lock::{KeyLockGuard, KeyLockRegistry};
    pub use crate::path_lock::{LockPath, LockRequest, PathLock, PathLockTable};
    pub use crate::storage::{MemoryStore, Record, RecordKeys, RecordQuery, RecordStore};
}

pub use error::{Error, Result};
pub use gate::BinaryGate;
pub use key_lock::{KeyLockGuard, KeyLockRegistry};
pub use observability::{LogFormat, init_logging};
pub use path_lock::{LockPath, LockRequest, PathLock, PathLockTable};
pub use storage::{MemoryStore, Record, RecordKeys, RecordQuery, RecordStore};
