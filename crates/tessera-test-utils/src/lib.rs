//! Shared test utilities for Tessera integration tests.
//!
//! This crate provides:
//! - [`TracingMemoryStore`]: In-memory record store with operation recording
//! - [`TestContext`]: Pre-wired storage and journal
//! - Recording and failing journal processors
//! - Custom assertion helpers
//!
//! # Example
//!
//! ```rust,ignore
//! use tessera_test_utils::{JournalFactory, TestContext, assert_pages};
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let ctx = TestContext::new();
//!     JournalFactory::fill(&ctx.journal, "user", "42", 11).await;
//!     assert_pages(&ctx.journal, "user", "42", &[1, 2]).await;
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
// Test utilities use expect/unwrap for cleaner test code - panics are acceptable in tests
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]

pub mod assertions;
pub mod fixtures;
pub mod storage;

pub use assertions::*;
pub use fixtures::*;
pub use storage::*;

/// Initialize test logging (call once per test module).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("tessera=debug".parse().expect("valid directive")),
        )
        .with_test_writer()
        .try_init();
}
