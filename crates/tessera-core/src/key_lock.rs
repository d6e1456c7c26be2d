//! Per-key exclusive locks created on demand.
//!
//! [`KeyLockRegistry`] maps arbitrary string keys to a controller holding a
//! [`BinaryGate`]. Acquisition is two-level: the registry's structural gate is
//! held only long enough to fetch or create the controller, then the caller
//! waits on the controller's own gate. Creating a new key therefore never
//! waits behind holders of unrelated keys.
//!
//! Controllers are evicted right after a release once nobody is waiting and
//! nobody holds them, so one-shot keys do not accumulate. A wait abandoned by
//! dropping its future still counts as ended, and [`KeyLockGuard`] releases
//! its key when dropped, so cancellation never strands a key.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::error::Result;
use crate::gate::{BinaryGate, DEFAULT_GATE_TIMEOUT};

#[derive(Debug, Default)]
struct KeyLockController {
    gate: BinaryGate,
    holder: Mutex<Option<String>>,
    waiters: AtomicUsize,
}

impl KeyLockController {
    fn holder(&self) -> MutexGuard<'_, Option<String>> {
        self.holder.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_idle(&self) -> bool {
        self.waiters.load(Ordering::SeqCst) == 0 && !self.gate.is_held() && self.holder().is_none()
    }
}

/// Registry of per-key exclusive locks.
///
/// Create one per process and share it by reference or `Arc`.
#[derive(Debug)]
pub struct KeyLockRegistry {
    structure: BinaryGate,
    controllers: Mutex<HashMap<String, Arc<KeyLockController>>>,
    timeout: Duration,
}

impl Default for KeyLockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyLockRegistry {
    /// Creates a registry with the default 10 second wait bound.
    #[must_use]
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_GATE_TIMEOUT)
    }

    /// Creates a registry with a custom wait bound for both gate levels.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            structure: BinaryGate::new(),
            controllers: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// Returns the wait bound applied to acquisitions.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    fn controllers(&self) -> MutexGuard<'_, HashMap<String, Arc<KeyLockController>>> {
        self.controllers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Acquires exclusive ownership of `key` for `owner`.
    ///
    /// Dropping the returned future mid-wait withdraws the waiter cleanly.
    ///
    /// # Errors
    ///
    /// Returns `Error::LockTimeout` if either the registry or the key stayed
    /// busy past the configured bound.
    #[tracing::instrument(skip(self), fields(key = %key, owner = %owner))]
    pub async fn acquire(&self, key: &str, owner: &str) -> Result<()> {
        self.structure.acquire(self.timeout).await?;
        let controller = {
            let mut controllers = self.controllers();
            let controller = Arc::clone(controllers.entry(key.to_string()).or_default());
            // Counted before the structural gate opens so eviction cannot race us.
            controller.waiters.fetch_add(1, Ordering::SeqCst);
            controller
        };
        self.structure.release();

        let waiting = WaiterGuard {
            registry: self,
            key,
            controller: &controller,
        };
        let acquired = controller.gate.acquire(self.timeout).await;
        if acquired.is_ok() {
            *controller.holder() = Some(owner.to_string());
        }
        drop(waiting);

        match acquired {
            Ok(()) => {
                tracing::trace!("key lock acquired");
                Ok(())
            }
            Err(err) => {
                tracing::debug!(error = %err, "key lock wait timed out");
                Err(err)
            }
        }
    }

    /// Acquires `key` for `owner` and returns a guard that releases it on drop.
    ///
    /// # Errors
    ///
    /// Same as [`KeyLockRegistry::acquire`].
    pub async fn lock(&self, key: &str, owner: &str) -> Result<KeyLockGuard<'_>> {
        self.acquire(key, owner).await?;
        Ok(KeyLockGuard {
            registry: self,
            key: key.to_string(),
            owner: owner.to_string(),
        })
    }

    /// Releases `key` if `owner` holds it.
    ///
    /// Releasing an unknown key, or a key held by someone else, is logged and
    /// otherwise ignored.
    #[tracing::instrument(skip(self), fields(key = %key, owner = %owner))]
    pub async fn release(&self, key: &str, owner: &str) {
        if !self.release_holder(key, owner) {
            return;
        }
        if let Err(err) = self.structure.acquire(self.timeout).await {
            tracing::warn!(error = %err, "skipping key lock eviction");
            return;
        }
        self.evict_if_idle(key);
        self.structure.release();
    }

    fn release_holder(&self, key: &str, owner: &str) -> bool {
        let Some(controller) = self.controllers().get(key).cloned() else {
            tracing::warn!(key = %key, "release of unknown key lock ignored");
            return false;
        };

        {
            let mut holder = controller.holder();
            match holder.as_deref() {
                Some(current) if current == owner => *holder = None,
                Some(current) => {
                    tracing::warn!(key = %key, holder = %current, "release by non-holder ignored");
                    return false;
                }
                None => {
                    tracing::warn!(key = %key, "release of unheld key lock ignored");
                    return false;
                }
            }
        }
        controller.gate.release();
        true
    }

    // The map mutex orders this check against fetch-or-create, so callers
    // that cannot await may evict without the structural gate.
    fn evict_if_idle(&self, key: &str) {
        let mut controllers = self.controllers();
        if controllers.get(key).is_some_and(|c| c.is_idle()) {
            controllers.remove(key);
            tracing::trace!(key = %key, "key lock evicted");
        }
    }

    /// Returns the current holder of `key`, if any.
    #[must_use]
    pub fn holder(&self, key: &str) -> Option<String> {
        let controller = self.controllers().get(key).cloned()?;
        controller.holder().clone()
    }

    /// Returns how many keys currently have a controller.
    #[must_use]
    pub fn len(&self) -> usize {
        self.controllers().len()
    }

    /// Returns true when no key has a controller.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Decrements a controller's waiter count once its wait ends, including when
/// the acquiring future is dropped.
struct WaiterGuard<'a> {
    registry: &'a KeyLockRegistry,
    key: &'a str,
    controller: &'a KeyLockController,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.controller.waiters.fetch_sub(1, Ordering::SeqCst);
        self.registry.evict_if_idle(self.key);
    }
}

/// RAII guard for a held key.
///
/// The key is automatically released when the guard is dropped.
#[derive(Debug)]
#[must_use = "the key is released as soon as the guard is dropped"]
pub struct KeyLockGuard<'a> {
    registry: &'a KeyLockRegistry,
    key: String,
    owner: String,
}

impl KeyLockGuard<'_> {
    /// The locked key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for KeyLockGuard<'_> {
    fn drop(&mut self) {
        if self.registry.release_holder(&self.key, &self.owner) {
            self.registry.evict_if_idle(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[tokio::test]
    async fn acquire_records_holder_and_release_evicts() {
        let registry = KeyLockRegistry::new();
        registry.acquire("user/42", "a").await.expect("free key");
        assert_eq!(registry.holder("user/42").as_deref(), Some("a"));
        assert_eq!(registry.len(), 1);

        registry.release("user/42", "a").await;
        assert_eq!(registry.holder("user/42"), None);
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn contended_key_times_out() {
        let registry = KeyLockRegistry::with_timeout(Duration::from_secs(2));
        registry.acquire("k", "a").await.unwrap();

        let err = registry.acquire("k", "b").await.expect_err("key is held");
        assert!(matches!(err, Error::LockTimeout { .. }));
        assert_eq!(registry.holder("k").as_deref(), Some("a"));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn release_by_non_holder_is_ignored() {
        let registry = KeyLockRegistry::new();
        registry.acquire("k", "a").await.unwrap();

        registry.release("k", "b").await;
        assert_eq!(registry.holder("k").as_deref(), Some("a"));

        registry.release("k", "a").await;
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn release_of_unknown_key_is_noop() {
        let registry = KeyLockRegistry::new();
        registry.release("missing", "a").await;
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn unrelated_keys_do_not_block() {
        let registry = KeyLockRegistry::with_timeout(Duration::from_millis(50));
        registry.acquire("a", "one").await.unwrap();
        registry.acquire("b", "two").await.expect("different key");
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_keeps_controller_alive_until_served() {
        let registry = Arc::new(KeyLockRegistry::new());
        registry.acquire("k", "a").await.unwrap();

        let waiter = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.acquire("k", "b").await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;

        registry.release("k", "a").await;
        waiter.await.unwrap().expect("waiter should acquire");
        assert_eq!(registry.holder("k").as_deref(), Some("b"));

        registry.release("k", "b").await;
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_wait_does_not_pin_controller() {
        let registry = KeyLockRegistry::new();
        registry.acquire("k", "a").await.unwrap();

        let abandoned =
            tokio::time::timeout(Duration::from_secs(1), registry.acquire("k", "b")).await;
        assert!(abandoned.is_err(), "wait should be cut short");

        registry.release("k", "a").await;
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn guard_releases_on_drop() {
        let registry = KeyLockRegistry::with_timeout(Duration::from_millis(50));
        {
            let guard = registry.lock("k", "a").await.expect("free key");
            assert_eq!(guard.key(), "k");
            assert_eq!(registry.holder("k").as_deref(), Some("a"));
        }
        assert!(registry.is_empty());

        let _again = registry.lock("k", "b").await.expect("released by drop");
        assert_eq!(registry.holder("k").as_deref(), Some("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_holder_task_frees_key() {
        let registry = Arc::new(KeyLockRegistry::new());
        let holder = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                let _guard = registry.lock("k", "a").await.unwrap();
                std::future::pending::<()>().await;
            })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(registry.holder("k").as_deref(), Some("a"));

        holder.abort();
        assert!(holder.await.unwrap_err().is_cancelled());
        assert!(registry.is_empty());
        registry.acquire("k", "b").await.expect("key freed by abort");
    }
}
