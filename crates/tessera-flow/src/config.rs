//! Runtime configuration for journal processing and locks.
//!
//! All values come from environment variables with strict validation:
//! numeric values must be positive integers, and a malformed value is an
//! error rather than a silent fallback.

use std::str::FromStr;
use std::time::Duration;

use tessera_core::{KeyLockRegistry, PathLockTable};

use crate::error::{Error, Result};

const ENV_JOURNAL_TABLE: &str = "TESSERA_JOURNAL_TABLE";
const ENV_POLL_INTERVAL_SECS: &str = "TESSERA_JOURNAL_POLL_INTERVAL_SECS";
const ENV_MAX_ENTRIES_PER_PASS: &str = "TESSERA_JOURNAL_MAX_ENTRIES_PER_PASS";
const ENV_WORKER_QUEUE_CAPACITY: &str = "TESSERA_WORKER_QUEUE_CAPACITY";
const ENV_LOCK_TIMEOUT_SECS: &str = "TESSERA_LOCK_TIMEOUT_SECS";
const ENV_PATH_LOCK_MAX_DURATION_SECS: &str = "TESSERA_PATH_LOCK_MAX_DURATION_SECS";

/// Default journal table name.
pub const DEFAULT_JOURNAL_TABLE: &str = "journal";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;
const DEFAULT_MAX_ENTRIES_PER_PASS: usize = 100;
const DEFAULT_WORKER_QUEUE_CAPACITY: usize = 1;
const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 10;
const DEFAULT_PATH_LOCK_MAX_DURATION_SECS: u64 = 60;

/// Runtime settings shared by the journal store, scheduler and locks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Storage table holding journal pages.
    pub journal_table: String,
    /// Delay between scheduler cycles.
    pub poll_interval: Duration,
    /// Upper bound on entries one worker pass drains.
    pub max_entries_per_pass: usize,
    /// Capacity of each worker's event queue.
    pub worker_queue_capacity: usize,
    /// Wait bound for key lock acquisition.
    pub lock_timeout: Duration,
    /// Default lifetime of a path lock.
    pub max_lock_duration: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            journal_table: DEFAULT_JOURNAL_TABLE.to_string(),
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            max_entries_per_pass: DEFAULT_MAX_ENTRIES_PER_PASS,
            worker_queue_capacity: DEFAULT_WORKER_QUEUE_CAPACITY,
            lock_timeout: Duration::from_secs(DEFAULT_LOCK_TIMEOUT_SECS),
            max_lock_duration: Duration::from_secs(DEFAULT_PATH_LOCK_MAX_DURATION_SECS),
        }
    }
}

impl RuntimeConfig {
    /// Loads runtime config from the process environment.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the offending variable.
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Loads runtime config with a custom environment source.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the offending variable.
    pub fn from_env_with<F>(get_env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let journal_table = match get_env(ENV_JOURNAL_TABLE) {
            Some(raw) if raw.trim().is_empty() => {
                return Err(Error::configuration(format!(
                    "{ENV_JOURNAL_TABLE} must not be empty"
                )));
            }
            Some(raw) => raw.trim().to_string(),
            None => DEFAULT_JOURNAL_TABLE.to_string(),
        };

        let poll_interval = Duration::from_secs(parse_positive_env(
            &get_env,
            ENV_POLL_INTERVAL_SECS,
            DEFAULT_POLL_INTERVAL_SECS,
        )?);
        let max_entries_per_pass = parse_positive_env(
            &get_env,
            ENV_MAX_ENTRIES_PER_PASS,
            DEFAULT_MAX_ENTRIES_PER_PASS,
        )?;
        let worker_queue_capacity = parse_positive_env(
            &get_env,
            ENV_WORKER_QUEUE_CAPACITY,
            DEFAULT_WORKER_QUEUE_CAPACITY,
        )?;
        let lock_timeout = Duration::from_secs(parse_positive_env(
            &get_env,
            ENV_LOCK_TIMEOUT_SECS,
            DEFAULT_LOCK_TIMEOUT_SECS,
        )?);
        let max_lock_duration = Duration::from_secs(parse_positive_env(
            &get_env,
            ENV_PATH_LOCK_MAX_DURATION_SECS,
            DEFAULT_PATH_LOCK_MAX_DURATION_SECS,
        )?);

        Ok(Self {
            journal_table,
            poll_interval,
            max_entries_per_pass,
            worker_queue_capacity,
            lock_timeout,
            max_lock_duration,
        })
    }

    /// Builds a key lock registry with the configured timeout.
    #[must_use]
    pub fn key_lock_registry(&self) -> KeyLockRegistry {
        KeyLockRegistry::with_timeout(self.lock_timeout)
    }

    /// Builds a path lock table with the configured default expiry.
    #[must_use]
    pub fn path_lock_table(&self) -> PathLockTable {
        PathLockTable::new(self.max_lock_duration)
    }
}

fn parse_positive_env<T, F>(get_env: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr + Default + PartialEq,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = get_env(key) else {
        return Ok(default);
    };

    let parsed = raw.trim().parse::<T>().map_err(|_| {
        Error::configuration(format!("{key} must be a positive integer, got '{raw}'"))
    })?;
    if parsed == T::default() {
        return Err(Error::configuration(format!(
            "{key} must be greater than zero"
        )));
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = RuntimeConfig::from_env_with(|_| None).unwrap();
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(config.journal_table, "journal");
        assert_eq!(config.poll_interval, Duration::from_secs(10));
        assert_eq!(config.lock_timeout, Duration::from_secs(10));
        assert_eq!(config.max_entries_per_pass, 100);
        assert_eq!(config.worker_queue_capacity, 1);
        assert_eq!(config.max_lock_duration, Duration::from_secs(60));
    }

    #[test]
    fn default_tracks_env_defaults() {
        let defaults = RuntimeConfig::default();
        assert_eq!(defaults.max_entries_per_pass, DEFAULT_MAX_ENTRIES_PER_PASS);
        assert_eq!(defaults.worker_queue_capacity, DEFAULT_WORKER_QUEUE_CAPACITY);

        let explicit = RuntimeConfig::from_env_with(env(&[
            (ENV_MAX_ENTRIES_PER_PASS, "100"),
            (ENV_WORKER_QUEUE_CAPACITY, "1"),
        ]))
        .unwrap();
        assert_eq!(explicit, defaults);
    }

    #[test]
    fn reads_overrides() {
        let config = RuntimeConfig::from_env_with(env(&[
            (ENV_JOURNAL_TABLE, "audit"),
            (ENV_POLL_INTERVAL_SECS, "2"),
            (ENV_MAX_ENTRIES_PER_PASS, "5"),
            (ENV_WORKER_QUEUE_CAPACITY, "8"),
            (ENV_LOCK_TIMEOUT_SECS, "3"),
            (ENV_PATH_LOCK_MAX_DURATION_SECS, "120"),
        ]))
        .unwrap();

        assert_eq!(config.journal_table, "audit");
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert_eq!(config.max_entries_per_pass, 5);
        assert_eq!(config.worker_queue_capacity, 8);
        assert_eq!(config.lock_timeout, Duration::from_secs(3));
        assert_eq!(config.max_lock_duration, Duration::from_secs(120));
    }

    #[test]
    fn rejects_zero_and_garbage() {
        let zero = RuntimeConfig::from_env_with(env(&[(ENV_POLL_INTERVAL_SECS, "0")]))
            .expect_err("zero interval");
        assert!(zero.to_string().contains(ENV_POLL_INTERVAL_SECS));

        let garbage = RuntimeConfig::from_env_with(env(&[(ENV_LOCK_TIMEOUT_SECS, "ten")]))
            .expect_err("non-numeric timeout");
        assert!(matches!(garbage, Error::Configuration { .. }));
        assert!(garbage.to_string().contains("'ten'"));
    }

    #[test]
    fn builds_locks_from_settings() {
        let config = RuntimeConfig {
            lock_timeout: Duration::from_secs(3),
            ..RuntimeConfig::default()
        };
        assert_eq!(config.key_lock_registry().timeout(), Duration::from_secs(3));

        let table = config.path_lock_table();
        let request = table.new_request("ownerA", "user/42", 0);
        assert_eq!(request.duration, Duration::from_secs(60));
    }

    #[test]
    fn rejects_empty_table_name() {
        let err = RuntimeConfig::from_env_with(env(&[(ENV_JOURNAL_TABLE, "  ")]))
            .expect_err("empty table");
        assert!(err.to_string().contains(ENV_JOURNAL_TABLE));
    }
}
