//! Path-scoped, expiring locks for partial record edits.
//!
//! A lock path has the form `{dataType}/{dataId}[/{subPath}...]`. Two locks on
//! the same record overlap when one sub-path is a prefix of the other; an
//! empty sub-path covers the whole record. Overlapping locks must share an
//! owner.
//!
//! Expiry is lazy. Nothing sweeps the table in the background: each
//! [`PathLockTable::lock`] call drops expired entries before scanning, so
//! [`PathLockTable::len`] may count dead locks until the next lock attempt.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::observability::lock_span;

/// Default expiry applied to requests that do not name a duration.
pub const DEFAULT_MAX_LOCK_DURATION: Duration = Duration::from_secs(60);

/// A parsed lock path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockPath {
    /// Record type.
    pub data_type: String,
    /// Record identifier.
    pub data_id: String,
    /// Segments below the record; empty means the whole record.
    pub sub_path: Vec<String>,
}

impl LockPath {
    /// Parses `{dataType}/{dataId}[/{subPath}...]`.
    ///
    /// A leading `/` is ignored and parsing stops at the first empty segment,
    /// so `user/42//x` locks `user/42`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidPath` when fewer than two segments remain.
    pub fn parse(path: &str) -> Result<Self> {
        let trimmed = path.strip_prefix('/').unwrap_or(path);
        let mut segments = trimmed
            .split('/')
            .take_while(|segment| !segment.is_empty())
            .map(str::to_string);

        match (segments.next(), segments.next()) {
            (Some(data_type), Some(data_id)) => Ok(Self {
                data_type,
                data_id,
                sub_path: segments.collect(),
            }),
            _ => Err(Error::InvalidPath {
                path: path.to_string(),
            }),
        }
    }
}

/// Returns true when one segment list is a leading prefix of the other.
#[must_use]
pub fn prefix_match(a: &[String], b: &[String]) -> bool {
    a.iter().zip(b).all(|(x, y)| x == y)
}

/// A request to lock a path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRequest {
    /// Requesting owner.
    pub owner: String,
    /// Path to lock.
    pub path: String,
    /// How long the lock lives once granted.
    pub duration: Duration,
}

/// A granted path lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathLock {
    /// Opaque handle presented on unlock.
    pub handle: String,
    /// Record type.
    pub data_type: String,
    /// Record identifier.
    pub data_id: String,
    /// Locked segments below the record.
    pub sub_path: Vec<String>,
    /// Owning party.
    pub owner: String,
    /// When the lock stops counting.
    pub expire_at: DateTime<Utc>,
}

impl PathLock {
    /// Returns whether the lock has expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expire_at < now
    }

    /// Returns whether this lock's scope overlaps `path`.
    #[must_use]
    pub fn overlaps(&self, path: &LockPath) -> bool {
        self.data_type == path.data_type
            && self.data_id == path.data_id
            && prefix_match(&self.sub_path, &path.sub_path)
    }
}

/// Table of path locks keyed by handle.
#[derive(Debug)]
pub struct PathLockTable {
    locks: Mutex<BTreeMap<String, PathLock>>,
    max_lock_duration: Duration,
}

impl Default for PathLockTable {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LOCK_DURATION)
    }
}

impl PathLockTable {
    /// Creates a table whose requests default to `max_lock_duration`.
    #[must_use]
    pub fn new(max_lock_duration: Duration) -> Self {
        Self {
            locks: Mutex::new(BTreeMap::new()),
            max_lock_duration,
        }
    }

    fn locks(&self) -> MutexGuard<'_, BTreeMap<String, PathLock>> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Builds a lock request.
    ///
    /// An empty `owner` gets a fresh unique id. A non-positive
    /// `duration_secs` falls back to the table default.
    #[must_use]
    pub fn new_request(&self, owner: &str, path: &str, duration_secs: i64) -> LockRequest {
        let owner = if owner.is_empty() {
            Ulid::new().to_string()
        } else {
            owner.to_string()
        };
        let duration = u64::try_from(duration_secs)
            .ok()
            .filter(|secs| *secs > 0)
            .map_or(self.max_lock_duration, Duration::from_secs);

        LockRequest {
            owner,
            path: path.to_string(),
            duration,
        }
    }

    /// Grants a lock and returns its handle.
    ///
    /// A repeat request by the same owner on an overlapping path refreshes
    /// the existing lock, moves it to the requested scope and returns its
    /// handle.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidPath` if the path names no record.
    /// - `Error::LockConflict` if a live overlapping lock has another owner.
    /// - `Error::InvalidInput` if the expiry would fall outside the
    ///   representable time range.
    #[tracing::instrument(skip(self, request), fields(path = %request.path, owner = %request.owner))]
    pub fn lock(&self, request: &LockRequest) -> Result<String> {
        self.lock_at(request, Utc::now())
    }

    fn lock_at(&self, request: &LockRequest, now: DateTime<Utc>) -> Result<String> {
        let target = LockPath::parse(&request.path)?;
        let ttl = TimeDelta::from_std(request.duration)
            .map_err(|_| Error::InvalidInput(format!("lock duration {:?}", request.duration)))?;
        let expire_at = now
            .checked_add_signed(ttl)
            .ok_or_else(|| Error::InvalidInput(format!("lock duration {:?}", request.duration)))?;

        let mut locks = self.locks();
        locks.retain(|_, lock| !lock.is_expired_at(now));

        if let Some(conflict) = locks
            .values()
            .find(|lock| lock.overlaps(&target) && lock.owner != request.owner)
        {
            tracing::debug!(handle = %conflict.handle, "path lock conflict");
            return Err(Error::LockConflict {
                handle: conflict.handle.clone(),
            });
        }

        if let Some(existing) = locks.values_mut().find(|lock| lock.overlaps(&target)) {
            existing.sub_path = target.sub_path;
            existing.expire_at = expire_at;
            tracing::debug!(handle = %existing.handle, "path lock refreshed");
            return Ok(existing.handle.clone());
        }

        let handle = Uuid::new_v4().to_string();
        locks.insert(
            handle.clone(),
            PathLock {
                handle: handle.clone(),
                data_type: target.data_type,
                data_id: target.data_id,
                sub_path: target.sub_path,
                owner: request.owner.clone(),
                expire_at,
            },
        );
        tracing::debug!(handle = %handle, "path lock granted");
        Ok(handle)
    }

    /// Removes a lock. Unknown handles are ignored.
    pub fn unlock(&self, handle: &str) {
        let _span = lock_span("unlock", handle).entered();
        if self.locks().remove(handle).is_none() {
            tracing::debug!(handle = %handle, "unlock of unknown handle ignored");
        }
    }

    /// Returns a snapshot of a live lock.
    #[must_use]
    pub fn get(&self, handle: &str) -> Option<PathLock> {
        let now = Utc::now();
        self.locks()
            .get(handle)
            .filter(|lock| !lock.is_expired_at(now))
            .cloned()
    }

    /// Number of stored locks, including expired ones not yet dropped.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks().len()
    }

    /// Returns true when no locks are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segments(path: &[&str]) -> Vec<String> {
        path.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn parse_path() {
        let path = LockPath::parse("/user/42/addr/city").unwrap();
        assert_eq!(path.data_type, "user");
        assert_eq!(path.data_id, "42");
        assert_eq!(path.sub_path, segments(&["addr", "city"]));

        let whole = LockPath::parse("user/42/").unwrap();
        assert!(whole.sub_path.is_empty());

        let truncated = LockPath::parse("user/42//city").unwrap();
        assert!(truncated.sub_path.is_empty());
    }

    #[test]
    fn parse_rejects_short_paths() {
        for path in ["", "/", "user", "user/", "user//42"] {
            let err = LockPath::parse(path).expect_err(path);
            assert!(matches!(err, Error::InvalidPath { .. }), "{path}");
        }
    }

    #[test]
    fn prefix_match_semantics() {
        assert!(prefix_match(&[], &segments(&["a"])));
        assert!(prefix_match(&segments(&["a"]), &segments(&["a", "b"])));
        assert!(prefix_match(&segments(&["a", "b"]), &segments(&["a"])));
        assert!(!prefix_match(&segments(&["a", "b"]), &segments(&["a", "c"])));
    }

    #[test]
    fn new_request_defaults() {
        let table = PathLockTable::new(Duration::from_secs(45));
        let request = table.new_request("", "user/42", 0);
        assert!(!request.owner.is_empty());
        assert_eq!(request.duration, Duration::from_secs(45));

        let negative = table.new_request("a", "user/42", -5);
        assert_eq!(negative.owner, "a");
        assert_eq!(negative.duration, Duration::from_secs(45));

        let explicit = table.new_request("a", "user/42", 30);
        assert_eq!(explicit.duration, Duration::from_secs(30));
    }

    #[test]
    fn conflicting_owner_is_rejected() {
        let table = PathLockTable::default();
        let handle = table
            .lock(&table.new_request("ownerA", "user/42/addr", 30))
            .unwrap();

        let err = table
            .lock(&table.new_request("ownerB", "user/42/addr/city", 30))
            .expect_err("overlapping path");
        match err {
            Error::LockConflict { handle: conflict } => assert_eq!(conflict, handle),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn same_owner_relock_moves_scope() {
        let table = PathLockTable::default();
        let handle = table
            .lock(&table.new_request("ownerA", "user/42/addr", 30))
            .unwrap();

        let again = table
            .lock(&table.new_request("ownerA", "user/42/addr/city", 30))
            .unwrap();
        assert_eq!(again, handle);
        assert_eq!(table.len(), 1);

        let lock = table.get(&handle).unwrap();
        assert_eq!(lock.sub_path, segments(&["addr", "city"]));

        // The narrowed scope no longer covers a sibling.
        table
            .lock(&table.new_request("ownerB", "user/42/addr/zip", 30))
            .expect("disjoint sub-path");
    }

    #[test]
    fn disjoint_paths_and_records_coexist() {
        let table = PathLockTable::default();
        table
            .lock(&table.new_request("a", "user/42/addr", 30))
            .unwrap();
        table
            .lock(&table.new_request("b", "user/42/name", 30))
            .unwrap();
        table.lock(&table.new_request("c", "user/43", 30)).unwrap();
        table.lock(&table.new_request("d", "host/42", 30)).unwrap();
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn whole_record_lock_covers_sub_paths() {
        let table = PathLockTable::default();
        table.lock(&table.new_request("a", "user/42", 30)).unwrap();
        let err = table
            .lock(&table.new_request("b", "user/42/addr", 30))
            .unwrap_err();
        assert!(matches!(err, Error::LockConflict { .. }));
    }

    #[test]
    fn unlock_is_idempotent() {
        let table = PathLockTable::default();
        let handle = table.lock(&table.new_request("a", "user/42", 30)).unwrap();

        table.unlock(&handle);
        table.unlock(&handle);
        assert!(table.is_empty());
        assert!(table.get(&handle).is_none());

        table
            .lock(&table.new_request("b", "user/42", 30))
            .expect("released path is free");
    }

    #[test]
    fn expired_lock_is_ignored_and_dropped_lazily() {
        let table = PathLockTable::default();
        let now = Utc::now();
        table
            .lock_at(&table.new_request("a", "user/42", 5), now)
            .unwrap();
        table
            .lock_at(&table.new_request("a", "host/1", 5), now)
            .unwrap();
        assert_eq!(table.len(), 2);

        let later = now + TimeDelta::seconds(10);
        // Still counted until the next lock attempt prunes it.
        assert_eq!(table.len(), 2);
        table
            .lock_at(&table.new_request("b", "user/42", 5), later)
            .expect("expired lock must not block");
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn oversized_duration_is_rejected() {
        let table = PathLockTable::default();
        for secs in [9_000_000_000_000_000, 1_000_000_000_000_000] {
            let err = table
                .lock(&table.new_request("a", "user/42", secs))
                .expect_err("expiry out of range");
            assert!(matches!(err, Error::InvalidInput(_)), "{secs}: {err}");
        }
        assert!(table.is_empty());

        table
            .lock(&table.new_request("a", "user/42", 86_400))
            .expect("a day is fine");
    }
}
