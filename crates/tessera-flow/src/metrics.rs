//! Metrics for journal processing.
//!
//! ## Metrics Exported
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `tessera_journal_entries_appended_total` | Counter | - | Entries appended |
//! | `tessera_journal_entries_archived_total` | Counter | - | Entries archived after processing |
//! | `tessera_journal_pages_deleted_total` | Counter | - | Drained pages removed |
//! | `tessera_journal_process_failures_total` | Counter | process | Processor failures |
//! | `tessera_journal_workers_started_total` | Counter | - | Entity workers started |
//! | `tessera_journal_scheduler_cycle_seconds` | Histogram | - | Scheduler cycle time |
//! | `tessera_journal_tracked_entities` | Gauge | - | Entities with journal pages |
//!
//! Metrics go through the `metrics` crate facade; installing an exporter is
//! the host's concern.

use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: entries appended to journals.
    pub const ENTRIES_APPENDED_TOTAL: &str = "tessera_journal_entries_appended_total";
    /// Counter: entries archived after processing.
    pub const ENTRIES_ARCHIVED_TOTAL: &str = "tessera_journal_entries_archived_total";
    /// Counter: drained pages deleted.
    pub const PAGES_DELETED_TOTAL: &str = "tessera_journal_pages_deleted_total";
    /// Counter: processor failures.
    pub const PROCESS_FAILURES_TOTAL: &str = "tessera_journal_process_failures_total";
    /// Counter: entity workers started.
    pub const WORKERS_STARTED_TOTAL: &str = "tessera_journal_workers_started_total";
    /// Histogram: scheduler cycle duration in seconds.
    pub const SCHEDULER_CYCLE_SECONDS: &str = "tessera_journal_scheduler_cycle_seconds";
    /// Gauge: entities with at least one journal page.
    pub const TRACKED_ENTITIES: &str = "tessera_journal_tracked_entities";
}

/// Label keys used across metrics.
pub mod labels {
    /// Journal processor name.
    pub const PROCESS: &str = "process";
}

/// Records journal metrics with consistent names and labels.
#[derive(Debug, Clone, Copy, Default)]
pub struct JournalMetrics;

impl JournalMetrics {
    /// Creates a new metrics recorder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Counts one appended entry.
    pub fn record_append(&self) {
        counter!(names::ENTRIES_APPENDED_TOTAL).increment(1);
    }

    /// Counts one archived entry.
    pub fn record_archive(&self) {
        counter!(names::ENTRIES_ARCHIVED_TOTAL).increment(1);
    }

    /// Counts deleted pages.
    pub fn record_pages_deleted(&self, count: usize) {
        counter!(names::PAGES_DELETED_TOTAL).increment(u64::try_from(count).unwrap_or(u64::MAX));
    }

    /// Counts a processor failure.
    pub fn record_process_failure(&self, process: &str) {
        counter!(
            names::PROCESS_FAILURES_TOTAL,
            labels::PROCESS => process.to_string(),
        )
        .increment(1);
    }

    /// Counts a started entity worker.
    pub fn record_worker_started(&self) {
        counter!(names::WORKERS_STARTED_TOTAL).increment(1);
    }

    /// Records scheduler cycle duration.
    pub fn observe_cycle_duration(&self, duration: Duration) {
        histogram!(names::SCHEDULER_CYCLE_SECONDS).record(duration.as_secs_f64());
    }

    /// Sets the number of tracked entities.
    #[allow(clippy::cast_precision_loss)]
    pub fn set_tracked_entities(&self, count: usize) {
        gauge!(names::TRACKED_ENTITIES).set(count as f64);
    }
}

/// Calls `on_drop` with the elapsed time when dropped.
pub struct TimingGuard<F>
where
    F: FnOnce(Duration),
{
    start: Instant,
    on_drop: Option<F>,
}

impl<F> TimingGuard<F>
where
    F: FnOnce(Duration),
{
    /// Starts timing.
    pub fn new(on_drop: F) -> Self {
        Self {
            start: Instant::now(),
            on_drop: Some(on_drop),
        }
    }

    /// Returns the elapsed time since the guard was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl<F> Drop for TimingGuard<F>
where
    F: FnOnce(Duration),
{
    fn drop(&mut self) {
        if let Some(f) = self.on_drop.take() {
            f(self.start.elapsed());
        }
    }
}

/// Creates a timing guard for one scheduler cycle.
#[must_use]
pub fn time_scheduler_cycle(metrics: JournalMetrics) -> TimingGuard<impl FnOnce(Duration)> {
    TimingGuard::new(move |duration| metrics.observe_cycle_duration(duration))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn journal_metrics_record_without_recorder() {
        let metrics = JournalMetrics::new();
        metrics.record_append();
        metrics.record_archive();
        metrics.record_pages_deleted(2);
        metrics.record_process_failure("audit");
        metrics.record_worker_started();
        metrics.set_tracked_entities(3);
        metrics.observe_cycle_duration(Duration::from_millis(5));
    }

    #[test]
    fn timing_guard_measures_duration() {
        let mut recorded = None;
        {
            let _guard = TimingGuard::new(|d| recorded = Some(d));
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(recorded.is_some_and(|d| d >= Duration::from_millis(10)));
    }

    #[test]
    fn scheduler_cycle_guard_records_on_drop() {
        let guard = time_scheduler_cycle(JournalMetrics::new());
        assert!(guard.elapsed() < Duration::from_secs(60));
    }
}
