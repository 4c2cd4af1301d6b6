//! Observability metrics for the reconciliation scheduler.
//!
//! Metrics are emitted through the `metrics` facade; `reef-api` installs the
//! Prometheus recorder and exposes `/metrics`.
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `reef_operations_total` | Counter | `from_state`, `to_state` | Operation state transitions |
//! | `reef_operation_dispatches_total` | Counter | `result` | Dispatch outcomes (claimed, conflict) |
//! | `reef_scheduler_tick_duration_seconds` | Histogram | - | Scheduler tick processing time |
//! | `reef_reconciliations_finished_total` | Counter | `status` | Finished reconciliations by final status |
//! | `reef_reconciliations_active` | Gauge | - | Currently in-flight reconciliations |

use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: operation state transitions.
    pub const OPERATIONS_TOTAL: &str = "reef_operations_total";
    /// Counter: dispatch outcomes.
    pub const OPERATION_DISPATCHES_TOTAL: &str = "reef_operation_dispatches_total";
    /// Histogram: scheduler tick processing time in seconds.
    pub const SCHEDULER_TICK_DURATION_SECONDS: &str = "reef_scheduler_tick_duration_seconds";
    /// Counter: finished reconciliations by final status.
    pub const RECONCILIATIONS_FINISHED_TOTAL: &str = "reef_reconciliations_finished_total";
    /// Gauge: currently in-flight reconciliations.
    pub const RECONCILIATIONS_ACTIVE: &str = "reef_reconciliations_active";
}

/// Label keys used across metrics.
pub mod labels {
    /// Previous operation state (for transitions).
    pub const FROM_STATE: &str = "from_state";
    /// Target operation state (for transitions).
    pub const TO_STATE: &str = "to_state";
    /// Dispatch result (claimed, conflict).
    pub const RESULT: &str = "result";
    /// Final reconciliation status (ready, error).
    pub const STATUS: &str = "status";
}

/// High-level interface for recording scheduler metrics.
///
/// Cheap to clone and share across dispatch tasks.
#[derive(Debug, Clone, Default)]
pub struct SchedulerMetrics;

impl SchedulerMetrics {
    /// Creates a new metrics recorder.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Records an operation state transition.
    pub fn record_operation_transition(&self, from_state: &str, to_state: &str) {
        counter!(
            names::OPERATIONS_TOTAL,
            labels::FROM_STATE => from_state.to_string(),
            labels::TO_STATE => to_state.to_string(),
        )
        .increment(1);
    }

    /// Records the outcome of one dispatch attempt.
    pub fn record_dispatch(&self, result: &str) {
        counter!(
            names::OPERATION_DISPATCHES_TOTAL,
            labels::RESULT => result.to_string(),
        )
        .increment(1);
    }

    /// Records a finished reconciliation.
    pub fn record_finished(&self, status: &str) {
        counter!(
            names::RECONCILIATIONS_FINISHED_TOTAL,
            labels::STATUS => status.to_string(),
        )
        .increment(1);
    }

    /// Sets the number of in-flight reconciliations.
    #[allow(clippy::cast_precision_loss)] // Gauge values are small
    pub fn set_active_reconciliations(&self, count: usize) {
        gauge!(names::RECONCILIATIONS_ACTIVE).set(count as f64);
    }

    /// Records scheduler tick duration.
    pub fn observe_tick_duration(&self, duration: Duration) {
        histogram!(names::SCHEDULER_TICK_DURATION_SECONDS).record(duration.as_secs_f64());
    }
}

/// RAII guard for timing operations; records the duration when dropped.
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
    /// Creates a guard that calls `on_drop` with the elapsed duration.
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

/// Creates a timing guard for scheduler tick metrics.
#[must_use]
pub fn time_scheduler_tick() -> TimingGuard<impl FnOnce(Duration)> {
    TimingGuard::new(|duration| {
        histogram!(names::SCHEDULER_TICK_DURATION_SECONDS).record(duration.as_secs_f64());
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_do_not_panic_without_recorder() {
        let metrics = SchedulerMetrics::new();
        metrics.record_operation_transition("new", "in_progress");
        metrics.record_dispatch("claimed");
        metrics.record_finished("ready");
        metrics.set_active_reconciliations(3);
        metrics.observe_tick_duration(Duration::from_millis(5));
    }

    #[test]
    fn timing_guard_measures_duration() {
        let mut recorded = None;
        {
            let _guard = TimingGuard::new(|d| recorded = Some(d));
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(recorded.is_some_and(|d| d >= Duration::from_millis(5)));
    }
}
