//! Scheduler metrics.
//!
//! Recorded through the `metrics` facade; install any exporter to collect them.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `statkeeper_jobs_submitted_total` | Counter | `mode`, `job_type` |
//! | `statkeeper_jobs_completed_total` | Counter | `job_type`, `state` |
//! | `statkeeper_task_transitions_total` | Counter | `to_state` |
//! | `statkeeper_ignored_status_events_total` | Counter | - |
//! | `statkeeper_replayed_records_total` | Counter | `op` |
//! | `statkeeper_inflight_jobs` | Gauge | - |
//! | `statkeeper_task_duration_seconds` | Histogram | `state` |

use std::time::Instant;

use metrics::{counter, gauge, histogram};

use crate::info::JobType;
use crate::state::AnalysisState;

/// Metric names.
pub mod names {
    /// Counter: jobs accepted by `build_and_assign_job`.
    pub const JOBS_SUBMITTED_TOTAL: &str = "statkeeper_jobs_submitted_total";
    /// Counter: jobs reaching a terminal state.
    pub const JOBS_COMPLETED_TOTAL: &str = "statkeeper_jobs_completed_total";
    /// Counter: applied task state changes.
    pub const TASK_TRANSITIONS_TOTAL: &str = "statkeeper_task_transitions_total";
    /// Counter: status events for unknown or finished jobs.
    pub const IGNORED_STATUS_EVENTS_TOTAL: &str = "statkeeper_ignored_status_events_total";
    /// Counter: edit log records applied by replay.
    pub const REPLAYED_RECORDS_TOTAL: &str = "statkeeper_replayed_records_total";
    /// Gauge: jobs with tracked tasks.
    pub const INFLIGHT_JOBS: &str = "statkeeper_inflight_jobs";
    /// Histogram: task execution time in seconds.
    pub const TASK_DURATION_SECONDS: &str = "statkeeper_task_duration_seconds";
}

/// Label keys.
pub mod labels {
    /// `sync`, `async` or `period`.
    pub const MODE: &str = "mode";
    /// `manual` or `system`.
    pub const JOB_TYPE: &str = "job_type";
    /// Final state.
    pub const STATE: &str = "state";
    /// Target task state.
    pub const TO_STATE: &str = "to_state";
    /// Edit log operation.
    pub const OP: &str = "op";
}

/// Records scheduler metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnalysisMetrics;

impl AnalysisMetrics {
    /// Creates a recorder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Counts an accepted job.
    pub fn record_job_submitted(&self, mode: &'static str, job_type: JobType) {
        counter!(
            names::JOBS_SUBMITTED_TOTAL,
            labels::MODE => mode,
            labels::JOB_TYPE => job_type.as_label(),
        )
        .increment(1);
    }

    /// Counts a job reaching a terminal state.
    pub fn record_job_completed(&self, job_type: JobType, state: AnalysisState) {
        counter!(
            names::JOBS_COMPLETED_TOTAL,
            labels::JOB_TYPE => job_type.as_label(),
            labels::STATE => state.as_label(),
        )
        .increment(1);
    }

    /// Counts an applied task state change.
    pub fn record_task_transition(&self, to_state: AnalysisState) {
        counter!(names::TASK_TRANSITIONS_TOTAL, labels::TO_STATE => to_state.as_label())
            .increment(1);
    }

    /// Counts a dropped status event.
    pub fn record_ignored_status_event(&self) {
        counter!(names::IGNORED_STATUS_EVENTS_TOTAL).increment(1);
    }

    /// Counts a replayed record.
    pub fn record_replayed(&self, op: &'static str) {
        counter!(names::REPLAYED_RECORDS_TOTAL, labels::OP => op).increment(1);
    }

    /// Sets the number of in-flight jobs.
    #[allow(clippy::cast_precision_loss)] // Gauge values are small.
    pub fn set_inflight_jobs(&self, count: usize) {
        gauge!(names::INFLIGHT_JOBS).set(count as f64);
    }

    /// Starts timing a task execution.
    #[must_use]
    pub fn start_task_timer(&self) -> TaskTimer {
        TaskTimer {
            start: Instant::now(),
        }
    }
}

/// Measures one task execution.
#[derive(Debug)]
pub struct TaskTimer {
    start: Instant,
}

impl TaskTimer {
    /// Records the elapsed time labelled with the final task state.
    pub fn finish(self, state: AnalysisState) {
        histogram!(names::TASK_DURATION_SECONDS, labels::STATE => state.as_label())
            .record(self.start.elapsed().as_secs_f64());
    }
}
