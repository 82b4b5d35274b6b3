//! Task status events.

use chrono::{DateTime, Utc};

use statkeeper_core::{JobId, TaskId};

use crate::info::AnalysisInfo;
use crate::state::AnalysisState;

/// The latest observed state of one task.
///
/// Produced by a running task (or a caller acting for one) and consumed once
/// by the manager's aggregation step. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskStatusWrapper {
    /// Parent job.
    pub job_id: JobId,
    /// Reporting task.
    pub task_id: TaskId,
    /// New task state.
    pub state: AnalysisState,
    /// Status message, typically the failure reason.
    pub message: String,
    /// When the state was observed.
    pub time: DateTime<Utc>,
}

impl TaskStatusWrapper {
    /// Creates a status event.
    #[must_use]
    pub fn new(
        job_id: JobId,
        task_id: TaskId,
        state: AnalysisState,
        message: impl Into<String>,
        time: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id,
            task_id,
            state,
            message: message.into(),
            time,
        }
    }

    /// Creates a status event for a task record.
    ///
    /// Returns `None` when `info` is a job record.
    #[must_use]
    pub fn for_task(
        info: &AnalysisInfo,
        state: AnalysisState,
        message: impl Into<String>,
        time: DateTime<Utc>,
    ) -> Option<Self> {
        info.task_id
            .map(|task_id| Self::new(info.job_id, task_id, state, message, time))
    }
}
