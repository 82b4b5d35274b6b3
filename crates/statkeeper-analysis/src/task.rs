//! Analysis tasks: the executable units a job is decomposed into.
//!
//! The scheduler depends only on the [`AnalysisTask`] capability. Two
//! variants exist:
//!
//! - [`OlapAnalysisTask`]: one column of an internal table over a set of partitions
//! - [`ExternalAnalysisTask`]: one column of an external table, or the table's
//!   row count when the task has no column
//!
//! Tasks never report their own status; the dispatcher turns a
//! [`TaskOutcome`] into a status event.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::collector::{CollectResult, CollectionScope, ScanTarget, StatsCollector};
use crate::error::{Error, Result};
use crate::info::{AnalysisInfo, TableKind};
use crate::state::AnalysisState;

/// Message recorded on tasks stopped by [`AnalysisTask::cancel`].
pub const CANCELLED_MESSAGE: &str = "cancelled";

/// How a task execution ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Statistics were collected.
    Finished,
    /// Collection failed with the given reason.
    Failed(String),
    /// The task was cancelled before or during collection.
    Cancelled,
}

impl TaskOutcome {
    /// Returns true for [`TaskOutcome::Finished`].
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Finished)
    }

    /// Task state and message to report for this outcome.
    #[must_use]
    pub fn to_status(&self) -> (AnalysisState, String) {
        match self {
            Self::Finished => (AnalysisState::Finished, String::new()),
            Self::Failed(message) => (AnalysisState::Failed, message.clone()),
            Self::Cancelled => (AnalysisState::Failed, CANCELLED_MESSAGE.to_string()),
        }
    }
}

/// One unit of statistics-collection work.
#[async_trait]
pub trait AnalysisTask: Send + Sync + fmt::Debug {
    /// The task's own record.
    fn info(&self) -> &AnalysisInfo;

    /// Runs the task to completion.
    async fn execute(&self) -> TaskOutcome;

    /// Requests cancellation. Idempotent.
    fn cancel(&self);

    /// Returns true once [`cancel`](Self::cancel) was called.
    fn is_cancelled(&self) -> bool;
}

/// State shared by both task variants.
struct TaskBase {
    info: AnalysisInfo,
    scope: CollectionScope,
    collector: Arc<dyn StatsCollector>,
    cancelled: AtomicBool,
}

impl TaskBase {
    fn new(info: AnalysisInfo, collector: Arc<dyn StatsCollector>) -> Result<Self> {
        let scope = CollectionScope::from_task(&info)?;
        Ok(Self {
            info,
            scope,
            collector,
            cancelled: AtomicBool::new(false),
        })
    }

    async fn run(&self) -> TaskOutcome {
        if self.is_cancelled() {
            return TaskOutcome::Cancelled;
        }
        match self.collector.collect(&self.scope).await {
            _ if self.is_cancelled() => TaskOutcome::Cancelled,
            CollectResult::Collected { rows_scanned } => {
                tracing::debug!(
                    job_id = %self.info.job_id,
                    task_id = %self.scope.task_id,
                    rows_scanned,
                    "collected statistics"
                );
                TaskOutcome::Finished
            }
            CollectResult::Failed(message) => TaskOutcome::Failed(message),
            CollectResult::Cancelled => TaskOutcome::Cancelled,
        }
    }

    fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            self.collector.cancel(&self.scope);
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for TaskBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskBase")
            .field("job_id", &self.info.job_id)
            .field("task_id", &self.scope.task_id)
            .field("target", &self.scope.target)
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Column statistics task for an internal table.
#[derive(Debug)]
pub struct OlapAnalysisTask {
    base: TaskBase,
}

impl OlapAnalysisTask {
    /// Creates a task from a task record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DataDefinition`] if `info` is not an internal-table
    /// task record naming a column and at least one partition.
    pub fn new(info: AnalysisInfo, collector: Arc<dyn StatsCollector>) -> Result<Self> {
        if info.table_kind != TableKind::Internal {
            return Err(Error::data_definition(format!(
                "{} is not an internal table",
                info.table
            )));
        }
        let base = TaskBase::new(info, collector)?;
        match &base.scope.target {
            ScanTarget::Column { partitions, .. } if !partitions.is_empty() => Ok(Self { base }),
            ScanTarget::Column { name, .. } => Err(Error::data_definition(format!(
                "column {name} has no partitions to analyze"
            ))),
            ScanTarget::RowCount => Err(Error::data_definition(
                "internal table tasks analyze exactly one column",
            )),
        }
    }
}

#[async_trait]
impl AnalysisTask for OlapAnalysisTask {
    fn info(&self) -> &AnalysisInfo {
        &self.base.info
    }

    async fn execute(&self) -> TaskOutcome {
        self.base.run().await
    }

    fn cancel(&self) {
        self.base.cancel();
    }

    fn is_cancelled(&self) -> bool {
        self.base.is_cancelled()
    }
}

/// Statistics task for a table in an external catalog.
#[derive(Debug)]
pub struct ExternalAnalysisTask {
    base: TaskBase,
}

impl ExternalAnalysisTask {
    /// Creates a task from a task record; a record without a column is a
    /// table-level row count task.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DataDefinition`] if `info` is not an external-table
    /// task record.
    pub fn new(info: AnalysisInfo, collector: Arc<dyn StatsCollector>) -> Result<Self> {
        if info.table_kind != TableKind::External {
            return Err(Error::data_definition(format!(
                "{} is not an external table",
                info.table
            )));
        }
        Ok(Self {
            base: TaskBase::new(info, collector)?,
        })
    }

    /// Returns true for the table-level row count task.
    #[must_use]
    pub fn is_table_level(&self) -> bool {
        self.base.scope.target == ScanTarget::RowCount
    }
}

#[async_trait]
impl AnalysisTask for ExternalAnalysisTask {
    fn info(&self) -> &AnalysisInfo {
        &self.base.info
    }

    async fn execute(&self) -> TaskOutcome {
        self.base.run().await
    }

    fn cancel(&self) {
        self.base.cancel();
    }

    fn is_cancelled(&self) -> bool {
        self.base.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{FailingCollector, NoOpCollector};
    use crate::info::AnalysisInfoBuilder;
    use statkeeper_core::{TableName, TaskId};
    use std::collections::BTreeSet;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Default)]
    struct CountingCollector {
        cancels: AtomicUsize,
    }

    #[async_trait]
    impl StatsCollector for CountingCollector {
        async fn collect(&self, _scope: &CollectionScope) -> CollectResult {
            CollectResult::Collected { rows_scanned: 42 }
        }

        fn cancel(&self, _scope: &CollectionScope) {
            self.cancels.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn olap_task_info() -> AnalysisInfo {
        let job = AnalysisInfoBuilder::new(TableName::internal("sales", "orders").unwrap())
            .column("amount", ["p1"])
            .build()
            .unwrap();
        job.task_info(TaskId::generate(), Some("amount"), BTreeSet::from(["p1".into()]))
    }

    fn external_job() -> AnalysisInfo {
        AnalysisInfoBuilder::new("hive.web.clicks".parse().unwrap())
            .table_kind(TableKind::External)
            .column("url", ["clicks"])
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn olap_task_finishes() {
        let task = OlapAnalysisTask::new(olap_task_info(), Arc::new(NoOpCollector)).unwrap();
        assert_eq!(task.execute().await, TaskOutcome::Finished);
    }

    #[tokio::test]
    async fn failing_collector_fails_task() {
        let task =
            OlapAnalysisTask::new(olap_task_info(), Arc::new(FailingCollector::new("oom"))).unwrap();
        let outcome = task.execute().await;
        assert_eq!(outcome.to_status(), (AnalysisState::Failed, "oom".to_string()));
    }

    #[tokio::test]
    async fn cancelled_task_does_not_run() {
        let collector = Arc::new(CountingCollector::default());
        let task = OlapAnalysisTask::new(olap_task_info(), collector.clone()).unwrap();
        task.cancel();
        task.cancel();
        assert!(task.is_cancelled());
        assert_eq!(task.execute().await, TaskOutcome::Cancelled);
        assert_eq!(collector.cancels.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn olap_task_rejects_external_table() {
        let job = external_job();
        let info = job.task_info(TaskId::generate(), Some("url"), BTreeSet::from(["clicks".into()]));
        assert!(OlapAnalysisTask::new(info, Arc::new(NoOpCollector)).is_err());
    }

    #[test]
    fn olap_task_requires_partitions() {
        let mut info = olap_task_info();
        info.col_to_partitions.clear();
        assert!(OlapAnalysisTask::new(info, Arc::new(NoOpCollector)).is_err());
    }

    #[tokio::test]
    async fn external_table_level_task() {
        let job = external_job();
        let info = job.task_info(TaskId::generate(), None, BTreeSet::new());
        let task = ExternalAnalysisTask::new(info, Arc::new(NoOpCollector)).unwrap();
        assert!(task.is_table_level());
        assert!(task.execute().await.is_success());
    }
}
