//! Inline execution of synchronous jobs.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use futures::future::BoxFuture;
use futures::stream;

use statkeeper_core::TaskId;

use crate::task::{AnalysisTask, TaskOutcome};

/// Outcome of one task of a synchronous job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskReport {
    /// Executed task.
    pub task_id: Option<TaskId>,
    /// Column it analyzed, `None` for table-level tasks.
    pub col_name: Option<String>,
    /// How it ended.
    pub outcome: TaskOutcome,
}

/// Outcome of a synchronous job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Per-task outcomes, in completion order.
    pub tasks: Vec<TaskReport>,
}

impl SyncReport {
    /// Returns true if every task finished.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.tasks.iter().all(|t| t.outcome.is_success())
    }

    /// Columns whose task did not finish.
    #[must_use]
    pub fn failed_columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = self
            .tasks
            .iter()
            .filter(|t| !t.outcome.is_success())
            .map(|t| t.col_name.clone().unwrap_or_else(|| "<table>".to_string()))
            .collect();
        columns.sort();
        columns
    }

    /// Summary suitable for a job message, `None` on success.
    #[must_use]
    pub fn failure_message(&self) -> Option<String> {
        if self.is_success() {
            return None;
        }
        Some(format!(
            "failed to analyze following columns: [{}]",
            self.failed_columns().join(",")
        ))
    }
}

/// Runs a set of tasks to completion in the caller's context.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Executes every task and reports their outcomes.
    async fn sync_execute(&self, tasks: Vec<Arc<dyn AnalysisTask>>) -> SyncReport;
}

/// Executes tasks on the calling task with bounded parallelism.
#[derive(Debug, Clone)]
pub struct InlineExecutor {
    parallelism: usize,
}

impl InlineExecutor {
    /// Creates an executor running up to `parallelism` tasks at once.
    #[must_use]
    pub fn new(parallelism: usize) -> Self {
        Self {
            parallelism: parallelism.max(1),
        }
    }
}

impl Default for InlineExecutor {
    fn default() -> Self {
        Self::new(1)
    }
}

#[async_trait]
impl TaskExecutor for InlineExecutor {
    #[tracing::instrument(skip_all, fields(tasks = tasks.len(), parallelism = self.parallelism))]
    async fn sync_execute(&self, tasks: Vec<Arc<dyn AnalysisTask>>) -> SyncReport {
        let runs: Vec<BoxFuture<'static, TaskReport>> = tasks
            .into_iter()
            .map(|task| {
                Box::pin(async move {
                    let outcome = task.execute().await;
                    TaskReport {
                        task_id: task.info().task_id,
                        col_name: task.info().col_name.clone(),
                        outcome,
                    }
                }) as BoxFuture<'static, TaskReport>
            })
            .collect();
        let reports = stream::iter(runs)
            .buffer_unordered(self.parallelism)
            .collect::<Vec<_>>()
            .await;
        SyncReport { tasks: reports }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{FailingCollector, NoOpCollector, StatsCollector};
    use crate::info::AnalysisInfoBuilder;
    use crate::planner::{DefaultTaskFactory, TaskFactory, TaskMap};
    use statkeeper_core::TableName;

    fn tasks(collector: Arc<dyn StatsCollector>) -> Vec<Arc<dyn AnalysisTask>> {
        let job = AnalysisInfoBuilder::new(TableName::internal("sales", "orders").unwrap())
            .column("a", ["p1"])
            .column("b", ["p1"])
            .build()
            .unwrap();
        let mut map = TaskMap::new();
        DefaultTaskFactory::new(collector)
            .create_task_for_each_column(&job, &mut map, true)
            .unwrap();
        map.into_values().collect()
    }

    #[tokio::test]
    async fn all_tasks_finish() {
        let report = InlineExecutor::new(4)
            .sync_execute(tasks(Arc::new(NoOpCollector)))
            .await;
        assert_eq!(report.tasks.len(), 2);
        assert!(report.is_success());
        assert!(report.failure_message().is_none());
    }

    #[tokio::test]
    async fn failures_are_reported_per_column() {
        let report = InlineExecutor::default()
            .sync_execute(tasks(Arc::new(FailingCollector::new("boom"))))
            .await;
        assert!(!report.is_success());
        assert_eq!(report.failed_columns(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(
            report.failure_message().as_deref(),
            Some("failed to analyze following columns: [a,b]")
        );
    }
}
