//! The statistics-collection collaborator.
//!
//! A collector scans data and writes statistics for one task's scope. How it
//! does so (SQL against the storage engine, a remote scan of a lake table)
//! is its own business; the scheduler only needs the outcome.

use std::collections::BTreeSet;

use async_trait::async_trait;

use statkeeper_core::{JobId, TableName, TaskId};

use crate::error::{Error, Result};
use crate::info::{AnalysisInfo, AnalysisMethod, TableKind};

/// What a task scans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanTarget {
    /// Column statistics over the listed partitions.
    Column {
        /// Column name.
        name: String,
        /// Partitions to scan.
        partitions: BTreeSet<String>,
    },
    /// Table-level row count only.
    RowCount,
}

/// Everything a collector needs to run one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionScope {
    /// Parent job.
    pub job_id: JobId,
    /// Task being executed.
    pub task_id: TaskId,
    /// Table to scan.
    pub table: TableName,
    /// Internal or external table.
    pub table_kind: TableKind,
    /// Column or row count.
    pub target: ScanTarget,
    /// Full scan or sample.
    pub method: AnalysisMethod,
    /// Sample size when sampling.
    pub sample_percent: Option<u8>,
}

impl CollectionScope {
    /// Derives the scope of a task record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DataDefinition`] if `info` is a job record.
    pub fn from_task(info: &AnalysisInfo) -> Result<Self> {
        let task_id = info.task_id.ok_or_else(|| {
            Error::data_definition(format!("job {} is not a task record", info.job_id))
        })?;
        let target = match &info.col_name {
            Some(name) => ScanTarget::Column {
                name: name.clone(),
                partitions: info.col_to_partitions.get(name).cloned().unwrap_or_default(),
            },
            None => ScanTarget::RowCount,
        };
        Ok(Self {
            job_id: info.job_id,
            task_id,
            table: info.table.clone(),
            table_kind: info.table_kind,
            target,
            method: info.analysis_method,
            sample_percent: info.sample_percent,
        })
    }
}

/// Result of collecting one scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectResult {
    /// Statistics were written.
    Collected {
        /// Rows read to produce them.
        rows_scanned: u64,
    },
    /// Collection failed.
    Failed(String),
    /// Collection was cancelled.
    Cancelled,
}

/// Executes statistics collection.
#[async_trait]
pub trait StatsCollector: Send + Sync {
    /// Collects statistics for one scope.
    async fn collect(&self, scope: &CollectionScope) -> CollectResult;

    /// Asks an in-progress collection to stop. Best effort.
    fn cancel(&self, _scope: &CollectionScope) {}
}

/// A collector for testing that immediately succeeds.
#[derive(Debug, Default)]
pub struct NoOpCollector;

#[async_trait]
impl StatsCollector for NoOpCollector {
    async fn collect(&self, _scope: &CollectionScope) -> CollectResult {
        CollectResult::Collected { rows_scanned: 0 }
    }
}

/// A collector that always fails with a configurable message.
#[derive(Debug)]
pub struct FailingCollector {
    message: String,
}

impl FailingCollector {
    /// Creates a failing collector.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl StatsCollector for FailingCollector {
    async fn collect(&self, _scope: &CollectionScope) -> CollectResult {
        CollectResult::Failed(self.message.clone())
    }
}
