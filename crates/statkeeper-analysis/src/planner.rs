//! Turning requests into job records, and job records into tasks.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use statkeeper_core::TaskId;

use crate::catalog::{TableCatalog, TableMeta};
use crate::collector::StatsCollector;
use crate::error::{Error, Result};
use crate::info::{AnalysisInfo, AnalysisInfoBuilder, ColumnPartitions, JobType};
use crate::meta::{StatsMetaStore, TableStatsMeta};
use crate::request::AnalyzeRequest;
use crate::task::{AnalysisTask, ExternalAnalysisTask, OlapAnalysisTask};

/// Tasks of one job keyed by task ID.
pub type TaskMap = BTreeMap<TaskId, Arc<dyn AnalysisTask>>;

/// Builds a job record from a request.
pub trait JobPlanner: Send + Sync {
    /// Derives the job record, with `col_to_partitions` restricted to the
    /// columns and partitions that need analysis.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DataDefinition`] for unknown tables, columns or
    /// partitions and invalid properties.
    fn build_analysis_job_info(&self, request: &AnalyzeRequest) -> Result<AnalysisInfo>;
}

/// Populates the task map of a job.
pub trait TaskFactory: Send + Sync {
    /// Creates the tasks of a job on an external table.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DataDefinition`] if the job cannot be decomposed.
    fn create_task_for_external_table(
        &self,
        job: &AnalysisInfo,
        tasks: &mut TaskMap,
        is_sync: bool,
    ) -> Result<()>;

    /// Creates one task per column of a job on an internal table.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DataDefinition`] if the job cannot be decomposed.
    fn create_task_for_each_column(
        &self,
        job: &AnalysisInfo,
        tasks: &mut TaskMap,
        is_sync: bool,
    ) -> Result<()>;
}

/// Plans jobs against a [`TableCatalog`].
///
/// Incremental and system jobs skip partitions whose version is unchanged
/// since the last analysis, except for columns that were never analyzed.
pub struct CatalogJobPlanner {
    catalog: Arc<dyn TableCatalog>,
    store: Arc<dyn StatsMetaStore>,
}

impl CatalogJobPlanner {
    /// Creates a planner.
    #[must_use]
    pub fn new(catalog: Arc<dyn TableCatalog>, store: Arc<dyn StatsMetaStore>) -> Self {
        Self { catalog, store }
    }
}

impl JobPlanner for CatalogJobPlanner {
    #[tracing::instrument(skip(self, request), fields(table = %request.table))]
    fn build_analysis_job_info(&self, request: &AnalyzeRequest) -> Result<AnalysisInfo> {
        request.properties.validate()?;
        let table = self
            .catalog
            .table(&request.table)?
            .ok_or_else(|| Error::data_definition(format!("unknown table {}", request.table)))?;

        let columns = select_columns(&table, request.columns.as_deref())?;
        let partitions = select_partitions(&table, request.partitions.as_ref())?;

        let incremental = request.properties.incremental || request.job_type == JobType::System;
        let previous = if incremental {
            self.store.get(&request.table)?
        } else {
            None
        };

        let mut col_to_partitions = ColumnPartitions::new();
        for column in columns {
            let wanted: BTreeSet<String> = match &previous {
                Some(stats) if stats.columns.contains(&column) => partitions
                    .iter()
                    .filter(|p| partition_changed(&table, stats, p))
                    .cloned()
                    .collect(),
                _ => partitions.clone(),
            };
            if !wanted.is_empty() {
                col_to_partitions.insert(column, wanted);
            }
        }
        tracing::debug!(
            columns = col_to_partitions.len(),
            incremental,
            "planned analysis job"
        );

        let mut builder = AnalysisInfoBuilder::new(request.table.clone())
            .table_kind(table.kind)
            .col_name(AnalysisInfo::column_list(col_to_partitions.keys()))
            .col_to_partitions(col_to_partitions)
            .partitions(request.partitions.clone())
            .job_type(request.job_type)
            .incremental(request.properties.incremental)
            .sync(request.properties.sync);
        if let Some(period) = request.properties.period_secs {
            builder = builder.period_secs(period);
        }
        if let Some(percent) = request.properties.sample_percent {
            builder = builder.sample_percent(percent);
        }
        builder.build()
    }
}

fn select_columns(table: &TableMeta, requested: Option<&[String]>) -> Result<Vec<String>> {
    let Some(requested) = requested else {
        return Ok(table.columns.clone());
    };
    if requested.is_empty() {
        return Err(Error::data_definition("column list cannot be empty"));
    }
    let mut seen = BTreeSet::new();
    let mut columns = Vec::with_capacity(requested.len());
    for column in requested {
        if !table.has_column(column) {
            return Err(Error::data_definition(format!(
                "unknown column '{column}' in table {}",
                table.name
            )));
        }
        if seen.insert(column.as_str()) {
            columns.push(column.clone());
        }
    }
    Ok(columns)
}

fn select_partitions(
    table: &TableMeta,
    requested: Option<&BTreeSet<String>>,
) -> Result<BTreeSet<String>> {
    let available = table.partition_names();
    let Some(requested) = requested else {
        return Ok(available);
    };
    if table.partitions.is_empty() {
        return Err(Error::data_definition(format!(
            "table {} is not partitioned",
            table.name
        )));
    }
    if let Some(unknown) = requested.iter().find(|p| !available.contains(*p)) {
        return Err(Error::data_definition(format!(
            "unknown partition '{unknown}' in table {}",
            table.name
        )));
    }
    Ok(requested.clone())
}

fn partition_changed(table: &TableMeta, stats: &TableStatsMeta, partition: &str) -> bool {
    match table.partitions.get(partition) {
        Some(meta) => stats.partition_versions.get(partition) != Some(&meta.version),
        None => stats.row_count != table.row_count,
    }
}

/// Creates [`OlapAnalysisTask`]s and [`ExternalAnalysisTask`]s bound to one
/// collector.
pub struct DefaultTaskFactory {
    collector: Arc<dyn StatsCollector>,
}

impl DefaultTaskFactory {
    /// Creates a factory.
    #[must_use]
    pub fn new(collector: Arc<dyn StatsCollector>) -> Self {
        Self { collector }
    }

    fn task_info(job: &AnalysisInfo, column: Option<&str>, is_sync: bool) -> Result<AnalysisInfo> {
        if job.is_task() {
            return Err(Error::data_definition(format!(
                "cannot decompose task record {job}"
            )));
        }
        let partitions = column
            .and_then(|c| job.col_to_partitions.get(c))
            .cloned()
            .unwrap_or_default();
        let mut info = job.task_info(TaskId::generate(), column, partitions);
        info.sync = is_sync;
        Ok(info)
    }
}

impl TaskFactory for DefaultTaskFactory {
    fn create_task_for_external_table(
        &self,
        job: &AnalysisInfo,
        tasks: &mut TaskMap,
        is_sync: bool,
    ) -> Result<()> {
        let columns = job.col_to_partitions.keys().map(|c| Some(c.as_str()));
        for column in columns.chain(std::iter::once(None)) {
            let info = Self::task_info(job, column, is_sync)?;
            let task = ExternalAnalysisTask::new(info, Arc::clone(&self.collector))?;
            if let Some(task_id) = task.info().task_id {
                tasks.insert(task_id, Arc::new(task));
            }
        }
        Ok(())
    }

    fn create_task_for_each_column(
        &self,
        job: &AnalysisInfo,
        tasks: &mut TaskMap,
        is_sync: bool,
    ) -> Result<()> {
        for column in job.col_to_partitions.keys() {
            let info = Self::task_info(job, Some(column), is_sync)?;
            let task = OlapAnalysisTask::new(info, Arc::clone(&self.collector))?;
            if let Some(task_id) = task.info().task_id {
                tasks.insert(task_id, Arc::new(task));
            }
        }
        Ok(())
    }
}
