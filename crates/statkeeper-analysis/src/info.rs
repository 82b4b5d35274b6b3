//! The `AnalysisInfo` record describing an analyze job or one of its tasks.
//!
//! A job record carries only a [`JobId`]; a task record additionally carries
//! a [`TaskId`] and is a narrowed copy of its parent job (one column and the
//! partitions to scan for it). The same type is persisted to the edit log
//! and rebuilt by replay.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use statkeeper_core::{JobId, TableName, TaskId};

use crate::error::{Error, Result};
use crate::state::AnalysisState;

/// Column name to the set of partition names to analyze for it.
pub type ColumnPartitions = BTreeMap<String, BTreeSet<String>>;

/// Who issued a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobType {
    /// Issued by a user statement.
    #[default]
    Manual,
    /// Issued by the auto-analyze loop.
    System,
}

impl JobType {
    /// Returns a lowercase label suitable for metrics.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::System => "system",
        }
    }
}

/// Whether a job runs once or recurs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduleType {
    /// Runs once.
    #[default]
    Once,
    /// Re-submitted every `period_secs`.
    Period,
}

/// Storage ownership of the analyzed table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TableKind {
    /// Natively managed (OLAP) table.
    #[default]
    Internal,
    /// Table in an external catalog (lake formats, federated sources).
    External,
}

/// How much data a task scans.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalysisMethod {
    /// Scan every row.
    #[default]
    Full,
    /// Scan a sample, see `sample_percent`.
    Sample,
}

/// Describes an analyze job, or one task of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisInfo {
    /// Job this record belongs to.
    pub job_id: JobId,
    /// Present only on task records.
    pub task_id: Option<TaskId>,
    /// Analyzed table.
    pub table: TableName,
    /// Internal or external table.
    pub table_kind: TableKind,
    /// Column of a task, or a `[c1,c2]` summary on job records.
    pub col_name: Option<String>,
    /// Columns and partitions that still need analysis. Empty means no work.
    pub col_to_partitions: ColumnPartitions,
    /// Explicit partition filter from the request, `None` for all partitions.
    pub partitions: Option<BTreeSet<String>>,
    /// Manual or system.
    pub job_type: JobType,
    /// Once or periodic.
    pub schedule_type: ScheduleType,
    /// Period of a periodic job.
    pub period_secs: Option<u64>,
    /// Full scan or sampling.
    pub analysis_method: AnalysisMethod,
    /// Sample size for [`AnalysisMethod::Sample`].
    pub sample_percent: Option<u8>,
    /// Only analyze partitions changed since the last analysis.
    pub incremental: bool,
    /// Executed inline by the requesting caller.
    pub sync: bool,
    /// Current state.
    pub state: AnalysisState,
    /// Last status message (failure reason on FAILED).
    pub message: String,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record last changed.
    pub updated_at: DateTime<Utc>,
    /// When execution last started.
    pub last_exec_time: Option<DateTime<Utc>>,
}

impl AnalysisInfo {
    /// Returns a builder for the given table.
    #[must_use]
    pub fn builder(table: TableName) -> AnalysisInfoBuilder {
        AnalysisInfoBuilder::new(table)
    }

    /// Returns true for task records.
    #[must_use]
    pub const fn is_task(&self) -> bool {
        self.task_id.is_some()
    }

    /// Returns true for jobs issued by the auto-analyze loop.
    #[must_use]
    pub fn is_system(&self) -> bool {
        self.job_type == JobType::System
    }

    /// Returns true for periodic jobs.
    #[must_use]
    pub fn is_period(&self) -> bool {
        self.schedule_type == ScheduleType::Period
    }

    /// Returns the re-submission interval of a periodic job.
    #[must_use]
    pub fn period(&self) -> Option<Duration> {
        self.period_secs
            .filter(|_| self.is_period())
            .map(Duration::from_secs)
    }

    /// Returns every column this record covers.
    ///
    /// Combines the keys of `col_to_partitions` with the names listed in
    /// `col_name`, which may be a single name or a `[c1,c2]` list.
    #[must_use]
    pub fn analyzed_columns(&self) -> BTreeSet<String> {
        let mut columns: BTreeSet<String> = self.col_to_partitions.keys().cloned().collect();
        if let Some(col_name) = &self.col_name {
            columns.extend(
                col_name
                    .trim_matches(|c| c == '[' || c == ']')
                    .split(',')
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(String::from),
            );
        }
        columns
    }

    /// Derives a PENDING task record from this job record.
    ///
    /// `column` of `None` denotes a table-level task (row count only).
    #[must_use]
    pub fn task_info(
        &self,
        task_id: TaskId,
        column: Option<&str>,
        partitions: BTreeSet<String>,
    ) -> Self {
        let now = Utc::now();
        let mut col_to_partitions = ColumnPartitions::new();
        if let Some(column) = column {
            col_to_partitions.insert(column.to_string(), partitions);
        }
        Self {
            task_id: Some(task_id),
            col_name: column.map(String::from),
            col_to_partitions,
            state: AnalysisState::Pending,
            message: String::new(),
            created_at: now,
            updated_at: now,
            last_exec_time: None,
            ..self.clone()
        }
    }

    /// Formats a column list the way job records store it in `col_name`.
    #[must_use]
    pub fn column_list<'a>(columns: impl IntoIterator<Item = &'a String>) -> String {
        let joined: Vec<&str> = columns.into_iter().map(String::as_str).collect();
        format!("[{}]", joined.join(","))
    }
}

impl fmt::Display for AnalysisInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.task_id {
            Some(task_id) => write!(
                f,
                "task {task_id} of job {} on {} ({})",
                self.job_id, self.table, self.state
            ),
            None => write!(f, "job {} on {} ({})", self.job_id, self.table, self.state),
        }
    }
}

/// Builder for [`AnalysisInfo`].
///
/// ```rust
/// use statkeeper_analysis::info::{AnalysisInfoBuilder, JobType};
/// use statkeeper_core::TableName;
///
/// let table = TableName::internal("sales", "orders").unwrap();
/// let job = AnalysisInfoBuilder::new(table)
///     .column("amount", ["p1", "p2"])
///     .job_type(JobType::System)
///     .build()
///     .unwrap();
/// assert!(job.is_system());
/// ```
#[derive(Debug, Clone)]
pub struct AnalysisInfoBuilder {
    job_id: Option<JobId>,
    task_id: Option<TaskId>,
    table: TableName,
    table_kind: TableKind,
    col_name: Option<String>,
    col_to_partitions: ColumnPartitions,
    partitions: Option<BTreeSet<String>>,
    job_type: JobType,
    schedule_type: Option<ScheduleType>,
    period_secs: Option<u64>,
    analysis_method: AnalysisMethod,
    sample_percent: Option<u8>,
    incremental: bool,
    sync: bool,
    state: AnalysisState,
    message: String,
    created_at: Option<DateTime<Utc>>,
}

impl AnalysisInfoBuilder {
    /// Starts a builder for the given table.
    #[must_use]
    pub fn new(table: TableName) -> Self {
        Self {
            job_id: None,
            task_id: None,
            table,
            table_kind: TableKind::default(),
            col_name: None,
            col_to_partitions: ColumnPartitions::new(),
            partitions: None,
            job_type: JobType::default(),
            schedule_type: None,
            period_secs: None,
            analysis_method: AnalysisMethod::default(),
            sample_percent: None,
            incremental: false,
            sync: false,
            state: AnalysisState::default(),
            message: String::new(),
            created_at: None,
        }
    }

    /// Sets the job ID; one is generated otherwise.
    #[must_use]
    pub fn job_id(mut self, job_id: JobId) -> Self {
        self.job_id = Some(job_id);
        self
    }

    /// Marks the record as a task.
    #[must_use]
    pub fn task_id(mut self, task_id: TaskId) -> Self {
        self.task_id = Some(task_id);
        self
    }

    /// Sets the table kind.
    #[must_use]
    pub fn table_kind(mut self, kind: TableKind) -> Self {
        self.table_kind = kind;
        self
    }

    /// Sets `col_name`.
    #[must_use]
    pub fn col_name(mut self, col_name: impl Into<String>) -> Self {
        self.col_name = Some(col_name.into());
        self
    }

    /// Adds a column with the partitions to analyze for it.
    #[must_use]
    pub fn column<I, S>(mut self, column: impl Into<String>, partitions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.col_to_partitions
            .entry(column.into())
            .or_default()
            .extend(partitions.into_iter().map(Into::into));
        self
    }

    /// Replaces the column to partition mapping.
    #[must_use]
    pub fn col_to_partitions(mut self, col_to_partitions: ColumnPartitions) -> Self {
        self.col_to_partitions = col_to_partitions;
        self
    }

    /// Sets the explicit partition filter.
    #[must_use]
    pub fn partitions(mut self, partitions: Option<BTreeSet<String>>) -> Self {
        self.partitions = partitions;
        self
    }

    /// Sets the job type.
    #[must_use]
    pub fn job_type(mut self, job_type: JobType) -> Self {
        self.job_type = job_type;
        self
    }

    /// Sets the schedule type explicitly.
    #[must_use]
    pub fn schedule_type(mut self, schedule_type: ScheduleType) -> Self {
        self.schedule_type = Some(schedule_type);
        self
    }

    /// Sets the period; implies [`ScheduleType::Period`] unless overridden.
    #[must_use]
    pub fn period_secs(mut self, period_secs: u64) -> Self {
        self.period_secs = Some(period_secs);
        self
    }

    /// Sets the scan method.
    #[must_use]
    pub fn analysis_method(mut self, method: AnalysisMethod) -> Self {
        self.analysis_method = method;
        self
    }

    /// Sets the sample size; implies [`AnalysisMethod::Sample`].
    #[must_use]
    pub fn sample_percent(mut self, percent: u8) -> Self {
        self.sample_percent = Some(percent);
        self.analysis_method = AnalysisMethod::Sample;
        self
    }

    /// Restricts analysis to changed partitions.
    #[must_use]
    pub fn incremental(mut self, incremental: bool) -> Self {
        self.incremental = incremental;
        self
    }

    /// Marks the job as executed inline.
    #[must_use]
    pub fn sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    /// Sets the initial state.
    #[must_use]
    pub fn state(mut self, state: AnalysisState) -> Self {
        self.state = state;
        self
    }

    /// Sets the status message.
    #[must_use]
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Sets the creation time; defaults to now.
    #[must_use]
    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// Builds the record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DataDefinition`] if a periodic schedule lacks a
    /// positive period, a once schedule carries one, or the sample size is
    /// outside `1..=100`.
    pub fn build(self) -> Result<AnalysisInfo> {
        let schedule_type = self.schedule_type.unwrap_or(if self.period_secs.is_some() {
            ScheduleType::Period
        } else {
            ScheduleType::Once
        });
        match (schedule_type, self.period_secs) {
            (ScheduleType::Period, None | Some(0)) => {
                return Err(Error::data_definition(
                    "periodic analysis requires a positive period",
                ));
            }
            (ScheduleType::Once, Some(_)) => {
                return Err(Error::data_definition(
                    "a one-shot analysis cannot carry a period",
                ));
            }
            _ => {}
        }
        if let Some(percent) = self.sample_percent {
            if !(1..=100).contains(&percent) {
                return Err(Error::data_definition(format!(
                    "sample percent must be within 1..=100, got {percent}"
                )));
            }
        }

        let created_at = self.created_at.unwrap_or_else(Utc::now);
        Ok(AnalysisInfo {
            job_id: self.job_id.unwrap_or_else(JobId::generate),
            task_id: self.task_id,
            table: self.table,
            table_kind: self.table_kind,
            col_name: self.col_name,
            col_to_partitions: self.col_to_partitions,
            partitions: self.partitions,
            job_type: self.job_type,
            schedule_type,
            period_secs: self.period_secs,
            analysis_method: self.analysis_method,
            sample_percent: self.sample_percent,
            incremental: self.incremental,
            sync: self.sync,
            state: self.state,
            message: self.message,
            created_at,
            updated_at: created_at,
            last_exec_time: None,
        })
    }
}
