//! The analysis manager.
//!
//! Accepts analyze requests, decomposes them into per-column tasks, tracks
//! each task's status and folds it into its job's state, persists job and
//! task records to the edit log, and keeps the bounded history of
//! completed system jobs.
//!
//! ## Concurrency
//!
//! All job and task maps live behind one mutex. Every status event performs
//! its read-modify-write of a job and its tasks under that lock, so two
//! terminal events for the same job cannot both observe the transition into
//! a terminal state. Edit log appends happen under the lock to keep the log
//! in state order; table-stats refreshes and task cancellation run after it
//! is released.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, Weak};

use chrono::{DateTime, Utc};
use tokio::sync::{Notify, Semaphore};
use tracing::Instrument;

use statkeeper_core::observability::task_span;
use statkeeper_core::{JobId, TableName, TaskId};

use crate::aggregate::TaskCounts;
use crate::catalog::{StaticStatsBackend, StatsBackend, TableCatalog};
use crate::collector::StatsCollector;
use crate::config::AnalysisConfig;
use crate::error::{Error, Result, poison_err};
use crate::executor::{InlineExecutor, SyncReport, TaskExecutor};
use crate::info::{AnalysisInfo, JobType, ScheduleType, TableKind};
use crate::journal::EditLog;
use crate::meta::{CatalogStatsUpdater, StatsMetaStore, TableStatsUpdater};
use crate::metrics::AnalysisMetrics;
use crate::periodic::PeriodicRegistry;
use crate::planner::{CatalogJobPlanner, DefaultTaskFactory, JobPlanner, TaskFactory, TaskMap};
use crate::registry::{JobRegistry, StatusApplied, StatusOutcome};
use crate::replay::ReplayEngine;
use crate::request::AnalyzeRequest;
use crate::state::AnalysisState;
use crate::status::TaskStatusWrapper;
use crate::task::AnalysisTask;

/// Message recorded on jobs cancelled through [`AnalysisManager::cancel_job`].
pub const USER_CANCELLED_MESSAGE: &str = "cancelled by user";

/// Message recorded on a periodic instance replaced by the next run.
pub const SUPERSEDED_MESSAGE: &str = "superseded by the next periodic run";

/// Message recorded on a job that decomposed into no tasks.
pub const NO_TASKS_MESSAGE: &str = "no tasks to run";

/// The manager's external dependencies.
#[derive(Clone)]
pub struct Collaborators {
    /// Whether statistics can be stored right now.
    pub backend: Arc<dyn StatsBackend>,
    /// Turns requests into job records.
    pub planner: Arc<dyn JobPlanner>,
    /// Decomposes jobs into tasks.
    pub task_factory: Arc<dyn TaskFactory>,
    /// Runs synchronous jobs inline.
    pub executor: Arc<dyn TaskExecutor>,
    /// Refreshes the table snapshot once a job completes.
    pub stats_updater: Arc<dyn TableStatsUpdater>,
    /// Durable record of jobs and tasks.
    pub edit_log: Arc<dyn EditLog>,
}

impl Collaborators {
    /// Wires the default collaborators around a catalog, a snapshot store,
    /// a collector and an edit log.
    #[must_use]
    pub fn new(
        catalog: Arc<dyn TableCatalog>,
        store: Arc<dyn StatsMetaStore>,
        collector: Arc<dyn StatsCollector>,
        edit_log: Arc<dyn EditLog>,
    ) -> Self {
        Self {
            backend: Arc::new(StaticStatsBackend::default()),
            planner: Arc::new(CatalogJobPlanner::new(
                Arc::clone(&catalog),
                Arc::clone(&store),
            )),
            task_factory: Arc::new(DefaultTaskFactory::new(collector)),
            executor: Arc::new(InlineExecutor::default()),
            stats_updater: Arc::new(CatalogStatsUpdater::new(catalog, store)),
            edit_log,
        }
    }

    /// Replaces the backend availability check.
    #[must_use]
    pub fn with_backend(mut self, backend: Arc<dyn StatsBackend>) -> Self {
        self.backend = backend;
        self
    }

    /// Replaces the inline executor.
    #[must_use]
    pub fn with_executor(mut self, executor: Arc<dyn TaskExecutor>) -> Self {
        self.executor = executor;
        self
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

/// Result of a synchronous job.
#[derive(Debug, Clone)]
pub struct SyncResult {
    /// Final job record. Never registered or persisted.
    pub job: AnalysisInfo,
    /// Per-task outcomes.
    pub report: SyncReport,
}

/// An asynchronous job accepted for execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    /// The registered job.
    pub job_id: JobId,
    /// Its tasks; empty for periodic templates.
    pub task_ids: Vec<TaskId>,
    /// Once or periodic.
    pub schedule_type: ScheduleType,
}

/// What [`AnalysisManager::build_and_assign_job`] did with a request.
#[derive(Debug, Clone)]
pub enum AssignOutcome {
    /// Nothing needed analysis; no job was created.
    NoWork,
    /// A synchronous job ran to completion, or the job had no tasks.
    Completed(SyncResult),
    /// An asynchronous job was registered.
    Scheduled(JobHandle),
}

impl AssignOutcome {
    /// The job's ID, if one was created.
    #[must_use]
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            Self::NoWork => None,
            Self::Completed(result) => Some(result.job.job_id),
            Self::Scheduled(handle) => Some(handle.job_id),
        }
    }

    /// Returns true if nothing needed analysis.
    #[must_use]
    pub const fn is_no_work(&self) -> bool {
        matches!(self, Self::NoWork)
    }
}

/// Filter for [`AnalysisManager::show_analysis_jobs`].
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    /// Only jobs on this table.
    pub table: Option<TableName>,
    /// Only jobs in this state.
    pub state: Option<AnalysisState>,
    /// Only jobs of this type.
    pub job_type: Option<JobType>,
    /// At most this many jobs, newest first.
    pub limit: Option<usize>,
}

impl JobFilter {
    fn matches(&self, job: &AnalysisInfo) -> bool {
        self.table.as_ref().is_none_or(|t| *t == job.table)
            && self.state.is_none_or(|s| s == job.state)
            && self.job_type.is_none_or(|t| t == job.job_type)
    }
}

struct Inner {
    config: AnalysisConfig,
    deps: Collaborators,
    registry: Mutex<JobRegistry>,
    periodic: Mutex<PeriodicRegistry>,
    permits: Arc<Semaphore>,
    completed: Notify,
    metrics: AnalysisMetrics,
}

/// Schedules, tracks and persists statistics-analysis jobs.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct AnalysisManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for AnalysisManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisManager")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl AnalysisManager {
    /// Creates a manager.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `config` is invalid.
    pub fn new(config: AnalysisConfig, deps: Collaborators) -> Result<Self> {
        config.validate()?;
        let registry = JobRegistry::new(config.auto_job_history_limit, config.job_history_limit);
        Ok(Self {
            inner: Arc::new(Inner {
                permits: Arc::new(Semaphore::new(config.max_concurrent_tasks)),
                config,
                deps,
                registry: Mutex::new(registry),
                periodic: Mutex::new(PeriodicRegistry::default()),
                completed: Notify::new(),
                metrics: AnalysisMetrics::new(),
            }),
        })
    }

    /// The configuration in use.
    #[must_use]
    pub fn config(&self) -> &AnalysisConfig {
        &self.inner.config
    }

    /// Plans, decomposes and runs or schedules an analyze request.
    ///
    /// Synchronous requests run inline and are never registered or
    /// persisted. Asynchronous requests are persisted, registered and
    /// dispatched. Periodic requests are persisted and registered as a
    /// template that the periodic scheduler re-submits.
    ///
    /// # Errors
    ///
    /// - [`Error::DataDefinition`] for malformed requests.
    /// - [`Error::BackendUnavailable`] for synchronous requests while the
    ///   statistics backend is down.
    /// - [`Error::Persistence`] if the job or its tasks cannot be persisted.
    #[tracing::instrument(
        skip(self, request),
        fields(table = %request.table, job_type = request.job_type.as_label(), sync = request.properties.sync)
    )]
    pub async fn build_and_assign_job(&self, request: AnalyzeRequest) -> Result<AssignOutcome> {
        let deps = &self.inner.deps;
        let mut job = deps.planner.build_analysis_job_info(&request)?;

        if !deps.backend.stats_tbl_available() {
            if job.sync {
                return Err(Error::BackendUnavailable);
            }
            tracing::warn!(job_id = %job.job_id, "statistics backend unavailable, skipping analysis");
            job.col_to_partitions.clear();
        }
        if job.col_to_partitions.is_empty() {
            tracing::info!(job_id = %job.job_id, "nothing needs analysis");
            return Ok(AssignOutcome::NoWork);
        }

        if job.is_period() {
            return self.schedule_period_job(job);
        }

        let mut tasks = TaskMap::new();
        match job.table_kind {
            TableKind::External => {
                deps.task_factory
                    .create_task_for_external_table(&job, &mut tasks, job.sync)?;
            }
            TableKind::Internal => {
                deps.task_factory
                    .create_task_for_each_column(&job, &mut tasks, job.sync)?;
            }
        }
        if job.sync {
            return self.execute_sync(job, tasks).await.map(AssignOutcome::Completed);
        }
        if tasks.is_empty() {
            job.state = AnalysisState::Finished;
            job.message = NO_TASKS_MESSAGE.to_string();
            return Ok(AssignOutcome::Completed(SyncResult {
                job,
                report: SyncReport::default(),
            }));
        }
        self.submit(job, tasks).map(AssignOutcome::Scheduled)
    }

    async fn execute_sync(&self, mut job: AnalysisInfo, tasks: TaskMap) -> Result<SyncResult> {
        let deps = &self.inner.deps;
        self.inner.metrics.record_job_submitted("sync", job.job_type);

        let started = Utc::now();
        job.state = AnalysisState::Running;
        job.last_exec_time = Some(started);

        let no_tasks = tasks.is_empty();
        let report = deps.executor.sync_execute(tasks.into_values().collect()).await;

        job.updated_at = Utc::now();
        if let Some(message) = report.failure_message() {
            tracing::warn!(job_id = %job.job_id, %message, "synchronous analysis failed");
            deps.stats_updater
                .update_table_stats(&analyzed_scope(&job, &report))?;
            job.state = AnalysisState::Failed;
            job.message = message;
        } else {
            deps.stats_updater.update_table_stats(&job)?;
            job.state = AnalysisState::Finished;
            if no_tasks {
                job.message = NO_TASKS_MESSAGE.to_string();
            }
        }
        self.inner.metrics.record_job_completed(job.job_type, job.state);
        Ok(SyncResult { job, report })
    }

    fn submit(&self, job: AnalysisInfo, tasks: TaskMap) -> Result<JobHandle> {
        self.record_analysis_job(&job)?;
        if let Err(e) = self.persist_analysis_tasks(&tasks) {
            tracing::error!(job_id = %job.job_id, error = %e, "failed to persist analysis tasks");
            if let Err(abort) = self.terminate_job(job.job_id, "failed to persist tasks") {
                tracing::error!(job_id = %job.job_id, error = %abort, "failed to abort job");
            }
            return Err(e);
        }

        let mode = if job.is_system() { "system" } else { "async" };
        self.inner.metrics.record_job_submitted(mode, job.job_type);
        tracing::info!(job_id = %job.job_id, tasks = tasks.len(), "analysis job scheduled");

        let task_ids = tasks.keys().copied().collect();
        for task in tasks.into_values() {
            let manager = self.clone();
            tokio::spawn(async move { manager.run_task(task).await });
        }
        Ok(JobHandle {
            job_id: job.job_id,
            task_ids,
            schedule_type: ScheduleType::Once,
        })
    }

    fn schedule_period_job(&self, job: AnalysisInfo) -> Result<AssignOutcome> {
        self.record_analysis_job(&job)?;
        self.inner
            .periodic
            .lock()
            .map_err(poison_err)?
            .register(job.clone());
        self.inner.metrics.record_job_submitted("period", job.job_type);
        tracing::info!(job_id = %job.job_id, period_secs = ?job.period_secs, "periodic analysis registered");
        Ok(AssignOutcome::Scheduled(JobHandle {
            job_id: job.job_id,
            task_ids: Vec::new(),
            schedule_type: ScheduleType::Period,
        }))
    }

    async fn run_task(&self, task: Arc<dyn AnalysisTask>) {
        let info = task.info();
        let span = task_span(
            "execute",
            &info.job_id.to_string(),
            &info.task_id.map(|id| id.to_string()).unwrap_or_default(),
        );
        let Ok(_permit) = Arc::clone(&self.inner.permits).acquire_owned().await else {
            return;
        };
        if task.is_cancelled() {
            self.report(info, AnalysisState::Failed, crate::task::CANCELLED_MESSAGE);
            return;
        }

        self.report(info, AnalysisState::Running, "");
        let timer = self.inner.metrics.start_task_timer();
        let outcome = task.execute().instrument(span).await;
        let (state, message) = outcome.to_status();
        timer.finish(state);
        self.report(info, state, &message);
    }

    fn report(&self, info: &AnalysisInfo, state: AnalysisState, message: &str) {
        if let Err(e) = self.update_task_status(info, state, message, Utc::now()) {
            tracing::error!(job_id = %info.job_id, error = %e, "failed to apply task status");
        }
    }

    /// Persists a job record and registers it.
    ///
    /// # Errors
    ///
    /// Returns the edit log's error; the job is then not registered.
    pub fn record_analysis_job(&self, job: &AnalysisInfo) -> Result<()> {
        self.inner.deps.edit_log.log_create_analysis_job(job)?;
        let mut registry = self.inner.registry.lock().map_err(poison_err)?;
        registry.upsert_job(job.clone());
        self.inner
            .metrics
            .set_inflight_jobs(registry.inflight_job_count());
        Ok(())
    }

    /// Persists every task record and registers the tasks under their job.
    ///
    /// # Errors
    ///
    /// Returns the first edit log error; no task is registered then.
    pub fn persist_analysis_tasks(&self, tasks: &TaskMap) -> Result<()> {
        for task in tasks.values() {
            self.inner.deps.edit_log.log_create_analysis_task(task.info())?;
        }
        let mut registry = self.inner.registry.lock().map_err(poison_err)?;
        for task in tasks.values() {
            registry.insert_task(task.info().clone(), Some(Arc::clone(task)));
        }
        Ok(())
    }

    /// Applies a status change reported for a task record.
    ///
    /// Events for unknown or already-terminal jobs are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidStateTransition`] if `task` is a job record,
    /// or an internal error if the state lock is poisoned.
    pub fn update_task_status(
        &self,
        task: &AnalysisInfo,
        state: AnalysisState,
        message: &str,
        time: DateTime<Utc>,
    ) -> Result<()> {
        let event = TaskStatusWrapper::for_task(task, state, message, time).ok_or_else(|| {
            Error::InvalidStateTransition {
                from: task.state.to_string(),
                to: state.to_string(),
                reason: format!("job {} is not a task record", task.job_id),
            }
        })?;
        self.apply_status(&event)
    }

    /// Applies a task status event.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the state lock is poisoned.
    pub fn apply_status(&self, event: &TaskStatusWrapper) -> Result<()> {
        let applied = {
            let mut registry = self.inner.registry.lock().map_err(poison_err)?;
            match registry.apply_status(event, self.inner.config.failure_policy) {
                StatusOutcome::Ignored(reason) => {
                    tracing::debug!(job_id = %event.job_id, task_id = %event.task_id, reason, "ignored task status");
                    self.inner.metrics.record_ignored_status_event();
                    return Ok(());
                }
                StatusOutcome::Applied(applied) => {
                    if applied.task_changed {
                        self.inner.metrics.record_task_transition(event.state);
                    }
                    if applied.aggregation.effects.persist {
                        self.log_job_change(&applied.job);
                    }
                    self.inner
                        .metrics
                        .set_inflight_jobs(registry.inflight_job_count());
                    applied
                }
            }
        };
        if applied.aggregation.effects.notify_complete {
            self.on_job_completed(&applied);
        }
        Ok(())
    }

    fn log_job_change(&self, job: &AnalysisInfo) {
        let log = &self.inner.deps.edit_log;
        let result = if job.is_system() && job.state.is_terminal() {
            log.log_auto_job(job)
        } else {
            log.log_create_analysis_job(job)
        };
        if let Err(e) = result {
            tracing::error!(job_id = %job.job_id, state = %job.state, error = %e, "failed to persist job state");
        }
    }

    fn on_job_completed(&self, applied: &StatusApplied) {
        let job = &applied.job;
        for task in &applied.to_cancel {
            task.cancel();
        }
        if let Some(scope) = &applied.refresh_scope {
            if let Err(e) = self.inner.deps.stats_updater.update_table_stats(scope) {
                tracing::error!(job_id = %job.job_id, error = %e, "failed to refresh table stats");
            }
        }
        self.inner.metrics.record_job_completed(job.job_type, job.state);
        tracing::info!(job_id = %job.job_id, state = %job.state, message = %job.message, "analysis job completed");
        self.inner.completed.notify_waiters();
    }

    /// Cancels an in-flight job. Periodic templates stop being re-submitted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::JobNotFound`] for unknown jobs and
    /// [`Error::InvalidStateTransition`] for jobs that already completed.
    pub fn cancel_job(&self, job_id: JobId) -> Result<AnalysisInfo> {
        let job = self.terminate_job(job_id, USER_CANCELLED_MESSAGE)?;
        if job.is_period() {
            self.inner
                .periodic
                .lock()
                .map_err(poison_err)?
                .unregister(job_id);
        }
        Ok(job)
    }

    fn terminate_job(&self, job_id: JobId, message: &str) -> Result<AnalysisInfo> {
        let applied = {
            let mut registry = self.inner.registry.lock().map_err(poison_err)?;
            let Some(applied) = registry.terminate_job(job_id, message, Utc::now()) else {
                return Err(match registry.job(job_id) {
                    Some(job) => Error::InvalidStateTransition {
                        from: job.state.to_string(),
                        to: AnalysisState::Failed.to_string(),
                        reason: "job already completed".to_string(),
                    },
                    None => Error::JobNotFound { job_id },
                });
            };
            self.log_job_change(&applied.job);
            self.inner
                .metrics
                .set_inflight_jobs(registry.inflight_job_count());
            applied
        };
        self.on_job_completed(&applied);
        Ok(applied.job)
    }

    /// Waits until a job reaches a terminal state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::JobNotFound`] if the job is unknown or was evicted.
    pub async fn wait_for_job(&self, job_id: JobId) -> Result<AnalysisInfo> {
        loop {
            let notified = self.inner.completed.notified();
            match self.job_info(job_id)? {
                None => return Err(Error::JobNotFound { job_id }),
                Some(job) if job.state.is_terminal() => return Ok(job),
                Some(_) => {}
            }
            notified.await;
        }
    }

    /// Returns a job record, looking through in-flight jobs and history.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the state lock is poisoned.
    pub fn job_info(&self, job_id: JobId) -> Result<Option<AnalysisInfo>> {
        Ok(self.registry()?.job(job_id).cloned())
    }

    /// Returns the task records of an in-flight job.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the state lock is poisoned.
    pub fn task_infos(&self, job_id: JobId) -> Result<Vec<AnalysisInfo>> {
        Ok(self.registry()?.task_infos(job_id))
    }

    /// Returns per-state task counts of an in-flight job.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the state lock is poisoned.
    pub fn job_progress(&self, job_id: JobId) -> Result<Option<TaskCounts>> {
        Ok(self.registry()?.task_counts(job_id))
    }

    /// Lists known jobs, newest first.
    ///
    /// Covers manual jobs, in-flight system jobs and the completed system
    /// job history.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the state lock is poisoned.
    pub fn show_analysis_jobs(&self, filter: &JobFilter) -> Result<Vec<AnalysisInfo>> {
        let registry = self.registry()?;
        let mut jobs: Vec<AnalysisInfo> = registry
            .analysis_jobs()
            .chain(registry.system_jobs())
            .chain(registry.auto_jobs())
            .filter(|job| filter.matches(job))
            .cloned()
            .collect();
        drop(registry);
        jobs.sort_by(|a, b| b.job_id.cmp(&a.job_id));
        if let Some(limit) = filter.limit {
            jobs.truncate(limit);
        }
        Ok(jobs)
    }

    /// Completed system jobs, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the state lock is poisoned.
    pub fn auto_jobs(&self) -> Result<VecDeque<AnalysisInfo>> {
        Ok(self.registry()?.auto_jobs().cloned().collect())
    }

    /// In-flight system jobs.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the state lock is poisoned.
    pub fn system_jobs(&self) -> Result<Vec<AnalysisInfo>> {
        Ok(self.registry()?.system_jobs().cloned().collect())
    }

    /// Tables with an in-flight system job.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the state lock is poisoned.
    pub fn tables_under_system_analysis(&self) -> Result<HashSet<TableName>> {
        Ok(self
            .registry()?
            .system_jobs()
            .map(|job| job.table.clone())
            .collect())
    }

    /// Returns true while the job has tracked tasks.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the state lock is poisoned.
    pub fn is_job_in_flight(&self, job_id: JobId) -> Result<bool> {
        Ok(self.registry()?.is_in_flight(job_id))
    }

    /// Number of jobs with tracked tasks.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the state lock is poisoned.
    pub fn in_flight_job_count(&self) -> Result<usize> {
        Ok(self.registry()?.inflight_job_count())
    }

    /// Applies edit log records to this manager's maps.
    ///
    /// Replay never executes tasks or writes to the edit log.
    #[must_use]
    pub fn replay(&self) -> ReplayEngine<'_> {
        ReplayEngine::new(&self.inner.registry, self.inner.metrics)
    }

    /// IDs of the registered periodic templates.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the lock is poisoned.
    pub fn period_job_ids(&self) -> Result<Vec<JobId>> {
        Ok(self.inner.periodic.lock().map_err(poison_err)?.job_ids())
    }

    /// Submits an instance of every periodic template due at `now`.
    ///
    /// An instance still running from the previous period is cancelled
    /// first. Returns the number of instances submitted.
    ///
    /// # Errors
    ///
    /// Returns an internal error if a lock is poisoned. Per-template
    /// submission failures are logged and skipped.
    pub async fn run_due_period_jobs(&self, now: DateTime<Utc>) -> Result<usize> {
        let due = self.inner.periodic.lock().map_err(poison_err)?.take_due(now);
        let mut submitted = 0;
        for run in due {
            let template_id = run.template.job_id;
            if let Some(previous) = run.previous_instance {
                if self.is_job_in_flight(previous)? {
                    tracing::warn!(job_id = %template_id, instance = %previous, "previous periodic run still in flight");
                    if let Err(e) = self.terminate_job(previous, SUPERSEDED_MESSAGE) {
                        tracing::warn!(instance = %previous, error = %e, "failed to cancel previous periodic run");
                    }
                }
            }

            match self
                .build_and_assign_job(AnalyzeRequest::instance_of(&run.template))
                .await
            {
                Ok(outcome) => {
                    if let Some(instance) = outcome.job_id() {
                        self.inner
                            .periodic
                            .lock()
                            .map_err(poison_err)?
                            .set_instance(template_id, instance);
                        submitted += 1;
                    }
                    let touched = self.registry()?.touch_period_job(template_id, now);
                    if let Some(template) = touched {
                        self.log_job_change(&template);
                    }
                }
                Err(e) => {
                    tracing::warn!(job_id = %template_id, error = %e, "failed to submit periodic run");
                }
            }
        }
        Ok(submitted)
    }

    /// Starts the loop that submits due periodic jobs every
    /// [`AnalysisConfig::period_tick`]. Does nothing if already running.
    ///
    /// The loop stops on [`reset`](Self::reset) or once every handle to the
    /// manager is dropped.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the lock is poisoned.
    pub fn start_period_scheduler(&self) -> Result<()> {
        let mut periodic = self.inner.periodic.lock().map_err(poison_err)?;
        if periodic.has_ticker() {
            return Ok(());
        }
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let tick = self.inner.config.period_tick;
        periodic.set_ticker(tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let manager = AnalysisManager { inner };
                if let Err(e) = manager.run_due_period_jobs(Utc::now()).await {
                    tracing::error!(error = %e, "periodic scheduler tick failed");
                }
            }
        }));
        Ok(())
    }

    /// Re-registers the periodic templates known to the maps, typically
    /// after replay on a newly elected leader. Returns how many were
    /// registered.
    ///
    /// # Errors
    ///
    /// Returns an internal error if a lock is poisoned.
    pub fn resume_period_jobs(&self) -> Result<usize> {
        let templates: Vec<AnalysisInfo> = self
            .registry()?
            .analysis_jobs()
            .filter(|job| job.is_period() && !job.state.is_terminal())
            .cloned()
            .collect();
        let mut periodic = self.inner.periodic.lock().map_err(poison_err)?;
        Ok(templates
            .into_iter()
            .filter(|template| periodic.register(template.clone()))
            .count())
    }

    /// Drops all in-memory state and cancels running tasks, for example on
    /// loss of leadership. The maps are rebuilt by replay.
    ///
    /// # Errors
    ///
    /// Returns an internal error if a lock is poisoned.
    pub fn reset(&self) -> Result<()> {
        self.inner.periodic.lock().map_err(poison_err)?.shutdown();
        let handles = self.registry()?.clear();
        for task in &handles {
            task.cancel();
        }
        self.inner.metrics.set_inflight_jobs(0);
        self.inner.completed.notify_waiters();
        tracing::info!(cancelled_tasks = handles.len(), "analysis manager reset");
        Ok(())
    }

    fn registry(&self) -> Result<std::sync::MutexGuard<'_, JobRegistry>> {
        self.inner.registry.lock().map_err(poison_err)
    }
}

/// The job narrowed to the columns whose inline task finished.
fn analyzed_scope(job: &AnalysisInfo, report: &SyncReport) -> AnalysisInfo {
    let finished: HashSet<&str> = report
        .tasks
        .iter()
        .filter(|t| t.outcome.is_success())
        .filter_map(|t| t.col_name.as_deref())
        .collect();
    let mut scope = job.clone();
    scope
        .col_to_partitions
        .retain(|column, _| finished.contains(column.as_str()));
    scope.col_name = Some(AnalysisInfo::column_list(scope.col_to_partitions.keys()));
    scope
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{InMemoryTableCatalog, TableMeta};
    use crate::collector::NoOpCollector;
    use crate::journal::InMemoryEditLog;
    use crate::meta::InMemoryStatsMetaStore;

    fn manager() -> (AnalysisManager, Arc<InMemoryEditLog>, TableName) {
        let table = TableName::internal("sales", "orders").unwrap();
        let catalog = Arc::new(InMemoryTableCatalog::new());
        catalog
            .upsert_table(
                TableMeta::new(table.clone(), TableKind::Internal, ["id", "amount"])
                    .with_partition("p1", 1, 100),
            )
            .unwrap();
        let log = Arc::new(InMemoryEditLog::new());
        let deps = Collaborators::new(
            catalog,
            Arc::new(InMemoryStatsMetaStore::new()),
            Arc::new(NoOpCollector),
            log.clone(),
        );
        let manager = AnalysisManager::new(AnalysisConfig::default(), deps).unwrap();
        (manager, log, table)
    }

    #[test]
    fn rejects_invalid_config() {
        let (manager, _, _) = manager();
        let config = AnalysisConfig {
            max_concurrent_tasks: 0,
            ..AnalysisConfig::default()
        };
        assert!(AnalysisManager::new(config, manager.inner.deps.clone()).is_err());
    }

    #[tokio::test]
    async fn async_job_runs_to_completion() {
        let (manager, log, table) = manager();
        let outcome = manager
            .build_and_assign_job(AnalyzeRequest::new(table))
            .await
            .unwrap();
        let AssignOutcome::Scheduled(handle) = outcome else {
            panic!("expected a scheduled job");
        };
        assert_eq!(handle.task_ids.len(), 2);

        let job = manager.wait_for_job(handle.job_id).await.unwrap();
        assert_eq!(job.state, AnalysisState::Finished);
        assert!(!manager.is_job_in_flight(handle.job_id).unwrap());
        // Job record, two task records, RUNNING and FINISHED job records.
        assert_eq!(log.len().unwrap(), 5);
    }

    #[tokio::test]
    async fn cancel_unknown_job_is_not_found() {
        let (manager, _, _) = manager();
        let err = manager.cancel_job(JobId::generate()).unwrap_err();
        assert!(matches!(err, Error::JobNotFound { .. }));
    }

    #[tokio::test]
    async fn show_filters_by_state() {
        let (manager, _, table) = manager();
        let outcome = manager
            .build_and_assign_job(AnalyzeRequest::new(table.clone()).every(3600))
            .await
            .unwrap();
        let job_id = outcome.job_id().unwrap();

        let pending = manager
            .show_analysis_jobs(&JobFilter {
                state: Some(AnalysisState::Pending),
                ..JobFilter::default()
            })
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].job_id, job_id);

        let finished = manager
            .show_analysis_jobs(&JobFilter {
                table: Some(table),
                state: Some(AnalysisState::Finished),
                ..JobFilter::default()
            })
            .unwrap();
        assert!(finished.is_empty());
    }
}
