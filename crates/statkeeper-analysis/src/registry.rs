//! In-memory job and task maps, and the primitives that mutate them.
//!
//! The live manager and the replay engine share these primitives; neither
//! path reaches collaborators from here. Callers hold the registry behind a
//! single mutex so that every read-modify-write of a job and its tasks is
//! atomic.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use statkeeper_core::{JobId, TaskId};

use crate::aggregate::{Aggregation, SideEffects, TaskCounts, fold_job_state};
use crate::config::FailurePolicy;
use crate::info::{AnalysisInfo, ColumnPartitions};
use crate::state::AnalysisState;
use crate::status::TaskStatusWrapper;
use crate::task::AnalysisTask;

/// A task record and, on the leader, the executable task behind it.
#[derive(Debug)]
pub(crate) struct TrackedTask {
    pub(crate) info: AnalysisInfo,
    pub(crate) handle: Option<Arc<dyn AnalysisTask>>,
}

/// Result of applying a status event or a cancellation.
#[derive(Debug)]
pub(crate) struct StatusApplied {
    /// Job record after the update.
    pub(crate) job: AnalysisInfo,
    /// Whether the reporting task's state changed.
    pub(crate) task_changed: bool,
    /// Job-level fold result.
    pub(crate) aggregation: Aggregation,
    /// Job narrowed to the columns whose tasks finished; set on completion.
    pub(crate) refresh_scope: Option<AnalysisInfo>,
    /// Running siblings to cancel.
    pub(crate) to_cancel: Vec<Arc<dyn AnalysisTask>>,
}

/// Outcome of [`JobRegistry::apply_status`].
#[derive(Debug)]
pub(crate) enum StatusOutcome {
    Applied(StatusApplied),
    Ignored(&'static str),
}

/// The manager's maps.
#[derive(Debug)]
pub(crate) struct JobRegistry {
    /// Manual jobs, in flight and recent history.
    analysis_jobs: BTreeMap<JobId, AnalysisInfo>,
    /// System jobs in flight.
    system_jobs: HashMap<JobId, AnalysisInfo>,
    /// Tracked tasks of in-flight jobs.
    job_tasks: HashMap<JobId, BTreeMap<TaskId, TrackedTask>>,
    /// Completed system jobs, oldest first.
    auto_jobs: VecDeque<AnalysisInfo>,
    auto_job_limit: usize,
    job_history_limit: usize,
}

impl JobRegistry {
    pub(crate) fn new(auto_job_limit: usize, job_history_limit: usize) -> Self {
        Self {
            analysis_jobs: BTreeMap::new(),
            system_jobs: HashMap::new(),
            job_tasks: HashMap::new(),
            auto_jobs: VecDeque::new(),
            auto_job_limit: auto_job_limit.max(1),
            job_history_limit: job_history_limit.max(1),
        }
    }

    /// Inserts or advances a job record. Returns false if the record was
    /// older than what is already known.
    pub(crate) fn upsert_job(&mut self, info: AnalysisInfo) -> bool {
        if info.is_system() {
            if self.in_auto_history(info.job_id) {
                return false;
            }
            if info.state.is_terminal() {
                self.complete_system_job(info);
                return true;
            }
            if !merge_record(&mut self.system_jobs, info.clone()) {
                return false;
            }
            self.job_tasks.entry(info.job_id).or_default();
            return true;
        }

        let job_id = info.job_id;
        let terminal = info.state.is_terminal();
        let periodic = info.is_period();
        if !merge_record(&mut self.analysis_jobs, info) {
            return false;
        }
        if terminal {
            self.job_tasks.remove(&job_id);
            self.evict_job_history();
        } else if !periodic {
            self.job_tasks.entry(job_id).or_default();
        }
        true
    }

    /// Tracks a task of an in-flight job. Returns false if the job is unknown
    /// or terminal, or the record is older than the tracked one.
    pub(crate) fn insert_task(
        &mut self,
        info: AnalysisInfo,
        handle: Option<Arc<dyn AnalysisTask>>,
    ) -> bool {
        let Some(task_id) = info.task_id else {
            return false;
        };
        let job_live = self
            .job(info.job_id)
            .is_some_and(|job| !job.state.is_terminal() && !self.in_auto_history(job.job_id));
        if !job_live {
            return false;
        }
        let Some(tasks) = self.job_tasks.get_mut(&info.job_id) else {
            return false;
        };
        match tasks.get_mut(&task_id) {
            Some(tracked) => {
                if info.state.rank() < tracked.info.state.rank() {
                    return false;
                }
                tracked.info = info;
                if handle.is_some() {
                    tracked.handle = handle;
                }
            }
            None => {
                tasks.insert(task_id, TrackedTask { info, handle });
            }
        }
        true
    }

    /// Applies one task status event and re-folds the job.
    pub(crate) fn apply_status(
        &mut self,
        event: &TaskStatusWrapper,
        policy: FailurePolicy,
    ) -> StatusOutcome {
        let is_system = self.system_jobs.contains_key(&event.job_id);
        let job = if is_system {
            self.system_jobs.get_mut(&event.job_id)
        } else {
            self.analysis_jobs.get_mut(&event.job_id)
        };
        let Some(job) = job else {
            return StatusOutcome::Ignored("unknown job");
        };
        if job.state.is_terminal() {
            return StatusOutcome::Ignored("job already completed");
        }
        let Some(tasks) = self.job_tasks.get_mut(&event.job_id) else {
            return StatusOutcome::Ignored("job has no tracked tasks");
        };
        let Some(task) = tasks.get_mut(&event.task_id) else {
            return StatusOutcome::Ignored("unknown task");
        };
        if !task.info.state.can_transition_to(event.state) {
            return StatusOutcome::Ignored("stale task state");
        }

        let task_changed = task.info.state != event.state;
        task.info.state = event.state;
        task.info.message.clone_from(&event.message);
        task.info.updated_at = event.time;
        if event.state == AnalysisState::Running {
            task.info.last_exec_time = Some(event.time);
        }

        let aggregation = fold_job_state(job.state, tasks.values().map(|t| t.info.state));
        if aggregation.changed {
            job.state = aggregation.state;
            job.updated_at = event.time;
            match aggregation.state {
                AnalysisState::Running => job.last_exec_time = Some(event.time),
                AnalysisState::Failed => {
                    job.message = format!("task {} failed: {}", event.task_id, event.message);
                }
                AnalysisState::Pending | AnalysisState::Finished => {}
            }
        }
        let job = job.clone();

        if !aggregation.effects.notify_complete {
            return StatusOutcome::Applied(StatusApplied {
                job,
                task_changed,
                aggregation,
                refresh_scope: None,
                to_cancel: Vec::new(),
            });
        }

        let tasks = self.job_tasks.remove(&event.job_id).unwrap_or_default();
        let refresh_scope = finished_scope(&job, &tasks);
        let to_cancel = if job.state == AnalysisState::Failed && policy == FailurePolicy::CancelSiblings
        {
            unfinished_handles(tasks)
        } else {
            Vec::new()
        };
        self.retire(&job);
        StatusOutcome::Applied(StatusApplied {
            job,
            task_changed,
            aggregation,
            refresh_scope,
            to_cancel,
        })
    }

    /// Fails an in-flight job and hands back its unfinished tasks.
    ///
    /// Returns `None` if the job is unknown or already terminal.
    pub(crate) fn terminate_job(
        &mut self,
        job_id: JobId,
        message: &str,
        now: DateTime<Utc>,
    ) -> Option<StatusApplied> {
        let job = match self.system_jobs.get_mut(&job_id) {
            Some(job) => job,
            None => self.analysis_jobs.get_mut(&job_id)?,
        };
        if job.state.is_terminal() {
            return None;
        }
        job.state = AnalysisState::Failed;
        job.message = message.to_string();
        job.updated_at = now;
        let job = job.clone();

        let mut tasks = self.job_tasks.remove(&job_id).unwrap_or_default();
        for tracked in tasks.values_mut() {
            if !tracked.info.state.is_terminal() {
                tracked.info.state = AnalysisState::Failed;
                tracked.info.message = message.to_string();
                tracked.info.updated_at = now;
            }
        }
        let refresh_scope = finished_scope(&job, &tasks);
        let to_cancel = tasks.into_values().filter_map(|t| t.handle).collect();
        self.retire(&job);
        Some(StatusApplied {
            job,
            task_changed: false,
            aggregation: Aggregation {
                state: AnalysisState::Failed,
                changed: true,
                effects: SideEffects {
                    persist: true,
                    notify_complete: true,
                },
            },
            refresh_scope,
            to_cancel,
        })
    }

    /// Moves a completed system job into the bounded history.
    pub(crate) fn complete_system_job(&mut self, info: AnalysisInfo) {
        self.system_jobs.remove(&info.job_id);
        self.job_tasks.remove(&info.job_id);
        if self.in_auto_history(info.job_id) {
            return;
        }
        self.auto_jobs.push_back(info);
        while self.auto_jobs.len() > self.auto_job_limit {
            self.auto_jobs.pop_front();
        }
    }

    /// Records the start of a periodic job's latest run.
    pub(crate) fn touch_period_job(&mut self, job_id: JobId, now: DateTime<Utc>) -> Option<AnalysisInfo> {
        let job = self.analysis_jobs.get_mut(&job_id)?;
        job.last_exec_time = Some(now);
        job.updated_at = now;
        Some(job.clone())
    }

    /// Drops all state, returning the executable tasks still tracked.
    pub(crate) fn clear(&mut self) -> Vec<Arc<dyn AnalysisTask>> {
        let handles = self
            .job_tasks
            .drain()
            .flat_map(|(_, tasks)| tasks.into_values())
            .filter_map(|t| t.handle)
            .collect();
        self.analysis_jobs.clear();
        self.system_jobs.clear();
        self.auto_jobs.clear();
        handles
    }

    /// Looks a job up in every map, history included.
    pub(crate) fn job(&self, job_id: JobId) -> Option<&AnalysisInfo> {
        self.system_jobs
            .get(&job_id)
            .or_else(|| self.analysis_jobs.get(&job_id))
            .or_else(|| self.auto_jobs.iter().rev().find(|j| j.job_id == job_id))
    }

    /// Task records of an in-flight job.
    pub(crate) fn task_infos(&self, job_id: JobId) -> Vec<AnalysisInfo> {
        self.job_tasks
            .get(&job_id)
            .map(|tasks| tasks.values().map(|t| t.info.clone()).collect())
            .unwrap_or_default()
    }

    /// Progress of an in-flight job.
    pub(crate) fn task_counts(&self, job_id: JobId) -> Option<TaskCounts> {
        self.job_tasks
            .get(&job_id)
            .map(|tasks| TaskCounts::from_states(tasks.values().map(|t| t.info.state)))
    }

    /// Returns true while the job has tracked tasks.
    pub(crate) fn is_in_flight(&self, job_id: JobId) -> bool {
        self.job_tasks.contains_key(&job_id)
    }

    /// Number of jobs with tracked tasks.
    pub(crate) fn inflight_job_count(&self) -> usize {
        self.job_tasks.len()
    }

    pub(crate) fn analysis_jobs(&self) -> impl Iterator<Item = &AnalysisInfo> {
        self.analysis_jobs.values()
    }

    pub(crate) fn system_jobs(&self) -> impl Iterator<Item = &AnalysisInfo> {
        self.system_jobs.values()
    }

    pub(crate) fn auto_jobs(&self) -> impl Iterator<Item = &AnalysisInfo> {
        self.auto_jobs.iter()
    }

    fn in_auto_history(&self, job_id: JobId) -> bool {
        self.auto_jobs.iter().any(|j| j.job_id == job_id)
    }

    fn retire(&mut self, job: &AnalysisInfo) {
        if job.is_system() {
            self.complete_system_job(job.clone());
        } else {
            self.evict_job_history();
        }
    }

    fn evict_job_history(&mut self) {
        let excess = self
            .analysis_jobs
            .len()
            .saturating_sub(self.job_history_limit);
        if excess == 0 {
            return;
        }
        let victims: Vec<JobId> = self
            .analysis_jobs
            .iter()
            .filter(|(_, job)| job.state.is_terminal())
            .map(|(job_id, _)| *job_id)
            .take(excess)
            .collect();
        for job_id in victims {
            self.analysis_jobs.remove(&job_id);
        }
    }
}

/// Replaces `info`'s entry unless the known record has a higher-ranked state.
fn merge_record<M>(map: &mut M, info: AnalysisInfo) -> bool
where
    M: RecordMap,
{
    if let Some(existing) = map.get_record(info.job_id) {
        if existing.state.rank() > info.state.rank() {
            return false;
        }
    }
    map.put_record(info);
    true
}

trait RecordMap {
    fn get_record(&self, job_id: JobId) -> Option<&AnalysisInfo>;
    fn put_record(&mut self, info: AnalysisInfo);
}

impl RecordMap for BTreeMap<JobId, AnalysisInfo> {
    fn get_record(&self, job_id: JobId) -> Option<&AnalysisInfo> {
        self.get(&job_id)
    }

    fn put_record(&mut self, info: AnalysisInfo) {
        self.insert(info.job_id, info);
    }
}

impl RecordMap for HashMap<JobId, AnalysisInfo> {
    fn get_record(&self, job_id: JobId) -> Option<&AnalysisInfo> {
        self.get(&job_id)
    }

    fn put_record(&mut self, info: AnalysisInfo) {
        self.insert(info.job_id, info);
    }
}

fn finished_scope(job: &AnalysisInfo, tasks: &BTreeMap<TaskId, TrackedTask>) -> Option<AnalysisInfo> {
    let mut col_to_partitions = ColumnPartitions::new();
    let mut any_finished = false;
    for tracked in tasks.values() {
        if tracked.info.state != AnalysisState::Finished {
            continue;
        }
        any_finished = true;
        for (column, partitions) in &tracked.info.col_to_partitions {
            col_to_partitions
                .entry(column.clone())
                .or_default()
                .extend(partitions.iter().cloned());
        }
    }
    if !any_finished {
        return None;
    }
    let mut scope = job.clone();
    scope.col_name = Some(AnalysisInfo::column_list(col_to_partitions.keys()));
    scope.col_to_partitions = col_to_partitions;
    Some(scope)
}

fn unfinished_handles(tasks: BTreeMap<TaskId, TrackedTask>) -> Vec<Arc<dyn AnalysisTask>> {
    tasks
        .into_values()
        .filter(|t| !t.info.state.is_terminal())
        .filter_map(|t| t.handle)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::info::{AnalysisInfoBuilder, JobType};
    use statkeeper_core::TableName;
    use std::collections::BTreeSet;

    fn job(job_type: JobType) -> AnalysisInfo {
        AnalysisInfoBuilder::new(TableName::internal("sales", "orders").unwrap())
            .column("a", ["p1"])
            .column("b", ["p1"])
            .job_type(job_type)
            .build()
            .unwrap()
    }

    fn task_of(job: &AnalysisInfo, column: &str) -> AnalysisInfo {
        job.task_info(
            TaskId::generate(),
            Some(column),
            BTreeSet::from(["p1".to_string()]),
        )
    }

    fn event(task: &AnalysisInfo, state: AnalysisState) -> TaskStatusWrapper {
        TaskStatusWrapper::for_task(task, state, "", Utc::now()).unwrap()
    }

    fn registry_with(job: &AnalysisInfo) -> (JobRegistry, AnalysisInfo, AnalysisInfo) {
        let mut registry = JobRegistry::new(10, 10);
        let t1 = task_of(job, "a");
        let t2 = task_of(job, "b");
        assert!(registry.upsert_job(job.clone()));
        assert!(registry.insert_task(t1.clone(), None));
        assert!(registry.insert_task(t2.clone(), None));
        (registry, t1, t2)
    }

    fn applied(outcome: StatusOutcome) -> StatusApplied {
        match outcome {
            StatusOutcome::Applied(applied) => applied,
            StatusOutcome::Ignored(reason) => panic!("event ignored: {reason}"),
        }
    }

    #[test]
    fn unknown_job_is_ignored() {
        let mut registry = JobRegistry::new(10, 10);
        let stray = task_of(&job(JobType::Manual), "a");
        let outcome = registry.apply_status(&event(&stray, AnalysisState::Running), FailurePolicy::Continue);
        assert!(matches!(outcome, StatusOutcome::Ignored("unknown job")));
    }

    #[test]
    fn manual_job_completes_and_keeps_history() {
        let job = job(JobType::Manual);
        let (mut registry, t1, t2) = registry_with(&job);
        let policy = FailurePolicy::Continue;

        registry.apply_status(&event(&t1, AnalysisState::Finished), policy);
        let last = applied(registry.apply_status(&event(&t2, AnalysisState::Finished), policy));
        assert!(last.aggregation.effects.notify_complete);
        assert_eq!(last.job.state, AnalysisState::Finished);
        assert_eq!(last.refresh_scope.unwrap().col_to_partitions.len(), 2);
        assert!(!registry.is_in_flight(job.job_id));
        assert_eq!(registry.job(job.job_id).unwrap().state, AnalysisState::Finished);
    }

    #[test]
    fn system_job_moves_to_history_once() {
        let job = job(JobType::System);
        let (mut registry, t1, t2) = registry_with(&job);
        let policy = FailurePolicy::Continue;

        registry.apply_status(&event(&t1, AnalysisState::Finished), policy);
        registry.apply_status(&event(&t2, AnalysisState::Finished), policy);
        let repeat = registry.apply_status(&event(&t2, AnalysisState::Finished), policy);
        assert!(matches!(repeat, StatusOutcome::Ignored(_)));
        assert_eq!(registry.system_jobs().count(), 0);
        assert_eq!(registry.auto_jobs().count(), 1);

        // A late replay of the creation record does not resurrect the job.
        assert!(!registry.upsert_job(job.clone()));
        assert_eq!(registry.system_jobs().count(), 0);
    }

    #[test]
    fn failed_task_scopes_refresh_to_finished_columns() {
        let job = job(JobType::Manual);
        let (mut registry, t1, t2) = registry_with(&job);
        registry.apply_status(&event(&t1, AnalysisState::Finished), FailurePolicy::Continue);
        let failed = applied(registry.apply_status(&event(&t2, AnalysisState::Failed), FailurePolicy::Continue));
        assert_eq!(failed.job.state, AnalysisState::Failed);
        let scope = failed.refresh_scope.unwrap();
        assert_eq!(scope.col_to_partitions.keys().collect::<Vec<_>>(), vec!["a"]);
    }

    #[test]
    fn stale_task_state_is_ignored() {
        let job = job(JobType::Manual);
        let (mut registry, t1, _) = registry_with(&job);
        registry.apply_status(&event(&t1, AnalysisState::Running), FailurePolicy::Continue);
        let outcome = registry.apply_status(&event(&t1, AnalysisState::Pending), FailurePolicy::Continue);
        assert!(matches!(outcome, StatusOutcome::Ignored("stale task state")));
    }

    #[test]
    fn older_job_record_does_not_regress() {
        let job = job(JobType::Manual);
        let mut registry = JobRegistry::new(10, 10);
        let mut finished = job.clone();
        finished.state = AnalysisState::Finished;
        assert!(registry.upsert_job(finished));
        assert!(!registry.upsert_job(job.clone()));
        assert_eq!(registry.job(job.job_id).unwrap().state, AnalysisState::Finished);
        assert!(!registry.insert_task(task_of(&job, "a"), None));
    }

    #[test]
    fn terminate_fails_job_and_unfinished_tasks() {
        let job = job(JobType::Manual);
        let (mut registry, t1, _) = registry_with(&job);
        registry.apply_status(&event(&t1, AnalysisState::Finished), FailurePolicy::Continue);
        let applied = registry
            .terminate_job(job.job_id, "cancelled by user", Utc::now())
            .unwrap();
        assert_eq!(applied.job.state, AnalysisState::Failed);
        assert_eq!(applied.job.message, "cancelled by user");
        assert!(registry.terminate_job(job.job_id, "again", Utc::now()).is_none());
    }

    #[test]
    fn histories_are_bounded() {
        let mut registry = JobRegistry::new(2, 2);
        for _ in 0..3 {
            let mut system = job(JobType::System);
            system.state = AnalysisState::Finished;
            registry.complete_system_job(system);

            let mut manual = job(JobType::Manual);
            manual.state = AnalysisState::Finished;
            registry.upsert_job(manual);
        }
        assert_eq!(registry.auto_jobs().count(), 2);
        assert_eq!(registry.analysis_jobs().count(), 2);
    }
}
