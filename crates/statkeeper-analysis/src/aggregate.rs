//! Folding task states into a job state.
//!
//! The fold is a pure function of the job's current state and the states of
//! all its tasks:
//!
//! | task states                         | job state  |
//! |-------------------------------------|------------|
//! | any FAILED                          | FAILED     |
//! | all FINISHED (or no tasks)          | FINISHED   |
//! | any RUNNING or FINISHED             | RUNNING    |
//! | all PENDING                         | PENDING    |
//!
//! The result is merged with the current job state by rank, so a job never
//! regresses and a terminal job never changes.

use std::fmt;

use crate::state::AnalysisState;

/// Side effects the caller must trigger after applying an [`Aggregation`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SideEffects {
    /// The job record changed and should be written to the edit log.
    pub persist: bool,
    /// The job just became terminal: refresh table stats and run completion.
    pub notify_complete: bool,
}

/// Outcome of re-folding a job's task states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aggregation {
    /// State the job should now be in.
    pub state: AnalysisState,
    /// Whether `state` differs from the job's previous state.
    pub changed: bool,
    /// Triggers implied by the change.
    pub effects: SideEffects,
}

/// Derives a job state from its task states alone.
#[must_use]
pub fn derive_job_state<I>(task_states: I) -> AnalysisState
where
    I: IntoIterator<Item = AnalysisState>,
{
    let mut all_finished = true;
    let mut any_started = false;
    for state in task_states {
        match state {
            AnalysisState::Failed => return AnalysisState::Failed,
            AnalysisState::Finished => any_started = true,
            AnalysisState::Running => {
                any_started = true;
                all_finished = false;
            }
            AnalysisState::Pending => all_finished = false,
        }
    }
    if all_finished {
        AnalysisState::Finished
    } else if any_started {
        AnalysisState::Running
    } else {
        AnalysisState::Pending
    }
}

/// Re-folds a job whose task states may have changed.
#[must_use]
pub fn fold_job_state<I>(current: AnalysisState, task_states: I) -> Aggregation
where
    I: IntoIterator<Item = AnalysisState>,
{
    if current.is_terminal() {
        return Aggregation {
            state: current,
            changed: false,
            effects: SideEffects::default(),
        };
    }

    let state = current.max(derive_job_state(task_states));
    let changed = state != current;
    Aggregation {
        state,
        changed,
        effects: SideEffects {
            persist: changed,
            notify_complete: changed && state.is_terminal(),
        },
    }
}

/// Number of tasks per state, shown as job progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskCounts {
    /// Tasks not yet started.
    pub pending: usize,
    /// Tasks executing.
    pub running: usize,
    /// Tasks completed successfully.
    pub finished: usize,
    /// Failed or cancelled tasks.
    pub failed: usize,
}

impl TaskCounts {
    /// Counts the given states.
    #[must_use]
    pub fn from_states<I>(states: I) -> Self
    where
        I: IntoIterator<Item = AnalysisState>,
    {
        states.into_iter().fold(Self::default(), |mut counts, state| {
            match state {
                AnalysisState::Pending => counts.pending += 1,
                AnalysisState::Running => counts.running += 1,
                AnalysisState::Finished => counts.finished += 1,
                AnalysisState::Failed => counts.failed += 1,
            }
            counts
        })
    }

    /// Total number of tasks.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.pending + self.running + self.finished + self.failed
    }
}

impl fmt::Display for TaskCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} Finished/{} Failed/{} In Progress/{} Total",
            self.finished,
            self.failed,
            self.pending + self.running,
            self.total()
        )
    }
}
