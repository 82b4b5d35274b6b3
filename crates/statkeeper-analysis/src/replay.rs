//! Rebuilding the manager's maps from edit log records.
//!
//! Replay runs on replicas and on a leader starting up. It only mutates the
//! in-memory maps: no task executes, nothing is written back to the edit
//! log, no table stats are refreshed.
//!
//! Applying a record is idempotent, and records older than the known state
//! of a job never regress it, so a log may be re-applied from any earlier
//! checkpoint.

use std::sync::Mutex;

use crate::error::{Error, Result, poison_err};
use crate::info::AnalysisInfo;
use crate::journal::JournalRecord;
use crate::metrics::AnalysisMetrics;
use crate::registry::JobRegistry;

/// Applies edit log records to a manager's maps.
///
/// Obtained from [`AnalysisManager::replay`](crate::manager::AnalysisManager::replay).
#[derive(Debug)]
pub struct ReplayEngine<'a> {
    registry: &'a Mutex<JobRegistry>,
    metrics: AnalysisMetrics,
}

impl<'a> ReplayEngine<'a> {
    pub(crate) const fn new(registry: &'a Mutex<JobRegistry>, metrics: AnalysisMetrics) -> Self {
        Self { registry, metrics }
    }

    /// Applies a job creation or state change.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Replay`] if `info` is a task record.
    pub fn replay_create_analysis_job(&self, info: AnalysisInfo) -> Result<()> {
        if info.is_task() {
            return Err(Error::replay(format!(
                "job record for {} carries a task ID",
                info.job_id
            )));
        }
        let job_id = info.job_id;
        let applied = self.lock()?.upsert_job(info);
        tracing::trace!(%job_id, applied, "replayed job record");
        Ok(())
    }

    /// Applies a task creation. Tasks of unknown or completed jobs are
    /// skipped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Replay`] if `info` is a job record.
    pub fn replay_create_analysis_task(&self, info: AnalysisInfo) -> Result<()> {
        if !info.is_task() {
            return Err(Error::replay(format!(
                "task record for {} has no task ID",
                info.job_id
            )));
        }
        let job_id = info.job_id;
        let applied = self.lock()?.insert_task(info, None);
        tracing::trace!(%job_id, applied, "replayed task record");
        Ok(())
    }

    /// Applies the completion of a system job.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Replay`] for manual jobs, task records and records
    /// that are not terminal.
    pub fn replay_auto_job(&self, info: AnalysisInfo) -> Result<()> {
        if !info.is_system() || info.is_task() || !info.state.is_terminal() {
            return Err(Error::replay(format!(
                "auto job record for {} must be a completed system job, got {} {:?} job",
                info.job_id, info.state, info.job_type
            )));
        }
        self.lock()?.complete_system_job(info);
        Ok(())
    }

    /// Applies one decoded record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Replay`] if the record is inconsistent.
    pub fn apply(&self, record: JournalRecord) -> Result<()> {
        let op = record.op();
        match record {
            JournalRecord::CreateAnalysisJob(info) => self.replay_create_analysis_job(info)?,
            JournalRecord::CreateAnalysisTask(info) => self.replay_create_analysis_task(info)?,
            JournalRecord::AutoJob(info) => self.replay_auto_job(info)?,
        }
        self.metrics.record_replayed(op);
        Ok(())
    }

    /// Decodes and applies one encoded record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Replay`] if the record is corrupt or inconsistent.
    pub fn apply_encoded(&self, bytes: &[u8]) -> Result<()> {
        self.apply(JournalRecord::decode(bytes)?)
    }

    /// Applies encoded records in log order, stopping at the first error.
    /// Returns the number applied.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Replay`] naming the offset of the first bad record.
    pub fn replay_all<I, B>(&self, entries: I) -> Result<usize>
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        let mut applied = 0;
        for (offset, bytes) in entries.into_iter().enumerate() {
            self.apply_encoded(bytes.as_ref()).map_err(|e| match e {
                Error::Replay { message } => {
                    Error::replay(format!("edit log entry {offset}: {message}"))
                }
                other => other,
            })?;
            applied += 1;
        }
        tracing::info!(records = applied, "edit log replayed");
        Ok(applied)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'a, JobRegistry>> {
        self.registry.lock().map_err(poison_err)
    }
}
