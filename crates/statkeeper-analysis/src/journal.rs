//! Durable edit log records for analysis jobs.
//!
//! The leader appends a record before an asynchronous job starts, when its
//! state changes, and when it completes. Replicas feed the same records,
//! in log order, to the [`ReplayEngine`](crate::replay::ReplayEngine).
//!
//! Records are encoded as JSON objects tagged by operation:
//!
//! ```json
//! {"op":"create_analysis_job","info":{...}}
//! ```

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result, poison_err};
use crate::info::AnalysisInfo;

/// One edit log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "info", rename_all = "snake_case")]
pub enum JournalRecord {
    /// A job was created or its state changed.
    CreateAnalysisJob(AnalysisInfo),
    /// A task was created.
    CreateAnalysisTask(AnalysisInfo),
    /// A system job completed.
    AutoJob(AnalysisInfo),
}

impl JournalRecord {
    /// Name of the operation, for logs and metrics.
    #[must_use]
    pub const fn op(&self) -> &'static str {
        match self {
            Self::CreateAnalysisJob(_) => "create_analysis_job",
            Self::CreateAnalysisTask(_) => "create_analysis_task",
            Self::AutoJob(_) => "auto_job",
        }
    }

    /// The carried record.
    #[must_use]
    pub const fn info(&self) -> &AnalysisInfo {
        match self {
            Self::CreateAnalysisJob(info) | Self::CreateAnalysisTask(info) | Self::AutoJob(info) => {
                info
            }
        }
    }

    /// Encodes the record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] if encoding fails.
    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Serialization {
            message: format!("failed to encode {} record: {e}", self.op()),
        })
    }

    /// Decodes a record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Replay`]: an undecodable record means the log is corrupt.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| Error::replay(format!("malformed edit log record: {e}")))
    }
}

/// Append-only persistence of job and task records.
pub trait EditLog: Send + Sync {
    /// Persists a job record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] if the append fails.
    fn log_create_analysis_job(&self, info: &AnalysisInfo) -> Result<()>;

    /// Persists a task record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] if the append fails.
    fn log_create_analysis_task(&self, info: &AnalysisInfo) -> Result<()>;

    /// Persists a completed system job.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] if the append fails.
    fn log_auto_job(&self, info: &AnalysisInfo) -> Result<()>;
}

/// Edit log kept in memory as encoded records.
#[derive(Debug, Default)]
pub struct InMemoryEditLog {
    entries: Mutex<Vec<Vec<u8>>>,
}

impl InMemoryEditLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the encoded entries in append order.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn entries(&self) -> Result<Vec<Vec<u8>>> {
        Ok(self.entries.lock().map_err(poison_err)?.clone())
    }

    /// Decodes every entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned or an entry is corrupt.
    pub fn records(&self) -> Result<Vec<JournalRecord>> {
        self.entries()?
            .iter()
            .map(|bytes| JournalRecord::decode(bytes))
            .collect()
    }

    /// Number of entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn len(&self) -> Result<usize> {
        Ok(self.entries.lock().map_err(poison_err)?.len())
    }

    /// Returns true if nothing was appended.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn append(&self, record: &JournalRecord) -> Result<()> {
        let bytes = record.encode()?;
        self.entries
            .lock()
            .map_err(|_| Error::persistence("edit log lock poisoned"))?
            .push(bytes);
        tracing::trace!(op = record.op(), job_id = %record.info().job_id, "appended edit log record");
        Ok(())
    }
}

impl EditLog for InMemoryEditLog {
    fn log_create_analysis_job(&self, info: &AnalysisInfo) -> Result<()> {
        self.append(&JournalRecord::CreateAnalysisJob(info.clone()))
    }

    fn log_create_analysis_task(&self, info: &AnalysisInfo) -> Result<()> {
        self.append(&JournalRecord::CreateAnalysisTask(info.clone()))
    }

    fn log_auto_job(&self, info: &AnalysisInfo) -> Result<()> {
        self.append(&JournalRecord::AutoJob(info.clone()))
    }
}
