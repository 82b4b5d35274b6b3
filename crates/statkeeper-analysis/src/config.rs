//! Scheduler configuration.
//!
//! Every field has a default and can be overridden through a
//! `STATKEEPER_*` environment variable.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::staleness::StalenessPolicy;

const ENV_STALE_ROW_RATIO: &str = "STATKEEPER_STALE_ROW_RATIO";
const ENV_FAILURE_POLICY: &str = "STATKEEPER_FAILURE_POLICY";
const ENV_MAX_CONCURRENT_TASKS: &str = "STATKEEPER_MAX_CONCURRENT_TASKS";
const ENV_AUTO_JOB_HISTORY_LIMIT: &str = "STATKEEPER_AUTO_JOB_HISTORY_LIMIT";
const ENV_JOB_HISTORY_LIMIT: &str = "STATKEEPER_JOB_HISTORY_LIMIT";
const ENV_PERIOD_TICK_SECS: &str = "STATKEEPER_PERIOD_TICK_SECS";
const ENV_AUTO_ANALYZE_INTERVAL_SECS: &str = "STATKEEPER_AUTO_ANALYZE_INTERVAL_SECS";

const DEFAULT_MAX_CONCURRENT_TASKS: u64 = 4;
const DEFAULT_AUTO_JOB_HISTORY_LIMIT: u64 = 20_000;
const DEFAULT_JOB_HISTORY_LIMIT: u64 = 20_000;
const DEFAULT_PERIOD_TICK_SECS: u64 = 1;
const DEFAULT_AUTO_ANALYZE_INTERVAL_SECS: u64 = 600;

/// What happens to the other tasks of a job once one of them fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Siblings run to completion; the job is FAILED regardless.
    #[default]
    Continue,
    /// Siblings still in flight are cancelled.
    CancelSiblings,
}

impl FromStr for FailurePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "continue" => Ok(Self::Continue),
            "cancel_siblings" => Ok(Self::CancelSiblings),
            other => Err(Error::configuration(format!(
                "{ENV_FAILURE_POLICY} must be 'continue' or 'cancel_siblings', got '{other}'"
            ))),
        }
    }
}

/// Tunables of the analysis manager and its loops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Tolerated row drift before a table is stale, as a fraction of live rows.
    pub stale_row_ratio: f64,
    /// Sibling handling after a task failure.
    pub failure_policy: FailurePolicy,
    /// Upper bound on concurrently executing asynchronous tasks.
    pub max_concurrent_tasks: usize,
    /// Completed system jobs kept in history.
    pub auto_job_history_limit: usize,
    /// Terminal manual job records kept for show queries.
    pub job_history_limit: usize,
    /// How often the periodic scheduler checks for due jobs.
    pub period_tick: Duration,
    /// How often the auto-analyze loop scans the catalog.
    pub auto_analyze_interval: Duration,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            stale_row_ratio: StalenessPolicy::DEFAULT_STALE_ROW_RATIO,
            failure_policy: FailurePolicy::default(),
            max_concurrent_tasks: to_usize(DEFAULT_MAX_CONCURRENT_TASKS),
            auto_job_history_limit: to_usize(DEFAULT_AUTO_JOB_HISTORY_LIMIT),
            job_history_limit: to_usize(DEFAULT_JOB_HISTORY_LIMIT),
            period_tick: Duration::from_secs(DEFAULT_PERIOD_TICK_SECS),
            auto_analyze_interval: Duration::from_secs(DEFAULT_AUTO_ANALYZE_INTERVAL_SECS),
        }
    }
}

impl AnalysisConfig {
    /// Loads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when a variable is set to an invalid value.
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Loads the configuration with a custom environment source.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when a variable is set to an invalid value.
    pub fn from_env_with<F>(get_env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let stale_row_ratio = match get_env(ENV_STALE_ROW_RATIO) {
            Some(raw) => raw.trim().parse::<f64>().map_err(|_| {
                Error::configuration(format!("{ENV_STALE_ROW_RATIO} must be a number, got '{raw}'"))
            })?,
            None => StalenessPolicy::DEFAULT_STALE_ROW_RATIO,
        };
        let failure_policy = get_env(ENV_FAILURE_POLICY)
            .map(|raw| raw.trim().to_ascii_lowercase().parse())
            .transpose()?
            .unwrap_or_default();

        let config = Self {
            stale_row_ratio,
            failure_policy,
            max_concurrent_tasks: to_usize(parse_positive_u64_env(
                &get_env,
                ENV_MAX_CONCURRENT_TASKS,
                DEFAULT_MAX_CONCURRENT_TASKS,
            )?),
            auto_job_history_limit: to_usize(parse_positive_u64_env(
                &get_env,
                ENV_AUTO_JOB_HISTORY_LIMIT,
                DEFAULT_AUTO_JOB_HISTORY_LIMIT,
            )?),
            job_history_limit: to_usize(parse_positive_u64_env(
                &get_env,
                ENV_JOB_HISTORY_LIMIT,
                DEFAULT_JOB_HISTORY_LIMIT,
            )?),
            period_tick: Duration::from_secs(parse_positive_u64_env(
                &get_env,
                ENV_PERIOD_TICK_SECS,
                DEFAULT_PERIOD_TICK_SECS,
            )?),
            auto_analyze_interval: Duration::from_secs(parse_positive_u64_env(
                &get_env,
                ENV_AUTO_ANALYZE_INTERVAL_SECS,
                DEFAULT_AUTO_ANALYZE_INTERVAL_SECS,
            )?),
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for a zero limit, a zero duration or a
    /// stale row ratio outside `(0, 1]`.
    pub fn validate(&self) -> Result<()> {
        self.staleness_policy()?;
        if self.max_concurrent_tasks == 0
            || self.auto_job_history_limit == 0
            || self.job_history_limit == 0
        {
            return Err(Error::configuration("limits must be greater than zero"));
        }
        if self.period_tick.is_zero() || self.auto_analyze_interval.is_zero() {
            return Err(Error::configuration("intervals must be greater than zero"));
        }
        Ok(())
    }

    /// Staleness policy derived from `stale_row_ratio`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the ratio is out of range.
    pub fn staleness_policy(&self) -> Result<StalenessPolicy> {
        StalenessPolicy::new(self.stale_row_ratio)
    }
}

fn to_usize(value: u64) -> usize {
    usize::try_from(value).unwrap_or(usize::MAX)
}

fn parse_positive_u64_env<F>(get_env: &F, key: &str, default: u64) -> Result<u64>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = get_env(key) else {
        return Ok(default);
    };

    let parsed = raw.trim().parse::<u64>().map_err(|_| {
        Error::configuration(format!("{key} must be a positive integer, got '{raw}'"))
    })?;
    if parsed == 0 {
        return Err(Error::configuration(format!(
            "{key} must be greater than zero"
        )));
    }
    Ok(parsed)
}
