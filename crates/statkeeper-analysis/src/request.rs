//! Structured analyze requests.
//!
//! The SQL layer parses `ANALYZE TABLE ... WITH (...)` into an
//! [`AnalyzeRequest`]; the auto-analyze loop builds them directly.

use std::collections::{BTreeMap, BTreeSet};

use statkeeper_core::TableName;

use crate::error::{Error, Result};
use crate::info::{AnalysisInfo, AnalysisMethod, JobType};

/// Property key: run inline and return when done.
pub const PROPERTY_SYNC: &str = "sync";
/// Property key: re-submit every N seconds.
pub const PROPERTY_PERIOD_SECONDS: &str = "period.seconds";
/// Property key: sample this percentage of rows.
pub const PROPERTY_SAMPLE_PERCENT: &str = "sample.percent";
/// Property key: only analyze partitions changed since the last analysis.
pub const PROPERTY_INCREMENTAL: &str = "incremental";

/// Options of an analyze request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalyzeProperties {
    /// Run inline.
    pub sync: bool,
    /// Re-submission period.
    pub period_secs: Option<u64>,
    /// Sample size; `None` scans everything.
    pub sample_percent: Option<u8>,
    /// Restrict to changed partitions.
    pub incremental: bool,
}

impl AnalyzeProperties {
    /// Parses statement properties.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DataDefinition`] for unknown keys, malformed values,
    /// or `sync` combined with a period.
    pub fn from_map(properties: &BTreeMap<String, String>) -> Result<Self> {
        let mut parsed = Self::default();
        for (key, value) in properties {
            match key.as_str() {
                PROPERTY_SYNC => parsed.sync = parse_bool(key, value)?,
                PROPERTY_INCREMENTAL => parsed.incremental = parse_bool(key, value)?,
                PROPERTY_PERIOD_SECONDS => {
                    let secs = value.parse::<u64>().ok().filter(|s| *s > 0).ok_or_else(|| {
                        Error::data_definition(format!(
                            "{key} must be a positive integer, got '{value}'"
                        ))
                    })?;
                    parsed.period_secs = Some(secs);
                }
                PROPERTY_SAMPLE_PERCENT => {
                    let percent = value
                        .parse::<u8>()
                        .ok()
                        .filter(|p| (1..=100).contains(p))
                        .ok_or_else(|| {
                            Error::data_definition(format!(
                                "{key} must be an integer within 1..=100, got '{value}'"
                            ))
                        })?;
                    parsed.sample_percent = Some(percent);
                }
                _ => {
                    return Err(Error::data_definition(format!(
                        "unknown analyze property '{key}'"
                    )));
                }
            }
        }
        parsed.validate()?;
        Ok(parsed)
    }

    /// Checks property combinations.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DataDefinition`] when `sync` is combined with a period.
    pub fn validate(&self) -> Result<()> {
        if self.sync && self.period_secs.is_some() {
            return Err(Error::data_definition(format!(
                "{PROPERTY_SYNC} cannot be combined with {PROPERTY_PERIOD_SECONDS}"
            )));
        }
        Ok(())
    }

    /// Scan method implied by the properties.
    #[must_use]
    pub const fn method(&self) -> AnalysisMethod {
        if self.sample_percent.is_some() {
            AnalysisMethod::Sample
        } else {
            AnalysisMethod::Full
        }
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(Error::data_definition(format!(
            "{key} must be 'true' or 'false', got '{value}'"
        ))),
    }
}

/// A request to analyze one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzeRequest {
    /// Target table.
    pub table: TableName,
    /// Columns to analyze; `None` for every column.
    pub columns: Option<Vec<String>>,
    /// Partitions to analyze; `None` for every partition.
    pub partitions: Option<BTreeSet<String>>,
    /// Statement options.
    pub properties: AnalyzeProperties,
    /// Issuer.
    pub job_type: JobType,
}

impl AnalyzeRequest {
    /// A manual request over every column and partition.
    #[must_use]
    pub fn new(table: TableName) -> Self {
        Self {
            table,
            columns: None,
            partitions: None,
            properties: AnalyzeProperties::default(),
            job_type: JobType::Manual,
        }
    }

    /// Restricts the request to the given columns.
    #[must_use]
    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Restricts the request to the given partitions.
    #[must_use]
    pub fn with_partitions<I, S>(mut self, partitions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.partitions = Some(partitions.into_iter().map(Into::into).collect());
        self
    }

    /// Replaces the properties.
    #[must_use]
    pub fn with_properties(mut self, properties: AnalyzeProperties) -> Self {
        self.properties = properties;
        self
    }

    /// Runs the request inline.
    #[must_use]
    pub fn sync(mut self) -> Self {
        self.properties.sync = true;
        self
    }

    /// Makes the request periodic.
    #[must_use]
    pub fn every(mut self, period_secs: u64) -> Self {
        self.properties.period_secs = Some(period_secs);
        self
    }

    /// Marks the request as issued by the auto-analyze loop.
    #[must_use]
    pub fn system(mut self) -> Self {
        self.job_type = JobType::System;
        self
    }

    /// Rebuilds a one-shot request from a periodic job, for re-submission.
    #[must_use]
    pub fn instance_of(job: &AnalysisInfo) -> Self {
        Self {
            table: job.table.clone(),
            columns: Some(job.analyzed_columns().into_iter().collect()),
            partitions: job.partitions.clone(),
            properties: AnalyzeProperties {
                sync: false,
                period_secs: None,
                sample_percent: job.sample_percent,
                incremental: job.incremental,
            },
            job_type: job.job_type,
        }
    }
}
