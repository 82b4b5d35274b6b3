//! Per-table statistics snapshots and their refresh after a job completes.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use statkeeper_core::TableName;

use crate::catalog::TableCatalog;
use crate::error::{Error, Result, poison_err};
use crate::info::{AnalysisInfo, JobType};

/// What the last analysis of a table recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableStatsMeta {
    /// Analyzed table.
    pub table: TableName,
    /// When the snapshot was written.
    pub updated_time: DateTime<Utc>,
    /// Live row count when the analysis completed.
    pub row_count: u64,
    /// Columns with statistics.
    pub columns: BTreeSet<String>,
    /// Type of the job that last refreshed the snapshot.
    pub job_type: JobType,
    /// Partition versions observed by the analysis.
    pub partition_versions: BTreeMap<String, u64>,
}

impl TableStatsMeta {
    /// Creates a snapshot covering the columns of `info`.
    #[must_use]
    pub fn new(updated_time: DateTime<Utc>, row_count: u64, info: &AnalysisInfo) -> Self {
        Self {
            table: info.table.clone(),
            updated_time,
            row_count,
            columns: info.analyzed_columns(),
            job_type: info.job_type,
            partition_versions: BTreeMap::new(),
        }
    }

    /// Returns true if every column in `columns` has statistics.
    #[must_use]
    pub fn covers<'a>(&self, columns: impl IntoIterator<Item = &'a String>) -> bool {
        columns.into_iter().all(|c| self.columns.contains(c))
    }

    /// Folds a newer snapshot into this one.
    ///
    /// Columns and partition versions accumulate; time, row count and job type
    /// come from the newer snapshot.
    pub fn merge(&mut self, newer: Self) {
        self.updated_time = newer.updated_time;
        self.row_count = newer.row_count;
        self.job_type = newer.job_type;
        self.columns.extend(newer.columns);
        self.partition_versions.extend(newer.partition_versions);
    }
}

/// Storage for [`TableStatsMeta`] snapshots.
pub trait StatsMetaStore: Send + Sync {
    /// Returns the snapshot of a table, if it was ever analyzed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn get(&self, table: &TableName) -> Result<Option<TableStatsMeta>>;

    /// Stores a snapshot, replacing the previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    fn put(&self, meta: TableStatsMeta) -> Result<()>;
}

/// In-memory snapshot store.
#[derive(Debug, Default)]
pub struct InMemoryStatsMetaStore {
    metas: RwLock<HashMap<TableName, TableStatsMeta>>,
}

impl InMemoryStatsMetaStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl StatsMetaStore for InMemoryStatsMetaStore {
    fn get(&self, table: &TableName) -> Result<Option<TableStatsMeta>> {
        let metas = self.metas.read().map_err(poison_err)?;
        Ok(metas.get(table).cloned())
    }

    fn put(&self, meta: TableStatsMeta) -> Result<()> {
        let mut metas = self.metas.write().map_err(poison_err)?;
        metas.insert(meta.table.clone(), meta);
        Ok(())
    }
}

/// Writes a fresh [`TableStatsMeta`] once a job's statistics are in place.
pub trait TableStatsUpdater: Send + Sync {
    /// Refreshes the snapshot of the job's table.
    ///
    /// # Errors
    ///
    /// Returns an error if the table is gone or the store write fails.
    fn update_table_stats(&self, job: &AnalysisInfo) -> Result<()>;
}

/// Refreshes snapshots from the catalog's live row count.
pub struct CatalogStatsUpdater {
    catalog: Arc<dyn TableCatalog>,
    store: Arc<dyn StatsMetaStore>,
}

impl CatalogStatsUpdater {
    /// Creates an updater.
    #[must_use]
    pub fn new(catalog: Arc<dyn TableCatalog>, store: Arc<dyn StatsMetaStore>) -> Self {
        Self { catalog, store }
    }
}

impl TableStatsUpdater for CatalogStatsUpdater {
    #[tracing::instrument(skip(self, job), fields(job_id = %job.job_id, table = %job.table))]
    fn update_table_stats(&self, job: &AnalysisInfo) -> Result<()> {
        let table = self.catalog.table(&job.table)?.ok_or_else(|| {
            Error::data_definition(format!("table {} no longer exists", job.table))
        })?;

        let mut fresh = TableStatsMeta::new(Utc::now(), table.row_count, job);
        let scanned: BTreeSet<&String> = job.col_to_partitions.values().flatten().collect();
        fresh.partition_versions = table
            .partitions
            .values()
            .filter(|p| scanned.contains(&p.name))
            .map(|p| (p.name.clone(), p.version))
            .collect();

        let meta = match self.store.get(&job.table)? {
            Some(mut previous) => {
                previous.merge(fresh);
                previous
            }
            None => fresh,
        };
        tracing::debug!(
            row_count = meta.row_count,
            columns = meta.columns.len(),
            "refreshed table stats"
        );
        self.store.put(meta)
    }
}
