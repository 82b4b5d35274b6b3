//! Catalog collaborators: table metadata and statistics-backend availability.
//!
//! The scheduler only reads from the catalog. [`InMemoryTableCatalog`] is a
//! thread-safe reference implementation used by tests and embedded setups.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use statkeeper_core::TableName;

use crate::error::{Result, poison_err};
use crate::info::TableKind;
use crate::meta::TableStatsMeta;
use crate::staleness::{StalenessPolicy, TableSnapshot};

/// One partition of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionMeta {
    /// Partition name.
    pub name: String,
    /// Data version, bumped on every load into the partition.
    pub version: u64,
    /// Rows in the partition.
    pub row_count: u64,
}

/// Metadata of one table as the scheduler sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMeta {
    /// Qualified name.
    pub name: TableName,
    /// Internal or external.
    pub kind: TableKind,
    /// Base schema column names, in schema order.
    pub columns: Vec<String>,
    /// Partitions by name; empty for unpartitioned tables.
    pub partitions: BTreeMap<String, PartitionMeta>,
    /// Cached live row count.
    pub row_count: u64,
}

impl TableMeta {
    /// Creates an unpartitioned, empty table.
    #[must_use]
    pub fn new<I, S>(name: TableName, kind: TableKind, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name,
            kind,
            columns: columns.into_iter().map(Into::into).collect(),
            partitions: BTreeMap::new(),
            row_count: 0,
        }
    }

    /// Adds or replaces a partition.
    #[must_use]
    pub fn with_partition(mut self, name: impl Into<String>, version: u64, row_count: u64) -> Self {
        let name = name.into();
        self.partitions.insert(
            name.clone(),
            PartitionMeta {
                name,
                version,
                row_count,
            },
        );
        self
    }

    /// Sets the live row count.
    #[must_use]
    pub fn with_row_count(mut self, row_count: u64) -> Self {
        self.row_count = row_count;
        self
    }

    /// Returns true if the base schema has `column`.
    #[must_use]
    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    /// Names of the units a column task scans.
    ///
    /// Unpartitioned tables are scanned as a single unit named after the table.
    #[must_use]
    pub fn partition_names(&self) -> BTreeSet<String> {
        if self.partitions.is_empty() {
            BTreeSet::from([self.name.table().to_string()])
        } else {
            self.partitions.keys().cloned().collect()
        }
    }

    /// Cached row count and schema, enough to judge staleness.
    #[must_use]
    pub fn snapshot(&self) -> TableSnapshot {
        TableSnapshot {
            row_count: self.row_count,
            columns: self.columns.iter().cloned().collect(),
        }
    }

    /// Returns true when the table's statistics should be recomputed.
    ///
    /// See [`StalenessPolicy::need_reanalyze`].
    #[must_use]
    pub fn need_reanalyze_table(
        &self,
        stats: Option<&TableStatsMeta>,
        policy: &StalenessPolicy,
    ) -> bool {
        policy.need_reanalyze(&self.snapshot(), stats)
    }
}

/// Read access to table metadata.
pub trait TableCatalog: Send + Sync {
    /// Looks up a table.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be read.
    fn table(&self, name: &TableName) -> Result<Option<TableMeta>>;

    /// Lists every table the auto-analyze loop should consider.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be read.
    fn list_tables(&self) -> Result<Vec<TableName>>;
}

/// In-memory table catalog.
#[derive(Debug, Default)]
pub struct InMemoryTableCatalog {
    tables: RwLock<BTreeMap<TableName, TableMeta>>,
}

impl InMemoryTableCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a table.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn upsert_table(&self, table: TableMeta) -> Result<()> {
        let mut tables = self.tables.write().map_err(poison_err)?;
        tables.insert(table.name.clone(), table);
        Ok(())
    }

    /// Removes a table; returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn drop_table(&self, name: &TableName) -> Result<bool> {
        let mut tables = self.tables.write().map_err(poison_err)?;
        Ok(tables.remove(name).is_some())
    }

    /// Sets a table's live row count. Unknown tables are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn set_row_count(&self, name: &TableName, row_count: u64) -> Result<()> {
        let mut tables = self.tables.write().map_err(poison_err)?;
        if let Some(table) = tables.get_mut(name) {
            table.row_count = row_count;
        }
        Ok(())
    }

    /// Records a load into a partition: bumps its version and row count.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn load_partition(&self, name: &TableName, partition: &str, rows: u64) -> Result<()> {
        let mut tables = self.tables.write().map_err(poison_err)?;
        if let Some(table) = tables.get_mut(name) {
            let entry = table
                .partitions
                .entry(partition.to_string())
                .or_insert_with(|| PartitionMeta {
                    name: partition.to_string(),
                    version: 0,
                    row_count: 0,
                });
            entry.version += 1;
            entry.row_count += rows;
            table.row_count += rows;
        }
        Ok(())
    }
}

impl TableCatalog for InMemoryTableCatalog {
    fn table(&self, name: &TableName) -> Result<Option<TableMeta>> {
        let tables = self.tables.read().map_err(poison_err)?;
        Ok(tables.get(name).cloned())
    }

    fn list_tables(&self) -> Result<Vec<TableName>> {
        let tables = self.tables.read().map_err(poison_err)?;
        Ok(tables.keys().cloned().collect())
    }
}

/// Reports whether the statistics storage can accept results.
pub trait StatsBackend: Send + Sync {
    /// Returns true when the statistics tables are available.
    fn stats_tbl_available(&self) -> bool;
}

/// A [`StatsBackend`] driven by an explicit switch.
#[derive(Debug)]
pub struct StaticStatsBackend {
    available: AtomicBool,
}

impl StaticStatsBackend {
    /// Creates a backend with the given availability.
    #[must_use]
    pub const fn new(available: bool) -> Self {
        Self {
            available: AtomicBool::new(available),
        }
    }

    /// Flips availability.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }
}

impl Default for StaticStatsBackend {
    fn default() -> Self {
        Self::new(true)
    }
}

impl StatsBackend for StaticStatsBackend {
    fn stats_tbl_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}
