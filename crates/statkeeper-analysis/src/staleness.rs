//! Deciding whether a table's statistics are stale.
//!
//! A table needs re-analysis when it has never been analyzed, when its schema
//! gained columns the last analysis did not cover, or when its row count
//! drifted too far from the count recorded at the last analysis. Drift is
//! measured against the live row count:
//!
//! ```text
//! updated = |rows_at_last_analysis - live_rows|
//! stale   = updated >= live_rows || updated / live_rows > stale_row_ratio
//! ```
//!
//! The check reads only cached values and is O(columns).

use std::collections::BTreeSet;
use std::sync::Arc;

use statkeeper_core::TableName;

use crate::catalog::TableCatalog;
use crate::error::{Error, Result};
use crate::meta::{StatsMetaStore, TableStatsMeta};

/// Live row count and schema of a table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableSnapshot {
    /// Cached live row count.
    pub row_count: u64,
    /// Base schema column names.
    pub columns: BTreeSet<String>,
}

/// Drift tolerance for [`need_reanalyze`](StalenessPolicy::need_reanalyze).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StalenessPolicy {
    stale_row_ratio: f64,
}

impl StalenessPolicy {
    /// Default tolerated drift: 40% of the live row count, a table health of 60.
    pub const DEFAULT_STALE_ROW_RATIO: f64 = 0.4;

    /// Creates a policy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] unless `0 < stale_row_ratio <= 1`.
    pub fn new(stale_row_ratio: f64) -> Result<Self> {
        if !(stale_row_ratio > 0.0 && stale_row_ratio <= 1.0) {
            return Err(Error::configuration(format!(
                "stale row ratio must be within (0, 1], got {stale_row_ratio}"
            )));
        }
        Ok(Self { stale_row_ratio })
    }

    /// Fraction of the live row count that may change before the table is stale.
    #[must_use]
    pub const fn stale_row_ratio(&self) -> f64 {
        self.stale_row_ratio
    }

    /// Returns true when the table should be analyzed again.
    #[must_use]
    #[allow(clippy::cast_precision_loss)] // Row counts far beyond 2^52 are not a concern for a ratio.
    pub fn need_reanalyze(&self, snapshot: &TableSnapshot, stats: Option<&TableStatsMeta>) -> bool {
        let Some(stats) = stats else {
            return true;
        };
        if !stats.covers(&snapshot.columns) {
            return true;
        }

        let updated = stats.row_count.abs_diff(snapshot.row_count);
        if updated == 0 {
            return false;
        }
        if updated >= snapshot.row_count {
            return true;
        }
        updated as f64 / snapshot.row_count as f64 > self.stale_row_ratio
    }
}

impl Default for StalenessPolicy {
    fn default() -> Self {
        Self {
            stale_row_ratio: Self::DEFAULT_STALE_ROW_RATIO,
        }
    }
}

/// Health score in `0..=100`: the share of live rows unchanged since the last
/// analysis.
#[must_use]
pub fn table_health(total_rows: u64, updated_rows: u64) -> u8 {
    if updated_rows >= total_rows {
        return 0;
    }
    let healthy = u128::from(total_rows - updated_rows) * 100 / u128::from(total_rows);
    u8::try_from(healthy).unwrap_or(100)
}

/// Resolves live snapshots and stored statistics to judge staleness by name.
pub struct StalenessEvaluator {
    catalog: Arc<dyn TableCatalog>,
    store: Arc<dyn StatsMetaStore>,
    policy: StalenessPolicy,
}

impl StalenessEvaluator {
    /// Creates an evaluator.
    #[must_use]
    pub fn new(
        catalog: Arc<dyn TableCatalog>,
        store: Arc<dyn StatsMetaStore>,
        policy: StalenessPolicy,
    ) -> Self {
        Self {
            catalog,
            store,
            policy,
        }
    }

    /// Returns the policy in use.
    #[must_use]
    pub const fn policy(&self) -> &StalenessPolicy {
        &self.policy
    }

    /// Returns true when `table` needs re-analysis.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DataDefinition`] for an unknown table, or the
    /// collaborator's error if the catalog or store cannot be read.
    pub fn need_reanalyze_table(&self, table: &TableName) -> Result<bool> {
        let meta = self
            .catalog
            .table(table)?
            .ok_or_else(|| Error::data_definition(format!("unknown table {table}")))?;
        let stats = self.store.get(table)?;
        let stale = meta.need_reanalyze_table(stats.as_ref(), &self.policy);
        if let Some(stats) = &stats {
            tracing::debug!(
                %table,
                health = table_health(meta.row_count, stats.row_count.abs_diff(meta.row_count)),
                stale,
                "evaluated table staleness"
            );
        }
        Ok(stale)
    }
}
