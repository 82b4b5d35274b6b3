//! The auto-analyze loop.
//!
//! Periodically scans the catalog and submits a system job for every table
//! whose statistics are stale. Tables with a system job still in flight are
//! skipped.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::catalog::TableCatalog;
use crate::error::Result;
use crate::manager::{AnalysisManager, AssignOutcome};
use crate::meta::StatsMetaStore;
use crate::request::AnalyzeRequest;
use crate::staleness::StalenessEvaluator;

/// Submits system jobs for stale tables.
pub struct AutoAnalyzer {
    manager: AnalysisManager,
    catalog: Arc<dyn TableCatalog>,
    evaluator: StalenessEvaluator,
}

impl AutoAnalyzer {
    /// Creates an analyzer judging staleness with the manager's configured
    /// `stale_row_ratio`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the ratio is out of range.
    pub fn new(
        manager: AnalysisManager,
        catalog: Arc<dyn TableCatalog>,
        store: Arc<dyn StatsMetaStore>,
    ) -> Result<Self> {
        let policy = manager.config().staleness_policy()?;
        let evaluator = StalenessEvaluator::new(Arc::clone(&catalog), store, policy);
        Ok(Self {
            manager,
            catalog,
            evaluator,
        })
    }

    /// Runs one scan. Returns the number of system jobs scheduled.
    ///
    /// Failures on individual tables are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be listed.
    #[tracing::instrument(skip(self))]
    pub async fn run_once(&self) -> Result<usize> {
        let busy = self.manager.tables_under_system_analysis()?;
        let mut scheduled = 0;
        for table in self.catalog.list_tables()? {
            if busy.contains(&table) {
                tracing::debug!(%table, "system analysis already in flight");
                continue;
            }
            match self.evaluator.need_reanalyze_table(&table) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    tracing::warn!(%table, error = %e, "failed to evaluate staleness");
                    continue;
                }
            }
            match self
                .manager
                .build_and_assign_job(AnalyzeRequest::new(table.clone()).system())
                .await
            {
                Ok(AssignOutcome::Scheduled(handle)) => {
                    tracing::info!(%table, job_id = %handle.job_id, "scheduled system analysis");
                    scheduled += 1;
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(%table, error = %e, "failed to schedule system analysis"),
            }
        }
        Ok(scheduled)
    }

    /// Runs [`run_once`](Self::run_once) every `auto_analyze_interval`
    /// until the handle is aborted.
    pub fn spawn(self) -> JoinHandle<()> {
        let interval = self.manager.config().auto_analyze_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = self.run_once().await {
                    tracing::error!(error = %e, "auto analyze scan failed");
                }
            }
        })
    }
}

impl std::fmt::Debug for AutoAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoAnalyzer")
            .field("policy", self.evaluator.policy())
            .finish_non_exhaustive()
    }
}
