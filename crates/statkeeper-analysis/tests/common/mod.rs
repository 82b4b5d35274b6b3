//! Shared fixtures for statkeeper-analysis integration tests.

#![allow(dead_code, clippy::unwrap_used)]

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use statkeeper_analysis::catalog::{InMemoryTableCatalog, StaticStatsBackend, TableMeta};
use statkeeper_analysis::collector::{CollectResult, CollectionScope, ScanTarget, StatsCollector};
use statkeeper_analysis::config::AnalysisConfig;
use statkeeper_analysis::error::{Error, Result};
use statkeeper_analysis::executor::{InlineExecutor, SyncReport, TaskExecutor};
use statkeeper_analysis::info::{AnalysisInfo, TableKind};
use statkeeper_analysis::journal::{EditLog, InMemoryEditLog};
use statkeeper_analysis::manager::{AnalysisManager, Collaborators};
use statkeeper_analysis::meta::{CatalogStatsUpdater, InMemoryStatsMetaStore, TableStatsUpdater};
use statkeeper_analysis::planner::{JobPlanner, TaskFactory, TaskMap};
use statkeeper_analysis::request::AnalyzeRequest;
use statkeeper_analysis::task::AnalysisTask;
use statkeeper_core::TableName;

/// `internal.sales.orders` with columns `id`, `amount` and partitions `p1`, `p2`.
pub fn orders() -> TableName {
    TableName::internal("sales", "orders").unwrap()
}

/// `hive.web.clicks`, an external table with columns `url`, `ts`.
pub fn clicks() -> TableName {
    TableName::new("hive", "web", "clicks").unwrap()
}

pub fn catalog() -> Arc<InMemoryTableCatalog> {
    let catalog = Arc::new(InMemoryTableCatalog::new());
    catalog
        .upsert_table(
            TableMeta::new(orders(), TableKind::Internal, ["id", "amount"])
                .with_partition("p1", 1, 100)
                .with_partition("p2", 1, 100)
                .with_row_count(200),
        )
        .unwrap();
    catalog
        .upsert_table(
            TableMeta::new(clicks(), TableKind::External, ["url", "ts"]).with_row_count(1_000),
        )
        .unwrap();
    catalog
}

/// Edit log that counts appends per operation and can be made to fail.
#[derive(Debug, Default)]
pub struct CountingEditLog {
    pub inner: InMemoryEditLog,
    jobs: AtomicUsize,
    tasks: AtomicUsize,
    autos: AtomicUsize,
    failing: AtomicBool,
}

impl CountingEditLog {
    pub fn job_records(&self) -> usize {
        self.jobs.load(Ordering::SeqCst)
    }

    pub fn task_records(&self) -> usize {
        self.tasks.load(Ordering::SeqCst)
    }

    pub fn auto_records(&self) -> usize {
        self.autos.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.job_records() + self.task_records() + self.auto_records()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::persistence("disk full"));
        }
        Ok(())
    }
}

impl EditLog for CountingEditLog {
    fn log_create_analysis_job(&self, info: &AnalysisInfo) -> Result<()> {
        self.check()?;
        self.jobs.fetch_add(1, Ordering::SeqCst);
        self.inner.log_create_analysis_job(info)
    }

    fn log_create_analysis_task(&self, info: &AnalysisInfo) -> Result<()> {
        self.check()?;
        self.tasks.fetch_add(1, Ordering::SeqCst);
        self.inner.log_create_analysis_task(info)
    }

    fn log_auto_job(&self, info: &AnalysisInfo) -> Result<()> {
        self.check()?;
        self.autos.fetch_add(1, Ordering::SeqCst);
        self.inner.log_auto_job(info)
    }
}

/// Inline executor that counts invocations.
#[derive(Debug, Default)]
pub struct CountingExecutor {
    inner: InlineExecutor,
    calls: AtomicUsize,
}

impl CountingExecutor {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskExecutor for CountingExecutor {
    async fn sync_execute(&self, tasks: Vec<Arc<dyn AnalysisTask>>) -> SyncReport {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.sync_execute(tasks).await
    }
}

/// Stats updater that counts invocations and remembers the last job.
pub struct CountingStatsUpdater {
    inner: CatalogStatsUpdater,
    calls: AtomicUsize,
    last: std::sync::Mutex<Option<AnalysisInfo>>,
}

impl CountingStatsUpdater {
    pub fn new(inner: CatalogStatsUpdater) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
            last: std::sync::Mutex::new(None),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last(&self) -> Option<AnalysisInfo> {
        self.last.lock().unwrap().clone()
    }
}

impl TableStatsUpdater for CountingStatsUpdater {
    fn update_table_stats(&self, job: &AnalysisInfo) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap() = Some(job.clone());
        self.inner.update_table_stats(job)
    }
}

/// Planner returning a fixed job record.
pub struct FixedPlanner(pub AnalysisInfo);

impl JobPlanner for FixedPlanner {
    fn build_analysis_job_info(&self, _request: &AnalyzeRequest) -> Result<AnalysisInfo> {
        Ok(self.0.clone())
    }
}

/// Task factory that decomposes every job into nothing.
pub struct EmptyTaskFactory;

impl TaskFactory for EmptyTaskFactory {
    fn create_task_for_external_table(
        &self,
        _job: &AnalysisInfo,
        _tasks: &mut TaskMap,
        _is_sync: bool,
    ) -> Result<()> {
        Ok(())
    }

    fn create_task_for_each_column(
        &self,
        _job: &AnalysisInfo,
        _tasks: &mut TaskMap,
        _is_sync: bool,
    ) -> Result<()> {
        Ok(())
    }
}

/// Collector whose collections block until released or cancelled.
///
/// Columns marked failing fail immediately without waiting.
#[derive(Debug)]
pub struct GatedCollector {
    gate: Semaphore,
    failing: HashSet<String>,
    cancels: AtomicUsize,
}

impl GatedCollector {
    pub fn new() -> Self {
        Self {
            gate: Semaphore::new(0),
            failing: HashSet::new(),
            cancels: AtomicUsize::new(0),
        }
    }

    pub fn failing(mut self, column: &str) -> Self {
        self.failing.insert(column.to_string());
        self
    }

    /// Lets `n` blocked collections proceed.
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StatsCollector for GatedCollector {
    async fn collect(&self, scope: &CollectionScope) -> CollectResult {
        if let ScanTarget::Column { name, .. } = &scope.target {
            if self.failing.contains(name) {
                return CollectResult::Failed(format!("failed to scan {name}"));
            }
        }
        match self.gate.acquire().await {
            Ok(permit) => permit.forget(),
            Err(_) => return CollectResult::Cancelled,
        }
        CollectResult::Collected { rows_scanned: 100 }
    }

    fn cancel(&self, _scope: &CollectionScope) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        self.gate.add_permits(1);
    }
}

/// A manager wired to counting collaborators.
pub struct Harness {
    pub manager: AnalysisManager,
    pub catalog: Arc<InMemoryTableCatalog>,
    pub store: Arc<InMemoryStatsMetaStore>,
    pub log: Arc<CountingEditLog>,
    pub executor: Arc<CountingExecutor>,
    pub updater: Arc<CountingStatsUpdater>,
    pub backend: Arc<StaticStatsBackend>,
}

impl Harness {
    pub fn new(collector: Arc<dyn StatsCollector>) -> Self {
        Self::build(collector, AnalysisConfig::default(), |_| {})
    }

    pub fn with_config(collector: Arc<dyn StatsCollector>, config: AnalysisConfig) -> Self {
        Self::build(collector, config, |_| {})
    }

    pub fn with_planner(collector: Arc<dyn StatsCollector>, planner: Arc<dyn JobPlanner>) -> Self {
        Self::build(collector, AnalysisConfig::default(), |deps| deps.planner = planner)
    }

    /// Plans with `planner` and decomposes every job into no tasks.
    pub fn without_tasks(planner: Arc<dyn JobPlanner>) -> Self {
        Self::build(
            Arc::new(statkeeper_analysis::collector::NoOpCollector),
            AnalysisConfig::default(),
            |deps| {
                deps.planner = planner;
                deps.task_factory = Arc::new(EmptyTaskFactory);
            },
        )
    }

    fn build(
        collector: Arc<dyn StatsCollector>,
        config: AnalysisConfig,
        customize: impl FnOnce(&mut Collaborators),
    ) -> Self {
        let catalog = catalog();
        let store = Arc::new(InMemoryStatsMetaStore::new());
        let log = Arc::new(CountingEditLog::default());
        let executor = Arc::new(CountingExecutor::default());
        let updater = Arc::new(CountingStatsUpdater::new(CatalogStatsUpdater::new(
            catalog.clone(),
            store.clone(),
        )));
        let backend = Arc::new(StaticStatsBackend::new(true));

        let mut deps = Collaborators::new(catalog.clone(), store.clone(), collector, log.clone())
            .with_backend(backend.clone())
            .with_executor(executor.clone());
        deps.stats_updater = updater.clone();
        customize(&mut deps);

        Self {
            manager: AnalysisManager::new(config, deps).unwrap(),
            catalog,
            store,
            log,
            executor,
            updater,
            backend,
        }
    }
}
