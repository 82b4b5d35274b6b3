//! The auto-analyze loop against an in-memory catalog.

#![allow(clippy::expect_used, clippy::unwrap_used)]

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use common::{GatedCollector, Harness, orders};
use statkeeper_analysis::auto::AutoAnalyzer;
use statkeeper_analysis::collector::NoOpCollector;
use statkeeper_analysis::config::AnalysisConfig;
use statkeeper_analysis::info::JobType;
use statkeeper_analysis::state::AnalysisState;

fn analyzer(h: &Harness) -> AutoAnalyzer {
    AutoAnalyzer::new(h.manager.clone(), h.catalog.clone(), h.store.clone()).unwrap()
}

async fn wait_for_system_jobs(h: &Harness) {
    for job in h.manager.system_jobs().unwrap() {
        let done = tokio::time::timeout(Duration::from_secs(5), h.manager.wait_for_job(job.job_id))
            .await
            .expect("system job did not complete in time")
            .unwrap();
        assert_eq!(done.state, AnalysisState::Finished);
    }
}

#[tokio::test]
async fn analyzes_stale_tables_until_fresh() {
    let h = Harness::new(Arc::new(NoOpCollector));
    let auto = analyzer(&h);

    // Neither table was ever analyzed.
    assert_eq!(auto.run_once().await.unwrap(), 2);
    wait_for_system_jobs(&h).await;
    let history = h.manager.auto_jobs().unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|job| job.job_type == JobType::System));

    assert_eq!(auto.run_once().await.unwrap(), 0);
}

#[tokio::test]
async fn row_drift_triggers_incremental_reanalysis() {
    let h = Harness::new(Arc::new(NoOpCollector));
    let auto = analyzer(&h);
    auto.run_once().await.unwrap();
    wait_for_system_jobs(&h).await;

    // 300 new rows on 500 live rows is a 60% drift.
    h.catalog.load_partition(&orders(), "p1", 300).unwrap();
    assert_eq!(auto.run_once().await.unwrap(), 1);
    wait_for_system_jobs(&h).await;

    let scope = h.updater.last().unwrap();
    assert_eq!(scope.table, orders());
    let p1 = BTreeSet::from(["p1".to_string()]);
    assert!(scope.col_to_partitions.values().all(|partitions| *partitions == p1));
    assert_eq!(h.manager.auto_jobs().unwrap().len(), 3);
}

#[tokio::test]
async fn skips_tables_with_system_job_in_flight() {
    let collector = Arc::new(GatedCollector::new());
    let h = Harness::new(collector.clone());
    let auto = analyzer(&h);

    assert_eq!(auto.run_once().await.unwrap(), 2);
    assert_eq!(auto.run_once().await.unwrap(), 0);
    assert_eq!(h.manager.system_jobs().unwrap().len(), 2);

    // Two column tasks on each table plus the external table's row count.
    collector.release(5);
    wait_for_system_jobs(&h).await;
    assert!(h.manager.system_jobs().unwrap().is_empty());
}

#[tokio::test]
async fn configured_ratio_decides_staleness() {
    let lenient = Harness::new(Arc::new(NoOpCollector));
    let config = AnalysisConfig::from_env_with(|key| {
        (key == "STATKEEPER_STALE_ROW_RATIO").then(|| "0.2".to_string())
    })
    .unwrap();
    let strict = Harness::with_config(Arc::new(NoOpCollector), config);

    for h in [&lenient, &strict] {
        let auto = analyzer(h);
        assert_eq!(auto.run_once().await.unwrap(), 2);
        wait_for_system_jobs(h).await;
        // 60 new rows on 260 live rows is a 23% drift.
        h.catalog.load_partition(&orders(), "p1", 60).unwrap();
    }

    assert_eq!(analyzer(&lenient).run_once().await.unwrap(), 0);
    assert_eq!(analyzer(&strict).run_once().await.unwrap(), 1);
}

#[tokio::test]
async fn spawned_loop_scans_at_configured_interval() {
    let config = AnalysisConfig {
        auto_analyze_interval: Duration::from_millis(10),
        ..AnalysisConfig::default()
    };
    let h = Harness::with_config(Arc::new(NoOpCollector), config);
    let handle = analyzer(&h).spawn();

    tokio::time::timeout(Duration::from_secs(5), async {
        while h.manager.auto_jobs().unwrap().len() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("auto analyze loop did not run");
    handle.abort();
}
