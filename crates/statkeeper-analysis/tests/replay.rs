//! Replaying a leader's edit log into a fresh manager.

#![allow(clippy::expect_used, clippy::unwrap_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use common::{GatedCollector, Harness, clicks, orders};
use statkeeper_analysis::collector::NoOpCollector;
use statkeeper_analysis::error::Error;
use statkeeper_analysis::journal::JournalRecord;
use statkeeper_analysis::manager::{AnalysisManager, JobFilter};
use statkeeper_analysis::request::AnalyzeRequest;
use statkeeper_analysis::state::AnalysisState;
use statkeeper_core::JobId;

async fn wait(manager: &AnalysisManager, job_id: JobId) {
    tokio::time::timeout(Duration::from_secs(5), manager.wait_for_job(job_id))
        .await
        .expect("job did not complete in time")
        .unwrap();
}

async fn submit(manager: &AnalysisManager, request: AnalyzeRequest) -> JobId {
    manager
        .build_and_assign_job(request)
        .await
        .unwrap()
        .job_id()
        .unwrap()
}

#[tokio::test]
async fn follower_rebuilds_maps_without_executing() {
    let leader = Harness::new(Arc::new(NoOpCollector));
    let manual = submit(&leader.manager, AnalyzeRequest::new(orders())).await;
    let system = submit(&leader.manager, AnalyzeRequest::new(clicks()).system()).await;
    let template = submit(&leader.manager, AnalyzeRequest::new(orders()).every(3600)).await;
    wait(&leader.manager, manual).await;
    wait(&leader.manager, system).await;

    let entries = leader.log.inner.entries().unwrap();
    let follower = Harness::new(Arc::new(NoOpCollector));
    let applied = follower.manager.replay().replay_all(&entries).unwrap();
    assert_eq!(applied, entries.len());

    let job = follower.manager.job_info(manual).unwrap().unwrap();
    assert_eq!(job.state, AnalysisState::Finished);
    assert!(follower.manager.system_jobs().unwrap().is_empty());
    let auto_jobs = follower.manager.auto_jobs().unwrap();
    assert_eq!(auto_jobs.len(), 1);
    assert_eq!(auto_jobs[0].job_id, system);
    assert_eq!(follower.manager.in_flight_job_count().unwrap(), 0);

    // Replay never runs tasks or writes anything back.
    assert_eq!(follower.executor.calls(), 0);
    assert_eq!(follower.updater.calls(), 0);
    assert_eq!(follower.log.total(), 0);

    // Periodic templates come back on promotion.
    assert!(follower.manager.period_job_ids().unwrap().is_empty());
    assert_eq!(follower.manager.resume_period_jobs().unwrap(), 1);
    assert_eq!(follower.manager.period_job_ids().unwrap(), vec![template]);
}

#[tokio::test]
async fn replay_is_idempotent() {
    let leader = Harness::new(Arc::new(NoOpCollector));
    let manual = submit(&leader.manager, AnalyzeRequest::new(orders())).await;
    let system = submit(&leader.manager, AnalyzeRequest::new(clicks()).system()).await;
    wait(&leader.manager, manual).await;
    wait(&leader.manager, system).await;
    let entries = leader.log.inner.entries().unwrap();

    let follower = Harness::new(Arc::new(NoOpCollector));
    let replay = follower.manager.replay();
    replay.replay_all(&entries).unwrap();
    let once = follower.manager.show_analysis_jobs(&JobFilter::default()).unwrap();

    // From the start again, then the creation record alone out of order.
    replay.replay_all(&entries).unwrap();
    replay.apply_encoded(&entries[0]).unwrap();
    let twice = follower.manager.show_analysis_jobs(&JobFilter::default()).unwrap();

    assert_eq!(once, twice);
    assert_eq!(follower.manager.auto_jobs().unwrap().len(), 1);
    assert_eq!(
        follower.manager.job_info(manual).unwrap().unwrap().state,
        AnalysisState::Finished
    );
}

#[tokio::test]
async fn in_flight_job_resumes_tracking_after_replay() {
    let leader = Harness::new(Arc::new(GatedCollector::new()));
    let job_id = submit(&leader.manager, AnalyzeRequest::new(orders())).await;
    let entries = leader.log.inner.entries().unwrap();

    let follower = Harness::new(Arc::new(NoOpCollector));
    follower.manager.replay().replay_all(&entries).unwrap();
    assert!(follower.manager.is_job_in_flight(job_id).unwrap());
    let tasks = follower.manager.task_infos(job_id).unwrap();
    assert_eq!(tasks.len(), 2);

    // Status reported to the new leader still drives the job to completion.
    for task in &tasks {
        follower
            .manager
            .update_task_status(task, AnalysisState::Finished, "", Utc::now())
            .unwrap();
    }
    let job = follower.manager.job_info(job_id).unwrap().unwrap();
    assert_eq!(job.state, AnalysisState::Finished);
    assert_eq!(follower.updater.calls(), 1);
}

#[tokio::test]
async fn malformed_record_is_fatal() {
    let follower = Harness::new(Arc::new(NoOpCollector));
    let err = follower
        .manager
        .replay()
        .apply_encoded(b"not a record")
        .unwrap_err();
    assert!(matches!(err, Error::Replay { .. }));

    let leader = Harness::new(Arc::new(NoOpCollector));
    submit(&leader.manager, AnalyzeRequest::new(orders()).every(60)).await;
    let mut entries = leader.log.inner.entries().unwrap();
    entries.insert(0, b"{\"op\":\"drop_everything\"}".to_vec());
    let err = follower.manager.replay().replay_all(&entries).unwrap_err();
    assert!(err.to_string().contains("edit log entry 0"));
    assert!(follower.manager.show_analysis_jobs(&JobFilter::default()).unwrap().is_empty());
}

#[tokio::test]
async fn auto_job_record_for_manual_job_is_rejected() {
    let leader = Harness::new(Arc::new(NoOpCollector));
    let manual = submit(&leader.manager, AnalyzeRequest::new(orders())).await;
    wait(&leader.manager, manual).await;
    let finished = leader.manager.job_info(manual).unwrap().unwrap();

    let follower = Harness::new(Arc::new(NoOpCollector));
    let err = follower
        .manager
        .replay()
        .apply(JournalRecord::AutoJob(finished))
        .unwrap_err();
    assert!(matches!(err, Error::Replay { .. }));
}
