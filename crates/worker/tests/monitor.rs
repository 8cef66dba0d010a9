//! Monitor cycles against the in-memory store and scripted runtime.
//!
//! Await sleeps run on paused Tokio time, so the 30-second poll interval
//! advances instantly.

mod common;

use std::time::Duration;

use assert_matches::assert_matches;
use tokio_util::sync::CancellationToken;
use trackq_core::status::MediaStatus::{Failed, Queued, Running, Success};
use trackq_docker::UnitStatus;
use trackq_worker::{CycleOutcome, MonitorError};

use common::{Harness, NAME_PREFIX};

// ---------------------------------------------------------------------------
// Queue and admission
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn empty_queue_is_a_noop() {
    let mut h = Harness::new();

    let report = h.monitor.run_cycle(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.outcome, CycleOutcome::Idle);
    assert_eq!(report.reconciled, 0);
    assert!(h.store.transitions().is_empty());
    assert!(h.runtime.launched().is_empty());
    assert!(h.notifications().is_empty());
}

#[tokio::test(start_paused = true)]
async fn jobs_for_other_backends_are_ignored() {
    let h = Harness::new();
    let job = h.queue_aws_job("http://host/path/video.mp4");

    let report = h.monitor.run_cycle(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.outcome, CycleOutcome::Idle);
    assert_eq!(h.status(job), Some(Queued));
}

#[tokio::test(start_paused = true)]
async fn admitted_job_is_running_with_engine_recorded() {
    let mut h = Harness::new();
    let job = h.queue_job("http://host/path/video.mp4");
    let cancel = CancellationToken::new();

    // Interrupt the await so the admitted state can be inspected.
    let (report, ()) = tokio::join!(h.monitor.run_cycle(&cancel), async {
        tokio::time::sleep(Duration::from_secs(45)).await;
        cancel.cancel();
    });

    assert_eq!(
        report.unwrap().outcome,
        CycleOutcome::Interrupted { job_id: job }
    );
    assert_eq!(h.status(job), Some(Running));
    assert_eq!(h.engine(job).as_deref(), Some("fake0001"));

    let launched = h.runtime.launched();
    assert_eq!(launched.len(), 1);
    let env: std::collections::HashMap<_, _> = launched[0].env.iter().cloned().collect();
    let output = &env["OUTPUT_S3"];
    let stamp = output
        .strip_prefix("s3://bucket1/tracks/path/")
        .and_then(|rest| rest.strip_suffix("/output"))
        .expect("output location under bucket/prefix/input-dir");
    assert_eq!(stamp.len(), "20240102T030405Z".len());
    assert!(stamp.ends_with('Z'));
    assert_eq!(env["VIDEO_URL"], "http://host/path/video.mp4");

    // Interrupted runs keep their container for the next start to reconcile.
    assert_eq!(h.runtime.container_ids(), vec!["fake0001".to_string()]);
    assert_eq!(h.notifications(), vec![(job, Running)]);
}

#[tokio::test(start_paused = true)]
async fn existing_unit_blocks_admission() {
    let mut h = Harness::new();
    // A stopped container still occupies the slot.
    h.runtime
        .add_container("leftover", &format!("{NAME_PREFIX}-99-1"), UnitStatus::exited(0));
    let job = h.queue_job("http://host/path/video.mp4");

    let report = h.monitor.run_cycle(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.outcome, CycleOutcome::Busy { active: 1 });
    assert_eq!(h.status(job), Some(Queued));
    assert!(h.runtime.launched().is_empty());
    assert!(h.store.transitions().is_empty());
    assert!(h.notifications().is_empty());
}

#[tokio::test(start_paused = true)]
async fn one_job_per_cycle_in_queue_order() {
    let h = Harness::new();
    let first = h.queue_job("http://host/a/one.mp4");
    let second = h.queue_job("http://host/b/two.mp4");
    let cancel = CancellationToken::new();

    h.runtime.script_polls([UnitStatus::exited(0)]);
    let report = h.monitor.run_cycle(&cancel).await.unwrap();
    assert_eq!(
        report.outcome,
        CycleOutcome::Completed { job_id: first, status: Success }
    );
    assert_eq!(h.status(second), Some(Queued));

    h.runtime.script_polls([UnitStatus::exited(0)]);
    let report = h.monitor.run_cycle(&cancel).await.unwrap();
    assert_eq!(
        report.outcome,
        CycleOutcome::Completed { job_id: second, status: Success }
    );

    // Never two jobs RUNNING at once.
    assert_eq!(
        h.store.transitions(),
        vec![
            (first, Running),
            (first, Success),
            (second, Running),
            (second, Success),
        ]
    );
    assert_eq!(h.runtime.launched().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn finished_multi_media_job_does_not_block_the_queue() {
    let h = Harness::new();
    let multi = h.queue_job_with_media(&["http://host/a/first.mp4", "http://host/a/second.mp4"]);
    let single = h.queue_job("http://host/b/only.mp4");
    let cancel = CancellationToken::new();

    h.runtime.script_polls([UnitStatus::exited(0)]);
    let report = h.monitor.run_cycle(&cancel).await.unwrap();
    assert_eq!(
        report.outcome,
        CycleOutcome::Completed { job_id: multi, status: Success }
    );

    h.runtime.script_polls([UnitStatus::exited(0)]);
    let report = h.monitor.run_cycle(&cancel).await.unwrap();
    assert_eq!(
        report.outcome,
        CycleOutcome::Completed { job_id: single, status: Success }
    );

    let report = h.monitor.run_cycle(&cancel).await.unwrap();
    assert_eq!(report.outcome, CycleOutcome::Idle);

    let media = h.store.job(multi).unwrap().media;
    assert_eq!(media[0].status(), Some(Success));
    assert_eq!(media[1].status(), Some(Queued));

    // Only the first media item of a docker job is processed.
    let launched: Vec<_> = h
        .runtime
        .launched()
        .iter()
        .map(|spec| {
            let env: std::collections::HashMap<_, _> = spec.env.iter().cloned().collect();
            env["VIDEO_URL"].clone()
        })
        .collect();
    assert_eq!(launched, vec!["http://host/a/first.mp4", "http://host/b/only.mp4"]);
}

// ---------------------------------------------------------------------------
// Await and finalize
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn success_on_third_poll() {
    let mut h = Harness::new();
    let job = h.queue_job("http://host/path/video.mp4");
    h.runtime.script_polls([
        UnitStatus::running(),
        UnitStatus::running(),
        UnitStatus::exited(0),
    ]);

    let report = h.monitor.run_cycle(&CancellationToken::new()).await.unwrap();

    assert_eq!(
        report.outcome,
        CycleOutcome::Completed { job_id: job, status: Success }
    );
    assert_eq!(h.status(job), Some(Success));
    assert_eq!(h.runtime.inspections(), 3);
    assert_eq!(h.notifications(), vec![(job, Running), (job, Success)]);
    // The slot is freed for the next job.
    assert!(h.runtime.container_ids().is_empty());
}

#[tokio::test(start_paused = true)]
async fn exhausted_poll_budget_fails_the_job() {
    let mut h = Harness::new();
    let job = h.queue_job("http://host/path/video.mp4");
    // No script: the container keeps running.

    let started = tokio::time::Instant::now();
    let report = h.monitor.run_cycle(&CancellationToken::new()).await.unwrap();

    assert_eq!(
        report.outcome,
        CycleOutcome::Completed { job_id: job, status: Failed }
    );
    assert_eq!(h.status(job), Some(Failed));
    assert_eq!(h.runtime.inspections(), 3);
    assert!(started.elapsed() >= Duration::from_secs(90));
    assert_eq!(h.notifications(), vec![(job, Running), (job, Failed)]);
    assert_eq!(h.runtime.stopped(), vec!["fake0001".to_string()]);
    assert!(h.runtime.container_ids().is_empty());
}

#[tokio::test(start_paused = true)]
async fn non_zero_exit_fails_without_further_polls() {
    let h = Harness::new();
    let job = h.queue_job("http://host/path/video.mp4");
    h.runtime.script_polls([UnitStatus::exited(1)]);

    let report = h.monitor.run_cycle(&CancellationToken::new()).await.unwrap();

    assert_eq!(
        report.outcome,
        CycleOutcome::Completed { job_id: job, status: Failed }
    );
    assert_eq!(h.runtime.inspections(), 1);
}

#[tokio::test(start_paused = true)]
async fn unusable_input_url_fails_without_launch() {
    let mut h = Harness::new();
    let job = h.queue_job("not a url");

    let report = h.monitor.run_cycle(&CancellationToken::new()).await.unwrap();

    assert_eq!(
        report.outcome,
        CycleOutcome::Completed { job_id: job, status: Failed }
    );
    assert!(h.runtime.launched().is_empty());
    assert_eq!(h.notifications(), vec![(job, Failed)]);
}

#[tokio::test(start_paused = true)]
async fn unsaved_result_is_reported_and_reconciled_next_cycle() {
    let mut h = Harness::new();
    let job = h.queue_job("http://host/path/video.mp4");
    h.runtime.script_polls([UnitStatus::exited(0)]);
    // admit and record_launch succeed, the final status write fails.
    h.store.fail_write_after(2);
    let cancel = CancellationToken::new();

    let report = h.monitor.run_cycle(&cancel).await.unwrap();

    assert_eq!(
        report.outcome,
        CycleOutcome::Unrecorded { job_id: job, status: Success }
    );
    assert_eq!(h.status(job), Some(Running));
    assert!(h.runtime.container_ids().is_empty());
    assert_eq!(h.notifications(), vec![(job, Running)]);

    let report = h.monitor.run_cycle(&cancel).await.unwrap();
    assert_eq!(report.reconciled, 1);
    assert_eq!(h.status(job), Some(Failed));
    assert_eq!(h.notifications(), vec![(job, Failed)]);
}

// ---------------------------------------------------------------------------
// Reconciliation
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn running_job_with_missing_unit_is_failed() {
    let mut h = Harness::new();
    let job = h.queue_job("http://host/path/video.mp4");
    h.store.force_state(job, Running, Some("gone"));

    let report = h.monitor.run_cycle(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.reconciled, 1);
    assert_eq!(report.outcome, CycleOutcome::Idle);
    assert_eq!(h.status(job), Some(Failed));
    assert_eq!(h.notifications(), vec![(job, Failed)]);
}

#[tokio::test(start_paused = true)]
async fn reconciliation_runs_before_admission() {
    let mut h = Harness::new();
    let orphan = h.queue_job("http://host/a/one.mp4");
    let queued = h.queue_job("http://host/b/two.mp4");
    h.store.force_state(orphan, Running, Some("c1"));
    h.runtime
        .add_container("c1", &format!("{NAME_PREFIX}-{orphan}-100"), UnitStatus::running());
    h.runtime.script_polls([UnitStatus::exited(0)]);

    let report = h.monitor.run_cycle(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.reconciled, 1);
    assert_eq!(
        report.outcome,
        CycleOutcome::Completed { job_id: queued, status: Success }
    );
    assert_eq!(
        h.store.transitions(),
        vec![(orphan, Failed), (queued, Running), (queued, Success)]
    );
    assert_eq!(h.runtime.removed()[0], "c1");
    assert_eq!(
        h.notifications(),
        vec![(orphan, Failed), (queued, Running), (queued, Success)]
    );
}

#[tokio::test(start_paused = true)]
async fn orphan_without_engine_is_found_by_name() {
    let h = Harness::new();
    let job = h.queue_job("http://host/path/video.mp4");
    h.store.force_state(job, Running, None);
    h.runtime
        .add_container("c7", &format!("{NAME_PREFIX}-{job}-100"), UnitStatus::running());
    h.runtime
        .add_container("c8", &format!("{NAME_PREFIX}-{}-100", job + 1000), UnitStatus::running());

    let report = h.monitor.run_cycle(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.reconciled, 1);
    assert_eq!(h.status(job), Some(Failed));
    assert_eq!(h.runtime.removed(), vec!["c7".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn reconciliation_is_idempotent() {
    let mut h = Harness::new();
    let job = h.queue_job("http://host/path/video.mp4");
    h.store.force_state(job, Running, Some("gone"));
    let cancel = CancellationToken::new();

    let first = h.monitor.run_cycle(&cancel).await.unwrap();
    let second = h.monitor.run_cycle(&cancel).await.unwrap();

    assert_eq!(first.reconciled, 1);
    assert_eq!(second.reconciled, 0);
    assert_eq!(h.store.transitions(), vec![(job, Failed)]);
    assert_eq!(h.notifications(), vec![(job, Failed)]);
}

#[tokio::test(start_paused = true)]
async fn store_error_on_one_orphan_does_not_stop_the_others() {
    let mut h = Harness::new();
    let stuck = h.queue_job("http://host/a/one.mp4");
    let orphan = h.queue_job("http://host/b/two.mp4");
    h.store.force_state(stuck, Running, Some("gone-1"));
    h.store.force_state(orphan, Running, Some("gone-2"));
    // The first fail_orphan call fails.
    h.store.fail_next_write();

    let report = h.monitor.run_cycle(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.reconciled, 1);
    assert_eq!(report.outcome, CycleOutcome::Idle);
    assert_eq!(h.status(stuck), Some(Running));
    assert_eq!(h.status(orphan), Some(Failed));
    assert_eq!(h.notifications(), vec![(orphan, Failed)]);
}

// ---------------------------------------------------------------------------
// Errors and cancellation
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn launch_failure_leaves_job_queued() {
    let mut h = Harness::new();
    let job = h.queue_job("http://host/path/video.mp4");
    h.runtime.fail_next_launch("image not found");
    let cancel = CancellationToken::new();

    let err = h.monitor.run_cycle(&cancel).await.unwrap_err();
    assert_matches!(err, MonitorError::Launch(e) if e.job_id == job);
    assert_eq!(h.status(job), Some(Queued));
    assert_eq!(h.engine(job), None);
    assert!(h.notifications().is_empty());

    // Head-of-line retry on the next cycle.
    h.runtime.script_polls([UnitStatus::exited(0)]);
    let report = h.monitor.run_cycle(&cancel).await.unwrap();
    assert_eq!(
        report.outcome,
        CycleOutcome::Completed { job_id: job, status: Success }
    );
}

#[tokio::test(start_paused = true)]
async fn store_failure_aborts_cycle_without_launch() {
    let h = Harness::new();
    let job = h.queue_job("http://host/path/video.mp4");
    h.store.fail_next_write();

    let err = h.monitor.run_cycle(&CancellationToken::new()).await.unwrap_err();

    assert_matches!(err, MonitorError::Store(_));
    assert_eq!(h.status(job), Some(Queued));
    assert!(h.runtime.launched().is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_engine_record_removes_unit_and_requeues() {
    let mut h = Harness::new();
    let job = h.queue_job("http://host/path/video.mp4");
    // admit succeeds, record_launch fails.
    h.store.fail_write_after(1);

    let err = h.monitor.run_cycle(&CancellationToken::new()).await.unwrap_err();

    assert_matches!(err, MonitorError::Store(_));
    assert_eq!(h.status(job), Some(Queued));
    assert_eq!(h.engine(job), None);
    assert_eq!(h.runtime.launched().len(), 1);
    assert_eq!(h.runtime.removed(), vec!["fake0001".to_string()]);
    assert!(h.runtime.container_ids().is_empty());
    assert_eq!(h.store.transitions(), vec![(job, Running), (job, Queued)]);
    assert!(h.notifications().is_empty());
}

#[tokio::test(start_paused = true)]
async fn runtime_listing_failure_aborts_cycle() {
    let h = Harness::new();
    let job = h.queue_job("http://host/path/video.mp4");
    h.runtime.fail_next_list("daemon unavailable");

    let err = h.monitor.run_cycle(&CancellationToken::new()).await.unwrap_err();

    assert_matches!(err, MonitorError::Runtime(_));
    assert_eq!(h.status(job), Some(Queued));
}

#[tokio::test(start_paused = true)]
async fn cancelled_token_stops_before_any_work() {
    let h = Harness::new();
    let job = h.queue_job("http://host/path/video.mp4");
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = h.monitor.run_cycle(&cancel).await.unwrap();

    assert_eq!(report.outcome, CycleOutcome::Stopped);
    assert_eq!(h.status(job), Some(Queued));
    assert!(h.runtime.launched().is_empty());
}
