//! End-to-end scheduler scenarios with fake collaborators

mod common;

use common::{secs, FakeArchiver, FakeUploader, HarnessBuilder};
use ledger::UploadRecord;
use pipeline::{JobFailure, JobOutcome, UploadOutcome};
use scheduler::{Rejection, SchedulerError, SchedulerState, Submission, Trigger, TriggerKind};
use std::sync::{Arc, Barrier};
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cooldown_and_dedup_timeline() {
    let mut h = HarnessBuilder::new()
        .cooldown_secs(60)
        .retention(5)
        .content(b"scene A")
        .build();

    // t=0: real change
    let first = h.scheduler.submit(secs(0), None).unwrap();
    assert!(first.is_accepted());
    let report = h.next_report().await;
    assert!(matches!(report.outcome, JobOutcome::Succeeded(_)));
    assert_eq!(h.ledger_len(), 1);

    // t=10: identical content
    assert_eq!(
        h.scheduler.submit(secs(10), None).unwrap(),
        Submission::Rejected(Rejection::NoChangeDetected)
    );

    // t=20: new change inside the cooldown
    h.source.set(b"scene B");
    assert_eq!(
        h.scheduler.submit(secs(20), None).unwrap(),
        Submission::Rejected(Rejection::CooldownActive {
            remaining: Duration::from_secs(40)
        })
    );

    // t=65: cooldown elapsed
    assert!(h.scheduler.submit(secs(65), None).unwrap().is_accepted());
    let report = h.next_report().await;
    assert!(matches!(report.outcome, JobOutcome::Succeeded(_)));
    assert_eq!(h.ledger_len(), 2);
    assert_eq!(h.uploader.calls(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_submits_start_one_job() {
    let mut h = HarnessBuilder::new()
        .archiver(FakeArchiver::gated())
        .build();

    let barrier = Arc::new(Barrier::new(2));
    let scheduler = Arc::new(h.scheduler);
    let mut handles = Vec::new();
    for _ in 0..2 {
        let barrier = barrier.clone();
        let scheduler = scheduler.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            barrier.wait();
            scheduler.submit(secs(1), None).unwrap()
        }));
    }

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }

    let accepted = results.iter().filter(|r| r.is_accepted()).count();
    assert_eq!(accepted, 1, "results: {:?}", results);
    assert!(results.contains(&Submission::Rejected(Rejection::JobAlreadyRunning)));
    assert_eq!(scheduler.status().state, SchedulerState::Draining);

    h.archiver.release();
    let report = tokio::time::timeout(Duration::from_secs(10), h.reports.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(report.outcome, JobOutcome::Succeeded(_)));

    // The coalesced request saw unchanged content and started nothing
    let extra = tokio::time::timeout(Duration::from_millis(200), h.reports.recv()).await;
    assert!(extra.is_err());
    assert_eq!(*h.archiver.calls.lock(), 1);
    assert_eq!(h.uploader.calls(), 1);
    assert_eq!(scheduler.status().state, SchedulerState::Idle);
    assert_eq!(h.ledger.lock().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pending_requests_keep_only_the_last() {
    let mut h = HarnessBuilder::new()
        .archiver(FakeArchiver::gated())
        .content(b"v1")
        .build();

    assert!(h
        .scheduler
        .submit(secs(1), Some("first".into()))
        .unwrap()
        .is_accepted());

    h.source.set(b"v2");
    assert_eq!(
        h.scheduler.submit(secs(2), Some("second".into())).unwrap(),
        Submission::Rejected(Rejection::JobAlreadyRunning)
    );
    h.source.set(b"v3");
    assert_eq!(
        h.scheduler.submit(secs(3), Some("third".into())).unwrap(),
        Submission::Rejected(Rejection::JobAlreadyRunning)
    );

    h.archiver.release();
    let first = h.next_report().await;
    let second = h.next_report().await;

    assert_eq!(first.message, "first");
    assert_eq!(second.message, "third");
    assert!(matches!(second.outcome, JobOutcome::Succeeded(_)));
    h.assert_no_report().await;

    assert_eq!(*h.uploader.messages.lock(), vec!["first", "third"]);
    assert_eq!(h.ledger_len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn transient_failures_stop_at_retry_bound() {
    let mut h = HarnessBuilder::new()
        .uploader(FakeUploader::with_fallback(UploadOutcome::TransientFailure(
            "HTTP 503".into(),
        )))
        .build();

    assert!(h.scheduler.submit(secs(1), None).unwrap().is_accepted());
    let report = h.next_report().await;

    assert_eq!(
        report.outcome,
        JobOutcome::Failed(JobFailure::RetriesExhausted {
            attempts: 3,
            last_error: "HTTP 503".into()
        })
    );
    assert_eq!(report.attempts, 3);
    assert_eq!(h.uploader.calls(), 3);
    assert_eq!(h.ledger_len(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn permanent_failure_is_not_retried() {
    let mut h = HarnessBuilder::new()
        .uploader(FakeUploader::with_fallback(UploadOutcome::PermanentFailure(
            "HTTP 400: bad payload".into(),
        )))
        .build();

    assert!(h.scheduler.submit(secs(1), None).unwrap().is_accepted());
    let report = h.next_report().await;

    assert!(matches!(
        report.outcome,
        JobOutcome::Failed(JobFailure::Upload(_))
    ));
    assert_eq!(h.uploader.calls(), 1);
    assert_eq!(h.ledger_len(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn archive_failure_leaves_ledger_untouched() {
    let archiver = FakeArchiver::new();
    *archiver.fail.lock() = true;
    let mut h = HarnessBuilder::new().archiver(archiver).build();

    assert!(h.scheduler.submit(secs(1), None).unwrap().is_accepted());
    let report = h.next_report().await;
    assert!(matches!(
        report.outcome,
        JobOutcome::Failed(JobFailure::Archive(_))
    ));
    assert_eq!(h.uploader.calls(), 0);
    assert_eq!(h.ledger_len(), 0);

    // Nothing was recorded, so the same content is still new
    *h.archiver.fail.lock() = false;
    assert!(h.scheduler.submit(secs(2), None).unwrap().is_accepted());
    assert!(matches!(
        h.next_report().await.outcome,
        JobOutcome::Succeeded(_)
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unchanged_snapshot_is_rejected_after_upload() {
    let mut h = HarnessBuilder::new().build();

    assert!(h.scheduler.submit(secs(1), None).unwrap().is_accepted());
    h.next_report().await;

    assert_eq!(
        h.scheduler.submit(secs(2), None).unwrap(),
        Submission::Rejected(Rejection::NoChangeDetected)
    );
    assert_eq!(
        h.scheduler.submit(secs(3), Some("again".into())).unwrap(),
        Submission::Rejected(Rejection::NoChangeDetected)
    );
    assert_eq!(h.ledger_len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_before_artifact_exists() {
    let mut h = HarnessBuilder::new()
        .archiver(FakeArchiver::gated())
        .build();

    assert!(h.scheduler.submit(secs(1), None).unwrap().is_accepted());
    // Queued while running, dropped by cancel
    h.source.set(b"scene v2");
    h.scheduler.submit(secs(2), None).unwrap();

    assert!(h.scheduler.cancel());
    h.archiver.release();

    let report = h.next_report().await;
    assert!(matches!(report.outcome, JobOutcome::Cancelled(_)));
    h.assert_no_report().await;

    assert_eq!(h.uploader.calls(), 0);
    assert_eq!(h.ledger_len(), 0);
    assert!(!h.scheduler.cancel());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_mid_upload_waits_for_result() {
    let mut h = HarnessBuilder::new()
        .uploader(FakeUploader::gated())
        .build();

    assert!(h.scheduler.submit(secs(1), None).unwrap().is_accepted());
    tokio::time::timeout(Duration::from_secs(10), h.uploader.started.notified())
        .await
        .unwrap();

    assert!(h.scheduler.cancel());
    h.uploader.release();

    // Bytes already went out; the success is kept
    let report = h.next_report().await;
    assert_eq!(
        report.outcome,
        JobOutcome::Succeeded(UploadRecord {
            attempts: 1,
            artifact_bytes: b"scene v1".len() as u64
        })
    );
    assert_eq!(h.ledger_len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unreadable_document_surfaces_read_error() {
    let mut h = HarnessBuilder::new().cooldown_secs(60).build();
    h.source.set_unreadable(true);

    let err = h.scheduler.submit(secs(1), None).unwrap_err();
    assert!(matches!(err, SchedulerError::Read(_)));
    assert_eq!(h.scheduler.status().state, SchedulerState::Idle);

    // The failed trigger did not consume the cooldown
    h.source.set_unreadable(false);
    assert!(h.scheduler.submit(secs(2), None).unwrap().is_accepted());
    h.next_report().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cooldown_and_ledger_survive_restart() {
    let state = tempfile::TempDir::new().unwrap();
    {
        let mut h = HarnessBuilder::new()
            .cooldown_secs(60)
            .store(state.path())
            .content(b"scene A")
            .build();
        assert!(h.scheduler.submit(secs(100), None).unwrap().is_accepted());
        h.next_report().await;
        h.scheduler.shutdown().await;
    }

    let h = HarnessBuilder::new()
        .cooldown_secs(60)
        .store(state.path())
        .content(b"scene A")
        .build();
    assert_eq!(h.ledger_len(), 1);

    // Same content is still a duplicate after the restart
    assert_eq!(
        h.scheduler.submit(secs(120), None).unwrap(),
        Submission::Rejected(Rejection::NoChangeDetected)
    );

    h.source.set(b"scene B");
    assert_eq!(
        h.scheduler.submit(secs(130), None).unwrap(),
        Submission::Rejected(Rejection::CooldownActive {
            remaining: Duration::from_secs(30)
        })
    );
    assert!(h.scheduler.submit(secs(160), None).unwrap().is_accepted());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn triggers_use_the_context_clock() {
    let mut h = HarnessBuilder::new().cooldown_secs(30).build();
    h.clock.set(secs(1_000));

    let trigger = Trigger {
        kind: TriggerKind::Autosave,
        message: None,
    };
    assert!(h.scheduler.submit_trigger(trigger.clone()).unwrap().is_accepted());
    h.next_report().await;

    h.source.set(b"scene v2");
    h.clock.advance(secs(10));
    assert_eq!(
        h.scheduler.submit_trigger(trigger).unwrap(),
        Submission::Rejected(Rejection::CooldownActive {
            remaining: Duration::from_secs(20)
        })
    );
    assert_eq!(h.scheduler.status().cooldown_remaining, Duration::from_secs(20));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_rejects_new_triggers() {
    let h = HarnessBuilder::new().build();
    h.scheduler.shutdown().await;

    assert!(matches!(
        h.scheduler.submit(secs(1), None),
        Err(SchedulerError::Stopped)
    ));
}

const SLOW_CAPTURE: Duration = Duration::from_millis(1_500);
const PROMPT: Duration = Duration::from_millis(500);

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn status_and_cancel_do_not_wait_for_a_capture() {
    let h = HarnessBuilder::new().build();
    h.source.set_capture_delay(SLOW_CAPTURE);

    let scheduler = Arc::new(h.scheduler);
    let submitter = scheduler.clone();
    let submission = tokio::task::spawn_blocking(move || submitter.submit(secs(1), None));

    // Let the submission claim the slot and start copying
    tokio::time::sleep(Duration::from_millis(200)).await;

    let started = std::time::Instant::now();
    let status = scheduler.status();
    assert!(!scheduler.cancel());
    assert!(started.elapsed() < PROMPT, "blocked for {:?}", started.elapsed());
    assert_eq!(status.state, SchedulerState::Idle);

    // A trigger arriving mid-capture is coalesced, not run in parallel
    assert_eq!(
        scheduler
            .submit_trigger_async(Trigger::manual(None))
            .await
            .unwrap(),
        Submission::Rejected(Rejection::JobAlreadyRunning)
    );

    assert!(submission.await.unwrap().unwrap().is_accepted());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn job_completion_is_reported_while_the_followup_captures() {
    let mut h = HarnessBuilder::new()
        .uploader(FakeUploader::gated())
        .content(b"v1")
        .build();

    assert!(h.scheduler.submit(secs(1), None).unwrap().is_accepted());
    tokio::time::timeout(Duration::from_secs(10), h.uploader.started.notified())
        .await
        .unwrap();

    // Coalesced behind the running job; its capture will be slow
    h.source.set(b"v2");
    h.scheduler.submit(secs(2), Some("follow-up".into())).unwrap();
    h.source.set_capture_delay(SLOW_CAPTURE);

    let started = std::time::Instant::now();
    h.uploader.release();
    let first = h.next_report().await;
    assert!(matches!(first.outcome, JobOutcome::Succeeded(_)));
    assert!(started.elapsed() < SLOW_CAPTURE, "report waited for the capture");

    // The worker is free while the follow-up is evaluated
    let polled = std::time::Instant::now();
    let status = h.scheduler.status();
    assert!(polled.elapsed() < PROMPT);
    assert_eq!(status.last_report.map(|r| r.job_id), Some(first.job_id));

    let second = h.next_report().await;
    assert_eq!(second.message, "follow-up");
    assert!(matches!(second.outcome, JobOutcome::Succeeded(_)));
    assert_eq!(h.ledger_len(), 2);
}
