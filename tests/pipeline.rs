//! Pipeline Integration Tests
//!
//! Drives the orchestrator and batch runner against stub collaborators and a
//! real on-disk state store.

mod common;

use std::time::Duration;

use common::{Harness, StubAi, DESCRIPTION};
use craftpost::core::{
    BatchRunner, Disposition, OrchestratorOptions, PlannedAction, PreviouslyFailed, RetryPolicy,
};
use craftpost::domain::{ClassificationMethod, ErrorKind, FileIdentity, RecordStatus, Stage};

const DELAY: Duration = Duration::from_millis(1);

#[tokio::test]
async fn test_end_to_end_three_files() {
    let h = Harness::with_options(OrchestratorOptions::default(), StubAi::answering("13")).await;
    let gundam = h.input("gundam rx78.zip").await;
    let lantern = h.input("paper lantern.zip").await;
    let crane = h.input("origami crane.zip").await;
    h.uploader.fail("origami crane", ErrorKind::Auth, u32::MAX);

    let runner = BatchRunner::new(h.orchestrator.clone());
    let summary = runner
        .run(vec![gundam.clone(), lantern.clone(), crane.clone()], 1, DELAY)
        .await
        .unwrap();

    assert_eq!(summary.total, 3);
    assert_eq!(summary.completed, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.not_started, 0);
    assert!(summary.has_failures());
    assert_eq!(summary.failures[0].name, "origami crane.zip");
    assert_eq!(summary.failures[0].kind, ErrorKind::Auth);
    assert_eq!(summary.failures[0].stage, Some(Stage::Upload));

    // Auth is never retried
    assert_eq!(h.uploader.calls(), 3);

    let gundam_id = FileIdentity::from_path(&gundam).await.unwrap();
    let record = h.store.get(&gundam_id).await.unwrap();
    assert_eq!(record.status, RecordStatus::Completed);
    assert_eq!(record.category_id, Some(6));
    assert_eq!(record.upload_url.as_deref(), Some("https://files.example/gundam_rx78"));

    let lantern_id = FileIdentity::from_path(&lantern).await.unwrap();
    let record = h.store.get(&lantern_id).await.unwrap();
    assert_eq!(record.category_id, Some(13));
    assert_eq!(h.ai.calls(), 1);

    let crane_id = FileIdentity::from_path(&crane).await.unwrap();
    assert!(!h.store.is_done(&crane_id).await);
    let failed = h.store.failed_record(&crane_id).await.unwrap();
    assert_eq!(failed.attempts, 1);
    let error = failed.last_error.unwrap();
    assert_eq!(error.kind, ErrorKind::Auth);
    assert_eq!(error.stage, Some(Stage::Upload));

    let drafts = h.publisher.drafts();
    assert_eq!(drafts.len(), 2);
    let draft = drafts.iter().find(|d| d.title == "gundam rx78").unwrap();
    assert_eq!(draft.category.id, 6);
    assert!(draft.body.starts_with(DESCRIPTION));
    assert!(draft
        .body
        .ends_with("Download: https://files.example/gundam_rx78"));
}

#[tokio::test]
async fn test_gundam_keyword_classification_reported() {
    let h = Harness::new().await;
    let path = h.input("gundam rx78.zip").await;

    let report = h.orchestrator.process_file(&path).await.unwrap();

    assert!(matches!(
        report.disposition,
        Disposition::Completed { category_id: 6, .. }
    ));
    let classify = report
        .stages
        .iter()
        .find(|o| o.stage == Stage::Classify)
        .unwrap();
    match &classify.result {
        Ok(craftpost::domain::StagePayload::Classified(c)) => {
            assert_eq!(c.method, ClassificationMethod::Keyword);
            assert!(c.score >= 1);
        }
        other => panic!("unexpected classify outcome: {:?}", other),
    }
    assert_eq!(h.ai.calls(), 0);
}

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let h = Harness::new().await;
    let files = vec![
        h.input("gundam rx78.zip").await,
        h.input("paper lantern.zip").await,
    ];

    let runner = BatchRunner::new(h.orchestrator.clone());
    let first = runner.run(files.clone(), 1, DELAY).await.unwrap();
    assert_eq!(first.completed, 2);

    let processed_before = tokio::fs::read(h.store.processed_path()).await.unwrap();
    let uploads = h.uploader.calls();
    let describes = h.content.calls();
    let images = h.images.calls();
    let publishes = h.publisher.calls();

    let second = runner.run(files, 1, DELAY).await.unwrap();
    assert_eq!(second.completed, 0);
    assert_eq!(second.skipped_done, 2);
    assert_eq!(second.failed, 0);

    assert_eq!(h.uploader.calls(), uploads);
    assert_eq!(h.content.calls(), describes);
    assert_eq!(h.images.calls(), images);
    assert_eq!(h.publisher.calls(), publishes);

    let processed_after = tokio::fs::read(h.store.processed_path()).await.unwrap();
    assert_eq!(processed_before, processed_after);
}

#[tokio::test]
async fn test_transient_retry_bound() {
    let h = Harness::new().await;
    let path = h.input("paper lantern.zip").await;
    h.content.fail("paper lantern", ErrorKind::Transient, u32::MAX);

    let report = h.orchestrator.process_file(&path).await.unwrap();

    assert_eq!(report.attempts(Stage::Upload), 1);
    assert_eq!(report.attempts(Stage::Describe), 3);
    assert_eq!(report.attempts(Stage::AcquireImage), 0);
    assert_eq!(h.content.calls(), 3);
    assert_eq!(h.images.calls(), 0);

    let identity = report.identity.unwrap();
    let record = h.store.failed_record(&identity).await.unwrap();
    let error = record.last_error.unwrap();
    assert_eq!(error.kind, ErrorKind::Transient);
    assert_eq!(error.stage, Some(Stage::Describe));
    // Upload already happened, so the URL is kept for the operator
    assert_eq!(record.upload_url.as_deref(), Some("https://files.example/paper_lantern"));
}

#[tokio::test]
async fn test_transient_then_success() {
    let h = Harness::new().await;
    let path = h.input("paper lantern.zip").await;
    h.uploader.fail("paper lantern", ErrorKind::Transient, 2);

    let report = h.orchestrator.process_file(&path).await.unwrap();

    assert!(matches!(report.disposition, Disposition::Completed { .. }));
    assert_eq!(report.attempts(Stage::Upload), 3);
    assert_eq!(h.uploader.calls(), 3);
}

#[tokio::test]
async fn test_quota_retried_once() {
    let h = Harness::new().await;
    let path = h.input("paper lantern.zip").await;
    h.publisher.fail("paper lantern", ErrorKind::QuotaExceeded, u32::MAX);

    let report = h.orchestrator.process_file(&path).await.unwrap();

    assert_eq!(report.attempts(Stage::Publish), 2);
    match report.disposition {
        Disposition::Failed { error, recorded } => {
            assert!(recorded);
            assert_eq!(error.kind, ErrorKind::QuotaExceeded);
            assert_eq!(error.stage, Some(Stage::Publish));
        }
        other => panic!("expected failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_permanent_not_retried() {
    let h = Harness::new().await;
    let path = h.input("paper lantern.zip").await;
    h.uploader.fail("paper lantern", ErrorKind::Permanent, u32::MAX);

    let report = h.orchestrator.process_file(&path).await.unwrap();

    assert!(report.is_failed());
    assert_eq!(h.uploader.calls(), 1);
    assert_eq!(h.content.calls(), 0);
}

#[tokio::test]
async fn test_failed_file_retried_on_next_run() {
    let h = Harness::new().await;
    let path = h.input("paper lantern.zip").await;
    h.uploader.fail("paper lantern", ErrorKind::Auth, 1);

    let first = h.orchestrator.process_file(&path).await.unwrap();
    assert!(first.is_failed());

    let second = h.orchestrator.process_file(&path).await.unwrap();
    assert!(matches!(second.disposition, Disposition::Completed { .. }));

    let identity = second.identity.unwrap();
    assert!(h.store.is_done(&identity).await);
    assert!(h.store.failed_record(&identity).await.is_none());
    assert_eq!(h.store.get(&identity).await.unwrap().attempts, 2);
}

#[tokio::test]
async fn test_skip_failed_leaves_file_alone() {
    let h = Harness::new().await;
    let path = h.input("paper lantern.zip").await;
    h.uploader.fail("paper lantern", ErrorKind::Auth, 1);
    h.orchestrator.process_file(&path).await.unwrap();

    let skipping = h.orchestrator_with(OrchestratorOptions {
        previously_failed: PreviouslyFailed::Skip,
        ..Default::default()
    });
    let identity = FileIdentity::from_path(&path).await.unwrap();
    assert_eq!(skipping.plan(&identity).await, PlannedAction::SkipFailed);

    let report = skipping.process_file(&path).await.unwrap();
    assert_eq!(report.disposition, Disposition::SkippedFailed);
    assert_eq!(h.uploader.calls(), 1);
}

#[tokio::test]
async fn test_force_reprocesses_completed_file() {
    let h = Harness::new().await;
    let path = h.input("paper lantern.zip").await;
    h.orchestrator.process_file(&path).await.unwrap();
    assert_eq!(h.publisher.calls(), 1);

    let forced = h.orchestrator_with(OrchestratorOptions {
        force: true,
        ..Default::default()
    });
    let identity = FileIdentity::from_path(&path).await.unwrap();
    assert_eq!(forced.plan(&identity).await, PlannedAction::Reprocess);

    let report = forced.process_file(&path).await.unwrap();
    assert!(matches!(report.disposition, Disposition::Completed { .. }));
    assert_eq!(h.publisher.calls(), 2);

    // Force clears first, so the attempt count starts over
    assert_eq!(h.store.get(&identity).await.unwrap().attempts, 1);
}

#[tokio::test]
async fn test_renamed_file_keeps_identity() {
    let h = Harness::new().await;
    let path = h.input("paper lantern.zip").await;
    h.orchestrator.process_file(&path).await.unwrap();

    let renamed = h.inputs.join("paper lantern v2.zip");
    tokio::fs::rename(&path, &renamed).await.unwrap();

    let report = h.orchestrator.process_file(&renamed).await.unwrap();
    assert_eq!(report.disposition, Disposition::SkippedDone);
    assert_eq!(h.uploader.calls(), 1);
}

#[tokio::test]
async fn test_placeholder_subject_rejected_before_upload() {
    let h = Harness::new().await;
    let path = h.input("untitled 3.zip").await;

    let report = h.orchestrator.process_file(&path).await.unwrap();

    match &report.disposition {
        Disposition::Failed { error, recorded } => {
            assert!(*recorded);
            assert_eq!(error.kind, ErrorKind::Permanent);
            assert_eq!(error.stage, None);
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert!(report.stages.is_empty());
    assert_eq!(h.uploader.calls(), 0);
}

#[tokio::test]
async fn test_missing_file_is_not_recorded() {
    let h = Harness::new().await;
    let path = h.inputs.join("paper ghost.zip");

    let report = h.orchestrator.process_file(&path).await.unwrap();

    assert!(report.identity.is_none());
    assert!(matches!(
        report.disposition,
        Disposition::Failed { recorded: false, .. }
    ));
    assert_eq!(h.store.stats().await.total(), 0);
}

#[tokio::test]
async fn test_cancelled_file_recorded_as_cancelled() {
    let h = Harness::new().await;
    let path = h.input("paper lantern.zip").await;
    h.uploader.fail("paper lantern", ErrorKind::Transient, u32::MAX);

    h.orchestrator.cancellation_token().cancel();
    let report = h.orchestrator.process_file(&path).await.unwrap();

    match report.disposition {
        Disposition::Failed { error, recorded } => {
            assert!(recorded);
            assert_eq!(error.kind, ErrorKind::Cancelled);
        }
        other => panic!("expected cancellation, got {:?}", other),
    }
    assert_eq!(h.uploader.calls(), 0);

    let identity = report.identity.unwrap();
    assert!(h.store.failed_record(&identity).await.is_some());
}

#[tokio::test]
async fn test_cancel_during_failing_call_stops_retries() {
    let h = Harness::new().await;
    let path = h.input("paper lantern.zip").await;
    h.uploader.fail("paper lantern", ErrorKind::Transient, u32::MAX);
    h.uploader
        .cancel_during_call(h.orchestrator.cancellation_token());

    let report = h.orchestrator.process_file(&path).await.unwrap();

    match &report.disposition {
        Disposition::Failed { error, recorded } => {
            assert!(recorded);
            assert_eq!(error.kind, ErrorKind::Cancelled);
            assert_eq!(error.stage, Some(Stage::Upload));
        }
        other => panic!("expected cancellation, got {:?}", other),
    }
    assert_eq!(h.uploader.calls(), 1);
    assert_eq!(report.attempts(Stage::Upload), 1);
    assert_eq!(h.content.calls(), 0);

    let record = h
        .store
        .failed_record(report.identity.as_ref().unwrap())
        .await
        .unwrap();
    assert_eq!(record.last_error.unwrap().kind, ErrorKind::Cancelled);
}

#[tokio::test]
async fn test_cancel_during_backoff_ends_file_promptly() {
    let h = Harness::new().await;
    let path = h.input("paper lantern.zip").await;
    h.uploader.fail("paper lantern", ErrorKind::Transient, u32::MAX);

    let slow = RetryPolicy {
        max_attempts: 3,
        initial_delay_ms: 60_000,
        max_delay_ms: 60_000,
        backoff_multiplier: 1.0,
        quota_delay_ms: 60_000,
    };
    let orchestrator = h.orchestrator_with_retry(OrchestratorOptions::default(), slow);
    let cancel = orchestrator.cancellation_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let report = tokio::time::timeout(Duration::from_secs(10), orchestrator.process_file(&path))
        .await
        .expect("backoff was not interrupted")
        .unwrap();

    match report.disposition {
        Disposition::Failed { error, recorded } => {
            assert!(recorded);
            assert_eq!(error.kind, ErrorKind::Cancelled);
        }
        other => panic!("expected cancellation, got {:?}", other),
    }
    assert_eq!(h.uploader.calls(), 1);
    assert!(h
        .store
        .failed_record(report.identity.as_ref().unwrap())
        .await
        .is_some());
}
