//! End-to-end import runs over a temporary snapshot directory
//!
//! Each test gets its own SQLite file and snapshot directory.

mod helpers;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use dvp_import::models::CheckpointStatus;
use dvp_import::{CheckpointStore, HaltReason, ImportError, ImportSettings, RunOutcome};
use helpers::{
    small_settings, snapshot_row, AuditingCheckpointStore, FailingRecordStore,
    RecordingRecordStore, TestEnv, SNAPSHOT_HEADER,
};

// ============================================================================
// Full runs
// ============================================================================

#[tokio::test]
async fn test_two_files_import_and_complete() {
    let env = TestEnv::new().await;
    env.write_snapshot("2023-01-01.csv", 10);
    env.write_snapshot("2023-01-02.csv", 5);

    let summary = env
        .orchestrator(ImportSettings::default())
        .run(&env.data_dir, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.outcome, RunOutcome::Finished);
    assert_eq!(summary.files_total, 2);
    assert_eq!(summary.start_index, 0);
    assert_eq!(summary.files_completed, vec!["2023-01-01.csv", "2023-01-02.csv"]);

    assert_eq!(env.stored("2023-01-01").await, 10);
    assert_eq!(env.stored("2023-01-02").await, 5);

    for file_name in ["2023-01-01.csv", "2023-01-02.csv"] {
        let checkpoint = env.checkpoints.get_checkpoint(file_name).await.unwrap().unwrap();
        assert_eq!(checkpoint.status, CheckpointStatus::Completed);
        assert!(checkpoint.completion_time.is_some());
    }

    // Metrics come from the catalogue names, not the CSV headers
    let records = env
        .records
        .fetch_for_date(helpers::parse_date("2023-01-02"))
        .await
        .unwrap();
    let first = &records[0];
    assert_eq!(first.delegate_id, "0xd0");
    assert_eq!(first.voting_power.get("vp"), Some(&0.5));
    assert_eq!(first.voting_power.get("th_vp"), Some(&0.0));
    assert_eq!(first.voting_power.get("ch_vp_r2"), Some(&0.0));
}

#[tokio::test]
async fn test_second_run_changes_nothing() {
    let env = TestEnv::new().await;
    env.write_snapshot("2023-01-01.csv", 10);
    env.write_snapshot("2023-01-02.csv", 5);

    let orchestrator = env.orchestrator(ImportSettings::default());
    orchestrator
        .run(&env.data_dir, &CancellationToken::new())
        .await
        .unwrap();

    let before_01 = env.checkpoints.get_checkpoint("2023-01-01.csv").await.unwrap();
    let before_02 = env.checkpoints.get_checkpoint("2023-01-02.csv").await.unwrap();

    let summary = orchestrator
        .run(&env.data_dir, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.outcome, RunOutcome::Finished);
    assert_eq!(summary.start_index, 2);
    assert!(summary.files_completed.is_empty());

    assert_eq!(
        env.checkpoints.get_checkpoint("2023-01-01.csv").await.unwrap(),
        before_01
    );
    assert_eq!(
        env.checkpoints.get_checkpoint("2023-01-02.csv").await.unwrap(),
        before_02
    );
    assert_eq!(env.stored("2023-01-01").await, 10);
    assert_eq!(env.stored("2023-01-02").await, 5);
}

#[tokio::test]
async fn test_reimport_without_checkpoints_creates_no_duplicates() {
    let env = TestEnv::new().await;
    env.write_snapshot("2023-01-01.csv", 10);
    env.write_snapshot("2023-01-02.csv", 5);

    let orchestrator = env.orchestrator(ImportSettings::default());
    orchestrator
        .run(&env.data_dir, &CancellationToken::new())
        .await
        .unwrap();

    sqlx::query("DELETE FROM import_checkpoints")
        .execute(&env.pool)
        .await
        .unwrap();

    let summary = orchestrator
        .run(&env.data_dir, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.outcome, RunOutcome::Finished);
    assert_eq!(summary.files_completed.len(), 2);

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM delegate_voting_power")
        .fetch_one(&env.pool)
        .await
        .unwrap();
    assert_eq!(total, 15);
}

#[tokio::test]
async fn test_small_batches_with_misaligned_cadence() {
    let env = TestEnv::new().await;
    env.write_snapshot("2023-01-01.csv", 10);

    let summary = env
        .orchestrator(small_settings())
        .run(&env.data_dir, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.outcome, RunOutcome::Finished);
    assert_eq!(env.stored("2023-01-01").await, 10);

    let checkpoint = env.checkpoints.get_checkpoint("2023-01-01.csv").await.unwrap().unwrap();
    assert!(checkpoint.is_completed());
    assert_eq!(checkpoint.total_records, Some(10));
    assert!(checkpoint.position <= 10);
}

#[tokio::test]
async fn test_cadence_checkpoints_track_batches() {
    let env = TestEnv::new().await;
    env.write_snapshot("2023-01-01.csv", 10);

    let settings = ImportSettings::new(3, 3).unwrap();
    env.orchestrator(settings)
        .run(&env.data_dir, &CancellationToken::new())
        .await
        .unwrap();

    // Last cadence point reached was raw row 9, after 9 records landed
    let checkpoint = env.checkpoints.get_checkpoint("2023-01-01.csv").await.unwrap().unwrap();
    assert!(checkpoint.is_completed());
    assert_eq!(checkpoint.position, 9);
}

#[tokio::test]
async fn test_empty_snapshot_completes() {
    let env = TestEnv::new().await;
    env.write_raw("2023-01-01.csv", SNAPSHOT_HEADER, &[]);

    let summary = env
        .orchestrator(ImportSettings::default())
        .run(&env.data_dir, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.outcome, RunOutcome::Finished);
    assert_eq!(summary.files_completed, vec!["2023-01-01.csv"]);
    let checkpoint = env.checkpoints.get_checkpoint("2023-01-01.csv").await.unwrap().unwrap();
    assert_eq!(checkpoint.total_records, Some(0));
}

#[tokio::test]
async fn test_non_snapshot_files_are_ignored() {
    let env = TestEnv::new().await;
    env.write_snapshot("2023-01-01.csv", 3);
    env.write_snapshot("notes.csv", 3);
    std::fs::write(env.data_dir.join("2023-01-02.txt"), "not a snapshot").unwrap();

    let summary = env
        .orchestrator(ImportSettings::default())
        .run(&env.data_dir, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.files_total, 1);
    assert_eq!(summary.files_completed, vec!["2023-01-01.csv"]);
    assert!(env.checkpoints.get_checkpoint("notes.csv").await.unwrap().is_none());
}

#[tokio::test]
async fn test_missing_directory_is_an_error() {
    let env = TestEnv::new().await;

    let result = env
        .orchestrator(ImportSettings::default())
        .run(&env.data_dir.join("nope"), &CancellationToken::new())
        .await;

    assert!(matches!(result, Err(ImportError::DirectoryNotFound(_))));
}

// ============================================================================
// Checkpoint cadence
// ============================================================================

/// Row `i` of a snapshot where every fourth row maps to nothing
fn mixed_row(i: usize) -> String {
    if i % 4 == 3 {
        format!("0xd{},n/a,,0,7", i)
    } else {
        snapshot_row(i)
    }
}

#[tokio::test]
async fn test_cadence_check_ends_batch_early() {
    let env = TestEnv::new().await;
    env.write_snapshot("2023-01-01.csv", 17);

    let records = Arc::new(RecordingRecordStore::new(env.records.clone()));
    let checkpoints = Arc::new(AuditingCheckpointStore::new(
        env.checkpoints.clone(),
        env.records.clone(),
    ));
    let orchestrator =
        dvp_import::ImportOrchestrator::new(records.clone(), checkpoints.clone(), small_settings());

    let summary = orchestrator
        .run(&env.data_dir, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.outcome, RunOutcome::Finished);
    assert_eq!(env.stored("2023-01-01").await, 17);

    // Rows 3, 6, 9, 12 and 15 are cadence points reached before the rows
    // ahead of them were written, so each of those batches stops there
    assert_eq!(records.batch_sizes(), vec![4, 3, 3, 3, 3, 1]);

    // Only the file-start write and the row-0 cadence point were verifiable
    assert_eq!(checkpoints.progress_writes(), vec![0, 0]);
    assert!(checkpoints.overclaims().is_empty());
}

#[tokio::test]
async fn test_progress_never_claims_more_than_stored() {
    let settings = [(4, 3), (3, 3), (2, 5), (5, 2), (1, 1), (7, 4)];

    for (batch_size, checkpoint_interval) in settings {
        let settings = ImportSettings::new(batch_size, checkpoint_interval).unwrap();

        let env = TestEnv::new().await;
        let rows: Vec<String> = (0..23).map(mixed_row).collect();
        env.write_raw("2023-01-01.csv", SNAPSHOT_HEADER, &rows);

        let checkpoints = Arc::new(AuditingCheckpointStore::new(
            env.checkpoints.clone(),
            env.records.clone(),
        ));
        let orchestrator =
            dvp_import::ImportOrchestrator::new(env.records.clone(), checkpoints.clone(), settings);

        let summary = orchestrator
            .run(&env.data_dir, &CancellationToken::new())
            .await
            .unwrap();
        assert!(
            matches!(
                summary.outcome,
                RunOutcome::Halted {
                    reason: HaltReason::Incomplete { .. },
                    ..
                }
            ),
            "batch_size={} interval={}: {:?}",
            batch_size,
            checkpoint_interval,
            summary.outcome
        );
        let overclaims = checkpoints.overclaims();
        assert!(
            overclaims.is_empty(),
            "batch_size={} interval={}: {:?}",
            batch_size,
            checkpoint_interval,
            overclaims
        );

        let env = TestEnv::new().await;
        env.write_snapshot("2023-01-01.csv", 17);

        let checkpoints = Arc::new(AuditingCheckpointStore::new(
            env.checkpoints.clone(),
            env.records.clone(),
        ));
        let orchestrator =
            dvp_import::ImportOrchestrator::new(env.records.clone(), checkpoints.clone(), settings);

        let summary = orchestrator
            .run(&env.data_dir, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.outcome, RunOutcome::Finished);
        assert_eq!(env.stored("2023-01-01").await, 17);
        assert!(!checkpoints.progress_writes().is_empty());
        let overclaims = checkpoints.overclaims();
        assert!(
            overclaims.is_empty(),
            "batch_size={} interval={}: {:?}",
            batch_size,
            checkpoint_interval,
            overclaims
        );
    }
}

// ============================================================================
// Halting
// ============================================================================

#[tokio::test]
async fn test_unmappable_row_halts_before_next_file() {
    let env = TestEnv::new().await;
    let rows = vec![
        snapshot_row(0),
        "0xd1,n/a,,0,7".to_string(),
        snapshot_row(2),
    ];
    env.write_raw("2023-01-01.csv", SNAPSHOT_HEADER, &rows);
    env.write_snapshot("2023-01-02.csv", 5);

    let orchestrator = env.orchestrator(ImportSettings::default());
    let summary = orchestrator
        .run(&env.data_dir, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        summary.outcome,
        RunOutcome::Halted {
            file_name: "2023-01-01.csv".to_string(),
            reason: HaltReason::Incomplete {
                stored: 2,
                total_records: 3,
            },
        }
    );
    assert!(summary.files_completed.is_empty());

    let checkpoint = env.checkpoints.get_checkpoint("2023-01-01.csv").await.unwrap().unwrap();
    assert_eq!(checkpoint.status, CheckpointStatus::InProgress);
    assert_eq!(env.stored("2023-01-02").await, 0);
    assert!(env.checkpoints.get_checkpoint("2023-01-02.csv").await.unwrap().is_none());

    // Fails closed on every later run too
    let summary = orchestrator
        .run(&env.data_dir, &CancellationToken::new())
        .await
        .unwrap();
    assert!(matches!(summary.outcome, RunOutcome::Halted { .. }));
    assert_eq!(env.stored("2023-01-02").await, 0);
}

#[tokio::test]
async fn test_rejected_writes_halt_without_advancing() {
    let env = TestEnv::new().await;
    env.write_snapshot("2023-01-01.csv", 5);
    env.write_snapshot("2023-01-02.csv", 5);

    let failing = FailingRecordStore::new(env.records.clone(), &["0xd2"]);
    let orchestrator = dvp_import::ImportOrchestrator::new(
        Arc::new(failing),
        env.checkpoints.clone(),
        ImportSettings::default(),
    );

    let summary = orchestrator
        .run(&env.data_dir, &CancellationToken::new())
        .await
        .unwrap();

    match summary.outcome {
        RunOutcome::Halted { file_name, reason } => {
            assert_eq!(file_name, "2023-01-01.csv");
            assert!(matches!(reason, HaltReason::Failed(ref m) if m.contains("0xd2")));
        }
        other => panic!("expected halt, got {:?}", other),
    }

    // Unordered batch: the other records landed, the checkpoint did not move
    assert_eq!(env.stored("2023-01-01").await, 4);
    let checkpoint = env.checkpoints.get_checkpoint("2023-01-01.csv").await.unwrap().unwrap();
    assert_eq!(checkpoint.status, CheckpointStatus::InProgress);
    assert_eq!(checkpoint.position, 0);
    assert_eq!(env.stored("2023-01-02").await, 0);
}

#[tokio::test]
async fn test_missing_delegate_column_halts() {
    let env = TestEnv::new().await;
    env.write_raw(
        "2023-01-01.csv",
        "holder,voting_power",
        &["0xd0,1.0".to_string()],
    );

    let summary = env
        .orchestrator(ImportSettings::default())
        .run(&env.data_dir, &CancellationToken::new())
        .await
        .unwrap();

    match summary.outcome {
        RunOutcome::Halted { reason, .. } => {
            assert!(matches!(reason, HaltReason::Failed(ref m) if m.contains("delegate")));
        }
        other => panic!("expected halt, got {:?}", other),
    }
    assert_eq!(env.stored("2023-01-01").await, 0);
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn test_cancelled_run_writes_nothing() {
    let env = TestEnv::new().await;
    env.write_snapshot("2023-01-01.csv", 10);

    let cancel = CancellationToken::new();
    cancel.cancel();

    let summary = env
        .orchestrator(ImportSettings::default())
        .run(&env.data_dir, &cancel)
        .await
        .unwrap();

    assert_eq!(summary.outcome, RunOutcome::Cancelled);
    assert!(summary.files_completed.is_empty());
    assert_eq!(env.stored("2023-01-01").await, 0);

    // Next run picks the file up normally
    let summary = env
        .orchestrator(ImportSettings::default())
        .run(&env.data_dir, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.outcome, RunOutcome::Finished);
    assert_eq!(env.stored("2023-01-01").await, 10);
}
