//! Integration tests for the evaluation Driver.
//!
//! The RAG service is mocked in-process; script tests need a Unix shell.

mod common;

use common::{count_status, fast_retries, questions, records_for};
use rag_eval::{
    Contains, Driver, DriverConfig, EngineConfig, FailureStage, MetricSet, QueryConfig,
    QueryRunner, RunMetadata, Status,
};
use rag_eval_core::mock::MockRagService;
use rag_eval_core::{RagAnswer, RagQuery, UpstreamError};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn query_runner(service: Arc<MockRagService>, concurrency: usize) -> Arc<QueryRunner> {
    Arc::new(QueryRunner::new(
        service,
        QueryConfig::default()
            .with_concurrency(concurrency)
            .with_retry_policy(fast_retries(1)),
    ))
}

#[tokio::test]
async fn test_rag_answers_are_scored() {
    let service = Arc::new(MockRagService::echo());
    let driver = Driver::new(
        query_runner(service.clone(), 3),
        MetricSet::default(),
        EngineConfig::default(),
    )
    .with_config(DriverConfig::default().with_concurrency(3));

    let report = driver
        .run_examples(questions(6), RunMetadata::new("echo"))
        .await;

    assert_eq!(service.calls(), 6);
    assert_eq!(report.total_examples, 6);
    assert_eq!(report.records.len(), 6 * 5);
    assert_eq!(report.totals.passed, 30);
    assert!(report.failures.is_empty());
    assert!(!report.metadata.cancelled);

    // Records come back in dataset order
    let indices: Vec<usize> = report.records.iter().map(|r| r.example_index).collect();
    let mut sorted = indices.clone();
    sorted.sort();
    assert_eq!(indices, sorted);
}

#[tokio::test]
async fn test_answer_failure_is_isolated() {
    let service = Arc::new(MockRagService::new(|query: &RagQuery, _| {
        if query.question == "question 2" {
            Err(UpstreamError::Auth("token rejected".into()))
        } else {
            Ok(RagAnswer::new(format!("Answer: {}", query.question)))
        }
    }));
    let driver = Driver::new(
        query_runner(service.clone(), 2),
        MetricSet::default(),
        EngineConfig::default(),
    );

    let report = driver
        .run_examples(questions(4), RunMetadata::new("isolated"))
        .await;

    // Auth errors are not retried
    assert_eq!(service.calls(), 4);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].example_index, 2);
    assert_eq!(report.failures[0].stage, FailureStage::Answer);

    let failed = records_for(&report, 2);
    assert_eq!(failed.len(), 5);
    for record in failed {
        assert_eq!(record.status, Status::Error);
        assert!(record
            .reason
            .as_deref()
            .unwrap()
            .starts_with("answer failed:"));
    }
    assert_eq!(count_status(&report, Status::Pass), 3 * 5);
}

#[tokio::test]
async fn test_cancellation_keeps_partial_results() {
    let service = Arc::new(MockRagService::echo().with_latency(Duration::from_millis(50)));
    let token = CancellationToken::new();
    let driver = Driver::new(
        query_runner(service.clone(), 2),
        MetricSet::new(vec![Arc::new(Contains)]),
        EngineConfig::default(),
    )
    .with_config(DriverConfig::default().with_concurrency(2))
    .with_cancellation(token.clone());

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(130)).await;
        token.cancel();
    });

    let report = driver
        .run_examples(questions(20), RunMetadata::new("cancel"))
        .await;
    canceller.await.unwrap();

    assert!(report.metadata.cancelled);
    assert_eq!(report.total_examples, 20);
    assert!(service.calls() < 20);

    let scored: HashSet<usize> = report.records.iter().map(|r| r.example_index).collect();
    let cancelled: HashSet<usize> = report
        .failures
        .iter()
        .filter(|f| f.stage == FailureStage::Cancelled)
        .map(|f| f.example_index)
        .collect();
    assert!(!cancelled.is_empty());
    assert!(scored.is_disjoint(&cancelled));
    assert_eq!(scored.len() + cancelled.len(), 20);

    // Everything scored before the cancel is kept
    assert!(report.records.iter().all(|r| r.status == Status::Pass));
}

#[cfg(unix)]
mod scripts {
    use super::*;
    use common::write_script;
    use rag_eval::{FileDataset, ScriptRunner};
    use std::sync::Mutex;

    const DATASET: &str = r#"
- conversation_group: deploy
  setup_script: setup.sh
  cleanup_script: cleanup.sh
  conversation:
    - eval_id: first
      query: Is the deployment ready?
      expected_response: setup seen
    - eval_id: second
      query: Anything else?
      expected_response: setup seen
"#;

    fn marker_service(dir: std::path::PathBuf) -> Arc<MockRagService> {
        Arc::new(MockRagService::new(move |_: &RagQuery, _| {
            let text = if dir.join("setup_ran").exists() {
                "setup seen"
            } else {
                "setup missing"
            };
            Ok(RagAnswer::new(text))
        }))
    }

    #[tokio::test]
    async fn test_group_scripts_wrap_the_conversation() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "setup.sh", "touch setup_ran");
        write_script(dir.path(), "cleanup.sh", "touch cleanup_ran");
        let dataset_path = dir.path().join("dataset.yaml");
        std::fs::write(&dataset_path, DATASET).unwrap();

        let driver = Driver::new(
            query_runner(marker_service(dir.path().to_path_buf()), 1),
            MetricSet::new(vec![Arc::new(Contains)]),
            EngineConfig::default(),
        )
        .with_config(
            DriverConfig::default()
                .with_concurrency(1)
                .with_scripts(ScriptRunner::new().with_timeout(Duration::from_secs(10))),
        );

        let report = driver
            .run(&FileDataset::new(&dataset_path), RunMetadata::new("deploy"))
            .await
            .unwrap();

        assert!(dir.path().join("setup_ran").exists());
        assert!(dir.path().join("cleanup_ran").exists());
        assert!(report.failures.is_empty());
        assert_eq!(report.totals.passed, 2);
        assert_eq!(report.by_group["deploy"].passed, 2);
    }

    #[tokio::test]
    async fn test_failing_setup_fails_the_whole_conversation() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "setup.sh", "echo 'cluster unreachable' >&2\nexit 3");
        write_script(dir.path(), "cleanup.sh", "touch cleanup_ran");
        let dataset_path = dir.path().join("dataset.yaml");
        std::fs::write(&dataset_path, DATASET).unwrap();

        let service = marker_service(dir.path().to_path_buf());
        let driver = Driver::new(
            query_runner(service.clone(), 1),
            MetricSet::new(vec![Arc::new(Contains)]),
            EngineConfig::default(),
        )
        .with_config(DriverConfig::default().with_concurrency(1));

        let report = driver
            .run(&FileDataset::new(&dataset_path), RunMetadata::new("deploy"))
            .await
            .unwrap();

        // Neither turn reached the service
        assert_eq!(service.calls(), 0);
        assert_eq!(report.failures.len(), 2);
        assert!(report
            .failures
            .iter()
            .all(|f| f.stage == FailureStage::Setup));
        let ids: HashSet<_> = report
            .failures
            .iter()
            .filter_map(|f| f.example_id.as_deref())
            .collect();
        assert_eq!(ids, HashSet::from(["first", "second"]));

        for index in 0..2 {
            let records = records_for(&report, index);
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].status, Status::Error);
            assert!(records[0]
                .reason
                .as_deref()
                .unwrap()
                .starts_with("setup failed:"));
        }

        // Setup was attempted, so cleanup still runs
        assert!(dir.path().join("cleanup_ran").exists());
    }

    const MIXED_DATASET: &str = r#"
- conversation_group: deploy
  setup_script: setup.sh
  cleanup_script: cleanup.sh
  conversation:
    - query: turn one
      expected_response: setup seen
    - query: turn two
      expected_response: setup seen
    - query: turn three
      expected_response: setup seen
- query: standalone one
- query: standalone two
- query: standalone three
"#;

    /// What the service saw for one query.
    #[derive(Debug, Clone)]
    struct Seen {
        question: String,
        conversation_id: Option<String>,
        setup_done: bool,
        cleanup_done: bool,
    }

    fn recording_service(dir: std::path::PathBuf) -> (Arc<MockRagService>, Arc<Mutex<Vec<Seen>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        let service = MockRagService::new(move |query: &RagQuery, _| {
            let setup_done = dir.join("setup_ran").exists();
            log.lock().unwrap().push(Seen {
                question: query.question.clone(),
                conversation_id: query.conversation_id.clone(),
                setup_done,
                cleanup_done: dir.join("cleanup_ran").exists(),
            });
            Ok(RagAnswer::new(if setup_done {
                "setup seen"
            } else {
                "setup missing"
            }))
        });
        (Arc::new(service), seen)
    }

    #[tokio::test]
    async fn test_conversation_turns_run_in_order_at_default_concurrency() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "setup.sh", "sleep 0.3\ntouch setup_ran");
        write_script(dir.path(), "cleanup.sh", "touch cleanup_ran");
        let dataset_path = dir.path().join("dataset.yaml");
        std::fs::write(&dataset_path, MIXED_DATASET).unwrap();

        let (service, seen) = recording_service(dir.path().to_path_buf());
        let config = DriverConfig::default();
        assert_eq!(config.concurrency, 5);
        let driver = Driver::new(
            query_runner(service.clone(), config.concurrency),
            MetricSet::new(vec![Arc::new(Contains)]),
            EngineConfig::default(),
        )
        .with_config(config.with_scripts(ScriptRunner::new().with_timeout(Duration::from_secs(10))));

        let report = driver
            .run(&FileDataset::new(&dataset_path), RunMetadata::new("mixed"))
            .await
            .unwrap();

        assert_eq!(service.calls(), 6);
        assert!(report.failures.is_empty());
        assert_eq!(report.by_group["deploy"].passed, 3);
        assert!(dir.path().join("cleanup_ran").exists());

        let seen = seen.lock().unwrap().clone();
        let turns: Vec<&Seen> = seen
            .iter()
            .filter(|s| s.question.starts_with("turn"))
            .collect();
        let order: Vec<&str> = turns.iter().map(|s| s.question.as_str()).collect();
        assert_eq!(order, vec!["turn one", "turn two", "turn three"]);
        assert!(turns.iter().all(|s| s.setup_done && !s.cleanup_done));

        let conversation = turns[0].conversation_id.clone();
        assert!(conversation.is_some());
        assert!(turns.iter().all(|s| s.conversation_id == conversation));

        let standalone: Vec<&Seen> = seen
            .iter()
            .filter(|s| s.question.starts_with("standalone"))
            .collect();
        assert_eq!(standalone.len(), 3);
        assert!(standalone.iter().all(|s| s.conversation_id.is_none()));
    }

    #[tokio::test]
    async fn test_cancel_mid_conversation_still_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "setup.sh", "touch setup_ran");
        write_script(dir.path(), "cleanup.sh", "touch cleanup_ran");
        let dataset_path = dir.path().join("dataset.yaml");
        std::fs::write(&dataset_path, DATASET).unwrap();

        let service = Arc::new(
            MockRagService::new(|_: &RagQuery, _| Ok(RagAnswer::new("setup seen")))
                .with_latency(Duration::from_secs(2)),
        );
        let token = CancellationToken::new();
        let driver = Driver::new(
            query_runner(service.clone(), 5),
            MetricSet::new(vec![Arc::new(Contains)]),
            EngineConfig::default(),
        )
        .with_cancellation(token.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            token.cancel();
        });

        let report = driver
            .run(&FileDataset::new(&dataset_path), RunMetadata::new("deploy"))
            .await
            .unwrap();
        canceller.await.unwrap();

        assert!(dir.path().join("setup_ran").exists());
        assert!(dir.path().join("cleanup_ran").exists());
        assert!(report.is_cancelled());

        // The in-flight first turn was dropped and the second never started
        assert_eq!(service.calls(), 1);
        assert!(report.records.is_empty());
        assert_eq!(report.failures.len(), 2);
        assert!(report
            .failures
            .iter()
            .all(|f| f.stage == FailureStage::Cancelled));
    }
}
