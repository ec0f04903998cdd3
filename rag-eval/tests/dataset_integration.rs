//! Answer-then-score through files: the query_rag output feeds a later
//! evaluation with the saved answers.

mod common;

use common::fast_retries;
use rag_eval::{
    answer_all, save_examples, Dataset, Driver, EngineConfig, FileDataset, MetricSet,
    ProvidedAnswers, QueryConfig, QueryRunner, RunMetadata, RunReport,
};
use rag_eval_core::mock::MockRagService;
use std::sync::Arc;

const QUESTIONS: &str = r#"[
  {"eval_id": "pods", "query": "What is a pod?", "expected_response": "Answer: What is a pod?"},
  {"eval_id": "svc", "query": "What is a service?", "expected_response": "Answer: What is a service?"},
  {"eval_id": "ns", "query": "What is a namespace?", "expected_response": "Something else entirely"}
]"#;

#[tokio::test]
async fn test_saved_answers_score_like_live_answers() {
    let dir = tempfile::tempdir().unwrap();
    let questions_path = dir.path().join("questions.json");
    std::fs::write(&questions_path, QUESTIONS).unwrap();

    let examples = FileDataset::new(&questions_path).load(None).await.unwrap();
    let runner = QueryRunner::new(
        Arc::new(MockRagService::echo()),
        QueryConfig::default().with_retry_policy(fast_retries(0)),
    );
    let outcomes = answer_all(&runner, examples, 2).await;
    assert!(outcomes.iter().all(|o| o.is_success()));

    let answered: Vec<_> = outcomes.into_iter().map(|o| o.example).collect();
    let answers_path = dir.path().join("out").join("questions_answers.json");
    save_examples(&answers_path, &answered).await.unwrap();

    let dataset = FileDataset::new(&answers_path);
    let reloaded = dataset.load(None).await.unwrap();
    assert_eq!(reloaded.len(), 3);
    assert_eq!(reloaded[0].id.as_deref(), Some("pods"));
    assert_eq!(reloaded[0].answer_text(), "Answer: What is a pod?");
    assert_eq!(reloaded[0].context(), ["Context for What is a pod?".to_string()]);

    let driver = Driver::new(
        Arc::new(ProvidedAnswers),
        MetricSet::default(),
        EngineConfig::default(),
    );
    let report = driver
        .run(&dataset, RunMetadata::new(dataset.name()))
        .await
        .unwrap();

    assert_eq!(report.metadata.dataset, "questions_answers");
    assert_eq!(report.total_examples, 3);
    assert_eq!(report.metrics["exact_match"].passed, 2);
    assert_eq!(report.metrics["exact_match"].failed, 1);

    // Reports round-trip through the written JSON
    let (json, csv) = report.write_to_dir(dir.path()).unwrap();
    assert!(csv.exists());
    let restored = RunReport::read_json(&json).unwrap();
    assert_eq!(restored.records.len(), report.records.len());
    assert_eq!(restored.totals, report.totals);
}

#[tokio::test]
async fn test_sampling_takes_leading_examples() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("questions.json");
    std::fs::write(&path, QUESTIONS).unwrap();

    let examples = FileDataset::new(&path).load(Some(2)).await.unwrap();
    let ids: Vec<_> = examples.iter().map(|e| e.id.as_deref()).collect();
    assert_eq!(ids, vec![Some("pods"), Some("svc")]);
}
