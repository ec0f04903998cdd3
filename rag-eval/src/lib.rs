//! # rag-eval
//!
//! Evaluation framework for retrieval-augmented generation services.
//!
//! ## Overview
//!
//! `rag-eval` measures how well a RAG service answers a dataset of
//! questions:
//!
//! - **Datasets**: JSON, JSON Lines or YAML files, including grouped
//!   multi-turn conversations
//! - **Answer stage**: query the service ([`QueryRunner`]), generate answers
//!   with an LLM ([`AnswerGenerator`]), or score answers already in the file
//! - **Metrics**: lexical overlap, embedding similarity, LLM-as-judge and
//!   verification scripts, selected by name through [`MetricRegistry`]
//! - **Reports**: per-record scores with per-metric statistics, as JSON and CSV
//!
//! ## Architecture
//!
//! ```text
//! rag-eval-core (upstream clients, providers, retry)
//!     ↓
//! rag-eval (datasets, metrics, engine, driver)  ← this crate
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use rag_eval::{Driver, FileDataset, MetricBackends, MetricRegistry, QueryConfig, QueryRunner, RunMetadata};
//! use rag_eval_core::{RagClientConfig, RagHttpClient};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = RagHttpClient::new(RagClientConfig::new("http://localhost:8080"))?;
//! let runner = QueryRunner::new(Arc::new(client), QueryConfig::default());
//!
//! let metrics = MetricRegistry::with_builtins()
//!     .build_set(&["contains", "rouge_l"], &MetricBackends::default())?;
//!
//! let driver = Driver::new(Arc::new(runner), metrics, Default::default());
//! let report = driver
//!     .run(&FileDataset::new("questions.yaml"), RunMetadata::new("questions"))
//!     .await?;
//!
//! report.print_summary();
//! report.write_json(std::path::Path::new("report.json"))?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Custom Metrics
//!
//! Implement the [`Metric`] trait and add it to a [`MetricSet`]:
//!
//! ```
//! use async_trait::async_trait;
//! use rag_eval::{EvaluationExample, ExampleField, Metric, MetricScore, MetricSet, ScoreError};
//!
//! struct NonEmpty;
//!
//! #[async_trait]
//! impl Metric for NonEmpty {
//!     fn name(&self) -> &str {
//!         "non_empty"
//!     }
//!
//!     fn required_fields(&self) -> &[ExampleField] {
//!         &[ExampleField::GeneratedAnswer]
//!     }
//!
//!     async fn score(&self, _example: &EvaluationExample) -> Result<MetricScore, ScoreError> {
//!         Ok(MetricScore::new(1.0))
//!     }
//! }
//!
//! let mut metrics = MetricSet::default();
//! metrics.add(NonEmpty);
//! assert!(metrics.get("non_empty").is_some());
//! ```

pub mod answer;
pub mod config;
pub mod dataset;
pub mod driver;
pub mod engine;
pub mod example;
pub mod generate;
pub mod metrics;
pub mod query;
pub mod report;
pub mod script;

// Re-export public API
pub use answer::{answer_all, answer_stream, AnswerOutcome, Answerer, ProvidedAnswers};
pub use config::{ConfigError, ConfigLoader, FileConfig};
pub use dataset::{
    parse_examples, save_examples, Dataset, DatasetError, DatasetFormat, FileDataset,
    InMemoryDataset,
};
pub use driver::{Driver, DriverConfig, EvalError, EvalProgress};
pub use engine::{EngineConfig, MetricsEngine};
pub use example::{EvaluationExample, ExampleField};
pub use generate::AnswerGenerator;
pub use metrics::{
    AnswerCorrectness, AnswerSimilarity, Contains, ContextRelevance, ExactMatch, Faithfulness,
    KeywordMatch, Metric, MetricBackends, MetricRegistry, MetricScore, MetricSet, RegistryError,
    RougeL, RougeN, ScoreError, ScriptVerification,
};
pub use query::{QueryConfig, QueryRunner};
pub use report::{
    print_comparison, target_dir, ExampleFailure, FailureStage, MetricSummary, RunMetadata,
    RunReport, ScoreRecord, Status, StatusCounts,
};
pub use script::{ScriptError, ScriptOutput, ScriptRunner};
