//! End-to-end evaluation runs.
//!
//! The [`Driver`] loads a dataset, answers each example, scores it and
//! builds the [`RunReport`]. Answering and scoring overlap through a
//! bounded channel. Turns of one conversation are answered in order while
//! separate conversations run concurrently. A [`CancellationToken`] stops
//! the run early and the partial report is still returned.

use crate::answer::{AnswerOutcome, Answerer};
use crate::dataset::{Dataset, DatasetError};
use crate::engine::{EngineConfig, MetricsEngine};
use crate::example::EvaluationExample;
use crate::metrics::{MetricSet, RegistryError};
use crate::report::{ExampleFailure, FailureStage, RunMetadata, RunReport, ScoreRecord};
use crate::script::ScriptRunner;
use futures_util::future;
use futures_util::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Errors that abort a run before any example is evaluated.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EvalError {
    /// Failed to load dataset
    #[error("Dataset error: {0}")]
    Dataset(#[from] DatasetError),

    /// Requested metrics could not be built
    #[error("Metric error: {0}")]
    Metrics(#[from] RegistryError),

    /// Invalid run configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Progress events emitted during a run.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum EvalProgress {
    /// Dataset loaded, run starting.
    Started {
        /// Total number of examples.
        total: usize,
    },
    /// An example finished the answer stage (success or failure).
    ExampleAnswered {
        completed: usize,
        total: usize,
        success: bool,
    },
    /// An example finished scoring.
    ExampleScored {
        completed: usize,
        total: usize,
        /// Whether every metric produced a value.
        clean: bool,
    },
    /// The run was cancelled with examples left unscored.
    Cancelled {
        /// Examples recorded as cancelled.
        unfinished: usize,
    },
}

/// Configuration for a driver run.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct DriverConfig {
    /// Maximum examples in flight per stage (default: 5)
    pub concurrency: usize,

    /// Evaluate only the first N examples
    pub sample_size: Option<usize>,

    /// Runner for setup and cleanup scripts
    pub scripts: ScriptRunner,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            sample_size: None,
            scripts: ScriptRunner::default(),
        }
    }
}

impl DriverConfig {
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    #[must_use]
    pub fn with_sample_size(mut self, sample_size: usize) -> Self {
        self.sample_size = Some(sample_size);
        self
    }

    #[must_use]
    pub fn with_scripts(mut self, scripts: ScriptRunner) -> Self {
        self.scripts = scripts;
        self
    }
}

/// Orchestrates answer and scoring stages over a dataset.
///
/// # Example
///
/// ```no_run
/// use rag_eval::{Driver, EngineConfig, FileDataset, MetricSet, QueryConfig, QueryRunner, RunMetadata};
/// use rag_eval_core::{RagClientConfig, RagHttpClient};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = RagHttpClient::new(RagClientConfig::new("http://localhost:8080"))?;
/// let runner = QueryRunner::new(Arc::new(client), QueryConfig::default());
/// let driver = Driver::new(Arc::new(runner), MetricSet::default(), EngineConfig::default());
///
/// let dataset = FileDataset::new("questions.yaml");
/// let report = driver.run(&dataset, RunMetadata::new("questions")).await?;
/// report.print_summary();
/// # Ok(())
/// # }
/// ```
pub struct Driver {
    answerer: Arc<dyn Answerer>,
    metrics: MetricSet,
    engine: MetricsEngine,
    config: DriverConfig,
    cancellation: CancellationToken,
}

/// Everything the scoring stage produced for one example.
struct Scored {
    index: usize,
    records: Vec<ScoreRecord>,
    failure: Option<ExampleFailure>,
}

impl Driver {
    pub fn new(answerer: Arc<dyn Answerer>, metrics: MetricSet, engine: EngineConfig) -> Self {
        let concurrency = engine.concurrency;
        Self {
            answerer,
            metrics,
            engine: MetricsEngine::new(engine),
            config: DriverConfig::default().with_concurrency(concurrency),
            cancellation: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: DriverConfig) -> Self {
        self.config = config;
        self
    }

    /// Stop the run when `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Get the configuration.
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// The metrics this driver scores with.
    pub fn metrics(&self) -> &MetricSet {
        &self.metrics
    }

    /// Load the dataset and evaluate it.
    pub async fn run<D: Dataset>(
        &self,
        dataset: &D,
        metadata: RunMetadata,
    ) -> Result<RunReport, EvalError> {
        self.run_with_progress(dataset, metadata, |_| {}).await
    }

    /// Like [`Driver::run`], emitting [`EvalProgress`] events.
    pub async fn run_with_progress<D, F>(
        &self,
        dataset: &D,
        metadata: RunMetadata,
        on_progress: F,
    ) -> Result<RunReport, EvalError>
    where
        D: Dataset,
        F: Fn(EvalProgress) + Send + Sync,
    {
        let examples = dataset.load(self.config.sample_size).await?;
        log::info!("Loaded {} examples from {}", examples.len(), dataset.name());
        Ok(self
            .run_examples_with_progress(examples, metadata, on_progress)
            .await)
    }

    /// Evaluate examples that are already loaded.
    pub async fn run_examples(
        &self,
        examples: Vec<EvaluationExample>,
        metadata: RunMetadata,
    ) -> RunReport {
        self.run_examples_with_progress(examples, metadata, |_| {})
            .await
    }

    /// Like [`Driver::run_examples`], emitting [`EvalProgress`] events.
    pub async fn run_examples_with_progress<F>(
        &self,
        examples: Vec<EvaluationExample>,
        mut metadata: RunMetadata,
        on_progress: F,
    ) -> RunReport
    where
        F: Fn(EvalProgress) + Send + Sync,
    {
        let start = Instant::now();
        let total = examples.len();
        if total == 0 {
            log::info!("Dataset is empty, nothing to evaluate");
            return RunReport::empty(metadata);
        }

        on_progress(EvalProgress::Started { total });
        log::info!(
            "Evaluating {} examples with {} and {} metrics (concurrency: {})",
            total,
            self.answerer.name(),
            self.metrics.len(),
            self.config.concurrency
        );

        let roster = examples.clone();
        let concurrency = self.config.concurrency.max(1);
        let (tx, rx) = mpsc::channel::<AnswerOutcome>(2 * concurrency);

        // Conversations are the unit of concurrency; their turns run in order
        let producer = async {
            let tx = tx;
            let answered = AtomicUsize::new(0);
            stream::iter(conversations(examples))
                .take_while(|_| future::ready(!self.cancellation.is_cancelled()))
                .map(|turns| self.run_conversation(turns, &tx, &answered, total, &on_progress))
                .buffer_unordered(concurrency)
                .collect::<Vec<()>>()
                .await;
        };

        let consumer = async {
            let mut scored_count = 0;
            stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|o| (o, rx)) })
                .map(|outcome| self.score_outcome(outcome))
                .buffer_unordered(concurrency)
                .inspect(|scored| {
                    scored_count += 1;
                    on_progress(EvalProgress::ExampleScored {
                        completed: scored_count,
                        total,
                        clean: scored.failure.is_none()
                            && scored.records.iter().all(|r| !r.is_error()),
                    });
                })
                .collect::<Vec<Scored>>()
                .await
        };

        let ((), scored) = tokio::join!(producer, consumer);

        let mut seen = HashSet::with_capacity(scored.len());
        let mut records = Vec::new();
        let mut failures = Vec::new();
        for item in scored {
            seen.insert(item.index);
            records.extend(item.records);
            failures.extend(item.failure);
        }

        let cancelled = self.cancellation.is_cancelled();
        if cancelled {
            let unfinished: Vec<&EvaluationExample> =
                roster.iter().filter(|e| !seen.contains(&e.index)).collect();
            for example in &unfinished {
                failures.push(ExampleFailure::new(
                    example,
                    FailureStage::Cancelled,
                    "Run cancelled before the example was answered",
                ));
            }
            let unfinished_total = failures
                .iter()
                .filter(|f| f.stage == FailureStage::Cancelled)
                .count();
            log::warn!(
                "Run cancelled: {} of {} examples left unscored",
                unfinished_total,
                total
            );
            on_progress(EvalProgress::Cancelled {
                unfinished: unfinished_total,
            });
        }

        metadata.cancelled = cancelled;
        metadata.duration = start.elapsed();
        let report = RunReport::from_records(metadata, total, records, failures);
        log::info!(
            "Evaluation finished: {} passed, {} failed, {} errored",
            report.totals.passed,
            report.totals.failed,
            report.totals.errored
        );
        report
    }

    /// Answer the turns of one conversation in order.
    ///
    /// A failed setup fails the remaining turns without querying. Once any
    /// turn has started, the conversation's cleanup scripts run even when
    /// the run is cancelled.
    async fn run_conversation<F>(
        &self,
        turns: Vec<EvaluationExample>,
        tx: &mpsc::Sender<AnswerOutcome>,
        answered: &AtomicUsize,
        total: usize,
        on_progress: &F,
    ) where
        F: Fn(EvalProgress) + Send + Sync,
    {
        let cleanups: Vec<(String, PathBuf)> = turns
            .iter()
            .filter_map(|e| e.cleanup_script.clone().map(|s| (e.label(), s)))
            .collect();
        let mut started = false;
        let mut setup_failure: Option<String> = None;

        for example in turns {
            if self.cancellation.is_cancelled() {
                break;
            }
            let outcome = match &setup_failure {
                Some(message) => AnswerOutcome::failed(
                    example,
                    FailureStage::Setup,
                    message.clone(),
                    0,
                    Duration::ZERO,
                ),
                None => {
                    started = true;
                    tokio::select! {
                        biased;
                        _ = self.cancellation.cancelled() => break,
                        outcome = self.prepare_and_answer(example) => outcome,
                    }
                }
            };
            if let Some(failure) = &outcome.failure {
                if failure.stage == FailureStage::Setup && setup_failure.is_none() {
                    setup_failure = Some(failure.message.clone());
                }
            }

            on_progress(EvalProgress::ExampleAnswered {
                completed: answered.fetch_add(1, Ordering::Relaxed) + 1,
                total,
                success: outcome.is_success(),
            });
            if tx.send(outcome).await.is_err() {
                break;
            }
        }

        if !started {
            return;
        }
        for (label, script) in cleanups {
            if let Err(e) = self.config.scripts.run_checked(&script).await {
                log::warn!("Cleanup for {} failed: {}", label, e);
            }
        }
    }

    /// Run the setup script, if any, then answer.
    async fn prepare_and_answer(&self, example: EvaluationExample) -> AnswerOutcome {
        if let Some(script) = &example.setup_script {
            let start = Instant::now();
            if let Err(e) = self.config.scripts.run_checked(script).await {
                log::error!("Setup for {} failed: {}", example.label(), e);
                let message = format!("Setup script failed: {}", e);
                return AnswerOutcome::failed(
                    example,
                    FailureStage::Setup,
                    message,
                    0,
                    start.elapsed(),
                );
            }
        }
        self.answerer.answer(example).await
    }

    /// Score an answered example.
    async fn score_outcome(&self, outcome: AnswerOutcome) -> Scored {
        let AnswerOutcome {
            example, failure, ..
        } = outcome;

        let (records, failure) = if self.cancellation.is_cancelled() {
            let failure = ExampleFailure::new(
                &example,
                FailureStage::Cancelled,
                "Run cancelled before the example was scored",
            );
            (Vec::new(), Some(failure))
        } else if let Some(failure) = failure {
            let records = self.engine.failed_example(&failure, &example, &self.metrics);
            (records, Some(failure))
        } else {
            let records = self.engine.score_example(&example, &self.metrics).await;
            (records, None)
        };

        Scored {
            index: example.index,
            records,
            failure,
        }
    }
}

/// Split examples into conversations, in dataset order.
///
/// Examples sharing a conversation id form one conversation placed at its
/// first turn; every other example stands alone.
fn conversations(examples: Vec<EvaluationExample>) -> Vec<Vec<EvaluationExample>> {
    let mut units: Vec<Vec<EvaluationExample>> = Vec::with_capacity(examples.len());
    let mut positions: HashMap<String, usize> = HashMap::new();
    for example in examples {
        let Some(id) = example.conversation_id.clone() else {
            units.push(vec![example]);
            continue;
        };
        match positions.get(&id) {
            Some(&at) => units[at].push(example),
            None => {
                positions.insert(id, units.len());
                units.push(vec![example]);
            }
        }
    }
    units
}
