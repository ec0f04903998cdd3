//! The metrics engine: per-(example, metric) scoring with failure isolation.
//!
//! The engine never fails a run. Missing fields, metric errors and
//! out-of-range values all become ERROR records; transient backend errors
//! are retried first.

use crate::example::EvaluationExample;
use crate::metrics::{Metric, MetricSet, ScoreError};
use crate::report::{ExampleFailure, RunMetadata, RunReport, ScoreRecord};
use futures_util::stream::{self, StreamExt};
use rag_eval_core::{retry_with_backoff, RetryPolicy};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Configuration for scoring.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct EngineConfig {
    /// Maximum examples scored at once
    pub concurrency: usize,

    /// Backoff for retryable metric failures
    pub retry: RetryPolicy,

    /// Pass thresholds by metric name, overriding metric defaults
    pub thresholds: HashMap<String, f64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            retry: RetryPolicy::default(),
            thresholds: HashMap::new(),
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Override the pass threshold of one metric.
    #[must_use]
    pub fn with_threshold(mut self, metric: impl Into<String>, threshold: f64) -> Self {
        self.thresholds.insert(metric.into(), threshold);
        self
    }
}

/// Scores examples against a [`MetricSet`].
///
/// # Example
///
/// ```
/// use rag_eval::{EngineConfig, EvaluationExample, MetricSet, MetricsEngine, RunMetadata};
///
/// # async fn example() {
/// let engine = MetricsEngine::new(EngineConfig::default());
/// let examples = vec![EvaluationExample::new(0, "Capital of France?")
///     .with_reference("Paris")
///     .with_answer("Paris")];
///
/// let report = engine
///     .score(examples, &MetricSet::default(), RunMetadata::new("demo"))
///     .await;
/// assert_eq!(report.totals.errored, 0);
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MetricsEngine {
    config: EngineConfig,
}

impl MetricsEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Get the configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Threshold in effect for a metric.
    pub fn threshold_for(&self, metric: &dyn Metric) -> f64 {
        self.config
            .thresholds
            .get(metric.name())
            .copied()
            .unwrap_or_else(|| metric.default_threshold())
    }

    /// Score a batch and build the report.
    pub async fn score(
        &self,
        examples: Vec<EvaluationExample>,
        metrics: &MetricSet,
        metadata: RunMetadata,
    ) -> RunReport {
        self.score_with_progress(examples, metrics, metadata, |_, _, _| {})
            .await
    }

    /// Like [`MetricsEngine::score`], calling `on_progress(completed, total,
    /// clean)` after each example, where `clean` means no ERROR records.
    pub async fn score_with_progress<F>(
        &self,
        examples: Vec<EvaluationExample>,
        metrics: &MetricSet,
        mut metadata: RunMetadata,
        on_progress: F,
    ) -> RunReport
    where
        F: Fn(usize, usize, bool),
    {
        let start = Instant::now();
        let total = examples.len();
        if total == 0 {
            log::info!("No examples to score");
            return RunReport::empty(metadata);
        }

        log::info!(
            "Scoring {} examples with {} metrics (concurrency: {})",
            total,
            metrics.len(),
            self.config.concurrency
        );

        let mut completed = 0;
        let records: Vec<ScoreRecord> = stream::iter(examples.iter())
            .map(|example| self.score_example(example, metrics))
            .buffer_unordered(self.config.concurrency.max(1))
            .inspect(|records| {
                completed += 1;
                on_progress(completed, total, records.iter().all(|r| !r.is_error()));
            })
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .flatten()
            .collect();

        metadata.duration = start.elapsed();
        RunReport::from_records(metadata, total, records, Vec::new())
    }

    /// Score one example with every applicable metric, in set order.
    pub async fn score_example(
        &self,
        example: &EvaluationExample,
        metrics: &MetricSet,
    ) -> Vec<ScoreRecord> {
        let mut records = Vec::new();
        for metric in metrics.select(example) {
            records.push(self.score_metric(metric.as_ref(), example).await);
        }
        records
    }

    /// ERROR records for an example that never got an answer.
    pub fn failed_example(
        &self,
        failure: &ExampleFailure,
        example: &EvaluationExample,
        metrics: &MetricSet,
    ) -> Vec<ScoreRecord> {
        let reason = format!("{} failed: {}", failure.stage, failure.message);
        metrics
            .select(example)
            .iter()
            .map(|metric| {
                ScoreRecord::error(example, metric.name(), reason.clone(), Duration::ZERO)
            })
            .collect()
    }

    async fn score_metric(&self, metric: &dyn Metric, example: &EvaluationExample) -> ScoreRecord {
        let start = Instant::now();
        let name = metric.name();

        if let Some(field) = example.first_missing(metric.required_fields()) {
            let error = ScoreError::IncompleteExample { field };
            log::debug!("Skipping {} for {}: {}", name, example.label(), error);
            return ScoreRecord::error(example, name, error.to_string(), start.elapsed());
        }

        let label = format!("{} on {}", name, example.label());
        let outcome = retry_with_backoff(&self.config.retry, &label, |_| metric.score(example)).await;

        let score = match outcome.result {
            Ok(score) => score,
            Err(e) => {
                log::warn!("{}: {}", label, e);
                return ScoreRecord::error(example, name, e.to_string(), start.elapsed());
            }
        };

        let (low, high) = metric.range();
        if !score.value.is_finite() || score.value < low || score.value > high {
            let error = ScoreError::computation(
                name,
                format!("value {} outside range [{}, {}]", score.value, low, high),
            );
            log::warn!("{}: {}", label, error);
            return ScoreRecord::error(example, name, error.to_string(), start.elapsed());
        }

        ScoreRecord::scored(
            example,
            name,
            score.value,
            self.threshold_for(metric),
            score.reason,
            start.elapsed(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::example::ExampleField;
    use crate::metrics::{Contains, MetricScore, RougeL};
    use crate::report::{FailureStage, Status};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Returns a fixed value, optionally failing transiently first.
    struct FixedMetric {
        value: f64,
        transient_failures: usize,
        calls: AtomicUsize,
    }

    impl FixedMetric {
        fn new(value: f64) -> Self {
            Self {
                value,
                transient_failures: 0,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Metric for FixedMetric {
        fn name(&self) -> &str {
            "fixed"
        }

        fn required_fields(&self) -> &[ExampleField] {
            &[ExampleField::GeneratedAnswer]
        }

        async fn score(&self, _example: &EvaluationExample) -> Result<MetricScore, ScoreError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.transient_failures {
                return Err(ScoreError::MetricComputation {
                    metric: "fixed".into(),
                    message: "backend unreachable".into(),
                    retryable: true,
                });
            }
            Ok(MetricScore::new(self.value))
        }
    }

    fn engine() -> MetricsEngine {
        MetricsEngine::new(
            EngineConfig::default().with_retry_policy(RetryPolicy::new().with_base_delay_ms(1)),
        )
    }

    fn answered(index: usize, answer: &str, reference: &str) -> EvaluationExample {
        EvaluationExample::new(index, format!("Q{}", index))
            .with_answer(answer)
            .with_reference(reference)
    }

    #[tokio::test]
    async fn test_missing_reference_is_error_record() {
        let metrics = MetricSet::new(vec![Arc::new(Contains)]);
        let example = EvaluationExample::new(0, "q").with_answer("a");

        let records = engine().score_example(&example, &metrics).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, Status::Error);
        assert_eq!(
            records[0].reason.as_deref(),
            Some("Incomplete example: missing reference_answer")
        );
    }

    #[rstest::rstest]
    #[case::nan(f64::NAN)]
    #[case::above(1.5)]
    #[case::below(-0.1)]
    #[tokio::test]
    async fn test_out_of_range_value_is_error(#[case] value: f64) {
        let metrics = MetricSet::new(vec![Arc::new(FixedMetric::new(value))]);
        let records = engine()
            .score_example(&answered(0, "a", "r"), &metrics)
            .await;
        assert_eq!(records[0].status, Status::Error);
        assert!(records[0].reason.as_ref().unwrap().contains("outside range"));
    }

    #[tokio::test]
    async fn test_retryable_failure_is_retried() {
        let metric = Arc::new(FixedMetric {
            transient_failures: 1,
            ..FixedMetric::new(0.9)
        });
        let metrics = MetricSet::new(vec![metric.clone()]);

        let records = engine()
            .score_example(&answered(0, "a", "r"), &metrics)
            .await;
        assert_eq!(records[0].status, Status::Pass);
        assert_eq!(metric.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_persistent_failure_is_error_record() {
        let metric = Arc::new(FixedMetric {
            transient_failures: 100,
            ..FixedMetric::new(0.9)
        });
        let metrics = MetricSet::new(vec![metric.clone()]);

        let records = engine()
            .score_example(&answered(0, "a", "r"), &metrics)
            .await;
        assert_eq!(records[0].status, Status::Error);
        assert_eq!(
            records[0].reason.as_deref(),
            Some("fixed failed: backend unreachable")
        );
        assert_eq!(metric.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_threshold_override() {
        let metrics = MetricSet::new(vec![Arc::new(FixedMetric::new(0.6))]);
        let engine = MetricsEngine::new(EngineConfig::default().with_threshold("fixed", 0.8));

        let records = engine
            .score_example(&answered(0, "a", "r"), &metrics)
            .await;
        assert_eq!(records[0].status, Status::Fail);
        assert_eq!(records[0].threshold, Some(0.8));
    }

    #[tokio::test]
    async fn test_score_orders_records() {
        let metrics = MetricSet::new(vec![Arc::new(RougeL), Arc::new(Contains)]);
        let examples = (0..6)
            .map(|i| answered(i, "the answer", "answer"))
            .collect();

        let report = engine()
            .score(examples, &metrics, RunMetadata::new("t"))
            .await;

        let order: Vec<(usize, &str)> = report
            .records
            .iter()
            .map(|r| (r.example_index, r.metric.as_str()))
            .collect();
        let expected: Vec<(usize, &str)> = (0..6)
            .flat_map(|i| [(i, "rouge_l"), (i, "contains")])
            .collect();
        assert_eq!(order, expected);
        assert_eq!(report.total_examples, 6);
    }

    #[tokio::test]
    async fn test_empty_dataset_gives_empty_report() {
        let report = engine()
            .score(vec![], &MetricSet::default(), RunMetadata::new("empty"))
            .await;
        assert_eq!(report.total_examples, 0);
        assert!(report.records.is_empty());
        assert!(report.failures.is_empty());
    }

    #[test]
    fn test_failed_example_records() {
        let metrics = MetricSet::default();
        let example = EvaluationExample::new(3, "q").with_metrics(vec!["rouge_l".into()]);
        let failure = ExampleFailure::new(&example, FailureStage::Answer, "timed out");

        let records = engine().failed_example(&failure, &example, &metrics);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].metric, "rouge_l");
        assert_eq!(records[0].reason.as_deref(), Some("answer failed: timed out"));
        assert!(records[0].is_error());
    }
}
