//! Scoring metrics for evaluation.
//!
//! Provides the [`Metric`] trait, the [`MetricSet`] a run scores with, and
//! the built-in metrics:
//!
//! - [`lexical`]: exact match, containment, keywords, ROUGE-1/2/L
//! - [`semantic`]: embedding similarity
//! - [`judge`]: LLM-as-judge correctness, faithfulness, context relevance
//! - [`script`]: external verification scripts
//!
//! Metrics are normally built by name through [`MetricRegistry`].

pub mod judge;
pub mod lexical;
pub mod registry;
pub mod script;
pub mod semantic;

pub use judge::{AnswerCorrectness, ContextRelevance, Faithfulness};
pub use lexical::{Contains, ExactMatch, KeywordMatch, RougeL, RougeN};
pub use registry::{MetricBackends, MetricRegistry, RegistryError};
pub use script::ScriptVerification;
pub use semantic::AnswerSimilarity;

use crate::example::{EvaluationExample, ExampleField};
use async_trait::async_trait;
use rag_eval_core::{Retryable, UpstreamError};
use std::sync::Arc;
use thiserror::Error;

/// Threshold used when a metric declares none and the run sets none.
pub const DEFAULT_THRESHOLD: f64 = 0.5;

/// Errors produced while scoring one (example, metric) pair.
///
/// Neither variant is fatal to a run: both become ERROR records.
#[derive(Debug, Clone, Error, PartialEq)]
#[non_exhaustive]
pub enum ScoreError {
    /// The example lacks a field the metric needs
    #[error("Incomplete example: missing {field}")]
    IncompleteExample { field: ExampleField },

    /// The metric itself failed
    #[error("{metric} failed: {message}")]
    MetricComputation {
        metric: String,
        message: String,
        retryable: bool,
    },
}

impl ScoreError {
    /// A non-retryable computation failure.
    pub fn computation(metric: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MetricComputation {
            metric: metric.into(),
            message: message.into(),
            retryable: false,
        }
    }

    /// Wrap a backend failure, keeping its retryability.
    pub fn upstream(metric: impl Into<String>, error: &UpstreamError) -> Self {
        Self::MetricComputation {
            metric: metric.into(),
            message: error.to_string(),
            retryable: error.is_retryable(),
        }
    }
}

impl Retryable for ScoreError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            ScoreError::MetricComputation {
                retryable: true,
                ..
            }
        )
    }
}

/// A metric's verdict on one example.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricScore {
    pub value: f64,
    pub reason: Option<String>,
}

impl MetricScore {
    /// A score without explanation.
    pub fn new(value: f64) -> Self {
        Self {
            value,
            reason: None,
        }
    }

    /// Attach an explanation.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Trait for evaluation metrics.
///
/// A metric reads the fields it declares in [`Metric::required_fields`]
/// and returns a value inside [`Metric::range`]. The engine checks field
/// presence before calling [`Metric::score`] and validates the value after.
///
/// # Example
///
/// ```
/// use async_trait::async_trait;
/// use rag_eval::{EvaluationExample, ExampleField, Metric, MetricScore, ScoreError};
///
/// struct AnswerLength;
///
/// #[async_trait]
/// impl Metric for AnswerLength {
///     fn name(&self) -> &str {
///         "answer_length"
///     }
///
///     fn required_fields(&self) -> &[ExampleField] {
///         &[ExampleField::GeneratedAnswer]
///     }
///
///     async fn score(&self, example: &EvaluationExample) -> Result<MetricScore, ScoreError> {
///         let words = example.answer_text().split_whitespace().count() as f64;
///         Ok(MetricScore::new((words / 100.0).min(1.0)))
///     }
/// }
/// ```
#[async_trait]
pub trait Metric: Send + Sync {
    /// The name of this metric (used in reports and selection).
    fn name(&self) -> &str;

    /// Fields that must be populated for the metric to apply.
    fn required_fields(&self) -> &[ExampleField];

    /// Inclusive value range.
    fn range(&self) -> (f64, f64) {
        (0.0, 1.0)
    }

    /// Pass threshold when the run does not override it.
    fn default_threshold(&self) -> f64 {
        DEFAULT_THRESHOLD
    }

    /// Score one example.
    async fn score(&self, example: &EvaluationExample) -> Result<MetricScore, ScoreError>;
}

/// An ordered collection of metrics for a run.
///
/// Order is significant: records for one example follow it.
///
/// # Example
///
/// ```
/// use rag_eval::{MetricSet, Contains, RougeL};
///
/// let metrics = MetricSet::default(); // lexical metrics
///
/// // Or custom set
/// let metrics = MetricSet::new(vec![
///     std::sync::Arc::new(Contains),
///     std::sync::Arc::new(RougeL),
/// ]);
/// assert_eq!(metrics.names(), vec!["contains", "rouge_l"]);
/// ```
#[derive(Clone)]
pub struct MetricSet {
    metrics: Vec<Arc<dyn Metric>>,
}

impl MetricSet {
    /// Create a set; later duplicates of a name are dropped.
    pub fn new(metrics: Vec<Arc<dyn Metric>>) -> Self {
        let mut set = Self {
            metrics: Vec::with_capacity(metrics.len()),
        };
        for metric in metrics {
            set.push(metric);
        }
        set
    }

    /// Add a metric to the set.
    pub fn add(&mut self, metric: impl Metric + 'static) {
        self.push(Arc::new(metric));
    }

    fn push(&mut self, metric: Arc<dyn Metric>) {
        if self.get(metric.name()).is_some() {
            log::warn!("Metric '{}' listed twice, keeping the first", metric.name());
            return;
        }
        self.metrics.push(metric);
    }

    /// Get the names of all metrics, in order.
    pub fn names(&self) -> Vec<&str> {
        self.metrics.iter().map(|m| m.name()).collect()
    }

    /// Look up a metric by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Metric>> {
        self.metrics.iter().find(|m| m.name() == name)
    }

    /// Iterate in order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Metric>> {
        self.metrics.iter()
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Metrics that apply to an example, in set order.
    ///
    /// With no per-example list every metric applies. Listed names that
    /// are not in the set are logged and skipped.
    pub fn select(&self, example: &EvaluationExample) -> Vec<Arc<dyn Metric>> {
        let Some(wanted) = &example.metrics else {
            return self.metrics.clone();
        };

        for name in wanted {
            if self.get(name).is_none() {
                log::warn!(
                    "Example {} requests metric '{}' which is not in this run, skipping",
                    example.label(),
                    name
                );
            }
        }

        self.metrics
            .iter()
            .filter(|m| wanted.iter().any(|w| w == m.name()))
            .cloned()
            .collect()
    }
}

impl Default for MetricSet {
    /// Default metrics: the lexical set that needs no backend.
    fn default() -> Self {
        Self::new(vec![
            Arc::new(ExactMatch),
            Arc::new(Contains),
            Arc::new(RougeN::rouge1()),
            Arc::new(RougeN::rouge2()),
            Arc::new(RougeL),
        ])
    }
}

impl std::fmt::Debug for MetricSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_set_default() {
        let metrics = MetricSet::default();
        assert_eq!(
            metrics.names(),
            vec!["exact_match", "contains", "rouge1", "rouge2", "rouge_l"]
        );
    }

    #[test]
    fn test_metric_set_drops_duplicates() {
        let metrics = MetricSet::new(vec![Arc::new(Contains), Arc::new(Contains)]);
        assert_eq!(metrics.len(), 1);
    }

    #[test]
    fn test_select_all_without_list() {
        let metrics = MetricSet::default();
        let example = EvaluationExample::new(0, "q");
        assert_eq!(metrics.select(&example).len(), 5);
    }

    #[test]
    fn test_select_keeps_set_order_and_skips_unknown() {
        let metrics = MetricSet::default();
        let example = EvaluationExample::new(0, "q").with_metrics(vec![
            "rouge_l".into(),
            "unknown".into(),
            "exact_match".into(),
        ]);

        let names: Vec<String> = metrics
            .select(&example)
            .iter()
            .map(|m| m.name().to_string())
            .collect();
        assert_eq!(names, vec!["exact_match", "rouge_l"]);
    }

    #[test]
    fn test_score_error_retryable() {
        let timeout = ScoreError::upstream("faithfulness", &UpstreamError::Timeout(100));
        assert!(timeout.is_retryable());

        let parse = ScoreError::computation("faithfulness", "bad reply");
        assert!(!parse.is_retryable());

        let missing = ScoreError::IncompleteExample {
            field: ExampleField::ReferenceAnswer,
        };
        assert!(!missing.is_retryable());
        assert_eq!(
            missing.to_string(),
            "Incomplete example: missing reference_answer"
        );
    }
}
