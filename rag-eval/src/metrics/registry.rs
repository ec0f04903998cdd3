//! Metric registry for selecting metrics by name.
//!
//! The registry stores metric factories (closures) rather than metric
//! instances, so metrics are built against whatever backends the run has
//! configured.
//!
//! # Example
//!
//! ```
//! use rag_eval::{MetricBackends, MetricRegistry};
//!
//! let registry = MetricRegistry::with_builtins();
//! let metrics = registry
//!     .build_set(&["rouge_l", "keyword_match"], &MetricBackends::default())
//!     .unwrap();
//! assert_eq!(metrics.names(), vec!["rouge_l", "keyword_match"]);
//!
//! // Judge metrics need a judge model
//! assert!(registry
//!     .build_set(&["faithfulness"], &MetricBackends::default())
//!     .is_err());
//! ```

use super::{
    AnswerCorrectness, AnswerSimilarity, Contains, ContextRelevance, ExactMatch, Faithfulness,
    KeywordMatch, Metric, MetricSet, RougeL, RougeN, ScriptVerification,
};
use crate::script::ScriptRunner;
use rag_eval_core::{ChatModel, Embedder};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors from building metrics.
#[derive(Debug, Error, PartialEq)]
#[non_exhaustive]
pub enum RegistryError {
    /// No factory under this name
    #[error("Unknown metric '{name}'. Available: {available}")]
    UnknownMetric { name: String, available: String },

    /// The metric needs a backend the run has not configured
    #[error("Metric '{metric}' requires {backend}, which is not configured")]
    MissingBackend {
        metric: String,
        backend: &'static str,
    },
}

/// Backends that model-based metrics are built against.
#[derive(Clone, Default)]
pub struct MetricBackends {
    /// Judge model for LLM-as-judge metrics
    pub judge: Option<Arc<dyn ChatModel>>,

    /// Embedding backend for similarity metrics
    pub embedder: Option<Arc<dyn Embedder>>,

    /// Runner for verification scripts
    pub scripts: ScriptRunner,
}

impl MetricBackends {
    fn judge(&self, metric: &str) -> Result<Arc<dyn ChatModel>, RegistryError> {
        self.judge.clone().ok_or_else(|| RegistryError::MissingBackend {
            metric: metric.to_string(),
            backend: "a judge model",
        })
    }

    fn embedder(&self, metric: &str) -> Result<Arc<dyn Embedder>, RegistryError> {
        self.embedder
            .clone()
            .ok_or_else(|| RegistryError::MissingBackend {
                metric: metric.to_string(),
                backend: "an embedding backend",
            })
    }
}

impl std::fmt::Debug for MetricBackends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricBackends")
            .field("judge", &self.judge.as_ref().map(|j| j.name().to_string()))
            .field(
                "embedder",
                &self.embedder.as_ref().map(|e| e.name().to_string()),
            )
            .field("scripts", &self.scripts)
            .finish()
    }
}

/// Factory function type for creating metrics.
pub type MetricFactory =
    Arc<dyn Fn(&MetricBackends) -> Result<Arc<dyn Metric>, RegistryError> + Send + Sync>;

/// Registry of available metrics, keyed by name.
pub struct MetricRegistry {
    factories: HashMap<String, MetricFactory>,
}

impl MetricRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// A registry with every built-in metric.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("exact_match", |_| Ok(Arc::new(ExactMatch)));
        registry.register("contains", |_| Ok(Arc::new(Contains)));
        registry.register("keyword_match", |_| Ok(Arc::new(KeywordMatch)));
        registry.register("rouge1", |_| Ok(Arc::new(RougeN::rouge1())));
        registry.register("rouge2", |_| Ok(Arc::new(RougeN::rouge2())));
        registry.register("rouge_l", |_| Ok(Arc::new(RougeL)));
        registry.register("answer_similarity", |b| {
            Ok(Arc::new(AnswerSimilarity::new(
                b.embedder("answer_similarity")?,
            )))
        });
        registry.register("answer_correctness", |b| {
            Ok(Arc::new(AnswerCorrectness::new(
                b.judge("answer_correctness")?,
            )))
        });
        registry.register("faithfulness", |b| {
            Ok(Arc::new(Faithfulness::new(b.judge("faithfulness")?)))
        });
        registry.register("context_relevance", |b| {
            Ok(Arc::new(ContextRelevance::new(b.judge("context_relevance")?)))
        });
        registry.register("script", |b| {
            Ok(Arc::new(ScriptVerification::new(b.scripts.clone())))
        });
        registry
    }

    /// Register a metric factory.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&MetricBackends) -> Result<Arc<dyn Metric>, RegistryError> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// Create one metric by name.
    pub fn create(
        &self,
        name: &str,
        backends: &MetricBackends,
    ) -> Result<Arc<dyn Metric>, RegistryError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| RegistryError::UnknownMetric {
                name: name.to_string(),
                available: self.list().join(", "),
            })?;
        factory(backends)
    }

    /// Build a set from names, in the given order.
    ///
    /// Fails on the first unknown name or missing backend.
    pub fn build_set<S: AsRef<str>>(
        &self,
        names: &[S],
        backends: &MetricBackends,
    ) -> Result<MetricSet, RegistryError> {
        let metrics = names
            .iter()
            .map(|name| self.create(name.as_ref().trim(), backends))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(MetricSet::new(metrics))
    }

    /// List all registered metric names (sorted alphabetically).
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.factories.keys().map(|s| s.as_str()).collect();
        names.sort();
        names
    }

    /// Check if a metric with the given name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Get the number of registered metrics.
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl Default for MetricRegistry {
    fn default() -> Self {
        Self::new()
    }
}
