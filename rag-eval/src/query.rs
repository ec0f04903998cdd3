//! Querying the RAG service under evaluation.

use crate::answer::{answer_all_with_progress, AnswerOutcome, Answerer};
use crate::example::EvaluationExample;
use crate::report::FailureStage;
use async_trait::async_trait;
use rag_eval_core::{retry_with_backoff, truncate, RagQuery, RagService, RetryPolicy};
use std::sync::Arc;
use std::time::Instant;

/// Configuration for a query run.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct QueryConfig {
    /// Maximum requests in flight
    pub concurrency: usize,

    /// Backoff for failed requests
    pub retry: RetryPolicy,

    /// Provider the service should answer with
    pub provider: Option<String>,

    /// Model the service should answer with
    pub model: Option<String>,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            retry: RetryPolicy::default(),
            provider: None,
            model: None,
        }
    }
}

impl QueryConfig {
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

    /// Ask the service to answer with a specific provider and model.
    #[must_use]
    pub fn with_target(mut self, provider: impl Into<String>, model: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self.model = Some(model.into());
        self
    }
}

/// Sends each question to a RAG service and records its answer and the
/// retrieved context.
///
/// # Example
///
/// ```no_run
/// use rag_eval::{Dataset, FileDataset, QueryConfig, QueryRunner};
/// use rag_eval_core::{RagClientConfig, RagHttpClient};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = RagHttpClient::new(RagClientConfig::new("http://localhost:8080"))?;
/// let runner = QueryRunner::new(Arc::new(client), QueryConfig::default());
///
/// let examples = FileDataset::new("questions.json").load(None).await?;
/// for outcome in runner.run(examples).await {
///     println!("{}: {}", outcome.example.label(), outcome.example.answer_text());
/// }
/// # Ok(())
/// # }
/// ```
pub struct QueryRunner {
    service: Arc<dyn RagService>,
    config: QueryConfig,
}

impl QueryRunner {
    pub fn new(service: Arc<dyn RagService>, config: QueryConfig) -> Self {
        Self { service, config }
    }

    /// Get the configuration.
    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    /// Query every example, returning outcomes in dataset order.
    pub async fn run(&self, examples: Vec<EvaluationExample>) -> Vec<AnswerOutcome> {
        self.run_with_progress(examples, |_, _, _| {}).await
    }

    /// Like [`QueryRunner::run`], reporting `(completed, total, success)`.
    pub async fn run_with_progress<F>(
        &self,
        examples: Vec<EvaluationExample>,
        on_progress: F,
    ) -> Vec<AnswerOutcome>
    where
        F: Fn(usize, usize, bool),
    {
        answer_all_with_progress(self, examples, self.config.concurrency, on_progress).await
    }

    fn build_query(&self, example: &EvaluationExample) -> RagQuery {
        let mut query = RagQuery::new(example.question.clone());
        query.provider = self.config.provider.clone();
        query.model = self.config.model.clone();
        query.conversation_id = example.conversation_id.clone();
        query
    }
}

#[async_trait]
impl Answerer for QueryRunner {
    fn name(&self) -> &str {
        self.service.name()
    }

    async fn answer(&self, mut example: EvaluationExample) -> AnswerOutcome {
        let start = Instant::now();
        let query = self.build_query(&example);
        let label = format!("Query for {}", example.label());

        let outcome =
            retry_with_backoff(&self.config.retry, &label, |_| self.service.query(&query)).await;

        match outcome.result {
            Ok(answer) => {
                log::debug!(
                    "{} answered with {} chunks, {} references: {}",
                    example.label(),
                    answer.contexts.len(),
                    answer.references.len(),
                    truncate(&answer.response, 80)
                );
                example.generated_answer = Some(answer.response);
                if !answer.contexts.is_empty() {
                    example.retrieved_context = Some(answer.contexts);
                }
                if example.conversation_id.is_none() {
                    example.conversation_id = answer.conversation_id;
                }
                AnswerOutcome::answered(example, outcome.retries, start.elapsed())
            }
            Err(e) => {
                log::error!("{} failed: {}", label, e);
                AnswerOutcome::failed(
                    example,
                    FailureStage::Answer,
                    e.to_string(),
                    outcome.retries,
                    start.elapsed(),
                )
            }
        }
    }
}
