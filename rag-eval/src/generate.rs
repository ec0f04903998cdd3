//! Generating candidate answers directly through an LLM provider.

use crate::answer::{answer_all_with_progress, AnswerOutcome, Answerer};
use crate::example::EvaluationExample;
use crate::report::FailureStage;
use async_trait::async_trait;
use rag_eval_core::{retry_with_backoff, ChatModel, LlmRequest, RetryPolicy};
use std::sync::Arc;
use std::time::Instant;

/// System instruction for generated answers.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant. Answer the question \
accurately and concisely. When context is provided, base your answer on it and do not invent \
facts it does not support.";

/// Produces answers with a chat model, grounded on any context already
/// attached to the example.
pub struct AnswerGenerator {
    model: Arc<dyn ChatModel>,
    retry: RetryPolicy,
    concurrency: usize,
    system_prompt: String,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
}

impl AnswerGenerator {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self {
            model,
            retry: RetryPolicy::default(),
            concurrency: 5,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_tokens: None,
            temperature: None,
        }
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Generate answers for every example, returning outcomes in dataset order.
    pub async fn run(&self, examples: Vec<EvaluationExample>) -> Vec<AnswerOutcome> {
        self.run_with_progress(examples, |_, _, _| {}).await
    }

    /// Like [`AnswerGenerator::run`], reporting `(completed, total, success)`.
    pub async fn run_with_progress<F>(
        &self,
        examples: Vec<EvaluationExample>,
        on_progress: F,
    ) -> Vec<AnswerOutcome>
    where
        F: Fn(usize, usize, bool),
    {
        answer_all_with_progress(self, examples, self.concurrency, on_progress).await
    }

    /// The user prompt for an example: numbered context chunks, then the question.
    pub fn build_prompt(example: &EvaluationExample) -> String {
        let context = example.context();
        if context.is_empty() {
            return format!("Question: {}", example.question.trim());
        }

        let chunks: Vec<String> = context
            .iter()
            .enumerate()
            .map(|(i, chunk)| format!("[{}] {}", i + 1, chunk.trim()))
            .collect();
        format!(
            "Context:\n{}\n\nQuestion: {}",
            chunks.join("\n"),
            example.question.trim()
        )
    }

    fn build_request(&self, example: &EvaluationExample) -> LlmRequest {
        let mut request = LlmRequest::new(Self::build_prompt(example))
            .with_system_instruction(self.system_prompt.clone());
        if let Some(max_tokens) = self.max_tokens {
            request = request.with_max_tokens(max_tokens);
        }
        if let Some(temperature) = self.temperature {
            request = request.with_temperature(temperature);
        }
        request
    }
}

#[async_trait]
impl Answerer for AnswerGenerator {
    fn name(&self) -> &str {
        self.model.name()
    }

    async fn answer(&self, mut example: EvaluationExample) -> AnswerOutcome {
        let start = Instant::now();
        let request = self.build_request(&example);
        let label = format!("Generation for {}", example.label());

        let outcome =
            retry_with_backoff(&self.retry, &label, |_| self.model.complete(&request)).await;

        match outcome.result {
            Ok(response) => {
                if let Some(usage) = &response.usage {
                    log::debug!("{}: {} tokens", label, usage.total_tokens);
                }
                example.generated_answer = Some(response.text);
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

#[cfg(test)]
mod tests {
    use super::*;
    use rag_eval_core::mock::MockChatModel;
    use rag_eval_core::LlmResponse;

    #[test]
    fn test_prompt_without_context() {
        let example = EvaluationExample::new(0, " What is a pod? ");
        assert_eq!(
            AnswerGenerator::build_prompt(&example),
            "Question: What is a pod?"
        );
    }

    #[test]
    fn test_prompt_numbers_context() {
        let example = EvaluationExample::new(0, "What is a pod?")
            .with_context(vec!["Pods run containers.".into(), "Pods are small.".into()]);
        assert_eq!(
            AnswerGenerator::build_prompt(&example),
            "Context:\n[1] Pods run containers.\n[2] Pods are small.\n\nQuestion: What is a pod?"
        );
    }

    #[tokio::test]
    async fn test_generate_sets_answer_and_request_options() {
        let model = MockChatModel::new(|request: &LlmRequest, _| {
            assert_eq!(request.system_instruction.as_deref(), Some("Be brief."));
            assert_eq!(request.max_tokens, Some(64));
            assert_eq!(request.temperature, Some(0.2));
            Ok(LlmResponse::new("A pod is a group of containers."))
        });
        let generator = AnswerGenerator::new(Arc::new(model))
            .with_system_prompt("Be brief.")
            .with_max_tokens(64)
            .with_temperature(0.2);

        let outcome = generator
            .answer(EvaluationExample::new(0, "What is a pod?"))
            .await;
        assert!(outcome.is_success());
        assert_eq!(
            outcome.example.answer_text(),
            "A pod is a group of containers."
        );
    }

    #[tokio::test]
    async fn test_generate_retries_then_succeeds() {
        let model = Arc::new(MockChatModel::failing_then(1, "ok"));
        let generator = AnswerGenerator::new(model.clone())
            .with_retry_policy(RetryPolicy::new().with_base_delay_ms(1));

        let outcome = generator.answer(EvaluationExample::new(0, "q")).await;
        assert_eq!(outcome.example.answer_text(), "ok");
        assert_eq!(outcome.retries, 1);
        assert_eq!(model.calls(), 2);
    }

    #[tokio::test]
    async fn test_generate_failure_recorded() {
        let generator = AnswerGenerator::new(Arc::new(MockChatModel::failing_then(10, "never")))
            .with_retry_policy(RetryPolicy::none());

        let outcomes = generator
            .run(vec![EvaluationExample::new(0, "q"), EvaluationExample::new(1, "r")])
            .await;
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| !o.is_success()));
        assert!(outcomes[0]
            .failure
            .as_ref()
            .unwrap()
            .message
            .contains("timed out"));
    }
}
