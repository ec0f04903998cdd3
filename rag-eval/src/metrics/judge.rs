//! LLM-as-judge metrics.
//!
//! Each metric sends one prompt per example to a [`ChatModel`] at
//! temperature 0. Backend failures surface as retryable
//! [`ScoreError::MetricComputation`] errors so the engine can back off and
//! try again; unparsable replies do not.

use super::{Metric, MetricScore, ScoreError};
use crate::example::{EvaluationExample, ExampleField};
use async_trait::async_trait;
use rag_eval_core::{truncate, ChatModel, LlmRequest};
use regex::Regex;
use serde_json::Value;
use std::sync::{Arc, LazyLock};

const JUDGE_SYSTEM_INSTRUCTION: &str = "You are an impartial evaluator of answers produced by a \
retrieval-augmented assistant. Follow the output format exactly.";

/// Token budget for binary verdicts.
const VERDICT_MAX_TOKENS: u32 = 10;

/// Token budget for scored verdicts with a reason.
const SCORED_MAX_TOKENS: u32 = 256;

/// A standalone `0` or `1` token.
static VERDICT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[01]\b").expect("verdict pattern is valid"));

static NUMBER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-?\d+(?:\.\d+)?").expect("number pattern is valid"));

/// Extract a binary verdict from a judge reply.
///
/// Accepts an exact `1`/`0`, otherwise the first standalone `0` or `1`
/// token. Returns `None` when the reply holds neither.
///
/// ```
/// use rag_eval::metrics::judge::extract_verdict;
///
/// assert_eq!(extract_verdict("1"), Some(1.0));
/// assert_eq!(extract_verdict("Verdict: 0 (wrong date)"), Some(0.0));
/// assert_eq!(extract_verdict("correct"), None);
/// ```
pub fn extract_verdict(reply: &str) -> Option<f64> {
    match reply.trim() {
        "1" => return Some(1.0),
        "0" => return Some(0.0),
        _ => {}
    }

    VERDICT_PATTERN
        .find(reply)
        .and_then(|m| m.as_str().parse::<f64>().ok())
}

/// Parse a scored judge reply.
///
/// Prefers a JSON object with `score` and optional `reason`, possibly
/// wrapped in prose or a code fence; falls back to the first number in the
/// reply.
pub fn parse_judge_score(reply: &str) -> Option<(f64, Option<String>)> {
    if let (Some(start), Some(end)) = (reply.find('{'), reply.rfind('}')) {
        if start < end {
            if let Ok(json) = serde_json::from_str::<Value>(&reply[start..=end]) {
                let score = match json.get("score") {
                    Some(Value::Number(n)) => n.as_f64(),
                    Some(Value::String(s)) => s.trim().parse().ok(),
                    _ => None,
                };
                if let Some(score) = score {
                    let reason = json
                        .get("reason")
                        .and_then(Value::as_str)
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty());
                    return Some((score, reason));
                }
            }
        }
    }

    let number = NUMBER_PATTERN.find(reply)?;
    number.as_str().parse().ok().map(|score| (score, None))
}

fn numbered_context(chunks: &[String]) -> String {
    chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| format!("[{}] {}", i + 1, chunk.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Send a prompt to the judge and return the reply text.
async fn ask(
    model: &dyn ChatModel,
    metric: &str,
    prompt: String,
    max_tokens: u32,
) -> Result<String, ScoreError> {
    let request = LlmRequest::new(prompt)
        .with_system_instruction(JUDGE_SYSTEM_INSTRUCTION)
        .with_max_tokens(max_tokens)
        .with_temperature(0.0);

    let response = model
        .complete(&request)
        .await
        .map_err(|e| ScoreError::upstream(metric, &e))?;

    log::debug!(
        "{} judge ({}) replied: {}",
        metric,
        model.name(),
        truncate(&response.text, 200)
    );
    Ok(response.text)
}

async fn ask_for_score(
    model: &dyn ChatModel,
    metric: &str,
    prompt: String,
) -> Result<MetricScore, ScoreError> {
    let reply = ask(model, metric, prompt, SCORED_MAX_TOKENS).await?;
    let (value, reason) = parse_judge_score(&reply).ok_or_else(|| {
        ScoreError::computation(
            metric,
            format!("judge reply has no score: {}", truncate(&reply, 100)),
        )
    })?;

    let score = MetricScore::new(value);
    Ok(match reason {
        Some(reason) => score.with_reason(reason),
        None => score,
    })
}

/// Binary answer correctness against the reference, judged by an LLM.
///
/// The judge replies `1` (correct) or `0` (incorrect). A reply without a
/// verdict scores 0 and is logged.
pub struct AnswerCorrectness {
    model: Arc<dyn ChatModel>,
}

impl AnswerCorrectness {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    fn prompt(example: &EvaluationExample) -> String {
        format!(
            "Decide whether the response answers the question correctly, using the expected \
             answer as the source of truth. Minor wording differences are acceptable; missing \
             or contradicting facts are not.\n\n\
             Question: {}\n\n\
             Expected answer: {}\n\n\
             Response: {}\n\n\
             Reply with a single digit: 1 if the response is correct, 0 if it is not.",
            example.question.trim(),
            example.reference_text().trim(),
            example.answer_text().trim()
        )
    }
}

#[async_trait]
impl Metric for AnswerCorrectness {
    fn name(&self) -> &str {
        "answer_correctness"
    }

    fn required_fields(&self) -> &[ExampleField] {
        &[ExampleField::GeneratedAnswer, ExampleField::ReferenceAnswer]
    }

    async fn score(&self, example: &EvaluationExample) -> Result<MetricScore, ScoreError> {
        let reply = ask(
            self.model.as_ref(),
            self.name(),
            Self::prompt(example),
            VERDICT_MAX_TOKENS,
        )
        .await?;

        match extract_verdict(&reply) {
            Some(value) => Ok(MetricScore::new(value)),
            None => {
                log::warn!(
                    "No verdict in judge reply for {}: {:?}, scoring 0",
                    example.label(),
                    truncate(&reply, 100)
                );
                Ok(MetricScore::new(0.0)
                    .with_reason(format!("unparsable verdict: {}", truncate(&reply, 100))))
            }
        }
    }
}

/// How well the retrieved context supports the answer, from 0 to 1.
pub struct Faithfulness {
    model: Arc<dyn ChatModel>,
}

impl Faithfulness {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    fn prompt(example: &EvaluationExample) -> String {
        format!(
            "Rate how faithful the response is to the context: the fraction of its claims that \
             the context supports. Claims absent from or contradicted by the context are \
             unsupported.\n\n\
             Context:\n{}\n\n\
             Response: {}\n\n\
             Reply with JSON only: {{\"score\": <number from 0 to 1>, \"reason\": \"<one sentence>\"}}",
            numbered_context(example.context()),
            example.answer_text().trim()
        )
    }
}

#[async_trait]
impl Metric for Faithfulness {
    fn name(&self) -> &str {
        "faithfulness"
    }

    fn required_fields(&self) -> &[ExampleField] {
        &[ExampleField::GeneratedAnswer, ExampleField::RetrievedContext]
    }

    async fn score(&self, example: &EvaluationExample) -> Result<MetricScore, ScoreError> {
        ask_for_score(self.model.as_ref(), self.name(), Self::prompt(example)).await
    }
}

/// How relevant the retrieved context is to the question, from 0 to 1.
pub struct ContextRelevance {
    model: Arc<dyn ChatModel>,
}

impl ContextRelevance {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    fn prompt(example: &EvaluationExample) -> String {
        format!(
            "Rate how relevant the context is to the question: the fraction of the context \
             needed to answer it.\n\n\
             Question: {}\n\n\
             Context:\n{}\n\n\
             Reply with JSON only: {{\"score\": <number from 0 to 1>, \"reason\": \"<one sentence>\"}}",
            example.question.trim(),
            numbered_context(example.context())
        )
    }
}

#[async_trait]
impl Metric for ContextRelevance {
    fn name(&self) -> &str {
        "context_relevance"
    }

    fn required_fields(&self) -> &[ExampleField] {
        &[ExampleField::Question, ExampleField::RetrievedContext]
    }

    async fn score(&self, example: &EvaluationExample) -> Result<MetricScore, ScoreError> {
        ask_for_score(self.model.as_ref(), self.name(), Self::prompt(example)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rag_eval_core::mock::MockChatModel;
    use rag_eval_core::{Retryable, UpstreamError};
    use rstest::rstest;

    fn example() -> EvaluationExample {
        EvaluationExample::new(0, "What is the capital of France?")
            .with_reference("Paris")
            .with_answer("The capital is Paris.")
            .with_context(vec!["Paris is the capital of France.".into()])
    }

    #[test]
    fn test_patterns_compile() {
        assert!(VERDICT_PATTERN.is_match("verdict: 1"));
        assert!(!VERDICT_PATTERN.is_match("10"));
        assert_eq!(
            NUMBER_PATTERN.find("score -0.25 of 1").map(|m| m.as_str()),
            Some("-0.25")
        );
    }

    #[rstest]
    #[case::exact_one("1", Some(1.0))]
    #[case::exact_zero(" 0\n", Some(0.0))]
    #[case::embedded("The answer is 1.", Some(1.0))]
    #[case::first_token_wins("0 - although 1 detail matches", Some(0.0))]
    #[case::ignores_larger_numbers("10 out of 10", None)]
    #[case::no_digit("correct", None)]
    fn test_extract_verdict(#[case] reply: &str, #[case] expected: Option<f64>) {
        assert_eq!(extract_verdict(reply), expected);
    }

    #[rstest]
    #[case::json(r#"{"score": 0.8, "reason": "mostly supported"}"#, Some((0.8, Some("mostly supported"))))]
    #[case::fenced("```json\n{\"score\": 1}\n```", Some((1.0, None)))]
    #[case::string_score(r#"{"score": "0.25"}"#, Some((0.25, None)))]
    #[case::bare_number("Score: 0.5", Some((0.5, None)))]
    #[case::nothing("I cannot judge this", None)]
    fn test_parse_judge_score(#[case] reply: &str, #[case] expected: Option<(f64, Option<&str>)>) {
        let expected = expected.map(|(score, reason)| (score, reason.map(String::from)));
        assert_eq!(parse_judge_score(reply), expected);
    }

    #[tokio::test]
    async fn test_answer_correctness_prompt_and_verdict() {
        let model = Arc::new(MockChatModel::with_reply("1"));
        let metric = AnswerCorrectness::new(model.clone());

        let score = metric.score(&example()).await.unwrap();
        assert_eq!(score.value, 1.0);
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn test_answer_correctness_unparsable_scores_zero() {
        let metric = AnswerCorrectness::new(Arc::new(MockChatModel::with_reply("maybe")));
        let score = metric.score(&example()).await.unwrap();
        assert_eq!(score.value, 0.0);
        assert!(score.reason.unwrap().contains("unparsable verdict"));
    }

    #[tokio::test]
    async fn test_judge_sends_deterministic_request() {
        let model = Arc::new(MockChatModel::new(|request: &LlmRequest, _| {
            assert_eq!(request.temperature, Some(0.0));
            assert_eq!(request.max_tokens, Some(VERDICT_MAX_TOKENS));
            assert!(request.prompt.contains("Expected answer: Paris"));
            assert!(request.system_instruction.is_some());
            Ok(rag_eval_core::LlmResponse::new("0"))
        }));
        let metric = AnswerCorrectness::new(model);
        assert_eq!(metric.score(&example()).await.unwrap().value, 0.0);
    }

    #[tokio::test]
    async fn test_faithfulness_reads_json_reply() {
        let model = Arc::new(MockChatModel::new(|request: &LlmRequest, _| {
            assert!(request.prompt.contains("[1] Paris is the capital of France."));
            Ok(rag_eval_core::LlmResponse::new(
                r#"{"score": 0.75, "reason": "one claim unsupported"}"#,
            ))
        }));
        let score = Faithfulness::new(model).score(&example()).await.unwrap();
        assert_eq!(score.value, 0.75);
        assert_eq!(score.reason.as_deref(), Some("one claim unsupported"));
    }

    #[tokio::test]
    async fn test_context_relevance_without_score_is_error() {
        let metric = ContextRelevance::new(Arc::new(MockChatModel::with_reply("no idea")));
        let err = metric.score(&example()).await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("judge reply has no score"));
    }

    #[tokio::test]
    async fn test_backend_timeout_is_retryable() {
        let model = Arc::new(MockChatModel::new(|_: &LlmRequest, _| {
            Err(UpstreamError::Timeout(10))
        }));
        let err = Faithfulness::new(model).score(&example()).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
