//! The answer stage: filling `generated_answer` for each example.
//!
//! [`Answerer`] is implemented by [`QueryRunner`](crate::QueryRunner),
//! [`AnswerGenerator`](crate::AnswerGenerator) and [`ProvidedAnswers`].
//! [`answer_stream`] drives any of them with bounded concurrency.

use crate::example::EvaluationExample;
use crate::report::{ExampleFailure, FailureStage};
use async_trait::async_trait;
use futures_util::stream::{self, Stream, StreamExt};
use std::time::{Duration, Instant};

/// Result of answering one example.
///
/// A failed example is still returned so that it reaches the engine and
/// shows up in the report.
#[derive(Debug, Clone)]
pub struct AnswerOutcome {
    /// The example, with answer and context filled in on success
    pub example: EvaluationExample,

    /// Why the example could not be answered
    pub failure: Option<ExampleFailure>,

    /// Retries spent on the upstream call
    pub retries: u32,

    /// Time spent answering
    pub duration: Duration,
}

impl AnswerOutcome {
    /// A successfully answered example.
    pub fn answered(example: EvaluationExample, retries: u32, duration: Duration) -> Self {
        Self {
            example,
            failure: None,
            retries,
            duration,
        }
    }

    /// An example that failed at `stage`.
    pub fn failed(
        example: EvaluationExample,
        stage: FailureStage,
        message: impl Into<String>,
        retries: u32,
        duration: Duration,
    ) -> Self {
        let failure = ExampleFailure::new(&example, stage, message);
        Self {
            example,
            failure: Some(failure),
            retries,
            duration,
        }
    }

    /// Whether the example was answered.
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

/// Something that can produce an answer for an example.
///
/// Implementations never fail the batch: upstream errors are retried
/// internally and then reported on the returned outcome.
#[async_trait]
pub trait Answerer: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Answer one example.
    async fn answer(&self, example: EvaluationExample) -> AnswerOutcome;
}

/// Pass-through for datasets that already carry answers.
///
/// Examples without an answer are passed on unchanged; the engine turns
/// them into ERROR records.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProvidedAnswers;

#[async_trait]
impl Answerer for ProvidedAnswers {
    fn name(&self) -> &str {
        "provided"
    }

    async fn answer(&self, example: EvaluationExample) -> AnswerOutcome {
        AnswerOutcome::answered(example, 0, Duration::ZERO)
    }
}

/// Answer examples with at most `concurrency` in flight, yielding outcomes
/// as they complete.
pub fn answer_stream<'a, A>(
    answerer: &'a A,
    examples: Vec<EvaluationExample>,
    concurrency: usize,
) -> impl Stream<Item = AnswerOutcome> + Send + 'a
where
    A: Answerer + ?Sized,
{
    stream::iter(examples)
        .map(move |example| answerer.answer(example))
        .buffer_unordered(concurrency.max(1))
}

/// Answer all examples and return outcomes in dataset order.
pub async fn answer_all<A>(
    answerer: &A,
    examples: Vec<EvaluationExample>,
    concurrency: usize,
) -> Vec<AnswerOutcome>
where
    A: Answerer + ?Sized,
{
    answer_all_with_progress(answerer, examples, concurrency, |_, _, _| {}).await
}

/// Like [`answer_all`], calling `on_progress(completed, total, success)`
/// after each example.
pub async fn answer_all_with_progress<A, F>(
    answerer: &A,
    examples: Vec<EvaluationExample>,
    concurrency: usize,
    on_progress: F,
) -> Vec<AnswerOutcome>
where
    A: Answerer + ?Sized,
    F: Fn(usize, usize, bool),
{
    let total = examples.len();
    let start = Instant::now();
    log::info!(
        "Answering {} examples with {} (concurrency: {})",
        total,
        answerer.name(),
        concurrency.max(1)
    );

    let mut completed = 0;
    let mut outcomes: Vec<AnswerOutcome> = answer_stream(answerer, examples, concurrency)
        .inspect(|outcome| {
            completed += 1;
            on_progress(completed, total, outcome.is_success());
        })
        .collect()
        .await;
    outcomes.sort_by_key(|o| o.example.index);

    let failed = outcomes.iter().filter(|o| !o.is_success()).count();
    log::info!(
        "Answered {}/{} examples in {:?}",
        total - failed,
        total,
        start.elapsed()
    );
    outcomes
}
