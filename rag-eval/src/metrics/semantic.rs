//! Embedding-based similarity.

use super::{Metric, MetricScore, ScoreError};
use crate::example::{EvaluationExample, ExampleField};
use async_trait::async_trait;
use rag_eval_core::{cosine_similarity, Embedder};
use std::sync::Arc;

/// Cosine similarity between answer and reference embeddings.
///
/// Negative similarities clamp to 0 so the score stays in [0, 1].
pub struct AnswerSimilarity {
    embedder: Arc<dyn Embedder>,
}

impl AnswerSimilarity {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self { embedder }
    }
}

#[async_trait]
impl Metric for AnswerSimilarity {
    fn name(&self) -> &str {
        "answer_similarity"
    }

    fn required_fields(&self) -> &[ExampleField] {
        &[ExampleField::GeneratedAnswer, ExampleField::ReferenceAnswer]
    }

    async fn score(&self, example: &EvaluationExample) -> Result<MetricScore, ScoreError> {
        let texts = [
            example.answer_text().to_string(),
            example.reference_text().to_string(),
        ];
        let vectors = self
            .embedder
            .embed(&texts)
            .await
            .map_err(|e| ScoreError::upstream(self.name(), &e))?;

        let [answer, reference] = vectors.as_slice() else {
            return Err(ScoreError::computation(
                self.name(),
                format!("expected 2 embeddings, got {}", vectors.len()),
            ));
        };

        Ok(MetricScore::new(
            cosine_similarity(answer, reference).clamp(0.0, 1.0),
        ))
    }
}
