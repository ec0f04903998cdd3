//! Lexical metrics: string matching and ROUGE overlap.
//!
//! All of these are pure functions of the example text, so they never
//! fail once their fields are present.

use super::{Metric, MetricScore, ScoreError};
use crate::example::{EvaluationExample, ExampleField};
use async_trait::async_trait;
use std::collections::HashMap;

const ANSWER_AND_REFERENCE: &[ExampleField] =
    &[ExampleField::GeneratedAnswer, ExampleField::ReferenceAnswer];

/// Normalize text for comparison.
///
/// - Lowercase
/// - Trim whitespace
/// - Collapse multiple spaces into single space
pub fn normalize(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split text into lowercase alphanumeric tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

/// F1 from an overlap count and the two totals; 0.0 when either side is empty.
fn f1(overlap: usize, candidate_total: usize, reference_total: usize) -> f64 {
    if overlap == 0 || candidate_total == 0 || reference_total == 0 {
        return 0.0;
    }
    let precision = overlap as f64 / candidate_total as f64;
    let recall = overlap as f64 / reference_total as f64;
    2.0 * precision * recall / (precision + recall)
}

fn ngram_counts(tokens: &[String], n: usize) -> HashMap<&[String], usize> {
    let mut counts = HashMap::new();
    if n == 0 || tokens.len() < n {
        return counts;
    }
    for gram in tokens.windows(n) {
        *counts.entry(gram).or_insert(0) += 1;
    }
    counts
}

/// ROUGE-N F1 with clipped n-gram counts.
pub fn rouge_n(candidate: &str, reference: &str, n: usize) -> f64 {
    let candidate = tokenize(candidate);
    let reference = tokenize(reference);
    let candidate_counts = ngram_counts(&candidate, n);
    let reference_counts = ngram_counts(&reference, n);

    let overlap: usize = candidate_counts
        .iter()
        .map(|(gram, count)| (*count).min(reference_counts.get(gram).copied().unwrap_or(0)))
        .sum();

    f1(
        overlap,
        candidate_counts.values().sum(),
        reference_counts.values().sum(),
    )
}

/// Length of the longest common subsequence of two token lists.
fn lcs_len(a: &[String], b: &[String]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for x in a {
        for (j, y) in b.iter().enumerate() {
            curr[j + 1] = if x == y {
                prev[j] + 1
            } else {
                prev[j + 1].max(curr[j])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// ROUGE-L F1 over the longest common token subsequence.
pub fn rouge_l(candidate: &str, reference: &str) -> f64 {
    let candidate = tokenize(candidate);
    let reference = tokenize(reference);
    f1(
        lcs_len(&candidate, &reference),
        candidate.len(),
        reference.len(),
    )
}

fn binary(hit: bool) -> f64 {
    if hit {
        1.0
    } else {
        0.0
    }
}

/// Exact match after normalization.
///
/// # Example
///
/// ```
/// use rag_eval::metrics::lexical::exact_match;
///
/// assert_eq!(exact_match("  Paris ", "paris"), 1.0);
/// assert_eq!(exact_match("Paris, France", "Paris"), 0.0);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct ExactMatch;

/// Score function behind [`ExactMatch`].
pub fn exact_match(predicted: &str, reference: &str) -> f64 {
    binary(normalize(predicted) == normalize(reference))
}

#[async_trait]
impl Metric for ExactMatch {
    fn name(&self) -> &str {
        "exact_match"
    }

    fn required_fields(&self) -> &[ExampleField] {
        ANSWER_AND_REFERENCE
    }

    async fn score(&self, example: &EvaluationExample) -> Result<MetricScore, ScoreError> {
        Ok(MetricScore::new(exact_match(
            example.answer_text(),
            example.reference_text(),
        )))
    }
}

/// Contains metric.
///
/// Returns 1.0 if the normalized reference is contained within
/// the normalized answer, 0.0 otherwise.
///
/// This is useful when the system may provide additional context
/// around the correct answer.
///
/// # Example
///
/// ```
/// use rag_eval::metrics::lexical::contains;
///
/// // Reference is contained in the answer
/// assert_eq!(contains("The capital of France is Paris.", "Paris"), 1.0);
///
/// // Reference is not contained
/// assert_eq!(contains("London is a city", "Paris"), 0.0);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct Contains;

/// Score function behind [`Contains`].
pub fn contains(predicted: &str, reference: &str) -> f64 {
    binary(normalize(predicted).contains(&normalize(reference)))
}

#[async_trait]
impl Metric for Contains {
    fn name(&self) -> &str {
        "contains"
    }

    fn required_fields(&self) -> &[ExampleField] {
        ANSWER_AND_REFERENCE
    }

    async fn score(&self, example: &EvaluationExample) -> Result<MetricScore, ScoreError> {
        Ok(MetricScore::new(contains(
            example.answer_text(),
            example.reference_text(),
        )))
    }
}

/// Keyword match: 1.0 when any expected keyword appears in the answer,
/// compared case-insensitively.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordMatch;

#[async_trait]
impl Metric for KeywordMatch {
    fn name(&self) -> &str {
        "keyword_match"
    }

    fn required_fields(&self) -> &[ExampleField] {
        &[ExampleField::GeneratedAnswer, ExampleField::Keywords]
    }

    async fn score(&self, example: &EvaluationExample) -> Result<MetricScore, ScoreError> {
        let answer = example.answer_text().to_lowercase();
        let keywords = example.keywords.as_deref().unwrap_or_default();

        let matched: Vec<&str> = keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty() && answer.contains(&k.to_lowercase()))
            .collect();

        let score = if matched.is_empty() {
            MetricScore::new(0.0).with_reason(format!(
                "none of the keywords found: {}",
                keywords.join(", ")
            ))
        } else {
            MetricScore::new(1.0).with_reason(format!("matched: {}", matched.join(", ")))
        };
        Ok(score)
    }
}

/// ROUGE-N F1 for a fixed n.
#[derive(Debug, Clone)]
pub struct RougeN {
    n: usize,
    name: String,
}

impl RougeN {
    /// ROUGE-N for an arbitrary n (min 1); named `rouge{n}`.
    pub fn new(n: usize) -> Self {
        let n = n.max(1);
        Self {
            n,
            name: format!("rouge{}", n),
        }
    }

    /// Unigram overlap.
    pub fn rouge1() -> Self {
        Self::new(1)
    }

    /// Bigram overlap.
    pub fn rouge2() -> Self {
        Self::new(2)
    }
}

#[async_trait]
impl Metric for RougeN {
    fn name(&self) -> &str {
        &self.name
    }

    fn required_fields(&self) -> &[ExampleField] {
        ANSWER_AND_REFERENCE
    }

    async fn score(&self, example: &EvaluationExample) -> Result<MetricScore, ScoreError> {
        Ok(MetricScore::new(rouge_n(
            example.answer_text(),
            example.reference_text(),
            self.n,
        )))
    }
}

/// ROUGE-L F1.
#[derive(Debug, Clone, Copy, Default)]
pub struct RougeL;

#[async_trait]
impl Metric for RougeL {
    fn name(&self) -> &str {
        "rouge_l"
    }

    fn required_fields(&self) -> &[ExampleField] {
        ANSWER_AND_REFERENCE
    }

    async fn score(&self, example: &EvaluationExample) -> Result<MetricScore, ScoreError> {
        Ok(MetricScore::new(rouge_l(
            example.answer_text(),
            example.reference_text(),
        )))
    }
}
