//! The unit of evaluation: one question with its reference data and,
//! once the answer stage has run, the answer under test.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// A single evaluation example.
///
/// Identity is the dataset row `index`, assigned at load time in file
/// order. `id` is an optional human-readable label.
///
/// Field aliases accept the common dataset layouts (`query`/`eval_query`,
/// `expected_response`/`ground_truth`/`answer`, `contexts`, `response`, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationExample {
    /// Position in the dataset
    #[serde(default)]
    pub index: usize,

    /// Optional label
    #[serde(
        default,
        alias = "eval_id",
        alias = "turn_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<String>,

    /// The question sent to the system under test
    #[serde(alias = "query", alias = "eval_query")]
    pub question: String,

    /// Expected answer
    #[serde(
        default,
        alias = "expected_response",
        alias = "ground_truth",
        alias = "answer",
        skip_serializing_if = "Option::is_none"
    )]
    pub reference_answer: Option<String>,

    /// Keywords any of which should appear in the answer
    #[serde(
        default,
        alias = "expected_keywords",
        skip_serializing_if = "Option::is_none"
    )]
    pub keywords: Option<Vec<String>>,

    /// Context chunks retrieved for the question
    #[serde(
        default,
        alias = "contexts",
        skip_serializing_if = "Option::is_none"
    )]
    pub retrieved_context: Option<Vec<String>>,

    /// The answer under test
    #[serde(
        default,
        alias = "response",
        skip_serializing_if = "Option::is_none"
    )]
    pub generated_answer: Option<String>,

    /// Conversation group or category, used for grouped statistics
    #[serde(
        default,
        alias = "conversation_group",
        skip_serializing_if = "Option::is_none"
    )]
    pub group: Option<String>,

    /// Conversation identifier forwarded to the RAG service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,

    /// Restrict scoring of this example to these metrics
    #[serde(
        default,
        alias = "turn_metrics",
        skip_serializing_if = "Option::is_none"
    )]
    pub metrics: Option<Vec<String>>,

    /// Script whose exit status verifies the outcome
    #[serde(
        default,
        alias = "eval_verify_script",
        skip_serializing_if = "Option::is_none"
    )]
    pub verify_script: Option<PathBuf>,

    /// Script run before the example is answered
    #[serde(
        default,
        alias = "eval_setup_script",
        skip_serializing_if = "Option::is_none"
    )]
    pub setup_script: Option<PathBuf>,

    /// Script run after the example is scored
    #[serde(
        default,
        alias = "eval_cleanup_script",
        skip_serializing_if = "Option::is_none"
    )]
    pub cleanup_script: Option<PathBuf>,
}

impl EvaluationExample {
    /// Create an example with just a question.
    pub fn new(index: usize, question: impl Into<String>) -> Self {
        Self {
            index,
            question: question.into(),
            ..Self::default()
        }
    }

    /// Set the label.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the reference answer.
    #[must_use]
    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference_answer = Some(reference.into());
        self
    }

    /// Set the answer under test.
    #[must_use]
    pub fn with_answer(mut self, answer: impl Into<String>) -> Self {
        self.generated_answer = Some(answer.into());
        self
    }

    /// Set the retrieved context.
    #[must_use]
    pub fn with_context(mut self, context: Vec<String>) -> Self {
        self.retrieved_context = Some(context);
        self
    }

    /// Set the expected keywords.
    #[must_use]
    pub fn with_keywords(mut self, keywords: Vec<String>) -> Self {
        self.keywords = Some(keywords);
        self
    }

    /// Set the group.
    #[must_use]
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Restrict scoring to the named metrics.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Vec<String>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Set the verification script.
    #[must_use]
    pub fn with_verify_script(mut self, path: impl Into<PathBuf>) -> Self {
        self.verify_script = Some(path.into());
        self
    }

    /// Human-readable label: the id when present, otherwise `#<index>`.
    pub fn label(&self) -> String {
        match &self.id {
            Some(id) => id.clone(),
            None => format!("#{}", self.index),
        }
    }

    /// Check whether a field is populated (non-blank text, non-empty list).
    pub fn has(&self, field: ExampleField) -> bool {
        fn text(value: &Option<String>) -> bool {
            value.as_deref().is_some_and(|s| !s.trim().is_empty())
        }
        fn list(value: &Option<Vec<String>>) -> bool {
            value
                .as_ref()
                .is_some_and(|items| items.iter().any(|s| !s.trim().is_empty()))
        }

        match field {
            ExampleField::Question => !self.question.trim().is_empty(),
            ExampleField::GeneratedAnswer => text(&self.generated_answer),
            ExampleField::ReferenceAnswer => text(&self.reference_answer),
            ExampleField::RetrievedContext => list(&self.retrieved_context),
            ExampleField::Keywords => list(&self.keywords),
            ExampleField::VerifyScript => self.verify_script.is_some(),
        }
    }

    /// First field from `fields` that is not populated.
    pub fn first_missing(&self, fields: &[ExampleField]) -> Option<ExampleField> {
        fields.iter().copied().find(|field| !self.has(*field))
    }

    /// Answer text, or empty when not yet answered.
    pub fn answer_text(&self) -> &str {
        self.generated_answer.as_deref().unwrap_or_default()
    }

    /// Reference text, or empty when absent.
    pub fn reference_text(&self) -> &str {
        self.reference_answer.as_deref().unwrap_or_default()
    }

    /// Retrieved context, or an empty slice.
    pub fn context(&self) -> &[String] {
        self.retrieved_context.as_deref().unwrap_or_default()
    }
}

/// Example fields a metric can depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExampleField {
    Question,
    GeneratedAnswer,
    ReferenceAnswer,
    RetrievedContext,
    Keywords,
    VerifyScript,
}

impl fmt::Display for ExampleField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExampleField::Question => "question",
            ExampleField::GeneratedAnswer => "generated_answer",
            ExampleField::ReferenceAnswer => "reference_answer",
            ExampleField::RetrievedContext => "retrieved_context",
            ExampleField::Keywords => "keywords",
            ExampleField::VerifyScript => "verify_script",
        };
        f.write_str(name)
    }
}
