//! Dataset loading for evaluation.
//!
//! Provides the [`Dataset`] trait, a file loader for JSON, JSON Lines and
//! YAML datasets, and an in-memory dataset for programmatic runs.
//!
//! YAML datasets may use the grouped layout, where each entry is a
//! conversation group whose turns become examples:
//!
//! ```yaml
//! - conversation_group: pods
//!   setup_script: scripts/create_pod.sh
//!   cleanup_script: scripts/delete_pod.sh
//!   conversation:
//!     - eval_id: list
//!       eval_query: How do I list pods?
//!       eval_type: sub-string
//!       expected_keywords: ["oc get pods"]
//! ```

use crate::example::EvaluationExample;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use uuid::Uuid;

/// Accepted `eval_type` values and the metric each maps to.
pub const EVAL_TYPES: &[(&str, &str)] = &[
    ("judge-llm", "answer_correctness"),
    ("sub-string", "keyword_match"),
    ("script", "script"),
];

/// Errors that can occur when loading datasets.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DatasetError {
    /// Failed to read dataset file
    #[error("Failed to read dataset: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse dataset
    #[error("Failed to parse dataset: {0}")]
    Parse(String),

    /// An entry failed validation
    #[error("Invalid dataset entry {entry}: {message}")]
    Invalid { entry: String, message: String },

    /// File extension not recognised
    #[error("Unsupported dataset format: {0}")]
    UnsupportedFormat(String),
}

impl DatasetError {
    fn invalid(entry: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            entry: entry.into(),
            message: message.into(),
        }
    }
}

/// Trait for evaluation datasets.
///
/// Implement this trait to add support for custom datasets.
///
/// # Example
///
/// ```text
/// struct MyDataset {
///     path: PathBuf,
/// }
///
/// impl Dataset for MyDataset {
///     fn name(&self) -> &str {
///         "my_dataset"
///     }
///
///     async fn load(&self, sample_size: Option<usize>) -> Result<Vec<EvaluationExample>, DatasetError> {
///         // Load examples from self.path
///         // ...
///     }
/// }
/// ```
pub trait Dataset: Send + Sync {
    /// The name of this dataset (used in reports).
    fn name(&self) -> &str;

    /// Load examples from the dataset.
    ///
    /// If `sample_size` is specified, return at most that many examples,
    /// taken from the start of the dataset.
    fn load(
        &self,
        sample_size: Option<usize>,
    ) -> impl std::future::Future<Output = Result<Vec<EvaluationExample>, DatasetError>> + Send;
}

/// On-disk dataset encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetFormat {
    /// A JSON array of objects
    Json,
    /// One JSON object per line
    JsonLines,
    /// A YAML list, flat or grouped
    Yaml,
}

impl DatasetFormat {
    /// Detect the format from a file extension.
    pub fn from_path(path: &Path) -> Result<Self, DatasetError> {
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_ascii_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "json" => Ok(Self::Json),
            "jsonl" | "ndjson" => Ok(Self::JsonLines),
            "yaml" | "yml" => Ok(Self::Yaml),
            _ => Err(DatasetError::UnsupportedFormat(format!(
                "{:?} (expected .json, .jsonl or .yaml)",
                path
            ))),
        }
    }
}

/// A dataset loaded from a local file.
///
/// Relative script paths inside the file resolve against the file's
/// directory.
///
/// # Example
///
/// ```no_run
/// use rag_eval::{Dataset, FileDataset};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let dataset = FileDataset::new("eval_data.yaml");
/// let examples = dataset.load(Some(10)).await?;
/// println!("Loaded {} examples", examples.len());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct FileDataset {
    path: PathBuf,
    name: String,
    format: Option<DatasetFormat>,
}

impl FileDataset {
    /// Create a dataset from a file; the name is the file stem.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("dataset")
            .to_string();

        Self {
            path,
            name,
            format: None,
        }
    }

    /// Create a dataset with a custom name.
    pub fn with_name(path: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            format: None,
        }
    }

    /// Override extension-based format detection.
    #[must_use]
    pub fn with_format(mut self, format: DatasetFormat) -> Self {
        self.format = Some(format);
        self
    }

    /// Get the file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Dataset for FileDataset {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load(&self, sample_size: Option<usize>) -> Result<Vec<EvaluationExample>, DatasetError> {
        let format = match self.format {
            Some(format) => format,
            None => DatasetFormat::from_path(&self.path)?,
        };

        let content = fs::read_to_string(&self.path).await?;
        let base_dir = self.path.parent().unwrap_or(Path::new("."));

        let mut examples = parse_examples(&content, format, base_dir)?;
        log::debug!("Loaded {} examples from {:?}", examples.len(), self.path);

        if let Some(size) = sample_size {
            examples.truncate(size);
        }

        Ok(examples)
    }
}

/// A dataset held in memory.
#[derive(Debug, Clone)]
pub struct InMemoryDataset {
    name: String,
    examples: Vec<EvaluationExample>,
}

impl InMemoryDataset {
    /// Create a dataset; indices are reassigned in order.
    pub fn new(name: impl Into<String>, examples: Vec<EvaluationExample>) -> Self {
        let examples = examples
            .into_iter()
            .enumerate()
            .map(|(index, example)| EvaluationExample { index, ..example })
            .collect();

        Self {
            name: name.into(),
            examples,
        }
    }

    /// Number of examples.
    pub fn len(&self) -> usize {
        self.examples.len()
    }

    /// Whether the dataset has no examples.
    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }
}

impl Dataset for InMemoryDataset {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load(&self, sample_size: Option<usize>) -> Result<Vec<EvaluationExample>, DatasetError> {
        let take = sample_size.unwrap_or(self.examples.len());
        Ok(self.examples.iter().take(take).cloned().collect())
    }
}

/// Write examples as a pretty JSON array that loads back as a dataset.
pub async fn save_examples(path: &Path, examples: &[EvaluationExample]) -> Result<(), DatasetError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }
    let json =
        serde_json::to_string_pretty(examples).map_err(|e| DatasetError::Parse(e.to_string()))?;
    fs::write(path, json).await?;
    Ok(())
}

/// Parse and validate dataset content.
///
/// Indices are assigned in file order after grouped entries are expanded.
pub fn parse_examples(
    content: &str,
    format: DatasetFormat,
    base_dir: &Path,
) -> Result<Vec<EvaluationExample>, DatasetError> {
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }

    let entries = match format {
        DatasetFormat::Json => {
            let value: Value =
                serde_json::from_str(content).map_err(|e| DatasetError::Parse(e.to_string()))?;
            into_list(value)?
        }
        DatasetFormat::JsonLines => content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                serde_json::from_str(line)
                    .map_err(|e| DatasetError::Parse(format!("line {}: {}", n + 1, e)))
            })
            .collect::<Result<Vec<Value>, _>>()?,
        DatasetFormat::Yaml => {
            // A comment-only document is null
            let value: Option<Value> =
                serde_yaml::from_str(content).map_err(|e| DatasetError::Parse(e.to_string()))?;
            match value {
                Some(value) => into_list(value)?,
                None => Vec::new(),
            }
        }
    };

    let mut examples = Vec::new();
    for (n, entry) in entries.into_iter().enumerate() {
        if entry.get("conversation").is_some() {
            examples.extend(expand_group(entry, n, base_dir)?);
        } else {
            examples.push(parse_entry(entry, &format!("#{}", n), base_dir)?);
        }
    }

    for (index, example) in examples.iter_mut().enumerate() {
        example.index = index;
    }

    Ok(examples)
}

fn into_list(value: Value) -> Result<Vec<Value>, DatasetError> {
    match value {
        Value::Array(items) => Ok(items),
        other => Err(DatasetError::Parse(format!(
            "expected a list of entries, found {}",
            value_kind(&other)
        ))),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

#[derive(Deserialize)]
struct ConversationGroup {
    conversation_group: String,
    #[serde(default)]
    setup_script: Option<PathBuf>,
    #[serde(default)]
    cleanup_script: Option<PathBuf>,
    #[serde(default)]
    conversation_id: Option<String>,
    conversation: Vec<Value>,
}

fn expand_group(
    entry: Value,
    n: usize,
    base_dir: &Path,
) -> Result<Vec<EvaluationExample>, DatasetError> {
    let group: ConversationGroup = serde_json::from_value(entry)
        .map_err(|e| DatasetError::invalid(format!("group #{}", n), e.to_string()))?;

    let name = group.conversation_group.trim().to_string();
    if name.is_empty() {
        return Err(DatasetError::invalid(
            format!("group #{}", n),
            "conversation_group cannot be empty",
        ));
    }
    if group.conversation.is_empty() {
        return Err(DatasetError::invalid(
            format!("group '{}'", name),
            "conversation cannot be empty",
        ));
    }

    let setup = group
        .setup_script
        .map(|p| resolve_script(p, base_dir, &name, "setup_script"))
        .transpose()?;
    let cleanup = group
        .cleanup_script
        .map(|p| resolve_script(p, base_dir, &name, "cleanup_script"))
        .transpose()?;

    // Every turn continues the same conversation upstream
    let conversation_id = group
        .conversation_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let last = group.conversation.len() - 1;
    let mut seen_ids = HashSet::new();
    let mut turns = Vec::with_capacity(group.conversation.len());

    for (turn, value) in group.conversation.into_iter().enumerate() {
        let label = format!("{}/#{}", name, turn);
        let mut example = parse_entry(value, &label, base_dir)?;

        if let Some(id) = &example.id {
            if !seen_ids.insert(id.clone()) {
                return Err(DatasetError::invalid(
                    format!("group '{}'", name),
                    format!("duplicate eval_id '{}'", id),
                ));
            }
        }

        example.group = Some(name.clone());
        example.conversation_id = Some(conversation_id.clone());
        if turn == 0 && example.setup_script.is_none() {
            example.setup_script = setup.clone();
        }
        if turn == last && example.cleanup_script.is_none() {
            example.cleanup_script = cleanup.clone();
        }
        turns.push(example);
    }

    Ok(turns)
}

fn parse_entry(
    value: Value,
    label: &str,
    base_dir: &Path,
) -> Result<EvaluationExample, DatasetError> {
    let eval_type = value
        .get("eval_type")
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string());

    let mut example: EvaluationExample =
        serde_json::from_value(value).map_err(|e| DatasetError::invalid(label, e.to_string()))?;
    let label = example
        .id
        .as_deref()
        .map(String::from)
        .unwrap_or_else(|| label.to_string());

    if example.question.trim().is_empty() {
        return Err(DatasetError::invalid(&label, "question cannot be empty"));
    }

    if let Some(keywords) = example.keywords.take() {
        let cleaned: Vec<String> = keywords
            .into_iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        example.keywords = (!cleaned.is_empty()).then_some(cleaned);
    }

    for (field, script) in [
        ("verify_script", &mut example.verify_script),
        ("setup_script", &mut example.setup_script),
        ("cleanup_script", &mut example.cleanup_script),
    ] {
        if let Some(path) = script.take() {
            *script = Some(resolve_script(path, base_dir, &label, field)?);
        }
    }

    if let Some(eval_type) = eval_type {
        apply_eval_type(&mut example, &eval_type, &label)?;
    }

    Ok(example)
}

fn apply_eval_type(
    example: &mut EvaluationExample,
    eval_type: &str,
    label: &str,
) -> Result<(), DatasetError> {
    let Some((_, metric)) = EVAL_TYPES.iter().find(|(name, _)| *name == eval_type) else {
        let valid: Vec<&str> = EVAL_TYPES.iter().map(|(name, _)| *name).collect();
        return Err(DatasetError::invalid(
            label,
            format!(
                "eval_type '{}' is not one of: {}",
                eval_type,
                valid.join(", ")
            ),
        ));
    };

    let requirement = match eval_type {
        "judge-llm" if example.reference_answer.is_none() => {
            Some("expected_response is required for judge-llm evaluation")
        }
        "sub-string" if example.keywords.is_none() => {
            Some("expected_keywords cannot be empty after filtering")
        }
        "script" if example.verify_script.is_none() => {
            Some("eval_verify_script is required for script evaluation")
        }
        _ => None,
    };
    if let Some(message) = requirement {
        return Err(DatasetError::invalid(label, message));
    }

    let metrics = example.metrics.get_or_insert_with(Vec::new);
    if !metrics.iter().any(|m| m == metric) {
        metrics.push(metric.to_string());
    }
    Ok(())
}

fn resolve_script(
    path: PathBuf,
    base_dir: &Path,
    label: &str,
    field: &str,
) -> Result<PathBuf, DatasetError> {
    let resolved = if path.is_absolute() {
        path
    } else {
        base_dir.join(path)
    };

    if !resolved.is_file() {
        return Err(DatasetError::invalid(
            label,
            format!("{} {:?} does not exist or is not a file", field, resolved),
        ));
    }
    Ok(resolved)
}
