//! Evaluation results and run reports.
//!
//! This module contains the output types for evaluation runs,
//! designed for JSON/CSV serialization and programmatic consumption.

use crate::example::EvaluationExample;
use chrono::{DateTime, Utc};
use rag_eval_core::format_duration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Outcome of one (example, metric) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Pass,
    Fail,
    Error,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Status::Pass => "PASS",
            Status::Fail => "FAIL",
            Status::Error => "ERROR",
        };
        f.write_str(label)
    }
}

/// Score of one example under one metric.
///
/// `value` and `threshold` are `None` exactly when `status` is ERROR.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    /// Dataset index of the example
    pub example_index: usize,

    /// Example label, when the dataset has one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub example_id: Option<String>,

    /// Example group, when the dataset has one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,

    /// Metric name
    pub metric: String,

    /// Score, absent on error
    pub value: Option<f64>,

    pub status: Status,

    /// Threshold the value was compared against
    pub threshold: Option<f64>,

    /// Judge explanation or error message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// The question asked
    pub question: String,

    /// The answer scored
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,

    /// Time spent scoring, retries included
    #[serde(with = "duration_serde")]
    pub duration: Duration,
}

impl ScoreRecord {
    /// Create a record for a computed score.
    pub fn scored(
        example: &EvaluationExample,
        metric: &str,
        value: f64,
        threshold: f64,
        reason: Option<String>,
        duration: Duration,
    ) -> Self {
        let status = if value >= threshold {
            Status::Pass
        } else {
            Status::Fail
        };
        Self {
            value: Some(value),
            status,
            threshold: Some(threshold),
            reason,
            duration,
            ..Self::base(example, metric)
        }
    }

    /// Create an ERROR record.
    pub fn error(
        example: &EvaluationExample,
        metric: &str,
        reason: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            reason: Some(reason.into()),
            duration,
            ..Self::base(example, metric)
        }
    }

    fn base(example: &EvaluationExample, metric: &str) -> Self {
        Self {
            example_index: example.index,
            example_id: example.id.clone(),
            group: example.group.clone(),
            metric: metric.to_string(),
            value: None,
            status: Status::Error,
            threshold: None,
            reason: None,
            question: example.question.clone(),
            response: example.generated_answer.clone(),
            duration: Duration::ZERO,
        }
    }

    /// Whether the pair could not be scored.
    pub fn is_error(&self) -> bool {
        self.status == Status::Error
    }
}

/// Pipeline stage at which an example failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStage {
    /// Setup script failed
    Setup,
    /// Querying or generating the answer failed
    Answer,
    /// The run was cancelled before the example was scored
    Cancelled,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureStage::Setup => "setup",
            FailureStage::Answer => "answer",
            FailureStage::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// An example that did not make it through the pipeline intact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExampleFailure {
    pub example_index: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub example_id: Option<String>,

    pub stage: FailureStage,

    pub message: String,
}

impl ExampleFailure {
    pub fn new(example: &EvaluationExample, stage: FailureStage, message: impl Into<String>) -> Self {
        Self {
            example_index: example.index,
            example_id: example.id.clone(),
            stage,
            message: message.into(),
        }
    }
}

/// Pass/fail/error counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,

    /// Passed as a percentage of total, to two decimals
    pub success_rate: f64,
}

impl StatusCounts {
    /// Count statuses.
    pub fn from_statuses(statuses: impl IntoIterator<Item = Status>) -> Self {
        let mut counts = Self::default();
        for status in statuses {
            counts.total += 1;
            match status {
                Status::Pass => counts.passed += 1,
                Status::Fail => counts.failed += 1,
                Status::Error => counts.errored += 1,
            }
        }
        counts.success_rate = if counts.total > 0 {
            let rate = counts.passed as f64 / counts.total as f64 * 100.0;
            (rate * 100.0).round() / 100.0
        } else {
            0.0
        };
        counts
    }
}

/// Aggregate statistics for one metric.
///
/// Value statistics cover scored (non-ERROR) records only and are `None`
/// when there are none.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    /// Records for this metric
    pub count: usize,
    /// Records with a value
    pub scored: usize,
    pub errored: usize,
    pub passed: usize,
    pub failed: usize,

    /// Passed as a fraction of scored
    pub pass_rate: Option<f64>,

    pub mean: Option<f64>,
    /// Population standard deviation
    pub std_dev: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub p50: Option<f64>,
    pub p90: Option<f64>,
    pub p95: Option<f64>,
}

impl MetricSummary {
    /// Summarize records of a single metric.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a ScoreRecord>) -> Self {
        let mut summary = Self::default();
        let mut values = Vec::new();

        for record in records {
            summary.count += 1;
            match record.status {
                Status::Pass => summary.passed += 1,
                Status::Fail => summary.failed += 1,
                Status::Error => summary.errored += 1,
            }
            if let Some(value) = record.value {
                values.push(value);
            }
        }
        summary.scored = values.len();
        if values.is_empty() {
            return summary;
        }

        values.sort_by(|a, b| a.total_cmp(b));
        let n = values.len() as f64;
        let min = values[0];
        let max = values[values.len() - 1];
        let mean = (values.iter().sum::<f64>() / n).clamp(min, max);
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

        summary.pass_rate = Some(summary.passed as f64 / n);
        summary.mean = Some(mean);
        summary.std_dev = Some(variance.sqrt());
        summary.min = Some(min);
        summary.max = Some(max);
        summary.p50 = percentile(&values, 50.0);
        summary.p90 = percentile(&values, 90.0);
        summary.p95 = percentile(&values, 95.0);
        summary
    }
}

/// Percentile of sorted values by linear interpolation between ranks.
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    let (first, last) = (*sorted.first()?, *sorted.last()?);
    let rank = (p.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let value = sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64);
    Some(value.clamp(first, last))
}

/// Identifying information for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    /// Unique run identifier (UUID v4)
    pub run_id: String,

    /// Name of the dataset used
    pub dataset: String,

    /// Provider of the system under test
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    /// Model of the system under test
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Judge model, when judge metrics ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub judge: Option<String>,

    pub tool_version: String,

    pub started_at: DateTime<Utc>,

    /// Wall-clock duration of the run
    #[serde(with = "duration_serde")]
    pub duration: Duration,

    /// Whether the run was cut short
    pub cancelled: bool,
}

impl RunMetadata {
    /// Metadata for a run starting now.
    pub fn new(dataset: impl Into<String>) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            dataset: dataset.into(),
            provider: None,
            model: None,
            judge: None,
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: Utc::now(),
            duration: Duration::ZERO,
            cancelled: false,
        }
    }

    /// Record the provider and model under test.
    #[must_use]
    pub fn with_target(mut self, provider: impl Into<String>, model: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self.model = Some(model.into());
        self
    }

    /// Record the judge model.
    #[must_use]
    pub fn with_judge(mut self, judge: impl Into<String>) -> Self {
        self.judge = Some(judge.into());
        self
    }
}

/// Report of an entire evaluation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub metadata: RunMetadata,

    /// Examples in the run, including failed and cancelled ones
    pub total_examples: usize,

    /// Status counts over all records
    pub totals: StatusCounts,

    /// Per-metric statistics, keyed by metric name
    pub metrics: BTreeMap<String, MetricSummary>,

    /// Status counts per example group
    pub by_group: BTreeMap<String, StatusCounts>,

    /// Examples that failed before scoring
    pub failures: Vec<ExampleFailure>,

    /// Individual records, ordered by example then metric
    pub records: Vec<ScoreRecord>,
}

impl RunReport {
    /// Build a report from records.
    ///
    /// Records are stably sorted by example index, so records of one
    /// example keep their metric order.
    pub fn from_records(
        metadata: RunMetadata,
        total_examples: usize,
        mut records: Vec<ScoreRecord>,
        mut failures: Vec<ExampleFailure>,
    ) -> Self {
        records.sort_by_key(|r| r.example_index);
        failures.sort_by_key(|f| f.example_index);

        let totals = StatusCounts::from_statuses(records.iter().map(|r| r.status));

        let mut per_metric: BTreeMap<String, Vec<&ScoreRecord>> = BTreeMap::new();
        let mut per_group: BTreeMap<String, Vec<Status>> = BTreeMap::new();
        for record in &records {
            per_metric
                .entry(record.metric.clone())
                .or_default()
                .push(record);
            if let Some(group) = &record.group {
                per_group.entry(group.clone()).or_default().push(record.status);
            }
        }

        let metrics = per_metric
            .into_iter()
            .map(|(name, records)| (name, MetricSummary::from_records(records)))
            .collect();
        let by_group = per_group
            .into_iter()
            .map(|(group, statuses)| (group, StatusCounts::from_statuses(statuses)))
            .collect();

        Self {
            metadata,
            total_examples,
            totals,
            metrics,
            by_group,
            failures,
            records,
        }
    }

    /// A report for a run with no examples.
    pub fn empty(metadata: RunMetadata) -> Self {
        Self::from_records(metadata, 0, Vec::new(), Vec::new())
    }

    /// Whether the run was cancelled before completing.
    pub fn is_cancelled(&self) -> bool {
        self.metadata.cancelled
    }

    /// Print a summary to stdout.
    pub fn print_summary(&self) {
        println!();
        println!("=== Evaluation Summary ===");
        println!("Run: {}", self.metadata.run_id);
        println!("Dataset: {}", self.metadata.dataset);
        if let (Some(provider), Some(model)) = (&self.metadata.provider, &self.metadata.model) {
            println!("Target: {}/{}", provider, model);
        }
        if let Some(judge) = &self.metadata.judge {
            println!("Judge: {}", judge);
        }
        if self.metadata.cancelled {
            println!("Status: CANCELLED (partial results)");
        }
        println!();
        println!(
            "Examples: {} total, {} failed before scoring",
            self.total_examples,
            self.failures.len()
        );
        println!(
            "Records: {} total, {} passed, {} failed, {} errored",
            self.totals.total, self.totals.passed, self.totals.failed, self.totals.errored
        );
        println!("Success rate: {:.1}%", self.totals.success_rate);
        println!();

        if !self.metrics.is_empty() {
            println!("Metrics:");
            for (name, summary) in &self.metrics {
                match (summary.mean, summary.p50, summary.std_dev) {
                    (Some(mean), Some(p50), Some(std_dev)) => println!(
                        "  {}: mean {:.3}, p50 {:.3}, std {:.3} ({}/{} passed, {} errors)",
                        name,
                        mean,
                        p50,
                        std_dev,
                        summary.passed,
                        summary.scored,
                        summary.errored
                    ),
                    _ => println!("  {}: no scores ({} errors)", name, summary.errored),
                }
            }
            println!();
        }

        if !self.by_group.is_empty() {
            println!("Groups:");
            for (group, counts) in &self.by_group {
                println!(
                    "  {}: {}/{} passed ({:.1}%)",
                    group, counts.passed, counts.total, counts.success_rate
                );
            }
            println!();
        }

        println!("Duration: {}", format_duration(self.metadata.duration));
    }

    /// Write the report to a JSON file.
    pub fn write_json(&self, path: &Path) -> Result<(), std::io::Error> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }

    /// Read a report written by [`RunReport::write_json`].
    pub fn read_json(path: &Path) -> Result<Self, std::io::Error> {
        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Write the JSON and CSV reports into `dir`, creating it.
    ///
    /// Files are named after the run start time and the leading characters
    /// of the run id, so runs started in the same second stay apart.
    /// Returns the JSON and CSV paths.
    pub fn write_to_dir(&self, dir: &Path) -> Result<(PathBuf, PathBuf), std::io::Error> {
        std::fs::create_dir_all(dir)?;
        let short_id: String = self
            .metadata
            .run_id
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .take(8)
            .collect();
        let stem = format!(
            "evaluation_{}_{}",
            self.metadata.started_at.format("%Y%m%d_%H%M%S"),
            short_id
        );
        let json_path = dir.join(format!("{}_summary.json", stem));
        let csv_path = dir.join(format!("{}_detailed.csv", stem));
        self.write_json(&json_path)?;
        self.write_csv(&csv_path)?;
        Ok((json_path, csv_path))
    }

    /// Write one CSV row per record.
    pub fn write_csv(&self, path: &Path) -> Result<(), std::io::Error> {
        let mut writer = csv::Writer::from_path(path).map_err(std::io::Error::other)?;
        for record in &self.records {
            writer
                .serialize(CsvRow::from(record))
                .map_err(std::io::Error::other)?;
        }
        writer.flush()
    }
}

/// Output directory for one target: `<base>/<provider>/<model>`.
///
/// Components are sanitized so the result always stays under `base`.
pub fn target_dir(base: &Path, provider: &str, model: &str) -> PathBuf {
    base.join(sanitize_component(provider))
        .join(sanitize_component(model))
}

fn sanitize_component(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.replace("..", "_");
    let cleaned = cleaned.trim_matches('.');
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Print a side-by-side comparison of runs over the same dataset.
pub fn print_comparison(reports: &[RunReport]) {
    if reports.is_empty() {
        return;
    }

    let label = |report: &RunReport| match (&report.metadata.provider, &report.metadata.model) {
        (Some(provider), Some(model)) => format!("{}/{}", provider, model),
        _ => report.metadata.dataset.clone(),
    };
    let width = reports
        .iter()
        .map(|r| label(r).len())
        .max()
        .unwrap_or(0)
        .max("Target".len());

    println!();
    println!("=== Comparison ===");
    println!(
        "{:<width$}  {:>6}  {:>6}  {:>6}  {:>8}",
        "Target",
        "Pass",
        "Fail",
        "Error",
        "Success",
        width = width
    );
    for report in reports {
        let cancelled = if report.is_cancelled() { " (cancelled)" } else { "" };
        println!(
            "{:<width$}  {:>6}  {:>6}  {:>6}  {:>7.1}%{}",
            label(report),
            report.totals.passed,
            report.totals.failed,
            report.totals.errored,
            report.totals.success_rate,
            cancelled,
            width = width
        );
    }

    let mut names: Vec<&str> = reports
        .iter()
        .flat_map(|r| r.metrics.keys().map(String::as_str))
        .collect();
    names.sort_unstable();
    names.dedup();
    if names.is_empty() {
        return;
    }

    println!();
    println!("Mean scores:");
    for name in names {
        let means: Vec<String> = reports
            .iter()
            .map(|r| match r.metrics.get(name).and_then(|m| m.mean) {
                Some(mean) => format!("{}={:.3}", label(r), mean),
                None => format!("{}=n/a", label(r)),
            })
            .collect();
        println!("  {}: {}", name, means.join(", "));
    }
}

#[derive(Serialize)]
struct CsvRow<'a> {
    example_index: usize,
    example_id: &'a str,
    group: &'a str,
    metric: &'a str,
    status: Status,
    value: Option<f64>,
    threshold: Option<f64>,
    reason: &'a str,
    question: &'a str,
    response: &'a str,
    duration_secs: f64,
}

impl<'a> From<&'a ScoreRecord> for CsvRow<'a> {
    fn from(record: &'a ScoreRecord) -> Self {
        Self {
            example_index: record.example_index,
            example_id: record.example_id.as_deref().unwrap_or_default(),
            group: record.group.as_deref().unwrap_or_default(),
            metric: &record.metric,
            status: record.status,
            value: record.value,
            threshold: record.threshold,
            reason: record.reason.as_deref().unwrap_or_default(),
            question: &record.question,
            response: record.response.as_deref().unwrap_or_default(),
            duration_secs: record.duration.as_secs_f64(),
        }
    }
}

/// Custom serde for Duration to serialize as seconds (f64).
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(secs))
    }
}
