//! Evaluation CLI for RAG services.
//!
//! Query a RAG service or an LLM for answers, score them against reference
//! answers and write JSON and CSV reports.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use rag_eval::config::{ConfigLoader, FileConfig, ModelSection, TargetSection};
use rag_eval::{
    answer_stream, print_comparison, save_examples, target_dir, AnswerGenerator, AnswerOutcome,
    Answerer, Dataset, Driver, DriverConfig, EngineConfig, EvalProgress, EvaluationExample,
    FileDataset, MetricBackends, MetricRegistry, MetricSet, ProvidedAnswers, QueryConfig,
    QueryRunner, RunMetadata, RunReport, ScriptRunner,
};
use rag_eval_core::{ChatModel, Embedder, HttpChatModel, HttpEmbedder, RagHttpClient, RetryPolicy};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const DEFAULT_CONCURRENCY: usize = 5;
const DEFAULT_OUTPUT_DIR: &str = "eval_output";

/// Evaluation CLI for RAG services.
#[derive(Parser, Debug)]
#[command(name = "rag-eval")]
#[command(about = "Evaluate RAG services against reference answers")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Config file (default: ~/.rag-eval/config.toml merged with ./rag-eval.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Answer a dataset and score the answers
    #[command(visible_alias = "eval")]
    Evaluate(EvaluateArgs),

    /// Query the RAG service and save the answered dataset
    #[command(alias = "query_rag")]
    QueryRag(QueryArgs),

    /// Generate answers with an LLM and save the answered dataset
    #[command(alias = "generate_answers")]
    GenerateAnswers(GenerateArgs),
}

/// Where `evaluate` gets its answers from.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum AnswerSource {
    /// Query the RAG service
    Rag,
    /// Generate answers with an LLM
    Generate,
    /// Use answers already in the dataset
    Dataset,
}

#[derive(Args, Debug, Clone)]
struct DatasetArgs {
    /// Dataset file (JSON, JSON Lines or YAML)
    #[arg(long, short = 'd')]
    dataset: PathBuf,

    /// Number of examples to use (default: all)
    #[arg(long, short = 's')]
    sample: Option<usize>,

    /// Maximum concurrent requests [default: 5]
    #[arg(long)]
    concurrency: Option<usize>,

    /// Retry attempts per failed request [default: 2]
    #[arg(long)]
    retries: Option<u32>,
}

#[derive(Args, Debug, Clone)]
struct RagArgs {
    /// RAG service endpoint [default: http://localhost:8080]
    #[arg(long, env = "RAG_ENDPOINT")]
    endpoint: Option<String>,

    /// File holding the bearer token for the service
    #[arg(long)]
    token_file: Option<PathBuf>,

    /// Provider the service should answer with
    #[arg(long, requires = "model")]
    provider: Option<String>,

    /// Model the service should answer with
    #[arg(long, requires = "provider")]
    model: Option<String>,
}

#[derive(Args, Debug)]
struct EvaluateArgs {
    #[command(flatten)]
    data: DatasetArgs,

    #[command(flatten)]
    rag: RagArgs,

    /// Extra target to evaluate, as PROVIDER/MODEL (repeatable)
    #[arg(long = "target", value_name = "PROVIDER/MODEL")]
    targets: Vec<String>,

    /// Where answers come from
    #[arg(long, value_enum, default_value_t = AnswerSource::Rag)]
    answers: AnswerSource,

    /// Provider for generated answers (with --answers generate)
    #[arg(long)]
    generator_provider: Option<String>,

    /// Model for generated answers (with --answers generate)
    #[arg(long)]
    generator_model: Option<String>,

    /// Judge provider for LLM-as-judge metrics (openai, azure, watsonx, ...)
    #[arg(long)]
    judge_provider: Option<String>,

    /// Judge model for LLM-as-judge metrics
    #[arg(long)]
    judge_model: Option<String>,

    /// OpenAI-compatible embeddings base URL for similarity metrics
    #[arg(long)]
    embedding_url: Option<String>,

    /// Embedding model name
    #[arg(long)]
    embedding_model: Option<String>,

    /// Comma-separated metrics [default: exact_match,contains,rouge1,rouge2,rouge_l]
    #[arg(long, value_delimiter = ',')]
    metrics: Vec<String>,

    /// Pass threshold override, as METRIC=VALUE (repeatable)
    #[arg(long = "threshold", value_name = "METRIC=VALUE")]
    thresholds: Vec<String>,

    /// Kubeconfig exported to dataset scripts
    #[arg(long)]
    kubeconfig: Option<PathBuf>,

    /// Directory for reports [default: eval_output]
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct QueryArgs {
    #[command(flatten)]
    data: DatasetArgs,

    #[command(flatten)]
    rag: RagArgs,

    /// Output file for the answered dataset [default: <output-dir>/<dataset>_answers.json]
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,

    /// Directory for output [default: eval_output]
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct GenerateArgs {
    #[command(flatten)]
    data: DatasetArgs,

    /// LLM provider (openai, azure, watsonx, ...)
    #[arg(long)]
    provider: Option<String>,

    /// LLM model
    #[arg(long)]
    model: Option<String>,

    /// Maximum tokens per answer
    #[arg(long)]
    max_tokens: Option<u32>,

    /// Temperature for generation (0.0-2.0)
    #[arg(long)]
    temperature: Option<f32>,

    /// Output file for the answered dataset [default: <output-dir>/<dataset>_generated.json]
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,

    /// Directory for output [default: eval_output]
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

impl DatasetArgs {
    fn validate(&self) -> Result<(), String> {
        if self.concurrency == Some(0) {
            return Err("concurrency must be greater than 0".to_string());
        }
        if self.sample == Some(0) {
            return Err("sample must be greater than 0".to_string());
        }
        Ok(())
    }

    fn concurrency(&self, file: &FileConfig) -> usize {
        self.concurrency
            .or(file.run.concurrency)
            .unwrap_or(DEFAULT_CONCURRENCY)
            .max(1)
    }

    fn retry_policy(&self, file: &FileConfig) -> RetryPolicy {
        let policy = file.run.to_retry_policy();
        match self.retries {
            Some(retries) => policy.with_max_retries(retries),
            None => policy,
        }
    }

    fn dataset(&self) -> FileDataset {
        FileDataset::new(&self.dataset)
    }
}

impl RagArgs {
    /// The single target given on the command line, if any.
    fn target(&self) -> Option<TargetSection> {
        match (&self.provider, &self.model) {
            (Some(provider), Some(model)) => Some(TargetSection::new(provider, model)),
            _ => None,
        }
    }

    fn client(&self, file: &FileConfig) -> Result<RagHttpClient> {
        let mut rag = file.rag.clone();
        if self.endpoint.is_some() {
            rag.endpoint = self.endpoint.clone();
        }
        if self.token_file.is_some() {
            rag.token_file = self.token_file.clone();
        }
        RagHttpClient::new(rag.to_client_config()).context("Failed to create RAG client")
    }
}

impl EvaluateArgs {
    fn validate(&self) -> Result<(), String> {
        self.data.validate()?;
        for target in &self.targets {
            parse_target(target)?;
        }
        for threshold in &self.thresholds {
            parse_threshold(threshold)?;
        }
        if self.judge_provider.is_some() != self.judge_model.is_some() {
            return Err("--judge-provider and --judge-model must be given together".to_string());
        }
        if self.answers != AnswerSource::Rag
            && (!self.targets.is_empty() || self.rag.target().is_some())
        {
            return Err("targets only apply with --answers rag".to_string());
        }
        Ok(())
    }

    /// Targets to evaluate: command line first, then the config file.
    ///
    /// An empty list means a single run with the service's default model.
    fn resolve_targets(&self, file: &FileConfig) -> Result<Vec<TargetSection>, String> {
        let mut targets: Vec<TargetSection> = self.rag.target().into_iter().collect();
        for target in &self.targets {
            let (provider, model) = parse_target(target)?;
            targets.push(TargetSection::new(provider, model));
        }
        if targets.is_empty() {
            targets = file.targets.clone();
        }
        Ok(targets)
    }

    fn engine_config(&self, file: &FileConfig) -> Result<EngineConfig, String> {
        let mut config = file
            .run
            .to_engine_config()
            .with_concurrency(self.data.concurrency(file))
            .with_retry_policy(self.data.retry_policy(file));
        for threshold in &self.thresholds {
            let (metric, value) = parse_threshold(threshold)?;
            config = config.with_threshold(metric, value);
        }
        Ok(config)
    }

    fn metric_names(&self, file: &FileConfig) -> Vec<String> {
        if !self.metrics.is_empty() {
            return self.metrics.clone();
        }
        match &file.run.metrics {
            Some(metrics) => metrics.clone(),
            None => MetricSet::default()
                .names()
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }

    fn judge_section(&self, file: &FileConfig) -> Option<ModelSection> {
        let mut section = file.judge.clone().unwrap_or_default();
        if self.judge_provider.is_some() {
            section.provider = self.judge_provider.clone();
            section.model = self.judge_model.clone();
        }
        (section.provider.is_some() && section.model.is_some()).then_some(section)
    }

    fn generator_section(&self, file: &FileConfig) -> Option<ModelSection> {
        let mut section = file.generator.clone().unwrap_or_default();
        if self.generator_provider.is_some() {
            section.provider = self.generator_provider.clone();
        }
        if self.generator_model.is_some() {
            section.model = self.generator_model.clone();
        }
        (section.provider.is_some() && section.model.is_some()).then_some(section)
    }

    fn embedder(&self, file: &FileConfig) -> Result<Option<Arc<dyn Embedder>>> {
        let mut section = file.embeddings.clone().unwrap_or_default();
        if self.embedding_url.is_some() {
            section.base_url = self.embedding_url.clone();
        }
        if self.embedding_model.is_some() {
            section.model = self.embedding_model.clone();
        }
        let Some(config) = section.to_embedding_config() else {
            return Ok(None);
        };
        let embedder = HttpEmbedder::new(config).context("Failed to create embedding client")?;
        Ok(Some(Arc::new(embedder)))
    }

    fn output_dir(&self, file: &FileConfig) -> PathBuf {
        output_dir(self.output_dir.as_ref(), file)
    }
}

impl GenerateArgs {
    fn validate(&self) -> Result<(), String> {
        self.data.validate()?;
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(format!("temperature ({}) must be between 0.0 and 2.0", t));
            }
        }
        Ok(())
    }

    fn model_section(&self, file: &FileConfig) -> Option<ModelSection> {
        let mut section = file.generator.clone().unwrap_or_default();
        if self.provider.is_some() {
            section.provider = self.provider.clone();
        }
        if self.model.is_some() {
            section.model = self.model.clone();
        }
        if self.max_tokens.is_some() {
            section.max_tokens = self.max_tokens;
        }
        if self.temperature.is_some() {
            section.temperature = self.temperature;
        }
        (section.provider.is_some() && section.model.is_some()).then_some(section)
    }
}

/// Parse `PROVIDER/MODEL`. The model may itself contain slashes.
fn parse_target(value: &str) -> Result<(String, String), String> {
    match value.split_once('/') {
        Some((provider, model)) if !provider.trim().is_empty() && !model.trim().is_empty() => {
            Ok((provider.trim().to_string(), model.trim().to_string()))
        }
        _ => Err(format!(
            "Invalid target '{}'. Use PROVIDER/MODEL, e.g. openai/gpt-4o-mini.",
            value
        )),
    }
}

/// Parse `METRIC=VALUE`.
fn parse_threshold(value: &str) -> Result<(String, f64), String> {
    let invalid = || format!("Invalid threshold '{}'. Use METRIC=VALUE, e.g. rouge_l=0.3.", value);
    let (metric, threshold) = value.split_once('=').ok_or_else(invalid)?;
    let threshold: f64 = threshold.trim().parse().map_err(|_| invalid())?;
    if metric.trim().is_empty() || !threshold.is_finite() {
        return Err(invalid());
    }
    Ok((metric.trim().to_string(), threshold))
}

fn output_dir(arg: Option<&PathBuf>, file: &FileConfig) -> PathBuf {
    arg.cloned()
        .or_else(|| file.run.output_dir.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR))
}

/// `<dir>/<dataset stem><suffix>.json`.
fn answers_path(dir: &Path, dataset: &Path, suffix: &str) -> PathBuf {
    let stem = dataset
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("dataset");
    dir.join(format!("{}{}.json", stem, suffix))
}

fn script_runner(kubeconfig: Option<&PathBuf>, file: &FileConfig) -> ScriptRunner {
    let mut scripts = ScriptRunner::new();
    if let Some(path) = kubeconfig.or(file.run.kubeconfig.as_ref()) {
        scripts = scripts.with_kubeconfig(rag_eval::config::expand_home(path));
    }
    if let Some(secs) = file.run.script_timeout_secs {
        scripts = scripts.with_timeout(Duration::from_secs(secs));
    }
    scripts
}

fn chat_model(section: &ModelSection, role: &str) -> Result<Arc<dyn ChatModel>> {
    let (Some(provider), Some(model)) = (&section.provider, &section.model) else {
        bail!("{} provider and model are required", role);
    };
    let client = HttpChatModel::from_env(provider, model.clone(), section.to_llm_config())
        .with_context(|| format!("Failed to create {} model {}/{}", role, provider, model))?;
    Ok(Arc::new(client))
}

fn progress_bar(len: u64) -> ProgressBar {
    let bar = ProgressBar::new(len);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
    {
        bar.set_style(style.progress_chars("#>-"));
    }
    bar
}

/// Ctrl+C once cancels the run; twice exits immediately.
fn spawn_interrupt_handler(token: CancellationToken) {
    tokio::spawn(async move {
        let mut interrupts = 0u8;
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                log::error!("Failed to listen for Ctrl+C");
                return;
            }
            interrupts = interrupts.saturating_add(1);
            if interrupts == 1 {
                eprintln!("\nInterrupt received - finishing in-flight examples and writing partial results...");
                eprintln!("   (Press Ctrl+C again to exit immediately)\n");
                token.cancel();
            } else {
                eprintln!("\nForce exit requested");
                std::process::exit(130);
            }
        }
    });
}

/// Run one driver pass with a progress bar.
async fn run_driver(
    driver: &Driver,
    examples: Vec<EvaluationExample>,
    metadata: RunMetadata,
) -> RunReport {
    let bar = progress_bar(0);
    let report = driver
        .run_examples_with_progress(examples, metadata, |event| match event {
            EvalProgress::Started { total } => {
                bar.set_length(total as u64);
                bar.set_message("Evaluating...");
            }
            EvalProgress::ExampleScored {
                completed, clean, ..
            } => {
                bar.set_position(completed as u64);
                if !clean {
                    bar.set_message("(some errors)");
                }
            }
            EvalProgress::Cancelled { unfinished } => {
                bar.set_message(format!("cancelled, {} unfinished", unfinished));
            }
            _ => {}
        })
        .await;

    if report.is_cancelled() {
        bar.abandon_with_message("Cancelled");
    } else {
        bar.finish_with_message("Complete");
    }
    report
}

/// One evaluation pass over the dataset.
struct PlannedRun {
    answerer: Arc<dyn Answerer>,
    metadata: RunMetadata,
    dir: PathBuf,
}

/// Build the runs for `evaluate`: one per RAG target, or a single run.
fn plan_runs(
    args: &EvaluateArgs,
    file: &FileConfig,
    dataset: &str,
    judge: Option<&str>,
    concurrency: usize,
) -> Result<Vec<PlannedRun>> {
    let output_dir = args.output_dir(file);
    let base_metadata = |metadata: RunMetadata| match judge {
        Some(judge) => metadata.with_judge(judge),
        None => metadata,
    };

    let mut runs = Vec::new();
    match args.answers {
        AnswerSource::Dataset => {
            runs.push(PlannedRun {
                answerer: Arc::new(ProvidedAnswers),
                metadata: base_metadata(RunMetadata::new(dataset)),
                dir: output_dir,
            });
        }
        AnswerSource::Generate => {
            let Some(section) = args.generator_section(file) else {
                bail!("--answers generate needs --generator-provider and --generator-model");
            };
            let model = chat_model(&section, "generator")?;
            let generator = AnswerGenerator::new(model)
                .with_concurrency(concurrency)
                .with_retry_policy(args.data.retry_policy(file));
            runs.push(PlannedRun {
                answerer: Arc::new(generator),
                metadata: base_metadata(RunMetadata::new(dataset)),
                dir: output_dir,
            });
        }
        AnswerSource::Rag => {
            let client = Arc::new(args.rag.client(file)?);
            let query_config = QueryConfig::default()
                .with_concurrency(concurrency)
                .with_retry_policy(args.data.retry_policy(file));
            let targets = args.resolve_targets(file).map_err(anyhow::Error::msg)?;

            if targets.is_empty() {
                runs.push(PlannedRun {
                    answerer: Arc::new(QueryRunner::new(client, query_config)),
                    metadata: base_metadata(RunMetadata::new(dataset)),
                    dir: output_dir,
                });
                return Ok(runs);
            }
            for target in targets {
                let runner = QueryRunner::new(
                    client.clone(),
                    query_config
                        .clone()
                        .with_target(&target.provider, &target.model),
                );
                let metadata =
                    RunMetadata::new(dataset).with_target(&target.provider, &target.model);
                runs.push(PlannedRun {
                    answerer: Arc::new(runner),
                    metadata: base_metadata(metadata),
                    dir: target_dir(&output_dir, &target.provider, &target.model),
                });
            }
        }
    }
    Ok(runs)
}

async fn evaluate(args: &EvaluateArgs, file: &FileConfig, cancel: &CancellationToken) -> Result<()> {
    args.validate().map_err(anyhow::Error::msg)?;

    let engine_config = args.engine_config(file).map_err(anyhow::Error::msg)?;
    let concurrency = args.data.concurrency(file);
    let scripts = script_runner(args.kubeconfig.as_ref(), file);

    let judge = match args.judge_section(file) {
        Some(section) => Some(chat_model(&section, "judge")?),
        None => None,
    };
    let backends = MetricBackends {
        judge: judge.clone(),
        embedder: args.embedder(file)?,
        scripts: scripts.clone(),
    };
    let metrics = MetricRegistry::with_builtins()
        .build_set(&args.metric_names(file), &backends)
        .context("Invalid metric selection")?;

    let dataset = args.data.dataset();
    let examples = dataset
        .load(args.data.sample)
        .await
        .with_context(|| format!("Failed to load dataset {}", args.data.dataset.display()))?;

    eprintln!("=== RAG Evaluation ===");
    eprintln!("Dataset: {} ({} examples)", args.data.dataset.display(), examples.len());
    eprintln!("Metrics: {}", metrics.names().join(", "));
    if let Some(judge) = &judge {
        eprintln!("Judge: {}", judge.name());
    }
    eprintln!("Concurrency: {}", concurrency);
    eprintln!();

    let driver_config = DriverConfig::default()
        .with_concurrency(concurrency)
        .with_scripts(scripts);

    let runs = plan_runs(
        args,
        file,
        dataset.name(),
        judge.as_ref().map(|j| j.name()),
        concurrency,
    )?;

    let multi_target = runs.len() > 1;
    let mut reports = Vec::with_capacity(runs.len());
    for PlannedRun {
        answerer,
        metadata,
        dir,
    } in runs
    {
        if cancel.is_cancelled() {
            break;
        }
        if let (Some(provider), Some(model)) = (&metadata.provider, &metadata.model) {
            eprintln!("--- Target: {}/{} ---", provider, model);
        }

        let driver = Driver::new(answerer, metrics.clone(), engine_config.clone())
            .with_config(driver_config.clone())
            .with_cancellation(cancel.clone());
        let report = run_driver(&driver, examples.clone(), metadata).await;

        report.print_summary();
        let (json, csv) = report
            .write_to_dir(&dir)
            .with_context(|| format!("Failed to write report to {}", dir.display()))?;
        println!("\nReport written to: {}", json.display());
        println!("Detailed results written to: {}", csv.display());
        reports.push(report);
    }

    if multi_target {
        print_comparison(&reports);
    }
    Ok(())
}

/// Answer examples until done or cancelled, returning outcomes in dataset order.
async fn answer_until_cancelled(
    answerer: &dyn Answerer,
    examples: Vec<EvaluationExample>,
    concurrency: usize,
    cancel: &CancellationToken,
) -> Vec<AnswerOutcome> {
    let bar = progress_bar(examples.len() as u64);
    bar.set_message("Answering...");

    let mut outcomes: Vec<AnswerOutcome> = answer_stream(answerer, examples, concurrency)
        .take_until(cancel.cancelled())
        .inspect(|outcome| {
            bar.inc(1);
            if !outcome.is_success() {
                bar.set_message("(some failures)");
            }
        })
        .collect()
        .await;
    outcomes.sort_by_key(|o| o.example.index);

    if cancel.is_cancelled() {
        bar.abandon_with_message("Cancelled");
    } else {
        bar.finish_with_message("Complete");
    }
    outcomes
}

/// Save answered examples and print a short summary.
async fn save_answers(outcomes: Vec<AnswerOutcome>, total: usize, path: &Path) -> Result<()> {
    let failed: Vec<&AnswerOutcome> = outcomes.iter().filter(|o| !o.is_success()).collect();
    for outcome in &failed {
        if let Some(failure) = &outcome.failure {
            eprintln!("  {}: {}", outcome.example.label(), failure.message);
        }
    }
    let failed = failed.len();
    let answered = outcomes.len() - failed;

    let examples: Vec<EvaluationExample> = outcomes.into_iter().map(|o| o.example).collect();
    save_examples(path, &examples)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;

    println!();
    println!(
        "Answered {}/{} examples ({} failed, {} not attempted)",
        answered,
        total,
        failed,
        total - examples.len()
    );
    println!("Answers written to: {}", path.display());
    Ok(())
}

async fn query_rag(args: &QueryArgs, file: &FileConfig, cancel: &CancellationToken) -> Result<()> {
    args.data.validate().map_err(anyhow::Error::msg)?;

    let concurrency = args.data.concurrency(file);
    let mut config = QueryConfig::default()
        .with_concurrency(concurrency)
        .with_retry_policy(args.data.retry_policy(file));
    if let Some(target) = args.rag.target() {
        config = config.with_target(target.provider, target.model);
    }
    let runner = QueryRunner::new(Arc::new(args.rag.client(file)?), config);

    let examples = args
        .data
        .dataset()
        .load(args.data.sample)
        .await
        .with_context(|| format!("Failed to load dataset {}", args.data.dataset.display()))?;
    let total = examples.len();

    let outcomes = answer_until_cancelled(&runner, examples, concurrency, cancel).await;
    let path = match &args.output {
        Some(path) => path.clone(),
        None => answers_path(
            &output_dir(args.output_dir.as_ref(), file),
            &args.data.dataset,
            "_answers",
        ),
    };
    save_answers(outcomes, total, &path).await
}

async fn generate_answers(
    args: &GenerateArgs,
    file: &FileConfig,
    cancel: &CancellationToken,
) -> Result<()> {
    args.validate().map_err(anyhow::Error::msg)?;
    let Some(section) = args.model_section(file) else {
        bail!("--provider and --model are required (or a [generator] config section)");
    };

    let concurrency = args.data.concurrency(file);
    let mut generator = AnswerGenerator::new(chat_model(&section, "generator")?)
        .with_concurrency(concurrency)
        .with_retry_policy(args.data.retry_policy(file));
    if let Some(max_tokens) = section.max_tokens {
        generator = generator.with_max_tokens(max_tokens);
    }
    if let Some(temperature) = section.temperature {
        generator = generator.with_temperature(temperature);
    }

    let examples = args
        .data
        .dataset()
        .load(args.data.sample)
        .await
        .with_context(|| format!("Failed to load dataset {}", args.data.dataset.display()))?;
    let total = examples.len();

    let outcomes = answer_until_cancelled(&generator, examples, concurrency, cancel).await;
    let path = match &args.output {
        Some(path) => path.clone(),
        None => answers_path(
            &output_dir(args.output_dir.as_ref(), file),
            &args.data.dataset,
            "_generated",
        ),
    };
    save_answers(outcomes, total, &path).await
}

fn load_config(path: Option<&PathBuf>) -> Result<FileConfig> {
    match path {
        Some(path) => Ok(ConfigLoader::load_file(path)?),
        None => {
            let (config, loaded) = ConfigLoader::new().load();
            for path in loaded {
                log::info!("Loaded config from {}", path.display());
            }
            Ok(config)
        }
    }
}

async fn run(cli: &Cli, cancel: &CancellationToken) -> Result<()> {
    let file = load_config(cli.config.as_ref())?;
    match &cli.command {
        Command::Evaluate(args) => evaluate(args, &file, cancel).await,
        Command::QueryRag(args) => query_rag(args, &file, cancel).await,
        Command::GenerateAnswers(args) => generate_answers(args, &file, cancel).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    if cli.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    }

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    match run(&cli, &cancel).await {
        Ok(()) if cancel.is_cancelled() => {
            eprintln!("Run cancelled, partial results were written");
            ExitCode::from(130)
        }
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
