//! File configuration for the `rag-eval` binary.
//!
//! Settings are read from `~/.rag-eval/config.toml` (user-global) and
//! `./rag-eval.toml` (project-local); the local file wins field by field.
//! Command-line flags override both.
//!
//! ```toml
//! [rag]
//! endpoint = "http://localhost:8080"
//! token_file = "~/.rag-token"
//!
//! [judge]
//! provider = "openai"
//! model = "gpt-4o-mini"
//!
//! [run]
//! concurrency = 4
//! metrics = ["contains", "rouge_l", "answer_correctness"]
//! thresholds = { rouge_l = 0.3 }
//!
//! [[targets]]
//! provider = "openai"
//! model = "gpt-4o-mini"
//! ```

use crate::engine::EngineConfig;
use rag_eval_core::{EmbeddingConfig, LlmConfig, RagClientConfig, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors reading a config file.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("Failed to read {path}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse {path}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Root of a `rag-eval.toml` file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
#[non_exhaustive]
pub struct FileConfig {
    /// The RAG service under evaluation
    pub rag: RagSection,

    /// Judge model for LLM-as-judge metrics
    pub judge: Option<ModelSection>,

    /// Model used by `generate-answers`
    pub generator: Option<ModelSection>,

    /// Embedding backend for similarity metrics
    pub embeddings: Option<EmbeddingsSection>,

    /// Run settings
    pub run: RunSection,

    /// Provider/model pairs to evaluate the RAG service with
    pub targets: Vec<TargetSection>,
}

impl FileConfig {
    /// Merge another config into this one (other takes precedence).
    pub fn merge(&mut self, other: FileConfig) {
        self.rag.merge(other.rag);
        merge_section(&mut self.judge, other.judge, ModelSection::merge);
        merge_section(&mut self.generator, other.generator, ModelSection::merge);
        merge_section(&mut self.embeddings, other.embeddings, EmbeddingsSection::merge);
        self.run.merge(other.run);
        if !other.targets.is_empty() {
            self.targets = other.targets;
        }
    }

    /// Check if nothing is configured.
    pub fn is_empty(&self) -> bool {
        *self == FileConfig::default()
    }
}

fn merge_section<T>(slot: &mut Option<T>, other: Option<T>, merge: fn(&mut T, T)) {
    if let Some(other) = other {
        match slot {
            Some(existing) => merge(existing, other),
            None => *slot = Some(other),
        }
    }
}

fn merge_opt<T>(slot: &mut Option<T>, other: Option<T>) {
    if other.is_some() {
        *slot = other;
    }
}

/// `[rag]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
#[non_exhaustive]
pub struct RagSection {
    pub endpoint: Option<String>,

    /// File holding a bearer token
    pub token_file: Option<PathBuf>,

    pub timeout_secs: Option<u64>,
}

impl RagSection {
    pub fn merge(&mut self, other: RagSection) {
        merge_opt(&mut self.endpoint, other.endpoint);
        merge_opt(&mut self.token_file, other.token_file);
        merge_opt(&mut self.timeout_secs, other.timeout_secs);
    }

    /// Client config, falling back to the default endpoint.
    pub fn to_client_config(&self) -> RagClientConfig {
        let mut config = match &self.endpoint {
            Some(endpoint) => RagClientConfig::new(endpoint.clone()),
            None => RagClientConfig::default(),
        };
        if let Some(path) = &self.token_file {
            config = config.with_token_file(expand_home(path));
        }
        if let Some(secs) = self.timeout_secs {
            config = config.with_timeout(Duration::from_secs(secs));
        }
        config
    }
}

/// `[judge]` and `[generator]` sections.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
#[non_exhaustive]
pub struct ModelSection {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub timeout_secs: Option<u64>,
    pub temperature: Option<f32>,
}

impl ModelSection {
    pub fn merge(&mut self, other: ModelSection) {
        merge_opt(&mut self.provider, other.provider);
        merge_opt(&mut self.model, other.model);
        merge_opt(&mut self.max_tokens, other.max_tokens);
        merge_opt(&mut self.timeout_secs, other.timeout_secs);
        merge_opt(&mut self.temperature, other.temperature);
    }

    /// Client settings, applying overrides to defaults.
    pub fn to_llm_config(&self) -> LlmConfig {
        let mut config = LlmConfig::default();
        if let Some(v) = self.max_tokens {
            config = config.with_max_tokens(v);
        }
        if let Some(v) = self.timeout_secs {
            config = config.with_timeout(Duration::from_secs(v));
        }
        if let Some(v) = self.temperature {
            config = config.with_temperature(v);
        }
        config
    }
}

/// `[embeddings]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
#[non_exhaustive]
pub struct EmbeddingsSection {
    /// OpenAI-compatible base URL, e.g. a TEI server
    pub base_url: Option<String>,
    pub model: Option<String>,

    /// Environment variable holding the API key
    pub api_key_env: Option<String>,

    pub timeout_secs: Option<u64>,
}

impl EmbeddingsSection {
    pub fn merge(&mut self, other: EmbeddingsSection) {
        merge_opt(&mut self.base_url, other.base_url);
        merge_opt(&mut self.model, other.model);
        merge_opt(&mut self.api_key_env, other.api_key_env);
        merge_opt(&mut self.timeout_secs, other.timeout_secs);
    }

    /// Embedding client settings, or `None` without a base URL and model.
    pub fn to_embedding_config(&self) -> Option<EmbeddingConfig> {
        let (base_url, model) = (self.base_url.as_ref()?, self.model.as_ref()?);
        let mut config = EmbeddingConfig::new(base_url.clone(), model.clone());
        if let Some(key) = self
            .api_key_env
            .as_ref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|key| !key.is_empty())
        {
            config = config.with_api_key(key);
        }
        if let Some(secs) = self.timeout_secs {
            config = config.with_timeout(Duration::from_secs(secs));
        }
        Some(config)
    }
}

/// `[run]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
#[non_exhaustive]
pub struct RunSection {
    pub concurrency: Option<usize>,
    pub max_retries: Option<u32>,
    pub retry_base_delay_ms: Option<u64>,

    /// Metric names to score with
    pub metrics: Option<Vec<String>>,

    /// Pass thresholds by metric name
    pub thresholds: BTreeMap<String, f64>,

    pub output_dir: Option<PathBuf>,

    /// Exported to setup, cleanup and verification scripts
    pub kubeconfig: Option<PathBuf>,

    /// Kill scripts running longer than this
    pub script_timeout_secs: Option<u64>,
}

impl RunSection {
    pub fn merge(&mut self, other: RunSection) {
        merge_opt(&mut self.concurrency, other.concurrency);
        merge_opt(&mut self.max_retries, other.max_retries);
        merge_opt(&mut self.retry_base_delay_ms, other.retry_base_delay_ms);
        merge_opt(&mut self.metrics, other.metrics);
        self.thresholds.extend(other.thresholds);
        merge_opt(&mut self.output_dir, other.output_dir);
        merge_opt(&mut self.kubeconfig, other.kubeconfig);
        merge_opt(&mut self.script_timeout_secs, other.script_timeout_secs);
    }

    /// Retry policy, applying overrides to defaults.
    pub fn to_retry_policy(&self) -> RetryPolicy {
        let mut policy = RetryPolicy::default();
        if let Some(v) = self.max_retries {
            policy = policy.with_max_retries(v);
        }
        if let Some(v) = self.retry_base_delay_ms {
            policy = policy.with_base_delay_ms(v);
        }
        policy
    }

    /// Engine settings, applying overrides to defaults.
    pub fn to_engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig::default().with_retry_policy(self.to_retry_policy());
        if let Some(v) = self.concurrency {
            config = config.with_concurrency(v);
        }
        for (metric, threshold) in &self.thresholds {
            config = config.with_threshold(metric.clone(), *threshold);
        }
        config
    }
}

/// `[[targets]]` entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[non_exhaustive]
pub struct TargetSection {
    pub provider: String,
    pub model: String,
}

impl TargetSection {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }
}

/// Expand a leading `~/` to the home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), dirs::home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}

/// Handles config file discovery and loading.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    global_path: PathBuf,
    local_path: PathBuf,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Create a loader for the standard locations:
    /// - `~/.rag-eval/config.toml` (user-global)
    /// - `./rag-eval.toml` (project-local)
    pub fn new() -> Self {
        Self::with_paths(Self::global_config_path(), Self::local_config_path())
    }

    /// Create a loader for explicit locations.
    pub fn with_paths(global: impl Into<PathBuf>, local: impl Into<PathBuf>) -> Self {
        Self {
            global_path: global.into(),
            local_path: local.into(),
        }
    }

    /// Get the path to the user-global config file.
    pub fn global_config_path() -> PathBuf {
        dirs::home_dir()
            .map(|h| h.join(".rag-eval").join("config.toml"))
            .unwrap_or_else(|| PathBuf::from(".rag-eval/config.toml"))
    }

    /// Get the path to the project-local config file.
    pub fn local_config_path() -> PathBuf {
        PathBuf::from("rag-eval.toml")
    }

    /// Load and merge the global and local files.
    ///
    /// Missing files are skipped; unreadable ones are logged and skipped.
    /// Returns the merged config and the files that were loaded.
    pub fn load(&self) -> (FileConfig, Vec<PathBuf>) {
        let mut config = FileConfig::default();
        let mut loaded = Vec::new();

        for (kind, path) in [("global", &self.global_path), ("local", &self.local_path)] {
            if !path.is_file() {
                continue;
            }
            match Self::load_file(path) {
                Ok(file_config) => {
                    config.merge(file_config);
                    loaded.push(path.clone());
                }
                Err(e) => log::warn!("Failed to load {} config: {}", kind, e),
            }
        }

        (config, loaded)
    }

    /// Load a single config file.
    pub fn load_file(path: &Path) -> Result<FileConfig, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const GLOBAL: &str = r#"
        [rag]
        endpoint = "http://global:8080"
        timeout_secs = 60

        [judge]
        provider = "openai"
        model = "gpt-4o-mini"

        [run]
        concurrency = 2
        metrics = ["contains"]
        thresholds = { rouge_l = 0.3, contains = 1.0 }

        [[targets]]
        provider = "openai"
        model = "gpt-4o-mini"
    "#;

    const LOCAL: &str = r#"
        [rag]
        endpoint = "http://local:8080"

        [judge]
        model = "gpt-4o"

        [run]
        thresholds = { rouge_l = 0.5 }

        [[targets]]
        provider = "watsonx"
        model = "granite"

        [[targets]]
        provider = "azure"
        model = "gpt-4o"
    "#;

    fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_load_missing_files() {
        let dir = TempDir::new().unwrap();
        let loader = ConfigLoader::with_paths(dir.path().join("a.toml"), dir.path().join("b.toml"));
        let (config, loaded) = loader.load();
        assert!(config.is_empty());
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_local_overrides_global() {
        let dir = TempDir::new().unwrap();
        let global = write(&dir, "global.toml", GLOBAL);
        let local = write(&dir, "local.toml", LOCAL);

        let (config, loaded) = ConfigLoader::with_paths(&global, &local).load();

        assert_eq!(loaded, vec![global, local]);
        assert_eq!(config.rag.endpoint.as_deref(), Some("http://local:8080"));
        assert_eq!(config.rag.timeout_secs, Some(60));

        let judge = config.judge.unwrap();
        assert_eq!(judge.provider.as_deref(), Some("openai"));
        assert_eq!(judge.model.as_deref(), Some("gpt-4o"));

        assert_eq!(config.run.concurrency, Some(2));
        assert_eq!(config.run.thresholds["rouge_l"], 0.5);
        assert_eq!(config.run.thresholds["contains"], 1.0);
        assert_eq!(
            config.targets,
            vec![
                TargetSection::new("watsonx", "granite"),
                TargetSection::new("azure", "gpt-4o")
            ]
        );
    }

    #[test]
    fn test_invalid_file_is_skipped() {
        let dir = TempDir::new().unwrap();
        let global = write(&dir, "global.toml", GLOBAL);
        let local = write(&dir, "local.toml", "[run\nconcurrency = ");

        let (config, loaded) = ConfigLoader::with_paths(&global, &local).load();
        assert_eq!(loaded, vec![global]);
        assert_eq!(config.run.concurrency, Some(2));
    }

    #[test]
    fn test_load_file_reports_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "bad.toml", "[run]\nconcurrency = \"many\"");
        let err = ConfigLoader::load_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_run_section_to_engine_config() {
        let run = RunSection {
            concurrency: Some(3),
            max_retries: Some(0),
            thresholds: BTreeMap::from([("rouge_l".to_string(), 0.4)]),
            ..Default::default()
        };
        let config = run.to_engine_config();
        assert_eq!(config.concurrency, 3);
        assert_eq!(config.retry.max_retries, 0);
        assert_eq!(config.thresholds["rouge_l"], 0.4);
    }

    #[test]
    fn test_embeddings_need_url_and_model() {
        let section = EmbeddingsSection {
            base_url: Some("http://localhost:8081/v1".into()),
            ..Default::default()
        };
        assert!(section.to_embedding_config().is_none());

        let section = EmbeddingsSection {
            model: Some("bge-small".into()),
            ..section
        };
        let config = section.to_embedding_config().unwrap();
        assert_eq!(config.model, "bge-small");
    }

    #[test]
    fn test_rag_section_defaults() {
        let config = RagSection::default().to_client_config();
        assert_eq!(config.endpoint, rag_eval_core::DEFAULT_RAG_ENDPOINT);
    }
}
