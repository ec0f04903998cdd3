use std::path::PathBuf;
use std::time::Duration;

/// Default RAG service endpoint
pub const DEFAULT_RAG_ENDPOINT: &str = "http://localhost:8080";

/// Upper bound for any single backoff delay
const MAX_DELAY_MS: u64 = 60_000;

/// Retry policy for calls to upstream services
///
/// Shared by the query stage, answer generation and model-based metrics so
/// every upstream call backs off the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub struct RetryPolicy {
    /// Number of *additional* attempts after the first one
    ///
    /// Default: 2 (three attempts in total)
    pub max_retries: u32,

    /// Base delay for exponential backoff (milliseconds)
    ///
    /// Default: 2000ms
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 2000,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with the default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay_ms: 0,
        }
    }

    /// Set the number of additional attempts.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the base delay for exponential backoff (milliseconds).
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay_ms: u64) -> Self {
        self.base_delay_ms = delay_ms;
        self
    }

    /// Total number of attempts this policy allows.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Get the delay before retrying after a failed attempt (0-indexed)
    ///
    /// Uses exponential backoff: delay = base_delay * 2^attempt, capped at
    /// 60 seconds.
    pub fn delay(&self, attempt: u32) -> Duration {
        let delay_ms = self
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(attempt))
            .min(MAX_DELAY_MS);

        Duration::from_millis(delay_ms)
    }

    /// Clamp a server-provided delay (e.g. `Retry-After`) to the same cap.
    pub fn clamp(&self, delay: Duration) -> Duration {
        delay.min(Duration::from_millis(MAX_DELAY_MS))
    }
}

/// Configuration for chat-completion clients
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct LlmConfig {
    /// Maximum tokens per completion
    ///
    /// Default: 1024
    pub max_tokens: u32,

    /// Timeout for individual requests
    ///
    /// Default: 300 seconds
    pub timeout: Duration,

    /// Temperature for generation
    ///
    /// Default: 0.0, so judge verdicts are as repeatable as the provider allows.
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            timeout: Duration::from_secs(300),
            temperature: 0.0,
        }
    }
}

impl LlmConfig {
    /// Set the maximum tokens per completion.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the generation temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Configuration for the RAG service client
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct RagClientConfig {
    /// Base URL of the service
    ///
    /// Default: `http://localhost:8080`
    pub endpoint: String,

    /// File holding a bearer token, read once at client construction
    pub token_file: Option<PathBuf>,

    /// Timeout for a single query
    ///
    /// Default: 300 seconds
    pub timeout: Duration,
}

impl Default for RagClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_RAG_ENDPOINT.to_string(),
            token_file: None,
            timeout: Duration::from_secs(300),
        }
    }
}

impl RagClientConfig {
    /// Create a configuration for the given endpoint.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    /// Read the bearer token from this file.
    #[must_use]
    pub fn with_token_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.token_file = Some(path.into());
        self
    }

    /// Set the query timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Configuration for an OpenAI-compatible embeddings endpoint
#[derive(Clone)]
#[non_exhaustive]
pub struct EmbeddingConfig {
    /// Base URL, e.g. `http://localhost:8081/v1`
    pub base_url: String,

    /// Model name sent with each request
    pub model: String,

    /// Optional bearer token
    pub api_key: Option<String>,

    /// Timeout for a single request
    ///
    /// Default: 60 seconds
    pub timeout: Duration,
}

impl std::fmt::Debug for EmbeddingConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingConfig")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl EmbeddingConfig {
    /// Create a configuration for the given endpoint and model.
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            api_key: None,
            timeout: Duration::from_secs(60),
        }
    }

    /// Set the bearer token.
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_retry_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.base_delay_ms, 2000);
        assert_eq!(policy.max_attempts(), 3);
    }

    #[test]
    fn test_retry_delay() {
        let policy = RetryPolicy::default();

        // Exponential backoff: 2s, 4s, 8s
        assert_eq!(policy.delay(0), Duration::from_millis(2000));
        assert_eq!(policy.delay(1), Duration::from_millis(4000));
        assert_eq!(policy.delay(2), Duration::from_millis(8000));
    }

    #[test]
    fn test_retry_delay_overflow_protection() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.delay(10), Duration::from_millis(60_000));
        assert_eq!(policy.delay(100), Duration::from_millis(60_000));
        assert_eq!(policy.delay(u32::MAX), Duration::from_millis(60_000));
    }

    #[test]
    fn test_retry_policy_none() {
        let policy = RetryPolicy::none();
        assert_eq!(policy.max_attempts(), 1);
        assert_eq!(policy.delay(3), Duration::ZERO);
    }

    #[test]
    fn test_clamp_retry_after() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.clamp(Duration::from_secs(3600)),
            Duration::from_secs(60)
        );
        assert_eq!(policy.clamp(Duration::from_secs(5)), Duration::from_secs(5));
    }

    #[test]
    fn test_default_llm_config() {
        let config = LlmConfig::default();
        assert_eq!(config.max_tokens, 1024);
        assert_eq!(config.timeout, Duration::from_secs(300));
        assert_eq!(config.temperature, 0.0);
    }

    #[test]
    fn test_rag_client_config_builder() {
        let config = RagClientConfig::new("http://rag:9000")
            .with_token_file("/tmp/token.txt")
            .with_timeout(Duration::from_secs(10));

        assert_eq!(config.endpoint, "http://rag:9000");
        assert_eq!(config.token_file, Some(PathBuf::from("/tmp/token.txt")));
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(RagClientConfig::default().endpoint, DEFAULT_RAG_ENDPOINT);
    }

    #[test]
    fn test_embedding_config_debug_redacts_key() {
        let config = EmbeddingConfig::new("http://tei:8081/v1", "bge").with_api_key("secret");
        let debug = format!("{:?}", config);
        assert!(!debug.contains("secret"));
        assert!(debug.contains("REDACTED"));
    }
}
