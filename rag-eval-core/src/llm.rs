//! Chat-completion clients.
//!
//! [`ChatModel`] is the seam used by answer generation and by LLM-judge
//! metrics. [`HttpChatModel`] speaks the OpenAI chat-completions dialect
//! to every supported [`Provider`]; each call is a single attempt and
//! callers decide whether to retry.

use crate::config::LlmConfig;
use crate::error::{ProviderError, UpstreamError};
use crate::provider::Provider;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// watsonx.ai chat API version
const WATSONX_API_VERSION: &str = "2024-05-31";

/// Refresh IAM tokens this long before they expire
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Request to a chat model
#[derive(Debug, Clone, Default)]
#[non_exhaustive]
pub struct LlmRequest {
    /// User prompt
    pub prompt: String,

    /// Optional system instruction
    pub system_instruction: Option<String>,

    /// Per-request override of [`LlmConfig::max_tokens`]
    pub max_tokens: Option<u32>,

    /// Per-request override of [`LlmConfig::temperature`]
    pub temperature: Option<f32>,
}

impl LlmRequest {
    /// Create a request with just a prompt.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    /// Set the system instruction.
    #[must_use]
    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    /// Override the completion token limit.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Override the temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    fn messages(&self) -> Vec<Value> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system_instruction {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": self.prompt}));
        messages
    }
}

/// Token accounting reported by the provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

/// Completed chat response
#[derive(Debug, Clone, PartialEq)]
pub struct LlmResponse {
    /// Trimmed text of the first choice
    pub text: String,

    /// Token usage, when reported
    pub usage: Option<TokenUsage>,
}

impl LlmResponse {
    /// Create a response with no usage data.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: None,
        }
    }
}

/// A model that turns a prompt into text.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Identifier used in logs and reports, e.g. `openai/gpt-4o-mini`.
    fn name(&self) -> &str;

    /// Run one completion.
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, UpstreamError>;
}

#[derive(Debug, Clone)]
struct IamToken {
    value: String,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct IamTokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

/// HTTP chat client for OpenAI-compatible providers
pub struct HttpChatModel {
    client: reqwest::Client,
    provider: Provider,
    model: String,
    config: LlmConfig,
    label: String,
    iam_token: Mutex<Option<IamToken>>,
}

impl std::fmt::Debug for HttpChatModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpChatModel")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("config", &self.config)
            .finish()
    }
}

impl HttpChatModel {
    /// Create a client for `model` served by `provider`.
    pub fn new(
        provider: Provider,
        model: impl Into<String>,
        config: LlmConfig,
    ) -> Result<Self, ProviderError> {
        let model = model.into();
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProviderError::Client(e.to_string()))?;
        let label = format!("{}/{}", provider.name(), model);
        log::info!("Setting up chat model {}", label);

        Ok(Self {
            client,
            provider,
            model,
            config,
            label,
            iam_token: Mutex::new(None),
        })
    }

    /// Resolve the provider from the environment and create a client.
    pub fn from_env(
        provider: &str,
        model: impl Into<String>,
        config: LlmConfig,
    ) -> Result<Self, ProviderError> {
        let model = model.into();
        let provider = Provider::from_env(provider, &model)?;
        Self::new(provider, model, config)
    }

    /// The model name sent to the provider.
    pub fn model(&self) -> &str {
        &self.model
    }

    fn body(&self, request: &LlmRequest) -> Value {
        let max_tokens = request.max_tokens.unwrap_or(self.config.max_tokens);
        let temperature = request.temperature.unwrap_or(self.config.temperature);
        let messages = request.messages();

        match &self.provider {
            Provider::Azure { .. } => json!({
                "messages": messages,
                "max_tokens": max_tokens,
                "temperature": temperature,
            }),
            Provider::Watsonx { project_id, .. } => json!({
                "model_id": self.model,
                "project_id": project_id,
                "messages": messages,
                "max_tokens": max_tokens,
                "temperature": temperature,
            }),
            _ => json!({
                "model": self.model,
                "messages": messages,
                "max_tokens": max_tokens,
                "temperature": temperature,
            }),
        }
    }

    async fn build_request(&self, body: &Value) -> Result<reqwest::RequestBuilder, UpstreamError> {
        let builder = match &self.provider {
            Provider::OpenAi { api_key, api_base } => self
                .client
                .post(format!("{}/chat/completions", api_base.trim_end_matches('/')))
                .bearer_auth(api_key),
            Provider::Azure {
                api_key,
                endpoint,
                deployment,
                api_version,
            } => self
                .client
                .post(format!(
                    "{}/openai/deployments/{}/chat/completions?api-version={}",
                    endpoint.trim_end_matches('/'),
                    deployment,
                    api_version
                ))
                .header("api-key", api_key),
            Provider::Watsonx { api_base, .. } => {
                let token = self.watsonx_token().await?;
                self.client
                    .post(format!(
                        "{}/ml/v1/text/chat?version={}",
                        api_base.trim_end_matches('/'),
                        WATSONX_API_VERSION
                    ))
                    .bearer_auth(token)
            }
            Provider::Generic {
                api_base, api_key, ..
            } => {
                let builder = self
                    .client
                    .post(format!("{}/chat/completions", api_base.trim_end_matches('/')));
                match api_key {
                    Some(key) => builder.bearer_auth(key),
                    None => builder,
                }
            }
        };

        Ok(builder.json(body))
    }

    /// Exchange the watsonx API key for an IAM bearer token, reusing a cached
    /// token until shortly before it expires.
    async fn watsonx_token(&self) -> Result<String, UpstreamError> {
        let Provider::Watsonx {
            api_key, iam_url, ..
        } = &self.provider
        else {
            return Err(UpstreamError::Auth(
                "IAM token requested for non-watsonx provider".to_string(),
            ));
        };

        let mut cached = self.iam_token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() + TOKEN_REFRESH_MARGIN < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        log::debug!("Requesting watsonx IAM token");
        let response = self
            .client
            .post(iam_url)
            .form(&[
                ("grant_type", "urn:ibm:params:oauth:grant-type:apikey"),
                ("apikey", api_key.as_str()),
            ])
            .send()
            .await
            .map_err(|e| UpstreamError::from_reqwest(e, self.config.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Auth(format!(
                "IAM token request failed: {} - {}",
                status.as_u16(),
                body
            )));
        }

        let parsed: IamTokenResponse = response
            .json()
            .await
            .map_err(|e| UpstreamError::InvalidResponse(format!("IAM token: {}", e)))?;
        let lifetime = Duration::from_secs(parsed.expires_in.unwrap_or(3600));
        *cached = Some(IamToken {
            value: parsed.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });

        Ok(parsed.access_token)
    }
}

#[async_trait]
impl ChatModel for HttpChatModel {
    fn name(&self) -> &str {
        &self.label
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, UpstreamError> {
        let body = self.body(request);
        let response = self
            .build_request(&body)
            .await?
            .send()
            .await
            .map_err(|e| UpstreamError::from_reqwest(e, self.config.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::from_status(status.as_u16(), body, retry_after));
        }

        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|e| UpstreamError::InvalidResponse(e.to_string()))?;

        let text = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or(UpstreamError::NoContent)?;

        Ok(LlmResponse {
            text,
            usage: completion.usage,
        })
    }
}

/// Parse a `Retry-After` header given in seconds.
pub(crate) fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}
