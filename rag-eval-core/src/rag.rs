//! Client for the RAG service under evaluation.

use crate::config::RagClientConfig;
use crate::error::{ProviderError, UpstreamError};
use crate::llm::parse_retry_after;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

/// A question sent to the RAG service
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[non_exhaustive]
pub struct RagQuery {
    /// Question text
    #[serde(rename = "query")]
    pub question: String,

    /// Provider the service should answer with
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    /// Model the service should answer with
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Conversation to continue, for multi-turn evaluations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

impl RagQuery {
    /// Create a query for a question.
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Self::default()
        }
    }

    /// Ask the service to answer with a specific provider and model.
    #[must_use]
    pub fn with_target(mut self, provider: impl Into<String>, model: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self.model = Some(model.into());
        self
    }

    /// Continue an existing conversation.
    #[must_use]
    pub fn with_conversation_id(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }
}

/// A document the service cited
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferencedDocument {
    #[serde(default, alias = "doc_url")]
    pub url: Option<String>,
    #[serde(default, alias = "doc_title")]
    pub title: Option<String>,
}

/// The service's answer and the context it retrieved
#[derive(Debug, Clone, Default, PartialEq)]
#[non_exhaustive]
pub struct RagAnswer {
    /// Trimmed answer text
    pub response: String,

    /// Retrieved chunks, in the order returned
    pub contexts: Vec<String>,

    /// Documents cited by the answer
    pub references: Vec<ReferencedDocument>,

    /// Conversation identifier assigned by the service
    pub conversation_id: Option<String>,
}

impl RagAnswer {
    /// Create an answer with no context.
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            ..Self::default()
        }
    }

    /// Attach retrieved context chunks.
    #[must_use]
    pub fn with_contexts(mut self, contexts: Vec<String>) -> Self {
        self.contexts = contexts;
        self
    }

    /// Parse a `/v1/query` response body.
    ///
    /// The `response` field is required; `rag_chunks[].content` become
    /// contexts and `referenced_documents` become references.
    pub fn from_json(body: &Value) -> Result<Self, UpstreamError> {
        let response = body
            .get("response")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                UpstreamError::InvalidResponse("Agent response missing 'response' field".to_string())
            })?
            .trim()
            .to_string();

        let contexts = body
            .get("rag_chunks")
            .and_then(Value::as_array)
            .map(|chunks| {
                chunks
                    .iter()
                    .filter_map(|chunk| match chunk {
                        Value::String(text) => Some(text.clone()),
                        other => other.get("content").and_then(Value::as_str).map(String::from),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let references = body
            .get("referenced_documents")
            .and_then(|docs| serde_json::from_value(docs.clone()).ok())
            .unwrap_or_default();

        let conversation_id = body
            .get("conversation_id")
            .and_then(Value::as_str)
            .map(String::from);

        Ok(Self {
            response,
            contexts,
            references,
            conversation_id,
        })
    }
}

/// A service that answers questions with retrieval.
#[async_trait]
pub trait RagService: Send + Sync {
    /// Identifier used in logs and reports.
    fn name(&self) -> &str;

    /// Ask one question.
    async fn query(&self, query: &RagQuery) -> Result<RagAnswer, UpstreamError>;
}

/// HTTP client for a `/v1/query` endpoint
pub struct RagHttpClient {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
    timeout: Duration,
}

impl std::fmt::Debug for RagHttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RagHttpClient")
            .field("endpoint", &self.endpoint)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl RagHttpClient {
    /// Create a client, reading the bearer token file if one is configured.
    pub fn new(config: RagClientConfig) -> Result<Self, ProviderError> {
        let token = match &config.token_file {
            Some(path) => Some(read_token_file(path)?),
            None => None,
        };

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProviderError::Client(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            token,
            timeout: config.timeout,
        })
    }

    /// Base URL of the service.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl RagService for RagHttpClient {
    fn name(&self) -> &str {
        &self.endpoint
    }

    async fn query(&self, query: &RagQuery) -> Result<RagAnswer, UpstreamError> {
        let mut builder = self
            .client
            .post(format!("{}/v1/query", self.endpoint))
            .json(query);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| UpstreamError::from_reqwest(e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::from_status(status.as_u16(), body, retry_after));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| UpstreamError::InvalidResponse(e.to_string()))?;

        let answer = RagAnswer::from_json(&body)?;
        log::debug!(
            "RAG answer ({} chunks, {} references): {}",
            answer.contexts.len(),
            answer.references.len(),
            crate::utils::truncate(&answer.response, 200)
        );
        Ok(answer)
    }
}

fn read_token_file(path: &Path) -> Result<String, ProviderError> {
    std::fs::read_to_string(path)
        .map(|token| token.trim().to_string())
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ProviderError::TokenFileNotFound(path.to_path_buf())
            } else {
                ProviderError::TokenFile {
                    path: path.to_path_buf(),
                    error: e.to_string(),
                }
            }
        })
}
