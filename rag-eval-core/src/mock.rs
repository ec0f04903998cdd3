//! In-process stand-ins for upstream services.
//!
//! Each mock wraps a closure so tests can script replies, failures and
//! latency without a network. Call counts are tracked for retry assertions.
//!
//! # Example
//!
//! ```
//! use rag_eval_core::mock::MockChatModel;
//! use rag_eval_core::{ChatModel, LlmRequest};
//!
//! # async fn example() {
//! let judge = MockChatModel::with_reply("1");
//! let response = judge.complete(&LlmRequest::new("Is it right?")).await.unwrap();
//! assert_eq!(response.text, "1");
//! assert_eq!(judge.calls(), 1);
//! # }
//! ```

use crate::embedding::Embedder;
use crate::error::UpstreamError;
use crate::llm::{ChatModel, LlmRequest, LlmResponse};
use crate::rag::{RagAnswer, RagQuery, RagService};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

type ChatFn = dyn Fn(&LlmRequest, usize) -> Result<LlmResponse, UpstreamError> + Send + Sync;
type RagFn = dyn Fn(&RagQuery, usize) -> Result<RagAnswer, UpstreamError> + Send + Sync;
type EmbedFn = dyn Fn(&str) -> Vec<f32> + Send + Sync;

/// Scripted chat model
///
/// The closure receives the request and the 0-indexed call number.
pub struct MockChatModel {
    name: String,
    reply: Box<ChatFn>,
    calls: AtomicUsize,
    latency: Option<Duration>,
}

impl MockChatModel {
    /// Create a mock from a reply function.
    pub fn new<F>(reply: F) -> Self
    where
        F: Fn(&LlmRequest, usize) -> Result<LlmResponse, UpstreamError> + Send + Sync + 'static,
    {
        Self {
            name: "mock/chat".to_string(),
            reply: Box::new(reply),
            calls: AtomicUsize::new(0),
            latency: None,
        }
    }

    /// A model that always answers with `text`.
    pub fn with_reply(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::new(move |_, _| Ok(LlmResponse::new(text.clone())))
    }

    /// A model that times out `failures` times, then answers with `text`.
    pub fn failing_then(failures: usize, text: impl Into<String>) -> Self {
        let text = text.into();
        Self::new(move |_, call| {
            if call < failures {
                Err(UpstreamError::Timeout(1))
            } else {
                Ok(LlmResponse::new(text.clone()))
            }
        })
    }

    /// Set the reported model name.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sleep before every reply.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Number of completions requested so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatModel for MockChatModel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, UpstreamError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        (self.reply)(request, call)
    }
}

/// Scripted RAG service
pub struct MockRagService {
    reply: Box<RagFn>,
    calls: AtomicUsize,
    latency: Option<Duration>,
}

impl MockRagService {
    /// Create a mock from a reply function.
    pub fn new<F>(reply: F) -> Self
    where
        F: Fn(&RagQuery, usize) -> Result<RagAnswer, UpstreamError> + Send + Sync + 'static,
    {
        Self {
            reply: Box::new(reply),
            calls: AtomicUsize::new(0),
            latency: None,
        }
    }

    /// A service that echoes the question back with one context chunk.
    pub fn echo() -> Self {
        Self::new(|query, _| {
            Ok(RagAnswer::new(format!("Answer: {}", query.question))
                .with_contexts(vec![format!("Context for {}", query.question)]))
        })
    }

    /// Sleep before every reply.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Number of queries received so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RagService for MockRagService {
    fn name(&self) -> &str {
        "mock-rag"
    }

    async fn query(&self, query: &RagQuery) -> Result<RagAnswer, UpstreamError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        (self.reply)(query, call)
    }
}

/// Deterministic embedder backed by a function of the text
pub struct MockEmbedder {
    embed: Box<EmbedFn>,
    calls: AtomicUsize,
}

impl MockEmbedder {
    /// Create a mock from an embedding function.
    pub fn new<F>(embed: F) -> Self
    where
        F: Fn(&str) -> Vec<f32> + Send + Sync + 'static,
    {
        Self {
            embed: Box::new(embed),
            calls: AtomicUsize::new(0),
        }
    }

    /// Letter-frequency vectors: texts with the same letters embed identically.
    pub fn letter_counts() -> Self {
        Self::new(|text| {
            let mut counts = vec![0.0f32; 26];
            for c in text.to_lowercase().chars() {
                if c.is_ascii_lowercase() {
                    counts[(c as u8 - b'a') as usize] += 1.0;
                }
            }
            counts
        })
    }

    /// Number of embed calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    fn name(&self) -> &str {
        "mock/embeddings"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|text| (self.embed)(text)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_failing_then_succeeds() {
        let model = MockChatModel::failing_then(2, "ok");
        let request = LlmRequest::new("q");

        assert!(model.complete(&request).await.is_err());
        assert!(model.complete(&request).await.is_err());
        assert_eq!(model.complete(&request).await.unwrap().text, "ok");
        assert_eq!(model.calls(), 3);
    }

    #[tokio::test]
    async fn test_echo_rag_service() {
        let service = MockRagService::echo();
        let answer = service.query(&RagQuery::new("Why?")).await.unwrap();

        assert_eq!(answer.response, "Answer: Why?");
        assert_eq!(answer.contexts, vec!["Context for Why?".to_string()]);
        assert_eq!(service.calls(), 1);
    }

    #[tokio::test]
    async fn test_letter_counts_embedder() {
        let embedder = MockEmbedder::letter_counts();
        let vectors = embedder
            .embed(&["abc".to_string(), "CBA".to_string()])
            .await
            .unwrap();

        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0], vectors[1]);
        assert_eq!(vectors[0].len(), 26);
    }
}
