//! # rag-eval-core
//!
//! Upstream plumbing for `rag-eval`: the traits through which the
//! evaluator reaches the outside world, their HTTP implementations, and
//! the retry policy that wraps every call.
//!
//! ## Seams
//!
//! - [`RagService`]: the RAG system under evaluation ([`RagHttpClient`])
//! - [`ChatModel`]: answer generation and LLM judges ([`HttpChatModel`])
//! - [`Embedder`]: embedding backends for similarity metrics ([`HttpEmbedder`])
//!
//! In-process stand-ins for all three live in [`mock`].
//!
//! ## Example
//!
//! ```no_run
//! use rag_eval_core::{
//!     retry_with_backoff, RagClientConfig, RagHttpClient, RagQuery, RagService, RetryPolicy,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = RagHttpClient::new(RagClientConfig::new("http://localhost:8080"))?;
//! let query = RagQuery::new("What is OpenShift?").with_target("openai", "gpt-4o-mini");
//!
//! let outcome = retry_with_backoff(&RetryPolicy::default(), "query", |_| client.query(&query)).await;
//! let answer = outcome.result?;
//! println!("{} ({} chunks)", answer.response, answer.contexts.len());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod embedding;
pub mod error;
pub mod llm;
pub mod mock;
pub mod provider;
pub mod rag;
pub mod retry;
pub mod utils;

// Re-export public API
pub use config::{EmbeddingConfig, LlmConfig, RagClientConfig, RetryPolicy, DEFAULT_RAG_ENDPOINT};
pub use embedding::{cosine_similarity, Embedder, HttpEmbedder};
pub use error::{ProviderError, UpstreamError};
pub use llm::{ChatModel, HttpChatModel, LlmRequest, LlmResponse, TokenUsage};
pub use provider::Provider;
pub use rag::{RagAnswer, RagHttpClient, RagQuery, RagService, ReferencedDocument};
pub use retry::{retry_with_backoff, Retried, Retryable};
pub use utils::{format_duration, truncate};
