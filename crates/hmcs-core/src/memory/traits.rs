//! Remote service traits the memory depends on.
//!
//! Implementations handle the actual transport (HTTP API, local model, test
//! double). The memory never retries on its own; wrap an implementation in
//! [`crate::retry::Retrying`] to get backoff.

use async_trait::async_trait;

use super::prompts::CompletionRequest;
use crate::error::ServiceResult;

/// Text-in/text-out generation service.
#[async_trait]
pub trait SummarizationService: Send + Sync {
    /// Submit a request and return the generated text.
    async fn complete(&self, request: &CompletionRequest) -> ServiceResult<String>;
}

/// Text-in/vector-out embedding service.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Embed a single text.
    async fn embed(&self, text: &str) -> ServiceResult<Vec<f32>>;

    /// Model identifier, for logging.
    fn model_name(&self) -> &str;
}
