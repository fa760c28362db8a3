//! Hierarchical memory consolidation.
//!
//! Raw dialogue turns flow upward through two levels of compression:
//!
//! ```text
//! ┌──────────────┐  window full   ┌──────────────┐  routing   ┌────────────────┐
//! │ Rolling      │ ─────────────▶ │ Summary node │ ─────────▶ │ Topic articles │
//! │ buffer       │  summarize +   │ (digest +    │  nearest + │ (merged or     │
//! │ (entry logs) │  embed         │  embedding)  │  classify  │  gap-filled)   │
//! └──────────────┘                └──────────────┘            └────────────────┘
//! ```
//!
//! 1. `add_log` appends to the rolling buffer; a full window triggers
//!    consolidation.
//! 2. Consolidation digests the whole window into one summary node.
//! 3. The node is routed to its nearest articles, confirmed by a classifier,
//!    merged into the confirmed ones, and any uncovered topics get new
//!    articles.
//! 4. `query` returns the article closest to a piece of text.

mod consolidation;
mod shared;
mod store;

pub mod prompts;
pub mod similarity;
pub mod traits;

pub use consolidation::{CandidateOutcome, ConsolidationReport};
pub use prompts::{CompletionRequest, Decoding, Prompts, RequestKind};
pub use shared::SharedMemory;
pub use store::{MemoryStore, ScoredArticle};
pub use traits::{EmbeddingService, SummarizationService};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Configuration for the memory store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Entry logs per summary node (default: 10).
    pub window_size: usize,
    /// Articles shortlisted for classification per summary node (default: 2).
    pub n_nearest: usize,
    /// Summarizer model recorded on every node and article.
    pub model: String,
    /// Sampling temperature for generated text (default: 0.5).
    pub temperature: f32,
    /// Optional cap on generated tokens per request.
    pub max_tokens: Option<u32>,
    /// Maximum articles spawned by one consolidation (default: 5).
    pub max_new_topics: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            window_size: 10,
            n_nearest: 2,
            model: "gpt-3.5-turbo".to_string(),
            temperature: 0.5,
            max_tokens: None,
            max_new_topics: 5,
        }
    }
}

impl MemoryConfig {
    /// Set the window size
    pub fn with_window_size(mut self, window_size: usize) -> Self {
        self.window_size = window_size;
        self
    }

    /// Set the shortlist size
    pub fn with_n_nearest(mut self, n_nearest: usize) -> Self {
        self.n_nearest = n_nearest;
        self
    }

    /// Set the summarizer model
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Decoding parameters for generated text
    pub fn decoding(&self) -> Decoding {
        Decoding {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.window_size == 0 {
            return Err(Error::invalid_config("window_size", "must be at least 1"));
        }
        if self.model.trim().is_empty() {
            return Err(Error::invalid_config("model", "must not be empty"));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(Error::invalid_config("temperature", "must be between 0 and 2"));
        }
        Ok(())
    }
}

/// Statistics about memory contents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoryStats {
    /// Entry logs waiting in the rolling buffer.
    pub buffered: usize,
    /// Summary nodes created so far.
    pub summary_nodes: usize,
    /// Topic articles created so far.
    pub topic_articles: usize,
    /// Summary nodes no article refers to.
    pub orphaned_summary_nodes: usize,
}
