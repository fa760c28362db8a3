//! hmcs-core - Hierarchical memory consolidation for conversational agents
//!
//! Turns a stream of short dialogue turns into a topic-organized knowledge
//! base:
//!
//! - **types**: Entry logs, summary nodes and topic articles
//! - **memory**: The consolidation engine (rolling window, summarization,
//!   similarity routing, article merge, topic gap-fill) and query surface
//! - **retry**: Backoff policy applied around remote service calls
//! - **persistence**: Document model plus JSON file and SQLite backends
//! - **client**: OpenAI-compatible summarization and embedding services
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use hmcs_core::client::{ClientConfig, OpenAiClient};
//! use hmcs_core::memory::{MemoryConfig, MemoryStore};
//! use hmcs_core::types::Role;
//!
//! async fn example() -> hmcs_core::Result<()> {
//!     let client = Arc::new(OpenAiClient::new(ClientConfig::default())?);
//!     let mut memory = MemoryStore::new(MemoryConfig::default(), client.clone(), client)?;
//!
//!     memory.add_log(Role::User, "My name is Bob").await?;
//!     if let Some(article) = memory.query("Who am I talking to?").await? {
//!         println!("{}: {}", article.topic(), article.content());
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod memory;
pub mod persistence;
pub mod retry;
pub mod types;

#[cfg(feature = "client")]
pub mod client;

#[cfg(test)]
pub(crate) mod fakes;

// Re-export commonly used types
pub use error::{Error, Result, ServiceError, ServiceResult};
pub use memory::{MemoryConfig, MemoryStore, SharedMemory};
pub use persistence::{LoadOutcome, MemoryBackend, MemoryDocument};
pub use types::{EntryLog, Role, SummaryNode, TopicArticle};
