//! Core types for the hierarchical memory.
//!
//! Entities live in flat collections owned by the memory store. A topic
//! article refers to its summary nodes by id, so one summary node can feed
//! any number of articles without shared ownership.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::memory::similarity::validate_embedding;

/// Speaker of a dialogue turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    /// Convert from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "system" => Some(Self::System),
            _ => None,
        }
    }

    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One raw dialogue turn. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryLog {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl EntryLog {
    /// Create a new entry stamped with the current time
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

/// Generated text together with its embedding.
///
/// Keeping both in one value means a node or article can never hold one
/// without the other.
#[derive(Debug, Clone, PartialEq)]
struct Digest {
    content: String,
    embedding: Vec<f32>,
}

/// Compressed rollup of one window of entry logs.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryNode {
    id: Uuid,
    logs: Vec<EntryLog>,
    digest: Option<Digest>,
    created_at: DateTime<Utc>,
    model_id: String,
}

impl SummaryNode {
    /// Create an empty node over the given batch of logs
    pub fn new(logs: Vec<EntryLog>, model_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            logs,
            digest: None,
            created_at: Utc::now(),
            model_id: model_id.into(),
        }
    }

    /// Rebuild a node from persisted fields
    pub(crate) fn restore(
        id: Uuid,
        logs: Vec<EntryLog>,
        digest: Option<(String, Vec<f32>)>,
        created_at: DateTime<Utc>,
        model_id: String,
    ) -> Self {
        Self {
            id,
            logs,
            digest: digest.map(|(content, embedding)| Digest { content, embedding }),
            created_at,
            model_id,
        }
    }

    /// Set the digest. Allowed exactly once.
    pub fn fill(&mut self, content: String, embedding: Vec<f32>) -> Result<()> {
        if self.digest.is_some() {
            return Err(Error::AlreadySummarized(self.id));
        }
        validate_embedding(&embedding)?;
        self.digest = Some(Digest { content, embedding });
        Ok(())
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The exact batch of logs this node was built from
    pub fn logs(&self) -> &[EntryLog] {
        &self.logs
    }

    pub fn content(&self) -> Option<&str> {
        self.digest.as_ref().map(|d| d.content.as_str())
    }

    pub fn embedding(&self) -> Option<&[f32]> {
        self.digest.as_ref().map(|d| d.embedding.as_slice())
    }

    pub fn is_summarized(&self) -> bool {
        self.digest.is_some()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Summarizer model the digest was generated with
    pub fn model_id(&self) -> &str {
        &self.model_id
    }
}

/// A maintained article about one topic.
///
/// The topic label is fixed at creation. Summary node references only grow;
/// content and embedding are replaced wholesale on every merge.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicArticle {
    id: Uuid,
    topic: String,
    summary_node_ids: Vec<Uuid>,
    digest: Digest,
    model_id: String,
}

impl TopicArticle {
    /// Create an article seeded from a single summary node
    pub fn new(
        topic: impl Into<String>,
        summary_node_id: Uuid,
        content: String,
        embedding: Vec<f32>,
        model_id: impl Into<String>,
    ) -> Result<Self> {
        validate_embedding(&embedding)?;
        Ok(Self {
            id: Uuid::new_v4(),
            topic: topic.into(),
            summary_node_ids: vec![summary_node_id],
            digest: Digest { content, embedding },
            model_id: model_id.into(),
        })
    }

    /// Rebuild an article from persisted fields
    pub(crate) fn restore(
        id: Uuid,
        topic: String,
        summary_node_ids: Vec<Uuid>,
        content: String,
        embedding: Vec<f32>,
        model_id: String,
    ) -> Self {
        Self {
            id,
            topic,
            summary_node_ids,
            digest: Digest { content, embedding },
            model_id,
        }
    }

    /// Link another summary node and replace the article text written by
    /// `model_id`.
    ///
    /// The new embedding is validated before anything changes.
    pub fn absorb(
        &mut self,
        summary_node_id: Uuid,
        content: String,
        embedding: Vec<f32>,
        model_id: impl Into<String>,
    ) -> Result<()> {
        validate_embedding(&embedding)?;
        if !self.summary_node_ids.contains(&summary_node_id) {
            self.summary_node_ids.push(summary_node_id);
        }
        self.digest = Digest { content, embedding };
        self.model_id = model_id.into();
        Ok(())
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Ids of the summary nodes merged into this article, oldest first
    pub fn summary_node_ids(&self) -> &[Uuid] {
        &self.summary_node_ids
    }

    pub fn content(&self) -> &str {
        &self.digest.content
    }

    pub fn embedding(&self) -> &[f32] {
        &self.digest.embedding
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }
}
