//! Serialized form of a memory store.
//!
//! Summary nodes appear once, at the top level. Topic articles carry the ids
//! of the nodes they were built from, so a node shared by several articles
//! is restored as a single instance.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::memory::{EmbeddingService, MemoryConfig, MemoryStore, SummarizationService};
use crate::types::{EntryLog, SummaryNode, TopicArticle};

/// Current document format version
pub const DOCUMENT_VERSION: u32 = 1;

fn default_version() -> u32 {
    DOCUMENT_VERSION
}

/// Complete snapshot of a memory store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryDocument {
    #[serde(default = "default_version")]
    pub version: u32,
    /// Rolling buffer
    #[serde(default)]
    pub logs: Vec<EntryLog>,
    #[serde(default)]
    pub summary_nodes: Vec<SummaryNodeRecord>,
    #[serde(default)]
    pub topic_articles: Vec<TopicArticleRecord>,
}

impl Default for MemoryDocument {
    fn default() -> Self {
        Self {
            version: DOCUMENT_VERSION,
            logs: Vec::new(),
            summary_nodes: Vec::new(),
            topic_articles: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryNodeRecord {
    pub id: Uuid,
    pub logs: Vec<EntryLog>,
    pub content: Option<String>,
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
    pub model_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicArticleRecord {
    pub id: Uuid,
    pub topic: String,
    /// Summary node ids, oldest first
    pub summary_nodes: Vec<Uuid>,
    pub content: String,
    pub embedding: Vec<f32>,
    pub model_id: String,
}

impl From<&SummaryNode> for SummaryNodeRecord {
    fn from(node: &SummaryNode) -> Self {
        Self {
            id: node.id(),
            logs: node.logs().to_vec(),
            content: node.content().map(str::to_string),
            embedding: node.embedding().map(<[f32]>::to_vec),
            created_at: node.created_at(),
            model_id: node.model_id().to_string(),
        }
    }
}

impl From<&TopicArticle> for TopicArticleRecord {
    fn from(article: &TopicArticle) -> Self {
        Self {
            id: article.id(),
            topic: article.topic().to_string(),
            summary_nodes: article.summary_node_ids().to_vec(),
            content: article.content().to_string(),
            embedding: article.embedding().to_vec(),
            model_id: article.model_id().to_string(),
        }
    }
}

impl SummaryNodeRecord {
    fn into_node(self) -> Result<SummaryNode> {
        let digest = match (self.content, self.embedding) {
            (Some(content), Some(embedding)) => Some((content, embedding)),
            (None, None) => None,
            _ => {
                return Err(Error::corrupt(format!(
                    "summary node {} has content or embedding but not both",
                    self.id
                )));
            }
        };
        Ok(SummaryNode::restore(self.id, self.logs, digest, self.created_at, self.model_id))
    }
}

impl TopicArticleRecord {
    fn into_article(self) -> Result<TopicArticle> {
        if self.topic.trim().is_empty() {
            return Err(Error::corrupt(format!("topic article {} has no topic", self.id)));
        }
        Ok(TopicArticle::restore(
            self.id,
            self.topic,
            self.summary_nodes,
            self.content,
            self.embedding,
            self.model_id,
        ))
    }
}

impl MemoryStore {
    /// Snapshot every entity into a document
    pub fn serialize(&self) -> MemoryDocument {
        MemoryDocument {
            version: DOCUMENT_VERSION,
            logs: self.buffer().to_vec(),
            summary_nodes: self.summary_nodes().iter().map(SummaryNodeRecord::from).collect(),
            topic_articles: self.topic_articles().iter().map(TopicArticleRecord::from).collect(),
        }
    }

    /// Rebuild a store from a document.
    ///
    /// Fails with [`Error::CorruptDocument`] on an unknown version, duplicate
    /// ids, half-set summary digests, articles without a topic, articles
    /// referring to summary nodes the document does not contain, or embeddings
    /// that are zero, empty, non-finite or of mixed dimension.
    pub fn deserialize(
        document: MemoryDocument,
        config: MemoryConfig,
        summarizer: Arc<dyn SummarizationService>,
        embedder: Arc<dyn EmbeddingService>,
    ) -> Result<Self> {
        if document.version != DOCUMENT_VERSION {
            return Err(Error::corrupt(format!(
                "unsupported document version {} (expected {})",
                document.version, DOCUMENT_VERSION
            )));
        }

        let summary_nodes = document
            .summary_nodes
            .into_iter()
            .map(SummaryNodeRecord::into_node)
            .collect::<Result<Vec<_>>>()?;
        let topic_articles = document
            .topic_articles
            .into_iter()
            .map(TopicArticleRecord::into_article)
            .collect::<Result<Vec<_>>>()?;

        MemoryStore::from_parts(config, summarizer, embedder, document.logs, summary_nodes, topic_articles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{BagOfWordsEmbedder, ScriptedSummarizer};
    use crate::types::Role;

    fn services() -> (Arc<ScriptedSummarizer>, Arc<BagOfWordsEmbedder>) {
        (Arc::new(ScriptedSummarizer::new().propose("[Bob; Tea]")), Arc::new(BagOfWordsEmbedder::new(32)))
    }

    async fn populated_store() -> MemoryStore {
        let (summarizer, embedder) = services();
        let mut store =
            MemoryStore::new(MemoryConfig::default().with_window_size(2), summarizer, embedder).unwrap();
        store.add_log(Role::User, "My name is Bob").await.unwrap();
        store.add_log(Role::Assistant, "Bob likes tea").await.unwrap();
        store.add_log(Role::User, "still buffered").await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_roundtrip_preserves_everything() {
        let store = populated_store().await;
        let document = store.serialize();
        assert_eq!(document.logs.len(), 1);
        assert_eq!(document.summary_nodes.len(), 1);
        assert_eq!(document.topic_articles.len(), 2);

        let json = serde_json::to_string(&document).unwrap();
        let parsed: MemoryDocument = serde_json::from_str(&json).unwrap();
        let (summarizer, embedder) = services();
        let restored = MemoryStore::deserialize(parsed, store.config().clone(), summarizer, embedder).unwrap();

        assert_eq!(restored.buffer(), store.buffer());
        assert_eq!(restored.summary_nodes(), store.summary_nodes());
        assert_eq!(restored.topic_articles(), store.topic_articles());
        assert_eq!(restored.serialize(), document);
    }

    #[tokio::test]
    async fn test_roundtrip_shares_summary_nodes() {
        let store = populated_store().await;
        let (summarizer, embedder) = services();
        let restored =
            MemoryStore::deserialize(store.serialize(), store.config().clone(), summarizer, embedder).unwrap();

        let shared = &restored.summary_nodes()[0];
        for article in restored.topic_articles() {
            let nodes = restored.summary_nodes_of(article);
            assert_eq!(nodes.len(), 1);
            assert!(std::ptr::eq(nodes[0], shared));
        }
    }

    #[test]
    fn test_document_field_names() {
        let document = MemoryDocument::default();
        let value = serde_json::to_value(&document).unwrap();
        for key in ["logs", "summary_nodes", "topic_articles"] {
            assert!(value.get(key).is_some(), "missing {key}");
        }

        // Documents written before versioning still load
        let parsed: MemoryDocument = serde_json::from_str(r#"{"logs": []}"#).unwrap();
        assert_eq!(parsed.version, DOCUMENT_VERSION);
        assert!(parsed.summary_nodes.is_empty());
    }

    #[tokio::test]
    async fn test_deserialize_rejects_corruption() {
        let store = populated_store().await;
        let (summarizer, embedder) = services();
        let config = store.config().clone();

        let mut half_set = store.serialize();
        half_set.summary_nodes[0].embedding = None;

        let mut dangling = store.serialize();
        dangling.topic_articles[0].summary_nodes.push(Uuid::new_v4());

        let mut duplicate = store.serialize();
        let copy = duplicate.summary_nodes[0].clone();
        duplicate.summary_nodes.push(copy);

        let mut untitled = store.serialize();
        untitled.topic_articles[1].topic = "  ".to_string();

        let mut future = store.serialize();
        future.version = DOCUMENT_VERSION + 1;

        let mut zero_vector = store.serialize();
        zero_vector.topic_articles[0].embedding = vec![0.0; 32];

        let mut short_vector = store.serialize();
        short_vector.summary_nodes[0].embedding = Some(vec![1.0, 0.0]);

        for document in [half_set, dangling, duplicate, untitled, future, zero_vector, short_vector] {
            let result = MemoryStore::deserialize(document, config.clone(), summarizer.clone(), embedder.clone());
            assert!(matches!(result, Err(Error::CorruptDocument(_))));
        }
    }
}
