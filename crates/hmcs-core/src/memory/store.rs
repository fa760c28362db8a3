//! Memory store: the rolling buffer, summary nodes and topic articles.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use super::consolidation::ConsolidationReport;
use super::prompts::Prompts;
use super::similarity;
use super::traits::{EmbeddingService, SummarizationService};
use super::{MemoryConfig, MemoryStats};
use crate::error::{Error, Result};
use crate::types::{EntryLog, Role, SummaryNode, TopicArticle};

/// A topic article with its similarity to a query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredArticle {
    pub article_id: Uuid,
    pub topic: String,
    pub content: String,
    pub similarity: f32,
}

/// Owns every entity of the hierarchical memory.
///
/// Summary nodes and topic articles are kept in insertion order; articles
/// reference nodes by id and `summary_index` resolves those ids to the single
/// stored instance.
pub struct MemoryStore {
    pub(super) config: MemoryConfig,
    pub(super) prompts: Prompts,
    pub(super) summarizer: Arc<dyn SummarizationService>,
    pub(super) embedder: Arc<dyn EmbeddingService>,
    pub(super) buffer: Vec<EntryLog>,
    pub(super) summary_nodes: Vec<SummaryNode>,
    summary_index: HashMap<Uuid, usize>,
    pub(super) topic_articles: Vec<TopicArticle>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("config", &self.config)
            .field("embedding_model", &self.embedder.model_name())
            .field("buffered", &self.buffer.len())
            .field("summary_nodes", &self.summary_nodes.len())
            .field("topic_articles", &self.topic_articles.len())
            .finish()
    }
}

impl MemoryStore {
    /// Create an empty memory store
    pub fn new(
        config: MemoryConfig,
        summarizer: Arc<dyn SummarizationService>,
        embedder: Arc<dyn EmbeddingService>,
    ) -> Result<Self> {
        Self::from_parts(config, summarizer, embedder, Vec::new(), Vec::new(), Vec::new())
    }

    /// Assemble a store from existing entities.
    ///
    /// Fails on duplicate ids, on article references to unknown nodes, and on
    /// embeddings that are unusable or differ in dimension.
    pub(crate) fn from_parts(
        config: MemoryConfig,
        summarizer: Arc<dyn SummarizationService>,
        embedder: Arc<dyn EmbeddingService>,
        buffer: Vec<EntryLog>,
        summary_nodes: Vec<SummaryNode>,
        topic_articles: Vec<TopicArticle>,
    ) -> Result<Self> {
        config.validate()?;

        let mut summary_index = HashMap::with_capacity(summary_nodes.len());
        for (i, node) in summary_nodes.iter().enumerate() {
            if summary_index.insert(node.id(), i).is_some() {
                return Err(Error::corrupt(format!("duplicate summary node id {}", node.id())));
            }
        }

        let mut article_ids = HashSet::with_capacity(topic_articles.len());
        for article in &topic_articles {
            if !article_ids.insert(article.id()) {
                return Err(Error::corrupt(format!("duplicate topic article id {}", article.id())));
            }
            if let Some(missing) = article
                .summary_node_ids()
                .iter()
                .find(|id| !summary_index.contains_key(id))
            {
                return Err(Error::corrupt(format!(
                    "topic article {} references unknown summary node {}",
                    article.id(),
                    missing
                )));
            }
        }

        check_embeddings(&summary_nodes, &topic_articles)?;

        let prompts = Prompts::new(config.model.clone(), config.decoding());
        Ok(Self {
            config,
            prompts,
            summarizer,
            embedder,
            buffer,
            summary_nodes,
            summary_index,
            topic_articles,
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Ingestion
    // ─────────────────────────────────────────────────────────────────────────

    /// Record a dialogue turn.
    ///
    /// Consolidates once the buffer holds a full window and returns the
    /// report of that consolidation.
    pub async fn add_log(
        &mut self,
        role: Role,
        content: impl Into<String>,
    ) -> Result<Option<ConsolidationReport>> {
        self.add_entry(EntryLog::new(role, content)).await
    }

    /// Record an already constructed entry log
    pub async fn add_entry(&mut self, entry: EntryLog) -> Result<Option<ConsolidationReport>> {
        debug!(
            entry_id = %entry.id,
            role = %entry.role,
            buffered = self.buffer.len() + 1,
            window_size = self.config.window_size,
            "Buffered entry log"
        );
        self.buffer.push(entry);

        // `>=` so a window kept after a failed consolidation is retried here
        if self.buffer.len() >= self.config.window_size {
            return self.consolidate().await;
        }
        Ok(None)
    }

    pub(super) fn insert_summary_node(&mut self, node: SummaryNode) {
        self.summary_index.insert(node.id(), self.summary_nodes.len());
        self.summary_nodes.push(node);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Retrieval
    // ─────────────────────────────────────────────────────────────────────────

    /// Return the topic article closest to `text`.
    ///
    /// An empty knowledge base yields `None` without calling the embedding
    /// service. Ties go to the article created first.
    pub async fn query(&self, text: &str) -> Result<Option<&TopicArticle>> {
        if self.topic_articles.is_empty() {
            return Ok(None);
        }

        let embedding = self.embedder.embed(text).await?;
        let ranked = similarity::rank(&embedding, self.topic_articles.iter().map(|a| a.embedding()))?;

        let best = ranked.first().map(|&(i, _)| &self.topic_articles[i]);
        if let (Some(article), Some(&(_, score))) = (best, ranked.first()) {
            debug!(article_id = %article.id(), topic = %article.topic(), similarity = score, "Query matched topic article");
        }
        Ok(best)
    }

    /// Return up to `limit` topic articles ordered by similarity to `text`
    pub async fn search(&self, text: &str, limit: usize) -> Result<Vec<ScoredArticle>> {
        if self.topic_articles.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let embedding = self.embedder.embed(text).await?;
        let ranked = similarity::rank(&embedding, self.topic_articles.iter().map(|a| a.embedding()))?;

        Ok(ranked
            .into_iter()
            .take(limit)
            .map(|(i, similarity)| {
                let article = &self.topic_articles[i];
                ScoredArticle {
                    article_id: article.id(),
                    topic: article.topic().to_string(),
                    content: article.content().to_string(),
                    similarity,
                }
            })
            .collect())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Entry logs not yet consolidated, oldest first
    pub fn buffer(&self) -> &[EntryLog] {
        &self.buffer
    }

    /// All summary nodes, in creation order
    pub fn summary_nodes(&self) -> &[SummaryNode] {
        &self.summary_nodes
    }

    /// All topic articles, in creation order
    pub fn topic_articles(&self) -> &[TopicArticle] {
        &self.topic_articles
    }

    pub fn summary_node(&self, id: Uuid) -> Option<&SummaryNode> {
        self.summary_index.get(&id).map(|&i| &self.summary_nodes[i])
    }

    pub fn topic_article(&self, id: Uuid) -> Option<&TopicArticle> {
        self.topic_articles.iter().find(|a| a.id() == id)
    }

    /// Resolve an article's references to the stored summary nodes
    pub fn summary_nodes_of(&self, article: &TopicArticle) -> Vec<&SummaryNode> {
        article
            .summary_node_ids()
            .iter()
            .filter_map(|id| self.summary_node(*id))
            .collect()
    }

    /// Get memory statistics
    pub fn stats(&self) -> MemoryStats {
        let referenced: HashSet<Uuid> = self
            .topic_articles
            .iter()
            .flat_map(|a| a.summary_node_ids().iter().copied())
            .collect();

        MemoryStats {
            buffered: self.buffer.len(),
            summary_nodes: self.summary_nodes.len(),
            topic_articles: self.topic_articles.len(),
            orphaned_summary_nodes: self
                .summary_nodes
                .iter()
                .filter(|n| !referenced.contains(&n.id()))
                .count(),
        }
    }
}

/// Every stored embedding must be usable and share one dimension
fn check_embeddings(summary_nodes: &[SummaryNode], topic_articles: &[TopicArticle]) -> Result<()> {
    let nodes = summary_nodes
        .iter()
        .filter_map(|n| n.embedding().map(|e| ("summary node", n.id(), e)));
    let articles = topic_articles
        .iter()
        .map(|a| ("topic article", a.id(), a.embedding()));

    let mut dimension: Option<usize> = None;
    for (kind, id, embedding) in nodes.chain(articles) {
        similarity::validate_embedding(embedding)
            .map_err(|e| Error::corrupt(format!("{kind} {id} has an unusable embedding: {e}")))?;
        match dimension {
            Some(expected) if expected != embedding.len() => {
                return Err(Error::corrupt(format!(
                    "{kind} {id} has a {}-dimensional embedding, expected {expected}",
                    embedding.len()
                )));
            }
            Some(_) => {}
            None => dimension = Some(embedding.len()),
        }
    }
    Ok(())
}
