//! Consolidation: rolling buffer to summary node to topic articles.

use std::collections::HashSet;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::prompts::{self, topic_key};
use super::similarity;
use super::store::MemoryStore;
use crate::error::{Error, Result};
use crate::types::{SummaryNode, TopicArticle};

/// Classifier verdict for one shortlisted article
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateOutcome {
    pub article_id: Uuid,
    pub topic: String,
    pub similarity: f32,
    pub relevant: bool,
}

/// What one consolidation did to the knowledge base
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsolidationReport {
    /// The summary node built from the window
    pub summary_node_id: Uuid,
    /// Shortlisted articles and the classifier's verdict on each
    pub candidates: Vec<CandidateOutcome>,
    /// Topic labels parsed from the gap-fill answer, before filtering
    pub proposed_topics: Vec<String>,
    /// Existing articles the node was merged into
    pub updated_articles: Vec<Uuid>,
    /// Articles created for uncovered topics
    pub created_articles: Vec<Uuid>,
    pub duration_ms: u64,
}

impl ConsolidationReport {
    fn new(summary_node_id: Uuid) -> Self {
        Self {
            summary_node_id,
            candidates: Vec::new(),
            proposed_topics: Vec::new(),
            updated_articles: Vec::new(),
            created_articles: Vec::new(),
            duration_ms: 0,
        }
    }

    /// Articles the node ended up linked to
    pub fn linked_articles(&self) -> impl Iterator<Item = &Uuid> {
        self.updated_articles.iter().chain(self.created_articles.iter())
    }
}

impl MemoryStore {
    /// Consolidate the current buffer into a summary node and route it.
    ///
    /// Returns `None` when the buffer is empty. If summarizing or embedding
    /// the window fails, the buffer is left untouched so a later call can
    /// retry. Once the node exists it is stored and the buffer cleared, even
    /// if routing fails afterwards.
    pub async fn consolidate(&mut self) -> Result<Option<ConsolidationReport>> {
        if self.buffer.is_empty() {
            return Ok(None);
        }
        let start = Instant::now();

        let node = match self.build_summary_node().await {
            Ok(node) => node,
            Err(e) => {
                warn!(buffered = self.buffer.len(), error = %e, "Consolidation failed, entry logs kept in buffer");
                return Err(e);
            }
        };
        let node_id = node.id();
        let window = node.logs().len();
        let summary = node.content().unwrap_or_default().to_string();
        let embedding = node.embedding().unwrap_or_default().to_vec();

        self.insert_summary_node(node);
        self.buffer.clear();
        info!(summary_node_id = %node_id, window, "Created summary node");

        let mut report = ConsolidationReport::new(node_id);
        if let Err(e) = self.route(node_id, &summary, &embedding, &mut report).await {
            warn!(summary_node_id = %node_id, error = %e, "Routing failed, summary node left unlinked");
            return Err(e);
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            summary_node_id = %node_id,
            candidates = report.candidates.len(),
            updated = report.updated_articles.len(),
            created = report.created_articles.len(),
            duration_ms = report.duration_ms,
            "Consolidation complete"
        );
        Ok(Some(report))
    }

    async fn build_summary_node(&self) -> Result<SummaryNode> {
        let mut node = SummaryNode::new(self.buffer.clone(), self.config.model.clone());

        let request = self.prompts.summarize_logs(node.logs());
        let content = self.summarizer.complete(&request).await?;
        let embedding = self.embedder.embed(&content).await?;
        node.fill(content, embedding)?;

        Ok(node)
    }

    async fn route(
        &mut self,
        node_id: Uuid,
        summary: &str,
        embedding: &[f32],
        report: &mut ConsolidationReport,
    ) -> Result<()> {
        if self.summary_node(node_id).is_none() {
            return Err(Error::NotSummarized(node_id));
        }

        let ranked = similarity::rank(embedding, self.topic_articles.iter().map(|a| a.embedding()))?;

        let mut confirmed = Vec::new();
        for (idx, score) in ranked.into_iter().take(self.config.n_nearest) {
            let article = &self.topic_articles[idx];
            let request = self.prompts.classify_relevance(article.topic(), article.content(), summary);
            let answer = self.summarizer.complete(&request).await?;
            let relevant = prompts::parse_relevance(&answer);

            debug!(article_id = %article.id(), topic = %article.topic(), similarity = score, relevant, "Classified candidate");
            report.candidates.push(CandidateOutcome {
                article_id: article.id(),
                topic: article.topic().to_string(),
                similarity: score,
                relevant,
            });
            if relevant {
                confirmed.push(idx);
            }
        }

        for &idx in &confirmed {
            self.merge_into(idx, node_id, summary).await?;
            report.updated_articles.push(self.topic_articles[idx].id());
        }

        let covered: Vec<String> = confirmed
            .iter()
            .map(|&idx| self.topic_articles[idx].topic().to_string())
            .collect();
        let request = self.prompts.propose_topics(summary, &covered);
        let answer = self.summarizer.complete(&request).await?;
        report.proposed_topics = prompts::parse_topic_list(&answer);

        let new_topics = select_new_topics(&report.proposed_topics, &covered, self.config.max_new_topics);
        for topic in new_topics {
            let key = topic_key(&topic);

            // The label names an article that was not shortlisted or was turned down
            if let Some(idx) = self.topic_articles.iter().position(|a| topic_key(a.topic()) == key) {
                debug!(topic = %topic, "Proposed topic matches an existing article, merging");
                self.merge_into(idx, node_id, summary).await?;
                let id = self.topic_articles[idx].id();
                if !report.updated_articles.contains(&id) {
                    report.updated_articles.push(id);
                }
                continue;
            }

            let request = self.prompts.write_article(&topic, summary);
            let content = self.summarizer.complete(&request).await?;
            let embedding = self.embedder.embed(&content).await?;
            let article = TopicArticle::new(topic, node_id, content, embedding, self.config.model.clone())?;

            info!(article_id = %article.id(), topic = %article.topic(), "Created topic article");
            report.created_articles.push(article.id());
            self.topic_articles.push(article);
        }

        Ok(())
    }

    /// Regenerate one article with a new summary folded in.
    ///
    /// Both service calls complete before the article is touched.
    async fn merge_into(&mut self, idx: usize, node_id: Uuid, summary: &str) -> Result<()> {
        let request = {
            let article = &self.topic_articles[idx];
            self.prompts.merge_article(article.topic(), article.content(), summary)
        };
        let content = self.summarizer.complete(&request).await?;
        let embedding = self.embedder.embed(&content).await?;

        let article = &mut self.topic_articles[idx];
        article.absorb(node_id, content, embedding, self.config.model.clone())?;
        info!(article_id = %article.id(), topic = %article.topic(), "Merged summary node into topic article");
        Ok(())
    }
}

/// Drop duplicates and already covered labels, keeping the first `max`.
fn select_new_topics(proposed: &[String], covered: &[String], max: usize) -> Vec<String> {
    let mut seen: HashSet<String> = covered.iter().map(|t| topic_key(t)).collect();
    let mut selected: Vec<String> = proposed
        .iter()
        .filter(|label| seen.insert(topic_key(label)))
        .cloned()
        .collect();

    if selected.len() > max {
        warn!(proposed = selected.len(), max, dropped = ?&selected[max..], "Too many new topics proposed, truncating");
        selected.truncate(max);
    }
    selected
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use super::*;
    use crate::fakes::{BagOfWordsEmbedder, FixedEmbedder, ScriptedSummarizer};
    use crate::memory::{MemoryConfig, RequestKind};
    use crate::types::{EntryLog, Role};

    fn seed_node() -> SummaryNode {
        SummaryNode::restore(
            Uuid::new_v4(),
            vec![EntryLog::new(Role::User, "seed")],
            Some(("seed".to_string(), vec![1.0, 0.0])),
            Utc::now(),
            "test-model".to_string(),
        )
    }

    fn seed_article(topic: &str, embedding: Vec<f32>, node: Uuid) -> TopicArticle {
        TopicArticle::restore(
            Uuid::new_v4(),
            topic.to_string(),
            vec![node],
            format!("All about {topic}"),
            embedding,
            "test-model".to_string(),
        )
    }

    async fn fill_window(store: &mut MemoryStore, turns: &[(Role, &str)]) -> Option<ConsolidationReport> {
        let mut last = None;
        for (role, text) in turns {
            last = store.add_log(*role, *text).await.unwrap();
        }
        last
    }

    #[test]
    fn test_select_new_topics() {
        let proposed: Vec<String> = ["Bob", "bob", "Cooking", "Tea ", "Birthdays"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let covered = vec!["TEA".to_string()];

        assert_eq!(select_new_topics(&proposed, &covered, 5), vec!["Bob", "Cooking", "Birthdays"]);
        assert_eq!(select_new_topics(&proposed, &covered, 1), vec!["Bob"]);
        assert!(select_new_topics(&proposed, &covered, 0).is_empty());
    }

    #[tokio::test]
    async fn test_first_consolidation_creates_article() {
        let summarizer = Arc::new(ScriptedSummarizer::new().propose("[Bob]"));
        let mut store = MemoryStore::new(
            MemoryConfig::default().with_window_size(2),
            summarizer.clone(),
            Arc::new(BagOfWordsEmbedder::new(64)),
        )
        .unwrap();

        let report = fill_window(
            &mut store,
            &[(Role::User, "My name is Bob"), (Role::Assistant, "Nice to meet you Bob")],
        )
        .await
        .unwrap();

        // No articles yet, so nothing is classified
        assert!(report.candidates.is_empty());
        assert_eq!(summarizer.count(RequestKind::Classify), 0);
        assert_eq!(report.created_articles.len(), 1);

        let article = &store.topic_articles()[0];
        assert_eq!(article.topic(), "Bob");
        assert_eq!(article.summary_node_ids(), &[report.summary_node_id]);
        assert_eq!(store.summary_nodes()[0].logs().len(), 2);
        assert!(store.summary_nodes()[0].content().unwrap().contains("My name is Bob"));

        let found = store.query("who is Bob").await.unwrap().unwrap();
        assert_eq!(found.topic(), "Bob");
    }

    #[tokio::test]
    async fn test_end_to_end_birthday() {
        let summarizer = Arc::new(ScriptedSummarizer::new().propose("[Bob]"));
        let mut store = MemoryStore::new(
            MemoryConfig::default().with_window_size(3),
            summarizer.clone(),
            Arc::new(BagOfWordsEmbedder::new(64)),
        )
        .unwrap();

        let report = fill_window(
            &mut store,
            &[
                (Role::User, "My name is Bob"),
                (Role::Assistant, "Nice to meet you Bob"),
                (Role::User, "My birthday is 1/1/2000"),
            ],
        )
        .await
        .unwrap();

        assert_eq!(store.summary_nodes().len(), 1);
        assert!(report.candidates.is_empty());
        assert!(!report.created_articles.is_empty());
        for article in store.topic_articles() {
            assert_eq!(article.summary_node_ids(), &[report.summary_node_id]);
        }

        let found = store.query("What is Bob's birthday?").await.unwrap().unwrap();
        assert_eq!(found.id(), report.created_articles[0]);
        assert!(found.content().contains("1/1/2000"));
    }

    #[tokio::test]
    async fn test_relevant_candidate_is_merged() {
        let summarizer = Arc::new(
            ScriptedSummarizer::new()
                .relevant(&["Bob"])
                .propose("[Bob]")
                .propose("[Bob; Birthdays]"),
        );
        let mut store = MemoryStore::new(
            MemoryConfig::default().with_window_size(2),
            summarizer.clone(),
            Arc::new(BagOfWordsEmbedder::new(64)),
        )
        .unwrap();

        fill_window(&mut store, &[(Role::User, "My name is Bob"), (Role::Assistant, "Hi Bob")]).await;
        let bob_id = store.topic_articles()[0].id();
        let created_first = store.topic_articles().len();

        let report = fill_window(
            &mut store,
            &[(Role::User, "I was born on 1/1/2000"), (Role::Assistant, "Noted")],
        )
        .await
        .unwrap();

        assert!(report.candidates.iter().any(|c| c.article_id == bob_id && c.relevant));
        assert_eq!(report.updated_articles, vec![bob_id]);

        // "Bob" was confirmed so only "Birthdays" is new
        let created: Vec<&str> = report
            .created_articles
            .iter()
            .filter_map(|id| store.topic_article(*id))
            .map(|a| a.topic())
            .collect();
        assert_eq!(created, vec!["Birthdays"]);

        let bob = store.topic_article(bob_id).unwrap();
        assert_eq!(bob.summary_node_ids().len(), 2);
        assert_eq!(bob.summary_node_ids()[1], report.summary_node_id);
        assert!(bob.content().contains("1/1/2000"));
        assert_eq!(store.topic_articles().len(), created_first + 1);

        // Only confirmed topics are offered as already covering the summary
        let gap_fill = summarizer.requests_of(RequestKind::ProposeTopics);
        assert!(gap_fill.last().unwrap().content.contains("covering this summary: Bob"));
    }

    #[tokio::test]
    async fn test_only_n_nearest_are_classified() {
        let node = seed_node();
        let articles = vec![
            seed_article("Far", vec![0.0, 1.0], node.id()),
            seed_article("Near", vec![1.0, 0.1], node.id()),
            seed_article("Middle", vec![1.0, 1.0], node.id()),
        ];
        let summarizer = Arc::new(ScriptedSummarizer::new());
        let mut store = MemoryStore::from_parts(
            MemoryConfig::default().with_window_size(1).with_n_nearest(2),
            summarizer.clone(),
            Arc::new(FixedEmbedder::new(vec![1.0, 0.0])),
            Vec::new(),
            vec![node],
            articles,
        )
        .unwrap();

        let report = store.add_log(Role::User, "anything").await.unwrap().unwrap();
        let topics: Vec<&str> = report.candidates.iter().map(|c| c.topic.as_str()).collect();
        assert_eq!(topics, vec!["Near", "Middle"]);
        assert!(report.candidates.iter().all(|c| !c.relevant));
        assert_eq!(summarizer.count(RequestKind::Classify), 2);

        // Nothing confirmed and nothing proposed: the node stays unlinked
        assert!(report.updated_articles.is_empty());
        assert!(report.created_articles.is_empty());
        assert_eq!(store.stats().orphaned_summary_nodes, 1);
    }

    #[tokio::test]
    async fn test_n_nearest_zero_skips_classification() {
        let node = seed_node();
        let articles = vec![seed_article("Bob", vec![1.0, 0.0], node.id())];
        let summarizer = Arc::new(ScriptedSummarizer::new().propose("[Tea]"));
        let mut store = MemoryStore::from_parts(
            MemoryConfig::default().with_window_size(1).with_n_nearest(0),
            summarizer.clone(),
            Arc::new(FixedEmbedder::new(vec![1.0, 0.0])),
            Vec::new(),
            vec![node],
            articles,
        )
        .unwrap();

        let report = store.add_log(Role::User, "I like tea").await.unwrap().unwrap();
        assert_eq!(summarizer.count(RequestKind::Classify), 0);
        assert_eq!(report.created_articles.len(), 1);
    }

    #[tokio::test]
    async fn test_proposed_existing_topic_is_merged_not_duplicated() {
        let node = seed_node();
        let bob = seed_article("Bob", vec![0.0, 1.0], node.id());
        let bob_id = bob.id();
        let summarizer = Arc::new(ScriptedSummarizer::new().propose("[bob; Tea; TEA]"));
        let mut store = MemoryStore::from_parts(
            MemoryConfig::default().with_window_size(1).with_n_nearest(0),
            summarizer,
            Arc::new(FixedEmbedder::new(vec![1.0, 0.0])),
            Vec::new(),
            vec![node],
            vec![bob],
        )
        .unwrap();

        let report = store.add_log(Role::User, "Bob drinks tea").await.unwrap().unwrap();
        assert_eq!(report.updated_articles, vec![bob_id]);
        assert_eq!(report.created_articles.len(), 1);

        let mut keys: Vec<String> = store.topic_articles().iter().map(|a| topic_key(a.topic())).collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), store.topic_articles().len());
        assert_eq!(store.topic_article(bob_id).unwrap().summary_node_ids().len(), 2);
    }

    #[tokio::test]
    async fn test_merge_records_current_model() {
        let node = seed_node();
        let bob = seed_article("Bob", vec![1.0, 0.0], node.id());
        let bob_id = bob.id();
        let config = MemoryConfig {
            window_size: 1,
            model: "gpt-4o-mini".to_string(),
            ..Default::default()
        };
        let mut store = MemoryStore::from_parts(
            config,
            Arc::new(ScriptedSummarizer::new().relevant(&["Bob"])),
            Arc::new(FixedEmbedder::new(vec![1.0, 0.0])),
            Vec::new(),
            vec![node],
            vec![bob],
        )
        .unwrap();
        assert_eq!(store.topic_article(bob_id).unwrap().model_id(), "test-model");

        store.add_log(Role::User, "Bob moved to Oslo").await.unwrap();
        assert_eq!(store.topic_article(bob_id).unwrap().model_id(), "gpt-4o-mini");
    }

    #[tokio::test]
    async fn test_new_topics_are_capped() {
        let summarizer = Arc::new(ScriptedSummarizer::new().propose("[A; B; C; D]"));
        let config = MemoryConfig {
            window_size: 1,
            max_new_topics: 2,
            ..Default::default()
        };
        let mut store = MemoryStore::new(config, summarizer, Arc::new(BagOfWordsEmbedder::new(16))).unwrap();

        let report = store.add_log(Role::User, "letters").await.unwrap().unwrap();
        assert_eq!(report.proposed_topics.len(), 4);
        assert_eq!(report.created_articles.len(), 2);
        assert_eq!(store.topic_articles().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_summary_keeps_buffer() {
        let summarizer = Arc::new(ScriptedSummarizer::new().propose("[Bob]"));
        summarizer.fail_on(Some(RequestKind::Summarize));
        let mut store = MemoryStore::new(
            MemoryConfig::default().with_window_size(2),
            summarizer.clone(),
            Arc::new(BagOfWordsEmbedder::new(32)),
        )
        .unwrap();

        store.add_log(Role::User, "My name is Bob").await.unwrap();
        let err = store.add_log(Role::Assistant, "Hi Bob").await.unwrap_err();
        assert!(matches!(err, Error::Service(_)));
        assert_eq!(store.buffer().len(), 2);
        assert!(store.summary_nodes().is_empty());

        // The next turn retries with the retained window plus the new entry
        summarizer.fail_on(None);
        let report = store.add_log(Role::User, "Still there?").await.unwrap().unwrap();
        assert!(store.buffer().is_empty());
        assert_eq!(store.summary_nodes()[0].logs().len(), 3);
        assert_eq!(store.summary_nodes()[0].id(), report.summary_node_id);
    }

    #[tokio::test]
    async fn test_failed_routing_keeps_node() {
        let summarizer = Arc::new(ScriptedSummarizer::new().propose("[Bob]"));
        summarizer.fail_on(Some(RequestKind::WriteArticle));
        let mut store = MemoryStore::new(
            MemoryConfig::default().with_window_size(1),
            summarizer.clone(),
            Arc::new(BagOfWordsEmbedder::new(32)),
        )
        .unwrap();

        assert!(store.add_log(Role::User, "My name is Bob").await.is_err());
        assert!(store.buffer().is_empty());
        assert_eq!(store.summary_nodes().len(), 1);
        assert!(store.summary_nodes()[0].is_summarized());
        assert!(store.topic_articles().is_empty());
        assert_eq!(store.stats().orphaned_summary_nodes, 1);
    }

    #[tokio::test]
    async fn test_failed_merge_leaves_article_untouched() {
        let node = seed_node();
        let bob = seed_article("Bob", vec![1.0, 0.0], node.id());
        let bob_id = bob.id();
        let summarizer = Arc::new(ScriptedSummarizer::new().relevant(&["Bob"]));
        summarizer.fail_on(Some(RequestKind::Merge));
        let mut store = MemoryStore::from_parts(
            MemoryConfig::default().with_window_size(1),
            summarizer,
            Arc::new(FixedEmbedder::new(vec![1.0, 0.0])),
            Vec::new(),
            vec![node],
            vec![bob.clone()],
        )
        .unwrap();

        assert!(store.add_log(Role::User, "Bob again").await.is_err());
        assert_eq!(store.topic_article(bob_id), Some(&bob));
    }

    #[tokio::test]
    async fn test_consolidate_empty_buffer() {
        let summarizer = Arc::new(ScriptedSummarizer::new());
        let mut store = MemoryStore::new(
            MemoryConfig::default(),
            summarizer.clone(),
            Arc::new(BagOfWordsEmbedder::new(8)),
        )
        .unwrap();

        assert!(store.consolidate().await.unwrap().is_none());
        assert_eq!(summarizer.count(RequestKind::Summarize), 0);
    }

    #[tokio::test]
    async fn test_manual_consolidate_partial_window() {
        let mut store = MemoryStore::new(
            MemoryConfig::default(),
            Arc::new(ScriptedSummarizer::new()),
            Arc::new(BagOfWordsEmbedder::new(16)),
        )
        .unwrap();

        store.add_log(Role::User, "only one turn").await.unwrap();
        let report = store.consolidate().await.unwrap().unwrap();
        assert_eq!(store.summary_node(report.summary_node_id).unwrap().logs().len(), 1);
        assert!(store.buffer().is_empty());
    }

    #[tokio::test]
    async fn test_node_shared_by_many_articles() {
        let summarizer = Arc::new(ScriptedSummarizer::new().propose("[Bob; Tea; Gardens]"));
        let mut store = MemoryStore::new(
            MemoryConfig::default().with_window_size(1),
            summarizer,
            Arc::new(BagOfWordsEmbedder::new(64)),
        )
        .unwrap();

        let report = store.add_log(Role::User, "Bob drinks tea in his garden").await.unwrap().unwrap();
        assert_eq!(report.created_articles.len(), 3);

        let node = store.summary_node(report.summary_node_id).unwrap();
        for article in store.topic_articles() {
            let nodes = store.summary_nodes_of(article);
            assert_eq!(nodes.len(), 1);
            assert!(std::ptr::eq(nodes[0], node));
        }
    }
}
