//! Deterministic service doubles for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::error::{ServiceError, ServiceResult};
use crate::memory::prompts::{NO_TOPIC_SENTINEL, RELEVANT_MARKER};
use crate::memory::{CompletionRequest, EmbeddingService, RequestKind, SummarizationService};

/// Answers every request kind from its content, without a model.
///
/// Classification says yes for the configured topics; gap-fill answers are
/// served from a queue and fall back to the sentinel once it is empty.
#[derive(Default)]
pub(crate) struct ScriptedSummarizer {
    relevant: Vec<String>,
    proposals: Mutex<VecDeque<String>>,
    fail_kind: Mutex<Option<RequestKind>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedSummarizer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn relevant(mut self, topics: &[&str]) -> Self {
        self.relevant = topics.iter().map(|t| t.to_string()).collect();
        self
    }

    /// Queue a raw gap-fill answer
    pub(crate) fn propose(self, raw: &str) -> Self {
        self.proposals.lock().unwrap().push_back(raw.to_string());
        self
    }

    /// Make every request of `kind` fail with a fatal error
    pub(crate) fn fail_on(&self, kind: Option<RequestKind>) {
        *self.fail_kind.lock().unwrap() = kind;
    }

    pub(crate) fn count(&self, kind: RequestKind) -> usize {
        self.requests_of(kind).len()
    }

    pub(crate) fn requests_of(&self, kind: RequestKind) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect()
    }
}

/// Text following `header` up to the next blank line
fn section<'a>(content: &'a str, header: &str) -> &'a str {
    content
        .split_once(header)
        .map(|(_, rest)| rest.split("\n\n").next().unwrap_or_default())
        .unwrap_or_default()
        .trim()
}

fn topic_of(content: &str) -> &str {
    content
        .lines()
        .next()
        .and_then(|line| line.strip_prefix("Topic: "))
        .unwrap_or_default()
        .trim()
}

#[async_trait]
impl SummarizationService for ScriptedSummarizer {
    async fn complete(&self, request: &CompletionRequest) -> ServiceResult<String> {
        self.requests.lock().unwrap().push(request.clone());

        if *self.fail_kind.lock().unwrap() == Some(request.kind) {
            return Err(ServiceError::fatal(format!("scripted failure for {}", request.kind)));
        }

        let answer = match request.kind {
            RequestKind::Summarize => {
                let transcript = request.content.rsplit("\n\n").next().unwrap_or_default();
                format!("Summary: {transcript}")
            }
            RequestKind::Classify => {
                let topic = topic_of(&request.content);
                if self.relevant.iter().any(|t| t == topic) {
                    RELEVANT_MARKER.to_string()
                } else {
                    "NO".to_string()
                }
            }
            RequestKind::Merge => format!(
                "Article about {}. {} {}",
                topic_of(&request.content),
                section(&request.content, "Current article:\n"),
                section(&request.content, "New information:\n"),
            ),
            RequestKind::ProposeTopics => self
                .proposals
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| NO_TOPIC_SENTINEL.to_string()),
            RequestKind::WriteArticle => format!(
                "Article about {}. {}",
                topic_of(&request.content),
                section(&request.content, "Source summary:\n"),
            ),
        };
        Ok(answer)
    }
}

/// Hashes words into a fixed number of buckets.
///
/// Texts sharing words get similar vectors; a text without words maps to a
/// unit vector on the first axis so the result is never zero.
pub(crate) struct BagOfWordsEmbedder {
    dimension: usize,
}

impl BagOfWordsEmbedder {
    pub(crate) fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl EmbeddingService for BagOfWordsEmbedder {
    async fn embed(&self, text: &str) -> ServiceResult<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimension];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            // FNV-1a
            let hash = word
                .to_lowercase()
                .bytes()
                .fold(0xcbf29ce484222325u64, |h, b| (h ^ b as u64).wrapping_mul(0x100000001b3));
            vector[(hash % self.dimension as u64) as usize] += 1.0;
        }
        if vector.iter().all(|x| *x == 0.0) {
            vector[0] = 1.0;
        }
        Ok(vector)
    }

    fn model_name(&self) -> &str {
        "bag-of-words"
    }
}

/// Returns a configured vector per text, or a fallback for anything else
pub(crate) struct FixedEmbedder {
    fallback: Vec<f32>,
    overrides: HashMap<String, Vec<f32>>,
    calls: AtomicUsize,
}

impl FixedEmbedder {
    pub(crate) fn new(fallback: Vec<f32>) -> Self {
        Self {
            fallback,
            overrides: HashMap::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn with(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.overrides.insert(text.to_string(), vector);
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingService for FixedEmbedder {
    async fn embed(&self, text: &str) -> ServiceResult<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.overrides.get(text).unwrap_or(&self.fallback).clone())
    }

    fn model_name(&self) -> &str {
        "fixed"
    }
}
