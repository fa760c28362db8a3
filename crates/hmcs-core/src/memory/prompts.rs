//! Request builders and response parsers for the summarization service.
//!
//! Building a request is pure: every builder returns an immutable
//! [`CompletionRequest`] that can be inspected without network access.
//! Dispatching it is the job of a [`super::SummarizationService`].

use serde::{Deserialize, Serialize};

use crate::types::EntryLog;

/// Positive answer expected from the relevance classifier
pub const RELEVANT_MARKER: &str = "YES";

/// Gap-fill answer meaning "no new topics"
pub const NO_TOPIC_SENTINEL: &str = "NO TOPIC FOUND";

/// Separator between topic names in a gap-fill answer
pub const TOPIC_DELIMITER: char = ';';

/// Longest label accepted as a topic name
pub const TOPIC_LABEL_LEN_MAX: usize = 100;

/// What a request is asking the service to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// Digest a window of raw logs
    Summarize,
    /// Decide whether a summary belongs to an article
    Classify,
    /// Fold a summary into an existing article
    Merge,
    /// Propose topics the summary covers that no article does
    ProposeTopics,
    /// Author a new article for one topic
    WriteArticle,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Summarize => "summarize",
            Self::Classify => "classify",
            Self::Merge => "merge",
            Self::ProposeTopics => "propose_topics",
            Self::WriteArticle => "write_article",
        }
    }
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Decoding parameters passed through to the model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Decoding {
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl Default for Decoding {
    fn default() -> Self {
        Self {
            temperature: 0.5,
            max_tokens: None,
        }
    }
}

/// A fully built request for the summarization service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub kind: RequestKind,
    /// Optional system preamble
    pub system: Option<String>,
    /// User-role content
    pub content: String,
    pub model: String,
    pub decoding: Decoding,
}

/// Builds requests for one model and decoding setup.
#[derive(Debug, Clone)]
pub struct Prompts {
    model: String,
    decoding: Decoding,
}

impl Prompts {
    pub fn new(model: impl Into<String>, decoding: Decoding) -> Self {
        Self {
            model: model.into(),
            decoding,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request(&self, kind: RequestKind, system: &str, content: String, decoding: Decoding) -> CompletionRequest {
        CompletionRequest {
            kind,
            system: Some(system.to_string()),
            content,
            model: self.model.clone(),
            decoding,
        }
    }

    /// Yes/no answers should not be sampled
    fn deterministic(&self) -> Decoding {
        Decoding {
            temperature: 0.0,
            ..self.decoding
        }
    }

    /// Digest a window of raw logs
    pub fn summarize_logs(&self, logs: &[EntryLog]) -> CompletionRequest {
        let content = format!(
            "Summarize the following conversation excerpt. Keep every concrete fact \
             (names, dates, preferences, decisions) and drop small talk.\n\n{}",
            transcript(logs)
        );
        self.request(
            RequestKind::Summarize,
            "You compress conversation logs into short factual summaries.",
            content,
            self.decoding,
        )
    }

    /// Ask whether a summary is relevant to an existing article
    pub fn classify_relevance(&self, topic: &str, article: &str, summary: &str) -> CompletionRequest {
        let content = format!(
            "Topic: {topic}\n\nArticle:\n{article}\n\nNew summary:\n{summary}\n\n\
             Does the new summary contain information about this topic? \
             Answer with exactly {RELEVANT_MARKER} or NO."
        );
        self.request(
            RequestKind::Classify,
            "You decide whether new information belongs in a knowledge base article.",
            content,
            self.deterministic(),
        )
    }

    /// Fold a new summary into an article, regenerating it
    pub fn merge_article(&self, topic: &str, article: &str, summary: &str) -> CompletionRequest {
        let content = format!(
            "Topic: {topic}\n\nCurrent article:\n{article}\n\nNew information:\n{summary}\n\n\
             Rewrite the article so it incorporates the new information that concerns \
             the topic. Keep it concise and keep existing facts unless the new \
             information contradicts them."
        );
        self.request(
            RequestKind::Merge,
            "You maintain knowledge base articles about single topics.",
            content,
            self.decoding,
        )
    }

    /// Ask for the minimal list of topics not yet covered
    pub fn propose_topics(&self, summary: &str, existing_topics: &[String]) -> CompletionRequest {
        let existing = if existing_topics.is_empty() {
            "(none)".to_string()
        } else {
            existing_topics.join("; ")
        };
        let content = format!(
            "Summary:\n{summary}\n\nTopics already covering this summary: {existing}\n\n\
             List the smallest set of NEW topics needed to cover the information in the \
             summary that the existing topics do not. Answer as a bracketed list \
             separated by semicolons, for example [Topic A; Topic B]. If nothing is \
             left uncovered, answer {NO_TOPIC_SENTINEL}."
        );
        self.request(
            RequestKind::ProposeTopics,
            "You organize a knowledge base into topics.",
            content,
            self.deterministic(),
        )
    }

    /// Author the first version of an article for a new topic
    pub fn write_article(&self, topic: &str, summary: &str) -> CompletionRequest {
        let content = format!(
            "Topic: {topic}\n\nSource summary:\n{summary}\n\n\
             Write a short knowledge base article about the topic using only the \
             information in the summary that concerns it."
        );
        self.request(
            RequestKind::WriteArticle,
            "You write knowledge base articles about single topics.",
            content,
            self.decoding,
        )
    }
}

/// Render logs as `role: content` lines
pub fn transcript(logs: &[EntryLog]) -> String {
    logs.iter()
        .map(|log| format!("{}: {}", log.role, log.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Interpret a classifier answer.
///
/// Only an exact positive marker counts; anything else, including empty or
/// hedged answers, means "not relevant".
pub fn parse_relevance(answer: &str) -> bool {
    let answer = answer
        .trim()
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '*'))
        .trim_end_matches('.')
        .trim();
    answer.eq_ignore_ascii_case(RELEVANT_MARKER)
}

/// Parse a gap-fill answer into topic names, in order.
///
/// Lenient about quoting and stray brackets. A sentinel answer, an empty
/// answer or free-form prose yields no topics. Without brackets, only a
/// single line containing the delimiter is read as a list.
pub fn parse_topic_list(raw: &str) -> Vec<String> {
    let normalized = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.to_uppercase().contains(NO_TOPIC_SENTINEL) {
        return Vec::new();
    }

    let body = match (raw.find('['), raw.rfind(']')) {
        (Some(start), Some(end)) if start < end => &raw[start + 1..end],
        _ => {
            let bare = raw.trim();
            if bare.contains('\n') || !bare.contains(TOPIC_DELIMITER) {
                tracing::debug!(answer = %raw, "Unparseable topic list");
                return Vec::new();
            }
            bare
        }
    };

    body.split(TOPIC_DELIMITER)
        .map(clean_label)
        .filter(|label| !label.is_empty() && label.chars().count() <= TOPIC_LABEL_LEN_MAX)
        .collect()
}

/// Comparison key for topic labels: trimmed, whitespace collapsed, case-folded
pub fn topic_key(label: &str) -> String {
    label.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

fn clean_label(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '[' | ']' | '*') || c.is_whitespace())
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
