//! Persistence backends for the memory store.
//!
//! Every backend stores a [`MemoryDocument`]. [`MemoryStore::load_or_init`] turns a
//! missing or unreadable document into a fresh store and tells the caller
//! which of the two happened. An unreadable document is moved aside first so
//! the next save cannot overwrite it.

mod document;
mod json;
#[cfg(feature = "db")]
mod migrations;
#[cfg(feature = "db")]
mod sqlite;

pub use document::{DOCUMENT_VERSION, MemoryDocument, SummaryNodeRecord, TopicArticleRecord};
pub use json::JsonFileBackend;
#[cfg(feature = "db")]
pub use sqlite::SqliteBackend;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::memory::{EmbeddingService, MemoryConfig, MemoryStore, SummarizationService};

/// Storage for memory documents
pub trait MemoryBackend: Send + Sync {
    /// Load the stored document, `None` if nothing has been saved yet
    fn load(&self) -> Result<Option<MemoryDocument>>;

    /// Replace the stored document
    fn save(&self, document: &MemoryDocument) -> Result<()>;

    /// Move an unusable stored document out of the way.
    ///
    /// Returns where it went, or `None` if there was nothing on disk to move.
    fn set_aside(&self) -> Result<Option<PathBuf>>;

    /// Human readable location, for logs
    fn describe(&self) -> String;
}

/// First free `<file>.corrupt`, `<file>.corrupt.1`, ... next to `path`
pub(crate) fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".corrupt");
    let first = path.with_file_name(&name);
    if !first.exists() {
        return first;
    }
    (1u32..)
        .map(|i| {
            let mut numbered = name.clone();
            numbered.push(format!(".{i}"));
            path.with_file_name(numbered)
        })
        .find(|candidate| !candidate.exists())
        .unwrap_or(first)
}

/// How [`MemoryStore::load_or_init`] obtained its store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// A stored document was restored
    Restored {
        summary_nodes: usize,
        topic_articles: usize,
    },
    /// Nothing was stored; the store is empty
    Fresh,
    /// The stored document could not be used; the store is empty and the
    /// old document was moved to `backup`
    Recovered {
        reason: String,
        backup: Option<PathBuf>,
    },
}

impl LoadOutcome {
    pub fn is_recovered(&self) -> bool {
        matches!(self, Self::Recovered { .. })
    }
}

impl MemoryStore {
    /// Load a store from `backend`, falling back to an empty one.
    ///
    /// Corrupt or unparseable documents are set aside and reported as
    /// [`LoadOutcome::Recovered`]. I/O and database failures still propagate,
    /// as does a failure to set the document aside.
    pub fn load_or_init(
        backend: &dyn MemoryBackend,
        config: MemoryConfig,
        summarizer: Arc<dyn SummarizationService>,
        embedder: Arc<dyn EmbeddingService>,
    ) -> Result<(MemoryStore, LoadOutcome)> {
        let location = backend.describe();

        let failure = match backend.load() {
            Ok(Some(document)) => {
                match MemoryStore::deserialize(document, config.clone(), summarizer.clone(), embedder.clone()) {
                    Ok(store) => {
                        let outcome = LoadOutcome::Restored {
                            summary_nodes: store.summary_nodes().len(),
                            topic_articles: store.topic_articles().len(),
                        };
                        info!(location = %location, ?outcome, "Restored memory store");
                        return Ok((store, outcome));
                    }
                    Err(e) => e,
                }
            }
            Ok(None) => {
                info!(location = %location, "No stored memory, starting fresh");
                let store = MemoryStore::new(config, summarizer, embedder)?;
                return Ok((store, LoadOutcome::Fresh));
            }
            Err(e) => e,
        };

        match failure {
            Error::CorruptDocument(_) | Error::Serialization(_) => {
                let store = MemoryStore::new(config, summarizer, embedder)?;
                let backup = backend.set_aside()?;
                warn!(
                    location = %location,
                    error = %failure,
                    backup = ?backup,
                    "Stored memory unusable, starting fresh"
                );
                Ok((
                    store,
                    LoadOutcome::Recovered {
                        reason: failure.to_string(),
                        backup,
                    },
                ))
            }
            other => Err(other),
        }
    }
}
