//! Command implementations for hmcs CLI.
//!
//! `ingest` mutates the store and saves it back; `inspect` only reads.

pub mod ingest;
pub mod inspect;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use colored::Colorize;
use hmcs_core::MemoryStore;
use hmcs_core::client::OpenAiClient;
use hmcs_core::persistence::{JsonFileBackend, LoadOutcome, MemoryBackend, SqliteBackend};
use hmcs_core::retry::Retrying;

use crate::config::Config;

/// Pick a backend from the store file extension.
///
/// Opening never reads the file; an unreadable store is reported by
/// [`MemoryStore::load_or_init`] instead.
pub fn open_backend(path: &Path) -> Result<Box<dyn MemoryBackend>> {
    let is_sqlite = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("db") | Some("sqlite") | Some("sqlite3")
    );

    if is_sqlite {
        let backend = SqliteBackend::open(path)
            .with_context(|| format!("Failed to open SQLite store {}", path.display()))?;
        Ok(Box::new(backend))
    } else {
        Ok(Box::new(JsonFileBackend::new(path)))
    }
}

/// An opened store together with the backend it came from
pub struct Session {
    pub store: MemoryStore,
    pub backend: Box<dyn MemoryBackend>,
}

impl Session {
    /// Load the configured store, wiring in the provider client
    pub fn open(config: &Config) -> Result<Self> {
        let backend = open_backend(&config.paths.store)?;

        let client = OpenAiClient::new(config.provider.clone()).context("Failed to create provider client")?;
        let services = Arc::new(Retrying::new(client, config.retry.clone()));

        let (store, outcome) =
            MemoryStore::load_or_init(backend.as_ref(), config.memory.clone(), services.clone(), services)
                .with_context(|| format!("Failed to load memory store from {}", backend.describe()))?;

        if let LoadOutcome::Recovered { reason, backup } = &outcome {
            eprintln!("{} Stored memory was unusable, starting fresh", "⚠".yellow());
            eprintln!("  {}", reason.dimmed());
            if let Some(backup) = backup {
                eprintln!("  Old store kept at {}", backup.display());
            }
        }

        Ok(Self { store, backend })
    }

    /// Persist the store back to its backend
    pub fn save(&self) -> Result<()> {
        self.backend
            .save(&self.store.serialize())
            .with_context(|| format!("Failed to save memory store to {}", self.backend.describe()))
    }
}
