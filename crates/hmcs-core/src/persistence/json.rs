//! Pretty-printed JSON file backend.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::{MemoryBackend, MemoryDocument, backup_path};
use crate::error::{Error, Result};

/// Stores the document as a single JSON file.
///
/// Saves write a sibling temp file and rename it over the target, so a crash
/// mid-write never leaves a truncated document behind.
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl MemoryBackend for JsonFileBackend {
    fn load(&self) -> Result<Option<MemoryDocument>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) if e.kind() == ErrorKind::InvalidData => {
                return Err(Error::corrupt(format!("{} is not UTF-8 text: {e}", self.path.display())));
            }
            Err(e) => return Err(e.into()),
        };
        let document = serde_json::from_str(&raw)?;
        Ok(Some(document))
    }

    fn save(&self, document: &MemoryDocument) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let temp = self.temp_path();
        fs::write(&temp, serde_json::to_string_pretty(document)?)?;
        fs::rename(&temp, &self.path)?;

        debug!(
            path = %self.path.display(),
            summary_nodes = document.summary_nodes.len(),
            topic_articles = document.topic_articles.len(),
            "Saved memory document"
        );
        Ok(())
    }

    fn set_aside(&self) -> Result<Option<PathBuf>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let backup = backup_path(&self.path);
        fs::rename(&self.path, &backup)?;
        Ok(Some(backup))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}
