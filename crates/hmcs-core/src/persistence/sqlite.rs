//! SQLite backend.
//!
//! The document is normalized into one table per entity plus a link table
//! for the article to summary node references. A save replaces the whole
//! snapshot inside a single transaction.
//!
//! The schema is installed on first use rather than on open, so a file that
//! is not a database surfaces as a corrupt document from `load`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use tracing::debug;
use uuid::Uuid;

use super::migrations;
use super::{MemoryBackend, MemoryDocument, SummaryNodeRecord, TopicArticleRecord, backup_path};
use crate::error::{Error, Result};
use crate::types::{EntryLog, Role};

pub struct SqliteBackend {
    conn: Mutex<Connection>,
    /// `None` for in-memory databases
    path: Option<PathBuf>,
    location: String,
}

impl std::fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend").field("location", &self.location).finish()
    }
}

impl SqliteBackend {
    /// Open (or create) a database file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self {
            conn: Mutex::new(Connection::open(path)?),
            path: Some(path.to_path_buf()),
            location: path.display().to_string(),
        })
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            path: None,
            location: ":memory:".to_string(),
        })
    }

    /// Lock the connection with the schema installed
    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        let conn = self.conn.lock().map_err(|_| Error::LockPoisoned)?;
        migrations::run_migrations(&conn)?;
        Ok(conn)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Column helpers
// ─────────────────────────────────────────────────────────────────────────────

fn parse_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| Error::corrupt(format!("invalid id {raw:?}: {e}")))
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::corrupt(format!("invalid timestamp {raw:?}: {e}")))
}

fn parse_role(raw: &str) -> Result<Role> {
    Role::from_str(raw).ok_or_else(|| Error::corrupt(format!("invalid role {raw:?}")))
}

fn parse_embedding(raw: &str) -> Result<Vec<f32>> {
    Ok(serde_json::from_str(raw)?)
}

/// Raw entry log row: (id, summary_node_id, role, content, created_at)
type LogRow = (String, Option<String>, String, String, String);

/// Problems with the file contents rather than with SQLite itself
fn is_corruption(e: &rusqlite::Error) -> bool {
    match e {
        rusqlite::Error::SqliteFailure(err, _) => {
            matches!(err.code, ErrorCode::NotADatabase | ErrorCode::DatabaseCorrupt)
        }
        rusqlite::Error::InvalidColumnType(..) | rusqlite::Error::FromSqlConversionFailure(..) => true,
        _ => false,
    }
}

fn read_snapshot(conn: &Connection) -> Result<Option<MemoryDocument>> {
    let version: Option<String> = conn
        .query_row("SELECT value FROM hmcs_meta WHERE key = 'version'", [], |row| row.get(0))
        .optional()?;
    let Some(version) = version else {
        return Ok(None);
    };
    let version: u32 = version
        .parse()
        .map_err(|_| Error::corrupt(format!("invalid document version {version:?}")))?;

    // Entry logs, grouped by owning summary node (None = rolling buffer)
    let mut stmt = conn.prepare(
        "SELECT id, summary_node_id, role, content, created_at
         FROM hmcs_entry_logs ORDER BY position",
    )?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)))?
        .collect::<rusqlite::Result<Vec<LogRow>>>()?;

    let mut buffer = Vec::new();
    let mut node_logs: HashMap<String, Vec<EntryLog>> = HashMap::new();
    for (id, node_id, role, content, created_at) in rows {
        let entry = EntryLog {
            id: parse_id(&id)?,
            role: parse_role(&role)?,
            content,
            created_at: parse_time(&created_at)?,
        };
        match node_id {
            Some(node_id) => node_logs.entry(node_id).or_default().push(entry),
            None => buffer.push(entry),
        }
    }

    let mut stmt = conn.prepare(
        "SELECT id, content, embedding_json, created_at, model_id
         FROM hmcs_summary_nodes ORDER BY position",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut summary_nodes = Vec::with_capacity(rows.len());
    for (id, content, embedding, created_at, model_id) in rows {
        summary_nodes.push(SummaryNodeRecord {
            id: parse_id(&id)?,
            logs: node_logs.remove(&id).unwrap_or_default(),
            content,
            embedding: embedding.as_deref().map(parse_embedding).transpose()?,
            created_at: parse_time(&created_at)?,
            model_id,
        });
    }

    let mut stmt = conn.prepare(
        "SELECT article_id, summary_node_id
         FROM hmcs_article_summary_nodes ORDER BY article_id, position",
    )?;
    let links = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    let mut article_nodes: HashMap<String, Vec<Uuid>> = HashMap::new();
    for (article_id, node_id) in links {
        article_nodes.entry(article_id).or_default().push(parse_id(&node_id)?);
    }

    let mut stmt = conn.prepare(
        "SELECT id, topic, content, embedding_json, model_id
         FROM hmcs_topic_articles ORDER BY position",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut topic_articles = Vec::with_capacity(rows.len());
    for (id, topic, content, embedding, model_id) in rows {
        topic_articles.push(TopicArticleRecord {
            id: parse_id(&id)?,
            summary_nodes: article_nodes.remove(&id).unwrap_or_default(),
            topic,
            content,
            embedding: parse_embedding(&embedding)?,
            model_id,
        });
    }

    Ok(Some(MemoryDocument {
        version,
        logs: buffer,
        summary_nodes,
        topic_articles,
    }))
}

impl MemoryBackend for SqliteBackend {
    fn load(&self) -> Result<Option<MemoryDocument>> {
        let snapshot = self.conn().and_then(|conn| read_snapshot(&conn));
        match snapshot {
            Err(Error::Database(e)) if is_corruption(&e) => {
                Err(Error::corrupt(format!("{} is not a readable memory database: {e}", self.location)))
            }
            other => other,
        }
    }

    fn save(&self, document: &MemoryDocument) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute_batch(
            "DELETE FROM hmcs_article_summary_nodes;
             DELETE FROM hmcs_topic_articles;
             DELETE FROM hmcs_entry_logs;
             DELETE FROM hmcs_summary_nodes;",
        )?;

        {
            let mut insert_log = tx.prepare(
                "INSERT INTO hmcs_entry_logs (id, summary_node_id, position, role, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            let mut insert_node = tx.prepare(
                "INSERT INTO hmcs_summary_nodes (id, position, content, embedding_json, created_at, model_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            let mut insert_article = tx.prepare(
                "INSERT INTO hmcs_topic_articles (id, position, topic, content, embedding_json, model_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            let mut insert_link = tx.prepare(
                "INSERT INTO hmcs_article_summary_nodes (article_id, summary_node_id, position)
                 VALUES (?1, ?2, ?3)",
            )?;

            for (position, node) in document.summary_nodes.iter().enumerate() {
                let embedding = node.embedding.as_ref().map(serde_json::to_string).transpose()?;
                insert_node.execute(params![
                    node.id.to_string(),
                    position as i64,
                    node.content,
                    embedding,
                    node.created_at.to_rfc3339(),
                    node.model_id,
                ])?;

                let node_id = node.id.to_string();
                for (i, log) in node.logs.iter().enumerate() {
                    insert_log.execute(params![
                        log.id.to_string(),
                        Some(&node_id),
                        i as i64,
                        log.role.as_str(),
                        log.content,
                        log.created_at.to_rfc3339(),
                    ])?;
                }
            }

            for (i, log) in document.logs.iter().enumerate() {
                insert_log.execute(params![
                    log.id.to_string(),
                    None::<String>,
                    i as i64,
                    log.role.as_str(),
                    log.content,
                    log.created_at.to_rfc3339(),
                ])?;
            }

            for (position, article) in document.topic_articles.iter().enumerate() {
                insert_article.execute(params![
                    article.id.to_string(),
                    position as i64,
                    article.topic,
                    article.content,
                    serde_json::to_string(&article.embedding)?,
                    article.model_id,
                ])?;
                for (i, node_id) in article.summary_nodes.iter().enumerate() {
                    insert_link.execute(params![article.id.to_string(), node_id.to_string(), i as i64])?;
                }
            }
        }

        tx.execute(
            "INSERT OR REPLACE INTO hmcs_meta (key, value) VALUES ('version', ?1)",
            params![document.version.to_string()],
        )?;
        tx.commit()?;

        debug!(
            location = %self.location,
            summary_nodes = document.summary_nodes.len(),
            topic_articles = document.topic_articles.len(),
            "Saved memory snapshot"
        );
        Ok(())
    }

    fn set_aside(&self) -> Result<Option<PathBuf>> {
        let Some(path) = &self.path else {
            return Ok(None);
        };
        let mut conn = self.conn.lock().map_err(|_| Error::LockPoisoned)?;
        if !path.exists() {
            return Ok(None);
        }

        // Release the file before renaming it, then start a new one in its place
        let old = std::mem::replace(&mut *conn, Connection::open_in_memory()?);
        if let Err((old, e)) = old.close() {
            *conn = old;
            return Err(e.into());
        }
        let backup = backup_path(path);
        let renamed = std::fs::rename(path, &backup);
        *conn = Connection::open(path)?;
        renamed?;

        debug!(location = %self.location, backup = %backup.display(), "Set aside unreadable database");
        Ok(Some(backup))
    }

    fn describe(&self) -> String {
        format!("sqlite:{}", self.location)
    }
}
