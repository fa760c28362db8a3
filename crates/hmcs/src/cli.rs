//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use hmcs_core::types::Role;

/// Hierarchical memory consolidation CLI
///
/// Feeds dialogue turns into a persisted memory store and inspects the
/// summary nodes and topic articles it builds.
#[derive(Parser, Debug)]
#[command(name = "hmcs")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Memory store file (.json, or .db/.sqlite for SQLite)
    #[arg(long, global = true, env = "HMCS_STORE")]
    pub store: Option<PathBuf>,

    /// API key for the summarization and embedding provider
    #[arg(long, global = true, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Override the consolidation window size
    #[arg(long, global = true)]
    pub window_size: Option<usize>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Record a dialogue turn (consolidates when the window is full)
    Add {
        /// Speaker: user, assistant or system
        #[arg(value_parser = parse_role)]
        role: Role,

        /// Turn content
        content: String,
    },

    /// Consolidate whatever is buffered, even a partial window
    Flush,

    /// Show the topic article closest to a question
    Query {
        /// Free text to match against topic articles
        text: String,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Rank topic articles by similarity
    Search {
        /// Free text to match against topic articles
        text: String,

        /// Maximum number of results
        #[arg(short, long, default_value = "5")]
        limit: usize,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// List topic articles
    Topics,

    /// Show a topic article or summary node by id
    Show {
        /// Article or summary node id
        id: String,
    },

    /// Show memory statistics
    Stats {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Write the memory document as JSON
    Export {
        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn parse_role(s: &str) -> Result<Role, String> {
    Role::from_str(&s.to_lowercase()).ok_or_else(|| format!("unknown role '{s}' (use user, assistant or system)"))
}
