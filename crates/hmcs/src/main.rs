//! hmcs - Hierarchical memory consolidation CLI
//!
//! Ingests dialogue turns into a persisted memory store and inspects the
//! summary nodes and topic articles consolidation builds from them.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod cli;
mod commands;
mod config;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so JSON output on stdout stays clean
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::from_default_env()
                .add_directive("hmcs=info".parse()?)
                .add_directive("hmcs_core=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    // Load configuration, then apply command line overrides
    let mut config = config::Config::load()?;
    if let Some(store) = cli.store {
        config.paths.store = store;
    }
    if let Some(api_key) = cli.api_key {
        config.provider.api_key = Some(api_key);
    }
    if let Some(window_size) = cli.window_size {
        config.memory.window_size = window_size;
    }
    config.validate()?;

    match cli.command {
        Commands::Add { role, content } => commands::ingest::add(role, &content, &config).await,
        Commands::Flush => commands::ingest::flush(&config).await,
        Commands::Query { text, json } => commands::inspect::query(&text, json, &config).await,
        Commands::Search { text, limit, json } => commands::inspect::search(&text, limit, json, &config).await,
        Commands::Topics => commands::inspect::topics(&config),
        Commands::Show { id } => commands::inspect::show(&id, &config),
        Commands::Stats { json } => commands::inspect::stats(json, &config),
        Commands::Export { output } => commands::inspect::export(output.as_deref(), &config),
    }
}
