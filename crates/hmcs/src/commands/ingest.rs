//! Commands that feed the memory store.

use anyhow::{Context, Result};
use colored::Colorize;
use hmcs_core::memory::{ConsolidationReport, MemoryStore};
use hmcs_core::types::Role;

use super::Session;
use crate::config::Config;

/// Record one dialogue turn.
pub async fn add(role: Role, content: &str, config: &Config) -> Result<()> {
    let mut session = Session::open(config)?;

    let result = session.store.add_log(role, content).await;
    // A failed consolidation may still have produced a summary node
    session.save()?;
    let report = result.context("Failed to consolidate memory")?;

    println!("{} Recorded {} turn", "✓".green(), role.to_string().cyan());
    match report {
        Some(report) => print_report(&report, &session.store),
        None => {
            let stats = session.store.stats();
            println!(
                "  Buffered: {}/{}",
                stats.buffered,
                session.store.config().window_size
            );
        }
    }
    Ok(())
}

/// Consolidate the buffer now.
pub async fn flush(config: &Config) -> Result<()> {
    let mut session = Session::open(config)?;

    let result = session.store.consolidate().await;
    session.save()?;

    match result.context("Failed to consolidate memory")? {
        Some(report) => {
            println!("{} Consolidated buffered turns", "✓".green());
            print_report(&report, &session.store);
        }
        None => println!("{} Nothing buffered", "⚠".yellow()),
    }
    Ok(())
}

fn print_report(report: &ConsolidationReport, store: &MemoryStore) {
    println!("  Summary node: {}", report.summary_node_id.to_string().dimmed());

    for candidate in &report.candidates {
        let verdict = if candidate.relevant {
            "relevant".green()
        } else {
            "not relevant".yellow()
        };
        println!(
            "  Candidate {} ({:.3}): {}",
            candidate.topic.bold(),
            candidate.similarity,
            verdict
        );
    }

    for id in &report.updated_articles {
        if let Some(article) = store.topic_article(*id) {
            println!("  {} Updated {}", "↻".cyan(), article.topic().bold());
        }
    }
    for id in &report.created_articles {
        if let Some(article) = store.topic_article(*id) {
            println!("  {} Created {}", "+".green(), article.topic().bold());
        }
    }
    if report.linked_articles().next().is_none() {
        println!("  {}", "No topic articles matched".dimmed());
    }
    println!("  Took {} ms", report.duration_ms);
}
