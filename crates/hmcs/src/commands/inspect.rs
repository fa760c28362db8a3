//! Read-only commands over the memory store.

use std::path::Path;

use anyhow::{Context, Result, bail};
use colored::Colorize;
use hmcs_core::types::{SummaryNode, TopicArticle};
use uuid::Uuid;

use super::Session;
use crate::config::Config;

/// Longest article excerpt shown in listings
const EXCERPT_LEN: usize = 80;

fn excerpt(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= EXCERPT_LEN {
        flat
    } else {
        let cut: String = flat.chars().take(EXCERPT_LEN).collect();
        format!("{cut}…")
    }
}

/// Show the single best matching article.
pub async fn query(text: &str, json: bool, config: &Config) -> Result<()> {
    let session = Session::open(config)?;

    let article = session.store.query(text).await.context("Failed to query memory")?;
    let Some(article) = article else {
        if json {
            println!("null");
        } else {
            println!("{} No topic articles yet", "⚠".yellow());
        }
        return Ok(());
    };

    if json {
        let value = serde_json::json!({
            "id": article.id(),
            "topic": article.topic(),
            "content": article.content(),
            "summary_nodes": article.summary_node_ids(),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        print_article(article, &session);
    }
    Ok(())
}

/// Rank articles by similarity.
pub async fn search(text: &str, limit: usize, json: bool, config: &Config) -> Result<()> {
    let session = Session::open(config)?;
    let results = session.store.search(text, limit).await.context("Failed to search memory")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }
    if results.is_empty() {
        println!("{} No topic articles yet", "⚠".yellow());
        return Ok(());
    }

    for (rank, result) in results.iter().enumerate() {
        println!(
            "{:>2}. {} {}",
            rank + 1,
            result.topic.bold(),
            format!("({:.3})", result.similarity).dimmed()
        );
        println!("    {}", excerpt(&result.content));
    }
    Ok(())
}

/// List every topic article.
pub fn topics(config: &Config) -> Result<()> {
    let session = Session::open(config)?;
    let articles = session.store.topic_articles();

    if articles.is_empty() {
        println!("{} No topic articles yet", "⚠".yellow());
        return Ok(());
    }

    println!("{} {} topic articles", "📚".cyan(), articles.len());
    println!();
    for article in articles {
        println!(
            "  {} {} {}",
            article.id().to_string().dimmed(),
            article.topic().bold(),
            format!("[{} summary nodes]", article.summary_node_ids().len()).dimmed()
        );
    }
    Ok(())
}

/// Show an article or a summary node.
pub fn show(id: &str, config: &Config) -> Result<()> {
    let id = Uuid::parse_str(id).with_context(|| format!("Invalid id: {id}"))?;
    let session = Session::open(config)?;

    if let Some(article) = session.store.topic_article(id) {
        print_article(article, &session);
    } else if let Some(node) = session.store.summary_node(id) {
        print_summary_node(node, &session);
    } else {
        bail!("No topic article or summary node with id {}", id);
    }
    Ok(())
}

/// Print counts.
pub fn stats(json: bool, config: &Config) -> Result<()> {
    let session = Session::open(config)?;
    let stats = session.store.stats();

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("{} Memory Statistics", "📊".cyan());
    println!("  Store: {}", session.backend.describe().dimmed());
    println!();
    println!("  Buffered turns:   {}", stats.buffered.to_string().yellow());
    println!("  Summary nodes:    {}", stats.summary_nodes.to_string().cyan());
    println!("    Unlinked:       {}", stats.orphaned_summary_nodes.to_string().dimmed());
    println!("  Topic articles:   {}", stats.topic_articles.to_string().green());
    Ok(())
}

/// Dump the memory document.
pub fn export(output: Option<&Path>, config: &Config) -> Result<()> {
    let session = Session::open(config)?;
    let json = serde_json::to_string_pretty(&session.store.serialize())?;

    match output {
        Some(path) => {
            std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
            println!("{} Exported memory to {}", "✓".green(), path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn print_article(article: &TopicArticle, session: &Session) {
    println!("{} {}", "Topic:".bold(), article.topic().cyan().bold());
    println!("{} {}", "ID:".bold(), article.id().to_string().dimmed());
    println!();
    println!("{}", article.content());
    println!();
    println!("{}", "Built from:".bold());
    for node in session.store.summary_nodes_of(article) {
        println!(
            "  {} {} ({} turns)",
            node.created_at().format("%Y-%m-%d %H:%M"),
            node.id().to_string().dimmed(),
            node.logs().len()
        );
    }
}

fn print_summary_node(node: &SummaryNode, session: &Session) {
    println!("{} {}", "Summary node:".bold(), node.id().to_string().dimmed());
    println!("{} {}", "Created:".bold(), node.created_at().format("%Y-%m-%d %H:%M:%S"));
    println!("{} {}", "Model:".bold(), node.model_id());
    println!();
    println!("{}", node.content().unwrap_or("(not summarized)"));
    println!();

    println!("{}", "Turns:".bold());
    for log in node.logs() {
        println!("  {}: {}", log.role.to_string().cyan(), log.content);
    }

    let topics: Vec<&str> = session
        .store
        .topic_articles()
        .iter()
        .filter(|a| a.summary_node_ids().contains(&node.id()))
        .map(|a| a.topic())
        .collect();
    if !topics.is_empty() {
        println!();
        println!("{} {}", "Topics:".bold(), topics.join(", "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excerpt() {
        assert_eq!(excerpt("short\n  text"), "short text");
        let long = "word ".repeat(40);
        let cut = excerpt(&long);
        assert!(cut.ends_with('…'));
        assert_eq!(cut.chars().count(), EXCERPT_LEN + 1);
    }
}
