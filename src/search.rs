//! `krag search` and `krag ask`: retrieval and answers on the terminal.
//!
//! Both commands need an embedding provider; with `provider = "disabled"`
//! they fail up front instead of reporting an empty result.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::knowledge::KnowledgeBase;
use crate::models::RetrievedChunk;

/// Longest excerpt printed per hit, in characters.
const EXCERPT_CHARS: usize = 240;

/// Fail with a configuration hint when `krag <command>` has no embedder.
pub fn require_embeddings(config: &Config, command: &str) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!(
            "`krag {}` requires an embedding provider. Set [embedding] provider in the config.",
            command
        );
    }
    Ok(())
}

/// Run the search command: print the nearest chunks for `query`.
pub async fn run_search(config: &Config, query: &str, k: Option<usize>) -> Result<()> {
    require_embeddings(config, "search")?;
    let kb = KnowledgeBase::open(config)?;

    let hits = kb.retrieve(query, k).await;
    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }
    print_hits(&hits);
    Ok(())
}

/// Run the ask command: print the generated answer, then its sources.
pub async fn run_ask(config: &Config, query: &str, k: Option<usize>) -> Result<()> {
    require_embeddings(config, "ask")?;
    let kb = KnowledgeBase::open(config)?;

    let answer = kb.ask(query, k).await?;
    println!("{}", answer.text);

    if !answer.is_fallback() {
        println!();
        println!("Sources:");
        for (i, hit) in answer.sources.iter().enumerate() {
            println!(
                "  {}. {} (chunk {}, distance {:.4})",
                i + 1,
                hit.metadata.title,
                hit.metadata.chunk_index,
                hit.distance
            );
        }
    }
    Ok(())
}

fn print_hits(hits: &[RetrievedChunk]) {
    for (i, hit) in hits.iter().enumerate() {
        let meta = &hit.metadata;
        println!("{}. [{:.4}] {}", i + 1, hit.distance, meta.title);
        println!("    document: {}", meta.document_id);
        println!("    chunk: {} (offset {})", meta.chunk_index, meta.start);
        if !meta.tags.is_empty() {
            println!("    tags: {}", meta.tags.join(", "));
        }
        println!("    excerpt: \"{}\"", excerpt(&meta.text));
        println!();
    }
}

fn excerpt(text: &str) -> String {
    let flat = text.replace('\n', " ");
    let flat = flat.trim();
    match flat.char_indices().nth(EXCERPT_CHARS) {
        Some((byte, _)) => format!("{}…", &flat[..byte]),
        None => flat.to_string(),
    }
}
