//! Index statistics and health overview.
//!
//! Summarises what is indexed and what is waiting in the uploads directory.
//! Used by `krag stats` to confirm that uploads and rebuilds took effect.
//! Reads the persisted state only, so it needs no provider credentials.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use walkdir::WalkDir;

use crate::config::Config;
use crate::sources::UploadsDir;
use crate::store::VectorIndexStore;

/// Run the stats command: load the index and uploads, then print a summary.
pub fn run_stats(config: &Config) -> Result<()> {
    let store = VectorIndexStore::load(&config.index.dir)
        .with_context(|| "Failed to load the vector index (run `krag rebuild` to recreate it)")?;
    let stats = store.stats();
    let uploads = UploadsDir::new(&config.documents)?.list()?;

    println!("Knowledge RAG: Index Stats");
    println!("==========================");
    println!();
    println!("  Index:       {}", config.index.dir.display());
    println!("  Size:        {}", format_bytes(dir_size(&config.index.dir)));
    println!("  Generation:  {}", stats.generation);
    println!();
    println!("  Documents:   {}", stats.documents);
    println!("  Chunks:      {}", stats.rows);
    println!(
        "  Dimensions:  {}",
        stats
            .dims
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".to_string())
    );

    println!();
    println!("  Uploads:     {}", uploads.len());

    let mut by_status: BTreeMap<String, usize> = BTreeMap::new();
    for u in &uploads {
        *by_status
            .entry(u.status.clone().unwrap_or_else(|| "unknown".to_string()))
            .or_default() += 1;
    }
    for (status, count) in &by_status {
        println!("    {:<12} {:>6}", status, count);
    }

    if let Some(latest) = uploads
        .iter()
        .filter_map(|u| u.timestamp)
        .fold(None, |acc: Option<f64>, ts| Some(acc.map_or(ts, |a| a.max(ts))))
    {
        println!("  Last upload: {}", format_ts_relative(latest as i64));
    }

    println!();
    Ok(())
}

fn dir_size(dir: &std::path::Path) -> u64 {
    WalkDir::new(dir)
        .into_iter()
        .flatten()
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;
    if delta < 0 {
        return format_ts_iso(ts);
    }

    let plural = |n: i64| if n == 1 { "" } else { "s" };
    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        format!("{} min{} ago", delta / 60, plural(delta / 60))
    } else if delta < 86400 {
        format!("{} hour{} ago", delta / 3600, plural(delta / 3600))
    } else if delta < 86400 * 30 {
        format!("{} day{} ago", delta / 86400, plural(delta / 86400))
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn test_relative_time() {
        let now = chrono::Utc::now().timestamp();
        assert_eq!(format_ts_relative(now), "just now");
        assert_eq!(format_ts_relative(now - 7200), "2 hours ago");
        assert_eq!(format_ts_relative(now - 86400), "1 day ago");
    }
}
