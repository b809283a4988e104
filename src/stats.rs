//! Store statistics.
//!
//! Summarizes what has been synced: how many codes, blocks and files the
//! store holds, with per-stage and per-module breakdowns. Used by
//! `kpb stats` to confirm that syncs are landing.

use anyhow::Result;

use crate::config::Config;
use crate::store::{BlockStore, SqliteBlockStore, StoreStats};

/// Run the stats command: query the store and print a summary.
pub async fn run_stats(config: &Config, json: bool) -> Result<()> {
    let store = SqliteBlockStore::open(config).await?;
    let result = store.stats().await;
    store.close().await;
    let stats = result?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Point Blocks — Store Stats");
    println!("==========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    print_summary(&stats);
    println!();
    Ok(())
}

fn print_summary(stats: &StoreStats) {
    println!("  Codes:       {}", stats.codes);
    println!("  Blocks:      {}", stats.blocks);
    println!("  Files:       {}", stats.files);
    println!(
        "  Last sync:   {}",
        stats
            .last_sync
            .map(format_ts_relative)
            .unwrap_or_else(|| "never".to_string())
    );

    if !stats.by_stage.is_empty() {
        println!();
        println!("  By stage:");
        for (stage, count) in &stats.by_stage {
            println!("  {:<8} {:>6}   {}", stage.as_str(), count, stage.canonical_title());
        }
    }

    if !stats.by_module.is_empty() {
        println!();
        println!("  By module:");
        for (module, count) in &stats.by_module {
            println!("  {:<8} {:>6}", module.as_str(), count);
        }
    }
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
pub fn format_ts_relative(ts: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

pub fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
