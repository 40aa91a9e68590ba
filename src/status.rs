//! Sync status and queue inspection.
//!
//! `paw status` summarizes what is stored locally and what is still waiting
//! to reach the remote service; `paw queue` lists the waiting operations in
//! the order they will be applied.

use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::Value;

use pawtrack_core::models::Collection;
use pawtrack_core::queue::{EntryStatus, SyncQueue};
use pawtrack_core::store::RecordStore;

use crate::engine::SyncEngine;

/// Longest error text shown per queue row.
const MAX_ERROR_CHARS: usize = 60;

struct CollectionStats {
    collection: Collection,
    records: usize,
    unsynced: usize,
}

pub async fn run_status(engine: &SyncEngine, db_path: &Path) -> Result<()> {
    let stats = engine.queue.stats().await?;

    let mut by_collection = Vec::new();
    for collection in Collection::ALL {
        let records = engine.store.get_all(collection).await?;
        let unsynced = records
            .iter()
            .filter(|r| !r.get("synced").and_then(Value::as_bool).unwrap_or(false))
            .count();
        by_collection.push(CollectionStats {
            collection,
            records: records.len(),
            unsynced,
        });
    }

    let db_size = std::fs::metadata(db_path).map(|m| m.len()).unwrap_or(0);

    println!("pawtrack — Sync Status");
    println!("======================");
    println!();
    println!("  Database:    {}", db_path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Pending:     {}", stats.pending);
    println!("  Failed:      {}", stats.failed);
    println!();
    println!("  {:<14} {:>8} {:>9}", "COLLECTION", "RECORDS", "UNSYNCED");
    println!("  {}", "-".repeat(33));
    for s in &by_collection {
        println!(
            "  {:<14} {:>8} {:>9}",
            s.collection.as_str(),
            s.records,
            s.unsynced
        );
    }
    if stats.failed > 0 {
        println!();
        println!("  {} operation(s) stopped retrying; run `paw retry` to re-arm them.", stats.failed);
    }
    println!();
    Ok(())
}

pub async fn run_queue(engine: &SyncEngine) -> Result<()> {
    let entries = engine.queue.drain().await?;
    if entries.is_empty() {
        println!("Queue is empty.");
        return Ok(());
    }

    println!(
        "  {:>5}  {:<7} {:<12} {:<36} {:>3}  {:<8} {:<14} {}",
        "SEQ", "KIND", "COLLECTION", "RECORD", "TRY", "STATUS", "ENQUEUED", "LAST ERROR"
    );
    println!("  {}", "-".repeat(110));
    for entry in &entries {
        let status = match entry.status {
            EntryStatus::Pending => "pending",
            EntryStatus::Failed => "FAILED",
        };
        println!(
            "  {:>5}  {:<7} {:<12} {:<36} {:>3}  {:<8} {:<14} {}",
            entry.seq,
            entry.kind.as_str(),
            entry.collection.as_str(),
            entry.record_id,
            entry.attempts,
            status,
            format_relative(entry.enqueued_at, Utc::now()),
            entry
                .last_error
                .as_deref()
                .map(|e| truncate(e, MAX_ERROR_CHARS))
                .unwrap_or_default()
        );
    }
    println!();
    println!("{} entr{}", entries.len(), if entries.len() == 1 { "y" } else { "ies" });
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

/// "3 mins ago" style timestamp; absolute date beyond a month.
fn format_relative(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = (now - at).num_seconds();

    if delta < 0 {
        return at.format("%Y-%m-%d %H:%M").to_string();
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
        at.format("%Y-%m-%d %H:%M").to_string()
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut short: String = text.chars().take(max).collect();
    short.push('…');
    short
}
