//! Inspect command implementation.

use super::require_ledger;
use cdfsync_tracker::{ImportTracker, LedgerTracker, TrackStatus, TrackerRecord};
use serde::Serialize;
use std::path::Path;

/// Ledger inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Ledger path.
    pub path: String,
    /// Ledger size in bytes.
    pub bytes: u64,
    /// Frames in the log.
    pub frames: u64,
    /// Live records.
    pub records: usize,
    /// Records waiting on a queue item.
    pub queued: usize,
    /// Imported records.
    pub imported: usize,
    /// Records protected from re-import.
    pub auto_update_disabled: usize,
    /// Matching records, after filter and limit.
    pub entries: Vec<TrackerRecord>,
}

/// Runs the inspect command.
pub fn run(
    path: &Path,
    status: Option<&str>,
    limit: Option<usize>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    require_ledger(path)?;
    let status = match status {
        Some(name) => Some(
            TrackStatus::parse(name).ok_or_else(|| format!("Unknown status {name:?}"))?,
        ),
        None => None,
    };

    let tracker = LedgerTracker::open_file(path)?;
    let stats = tracker.stats()?;
    let result = InspectResult {
        path: path.display().to_string(),
        bytes: stats.bytes,
        frames: stats.frames,
        records: stats.records,
        queued: stats.queued,
        imported: stats.imported,
        auto_update_disabled: stats.auto_update_disabled,
        entries: select(tracker.records()?, status, limit),
    };

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn select(
    records: Vec<TrackerRecord>,
    status: Option<TrackStatus>,
    limit: Option<usize>,
) -> Vec<TrackerRecord> {
    records
        .into_iter()
        .filter(|record| status.map_or(true, |wanted| record.status == wanted))
        .take(limit.unwrap_or(usize::MAX))
        .collect()
}

fn print_text_output(result: &InspectResult) {
    println!("cdfsync Ledger Inspection");
    println!("=========================");
    println!();
    println!("Path: {}", result.path);
    println!();
    println!("Storage:");
    println!("  Size:   {}", format_size(result.bytes));
    println!("  Frames: {}", result.frames);
    println!();
    println!("Records: {}", result.records);
    println!("  queued:               {}", result.queued);
    println!("  imported:             {}", result.imported);
    println!("  auto_update_disabled: {}", result.auto_update_disabled);

    if !result.entries.is_empty() {
        println!();
        for record in &result.entries {
            let hash = record
                .hash
                .as_ref()
                .map_or_else(|| "-".to_string(), |hash| hash.to_string());
            let local = record
                .local
                .as_ref()
                .map_or_else(|| "-".to_string(), |local| local.to_string());
            print!("  {} {:<20} {} -> {}", record.uuid, record.status.as_str(), hash, local);
            if let Some(queue_id) = &record.queue_id {
                print!(" [queue {queue_id}]");
            }
            println!();
        }
    }
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} bytes", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
