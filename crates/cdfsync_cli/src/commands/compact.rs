//! Compact command implementation.

use super::require_ledger;
use cdfsync_tracker::LedgerTracker;
use std::path::Path;

/// Runs the compact command.
pub fn run(path: &Path, dry_run: bool) -> Result<(), Box<dyn std::error::Error>> {
    require_ledger(path)?;
    println!("Compacting ledger at {:?}", path);
    if dry_run {
        println!("(dry run - no changes will be made)");
    }
    println!();

    let tracker = LedgerTracker::open_file(path)?;
    let stats = tracker.stats()?;
    println!("Compaction Analysis:");
    println!("  Frames:       {}", stats.frames);
    println!("  Live records: {}", stats.records);
    println!("  Size:         {} bytes", stats.bytes);

    if dry_run {
        return Ok(());
    }
    if stats.frames <= stats.records as u64 {
        println!();
        println!("No compaction needed - ledger is already optimal");
        return Ok(());
    }

    println!();
    println!("Performing compaction...");
    let report = tracker.compact()?;
    let saved = report.bytes_before.saturating_sub(report.bytes_after);
    println!("  Frames: {} -> {}", report.frames_before, report.frames_after);
    println!(
        "  Space saved: {} bytes ({:.1}%)",
        saved,
        if report.bytes_before > 0 {
            saved as f64 / report.bytes_before as f64 * 100.0
        } else {
            0.0
        }
    );
    println!("✓ Compaction complete");
    Ok(())
}
