//! Verify command implementation.

use super::require_ledger;
use cdfsync_tracker::{scan_ledger, FileBackend, LedgerEntry, ScanReport, TrackStatus};
use std::path::Path;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Intact frames.
    pub frames: usize,
    /// Upsert frames.
    pub upserts: usize,
    /// Delete frames.
    pub deletes: usize,
    /// Purge markers.
    pub purges: usize,
    /// Bytes after the last intact frame.
    pub torn_bytes: u64,
    /// Records that are intact on disk but inconsistent.
    pub warnings: Vec<String>,
}

impl VerifyResult {
    fn from_scan(report: &ScanReport) -> Self {
        let mut result = Self {
            frames: report.entries.len(),
            torn_bytes: report.torn_bytes(),
            ..Self::default()
        };
        for (offset, entry) in &report.entries {
            match entry {
                LedgerEntry::Upsert(record) => {
                    result.upserts += 1;
                    if record.status != TrackStatus::Queued
                        && (record.hash.is_none() || record.local.is_none())
                    {
                        result.warnings.push(format!(
                            "Record {} at offset {} is {} without a hash or local object",
                            record.uuid, offset, record.status
                        ));
                    }
                }
                LedgerEntry::Delete(_) => result.deletes += 1,
                LedgerEntry::Purge => result.purges += 1,
            }
        }
        result
    }
}

/// Runs the verify command.
pub fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    require_ledger(path)?;
    println!("Verifying ledger at {:?}", path);
    println!();

    let backend = FileBackend::open(path)?;
    let report = match scan_ledger(&backend) {
        Ok(report) => report,
        Err(e) => {
            println!("  ERROR: {}", e);
            println!();
            println!("✗ Ledger verification failed");
            return Err("Verification failed".into());
        }
    };

    let result = VerifyResult::from_scan(&report);
    println!(
        "  Frames: {} (upserts: {}, deletes: {}, purges: {})",
        result.frames, result.upserts, result.deletes, result.purges
    );
    if result.torn_bytes > 0 {
        println!("  Torn tail: {} bytes (dropped on next open)", result.torn_bytes);
    }
    for warning in &result.warnings {
        println!("    WARNING: {}", warning);
    }

    println!();
    println!("✓ Ledger verification passed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdfsync_protocol::{ContentHash, EntityUuid, LocalId};
    use cdfsync_tracker::{ImportTracker, LedgerTracker};
    use tempfile::tempdir;

    fn uuid(n: u8) -> EntityUuid {
        EntityUuid::from_bytes([n; 16])
    }

    #[test]
    fn counts_frames_by_kind() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("imports.ledger");
        {
            let tracker = LedgerTracker::open_file(&path).unwrap();
            for n in 1..=2 {
                tracker
                    .track_imported(&uuid(n), &ContentHash::new("h"), &LocalId::new("node", "1"))
                    .unwrap();
            }
            tracker.delete(&uuid(1)).unwrap();
            tracker.purge().unwrap();
        }

        let report = scan_ledger(&FileBackend::open(&path).unwrap()).unwrap();
        let result = VerifyResult::from_scan(&report);
        assert_eq!(result.frames, 4);
        assert_eq!(result.upserts, 2);
        assert_eq!(result.deletes, 1);
        assert_eq!(result.purges, 1);
        assert_eq!(result.torn_bytes, 0);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn missing_ledger_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(run(&dir.path().join("absent.ledger")).is_err());
        assert!(!dir.path().join("absent.ledger").exists());
    }
}
