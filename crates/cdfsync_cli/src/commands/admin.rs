//! Administrative ledger edits: purge, forget and auto-update.
//!
//! Forgetting an entity only drops the ledger record. The next import of
//! the entity fetches and materializes it again.

use super::require_ledger;
use cdfsync_protocol::EntityUuid;
use cdfsync_tracker::{ImportTracker, LedgerTracker};
use std::path::Path;
use tracing::info;

/// Forgets every tracked import once `confirmed`.
pub fn purge(path: &Path, confirmed: bool) -> Result<(), Box<dyn std::error::Error>> {
    require_ledger(path)?;
    let tracker = LedgerTracker::open_file(path)?;
    let records = tracker.stats()?.records;

    if !confirmed {
        println!(
            "Purge would forget {} tracked imports. Re-run with --yes to confirm.",
            records
        );
        return Ok(());
    }

    let removed = tracker.purge()?;
    info!(removed, "Ledger purged");
    println!("✓ Forgot {} tracked imports", removed);
    Ok(())
}

/// Removes the records of `uuids`.
pub fn forget(path: &Path, uuids: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let uuids = parse_uuids(uuids)?;
    require_ledger(path)?;
    let tracker = LedgerTracker::open_file(path)?;

    for uuid in &uuids {
        if tracker.delete(uuid)? {
            println!("  forgot {}", uuid);
        } else {
            println!("  {} is not tracked", uuid);
        }
    }
    Ok(())
}

/// Enables or disables automatic updates for `uuid`.
pub fn set_auto_update(
    path: &Path,
    uuid: &str,
    enabled: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let uuid = EntityUuid::parse(uuid)?;
    require_ledger(path)?;
    let tracker = LedgerTracker::open_file(path)?;

    if !tracker.set_auto_update(&uuid, enabled)? {
        return Err(format!("{} is not tracked", uuid).into());
    }
    let state = if enabled { "enabled" } else { "disabled" };
    println!("✓ Automatic updates {} for {}", state, uuid);
    Ok(())
}

fn parse_uuids(raw: &[String]) -> Result<Vec<EntityUuid>, Box<dyn std::error::Error>> {
    raw.iter()
        .map(|s| {
            EntityUuid::parse(s).map_err(|e| -> Box<dyn std::error::Error> {
                format!("{s:?}: {e}").into()
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdfsync_protocol::{ContentHash, LocalId};
    use cdfsync_tracker::TrackStatus;
    use tempfile::tempdir;

    fn uuid(n: u8) -> EntityUuid {
        EntityUuid::from_bytes([n; 16])
    }

    fn seeded_ledger(path: &Path) {
        let tracker = LedgerTracker::open_file(path).unwrap();
        for n in 1..=3 {
            tracker
                .track_imported(&uuid(n), &ContentHash::new("h"), &LocalId::new("node", n.to_string()))
                .unwrap();
        }
    }

    #[test]
    fn purge_requires_confirmation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("imports.ledger");
        seeded_ledger(&path);

        purge(&path, false).unwrap();
        assert_eq!(LedgerTracker::open_file(&path).unwrap().stats().unwrap().records, 3);

        purge(&path, true).unwrap();
        assert_eq!(LedgerTracker::open_file(&path).unwrap().stats().unwrap().records, 0);
    }

    #[test]
    fn forget_rejects_bad_uuid_before_writing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("imports.ledger");
        seeded_ledger(&path);

        let args = vec![uuid(1).to_string(), "nope".to_string()];
        assert!(forget(&path, &args).is_err());
        assert_eq!(LedgerTracker::open_file(&path).unwrap().stats().unwrap().records, 3);

        forget(&path, &[uuid(1).to_string()]).unwrap();
        let tracker = LedgerTracker::open_file(&path).unwrap();
        assert!(tracker.get(&uuid(1)).unwrap().is_none());
    }

    #[test]
    fn auto_update_toggles() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("imports.ledger");
        seeded_ledger(&path);

        set_auto_update(&path, &uuid(2).to_string(), false).unwrap();
        let tracker = LedgerTracker::open_file(&path).unwrap();
        assert_eq!(
            tracker.status(&uuid(2)).unwrap(),
            Some(TrackStatus::AutoUpdateDisabled)
        );
        drop(tracker);

        assert!(set_auto_update(&path, &uuid(9).to_string(), true).is_err());
    }
}
