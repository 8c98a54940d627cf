//! Durable append-only import ledger.

use crate::backend::LedgerBackend;
use crate::error::{TrackerError, TrackerResult};
use crate::file::FileBackend;
use crate::memory::InMemoryBackend;
use crate::record::{
    crc_matches, FrameHeader, LedgerEntry, TrackStatus, TrackerRecord, CRC_SIZE, HEADER_SIZE,
};
use crate::tracker::ImportTracker;
use cdfsync_protocol::{ContentHash, EntityUuid, LocalId};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// Result of scanning a ledger without modifying it.
#[derive(Debug, Clone)]
pub struct ScanReport {
    /// Every intact entry with the offset of its frame.
    pub entries: Vec<(u64, LedgerEntry)>,
    /// Length of the intact prefix.
    pub valid_len: u64,
    /// Total size of the backend.
    pub total_len: u64,
}

impl ScanReport {
    /// Returns the number of bytes in a torn tail.
    #[must_use]
    pub fn torn_bytes(&self) -> u64 {
        self.total_len - self.valid_len
    }
}

/// Scans every frame in `backend`.
///
/// An incomplete final frame, or a final frame whose CRC does not match, is
/// a torn write and ends the scan. Any damage before the final frame is
/// corruption.
///
/// # Errors
///
/// Returns [`TrackerError::Corrupted`] for damaged frames before the tail, or
/// an I/O error.
pub fn scan_ledger<B: LedgerBackend + ?Sized>(backend: &B) -> TrackerResult<ScanReport> {
    let total_len = backend.size()?;
    let mut offset = 0u64;
    let mut entries = Vec::new();

    while offset < total_len {
        let remaining = total_len - offset;
        if remaining < HEADER_SIZE as u64 {
            break;
        }
        let header_bytes = backend.read_at(offset, HEADER_SIZE)?;
        let header = FrameHeader::parse(&header_bytes, offset)?;
        let frame_len = header.frame_len() as u64;
        if remaining < frame_len {
            break;
        }

        let rest = backend.read_at(offset + HEADER_SIZE as u64, header.payload_len + CRC_SIZE)?;
        if !crc_matches(&header_bytes, &rest) {
            if offset + frame_len == total_len {
                break;
            }
            return Err(TrackerError::corrupted(offset, "crc mismatch"));
        }
        let entry = LedgerEntry::decode(header.entry_type, &rest[..header.payload_len])
            .map_err(|e| TrackerError::corrupted(offset, e.to_string()))?;

        entries.push((offset, entry));
        offset += frame_len;
    }

    Ok(ScanReport {
        entries,
        valid_len: offset,
        total_len,
    })
}

/// Counts describing a ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerStats {
    /// Live records.
    pub records: usize,
    /// Records with status `queued`.
    pub queued: usize,
    /// Records with status `imported`.
    pub imported: usize,
    /// Records with status `auto_update_disabled`.
    pub auto_update_disabled: usize,
    /// Frames in the log, live or superseded.
    pub frames: u64,
    /// Size of the log in bytes.
    pub bytes: u64,
}

/// Outcome of a compaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionReport {
    /// Log size before compaction.
    pub bytes_before: u64,
    /// Log size after compaction.
    pub bytes_after: u64,
    /// Frames before compaction.
    pub frames_before: u64,
    /// Frames after compaction (one per live record).
    pub frames_after: u64,
}

struct LedgerState<B> {
    backend: B,
    index: BTreeMap<EntityUuid, TrackerRecord>,
    frames: u64,
}

impl<B: LedgerBackend> LedgerState<B> {
    /// Appends `entry` durably, then applies it to the index.
    ///
    /// A frame that fails to append or sync is cut off again so the log
    /// never holds an entry the index has not seen.
    fn write(&mut self, entry: LedgerEntry) -> TrackerResult<()> {
        let frame = entry.encode()?;
        let len_before = self.backend.size()?;
        let written = self
            .backend
            .append(&frame)
            .and_then(|_| self.backend.sync());
        if let Err(e) = written {
            if let Err(rollback) = self.backend.truncate(len_before) {
                warn!(error = %rollback, len_before, "Could not roll back unsynced frame");
            }
            return Err(e);
        }
        apply(&mut self.index, entry);
        self.frames += 1;
        Ok(())
    }
}

fn apply(index: &mut BTreeMap<EntityUuid, TrackerRecord>, entry: LedgerEntry) {
    match entry {
        LedgerEntry::Upsert(record) => {
            index.insert(record.uuid, record);
        }
        LedgerEntry::Delete(uuid) => {
            index.remove(&uuid);
        }
        LedgerEntry::Purge => index.clear(),
    }
}

/// An [`ImportTracker`] backed by an append-only log of framed entries.
///
/// Every mutation appends one frame and syncs before the in-memory index
/// changes. Opening replays the log; a torn tail is cut off. [`compact`]
/// rewrites the log with one frame per live record.
///
/// [`compact`]: LedgerTracker::compact
pub struct LedgerTracker<B: LedgerBackend> {
    state: Mutex<LedgerState<B>>,
}

impl LedgerTracker<InMemoryBackend> {
    /// Creates an empty in-memory ledger.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            state: Mutex::new(LedgerState {
                backend: InMemoryBackend::new(),
                index: BTreeMap::new(),
                frames: 0,
            }),
        }
    }
}

impl LedgerTracker<FileBackend> {
    /// Opens or creates a ledger file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or replay finds
    /// corruption.
    pub fn open_file(path: &Path) -> TrackerResult<Self> {
        Self::open(FileBackend::open(path)?)
    }
}

impl<B: LedgerBackend> LedgerTracker<B> {
    /// Opens a ledger over `backend`, replaying its log.
    ///
    /// # Errors
    ///
    /// Returns an error if replay finds corruption before the tail or the
    /// torn tail cannot be truncated.
    pub fn open(mut backend: B) -> TrackerResult<Self> {
        let report = scan_ledger(&backend)?;
        if report.torn_bytes() > 0 {
            warn!(
                torn_bytes = report.torn_bytes(),
                valid_len = report.valid_len,
                "Dropping torn ledger tail"
            );
            backend.truncate(report.valid_len)?;
        }

        let frames = report.entries.len() as u64;
        let mut index = BTreeMap::new();
        for (_, entry) in report.entries {
            apply(&mut index, entry);
        }
        info!(records = index.len(), frames, "Import ledger opened");

        Ok(Self {
            state: Mutex::new(LedgerState {
                backend,
                index,
                frames,
            }),
        })
    }

    /// Returns counts describing the ledger.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend size cannot be read.
    pub fn stats(&self) -> TrackerResult<LedgerStats> {
        let state = self.state.lock();
        let mut stats = LedgerStats {
            records: state.index.len(),
            frames: state.frames,
            bytes: state.backend.size()?,
            ..LedgerStats::default()
        };
        for record in state.index.values() {
            match record.status {
                TrackStatus::Queued => stats.queued += 1,
                TrackStatus::Imported => stats.imported += 1,
                TrackStatus::AutoUpdateDisabled => stats.auto_update_disabled += 1,
            }
        }
        Ok(stats)
    }

    /// Rewrites the log so it holds one upsert frame per live record.
    ///
    /// The compacted log is swapped in with [`LedgerBackend::replace`], so a
    /// failure or crash part way leaves the previous log in place.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the backend swap fails.
    pub fn compact(&self) -> TrackerResult<CompactionReport> {
        let mut state = self.state.lock();
        let bytes_before = state.backend.size()?;
        let frames_before = state.frames;

        let mut compacted = Vec::new();
        for record in state.index.values() {
            compacted.extend(LedgerEntry::Upsert(record.clone()).encode()?);
        }
        state.backend.replace(&compacted)?;
        state.frames = state.index.len() as u64;

        let report = CompactionReport {
            bytes_before,
            bytes_after: state.backend.size()?,
            frames_before,
            frames_after: state.frames,
        };
        info!(
            bytes_before = report.bytes_before,
            bytes_after = report.bytes_after,
            "Ledger compacted"
        );
        Ok(report)
    }
}

impl<B: LedgerBackend> ImportTracker for LedgerTracker<B> {
    fn get(&self, uuid: &EntityUuid) -> TrackerResult<Option<TrackerRecord>> {
        Ok(self.state.lock().index.get(uuid).cloned())
    }

    fn track_imported(
        &self,
        uuid: &EntityUuid,
        hash: &ContentHash,
        local: &LocalId,
    ) -> TrackerResult<()> {
        let mut state = self.state.lock();
        let record = match state.index.get(uuid) {
            Some(existing) => {
                let status = match existing.status {
                    TrackStatus::AutoUpdateDisabled => TrackStatus::AutoUpdateDisabled,
                    _ => TrackStatus::Imported,
                };
                if existing.hash.as_ref() == Some(hash)
                    && existing.local.as_ref() == Some(local)
                    && existing.status == status
                    && existing.queue_id.is_none()
                {
                    return Ok(());
                }
                let mut record = existing.clone();
                record.hash = Some(hash.clone());
                record.local = Some(local.clone());
                record.status = status;
                record.queue_id = None;
                record.touch();
                record
            }
            None => TrackerRecord::imported(*uuid, hash.clone(), local.clone()),
        };
        debug!(%uuid, %hash, "Tracking import");
        state.write(LedgerEntry::Upsert(record))
    }

    fn mark_imported(&self, uuid: &EntityUuid) -> TrackerResult<bool> {
        let mut state = self.state.lock();
        let Some(existing) = state.index.get(uuid) else {
            return Ok(false);
        };
        if existing.status != TrackStatus::Queued {
            return Ok(true);
        }
        let mut record = existing.clone();
        record.status = TrackStatus::Imported;
        record.queue_id = None;
        record.touch();
        state.write(LedgerEntry::Upsert(record))?;
        Ok(true)
    }

    fn mark_queued(&self, uuid: &EntityUuid, correlation_id: &str) -> TrackerResult<()> {
        let mut state = self.state.lock();
        let record = match state.index.get(uuid) {
            Some(existing) => {
                let mut record = existing.clone();
                if record.status != TrackStatus::AutoUpdateDisabled {
                    record.status = TrackStatus::Queued;
                }
                record.queue_id = Some(correlation_id.to_string());
                record.touch();
                record
            }
            None => TrackerRecord::queued(*uuid, correlation_id),
        };
        state.write(LedgerEntry::Upsert(record))
    }

    fn set_auto_update(&self, uuid: &EntityUuid, enabled: bool) -> TrackerResult<bool> {
        let mut state = self.state.lock();
        let Some(existing) = state.index.get(uuid) else {
            return Ok(false);
        };
        let status = match (enabled, existing.status) {
            (false, _) => TrackStatus::AutoUpdateDisabled,
            (true, TrackStatus::AutoUpdateDisabled) => TrackStatus::Imported,
            (true, current) => current,
        };
        if status == existing.status {
            return Ok(true);
        }
        let mut record = existing.clone();
        record.status = status;
        record.touch();
        state.write(LedgerEntry::Upsert(record))?;
        Ok(true)
    }

    fn delete(&self, uuid: &EntityUuid) -> TrackerResult<bool> {
        let mut state = self.state.lock();
        if !state.index.contains_key(uuid) {
            return Ok(false);
        }
        state.write(LedgerEntry::Delete(*uuid))?;
        Ok(true)
    }

    fn purge(&self) -> TrackerResult<usize> {
        let mut state = self.state.lock();
        let dropped = state.index.len();
        state.write(LedgerEntry::Purge)?;
        info!(dropped, "Ledger purged");
        Ok(dropped)
    }

    fn records(&self) -> TrackerResult<Vec<TrackerRecord>> {
        Ok(self.state.lock().index.values().cloned().collect())
    }
}

impl<B: LedgerBackend> std::fmt::Debug for LedgerTracker<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("LedgerTracker")
            .field("records", &state.index.len())
            .field("frames", &state.frames)
            .finish()
    }
}
