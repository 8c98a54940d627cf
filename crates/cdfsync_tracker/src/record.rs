//! Ledger records and their on-disk framing.
//!
//! ## Frame Format
//!
//! ```text
//! | magic (4) | version (2) | type (1) | length (4) | payload (length) | crc32 (4) |
//! ```
//!
//! Integers are little-endian. The payload is CBOR. The CRC covers the
//! header and payload.

use crate::error::{TrackerError, TrackerResult};
use cdfsync_protocol::{ContentHash, EntityUuid, LocalId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Magic bytes opening every ledger frame.
pub const LEDGER_MAGIC: [u8; 4] = *b"CDFL";

/// Current frame format version.
pub const LEDGER_VERSION: u16 = 1;

/// magic (4) + version (2) + type (1) + length (4)
pub(crate) const HEADER_SIZE: usize = 11;

pub(crate) const CRC_SIZE: usize = 4;

/// Import status of a tracked entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackStatus {
    /// A queue item for the entity is outstanding.
    Queued,
    /// The entity is imported at the recorded hash.
    Imported,
    /// Local edits are protected; the entity is never re-imported.
    AutoUpdateDisabled,
}

impl TrackStatus {
    /// Returns the status name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackStatus::Queued => "queued",
            TrackStatus::Imported => "imported",
            TrackStatus::AutoUpdateDisabled => "auto_update_disabled",
        }
    }

    /// Parses a status name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "queued" => Some(TrackStatus::Queued),
            "imported" => Some(TrackStatus::Imported),
            "auto_update_disabled" => Some(TrackStatus::AutoUpdateDisabled),
            _ => None,
        }
    }
}

impl fmt::Display for TrackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ledger entry for one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerRecord {
    /// Remote entity uuid.
    pub uuid: EntityUuid,
    /// Content hash of the last import, if any.
    pub hash: Option<ContentHash>,
    /// Current status.
    pub status: TrackStatus,
    /// Correlation id of the outstanding queue item.
    pub queue_id: Option<String>,
    /// Local object the uuid was materialized as.
    pub local: Option<LocalId>,
    /// Last write time in Unix milliseconds.
    pub updated_ms: u64,
}

impl TrackerRecord {
    /// Creates a record for a freshly imported entity.
    #[must_use]
    pub fn imported(uuid: EntityUuid, hash: ContentHash, local: LocalId) -> Self {
        Self {
            uuid,
            hash: Some(hash),
            status: TrackStatus::Imported,
            queue_id: None,
            local: Some(local),
            updated_ms: now_ms(),
        }
    }

    /// Creates a record for an entity whose import has been queued.
    #[must_use]
    pub fn queued(uuid: EntityUuid, correlation_id: impl Into<String>) -> Self {
        Self {
            uuid,
            hash: None,
            status: TrackStatus::Queued,
            queue_id: Some(correlation_id.into()),
            local: None,
            updated_ms: now_ms(),
        }
    }

    /// Stamps the record with the current time.
    pub(crate) fn touch(&mut self) {
        self.updated_ms = now_ms();
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Frame type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EntryType {
    /// Insert or replace a record.
    Upsert = 1,
    /// Remove a record.
    Delete = 2,
    /// Remove every record.
    Purge = 3,
}

impl EntryType {
    /// Converts a byte to an entry type.
    #[must_use]
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Upsert),
            2 => Some(Self::Delete),
            3 => Some(Self::Purge),
            _ => None,
        }
    }
}

/// A single ledger mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEntry {
    /// Insert or replace the record for its uuid.
    Upsert(TrackerRecord),
    /// Remove the record for a uuid.
    Delete(EntityUuid),
    /// Remove every record.
    Purge,
}

impl LedgerEntry {
    /// Returns the frame type of the entry.
    #[must_use]
    pub fn entry_type(&self) -> EntryType {
        match self {
            LedgerEntry::Upsert(_) => EntryType::Upsert,
            LedgerEntry::Delete(_) => EntryType::Delete,
            LedgerEntry::Purge => EntryType::Purge,
        }
    }

    /// Encodes the entry as a complete frame.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::Encode`] if the payload cannot be serialized.
    pub fn encode(&self) -> TrackerResult<Vec<u8>> {
        let mut payload = Vec::new();
        match self {
            LedgerEntry::Upsert(record) => ciborium::into_writer(record, &mut payload)
                .map_err(|e| TrackerError::Encode(e.to_string()))?,
            LedgerEntry::Delete(uuid) => ciborium::into_writer(uuid, &mut payload)
                .map_err(|e| TrackerError::Encode(e.to_string()))?,
            LedgerEntry::Purge => {}
        }
        let len = u32::try_from(payload.len())
            .map_err(|_| TrackerError::Encode(format!("payload too large: {}", payload.len())))?;

        let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
        frame.extend_from_slice(&LEDGER_MAGIC);
        frame.extend_from_slice(&LEDGER_VERSION.to_le_bytes());
        frame.push(self.entry_type() as u8);
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&payload);
        let crc = crc32fast::hash(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        Ok(frame)
    }

    /// Decodes an entry payload.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::Decode`] if the payload is malformed.
    pub fn decode(entry_type: EntryType, payload: &[u8]) -> TrackerResult<Self> {
        match entry_type {
            EntryType::Upsert => ciborium::from_reader(payload)
                .map(LedgerEntry::Upsert)
                .map_err(|e| TrackerError::Decode(e.to_string())),
            EntryType::Delete => ciborium::from_reader(payload)
                .map(LedgerEntry::Delete)
                .map_err(|e| TrackerError::Decode(e.to_string())),
            EntryType::Purge => {
                if payload.is_empty() {
                    Ok(LedgerEntry::Purge)
                } else {
                    Err(TrackerError::Decode(format!(
                        "purge frame carries {} payload bytes",
                        payload.len()
                    )))
                }
            }
        }
    }
}

/// A parsed frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FrameHeader {
    pub entry_type: EntryType,
    pub payload_len: usize,
}

impl FrameHeader {
    /// Parses a header read at `offset`.
    pub(crate) fn parse(bytes: &[u8], offset: u64) -> TrackerResult<Self> {
        if bytes.len() != HEADER_SIZE {
            return Err(TrackerError::corrupted(offset, "short frame header"));
        }
        if bytes[0..4] != LEDGER_MAGIC {
            return Err(TrackerError::corrupted(offset, "bad magic"));
        }
        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != LEDGER_VERSION {
            return Err(TrackerError::corrupted(
                offset,
                format!("unsupported frame version {version}"),
            ));
        }
        let entry_type = EntryType::from_byte(bytes[6]).ok_or_else(|| {
            TrackerError::corrupted(offset, format!("unknown entry type {}", bytes[6]))
        })?;
        let payload_len = u32::from_le_bytes([bytes[7], bytes[8], bytes[9], bytes[10]]) as usize;
        Ok(Self {
            entry_type,
            payload_len,
        })
    }

    /// Returns the full frame length including header and CRC.
    pub(crate) fn frame_len(&self) -> usize {
        HEADER_SIZE + self.payload_len + CRC_SIZE
    }
}

/// Checks the CRC of a frame given its header bytes and the remainder
/// (payload followed by the CRC).
pub(crate) fn crc_matches(header: &[u8], rest: &[u8]) -> bool {
    if rest.len() < CRC_SIZE {
        return false;
    }
    let (payload, crc_bytes) = rest.split_at(rest.len() - CRC_SIZE);
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(header);
    hasher.update(payload);
    let stored = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
    hasher.finalize() == stored
}
