//! Snapshot types for persisting and restoring an address book.
//!
//! Snapshots are the bridge between [`MemoryReplica`](crate::MemoryReplica)
//! and persistent storage. Records are kept in `BTreeMap`s so the serialized
//! form is deterministic.

use crate::{error::Result, AccountId, Error, LocalId, Record, RecordKind, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// A point-in-time snapshot of one account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaSnapshot {
    /// Snapshot format version
    pub format_version: u32,
    /// Account the snapshot belongs to
    pub account: AccountId,
    /// Last write stamp handed out by the replica
    pub clock: Timestamp,
    /// Next local id counter
    pub next_id: u64,
    /// Contacts by local id
    #[serde(default)]
    pub contacts: BTreeMap<LocalId, Record>,
    /// Groups by local id
    #[serde(default)]
    pub groups: BTreeMap<LocalId, Record>,
}

impl ReplicaSnapshot {
    /// Create a new empty snapshot.
    pub fn new(account: impl Into<AccountId>) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            account: account.into(),
            clock: 0,
            next_id: 1,
            contacts: BTreeMap::new(),
            groups: BTreeMap::new(),
        }
    }

    /// Add a record to the snapshot.
    pub fn add_record(&mut self, kind: RecordKind, record: Record) {
        let records = match kind {
            RecordKind::Contact => &mut self.contacts,
            RecordKind::Group => &mut self.groups,
        };
        records.insert(record.rn.clone(), record);
    }

    /// Count records across both kinds.
    pub fn record_count(&self) -> usize {
        self.contacts.len() + self.groups.len()
    }

    /// Serialize to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Serialize to pretty JSON.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                snapshot.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        // Map keys and record ids must agree or lookups by id break
        for records in [&snapshot.contacts, &snapshot.groups] {
            if let Some((key, record)) = records.iter().find(|(key, r)| **key != r.rn) {
                return Err(Error::InvalidSnapshot(format!(
                    "record keyed {} has id {}",
                    key, record.rn
                )));
            }
        }

        Ok(snapshot)
    }
}
