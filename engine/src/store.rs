//! Replica stores.
//!
//! [`ReplicaStore`] is the contract the reconciler drives; one instance per
//! account. [`MemoryReplica`] keeps an address book in memory and backs both
//! the tests and the file store of the command-line tool.

use crate::{
    error::Result, AccountId, Error, LocalId, Membership, Payload, Record, RecordKind, Tag,
    Timestamp,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Operations the reconciler needs from one account.
///
/// All calls are synchronous. Any error aborts the pass.
pub trait ReplicaStore {
    /// Identifier of the account, unique among the replicas of a run.
    fn account(&self) -> &str;

    /// Every record of a kind, tagged or not.
    fn list(&self, kind: RecordKind) -> Result<Vec<Record>>;

    /// Current payload of a record.
    fn get(&self, kind: RecordKind, rn: &str) -> Result<Payload>;

    /// Create a record carrying `tag`, returning its new local id.
    fn create(&mut self, kind: RecordKind, tag: &str, payload: &Payload) -> Result<LocalId>;

    /// Replace the payload of the record currently bearing `tag`.
    fn update(&mut self, kind: RecordKind, tag: &str, payload: &Payload) -> Result<()>;

    /// Attach `tag` to a local record.
    fn update_tag(&mut self, kind: RecordKind, rn: &str, tag: &str) -> Result<()>;

    /// Remove the record bearing `tag`. Returns `false` if there was none.
    fn delete_by_tag(&mut self, kind: RecordKind, tag: &str) -> Result<bool>;

    /// Tag of a local group, if it has one.
    fn local_id_to_tag(&self, group_rn: &str) -> Result<Option<Tag>>;

    /// Local id of the group bearing `tag`, if any.
    fn tag_to_local_id(&self, tag: &str) -> Result<Option<LocalId>>;
}

/// Records of one kind, ordered by local id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Collection {
    records: BTreeMap<LocalId, Record>,
}

impl Collection {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a record by local id.
    pub fn get(&self, rn: &str) -> Option<&Record> {
        self.records.get(rn)
    }

    /// Get a mutable record by local id.
    pub fn get_mut(&mut self, rn: &str) -> Option<&mut Record> {
        self.records.get_mut(rn)
    }

    /// Insert or replace a record.
    pub fn insert(&mut self, record: Record) {
        self.records.insert(record.rn.clone(), record);
    }

    pub fn remove(&mut self, rn: &str) -> Option<Record> {
        self.records.remove(rn)
    }

    /// Find the record bearing a tag.
    pub fn find_by_tag(&self, tag: &str) -> Option<&Record> {
        self.records
            .values()
            .find(|r| r.tag.as_deref() == Some(tag))
    }

    fn find_by_tag_mut(&mut self, tag: &str) -> Option<&mut Record> {
        self.records
            .values_mut()
            .find(|r| r.tag.as_deref() == Some(tag))
    }

    /// All records in local id order.
    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// An in-memory address book.
///
/// Every write stamps the touched record with a timestamp strictly greater
/// than any previous stamp of this replica. With the wall clock enabled the
/// stamp also never lags the system time.
#[derive(Debug, Clone)]
pub struct MemoryReplica {
    account: AccountId,
    /// Last stamp handed out
    clock: Timestamp,
    wall_clock: bool,
    next_id: u64,
    contacts: Collection,
    groups: Collection,
}

impl MemoryReplica {
    /// Create an empty replica with a purely logical clock starting at 0.
    pub fn new(account: impl Into<AccountId>) -> Self {
        Self {
            account: account.into(),
            clock: 0,
            wall_clock: false,
            next_id: 1,
            contacts: Collection::new(),
            groups: Collection::new(),
        }
    }

    /// Create an empty replica stamping writes with the system time.
    pub fn with_wall_clock(account: impl Into<AccountId>) -> Self {
        Self {
            wall_clock: true,
            ..Self::new(account)
        }
    }

    /// Move the clock forward. The next write is stamped after `timestamp`.
    pub fn set_clock(&mut self, timestamp: Timestamp) {
        self.clock = self.clock.max(timestamp);
    }

    /// The last stamp handed out.
    pub fn clock(&self) -> Timestamp {
        self.clock
    }

    pub fn collection(&self, kind: RecordKind) -> &Collection {
        match kind {
            RecordKind::Contact => &self.contacts,
            RecordKind::Group => &self.groups,
        }
    }

    fn collection_mut(&mut self, kind: RecordKind) -> &mut Collection {
        match kind {
            RecordKind::Contact => &mut self.contacts,
            RecordKind::Group => &mut self.groups,
        }
    }

    /// Get a record by local id.
    pub fn record(&self, kind: RecordKind, rn: &str) -> Option<&Record> {
        self.collection(kind).get(rn)
    }

    /// Get the record bearing a tag.
    pub fn record_by_tag(&self, kind: RecordKind, tag: &str) -> Option<&Record> {
        self.collection(kind).find_by_tag(tag)
    }

    /// Add an untagged record, as a user editing this account directly would.
    pub fn insert(&mut self, kind: RecordKind, payload: Payload) -> LocalId {
        let rn = self.next_rn(kind);
        let stamp = self.stamp();
        self.collection_mut(kind)
            .insert(Record::new(rn.clone(), payload, stamp));
        rn
    }

    /// Replace a record's payload, as a user editing this account would.
    pub fn edit(&mut self, kind: RecordKind, rn: &str, payload: Payload) -> Result<()> {
        let stamp = self.stamp();
        let Some(record) = self.collection_mut(kind).get_mut(rn) else {
            return Err(self.not_found(kind, rn));
        };
        record.payload = payload;
        record.updated_at = stamp;
        Ok(())
    }

    /// Delete a record by local id, as a user would.
    pub fn remove(&mut self, kind: RecordKind, rn: &str) -> Result<()> {
        if self.collection_mut(kind).remove(rn).is_none() {
            return Err(self.not_found(kind, rn));
        }
        if kind == RecordKind::Group {
            self.drop_group_memberships(rn);
        }
        Ok(())
    }

    /// Export the replica as a serializable snapshot.
    pub fn export_state(&self) -> crate::snapshot::ReplicaSnapshot {
        let mut snapshot = crate::snapshot::ReplicaSnapshot::new(self.account.clone());
        snapshot.clock = self.clock;
        snapshot.next_id = self.next_id;
        for kind in RecordKind::PASS_ORDER {
            for record in self.collection(kind).records() {
                snapshot.add_record(kind, record.clone());
            }
        }
        snapshot
    }

    /// Replace this replica's contents with a snapshot of the same account.
    pub fn import_state(&mut self, snapshot: crate::snapshot::ReplicaSnapshot) -> Result<()> {
        if snapshot.account != self.account {
            return Err(Error::InvalidSnapshot(format!(
                "account mismatch: expected {}, got {}",
                self.account, snapshot.account
            )));
        }

        self.clock = snapshot.clock;
        self.next_id = snapshot.next_id;
        self.contacts = Collection {
            records: snapshot.contacts,
        };
        self.groups = Collection {
            records: snapshot.groups,
        };
        Ok(())
    }

    fn stamp(&mut self) -> Timestamp {
        let wall = if self.wall_clock { now_millis() } else { 0 };
        self.clock = wall.max(self.clock + 1);
        self.clock
    }

    fn next_rn(&mut self, kind: RecordKind) -> LocalId {
        let id = self.next_id;
        self.next_id += 1;
        match kind {
            RecordKind::Contact => format!("people/c{id}"),
            RecordKind::Group => format!("contactGroups/{id}"),
        }
    }

    fn drop_group_memberships(&mut self, group_rn: &str) {
        for contact in self.contacts.records.values_mut() {
            contact
                .payload
                .memberships
                .retain(|m| !matches!(m, Membership::Group { id } if id == group_rn));
        }
    }

    fn not_found(&self, kind: RecordKind, rn: &str) -> Error {
        Error::RecordNotFound {
            account: self.account.clone(),
            kind,
            id: rn.to_string(),
        }
    }

    fn tag_not_found(&self, kind: RecordKind, tag: &str) -> Error {
        Error::TagNotFound {
            account: self.account.clone(),
            kind,
            tag: tag.to_string(),
        }
    }
}

impl ReplicaStore for MemoryReplica {
    fn account(&self) -> &str {
        &self.account
    }

    fn list(&self, kind: RecordKind) -> Result<Vec<Record>> {
        Ok(self.collection(kind).records().cloned().collect())
    }

    fn get(&self, kind: RecordKind, rn: &str) -> Result<Payload> {
        self.record(kind, rn)
            .map(|r| r.payload.clone())
            .ok_or_else(|| self.not_found(kind, rn))
    }

    fn create(&mut self, kind: RecordKind, tag: &str, payload: &Payload) -> Result<LocalId> {
        let rn = self.next_rn(kind);
        let stamp = self.stamp();
        let record = Record::new(rn.clone(), payload.clone(), stamp).tagged(tag);
        self.collection_mut(kind).insert(record);
        Ok(rn)
    }

    fn update(&mut self, kind: RecordKind, tag: &str, payload: &Payload) -> Result<()> {
        let stamp = self.stamp();
        let Some(record) = self.collection_mut(kind).find_by_tag_mut(tag) else {
            return Err(self.tag_not_found(kind, tag));
        };
        record.payload = payload.clone();
        record.updated_at = stamp;
        Ok(())
    }

    fn update_tag(&mut self, kind: RecordKind, rn: &str, tag: &str) -> Result<()> {
        let stamp = self.stamp();
        let Some(record) = self.collection_mut(kind).get_mut(rn) else {
            return Err(self.not_found(kind, rn));
        };
        record.tag = Some(tag.to_string());
        record.updated_at = stamp;
        Ok(())
    }

    fn delete_by_tag(&mut self, kind: RecordKind, tag: &str) -> Result<bool> {
        let Some(rn) = self.collection(kind).find_by_tag(tag).map(|r| r.rn.clone()) else {
            return Ok(false);
        };
        self.remove(kind, &rn)?;
        Ok(true)
    }

    fn local_id_to_tag(&self, group_rn: &str) -> Result<Option<Tag>> {
        Ok(self.groups.get(group_rn).and_then(|g| g.tag.clone()))
    }

    fn tag_to_local_id(&self, tag: &str) -> Result<Option<LocalId>> {
        Ok(self.groups.find_by_tag(tag).map(|g| g.rn.clone()))
    }
}

fn now_millis() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as Timestamp)
        .unwrap_or(0)
}
