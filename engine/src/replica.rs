//! The replicas taking part in a pass and the cached view of their records.

use crate::{error::Result, Error, LocalId, Record, RecordKind, ReplicaStore, Tag};
use std::collections::{BTreeMap, BTreeSet};

/// One replica's records of one kind, as listed at the start of a phase.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplicaView {
    records: BTreeMap<LocalId, Record>,
}

impl ReplicaView {
    pub fn from_records(records: Vec<Record>) -> Self {
        Self {
            records: records.into_iter().map(|r| (r.rn.clone(), r)).collect(),
        }
    }

    pub fn get(&self, rn: &str) -> Option<&Record> {
        self.records.get(rn)
    }

    /// All records in local id order.
    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.records.values()
    }

    /// Records that no other replica knows about yet.
    pub fn untagged(&self) -> impl Iterator<Item = &Record> {
        self.records.values().filter(|r| r.tag.is_none())
    }

    /// Every non-null tag in this replica.
    pub fn tags(&self) -> BTreeSet<Tag> {
        self.records.values().filter_map(|r| r.tag.clone()).collect()
    }

    pub fn find_by_tag(&self, tag: &str) -> Option<&Record> {
        self.records
            .values()
            .find(|r| r.tag.as_deref() == Some(tag))
    }

    pub fn holds(&self, tag: &str) -> bool {
        self.find_by_tag(tag).is_some()
    }

    /// First record with the given display name.
    pub fn find_by_name(&self, name: &str) -> Option<&Record> {
        self.records.values().find(|r| r.name() == name)
    }

    /// Names shared by two or more records, sorted.
    pub fn duplicate_names(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut dups = BTreeSet::new();
        for record in self.records.values() {
            if !seen.insert(record.name()) {
                dups.insert(record.name().to_string());
            }
        }
        dups.into_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Records created or tagged during the current pass.
///
/// Their stamps are necessarily after the watermark, but they are not edits
/// and must not be fanned out again by the update phase.
#[derive(Debug, Clone, Default)]
pub struct AddedSet {
    entries: BTreeSet<(usize, LocalId)>,
}

impl AddedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, replica: usize, rn: impl Into<LocalId>) {
        self.entries.insert((replica, rn.into()));
    }

    pub fn contains(&self, replica: usize, rn: &str) -> bool {
        self.entries.contains(&(replica, rn.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Every replica of a run, in configured order, with their cached views.
#[derive(Debug)]
pub struct ReplicaSet<S> {
    stores: Vec<S>,
    contacts: Vec<ReplicaView>,
    groups: Vec<ReplicaView>,
}

impl<S: ReplicaStore> ReplicaSet<S> {
    /// List both kinds of record from every store.
    pub fn load(stores: Vec<S>) -> Result<Self> {
        let mut accounts = BTreeSet::new();
        for store in &stores {
            if !accounts.insert(store.account()) {
                return Err(Error::DuplicateAccount(store.account().to_string()));
            }
        }

        let mut set = Self {
            contacts: vec![ReplicaView::default(); stores.len()],
            groups: vec![ReplicaView::default(); stores.len()],
            stores,
        };
        for kind in RecordKind::PASS_ORDER {
            set.refresh(kind)?;
        }
        Ok(set)
    }

    /// Re-list one kind of record from every store.
    pub fn refresh(&mut self, kind: RecordKind) -> Result<()> {
        let views = self
            .stores
            .iter()
            .map(|s| s.list(kind).map(ReplicaView::from_records))
            .collect::<Result<Vec<_>>>()?;
        match kind {
            RecordKind::Contact => self.contacts = views,
            RecordKind::Group => self.groups = views,
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    pub fn account(&self, replica: usize) -> &str {
        self.stores[replica].account()
    }

    /// Index of the replica with the given account id.
    pub fn position(&self, account: &str) -> Option<usize> {
        self.stores.iter().position(|s| s.account() == account)
    }

    pub fn store(&self, replica: usize) -> &S {
        &self.stores[replica]
    }

    pub fn store_mut(&mut self, replica: usize) -> &mut S {
        &mut self.stores[replica]
    }

    pub fn stores(&self) -> &[S] {
        &self.stores
    }

    pub fn into_stores(self) -> Vec<S> {
        self.stores
    }

    pub fn views(&self, kind: RecordKind) -> &[ReplicaView] {
        match kind {
            RecordKind::Contact => &self.contacts,
            RecordKind::Group => &self.groups,
        }
    }

    pub fn view(&self, kind: RecordKind, replica: usize) -> &ReplicaView {
        &self.views(kind)[replica]
    }

    /// Each replica's non-null tags, in replica order.
    pub fn tag_sets(&self, kind: RecordKind) -> Vec<BTreeSet<Tag>> {
        self.views(kind).iter().map(ReplicaView::tags).collect()
    }
}
