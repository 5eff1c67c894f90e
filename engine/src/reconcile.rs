//! One reconciliation pass over every replica.
//!
//! # Algorithm
//!
//! Groups are reconciled before contacts, since contacts reference groups.
//! For each kind:
//!
//! 1. Resume fan-outs a failed pass left pending
//! 2. Delete everywhere the tags missing from some replica
//! 3. Tag new records and copy them to every other replica
//! 4. Push the freshest copy of every tag modified since the watermark
//!
//! The first time replicas are linked no tags exist anywhere, so a separate
//! bootstrap pass matches records by name instead.

use crate::{
    addition::{bootstrap_by_name, propagate_additions, resume_fanouts},
    deletion::propagate_deletions,
    error::Result,
    update::propagate_updates,
    AddedSet, Error, FanoutLog, RecordKind, ReplicaSet, ReplicaStore, TagAllocator, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info};

/// Margin added to the end-of-pass time when advancing the watermark, to
/// absorb skew between the local clock and the stores' modification stamps.
pub const WATERMARK_SAFETY_MARGIN: Timestamp = 1000;

/// Watermark to persist after a pass that finished at `now`.
pub fn next_watermark(now: Timestamp) -> Timestamp {
    now.saturating_add(WATERMARK_SAFETY_MARGIN)
}

/// Per-run settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOptions {
    /// End of the last successful pass
    pub watermark: Timestamp,
    /// Pause after each record pushed during bootstrap
    pub throttle: Option<Duration>,
}

impl SyncOptions {
    pub fn new(watermark: Timestamp) -> Self {
        Self {
            watermark,
            throttle: None,
        }
    }

    /// Sets the bootstrap throttle.
    pub fn with_throttle(mut self, throttle: Duration) -> Self {
        self.throttle = Some(throttle);
        self
    }
}

/// What a pass did to one kind of record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KindReport {
    /// Copies created while resuming interrupted fan-outs
    pub resumed: usize,
    /// Records removed by deletion propagation
    pub deleted: usize,
    /// New records tagged and copied
    pub added: usize,
    /// Records overwritten with a fresher copy
    pub updated: usize,
    /// Records pushed by a name-based bootstrap
    pub bootstrapped: usize,
    /// Records a bootstrap skipped as already matched by name
    pub done_before: usize,
}

/// Result of a pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassReport {
    pub groups: KindReport,
    pub contacts: KindReport,
}

impl PassReport {
    pub fn kind(&self, kind: RecordKind) -> &KindReport {
        match kind {
            RecordKind::Contact => &self.contacts,
            RecordKind::Group => &self.groups,
        }
    }

    fn kind_mut(&mut self, kind: RecordKind) -> &mut KindReport {
        match kind {
            RecordKind::Contact => &mut self.contacts,
            RecordKind::Group => &mut self.groups,
        }
    }

    /// True if the pass wrote nothing.
    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }
}

/// Runs passes over a [`ReplicaSet`].
#[derive(Debug, Clone)]
pub struct Reconciler {
    allocator: TagAllocator,
    options: SyncOptions,
}

impl Reconciler {
    /// Reconciler with an entropy-seeded tag allocator.
    pub fn new(options: SyncOptions) -> Self {
        Self::with_allocator(TagAllocator::new(), options)
    }

    pub fn with_allocator(allocator: TagAllocator, options: SyncOptions) -> Self {
        Self { allocator, options }
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    /// Tag-based pass: resume, delete, add, update; groups then contacts.
    ///
    /// Fails before writing anything if a replica was never bootstrapped.
    pub fn run<S: ReplicaStore>(
        &mut self,
        set: &mut ReplicaSet<S>,
        log: &mut dyn FanoutLog,
    ) -> Result<PassReport> {
        check_bootstrapped(set)?;

        let mut report = PassReport::default();
        for kind in RecordKind::PASS_ORDER {
            info!("{kind}s synchronization");
            self.observe_tags(set, kind);

            let mut added = AddedSet::new();
            let r = report.kind_mut(kind);
            r.resumed = resume_fanouts(set, kind, log, &mut added)?;
            r.deleted = propagate_deletions(set, kind)?;
            r.added = propagate_additions(set, kind, &mut self.allocator, log, &mut added)?;
            r.updated = propagate_updates(set, kind, self.options.watermark, &added)?;
        }
        Ok(report)
    }

    /// Name-based pass linking replicas that have never been synced.
    ///
    /// Fails before writing anything if a replica holds two records of the
    /// same kind with the same name. Fan-outs left pending in `log` are
    /// superseded, since every record is matched again by name; the ones
    /// this pass starts stay pending until every replica is reached.
    pub fn bootstrap<S: ReplicaStore>(
        &mut self,
        set: &mut ReplicaSet<S>,
        log: &mut dyn FanoutLog,
    ) -> Result<PassReport> {
        info!("setting up syncing using names to identify identical records");
        for kind in RecordKind::PASS_ORDER {
            check_duplicates(set, kind)?;
        }

        let mut report = PassReport::default();
        for kind in RecordKind::PASS_ORDER {
            self.observe_tags(set, kind);
            for fanout in log.pending(kind) {
                debug!(tag = %fanout.tag, "dropping pending {kind} fan-out, matching by name");
                log.complete(kind, &fanout.tag)?;
            }

            let counts =
                bootstrap_by_name(set, kind, &mut self.allocator, log, self.options.throttle)?;
            let r = report.kind_mut(kind);
            r.bootstrapped = counts.synced;
            r.done_before = counts.done_before;
            set.refresh(kind)?;
        }
        Ok(report)
    }

    fn observe_tags<S: ReplicaStore>(&mut self, set: &ReplicaSet<S>, kind: RecordKind) {
        let tag_sets = set.tag_sets(kind);
        self.allocator.observe(tag_sets.iter().flatten());
    }
}

/// Refuse to match by name when a name is ambiguous within a replica.
pub fn check_duplicates<S: ReplicaStore>(set: &ReplicaSet<S>, kind: RecordKind) -> Result<()> {
    for replica in 0..set.len() {
        let names = set.view(kind, replica).duplicate_names();
        if !names.is_empty() {
            let account = set.account(replica).to_string();
            error!(
                %account,
                "these {kind}s ({}) are duplicated, please remove the duplicates and try again",
                names.join(",")
            );
            return Err(Error::DuplicateNames {
                account,
                kind,
                names,
            });
        }
    }
    Ok(())
}

/// A replica without a single tagged contact has never been linked.
///
/// Its empty tag set would read as every synced contact deleted. Only a
/// first run where no replica holds any tag yet may proceed, and only if
/// every replica is empty.
pub fn check_bootstrapped<S: ReplicaStore>(set: &ReplicaSet<S>) -> Result<()> {
    let views = set.views(RecordKind::Contact);
    let any_tagged = views.iter().any(|v| v.records().any(|r| r.tag.is_some()));
    for (replica, view) in views.iter().enumerate() {
        let untagged = view.records().all(|r| r.tag.is_none());
        if untagged && (any_tagged || !view.is_empty()) {
            let account = set.account(replica).to_string();
            error!(
                %account,
                "no sync tags, this looks like the first run for this account; pass --init"
            );
            return Err(Error::NotBootstrapped(account));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FanoutJournal, Membership, MemoryReplica, Payload, Record};
    use serde_json::json;

    fn payload(name: &str) -> Payload {
        Payload::new(name, json!({"name": name}))
    }

    fn reconciler(watermark: Timestamp) -> Reconciler {
        Reconciler::with_allocator(TagAllocator::seeded(11), SyncOptions::new(watermark))
    }

    /// Two replicas sharing one tagged contact so both count as bootstrapped.
    fn linked_pair() -> (MemoryReplica, MemoryReplica) {
        let mut a = MemoryReplica::new("a@example.com");
        let mut b = MemoryReplica::new("b@example.com");
        a.create(RecordKind::Contact, "anchor", &payload("Anchor")).unwrap();
        b.create(RecordKind::Contact, "anchor", &payload("Anchor")).unwrap();
        (a, b)
    }

    #[test]
    fn addition_scenario() {
        let (mut a, b) = linked_pair();
        a.set_clock(100);
        let rn = a.insert(RecordKind::Contact, payload("Alice"));
        let mut set = ReplicaSet::load(vec![a, b]).unwrap();

        let report = reconciler(50).run(&mut set, &mut FanoutJournal::new()).unwrap();

        assert_eq!(report.contacts.added, 1);
        // Alice's own tagging is not re-pushed as an edit
        assert_eq!(report.contacts.updated, 0);
        let tag = set.store(0).record(RecordKind::Contact, &rn).unwrap().tag.clone().unwrap();
        let copy = set.store(1).record_by_tag(RecordKind::Contact, &tag).unwrap();
        assert_eq!(copy.name(), "Alice");
    }

    #[test]
    fn update_scenario() {
        let (mut a, mut b) = linked_pair();
        b.set_clock(1000);
        b.update(RecordKind::Contact, "anchor", &payload("Anchor v1")).unwrap();
        a.set_clock(2000);
        a.update(RecordKind::Contact, "anchor", &payload("Anchor v2")).unwrap();
        let mut set = ReplicaSet::load(vec![a, b]).unwrap();

        let report = reconciler(500).run(&mut set, &mut FanoutJournal::new()).unwrap();

        assert_eq!(report.contacts.updated, 1);
        let b = set.store(1).record_by_tag(RecordKind::Contact, "anchor").unwrap();
        assert_eq!(b.payload, payload("Anchor v2"));
    }

    #[test]
    fn deletion_scenario() {
        let (mut a, b) = linked_pair();
        a.create(RecordKind::Contact, "tag1", &payload("Alice")).unwrap();
        let mut set = ReplicaSet::load(vec![a, b]).unwrap();

        let report = reconciler(0).run(&mut set, &mut FanoutJournal::new()).unwrap();

        assert_eq!(report.contacts.deleted, 1);
        assert!(set.store(0).record_by_tag(RecordKind::Contact, "tag1").is_none());
    }

    #[test]
    fn unmatched_group_membership_scenario() {
        let (mut a, b) = linked_pair();
        // b never had grp1, so the group phase deletes it from a
        let starred = a.create(RecordKind::Group, "grp1", &payload("Starred")).unwrap();
        a.set_clock(100);
        a.insert(
            RecordKind::Contact,
            payload("Alice").with_memberships(vec![Membership::Default, Membership::group(starred)]),
        );
        let mut set = ReplicaSet::load(vec![a, b]).unwrap();

        reconciler(50).run(&mut set, &mut FanoutJournal::new()).unwrap();

        let alice = set
            .store(1)
            .collection(RecordKind::Contact)
            .records()
            .find(|r| r.name() == "Alice")
            .unwrap();
        assert_eq!(alice.payload.memberships, vec![Membership::Default]);
    }

    #[test]
    fn groups_are_synced_before_contacts() {
        let (mut a, b) = linked_pair();
        a.set_clock(100);
        let work = a.insert(RecordKind::Group, payload("Work"));
        a.insert(
            RecordKind::Contact,
            payload("Alice").with_memberships(vec![Membership::group(&work)]),
        );
        let mut set = ReplicaSet::load(vec![a, b]).unwrap();

        let report = reconciler(50).run(&mut set, &mut FanoutJournal::new()).unwrap();
        assert_eq!(report.groups.added, 1);
        assert_eq!(report.contacts.added, 1);

        let group_tag = set.store(0).record(RecordKind::Group, &work).unwrap().tag.clone().unwrap();
        let work_b = set.store(1).tag_to_local_id(&group_tag).unwrap().unwrap();
        let alice = set
            .store(1)
            .collection(RecordKind::Contact)
            .records()
            .find(|r| r.name() == "Alice")
            .unwrap();
        assert_eq!(alice.payload.memberships, vec![Membership::group(work_b)]);
    }

    #[test]
    fn second_pass_is_noop() {
        let (mut a, b) = linked_pair();
        a.set_clock(100);
        a.insert(RecordKind::Contact, payload("Alice"));
        a.insert(RecordKind::Group, payload("Work"));
        let mut set = ReplicaSet::load(vec![a, b]).unwrap();

        reconciler(50).run(&mut set, &mut FanoutJournal::new()).unwrap();
        let watermark = set.stores().iter().map(MemoryReplica::clock).max().unwrap();

        let mut set = ReplicaSet::load(set.into_stores()).unwrap();
        let report = reconciler(watermark).run(&mut set, &mut FanoutJournal::new()).unwrap();
        assert!(report.is_noop(), "{report:?}");
    }

    #[test]
    fn unbootstrapped_replica_is_fatal() {
        let (a, _) = linked_pair();
        let mut fresh = MemoryReplica::new("c@example.com");
        fresh.insert(RecordKind::Contact, payload("Zed"));
        let mut set = ReplicaSet::load(vec![a, fresh]).unwrap();

        let err = reconciler(0).run(&mut set, &mut FanoutJournal::new()).unwrap_err();
        assert_eq!(err, Error::NotBootstrapped("c@example.com".into()));
        // Nothing written
        assert_eq!(set.store(1).collection(RecordKind::Contact).len(), 1);
    }

    #[test]
    fn empty_newcomer_is_fatal() {
        let (a, b) = linked_pair();
        let mut set =
            ReplicaSet::load(vec![a, b, MemoryReplica::new("c@example.com")]).unwrap();

        let err = reconciler(0).run(&mut set, &mut FanoutJournal::new()).unwrap_err();
        assert_eq!(err, Error::NotBootstrapped("c@example.com".into()));
        for replica in 0..2 {
            assert!(set.store(replica).record_by_tag(RecordKind::Contact, "anchor").is_some());
        }
    }

    #[test]
    fn all_empty_first_run_proceeds() {
        let mut a = MemoryReplica::new("a@example.com");
        a.set_clock(100);
        a.insert(RecordKind::Group, payload("Work"));
        let mut set = ReplicaSet::load(vec![a, MemoryReplica::new("b@example.com")]).unwrap();

        let report = reconciler(50).run(&mut set, &mut FanoutJournal::new()).unwrap();
        assert_eq!(report.groups.added, 1);
        assert_eq!(set.store(1).collection(RecordKind::Group).len(), 1);
    }

    #[test]
    fn bootstrap_refuses_duplicates() {
        let mut a = MemoryReplica::new("a@example.com");
        a.insert(RecordKind::Contact, payload("Alice"));
        a.insert(RecordKind::Contact, payload("Alice"));
        let mut set = ReplicaSet::load(vec![a, MemoryReplica::new("b@example.com")]).unwrap();

        let err = reconciler(0).bootstrap(&mut set, &mut FanoutJournal::new()).unwrap_err();
        assert_eq!(
            err,
            Error::DuplicateNames {
                account: "a@example.com".into(),
                kind: RecordKind::Contact,
                names: vec!["Alice".into()],
            }
        );
        assert!(set.store(1).collection(RecordKind::Contact).is_empty());
    }

    #[test]
    fn bootstrap_then_run() {
        let mut a = MemoryReplica::new("a@example.com");
        let mut b = MemoryReplica::new("b@example.com");
        let work_a = a.insert(RecordKind::Group, payload("Work"));
        a.insert(
            RecordKind::Contact,
            payload("Alice").with_memberships(vec![Membership::Default, Membership::group(work_a)]),
        );
        b.insert(RecordKind::Group, payload("Work"));
        b.insert(RecordKind::Contact, payload("Bob"));
        let mut set = ReplicaSet::load(vec![a, b]).unwrap();

        let report = reconciler(0).bootstrap(&mut set, &mut FanoutJournal::new()).unwrap();
        assert_eq!(report.groups.bootstrapped, 1);
        assert_eq!(report.groups.done_before, 1);
        assert_eq!(report.contacts.bootstrapped, 2);

        for store in set.stores() {
            assert_eq!(store.collection(RecordKind::Group).len(), 1);
            assert_eq!(store.collection(RecordKind::Contact).len(), 2);
            assert!(store.collection(RecordKind::Contact).records().all(Record::is_tagged));
        }
        let work_b = &set.view(RecordKind::Group, 1).records().next().unwrap().rn;
        let alice_b = set.view(RecordKind::Contact, 1).find_by_name("Alice").unwrap();
        assert_eq!(
            alice_b.payload.memberships,
            vec![Membership::Default, Membership::group(work_b)]
        );

        let watermark = set.stores().iter().map(MemoryReplica::clock).max().unwrap();
        let mut set = ReplicaSet::load(set.into_stores()).unwrap();
        let report = reconciler(watermark).run(&mut set, &mut FanoutJournal::new()).unwrap();
        assert!(report.is_noop(), "{report:?}");
    }

    #[test]
    fn next_watermark_adds_margin() {
        assert_eq!(next_watermark(5000), 6000);
        assert_eq!(next_watermark(u64::MAX), u64::MAX);
    }

    #[test]
    fn report_lookup_by_kind() {
        let mut report = PassReport::default();
        report.kind_mut(RecordKind::Group).added = 2;
        assert_eq!(report.kind(RecordKind::Group).added, 2);
        assert_eq!(report.kind(RecordKind::Contact).added, 0);
        assert!(!report.is_noop());
    }
}
