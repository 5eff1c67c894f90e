//! Deletion phase.
//!
//! A tag that some replica holds and another does not was deleted on the
//! latter; it is deleted everywhere. Additions never leave a tag on only
//! some replicas at the end of a pass, so a missing tag means a deletion.

use crate::{error::Result, RecordKind, ReplicaSet, ReplicaStore, Tag};
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Tags to delete given each replica's tag set: the union of all sets minus
/// their intersection.
pub fn plan_deletions(tag_sets: &[BTreeSet<Tag>]) -> BTreeSet<Tag> {
    let global: BTreeSet<&Tag> = tag_sets.iter().flatten().collect();
    global
        .into_iter()
        .filter(|tag| tag_sets.iter().any(|set| !set.contains(*tag)))
        .cloned()
        .collect()
}

/// Delete, on every replica, each tag that went missing from at least one.
///
/// Returns the number of records removed. When anything was removed the
/// views of `kind` are re-listed.
pub fn propagate_deletions<S: ReplicaStore>(
    set: &mut ReplicaSet<S>,
    kind: RecordKind,
) -> Result<usize> {
    let tag_sets = set.tag_sets(kind);
    let global: BTreeSet<&Tag> = tag_sets.iter().flatten().collect();
    for (replica, tags) in tag_sets.iter().enumerate() {
        let missing = global.iter().filter(|t| !tags.contains(**t)).count();
        if missing > 0 {
            info!(account = set.account(replica), "{missing} {kind}(s) deleted");
        }
    }

    let to_delete = plan_deletions(&tag_sets);
    if to_delete.is_empty() {
        return Ok(0);
    }

    let mut removed = 0;
    for replica in 0..set.len() {
        info!(
            account = set.account(replica),
            "removing {} {kind}(s)",
            to_delete.len()
        );
        let store = set.store_mut(replica);
        for tag in &to_delete {
            if store.delete_by_tag(kind, tag)? {
                debug!(account = store.account(), %tag, "deleted {kind}");
                removed += 1;
            }
        }
    }

    set.refresh(kind)?;
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryReplica, Payload};
    use proptest::prelude::*;
    use serde_json::json;

    fn tags(items: &[&str]) -> BTreeSet<Tag> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn tagged(replica: &mut MemoryReplica, kind: RecordKind, name: &str, tag: &str) {
        replica
            .create(kind, tag, &Payload::new(name, json!({})))
            .unwrap();
    }

    #[test]
    fn plan_nothing_when_consistent() {
        let sets = vec![tags(&["a", "b"]), tags(&["a", "b"])];
        assert!(plan_deletions(&sets).is_empty());
    }

    #[test]
    fn plan_missing_anywhere() {
        let sets = vec![tags(&["a", "b", "c"]), tags(&["a", "c"]), tags(&["a", "b"])];
        assert_eq!(plan_deletions(&sets), tags(&["b", "c"]));
    }

    #[test]
    fn plan_single_holder() {
        let sets = vec![tags(&["a"]), tags(&[])];
        assert_eq!(plan_deletions(&sets), tags(&["a"]));
    }

    #[test]
    fn deletes_from_every_holder() {
        let mut a = MemoryReplica::new("a");
        let mut b = MemoryReplica::new("b");
        tagged(&mut a, RecordKind::Contact, "Alice", "t1");
        tagged(&mut a, RecordKind::Contact, "Bob", "t2");
        tagged(&mut b, RecordKind::Contact, "Bob", "t2");

        let mut set = ReplicaSet::load(vec![a, b]).unwrap();
        let removed = propagate_deletions(&mut set, RecordKind::Contact).unwrap();

        assert_eq!(removed, 1);
        assert_eq!(set.tag_sets(RecordKind::Contact), vec![tags(&["t2"]), tags(&["t2"])]);
        assert!(set.store(0).record_by_tag(RecordKind::Contact, "t1").is_none());
    }

    #[test]
    fn kinds_are_independent() {
        let mut a = MemoryReplica::new("a");
        let mut b = MemoryReplica::new("b");
        tagged(&mut a, RecordKind::Group, "Work", "g1");
        tagged(&mut b, RecordKind::Contact, "Alice", "g1");

        let mut set = ReplicaSet::load(vec![a, b]).unwrap();
        assert_eq!(propagate_deletions(&mut set, RecordKind::Group).unwrap(), 1);
        assert!(set.store(1).record_by_tag(RecordKind::Contact, "g1").is_some());
    }

    #[test]
    fn nothing_to_delete() {
        let mut a = MemoryReplica::new("a");
        let mut b = MemoryReplica::new("b");
        tagged(&mut a, RecordKind::Contact, "Alice", "t1");
        tagged(&mut b, RecordKind::Contact, "Alice", "t1");
        a.insert(RecordKind::Contact, Payload::new("New", json!({})));

        let mut set = ReplicaSet::load(vec![a, b]).unwrap();
        assert_eq!(propagate_deletions(&mut set, RecordKind::Contact).unwrap(), 0);
        assert_eq!(set.view(RecordKind::Contact, 0).len(), 2);
    }

    proptest! {
        #[test]
        fn prop_deletion_converges(
            holdings in prop::collection::vec(prop::collection::btree_set(0u8..12, 0..6), 1..5)
        ) {
            let stores: Vec<_> = holdings
                .iter()
                .enumerate()
                .map(|(i, held)| {
                    let mut replica = MemoryReplica::new(format!("acct-{i}"));
                    for t in held {
                        tagged(&mut replica, RecordKind::Contact, "x", &format!("tag{t}"));
                    }
                    replica
                })
                .collect();

            let mut set = ReplicaSet::load(stores).unwrap();
            propagate_deletions(&mut set, RecordKind::Contact).unwrap();

            // Only tags every replica held survive, and every replica agrees
            let common: BTreeSet<Tag> = holdings
                .iter()
                .skip(1)
                .fold(holdings[0].clone(), |acc, s| acc.intersection(s).copied().collect())
                .into_iter()
                .map(|t| format!("tag{t}"))
                .collect();
            for tags in set.tag_sets(RecordKind::Contact) {
                prop_assert_eq!(&tags, &common);
            }
        }
    }
}
