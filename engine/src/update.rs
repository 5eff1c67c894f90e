//! Update phase.
//!
//! Records modified since the watermark are grouped by tag. The freshest
//! copy of each tag wins and overwrites every other replica holding it.
//! Concurrent edits are not merged.

use crate::{
    error::Result, AddedSet, LocalId, RecordKind, ReplicaSet, ReplicaStore, Tag, TaggedPayload,
    Timestamp,
};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// A modified record competing to be the source of truth for its tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub replica: usize,
    pub account: String,
    pub rn: LocalId,
    pub updated_at: Timestamp,
}

impl Ord for Candidate {
    /// Later stamp wins; on equal stamps the greater account id wins.
    fn cmp(&self, other: &Self) -> Ordering {
        self.updated_at
            .cmp(&other.updated_at)
            .then_with(|| self.account.cmp(&other.account))
            .then_with(|| self.rn.cmp(&other.rn))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Group records modified after `watermark` by tag, skipping the ones
/// created during this pass.
pub fn collect_candidates<S: ReplicaStore>(
    set: &ReplicaSet<S>,
    kind: RecordKind,
    watermark: Timestamp,
    added: &AddedSet,
) -> BTreeMap<Tag, Vec<Candidate>> {
    let mut by_tag: BTreeMap<Tag, Vec<Candidate>> = BTreeMap::new();
    for (replica, view) in set.views(kind).iter().enumerate() {
        for record in view.records() {
            let Some(tag) = &record.tag else {
                continue;
            };
            if !record.modified_since(watermark) || added.contains(replica, &record.rn) {
                continue;
            }
            by_tag.entry(tag.clone()).or_default().push(Candidate {
                replica,
                account: set.account(replica).to_string(),
                rn: record.rn.clone(),
                updated_at: record.updated_at,
            });
        }
    }
    by_tag
}

/// Push the freshest copy of every modified tag to the other replicas
/// holding it. Returns the number of records overwritten.
pub fn propagate_updates<S: ReplicaStore>(
    set: &mut ReplicaSet<S>,
    kind: RecordKind,
    watermark: Timestamp,
    added: &AddedSet,
) -> Result<usize> {
    let candidates = collect_candidates(set, kind, watermark, added);
    info!("{} {kind}(s) to update", candidates.len());

    let mut pushed = 0;
    for (tag, entries) in candidates {
        let Some(newest) = entries.into_iter().max() else {
            continue;
        };
        let source = newest.replica;
        let name = set
            .view(kind, source)
            .get(&newest.rn)
            .map(|r| r.name().to_string())
            .unwrap_or_default();
        debug!(account = %newest.account, %tag, "{name}: newest copy");

        let payload = set.store(source).get(kind, &newest.rn)?;
        let tagged = TaggedPayload::resolve(&payload, set.store(source))?;
        for target in (0..set.len()).filter(|&t| t != source) {
            if !set.view(kind, target).holds(&tag) {
                debug!(account = set.account(target), %tag, "{kind} not held, skipped");
                continue;
            }
            let dest = set.store_mut(target);
            let copy = tagged.for_target(&*dest)?;
            dest.update(kind, &tag, &copy)?;
            debug!(account = dest.account(), "- {name}");
            pushed += 1;
        }
    }
    Ok(pushed)
}
