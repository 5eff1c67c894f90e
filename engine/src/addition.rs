//! Addition phase.
//!
//! New records are the untagged ones. Each gets a fresh tag on its source
//! replica and a copy on every other replica. The same fan-out machinery
//! resumes additions a failed pass left half done, and links replicas by
//! name the first time they are synced.

use crate::{
    error::Result, AddedSet, FanoutLog, LocalId, PendingFanout, Record, RecordKind, ReplicaSet,
    ReplicaStore, TagAllocator, TaggedPayload,
};
use std::collections::HashSet;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Tag every untagged record and copy it to every other replica.
///
/// Replicas are drained one at a time in configured order. Returns the
/// number of source records added.
pub fn propagate_additions<S: ReplicaStore>(
    set: &mut ReplicaSet<S>,
    kind: RecordKind,
    allocator: &mut TagAllocator,
    log: &mut dyn FanoutLog,
    added: &mut AddedSet,
) -> Result<usize> {
    let mut count = 0;
    for source in 0..set.len() {
        let new: Vec<(LocalId, String)> = set
            .view(kind, source)
            .untagged()
            .map(|r| (r.rn.clone(), r.name().to_string()))
            .collect();
        if new.is_empty() {
            continue;
        }
        debug!(
            account = set.account(source),
            "new {kind}s: {:?}",
            new.iter().map(|(_, name)| name).collect::<Vec<_>>()
        );

        for (rn, name) in new {
            let tag = allocator.allocate();
            // Journal first: a tag on the source with no journal entry
            // would read as a deletion on the next pass.
            log.begin(PendingFanout::new(kind, &tag, set.account(source), &rn))?;
            set.store_mut(source).update_tag(kind, &rn, &tag)?;
            added.insert(source, rn.clone());

            let payload = set.store(source).get(kind, &rn)?;
            let tagged = TaggedPayload::resolve(&payload, set.store(source))?;
            for target in (0..set.len()).filter(|&t| t != source) {
                debug!("adding {name} to {}", set.account(target));
                create_copy(set, kind, target, &tag, &tagged, log, added)?;
            }
            log.complete(kind, &tag)?;
            count += 1;
        }
    }

    if count > 0 {
        info!("{count} new {kind}(s) propagated");
    }
    Ok(count)
}

/// Finish fan-outs a previous pass started but did not complete.
///
/// Entries whose source account is gone, or whose source record no longer
/// bears the tag, are abandoned. Replicas already reached that no longer
/// hold the tag had the copy deleted by the user and are left alone. A
/// bootstrap entry links an untagged same-named record instead of copying.
/// Returns the number of copies created; views of `kind` are re-listed if
/// any were.
pub fn resume_fanouts<S: ReplicaStore>(
    set: &mut ReplicaSet<S>,
    kind: RecordKind,
    log: &mut dyn FanoutLog,
    added: &mut AddedSet,
) -> Result<usize> {
    let mut created = 0;
    for fanout in log.pending(kind) {
        let Some(source) = set.position(&fanout.source) else {
            warn!(
                account = %fanout.source,
                tag = %fanout.tag,
                "source account no longer configured, abandoning {kind} fan-out"
            );
            log.complete(kind, &fanout.tag)?;
            continue;
        };
        let Some(rn) = set
            .view(kind, source)
            .find_by_tag(&fanout.tag)
            .map(|r| r.rn.clone())
        else {
            info!(
                account = %fanout.source,
                tag = %fanout.tag,
                "source {kind} no longer tagged, abandoning fan-out"
            );
            log.complete(kind, &fanout.tag)?;
            continue;
        };

        info!(account = %fanout.source, tag = %fanout.tag, "resuming {kind} fan-out");
        added.insert(source, rn.clone());
        let payload = set.store(source).get(kind, &rn)?;
        let tagged = TaggedPayload::resolve(&payload, set.store(source))?;

        for target in (0..set.len()).filter(|&t| t != source) {
            let account = set.account(target).to_string();
            let existing = set
                .view(kind, target)
                .find_by_tag(&fanout.tag)
                .map(|r| r.rn.clone());
            match (existing, fanout.has_reached(&account)) {
                (Some(rn), reached) => {
                    added.insert(target, rn);
                    if !reached {
                        log.mark_reached(kind, &fanout.tag, &account)?;
                    }
                }
                (None, true) => {
                    debug!(%account, tag = %fanout.tag, "copy deleted since, not recreated");
                }
                (None, false) => {
                    let unlinked = fanout
                        .by_name
                        .then(|| {
                            set.view(kind, target)
                                .untagged()
                                .find(|r| r.name() == payload.name)
                                .map(|r| r.rn.clone())
                        })
                        .flatten();
                    match unlinked {
                        Some(rn) => {
                            link_copy(set, kind, target, &rn, &fanout.tag, &tagged, log)?;
                            added.insert(target, rn);
                        }
                        None => create_copy(set, kind, target, &fanout.tag, &tagged, log, added)?,
                    }
                    created += 1;
                }
            }
        }
        log.complete(kind, &fanout.tag)?;
    }

    if created > 0 {
        set.refresh(kind)?;
    }
    Ok(created)
}

fn create_copy<S: ReplicaStore>(
    set: &mut ReplicaSet<S>,
    kind: RecordKind,
    target: usize,
    tag: &str,
    tagged: &TaggedPayload,
    log: &mut dyn FanoutLog,
    added: &mut AddedSet,
) -> Result<()> {
    let dest = set.store_mut(target);
    let payload = tagged.for_target(&*dest)?;
    let rn = dest.create(kind, tag, &payload)?;
    log.mark_reached(kind, tag, dest.account())?;
    added.insert(target, rn);
    Ok(())
}

/// Outcome of a name-based bootstrap of one kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BootstrapCounts {
    /// Records pushed to the other replicas
    pub synced: usize,
    /// Records skipped because a same-named record was already handled
    pub done_before: usize,
}

/// Link replicas that have never been synced, matching records by name.
///
/// Each name is handled once, on the first replica that has it. Same-named
/// records elsewhere get its tag and its payload; replicas without one get
/// a copy. Every handled name is journaled in `log` until each replica holds
/// it, so an interrupted bootstrap is finished by the next pass instead of
/// read as deletions. `throttle` is slept after each handled name.
pub fn bootstrap_by_name<S: ReplicaStore>(
    set: &mut ReplicaSet<S>,
    kind: RecordKind,
    allocator: &mut TagAllocator,
    log: &mut dyn FanoutLog,
    throttle: Option<Duration>,
) -> Result<BootstrapCounts> {
    let mut totals = BootstrapCounts::default();
    let mut done: HashSet<String> = HashSet::new();

    for source in 0..set.len() {
        let records: Vec<Record> = set.view(kind, source).records().cloned().collect();
        let mut counts = BootstrapCounts::default();

        for record in &records {
            if done.contains(record.name()) {
                counts.done_before += 1;
                continue;
            }

            let tag = record.tag.clone().unwrap_or_else(|| allocator.allocate());
            let fanout = PendingFanout::new(kind, &tag, set.account(source), &record.rn);
            log.begin(fanout.linking_by_name())?;
            if record.tag.is_none() {
                set.store_mut(source).update_tag(kind, &record.rn, &tag)?;
            }

            let payload = set.store(source).get(kind, &record.rn)?;
            let tagged = TaggedPayload::resolve(&payload, set.store(source))?;
            for target in (0..set.len()).filter(|&t| t != source) {
                let matched = set
                    .view(kind, target)
                    .find_by_name(record.name())
                    .map(|r| r.rn.clone());
                match matched {
                    Some(rn) => link_copy(set, kind, target, &rn, &tag, &tagged, log)?,
                    None => {
                        let dest = set.store_mut(target);
                        let copy = tagged.for_target(&*dest)?;
                        dest.create(kind, &tag, &copy)?;
                        log.mark_reached(kind, &tag, dest.account())?;
                    }
                }
            }
            log.complete(kind, &tag)?;

            done.insert(record.name().to_string());
            counts.synced += 1;
            if let Some(delay) = throttle.filter(|d| !d.is_zero()) {
                thread::sleep(delay);
            }
        }

        info!(
            account = set.account(source),
            total = records.len(),
            synced = counts.synced,
            done_before = counts.done_before,
            "pushed {kind}s"
        );
        totals.synced += counts.synced;
        totals.done_before += counts.done_before;
    }

    Ok(totals)
}

/// Give the same-named record `rn` on `target` the tag and payload of the
/// source record.
fn link_copy<S: ReplicaStore>(
    set: &mut ReplicaSet<S>,
    kind: RecordKind,
    target: usize,
    rn: &str,
    tag: &str,
    tagged: &TaggedPayload,
    log: &mut dyn FanoutLog,
) -> Result<()> {
    let dest = set.store_mut(target);
    let copy = tagged.for_target(&*dest)?;
    debug!(account = dest.account(), name = copy.name.as_str(), "linked by name");
    dest.update_tag(kind, rn, tag)?;
    dest.update(kind, tag, &copy)?;
    log.mark_reached(kind, tag, dest.account())
}
