//! Journal of additions whose fan-out has not reached every replica.
//!
//! An addition tags the source record first and creates the copies after.
//! If the pass dies in between, the source no longer looks new and the
//! missing copies would later read as deletions. Every fan-out is therefore
//! journaled from before the first create until the last one succeeds, and
//! the next pass resumes whatever is still pending. Bootstrap fan-outs are
//! journaled the same way.

use crate::{error::Result, AccountId, Error, LocalId, RecordKind, Tag};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// An addition that has not yet reached every replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingFanout {
    pub kind: RecordKind,
    pub tag: Tag,
    /// Account the record was added on
    pub source: AccountId,
    /// Local id of the record on the source account
    pub rn: LocalId,
    /// Accounts that already hold a copy
    #[serde(default)]
    pub reached: BTreeSet<AccountId>,
    /// Started by a bootstrap: an untagged same-named record on a target
    /// is the copy, not a separate record
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub by_name: bool,
}

impl PendingFanout {
    pub fn new(
        kind: RecordKind,
        tag: impl Into<Tag>,
        source: impl Into<AccountId>,
        rn: impl Into<LocalId>,
    ) -> Self {
        Self {
            kind,
            tag: tag.into(),
            source: source.into(),
            rn: rn.into(),
            reached: BTreeSet::new(),
            by_name: false,
        }
    }

    /// Mark the fan-out as part of a name-based bootstrap.
    pub fn linking_by_name(mut self) -> Self {
        self.by_name = true;
        self
    }

    pub fn has_reached(&self, account: &str) -> bool {
        self.reached.contains(account)
    }
}

/// Where the reconciler records fan-out progress.
///
/// Implementations that persist must do so before returning, so a crash
/// right after a create still finds the journal up to date.
pub trait FanoutLog {
    /// Pending fan-outs of one kind, oldest first.
    fn pending(&self, kind: RecordKind) -> Vec<PendingFanout>;

    /// Start tracking a fan-out.
    fn begin(&mut self, fanout: PendingFanout) -> Result<()>;

    /// Record that `account` now holds a copy of the tagged record.
    fn mark_reached(&mut self, kind: RecordKind, tag: &str, account: &str) -> Result<()>;

    /// Stop tracking a fan-out, finished or abandoned.
    fn complete(&mut self, kind: RecordKind, tag: &str) -> Result<()>;
}

/// In-memory journal, serializable for persistence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FanoutJournal {
    #[serde(default)]
    pending: Vec<PendingFanout>,
}

impl FanoutJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn get(&self, kind: RecordKind, tag: &str) -> Option<&PendingFanout> {
        self.pending.iter().find(|f| f.kind == kind && f.tag == tag)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Journal(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Journal(e.to_string()))
    }

    fn get_mut(&mut self, kind: RecordKind, tag: &str) -> Option<&mut PendingFanout> {
        self.pending
            .iter_mut()
            .find(|f| f.kind == kind && f.tag == tag)
    }
}

impl FanoutLog for FanoutJournal {
    fn pending(&self, kind: RecordKind) -> Vec<PendingFanout> {
        self.pending
            .iter()
            .filter(|f| f.kind == kind)
            .cloned()
            .collect()
    }

    fn begin(&mut self, fanout: PendingFanout) -> Result<()> {
        if self.get(fanout.kind, &fanout.tag).is_some() {
            return Err(Error::Journal(format!(
                "{} {} is already being fanned out",
                fanout.kind, fanout.tag
            )));
        }
        self.pending.push(fanout);
        Ok(())
    }

    fn mark_reached(&mut self, kind: RecordKind, tag: &str, account: &str) -> Result<()> {
        let fanout = self
            .get_mut(kind, tag)
            .ok_or_else(|| Error::Journal(format!("no pending fan-out for {kind} {tag}")))?;
        fanout.reached.insert(account.to_string());
        Ok(())
    }

    fn complete(&mut self, kind: RecordKind, tag: &str) -> Result<()> {
        self.pending.retain(|f| !(f.kind == kind && f.tag == tag));
        Ok(())
    }
}
