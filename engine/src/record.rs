//! Record types shared by every replica.

use crate::{LocalId, Tag, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The two kinds of record kept in sync.
///
/// Contacts and groups go through the same phases; only contacts carry
/// group memberships.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Contact,
    Group,
}

impl RecordKind {
    /// Reconciliation order within a pass. Groups go first because
    /// contacts reference them.
    pub const PASS_ORDER: [RecordKind; 2] = [RecordKind::Group, RecordKind::Contact];
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Contact => f.write_str("contact"),
            RecordKind::Group => f.write_str("group"),
        }
    }
}

/// A contact's membership in a group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum Membership {
    /// The implicit "no label" membership every contact has. It has no
    /// replica-specific identifier and crosses replicas unchanged.
    Default,
    /// Membership in a group, named by a replica-local group id.
    Group { id: LocalId },
}

impl Membership {
    /// Membership in the group with the given local id.
    pub fn group(id: impl Into<LocalId>) -> Self {
        Membership::Group { id: id.into() }
    }

    pub fn is_default(&self) -> bool {
        matches!(self, Membership::Default)
    }
}

/// The replicated body of a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payload {
    /// Display label. Used for bootstrap matching and logging, never as an
    /// identity key.
    pub name: String,
    /// Everything the engine does not interpret, copied verbatim
    #[serde(default)]
    pub fields: serde_json::Value,
    /// Group memberships (contacts only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub memberships: Vec<Membership>,
}

impl Payload {
    /// Create a payload with no memberships.
    pub fn new(name: impl Into<String>, fields: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            fields,
            memberships: Vec::new(),
        }
    }

    /// Builder-style memberships setter.
    pub fn with_memberships(mut self, memberships: Vec<Membership>) -> Self {
        self.memberships = memberships;
        self
    }

    /// Local group ids referenced by this payload, in order.
    pub fn group_ids(&self) -> impl Iterator<Item = &LocalId> {
        self.memberships.iter().filter_map(|m| match m {
            Membership::Group { id } => Some(id),
            Membership::Default => None,
        })
    }
}

/// A record as listed by a replica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Replica-local identifier
    pub rn: LocalId,
    /// Cross-replica tag, `None` until the record is first synced
    pub tag: Option<Tag>,
    /// Last modification time as reported by the replica
    pub updated_at: Timestamp,
    /// The replicated body
    pub payload: Payload,
}

impl Record {
    pub fn new(rn: impl Into<LocalId>, payload: Payload, updated_at: Timestamp) -> Self {
        Self {
            rn: rn.into(),
            tag: None,
            updated_at,
            payload,
        }
    }

    /// Builder-style tag setter.
    pub fn tagged(mut self, tag: impl Into<Tag>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.payload.name
    }

    pub fn is_tagged(&self) -> bool {
        self.tag.is_some()
    }

    /// Whether the record was modified after the watermark.
    pub fn modified_since(&self, watermark: Timestamp) -> bool {
        self.updated_at > watermark
    }
}
