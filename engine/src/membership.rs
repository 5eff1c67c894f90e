//! Translation of group memberships between replicas.
//!
//! A contact names its groups by local id, which means nothing on another
//! replica. Each group membership goes source local id -> tag -> target
//! local id; memberships with no mapping on either side are dropped.

use crate::{error::Result, Membership, Payload, ReplicaStore, Tag};
use tracing::debug;

/// A source payload with its group memberships resolved to tags.
///
/// Resolution runs once per source record; [`TaggedPayload::for_target`]
/// then produces one independent copy per destination.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedPayload {
    payload: Payload,
    group_tags: Vec<Tag>,
}

impl TaggedPayload {
    /// Resolve the group memberships of `payload` against its source store.
    ///
    /// Groups without a tag on the source (system labels, or groups that
    /// were never synced) are dropped here.
    pub fn resolve<S: ReplicaStore + ?Sized>(payload: &Payload, source: &S) -> Result<Self> {
        let mut group_tags = Vec::new();
        for id in payload.group_ids() {
            match source.local_id_to_tag(id)? {
                Some(tag) => group_tags.push(tag),
                None => debug!(
                    account = source.account(),
                    group = %id,
                    "group has no sync tag, membership not replicated"
                ),
            }
        }

        let mut payload = payload.clone();
        payload.memberships.retain(Membership::is_default);

        Ok(Self {
            payload,
            group_tags,
        })
    }

    /// Tags of the groups this payload belongs to.
    pub fn group_tags(&self) -> &[Tag] {
        &self.group_tags
    }

    /// The payload with only its default memberships.
    pub fn base(&self) -> &Payload {
        &self.payload
    }

    /// A copy of the payload whose memberships name `target`'s local groups.
    pub fn for_target<S: ReplicaStore + ?Sized>(&self, target: &S) -> Result<Payload> {
        let mut payload = self.payload.clone();
        for tag in &self.group_tags {
            match target.tag_to_local_id(tag)? {
                Some(id) => payload.memberships.push(Membership::Group { id }),
                None => debug!(
                    account = target.account(),
                    %tag,
                    "no matching group, membership dropped"
                ),
            }
        }
        Ok(payload)
    }
}
