//! # Contacts Sync Engine
//!
//! Keeps the address books of several accounts identical.
//!
//! Every account is a replica holding the same contacts and contact groups.
//! A pass reads all replicas, works out what changed since the previous pass
//! and writes the changes to every other replica. There is no master copy.
//!
//! ## Design Principles
//!
//! - **No IO**: replicas are reached through the [`ReplicaStore`] trait
//! - **Synchronous**: a pass is a straight sequence of store calls
//! - **Fail-stop**: any store error aborts the pass; the next one picks up
//!
//! ## Core Concepts
//!
//! ### Tags
//!
//! Records have local ids that differ per account. A random [`Tag`], stored
//! on the record itself, links the copies of one logical record across
//! accounts. Records with no tag are new. See [`TagAllocator`].
//!
//! ### Phases
//!
//! For groups, then contacts, a pass:
//! - resumes additions a failed pass left half done ([`FanoutJournal`])
//! - deletes everywhere the tags gone from some replica
//! - tags and copies new records
//! - pushes the freshest copy of every record modified since the watermark
//!
//! Group memberships are translated between accounts through group tags;
//! see [`TaggedPayload`].
//!
//! ### Bootstrap
//!
//! Accounts that have never been synced carry no tags.
//! [`Reconciler::bootstrap`] links them by matching records by name.
//!
//! ## Quick Start
//!
//! ```rust
//! use contacts_sync_engine::{
//!     FanoutJournal, MemoryReplica, Payload, Reconciler, RecordKind, ReplicaSet, SyncOptions,
//! };
//! use serde_json::json;
//!
//! // 1. Two accounts, never synced
//! let mut work = MemoryReplica::new("me@work.example");
//! work.insert(RecordKind::Contact, Payload::new("Alice", json!({"email": "alice@example.com"})));
//! let home = MemoryReplica::new("me@home.example");
//!
//! // 2. Link them by name
//! let mut set = ReplicaSet::load(vec![work, home]).unwrap();
//! let mut reconciler = Reconciler::new(SyncOptions::new(0));
//! let mut journal = FanoutJournal::new();
//! reconciler.bootstrap(&mut set, &mut journal).unwrap();
//!
//! // 3. Both now hold Alice
//! for store in set.stores() {
//!     assert_eq!(store.collection(RecordKind::Contact).len(), 1);
//! }
//!
//! // 4. Later passes are tag based
//! let mut set = ReplicaSet::load(set.into_stores()).unwrap();
//! reconciler.run(&mut set, &mut journal).unwrap();
//! ```
//!
//! ## Persistence
//!
//! Use [`MemoryReplica::export_state`] and [`MemoryReplica::import_state`]
//! with [`ReplicaSnapshot`] to keep a replica in a file. [`FanoutJournal`]
//! serializes the same way.

pub mod addition;
pub mod deletion;
pub mod error;
pub mod journal;
pub mod membership;
pub mod reconcile;
pub mod record;
pub mod replica;
pub mod snapshot;
pub mod store;
pub mod tag;
pub mod update;

// Re-export main types at crate root
pub use addition::BootstrapCounts;
pub use error::Error;
pub use journal::{FanoutJournal, FanoutLog, PendingFanout};
pub use membership::TaggedPayload;
pub use reconcile::{
    next_watermark, KindReport, PassReport, Reconciler, SyncOptions, WATERMARK_SAFETY_MARGIN,
};
pub use record::{Membership, Payload, Record, RecordKind};
pub use replica::{AddedSet, ReplicaSet, ReplicaView};
pub use snapshot::{ReplicaSnapshot, SNAPSHOT_FORMAT_VERSION};
pub use store::{Collection, MemoryReplica, ReplicaStore};
pub use tag::{TagAllocator, TAG_LEN};
pub use update::Candidate;

/// Type aliases for clarity
pub type Tag = String;
pub type LocalId = String;
pub type AccountId = String;
/// Milliseconds since the Unix epoch
pub type Timestamp = u64;
