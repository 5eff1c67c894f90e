//! Error types for the sync engine.

use crate::{AccountId, LocalId, RecordKind, Tag};
use thiserror::Error;

/// All possible errors from the sync engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Precondition failures, the run must not start
    #[error("{kind}s ({}) are duplicated in account {account}", names.join(","))]
    DuplicateNames {
        account: AccountId,
        kind: RecordKind,
        names: Vec<String>,
    },

    #[error("account {0} has no sync tags and must be bootstrapped with --init")]
    NotBootstrapped(AccountId),

    #[error("account {0} is configured more than once")]
    DuplicateAccount(AccountId),

    // Store errors
    #[error("{kind} {id} not found in account {account}")]
    RecordNotFound {
        account: AccountId,
        kind: RecordKind,
        id: LocalId,
    },

    #[error("no {kind} tagged {tag} in account {account}")]
    TagNotFound {
        account: AccountId,
        kind: RecordKind,
        tag: Tag,
    },

    #[error("store error in account {account}: {message}")]
    Store { account: AccountId, message: String },

    // State errors
    #[error("fan-out journal error: {0}")]
    Journal(String),

    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
