//! Unified error handling for the command-line tool.

use crate::config::ConfigError;
use contacts_sync_engine::Error;

/// Exit status of a successful run.
pub const EXIT_OK: u8 = 0;
/// A precondition failed; fix the environment and rerun.
pub const EXIT_FATAL: u8 = 1;
/// The operator has to act first: edit the config or run with `--init`.
pub const EXIT_MANUAL: u8 = 2;

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Engine(#[from] Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Process exit status for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            AppError::Config(ConfigError::NeedsEditing(_)) => EXIT_MANUAL,
            AppError::Engine(Error::NotBootstrapped(_) | Error::DuplicateAccount(_)) => EXIT_MANUAL,
            AppError::Config(_) | AppError::Engine(_) | AppError::Io(_) => EXIT_FATAL,
        }
    }
}

/// Result type alias for the tool.
pub type AppResult<T> = Result<T, AppError>;
