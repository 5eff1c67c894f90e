//! Configuration management for the sync tool.
//!
//! The config directory holds `config.json`, listing the accounts to keep in
//! sync and the watermark of the last successful pass, and `journal.json`.

use chrono::{DateTime, TimeZone, Utc};
use contacts_sync_engine::{next_watermark, Timestamp};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::persist::write_atomic;

pub const CONFIG_FILE: &str = "config.json";
pub const JOURNAL_FILE: &str = "journal.json";

/// Environment variable overriding the config directory.
pub const HOME_ENV: &str = "CONTACTS_SYNC_HOME";

/// A file with this name in the working directory selects `./conf`.
pub const PORTABLE_MARKER: &str = "PORTABLE.md";

/// Placeholder account written into a fresh config.
pub const FIXME_USER: &str = "FIXME@example.com";

/// One account to keep in sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Account id, unique across the config
    pub user: String,
    /// Address book file, relative paths resolved against the config dir
    pub book: PathBuf,
}

/// Contents of `config.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// End of the last successful pass
    pub last: DateTime<Utc>,
    pub accounts: Vec<AccountConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            last: initial_watermark(),
            accounts: vec![AccountConfig {
                user: FIXME_USER.to_string(),
                book: PathBuf::from("FIXME.json"),
            }],
        }
    }
}

impl Config {
    /// Load `config.json` from `dir`.
    ///
    /// A missing file is replaced by a default one and reported as
    /// [`ConfigError::Created`]. A file still listing the placeholder
    /// account is [`ConfigError::NeedsEditing`].
    pub fn load(dir: &Path) -> Result<Self, ConfigError> {
        let path = dir.join(CONFIG_FILE);
        if !path.exists() {
            let json = serde_json::to_string_pretty(&Config::default())
                .map_err(|e| ConfigError::Invalid(path.clone(), e.to_string()))?;
            write_atomic(&path, &json).map_err(|e| ConfigError::Io(path.clone(), e))?;
            tracing::warn!("made config file {}, you must edit it", path.display());
            return Err(ConfigError::Created(path));
        }

        let content = fs::read_to_string(&path).map_err(|e| ConfigError::Io(path.clone(), e))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| ConfigError::Invalid(path.clone(), e.to_string()))?;
        tracing::debug!("loaded {}", path.display());

        if config.accounts.iter().any(|a| a.user == FIXME_USER) {
            return Err(ConfigError::NeedsEditing(path));
        }
        if config.accounts.is_empty() {
            return Err(ConfigError::Invalid(path, "no accounts configured".to_string()));
        }
        Ok(config)
    }

    /// Save to `config.json` in `dir`.
    pub fn save(&self, dir: &Path) -> Result<(), ConfigError> {
        let path = dir.join(CONFIG_FILE);
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Invalid(path.clone(), e.to_string()))?;
        write_atomic(&path, &json).map_err(|e| ConfigError::Io(path, e))
    }

    /// Watermark in engine milliseconds.
    pub fn watermark(&self) -> Timestamp {
        self.last.timestamp_millis().max(0) as Timestamp
    }

    /// Record a pass that finished at `now`.
    pub fn advance(&mut self, now: DateTime<Utc>) {
        let millis = next_watermark(now.timestamp_millis().max(0) as Timestamp);
        if let Some(last) = i64::try_from(millis)
            .ok()
            .and_then(DateTime::from_timestamp_millis)
        {
            self.last = last;
        }
    }

    /// Address book path of an account.
    pub fn book_path(&self, dir: &Path, account: &AccountConfig) -> PathBuf {
        if account.book.is_absolute() {
            account.book.clone()
        } else {
            dir.join(&account.book)
        }
    }
}

/// Watermark of a config that has never completed a pass.
pub fn initial_watermark() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(1972, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Pick the config directory.
///
/// In order: the command-line flag, [`HOME_ENV`], `./conf` when
/// [`PORTABLE_MARKER`] exists, the platform data directory.
pub fn resolve_dir(flag: Option<PathBuf>) -> Result<PathBuf, ConfigError> {
    let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    resolve_dir_from(flag, env::var(HOME_ENV).ok(), &cwd)
}

fn resolve_dir_from(
    flag: Option<PathBuf>,
    home: Option<String>,
    cwd: &Path,
) -> Result<PathBuf, ConfigError> {
    if let Some(dir) = flag {
        return Ok(dir);
    }
    if let Some(home) = home.filter(|h| !h.is_empty()) {
        return Ok(PathBuf::from(home));
    }
    if cwd.join(PORTABLE_MARKER).exists() {
        return Ok(cwd.join("conf"));
    }
    dirs::data_dir()
        .map(|d| d.join("contacts-sync"))
        .ok_or(ConfigError::NoConfigDir)
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("made config file {}, you must edit it", .0.display())]
    Created(PathBuf),

    #[error("you must edit {}, it still lists the {} account", .0.display(), FIXME_USER)]
    NeedsEditing(PathBuf),

    #[error("invalid config {}: {}", .0.display(), .1)]
    Invalid(PathBuf, String),

    #[error("cannot access {}: {}", .0.display(), .1)]
    Io(PathBuf, #[source] std::io::Error),

    #[error("no config directory: pass --config-dir or set {}", HOME_ENV)]
    NoConfigDir,
}
