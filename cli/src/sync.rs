//! One run of the tool: load the config, reconcile, advance the watermark.

use chrono::Utc;
use contacts_sync_engine::{
    PassReport, Reconciler, RecordKind, ReplicaSet, ReplicaStore, SyncOptions,
};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::{Config, JOURNAL_FILE};
use crate::error::AppResult;
use crate::journal::JournalFile;
use crate::replica::FileReplica;

/// What the command line asked for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Link never-synced accounts by name
    pub init: bool,
    /// Seconds to wait after each record pushed during `init`
    pub rlim: Option<u64>,
}

/// Run one pass against the accounts configured in `dir`.
///
/// The watermark is only advanced when the pass succeeds.
pub fn run(dir: &Path, options: &RunOptions) -> AppResult<PassReport> {
    info!("loading configuration from {}", dir.display());
    let mut config = Config::load(dir)?;

    info!("reading address books");
    let stores = config
        .accounts
        .iter()
        .map(|account| FileReplica::open(&account.user, config.book_path(dir, account)))
        .collect::<Result<Vec<_>, _>>()?;
    for store in &stores {
        let book = store.book();
        debug!(
            account = book.account(),
            contacts = book.collection(RecordKind::Contact).len(),
            groups = book.collection(RecordKind::Group).len(),
            "read {}",
            store.path().display()
        );
    }
    let mut set = ReplicaSet::load(stores)?;

    let mut sync_options = SyncOptions::new(config.watermark());
    if let Some(secs) = options.rlim.filter(|s| *s > 0) {
        sync_options = sync_options.with_throttle(Duration::from_secs(secs));
    }
    let mut reconciler = Reconciler::new(sync_options);

    let mut journal = JournalFile::open(dir.join(JOURNAL_FILE))?;
    let report = if options.init {
        reconciler.bootstrap(&mut set, &mut journal)?
    } else {
        reconciler.run(&mut set, &mut journal)?
    };
    debug!("{} fan-out(s) pending after the pass", journal.journal().len());

    config.advance(Utc::now());
    config.save(dir)?;
    Ok(report)
}
