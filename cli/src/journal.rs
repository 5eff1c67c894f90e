//! The fan-out journal kept next to the config.

use contacts_sync_engine::{
    error::Result, Error, FanoutJournal, FanoutLog, PendingFanout, RecordKind,
};
use std::fs;
use std::io;
use std::path::PathBuf;

use crate::persist::write_atomic;

/// A [`FanoutJournal`] written to disk on every change.
#[derive(Debug)]
pub struct JournalFile {
    path: PathBuf,
    journal: FanoutJournal,
}

impl JournalFile {
    /// Open the journal at `path`. A missing file is an empty journal.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let journal = match fs::read_to_string(&path) {
            Ok(json) => FanoutJournal::from_json(&json)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => FanoutJournal::new(),
            Err(e) => return Err(Error::Journal(format!("{}: {e}", path.display()))),
        };
        if !journal.is_empty() {
            tracing::warn!(
                "{} fan-out(s) left pending by an interrupted run",
                journal.len()
            );
        }
        Ok(Self { path, journal })
    }

    pub fn journal(&self) -> &FanoutJournal {
        &self.journal
    }

    fn save(&self) -> Result<()> {
        let json = self.journal.to_json_pretty()?;
        write_atomic(&self.path, &json)
            .map_err(|e| Error::Journal(format!("{}: {e}", self.path.display())))
    }
}

impl FanoutLog for JournalFile {
    fn pending(&self, kind: RecordKind) -> Vec<PendingFanout> {
        self.journal.pending(kind)
    }

    fn begin(&mut self, fanout: PendingFanout) -> Result<()> {
        self.journal.begin(fanout)?;
        self.save()
    }

    fn mark_reached(&mut self, kind: RecordKind, tag: &str, account: &str) -> Result<()> {
        self.journal.mark_reached(kind, tag, account)?;
        self.save()
    }

    fn complete(&mut self, kind: RecordKind, tag: &str) -> Result<()> {
        self.journal.complete(kind, tag)?;
        self.save()
    }
}
