//! Address books kept in JSON files.

use contacts_sync_engine::{
    error::Result, Error, LocalId, MemoryReplica, Payload, Record, RecordKind, ReplicaSnapshot,
    ReplicaStore, Tag,
};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::persist::write_atomic;

/// A [`MemoryReplica`] backed by a snapshot file.
///
/// Every mutating call is written through before it returns, so a pass that
/// dies midway leaves each book consistent with what the journal recorded.
#[derive(Debug)]
pub struct FileReplica {
    path: PathBuf,
    inner: MemoryReplica,
}

impl FileReplica {
    /// Open the book of `account` at `path`. A missing file is an empty book.
    pub fn open(account: &str, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut inner = MemoryReplica::with_wall_clock(account);

        match fs::read_to_string(&path) {
            Ok(json) => inner.import_state(ReplicaSnapshot::from_json(&json)?)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::info!(account, "no address book at {}, starting empty", path.display());
            }
            Err(e) => return Err(store_error(account, &path, e)),
        }

        Ok(Self { path, inner })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The in-memory book.
    pub fn book(&self) -> &MemoryReplica {
        &self.inner
    }

    /// Write the book to its file.
    pub fn save(&self) -> Result<()> {
        let json = self.inner.export_state().to_json_pretty()?;
        write_atomic(&self.path, &json).map_err(|e| store_error(self.account(), &self.path, e))
    }
}

fn store_error(account: &str, path: &Path, e: io::Error) -> Error {
    Error::Store {
        account: account.to_string(),
        message: format!("{}: {e}", path.display()),
    }
}

impl ReplicaStore for FileReplica {
    fn account(&self) -> &str {
        self.inner.account()
    }

    fn list(&self, kind: RecordKind) -> Result<Vec<Record>> {
        self.inner.list(kind)
    }

    fn get(&self, kind: RecordKind, rn: &str) -> Result<Payload> {
        self.inner.get(kind, rn)
    }

    fn create(&mut self, kind: RecordKind, tag: &str, payload: &Payload) -> Result<LocalId> {
        let rn = self.inner.create(kind, tag, payload)?;
        self.save()?;
        Ok(rn)
    }

    fn update(&mut self, kind: RecordKind, tag: &str, payload: &Payload) -> Result<()> {
        self.inner.update(kind, tag, payload)?;
        self.save()
    }

    fn update_tag(&mut self, kind: RecordKind, rn: &str, tag: &str) -> Result<()> {
        self.inner.update_tag(kind, rn, tag)?;
        self.save()
    }

    fn delete_by_tag(&mut self, kind: RecordKind, tag: &str) -> Result<bool> {
        let deleted = self.inner.delete_by_tag(kind, tag)?;
        if deleted {
            self.save()?;
        }
        Ok(deleted)
    }

    fn local_id_to_tag(&self, group_rn: &str) -> Result<Option<Tag>> {
        self.inner.local_id_to_tag(group_rn)
    }

    fn tag_to_local_id(&self, tag: &str) -> Result<Option<LocalId>> {
        self.inner.tag_to_local_id(tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn alice() -> Payload {
        Payload::new("Alice", json!({"email": "alice@example.com"}))
    }

    #[test]
    fn missing_file_is_empty_book() {
        let dir = TempDir::new().unwrap();
        let replica = FileReplica::open("a@example.com", dir.path().join("a.json")).unwrap();

        assert!(replica.list(RecordKind::Contact).unwrap().is_empty());
        assert!(!replica.path().exists());
    }

    #[test]
    fn writes_are_persisted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.json");

        let mut replica = FileReplica::open("a@example.com", &path).unwrap();
        let group = replica
            .create(RecordKind::Group, "g1", &Payload::new("Work", json!({})))
            .unwrap();
        replica.create(RecordKind::Contact, "t1", &alice()).unwrap();
        replica
            .update(RecordKind::Contact, "t1", &Payload::new("Alice B", json!({})))
            .unwrap();

        let reopened = FileReplica::open("a@example.com", &path).unwrap();
        assert_eq!(reopened.tag_to_local_id("g1").unwrap(), Some(group));
        let record = reopened.book().record_by_tag(RecordKind::Contact, "t1").unwrap();
        assert_eq!(record.name(), "Alice B");

        let mut reopened = reopened;
        assert!(reopened.delete_by_tag(RecordKind::Contact, "t1").unwrap());
        let reopened = FileReplica::open("a@example.com", &path).unwrap();
        assert!(reopened.list(RecordKind::Contact).unwrap().is_empty());
    }

    #[test]
    fn book_of_another_account_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.json");
        let mut replica = FileReplica::open("a@example.com", &path).unwrap();
        replica.create(RecordKind::Contact, "t1", &alice()).unwrap();

        let err = FileReplica::open("b@example.com", &path).unwrap_err();
        assert!(matches!(err, Error::InvalidSnapshot(_)));
    }

    #[test]
    fn corrupt_book_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.json");
        fs::write(&path, "{").unwrap();

        assert!(FileReplica::open("a@example.com", &path).is_err());
    }
}
