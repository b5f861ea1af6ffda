//! On-disk record of which container owns which address.
//!
//! One file per address inside the data directory: the file name is the
//! address, the contents are the owning container id. The cloud can't say
//! which fixed ip on a shared port belongs to which container, so release
//! finds the address by scanning for the container id here.
use std::{
    fs::{self, OpenOptions},
    io::{self, Write},
    net::IpAddr,
    path::{Path, PathBuf},
};

use tracing::{debug, trace, warn};

use crate::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub address: IpAddr,
    pub container_id: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ledger {
    dir: PathBuf,
}

impl Ledger {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// create the ledger directory if missing
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let ledger = Self::new(dir);
        fs::create_dir_all(&ledger.dir).map_err(|source| StoreError::Ledger {
            path: ledger.dir.clone(),
            source,
        })?;
        Ok(ledger)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, address: IpAddr) -> PathBuf {
        self.dir.join(escape(&address.to_string()))
    }

    /// Records `address` as owned by `container_id`. Fails if the address
    /// already has an entry; a partially written file is removed.
    pub fn write(&self, address: IpAddr, container_id: &str) -> Result<LedgerEntry, StoreError> {
        let path = self.path_for(address);
        let err = |source: io::Error| StoreError::Ledger {
            path: path.clone(),
            source,
        };
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(err)?;
        let container_id = container_id.trim();
        if let Err(source) = file
            .write_all(container_id.as_bytes())
            .and_then(|_| file.sync_all())
        {
            drop(file);
            if let Err(err) = fs::remove_file(&path) {
                warn!(?err, path = %path.display(), "failed to clean up partial ledger entry");
            }
            return Err(StoreError::Ledger { path, source });
        }
        debug!(%address, container_id, "wrote ledger entry");
        Ok(LedgerEntry {
            address,
            container_id: container_id.to_owned(),
            path,
        })
    }

    /// All entries, ordered by address. The lock file and anything whose
    /// name isn't an address are skipped.
    pub fn entries(&self) -> Result<Vec<LedgerEntry>, StoreError> {
        let read_dir = match fs::read_dir(&self.dir) {
            Ok(read_dir) => read_dir,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Ledger {
                    path: self.dir.clone(),
                    source,
                });
            }
        };
        let mut entries = Vec::new();
        for dir_entry in read_dir.flatten() {
            let path = dir_entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(address) = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(|name| unescape(name).parse::<IpAddr>().ok())
            else {
                trace!(path = %path.display(), "skipping non-address file");
                continue;
            };
            // unreadable entries are skipped like foreign files
            let Ok(contents) = fs::read_to_string(&path) else {
                warn!(path = %path.display(), "unreadable ledger entry");
                continue;
            };
            entries.push(LedgerEntry {
                address,
                container_id: contents.trim().to_owned(),
                path,
            });
        }
        entries.sort_by_key(|entry| entry.address);
        Ok(entries)
    }

    /// the entry owned by `container_id`, if any
    pub fn find_by_id(&self, container_id: &str) -> Result<Option<LedgerEntry>, StoreError> {
        let container_id = container_id.trim();
        Ok(self
            .entries()?
            .into_iter()
            .find(|entry| entry.container_id == container_id))
    }

    /// Removes the entry's file. An already missing file is not an error.
    pub fn remove(&self, entry: &LedgerEntry) -> Result<(), StoreError> {
        match fs::remove_file(&entry.path) {
            Ok(()) => {
                debug!(address = %entry.address, container_id = %entry.container_id, "removed ledger entry");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Ledger {
                path: entry.path.clone(),
                source,
            }),
        }
    }
}

// ':' is not allowed in windows file names
fn escape(name: &str) -> String {
    if cfg!(windows) {
        name.replace(':', "_")
    } else {
        name.to_owned()
    }
}

fn unescape(name: &str) -> String {
    if cfg!(windows) {
        name.replace('_', ":")
    } else {
        name.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_and_find() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::new(dir.path());
        let c1 = "10.0.0.9".parse().unwrap();
        let c2 = "10.0.0.11".parse().unwrap();

        ledger.write(c1, "c1").unwrap();
        ledger.write(c2, " c2\n").unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("10.0.0.11")).unwrap(),
            "c2"
        );

        let found = ledger.find_by_id("c2").unwrap().unwrap();
        assert_eq!(found.address, c2);
        assert!(ledger.find_by_id("c3").unwrap().is_none());
    }

    #[test]
    fn test_exclusive_create() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::new(dir.path());
        let addr = "10.0.0.9".parse().unwrap();

        ledger.write(addr, "c1").unwrap();
        let err = ledger.write(addr, "c2").unwrap_err();
        assert!(matches!(err, StoreError::Ledger { .. }));
        // first owner untouched
        assert_eq!(ledger.find_by_id("c1").unwrap().unwrap().address, addr);
        assert!(ledger.find_by_id("c2").unwrap().is_none());
    }

    #[test]
    fn test_entries_skip_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::new(dir.path());
        fs::write(dir.path().join(file_lock::LOCK_FILE), "").unwrap();
        fs::write(dir.path().join("last_reserved_ip.0"), "10.0.0.3").unwrap();
        fs::create_dir(dir.path().join("10.0.0.99")).unwrap();
        ledger.write("10.0.0.20".parse().unwrap(), "b").unwrap();
        ledger.write("10.0.0.3".parse().unwrap(), "a").unwrap();
        ledger.write("fd00::5".parse().unwrap(), "v6").unwrap();

        let entries = ledger.entries().unwrap();
        let owners = entries
            .iter()
            .map(|entry| entry.container_id.as_str())
            .collect::<Vec<_>>();
        assert_eq!(owners, ["a", "b", "v6"]);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::new(dir.path());
        let entry = ledger.write("10.0.0.9".parse().unwrap(), "c1").unwrap();

        ledger.remove(&entry).unwrap();
        ledger.remove(&entry).unwrap();
        assert!(ledger.entries().unwrap().is_empty());
    }

    #[test]
    fn test_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::new(dir.path().join("nope"));
        assert!(ledger.entries().unwrap().is_empty());
        assert!(ledger.find_by_id("c1").unwrap().is_none());

        let created = Ledger::create(dir.path().join("nope")).unwrap();
        assert!(created.dir().is_dir());
    }
}
