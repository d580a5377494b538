//! Body files: one raw message per UID, named after the encoded UID.
//!
//! Files are write-once. A body is staged in a temporary file inside the
//! mailbox directory and renamed into place, so a body file is either
//! complete or absent.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Result, StoreError};
use crate::index::codec;

/// Prefix of staging files; never a valid body file name.
const STAGING_PREFIX: &str = ".incoming-";

/// The filesystem half of a mailbox.
#[derive(Debug, Clone)]
pub struct BodyStore {
    dir: PathBuf,
    extension: String,
    sync: bool,
}

impl BodyStore {
    pub fn new(dir: impl Into<PathBuf>, extension: impl Into<String>, sync: bool) -> Self {
        Self {
            dir: dir.into(),
            extension: extension.into(),
            sync,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where the body of `uid` lives.
    pub fn path_for(&self, uid: u32) -> PathBuf {
        self.dir
            .join(codec::body_file_name(&codec::encode(uid), &self.extension))
    }

    /// Stream `body` into the file for `uid`, returning the bytes written.
    ///
    /// Fails if a file for `uid` already exists.
    pub fn write(&self, uid: u32, body: &mut dyn Read) -> Result<u64> {
        let path = self.path_for(uid);
        let mut staged = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempfile_in(&self.dir)
            .map_err(|e| StoreError::io(&self.dir, e))?;

        let written = io::copy(body, &mut staged).map_err(|e| StoreError::io(staged.path(), e))?;
        staged
            .flush()
            .map_err(|e| StoreError::io(staged.path(), e))?;
        if self.sync {
            staged
                .as_file()
                .sync_all()
                .map_err(|e| StoreError::io(staged.path(), e))?;
        }

        staged
            .persist_noclobber(&path)
            .map_err(|e| StoreError::io(&path, e.error))?;

        debug!(uid, bytes = written, path = %path.display(), "Wrote body file");
        Ok(written)
    }

    /// Open the body of `uid` for reading.
    pub fn open(&self, uid: u32) -> Result<File> {
        let path = self.path_for(uid);
        File::open(&path).map_err(|e| StoreError::io(&path, e))
    }

    /// Delete the body of `uid`. Returns `false` if it was already gone.
    pub fn remove(&self, uid: u32) -> Result<bool> {
        let path = self.path_for(uid);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!(uid, path = %path.display(), "Removed body file");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }

    /// UIDs of every body file in the directory, ascending. Names this store
    /// never writes (the index, staging files, strays) are ignored.
    pub fn uids(&self) -> Result<Vec<u32>> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| StoreError::io(&self.dir, e))?;
        let mut uids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&self.dir, e))?;
            let name = entry.file_name();
            if let Some(uid) = name
                .to_str()
                .and_then(|n| codec::uid_from_file_name(n, &self.extension))
            {
                uids.push(uid);
            }
        }
        uids.sort_unstable();
        Ok(uids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingReader;

    impl Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "client went away"))
        }
    }

    fn store(dir: &Path) -> BodyStore {
        BodyStore::new(dir, "eml", true)
    }

    #[test]
    fn test_write_open_remove() {
        let dir = tempfile::tempdir().unwrap();
        let bodies = store(dir.path());

        let written = bodies.write(42, &mut &b"Subject: x\r\n\r\nhi"[..]).unwrap();
        assert_eq!(written, 16);
        assert!(dir.path().join("0000002a.eml").is_file());

        let mut contents = String::new();
        bodies
            .open(42)
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert_eq!(contents, "Subject: x\r\n\r\nhi");

        assert!(bodies.remove(42).unwrap());
        assert!(!bodies.remove(42).unwrap());
        assert!(matches!(bodies.open(42), Err(StoreError::Io { .. })));
    }

    #[test]
    fn test_failed_write_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let bodies = store(dir.path());

        assert!(bodies.write(1, &mut FailingReader).is_err());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_write_refuses_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let bodies = store(dir.path());
        bodies.write(5, &mut &b"first"[..]).unwrap();
        assert!(bodies.write(5, &mut &b"second"[..]).is_err());
        let kept = std::fs::read(bodies.path_for(5)).unwrap();
        assert_eq!(kept, b"first");
    }

    #[test]
    fn test_uids_ignores_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let bodies = store(dir.path());
        bodies.write(3, &mut &b"c"[..]).unwrap();
        bodies.write(1, &mut &b"a"[..]).unwrap();
        std::fs::write(dir.path().join("index.db"), b"").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"").unwrap();
        std::fs::write(dir.path().join(".incoming-abc"), b"").unwrap();

        assert_eq!(bodies.uids().unwrap(), vec![1, 3]);
    }
}
