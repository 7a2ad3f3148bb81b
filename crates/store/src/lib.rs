//! Blob storage seam for archived blocks and merged bundles.
//!
//! The pipeline only ever talks to [`ObjectStore`]; [`FsStore`] is the
//! directory-backed implementation used in production single-host setups and
//! throughout the test suites.

use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tracing::trace;

/// Errors surfaced by an object store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested key does not exist.
    #[error("object not found: {0}")]
    NotFound(String),
    /// The backing medium failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Blob put/get/list/delete under string keys.
///
/// Whether `put` may replace an existing object is fixed when the store is
/// constructed; a store with overwrite disabled treats a `put` to an existing
/// key as a no-op, which makes repeated uploads of identically named objects
/// idempotent.
pub trait ObjectStore: std::fmt::Debug + Send + Sync {
    /// Writes `data` under `key`.
    fn put(&self, key: &str, data: &[u8]) -> Result<(), StoreError>;

    /// Reads the object stored under `key`.
    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Lists keys starting with `prefix`, sorted lexicographically.
    fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Removes the object stored under `key`.
    fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// An [`ObjectStore`] that keeps each object as a file under a base
/// directory.
#[derive(Debug)]
pub struct FsStore {
    base: PathBuf,
    overwrite: bool,
}

impl FsStore {
    /// Creates the store rooted at `base`, creating the directory if needed.
    pub fn new(base: impl AsRef<Path>, overwrite: bool) -> Result<Self, StoreError> {
        let base = base.as_ref().to_path_buf();
        fs::create_dir_all(&base)?;
        Ok(Self { base, overwrite })
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.base.join(key)
    }
}

impl ObjectStore for FsStore {
    fn put(&self, key: &str, data: &[u8]) -> Result<(), StoreError> {
        let path = self.object_path(key);
        if !self.overwrite && path.exists() {
            trace!(target: "store", %key, "object exists, skipping put");
            return Ok(());
        }

        // Write-then-rename so a concurrent reader never observes a partial
        // object.
        let tmp = self.base.join(format!("{key}.tmp"));
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &path)?;
        trace!(target: "store", %key, bytes = data.len(), "stored object");
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        fs::read(self.object_path(key)).map_err(|err| match err.kind() {
            ErrorKind::NotFound => StoreError::NotFound(key.to_string()),
            _ => StoreError::Io(err),
        })
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.base)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(prefix) {
                keys.push(name);
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.object_path(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(StoreError::NotFound(key.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_list_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path(), true).unwrap();

        store.put("0000000001-a", b"one").unwrap();
        store.put("0000000002-b", b"two").unwrap();

        assert_eq!(store.get("0000000001-a").unwrap(), b"one");
        assert_eq!(
            store.list("").unwrap(),
            vec!["0000000001-a".to_string(), "0000000002-b".to_string()]
        );
        assert_eq!(store.list("0000000002").unwrap(), vec!["0000000002-b".to_string()]);

        store.delete("0000000001-a").unwrap();
        assert!(matches!(store.get("0000000001-a"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn overwrite_disabled_keeps_first_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path(), false).unwrap();

        store.put("key", b"first").unwrap();
        store.put("key", b"second").unwrap();

        assert_eq!(store.get("key").unwrap(), b"first");
    }

    #[test]
    fn overwrite_enabled_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path(), true).unwrap();

        store.put("key", b"first").unwrap();
        store.put("key", b"second").unwrap();

        assert_eq!(store.get("key").unwrap(), b"second");
    }

    #[test]
    fn delete_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStore::new(dir.path(), true).unwrap();

        assert!(matches!(store.delete("nope"), Err(StoreError::NotFound(_))));
    }
}
