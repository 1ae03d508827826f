//! Sled-based key-value store
//!
//! Each bucket is a separate sled tree in the same database. Sled gives
//! atomic single-key writes and lock-free concurrent reads.

use crate::backend::{Cursor, KeyValueStoreSync, Page};
use bytes::Bytes;
use std::ops::Bound;
use std::path::Path;
use tessera_core::error::{Result, TesseraError};
use tracing::info;

fn store_err(e: sled::Error) -> TesseraError {
    TesseraError::StoreUnavailable(format!("sled: {}", e))
}

/// Sled store scoped to one bucket
pub struct SledStore {
    db: sled::Db,
    tree: sled::Tree,
}

impl SledStore {
    /// Open or create a database at `path` and use the `bucket` tree
    pub fn open<P: AsRef<Path>>(path: P, bucket: &str) -> Result<Self> {
        info!(path = ?path.as_ref(), bucket, "Opening Sled store");
        let db = sled::open(path.as_ref()).map_err(store_err)?;
        Self::with_db(db, bucket)
    }

    /// Open a temporary database (for testing)
    pub fn open_temporary(bucket: &str) -> Result<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(store_err)?;
        Self::with_db(db, bucket)
    }

    fn with_db(db: sled::Db, bucket: &str) -> Result<Self> {
        let tree = db.open_tree(bucket).map_err(store_err)?;
        Ok(Self { db, tree })
    }
}

impl KeyValueStoreSync for SledStore {
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        let value = self.tree.get(key).map_err(store_err)?;
        Ok(value.map(|v| Bytes::copy_from_slice(&v)))
    }

    fn put(&self, key: &[u8], value: Bytes) -> Result<()> {
        self.tree.insert(key, value.as_ref()).map_err(store_err)?;
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<bool> {
        Ok(self.tree.remove(key).map_err(store_err)?.is_some())
    }

    fn list(&self, cursor: Option<Cursor>, limit: usize) -> Result<Page> {
        let limit = limit.max(1);
        let start = match cursor {
            Some(Cursor(after)) => Bound::Excluded(after),
            None => Bound::Unbounded,
        };

        let mut iter = self.tree.range::<Vec<u8>, _>((start, Bound::Unbounded));
        let mut items = Vec::with_capacity(limit);
        for entry in iter.by_ref().take(limit) {
            let (k, v) = entry.map_err(store_err)?;
            items.push((Bytes::copy_from_slice(&k), Bytes::copy_from_slice(&v)));
        }

        let more = iter.next().transpose().map_err(store_err)?.is_some();
        let next = match items.last() {
            Some((last, _)) if more => Some(Cursor(last.to_vec())),
            _ => None,
        };
        Ok(Page { items, next })
    }

    fn flush(&self) -> Result<()> {
        self.db.flush().map_err(store_err)?;
        Ok(())
    }

    fn engine(&self) -> &'static str {
        "sled"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_put_get() {
        let store = SledStore::open_temporary("nodes").unwrap();
        store.put(b"key", Bytes::from_static(b"value")).unwrap();
        assert_eq!(store.get(b"key").unwrap(), Some(Bytes::from_static(b"value")));
        assert!(store.delete(b"key").unwrap());
        assert_eq!(store.get(b"key").unwrap(), None);
    }

    #[test]
    fn test_buckets_are_isolated() {
        let nodes = SledStore::open_temporary("nodes").unwrap();
        let pointers = SledStore::with_db(nodes.db.clone(), "pointers").unwrap();

        nodes.put(b"k", Bytes::from_static(b"node")).unwrap();
        assert_eq!(pointers.get(b"k").unwrap(), None);
        assert!(pointers.list(None, 10).unwrap().items.is_empty());
    }

    #[test]
    fn test_persistence() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("overlay.db");

        {
            let store = SledStore::open(&path, "nodes").unwrap();
            store.put(b"persist", Bytes::from_static(b"me")).unwrap();
            store.flush().unwrap();
        }

        let store = SledStore::open(&path, "nodes").unwrap();
        assert_eq!(store.get(b"persist").unwrap(), Some(Bytes::from_static(b"me")));
    }

    #[test]
    fn test_paged_listing() {
        let store = SledStore::open_temporary("nodes").unwrap();
        for i in 0..7u8 {
            store.put(&[i], Bytes::new()).unwrap();
        }

        let first = store.list(None, 4).unwrap();
        assert_eq!(first.items.len(), 4);
        let second = store.list(first.next, 4).unwrap();
        assert_eq!(second.items.len(), 3);
        assert!(second.is_last());
    }
}
