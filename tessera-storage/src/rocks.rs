//! RocksDB key-value store
//!
//! Each bucket is its own column family, created on first open.

use crate::backend::{Cursor, KeyValueStoreSync, Page};
use bytes::Bytes;
use rocksdb::{BlockBasedOptions, Cache, Direction, IteratorMode, Options, WriteOptions, DB};
use std::path::Path;
use std::sync::Arc;
use tessera_core::error::{Result, TesseraError};
use tracing::{debug, info};

fn store_err(e: rocksdb::Error) -> TesseraError {
    TesseraError::StoreUnavailable(format!("rocksdb: {}", e))
}

/// RocksDB store scoped to one bucket
pub struct RocksDbStore {
    db: Arc<DB>,
    bucket: String,
}

impl RocksDbStore {
    /// Open or create a database at `path` and use the `bucket` column family
    pub fn open<P: AsRef<Path>>(path: P, bucket: &str) -> Result<Self> {
        let path = path.as_ref();
        info!(path = ?path, bucket, "Opening RocksDB store");

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_max_open_files(512);
        opts.set_keep_log_file_num(10);

        // Records are small; a modest block cache keeps hot nodes in memory
        let cache = Cache::new_lru_cache(64 * 1024 * 1024);
        let mut block_opts = BlockBasedOptions::default();
        block_opts.set_block_cache(&cache);
        block_opts.set_cache_index_and_filter_blocks(true);
        opts.set_block_based_table_factory(&block_opts);

        std::fs::create_dir_all(path).map_err(|e| {
            TesseraError::StoreUnavailable(format!("failed to create {:?}: {}", path, e))
        })?;

        let mut families = DB::list_cf(&opts, path).unwrap_or_default();
        if families.is_empty() {
            families.push(rocksdb::DEFAULT_COLUMN_FAMILY_NAME.to_string());
        }
        if !families.iter().any(|f| f == bucket) {
            families.push(bucket.to_string());
        }

        let db = DB::open_cf(&opts, path, &families).map_err(store_err)?;

        Ok(Self {
            db: Arc::new(db),
            bucket: bucket.to_string(),
        })
    }

    fn cf(&self) -> Result<Arc<rocksdb::BoundColumnFamily<'_>>> {
        self.db.cf_handle(&self.bucket).ok_or_else(|| {
            TesseraError::StoreUnavailable(format!("missing column family {}", self.bucket))
        })
    }
}

impl KeyValueStoreSync for RocksDbStore {
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        let value = self.db.get_cf(&self.cf()?, key).map_err(store_err)?;
        Ok(value.map(Bytes::from))
    }

    fn put(&self, key: &[u8], value: Bytes) -> Result<()> {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(false);
        self.db
            .put_cf_opt(&self.cf()?, key, &value, &write_opts)
            .map_err(store_err)
    }

    fn delete(&self, key: &[u8]) -> Result<bool> {
        let cf = self.cf()?;
        if self.db.get_pinned_cf(&cf, key).map_err(store_err)?.is_none() {
            return Ok(false);
        }
        self.db.delete_cf(&cf, key).map_err(store_err)?;
        Ok(true)
    }

    fn list(&self, cursor: Option<Cursor>, limit: usize) -> Result<Page> {
        let limit = limit.max(1);
        let cf = self.cf()?;
        let mode = match &cursor {
            Some(Cursor(after)) => IteratorMode::From(after.as_slice(), Direction::Forward),
            None => IteratorMode::Start,
        };

        let mut items = Vec::with_capacity(limit);
        let mut more = false;
        for entry in self.db.iterator_cf(&cf, mode) {
            let (key, value) = entry.map_err(store_err)?;
            if matches!(&cursor, Some(Cursor(after)) if after.as_slice() == &*key) {
                continue;
            }
            if items.len() == limit {
                more = true;
                break;
            }
            items.push((Bytes::from(key.into_vec()), Bytes::from(value.into_vec())));
        }

        let next = match items.last() {
            Some((last, _)) if more => Some(Cursor(last.to_vec())),
            _ => None,
        };
        Ok(Page { items, next })
    }

    fn flush(&self) -> Result<()> {
        self.db.flush_cf(&self.cf()?).map_err(store_err)?;
        debug!(bucket = %self.bucket, "Flushed store to disk");
        Ok(())
    }

    fn engine(&self) -> &'static str {
        "rocksdb"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_put_get_delete() {
        let temp_dir = TempDir::new().unwrap();
        let store = RocksDbStore::open(temp_dir.path(), "nodes").unwrap();

        store.put(b"key", Bytes::from_static(b"value")).unwrap();
        assert_eq!(store.get(b"key").unwrap(), Some(Bytes::from_static(b"value")));
        assert!(store.delete(b"key").unwrap());
        assert!(!store.delete(b"key").unwrap());
    }

    #[test]
    fn test_persistence_across_reopen() {
        let temp_dir = TempDir::new().unwrap();

        {
            let store = RocksDbStore::open(temp_dir.path(), "nodes").unwrap();
            store.put(b"persist", Bytes::from_static(b"me")).unwrap();
            store.flush().unwrap();
        }

        let store = RocksDbStore::open(temp_dir.path(), "nodes").unwrap();
        assert_eq!(store.get(b"persist").unwrap(), Some(Bytes::from_static(b"me")));
    }

    #[test]
    fn test_buckets_are_isolated() {
        let temp_dir = TempDir::new().unwrap();
        {
            let nodes = RocksDbStore::open(temp_dir.path(), "nodes").unwrap();
            nodes.put(b"k", Bytes::from_static(b"v")).unwrap();
            nodes.flush().unwrap();
        }

        // Reopening with another bucket adds its column family
        let pointers = RocksDbStore::open(temp_dir.path(), "pointers").unwrap();
        assert_eq!(pointers.get(b"k").unwrap(), None);
        assert!(pointers.list(None, 10).unwrap().items.is_empty());
    }

    #[test]
    fn test_paged_listing() {
        let temp_dir = TempDir::new().unwrap();
        let store = RocksDbStore::open(temp_dir.path(), "nodes").unwrap();
        for i in 0..10u8 {
            store.put(&[i], Bytes::from(vec![i; 16])).unwrap();
        }

        let mut seen = 0;
        let mut cursor = None;
        loop {
            let page = store.list(cursor, 4).unwrap();
            seen += page.items.len();
            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        assert_eq!(seen, 10);
    }
}
