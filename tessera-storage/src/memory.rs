//! In-memory key-value store
//!
//! Used for testing and development. Not persistent.

use crate::backend::{Cursor, KeyValueStoreSync, Page};
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;
use tessera_core::error::Result;

/// Ordered in-memory store
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<Vec<u8>, Bytes>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Remove every entry
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

impl KeyValueStoreSync for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: Bytes) -> Result<()> {
        self.entries.write().insert(key.to_vec(), value);
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<bool> {
        Ok(self.entries.write().remove(key).is_some())
    }

    fn list(&self, cursor: Option<Cursor>, limit: usize) -> Result<Page> {
        let limit = limit.max(1);
        let entries = self.entries.read();
        let start = match &cursor {
            Some(Cursor(after)) => Bound::Excluded(after.clone()),
            None => Bound::Unbounded,
        };

        let mut range = entries.range((start, Bound::Unbounded));
        let items: Vec<(Bytes, Bytes)> = range
            .by_ref()
            .take(limit)
            .map(|(k, v)| (Bytes::copy_from_slice(k), v.clone()))
            .collect();

        let next = match (range.next(), items.last()) {
            (Some(_), Some((last, _))) => Some(Cursor(last.to_vec())),
            _ => None,
        };
        Ok(Page { items, next })
    }

    fn flush(&self) -> Result<()> {
        // No-op for in-memory storage
        Ok(())
    }

    fn engine(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_delete() {
        let store = MemoryStore::new();
        store.put(b"a", Bytes::from_static(b"1")).unwrap();
        assert_eq!(store.get(b"a").unwrap(), Some(Bytes::from_static(b"1")));

        store.put(b"a", Bytes::from_static(b"2")).unwrap();
        assert_eq!(store.get(b"a").unwrap(), Some(Bytes::from_static(b"2")));

        assert!(store.delete(b"a").unwrap());
        assert!(!store.delete(b"a").unwrap());
        assert_eq!(store.get(b"a").unwrap(), None);
    }

    #[test]
    fn test_paged_listing() {
        let store = MemoryStore::new();
        for i in 0..10u8 {
            store.put(&[i], Bytes::from(vec![i])).unwrap();
        }

        let mut seen = Vec::new();
        let mut cursor = None;
        loop {
            let page = store.list(cursor, 3).unwrap();
            assert!(page.items.len() <= 3);
            seen.extend(page.items.iter().map(|(k, _)| k[0]));
            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        assert_eq!(seen, (0..10).collect::<Vec<u8>>());
    }

    #[test]
    fn test_exact_page_has_no_next() {
        let store = MemoryStore::new();
        store.put(b"x", Bytes::new()).unwrap();
        store.put(b"y", Bytes::new()).unwrap();

        let page = store.list(None, 2).unwrap();
        assert_eq!(page.items.len(), 2);
        assert!(page.is_last());
    }

    #[test]
    fn test_empty_listing() {
        let store = MemoryStore::new();
        let page = store.list(None, 10).unwrap();
        assert!(page.items.is_empty());
        assert!(page.is_last());
    }
}
