//! Key-value store trait
//!
//! Defines the interface that every database engine must follow. Keys and
//! values are raw bytes; typed stores layer their own encoding on top.

use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;
use tessera_core::error::Result;

/// Position in a listing, returned by one `list` call and passed to the next
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor(pub Vec<u8>);

/// One page of a listing
#[derive(Debug, Clone, Default)]
pub struct Page {
    /// Key/value pairs in this page (order unspecified across engines)
    pub items: Vec<(Bytes, Bytes)>,

    /// Cursor for the next page; `None` once the listing is exhausted
    pub next: Option<Cursor>,
}

impl Page {
    pub fn is_last(&self) -> bool {
        self.next.is_none()
    }
}

/// Async key-value store
///
/// All engines must be Send + Sync; a single `put` is atomic per key and
/// concurrent get/put/list are allowed.
pub trait KeyValueStore: Send + Sync {
    /// Retrieve a value
    fn get<'a>(
        &'a self,
        key: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<Option<Bytes>>> + Send + 'a>>;

    /// Store a value, replacing any previous one
    fn put<'a>(
        &'a self,
        key: &'a [u8],
        value: Bytes,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    /// Delete a value; returns whether it existed
    fn delete<'a>(&'a self, key: &'a [u8])
        -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>>;

    /// List up to `limit` entries starting after `cursor`
    fn list<'a>(
        &'a self,
        cursor: Option<Cursor>,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Page>> + Send + 'a>>;

    /// Flush any pending writes to disk
    fn flush<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    /// Engine name for logs
    fn engine(&self) -> &'static str;
}

/// Synchronous key-value store (for embedded engines)
pub trait KeyValueStoreSync: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>>;

    fn put(&self, key: &[u8], value: Bytes) -> Result<()>;

    fn delete(&self, key: &[u8]) -> Result<bool>;

    fn list(&self, cursor: Option<Cursor>, limit: usize) -> Result<Page>;

    fn flush(&self) -> Result<()>;

    fn engine(&self) -> &'static str;
}

/// Wrapper to convert a sync store to async
pub struct AsyncWrapper<T: KeyValueStoreSync>(pub T);

impl<T: KeyValueStoreSync + 'static> KeyValueStore for AsyncWrapper<T> {
    fn get<'a>(
        &'a self,
        key: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<Option<Bytes>>> + Send + 'a>> {
        Box::pin(async move { self.0.get(key) })
    }

    fn put<'a>(
        &'a self,
        key: &'a [u8],
        value: Bytes,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move { self.0.put(key, value) })
    }

    fn delete<'a>(
        &'a self,
        key: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>> {
        Box::pin(async move { self.0.delete(key) })
    }

    fn list<'a>(
        &'a self,
        cursor: Option<Cursor>,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Page>> + Send + 'a>> {
        Box::pin(async move { self.0.list(cursor, limit) })
    }

    fn flush<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move { self.0.flush() })
    }

    fn engine(&self) -> &'static str {
        self.0.engine()
    }
}
