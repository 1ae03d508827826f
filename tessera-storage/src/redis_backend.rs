//! Redis key-value store
//!
//! Keys are namespaced as `<bucket>:<key>`. Listing walks the keyspace with
//! `SCAN`, so pages may be smaller or larger than the requested limit.

use crate::backend::{Cursor, KeyValueStore, Page};
use bytes::Bytes;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use std::future::Future;
use std::pin::Pin;
use tessera_core::error::{Result, TesseraError};
use tracing::{debug, info};

fn store_err(e: redis::RedisError) -> TesseraError {
    TesseraError::StoreUnavailable(format!("redis: {}", e))
}

/// Redis store scoped to one bucket
#[derive(Clone)]
pub struct RedisStore {
    conn: MultiplexedConnection,
    prefix: Vec<u8>,
}

impl RedisStore {
    /// Connect to `url` (e.g. `redis://127.0.0.1:6379/0`)
    pub async fn connect(url: &str, bucket: &str) -> Result<Self> {
        let client = Client::open(url).map_err(store_err)?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(store_err)?;
        info!(bucket, "Connected to Redis store");
        Ok(Self {
            conn,
            prefix: key_prefix(bucket),
        })
    }

    fn key(&self, key: &[u8]) -> Vec<u8> {
        let mut full = Vec::with_capacity(self.prefix.len() + key.len());
        full.extend_from_slice(&self.prefix);
        full.extend_from_slice(key);
        full
    }

    fn scan_pattern(&self) -> Vec<u8> {
        let mut pattern = escape_glob(&self.prefix);
        pattern.push(b'*');
        pattern
    }

    async fn scan_page(&self, cursor: Option<Cursor>, limit: usize) -> Result<Page> {
        let mut conn = self.conn.clone();
        let position = match cursor {
            Some(Cursor(bytes)) => decode_scan_cursor(&bytes)?,
            None => 0,
        };

        let (next, keys): (u64, Vec<Vec<u8>>) = redis::cmd("SCAN")
            .arg(position)
            .arg("MATCH")
            .arg(self.scan_pattern())
            .arg("COUNT")
            .arg(limit.max(1))
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;

        let mut items = Vec::with_capacity(keys.len());
        if !keys.is_empty() {
            let values: Vec<Option<Vec<u8>>> = redis::cmd("MGET")
                .arg(&keys)
                .query_async(&mut conn)
                .await
                .map_err(store_err)?;

            // A key deleted between SCAN and MGET is simply skipped
            for (key, value) in keys.into_iter().zip(values) {
                if let Some(value) = value {
                    let short = key[self.prefix.len()..].to_vec();
                    items.push((Bytes::from(short), Bytes::from(value)));
                }
            }
        }

        debug!(items = items.len(), cursor = next, "Redis scan page");
        Ok(Page {
            items,
            next: (next != 0).then(|| Cursor(next.to_le_bytes().to_vec())),
        })
    }
}

impl KeyValueStore for RedisStore {
    fn get<'a>(
        &'a self,
        key: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<Option<Bytes>>> + Send + 'a>> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            let value: Option<Vec<u8>> = conn.get(self.key(key)).await.map_err(store_err)?;
            Ok(value.map(Bytes::from))
        })
    }

    fn put<'a>(
        &'a self,
        key: &'a [u8],
        value: Bytes,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            conn.set::<_, _, ()>(self.key(key), value.as_ref())
                .await
                .map_err(store_err)
        })
    }

    fn delete<'a>(
        &'a self,
        key: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            let removed: i64 = conn.del(self.key(key)).await.map_err(store_err)?;
            Ok(removed > 0)
        })
    }

    fn list<'a>(
        &'a self,
        cursor: Option<Cursor>,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Page>> + Send + 'a>> {
        Box::pin(self.scan_page(cursor, limit))
    }

    fn flush<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        // Redis persistence is server-side
        Box::pin(async { Ok(()) })
    }

    fn engine(&self) -> &'static str {
        "redis"
    }
}

fn key_prefix(bucket: &str) -> Vec<u8> {
    let mut prefix = bucket.as_bytes().to_vec();
    prefix.push(b':');
    prefix
}

fn escape_glob(raw: &[u8]) -> Vec<u8> {
    let mut escaped = Vec::with_capacity(raw.len());
    for &b in raw {
        if matches!(b, b'*' | b'?' | b'[' | b']' | b'\\') {
            escaped.push(b'\\');
        }
        escaped.push(b);
    }
    escaped
}

fn decode_scan_cursor(bytes: &[u8]) -> Result<u64> {
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| TesseraError::Internal("malformed redis scan cursor".to_string()))?;
    Ok(u64::from_le_bytes(arr))
}
