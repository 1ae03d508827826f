//! Tessera Storage Engines
//!
//! Provides the key-value abstraction behind the reputation and pointer
//! databases:
//! - `KeyValueStore` trait for pluggable engines
//! - `MemoryStore` for testing
//! - `SledStore` and `RocksDbStore` for embedded persistent storage
//! - `RedisStore` for a shared networked database
//!
//! Engines are chosen at startup from a `scheme://location` URL.

pub mod backend;
pub mod memory;
pub mod redis_backend;
pub mod rocks;
pub mod sled_backend;

pub use backend::{AsyncWrapper, Cursor, KeyValueStore, KeyValueStoreSync, Page};
pub use memory::MemoryStore;
pub use redis_backend::RedisStore;
pub use rocks::RocksDbStore;
pub use sled_backend::SledStore;

use std::sync::Arc;
use tessera_core::config::{DatabaseUrl, StoreScheme};
use tessera_core::error::Result;
use tracing::info;

/// Default page size used by typed stores when walking a bucket
pub const DEFAULT_PAGE_SIZE: usize = 256;

/// Open the engine named by `url`, scoped to `bucket`.
///
/// Fails with `UnsupportedStoreScheme` for an unknown scheme and
/// `InvalidConfiguration` for a URL without `://`.
pub async fn open_store(url: &str, bucket: &str) -> Result<Arc<dyn KeyValueStore>> {
    let url = DatabaseUrl::parse(url)?;
    info!(scheme = ?url.scheme, location = %url.location, bucket, "Opening key-value store");

    let store: Arc<dyn KeyValueStore> = match url.scheme {
        StoreScheme::Memory => Arc::new(AsyncWrapper(MemoryStore::new())),
        StoreScheme::Sled if url.location.is_empty() => {
            Arc::new(AsyncWrapper(SledStore::open_temporary(bucket)?))
        }
        StoreScheme::Sled => Arc::new(AsyncWrapper(SledStore::open(&url.location, bucket)?)),
        StoreScheme::RocksDb => Arc::new(AsyncWrapper(RocksDbStore::open(&url.location, bucket)?)),
        StoreScheme::Redis => Arc::new(RedisStore::connect(&url.raw, bucket).await?),
    };
    Ok(store)
}
