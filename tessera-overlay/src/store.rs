//! Persistent reputation records
//!
//! Typed view over a key-value engine: one bincode-encoded [`NodeRecord`] per
//! node, keyed by the raw node ID bytes.

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt, TryStreamExt};
use std::sync::Arc;
use tessera_core::error::{Result, TesseraError};
use tessera_core::node::{NodeId, NodeRecord};
use tessera_storage::{open_store, Cursor, KeyValueStore, DEFAULT_PAGE_SIZE};
use tracing::debug;

/// Bucket holding node records
pub const NODES_BUCKET: &str = "nodes";

/// Node records keyed by node ID
pub struct ReputationStore {
    kv: Arc<dyn KeyValueStore>,
    page_size: usize,
}

impl ReputationStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Open the engine named by `database_url`
    pub async fn open(database_url: &str) -> Result<Self> {
        Ok(Self::new(open_store(database_url, NODES_BUCKET).await?))
    }

    /// Records fetched per page while iterating
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn engine(&self) -> &'static str {
        self.kv.engine()
    }

    /// Fetch a record; `NotFound` if the node is unknown
    pub async fn get(&self, id: &NodeId) -> Result<NodeRecord> {
        self.try_get(id)
            .await?
            .ok_or_else(|| TesseraError::NotFound(format!("node {}", id)))
    }

    pub async fn try_get(&self, id: &NodeId) -> Result<Option<NodeRecord>> {
        match self.kv.get(id.as_bytes()).await? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Insert or replace a record
    pub async fn put(&self, id: &NodeId, record: &NodeRecord) -> Result<()> {
        let encoded = bincode::serialize(record)?;
        self.kv.put(id.as_bytes(), Bytes::from(encoded)).await?;
        debug!(node = %id, "Stored node record");
        Ok(())
    }

    /// Remove a record; returns whether it existed
    pub async fn delete(&self, id: &NodeId) -> Result<bool> {
        self.kv.delete(id.as_bytes()).await
    }

    /// Lazily stream every record.
    ///
    /// Pages are pulled from the engine on demand. Each call starts a fresh
    /// walk, so an iteration can be restarted by calling this again.
    pub fn iterate(&self) -> impl Stream<Item = Result<NodeRecord>> + Send + '_ {
        stream::try_unfold(Some(None), move |state: Option<Option<Cursor>>| async move {
            let Some(cursor) = state else {
                return Ok::<_, TesseraError>(None);
            };
            let (records, next) = self.fetch_page(cursor).await?;
            Ok(Some((records, next.map(Some))))
        })
        .map_ok(|records: Vec<NodeRecord>| stream::iter(records.into_iter().map(Ok)))
        .try_flatten()
        .boxed()
    }

    async fn fetch_page(&self, cursor: Option<Cursor>) -> Result<(Vec<NodeRecord>, Option<Cursor>)> {
        let page = self.kv.list(cursor, self.page_size).await?;
        let records = page
            .items
            .iter()
            .map(|(_, value)| Ok(bincode::deserialize::<NodeRecord>(value)?))
            .collect::<Result<Vec<_>>>()?;
        Ok((records, page.next))
    }

    pub async fn flush(&self) -> Result<()> {
        self.kv.flush().await
    }

    /// Collect every record
    pub async fn all(&self) -> Result<Vec<NodeRecord>> {
        self.iterate().try_collect().await
    }
}
