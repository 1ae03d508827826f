//! Segment pointers and stream metadata
//!
//! A committed segment is described by a [`Segment`]: either its encrypted
//! bytes inline, or the placement of its pieces. A stream's segments and its
//! [`StreamMeta`] live in the pointer database.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tessera_core::encryption::{Cipher, PathCipher};
use tessera_core::error::{Result, TesseraError};
use tessera_core::node::NodeId;
use tessera_core::piece::{ContentHash, PieceId};
use tessera_core::redundancy::RedundancyParams;
use tessera_storage::{open_store, Cursor, KeyValueStore, DEFAULT_PAGE_SIZE};
use tracing::debug;
use uuid::Uuid;

/// Bucket holding stream metadata and segment pointers
pub const POINTERS_BUCKET: &str = "pointers";

const META_PREFIX: &[u8] = b"path/";
const SEGMENT_PREFIX: &[u8] = b"seg/";

/// One uploaded piece: which node holds which share
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PieceAssignment {
    pub node_id: NodeId,
    pub piece_index: u16,
    pub hash: ContentHash,
}

/// Placement of an erasure-coded segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteSegment {
    /// Redundancy the segment was encoded with
    pub params: RedundancyParams,
    /// Piece IDs are derived from this root and the piece index
    pub root_piece_id: PieceId,
    /// Ciphertext length before erasure coding
    pub encrypted_size: u64,
    /// Successfully uploaded pieces, ordered by piece index
    pub pieces: Vec<PieceAssignment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SegmentContent {
    /// Encrypted bytes stored with the pointer
    Inline(Bytes),
    Remote(RemoteSegment),
}

/// A committed segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub index: u64,
    /// Plaintext size
    pub size: u64,
    /// Block index of the first encrypted block
    pub first_block: u64,
    pub content: SegmentContent,
}

impl Segment {
    pub fn is_inline(&self) -> bool {
        matches!(self.content, SegmentContent::Inline(_))
    }

    pub fn remote(&self) -> Option<&RemoteSegment> {
        match &self.content {
            SegmentContent::Remote(remote) => Some(remote),
            SegmentContent::Inline(_) => None,
        }
    }
}

/// Metadata of one stored stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamMeta {
    pub stream_id: Uuid,
    /// Path as stored (encrypted unless the path cipher is `Unencrypted`)
    pub encrypted_path: String,
    pub path_cipher: PathCipher,
    pub cipher: Cipher,
    pub block_size: usize,
    pub segment_size: u64,
    /// Segments committed so far; all have indexes below this
    pub segment_count: u64,
    /// Plaintext bytes across committed segments
    pub total_size: u64,
    /// Every segment of the stream is committed
    pub complete: bool,
    pub created_at: DateTime<Utc>,
}

impl StreamMeta {
    /// Size a committed segment must have, given the committed total
    pub fn expected_segment_size(&self, index: u64) -> Option<u64> {
        if index >= self.segment_count {
            return None;
        }
        let before = index * self.segment_size;
        Some((self.total_size - before).min(self.segment_size))
    }
}

/// Plaintext sizes of the segments a stream of `total` bytes is cut into
pub fn segment_sizes(total: u64, segment_size: u64) -> Vec<u64> {
    if segment_size == 0 {
        return Vec::new();
    }
    let full = total / segment_size;
    let mut sizes = vec![segment_size; full as usize];
    if total % segment_size != 0 {
        sizes.push(total % segment_size);
    }
    sizes
}

fn meta_key(encrypted_path: &str) -> Vec<u8> {
    let mut key = META_PREFIX.to_vec();
    key.extend_from_slice(encrypted_path.as_bytes());
    key
}

fn segment_key(stream_id: &Uuid, index: u64) -> Vec<u8> {
    let mut key = SEGMENT_PREFIX.to_vec();
    key.extend_from_slice(stream_id.as_bytes());
    key.extend_from_slice(&index.to_be_bytes());
    key
}

/// Typed view over the pointer database
pub struct PointerStore {
    kv: Arc<dyn KeyValueStore>,
}

impl PointerStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Open the engine named by `database_url`
    pub async fn open(database_url: &str) -> Result<Self> {
        Ok(Self::new(open_store(database_url, POINTERS_BUCKET).await?))
    }

    pub async fn put_meta(&self, meta: &StreamMeta) -> Result<()> {
        let encoded = bincode::serialize(meta)?;
        self.kv
            .put(&meta_key(&meta.encrypted_path), Bytes::from(encoded))
            .await
    }

    pub async fn get_meta(&self, encrypted_path: &str) -> Result<Option<StreamMeta>> {
        match self.kv.get(&meta_key(encrypted_path)).await? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn delete_meta(&self, encrypted_path: &str) -> Result<bool> {
        self.kv.delete(&meta_key(encrypted_path)).await
    }

    /// Every stream's metadata
    pub async fn list_meta(&self) -> Result<Vec<StreamMeta>> {
        let mut metas = Vec::new();
        let mut cursor: Option<Cursor> = None;
        loop {
            let page = self.kv.list(cursor, DEFAULT_PAGE_SIZE).await?;
            for (key, value) in &page.items {
                if key.starts_with(META_PREFIX) {
                    metas.push(bincode::deserialize(value)?);
                }
            }
            match page.next {
                Some(next) => cursor = Some(next),
                None => return Ok(metas),
            }
        }
    }

    pub async fn put_segment(&self, stream_id: &Uuid, segment: &Segment) -> Result<()> {
        let encoded = bincode::serialize(segment)?;
        self.kv
            .put(&segment_key(stream_id, segment.index), Bytes::from(encoded))
            .await?;
        debug!(stream = %stream_id, index = segment.index, inline = segment.is_inline(), "Committed segment");
        Ok(())
    }

    /// Committed segment; `NotFound` if absent
    pub async fn get_segment(&self, stream_id: &Uuid, index: u64) -> Result<Segment> {
        let bytes = self
            .kv
            .get(&segment_key(stream_id, index))
            .await?
            .ok_or_else(|| {
                TesseraError::NotFound(format!("segment {} of stream {}", index, stream_id))
            })?;
        Ok(bincode::deserialize(&bytes)?)
    }

    pub async fn try_get_segment(&self, stream_id: &Uuid, index: u64) -> Result<Option<Segment>> {
        match self.get_segment(stream_id, index).await {
            Ok(segment) => Ok(Some(segment)),
            Err(TesseraError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn delete_segment(&self, stream_id: &Uuid, index: u64) -> Result<bool> {
        self.kv.delete(&segment_key(stream_id, index)).await
    }

    pub async fn flush(&self) -> Result<()> {
        self.kv.flush().await
    }
}
