//! Stream pipeline
//!
//! Cuts an object into fixed-size segments and drives them through the
//! segment pipeline with bounded pipelining. Segments are committed strictly
//! in index order; the stream's metadata is rewritten after every commit so
//! that committed segments are readable even if the upload later fails.
//!
//! Replacing a stream is different: the old stream stays at its path until
//! the new one is complete, and a failed replacement leaves it untouched.

use crate::pointer::{PointerStore, Segment, StreamMeta};
use crate::segment::SegmentPipeline;
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use tessera_core::config::Config;
use tessera_core::encryption::{decrypt_path, encrypt_path, EncryptionScheme, Key, PathCipher};
use tessera_core::error::{Result, TesseraError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Listing entry for a stored stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub path: String,
    pub size: u64,
    pub segments: u64,
    pub complete: bool,
}

/// Stores and retrieves whole objects
pub struct StreamPipeline {
    segments: Arc<SegmentPipeline>,
    pointers: Arc<PointerStore>,
    root_key: Key,
    path_cipher: PathCipher,
    segment_size: u64,
    pipeline_depth: usize,
}

/// Segment upload running on its own task.
///
/// Dropping it before completion cancels the upload, so the segment
/// pipeline removes what it placed. A segment that finished anyway has its
/// pieces deleted in the background.
struct UploadTask {
    handle: Option<JoinHandle<Result<Segment>>>,
    cancel: CancellationToken,
    segments: Arc<SegmentPipeline>,
}

impl UploadTask {
    fn spawn(
        segments: Arc<SegmentPipeline>,
        index: u64,
        data: Bytes,
        key: Key,
        first_block: u64,
        cancel: CancellationToken,
    ) -> Self {
        let handle = {
            let segments = Arc::clone(&segments);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                segments
                    .write(index, data, &key, first_block, &cancel)
                    .await
            })
        };
        Self {
            handle: Some(handle),
            cancel,
            segments,
        }
    }
}

impl Future for UploadTask {
    type Output = Result<Segment>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let Some(handle) = self.handle.as_mut() else {
            return Poll::Ready(Err(TesseraError::Internal(
                "segment task polled after completion".to_string(),
            )));
        };
        let joined = ready!(Pin::new(handle).poll(cx));
        self.handle = None;
        Poll::Ready(match joined {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(TesseraError::Cancelled),
            Err(e) => Err(TesseraError::Internal(format!("segment task failed: {}", e))),
        })
    }
}

impl Drop for UploadTask {
    fn drop(&mut self) {
        self.cancel.cancel();
        let Some(handle) = self.handle.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let segments = Arc::clone(&self.segments);
        runtime.spawn(async move {
            if let Ok(Ok(segment)) = handle.await {
                let deleted = segments.delete(&segment).await;
                debug!(index = segment.index, deleted, "Removed pieces of a dropped upload");
            }
        });
    }
}

/// State of one `put` in progress
struct Upload {
    meta: StreamMeta,
    key: Key,
    in_flight: VecDeque<UploadTask>,
    /// Parent of every segment upload's token
    uploads: CancellationToken,
    /// Write progress to the path as segments commit
    publish: bool,
}

impl StreamPipeline {
    pub fn new(
        segments: Arc<SegmentPipeline>,
        pointers: Arc<PointerStore>,
        root_key: Key,
        path_cipher: PathCipher,
    ) -> Self {
        Self {
            segments,
            pointers,
            root_key,
            path_cipher,
            segment_size: tessera_core::DEFAULT_SEGMENT_SIZE,
            pipeline_depth: 2,
        }
    }

    /// Build from validated configuration
    pub fn from_config(
        config: &Config,
        segments: Arc<SegmentPipeline>,
        pointers: Arc<PointerStore>,
    ) -> Self {
        Self::new(
            segments,
            pointers,
            config.root_key(),
            config.encryption.path_type,
        )
        .with_segment_size(config.client.segment_size)
        .with_pipeline_depth(config.client.pipeline_depth)
    }

    pub fn with_segment_size(mut self, segment_size: u64) -> Self {
        self.segment_size = segment_size.max(1);
        self
    }

    /// Segments in flight at once during put and get
    pub fn with_pipeline_depth(mut self, depth: usize) -> Self {
        self.pipeline_depth = depth.max(1);
        self
    }

    pub fn pointers(&self) -> &Arc<PointerStore> {
        &self.pointers
    }

    /// Blocks reserved per segment, so block indexes never repeat in a stream
    fn blocks_per_segment(&self) -> u64 {
        self.segments
            .encryption()
            .block_count(self.segment_size as usize)
    }

    fn content_key(&self, path: &str, stream_id: &Uuid) -> Key {
        self.root_key.derive_content_key(path, stream_id.as_bytes())
    }

    /// Store everything `reader` yields under `path`, replacing any stream
    /// already stored there.
    ///
    /// A stream being replaced is removed only once its replacement is
    /// complete. Until then readers of `path` see the old stream, and if the
    /// upload fails the new stream's committed segments are deleted instead.
    #[instrument(skip(self, reader, cancel))]
    pub async fn put<R>(&self, path: &str, mut reader: R, cancel: &CancellationToken) -> Result<StreamMeta>
    where
        R: AsyncRead + Unpin + Send,
    {
        let encrypted_path = encrypt_path(path, self.path_cipher, &self.root_key)?;
        let previous = self.pointers.get_meta(&encrypted_path).await?;
        if let Some(previous) = &previous {
            debug!(stream = %previous.stream_id, "Replacing existing stream");
        }
        // Progress is published only when no older stream would be hidden by it
        let publish = previous.is_none();

        let encryption = *self.segments.encryption();
        let meta = StreamMeta {
            stream_id: Uuid::new_v4(),
            encrypted_path,
            path_cipher: self.path_cipher,
            cipher: encryption.cipher(),
            block_size: encryption.block_size(),
            segment_size: self.segment_size,
            segment_count: 0,
            total_size: 0,
            complete: false,
            created_at: Utc::now(),
        };
        if publish {
            self.pointers.put_meta(&meta).await?;
        }

        let mut upload = Upload {
            key: self.content_key(path, &meta.stream_id),
            meta,
            in_flight: VecDeque::with_capacity(self.pipeline_depth),
            uploads: cancel.child_token(),
            publish,
        };

        if let Err(e) = self.upload_segments(&mut reader, &mut upload, cancel).await {
            upload.uploads.cancel();
            self.abandon(std::mem::take(&mut upload.in_flight)).await;
            if !publish {
                if let Err(cleanup) = self.delete_segments(&upload.meta).await {
                    warn!(
                        stream = %upload.meta.stream_id,
                        error = %cleanup,
                        "Failed to remove partial replacement"
                    );
                }
            }
            warn!(
                stream = %upload.meta.stream_id,
                committed = upload.meta.segment_count,
                error = %e,
                "Stream upload failed"
            );
            return Err(e);
        }

        let mut meta = upload.meta;
        meta.complete = true;
        self.pointers.put_meta(&meta).await?;
        if let Some(previous) = previous {
            match self.delete_segments(&previous).await {
                Ok(pieces) => debug!(stream = %previous.stream_id, pieces, "Replaced stream removed"),
                Err(e) => warn!(
                    stream = %previous.stream_id,
                    error = %e,
                    "Failed to remove replaced stream"
                ),
            }
        }
        info!(
            stream = %meta.stream_id,
            segments = meta.segment_count,
            size = meta.total_size,
            "Stream stored"
        );
        Ok(meta)
    }

    async fn upload_segments<R>(
        &self,
        reader: &mut R,
        upload: &mut Upload,
        cancel: &CancellationToken,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin + Send,
    {
        let blocks_per_segment = self.blocks_per_segment();
        let mut index = 0u64;

        loop {
            let data = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TesseraError::Cancelled),
                data = read_segment(reader, self.segment_size as usize) => data?,
            };
            if data.is_empty() {
                break;
            }
            let last = (data.len() as u64) < self.segment_size;

            upload.in_flight.push_back(UploadTask::spawn(
                Arc::clone(&self.segments),
                index,
                data,
                upload.key.clone(),
                index * blocks_per_segment,
                upload.uploads.child_token(),
            ));
            index += 1;

            while upload.in_flight.len() >= self.pipeline_depth {
                self.commit_next(upload, cancel).await?;
            }
            if last {
                break;
            }
        }

        while !upload.in_flight.is_empty() {
            self.commit_next(upload, cancel).await?;
        }
        Ok(())
    }

    /// Let cancelled uploads clean up after themselves, and remove pieces
    /// of any that finished before noticing
    async fn abandon(&self, in_flight: VecDeque<UploadTask>) {
        for task in in_flight {
            if let Ok(segment) = task.await {
                self.segments.delete(&segment).await;
            }
        }
    }

    async fn commit_next(&self, upload: &mut Upload, cancel: &CancellationToken) -> Result<()> {
        let Some(mut task) = upload.in_flight.pop_front() else {
            return Ok(());
        };
        let segment = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                upload.in_flight.push_front(task);
                return Err(TesseraError::Cancelled);
            }
            segment = &mut task => segment?,
        };

        let meta = &mut upload.meta;
        self.pointers.put_segment(&meta.stream_id, &segment).await?;
        meta.segment_count = segment.index + 1;
        meta.total_size += segment.size;
        if upload.publish {
            self.pointers.put_meta(meta).await?;
        }
        Ok(())
    }

    /// Write the stream stored at `path` to `writer`; returns bytes written
    #[instrument(skip(self, writer, cancel))]
    pub async fn get<W>(&self, path: &str, mut writer: W, cancel: &CancellationToken) -> Result<u64>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let meta = self.stat(path).await?;
        if !meta.complete {
            warn!(
                stream = %meta.stream_id,
                committed = meta.segment_count,
                "Reading an incomplete stream"
            );
        }

        let key = self.content_key(path, &meta.stream_id);
        let encryption = EncryptionScheme::from_parts(meta.cipher, meta.block_size)?;
        let mut segments = stream::iter(0..meta.segment_count)
            .map(|index| self.fetch_segment(&meta, index, &key, &encryption, cancel))
            .buffered(self.pipeline_depth);

        let mut written = 0u64;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TesseraError::Cancelled),
                next = segments.next() => next,
            };
            let Some(data) = next else {
                break;
            };
            let data = data?;
            writer.write_all(&data).await?;
            written += data.len() as u64;
        }
        writer.flush().await?;

        debug!(stream = %meta.stream_id, written, "Stream read");
        Ok(written)
    }

    /// Read a whole stream into memory
    pub async fn get_bytes(&self, path: &str, cancel: &CancellationToken) -> Result<Bytes> {
        let mut buffer = Vec::new();
        self.get(path, &mut buffer, cancel).await?;
        Ok(Bytes::from(buffer))
    }

    async fn fetch_segment(
        &self,
        meta: &StreamMeta,
        index: u64,
        key: &Key,
        encryption: &EncryptionScheme,
        cancel: &CancellationToken,
    ) -> Result<Bytes> {
        let segment = self.pointers.get_segment(&meta.stream_id, index).await?;
        if Some(segment.size) != meta.expected_segment_size(index) {
            return Err(TesseraError::Internal(format!(
                "segment {} of stream {} has size {}, expected {:?}",
                index,
                meta.stream_id,
                segment.size,
                meta.expected_segment_size(index)
            )));
        }
        self.segments.read(&segment, key, encryption, cancel).await
    }

    /// Metadata of the stream at `path`; `NotFound` if none
    pub async fn stat(&self, path: &str) -> Result<StreamMeta> {
        let encrypted_path = encrypt_path(path, self.path_cipher, &self.root_key)?;
        self.pointers
            .get_meta(&encrypted_path)
            .await?
            .ok_or_else(|| TesseraError::NotFound(format!("stream {}", path)))
    }

    /// Delete the stream at `path`; returns whether one existed
    #[instrument(skip(self))]
    pub async fn delete(&self, path: &str) -> Result<bool> {
        let encrypted_path = encrypt_path(path, self.path_cipher, &self.root_key)?;
        match self.pointers.get_meta(&encrypted_path).await? {
            Some(meta) => {
                self.delete_stream(&meta).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Segments first, then metadata
    async fn delete_stream(&self, meta: &StreamMeta) -> Result<()> {
        let pieces = self.delete_segments(meta).await?;
        self.pointers.delete_meta(&meta.encrypted_path).await?;

        debug!(stream = %meta.stream_id, pieces, "Stream deleted");
        Ok(())
    }

    /// Delete a stream's pieces, then its segment pointers; returns pieces deleted
    async fn delete_segments(&self, meta: &StreamMeta) -> Result<usize> {
        let mut pieces = 0;
        for index in 0..meta.segment_count {
            if let Some(segment) = self.pointers.try_get_segment(&meta.stream_id, index).await? {
                pieces += self.segments.delete(&segment).await;
            }
        }
        // The segment after the last commit may have been written before a failure
        for index in 0..=meta.segment_count {
            self.pointers.delete_segment(&meta.stream_id, index).await?;
        }
        Ok(pieces)
    }

    /// Streams whose plaintext path starts with `prefix`, sorted by path
    pub async fn list(&self, prefix: &str) -> Result<Vec<StreamInfo>> {
        let mut infos = Vec::new();
        for meta in self.pointers.list_meta().await? {
            let path = match decrypt_path(&meta.encrypted_path, meta.path_cipher, &self.root_key) {
                Ok(path) => path,
                Err(e) => {
                    debug!(stream = %meta.stream_id, error = %e, "Skipping undecryptable path");
                    continue;
                }
            };
            if path.starts_with(prefix) {
                infos.push(StreamInfo {
                    path,
                    size: meta.total_size,
                    segments: meta.segment_count,
                    complete: meta.complete,
                });
            }
        }
        infos.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(infos)
    }
}

/// Fill a buffer of up to `segment_size` bytes; short only at end of input
async fn read_segment<R: AsyncRead + Unpin>(reader: &mut R, segment_size: usize) -> Result<Bytes> {
    let mut buffer = BytesMut::zeroed(segment_size);
    let mut filled = 0;
    while filled < segment_size {
        let n = reader.read(&mut buffer[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buffer.truncate(filled);
    Ok(buffer.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_segment_fills_across_short_reads() {
        let data: Vec<u8> = (0..100u8).collect();
        // Chain of small readers yields short reads
        let reader = tokio::io::AsyncReadExt::chain(&data[..30], &data[30..]);
        let mut reader = Box::pin(reader);

        let first = read_segment(&mut reader, 64).await.unwrap();
        assert_eq!(&first[..], &data[..64]);
        let second = read_segment(&mut reader, 64).await.unwrap();
        assert_eq!(&second[..], &data[64..]);
        let third = read_segment(&mut reader, 64).await.unwrap();
        assert!(third.is_empty());
    }
}
