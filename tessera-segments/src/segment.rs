//! Segment pipeline
//!
//! Write: encrypt, erasure-encode, select nodes, fan out one piece per node.
//! Read: fetch pieces in parallel, validate, decode from the first `k` valid
//! pieces, decrypt.

use crate::fanout::{self, NodeResult, PieceTask, Quorum};
use crate::pointer::{PieceAssignment, RemoteSegment, Segment, SegmentContent};
use crate::transport::PieceTransport;
use bytes::Bytes;
use futures::FutureExt;
use rayon::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tessera_core::config::Config;
use tessera_core::encryption::{EncryptionScheme, Key};
use tessera_core::error::{Result, TesseraError};
use tessera_core::node::ReputationThresholds;
use tessera_core::piece::{ContentHash, PieceId};
use tessera_core::redundancy::{RedundancyScheme, Share};
use tessera_overlay::OverlayCache;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Turns segment plaintext into placed pieces and back
pub struct SegmentPipeline {
    overlay: Arc<OverlayCache>,
    transport: Arc<dyn PieceTransport>,
    redundancy: Arc<RedundancyScheme>,
    encryption: EncryptionScheme,
    thresholds: ReputationThresholds,
    max_inline_size: usize,
    piece_timeout: Duration,
}

impl SegmentPipeline {
    pub fn new(
        overlay: Arc<OverlayCache>,
        transport: Arc<dyn PieceTransport>,
        redundancy: RedundancyScheme,
        encryption: EncryptionScheme,
    ) -> Self {
        Self {
            overlay,
            transport,
            redundancy: Arc::new(redundancy),
            encryption,
            thresholds: ReputationThresholds::default(),
            max_inline_size: tessera_core::DEFAULT_MAX_INLINE_SIZE,
            piece_timeout: Duration::from_secs(30),
        }
    }

    /// Build from validated configuration
    pub fn from_config(
        config: &Config,
        overlay: Arc<OverlayCache>,
        transport: Arc<dyn PieceTransport>,
    ) -> Result<Self> {
        let redundancy = config.redundancy_scheme()?;
        let encryption = config.encryption_scheme(&redundancy)?;
        Ok(Self::new(overlay, transport, redundancy, encryption)
            .with_thresholds(config.thresholds())
            .with_max_inline_size(config.client.max_inline_size)
            .with_piece_timeout(config.client.piece_timeout()))
    }

    pub fn with_thresholds(mut self, thresholds: ReputationThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_max_inline_size(mut self, max_inline_size: usize) -> Self {
        self.max_inline_size = max_inline_size;
        self
    }

    pub fn with_piece_timeout(mut self, piece_timeout: Duration) -> Self {
        self.piece_timeout = piece_timeout;
        self
    }

    pub fn encryption(&self) -> &EncryptionScheme {
        &self.encryption
    }

    pub fn redundancy(&self) -> &RedundancyScheme {
        &self.redundancy
    }

    /// Encrypt and store one segment.
    ///
    /// Segments up to the inline limit are kept with the pointer. Larger
    /// ones are erasure coded and placed; the returned pointer lists only the
    /// pieces that were actually uploaded.
    #[instrument(skip(self, data, key, cancel), fields(size = data.len()))]
    pub async fn write(
        &self,
        index: u64,
        data: Bytes,
        key: &Key,
        first_block: u64,
        cancel: &CancellationToken,
    ) -> Result<Segment> {
        if cancel.is_cancelled() {
            return Err(TesseraError::Cancelled);
        }

        let size = data.len() as u64;
        if data.len() <= self.max_inline_size {
            let encrypted = self.encryption.encrypt_segment(key, first_block, &data)?;
            debug!(index, size, "Storing segment inline");
            return Ok(Segment {
                index,
                size,
                first_block,
                content: SegmentContent::Inline(Bytes::from(encrypted)),
            });
        }

        let (encrypted_size, shares, hashes) = self.encode(data, key, first_block).await?;
        if cancel.is_cancelled() {
            return Err(TesseraError::Cancelled);
        }

        let required = self.redundancy.required_shares();
        let selection = self
            .overlay
            .select_storage_nodes(self.redundancy.total_shares(), &self.thresholds, &[])
            .await?;
        if selection.len() < required {
            return Err(TesseraError::InsufficientNodes {
                selected: selection.len(),
                required,
            });
        }
        if selection.is_partial() {
            debug!(
                selected = selection.len(),
                requested = selection.requested,
                "Partial node selection"
            );
        }

        let root_piece_id = PieceId::new_root();
        let tasks: Vec<PieceTask<()>> = shares
            .into_iter()
            .zip(selection.nodes.iter())
            .map(|(share, node)| {
                let transport = Arc::clone(&self.transport);
                let node_id = node.id;
                let piece_id = root_piece_id.derive(share.index);
                PieceTask {
                    node_id,
                    piece_index: share.index,
                    transfer: async move { transport.put_piece(node_id, piece_id, share.data).await }
                        .boxed(),
                }
            })
            .collect();

        let quorum = Quorum {
            stop_after: self.redundancy.optimal_shares().min(selection.len()),
            required,
        };
        let outcome = fanout::run(tasks, self.piece_timeout, quorum, cancel).await;

        let assignment = |r: &NodeResult<()>| PieceAssignment {
            node_id: r.node_id,
            piece_index: r.piece_index,
            hash: hashes[r.piece_index as usize],
        };
        let mut pieces: Vec<PieceAssignment> = outcome.successes.iter().map(assignment).collect();
        pieces.sort_by_key(|p| p.piece_index);
        // Uploaded after the outcome was decided; never referenced by the pointer
        let late: Vec<PieceAssignment> = outcome.late.iter().map(assignment).collect();

        if outcome.cancelled || pieces.len() < required {
            self.spawn_cleanup(root_piece_id, pieces.iter().cloned().chain(late).collect());
            if outcome.cancelled {
                return Err(TesseraError::Cancelled);
            }
            warn!(
                index,
                uploaded = pieces.len(),
                required,
                "Segment upload did not reach quorum"
            );
            return Err(TesseraError::QuorumNotMet {
                achieved: pieces.len(),
                required,
            });
        }

        self.spawn_cleanup(root_piece_id, late);

        if pieces.len() < self.redundancy.repair_shares() {
            warn!(
                index,
                uploaded = pieces.len(),
                repair_threshold = self.redundancy.repair_shares(),
                "Segment stored below repair threshold"
            );
        }

        info!(
            index,
            size,
            pieces = pieces.len(),
            failures = outcome.failures.len(),
            aborted = outcome.aborted,
            "Segment uploaded"
        );

        Ok(Segment {
            index,
            size,
            first_block,
            content: SegmentContent::Remote(RemoteSegment {
                params: self.redundancy.params(),
                root_piece_id,
                encrypted_size,
                pieces,
            }),
        })
    }

    /// Encrypt, encode and hash on the blocking pool
    async fn encode(
        &self,
        data: Bytes,
        key: &Key,
        first_block: u64,
    ) -> Result<(u64, Vec<Share>, Vec<ContentHash>)> {
        let redundancy = Arc::clone(&self.redundancy);
        let encryption = self.encryption;
        let key = key.clone();

        tokio::task::spawn_blocking(move || -> Result<(u64, Vec<Share>, Vec<ContentHash>)> {
            let encrypted = encryption.encrypt_segment(&key, first_block, &data)?;
            let shares = redundancy.encode(&encrypted)?;
            let hashes = shares
                .par_iter()
                .map(|s| ContentHash::compute(&s.data))
                .collect();
            Ok((encrypted.len() as u64, shares, hashes))
        })
        .await
        .map_err(|e| TesseraError::Internal(format!("encode task failed: {}", e)))?
    }

    /// Fetch, decode and decrypt one segment.
    ///
    /// `encryption` is the scheme the segment was written with, which may
    /// differ from the one this pipeline writes with.
    #[instrument(skip(self, segment, key, encryption, cancel), fields(index = segment.index))]
    pub async fn read(
        &self,
        segment: &Segment,
        key: &Key,
        encryption: &EncryptionScheme,
        cancel: &CancellationToken,
    ) -> Result<Bytes> {
        if cancel.is_cancelled() {
            return Err(TesseraError::Cancelled);
        }

        let remote = match &segment.content {
            SegmentContent::Inline(encrypted) => {
                let plain = encryption.decrypt_segment(
                    key,
                    segment.first_block,
                    encrypted,
                    segment.size as usize,
                )?;
                return Ok(Bytes::from(plain));
            }
            SegmentContent::Remote(remote) => remote,
        };

        let scheme = if remote.params == self.redundancy.params() {
            Arc::clone(&self.redundancy)
        } else {
            Arc::new(RedundancyScheme::from_params(remote.params)?)
        };
        let required = scheme.required_shares();
        let encrypted_size = remote.encrypted_size as usize;
        let piece_size = scheme.piece_size(encrypted_size);

        let tasks: Vec<PieceTask<Share>> = remote
            .pieces
            .iter()
            .map(|assignment| {
                let transport = Arc::clone(&self.transport);
                let piece_id = remote.root_piece_id.derive(assignment.piece_index);
                let node_id = assignment.node_id;
                let piece_index = assignment.piece_index;
                let hash = assignment.hash;
                PieceTask {
                    node_id,
                    piece_index,
                    transfer: async move {
                        let data = transport.get_piece(node_id, piece_id).await?;
                        if data.len() != piece_size || !hash.verify(&data) {
                            return Err(TesseraError::Transport(format!(
                                "piece {} from {} failed validation",
                                piece_index, node_id
                            )));
                        }
                        Ok(Share::new(piece_index, data))
                    }
                    .boxed(),
                }
            })
            .collect();

        let quorum = Quorum {
            stop_after: required,
            required,
        };
        let outcome = fanout::run(tasks, self.piece_timeout, quorum, cancel).await;
        if outcome.cancelled {
            return Err(TesseraError::Cancelled);
        }
        if outcome.success_count() < required {
            warn!(
                index = segment.index,
                valid = outcome.success_count(),
                required,
                "Segment unavailable"
            );
            return Err(TesseraError::SegmentUnavailable {
                index: segment.index,
                available: outcome.success_count(),
                required,
            });
        }

        let shares: Vec<Share> = outcome
            .successes
            .into_iter()
            .filter_map(|r| r.result.ok())
            .collect();

        let encryption = *encryption;
        let key = key.clone();
        let first_block = segment.first_block;
        let size = segment.size as usize;
        let plain = tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
            let encrypted = scheme.decode(&shares, encrypted_size)?;
            encryption.decrypt_segment(&key, first_block, &encrypted, size)
        })
        .await
        .map_err(|e| TesseraError::Internal(format!("decode task failed: {}", e)))??;

        debug!(index = segment.index, size, "Segment read");
        Ok(Bytes::from(plain))
    }

    /// Remove every piece of a segment from its node, best effort.
    ///
    /// Returns the number of pieces deleted.
    pub async fn delete(&self, segment: &Segment) -> usize {
        let Some(remote) = segment.remote() else {
            return 0;
        };
        delete_pieces(
            Arc::clone(&self.transport),
            remote.root_piece_id,
            &remote.pieces,
            self.piece_timeout,
        )
        .await
    }

    fn spawn_cleanup(&self, root_piece_id: PieceId, pieces: Vec<PieceAssignment>) {
        if pieces.is_empty() {
            return;
        }
        let transport = Arc::clone(&self.transport);
        let piece_timeout = self.piece_timeout;
        tokio::spawn(async move {
            let deleted = delete_pieces(transport, root_piece_id, &pieces, piece_timeout).await;
            debug!(deleted, total = pieces.len(), "Cleaned up uncommitted pieces");
        });
    }
}

async fn delete_pieces(
    transport: Arc<dyn PieceTransport>,
    root_piece_id: PieceId,
    pieces: &[PieceAssignment],
    piece_timeout: Duration,
) -> usize {
    let mut set = JoinSet::new();
    for assignment in pieces {
        let transport = Arc::clone(&transport);
        let node_id = assignment.node_id;
        let piece_id = root_piece_id.derive(assignment.piece_index);
        set.spawn(async move {
            match tokio::time::timeout(piece_timeout, transport.delete_piece(node_id, piece_id)).await
            {
                Ok(Ok(())) => true,
                Ok(Err(e)) => {
                    debug!(node = %node_id, error = %e, "Piece delete failed");
                    false
                }
                Err(_) => {
                    debug!(node = %node_id, "Piece delete timed out");
                    false
                }
            }
        });
    }

    let mut deleted = 0;
    while let Some(joined) = set.join_next().await {
        if matches!(joined, Ok(true)) {
            deleted += 1;
        }
    }
    deleted
}
