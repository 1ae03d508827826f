//! Piece transport
//!
//! How pieces reach storage nodes. The wire protocol is external; this crate
//! only needs put/get/delete by node and piece ID.

use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tessera_core::error::{Result, TesseraError};
use tessera_core::node::NodeId;
use tessera_core::piece::PieceId;

/// Moves pieces to and from storage nodes
#[async_trait::async_trait]
pub trait PieceTransport: Send + Sync {
    async fn put_piece(&self, node: NodeId, piece_id: PieceId, data: Bytes) -> Result<()>;

    async fn get_piece(&self, node: NodeId, piece_id: PieceId) -> Result<Bytes>;

    async fn delete_piece(&self, node: NodeId, piece_id: PieceId) -> Result<()>;
}

/// In-process transport with fault injection.
///
/// Nodes can be taken offline, made to return corrupted pieces, or slowed
/// down; used by tests and the local round-trip command.
#[derive(Default)]
pub struct MemoryTransport {
    pieces: RwLock<HashMap<NodeId, HashMap<PieceId, Bytes>>>,
    offline: RwLock<HashSet<NodeId>>,
    corrupt: RwLock<HashSet<NodeId>>,
    latency: RwLock<HashMap<NodeId, Duration>>,
    puts: AtomicU64,
    gets: AtomicU64,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call to `node` fail
    pub fn set_offline(&self, node: NodeId, offline: bool) {
        let mut set = self.offline.write();
        if offline {
            set.insert(node);
        } else {
            set.remove(&node);
        }
    }

    /// Make `node` return flipped bytes on get
    pub fn set_corrupt(&self, node: NodeId, corrupt: bool) {
        let mut set = self.corrupt.write();
        if corrupt {
            set.insert(node);
        } else {
            set.remove(&node);
        }
    }

    /// Delay every call to `node`
    pub fn set_latency(&self, node: NodeId, latency: Duration) {
        self.latency.write().insert(node, latency);
    }

    /// Total pieces held across all nodes
    pub fn piece_count(&self) -> usize {
        self.pieces.read().values().map(HashMap::len).sum()
    }

    pub fn pieces_on(&self, node: &NodeId) -> usize {
        self.pieces.read().get(node).map_or(0, HashMap::len)
    }

    pub fn has_piece(&self, node: &NodeId, piece_id: &PieceId) -> bool {
        self.pieces
            .read()
            .get(node)
            .is_some_and(|p| p.contains_key(piece_id))
    }

    /// Successful puts so far
    pub fn put_count(&self) -> u64 {
        self.puts.load(Ordering::Relaxed)
    }

    pub fn get_count(&self) -> u64 {
        self.gets.load(Ordering::Relaxed)
    }

    async fn enter(&self, node: &NodeId) -> Result<()> {
        let delay = self.latency.read().get(node).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.offline.read().contains(node) {
            return Err(TesseraError::Transport(format!("node {} is offline", node)));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl PieceTransport for MemoryTransport {
    async fn put_piece(&self, node: NodeId, piece_id: PieceId, data: Bytes) -> Result<()> {
        self.enter(&node).await?;
        self.pieces
            .write()
            .entry(node)
            .or_default()
            .insert(piece_id, data);
        self.puts.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn get_piece(&self, node: NodeId, piece_id: PieceId) -> Result<Bytes> {
        self.enter(&node).await?;
        let data = self
            .pieces
            .read()
            .get(&node)
            .and_then(|p| p.get(&piece_id).cloned())
            .ok_or_else(|| TesseraError::NotFound(format!("piece {} on {}", piece_id, node)))?;
        self.gets.fetch_add(1, Ordering::Relaxed);

        if self.corrupt.read().contains(&node) {
            let mut flipped = data.to_vec();
            if let Some(first) = flipped.first_mut() {
                *first ^= 0xFF;
            }
            return Ok(Bytes::from(flipped));
        }
        Ok(data)
    }

    async fn delete_piece(&self, node: NodeId, piece_id: PieceId) -> Result<()> {
        self.enter(&node).await?;
        if let Some(pieces) = self.pieces.write().get_mut(&node) {
            pieces.remove(&piece_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete() {
        let transport = MemoryTransport::new();
        let node = NodeId::from_seed(b"n");
        let piece = PieceId::new_root();

        transport
            .put_piece(node, piece, Bytes::from_static(b"piece"))
            .await
            .unwrap();
        assert!(transport.has_piece(&node, &piece));
        assert_eq!(
            transport.get_piece(node, piece).await.unwrap(),
            Bytes::from_static(b"piece")
        );

        transport.delete_piece(node, piece).await.unwrap();
        assert_eq!(transport.piece_count(), 0);
        assert!(matches!(
            transport.get_piece(node, piece).await,
            Err(TesseraError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let transport = MemoryTransport::new();
        let node = NodeId::from_seed(b"n");
        let piece = PieceId::new_root();
        transport
            .put_piece(node, piece, Bytes::from_static(b"abc"))
            .await
            .unwrap();

        transport.set_corrupt(node, true);
        assert_ne!(transport.get_piece(node, piece).await.unwrap(), Bytes::from_static(b"abc"));
        transport.set_corrupt(node, false);

        transport.set_offline(node, true);
        assert!(matches!(
            transport.get_piece(node, piece).await,
            Err(TesseraError::Transport(_))
        ));
        transport.set_offline(node, false);
        assert!(transport.get_piece(node, piece).await.is_ok());
    }
}
