//! Piece identifiers and content hashes
//!
//! Every remote segment gets a random root piece ID; the ID a node sees for
//! piece `i` is derived from the root and `i`, so nodes cannot link pieces of
//! the same segment by looking at their IDs.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Blake3 digest of a piece, checked on every read
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[u8; 32]", into = "[u8; 32]")]
pub struct ContentHash(blake3::Hash);

impl ContentHash {
    pub fn compute(data: &[u8]) -> Self {
        Self(blake3::hash(data))
    }

    /// Multi-threaded variant for whole segments
    pub fn compute_parallel(data: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update_rayon(data);
        Self(hasher.finalize())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }

    pub fn to_hex(&self) -> String {
        self.0.to_hex().to_string()
    }

    /// Constant-time comparison against freshly hashed `data`
    pub fn verify(&self, data: &[u8]) -> bool {
        self.0 == blake3::hash(data)
    }
}

impl From<[u8; 32]> for ContentHash {
    fn from(bytes: [u8; 32]) -> Self {
        Self(blake3::Hash::from_bytes(bytes))
    }
}

impl From<ContentHash> for [u8; 32] {
    fn from(hash: ContentHash) -> Self {
        *hash.as_bytes()
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Identifier of a piece (or the root of a segment's pieces)
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PieceId([u8; 32]);

impl PieceId {
    /// Random root ID for a new remote segment
    pub fn new_root() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// ID of piece `index` under this root
    pub fn derive(&self, index: u16) -> PieceId {
        let mut hasher = blake3::Hasher::new_keyed(&self.0);
        hasher.update(b"piece");
        hasher.update(&index.to_le_bytes());
        PieceId(*hasher.finalize().as_bytes())
    }

    pub fn to_base58(&self) -> String {
        bs58::encode(&self.0).into_string()
    }
}

impl fmt::Debug for PieceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PieceId({})", &self.to_base58()[..8])
    }
}

impl fmt::Display for PieceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_base58())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash() {
        let data = b"hello world";
        let hash = ContentHash::compute(data);

        assert_eq!(hash, ContentHash::compute(data));
        assert_ne!(hash, ContentHash::compute(b"different data"));

        assert!(hash.verify(data));
        assert!(!hash.verify(b"wrong data"));
        assert_eq!(hash.to_string().len(), 64);
    }

    #[test]
    fn test_content_hash_parallel() {
        let data = vec![0u8; 1024 * 1024];
        assert_eq!(ContentHash::compute(&data), ContentHash::compute_parallel(&data));
    }

    #[test]
    fn test_content_hash_bincode() {
        let hash = ContentHash::compute(b"piece");
        let encoded = bincode::serialize(&hash).unwrap();
        let decoded: ContentHash = bincode::deserialize(&encoded).unwrap();
        assert_eq!(hash, decoded);
    }

    #[test]
    fn test_derived_piece_ids_are_distinct() {
        let root = PieceId::new_root();
        let a = root.derive(0);
        let b = root.derive(1);
        assert_ne!(a, b);
        assert_ne!(a, root);
        assert_eq!(a, root.derive(0));
        assert_ne!(PieceId::new_root().derive(0), a);
    }
}
