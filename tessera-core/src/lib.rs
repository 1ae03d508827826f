//! Tessera Core Library
//!
//! Core abstractions shared by the Tessera placement and durability services.
//! This crate provides:
//! - Reed-Solomon redundancy schemes (k required / m repair / o optimal / n total)
//! - Block encryption schemes (AES-GCM, SecretBox) and path encryption
//! - Node identities, node records and reputation thresholds
//! - Piece identifiers and content hashes
//! - Configuration loading and the unified error type

pub mod config;
pub mod encryption;
pub mod error;
pub mod node;
pub mod piece;
pub mod redundancy;

pub use config::Config;
pub use encryption::{Cipher, EncryptionScheme, Key, PathCipher};
pub use error::{Result, TesseraError};
pub use node::{NodeId, NodeRecord, ReputationThresholds};
pub use piece::{ContentHash, PieceId};
pub use redundancy::{RedundancyAlgorithm, RedundancyParams, RedundancyScheme, Share};

/// Defaults for new uploads.
///
/// 29 pieces are enough to rebuild a segment, repair kicks in below 35,
/// 80 pieces is a healthy segment and no more than 95 are ever created.
pub const DEFAULT_REQUIRED_SHARES: u16 = 29;
pub const DEFAULT_REPAIR_SHARES: u16 = 35;
pub const DEFAULT_OPTIMAL_SHARES: u16 = 80;
pub const DEFAULT_TOTAL_SHARES: u16 = 95;
pub const DEFAULT_ERASURE_SHARE_SIZE: usize = 1024;

/// Encryption defaults
pub const DEFAULT_BLOCK_SIZE: usize = 1024;

/// Segment sizing
pub const DEFAULT_SEGMENT_SIZE: u64 = 64_000_000;
pub const DEFAULT_MAX_INLINE_SIZE: usize = 4096;
