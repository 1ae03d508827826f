//! Node identities and reputation records
//!
//! Storage nodes are identified by a fixed-length 32-byte ID, shown and
//! parsed as base58. The overlay keeps one [`NodeRecord`] per node.

use crate::error::{Result, TesseraError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Length of a node ID in bytes
pub const NODE_ID_LEN: usize = 32;

/// Storage node identifier
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId([u8; NODE_ID_LEN]);

impl NodeId {
    /// Create a NodeId from raw bytes
    pub fn from_bytes(bytes: [u8; NODE_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Create a NodeId from a slice (validates length)
    pub fn from_slice(slice: &[u8]) -> Result<Self> {
        if slice.len() != NODE_ID_LEN {
            return Err(TesseraError::InvalidNodeId(format!(
                "Invalid length: expected {}, got {}",
                NODE_ID_LEN,
                slice.len()
            )));
        }
        let mut arr = [0u8; NODE_ID_LEN];
        arr.copy_from_slice(slice);
        Ok(Self(arr))
    }

    /// Derive a deterministic ID from a seed (tests, local clusters)
    pub fn from_seed(seed: &[u8]) -> Self {
        Self(*blake3::hash(seed).as_bytes())
    }

    /// Generate a random node ID
    pub fn random() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; NODE_ID_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; NODE_ID_LEN] {
        &self.0
    }

    /// Convert to base58 string
    pub fn to_base58(&self) -> String {
        bs58::encode(&self.0).into_string()
    }

    /// Parse from base58 string
    pub fn from_base58(s: &str) -> Result<Self> {
        let bytes = bs58::decode(s.trim())
            .into_vec()
            .map_err(|e| TesseraError::InvalidNodeId(format!("{}: {}", s, e)))?;
        Self::from_slice(&bytes)
    }

    /// Parse a delimited list of base58 node IDs.
    ///
    /// Every malformed entry is reported, not just the first one.
    pub fn parse_list(ids: &str, delimiter: &str) -> Result<Vec<NodeId>> {
        let mut parsed = Vec::new();
        let mut errors = Vec::new();

        for part in ids.split(delimiter).filter(|p| !p.trim().is_empty()) {
            match NodeId::from_base58(part) {
                Ok(id) => parsed.push(id),
                Err(e) => errors.push(e.to_string()),
            }
        }

        if !errors.is_empty() {
            return Err(TesseraError::InvalidNodeId(errors.join("; ")));
        }
        Ok(parsed)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", &self.to_base58()[..8])
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_base58())
    }
}

impl FromStr for NodeId {
    type Err = TesseraError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_base58(s)
    }
}

/// Location and reputation of a storage node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: NodeId,

    /// Network address the transport dials
    pub address: String,

    /// Ratio of successful uptime checks (0..=1)
    pub uptime_ratio: f64,

    /// Number of uptime checks performed
    pub uptime_count: u64,

    /// Ratio of successful audits (0..=1)
    pub audit_success_ratio: f64,

    /// Number of audits performed
    pub audit_count: u64,

    /// Last time discovery observed this node
    pub last_seen: DateTime<Utc>,
}

impl NodeRecord {
    /// A freshly observed node with no reputation history
    pub fn new(id: NodeId, address: impl Into<String>) -> Self {
        Self {
            id,
            address: address.into(),
            uptime_ratio: 0.0,
            uptime_count: 0,
            audit_success_ratio: 0.0,
            audit_count: 0,
            last_seen: Utc::now(),
        }
    }

    pub fn with_uptime(mut self, ratio: f64, count: u64) -> Self {
        self.uptime_ratio = ratio;
        self.uptime_count = count;
        self
    }

    pub fn with_audits(mut self, ratio: f64, count: u64) -> Self {
        self.audit_success_ratio = ratio;
        self.audit_count = count;
        self
    }

    pub fn with_last_seen(mut self, last_seen: DateTime<Utc>) -> Self {
        self.last_seen = last_seen;
        self
    }

    /// Merge a newer observation into this record.
    ///
    /// Address and last-seen come from the observation; reputation fields
    /// stay as stored. Returns false (and leaves the record untouched) when
    /// the stored record was seen more recently.
    pub fn merge_observation(&mut self, observed: &NodeRecord) -> bool {
        if self.last_seen > observed.last_seen {
            return false;
        }
        self.address = observed.address.clone();
        self.last_seen = observed.last_seen;
        true
    }
}

/// Minimum reputation a node needs to receive new pieces
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ReputationThresholds {
    pub min_uptime_ratio: f64,
    pub min_uptime_count: u64,
    pub min_audit_success_ratio: f64,
    pub min_audit_count: u64,
}

impl ReputationThresholds {
    /// True iff every threshold is met or exceeded
    pub fn admits(&self, record: &NodeRecord) -> bool {
        record.uptime_ratio >= self.min_uptime_ratio
            && record.uptime_count >= self.min_uptime_count
            && record.audit_success_ratio >= self.min_audit_success_ratio
            && record.audit_count >= self.min_audit_count
    }
}
