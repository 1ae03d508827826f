//! Reed-Solomon redundancy schemes
//!
//! A scheme is described by four share counts:
//! - k (required): minimum shares needed to reconstruct a segment
//! - m (repair): below this many healthy shares a segment needs repair
//! - o (optimal): shares a healthy upload aims for
//! - n (total): shares ever created for a segment
//!
//! Data is cut into stripes of `k * share_size` bytes. Each stripe encodes to
//! `n` share-sized slots and share `i` is the concatenation of slot `i` of
//! every stripe, so a piece is always a whole number of erasure shares.

use crate::error::{Result, TesseraError};
use bytes::Bytes;
use rayon::prelude::*;
use reed_solomon_erasure::galois_8::ReedSolomon;
use serde::{Deserialize, Serialize};

/// Largest share count GF(2^8) Reed-Solomon supports
pub const MAX_TOTAL_SHARES: u16 = 256;

/// Erasure coding algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RedundancyAlgorithm {
    ReedSolomon,
}

/// Plain description of a scheme, stored with every remote segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedundancyParams {
    pub algorithm: RedundancyAlgorithm,
    pub required_shares: u16,
    pub repair_shares: u16,
    pub optimal_shares: u16,
    pub total_shares: u16,
    pub share_size: u32,
}

impl RedundancyParams {
    /// Check `0 < k <= m <= o <= n <= 256` and a non-zero share size
    pub fn validate(&self) -> Result<()> {
        let Self {
            required_shares: k,
            repair_shares: m,
            optimal_shares: o,
            total_shares: n,
            ..
        } = *self;

        if k == 0 {
            return Err(TesseraError::InvalidScheme(
                "required shares must be > 0".to_string(),
            ));
        }
        if !(k <= m && m <= o && o <= n) {
            return Err(TesseraError::InvalidScheme(format!(
                "share counts must satisfy k <= m <= o <= n, got k={} m={} o={} n={}",
                k, m, o, n
            )));
        }
        if n > MAX_TOTAL_SHARES {
            return Err(TesseraError::InvalidScheme(format!(
                "total shares {} exceeds {}",
                n, MAX_TOTAL_SHARES
            )));
        }
        if self.share_size == 0 {
            return Err(TesseraError::InvalidScheme(
                "erasure share size must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Bytes of data carried by one stripe
    pub fn stripe_size(&self) -> usize {
        self.required_shares as usize * self.share_size as usize
    }
}

/// One erasure share, labeled with its encode-time index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Share {
    pub index: u16,
    pub data: Bytes,
}

impl Share {
    pub fn new(index: u16, data: Bytes) -> Self {
        Self { index, data }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Reed-Solomon encoder/decoder for one scheme
pub struct RedundancyScheme {
    params: RedundancyParams,
    /// `None` when k == n (no parity to compute)
    encoder: Option<ReedSolomon>,
}

impl RedundancyScheme {
    /// Create a scheme from its share counts and share size
    pub fn new(
        required_shares: u16,
        repair_shares: u16,
        optimal_shares: u16,
        total_shares: u16,
        share_size: usize,
    ) -> Result<Self> {
        let share_size = u32::try_from(share_size).map_err(|_| {
            TesseraError::InvalidScheme(format!("share size {} too large", share_size))
        })?;
        Self::from_params(RedundancyParams {
            algorithm: RedundancyAlgorithm::ReedSolomon,
            required_shares,
            repair_shares,
            optimal_shares,
            total_shares,
            share_size,
        })
    }

    /// Rebuild a scheme from stored parameters
    pub fn from_params(params: RedundancyParams) -> Result<Self> {
        params.validate()?;

        let data = params.required_shares as usize;
        let parity = (params.total_shares - params.required_shares) as usize;
        let encoder = if parity > 0 {
            Some(ReedSolomon::new(data, parity)?)
        } else {
            None
        };

        Ok(Self { params, encoder })
    }

    pub fn params(&self) -> RedundancyParams {
        self.params
    }

    pub fn required_shares(&self) -> usize {
        self.params.required_shares as usize
    }

    pub fn repair_shares(&self) -> usize {
        self.params.repair_shares as usize
    }

    pub fn optimal_shares(&self) -> usize {
        self.params.optimal_shares as usize
    }

    pub fn total_shares(&self) -> usize {
        self.params.total_shares as usize
    }

    pub fn share_size(&self) -> usize {
        self.params.share_size as usize
    }

    pub fn stripe_size(&self) -> usize {
        self.params.stripe_size()
    }

    /// Number of stripes needed for `data_len` bytes (at least one)
    pub fn stripe_count(&self, data_len: usize) -> usize {
        data_len.div_ceil(self.stripe_size()).max(1)
    }

    /// Size of every piece produced for `data_len` bytes
    pub fn piece_size(&self, data_len: usize) -> usize {
        self.stripe_count(data_len) * self.share_size()
    }

    /// Encode data into `n` shares; any `k` of them reconstruct it
    pub fn encode(&self, data: &[u8]) -> Result<Vec<Share>> {
        let share_size = self.share_size();
        let stripe_size = self.stripe_size();
        let stripes = self.stripe_count(data.len());
        let piece_size = stripes * share_size;

        let mut shards: Vec<Vec<u8>> = vec![vec![0u8; piece_size]; self.total_shares()];

        // Scatter the data into the k data shards, stripe by stripe
        shards[..self.required_shares()]
            .par_iter_mut()
            .enumerate()
            .for_each(|(j, shard)| {
                for stripe in 0..stripes {
                    let start = stripe * stripe_size + j * share_size;
                    if start >= data.len() {
                        break;
                    }
                    let end = (start + share_size).min(data.len());
                    let offset = stripe * share_size;
                    shard[offset..offset + (end - start)].copy_from_slice(&data[start..end]);
                }
            });

        if let Some(encoder) = &self.encoder {
            encoder.encode(&mut shards)?;
        }

        Ok(shards
            .into_iter()
            .enumerate()
            .map(|(i, shard)| Share::new(i as u16, Bytes::from(shard)))
            .collect())
    }

    /// Decode shares back into the original `original_len` bytes
    ///
    /// Shares must carry their encode-time index. When more than `k` shares
    /// are supplied they are cross-checked, so a mislabeled extra share fails
    /// the decode instead of producing wrong data.
    pub fn decode(&self, shares: &[Share], original_len: usize) -> Result<Bytes> {
        let total = self.total_shares();
        let required = self.required_shares();
        let share_size = self.share_size();

        let mut slots: Vec<Option<Vec<u8>>> = vec![None; total];
        let mut piece_size: Option<usize> = None;

        for share in shares {
            let index = share.index as usize;
            if index >= total {
                return Err(TesseraError::InvalidShareIndex { index, total });
            }
            if slots[index].is_some() {
                return Err(TesseraError::DuplicateShare(index));
            }
            match piece_size {
                None => piece_size = Some(share.size()),
                Some(expected) if expected != share.size() => {
                    return Err(TesseraError::ShareSizeMismatch {
                        expected,
                        actual: share.size(),
                    });
                }
                Some(_) => {}
            }
            slots[index] = Some(share.data.to_vec());
        }

        let available = slots.iter().filter(|s| s.is_some()).count();
        if available < required {
            return Err(TesseraError::InsufficientShares {
                available,
                required,
            });
        }

        let piece_size = piece_size.unwrap_or(0);
        if piece_size == 0 || piece_size % share_size != 0 {
            return Err(TesseraError::ShareSizeMismatch {
                expected: share_size,
                actual: piece_size,
            });
        }

        let stripes = piece_size / share_size;
        if original_len > stripes * self.stripe_size() {
            return Err(TesseraError::ErasureCoding(format!(
                "original length {} exceeds decodable {} bytes",
                original_len,
                stripes * self.stripe_size()
            )));
        }

        if let Some(encoder) = &self.encoder {
            if available > required {
                encoder.reconstruct(&mut slots)?;
                let full: Vec<&[u8]> = slots
                    .iter()
                    .map(|s| s.as_deref().unwrap_or_default())
                    .collect();
                if !encoder.verify(&full)? {
                    return Err(TesseraError::ErasureCoding(
                        "shares are inconsistent".to_string(),
                    ));
                }
            } else {
                encoder.reconstruct_data(&mut slots)?;
            }
        }

        let mut result = Vec::with_capacity(original_len);
        'stripes: for stripe in 0..stripes {
            for slot in slots.iter().take(required) {
                if result.len() >= original_len {
                    break 'stripes;
                }
                let shard = slot
                    .as_ref()
                    .ok_or_else(|| TesseraError::Internal("reconstruction failed".to_string()))?;
                let offset = stripe * share_size;
                result.extend_from_slice(&shard[offset..offset + share_size]);
            }
        }

        result.truncate(original_len);
        Ok(Bytes::from(result))
    }
}

impl std::fmt::Debug for RedundancyScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedundancyScheme")
            .field("params", &self.params)
            .finish()
    }
}
