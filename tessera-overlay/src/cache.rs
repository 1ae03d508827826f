//! Overlay cache
//!
//! Picks storage nodes for new uploads from the reputation store and keeps
//! the store's addresses fresh from discovery.
//!
//! Every read-modify-write of a stored record goes through a per-node lock,
//! so a refresh never writes back a reputation it read before an update.

use crate::discovery::Discovery;
use crate::store::ReputationStore;
use futures::TryStreamExt;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tessera_core::error::Result;
use tessera_core::node::{NodeId, NodeRecord, ReputationThresholds};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, instrument};

/// Record locks; node IDs are hashes, so the first byte spreads evenly
const RECORD_LOCK_STRIPES: usize = 64;

/// Nodes chosen for an upload
#[derive(Debug, Clone)]
pub struct Selection {
    pub nodes: Vec<NodeRecord>,
    pub requested: usize,
}

impl Selection {
    /// Fewer nodes qualified than were requested
    pub fn is_partial(&self) -> bool {
        self.nodes.len() < self.requested
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn ids(&self) -> Vec<NodeId> {
        self.nodes.iter().map(|n| n.id).collect()
    }
}

/// Outcome of one refresh pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshStats {
    pub observed: usize,
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
}

/// Reputation-aware node registry
pub struct OverlayCache {
    store: Arc<ReputationStore>,
    discovery: Arc<dyn Discovery>,
    rng: Mutex<StdRng>,
    record_locks: Vec<AsyncMutex<()>>,
}

impl OverlayCache {
    pub fn new(store: Arc<ReputationStore>, discovery: Arc<dyn Discovery>, rng: StdRng) -> Self {
        Self {
            store,
            discovery,
            rng: Mutex::new(rng),
            record_locks: (0..RECORD_LOCK_STRIPES).map(|_| AsyncMutex::new(())).collect(),
        }
    }

    /// Cache seeded from the operating system
    pub fn from_entropy(store: Arc<ReputationStore>, discovery: Arc<dyn Discovery>) -> Self {
        Self::new(store, discovery, StdRng::from_entropy())
    }

    /// Cache whose selections are reproducible for a given seed
    pub fn with_seed(store: Arc<ReputationStore>, discovery: Arc<dyn Discovery>, seed: u64) -> Self {
        Self::new(store, discovery, StdRng::seed_from_u64(seed))
    }

    pub fn store(&self) -> &Arc<ReputationStore> {
        &self.store
    }

    fn record_lock(&self, id: &NodeId) -> &AsyncMutex<()> {
        &self.record_locks[id.as_bytes()[0] as usize % RECORD_LOCK_STRIPES]
    }

    /// Change a stored record in place; `NotFound` if the node is unknown.
    ///
    /// Reputation measurements must be written through here rather than
    /// straight to the store, or a concurrent refresh may overwrite them.
    pub async fn update_reputation<F>(&self, id: &NodeId, update: F) -> Result<NodeRecord>
    where
        F: FnOnce(&mut NodeRecord) + Send,
    {
        let _guard = self.record_lock(id).lock().await;
        let mut record = self.store.get(id).await?;
        update(&mut record);
        self.store.put(id, &record).await?;
        Ok(record)
    }

    /// Choose up to `count` distinct nodes that meet `thresholds`, never
    /// returning a node in `exclude`.
    ///
    /// Returning fewer than `count` nodes is not an error; callers check
    /// [`Selection::is_partial`] against their own minimum.
    #[instrument(skip(self, thresholds, exclude), fields(excluded = exclude.len()))]
    pub async fn select_storage_nodes(
        &self,
        count: usize,
        thresholds: &ReputationThresholds,
        exclude: &[NodeId],
    ) -> Result<Selection> {
        let exclude: HashSet<&NodeId> = exclude.iter().collect();

        // Keyed by ID: dedups and gives a stable order before shuffling
        let mut eligible = BTreeMap::new();
        let mut scanned = 0usize;
        let mut records = self.store.iterate();
        while let Some(record) = records.try_next().await? {
            scanned += 1;
            if exclude.contains(&record.id) || !thresholds.admits(&record) {
                continue;
            }
            eligible.insert(record.id, record);
        }

        let mut candidates: Vec<NodeRecord> = eligible.into_values().collect();
        {
            let mut rng = self.rng.lock();
            candidates.shuffle(&mut *rng);
        }
        candidates.truncate(count);

        let selection = Selection {
            nodes: candidates,
            requested: count,
        };
        debug!(
            scanned,
            selected = selection.len(),
            requested = count,
            "Selected storage nodes"
        );
        Ok(selection)
    }

    /// Record for one node; `NotFound` if unknown
    pub async fn lookup(&self, id: &NodeId) -> Result<NodeRecord> {
        self.store.get(id).await
    }

    /// Records for several nodes, `None` where unknown
    pub async fn lookup_many(&self, ids: &[NodeId]) -> Result<Vec<Option<NodeRecord>>> {
        let mut found = Vec::with_capacity(ids.len());
        for id in ids {
            found.push(self.store.try_get(id).await?);
        }
        Ok(found)
    }

    /// Merge discovery's observations into the store.
    ///
    /// A stored record with a newer last-seen wins. Otherwise address and
    /// last-seen are taken from the observation and reputation is kept.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Result<RefreshStats> {
        let observed = self.discovery.observed_nodes().await?;
        let mut stats = RefreshStats {
            observed: observed.len(),
            ..Default::default()
        };

        for node in observed {
            let _guard = self.record_lock(&node.id).lock().await;
            match self.store.try_get(&node.id).await? {
                None => {
                    self.store.put(&node.id, &node).await?;
                    stats.inserted += 1;
                }
                Some(mut stored) => {
                    if stored.merge_observation(&node) {
                        self.store.put(&node.id, &stored).await?;
                        stats.updated += 1;
                    } else {
                        stats.skipped += 1;
                    }
                }
            }
        }

        info!(
            observed = stats.observed,
            inserted = stats.inserted,
            updated = stats.updated,
            skipped = stats.skipped,
            "Overlay refresh completed"
        );
        Ok(stats)
    }
}
