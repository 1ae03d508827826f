//! Lookup, Select and Watch Commands
//!
//! All three use the reputation database named by `[overlay] database_url`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tessera_core::config::LookupConfig;
use tessera_core::node::{NodeId, NodeRecord};
use tessera_core::{Config, TesseraError};
use tessera_overlay::{Discovery, OverlayCache, ReputationStore, StaticDiscovery};
use tracing::info;

async fn open_cache(cfg: &Config, discovery: Arc<dyn Discovery>) -> Result<OverlayCache> {
    let store = ReputationStore::open(&cfg.overlay.database_url)
        .await
        .with_context(|| format!("failed to open {}", cfg.overlay.database_url))?;
    Ok(OverlayCache::from_entropy(Arc::new(store), discovery))
}

/// One entry of an observations file
#[derive(Debug, Deserialize)]
struct ObservedNode {
    /// Base58 node ID
    id: String,
    address: String,
}

/// Discovery fed by a JSON array of `{"id", "address"}` entries.
///
/// The file is read again on every pass, and every entry counts as seen at
/// read time.
pub struct FileDiscovery {
    path: PathBuf,
}

impl FileDiscovery {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl Discovery for FileDiscovery {
    async fn observed_nodes(&self) -> tessera_core::Result<Vec<NodeRecord>> {
        let content = tokio::fs::read(&self.path).await?;
        let entries: Vec<ObservedNode> = serde_json::from_slice(&content).map_err(|e| {
            TesseraError::Serialization(format!("{}: {}", self.path.display(), e))
        })?;
        entries
            .into_iter()
            .map(|entry| Ok(NodeRecord::new(NodeId::from_base58(&entry.id)?, entry.address)))
            .collect()
    }
}

/// Print the record of every requested node; unknown IDs are reported
pub async fn lookup(cfg: &Config, lookup: &LookupConfig, json: bool) -> Result<()> {
    let ids = lookup.parse_ids()?;
    let cache = open_cache(cfg, Arc::new(StaticDiscovery::default())).await?;
    let records = cache.lookup_many(&ids).await?;

    let mut missing = 0;
    for (id, record) in ids.iter().zip(records) {
        match record {
            Some(record) => print_record(&record, json)?,
            None => {
                missing += 1;
                println!("{}  not found", id);
            }
        }
    }

    if missing > 0 {
        tracing::warn!(missing, requested = ids.len(), "Some nodes are unknown");
    }
    Ok(())
}

/// Run one selection with the configured thresholds
pub async fn select(cfg: &Config, count: usize, exclude: Option<&str>, json: bool) -> Result<()> {
    let exclude = match exclude {
        Some(ids) => NodeId::parse_list(ids, ",")?,
        None => Vec::new(),
    };
    let cache = open_cache(cfg, Arc::new(StaticDiscovery::default())).await?;
    let selection = cache
        .select_storage_nodes(count, &cfg.thresholds(), &exclude)
        .await?;

    for record in &selection.nodes {
        print_record(record, json)?;
    }
    if selection.is_partial() {
        println!(
            "Selected {} of {} requested nodes",
            selection.len(),
            selection.requested
        );
    } else {
        println!("Selected {} nodes", selection.len());
    }
    Ok(())
}

/// Keep the reputation database fresh from `observed` until interrupted
pub async fn watch(cfg: &Config, observed: PathBuf) -> Result<()> {
    let discovery = Arc::new(FileDiscovery::new(&observed));
    // Fail fast on a missing or malformed file instead of on every tick
    let initial = discovery
        .observed_nodes()
        .await
        .with_context(|| format!("cannot read observations from {}", observed.display()))?;

    let cache = Arc::new(open_cache(cfg, discovery).await?);
    let every = cfg.overlay.refresh_interval();
    let refresh = cache.spawn_refresh(every);
    println!(
        "Refreshing from {} ({} nodes) every {:?}; Ctrl-C to stop",
        observed.display(),
        initial.len(),
        every
    );

    tokio::signal::ctrl_c().await?;
    info!("Interrupted, stopping refresh");
    refresh.stop().await;
    cache.store().flush().await?;
    Ok(())
}

fn print_record(record: &NodeRecord, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(record)?);
    } else {
        println!(
            "{}  {}  uptime {:.3} ({})  audits {:.3} ({})  seen {}",
            record.id,
            record.address,
            record.uptime_ratio,
            record.uptime_count,
            record.audit_success_ratio,
            record.audit_count,
            record.last_seen.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}
