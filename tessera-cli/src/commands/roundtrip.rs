//! Roundtrip Command
//!
//! Stores a file on an in-process cluster of simulated nodes, reads it back
//! and checks the result. Exercises the full pipeline with the configured
//! redundancy, encryption and segment settings.

use super::format_size;
use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tessera_core::node::{NodeId, NodeRecord};
use tessera_core::piece::ContentHash;
use tessera_core::Config;
use tessera_overlay::{OverlayCache, ReputationStore, StaticDiscovery};
use tessera_segments::{
    segment_sizes, MemoryTransport, PointerStore, SegmentPipeline, StreamPipeline,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Roundtrip options
pub struct RoundtripConfig {
    pub path: PathBuf,
    pub nodes: usize,
    pub offline: usize,
}

pub async fn run(cfg: &Config, options: RoundtripConfig) -> Result<()> {
    let size = tokio::fs::metadata(&options.path)
        .await
        .with_context(|| format!("cannot read {}", options.path.display()))?
        .len();

    let store = Arc::new(ReputationStore::open("memory://").await?);
    let transport = Arc::new(MemoryTransport::new());
    for i in 0..options.nodes {
        let id = NodeId::from_seed(format!("roundtrip-node-{}", i).as_bytes());
        store
            .put(&id, &NodeRecord::new(id, format!("127.0.0.1:{}", 7000 + i)))
            .await?;
        if i < options.offline {
            transport.set_offline(id, true);
        }
    }
    info!(nodes = options.nodes, offline = options.offline, "Simulated cluster ready");

    let overlay = Arc::new(OverlayCache::from_entropy(
        store,
        Arc::new(StaticDiscovery::default()),
    ));
    let segments = Arc::new(SegmentPipeline::from_config(
        cfg,
        overlay,
        transport.clone(),
    )?);
    let pointers = Arc::new(PointerStore::open("memory://").await?);
    let streams = StreamPipeline::from_config(cfg, segments, pointers);

    let plan = segment_sizes(size, cfg.client.segment_size);
    println!(
        "{}: {} in {} segment(s)",
        options.path.display(),
        format_size(size),
        plan.len()
    );
    for (index, segment) in plan.iter().enumerate() {
        let placement = if *segment as usize <= cfg.client.max_inline_size {
            "inline"
        } else {
            "remote"
        };
        println!("  segment {:>4}  {:>12}  {}", index, format_size(*segment), placement);
    }

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let path = options.path.to_string_lossy().into_owned();
    let file = tokio::fs::File::open(&options.path).await?;
    let started = Instant::now();
    let meta = streams.put(&path, file, &cancel).await?;
    let upload = started.elapsed();
    println!(
        "Stored {} across {} pieces in {:.2?}",
        format_size(meta.total_size),
        transport.piece_count(),
        upload
    );

    let started = Instant::now();
    let read = streams.get_bytes(&path, &cancel).await?;
    println!("Read back {} in {:.2?}", format_size(read.len() as u64), started.elapsed());

    let original = tokio::fs::read(&options.path).await?;
    if ContentHash::compute(&original) != ContentHash::compute(&read) {
        bail!("read-back content differs from {}", options.path.display());
    }
    println!("Content verified");
    Ok(())
}
