//! In-process cluster shared by the pipeline tests

#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use tessera_core::encryption::{Cipher, EncryptionScheme, Key, PathCipher};
use tessera_core::node::{NodeId, NodeRecord};
use tessera_core::redundancy::RedundancyScheme;
use tessera_overlay::{OverlayCache, ReputationStore, StaticDiscovery};
use tessera_segments::{MemoryTransport, PointerStore, SegmentPipeline, StreamPipeline};

pub const SEGMENT_SIZE: u64 = 64_000;

pub struct Cluster {
    pub nodes: Vec<NodeId>,
    pub overlay: Arc<OverlayCache>,
    pub transport: Arc<MemoryTransport>,
    pub pointers: Arc<PointerStore>,
    pub segments: Arc<SegmentPipeline>,
    pub streams: StreamPipeline,
}

pub struct ClusterOptions {
    pub nodes: usize,
    pub optimal_shares: u16,
    pub pipeline_depth: usize,
    pub piece_timeout: Duration,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            nodes: 95,
            optimal_shares: 95,
            pipeline_depth: 2,
            piece_timeout: Duration::from_secs(30),
        }
    }
}

pub async fn cluster(options: ClusterOptions) -> Cluster {
    let store = Arc::new(ReputationStore::open("memory://").await.unwrap());
    let mut nodes = Vec::with_capacity(options.nodes);
    for i in 0..options.nodes {
        let id = NodeId::from_seed(format!("node-{}", i).as_bytes());
        let record = NodeRecord::new(id, format!("10.0.0.{}:7777", i));
        store.put(&id, &record).await.unwrap();
        nodes.push(id);
    }

    let overlay = Arc::new(OverlayCache::with_seed(
        store,
        Arc::new(StaticDiscovery::default()),
        42,
    ));
    let transport = Arc::new(MemoryTransport::new());
    let redundancy = RedundancyScheme::new(29, 35, options.optimal_shares, 95, 1024).unwrap();
    let encryption = EncryptionScheme::new(Cipher::AesGcm, 1024, &redundancy).unwrap();
    let segments = Arc::new(
        SegmentPipeline::new(Arc::clone(&overlay), transport.clone(), redundancy, encryption)
            .with_piece_timeout(options.piece_timeout),
    );

    let pointers = Arc::new(PointerStore::open("memory://").await.unwrap());
    let streams = StreamPipeline::new(
        Arc::clone(&segments),
        Arc::clone(&pointers),
        Key::from_bytes([7; 32]),
        PathCipher::AesGcm,
    )
    .with_segment_size(SEGMENT_SIZE)
    .with_pipeline_depth(options.pipeline_depth);

    Cluster {
        nodes,
        overlay,
        transport,
        pointers,
        segments,
        streams,
    }
}

pub fn random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut data = vec![0u8; len];
    StdRng::seed_from_u64(seed).fill_bytes(&mut data);
    data
}
