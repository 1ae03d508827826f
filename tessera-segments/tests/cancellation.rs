//! Cancelling uploads and downloads mid-stream

mod common;

use common::{cluster, random_bytes, ClusterOptions, SEGMENT_SIZE};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tessera_core::TesseraError;
use tokio::io::{AsyncRead, ReadBuf};
use tokio_util::sync::CancellationToken;

/// Serves `data` until `cancel_at` bytes were read, then cancels `token`
/// and never yields again
struct CancellingReader {
    data: Vec<u8>,
    pos: usize,
    cancel_at: usize,
    token: CancellationToken,
}

impl AsyncRead for CancellingReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        if self.pos >= self.cancel_at {
            self.token.cancel();
            return Poll::Pending;
        }
        let end = (self.pos + buf.remaining()).min(self.cancel_at);
        let start = self.pos;
        buf.put_slice(&self.data[start..end]);
        self.pos = end;
        Poll::Ready(Ok(()))
    }
}

#[tokio::test]
async fn test_cancel_while_reading_keeps_committed_segments() {
    let c = cluster(ClusterOptions {
        pipeline_depth: 1,
        ..Default::default()
    })
    .await;
    let data = random_bytes(150_000, 20);
    let cancel = CancellationToken::new();
    let reader = CancellingReader {
        data: data.clone(),
        pos: 0,
        cancel_at: 2 * SEGMENT_SIZE as usize,
        token: cancel.clone(),
    };

    let err = c.streams.put("x", reader, &cancel).await.unwrap_err();
    assert!(matches!(err, TesseraError::Cancelled));

    let meta = c.streams.stat("x").await.unwrap();
    assert!(!meta.complete);
    assert_eq!(meta.segment_count, 2);
    assert_eq!(meta.total_size, 2 * SEGMENT_SIZE);
    assert!(c
        .pointers
        .try_get_segment(&meta.stream_id, 2)
        .await
        .unwrap()
        .is_none());

    // Committed prefix stays readable
    let read = c
        .streams
        .get_bytes("x", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(&read[..], &data[..2 * SEGMENT_SIZE as usize]);
}

#[tokio::test]
async fn test_cancelled_upload_leaves_no_uncommitted_pieces() {
    let c = cluster(ClusterOptions {
        pipeline_depth: 4,
        ..Default::default()
    })
    .await;
    for node in &c.nodes {
        c.transport.set_latency(*node, Duration::from_millis(200));
    }
    let data = random_bytes(150_000, 21);
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = c.streams.put("x", &data[..], &cancel).await.unwrap_err();
    assert!(matches!(err, TesseraError::Cancelled));

    let meta = c.streams.stat("x").await.unwrap();
    assert_eq!(meta.segment_count, 0);
    // Let the in-flight deletes settle
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(c.transport.piece_count(), 0);
}

#[tokio::test]
async fn test_dropped_upload_leaves_no_uncommitted_pieces() {
    let c = cluster(ClusterOptions {
        pipeline_depth: 4,
        ..Default::default()
    })
    .await;
    // Fast nodes hold their pieces by the time the put is dropped
    for node in &c.nodes[..50] {
        c.transport.set_latency(*node, Duration::from_secs(2));
    }
    let data = random_bytes(150_000, 24);
    let cancel = CancellationToken::new();

    // The put future is dropped without its token ever being cancelled
    let put = tokio::time::timeout(
        Duration::from_millis(300),
        c.streams.put("x", &data[..], &cancel),
    )
    .await;
    assert!(put.is_err());
    assert!(!cancel.is_cancelled());
    assert!(c.transport.piece_count() > 0);

    let meta = c.streams.stat("x").await.unwrap();
    assert!(!meta.complete);
    assert_eq!(meta.segment_count, 0);
    for _ in 0..100 {
        if c.transport.piece_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(c.transport.piece_count(), 0);
}

#[tokio::test]
async fn test_cancelled_download() {
    let c = cluster(ClusterOptions::default()).await;
    let data = random_bytes(150_000, 22);
    c.streams
        .put("x", &data[..], &CancellationToken::new())
        .await
        .unwrap();

    for node in &c.nodes {
        c.transport.set_latency(*node, Duration::from_secs(10));
    }
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let mut out = Vec::new();
    let err = c.streams.get("x", &mut out, &cancel).await.unwrap_err();
    assert!(matches!(err, TesseraError::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(out.is_empty());
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let c = cluster(ClusterOptions::default()).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let data = random_bytes(10_000, 23);
    let err = c.streams.put("x", &data[..], &cancel).await.unwrap_err();
    assert!(matches!(err, TesseraError::Cancelled));
    assert_eq!(c.transport.put_count(), 0);
}
