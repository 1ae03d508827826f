//! Per-node fan-out with quorum-decided completion
//!
//! Every piece transfer runs as its own task with an individual timeout.
//! The fan-out ends as soon as enough transfers succeeded or too few remain
//! to ever reach the required count; whatever is still in flight is aborted.
//! Transfers that completed before the abort took effect are reported
//! separately so callers can undo them.

use futures::future::BoxFuture;
use std::time::{Duration, Instant};
use tessera_core::error::{Result, TesseraError};
use tessera_core::node::NodeId;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// One transfer to launch
pub struct PieceTask<T> {
    pub node_id: NodeId,
    pub piece_index: u16,
    pub transfer: BoxFuture<'static, Result<T>>,
}

/// Result of a single node operation
#[derive(Debug)]
pub struct NodeResult<T> {
    pub node_id: NodeId,
    pub piece_index: u16,
    pub result: Result<T>,
    pub latency_ms: u64,
}

/// Aggregated fan-out result
#[derive(Debug)]
pub struct FanoutOutcome<T> {
    pub successes: Vec<NodeResult<T>>,
    pub failures: Vec<NodeResult<T>>,
    /// Transfers still in flight when the fan-out was decided
    pub aborted: usize,
    /// Of those, the ones that had already succeeded
    pub late: Vec<NodeResult<T>>,
    /// The caller's token fired before the fan-out was decided
    pub cancelled: bool,
}

impl<T> FanoutOutcome<T> {
    pub fn success_count(&self) -> usize {
        self.successes.len()
    }

    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }
}

/// When a fan-out is decided
#[derive(Debug, Clone, Copy)]
pub struct Quorum {
    /// Stop once this many transfers succeeded
    pub stop_after: usize,
    /// Give up once this many can no longer succeed
    pub required: usize,
}

/// Run `tasks` concurrently until the quorum is decided or `cancel` fires
pub async fn run<T: Send + 'static>(
    tasks: Vec<PieceTask<T>>,
    node_timeout: Duration,
    quorum: Quorum,
    cancel: &CancellationToken,
) -> FanoutOutcome<T> {
    let total = tasks.len();
    let mut set = JoinSet::new();

    for task in tasks {
        set.spawn(async move {
            let start = Instant::now();
            let result = match timeout(node_timeout, task.transfer).await {
                Ok(result) => result,
                Err(_) => Err(TesseraError::Timeout {
                    node: task.node_id.to_string(),
                }),
            };
            NodeResult {
                node_id: task.node_id,
                piece_index: task.piece_index,
                result,
                latency_ms: start.elapsed().as_millis() as u64,
            }
        });
    }

    let mut outcome = FanoutOutcome {
        successes: Vec::new(),
        failures: Vec::new(),
        aborted: 0,
        late: Vec::new(),
        cancelled: false,
    };

    loop {
        if outcome.successes.len() >= quorum.stop_after {
            break;
        }
        if outcome.successes.len() + set.len() < quorum.required {
            break;
        }

        let joined = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                outcome.cancelled = true;
                break;
            }
            joined = set.join_next() => joined,
        };

        match joined {
            None => break,
            Some(Ok(node_result)) => {
                if node_result.result.is_ok() {
                    outcome.successes.push(node_result);
                } else {
                    debug!(
                        node = %node_result.node_id,
                        piece = node_result.piece_index,
                        error = ?node_result.result.as_ref().err(),
                        "Piece transfer failed"
                    );
                    outcome.failures.push(node_result);
                }
            }
            // A panicked transfer has lost its node identity; it only
            // counts against the remaining capacity.
            Some(Err(e)) => debug!(error = %e, "Piece transfer task failed"),
        }
    }

    outcome.aborted = set.len();
    set.abort_all();
    while let Some(joined) = set.join_next().await {
        if let Ok(node_result) = joined {
            if node_result.result.is_ok() {
                outcome.late.push(node_result);
            }
        }
    }

    debug!(
        total,
        successes = outcome.successes.len(),
        failures = outcome.failures.len(),
        aborted = outcome.aborted,
        late = outcome.late.len(),
        cancelled = outcome.cancelled,
        "Fan-out decided"
    );
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn task(i: u16, delay_ms: u64, ok: bool, done: Arc<AtomicUsize>) -> PieceTask<u16> {
        PieceTask {
            node_id: NodeId::from_seed(&i.to_le_bytes()),
            piece_index: i,
            transfer: async move {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                done.fetch_add(1, Ordering::SeqCst);
                if ok {
                    Ok(i)
                } else {
                    Err(TesseraError::Transport("refused".into()))
                }
            }
            .boxed(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_after_enough_successes() {
        let done = Arc::new(AtomicUsize::new(0));
        let tasks = (0..10)
            .map(|i| task(i, if i < 4 { 10 } else { 10_000 }, true, done.clone()))
            .collect();

        let outcome = run(
            tasks,
            Duration::from_secs(60),
            Quorum { stop_after: 4, required: 2 },
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(outcome.success_count(), 4);
        assert_eq!(outcome.aborted, 6);
        assert!(outcome.late.is_empty());
        assert!(!outcome.cancelled);

        // Aborted stragglers never finish
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(done.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_when_required_is_unreachable() {
        let done = Arc::new(AtomicUsize::new(0));
        let mut tasks: Vec<_> = (0..3).map(|i| task(i, 1, false, done.clone())).collect();
        tasks.extend((3..5).map(|i| task(i, 10_000, true, done.clone())));

        let outcome = run(
            tasks,
            Duration::from_secs(60),
            Quorum { stop_after: 5, required: 3 },
            &CancellationToken::new(),
        )
        .await;

        // After 2 failures only 3 could succeed; after the third, 2 < 3
        assert_eq!(outcome.failure_count(), 3);
        assert_eq!(outcome.success_count(), 0);
        assert_eq!(outcome.aborted, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_individual_timeouts() {
        let done = Arc::new(AtomicUsize::new(0));
        let tasks = vec![task(0, 1, true, done.clone()), task(1, 5_000, true, done.clone())];

        let outcome = run(
            tasks,
            Duration::from_millis(100),
            Quorum { stop_after: 2, required: 1 },
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(outcome.success_count(), 1);
        assert_eq!(outcome.failure_count(), 1);
        assert!(matches!(
            outcome.failures[0].result,
            Err(TesseraError::Timeout { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation() {
        let done = Arc::new(AtomicUsize::new(0));
        let tasks = (0..4).map(|i| task(i, 1_000, true, done.clone())).collect();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let outcome = run(
            tasks,
            Duration::from_secs(60),
            Quorum { stop_after: 4, required: 4 },
            &cancel,
        )
        .await;
        assert!(outcome.cancelled);
        assert_eq!(outcome.success_count(), 0);
        assert_eq!(outcome.aborted, 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_finished_stragglers_are_reported() {
        let done = Arc::new(AtomicUsize::new(0));
        let tasks = (0..20).map(|i| task(i, 0, true, done.clone())).collect();

        let outcome = run(
            tasks,
            Duration::from_secs(60),
            Quorum { stop_after: 1, required: 1 },
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(outcome.success_count(), 1);
        assert_eq!(
            outcome.success_count() + outcome.late.len(),
            done.load(Ordering::SeqCst)
        );
    }
}
