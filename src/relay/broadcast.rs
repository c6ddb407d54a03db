//! Ingestion loop fanning each datagram out to every registered consumer

use bytes::Bytes;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::NetworkError;
use crate::network::DatagramSource;
use crate::relay::queue::PushOutcome;
use crate::relay::registry::ConnectionRegistry;
use crate::shutdown::ShutdownSignal;

/// Counters maintained by the broadcast loop
#[derive(Debug, Default)]
pub struct BroadcastStats {
    running: AtomicBool,
    datagrams_received: AtomicU64,
    bytes_received: AtomicU64,
    deliveries_queued: AtomicU64,
    deliveries_dropped: AtomicU64,
}

/// Point-in-time copy of [`BroadcastStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastStatsSnapshot {
    pub ingest_running: bool,
    pub datagrams_received: u64,
    pub bytes_received: u64,
    pub deliveries_queued: u64,
    pub deliveries_dropped: u64,
}

impl BroadcastStats {
    pub fn snapshot(&self) -> BroadcastStatsSnapshot {
        BroadcastStatsSnapshot {
            ingest_running: self.running.load(Ordering::SeqCst),
            datagrams_received: self.datagrams_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            deliveries_queued: self.deliveries_queued.load(Ordering::Relaxed),
            deliveries_dropped: self.deliveries_dropped.load(Ordering::Relaxed),
        }
    }
}

/// What happened to one datagram during fan-out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOut {
    pub queued: usize,
    pub dropped: usize,
    pub closed: usize,
}

/// Why the loop returned
#[derive(Debug)]
pub enum LoopExit {
    /// Shutdown was requested; every registered queue has been closed
    Shutdown,
    /// The source failed; consumers keep draining what they already hold
    SourceFailed(NetworkError),
}

/// Reads datagrams and pushes each one into every registered queue
pub struct BroadcastLoop {
    registry: Arc<ConnectionRegistry>,
    stats: Arc<BroadcastStats>,
}

impl BroadcastLoop {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            stats: Arc::new(BroadcastStats::default()),
        }
    }

    /// Shared statistics handle
    pub fn stats(&self) -> Arc<BroadcastStats> {
        self.stats.clone()
    }

    /// Run until the source fails or shutdown is signalled
    pub async fn run<S: DatagramSource>(&self, mut source: S, mut shutdown: ShutdownSignal) -> LoopExit {
        self.stats.running.store(true, Ordering::SeqCst);
        tracing::info!("Broadcast loop started");

        let exit = loop {
            let received = tokio::select! {
                biased;
                _ = shutdown.wait() => {
                    let closed = self.registry.close_all();
                    tracing::info!("Broadcast loop stopping, closed {} consumer queues", closed);
                    break LoopExit::Shutdown;
                }
                received = source.recv() => received,
            };

            match received {
                Ok(datagram) => {
                    self.fan_out(datagram);
                }
                Err(e) => {
                    tracing::error!("Ingestion stopped: {}", e);
                    break LoopExit::SourceFailed(e);
                }
            }
        };

        self.stats.running.store(false, Ordering::SeqCst);
        exit
    }

    /// Push one datagram into every queue registered right now
    pub fn fan_out(&self, datagram: Bytes) -> FanOut {
        self.stats.datagrams_received.fetch_add(1, Ordering::Relaxed);
        self.stats.bytes_received.fetch_add(datagram.len() as u64, Ordering::Relaxed);

        let mut result = FanOut::default();
        for (handle, queue) in self.registry.snapshot_for_broadcast() {
            match queue.push(datagram.clone()) {
                PushOutcome::Queued => result.queued += 1,
                PushOutcome::Dropped => {
                    tracing::trace!("{} queue full, dropped {} bytes", handle, datagram.len());
                    result.dropped += 1;
                }
                // The session is already on its way out.
                PushOutcome::Closed => result.closed += 1,
            }
        }

        self.stats.deliveries_queued.fetch_add(result.queued as u64, Ordering::Relaxed);
        self.stats.deliveries_dropped.fetch_add(result.dropped as u64, Ordering::Relaxed);
        tracing::debug!(
            "Fanned out {} bytes to {} consumers ({} dropped)",
            datagram.len(),
            result.queued,
            result.dropped
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::queue::OutboundQueue;
    use crate::relay::registry::ConsumerHandle;
    use crate::shutdown::Shutdown;
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Datagram source fed from a channel; a closed channel reads as a socket error
    struct ChannelSource(mpsc::UnboundedReceiver<Bytes>);

    impl DatagramSource for ChannelSource {
        async fn recv(&mut self) -> Result<Bytes, NetworkError> {
            self.0
                .recv()
                .await
                .ok_or_else(|| NetworkError::ReceiveFailed("socket closed".into()))
        }
    }

    fn register(registry: &ConnectionRegistry, capacity: usize) -> (ConsumerHandle, Arc<OutboundQueue>) {
        let handle = ConsumerHandle::next();
        let queue = Arc::new(OutboundQueue::new(capacity));
        registry.register(handle, queue.clone()).unwrap();
        (handle, queue)
    }

    fn drain(queue: &OutboundQueue) -> Vec<Bytes> {
        std::iter::from_fn(|| queue.try_pop()).collect()
    }

    #[test]
    fn test_two_consumers_receive_in_order() {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = BroadcastLoop::new(registry.clone());
        let (_, first) = register(&registry, 16);
        let (_, second) = register(&registry, 16);

        for line in ["A", "B", "C"] {
            broadcaster.fan_out(Bytes::from(line));
        }

        assert_eq!(drain(&first), vec!["A", "B", "C"]);
        assert_eq!(drain(&second), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_full_consumer_does_not_affect_others() {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = BroadcastLoop::new(registry.clone());
        let (_, slow) = register(&registry, 2);
        let (_, fast) = register(&registry, 16);

        let results: Vec<_> = (0..5)
            .map(|i| broadcaster.fan_out(Bytes::from(i.to_string())))
            .collect();

        assert_eq!(results[1], FanOut { queued: 2, dropped: 0, closed: 0 });
        assert_eq!(results[4], FanOut { queued: 1, dropped: 1, closed: 0 });
        assert_eq!(slow.dropped_count(), 3);
        assert_eq!(drain(&slow), vec!["0", "1"]);
        assert_eq!(drain(&fast), vec!["0", "1", "2", "3", "4"]);
        assert_eq!(broadcaster.stats().snapshot().deliveries_dropped, 3);
    }

    #[test]
    fn test_no_delivery_outside_registration() {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = BroadcastLoop::new(registry.clone());

        broadcaster.fan_out(Bytes::from("before"));
        let (handle, queue) = register(&registry, 16);
        broadcaster.fan_out(Bytes::from("during"));
        registry.deregister(handle);
        broadcaster.fan_out(Bytes::from("after"));

        assert_eq!(drain(&queue), vec!["during"]);
    }

    #[test]
    fn test_closed_queue_counts_as_closed() {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = BroadcastLoop::new(registry.clone());
        let (_, queue) = register(&registry, 16);
        queue.close();

        let result = broadcaster.fan_out(Bytes::from("x"));
        assert_eq!(result, FanOut { queued: 0, dropped: 0, closed: 1 });
    }

    #[tokio::test]
    async fn test_source_failure_keeps_queues_open() {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = BroadcastLoop::new(registry.clone());
        let (_, queue) = register(&registry, 16);

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(Bytes::from("one")).unwrap();
        tx.send(Bytes::from("two")).unwrap();
        drop(tx);

        let shutdown = Shutdown::new();
        let exit = broadcaster.run(ChannelSource(rx), shutdown.signal()).await;

        assert!(matches!(exit, LoopExit::SourceFailed(NetworkError::ReceiveFailed(_))));
        assert!(!queue.is_closed());
        assert_eq!(drain(&queue), vec!["one", "two"]);

        let stats = broadcaster.stats().snapshot();
        assert!(!stats.ingest_running);
        assert_eq!(stats.datagrams_received, 2);
        assert_eq!(stats.bytes_received, 6);
    }

    #[tokio::test]
    async fn test_shutdown_closes_registered_queues() {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = Arc::new(BroadcastLoop::new(registry.clone()));
        let (_, queue) = register(&registry, 16);

        let (tx, rx) = mpsc::unbounded_channel::<Bytes>();
        let shutdown = Shutdown::new();
        let task = {
            let broadcaster = broadcaster.clone();
            let signal = shutdown.signal();
            tokio::spawn(async move { broadcaster.run(ChannelSource(rx), signal).await })
        };

        tx.send(Bytes::from("last words")).unwrap();
        tokio::time::timeout(Duration::from_secs(1), async {
            while queue.is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        shutdown.trigger();
        let exit = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();

        assert!(matches!(exit, LoopExit::Shutdown));
        assert!(queue.is_closed());
        assert_eq!(queue.pop().await.unwrap(), "last words");
        assert!(queue.pop().await.is_none());
    }
}
