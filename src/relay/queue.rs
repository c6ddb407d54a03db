//! Bounded per-consumer outbound queue
//!
//! Single producer (the broadcast loop), single consumer (the owning
//! session). Pushing never blocks: when the queue is full the new datagram
//! is dropped for this consumer only.

use bytes::Bytes;
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Result of offering a datagram to a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Buffered for delivery
    Queued,
    /// Queue full, datagram discarded for this consumer
    Dropped,
    /// Queue closed, datagram discarded
    Closed,
}

/// Bounded FIFO of datagrams awaiting delivery to one consumer
pub struct OutboundQueue {
    queue: ArrayQueue<Bytes>,
    notify: Notify,
    closed: AtomicBool,
    queued_count: AtomicU64,
    dropped_count: AtomicU64,
}

impl OutboundQueue {
    /// Create a queue holding at most `capacity` datagrams
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            queued_count: AtomicU64::new(0),
            dropped_count: AtomicU64::new(0),
        }
    }

    /// Offer a datagram without blocking
    pub fn push(&self, datagram: Bytes) -> PushOutcome {
        if self.is_closed() {
            return PushOutcome::Closed;
        }

        match self.queue.push(datagram) {
            Ok(()) => {
                self.queued_count.fetch_add(1, Ordering::Relaxed);
                self.notify.notify_one();
                PushOutcome::Queued
            }
            Err(_) => {
                self.dropped_count.fetch_add(1, Ordering::Relaxed);
                PushOutcome::Dropped
            }
        }
    }

    /// Take the oldest datagram, waiting while the queue is empty.
    ///
    /// After [`close`](Self::close) the datagrams still buffered are
    /// returned before `None`. Cancel safe: dropping the future loses nothing.
    pub async fn pop(&self) -> Option<Bytes> {
        loop {
            if let Some(datagram) = self.queue.pop() {
                return Some(datagram);
            }
            if self.is_closed() {
                // A push may have landed between the pop above and the flag check.
                return self.queue.pop();
            }
            // notify_one stores a permit when nobody waits, so a push racing
            // with this registration still wakes us.
            self.notify.notified().await;
        }
    }

    /// Take the oldest datagram if one is buffered
    pub fn try_pop(&self) -> Option<Bytes> {
        self.queue.pop()
    }

    /// Stop accepting datagrams and wake the consumer
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.notify.notify_one();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Datagrams accepted so far
    pub fn queued_count(&self) -> u64 {
        self.queued_count.load(Ordering::Relaxed)
    }

    /// Datagrams discarded because the queue was full
    pub fn dropped_count(&self) -> u64 {
        self.dropped_count.load(Ordering::Relaxed)
    }
}

/// Thread-safe handle to an outbound queue
pub type SharedQueue = Arc<OutboundQueue>;
