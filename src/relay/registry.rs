//! Registry of live consumers
//!
//! The only shared mutable structure in the relay. Registration,
//! deregistration and the broadcast snapshot all go through one mutex, so a
//! broadcast sees either the whole effect of a concurrent (de)registration
//! or none of it. The lock is held only for map operations and never across
//! an await point.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::RegistryError;
use crate::relay::queue::{OutboundQueue, SharedQueue};

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Identifies one accepted WebSocket connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConsumerHandle(u64);

impl ConsumerHandle {
    /// Allocate a handle never handed out before in this process
    pub fn next() -> Self {
        Self(NEXT_HANDLE.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConsumerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "consumer-{}", self.0)
    }
}

#[derive(Default)]
struct Members {
    consumers: BTreeMap<ConsumerHandle, SharedQueue>,
    closed: bool,
}

/// Maps each live consumer to its outbound queue
#[derive(Default)]
pub struct ConnectionRegistry {
    members: Mutex<Members>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a consumer. Fails if the handle is already present or the
    /// registry has been closed.
    pub fn register(
        &self,
        handle: ConsumerHandle,
        queue: Arc<OutboundQueue>,
    ) -> Result<(), RegistryError> {
        let mut members = self.members.lock();
        if members.closed {
            return Err(RegistryError::Closed);
        }
        if members.consumers.contains_key(&handle) {
            return Err(RegistryError::DuplicateHandle(handle));
        }
        members.consumers.insert(handle, queue);
        tracing::debug!("Registered {} ({} total)", handle, members.consumers.len());
        Ok(())
    }

    /// Remove a consumer; no-op if it is not registered
    pub fn deregister(&self, handle: ConsumerHandle) -> Option<SharedQueue> {
        let mut members = self.members.lock();
        let removed = members.consumers.remove(&handle);
        if removed.is_some() {
            tracing::debug!("Deregistered {} ({} remaining)", handle, members.consumers.len());
        }
        removed
    }

    /// Every registered queue at one instant, in registration order
    pub fn snapshot_for_broadcast(&self) -> Vec<(ConsumerHandle, SharedQueue)> {
        self.members
            .lock()
            .consumers
            .iter()
            .map(|(handle, queue)| (*handle, queue.clone()))
            .collect()
    }

    /// Close every registered queue and refuse further registrations.
    /// Entries stay until each session deregisters itself.
    pub fn close_all(&self) -> usize {
        let mut members = self.members.lock();
        members.closed = true;
        for queue in members.consumers.values() {
            queue.close();
        }
        members.consumers.len()
    }

    pub fn is_closed(&self) -> bool {
        self.members.lock().closed
    }

    pub fn contains(&self, handle: ConsumerHandle) -> bool {
        self.members.lock().consumers.contains_key(&handle)
    }

    pub fn len(&self) -> usize {
        self.members.lock().consumers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.lock().consumers.is_empty()
    }
}
