//! Inbound datagram stream
//!
//! The broadcast loop only needs "give me the next datagram"; everything
//! socket-specific stays behind [`DatagramSource`].

use bytes::Bytes;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::NetworkConfig;
use crate::error::NetworkError;
use crate::network::udp::{create_async_socket, UdpSocket};

/// A stream of opaque datagrams, one per read
pub trait DatagramSource: Send {
    /// Wait for the next datagram. An error ends ingestion.
    fn recv(&mut self) -> impl Future<Output = Result<Bytes, NetworkError>> + Send;
}

/// Socket-level counters not visible to the broadcast loop
#[derive(Debug, Default)]
pub struct SourceCounters {
    truncated: AtomicU64,
}

impl SourceCounters {
    /// Datagrams that filled the whole read buffer and were likely cut short
    pub fn truncated(&self) -> u64 {
        self.truncated.load(Ordering::Relaxed)
    }
}

/// UDP socket reading at most `max_datagram_size` bytes per datagram
pub struct UdpDatagramSource {
    socket: UdpSocket,
    recv_buffer: Vec<u8>,
    counters: Arc<SourceCounters>,
}

impl UdpDatagramSource {
    /// Bind according to the network configuration
    pub fn bind(config: &NetworkConfig) -> Result<Self, NetworkError> {
        let socket = create_async_socket(config)?;
        Ok(Self::from_socket(socket, config.max_datagram_size))
    }

    pub fn from_socket(socket: UdpSocket, max_datagram_size: usize) -> Self {
        Self {
            socket,
            recv_buffer: vec![0u8; max_datagram_size],
            counters: Arc::new(SourceCounters::default()),
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NetworkError> {
        self.socket
            .local_addr()
            .map_err(|e| NetworkError::BindFailed(e.to_string()))
    }

    pub fn counters(&self) -> Arc<SourceCounters> {
        self.counters.clone()
    }
}

impl DatagramSource for UdpDatagramSource {
    async fn recv(&mut self) -> Result<Bytes, NetworkError> {
        let (size, addr) = self
            .socket
            .recv_from(&mut self.recv_buffer)
            .await
            .map_err(|e| NetworkError::ReceiveFailed(e.to_string()))?;

        if size == self.recv_buffer.len() {
            self.counters.truncated.fetch_add(1, Ordering::Relaxed);
        }
        tracing::trace!("Received {} bytes from {}", size, addr);

        Ok(Bytes::copy_from_slice(&self.recv_buffer[..size]))
    }
}
