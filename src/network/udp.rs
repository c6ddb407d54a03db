//! Low-level UDP socket handling
//!
//! Sockets are built with `socket2` so the receive buffer can be enlarged
//! before binding.

use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{SocketAddr, UdpSocket as StdUdpSocket};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::UdpSocket as TokioUdpSocket;

use crate::config::NetworkConfig;
use crate::error::NetworkError;

/// Re-export for convenience
pub type UdpSocket = TokioUdpSocket;

/// Create a configured, non-blocking UDP socket bound to the listen address
pub fn create_socket(config: &NetworkConfig) -> Result<StdUdpSocket, NetworkError> {
    let addr = config
        .socket_addr()
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

    let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

    configure_socket(&socket, config)?;

    socket.bind(&addr.into())
        .map_err(|e| NetworkError::BindFailed(format!("{}: {}", addr, e)))?;

    let std_socket: StdUdpSocket = socket.into();
    std_socket.set_nonblocking(true)
        .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

    Ok(std_socket)
}

/// Create async UDP socket for tokio
pub fn create_async_socket(config: &NetworkConfig) -> Result<TokioUdpSocket, NetworkError> {
    let std_socket = create_socket(config)?;
    TokioUdpSocket::from_std(std_socket)
        .map_err(|e| NetworkError::BindFailed(e.to_string()))
}

fn configure_socket(socket: &Socket, config: &NetworkConfig) -> Result<(), NetworkError> {
    if config.reuse_addr {
        socket.set_reuse_address(true)
            .map_err(|e| NetworkError::BindFailed(format!("Failed to set SO_REUSEADDR: {}", e)))?;
    }

    // The kernel may clamp this to net.core.rmem_max; that is not an error.
    if let Err(e) = socket.set_recv_buffer_size(config.recv_buffer_size) {
        tracing::warn!("Failed to set receive buffer to {} bytes: {}", config.recv_buffer_size, e);
    }

    Ok(())
}

/// Blocking datagram sender used by the emitter tool
pub struct PacketSender {
    socket: StdUdpSocket,
    target: SocketAddr,
    packets_sent: AtomicU64,
    bytes_sent: AtomicU64,
}

impl PacketSender {
    /// Bind an ephemeral local socket matching the target's address family
    pub fn connect(target: SocketAddr) -> Result<Self, NetworkError> {
        let local: SocketAddr = if target.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = StdUdpSocket::bind(local)
            .map_err(|e| NetworkError::BindFailed(e.to_string()))?;
        Ok(Self::new(socket, target))
    }

    pub fn new(socket: StdUdpSocket, target: SocketAddr) -> Self {
        Self {
            socket,
            target,
            packets_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
        }
    }

    /// Send one datagram to the target
    pub fn send(&self, data: &[u8]) -> io::Result<usize> {
        let sent = self.socket.send_to(data, self.target)?;
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(sent as u64, Ordering::Relaxed);
        Ok(sent)
    }

    pub fn packets_sent(&self) -> u64 {
        self.packets_sent.load(Ordering::Relaxed)
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }
}
