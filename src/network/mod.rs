//! UDP ingestion
//!
//! - `udp`: socket construction and a small blocking sender
//! - `source`: the [`DatagramSource`] abstraction and its UDP implementation

pub mod source;
pub mod udp;

pub use source::{DatagramSource, SourceCounters, UdpDatagramSource};
pub use udp::{create_async_socket, create_socket, PacketSender, UdpSocket};
