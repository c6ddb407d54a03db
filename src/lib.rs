//! UDP log viewer
//!
//! Receives log lines as UDP datagrams and fans every datagram out to all
//! connected browser clients over WebSocket, so several viewers can tail the
//! same live stream.
//!
//! ```text
//! UDP socket ──► BroadcastLoop ──► ConnectionRegistry ──► OutboundQueue ──► ConsumerSession ──► browser
//!                                        │                     (one per consumer)
//!                                        └──────────────────► OutboundQueue ──► ConsumerSession ──► browser
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod network;
pub mod relay;
pub mod shutdown;
pub mod ui;

pub use error::{Error, Result};
