//! Error types

use thiserror::Error;

use crate::relay::ConsumerHandle;

/// Crate-level error
#[derive(Debug, Error)]
pub enum Error {
    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    #[error("session error: {0}")]
    Session(#[from] SessionError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Socket-level failures on the UDP side
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("failed to bind socket: {0}")]
    BindFailed(String),

    #[error("failed to receive datagram: {0}")]
    ReceiveFailed(String),

    #[error("failed to send datagram: {0}")]
    SendFailed(String),
}

/// Registry mutations that cannot be applied
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("consumer {0} is already registered")]
    DuplicateHandle(ConsumerHandle),

    #[error("registry is closed to new consumers")]
    Closed,
}

/// Failures that end one consumer session
#[derive(Debug, Error)]
pub enum SessionError {
    /// The client never sent a usable readiness frame
    #[error("protocol error: {0}")]
    Protocol(String),

    /// WebSocket read or write failed
    #[error("transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

pub type Result<T> = std::result::Result<T, Error>;
