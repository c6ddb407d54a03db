//! Application-wide defaults

/// Default UDP port the log stream is received on
pub const DEFAULT_UDP_PORT: u16 = 10000;

/// Default HTTP/WebSocket port
pub const DEFAULT_HTTP_PORT: u16 = 20000;

/// Default bind address for both listeners
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1";

/// Largest datagram read from the socket; longer datagrams are truncated
pub const MAX_DATAGRAM_SIZE: usize = 4096;

/// Upper bound accepted for a configured datagram size (max UDP payload)
pub const MAX_UDP_PAYLOAD: usize = 65_507;

/// Pending datagrams buffered per consumer before new ones are dropped
pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;

/// Socket receive buffer size
pub const DEFAULT_RECV_BUFFER_SIZE: usize = 4 * 1024 * 1024;

/// Interval between statistics log lines
pub const DEFAULT_STATS_INTERVAL_SECS: u64 = 5;

/// WebSocket endpoint path
pub const LOG_ENDPOINT: &str = "/log";
