//! Browser-facing side: index page and the WebSocket log stream

pub mod page;
pub mod server;
pub mod websocket;

pub use server::{AppState, RelayStatus, WebServer};
