//! WebSocket endpoint streaming the log to one browser

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;

use crate::error::SessionError;
use crate::relay::{ClientFrame, ConsumerSession, FrameKind, FrameSink, FrameStream};
use crate::ui::server::AppState;

/// WebSocket upgrade handler
pub async fn log_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (sender, receiver) = socket.split();
    let mut session = ConsumerSession::new(state.registry.clone(), state.queue_capacity);
    tracing::debug!("{} upgraded", session.handle());

    // Outcome is logged by the session itself.
    let _ = session.run(WsSink(sender), WsStream(receiver)).await;
}

/// Write half of an upgraded socket
pub struct WsSink(SplitSink<WebSocket, Message>);

impl FrameSink for WsSink {
    async fn send(&mut self, kind: FrameKind, payload: Bytes) -> Result<(), SessionError> {
        self.0
            .send(into_message(kind, payload))
            .await
            .map_err(|e| SessionError::Transport(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.0.close().await;
    }
}

/// Read half of an upgraded socket
pub struct WsStream(SplitStream<WebSocket>);

impl FrameStream for WsStream {
    async fn next_frame(&mut self) -> Option<Result<ClientFrame, SessionError>> {
        let message = match self.0.next().await? {
            Ok(message) => message,
            Err(e) => return Some(Err(SessionError::Transport(e.to_string()))),
        };

        let frame = match message {
            Message::Text(text) => {
                tracing::debug!("Client says: {}", text);
                ClientFrame::Data(FrameKind::Text)
            }
            Message::Binary(data) => {
                tracing::debug!("Client sent {} binary bytes", data.len());
                ClientFrame::Data(FrameKind::Binary)
            }
            // Pong is handled automatically by axum
            Message::Ping(_) | Message::Pong(_) => ClientFrame::Control,
            Message::Close(_) => ClientFrame::Close,
        };
        Some(Ok(frame))
    }
}

/// Datagrams are opaque bytes; text frames must be UTF-8, so invalid
/// sequences are replaced rather than failing the whole frame.
fn into_message(kind: FrameKind, payload: Bytes) -> Message {
    match kind {
        FrameKind::Text => Message::Text(String::from_utf8_lossy(&payload).into_owned()),
        FrameKind::Binary => Message::Binary(payload.to_vec()),
    }
}
