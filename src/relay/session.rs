//! Per-client session lifecycle
//!
//! ```text
//! Connecting ──► AwaitingReadiness ──► Streaming ──► Closed
//!                       │                               ▲
//!                       └───────────────────────────────┘
//! ```
//!
//! The session registers only once the client has sent its readiness frame,
//! and leaves the registry on every exit path, including panics and task
//! cancellation.

use bytes::Bytes;
use std::future::Future;
use std::sync::Arc;

use crate::error::{RegistryError, SessionError};
use crate::relay::queue::{OutboundQueue, SharedQueue};
use crate::relay::registry::{ConnectionRegistry, ConsumerHandle};

/// Frame type captured from the readiness frame and echoed on every delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Text,
    Binary,
}

/// What the session cares about in a frame read from the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientFrame {
    Data(FrameKind),
    /// Ping/pong; answered by the transport, otherwise ignored
    Control,
    Close,
}

/// Write half of a consumer transport
pub trait FrameSink: Send {
    fn send(
        &mut self,
        kind: FrameKind,
        payload: Bytes,
    ) -> impl Future<Output = Result<(), SessionError>> + Send;

    /// Release the transport; errors are irrelevant at this point
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Read half of a consumer transport; `None` once the client is gone
pub trait FrameStream: Send {
    fn next_frame(&mut self) -> impl Future<Output = Option<Result<ClientFrame, SessionError>>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    AwaitingReadiness,
    Streaming,
    Closed,
}

/// How a session that streamed successfully came to an end
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Client sent a close frame or dropped the connection
    ClientClosed,
    /// Queue was closed by shutdown and fully drained
    Drained,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    pub end: SessionEnd,
    pub frame_kind: FrameKind,
    pub delivered: u64,
    pub dropped: u64,
}

/// Registry entry that removes itself when dropped
struct Registration {
    registry: Arc<ConnectionRegistry>,
    handle: ConsumerHandle,
    queue: SharedQueue,
}

impl Registration {
    fn new(
        registry: Arc<ConnectionRegistry>,
        handle: ConsumerHandle,
        queue: SharedQueue,
    ) -> Result<Self, RegistryError> {
        registry.register(handle, queue.clone())?;
        Ok(Self { registry, handle, queue })
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.deregister(self.handle);
        self.queue.close();
    }
}

/// One connected consumer
pub struct ConsumerSession {
    handle: ConsumerHandle,
    registry: Arc<ConnectionRegistry>,
    queue_capacity: usize,
    state: SessionState,
}

impl ConsumerSession {
    /// A `queue_capacity` of zero is raised to one
    pub fn new(registry: Arc<ConnectionRegistry>, queue_capacity: usize) -> Self {
        Self {
            handle: ConsumerHandle::next(),
            registry,
            queue_capacity: queue_capacity.max(1),
            state: SessionState::Connecting,
        }
    }

    pub fn handle(&self) -> ConsumerHandle {
        self.handle
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        tracing::trace!("{}: {:?} -> {:?}", self.handle, self.state, next);
        self.state = next;
    }

    /// Drive the session to completion over an upgraded transport
    pub async fn run<W, R>(&mut self, mut sink: W, mut stream: R) -> Result<SessionSummary, SessionError>
    where
        W: FrameSink,
        R: FrameStream,
    {
        self.transition(SessionState::AwaitingReadiness);

        let result = match await_readiness(&mut stream).await {
            Ok(kind) => {
                tracing::info!("{} ready, streaming {:?} frames", self.handle, kind);
                self.transition(SessionState::Streaming);
                self.stream(kind, &mut sink, &mut stream).await
            }
            Err(e) => Err(e),
        };

        self.transition(SessionState::Closed);
        sink.close().await;

        match &result {
            Ok(summary) => tracing::info!(
                "{} closed ({:?}): {} delivered, {} dropped",
                self.handle,
                summary.end,
                summary.delivered,
                summary.dropped
            ),
            Err(e) => tracing::warn!("{} closed: {}", self.handle, e),
        }
        result
    }

    async fn stream<W, R>(
        &self,
        kind: FrameKind,
        sink: &mut W,
        stream: &mut R,
    ) -> Result<SessionSummary, SessionError>
    where
        W: FrameSink,
        R: FrameStream,
    {
        let queue = Arc::new(OutboundQueue::new(self.queue_capacity));
        let _registration = match Registration::new(self.registry.clone(), self.handle, queue.clone()) {
            Ok(registration) => registration,
            // Shutdown won the race with the readiness frame.
            Err(RegistryError::Closed) => {
                tracing::debug!("{} ready after shutdown, nothing to stream", self.handle);
                return Ok(SessionSummary {
                    end: SessionEnd::Drained,
                    frame_kind: kind,
                    delivered: 0,
                    dropped: 0,
                });
            }
            Err(e) => return Err(e.into()),
        };

        let mut delivered = 0u64;
        let end = loop {
            tokio::select! {
                popped = queue.pop() => match popped {
                    Some(datagram) => {
                        sink.send(kind, datagram).await?;
                        delivered += 1;
                    }
                    None => break SessionEnd::Drained,
                },
                frame = stream.next_frame() => match frame {
                    Some(Ok(ClientFrame::Close)) | None => break SessionEnd::ClientClosed,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e),
                },
            }
        };

        Ok(SessionSummary {
            end,
            frame_kind: kind,
            delivered,
            dropped: queue.dropped_count(),
        })
    }
}

/// Read frames until the first data frame and return its kind
async fn await_readiness<R: FrameStream>(stream: &mut R) -> Result<FrameKind, SessionError> {
    loop {
        match stream.next_frame().await {
            Some(Ok(ClientFrame::Data(kind))) => return Ok(kind),
            Some(Ok(ClientFrame::Control)) => continue,
            Some(Ok(ClientFrame::Close)) => {
                return Err(SessionError::Protocol("closed before readiness frame".into()))
            }
            Some(Err(e)) => return Err(e),
            None => return Err(SessionError::Protocol("disconnected before readiness frame".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NetworkError;
    use crate::network::DatagramSource;
    use crate::relay::broadcast::{BroadcastLoop, LoopExit};
    use crate::shutdown::Shutdown;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct MockSink {
        frames: mpsc::UnboundedSender<(FrameKind, Bytes)>,
        fail_after: Option<usize>,
        sent: usize,
        closed: Arc<AtomicBool>,
    }

    impl FrameSink for MockSink {
        async fn send(&mut self, kind: FrameKind, payload: Bytes) -> Result<(), SessionError> {
            if self.fail_after.is_some_and(|limit| self.sent >= limit) {
                return Err(SessionError::Transport("broken pipe".into()));
            }
            self.sent += 1;
            let _ = self.frames.send((kind, payload));
            Ok(())
        }

        async fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    struct MockStream(mpsc::UnboundedReceiver<ClientFrame>);

    impl FrameStream for MockStream {
        async fn next_frame(&mut self) -> Option<Result<ClientFrame, SessionError>> {
            self.0.recv().await.map(Ok)
        }
    }

    /// Source with no traffic; the loop only ends on shutdown
    struct IdleSource;

    impl DatagramSource for IdleSource {
        async fn recv(&mut self) -> Result<Bytes, NetworkError> {
            std::future::pending().await
        }
    }

    struct Client {
        frames: mpsc::UnboundedReceiver<(FrameKind, Bytes)>,
        input: mpsc::UnboundedSender<ClientFrame>,
        closed: Arc<AtomicBool>,
    }

    fn transport(fail_after: Option<usize>) -> (MockSink, MockStream, Client) {
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let sink = MockSink {
            frames: frames_tx,
            fail_after,
            sent: 0,
            closed: closed.clone(),
        };
        let client = Client {
            frames: frames_rx,
            input: input_tx,
            closed,
        };
        (sink, MockStream(input_rx), client)
    }

    async fn wait_registered(registry: &ConnectionRegistry, handle: ConsumerHandle) {
        tokio::time::timeout(Duration::from_secs(1), async {
            while !registry.contains(handle) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    async fn next_frame(client: &mut Client) -> (FrameKind, Bytes) {
        tokio::time::timeout(Duration::from_secs(1), client.frames.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_streams_with_readiness_frame_kind() {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = BroadcastLoop::new(registry.clone());
        let (sink, stream, mut client) = transport(None);

        let mut session = ConsumerSession::new(registry.clone(), 16);
        let handle = session.handle();
        assert_eq!(session.state(), SessionState::Connecting);
        let task = tokio::spawn(async move {
            let result = session.run(sink, stream).await;
            (session.state(), result)
        });

        client.input.send(ClientFrame::Control).unwrap();
        client.input.send(ClientFrame::Data(FrameKind::Binary)).unwrap();
        wait_registered(&registry, handle).await;

        for line in ["A", "B", "C"] {
            broadcaster.fan_out(Bytes::from(line));
        }
        for expected in ["A", "B", "C"] {
            assert_eq!(next_frame(&mut client).await, (FrameKind::Binary, Bytes::from(expected)));
        }

        client.input.send(ClientFrame::Close).unwrap();
        let (state, result) = task.await.unwrap();
        let summary = result.unwrap();

        assert_eq!(state, SessionState::Closed);
        assert_eq!(summary.end, SessionEnd::ClientClosed);
        assert_eq!(summary.frame_kind, FrameKind::Binary);
        assert_eq!(summary.delivered, 3);
        assert!(registry.is_empty());
        assert!(client.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_disconnect_before_readiness_never_registers() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (sink, stream, client) = transport(None);
        drop(client.input);

        let mut session = ConsumerSession::new(registry.clone(), 16);
        let result = session.run(sink, stream).await;

        assert!(matches!(result, Err(SessionError::Protocol(_))));
        assert_eq!(session.state(), SessionState::Closed);
        assert!(registry.is_empty());
        assert!(client.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_close_frame_instead_of_readiness() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (sink, stream, client) = transport(None);
        client.input.send(ClientFrame::Close).unwrap();

        let mut session = ConsumerSession::new(registry.clone(), 16);
        let result = session.run(sink, stream).await;

        assert!(matches!(result, Err(SessionError::Protocol(_))));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_write_failure_deregisters() {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = BroadcastLoop::new(registry.clone());
        let (sink, stream, mut client) = transport(Some(1));

        let mut session = ConsumerSession::new(registry.clone(), 16);
        let handle = session.handle();
        let task = tokio::spawn(async move { session.run(sink, stream).await });

        client.input.send(ClientFrame::Data(FrameKind::Text)).unwrap();
        wait_registered(&registry, handle).await;

        broadcaster.fan_out(Bytes::from("ok"));
        broadcaster.fan_out(Bytes::from("fails"));
        assert_eq!(next_frame(&mut client).await.1, "ok");

        let result = task.await.unwrap();
        assert!(matches!(result, Err(SessionError::Transport(_))));
        assert!(!registry.contains(handle));

        let after = broadcaster.fan_out(Bytes::from("nobody"));
        assert_eq!(after.queued + after.dropped + after.closed, 0);
    }

    #[tokio::test]
    async fn test_shutdown_drains_then_ends() {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = BroadcastLoop::new(registry.clone());
        let (sink, stream, mut client) = transport(None);

        let mut session = ConsumerSession::new(registry.clone(), 16);
        let handle = session.handle();
        let task = tokio::spawn(async move { session.run(sink, stream).await });

        client.input.send(ClientFrame::Data(FrameKind::Text)).unwrap();
        wait_registered(&registry, handle).await;

        broadcaster.fan_out(Bytes::from("buffered"));
        registry.close_all();

        let summary = task.await.unwrap().unwrap();
        assert_eq!(summary.end, SessionEnd::Drained);
        assert_eq!(summary.delivered, 1);
        assert_eq!(next_frame(&mut client).await, (FrameKind::Text, Bytes::from("buffered")));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_aborted_session_still_deregisters() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (sink, stream, client) = transport(None);

        let mut session = ConsumerSession::new(registry.clone(), 16);
        let handle = session.handle();
        let task = tokio::spawn(async move { session.run(sink, stream).await });

        client.input.send(ClientFrame::Data(FrameKind::Text)).unwrap();
        wait_registered(&registry, handle).await;

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_readiness_after_shutdown_ends_session() {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = BroadcastLoop::new(registry.clone());
        let shutdown = Shutdown::new();
        let (sink, stream, client) = transport(None);

        let mut session = ConsumerSession::new(registry.clone(), 16);
        let task = tokio::spawn(async move { session.run(sink, stream).await });

        shutdown.trigger();
        let exit = broadcaster.run(IdleSource, shutdown.signal()).await;
        assert!(matches!(exit, LoopExit::Shutdown));

        client.input.send(ClientFrame::Data(FrameKind::Text)).unwrap();
        let summary = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        assert_eq!(summary.end, SessionEnd::Drained);
        assert_eq!(summary.delivered, 0);
        assert!(registry.is_empty());
        assert!(client.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_zero_capacity_is_raised_to_one() {
        let registry = Arc::new(ConnectionRegistry::new());
        let broadcaster = BroadcastLoop::new(registry.clone());
        let (sink, stream, mut client) = transport(None);

        let mut session = ConsumerSession::new(registry.clone(), 0);
        let handle = session.handle();
        let task = tokio::spawn(async move { session.run(sink, stream).await });

        client.input.send(ClientFrame::Data(FrameKind::Text)).unwrap();
        wait_registered(&registry, handle).await;
        broadcaster.fan_out(Bytes::from("only"));
        assert_eq!(next_frame(&mut client).await.1, "only");

        client.input.send(ClientFrame::Close).unwrap();
        assert_eq!(task.await.unwrap().unwrap().end, SessionEnd::ClientClosed);
    }
}
