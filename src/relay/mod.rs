//! Fan-out core: registry, per-consumer queues, the broadcast loop and
//! consumer sessions

pub mod broadcast;
pub mod queue;
pub mod registry;
pub mod session;

pub use broadcast::{BroadcastLoop, BroadcastStats, BroadcastStatsSnapshot, FanOut, LoopExit};
pub use queue::{OutboundQueue, PushOutcome, SharedQueue};
pub use registry::{ConnectionRegistry, ConsumerHandle};
pub use session::{
    ClientFrame, ConsumerSession, FrameKind, FrameSink, FrameStream, SessionEnd, SessionState,
    SessionSummary,
};
