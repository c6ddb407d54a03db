//! Graceful shutdown coordination

use tokio::sync::watch;

/// Broadcasts a one-shot shutdown request to every subsystem
#[derive(Clone)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Trigger shutdown (call this from the signal handler)
    pub fn trigger(&self) {
        if !self.tx.send_replace(true) {
            tracing::info!("Shutdown requested, notifying all subsystems");
        }
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// A signal that resolves once shutdown is triggered, even if that
    /// happened before the signal was created
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Awaitable side of [`Shutdown`]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Wait for the shutdown request
    pub async fn wait(&mut self) {
        // Err means every Shutdown was dropped; nobody can trigger any more,
        // so park forever rather than reporting a shutdown that never came.
        if self.rx.wait_for(|triggered| *triggered).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
