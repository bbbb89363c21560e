//! Graceful shutdown signal.

use tokio::sync::broadcast;

/// Fan-out shutdown signal.
///
/// `HttpServer::run` holds a subscription; triggering stops the accept
/// loop, after which the server evicts every live worker unit before
/// returning.
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Fires the signal. Subscribers that already exited are fine; a send
    /// with no receivers is a no-op.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
