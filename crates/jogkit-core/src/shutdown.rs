//! Cooperative shutdown primitive
//!
//! Long-lived loops (the reader loop, the jog pacer) run until told to stop.
//! A [`ShutdownSignal`]/[`ShutdownToken`] pair carries that request over a
//! watch channel: the owner signals once, every clone of the token observes
//! it at its next suspension point, and loop exit is a normal return.

use tokio::sync::watch;

/// Owner side of a shutdown request.
///
/// Dropping the signal also releases any tokens still waiting.
#[derive(Debug)]
pub struct ShutdownSignal {
    tx: watch::Sender<bool>,
}

/// Observer side of a shutdown request. Cheap to clone; checked at loop
/// heads and awaited at suspension points.
#[derive(Debug, Clone)]
pub struct ShutdownToken {
    rx: watch::Receiver<bool>,
}

/// Create a connected signal/token pair.
pub fn shutdown_pair() -> (ShutdownSignal, ShutdownToken) {
    let (tx, rx) = watch::channel(false);
    (ShutdownSignal { tx }, ShutdownToken { rx })
}

impl ShutdownSignal {
    /// Request shutdown. Idempotent.
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }

    /// Whether shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        *self.tx.borrow()
    }

    /// Whether any token is still listening.
    pub fn has_listeners(&self) -> bool {
        self.tx.receiver_count() > 0
    }
}

impl ShutdownToken {
    /// Whether shutdown has been requested. Non-blocking.
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until shutdown is requested.
    ///
    /// Returns immediately if the request already happened, and also when
    /// the signal side has been dropped.
    pub async fn wait(&mut self) {
        // wait_for resolves on the current value too, so a token that missed
        // the send still returns.
        let _ = self.rx.wait_for(|stop| *stop).await;
    }
}
