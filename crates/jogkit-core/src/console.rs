//! Console sink interface
//!
//! Defines the listener trait used to mirror link traffic to a passive
//! console: every sent command, every received line, and every fault is
//! published here. The link core never blocks on a listener and never
//! depends on its result.

use async_trait::async_trait;

/// Handle for a registered console listener.
///
/// Uniquely identifies a listener subscription. Can be used to unsubscribe
/// from console traffic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConsoleListenerHandle(pub String);

/// Listener trait for link console traffic
///
/// Implement this trait to receive a copy of everything that crosses the
/// link. Notifications are fired on detached tasks; implementations must not
/// assume ordering between them.
#[async_trait]
pub trait ConsoleListener: Send + Sync {
    /// Called for every command written to the link
    async fn on_line_sent(&self, _command: &str) {}

    /// Called for every decoded line received from the board
    async fn on_line_received(&self, _line: &str) {}

    /// Called when a link or loop fault is surfaced
    async fn on_fault(&self, _message: &str) {}
}
