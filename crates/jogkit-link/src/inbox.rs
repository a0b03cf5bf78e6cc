//! Inbound line queue and wait correlator
//!
//! The reader loop publishes every decoded line here; consumers either
//! observe the stream passively (console listeners) or block for "the next
//! inbound line" with a deadline. The protocol has no command/response
//! framing, so correlation is by arrival only.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Lines retained before the oldest are trimmed.
pub const INBOX_CAPACITY: usize = 512;

/// Ordered queue of received lines plus a counting signal.
///
/// The semaphore's permit count tracks the queue length: one permit added
/// per push, one consumed per dequeue, one retired per trim. Multiple
/// concurrent waiters race for the same line; a waiter woken against an
/// already-emptied queue gets `None`. Callers must tolerate that false
/// negative; no fairness between waiters is promised.
pub struct Inbox {
    lines: Mutex<VecDeque<String>>,
    signal: Semaphore,
    capacity: usize,
}

impl Inbox {
    /// Create an inbox with the given trim capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Mutex::new(VecDeque::new()),
            signal: Semaphore::new(0),
            capacity,
        }
    }

    /// Enqueue one line and release one waiter
    pub fn push(&self, line: String) {
        {
            let mut lines = self.lines.lock();
            if lines.len() >= self.capacity {
                lines.pop_front();
                if let Ok(permit) = self.signal.try_acquire() {
                    permit.forget();
                }
            }
            lines.push_back(line);
        }
        self.signal.add_permits(1);
    }

    /// Block for the next inbound line, up to `timeout`.
    ///
    /// Dequeues at most one line. Returns `None` on deadline expiry and on
    /// a wake that lost the race to another consumer.
    pub async fn wait_for_line(&self, timeout: Duration) -> Option<String> {
        match tokio::time::timeout(timeout, self.signal.acquire()).await {
            Err(_elapsed) => None,
            Ok(Err(_closed)) => None,
            Ok(Ok(permit)) => {
                permit.forget();
                self.lines.lock().pop_front()
            }
        }
    }

    /// Number of queued lines
    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }

    /// Drop all queued lines and their permits
    pub fn clear(&self) {
        let mut lines = self.lines.lock();
        lines.clear();
        while let Ok(permit) = self.signal.try_acquire() {
            permit.forget();
        }
    }
}

impl Default for Inbox {
    fn default() -> Self {
        Self::new(INBOX_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn wait_returns_pushed_line() {
        let inbox = Inbox::default();
        inbox.push("ok".to_string());
        let line = inbox.wait_for_line(Duration::from_millis(50)).await;
        assert_eq!(line.as_deref(), Some("ok"));
        assert!(inbox.is_empty());
    }

    #[tokio::test]
    async fn wait_times_out_on_empty_queue() {
        let inbox = Inbox::default();
        let line = inbox.wait_for_line(Duration::from_millis(50)).await;
        assert_eq!(line, None);
    }

    #[tokio::test]
    async fn wait_picks_up_line_arriving_later() {
        let inbox = Arc::new(Inbox::default());
        let pusher = {
            let inbox = inbox.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                inbox.push("echo:busy".to_string());
            })
        };
        let line = inbox.wait_for_line(Duration::from_millis(500)).await;
        assert_eq!(line.as_deref(), Some("echo:busy"));
        pusher.await.unwrap();
    }

    #[tokio::test]
    async fn single_line_goes_to_exactly_one_waiter() {
        let inbox = Arc::new(Inbox::default());
        let a = {
            let inbox = inbox.clone();
            tokio::spawn(async move { inbox.wait_for_line(Duration::from_millis(300)).await })
        };
        let b = {
            let inbox = inbox.clone();
            tokio::spawn(async move { inbox.wait_for_line(Duration::from_millis(300)).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        inbox.push("ok".to_string());

        let (a, b) = (a.await.unwrap(), b.await.unwrap());
        let winners = [&a, &b].iter().filter(|r| r.is_some()).count();
        assert_eq!(winners, 1, "one line must reach exactly one waiter");
    }

    #[tokio::test]
    async fn trim_keeps_signal_count_in_step() {
        let inbox = Inbox::new(3);
        for i in 0..5 {
            inbox.push(format!("line {i}"));
        }
        assert_eq!(inbox.len(), 3);
        // Only the retained lines are claimable; oldest were trimmed.
        assert_eq!(
            inbox.wait_for_line(Duration::from_millis(20)).await.as_deref(),
            Some("line 2")
        );
        assert_eq!(
            inbox.wait_for_line(Duration::from_millis(20)).await.as_deref(),
            Some("line 3")
        );
        assert_eq!(
            inbox.wait_for_line(Duration::from_millis(20)).await.as_deref(),
            Some("line 4")
        );
        assert_eq!(inbox.wait_for_line(Duration::from_millis(20)).await, None);
    }

    #[tokio::test]
    async fn clear_empties_queue_and_permits() {
        let inbox = Inbox::default();
        inbox.push("a".to_string());
        inbox.push("b".to_string());
        inbox.clear();
        assert!(inbox.is_empty());
        assert_eq!(inbox.wait_for_line(Duration::from_millis(20)).await, None);
    }
}
