//! Ping probes and round-trip measurement.
//!
//! A ping is a HEARTBEAT carrying a correlation id; the broker echoes the id
//! back and the round trip is measured against the send time.

use crate::error::ConnectionError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

/// Reply channel for a ping
pub type PingReply = oneshot::Sender<Result<Duration, ConnectionError>>;

/// Generate a correlation id unique within this process
pub fn next_ping_id() -> String {
    static START: once_cell::sync::Lazy<std::time::Instant> =
        once_cell::sync::Lazy::new(std::time::Instant::now);
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{:x}-{}", START.elapsed().as_nanos() as u64, seq)
}

struct OutstandingPing {
    sent_at: Instant,
    reply: PingReply,
}

/// Pings sent and not yet answered
#[derive(Default)]
pub struct PingTracker {
    outstanding: HashMap<String, OutstandingPing>,
}

impl PingTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember a ping that was just written.
    ///
    /// Entries whose caller has already given up are dropped here.
    pub fn record(&mut self, id: String, reply: PingReply) {
        self.outstanding.retain(|_, ping| !ping.reply.is_closed());
        self.outstanding.insert(
            id,
            OutstandingPing {
                sent_at: Instant::now(),
                reply,
            },
        );
    }

    /// Resolve the ping answered by a HEARTBEAT with `id`
    pub fn resolve(&mut self, id: &str) -> Option<Duration> {
        let ping = self.outstanding.remove(id)?;
        let rtt = ping.sent_at.elapsed();
        debug!("Ping {} answered in {:?}", id, rtt);
        let _ = ping.reply.send(Ok(rtt));
        Some(rtt)
    }

    /// Fail every outstanding ping
    pub fn fail_all(&mut self, error: impl Fn() -> ConnectionError) {
        for (_, ping) in self.outstanding.drain() {
            let _ = ping.reply.send(Err(error()));
        }
    }

    /// Number of unanswered pings
    pub fn len(&self) -> usize {
        self.outstanding.len()
    }

    /// Whether no ping is outstanding
    pub fn is_empty(&self) -> bool {
        self.outstanding.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use realtime_wire::ErrorInfo;

    #[test]
    fn test_ping_ids_unique() {
        let a = next_ping_id();
        let b = next_ping_id();
        assert_ne!(a, b);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_measures_rtt() {
        let mut tracker = PingTracker::new();
        let (tx, rx) = oneshot::channel();
        tracker.record("p1".to_string(), tx);

        tokio::time::advance(Duration::from_millis(40)).await;
        assert_eq!(tracker.resolve("p1"), Some(Duration::from_millis(40)));
        assert_eq!(rx.await.unwrap().unwrap(), Duration::from_millis(40));
        assert!(tracker.resolve("p1").is_none());
    }

    #[tokio::test]
    async fn test_fail_all() {
        let mut tracker = PingTracker::new();
        let (tx, rx) = oneshot::channel();
        tracker.record("p1".to_string(), tx);
        tracker.fail_all(|| ConnectionError::Protocol(ErrorInfo::reason_disconnected()));

        assert!(tracker.is_empty());
        assert!(matches!(rx.await.unwrap(), Err(ConnectionError::Protocol(_))));
    }

    #[test]
    fn test_abandoned_pings_pruned() {
        let mut tracker = PingTracker::new();
        let (tx, rx) = oneshot::channel();
        tracker.record("p1".to_string(), tx);
        drop(rx);
        let (tx, _rx) = oneshot::channel();
        tracker.record("p2".to_string(), tx);
        assert_eq!(tracker.len(), 1);
    }
}
