//! Per-session counters
//!
//! Atomic counters updated from the lifecycle task and the caller-facing API
//! without taking the session lock.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Thread-safe session statistics
#[derive(Debug, Default)]
pub struct SessionStats {
    connect_attempts: AtomicU64,
    connections_established: AtomicU64,
    connection_failures: AtomicU64,
    reconnects: AtomicU64,
    messages_published: AtomicU64,
    publish_failures: AtomicU64,
    messages_received: AtomicU64,
    messages_dispatched: AtomicU64,
    messages_dropped: AtomicU64,
    handler_failures: AtomicU64,
    connected_since: Mutex<Option<DateTime<Utc>>>,
}

/// Point-in-time copy of [`SessionStats`]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub connect_attempts: u64,
    pub connections_established: u64,
    pub connection_failures: u64,
    pub reconnects: u64,
    pub messages_published: u64,
    pub publish_failures: u64,
    pub messages_received: u64,
    pub messages_dispatched: u64,
    pub messages_dropped: u64,
    pub handler_failures: u64,
    pub connected_since: Option<DateTime<Utc>>,
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_connect_attempt(&self) {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connected(&self, is_reconnect: bool) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        if is_reconnect {
            self.reconnects.fetch_add(1, Ordering::Relaxed);
        }
        if let Ok(mut since) = self.connected_since.lock() {
            *since = Some(Utc::now());
        }
    }

    pub fn record_connection_failure(&self) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disconnected(&self) {
        if let Ok(mut since) = self.connected_since.lock() {
            *since = None;
        }
    }

    pub fn record_publish(&self, success: bool) {
        if success {
            self.messages_published.fetch_add(1, Ordering::Relaxed);
        } else {
            self.publish_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatched(&self, handler_failures: usize) {
        self.messages_dispatched.fetch_add(1, Ordering::Relaxed);
        self.handler_failures
            .fetch_add(handler_failures as u64, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
            connections_established: self.connections_established.load(Ordering::Relaxed),
            connection_failures: self.connection_failures.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            messages_published: self.messages_published.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_dispatched: self.messages_dispatched.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            connected_since: self.connected_since.lock().ok().and_then(|since| *since),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_stats_are_zero() {
        assert_eq!(SessionStats::new().snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn test_connection_counters() {
        let stats = SessionStats::new();
        stats.record_connect_attempt();
        stats.record_connection_failure();
        stats.record_connect_attempt();
        stats.record_connected(false);
        stats.record_connect_attempt();
        stats.record_connected(true);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.connect_attempts, 3);
        assert_eq!(snapshot.connection_failures, 1);
        assert_eq!(snapshot.connections_established, 2);
        assert_eq!(snapshot.reconnects, 1);
        assert!(snapshot.connected_since.is_some());

        stats.record_disconnected();
        assert!(stats.snapshot().connected_since.is_none());
    }

    #[test]
    fn test_message_counters() {
        let stats = SessionStats::new();
        stats.record_publish(true);
        stats.record_publish(false);
        stats.record_received();
        stats.record_received();
        stats.record_dispatched(2);
        stats.record_dropped();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.messages_published, 1);
        assert_eq!(snapshot.publish_failures, 1);
        assert_eq!(snapshot.messages_received, 2);
        assert_eq!(snapshot.messages_dispatched, 1);
        assert_eq!(snapshot.handler_failures, 2);
        assert_eq!(snapshot.messages_dropped, 1);
    }

    #[test]
    fn test_snapshot_serializes_to_json() {
        let json = serde_json::to_value(SessionStats::new().snapshot()).unwrap();
        assert_eq!(json["reconnects"], 0);
        assert!(json["connected_since"].is_null());
    }
}
