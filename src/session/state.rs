//! Pure connection state management for the session manager
//!
//! The session's connection lifecycle is a small state machine. All transitions
//! go through [`ConnectionState::apply`], which keeps the rules (terminal
//! shutdown, which events are meaningful in which state) in one place.

use serde::Serialize;
use tracing::{debug, info, warn};

/// Connection state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    /// Initial state; also entered after a lost connection or failed handshake
    Disconnected,
    /// Handshake in progress
    Connecting,
    /// Successfully connected and ready for operations
    Connected,
    /// Terminal - no further connection attempts
    ShuttingDown,
}

/// Events that drive state transitions
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    /// Explicit `connect()` or an automatic reconnection attempt
    ConnectRequested,
    /// Transport completed the broker handshake
    HandshakeSucceeded,
    /// Transport failed the broker handshake
    HandshakeFailed(String),
    /// Connection closed without the session asking for it
    UnsolicitedClose(String),
    /// Explicit `shutdown()`
    ShutdownRequested,
}

impl ConnectionState {
    /// Compute the state that follows `event` (pure function)
    ///
    /// Events that make no sense in the current state leave it unchanged.
    pub fn apply(self, event: &LifecycleEvent) -> ConnectionState {
        use ConnectionState::*;

        match (self, event) {
            (ShuttingDown, _) => ShuttingDown,
            (_, LifecycleEvent::ShutdownRequested) => ShuttingDown,
            (Disconnected, LifecycleEvent::ConnectRequested) => Connecting,
            (Connecting, LifecycleEvent::HandshakeSucceeded) => Connected,
            (Connecting, LifecycleEvent::HandshakeFailed(_)) => Disconnected,
            (Connecting | Connected, LifecycleEvent::UnsolicitedClose(_)) => Disconnected,
            (state, _) => state,
        }
    }

    /// Check if connection state allows publishing (pure function)
    pub fn can_publish(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::ShuttingDown)
    }
}

/// Log connection state transition
pub fn log_state_transition(from: ConnectionState, to: ConnectionState, event: &LifecycleEvent) {
    match (from, to, event) {
        (_, _, _) if from == to => {
            debug!(state = ?from, event = ?event, "Connection state unchanged");
        }
        (ConnectionState::Connecting, ConnectionState::Connected, _) => {
            info!("MQTT connection established");
        }
        (ConnectionState::Connected, ConnectionState::Disconnected, LifecycleEvent::UnsolicitedClose(reason)) => {
            warn!(reason = %reason, "MQTT connection lost");
        }
        (_, ConnectionState::Disconnected, LifecycleEvent::HandshakeFailed(reason)) => {
            warn!(reason = %reason, "MQTT handshake failed");
        }
        (_, ConnectionState::ShuttingDown, _) => {
            info!("Session shutting down");
        }
        _ => {
            debug!("MQTT connection state: {:?} -> {:?}", from, to);
        }
    }
}
