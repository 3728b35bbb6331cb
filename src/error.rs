//! Error types for session operations
//!
//! Errors from caller-invoked operations are returned as [`SessionError`].
//! Lifecycle failures (lost connection, failed reconnect) never surface here;
//! they are logged and drive the connection state machine instead.

use crate::protocol::{InvalidQos, TopicError};
use crate::session::state::ConnectionState;
use crate::transport::TransportError;
use std::str::Utf8Error;
use thiserror::Error;

/// Main error type for session manager operations
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Connect failed: {0}")]
    ConnectFailed(#[source] TransportError),

    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },

    #[error("Publish to {topic} failed: {source}")]
    PublishFailed {
        topic: String,
        #[source]
        source: TransportError,
    },

    #[error("Subscribe to {topics:?} failed: {source}")]
    SubscribeFailed {
        topics: Vec<String>,
        #[source]
        source: TransportError,
    },

    #[error("Unsubscribe from {topics:?} failed: {source}")]
    UnsubscribeFailed {
        topics: Vec<String>,
        #[source]
        source: TransportError,
    },

    #[error("Payload on {topic} is not valid UTF-8: {source}")]
    DecodeFailed {
        topic: String,
        #[source]
        source: Utf8Error,
    },

    #[error("Invalid topic: {0}")]
    InvalidTopic(#[from] TopicError),

    #[error(transparent)]
    InvalidQos(#[from] InvalidQos),

    #[error("A handler named {0:?} is already registered")]
    HandlerExists(String),

    #[error("Operation cancelled by shutdown")]
    Cancelled,

    #[error("Session has been shut down")]
    ShutDown,
}

impl SessionError {
    /// True for errors caused by `shutdown()` rather than by the broker
    pub fn is_shutdown(&self) -> bool {
        matches!(self, SessionError::Cancelled | SessionError::ShutDown)
    }
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;
