//! Observability for the session manager
//!
//! Structured logging setup and span macros. Session counters live with the
//! session itself in [`crate::session::stats`].

pub mod logging;

pub use logging::{init_default_logging, init_logging, LogFormat};

// Span macros for structured logging
pub use logging::{connection_span, session_span};
