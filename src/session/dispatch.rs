//! Message routing to registered handlers
//!
//! Handlers are registered under a unique name and a topic filter. Delivery
//! runs every matching handler in registration order and isolates failures:
//! a handler that returns an error or panics is logged and skipped, and the
//! remaining handlers still see the message.

use crate::error::SessionError;
use crate::protocol::{topic_matches, validate_topic_filter, InboundMessage, Message};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

/// Error type handlers may return
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Shared handler callback
pub type HandlerFn = Arc<dyn Fn(&Message) -> Result<(), HandlerError> + Send + Sync>;

struct RegisteredHandler {
    name: String,
    filter: String,
    handler: HandlerFn,
}

/// Ordered registry of named handlers
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: Vec<RegisteredHandler>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.handlers.iter().map(|h| (&h.name, &h.filter)))
            .finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler; names must be unique
    pub fn register(
        &mut self,
        name: &str,
        filter: &str,
        handler: HandlerFn,
    ) -> Result<(), SessionError> {
        validate_topic_filter(filter)?;
        if self.handlers.iter().any(|h| h.name == name) {
            return Err(SessionError::HandlerExists(name.to_string()));
        }

        self.handlers.push(RegisteredHandler {
            name: name.to_string(),
            filter: filter.to_string(),
            handler,
        });
        Ok(())
    }

    /// Remove a handler by name; returns true if one was removed
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|h| h.name != name);
        self.handlers.len() != before
    }

    pub fn names(&self) -> Vec<String> {
        self.handlers.iter().map(|h| h.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Handlers whose filter matches `topic`, in registration order
    pub fn matching(&self, topic: &str) -> Vec<(String, HandlerFn)> {
        self.handlers
            .iter()
            .filter(|h| topic_matches(&h.filter, topic))
            .map(|h| (h.name.clone(), h.handler.clone()))
            .collect()
    }
}

/// Result of delivering one message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Decode an inbound message for handlers
pub fn decode_inbound(inbound: &InboundMessage) -> Result<Message, SessionError> {
    inbound.decode().map_err(|source| SessionError::DecodeFailed {
        topic: inbound.topic.clone(),
        source,
    })
}

/// Run every handler against `message`, isolating errors and panics
pub fn deliver(message: &Message, handlers: &[(String, HandlerFn)]) -> DeliveryReport {
    let mut report = DeliveryReport::default();

    for (name, handler) in handlers {
        match catch_unwind(AssertUnwindSafe(|| handler(message))) {
            Ok(Ok(())) => {
                report.delivered += 1;
                debug!(handler = %name, topic = %message.topic, "Message delivered");
            }
            Ok(Err(e)) => {
                report.failed += 1;
                warn!(handler = %name, topic = %message.topic, error = %e, "Handler returned an error");
            }
            Err(panic) => {
                report.failed += 1;
                warn!(
                    handler = %name,
                    topic = %message.topic,
                    panic = panic_message(panic.as_ref()),
                    "Handler panicked"
                );
            }
        }
    }

    report
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::QoS;
    use std::sync::Mutex;

    fn message(topic: &str, payload: &str) -> Message {
        Message {
            topic: topic.to_string(),
            payload: payload.to_string(),
            qos: QoS::AtMostOnce,
            retain: false,
        }
    }

    fn recorder(log: Arc<Mutex<Vec<String>>>, label: &'static str) -> HandlerFn {
        Arc::new(move |msg: &Message| -> Result<(), HandlerError> {
            log.lock().unwrap().push(format!("{label}:{}", msg.payload));
            Ok(())
        })
    }

    #[test]
    fn test_register_rejects_duplicate_names() {
        let mut registry = HandlerRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry
            .register("printer", "#", recorder(log.clone(), "a"))
            .unwrap();
        let result = registry.register("printer", "home/#", recorder(log, "b"));
        assert!(matches!(result, Err(SessionError::HandlerExists(name)) if name == "printer"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_rejects_invalid_filter() {
        let mut registry = HandlerRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let result = registry.register("bad", "home/#/light", recorder(log, "a"));
        assert!(matches!(result, Err(SessionError::InvalidTopic(_))));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_matching_keeps_registration_order() {
        let mut registry = HandlerRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.register("second", "home/#", recorder(log.clone(), "b")).unwrap();
        registry.register("first", "home/kitchen/light", recorder(log.clone(), "a")).unwrap();
        registry.register("other", "garden/#", recorder(log, "c")).unwrap();

        let names: Vec<String> = registry
            .matching("home/kitchen/light")
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, vec!["second", "first"]);
    }

    #[test]
    fn test_remove() {
        let mut registry = HandlerRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.register("a", "#", recorder(log, "a")).unwrap();
        assert!(registry.remove("a"));
        assert!(!registry.remove("a"));
        assert!(registry.names().is_empty());
    }

    #[test]
    fn test_deliver_isolates_errors_and_panics() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let failing: HandlerFn =
            Arc::new(|_msg: &Message| -> Result<(), HandlerError> { Err("boom".into()) });
        let panicking: HandlerFn =
            Arc::new(|_msg: &Message| -> Result<(), HandlerError> { panic!("handler exploded") });
        let handlers = vec![
            ("failing".to_string(), failing),
            ("panicking".to_string(), panicking),
            ("recording".to_string(), recorder(log.clone(), "ok")),
        ];

        let report = deliver(&message("t", "on"), &handlers);

        assert_eq!(report, DeliveryReport { delivered: 1, failed: 2 });
        assert_eq!(*log.lock().unwrap(), vec!["ok:on".to_string()]);
    }

    #[test]
    fn test_decode_inbound_failure_carries_topic() {
        let inbound = InboundMessage::new("t/x", vec![0xc3, 0x28], QoS::AtMostOnce, false);
        match decode_inbound(&inbound) {
            Err(SessionError::DecodeFailed { topic, .. }) => assert_eq!(topic, "t/x"),
            other => panic!("expected DecodeFailed, got {other:?}"),
        }
    }
}
