//! Mock implementations for testing
//!
//! Provides a mock [`Transport`] that records every call, can be told to fail,
//! and lets a test push inbound messages or an unsolicited close into the
//! current connection.

use crate::protocol::{InboundMessage, QoS};
use crate::transport::{EventStream, Transport, TransportError, TransportEvent};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

/// Message captured by [`MockTransport::publish`]
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

impl PublishedMessage {
    pub fn payload_str(&self) -> &str {
        std::str::from_utf8(&self.payload).unwrap_or("<binary>")
    }
}

/// Failure knobs for [`MockTransport`]
#[derive(Debug, Default)]
struct FailureMode {
    /// Number of upcoming connects that are refused
    connects: usize,
    publish: bool,
    subscribe: bool,
    /// Unsubscribe fails once this many filters have been sent
    unsubscribe_after: Option<usize>,
    connect_delay: Option<Duration>,
}

/// Mock transport for testing
#[derive(Debug, Default)]
pub struct MockTransport {
    pub connect_calls: Arc<Mutex<Vec<bool>>>,
    pub disconnect_calls: Arc<Mutex<usize>>,
    pub published_messages: Arc<Mutex<Vec<PublishedMessage>>>,
    pub subscribe_calls: Arc<Mutex<Vec<Vec<(String, QoS)>>>>,
    pub unsubscribe_calls: Arc<Mutex<Vec<Vec<String>>>>,
    failures: Mutex<FailureMode>,
    events_tx: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mock whose first `count` connects are refused
    pub fn with_failing_connects(count: usize) -> Self {
        Self {
            failures: Mutex::new(FailureMode {
                connects: count,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub async fn fail_next_connects(&self, count: usize) {
        self.failures.lock().await.connects = count;
    }

    pub async fn set_publish_failure(&self, fail: bool) {
        self.failures.lock().await.publish = fail;
    }

    pub async fn set_subscribe_failure(&self, fail: bool) {
        self.failures.lock().await.subscribe = fail;
    }

    pub async fn set_unsubscribe_failure(&self, fail: bool) {
        self.failures.lock().await.unsubscribe_after = fail.then_some(0);
    }

    /// Fail unsubscribe requests after `sent` filters went through
    pub async fn fail_unsubscribe_after(&self, sent: usize) {
        self.failures.lock().await.unsubscribe_after = Some(sent);
    }

    /// Make every connect wait before answering
    pub async fn set_connect_delay(&self, delay: Option<Duration>) {
        self.failures.lock().await.connect_delay = delay;
    }

    /// Push a message into the current connection; false when not connected
    pub async fn deliver(&self, message: InboundMessage) -> bool {
        match self.events_tx.lock().await.as_ref() {
            Some(tx) => tx.send(TransportEvent::Message(message)).is_ok(),
            None => false,
        }
    }

    /// Convenience wrapper around [`deliver`](Self::deliver) for text payloads
    pub async fn deliver_text(&self, topic: &str, payload: &str, qos: QoS) -> bool {
        self.deliver(InboundMessage::new(topic, payload.to_owned(), qos, false))
            .await
    }

    /// Simulate an unsolicited close of the current connection
    pub async fn close(&self, reason: &str) -> bool {
        match self.events_tx.lock().await.take() {
            Some(tx) => tx.send(TransportEvent::Closed(reason.to_string())).is_ok(),
            None => false,
        }
    }

    /// Drop the current event stream without a close event
    pub async fn drop_stream(&self) -> bool {
        self.events_tx.lock().await.take().is_some()
    }

    pub async fn is_connected(&self) -> bool {
        self.events_tx.lock().await.is_some()
    }

    pub async fn get_connect_count(&self) -> usize {
        self.connect_calls.lock().await.len()
    }

    /// Clean-session flag passed to each connect, in call order
    pub async fn get_connect_calls(&self) -> Vec<bool> {
        self.connect_calls.lock().await.clone()
    }

    pub async fn get_disconnect_count(&self) -> usize {
        *self.disconnect_calls.lock().await
    }

    pub async fn get_published_messages(&self) -> Vec<PublishedMessage> {
        self.published_messages.lock().await.clone()
    }

    pub async fn get_subscribe_calls(&self) -> Vec<Vec<(String, QoS)>> {
        self.subscribe_calls.lock().await.clone()
    }

    pub async fn get_unsubscribe_calls(&self) -> Vec<Vec<String>> {
        self.unsubscribe_calls.lock().await.clone()
    }

    pub async fn clear_history(&self) {
        self.connect_calls.lock().await.clear();
        *self.disconnect_calls.lock().await = 0;
        self.published_messages.lock().await.clear();
        self.subscribe_calls.lock().await.clear();
        self.unsubscribe_calls.lock().await.clear();
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, clean_session: bool) -> Result<EventStream, TransportError> {
        self.connect_calls.lock().await.push(clean_session);
        // Tear down the previous connection like a real client would
        self.events_tx.lock().await.take();

        let delay = self.failures.lock().await.connect_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        {
            let mut failures = self.failures.lock().await;
            if failures.connects > 0 {
                failures.connects -= 1;
                return Err(TransportError::Connection(
                    "Mock connection refused".to_string(),
                ));
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *self.events_tx.lock().await = Some(tx);
        Ok(rx)
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        *self.disconnect_calls.lock().await += 1;
        self.events_tx.lock().await.take();
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    ) -> Result<(), TransportError> {
        if self.failures.lock().await.publish {
            return Err(TransportError::Request("Mock publish failure".into()));
        }

        self.published_messages.lock().await.push(PublishedMessage {
            topic: topic.to_string(),
            payload,
            qos,
            retain,
        });
        Ok(())
    }

    async fn subscribe(&self, filters: &[(String, QoS)]) -> Result<(), TransportError> {
        self.subscribe_calls.lock().await.push(filters.to_vec());
        if self.failures.lock().await.subscribe {
            return Err(TransportError::Request("Mock subscribe failure".into()));
        }
        Ok(())
    }

    async fn unsubscribe(&self, filters: &[String]) -> Result<(), TransportError> {
        self.unsubscribe_calls.lock().await.push(filters.to_vec());
        match self.failures.lock().await.unsubscribe_after {
            Some(0) => Err(TransportError::Request("Mock unsubscribe failure".into())),
            Some(sent) if sent < filters.len() => Err(TransportError::PartialUnsubscribe {
                unsent: filters[sent..].to_vec(),
                source: Box::new(TransportError::Request("Mock unsubscribe failure".into())),
            }),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_transport_records_calls() {
        let transport = MockTransport::new();

        let _events = transport.connect(true).await.unwrap();
        transport
            .publish("a/b", Bytes::from_static(b"hi"), QoS::AtLeastOnce, false)
            .await
            .unwrap();
        transport
            .subscribe(&[("a/#".to_string(), QoS::ExactlyOnce)])
            .await
            .unwrap();
        transport.unsubscribe(&["a/#".to_string()]).await.unwrap();
        transport.disconnect().await.unwrap();

        assert_eq!(transport.get_connect_calls().await, vec![true]);
        assert_eq!(transport.get_disconnect_count().await, 1);
        let published = transport.get_published_messages().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].payload_str(), "hi");
        assert_eq!(transport.get_subscribe_calls().await.len(), 1);
        assert_eq!(
            transport.get_unsubscribe_calls().await,
            vec![vec!["a/#".to_string()]]
        );
    }

    #[tokio::test]
    async fn test_failing_connects_then_success() {
        let transport = MockTransport::with_failing_connects(2);

        assert!(transport.connect(true).await.is_err());
        assert!(transport.connect(true).await.is_err());
        assert!(transport.connect(true).await.is_ok());
        assert_eq!(transport.get_connect_count().await, 3);
    }

    #[tokio::test]
    async fn test_deliver_and_close_reach_event_stream() {
        let transport = MockTransport::new();
        let mut events = transport.connect(false).await.unwrap();

        assert!(transport.deliver_text("t", "on", QoS::AtMostOnce).await);
        assert!(transport.close("broker went away").await);
        assert!(!transport.is_connected().await);

        match events.recv().await {
            Some(TransportEvent::Message(message)) => assert_eq!(message.topic, "t"),
            other => panic!("expected message, got {other:?}"),
        }
        assert_eq!(
            events.recv().await,
            Some(TransportEvent::Closed("broker went away".to_string()))
        );
        assert_eq!(events.recv().await, None);
    }

    #[tokio::test]
    async fn test_reconnect_ends_previous_stream() {
        let transport = MockTransport::new();
        let mut first = transport.connect(true).await.unwrap();
        let _second = transport.connect(true).await.unwrap();

        assert_eq!(first.recv().await, None);
    }

    #[tokio::test]
    async fn test_unsubscribe_failure_modes() {
        let transport = MockTransport::new();
        let filters = vec!["a".to_string(), "b".to_string(), "c".to_string()];

        transport.set_unsubscribe_failure(true).await;
        assert!(matches!(
            transport.unsubscribe(&filters).await,
            Err(TransportError::Request(_))
        ));

        transport.fail_unsubscribe_after(1).await;
        match transport.unsubscribe(&filters).await {
            Err(TransportError::PartialUnsubscribe { unsent, .. }) => {
                assert_eq!(unsent, vec!["b".to_string(), "c".to_string()]);
            }
            other => panic!("expected partial failure, got {other:?}"),
        }

        transport.set_unsubscribe_failure(false).await;
        assert!(transport.unsubscribe(&filters).await.is_ok());
        assert_eq!(transport.get_unsubscribe_calls().await.len(), 3);
    }

    #[tokio::test]
    async fn test_publish_failure() {
        let transport = MockTransport::new();
        transport.set_publish_failure(true).await;

        let result = transport
            .publish("t", Bytes::new(), QoS::AtMostOnce, false)
            .await;
        assert!(matches!(result, Err(TransportError::Request(_))));
        assert!(transport.get_published_messages().await.is_empty());
    }
}
