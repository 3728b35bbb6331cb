//! Impure I/O operations for the rumqttc transport
//!
//! Each `connect` builds a fresh rumqttc client and event loop and spawns a
//! driver task that polls the loop, forwards PUBLISH packets to the event
//! stream and reports the end of the connection. The driver never lets
//! rumqttc reconnect on its own: after any close it stops polling and the
//! session manager decides what happens next.

use super::event_router::{route_v4_event, route_v5_event, EventRoute};
use super::options::{build_v4_options, build_v5_options, to_v4_qos, to_v5_qos};
use crate::config::{ProtocolVersion, SessionConfig};
use crate::protocol::QoS;
use crate::transport::{EventStream, Transport, TransportError, TransportEvent};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn, Instrument};

/// Capacity of rumqttc's request channel
const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// Upper bound for each teardown step
const TEARDOWN_TIMEOUT: Duration = Duration::from_millis(500);

/// Client half for either protocol version
enum MqttClient {
    V4(rumqttc::AsyncClient),
    V5(rumqttc::v5::AsyncClient),
}

/// Event loop for either protocol version
enum MqttEventLoop {
    V4(rumqttc::EventLoop),
    V5(rumqttc::v5::EventLoop),
}

fn request_error<E>(error: E) -> TransportError
where
    E: std::error::Error + Send + Sync + 'static,
{
    TransportError::Request(Box::new(error))
}

impl MqttClient {
    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    ) -> Result<(), TransportError> {
        match self {
            MqttClient::V4(client) => client
                .publish(topic, to_v4_qos(qos), retain, payload.to_vec())
                .await
                .map_err(request_error),
            MqttClient::V5(client) => client
                .publish(topic, to_v5_qos(qos), retain, payload.to_vec())
                .await
                .map_err(request_error),
        }
    }

    async fn subscribe(&self, filters: &[(String, QoS)]) -> Result<(), TransportError> {
        match self {
            MqttClient::V4(client) => client
                .subscribe_many(
                    filters
                        .iter()
                        .map(|(filter, qos)| rumqttc::SubscribeFilter::new(filter.clone(), to_v4_qos(*qos))),
                )
                .await
                .map_err(request_error),
            MqttClient::V5(client) => client
                .subscribe_many(filters.iter().map(|(filter, qos)| {
                    rumqttc::v5::mqttbytes::v5::Filter::new(filter.clone(), to_v5_qos(*qos))
                }))
                .await
                .map_err(request_error),
        }
    }

    async fn unsubscribe(&self, filter: &str) -> Result<(), TransportError> {
        match self {
            MqttClient::V4(client) => client.unsubscribe(filter).await.map_err(request_error),
            MqttClient::V5(client) => client.unsubscribe(filter).await.map_err(request_error),
        }
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        match self {
            MqttClient::V4(client) => client.disconnect().await.map_err(request_error),
            MqttClient::V5(client) => client.disconnect().await.map_err(request_error),
        }
    }
}

impl MqttEventLoop {
    /// Poll once; `Err` carries the reason the connection ended
    async fn poll_route(&mut self) -> Result<EventRoute, String> {
        match self {
            MqttEventLoop::V4(event_loop) => event_loop
                .poll()
                .await
                .map(|event| route_v4_event(&event))
                .map_err(|e| e.to_string()),
            MqttEventLoop::V5(event_loop) => event_loop
                .poll()
                .await
                .map(|event| route_v5_event(&event))
                .map_err(|e| e.to_string()),
        }
    }
}

/// Helper method to create a new client and event loop for one connection
fn create_connection(
    config: &SessionConfig,
    clean_session: bool,
) -> Result<(MqttClient, MqttEventLoop), TransportError> {
    match config.broker.protocol {
        ProtocolVersion::V311 => {
            let options = build_v4_options(config, clean_session)?;
            let (client, event_loop) = rumqttc::AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
            Ok((MqttClient::V4(client), MqttEventLoop::V4(event_loop)))
        }
        ProtocolVersion::V5 => {
            let options = build_v5_options(config, clean_session)?;
            let (client, event_loop) =
                rumqttc::v5::AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
            Ok((MqttClient::V5(client), MqttEventLoop::V5(event_loop)))
        }
    }
}

/// One live connection: the client and the task driving its event loop
struct Connection {
    client: MqttClient,
    driver: JoinHandle<()>,
    /// Set before a local teardown so the driver does not report it as a close
    closing: Arc<AtomicBool>,
}

impl Connection {
    async fn close(self) -> Result<(), TransportError> {
        self.closing.store(true, Ordering::SeqCst);

        let requested = tokio::time::timeout(TEARDOWN_TIMEOUT, self.client.disconnect()).await;

        let mut driver = self.driver;
        if tokio::time::timeout(TEARDOWN_TIMEOUT, &mut driver).await.is_err() {
            debug!("Event loop driver still running after DISCONNECT, aborting it");
            driver.abort();
        }

        match requested {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(TEARDOWN_TIMEOUT)),
        }
    }
}

/// Poll the event loop until the connection ends
async fn drive_event_loop(
    mut event_loop: MqttEventLoop,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    connack_tx: oneshot::Sender<Result<(), String>>,
    closing: Arc<AtomicBool>,
) {
    let mut connack_tx = Some(connack_tx);

    let reason = loop {
        match event_loop.poll_route().await {
            Ok(EventRoute::ConnectionAcknowledged) => {
                debug!("CONNACK received");
                if let Some(tx) = connack_tx.take() {
                    let _ = tx.send(Ok(()));
                }
            }
            Ok(EventRoute::MessageReceived(message)) => {
                trace!(topic = %message.topic, bytes = message.payload.len(), "PUBLISH received");
                if events_tx.send(TransportEvent::Message(message)).is_err() {
                    debug!("Event stream dropped, stopping event loop");
                    return;
                }
            }
            Ok(EventRoute::Disconnected(reason)) => break reason,
            Ok(EventRoute::InfrastructureEvent(event)) => {
                trace!(target: "mqtt_transport", "MQTT event: {}", event);
            }
            Ok(EventRoute::OutgoingEvent) => {}
            Err(reason) => break reason,
        }
    };

    if closing.load(Ordering::SeqCst) {
        debug!(reason = %reason, "Connection closed locally");
        return;
    }

    match connack_tx.take() {
        // Handshake never completed; connect() reports it
        Some(tx) => {
            let _ = tx.send(Err(reason));
        }
        None => {
            warn!(reason = %reason, "MQTT connection closed");
            let _ = events_tx.send(TransportEvent::Closed(reason));
        }
    }
}

/// [`Transport`] implementation on top of rumqttc
pub struct RumqttcTransport {
    config: SessionConfig,
    connection: Mutex<Option<Connection>>,
}

impl RumqttcTransport {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            connection: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}

#[async_trait]
impl Transport for RumqttcTransport {
    async fn connect(&self, clean_session: bool) -> Result<EventStream, TransportError> {
        let mut slot = self.connection.lock().await;
        if let Some(previous) = slot.take() {
            if let Err(e) = previous.close().await {
                debug!(error = %e, "Previous connection did not close cleanly");
            }
        }

        let (client, event_loop) = create_connection(&self.config, clean_session)?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (connack_tx, connack_rx) = oneshot::channel();
        let closing = Arc::new(AtomicBool::new(false));

        let span = crate::connection_span!(
            host = %self.config.broker.host,
            port = self.config.broker.port,
            protocol = ?self.config.broker.protocol
        );
        let driver = tokio::spawn(
            drive_event_loop(event_loop, events_tx, connack_tx, closing.clone()).instrument(span),
        );
        *slot = Some(Connection {
            client,
            driver,
            closing,
        });

        let timeout = self.config.connect_timeout();
        let failure = match tokio::time::timeout(timeout, connack_rx).await {
            Ok(Ok(Ok(()))) => {
                info!(
                    host = %self.config.broker.host,
                    port = self.config.broker.port,
                    client_id = %self.config.broker.client_id,
                    "MQTT handshake completed"
                );
                return Ok(events_rx);
            }
            Ok(Ok(Err(reason))) => TransportError::Connection(reason),
            Ok(Err(_)) => TransportError::Connection("event loop stopped before CONNACK".to_string()),
            Err(_) => TransportError::Timeout(timeout),
        };

        if let Some(connection) = slot.take() {
            let _ = connection.close().await;
        }
        Err(failure)
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        match self.connection.lock().await.take() {
            Some(connection) => connection.close().await,
            None => Ok(()),
        }
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
        retain: bool,
    ) -> Result<(), TransportError> {
        let slot = self.connection.lock().await;
        let connection = slot.as_ref().ok_or(TransportError::NotConnected)?;
        connection.client.publish(topic, payload, qos, retain).await
    }

    async fn subscribe(&self, filters: &[(String, QoS)]) -> Result<(), TransportError> {
        if filters.is_empty() {
            return Ok(());
        }
        let slot = self.connection.lock().await;
        let connection = slot.as_ref().ok_or(TransportError::NotConnected)?;
        connection.client.subscribe(filters).await
    }

    async fn unsubscribe(&self, filters: &[String]) -> Result<(), TransportError> {
        let slot = self.connection.lock().await;
        let connection = slot.as_ref().ok_or(TransportError::NotConnected)?;
        for (sent, filter) in filters.iter().enumerate() {
            if let Err(source) = connection.client.unsubscribe(filter).await {
                if sent == 0 {
                    return Err(source);
                }
                return Err(TransportError::PartialUnsubscribe {
                    unsent: filters[sent..].to_vec(),
                    source: Box::new(source),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_config() -> SessionConfig {
        let mut config = SessionConfig::default();
        // Port 1 on localhost refuses connections immediately
        config.broker.host = "127.0.0.1".to_string();
        config.broker.port = 1;
        config.broker.connect_timeout_secs = 2;
        config.tls.enabled = false;
        config
    }

    #[tokio::test]
    async fn test_requests_without_connection_fail() {
        let transport = RumqttcTransport::new(unreachable_config());

        let publish = transport
            .publish("a", Bytes::from_static(b"x"), QoS::AtMostOnce, false)
            .await;
        let subscribe = transport
            .subscribe(&[("a".to_string(), QoS::AtMostOnce)])
            .await;

        assert!(matches!(publish, Err(TransportError::NotConnected)));
        assert!(matches!(subscribe, Err(TransportError::NotConnected)));
        assert!(transport.disconnect().await.is_ok());
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_fails() {
        for protocol in [ProtocolVersion::V5, ProtocolVersion::V311] {
            let mut config = unreachable_config();
            config.broker.protocol = protocol;
            let transport = RumqttcTransport::new(config);

            let result = transport.connect(true).await;

            assert!(
                matches!(
                    result,
                    Err(TransportError::Connection(_)) | Err(TransportError::Timeout(_))
                ),
                "protocol {protocol:?} should fail to connect"
            );
            // Failed connects leave nothing behind
            assert!(transport.connection.lock().await.is_none());
        }
    }

    #[tokio::test]
    async fn test_subscribe_with_no_filters_is_noop() {
        let transport = RumqttcTransport::new(unreachable_config());
        assert!(transport.subscribe(&[]).await.is_ok());
    }
}
