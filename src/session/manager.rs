//! Session manager
//!
//! [`SessionManager`] owns the transport, the desired subscription set and the
//! handler registry. One background lifecycle task consumes the current
//! connection's events, dispatches messages to handlers, and after an
//! unsolicited close runs the reconnect loop and picks up the next
//! connection's events.
//!
//! Connect, reconnect and every subscription change are serialised on a
//! single async mutex, so a replay after reconnect always sends the set as it
//! is at that moment. The connection state is mirrored into a `watch`
//! channel for lock-free reads.

use super::dispatch::{decode_inbound, deliver, HandlerError, HandlerFn, HandlerRegistry};
use super::reconnect::{should_attempt_reconnection, ReconnectionDecision};
use super::state::{log_state_transition, ConnectionState, LifecycleEvent};
use super::stats::{SessionStats, StatsSnapshot};
use super::subscriptions::SubscriptionSet;
use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};
use crate::protocol::{validate_topic_filter, validate_topic_name, InboundMessage, Message, QoS};
use crate::transport::{EventStream, Transport, TransportError, TransportEvent};
use bytes::Bytes;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// How long `shutdown()` waits for the lifecycle task before aborting it
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// State guarded by the session lock
struct SessionCore {
    state: ConnectionState,
    subscriptions: SubscriptionSet,
    /// Count of successful connects; identifies the live event stream
    epoch: u64,
}

struct Inner<T: Transport> {
    transport: Arc<T>,
    config: SessionConfig,
    core: Mutex<SessionCore>,
    state_tx: watch::Sender<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
    handlers: RwLock<HandlerRegistry>,
    lifecycle: std::sync::Mutex<Option<JoinHandle<()>>>,
    stats: SessionStats,
}

enum Established {
    Connected { epoch: u64, events: EventStream },
    AlreadyConnected,
}

/// Resilient MQTT session over a [`Transport`]
///
/// Cloning is cheap and every clone drives the same session.
///
/// ```
/// use mqtt_session::testing::MockTransport;
/// use mqtt_session::{QoS, SessionConfig, SessionManager};
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), mqtt_session::SessionError> {
/// let session = SessionManager::new(SessionConfig::default(), Arc::new(MockTransport::new()));
/// session.on_message("printer", "home/#", |msg| {
///     println!("{}: {}", msg.topic, msg.payload);
///     Ok(())
/// })?;
///
/// session.connect().await?;
/// session.subscribe(&["home/kitchen/light"], QoS::ExactlyOnce).await?;
/// session.publish_str("home/kitchen/light", "on", QoS::AtLeastOnce, false).await?;
/// session.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct SessionManager<T: Transport> {
    inner: Arc<Inner<T>>,
}

impl<T: Transport> Clone for SessionManager<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport> SessionManager<T> {
    /// Create a disconnected session; nothing happens until [`connect`](Self::connect)
    pub fn new(config: SessionConfig, transport: Arc<T>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            inner: Arc::new(Inner {
                transport,
                config,
                core: Mutex::new(SessionCore {
                    state: ConnectionState::Disconnected,
                    subscriptions: SubscriptionSet::new(),
                    epoch: 0,
                }),
                state_tx,
                shutdown_tx,
                handlers: RwLock::new(HandlerRegistry::new()),
                lifecycle: std::sync::Mutex::new(None),
                stats: SessionStats::new(),
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.inner.transport
    }

    /// Connect to the broker and replay the subscription set
    ///
    /// A no-op when already connected. On failure the error is returned and
    /// the session keeps retrying in the background with backoff.
    pub async fn connect(&self) -> SessionResult<()> {
        match self.inner.establish().await {
            Ok(Established::Connected { epoch, events }) => {
                self.spawn_lifecycle(Some((epoch, events)));
                Ok(())
            }
            Ok(Established::AlreadyConnected) => {
                debug!("connect() called while already connected");
                Ok(())
            }
            Err(SessionError::ConnectFailed(source)) => {
                self.spawn_lifecycle(None);
                Err(SessionError::ConnectFailed(source))
            }
            Err(e) => Err(e),
        }
    }

    /// Stop the session for good
    ///
    /// Cancels in-flight operations, stops reconnection, disconnects the
    /// transport on a best-effort basis and waits briefly for the lifecycle
    /// task. Calling it again is a no-op.
    pub async fn shutdown(&self) {
        self.inner.shutdown_tx.send_replace(true);

        {
            let mut core = self.inner.core.lock().await;
            if core.state.is_terminal() {
                debug!("shutdown() called on a session that is already shut down");
                return;
            }
            self.inner
                .transition(&mut core, LifecycleEvent::ShutdownRequested);
            self.inner.stats.record_disconnected();
            self.inner.disconnect_transport().await;
        }

        let handle = self
            .inner
            .lifecycle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await.is_err() {
                warn!("Lifecycle task did not stop in time, aborting it");
                handle.abort();
            }
        }

        info!("Session shut down");
    }

    /// Suspend until [`shutdown`](Self::shutdown) has been requested
    pub async fn wait_for_shutdown(&self) {
        let mut shutdown_rx = self.inner.shutdown_tx.subscribe();
        shutdown_signalled(&mut shutdown_rx).await;
    }

    /// Publish a message; fails without touching the transport unless connected
    pub async fn publish(
        &self,
        topic: &str,
        payload: impl Into<Bytes>,
        qos: QoS,
        retain: bool,
    ) -> SessionResult<()> {
        validate_topic_name(topic)?;

        let state = self.state();
        if !state.can_publish() {
            debug!(topic = %topic, state = ?state, "Refusing to publish while not connected");
            return Err(SessionError::NotConnected { state });
        }

        let payload = payload.into();
        let size = payload.len();
        let result = self
            .inner
            .cancellable(self.inner.transport.publish(topic, payload, qos, retain))
            .await?;

        match result {
            Ok(()) => {
                self.inner.stats.record_publish(true);
                info!(topic = %topic, qos = %qos, retain, bytes = size, "Published message");
                Ok(())
            }
            Err(source) => {
                self.inner.stats.record_publish(false);
                warn!(topic = %topic, error = %source, "Publish failed");
                Err(SessionError::PublishFailed {
                    topic: topic.to_string(),
                    source,
                })
            }
        }
    }

    /// Publish a text payload
    pub async fn publish_str(
        &self,
        topic: &str,
        payload: &str,
        qos: QoS,
        retain: bool,
    ) -> SessionResult<()> {
        self.publish(topic, payload.to_owned(), qos, retain).await
    }

    /// Add topic filters to the subscription set
    ///
    /// Filters already present with the same QoS are not re-sent. While not
    /// connected the filters are recorded and `NotConnected` is returned; they
    /// are sent on the next successful connect.
    pub async fn subscribe<S: AsRef<str>>(&self, topics: &[S], qos: QoS) -> SessionResult<()> {
        for topic in topics {
            validate_topic_filter(topic.as_ref())?;
        }

        let mut core = self.inner.core.lock().await;
        if core.state.is_terminal() {
            return Err(SessionError::ShutDown);
        }

        let pending: Vec<(String, QoS)> = topics
            .iter()
            .map(|topic| topic.as_ref())
            .filter(|topic| core.subscriptions.insert(topic, qos).needs_request())
            .map(|topic| (topic.to_string(), qos))
            .collect();

        if core.state != ConnectionState::Connected {
            info!(
                count = pending.len(),
                state = ?core.state,
                "Recorded subscriptions, they will be sent on connect"
            );
            return Err(SessionError::NotConnected { state: core.state });
        }

        if pending.is_empty() {
            debug!("Subscriptions unchanged, nothing to send");
            return Ok(());
        }

        let result = self
            .inner
            .cancellable(self.inner.transport.subscribe(&pending))
            .await?;
        if result.is_ok() {
            core.subscriptions.confirm(&pending);
        }
        let topics: Vec<String> = pending.into_iter().map(|(topic, _)| topic).collect();

        match result {
            Ok(()) => {
                info!(topics = ?topics, qos = %qos, "Subscribed");
                Ok(())
            }
            Err(source) => {
                warn!(topics = ?topics, error = %source, "Subscribe failed, it is retried on the next subscribe or reconnect");
                Err(SessionError::SubscribeFailed { topics, source })
            }
        }
    }

    /// Remove topic filters from the subscription set
    ///
    /// Removal always takes effect locally; the broker is only told when
    /// connected and at least one filter was actually subscribed.
    pub async fn unsubscribe<S: AsRef<str>>(&self, topics: &[S]) -> SessionResult<()> {
        let mut core = self.inner.core.lock().await;
        if core.state.is_terminal() {
            return Err(SessionError::ShutDown);
        }

        let removed: Vec<String> = topics
            .iter()
            .map(|topic| topic.as_ref())
            .filter(|topic| core.subscriptions.remove(topic))
            .map(str::to_string)
            .collect();

        if removed.is_empty() || core.state != ConnectionState::Connected {
            debug!(removed = ?removed, state = ?core.state, "Unsubscribed locally");
            return Ok(());
        }

        let result = self
            .inner
            .cancellable(self.inner.transport.unsubscribe(&removed))
            .await?;

        match result {
            Ok(()) => {
                info!(topics = ?removed, "Unsubscribed");
                Ok(())
            }
            Err(source) => {
                // Filters sent before the failure are already gone at the broker
                let topics = match &source {
                    TransportError::PartialUnsubscribe { unsent, .. } => unsent.clone(),
                    _ => removed,
                };
                warn!(topics = ?topics, error = %source, "Unsubscribe failed");
                Err(SessionError::UnsubscribeFailed { topics, source })
            }
        }
    }

    /// Register a named handler for messages matching `filter`
    pub fn on_message<F>(&self, name: &str, filter: &str, handler: F) -> SessionResult<()>
    where
        F: Fn(&Message) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let handler: HandlerFn = Arc::new(handler);
        self.inner
            .handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .register(name, filter, handler)?;
        debug!(handler = %name, filter = %filter, "Registered message handler");
        Ok(())
    }

    /// Remove a handler; returns true if one was registered under `name`
    pub fn remove_handler(&self, name: &str) -> bool {
        self.inner
            .handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(name)
    }

    pub fn handler_names(&self) -> Vec<String> {
        self.inner
            .handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .names()
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Receiver that observes every state change
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Copy of the desired subscription set
    pub async fn subscriptions(&self) -> SubscriptionSet {
        self.inner.core.lock().await.subscriptions.clone()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Start a lifecycle task, either consuming a fresh connection or
    /// reconnecting when `start` is `None`
    fn spawn_lifecycle(&self, start: Option<(u64, EventStream)>) {
        let mut slot = self
            .inner
            .lifecycle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if start.is_none() {
            if let Some(handle) = slot.as_ref() {
                if !handle.is_finished() {
                    debug!("Reconnection already in progress");
                    return;
                }
            }
        }

        let span = crate::session_span!(client_id = %self.inner.config.broker.client_id);
        // A replaced task notices the newer connection and exits on its own
        *slot = Some(tokio::spawn(
            run_lifecycle(Arc::clone(&self.inner), start).instrument(span),
        ));
    }
}

impl<T: Transport> Inner<T> {
    fn transition(&self, core: &mut SessionCore, event: LifecycleEvent) {
        let from = core.state;
        let to = from.apply(&event);
        log_state_transition(from, to, &event);
        core.state = to;
        self.state_tx.send_replace(to);
    }

    /// Run `operation` unless shutdown is requested first
    async fn cancellable<F: Future>(&self, operation: F) -> SessionResult<F::Output> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::select! {
            biased;
            _ = shutdown_signalled(&mut shutdown_rx) => Err(SessionError::Cancelled),
            output = operation => Ok(output),
        }
    }

    async fn disconnect_transport(&self) {
        match tokio::time::timeout(SHUTDOWN_GRACE, self.transport.disconnect()).await {
            Ok(Ok(())) => debug!("Transport disconnected"),
            Ok(Err(e)) => warn!(error = %e, "Transport disconnect failed"),
            Err(_) => warn!("Transport disconnect timed out"),
        }
    }

    /// Connect the transport and replay the subscription set under the lock
    async fn establish(&self) -> SessionResult<Established> {
        let mut core = self.core.lock().await;
        match core.state {
            ConnectionState::ShuttingDown => return Err(SessionError::ShutDown),
            ConnectionState::Connected => return Ok(Established::AlreadyConnected),
            ConnectionState::Disconnected | ConnectionState::Connecting => {}
        }

        self.transition(&mut core, LifecycleEvent::ConnectRequested);
        core.subscriptions.unconfirm_all();
        self.stats.record_connect_attempt();
        info!(
            host = %self.config.broker.host,
            port = self.config.broker.port,
            "Connecting to MQTT broker"
        );

        let connected = self
            .cancellable(self.transport.connect(self.config.broker.clean_session))
            .await;
        let events = match connected {
            Ok(Ok(events)) => events,
            Ok(Err(e)) => {
                self.stats.record_connection_failure();
                self.transition(&mut core, LifecycleEvent::HandshakeFailed(e.to_string()));
                return Err(SessionError::ConnectFailed(e));
            }
            Err(cancelled) => {
                self.transition(
                    &mut core,
                    LifecycleEvent::HandshakeFailed("cancelled by shutdown".to_string()),
                );
                return Err(cancelled);
            }
        };

        let requests = core.subscriptions.to_requests();
        if !requests.is_empty() {
            match self.cancellable(self.transport.subscribe(&requests)).await {
                Ok(Ok(())) => {
                    core.subscriptions.confirm(&requests);
                    info!(count = requests.len(), "Replayed subscriptions");
                }
                Ok(Err(e)) => {
                    // Never report Connected with the broker missing subscriptions
                    self.stats.record_connection_failure();
                    self.disconnect_transport().await;
                    self.transition(
                        &mut core,
                        LifecycleEvent::HandshakeFailed(format!("subscription replay failed: {e}")),
                    );
                    return Err(SessionError::ConnectFailed(e));
                }
                Err(cancelled) => {
                    self.transition(
                        &mut core,
                        LifecycleEvent::HandshakeFailed("cancelled by shutdown".to_string()),
                    );
                    return Err(cancelled);
                }
            }
        }

        let is_reconnect = core.epoch > 0;
        core.epoch += 1;
        let epoch = core.epoch;
        self.transition(&mut core, LifecycleEvent::HandshakeSucceeded);
        self.stats.record_connected(is_reconnect);

        Ok(Established::Connected { epoch, events })
    }

    /// Record an unsolicited close; false when the caller should stop
    async fn mark_disconnected(&self, epoch: u64, reason: String) -> bool {
        let mut core = self.core.lock().await;
        if core.state.is_terminal() {
            debug!(reason = %reason, "Connection closed during shutdown");
            return false;
        }
        if core.epoch != epoch {
            debug!(epoch, current = core.epoch, "Ignoring close of a superseded connection");
            return false;
        }

        self.transition(&mut core, LifecycleEvent::UnsolicitedClose(reason));
        core.subscriptions.unconfirm_all();
        self.stats.record_disconnected();
        true
    }

    /// Retry with backoff until connected, exhausted or shut down
    async fn reconnect(
        &self,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Option<(u64, EventStream)> {
        let mut attempts = 0u32;

        loop {
            let shutdown_requested = *shutdown_rx.borrow();
            match should_attempt_reconnection(attempts, &self.config.reconnect, shutdown_requested) {
                ReconnectionDecision::AbortShutdownRequested => {
                    info!("Shutdown requested, stopping reconnection");
                    return None;
                }
                ReconnectionDecision::AbortMaxAttemptsExceeded => {
                    let backoff_ms = self
                        .config
                        .reconnect
                        .calculate_max_total_time()
                        .map_or(0, |total| total.as_millis() as u64);
                    error!(
                        attempts,
                        backoff_ms,
                        "Maximum reconnection attempts exceeded, session stays disconnected"
                    );
                    return None;
                }
                ReconnectionDecision::Proceed { attempt, delay } => {
                    attempts = attempt;
                    let max_display = self
                        .config
                        .reconnect
                        .max_attempts
                        .map_or("∞".to_string(), |max| max.to_string());
                    info!(
                        "Attempting reconnection {}/{} after {}ms delay",
                        attempt,
                        max_display,
                        delay.as_millis()
                    );

                    if !interruptible_sleep(shutdown_rx, delay).await {
                        return None;
                    }

                    match self.establish().await {
                        Ok(Established::Connected { epoch, events }) => {
                            info!(attempt, "Reconnected to MQTT broker");
                            return Some((epoch, events));
                        }
                        Ok(Established::AlreadyConnected) => {
                            debug!("Session was reconnected elsewhere, stopping this loop");
                            return None;
                        }
                        Err(SessionError::ConnectFailed(e)) => {
                            warn!(attempt, error = %e, "Reconnection attempt failed");
                        }
                        Err(e) => {
                            debug!(error = %e, "Reconnection stopped");
                            return None;
                        }
                    }
                }
            }
        }
    }

    /// Deliver one inbound message to every matching handler
    async fn dispatch(&self, inbound: InboundMessage) {
        self.stats.record_received();

        let subscribed = self.core.lock().await.subscriptions.matches(&inbound.topic);
        if !subscribed {
            debug!(topic = %inbound.topic, "Dropping message on a topic with no subscription");
            self.stats.record_dropped();
            return;
        }

        let message = match decode_inbound(&inbound) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable message");
                self.stats.record_dropped();
                return;
            }
        };

        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .matching(&message.topic);
        if handlers.is_empty() {
            debug!(topic = %message.topic, "No handler registered for topic");
        }

        let report = deliver(&message, &handlers);
        self.stats.record_dispatched(report.failed);
    }
}

/// Consume connection events, reconnecting after each close
async fn run_lifecycle<T: Transport>(
    inner: Arc<Inner<T>>,
    mut current: Option<(u64, EventStream)>,
) {
    let mut shutdown_rx = inner.shutdown_tx.subscribe();

    loop {
        if let Some((epoch, mut events)) = current.take() {
            debug!(epoch, "Consuming connection events");
            let reason = loop {
                tokio::select! {
                    biased;
                    _ = shutdown_signalled(&mut shutdown_rx) => {
                        debug!("Shutdown signal received, stopping lifecycle task");
                        return;
                    }
                    event = events.recv() => match event {
                        Some(TransportEvent::Message(inbound)) => inner.dispatch(inbound).await,
                        Some(TransportEvent::Closed(reason)) => break reason,
                        None => break "event stream ended".to_string(),
                    },
                }
            };

            if !inner.mark_disconnected(epoch, reason).await {
                return;
            }
        }

        match inner.reconnect(&mut shutdown_rx).await {
            Some(next) => current = Some(next),
            None => return,
        }
    }
}

/// Resolves once shutdown has been requested
async fn shutdown_signalled(shutdown_rx: &mut watch::Receiver<bool>) {
    let _ = shutdown_rx.wait_for(|requested| *requested).await;
}

/// Perform interruptible sleep with shutdown monitoring
/// Returns true if sleep completed, false if shutdown requested
async fn interruptible_sleep(shutdown_rx: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        biased;
        _ = shutdown_signalled(shutdown_rx) => {
            info!("Shutdown signal received during reconnection delay, stopping");
            false
        }
        _ = tokio::time::sleep(delay) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReconnectConfig;
    use crate::testing::MockTransport;

    fn fast_config() -> SessionConfig {
        let mut config = SessionConfig::default();
        config.reconnect = ReconnectConfig {
            initial_delay_ms: 1,
            max_delay_ms: 5,
            multiplier: 2.0,
            max_attempts: None,
        };
        config
    }

    fn session() -> (SessionManager<MockTransport>, Arc<MockTransport>) {
        let transport = Arc::new(MockTransport::new());
        (SessionManager::new(fast_config(), transport.clone()), transport)
    }

    #[tokio::test]
    async fn test_connect_transitions_to_connected() {
        let (session, transport) = session();
        assert_eq!(session.state(), ConnectionState::Disconnected);

        session.connect().await.unwrap();

        assert_eq!(session.state(), ConnectionState::Connected);
        assert_eq!(transport.get_connect_calls().await, vec![true]);
        // Empty set: nothing to replay
        assert!(transport.get_subscribe_calls().await.is_empty());
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_connect_when_connected_is_noop() {
        let (session, transport) = session();
        session.connect().await.unwrap();
        session.connect().await.unwrap();

        assert_eq!(transport.get_connect_count().await, 1);
        assert_eq!(session.stats().connections_established, 1);
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_publish_requires_connection() {
        let (session, transport) = session();

        let result = session
            .publish_str("home/kitchen/light", "on", QoS::AtLeastOnce, false)
            .await;

        assert!(matches!(
            result,
            Err(SessionError::NotConnected {
                state: ConnectionState::Disconnected
            })
        ));
        assert!(transport.get_published_messages().await.is_empty());
    }

    #[tokio::test]
    async fn test_publish_rejects_wildcard_topic() {
        let (session, _transport) = session();
        session.connect().await.unwrap();

        let result = session.publish_str("home/+/light", "on", QoS::AtMostOnce, false).await;
        assert!(matches!(result, Err(SessionError::InvalidTopic(_))));
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_subscribe_while_disconnected_is_recorded_and_replayed() {
        let (session, transport) = session();

        let result = session.subscribe(&["a/b"], QoS::AtLeastOnce).await;
        assert!(matches!(result, Err(SessionError::NotConnected { .. })));
        assert!(session.subscriptions().await.contains("a/b"));

        session.connect().await.unwrap();
        assert_eq!(
            transport.get_subscribe_calls().await,
            vec![vec![("a/b".to_string(), QoS::AtLeastOnce)]]
        );
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_resubscribe_same_qos_sends_nothing() {
        let (session, transport) = session();
        session.connect().await.unwrap();

        session.subscribe(&["a", "b"], QoS::AtLeastOnce).await.unwrap();
        session.subscribe(&["a"], QoS::AtLeastOnce).await.unwrap();
        session.subscribe(&["a"], QoS::ExactlyOnce).await.unwrap();

        assert_eq!(
            transport.get_subscribe_calls().await,
            vec![
                vec![
                    ("a".to_string(), QoS::AtLeastOnce),
                    ("b".to_string(), QoS::AtLeastOnce)
                ],
                vec![("a".to_string(), QoS::ExactlyOnce)],
            ]
        );
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_subscribe_failure_keeps_topics() {
        let (session, transport) = session();
        session.connect().await.unwrap();
        transport.set_subscribe_failure(true).await;

        let result = session.subscribe(&["a"], QoS::AtMostOnce).await;

        assert!(matches!(result, Err(SessionError::SubscribeFailed { .. })));
        assert!(session.subscriptions().await.contains("a"));
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_retry_after_failed_subscribe_is_sent() {
        let (session, transport) = session();
        session.connect().await.unwrap();
        transport.set_subscribe_failure(true).await;
        assert!(session.subscribe(&["a"], QoS::AtLeastOnce).await.is_err());

        transport.set_subscribe_failure(false).await;
        session.subscribe(&["a"], QoS::AtLeastOnce).await.unwrap();
        // Accepted now, so a third identical call is a no-op
        session.subscribe(&["a"], QoS::AtLeastOnce).await.unwrap();

        let expected = vec![("a".to_string(), QoS::AtLeastOnce)];
        assert_eq!(
            transport.get_subscribe_calls().await,
            vec![expected.clone(), expected]
        );
        assert!(session.subscriptions().await.is_confirmed("a"));
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_unsubscribe_only_sends_present_topics() {
        let (session, transport) = session();
        session.connect().await.unwrap();
        session.subscribe(&["a"], QoS::AtMostOnce).await.unwrap();

        session.unsubscribe(&["a", "never-subscribed"]).await.unwrap();
        session.unsubscribe(&["a"]).await.unwrap();

        assert_eq!(
            transport.get_unsubscribe_calls().await,
            vec![vec!["a".to_string()]]
        );
        assert!(session.subscriptions().await.is_empty());
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_unsubscribe_while_disconnected_is_local() {
        let (session, transport) = session();
        let _ = session.subscribe(&["a", "b"], QoS::AtMostOnce).await;

        session.unsubscribe(&["a"]).await.unwrap();

        assert!(!session.subscriptions().await.contains("a"));
        assert!(transport.get_unsubscribe_calls().await.is_empty());

        // The removed filter is left out of the replay
        session.connect().await.unwrap();
        assert_eq!(
            transport.get_subscribe_calls().await,
            vec![vec![("b".to_string(), QoS::AtMostOnce)]]
        );
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_partial_unsubscribe_reports_unsent_filters() {
        let (session, transport) = session();
        session.connect().await.unwrap();
        session
            .subscribe(&["a", "b", "c"], QoS::AtMostOnce)
            .await
            .unwrap();
        transport.fail_unsubscribe_after(1).await;

        let result = session.unsubscribe(&["a", "b", "c"]).await;

        match result {
            Err(SessionError::UnsubscribeFailed { topics, .. }) => {
                assert_eq!(topics, vec!["b".to_string(), "c".to_string()]);
            }
            other => panic!("expected UnsubscribeFailed, got {other:?}"),
        }
        assert!(session.subscriptions().await.is_empty());
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_is_terminal_and_idempotent() {
        let (session, transport) = session();
        session.connect().await.unwrap();

        session.shutdown().await;
        session.shutdown().await;

        assert_eq!(session.state(), ConnectionState::ShuttingDown);
        assert_eq!(transport.get_disconnect_count().await, 1);
        assert!(matches!(session.connect().await, Err(SessionError::ShutDown)));
        assert!(matches!(
            session.subscribe(&["a"], QoS::AtMostOnce).await,
            Err(SessionError::ShutDown)
        ));
    }

    #[tokio::test]
    async fn test_wait_for_shutdown_returns_after_shutdown() {
        let (session, _transport) = session();
        let waiter = {
            let session = session.clone();
            tokio::spawn(async move { session.wait_for_shutdown().await })
        };

        session.shutdown().await;

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should finish")
            .unwrap();
    }

    #[tokio::test]
    async fn test_handler_registration() {
        let (session, _transport) = session();
        session.on_message("a", "home/#", |_msg| Ok(())).unwrap();

        let duplicate = session.on_message("a", "garden/#", |_msg| Ok(()));

        assert!(matches!(duplicate, Err(SessionError::HandlerExists(_))));
        assert_eq!(session.handler_names(), vec!["a".to_string()]);
        assert!(session.remove_handler("a"));
        assert!(session.handler_names().is_empty());
    }
}
