//! Impure I/O for the MQTT transport
//!
//! Every [`Transport::connect`] call builds a fresh rumqttc client and event
//! loop and spawns one poll task. The task confirms the handshake through a
//! oneshot, forwards publishes in arrival order and exits on the first error
//! after reporting `Closed`. It never retries: reconnection belongs to the
//! supervisor.

use super::connection::configure_mqtt_options;
use super::message_handler::{EventRoute, MessageHandler};
use crate::config::MqttSection;
use crate::error::{sanitize_error_message, ConnectionError};
use crate::protocol::frames::{Frame, FrameType, RawFrame};
use crate::transport::{ConnectionState, Credentials, EventSender, Transport, TransportEvent};
use async_trait::async_trait;
use rumqttc::v5::{AsyncClient, EventLoop};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

/// Request queue capacity between the client handle and its event loop
const REQUEST_CAPACITY: usize = 64;

/// How long `close()` waits for the poll task before aborting it
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

type HandshakeResult = Result<(), ConnectionError>;

/// State shared between the transport and its poll task
struct Shared {
    state_tx: watch::Sender<ConnectionState>,
    events: Mutex<Option<EventSender>>,
    closing: AtomicBool,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    fn emit(&self, event: TransportEvent) {
        let sender = match self.events.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        match sender {
            Some(sender) => {
                if sender.send(event).is_err() {
                    debug!(target: "mqtt_transport", "Event receiver dropped");
                }
            }
            None => debug!(target: "mqtt_transport", "No event sender registered, event dropped"),
        }
    }
}

/// Live connection handles, replaced on every `connect()`
#[derive(Default)]
struct Session {
    client: Option<AsyncClient>,
    poll_handle: Option<JoinHandle<()>>,
    shutdown_tx: Option<watch::Sender<bool>>,
}

impl Session {
    fn teardown(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(true);
        }
        if let Some(handle) = self.poll_handle.take() {
            handle.abort();
        }
        self.client = None;
    }
}

/// rumqttc-backed [`Transport`]
pub struct MqttTransport {
    config: MqttSection,
    shared: Arc<Shared>,
    session: Mutex<Session>,
}

impl MqttTransport {
    pub fn new(config: MqttSection) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            config,
            shared: Arc::new(Shared {
                state_tx,
                events: Mutex::new(None),
                closing: AtomicBool::new(false),
            }),
            session: Mutex::new(Session::default()),
        }
    }

    fn lock_session(&self) -> std::sync::MutexGuard<'_, Session> {
        match self.session.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Wait for the poll task to report the handshake result
    async fn wait_for_connection_confirmation(
        connack_rx: oneshot::Receiver<HandshakeResult>,
        timeout: Duration,
    ) -> HandshakeResult {
        match tokio::time::timeout(timeout, connack_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ConnectionError::Network(
                "event loop ended before ConnAck".to_string(),
            )),
            Err(_) => Err(ConnectionError::Timeout(timeout)),
        }
    }

    /// Drive one event loop until shutdown or the first error
    async fn run_event_loop(
        mut event_loop: EventLoop,
        shared: Arc<Shared>,
        mut connack_tx: Option<oneshot::Sender<HandshakeResult>>,
        mut shutdown_rx: watch::Receiver<bool>,
        handshake_timeout: Duration,
    ) {
        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        debug!(target: "mqtt_transport", "Shutdown signal received, stopping poll task");
                        break;
                    }
                }
                event_result = event_loop.poll() => {
                    match event_result {
                        Ok(event) => {
                            let route = MessageHandler::route_mqtt_event(&event);
                            if !Self::process_event_route(route, &shared, &mut connack_tx) {
                                break;
                            }
                        }
                        Err(e) => {
                            Self::handle_event_loop_error(e, &shared, &mut connack_tx, handshake_timeout);
                            break;
                        }
                    }
                }
            }
        }
        debug!(target: "mqtt_transport", "MQTT poll task stopped");
    }

    /// Returns true to keep polling
    fn process_event_route(
        route: EventRoute,
        shared: &Shared,
        connack_tx: &mut Option<oneshot::Sender<HandshakeResult>>,
    ) -> bool {
        match route {
            EventRoute::ConnectionAcknowledged => {
                shared.set_state(ConnectionState::Connected);
                if let Some(tx) = connack_tx.take() {
                    let _ = tx.send(Ok(()));
                }
                true
            }
            EventRoute::ConnectionRefused(code) => {
                shared.set_state(ConnectionState::Disconnected);
                let error = MessageHandler::classify_refusal(code);
                match connack_tx.take() {
                    Some(tx) => {
                        let _ = tx.send(Err(error));
                    }
                    None => shared.emit(TransportEvent::Closed {
                        abnormal: true,
                        reason: error.to_string(),
                    }),
                }
                false
            }
            EventRoute::MessageReceived { topic, payload, .. } => {
                debug!(target: "mqtt_transport", "Received MQTT message on topic: {}", topic);
                shared.emit(TransportEvent::Frame(RawFrame::new(topic, payload)));
                true
            }
            EventRoute::Disconnected { reason } => {
                warn!(target: "mqtt_transport", reason = %reason, "Broker sent disconnect");
                shared.set_state(ConnectionState::Disconnected);
                if !shared.closing.load(Ordering::SeqCst) {
                    shared.emit(TransportEvent::Closed {
                        abnormal: true,
                        reason: format!("broker disconnect: {reason}"),
                    });
                }
                false
            }
            EventRoute::SubscriptionConfirmed {
                packet_id,
                return_codes,
            } => {
                debug!(target: "mqtt_transport", packet_id, "Subscription confirmed: {:?}", return_codes);
                true
            }
            EventRoute::InfrastructureEvent(event_str) => {
                debug!(target: "mqtt_transport", "MQTT event: {}", event_str);
                true
            }
            EventRoute::OutgoingEvent => true,
        }
    }

    fn handle_event_loop_error(
        error: rumqttc::v5::ConnectionError,
        shared: &Shared,
        connack_tx: &mut Option<oneshot::Sender<HandshakeResult>>,
        handshake_timeout: Duration,
    ) {
        shared.set_state(ConnectionState::Disconnected);

        if let Some(tx) = connack_tx.take() {
            let _ = tx.send(Err(MessageHandler::classify_error(&error, handshake_timeout)));
            return;
        }

        if shared.closing.load(Ordering::SeqCst) {
            debug!(target: "mqtt_transport", "Event loop ended during close: {}", error);
            return;
        }

        let reason = sanitize_error_message(&error.to_string());
        error!(target: "mqtt_transport", reason = %reason, "MQTT connection lost");
        shared.emit(TransportEvent::Closed {
            abnormal: true,
            reason,
        });
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(&self, credentials: &Credentials) -> Result<(), ConnectionError> {
        let mqtt_options = configure_mqtt_options(&self.config, credentials)?;
        let timeout = self.config.connect_timeout();

        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CAPACITY);
        let (connack_tx, connack_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        self.shared.closing.store(false, Ordering::SeqCst);
        self.shared.set_state(ConnectionState::Connecting);

        let span = crate::mqtt_span!(operation = "poll", broker = %self.config.broker_url);
        let handle = tokio::spawn(
            Self::run_event_loop(
                event_loop,
                self.shared.clone(),
                Some(connack_tx),
                shutdown_rx,
                timeout,
            )
            .instrument(span),
        );

        {
            let mut session = self.lock_session();
            session.teardown();
            session.client = Some(client);
            session.poll_handle = Some(handle);
            session.shutdown_tx = Some(shutdown_tx);
        }

        info!(broker = %self.config.broker_url, "Connecting to MQTT broker");
        match Self::wait_for_connection_confirmation(connack_rx, timeout).await {
            Ok(()) => {
                info!(broker = %self.config.broker_url, "MQTT connection established");
                Ok(())
            }
            Err(e) => {
                self.lock_session().teardown();
                self.shared.set_state(ConnectionState::Disconnected);
                warn!(reason = e.reason(), "MQTT handshake failed: {}", e);
                Err(e)
            }
        }
    }

    fn send(&self, frame: &Frame) -> bool {
        if self.state() != ConnectionState::Connected {
            return false;
        }

        let session = self.lock_session();
        let Some(client) = session.client.as_ref() else {
            return false;
        };

        let qos = MessageHandler::to_qos(frame.qos_or_default());
        let result = match frame.frame_type {
            FrameType::Subscribe => client.try_subscribe(frame.topic.clone(), qos),
            FrameType::Unsubscribe => client.try_unsubscribe(frame.topic.clone()),
            FrameType::Publish => client.try_publish(
                frame.topic.clone(),
                qos,
                false,
                frame.payload.clone().unwrap_or_default(),
            ),
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(target: "mqtt_transport", topic = %frame.topic, "Failed to enqueue frame: {}", e);
                false
            }
        }
    }

    async fn close(&self) {
        self.shared.closing.store(true, Ordering::SeqCst);

        let (client, handle, shutdown_tx) = {
            let mut session = self.lock_session();
            (
                session.client.take(),
                session.poll_handle.take(),
                session.shutdown_tx.take(),
            )
        };

        if let Some(client) = client {
            if let Err(e) = client.try_disconnect() {
                debug!(target: "mqtt_transport", "Disconnect request not queued: {}", e);
            }
        }
        if let Some(shutdown_tx) = shutdown_tx {
            let _ = shutdown_tx.send(true);
        }
        if let Some(handle) = handle {
            match tokio::time::timeout(SHUTDOWN_GRACE, handle).await {
                Ok(Ok(())) => debug!(target: "mqtt_transport", "Poll task shut down gracefully"),
                Ok(Err(e)) if !e.is_cancelled() => warn!("Poll task ended with error: {}", e),
                Err(_) => warn!("Poll task didn't shut down gracefully, abandoning it"),
                _ => {}
            }
        }

        self.shared.set_state(ConnectionState::Disconnected);
        self.shared.emit(TransportEvent::Closed {
            abnormal: false,
            reason: "closed by client".to_string(),
        });
        info!("MQTT transport closed");
    }

    fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    fn set_event_sender(&self, sender: EventSender) {
        match self.shared.events.lock() {
            Ok(mut guard) => *guard = Some(sender),
            Err(poisoned) => *poisoned.into_inner() = Some(sender),
        }
    }

    fn name(&self) -> &'static str {
        "mqtt"
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        // Async close is impossible here; only stop the background task.
        self.lock_session().teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn unreachable_config() -> MqttSection {
        MqttSection {
            // Nothing listens on port 1
            broker_url: "mqtt://127.0.0.1:1".to_string(),
            connect_timeout_secs: 2,
            ..MqttSection::default()
        }
    }

    #[test]
    fn test_new_transport_is_disconnected() {
        let transport = MqttTransport::new(MqttSection::default());
        assert_eq!(transport.state(), ConnectionState::Disconnected);
        assert_eq!(transport.name(), "mqtt");
    }

    #[tokio::test]
    async fn test_send_fails_without_connection() {
        let transport = MqttTransport::new(MqttSection::default());
        assert!(!transport.send(&Frame::subscribe("farm/dev1/stream/temp")));
        assert!(!transport.send(&Frame::publish("farm/dev1/state/motor/set", "{}")));
    }

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_success() {
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = tx.send(Ok(()));
        });
        let result =
            MqttTransport::wait_for_connection_confirmation(rx, Duration::from_millis(200)).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_timeout() {
        let (tx, rx) = oneshot::channel::<HandshakeResult>();
        let result =
            MqttTransport::wait_for_connection_confirmation(rx, Duration::from_millis(10)).await;
        assert_eq!(result, Err(ConnectionError::Timeout(Duration::from_millis(10))));
        drop(tx);
    }

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_sender_dropped() {
        let (tx, rx) = oneshot::channel::<HandshakeResult>();
        drop(tx);
        let result =
            MqttTransport::wait_for_connection_confirmation(rx, Duration::from_millis(100)).await;
        assert!(matches!(result, Err(ConnectionError::Network(_))));
    }

    #[tokio::test]
    async fn test_invalid_url_fails_fast() {
        let transport = MqttTransport::new(MqttSection {
            broker_url: "not a url".to_string(),
            ..MqttSection::default()
        });
        let result = transport.connect(&Credentials::anonymous()).await;
        assert!(matches!(result, Err(ConnectionError::Network(_))));
        assert_eq!(transport.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_refused_connection_reports_error() {
        let transport = MqttTransport::new(unreachable_config());
        let result = transport.connect(&Credentials::anonymous()).await;
        assert!(result.is_err());
        assert_eq!(transport.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_close_emits_normal_close() {
        let transport = MqttTransport::new(MqttSection::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        transport.set_event_sender(tx);

        transport.close().await;

        assert_eq!(
            rx.recv().await,
            Some(TransportEvent::Closed {
                abnormal: false,
                reason: "closed by client".to_string()
            })
        );
        assert_eq!(transport.state(), ConnectionState::Disconnected);
    }
}
