//! Live data service
//!
//! Owns one transport connection and serializes every mutation of the
//! subscription registry, the live state projector and the reconnection
//! supervisor inside a single actor task. The UI talks to it through the
//! async methods below and observes results through `watch` channels.
//!
//! Each instance is independent; there is no process-wide connection.

use crate::config::DashboardConfig;
use crate::error::{CommandError, ConnectionError, ServiceError};
use crate::model::{LiveState, ReadingKind};
use crate::normalizer::normalize;
use crate::observability::metrics::metrics;
use crate::projector::LiveStateProjector;
use crate::protocol::frames::RawFrame;
use crate::protocol::topics::TopicScheme;
use crate::publisher::{CommandPublisher, CommandReceipt, PumpCommand};
use crate::registry::{EventSink, SubscribeOutcome, SubscriptionRegistry};
use crate::supervisor::{HealthMetrics, ReconnectConfig, ReconnectionSupervisor, SupervisorAction};
use crate::transport::{ConnectionState, Credentials, Transport, TransportEvent};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Sleep};
use tracing::{debug, info, warn, Instrument};

type ConnectFuture = Pin<Box<dyn Future<Output = Result<(), ConnectionError>> + Send>>;

enum ServiceCommand {
    Subscribe {
        device_id: String,
        consumer: EventSink,
        reply: oneshot::Sender<Result<SubscribeOutcome, ServiceError>>,
    },
    Unsubscribe {
        device_id: String,
        reply: oneshot::Sender<()>,
    },
    Retry {
        reply: oneshot::Sender<()>,
    },
    Health {
        reply: oneshot::Sender<HealthMetrics>,
    },
}

/// What the actor reads from its command channel
enum ActorMessage {
    Request(ServiceCommand),
    /// Close the transport and end the actor
    Stop { reply: oneshot::Sender<()> },
}

/// Watch channels published by the actor
struct Channels {
    live: watch::Sender<LiveState>,
    connected: watch::Sender<bool>,
    state: watch::Sender<ConnectionState>,
    degraded_reason: watch::Sender<Option<String>>,
}

impl Channels {
    fn new() -> Self {
        Self {
            live: watch::channel(LiveState::default()).0,
            connected: watch::channel(false).0,
            state: watch::channel(ConnectionState::Disconnected).0,
            degraded_reason: watch::channel(None).0,
        }
    }
}

struct Running {
    commands: mpsc::UnboundedSender<ActorMessage>,
    handle: JoinHandle<()>,
}

/// Live-data core exposed to the dashboard
pub struct LiveDataService {
    scheme: TopicScheme,
    reconnect: ReconnectConfig,
    transport: Arc<dyn Transport>,
    credentials: Credentials,
    publisher: CommandPublisher,
    channels: Arc<Channels>,
    running: Mutex<Option<Running>>,
}

impl LiveDataService {
    pub fn new(
        config: &DashboardConfig,
        transport: Arc<dyn Transport>,
        credentials: Credentials,
    ) -> Self {
        Self::with_parts(
            config.topic_scheme(),
            ReconnectConfig::from(&config.reconnect),
            transport,
            credentials,
        )
    }

    pub fn with_parts(
        scheme: TopicScheme,
        reconnect: ReconnectConfig,
        transport: Arc<dyn Transport>,
        credentials: Credentials,
    ) -> Self {
        let publisher = CommandPublisher::new(scheme.clone(), transport.clone());
        Self {
            scheme,
            reconnect,
            transport,
            credentials,
            publisher,
            channels: Arc::new(Channels::new()),
            running: Mutex::new(None),
        }
    }

    fn lock_running(&self) -> MutexGuard<'_, Option<Running>> {
        match self.running.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock_running()
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    /// Spawn the actor and begin connecting; must run inside a tokio runtime
    pub fn start(&self) -> Result<(), ServiceError> {
        let mut running = self.lock_running();
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return Err(ServiceError::AlreadyStarted);
        }

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        self.transport.set_event_sender(event_tx);
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let actor = Actor {
            transport: self.transport.clone(),
            credentials: self.credentials.clone(),
            supervisor: ReconnectionSupervisor::new(self.reconnect.clone()),
            registry: SubscriptionRegistry::new(self.scheme.clone()),
            projector: LiveStateProjector::new(),
            channels: self.channels.clone(),
            connecting: None,
            backoff: None,
            last_frame_at: None,
        };
        actor.publish_live();

        let span = crate::lifecycle_span!(component = "live_data_service", transport = self.transport.name());
        let handle = tokio::spawn(actor.run(command_rx, event_rx).instrument(span));

        *running = Some(Running {
            commands: command_tx,
            handle,
        });
        info!(transport = self.transport.name(), "Live data service started");
        Ok(())
    }

    /// Close the transport normally and join the actor; no-op when not running
    pub async fn stop(&self) {
        let Some(running) = self.lock_running().take() else {
            return;
        };

        let (reply, done) = oneshot::channel();
        if running.commands.send(ActorMessage::Stop { reply }).is_ok() {
            let _ = done.await;
        }
        if let Err(e) = running.handle.await {
            warn!(error = %e, "Live data actor ended abnormally");
        }
        info!("Live data service stopped");
    }

    fn commands(&self) -> Result<mpsc::UnboundedSender<ActorMessage>, ServiceError> {
        self.lock_running()
            .as_ref()
            .map(|r| r.commands.clone())
            .ok_or(ServiceError::NotStarted)
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> ServiceCommand,
    ) -> Result<T, ServiceError> {
        let commands = self.commands()?;
        let (reply, response) = oneshot::channel();
        commands
            .send(ActorMessage::Request(build(reply)))
            .map_err(|_| ServiceError::Stopped)?;
        response.await.map_err(|_| ServiceError::Stopped)
    }

    /// Route live events for `device_id` to `consumer`
    ///
    /// Any other subscribed device is dropped first and the live state is
    /// reset to the unknown sentinel for the new device.
    pub async fn subscribe_device(
        &self,
        device_id: &str,
        consumer: EventSink,
    ) -> Result<SubscribeOutcome, ServiceError> {
        let device_id = device_id.to_string();
        self.request(|reply| ServiceCommand::Subscribe {
            device_id,
            consumer,
            reply,
        })
        .await?
    }

    pub async fn unsubscribe_device(&self, device_id: &str) -> Result<(), ServiceError> {
        let device_id = device_id.to_string();
        self.request(|reply| ServiceCommand::Unsubscribe { device_id, reply })
            .await
    }

    /// Leave `Degraded` and try again; no-op in any other state
    pub async fn retry(&self) -> Result<(), ServiceError> {
        self.request(|reply| ServiceCommand::Retry { reply }).await
    }

    pub async fn health_metrics(&self) -> Result<HealthMetrics, ServiceError> {
        self.request(|reply| ServiceCommand::Health { reply }).await
    }

    /// Publish an actuator command; independent of subscription state
    pub fn send_command(
        &self,
        device_id: &str,
        kind: ReadingKind,
        value: &str,
    ) -> Result<CommandReceipt, CommandError> {
        self.publisher.send_command(device_id, kind, value)
    }

    pub fn send_pump_command(
        &self,
        device_id: &str,
        command: PumpCommand,
    ) -> Result<CommandReceipt, CommandError> {
        self.publisher.send_pump_command(device_id, command)
    }

    pub fn on_live_update(&self) -> watch::Receiver<LiveState> {
        self.channels.live.subscribe()
    }

    pub fn on_connection_change(&self) -> watch::Receiver<bool> {
        self.channels.connected.subscribe()
    }

    pub fn on_state_change(&self) -> watch::Receiver<ConnectionState> {
        self.channels.state.subscribe()
    }

    pub fn live_state(&self) -> LiveState {
        self.channels.live.borrow().clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.channels.state.borrow()
    }

    /// Sanitized reason of the last `Degraded` entry, cleared on reconnect
    pub fn degraded_reason(&self) -> Option<String> {
        self.channels.degraded_reason.borrow().clone()
    }
}

impl Drop for LiveDataService {
    fn drop(&mut self) {
        if let Some(running) = self.lock_running().take() {
            running.handle.abort();
        }
    }
}

struct Actor {
    transport: Arc<dyn Transport>,
    credentials: Credentials,
    supervisor: ReconnectionSupervisor,
    registry: SubscriptionRegistry,
    projector: LiveStateProjector,
    channels: Arc<Channels>,
    connecting: Option<ConnectFuture>,
    backoff: Option<Pin<Box<Sleep>>>,
    last_frame_at: Option<Instant>,
}

/// Resolves when the optional future does; pends forever when there is none
async fn poll_optional<F>(future: &mut Option<F>) -> F::Output
where
    F: Future + Unpin,
{
    match future {
        Some(future) => future.await,
        None => std::future::pending().await,
    }
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<ActorMessage>,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        let action = self.supervisor.start();
        self.perform(action);

        loop {
            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(ActorMessage::Stop { reply }) => {
                        self.shutdown().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(ActorMessage::Request(command)) => self.handle_command(command),
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },

                result = poll_optional(&mut self.connecting) => {
                    self.connecting = None;
                    self.handle_connect_result(result);
                }

                event = events.recv() => match event {
                    Some(TransportEvent::Frame(frame)) => self.handle_frame(frame),
                    Some(TransportEvent::Closed { abnormal, reason }) => {
                        self.handle_closed(abnormal, &reason)
                    }
                    None => {
                        debug!("Transport event channel closed");
                        self.shutdown().await;
                        break;
                    }
                },

                _ = poll_optional(&mut self.backoff) => {
                    self.backoff = None;
                    let action = self.supervisor.on_backoff_elapsed();
                    self.perform(action);
                }
            }
        }
    }

    fn handle_command(&mut self, command: ServiceCommand) {
        match command {
            ServiceCommand::Subscribe {
                device_id,
                consumer,
                reply,
            } => {
                let _span = crate::device_span!(device_id = %device_id).entered();
                let result =
                    self.registry
                        .subscribe_device(&device_id, consumer, self.transport.as_ref());
                if matches!(
                    result,
                    Ok(SubscribeOutcome::Subscribed { .. } | SubscribeOutcome::Pending)
                ) {
                    self.projector.reset(Some(&device_id));
                    self.publish_live();
                }
                let _ = reply.send(result);
            }
            ServiceCommand::Unsubscribe { device_id, reply } => {
                if self
                    .registry
                    .unsubscribe_device(&device_id, self.transport.as_ref())
                {
                    self.projector.reset(None);
                    self.publish_live();
                }
                let _ = reply.send(());
            }
            ServiceCommand::Retry { reply } => {
                let action = self.supervisor.retry();
                self.perform(action);
                let _ = reply.send(());
            }
            ServiceCommand::Health { reply } => {
                let _ = reply.send(self.supervisor.health_metrics(self.last_frame_at));
            }
        }
    }

    fn handle_connect_result(&mut self, result: Result<(), ConnectionError>) {
        let action = match result {
            Ok(()) => self.supervisor.on_connect_succeeded(),
            Err(error) => {
                metrics().connection_failed();
                warn!(reason = error.reason(), error = %error, "Connect attempt failed");
                self.supervisor.on_connect_failed(&error)
            }
        };
        self.perform(action);
    }

    fn handle_frame(&mut self, frame: RawFrame) {
        let started = Instant::now();
        metrics().frame_received();
        self.last_frame_at = Some(started);

        let Some(normalized) = normalize(&frame) else {
            metrics().frame_dropped();
            return;
        };

        for event in normalized.into_events() {
            let Some(consumer) = self.registry.route(&event) else {
                metrics().frame_filtered();
                debug!(device_id = %event.device_id, topic = %event.source_topic, "Event filtered");
                continue;
            };
            if consumer.send(event.clone()).is_err() {
                debug!(device_id = %event.device_id, "Consumer dropped its receiver");
            }
            if let Some(state) = self.projector.apply(&event) {
                self.channels.live.send_replace(state.clone());
                metrics().event_projected(event.is_batch());
            }
        }
        metrics().record_frame_latency(started.elapsed());
    }

    fn handle_closed(&mut self, abnormal: bool, reason: &str) {
        if abnormal {
            metrics().connection_lost();
            warn!(reason, "Connection lost");
        } else {
            info!(reason, "Connection closed");
        }
        self.registry.on_connection_lost();
        if self.projector.set_connected(false) {
            self.publish_live();
        }
        let action = self.supervisor.on_closed(abnormal);
        self.perform(action);
    }

    fn perform(&mut self, action: SupervisorAction) {
        match action {
            SupervisorAction::Connect => {
                metrics().connection_attempt();
                self.backoff = None;
                let transport = self.transport.clone();
                let credentials = self.credentials.clone();
                self.connecting =
                    Some(Box::pin(async move { transport.connect(&credentials).await }));
            }
            SupervisorAction::WaitBackoff(delay) => {
                self.backoff = Some(Box::pin(sleep(delay)));
            }
            SupervisorAction::Rearm => {
                metrics().connection_established();
                self.channels.degraded_reason.send_replace(None);
                let sent = self.registry.rearm(self.transport.as_ref());
                info!(resubscribed = sent, "Connected");
                if self.projector.set_connected(true) {
                    self.publish_live();
                }
            }
            SupervisorAction::EnterDegraded(reason) => {
                metrics().degraded();
                self.channels.degraded_reason.send_replace(Some(reason));
            }
            SupervisorAction::None => {}
        }
        self.publish_connection();
    }

    async fn shutdown(&mut self) {
        self.connecting = None;
        self.backoff = None;
        self.supervisor.stop();
        self.transport.close().await;
        self.registry.on_connection_lost();
        if self.projector.set_connected(false) {
            self.publish_live();
        }
        self.publish_connection();
    }

    fn publish_live(&self) {
        self.channels.live.send_replace(self.projector.state().clone());
    }

    fn publish_connection(&self) {
        let state = self.supervisor.connection_state();
        metrics().set_connection_state(state);
        self.channels.state.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
        self.channels.connected.send_if_modified(|current| {
            let changed = *current != state.is_connected();
            *current = state.is_connected();
            changed
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frames::FrameType;
    use crate::testing::mocks::MockTransport;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(2);

    fn service(transport: Arc<MockTransport>) -> LiveDataService {
        LiveDataService::new(&DashboardConfig::test_config(), transport, Credentials::anonymous())
    }

    async fn wait_for_state(service: &LiveDataService, expected: ConnectionState) {
        let mut rx = service.on_state_change();
        tokio::time::timeout(WAIT, rx.wait_for(|s| *s == expected))
            .await
            .expect("state change timed out")
            .expect("service dropped");
    }

    #[tokio::test]
    async fn test_calls_before_start_fail() {
        let service = service(Arc::new(MockTransport::new()));
        let (tx, _rx) = mpsc::unbounded_channel();
        assert_eq!(
            service.subscribe_device("dev1", tx).await,
            Err(ServiceError::NotStarted)
        );
        assert_eq!(service.retry().await, Err(ServiceError::NotStarted));
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let service = service(Arc::new(MockTransport::new()));
        service.start().unwrap();
        assert_eq!(service.start(), Err(ServiceError::AlreadyStarted));
        service.stop().await;
        assert!(!service.is_running());
    }

    #[tokio::test]
    async fn test_connects_and_reports_state() {
        let transport = Arc::new(MockTransport::new());
        let service = service(transport.clone());
        service.start().unwrap();

        wait_for_state(&service, ConnectionState::Connected).await;
        assert!(*service.on_connection_change().borrow());
        assert_eq!(transport.connect_calls(), 1);

        service.stop().await;
        assert_eq!(service.connection_state(), ConnectionState::Disconnected);
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_subscribe_resets_live_state() {
        let transport = Arc::new(MockTransport::new());
        let service = service(transport.clone());
        service.start().unwrap();
        wait_for_state(&service, ConnectionState::Connected).await;

        let (tx, _rx) = mpsc::unbounded_channel();
        let outcome = service.subscribe_device("dev1", tx).await.unwrap();
        assert!(matches!(outcome, SubscribeOutcome::Subscribed { .. }));

        let state = service.live_state();
        assert_eq!(state.device_id.as_deref(), Some("dev1"));
        assert!(state.is_unknown());
        assert!(state.is_connected);
        assert_eq!(transport.frames_of(FrameType::Subscribe).len(), 6);

        service.stop().await;
    }

    #[tokio::test]
    async fn test_invalid_device_is_reported() {
        let service = service(Arc::new(MockTransport::new()));
        service.start().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        assert_eq!(
            service.subscribe_device("a+b", tx).await,
            Err(ServiceError::InvalidDevice("a+b".to_string()))
        );
        service.stop().await;
    }

    #[tokio::test]
    async fn test_auth_failure_degrades() {
        let transport = Arc::new(MockTransport::failing(
            1,
            ConnectionError::auth("not authorized"),
        ));
        let service = service(transport.clone());
        service.start().unwrap();

        wait_for_state(&service, ConnectionState::Degraded).await;
        assert!(service.degraded_reason().is_some());
        assert_eq!(transport.connect_calls(), 1);

        service.retry().await.unwrap();
        wait_for_state(&service, ConnectionState::Connected).await;
        assert_eq!(service.degraded_reason(), None);
        service.stop().await;
    }

    #[tokio::test]
    async fn test_health_metrics_query() {
        let transport = Arc::new(MockTransport::new());
        let service = service(transport);
        service.start().unwrap();
        wait_for_state(&service, ConnectionState::Connected).await;

        let metrics = service.health_metrics().await.unwrap();
        assert!(metrics.is_healthy);
        assert_eq!(metrics.reconnect_count, 0);
        service.stop().await;
    }
}
