//! Reconnection supervisor
//!
//! A pure state machine. Every input returns a [`SupervisorAction`] telling
//! the live data service what to do next; the supervisor itself never sleeps,
//! spawns or touches the transport.
//!
//! ```text
//! Idle --start--> Connecting --ok--> Connected --abnormal close--> Backoff
//!                     |  ^                |                          |
//!                  failed |               +--normal close--> Idle    |
//!                     v  |                                           |
//!                   Backoff <----------------------------------------+
//!                     |
//!          max attempts / auth rejected
//!                     v
//!                  Degraded --retry--> Connecting
//! ```

pub mod health_monitor;

pub use health_monitor::{
    ConnectionQuality, HealthMetrics, HealthMonitor, ReconnectConfig, ReconnectionDecision,
};

use crate::error::{sanitize_error_message, ConnectionError};
use crate::transport::ConnectionState;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Supervisor lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Connecting { attempt: u32 },
    Backoff { attempt: u32, delay: Duration },
    Connected,
    /// Terminal until [`ReconnectionSupervisor::retry`]
    Degraded { reason: String },
}

/// What the service must do after feeding an input to the supervisor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorAction {
    /// Start one handshake attempt
    Connect,
    /// Sleep, then call [`ReconnectionSupervisor::on_backoff_elapsed`]
    WaitBackoff(Duration),
    /// Link is up: resubscribe the active subscription exactly once
    Rearm,
    /// Gave up; the reason is safe to show to users
    EnterDegraded(String),
    None,
}

#[derive(Debug)]
pub struct ReconnectionSupervisor {
    config: ReconnectConfig,
    state: SupervisorState,
    reconnect_count: u32,
    has_connected: bool,
    connected_at: Option<Instant>,
}

impl ReconnectionSupervisor {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            state: SupervisorState::Idle,
            reconnect_count: 0,
            has_connected: false,
            connected_at: None,
        }
    }

    pub fn state(&self) -> &SupervisorState {
        &self.state
    }

    pub fn config(&self) -> &ReconnectConfig {
        &self.config
    }

    /// Successful reconnections since the first connect
    pub fn reconnect_count(&self) -> u32 {
        self.reconnect_count
    }

    pub fn connected_at(&self) -> Option<Instant> {
        self.connected_at
    }

    /// Connection state as reported to the UI
    pub fn connection_state(&self) -> ConnectionState {
        match self.state {
            SupervisorState::Idle | SupervisorState::Backoff { .. } => {
                ConnectionState::Disconnected
            }
            SupervisorState::Connecting { .. } => ConnectionState::Connecting,
            SupervisorState::Connected => ConnectionState::Connected,
            SupervisorState::Degraded { .. } => ConnectionState::Degraded,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self.state, SupervisorState::Degraded { .. })
    }

    /// Begin the first connect attempt; ignored unless idle
    pub fn start(&mut self) -> SupervisorAction {
        if self.state != SupervisorState::Idle {
            return SupervisorAction::None;
        }
        self.transition(SupervisorState::Connecting { attempt: 1 });
        SupervisorAction::Connect
    }

    pub fn on_connect_succeeded(&mut self) -> SupervisorAction {
        if !matches!(self.state, SupervisorState::Connecting { .. }) {
            debug!(state = ?self.state, "Ignoring connect success outside Connecting");
            return SupervisorAction::None;
        }
        if self.has_connected {
            self.reconnect_count += 1;
        }
        self.has_connected = true;
        self.connected_at = Some(Instant::now());
        self.transition(SupervisorState::Connected);
        SupervisorAction::Rearm
    }

    pub fn on_connect_failed(&mut self, error: &ConnectionError) -> SupervisorAction {
        let SupervisorState::Connecting { attempt } = self.state else {
            debug!(state = ?self.state, "Ignoring connect failure outside Connecting");
            return SupervisorAction::None;
        };

        let decision =
            HealthMonitor::should_attempt_reconnection(attempt, &self.config, error.is_auth());
        match decision {
            ReconnectionDecision::Proceed { delay, .. } => {
                warn!(
                    attempt,
                    reason = error.reason(),
                    delay_ms = delay.as_millis() as u64,
                    "Connect attempt failed, backing off"
                );
                self.transition(SupervisorState::Backoff { attempt, delay });
                SupervisorAction::WaitBackoff(delay)
            }
            ReconnectionDecision::AbortAuthRejected => {
                self.degrade(format!("Broker rejected credentials: {error}"))
            }
            ReconnectionDecision::AbortMaxAttemptsExceeded => {
                self.degrade(format!("Gave up after {attempt} attempts: {error}"))
            }
        }
    }

    pub fn on_backoff_elapsed(&mut self) -> SupervisorAction {
        let SupervisorState::Backoff { attempt, .. } = self.state else {
            return SupervisorAction::None;
        };
        self.transition(SupervisorState::Connecting {
            attempt: attempt + 1,
        });
        SupervisorAction::Connect
    }

    /// Transport reported the link closed
    ///
    /// A normal close always ends in `Idle`. An abnormal close only matters
    /// while connected; it schedules a reconnect as failure number one.
    pub fn on_closed(&mut self, abnormal: bool) -> SupervisorAction {
        if !abnormal {
            if self.state != SupervisorState::Idle {
                self.transition(SupervisorState::Idle);
            }
            self.connected_at = None;
            return SupervisorAction::None;
        }

        if self.state != SupervisorState::Connected {
            debug!(state = ?self.state, "Ignoring abnormal close outside Connected");
            return SupervisorAction::None;
        }

        self.connected_at = None;
        let delay = self.config.calculate_backoff_delay(1);
        self.transition(SupervisorState::Backoff { attempt: 1, delay });
        SupervisorAction::WaitBackoff(delay)
    }

    /// Leave `Degraded` with a fresh attempt counter; no-op in any other state
    pub fn retry(&mut self) -> SupervisorAction {
        if !self.is_degraded() {
            return SupervisorAction::None;
        }
        info!("Manual retry requested");
        self.transition(SupervisorState::Connecting { attempt: 1 });
        SupervisorAction::Connect
    }

    pub fn stop(&mut self) {
        self.connected_at = None;
        self.transition(SupervisorState::Idle);
    }

    pub fn health_metrics(&self, last_frame_at: Option<Instant>) -> HealthMetrics {
        let connect_time = if self.state == SupervisorState::Connected {
            self.connected_at
        } else {
            None
        };
        HealthMonitor::calculate_health_metrics(
            Instant::now(),
            connect_time,
            last_frame_at,
            self.reconnect_count,
        )
    }

    fn degrade(&mut self, reason: String) -> SupervisorAction {
        let reason = sanitize_error_message(&reason);
        warn!(reason = %reason, "Connection degraded");
        self.transition(SupervisorState::Degraded {
            reason: reason.clone(),
        });
        SupervisorAction::EnterDegraded(reason)
    }

    fn transition(&mut self, next: SupervisorState) {
        debug!(from = ?self.state, to = ?next, "Supervisor transition");
        self.state = next;
    }
}
