//! Transport layer for the live device feed
//!
//! A [`Transport`] owns one physical connection to the broker. It performs a
//! single handshake per [`Transport::connect`] call and never reconnects on
//! its own: abrupt loss is reported as [`TransportEvent::Closed`] and the
//! reconnection supervisor decides what happens next.

use crate::error::ConnectionError;
use crate::protocol::frames::{Frame, RawFrame};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;

pub mod mqtt;
pub mod simulation;

/// Connection lifecycle as seen by the UI
///
/// Transports only report the first three states; `Degraded` is decided by
/// the reconnection supervisor after repeated failures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Degraded,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Degraded => "degraded",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Broker credentials supplied by the auth collaborator
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// Event delivered by a transport to its registered sender
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Inbound message, unfiltered
    Frame(RawFrame),
    /// Connection ended; `abnormal` is false only for a user-requested close
    Closed { abnormal: bool, reason: String },
}

/// Sender half that receives transport events
pub type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// One physical connection to the message broker
///
/// Shared as `Arc<dyn Transport>` between the live data service and the
/// command publisher, so every method takes `&self`.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// One handshake attempt; state becomes `Connected` on success
    async fn connect(&self, credentials: &Credentials) -> Result<(), ConnectionError>;

    /// Enqueue a frame; `false` when not connected or the frame cannot be queued
    fn send(&self, frame: &Frame) -> bool;

    /// User-requested close; emits `Closed { abnormal: false }`
    async fn close(&self);

    /// Current connection state
    fn state(&self) -> ConnectionState;

    /// Register the channel that receives inbound frames and close events
    fn set_event_sender(&self, sender: EventSender);

    /// Short name for logs and metrics
    fn name(&self) -> &'static str;

    fn is_connected(&self) -> bool {
        self.state().is_connected()
    }
}
