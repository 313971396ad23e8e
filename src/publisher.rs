//! Actuator command publisher
//!
//! Commands go straight to the shared transport. There is no queue and no
//! retry: an offline link fails the command immediately so the caller never
//! sees a stale command fire after a reconnect.

use crate::error::CommandError;
use crate::model::{PumpMode, PumpStatus, ReadingKind};
use crate::observability::metrics::metrics;
use crate::protocol::frames::Frame;
use crate::protocol::topics::{validate_segment, TopicScheme};
use crate::transport::Transport;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Desired actuator state; absent fields are left unchanged on the device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpCommand {
    pub power: Option<PumpStatus>,
    pub mode: Option<PumpMode>,
}

impl PumpCommand {
    pub fn power(power: PumpStatus) -> Self {
        Self {
            power: Some(power),
            mode: None,
        }
    }

    pub fn mode(mode: PumpMode) -> Self {
        Self {
            power: None,
            mode: Some(mode),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.power.is_none() && self.mode.is_none()
    }

    /// Wire payload, e.g. `{"power":"on"}` or `{"mode":"auto","power":"off"}`
    pub fn to_payload(&self) -> String {
        let mut body = Map::new();
        if let Some(power) = self.power {
            body.insert("power".into(), Value::from(power.wire_value()));
        }
        if let Some(mode) = self.mode {
            body.insert("mode".into(), Value::from(mode.as_str()));
        }
        Value::Object(body).to_string()
    }

    /// Build a command from a reading kind and its textual value
    pub fn from_kind(kind: ReadingKind, value: &str) -> Result<Self, CommandError> {
        match kind {
            ReadingKind::PumpStatus => PumpStatus::parse_command(value)
                .map(Self::power)
                .ok_or_else(|| {
                    CommandError::rejected(format!("unsupported pump status '{value}'"))
                }),
            ReadingKind::PumpMode => PumpMode::parse(value.trim())
                .map(Self::mode)
                .ok_or_else(|| CommandError::rejected(format!("unsupported pump mode '{value}'"))),
            other => Err(CommandError::rejected(format!(
                "'{other}' is not an actuator"
            ))),
        }
    }
}

/// Proof that a command was handed to the transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandReceipt {
    pub id: Uuid,
    pub topic: String,
    pub payload: String,
    pub issued_at: DateTime<Utc>,
}

/// Publishes actuator commands over the shared transport
#[derive(Clone)]
pub struct CommandPublisher {
    scheme: TopicScheme,
    transport: Arc<dyn Transport>,
}

impl CommandPublisher {
    pub fn new(scheme: TopicScheme, transport: Arc<dyn Transport>) -> Self {
        Self { scheme, transport }
    }

    /// Send a single-field command such as `pumpStatus = "ON"`
    pub fn send_command(
        &self,
        device_id: &str,
        kind: ReadingKind,
        value: &str,
    ) -> Result<CommandReceipt, CommandError> {
        let command = PumpCommand::from_kind(kind, value)?;
        self.send_pump_command(device_id, command)
    }

    pub fn send_pump_command(
        &self,
        device_id: &str,
        command: PumpCommand,
    ) -> Result<CommandReceipt, CommandError> {
        validate_segment(device_id)
            .map_err(|e| CommandError::rejected(format!("device id '{device_id}': {e}")))?;
        if command.is_empty() {
            return Err(CommandError::rejected("empty command"));
        }

        if !self.transport.is_connected() {
            metrics().command_failed();
            warn!(device_id, "Command rejected, link offline");
            return Err(CommandError::Offline);
        }

        let topic = self.scheme.command_topic(device_id);
        let payload = command.to_payload();
        if !self.transport.send(&Frame::publish(topic.as_str(), payload.as_str())) {
            metrics().command_failed();
            warn!(device_id, topic = %topic, "Command could not be queued");
            return Err(CommandError::Offline);
        }

        let receipt = CommandReceipt {
            id: Uuid::new_v4(),
            topic,
            payload,
            issued_at: Utc::now(),
        };
        metrics().command_sent();
        info!(
            device_id,
            command_id = %receipt.id,
            topic = %receipt.topic,
            payload = %receipt.payload,
            "Command published"
        );
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frames::{FrameType, QosLevel};
    use crate::testing::mocks::MockTransport;

    fn publisher(connected: bool) -> (CommandPublisher, Arc<MockTransport>) {
        let transport = Arc::new(MockTransport::new());
        transport.set_connected(connected);
        let scheme = TopicScheme::new("ns", ["moisture"], "motor", "set");
        (CommandPublisher::new(scheme, transport.clone()), transport)
    }

    #[test]
    fn test_pump_status_command() {
        let (publisher, transport) = publisher(true);
        let receipt = publisher
            .send_command("dev1", ReadingKind::PumpStatus, "ON")
            .unwrap();

        assert_eq!(receipt.topic, "ns/dev1/state/motor/set");
        assert_eq!(receipt.payload, r#"{"power":"on"}"#);

        let frames = transport.frames_of(FrameType::Publish);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload.as_deref(), Some(r#"{"power":"on"}"#));
        assert_eq!(frames[0].qos, Some(QosLevel::AtLeastOnce));
    }

    #[test]
    fn test_pump_mode_command() {
        let (publisher, _transport) = publisher(true);
        let receipt = publisher
            .send_command("dev1", ReadingKind::PumpMode, "Auto")
            .unwrap();
        assert_eq!(receipt.payload, r#"{"mode":"auto"}"#);
    }

    #[test]
    fn test_offline_fails_fast_without_frame() {
        let (publisher, transport) = publisher(false);
        assert_eq!(
            publisher.send_command("dev1", ReadingKind::PumpStatus, "ON"),
            Err(CommandError::Offline)
        );
        assert!(transport.sent_frames().is_empty());
    }

    #[test]
    fn test_send_failure_is_offline() {
        let (publisher, transport) = publisher(true);
        transport.fail_sends_after(0);
        assert_eq!(
            publisher.send_command("dev1", ReadingKind::PumpStatus, "off"),
            Err(CommandError::Offline)
        );
    }

    #[test]
    fn test_invalid_commands_rejected() {
        let (publisher, transport) = publisher(true);
        assert!(matches!(
            publisher.send_command("dev1", ReadingKind::PumpStatus, "maybe"),
            Err(CommandError::Rejected { .. })
        ));
        assert!(matches!(
            publisher.send_command("dev1", ReadingKind::Moisture, "50"),
            Err(CommandError::Rejected { .. })
        ));
        assert!(matches!(
            publisher.send_command("dev/1", ReadingKind::PumpStatus, "on"),
            Err(CommandError::Rejected { .. })
        ));
        assert!(matches!(
            publisher.send_pump_command("dev1", PumpCommand::default()),
            Err(CommandError::Rejected { .. })
        ));
        assert!(transport.sent_frames().is_empty());
    }

    #[test]
    fn test_combined_payload() {
        let command = PumpCommand {
            power: Some(PumpStatus::Off),
            mode: Some(PumpMode::Manual),
        };
        assert_eq!(command.to_payload(), r#"{"mode":"manual","power":"off"}"#);
    }

    #[test]
    fn test_receipts_have_unique_ids() {
        let (publisher, _transport) = publisher(true);
        let a = publisher.send_pump_command("dev1", PumpCommand::power(PumpStatus::On)).unwrap();
        let b = publisher.send_pump_command("dev1", PumpCommand::power(PumpStatus::On)).unwrap();
        assert_ne!(a.id, b.id);
    }
}
