//! Wire frames exchanged with the broker

use serde::{Deserialize, Serialize};

/// Outbound frame type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameType {
    Subscribe,
    Unsubscribe,
    Publish,
}

/// Delivery guarantee requested for a frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum QosLevel {
    #[serde(rename = "0")]
    AtMostOnce,
    #[default]
    #[serde(rename = "1")]
    AtLeastOnce,
    #[serde(rename = "2")]
    ExactlyOnce,
}

/// Outbound frame handed to [`crate::transport::Transport::send`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub frame_type: FrameType,
    pub topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qos: Option<QosLevel>,
}

impl Frame {
    pub fn subscribe(topic: impl Into<String>) -> Self {
        Self {
            frame_type: FrameType::Subscribe,
            topic: topic.into(),
            payload: None,
            qos: Some(QosLevel::AtLeastOnce),
        }
    }

    pub fn unsubscribe(topic: impl Into<String>) -> Self {
        Self {
            frame_type: FrameType::Unsubscribe,
            topic: topic.into(),
            payload: None,
            qos: None,
        }
    }

    pub fn publish(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            frame_type: FrameType::Publish,
            topic: topic.into(),
            payload: Some(payload.into()),
            qos: Some(QosLevel::AtLeastOnce),
        }
    }

    pub fn qos_or_default(&self) -> QosLevel {
        self.qos.unwrap_or_default()
    }
}

/// Inbound frame: topic plus UTF-8 payload text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawFrame {
    pub topic: String,
    pub payload: String,
}

impl RawFrame {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_frame_wire_shape() {
        let frame = Frame::subscribe("farm/dev1/stream/temp");
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(
            value,
            json!({"type": "subscribe", "topic": "farm/dev1/stream/temp", "qos": "1"})
        );

        let frame = Frame::unsubscribe("farm/dev1/stream/temp");
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value, json!({"type": "unsubscribe", "topic": "farm/dev1/stream/temp"}));
    }

    #[test]
    fn test_publish_frame_carries_payload() {
        let frame = Frame::publish("farm/dev1/state/motor/set", r#"{"power":"on"}"#);
        assert_eq!(frame.frame_type, FrameType::Publish);
        assert_eq!(frame.payload.as_deref(), Some(r#"{"power":"on"}"#));
        assert_eq!(frame.qos_or_default(), QosLevel::AtLeastOnce);
    }
}
