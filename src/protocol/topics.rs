//! Topic naming scheme for device streams and actuator state
//!
//! Topics follow `<namespace>/<deviceId>/<class>/<kind>` where `class` is
//! `stream` for sensor readings and `state` for actuator state. Commands go to
//! the state topic with an extra command suffix segment.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const STREAM_CLASS: &str = "stream";
pub const STATE_CLASS: &str = "state";

/// Topic class segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopicClass {
    Stream,
    State,
}

impl TopicClass {
    pub fn as_str(self) -> &'static str {
        match self {
            TopicClass::Stream => STREAM_CLASS,
            TopicClass::State => STATE_CLASS,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            STREAM_CLASS => Some(TopicClass::Stream),
            STATE_CLASS => Some(TopicClass::State),
            _ => None,
        }
    }
}

/// Components of a device topic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedTopic<'a> {
    pub namespace: &'a str,
    pub device_id: &'a str,
    pub class: TopicClass,
    pub kind: &'a str,
}

/// Parse `<namespace>/<deviceId>/<class>/<kind>[/...]`
///
/// Returns `None` for topics that do not follow the device scheme.
pub fn parse_topic(topic: &str) -> Option<ParsedTopic<'_>> {
    let mut parts = topic.split('/');
    let namespace = parts.next().filter(|s| !s.is_empty())?;
    let device_id = parts.next().filter(|s| !s.is_empty())?;
    let class = TopicClass::parse(parts.next()?)?;
    let kind = parts.next().filter(|s| !s.is_empty())?;
    Some(ParsedTopic {
        namespace,
        device_id,
        class,
        kind,
    })
}

/// Validate a namespace or device id segment
pub fn validate_segment(segment: &str) -> Result<(), ValidationError> {
    if segment.is_empty() {
        return Err(ValidationError::EmptySegment);
    }

    for ch in segment.chars() {
        if matches!(ch, '/' | '+' | '#') || ch.is_control() {
            return Err(ValidationError::InvalidSegmentChar(ch));
        }
    }

    Ok(())
}

/// Validation errors for topic segments
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Topic segment cannot be empty")]
    EmptySegment,
    #[error("Topic segment contains invalid character: '{0:?}'")]
    InvalidSegmentChar(char),
}

/// Builds the topics used for one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicScheme {
    namespace: String,
    stream_kinds: Vec<String>,
    state_kind: String,
    command_suffix: String,
}

impl TopicScheme {
    pub fn new<K>(
        namespace: impl Into<String>,
        stream_kinds: K,
        state_kind: impl Into<String>,
        command_suffix: impl Into<String>,
    ) -> Self
    where
        K: IntoIterator,
        K::Item: Into<String>,
    {
        Self {
            namespace: namespace.into(),
            stream_kinds: stream_kinds.into_iter().map(Into::into).collect(),
            state_kind: state_kind.into(),
            command_suffix: command_suffix.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn stream_kinds(&self) -> &[String] {
        &self.stream_kinds
    }

    pub fn stream_topic(&self, device_id: &str, kind: &str) -> String {
        format!("{}/{device_id}/{STREAM_CLASS}/{kind}", self.namespace)
    }

    pub fn state_topic(&self, device_id: &str) -> String {
        format!("{}/{device_id}/{STATE_CLASS}/{}", self.namespace, self.state_kind)
    }

    pub fn command_topic(&self, device_id: &str) -> String {
        format!("{}/{}", self.state_topic(device_id), self.command_suffix)
    }

    /// Fixed topic set for a device: one stream topic per kind plus the state topic
    pub fn device_topics(&self, device_id: &str) -> Vec<String> {
        self.stream_kinds
            .iter()
            .map(|kind| self.stream_topic(device_id, kind))
            .chain(std::iter::once(self.state_topic(device_id)))
            .collect()
    }

    /// Prefix shared by every topic of `device_id`
    pub fn device_prefix(&self, device_id: &str) -> String {
        format!("{}/{device_id}/", self.namespace)
    }

    /// True if `topic` lies under the device's prefix
    pub fn belongs_to(&self, topic: &str, device_id: &str) -> bool {
        topic
            .strip_prefix(self.namespace.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .and_then(|rest| rest.strip_prefix(device_id))
            .is_some_and(|rest| rest.starts_with('/'))
    }
}

impl Default for TopicScheme {
    fn default() -> Self {
        Self::new(
            "farm",
            ["moisture", "temp", "humidity", "light", "battery"],
            "motor",
            "set",
        )
    }
}
