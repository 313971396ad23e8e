//! Canonical sensor event types
//!
//! Every frame that survives normalization becomes a [`SensorEvent`]. The
//! serialized form uses camelCase field names so live events line up with the
//! records returned by the history service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single reading kind carried by a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReadingKind {
    Moisture,
    Temperature,
    Humidity,
    Light,
    Battery,
    PumpStatus,
    PumpMode,
}

impl ReadingKind {
    /// Sensor kinds, in display order
    pub const SENSORS: [ReadingKind; 5] = [
        ReadingKind::Moisture,
        ReadingKind::Temperature,
        ReadingKind::Humidity,
        ReadingKind::Light,
        ReadingKind::Battery,
    ];

    /// True for the measured (non-actuator) kinds
    pub fn is_sensor(self) -> bool {
        !self.is_actuator()
    }

    /// True for pump status and pump mode
    pub fn is_actuator(self) -> bool {
        matches!(self, ReadingKind::PumpStatus | ReadingKind::PumpMode)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReadingKind::Moisture => "moisture",
            ReadingKind::Temperature => "temperature",
            ReadingKind::Humidity => "humidity",
            ReadingKind::Light => "light",
            ReadingKind::Battery => "battery",
            ReadingKind::PumpStatus => "pumpStatus",
            ReadingKind::PumpMode => "pumpMode",
        }
    }

    /// Parse the canonical camelCase name (exact match)
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "moisture" => Some(ReadingKind::Moisture),
            "temperature" => Some(ReadingKind::Temperature),
            "humidity" => Some(ReadingKind::Humidity),
            "light" => Some(ReadingKind::Light),
            "battery" => Some(ReadingKind::Battery),
            "pumpStatus" => Some(ReadingKind::PumpStatus),
            "pumpMode" => Some(ReadingKind::PumpMode),
            _ => None,
        }
    }
}

impl fmt::Display for ReadingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event kind: one reading or a batch of several readings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    Moisture,
    Temperature,
    Humidity,
    Light,
    Battery,
    PumpStatus,
    PumpMode,
    BatchUpdate,
}

impl From<ReadingKind> for EventKind {
    fn from(kind: ReadingKind) -> Self {
        match kind {
            ReadingKind::Moisture => EventKind::Moisture,
            ReadingKind::Temperature => EventKind::Temperature,
            ReadingKind::Humidity => EventKind::Humidity,
            ReadingKind::Light => EventKind::Light,
            ReadingKind::Battery => EventKind::Battery,
            ReadingKind::PumpStatus => EventKind::PumpStatus,
            ReadingKind::PumpMode => EventKind::PumpMode,
        }
    }
}

/// Pump power state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PumpStatus {
    #[serde(rename = "ON")]
    On,
    #[serde(rename = "OFF")]
    Off,
}

impl PumpStatus {
    /// Lenient parse: `on`/`off` in any case, plus `1`/`0` and `true`/`false`
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ON" | "1" | "TRUE" => Some(PumpStatus::On),
            "OFF" | "0" | "FALSE" => Some(PumpStatus::Off),
            _ => None,
        }
    }

    /// Strict parse for outbound commands: only `on`/`off`, any case
    pub fn parse_command(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "on" => Some(PumpStatus::On),
            "off" => Some(PumpStatus::Off),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PumpStatus::On => "ON",
            PumpStatus::Off => "OFF",
        }
    }

    /// Lowercase wire form used in actuator payloads
    pub fn wire_value(self) -> &'static str {
        match self {
            PumpStatus::On => "on",
            PumpStatus::Off => "off",
        }
    }
}

/// Pump control mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PumpMode {
    Auto,
    Manual,
}

impl PumpMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Some(PumpMode::Auto),
            "manual" => Some(PumpMode::Manual),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PumpMode::Auto => "auto",
            PumpMode::Manual => "manual",
        }
    }
}

/// Value of a single reading
///
/// Non-numeric sensor strings such as `"unknown"` are kept verbatim in
/// [`ReadingValue::Text`] instead of being coerced; consumers treat them as
/// an absent value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReadingValue {
    Number(f64),
    Status(PumpStatus),
    Mode(PumpMode),
    Text(String),
}

impl ReadingValue {
    /// Numeric value, if this reading has one
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ReadingValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_pump_status(&self) -> Option<PumpStatus> {
        match self {
            ReadingValue::Status(s) => Some(*s),
            _ => None,
        }
    }

    pub fn as_pump_mode(&self) -> Option<PumpMode> {
        match self {
            ReadingValue::Mode(m) => Some(*m),
            _ => None,
        }
    }
}

impl fmt::Display for ReadingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadingValue::Number(n) => write!(f, "{n}"),
            ReadingValue::Status(s) => f.write_str(s.as_str()),
            ReadingValue::Mode(m) => f.write_str(m.as_str()),
            ReadingValue::Text(t) => f.write_str(t),
        }
    }
}

/// Event value: a single reading or the full mapping of a batch update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventValue {
    Batch(BTreeMap<ReadingKind, ReadingValue>),
    Single(ReadingValue),
}

/// Canonical normalized reading or actuator-state change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorEvent {
    /// Opaque, case-sensitive device identifier
    pub device_id: String,
    pub kind: EventKind,
    pub value: EventValue,
    /// Event time; receipt time when the source omits it
    pub timestamp: DateTime<Utc>,
    /// Wire topic the frame arrived on (diagnostic only)
    pub source_topic: String,
}

impl SensorEvent {
    /// Build a single-reading event
    pub fn reading(
        device_id: impl Into<String>,
        kind: ReadingKind,
        value: ReadingValue,
        timestamp: DateTime<Utc>,
        source_topic: impl Into<String>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            kind: kind.into(),
            value: EventValue::Single(value),
            timestamp,
            source_topic: source_topic.into(),
        }
    }

    /// Build a batch event carrying several readings at once
    pub fn batch(
        device_id: impl Into<String>,
        readings: BTreeMap<ReadingKind, ReadingValue>,
        timestamp: DateTime<Utc>,
        source_topic: impl Into<String>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            kind: EventKind::BatchUpdate,
            value: EventValue::Batch(readings),
            timestamp,
            source_topic: source_topic.into(),
        }
    }

    pub fn is_batch(&self) -> bool {
        self.kind == EventKind::BatchUpdate
    }

    /// Readings carried by this event as `(kind, value)` pairs
    pub fn readings(&self) -> Vec<(ReadingKind, &ReadingValue)> {
        match &self.value {
            EventValue::Batch(map) => map.iter().map(|(k, v)| (*k, v)).collect(),
            EventValue::Single(value) => match reading_kind_of(self.kind) {
                Some(kind) => vec![(kind, value)],
                None => Vec::new(),
            },
        }
    }

    /// The single value, for non-batch events
    pub fn single_value(&self) -> Option<&ReadingValue> {
        match &self.value {
            EventValue::Single(v) => Some(v),
            EventValue::Batch(_) => None,
        }
    }
}

fn reading_kind_of(kind: EventKind) -> Option<ReadingKind> {
    match kind {
        EventKind::Moisture => Some(ReadingKind::Moisture),
        EventKind::Temperature => Some(ReadingKind::Temperature),
        EventKind::Humidity => Some(ReadingKind::Humidity),
        EventKind::Light => Some(ReadingKind::Light),
        EventKind::Battery => Some(ReadingKind::Battery),
        EventKind::PumpStatus => Some(ReadingKind::PumpStatus),
        EventKind::PumpMode => Some(ReadingKind::PumpMode),
        EventKind::BatchUpdate => None,
    }
}
