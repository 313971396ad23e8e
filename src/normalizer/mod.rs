//! Message normalization
//!
//! Devices publish readings in several shapes: JSON-in-JSON envelopes, object
//! envelopes, flat objects, bare scalars on a per-kind topic and `k=v` text.
//! [`normalize`] turns any of them into canonical [`SensorEvent`]s. It is
//! pure and never panics; frames it cannot understand are logged at debug
//! level and dropped.

pub mod coercion;
pub mod matchers;

use crate::model::{ReadingKind, ReadingValue, SensorEvent};
use crate::protocol::frames::RawFrame;
use crate::protocol::topics::{parse_topic, ParsedTopic, TopicClass};
use chrono::{DateTime, Utc};
use coercion::{coerce, parse_timestamp, resolve_key, TIMESTAMP_KEYS};
use matchers::{classify, PayloadShape};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

/// More than this many distinct sensor keys in one payload is a batch update
const BATCH_THRESHOLD: usize = 2;

/// Result of normalizing one frame
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    Single(SensorEvent),
    Many(Vec<SensorEvent>),
}

impl Normalized {
    pub fn into_events(self) -> Vec<SensorEvent> {
        match self {
            Normalized::Single(event) => vec![event],
            Normalized::Many(events) => events,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Normalized::Single(_) => 1,
            Normalized::Many(events) => events.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Why a frame produced no event
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("payload shape not recognized")]
    UnrecognizedShape,
    #[error("no device id in topic or envelope")]
    MissingDeviceId,
    #[error("scalar payload on a topic without a kind segment")]
    MissingTopicKind,
    #[error("no recognized reading keys")]
    NoRecognizedFields,
}

enum Body {
    Fields(Vec<(String, Value)>),
    Scalar(Value),
}

/// Normalize a frame, stamping events without a payload time with now
pub fn normalize(frame: &RawFrame) -> Option<Normalized> {
    normalize_at(frame, Utc::now())
}

/// Normalize a frame with an explicit receipt time
pub fn normalize_at(frame: &RawFrame, received_at: DateTime<Utc>) -> Option<Normalized> {
    match try_normalize(frame, received_at) {
        Ok(normalized) => Some(normalized),
        Err(e) => {
            debug!(topic = %frame.topic, error = %e, "Dropping frame");
            None
        }
    }
}

/// Normalize a frame, reporting why nothing was produced
pub fn try_normalize(
    frame: &RawFrame,
    received_at: DateTime<Utc>,
) -> Result<Normalized, ParseError> {
    let shape = classify(&frame.payload).ok_or(ParseError::UnrecognizedShape)?;
    let (envelope, body) = split_shape(shape)?;

    let envelope_topic = envelope
        .as_ref()
        .and_then(|e| e.get("topic"))
        .and_then(Value::as_str);
    let topic = parse_topic(&frame.topic).or_else(|| envelope_topic.and_then(parse_topic));

    let device_id = topic
        .map(|t| t.device_id.to_string())
        .or_else(|| envelope_device_id(envelope.as_ref()))
        .ok_or(ParseError::MissingDeviceId)?;

    let fields = match body {
        Body::Fields(fields) => fields,
        Body::Scalar(value) => vec![(scalar_key(topic)?.to_string(), value)],
    };

    let timestamp = find_timestamp(&fields)
        .or_else(|| envelope.as_ref().and_then(find_envelope_timestamp))
        .unwrap_or(received_at);

    let readings = extract_readings(&fields);
    let sensor_count = readings.keys().filter(|k| k.is_sensor()).count();

    if sensor_count > BATCH_THRESHOLD {
        return Ok(Normalized::Single(SensorEvent::batch(
            device_id,
            readings,
            timestamp,
            frame.topic.clone(),
        )));
    }

    let mut events: Vec<SensorEvent> = readings
        .into_iter()
        .map(|(kind, value)| {
            SensorEvent::reading(device_id.clone(), kind, value, timestamp, frame.topic.clone())
        })
        .collect();

    match events.len() {
        0 => Err(ParseError::NoRecognizedFields),
        1 => Ok(Normalized::Single(events.remove(0))),
        _ => Ok(Normalized::Many(events)),
    }
}

fn split_shape(shape: PayloadShape) -> Result<(Option<Map<String, Value>>, Body), ParseError> {
    Ok(match shape {
        PayloadShape::NestedString { envelope, inner } => {
            let body = match inner {
                Value::Object(fields) => Body::Fields(fields.into_iter().collect()),
                Value::Number(_) | Value::String(_) | Value::Bool(_) => Body::Scalar(inner),
                Value::Null | Value::Array(_) => return Err(ParseError::UnrecognizedShape),
            };
            (Some(envelope), body)
        }
        PayloadShape::ObjectEnvelope { envelope, fields } => {
            (Some(envelope), Body::Fields(fields.into_iter().collect()))
        }
        PayloadShape::FlatObject(fields) => (
            Some(fields.clone()),
            Body::Fields(fields.into_iter().collect()),
        ),
        PayloadShape::Scalar(value) => (None, Body::Scalar(value)),
        PayloadShape::KeyValue(pairs) => (
            None,
            Body::Fields(
                pairs
                    .into_iter()
                    .map(|(k, v)| (k, Value::String(v)))
                    .collect(),
            ),
        ),
    })
}

/// Key a bare scalar by the topic: stream topics by their kind, state topics as power
fn scalar_key(topic: Option<ParsedTopic<'_>>) -> Result<&str, ParseError> {
    let topic = topic.ok_or(ParseError::MissingTopicKind)?;
    Ok(match topic.class {
        TopicClass::Stream => topic.kind,
        TopicClass::State => "power",
    })
}

fn envelope_device_id(envelope: Option<&Map<String, Value>>) -> Option<String> {
    let envelope = envelope?;
    ["deviceId", "device_id"]
        .iter()
        .filter_map(|key| envelope.get(*key).and_then(Value::as_str))
        .find(|id| !id.is_empty())
        .map(str::to_string)
}

fn find_timestamp(fields: &[(String, Value)]) -> Option<DateTime<Utc>> {
    TIMESTAMP_KEYS.iter().find_map(|key| {
        fields
            .iter()
            .find(|(k, _)| k == key)
            .and_then(|(_, v)| parse_timestamp(v))
    })
}

fn find_envelope_timestamp(envelope: &Map<String, Value>) -> Option<DateTime<Utc>> {
    TIMESTAMP_KEYS
        .iter()
        .find_map(|key| envelope.get(*key).and_then(parse_timestamp))
}

/// Recognized readings; the first occurrence of a kind wins
fn extract_readings(fields: &[(String, Value)]) -> BTreeMap<ReadingKind, ReadingValue> {
    let mut readings = BTreeMap::new();
    for (key, value) in fields {
        let Some(kind) = resolve_key(key) else {
            continue;
        };
        if readings.contains_key(&kind) {
            continue;
        }
        if let Some(value) = coerce(kind, value) {
            readings.insert(kind, value);
        }
    }
    readings
}
