//! Payload shape classification
//!
//! Each matcher is total and side-effect free: it either recognizes the
//! payload and returns its [`PayloadShape`] or declines with `None`. The table
//! is tried in priority order and the first match wins.

use serde_json::{Map, Value};

/// Classified payload
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadShape {
    /// `{"payload": "<json text>", ...}`; `inner` is the decoded string
    NestedString {
        envelope: Map<String, Value>,
        inner: Value,
    },
    /// `{"payload": {...}, ...}`
    ObjectEnvelope {
        envelope: Map<String, Value>,
        fields: Map<String, Value>,
    },
    /// Any other JSON object
    FlatObject(Map<String, Value>),
    /// Bare JSON number, string or bool
    Scalar(Value),
    /// `k=v` pairs separated by `,`, `;`, `&` or whitespace
    KeyValue(Vec<(String, String)>),
}

/// Raw payload text with its JSON parse attempted once
pub struct Payload<'a> {
    pub text: &'a str,
    pub json: Option<Value>,
}

impl<'a> Payload<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            text,
            json: serde_json::from_str(text).ok(),
        }
    }

    fn object(&self) -> Option<&Map<String, Value>> {
        self.json.as_ref().and_then(Value::as_object)
    }
}

pub type Matcher = fn(&Payload<'_>) -> Option<PayloadShape>;

/// Matchers in priority order
pub const MATCHERS: [(&str, Matcher); 5] = [
    ("nested_string", match_nested_string),
    ("object_envelope", match_object_envelope),
    ("flat_object", match_flat_object),
    ("scalar", match_scalar),
    ("key_value", match_key_value),
];

/// Classify a payload with the first matcher that accepts it
pub fn classify(text: &str) -> Option<PayloadShape> {
    let payload = Payload::new(text);
    MATCHERS.iter().find_map(|(_, matcher)| matcher(&payload))
}

fn match_nested_string(payload: &Payload<'_>) -> Option<PayloadShape> {
    let object = payload.object()?;
    let inner_text = object.get("payload")?.as_str()?;
    // Decoded exactly once; undecodable text is a scalar value.
    let inner = serde_json::from_str::<Value>(inner_text)
        .unwrap_or_else(|_| Value::String(inner_text.to_string()));
    Some(PayloadShape::NestedString {
        envelope: object.clone(),
        inner,
    })
}

fn match_object_envelope(payload: &Payload<'_>) -> Option<PayloadShape> {
    let object = payload.object()?;
    let fields = object.get("payload")?.as_object()?;
    Some(PayloadShape::ObjectEnvelope {
        envelope: object.clone(),
        fields: fields.clone(),
    })
}

fn match_flat_object(payload: &Payload<'_>) -> Option<PayloadShape> {
    payload.object().cloned().map(PayloadShape::FlatObject)
}

fn match_scalar(payload: &Payload<'_>) -> Option<PayloadShape> {
    match payload.json.as_ref()? {
        value @ (Value::Number(_) | Value::String(_) | Value::Bool(_)) => {
            Some(PayloadShape::Scalar(value.clone()))
        }
        _ => None,
    }
}

fn match_key_value(payload: &Payload<'_>) -> Option<PayloadShape> {
    if payload.json.is_some() {
        return None;
    }

    let pairs: Vec<(String, String)> = payload
        .text
        .split(|c: char| matches!(c, ',' | ';' | '&') || c.is_whitespace())
        .filter_map(|token| {
            let (key, value) = token.split_once('=')?;
            let key = key.trim();
            let value = value.trim();
            if key.is_empty() || value.is_empty() {
                None
            } else {
                Some((key.to_string(), value.to_string()))
            }
        })
        .collect();

    if pairs.is_empty() {
        None
    } else {
        Some(PayloadShape::KeyValue(pairs))
    }
}
