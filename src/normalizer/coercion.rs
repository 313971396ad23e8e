//! Key aliases and value coercion

use crate::model::{PumpMode, PumpStatus, ReadingKind, ReadingValue};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

/// Keys that may carry the event time
pub const TIMESTAMP_KEYS: [&str; 3] = ["timestamp", "ts", "time"];

/// Map a payload key (or topic kind segment) to the reading it carries
pub fn resolve_key(key: &str) -> Option<ReadingKind> {
    match key {
        "moisture" | "soil_moisture" | "soilMoisture" | "soil" => Some(ReadingKind::Moisture),
        "temperature" | "temp" => Some(ReadingKind::Temperature),
        "humidity" | "hum" => Some(ReadingKind::Humidity),
        "light" | "lux" | "light_level" => Some(ReadingKind::Light),
        "battery" | "bat" | "battery_level" => Some(ReadingKind::Battery),
        "power" | "status" | "pump" => Some(ReadingKind::PumpStatus),
        "mode" | "pumpMode" | "pump_mode" => Some(ReadingKind::PumpMode),
        _ => None,
    }
}

/// Coerce a payload value for `kind`; `None` means the field is ignored
pub fn coerce(kind: ReadingKind, value: &Value) -> Option<ReadingValue> {
    match kind {
        ReadingKind::PumpStatus => coerce_pump_status(value),
        ReadingKind::PumpMode => coerce_pump_mode(value),
        _ => coerce_sensor(value),
    }
}

/// Numbers and fully numeric strings become numbers; other strings stay text
pub fn coerce_sensor(value: &Value) -> Option<ReadingValue> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .filter(|f| f.is_finite())
            .map(ReadingValue::Number),
        Value::String(s) => Some(match parse_finite(s) {
            Some(n) => ReadingValue::Number(n),
            None => ReadingValue::Text(s.clone()),
        }),
        Value::Bool(b) => Some(ReadingValue::Text(b.to_string())),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn coerce_pump_status(value: &Value) -> Option<ReadingValue> {
    let text = scalar_text(value)?;
    PumpStatus::parse(&text).map(ReadingValue::Status)
}

fn coerce_pump_mode(value: &Value) -> Option<ReadingValue> {
    let text = scalar_text(value)?;
    let lowered = text.trim().to_ascii_lowercase();
    if lowered.is_empty() {
        return None;
    }
    Some(match PumpMode::parse(&lowered) {
        Some(mode) => ReadingValue::Mode(mode),
        None => ReadingValue::Text(lowered),
    })
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn parse_finite(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|f| f.is_finite())
}

/// Parse a payload timestamp
///
/// Strings are ISO-8601 (with or without offset, naive times taken as UTC).
/// Numbers are epoch seconds, or epoch milliseconds above 10^12.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_timestamp_str(s.trim()),
        Value::Number(n) => {
            let raw = n.as_f64().filter(|f| f.is_finite() && *f >= 0.0)?;
            let millis = if raw >= 1e12 { raw } else { raw * 1000.0 };
            Utc.timestamp_millis_opt(millis as i64).single()
        }
        _ => None,
    }
}

fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }
    parse_finite(s).and_then(|n| parse_timestamp(&Value::from(n)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_aliases() {
        for key in ["moisture", "soil_moisture", "soilMoisture", "soil"] {
            assert_eq!(resolve_key(key), Some(ReadingKind::Moisture));
        }
        assert_eq!(resolve_key("temp"), Some(ReadingKind::Temperature));
        assert_eq!(resolve_key("hum"), Some(ReadingKind::Humidity));
        assert_eq!(resolve_key("lux"), Some(ReadingKind::Light));
        assert_eq!(resolve_key("battery_level"), Some(ReadingKind::Battery));
        assert_eq!(resolve_key("pump"), Some(ReadingKind::PumpStatus));
        assert_eq!(resolve_key("pump_mode"), Some(ReadingKind::PumpMode));
        assert_eq!(resolve_key("Temp"), None);
        assert_eq!(resolve_key("rssi"), None);
    }

    #[test]
    fn test_sensor_coercion() {
        assert_eq!(coerce_sensor(&json!(30)), Some(ReadingValue::Number(30.0)));
        assert_eq!(coerce_sensor(&json!(" 30.5 ")), Some(ReadingValue::Number(30.5)));
        assert_eq!(
            coerce_sensor(&json!("unknown")),
            Some(ReadingValue::Text("unknown".into()))
        );
        assert_eq!(
            coerce_sensor(&json!("NaN")),
            Some(ReadingValue::Text("NaN".into()))
        );
        assert_eq!(coerce_sensor(&Value::Null), None);
        assert_eq!(coerce_sensor(&json!([1, 2])), None);
    }

    #[test]
    fn test_actuator_coercion() {
        assert_eq!(
            coerce(ReadingKind::PumpStatus, &json!("on")),
            Some(ReadingValue::Status(PumpStatus::On))
        );
        assert_eq!(
            coerce(ReadingKind::PumpStatus, &json!(0)),
            Some(ReadingValue::Status(PumpStatus::Off))
        );
        assert_eq!(
            coerce(ReadingKind::PumpStatus, &json!(true)),
            Some(ReadingValue::Status(PumpStatus::On))
        );
        assert_eq!(coerce(ReadingKind::PumpStatus, &json!("sideways")), None);
        assert_eq!(
            coerce(ReadingKind::PumpMode, &json!("AUTO")),
            Some(ReadingValue::Mode(PumpMode::Auto))
        );
        assert_eq!(
            coerce(ReadingKind::PumpMode, &json!("Scheduled")),
            Some(ReadingValue::Text("scheduled".into()))
        );
    }

    #[test]
    fn test_timestamp_parsing() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        assert_eq!(parse_timestamp(&json!("2024-05-01T10:00:00Z")), Some(expected));
        assert_eq!(parse_timestamp(&json!("2024-05-01T12:00:00+02:00")), Some(expected));
        assert_eq!(parse_timestamp(&json!("2024-05-01T10:00:00")), Some(expected));
        assert_eq!(parse_timestamp(&json!(expected.timestamp())), Some(expected));
        assert_eq!(
            parse_timestamp(&json!(expected.timestamp_millis())),
            Some(expected)
        );
        assert_eq!(parse_timestamp(&json!("yesterday")), None);
        assert_eq!(parse_timestamp(&json!(-5)), None);
    }
}
