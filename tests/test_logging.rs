//! Tests for logging configuration and format parsing
//!
//! Tests the pure functions in the logging module that handle
//! log format parsing and configuration from environment variables.

use agrolink::observability::logging::{init_logging, parse_level, LogFormat};
use agrolink::{device_span, lifecycle_span, mqtt_span};
use tracing::Level;

#[test]
fn test_log_format_parse_json() {
    assert_eq!(LogFormat::parse("json"), LogFormat::Json);
    assert_eq!(LogFormat::parse("JSON"), LogFormat::Json);
    assert_eq!(LogFormat::parse("Json"), LogFormat::Json);
}

#[test]
fn test_log_format_parse_pretty() {
    assert_eq!(LogFormat::parse("pretty"), LogFormat::Pretty);
    assert_eq!(LogFormat::parse("PRETTY"), LogFormat::Pretty);
}

#[test]
fn test_log_format_parse_compact() {
    assert_eq!(LogFormat::parse("compact"), LogFormat::Compact);
    assert_eq!(LogFormat::parse("COMPACT"), LogFormat::Compact);
}

#[test]
fn test_log_format_parse_invalid_defaults_to_json() {
    // Invalid formats should default to JSON for production safety
    for input in ["invalid", "", "xml", "yaml", "123", "  pretty  "] {
        assert_eq!(LogFormat::parse(input), LogFormat::Json, "input {input:?}");
    }
}

#[test]
fn test_log_level_parsing() {
    let cases = [
        ("ERROR", Level::ERROR),
        ("warn", Level::WARN),
        ("INFO", Level::INFO),
        ("Debug", Level::DEBUG),
        ("trace", Level::TRACE),
        ("verbose", Level::INFO),
        ("", Level::INFO),
    ];
    for (input, expected) in cases {
        assert_eq!(parse_level(input), expected, "Failed for input: {input}");
    }
}

#[test]
fn test_init_logging_is_idempotent() {
    init_logging(Level::DEBUG, LogFormat::Compact, false);
    // A second subscriber is refused quietly
    init_logging(Level::INFO, LogFormat::Json, true);
    tracing::info!("logging initialized twice without panicking");
}

#[test]
fn test_span_macros_carry_fields() {
    let device = device_span!(device_id = "field-7", role = "watch");
    let mqtt = mqtt_span!(topic = "farm/field-7/stream/moisture");
    let lifecycle = lifecycle_span!(phase = "stop");

    let _entered = device.enter();
    mqtt.in_scope(|| tracing::debug!("inside mqtt span"));
    lifecycle.in_scope(|| tracing::debug!("inside lifecycle span"));
}
