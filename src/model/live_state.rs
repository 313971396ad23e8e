//! Latest-known-value snapshot of the subscribed device

use super::event::{PumpMode, PumpStatus, ReadingKind, ReadingValue};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-device snapshot consumed by the dashboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveState {
    /// Device this snapshot describes; `None` before any subscription
    pub device_id: Option<String>,
    pub readings: BTreeMap<ReadingKind, ReadingValue>,
    pub is_connected: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

impl LiveState {
    /// The "unknown" sentinel: no sensor values, pump off, manual mode
    pub fn unknown(device_id: Option<String>) -> Self {
        let mut readings = BTreeMap::new();
        readings.insert(ReadingKind::PumpStatus, ReadingValue::Status(PumpStatus::Off));
        readings.insert(ReadingKind::PumpMode, ReadingValue::Mode(PumpMode::Manual));
        Self {
            device_id,
            readings,
            is_connected: false,
            updated_at: None,
        }
    }

    pub fn get(&self, kind: ReadingKind) -> Option<&ReadingValue> {
        self.readings.get(&kind)
    }

    /// Numeric value of `kind`; `None` when absent or non-numeric
    pub fn numeric(&self, kind: ReadingKind) -> Option<f64> {
        self.get(kind).and_then(ReadingValue::as_f64)
    }

    pub fn moisture(&self) -> Option<f64> {
        self.numeric(ReadingKind::Moisture)
    }

    pub fn pump_status(&self) -> Option<PumpStatus> {
        self.get(ReadingKind::PumpStatus)
            .and_then(ReadingValue::as_pump_status)
    }

    pub fn pump_mode(&self) -> Option<PumpMode> {
        self.get(ReadingKind::PumpMode)
            .and_then(ReadingValue::as_pump_mode)
    }

    /// True when this snapshot still has no sensor reading at all
    pub fn is_unknown(&self) -> bool {
        !self.readings.keys().any(|k| k.is_sensor())
    }

    pub(crate) fn set(&mut self, kind: ReadingKind, value: ReadingValue) {
        self.readings.insert(kind, value);
    }
}

impl Default for LiveState {
    fn default() -> Self {
        Self::unknown(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_sentinel() {
        let state = LiveState::unknown(Some("dev1".to_string()));
        assert_eq!(state.device_id.as_deref(), Some("dev1"));
        assert!(state.is_unknown());
        assert_eq!(state.moisture(), None);
        assert_eq!(state.pump_status(), Some(PumpStatus::Off));
        assert_eq!(state.pump_mode(), Some(PumpMode::Manual));
        assert!(!state.is_connected);
        assert!(state.updated_at.is_none());
    }

    #[test]
    fn test_numeric_ignores_text() {
        let mut state = LiveState::default();
        state.set(ReadingKind::Moisture, ReadingValue::Text("unknown".into()));
        assert_eq!(state.moisture(), None);
        assert!(!state.is_unknown());

        state.set(ReadingKind::Moisture, ReadingValue::Number(42.0));
        assert_eq!(state.moisture(), Some(42.0));
    }

    #[test]
    fn test_serializes_camel_case() {
        let state = LiveState::unknown(Some("dev1".to_string()));
        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(value["deviceId"], "dev1");
        assert_eq!(value["isConnected"], false);
        assert_eq!(value["readings"]["pumpStatus"], "OFF");
        assert_eq!(value["readings"]["pumpMode"], "manual");
    }
}
