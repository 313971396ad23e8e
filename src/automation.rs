//! Moisture-threshold pump automation
//!
//! A consumer of [`LiveState`], not part of the live-data core. While the pump
//! is in `auto` mode it switches the pump on below the low threshold and off
//! above the high one. Failed commands are never queued; the next live update
//! re-evaluates from scratch.

use crate::config::AutomationSection;
use crate::model::{LiveState, PumpMode, PumpStatus};
use crate::publisher::PumpCommand;
use crate::service::LiveDataService;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Instrument};

#[derive(Debug, Clone)]
pub struct MoistureAutomation {
    moisture_low: f64,
    moisture_high: f64,
    cooldown: Duration,
    /// Last command sent and when; cleared once the device echoes it
    last_issued: Option<(PumpStatus, Instant)>,
}

impl From<&AutomationSection> for MoistureAutomation {
    fn from(section: &AutomationSection) -> Self {
        Self::new(
            section.moisture_low,
            section.moisture_high,
            Duration::from_secs(section.cooldown_secs),
        )
    }
}

impl MoistureAutomation {
    pub fn new(moisture_low: f64, moisture_high: f64, cooldown: Duration) -> Self {
        Self {
            moisture_low,
            moisture_high,
            cooldown,
            last_issued: None,
        }
    }

    pub fn evaluate(&mut self, state: &LiveState) -> Option<PumpCommand> {
        self.evaluate_at(state, Instant::now())
    }

    /// Command the thresholds call for at `now`, if any
    pub fn evaluate_at(&mut self, state: &LiveState, now: Instant) -> Option<PumpCommand> {
        let pump = state.pump_status()?;
        if self.last_issued.is_some_and(|(issued, _)| issued == pump) {
            self.last_issued = None;
        }

        if state.pump_mode() != Some(PumpMode::Auto) {
            return None;
        }
        let moisture = state.moisture()?;

        let desired = if moisture < self.moisture_low && pump == PumpStatus::Off {
            PumpStatus::On
        } else if moisture > self.moisture_high && pump == PumpStatus::On {
            PumpStatus::Off
        } else {
            return None;
        };

        if let Some((issued, at)) = self.last_issued {
            if issued == desired && now.saturating_duration_since(at) < self.cooldown {
                debug!(command = desired.as_str(), "Automation command still cooling down");
                return None;
            }
        }

        Some(PumpCommand::power(desired))
    }

    /// Record a command that reached the transport
    pub fn mark_issued(&mut self, command: &PumpCommand, now: Instant) {
        if let Some(power) = command.power {
            self.last_issued = Some((power, now));
        }
    }
}

/// Drive `automation` from the live updates of `device_id`
pub fn run_automation(
    service: Arc<LiveDataService>,
    device_id: String,
    mut automation: MoistureAutomation,
) -> JoinHandle<()> {
    let span = crate::device_span!(device_id = %device_id, role = "automation");
    tokio::spawn(
        async move {
            let mut updates = service.on_live_update();
            info!("Moisture automation running");
            while updates.changed().await.is_ok() {
                let state = updates.borrow_and_update().clone();
                if state.device_id.as_deref() != Some(device_id.as_str()) {
                    continue;
                }
                let Some(command) = automation.evaluate(&state) else {
                    continue;
                };
                match service.send_pump_command(&device_id, command) {
                    Ok(receipt) => {
                        automation.mark_issued(&command, Instant::now());
                        info!(command_id = %receipt.id, payload = %receipt.payload, "Automation command sent");
                    }
                    Err(e) => warn!(error = %e, "Automation command failed"),
                }
            }
            debug!("Live updates closed, automation stopping");
        }
        .instrument(span),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ReadingKind, ReadingValue};

    fn automation() -> MoistureAutomation {
        MoistureAutomation::new(30.0, 60.0, Duration::from_secs(30))
    }

    fn state(moisture: ReadingValue, pump: PumpStatus, mode: PumpMode) -> LiveState {
        let mut state = LiveState::unknown(Some("dev1".into()));
        state.set(ReadingKind::Moisture, moisture);
        state.set(ReadingKind::PumpStatus, ReadingValue::Status(pump));
        state.set(ReadingKind::PumpMode, ReadingValue::Mode(mode));
        state
    }

    #[test]
    fn test_dry_soil_turns_pump_on() {
        let mut auto = automation();
        let command = auto.evaluate(&state(ReadingValue::Number(20.0), PumpStatus::Off, PumpMode::Auto));
        assert_eq!(command, Some(PumpCommand::power(PumpStatus::On)));
    }

    #[test]
    fn test_wet_soil_turns_pump_off() {
        let mut auto = automation();
        let command = auto.evaluate(&state(ReadingValue::Number(75.0), PumpStatus::On, PumpMode::Auto));
        assert_eq!(command, Some(PumpCommand::power(PumpStatus::Off)));
    }

    #[test]
    fn test_manual_mode_never_fires() {
        let mut auto = automation();
        assert_eq!(
            auto.evaluate(&state(ReadingValue::Number(5.0), PumpStatus::Off, PumpMode::Manual)),
            None
        );
    }

    #[test]
    fn test_within_band_does_nothing() {
        let mut auto = automation();
        assert_eq!(
            auto.evaluate(&state(ReadingValue::Number(45.0), PumpStatus::Off, PumpMode::Auto)),
            None
        );
        assert_eq!(
            auto.evaluate(&state(ReadingValue::Number(20.0), PumpStatus::On, PumpMode::Auto)),
            None
        );
    }

    #[test]
    fn test_unknown_moisture_never_breaches() {
        let mut auto = automation();
        let unknown = state(ReadingValue::Text("unknown".into()), PumpStatus::Off, PumpMode::Auto);
        assert_eq!(auto.evaluate(&unknown), None);

        let mut sentinel = LiveState::unknown(Some("dev1".into()));
        sentinel.set(ReadingKind::PumpMode, ReadingValue::Mode(PumpMode::Auto));
        assert_eq!(auto.evaluate(&sentinel), None);
    }

    #[test]
    fn test_cooldown_prevents_double_firing() {
        let mut auto = automation();
        let dry = state(ReadingValue::Number(20.0), PumpStatus::Off, PumpMode::Auto);
        let now = Instant::now();

        let command = auto.evaluate_at(&dry, now).unwrap();
        auto.mark_issued(&command, now);

        assert_eq!(auto.evaluate_at(&dry, now + Duration::from_secs(5)), None);
        assert_eq!(
            auto.evaluate_at(&dry, now + Duration::from_secs(31)),
            Some(PumpCommand::power(PumpStatus::On))
        );
    }

    #[test]
    fn test_echo_clears_cooldown() {
        let mut auto = automation();
        let now = Instant::now();
        let command = PumpCommand::power(PumpStatus::On);
        auto.mark_issued(&command, now);

        // Device reports the pump on, later the operator turns it off again
        auto.evaluate_at(
            &state(ReadingValue::Number(20.0), PumpStatus::On, PumpMode::Auto),
            now,
        );
        assert_eq!(
            auto.evaluate_at(
                &state(ReadingValue::Number(20.0), PumpStatus::Off, PumpMode::Auto),
                now + Duration::from_secs(1),
            ),
            Some(command)
        );
    }

    #[test]
    fn test_from_section() {
        let section = AutomationSection {
            enabled: true,
            moisture_low: 10.0,
            moisture_high: 20.0,
            cooldown_secs: 1,
        };
        let mut auto = MoistureAutomation::from(&section);
        assert_eq!(
            auto.evaluate(&state(ReadingValue::Number(15.0), PumpStatus::Off, PumpMode::Auto)),
            None
        );
    }
}
