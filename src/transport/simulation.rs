//! Simulated device feed for development
//!
//! Selected explicitly with `transport = "simulation"`. Accepts subscriptions,
//! emits synthetic readings for every subscribed stream topic on a fixed
//! interval and answers pump commands by publishing the new actuator state.
//! Soil moisture falls while the pump is off and rises while it runs, so the
//! automation loop can be exercised without hardware.

use crate::error::ConnectionError;
use crate::model::{PumpMode, PumpStatus, ReadingKind};
use crate::normalizer::coercion::resolve_key;
use crate::protocol::frames::{Frame, FrameType, RawFrame};
use crate::protocol::topics::{parse_topic, TopicClass, TopicScheme};
use crate::transport::{ConnectionState, Credentials, EventSender, Transport, TransportEvent};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info};

const MOISTURE_START: f64 = 45.0;
const MOISTURE_DRY_RATE: f64 = 0.8;
const MOISTURE_WET_RATE: f64 = 2.5;

#[derive(Debug, Clone, Copy)]
struct DeviceSim {
    moisture: f64,
    power: PumpStatus,
    mode: PumpMode,
}

impl Default for DeviceSim {
    fn default() -> Self {
        Self {
            moisture: MOISTURE_START,
            power: PumpStatus::Off,
            mode: PumpMode::Manual,
        }
    }
}

impl DeviceSim {
    fn step(&mut self) {
        let delta = match self.power {
            PumpStatus::On => MOISTURE_WET_RATE,
            PumpStatus::Off => -MOISTURE_DRY_RATE,
        };
        self.moisture = (self.moisture + delta).clamp(0.0, 100.0);
    }

    fn state_payload(&self) -> String {
        json!({"power": self.power.wire_value(), "mode": self.mode.as_str()}).to_string()
    }
}

#[derive(Default)]
struct SimState {
    connected: bool,
    subscriptions: BTreeSet<String>,
    devices: HashMap<String, DeviceSim>,
    events: Option<EventSender>,
    tick: u64,
}

impl SimState {
    fn emit(&self, event: TransportEvent) {
        if let Some(sender) = &self.events {
            let _ = sender.send(event);
        }
    }
}

/// Deterministic synthetic value for a sensor kind at a given tick
fn synthetic_value(kind: ReadingKind, tick: u64, device: &DeviceSim) -> f64 {
    let phase = tick as f64 / 12.0;
    let value = match kind {
        ReadingKind::Moisture => device.moisture,
        ReadingKind::Temperature => 22.0 + 4.0 * phase.sin(),
        ReadingKind::Humidity => 55.0 + 10.0 * (phase * 0.7).cos(),
        ReadingKind::Light => (800.0 + 600.0 * (phase * 0.5).sin()).max(0.0),
        ReadingKind::Battery => (100.0 - tick as f64 * 0.05).max(5.0),
        ReadingKind::PumpStatus | ReadingKind::PumpMode => 0.0,
    };
    (value * 10.0).round() / 10.0
}

/// Development [`Transport`] producing synthetic device traffic
pub struct SimulationTransport {
    scheme: TopicScheme,
    period: Duration,
    state: Arc<Mutex<SimState>>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl SimulationTransport {
    pub fn new(scheme: TopicScheme, period: Duration) -> Self {
        Self {
            scheme,
            period,
            state: Arc::new(Mutex::new(SimState::default())),
            ticker: Mutex::new(None),
        }
    }

    fn lock_state(state: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
        match state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn stop_ticker(&self) {
        let handle = match self.ticker.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    /// Emit one round of readings for every subscribed stream topic
    fn emit_readings(state: &Mutex<SimState>) {
        let mut state = Self::lock_state(state);
        if !state.connected {
            return;
        }
        state.tick += 1;
        let tick = state.tick;

        let topics: Vec<String> = state.subscriptions.iter().cloned().collect();
        let mut stepped = BTreeSet::new();
        for topic in topics {
            let Some(parsed) = parse_topic(&topic) else {
                continue;
            };
            if parsed.class != TopicClass::Stream {
                continue;
            }
            let Some(kind) = resolve_key(parsed.kind) else {
                continue;
            };
            let device_id = parsed.device_id.to_string();
            let device = state.devices.entry(device_id.clone()).or_default();
            if stepped.insert(device_id) {
                device.step();
            }
            let value = synthetic_value(kind, tick, device);
            let payload = json!({ parsed.kind: value }).to_string();
            state.emit(TransportEvent::Frame(RawFrame::new(topic.clone(), payload)));
        }
    }

    /// Apply a command publish and echo the resulting actuator state
    fn apply_command(&self, state: &mut SimState, topic: &str, payload: &str) -> bool {
        let Some(parsed) = parse_topic(topic) else {
            return true;
        };
        if topic != self.scheme.command_topic(parsed.device_id) {
            debug!(topic, "Simulation ignoring publish to non-command topic");
            return true;
        }

        let Ok(Value::Object(command)) = serde_json::from_str::<Value>(payload) else {
            debug!(topic, "Simulation ignoring malformed command payload");
            return true;
        };

        let device_id = parsed.device_id.to_string();
        let device = state.devices.entry(device_id.clone()).or_default();
        if let Some(power) = command
            .get("power")
            .and_then(Value::as_str)
            .and_then(PumpStatus::parse)
        {
            device.power = power;
        }
        if let Some(mode) = command
            .get("mode")
            .and_then(Value::as_str)
            .and_then(PumpMode::parse)
        {
            device.mode = mode;
        }
        let echo = device.state_payload();
        info!(device_id = %device_id, state = %echo, "[Sim] Pump command applied");

        let state_topic = self.scheme.state_topic(&device_id);
        if state.subscriptions.contains(&state_topic) {
            state.emit(TransportEvent::Frame(RawFrame::new(state_topic, echo)));
        }
        true
    }
}

#[async_trait]
impl Transport for SimulationTransport {
    async fn connect(&self, _credentials: &Credentials) -> Result<(), ConnectionError> {
        self.stop_ticker();
        Self::lock_state(&self.state).connected = true;

        let state = self.state.clone();
        let period = self.period;
        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                Self::emit_readings(&state);
            }
        });
        match self.ticker.lock() {
            Ok(mut guard) => *guard = Some(handle),
            Err(poisoned) => *poisoned.into_inner() = Some(handle),
        }

        info!(period_ms = self.period.as_millis() as u64, "[Sim] Simulation transport connected");
        Ok(())
    }

    fn send(&self, frame: &Frame) -> bool {
        let mut state = Self::lock_state(&self.state);
        if !state.connected {
            return false;
        }
        match frame.frame_type {
            FrameType::Subscribe => {
                state.subscriptions.insert(frame.topic.clone());
                true
            }
            FrameType::Unsubscribe => {
                state.subscriptions.remove(&frame.topic);
                true
            }
            FrameType::Publish => {
                let payload = frame.payload.as_deref().unwrap_or_default();
                self.apply_command(&mut state, &frame.topic, payload)
            }
        }
    }

    async fn close(&self) {
        self.stop_ticker();
        let mut state = Self::lock_state(&self.state);
        state.connected = false;
        state.subscriptions.clear();
        state.emit(TransportEvent::Closed {
            abnormal: false,
            reason: "closed by client".to_string(),
        });
        info!("[Sim] Simulation transport closed");
    }

    fn state(&self) -> ConnectionState {
        if Self::lock_state(&self.state).connected {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    fn set_event_sender(&self, sender: EventSender) {
        Self::lock_state(&self.state).events = Some(sender);
    }

    fn name(&self) -> &'static str {
        "simulation"
    }
}

impl Drop for SimulationTransport {
    fn drop(&mut self) {
        self.stop_ticker();
    }
}
