//! Live state projector
//!
//! Folds the event stream of the subscribed device into one [`LiveState`].

use crate::model::{LiveState, SensorEvent};
use tracing::trace;

#[derive(Debug, Default)]
pub struct LiveStateProjector {
    state: LiveState,
}

impl LiveStateProjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &LiveState {
        &self.state
    }

    /// Install the unknown sentinel for `device_id`, keeping the link flag
    pub fn reset(&mut self, device_id: Option<&str>) {
        let is_connected = self.state.is_connected;
        self.state = LiveState::unknown(device_id.map(str::to_string));
        self.state.is_connected = is_connected;
    }

    /// Fold one event; `None` when it describes another device
    ///
    /// A batch update merges all of its readings in one step, a single-kind
    /// event replaces only its own key.
    pub fn apply(&mut self, event: &SensorEvent) -> Option<&LiveState> {
        if self.state.device_id.as_deref() != Some(event.device_id.as_str()) {
            trace!(device_id = %event.device_id, "Event for another device ignored");
            return None;
        }

        let readings = event.readings();
        if readings.is_empty() {
            return None;
        }
        for (kind, value) in readings {
            self.state.set(kind, value.clone());
        }
        self.state.updated_at = Some(event.timestamp);
        Some(&self.state)
    }

    /// Returns true when the flag changed
    pub fn set_connected(&mut self, connected: bool) -> bool {
        if self.state.is_connected == connected {
            return false;
        }
        self.state.is_connected = connected;
        true
    }
}
