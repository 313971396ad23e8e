//! Canonical data model shared by every layer of the live-data core

pub mod event;
pub mod live_state;

pub use event::{
    EventKind, EventValue, PumpMode, PumpStatus, ReadingKind, ReadingValue, SensorEvent,
};
pub use live_state::LiveState;
