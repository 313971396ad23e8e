//! agrolink - live data core for field telemetry dashboards
//!
//! Subscribes to one device at a time over MQTT, normalizes whatever payload
//! shape the device publishes into canonical [`SensorEvent`]s, projects them
//! into a [`LiveState`] snapshot and keeps the broker link alive with capped
//! exponential backoff.
//!
//! # Overview
//!
//! - [`protocol`] topic layout and outbound frames
//! - [`normalizer`] payload shapes to canonical events
//! - [`transport`] the broker link, MQTT or simulated
//! - [`supervisor`] reconnection state machine
//! - [`registry`] which device is subscribed and where its events go
//! - [`service`] the actor tying it all together
//! - [`publisher`] actuator commands
//!
//! # Quick Start
//!
//! ```rust
//! use agrolink::normalizer::normalize;
//! use agrolink::protocol::RawFrame;
//! use agrolink::model::ReadingKind;
//!
//! let frame = RawFrame::new("farm/field-7/stream/moisture", "41.5");
//! let events = normalize(&frame).map(|n| n.into_events()).unwrap_or_default();
//!
//! assert_eq!(events.len(), 1);
//! assert_eq!(events[0].device_id, "field-7");
//! assert_eq!(events[0].readings()[0].0, ReadingKind::Moisture);
//! ```

pub mod automation;
pub mod config;
pub mod error;
pub mod model;
pub mod normalizer;
pub mod observability;
pub mod projector;
pub mod protocol;
pub mod publisher;
pub mod registry;
pub mod service;
pub mod supervisor;
pub mod testing;
pub mod transport;

pub use config::{ConfigError, DashboardConfig};
pub use error::{CommandError, ConnectionError, ServiceError};
pub use model::{LiveState, ReadingKind, ReadingValue, SensorEvent};
pub use publisher::{CommandReceipt, PumpCommand};
pub use service::LiveDataService;
pub use transport::{ConnectionState, Credentials, Transport};
