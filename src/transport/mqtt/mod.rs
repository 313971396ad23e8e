//! MQTT v5 transport built on rumqttc
//!
//! The module separates pure functions from I/O:
//!
//! - [`connection`] - broker URL parsing and rumqttc option building
//! - [`message_handler`] - event routing and error classification
//! - [`client`] - the [`MqttTransport`] and its poll task
//!
//! # Usage
//!
//! ```rust,no_run
//! use agrolink::config::MqttSection;
//! use agrolink::transport::mqtt::MqttTransport;
//! use agrolink::transport::{Credentials, Transport};
//!
//! # tokio_test::block_on(async {
//! let transport = MqttTransport::new(MqttSection {
//!     broker_url: "mqtt://localhost:1883".to_string(),
//!     ..MqttSection::default()
//! });
//! transport.connect(&Credentials::anonymous()).await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::MqttTransport;
pub use connection::{configure_mqtt_options, generate_client_id, BrokerEndpoint};
pub use message_handler::{EventRoute, MessageHandler};
