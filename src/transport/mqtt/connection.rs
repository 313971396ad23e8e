//! Pure connection configuration for the MQTT transport

use crate::config::MqttSection;
use crate::error::ConnectionError;
use crate::transport::Credentials;
use rumqttc::v5::MqttOptions;
use rumqttc::Transport as RumqttcTransport;
use std::time::Duration;
use url::Url;
use uuid::Uuid;

/// rumqttc rejects keep-alive intervals shorter than this
const MIN_KEEP_ALIVE: Duration = Duration::from_secs(5);

/// Largest inbound packet accepted from the broker
const MAX_PACKET_SIZE: u32 = 64 * 1024;

/// Broker endpoint parsed from `mqtt://` or `mqtts://` URLs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl BrokerEndpoint {
    pub fn parse(broker_url: &str) -> Result<Self, ConnectionError> {
        let url = Url::parse(broker_url)
            .map_err(|e| ConnectionError::Network(format!("invalid broker URL: {e}")))?;

        let tls = match url.scheme() {
            "mqtt" => false,
            "mqtts" => true,
            other => {
                return Err(ConnectionError::Network(format!(
                    "unsupported broker URL scheme '{other}'"
                )))
            }
        };

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ConnectionError::Network("broker URL has no host".to_string()))?;
        let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });

        Ok(Self {
            host: host.to_string(),
            port,
            tls,
        })
    }
}

/// Fresh client id for every connection attempt
pub fn generate_client_id(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4())
}

/// Build rumqttc options for one connection attempt
pub fn configure_mqtt_options(
    config: &MqttSection,
    credentials: &Credentials,
) -> Result<MqttOptions, ConnectionError> {
    let endpoint = BrokerEndpoint::parse(&config.broker_url)?;
    let client_id = generate_client_id(&config.client_id_prefix);
    let mut mqtt_options = MqttOptions::new(client_id, endpoint.host, endpoint.port);

    if endpoint.tls {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some(username) = &credentials.username {
        let password = credentials.password.clone().unwrap_or_default();
        mqtt_options.set_credentials(username, password);
    }

    mqtt_options.set_keep_alive(config.keep_alive().max(MIN_KEEP_ALIVE));
    mqtt_options.set_max_packet_size(Some(MAX_PACKET_SIZE));
    mqtt_options.set_clean_start(true);

    Ok(mqtt_options)
}
