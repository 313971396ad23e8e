//! Dashboard configuration
//!
//! Loaded from a TOML file. Every section has defaults so a minimal file only
//! needs the broker URL and topic namespace. Credentials are never stored in
//! the file: the `[mqtt]` section names the environment variables that hold
//! them, resolved at connect time.

use crate::protocol::topics::{validate_segment, TopicScheme, ValidationError};
use crate::supervisor::{HealthMonitor, ReconnectConfig};
use crate::transport::Credentials;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Top-level configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DashboardConfig {
    /// Which transport implementation to use
    #[serde(default)]
    pub transport: TransportKind,
    #[serde(default)]
    pub mqtt: MqttSection,
    #[serde(default)]
    pub topics: TopicsSection,
    #[serde(default)]
    pub reconnect: ReconnectSection,
    #[serde(default)]
    pub automation: AutomationSection,
    #[serde(default)]
    pub health: HealthSection,
    #[serde(default)]
    pub simulation: SimulationSection,
}

/// Transport selection; simulation is never an implicit fallback
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Mqtt,
    Simulation,
}

/// MQTT broker connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// Broker URL, `mqtt://host[:port]` or `mqtts://host[:port]`
    #[serde(default = "default_broker_url")]
    pub broker_url: String,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    /// Handshake timeout in seconds (default: 10)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Keep-alive heartbeat in seconds (default: 30)
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// Client ids are `<prefix>-<uuid>`, fresh per connection attempt
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,
}

fn default_broker_url() -> String {
    "mqtt://localhost:1883".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_keep_alive() -> u64 {
    30
}

fn default_client_id_prefix() -> String {
    "agrolink".to_string()
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            broker_url: default_broker_url(),
            username_env: None,
            password_env: None,
            connect_timeout_secs: default_connect_timeout(),
            keep_alive_secs: default_keep_alive(),
            client_id_prefix: default_client_id_prefix(),
        }
    }
}

impl MqttSection {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }
}

/// Topic layout
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TopicsSection {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_stream_kinds")]
    pub stream_kinds: Vec<String>,
    #[serde(default = "default_state_kind")]
    pub state_kind: String,
    #[serde(default = "default_command_suffix")]
    pub command_suffix: String,
}

fn default_namespace() -> String {
    "farm".to_string()
}

fn default_stream_kinds() -> Vec<String> {
    ["moisture", "temp", "humidity", "light", "battery"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_state_kind() -> String {
    "motor".to_string()
}

fn default_command_suffix() -> String {
    "set".to_string()
}

impl Default for TopicsSection {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            stream_kinds: default_stream_kinds(),
            state_kind: default_state_kind(),
            command_suffix: default_command_suffix(),
        }
    }
}

/// Reconnection backoff policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectSection {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_max_attempts() -> u32 {
    10
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// Moisture-threshold pump automation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AutomationSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_moisture_low")]
    pub moisture_low: f64,
    #[serde(default = "default_moisture_high")]
    pub moisture_high: f64,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

fn default_moisture_low() -> f64 {
    30.0
}

fn default_moisture_high() -> f64 {
    60.0
}

fn default_cooldown_secs() -> u64 {
    30
}

impl Default for AutomationSection {
    fn default() -> Self {
        Self {
            enabled: false,
            moisture_low: default_moisture_low(),
            moisture_high: default_moisture_high(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

/// HTTP health endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthSection {
    #[serde(default = "default_health_port")]
    pub port: u16,
}

fn default_health_port() -> u16 {
    8080
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            port: default_health_port(),
        }
    }
}

/// Simulated device feed, used when `transport = "simulation"`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimulationSection {
    /// Interval between synthetic readings in milliseconds
    #[serde(default = "default_simulation_interval_ms")]
    pub interval_ms: u64,
}

fn default_simulation_interval_ms() -> u64 {
    2_000
}

impl Default for SimulationSection {
    fn default() -> Self {
        Self {
            interval_ms: default_simulation_interval_ms(),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Invalid topic segment '{segment}': {source}")]
    InvalidTopicSegment {
        segment: String,
        #[source]
        source: ValidationError,
    },
}

impl DashboardConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: DashboardConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_segment(&self.topics.namespace)?;
        check_segment(&self.topics.state_kind)?;
        check_segment(&self.topics.command_suffix)?;
        if self.topics.stream_kinds.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "topics.stream_kinds must list at least one kind".to_string(),
            ));
        }
        for kind in &self.topics.stream_kinds {
            check_segment(kind)?;
        }

        if self.transport == TransportKind::Mqtt {
            let url = url::Url::parse(&self.mqtt.broker_url).map_err(|e| {
                ConfigError::InvalidConfig(format!(
                    "mqtt.broker_url '{}' is not a valid URL: {e}",
                    self.mqtt.broker_url
                ))
            })?;
            if !matches!(url.scheme(), "mqtt" | "mqtts") {
                return Err(ConfigError::InvalidConfig(format!(
                    "mqtt.broker_url scheme must be mqtt or mqtts, got '{}'",
                    url.scheme()
                )));
            }
        }
        if self.mqtt.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "mqtt.connect_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.mqtt.client_id_prefix.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "mqtt.client_id_prefix cannot be empty".to_string(),
            ));
        }

        HealthMonitor::validate_reconnect_config(&ReconnectConfig::from(&self.reconnect))
            .map_err(|e| ConfigError::InvalidConfig(format!("reconnect: {e}")))?;

        if self.automation.moisture_low >= self.automation.moisture_high {
            return Err(ConfigError::InvalidConfig(format!(
                "automation.moisture_low ({}) must be below moisture_high ({})",
                self.automation.moisture_low, self.automation.moisture_high
            )));
        }

        if self.simulation.interval_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "simulation.interval_ms must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Topic scheme built from the `[topics]` section
    pub fn topic_scheme(&self) -> TopicScheme {
        TopicScheme::new(
            self.topics.namespace.clone(),
            self.topics.stream_kinds.clone(),
            self.topics.state_kind.clone(),
            self.topics.command_suffix.clone(),
        )
    }

    /// Credentials resolved from the configured environment variables
    pub fn credentials(&self) -> Credentials {
        Credentials {
            username: get_env_var_optional(self.mqtt.username_env.as_ref()),
            password: get_env_var_optional(self.mqtt.password_env.as_ref()),
        }
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[mqtt]
broker_url = "mqtt://localhost:1883"

[topics]
namespace = "ns"

[reconnect]
base_delay_ms = 5
max_delay_ms = 20
max_attempts = 3
"#;
        Self::from_toml_str(toml_content).expect("Test config should parse")
    }
}

fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
    env_var_name.and_then(|name| std::env::var(name).ok())
}

fn check_segment(segment: &str) -> Result<(), ConfigError> {
    validate_segment(segment).map_err(|source| ConfigError::InvalidTopicSegment {
        segment: segment.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_config() {
        let toml_content = r#"
transport = "mqtt"

[mqtt]
broker_url = "mqtts://broker.example.com:8883"
username_env = "MQTT_USERNAME"
password_env = "MQTT_PASSWORD"
connect_timeout_secs = 5
keep_alive_secs = 20
client_id_prefix = "dash"

[topics]
namespace = "greenhouse"
stream_kinds = ["moisture", "temp"]
state_kind = "pump"
command_suffix = "cmd"

[reconnect]
base_delay_ms = 500
max_delay_ms = 8000
max_attempts = 4

[automation]
enabled = true
moisture_low = 25.0
moisture_high = 55.0
cooldown_secs = 10

[health]
port = 9090
"#;

        let config = DashboardConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.transport, TransportKind::Mqtt);
        assert_eq!(config.mqtt.broker_url, "mqtts://broker.example.com:8883");
        assert_eq!(config.mqtt.connect_timeout(), Duration::from_secs(5));
        assert_eq!(config.topics.namespace, "greenhouse");
        assert_eq!(config.reconnect.max_attempts, 4);
        assert!(config.automation.enabled);
        assert_eq!(config.health.port, 9090);

        let scheme = config.topic_scheme();
        assert_eq!(
            scheme.device_topics("d1"),
            vec![
                "greenhouse/d1/stream/moisture",
                "greenhouse/d1/stream/temp",
                "greenhouse/d1/state/pump",
            ]
        );
        assert_eq!(scheme.command_topic("d1"), "greenhouse/d1/state/pump/cmd");
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = DashboardConfig::from_toml_str("").unwrap();
        assert_eq!(config.transport, TransportKind::Mqtt);
        assert_eq!(config.mqtt.broker_url, "mqtt://localhost:1883");
        assert_eq!(config.mqtt.connect_timeout_secs, 10);
        assert_eq!(config.mqtt.keep_alive_secs, 30);
        assert_eq!(config.mqtt.client_id_prefix, "agrolink");
        assert_eq!(config.topics.namespace, "farm");
        assert_eq!(config.topics.stream_kinds.len(), 5);
        assert_eq!(config.topics.state_kind, "motor");
        assert_eq!(config.topics.command_suffix, "set");
        assert_eq!(config.reconnect.base_delay_ms, 1000);
        assert_eq!(config.reconnect.max_delay_ms, 30000);
        assert_eq!(config.reconnect.max_attempts, 10);
        assert!(!config.automation.enabled);
        assert_eq!(config.health.port, 8080);
        assert_eq!(config, DashboardConfig::default());
    }

    #[test]
    fn test_simulation_transport_selected_explicitly() {
        let config = DashboardConfig::from_toml_str(
            r#"
transport = "simulation"

[simulation]
interval_ms = 250
"#,
        )
        .unwrap();
        assert_eq!(config.transport, TransportKind::Simulation);
        assert_eq!(config.simulation.interval_ms, 250);
    }

    #[test]
    fn test_invalid_namespace_rejected() {
        let result = DashboardConfig::from_toml_str(
            r#"
[topics]
namespace = "farm/+"
"#,
        );
        assert!(matches!(
            result,
            Err(ConfigError::InvalidTopicSegment { .. })
        ));
    }

    #[test]
    fn test_invalid_broker_scheme_rejected() {
        let result = DashboardConfig::from_toml_str(
            r#"
[mqtt]
broker_url = "http://localhost:1883"
"#,
        );
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_invalid_reconnect_policy_rejected() {
        let result = DashboardConfig::from_toml_str(
            r#"
[reconnect]
base_delay_ms = 5000
max_delay_ms = 1000
"#,
        );
        match result {
            Err(ConfigError::InvalidConfig(message)) => {
                assert!(message.starts_with("reconnect: max_delay"), "{message}")
            }
            other => panic!("Expected InvalidConfig, got {other:?}"),
        }

        let result = DashboardConfig::from_toml_str(
            r#"
[reconnect]
max_attempts = 0
"#,
        );
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_inverted_moisture_thresholds_rejected() {
        let result = DashboardConfig::from_toml_str(
            r#"
[automation]
moisture_low = 70.0
moisture_high = 40.0
"#,
        );
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }

    #[test]
    fn test_unknown_transport_rejected() {
        let result = DashboardConfig::from_toml_str(r#"transport = "carrier-pigeon""#);
        assert!(matches!(result, Err(ConfigError::TomlParse(_))));
    }

    #[test]
    fn test_credentials_from_env() {
        std::env::set_var("AGROLINK_TEST_USER_CFG", "farmer");
        let mut config = DashboardConfig::test_config();
        config.mqtt.username_env = Some("AGROLINK_TEST_USER_CFG".to_string());
        config.mqtt.password_env = Some("AGROLINK_TEST_MISSING_PASS_CFG".to_string());

        let credentials = config.credentials();
        assert_eq!(credentials.username.as_deref(), Some("farmer"));
        assert_eq!(credentials.password, None);
        std::env::remove_var("AGROLINK_TEST_USER_CFG");
    }
}
