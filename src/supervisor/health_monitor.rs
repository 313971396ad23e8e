//! Pure backoff, reconnection and health functions
//!
//! Nothing here touches a clock except through the `Instant`s passed in, so
//! every decision is reproducible in tests.

use crate::config::ReconnectSection;
use serde::Serialize;
use std::time::{Duration, Instant};

/// A link with no frame for this long is reported unhealthy
const STALE_AFTER: Duration = Duration::from_secs(300);

/// Exponential backoff policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay after the first failure
    pub base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Consecutive failures before giving up
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 10,
        }
    }
}

impl From<&ReconnectSection> for ReconnectConfig {
    fn from(section: &ReconnectSection) -> Self {
        Self {
            base_delay: Duration::from_millis(section.base_delay_ms),
            max_delay: Duration::from_millis(section.max_delay_ms),
            max_attempts: section.max_attempts,
        }
    }
}

impl ReconnectConfig {
    /// Delay after failure number `failure` (1-based): `min(base * 2^(n-1), max)`
    pub fn calculate_backoff_delay(&self, failure: u32) -> Duration {
        let exponent = failure.saturating_sub(1).min(31);
        let factor = 1u32 << exponent;
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

/// Decision result for reconnection attempts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconnectionDecision {
    /// Wait `delay`, then make connection attempt `attempt`
    Proceed { attempt: u32, delay: Duration },
    /// Abort reconnection - max attempts exceeded
    AbortMaxAttemptsExceeded,
    /// Abort reconnection - credentials rejected
    AbortAuthRejected,
}

/// Health metrics for connection monitoring
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthMetrics {
    /// Time since connection established
    pub uptime: Option<Duration>,
    /// Time since the last inbound frame
    pub time_since_last_frame: Option<Duration>,
    /// Number of successful reconnections
    pub reconnect_count: u32,
    /// Overall health status
    pub is_healthy: bool,
    pub quality: ConnectionQuality,
}

/// Connection quality assessment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionQuality {
    /// Excellent - stable connection, recent activity
    Excellent,
    /// Good - stable connection, moderate activity
    Good,
    /// Fair - some reconnections, but working
    Fair,
    /// Poor - frequent reconnections
    Poor,
    /// Critical - not connected or failing frequently
    Critical,
}

/// Pure health monitoring and reconnection decision logic
pub struct HealthMonitor;

impl HealthMonitor {
    /// Decide what follows `consecutive_failures` failed attempts
    pub fn should_attempt_reconnection(
        consecutive_failures: u32,
        config: &ReconnectConfig,
        auth_rejected: bool,
    ) -> ReconnectionDecision {
        if auth_rejected {
            return ReconnectionDecision::AbortAuthRejected;
        }
        if consecutive_failures >= config.max_attempts {
            return ReconnectionDecision::AbortMaxAttemptsExceeded;
        }

        ReconnectionDecision::Proceed {
            attempt: consecutive_failures + 1,
            delay: config.calculate_backoff_delay(consecutive_failures.max(1)),
        }
    }

    /// Calculate health metrics for connection (pure function)
    pub fn calculate_health_metrics(
        now: Instant,
        connect_time: Option<Instant>,
        last_frame_time: Option<Instant>,
        reconnect_count: u32,
    ) -> HealthMetrics {
        let uptime = connect_time.map(|t| now.saturating_duration_since(t));
        let time_since_last_frame = last_frame_time.map(|t| now.saturating_duration_since(t));
        let is_healthy = Self::determine_health_status(uptime, time_since_last_frame);

        let mut metrics = HealthMetrics {
            uptime,
            time_since_last_frame,
            reconnect_count,
            is_healthy,
            quality: ConnectionQuality::Critical,
        };
        metrics.quality = Self::assess_connection_quality(&metrics);
        metrics
    }

    fn determine_health_status(
        uptime: Option<Duration>,
        time_since_last_frame: Option<Duration>,
    ) -> bool {
        match (uptime, time_since_last_frame) {
            (Some(_), None) => true,
            (Some(_), Some(last_frame)) => last_frame < STALE_AFTER,
            _ => false,
        }
    }

    /// Assess connection quality based on metrics (pure function)
    pub fn assess_connection_quality(metrics: &HealthMetrics) -> ConnectionQuality {
        if !metrics.is_healthy {
            return ConnectionQuality::Critical;
        }

        match (metrics.reconnect_count, metrics.uptime) {
            (0, Some(uptime)) if uptime > Duration::from_secs(3600) => ConnectionQuality::Excellent,
            (0, Some(_)) => ConnectionQuality::Good,
            (1..=2, Some(uptime)) if uptime > Duration::from_secs(1800) => ConnectionQuality::Good,
            (1..=2, Some(_)) => ConnectionQuality::Fair,
            (3..=5, _) => ConnectionQuality::Fair,
            (6..=10, _) => ConnectionQuality::Poor,
            _ => ConnectionQuality::Critical,
        }
    }

    /// Validate backoff configuration (pure function)
    pub fn validate_reconnect_config(config: &ReconnectConfig) -> Result<(), String> {
        if config.base_delay.is_zero() {
            return Err("base_delay must be greater than 0".to_string());
        }
        if config.max_delay < config.base_delay {
            return Err(format!(
                "max_delay ({}ms) must be >= base_delay ({}ms)",
                config.max_delay.as_millis(),
                config.base_delay.as_millis()
            ));
        }
        if config.max_attempts == 0 {
            return Err("max_attempts must be greater than 0".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_sequence() {
        let config = ReconnectConfig::default();
        let delays: Vec<u64> = (1..=7)
            .map(|n| config.calculate_backoff_delay(n).as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);
        assert_eq!(config.calculate_backoff_delay(0), Duration::from_secs(1));
        assert_eq!(config.calculate_backoff_delay(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_from_section() {
        let section = ReconnectSection {
            base_delay_ms: 250,
            max_delay_ms: 2000,
            max_attempts: 3,
        };
        let config = ReconnectConfig::from(&section);
        assert_eq!(config.base_delay, Duration::from_millis(250));
        assert_eq!(config.calculate_backoff_delay(4), Duration::from_millis(2000));
    }

    #[test]
    fn test_should_attempt_reconnection() {
        let config = ReconnectConfig::default();

        assert_eq!(
            HealthMonitor::should_attempt_reconnection(1, &config, false),
            ReconnectionDecision::Proceed {
                attempt: 2,
                delay: Duration::from_secs(1)
            }
        );
        assert_eq!(
            HealthMonitor::should_attempt_reconnection(3, &config, false),
            ReconnectionDecision::Proceed {
                attempt: 4,
                delay: Duration::from_secs(4)
            }
        );
        assert_eq!(
            HealthMonitor::should_attempt_reconnection(10, &config, false),
            ReconnectionDecision::AbortMaxAttemptsExceeded
        );
        assert_eq!(
            HealthMonitor::should_attempt_reconnection(1, &config, true),
            ReconnectionDecision::AbortAuthRejected
        );
    }

    #[test]
    fn test_health_metrics() {
        let now = Instant::now();
        let connected = now.checked_sub(Duration::from_secs(60)).unwrap_or(now);

        let metrics = HealthMonitor::calculate_health_metrics(now, Some(connected), None, 0);
        assert!(metrics.is_healthy);
        assert_eq!(metrics.quality, ConnectionQuality::Good);

        let metrics = HealthMonitor::calculate_health_metrics(now, None, None, 0);
        assert!(!metrics.is_healthy);
        assert_eq!(metrics.quality, ConnectionQuality::Critical);
    }

    #[test]
    fn test_stale_link_is_unhealthy() {
        let now = Instant::now();
        let Some(long_ago) = now.checked_sub(Duration::from_secs(600)) else {
            return;
        };
        let metrics = HealthMonitor::calculate_health_metrics(now, Some(long_ago), Some(long_ago), 0);
        assert!(!metrics.is_healthy);
    }

    #[test]
    fn test_assess_connection_quality() {
        let metrics = |reconnects, uptime_secs| HealthMetrics {
            uptime: Some(Duration::from_secs(uptime_secs)),
            time_since_last_frame: None,
            reconnect_count: reconnects,
            is_healthy: true,
            quality: ConnectionQuality::Critical,
        };
        assert_eq!(
            HealthMonitor::assess_connection_quality(&metrics(0, 7200)),
            ConnectionQuality::Excellent
        );
        assert_eq!(
            HealthMonitor::assess_connection_quality(&metrics(2, 60)),
            ConnectionQuality::Fair
        );
        assert_eq!(
            HealthMonitor::assess_connection_quality(&metrics(8, 60)),
            ConnectionQuality::Poor
        );
        assert_eq!(
            HealthMonitor::assess_connection_quality(&metrics(20, 60)),
            ConnectionQuality::Critical
        );
    }

    #[test]
    fn test_validate_reconnect_config() {
        assert!(HealthMonitor::validate_reconnect_config(&ReconnectConfig::default()).is_ok());

        let zero_base = ReconnectConfig {
            base_delay: Duration::ZERO,
            ..ReconnectConfig::default()
        };
        assert!(HealthMonitor::validate_reconnect_config(&zero_base).is_err());

        let inverted = ReconnectConfig {
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(1),
            max_attempts: 3,
        };
        assert!(HealthMonitor::validate_reconnect_config(&inverted).is_err());

        let no_attempts = ReconnectConfig {
            max_attempts: 0,
            ..ReconnectConfig::default()
        };
        assert!(HealthMonitor::validate_reconnect_config(&no_attempts).is_err());
    }
}
