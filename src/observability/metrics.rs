//! Thread-safe metrics collection system
//!
//! Atomic counters for the live feed, subscriptions, connection lifecycle and
//! actuator commands, plus a bounded window of frame handling latencies.

use crate::transport::ConnectionState;
use once_cell::sync::Lazy;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Latency samples kept for percentile reporting
const MAX_LATENCY_SAMPLES: usize = 1000;

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

/// Thread-safe metrics collector using atomics and mutexes
pub struct MetricsCollector {
    // Feed
    frames_received: AtomicU64,
    frames_dropped: AtomicU64,
    frames_filtered: AtomicU64,
    events_projected: AtomicU64,
    batch_updates: AtomicU64,
    last_frame_at: AtomicU64,

    // Subscriptions
    subscribe_frames_sent: AtomicU64,
    unsubscribe_frames_sent: AtomicU64,
    rearms: AtomicU64,

    // Connection
    connected: AtomicBool,
    connection_state: Mutex<ConnectionState>,
    connection_attempts: AtomicU64,
    connections_established: AtomicU64,
    connection_failures: AtomicU64,
    connections_lost: AtomicU64,
    degraded_entries: AtomicU64,
    connection_start_time: AtomicU64,

    // Commands
    commands_sent: AtomicU64,
    commands_failed: AtomicU64,

    frame_latencies_us: Mutex<Vec<u64>>,
    uptime_start: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            frames_received: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            frames_filtered: AtomicU64::new(0),
            events_projected: AtomicU64::new(0),
            batch_updates: AtomicU64::new(0),
            last_frame_at: AtomicU64::new(0),
            subscribe_frames_sent: AtomicU64::new(0),
            unsubscribe_frames_sent: AtomicU64::new(0),
            rearms: AtomicU64::new(0),
            connected: AtomicBool::new(false),
            connection_state: Mutex::new(ConnectionState::Disconnected),
            connection_attempts: AtomicU64::new(0),
            connections_established: AtomicU64::new(0),
            connection_failures: AtomicU64::new(0),
            connections_lost: AtomicU64::new(0),
            degraded_entries: AtomicU64::new(0),
            connection_start_time: AtomicU64::new(0),
            commands_sent: AtomicU64::new(0),
            commands_failed: AtomicU64::new(0),
            frame_latencies_us: Mutex::new(Vec::new()),
            uptime_start: AtomicU64::new(current_timestamp()),
        }
    }

    // Feed metrics
    pub fn frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        self.last_frame_at
            .store(current_timestamp(), Ordering::Relaxed);
    }

    /// Frame could not be normalized
    pub fn frame_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Event rejected by the dispatch filter
    pub fn frame_filtered(&self) {
        self.frames_filtered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_projected(&self, is_batch: bool) {
        self.events_projected.fetch_add(1, Ordering::Relaxed);
        if is_batch {
            self.batch_updates.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_frame_latency(&self, duration: Duration) {
        if let Ok(mut samples) = self.frame_latencies_us.lock() {
            samples.push(duration.as_micros() as u64);
            if samples.len() > MAX_LATENCY_SAMPLES {
                samples.remove(0);
            }
        }
    }

    // Subscription metrics
    pub fn subscribe_frames_sent(&self, count: usize) {
        self.subscribe_frames_sent
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn unsubscribe_frames_sent(&self, count: usize) {
        self.unsubscribe_frames_sent
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn subscription_rearmed(&self) {
        self.rearms.fetch_add(1, Ordering::Relaxed);
    }

    // Connection metrics
    pub fn connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_established(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        self.connected.store(true, Ordering::Relaxed);
        self.connection_start_time
            .store(current_timestamp(), Ordering::Relaxed);
    }

    pub fn connection_failed(&self) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
        self.connected.store(false, Ordering::Relaxed);
        self.connection_start_time.store(0, Ordering::Relaxed);
    }

    pub fn connection_lost(&self) {
        self.connections_lost.fetch_add(1, Ordering::Relaxed);
        self.connected.store(false, Ordering::Relaxed);
        self.connection_start_time.store(0, Ordering::Relaxed);
    }

    pub fn degraded(&self) {
        self.degraded_entries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_connection_state(&self, state: ConnectionState) {
        if let Ok(mut current) = self.connection_state.lock() {
            *current = state;
        }
        if !state.is_connected() {
            self.connected.store(false, Ordering::Relaxed);
        }
    }

    // Command metrics
    pub fn command_sent(&self) {
        self.commands_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn command_failed(&self) {
        self.commands_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Reset all metrics (useful for testing)
    pub fn reset(&self) {
        for counter in [
            &self.frames_received,
            &self.frames_dropped,
            &self.frames_filtered,
            &self.events_projected,
            &self.batch_updates,
            &self.last_frame_at,
            &self.subscribe_frames_sent,
            &self.unsubscribe_frames_sent,
            &self.rearms,
            &self.connection_attempts,
            &self.connections_established,
            &self.connection_failures,
            &self.connections_lost,
            &self.degraded_entries,
            &self.connection_start_time,
            &self.commands_sent,
            &self.commands_failed,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.connected.store(false, Ordering::Relaxed);
        self.set_connection_state(ConnectionState::Disconnected);
        if let Ok(mut samples) = self.frame_latencies_us.lock() {
            samples.clear();
        }
        self.uptime_start
            .store(current_timestamp(), Ordering::Relaxed);
    }

    /// Average, p50, p95 and p99 frame latency in microseconds
    fn calculate_latency_statistics(&self) -> (f64, f64, f64, f64) {
        let Ok(samples) = self.frame_latencies_us.lock() else {
            return (0.0, 0.0, 0.0, 0.0);
        };
        if samples.is_empty() {
            return (0.0, 0.0, 0.0, 0.0);
        }
        let mut sorted = samples.clone();
        sorted.sort_unstable();
        let avg = sorted.iter().sum::<u64>() as f64 / sorted.len() as f64;
        (
            avg,
            percentile(&sorted, 50.0),
            percentile(&sorted, 95.0),
            percentile(&sorted, 99.0),
        )
    }

    fn calculate_connection_duration(&self, now: u64) -> u64 {
        if !self.connected.load(Ordering::Relaxed) {
            return 0;
        }
        match self.connection_start_time.load(Ordering::Relaxed) {
            0 => 0,
            start => now.saturating_sub(start),
        }
    }

    fn current_connection_state(&self) -> ConnectionState {
        self.connection_state
            .lock()
            .map(|s| *s)
            .unwrap_or_default()
    }

    /// Get complete metrics snapshot
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let (avg, p50, p95, p99) = self.calculate_latency_statistics();

        MetricsSnapshot {
            feed: FeedMetrics {
                frames_received: self.frames_received.load(Ordering::Relaxed),
                frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
                frames_filtered: self.frames_filtered.load(Ordering::Relaxed),
                events_projected: self.events_projected.load(Ordering::Relaxed),
                batch_updates: self.batch_updates.load(Ordering::Relaxed),
                last_frame_at: self.last_frame_at.load(Ordering::Relaxed),
                avg_frame_latency_us: avg,
                frame_latency_p50_us: p50,
                frame_latency_p95_us: p95,
                frame_latency_p99_us: p99,
            },
            subscriptions: SubscriptionMetrics {
                subscribe_frames_sent: self.subscribe_frames_sent.load(Ordering::Relaxed),
                unsubscribe_frames_sent: self.unsubscribe_frames_sent.load(Ordering::Relaxed),
                rearms: self.rearms.load(Ordering::Relaxed),
            },
            connection: ConnectionMetrics {
                state: self.current_connection_state(),
                connected: self.connected.load(Ordering::Relaxed),
                connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
                connections_established: self.connections_established.load(Ordering::Relaxed),
                connection_failures: self.connection_failures.load(Ordering::Relaxed),
                connections_lost: self.connections_lost.load(Ordering::Relaxed),
                degraded_entries: self.degraded_entries.load(Ordering::Relaxed),
                connection_duration_seconds: self.calculate_connection_duration(now),
            },
            commands: CommandMetrics {
                commands_sent: self.commands_sent.load(Ordering::Relaxed),
                commands_failed: self.commands_failed.load(Ordering::Relaxed),
            },
            uptime_seconds: now.saturating_sub(self.uptime_start.load(Ordering::Relaxed)),
            timestamp: now,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub feed: FeedMetrics,
    pub subscriptions: SubscriptionMetrics,
    pub connection: ConnectionMetrics,
    pub commands: CommandMetrics,
    pub uptime_seconds: u64,
    pub timestamp: u64,
}

#[derive(Debug, Serialize)]
pub struct FeedMetrics {
    pub frames_received: u64,
    pub frames_dropped: u64,
    pub frames_filtered: u64,
    pub events_projected: u64,
    pub batch_updates: u64,
    pub last_frame_at: u64,
    pub avg_frame_latency_us: f64,
    pub frame_latency_p50_us: f64,
    pub frame_latency_p95_us: f64,
    pub frame_latency_p99_us: f64,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionMetrics {
    pub subscribe_frames_sent: u64,
    pub unsubscribe_frames_sent: u64,
    pub rearms: u64,
}

#[derive(Debug, Serialize)]
pub struct ConnectionMetrics {
    pub state: ConnectionState,
    pub connected: bool,
    pub connection_attempts: u64,
    pub connections_established: u64,
    pub connection_failures: u64,
    pub connections_lost: u64,
    pub degraded_entries: u64,
    pub connection_duration_seconds: u64,
}

#[derive(Debug, Serialize)]
pub struct CommandMetrics {
    pub commands_sent: u64,
    pub commands_failed: u64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn percentile(sorted_data: &[u64], percentile: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }

    let len = sorted_data.len();
    let index = (percentile / 100.0) * (len - 1) as f64;

    if index.fract() == 0.0 {
        sorted_data[index as usize] as f64
    } else {
        let lower_value = sorted_data[index.floor() as usize] as f64;
        let upper_value = sorted_data[index.ceil() as usize] as f64;
        lower_value + (upper_value - lower_value) * index.fract()
    }
}
