//! Connection health aggregation.
//!
//! Consumes session transitions, event flow and correlation round-trip
//! samples, and exposes read-only snapshots. Never mutates session or
//! dispatcher state.

use crate::core::types::SessionState;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;
use std::time::{Duration, Instant};

const RTT_SAMPLE_CAP: usize = 64;
const RATE_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct ConnectionHealth {
    state: SessionState,
    events_received: u64,
    events_malformed: u64,
    error_count: u64,
    auth_failures: u64,
    last_event_at: Option<DateTime<Utc>>,
    rtt_samples: VecDeque<Duration>,
    tracked_since: Instant,
    active_since: Option<Instant>,
    total_active: Duration,
    window_started: Instant,
    window_events: u64,
}

impl ConnectionHealth {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            state: SessionState::Connecting,
            events_received: 0,
            events_malformed: 0,
            error_count: 0,
            auth_failures: 0,
            last_event_at: None,
            rtt_samples: VecDeque::with_capacity(RTT_SAMPLE_CAP),
            tracked_since: now,
            active_since: None,
            total_active: Duration::ZERO,
            window_started: now,
            window_events: 0,
        }
    }
}

/// Read-only view of one connection's rolling health.
#[derive(Debug, Clone)]
pub struct HealthSnapshot {
    pub connection_id: String,
    pub state: SessionState,
    pub events_received: u64,
    pub events_malformed: u64,
    pub error_count: u64,
    /// Surfaced distinctly so operators know to fix credentials rather
    /// than wait out a retry.
    pub auth_failures: u64,
    pub last_event_at: Option<DateTime<Utc>>,
    pub average_rtt: Option<Duration>,
    pub events_per_minute: f64,
    pub uptime_pct: f64,
}

/// Rolling per-connection metrics, keyed by connection id.
#[derive(Default)]
pub struct HealthRegistry {
    inner: RwLock<HashMap<String, ConnectionHealth>>,
}

impl HealthRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_transition(&self, connection_id: &str, state: SessionState) {
        let now = Instant::now();
        let mut inner = self.inner.write().expect("health registry lock poisoned");
        let health = inner
            .entry(connection_id.to_string())
            .or_insert_with(ConnectionHealth::new);

        if let Some(active_since) = health.active_since.take() {
            health.total_active += now.duration_since(active_since);
        }
        if state == SessionState::Active {
            health.active_since = Some(now);
        }
        health.state = state;
    }

    pub fn record_event(&self, connection_id: &str) {
        let now = Instant::now();
        let mut inner = self.inner.write().expect("health registry lock poisoned");
        let health = inner
            .entry(connection_id.to_string())
            .or_insert_with(ConnectionHealth::new);

        health.events_received += 1;
        health.last_event_at = Some(Utc::now());
        if now.duration_since(health.window_started) >= RATE_WINDOW {
            health.window_started = now;
            health.window_events = 0;
        }
        health.window_events += 1;
    }

    pub fn record_malformed(&self, connection_id: &str) {
        let mut inner = self.inner.write().expect("health registry lock poisoned");
        inner
            .entry(connection_id.to_string())
            .or_insert_with(ConnectionHealth::new)
            .events_malformed += 1;
    }

    pub fn record_error(&self, connection_id: &str, auth_failure: bool) {
        let mut inner = self.inner.write().expect("health registry lock poisoned");
        let health = inner
            .entry(connection_id.to_string())
            .or_insert_with(ConnectionHealth::new);
        health.error_count += 1;
        if auth_failure {
            health.auth_failures += 1;
        }
    }

    /// Feed a correlation-resolution latency sample.
    pub fn record_rtt(&self, connection_id: &str, rtt: Duration) {
        let mut inner = self.inner.write().expect("health registry lock poisoned");
        let health = inner
            .entry(connection_id.to_string())
            .or_insert_with(ConnectionHealth::new);
        if health.rtt_samples.len() == RTT_SAMPLE_CAP {
            health.rtt_samples.pop_front();
        }
        health.rtt_samples.push_back(rtt);
    }

    #[must_use]
    pub fn snapshot(&self, connection_id: &str) -> Option<HealthSnapshot> {
        let inner = self.inner.read().expect("health registry lock poisoned");
        inner
            .get(connection_id)
            .map(|health| Self::build_snapshot(connection_id, health))
    }

    #[must_use]
    pub fn snapshots(&self) -> Vec<HealthSnapshot> {
        let inner = self.inner.read().expect("health registry lock poisoned");
        inner
            .iter()
            .map(|(id, health)| Self::build_snapshot(id, health))
            .collect()
    }

    fn build_snapshot(connection_id: &str, health: &ConnectionHealth) -> HealthSnapshot {
        let now = Instant::now();

        let average_rtt = if health.rtt_samples.is_empty() {
            None
        } else {
            let total: Duration = health.rtt_samples.iter().sum();
            Some(total / health.rtt_samples.len() as u32)
        };

        let window_elapsed = now.duration_since(health.window_started).as_secs_f64();
        let events_per_minute = if window_elapsed > 0.0 {
            health.window_events as f64 * 60.0 / window_elapsed.max(1.0)
        } else {
            0.0
        };

        let mut active = health.total_active;
        if let Some(active_since) = health.active_since {
            active += now.duration_since(active_since);
        }
        let tracked = now.duration_since(health.tracked_since).as_secs_f64();
        let uptime_pct = if tracked > 0.0 {
            (active.as_secs_f64() / tracked * 100.0).min(100.0)
        } else {
            0.0
        };

        HealthSnapshot {
            connection_id: connection_id.to_string(),
            state: health.state,
            events_received: health.events_received,
            events_malformed: health.events_malformed,
            error_count: health.error_count,
            auth_failures: health.auth_failures,
            last_event_at: health.last_event_at,
            average_rtt,
            events_per_minute,
            uptime_pct,
        }
    }
}
