use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use hdrhistogram::{CreationError, Histogram};
use serde::{Deserialize, Serialize};

use crate::telemetry::{
    ClientSnapshot, ConnectionSnapshot, LoadBalancerSnapshot, MessageState, MetricsSink, ServerSnapshot,
    TelemetryRecord,
};
use crate::traits::ConnectionId;

const SAMPLE_INTERVAL: Duration = Duration::from_millis(200);
const RATE_SMOOTHING: f64 = 0.1;
/// Latencies above an hour are clamped.
const MAX_LATENCY_US: u64 = 3_600_000_000;

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq)]
pub struct MetricPoint {
    pub sim_time: Duration,
    pub p99_ms: f64,
    pub round_trips_per_sec: f64,
    pub bytes_in_flight: usize,
}

/// Sink that keeps the latest view of every entity plus a short history of
/// aggregate figures, sampled every 200ms of simulated time.
pub struct MetricsCollector {
    pub history: VecDeque<MetricPoint>,
    pub max_points: usize,
    clients: BTreeMap<String, ClientSnapshot>,
    servers: BTreeMap<String, ServerSnapshot>,
    balancers: BTreeMap<String, LoadBalancerSnapshot>,
    connections: BTreeMap<ConnectionId, ConnectionSnapshot>,
    message_counts: BTreeMap<MessageState, u64>,
    round_trips: u64,
    latencies_us: Histogram<u64>,
    last_sample_time: Duration,
    last_round_trips: u64,
    current_rate: f64,
}

impl MetricsCollector {
    pub fn new(max_points: usize) -> Result<Self, CreationError> {
        Ok(Self {
            history: VecDeque::with_capacity(max_points),
            max_points,
            clients: BTreeMap::new(),
            servers: BTreeMap::new(),
            balancers: BTreeMap::new(),
            connections: BTreeMap::new(),
            message_counts: BTreeMap::new(),
            round_trips: 0,
            latencies_us: Histogram::new_with_bounds(1, MAX_LATENCY_US, 3)?,
            last_sample_time: Duration::ZERO,
            last_round_trips: 0,
            current_rate: 0.0,
        })
    }

    pub fn client(&self, ip: &str) -> Option<&ClientSnapshot> {
        self.clients.get(ip)
    }

    pub fn server(&self, ip: &str) -> Option<&ServerSnapshot> {
        self.servers.get(ip)
    }

    pub fn load_balancer(&self, ip: &str) -> Option<&LoadBalancerSnapshot> {
        self.balancers.get(ip)
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&ConnectionSnapshot> {
        self.connections.get(&id)
    }

    pub fn clients(&self) -> impl Iterator<Item = &ClientSnapshot> {
        self.clients.values()
    }

    pub fn servers(&self) -> impl Iterator<Item = &ServerSnapshot> {
        self.servers.values()
    }

    pub fn connections(&self) -> impl Iterator<Item = &ConnectionSnapshot> {
        self.connections.values()
    }

    /// Message events seen in `state` so far.
    pub fn message_count(&self, state: MessageState) -> u64 {
        self.message_counts.get(&state).copied().unwrap_or(0)
    }

    pub fn round_trips(&self) -> u64 {
        self.round_trips
    }

    /// Round-trip latency at percentile `p` (0-100), `None` before the first reply.
    pub fn percentile(&self, p: f64) -> Option<Duration> {
        if self.latencies_us.is_empty() {
            return None;
        }
        Some(Duration::from_micros(self.latencies_us.value_at_percentile(p)))
    }

    pub fn bytes_in_flight(&self) -> usize {
        self.connections.values().map(|c| c.total_bytes_in_flight).sum()
    }

    fn sample(&mut self, now: Duration) {
        if now <= self.last_sample_time || now < self.last_sample_time.saturating_add(SAMPLE_INTERVAL) {
            return;
        }

        let p99_ms = self.percentile(99.0).map_or(0.0, |d| d.as_secs_f64() * 1000.0);
        let delta = self.round_trips.saturating_sub(self.last_round_trips);
        let delta_t = (now - self.last_sample_time).as_secs_f64();
        let raw_rate = delta as f64 / delta_t;
        self.current_rate = self.current_rate * (1.0 - RATE_SMOOTHING) + raw_rate * RATE_SMOOTHING;

        self.history.push_back(MetricPoint {
            sim_time: now,
            p99_ms,
            round_trips_per_sec: self.current_rate,
            bytes_in_flight: self.bytes_in_flight(),
        });
        if self.history.len() > self.max_points {
            self.history.pop_front();
        }

        self.last_sample_time = now;
        self.last_round_trips = self.round_trips;
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.clients.clear();
        self.servers.clear();
        self.balancers.clear();
        self.connections.clear();
        self.message_counts.clear();
        self.round_trips = 0;
        self.latencies_us.reset();
        self.last_sample_time = Duration::ZERO;
        self.last_round_trips = 0;
        self.current_rate = 0.0;
    }
}

impl MetricsSink for MetricsCollector {
    fn record(&mut self, at: Duration, record: &TelemetryRecord) {
        match record {
            TelemetryRecord::Client(s) => {
                self.clients.insert(s.ip.clone(), s.clone());
            }
            TelemetryRecord::Server(s) => {
                self.servers.insert(s.ip.clone(), s.clone());
            }
            TelemetryRecord::LoadBalancer(s) => {
                self.balancers.insert(s.ip.clone(), s.clone());
            }
            TelemetryRecord::Connection(s) => {
                self.connections.insert(s.id, s.clone());
            }
            TelemetryRecord::Message(event) => {
                *self.message_counts.entry(event.state).or_insert(0) += 1;
            }
            TelemetryRecord::RoundTrip(event) => {
                self.round_trips += 1;
                let micros = u64::try_from(event.latency.as_micros()).unwrap_or(u64::MAX);
                self.latencies_us.saturating_record(micros.max(1));
            }
        }
        self.sample(at);
    }
}
