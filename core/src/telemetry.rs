//! Read-only records the engine emits for whoever draws or stores them.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::Serialize;

use crate::components::client::ClientState;
use crate::components::load_balancer::LoadBalancerAlgorithm;
use crate::message::{Message, MessageId};
use crate::traits::ConnectionId;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientSnapshot {
    pub ip: String,
    pub state: ClientState,
    pub time_in_state: Duration,
    pub total_elapsed: Duration,
    pub queue_depth: usize,
    pub transfer_progress: f64,
    pub transfer_status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerSnapshot {
    pub ip: String,
    pub processing_load: usize,
    pub queued_count: usize,
    pub total_load: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadBalancerSnapshot {
    pub ip: String,
    pub algorithm: LoadBalancerAlgorithm,
    pub servers: Vec<String>,
    pub affinity_entries: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionSnapshot {
    pub id: ConnectionId,
    pub name: String,
    pub active: bool,
    pub messages_in_transit: usize,
    pub pending: usize,
    pub total_bytes_in_flight: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum MessageState {
    Created,
    InTransit,
    Received,
    Compressing,
    Decompressing,
    Processing,
    Processed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Processor {
    Client,
    Server,
    LoadBalancer,
    Connection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageEvent {
    pub id: MessageId,
    pub original_sender_ip: String,
    pub state: MessageState,
    pub processor: Processor,
    pub size_bytes: usize,
    pub compressed: bool,
    pub is_final: bool,
    pub elapsed_since_creation: Duration,
}

impl MessageEvent {
    pub fn observe(message: &Message, state: MessageState, processor: Processor, now: Duration) -> Self {
        Self {
            id: message.id(),
            original_sender_ip: message.original_sender_ip().to_string(),
            state,
            processor,
            size_bytes: message.size(),
            compressed: message.is_compressed(),
            is_final: message.is_final(),
            elapsed_since_creation: now.saturating_sub(message.created_at()),
        }
    }
}

/// A client got the final answer to the payload it sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoundTripEvent {
    pub client_ip: String,
    pub latency: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum TelemetryRecord {
    Client(ClientSnapshot),
    Server(ServerSnapshot),
    LoadBalancer(LoadBalancerSnapshot),
    Connection(ConnectionSnapshot),
    Message(MessageEvent),
    RoundTrip(RoundTripEvent),
}

/// Consumer of telemetry. Injected into the simulation; never a global.
pub trait MetricsSink {
    fn record(&mut self, at: Duration, record: &TelemetryRecord);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl MetricsSink for NullSink {
    fn record(&mut self, _at: Duration, _record: &TelemetryRecord) {}
}

impl MetricsSink for Vec<(Duration, TelemetryRecord)> {
    fn record(&mut self, at: Duration, record: &TelemetryRecord) {
        self.push((at, record.clone()));
    }
}

impl<S: MetricsSink> MetricsSink for Arc<RwLock<S>> {
    fn record(&mut self, at: Duration, record: &TelemetryRecord) {
        match self.write() {
            Ok(mut sink) => sink.record(at, record),
            Err(_) => log::warn!("metrics sink lock poisoned, dropping record"),
        }
    }
}
