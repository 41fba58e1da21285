use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::message::Message;
use crate::telemetry::ConnectionSnapshot;
use crate::traits::{ConnectionId, EntityId};

#[derive(Serialize, Deserialize, Clone, Debug, Copy, PartialEq)]
#[serde(default)]
pub struct LinkConfig {
    pub base_latency_ms: f64,     // Fixed cost of every message
    pub per_byte_latency_ms: f64, // Serialization cost, models bandwidth
    pub max_in_flight: Option<usize>, // Messages beyond this wait in the pending queue
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            base_latency_ms: 10.0,
            per_byte_latency_ms: 0.0,
            max_in_flight: None,
        }
    }
}

impl LinkConfig {
    pub fn transit_time(&self, size: usize) -> Duration {
        let ms = self.base_latency_ms + size as f64 * self.per_byte_latency_ms;
        if ms.is_nan() || ms <= 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(ms / 1000.0).unwrap_or(Duration::MAX)
    }
}

pub fn canonical_key(a: EntityId, b: EntityId) -> (EntityId, EntityId) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    pub id: EntityId,
    pub ip: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct MessageInTransit {
    pub message: Message,
    pub elapsed: Duration,
    transit: Duration,
    lane: usize,
    /// Sent while deliveries were being handed out; starts moving next sub-step.
    fresh: bool,
}

impl MessageInTransit {
    pub fn transit_time(&self) -> Duration {
        self.transit
    }
}

/// Bidirectional link between two entities.
///
/// Each direction is a FIFO lane: a message is never delivered ahead of one sent
/// earlier in the same direction, even if it would finish its own transit first.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    endpoints: [Endpoint; 2],
    config: LinkConfig,
    active: bool,
    in_transit: Vec<MessageInTransit>,
    pending: VecDeque<MessageInTransit>,
    delivering: bool,
}

impl Connection {
    pub fn new(id: ConnectionId, first: Endpoint, second: Endpoint, config: LinkConfig) -> Self {
        Self {
            id,
            endpoints: [first, second],
            config,
            active: true,
            in_transit: Vec::new(),
            pending: VecDeque::new(),
            delivering: false,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }
    pub fn first(&self) -> &Endpoint {
        &self.endpoints[0]
    }
    pub fn second(&self) -> &Endpoint {
        &self.endpoints[1]
    }
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }
    /// New latencies apply to messages sent from now on.
    pub fn set_config(&mut self, config: LinkConfig) {
        self.config = config;
    }
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn display_name(&self) -> String {
        format!("{} → {}", self.endpoints[0].name, self.endpoints[1].name)
    }

    pub fn connects(&self, id: EntityId) -> bool {
        self.endpoints.iter().any(|e| e.id == id)
    }

    pub fn component_with_ip(&self, ip: &str) -> Option<&Endpoint> {
        self.endpoints.iter().find(|e| e.ip == ip)
    }

    pub fn opposite_of(&self, ip: &str) -> Option<&Endpoint> {
        match self.endpoints.iter().position(|e| e.ip == ip) {
            Some(idx) => Some(&self.endpoints[1 - idx]),
            None => None,
        }
    }

    /// Queues a message for delivery. Returns `false` when the link is down or
    /// the message is not addressed to either endpoint.
    pub fn transfer_data(&mut self, message: Message) -> bool {
        if !self.active {
            log::debug!("{}: dropping message {} on inactive link", self.display_name(), message.id());
            return false;
        }
        let Some(lane) = self.endpoints.iter().position(|e| e.ip == message.to_ip()) else {
            log::warn!(
                "{}: message {} addressed to {} which is not on this link",
                self.display_name(),
                message.id(),
                message.to_ip()
            );
            return false;
        };
        let item = MessageInTransit {
            transit: self.config.transit_time(message.size()),
            message,
            elapsed: Duration::ZERO,
            lane,
            fresh: self.delivering,
        };
        if self.pending.is_empty() && self.has_capacity() {
            self.in_transit.push(item);
        } else {
            self.pending.push_back(item);
        }
        true
    }

    /// Deactivation loses everything in flight and pending; activation does not
    /// replay it. Returns how many messages were dropped.
    pub fn set_active(&mut self, active: bool) -> usize {
        self.active = active;
        if active {
            return 0;
        }
        let dropped = self.in_transit.len() + self.pending.len();
        self.in_transit.clear();
        self.pending.clear();
        dropped
    }

    /// Advances every in-flight message and hands back the ones that arrived,
    /// paired with the receiving entity, in send order.
    pub fn tick(&mut self, elapsed: Duration) -> Vec<(EntityId, Message)> {
        let mut delivered = Vec::new();
        let mut held = [false; 2];
        let mut remaining = Vec::with_capacity(self.in_transit.len());
        for mut item in self.in_transit.drain(..) {
            if item.fresh {
                held[item.lane] = true;
                remaining.push(item);
                continue;
            }
            item.elapsed = item.elapsed.saturating_add(elapsed);
            if !held[item.lane] && item.elapsed >= item.transit {
                delivered.push((self.endpoints[item.lane].id, item.message));
            } else {
                held[item.lane] = true;
                remaining.push(item);
            }
        }
        self.in_transit = remaining;
        delivered
    }

    /// Between the two calls every accepted message is marked fresh, so that
    /// whether a reply sent from a delivery handler moves in the current
    /// sub-step does not depend on connection ids.
    pub fn begin_delivery_phase(&mut self) {
        self.delivering = true;
    }

    pub fn end_delivery_phase(&mut self) {
        self.delivering = false;
        for item in self.in_transit.iter_mut().chain(self.pending.iter_mut()) {
            item.fresh = false;
        }
    }

    /// Moves queued messages into flight until the cap is reached.
    pub fn promote_pending(&mut self) {
        while self.has_capacity() {
            match self.pending.pop_front() {
                Some(item) => self.in_transit.push(item),
                None => break,
            }
        }
    }

    fn has_capacity(&self) -> bool {
        self.config
            .max_in_flight
            .map_or(true, |cap| self.in_transit.len() < cap)
    }

    pub fn messages_in_transit(&self) -> &[MessageInTransit] {
        &self.in_transit
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn bytes_in_flight(&self) -> usize {
        self.in_transit.iter().map(|m| m.message.size()).sum()
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            id: self.id,
            name: self.display_name(),
            active: self.active,
            messages_in_transit: self.in_transit.len(),
            pending: self.pending.len(),
            total_bytes_in_flight: self.bytes_in_flight(),
        }
    }
}
