#![allow(dead_code)]

use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde_json::{json, Value};
use wiresim_core::telemetry::{ClientSnapshot, ServerSnapshot};
use wiresim_core::*;

pub type Records = Arc<RwLock<Vec<(Duration, TelemetryRecord)>>>;

pub struct TestHarness {
    pub sim: Simulation,
    pub records: Records,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::new_with_seed(0)
    }

    pub fn new_with_seed(seed: u64) -> Self {
        let mut sim = Simulation::new_with_seed(seed);
        let records: Records = Arc::new(RwLock::new(Vec::new()));
        sim.set_sink(Box::new(Arc::clone(&records)));
        Self { sim, records }
    }

    pub fn add(&mut self, kind: EntityKind, params: Value) -> EntityId {
        self.sim.add_entity(kind, params).unwrap()
    }

    pub fn add_client(&mut self, config: ClientConfig) -> EntityId {
        self.add(EntityKind::Client, serde_json::to_value(config).unwrap())
    }

    pub fn add_http_client(&mut self, data_size_bytes: usize) -> EntityId {
        self.add_client(ClientConfig {
            mode: ClientMode::Http,
            data_size_bytes,
            ..ClientConfig::default()
        })
    }

    pub fn add_server(&mut self, processing_time_ms: u64) -> EntityId {
        self.add(
            EntityKind::Server,
            json!({ "processing_time_ms": processing_time_ms }),
        )
    }

    pub fn add_load_balancer(&mut self, algorithm: LoadBalancerAlgorithm) -> EntityId {
        self.add(EntityKind::LoadBalancer, json!({ "algorithm": algorithm }))
    }

    pub fn connect(&mut self, a: EntityId, b: EntityId) -> ConnectionId {
        self.connect_with_link(a, b, LinkConfig::default())
    }

    pub fn connect_with_link(&mut self, a: EntityId, b: EntityId, link: LinkConfig) -> ConnectionId {
        self.sim.connect(a, b, link).unwrap()
    }

    /// Advances in 1ms sub-steps.
    pub fn run_for(&mut self, duration_ms: u64) {
        for _ in 0..duration_ms {
            self.sim.advance(Duration::from_millis(1), 1, 1.0);
        }
    }

    pub fn run_until(&mut self, time_ms: u64) {
        let target = Duration::from_millis(time_ms);
        while self.sim.time() < target {
            self.sim.advance(Duration::from_millis(1), 1, 1.0);
        }
    }

    pub fn ip(&self, id: EntityId) -> String {
        self.sim.entity_dyn(id).unwrap().ip().to_string()
    }

    pub fn client(&self, id: EntityId) -> &Client {
        self.sim.entity::<Client>(id).unwrap()
    }

    pub fn client_mut(&mut self, id: EntityId) -> &mut Client {
        self.sim.entity_mut::<Client>(id).unwrap()
    }

    pub fn server(&self, id: EntityId) -> &Server {
        self.sim.entity::<Server>(id).unwrap()
    }

    pub fn load_balancer(&self, id: EntityId) -> &LoadBalancer {
        self.sim.entity::<LoadBalancer>(id).unwrap()
    }

    pub fn records(&self) -> Vec<(Duration, TelemetryRecord)> {
        self.records.read().unwrap().clone()
    }

    pub fn round_trips(&self) -> Vec<(Duration, Duration)> {
        self.records()
            .into_iter()
            .filter_map(|(at, r)| match r {
                TelemetryRecord::RoundTrip(event) => Some((at, event.latency)),
                _ => None,
            })
            .collect()
    }

    pub fn client_snapshots(&self, ip: &str) -> Vec<(Duration, ClientSnapshot)> {
        self.records()
            .into_iter()
            .filter_map(|(at, r)| match r {
                TelemetryRecord::Client(s) if s.ip == ip => Some((at, s)),
                _ => None,
            })
            .collect()
    }

    pub fn server_snapshots(&self) -> Vec<(Duration, ServerSnapshot)> {
        self.records()
            .into_iter()
            .filter_map(|(at, r)| match r {
                TelemetryRecord::Server(s) => Some((at, s)),
                _ => None,
            })
            .collect()
    }

    /// Servers in the order they picked up new work.
    pub fn server_pickups(&self) -> Vec<String> {
        let mut loaded = std::collections::HashSet::new();
        let mut pickups = Vec::new();
        for (_, s) in self.server_snapshots() {
            if s.total_load > 0 {
                if loaded.insert(s.ip.clone()) {
                    pickups.push(s.ip);
                }
            } else {
                loaded.remove(&s.ip);
            }
        }
        pickups
    }
}
